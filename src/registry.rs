//! 구독자 레지스트리
//!
//! 레지스트리에 등록된 연결만 이벤트를 받는다. 모든 조회/변경은 하나의 뮤텍스로 직렬화된다.

use crate::error::{CdcError, Result};
use axum::extract::ws::Message;
use futures::{Sink, SinkExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// 구독자 식별자
pub type SubscriberId = Uuid;

type BoxedSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// 살아 있는 양방향 연결의 쓰기 절반
pub struct Subscriber {
    id: SubscriberId,
    peer: String,
    sink: tokio::sync::Mutex<BoxedSink>,
}

impl Subscriber {
    pub fn new<S>(peer: impl Into<String>, sink: S) -> Self
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
    {
        Subscriber {
            id: Uuid::new_v4(),
            peer: peer.into(),
            sink: tokio::sync::Mutex::new(Box::pin(sink)),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// 텍스트 메시지 하나 전송
    pub async fn send_text(&self, text: String) -> Result<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| CdcError::DeliveryError(format!("{}: {}", self.peer, e)))
    }

    /// `deadline` 안에 텍스트 메시지 하나 전송. 기한을 넘기면 `Timeout`.
    pub async fn send_text_within(&self, text: String, deadline: Duration) -> Result<()> {
        tokio::time::timeout(deadline, self.send_text(text))
            .await
            .map_err(|_| CdcError::Timeout)?
    }

    /// 연결 닫기 (이미 닫혀 있으면 무시)
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Err(e) = sink.close().await {
            debug!("Closing {} failed: {}", self.peer, e);
        }
    }

    /// `deadline` 안에 닫기. 응답 없는 연결은 닫기 프레임 없이 버려진다.
    pub async fn close_within(&self, deadline: Duration) -> Result<()> {
        tokio::time::timeout(deadline, self.close())
            .await
            .map_err(|_| CdcError::Timeout)
    }
}

/// 구독자 레지스트리
#[derive(Default)]
pub struct SubscriberRegistry {
    members: Mutex<HashMap<SubscriberId, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Arc<Subscriber>) {
        let mut members = self.members.lock();
        info!(
            "Registered subscriber {} ({}), {} total",
            subscriber.id(),
            subscriber.peer(),
            members.len() + 1
        );
        members.insert(subscriber.id(), subscriber);
    }

    /// 등록 해제. 이미 해제된 경우 false를 반환하고 아무 일도 하지 않는다.
    pub fn unregister(&self, id: &SubscriberId) -> bool {
        let mut members = self.members.lock();
        match members.remove(id) {
            Some(subscriber) => {
                info!(
                    "Unregistered subscriber {} ({}), {} remaining",
                    id,
                    subscriber.peer(),
                    members.len()
                );
                true
            }
            None => false,
        }
    }

    /// 잠금을 잡은 채로 현재 멤버 각각에 `f` 적용
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Subscriber>),
    {
        let members = self.members.lock();
        for subscriber in members.values() {
            f(subscriber);
        }
    }

    /// 현재 멤버 복사본. I/O는 잠금을 놓은 뒤 이 목록으로 수행한다.
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        let mut out = Vec::new();
        self.for_each(|s| out.push(Arc::clone(s)));
        out
    }

    pub fn contains(&self, id: &SubscriberId) -> bool {
        self.members.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{channel_subscriber, DeadSink};
    use super::*;
    use futures::StreamExt;

    #[test]
    fn test_register_and_unregister() {
        let registry = SubscriberRegistry::new();
        let (a, _rx_a) = channel_subscriber("a");
        let (b, _rx_b) = channel_subscriber("b");

        registry.register(a.clone());
        registry.register(b.clone());
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister(&a.id()));
        assert!(!registry.contains(&a.id()));
        assert!(registry.contains(&b.id()));
    }

    #[test]
    fn test_unregister_twice_is_noop() {
        let registry = SubscriberRegistry::new();
        let (a, _rx) = channel_subscriber("a");
        registry.register(a.clone());

        assert!(registry.unregister(&a.id()));
        assert!(!registry.unregister(&a.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = SubscriberRegistry::new();
        let (a, _rx) = channel_subscriber("a");
        registry.register(a.clone());

        let snapshot = registry.snapshot();
        registry.unregister(&a.id());
        assert_eq!(snapshot.len(), 1);
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_for_each_visits_all_members() {
        let registry = SubscriberRegistry::new();
        let mut keep = Vec::new();
        for i in 0..3 {
            let (s, rx) = channel_subscriber(&format!("peer-{}", i));
            registry.register(s);
            keep.push(rx);
        }

        let mut peers = Vec::new();
        registry.for_each(|s| peers.push(s.peer().to_string()));
        peers.sort();
        assert_eq!(peers, vec!["peer-0", "peer-1", "peer-2"]);
    }

    #[tokio::test]
    async fn test_send_text_and_failure() {
        let (s, mut rx) = channel_subscriber("a");
        s.send_text("hello".to_string()).await.unwrap();
        assert_eq!(rx.next().await, Some(Message::Text("hello".to_string())));

        drop(rx);
        assert!(matches!(
            s.send_text("again".to_string()).await,
            Err(CdcError::DeliveryError(_))
        ));
    }

    #[tokio::test]
    async fn test_dead_connection_times_out() {
        let dead = Subscriber::new("dead", DeadSink);
        let deadline = Duration::from_millis(20);

        assert!(matches!(
            dead.send_text_within("hello".to_string(), deadline).await,
            Err(CdcError::Timeout)
        ));
        assert!(matches!(dead.close_within(deadline).await, Err(CdcError::Timeout)));
    }
}
