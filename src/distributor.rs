//! 이벤트 분배기
//!
//! 로그 컨슈머가 보낸 이벤트를 도착 순서대로 하나씩 꺼내 레지스트리의 모든 구독자에게 보낸다.
//! 전송에 실패한 구독자는 닫고 등록 해제한 뒤 나머지 구독자에게 계속 보낸다.

use crate::events::ChangeEvent;
use crate::registry::SubscriberRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// 컨슈머 → 분배기 이벤트 송신자
pub type EventSender = mpsc::UnboundedSender<ChangeEvent>;

/// 컨슈머 → 분배기 이벤트 수신자
pub type EventReceiver = mpsc::UnboundedReceiver<ChangeEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// 한 이벤트의 분배 결과
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct Distributor {
    registry: Arc<SubscriberRegistry>,
    rx: EventReceiver,
    write_timeout: Duration,
}

impl Distributor {
    pub fn new(registry: Arc<SubscriberRegistry>, rx: EventReceiver, write_timeout: Duration) -> Self {
        Distributor {
            registry,
            rx,
            write_timeout,
        }
    }

    /// 채널이 닫힐 때까지 이벤트 분배
    pub async fn run(mut self) {
        info!("Distributor started");

        while let Some(event) = self.rx.recv().await {
            let report = distribute(&self.registry, &event, self.write_timeout).await;
            debug!(
                "Broadcast {} {} to {} subscribers ({} dropped)",
                event.collection, event.event, report.delivered, report.dropped
            );
        }

        info!("Distributor stopped (channel closed)");
    }
}

/// 이벤트 하나를 현재 구독자 전원에게 순차 전송
///
/// 쓰기와 실패 후 닫기 모두 `write_timeout` 안에 끝나야 한다. 멤버 목록은 잠금 아래에서 복사하고 I/O는 잠금 밖에서 한다. 방금 해제된 연결로
/// 쓰기가 한 번 더 갈 수 있지만, 그 쓰기는 실패하고 일반 정리 경로를 탄다.
pub async fn distribute(
    registry: &SubscriberRegistry,
    event: &ChangeEvent,
    write_timeout: Duration,
) -> FanOutReport {
    let mut report = FanOutReport::default();

    let message = match event.to_message() {
        Ok(m) => m,
        Err(e) => {
            error!("Failed to serialize change on {}: {}", event.collection, e);
            return report;
        }
    };

    for subscriber in registry.snapshot() {
        match subscriber.send_text_within(message.clone(), write_timeout).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("Error broadcasting to {}: {}", subscriber.peer(), e);
                registry.unregister(&subscriber.id());
                if let Err(e) = subscriber.close_within(write_timeout).await {
                    debug!("Abandoned close of {}: {}", subscriber.peer(), e);
                }
                report.dropped += 1;
            }
        }
    }

    report
}
