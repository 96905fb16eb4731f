//! ThunderBase CDC 엔진
//!
//! 엔진은 다음 단계로 진행됩니다:
//! 1. 초기화: 변경 로그 테이블 생성, 모든 추적 테이블에 트리거 설치
//! 2. 스트리밍: 로그 컨슈머와 분배기 태스크 실행
//! 3. 구독자 연결마다 인사 → 등록 → 생존 확인용 읽기 루프

use crate::changelog::ChangeLog;
use crate::collections::Collections;
use crate::connection::{ConnectionConfig, SqliteConnection};
use crate::consumer::LogConsumer;
use crate::distributor::{self, Distributor};
use crate::error::{CdcError, Result};
use crate::events::Greeting;
use crate::registry::{Subscriber, SubscriberRegistry};
use crate::trigger::{PayloadMode, TriggerInstaller};
use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, Stream, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// CDC 엔진 설정
#[derive(Debug, Clone)]
pub struct CdcConfig {
    pub connection: ConnectionConfig,
    /// 로그 폴링 주기
    pub poll_interval: Duration,
    /// 한 틱에 읽는 최대 행 수
    pub batch_size: usize,
    /// 구독자 한 명에 대한 쓰기 제한 시간
    pub write_timeout: Duration,
    pub payload_mode: PayloadMode,
}

impl Default for CdcConfig {
    fn default() -> Self {
        CdcConfig {
            connection: ConnectionConfig::default(),
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            write_timeout: Duration::from_secs(5),
            payload_mode: PayloadMode::RowId,
        }
    }
}

/// 엔진 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    /// 초기화 전/중
    Initializing,
    /// 컨슈머와 분배기 실행 중
    Streaming,
    /// 중단됨
    Stopped,
}

/// CDC 엔진
pub struct CdcEngine {
    config: CdcConfig,
    db: SqliteConnection,
    changelog: ChangeLog,
    installer: TriggerInstaller,
    collections: Collections,
    registry: Arc<SubscriberRegistry>,
    state: Mutex<ProcessingState>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdcEngine {
    /// 데이터베이스를 열고 엔진 생성
    pub fn new(config: CdcConfig) -> Result<Self> {
        let db = SqliteConnection::open(config.connection.clone())?;
        let (shutdown, _) = watch::channel(false);

        Ok(CdcEngine {
            changelog: ChangeLog::new(db.clone()),
            installer: TriggerInstaller::new(db.clone(), config.payload_mode),
            collections: Collections::new(db.clone()),
            registry: Arc::new(SubscriberRegistry::new()),
            state: Mutex::new(ProcessingState::Initializing),
            tasks: Mutex::new(Vec::new()),
            shutdown,
            config,
            db,
        })
    }

    /// 변경 로그 테이블 생성 및 모든 추적 테이블에 트리거 설치
    pub fn initialize(&self) -> Result<Vec<String>> {
        info!("Initializing database...");

        self.changelog.ensure_table()?;
        info!("Created changes table: {}", crate::changelog::CHANGES_TABLE);

        self.installer.install_all().map_err(|e| match e {
            CdcError::TriggerInstallError { .. } => e,
            other => CdcError::InitializationError(format!("Failed to get tables: {}", other)),
        })
    }

    /// 초기화 후 컨슈머와 분배기 태스크 실행
    pub async fn start(&self) -> Result<()> {
        info!("Starting CDC Engine");
        self.initialize()?;

        let (tx, rx) = distributor::channel();
        let consumer = LogConsumer::new(
            self.changelog.clone(),
            tx,
            self.config.poll_interval,
            self.config.batch_size,
        );
        let distributor = Distributor::new(self.registry.clone(), rx, self.config.write_timeout);

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(consumer.run(self.shutdown.subscribe())));
        tasks.push(tokio::spawn(distributor.run()));
        drop(tasks);

        *self.state.lock() = ProcessingState::Streaming;
        info!("CDC Engine started successfully");
        Ok(())
    }

    /// 새로 만든 테이블 하나에만 트리거 설치
    pub fn on_table_created(&self, table: &str) -> Result<()> {
        self.installer.install_table(table)
    }

    /// 테이블 생성 후 바로 변경 포착 시작
    pub fn create_collection(&self, name: &str, columns: &[String]) -> Result<()> {
        self.collections.create_table(name, columns)?;
        self.on_table_created(name)
    }

    /// 업그레이드된 웹소켓 연결 처리
    pub async fn handle_socket(&self, socket: WebSocket, peer: String) {
        let (sink, stream) = socket.split();
        self.handle_subscriber(peer, sink, stream).await;
    }

    /// 구독자 연결 수명 주기: 인사 → 등록 → 읽기 루프 → 해제
    ///
    /// 읽기 루프는 생존 확인용이다. 받은 메시지는 로그만 남기고 버린다.
    pub async fn handle_subscriber<S, R>(&self, peer: String, sink: S, mut stream: R)
    where
        S: Sink<Message, Error = axum::Error> + Send + 'static,
        R: Stream<Item = std::result::Result<Message, axum::Error>> + Unpin,
    {
        info!("New connection from {}", peer);
        let subscriber = Arc::new(Subscriber::new(peer.clone(), sink));

        let greeting = match Greeting::default().to_message() {
            Ok(g) => g,
            Err(e) => {
                warn!("Failed to encode greeting: {}", e);
                return;
            }
        };
        if let Err(e) = subscriber
            .send_text_within(greeting, self.config.write_timeout)
            .await
        {
            warn!("Error sending welcome message: {}", e);
            return;
        }

        self.registry.register(subscriber.clone());

        while let Some(msg) = stream.next().await {
            match msg {
                Ok(Message::Close(_)) => break,
                Ok(Message::Text(text)) => debug!("Received message from {}: {}", peer, text),
                Ok(_) => {}
                Err(e) => {
                    debug!("Error reading from {}: {}", peer, e);
                    break;
                }
            }
        }

        self.registry.unregister(&subscriber.id());
        info!("Connection from {} closed", peer);
    }

    /// 태스크 종료 대기
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping CDC Engine");
        self.shutdown.send_replace(true);

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }

        *self.state.lock() = ProcessingState::Stopped;
        info!("CDC Engine stopped");
        Ok(())
    }

    pub fn get_state(&self) -> ProcessingState {
        *self.state.lock()
    }

    pub fn config(&self) -> &CdcConfig {
        &self.config
    }

    pub fn database(&self) -> &SqliteConnection {
        &self.db
    }

    pub fn changelog(&self) -> &ChangeLog {
        &self.changelog
    }

    pub fn collections(&self) -> &Collections {
        &self.collections
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::future::Future;

    pub(crate) fn test_config() -> CdcConfig {
        CdcConfig {
            connection: ConnectionConfig::in_memory(),
            poll_interval: Duration::from_millis(20),
            ..Default::default()
        }
    }

    /// 조건이 참이 될 때까지 최대 2초 대기
    pub(crate) async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !check().await {
            assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
