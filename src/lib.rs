//! ThunderBase: SQLite 변경 데이터 캡처(CDC) 및 실시간 팬아웃
//!
//! 추적 테이블의 INSERT/UPDATE/DELETE를 트리거로 변경 로그 테이블에 기록하고,
//! 주기적으로 로그를 읽어 웹소켓 구독자 전원에게 전달합니다.
//! 주요 기능:
//! - 카탈로그 기반 트리거 자동 설치
//! - 순서 보장 폴링 컨슈머 (전달 후 삭제)
//! - 구독자 레지스트리와 팬아웃

pub mod cdc_engine;
pub mod changelog;
pub mod collections;
pub mod connection;
pub mod consumer;
pub mod distributor;
pub mod error;
pub mod events;
pub mod identifier;
pub mod registry;
pub mod server;
pub mod trigger;

pub use cdc_engine::{CdcConfig, CdcEngine};
pub use connection::SqliteConnection;
pub use error::{CdcError, Result};
pub use events::{ChangeEvent, OperationType};
pub use registry::SubscriberRegistry;
pub use trigger::PayloadMode;
