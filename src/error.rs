//! CDC 관련 에러 타입

use thiserror::Error;
use std::io;

#[derive(Error, Debug)]
pub enum CdcError {
    #[error("SQLite 연결 에러: {0}")]
    ConnectionError(String),

    #[error("초기화 실패: {0}")]
    InitializationError(String),

    #[error("쿼리 실행 에러: {0}")]
    QueryError(String),

    #[error("스키마 조회 에러: {0}")]
    SchemaError(String),

    #[error("유효하지 않은 식별자: {0}")]
    InvalidIdentifier(String),

    #[error("트리거 설치 실패 ({table} {event}): {reason}")]
    TriggerInstallError {
        table: String,
        event: String,
        reason: String,
    },

    #[error("이벤트 전달 실패: {0}")]
    DeliveryError(String),

    #[error("찾을 수 없음: {0}")]
    NotFound(String),

    #[error("잘못된 요청: {0}")]
    InvalidRequest(String),

    #[error("I/O 에러: {0}")]
    IoError(String),

    #[error("직렬화 에러: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Timeout 에러")]
    Timeout,

    #[error("채널이 닫혔습니다")]
    ChannelClosed,
}

impl From<io::Error> for CdcError {
    fn from(err: io::Error) -> Self {
        CdcError::IoError(err.to_string())
    }
}

impl From<rusqlite::Error> for CdcError {
    fn from(err: rusqlite::Error) -> Self {
        CdcError::QueryError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CdcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_install_error_message() {
        let err = CdcError::TriggerInstallError {
            table: "users".to_string(),
            event: "INSERT".to_string(),
            reason: "syntax error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("INSERT"));
        assert!(msg.contains("syntax error"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let err: CdcError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, CdcError::QueryError(_)));
    }
}
