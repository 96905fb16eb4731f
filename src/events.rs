//! 변경 이벤트 타입 및 데이터 구조 정의

use crate::error::{CdcError, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 구독자 접속 직후 한 번 보내는 인사 메시지
pub const GREETING_MESSAGE: &str = "Welcome to ThunderBase!";

/// 변경 연산 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    /// 트리거 설치 순서
    pub const ALL: [OperationType; 3] = [
        OperationType::Insert,
        OperationType::Update,
        OperationType::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "INSERT",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }

    /// 트리거 본문에서 참조할 행 (DELETE는 변경 전, 나머지는 변경 후)
    pub fn row_reference(&self) -> &'static str {
        match self {
            OperationType::Delete => "OLD",
            OperationType::Insert | OperationType::Update => "NEW",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INSERT" => Ok(OperationType::Insert),
            "UPDATE" => Ok(OperationType::Update),
            "DELETE" => Ok(OperationType::Delete),
            other => Err(CdcError::InvalidRequest(format!(
                "unknown operation type: {}",
                other
            ))),
        }
    }
}

/// 변경 로그 테이블의 한 행
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLogRow {
    /// 단조 증가 ID (순서 키)
    pub id: i64,
    /// 원본 테이블명
    pub collection: String,
    /// 연산 타입
    pub event: OperationType,
    /// 트리거가 기록한 행 데이터
    pub data: serde_json::Value,
    /// 기록 시각 (SQLite CURRENT_TIMESTAMP, UTC)
    pub created_at: Option<DateTime<Utc>>,
}

impl ChangeLogRow {
    /// SQLite `CURRENT_TIMESTAMP` 문자열 파싱
    pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// 구독자에게 전달되는 변경 이벤트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// 테이블명
    pub collection: String,
    /// 연산 타입 ("INSERT" | "UPDATE" | "DELETE")
    pub event: OperationType,
    /// 행 데이터 (최소 `{"id": ...}`)
    pub data: serde_json::Value,
}

impl ChangeEvent {
    pub fn to_message(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl From<ChangeLogRow> for ChangeEvent {
    fn from(row: ChangeLogRow) -> Self {
        ChangeEvent {
            collection: row.collection,
            event: row.event,
            data: row.data,
        }
    }
}

/// 접속 인사 메시지
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Greeting {
    pub message: String,
}

impl Default for Greeting {
    fn default() -> Self {
        Greeting {
            message: GREETING_MESSAGE.to_string(),
        }
    }
}

impl Greeting {
    pub fn to_message(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
