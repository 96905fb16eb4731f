//! 변경 로그 테이블 (append-only 메일박스)
//!
//! 트리거가 변경마다 한 행을 추가하고, 로그 컨슈머가 id 오름차순으로 읽은 뒤
//! 전달이 끝난 행을 삭제한다. 행은 추가 이후 수정되지 않는다.

use crate::connection::SqliteConnection;
use crate::error::{CdcError, Result};
use crate::events::{ChangeLogRow, OperationType};
use rusqlite::params_from_iter;
use rusqlite::types::Value as SqlValue;
use serde_json::Value;
use tracing::{debug, warn};

/// 변경 로그 테이블명
pub const CHANGES_TABLE: &str = "_changes";

/// 한 번의 스캔 결과
#[derive(Debug, Default)]
pub struct LogBatch {
    /// 전달할 행 (id 오름차순)
    pub rows: Vec<ChangeLogRow>,
    /// 연산 타입을 해석할 수 없어 전달 없이 삭제할 행 id
    pub discarded: Vec<i64>,
}

impl LogBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.discarded.is_empty()
    }

    /// 이번 배치에서 삭제할 모든 id
    pub fn ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.rows.iter().map(|r| r.id).collect();
        ids.extend_from_slice(&self.discarded);
        ids
    }
}

/// 변경 로그 테이블 접근자
#[derive(Clone)]
pub struct ChangeLog {
    db: SqliteConnection,
}

impl ChangeLog {
    pub fn new(db: SqliteConnection) -> Self {
        ChangeLog { db }
    }

    /// 변경 로그 테이블 생성 (이미 있으면 유지)
    pub fn ensure_table(&self) -> Result<()> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                event TEXT NOT NULL,
                data JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            CHANGES_TABLE
        );

        self.db.execute_batch(&sql).map_err(|e| {
            CdcError::InitializationError(format!("Failed to create {} table: {}", CHANGES_TABLE, e))
        })
    }

    /// 가장 오래된 행부터 최대 `limit`개 읽기
    pub fn fetch_batch(&self, limit: usize) -> Result<LogBatch> {
        let conn = self.db.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT id, collection, event, data, created_at FROM {} ORDER BY id ASC LIMIT ?1",
            CHANGES_TABLE
        ))?;

        let raw_rows = stmt
            .query_map([limit as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, SqlValue>(3)?,
                    row.get::<_, SqlValue>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut batch = LogBatch::default();
        for (id, collection, event, data, created_at) in raw_rows {
            let event = match event.parse::<OperationType>() {
                Ok(op) => op,
                Err(e) => {
                    warn!("Discarding change {} from {}: {}", id, collection, e);
                    batch.discarded.push(id);
                    continue;
                }
            };

            let data = payload_to_json(id, data);
            let created_at = match created_at {
                SqlValue::Text(t) => ChangeLogRow::parse_timestamp(&t),
                _ => None,
            };

            batch.rows.push(ChangeLogRow {
                id,
                collection,
                event,
                data,
                created_at,
            });
        }

        debug!(
            "Fetched {} changes ({} discarded)",
            batch.rows.len(),
            batch.discarded.len()
        );
        Ok(batch)
    }

    /// 주어진 id의 행을 한 문장으로 삭제
    pub fn delete(&self, ids: &[i64]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "DELETE FROM {} WHERE id IN ({})",
            CHANGES_TABLE,
            placeholders(ids.len())
        );
        let deleted = self.db.lock().execute(&sql, params_from_iter(ids.iter()))?;
        Ok(deleted)
    }

    /// 남아 있는 행 수
    pub fn len(&self) -> Result<usize> {
        let count: i64 = self.db.lock().query_row(
            &format!("SELECT COUNT(*) FROM {}", CHANGES_TABLE),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// `data` 컬럼 값을 JSON으로 변환
///
/// 컬럼이 NUMERIC 친화성이라 `'42'` 같은 값은 INTEGER로 저장된다. 저장 클래스와
/// 관계없이 변환은 실패하지 않으며, JSON이 아닌 텍스트는 문자열로 전달한다.
fn payload_to_json(id: i64, data: SqlValue) -> Value {
    match data {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::from(n),
        SqlValue::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(text) => text_to_json(id, text),
        SqlValue::Blob(bytes) => text_to_json(id, String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn text_to_json(id: i64, text: String) -> Value {
    serde_json::from_str(&text).unwrap_or_else(|e| {
        warn!("Change {} carries malformed JSON payload: {}", id, e);
        Value::String(text)
    })
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
