//! 트리거 설치기
//!
//! 추적 대상 테이블마다 INSERT/UPDATE/DELETE 트리거 세 개를 만든다. 각 트리거는
//! 변경된 행을 `json_object(...)`로 직렬화해 변경 로그에 한 행을 추가한다.
//! 연산 타입 문자열은 트리거 정의 시점에 리터럴로 박아 넣는다.

use crate::changelog::CHANGES_TABLE;
use crate::connection::{ColumnInfo, SqliteConnection};
use crate::error::{CdcError, Result};
use crate::events::OperationType;
use crate::identifier;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::{debug, info};

/// 트리거가 기록하는 페이로드 형태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadMode {
    /// `id`와 기본키 컬럼만 (`{"id": rowid}` 또는 `{"id": rowid, "<key>": ...}`)
    #[default]
    RowId,
    /// 모든 컬럼 스냅샷
    FullRow,
}

impl FromStr for PayloadMode {
    type Err = CdcError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "row_id" => Ok(PayloadMode::RowId),
            "full_row" => Ok(PayloadMode::FullRow),
            other => Err(CdcError::InvalidRequest(format!(
                "unknown payload mode: {}",
                other
            ))),
        }
    }
}

/// 트리거명 (`<table>_<event>_trigger`)
pub fn trigger_name(table: &str, op: OperationType) -> String {
    format!("{}_{}_trigger", table, op.as_str().to_lowercase())
}

/// 모든 페이로드에 들어가는 행 식별자 필드
pub const ID_FIELD: &str = "id";

/// `json_object(...)` 인자 목록 생성
///
/// 페이로드에는 항상 `id`가 있다. 선택된 컬럼에 `id`가 없으면 rowid를, rowid가 없는
/// 테이블이면 첫 번째 기본키 컬럼 값을 `id`로 앞에 붙인다.
fn build_payload_expression(
    columns: &[ColumnInfo],
    has_rowid: bool,
    op: OperationType,
    mode: PayloadMode,
) -> Result<String> {
    let row = op.row_reference();

    let mut keys: Vec<&ColumnInfo> = columns.iter().filter(|c| c.is_key()).collect();
    keys.sort_by_key(|c| c.primary_key);

    let selected: Vec<&ColumnInfo> = match mode {
        PayloadMode::FullRow => columns.iter().collect(),
        PayloadMode::RowId => keys.clone(),
    };

    let mut pairs = Vec::with_capacity(selected.len() + 1);
    if !selected.iter().any(|c| c.name == ID_FIELD) {
        let id = if has_rowid {
            format!("{}.rowid", row)
        } else {
            let key = keys.first().ok_or_else(|| {
                CdcError::SchemaError("table has neither rowid nor primary key".to_string())
            })?;
            format!("{}.\"{}\"", row, identifier::validate(&key.name)?)
        };
        pairs.push(format!("'{}', {}", ID_FIELD, id));
    }

    for c in selected {
        let name = identifier::validate(&c.name)?;
        pairs.push(format!("'{}', {}.\"{}\"", name, row, name));
    }

    Ok(pairs.join(", "))
}

/// 테이블/연산 하나에 대한 `CREATE TRIGGER` 문 생성
///
/// `has_rowid`는 `WITHOUT ROWID` 테이블이면 false.
pub fn build_trigger_sql(
    table: &str,
    columns: &[ColumnInfo],
    has_rowid: bool,
    op: OperationType,
    mode: PayloadMode,
) -> Result<String> {
    let table = identifier::validate(table)?;
    let payload = build_payload_expression(columns, has_rowid, op, mode)?;

    Ok(format!(
        "CREATE TRIGGER IF NOT EXISTS \"{trigger}\"
        AFTER {event} ON \"{table}\"
        BEGIN
            INSERT INTO {changes} (collection, event, data)
            VALUES ('{table}', '{event}', json_object({payload}));
        END;",
        trigger = trigger_name(table, op),
        event = op.as_str(),
        table = table,
        changes = CHANGES_TABLE,
        payload = payload,
    ))
}

/// 트리거 설치기
#[derive(Clone)]
pub struct TriggerInstaller {
    db: SqliteConnection,
    mode: PayloadMode,
}

impl TriggerInstaller {
    pub fn new(db: SqliteConnection, mode: PayloadMode) -> Self {
        TriggerInstaller { db, mode }
    }

    pub fn mode(&self) -> PayloadMode {
        self.mode
    }

    /// 한 테이블에 세 트리거 설치 (여러 번 호출해도 안전)
    pub fn install(&self, table: &str, columns: &[ColumnInfo]) -> Result<()> {
        let has_rowid = self.db.has_rowid(table).map_err(|e| CdcError::TriggerInstallError {
            table: table.to_string(),
            event: OperationType::Insert.as_str().to_string(),
            reason: e.to_string(),
        })?;

        for op in OperationType::ALL {
            let wrap = |reason: String| CdcError::TriggerInstallError {
                table: table.to_string(),
                event: op.as_str().to_string(),
                reason,
            };

            let sql = build_trigger_sql(table, columns, has_rowid, op, self.mode).map_err(|e| wrap(e.to_string()))?;
            self.db.execute_batch(&sql).map_err(|e| wrap(e.to_string()))?;

            debug!("Ensured trigger {}", trigger_name(table, op));
        }
        Ok(())
    }

    /// 카탈로그에서 컬럼을 읽어 한 테이블에 설치
    pub fn install_table(&self, table: &str) -> Result<()> {
        let columns = self.db.get_table_schema(table)?;
        self.install(table, &columns)?;
        info!("Capturing changes on {}", table);
        Ok(())
    }

    /// 모든 추적 대상 테이블에 설치. 한 테이블이라도 실패하면 나머지는 건너뛴다.
    pub fn install_all(&self) -> Result<Vec<String>> {
        let tables = self.db.get_tables()?;
        info!("Creating triggers for tables: {:?}", tables);

        for table in &tables {
            self.install_table(table)?;
        }

        Ok(tables)
    }
}
