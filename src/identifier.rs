//! SQL 식별자 검증
//!
//! 트리거 본문은 파라미터 바인딩이 불가능하므로 테이블/컬럼명을 직접 보간한다.
//! 보간 전에 `^[A-Za-z_][A-Za-z0-9_]*$` 문자셋만 허용하고, 생성 SQL에서는 큰따옴표로 감싼다.

use crate::error::{CdcError, Result};
use regex::Regex;
use std::sync::OnceLock;

/// 식별자 최대 길이
pub const MAX_IDENTIFIER_LEN: usize = 64;

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// 컴파일된 식별자 정규식. 컴파일 실패는 `SchemaError`로 전파된다.
fn identifier_pattern() -> Result<&'static Regex> {
    static PATTERN: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(IDENTIFIER_PATTERN))
        .as_ref()
        .map_err(|e| CdcError::SchemaError(format!("invalid identifier pattern: {}", e)))
}

/// 식별자 검증
pub fn validate(name: &str) -> Result<&str> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(CdcError::InvalidIdentifier(format!(
            "identifier length must be 1..={}: {:?}",
            MAX_IDENTIFIER_LEN, name
        )));
    }

    if !identifier_pattern()?.is_match(name) {
        return Err(CdcError::InvalidIdentifier(format!("{:?}", name)));
    }

    Ok(name)
}

/// 검증 후 큰따옴표로 감싼 식별자 반환
pub fn quote(name: &str) -> Result<String> {
    validate(name).map(|n| format!("\"{}\"", n))
}
