//! Content-addressed CTE cache keys.
//!
//! Every distinct referenced value gets a deterministic key; the registry
//! dedups on it. Key formats are compatibility-sensitive: hosts may cache
//! generated SQL keyed by these strings, so the exact layout (including the
//! SHA-1 digest used for d2-function argument identity) must stay stable.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use sha1::{Digest, Sha1};

/// Lowercase SHA-1 hex digest of `input`.
pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Key for a program-variable CTE.
///
/// The program-stage UID is deliberately not part of the key: variables are
/// enrollment/event scoped, so two stages referencing the same variable
/// collapse to one CTE.
pub fn variable_cte_key(column: &str, indicator_uid: &str, offset: i32) -> String {
    format!(
        "varcte_{}_{}_{}",
        normalize_column_token(column),
        indicator_uid,
        offset
    )
}

/// Key for a program-stage-data-element CTE. UIDs are case-sensitive:
/// differently-cased UIDs address different CTEs.
pub fn psde_cte_key(
    program_stage_uid: &str,
    data_element_uid: &str,
    offset: i32,
    boundary_hash: &str,
    indicator_uid: &str,
) -> String {
    format!(
        "psdecte_{}_{}_{}_{}_{}",
        program_stage_uid, data_element_uid, offset, boundary_hash, indicator_uid
    )
}

/// Key for a d2-function CTE. Argument identity is the SHA-1 of the decoded
/// argument SQL, so textually different but byte-identical arguments collapse.
pub fn d2_function_cte_key(
    function: &str,
    program_stage_uid: &str,
    data_element_uid: &str,
    argument_sql: &str,
    boundary_hash: &str,
    indicator_uid: &str,
) -> String {
    format!(
        "d2{}_{}_{}_{}_{}_{}",
        function.to_lowercase(),
        program_stage_uid,
        data_element_uid,
        sha1_hex(argument_sql),
        boundary_hash,
        indicator_uid
    )
}

/// Key for a filter CTE, derived from a simple `"column" op literal` filter.
pub fn filter_cte_key(column: &str, operator: &str, literal: &str, indicator_uid: &str) -> String {
    format!(
        "filtercte_{}_{}_{}_{}",
        normalize_column_token(column),
        operator_token(operator),
        normalize_value_token(literal),
        indicator_uid
    )
}

static OPERATOR_TOKENS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("=", "eq"),
        ("==", "eqeq"),
        ("!=", "neq"),
        ("<>", "noteq"),
        ("<", "lt"),
        ("<=", "le"),
        (">", "gt"),
        (">=", "ge"),
    ])
});

/// Token for a comparison operator in a filter key.
pub fn operator_token(operator: &str) -> String {
    match OPERATOR_TOKENS.get(operator) {
        Some(token) => (*token).to_string(),
        None => normalize_value_token(operator),
    }
}

/// Normalize a column name into key material: quotes and underscores
/// stripped, lowercased.
pub fn normalize_column_token(column: &str) -> String {
    column
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Normalize a literal into key material: surrounding quotes stripped,
/// lowercased, every other non-alphanumeric mapped to `_`.
pub fn normalize_value_token(literal: &str) -> String {
    literal
        .trim_matches('\'')
        .trim_matches('"')
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}
