//! Filter shape analysis.
//!
//! After placeholder resolution, an indicator filter takes one of two shapes:
//!
//! - *simple*: exactly one `"column" op literal` comparison over a driver
//!   column. Compiled into a dedicated filter CTE and INNER-joined, so the
//!   main CTE only aggregates enrollments that pass.
//! - *complex*: anything else (notably comparisons over value-CTE aliases).
//!   Kept verbatim as a `where` clause over the LEFT-joined value CTEs.
//!
//! The decision runs on the resolved filter text, never the raw expression.

use std::fmt::Write as _;

use crate::sql::SqlDialect;

use super::EVENT_DATE_COLUMN;

/// A filter reduced to a single `"column" op literal` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleFilter {
    /// Unquoted column name.
    pub column: String,
    pub operator: String,
    /// The literal exactly as written, quotes included.
    pub literal: String,
}

/// Comparison operators, longest first so two-char operators win over their
/// one-char prefixes.
const OPERATORS: [&str; 8] = ["==", "!=", "<>", "<=", ">=", "=", "<", ">"];

/// Parse `resolved` as a simple filter. Returns `None` for anything that is
/// not exactly one quoted-column comparison against a literal - such filters
/// are complex and stay inline.
pub fn parse_simple_filter(resolved: &str) -> Option<SimpleFilter> {
    let text = resolved.trim();
    let rest = text.strip_prefix('"')?;
    let close = rest.find('"')?;
    let column = &rest[..close];
    if column.is_empty() || !column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return None;
    }
    let rest = rest[close + 1..].trim_start();
    let operator = OPERATORS.iter().find(|op| rest.starts_with(**op))?;
    let literal = parse_literal(rest[operator.len()..].trim_start())?;
    Some(SimpleFilter {
        column: column.to_string(),
        operator: (*operator).to_string(),
        literal,
    })
}

/// A single-quoted string or a bare numeric literal consuming the whole
/// remaining text.
fn parse_literal(rest: &str) -> Option<String> {
    if let Some(inner) = rest.strip_prefix('\'') {
        let close = inner.find('\'')?;
        if !inner[close + 1..].trim().is_empty() {
            return None;
        }
        return Some(format!("'{}'", &inner[..close]));
    }
    if !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-')
        && rest.parse::<f64>().is_ok()
    {
        return Some(rest.to_string());
    }
    None
}

/// Build the body of a filter CTE: enrollments whose latest value of the
/// column passes the comparison.
pub fn filter_cte_sql(
    filter: &SimpleFilter,
    event_table: &str,
    boundary_fragments: &[String],
    driver_column: &str,
    dialect: &dyn SqlDialect,
) -> String {
    let column = dialect.quote_identifier(&filter.column);
    let mut inner_where = format!("{column} is not null");
    for fragment in boundary_fragments {
        let _ = write!(inner_where, " and {fragment}");
    }
    format!(
        "select {driver} from ( select {driver}, {column}, \
         row_number() over (partition by {driver} order by {order} desc) as rn \
         from {table} where {inner_where} ) latest where rn = 1 and {column} {op} {literal}",
        driver = driver_column,
        column = column,
        order = EVENT_DATE_COLUMN,
        table = event_table,
        inner_where = inner_where,
        op = filter.operator,
        literal = filter.literal,
    )
}
