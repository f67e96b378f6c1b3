//! MySQL SQL dialect.
//!
//! MySQL quotes identifiers with backticks; `"` delimits strings unless
//! ANSI_QUOTES mode is enabled, so backticks are the safe default.

use super::helpers;
use super::SqlDialect;

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }
}
