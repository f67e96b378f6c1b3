//! Collaborator interfaces consumed by the compiler.
//!
//! The indicator-expression language itself (`V{...}`, `#{stage.element}`,
//! `d2:` functions) is compiled by the host system; this crate only sees the
//! resulting raw SQL with embedded placeholders. These traits are the seam.

use chrono::NaiveDate;

use crate::model::{DataElement, ProgramIndicator};

/// Whether an expression is compiled for a numeric or boolean position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Numeric,
    Boolean,
}

/// Compiles raw indicator expression/filter text into SQL with embedded
/// placeholders (see [`crate::compiler::placeholder`]).
pub trait ExpressionCompiler {
    /// Returns `None` when the text cannot be compiled; the caller then falls
    /// back to using the text unchanged.
    fn analytics_sql(
        &self,
        text: &str,
        kind: ValueKind,
        indicator: &ProgramIndicator,
        window_start: NaiveDate,
        window_end: NaiveDate,
        driver_alias: &str,
    ) -> Option<String>;
}

/// Data-element metadata lookup.
///
/// Only used for diagnostics while resolving program-stage-data-element
/// placeholders; CTE bodies are generated from the placeholder alone.
pub trait DataElementStore {
    fn data_element(&self, uid: &str) -> Option<DataElement>;
}
