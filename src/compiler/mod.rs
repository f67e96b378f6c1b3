//! The CTE compiler core.
//!
//! Compiles a program indicator into a set of deduplicated common table
//! expressions: one ranked value CTE per distinct referenced value, an
//! optional filter CTE, and a main aggregate CTE joining them back to the
//! enrollment driver table. This replaces the naive one-correlated-subquery-
//! per-reference design with a single scan per distinct value.
//!
//! - [`boundary`] - period boundaries to SQL predicate fragments
//! - [`placeholder`] - the three placeholder grammars
//! - [`keys`] - content-addressed cache keys
//! - [`context`] - the per-compilation CTE registry
//! - [`resolve`] - placeholder resolvers
//! - [`filter`] - simple/complex filter shape analysis
//! - [`assembler`] - the per-indicator orchestrator

pub mod assembler;
pub mod boundary;
pub mod context;
pub mod filter;
pub mod keys;
pub mod placeholder;
pub mod resolve;

pub use assembler::{SubqueryBuilder, DRIVER_ALIAS};
pub use context::{CteContext, CteDefinition, CteKind, Endpoint};
pub use resolve::PlaceholderResolver;

/// The event-date column of event analytics tables; the default ordering
/// column for ranked value CTEs and the column `EventDate` boundaries
/// constrain.
pub const EVENT_DATE_COLUMN: &str = "occurreddate";

/// Compilation errors. Everything except a missing owning program degrades
/// to pass-through rather than failing.
#[derive(Debug, thiserror::Error)]
pub enum CteError {
    #[error("program indicator '{0}' is not associated with a program")]
    MissingProgram(String),
}
