//! # Heron
//!
//! Compiles tracker indicator expressions into deduplicated CTE-backed
//! analytics SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Indicator (expression, filter, boundaries)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [host expression compiler]
//! ┌─────────────────────────────────────────────────────────┐
//! │             Raw SQL with embedded placeholders           │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [placeholder resolvers]
//! ┌─────────────────────────────────────────────────────────┐
//! │     CteContext (deduplicated, ranked value CTEs)         │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [assembler]
//! ┌─────────────────────────────────────────────────────────┐
//! │   Main aggregate CTE (joins, filter shape, aggregation)  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Each distinct referenced value is computed exactly once as a row-numbered
//! CTE and joined back to the enrollment driver table, instead of one
//! correlated subquery per reference. The populated [`compiler::CteContext`]
//! is handed to the outer analytics query builder, which prepends the CTEs
//! with `WITH` and attaches the joins.

pub mod compiler;
pub mod external;
pub mod model;
pub mod sql;

// Re-export SQL submodules at crate level for convenience
pub use sql::dialect;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::compiler::{
        CteContext, CteDefinition, CteError, CteKind, Endpoint, PlaceholderResolver,
        SubqueryBuilder, DRIVER_ALIAS,
    };
    pub use crate::external::{DataElementStore, ExpressionCompiler, ValueKind};
    pub use crate::model::{
        AggregationType, AnalyticsPeriodBoundary, BoundaryTarget, BoundaryType, DataElement,
        PeriodOffset, PeriodType, Program, ProgramIndicator, ValueType,
    };
    pub use crate::sql::{Dialect, SqlDialect};
}

pub use compiler::{CteContext, CteDefinition, CteError, SubqueryBuilder};
pub use sql::Dialect;
