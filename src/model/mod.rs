//! Input data model for indicator compilation.
//!
//! These types describe what the host system hands the compiler: a program
//! indicator (expression, optional filter, aggregation, period boundaries)
//! and the metadata it references. They are read-only inputs; the compiler
//! never mutates or persists them.

mod boundary;
mod indicator;

pub use boundary::{
    AnalyticsPeriodBoundary, BoundaryTarget, BoundaryType, PeriodOffset, PeriodType,
};
pub use indicator::{AggregationType, DataElement, Program, ProgramIndicator, ValueType};
