//! Programs, program indicators and data elements.

use serde::{Deserialize, Serialize};

use super::AnalyticsPeriodBoundary;

/// A tracker program. Only the UID matters to the compiler: it determines
/// which analytics tables the generated CTEs read from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    pub uid: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl Program {
    pub fn new(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            name: None,
        }
    }

    /// Name of the per-program event analytics table.
    pub fn event_analytics_table(&self) -> String {
        format!("analytics_event_{}", self.uid.to_lowercase())
    }

    /// Name of the per-program enrollment analytics table.
    pub fn enrollment_analytics_table(&self) -> String {
        format!("analytics_enrollment_{}", self.uid.to_lowercase())
    }
}

/// How per-enrollment values aggregate in the main indicator CTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregationType {
    #[default]
    Average,
    Sum,
    Count,
    Min,
    Max,
    Stddev,
    Variance,
}

impl AggregationType {
    /// The SQL aggregate function name.
    pub fn sql_name(&self) -> &'static str {
        match self {
            AggregationType::Average => "avg",
            AggregationType::Sum => "sum",
            AggregationType::Count => "count",
            AggregationType::Min => "min",
            AggregationType::Max => "max",
            AggregationType::Stddev => "stddev",
            AggregationType::Variance => "variance",
        }
    }
}

/// A program indicator: an expression (and optional filter) evaluated per
/// enrollment, aggregated across the reporting window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramIndicator {
    pub uid: String,
    /// The owning program. Placeholders cannot be resolved without it.
    #[serde(default)]
    pub program: Option<Program>,
    pub expression: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub aggregation_type: Option<AggregationType>,
    #[serde(default)]
    pub boundaries: Vec<AnalyticsPeriodBoundary>,
}

impl ProgramIndicator {
    pub fn new(uid: impl Into<String>, program: Program) -> Self {
        Self {
            uid: uid.into(),
            program: Some(program),
            expression: String::new(),
            filter: None,
            aggregation_type: None,
            boundaries: Vec::new(),
        }
    }

    /// The aggregation to apply in the main CTE; defaults to `avg`.
    pub fn aggregation(&self) -> AggregationType {
        self.aggregation_type.unwrap_or_default()
    }
}

/// Value types a data element can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueType {
    Number,
    Integer,
    Text,
    Date,
    Boolean,
}

/// A data element referenced from a program stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataElement {
    pub uid: String,
    #[serde(default)]
    pub name: Option<String>,
    pub value_type: ValueType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analytics_table_names_are_lowercased() {
        let program = Program::new("ProgramUid1");
        assert_eq!(
            program.event_analytics_table(),
            "analytics_event_programuid1"
        );
        assert_eq!(
            program.enrollment_analytics_table(),
            "analytics_enrollment_programuid1"
        );
    }

    #[test]
    fn test_aggregation_defaults_to_avg() {
        let pi = ProgramIndicator::new("pi1", Program::new("p1"));
        assert_eq!(pi.aggregation().sql_name(), "avg");
    }

    #[test]
    fn test_aggregation_sql_names() {
        assert_eq!(AggregationType::Sum.sql_name(), "sum");
        assert_eq!(AggregationType::Stddev.sql_name(), "stddev");
    }
}
