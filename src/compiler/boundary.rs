//! Compiles period boundaries into SQL predicate fragments.
//!
//! Each supported boundary becomes one `"column" >= 'date'` or
//! `"column" < 'date'` fragment relative to the reporting window; fragments
//! are AND-joined into CTE bodies by the resolvers. Unsupported boundary
//! types and custom targets produce no fragment and no error.

use chrono::{Days, NaiveDate};

use crate::model::{AnalyticsPeriodBoundary, BoundaryTarget, BoundaryType};
use crate::sql::SqlDialect;

use super::keys;

/// Date literal format used in generated predicates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Column names for the fixed boundary targets.
const ENROLLMENT_DATE_COLUMN: &str = "enrollmentdate";
const INCIDENT_DATE_COLUMN: &str = "incidentdate";
const SCHEDULED_DATE_COLUMN: &str = "scheduleddate";

/// Compile a boundary set into predicate fragments, in input order.
///
/// `event_date_column` is the column an `EventDate` target resolves to
/// (callers pass the event-date column of the driving value, normally
/// `occurreddate`).
pub fn compile_boundaries(
    boundaries: &[AnalyticsPeriodBoundary],
    event_date_column: &str,
    window_start: NaiveDate,
    window_end: NaiveDate,
    dialect: &dyn SqlDialect,
) -> Vec<String> {
    boundaries
        .iter()
        .filter_map(|b| boundary_condition(b, event_date_column, window_start, window_end, dialect))
        .collect()
}

fn boundary_condition(
    boundary: &AnalyticsPeriodBoundary,
    event_date_column: &str,
    window_start: NaiveDate,
    window_end: NaiveDate,
    dialect: &dyn SqlDialect,
) -> Option<String> {
    let column = match &boundary.target {
        BoundaryTarget::EventDate => event_date_column,
        BoundaryTarget::EnrollmentDate => ENROLLMENT_DATE_COLUMN,
        BoundaryTarget::IncidentDate => INCIDENT_DATE_COLUMN,
        BoundaryTarget::ScheduledDate => SCHEDULED_DATE_COLUMN,
        // Custom targets such as `#{stage.dataElement}` are not resolved here.
        BoundaryTarget::Custom(_) => return None,
    };

    let (reference, operator) = match boundary.boundary_type {
        BoundaryType::AfterStartOfReportingPeriod => (window_start, ">="),
        // End-exclusive: the window end itself still counts.
        BoundaryType::BeforeEndOfReportingPeriod => {
            (window_end.checked_add_days(Days::new(1))?, "<")
        }
        _ => return None,
    };

    let reference = match &boundary.offset {
        Some(offset) => offset.apply(reference)?,
        None => reference,
    };

    Some(format!(
        "{} {} '{}'",
        dialect.quote_identifier(column),
        operator,
        reference.format(DATE_FORMAT)
    ))
}

/// Hash of a boundary set, used as placeholder key material. An empty set
/// hashes to the literal `noboundaries` token.
pub fn boundary_hash(boundaries: &[AnalyticsPeriodBoundary]) -> String {
    if boundaries.is_empty() {
        return "noboundaries".to_string();
    }
    let canonical = boundaries
        .iter()
        .map(canonical_token)
        .collect::<Vec<_>>()
        .join(";");
    keys::sha1_hex(&canonical)
}

fn canonical_token(boundary: &AnalyticsPeriodBoundary) -> String {
    let offset = match &boundary.offset {
        Some(o) => format!("{:?}:{}", o.period_type, o.periods),
        None => "none".to_string(),
    };
    format!("{:?}|{:?}|{}", boundary.boundary_type, boundary.target, offset)
}
