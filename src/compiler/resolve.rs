//! Placeholder resolvers.
//!
//! Each resolver scans raw SQL for one placeholder variant and, for every
//! distinct instance, either reuses the CTE already registered under the
//! instance's cache key or compiles and registers a new one, then rewrites
//! the SQL to reference the CTE's value through its alias.
//!
//! Contract shared by all three:
//!
//! - `None` in, `None` out, no side effects.
//! - Empty input or no placeholders of the variant: input returned unchanged.
//! - Malformed placeholders are left untouched (see
//!   [`super::placeholder`]).
//! - A missing owning program makes the whole input pass through unmodified,
//!   registering nothing.

use std::collections::HashMap;
use std::fmt::Write as _;

use chrono::NaiveDate;
use log::{debug, warn};

use crate::external::DataElementStore;
use crate::model::{Program, ProgramIndicator};
use crate::sql::SqlDialect;

use super::boundary::compile_boundaries;
use super::context::{CteContext, CteDefinition};
use super::placeholder::{
    scan_d2_function_placeholders, scan_psde_placeholders, scan_variable_placeholders,
    D2FunctionPlaceholder, PsdePlaceholder, VariablePlaceholder,
};
use super::EVENT_DATE_COLUMN;

/// Resolves placeholders against a [`CteContext`].
///
/// Optionally holds a data-element store, used only to flag references to
/// unknown data elements; resolution itself never depends on it.
pub struct PlaceholderResolver<'a> {
    data_elements: Option<&'a dyn DataElementStore>,
}

impl<'a> PlaceholderResolver<'a> {
    pub fn new() -> Self {
        Self {
            data_elements: None,
        }
    }

    pub fn with_data_elements(store: &'a dyn DataElementStore) -> Self {
        Self {
            data_elements: Some(store),
        }
    }

    /// Resolve `FUNC_CTE_VAR(...)` placeholders. Each distinct instance is
    /// replaced by `<alias>.value`.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_variables(
        &self,
        raw_sql: Option<&str>,
        indicator: &ProgramIndicator,
        window_start: NaiveDate,
        window_end: NaiveDate,
        context: &mut CteContext,
        alias_map: &mut HashMap<String, String>,
        dialect: &dyn SqlDialect,
    ) -> Option<String> {
        let raw = raw_sql?;
        let found = scan_variable_placeholders(raw);
        if found.is_empty() {
            return Some(raw.to_string());
        }
        let Some(program) = indicator.program.as_ref() else {
            debug!(
                "indicator {} has no program; leaving {} variable placeholder(s) unresolved",
                indicator.uid,
                found.len()
            );
            return Some(raw.to_string());
        };

        let mut resolved = raw.to_string();
        for (text, placeholder) in found {
            let key = placeholder.cte_key();
            let driver = context.driver_column();
            let definition = context.ensure(&key, || {
                debug!("registering variable CTE {key}");
                CteDefinition::variable(
                    &key,
                    variable_cte_sql(
                        &placeholder,
                        indicator,
                        program,
                        window_start,
                        window_end,
                        driver,
                        dialect,
                    ),
                    driver,
                )
            });
            let value = format!("{}.value", definition.alias());
            alias_map.insert(text.clone(), definition.alias().to_string());
            resolved = resolved.replace(&text, &value);
        }
        Some(resolved)
    }

    /// Resolve `__PSDE_CTE_PLACEHOLDER__(...)` placeholders. Each distinct
    /// instance is replaced by `coalesce(<alias>.value, 0)`.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_program_stage_elements(
        &self,
        raw_sql: Option<&str>,
        indicator: &ProgramIndicator,
        window_start: NaiveDate,
        window_end: NaiveDate,
        context: &mut CteContext,
        alias_map: &mut HashMap<String, String>,
        dialect: &dyn SqlDialect,
    ) -> Option<String> {
        let raw = raw_sql?;
        let found = scan_psde_placeholders(raw);
        if found.is_empty() {
            return Some(raw.to_string());
        }
        let Some(program) = indicator.program.as_ref() else {
            debug!(
                "indicator {} has no program; leaving {} stage-element placeholder(s) unresolved",
                indicator.uid,
                found.len()
            );
            return Some(raw.to_string());
        };

        let mut resolved = raw.to_string();
        for (text, placeholder) in found {
            if let Some(store) = self.data_elements {
                if store.data_element(&placeholder.data_element_uid).is_none() {
                    warn!(
                        "indicator {} references unknown data element {}",
                        indicator.uid, placeholder.data_element_uid
                    );
                }
            }
            let key = placeholder.cte_key();
            let driver = context.driver_column();
            let definition = context.ensure(&key, || {
                debug!("registering stage-element CTE {key}");
                let (rank, _) = placeholder.rank_and_direction();
                CteDefinition::program_stage_data_element(
                    &key,
                    psde_cte_sql(
                        &placeholder,
                        indicator,
                        program,
                        window_start,
                        window_end,
                        driver,
                        dialect,
                    ),
                    driver,
                    rank,
                )
            });
            let value = format!("coalesce({}.value, 0)", definition.alias());
            alias_map.insert(text.clone(), definition.alias().to_string());
            resolved = resolved.replace(&text, &value);
        }
        Some(resolved)
    }

    /// Resolve `__D2FUNC__(...)__` placeholders. Each distinct instance is
    /// replaced by `coalesce(<alias>.value, 0)`.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_d2_functions(
        &self,
        raw_sql: Option<&str>,
        indicator: &ProgramIndicator,
        _window_start: NaiveDate,
        _window_end: NaiveDate,
        context: &mut CteContext,
        alias_map: &mut HashMap<String, String>,
        dialect: &dyn SqlDialect,
    ) -> Option<String> {
        let raw = raw_sql?;
        let found = scan_d2_function_placeholders(raw);
        if found.is_empty() {
            return Some(raw.to_string());
        }
        let Some(program) = indicator.program.as_ref() else {
            debug!(
                "indicator {} has no program; leaving {} d2-function placeholder(s) unresolved",
                indicator.uid,
                found.len()
            );
            return Some(raw.to_string());
        };

        let mut resolved = raw.to_string();
        for (text, placeholder) in found {
            let key = placeholder.cte_key();
            let driver = context.driver_column();
            let definition = context.ensure(&key, || {
                debug!("registering d2-function CTE {key}");
                CteDefinition::d2_function(
                    &key,
                    d2_function_cte_sql(&placeholder, program, driver, dialect),
                    driver,
                )
            });
            let value = format!("coalesce({}.value, 0)", definition.alias());
            alias_map.insert(text.clone(), definition.alias().to_string());
            resolved = resolved.replace(&text, &value);
        }
        Some(resolved)
    }
}

impl Default for PlaceholderResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest (rank 1) value of a variable column per driver row. Offsets other
/// than 0 distinguish cache keys but never change the ranking query.
fn variable_cte_sql(
    placeholder: &VariablePlaceholder,
    indicator: &ProgramIndicator,
    program: &Program,
    window_start: NaiveDate,
    window_end: NaiveDate,
    driver_column: &str,
    dialect: &dyn SqlDialect,
) -> String {
    let column = dialect.quote_identifier(&placeholder.column);
    let mut sql = format!(
        "select {driver}, {column} as value, \
         row_number() over (partition by {driver} order by {order} desc) as rn \
         from {table} where {column} is not null",
        driver = driver_column,
        column = column,
        order = EVENT_DATE_COLUMN,
        table = program.event_analytics_table(),
    );
    if let Some(stage_uid) = &placeholder.program_stage_uid {
        let _ = write!(sql, " and ps = '{stage_uid}'");
    }
    for fragment in compile_boundaries(
        &indicator.boundaries,
        EVENT_DATE_COLUMN,
        window_start,
        window_end,
        dialect,
    ) {
        let _ = write!(sql, " and {fragment}");
    }
    sql
}

/// Ranked value of a data element within its program stage; rank and sort
/// direction derive from the placeholder offset.
fn psde_cte_sql(
    placeholder: &PsdePlaceholder,
    indicator: &ProgramIndicator,
    program: &Program,
    window_start: NaiveDate,
    window_end: NaiveDate,
    driver_column: &str,
    dialect: &dyn SqlDialect,
) -> String {
    let column = dialect.quote_identifier(&placeholder.data_element_uid);
    let (_, direction) = placeholder.rank_and_direction();
    let mut sql = format!(
        "select {driver}, {column} as value, \
         row_number() over (partition by {driver} order by {order} {direction}) as rn \
         from {table} where {column} is not null and ps = '{stage}'",
        driver = driver_column,
        column = column,
        order = dialect.quote_identifier(EVENT_DATE_COLUMN),
        direction = direction,
        table = program.event_analytics_table(),
        stage = placeholder.program_stage_uid,
    );
    for fragment in compile_boundaries(
        &indicator.boundaries,
        EVENT_DATE_COLUMN,
        window_start,
        window_end,
        dialect,
    ) {
        let _ = write!(sql, " and {fragment}");
    }
    sql
}

/// Count of matching data-element values per driver row; the comparison
/// argument is the placeholder's decoded SQL, embedded literally.
fn d2_function_cte_sql(
    placeholder: &D2FunctionPlaceholder,
    program: &Program,
    driver_column: &str,
    dialect: &dyn SqlDialect,
) -> String {
    let column = dialect.quote_identifier(&placeholder.data_element_uid);
    format!(
        "select {driver}, count({column}) as value from {table} \
         where ps = '{stage}' and {column} is not null and {column} = {argument} \
         group by {driver}",
        driver = driver_column,
        column = column,
        table = program.event_analytics_table(),
        stage = placeholder.program_stage_uid,
        argument = placeholder.argument_sql,
    )
}
