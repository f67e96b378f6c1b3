//! The indicator assembler.
//!
//! Orchestrates one indicator compilation: compile the expression through the
//! host expression compiler, run the three placeholder resolvers over the
//! result, do the same for the filter, decide the filter shape, and register
//! the main aggregate CTE that drives the rest of the analytics query.
//!
//! ```text
//! expression ──▶ ExpressionCompiler ──▶ raw SQL + placeholders
//!                                            │
//!                       variable ▶ psde ▶ d2 resolvers (CteContext fills up)
//!                                            │
//! filter (same pipeline) ──▶ simple? ─▶ filter CTE + INNER JOIN
//!                            complex? ─▶ WHERE clause over LEFT JOINs
//!                                            │
//!                                     main aggregate CTE
//! ```

use std::collections::HashMap;

use chrono::NaiveDate;
use log::debug;

use crate::external::{DataElementStore, ExpressionCompiler, ValueKind};
use crate::model::ProgramIndicator;
use crate::sql::Dialect;

use super::boundary::compile_boundaries;
use super::context::{CteContext, CteDefinition, CteKind};
use super::filter::{self, SimpleFilter};
use super::keys;
use super::resolve::PlaceholderResolver;
use super::{CteError, EVENT_DATE_COLUMN};

/// Alias of the enrollment/event driver table in the main CTE.
pub const DRIVER_ALIAS: &str = "subax";

/// Builds the per-indicator aggregate CTE and its supporting value and
/// filter CTEs.
pub struct SubqueryBuilder<'a> {
    expressions: &'a dyn ExpressionCompiler,
    data_elements: Option<&'a dyn DataElementStore>,
    dialect: Dialect,
}

/// What the resolved filter turned out to be.
enum FilterShape {
    None,
    Simple(SimpleFilter),
    Complex(String),
}

impl<'a> SubqueryBuilder<'a> {
    pub fn new(expressions: &'a dyn ExpressionCompiler) -> Self {
        Self {
            expressions,
            data_elements: None,
            dialect: Dialect::Postgres,
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_data_elements(mut self, store: &'a dyn DataElementStore) -> Self {
        self.data_elements = Some(store);
        self
    }

    /// Compile `indicator` into `context`: value/filter CTEs plus the main
    /// aggregate CTE registered under the indicator's UID.
    ///
    /// Fails only when the indicator has no owning program; every other
    /// irregularity degrades to passing text through unchanged.
    pub fn add_cte(
        &self,
        indicator: &ProgramIndicator,
        window_start: NaiveDate,
        window_end: NaiveDate,
        context: &mut CteContext,
    ) -> Result<(), CteError> {
        let program = indicator
            .program
            .as_ref()
            .ok_or_else(|| CteError::MissingProgram(indicator.uid.clone()))?;

        let raw_expression = self
            .expressions
            .analytics_sql(
                &indicator.expression,
                ValueKind::Numeric,
                indicator,
                window_start,
                window_end,
                DRIVER_ALIAS,
            )
            .unwrap_or_else(|| indicator.expression.clone());
        let resolved_expression =
            self.resolve_pipeline(&raw_expression, indicator, window_start, window_end, context);

        let resolved_filter = indicator.filter.as_ref().map(|filter_text| {
            let raw = self
                .expressions
                .analytics_sql(
                    filter_text,
                    ValueKind::Boolean,
                    indicator,
                    window_start,
                    window_end,
                    DRIVER_ALIAS,
                )
                .unwrap_or_else(|| filter_text.clone());
            self.resolve_pipeline(&raw, indicator, window_start, window_end, context)
        });

        let shape = match resolved_filter.as_deref().map(str::trim) {
            None | Some("") => FilterShape::None,
            Some(resolved) => match filter::parse_simple_filter(resolved) {
                Some(simple) => FilterShape::Simple(simple),
                None => FilterShape::Complex(resolved.to_string()),
            },
        };

        let driver = context.driver_column();
        let mut inner_join = String::new();
        if let FilterShape::Simple(simple) = &shape {
            let key = keys::filter_cte_key(
                &simple.column,
                &simple.operator,
                &simple.literal,
                &indicator.uid,
            );
            let boundaries = compile_boundaries(
                &indicator.boundaries,
                EVENT_DATE_COLUMN,
                window_start,
                window_end,
                &self.dialect,
            );
            let sql = filter::filter_cte_sql(
                simple,
                &program.event_analytics_table(),
                &boundaries,
                driver,
                &self.dialect,
            );
            let definition = context.ensure(&key, || {
                debug!("registering filter CTE {key}");
                CteDefinition::filter(&key, sql, driver)
            });
            inner_join = format!(
                " inner join {key} {alias} on {alias}.{driver} = {sub}.{driver}",
                alias = definition.alias(),
                sub = DRIVER_ALIAS,
            );
        }

        let left_joins = self.build_left_joins(context);
        let left_joins = if left_joins.is_empty() {
            String::new()
        } else {
            format!(" {left_joins}")
        };
        let where_clause = match &shape {
            FilterShape::Complex(resolved) => format!(" where {resolved}"),
            _ => String::new(),
        };

        let main_sql = format!(
            "select {sub}.{driver}, {agg}({expression}) as value from {table} as {sub}\
             {inner_join}{left_joins}{where_clause} group by {sub}.{driver}",
            sub = DRIVER_ALIAS,
            agg = indicator.aggregation().sql_name(),
            expression = resolved_expression,
            table = program.enrollment_analytics_table(),
        );
        context.ensure(&indicator.uid, || {
            CteDefinition::program_indicator(&indicator.uid, main_sql, driver)
        });
        Ok(())
    }

    /// One deduplicated LEFT JOIN per value CTE in the context, in insertion
    /// order. Variable and stage-element CTEs join at their target rank;
    /// d2-function CTEs have no rank; filter and main CTEs are never
    /// left-joined.
    pub fn build_left_joins(&self, context: &CteContext) -> String {
        let driver = context.driver_column();
        let mut joins = Vec::new();
        for (_, definition) in context.iter() {
            let rank_condition = match definition.kind() {
                CteKind::Variable | CteKind::ProgramStageDataElement => format!(
                    " and {}.rn = {}",
                    definition.alias(),
                    definition.target_rank().unwrap_or(1)
                ),
                CteKind::D2Function => String::new(),
                CteKind::Filter | CteKind::ProgramIndicator => continue,
            };
            joins.push(format!(
                "left join {alias} {alias} on {alias}.{driver} = {sub}.{driver}{rank}",
                alias = definition.alias(),
                sub = DRIVER_ALIAS,
                rank = rank_condition,
            ));
        }
        joins.join(" ")
    }

    /// Run the variable, stage-element and d2-function resolvers over `raw`,
    /// in that fixed order, populating `context`.
    fn resolve_pipeline(
        &self,
        raw: &str,
        indicator: &ProgramIndicator,
        window_start: NaiveDate,
        window_end: NaiveDate,
        context: &mut CteContext,
    ) -> String {
        let resolver = match self.data_elements {
            Some(store) => PlaceholderResolver::with_data_elements(store),
            None => PlaceholderResolver::new(),
        };
        let mut variable_aliases = HashMap::new();
        let mut psde_aliases = HashMap::new();
        let mut d2_aliases = HashMap::new();

        let step = resolver
            .resolve_variables(
                Some(raw),
                indicator,
                window_start,
                window_end,
                context,
                &mut variable_aliases,
                &self.dialect,
            )
            .unwrap_or_else(|| raw.to_string());
        let step = resolver
            .resolve_program_stage_elements(
                Some(&step),
                indicator,
                window_start,
                window_end,
                context,
                &mut psde_aliases,
                &self.dialect,
            )
            .unwrap_or(step);
        resolver
            .resolve_d2_functions(
                Some(&step),
                indicator,
                window_start,
                window_end,
                context,
                &mut d2_aliases,
                &self.dialect,
            )
            .unwrap_or(step)
    }
}
