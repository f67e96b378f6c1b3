//! Integration tests for the indicator assembler: filter shape selection,
//! join construction and the main aggregate CTE.

use std::collections::HashMap;

use chrono::NaiveDate;
use heron::compiler::keys;
use heron::compiler::placeholder::{
    D2FunctionPlaceholder, PsdePlaceholder, VariablePlaceholder,
};
use heron::compiler::{
    CteContext, CteDefinition, CteError, CteKind, Endpoint, SubqueryBuilder,
};
use heron::external::{ExpressionCompiler, ValueKind};
use heron::model::{
    AggregationType, AnalyticsPeriodBoundary, BoundaryTarget, BoundaryType, PeriodType, Program,
    ProgramIndicator,
};

const PI_UID: &str = "TestPiUid1";
const PROG_UID: &str = "programUid1";
const EVENT_TABLE: &str = "analytics_event_programuid1";
const ENROLLMENT_TABLE: &str = "analytics_enrollment_programuid1";

fn window() -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2023, 12, 31).unwrap(),
    )
}

fn indicator() -> ProgramIndicator {
    ProgramIndicator::new(PI_UID, Program::new(PROG_UID))
}

fn variable_placeholder(variable_type: &str, column: &str) -> String {
    VariablePlaceholder {
        variable_type: variable_type.to_string(),
        column: column.to_string(),
        indicator_uid: PI_UID.to_string(),
        program_stage_uid: None,
        offset: 0,
    }
    .format()
}

/// Canned responses keyed by (text, value kind); unstubbed calls return
/// `None`, which makes the builder fall back to the raw text.
#[derive(Default)]
struct StubExpressionCompiler {
    responses: HashMap<(String, ValueKind), String>,
}

impl StubExpressionCompiler {
    fn when(mut self, text: &str, kind: ValueKind, result: impl Into<String>) -> Self {
        self.responses.insert((text.to_string(), kind), result.into());
        self
    }
}

impl ExpressionCompiler for StubExpressionCompiler {
    fn analytics_sql(
        &self,
        text: &str,
        kind: ValueKind,
        _indicator: &ProgramIndicator,
        _window_start: NaiveDate,
        _window_end: NaiveDate,
        _driver_alias: &str,
    ) -> Option<String> {
        self.responses.get(&(text.to_string(), kind)).cloned()
    }
}

fn add_cte(expressions: &StubExpressionCompiler, pi: &ProgramIndicator) -> CteContext {
    let (start, end) = window();
    let builder = SubqueryBuilder::new(expressions);
    let mut context = CteContext::new(Endpoint::Enrollment);
    builder
        .add_cte(pi, start, end, &mut context)
        .expect("compilation succeeds");
    context
}

fn alias_of(context: &CteContext, key: &str) -> String {
    context
        .get(key)
        .unwrap_or_else(|| panic!("missing CTE for key {key}"))
        .alias()
        .to_string()
}

#[test]
fn test_expression_only_value_placeholder() {
    let mut pi = indicator();
    pi.expression = "V{event_date}".to_string();
    pi.aggregation_type = Some(AggregationType::Sum);
    let value_key = format!("varcte_occurreddate_{PI_UID}_0");

    let expressions = StubExpressionCompiler::default().when(
        "V{event_date}",
        ValueKind::Numeric,
        variable_placeholder("vEventDate", "occurreddate"),
    );
    let context = add_cte(&expressions, &pi);

    let value_cte = context.get(&value_key).expect("value CTE added");
    assert!(value_cte.is_variable());
    assert!(value_cte
        .sql()
        .contains("select enrollment, \"occurreddate\" as value"));
    assert!(value_cte.sql().contains(
        "row_number() over (partition by enrollment order by occurreddate desc) as rn"
    ));
    assert!(value_cte.sql().contains(&format!("from {EVENT_TABLE}")));
    assert!(!value_cte.sql().contains("limit 1"));
    assert!(!value_cte.sql().contains("= subax.enrollment"));

    let main = context.get(PI_UID).expect("main CTE added");
    let alias = value_cte.alias();
    let main_sql = main.sql();
    assert!(main_sql.starts_with("select subax.enrollment, "));
    assert!(main_sql.contains(&format!("sum({alias}.value)")));
    assert!(main_sql.contains(&format!(" from {ENROLLMENT_TABLE} as subax")));
    assert!(main_sql.contains(&format!(
        "left join {alias} {alias} on {alias}.enrollment = subax.enrollment and {alias}.rn = 1"
    )));
    assert!(!main_sql.contains(" inner join "));
    assert!(!main_sql.contains(" where "));
    assert!(main_sql.ends_with(" group by subax.enrollment"));
}

#[test]
fn test_simple_filter_only() {
    let mut pi = indicator();
    pi.expression = "1".to_string();
    pi.filter = Some("V{event_status} == 'ACTIVE'".to_string());
    let filter_key = format!("filtercte_eventstatus_eq_active_{PI_UID}");

    let expressions = StubExpressionCompiler::default()
        .when("1", ValueKind::Numeric, "1")
        .when(
            "V{event_status} == 'ACTIVE'",
            ValueKind::Boolean,
            "\"eventstatus\" = 'ACTIVE'",
        );
    let context = add_cte(&expressions, &pi);

    let filter_cte = context.get(&filter_key).expect("filter CTE added");
    assert!(filter_cte.is_filter());
    assert_eq!(
        filter_cte.sql(),
        format!(
            "select enrollment from ( select enrollment, \"eventstatus\", \
             row_number() over (partition by enrollment order by occurreddate desc) as rn \
             from {EVENT_TABLE} where \"eventstatus\" is not null ) latest \
             where rn = 1 and \"eventstatus\" = 'ACTIVE'"
        )
    );

    let main_sql = context.get(PI_UID).unwrap().sql().to_string();
    let filter_alias = filter_cte.alias();
    assert_eq!(
        main_sql,
        format!(
            "select subax.enrollment, avg(1) as value from {ENROLLMENT_TABLE} as subax \
             inner join {filter_key} {filter_alias} \
             on {filter_alias}.enrollment = subax.enrollment group by subax.enrollment"
        )
    );

    assert_eq!(context.len(), 2, "main + filter only");
    assert!(context.keys().all(|key| !key.starts_with("varcte_")));
}

#[test]
fn test_complex_filter_only() {
    let mut pi = indicator();
    pi.expression = "1".to_string();
    pi.filter = Some("d2:daysBetween(V{creation_date}, V{scheduled_date}) > 10".to_string());
    let created_key = format!("varcte_created_{PI_UID}_0");
    let scheduled_key = format!("varcte_scheduleddate_{PI_UID}_0");

    let raw_filter = format!(
        "daysBetween({}, {}) > 10",
        variable_placeholder("vCreationDate", "created"),
        variable_placeholder("vDueDate", "scheduleddate"),
    );
    let expressions = StubExpressionCompiler::default()
        .when("1", ValueKind::Numeric, "1")
        .when(
            "d2:daysBetween(V{creation_date}, V{scheduled_date}) > 10",
            ValueKind::Boolean,
            raw_filter,
        );
    let context = add_cte(&expressions, &pi);

    assert!(context.get(&created_key).unwrap().is_variable());
    assert!(context.get(&scheduled_key).unwrap().is_variable());

    let created_alias = alias_of(&context, &created_key);
    let scheduled_alias = alias_of(&context, &scheduled_key);
    let main_sql = context.get(PI_UID).unwrap().sql();

    assert!(main_sql.starts_with("select subax.enrollment, "));
    assert!(main_sql.contains("avg(1)"));
    assert!(!main_sql.contains(" inner join "));
    assert!(main_sql.contains(&format!(
        "left join {created_alias} {created_alias} on "
    )));
    assert!(main_sql.contains(&format!(
        "left join {scheduled_alias} {scheduled_alias} on "
    )));
    assert!(main_sql.contains(&format!(
        " where daysBetween({created_alias}.value, {scheduled_alias}.value) > 10"
    )));
    assert!(main_sql.ends_with(" group by subax.enrollment"));

    assert_eq!(context.len(), 3, "main + 2 value CTEs");
    assert!(context.keys().all(|key| !key.starts_with("filtercte_")));
}

#[test]
fn test_value_expression_and_simple_filter() {
    let mut pi = indicator();
    pi.expression = "V{creation_date}".to_string();
    pi.filter = Some("V{event_status} == 'SKIPPED'".to_string());
    let value_key = format!("varcte_created_{PI_UID}_0");
    let filter_key = format!("filtercte_eventstatus_eq_skipped_{PI_UID}");

    let expressions = StubExpressionCompiler::default()
        .when(
            "V{creation_date}",
            ValueKind::Numeric,
            variable_placeholder("vCreationDate", "created"),
        )
        .when(
            "V{event_status} == 'SKIPPED'",
            ValueKind::Boolean,
            "\"eventstatus\" = 'SKIPPED'",
        );
    let context = add_cte(&expressions, &pi);

    let value_cte = context.get(&value_key).expect("value CTE added");
    let filter_cte = context.get(&filter_key).expect("filter CTE added");
    assert!(value_cte.is_variable());
    assert!(filter_cte.is_filter());

    let main_sql = context.get(PI_UID).unwrap().sql();
    let value_alias = value_cte.alias();
    let filter_alias = filter_cte.alias();
    assert!(main_sql.contains(&format!("avg({value_alias}.value)")));
    assert!(main_sql.contains(&format!("inner join {filter_key} {filter_alias} on ")));
    assert!(main_sql.contains(&format!("left join {value_alias} {value_alias} on ")));
    assert!(!main_sql.contains(" where "));
    assert!(main_sql.ends_with(" group by subax.enrollment"));
}

#[test]
fn test_identical_value_placeholders_share_join() {
    let mut pi = indicator();
    pi.expression = "V{creation_date} + V{creation_date}".to_string();
    let value_key = format!("varcte_created_{PI_UID}_0");

    let placeholder = variable_placeholder("vCreationDate", "created");
    let expressions = StubExpressionCompiler::default().when(
        "V{creation_date} + V{creation_date}",
        ValueKind::Numeric,
        format!("{placeholder} + {placeholder}"),
    );
    let context = add_cte(&expressions, &pi);

    assert_eq!(context.len(), 2, "main + 1 value CTE");
    let alias = alias_of(&context, &value_key);
    let main_sql = context.get(PI_UID).unwrap().sql();
    assert_eq!(
        main_sql,
        format!(
            "select subax.enrollment, avg({alias}.value + {alias}.value) as value \
             from {ENROLLMENT_TABLE} as subax \
             left join {alias} {alias} on {alias}.enrollment = subax.enrollment \
             and {alias}.rn = 1 group by subax.enrollment"
        )
    );
}

#[test]
fn test_duplicated_simple_comparison_goes_complex() {
    // Two ANDed comparisons are not a single-comparison filter, so the text
    // stays inline as a where clause instead of becoming a filter CTE.
    let mut pi = indicator();
    pi.expression = "1".to_string();
    pi.filter = Some("V{event_status} == 'ACTIVE' AND V{event_status} == 'ACTIVE'".to_string());

    let expressions = StubExpressionCompiler::default()
        .when("1", ValueKind::Numeric, "1")
        .when(
            "V{event_status} == 'ACTIVE' AND V{event_status} == 'ACTIVE'",
            ValueKind::Boolean,
            "\"eventstatus\" = 'ACTIVE' AND \"eventstatus\" = 'ACTIVE'",
        );
    let context = add_cte(&expressions, &pi);

    assert_eq!(context.len(), 1, "main CTE only");
    let main_sql = context.get(PI_UID).unwrap().sql();
    assert!(main_sql
        .contains(" where \"eventstatus\" = 'ACTIVE' AND \"eventstatus\" = 'ACTIVE'"));
    assert!(!main_sql.contains(" inner join "));
}

#[test]
fn test_attribute_comparison_is_a_simple_filter() {
    let mut pi = indicator();
    pi.expression = "100".to_string();
    pi.filter = Some("\"some_attribute\" == 'ABC'".to_string());
    let filter_key = format!("filtercte_someattribute_eq_abc_{PI_UID}");

    let expressions = StubExpressionCompiler::default()
        .when("100", ValueKind::Numeric, "100")
        .when(
            "\"some_attribute\" == 'ABC'",
            ValueKind::Boolean,
            "\"some_attribute\" = 'ABC'",
        );
    let context = add_cte(&expressions, &pi);

    assert_eq!(context.len(), 2, "main + filter CTE");
    let filter_cte = context.get(&filter_key).expect("filter CTE added");
    let main_sql = context.get(PI_UID).unwrap().sql();
    assert!(main_sql.contains("avg(100)"));
    assert!(main_sql.contains(&format!(
        "inner join {filter_key} {} on ",
        filter_cte.alias()
    )));
    assert!(!main_sql.contains(" where "));
    assert!(!main_sql.contains(" left join "));
}

#[test]
fn test_value_cte_includes_start_boundary_with_offset() {
    let mut pi = indicator();
    pi.expression = "V{event_date}".to_string();
    pi.boundaries = vec![AnalyticsPeriodBoundary::new(
        BoundaryType::AfterStartOfReportingPeriod,
        BoundaryTarget::EventDate,
    )
    .with_offset(PeriodType::Daily, 5)];
    let value_key = format!("varcte_occurreddate_{PI_UID}_0");

    let expressions = StubExpressionCompiler::default().when(
        "V{event_date}",
        ValueKind::Numeric,
        variable_placeholder("vEventDate", "occurreddate"),
    );
    let context = add_cte(&expressions, &pi);

    let sql = context.get(&value_key).unwrap().sql();
    assert!(sql.contains("where \"occurreddate\" is not null"));
    // Window start 2023-01-01 shifted by +5 days.
    assert!(sql.contains("and \"occurreddate\" >= '2023-01-06'"));
}

#[test]
fn test_filter_cte_includes_end_boundary_with_offset() {
    let mut pi = indicator();
    pi.expression = "1".to_string();
    pi.filter = Some("V{event_status} == 'ACTIVE'".to_string());
    pi.boundaries = vec![AnalyticsPeriodBoundary::new(
        BoundaryType::BeforeEndOfReportingPeriod,
        BoundaryTarget::ScheduledDate,
    )
    .with_offset(PeriodType::Daily, -3)];
    let filter_key = format!("filtercte_eventstatus_eq_active_{PI_UID}");

    let expressions = StubExpressionCompiler::default()
        .when("1", ValueKind::Numeric, "1")
        .when(
            "V{event_status} == 'ACTIVE'",
            ValueKind::Boolean,
            "\"eventstatus\" = 'ACTIVE'",
        );
    let context = add_cte(&expressions, &pi);

    let sql = context.get(&filter_key).unwrap().sql();
    // Window end 2023-12-31, +1 day exclusive adjustment, -3 days offset.
    assert!(sql.contains(
        "where \"eventstatus\" is not null and \"scheduleddate\" < '2023-12-29' ) latest"
    ));
    assert!(sql.contains("\"scheduleddate\" <"));
}

#[test]
fn test_unsupported_custom_boundary_is_ignored() {
    let mut pi = indicator();
    pi.expression = "V{event_date}".to_string();
    pi.boundaries = vec![AnalyticsPeriodBoundary::new(
        BoundaryType::AfterStartOfReportingPeriod,
        BoundaryTarget::Custom("#{someStageUid.someDeUid}".to_string()),
    )];
    let value_key = format!("varcte_occurreddate_{PI_UID}_0");

    let expressions = StubExpressionCompiler::default().when(
        "V{event_date}",
        ValueKind::Numeric,
        variable_placeholder("vEventDate", "occurreddate"),
    );
    let context = add_cte(&expressions, &pi);

    let sql = context.get(&value_key).unwrap().sql();
    assert!(sql.ends_with("where \"occurreddate\" is not null"));
    assert!(!sql.contains(">="));
}

#[test]
fn test_build_left_joins_handles_cte_kinds() {
    let mut context = CteContext::new(Endpoint::Enrollment);
    context.ensure("varKey1", || {
        CteDefinition::variable("varKey1", "SELECT ...", "enrollment")
    });
    context.ensure("psdeKey1", || {
        CteDefinition::program_stage_data_element("psdeKey1", "SELECT ...", "enrollment", 1)
    });
    context.ensure("psdeKey2", || {
        CteDefinition::program_stage_data_element("psdeKey2", "SELECT ...", "enrollment", 3)
    });
    context.ensure("d2FuncKey1", || {
        CteDefinition::d2_function("d2FuncKey1", "SELECT COUNT...", "enrollment")
    });
    context.ensure("filterKey1", || {
        CteDefinition::filter("filterKey1", "SELECT ...", "enrollment")
    });

    let var_alias = alias_of(&context, "varKey1");
    let psde_alias1 = alias_of(&context, "psdeKey1");
    let psde_alias2 = alias_of(&context, "psdeKey2");
    let d2_alias = alias_of(&context, "d2FuncKey1");

    let expressions = StubExpressionCompiler::default();
    let joins = SubqueryBuilder::new(&expressions).build_left_joins(&context);

    assert!(joins.contains(&format!(
        "left join {var_alias} {var_alias} on {var_alias}.enrollment = subax.enrollment and {var_alias}.rn = 1"
    )));
    assert!(joins.contains(&format!(
        "left join {psde_alias1} {psde_alias1} on {psde_alias1}.enrollment = subax.enrollment and {psde_alias1}.rn = 1"
    )));
    assert!(joins.contains(&format!(
        "left join {psde_alias2} {psde_alias2} on {psde_alias2}.enrollment = subax.enrollment and {psde_alias2}.rn = 3"
    )));
    assert!(joins.contains(&format!(
        "left join {d2_alias} {d2_alias} on {d2_alias}.enrollment = subax.enrollment"
    )));
    assert!(!joins.contains(&format!("{d2_alias}.rn =")));
    assert!(!joins.contains("filterKey1"));
    assert_eq!(joins.matches("left join").count(), 4);
}

#[test]
fn test_missing_program_is_an_error() {
    let mut pi = indicator();
    pi.program = None;
    pi.expression = "1".to_string();

    let expressions = StubExpressionCompiler::default();
    let (start, end) = window();
    let mut context = CteContext::new(Endpoint::Enrollment);
    let result = SubqueryBuilder::new(&expressions).add_cte(&pi, start, end, &mut context);
    assert!(matches!(result, Err(CteError::MissingProgram(uid)) if uid == PI_UID));
    assert!(context.is_empty());
}

#[test]
fn test_end_to_end_expression_filter_and_joins() {
    let expression = "100 + V{event_date} + #{PgmStgUid1.DataElmUid1} \
                      + d2:countIfValue(#{PgmStgUid1.DataElmUid2}, 5)";
    let filter = "V{creation_date} > '2024-01-01'";
    let mut pi = indicator();
    pi.expression = expression.to_string();
    pi.filter = Some(filter.to_string());
    pi.aggregation_type = Some(AggregationType::Sum);

    let var_placeholder = variable_placeholder("vEventDate", "occurreddate");
    let psde_placeholder = PsdePlaceholder {
        program_stage_uid: "PgmStgUid1".to_string(),
        data_element_uid: "DataElmUid1".to_string(),
        offset: 0,
        boundary_hash: "noboundaries".to_string(),
        indicator_uid: PI_UID.to_string(),
    }
    .format();
    let d2_value_sql = "cast(5 as double precision)";
    let d2_placeholder = D2FunctionPlaceholder {
        function: "countIfValue".to_string(),
        program_stage_uid: "PgmStgUid1".to_string(),
        data_element_uid: "DataElmUid2".to_string(),
        argument_type: "val64".to_string(),
        argument_sql: d2_value_sql.to_string(),
        boundary_hash: "noboundaries".to_string(),
        indicator_uid: PI_UID.to_string(),
    }
    .format();
    let filter_placeholder = variable_placeholder("vCreationDate", "created");

    let expressions = StubExpressionCompiler::default()
        .when(
            expression,
            ValueKind::Numeric,
            format!("100 + {var_placeholder} + {psde_placeholder} + {d2_placeholder}"),
        )
        .when(
            filter,
            ValueKind::Boolean,
            format!("{filter_placeholder} > '2024-01-01'"),
        );
    let context = add_cte(&expressions, &pi);

    let var_key = format!("varcte_occurreddate_{PI_UID}_0");
    let psde_key = format!("psdecte_PgmStgUid1_DataElmUid1_0_noboundaries_{PI_UID}");
    let d2_key = format!(
        "d2countifvalue_PgmStgUid1_DataElmUid2_{}_noboundaries_{PI_UID}",
        keys::sha1_hex(d2_value_sql)
    );
    let filter_var_key = format!("varcte_created_{PI_UID}_0");

    // 1 main + 1 variable + 1 PSDE + 1 d2 function + 1 filter-referenced
    // variable; the filter itself stays inline (complex path).
    assert_eq!(context.len(), 5);
    assert!(context.keys().all(|key| !key.starts_with("filtercte_")));

    let var_alias = alias_of(&context, &var_key);
    let psde_alias = alias_of(&context, &psde_key);
    let d2_alias = alias_of(&context, &d2_key);
    let filter_var_alias = alias_of(&context, &filter_var_key);

    let main_sql = context.get(PI_UID).unwrap().sql();
    assert!(main_sql.contains(&format!(
        "sum(100 + {var_alias}.value + coalesce({psde_alias}.value, 0) \
         + coalesce({d2_alias}.value, 0))"
    )));
    assert!(!main_sql.contains("FUNC_CTE_VAR"));
    assert!(!main_sql.contains("__PSDE_CTE_PLACEHOLDER__"));
    assert!(!main_sql.contains("__D2FUNC__"));

    assert!(main_sql.contains(&format!(" where {filter_var_alias}.value > '2024-01-01'")));
    assert!(!main_sql.contains(" inner join "));

    for alias in [&var_alias, &psde_alias, &d2_alias, &filter_var_alias] {
        assert!(main_sql.contains(&format!("left join {alias} {alias} on ")));
    }
    assert!(main_sql.contains(&format!("{var_alias}.rn = 1")));
    assert!(main_sql.contains(&format!("{psde_alias}.rn = 1")));
    assert!(!main_sql.contains(&format!("{d2_alias}.rn =")));
    assert!(main_sql.contains(&format!("{filter_var_alias}.rn = 1")));
    assert!(main_sql.ends_with(" group by subax.enrollment"));

    // The main CTE is keyed by the indicator UID.
    assert_eq!(context.get(PI_UID).unwrap().kind(), CteKind::ProgramIndicator);
}
