//! Heron CLI - compile indicator definitions to analytics SQL
//!
//! Usage:
//!   heron compile <indicator.json> [--start <date>] [--end <date>] [--dialect <dialect>]
//!   heron ctes <indicator.json> [--start <date>] [--end <date>]
//!
//! The input file is a JSON program-indicator definition. Expressions are
//! compiled with a small built-in expression compiler that understands the
//! common `V{...}`, `#{stage.element}` and `d2:countIfValue(...)` forms; a
//! host system would plug in its own implementation instead.

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::NaiveDate;
use heron::compiler::boundary::boundary_hash;
use heron::compiler::placeholder::{
    D2FunctionPlaceholder, PsdePlaceholder, VariablePlaceholder,
};
use heron::compiler::{CteContext, CteKind, Endpoint, SubqueryBuilder};
use heron::external::{ExpressionCompiler, ValueKind};
use heron::model::ProgramIndicator;
use heron::sql::Dialect;

#[derive(Parser)]
#[command(name = "heron")]
#[command(about = "Heron - compiles tracker indicator expressions into CTE-backed analytics SQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile an indicator definition to a full WITH query
    Compile {
        /// Path to the indicator JSON file
        file: PathBuf,

        /// Reporting window start (YYYY-MM-DD)
        #[arg(long, default_value = "2023-01-01")]
        start: String,

        /// Reporting window end (YYYY-MM-DD)
        #[arg(long, default_value = "2023-12-31")]
        end: String,

        /// SQL dialect to generate
        #[arg(short, long, default_value = "postgres")]
        dialect: DialectArg,
    },

    /// List the CTEs an indicator compiles into
    Ctes {
        /// Path to the indicator JSON file
        file: PathBuf,

        /// Reporting window start (YYYY-MM-DD)
        #[arg(long, default_value = "2023-01-01")]
        start: String,

        /// Reporting window end (YYYY-MM-DD)
        #[arg(long, default_value = "2023-12-31")]
        end: String,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Compile {
            file,
            start,
            end,
            dialect,
        } => match compile(&file, &start, &end, dialect.into()) {
            Ok(context) => {
                let indicator_uid = context
                    .iter()
                    .find(|(_, def)| def.kind() == CteKind::ProgramIndicator)
                    .map(|(key, _)| key.to_string());
                match indicator_uid {
                    Some(uid) => {
                        println!("{}", render_with_query(&context, &uid));
                        ExitCode::SUCCESS
                    }
                    None => {
                        eprintln!("error: no main CTE was generated");
                        ExitCode::FAILURE
                    }
                }
            }
            Err(message) => {
                eprintln!("error: {message}");
                ExitCode::FAILURE
            }
        },
        Commands::Ctes { file, start, end } => {
            match compile(&file, &start, &end, Dialect::Postgres) {
                Ok(context) => {
                    for (key, def) in context.iter() {
                        let rank = def
                            .target_rank()
                            .map(|r| r.to_string())
                            .unwrap_or_else(|| "-".to_string());
                        println!(
                            "{:<22} {:<14} rank={:<3} {}",
                            kind_label(def.kind()),
                            def.alias(),
                            rank,
                            key
                        );
                    }
                    ExitCode::SUCCESS
                }
                Err(message) => {
                    eprintln!("error: {message}");
                    ExitCode::FAILURE
                }
            }
        }
    }
}

fn compile(file: &Path, start: &str, end: &str, dialect: Dialect) -> Result<CteContext, String> {
    let source = fs::read_to_string(file).map_err(|e| format!("cannot read {file:?}: {e}"))?;
    let indicator: ProgramIndicator =
        serde_json::from_str(&source).map_err(|e| format!("invalid indicator JSON: {e}"))?;
    let window_start = parse_date(start)?;
    let window_end = parse_date(end)?;

    let expressions = DemoExpressionCompiler;
    let builder = SubqueryBuilder::new(&expressions).with_dialect(dialect);
    let mut context = CteContext::new(Endpoint::Enrollment);
    builder
        .add_cte(&indicator, window_start, window_end, &mut context)
        .map_err(|e| e.to_string())?;
    Ok(context)
}

fn parse_date(text: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|e| format!("invalid date '{text}': {e}"))
}

fn kind_label(kind: CteKind) -> &'static str {
    match kind {
        CteKind::Variable => "variable",
        CteKind::ProgramStageDataElement => "stage-element",
        CteKind::D2Function => "d2-function",
        CteKind::Filter => "filter",
        CteKind::ProgramIndicator => "program-indicator",
    }
}

/// Assemble the final query: value CTEs are named by alias (left joins
/// reference them that way), filter and main CTEs by key.
fn render_with_query(context: &CteContext, indicator_uid: &str) -> String {
    let ctes: Vec<String> = context
        .iter()
        .map(|(key, def)| {
            let name = match def.kind() {
                CteKind::Filter | CteKind::ProgramIndicator => key,
                _ => def.alias(),
            };
            format!("{} as (\n  {}\n)", name, def.sql())
        })
        .collect();
    format!(
        "with {}\nselect {}, value from {}",
        ctes.join(",\n"),
        context.driver_column(),
        indicator_uid
    )
}

// =============================================================================
// Demo expression compiler
// =============================================================================

/// Built-in stand-in for the host expression service. Handles the forms the
/// demo inputs use; everything else passes through untouched.
struct DemoExpressionCompiler;

/// Date-valued program variables that compile to ranked value CTEs.
const DATE_VARIABLES: &[(&str, &str, &str)] = &[
    ("event_date", "vEventDate", "occurreddate"),
    ("creation_date", "vCreationDate", "created"),
    ("enrollment_date", "vEnrollmentDate", "enrollmentdate"),
    ("incident_date", "vIncidentDate", "incidentdate"),
    ("scheduled_date", "vScheduledDate", "scheduleddate"),
    ("due_date", "vDueDate", "scheduleddate"),
];

/// Status-valued variables that compile straight to a driver column.
const COLUMN_VARIABLES: &[(&str, &str)] = &[
    ("event_status", "eventstatus"),
    ("program_status", "programstatus"),
];

impl ExpressionCompiler for DemoExpressionCompiler {
    fn analytics_sql(
        &self,
        text: &str,
        kind: ValueKind,
        indicator: &ProgramIndicator,
        _window_start: NaiveDate,
        _window_end: NaiveDate,
        _driver_alias: &str,
    ) -> Option<String> {
        let hash = boundary_hash(&indicator.boundaries);
        let mut sql = rewrite_count_if_value(text, indicator, &hash);
        sql = rewrite_stage_elements(&sql, indicator, &hash);
        sql = rewrite_variables(&sql, indicator);
        if kind == ValueKind::Boolean {
            sql = sql.replace("==", "=");
        }
        Some(sql)
    }
}

fn rewrite_variables(text: &str, indicator: &ProgramIndicator) -> String {
    let mut sql = text.to_string();
    for (name, variable_type, column) in DATE_VARIABLES {
        let token = format!("V{{{name}}}");
        if sql.contains(&token) {
            let placeholder = VariablePlaceholder {
                variable_type: (*variable_type).to_string(),
                column: (*column).to_string(),
                indicator_uid: indicator.uid.clone(),
                program_stage_uid: None,
                offset: 0,
            };
            sql = sql.replace(&token, &placeholder.format());
        }
    }
    for (name, column) in COLUMN_VARIABLES {
        let token = format!("V{{{name}}}");
        sql = sql.replace(&token, &format!("\"{column}\""));
    }
    sql
}

/// Rewrite `#{stage.element}` references into stage-element placeholders.
fn rewrite_stage_elements(text: &str, indicator: &ProgramIndicator, hash: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find("#{") {
        out.push_str(&rest[..at]);
        let tail = &rest[at + 2..];
        match parse_stage_element(tail) {
            Some((stage, element, consumed)) => {
                let placeholder = PsdePlaceholder {
                    program_stage_uid: stage.to_string(),
                    data_element_uid: element.to_string(),
                    offset: 0,
                    boundary_hash: hash.to_string(),
                    indicator_uid: indicator.uid.clone(),
                };
                out.push_str(&placeholder.format());
                rest = &tail[consumed..];
            }
            None => {
                out.push_str("#{");
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Rewrite `d2:countIfValue(#{stage.element}, literal)` calls into
/// d2-function placeholders.
fn rewrite_count_if_value(text: &str, indicator: &ProgramIndicator, hash: &str) -> String {
    const CALL: &str = "d2:countIfValue(#{";
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(at) = rest.find(CALL) {
        out.push_str(&rest[..at]);
        let tail = &rest[at + CALL.len()..];
        match parse_count_if_value(tail) {
            Some((stage, element, argument_sql, consumed)) => {
                let placeholder = D2FunctionPlaceholder {
                    function: "countIfValue".to_string(),
                    program_stage_uid: stage.to_string(),
                    data_element_uid: element.to_string(),
                    argument_type: "val64".to_string(),
                    argument_sql,
                    boundary_hash: hash.to_string(),
                    indicator_uid: indicator.uid.clone(),
                };
                out.push_str(&placeholder.format());
                rest = &tail[consumed..];
            }
            None => {
                out.push_str(CALL);
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Parse `stage.element}` returning the UIDs and consumed length.
fn parse_stage_element(tail: &str) -> Option<(&str, &str, usize)> {
    let close = tail.find('}')?;
    let (stage, element) = tail[..close].split_once('.')?;
    let valid = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    (valid(stage) && valid(element)).then_some((stage, element, close + 1))
}

/// Parse `stage.element}, literal)` returning UIDs, the argument rendered as
/// SQL, and consumed length.
fn parse_count_if_value(tail: &str) -> Option<(&str, &str, String, usize)> {
    let (stage, element, consumed) = parse_stage_element(tail)?;
    let after = tail[consumed..].strip_prefix(',')?;
    let close = after.find(')')?;
    let argument = after[..close].trim();
    if argument.is_empty() {
        return None;
    }
    let argument_sql = if argument.starts_with('\'') {
        argument.to_string()
    } else {
        argument.parse::<f64>().ok()?;
        format!("cast({argument} as double precision)")
    };
    let consumed = consumed + 1 + close + 1;
    Some((stage, element, argument_sql, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use heron::model::Program;

    fn indicator() -> ProgramIndicator {
        ProgramIndicator::new("demoPi1", Program::new("demoProg1"))
    }

    #[test]
    fn test_rewrites_date_variable() {
        let sql = rewrite_variables("1 + V{event_date}", &indicator());
        assert!(sql.contains("FUNC_CTE_VAR( type='vEventDate', column='occurreddate'"));
    }

    #[test]
    fn test_rewrites_status_variable_to_column() {
        let sql = rewrite_variables("V{event_status} == 'ACTIVE'", &indicator());
        assert_eq!(sql, "\"eventstatus\" == 'ACTIVE'");
    }

    #[test]
    fn test_rewrites_stage_element() {
        let sql = rewrite_stage_elements("#{StageA.ElementB} + 1", &indicator(), "noboundaries");
        assert!(sql.starts_with("__PSDE_CTE_PLACEHOLDER__(psUid='StageA', deUid='ElementB'"));
        assert!(sql.ends_with(" + 1"));
    }

    #[test]
    fn test_rewrites_count_if_value() {
        let sql = rewrite_count_if_value(
            "d2:countIfValue(#{StageA.ElementB}, 5)",
            &indicator(),
            "noboundaries",
        );
        assert!(sql.starts_with("__D2FUNC__(func='countIfValue', ps='StageA', de='ElementB'"));
        assert!(sql.ends_with(")__"));
    }

    #[test]
    fn test_unknown_forms_pass_through() {
        let text = "d2:daysBetween(a, b) + #{broken";
        assert_eq!(
            rewrite_stage_elements(text, &indicator(), "noboundaries"),
            text
        );
    }
}
