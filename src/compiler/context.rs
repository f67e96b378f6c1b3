//! The per-compilation CTE registry.
//!
//! `CteContext` is the single synchronization point for deduplication: each
//! distinct referenced value is compiled into a CTE exactly once, keyed by a
//! content-addressed string (see [`super::keys`]). The context lives for one
//! indicator compilation, is populated during placeholder resolution, read
//! during assembly, then handed to the outer query builder which prepends the
//! collected CTEs with `WITH`.

use indexmap::IndexMap;

use super::keys;

/// Which analytics endpoint drives the compilation. Fixed at construction;
/// determines the join/partition column of every generated CTE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Enrollment,
    Event,
}

impl Endpoint {
    /// The driver column CTEs partition on and join back through.
    pub fn driver_column(&self) -> &'static str {
        match self {
            Endpoint::Enrollment => "enrollment",
            Endpoint::Event => "event",
        }
    }
}

/// What a registered CTE computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CteKind {
    /// Latest value of a program variable column.
    Variable,
    /// Ranked value of a data element in a program stage.
    ProgramStageDataElement,
    /// An aggregate helper (`d2:countIfValue` and friends).
    D2Function,
    /// A joinable simple-filter predicate.
    Filter,
    /// The main per-indicator aggregate CTE.
    ProgramIndicator,
}

impl CteKind {
    fn alias_prefix(&self) -> &'static str {
        match self {
            CteKind::Variable => "vrc",
            CteKind::ProgramStageDataElement => "pdc",
            CteKind::D2Function => "d2c",
            CteKind::Filter => "flc",
            CteKind::ProgramIndicator => "pic",
        }
    }
}

/// A registered CTE: SQL body, generated alias, kind, join column and the
/// row-number rank value CTEs are joined at. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CteDefinition {
    kind: CteKind,
    sql: String,
    alias: String,
    join_column: String,
    target_rank: Option<u32>,
}

impl CteDefinition {
    /// A variable CTE; always joined at rank 1 (only the latest row is
    /// materialized, regardless of the key's offset component).
    pub fn variable(key: &str, sql: impl Into<String>, join_column: impl Into<String>) -> Self {
        Self::new(CteKind::Variable, key, sql, join_column, Some(1))
    }

    pub fn program_stage_data_element(
        key: &str,
        sql: impl Into<String>,
        join_column: impl Into<String>,
        target_rank: u32,
    ) -> Self {
        Self::new(
            CteKind::ProgramStageDataElement,
            key,
            sql,
            join_column,
            Some(target_rank),
        )
    }

    pub fn d2_function(key: &str, sql: impl Into<String>, join_column: impl Into<String>) -> Self {
        Self::new(CteKind::D2Function, key, sql, join_column, None)
    }

    pub fn filter(key: &str, sql: impl Into<String>, join_column: impl Into<String>) -> Self {
        Self::new(CteKind::Filter, key, sql, join_column, None)
    }

    pub fn program_indicator(
        key: &str,
        sql: impl Into<String>,
        join_column: impl Into<String>,
    ) -> Self {
        Self::new(CteKind::ProgramIndicator, key, sql, join_column, None)
    }

    fn new(
        kind: CteKind,
        key: &str,
        sql: impl Into<String>,
        join_column: impl Into<String>,
        target_rank: Option<u32>,
    ) -> Self {
        Self {
            kind,
            sql: sql.into(),
            alias: derive_alias(kind, key),
            join_column: join_column.into(),
            target_rank,
        }
    }

    pub fn kind(&self) -> CteKind {
        self.kind
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn join_column(&self) -> &str {
        &self.join_column
    }

    pub fn target_rank(&self) -> Option<u32> {
        self.target_rank
    }

    pub fn is_variable(&self) -> bool {
        self.kind == CteKind::Variable
    }

    pub fn is_program_stage_data_element(&self) -> bool {
        self.kind == CteKind::ProgramStageDataElement
    }

    pub fn is_d2_function(&self) -> bool {
        self.kind == CteKind::D2Function
    }

    pub fn is_filter(&self) -> bool {
        self.kind == CteKind::Filter
    }

    /// Value CTEs are the ones the main CTE left-joins.
    pub fn is_value(&self) -> bool {
        matches!(
            self.kind,
            CteKind::Variable | CteKind::ProgramStageDataElement | CteKind::D2Function
        )
    }
}

/// Aliases are content-derived from the cache key, so two definitions built
/// for the same key always carry the same alias, and distinct keys get
/// distinct aliases without any shared counter.
fn derive_alias(kind: CteKind, key: &str) -> String {
    format!("{}_{}", kind.alias_prefix(), &keys::sha1_hex(key)[..8])
}

/// Mutable, insertion-ordered registry of CTE definitions for one
/// compilation. Keys are unique; content is written at most once per key.
#[derive(Debug)]
pub struct CteContext {
    endpoint: Endpoint,
    definitions: IndexMap<String, CteDefinition>,
}

impl CteContext {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            definitions: IndexMap::new(),
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// The driver column of this compilation's endpoint.
    pub fn driver_column(&self) -> &'static str {
        self.endpoint.driver_column()
    }

    /// Insert-or-reuse: if `key` is present, return the existing definition
    /// unchanged and never invoke `build`; otherwise build, store and return.
    /// First writer wins - this idempotence is what collapses repeated
    /// placeholders into one CTE and one join.
    pub fn ensure(&mut self, key: &str, build: impl FnOnce() -> CteDefinition) -> &CteDefinition {
        self.definitions
            .entry(key.to_string())
            .or_insert_with(build)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.definitions.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&CteDefinition> {
        self.definitions.get(key)
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    /// Entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &CteDefinition)> {
        self.definitions.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_is_idempotent() {
        let mut ctx = CteContext::new(Endpoint::Enrollment);
        let first = ctx
            .ensure("k1", || CteDefinition::variable("k1", "select 1", "enrollment"))
            .clone();
        let mut invoked = false;
        let second = ctx.ensure("k1", || {
            invoked = true;
            CteDefinition::variable("k1", "select 2", "enrollment")
        });
        assert!(!invoked, "factory must not run for an existing key");
        assert_eq!(second.sql(), first.sql());
        assert_eq!(second.alias(), first.alias());
        assert_eq!(ctx.len(), 1);
    }

    #[test]
    fn test_aliases_stable_per_key_and_distinct_across_keys() {
        let a1 = CteDefinition::variable("varcte_created_pi_0", "select 1", "enrollment");
        let a2 = CteDefinition::variable("varcte_created_pi_0", "select 2", "enrollment");
        let b = CteDefinition::variable("varcte_created_pi_-1", "select 1", "enrollment");
        assert_eq!(a1.alias(), a2.alias());
        assert_ne!(a1.alias(), b.alias());
        assert!(a1.alias().starts_with("vrc_"));
    }

    #[test]
    fn test_alias_prefix_by_kind() {
        assert!(CteDefinition::filter("k", "s", "enrollment")
            .alias()
            .starts_with("flc_"));
        assert!(CteDefinition::d2_function("k", "s", "enrollment")
            .alias()
            .starts_with("d2c_"));
        assert!(
            CteDefinition::program_stage_data_element("k", "s", "enrollment", 2)
                .alias()
                .starts_with("pdc_")
        );
    }

    #[test]
    fn test_insertion_order_is_preserved() {
        let mut ctx = CteContext::new(Endpoint::Enrollment);
        for key in ["b", "a", "c"] {
            ctx.ensure(key, || CteDefinition::variable(key, "select 1", "enrollment"));
        }
        let keys: Vec<_> = ctx.keys().collect();
        assert_eq!(keys, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_target_ranks() {
        assert_eq!(
            CteDefinition::variable("k", "s", "enrollment").target_rank(),
            Some(1)
        );
        assert_eq!(
            CteDefinition::program_stage_data_element("k", "s", "enrollment", 3).target_rank(),
            Some(3)
        );
        assert_eq!(
            CteDefinition::d2_function("k", "s", "enrollment").target_rank(),
            None
        );
    }

    #[test]
    fn test_driver_column_by_endpoint() {
        assert_eq!(CteContext::new(Endpoint::Enrollment).driver_column(), "enrollment");
        assert_eq!(CteContext::new(Endpoint::Event).driver_column(), "event");
    }
}
