//! Placeholder grammar.
//!
//! The host expression compiler emits three placeholder shapes into raw SQL:
//!
//! - variable:  `FUNC_CTE_VAR( type='..', column='..', piUid='..', psUid='..', offset='..')`
//! - PSDE:      `__PSDE_CTE_PLACEHOLDER__(psUid='..', deUid='..', offset='..', boundaryHash='..', piUid='..')`
//! - d2 func:   `__D2FUNC__(func='..', ps='..', de='..', argType='..', arg64='..', hash='..', pi='..')__`
//!
//! Each variant has a strict parser and a `format` inverse. Anything that is
//! not an exact match - wrong marker casing, a missing key, a stray comma, an
//! unbalanced parenthesis - is treated as plain text and left untouched, so a
//! malformed placeholder is indistinguishable from no placeholder at all.
//! Markers and keys are matched case-sensitively and in fixed order.

use std::collections::HashSet;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use super::keys;

/// Marker opening a variable placeholder.
pub const VARIABLE_MARKER: &str = "FUNC_CTE_VAR(";
/// Marker opening a program-stage-data-element placeholder.
pub const PSDE_MARKER: &str = "__PSDE_CTE_PLACEHOLDER__(";
/// Marker opening a d2-function placeholder.
pub const D2_FUNCTION_MARKER: &str = "__D2FUNC__(";

/// A parsed `FUNC_CTE_VAR(...)` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariablePlaceholder {
    pub variable_type: String,
    pub column: String,
    pub indicator_uid: String,
    /// `psUid='null'` parses as `None`.
    pub program_stage_uid: Option<String>,
    pub offset: i32,
}

impl VariablePlaceholder {
    pub fn cte_key(&self) -> String {
        keys::variable_cte_key(&self.column, &self.indicator_uid, self.offset)
    }

    /// Serialize back to placeholder text.
    pub fn format(&self) -> String {
        format!(
            "FUNC_CTE_VAR( type='{}', column='{}', piUid='{}', psUid='{}', offset='{}')",
            self.variable_type,
            self.column,
            self.indicator_uid,
            self.program_stage_uid.as_deref().unwrap_or("null"),
            self.offset
        )
    }

    fn parse_at(text: &str, pos: usize) -> Option<(Self, usize)> {
        let mut cur = Cursor::new(text, pos);
        cur.eat(VARIABLE_MARKER)?;
        cur.skip_spaces();
        let variable_type = cur.field("type", is_ident_char)?;
        cur.separator()?;
        let column = cur.field("column", is_ident_char)?;
        cur.separator()?;
        let indicator_uid = cur.field("piUid", is_ident_char)?;
        cur.separator()?;
        let program_stage_uid = cur.field("psUid", is_ident_char)?;
        cur.separator()?;
        let offset = cur.field("offset", is_offset_char)?.parse().ok()?;
        cur.skip_spaces();
        cur.eat(")")?;
        let placeholder = Self {
            variable_type: variable_type.to_string(),
            column: column.to_string(),
            indicator_uid: indicator_uid.to_string(),
            program_stage_uid: (program_stage_uid != "null")
                .then(|| program_stage_uid.to_string()),
            offset,
        };
        Some((placeholder, cur.pos))
    }
}

/// A parsed `__PSDE_CTE_PLACEHOLDER__(...)` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsdePlaceholder {
    pub program_stage_uid: String,
    pub data_element_uid: String,
    pub offset: i32,
    pub boundary_hash: String,
    pub indicator_uid: String,
}

impl PsdePlaceholder {
    pub fn cte_key(&self) -> String {
        keys::psde_cte_key(
            &self.program_stage_uid,
            &self.data_element_uid,
            self.offset,
            &self.boundary_hash,
            &self.indicator_uid,
        )
    }

    /// The row-number rank this placeholder selects, and the sort direction
    /// that produces it: offset `0` is the latest value, `-k` the k+1-th
    /// latest, `+k` the k-th earliest.
    pub fn rank_and_direction(&self) -> (u32, &'static str) {
        if self.offset > 0 {
            (self.offset as u32, "asc")
        } else {
            (self.offset.unsigned_abs() + 1, "desc")
        }
    }

    /// Serialize back to placeholder text.
    pub fn format(&self) -> String {
        format!(
            "__PSDE_CTE_PLACEHOLDER__(psUid='{}', deUid='{}', offset='{}', boundaryHash='{}', piUid='{}')",
            self.program_stage_uid,
            self.data_element_uid,
            self.offset,
            self.boundary_hash,
            self.indicator_uid
        )
    }

    fn parse_at(text: &str, pos: usize) -> Option<(Self, usize)> {
        let mut cur = Cursor::new(text, pos);
        cur.eat(PSDE_MARKER)?;
        cur.skip_spaces();
        let program_stage_uid = cur.field("psUid", is_ident_char)?;
        cur.separator()?;
        let data_element_uid = cur.field("deUid", is_ident_char)?;
        cur.separator()?;
        let offset = cur.field("offset", is_offset_char)?.parse().ok()?;
        cur.separator()?;
        let boundary_hash = cur.field("boundaryHash", is_ident_char)?;
        cur.separator()?;
        let indicator_uid = cur.field("piUid", is_ident_char)?;
        cur.skip_spaces();
        cur.eat(")")?;
        let placeholder = Self {
            program_stage_uid: program_stage_uid.to_string(),
            data_element_uid: data_element_uid.to_string(),
            offset,
            boundary_hash: boundary_hash.to_string(),
            indicator_uid: indicator_uid.to_string(),
        };
        Some((placeholder, cur.pos))
    }
}

/// A parsed `__D2FUNC__(...)__` placeholder. The argument SQL is carried
/// base64-encoded on the wire and decoded during parsing; a payload that does
/// not decode to UTF-8 text makes the whole candidate malformed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct D2FunctionPlaceholder {
    pub function: String,
    pub program_stage_uid: String,
    pub data_element_uid: String,
    pub argument_type: String,
    /// The decoded argument SQL.
    pub argument_sql: String,
    pub boundary_hash: String,
    pub indicator_uid: String,
}

impl D2FunctionPlaceholder {
    pub fn cte_key(&self) -> String {
        keys::d2_function_cte_key(
            &self.function,
            &self.program_stage_uid,
            &self.data_element_uid,
            &self.argument_sql,
            &self.boundary_hash,
            &self.indicator_uid,
        )
    }

    /// Serialize back to placeholder text, re-encoding the argument SQL.
    pub fn format(&self) -> String {
        format!(
            "__D2FUNC__(func='{}', ps='{}', de='{}', argType='{}', arg64='{}', hash='{}', pi='{}')__",
            self.function,
            self.program_stage_uid,
            self.data_element_uid,
            self.argument_type,
            BASE64.encode(self.argument_sql.as_bytes()),
            self.boundary_hash,
            self.indicator_uid
        )
    }

    fn parse_at(text: &str, pos: usize) -> Option<(Self, usize)> {
        let mut cur = Cursor::new(text, pos);
        cur.eat(D2_FUNCTION_MARKER)?;
        cur.skip_spaces();
        let function = cur.field("func", is_ident_char)?;
        cur.separator()?;
        let program_stage_uid = cur.field("ps", is_ident_char)?;
        cur.separator()?;
        let data_element_uid = cur.field("de", is_ident_char)?;
        cur.separator()?;
        let argument_type = cur.field("argType", is_ident_char)?;
        cur.separator()?;
        let argument_b64 = cur.field("arg64", is_base64_char)?;
        cur.separator()?;
        let boundary_hash = cur.field("hash", is_ident_char)?;
        cur.separator()?;
        let indicator_uid = cur.field("pi", is_ident_char)?;
        cur.skip_spaces();
        cur.eat(")__")?;
        let argument_sql = String::from_utf8(BASE64.decode(argument_b64).ok()?).ok()?;
        let placeholder = Self {
            function: function.to_string(),
            program_stage_uid: program_stage_uid.to_string(),
            data_element_uid: data_element_uid.to_string(),
            argument_type: argument_type.to_string(),
            argument_sql,
            boundary_hash: boundary_hash.to_string(),
            indicator_uid: indicator_uid.to_string(),
        };
        Some((placeholder, cur.pos))
    }
}

/// Scan `raw` for variable placeholders, returning each distinct instance
/// (by exact source text) in first-seen order.
pub fn scan_variable_placeholders(raw: &str) -> Vec<(String, VariablePlaceholder)> {
    scan_distinct(raw, VARIABLE_MARKER, VariablePlaceholder::parse_at)
}

/// Scan `raw` for program-stage-data-element placeholders.
pub fn scan_psde_placeholders(raw: &str) -> Vec<(String, PsdePlaceholder)> {
    scan_distinct(raw, PSDE_MARKER, PsdePlaceholder::parse_at)
}

/// Scan `raw` for d2-function placeholders.
pub fn scan_d2_function_placeholders(raw: &str) -> Vec<(String, D2FunctionPlaceholder)> {
    scan_distinct(raw, D2_FUNCTION_MARKER, D2FunctionPlaceholder::parse_at)
}

fn scan_distinct<T>(
    raw: &str,
    marker: &str,
    parse_at: impl Fn(&str, usize) -> Option<(T, usize)>,
) -> Vec<(String, T)> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut pos = 0;
    while let Some(offset) = raw[pos..].find(marker) {
        let at = pos + offset;
        match parse_at(raw, at) {
            Some((parsed, end)) => {
                let text = &raw[at..end];
                if seen.insert(text.to_string()) {
                    found.push((text.to_string(), parsed));
                }
                pos = end;
            }
            // Not a well-formed placeholder; leave it as plain text.
            None => pos = at + marker.len(),
        }
    }
    found
}

// =============================================================================
// Cursor
// =============================================================================

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(text: &'a str, pos: usize) -> Self {
        Self { text, pos }
    }

    fn eat(&mut self, literal: &str) -> Option<()> {
        if self.text[self.pos..].starts_with(literal) {
            self.pos += literal.len();
            Some(())
        } else {
            None
        }
    }

    fn skip_spaces(&mut self) {
        while self.text[self.pos..].starts_with(' ') {
            self.pos += 1;
        }
    }

    /// A comma separator with optional trailing spaces.
    fn separator(&mut self) -> Option<()> {
        self.eat(",")?;
        self.skip_spaces();
        Some(())
    }

    /// `name='value'` where every value char satisfies `pred`; the value must
    /// be non-empty.
    fn field(&mut self, name: &str, pred: impl Fn(char) -> bool) -> Option<&'a str> {
        self.eat(name)?;
        self.eat("='")?;
        let value = self.take_while(|c| c != '\'' && pred(c));
        if value.is_empty() {
            return None;
        }
        self.eat("'")?;
        Some(value)
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        for (i, c) in self.text[start..].char_indices() {
            if !pred(c) {
                self.pos = start + i;
                return &self.text[start..self.pos];
            }
        }
        self.pos = self.text.len();
        &self.text[start..]
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn is_offset_char(c: char) -> bool {
    c.is_ascii_digit() || c == '-'
}

fn is_base64_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='
}
