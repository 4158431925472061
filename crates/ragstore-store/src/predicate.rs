//! SQL-like predicates over the documents table.
//!
//! The builder half turns caller filters into predicate strings that the
//! backend understands. The evaluator half parses that same dialect so the
//! in-memory backend can apply it:
//!
//! ```text
//! predicate   := conjunction ( OR conjunction )*
//! conjunction := comparison ( AND comparison )*
//! comparison  := column ( = | != | <> ) literal
//! literal     := 'string' | number | true | false
//! ```

use ragstore_core::{columns, Document, Error, StoreError};
use std::collections::BTreeMap;
use std::fmt;

/// Predicate that matches every row.
pub const MATCH_ALL: &str = "id != ''";

/// A filter value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for FilterValue {
    /// Renders the value as a predicate literal.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "'{}'", escape_sql_string(s)),
            Self::Int(n) => write!(f, "{n}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for FilterValue {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for FilterValue {
    fn from(x: f64) -> Self {
        Self::Float(x)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// Equality filters keyed by column name. Ordered so predicates are stable.
pub type Filters = BTreeMap<String, FilterValue>;

/// Escape a string for use inside a single-quoted literal.
///
/// Backslashes are doubled, single quotes doubled and NUL bytes dropped.
pub fn escape_sql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\0' => {}
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("''"),
            _ => out.push(c),
        }
    }
    out
}

/// `column = 'value'` with the value escaped.
pub fn eq_predicate(column: &str, value: &str) -> String {
    format!("{column} = '{}'", escape_sql_string(value))
}

/// Predicate matching any of `ids`. Empty input yields `None`.
pub fn ids_predicate<S: AsRef<str>>(ids: &[S]) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    Some(
        ids.iter()
            .map(|id| eq_predicate(columns::ID, id.as_ref()))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Build an AND predicate from equality filters.
///
/// Keys outside [`columns::FILTERABLE`] are rejected. Empty filters yield
/// `None`.
pub fn build_predicate(filters: &Filters) -> Result<Option<String>, Error> {
    if filters.is_empty() {
        return Ok(None);
    }
    let mut clauses = Vec::with_capacity(filters.len());
    for (key, value) in filters {
        if !columns::FILTERABLE.contains(&key.as_str()) {
            return Err(Error::validation(format!(
                "invalid filter key {key:?}: allowed keys are {}",
                columns::FILTERABLE.join(", ")
            )));
        }
        clauses.push(format!("{key} = {value}"));
    }
    Ok(Some(clauses.join(" AND ")))
}

// ============================================================================
// Evaluation
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Literal {
    Str(String),
    Num(f64),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
}

#[derive(Debug, Clone, PartialEq)]
struct Comparison {
    column: String,
    op: Op,
    value: Literal,
}

/// A parsed predicate, in disjunctive normal form.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    any_of: Vec<Vec<Comparison>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Eq,
    Ne,
}

fn tokenize(input: &str) -> Result<Vec<Token>, StoreError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' | '<' => {
                let expect = if c == '!' { '=' } else { '>' };
                if chars.get(i + 1) != Some(&expect) {
                    return Err(StoreError::Predicate(format!(
                        "unexpected {c:?} at offset {i}"
                    )));
                }
                tokens.push(Token::Ne);
                i += 2;
            }
            '\'' => {
                let mut s = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => {
                            return Err(StoreError::Predicate(
                                "unterminated string literal".to_string(),
                            ))
                        }
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => {
                            s.push('\'');
                            i += 2;
                        }
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some('\\') if i + 1 < chars.len() => {
                            s.push(chars[i + 1]);
                            i += 2;
                        }
                        Some(ch) => {
                            s.push(*ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(s));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|e| StoreError::Predicate(format!("bad number {text:?}: {e}")))?;
                tokens.push(Token::Num(n));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Ident(chars[start..i].iter().collect()));
            }
            other => {
                return Err(StoreError::Predicate(format!(
                    "unexpected {other:?} at offset {i}"
                )))
            }
        }
    }
    Ok(tokens)
}

fn is_keyword(token: Option<&Token>, keyword: &str) -> bool {
    matches!(token, Some(Token::Ident(s)) if s.eq_ignore_ascii_case(keyword))
}

impl Predicate {
    /// Parse a predicate string.
    pub fn parse(input: &str) -> Result<Self, StoreError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Err(StoreError::Predicate("empty predicate".to_string()));
        }

        let mut any_of = vec![Vec::new()];
        let mut pos = 0;
        loop {
            let column = match tokens.get(pos) {
                Some(Token::Ident(name)) => name.clone(),
                other => {
                    return Err(StoreError::Predicate(format!(
                        "expected column name, found {other:?}"
                    )))
                }
            };
            let op = match tokens.get(pos + 1) {
                Some(Token::Eq) => Op::Eq,
                Some(Token::Ne) => Op::Ne,
                other => {
                    return Err(StoreError::Predicate(format!(
                        "expected comparison after {column}, found {other:?}"
                    )))
                }
            };
            let value = match tokens.get(pos + 2) {
                Some(Token::Str(s)) => Literal::Str(s.clone()),
                Some(Token::Num(n)) => Literal::Num(*n),
                Some(Token::Ident(s)) if s.eq_ignore_ascii_case("true") => Literal::Bool(true),
                Some(Token::Ident(s)) if s.eq_ignore_ascii_case("false") => Literal::Bool(false),
                other => {
                    return Err(StoreError::Predicate(format!(
                        "expected literal after {column}, found {other:?}"
                    )))
                }
            };
            if let Some(clause) = any_of.last_mut() {
                clause.push(Comparison { column, op, value });
            }
            pos += 3;

            let next = tokens.get(pos);
            if next.is_none() {
                break;
            } else if is_keyword(next, "and") {
                pos += 1;
            } else if is_keyword(next, "or") {
                any_of.push(Vec::new());
                pos += 1;
            } else {
                return Err(StoreError::Predicate(format!(
                    "expected AND or OR, found {next:?}"
                )));
            }
        }

        Ok(Self { any_of })
    }

    /// Whether `doc` satisfies the predicate.
    pub fn matches(&self, doc: &Document) -> bool {
        self.any_of
            .iter()
            .any(|clause| clause.iter().all(|cmp| cmp.matches(doc)))
    }
}

impl Comparison {
    fn matches(&self, doc: &Document) -> bool {
        let Some(actual) = column_value(doc, &self.column) else {
            return false;
        };
        let equal = match &self.value {
            Literal::Str(s) => actual == *s,
            Literal::Num(n) => actual.parse::<f64>().is_ok_and(|v| v == *n),
            Literal::Bool(b) => actual.parse::<bool>().is_ok_and(|v| v == *b),
        };
        match self.op {
            Op::Eq => equal,
            Op::Ne => !equal,
        }
    }
}

fn column_value(doc: &Document, column: &str) -> Option<String> {
    match column {
        columns::ID => Some(doc.id.clone()),
        columns::TEXT => Some(doc.text.clone()),
        columns::DOCUMENT_NAME => Some(doc.document_name.clone()),
        columns::METADATA => doc.metadata_json().ok(),
        _ => None,
    }
}
