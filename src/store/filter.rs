// src/store/filter.rs
//! Filter expressions such as
//! `source_name = {:source_name} && date_end >= @now` and sort specs like `+date_start,-title`.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::store::{format_datetime, parse_stored_datetime, Params, Record};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FilterError {
    #[error("unexpected character {0:?} at {1}")]
    UnexpectedChar(char, usize),
    #[error("unterminated {0}")]
    Unterminated(&'static str),
    #[error("expected {expected}, found {found}")]
    Expected { expected: &'static str, found: String },
    #[error("missing parameter {{:{0}}}")]
    MissingParam(String),
    #[error("invalid sort field {0:?}")]
    BadSort(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    /// Case-insensitive substring.
    Like,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Param(String),
    Now,
    Literal(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    All,
    Cmp { field: String, op: Op, operand: Operand },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Op(Op),
    Ident(String),
    Param(String),
    Now,
    Str(String),
    Num(f64),
}

fn describe(tok: Option<&Token>) -> String {
    match tok {
        None => "end of input".to_string(),
        Some(t) => format!("{t:?}"),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, FilterError> {
    let chars: Vec<char> = input.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                out.push(Token::LParen);
                i += 1;
            }
            ')' => {
                out.push(Token::RParen);
                i += 1;
            }
            '&' if chars.get(i + 1) == Some(&'&') => {
                out.push(Token::And);
                i += 2;
            }
            '|' if chars.get(i + 1) == Some(&'|') => {
                out.push(Token::Or);
                i += 2;
            }
            '=' => {
                out.push(Token::Op(Op::Eq));
                i += 1;
            }
            '~' => {
                out.push(Token::Op(Op::Like));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                out.push(Token::Op(Op::Ne));
                i += 2;
            }
            '>' | '<' => {
                let eq = chars.get(i + 1) == Some(&'=');
                let op = match (c, eq) {
                    ('>', true) => Op::Ge,
                    ('>', false) => Op::Gt,
                    ('<', true) => Op::Le,
                    _ => Op::Lt,
                };
                out.push(Token::Op(op));
                i += if eq { 2 } else { 1 };
            }
            '{' if chars.get(i + 1) == Some(&':') => {
                let start = i + 2;
                let end = chars[start..]
                    .iter()
                    .position(|&ch| ch == '}')
                    .map(|p| start + p)
                    .ok_or(FilterError::Unterminated("parameter"))?;
                out.push(Token::Param(chars[start..end].iter().collect::<String>().trim().to_string()));
                i = end + 1;
            }
            '@' => {
                let start = i + 1;
                let end = scan_ident(&chars, start);
                let word: String = chars[start..end].iter().collect();
                if word != "now" {
                    return Err(FilterError::UnexpectedChar('@', i));
                }
                out.push(Token::Now);
                i = end;
            }
            '\'' | '"' => {
                let quote = c;
                let mut s = String::new();
                let mut j = i + 1;
                loop {
                    match chars.get(j) {
                        None => return Err(FilterError::Unterminated("string")),
                        Some('\\') if j + 1 < chars.len() => {
                            s.push(chars[j + 1]);
                            j += 2;
                        }
                        Some(&ch) if ch == quote => break,
                        Some(&ch) => {
                            s.push(ch);
                            j += 1;
                        }
                    }
                }
                out.push(Token::Str(s));
                i = j + 1;
            }
            c if c.is_ascii_digit() || (c == '-' && chars.get(i + 1).is_some_and(|d| d.is_ascii_digit())) => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let n = text
                    .parse::<f64>()
                    .map_err(|_| FilterError::UnexpectedChar(c, start))?;
                out.push(Token::Num(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let end = scan_ident(&chars, i);
                out.push(Token::Ident(chars[i..end].iter().collect()));
                i = end;
            }
            other => return Err(FilterError::UnexpectedChar(other, i)),
        }
    }
    Ok(out)
}

fn scan_ident(chars: &[char], mut i: usize) -> usize {
    while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
        i += 1;
    }
    i
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn or_expr(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.primary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.primary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn primary(&mut self) -> Result<Expr, FilterError> {
        match self.next() {
            Some(Token::LParen) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    other => Err(FilterError::Expected {
                        expected: "')'",
                        found: describe(other.as_ref()),
                    }),
                }
            }
            Some(Token::Ident(field)) => {
                let op = match self.next() {
                    Some(Token::Op(op)) => op,
                    other => {
                        return Err(FilterError::Expected {
                            expected: "operator",
                            found: describe(other.as_ref()),
                        })
                    }
                };
                let operand = match self.next() {
                    Some(Token::Param(name)) => Operand::Param(name),
                    Some(Token::Now) => Operand::Now,
                    Some(Token::Str(s)) => Operand::Literal(Value::String(s)),
                    Some(Token::Num(n)) => Operand::Literal(Value::from(n)),
                    Some(Token::Ident(word)) => match word.as_str() {
                        "true" => Operand::Literal(Value::Bool(true)),
                        "false" => Operand::Literal(Value::Bool(false)),
                        "null" => Operand::Literal(Value::Null),
                        _ => {
                            return Err(FilterError::Expected {
                                expected: "value",
                                found: word.clone(),
                            })
                        }
                    },
                    other => {
                        return Err(FilterError::Expected {
                            expected: "value",
                            found: describe(other.as_ref()),
                        })
                    }
                };
                Ok(Expr::Cmp { field, op, operand })
            }
            other => Err(FilterError::Expected {
                expected: "field name or '('",
                found: describe(other.as_ref()),
            }),
        }
    }
}

/// Parsed filter expression; empty input matches every record.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    expr: Expr,
}

impl Filter {
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(input)?;
        if tokens.is_empty() {
            return Ok(Self { expr: Expr::All });
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        if let Some(extra) = parser.peek() {
            return Err(FilterError::Expected {
                expected: "end of input",
                found: format!("{extra:?}"),
            });
        }
        Ok(Self { expr })
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// Fails only when a `{:param}` has no binding.
    pub fn matches(
        &self,
        record: &Record,
        params: &Params,
        now: DateTime<Utc>,
    ) -> Result<bool, FilterError> {
        eval(&self.expr, record, params, now)
    }
}

fn eval(expr: &Expr, record: &Record, params: &Params, now: DateTime<Utc>) -> Result<bool, FilterError> {
    match expr {
        Expr::All => Ok(true),
        Expr::And(a, b) => Ok(eval(a, record, params, now)? && eval(b, record, params, now)?),
        Expr::Or(a, b) => Ok(eval(a, record, params, now)? || eval(b, record, params, now)?),
        Expr::Cmp { field, op, operand } => {
            let right = match operand {
                Operand::Param(name) => params
                    .get(name)
                    .cloned()
                    .ok_or_else(|| FilterError::MissingParam(name.clone()))?,
                Operand::Now => Value::String(format_datetime(now)),
                Operand::Literal(v) => v.clone(),
            };
            let left = record.field_value(field);
            Ok(apply(*op, &left, &right))
        }
    }
}

fn apply(op: Op, left: &Value, right: &Value) -> bool {
    match op {
        Op::Like => {
            let hay = as_text(left).to_lowercase();
            let needle = as_text(right).to_lowercase();
            !needle.is_empty() && hay.contains(&needle)
        }
        Op::Eq => compare_values(left, right) == Some(Ordering::Equal),
        Op::Ne => compare_values(left, right) != Some(Ordering::Equal),
        Op::Gt => compare_values(left, right) == Some(Ordering::Greater),
        Op::Ge => matches!(compare_values(left, right), Some(Ordering::Greater | Ordering::Equal)),
        Op::Lt => compare_values(left, right) == Some(Ordering::Less),
        Op::Le => matches!(compare_values(left, right), Some(Ordering::Less | Ordering::Equal)),
    }
}

fn as_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Datetimes when both sides parse as RFC 3339, numbers when both are numeric,
/// otherwise same-typed comparison. `None` when the values are incomparable.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::String(a), Value::String(b)) => {
            match (parse_stored_datetime(a), parse_stored_datetime(b)) {
                (Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::Number(a), Value::String(b)) => a.as_f64()?.partial_cmp(&b.trim().parse::<f64>().ok()?),
        (Value::String(a), Value::Number(b)) => a.trim().parse::<f64>().ok()?.partial_cmp(&b.as_f64()?),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub descending: bool,
}

/// `"+date_start,-title"`; a bare field sorts ascending.
pub fn parse_sort(text: &str) -> Result<Vec<SortKey>, FilterError> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|part| {
            let (descending, field) = match part.as_bytes()[0] {
                b'-' => (true, part[1..].trim()),
                b'+' => (false, part[1..].trim()),
                _ => (false, part),
            };
            let valid = !field.is_empty()
                && field.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.');
            if !valid {
                return Err(FilterError::BadSort(part.to_string()));
            }
            Ok(SortKey {
                field: field.to_string(),
                descending,
            })
        })
        .collect()
}

/// Nulls and incomparable values sort last in either direction.
pub fn compare_records(a: &Record, b: &Record, keys: &[SortKey]) -> Ordering {
    for key in keys {
        let va = a.field_value(&key.field);
        let vb = b.field_value(&key.field);
        let ord = match (va.is_null(), vb.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => {
                let o = compare_values(&va, &vb).unwrap_or(Ordering::Equal);
                if key.descending {
                    o.reverse()
                } else {
                    o
                }
            }
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{params, Collection};
    use chrono::TimeZone;
    use serde_json::json;

    fn record(fields: Value) -> Record {
        let mut r = Record::new(&Collection { name: "events".into() });
        for (k, v) in fields.as_object().unwrap() {
            r.set(k, v.clone());
        }
        r
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn lookup_filter_binds_params() {
        let f = Filter::parse("source_name = {:source_name} && source_id = {:source_id}").unwrap();
        let r = record(json!({"source_name": "odh", "source_id": "42"}));

        let hit = params([("source_name", "odh"), ("source_id", "42")]);
        let miss = params([("source_name", "odh"), ("source_id", "43")]);
        assert!(f.matches(&r, &hit, now()).unwrap());
        assert!(!f.matches(&r, &miss, now()).unwrap());
    }

    #[test]
    fn missing_param_is_an_error() {
        let f = Filter::parse("category = {:category}").unwrap();
        let r = record(json!({"category": "art"}));
        assert_eq!(
            f.matches(&r, &Params::new(), now()),
            Err(FilterError::MissingParam("category".into()))
        );
    }

    #[test]
    fn now_compares_as_datetime() {
        let f = Filter::parse("date_end >= @now").unwrap();
        let future = record(json!({"date_end": "2030-06-01T00:00:00.000Z"}));
        let past = record(json!({"date_end": "2029-06-01T00:00:00+02:00"}));
        assert!(f.matches(&future, &Params::new(), now()).unwrap());
        assert!(!f.matches(&past, &Params::new(), now()).unwrap());
    }

    #[test]
    fn precedence_and_parentheses() {
        let r = record(json!({"a": 1, "b": 2, "c": 3}));
        let p = Params::new();
        assert!(Filter::parse("a = 1 || b = 5 && c = 5").unwrap().matches(&r, &p, now()).unwrap());
        assert!(!Filter::parse("(a = 1 || b = 5) && c = 5").unwrap().matches(&r, &p, now()).unwrap());
        assert!(Filter::parse("a != 2 && b >= 2 && c < 3.5").unwrap().matches(&r, &p, now()).unwrap());
    }

    #[test]
    fn literals_and_like() {
        let r = record(json!({"title": "Jazz Night", "is_new": true, "image_url": null}));
        let p = Params::new();
        assert!(Filter::parse("title ~ 'jazz'").unwrap().matches(&r, &p, now()).unwrap());
        assert!(Filter::parse("is_new = true").unwrap().matches(&r, &p, now()).unwrap());
        assert!(Filter::parse("image_url = null").unwrap().matches(&r, &p, now()).unwrap());
        assert!(Filter::parse("missing = null").unwrap().matches(&r, &p, now()).unwrap());
    }

    #[test]
    fn empty_filter_matches_all() {
        let f = Filter::parse("   ").unwrap();
        assert_eq!(f.expr(), &Expr::All);
    }

    #[test]
    fn syntax_errors_are_reported() {
        assert!(Filter::parse("title =").is_err());
        assert!(Filter::parse("title = 'open").is_err());
        assert!(Filter::parse("= 3").is_err());
        assert!(Filter::parse("a = 1 b = 2").is_err());
        assert!(Filter::parse("a = {:x").is_err());
        assert!(Filter::parse("a = @later").is_err());
    }

    #[test]
    fn sort_spec_parses_and_orders() {
        let keys = parse_sort("+date_start, -title").unwrap();
        assert_eq!(keys.len(), 2);
        assert!(!keys[0].descending);
        assert!(keys[1].descending);
        assert!(parse_sort("+").is_err());

        let a = record(json!({"date_start": "2030-01-02T00:00:00.000Z", "title": "A"}));
        let b = record(json!({"date_start": "2030-01-01T00:00:00.000Z", "title": "B"}));
        let c = record(json!({"title": "C"}));
        let mut v = vec![a.clone(), c.clone(), b.clone()];
        v.sort_by(|x, y| compare_records(x, y, &keys));
        assert_eq!(v, vec![b, a, c]);
    }
}
