//! Read-only gate in front of the store.
//!
//! A sanitized statement passes three independent checks before it may run:
//!
//! 1. it opens with `SELECT`;
//! 2. no mutating keyword appears as a whole word followed by whitespace;
//! 3. it parses as exactly one query, with no nested non-query statement,
//!    no `SELECT ... INTO`, and no locking clause.
//!
//! Text that does not parse is rejected. Only [`ValidatedQuery`] reaches the
//! executor, and it can only be built here.
use regex::Regex;
use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, SQLiteDialect};
use sqlparser::parser::{Parser, ParserError};
use std::ops::ControlFlow;
use std::sync::LazyLock;

use crate::error::PipelineError;
use crate::sanitize::{starts_with_select, SanitizedQuery};

static MUTATING_KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(update|delete|insert|drop|alter|truncate|create|replace|attach|detach|pragma|vacuum|grant|revoke)\s",
    )
    .expect("regex for mutating keywords")
});

/// A statement that passed every safety check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn validate(query: &SanitizedQuery) -> Result<ValidatedQuery, PipelineError> {
    match check(query.as_str()) {
        Ok(()) => Ok(ValidatedQuery(query.as_str().to_string())),
        Err(reason) => Err(PipelineError::SafetyViolation {
            statement: query.as_str().to_string(),
            reason,
        }),
    }
}

/// Predicate form of the gate.
pub fn is_safe(text: &str) -> bool {
    check(text).is_ok()
}

fn check(text: &str) -> Result<(), String> {
    if !starts_with_select(text) {
        return Err("statement does not start with SELECT".to_string());
    }
    if let Some(found) = MUTATING_KEYWORD.captures(text).and_then(|cap| cap.get(1)) {
        return Err(format!("mutating keyword {:?}", found.as_str().to_uppercase()));
    }
    let statements = parse(text).map_err(|err| format!("unparseable statement: {err}"))?;
    if statements.len() != 1 {
        return Err(format!("expected one statement, found {}", statements.len()));
    }
    let mut guard = ReadOnlyGuard;
    match statements[0].visit(&mut guard) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(reason) => Err(reason),
    }
}

/// SQLite first, then MySQL, then the generic dialect.
fn parse(text: &str) -> Result<Vec<Statement>, ParserError> {
    let dialects: [&dyn Dialect; 2] = [&SQLiteDialect {}, &MySqlDialect {}];
    for dialect in dialects {
        if let Ok(statements) = Parser::parse_sql(dialect, text) {
            return Ok(statements);
        }
    }
    Parser::parse_sql(&GenericDialect {}, text)
}

struct ReadOnlyGuard;

impl Visitor for ReadOnlyGuard {
    type Break = String;

    fn pre_visit_statement(&mut self, statement: &Statement) -> ControlFlow<String> {
        match statement {
            Statement::Query(_) => ControlFlow::Continue(()),
            other => ControlFlow::Break(format!("non-query statement: {}", statement_head(other))),
        }
    }

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<String> {
        if !query.locks.is_empty() {
            return ControlFlow::Break("locking clause".to_string());
        }
        if selects_into(&query.body) {
            return ControlFlow::Break("SELECT INTO".to_string());
        }
        ControlFlow::Continue(())
    }
}

fn selects_into(body: &SetExpr) -> bool {
    match body {
        SetExpr::Select(select) => select.into.is_some(),
        SetExpr::SetOperation { left, right, .. } => selects_into(left) || selects_into(right),
        SetExpr::Query(query) => selects_into(&query.body),
        _ => false,
    }
}

fn statement_head(statement: &Statement) -> String {
    statement
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sanitize::sanitize;

    fn reason(text: &str) -> String {
        check(text).unwrap_err()
    }

    #[test]
    fn test_plain_selects_pass() {
        assert!(is_safe("SELECT 1"));
        assert!(is_safe("select name, price from products where stock > 0 order by price desc limit 10"));
        assert!(is_safe(
            "SELECT p.name, SUM(oi.quantity) AS sold FROM order_items oi JOIN products p ON p.id = oi.product_id GROUP BY p.name ORDER BY sold DESC LIMIT 5"
        ));
        assert!(is_safe("SELECT id FROM a UNION SELECT id FROM b"));
        assert!(is_safe("SELECT replace(name, 'a', 'b') FROM products"));
        assert!(is_safe("SELECT updated FROM audit"));
    }

    #[test]
    fn test_mutations_are_rejected() {
        assert!(!is_safe("update users set x=1"));
        assert!(!is_safe("UPDATE users SET x = 1"));
        assert!(!is_safe("DROP TABLE products"));
        assert!(reason("SELECT 1; DELETE FROM products").contains("DELETE"));
    }

    #[test]
    fn test_injected_drop_is_rejected_after_sanitization() {
        let sanitized = sanitize("```sql\nSELECT * FROM t; DROP TABLE t\n```").unwrap();
        let err = validate(&sanitized).unwrap_err();
        assert_eq!(err.kind(), "safety_violation");
    }

    #[test]
    fn test_multiple_statements_are_rejected() {
        assert!(reason("SELECT 1; SELECT 2").contains("expected one statement"));
    }

    #[test]
    fn test_select_into_is_rejected() {
        assert_eq!(reason("SELECT * INTO backup FROM products"), "SELECT INTO");
    }

    #[test]
    fn test_locking_clause_is_rejected() {
        assert_eq!(reason("SELECT * FROM products FOR UPDATE"), "locking clause");
    }

    #[test]
    fn test_unparseable_text_is_rejected() {
        assert!(reason("SELECT FROM WHERE ((").starts_with("unparseable statement"));
    }

    #[test]
    fn test_validated_query_keeps_text() {
        let sanitized = sanitize("SELECT name FROM products;").unwrap();
        let validated = validate(&sanitized).unwrap();
        assert_eq!(validated.as_str(), "SELECT name FROM products");
    }
}
