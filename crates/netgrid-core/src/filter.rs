//! Collection filter expressions for `GET /1.0/networks?filter=...`.
//!
//! Supports conjunctions of simple comparisons, e.g.
//! `type eq bridge and managed eq true`. Values with spaces can be
//! double-quoted.

use thiserror::Error;

use crate::types::Network;

#[derive(Debug, Error, PartialEq)]
pub enum FilterError {
    #[error("incomplete clause at {0:?}")]
    IncompleteClause(String),

    #[error("unknown operator {0:?}")]
    UnknownOperator(String),

    #[error("unknown field {0:?}")]
    UnknownField(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Eq,
    Ne,
}

/// One `field op value` comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    field: String,
    operator: Operator,
    value: String,
}

/// A parsed filter expression: a conjunction of clauses.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterClauses {
    clauses: Vec<Clause>,
}

impl FilterClauses {
    /// Parse a filter string. An empty string parses to no clauses.
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(input);
        let mut clauses = Vec::new();
        let mut iter = tokens.into_iter().peekable();

        while iter.peek().is_some() {
            let field = iter.next().unwrap();
            let op = iter
                .next()
                .ok_or_else(|| FilterError::IncompleteClause(field.clone()))?;
            let value = iter
                .next()
                .ok_or_else(|| FilterError::IncompleteClause(field.clone()))?;

            let operator = match op.as_str() {
                "eq" => Operator::Eq,
                "ne" => Operator::Ne,
                _ => return Err(FilterError::UnknownOperator(op)),
            };

            clauses.push(Clause {
                field,
                operator,
                value,
            });

            // Clauses are joined by "and"; a trailing connective is ignored.
            if let Some(token) = iter.peek() {
                if token == "and" {
                    iter.next();
                }
            }
        }

        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Evaluate the filter against a network record.
    pub fn matches(&self, net: &Network) -> Result<bool, FilterError> {
        for clause in &self.clauses {
            let actual = field_value(net, &clause.field)
                .ok_or_else(|| FilterError::UnknownField(clause.field.clone()))?;

            let hit = actual.eq_ignore_ascii_case(&clause.value);
            let wanted = match clause.operator {
                Operator::Eq => hit,
                Operator::Ne => !hit,
            };

            if !wanted {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn field_value(net: &Network, field: &str) -> Option<String> {
    match field {
        "name" => Some(net.name.clone()),
        "type" => Some(net.network_type.clone()),
        "status" => Some(net.status.to_string()),
        "managed" => Some(net.managed.to_string()),
        "project" => Some(net.project.clone()),
        "description" => Some(net.description.clone()),
        _ => None,
    }
}

/// Split on whitespace, honoring double quotes.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;

    for c in input.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if !current.is_empty() {
        tokens.push(current);
    }

    tokens
}
