//! Header search.
//!
//! Expressions look like `tags=security,crypto#urls=example.com`: clauses
//! separated by `#`, each a field and a comma-separated list of values.
//! Values within a clause are ORed, clauses are ANDed.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use tracing::debug;

use crate::index::{GroupEntry, HeaderIndex};
use reevault_common::{Error, Result};

const CLAUSE_SEPARATOR: char = '#';
const VALUE_SEPARATOR: char = ',';

/// Parsed search expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    clauses: BTreeMap<String, Vec<String>>,
}

impl SearchQuery {
    /// Parse an expression.
    ///
    /// A repeated field replaces its earlier clause.
    ///
    /// # Errors
    /// Returns [`Error::MalformedSearch`] for a clause without `=`, with an
    /// empty field, or without any non-empty value.
    pub fn parse(expression: &str) -> Result<Self> {
        let mut clauses = BTreeMap::new();

        for clause in expression.split(CLAUSE_SEPARATOR) {
            let (field, values) = clause
                .split_once('=')
                .ok_or_else(|| Error::MalformedSearch(expression.to_string()))?;

            let field = field.trim();
            if field.is_empty() {
                return Err(Error::MalformedSearch(expression.to_string()));
            }

            let values: Vec<String> = values
                .split(VALUE_SEPARATOR)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect();
            if values.is_empty() {
                return Err(Error::MalformedSearch(expression.to_string()));
            }

            clauses.insert(field.to_string(), values);
        }

        Ok(Self { clauses })
    }

    /// Queried fields and their accepted values.
    pub fn clauses(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.clauses.iter().map(|(f, v)| (f.as_str(), v.as_slice()))
    }
}

impl FromStr for SearchQuery {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Evaluates queries against a header index.
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    index: &'a HeaderIndex,
}

impl<'a> QueryEngine<'a> {
    /// Bind to an index.
    pub fn new(index: &'a HeaderIndex) -> Self {
        Self { index }
    }

    /// Parse and evaluate an expression.
    ///
    /// A blank expression matches nothing.
    pub fn search(&self, expression: &str) -> Result<Vec<String>> {
        if expression.trim().is_empty() {
            return Ok(Vec::new());
        }
        let query = SearchQuery::parse(expression)?;
        Ok(self.evaluate(&query))
    }

    /// Sorted names matching every clause.
    ///
    /// A field that matches nothing, including a `single` field, empties
    /// the result.
    pub fn evaluate(&self, query: &SearchQuery) -> Vec<String> {
        let mut result: Option<BTreeSet<&str>> = None;

        for (field, values) in query.clauses() {
            let mut candidates = BTreeSet::new();

            if let Some(GroupEntry::Values(groups)) = self.index.group(field) {
                for value in values {
                    if let Some(names) = groups.get(value) {
                        candidates.extend(names.iter().map(String::as_str));
                    }
                }
            }

            result = Some(match result {
                None => candidates,
                Some(acc) => acc.intersection(&candidates).copied().collect(),
            });
        }

        let names: Vec<String> = result
            .unwrap_or_default()
            .into_iter()
            .map(str::to_string)
            .collect();
        debug!(matches = names.len(), "Search evaluated");
        names
    }
}
