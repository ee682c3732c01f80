//! Tag-filter expressions.
//!
//! Grammar: `clauses := clause ("," clause)*`;
//! `clause := key op values`; `op ∈ {"=", "!="}`;
//! `values := value ("|" value)*`.
//!
//! Semantics: AND across clauses, OR across values within a clause. Unknown
//! keys are parse errors, never silent non-matches. An empty filter matches
//! every instance.

use rockyard_error::{Result, RockyardError};

use crate::taxonomy::{Tags, is_tag_key};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    key: String,
    negated: bool,
    values: Vec<String>,
}

impl Clause {
    fn matches(&self, tags: &Tags) -> bool {
        let actual = tags.get(&self.key);
        let hit = self.values.iter().any(|value| value == actual);
        if self.negated { !hit } else { hit }
    }
}

/// A parsed AND-of-clauses filter over instance tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    clauses: Vec<Clause>,
}

impl Filter {
    /// Parse a filter expression; an empty expression yields the match-all
    /// filter.
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        if expression.is_empty() {
            return Ok(Self::default());
        }

        let mut clauses = Vec::new();
        for raw in expression.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                return Err(RockyardError::FilterParse(format!(
                    "empty clause in {expression:?}"
                )));
            }
            let (key, negated, rest) = if let Some((key, rest)) = raw.split_once("!=") {
                (key.trim(), true, rest.trim())
            } else if let Some((key, rest)) = raw.split_once('=') {
                (key.trim(), false, rest.trim())
            } else {
                return Err(RockyardError::FilterParse(format!(
                    "clause {raw:?} has no operator"
                )));
            };

            if !is_tag_key(key) {
                return Err(RockyardError::FilterParse(format!(
                    "unknown tag key {key:?}"
                )));
            }
            if rest.is_empty() {
                return Err(RockyardError::FilterParse(format!(
                    "clause {raw:?} has no values"
                )));
            }
            let values: Vec<String> = rest.split('|').map(|value| value.trim().to_owned()).collect();
            clauses.push(Clause {
                key: key.to_owned(),
                negated,
                values,
            });
        }

        Ok(Self { clauses })
    }

    /// Whether `tags` satisfies every clause.
    #[must_use]
    pub fn matches(&self, tags: &Tags) -> bool {
        self.clauses.iter().all(|clause| clause.matches(tags))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }
}
