// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Label selectors.
//!
//! Supports the equality-based subset of the usual selector grammar:
//! `key=value`, `key==value`, `key!=value`, `key`, `!key` and
//! `key in (a,b)`, joined by commas.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::labels::Labels;

/// Errors from parsing a selector string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty key in selector term '{0}'")]
    EmptyKey(String),
    #[error("malformed set expression in '{0}'")]
    MalformedSet(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
    In(String, Vec<String>),
}

impl Requirement {
    fn matches(&self, labels: &Labels) -> bool {
        match self {
            Self::Equals(k, v) => labels.get(k) == Some(v),
            Self::NotEquals(k, v) => labels.get(k) != Some(v),
            Self::Exists(k) => labels.contains_key(k),
            Self::NotExists(k) => !labels.contains_key(k),
            Self::In(k, values) => labels.get(k).is_some_and(|v| values.contains(v)),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals(k, v) => write!(f, "{}={}", k, v),
            Self::NotEquals(k, v) => write!(f, "{}!={}", k, v),
            Self::Exists(k) => f.write_str(k),
            Self::NotExists(k) => write!(f, "!{}", k),
            Self::In(k, values) => write!(f, "{} in ({})", k, values.join(",")),
        }
    }
}

/// A conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    requirements: Vec<Requirement>,
}

impl LabelSelector {
    /// Selector that matches every record.
    pub fn everything() -> Self {
        Self::default()
    }

    /// Add a `key=value` requirement.
    pub fn eq(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::Equals(key.into(), value.into()));
        self
    }

    /// Add a `key!=value` requirement.
    pub fn ne(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements
            .push(Requirement::NotEquals(key.into(), value.into()));
        self
    }

    /// Add a `key` (presence) requirement.
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement::Exists(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn matches(&self, labels: &Labels) -> bool {
        self.requirements.iter().all(|r| r.matches(labels))
    }

    fn parse_term(term: &str) -> Result<Requirement, SelectorError> {
        let non_empty = |k: &str| {
            let k = k.trim();
            if k.is_empty() {
                Err(SelectorError::EmptyKey(term.to_string()))
            } else {
                Ok(k.to_string())
            }
        };

        if let Some((key, rest)) = term.split_once(" in ") {
            let rest = rest.trim();
            let inner = rest
                .strip_prefix('(')
                .and_then(|r| r.strip_suffix(')'))
                .ok_or_else(|| SelectorError::MalformedSet(term.to_string()))?;
            let values = inner
                .split(',')
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .collect();
            return Ok(Requirement::In(non_empty(key)?, values));
        }
        if let Some((key, value)) = term.split_once("!=") {
            return Ok(Requirement::NotEquals(
                non_empty(key)?,
                value.trim().to_string(),
            ));
        }
        if let Some((key, value)) = term.split_once("==").or_else(|| term.split_once('=')) {
            return Ok(Requirement::Equals(non_empty(key)?, value.trim().to_string()));
        }
        if let Some(key) = term.strip_prefix('!') {
            return Ok(Requirement::NotExists(non_empty(key)?));
        }
        Ok(Requirement::Exists(non_empty(term)?))
    }
}

/// Split on commas that are not inside a `( ... )` set.
fn split_terms(input: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&input[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&input[start..]);
    terms
}

impl FromStr for LabelSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let requirements = split_terms(s)
            .into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(Self::parse_term)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { requirements })
    }
}

impl fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.requirements.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", r)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_and_match() {
        let sel: LabelSelector = "backrest-command=backup,pg-cluster=pg1,pgo-backrest=true"
            .parse()
            .unwrap();
        let unit = labels(&[
            ("backrest-command", "backup"),
            ("pg-cluster", "pg1"),
            ("pgo-backrest", "true"),
            ("vendor", "opflow"),
        ]);
        assert!(sel.matches(&unit));

        let other = labels(&[("backrest-command", "backup"), ("pg-cluster", "pg2")]);
        assert!(!sel.matches(&other));
    }

    #[test]
    fn test_not_equals_and_existence() {
        let sel: LabelSelector = "pg-cluster,role!=master,!pgo-backrest-repo".parse().unwrap();
        assert!(sel.matches(&labels(&[("pg-cluster", "pg1"), ("role", "replica")])));
        assert!(sel.matches(&labels(&[("pg-cluster", "pg1")])));
        assert!(!sel.matches(&labels(&[("pg-cluster", "pg1"), ("role", "master")])));
        assert!(!sel.matches(&labels(&[
            ("pg-cluster", "pg1"),
            ("pgo-backrest-repo", "true")
        ])));
        assert!(!sel.matches(&labels(&[("role", "replica")])));
    }

    #[test]
    fn test_set_membership() {
        let sel: LabelSelector = "pg-cluster in (pg1, pg2),env=prod".parse().unwrap();
        assert!(sel.matches(&labels(&[("pg-cluster", "pg2"), ("env", "prod")])));
        assert!(!sel.matches(&labels(&[("pg-cluster", "pg3"), ("env", "prod")])));
        assert_eq!(sel.to_string(), "pg-cluster in (pg1,pg2),env=prod");
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let sel: LabelSelector = "".parse().unwrap();
        assert!(sel.is_empty());
        assert!(sel.matches(&Labels::new()));
        assert_eq!(sel, LabelSelector::everything());
    }

    #[test]
    fn test_builder_renders_like_parsed() {
        let built = LabelSelector::everything()
            .eq("pg-cluster", "pg1")
            .ne("role", "master")
            .exists("deployment-name");
        let parsed: LabelSelector = built.to_string().parse().unwrap();
        assert_eq!(built, parsed);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            "=value".parse::<LabelSelector>(),
            Err(SelectorError::EmptyKey("=value".to_string()))
        );
        assert!(matches!(
            "env in prod".parse::<LabelSelector>(),
            Err(SelectorError::MalformedSet(_))
        ));
    }
}
