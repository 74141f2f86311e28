//! Pre-install validation of packages against the target server.
//!
//! Outcomes are data, not errors: each finding is a [`ValidationResult`]
//! with error or warning severity.

pub mod validator;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::dependency::Dependency;
use crate::types::DependencyKey;

pub use validator::DependencyValidator;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub key: DependencyKey,
    pub display_name: String,
    pub type_code: String,
    pub is_error: bool,
    pub is_warning: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn error(dependency: &Dependency, message: impl Into<String>) -> Self {
        Self::new(dependency, true, message)
    }

    pub fn warning(dependency: &Dependency, message: impl Into<String>) -> Self {
        Self::new(dependency, false, message)
    }

    fn new(dependency: &Dependency, is_error: bool, message: impl Into<String>) -> Self {
        Self {
            key: dependency.key(),
            display_name: dependency.display_name.clone(),
            type_code: dependency.type_code.clone(),
            is_error,
            is_warning: !is_error,
            message: message.into(),
        }
    }
}

/// Ordered validation findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationResults {
    results: Vec<ValidationResult>,
}

impl ValidationResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: ValidationResult) {
        self.results.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ValidationResult>) {
        self.results.extend(results);
    }

    pub fn for_dependency(&self, key: &DependencyKey) -> Vec<&ValidationResult> {
        self.results.iter().filter(|r| &r.key == key).collect()
    }

    pub fn has_errors(&self) -> bool {
        self.results.iter().any(|r| r.is_error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| r.is_warning)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

impl<'a> IntoIterator for &'a ValidationResults {
    type Item = &'a ValidationResult;
    type IntoIter = std::slice::Iter<'a, ValidationResult>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}

/// Results computed earlier in a run, shared across packages.
#[derive(Debug, Default)]
pub struct ValidationContext {
    prior: HashMap<DependencyKey, PriorResult>,
}

#[derive(Debug, Clone)]
struct PriorResult {
    package: String,
    results: Vec<ValidationResult>,
}

impl ValidationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Results recorded for `key` by a package other than `package`.
    pub fn prior_from_other(&self, key: &DependencyKey, package: &str) -> Option<&[ValidationResult]> {
        self.prior
            .get(key)
            .filter(|prior| prior.package != package)
            .map(|prior| prior.results.as_slice())
    }

    /// Keep the first package's results for `key`.
    pub fn record(&mut self, key: DependencyKey, package: &str, results: &[ValidationResult]) {
        self.prior.entry(key).or_insert_with(|| PriorResult {
            package: package.to_string(),
            results: results.to_vec(),
        });
    }

    pub fn len(&self) -> usize {
        self.prior.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prior.is_empty()
    }
}
