//! Heuristic source validators.
//!
//! Cheap keyword checks run when a version is stored. They do not replace
//! the tool's own `validate` step, which still runs in the pipeline.

use std::collections::HashMap;
use std::sync::Arc;

use provisio_core::{IacTool, ValidationStatus};

/// Status plus the reasons behind an `Invalid` verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub status: ValidationStatus,
    pub errors: Vec<String>,
}

impl ValidationOutcome {
    pub fn pending() -> Self {
        Self {
            status: ValidationStatus::Pending,
            errors: Vec::new(),
        }
    }

    fn from_errors(errors: Vec<String>) -> Self {
        let status = if errors.is_empty() {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Invalid
        };
        Self { status, errors }
    }
}

/// A tool-specific heuristic check.
pub trait CodeValidator: Send + Sync {
    fn validate(&self, source: &str) -> ValidationOutcome;
}

/// Non-empty source containing every keyword (case-insensitive).
pub struct KeywordValidator {
    keywords: &'static [&'static str],
}

impl KeywordValidator {
    pub const fn new(keywords: &'static [&'static str]) -> Self {
        Self { keywords }
    }
}

impl CodeValidator for KeywordValidator {
    fn validate(&self, source: &str) -> ValidationOutcome {
        let mut errors = Vec::new();
        if source.trim().is_empty() {
            errors.push("source is empty".to_string());
        }
        let lowered = source.to_lowercase();
        for keyword in self.keywords {
            if !lowered.contains(keyword) {
                errors.push(format!("required keyword `{keyword}` is missing"));
            }
        }
        ValidationOutcome::from_errors(errors)
    }
}

pub const TERRAFORM_KEYWORDS: &[&str] = &["resource", "provider"];
pub const ANSIBLE_KEYWORDS: &[&str] = &["hosts"];

/// Validators keyed by tool; tools without one validate as `pending`.
#[derive(Clone)]
pub struct ValidatorRegistry {
    validators: HashMap<IacTool, Arc<dyn CodeValidator>>,
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::empty()
            .with(IacTool::Terraform, KeywordValidator::new(TERRAFORM_KEYWORDS))
            .with(IacTool::Ansible, KeywordValidator::new(ANSIBLE_KEYWORDS))
    }
}

impl ValidatorRegistry {
    pub fn empty() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    pub fn with(mut self, tool: IacTool, validator: impl CodeValidator + 'static) -> Self {
        self.validators.insert(tool, Arc::new(validator));
        self
    }

    pub fn validate(&self, source: &str, tool: IacTool) -> ValidationOutcome {
        match self.validators.get(&tool) {
            Some(v) => v.validate(source),
            None => ValidationOutcome::pending(),
        }
    }
}
