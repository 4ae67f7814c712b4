//! Step Validator
//!
//! Declarative per-field rules evaluated against a [`Payload`]. Validation is a
//! pure read of the payload: it never mutates wizard state and never performs I/O.

use regex::Regex;
use serde_json::Value;

use crate::config::Messages;

use super::steps::StepDefinition;
use super::types::{FieldErrors, Payload, ValidationResult, WizardError};

// ============================================================================
// Field Rules
// ============================================================================

/// A single declarative rule for one payload field.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub field: String,
    pub required: bool,
    pub pattern: Option<Regex>,
    /// Overrides both the required and the format message for this field.
    pub message: Option<String>,
}

impl FieldRule {
    pub fn optional(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            required: false,
            pattern: None,
            message: None,
        }
    }

    pub fn required(field: impl Into<String>) -> Self {
        Self {
            required: true,
            ..Self::optional(field)
        }
    }

    /// Constrain present values to a regular expression.
    pub fn matching(mut self, pattern: &str) -> Result<Self, WizardError> {
        let regex = Regex::new(pattern).map_err(|e| WizardError::InvalidRule {
            field: self.field.clone(),
            reason: e.to_string(),
        })?;
        self.pattern = Some(regex);
        Ok(self)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Check one payload against this rule.
    ///
    /// Returns the error message if the rule is violated.
    pub fn check(&self, payload: &Payload, messages: &Messages) -> Option<String> {
        let value = payload.get(&self.field);

        if is_missing(value) {
            if self.required {
                return Some(
                    self.message
                        .clone()
                        .unwrap_or_else(|| messages.required_for(&self.field)),
                );
            }
            return None;
        }

        let (Some(pattern), Some(value)) = (&self.pattern, value) else {
            return None;
        };

        if matches_pattern(pattern, value) {
            None
        } else {
            Some(
                self.message
                    .clone()
                    .unwrap_or_else(|| messages.invalid_format_for(&self.field)),
            )
        }
    }
}

/// Whether a payload value counts as absent.
///
/// Only absent keys, `null` and the empty string are missing. Zero, `false`,
/// whitespace and empty lists are real answers; flows that need a non-empty
/// list say so in their own checks.
pub fn is_missing(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn matches_pattern(pattern: &Regex, value: &Value) -> bool {
    match value {
        Value::String(s) => pattern.is_match(s),
        Value::Number(n) => pattern.is_match(&n.to_string()),
        Value::Bool(b) => pattern.is_match(if *b { "true" } else { "false" }),
        // Multi-value inputs: every entry must match
        Value::Array(items) => items.iter().all(|item| match item {
            Value::Array(_) | Value::Object(_) => false,
            other => matches_pattern(pattern, other),
        }),
        Value::Null | Value::Object(_) => false,
    }
}

// ============================================================================
// Step Validator
// ============================================================================

/// Evaluates a step's rules and custom check against the current payload.
#[derive(Debug, Clone, Default)]
pub struct StepValidator {
    messages: Messages,
}

impl StepValidator {
    pub fn new(messages: Messages) -> Self {
        Self { messages }
    }

    pub fn messages(&self) -> &Messages {
        &self.messages
    }

    /// Validate a step. Violations on several fields accumulate into one map.
    pub fn validate(&self, step: &StepDefinition, payload: &Payload) -> ValidationResult {
        let mut result = ValidationResult::valid();

        for rule in &step.rules {
            if let Some(message) = rule.check(payload, &self.messages) {
                result.add_error(rule.field.clone(), message);
            }
        }

        if let Some(check) = &step.check {
            result.extend(check(payload, &self.messages));
        }

        result
    }

    /// Validate a bare rule list, for callers that have no step definition.
    pub fn validate_rules(&self, rules: &[FieldRule], payload: &Payload) -> ValidationResult {
        let mut errors = FieldErrors::new();
        for rule in rules {
            if let Some(message) = rule.check(payload, &self.messages) {
                errors.entry(rule.field.clone()).or_insert(message);
            }
        }
        ValidationResult::from_errors(errors)
    }
}

// ============================================================================
// Tests
// ============================================================================
