//! Wizard Domain Types
//!
//! Defines the core domain types shared by the controller, validator and gateway:
//! - [`Payload`]: Accumulated answers keyed by field name
//! - [`WizardState`]: Step position, linearity, payload and in-flight flag
//! - [`ValidationResult`]: Outcome of validating one step
//! - [`StepChange`]: Outcome of a navigation request
//! - [`WizardError`]: Error types for wizard operations
//!
//! # Architecture
//!
//! A wizard session is a single [`WizardState`] value owned by the
//! [`WizardController`](super::WizardController). Validators only read it and
//! the gateway only sees requests built from it. The state is never reconstructed
//! from the UI; the host binding pushes input into it and reads it back out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ConfigError;

/// Answers collected across steps, keyed by field name.
pub type Payload = serde_json::Map<String, Value>;

/// Validation messages keyed by field name.
pub type FieldErrors = BTreeMap<String, String>;

// ============================================================================
// Wizard Phase
// ============================================================================

/// Where a session sits in the step state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "step")]
pub enum WizardPhase {
    /// No session is open (never initialized, or closed).
    Closed,
    /// On a 1-based step.
    Step(usize),
    /// Terminal state after a successful final submission.
    Complete,
}

impl std::fmt::Display for WizardPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WizardPhase::Closed => write!(f, "closed"),
            WizardPhase::Step(step) => write!(f, "step {}", step),
            WizardPhase::Complete => write!(f, "complete"),
        }
    }
}

// ============================================================================
// Wizard State
// ============================================================================

/// Mutable bag of collected answers for one wizard session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WizardState {
    pub current_step: usize,
    pub total_steps: usize,
    /// Whether forward navigation requires earlier steps to validate.
    pub is_linear: bool,
    pub payload: Payload,
    /// True while a remote call is in flight.
    pub is_processing: bool,
    pub complete: bool,
}

impl WizardState {
    /// Create the initial state for a session.
    ///
    /// `total_steps` is clamped to at least one so the bounds invariant holds
    /// even for hand-built states; configuration parsing rejects zero earlier.
    pub fn new(total_steps: usize, is_linear: bool, payload: Payload) -> Self {
        Self {
            current_step: 1,
            total_steps: total_steps.max(1),
            is_linear,
            payload,
            is_processing: false,
            complete: false,
        }
    }

    pub fn phase(&self) -> WizardPhase {
        if self.complete {
            WizardPhase::Complete
        } else {
            WizardPhase::Step(self.current_step)
        }
    }

    pub fn contains_step(&self, step: usize) -> bool {
        (1..=self.total_steps).contains(&step)
    }

    pub fn is_first_step(&self) -> bool {
        self.current_step == 1
    }

    pub fn is_last_step(&self) -> bool {
        self.current_step == self.total_steps
    }

    /// Merge fields into the payload. Existing keys are overwritten, none are removed.
    pub fn merge(&mut self, fields: Payload) {
        for (key, value) in fields {
            self.payload.insert(key, value);
        }
    }

    /// Get progress percentage (0-100)
    pub fn progress_percent(&self) -> u8 {
        if self.complete {
            return 100;
        }
        let done = self.current_step.saturating_sub(1);
        ((done as f32 / self.total_steps as f32) * 100.0) as u8
    }
}

// ============================================================================
// Validation Result
// ============================================================================

/// Result of validating one step. Produced fresh on every call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: FieldErrors,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: FieldErrors::new(),
        }
    }

    pub fn from_errors(errors: FieldErrors) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    /// Record an error for a field. The first message per field wins.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
        self.valid = false;
    }

    pub fn extend(&mut self, errors: FieldErrors) {
        for (field, message) in errors {
            self.add_error(field, message);
        }
    }
}

// ============================================================================
// Navigation Outcome
// ============================================================================

/// Outcome of `go_to_step`, `next` and `previous`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepChange {
    /// The current step changed.
    Moved { from: usize, to: usize },
    /// Nothing happened: target out of bounds, already there, or the session
    /// is not on a step.
    Stayed,
    /// Linear gating stopped the move at `step`.
    Blocked { step: usize, errors: FieldErrors },
}

impl StepChange {
    pub fn moved(&self) -> bool {
        matches!(self, StepChange::Moved { .. })
    }

    pub fn errors(&self) -> Option<&FieldErrors> {
        match self {
            StepChange::Blocked { errors, .. } => Some(errors),
            _ => None,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during wizard operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum WizardError {
    #[error("Invalid wizard configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("Invalid rule for {field}: {reason}")]
    InvalidRule { field: String, reason: String },

    #[error("No URL configured for endpoint '{0}'")]
    UnknownEndpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for WizardError {
    fn from(err: serde_json::Error) -> Self {
        WizardError::Serialization(err.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
