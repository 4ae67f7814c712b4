//! Wizard Controller
//!
//! Sequences the user through an ordered list of steps, gates forward movement
//! on validation and performs the final submission.
//!
//! # State machine
//!
//! ```text
//! Closed --initialize--> Step(1) <--next/previous/go_to_step--> Step(n)
//! Step(total) --submit ok--> Complete
//! Step(total) --submit rejected--> Step(total)
//! any --close--> Closed
//! ```
//!
//! Nothing leaves `Complete` except `initialize`, `reset` or `close`.
//!
//! # Concurrency
//!
//! All operations take `&self`. Navigation is synchronous. `submit` and
//! `check_step` set `is_processing` before awaiting the gateway and clear it
//! when the response arrives, so a second call while one is in flight returns
//! [`SubmitOutcome::Busy`] without touching the network. The lock is never held
//! across an await. Every `initialize`/`reset`/`close` starts a new session
//! generation; a response that arrives for an older generation is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::WizardConfig;
use crate::core::gateway::{FileAttachment, RemoteGateway, RemoteRequest, RemoteResponse};

use super::steps::StepDefinition;
use super::types::{
    FieldErrors, Payload, StepChange, ValidationResult, WizardError, WizardPhase, WizardState,
};
use super::validator::StepValidator;

/// Endpoint key used for the final submission unless overridden.
pub const DEFAULT_SUBMIT_ENDPOINT: &str = "submit";

// ============================================================================
// Outcomes
// ============================================================================

/// Result of [`WizardController::submit`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// The backend accepted the submission; the wizard is now complete.
    Completed { response: RemoteResponse },
    /// The backend (or transport) rejected it; the user may fix input and retry.
    Rejected {
        message: String,
        errors: Option<FieldErrors>,
    },
    /// A step failed local validation; nothing was sent. Linear wizards check
    /// every step, others only the final one.
    Invalid { step: usize, errors: FieldErrors },
    /// A remote call is already in flight; nothing was sent.
    Busy,
    /// Not on the final step; nothing was sent.
    NotOnFinalStep,
    /// No open session, or the session is already complete.
    Inactive,
    /// The session was closed or reinitialized while the call was in flight.
    Discarded,
}

/// Result of [`WizardController::check_step`].
#[derive(Debug, Clone, PartialEq)]
pub enum StepCheckOutcome {
    /// The server accepted the step; its data was merged into the payload.
    Passed { data: Value },
    Rejected {
        message: String,
        errors: Option<FieldErrors>,
    },
    Invalid { step: usize, errors: FieldErrors },
    /// The current step has no server-side check.
    NotRequired,
    Busy,
    Inactive,
    Discarded,
}

// ============================================================================
// Session
// ============================================================================

struct Session {
    generation: u64,
    config: WizardConfig,
    state: WizardState,
    attachments: Vec<FileAttachment>,
    validator: StepValidator,
}

impl Session {
    fn open(generation: u64, config: WizardConfig) -> Self {
        let state = WizardState::new(
            config.total_steps,
            config.is_linear,
            config.initial_payload.clone(),
        );
        let validator = StepValidator::new(config.i18n.clone());
        Self {
            generation,
            config,
            state,
            attachments: Vec::new(),
            validator,
        }
    }

    /// Whether the session accepts navigation and input.
    fn is_open(&self) -> bool {
        !self.state.complete
    }

    fn validate(&self, steps: &[StepDefinition], index: usize) -> ValidationResult {
        match steps.iter().find(|s| s.index == index) {
            Some(step) => self.validator.validate(step, &self.state.payload),
            None => ValidationResult::valid(),
        }
    }

    /// First step in `indices` that fails validation, with its errors.
    fn first_invalid(
        &self,
        steps: &[StepDefinition],
        indices: impl IntoIterator<Item = usize>,
    ) -> Option<(usize, FieldErrors)> {
        indices.into_iter().find_map(|index| {
            let result = self.validate(steps, index);
            (!result.valid).then_some((index, result.errors))
        })
    }

    fn go_to(&mut self, steps: &[StepDefinition], target: usize) -> StepChange {
        let current = self.state.current_step;
        if !self.is_open() || !self.state.contains_step(target) || target == current {
            return StepChange::Stayed;
        }

        // Every step before the target must pass, including ones already visited.
        if self.state.is_linear && target > current {
            if let Some((step, errors)) = self.first_invalid(steps, 1..target) {
                return StepChange::Blocked { step, errors };
            }
        }

        self.state.current_step = target;
        StepChange::Moved {
            from: current,
            to: target,
        }
    }

    /// Drop the stored server answer of every remote-checked step that owns
    /// `field`. Returns the keys removed.
    fn invalidate_checks(&mut self, steps: &[StepDefinition], field: &str) -> Vec<String> {
        let mut removed = Vec::new();
        for step in steps.iter().filter(|s| s.fields().any(|f| f == field)) {
            let Some(key) = step.remote.as_ref().and_then(|r| r.merge_key.as_ref()) else {
                continue;
            };
            if self.state.payload.remove(key).is_some() {
                removed.push(key.clone());
            }
        }
        removed
    }

    /// Merge input, invalidating server answers for fields whose value changed.
    fn apply(&mut self, steps: &[StepDefinition], fields: Payload) -> Vec<String> {
        let changed: Vec<String> = fields
            .iter()
            .filter(|(name, value)| self.state.payload.get(name.as_str()) != Some(*value))
            .map(|(name, _)| name.clone())
            .collect();

        let mut removed = Vec::new();
        for name in &changed {
            removed.extend(self.invalidate_checks(steps, name));
        }
        self.state.merge(fields);
        removed
    }

    fn endpoint(&self, key: &str) -> Result<String, WizardError> {
        self.config
            .url(key)
            .map(str::to_string)
            .ok_or_else(|| WizardError::UnknownEndpoint(key.to_string()))
    }

    fn request(&self, url: String) -> RemoteRequest {
        RemoteRequest::post(url, self.state.payload.clone(), self.attachments.clone())
            .with_csrf_token(self.config.csrf_token.clone())
    }
}

// ============================================================================
// WizardController
// ============================================================================

/// Drives one wizard through its steps.
pub struct WizardController {
    name: String,
    steps: Vec<StepDefinition>,
    gateway: Arc<dyn RemoteGateway>,
    submit_endpoint: String,
    session: Mutex<Option<Session>>,
    generations: Mutex<u64>,
}

impl WizardController {
    /// Create a controller with no open session. Call [`initialize`](Self::initialize)
    /// when the wizard is shown.
    pub fn new(
        name: impl Into<String>,
        steps: Vec<StepDefinition>,
        gateway: Arc<dyn RemoteGateway>,
    ) -> Self {
        Self {
            name: name.into(),
            steps,
            gateway,
            submit_endpoint: DEFAULT_SUBMIT_ENDPOINT.to_string(),
            session: Mutex::new(None),
            generations: Mutex::new(0),
        }
    }

    pub fn with_submit_endpoint(mut self, key: impl Into<String>) -> Self {
        self.submit_endpoint = key.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    fn lock(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        let mut counter = self.generations.lock().unwrap_or_else(PoisonError::into_inner);
        *counter += 1;
        *counter
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open a fresh session, replacing any prior one entirely.
    pub fn initialize(&self, config: WizardConfig) -> Result<(), WizardError> {
        config.validate()?;

        info!(
            wizard = %self.name,
            total_steps = config.total_steps,
            is_linear = config.is_linear,
            "Initializing wizard"
        );

        let session = Session::open(self.next_generation(), config);
        *self.lock() = Some(session);
        Ok(())
    }

    /// Start over with the configuration of the current session.
    pub fn reset(&self) -> bool {
        let generation = self.next_generation();
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(session) => {
                debug!(wizard = %self.name, "Resetting wizard");
                *session = Session::open(generation, session.config.clone());
                true
            }
            None => false,
        }
    }

    /// Discard the session (the wizard was closed or the page left).
    pub fn close(&self) {
        self.next_generation();
        if self.lock().take().is_some() {
            debug!(wizard = %self.name, "Closing wizard");
        }
    }

    // ========================================================================
    // Inspection
    // ========================================================================

    /// Snapshot of the current state, if a session is open.
    pub fn state(&self) -> Option<WizardState> {
        self.lock().as_ref().map(|s| s.state.clone())
    }

    pub fn phase(&self) -> WizardPhase {
        self.lock()
            .as_ref()
            .map_or(WizardPhase::Closed, |s| s.state.phase())
    }

    pub fn is_processing(&self) -> bool {
        self.lock().as_ref().is_some_and(|s| s.state.is_processing)
    }

    pub fn payload(&self) -> Option<Payload> {
        self.lock().as_ref().map(|s| s.state.payload.clone())
    }

    pub fn attachments(&self) -> Vec<FileAttachment> {
        self.lock()
            .as_ref()
            .map(|s| s.attachments.clone())
            .unwrap_or_default()
    }

    // ========================================================================
    // Input
    // ========================================================================

    /// Record a single field-level input event. Changing a field checked by
    /// the server discards that check's stored answer.
    pub fn set_field(&self, name: impl Into<String>, value: Value) -> bool {
        let mut fields = Payload::new();
        fields.insert(name.into(), value);
        self.merge_payload(fields)
    }

    /// Merge collected fields into the payload without navigating.
    pub fn merge_payload(&self, fields: Payload) -> bool {
        let mut guard = self.lock();
        let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
            return false;
        };
        let removed = session.apply(&self.steps, fields);
        self.log_invalidated(&removed);
        true
    }

    fn log_invalidated(&self, keys: &[String]) {
        if !keys.is_empty() {
            debug!(wizard = %self.name, ?keys, "Discarded stale server check results");
        }
    }

    /// Attach a file, replacing any earlier file for the same field. The file
    /// name is recorded in the payload under the field name.
    pub fn attach_file(&self, file: FileAttachment) -> bool {
        let mut guard = self.lock();
        let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
            return false;
        };

        debug!(wizard = %self.name, field = %file.field, file = %file.file_name, "Attaching file");
        let removed = session.invalidate_checks(&self.steps, &file.field);
        session
            .state
            .payload
            .insert(file.field.clone(), Value::String(file.file_name.clone()));
        session.attachments.retain(|f| f.field != file.field);
        session.attachments.push(file);
        self.log_invalidated(&removed);
        true
    }

    pub fn clear_attachments(&self) {
        let mut guard = self.lock();
        let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
            return;
        };
        let files: Vec<FileAttachment> = session.attachments.drain(..).collect();
        let mut removed = Vec::new();
        for file in files {
            session.state.payload.remove(&file.field);
            removed.extend(session.invalidate_checks(&self.steps, &file.field));
        }
        self.log_invalidated(&removed);
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Validate one step against the current payload. Pure read.
    pub fn validate_step(&self, index: usize) -> ValidationResult {
        match self.lock().as_ref() {
            Some(session) => session.validate(&self.steps, index),
            None => ValidationResult::valid(),
        }
    }

    /// Move to `target`. Out-of-range targets are ignored. In a linear wizard,
    /// moving forward requires every earlier step to validate.
    pub fn go_to_step(&self, target: usize) -> StepChange {
        let mut guard = self.lock();
        let Some(session) = guard.as_mut() else {
            return StepChange::Stayed;
        };

        let change = session.go_to(&self.steps, target);
        match &change {
            StepChange::Moved { from, to } => {
                debug!(wizard = %self.name, from, to, "Moved to step")
            }
            StepChange::Blocked { step, errors } => {
                debug!(wizard = %self.name, step, target, errors = errors.len(), "Navigation blocked")
            }
            StepChange::Stayed => {}
        }
        change
    }

    /// Merge the current step's collected input, then advance one step.
    pub fn next(&self, collected: Payload) -> StepChange {
        let target = {
            let mut guard = self.lock();
            let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
                return StepChange::Stayed;
            };
            let removed = session.apply(&self.steps, collected);
            self.log_invalidated(&removed);
            session.state.current_step + 1
        };
        self.go_to_step(target)
    }

    /// Go back one step. Never validates.
    pub fn previous(&self) -> StepChange {
        let target = match self.lock().as_ref() {
            Some(session) => session.state.current_step.saturating_sub(1),
            None => return StepChange::Stayed,
        };
        self.go_to_step(target)
    }

    // ========================================================================
    // Remote Operations
    // ========================================================================

    /// Run the current step's server-side check, merging returned data into
    /// the payload on success.
    pub async fn check_step(&self) -> Result<StepCheckOutcome, WizardError> {
        let (generation, index, remote, request) = {
            let mut guard = self.lock();
            let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
                return Ok(StepCheckOutcome::Inactive);
            };
            if session.state.is_processing {
                return Ok(StepCheckOutcome::Busy);
            }

            let index = session.state.current_step;
            let Some(remote) = self
                .steps
                .iter()
                .find(|s| s.index == index)
                .and_then(|s| s.remote.clone())
            else {
                return Ok(StepCheckOutcome::NotRequired);
            };

            let result = session.validate(&self.steps, index);
            if !result.valid {
                return Ok(StepCheckOutcome::Invalid {
                    step: index,
                    errors: result.errors,
                });
            }

            let url = session.endpoint(&remote.endpoint)?;
            session.state.is_processing = true;
            (session.generation, index, remote, session.request(url))
        };

        debug!(wizard = %self.name, step = index, endpoint = %remote.endpoint, "Checking step");
        let response = self.gateway.send(request).await;

        let mut guard = self.lock();
        let Some(session) = guard.as_mut().filter(|s| s.generation == generation) else {
            debug!(wizard = %self.name, "Dropping step check for a closed session");
            return Ok(StepCheckOutcome::Discarded);
        };
        session.state.is_processing = false;

        match response {
            RemoteResponse::Success { data } => {
                match (&remote.merge_key, &data) {
                    (Some(key), _) => {
                        session.state.payload.insert(key.clone(), data.clone());
                    }
                    (None, Value::Object(fields)) => session.state.merge(fields.clone()),
                    (None, _) => {}
                }
                Ok(StepCheckOutcome::Passed { data })
            }
            RemoteResponse::Failure { message, errors } => {
                warn!(wizard = %self.name, step = index, %message, "Step check rejected");
                Ok(StepCheckOutcome::Rejected { message, errors })
            }
        }
    }

    /// Send the accumulated payload to the final endpoint.
    ///
    /// On success the wizard becomes complete and its payload is discarded. On
    /// failure only `is_processing` is cleared; payload and step are untouched.
    pub async fn submit(&self) -> Result<SubmitOutcome, WizardError> {
        let (generation, request) = {
            let mut guard = self.lock();
            let Some(session) = guard.as_mut().filter(|s| s.is_open()) else {
                return Ok(SubmitOutcome::Inactive);
            };
            if session.state.is_processing {
                debug!(wizard = %self.name, "Submission already in flight");
                return Ok(SubmitOutcome::Busy);
            }
            if !session.state.is_last_step() {
                return Ok(SubmitOutcome::NotOnFinalStep);
            }

            // Linear wizards submit only when every step passes.
            let last = session.state.current_step;
            let first = if session.state.is_linear { 1 } else { last };
            if let Some((step, errors)) = session.first_invalid(&self.steps, first..=last) {
                return Ok(SubmitOutcome::Invalid { step, errors });
            }

            let url = session.endpoint(&self.submit_endpoint)?;
            session.state.is_processing = true;
            (session.generation, session.request(url))
        };

        info!(wizard = %self.name, multipart = request.is_multipart(), "Submitting wizard");
        let response = self.gateway.send(request).await;

        let mut guard = self.lock();
        let Some(session) = guard.as_mut().filter(|s| s.generation == generation) else {
            debug!(wizard = %self.name, "Dropping submission result for a closed session");
            return Ok(SubmitOutcome::Discarded);
        };
        session.state.is_processing = false;

        match response {
            RemoteResponse::Success { .. } => {
                info!(wizard = %self.name, "Wizard completed");
                session.state.complete = true;
                session.state.payload.clear();
                session.attachments.clear();
                Ok(SubmitOutcome::Completed { response })
            }
            RemoteResponse::Failure { message, errors } => {
                warn!(wizard = %self.name, %message, "Submission rejected");
                Ok(SubmitOutcome::Rejected { message, errors })
            }
        }
    }
}

impl std::fmt::Debug for WizardController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WizardController")
            .field("name", &self.name)
            .field("steps", &self.steps.len())
            .field("submit_endpoint", &self.submit_endpoint)
            .field("phase", &self.phase())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
