//! Step Definitions
//!
//! Static description of each wizard step: its declarative field rules, an
//! optional cross-field check, and an optional server-side check. Definitions
//! are built once when a flow is assembled and never mutated afterwards.

use std::fmt;
use std::sync::Arc;

use crate::config::Messages;

use super::types::{FieldErrors, Payload};
use super::validator::FieldRule;

/// Cross-field check run after the declarative rules. Receives the session's
/// message templates.
pub type StepCheck = Arc<dyn Fn(&Payload, &Messages) -> FieldErrors + Send + Sync>;

/// A step that must be confirmed by the server before the user moves on,
/// e.g. "validate animal IDs" or "parse uploaded file".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCheck {
    /// Key into the session's endpoint table.
    pub endpoint: String,
    /// Payload key the response data is stored under. `None` flattens an
    /// object response into the payload.
    pub merge_key: Option<String>,
}

impl RemoteCheck {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            merge_key: None,
        }
    }

    pub fn merge_into(mut self, key: impl Into<String>) -> Self {
        self.merge_key = Some(key.into());
        self
    }
}

/// One unit of the wizard sequence.
#[derive(Clone)]
pub struct StepDefinition {
    /// 1-based position in the wizard.
    pub index: usize,
    pub title: String,
    pub rules: Vec<FieldRule>,
    pub check: Option<StepCheck>,
    pub remote: Option<RemoteCheck>,
}

impl StepDefinition {
    pub fn new(index: usize, title: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            rules: Vec::new(),
            check: None,
            remote: None,
        }
    }

    pub fn rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_check(
        mut self,
        check: impl Fn(&Payload, &Messages) -> FieldErrors + Send + Sync + 'static,
    ) -> Self {
        self.check = Some(Arc::new(check));
        self
    }

    pub fn with_remote(mut self, remote: RemoteCheck) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Field names this step owns, in rule order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.field.as_str())
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("index", &self.index)
            .field("title", &self.title)
            .field("rules", &self.rules)
            .field("check", &self.check.as_ref().map(|_| "<fn>"))
            .field("remote", &self.remote)
            .finish()
    }
}
