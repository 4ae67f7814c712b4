//! Step Wizard Coordination
//!
//! Shared state machine behind the randomization and data-import wizards.
//!
//! # Overview
//!
//! A wizard walks the user through an ordered list of steps and finishes with a
//! single submission:
//! 1. [`StepDefinition`]s declare each step's field rules and optional server check
//! 2. [`StepValidator`] evaluates those rules against the accumulated [`Payload`]
//! 3. [`WizardController`] owns the [`WizardState`], gates navigation and submits
//!    through a [`RemoteGateway`](crate::core::gateway::RemoteGateway)
//!
//! # Design Principles
//!
//! - **Explicit state**: everything the wizard knows lives in one [`WizardState`]
//! - **Backward freedom**: going back never validates
//! - **Linear gating**: linear wizards cannot advance past an invalid step
//! - **No silent rollback**: a rejected submission leaves the payload as it was

mod controller;
mod steps;
mod types;
mod validator;

pub use controller::*;
pub use steps::*;
pub use types::*;
pub use validator::*;
