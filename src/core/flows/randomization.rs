//! Randomization Wizard
//!
//! Allocates the animals of an experimental group to treatment groups:
//! 1. Animals - pick animal IDs; the server confirms they belong to the group
//! 2. Method - simple, block, stratified or minimization
//! 3. Groups - treatment groups and their sizes
//! 4. Review - explicit confirmation
//!
//! The allocation itself is computed by the server on submission.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::config::Messages;
use crate::core::gateway::RemoteGateway;
use crate::core::wizard::{
    FieldErrors, FieldRule, Payload, RemoteCheck, StepDefinition, WizardController, WizardError,
};

use super::{list, positive_int};

pub const TOTAL_STEPS: usize = 4;

/// Endpoint that checks the selected animal IDs.
pub const ENDPOINT_VALIDATE_ANIMALS: &str = "validate_animals";
/// Endpoint that performs the randomization.
pub const ENDPOINT_RANDOMIZE: &str = "randomize";
/// Payload key holding the server's answer about the selected animals.
pub const VALIDATION_KEY: &str = "animal_validation";

const SELECT_ANIMALS: &str = "Select at least one animal with a valid ID";

pub const METHODS: [&str; 4] = ["simple", "block", "stratified", "minimization"];

/// Step definitions for the randomization wizard.
pub fn steps() -> Result<Vec<StepDefinition>, WizardError> {
    let methods = format!("^({})$", METHODS.join("|"));

    Ok(vec![
        StepDefinition::new(1, "Animals")
            .rule(
                FieldRule::required("animal_ids")
                    .matching(r"^[A-Za-z0-9_.\-]+$")?
                    .with_message(SELECT_ANIMALS),
            )
            .with_check(check_animals)
            .with_remote(RemoteCheck::new(ENDPOINT_VALIDATE_ANIMALS).merge_into(VALIDATION_KEY)),
        StepDefinition::new(2, "Method")
            .rule(
                FieldRule::required(VALIDATION_KEY)
                    .with_message("Validate the selected animals before continuing"),
            )
            .rule(FieldRule::required("method").matching(&methods)?)
            .rule(FieldRule::optional("randomization_unit").matching("^(animal|cage)$")?)
            .with_check(check_method),
        StepDefinition::new(3, "Groups")
            .rule(FieldRule::required("treatment_groups"))
            .rule(FieldRule::optional("seed").matching(r"^\d+$")?)
            .with_check(check_groups),
        StepDefinition::new(4, "Review").rule(
            FieldRule::required("confirm")
                .matching("^true$")?
                .with_message("Confirm the allocation before randomizing"),
        ),
    ])
}

/// Controller wired for randomization.
pub fn controller(gateway: Arc<dyn RemoteGateway>) -> Result<WizardController, WizardError> {
    Ok(WizardController::new("randomization", steps()?, gateway)
        .with_submit_endpoint(ENDPOINT_RANDOMIZE))
}

fn check_animals(payload: &Payload, _: &Messages) -> FieldErrors {
    let mut errors = FieldErrors::new();
    if matches!(payload.get("animal_ids"), Some(Value::Array(ids)) if ids.is_empty()) {
        errors.insert("animal_ids".into(), SELECT_ANIMALS.into());
    }
    errors
}

fn check_method(payload: &Payload, _: &Messages) -> FieldErrors {
    let mut errors = FieldErrors::new();
    match payload.get("method").and_then(Value::as_str) {
        Some("minimization") if list(payload, "minimization_factors").is_empty() => {
            errors.insert(
                "minimization_factors".into(),
                "Select at least one minimization factor".into(),
            );
        }
        Some("stratified") | Some("block") => {
            let factor = payload.get("stratification_factor").and_then(Value::as_str);
            if factor.map_or(true, |f| f.trim().is_empty()) {
                errors.insert(
                    "stratification_factor".into(),
                    "Select the factor to stratify on".into(),
                );
            }
        }
        _ => {}
    }
    errors
}

fn check_groups(payload: &Payload, _: &Messages) -> FieldErrors {
    let mut errors = FieldErrors::new();
    let groups = list(payload, "treatment_groups");
    if groups.is_empty() {
        return errors;
    }

    let mut names = HashSet::new();
    let mut assigned = 0u64;
    for (i, group) in groups.iter().enumerate() {
        let name = group.get("name").and_then(Value::as_str).map(str::trim);
        match name {
            Some(name) if !name.is_empty() => {
                if !names.insert(name.to_lowercase()) {
                    errors.insert(
                        format!("treatment_groups.{}.name", i),
                        format!("Duplicate group name '{}'", name),
                    );
                }
            }
            _ => {
                errors.insert(
                    format!("treatment_groups.{}.name", i),
                    "Group name is required".into(),
                );
            }
        }

        match positive_int(group.get("count")) {
            Some(count) => assigned += count,
            None => {
                errors.insert(
                    format!("treatment_groups.{}.count", i),
                    "Group size must be a positive integer".into(),
                );
            }
        }
    }

    let available = list(payload, "animal_ids").len() as u64;
    if errors.is_empty() && assigned != available {
        errors.insert(
            "treatment_groups".into(),
            format!(
                "Assigned count ({}) does not match available count ({})",
                assigned, available
            ),
        );
    }
    errors
}
