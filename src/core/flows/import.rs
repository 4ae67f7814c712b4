//! Data Import Wizard
//!
//! Imports measurements from a spreadsheet into an experimental group:
//! 1. Upload - choose a `.csv`, `.xlsx` or `.xls` file; the server parses it
//!    and returns its columns and a preview
//! 2. Mapping - map target fields to spreadsheet columns
//! 3. Review - explicit confirmation
//!
//! The file travels with both the parse check and the final submission, so
//! those requests are multipart.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use crate::config::Messages;
use crate::core::gateway::RemoteGateway;
use crate::core::wizard::{
    FieldErrors, FieldRule, Payload, RemoteCheck, StepDefinition, WizardController, WizardError,
};

use super::list;

pub const TOTAL_STEPS: usize = 3;

/// Endpoint that parses the uploaded file.
pub const ENDPOINT_PARSE_FILE: &str = "parse_file";
/// Endpoint that performs the import.
pub const ENDPOINT_IMPORT: &str = "import";

/// Payload field (and multipart field) holding the uploaded file.
pub const FILE_FIELD: &str = "file";
/// Payload key the parse result is stored under.
pub const PARSED_KEY: &str = "parsed";
/// Target field every mapping must provide.
pub const ID_TARGET: &str = "animal_id";

pub fn steps() -> Result<Vec<StepDefinition>, WizardError> {
    Ok(vec![
        StepDefinition::new(1, "Upload")
            .rule(
                FieldRule::required(FILE_FIELD)
                    .matching(r"(?i)\.(csv|xlsx|xls)$")?
                    .with_message("Upload a .csv, .xlsx or .xls file"),
            )
            .rule(FieldRule::optional("sheet_name"))
            .with_remote(RemoteCheck::new(ENDPOINT_PARSE_FILE).merge_into(PARSED_KEY)),
        StepDefinition::new(2, "Mapping")
            .rule(
                FieldRule::required(PARSED_KEY)
                    .with_message("Upload and check a file before mapping columns"),
            )
            .rule(FieldRule::required("mapping"))
            .with_check(check_mapping),
        StepDefinition::new(3, "Review").rule(
            FieldRule::required("confirm")
                .matching("^true$")?
                .with_message("Confirm the import"),
        ),
    ])
}

/// Controller wired for data import.
pub fn controller(gateway: Arc<dyn RemoteGateway>) -> Result<WizardController, WizardError> {
    Ok(WizardController::new("import", steps()?, gateway).with_submit_endpoint(ENDPOINT_IMPORT))
}

/// Columns reported by the parse step, if it has run.
fn parsed_columns(payload: &Payload) -> Option<HashSet<&str>> {
    let parsed = payload.get(PARSED_KEY)?.as_object()?;
    let columns = list(parsed, "columns");
    Some(columns.iter().filter_map(Value::as_str).collect())
}

fn check_mapping(payload: &Payload, messages: &Messages) -> FieldErrors {
    let mut errors = FieldErrors::new();
    let Some(mapping) = payload.get("mapping").and_then(Value::as_object) else {
        if payload.contains_key("mapping") {
            errors.insert("mapping".into(), messages.invalid_format_for("mapping"));
        }
        return errors;
    };

    let mapped = |target: &str| {
        mapping
            .get(target)
            .and_then(Value::as_str)
            .filter(|c| !c.trim().is_empty())
    };

    if mapped(ID_TARGET).is_none() {
        errors.insert(
            format!("mapping.{}", ID_TARGET),
            "Map a column to the animal ID".into(),
        );
    }

    let columns = parsed_columns(payload);
    let mut used = HashSet::new();
    for target in mapping.keys() {
        let Some(column) = mapped(target.as_str()) else {
            continue;
        };
        if !used.insert(column) {
            errors.insert(
                format!("mapping.{}", target),
                format!("Column '{}' is mapped more than once", column),
            );
        } else if columns.as_ref().is_some_and(|c| !c.contains(column)) {
            errors.insert(
                format!("mapping.{}", target),
                format!("Column '{}' is not in the uploaded file", column),
            );
        }
    }
    errors
}
