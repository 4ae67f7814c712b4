//! Wizard Controller Tests
//!
//! Navigation, gating, submission and step checks against gateway doubles:
//! - Linear gating and backward freedom
//! - Terminal COMPLETE state
//! - In-flight guard for submissions and step checks
//! - Payload preservation on rejection

use std::sync::Arc;

use futures::poll;
use reqwest::Method;
use serde_json::json;

use crate::core::gateway::{FileAttachment, RemoteResponse, RequestBody};
use crate::core::wizard::{
    FieldErrors, FieldRule, RemoteCheck, StepChange, StepCheckOutcome, StepDefinition,
    SubmitOutcome, WizardController, WizardPhase,
};
use crate::tests::common::{basic_steps, config, payload, CSRF_TOKEN, SUBMIT_URL};
use crate::tests::mocks::{HeldGateway, MockGateway, RecordingGateway};

fn wizard_with(gateway: Arc<RecordingGateway>) -> WizardController {
    WizardController::new("test", basic_steps(), gateway)
}

// =============================================================================
// Navigation
// =============================================================================

#[test]
fn test_linear_jump_blocked_by_missing_name() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(4, true)).unwrap();

    let change = wizard.go_to_step(3);

    assert_eq!(
        change.errors(),
        Some(&FieldErrors::from([(
            "name".to_string(),
            "This field is required".to_string()
        )]))
    );
    assert_eq!(wizard.state().unwrap().current_step, 1);
}

#[test]
fn test_linear_jump_reports_first_failing_step() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(4, true)).unwrap();
    wizard.set_field("name", json!("Cohort 1"));
    wizard.set_field("count", json!("twelve"));

    match wizard.go_to_step(4) {
        StepChange::Blocked { step, errors } => {
            assert_eq!(step, 2);
            assert_eq!(errors["count"], "Invalid format");
        }
        other => panic!("expected block, got {:?}", other),
    }

    wizard.set_field("count", json!(12));
    assert_eq!(wizard.go_to_step(4), StepChange::Moved { from: 1, to: 4 });
}

#[test]
fn test_linear_rechecks_earlier_steps() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(4, true)).unwrap();
    wizard.next(payload(json!({"name": "Cohort 1"})));
    wizard.next(payload(json!({"count": 4})));
    assert_eq!(wizard.state().unwrap().current_step, 3);

    // Editing step 1 after leaving it
    wizard.set_field("name", json!(""));

    assert!(matches!(
        wizard.go_to_step(4),
        StepChange::Blocked { step: 1, .. }
    ));
    assert_eq!(wizard.state().unwrap().current_step, 3);
}

#[test]
fn test_non_linear_go_then_previous_skips_validation() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(2, false)).unwrap();

    assert_eq!(wizard.go_to_step(2), StepChange::Moved { from: 1, to: 2 });
    assert_eq!(wizard.previous(), StepChange::Moved { from: 2, to: 1 });
    assert_eq!(wizard.state().unwrap().current_step, 1);
}

#[test]
fn test_previous_ignores_invalid_state() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(4, true)).unwrap();
    wizard.next(payload(json!({"name": "Cohort 1"})));
    wizard.next(payload(json!({"count": 4})));
    wizard.set_field("name", json!(null));
    wizard.set_field("count", json!("bad"));

    assert_eq!(wizard.previous(), StepChange::Moved { from: 3, to: 2 });
    assert_eq!(wizard.previous(), StepChange::Moved { from: 2, to: 1 });
    assert_eq!(wizard.previous(), StepChange::Stayed);
}

#[test]
fn test_zero_counts_as_present() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(4, true)).unwrap();
    wizard.set_field("count", json!(0));

    let result = wizard.validate_step(2);
    assert!(result.valid);
    assert!(result.errors.is_empty());
}

#[test]
fn test_validate_step_is_pure() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(4, true)).unwrap();
    let before = wizard.state().unwrap();

    let result = wizard.validate_step(1);
    assert!(!result.valid);
    assert_eq!(wizard.state().unwrap(), before);
    assert!(wizard.validate_step(99).valid);
}

#[test]
fn test_reinitialize_drops_previous_session() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard
        .initialize(config(4, true).with_payload(payload(json!({"group_id": 1}))))
        .unwrap();
    wizard.next(payload(json!({"name": "first"})));
    wizard.attach_file(FileAttachment::new("file", "a.csv", &b"x"[..]));

    wizard.initialize(config(3, false)).unwrap();

    let state = wizard.state().unwrap();
    assert_eq!(state.current_step, 1);
    assert_eq!(state.total_steps, 3);
    assert!(!state.is_linear);
    assert!(state.payload.is_empty());
    assert!(wizard.attachments().is_empty());
}

// =============================================================================
// Submission
// =============================================================================

#[tokio::test]
async fn test_submit_success_completes() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::success(
        json!({"redirect_url": "/groups/12"}),
    )]));
    let wizard = wizard_with(gateway.clone());
    wizard.initialize(config(1, false)).unwrap();
    wizard.set_field("name", json!("Cohort 1"));

    let outcome = wizard.submit().await.unwrap();

    match outcome {
        SubmitOutcome::Completed { response } => {
            assert_eq!(response.redirect_url(), Some("/groups/12"))
        }
        other => panic!("expected completion, got {:?}", other),
    }
    assert_eq!(wizard.phase(), WizardPhase::Complete);
    let state = wizard.state().unwrap();
    assert!(!state.is_processing);
    assert!(state.payload.is_empty());

    let requests = gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].url, SUBMIT_URL);
    assert_eq!(requests[0].csrf_token.as_deref(), Some(CSRF_TOKEN));
    assert_eq!(
        requests[0].body,
        RequestBody::Json(json!({"name": "Cohort 1"}))
    );
}

#[tokio::test]
async fn test_complete_is_terminal() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::success(
        json!(null),
    )]));
    let wizard = WizardController::new("test", vec![], gateway.clone());
    wizard.initialize(config(2, false)).unwrap();
    wizard.go_to_step(2);
    assert!(matches!(
        wizard.submit().await.unwrap(),
        SubmitOutcome::Completed { .. }
    ));

    assert_eq!(wizard.next(payload(json!({"a": 1}))), StepChange::Stayed);
    assert_eq!(wizard.previous(), StepChange::Stayed);
    assert_eq!(wizard.go_to_step(1), StepChange::Stayed);
    assert!(!wizard.set_field("a", json!(1)));
    assert_eq!(wizard.submit().await.unwrap(), SubmitOutcome::Inactive);
    assert_eq!(wizard.phase(), WizardPhase::Complete);
    assert_eq!(gateway.calls(), 1);

    wizard.initialize(config(2, false)).unwrap();
    assert_eq!(wizard.phase(), WizardPhase::Step(1));
}

#[tokio::test]
async fn test_rejection_keeps_step_and_allows_retry() {
    let mut gateway = MockGateway::new();
    gateway
        .expect_send()
        .times(2)
        .returning(|_| RemoteResponse::failure("Count mismatch"));
    let wizard = WizardController::new("test", vec![], Arc::new(gateway));
    wizard.initialize(config(3, false)).unwrap();
    wizard.go_to_step(3);

    for _ in 0..2 {
        let outcome = wizard.submit().await.unwrap();
        assert_eq!(
            outcome,
            SubmitOutcome::Rejected {
                message: "Count mismatch".into(),
                errors: None
            }
        );
        let state = wizard.state().unwrap();
        assert!(!state.is_processing);
        assert_eq!(state.current_step, 3);
    }
}

#[tokio::test]
async fn test_rejection_leaves_payload_untouched() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::Failure {
        message: "Assigned count does not match available count".into(),
        errors: Some(FieldErrors::from([("groups".into(), "uneven".into())])),
    }]));
    let wizard = wizard_with(gateway);
    wizard
        .initialize(config(1, false).with_payload(payload(json!({
            "name": "Cohort 1",
            "groups": [{"name": "A", "count": 3}],
            "nested": {"seed": 42}
        }))))
        .unwrap();
    let before = wizard.payload().unwrap();

    let outcome = wizard.submit().await.unwrap();

    assert!(matches!(outcome, SubmitOutcome::Rejected { errors: Some(_), .. }));
    assert_eq!(wizard.payload().unwrap(), before);
}

#[tokio::test]
async fn test_duplicate_submit_while_in_flight() {
    let gateway = Arc::new(HeldGateway::new(RemoteResponse::success(json!({}))));
    let wizard = WizardController::new("test", vec![], gateway.clone());
    wizard.initialize(config(1, false)).unwrap();

    let first = wizard.submit();
    tokio::pin!(first);
    assert!(poll!(&mut first).is_pending());
    assert!(wizard.is_processing());

    assert_eq!(wizard.submit().await.unwrap(), SubmitOutcome::Busy);
    assert_eq!(wizard.submit().await.unwrap(), SubmitOutcome::Busy);

    gateway.release();
    assert!(matches!(
        first.await.unwrap(),
        SubmitOutcome::Completed { .. }
    ));
    assert_eq!(gateway.calls(), 1);
    assert!(!wizard.is_processing());
}

#[tokio::test]
async fn test_close_while_in_flight_discards_result() {
    let gateway = Arc::new(HeldGateway::new(RemoteResponse::success(json!({}))));
    let wizard = WizardController::new("test", vec![], gateway.clone());
    wizard.initialize(config(1, false)).unwrap();

    let first = wizard.submit();
    tokio::pin!(first);
    assert!(poll!(&mut first).is_pending());

    wizard.initialize(config(2, true)).unwrap();
    gateway.release();

    assert_eq!(first.await.unwrap(), SubmitOutcome::Discarded);
    let state = wizard.state().unwrap();
    assert_eq!(state.total_steps, 2);
    assert!(!state.is_processing);
    assert!(!state.complete);
}

#[tokio::test]
async fn test_submit_validates_final_step() {
    let mut gateway = MockGateway::new();
    gateway.expect_send().never();
    let steps = vec![StepDefinition::new(1, "Confirm").rule(FieldRule::required("confirm"))];
    let wizard = WizardController::new("test", steps, Arc::new(gateway));
    wizard.initialize(config(1, false)).unwrap();

    match wizard.submit().await.unwrap() {
        SubmitOutcome::Invalid { step, errors } => {
            assert_eq!(step, 1);
            assert!(errors.contains_key("confirm"));
        }
        other => panic!("expected invalid, got {:?}", other),
    }
    assert!(!wizard.is_processing());
}

#[tokio::test]
async fn test_linear_submit_rechecks_earlier_steps() {
    let mut gateway = MockGateway::new();
    gateway.expect_send().never();
    let wizard = WizardController::new("test", basic_steps(), Arc::new(gateway));
    wizard.initialize(config(4, true)).unwrap();
    wizard.merge_payload(payload(json!({"name": "Cohort 1", "count": 8})));
    assert!(wizard.go_to_step(4).moved());

    wizard.set_field("name", json!(""));

    assert_eq!(
        wizard.submit().await.unwrap(),
        SubmitOutcome::Invalid {
            step: 1,
            errors: FieldErrors::from([("name".into(), "This field is required".into())]),
        }
    );
    assert_eq!(wizard.state().unwrap().current_step, 4);
    assert!(!wizard.is_processing());
}

#[tokio::test]
async fn test_non_linear_submit_checks_final_step_only() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::success(json!({}))]));
    let wizard = wizard_with(gateway.clone());
    wizard.initialize(config(4, false)).unwrap();
    wizard.go_to_step(4);

    assert!(matches!(
        wizard.submit().await.unwrap(),
        SubmitOutcome::Completed { .. }
    ));
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn test_submit_with_file_is_multipart() {
    let mut gateway = MockGateway::new();
    gateway
        .expect_send()
        .withf(|request| match &request.body {
            RequestBody::Multipart { fields, files } => {
                files.len() == 1
                    && files[0].file_name == "weights.csv"
                    && !fields.contains_key("file")
            }
            _ => false,
        })
        .times(1)
        .returning(|_| RemoteResponse::success(json!({"imported": 2})));
    let wizard = WizardController::new("test", vec![], Arc::new(gateway));
    wizard.initialize(config(1, false)).unwrap();
    wizard.attach_file(
        FileAttachment::new("file", "weights.csv", &b"id,weight\nA1,21.5\n"[..]).with_mime("text/csv"),
    );

    assert!(matches!(
        wizard.submit().await.unwrap(),
        SubmitOutcome::Completed { .. }
    ));
    assert!(wizard.attachments().is_empty());
}

// =============================================================================
// Step Checks
// =============================================================================

fn checked_steps(merge_key: Option<&str>) -> Vec<StepDefinition> {
    let mut remote = RemoteCheck::new("validate_ids");
    if let Some(key) = merge_key {
        remote = remote.merge_into(key);
    }
    vec![
        StepDefinition::new(1, "IDs")
            .rule(FieldRule::required("ids"))
            .with_remote(remote),
        StepDefinition::new(2, "Review"),
    ]
}

#[tokio::test]
async fn test_check_step_merges_data() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::success(
        json!({"valid_ids": ["A1"], "unknown": []}),
    )]));
    let wizard = WizardController::new("test", checked_steps(Some("id_check")), gateway.clone());
    wizard
        .initialize(config(2, true).with_url("validate_ids", "/animals/validate"))
        .unwrap();
    wizard.set_field("ids", json!(["A1"]));

    let outcome = wizard.check_step().await.unwrap();

    assert!(matches!(outcome, StepCheckOutcome::Passed { .. }));
    assert_eq!(
        wizard.payload().unwrap()["id_check"],
        json!({"valid_ids": ["A1"], "unknown": []})
    );
    assert_eq!(gateway.requests()[0].url, "/animals/validate");
}

#[tokio::test]
async fn test_check_step_flattens_object_without_key() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::success(
        json!({"columns": ["ID"]}),
    )]));
    let wizard = WizardController::new("test", checked_steps(None), gateway);
    wizard
        .initialize(config(2, true).with_url("validate_ids", "/animals/validate"))
        .unwrap();
    wizard.set_field("ids", json!(["A1"]));

    wizard.check_step().await.unwrap();
    assert_eq!(wizard.payload().unwrap()["columns"], json!(["ID"]));
}

#[tokio::test]
async fn test_check_step_rejection_keeps_payload() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::failure(
        "Animal X9 is not in this group",
    )]));
    let wizard = WizardController::new("test", checked_steps(Some("id_check")), gateway);
    wizard
        .initialize(config(2, true).with_url("validate_ids", "/animals/validate"))
        .unwrap();
    wizard.set_field("ids", json!(["X9"]));
    let before = wizard.payload().unwrap();

    let outcome = wizard.check_step().await.unwrap();

    assert_eq!(
        outcome,
        StepCheckOutcome::Rejected {
            message: "Animal X9 is not in this group".into(),
            errors: None
        }
    );
    assert_eq!(wizard.payload().unwrap(), before);
    assert!(!wizard.is_processing());
}

#[tokio::test]
async fn test_changed_input_discards_check_result() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::success(
        json!({"valid_ids": ["A1"]}),
    )]));
    let wizard = WizardController::new("test", checked_steps(Some("id_check")), gateway);
    wizard
        .initialize(config(2, true).with_url("validate_ids", "/animals/validate"))
        .unwrap();
    wizard.set_field("ids", json!(["A1"]));
    wizard.check_step().await.unwrap();

    // Same value, unrelated field: the answer still applies
    wizard.set_field("ids", json!(["A1"]));
    wizard.set_field("comment", json!("ok"));
    assert!(wizard.payload().unwrap().contains_key("id_check"));

    wizard.next(payload(json!({"ids": ["A1", "A2"]})));
    assert!(!wizard.payload().unwrap().contains_key("id_check"));
}

#[tokio::test]
async fn test_new_attachment_discards_check_result() {
    let gateway = Arc::new(RecordingGateway::replying([RemoteResponse::success(
        json!({"columns": ["ID"]}),
    )]));
    let steps = vec![
        StepDefinition::new(1, "Upload")
            .rule(FieldRule::required("file"))
            .with_remote(RemoteCheck::new("parse").merge_into("parsed")),
        StepDefinition::new(2, "Review"),
    ];
    let wizard = WizardController::new("test", steps, gateway);
    wizard
        .initialize(config(2, true).with_url("parse", "/parse"))
        .unwrap();

    wizard.attach_file(FileAttachment::new("file", "a.csv", &b"ID\nA1\n"[..]));
    wizard.check_step().await.unwrap();
    assert_eq!(wizard.payload().unwrap()["parsed"], json!({"columns": ["ID"]}));

    wizard.attach_file(FileAttachment::new("file", "b.csv", &b"Tag\nT1\n"[..]));
    assert!(!wizard.payload().unwrap().contains_key("parsed"));

    wizard.check_step().await.unwrap();
    wizard.clear_attachments();
    let after = wizard.payload().unwrap();
    assert!(!after.contains_key("parsed"));
    assert!(!after.contains_key("file"));
}

#[tokio::test]
async fn test_check_step_validates_locally_first() {
    let mut gateway = MockGateway::new();
    gateway.expect_send().never();
    let wizard = WizardController::new("test", checked_steps(None), Arc::new(gateway));
    wizard
        .initialize(config(2, true).with_url("validate_ids", "/animals/validate"))
        .unwrap();

    assert!(matches!(
        wizard.check_step().await.unwrap(),
        StepCheckOutcome::Invalid { step: 1, .. }
    ));
}

#[tokio::test]
async fn test_check_step_not_required() {
    let wizard = wizard_with(Arc::new(RecordingGateway::default()));
    wizard.initialize(config(4, false)).unwrap();
    assert_eq!(
        wizard.check_step().await.unwrap(),
        StepCheckOutcome::NotRequired
    );
}

#[tokio::test]
async fn test_check_step_busy_during_submit() {
    let gateway = Arc::new(HeldGateway::new(RemoteResponse::success(json!({}))));
    let wizard = WizardController::new("test", checked_steps(None), gateway.clone());
    wizard
        .initialize(
            config(1, false)
                .with_url("validate_ids", "/animals/validate")
                .with_payload(payload(json!({"ids": ["A1"]}))),
        )
        .unwrap();

    let first = wizard.submit();
    tokio::pin!(first);
    assert!(poll!(&mut first).is_pending());

    assert_eq!(wizard.check_step().await.unwrap(), StepCheckOutcome::Busy);

    gateway.release();
    first.await.unwrap();
    assert_eq!(gateway.calls(), 1);
}
