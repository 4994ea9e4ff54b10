//! The serialized envelope is the wire contract between capture and
//! persistence; keep it in step with `schemas/AuditEnvelope.schema.json`.

use serde_json::json;
use vitrine_audit::{AuditAction, AuditEnvelope, CaptureRecord, RequestContext};

fn validate(envelope: &AuditEnvelope) -> Result<(), String> {
    let instance = serde_json::to_value(envelope).expect("envelope must serialize");
    let schema: serde_json::Value =
        serde_json::from_str(include_str!("../../../schemas/AuditEnvelope.schema.json"))
            .expect("schema must parse");

    let validator = jsonschema::draft202012::options()
        .build(&schema)
        .expect("schema must compile");

    if validator.is_valid(&instance) {
        return Ok(());
    }

    let mut msgs = Vec::new();
    for (idx, err) in validator.iter_errors(&instance).take(20).enumerate() {
        msgs.push(format!("{}: {}", idx + 1, err));
    }
    Err(msgs.join("; "))
}

#[test]
fn test_update_envelope_validates() {
    let capture = CaptureRecord::success(AuditAction::Update, "Project")
        .with_entity_id(Some("42".into()))
        .with_entity_name(Some("Portfolio".into()))
        .with_old_values(json!({ "title": "Old" }).as_object().cloned())
        .with_new_values(json!({ "title": "New" }).as_object().cloned());
    let context = RequestContext::new()
        .with_actor("7", Some("Ada".into()), Some("ADMIN".into()))
        .with_ip_address("203.0.113.5")
        .with_user_agent("Mozilla/5.0")
        .with_request("PUT", "/admin/projects/42");

    validate(&AuditEnvelope::new(capture, Some(context))).unwrap();
}

#[test]
fn test_failed_login_without_context_validates() {
    let capture = CaptureRecord::failure(AuditAction::LoginFailed, "User", "invalid credentials");
    validate(&AuditEnvelope::new(capture, None)).unwrap();
}

#[test]
fn test_failure_without_message_is_rejected() {
    let mut envelope = AuditEnvelope::new(CaptureRecord::success(AuditAction::Delete, "Tag"), None);
    envelope.capture.success = false;
    assert!(validate(&envelope).is_err());
}
