//! End-to-end tool pipeline scenarios.

mod common;

use common::{harness, wait_for_flush};
use palisade::detect::aggregator::ToolVerdict;
use palisade::policy::ProjectMode;
use palisade::service::ToolCheckRequestBody;
use palisade::store::{EventFilter, EventStore};
use pretty_assertions::assert_eq;

fn body(tool_name: &str, arguments_json: &str) -> ToolCheckRequestBody {
    ToolCheckRequestBody {
        tool_name: tool_name.to_string(),
        arguments_json: arguments_json.to_string(),
        trace: Vec::new(),
        user_confirmed: false,
        workflow_type: None,
        identity: None,
        client_trace_id: None,
        metadata: Default::default(),
    }
}

fn trace_entry(tool: &str, result_json: &str, labels: &[&str]) -> palisade::request::TraceEntry {
    palisade::request::TraceEntry {
        tool_name: tool.to_string(),
        result_json: result_json.to_string(),
        output_labels: labels.iter().map(|s| s.to_string()).collect(),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
    }
}

#[tokio::test]
async fn wrong_enum_value_is_unsafe() {
    let h = harness(ProjectMode::Enforce).await;
    h.store.put_tool_definition(
        "proj-test",
        "get_weather",
        r#"{
            "tool_name": "get_weather",
            "risk_tier": "read",
            "argument_schema": {
                "type": "object",
                "properties": {
                    "location": {"type": "string"},
                    "unit": {"type": "string", "enum": ["celsius", "fahrenheit"]}
                },
                "required": ["location"]
            }
        }"#,
    );

    let response = h
        .service
        .check_tool(
            &h.api_key,
            body("get_weather", r#"{"location":"Tokyo","unit":"kelvin"}"#),
        )
        .await
        .unwrap();

    assert_eq!(response.verdict, ToolVerdict::Unsafe);
    assert!(response.reason.contains("schema validation failed"));
    let validation = response
        .evaluations
        .iter()
        .find(|e| e.name == "argument_validation")
        .unwrap();
    assert!(validation.triggered);
    assert!(validation.confidence >= 0.9);
}

#[tokio::test]
async fn destructive_unconfirmed_needs_confirmation() {
    let h = harness(ProjectMode::Enforce).await;
    h.store.put_tool_definition(
        "proj-test",
        "delete_account",
        r#"{"tool_name": "delete_account", "risk_tier": "destructive", "requires_confirmation": true}"#,
    );

    let response = h
        .service
        .check_tool(&h.api_key, body("delete_account", r#"{"id": "u-1"}"#))
        .await
        .unwrap();
    assert_eq!(response.verdict, ToolVerdict::NeedsConfirmation);
    assert!(response.reason.contains("requires user confirmation"));

    // Confirmed invocation is safe.
    let mut confirmed = body("delete_account", r#"{"id": "u-1"}"#);
    confirmed.user_confirmed = true;
    let response = h.service.check_tool(&h.api_key, confirmed).await.unwrap();
    assert_eq!(response.verdict, ToolVerdict::Safe);
}

#[tokio::test]
async fn information_flow_taint_detected_with_length_floor() {
    let h = harness(ProjectMode::Enforce).await;
    h.store.put_tool_definition(
        "proj-test",
        "post_message",
        r#"{"tool_name": "post_message", "information_flow": {"blocked_source_labels": ["internal"]}}"#,
    );

    // A long tainted value flows from a blocked source into the arguments.
    let mut tainted = body("post_message", r#"{"text": "fyi secret_value_12345"}"#);
    tainted.trace = vec![trace_entry(
        "get_internal_data",
        r#"{"secret": "secret_value_12345"}"#,
        &["internal"],
    )];
    let response = h.service.check_tool(&h.api_key, tainted).await.unwrap();
    assert_eq!(response.verdict, ToolVerdict::Unsafe);
    let flow = response
        .evaluations
        .iter()
        .find(|e| e.name == "information_flow")
        .unwrap();
    assert!(flow.triggered);
    assert_eq!(flow.confidence, 0.9);

    // Values shorter than 4 characters never count.
    let mut short = body("post_message", r#"{"text": "abc"}"#);
    short.trace = vec![trace_entry(
        "get_internal_data",
        r#"{"secret": "abc"}"#,
        &["internal"],
    )];
    let response = h.service.check_tool(&h.api_key, short).await.unwrap();
    let flow = response
        .evaluations
        .iter()
        .find(|e| e.name == "information_flow")
        .unwrap();
    assert!(!flow.triggered);
}

#[tokio::test]
async fn unregistered_tool_is_safe_but_visible() {
    let h = harness(ProjectMode::Enforce).await;

    let response = h
        .service
        .check_tool(&h.api_key, body("mystery_tool", r#"{"x": 1}"#))
        .await
        .unwrap();

    // 0.5 sits below the unsafe threshold: verdict stays safe, but the
    // risk-tier marker is in the reason for audit.
    assert_eq!(response.verdict, ToolVerdict::Safe);
    assert!(response.reason.contains("not registered"));
    let marker = response
        .evaluations
        .iter()
        .find(|e| e.name == "risk_tier")
        .unwrap();
    assert!(marker.triggered);
    assert_eq!(marker.confidence, 0.5);
}

#[tokio::test]
async fn unregistered_tool_still_gets_injection_scanning() {
    let h = harness(ProjectMode::Enforce).await;

    let response = h
        .service
        .check_tool(
            &h.api_key,
            body("mystery_tool", r#"{"query": "x'; DROP TABLE users; --"}"#),
        )
        .await
        .unwrap();
    assert_eq!(response.verdict, ToolVerdict::Unsafe);
    assert!(response.reason.contains("injection patterns in arguments"));
}

#[tokio::test]
async fn missing_preconditions_are_unsafe() {
    let h = harness(ProjectMode::Enforce).await;
    h.store.put_tool_definition(
        "proj-test",
        "send_report",
        r#"{"tool_name": "send_report", "preconditions": ["fetch_data", "validate_data"]}"#,
    );

    let mut request = body("send_report", "{}");
    request.trace = vec![trace_entry("fetch_data", "{}", &[])];
    let response = h.service.check_tool(&h.api_key, request).await.unwrap();
    assert_eq!(response.verdict, ToolVerdict::Unsafe);
    assert!(response.reason.contains("missing preconditions: validate_data"));
}

#[tokio::test]
async fn rate_limit_counts_trace_entries_in_window() {
    let h = harness(ProjectMode::Enforce).await;
    h.store.put_tool_definition(
        "proj-test",
        "export_data",
        r#"{"tool_name": "export_data", "contextual_rules": {"rate_limit": {"max_calls": 2, "window_seconds": 60}}}"#,
    );

    let mut request = body("export_data", "{}");
    request.trace = vec![
        trace_entry("export_data", "{}", &[]),
        trace_entry("export_data", "{}", &[]),
    ];
    let response = h.service.check_tool(&h.api_key, request).await.unwrap();
    assert_eq!(response.verdict, ToolVerdict::Unsafe);
    assert!(response.reason.contains("rate limit exceeded"));
}

#[tokio::test]
async fn output_restrictions_returned_to_caller() {
    let h = harness(ProjectMode::Enforce).await;
    h.store.put_tool_definition(
        "proj-test",
        "fetch_salary",
        r#"{"tool_name": "fetch_salary", "information_flow": {"blocked_source_labels": [], "output_restrictions": ["no_external_send"]}}"#,
    );

    let response = h
        .service
        .check_tool(&h.api_key, body("fetch_salary", "{}"))
        .await
        .unwrap();
    assert_eq!(response.output_restrictions, vec!["no_external_send"]);
}

#[tokio::test]
async fn tool_events_recorded_with_tool_fields() {
    let h = harness(ProjectMode::Enforce).await;

    let response = h
        .service
        .check_tool(&h.api_key, body("mystery_tool", r#"{"x": 1}"#))
        .await
        .unwrap();

    wait_for_flush().await;
    let events = h
        .store
        .list_events("proj-test", &EventFilter::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.request_id, response.request_id);
    assert_eq!(event.source, "tool");
    assert_eq!(event.tool_name.as_deref(), Some("mystery_tool"));
    assert_eq!(event.action, "tool_call");
    assert!(event.detectors.is_aligned());
}
