//! Integration tests for soma_gst organ operations

use serde_json::{json, Value};
use soma_gst::config::OrganConfig;
use soma_gst::engine::MockEngine;
use soma_gst::organ::{GstOrgan, Organ, Response, Stimulus};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn organ() -> GstOrgan {
    GstOrgan::with_engine(OrganConfig::default(), Arc::new(MockEngine::new()))
}

/// Helper to create a test stimulus
fn create_stimulus(op: &str, input: Value) -> Stimulus {
    Stimulus {
        op: op.to_string(),
        input,
        context: HashMap::new(),
    }
}

async fn call(organ: &GstOrgan, op: &str, input: Value) -> Response {
    organ.stimulate(create_stimulus(op, input)).await.unwrap()
}

#[tokio::test]
async fn test_gst_capabilities() {
    let response = call(&organ(), "gst.capabilities", json!({})).await;

    assert!(response.ok);
    assert_eq!(response.output["name"], "soma_gst");
    let functions = response.output["functions"].as_array().unwrap();
    assert_eq!(functions.len(), 11);
    assert!(functions.iter().all(|f| f.get("output_schema").is_some()));
}

#[tokio::test]
async fn test_caps_parse_preserves_structure_shape() {
    let text = "video/x-raw, format=(string){ I420, NV12 }, width=(int)[ 1, 1920 ], framerate=(fraction)30/1; \
                video/x-raw(memory:DMABuf), format=(string)NV12";
    let first = call(&organ(), "caps.parse", json!({ "caps": text })).await;
    assert!(first.ok);
    let structures = first.output["structures"].as_array().unwrap();
    assert_eq!(structures.len(), 2);
    assert_eq!(structures[0]["fields"]["width"]["type"], "int_range");
    assert_eq!(structures[0]["fields"]["framerate"]["type"], "fraction");
    assert_eq!(structures[1]["features"][0], "memory:DMABuf");

    // parse the display form again: same structures, same field names
    let reparsed = soma_gst::caps::parse(text).unwrap().to_string();
    let second = call(&organ(), "caps.parse", json!({ "caps": reparsed })).await;
    for (a, b) in structures.iter().zip(second.output["structures"].as_array().unwrap()) {
        assert_eq!(a["name"], b["name"]);
        let keys_a: Vec<&String> = a["fields"].as_object().unwrap().keys().collect();
        let keys_b: Vec<&String> = b["fields"].as_object().unwrap().keys().collect();
        assert_eq!(keys_a, keys_b);
    }
}

#[tokio::test]
async fn test_caps_parse_any_and_empty() {
    let organ = organ();
    let any = call(&organ, "caps.parse", json!({ "caps": "ANY" })).await;
    assert_eq!(any.output["is_any"], true);
    let empty = call(&organ, "caps.parse", json!({ "caps": "EMPTY" })).await;
    assert_eq!(empty.output["is_empty"], true);
}

#[tokio::test]
async fn test_caps_compatible() {
    let organ = organ();

    let response = call(
        &organ,
        "caps.compatible",
        json!({
            "caps1": "video/x-raw, format=(string){ I420, NV12 }, width=(int)[ 1, 1920 ]",
            "caps2": "video/x-raw, format=(string)NV12, width=(int)640"
        }),
    )
    .await;
    assert!(response.ok);
    assert_eq!(response.output["compatible"], true);
    assert_eq!(
        response.output["intersection"],
        "video/x-raw, format=(string)NV12, width=(int)640"
    );

    let disjoint = call(
        &organ,
        "caps.compatible",
        json!({ "caps1": "audio/x-raw", "caps2": "video/x-raw" }),
    )
    .await;
    assert!(disjoint.ok);
    assert_eq!(disjoint.output["compatible"], false);
    assert!(disjoint.output.get("intersection").is_none());

    // ANY on one side is compatible with anything non-empty
    let any = call(&organ, "caps.compatible", json!({ "caps1": "ANY", "caps2": "audio/x-raw" })).await;
    assert_eq!(any.output["compatible"], true);
    assert_eq!(any.output["caps1_any"], true);
}

#[tokio::test]
async fn test_caps_compatibility_is_symmetric() {
    let organ = organ();
    let pairs = [
        ("video/x-raw, width=(int)[ 100, 200 ]", "video/x-raw, width=(int)[ 150, 300 ]"),
        ("audio/x-raw, rate=(int){ 44100, 48000 }", "audio/x-raw, rate=(int)22050"),
        ("video/x-h264, stream-format=(string)avc", "video/x-h264"),
    ];
    for (a, b) in pairs {
        let ab = call(&organ, "caps.compatible", json!({ "caps1": a, "caps2": b })).await;
        let ba = call(&organ, "caps.compatible", json!({ "caps1": b, "caps2": a })).await;
        assert_eq!(ab.output["compatible"], ba.output["compatible"], "{a} / {b}");
    }
}

#[tokio::test]
async fn test_elements_can_link() {
    let organ = organ();

    let linked = call(
        &organ,
        "elements.can_link",
        json!({ "src_element": "videotestsrc", "sink_element": "x264enc" }),
    )
    .await;
    assert!(linked.ok);
    assert_eq!(linked.output["can_link"], true);
    assert_eq!(linked.output["compatible_pads"][0]["src_pad"], "src");

    let refused = call(
        &organ,
        "elements.can_link",
        json!({ "src_element": "audiotestsrc", "sink_element": "x264enc" }),
    )
    .await;
    assert!(refused.ok);
    assert_eq!(refused.output["can_link"], false);

    let missing = call(
        &organ,
        "elements.can_link",
        json!({ "src_element": "nosuchelement", "sink_element": "fakesink" }),
    )
    .await;
    assert!(!missing.ok);
    assert_eq!(missing.output["kind"], "NotFound");
    assert_eq!(missing.output["error"], "Element 'nosuchelement' not found");
}

#[tokio::test]
async fn test_suggest_converter() {
    let organ = organ();

    let raw = call(
        &organ,
        "elements.suggest_converter",
        json!({ "src_element": "videotestsrc", "sink_element": "ximagesink" }),
    )
    .await;
    assert!(raw.ok);
    assert_eq!(raw.output["direct_link_possible"], false);
    let converters = &raw.output["suggestions"][0]["converters"];
    assert!(converters.as_array().unwrap().contains(&json!("videoconvert")));

    let direct = call(
        &organ,
        "elements.suggest_converter",
        json!({ "src_element": "videotestsrc", "sink_element": "autovideosink" }),
    )
    .await;
    assert_eq!(direct.output["direct_link_possible"], true);
    assert_eq!(
        direct.output["message"],
        "Elements can be linked directly without converters"
    );
}

#[tokio::test]
async fn test_validate_unknown_element() {
    let response = call(&organ(), "pipeline.validate", json!({ "pipeline": "nosuchelementxyz ! fakesink" })).await;

    assert!(response.ok);
    assert_eq!(response.output["valid"], false);
    assert!(response.output["elements"].as_array().unwrap().is_empty());
    assert!(!response.output["suggestions"].as_array().unwrap().is_empty());
    assert_eq!(response.output["failure_kind"], "element_not_found");
}

#[tokio::test]
async fn test_validate_unknown_property() {
    let response = call(
        &organ(),
        "pipeline.validate",
        json!({ "pipeline": "videotestsrc patern=ball no-such-prop=1 ! fakesink" }),
    )
    .await;

    assert!(response.ok);
    assert_eq!(response.output["valid"], false);
    assert_eq!(response.output["failure_kind"], "property_not_found");
    assert_eq!(
        response.output["errors"][0],
        "no property \"patern\" in element \"videotestsrc0\""
    );
}

#[tokio::test]
async fn test_validate_suggests_similar_names() {
    let response = call(&organ(), "pipeline.validate", json!({ "pipeline": "videotestsrc ! fakesinc" })).await;

    let suggestions: Vec<&str> = response.output["suggestions"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(suggestions.contains(&"Did you mean: fakesink?"), "{suggestions:?}");
}

#[tokio::test]
async fn test_validate_valid_pipeline() {
    let response = call(
        &organ(),
        "pipeline.validate",
        json!({ "pipeline": "videotestsrc ! video/x-raw,format=I420 ! x264enc ! fakesink" }),
    )
    .await;

    assert_eq!(response.output["valid"], true);
    let elements = response.output["elements"].as_array().unwrap();
    assert_eq!(elements.len(), 4);
    assert_eq!(elements[1]["factory"], "capsfilter");
    assert!(response.output["warnings"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_run_sync_timeout_is_success() {
    let response = call(
        &organ(),
        "pipeline.run",
        json!({ "pipeline": "fakesrc ! fakesink", "timeout_seconds": 0.1 }),
    )
    .await;

    assert!(response.ok);
    assert_eq!(response.output["success"], true);
    assert_eq!(response.output["status"], "timeout");
}

#[tokio::test]
async fn test_run_sync_eos() {
    let response = call(
        &organ(),
        "pipeline.run",
        json!({ "pipeline": "videotestsrc num-buffers=5 ! fakesink", "timeout_seconds": 5 }),
    )
    .await;

    assert!(response.ok);
    assert_eq!(response.output["status"], "eos");
    assert_eq!(response.output["message"], "Pipeline completed (EOS)");
}

#[tokio::test]
async fn test_run_sync_runtime_failure() {
    let response = call(
        &organ(),
        "pipeline.run",
        json!({ "pipeline": "filesrc location=missing.wav ! fakesink", "timeout_seconds": 5 }),
    )
    .await;

    assert!(!response.ok);
    assert_eq!(response.output["kind"], "RuntimeFailure");
    assert_eq!(response.output["error"], "Resource not found.");
    assert!(response.output["debug"].as_str().is_some());
}

#[tokio::test]
async fn test_run_invalid_pipeline_reports_validation() {
    let response = call(&organ(), "pipeline.run", json!({ "pipeline": "audiotestsrc ! ximagesink" })).await;

    assert!(!response.ok);
    assert_eq!(response.output["kind"], "ConstructionFailure");
    assert_eq!(response.output["validation"]["failure_kind"], "link_failed");
}

#[tokio::test]
async fn test_run_in_working_directory() {
    let dir = TempDir::new().unwrap();
    let response = call(
        &organ(),
        "pipeline.run",
        json!({
            "pipeline": "videotestsrc num-buffers=2 ! x264enc ! mp4mux ! filesink location=out.mp4",
            "timeout_seconds": 5,
            "working_directory": dir.path().to_str().unwrap()
        }),
    )
    .await;

    assert!(response.ok, "{}", response.output);
    assert!(dir.path().join("out.mp4").exists());
}

#[tokio::test]
async fn test_run_rejects_missing_working_directory() {
    let response = call(
        &organ(),
        "pipeline.run",
        json!({ "pipeline": "fakesrc ! fakesink", "working_directory": "/nonexistent/soma_gst" }),
    )
    .await;

    assert!(!response.ok);
    assert!(response.output["error"].as_str().unwrap().contains("Working directory"));
}

#[tokio::test]
async fn test_async_pipeline_lifecycle() {
    let organ = organ();

    let started = call(
        &organ,
        "pipeline.run",
        json!({ "pipeline": "videotestsrc ! videoconvert ! fakesink", "async_mode": true }),
    )
    .await;
    assert!(started.ok);
    let id = started.output["pipeline_id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 8);

    // the bus forwarder reports the pipeline reaching PLAYING
    let mut playing = false;
    for _ in 0..200 {
        let status = call(&organ, "pipeline.status", json!({ "pipeline_id": id })).await;
        assert_eq!(status.output["found"], true);
        if status.output["state"] == "playing" {
            playing = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(playing);

    let listed = call(&organ, "pipeline.list", json!({})).await;
    assert_eq!(listed.output["count"], 1);
    assert_eq!(listed.output["pipelines"][0]["pipeline_id"], id.as_str());

    let stopped = call(&organ, "pipeline.stop", json!({ "pipeline_id": id })).await;
    assert!(stopped.ok);
    assert_eq!(stopped.output["message"], "Pipeline stopped");

    let status = call(&organ, "pipeline.status", json!({ "pipeline_id": id })).await;
    assert!(status.ok);
    assert_eq!(status.output["found"], false);

    let again = call(&organ, "pipeline.stop", json!({ "pipeline_id": id })).await;
    assert!(!again.ok);
    assert_eq!(again.output["kind"], "NotFound");
}

#[tokio::test]
async fn test_unknown_pipeline_id() {
    let organ = organ();

    let status = call(&organ, "pipeline.status", json!({ "pipeline_id": "deadbeef" })).await;
    assert!(status.ok);
    assert_eq!(status.output["found"], false);

    let stop = call(&organ, "pipeline.stop", json!({ "pipeline_id": "deadbeef" })).await;
    assert!(!stop.ok);
    assert_eq!(stop.output["error"], "Pipeline 'deadbeef' not found");
}

#[tokio::test]
async fn test_list_truncates_long_descriptions() {
    let organ = organ();
    let long = format!("videotestsrc ! {}fakesink", "queue ! ".repeat(20));

    let started = call(&organ, "pipeline.run", json!({ "pipeline": long, "async_mode": true })).await;
    assert!(started.ok);

    let listed = call(&organ, "pipeline.list", json!({})).await;
    let shown = listed.output["pipelines"][0]["pipeline"].as_str().unwrap();
    assert_eq!(shown.chars().count(), 103);
    assert!(shown.ends_with("..."));

    let id = started.output["pipeline_id"].as_str().unwrap();
    assert!(call(&organ, "pipeline.stop", json!({ "pipeline_id": id })).await.ok);
}

#[tokio::test]
async fn test_pipeline_graph() {
    let response = call(
        &organ(),
        "pipeline.graph",
        json!({ "pipeline": "audiotestsrc ! tee name=t  t. ! queue ! fakesink  t. ! queue ! autoaudiosink" }),
    )
    .await;

    assert!(response.ok);
    let dot = response.output["dot"].as_str().unwrap();
    assert!(dot.starts_with("digraph pipeline {"));
    assert!(dot.contains("\"t\" -> \"queue0\""));
    assert!(dot.contains("\"t\" -> \"queue1\""));
}

#[tokio::test]
async fn test_metrics_track_requests() {
    let organ = organ();
    call(&organ, "caps.parse", json!({ "caps": "ANY" })).await;
    call(&organ, "pipeline.validate", json!({ "pipeline": "fakesrc ! fakesink" })).await;
    call(&organ, "invalid.operation", json!({})).await;

    let metrics = call(&organ, "metrics", json!({})).await;
    assert_eq!(metrics.output["total_requests"], 3);
    assert_eq!(metrics.output["failed_requests"], 1);
    assert_eq!(metrics.output["operations"]["caps"], 1);
    assert_eq!(metrics.output["operations"]["validate"], 1);
}

#[tokio::test]
async fn test_unsupported_operation() {
    let response = call(&organ(), "invalid.operation", json!({})).await;

    assert!(!response.ok);
    assert!(response.output["error"].as_str().unwrap().contains("Unsupported"));
}
