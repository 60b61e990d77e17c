//! Serialization tests for wheelwright-core types.

use chrono::Utc;
use wheelwright_core::artifact::{Artifact, ArtifactKind};
use wheelwright_core::ids::*;
use wheelwright_core::job::*;
use wheelwright_core::workflow::*;

fn sample_job_result() -> JobResult {
    JobResult {
        job_id: JobId::new(),
        identity: JobIdentity::new(vec![
            ("os".to_string(), "ubuntu-latest".to_string()),
            ("runtime".to_string(), "3.10".to_string()),
        ]),
        display_name: "wheels (os=ubuntu-latest, runtime=3.10)".to_string(),
        role: JobRole::BuildWheel,
        platform: "ubuntu-latest".to_string(),
        status: JobStatus::Succeeded,
        steps: vec![StepResult {
            name: "build".to_string(),
            status: StepStatus::Succeeded,
            exit_code: Some(0),
            stdout: vec!["done".to_string()],
            stderr: Vec::new(),
            error: None,
            started_at: Utc::now(),
            duration_ms: 1200,
            attempts: 1,
        }],
        artifact: Some(Artifact::new(
            "pkg-linux.whl",
            ArtifactKind::Wheel,
            "ubuntu-latest",
            b"payload".to_vec(),
        )),
        started_at: Utc::now(),
        duration_ms: 1500,
    }
}

#[test]
fn test_job_result_roundtrip() {
    let result = sample_job_result();

    let json = serde_json::to_string(&result).expect("serialize");
    let parsed: JobResult = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(result.job_id, parsed.job_id);
    assert_eq!(result.identity, parsed.identity);
    assert_eq!(result.status, parsed.status);
    assert_eq!(result.steps[0].status, parsed.steps[0].status);
}

#[test]
fn test_artifact_payload_not_serialized() {
    let result = sample_job_result();

    let json = serde_json::to_string(&result).expect("serialize");
    assert!(!json.contains("payload"));

    let parsed: JobResult = serde_json::from_str(&json).expect("deserialize");
    let artifact = parsed.artifact.expect("artifact");
    assert!(artifact.data.is_empty());
    // The recorded size survives even though the payload does not.
    assert_eq!(artifact.size_bytes, 7);
}

#[test]
fn test_step_status_wire_names() {
    let statuses = vec![
        StepStatus::Succeeded,
        StepStatus::Failed,
        StepStatus::SoftFailed,
        StepStatus::Skipped(SkipReason::ConditionUnmet),
        StepStatus::Skipped(SkipReason::EarlierFailure),
    ];
    let json = serde_json::to_string(&statuses).expect("serialize");
    assert_eq!(
        json,
        r#"["succeeded","failed","soft_failed",{"skipped":"condition_unmet"},{"skipped":"earlier_failure"}]"#
    );
}

#[test]
fn test_job_role_wire_names() {
    assert_eq!(serde_json::to_string(&JobRole::Test).unwrap(), r#""test""#);
    assert_eq!(
        serde_json::to_string(&JobRole::BuildWheel).unwrap(),
        r#""build-wheel""#
    );
    let parsed: JobRole = serde_json::from_str(r#""build-wheel""#).unwrap();
    assert_eq!(parsed, JobRole::BuildWheel);
}

#[test]
fn test_workflow_definition_json_roundtrip() {
    let yaml = r#"
version: "1"
name: wheels
matrix:
  axes:
    os: [ubuntu-latest]
steps:
  - name: build
    run: make
"#;
    let workflow: WorkflowDefinition = serde_yaml::from_str(yaml).expect("parse yaml");
    let json = serde_json::to_string(&workflow).expect("serialize");
    let parsed: WorkflowDefinition = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(parsed.name, "wheels");
    assert_eq!(parsed.max_parallel, 4);
    assert_eq!(parsed.matrix.axes["os"].len(), 1);
}
