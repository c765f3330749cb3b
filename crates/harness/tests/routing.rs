use std::collections::BTreeMap;

use serde_json::json;
use snapmerge_core::{OwnerId, Table};
use snapmerge_engine::{EngineError, ImportResult, LegacyImport};
use snapmerge_harness::TestInstance;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Stand-in for the pre-table importer; records what it was handed.
#[derive(Default)]
struct RecordingLegacy {
    calls: Vec<(String, serde_json::Value)>,
    fail: bool,
}

impl LegacyImport for RecordingLegacy {
    fn import_legacy(
        &mut self,
        owner: &OwnerId,
        payload: &serde_json::Value,
    ) -> Result<BTreeMap<String, ImportResult>, EngineError> {
        self.calls.push((owner.to_string(), payload.clone()));
        if self.fail {
            return Err(EngineError::Legacy("unsupported schema version".into()));
        }
        let mut results = BTreeMap::new();
        results.insert(
            "sessions".to_string(),
            ImportResult {
                added: 3,
                ..Default::default()
            },
        );
        Ok(results)
    }
}

#[test]
fn legacy_payload_goes_to_legacy_importer() -> TestResult {
    let mut inst = TestInstance::new()?;
    let mut legacy = RecordingLegacy::default();
    let payload = json!({ "version": 3, "state": { "sessions": [{ "id": "s1" }] } });

    let result = inst.import_text(&payload.to_string(), &mut legacy);

    assert!(result.success);
    assert_eq!(result.result(Table::Sessions).unwrap().added, 3);
    assert_eq!(legacy.calls.len(), 1);
    assert_eq!(legacy.calls[0].0, inst.owner.to_string());
    assert_eq!(legacy.calls[0].1, payload);
    assert_eq!(inst.count(Table::Sessions)?, 0);
    Ok(())
}

#[test]
fn legacy_failure_is_reported() -> TestResult {
    let mut inst = TestInstance::new()?;
    let mut legacy = RecordingLegacy {
        fail: true,
        ..Default::default()
    };

    let result = inst.import_text(r#"{ "state": {} }"#, &mut legacy);

    assert!(!result.success);
    assert!(result.results.is_empty());
    let error = result.error.unwrap();
    assert!(error.cause.contains("unsupported schema version"));
    Ok(())
}

#[test]
fn table_payload_bypasses_legacy_importer() -> TestResult {
    let mut inst = TestInstance::new()?;
    let mut legacy = RecordingLegacy::default();
    let payload = json!({
        "data": { "session_groups": [{ "id": "sg-1", "name": "Work" }] }
    });

    let result = inst.import_text(&payload.to_string(), &mut legacy);

    assert!(result.success);
    assert!(legacy.calls.is_empty());
    assert_eq!(result.result(Table::SessionGroups).unwrap().added, 1);
    assert_eq!(inst.count(Table::SessionGroups)?, 1);
    Ok(())
}

#[test]
fn unparseable_text_fails_without_writing() -> TestResult {
    let mut inst = TestInstance::new()?;
    let mut legacy = RecordingLegacy::default();

    let broken = inst.import_text("{ not json", &mut legacy);
    let shapeless = inst.import_text(r#"{ "data": [1, 2] }"#, &mut legacy);

    for result in [broken, shapeless] {
        assert!(!result.success);
        assert_eq!(result.results.len(), Table::ALL.len());
        assert_eq!(result.error.unwrap().message, "import failed");
    }
    assert!(legacy.calls.is_empty());
    Ok(())
}
