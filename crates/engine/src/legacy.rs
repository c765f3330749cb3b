//! Entry point for snapshots in the older, pre-table format.
//!
//! The legacy importer is a separate collaborator; this module only decides
//! which path a payload takes and wraps the legacy outcome in the same
//! envelope the table importer produces.

use std::collections::BTreeMap;

use snapmerge_core::OwnerId;

use crate::error::EngineError;
use crate::result::{AggregateResult, ImportFailure, ImportResult};

pub trait LegacyImport {
    fn import_legacy(
        &mut self,
        owner: &OwnerId,
        payload: &serde_json::Value,
    ) -> Result<BTreeMap<String, ImportResult>, EngineError>;
}

/// Older exports carry their data under `state` and have no `data` map.
pub fn is_legacy_payload(payload: &serde_json::Value) -> bool {
    payload.get("data").is_none() && payload.get("state").is_some()
}

/// Run the legacy importer and report its per-table results unchanged.
pub fn import_legacy<L: LegacyImport + ?Sized>(
    legacy: &mut L,
    owner: &OwnerId,
    payload: &serde_json::Value,
) -> AggregateResult {
    match legacy.import_legacy(owner, payload) {
        Ok(results) => AggregateResult {
            success: true,
            results,
            error: None,
            conflicts: Vec::new(),
        },
        Err(e) => AggregateResult {
            success: false,
            results: BTreeMap::new(),
            error: Some(ImportFailure::from_error(&e)),
            conflicts: Vec::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(Result<BTreeMap<String, ImportResult>, String>);

    impl LegacyImport for Canned {
        fn import_legacy(
            &mut self,
            _owner: &OwnerId,
            _payload: &serde_json::Value,
        ) -> Result<BTreeMap<String, ImportResult>, EngineError> {
            self.0.clone().map_err(EngineError::Legacy)
        }
    }

    #[test]
    fn detects_legacy_shape() {
        assert!(is_legacy_payload(&serde_json::json!({"state": {"sessions": []}})));
        assert!(!is_legacy_payload(&serde_json::json!({"data": {}})));
        assert!(!is_legacy_payload(&serde_json::json!({"data": {}, "state": {}})));
    }

    #[test]
    fn wraps_results_unchanged() {
        let results = BTreeMap::from([(
            "sessions".to_string(),
            ImportResult {
                added: 3,
                skips: 1,
                ..Default::default()
            },
        )]);
        let mut legacy = Canned(Ok(results.clone()));
        let aggregate = import_legacy(&mut legacy, &OwnerId::new("u1"), &serde_json::json!({}));
        assert!(aggregate.success);
        assert_eq!(aggregate.results, results);
    }

    #[test]
    fn wraps_failure() {
        let mut legacy = Canned(Err("bad state".into()));
        let aggregate = import_legacy(&mut legacy, &OwnerId::new("u1"), &serde_json::json!({}));
        assert!(!aggregate.success);
        assert!(aggregate.error.unwrap().cause.contains("bad state"));
    }
}
