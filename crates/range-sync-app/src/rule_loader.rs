//! Reads a rule-set document off disk (YAML or JSON, detected by file
//! extension) and hands it to `RuleSetDocument::validate_and_build`.
//! The core crate stays file-format agnostic; this is the one place
//! in the app that knows `.yaml`/`.yml`/`.json` exist.

use std::path::Path;

use range_sync_core::RuleSet;
use range_sync_core::rules::RuleSetDocument;

use crate::error::RuleLoadError;

pub fn load_rule_set(path: &str) -> Result<RuleSet, RuleLoadError> {
    let raw = std::fs::read_to_string(path).map_err(|source| RuleLoadError::Io {
        path: path.to_string(),
        source,
    })?;

    let document = parse_document(path, &raw)?;

    document.validate_and_build().map_err(|problems| RuleLoadError::Invalid {
        path: path.to_string(),
        problems,
    })
}

fn parse_document(path: &str, raw: &str) -> Result<RuleSetDocument, RuleLoadError> {
    let extension = Path::new(path)
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match extension.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(raw).map_err(|e| RuleLoadError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        }),
        "json" => serde_json::from_str(raw).map_err(|e| RuleLoadError::Parse {
            path: path.to_string(),
            reason: e.to_string(),
        }),
        other => Err(RuleLoadError::Parse {
            path: path.to_string(),
            reason: format!("unrecognized rule-set file extension {other:?}, expected .yaml/.yml/.json"),
        }),
    }
}
