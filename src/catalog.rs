//! Acceptance profiles and orchestration prompts
//!
//! Profiles are JSON threshold files exposed as MCP resources; prompts are
//! Markdown files exposed as MCP prompts. Both are read from disk on every
//! request, so edits apply without a restart.

use std::path::{Path, PathBuf};

use serde_json::{Value, json};
use tracing::{error, warn};

use crate::config::Config;

/// An MCP resource backed by one file
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub key: &'static str,
    pub file: &'static str,
    pub description: &'static str,
}

pub const PROFILES: &[Entry] = &[
    Entry {
        key: "resource://acceptance/vm-core",
        file: "vm-core.json",
        description: "Acceptance thresholds for Linux VMs",
    },
    Entry {
        key: "resource://acceptance/db-oracle",
        file: "db-oracle.json",
        description: "Acceptance thresholds for Oracle databases",
    },
    Entry {
        key: "resource://acceptance/db-mongo",
        file: "db-mongo.json",
        description: "Acceptance thresholds for MongoDB clusters",
    },
];

pub const PROMPTS: &[Entry] = &[
    Entry {
        key: "planner",
        file: "planner.md",
        description: "Plan the validation steps for a recovered resource",
    },
    Entry {
        key: "evaluator",
        file: "evaluator.md",
        description: "Judge tool results against the acceptance profile",
    },
    Entry {
        key: "summarizer",
        file: "summarizer.md",
        description: "Summarize a validation run for operators",
    },
];

pub const PROFILE_MIME: &str = "application/json";

pub struct Catalog {
    resource_dir: PathBuf,
    prompt_dir: PathBuf,
}

impl Catalog {
    pub fn new(resource_dir: impl Into<PathBuf>, prompt_dir: impl Into<PathBuf>) -> Self {
        Self {
            resource_dir: resource_dir.into(),
            prompt_dir: prompt_dir.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.resource_dir, &config.prompt_dir)
    }

    /// `resources/list` entries
    pub fn resources(&self) -> Vec<Value> {
        PROFILES
            .iter()
            .map(|p| {
                json!({
                    "uri": p.key,
                    "name": p.file.trim_end_matches(".json"),
                    "description": p.description,
                    "mimeType": PROFILE_MIME,
                })
            })
            .collect()
    }

    /// `prompts/list` entries
    pub fn prompts(&self) -> Vec<Value> {
        PROMPTS
            .iter()
            .map(|p| json!({ "name": p.key, "description": p.description, "arguments": [] }))
            .collect()
    }

    /// Profile text for a known URI; `"{}"` when its file cannot be read
    pub fn read_resource(&self, uri: &str) -> Option<String> {
        let entry = PROFILES.iter().find(|p| p.key == uri)?;
        Some(read_or(&self.resource_dir.join(entry.file), "{}"))
    }

    /// Prompt text for a known name; empty when its file cannot be read
    pub fn get_prompt(&self, name: &str) -> Option<(&'static Entry, String)> {
        let entry = PROMPTS.iter().find(|p| p.key == name)?;
        Some((entry, read_or(&self.prompt_dir.join(entry.file), "")))
    }
}

fn read_or(path: &Path, fallback: &str) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "catalog file not found");
            fallback.to_string()
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read catalog file");
            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_resource_from_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("vm-core.json"), r#"{"root_fs_max_pct": 90}"#).unwrap();
        let catalog = Catalog::new(dir.path(), dir.path());

        assert_eq!(
            catalog.read_resource("resource://acceptance/vm-core").as_deref(),
            Some(r#"{"root_fs_max_pct": 90}"#)
        );
        assert_eq!(
            catalog.read_resource("resource://acceptance/db-mongo").as_deref(),
            Some("{}")
        );
        assert!(catalog.read_resource("resource://acceptance/nope").is_none());
    }

    #[test]
    fn test_get_prompt_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("planner.md"), "# Plan\n").unwrap();
        let catalog = Catalog::new(dir.path(), dir.path());

        let (entry, text) = catalog.get_prompt("planner").unwrap();
        assert_eq!(entry.file, "planner.md");
        assert_eq!(text, "# Plan\n");

        let (_, text) = catalog.get_prompt("summarizer").unwrap();
        assert!(text.is_empty());
        assert!(catalog.get_prompt("critic").is_none());
    }

    #[test]
    fn test_unreadable_profile_falls_back() {
        let dir = TempDir::new().unwrap();
        // A directory where the file should be cannot be read as text.
        std::fs::create_dir(dir.path().join("db-oracle.json")).unwrap();
        let catalog = Catalog::new(dir.path(), dir.path());
        assert_eq!(
            catalog.read_resource("resource://acceptance/db-oracle").as_deref(),
            Some("{}")
        );
    }

    #[test]
    fn test_listings() {
        let catalog = Catalog::new("/nonexistent", "/nonexistent");
        let uris: Vec<String> = catalog
            .resources()
            .iter()
            .map(|r| r["uri"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(
            uris,
            [
                "resource://acceptance/vm-core",
                "resource://acceptance/db-oracle",
                "resource://acceptance/db-mongo"
            ]
        );
        assert_eq!(catalog.resources()[0]["name"], "vm-core");
        let names: Vec<Value> = catalog.prompts().iter().map(|p| p["name"].clone()).collect();
        assert_eq!(names, [json!("planner"), json!("evaluator"), json!("summarizer")]);
    }
}
