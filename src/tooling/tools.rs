//! Tool descriptions from `~/.workspace/tools/*.json`.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::Result;
use crate::tooling::sorted_files_with_extension;

/// A free-form tool description. Only `id` has meaning here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ToolRecord {
    fn is_empty(&self) -> bool {
        self.id.is_none() && self.fields.is_empty()
    }

    /// Shown when no tool files are installed.
    #[must_use]
    pub fn vnc_default() -> Self {
        let mut fields = Map::new();
        fields.insert("name".to_string(), Value::from("VNC"));
        fields.insert(
            "url_path".to_string(),
            Value::from("/tools/vnc/?password=vncpassword"),
        );
        fields.insert(
            "description".to_string(),
            Value::from("Desktop GUI for the workspace"),
        );
        Self {
            id: Some("vnc-link".to_string()),
            fields,
        }
    }
}

/// Contents of one tool file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ToolFile {
    Empty,
    List(Vec<ToolRecord>),
    Single(ToolRecord),
}

impl ToolFile {
    #[must_use]
    pub fn into_records(self) -> Vec<ToolRecord> {
        match self {
            Self::Empty => Vec::new(),
            Self::List(records) => records,
            Self::Single(record) if record.is_empty() => Vec::new(),
            Self::Single(record) => vec![record],
        }
    }
}

/// All tools from `dir`, first occurrence of each `id` wins.
///
/// Unreadable or malformed files are reported and skipped. Falls back to
/// [`ToolRecord::vnc_default`] when nothing is found.
pub fn list_tools(dir: &Path) -> Result<Vec<ToolRecord>> {
    let mut seen_ids = HashSet::new();
    let mut tools = Vec::new();

    for file in sorted_files_with_extension(dir, "json")? {
        let parsed = fs::read(&file)
            .map_err(|error| error.to_string())
            .and_then(|raw| serde_json::from_slice::<ToolFile>(&raw).map_err(|e| e.to_string()));
        let records = match parsed {
            Ok(tool_file) => tool_file.into_records(),
            Err(error) => {
                eprintln!("[WST-TOOLS] skipping tool file {}: {error}", file.display());
                continue;
            }
        };

        for record in records {
            let duplicate = record
                .id
                .as_ref()
                .is_some_and(|id| !seen_ids.insert(id.clone()));
            if !duplicate {
                tools.push(record);
            }
        }
    }

    if tools.is_empty() {
        eprintln!("[WST-TOOLS] no workspace tools found at {}", dir.display());
        tools.push(ToolRecord::vnc_default());
    }
    Ok(tools)
}
