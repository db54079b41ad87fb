//! Output manifests extracted from ComfyUI's `/history/{prompt_id}` document.
//!
//! The history endpoint answers `{}` until the prompt has been recorded,
//! then `{ "<prompt_id>": { "outputs": { "<node_id>": { "images": [...] } } } }`.

use std::collections::BTreeMap;

use serde::Deserialize;

/// One produced file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtifactDescriptor {
    pub filename: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
}

/// Outputs of a single node. Only image artifacts are tracked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NodeOutput {
    #[serde(default)]
    pub images: Vec<ArtifactDescriptor>,
}

/// Node id to produced artifacts for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct OutputManifest(pub BTreeMap<String, NodeOutput>);

impl OutputManifest {
    /// True when no node produced an artifact.
    pub fn is_empty(&self) -> bool {
        self.first_artifact().is_none()
    }

    /// First artifact of the first node that has one. No particular node
    /// id is assumed.
    pub fn first_artifact(&self) -> Option<&ArtifactDescriptor> {
        self.0.values().find_map(|node| node.images.first())
    }
}

/// Extract the manifest for `prompt_id` from a history document.
///
/// Returns `Ok(None)` when the prompt (or its `outputs`) is not present yet.
pub fn manifest_from_history(
    history: &serde_json::Value,
    prompt_id: &str,
) -> Result<Option<OutputManifest>, serde_json::Error> {
    match history.get(prompt_id).and_then(|entry| entry.get("outputs")) {
        Some(outputs) if !outputs.is_null() => {
            OutputManifest::deserialize(outputs).map(Some)
        }
        _ => Ok(None),
    }
}
