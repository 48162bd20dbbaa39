//! Filesystem roots offered to servers through `roots/list`.

use std::path::Path;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::warn;

use crate::agent::util::path::{
    canonicalize_path_sys,
    file_uri,
};
use crate::agent::util::providers::SystemProvider;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    /// A `file://` URI.
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Expands and canonicalizes the configured paths into roots. Paths that cannot be resolved are
/// logged and skipped.
pub fn resolve_roots<P: SystemProvider>(paths: &[String], provider: &P) -> Vec<Root> {
    paths
        .iter()
        .filter_map(|path| match canonicalize_path_sys(path, provider).and_then(|p| Ok((file_uri(&p)?, p))) {
            Ok((uri, canonical)) => Some(Root {
                uri,
                name: Path::new(&canonical)
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string()),
            }),
            Err(err) => {
                warn!(?err, path, "skipping root that could not be resolved");
                None
            },
        })
        .collect()
}
