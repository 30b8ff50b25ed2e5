//! Filesystem route discovery.
//!
//! A directory is a route id; marker files inside it fill the node's slots.
//! Slots are named after the marker's relative path without extension, e.g.
//! `routes/blog/[slug]/+page.server.rs` becomes the server load slot
//! `/blog/[slug]/+page.server`.
//!
//! | marker | slot |
//! |---|---|
//! | `+page.<tpl>` / `+layout.<tpl>` | template (file content is the template source) |
//! | `+page.<script>` / `+layout.<script>` | universal load |
//! | `+page.server.*` / `+layout.server.*` | server load |
//! | `+server.*` | endpoint |
//! | `+error.*` | error boundary template |
//! | `+options.yaml` / `+options.json` | node options |
//!
//! Script extensions are `rs`, `js` and `ts`; any other extension is a template.

use super::types::{LevelSlots, NodeOptions, RouteNode};
use crate::error::ConfigError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const SCRIPT_EXTENSIONS: &[&str] = &["rs", "js", "ts"];

/// Result of walking a routes directory.
#[derive(Debug, Clone, Default)]
pub struct Discovered {
    /// One node per directory holding at least one marker, in walk order
    pub nodes: Vec<RouteNode>,
    /// Template slot name -> source file
    pub templates: Vec<(String, PathBuf)>,
}

fn invalid(dir: &Path, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidDescription {
        source: dir.display().to_string(),
        message: message.into(),
    }
}

fn route_id(relative: &Path) -> String {
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    format!("/{}", parts.join("/"))
}

fn slot_name(id: &str, marker: &str) -> String {
    format!("{}/{marker}", id.trim_end_matches('/'))
}

/// Walk `dir` and build route nodes from its marker files.
pub fn discover(dir: &Path) -> Result<Discovered, ConfigError> {
    if !dir.is_dir() {
        return Err(invalid(dir, "routes directory does not exist"));
    }

    let mut discovered = Discovered::default();
    let mut index: HashMap<String, usize> = HashMap::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| invalid(dir, e.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Some(marker) = file_name.strip_prefix('+') else {
            continue;
        };

        let relative_dir = entry
            .path()
            .parent()
            .and_then(|p| p.strip_prefix(dir).ok())
            .unwrap_or_else(|| Path::new(""));
        let id = route_id(relative_dir);

        let pos = *index.entry(id.clone()).or_insert_with(|| {
            discovered.nodes.push(RouteNode::new(id.clone()));
            discovered.nodes.len() - 1
        });
        let node = &mut discovered.nodes[pos];

        let mut parts = marker.split('.');
        let kind = parts.next().unwrap_or_default();
        let rest: Vec<&str> = parts.collect();
        let is_server = rest.first() == Some(&"server");
        let ext = rest.last().copied().unwrap_or_default();
        let is_script = SCRIPT_EXTENSIONS.contains(&ext);

        match kind {
            "page" | "layout" => {
                let slots = if kind == "page" {
                    node.page.get_or_insert_with(LevelSlots::default)
                } else {
                    node.layout.get_or_insert_with(LevelSlots::default)
                };
                let base = slot_name(&id, &format!("+{kind}"));
                if is_server {
                    slots.server_load = Some(format!("{base}.server"));
                } else if is_script {
                    slots.load = Some(base);
                } else {
                    slots.template = Some(base.clone());
                    discovered.templates.push((base, entry.path().to_path_buf()));
                }
            }
            "server" => node.endpoint = Some(slot_name(&id, "+server")),
            "error" => {
                let name = slot_name(&id, "+error");
                node.error = Some(name.clone());
                discovered.templates.push((name, entry.path().to_path_buf()));
            }
            "options" => {
                let text = std::fs::read_to_string(entry.path())
                    .map_err(|e| invalid(entry.path(), e.to_string()))?;
                let options: NodeOptions = if ext == "json" {
                    serde_json::from_str(&text).map_err(|e| invalid(entry.path(), e.to_string()))?
                } else {
                    serde_yaml::from_str(&text).map_err(|e| invalid(entry.path(), e.to_string()))?
                };
                node.options = options;
            }
            other => {
                return Err(invalid(
                    entry.path(),
                    format!("unknown route marker '+{other}'"),
                ));
            }
        }
    }

    debug!(
        dir = %dir.display(),
        nodes = discovered.nodes.len(),
        templates = discovered.templates.len(),
        "Discovered routes"
    );
    Ok(discovered)
}
