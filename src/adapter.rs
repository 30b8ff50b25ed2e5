//! # Adapter Module
//!
//! Adapters turn a finished build (prerendered files plus the [`Manifest`])
//! into something a host can serve. Packaging for a particular platform is out
//! of scope; the [`Adapter`] trait is the seam, and [`StaticAdapter`] covers
//! fully static hosting.

use crate::app::App;
use crate::manifest::Manifest;
use crate::prerender::PrerenderReport;
use anyhow::{bail, Context};
use std::fs;
use std::path::Path;
use tracing::info;

/// Everything an adapter can read about the build.
#[derive(Debug, Clone, Copy)]
pub struct Build<'a> {
    pub app: &'a App,
    pub manifest: &'a Manifest,
    pub report: &'a PrerenderReport,
    pub out_dir: &'a Path,
}

pub trait Adapter {
    fn name(&self) -> &str;

    fn adapt(&self, build: &Build<'_>) -> anyhow::Result<()>;
}

/// Writes `manifest.json` next to the prerendered files.
///
/// Fails when any route still needs a server, unless a fallback page is
/// configured: the fallback is the bare app shell, for hosts that serve it
/// for every unknown path and let the client render.
#[derive(Debug, Clone, Default)]
pub struct StaticAdapter {
    pub fallback: Option<String>,
}

impl StaticAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_fallback(fallback: impl Into<String>) -> Self {
        Self {
            fallback: Some(fallback.into()),
        }
    }
}

impl Adapter for StaticAdapter {
    fn name(&self) -> &str {
        "static"
    }

    fn adapt(&self, build: &Build<'_>) -> anyhow::Result<()> {
        let dynamic: Vec<&str> = build
            .manifest
            .dynamic_routes()
            .map(|r| r.id.as_str())
            .collect();

        match &self.fallback {
            None if !dynamic.is_empty() => bail!(
                "static adapter: these routes were not prerendered and need a server: {}. \
                 Mark them prerenderable, add entries for them, or configure a fallback page",
                dynamic.join(", ")
            ),
            None => {}
            Some(name) => {
                let file = build.out_dir.join(name.trim_start_matches('/'));
                if file.exists() {
                    bail!("static adapter: fallback {} would overwrite a prerendered file", file.display());
                }
                let shell = build.app.shell().render("", "", None);
                if let Some(dir) = file.parent() {
                    fs::create_dir_all(dir)
                        .with_context(|| format!("Failed to create {}", dir.display()))?;
                }
                fs::write(&file, shell)
                    .with_context(|| format!("Failed to write fallback {}", file.display()))?;
                info!(fallback = %file.display(), dynamic_routes = dynamic.len(), "Wrote fallback page");
            }
        }

        build.manifest.write(&build.out_dir.join("manifest.json"))?;
        info!(
            adapter = self.name(),
            out_dir = %build.out_dir.display(),
            prerendered = build.manifest.prerendered.len(),
            "Adapter finished"
        );
        Ok(())
    }
}
