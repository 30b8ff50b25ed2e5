//! Application configuration.
//!
//! Loaded from `kit.yaml` / `kit.yml` (serde_yaml) or `kit.toml` (toml),
//! picked by extension. Every section and field has a default, so an empty
//! file (or no file at all) is a valid configuration.
//!
//! ```yaml
//! app:
//!   dev: false
//!   template: src/app.html
//! routes:
//!   description: src/routes
//!   trailing_slash: never
//! prerender:
//!   out_dir: build
//!   concurrency: 4
//!   entries: ["*", "/sitemap.xml"]
//!   origin: https://example.com
//! fetch:
//!   max_depth: 8
//!   forward_headers: [authorization, accept-language]
//! server:
//!   addr: 127.0.0.1:3000
//! ```

use crate::routes::TrailingSlash;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KitConfig {
    pub app: AppSection,
    pub routes: RoutesSection,
    pub prerender: PrerenderSection,
    pub fetch: FetchSection,
    pub server: ServerSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppSection {
    /// Show unexpected error messages to clients
    pub dev: bool,
    /// App shell HTML file; the built-in shell when unset
    pub template: Option<PathBuf>,
    /// `id` of the hydration data script element
    pub data_id: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            dev: false,
            template: None,
            data_id: "kit-data".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoutesSection {
    /// `routes.yaml` / `routes.json` or a routes directory
    pub description: PathBuf,
    /// Applied to the root node when it sets no trailing slash option
    pub trailing_slash: TrailingSlash,
}

impl Default for RoutesSection {
    fn default() -> Self {
        Self {
            description: PathBuf::from("src/routes"),
            trailing_slash: TrailingSlash::Ignore,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PrerenderSection {
    pub out_dir: PathBuf,
    /// Worker coroutines rendering pages in parallel
    pub concurrency: usize,
    /// Follow same-origin links found in rendered pages
    pub crawl: bool,
    /// Paths to start from; `*` means every prerenderable route without
    /// required params
    pub entries: Vec<String>,
    /// Fail on warnings (404 links, unreached routes)
    pub strict: bool,
    /// Origin of synthetic requests; only links to this origin are crawled
    pub origin: String,
}

impl Default for PrerenderSection {
    fn default() -> Self {
        Self {
            out_dir: PathBuf::from("build"),
            concurrency: 1,
            crawl: true,
            entries: vec!["*".to_string()],
            strict: false,
            origin: "http://localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchSection {
    /// Internal fetches may nest this deep
    pub max_depth: usize,
    /// Request headers copied onto internal fetches (cookies always are)
    pub forward_headers: Vec<String>,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            max_depth: 8,
            forward_headers: vec!["authorization".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub addr: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl KitConfig {
    /// Load from a YAML or TOML file, picked by extension.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config: KitConfig = match ext.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?,
            other => bail!(
                "unsupported config format '{other}' for {}; use .yaml, .yml or .toml",
                path.display()
            ),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load `path` when given, otherwise the defaults.
    pub fn load_or_default(path: Option<&Path>) -> anyhow::Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.prerender.concurrency == 0 {
            bail!("prerender.concurrency must be at least 1");
        }
        if self.fetch.max_depth == 0 {
            bail!("fetch.max_depth must be at least 1");
        }
        url::Url::parse(&self.prerender.origin)
            .with_context(|| format!("prerender.origin '{}' is not a URL", self.prerender.origin))?;
        Ok(())
    }
}
