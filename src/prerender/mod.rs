//! # Prerender Module
//!
//! Renders pages at build time by driving the live request pipeline with
//! synthetic `GET` requests and writing the responses to disk.
//!
//! ## Overview
//!
//! 1. Seed paths from `prerender.entries` (`*` = every prerenderable route
//!    without required params) and from each route's enumerated entries
//! 2. Render each path on a fixed pool of worker coroutines
//! 3. Write HTML, `__data.json`, endpoint bodies or a redirect page
//! 4. Queue same-origin links found in the HTML and paths fetched by loads
//! 5. Stop when the queue drains
//!
//! The visited set and the written set are both check-and-insert, so a path
//! linked from many pages (or from itself) is rendered once and every output
//! file is written once.
//!
//! ## Failure policy
//!
//! - 404 links and 404 fetches are warnings
//! - prerenderable routes that were never reached are warnings
//! - any other error status stops the run
//! - with `prerender.strict`, warnings fail the run as well

mod crawl;
mod driver;
mod output;
mod pool;

pub use crawl::extract_links;
pub use driver::prerender;
pub use output::{data_file, html_file, raw_file};

use serde::Serialize;
use std::path::PathBuf;

/// One rendered path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrerenderedPage {
    pub path: String,
    /// Route that served it; `None` for unmatched paths
    pub route_id: Option<String>,
    pub status: u16,
    /// Files written for this path (empty when another path wrote them first)
    pub files: Vec<PathBuf>,
}

/// Outcome of a successful prerender run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrerenderReport {
    pub out_dir: PathBuf,
    /// Sorted by path
    pub pages: Vec<PrerenderedPage>,
    pub warnings: Vec<String>,
    /// Ids of routes marked `prerender: true` that no entry or link reached
    pub unreached: Vec<String>,
    pub files_written: usize,
}

impl PrerenderReport {
    /// Paths rendered with a 2xx status.
    #[must_use]
    pub fn paths(&self) -> Vec<&str> {
        self.pages
            .iter()
            .filter(|p| (200..300).contains(&p.status))
            .map(|p| p.path.as_str())
            .collect()
    }

    #[must_use]
    pub fn page(&self, path: &str) -> Option<&PrerenderedPage> {
        self.pages.iter().find(|p| p.path == path)
    }
}
