//! Mapping from URL paths to files in the output directory.
//!
//! | request                  | file                       |
//! |--------------------------|----------------------------|
//! | `/`                      | `index.html`               |
//! | `/about`                 | `about.html`               |
//! | `/about/` (`always`)     | `about/index.html`         |
//! | `/about/__data.json`     | `about/__data.json`        |
//! | `/api/posts.json`        | `api/posts.json`           |

use crate::error::PrerenderError;
use crate::response::DATA_SUFFIX;
use crate::routes::TrailingSlash;
use dashmap::DashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Decoded path segments, or `None` when the path would escape the output
/// directory.
fn segments(path: &str) -> Option<Vec<String>> {
    let mut out = Vec::new();
    for raw in path.split('/').filter(|s| !s.is_empty()) {
        let seg = urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        if seg == "." || seg == ".." || seg.contains('/') || seg.contains('\\') {
            return None;
        }
        out.push(seg);
    }
    Some(out)
}

fn join(out_dir: &Path, segs: &[String]) -> PathBuf {
    let mut file = out_dir.to_path_buf();
    file.extend(segs);
    file
}

/// File holding the HTML of a page.
#[must_use]
pub fn html_file(out_dir: &Path, path: &str, trailing_slash: TrailingSlash) -> Option<PathBuf> {
    let mut segs = segments(path)?;
    let Some(last) = segs.pop() else {
        return Some(out_dir.join("index.html"));
    };
    let mut file = join(out_dir, &segs);
    if trailing_slash == TrailingSlash::Always {
        file.push(last);
        file.push("index.html");
    } else {
        file.push(format!("{last}.html"));
    }
    Some(file)
}

/// File holding the `__data.json` of a page.
#[must_use]
pub fn data_file(out_dir: &Path, path: &str) -> Option<PathBuf> {
    let mut file = join(out_dir, &segments(path)?);
    file.push(DATA_SUFFIX.trim_start_matches('/'));
    Some(file)
}

/// File holding an endpoint body: the path itself.
#[must_use]
pub fn raw_file(out_dir: &Path, path: &str) -> Option<PathBuf> {
    let segs = segments(path)?;
    if segs.is_empty() {
        return Some(out_dir.join("index.html"));
    }
    Some(join(out_dir, &segs))
}

/// Path of the data request for a page path.
#[must_use]
pub fn data_path(path: &str) -> String {
    format!("{}{DATA_SUFFIX}", path.trim_end_matches('/'))
}

/// Writes each output file at most once.
#[derive(Debug, Default)]
pub struct OutputWriter {
    written: DashSet<PathBuf>,
}

impl OutputWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `contents` unless `file` was already written. Returns whether it
    /// was written by this call.
    pub fn write_once(&self, file: &Path, contents: &[u8]) -> Result<bool, PrerenderError> {
        if !self.written.insert(file.to_path_buf()) {
            debug!(file = %file.display(), "Already written");
            return Ok(false);
        }
        let io_err = |source| PrerenderError::Write {
            path: file.to_path_buf(),
            source,
        };
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        fs::write(file, contents).map_err(io_err)?;
        debug!(file = %file.display(), bytes = contents.len(), "Wrote file");
        Ok(true)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.written.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_html_file_layout() {
        let out = Path::new("build");
        assert_eq!(html_file(out, "/", TrailingSlash::Never), Some(out.join("index.html")));
        assert_eq!(
            html_file(out, "/blog/hello", TrailingSlash::Ignore),
            Some(out.join("blog").join("hello.html"))
        );
        assert_eq!(
            html_file(out, "/about/", TrailingSlash::Always),
            Some(out.join("about").join("index.html"))
        );
    }

    #[test]
    fn test_data_and_raw_files() {
        let out = Path::new("build");
        assert_eq!(data_file(out, "/"), Some(out.join("__data.json")));
        assert_eq!(
            data_file(out, "/blog/x/"),
            Some(out.join("blog").join("x").join("__data.json"))
        );
        assert_eq!(
            raw_file(out, "/api/posts.json"),
            Some(out.join("api").join("posts.json"))
        );
        assert_eq!(data_path("/"), "/__data.json");
        assert_eq!(data_path("/about/"), "/about/__data.json");
    }

    #[test]
    fn test_traversal_is_rejected_and_names_decoded() {
        let out = Path::new("build");
        assert_eq!(html_file(out, "/%2E%2E/etc", TrailingSlash::Never), None);
        assert_eq!(
            html_file(out, "/caf%C3%A9", TrailingSlash::Never),
            Some(out.join("café.html"))
        );
    }

    #[test]
    fn test_write_once() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new();
        let file = dir.path().join("a").join("index.html");
        assert!(writer.write_once(&file, b"first").unwrap());
        assert!(!writer.write_once(&file, b"second").unwrap());
        assert_eq!(fs::read_to_string(&file).unwrap(), "first");
        assert_eq!(writer.count(), 1);
    }
}
