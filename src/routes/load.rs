use super::types::RouteNode;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk route description: `routes: [ {id, page, endpoint, layout, error, options} ]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteDescription {
    #[serde(default)]
    pub routes: Vec<RouteNode>,
}

/// Load a route description from a `.yaml`/`.yml` or `.json` file.
///
/// A directory is walked with [`discover`](super::discover) instead.
pub fn load_description(path: &Path) -> Result<Vec<RouteNode>, ConfigError> {
    let source = path.display().to_string();
    if path.is_dir() {
        return super::discover::discover(path).map(|d| d.nodes);
    }
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidDescription {
        source: source.clone(),
        message: e.to_string(),
    })?;
    parse_description(&text, path).map_err(|message| ConfigError::InvalidDescription { source, message })
}

fn parse_description(text: &str, path: &Path) -> Result<Vec<RouteNode>, String> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    let description: RouteDescription = match ext.as_str() {
        "json" => serde_json::from_str(text).map_err(|e| e.to_string())?,
        "yaml" | "yml" => serde_yaml::from_str(text).map_err(|e| e.to_string())?,
        other => return Err(format!("unsupported description format '{other}'")),
    };
    Ok(description.routes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::{Prerender, TrailingSlash};
    use std::io::Write;

    #[test]
    fn test_yaml_description() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(
            file,
            r#"
routes:
  - id: /
    layout:
      template: root
      server_load: root.server
    error: root.error
  - id: /blog/[slug=slug]
    page:
      template: post
      load: post.load
    options:
      prerender: auto
      trailing_slash: always
      entries:
        - slug: hello-world
"#
        )
        .unwrap();
        let nodes = load_description(file.path()).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].error.as_deref(), Some("root.error"));
        let post = &nodes[1];
        assert_eq!(post.options.prerender, Some(Prerender::Auto));
        assert_eq!(post.options.trailing_slash, Some(TrailingSlash::Always));
        assert_eq!(post.options.entries[0]["slug"], "hello-world");
    }

    #[test]
    fn test_json_description() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"routes":[{{"id":"/api/items","endpoint":"items"}}]}}"#).unwrap();
        let nodes = load_description(file.path()).unwrap();
        assert_eq!(nodes[0].endpoint.as_deref(), Some("items"));
    }

    #[test]
    fn test_unknown_field_is_reported() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        write!(file, "routes:\n  - id: /\n    pgae: {{}}\n").unwrap();
        let err = load_description(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDescription { .. }));
        assert!(err.to_string().contains("pgae"));
    }
}
