//! Build-time crawl, output layout and the static adapter.

mod common;

use common::fixture::{server, template, TestApp};
use common::test_server::setup_may_runtime;
use http::Method;
use kitrouter::adapter::{Adapter, Build, StaticAdapter};
use kitrouter::manifest::Manifest;
use kitrouter::prelude::*;
use kitrouter::prerender::prerender;
use kitrouter::PrerenderError;
use serde_json::json;
use std::fs;
use std::path::Path;

fn off() -> NodeOptions {
    NodeOptions {
        prerender: Some(Prerender::Off),
        ..NodeOptions::default()
    }
}

/// `/` -> `/a` <-> `/b`; `/b` fetches `/api/data` and links to a missing page.
fn site(out: &Path) -> TestApp {
    let out = out.to_path_buf();
    TestApp::new()
        .template("root", "<main>{{ slot }}</main>")
        .template("home", r#"<a href="/a">A</a>"#)
        .template("a", r#"<a href="/b">B</a> <a href="/">home</a> <a href="/a/">self</a>"#)
        .template("b", r#"count {{ data.count }} <a href="/a#top">A</a> <a href="/missing">gone</a>"#)
        .endpoint(
            "data",
            EndpointMethods::new().on(Method::GET, |_| EndpointReply::json(&json!([1, 2, 3]))),
        )
        .load("b.server", |event| {
            let items: Vec<u32> = event.fetch("/api/data")?.json_body().map_err(anyhow::Error::from)?;
            Ok(LoadData::new().with("count", items.len()))
        })
        .node(
            RouteNode::new("/")
                .layout(template("root"))
                .page(template("home"))
                .options(NodeOptions {
                    prerender: Some(Prerender::On),
                    ..NodeOptions::default()
                }),
        )
        .node(RouteNode::new("/a").page(template("a")))
        .node(RouteNode::new("/b").page(server("b", "b.server")))
        .node(RouteNode::new("/api/data").endpoint("data").options(off()))
        .configure(move |c| {
            c.prerender.out_dir = out;
            c.prerender.concurrency = 2;
        })
}

#[test]
fn test_cyclic_links_write_each_path_once() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path()).build();

    let report = prerender(&app).unwrap();
    assert_eq!(report.paths(), vec!["/", "/a", "/api/data", "/b"]);
    assert_eq!(report.files_written, 5);

    let out = dir.path();
    let index = fs::read_to_string(out.join("index.html")).unwrap();
    assert!(index.contains(r#"<main><a href="/a">A</a></main>"#));
    assert!(out.join("a.html").is_file());
    assert!(fs::read_to_string(out.join("b.html")).unwrap().contains("count 3"));
    assert_eq!(fs::read_to_string(out.join("api/data")).unwrap(), "[1,2,3]");

    let data: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("b/__data.json")).unwrap()).unwrap();
    assert_eq!(data["type"], "data");
    assert_eq!(data["nodes"][1]["data"], json!({"count": 3}));

    assert_eq!(report.warnings, vec!["404 /missing (linked from /b)".to_string()]);
}

#[test]
fn test_strict_mode_fails_on_warnings() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path())
        .configure(|c| c.prerender.strict = true)
        .build();

    match prerender(&app) {
        Err(PrerenderError::Strict { warnings }) => {
            assert!(warnings.iter().any(|w| w.contains("/missing")));
        }
        other => panic!("expected strict failure, got {other:?}"),
    }
}

/// `/` links to `/c`, whose load fetches a path no route answers.
fn fetching_site(out: &Path) -> TestApp {
    let out = out.to_path_buf();
    TestApp::new()
        .template("root", "<main>{{ slot }}</main>")
        .template("home", r#"<a href="/c">C</a>"#)
        .template("c", "status {{ data.status }}")
        .load("c.server", |event| {
            let res = event.fetch("/api/gone")?;
            Ok(LoadData::new().with("status", res.status))
        })
        .node(
            RouteNode::new("/")
                .layout(template("root"))
                .page(template("home"))
                .options(NodeOptions {
                    prerender: Some(Prerender::On),
                    ..NodeOptions::default()
                }),
        )
        .node(RouteNode::new("/c").page(server("c", "c.server")))
        .configure(move |c| c.prerender.out_dir = out)
}

#[test]
fn test_fetch_404_is_a_warning() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = fetching_site(dir.path()).build();

    let report = prerender(&app).unwrap();
    assert_eq!(report.paths(), vec!["/", "/c"]);
    assert_eq!(
        report.warnings,
        vec!["404 fetching /api/gone while rendering /c".to_string()]
    );
    let page = fs::read_to_string(dir.path().join("c.html")).unwrap();
    assert!(page.contains("<main>status 404</main>"), "{page}");
}

#[test]
fn test_fetch_404_fails_strict_mode() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = fetching_site(dir.path())
        .configure(|c| c.prerender.strict = true)
        .build();

    match prerender(&app) {
        Err(PrerenderError::Strict { warnings }) => {
            assert!(warnings.iter().any(|w| w.starts_with("404 fetching /api/gone")));
        }
        other => panic!("expected strict failure, got {other:?}"),
    }
}

#[test]
fn test_unreached_prerender_routes_are_reported() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path())
        .template("hidden", "hidden")
        .node(RouteNode::new("/hidden/[id]").page(template("hidden")))
        .build();

    let report = prerender(&app).unwrap();
    assert_eq!(report.unreached, vec!["/hidden/[id]".to_string()]);
    assert!(report.warnings.iter().any(|w| w.contains("/hidden/[id]")));
}

#[test]
fn test_entries_expand_dynamic_routes() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path())
        .template("post", "post {{ page.params.slug }}")
        .node(RouteNode::new("/blog/[slug]").page(template("post")).options(NodeOptions {
            entries: vec![[("slug".to_string(), "hello world".to_string())].into()],
            ..NodeOptions::default()
        }))
        .build();

    let report = prerender(&app).unwrap();
    assert!(report.paths().contains(&"/blog/hello%20world"));
    let html = fs::read_to_string(dir.path().join("blog/hello world.html")).unwrap();
    assert!(html.contains("post hello world"));
}

#[test]
fn test_redirects_become_refresh_pages() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path())
        .load("old.server", |_| Err(LoadSignal::redirect(301, "/a")))
        .node(RouteNode::new("/old").page(server("home", "old.server")))
        .build();

    let report = prerender(&app).unwrap();
    assert_eq!(report.page("/old").map(|p| p.status), Some(301));
    let html = fs::read_to_string(dir.path().join("old.html")).unwrap();
    assert!(html.contains(r#"content="0;url=/a""#));
}

#[test]
fn test_server_errors_stop_the_run() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path())
        .load("broken.server", |_| Err(LoadSignal::error(503, "database down")))
        .node(RouteNode::new("/broken").page(server("home", "broken.server")))
        .build();

    match prerender(&app) {
        Err(PrerenderError::Page { path, status, .. }) => {
            assert_eq!(path, "/broken");
            assert_eq!(status, 503);
        }
        other => panic!("expected page failure, got {other:?}"),
    }
}

#[test]
fn test_static_adapter_writes_manifest() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path()).build();
    let report = prerender(&app).unwrap();
    let manifest = Manifest::from_table(app.router().table()).with_prerendered(&report);
    assert_eq!(manifest.dynamic_routes().count(), 0);

    StaticAdapter::new()
        .adapt(&Build {
            app: &app,
            manifest: &manifest,
            report: &report,
            out_dir: dir.path(),
        })
        .unwrap();

    let written = Manifest::load(&dir.path().join("manifest.json")).unwrap();
    assert_eq!(written, manifest);
    assert!(written.route("/b").unwrap().prerendered);
}

#[test]
fn test_static_adapter_needs_fallback_for_dynamic_routes() {
    setup_may_runtime();
    let dir = tempfile::tempdir().unwrap();
    let app = site(dir.path())
        .template("search", "search")
        .node(RouteNode::new("/search").page(template("search")).options(off()))
        .build();
    let report = prerender(&app).unwrap();
    let manifest = Manifest::from_table(app.router().table()).with_prerendered(&report);
    let build = Build {
        app: &app,
        manifest: &manifest,
        report: &report,
        out_dir: dir.path(),
    };

    let err = StaticAdapter::new().adapt(&build).unwrap_err();
    assert!(err.to_string().contains("/search"));

    StaticAdapter::with_fallback("200.html").adapt(&build).unwrap();
    let shell = fs::read_to_string(dir.path().join("200.html")).unwrap();
    assert!(shell.contains(r#"<div id="kit-root"></div>"#));
}
