//! Load pipeline behaviour observed through full responses.

mod common;

use common::fixture::{get, server, template, universal, TestApp};
use common::test_server::setup_may_runtime;
use http::Method;
use kitrouter::prelude::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

fn base() -> TestApp {
    TestApp::new()
        .template("root", "<main>{{ slot }}</main>")
        .template("root-error", "root-error {{ page.status }}: {{ page.error.message }}")
        .template("page", "{{ data.a }}-{{ data.b }}")
}

fn root_node() -> RouteNode {
    RouteNode::new("/")
        .layout(server("root", "root.server"))
        .error("root-error")
}

#[test]
fn test_inner_levels_override_merged_keys() {
    let app = base()
        .load("root.server", |_| Ok(LoadData::new().with("a", 1).with("b", 1)))
        .load("page.server", |event| {
            let parent_a = event.parent().get_json("a").cloned().unwrap_or(Value::Null);
            Ok(LoadData::new().with("b", 2).with("seen", parent_a))
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let res = get(&app, "/x");
    assert_eq!(res.status, 200);
    let body = res.text_body();
    assert!(body.contains("<main>1-2</main>"), "{body}");
    // hydration payload carries the server output of every level
    assert!(body.contains(r#"id="kit-data""#));
    assert!(body.contains(r#""seen":1"#));
}

#[test]
fn test_universal_load_sees_server_data_and_replaces_it() {
    let app = base()
        .load("root.server", |_| Ok(LoadData::new()))
        .load("page.server", |_| Ok(LoadData::new().with("a", "server")))
        .load("page.universal", |event| {
            let from_server = event
                .data()
                .and_then(|d| d.get_json("a"))
                .and_then(Value::as_str)
                .unwrap_or("none")
                .to_string();
            Ok(LoadData::new().with("a", from_server).with("b", "universal"))
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(LevelSlots {
            template: Some("page".into()),
            server_load: Some("page.server".into()),
            load: Some("page.universal".into()),
        }))
        .build();

    assert!(get(&app, "/x").text_body().contains("server-universal"));

    // data requests only run server loads
    let data: Value = get(&app, "/x/__data.json").json_body().unwrap();
    assert_eq!(data["type"], "data");
    assert_eq!(data["nodes"][1]["data"], json!({"a": "server"}));
}

#[test]
fn test_outer_redirect_stops_inner_loads() {
    let inner_ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&inner_ran);
    let app = base()
        .load("root.server", |_| Err(LoadSignal::redirect(303, "/login")))
        .load("page.server", move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(LoadData::new())
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let res = get(&app, "/x");
    assert_eq!(res.status, 303);
    assert_eq!(res.header("location"), Some("/login"));
    assert!(!inner_ran.load(Ordering::SeqCst));
}

#[test]
fn test_redirect_with_invalid_status_is_internal_error() {
    let app = base()
        .load("root.server", |_| Ok(LoadData::new()))
        .load("page.server", |_| Err(LoadSignal::redirect(200, "/elsewhere")))
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let res = get(&app, "/x");
    assert_eq!(res.status, 500);
    assert!(res.text_body().contains("root-error 500: Internal Error"));
}

#[test]
fn test_error_with_non_error_status_is_internal_error() {
    let app = base()
        .load("root.server", |_| Ok(LoadData::new()))
        .load("page.server", |_| Err(LoadSignal::error(200, "boom")))
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let res = get(&app, "/x");
    assert_eq!(res.status, 500);
    let body = res.text_body();
    assert!(body.contains("root-error 500: Internal Error"), "{body}");
    assert!(!body.contains("boom"));
}

#[test]
fn test_panicking_load_becomes_500() {
    let app = base()
        .load("root.server", |_| Ok(LoadData::new()))
        .load("page.server", |_| panic!("boom"))
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();
    let res = get(&app, "/x");
    assert_eq!(res.status, 500);
    let body = res.text_body();
    assert!(body.contains("Internal Error"));
    assert!(!body.contains("boom"));
}

#[test]
fn test_dev_mode_exposes_unexpected_messages() {
    let app = base()
        .load("root.server", |_| Ok(LoadData::new()))
        .load("page.server", |_| panic!("boom"))
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .configure(|c| c.app.dev = true)
        .build();
    assert!(get(&app, "/x").text_body().contains("boom"));
}

fn admin_app(fail_in_layout: bool) -> App {
    base()
        .template("admin", "<section>{{ slot }}</section>")
        .template("admin-error", "admin-error {{ page.status }} in {{ data.section }}")
        .load("root.server", |_| Ok(LoadData::new()))
        .load("admin.server", move |_| {
            if fail_in_layout {
                Err(LoadSignal::error(401, "sign in"))
            } else {
                Ok(LoadData::new().with("section", "admin"))
            }
        })
        .load("users.server", |_| Err(LoadSignal::error(403, "forbidden")))
        .node(root_node())
        .node(
            RouteNode::new("/admin")
                .layout(server("admin", "admin.server"))
                .error("admin-error"),
        )
        .node(RouteNode::new("/admin/users").page(server("page", "users.server")))
        .build()
}

#[test]
fn test_leaf_error_uses_nearest_boundary_inside_its_layouts() {
    let res = get(&admin_app(false), "/admin/users");
    assert_eq!(res.status, 403);
    let body = res.text_body();
    assert!(
        body.contains("<main><section>admin-error 403 in admin</section></main>"),
        "{body}"
    );
}

#[test]
fn test_layout_error_is_caught_above_the_failing_layout() {
    let res = get(&admin_app(true), "/admin/users");
    assert_eq!(res.status, 401);
    let body = res.text_body();
    assert!(body.contains("<main>root-error 401: sign in</main>"), "{body}");
    assert!(!body.contains("<section>"));
}

#[test]
fn test_data_request_error_is_json() {
    let res = get(&admin_app(false), "/admin/users/__data.json");
    assert_eq!(res.status, 403);
    let body: Value = res.json_body().unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["message"], "forbidden");
}

#[test]
fn test_invalidation_mask_skips_levels() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let app = base()
        .load("root.server", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(LoadData::new().with("a", 1))
        })
        .load("page.server", |_| Ok(LoadData::new().with("b", 2)))
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let body: Value = get(&app, "/x/__data.json?x-kit-invalidated=01")
        .json_body()
        .unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(body["nodes"][0], json!({"type": "skip"}));
    assert_eq!(body["nodes"][1]["data"], json!({"b": 2}));
}

#[test]
fn test_skipped_level_still_provides_parent_data() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let app = base()
        .load("root.server", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(LoadData::new().with("user", "ada"))
        })
        .load("page.server", |event| {
            let user = event.parent().get_json("user").cloned().unwrap_or(Value::Null);
            Ok(LoadData::new().with("greeting_for", user))
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let full: Value = get(&app, "/x/__data.json").json_body().unwrap();
    assert_eq!(full["nodes"][1]["data"], json!({"greeting_for": "ada"}));

    let partial: Value = get(&app, "/x/__data.json?x-kit-invalidated=01")
        .json_body()
        .unwrap();
    assert_eq!(partial["nodes"][0], json!({"type": "skip"}));
    assert_eq!(partial["nodes"][1]["data"], json!({"greeting_for": "ada"}));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_skipped_level_error_surfaces_through_parent() {
    let app = base()
        .load("root.server", |_| Err(LoadSignal::error(401, "sign in")))
        .load("page.server", |event| {
            let _ = event.parent();
            Ok(LoadData::new().with("b", 2))
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let res = get(&app, "/x/__data.json?x-kit-invalidated=01");
    assert_eq!(res.status, 401);
    let body: Value = res.json_body().unwrap();
    assert_eq!(body["type"], "error");
    assert_eq!(body["error"]["message"], "sign in");
}

#[derive(Debug)]
struct Money {
    cents: u64,
}

fn priced_app(dev: bool, register: bool) -> App {
    base()
        .template("price", "{{ data.price.value }}")
        .load("root.server", |_| Ok(LoadData::new()))
        .load("price.server", |_| Ok(LoadData::new().with_custom("price", Money { cents: 1250 })))
        .transport(move |t| {
            if register {
                t.register("Money", |m: &Money| json!(m.cents));
            }
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(server("price", "price.server")))
        .configure(move |c| c.app.dev = dev)
        .build()
}

#[test]
fn test_unencodable_value_is_a_generic_500() {
    let res = get(&priced_app(false, false), "/x");
    assert_eq!(res.status, 500);
    let body = res.text_body();
    assert!(body.contains("root-error 500: Internal Error"), "{body}");
    assert!(!body.contains("serializable"));
}

#[test]
fn test_unencodable_value_is_diagnosed_in_dev() {
    let res = get(&priced_app(true, false), "/x");
    assert_eq!(res.status, 500);
    let body = res.text_body();
    assert!(body.contains("is not serializable"), "{body}");
    assert!(body.contains("price"));
    assert!(body.contains("no transport encoder registered"));
}

#[test]
fn test_registered_transport_encodes_custom_values() {
    let app = priced_app(false, true);
    let res = get(&app, "/x");
    assert_eq!(res.status, 200);
    assert!(res.text_body().contains("<main>1250</main>"));

    let data: Value = get(&app, "/x/__data.json").json_body().unwrap();
    assert_eq!(
        data["nodes"][1]["data"],
        json!({"price": {"__kit_type": "Money", "value": 1250}})
    );
}

#[test]
fn test_headers_from_completed_levels_survive_an_error() {
    let app = base()
        .load("root.server", |event| {
            event.set_headers([("cache-control", "max-age=60")])?;
            Ok(LoadData::new())
        })
        .load("page.server", |_| Err(LoadSignal::error(404, "no such post")))
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let res = get(&app, "/x");
    assert_eq!(res.status, 404);
    assert_eq!(res.header("cache-control"), Some("max-age=60"));
}

#[test]
fn test_aborted_request_drops_headers_and_cookies() {
    let app = base()
        .load("root.server", |event| {
            event.set_headers([("cache-control", "max-age=60")])?;
            event.set_cookie(Cookie::new("session", "abc"));
            event.signal().abort();
            Ok(LoadData::new())
        })
        .load("page.server", |_| Ok(LoadData::new()))
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .build();

    let res = get(&app, "/x");
    assert_eq!(res.status, 499);
    assert!(res.body.is_empty());
    assert_eq!(res.header("cache-control"), None);
    assert_eq!(res.header("set-cookie"), None);
}

#[test]
fn test_set_cookie_through_set_headers_is_refused() {
    let app = base()
        .load("root.server", |event| {
            event.set_headers([("set-cookie", "a=b")])?;
            Ok(LoadData::new())
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(template("page")))
        .build();
    assert_eq!(get(&app, "/x").status, 500);
}

#[test]
fn test_cookies_are_sent_and_forwarded_to_internal_fetches() {
    let app = base()
        .endpoint(
            "whoami",
            EndpointMethods::new().on(Method::GET, |event| {
                Ok(EndpointReply::text(event.cookie("session").unwrap_or("anonymous").to_string()))
            }),
        )
        .load("root.server", |event| {
            event.set_cookie(Cookie::new("session", "abc"));
            Ok(LoadData::new())
        })
        .load("page.server", |event| {
            let who = event.fetch("/api/whoami")?.text_body();
            Ok(LoadData::new().with("a", who).with("b", "ok"))
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .node(RouteNode::new("/api/whoami").endpoint("whoami"))
        .build();

    let res = get(&app, "/x");
    assert!(res.text_body().contains("<main>abc-ok</main>"));
    let cookie = res.header("set-cookie").unwrap();
    assert!(cookie.starts_with("session=abc; Path=/"));
}

#[test]
fn test_internal_fetch_depth_is_bounded() {
    let app = TestApp::new()
        .endpoint(
            "loop",
            EndpointMethods::new().on(Method::GET, |event| match event.fetch("/loop") {
                Ok(inner) => Ok(EndpointReply::text(format!("{}+", inner.text_body()))),
                Err(FetchError::DepthExceeded { depth, .. }) => {
                    Ok(EndpointReply::text(format!("limit {depth}")))
                }
                Err(e) => Err(e.into()),
            }),
        )
        .node(RouteNode::new("/loop").endpoint("loop"))
        .configure(|c| c.fetch.max_depth = 3)
        .build();

    let res = get(&app, "/loop");
    assert_eq!(res.status, 200);
    assert_eq!(res.text_body(), "limit 3+++");
}

#[test]
fn test_fetch_all_runs_requests_concurrently() {
    setup_may_runtime();
    let app = base()
        .endpoint(
            "echo",
            EndpointMethods::new().on(Method::GET, |event| {
                Ok(EndpointReply::text(event.param("n").unwrap_or_default().to_string()))
            }),
        )
        .load("root.server", |_| Ok(LoadData::new()))
        .load("page.server", |event| {
            let requests = (1..=3).map(|n| FetchRequest::get(format!("/echo/{n}"))).collect();
            let joined: Vec<String> = event
                .fetch_all(requests)
                .into_iter()
                .map(|r| r.map(|res| res.text_body()))
                .collect::<Result<_, _>>()?;
            Ok(LoadData::new().with("a", joined.join(",")).with("b", "done"))
        })
        .node(root_node())
        .node(RouteNode::new("/x").page(server("page", "page.server")))
        .node(RouteNode::new("/echo/[n]").endpoint("echo"))
        .build();

    assert!(get(&app, "/x").text_body().contains("<main>1,2,3-done</main>"));
}

#[test]
fn test_load_event_exposes_params_and_route() {
    let app = TestApp::new()
        .template("post", "{{ data.slug }}|{{ data.route|length }}")
        .load("post.universal", |event| {
            let slug = event.param("slug").unwrap_or_default().to_string();
            let route = event.route_id().to_string();
            Ok(LoadData::new().with("slug", slug).with("route", route))
        })
        .node(RouteNode::new("/blog/[slug]").page(universal("post", "post.universal")))
        .build();
    let body = get(&app, "/blog/hello").text_body();
    // "/blog/[slug]" is 12 characters
    assert!(body.contains("hello|12"), "{body}");
}
