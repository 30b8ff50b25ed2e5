//! End-to-end requests over `may_minihttp`.

mod common;

use common::fixture::{server, template, TestApp};
use common::http::{header, send_request};
use common::test_server::setup_may_runtime;
use http::Method;
use kitrouter::prelude::*;
use kitrouter::server::{HttpServer, KitService, ServerHandle};
use std::net::{SocketAddr, TcpListener};
use url::Url;

/// Running server, stopped on drop.
struct TestServer {
    handle: Option<ServerHandle>,
    addr: SocketAddr,
}

impl TestServer {
    fn start(app: App) -> Self {
        setup_may_runtime();
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let origin = Url::parse(&format!("http://{addr}")).unwrap();
        let handle = HttpServer(KitService::new(app, origin)).start(addr).unwrap();
        handle.wait_ready().unwrap();
        Self {
            handle: Some(handle),
            addr,
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.stop();
        }
    }
}

fn app() -> App {
    TestApp::new()
        .template("root", "<main>{{ slot }}</main>")
        .template("post", "post {{ data.slug }}")
        .load("post.server", |event| {
            let slug = event.param("slug").unwrap_or_default().to_string();
            event.set_cookie(Cookie::new("seen", slug.clone()));
            Ok(LoadData::new().with("slug", slug))
        })
        .endpoint(
            "health",
            EndpointMethods::new().on(Method::GET, |_| Ok(EndpointReply::text("ok"))),
        )
        .node(RouteNode::new("/").layout(template("root")))
        .node(RouteNode::new("/blog/[slug]").page(server("post", "post.server")))
        .node(RouteNode::new("/health").endpoint("health"))
        .build()
}

#[test]
fn test_page_over_http() {
    let server = TestServer::start(app());
    let (status, headers, body) = send_request(
        server.addr,
        "GET /blog/hello HTTP/1.1\r\nHost: localhost\r\nAccept: text/html\r\n\r\n",
    );
    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-type"), Some("text/html; charset=utf-8"));
    assert!(header(&headers, "set-cookie").is_some_and(|c| c.starts_with("seen=hello")));
    assert!(body.contains("<main>post hello</main>"));
}

#[test]
fn test_endpoint_and_not_found_over_http() {
    let server = TestServer::start(app());
    let (status, _, body) = send_request(server.addr, "GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status, 200);
    assert_eq!(body, "ok");

    let (status, headers, _) = send_request(server.addr, "GET /nowhere HTTP/1.1\r\nHost: localhost\r\n\r\n");
    assert_eq!(status, 404);
    assert!(header(&headers, "x-request-id").is_some());
}

#[test]
fn test_method_not_allowed_over_http() {
    let server = TestServer::start(app());
    let (status, headers, _) = send_request(
        server.addr,
        "DELETE /health HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\n\r\n",
    );
    assert_eq!(status, 405);
    assert_eq!(header(&headers, "allow"), Some("GET, HEAD"));
}
