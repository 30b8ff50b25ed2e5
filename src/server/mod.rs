//! # Server Module
//!
//! Live HTTP front-end on `may_minihttp`. Each connection is served on its own
//! coroutine; every request is converted to a [`KitRequest`](crate::context::KitRequest),
//! answered by [`App::respond`](crate::app::App::respond) and written back.
//!
//! ```rust,ignore
//! let service = KitService::new(app, Url::parse("http://localhost:3000")?);
//! let handle = HttpServer(service).start("127.0.0.1:3000")?;
//! handle.wait_ready()?;
//! ```

mod http_server;
mod request;
mod response;
mod service;

pub use http_server::{HttpServer, ServerHandle};
pub use request::{parse_target, request_origin, to_kit_request, RequestError, MAX_BODY_BYTES};
pub use response::write_response;
pub use service::KitService;
