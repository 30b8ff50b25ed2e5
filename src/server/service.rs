use super::request::to_kit_request;
use super::response::write_response;
use crate::app::App;
use crate::response::KitResponse;
use may_minihttp::{HttpService, Request, Response};
use std::io;
use tracing::warn;
use url::Url;

/// `HttpService` feeding every request into [`App::respond`].
///
/// Cloned per connection; clones share the app.
#[derive(Clone)]
pub struct KitService {
    app: App,
    fallback_origin: Url,
}

impl KitService {
    /// `fallback_origin` is used when a request carries no usable `Host`.
    #[must_use]
    pub fn new(app: App, fallback_origin: Url) -> Self {
        Self {
            app,
            fallback_origin,
        }
    }

    #[must_use]
    pub fn app(&self) -> &App {
        &self.app
    }
}

impl HttpService for KitService {
    fn call(&mut self, req: Request, res: &mut Response) -> io::Result<()> {
        let response = match to_kit_request(req, &self.fallback_origin) {
            Ok(request) => self.app.respond(request),
            Err(e) => {
                warn!(error = %e, status = e.status(), "Rejected malformed request");
                KitResponse::text(e.status(), e.to_string())
            }
        };
        write_response(res, response);
        Ok(())
    }
}
