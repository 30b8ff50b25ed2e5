#![allow(dead_code)]

pub mod fixture {
    use kitrouter::pipeline::Transport;
    use kitrouter::prelude::*;
    use kitrouter::ConfigErrors;

    /// Page or layout slots with just a template.
    pub fn template(name: &str) -> LevelSlots {
        LevelSlots {
            template: Some(name.into()),
            ..LevelSlots::default()
        }
    }

    /// Slots with a template and a server load.
    pub fn server(template: &str, load: &str) -> LevelSlots {
        LevelSlots {
            template: Some(template.into()),
            server_load: Some(load.into()),
            load: None,
        }
    }

    /// Slots with a template and a universal load.
    pub fn universal(template: &str, load: &str) -> LevelSlots {
        LevelSlots {
            template: Some(template.into()),
            server_load: None,
            load: Some(load.into()),
        }
    }

    /// Builder for apps used across integration tests.
    pub struct TestApp {
        pub config: KitConfig,
        pub handlers: Handlers,
        pub renderer: TemplateRenderer,
        pub matchers: ParamMatchers,
        pub transport: Transport,
        pub nodes: Vec<RouteNode>,
    }

    impl Default for TestApp {
        fn default() -> Self {
            Self::new()
        }
    }

    impl TestApp {
        pub fn new() -> Self {
            Self {
                config: KitConfig::default(),
                handlers: Handlers::new(),
                renderer: TemplateRenderer::new(),
                matchers: ParamMatchers::with_builtins(),
                transport: Transport::new(),
                nodes: Vec::new(),
            }
        }

        pub fn template(mut self, name: &str, source: &str) -> Self {
            self.renderer.add_template(name, source).unwrap();
            self
        }

        pub fn load<F>(mut self, name: &str, f: F) -> Self
        where
            F: Fn(&mut LoadEvent<'_>) -> Result<LoadData, LoadSignal> + Send + Sync + 'static,
        {
            self.handlers.load(name, f);
            self
        }

        pub fn endpoint(mut self, name: &str, methods: EndpointMethods) -> Self {
            self.handlers.endpoint(name, methods);
            self
        }

        pub fn transport(mut self, f: impl FnOnce(&mut Transport)) -> Self {
            f(&mut self.transport);
            self
        }

        pub fn node(mut self, node: RouteNode) -> Self {
            self.nodes.push(node);
            self
        }

        pub fn configure(mut self, f: impl FnOnce(&mut KitConfig)) -> Self {
            f(&mut self.config);
            self
        }

        pub fn try_build(self) -> Result<App, ConfigErrors> {
            App::builder(self.config)
                .matchers(self.matchers)
                .handlers(self.handlers)
                .renderer(self.renderer)
                .transport(self.transport)
                .routes(self.nodes)
                .build()
        }

        pub fn build(self) -> App {
            self.try_build().unwrap()
        }
    }

    pub fn get(app: &App, target: &str) -> KitResponse {
        app.respond(KitRequest::get(target).unwrap())
    }

    pub fn get_json(app: &App, target: &str) -> KitResponse {
        app.respond(
            KitRequest::get(target)
                .unwrap()
                .with_header("accept", "application/json"),
        )
    }
}

pub mod test_server {
    use std::sync::Once;

    /// Ensures May coroutines are configured only once
    static MAY_INIT: Once = Once::new();

    pub fn setup_may_runtime() {
        MAY_INIT.call_once(|| {
            may::config().set_stack_size(0x40000);
        });
    }
}

pub mod http {
    use std::io::{Read, Write};
    use std::net::{SocketAddr, TcpStream};
    use std::time::Duration;

    /// Send a raw HTTP/1.1 request and return (status, headers, body).
    pub fn send_request(addr: SocketAddr, request: &str) -> (u16, Vec<(String, String)>, String) {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        stream.write_all(request.as_bytes()).unwrap();

        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    raw.extend_from_slice(&buf[..n]);
                    if response_complete(&raw) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        parse_response(&String::from_utf8_lossy(&raw))
    }

    fn response_complete(raw: &[u8]) -> bool {
        let text = String::from_utf8_lossy(raw);
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let length = head
            .lines()
            .find_map(|l| {
                let (k, v) = l.split_once(':')?;
                k.eq_ignore_ascii_case("content-length")
                    .then(|| v.trim().parse::<usize>().ok())
                    .flatten()
            })
            .unwrap_or(0);
        body.len() >= length
    }

    fn parse_response(text: &str) -> (u16, Vec<(String, String)>, String) {
        let (head, body) = text.split_once("\r\n\r\n").unwrap_or((text, ""));
        let mut lines = head.lines();
        let status = lines
            .next()
            .and_then(|l| l.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let headers = lines
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
            .collect();
        (status, headers, body.to_string())
    }

    pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
        headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}
