//! In-process fake HTTP servers for the broker and the upstream API.

#![allow(dead_code)]

use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use serde_json::{json, Value};
use sitecache_core::{Config, Operations, RetryPolicy};
use tiny_http::{Header, Response, Server};

/// A request as the fake server saw it
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Recorded {
    fn parsed(&self) -> url::Url {
        url::Url::parse(&format!("http://fake{}", self.url)).expect("request url")
    }

    pub fn path(&self) -> String {
        self.parsed().path().to_string()
    }

    pub fn query(&self, name: &str) -> Option<String> {
        self.parsed()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    pub fn header(&self, name: &str) -> Option<String> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
    }

    pub fn json(&self) -> Value {
        serde_json::from_str(&self.body).expect("request body is JSON")
    }
}

/// Scripted reply
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string(),
            headers: Vec::new(),
        }
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// HTTP server on an ephemeral port answering every request with `handler`.
/// Stops when dropped.
pub struct FakeServer {
    server: Arc<Server>,
    url: String,
    log: Arc<Mutex<Vec<Recorded>>>,
    thread: Option<JoinHandle<()>>,
}

impl FakeServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind fake server"));
        let addr = server.server_addr().to_ip().expect("ip listener");
        let log = Arc::new(Mutex::new(Vec::new()));

        let thread = {
            let server = Arc::clone(&server);
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                while let Ok(mut request) = server.recv() {
                    let mut body = String::new();
                    let _ = request.as_reader().read_to_string(&mut body);
                    let recorded = Recorded {
                        method: request.method().to_string(),
                        url: request.url().to_string(),
                        headers: request
                            .headers()
                            .iter()
                            .map(|h| (h.field.as_str().as_str().to_ascii_lowercase(), h.value.as_str().to_string()))
                            .collect(),
                        body,
                    };
                    let reply = handler(&recorded);
                    log.lock().unwrap().push(recorded);

                    let mut response = Response::from_string(reply.body).with_status_code(reply.status);
                    response.add_header(
                        Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]).unwrap(),
                    );
                    for (name, value) in reply.headers {
                        response.add_header(Header::from_bytes(name.as_bytes(), value.as_bytes()).unwrap());
                    }
                    let _ = request.respond(response);
                }
            })
        };

        Self {
            server,
            url: format!("http://{}", addr),
            log,
            thread: Some(thread),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Broker that issues `graph-token-<n>` for every exchange, valid for an hour
pub fn broker() -> (FakeServer, Arc<AtomicUsize>) {
    let issued = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&issued);
    let server = FakeServer::start(move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        Reply::ok(json!({
            "access_token": format!("graph-token-{}", n),
            "token_refreshed": false,
            "expires_in_seconds": 3600
        }))
    });
    (server, issued)
}

/// Operations wired through `Config` against the two fake servers,
/// with retries that never sleep
pub fn operations(broker: &FakeServer, graph: &FakeServer, cache_dir: &Path) -> Operations {
    let config = Config {
        broker_url: broker.url().to_string(),
        graph_url: format!("{}/v1.0", graph.url()),
        cache_dir: Some(cache_dir.to_path_buf()),
        broker_retry: RetryPolicy::immediate(3),
        upstream_retry: RetryPolicy::immediate(3),
        rate_limit_retry: RetryPolicy::immediate(3),
        ..Config::default()
    };
    Operations::from_config(&config).expect("operations from config")
}

pub fn engineering_site() -> Value {
    json!({
        "id": "contoso.sharepoint.com,site-eng,web-eng",
        "name": "Engineering",
        "displayName": "Engineering",
        "webUrl": "https://contoso.sharepoint.com/sites/engineering",
        "createdDateTime": "2023-01-10T08:00:00Z"
    })
}
