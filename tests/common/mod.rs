//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use request_guard::config::{parse_config, GuardConfig};
use request_guard::lifecycle::Shutdown;
use request_guard::security::{Clock, SystemClock};
use request_guard::{GuardServer, SecurityGateway};

pub const WEBHOOK_SECRET: &str = "whsec_test_0123456789";
pub const SECRET_ENV: &str = "TEST_PAYMENTS_SECRET";

/// Contact form on a 3 token / 0.3 per second channel, plus one webhook.
pub const CONFIG: &str = r#"
    [listener]
    bind_address = "127.0.0.1:0"
    max_body_bytes = 4096

    [[channels]]
    name = "contact"
    capacity = 3
    refill_per_sec = 0.3

    [[channels]]
    name = "webhooks"
    capacity = 2
    refill_per_sec = 0.01

    [[forms]]
    name = "contact"
    channel = "contact"

    [[forms.fields]]
    name = "email"
    kind = "email"
    header_sensitive = true

    [[forms.fields]]
    name = "subject"
    kind = "free_text"
    max_len = 200
    header_sensitive = true

    [[forms.fields]]
    name = "message"
    kind = "free_text"
    max_len = 5000
    forbid = ["null"]

    [[forms.fields]]
    name = "quantity"
    kind = "numeric"
    required = false

    [[webhooks]]
    name = "payments"
    secret_env = "TEST_PAYMENTS_SECRET"
    tolerance_secs = 300
    channel = "webhooks"
"#;

pub fn config() -> GuardConfig {
    parse_config(CONFIG, |name| {
        (name == SECRET_ENV).then(|| WEBHOOK_SECRET.to_string())
    })
    .unwrap()
}

pub fn gateway_with_clock(clock: Arc<dyn Clock>) -> SecurityGateway {
    SecurityGateway::from_config(&config(), clock, None).unwrap()
}

pub fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn valid_contact() -> Vec<(String, String)> {
    fields(&[
        ("email", "visitor@example.com"),
        ("subject", "Hello"),
        ("message", "Line one\nLine two"),
    ])
}

/// Running reference server on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub handle: JoinHandle<Result<(), std::io::Error>>,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.trigger();
        self.handle.await.unwrap().unwrap();
    }
}

pub async fn start_server() -> TestServer {
    start_server_with_clock(Arc::new(SystemClock)).await
}

/// As `start_server`, with rate limit buckets driven by `clock`.
pub async fn start_server_with_clock(clock: Arc<dyn Clock>) -> TestServer {
    let config = config();
    let gateway = Arc::new(SecurityGateway::from_config(&config, clock, None).unwrap());

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = GuardServer::new(gateway, &config);
    let handle = tokio::spawn(server.run(listener, shutdown.subscribe()));

    TestServer {
        addr,
        shutdown,
        handle,
    }
}
