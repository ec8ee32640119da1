/// Example: Concurrent Token Refresh
///
/// Several "screens" fetch data at the same time right after the access
/// token expired. Only one refresh call reaches the server; every request is
/// replayed with the new token.
///
/// Run:
/// RUST_LOG=sitzung=debug cargo run --example concurrent_refresh
use parking_lot::Mutex;
use serde_json::json;
use sitzung::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Stand-in for the API server
struct DemoServer {
    valid_access: Mutex<String>,
    refreshes: AtomicUsize,
}

impl Transport for DemoServer {
    fn send(&self, request: &Request) -> Result<Response, TransportError> {
        thread::sleep(Duration::from_millis(20));

        if request.path == "/sessions/refresh-token" {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            thread::sleep(Duration::from_millis(200));
            let access = format!("access-r{}", n);
            *self.valid_access.lock() = access.clone();
            return Ok(Response::new(
                200,
                Some(json!({ "token": access, "refresh_token": format!("refresh-r{}", n) })),
            ));
        }

        let valid = format!("Bearer {}", self.valid_access.lock());
        if request.authorization() == Some(valid.as_str()) {
            Ok(Response::new(200, Some(json!({ "path": request.path }))))
        } else {
            Ok(Response::new(401, Some(json!({ "message": "token.expired" }))))
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Concurrent Token Refresh Example ===\n");

    let server = Arc::new(DemoServer {
        valid_access: Mutex::new("access-2".to_string()),
        refreshes: AtomicUsize::new(0),
    });
    let store = Arc::new(MemoryCredentialStore::with_tokens(TokenPair::new(
        "access-1",
        "refresh-1",
    )));

    let client = SessionClient::with_transport(
        SessionConfig::new("http://demo.local"),
        server.clone(),
        store.clone(),
    );
    client.restore().expect("Failed to restore session");

    let registration = client.register_intercept_token_manager(|| {
        println!("✗ Session ended, user must sign in again");
    });

    let screens = ["/history", "/groups", "/exercises/bygroup/back", "/users/profile"];
    let handles: Vec<_> = screens
        .into_iter()
        .map(|path| {
            let client = client.clone();
            thread::spawn(move || (path, client.get(path)))
        })
        .collect();

    for handle in handles {
        let (path, result) = handle.join().expect("screen thread panicked");
        match result {
            Ok(response) => println!("✓ {} -> {}", path, response.status),
            Err(e) => println!("✗ {} -> {}", path, e),
        }
    }

    println!(
        "\nRefresh calls made: {}",
        server.refreshes.load(Ordering::SeqCst)
    );
    println!("Stored credentials: {:?}", store.get().expect("store read"));

    registration.detach();
    println!("✓ Token manager detached");
}
