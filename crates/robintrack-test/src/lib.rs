//! Helpers for testing the web server and service.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test. Assign it to a variable in the test function, e.g.
//!    `let _store_dir = test::tempdir()`.
//!
//!  - When using a [`Server`], hold it until all requests to it have been made. Dropping it stops
//!    serving.
//!
//!  - Tests of the Redis backends need a server, see [`redis_url!`]. Use unique key names in them,
//!    the server is shared between test runs.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::Router;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the robintrack crates and mutes all
///    other logs (such as hyper or redis).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("robintrack=trace,robintrack_service=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the absolute path to the given fixture.
///
/// Fixtures are located in the `tests/fixtures` directory, located from the workspace root.
///
/// # Panics
///
/// Panics if the fixture path does not exist on the file system.
pub fn fixture(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();

    let mut full_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    full_path.pop(); // to /crates/
    full_path.pop(); // to /
    full_path.push("tests/fixtures/");
    full_path.push(path);

    assert!(full_path.exists(), "'{}' does not exist", path.display());

    full_path
}

/// Returns the contents of a fixture.
///
/// # Panics
///
/// Panics if the fixture does not exist or cannot be read.
pub fn read_fixture(path: impl AsRef<Path>) -> Vec<u8> {
    std::fs::read(fixture(path)).unwrap()
}

/// Returns the contents of a JSON fixture.
pub fn read_json_fixture(path: impl AsRef<Path>) -> serde_json::Value {
    serde_json::from_slice(&read_fixture(path)).unwrap()
}

/// Returns the URL of a Redis server for testing the Redis backends.
///
/// The URL is read from the `ROBINTRACK_TEST_REDIS_URL` environment variable, our CI sets this.
/// Returns `None` if it is not set.
pub fn redis_url() -> Option<String> {
    std::env::var("ROBINTRACK_TEST_REDIS_URL")
        .ok()
        .filter(|url| !url.is_empty())
}

/// Returns the Redis URL from [`redis_url`].
///
/// If there is none, this macro will return, as a poor substitute for skipping tests.
#[macro_export]
macro_rules! redis_url {
    () => {
        match $crate::redis_url() {
            Some(url) => url,
            None => {
                println!("Skipping due to missing ROBINTRACK_TEST_REDIS_URL");
                return;
            }
        }
    };
}

/// Returns a random prefix for names in shared test backends.
pub fn unique_prefix() -> String {
    let suffix: u64 = rand::random();
    format!("robintrack-test-{suffix:016x}")
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
///
/// Requests carry the peer address as [`ConnectInfo`](axum::extract::ConnectInfo), like in
/// production.
#[derive(Debug)]
pub struct Server {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
}

impl Server {
    /// Creates a new test server serving the given router.
    pub fn new(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let service = router.into_make_service_with_connect_info::<SocketAddr>();
        let handle = tokio::spawn(async move {
            axum::serve(listener, service).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses the loopback address as hostname.
    pub fn url(&self, path: &str) -> reqwest::Url {
        let path = path.trim_start_matches('/');
        format!("http://127.0.0.1:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
