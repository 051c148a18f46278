use std::io::Write;
use std::net::TcpListener;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Config whose IRC server is not listening
fn minimal_config(port: u16, dir: &TempDir) -> String {
    format!(
        r##"
[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"

[irc]
server = "127.0.0.1"
port = {}
nickname = "gumshoe"
key = "s3cret"
registered = true
watch_channel = "#announce"
connect_timeout_secs = 1
reconnect_delay_secs = 1

[fetch]
download_dir = "{}"
"##,
        port,
        dir.path().join("gumshoe.db").display(),
        get_available_port(),
        dir.path().join("downloads").display(),
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &std::path::Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_gumshoed"))
        .env("GUMSHOE_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_health_endpoint_with_unreachable_irc_server() {
    let port = get_available_port();
    let dir = TempDir::new().unwrap();
    let temp_file = write_config(&minimal_config(port, &dir));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());
    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");

    let status: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/status", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["session_wanted"], true);
    assert!(status["pipeline"]["last_error"].is_object());

    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_returns_sanitized() {
    let port = get_available_port();
    let dir = TempDir::new().unwrap();
    let temp_file = write_config(&minimal_config(port, &dir));

    let mut server = spawn_server(temp_file.path()).await;
    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/config", port))
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let text = response.text().await.unwrap();
    assert!(!text.contains("s3cret"));
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json["server"]["port"], port);
    assert_eq!(json["irc"]["key_configured"], true);

    server.kill().await.ok();
}

#[tokio::test]
async fn test_shows_persist_across_restarts() {
    let port = get_available_port();
    let dir = TempDir::new().unwrap();
    let temp_file = write_config(&minimal_config(port, &dir));
    let client = Client::new();

    let mut server = spawn_server(temp_file.path()).await;
    assert!(wait_for_server(port, 40).await, "Server did not start in time");
    let response = client
        .post(format!("http://127.0.0.1:{}/api/v1/shows", port))
        .json(&serde_json::json!({"title": "Show Name", "quality": "720p"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    server.kill().await.ok();
    let _ = server.wait().await;

    let mut server = spawn_server(temp_file.path()).await;
    assert!(wait_for_server(port, 40).await, "Server did not restart in time");
    let shows: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/v1/shows", port))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(shows["total"], 1);
    assert_eq!(shows["shows"][0]["title"], "Show Name");

    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_gumshoed"))
            .env("GUMSHOE_CONFIG", "/nonexistent/gumshoe.toml")
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_irc_section_exits_with_error() {
    let config_without_irc = r#"
[server]
port = 8080
"#;
    let temp_file = write_config(config_without_irc);

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_gumshoed"))
            .env("GUMSHOE_CONFIG", temp_file.path())
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_pattern_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let config = format!(
        "{}\n[matcher]\nannounce_pattern = \"(?P<title>.*)\"\n",
        minimal_config(get_available_port(), &dir)
    );
    let temp_file = write_config(&config);

    let result = timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_gumshoed"))
            .env("GUMSHOE_CONFIG", temp_file.path())
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command");

    assert!(!result.status.success());
}
