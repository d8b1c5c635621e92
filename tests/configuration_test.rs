mod common;

use common::CountingCapture;
use rask_telemetry_agent::app::{AgentConfig, App, ConfigError, LogLevel, build_controller};
use rask_telemetry_agent::sender::HttpClient;
use rask_telemetry_agent::{AgentEvent, Message};
use serial_test::serial;
use std::{env, io::Write, time::Duration};
use tempfile::NamedTempFile;
use tokio::time::Instant;

// Clean every variable the agent reads, before and after each test
fn clean_all_env_vars() {
    let env_vars = [
        "RASK_AGENT_CONFIG",
        "APPLICATION_ID",
        "LOGS_ENDPOINT",
        "RUM_ENDPOINT",
        "REPLAY_ENDPOINT",
        "REPLICA_LOGS_ENDPOINT",
        "REPLICA_RUM_ENDPOINT",
        "BATCH_BYTES_LIMIT",
        "MAX_BATCH_SIZE",
        "MAX_MESSAGE_SIZE",
        "FLUSH_TIMEOUT_MS",
        "MAX_SEGMENT_SIZE",
        "MAX_SEGMENT_DURATION_MS",
        "BEACON_BYTES_LIMIT",
        "COMPRESS_BATCHES",
        "REQUEST_TIMEOUT_SECS",
        "CONNECTION_TIMEOUT_SECS",
        "MAX_CONNECTIONS",
        "UNLOAD_GRACE_MS",
        "LOG_LEVEL",
        "CONFIG_FILE",
    ];

    unsafe {
        for var in &env_vars {
            env::remove_var(var);
        }
    }
}

#[test]
#[serial]
fn test_config_from_args() {
    clean_all_env_vars();

    let config = AgentConfig::from_args([
        "rask-telemetry-agent",
        "--application-id",
        "shop",
        "--logs-endpoint",
        "http://collector:8080/v1/logs",
        "--replay-endpoint",
        "http://collector:8080/v1/replay",
        "--max-batch-size",
        "20",
        "--flush-timeout-ms",
        "1500",
        "--compress-batches",
        "--log-level",
        "debug",
    ])
    .unwrap();

    assert_eq!(config.application_id, "shop");
    assert_eq!(config.logs_endpoint.as_deref(), Some("http://collector:8080/v1/logs"));
    assert_eq!(config.rum_endpoint, None);
    assert_eq!(config.max_batch_size, 20);
    assert_eq!(config.flush_timeout, Duration::from_millis(1500));
    assert!(config.compress_batches);
    assert_eq!(config.log_level, LogLevel::Debug);
    assert_eq!(config.beacon_bytes_limit, 60_000);
    assert_eq!(config.unload_grace, Duration::from_secs(2));

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_config_env_fallback() {
    clean_all_env_vars();
    unsafe {
        env::set_var("RUM_ENDPOINT", "http://collector:8080/v1/rum");
        env::set_var("BATCH_BYTES_LIMIT", "4096");
    }

    let config = AgentConfig::from_args(["rask-telemetry-agent"]).unwrap();
    assert_eq!(config.rum_endpoint.as_deref(), Some("http://collector:8080/v1/rum"));
    assert_eq!(config.batch_bytes_limit, 4096);

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_config_document_in_environment() {
    clean_all_env_vars();
    unsafe {
        env::set_var(
            "RASK_AGENT_CONFIG",
            r#"
            application_id = "from-env"
            logs_endpoint = "http://collector:8080/v1/logs"
            replica_logs_endpoint = "http://replica:8080/v1/logs"
            max_segment_size = 1024
            "#,
        );
    }

    let config = AgentConfig::from_args_and_env(["rask-telemetry-agent", "--max-segment-size", "2048"])
        .unwrap();
    assert_eq!(config.application_id, "from-env");
    assert_eq!(config.replica_logs_endpoint.as_deref(), Some("http://replica:8080/v1/logs"));
    // Explicit arguments win over the document.
    assert_eq!(config.max_segment_size, 2048);

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_config_from_file() {
    clean_all_env_vars();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
        application_id = "from-file"
        replay_endpoint = "http://collector:8080/v1/replay"
        max_segment_duration_ms = 10000
        "#
    )
    .unwrap();

    let config = AgentConfig::from_file(file.path()).unwrap();
    assert_eq!(config.application_id, "from-file");
    assert_eq!(config.max_segment_duration, Duration::from_secs(10));
    assert_eq!(config.max_batch_size, 50);

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_invalid_configurations() {
    clean_all_env_vars();

    assert!(matches!(
        AgentConfig::from_args(["rask-telemetry-agent"]),
        Err(ConfigError::InvalidConfig(_))
    ));
    assert!(matches!(
        AgentConfig::from_args(["rask-telemetry-agent", "--logs-endpoint", "collector"]),
        Err(ConfigError::InvalidUrl(_))
    ));
    assert!(
        AgentConfig::from_args([
            "rask-telemetry-agent",
            "--logs-endpoint",
            "http://collector:8080/v1/logs",
            "--batch-bytes-limit",
            "0",
        ])
        .is_err()
    );
    assert!(matches!(
        AgentConfig::from_toml("max_batch_size = \"many\""),
        Err(ConfigError::ParseError(_))
    ));
    assert!(matches!(
        AgentConfig::from_file("/nonexistent/rask-agent.toml"),
        Err(ConfigError::FileError(_))
    ));

    clean_all_env_vars();
}

#[tokio::test]
#[serial]
async fn test_app_from_config_file() {
    clean_all_env_vars();

    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "logs_endpoint = \"http://collector:8080/v1/logs\"").unwrap();

    let config = AgentConfig {
        config_file: Some(file.path().to_path_buf()),
        ..AgentConfig::default()
    };
    let app = App::from_config(config).await.unwrap();
    assert_eq!(app.config().logs_endpoint.as_deref(), Some("http://collector:8080/v1/logs"));

    clean_all_env_vars();
}

#[test]
#[serial]
fn test_controller_only_wires_configured_pipelines() {
    clean_all_env_vars();

    let config = AgentConfig::from_args([
        "rask-telemetry-agent",
        "--logs-endpoint",
        "http://127.0.0.1:9/v1/logs",
    ])
    .unwrap();
    let client = HttpClient::new(config.client_config()).unwrap();
    let capture = CountingCapture::new();
    let mut controller = build_controller(&config, &client, capture.clone()).unwrap();

    let now = Instant::now();
    controller.handle(AgentEvent::Log(Message::new().with("message", "kept")), now);
    controller.handle(AgentEvent::Rum(Message::new().with("type", "action")), now);
    assert_eq!(controller.buffered_logs(), 1);
    assert_eq!(controller.buffered_rum(), 0);
    assert_eq!(controller.buffered_records(), 0);
    // No replay pipeline, so nobody asks for snapshots.
    assert_eq!(capture.requests(), 0);

    clean_all_env_vars();
}
