// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serial_test::serial;

fn clear_lathe_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("LATHE_") {
            std::env::remove_var(&key);
        }
    }
}

#[test]
#[serial]
fn defaults_without_env() {
    clear_lathe_env();
    let config = Config::load_with(&HashMap::new()).unwrap();
    assert_eq!(config.time_limit, 2400);
    assert_eq!(config.retry_time_limit, 3600);
    assert!(!config.cleanup_enabled);
    assert_eq!(config.cleanup_delay, Duration::from_secs(3600));
    assert_eq!(config.license_port, 35000);
    assert!(config.license_acquire_at_start);
    assert!(config.api_key_sha256.is_none());
    assert!(config.max_memory_mb.is_none());
    assert_eq!(config.result_ttl, Duration::from_secs(259200));
    // gpuhigh is opt-in: only big boxes should serve it
    assert!(!config.queues.contains(&QueueName::GpuHigh));
}

#[test]
#[serial]
fn env_overrides_win() {
    clear_lathe_env();
    std::env::set_var("LATHE_QUEUES", "gpu,gpuhigh");
    std::env::set_var("LATHE_TIME_LIMIT", "60");
    std::env::set_var("LATHE_CLEANUP_ENABLED", "true");
    let config = Config::load_with(&HashMap::new()).unwrap();
    std::env::remove_var("LATHE_QUEUES");
    std::env::remove_var("LATHE_TIME_LIMIT");
    std::env::remove_var("LATHE_CLEANUP_ENABLED");

    assert_eq!(config.queues, vec![QueueName::Gpu, QueueName::GpuHigh]);
    assert_eq!(config.time_limit, 60);
    assert!(config.cleanup_enabled);
}

#[test]
#[serial]
fn file_fills_unset_keys_only() {
    clear_lathe_env();
    std::env::set_var("LATHE_TIME_LIMIT", "120");
    let mut file = HashMap::new();
    file.insert("LATHE_TIME_LIMIT".to_string(), "999".to_string());
    file.insert("LATHE_RETRY_TIME_LIMIT".to_string(), "7200".to_string());
    let config = Config::load_with(&file).unwrap();
    std::env::remove_var("LATHE_TIME_LIMIT");

    assert_eq!(config.time_limit, 120);
    assert_eq!(config.retry_time_limit, 7200);
}

#[test]
#[serial]
fn invalid_values_are_rejected() {
    clear_lathe_env();
    std::env::set_var("LATHE_QUEUES", "cpu,warp");
    let err = Config::load_with(&HashMap::new()).unwrap_err();
    std::env::remove_var("LATHE_QUEUES");
    assert!(matches!(err, ConfigError::Invalid { .. }));

    std::env::set_var("LATHE_POOL", "forkbomb");
    let err = Config::load_with(&HashMap::new()).unwrap_err();
    std::env::remove_var("LATHE_POOL");
    assert!(matches!(err, ConfigError::Invalid { .. }));
}

#[test]
#[serial]
fn config_file_parses_toml() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("lathe.toml");
    std::fs::write(
        &path,
        "time_limit = 1200\nqueues = \"cpu,control\"\ncleanup_enabled = true\n",
    )
    .unwrap();
    let map = load_config_file_from(&path);
    assert_eq!(map.get("LATHE_TIME_LIMIT").map(String::as_str), Some("1200"));
    assert_eq!(
        map.get("LATHE_QUEUES").map(String::as_str),
        Some("cpu,control")
    );
    assert_eq!(
        map.get("LATHE_CLEANUP_ENABLED").map(String::as_str),
        Some("true")
    );
}

#[test]
#[serial]
fn missing_config_file_is_empty() {
    assert!(load_config_file_from(Path::new("/nonexistent/lathe.toml")).is_empty());
}
