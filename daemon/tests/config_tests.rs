use procwatch_daemon::config::Config;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

#[test]
fn test_default_config() {
    let config = Config::default();
    assert_eq!(config.source.command, "task_manager");
    assert_eq!(config.source.shutdown_grace(), Duration::from_secs(2));
    assert_eq!(config.resolver.refresh_interval(), Duration::from_secs(10));
    assert_eq!(config.resolver.bulk_timeout(), Duration::from_secs(2));
    assert_eq!(config.resolver.per_window_timeout(), Duration::from_millis(200));
    assert_eq!(config.resolver.max_windows, 50);
    assert_eq!(config.classifier.cache_cleanup_cycles, 30);
    assert!(config.ipc.socket_path.is_none());
    assert_eq!(config.ipc.end_task_grace(), Duration::from_millis(300));
}

#[test]
fn test_load_from_toml() {
    let toml_content = r#"
[source]
command = "/opt/sampler/task_manager"
args = ["--interval", "1"]
shutdown_grace_ms = 500
frame_queue = 8

[resolver]
enabled = false
refresh_interval_secs = 30
bulk_timeout_ms = 1000
per_window_timeout_ms = 100
max_windows = 20

[classifier]
cache_cleanup_cycles = 10
extra_app_patterns = ["steam"]
extra_background = ["syncthing"]

[ipc]
socket_path = "/tmp/procwatch-test.sock"
broadcast_capacity = 16
"#;
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(toml_content.as_bytes()).unwrap();
    let config = Config::load(file.path()).unwrap();
    assert_eq!(config.source.args, vec!["--interval", "1"]);
    assert_eq!(config.source.shutdown_grace(), Duration::from_millis(500));
    assert!(!config.resolver.enabled);
    assert_eq!(config.resolver.max_windows, 20);
    assert_eq!(config.classifier.extra_app_patterns, vec!["steam"]);
    assert_eq!(config.ipc.broadcast_capacity, 16);
}

#[test]
fn test_partial_toml_keeps_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[resolver]\nenabled = false\n").unwrap();
    let config = Config::load(file.path()).unwrap();
    assert!(!config.resolver.enabled);
    assert_eq!(config.resolver.refresh_interval_secs, 10);
    assert_eq!(config.source.command, "task_manager");
}

#[test]
fn test_invalid_toml_is_an_error() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(b"[source\ncommand = ").unwrap();
    assert!(Config::load(file.path()).is_err());
}

#[test]
fn test_save_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");
    let mut config = Config::default();
    config.resolver.refresh_interval_secs = 20;
    config.classifier.extra_background.push("dropbox".to_string());
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.resolver.refresh_interval_secs, 20);
    assert_eq!(loaded.classifier.extra_background, vec!["dropbox"]);
}
