use std::env;
use std::fs;

use serial_test::serial;
use tempfile::TempDir;

use super::{Settings, load_config};

/// Runs `f` with the current directory set to a temp dir holding `toml` as
/// `config/default.toml`.
fn with_config_file<F: FnOnce()>(toml: Option<&str>, f: F) {
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");
    if let Some(toml) = toml {
        fs::create_dir_all("config").expect("create config dir");
        fs::write("config/default.toml", toml).expect("write config file");
    }
    f();
    env::set_current_dir(orig).expect("restore cwd");
}

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.server.path, "/relay");
    assert_eq!(settings.bus.connector_name, "RELAY_SERVLET_DEFAULT");
    assert_eq!(settings.bus.host_spec(), "localhost");
    assert_eq!(settings.relay.chunk_limit, 100);
    assert_eq!(settings.relay.chunk_timeout_ms, 5000);
    assert_eq!(settings.relay.retry_pause_ms, 500);
    assert_eq!(settings.client.server_name, "remote");
    assert_eq!(settings.client.client_id, None);
}

#[test]
fn test_bus_host_spec_includes_user_and_port() {
    let mut settings = Settings::default();
    settings.bus.user = Some("guest".to_string());
    settings.bus.port = Some(5672);
    assert_eq!(settings.bus.host_spec(), "guest@localhost:5672");
}

#[test]
#[serial]
fn test_load_config_without_sources_uses_defaults() {
    with_config_file(None, || {
        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg, Settings::default());
    });
}

#[test]
#[serial]
fn test_load_config_from_file_overrides_defaults() {
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [bus]
        host = "rabbit"
        port = 5673
        user = "relay"

        [relay]
        chunk_limit = 10
    "#;
    with_config_file(Some(toml), || {
        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.server.path, "/relay");
        assert_eq!(cfg.bus.host_spec(), "relay@rabbit:5673");
        assert_eq!(cfg.relay.chunk_limit, 10);
        assert_eq!(cfg.relay.chunk_timeout_ms, 5000);
    });
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let toml = r#"
        [server]
        port = 9000
    "#;
    with_config_file(Some(toml), || {
        temp_env::with_vars(
            [
                ("RELAY__SERVER__PORT", Some("9100")),
                ("RELAY__CLIENT__CLIENT_ID", Some("edge-1")),
            ],
            || {
                let cfg = load_config().expect("load_config failed");
                assert_eq!(cfg.server.port, 9100);
                assert_eq!(cfg.client.client_id.as_deref(), Some("edge-1"));
            },
        );
    });
}
