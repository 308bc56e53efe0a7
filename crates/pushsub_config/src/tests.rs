use super::load_config;
use super::settings::Settings;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "0.0.0.0");
    assert_eq!(settings.server.port, 4444);
    assert_eq!(settings.server.reaper_interval_secs, 30);
    assert_eq!(settings.client.server_address, "127.0.0.1:4444");
    assert_eq!(settings.client.port, 9999);
    assert!(settings.client.advertise_host.is_none());
    assert_eq!(settings.client.connect_timeout_secs, 15);
}

#[test]
#[serial]
fn load_config_without_sources_uses_defaults() {
    temp_env::with_vars_unset(["PUSHSUB__SERVER__PORT", "PUSHSUB__CLIENT__PORT"], || {
        let cfg = load_config().expect("load_config failed");
        assert_eq!(cfg.server.port, 4444);
        assert_eq!(cfg.client.port, 9999);
    });
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("PUSHSUB__SERVER__PORT", Some("5000")),
            ("PUSHSUB__SERVER__REAPER_INTERVAL_SECS", Some("5")),
            ("PUSHSUB__CLIENT__ADVERTISE_HOST", Some("10.1.2.3")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 5000);
            assert_eq!(cfg.server.reaper_interval_secs, 5);
            assert_eq!(cfg.client.advertise_host.as_deref(), Some("10.1.2.3"));
            // untouched keys keep their defaults
            assert_eq!(cfg.server.host, "0.0.0.0");
            assert_eq!(cfg.client.connect_timeout_secs, 15);
        },
    );
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config looks for config/default.* relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "127.0.0.1"
        port = 4545

        [client]
        server_address = "broker.local:4545"
        connect_timeout_secs = 3
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();

    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "127.0.0.1");
    assert_eq!(cfg.server.port, 4545);
    assert_eq!(cfg.server.reaper_interval_secs, 30);
    assert_eq!(cfg.client.server_address, "broker.local:4545");
    assert_eq!(cfg.client.connect_timeout_secs, 3);
    assert_eq!(cfg.client.port, 9999);
}
