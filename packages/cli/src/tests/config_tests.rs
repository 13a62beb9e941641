use crate::config::{Config, ConfigError};
use codenest_config::constants::*;
use rstest::rstest;
use serial_test::serial;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

fn clear_env() {
    for name in [
        CODENEST_API_PORT,
        CODENEST_API_HOST,
        CODENEST_CORS_ORIGIN,
        CODENEST_DATABASE_URL,
        CODENEST_WORKSPACE_ROOT,
    ] {
        env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_config_from_env_defaults() {
    clear_env();

    let config = Config::from_env().unwrap();

    assert_eq!(config.port, 4101);
    assert_eq!(config.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(config.cors_origin, "http://localhost:5173");
    assert_eq!(config.database_url, "sqlite://codenest.db");
    assert_eq!(config.workspace_root, PathBuf::from("workspaces"));
}

#[test]
#[serial]
fn test_config_from_env_with_all_custom() {
    clear_env();
    env::set_var(CODENEST_API_PORT, "3000");
    env::set_var(CODENEST_API_HOST, "0.0.0.0");
    env::set_var(CODENEST_CORS_ORIGIN, "https://app.example.com");
    env::set_var(CODENEST_DATABASE_URL, "sqlite:///var/lib/codenest/sessions.db");
    env::set_var(CODENEST_WORKSPACE_ROOT, "/srv/workspaces");

    let config = Config::from_env().unwrap();

    assert_eq!(config.port, 3000);
    assert_eq!(config.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    assert_eq!(config.cors_origin, "https://app.example.com");
    assert_eq!(config.database_url, "sqlite:///var/lib/codenest/sessions.db");
    assert_eq!(config.workspace_root, PathBuf::from("/srv/workspaces"));

    clear_env();
}

#[rstest]
#[case("not-a-number")]
#[case("70000")]
#[case("-1")]
#[serial]
fn test_config_invalid_port(#[case] value: &str) {
    clear_env();
    env::set_var(CODENEST_API_PORT, value);

    let result = Config::from_env();

    assert!(matches!(result, Err(ConfigError::InvalidPort(_))));
    clear_env();
}

#[test]
#[serial]
fn test_config_port_zero() {
    clear_env();
    env::set_var(CODENEST_API_PORT, "0");

    let result = Config::from_env();

    assert!(matches!(result, Err(ConfigError::PortOutOfRange(0))));
    clear_env();
}

#[test]
#[serial]
fn test_config_invalid_host() {
    clear_env();
    env::set_var(CODENEST_API_HOST, "localhost");

    let result = Config::from_env();

    assert!(matches!(result, Err(ConfigError::InvalidHost(host)) if host == "localhost"));
    clear_env();
}

#[test]
#[serial]
fn test_cli_flags_override_environment() {
    clear_env();
    env::set_var(CODENEST_API_PORT, "3000");

    let config = Config::from_env()
        .unwrap()
        .with_overrides(Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)), Some(9000))
        .unwrap();

    assert_eq!(config.socket_addr().to_string(), "0.0.0.0:9000");

    let rejected = Config::from_env().unwrap().with_overrides(None, Some(0));
    assert!(matches!(rejected, Err(ConfigError::PortOutOfRange(0))));
    clear_env();
}
