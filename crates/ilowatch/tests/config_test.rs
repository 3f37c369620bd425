use std::io::Write;
use std::time::Duration;

use ilowatch::Config;
use ilowatch::ConfigError;
use ilowatch::LogLevel;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_from_file() {
    let file = write_config(
        r#"
        [logging]
        level = "warn"

        [integrations.ilo.rack1]
        host = "10.0.0.5"
        username = "Administrator"
        password = "hunter2"
        scan_interval = 15
        timeout = 10
        "#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.logging.level, LogLevel::Warn);

    let rack1 = &config.integrations.ilo["rack1"];
    assert_eq!(rack1.scan_interval(), Duration::from_secs(15));
    let params = rack1.connection_params();
    assert_eq!(params.timeout, Duration::from_secs(10));
    assert_eq!(params.base_url(), "https://10.0.0.5:443");
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");

    let err = Config::from_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io(ref p, _) if p == &path));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn test_malformed_file_is_parse_error() {
    let file = write_config("[integrations.ilo.rack1\nhost = ");
    assert!(matches!(
        Config::from_file(file.path()).unwrap_err(),
        ConfigError::Parse(_)
    ));
}

#[test]
fn test_zero_port_is_rejected() {
    let file = write_config(
        r#"
        [integrations.ilo.rack1]
        host = "10.0.0.5"
        port = 0
        username = "Administrator"
        password = "hunter2"
        "#,
    );

    let err = Config::from_file(file.path()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid [integrations.ilo.rack1] port: must be between 1 and 65535"
    );
}

#[test]
fn test_unknown_protocol_is_rejected() {
    let file = write_config(
        r#"
        [integrations.ilo.rack1]
        host = "10.0.0.5"
        protocol = "ftp"
        username = "Administrator"
        password = "hunter2"
        "#,
    );
    assert!(matches!(
        Config::from_file(file.path()).unwrap_err(),
        ConfigError::Parse(_)
    ));
}
