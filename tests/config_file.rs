//! Loading configuration from disk.

use std::io::Write;

use trickle::config::{Config, ConfigError};
use trickle::relay::HeaderCopy;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_config_from_file() {
    let file = write_config(
        r#"
        [server]
        listen = "127.0.0.1:7777"

        [upstream]
        url = "https://api.example.com/v1"

        [relay]
        stream_speed_ms = "0"
        header_copy = "first_value"
        "#,
    );

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.server.listen, "127.0.0.1:7777");
    assert_eq!(config.relay.stream_speed.millis(), 0);
    assert_eq!(config.relay.header_copy, HeaderCopy::FirstValue);
}

#[test]
fn expands_process_environment() {
    let var = "TRICKLE_CONFIG_FILE_TEST_KEY";
    unsafe { std::env::set_var(var, "sk-from-process-env") };

    let file = write_config(&format!(
        "[upstream]\nurl = \"https://api.example.com/v1\"\napi_key = \"${{{}}}\"\n",
        var
    ));
    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(
        config.upstream.api_key.unwrap().expose_secret(),
        "sk-from-process-env"
    );

    unsafe { std::env::remove_var(var) };
}

#[test]
fn missing_file_is_io_error() {
    let err = Config::from_file("/definitely/not/here/trickle.toml").unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("trickle.toml"));
}

#[test]
fn bad_header_copy_is_parse_error() {
    let file = write_config("[upstream]\nurl = \"http://x\"\n[relay]\nheader_copy = \"all\"\n");
    let err = Config::from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
}
