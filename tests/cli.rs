//! CLI argument parsing and config file tests.

use clap::Parser;
use portico::cli::{Cli, Commands};
use portico::core::config::Config;
use std::io::Write;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn start_parses_config_path() {
    let cli = Cli::parse_from(["portico", "start", "--config", "/tmp/gw.json"]);
    match cli.command {
        Commands::Start(args) => assert_eq!(args.config.to_str(), Some("/tmp/gw.json")),
        _ => panic!("expected start"),
    }
}

#[test]
fn send_parses_endpoint_properties_and_count() {
    let cli = Cli::parse_from([
        "portico",
        "send",
        "--endpoint",
        "E1",
        "--body",
        "hi",
        "--property",
        "temp=21",
        "--property",
        "unit=C",
        "--count",
        "3",
    ]);
    match cli.command {
        Commands::Send(args) => {
            assert_eq!(args.address, "127.0.0.1:5672");
            assert_eq!(args.endpoint, "E1");
            assert_eq!(args.body.as_deref(), Some("hi"));
            assert_eq!(args.properties, vec!["temp=21", "unit=C"]);
            assert_eq!(args.count, 3);
        }
        _ => panic!("expected send"),
    }
}

#[test]
fn send_requires_endpoint() {
    assert!(Cli::try_parse_from(["portico", "send", "--body", "hi"]).is_err());
}

#[test]
fn config_file_loads_and_validates() {
    let file = write_config(
        r#"{
            "listener": { "bind": "127.0.0.1:0" },
            "mappings": [
                { "endpoint": "E1", "deviceId": "dev1", "deviceKey": "key1" }
            ],
            "log_level": "debug"
        }"#,
    );
    let config = Config::load(file.path()).expect("load");
    assert_eq!(config.listener.bind.to_string(), "127.0.0.1:0");
    assert_eq!(config.mappings[0].device_id, "dev1");
    assert_eq!(config.log_level.as_deref(), Some("debug"));
}

#[test]
fn config_with_empty_device_key_is_refused() {
    let file = write_config(
        r#"{ "mappings": [ { "endpoint": "E1", "deviceId": "dev1", "deviceKey": "" } ] }"#,
    );
    let err = Config::load(file.path()).expect_err("must fail");
    assert!(format!("{err:#}").contains("deviceKey"));
}

#[test]
fn malformed_json_reports_the_path() {
    let file = write_config("{ not json");
    let err = Config::load(file.path()).expect_err("must fail");
    assert!(format!("{err:#}").contains("parsing config"));
}
