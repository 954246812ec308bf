use std::io::Write;

use rg_domain::config::{Config, RuleSpec};

#[test]
fn load_config_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"
services:
  redis:
    host: "localhost:6379"
    enabled: true
  nats:
    url: ""
    threshold: 0.8
    enabled: false
rules:
  - name: velocity
    intervalSeconds: 60
    limit: 5
    strategy: override
"#
    )
    .unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert!(config.services.redis.enabled);
    assert!(!config.services.nats.enabled);
    assert!(matches!(config.rules[0], RuleSpec::Velocity(_)));
    assert!(config.validate().is_empty());
}

#[test]
fn missing_file_is_an_io_error() {
    let err = Config::from_file("/does/not/exist/rules.yaml").unwrap_err();
    assert!(matches!(err, rg_domain::Error::Io(_)));
}

#[test]
fn empty_document_yields_defaults() {
    // An all-defaults config parses but registers nothing; the gateway
    // decides whether an empty registry is acceptable.
    let config = Config::from_yaml("{}").unwrap();
    assert!(config.rules.is_empty());
    assert!(!config.services.redis.enabled);
}
