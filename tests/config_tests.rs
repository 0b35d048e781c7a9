use mill::config::{generate::generate_starter_config, load_config, ConfigError};
use mill::rotation::LogSource;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_generated_config_is_valid_with_identity_filled_in() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_content = generate_starter_config()
        .replace("$env{MANTA_USER}", "acct")
        .replace("$env{MANTA_KEY_ID}", "aa:bb");
    fs::write(&config_path, config_content).unwrap();

    let config = load_config(&config_path).expect("Generated config should be valid");

    assert_eq!(config.sources.len(), 2);
    assert!(config.sources.contains_key("nginx_access"));
    assert!(config.sources.contains_key("application"));

    let sources = LogSource::all_from_config(&config);
    assert_eq!(sources[0].id, "application");
    assert_eq!(sources[0].interval, Duration::from_secs(3600));
    assert_eq!(sources[0].staging_dir, config.rotate_dir.join("application"));
    assert_eq!(sources[1].log_type, "nginx");
    assert_eq!(sources[1].instance, "web0");
}

#[test]
fn test_duplicate_staging_dir_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");

    let config_yaml = r#"
remote:
  url: https://manta.example.com
  account: acct
  key_id: "aa:bb"
sources:
  a:
    service: www
    path: /var/log/a.log
    interval: 1m
    staging_dir: /var/tmp/shared
    job:
      name: mill-a
      phases:
        - type: map
          exec: cat
  b:
    service: api
    path: /var/log/b.log
    interval: 1m
    staging_dir: /var/tmp/shared
    job:
      name: mill-b
      phases:
        - type: map
          exec: cat
"#;
    fs::write(&config_path, config_yaml).unwrap();

    match load_config(&config_path) {
        Err(ConfigError::ValidationList(errors)) => {
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("already used by source 'a'"));
        }
        other => panic!("expected validation failure, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn test_missing_file_reports_path() {
    let err = load_config(std::path::Path::new("/nonexistent/mill.yml")).unwrap_err();
    assert!(err.to_string().contains("/nonexistent/mill.yml"));
}

#[test]
fn test_malformed_yaml_reports_path() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yml");
    fs::write(&config_path, "sources: [unclosed").unwrap();

    let err = load_config(&config_path).unwrap_err();
    assert!(err.to_string().contains("config.yml"));
}
