use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Lookup used for environment fallbacks, swappable in tests.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    parse_config(&yaml_string, &process_env).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })
}

/// Parse, resolve defaults, and validate a config document.
pub fn parse_config(yaml: &str, env: EnvLookup<'_>) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let mut config: Config = serde_yaml::from_str(&yaml)?;

    apply_remote_env(&mut config.remote, env);
    resolve_data_dir(&mut config, env);
    expand_paths(&mut config);

    validate_config(&config)?;
    Ok(config)
}

/// Remote identity for commands that can run without a config file.
pub fn remote_from_env(env: EnvLookup<'_>) -> Result<RemoteConfig, ConfigError> {
    let mut remote = RemoteConfig::default();
    apply_remote_env(&mut remote, env);
    remote.signing_key = expand_tilde(&remote.signing_key);

    let mut errors = Vec::new();
    validate_remote(&remote, &mut errors);
    if errors.is_empty() {
        Ok(remote)
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(ENV_VAR_PATTERN).expect("env var pattern is valid");
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "environment variables are not set: {}",
        unexpanded_vars.join(", ")
    )))
}

fn apply_remote_env(remote: &mut RemoteConfig, env: EnvLookup<'_>) {
    let fallbacks: [(&mut String, &str); 3] = [
        (&mut remote.url, "MANTA_URL"),
        (&mut remote.account, "MANTA_USER"),
        (&mut remote.key_id, "MANTA_KEY_ID"),
    ];
    for (field, var) in fallbacks {
        if field.is_empty() {
            if let Some(value) = env(var) {
                *field = value;
            }
        }
    }
}

fn resolve_data_dir(config: &mut Config, env: EnvLookup<'_>) {
    if config.data_dir.is_empty() {
        config.data_dir = env("MILL_DIR")
            .unwrap_or_else(|| format!("/{}/stor/mill", config.remote.account));
    }
    let trimmed = config.data_dir.trim_end_matches('/').to_string();
    config.data_dir = trimmed;
}

fn expand_paths(config: &mut Config) {
    config.rotate_dir = expand_tilde(&config.rotate_dir);
    config.remote.signing_key = expand_tilde(&config.remote.signing_key);
    for source in config.sources.values_mut() {
        source.path = expand_tilde(&source.path);
        if let Some(dir) = &source.staging_dir {
            source.staging_dir = Some(expand_tilde(dir));
        }
    }
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_remote(&config.remote, &mut errors);

    if !config.data_dir.starts_with('/') {
        errors.push(format!(
            "data_dir must be an absolute remote path: '{}'",
            config.data_dir
        ));
    }

    let retry = &config.upload.retry;
    if retry.max_attempts == 0 {
        errors.push("upload.max_attempts must be at least 1".to_string());
    }
    if retry.initial_delay > retry.max_delay {
        errors.push("upload.initial_delay must not exceed upload.max_delay".to_string());
    }
    if config.upload.concurrency == Some(0) {
        errors.push("upload.concurrency must be at least 1".to_string());
    }

    if config.sources.is_empty() {
        errors.push("config must define at least one source".to_string());
    }

    let mut staging_owners: HashMap<std::path::PathBuf, &str> = HashMap::new();
    let mut source_ids: Vec<&String> = config.sources.keys().collect();
    source_ids.sort();
    for source_id in source_ids {
        let source = &config.sources[source_id];
        validate_source(source_id, source, &mut errors);

        let staging = config.staging_dir(source_id);
        if let Some(other) = staging_owners.insert(staging.clone(), source_id) {
            errors.push(format!(
                "source '{}': staging directory '{}' is already used by source '{}'",
                source_id,
                staging.display(),
                other
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_remote(remote: &RemoteConfig, errors: &mut Vec<String>) {
    if remote.url.is_empty() {
        errors.push("remote.url is not set (or set MANTA_URL)".to_string());
    }
    if remote.account.is_empty() {
        errors.push("remote.account is not set (or set MANTA_USER)".to_string());
    }
    if remote.key_id.is_empty() {
        errors.push("remote.key_id is not set (or set MANTA_KEY_ID)".to_string());
    }
}

fn validate_source(source_id: &str, source: &SourceConfig, errors: &mut Vec<String>) {
    let prefix = format!("source '{}'", source_id);

    for (field, value) in [("service", &source.service), ("instance", &source.instance)] {
        if value.is_empty() {
            errors.push(format!("{}: {} cannot be empty", prefix, field));
        } else if value.contains(':') || value.contains('/') {
            errors.push(format!(
                "{}: {} '{}' cannot contain ':' or '/'",
                prefix, field, value
            ));
        }
    }

    if source.log_type.is_empty()
        || source.log_type.contains(':')
        || source.log_type.contains('/')
    {
        errors.push(format!(
            "{}: log_type '{}' must be non-empty and cannot contain ':' or '/'",
            prefix, source.log_type
        ));
    }

    if source.interval.is_zero() {
        errors.push(format!("{}: interval must be greater than zero", prefix));
    }

    if source.job.name.is_empty() {
        errors.push(format!("{}: job.name cannot be empty", prefix));
    }
    if source.job.phases.is_empty() {
        errors.push(format!("{}: job must have at least one phase", prefix));
    }
    for (i, phase) in source.job.phases.iter().enumerate() {
        if phase.exec.trim().is_empty() {
            errors.push(format!("{}: job phase {} has an empty exec", prefix, i));
        }
    }
}
