pub mod generate;
pub mod parse;
pub mod types;
pub mod version;

use regex::Regex;
use std::path::{Path, PathBuf};

pub use parse::{load_config, parse_config, remote_from_env, ConfigError};
pub use types::{Config, RemoteConfig, SourceConfig, UploadConfig};

/// `$env{VAR_NAME}` where VAR_NAME starts with a letter or underscore.
pub(crate) const ENV_VAR_PATTERN: &str = r"\$env\{([A-Za-z_][A-Za-z0-9_]*)\}";

/// Expands `$env{VAR_NAME}` references in a string.
/// Unset variables are left unchanged so validation can report them.
pub fn expand_env_vars(text: &str) -> String {
    let re = Regex::new(ENV_VAR_PATTERN).expect("env var pattern is valid");

    re.replace_all(text, |caps: &regex::Captures| {
        let whole = caps.get(0).map_or("", |m| m.as_str());
        caps.get(1)
            .and_then(|name| std::env::var(name.as_str()).ok())
            .unwrap_or_else(|| whole.to_string())
    })
    .to_string()
}

/// Expands a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir.join(rest);
        }
    } else if path_str == "~" {
        if let Some(home_dir) = dirs::home_dir() {
            return home_dir;
        }
    }

    path.to_path_buf()
}

/// Resolves the config file path. Returns the first existing path from:
/// 1. Explicit path (if provided, with tilde expansion)
/// 2. ~/.config/mill/config.yml
/// 3. /etc/mill/config.yml
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_tilde(path));
    }

    if let Some(home_dir) = dirs::home_dir() {
        let user_config = home_dir.join(".config/mill/config.yml");
        if user_config.exists() {
            return Some(user_config);
        }
    }

    let system_config = PathBuf::from("/etc/mill/config.yml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("MILL_TEST_EXPAND_ACCOUNT", "acct");
        let result = expand_env_vars("/$env{MILL_TEST_EXPAND_ACCOUNT}/stor/mill");
        assert_eq!(result, "/acct/stor/mill");
        std::env::remove_var("MILL_TEST_EXPAND_ACCOUNT");
    }

    #[test]
    fn test_expand_env_vars_unset_left_alone() {
        let result = expand_env_vars("path/$env{MILL_TEST_NONEXISTENT_VAR}/file");
        assert_eq!(result, "path/$env{MILL_TEST_NONEXISTENT_VAR}/file");
    }

    #[test]
    fn test_expand_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/.ssh/id_rsa")), home.join(".ssh/id_rsa"));
            assert_eq!(expand_tilde(Path::new("~")), home);
        }
        assert_eq!(expand_tilde(Path::new("/var/tmp/mill")), Path::new("/var/tmp/mill"));
        assert_eq!(expand_tilde(Path::new("relative/~")), Path::new("relative/~"));
    }

    #[test]
    fn test_explicit_config_path_wins() {
        let resolved = resolve_config_path(Some(Path::new("/srv/mill.yml")));
        assert_eq!(resolved, Some(PathBuf::from("/srv/mill.yml")));
    }
}
