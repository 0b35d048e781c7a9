pub fn generate_starter_config() -> String {
    r#"# =============================================================================
# MILL CONFIGURATION
# =============================================================================
# Ships local log files to a remote object store and feeds the uploaded objects
# into a downstream processing job.
#
# Config file locations (in order of precedence):
#   1. Path specified via --config argument
#   2. ~/.config/mill/config.yml
#   3. /etc/mill/config.yml
#
# Any value may reference environment variables with $env{NAME}.

# =============================================================================
# REMOTE
# =============================================================================
# Empty fields fall back to MANTA_URL, MANTA_USER and MANTA_KEY_ID.

remote:
  url: https://us-east.manta.joyent.com
  account: $env{MANTA_USER}
  key_id: $env{MANTA_KEY_ID}
  # RSA private key in PEM form (PKCS#1 or PKCS#8, e.g. from ssh-keygen -m PEM)
  signing_key: ~/.ssh/id_rsa
  timeout: 60s

# Remote base directory for uploaded logs.
# Defaults to $MILL_DIR, then /{account}/stor/mill.
# data_dir: /myaccount/stor/mill

# Local directory holding rotated files until they are uploaded.
# Each source stages into its own subdirectory.
rotate_dir: /var/tmp/mill

# =============================================================================
# UPLOAD
# =============================================================================

upload:
  # Exponential backoff between attempts, doubling up to max_delay
  initial_delay: 1s
  max_delay: 10s
  max_attempts: 5
  # Concurrent uploads per upload session, unbounded when unset
  # concurrency: 8

# =============================================================================
# SOURCES
# =============================================================================
# Each source is rotated on its own timer: the live file is copied into the
# staging directory, truncated, and every staged file is uploaded to
#   {data_dir}/logs/{service}/{yyyy}/{mm}/{dd}/{hh}/{instance}-{ts}.{log_type}.log
# Uploaded keys are appended to the running job named by job.name, which is
# created if no such job is running.

sources:
  nginx_access:
    service: www
    # Defaults to the hostname
    instance: web0
    path: /var/log/nginx/access.log
    interval: 5m
    log_type: nginx
    job:
      name: mill-www-nginx
      phases:
        - type: map
          exec: "mill-tlog | mill-index"

  application:
    service: api
    path: /var/log/api/api.log
    interval: 1h
    log_type: bunyan
    job:
      name: mill-api
      phases:
        - type: map
          exec: "mill-tlog"
        - type: reduce
          exec: "sort -n"
          count: 1
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn test_starter_config_parses() {
        let yaml = generate_starter_config()
            .replace("$env{MANTA_USER}", "acct")
            .replace("$env{MANTA_KEY_ID}", "aa:bb");
        let config = parse_config(&yaml, &|_: &str| None).unwrap();

        assert_eq!(config.sources.len(), 2);
        assert_eq!(config.data_dir, "/acct/stor/mill");
        assert_eq!(config.sources["application"].job.phases.len(), 2);
        assert_eq!(config.upload.concurrency, None);
    }
}
