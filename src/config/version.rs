use sha2::{Digest, Sha256};
use std::io;
use std::path::Path;

/// Short content fingerprint of a config file, logged at startup so operators
/// can tell which config a running daemon was started with.
pub fn config_fingerprint(config_path: &Path) -> Result<String, io::Error> {
    let content = std::fs::read(config_path)?;
    let digest = Sha256::digest(&content);
    Ok(hex::encode(&digest[..6]))
}
