use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default file name of the eye embedding model inside the model directory.
pub const EMBEDDER_MODEL_NAME: &str = "eye_embedder.onnx";

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {path}")]
    MissingModel { path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed sha256 digest {0:?} (expected 64 hex characters)")]
    MalformedDigest(String),

    #[error("model checksum mismatch ({path})\n  expected: {expected}\n  got:      {got}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Compute SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = file
            .read(&mut buf)
            .map_err(|source| ModelIntegrityError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check that the model at `path` exists and, when a digest is configured,
/// that its contents match. Returns the computed digest.
pub fn verify_model(path: &Path, expected_sha256: Option<&str>) -> Result<String, ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            path: path.to_path_buf(),
        });
    }

    let expected = expected_sha256.map(normalize_digest).transpose()?;
    let digest = sha256_file_hex(path)?;

    if let Some(expected) = expected {
        if digest != expected {
            return Err(ModelIntegrityError::ChecksumMismatch {
                path: path.to_path_buf(),
                expected,
                got: digest,
            });
        }
    }

    Ok(digest)
}

fn normalize_digest(digest: &str) -> Result<String, ModelIntegrityError> {
    let trimmed = digest.trim().to_ascii_lowercase();
    if trimmed.len() != 64 || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ModelIntegrityError::MalformedDigest(digest.to_string()));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "ocular-models-test-{name}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    // sha256("hello")
    const HELLO_SHA256: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn verify_model_rejects_missing() {
        let path = temp_dir("missing").join("nope.onnx");
        let err = verify_model(&path, None).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MissingModel { .. }));
    }

    #[test]
    fn verify_model_rejects_mismatch() {
        let dir = temp_dir("mismatch");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(EMBEDDER_MODEL_NAME);
        fs::write(&path, b"hello").unwrap();

        let wrong = "0".repeat(64);
        let err = verify_model(&path, Some(&wrong)).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::ChecksumMismatch { .. }));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_model_accepts_match_in_any_case() {
        let dir = temp_dir("match");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(EMBEDDER_MODEL_NAME);
        fs::write(&path, b"hello").unwrap();

        assert_eq!(sha256_file_hex(&path).unwrap(), HELLO_SHA256);
        let upper = HELLO_SHA256.to_ascii_uppercase();
        assert_eq!(verify_model(&path, Some(&upper)).unwrap(), HELLO_SHA256);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_model_without_digest_only_checks_presence() {
        let dir = temp_dir("nodigest");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(EMBEDDER_MODEL_NAME);
        fs::write(&path, b"hello").unwrap();

        assert_eq!(verify_model(&path, None).unwrap(), HELLO_SHA256);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn verify_model_rejects_malformed_digest() {
        let dir = temp_dir("malformed");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(EMBEDDER_MODEL_NAME);
        fs::write(&path, b"hello").unwrap();

        let err = verify_model(&path, Some("abc")).unwrap_err();
        assert!(matches!(err, ModelIntegrityError::MalformedDigest(_)));
        let _ = fs::remove_dir_all(&dir);
    }
}
