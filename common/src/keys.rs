//! Tunnel key pairs: generation, loading and persistence.
//!
//! Keys are x25519 and exchanged as standard base64, the encoding WireGuard tooling uses.

use std::{
    fs::{self, OpenOptions},
    io::{self, Write as _},
    path::Path,
};

use base64::{Engine as _, engine::general_purpose::STANDARD};
use secrecy::{ExposeSecret as _, SecretString};
use thiserror::Error as ThisError;
use tracing::info;
use x25519_dalek::{PublicKey, StaticSecret};

const KEY_LEN: usize = 32;

/// Errors while handling key material.
#[derive(Debug, ThisError)]
pub enum KeyError {
    #[error("invalid key: not base64")]
    Encoding(#[from] base64::DecodeError),
    #[error("invalid key: expected 32 bytes, got {0} bytes")]
    Length(usize),
    #[error("key file {path} is empty")]
    Empty { path: String },
    #[error("failed to access key file {path}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// A private key and the public key derived from it.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub private_key: SecretString,
    pub public_key: String,
}

impl KeyPair {
    /// Generate a fresh random key pair.
    #[must_use]
    pub fn generate() -> Self {
        let secret = StaticSecret::from(rand::random::<[u8; KEY_LEN]>());
        Self::from_secret(&secret)
    }

    /// Derive the pair from a base64 encoded private key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not base64 or is not 32 bytes long.
    pub fn from_private_base64(private_key: &str) -> Result<Self, KeyError> {
        let raw = decode_key(private_key)?;
        Ok(Self::from_secret(&StaticSecret::from(raw)))
    }

    fn from_secret(secret: &StaticSecret) -> Self {
        let public = PublicKey::from(secret);
        Self {
            private_key: SecretString::from(STANDARD.encode(secret.to_bytes())),
            public_key: STANDARD.encode(public.to_bytes()),
        }
    }

    /// Load the key pair stored at `path`, generating and writing a new one if the file is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed, or if a new key cannot be written.
    pub fn load_or_generate(path: &Path) -> Result<Self, KeyError> {
        let io_err = |source| KeyError::Io {
            path: path.display().to_string(),
            source,
        };
        match fs::read_to_string(path) {
            Ok(raw) => {
                if raw.trim().is_empty() {
                    return Err(KeyError::Empty {
                        path: path.display().to_string(),
                    });
                }
                Self::from_private_base64(&raw)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let pair = Self::generate();
                if let Some(dir) = path.parent() {
                    fs::create_dir_all(dir).map_err(io_err)?;
                }
                write_private(path, pair.private_key.expose_secret()).map_err(io_err)?;
                info!(path = %path.display(), public_key = %pair.public_key, "Generated new tunnel key pair");
                Ok(pair)
            }
            Err(e) => Err(io_err(e)),
        }
    }
}

/// Check that `public_key` is the standard base64 encoding of a 32 byte key.
///
/// # Errors
///
/// Returns an error describing why the key is unusable.
pub fn validate_public_key(public_key: &str) -> Result<(), KeyError> {
    decode_key(public_key).map(drop)
}

fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = STANDARD.decode(encoded.trim())?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Length(bytes.len()))
}

fn write_private(path: &Path, contents: &str) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt as _;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.write_all(b"\n")
}
