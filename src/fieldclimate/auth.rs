//! HMAC request signing for the FieldClimate API.
//!
//! The signed message is `METHOD + path + timestamp + public_key`, hashed with
//! HMAC-SHA256 under the private key and sent hex-encoded as
//! `Authorization: hmac <public_key>:<signature>` next to a `Date` header
//! carrying the same timestamp.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::ConfigError;

type HmacSha256 = Hmac<Sha256>;

/// How the signing timestamp is rendered in the message and the `Date` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// RFC 1123, e.g. `Mon, 19 Oct 2026 08:00:00 GMT`.
    #[default]
    HttpDate,
    /// Seconds since the Unix epoch.
    Unix,
}

impl TimestampFormat {
    #[must_use]
    pub fn render(self, at: DateTime<Utc>) -> String {
        match self {
            Self::HttpDate => at.format("%a, %d %b %Y %H:%M:%S GMT").to_string(),
            Self::Unix => at.timestamp().to_string(),
        }
    }
}

impl FromStr for TimestampFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http-date" | "rfc1123" => Ok(Self::HttpDate),
            "unix" => Ok(Self::Unix),
            other => Err(format!("unknown timestamp format '{other}' (expected http-date or unix)")),
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::HttpDate => "http-date",
            Self::Unix => "unix",
        })
    }
}

/// Headers produced for one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub authorization: String,
    pub date: String,
}

#[derive(Clone)]
pub struct Credentials {
    public_key: String,
    private_key: String,
    format: TimestampFormat,
}

// Keep the private key out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &self.public_key)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl Credentials {
    #[must_use]
    pub fn new(
        public_key: impl Into<String>,
        private_key: impl Into<String>,
        format: TimestampFormat,
    ) -> Self {
        Self {
            public_key: public_key.into(),
            private_key: private_key.into(),
            format,
        }
    }

    /// Read both keys from files; surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::KeyFile` if either file is unreadable or empty.
    pub fn from_files(
        public_key_path: &Path,
        private_key_path: &Path,
        format: TimestampFormat,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            read_key(public_key_path)?,
            read_key(private_key_path)?,
            format,
        ))
    }

    #[must_use]
    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Sign a request. `path` is relative to the API base URL, without query.
    #[must_use]
    pub fn sign(&self, method: &str, path: &str, at: DateTime<Utc>) -> SignedHeaders {
        let date = self.format.render(at);
        let message = format!(
            "{}{}{}{}",
            method.to_ascii_uppercase(),
            path,
            date,
            self.public_key
        );

        let signature = signature_hex(self.private_key.as_bytes(), message.as_bytes());
        SignedHeaders {
            authorization: format!("hmac {}:{}", self.public_key, signature),
            date,
        }
    }
}

fn signature_hex(key: &[u8], message: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC-SHA256 accepts keys of any length"),
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

fn read_key(path: &Path) -> Result<String, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::KeyFile {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    let key = raw.trim();
    if key.is_empty() {
        return Err(ConfigError::KeyFile {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    Ok(key.to_string())
}
