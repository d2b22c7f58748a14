//! Durable lease records.
//!
//! One record per line, four whitespace separated fields:
//! `<owner> <public key> <address> <expiry>`, the expiry in [`TIMESTAMP_FORMAT`] (UTC).

use core::net::Ipv4Addr;
use std::{
    io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error as ThisError;
use tokio::fs;
use tracing::{debug, warn};

/// Fixed timestamp profile of the lease file.
pub(crate) const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// A time-bounded binding of an owner identity to an address and public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LeaseRecord {
    pub owner: String,
    pub public_key: String,
    pub address: Ipv4Addr,
    pub expiry: DateTime<Utc>,
}

impl LeaseRecord {
    pub(crate) fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }

    fn to_line(&self) -> String {
        format!(
            "{} {} {} {}",
            self.owner,
            self.public_key,
            self.address,
            self.expiry.format(TIMESTAMP_FORMAT)
        )
    }
}

#[derive(Debug, ThisError)]
pub(crate) enum StoreError {
    #[error("failed to write lease file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed lease file line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// Parse the lease file contents, dropping records that expired before `now`.
///
/// # Errors
///
/// Returns [`StoreError::Malformed`] on a wrong field count, an invalid address or an invalid timestamp.
pub(crate) fn parse_records(content: &str, now: DateTime<Utc>) -> Result<Vec<LeaseRecord>, StoreError> {
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let malformed = |reason: String| StoreError::Malformed {
            line: line_no,
            reason,
        };

        let fields: Vec<&str> = line.split_whitespace().collect();
        let &[owner, public_key, address, expiry] = fields.as_slice() else {
            if fields.is_empty() {
                continue;
            }
            return Err(malformed(format!("expected 4 fields, got {}", fields.len())));
        };

        let address: Ipv4Addr = address
            .parse()
            .map_err(|e| malformed(format!("invalid address {address:?}: {e}")))?;
        let expiry = NaiveDateTime::parse_from_str(expiry, TIMESTAMP_FORMAT)
            .map_err(|e| malformed(format!("invalid expiry {expiry:?}: {e}")))?
            .and_utc();

        let record = LeaseRecord {
            owner: owner.to_string(),
            public_key: public_key.to_string(),
            address,
            expiry,
        };
        if record.is_active(now) {
            records.push(record);
        } else {
            debug!(owner = %record.owner, "Dropping expired lease on load");
        }
    }
    Ok(records)
}

/// Render the records that are still active at `now`.
pub(crate) fn render_records<'a, I>(records: I, now: DateTime<Utc>) -> String
where
    I: IntoIterator<Item = &'a LeaseRecord>,
{
    let mut out = String::new();
    for record in records.into_iter().filter(|r| r.is_active(now)) {
        out.push_str(&record.to_line());
        out.push('\n');
    }
    out
}

/// The lease file on disk.
#[derive(Debug, Clone)]
pub(crate) struct LeaseFile {
    path: PathBuf,
}

impl LeaseFile {
    pub(crate) const fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load active records. A file that cannot be read counts as holding no leases.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Malformed`] if the file content cannot be parsed.
    pub(crate) async fn load(&self, now: DateTime<Utc>) -> Result<Vec<LeaseRecord>, StoreError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => parse_records(&content, now),
            Err(e) => {
                warn!(path = %self.path.display(), "Lease file unreadable, starting without leases: {e}");
                Ok(Vec::new())
            }
        }
    }

    /// Replace the file contents with the active records.
    ///
    /// The new content is written to a sibling file first and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory or file cannot be written.
    pub(crate) async fn save<'a, I>(&self, records: I, now: DateTime<Utc>) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = &'a LeaseRecord>,
    {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).await.map_err(io_err)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        fs::write(&tmp, render_records(records, now))
            .await
            .map_err(io_err)?;
        fs::rename(&tmp, &self.path).await.map_err(io_err)?;
        Ok(())
    }
}
