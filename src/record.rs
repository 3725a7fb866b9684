//! Sync records: small JSON markers whose ULID names a sync session.
//!
//! A record with `sync_complete = false` on either side marks an in-flight
//! or interrupted session; the evaluator diagnoses which. Two records belong
//! to the same session exactly when their ULIDs are equal.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};
use crate::fsutil;
use crate::rclone;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub ulid: Ulid,
    /// Redundant copy of the ULID's embedded time, kept for readability of
    /// the on-disk file; validated against the ULID on load.
    pub timestamp: DateTime<Utc>,
    pub sync_complete: bool,
    pub syncer_hostname: String,
}

impl SyncRecord {
    pub fn new(sync_complete: bool, syncer_hostname: Option<String>) -> SyncRecord {
        let ulid = Ulid::new();
        SyncRecord {
            timestamp: ulid_datetime(&ulid),
            ulid,
            sync_complete,
            syncer_hostname: syncer_hostname.unwrap_or_else(crate::hostname),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<SyncRecord> {
        let record: SyncRecord = serde_json::from_str(text)?;
        record.validate()?;
        Ok(record)
    }

    fn validate(&self) -> Result<()> {
        if self.timestamp != ulid_datetime(&self.ulid) {
            return Err(Error::SyncState(format!(
                "sync record timestamp {} does not match its ULID's time {}",
                self.timestamp,
                ulid_datetime(&self.ulid)
            )));
        }
        Ok(())
    }

    /// Read a record from a local file. `None` if the file does not exist.
    pub fn read_local(path: &Path) -> Result<Option<SyncRecord>> {
        match fs::read_to_string(path) {
            Ok(text) => Ok(Some(SyncRecord::from_json(&text)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Write a record to a local file atomically.
    pub fn save_local(&self, path: &Path) -> Result<()> {
        fsutil::write_atomic(path, &self.to_json()?)
    }

    /// Read a record from a remote path. `None` if it does not exist.
    pub async fn read_remote(
        rclone_config: &Path,
        remote: &str,
        path: &Path,
    ) -> Result<Option<SyncRecord>> {
        match rclone::cat(rclone_config, remote, path).await? {
            Some(text) => Ok(Some(SyncRecord::from_json(&text)?)),
            None => Ok(None),
        }
    }

    /// Write a record to a remote path via a staged temp file.
    pub async fn save_remote(&self, rclone_config: &Path, remote: &str, path: &Path) -> Result<()> {
        rclone::write(rclone_config, remote, path, &self.to_json()?).await
    }
}

/// The UTC instant encoded in a ULID, at millisecond precision.
pub fn ulid_datetime(ulid: &Ulid) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ulid.timestamp_ms() as i64)
        .unwrap_or_else(|| DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let rec = SyncRecord::new(true, Some("hostA".into()));
        let json = rec.to_json().unwrap();
        let back = SyncRecord::from_json(&json).unwrap();
        assert_eq!(rec, back);
        assert!(back.sync_complete);
        assert_eq!(back.syncer_hostname, "hostA");
    }

    #[test]
    fn rejects_tampered_timestamp() {
        let rec = SyncRecord::new(false, Some("hostA".into()));
        let mut value: serde_json::Value = serde_json::from_str(&rec.to_json().unwrap()).unwrap();
        value["timestamp"] = serde_json::json!("2001-01-01T00:00:00Z");
        let err = SyncRecord::from_json(&value.to_string()).unwrap_err();
        assert!(matches!(err, Error::SyncState(_)));
    }

    #[test]
    fn local_read_of_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SyncRecord::read_local(&dir.path().join("nope.rec"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn local_save_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records/data.rec");
        let rec = SyncRecord::new(true, Some("hostB".into()));
        rec.save_local(&path).unwrap();
        let back = SyncRecord::read_local(&path).unwrap().unwrap();
        assert_eq!(rec.ulid, back.ulid);
        assert_eq!(rec.timestamp, back.timestamp);
    }
}
