//! Durable id → identity-record map.
//!
//! Every mutation is persisted before it returns. If the write fails the
//! in-memory change is rolled back, so memory and disk never disagree about
//! what was committed.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::types::{is_valid_name, Descriptor, IdentityRecord};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("template store {location} is corrupt: {reason}")]
    Corrupt { location: String, reason: String },
    #[error("failed to write template store {location}: {source}")]
    WriteFailed {
        location: String,
        #[source]
        source: io::Error,
    },
    #[error("no identity record with id {0}")]
    RecordNotFound(String),
    #[error("invalid name {0:?}: must be 1 to 8 characters")]
    InvalidName(String),
    #[error("descriptor must not be empty")]
    EmptyDescriptor,
    #[error("descriptor has {actual} values, stored templates have {expected}")]
    DescriptorLength { expected: usize, actual: usize },
}

impl StoreError {
    /// Short text for the board display.
    pub fn user_message(&self) -> &'static str {
        match self {
            StoreError::Corrupt { .. } => "Database damaged, starting empty",
            StoreError::WriteFailed { .. } => "Save failed",
            StoreError::RecordNotFound(_) => "User not found",
            StoreError::InvalidName(_) => "Invalid name",
            StoreError::EmptyDescriptor => "No face data",
            StoreError::DescriptorLength { .. } => "Face data mismatch",
        }
    }
}

/// Raw byte storage behind a [`TemplateStore`].
pub trait StoreBackend {
    /// Current contents, or `None` if nothing has been written yet.
    fn read(&self) -> io::Result<Option<Vec<u8>>>;
    /// Replace the contents. Must not leave a partial file behind on failure.
    fn write(&mut self, contents: &[u8]) -> io::Result<()>;
    /// Human-readable location for logs and errors.
    fn location(&self) -> String;
}

/// JSON file on the local filesystem, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StoreBackend for JsonFile {
    fn read(&self) -> io::Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn write(&mut self, contents: &[u8]) -> io::Result<()> {
        let parent = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let mut tmp = NamedTempFile::new_in(parent)?;
        tmp.write_all(contents)?;
        tmp.write_all(b"\n")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.as_file().set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        tmp.as_file().sync_all()?;

        // The rename is the commit point; nothing after it may fail.
        tmp.persist(&self.path).map_err(|err| err.error)?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

/// Borrowed view of one stored record together with its id.
#[derive(Debug, Clone, Copy)]
pub struct StoredRecord<'a> {
    pub id: &'a str,
    pub record: &'a IdentityRecord,
}

/// What [`TemplateStore::load`] found.
#[derive(Debug)]
pub enum LoadStatus {
    /// Nothing persisted yet; the store starts empty.
    Missing,
    /// Records loaded. `dropped` counts entries skipped for breaking the
    /// record invariants.
    Loaded { records: usize, dropped: usize },
    /// Unreadable or unparsable contents; the store starts empty.
    Corrupt(StoreError),
}

/// Insertion-ordered map from user id to [`IdentityRecord`].
///
/// Only the operations below touch the records, which keeps the
/// persist-or-roll-back rule in one place.
pub struct TemplateStore<B = JsonFile> {
    backend: B,
    records: Vec<(String, IdentityRecord)>,
    last_id: i64,
}

impl<B: StoreBackend> TemplateStore<B> {
    /// Load the store from `backend`. Never fails: unreadable or corrupt
    /// contents yield an empty store and a [`LoadStatus::Corrupt`].
    pub fn load(backend: B) -> (Self, LoadStatus) {
        let mut store = Self {
            backend,
            records: Vec::new(),
            last_id: 0,
        };

        let status = match store.backend.read() {
            Ok(None) => LoadStatus::Missing,
            Ok(Some(bytes)) => match parse_records(&bytes) {
                Ok((records, dropped)) => {
                    store.records = records;
                    LoadStatus::Loaded {
                        records: store.records.len(),
                        dropped,
                    }
                }
                Err(reason) => LoadStatus::Corrupt(StoreError::Corrupt {
                    location: store.backend.location(),
                    reason,
                }),
            },
            Err(err) => LoadStatus::Corrupt(StoreError::Corrupt {
                location: store.backend.location(),
                reason: err.to_string(),
            }),
        };

        store.last_id = store
            .records
            .iter()
            .filter_map(|(id, _)| id.parse::<i64>().ok())
            .max()
            .unwrap_or(0);

        match &status {
            LoadStatus::Missing => {
                tracing::info!(location = %store.backend.location(), "no template store yet, starting empty");
            }
            LoadStatus::Loaded { records, dropped } => {
                tracing::info!(location = %store.backend.location(), records, dropped, "template store loaded");
            }
            LoadStatus::Corrupt(err) => {
                tracing::warn!(error = %err, "template store unusable, starting empty");
            }
        }

        (store, status)
    }

    /// Create a record and persist it. Returns the new id.
    pub fn add(
        &mut self,
        name: &str,
        descriptor: Descriptor,
        sample_count: u32,
    ) -> Result<String, StoreError> {
        if !is_valid_name(name) {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        if descriptor.is_empty() {
            return Err(StoreError::EmptyDescriptor);
        }
        if let Some(expected) = self.descriptor_len(None) {
            if expected != descriptor.len() {
                return Err(StoreError::DescriptorLength {
                    expected,
                    actual: descriptor.len(),
                });
            }
        }

        let id = self.next_id();
        assert!(!self.contains(&id), "generated id {id} collides with an existing record");

        self.records.push((
            id.clone(),
            IdentityRecord {
                name: name.to_string(),
                descriptor,
                registered_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                sample_count: sample_count.max(1),
                extra: Map::new(),
            },
        ));

        if let Err(err) = self.persist() {
            self.records.pop();
            return Err(err);
        }

        tracing::info!(id = %id, name, sample_count, "identity added");
        Ok(id)
    }

    /// Apply `mutator` to a record and persist. The record is restored if
    /// the result breaks the record invariants or cannot be written.
    pub fn update<F>(&mut self, id: &str, mutator: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut IdentityRecord),
    {
        let index = self.index_of(id)?;
        let previous = self.records[index].1.clone();
        mutator(&mut self.records[index].1);

        let record = &self.records[index].1;
        let invalid = if !is_valid_name(&record.name) {
            Some(StoreError::InvalidName(record.name.clone()))
        } else if record.descriptor.is_empty() {
            Some(StoreError::EmptyDescriptor)
        } else if record.descriptor.len() != previous.descriptor.len() {
            self.descriptor_len(Some(index))
                .filter(|expected| *expected != record.descriptor.len())
                .map(|expected| StoreError::DescriptorLength {
                    expected,
                    actual: record.descriptor.len(),
                })
        } else {
            None
        };
        if let Some(err) = invalid {
            self.records[index].1 = previous;
            return Err(err);
        }
        if self.records[index].1.sample_count == 0 {
            self.records[index].1.sample_count = 1;
        }

        if let Err(err) = self.persist() {
            self.records[index].1 = previous;
            return Err(err);
        }

        tracing::info!(id, "identity updated");
        Ok(())
    }

    pub fn rename(&mut self, id: &str, name: &str) -> Result<(), StoreError> {
        self.update(id, |record| record.name = name.to_string())
    }

    /// Replace the descriptor after re-enrollment.
    pub fn replace_descriptor(
        &mut self,
        id: &str,
        descriptor: Descriptor,
        sample_count: u32,
    ) -> Result<(), StoreError> {
        self.update(id, |record| {
            record.descriptor = descriptor;
            record.sample_count = sample_count;
        })
    }

    /// Remove a record and persist. Returns the removed record.
    pub fn delete(&mut self, id: &str) -> Result<IdentityRecord, StoreError> {
        let index = self.index_of(id)?;
        let removed = self.records.remove(index);

        if let Err(err) = self.persist() {
            self.records.insert(index, removed);
            return Err(err);
        }

        tracing::info!(id, name = %removed.1.name, "identity deleted");
        Ok(removed.1)
    }

    /// Remove every record and persist the empty store.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        let previous = std::mem::take(&mut self.records);

        if let Err(err) = self.persist() {
            self.records = previous;
            return Err(err);
        }

        tracing::info!(removed = previous.len(), "template store reset");
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&IdentityRecord> {
        self.records
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, record)| record)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Records in insertion order.
    pub fn list(&self) -> impl ExactSizeIterator<Item = StoredRecord<'_>> + '_ {
        self.records
            .iter()
            .map(|(id, record)| StoredRecord { id: id.as_str(), record })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn index_of(&self, id: &str) -> Result<usize, StoreError> {
        self.records
            .iter()
            .position(|(key, _)| key == id)
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    /// Descriptor length of the stored templates, ignoring `except`.
    fn descriptor_len(&self, except: Option<usize>) -> Option<usize> {
        self.records
            .iter()
            .enumerate()
            .find(|(index, _)| Some(*index) != except)
            .map(|(_, (_, record))| record.descriptor.len())
    }

    /// Millisecond timestamp, strictly increasing within the process and
    /// bumped past any id already in the store.
    fn next_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        let mut candidate = self.last_id.checked_add(1).map_or(now, |next| now.max(next));
        while self.contains(&candidate.to_string()) {
            candidate = candidate.checked_add(1).unwrap_or(0);
        }
        self.last_id = candidate;
        candidate.to_string()
    }

    fn persist(&mut self) -> Result<(), StoreError> {
        let location = self.backend.location();
        let write_failed = |source: io::Error| {
            tracing::error!(location = %location, error = %source, "template store write failed");
            StoreError::WriteFailed {
                location: location.clone(),
                source,
            }
        };

        let bytes = serialize_records(&self.records).map_err(|err| write_failed(err.into()))?;
        self.backend.write(&bytes).map_err(write_failed)
    }
}

fn serialize_records(records: &[(String, IdentityRecord)]) -> serde_json::Result<Vec<u8>> {
    let mut map = Map::with_capacity(records.len());
    for (id, record) in records {
        map.insert(id.clone(), serde_json::to_value(record)?);
    }
    serde_json::to_vec_pretty(&Value::Object(map))
}

/// Parse persisted contents, keeping file order. Entries that do not
/// deserialize or break the record invariants are dropped and counted.
fn parse_records(bytes: &[u8]) -> Result<(Vec<(String, IdentityRecord)>, usize), String> {
    let map: Map<String, Value> =
        serde_json::from_slice(bytes).map_err(|err| format!("invalid JSON: {err}"))?;

    let mut records = Vec::with_capacity(map.len());
    let mut dropped = 0;

    for (id, value) in map {
        let mut record: IdentityRecord = match serde_json::from_value(value) {
            Ok(record) => record,
            Err(err) => {
                tracing::warn!(id = %id, error = %err, "dropping unreadable identity record");
                dropped += 1;
                continue;
            }
        };

        if record.descriptor.is_empty() || !is_valid_name(&record.name) {
            tracing::warn!(id = %id, name = %record.name, "dropping invalid identity record");
            dropped += 1;
            continue;
        }
        record.sample_count = record.sample_count.max(1);
        records.push((id, record));
    }

    Ok((records, dropped))
}
