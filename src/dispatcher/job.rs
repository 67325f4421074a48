use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{DispatchError, Result};

/// Key holding the identifier in the wire encoding. A field with this name
/// is never encoded.
pub const ID_KEY: &str = "id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Waiting,
    Running,
    Committed,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Waiting => write!(f, "waiting"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Committed => write!(f, "committed"),
        }
    }
}

/// A unit of work: an identifier and a flat string payload.
///
/// Equality and hashing only consider the identifier. The lifecycle
/// timestamps are dispatcher bookkeeping and never leave the process.
#[derive(Debug, Clone)]
pub struct Job {
    id: u64,
    fields: BTreeMap<String, String>,
    enqueued_at: Option<DateTime<Utc>>,
    dequeued_at: Option<DateTime<Utc>>,
    committed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: u64) -> Self {
        Self::with_fields(id, BTreeMap::new())
    }

    pub fn with_fields(id: u64, fields: BTreeMap<String, String>) -> Self {
        Self {
            id,
            fields,
            enqueued_at: None,
            dequeued_at: None,
            committed_at: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Set a field, overwriting any previous value. Returns the old value.
    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.fields.insert(key.into(), value.into())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.fields
    }

    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.enqueued_at
    }

    pub fn dequeued_at(&self) -> Option<DateTime<Utc>> {
        self.dequeued_at
    }

    pub fn committed_at(&self) -> Option<DateTime<Utc>> {
        self.committed_at
    }

    /// Lifecycle state as recorded by the timestamps.
    pub fn status(&self) -> JobStatus {
        if self.committed_at.is_some() {
            JobStatus::Committed
        } else if self.dequeued_at.is_some() {
            JobStatus::Running
        } else {
            JobStatus::Waiting
        }
    }

    /// Merge every field of `other` into this job, overwriting on conflict.
    pub(crate) fn merge_fields(&mut self, other: &Job) {
        for (k, v) in &other.fields {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    pub(crate) fn mark_enqueued(&mut self, at: DateTime<Utc>) {
        self.enqueued_at.get_or_insert(at);
    }

    pub(crate) fn mark_dequeued(&mut self, at: DateTime<Utc>) {
        self.dequeued_at.get_or_insert(at);
    }

    pub(crate) fn mark_committed(&mut self, at: DateTime<Utc>) {
        self.committed_at.get_or_insert(at);
    }

    /// Decode a job from its flat JSON representation.
    pub fn from_json(buf: &str) -> Result<Self> {
        serde_json::from_str(buf).map_err(|e| DispatchError::MalformedPayload(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DispatchError::MalformedPayload(e.to_string()))
    }
}

impl PartialEq for Job {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Job {}

impl Hash for Job {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job({}, {{", self.id)?;
        for (i, (k, v)) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", k, v)?;
        }
        write!(f, "}})")
    }
}

impl Serialize for Job {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry(ID_KEY, &self.id)?;
        for (k, v) in self.fields.iter().filter(|(k, _)| k.as_str() != ID_KEY) {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

#[derive(Deserialize)]
struct WireJob {
    id: u64,
    #[serde(flatten)]
    fields: BTreeMap<String, String>,
}

impl<'de> Deserialize<'de> for Job {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireJob::deserialize(deserializer)?;
        Ok(Job::with_fields(wire.id, wire.fields))
    }
}
