//! Outcome of applying one committed command.

use crate::request::CommandKind;
use crate::store::BatchOp;
use crate::tables::Table;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result code returned to the submitter of a command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    /// The command already took effect at an earlier delivery
    Replay,
    VolumeNotFound,
    VolumeAlreadyExists,
    VolumeNotEmpty,
    BucketNotFound,
    BucketAlreadyExists,
    BucketNotEmpty,
    KeyNotFound,
    KeyAlreadyExists,
    InvalidVolumeName,
    InvalidBucketName,
    InvalidKeyName,
    NoSuchMultipartUpload,
}

impl Status {
    /// `Ok` and `Replay` both mean the command's effect is in place
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::Replay)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Replay => "REPLAY",
            Self::VolumeNotFound => "VOLUME_NOT_FOUND",
            Self::VolumeAlreadyExists => "VOLUME_ALREADY_EXISTS",
            Self::VolumeNotEmpty => "VOLUME_NOT_EMPTY",
            Self::BucketNotFound => "BUCKET_NOT_FOUND",
            Self::BucketAlreadyExists => "BUCKET_ALREADY_EXISTS",
            Self::BucketNotEmpty => "BUCKET_NOT_EMPTY",
            Self::KeyNotFound => "KEY_NOT_FOUND",
            Self::KeyAlreadyExists => "KEY_ALREADY_EXISTS",
            Self::InvalidVolumeName => "INVALID_VOLUME_NAME",
            Self::InvalidBucketName => "INVALID_BUCKET_NAME",
            Self::InvalidKeyName => "INVALID_KEY_NAME",
            Self::NoSuchMultipartUpload => "NO_SUCH_MULTIPART_UPLOAD",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row change produced by a successful command. `None` deletes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub table: Table,
    pub key: String,
    pub value: Option<Vec<u8>>,
}

impl From<&Mutation> for BatchOp {
    fn from(m: &Mutation) -> Self {
        Self {
            table: m.table,
            key: m.key.clone(),
            value: m.value.clone(),
        }
    }
}

/// Cache entry the flush loop may drop once this response is durable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCleanup {
    pub table: Table,
    pub key: String,
    pub index: u64,
}

/// Command-specific data handed back to the submitter.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseBody {
    #[default]
    Empty,
    MultipartUpload { upload_id: String },
    /// Replay of a rename that only had to remove the stale source key
    RenameSourceCleanup,
}

/// Outcome of applying the command at `index`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub index: u64,
    pub kind: CommandKind,
    pub status: Status,
    /// Store changes, in the order they were made to the cache
    pub mutations: Vec<Mutation>,
    /// Every cache entry this command created or raised
    pub cleanup: Vec<CacheCleanup>,
    pub body: ResponseBody,
}

impl Response {
    /// Start a response; mutations are recorded through the builder methods
    #[must_use]
    pub const fn new(index: u64, kind: CommandKind) -> Self {
        Self {
            index,
            kind,
            status: Status::Ok,
            mutations: Vec::new(),
            cleanup: Vec::new(),
            body: ResponseBody::Empty,
        }
    }

    /// Record an upsert of `key`
    pub fn put(&mut self, table: Table, key: &str, value: Vec<u8>) {
        self.mutations.push(Mutation {
            table,
            key: key.to_string(),
            value: Some(value),
        });
        self.track(table, key);
    }

    /// Record a delete of `key`
    pub fn delete(&mut self, table: Table, key: &str) {
        self.mutations.push(Mutation {
            table,
            key: key.to_string(),
            value: None,
        });
        self.track(table, key);
    }

    /// Record that `key` was observed without a business change
    pub fn track(&mut self, table: Table, key: &str) {
        let already = self
            .cleanup
            .iter()
            .any(|c| c.table == table && c.key == key);
        if !already {
            self.cleanup.push(CacheCleanup {
                table,
                key: key.to_string(),
                index: self.index,
            });
        }
    }

    /// Turn this response into a failure, discarding any recorded mutation
    #[must_use]
    pub fn fail(mut self, status: Status) -> Self {
        debug_assert!(status != Status::Ok);
        self.status = status;
        self.mutations.clear();
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: ResponseBody) -> Self {
        self.body = body;
        self
    }
}

/// What the replication layer receives for each applied index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    pub index: u64,
    pub status: Status,
    pub body: ResponseBody,
}

impl From<&Response> for ApplyOutcome {
    fn from(r: &Response) -> Self {
        Self {
            index: r.index,
            status: r.status,
            body: r.body.clone(),
        }
    }
}
