//! Canonical store keys.
//!
//! The same bytes key both the table cache and redb, so these formats must
//! never change between releases.

/// Separator between the components of a composite key
pub const KEY_SEPARATOR: char = '/';

#[must_use]
pub fn volume_key(volume: &str) -> String {
    format!("{KEY_SEPARATOR}{volume}")
}

#[must_use]
pub fn bucket_key(volume: &str, bucket: &str) -> String {
    format!("{KEY_SEPARATOR}{volume}{KEY_SEPARATOR}{bucket}")
}

#[must_use]
pub fn object_key(volume: &str, bucket: &str, key: &str) -> String {
    format!("{KEY_SEPARATOR}{volume}{KEY_SEPARATOR}{bucket}{KEY_SEPARATOR}{key}")
}

/// Key shared by the open-key and multipart-info rows of one upload
#[must_use]
pub fn multipart_key(volume: &str, bucket: &str, key: &str, upload_id: &str) -> String {
    format!(
        "{KEY_SEPARATOR}{volume}{KEY_SEPARATOR}{bucket}{KEY_SEPARATOR}{key}{KEY_SEPARATOR}{upload_id}"
    )
}

/// Prefix matching every bucket row of a volume
#[must_use]
pub fn bucket_prefix(volume: &str) -> String {
    format!("{KEY_SEPARATOR}{volume}{KEY_SEPARATOR}")
}

/// Prefix matching every key row of a bucket
#[must_use]
pub fn object_prefix(volume: &str, bucket: &str) -> String {
    format!("{KEY_SEPARATOR}{volume}{KEY_SEPARATOR}{bucket}{KEY_SEPARATOR}")
}
