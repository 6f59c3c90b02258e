//! Object-store key conventions.
//!
//! ```text
//! uploads/{owner_id}/{job_id}/{filename}     original upload (upload bucket)
//! output/{owner_id}/{job_id}/{file_name}     stage artifacts (output bucket)
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::JobId;

pub const UPLOAD_KEY_PREFIX: &str = "uploads";
pub const OUTPUT_KEY_PREFIX: &str = "output";

/// Maximum length of an uploaded filename.
const MAX_FILENAME_LEN: usize = 255;

/// A bucket + key pair addressing one stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub bucket: String,
    pub key: String,
}

impl ObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl std::fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "s3://{}/{}", self.bucket, self.key)
    }
}

pub fn upload_prefix(owner_id: &str, job_id: JobId) -> String {
    format!("{UPLOAD_KEY_PREFIX}/{owner_id}/{job_id}/")
}

pub fn upload_key(owner_id: &str, job_id: JobId, filename: &str) -> String {
    format!("{}{filename}", upload_prefix(owner_id, job_id))
}

pub fn output_prefix(owner_id: &str, job_id: JobId) -> String {
    format!("{OUTPUT_KEY_PREFIX}/{owner_id}/{job_id}/")
}

pub fn artifact_key(owner_id: &str, job_id: JobId, file_name: &str) -> String {
    format!("{}{file_name}", output_prefix(owner_id, job_id))
}

/// Validate an uploaded filename before it becomes part of an object key.
///
/// Rules:
/// - Must not be empty or exceed `MAX_FILENAME_LEN` bytes.
/// - Must not contain `/` or `\` (the filename is a single key segment).
/// - Must not be `.` or `..`.
pub fn validate_filename(filename: &str) -> Result<(), CoreError> {
    if filename.trim().is_empty() {
        return Err(CoreError::Validation("filename is required".into()));
    }
    if filename.len() > MAX_FILENAME_LEN {
        return Err(CoreError::Validation(format!(
            "filename must not exceed {MAX_FILENAME_LEN} characters"
        )));
    }
    if filename.contains('/') || filename.contains('\\') {
        return Err(CoreError::Validation(
            "filename must not contain path separators".into(),
        ));
    }
    if filename == "." || filename == ".." {
        return Err(CoreError::Validation("filename is not valid".into()));
    }
    Ok(())
}

/// Validate an owner id before it becomes a key segment.
///
/// The owner id scopes every key, so it must be a single segment: no `/`,
/// no `\`, no control characters and not `.` or `..`.
pub fn validate_owner_id(owner_id: &str) -> Result<(), CoreError> {
    if owner_id.trim().is_empty() {
        return Err(CoreError::Validation("ownerId must not be empty".into()));
    }
    if owner_id.contains(['/', '\\']) || owner_id.chars().any(char::is_control) {
        return Err(CoreError::Validation(
            "ownerId must not contain path separators or control characters".into(),
        ));
    }
    if owner_id == "." || owner_id == ".." {
        return Err(CoreError::Validation("ownerId is not valid".into()));
    }
    Ok(())
}
