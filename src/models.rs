//! Data model: the immutable records and transient values the engine passes
//! between Matcher, WorkerPool, and Engine.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A row from the recipient cache. Read-only once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recipient {
    pub row: u32,
    pub email: String,
    pub name: String,
    #[serde(rename = "isShared", default)]
    pub is_shared: bool,
    #[serde(rename = "lastLog", default)]
    pub last_log: Option<String>,
}

impl Recipient {
    /// `"<name>|<email>"`, the de-dup key persisted in the processed-keys set.
    pub fn processed_key(&self) -> String {
        format!("{}|{}", self.name, self.email)
    }
}

/// Recipient-cache file on disk: `{timestamp, totalParticipants, participants}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientCache {
    pub timestamp: String,
    #[serde(rename = "totalParticipants")]
    pub total_participants: usize,
    pub participants: Vec<Recipient>,
}

/// Folder-map file on disk: display name -> folder id. Normalization
/// happens in `Matcher`, not here; this is the raw load.
pub type RawFolderMap = std::collections::HashMap<String, String>;

/// A unit of work dispatched to a worker.
#[derive(Debug, Clone)]
pub struct Task {
    /// Correlation id for tracing a single task across dispatch, the
    /// worker's `GrantRead` call, and its reported outcome.
    pub task_id: Uuid,
    pub folder_id: String,
    pub email: String,
    pub recipient: Recipient,
}

impl Task {
    pub fn new(folder_id: String, email: String, recipient: Recipient) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            folder_id,
            email,
            recipient,
        }
    }
}

/// Classification of a `RemoteClient::grant_read` failure (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    PermissionDenied,
    RateLimited,
    NotFound,
    EmailInvalid,
    Unknown,
}

/// Why a recipient produced no `GrantRead` call at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueType {
    NoFolder,
}

/// Outcome of processing one recipient, whether it came from a worker's
/// grant attempt or from the pre-dispatch `NO_FOLDER` filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResult {
    pub recipient: Recipient,
    pub folder_id: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<IssueType>,
    /// Stamped by the Engine on receipt, not by the worker.
    pub timestamp: String,
}

/// A pending write to the remote document's status/log cell pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellUpdate {
    /// e.g. `"Sheet1!I4"`.
    pub range: String,
    pub value: String,
}

impl CellUpdate {
    pub fn status(sheet: &str, row: u32, success: bool) -> Self {
        Self {
            range: format!("{sheet}!I{row}"),
            value: if success { "TRUE" } else { "FALSE" }.to_string(),
        }
    }

    pub fn log_success(sheet: &str, row: u32, timestamp: &str) -> Self {
        Self {
            range: format!("{sheet}!J{row}"),
            value: timestamp.to_string(),
        }
    }

    pub fn log_failed(sheet: &str, row: u32, timestamp: &str) -> Self {
        Self {
            range: format!("{sheet}!J{row}"),
            value: format!("Failed: {timestamp}"),
        }
    }

    pub fn log_no_folder(sheet: &str, row: u32, timestamp: &str) -> Self {
        Self {
            range: format!("{sheet}!J{row}"),
            value: format!("Issue: No folder found - {timestamp}"),
        }
    }
}

/// A resolved sheet from `RemoteClient::list_sheets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetInfo {
    pub title: String,
    #[serde(rename = "sheetId")]
    pub sheet_id: i64,
}
