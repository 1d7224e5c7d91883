//! RemoteClient (§4.2): the capability boundary over the external
//! document+storage service. Grounded on `continuum-core`'s
//! `AnthropicAdapter` — a `reqwest::Client` field with a bounded timeout,
//! wrapped behind a trait so tests substitute an in-memory fake (§9
//! "Polymorphism").

use crate::error::RemoteError;
use crate::models::{CellUpdate, SheetInfo};
use async_trait::async_trait;
use std::time::Duration;

const CALL_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Grants read access to `folder_id` for `email`. Must not trigger a
    /// user-visible notification (§4.2).
    async fn grant_read(&self, folder_id: &str, email: &str) -> Result<String, RemoteError>;

    async fn list_sheets(&self, document_id: &str) -> Result<Vec<SheetInfo>, RemoteError>;

    /// Atomic from the engine's perspective: all updates accepted or the
    /// whole call fails (§4.2).
    async fn batch_write_cells(
        &self,
        document_id: &str,
        sheet_title: &str,
        updates: &[CellUpdate],
    ) -> Result<(), RemoteError>;
}

/// Opaque credential capability, loaded once and attached to every request.
/// The spec treats credential acquisition as opaque (§1 non-goals); this
/// just carries whatever bearer token the caller already obtained.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub bearer_token: String,
}

impl Credentials {
    pub fn load(path: &str) -> std::io::Result<Self> {
        #[derive(serde::Deserialize)]
        struct Raw {
            access_token: String,
        }
        let content = std::fs::read_to_string(path)?;
        let raw: Raw = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self {
            bearer_token: raw.access_token,
        })
    }
}

/// Production `RemoteClient` backed by the document/storage service's REST
/// API. Stateless beyond the attached credential (§4.2).
pub struct HttpRemoteClient {
    client: reqwest::Client,
    credentials: Credentials,
}

impl HttpRemoteClient {
    pub fn new(credentials: Credentials) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(CALL_TIMEOUT_SECS))
            .build()
            .expect("failed to build HTTP client");

        Self {
            client,
            credentials,
        }
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn grant_read(&self, folder_id: &str, email: &str) -> Result<String, RemoteError> {
        let url = format!(
            "https://www.googleapis.com/drive/v3/files/{folder_id}/permissions?sendNotificationEmail=false"
        );
        let body = serde_json::json!({
            "role": "reader",
            "type": "user",
            "emailAddress": email,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.credentials.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(RemoteError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status(), &email, &response_text(response).await));
        }

        #[derive(serde::Deserialize)]
        struct PermissionResponse {
            id: String,
        }

        let parsed: PermissionResponse = response
            .json()
            .await
            .map_err(RemoteError::from_reqwest)?;
        Ok(parsed.id)
    }

    async fn list_sheets(&self, document_id: &str) -> Result<Vec<SheetInfo>, RemoteError> {
        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{document_id}?fields=sheets.properties"
        );

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.credentials.bearer_token)
            .send()
            .await
            .map_err(RemoteError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status(), document_id, &response_text(response).await));
        }

        #[derive(serde::Deserialize)]
        struct Properties {
            title: String,
            #[serde(rename = "sheetId")]
            sheet_id: i64,
        }
        #[derive(serde::Deserialize)]
        struct SheetEntry {
            properties: Properties,
        }
        #[derive(serde::Deserialize)]
        struct SpreadsheetResponse {
            sheets: Vec<SheetEntry>,
        }

        let parsed: SpreadsheetResponse = response
            .json()
            .await
            .map_err(RemoteError::from_reqwest)?;

        Ok(parsed
            .sheets
            .into_iter()
            .map(|s| SheetInfo {
                title: s.properties.title,
                sheet_id: s.properties.sheet_id,
            })
            .collect())
    }

    async fn batch_write_cells(
        &self,
        document_id: &str,
        _sheet_title: &str,
        updates: &[CellUpdate],
    ) -> Result<(), RemoteError> {
        let url = format!(
            "https://sheets.googleapis.com/v4/spreadsheets/{document_id}/values:batchUpdate"
        );

        let data: Vec<_> = updates
            .iter()
            .map(|u| {
                serde_json::json!({
                    "range": u.range,
                    "values": [[u.value]],
                })
            })
            .collect();

        let body = serde_json::json!({
            "valueInputOption": "RAW",
            "data": data,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.credentials.bearer_token)
            .json(&body)
            .send()
            .await
            .map_err(RemoteError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(classify_status(response.status(), document_id, &response_text(response).await));
        }

        Ok(())
    }
}

fn classify_status(status: reqwest::StatusCode, context: &str, body: &str) -> RemoteError {
    match status.as_u16() {
        403 => RemoteError::PermissionDenied(format!("{context}: {body}")),
        404 => RemoteError::NotFound(format!("{context}: {body}")),
        429 => RemoteError::RateLimited(format!("{context}: {body}")),
        400 => RemoteError::EmailInvalid(format!("{context}: {body}")),
        _ => RemoteError::Unknown(format!("{context} ({status}): {body}")),
    }
}

async fn response_text(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string())
}

#[cfg(test)]
pub mod fake {
    //! In-memory fake for Engine/WorkerPool tests (§9 "Polymorphism").
    use super::*;
    use std::sync::Mutex;

    pub struct FakeRemoteClient {
        pub grant_outcomes: Mutex<std::collections::HashMap<String, Result<String, RemoteError>>>,
        pub sheets: Vec<SheetInfo>,
        pub batch_should_fail: bool,
        pub grants_called: Mutex<Vec<(String, String)>>,
        pub batch_calls: Mutex<Vec<Vec<CellUpdate>>>,
    }

    impl FakeRemoteClient {
        pub fn new() -> Self {
            Self {
                grant_outcomes: Mutex::new(std::collections::HashMap::new()),
                sheets: vec![SheetInfo {
                    title: "Sheet1".to_string(),
                    sheet_id: 0,
                }],
                batch_should_fail: false,
                grants_called: Mutex::new(Vec::new()),
                batch_calls: Mutex::new(Vec::new()),
            }
        }

        pub fn with_outcome(self, email: &str, outcome: Result<String, RemoteError>) -> Self {
            self.grant_outcomes
                .lock()
                .unwrap()
                .insert(email.to_string(), outcome);
            self
        }
    }

    #[async_trait]
    impl RemoteClient for FakeRemoteClient {
        async fn grant_read(&self, folder_id: &str, email: &str) -> Result<String, RemoteError> {
            self.grants_called
                .lock()
                .unwrap()
                .push((folder_id.to_string(), email.to_string()));

            match self.grant_outcomes.lock().unwrap().get(email) {
                Some(outcome) => outcome.clone(),
                None => Ok(format!("perm-{email}")),
            }
        }

        async fn list_sheets(&self, _document_id: &str) -> Result<Vec<SheetInfo>, RemoteError> {
            Ok(self.sheets.clone())
        }

        async fn batch_write_cells(
            &self,
            _document_id: &str,
            _sheet_title: &str,
            updates: &[CellUpdate],
        ) -> Result<(), RemoteError> {
            self.batch_calls.lock().unwrap().push(updates.to_vec());
            if self.batch_should_fail {
                Err(RemoteError::Unknown("simulated batch failure".to_string()))
            } else {
                Ok(())
            }
        }
    }
}
