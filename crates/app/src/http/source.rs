use async_trait::async_trait;
use eventsync_sync::{ByteStream, SourceConnector, SourceError, SourceRecord};
use futures::{StreamExt, TryStreamExt};
use reqwest::{Method, Response, StatusCode, Url};
use serde_json::Value;

use super::{list_items, ApiClient};

/// Read-only legacy API.
///
/// Child lists that do not exist come back as empty; only an unknown
/// event is reported as [`SourceError::NotFound`].
#[derive(Debug, Clone)]
pub struct HttpSource {
    api: ApiClient,
}

fn transport(err: reqwest::Error) -> SourceError {
    SourceError::Transport(err.to_string())
}

async fn status_error(response: Response) -> SourceError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    SourceError::Status {
        status,
        message: message.trim().chars().take(300).collect(),
    }
}

impl HttpSource {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    /// Fetches a record list; `None` when the endpoint answers 404.
    async fn fetch_list(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<Option<Vec<SourceRecord>>, SourceError> {
        let response = self
            .api
            .request(Method::GET, url)
            .query(query)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let items = list_items(body)
            .ok_or_else(|| SourceError::Decode("list response is not a list".into()))?;
        let total = items.len();
        let records: Vec<SourceRecord> = items.into_iter().filter_map(SourceRecord::from_value).collect();
        if records.len() < total {
            tracing::warn!(
                dropped = total - records.len(),
                "ignoring list entries that are not objects"
            );
        }
        Ok(Some(records))
    }

    async fn child_list(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Vec<SourceRecord>, SourceError> {
        Ok(self
            .fetch_list(self.api.url(segments), query)
            .await?
            .unwrap_or_default())
    }
}

#[async_trait]
impl SourceConnector for HttpSource {
    async fn get_rooms(&self, event: &str) -> Result<Vec<SourceRecord>, SourceError> {
        self.fetch_list(self.api.url(&["events", event, "rooms"]), &[])
            .await?
            .ok_or_else(|| SourceError::NotFound(event.to_string()))
    }

    async fn get_sessions(&self, event: &str, room_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        self.child_list(&["events", event, "rooms", room_ref, "sessions"], &[])
            .await
    }

    async fn get_sub_sessions(&self, session_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        self.child_list(&["sessions", session_ref, "sub-sessions"], &[])
            .await
    }

    async fn get_users(&self, event: &str, room_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        self.child_list(&["events", event, "rooms", room_ref, "users"], &[])
            .await
    }

    async fn get_files(&self, event: &str, scope_ref: &str) -> Result<Vec<SourceRecord>, SourceError> {
        self.child_list(&["events", event, "files"], &[("scope", scope_ref)])
            .await
    }

    async fn download_file(&self, file_ref: &str) -> Result<ByteStream, SourceError> {
        let url = self.api.url(&["files", file_ref, "content"]);
        let response = self
            .api
            .request(Method::GET, url)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }
        Ok(response.bytes_stream().map_err(transport).boxed())
    }
}
