use async_trait::async_trait;
use eventsync_sync::{BlobError, BlobMetadata, BlobTransfer, ByteStream, StoredBlob};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::{Body, Method};

use super::ApiClient;

const FILE_NAME: HeaderName = HeaderName::from_static("x-file-name");
const FILE_SIZE: HeaderName = HeaderName::from_static("x-file-size");
const SOURCE_ID: HeaderName = HeaderName::from_static("x-source-system-id");

/// Blob store behind the target API's `uploads` endpoint.
///
/// The body is streamed straight from the source download; nothing is
/// buffered in memory.
#[derive(Debug, Clone)]
pub struct HttpBlobs {
    api: ApiClient,
}

impl HttpBlobs {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

/// Header-safe rendering: anything outside visible ASCII becomes `_`.
fn header_text(value: &str) -> HeaderValue {
    let safe: String = value
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .collect();
    HeaderValue::from_str(&safe).unwrap_or_else(|_| HeaderValue::from_static("_"))
}

fn metadata_headers(metadata: &BlobMetadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(FILE_NAME, header_text(&metadata.file_name));
    headers.insert(SOURCE_ID, header_text(&metadata.source_id));
    let mime = metadata
        .mime_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(CONTENT_TYPE, header_text(mime));
    if let Some(size) = metadata.size {
        headers.insert(FILE_SIZE, HeaderValue::from(size));
    }
    headers
}

#[async_trait]
impl BlobTransfer for HttpBlobs {
    async fn upload(&self, stream: ByteStream, metadata: BlobMetadata) -> Result<StoredBlob, BlobError> {
        let url = self.api.url(&["uploads"]);
        let response = self
            .api
            .request(Method::POST, url)
            .headers(metadata_headers(&metadata))
            .body(Body::wrap_stream(stream))
            .send()
            .await
            .map_err(|e| BlobError::Io(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BlobError::Rejected {
                status: status.as_u16(),
                message: message.trim().chars().take(300).collect(),
            });
        }
        let stored: StoredBlob = response
            .json()
            .await
            .map_err(|e| BlobError::Io(format!("unexpected upload response: {e}")))?;
        tracing::debug!(file = %metadata.file_name, blob = %stored.id, "uploaded");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_carry_metadata() {
        let headers = metadata_headers(&BlobMetadata {
            file_name: "Präsentation.pdf".into(),
            mime_type: None,
            size: Some(42),
            source_id: "f1".into(),
        });
        assert_eq!(headers[&FILE_NAME], "Pr_sentation.pdf");
        assert_eq!(headers[CONTENT_TYPE], "application/octet-stream");
        assert_eq!(headers[&FILE_SIZE], "42");
        assert_eq!(headers[&SOURCE_ID], "f1");
    }
}
