use async_trait::async_trait;
use eventsync_sync::{
    EntityType, EventLocation, ParentIds, TargetConnector, TargetEntity, TargetError,
    TargetEvent, TargetPayload,
};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;

use super::{id_string, list_items, name_string, retry_after, unwrap_entity, ApiClient};

/// Target REST API.
#[derive(Debug, Clone)]
pub struct HttpTarget {
    api: ApiClient,
}

/// Collection segment for an entity type.
fn collection(kind: EntityType) -> &'static str {
    match kind {
        EntityType::Room => "rooms",
        EntityType::Session => "sessions",
        EntityType::SubSession => "sub-sessions",
        EntityType::User => "users",
        EntityType::ModeratorLink => "moderators",
        EntityType::FileAsset => "files",
    }
}

/// Collection of the parent that scopes an entity type.
fn parent_collection(kind: EntityType) -> &'static str {
    match kind {
        EntityType::Room | EntityType::User | EntityType::FileAsset => "events",
        EntityType::Session | EntityType::ModeratorLink => "rooms",
        EntityType::SubSession => "sessions",
    }
}

fn transport(err: reqwest::Error) -> TargetError {
    TargetError::Transport(err.to_string())
}

impl HttpTarget {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn scoped_url(&self, kind: EntityType, scope: &ParentIds) -> Result<reqwest::Url, TargetError> {
        let parent = scope.scope_for(kind).ok_or_else(|| TargetError::Status {
            status: 400,
            message: format!("{kind} request without a {} id", parent_collection(kind)),
        })?;
        Ok(self
            .api
            .url(&[parent_collection(kind), parent, collection(kind)]))
    }

    /// Sends a request and returns the decoded JSON body of a success.
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, TargetError> {
        let response = request.send().await.map_err(transport)?;
        let response = check(response).await?;
        let text = response.text().await.map_err(transport)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TargetError::Decode(e.to_string()))
    }

    fn entity(kind: EntityType, body: Value) -> Result<TargetEntity, TargetError> {
        let body = unwrap_entity(body);
        TargetEntity::from_json(kind, &body)
            .ok_or_else(|| TargetError::Decode(format!("{kind} response has no id")))
    }
}

/// Maps a non-success response to a [`TargetError`].
async fn check(response: Response) -> Result<Response, TargetError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry = retry_after(&response);
    let body = response.text().await.unwrap_or_default();
    Err(TargetError::from_response(status.as_u16(), &body, retry))
}

#[async_trait]
impl TargetConnector for HttpTarget {
    async fn get_event(&self, event_id: &str) -> Result<Option<TargetEvent>, TargetError> {
        let url = self.api.url(&["events", event_id]);
        let response = self
            .api
            .request(Method::GET, url)
            .send()
            .await
            .map_err(transport)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check(response).await?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| TargetError::Decode(e.to_string()))?;
        let body = unwrap_entity(body);
        Ok(id_string(&body).map(|id| TargetEvent {
            id,
            name: name_string(&body),
        }))
    }

    async fn get_event_locations(&self, event_id: &str) -> Result<Vec<EventLocation>, TargetError> {
        let url = self.api.url(&["events", event_id, "locations"]);
        let body = self.send(self.api.request(Method::GET, url)).await?;
        let items = list_items(body)
            .ok_or_else(|| TargetError::Decode("locations response is not a list".into()))?;
        Ok(items
            .iter()
            .filter_map(|item| {
                id_string(item).map(|id| EventLocation {
                    id,
                    name: name_string(item),
                })
            })
            .collect())
    }

    async fn create(
        &self,
        kind: EntityType,
        scope: &ParentIds,
        payload: &TargetPayload,
    ) -> Result<TargetEntity, TargetError> {
        let url = self.scoped_url(kind, scope)?;
        tracing::debug!(entity = %kind, %url, "create");
        let body = self
            .send(self.api.request(Method::POST, url).json(&payload.to_value()))
            .await?;
        Self::entity(kind, body)
    }

    async fn update(
        &self,
        kind: EntityType,
        id: &str,
        payload: &TargetPayload,
    ) -> Result<TargetEntity, TargetError> {
        let url = self.api.url(&[collection(kind), id]);
        tracing::debug!(entity = %kind, %url, "update");
        let body = self
            .send(self.api.request(Method::PATCH, url).json(&payload.to_value()))
            .await?;
        if body.is_null() {
            // 204 No Content: echo what was sent
            let mut fields = payload.fields.clone();
            fields.insert("id".into(), Value::String(id.to_string()));
            return Self::entity(kind, Value::Object(fields));
        }
        Self::entity(kind, body)
    }

    async fn list(&self, kind: EntityType, scope: &ParentIds) -> Result<Vec<TargetEntity>, TargetError> {
        let url = self.scoped_url(kind, scope)?;
        let body = self.send(self.api.request(Method::GET, url)).await?;
        let items = list_items(body)
            .ok_or_else(|| TargetError::Decode(format!("{kind} list response is not a list")))?;
        Ok(items
            .iter()
            .filter_map(|item| TargetEntity::from_json(kind, item))
            .collect())
    }
}
