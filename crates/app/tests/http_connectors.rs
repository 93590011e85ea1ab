//! HTTP connector behavior against mock servers.

use std::time::Duration;

use eventsync_app::config::{AppConfig, Endpoint};
use eventsync_app::http::{ApiClient, HttpBlobs, HttpSource, HttpTarget};
use eventsync_app::migrate;
use eventsync_sync::{
    BlobMetadata, BlobTransfer, EntityType, Operation, ParentIds, SourceConnector, SourceError,
    TargetConnector, TargetError, TargetPayload,
};
use futures::TryStreamExt;
use reqwest::Url;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_json, body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoint(server: &MockServer, token: Option<&str>) -> Endpoint {
    Endpoint {
        base_url: Url::parse(&server.uri()).unwrap(),
        token: token.map(str::to_string),
    }
}

fn api(server: &MockServer, token: Option<&str>) -> ApiClient {
    ApiClient::new(&endpoint(server, token), Duration::from_secs(5), 2).unwrap()
}

fn payload(entity: EntityType, fields: Value) -> TargetPayload {
    TargetPayload {
        entity,
        operation: Operation::Create,
        fields: fields.as_object().cloned().unwrap_or_default(),
    }
}

mod target {
    use super::*;

    #[tokio::test]
    async fn create_posts_to_the_scoped_collection() {
        // GIVEN a target API that accepts room creation
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/events/46/rooms"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({ "name": "Main Hall", "sourceSystemId": "10" })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": 7,
                "name": "Main Hall",
                "sourceSystemId": "10"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let target = HttpTarget::new(api(&server, Some("secret")));

        // WHEN a room is created for event 46
        let entity = target
            .create(
                EntityType::Room,
                &ParentIds::event("46"),
                &payload(EntityType::Room, json!({ "name": "Main Hall", "sourceSystemId": "10" })),
            )
            .await
            .unwrap();

        // THEN the stored entity comes back with a string id
        assert_eq!(entity.id, "7");
        assert_eq!(entity.source_system_id.as_deref(), Some("10"));
    }

    #[tokio::test]
    async fn error_responses_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/rooms/r1/sessions"))
            .respond_with(ResponseTemplate::new(409).set_body_string("duplicate"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/s1/sub-sessions"))
            .respond_with(
                ResponseTemplate::new(422)
                    .set_body_string(r#"{"errors":{"sourceSystemId":["has already been taken"]}}"#),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/events/46/users"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/events/46/files"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;
        let target = HttpTarget::new(api(&server, None));
        let scope = ParentIds::event("46").with_room("r1").with_session("s1");

        let conflict = target
            .create(EntityType::Session, &scope, &payload(EntityType::Session, json!({})))
            .await
            .unwrap_err();
        assert!(conflict.is_conflict(), "{conflict:?}");

        let duplicate = target
            .create(EntityType::SubSession, &scope, &payload(EntityType::SubSession, json!({})))
            .await
            .unwrap_err();
        assert!(duplicate.is_conflict(), "{duplicate:?}");

        let limited = target
            .create(EntityType::User, &scope, &payload(EntityType::User, json!({})))
            .await
            .unwrap_err();
        assert!(limited.is_transient());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));

        let unavailable = target
            .create(EntityType::FileAsset, &scope, &payload(EntityType::FileAsset, json!({})))
            .await
            .unwrap_err();
        assert!(unavailable.is_transient());
        assert!(matches!(unavailable, TargetError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn missing_scope_is_rejected_locally() {
        let server = MockServer::start().await;
        let target = HttpTarget::new(api(&server, None));

        let err = target
            .create(
                EntityType::SubSession,
                &ParentIds::event("46"),
                &payload(EntityType::SubSession, json!({})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TargetError::Status { status: 400, .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_patches_the_entity() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/sub-sessions/ss-9"))
            .and(body_json(json!({ "order": 2 })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        let target = HttpTarget::new(api(&server, None));

        let entity = target
            .update(
                EntityType::SubSession,
                "ss-9",
                &payload(EntityType::SubSession, json!({ "order": 2 })),
            )
            .await
            .unwrap();
        assert_eq!(entity.id, "ss-9");
        assert_eq!(entity.fields.get("order"), Some(&json!(2)));
    }

    #[tokio::test]
    async fn list_unwraps_data_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rooms/r1/moderators"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "id": "m1", "sourceSystemId": "u1@10", "role": "chair" },
                    { "sourceSystemId": "no-id" }
                ]
            })))
            .mount(&server)
            .await;
        let target = HttpTarget::new(api(&server, None));

        let links = target
            .list(EntityType::ModeratorLink, &ParentIds::event("46").with_room("r1"))
            .await
            .unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].source_system_id.as_deref(), Some("u1@10"));
    }

    #[tokio::test]
    async fn unknown_event_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events/404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events/46"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "id": 46, "name": "Expo" } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events/46/locations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 500, "name": "Venue" }])))
            .mount(&server)
            .await;
        let target = HttpTarget::new(api(&server, None));

        assert_eq!(target.get_event("404").await.unwrap(), None);
        let event = target.get_event("46").await.unwrap().unwrap();
        assert_eq!(event.id, "46");
        assert_eq!(event.name.as_deref(), Some("Expo"));
        let locations = target.get_event_locations("46").await.unwrap();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].id, "500");
    }
}

mod source {
    use super::*;

    #[tokio::test]
    async fn unknown_event_is_not_found_but_missing_children_are_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let source = HttpSource::new(api(&server, None));

        let err = source.get_rooms("legacy-2024").await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound(ref e) if e == "legacy-2024"));
        assert!(source.get_sessions("legacy-2024", "10").await.unwrap().is_empty());
        assert!(source.get_sub_sessions("s1").await.unwrap().is_empty());
        assert!(source.get_users("legacy-2024", "10").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lists_are_fetched_from_scoped_paths() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events/legacy-2024/rooms/10/sessions"))
            .and(header("authorization", "Bearer legacy"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{ "SessionId": "s1" }, "junk"]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/events/legacy-2024/files"))
            .and(query_param("scope", "10"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "FileId": "f1" }]
            })))
            .mount(&server)
            .await;
        let source = HttpSource::new(api(&server, Some("legacy")));

        let sessions = source.get_sessions("legacy-2024", "10").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].get("SessionId"), Some(&json!("s1")));

        let files = source.get_files("legacy-2024", "10").await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let source = HttpSource::new(api(&server, None));

        let err = source.get_users("legacy-2024", "10").await.unwrap_err();
        assert!(matches!(err, SourceError::Status { status: 500, ref message } if message == "boom"));
    }

    #[tokio::test]
    async fn download_streams_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/files/docs%2Fslides.pdf/content"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"%PDF-1.7".to_vec()))
            .mount(&server)
            .await;
        let source = HttpSource::new(api(&server, None));

        let chunks: Vec<bytes::Bytes> = source
            .download_file("docs/slides.pdf")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks.concat(), b"%PDF-1.7");
    }
}

mod blobs {
    use super::*;

    #[tokio::test]
    async fn upload_streams_body_with_metadata_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/uploads"))
            .and(header("x-file-name", "slides.pdf"))
            .and(header("x-source-system-id", "f1"))
            .and(header("content-type", "application/pdf"))
            .and(body_string("%PDF-1.7"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "blob-1",
                "url": "https://cdn.example.com/blob-1"
            })))
            .expect(1)
            .mount(&server)
            .await;
        let blobs = HttpBlobs::new(api(&server, None));
        let stream = futures::stream::iter(vec![
            Ok::<_, SourceError>(bytes::Bytes::from_static(b"%PDF")),
            Ok(bytes::Bytes::from_static(b"-1.7")),
        ]);

        let stored = blobs
            .upload(
                Box::pin(stream),
                BlobMetadata {
                    file_name: "slides.pdf".into(),
                    mime_type: Some("application/pdf".into()),
                    size: None,
                    source_id: "f1".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(stored.id, "blob-1");
        assert_eq!(stored.url, "https://cdn.example.com/blob-1");
    }

    #[tokio::test]
    async fn rejected_upload_keeps_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/uploads"))
            .respond_with(ResponseTemplate::new(413).set_body_string("too large"))
            .mount(&server)
            .await;
        let blobs = HttpBlobs::new(api(&server, None));

        let err = blobs
            .upload(
                Box::pin(futures::stream::empty::<Result<bytes::Bytes, SourceError>>()),
                BlobMetadata::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "upload rejected with HTTP 413: too large");
    }
}

mod execute {
    use super::*;

    fn config(source: &MockServer, target: &MockServer) -> AppConfig {
        AppConfig {
            source: endpoint(source, None),
            target: endpoint(target, None),
            source_event: "legacy-2024".into(),
            target_event_id: "46".into(),
            room_name: None,
            max_concurrent: 2,
            timeout: Duration::from_secs(5),
            max_retries: 0,
            dto_config: None,
            report: None,
            verbose: false,
            skip_files: true,
            dry_run: true,
        }
    }

    async fn target_event(target: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/events/46"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": 46 })))
            .mount(target)
            .await;
        Mock::given(method("GET"))
            .and(path("/events/46/locations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 500 }])))
            .mount(target)
            .await;
    }

    #[tokio::test]
    async fn dry_run_plans_the_hierarchy_without_writes() {
        // GIVEN a legacy room with one session of three parts
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        target_event(&target).await;
        Mock::given(method("GET"))
            .and(path("/events/legacy-2024/rooms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "Id": 10, "RoomName": "Main Hall" }])))
            .mount(&source)
            .await;
        Mock::given(method("GET"))
            .and(path("/events/legacy-2024/rooms/10/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "SessionId": "s1",
                "Title": "Keynote",
                "StartTime": "2024-05-01 09:00:00",
                "EndTime": "2024-05-01 10:00:00"
            }])))
            .mount(&source)
            .await;
        Mock::given(method("GET"))
            .and(path("/sessions/s1/sub-sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    { "sub_session_id": "s1-1", "title": "Part 1" },
                    { "sub_session_id": "s1-2", "title": "Part 2" },
                    { "sub_session_id": "s1-3", "title": "Part 3" }
                ]
            })))
            .mount(&source)
            .await;

        // WHEN executed as a dry run
        let report = migrate::execute(&config(&source, &target), CancellationToken::new())
            .await
            .unwrap();

        // THEN everything is planned and the target only saw reads
        assert!(report.success, "errors: {:?}", report.errors);
        assert_eq!(report.counts(EntityType::Room).planned, 1);
        assert_eq!(report.counts(EntityType::Session).planned, 1);
        assert_eq!(report.counts(EntityType::SubSession).planned, 3);
        let writes = target
            .received_requests()
            .await
            .unwrap()
            .into_iter()
            .filter(|r| r.method.as_str() != "GET")
            .count();
        assert_eq!(writes, 0);
    }

    #[tokio::test]
    async fn missing_target_event_is_fatal() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&target)
            .await;

        let err = migrate::execute(&config(&source, &target), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("target event 46 not found"), "{err:#}");
    }

    #[tokio::test]
    async fn report_file_is_written_as_json() {
        let source = MockServer::start().await;
        let target = MockServer::start().await;
        target_event(&target).await;
        Mock::given(method("GET"))
            .and(path("/events/legacy-2024/rooms"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&source)
            .await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");

        let report = migrate::execute(&config(&source, &target), CancellationToken::new())
            .await
            .unwrap();
        migrate::write_report(&report, &path).unwrap();

        let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(written["target_event_id"], "46");
        assert_eq!(written["success"], true);
    }
}
