use std::sync::Arc;
use std::time::Duration;
use futures::StreamExt;
use mockito::Matcher;
use serde_json::json;
use tokio::sync::broadcast;
use secureshare::channel::OfflineChannel;
use secureshare::directory::DirectoryClient;
use secureshare::store::DELETE_ATTEMPTS;
use secureshare::{
    FileBlob,
    HttpDirectoryClient,
    SessionContext,
    SessionError,
    SessionStore,
    StoreEvent,
    StoreState,
};

const TOKEN: &str = "mock_jwt_token";

fn directory_body() -> String {
    json!({
        "files": [
            {"id": "1", "name": "confidential-report.pdf", "size": 2540000,
             "uploaded_at": "2025-03-01T10:00:00Z", "encrypted": true},
            {"id": "2", "name": "financial-data.xlsx", "size": 1200000,
             "uploaded_at": "2025-02-28T10:00:00Z", "encrypted": true}
        ],
        "shared_files": [
            {"id": "3", "name": "project-proposal.docx", "size": 1800000,
             "shared_at": "2025-02-27T10:00:00Z", "shared_by": "jane.doe@example.com",
             "encrypted": true}
        ]
    })
    .to_string()
}

async fn wait_for<F>(events: &mut broadcast::Receiver<StoreEvent>, predicate: F) -> StoreEvent
where
    F: Fn(&StoreEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = events.recv().await.unwrap();
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("store event not received")
}

#[tokio::test]
async fn test_fetch_directory() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("GET", "/files")
        .match_header("authorization", "Bearer mock_jwt_token")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(directory_body())
        .create_async()
        .await;

    let client = HttpDirectoryClient::new(&server.url()).unwrap();
    let directory = client.fetch_directory(TOKEN).await.unwrap();

    assert_eq!(directory.files.len(), 2);
    assert_eq!(directory.shared_files[0].shared_by, "jane.doe@example.com");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_status_mapping() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/files")
        .with_status(401)
        .with_body(r#"{"error": "Unauthorized"}"#)
        .create_async()
        .await;
    server.mock("DELETE", "/files/9")
        .with_status(404)
        .with_body(r#"{"detail": "File not found"}"#)
        .create_async()
        .await;
    server.mock("DELETE", "/files/5")
        .with_status(503)
        .with_body(r#"{"detail": "Maintenance"}"#)
        .create_async()
        .await;

    let client = HttpDirectoryClient::new(&server.url()).unwrap();

    assert!(matches!(client.list_mine(TOKEN).await, Err(SessionError::Unauthorized(_))));
    assert!(matches!(client.delete(TOKEN, "9").await, Err(SessionError::NotFound(_))));

    let err = client.delete(TOKEN, "5").await.unwrap_err();
    assert!(err.is_transport());
    assert!(matches!(err, SessionError::ServerError { status_code: 503, ref message } if message == "Maintenance"));
}

#[tokio::test]
async fn test_empty_token_rejected_locally() {
    let client = HttpDirectoryClient::new("http://127.0.0.1:9").unwrap();

    assert!(matches!(client.list_mine("").await, Err(SessionError::Unauthorized(_))));
}

#[tokio::test]
async fn test_upload_multipart() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/files/upload")
        .match_header("authorization", "Bearer mock_jwt_token")
        .match_header("content-type", Matcher::Regex("^multipart/form-data".to_string()))
        .match_body(Matcher::AllOf(vec![
            Matcher::Regex(r#"name="file""#.to_string()),
            Matcher::Regex(r#"filename="r.txt""#.to_string()),
            Matcher::Regex("secret contents".to_string()),
        ]))
        .with_status(200)
        .with_body(r#"{"id": "9f1c", "name": "r.txt", "size": 15, "content_type": "text/plain",
                       "owner_id": "u1", "created_at": "2025-03-01T10:00:00Z"}"#)
        .create_async()
        .await;

    let client = HttpDirectoryClient::new(&server.url()).unwrap();
    let blob = FileBlob::new("r.txt", "secret contents").with_content_type("text/plain");
    let record = client.upload(TOKEN, &blob).await.unwrap();

    assert_eq!(record.id, "9f1c");
    assert_eq!(record.size_bytes, 15);
    mock.assert_async().await;
}

#[tokio::test]
async fn test_download_stream() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/files/1/download")
        .with_status(200)
        .with_body("encrypted bytes")
        .create_async()
        .await;

    let client = HttpDirectoryClient::new(&server.url()).unwrap();
    let mut stream = client.download(TOKEN, "1").await.unwrap();

    let mut content = Vec::new();
    while let Some(chunk) = stream.next().await {
        content.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(content, b"encrypted bytes");
}

#[tokio::test]
async fn test_login_initializes_session() {
    let mut server = mockito::Server::new_async().await;
    let mock = server.mock("POST", "/auth/login")
        .match_body(Matcher::Json(json!({"email": "a@x.com", "password": "secret"})))
        .with_status(200)
        .with_body(r#"{"access_token": "mock_jwt_token", "token_type": "bearer",
                       "user": {"id": "1", "email": "a@x.com", "name": "Test User"}}"#)
        .create_async()
        .await;

    let client = HttpDirectoryClient::new(&server.url()).unwrap();
    let session = SessionContext::new();
    client.login_session(&session, "a@x.com", "secret").await.unwrap();

    let identity = session.identity().await.unwrap();
    assert_eq!(identity.auth_token, TOKEN);
    assert_eq!(identity.user_name, "Test User");
    assert_eq!(identity.user_email, "a@x.com");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_register() {
    let mut server = mockito::Server::new_async().await;
    server.mock("POST", "/auth/register")
        .match_body(Matcher::PartialJson(json!({"email": "b@x.com"})))
        .with_status(200)
        .with_body(r#"{"message": "User registered successfully",
                       "user": {"id": "2", "email": "b@x.com", "name": "Bob"}}"#)
        .create_async()
        .await;
    server.mock("POST", "/auth/login")
        .with_status(401)
        .with_body(r#"{"detail": "Invalid credentials"}"#)
        .create_async()
        .await;

    let client = HttpDirectoryClient::new(&server.url()).unwrap();
    let response = client.register("Bob", "b@x.com", "secret").await.unwrap();
    assert_eq!(response.user.email, "b@x.com");

    let session = SessionContext::new();
    let result = client.login_session(&session, "b@x.com", "wrong").await;
    assert!(matches!(result, Err(SessionError::Unauthorized(_))));
    assert!(!session.is_authenticated().await);
}

#[tokio::test]
async fn test_store_against_http_service() {
    let mut server = mockito::Server::new_async().await;
    server.mock("GET", "/files")
        .with_status(200)
        .with_body(directory_body())
        .create_async()
        .await;
    server.mock("POST", "/files/upload")
        .with_status(200)
        .with_body(r#"{"id": "4", "name": "r.pdf", "size": 1000, "created_at": "2025-03-02T10:00:00Z"}"#)
        .create_async()
        .await;
    let failing_delete = server.mock("DELETE", "/files/2")
        .with_status(500)
        .with_body(r#"{"detail": "Database unavailable"}"#)
        .expect(DELETE_ATTEMPTS as usize)
        .create_async()
        .await;

    let session = SessionContext::new();
    session.init(TOKEN, "Test User", "a@x.com").await.unwrap();
    let directory = HttpDirectoryClient::new(&server.url()).unwrap();
    let handle = SessionStore::spawn(Arc::new(directory), Arc::new(OfflineChannel::new()), session);
    let store = handle.store.clone();
    let mut events = store.subscribe_events();

    let snapshot = store.load_initial_state().await.unwrap();
    assert_eq!(snapshot.state, StoreState::Ready);
    assert_eq!(snapshot.files.len(), 2);
    assert_eq!(snapshot.shared_files.len(), 1);

    store.request_upload(FileBlob::new("r.pdf", vec![1u8; 1000])).await.unwrap();
    wait_for(&mut events, |event| matches!(event, StoreEvent::UploadCompleted { .. })).await;
    let uploaded = store.snapshot().file("4").cloned().unwrap();
    assert_eq!(uploaded.name, "r.pdf");
    assert_eq!(uploaded.size_bytes, 1000);
    assert!(uploaded.encrypted);

    // Sharing needs a live channel.
    let share = store.request_share("4", "b@x.com").await;
    assert!(matches!(share, Err(SessionError::ChannelDisconnected)));

    store.request_delete("2").await.unwrap();
    assert!(store.snapshot().file("2").is_none());
    wait_for(&mut events, |event| matches!(event, StoreEvent::DeleteRolledBack { .. })).await;

    let ids: Vec<_> = store.snapshot().files.iter().map(|file| file.id.clone()).collect();
    assert_eq!(ids, vec!["1", "2", "4"]);
    failing_delete.assert_async().await;

    handle.shutdown().await.unwrap();
}
