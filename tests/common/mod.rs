#![allow(dead_code)]

//! Local stand-ins for the image source and the B2 API, served by axum on an
//! ephemeral port.

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;

pub const JPEG: &[u8] = b"\xff\xd8\xff\xe0fake-jpeg-payload\xff\xd9";

pub const ACCOUNT_TOKEN: &str = "account-token";
pub const UPLOAD_TOKEN: &str = "upload-token";

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("listener address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("test server");
    });
    format!("http://{addr}")
}

/// Serves `/snapshot.jpg` (with length), `/chunked.jpg` (streamed, no length),
/// `/truncated.jpg` (announces a length, then drops the connection mid-body)
/// and `/missing.jpg` (404).
pub async fn spawn_image_server() -> String {
    let app = Router::new()
        .route(
            "/snapshot.jpg",
            get(|| async { ([(header::CONTENT_TYPE, "image/jpeg")], JPEG) }),
        )
        .route(
            "/chunked.jpg",
            get(|| async {
                let chunks = JPEG
                    .chunks(4)
                    .map(|c| Ok::<_, std::io::Error>(Bytes::from_static(c)))
                    .collect::<Vec<_>>();
                Body::from_stream(futures::stream::iter(chunks))
            }),
        )
        .route(
            "/truncated.jpg",
            get(|| async {
                let chunks: Vec<Result<Bytes, std::io::Error>> = vec![
                    Ok(Bytes::from_static(&JPEG[..4])),
                    Err(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        "camera went away",
                    )),
                ];
                (
                    [(header::CONTENT_LENGTH, JPEG.len().to_string())],
                    Body::from_stream(futures::stream::iter(chunks)),
                )
            }),
        )
        .route(
            "/missing.jpg",
            get(|| async { (StatusCode::NOT_FOUND, "no such image") }),
        );
    serve(app).await
}

#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub bucket_id: String,
    pub file_name: String,
    pub content_type: String,
    pub content_length: u64,
    pub sha1_header: String,
    pub authorization: String,
    /// Body without the trailing SHA-1 digits.
    pub body: Vec<u8>,
    pub sha1_trailer: String,
}

#[derive(Debug, Default)]
pub struct FakeB2State {
    pub base_url: String,
    /// (name, id)
    pub buckets: Vec<(String, String)>,
    pub created: Vec<String>,
    pub list_calls: usize,
    pub upload_url_requests: usize,
    pub uploads: Vec<RecordedUpload>,
    pub auth_calls: usize,
    /// Tokens currently accepted; [`FakeB2State::rotate_tokens`] expires them.
    pub account_token: String,
    pub upload_token: String,
    pub reject_auth: bool,
    pub fail_list_with: Option<u16>,
    pub failing_uploads: usize,
}

impl FakeB2State {
    /// Expires every issued token. Only tokens from the next authorization work.
    pub fn rotate_tokens(&mut self) {
        let generation = self.auth_calls + 1;
        self.account_token = format!("{ACCOUNT_TOKEN}-{generation}");
        self.upload_token = format!("{UPLOAD_TOKEN}-{generation}");
    }
}

#[derive(Clone)]
pub struct FakeB2 {
    pub url: String,
    pub state: Arc<Mutex<FakeB2State>>,
}

impl FakeB2 {
    pub fn with_state<T>(&self, f: impl FnOnce(&mut FakeB2State) -> T) -> T {
        let mut state = self.state.lock().expect("fake b2 state");
        f(&mut state)
    }
}

pub async fn spawn_fake_b2(configure: impl FnOnce(&mut FakeB2State)) -> FakeB2 {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake b2");
    let url = format!("http://{}", listener.local_addr().expect("addr"));

    let mut initial = FakeB2State {
        base_url: url.clone(),
        account_token: ACCOUNT_TOKEN.to_string(),
        upload_token: UPLOAD_TOKEN.to_string(),
        ..Default::default()
    };
    configure(&mut initial);
    let state = Arc::new(Mutex::new(initial));

    let app = Router::new()
        .route("/b2api/v2/b2_authorize_account", get(authorize))
        .route("/b2api/v2/b2_list_buckets", post(list_buckets))
        .route("/b2api/v2/b2_create_bucket", post(create_bucket))
        .route("/b2api/v2/b2_get_upload_url", post(get_upload_url))
        .route("/upload/{bucket_id}", post(upload_file))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("fake b2 server");
    });

    FakeB2 { url, state }
}

type Shared = Arc<Mutex<FakeB2State>>;

fn api_error(status: u16, code: &str, message: &str) -> Response {
    let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status_code,
        Json(json!({ "status": status, "code": code, "message": message })),
    )
        .into_response()
}

fn has_token(headers: &HeaderMap, expected: &str) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        == Some(expected)
}

fn expired_token() -> Response {
    api_error(401, "expired_auth_token", "Authorization token has expired")
}

async fn authorize(State(state): State<Shared>, headers: HeaderMap) -> Response {
    let mut state = state.lock().unwrap();
    state.auth_calls += 1;
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if state.reject_auth || !basic.starts_with("Basic ") {
        return api_error(401, "unauthorized", "invalid application key");
    }
    Json(json!({
        "accountId": "acct-123",
        "authorizationToken": state.account_token,
        "apiUrl": state.base_url,
        "downloadUrl": state.base_url,
    }))
    .into_response()
}

async fn list_buckets(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    state.list_calls += 1;
    if !has_token(&headers, &state.account_token) {
        return expired_token();
    }
    if let Some(status) = state.fail_list_with {
        return api_error(status, "internal_error", "listing unavailable");
    }
    let wanted = req["bucketName"].as_str().unwrap_or_default();
    let buckets: Vec<Value> = state
        .buckets
        .iter()
        .filter(|(name, _)| name == wanted)
        .map(|(name, id)| json!({ "bucketId": id, "bucketName": name, "bucketType": "allPrivate" }))
        .collect();
    Json(json!({ "buckets": buckets })).into_response()
}

async fn create_bucket(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !has_token(&headers, &state.account_token) {
        return expired_token();
    }
    let name = req["bucketName"].as_str().unwrap_or_default().to_string();
    let id = format!("bucket-{}", state.buckets.len() + 1);
    state.buckets.push((name.clone(), id.clone()));
    state.created.push(name.clone());
    Json(json!({ "bucketId": id, "bucketName": name, "bucketType": req["bucketType"] }))
        .into_response()
}

async fn get_upload_url(
    State(state): State<Shared>,
    headers: HeaderMap,
    Json(req): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    if !has_token(&headers, &state.account_token) {
        return expired_token();
    }
    state.upload_url_requests += 1;
    let bucket_id = req["bucketId"].as_str().unwrap_or_default().to_string();
    Json(json!({
        "bucketId": bucket_id,
        "uploadUrl": format!("{}/upload/{}", state.base_url, bucket_id),
        "authorizationToken": state.upload_token,
    }))
    .into_response()
}

async fn upload_file(
    State(state): State<Shared>,
    Path(bucket_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };

    if !has_token(&headers, &state.upload_token) {
        return expired_token();
    }
    if state.failing_uploads > 0 {
        state.failing_uploads -= 1;
        return api_error(503, "service_unavailable", "no tomes available");
    }

    let raw_name = header_str("x-bz-file-name");
    let file_name = percent_encoding::percent_decode_str(&raw_name)
        .decode_utf8_lossy()
        .to_string();
    let split = body.len().saturating_sub(40);
    let upload = RecordedUpload {
        bucket_id,
        file_name: file_name.clone(),
        content_type: header_str("content-type"),
        content_length: header_str("content-length").parse().unwrap_or_default(),
        sha1_header: header_str("x-bz-content-sha1"),
        authorization: header_str("authorization"),
        body: body[..split].to_vec(),
        sha1_trailer: String::from_utf8_lossy(&body[split..]).to_string(),
    };
    let content_length = upload.body.len();
    let file_id = format!("file-{}", state.uploads.len() + 1);
    state.uploads.push(upload);

    Json(json!({
        "fileId": file_id,
        "fileName": file_name,
        "contentLength": content_length,
        "contentType": header_str("content-type"),
    }))
    .into_response()
}
