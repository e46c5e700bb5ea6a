//! Backblaze B2 native API client.
//!
//! Only the calls needed for snapshot archival are implemented:
//! `b2_authorize_account`, `b2_list_buckets`, `b2_create_bucket`,
//! `b2_get_upload_url` and `b2_upload_file`.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, StreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::future::Future;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Bucket, ByteStream, NewObject, StoredObject};
use crate::config::StorageConfig;
use crate::error::StorageError;

/// Characters B2 accepts unescaped in `X-Bz-File-Name`.
const FILE_NAME_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

/// Length of the hex SHA-1 appended to the body with `hex_digits_at_end`.
const SHA1_HEX_LEN: u64 = 40;

const DEFAULT_BUCKET_TYPE: &str = "allPrivate";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorizeResponse {
    account_id: String,
    authorization_token: String,
    api_url: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListBucketsRequest<'a> {
    account_id: &'a str,
    bucket_name: &'a str,
}

#[derive(Deserialize)]
struct ListBucketsResponse {
    buckets: Vec<BucketInfo>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateBucketRequest<'a> {
    account_id: &'a str,
    bucket_name: &'a str,
    bucket_type: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketInfo {
    bucket_id: String,
    bucket_name: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GetUploadUrlRequest<'a> {
    bucket_id: &'a str,
}

#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadTarget {
    upload_url: String,
    authorization_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadFileResponse {
    file_id: String,
    file_name: String,
    content_length: u64,
}

/// Account token and the API host it is valid for.
#[derive(Clone)]
struct AccountAuth {
    account_id: String,
    auth_token: String,
    api_url: String,
}

/// An authorized B2 account session.
#[derive(Clone)]
pub struct B2Session {
    http: Client,
    config: StorageConfig,
    auth: AccountAuth,
}

impl B2Session {
    /// Authorizes against `b2_authorize_account` with the configured key pair.
    pub async fn connect(http: Client, config: &StorageConfig) -> Result<Self, StorageError> {
        let auth = authorize(&http, config).await?;
        Ok(Self {
            http,
            config: config.clone(),
            auth,
        })
    }

    /// Resolves the bucket by name, creating it when the lookup reports that it
    /// does not exist. Any other lookup failure is returned unchanged.
    pub async fn open_bucket(&self, name: &str) -> Result<B2Bucket, StorageError> {
        let info = match self.find_bucket(name).await {
            Ok(Some(info)) => {
                info!(bucket = %name, bucket_id = %info.bucket_id, "[B2] Using existing bucket");
                info
            }
            Ok(None) => self.create_bucket(name).await?,
            Err(e) if e.is_not_found() => self.create_bucket(name).await?,
            Err(e) => {
                error!(bucket = %name, error = %e, "[B2][ERROR] Could not fetch buckets");
                return Err(e);
            }
        };

        Ok(B2Bucket {
            http: self.http.clone(),
            config: self.config.clone(),
            auth: Mutex::new(self.auth.clone()),
            bucket_id: info.bucket_id,
            bucket_name: info.bucket_name,
            upload_target: Mutex::new(None),
        })
    }

    async fn find_bucket(&self, name: &str) -> Result<Option<BucketInfo>, StorageError> {
        let listed: ListBucketsResponse = post_api(
            &self.http,
            &self.auth.api_url,
            &self.auth.auth_token,
            "b2_list_buckets",
            &ListBucketsRequest {
                account_id: &self.auth.account_id,
                bucket_name: name,
            },
        )
        .await?;
        Ok(listed.buckets.into_iter().find(|b| b.bucket_name == name))
    }

    async fn create_bucket(&self, name: &str) -> Result<BucketInfo, StorageError> {
        info!(bucket = %name, "[B2] Creating new bucket");
        post_api(
            &self.http,
            &self.auth.api_url,
            &self.auth.auth_token,
            "b2_create_bucket",
            &CreateBucketRequest {
                account_id: &self.auth.account_id,
                bucket_name: name,
                bucket_type: DEFAULT_BUCKET_TYPE,
            },
        )
        .await
        .map_err(|e| {
            error!(bucket = %name, error = %e, "[B2][ERROR] Failed to create bucket");
            e
        })
    }
}

/// A resolved B2 bucket. Caches the upload URL between cycles and keeps the
/// credentials so an expired account token can be replaced.
pub struct B2Bucket {
    http: Client,
    config: StorageConfig,
    auth: Mutex<AccountAuth>,
    bucket_id: String,
    bucket_name: String,
    upload_target: Mutex<Option<UploadTarget>>,
}

impl B2Bucket {
    pub fn name(&self) -> &str {
        &self.bucket_name
    }

    pub fn id(&self) -> &str {
        &self.bucket_id
    }

    async fn upload_target(&self) -> Result<UploadTarget, StorageError> {
        let mut cached = self.upload_target.lock().await;
        if let Some(target) = cached.as_ref() {
            return Ok(target.clone());
        }
        let auth = self.auth.lock().await.clone();
        let target: UploadTarget = post_api(
            &self.http,
            &auth.api_url,
            &auth.auth_token,
            "b2_get_upload_url",
            &GetUploadUrlRequest {
                bucket_id: &self.bucket_id,
            },
        )
        .await?;
        debug!(bucket = %self.bucket_name, "[B2] Obtained upload URL");
        *cached = Some(target.clone());
        Ok(target)
    }

    async fn reauthorize(&self) -> Result<(), StorageError> {
        let fresh = authorize(&self.http, &self.config).await?;
        *self.auth.lock().await = fresh;
        Ok(())
    }

    async fn upload(
        &self,
        object: NewObject,
        cancel: &CancellationToken,
    ) -> Result<StoredObject, StorageError> {
        const ENDPOINT: &str = "b2_upload_file";
        let target = cancellable(cancel, self.upload_target()).await?;

        let (stream, length) = match object.body.content_length {
            Some(length) => (object.body.stream, length),
            None => {
                let data = cancellable(cancel, buffer(object.body.stream)).await?;
                let length = data.len() as u64;
                let stream: ByteStream = Box::pin(stream::once(async move { Ok(data) }));
                (stream, length)
            }
        };

        let request = self
            .http
            .post(&target.upload_url)
            .header(AUTHORIZATION, &target.authorization_token)
            .header("X-Bz-File-Name", encode_file_name(&object.name))
            .header(CONTENT_TYPE, object.content_type)
            .header(CONTENT_LENGTH, length + SHA1_HEX_LEN)
            .header("X-Bz-Content-Sha1", "hex_digits_at_end")
            .body(reqwest::Body::wrap_stream(with_sha1_trailer(stream)));

        let stored: UploadFileResponse = cancellable(cancel, async {
            let response = request
                .send()
                .await
                .map_err(|source| StorageError::Transport {
                    endpoint: ENDPOINT,
                    source,
                })?;
            decode(ENDPOINT, response).await
        })
        .await?;

        Ok(StoredObject {
            file_id: stored.file_id,
            file_name: stored.file_name,
            content_length: stored.content_length,
        })
    }
}

#[async_trait]
impl Bucket for B2Bucket {
    async fn put_object(
        &self,
        object: NewObject,
        cancel: &CancellationToken,
    ) -> Result<StoredObject, StorageError> {
        let result = self.upload(object, cancel).await;
        if let Err(e) = &result {
            // Upload URLs go stale after a failure; ask for a fresh one next time.
            warn!(bucket = %self.bucket_name, error = %e, "[B2] Upload failed, discarding cached upload URL");
            self.upload_target.lock().await.take();
            if e.is_expired_auth() {
                info!(bucket = %self.bucket_name, "[B2] Authorization token expired, re-authorizing account");
                if let Err(reauth) = cancellable(cancel, self.reauthorize()).await {
                    error!(error = %reauth, "[B2][ERROR] Re-authorization failed, retrying on the next upload");
                }
            }
        }
        result
    }
}

async fn authorize(http: &Client, config: &StorageConfig) -> Result<AccountAuth, StorageError> {
    const ENDPOINT: &str = "b2_authorize_account";
    let url = format!("{}/b2api/v2/{ENDPOINT}", config.api_url);
    info!(url = %url, "[B2] Authorizing account");

    let response = http
        .get(&url)
        .basic_auth(
            config.account_id.expose(),
            Some(config.application_key.expose()),
        )
        .send()
        .await
        .map_err(|source| StorageError::Transport {
            endpoint: ENDPOINT,
            source,
        })?;

    let auth: AuthorizeResponse = match decode(ENDPOINT, response).await {
        Ok(auth) => auth,
        Err(StorageError::Api {
            status: 401,
            message,
            ..
        }) => {
            error!(message = %message, "[B2][ERROR] Account authorization rejected");
            return Err(StorageError::Unauthorized(message));
        }
        Err(e) => return Err(e),
    };

    info!(api_url = %auth.api_url, "[B2] Account authorized");
    Ok(AccountAuth {
        account_id: auth.account_id,
        auth_token: auth.authorization_token,
        api_url: auth.api_url.trim_end_matches('/').to_string(),
    })
}

async fn post_api<Req, Resp>(
    http: &Client,
    api_url: &str,
    auth_token: &str,
    endpoint: &'static str,
    body: &Req,
) -> Result<Resp, StorageError>
where
    Req: Serialize + ?Sized,
    Resp: DeserializeOwned,
{
    let url = format!("{api_url}/b2api/v2/{endpoint}");
    let response = http
        .post(&url)
        .header(AUTHORIZATION, auth_token)
        .json(body)
        .send()
        .await
        .map_err(|source| StorageError::Transport { endpoint, source })?;
    decode(endpoint, response).await
}

/// Turns a B2 response into `T`, or into [`StorageError::Api`] using the
/// provider's `{status, code, message}` error document.
async fn decode<T: DeserializeOwned>(
    endpoint: &'static str,
    response: Response,
) -> Result<T, StorageError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let body = serde_json::from_str::<ApiErrorBody>(&text).unwrap_or(ApiErrorBody {
            code: String::new(),
            message: text,
        });
        return Err(StorageError::Api {
            endpoint,
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        });
    }
    response
        .json::<T>()
        .await
        .map_err(|source| StorageError::Transport { endpoint, source })
}

async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(StorageError::Cancelled),
        result = fut => result,
    }
}

async fn buffer(mut stream: ByteStream) -> Result<Bytes, StorageError> {
    let mut data = BytesMut::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data.freeze())
}

fn encode_file_name(name: &str) -> String {
    utf8_percent_encode(name, FILE_NAME_ENCODE_SET).to_string()
}

/// Passes chunks through unchanged and appends the hex SHA-1 of everything seen.
fn with_sha1_trailer(inner: ByteStream) -> ByteStream {
    Box::pin(stream::unfold(
        Some((inner, Sha1::new())),
        |state| async move {
            let (mut inner, mut hasher) = state?;
            match inner.next().await {
                Some(Ok(chunk)) => {
                    hasher.update(&chunk);
                    Some((Ok(chunk), Some((inner, hasher))))
                }
                Some(Err(e)) => Some((Err(e), None)),
                None => {
                    let digest = format!("{:x}", hasher.finalize());
                    Some((Ok(Bytes::from(digest)), None))
                }
            }
        },
    ))
}
