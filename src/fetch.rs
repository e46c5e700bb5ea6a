use futures::TryStreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::{FetchError, StorageError};
use crate::storage::ObjectBody;

/// Issues a GET for `url` and hands back the response body as a stream.
///
/// Only the response head is awaited here; the body is pulled by whoever
/// consumes the returned [`ObjectBody`], so the image goes straight from the
/// socket into the upload.
pub async fn fetch_image(
    http: &Client,
    url: &str,
    cancel: &CancellationToken,
) -> Result<ObjectBody, FetchError> {
    let response = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
        response = http.get(url).send() => response,
    };

    let response = response.map_err(|source| {
        error!(url = %url, error = %source, "[FETCH][ERROR] Request failed");
        FetchError::Transport {
            url: url.to_string(),
            source,
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        error!(url = %url, status = %status, "[FETCH][ERROR] Image source returned error status");
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_length = response.content_length();
    debug!(url = %url, ?content_length, "[FETCH] Response received, streaming body");

    let stream = response
        .bytes_stream()
        .map_err(|e| StorageError::Body(e.to_string()));

    Ok(ObjectBody {
        stream: Box::pin(stream),
        content_length,
    })
}
