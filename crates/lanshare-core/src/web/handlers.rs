//! HTTP endpoint handlers for the staging API.

#![allow(clippy::missing_errors_doc)]

use std::convert::Infallible;
use std::fmt::Write as _;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, Path, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::extract::multipart::{Field, Multipart, MultipartError};
use serde::Serialize;
use tokio_util::io::ReaderStream;

use crate::discovery::Device;
use crate::registry::{FetchedFile, PendingFile, StagedUpload, TransferRecord};

use super::error::{ApiError, ApiResult};
use super::AppState;

/// Name of the multipart field carrying the upload.
const FILE_FIELD: &str = "file";

/// Upload response.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    /// Always true
    success: bool,
    /// Id to fetch the file with
    file_id: String,
}

/// Success response without data.
#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    /// Always true
    success: bool,
}

/// Address of the device making the request, `"unknown"` when the server
/// was not started with connection info.
#[derive(Debug, Clone)]
pub struct FetcherAddr(pub String);

impl<S> FromRequestParts<S> for FetcherAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map_or_else(|| "unknown".to_string(), |info| info.0.ip().to_string());
        Ok(Self(addr))
    }
}

/// GET / - Service banner.
pub async fn index(State(state): State<AppState>) -> String {
    format!(
        "Lanshare {} on {}\n{} file(s) waiting at /api/pending_files\n",
        crate::VERSION,
        state.device_name,
        state.registry.pending_count()
    )
}

/// GET /api/pending_files - Staged files, oldest first.
pub async fn pending_files(State(state): State<AppState>) -> Json<Vec<PendingFile>> {
    Json(state.registry.list_pending())
}

/// GET /api/transfer_history - Completed fetches, oldest first.
pub async fn transfer_history(State(state): State<AppState>) -> Json<Vec<TransferRecord>> {
    Json(state.registry.list_history())
}

/// GET /api/peers - Peers found by discovery.
pub async fn peers(State(state): State<AppState>) -> Json<Vec<Device>> {
    Json(state.peers.snapshot())
}

/// POST /api/upload - Stage the multipart field `file`.
///
/// The body is streamed to disk chunk by chunk. Other fields are ignored.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<Json<UploadResponse>> {
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }

        let file_name = field.file_name().unwrap_or_default().trim().to_string();
        if file_name.is_empty() {
            return Err(ApiError::bad_request("no file selected"));
        }

        let mut upload = state.registry.begin_stage(&file_name).await?;
        if let Err(e) = write_field(&mut field, &mut upload).await {
            upload.abort().await;
            return Err(e);
        }

        let file = state.registry.commit(upload).await?;
        return Ok(Json(UploadResponse {
            success: true,
            file_id: file.id,
        }));
    }

    Err(ApiError::bad_request("no file in request").with_details("expected multipart field 'file'"))
}

/// GET /api/download/{file_id} - Hand out a staged file once.
pub async fn download(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
    FetcherAddr(fetcher): FetcherAddr,
) -> ApiResult<Response> {
    let FetchedFile { file, contents } = state.registry.fetch(&file_id, &fetcher).await?;

    let mime = mime_guess::from_path(&file.name).first_or_octet_stream();
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(mime.as_ref())
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&content_disposition(&file.name))
            .map_err(|e| ApiError::internal(format!("bad file name header: {e}")))?,
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(file.size));

    let body = Body::from_stream(ReaderStream::new(contents));
    Ok((StatusCode::OK, headers, body).into_response())
}

/// Fallback for paths the staging API does not serve.
pub async fn not_found(uri: Uri) -> ApiError {
    ApiError::not_found(format!("no such endpoint: {}", uri.path()))
}

/// DELETE /api/remove/{file_id} - Drop a staged file without fetching it.
pub async fn remove(
    State(state): State<AppState>,
    Path(file_id): Path<String>,
) -> ApiResult<Json<SuccessResponse>> {
    state.registry.remove(&file_id).await?;
    Ok(Json(SuccessResponse { success: true }))
}

async fn write_field(field: &mut Field, upload: &mut StagedUpload) -> ApiResult<()> {
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        upload.write_chunk(&chunk).await?;
    }
    Ok(())
}

fn multipart_error(err: MultipartError) -> ApiError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large("upload exceeds the size limit")
    } else {
        ApiError::new(status, format!("failed to read upload: {}", err.body_text()))
    }
}

/// `attachment` disposition with an ASCII fallback and an RFC 5987 name.
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if fallback == name {
        return format!("attachment; filename=\"{name}\"");
    }

    let mut encoded = String::with_capacity(name.len() * 3);
    for byte in name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    format!("attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}")
}
