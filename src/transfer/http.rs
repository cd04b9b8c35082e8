//! # HTTP Backend Client
//!
//! Client `reqwest` verso il backend serverless.
//!
//! ## Endpoint:
//! - `POST {endpoint}/upload-url` `{filename, fileType}` -> `{uploadUrl, key}`
//! - `PUT <uploadUrl>` byte grezzi con `Content-Type` del file
//! - `POST {endpoint}/optimize` `{key, outputFormat, quality}` -> `{downloadUrl, optimizedSize, newFilename}`
//!
//! L'upload viene inviato come stream di chunk per poter riportare il progresso.

use super::api::{
    ErrorBody, ProgressCallback, TransformApi, TransformRequest, TransformResponse,
    UploadSlot, UploadUrlRequest,
};
use crate::error::{OptimizeError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;
const GENERIC_TRANSFORM_ERROR: &str = "the server could not optimize this image";

pub struct HttpApi {
    client: Client,
    endpoint: String,
}

impl HttpApi {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoint, path)
    }
}

/// Extracts the backend's error message, or describes the status
async fn failure_message(response: Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .and_then(ErrorBody::into_message)
        .unwrap_or_else(|| format!("server responded with status {}", status))
}

fn split_chunks(bytes: &Bytes) -> Vec<Bytes> {
    (0..bytes.len())
        .step_by(UPLOAD_CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + UPLOAD_CHUNK_SIZE).min(bytes.len())))
        .collect()
}

#[async_trait]
impl TransformApi for HttpApi {
    async fn request_upload_slot(&self, filename: &str, mime: &str) -> Result<UploadSlot> {
        let body = UploadUrlRequest {
            filename: filename.to_string(),
            file_type: mime.to_string(),
        };
        let response = self
            .client
            .post(self.url("upload-url"))
            .json(&body)
            .send()
            .await
            .map_err(|e| OptimizeError::Link(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OptimizeError::Link(failure_message(response).await));
        }

        let slot: UploadSlot = response
            .json()
            .await
            .map_err(|e| OptimizeError::Link(format!("invalid upload link response: {}", e)))?;
        debug!("Upload slot issued for {}: {}", filename, slot.key);
        Ok(slot)
    }

    async fn upload(
        &self,
        slot: &UploadSlot,
        bytes: Bytes,
        mime: &str,
        progress: ProgressCallback,
    ) -> Result<()> {
        let total = bytes.len() as u64;
        let mut sent = 0u64;
        let chunks = split_chunks(&bytes).into_iter().map(move |chunk| {
            sent += chunk.len() as u64;
            progress(sent, total);
            Ok::<Bytes, std::io::Error>(chunk)
        });
        let body = reqwest::Body::wrap_stream(futures::stream::iter(chunks));

        let response = self
            .client
            .put(&slot.upload_url)
            .header(CONTENT_TYPE, mime)
            .header(CONTENT_LENGTH, total)
            .body(body)
            .send()
            .await
            .map_err(|e| OptimizeError::Upload(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OptimizeError::Upload(format!("storage responded with status {}", status)));
        }
        Ok(())
    }

    async fn request_transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        let response = self
            .client
            .post(self.url("optimize"))
            .json(request)
            .send()
            .await
            .map_err(|e| OptimizeError::Transform(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .ok()
                .and_then(ErrorBody::into_message)
                .unwrap_or_else(|| GENERIC_TRANSFORM_ERROR.to_string());
            debug!("Transform of {} failed with {}: {}", request.key, status, message);
            return Err(OptimizeError::Transform(message));
        }

        response
            .json()
            .await
            .map_err(|e| OptimizeError::Transform(format!("invalid optimize response: {}", e)))
    }

    async fn fetch(&self, url: &str) -> Result<Bytes> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Bytes::from(tokio::fs::read(path).await?));
        }
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.bytes().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::OutputFormat;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// Reads one request, head and `Content-Length` body
    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 8192];
        loop {
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_string();
                let length = head
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serves a single fixed response and hands back the request it received
    async fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let request = read_request(&mut socket).await;
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            request
        });
        (base, handle)
    }

    fn api(base: &str) -> HttpApi {
        HttpApi::new(base, Duration::from_secs(5)).unwrap()
    }

    fn transform_request() -> TransformRequest {
        TransformRequest {
            key: "uploads/1/a.jpg".to_string(),
            output_format: OutputFormat::Webp,
            quality: Some(80),
        }
    }

    #[tokio::test]
    async fn test_upload_slot_from_response() {
        let (base, server) = serve_once("200 OK", r#"{"uploadUrl":"https://bucket/put?sig=1","key":"uploads/7/a.jpg"}"#).await;
        let slot = api(&base).request_upload_slot("a.jpg", "image/jpeg").await.unwrap();
        assert_eq!(slot.upload_url, "https://bucket/put?sig=1");
        assert_eq!(slot.key, "uploads/7/a.jpg");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /upload-url "));
        assert!(request.contains(r#""fileType":"image/jpeg""#));
    }

    #[tokio::test]
    async fn test_upload_slot_failure_is_link_error() {
        let (base, _server) = serve_once("502 Bad Gateway", "<html>bad gateway</html>").await;
        let err = api(&base).request_upload_slot("a.jpg", "image/jpeg").await.unwrap_err();
        match err {
            OptimizeError::Link(message) => assert_eq!(message, "server responded with status 502 Bad Gateway"),
            other => panic!("expected a link error, got {other:?}"),
        }

        let (base, _server) = serve_once("400 Bad Request", r#"{"error":"filename is required"}"#).await;
        let err = api(&base).request_upload_slot("", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, OptimizeError::Link(ref m) if m == "filename is required"), "{err:?}");
    }

    #[tokio::test]
    async fn test_rejected_put_is_upload_error() {
        let (base, server) = serve_once("403 Forbidden", "").await;
        let slot = UploadSlot {
            upload_url: format!("{}/bucket/uploads/1/a.jpg", base),
            key: "uploads/1/a.jpg".to_string(),
        };
        let sent = Arc::new(AtomicU64::new(0));
        let progress: ProgressCallback = {
            let sent = sent.clone();
            Arc::new(move |n, _| sent.store(n, Ordering::SeqCst))
        };

        let bytes = Bytes::from(vec![9u8; UPLOAD_CHUNK_SIZE + 100]);
        let err = api(&base)
            .upload(&slot, bytes.clone(), "image/jpeg", progress)
            .await
            .unwrap_err();
        match err {
            OptimizeError::Upload(message) => assert_eq!(message, "storage responded with status 403 Forbidden"),
            other => panic!("expected an upload error, got {other:?}"),
        }
        assert_eq!(sent.load(Ordering::SeqCst), bytes.len() as u64);

        let request = server.await.unwrap();
        assert!(request.starts_with("PUT /bucket/uploads/1/a.jpg "));
        assert!(request.to_ascii_lowercase().contains("content-type: image/jpeg"));
    }

    #[tokio::test]
    async fn test_transform_failure_carries_server_message() {
        let (base, _server) = serve_once(
            "500 Internal Server Error",
            r#"{"message":"Input buffer contains unsupported image format"}"#,
        )
        .await;
        let err = api(&base).request_transform(&transform_request()).await.unwrap_err();
        assert!(
            matches!(err, OptimizeError::Transform(ref m) if m == "Input buffer contains unsupported image format"),
            "{err:?}"
        );
    }

    #[tokio::test]
    async fn test_transform_failure_without_message_is_generic() {
        let (base, _server) = serve_once("500 Internal Server Error", "internal error").await;
        let err = api(&base).request_transform(&transform_request()).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Transform(ref m) if m == GENERIC_TRANSFORM_ERROR), "{err:?}");

        let (base, _server) = serve_once("500 Internal Server Error", r#"{"error":"  "}"#).await;
        let err = api(&base).request_transform(&transform_request()).await.unwrap_err();
        assert!(matches!(err, OptimizeError::Transform(ref m) if m == GENERIC_TRANSFORM_ERROR), "{err:?}");
    }

    #[tokio::test]
    async fn test_transform_response() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"downloadUrl":"https://cdn/a.webp","optimizedSize":1234,"newFilename":"a.webp"}"#,
        )
        .await;
        let response = api(&base).request_transform(&transform_request()).await.unwrap();
        assert_eq!(response.download_url, "https://cdn/a.webp");
        assert_eq!(response.optimized_size, 1234);
        assert_eq!(response.new_filename, "a.webp");

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /optimize "));
        assert!(request.contains(r#""outputFormat":"webp""#));
        assert!(request.contains(r#""quality":80"#));
    }

    #[test]
    fn test_split_chunks_covers_all_bytes() {
        let bytes = Bytes::from(vec![7u8; UPLOAD_CHUNK_SIZE * 2 + 10]);
        let chunks = split_chunks(&bytes);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), bytes.len());
        assert_eq!(chunks[2].len(), 10);
        assert!(split_chunks(&Bytes::new()).is_empty());
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let api = HttpApi::new("https://api.example.com/prod/", Duration::from_secs(5)).unwrap();
        assert_eq!(api.url("optimize"), "https://api.example.com/prod/optimize");
    }

    #[tokio::test]
    async fn test_fetch_file_url() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.webp");
        tokio::fs::write(&path, b"webp-bytes").await.unwrap();

        let api = HttpApi::new("http://127.0.0.1:9", Duration::from_secs(5)).unwrap();
        let bytes = api.fetch(&format!("file://{}", path.display())).await.unwrap();
        assert_eq!(&bytes[..], b"webp-bytes");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_link_error() {
        let api = HttpApi::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = api.request_upload_slot("a.jpg", "image/jpeg").await.unwrap_err();
        assert!(matches!(err, OptimizeError::Link(_)));
    }
}
