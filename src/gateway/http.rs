//! HTTP file gateway client
//!
//! Implements [`RemoteFs`] against the gateway's `/api/servers/{id}/files`
//! endpoints. Non-streaming calls carry the configured request timeout;
//! uploads and downloads are bounded only by their abort token.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::future::Either;
use futures_util::{stream, StreamExt};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ConsoleConfig;
use crate::sftp::error::SftpError;
use crate::sftp::remote::{ProgressFn, RemoteFs, UploadBody, UploadFile};
use crate::sftp::types::constants::DEFAULT_CHUNK_SIZE;
use crate::sftp::types::{FileEntry, Listing};

/// Longest plain-text error body passed through verbatim
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Deserialize)]
struct ContentResponse {
    content: String,
}

#[derive(Debug, Serialize)]
struct WriteRequest<'a> {
    path: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct RenameRequest<'a> {
    old_path: &'a str,
    new_path: &'a str,
}

#[derive(Debug, Serialize)]
struct PathRequest<'a> {
    path: &'a str,
}

/// Pull a human-readable message out of an error response body.
///
/// Tries the `detail`, `error` and `message` JSON fields, then a short plain
/// body, then the status line.
fn extract_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "error", "message"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_string();
            }
        }
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && trimmed.len() <= MAX_ERROR_BODY && !trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    match status.canonical_reason() {
        Some(reason) => format!("{} {}", status.as_u16(), reason),
        None => status.as_u16().to_string(),
    }
}

/// Turn a non-2xx response into an error
async fn check(response: Response) -> Result<Response, SftpError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(SftpError::from_status(
        status.as_u16(),
        extract_error_message(status, &body),
    ))
}

pub struct HttpGateway {
    client: Client,
    base_url: String,
    request_timeout: Duration,
    chunk_size: usize,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SftpError> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, base_url))
    }

    /// Use an existing client (shared connection pool, custom TLS)
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout: Duration::from_secs(30),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Result<Self, SftpError> {
        let mut gateway = Self::new(config.gateway_url.as_str())?;
        gateway.request_timeout = config.request_timeout();
        gateway.chunk_size = config.chunk_size();
        Ok(gateway)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn files_url(&self, server_id: &str, suffix: &str) -> String {
        format!("{}/api/servers/{}/files{}", self.base_url, server_id, suffix)
    }

    /// Streamed upload body that reports `(sent, total)` as chunks are pulled
    async fn upload_body(
        &self,
        file: &UploadFile,
        on_progress: ProgressFn,
    ) -> Result<reqwest::Body, SftpError> {
        let chunks = match &file.body {
            UploadBody::Bytes(data) => {
                let pieces: Vec<Result<Bytes, std::io::Error>> = (0..data.len())
                    .step_by(self.chunk_size)
                    .map(|start| Ok(data.slice(start..(start + self.chunk_size).min(data.len()))))
                    .collect();
                Either::Left(stream::iter(pieces))
            }
            UploadBody::File(path) => {
                let local = tokio::fs::File::open(path).await?;
                Either::Right(ReaderStream::with_capacity(local, self.chunk_size))
            }
        };

        let total = file.size;
        let mut sent = 0u64;
        let counted = chunks.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                sent += bytes.len() as u64;
                on_progress(sent, total);
            }
            chunk
        });
        Ok(reqwest::Body::wrap_stream(counted))
    }
}

#[async_trait]
impl RemoteFs for HttpGateway {
    async fn list_directory(&self, server_id: &str, path: &str) -> Result<Listing, SftpError> {
        let response = self
            .client
            .get(self.files_url(server_id, ""))
            .query(&[("path", path)])
            .timeout(self.request_timeout)
            .send()
            .await?;
        let listing: Listing = check(response).await?.json().await?;
        debug!("Listed {}:{} ({} entries)", server_id, path, listing.entries.len());
        Ok(listing)
    }

    async fn read_file(&self, server_id: &str, path: &str) -> Result<String, SftpError> {
        let response = self
            .client
            .get(self.files_url(server_id, "/content"))
            .query(&[("path", path)])
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body: ContentResponse = check(response).await?.json().await?;
        Ok(body.content)
    }

    async fn write_file(
        &self,
        server_id: &str,
        path: &str,
        content: &str,
    ) -> Result<(), SftpError> {
        let response = self
            .client
            .put(self.files_url(server_id, "/content"))
            .json(&WriteRequest { path, content })
            .timeout(self.request_timeout)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, server_id: &str, path: &str) -> Result<(), SftpError> {
        let response = self
            .client
            .delete(self.files_url(server_id, ""))
            .query(&[("path", path)])
            .timeout(self.request_timeout)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn rename(
        &self,
        server_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), SftpError> {
        let response = self
            .client
            .post(self.files_url(server_id, "/rename"))
            .json(&RenameRequest { old_path, new_path })
            .timeout(self.request_timeout)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn create_directory(&self, server_id: &str, path: &str) -> Result<(), SftpError> {
        let response = self
            .client
            .post(self.files_url(server_id, "/mkdir"))
            .json(&PathRequest { path })
            .timeout(self.request_timeout)
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn upload_file(
        &self,
        server_id: &str,
        remote_dir: &str,
        file: &UploadFile,
        on_progress: ProgressFn,
        relay_task_id: Option<&str>,
        abort: CancellationToken,
    ) -> Result<FileEntry, SftpError> {
        let mut query = vec![("path", remote_dir), ("name", file.name.as_str())];
        if let Some(task_id) = relay_task_id {
            query.push(("task_id", task_id));
        }
        let mime = mime_guess::from_path(&file.name).first_or_octet_stream();
        let body = self.upload_body(file, on_progress).await?;

        let request = self
            .client
            .post(self.files_url(server_id, "/upload"))
            .query(&query)
            .header(CONTENT_TYPE, mime.as_ref())
            .header(CONTENT_LENGTH, file.size)
            .body(body)
            .send();

        // Dropping the in-flight request aborts it
        let response = tokio::select! {
            _ = abort.cancelled() => return Err(SftpError::TransferCancelled),
            response = request => response?,
        };
        let entry: FileEntry = check(response).await?.json().await?;
        info!(
            "Uploaded {} ({} bytes) to {}:{}",
            file.name, file.size, server_id, remote_dir
        );
        Ok(entry)
    }

    async fn download_file(
        &self,
        server_id: &str,
        path: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
        on_progress: ProgressFn,
        abort: CancellationToken,
    ) -> Result<u64, SftpError> {
        let request = self
            .client
            .get(self.files_url(server_id, "/download"))
            .query(&[("path", path)])
            .send();

        let response = tokio::select! {
            _ = abort.cancelled() => return Err(SftpError::TransferCancelled),
            response = request => response?,
        };
        let response = check(response).await?;
        let total = response.content_length().unwrap_or(0);
        let mut body = response.bytes_stream();
        let mut written = 0u64;

        loop {
            let chunk = tokio::select! {
                _ = abort.cancelled() => return Err(SftpError::TransferCancelled),
                chunk = body.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            sink.write_all(&chunk).await?;
            written += chunk.len() as u64;
            on_progress(written, total);
        }

        sink.flush().await?;
        info!("Downloaded {}:{} ({} bytes)", server_id, path, written);
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and hand back the raw request head
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn test_files_url() {
        let gateway = HttpGateway::new("http://gw.local:8080/").unwrap();
        assert_eq!(gateway.base_url(), "http://gw.local:8080");
        assert_eq!(
            gateway.files_url("srv-1", "/upload"),
            "http://gw.local:8080/api/servers/srv-1/files/upload"
        );
        assert_eq!(
            gateway.files_url("srv-1", ""),
            "http://gw.local:8080/api/servers/srv-1/files"
        );
    }

    #[test]
    fn test_extract_error_message() {
        let bad = StatusCode::BAD_REQUEST;
        assert_eq!(extract_error_message(bad, r#"{"detail":"bad path"}"#), "bad path");
        assert_eq!(extract_error_message(bad, r#"{"error":"denied"}"#), "denied");
        assert_eq!(extract_error_message(bad, "plain failure"), "plain failure");
        assert_eq!(extract_error_message(bad, ""), "400 Bad Request");
        assert_eq!(extract_error_message(bad, r#"{"code":7}"#), "400 Bad Request");
    }

    #[tokio::test]
    async fn test_list_directory_parses_listing() {
        let (base, server) = serve_once(
            "200 OK",
            r#"{"path":"/home","entries":[{"name":"docs","type":"directory","size":0,"modified":"2024-05-01T10:00:00Z"},{"name":"a.txt","type":"file","size":12,"modified":"2024-05-01T10:00:00Z","permissions":"rw-r--r--"}]}"#,
        )
        .await;
        let gateway = HttpGateway::new(base).unwrap();

        let listing = gateway.list_directory("srv-1", "/home").await.unwrap();
        assert_eq!(listing.path, "/home");
        assert_eq!(listing.entries.len(), 2);
        assert!(listing.entries[0].is_dir());
        assert_eq!(listing.entries[1].permissions.as_deref(), Some("rw-r--r--"));

        let request = server.await.unwrap();
        assert!(request.starts_with("GET /api/servers/srv-1/files?path=%2Fhome "));
    }

    #[tokio::test]
    async fn test_error_status_maps_to_error() {
        let (base, _server) = serve_once("404 Not Found", r#"{"detail":"no such file"}"#).await;
        let gateway = HttpGateway::new(base).unwrap();

        let err = gateway.delete("srv-1", "/tmp/x").await.unwrap_err();
        assert!(matches!(err, SftpError::NotFound(ref m) if m == "no such file"));
    }

    #[tokio::test]
    async fn test_upload_reports_progress_and_relay_id() {
        let (base, server) = serve_once(
            "201 Created",
            r#"{"name":"notes.txt","type":"file","size":10,"modified":"2024-05-01T10:00:00Z"}"#,
        )
        .await;
        let gateway = HttpGateway::new(base).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let progress: ProgressFn = {
            let seen = seen.clone();
            Arc::new(move |loaded, total| seen.lock().push((loaded, total)))
        };

        let entry = gateway
            .upload_file(
                "srv-1",
                "/home",
                &UploadFile::from_bytes("notes.txt", b"0123456789".to_vec()),
                progress,
                Some("task-1"),
                CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(entry.name, "notes.txt");

        let request = server.await.unwrap();
        assert!(request.contains("task_id=task-1"));
        assert!(request.to_lowercase().contains("content-type: text/plain"));
        assert_eq!(seen.lock().last(), Some(&(10, 10)));
    }

    #[tokio::test]
    async fn test_upload_aborted_before_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        // Accept but never answer
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            std::future::pending::<()>().await;
        });

        let gateway = HttpGateway::new(base).unwrap();
        let abort = CancellationToken::new();
        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let err = gateway
            .upload_file(
                "srv-1",
                "/home",
                &UploadFile::from_bytes("x.bin", vec![0u8; 16]),
                Arc::new(|_, _| {}),
                None,
                abort,
            )
            .await
            .unwrap_err();
        assert!(err.is_abort());
    }
}
