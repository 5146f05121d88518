//! Upload phase: one multipart POST of the whole file.

use reqwest::{
    Client,
    multipart::{Form, Part},
};
use std::{path::Path, time::Duration};
use tokio_util::sync::CancellationToken;

use super::{LogSink, ProgressFn, UploadError};

pub const UPLOAD_URL: &str = "https://jonesfilesandfootmassage.com/";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Longest slice of a response body echoed into the log.
const BODY_PREVIEW: usize = 200;

fn preview(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

pub struct Uploader {
    http: Client,
    endpoint: String,
    cancel: CancellationToken,
    log: Option<LogSink>,
}

impl Uploader {
    pub fn new(cancel: CancellationToken, log: Option<LogSink>) -> Self {
        // A client that cannot be built only loses the timeout.
        let http = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("http client with timeout failed: {e}");
                Client::new()
            });
        Self {
            http,
            endpoint: UPLOAD_URL.to_string(),
            cancel,
            log,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn log(&self, msg: &str) {
        if let Some(sink) = &self.log {
            sink(&format!("[upload] {msg}"));
        }
    }

    /// Staged progress: 0 before reading, 50 once read, 90 on response, 100 on success.
    pub async fn upload(
        &self,
        path: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<String, UploadError> {
        if !path.exists() {
            return Err(UploadError::Failed(format!(
                "File not found: {}",
                path.display()
            )));
        }
        let size = tokio::fs::metadata(path)
            .await
            .map_err(|e| UploadError::Failed(format!("Upload error: {e}")))?
            .len();
        if size == 0 {
            return Err(UploadError::Failed("Cannot upload empty file".into()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());

        on_progress(0.0);
        self.log(&format!("Starting upload to {}", self.endpoint));
        self.log(&format!(
            "File: {name} ({:.2} MB)",
            size as f64 / (1024.0 * 1024.0)
        ));
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.log("Reading file...");
        let content = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::Failed(format!("Upload error: {e}")))?;
        on_progress(50.0);
        self.log("File read complete");
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled);
        }

        self.log("Uploading to server...");
        let form = Form::new().part("file", Part::bytes(content).file_name(name));
        let request = self.http.post(&self.endpoint).multipart(form).send();
        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            r = request => r.map_err(|e| self.transport_error(e))?,
        };
        on_progress(90.0);

        let status = response.status();
        self.log(&format!("Server response: {}", status.as_u16()));
        let body = tokio::select! {
            _ = self.cancel.cancelled() => return Err(UploadError::Cancelled),
            b = response.text() => b.map_err(|e| self.transport_error(e))?,
        };

        if !status.is_success() {
            self.log(&format!(
                "ERROR: Upload failed - {}",
                preview(&body, BODY_PREVIEW)
            ));
            return Err(UploadError::Failed(format!(
                "Upload failed with status {}",
                status.as_u16()
            )));
        }

        let url = body.trim();
        if !url.starts_with("http") {
            let shown = preview(url, 100);
            self.log(&format!("ERROR: Unexpected response - {shown}"));
            return Err(UploadError::Failed(format!("Unexpected response: {shown}")));
        }

        on_progress(100.0);
        self.log(&format!("Upload complete: {url}"));
        Ok(url.to_string())
    }

    fn transport_error(&self, e: reqwest::Error) -> UploadError {
        if e.is_timeout() {
            self.log("ERROR: Upload timed out");
            UploadError::Failed("Upload timed out - file may be too large".into())
        } else {
            self.log(&format!("ERROR: Network error - {e}"));
            UploadError::Failed(format!("Network error: {e}"))
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpListener,
    };

    /// One-shot HTTP server: reads a full request, answers with `status` and `body`.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 8192];
            loop {
                let n = sock.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (k, v) = l.split_once(':')?;
                            k.eq_ignore_ascii_case("content-length")
                                .then(|| v.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }
            let reply = format!(
                "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(reply.as_bytes()).await.unwrap();
            buf
        });
        (format!("http://{addr}/"), handle)
    }

    fn uploader(endpoint: &str) -> (Uploader, Arc<Mutex<Vec<String>>>) {
        let logs = Arc::new(Mutex::new(Vec::new()));
        let sink = logs.clone();
        let log: LogSink = Arc::new(move |l: &str| sink.lock().unwrap().push(l.to_string()));
        (
            Uploader::new(CancellationToken::new(), Some(log)).with_endpoint(endpoint),
            logs,
        )
    }

    #[tokio::test]
    async fn test_missing_and_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let (up, _) = uploader("http://127.0.0.1:9/");

        let err = up
            .upload(&dir.path().join("nope.mp4"), &mut |_: f64| {})
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("File not found: "));

        let empty = dir.path().join("empty.mp4");
        std::fs::write(&empty, b"").unwrap();
        let err = up.upload(&empty, &mut |_: f64| {}).await.unwrap_err();
        assert_eq!(err, UploadError::Failed("Cannot upload empty file".into()));
    }

    #[tokio::test]
    async fn test_success_reports_all_stages() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"video bytes").unwrap();

        let (endpoint, server) = serve_once("200 OK", "  https://files.example/abc\n").await;
        let (up, logs) = uploader(&endpoint);
        let mut stages = Vec::new();
        let url = up
            .upload(&file, &mut |p: f64| stages.push(p))
            .await
            .unwrap();
        assert_eq!(url, "https://files.example/abc");
        assert_eq!(stages, vec![0.0, 50.0, 90.0, 100.0]);

        let request = String::from_utf8_lossy(&server.await.unwrap()).to_string();
        assert!(request.contains("name=\"file\""));
        assert!(request.contains("filename=\"clip.mp4\""));
        assert!(request.contains("video bytes"));
        assert!(logs.lock().unwrap().iter().all(|l| l.starts_with("[upload] ")));
    }

    #[tokio::test]
    async fn test_bad_status_and_bad_body() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();

        let (endpoint, _server) = serve_once("500 Internal Server Error", "oops").await;
        let (up, _) = uploader(&endpoint);
        let err = up.upload(&file, &mut |_: f64| {}).await.unwrap_err();
        assert_eq!(err, UploadError::Failed("Upload failed with status 500".into()));

        let (endpoint, _server) = serve_once("200 OK", "<html>not a link</html>").await;
        let (up, _) = uploader(&endpoint);
        let err = up.upload(&file, &mut |_: f64| {}).await.unwrap_err();
        assert_eq!(
            err,
            UploadError::Failed("Unexpected response: <html>not a link</html>".into())
        );
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();
        // Bind then drop to get a port nobody listens on.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let (up, _) = uploader(&format!("http://127.0.0.1:{port}/"));
        let err = up.upload(&file, &mut |_: f64| {}).await.unwrap_err();
        assert!(err.to_string().starts_with("Network error: "));
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();
        let (up, _) = uploader("http://127.0.0.1:9/");
        up.cancel();
        let err = up.upload(&file, &mut |_: f64| {}).await.unwrap_err();
        assert!(err.is_cancelled());
    }
}
