//! sm.ms image hosting client
//!
//! Turns a local image file into a public URL with a single multipart upload.
//! An "already uploaded" answer is a success carrying the existing URL.

use crate::config::SMMS_UPLOAD_PATH;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// API code sm.ms returns when the same image was uploaded before
pub const IMAGE_REPEATED_CODE: &str = "image_repeated";

/// Errors that can occur while uploading an image
#[derive(Debug, Error)]
pub enum UploadError {
    /// The local file could not be read
    #[error("Failed to read image file: {0}")]
    Io(#[from] std::io::Error),
    /// Error during network communication
    #[error("Network error: {0}")]
    Network(String),
    /// The request did not complete within the configured timeout
    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),
    /// Non-2xx HTTP status
    #[error("HTTP error: {status} - {body}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Truncated response body
        body: String,
    },
    /// The API reported a failure
    #[error("API error ({code}): {message}")]
    Api {
        /// API error code
        code: String,
        /// Human readable message from the API
        message: String,
    },
    /// The response did not match the documented shape
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),
}

/// Remote image hosting, abstracted for the event router
#[async_trait]
pub trait ImageHost: Send + Sync {
    /// Upload the file at `path` and return its public URL
    ///
    /// The caller owns the file and removes it afterwards.
    async fn upload(&self, path: &Path) -> Result<String, UploadError>;
}

#[derive(Debug, Deserialize)]
struct SmmsResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<SmmsData>,
    #[serde(default)]
    images: Option<SmmsImages>,
}

#[derive(Debug, Deserialize)]
struct SmmsData {
    url: String,
}

/// `images` is a single URL in the current API and a list in older revisions
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SmmsImages {
    One(String),
    Many(Vec<String>),
}

impl SmmsImages {
    fn primary(&self) -> Option<&str> {
        match self {
            Self::One(url) => Some(url.as_str()),
            Self::Many(urls) => urls.first().map(String::as_str),
        }
    }
}

/// Client for the sm.ms v2 upload API
pub struct SmmsClient {
    http_client: HttpClient,
    upload_url: String,
    api_key: String,
    timeout: Duration,
}

impl SmmsClient {
    /// Create a client for `api_base` authenticated with `api_key`
    ///
    /// # Errors
    ///
    /// Returns `UploadError::Network` if the HTTP client cannot be built.
    pub fn new(api_key: &str, api_base: &str, timeout: Duration) -> Result<Self, UploadError> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UploadError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            upload_url: format!("{}{SMMS_UPLOAD_PATH}", api_base.trim_end_matches('/')),
            api_key: api_key.to_string(),
            timeout,
        })
    }

    fn map_send_error(&self, e: &reqwest::Error) -> UploadError {
        if e.is_timeout() {
            UploadError::Timeout(self.timeout)
        } else {
            UploadError::Network(e.to_string())
        }
    }

    fn interpret(body: SmmsResponse) -> Result<String, UploadError> {
        if body.success {
            return body
                .data
                .map(|d| d.url)
                .ok_or_else(|| UploadError::InvalidResponse("success without data.url".into()));
        }

        let code = body.code.unwrap_or_default();
        if code == IMAGE_REPEATED_CODE {
            return body
                .images
                .as_ref()
                .and_then(SmmsImages::primary)
                .map(ToString::to_string)
                .ok_or_else(|| {
                    UploadError::InvalidResponse("image_repeated without images".into())
                });
        }

        Err(UploadError::Api {
            code,
            message: body.message.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ImageHost for SmmsClient {
    async fn upload(&self, path: &Path) -> Result<String, UploadError> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "image".to_string(), |n| n.to_string_lossy().into_owned());
        debug!(path = %path.display(), size = bytes.len(), "Uploading image to sm.ms");

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_for_path(path))
            .map_err(|e| UploadError::Network(e.to_string()))?;
        let form = Form::new().part("smfile", part);

        let response = self
            .http_client
            .post(&self.upload_url)
            .header("Authorization", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_send_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = crate::utils::truncate_str(&body, 500);
            error!(status = status.as_u16(), body = %body, "sm.ms upload rejected");
            return Err(UploadError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: SmmsResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                UploadError::Timeout(self.timeout)
            } else {
                UploadError::InvalidResponse(e.to_string())
            }
        })?;

        match Self::interpret(body) {
            Ok(url) => {
                info!(url = %url, "Image uploaded");
                Ok(url)
            }
            Err(e) => {
                warn!(error = %e, "sm.ms reported upload failure");
                Err(e)
            }
        }
    }
}

fn mime_for_path(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn image_file() -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".png")
            .tempfile()
            .expect("temp file");
        file.write_all(b"\x89PNG fake image").expect("write");
        file
    }

    fn client(server: &MockServer) -> SmmsClient {
        SmmsClient::new("test-key", &server.uri(), Duration::from_secs(5)).expect("client")
    }

    #[tokio::test]
    async fn test_success_returns_data_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/upload"))
            .and(header("Authorization", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "code": "success",
                "message": "Upload success.",
                "data": { "url": "https://s2.loli.net/2024/01/01/abc.png" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let file = image_file();
        let url = client(&server).upload(file.path()).await.expect("upload");
        assert_eq!(url, "https://s2.loli.net/2024/01/01/abc.png");
    }

    #[tokio::test]
    async fn test_repeated_image_returns_existing_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "code": "image_repeated",
                "message": "Image upload repeated limit.",
                "images": "https://s2.loli.net/existing.png"
            })))
            .mount(&server)
            .await;

        let file = image_file();
        let url = client(&server).upload(file.path()).await.expect("upload");
        assert_eq!(url, "https://s2.loli.net/existing.png");
    }

    #[tokio::test]
    async fn test_repeated_image_list_takes_first() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "code": "image_repeated",
                "images": ["https://x/first.png", "https://x/second.png"]
            })))
            .mount(&server)
            .await;

        let file = image_file();
        let url = client(&server).upload(file.path()).await.expect("upload");
        assert_eq!(url, "https://x/first.png");
    }

    #[tokio::test]
    async fn test_api_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "code": "unauthorized",
                "message": "Get token failed."
            })))
            .mount(&server)
            .await;

        let file = image_file();
        let err = client(&server).upload(file.path()).await.expect_err("upload should fail");
        assert!(matches!(err, UploadError::Api { ref code, .. } if code == "unauthorized"));
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let file = image_file();
        let err = client(&server).upload(file.path()).await.expect_err("upload should fail");
        assert!(matches!(err, UploadError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let file = image_file();
        let err = client(&server).upload(file.path()).await.expect_err("upload should fail");
        assert!(matches!(err, UploadError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "success": true }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client =
            SmmsClient::new("k", &server.uri(), Duration::from_millis(200)).expect("client");
        let file = image_file();
        let err = client.upload(file.path()).await.expect_err("upload should fail");
        assert!(matches!(err, UploadError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let server = MockServer::start().await;
        let err = client(&server)
            .upload(Path::new("/nonexistent/image.png"))
            .await
            .expect_err("upload should fail");
        assert!(matches!(err, UploadError::Io(_)));
    }

    #[test]
    fn test_mime_guess() {
        assert_eq!(mime_for_path(Path::new("a.JPG")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("a.webp")), "image/webp");
        assert_eq!(mime_for_path(Path::new("noext")), "application/octet-stream");
    }
}
