//! Direct network access to the admin interface via the allocation IP.

use std::time::Duration;

use async_trait::async_trait;

use crate::admin::error::{AdminError, Result};

/// Transport for admin requests that go straight to `ip:port`.
#[async_trait]
pub trait DirectTransport: Send + Sync {
    /// GET `path` and return the response body.
    async fn get(&self, ip: &str, port: u16, path: &str) -> Result<Vec<u8>>;

    /// POST to `path` with an empty body.
    async fn post(&self, ip: &str, port: u16, path: &str) -> Result<()>;
}

/// [`DirectTransport`] over plain HTTP using reqwest.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client }
    }

    fn url(ip: &str, port: u16, path: &str) -> String {
        format!("http://{}:{}{}", ip, port, path)
    }

    async fn check(path: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(AdminError::Status {
            path: path.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl DirectTransport for HttpTransport {
    async fn get(&self, ip: &str, port: u16, path: &str) -> Result<Vec<u8>> {
        let url = Self::url(ip, port, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| AdminError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        let response = Self::check(path, response).await?;
        let body = response.bytes().await.map_err(|e| AdminError::Request {
            url,
            reason: format!("failed to read response: {}", e),
        })?;
        Ok(body.to_vec())
    }

    async fn post(&self, ip: &str, port: u16, path: &str) -> Result<()> {
        let url = Self::url(ip, port, path);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await
            .map_err(|e| AdminError::Request {
                url,
                reason: e.to_string(),
            })?;
        Self::check(path, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on an ephemeral port.
    async fn serve_once(response: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        port
    }

    #[tokio::test]
    async fn test_get_returns_body() {
        let port = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Length: 11\r\nConnection: close\r\n\r\n{\"ok\":true}",
        )
        .await;
        let transport = HttpTransport::new(Duration::from_secs(5));
        let body = transport.get("127.0.0.1", port, "/stats").await.unwrap();
        assert_eq!(body, br#"{"ok":true}"#);
    }

    #[tokio::test]
    async fn test_get_error_status() {
        let port = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 4\r\nConnection: close\r\n\r\nbusy",
        )
        .await;
        let transport = HttpTransport::new(Duration::from_secs(5));
        let err = transport.get("127.0.0.1", port, "/stats").await.unwrap_err();
        match err {
            AdminError::Status { path, status, body } => {
                assert_eq!(path, "/stats");
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_post_success() {
        let port = serve_once("HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let transport = HttpTransport::new(Duration::from_secs(5));
        transport
            .post("127.0.0.1", port, "/logging?level=debug")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_connection_refused_is_request_error() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let transport = HttpTransport::new(Duration::from_secs(2));
        let err = transport.get("127.0.0.1", port, "/stats").await.unwrap_err();
        assert!(matches!(err, AdminError::Request { .. }));
    }
}
