//! HTTP transport for ESP32-CAM style devices.
//!
//! Capture is a plain GET returning the JPEG body; status is a GET
//! returning a JSON object with a numeric `framesize`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::{future::Future, time::Duration};

use crate::config::Device;

use super::client::{CameraClient, CaptureError, DeviceStatus};
use super::framesize::framesize_label;

#[derive(Debug, Clone)]
pub struct HttpCameraClient {
    http: reqwest::Client,
}

impl HttpCameraClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("camwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }

    async fn get(&self, url: &str, timeout: Duration) -> Result<reqwest::Response, CaptureError> {
        let resp = self
            .http
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| map_reqwest_error(err, timeout))?;
        check_status(&resp)?;
        Ok(resp)
    }
}

#[async_trait]
impl CameraClient for HttpCameraClient {
    async fn capture(&self, device: &Device, attempt_id: &str) -> Result<Vec<u8>, CaptureError> {
        let url = device.capture_url_for(attempt_id);
        bounded(device.timeout, async {
            let resp = self.get(&url, device.timeout).await?;
            let body = resp
                .bytes()
                .await
                .map_err(|err| map_reqwest_error(err, device.timeout))?;
            if body.is_empty() {
                return Err(CaptureError::ProtocolError("empty capture body".into()));
            }
            Ok(body.to_vec())
        })
        .await
    }

    async fn status(&self, device: &Device) -> Result<DeviceStatus, CaptureError> {
        let Some(url) = device.status_url.as_deref() else {
            return Err(CaptureError::ProtocolError(
                "no status endpoint configured".into(),
            ));
        };
        bounded(device.timeout, async {
            let resp = self.get(url, device.timeout).await?;
            let raw: serde_json::Value = resp
                .json()
                .await
                .map_err(|err| map_reqwest_error(err, device.timeout))?;
            let framesize = raw
                .get("framesize")
                .and_then(serde_json::Value::as_u64)
                .map(framesize_label);
            Ok(DeviceStatus { framesize, raw })
        })
        .await
    }
}

/// Hard ceiling on a whole request, body included.
async fn bounded<F, T>(timeout: Duration, fut: F) -> Result<T, CaptureError>
where
    F: Future<Output = Result<T, CaptureError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(CaptureError::Timeout(timeout)),
    }
}

fn check_status(resp: &reqwest::Response) -> Result<(), CaptureError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let reason = format!(
        "HTTP {} {}",
        status.as_u16(),
        status.canonical_reason().unwrap_or("Unknown")
    );
    if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
        Err(CaptureError::DeviceBusy(reason))
    } else {
        Err(CaptureError::ProtocolError(reason))
    }
}

fn map_reqwest_error(err: reqwest::Error, timeout: Duration) -> CaptureError {
    if err.is_timeout() {
        CaptureError::Timeout(timeout)
    } else if err.is_decode() || err.is_builder() {
        CaptureError::ProtocolError(err.to_string())
    } else {
        CaptureError::Unreachable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::freshness::Thresholds;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn device(base: &str, timeout: Duration) -> Device {
        Device {
            id: "porch".into(),
            capture_url: format!("{base}/capture?id={{}}"),
            status_url: Some(format!("{base}/status")),
            poll_interval: Duration::from_secs(5),
            timeout,
            max_backoff: Duration::from_secs(60),
            thresholds: Thresholds::new(Duration::from_secs(30), Duration::from_secs(90))
                .unwrap(),
            rotation: None,
        }
    }

    /// Serves one canned response per connection, after an optional delay.
    async fn serve(response: &'static [u8], delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = socket.read(&mut buf).await;
                    tokio::time::sleep(delay).await;
                    let _ = socket.write_all(response).await;
                    let _ = socket.shutdown().await;
                });
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn capture_returns_body() {
        let base = serve(
            b"HTTP/1.1 200 OK\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\nConnection: close\r\n\r\nJPEG",
            Duration::ZERO,
        )
        .await;
        let client = HttpCameraClient::new().unwrap();
        let bytes = client
            .capture(&device(&base, Duration::from_secs(5)), "a1")
            .await
            .unwrap();
        assert_eq!(bytes, b"JPEG");
    }

    #[tokio::test]
    async fn service_unavailable_is_device_busy() {
        let base = serve(
            b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;
        let client = HttpCameraClient::new().unwrap();
        let err = client
            .capture(&device(&base, Duration::from_secs(5)), "a1")
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::DeviceBusy(_)));
    }

    #[tokio::test]
    async fn not_found_is_protocol_error_and_empty_body_too() {
        let base = serve(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;
        let client = HttpCameraClient::new().unwrap();
        let err = client
            .capture(&device(&base, Duration::from_secs(5)), "a1")
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::ProtocolError(_)));

        let empty = serve(
            b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
            Duration::ZERO,
        )
        .await;
        let err = client
            .capture(&device(&empty, Duration::from_secs(5)), "a1")
            .await
            .unwrap_err();
        assert_eq!(err, CaptureError::ProtocolError("empty capture body".into()));
    }

    #[tokio::test]
    async fn slow_device_times_out() {
        let base = serve(
            b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nJPEG",
            Duration::from_secs(2),
        )
        .await;
        let client = HttpCameraClient::new().unwrap();
        let timeout = Duration::from_millis(200);
        let err = client.capture(&device(&base, timeout), "a1").await.unwrap_err();
        assert_eq!(err, CaptureError::Timeout(timeout));
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpCameraClient::new().unwrap();
        let err = client
            .capture(&device(&format!("http://{addr}"), Duration::from_secs(5)), "a1")
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::Unreachable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn status_reports_framesize() {
        let base = serve(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 28\r\nConnection: close\r\n\r\n{\"framesize\":8,\"quality\":10}",
            Duration::ZERO,
        )
        .await;
        let client = HttpCameraClient::new().unwrap();
        let status = client
            .status(&device(&base, Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(status.framesize.as_deref(), Some("VGA(640x480)"));
        assert_eq!(status.raw["quality"], 10);
    }
}
