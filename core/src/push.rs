//! Push delivery to subscribed clients
//!
//! A subscription is the object a client registered with its push service:
//! the endpoint plus the client's encryption keys. Delivery encrypts the JSON
//! [`PushPayload`] for those keys (`aes128gcm`), signs the request with the
//! server's VAPID key and POSTs it to the endpoint.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use web_push::{
    request_builder, ContentEncoding, PartialVapidSignatureBuilder, SubscriptionInfo,
    VapidSignatureBuilder, WebPushMessage, WebPushMessageBuilder,
};

use crate::types::{Job, JobStatus, ServiceType};
use crate::PushError;

/// Icon used when none is configured
pub const DEFAULT_ICON: &str = "/images/icon-192x192.png";

/// Client-provided delivery endpoint and encryption keys
///
/// Unknown members such as `expirationTime` are kept as they came.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keys: Option<PushKeys>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Base64url client keys: ECDH public key and authentication secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

impl PushSubscription {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            keys: None,
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_keys(mut self, p256dh: impl Into<String>, auth: impl Into<String>) -> Self {
        self.keys = Some(PushKeys {
            p256dh: p256dh.into(),
            auth: auth.into(),
        });
        self
    }
}

/// Notification body sent to every subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    /// Job id, so repeated notifications for a job collapse
    pub tag: String,
    pub data: PushData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushData {
    pub url: String,
    pub job_id: String,
    pub status: JobStatus,
    pub service_type: ServiceType,
}

impl PushPayload {
    /// Payload announcing a job's terminal state
    pub fn for_job(job: &Job, icon: &str) -> Self {
        let service = job.service_type.display_name();
        let (title, body) = match job.status {
            JobStatus::Failed => (
                "Download failed".to_string(),
                format!(
                    "{} download failed: {}",
                    service,
                    job.error.as_deref().unwrap_or("unknown error")
                ),
            ),
            JobStatus::Completed => {
                let name = job
                    .produced_file_path
                    .as_deref()
                    .and_then(|path| path.rsplit('/').next())
                    .filter(|name| !name.is_empty());
                let body = match name {
                    Some(name) => format!("{} download finished: {}", service, name),
                    None => format!("{} download finished successfully", service),
                };
                ("Download completed".to_string(), body)
            }
            JobStatus::Pending => (
                "Download started".to_string(),
                format!("{} download queued", service),
            ),
        };

        Self {
            title,
            body,
            icon: icon.to_string(),
            tag: job.id.clone(),
            data: PushData {
                url: job.url.clone(),
                job_id: job.id.clone(),
                status: job.status,
                service_type: job.service_type,
            },
        }
    }
}

/// Delivers one payload to one subscription
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}

/// Sends encrypted, VAPID-signed notifications over HTTP
#[derive(Clone)]
pub struct WebPushSender {
    client: Client,
    vapid: PartialVapidSignatureBuilder,
    /// `sub` claim, a `mailto:` or `https:` contact for the push service
    contact: Option<String>,
    ttl_seconds: u32,
}

impl WebPushSender {
    /// `private_key` is the raw P-256 scalar, base64url encoded
    pub fn new(
        private_key: &str,
        contact: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PushError> {
        let vapid =
            VapidSignatureBuilder::from_base64_no_sub(private_key.trim(), web_push::URL_SAFE_NO_PAD)
                .map_err(|e| PushError::Failed(format!("invalid VAPID private key: {}", e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PushError::Failed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            vapid,
            contact,
            ttl_seconds: 24 * 60 * 60,
        })
    }

    fn message(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<WebPushMessage, PushError> {
        let keys = subscription
            .keys
            .as_ref()
            .ok_or_else(|| PushError::Failed("subscription has no encryption keys".into()))?;
        let info = SubscriptionInfo::new(
            subscription.endpoint.as_str(),
            keys.p256dh.as_str(),
            keys.auth.as_str(),
        );
        let body = serde_json::to_vec(payload)
            .map_err(|e| PushError::Failed(format!("failed to encode payload: {}", e)))?;

        let mut signature = self.vapid.clone().add_sub_info(&info);
        if let Some(contact) = &self.contact {
            signature.add_claim("sub", contact.as_str());
        }
        let signature = signature
            .build()
            .map_err(|e| PushError::Failed(format!("VAPID signing failed: {}", e)))?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(self.ttl_seconds);
        builder.set_payload(ContentEncoding::Aes128Gcm, &body);
        builder.set_vapid_signature(signature);
        builder
            .build()
            .map_err(|e| PushError::Failed(format!("failed to encrypt payload: {}", e)))
    }
}

#[async_trait]
impl PushSender for WebPushSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        debug!(endpoint = %subscription.endpoint, tag = %payload.tag, "Sending push notification");

        let message = self.message(subscription, payload)?;
        let (parts, body) = request_builder::build_request::<Vec<u8>>(message).into_parts();

        let mut request = self.client.post(parts.uri.to_string());
        for (name, value) in parts.headers.iter() {
            // reqwest sets the length from the body
            if name.as_str() != "content-length" {
                request = request.header(name.as_str(), value.as_bytes());
            }
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| PushError::Failed(format!("request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(PushError::Gone {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown".to_string());
            return Err(PushError::Failed(format!("{} - {}", status, body.trim())));
        }

        info!(endpoint = %subscription.endpoint, "Push notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobOutcome;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    fn job() -> Job {
        Job::new("1700000000000", "https://youtu.be/abc123", ServiceType::Youtube)
    }

    #[test]
    fn test_completed_payload() {
        let mut job = job();
        job.finish(JobOutcome::Completed {
            produced_file: Some("/music/yt-dlp/Song.mp3".into()),
        })
        .unwrap();

        let payload = PushPayload::for_job(&job, DEFAULT_ICON);
        assert_eq!(payload.title, "Download completed");
        assert_eq!(payload.body, "YouTube download finished: Song.mp3");
        assert_eq!(payload.tag, job.id);

        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["data"]["jobId"], "1700000000000");
        assert_eq!(value["data"]["status"], "completed");
        assert_eq!(value["data"]["serviceType"], "youtube");
        assert_eq!(value["data"]["url"], "https://youtu.be/abc123");
        assert_eq!(value["icon"], DEFAULT_ICON);
    }

    #[test]
    fn test_failed_payload_names_error() {
        let mut job = job();
        job.finish(JobOutcome::failed("Video unavailable")).unwrap();

        let payload = PushPayload::for_job(&job, "/icon.png");
        assert_eq!(payload.title, "Download failed");
        assert!(payload.body.contains("Video unavailable"));
        assert_eq!(payload.data.status, JobStatus::Failed);
    }

    #[test]
    fn test_subscription_keys_and_extra_members() {
        let raw = serde_json::json!({
            "endpoint": "https://push.example.com/abc",
            "expirationTime": null,
            "keys": {"p256dh": "k", "auth": "a"}
        });
        let sub: PushSubscription = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(sub.endpoint, "https://push.example.com/abc");
        assert_eq!(
            sub.keys,
            Some(PushKeys {
                p256dh: "k".into(),
                auth: "a".into()
            })
        );
        assert_eq!(serde_json::to_value(&sub).unwrap(), raw);
    }

    // Generated P-256 key material
    const VAPID_PRIVATE: &str = "ymSLbEC0xQcVjUdMeF6f-cEFm9c5AVuApWlGwhKQ3O0";
    const VAPID_PUBLIC: &str =
        "BLcSPIyiZOaRU15_G9rbqBJfrja4hAZUbYjP9RZYoY5wtXKV09O7CWSF_2mZZ30w3_tkr1aAqsrB6TMqEPSoyBI";
    const CLIENT_P256DH: &str =
        "BEQII-KlY48r3konO-DtNHgTAdfy4Bs-aaj-nqZWeF4ILQJ1wvMKhXjDyuTHLTICLfD0e0TNwVMAftn5G5asfss";
    const CLIENT_AUTH: &str = "m-3YhuqcsgOAb7KDGRnQag";

    fn sender() -> WebPushSender {
        WebPushSender::new(
            VAPID_PRIVATE,
            Some("mailto:admin@example.com".into()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn completed_payload() -> PushPayload {
        let mut job = job();
        job.finish(JobOutcome::Completed {
            produced_file: Some("/music/Song.mp3".into()),
        })
        .unwrap();
        PushPayload::for_job(&job, DEFAULT_ICON)
    }

    fn request_complete(raw: &[u8]) -> bool {
        let Some(end) = raw.windows(4).position(|w| w == b"\r\n\r\n") else {
            return false;
        };
        let head = String::from_utf8_lossy(&raw[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        raw.len() >= end + 4 + length
    }

    /// Accepts one request, answers with `status` and hands back the raw bytes
    async fn push_service(status: &'static str) -> (String, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            while !request_complete(&raw) {
                let n = stream.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
            }
            let reply = format!(
                "HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
                status
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            raw
        });
        (format!("http://{}/push/abc", addr), handle)
    }

    #[tokio::test]
    async fn test_delivery_is_signed_and_encrypted() {
        let (endpoint, service) = push_service("201 Created").await;
        let subscription = PushSubscription::new(endpoint).with_keys(CLIENT_P256DH, CLIENT_AUTH);

        sender()
            .send(&subscription, &completed_payload())
            .await
            .unwrap();

        let raw = service.await.unwrap();
        let end = raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap();
        let head = String::from_utf8_lossy(&raw[..end]).to_string();
        let lower = head.to_ascii_lowercase();
        let body = &raw[end + 4..];

        assert!(lower.starts_with("post /push/abc "));
        assert!(lower.contains("authorization: vapid t="));
        assert!(head.contains(&format!("k={}", VAPID_PUBLIC)));
        assert!(lower.contains("content-encoding: aes128gcm"));
        assert!(lower.contains("ttl: 86400"));
        assert!(!body.is_empty());
        let plain = String::from_utf8_lossy(body);
        assert!(!plain.contains("Download completed"));
        assert!(!plain.contains("Song.mp3"));
    }

    #[tokio::test]
    async fn test_gone_endpoint() {
        let (endpoint, service) = push_service("410 Gone").await;
        let subscription = PushSubscription::new(endpoint).with_keys(CLIENT_P256DH, CLIENT_AUTH);

        let result = sender().send(&subscription, &completed_payload()).await;
        assert_eq!(result, Err(PushError::Gone { status: 410 }));
        service.await.unwrap();
    }

    #[tokio::test]
    async fn test_subscription_without_keys_is_not_sent() {
        let subscription = PushSubscription::new("http://127.0.0.1:9/push/abc");
        let result = sender().send(&subscription, &completed_payload()).await;
        assert!(matches!(result, Err(PushError::Failed(msg)) if msg.contains("encryption keys")));
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let result = WebPushSender::new("not a key", None, Duration::from_secs(5));
        assert!(matches!(result, Err(PushError::Failed(_))));
    }
}
