//! Partner clinical API transport.
//!
//! A report body for this transport is newline-delimited JSON, one message
//! per line. Each message is an item, named by its zero-based index among the
//! non-blank lines, so a retry resends only the messages that did not go
//! through the first time.

use std::any::Any;
use std::collections::HashSet;

use async_trait::async_trait;
use relay_core::{
    sends_everything, ActionHistory, Receiver, RedoxTransportConfig, RetryItems, SentReport,
    TransportConfig, TransportKind,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{downcast_session, Delivery, Transport, TransportError, TransportSession};

pub const DEFAULT_REDOX_BASE_URL: &str = "https://api.redoxengine.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    api_key: &'a str,
    secret: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    access_token: String,
}

/// Authenticated connection for one batch.
pub struct RedoxSession {
    base_url: String,
    access_token: String,
}

#[async_trait]
impl TransportSession for RedoxSession {
    async fn close(self: Box<Self>) -> Result<(), TransportError> {
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// How the API answered one message.
#[derive(Debug, PartialEq, Eq)]
enum MessageOutcome {
    Accepted,
    /// Transient; send again later.
    Retry(String),
    /// Permanent; sending again would not help.
    Rejected(String),
}

fn classify(status: StatusCode) -> MessageOutcome {
    if status.is_success() {
        MessageOutcome::Accepted
    } else if status.is_server_error()
        || status == StatusCode::UNAUTHORIZED
        || status == StatusCode::TOO_MANY_REQUESTS
    {
        MessageOutcome::Retry(format!("status {status}"))
    } else {
        MessageOutcome::Rejected(format!("status {status}"))
    }
}

pub struct RedoxTransport {
    client: Client,
    base_url: String,
    secret: String,
}

impl RedoxTransport {
    /// `base_url` is used for receivers that do not configure their own.
    pub fn new(client: Client, base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            secret: secret.into(),
        }
    }

    fn config<'r>(receiver: &'r Receiver) -> Result<&'r RedoxTransportConfig, TransportError> {
        match &receiver.transport {
            Some(TransportConfig::Redox(config)) => Ok(config),
            _ => Err(TransportError::Misconfigured {
                receiver: receiver.full_name.clone(),
                transport: TransportKind::Redox,
            }),
        }
    }

    async fn post_message(&self, session: &RedoxSession, message: &str) -> MessageOutcome {
        let result = self
            .client
            .post(format!("{}/endpoint", session.base_url))
            .bearer_auth(&session.access_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await;
        match result {
            Ok(response) => classify(response.status()),
            Err(err) => MessageOutcome::Retry(err.to_string()),
        }
    }
}

#[async_trait]
impl Transport for RedoxTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Redox
    }

    async fn start_session(
        &self,
        receiver: &Receiver,
    ) -> Result<Option<Box<dyn TransportSession>>, TransportError> {
        let config = Self::config(receiver)?;
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| self.base_url.clone());
        let endpoint = format!("{base_url}/auth/authenticate");

        let response = self
            .client
            .post(&endpoint)
            .json(&AuthRequest {
                api_key: &config.api_key,
                secret: &self.secret,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Authentication {
                endpoint,
                reason: format!("status {status}"),
            });
        }
        let auth: AuthResponse = response.json().await?;
        debug!(receiver = %receiver.full_name, "authenticated with partner API");

        Ok(Some(Box::new(RedoxSession {
            base_url,
            access_token: auth.access_token,
        })))
    }

    async fn send(
        &self,
        delivery: &Delivery<'_>,
        session: Option<&mut dyn TransportSession>,
        history: &mut ActionHistory,
    ) -> Result<RetryItems, TransportError> {
        let session = downcast_session::<RedoxSession>(session, self.kind())?;
        let header = delivery.header;
        let body = String::from_utf8_lossy(&header.body);

        let wanted: Option<HashSet<&str>> = if sends_everything(delivery.retry_items) {
            None
        } else {
            delivery
                .retry_items
                .map(|items| items.iter().map(String::as_str).collect())
        };

        let mut remaining = RetryItems::new();
        let mut accepted = 0;
        let messages = body.lines().map(str::trim).filter(|line| !line.is_empty());
        for (index, message) in messages.enumerate() {
            let item = index.to_string();
            if wanted.as_ref().is_some_and(|wanted| !wanted.contains(item.as_str())) {
                continue;
            }
            match self.post_message(session, message).await {
                MessageOutcome::Accepted => accepted += 1,
                MessageOutcome::Retry(reason) => {
                    warn!(report_id = %header.report_id, item = %item, reason = %reason, "message not delivered");
                    remaining.push(item);
                }
                MessageOutcome::Rejected(reason) => {
                    warn!(report_id = %header.report_id, item = %item, reason = %reason, "message rejected");
                    history.track_action_result(format!(
                        "Partner API rejected message {item} of report {}: {reason}",
                        header.report_id
                    ));
                }
            }
        }

        if accepted > 0 {
            info!(
                report_id = %header.report_id,
                receiver = %delivery.receiver.full_name,
                accepted,
                remaining = remaining.len(),
                "posted messages"
            );
            history.track_sent_report(SentReport {
                sent_report_id: delivery.sent_report_id,
                receiver_name: delivery.receiver.full_name.clone(),
                source_report_id: header.report_id,
                file_name: None,
                item_count: accepted,
                params: Some(session.base_url.clone()),
            });
        }
        Ok(remaining)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, StatusCode as HttpStatus};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use relay_core::{all_items, BodyFormat, ReportHeader, TaskAction};
    use serde_json::{json, Value};
    use uuid::Uuid;

    use super::*;
    use crate::transport::fake_http::{record, seen, serve, Seen};

    /// Fake partner API: authentication succeeds for `good-key`; a message
    /// whose `status` field is set is answered with that status.
    async fn partner_api() -> (String, Seen) {
        let posted = seen();
        let captured = posted.clone();
        let app = Router::new()
            .route(
                "/auth/authenticate",
                post(|Json(body): Json<Value>| async move {
                    if body["apiKey"] == "good-key" && body["secret"] == "s3cret" {
                        (HttpStatus::OK, Json(json!({ "accessToken": "token-1" })))
                    } else {
                        (HttpStatus::UNAUTHORIZED, Json(json!({})))
                    }
                }),
            )
            .route(
                "/endpoint",
                post(move |headers: HeaderMap, Json(body): Json<Value>| {
                    let captured = captured.clone();
                    async move {
                        let status = body["status"]
                            .as_u64()
                            .and_then(|code| u16::try_from(code).ok())
                            .and_then(|code| HttpStatus::from_u16(code).ok())
                            .unwrap_or(HttpStatus::OK);
                        record(&captured, &headers, body);
                        status
                    }
                }),
            );
        (serve(app).await, posted)
    }

    fn receiver(base_url: &str, api_key: &str) -> Receiver {
        Receiver::new(
            "partner.redox",
            Some(TransportConfig::Redox(RedoxTransportConfig {
                api_key: api_key.to_string(),
                base_url: Some(base_url.to_string()),
            })),
        )
    }

    async fn send(
        transport: &RedoxTransport,
        receiver: &Receiver,
        header: &ReportHeader,
        retry_items: Option<&[String]>,
        history: &mut ActionHistory,
    ) -> RetryItems {
        let mut session = transport.start_session(receiver).await.unwrap().unwrap();
        let delivery = Delivery {
            receiver,
            header,
            sent_report_id: Uuid::new_v4(),
            retry_items,
            attempted_at: Utc::now(),
        };
        transport
            .send(&delivery, Some(session.as_mut()), history)
            .await
            .unwrap()
    }

    #[test]
    fn status_classification() {
        assert_eq!(classify(StatusCode::OK), MessageOutcome::Accepted);
        assert!(matches!(classify(StatusCode::BAD_GATEWAY), MessageOutcome::Retry(_)));
        assert!(matches!(classify(StatusCode::TOO_MANY_REQUESTS), MessageOutcome::Retry(_)));
        assert!(matches!(classify(StatusCode::UNAUTHORIZED), MessageOutcome::Retry(_)));
        assert!(matches!(classify(StatusCode::BAD_REQUEST), MessageOutcome::Rejected(_)));
    }

    #[tokio::test]
    async fn every_message_is_posted() {
        let (base, posted) = partner_api().await;
        let transport = RedoxTransport::new(Client::new(), DEFAULT_REDOX_BASE_URL, "s3cret");
        let receiver = receiver(&base, "good-key");
        let header = ReportHeader::new(
            "partner.redox",
            BodyFormat::Redox,
            "{\"n\":0}\n\n{\"n\":1}\n",
        );
        let mut history = ActionHistory::new(TaskAction::Send);

        let remaining = send(&transport, &receiver, &header, None, &mut history).await;

        assert!(remaining.is_empty());
        let posted = posted.lock();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0].0.as_deref(), Some("Bearer token-1"));
        assert_eq!(posted[1].1["n"], 1);
        assert_eq!(history.sent_reports()[0].item_count, 2);
    }

    #[tokio::test]
    async fn transient_failures_are_named_and_rejections_dropped() {
        let (base, _posted) = partner_api().await;
        let transport = RedoxTransport::new(Client::new(), DEFAULT_REDOX_BASE_URL, "s3cret");
        let receiver = receiver(&base, "good-key");
        let header = ReportHeader::new(
            "partner.redox",
            BodyFormat::Redox,
            "{\"n\":0}\n{\"n\":1,\"status\":503}\n{\"n\":2,\"status\":400}\n",
        );
        let mut history = ActionHistory::new(TaskAction::Send);

        let remaining = send(&transport, &receiver, &header, None, &mut history).await;

        assert_eq!(remaining, vec!["1".to_string()]);
        assert_eq!(history.action_results().len(), 1);
        assert!(history.action_results()[0].contains("message 2"));
        assert_eq!(history.sent_reports()[0].item_count, 1);
    }

    #[tokio::test]
    async fn retry_resends_only_listed_items() {
        let (base, posted) = partner_api().await;
        let transport = RedoxTransport::new(Client::new(), DEFAULT_REDOX_BASE_URL, "s3cret");
        let receiver = receiver(&base, "good-key");
        let header = ReportHeader::new(
            "partner.redox",
            BodyFormat::Redox,
            "{\"n\":0}\n{\"n\":1}\n{\"n\":2}\n",
        );
        let items = vec!["2".to_string()];
        let mut history = ActionHistory::new(TaskAction::Send);

        let remaining =
            send(&transport, &receiver, &header, Some(items.as_slice()), &mut history).await;

        assert!(remaining.is_empty());
        let posted = posted.lock();
        assert_eq!(posted.len(), 1);
        assert_eq!(posted[0].1["n"], 2);
    }

    #[tokio::test]
    async fn all_items_sentinel_resends_everything() {
        let (base, posted) = partner_api().await;
        let transport = RedoxTransport::new(Client::new(), DEFAULT_REDOX_BASE_URL, "s3cret");
        let receiver = receiver(&base, "good-key");
        let header =
            ReportHeader::new("partner.redox", BodyFormat::Redox, "{\"n\":0}\n{\"n\":1}\n");
        let items = all_items();
        let mut history = ActionHistory::new(TaskAction::Send);

        send(&transport, &receiver, &header, Some(items.as_slice()), &mut history).await;

        assert_eq!(posted.lock().len(), 2);
    }

    #[tokio::test]
    async fn bad_credentials_fail_the_session() {
        let (base, posted) = partner_api().await;
        let transport = RedoxTransport::new(Client::new(), DEFAULT_REDOX_BASE_URL, "s3cret");
        let result = transport.start_session(&receiver(&base, "bad-key")).await;
        assert!(matches!(result, Err(TransportError::Authentication { .. })));
        assert!(posted.lock().is_empty());
    }
}
