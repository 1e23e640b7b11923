//! Email delivery through an HTTP mail API.
//!
//! Each report becomes one message with the body attached as a file. The
//! request shape follows the widely used `v3/mail/send` JSON format.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use relay_core::{
    ActionHistory, EmailTransportConfig, Receiver, RetryItems, SentReport, TransportConfig,
    TransportKind,
};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{delivery_file_name, Delivery, Transport, TransportError, TransportSession};

pub struct EmailTransport {
    client: Client,
    api_url: String,
    api_key: String,
}

impl EmailTransport {
    /// `api_url` is the full send endpoint; `api_key` is sent as a bearer token.
    pub fn new(client: Client, api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            api_key: api_key.into(),
        }
    }

    fn config<'r>(receiver: &'r Receiver) -> Result<&'r EmailTransportConfig, TransportError> {
        match &receiver.transport {
            Some(TransportConfig::Email(config)) if !config.addresses.is_empty() => Ok(config),
            _ => Err(TransportError::Misconfigured {
                receiver: receiver.full_name.clone(),
                transport: TransportKind::Email,
            }),
        }
    }

    fn message(
        config: &EmailTransportConfig,
        delivery: &Delivery<'_>,
        file_name: &str,
    ) -> Value {
        let header = delivery.header;
        let to: Vec<Value> = config
            .addresses
            .iter()
            .map(|address| json!({ "email": address }))
            .collect();
        json!({
            "personalizations": [{ "to": to }],
            "from": { "email": config.from },
            "subject": format!("Report {} for {}", header.report_id, delivery.receiver.full_name),
            "content": [{
                "type": "text/plain",
                "value": format!("Attached is {file_name}."),
            }],
            "attachments": [{
                "content": STANDARD.encode(&header.body),
                "filename": file_name,
                "type": header.body_format.mime_type(),
                "disposition": "attachment",
            }],
        })
    }

    /// `Err` carries the reason the message was not accepted.
    async fn post(&self, message: &Value) -> Result<(), String> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(message)
            .send()
            .await
            .map_err(|err| err.to_string())?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("mail API responded with status {status}"))
        }
    }
}

#[async_trait]
impl Transport for EmailTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Email
    }

    async fn start_session(
        &self,
        receiver: &Receiver,
    ) -> Result<Option<Box<dyn TransportSession>>, TransportError> {
        Self::config(receiver)?;
        Ok(None)
    }

    async fn send(
        &self,
        delivery: &Delivery<'_>,
        _session: Option<&mut dyn TransportSession>,
        history: &mut ActionHistory,
    ) -> Result<RetryItems, TransportError> {
        let config = Self::config(delivery.receiver)?;
        let header = delivery.header;
        let file_name = delivery_file_name(delivery)?;
        let message = Self::message(config, delivery, &file_name);

        match self.post(&message).await {
            Ok(()) => {
                info!(
                    report_id = %header.report_id,
                    receiver = %delivery.receiver.full_name,
                    recipients = config.addresses.len(),
                    "emailed report"
                );
                history.track_sent_report(SentReport {
                    sent_report_id: delivery.sent_report_id,
                    receiver_name: delivery.receiver.full_name.clone(),
                    source_report_id: header.report_id,
                    file_name: Some(file_name),
                    item_count: 1,
                    params: Some(config.addresses.join(",")),
                });
                Ok(Vec::new())
            }
            Err(reason) => {
                warn!(
                    report_id = %header.report_id,
                    receiver = %delivery.receiver.full_name,
                    reason = %reason,
                    "email delivery failed"
                );
                history.track_action_result(format!(
                    "Failed to email {file_name} to {}: {reason}",
                    config.addresses.join(",")
                ));
                Ok(delivery.attempted_items())
            }
        }
    }
}
