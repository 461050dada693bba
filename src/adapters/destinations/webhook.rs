//! Webhook destination.
//!
//! POSTs (or PUTs/PATCHes) the message as JSON to the configured URL and
//! treats any 2xx response as delivered.
//!
//! # Request
//!
//! ```text
//! POST {url}
//! Content-Type: application/json
//! X-Signature-256: sha256=<hex hmac of body>    (when signingSecret is set)
//! {static headers}
//!
//! {"id":"...","eventName":"n8n.workflow.error","ts":"...","payload":{...}}
//! ```
//!
//! # Batching
//!
//! With `batch` configured, messages are queued to a background task
//! that sends a JSON array once `size` messages are waiting or `lingerMs`
//! has elapsed since the first one. Every message in the batch shares the
//! request's outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, RequestBuilder};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::domain::destination::{
    BatchOptions, DestinationOptions, WebhookAuth, WebhookMethod, WebhookOptions,
};
use crate::domain::message::EventMessage;
use crate::ports::{ConfirmSent, MessageEventBusDestination};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature.
pub const SIGNATURE_HEADER: &str = "X-Signature-256";

/// Credentials resolved from the options, held as secrets.
enum ResolvedAuth {
    Bearer(Secret<String>),
    Basic(String, Secret<String>),
    Header(String, Secret<String>),
}

impl From<&WebhookAuth> for ResolvedAuth {
    fn from(auth: &WebhookAuth) -> Self {
        match auth {
            WebhookAuth::Bearer { token } => ResolvedAuth::Bearer(Secret::new(token.clone())),
            WebhookAuth::Basic { username, password } => {
                ResolvedAuth::Basic(username.clone(), Secret::new(password.clone()))
            }
            WebhookAuth::Header { name, value } => {
                ResolvedAuth::Header(name.clone(), Secret::new(value.clone()))
            }
        }
    }
}

/// Everything needed to send one request.
struct WebhookSender {
    client: Client,
    url: String,
    method: Method,
    headers: Vec<(String, String)>,
    auth: Option<ResolvedAuth>,
    signing_secret: Option<Secret<String>>,
}

impl WebhookSender {
    fn new(client: Client, options: &WebhookOptions) -> Self {
        let method = match options.method {
            WebhookMethod::Post => Method::POST,
            WebhookMethod::Put => Method::PUT,
            WebhookMethod::Patch => Method::PATCH,
        };
        Self {
            client,
            url: options.url.clone(),
            method,
            headers: options
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            auth: options.auth.as_ref().map(ResolvedAuth::from),
            signing_secret: options
                .signing_secret
                .as_ref()
                .map(|s| Secret::new(s.clone())),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth {
            Some(ResolvedAuth::Bearer(token)) => request.bearer_auth(token.expose_secret()),
            Some(ResolvedAuth::Basic(user, password)) => {
                request.basic_auth(user, Some(password.expose_secret()))
            }
            Some(ResolvedAuth::Header(name, value)) => {
                request.header(name.as_str(), value.expose_secret().as_str())
            }
            None => request,
        }
    }

    /// Sends `body`; `Err` carries a human-readable reason.
    async fn send(&self, body: Vec<u8>) -> Result<(), String> {
        let mut request = self
            .client
            .request(self.method.clone(), &self.url)
            .header("Content-Type", "application/json");
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(secret) = &self.signing_secret {
            request = request.header(SIGNATURE_HEADER, sign(secret.expose_secret(), &body));
        }
        request = self.authorize(request);

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("endpoint answered {}", status))
        }
    }
}

/// `sha256=<hex>` HMAC of `body` under `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this cannot fail.
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    format!("sha256={}", hex_encode(&mac.finalize().into_bytes()))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

type BatchItem = (EventMessage, oneshot::Sender<bool>);

pub struct WebhookDestination {
    options: DestinationOptions,
    sender: Arc<WebhookSender>,
    batch: Option<BatchOptions>,
    queue: Mutex<Option<mpsc::Sender<BatchItem>>>,
}

impl WebhookDestination {
    pub fn new(client: Client, webhook: WebhookOptions) -> Self {
        let sender = Arc::new(WebhookSender::new(client, &webhook));
        let batch = webhook.batch;
        Self {
            options: DestinationOptions::Webhook(webhook),
            sender,
            batch,
            queue: Mutex::new(None),
        }
    }

    async fn send_single(&self, message: &EventMessage) -> bool {
        let body = match serde_json::to_vec(message) {
            Ok(body) => body,
            Err(e) => {
                warn!(message_id = %message.id(), error = %e, "Failed to encode webhook body");
                return false;
            }
        };
        match self.sender.send(body).await {
            Ok(()) => true,
            Err(reason) => {
                debug!(
                    destination = %self.id(),
                    message_id = %message.id(),
                    reason = %reason,
                    "Webhook delivery failed"
                );
                false
            }
        }
    }

    async fn send_batched(&self, message: &EventMessage, batch: BatchOptions) -> bool {
        let queue = {
            let mut guard = self.queue.lock().await;
            guard
                .get_or_insert_with(|| spawn_batcher(self.sender.clone(), batch))
                .clone()
        };

        let (tx, rx) = oneshot::channel();
        if queue.send((message.clone(), tx)).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

fn spawn_batcher(sender: Arc<WebhookSender>, batch: BatchOptions) -> mpsc::Sender<BatchItem> {
    let (tx, mut rx) = mpsc::channel::<BatchItem>(batch.size.max(1) * 4);
    let linger = Duration::from_millis(batch.linger_ms);

    tokio::spawn(async move {
        while let Some(first) = rx.recv().await {
            let mut pending = vec![first];
            let deadline = tokio::time::sleep(linger);
            tokio::pin!(deadline);

            while pending.len() < batch.size {
                tokio::select! {
                    _ = &mut deadline => break,
                    next = rx.recv() => match next {
                        Some(item) => pending.push(item),
                        None => break,
                    },
                }
            }

            let messages: Vec<&EventMessage> = pending.iter().map(|(m, _)| m).collect();
            let delivered = match serde_json::to_vec(&messages) {
                Ok(body) => match sender.send(body).await {
                    Ok(()) => true,
                    Err(reason) => {
                        debug!(batch = pending.len(), reason = %reason, "Webhook batch failed");
                        false
                    }
                },
                Err(e) => {
                    warn!(error = %e, "Failed to encode webhook batch");
                    false
                }
            };

            for (_, reply) in pending {
                let _ = reply.send(delivered);
            }
        }
    });

    tx
}

#[async_trait]
impl MessageEventBusDestination for WebhookDestination {
    fn options(&self) -> &DestinationOptions {
        &self.options
    }

    async fn receive_from_event_bus(
        &self,
        message: &EventMessage,
        confirm: &dyn ConfirmSent,
    ) -> bool {
        let delivered = match self.batch {
            Some(batch) => self.send_batched(message, batch).await,
            None => self.send_single(message).await,
        };
        if delivered {
            confirm.confirm_sent(message, self.id()).await;
        }
        delivered
    }

    async fn close(&self) {
        // Dropping the queue lets the batcher flush and exit.
        self.queue.lock().await.take();
    }
}
