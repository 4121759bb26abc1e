//! Transfer notifications
//!
//! Delivers a `TransferEvent` to every matching watch entry, by email and/or
//! HTTP callback. Each recipient gets at most one attempt per call; a failure
//! is logged and never affects the other recipients or the caller.

use crate::classify::TransferEvent;
use crate::config::ExplorerUrls;
use crate::records::WatchEntry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture, FutureExt};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Outbound email.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mail {
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// POST `body` as JSON to `url`. Non-2xx responses are errors.
    async fn post(&self, url: &str, body: &Value) -> Result<()>;
}

#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, mail: &Mail) -> Result<()>;

    /// False when mails cannot actually leave the process.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Webhook transport over reqwest.
pub struct HttpWebhook {
    client: Client,
}

impl HttpWebhook {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build webhook HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhook {
    async fn post(&self, url: &str, body: &Value) -> Result<()> {
        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach webhook {}", url))?;
        if !resp.status().is_success() {
            anyhow::bail!("Webhook {} answered {}", url, resp.status());
        }
        Ok(())
    }
}

/// Mail transport that hands messages to an HTTP mail relay.
///
/// The relay receives `{"to", "subject", "html"}` as JSON, with an optional
/// bearer token.
pub struct HttpMailRelay {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpMailRelay {
    pub fn new(url: String, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build mail relay HTTP client")?;
        Ok(Self { client, url, token })
    }
}

#[async_trait]
impl MailTransport for HttpMailRelay {
    async fn send(&self, mail: &Mail) -> Result<()> {
        let mut req = self.client.post(&self.url).json(&json!({
            "to": mail.to,
            "subject": mail.subject,
            "html": mail.html,
        }));
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .context("Failed to reach mail relay")?;
        if !resp.status().is_success() {
            anyhow::bail!("Mail relay answered {}", resp.status());
        }
        Ok(())
    }
}

/// Mail transport used when no relay is configured.
pub struct LogMailer;

#[async_trait]
impl MailTransport for LogMailer {
    async fn send(&self, mail: &Mail) -> Result<()> {
        info!(
            "Mail not configured, would send to {}: {}",
            mail.to, mail.subject
        );
        Ok(())
    }

    fn is_configured(&self) -> bool {
        false
    }
}

/// Outcome of one `notify` call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    /// Mails not sent because no mail transport is configured
    pub skipped: usize,
}

enum Delivery {
    Delivered,
    Failed,
    Skipped,
}

/// Fans a transfer event out to watch entries.
pub struct Dispatcher {
    webhook: Arc<dyn WebhookTransport>,
    mail: Arc<dyn MailTransport>,
    explorers: ExplorerUrls,
}

impl Dispatcher {
    pub fn new(
        webhook: Arc<dyn WebhookTransport>,
        mail: Arc<dyn MailTransport>,
        explorers: ExplorerUrls,
    ) -> Self {
        Self {
            webhook,
            mail,
            explorers,
        }
    }

    /// Deliver `event` to every entry's email and callback URL.
    ///
    /// All deliveries run concurrently, so a slow recipient only delays the
    /// return of this call. Never fails; per-recipient failures are logged
    /// and counted.
    pub async fn notify(&self, entries: &[WatchEntry], event: &TransferEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        if entries.is_empty() {
            return report;
        }

        let body = webhook_body(event);
        let tx_url = self
            .explorers
            .tx_url(&event.symbol, &event.network, &event.source_tx_hash);
        let mail = render_email(event, tx_url);

        let mut deliveries: Vec<BoxFuture<'_, Delivery>> = Vec::new();
        for entry in entries {
            if let Some(email) = entry.email() {
                let mail = Mail {
                    to: email.to_string(),
                    ..mail.clone()
                };
                deliveries.push(self.send_mail(entry, mail, event).boxed());
            }
            if let Some(url) = entry.webhook() {
                deliveries.push(self.post_webhook(entry, url, &body, event).boxed());
            }
        }

        for delivery in join_all(deliveries).await {
            match delivery {
                Delivery::Delivered => report.delivered += 1,
                Delivery::Failed => report.failed += 1,
                Delivery::Skipped => report.skipped += 1,
            }
        }
        report
    }

    async fn send_mail(&self, entry: &WatchEntry, mail: Mail, event: &TransferEvent) -> Delivery {
        if !self.mail.is_configured() {
            warn!(
                "Mail not configured, skipping {} (watch {}) about {}",
                mail.to, entry.id, event.source_tx_hash
            );
            return Delivery::Skipped;
        }
        match self.mail.send(&mail).await {
            Ok(()) => {
                debug!("Mailed {} about {}", mail.to, event.source_tx_hash);
                Delivery::Delivered
            }
            Err(e) => {
                warn!(
                    "Failed to mail {} (watch {}) about {}: {:?}",
                    mail.to, entry.id, event.source_tx_hash, e
                );
                Delivery::Failed
            }
        }
    }

    async fn post_webhook(
        &self,
        entry: &WatchEntry,
        url: &str,
        body: &Value,
        event: &TransferEvent,
    ) -> Delivery {
        match self.webhook.post(url, body).await {
            Ok(()) => {
                debug!("Posted {} to {}", event.source_tx_hash, url);
                Delivery::Delivered
            }
            Err(e) => {
                warn!(
                    "Failed to post {} to {} (watch {}): {:?}",
                    event.source_tx_hash, url, entry.id, e
                );
                Delivery::Failed
            }
        }
    }
}

/// JSON body POSTed to callback URLs.
///
/// `symbol` names the asset `value` is denominated in: the token symbol for
/// token transfers, the chain symbol otherwise.
pub fn webhook_body(event: &TransferEvent) -> Value {
    json!({
        "callbackBody": {
            "symbol": unit(event),
            "network": event.network,
            "from": event.from,
            "to": event.to,
            "value": event.value,
            "rawData": event.raw_data,
            "token": event.token,
        }
    })
}

/// Unit to print next to the amount.
fn unit(event: &TransferEvent) -> &str {
    event
        .token
        .as_ref()
        .map(|t| t.symbol.as_str())
        .unwrap_or(event.symbol.as_str())
}

/// One-line description of the transfer from the watched side.
pub fn describe(event: &TransferEvent) -> String {
    if event.kind.is_send() {
        format!("{} sent {} {} to {}", event.from, event.value, unit(event), event.to)
    } else {
        format!(
            "{} received {} {} from {}",
            event.to,
            event.value,
            unit(event),
            event.from
        )
    }
}

/// Build the notification email. `to` is left empty for the caller to fill.
pub fn render_email(event: &TransferEvent, tx_url: Option<String>) -> Mail {
    let subject = format!(
        "[{} {}] {} {} {}",
        event.symbol,
        event.network,
        if event.kind.is_send() { "Sent" } else { "Received" },
        event.value,
        unit(event)
    );

    let link = match tx_url {
        Some(url) => format!(
            r#"<a href="{}">{}</a>"#,
            escape_html(&url),
            escape_html(&event.source_tx_hash)
        ),
        None => escape_html(&event.source_tx_hash),
    };

    let html = format!(
        "<html><body>\
         <p>{}</p>\
         <table>\
         <tr><td>Symbol</td><td>{}</td></tr>\
         <tr><td>Network</td><td>{}</td></tr>\
         <tr><td>From</td><td>{}</td></tr>\
         <tr><td>To</td><td>{}</td></tr>\
         <tr><td>Value</td><td>{} {}</td></tr>\
         <tr><td>Transaction</td><td>{}</td></tr>\
         </table>\
         </body></html>",
        escape_html(&describe(event)),
        escape_html(&event.symbol),
        escape_html(&event.network),
        escape_html(&event.from),
        escape_html(&event.to),
        escape_html(&event.value),
        escape_html(unit(event)),
        link,
    );

    Mail {
        to: String::new(),
        subject,
        html,
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
