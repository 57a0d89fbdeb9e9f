//! Webhook dispatch — best-effort session completion callbacks.
//!
//! A report goes out only when the leasing session supplied a webhook URL,
//! a report key, and a session UUID. Delivery failures are logged and
//! dropped; the container is going away regardless.

use serde::Serialize;
use tracing::{debug, warn};

use super::slot::Slot;
use super::BrowserPool;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookReport {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "sessionUUID")]
    pub session_uuid: String,
    #[serde(rename = "sessionData")]
    pub session_data: String,
    #[serde(rename = "isError")]
    pub is_error: bool,
    pub error: String,
    #[serde(rename = "reportKey")]
    pub report_key: String,
}

/// Decide whether a `node:deleted` event earns a webhook, and build the
/// report if it does. Session data is only passed through for
/// fingerprinted sessions; everyone else gets an empty string.
pub(crate) fn eligible_report(
    slot: &Slot,
    is_error: bool,
    message: &str,
    session_data: Option<&str>,
) -> Option<(String, WebhookReport)> {
    let webhook = non_empty(slot.session.webhook.as_deref())?;
    let report_key = non_empty(slot.session.report_key.as_deref())?;
    let session_uuid = non_empty(slot.session.session_uuid.as_deref())?;

    let has_fingerprint = non_empty(slot.session.fingerprint_id.as_deref()).is_some();
    let session_data = if has_fingerprint {
        session_data.unwrap_or_default().to_string()
    } else {
        String::new()
    };

    let report = WebhookReport {
        client_id: slot.session.client_id.clone().unwrap_or_default(),
        session_uuid: session_uuid.to_string(),
        session_data,
        is_error,
        error: message.to_string(),
        report_key: report_key.to_string(),
    };
    Some((webhook.to_string(), report))
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

impl BrowserPool {
    pub(crate) async fn dispatch_webhook(&self, url: String, report: WebhookReport) {
        debug!("reporting session {} to {}", report.session_uuid, url);
        match self.inner.http.post(&url).json(&report).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("webhook delivered for session {}", report.session_uuid);
            }
            Ok(response) => warn!(
                "webhook for session {} answered {}, dropping report",
                report.session_uuid,
                response.status()
            ),
            Err(e) => warn!(
                "webhook delivery for session {} failed: {}, dropping report",
                report.session_uuid, e
            ),
        }
    }
}
