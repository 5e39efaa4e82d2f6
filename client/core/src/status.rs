//! Visitor status resolution
//!
//! Answers "is this number checked in right now?" for the OTP field. Only the
//! newest check counts: a response that arrives after a later check was issued
//! is dropped.

use crate::api::VisitorApi;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Result of a status check.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitorStatus {
    #[serde(default)]
    pub is_active: bool,
    /// Previously submitted values keyed by label.
    #[serde(default)]
    pub fields: Option<BTreeMap<String, serde_json::Value>>,
}

impl VisitorStatus {
    /// The fail-closed answer: not checked in, nothing to prefill.
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn active(fields: BTreeMap<String, serde_json::Value>) -> Self {
        Self {
            is_active: true,
            fields: Some(fields),
        }
    }

    /// Field values rendered as text. Nulls, arrays and objects are skipped.
    pub fn text_fields(&self) -> BTreeMap<String, String> {
        let Some(fields) = &self.fields else {
            return BTreeMap::new();
        };
        fields
            .iter()
            .filter_map(|(label, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((label.clone(), text))
            })
            .collect()
    }
}

/// Issues status checks and discards superseded answers.
pub struct StatusResolver {
    api: Arc<dyn VisitorApi>,
    latest: AtomicU64,
}

impl StatusResolver {
    pub fn new(api: Arc<dyn VisitorApi>) -> Self {
        Self {
            api,
            latest: AtomicU64::new(0),
        }
    }

    /// Check `label` = `value`. Returns `None` when a newer check (or an
    /// [`invalidate`](Self::invalidate)) happened while this one was in
    /// flight. Failures resolve to [`VisitorStatus::inactive`].
    pub async fn check(&self, company_id: &str, label: &str, value: &str) -> Option<VisitorStatus> {
        let ticket = self.latest.fetch_add(1, Ordering::SeqCst) + 1;

        let status = match self.api.visitor_status(company_id, label, value).await {
            Ok(Some(status)) => status,
            Ok(None) => VisitorStatus::inactive(),
            Err(e) => {
                tracing::warn!(company_id, label, "Error checking visitor status: {}", e);
                VisitorStatus::inactive()
            }
        };

        if self.latest.load(Ordering::SeqCst) != ticket {
            tracing::debug!(label, ticket, "Discarding stale visitor status");
            return None;
        }
        Some(status)
    }

    /// Drop whatever check is currently in flight.
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::SeqCst);
    }
}
