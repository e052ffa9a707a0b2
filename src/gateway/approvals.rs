//! Web-mode approval channel.
//!
//! When the safety gate needs a human decision during an HTTP chat turn,
//! the verdict is published on the bus as an `approval_required` frame and
//! the turn parks on a one-shot receiver.  A REST endpoint feeds the
//! response back.  Pending entries are capped so client disconnects cannot
//! grow the map without bound; overflow auto-denies.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::warn;
use uuid::Uuid;

use crate::event_bus::{AgentBus, BusEvent};
use crate::safety::gate::SafetyVerdict;
use crate::tools::registry::{ApprovalHandler, ApprovalResponse};

pub const MAX_PENDING_APPROVALS: usize = 100;

/// Map of approval id → waiting turn.
pub struct PendingApprovals {
    inner: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    max_pending: usize,
}

impl Default for PendingApprovals {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingApprovals {
    pub fn new() -> Self {
        Self::with_limit(MAX_PENDING_APPROVALS)
    }

    pub fn with_limit(max_pending: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            max_pending,
        }
    }

    /// Mint an approval id and park slot.  `None` when the map is full
    /// (the caller must deny).
    pub fn begin(&self) -> Option<(String, oneshot::Receiver<bool>)> {
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if inner.len() >= self.max_pending {
            warn!(pending = inner.len(), "pending approvals limit reached; denying");
            return None;
        }
        let id = Uuid::new_v4().simple().to_string();
        let (tx, rx) = oneshot::channel();
        inner.insert(id.clone(), tx);
        Some((id, rx))
    }

    /// Deliver the user's response.  Returns false for unknown/expired ids.
    pub fn resolve(&self, approval_id: &str, approved: bool) -> bool {
        let sender = self
            .inner
            .lock()
            .ok()
            .and_then(|mut inner| inner.remove(approval_id));
        match sender {
            Some(sender) => sender.send(approved).is_ok(),
            None => false,
        }
    }

    /// Clean up a slot the turn stopped waiting on (timeout).
    pub fn abandon(&self, approval_id: &str) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.remove(approval_id);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`ApprovalHandler`] that routes verdicts to connected web clients.
pub struct WebApprovalHandler {
    pub pending: Arc<PendingApprovals>,
    pub bus: AgentBus,
    pub conversation_id: String,
    pub timeout: Duration,
}

#[async_trait]
impl ApprovalHandler for WebApprovalHandler {
    async fn confirm(&self, verdict: &SafetyVerdict) -> ApprovalResponse {
        let Some((approval_id, rx)) = self.pending.begin() else {
            return ApprovalResponse::Denied;
        };

        self.bus.publish(BusEvent::ApprovalRequired {
            conversation_id: self.conversation_id.clone(),
            approval_id: approval_id.clone(),
            tool_name: verdict.tool_name.clone(),
            reason: verdict.reason.clone(),
            details: verdict.details.clone(),
        });

        let approved = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(approved)) => approved,
            // Timeout or dropped sender → deny.
            _ => {
                warn!(approval_id, reason = %verdict.reason, "approval timed out");
                false
            }
        };
        self.pending.abandon(&approval_id);

        if approved {
            ApprovalResponse::Approved
        } else {
            ApprovalResponse::Denied
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict() -> SafetyVerdict {
        SafetyVerdict {
            needs_approval: true,
            tool_name: "bash".to_owned(),
            reason: "Tool 'bash' requires approval".to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn resolve_wakes_waiting_turn() {
        let pending = Arc::new(PendingApprovals::new());
        let handler = WebApprovalHandler {
            pending: pending.clone(),
            bus: AgentBus::new(),
            conversation_id: "c1".to_owned(),
            timeout: Duration::from_secs(5),
        };

        let bus = handler.bus.clone();
        let mut rx = bus.subscribe();
        let confirm = tokio::spawn(async move { handler.confirm(&verdict()).await });

        // Pick the approval id off the bus and approve it.
        let approval_id = match rx.recv().await.unwrap() {
            BusEvent::ApprovalRequired { approval_id, .. } => approval_id,
            other => panic!("unexpected event: {other:?}"),
        };
        assert!(pending.resolve(&approval_id, true));
        assert_eq!(confirm.await.unwrap(), ApprovalResponse::Approved);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn denial_resolves_to_denied() {
        let pending = Arc::new(PendingApprovals::new());
        let handler = WebApprovalHandler {
            pending: pending.clone(),
            bus: AgentBus::new(),
            conversation_id: "c1".to_owned(),
            timeout: Duration::from_secs(5),
        };
        let mut rx = handler.bus.subscribe();
        let confirm = tokio::spawn(async move { handler.confirm(&verdict()).await });
        let approval_id = match rx.recv().await.unwrap() {
            BusEvent::ApprovalRequired { approval_id, .. } => approval_id,
            other => panic!("unexpected event: {other:?}"),
        };
        pending.resolve(&approval_id, false);
        assert_eq!(confirm.await.unwrap(), ApprovalResponse::Denied);
    }

    #[tokio::test]
    async fn timeout_denies_and_cleans_up() {
        let pending = Arc::new(PendingApprovals::new());
        let handler = WebApprovalHandler {
            pending: pending.clone(),
            bus: AgentBus::new(),
            conversation_id: "c1".to_owned(),
            timeout: Duration::from_millis(20),
        };
        assert_eq!(handler.confirm(&verdict()).await, ApprovalResponse::Denied);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn overflow_auto_denies() {
        let pending = Arc::new(PendingApprovals::with_limit(1));
        let _held = pending.begin().unwrap();
        let handler = WebApprovalHandler {
            pending: pending.clone(),
            bus: AgentBus::new(),
            conversation_id: "c1".to_owned(),
            timeout: Duration::from_secs(5),
        };
        assert_eq!(handler.confirm(&verdict()).await, ApprovalResponse::Denied);
    }

    #[test]
    fn resolve_unknown_id_is_false() {
        let pending = PendingApprovals::new();
        assert!(!pending.resolve("nope", true));
    }
}
