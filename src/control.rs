//! Control request arbitration.
//!
//! DESIGN
//! ======
//! A peer asks to become the operator-facing clock with a `request` event.
//! When this clock is closed to requests the answer is an immediate
//! `rejected`. Otherwise the operator is prompted on a spawned task; the
//! client loop keeps processing exams and occupancy while the prompt is
//! open, and the verdict comes back as its own message on the verdict
//! queue. Requests are independent: two overlapping requests get two
//! prompts. Control is advisory, so nothing here guards it.
//!
//! A prompt left unanswered past the decision timeout is rejected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::channel::EventSender;
use crate::error::SyncError;
use crate::events::Outbound;

/// A peer's ask for control, alive for one arbitration round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingControlRequest {
    /// Relay reference used to address the reply.
    pub requester: String,
    /// Name shown to the operator.
    pub requester_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected,
}

impl Decision {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

/// Outcome of one arbitration round, delivered back to the client loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlVerdict {
    pub request: PendingControlRequest,
    pub decision: Decision,
}

/// The local operator, asked to accept or reject a control request.
#[async_trait]
pub trait OperatorPrompt: Send + Sync {
    async fn confirm(&self, request: &PendingControlRequest) -> Decision;
}

pub struct ControlArbiter {
    open_to_requests: watch::Receiver<bool>,
    prompt: Arc<dyn OperatorPrompt>,
    decision_timeout: Duration,
    verdicts: mpsc::UnboundedSender<ControlVerdict>,
    outbox: EventSender,
}

impl ControlArbiter {
    #[must_use]
    pub fn new(
        open_to_requests: watch::Receiver<bool>,
        prompt: Arc<dyn OperatorPrompt>,
        decision_timeout: Duration,
        verdicts: mpsc::UnboundedSender<ControlVerdict>,
        outbox: EventSender,
    ) -> Self {
        Self { open_to_requests, prompt, decision_timeout, verdicts, outbox }
    }

    /// Start arbitrating `request`.
    ///
    /// Closed clocks reply `rejected` right away without prompting.
    pub fn on_request(&self, request: PendingControlRequest) {
        if !*self.open_to_requests.borrow() {
            info!(requester = %request.requester, "control: closed to requests, rejecting");
            self.reply(&request, Decision::Rejected);
            return;
        }

        info!(requester = %request.requester, name = %request.requester_name, "control: prompting operator");
        let prompt = Arc::clone(&self.prompt);
        let verdicts = self.verdicts.clone();
        let timeout = self.decision_timeout;
        tokio::spawn(async move {
            let decision = match tokio::time::timeout(timeout, prompt.confirm(&request)).await {
                Ok(decision) => decision,
                Err(_) => {
                    let err = SyncError::RequestTimeout(request.requester_name.clone());
                    warn!(error = %err, "control: auto-rejecting");
                    Decision::Rejected
                }
            };
            let _ = verdicts.send(ControlVerdict { request, decision });
        });
    }

    /// Answer the requester once the operator has decided.
    pub fn on_verdict(&self, verdict: ControlVerdict) {
        info!(
            requester = %verdict.request.requester,
            decision = verdict.decision.as_str(),
            "control: responding"
        );
        self.reply(&verdict.request, verdict.decision);
    }

    fn reply(&self, request: &PendingControlRequest, decision: Decision) {
        let event = Outbound::RequestCallback { requester: request.requester.clone(), decision };
        if let Err(e) = self.outbox.send(event) {
            warn!(error = %e, "control: reply dropped");
        }
    }
}

#[cfg(test)]
#[path = "control_test.rs"]
mod tests;
