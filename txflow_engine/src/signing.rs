use crate::debounce::{TimerId, TimerKind, TimerSlot};
use crate::error_map::{send_failure_alert, Alert};
use txflow_protocol::{PushEvent, SendOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SigningState {
    Idle,
    /// Waiting on the device; edits are locked.
    Confirming,
    SignProgress { step: u32, steps: u32 },
    /// The device waits for the final tap.
    SignConfirm,
    Sent,
    Aborted,
}

impl SigningState {
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SigningState::Confirming | SigningState::SignProgress { .. } | SigningState::SignConfirm
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// How a `sendtx` call ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendResolution {
    Completed(SendOutcome),
    TransportFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Sent { revert: TimerId },
    Aborted { revert: TimerId },
    /// Back at `Idle` already. Transport failures carry no alert.
    Failed { alert: Option<Alert> },
}

#[derive(Debug)]
pub struct SigningMachine {
    state: SigningState,
    session: u64,
    revert: TimerSlot,
}

impl Default for SigningMachine {
    fn default() -> Self {
        Self {
            state: SigningState::Idle,
            session: 0,
            revert: TimerSlot::new(TimerKind::ResultDisplay),
        }
    }
}

impl SigningMachine {
    pub fn state(&self) -> SigningState {
        self.state
    }

    /// Starts a session unless one is already confirming. A pending revert of a previous
    /// `Sent`/`Aborted` is cancelled so it cannot fire under the new session.
    pub fn begin(&mut self) -> Option<SessionId> {
        if self.state.is_active() {
            return None;
        }
        self.revert.cancel();
        self.session += 1;
        self.state = SigningState::Confirming;
        Some(SessionId(self.session))
    }

    /// Returns `false` when the event was ignored.
    pub fn on_push(&mut self, event: &PushEvent) -> bool {
        if !self.state.is_active() {
            return false;
        }
        match event {
            PushEvent::SignProgress(p) => {
                self.state = SigningState::SignProgress {
                    step: p.step,
                    steps: p.steps,
                };
                true
            }
            PushEvent::SignConfirm => {
                self.state = SigningState::SignConfirm;
                true
            }
            PushEvent::AccountSynced { .. } | PushEvent::AccountStatusChanged { .. } => false,
        }
    }

    pub fn resolve(&mut self, session: SessionId, resolution: SendResolution) -> Option<Resolved> {
        if session.0 != self.session || !self.state.is_active() {
            return None;
        }
        Some(match resolution {
            SendResolution::Completed(SendOutcome::Sent) => {
                self.state = SigningState::Sent;
                Resolved::Sent {
                    revert: self.revert.arm(),
                }
            }
            SendResolution::Completed(SendOutcome::Aborted) => {
                self.state = SigningState::Aborted;
                Resolved::Aborted {
                    revert: self.revert.arm(),
                }
            }
            SendResolution::Completed(SendOutcome::Failed { code, message }) => {
                self.state = SigningState::Idle;
                Resolved::Failed {
                    alert: Some(send_failure_alert(code.as_ref(), message)),
                }
            }
            SendResolution::TransportFailed(_) => {
                self.state = SigningState::Idle;
                Resolved::Failed { alert: None }
            }
        })
    }

    pub fn revert_fired(&mut self, id: TimerId) -> bool {
        if !self.revert.fire(id) {
            return false;
        }
        if matches!(self.state, SigningState::Sent | SigningState::Aborted) {
            self.state = SigningState::Idle;
        }
        true
    }
}
