use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Coalesces free-text edits before a proposal request.
    Proposal,
    /// Reverts `Sent` / `Aborted` back to `Idle`.
    ResultDisplay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub kind: TimerKind,
    generation: u64,
}

/// A single-slot timer: arming it again cancels whatever was pending.
#[derive(Debug)]
pub struct TimerSlot {
    kind: TimerKind,
    generation: u64,
    armed: bool,
}

impl TimerSlot {
    pub fn new(kind: TimerKind) -> Self {
        Self {
            kind,
            generation: 0,
            armed: false,
        }
    }

    pub fn arm(&mut self) -> TimerId {
        self.generation += 1;
        self.armed = true;
        TimerId {
            kind: self.kind,
            generation: self.generation,
        }
    }

    /// Returns whether a timer was pending.
    pub fn cancel(&mut self) -> bool {
        let was_armed = self.armed;
        self.armed = false;
        self.generation += 1;
        was_armed
    }

    /// Consumes an expiry. Expiries of cancelled or replaced timers return `false`.
    pub fn fire(&mut self, id: TimerId) -> bool {
        if !self.armed || id.kind != self.kind || id.generation != self.generation {
            return false;
        }
        self.armed = false;
        true
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }
}

/// Pending proposal negotiation, coalescing edits that arrive within `delay` of each other.
#[derive(Debug)]
pub struct Debouncer {
    slot: TimerSlot,
    delay: Duration,
    refresh_fiat: bool,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            slot: TimerSlot::new(TimerKind::Proposal),
            delay,
            refresh_fiat: false,
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// (Re)starts the timer. A fiat refresh asked for by any coalesced edit is kept.
    pub fn schedule(&mut self, refresh_fiat: bool) -> TimerId {
        self.refresh_fiat = if self.slot.is_armed() {
            self.refresh_fiat || refresh_fiat
        } else {
            refresh_fiat
        };
        self.slot.arm()
    }

    /// Returns the fiat-refresh flag when `id` is the live timer.
    pub fn fire(&mut self, id: TimerId) -> Option<bool> {
        if self.slot.fire(id) {
            Some(std::mem::take(&mut self.refresh_fiat))
        } else {
            None
        }
    }

    pub fn cancel(&mut self) -> bool {
        self.refresh_fiat = false;
        self.slot.cancel()
    }
}
