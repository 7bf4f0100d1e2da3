/// Identifies one dispatched request. Tokens only ever increase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Latest-input-wins bookkeeping for one request stream.
///
/// A response is applied only when its token is the highest one handed out. Every edit that
/// changes the input calls [`LatestWins::supersede`], so a response computed from older input is
/// dropped even while the replacement request is still waiting on its debounce timer.
#[derive(Debug, Default)]
pub struct LatestWins {
    highest: u64,
}

impl LatestWins {
    pub fn issue(&mut self) -> RequestToken {
        self.highest += 1;
        RequestToken(self.highest)
    }

    /// Marks everything outstanding as stale without dispatching anything.
    pub fn supersede(&mut self) {
        self.highest += 1;
    }

    /// Reports whether the response for `token` may be applied.
    pub fn resolve(&self, token: RequestToken) -> bool {
        token.0 == self.highest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn older_response_is_dropped_even_if_it_arrives_last() {
        let mut t = LatestWins::default();
        let a = t.issue();
        let b = t.issue();

        assert!(t.resolve(b));
        // Nothing is in flight any more, and `a` is still older than `b`.
        assert!(!t.resolve(a));
    }

    #[test]
    fn supersede_invalidates_in_flight() {
        let mut t = LatestWins::default();
        let a = t.issue();
        t.supersede();
        assert!(!t.resolve(a));

        let b = t.issue();
        assert!(b > a);
        assert!(t.resolve(b));
    }
}
