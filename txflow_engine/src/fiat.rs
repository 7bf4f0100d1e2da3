use crate::tracker::{LatestWins, RequestToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConversionDirection {
    /// Coin amount typed, fiat amount derived.
    ToFiat,
    /// Fiat amount typed, coin amount derived.
    FromFiat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionRequest {
    pub token: RequestToken,
    pub direction: ConversionDirection,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionApplied {
    FiatAmount(String),
    CoinAmount(String),
    Failed,
}

/// Keeps the coin and fiat amount fields consistent.
///
/// Both directions share one token stream: starting a conversion in either direction makes
/// every outstanding conversion stale.
#[derive(Debug, Default)]
pub struct FiatSync {
    tracker: LatestWins,
    active: Option<ConversionDirection>,
}

impl FiatSync {
    /// An empty value cancels instead of converting; the caller clears the other field.
    pub fn request(
        &mut self,
        direction: ConversionDirection,
        value: &str,
    ) -> Option<ConversionRequest> {
        let value = value.trim();
        if value.is_empty() {
            self.cancel();
            return None;
        }
        self.active = Some(direction);
        Some(ConversionRequest {
            token: self.tracker.issue(),
            direction,
            value: value.to_string(),
        })
    }

    pub fn cancel(&mut self) {
        self.tracker.supersede();
        self.active = None;
    }

    /// `converted` is `None` when the service said no or could not be reached.
    pub fn resolve(
        &mut self,
        token: RequestToken,
        direction: ConversionDirection,
        converted: Option<String>,
    ) -> Option<ConversionApplied> {
        if !self.tracker.resolve(token) || self.active != Some(direction) {
            tracing::debug!(token = token.value(), ?direction, "dropping stale conversion");
            return None;
        }
        self.active = None;
        Some(match (direction, converted) {
            (ConversionDirection::ToFiat, Some(v)) => ConversionApplied::FiatAmount(v),
            (ConversionDirection::FromFiat, Some(v)) => ConversionApplied::CoinAmount(v),
            (_, None) => ConversionApplied::Failed,
        })
    }

    pub fn active(&self) -> Option<ConversionDirection> {
        self.active
    }
}
