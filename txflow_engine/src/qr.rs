use rust_decimal::{Decimal, RoundingStrategy};
use std::str::FromStr;
use thiserror::Error;
use txflow_protocol::is_bitcoin_based;
use url::Url;

const SUPPORTED_SCHEMES: &[&str] = &["bitcoin", "litecoin", "ethereum"];
const BTC_DECIMALS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub address: String,
    pub amount: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QrError {
    #[error("unsupported payment uri scheme: {0}")]
    UnsupportedScheme(String),
}

/// Parses a scanned payment URI.
///
/// Strings that are not URIs at all are taken as a bare address. The `amount` query parameter
/// is only read for bitcoin-based coins.
pub fn parse_payment_uri(raw: &str, coin_code: &str) -> Result<PaymentRequest, QrError> {
    let raw = raw.trim();
    let Ok(url) = Url::parse(raw) else {
        return Ok(PaymentRequest {
            address: raw.to_string(),
            amount: None,
        });
    };

    let scheme = url.scheme();
    if !SUPPORTED_SCHEMES.contains(&scheme) {
        return Err(QrError::UnsupportedScheme(scheme.to_string()));
    }

    let amount = if is_bitcoin_based(coin_code) {
        url.query_pairs()
            .find(|(k, _)| k == "amount")
            .map(|(_, v)| v.trim().to_string())
            .filter(|v| !v.is_empty())
    } else {
        None
    };

    Ok(PaymentRequest {
        address: url.path().to_string(),
        amount,
    })
}

/// Reads a BTC amount the way the wallet backend does.
///
/// Decimals (`.5`), exponents (`1e-3`) and integer fractions (`1/4`) are accepted. The value is
/// rounded to whole satoshis, halves away from zero, and printed without trailing zeros.
pub fn normalize_btc_amount(raw: &str) -> Option<String> {
    let value = parse_rational(raw.trim())?;
    let rounded =
        value.round_dp_with_strategy(BTC_DECIMALS, RoundingStrategy::MidpointAwayFromZero);
    Some(rounded.normalize().to_string())
}

fn parse_rational(raw: &str) -> Option<Decimal> {
    if raw.contains('_') {
        return None;
    }
    if let Some((num, den)) = raw.split_once('/') {
        let digits = num.strip_prefix(['+', '-']).unwrap_or(num);
        if !is_digits(digits) || !is_digits(den) {
            return None;
        }
        let num = Decimal::from_str(num).ok()?;
        let den = Decimal::from_str(den).ok()?;
        return num.checked_div(den);
    }
    if raw.contains(['e', 'E']) {
        Decimal::from_scientific(raw).ok()
    } else {
        Decimal::from_str(raw).ok()
    }
}

fn is_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}
