use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FeeTargetCode {
    Custom,
    Low,
    Economy,
    Normal,
    High,
}

impl FeeTargetCode {
    pub fn as_str(self) -> &'static str {
        match self {
            FeeTargetCode::Custom => "custom",
            FeeTargetCode::Low => "low",
            FeeTargetCode::Economy => "economy",
            FeeTargetCode::Normal => "normal",
            FeeTargetCode::High => "high",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "custom" => Some(FeeTargetCode::Custom),
            "low" => Some(FeeTargetCode::Low),
            "economy" => Some(FeeTargetCode::Economy),
            "normal" => Some(FeeTargetCode::Normal),
            "high" => Some(FeeTargetCode::High),
            _ => None,
        }
    }
}

impl fmt::Display for FeeTargetCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coins whose payment URIs carry a BIP21 `amount` parameter and which support coin control.
pub fn is_bitcoin_based(coin_code: &str) -> bool {
    matches!(coin_code, "btc" | "tbtc" | "ltc" | "tltc")
}

/// Body of `POST account/{code}/tx-proposal`.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TxProposalArgs {
    pub address: String,
    pub amount: String,
    pub fee_target: FeeTargetCode,
    pub custom_fee: String,
    #[serde(serialize_with = "serialize_yes_no")]
    pub send_all: bool,
    #[serde(rename = "selectedUTXOs")]
    pub selected_utxos: Vec<String>,
}

fn serialize_yes_no<S: Serializer>(value: &bool, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if *value { "yes" } else { "no" })
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Amount {
    pub amount: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversions: Option<BTreeMap<String, String>>,
}

impl Amount {
    pub fn new(amount: impl Into<String>, unit: impl Into<String>) -> Self {
        Self {
            amount: amount.into(),
            unit: unit.into(),
            conversions: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(from = "String", into = "String")]
pub enum ProposalErrorCode {
    InvalidAddress,
    InvalidAmount,
    InsufficientFunds,
    FeeTooLow,
    FeesNotAvailable,
    Other(String),
}

impl ProposalErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ProposalErrorCode::InvalidAddress => "invalidAddress",
            ProposalErrorCode::InvalidAmount => "invalidAmount",
            ProposalErrorCode::InsufficientFunds => "insufficientFunds",
            ProposalErrorCode::FeeTooLow => "feeTooLow",
            ProposalErrorCode::FeesNotAvailable => "feesNotAvailable",
            ProposalErrorCode::Other(code) => code,
        }
    }
}

impl From<String> for ProposalErrorCode {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "invalidAddress" => ProposalErrorCode::InvalidAddress,
            "invalidAmount" => ProposalErrorCode::InvalidAmount,
            "insufficientFunds" => ProposalErrorCode::InsufficientFunds,
            "feeTooLow" => ProposalErrorCode::FeeTooLow,
            "feesNotAvailable" => ProposalErrorCode::FeesNotAvailable,
            _ => ProposalErrorCode::Other(raw),
        }
    }
}

impl From<ProposalErrorCode> for String {
    fn from(code: ProposalErrorCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for ProposalErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct TxProposalResponse {
    pub success: bool,
    #[serde(default)]
    pub amount: Option<Amount>,
    #[serde(default)]
    pub fee: Option<Amount>,
    #[serde(default)]
    pub total: Option<Amount>,
    #[serde(default)]
    pub error_code: Option<ProposalErrorCode>,
}

/// Backend answer to a proposal request, with the `success` flag folded into the variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalReply {
    Accepted {
        fee: Amount,
        amount: Amount,
        total: Amount,
    },
    Rejected {
        error_code: Option<ProposalErrorCode>,
    },
}

impl TxProposalResponse {
    /// A success without all three amounts is malformed and reported as `Err`.
    pub fn into_reply(self) -> Result<ProposalReply, String> {
        if !self.success {
            return Ok(ProposalReply::Rejected {
                error_code: self.error_code,
            });
        }
        match (self.fee, self.amount, self.total) {
            (Some(fee), Some(amount), Some(total)) => Ok(ProposalReply::Accepted {
                fee,
                amount,
                total,
            }),
            _ => Err("successful proposal without fee/amount/total".to_string()),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConvertToFiatResponse {
    pub success: bool,
    #[serde(default)]
    pub fiat_amount: Option<String>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConvertFromFiatResponse {
    pub success: bool,
    #[serde(default)]
    pub amount: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendErrorCode {
    Erc20InsufficientGasFunds,
    Other(String),
}

impl SendErrorCode {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "erc20InsufficientGasFunds" => SendErrorCode::Erc20InsufficientGasFunds,
            other => SendErrorCode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SendErrorCode::Erc20InsufficientGasFunds => "erc20InsufficientGasFunds",
            SendErrorCode::Other(code) => code,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SendTxResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub aborted: bool,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Aborted,
    Failed {
        code: Option<SendErrorCode>,
        message: Option<String>,
    },
}

impl From<SendTxResponse> for SendOutcome {
    fn from(resp: SendTxResponse) -> Self {
        if resp.success {
            SendOutcome::Sent
        } else if resp.aborted {
            SendOutcome::Aborted
        } else {
            SendOutcome::Failed {
                code: resp.error_code.as_deref().map(SendErrorCode::parse),
                message: resp.error_message,
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub available: Amount,
    pub incoming: Amount,
    #[serde(default)]
    pub has_incoming: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Utxo {
    pub out_point: String,
    pub amount: Amount,
    pub address: String,
    #[serde(default)]
    pub script_type: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeTarget {
    pub code: FeeTargetCode,
    #[serde(default)]
    pub fee_rate_info: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeTargetList {
    pub fee_targets: Vec<FeeTarget>,
    pub default_fee_target: FeeTargetCode,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ReceiveAddress {
    #[serde(rename = "addressID")]
    pub address_id: String,
    pub address: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignProgress {
    pub step: u32,
    pub steps: u32,
}

/// Raw push-channel frame. Unknown `type`s collapse into `Other`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PushPayload {
    Device {
        data: String,
        #[serde(default)]
        meta: Option<serde_json::Value>,
    },
    Account {
        code: String,
        data: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushEvent {
    SignProgress(SignProgress),
    SignConfirm,
    AccountSynced { account: String },
    AccountStatusChanged { account: String },
}

impl PushPayload {
    pub fn into_event(self) -> Option<PushEvent> {
        match self {
            PushPayload::Device { data, meta } => match data.as_str() {
                "signProgress" => {
                    let progress = serde_json::from_value::<SignProgress>(meta?).ok()?;
                    Some(PushEvent::SignProgress(progress))
                }
                "signConfirm" => Some(PushEvent::SignConfirm),
                _ => None,
            },
            PushPayload::Account { code, data } => match data.as_str() {
                "syncdone" => Some(PushEvent::AccountSynced { account: code }),
                "statusChanged" => Some(PushEvent::AccountStatusChanged { account: code }),
                _ => None,
            },
            PushPayload::Other => None,
        }
    }
}

/// Decodes one text frame from the push channel. Malformed or irrelevant frames yield `None`.
pub fn parse_push_frame(text: &str) -> Option<PushEvent> {
    serde_json::from_str::<PushPayload>(text).ok()?.into_event()
}
