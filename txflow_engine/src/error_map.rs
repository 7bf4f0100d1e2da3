use txflow_protocol::{ProposalErrorCode, SendErrorCode};

/// Where a proposal error code is surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorSlot {
    Address(FieldError),
    Amount(FieldError),
    Fee(FieldError),
    /// Unrecognised codes go to a blocking alert.
    Alert(ProposalErrorCode),
}

/// A field-scoped error, carried as an i18n message key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub key: String,
}

impl FieldError {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    pub fn invalid_amount() -> Self {
        Self::new("send.error.invalidAmount")
    }

    fn for_code(code: &ProposalErrorCode) -> Self {
        Self::new(format!("send.error.{}", code.as_str()))
    }
}

pub fn classify(code: &ProposalErrorCode) -> ErrorSlot {
    match code {
        ProposalErrorCode::InvalidAddress => ErrorSlot::Address(FieldError::for_code(code)),
        ProposalErrorCode::InvalidAmount | ProposalErrorCode::InsufficientFunds => {
            ErrorSlot::Amount(FieldError::for_code(code))
        }
        ProposalErrorCode::FeeTooLow | ProposalErrorCode::FeesNotAvailable => {
            ErrorSlot::Fee(FieldError::for_code(code))
        }
        ProposalErrorCode::Other(_) => ErrorSlot::Alert(code.clone()),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors {
    pub address: Option<FieldError>,
    pub amount: Option<FieldError>,
    pub fee: Option<FieldError>,
}

impl FieldErrors {
    pub fn clear(&mut self) {
        *self = FieldErrors::default();
    }

    /// Locally detected amount problems (failed conversion, unreadable QR amount).
    pub fn set_amount(&mut self, err: FieldError) {
        self.clear();
        self.amount = Some(err);
    }

    /// Replaces all field errors with the one `slot` names. Returns the alert code for the
    /// unclassified path, in which case every field is left clear.
    pub fn apply(&mut self, slot: ErrorSlot) -> Option<ProposalErrorCode> {
        self.clear();
        match slot {
            ErrorSlot::Address(e) => self.address = Some(e),
            ErrorSlot::Amount(e) => self.amount = Some(e),
            ErrorSlot::Fee(e) => self.fee = Some(e),
            ErrorSlot::Alert(code) => return Some(code),
        }
        None
    }

    pub fn count(&self) -> usize {
        [&self.address, &self.amount, &self.fee]
            .iter()
            .filter(|e| e.is_some())
            .count()
    }

    pub fn is_clear(&self) -> bool {
        self.count() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Alert {
    /// Unclassified proposal error. Dismissing it re-arms the escape guard.
    Proposal { code: String },
    Send {
        key: &'static str,
        message: Option<String>,
    },
    InvalidQrFormat,
    PairingRequired,
    Camera { message: String },
}

impl Alert {
    pub fn message_key(&self) -> &str {
        match self {
            Alert::Proposal { code } => code,
            Alert::Send { key, .. } => key,
            Alert::InvalidQrFormat => "invalidFormat",
            Alert::PairingRequired => "warning.sendPairing",
            Alert::Camera { message } => message,
        }
    }
}

/// Known codes get their own message; everything else the generic one.
pub fn send_failure_alert(code: Option<&SendErrorCode>, message: Option<String>) -> Alert {
    match code {
        Some(SendErrorCode::Erc20InsufficientGasFunds) => Alert::Send {
            key: "send.error.erc20InsufficientGasFunds",
            message: None,
        },
        _ => Alert::Send {
            key: "unknownError",
            message,
        },
    }
}
