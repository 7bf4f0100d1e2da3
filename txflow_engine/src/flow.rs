//! The send-flow state machine.
//!
//! [`SendFlow`] performs no I/O. Every user action and every completion of an outside call is
//! an [`Event`]; handling one mutates the flow and returns the [`Effect`]s the caller must carry
//! out (start a timer, call the backend, show an alert). Completions come back as further events
//! tagged with the token the effect carried, and stale ones are dropped here.

use crate::coin_control::CoinControl;
use crate::config::Timing;
use crate::debounce::{Debouncer, TimerId, TimerKind};
use crate::error_map::{classify, Alert, FieldError, FieldErrors};
use crate::fiat::{ConversionApplied, ConversionDirection, FiatSync};
use crate::qr::{normalize_btc_amount, parse_payment_uri};
use crate::signing::{Resolved, SendResolution, SessionId, SigningMachine, SigningState};
use crate::tracker::{LatestWins, RequestToken};
use std::collections::BTreeSet;
use std::time::Duration;
use txflow_protocol::{
    is_bitcoin_based, Amount, Balance, FeeTargetCode, FeeTargetList, ProposalErrorCode,
    ProposalReply, PushEvent, TxProposalArgs, Utxo,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub code: String,
    pub coin_code: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProposalInput {
    pub recipient_address: String,
    pub amount: String,
    pub send_all: bool,
    pub fee_target: Option<FeeTargetCode>,
    pub custom_fee: String,
    pub selected_utxos: BTreeSet<String>,
}

impl ProposalInput {
    /// The request body for this input, or `None` when it fails the local pre-check (no
    /// address, no amount outside send-all, no fee target, or a custom target without a fee).
    pub fn to_args(&self) -> Option<TxProposalArgs> {
        let fee_target = self.fee_target?;
        let address = self.recipient_address.trim();
        let amount = self.amount.trim();
        let custom_fee = self.custom_fee.trim();
        if address.is_empty() || (!self.send_all && amount.is_empty()) {
            return None;
        }
        if fee_target == FeeTargetCode::Custom && custom_fee.is_empty() {
            return None;
        }
        Some(TxProposalArgs {
            address: address.to_string(),
            amount: if self.send_all { String::new() } else { amount.to_string() },
            fee_target,
            custom_fee: custom_fee.to_string(),
            send_all: self.send_all,
            selected_utxos: self.selected_utxos.iter().cloned().collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    pub fee_target: FeeTargetCode,
    pub proposed_fee: Amount,
    pub proposed_amount: Amount,
    pub proposed_total: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposalResult {
    Valid(FeeQuote),
    /// `error_code` is `None` for local pre-check failures and transport failures.
    Invalid {
        error_code: Option<ProposalErrorCode>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    EditAddress(String),
    EditAmount(String),
    EditFiatAmount(String),
    SetSendAll(bool),
    SelectFeeTarget(FeeTargetCode),
    EditCustomFee(String),
    SetCoinControl(bool),
    ToggleUtxo(String),
    SetUtxoSelection(BTreeSet<String>),
    QrScanned(String),
    EditNote(String),
    SendToSelf,
    SetPairing { paired: bool, mobile_channel: bool },
    Retry,
    Submit,
    AlertDismissed,
}

impl Action {
    /// Actions that are refused while the device is confirming.
    fn is_edit(&self) -> bool {
        !matches!(self, Action::AlertDismissed | Action::SetPairing { .. } | Action::Submit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Action(Action),
    TimerFired(TimerId),
    ProposalResolved {
        token: RequestToken,
        reply: Result<ProposalReply, TransportFailure>,
    },
    ConversionResolved {
        token: RequestToken,
        direction: ConversionDirection,
        converted: Option<String>,
    },
    SendResolved {
        session: SessionId,
        resolution: SendResolution,
    },
    Push(PushEvent),
    BalanceLoaded(Balance),
    UtxosLoaded(Vec<Utxo>),
    FeeTargetsLoaded(FeeTargetList),
    ReceiveAddressLoaded(Option<String>),
}

impl From<Action> for Event {
    fn from(action: Action) -> Self {
        Event::Action(action)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Replaces whatever timer of the same kind is pending.
    StartTimer { id: TimerId, delay: Duration },
    CancelTimer(TimerKind),
    ProposeTx {
        token: RequestToken,
        args: TxProposalArgs,
    },
    Convert {
        token: RequestToken,
        direction: ConversionDirection,
        value: String,
    },
    SendTx { session: SessionId },
    ProposeNote(String),
    FetchReceiveAddress,
    RefreshBalance,
    ShowAlert {
        alert: Alert,
        rearm_on_dismiss: bool,
    },
}

/// Everything a view needs to render the send form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSnapshot {
    pub input: ProposalInput,
    pub fiat_amount: String,
    pub note: String,
    pub result: Option<ProposalResult>,
    pub errors: FieldErrors,
    pub is_updating_proposal: bool,
    pub signing: SigningState,
    pub balance: Option<Balance>,
    pub fee_targets: Option<FeeTargetList>,
    pub coin_control_enabled: bool,
    pub utxos: Vec<Utxo>,
    pub alert: Option<Alert>,
    pub escape_guard_armed: bool,
    pub no_mobile_channel_error: bool,
}

impl FlowSnapshot {
    pub fn quote(&self) -> Option<&FeeQuote> {
        match &self.result {
            Some(ProposalResult::Valid(q)) => Some(q),
            _ => None,
        }
    }

    /// In send-all mode the amount shown is the one the backend computed.
    pub fn display_amount(&self) -> &str {
        match (self.input.send_all, self.quote()) {
            (true, Some(q)) => &q.proposed_amount.amount,
            (true, None) => "",
            (false, _) => &self.input.amount,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    refresh_fiat: bool,
    fee_target: FeeTargetCode,
}

pub struct SendFlow {
    ctx: AccountContext,
    timing: Timing,
    input: ProposalInput,
    fiat_amount: String,
    note: String,
    result: Option<ProposalResult>,
    errors: FieldErrors,
    updating: bool,
    proposals: LatestWins,
    in_flight: Option<InFlight>,
    fiat: FiatSync,
    debounce: Debouncer,
    coin_control: CoinControl,
    signing: SigningMachine,
    balance: Option<Balance>,
    utxos: Vec<Utxo>,
    fee_targets: Option<FeeTargetList>,
    no_mobile_channel_error: bool,
    escape_guard_armed: bool,
    alert: Option<Alert>,
}

impl SendFlow {
    pub fn new(ctx: AccountContext, timing: Timing) -> Self {
        Self {
            ctx,
            timing,
            input: ProposalInput::default(),
            fiat_amount: String::new(),
            note: String::new(),
            result: None,
            errors: FieldErrors::default(),
            updating: false,
            proposals: LatestWins::default(),
            in_flight: None,
            fiat: FiatSync::default(),
            debounce: Debouncer::new(timing.debounce),
            coin_control: CoinControl::default(),
            signing: SigningMachine::default(),
            balance: None,
            utxos: Vec::new(),
            fee_targets: None,
            no_mobile_channel_error: false,
            escape_guard_armed: true,
            alert: None,
        }
    }

    pub fn context(&self) -> &AccountContext {
        &self.ctx
    }

    pub fn input(&self) -> &ProposalInput {
        &self.input
    }

    pub fn result(&self) -> Option<&ProposalResult> {
        self.result.as_ref()
    }

    pub fn errors(&self) -> &FieldErrors {
        &self.errors
    }

    pub fn is_updating_proposal(&self) -> bool {
        self.updating
    }

    pub fn signing_state(&self) -> SigningState {
        self.signing.state()
    }

    pub fn fiat_amount(&self) -> &str {
        &self.fiat_amount
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            input: self.input.clone(),
            fiat_amount: self.fiat_amount.clone(),
            note: self.note.clone(),
            result: self.result.clone(),
            errors: self.errors.clone(),
            is_updating_proposal: self.updating,
            signing: self.signing.state(),
            balance: self.balance.clone(),
            fee_targets: self.fee_targets.clone(),
            coin_control_enabled: self.coin_control.is_enabled(),
            utxos: self.utxos.clone(),
            alert: self.alert.clone(),
            escape_guard_armed: self.escape_guard_armed,
            no_mobile_channel_error: self.no_mobile_channel_error,
        }
    }

    pub fn handle(&mut self, event: impl Into<Event>) -> Vec<Effect> {
        let mut fx = Vec::new();
        match event.into() {
            Event::Action(action) => self.on_action(action, &mut fx),
            Event::TimerFired(id) => self.on_timer(id, &mut fx),
            Event::ProposalResolved { token, reply } => self.on_proposal(token, reply, &mut fx),
            Event::ConversionResolved {
                token,
                direction,
                converted,
            } => self.on_conversion(token, direction, converted, &mut fx),
            Event::SendResolved {
                session,
                resolution,
            } => self.on_send_resolved(session, resolution, &mut fx),
            Event::Push(push) => self.on_push(push, &mut fx),
            Event::BalanceLoaded(balance) => self.balance = Some(balance),
            Event::UtxosLoaded(utxos) => {
                let pruned = self.coin_control.set_spendable(&utxos);
                self.utxos = utxos;
                if pruned {
                    self.sync_selection();
                    if !self.signing.state().is_active() {
                        self.negotiate_now(self.input.send_all, &mut fx);
                    }
                }
            }
            Event::FeeTargetsLoaded(list) => {
                let default = list.default_fee_target;
                self.fee_targets = Some(list);
                if self.input.fee_target.is_none() && !self.signing.state().is_active() {
                    self.select_fee_target(default, &mut fx);
                }
            }
            Event::ReceiveAddressLoaded(address) => {
                if let Some(address) = address {
                    if !self.signing.state().is_active() {
                        self.input.recipient_address = address;
                        self.schedule_negotiation(true, &mut fx);
                    }
                }
            }
        }
        fx
    }

    fn on_action(&mut self, action: Action, fx: &mut Vec<Effect>) {
        if action.is_edit() && self.signing.state().is_active() {
            tracing::debug!(?action, "edit ignored while the device is confirming");
            return;
        }
        match action {
            Action::EditAddress(address) => {
                self.input.recipient_address = address;
                self.schedule_negotiation(true, fx);
            }
            Action::EditAmount(amount) => {
                if self.input.send_all {
                    return;
                }
                self.input.amount = amount;
                self.convert_coin_amount(fx);
                self.schedule_negotiation(false, fx);
            }
            Action::EditFiatAmount(fiat) => {
                if self.input.send_all {
                    return;
                }
                self.fiat_amount = fiat;
                match self.fiat.request(ConversionDirection::FromFiat, &self.fiat_amount) {
                    Some(req) => {
                        self.hold_for_coin_amount(fx);
                        fx.push(Effect::Convert {
                            token: req.token,
                            direction: req.direction,
                            value: req.value,
                        });
                    }
                    None => {
                        self.input.amount.clear();
                        self.schedule_negotiation(false, fx);
                    }
                }
            }
            Action::SetSendAll(send_all) => {
                if self.input.send_all == send_all {
                    return;
                }
                self.input.send_all = send_all;
                if !send_all {
                    self.convert_coin_amount(fx);
                }
                self.negotiate_now(send_all, fx);
            }
            Action::SelectFeeTarget(code) => self.select_fee_target(code, fx),
            Action::EditCustomFee(fee) => {
                self.input.custom_fee = fee;
                self.schedule_negotiation(self.input.send_all, fx);
            }
            Action::SetCoinControl(enabled) => {
                if self.coin_control.set_enabled(enabled) {
                    self.sync_selection();
                    self.negotiate_now(self.input.send_all, fx);
                }
            }
            Action::ToggleUtxo(id) => {
                if self.coin_control.toggle(&id) {
                    self.sync_selection();
                    self.negotiate_now(self.input.send_all, fx);
                }
            }
            Action::SetUtxoSelection(ids) => {
                if self.coin_control.set_selection(ids) {
                    self.sync_selection();
                    self.negotiate_now(self.input.send_all, fx);
                }
            }
            Action::QrScanned(uri) => self.apply_qr(&uri, fx),
            Action::EditNote(note) => {
                self.note = note.clone();
                fx.push(Effect::ProposeNote(note));
            }
            Action::SendToSelf => fx.push(Effect::FetchReceiveAddress),
            Action::SetPairing {
                paired,
                mobile_channel,
            } => {
                self.no_mobile_channel_error =
                    paired && !mobile_channel && is_bitcoin_based(&self.ctx.coin_code);
            }
            Action::Retry => self.negotiate_now(self.input.send_all, fx),
            Action::Submit => self.submit(fx),
            Action::AlertDismissed => {
                self.alert = None;
                self.escape_guard_armed = true;
            }
        }
    }

    fn select_fee_target(&mut self, code: FeeTargetCode, fx: &mut Vec<Effect>) {
        self.input.fee_target = Some(code);
        self.input.custom_fee.clear();
        self.negotiate_now(self.input.send_all, fx);
    }

    fn apply_qr(&mut self, uri: &str, fx: &mut Vec<Effect>) {
        let request = match parse_payment_uri(uri, &self.ctx.coin_code) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "rejecting scanned uri");
                self.raise_alert(Alert::InvalidQrFormat, false, fx);
                return;
            }
        };

        self.input.recipient_address = request.address;
        self.input.send_all = false;
        self.fiat_amount.clear();

        let mut rejected_amount = false;
        if let Some(amount) = request.amount {
            let accepted = if matches!(self.ctx.coin_code.as_str(), "btc" | "tbtc") {
                normalize_btc_amount(&amount)
            } else {
                Some(amount)
            };
            match accepted {
                Some(amount) => self.input.amount = amount,
                None => {
                    self.input.amount.clear();
                    rejected_amount = true;
                }
            }
        }

        // A cleared amount cancels any conversion still running for the old one.
        self.convert_coin_amount(fx);
        self.schedule_negotiation(false, fx);
        if rejected_amount {
            self.errors.set_amount(FieldError::invalid_amount());
        }
    }

    fn submit(&mut self, fx: &mut Vec<Effect>) {
        if self.no_mobile_channel_error {
            self.raise_alert(Alert::PairingRequired, false, fx);
            return;
        }
        let valid = matches!(self.result, Some(ProposalResult::Valid(_)));
        if !valid || self.updating || self.input.to_args().is_none() {
            tracing::debug!(valid, updating = self.updating, "submit refused");
            return;
        }
        let Some(session) = self.signing.begin() else {
            return;
        };
        fx.push(Effect::CancelTimer(TimerKind::ResultDisplay));
        fx.push(Effect::SendTx { session });
    }

    fn on_timer(&mut self, id: TimerId, fx: &mut Vec<Effect>) {
        match id.kind {
            TimerKind::Proposal => {
                if let Some(refresh_fiat) = self.debounce.fire(id) {
                    self.dispatch(refresh_fiat, fx);
                }
            }
            TimerKind::ResultDisplay => {
                self.signing.revert_fired(id);
            }
        }
    }

    fn on_proposal(
        &mut self,
        token: RequestToken,
        reply: Result<ProposalReply, TransportFailure>,
        fx: &mut Vec<Effect>,
    ) {
        if !self.proposals.resolve(token) {
            tracing::debug!(token = token.value(), "dropping stale proposal");
            return;
        }
        let Some(in_flight) = self.in_flight.take() else {
            return;
        };
        self.updating = false;

        match reply {
            Ok(ProposalReply::Accepted { fee, amount, total }) => {
                self.errors.clear();
                let refresh_value = amount.amount.clone();
                self.result = Some(ProposalResult::Valid(FeeQuote {
                    fee_target: in_flight.fee_target,
                    proposed_fee: fee,
                    proposed_amount: amount,
                    proposed_total: total,
                }));
                if in_flight.refresh_fiat && !self.awaiting_coin_amount() {
                    self.request_conversion(ConversionDirection::ToFiat, &refresh_value, fx);
                }
            }
            Ok(ProposalReply::Rejected { error_code }) => {
                match &error_code {
                    Some(code) => {
                        if let Some(code) = self.errors.apply(classify(code)) {
                            self.escape_guard_armed = false;
                            self.raise_alert(
                                Alert::Proposal {
                                    code: code.as_str().to_string(),
                                },
                                true,
                                fx,
                            );
                        }
                    }
                    None => self.errors.clear(),
                }
                self.result = Some(ProposalResult::Invalid { error_code });
            }
            Err(TransportFailure(reason)) => {
                tracing::warn!(%reason, "proposal request failed");
                self.result = Some(ProposalResult::Invalid { error_code: None });
            }
        }
    }

    fn on_conversion(
        &mut self,
        token: RequestToken,
        direction: ConversionDirection,
        converted: Option<String>,
        fx: &mut Vec<Effect>,
    ) {
        match self.fiat.resolve(token, direction, converted) {
            None => {}
            Some(ConversionApplied::FiatAmount(v)) => self.fiat_amount = v,
            Some(ConversionApplied::CoinAmount(v)) => {
                if self.signing.state().is_active() || self.input.send_all {
                    return;
                }
                self.input.amount = v;
                self.schedule_negotiation(false, fx);
            }
            Some(ConversionApplied::Failed) => {
                if direction == ConversionDirection::FromFiat {
                    // No coin amount to negotiate with.
                    self.invalidate();
                    self.updating = false;
                    self.result = Some(ProposalResult::Invalid { error_code: None });
                }
                self.errors.set_amount(FieldError::invalid_amount());
            }
        }
    }

    fn on_send_resolved(
        &mut self,
        session: SessionId,
        resolution: SendResolution,
        fx: &mut Vec<Effect>,
    ) {
        let Some(resolved) = self.signing.resolve(session, resolution) else {
            tracing::debug!(?session, "ignoring resolution for inactive session");
            return;
        };
        match resolved {
            Resolved::Sent { revert } => {
                self.input.recipient_address.clear();
                self.input.amount.clear();
                self.input.custom_fee.clear();
                self.input.send_all = false;
                self.fiat_amount.clear();
                self.note.clear();
                self.fiat.cancel();
                self.coin_control.clear();
                self.sync_selection();
                self.settle_locally_invalid(fx);
                fx.push(Effect::StartTimer {
                    id: revert,
                    delay: self.timing.result_display,
                });
                fx.push(Effect::RefreshBalance);
            }
            Resolved::Aborted { revert } => {
                self.clear_selection_after_send(fx);
                fx.push(Effect::StartTimer {
                    id: revert,
                    delay: self.timing.result_display,
                });
            }
            Resolved::Failed { alert } => {
                self.clear_selection_after_send(fx);
                if let Some(alert) = alert {
                    self.raise_alert(alert, false, fx);
                }
            }
        }
    }

    fn clear_selection_after_send(&mut self, fx: &mut Vec<Effect>) {
        if self.coin_control.clear() {
            self.sync_selection();
            self.negotiate_now(self.input.send_all, fx);
        }
    }

    fn on_push(&mut self, push: PushEvent, fx: &mut Vec<Effect>) {
        match &push {
            PushEvent::AccountSynced { account } | PushEvent::AccountStatusChanged { account } => {
                if *account == self.ctx.code {
                    fx.push(Effect::RefreshBalance);
                }
            }
            PushEvent::SignProgress(_) | PushEvent::SignConfirm => {
                if !self.signing.on_push(&push) {
                    tracing::debug!(?push, "device event without an active session");
                }
            }
        }
    }

    /// The current result no longer matches the input.
    fn invalidate(&mut self) {
        self.result = None;
        self.in_flight = None;
        self.proposals.supersede();
    }

    fn settle_locally_invalid(&mut self, fx: &mut Vec<Effect>) {
        self.invalidate();
        if self.debounce.cancel() {
            fx.push(Effect::CancelTimer(TimerKind::Proposal));
        }
        self.errors.clear();
        self.updating = false;
        self.result = Some(ProposalResult::Invalid { error_code: None });
    }

    /// A typed fiat amount is still being converted, so the coin amount in the input is not
    /// the one the user asked for.
    fn awaiting_coin_amount(&self) -> bool {
        !self.input.send_all && self.fiat.active() == Some(ConversionDirection::FromFiat)
    }

    /// Nothing is dispatched until the conversion lands; its coin amount schedules the proposal.
    fn hold_for_coin_amount(&mut self, fx: &mut Vec<Effect>) {
        self.invalidate();
        if self.debounce.cancel() {
            fx.push(Effect::CancelTimer(TimerKind::Proposal));
        }
        self.errors.clear();
        self.updating = true;
    }

    /// Free-text edits: coalesce through the debounce timer.
    fn schedule_negotiation(&mut self, refresh_fiat: bool, fx: &mut Vec<Effect>) {
        if self.awaiting_coin_amount() {
            self.hold_for_coin_amount(fx);
            return;
        }
        if self.input.to_args().is_none() {
            self.settle_locally_invalid(fx);
            return;
        }
        self.invalidate();
        self.errors.clear();
        self.updating = true;
        let id = self.debounce.schedule(refresh_fiat);
        fx.push(Effect::StartTimer {
            id,
            delay: self.debounce.delay(),
        });
    }

    /// Discrete actions: no debounce.
    fn negotiate_now(&mut self, refresh_fiat: bool, fx: &mut Vec<Effect>) {
        if self.debounce.cancel() {
            fx.push(Effect::CancelTimer(TimerKind::Proposal));
        }
        self.invalidate();
        self.errors.clear();
        self.dispatch(refresh_fiat, fx);
    }

    fn dispatch(&mut self, refresh_fiat: bool, fx: &mut Vec<Effect>) {
        if self.awaiting_coin_amount() {
            self.hold_for_coin_amount(fx);
            return;
        }
        let Some(args) = self.input.to_args() else {
            self.settle_locally_invalid(fx);
            return;
        };
        let token = self.proposals.issue();
        self.in_flight = Some(InFlight {
            refresh_fiat,
            fee_target: args.fee_target,
        });
        self.updating = true;
        tracing::debug!(token = token.value(), "dispatching proposal");
        fx.push(Effect::ProposeTx { token, args });
    }

    fn convert_coin_amount(&mut self, fx: &mut Vec<Effect>) {
        let amount = self.input.amount.clone();
        if !self.request_conversion(ConversionDirection::ToFiat, &amount, fx) {
            self.fiat_amount.clear();
        }
    }

    fn request_conversion(
        &mut self,
        direction: ConversionDirection,
        value: &str,
        fx: &mut Vec<Effect>,
    ) -> bool {
        match self.fiat.request(direction, value) {
            Some(req) => {
                fx.push(Effect::Convert {
                    token: req.token,
                    direction: req.direction,
                    value: req.value,
                });
                true
            }
            None => false,
        }
    }

    fn sync_selection(&mut self) {
        self.input.selected_utxos = self.coin_control.selected().clone();
    }

    fn raise_alert(&mut self, alert: Alert, rearm_on_dismiss: bool, fx: &mut Vec<Effect>) {
        self.alert = Some(alert.clone());
        fx.push(Effect::ShowAlert {
            alert,
            rearm_on_dismiss,
        });
    }
}
