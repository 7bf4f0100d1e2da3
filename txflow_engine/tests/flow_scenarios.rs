use std::collections::BTreeSet;
use std::time::Duration;
use txflow_engine::debounce::{TimerId, TimerKind};
use txflow_engine::fiat::ConversionDirection;
use txflow_engine::flow::TransportFailure;
use txflow_engine::signing::{SendResolution, SessionId};
use txflow_engine::tracker::RequestToken;
use txflow_engine::{
    AccountContext, Action, Alert, Effect, Event, ProposalResult, SendFlow, SigningState, Timing,
};
use txflow_protocol::{
    Amount, FeeTargetCode, ProposalErrorCode, ProposalReply, PushEvent, SendErrorCode, SendOutcome,
    SignProgress, TxProposalArgs, Utxo,
};

fn new_flow(coin: &str) -> SendFlow {
    SendFlow::new(
        AccountContext {
            code: format!("{coin}-main"),
            coin_code: coin.to_string(),
        },
        Timing::default(),
    )
}

fn proposal(fx: &[Effect]) -> Option<(RequestToken, TxProposalArgs)> {
    fx.iter().find_map(|e| match e {
        Effect::ProposeTx { token, args } => Some((*token, args.clone())),
        _ => None,
    })
}

fn timer(fx: &[Effect], kind: TimerKind) -> Option<(TimerId, Duration)> {
    fx.iter().find_map(|e| match e {
        Effect::StartTimer { id, delay } if id.kind == kind => Some((*id, *delay)),
        _ => None,
    })
}

fn conversion(fx: &[Effect]) -> Option<(RequestToken, ConversionDirection, String)> {
    fx.iter().find_map(|e| match e {
        Effect::Convert {
            token,
            direction,
            value,
        } => Some((*token, *direction, value.clone())),
        _ => None,
    })
}

fn send_session(fx: &[Effect]) -> Option<SessionId> {
    fx.iter().find_map(|e| match e {
        Effect::SendTx { session } => Some(*session),
        _ => None,
    })
}

fn accepted(amount: &str, fee: &str) -> Result<ProposalReply, TransportFailure> {
    Ok(ProposalReply::Accepted {
        fee: Amount::new(fee, "BTC"),
        amount: Amount::new(amount, "BTC"),
        total: Amount::new(amount, "BTC"),
    })
}

fn rejected(code: ProposalErrorCode) -> Result<ProposalReply, TransportFailure> {
    Ok(ProposalReply::Rejected {
        error_code: Some(code),
    })
}

/// Fires the debounce timer in `fx` and returns the proposal it dispatches.
fn settle_debounce(flow: &mut SendFlow, fx: &[Effect]) -> (RequestToken, TxProposalArgs) {
    let (id, delay) = timer(fx, TimerKind::Proposal).expect("debounce timer");
    assert_eq!(delay, Duration::from_millis(400));
    let fx = flow.handle(Event::TimerFired(id));
    proposal(&fx).expect("proposal dispatched")
}

/// Address, amount and fee target filled in, proposal accepted.
fn valid_form(flow: &mut SendFlow) {
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    flow.handle(Action::EditAddress("bc1qX".into()));
    let fx = flow.handle(Action::EditAmount("0.01".into()));
    let (token, _) = settle_debounce(flow, &fx);
    flow.handle(Event::ProposalResolved {
        token,
        reply: accepted("0.01", "0.0001"),
    });
    assert!(matches!(flow.result(), Some(ProposalResult::Valid(_))));
}

#[test]
fn negotiate_then_sign_then_revert_to_idle() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    let fx = flow.handle(Action::EditAddress("bc1qX".into()));
    assert!(proposal(&fx).is_none());
    assert_eq!(flow.result(), Some(&ProposalResult::Invalid { error_code: None }));

    let fx = flow.handle(Action::EditAmount("0.01".into()));
    assert!(flow.is_updating_proposal());
    let (_, direction, value) = conversion(&fx).expect("fiat refresh");
    assert_eq!((direction, value.as_str()), (ConversionDirection::ToFiat, "0.01"));

    let (token, args) = settle_debounce(&mut flow, &fx);
    assert_eq!(args.address, "bc1qX");
    assert_eq!(args.amount, "0.01");
    assert_eq!(args.fee_target, FeeTargetCode::Normal);
    assert!(!args.send_all);

    flow.handle(Event::ProposalResolved {
        token,
        reply: Ok(ProposalReply::Accepted {
            fee: Amount::new("0.0001", "BTC"),
            amount: Amount::new("0.01", "BTC"),
            total: Amount::new("0.0101", "BTC"),
        }),
    });
    assert!(!flow.is_updating_proposal());
    assert!(flow.errors().is_clear());
    let snap = flow.snapshot();
    let quote = snap.quote().expect("valid quote");
    assert_eq!(quote.proposed_fee.amount, "0.0001");
    assert_eq!(quote.proposed_total.amount, "0.0101");
    assert_eq!(quote.fee_target, FeeTargetCode::Normal);

    let fx = flow.handle(Action::Submit);
    assert!(fx.contains(&Effect::CancelTimer(TimerKind::ResultDisplay)));
    let session = send_session(&fx).expect("sendtx");
    assert_eq!(flow.signing_state(), SigningState::Confirming);

    flow.handle(Event::Push(PushEvent::SignProgress(SignProgress { step: 1, steps: 2 })));
    assert_eq!(flow.signing_state(), SigningState::SignProgress { step: 1, steps: 2 });
    flow.handle(Event::Push(PushEvent::SignConfirm));
    assert_eq!(flow.signing_state(), SigningState::SignConfirm);

    let fx = flow.handle(Event::SendResolved {
        session,
        resolution: SendResolution::Completed(SendOutcome::Sent),
    });
    assert_eq!(flow.signing_state(), SigningState::Sent);
    assert!(fx.contains(&Effect::RefreshBalance));
    let (revert, delay) = timer(&fx, TimerKind::ResultDisplay).expect("revert timer");
    assert_eq!(delay, Duration::from_secs(5));
    assert!(flow.input().recipient_address.is_empty());
    assert!(flow.input().amount.is_empty());

    flow.handle(Event::TimerFired(revert));
    assert_eq!(flow.signing_state(), SigningState::Idle);
}

#[test]
fn older_proposal_never_overwrites_newer() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    flow.handle(Action::EditAddress("bc1qX".into()));

    let fx = flow.handle(Action::EditAmount("1".into()));
    let (a, _) = settle_debounce(&mut flow, &fx);
    let fx = flow.handle(Action::EditAmount("2".into()));
    let (b, args) = settle_debounce(&mut flow, &fx);
    assert_eq!(args.amount, "2");

    flow.handle(Event::ProposalResolved {
        token: b,
        reply: accepted("2", "0.0002"),
    });
    flow.handle(Event::ProposalResolved {
        token: a,
        reply: accepted("1", "0.0001"),
    });

    let snap = flow.snapshot();
    assert_eq!(snap.quote().map(|q| q.proposed_amount.amount.as_str()), Some("2"));
    assert!(!snap.is_updating_proposal);
}

#[test]
fn response_arriving_during_debounce_is_dropped() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    flow.handle(Action::EditAddress("bc1qX".into()));
    let fx = flow.handle(Action::EditAmount("1".into()));
    let (a, _) = settle_debounce(&mut flow, &fx);

    flow.handle(Action::EditAmount("3".into()));
    flow.handle(Event::ProposalResolved {
        token: a,
        reply: accepted("1", "0.0001"),
    });

    assert_eq!(flow.result(), None);
    assert!(flow.is_updating_proposal());
}

#[test]
fn rapid_edits_collapse_into_one_request() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    flow.handle(Action::EditAddress("bc1qX".into()));

    let mut timers = Vec::new();
    for amount in ["0", "0.", "0.0", "0.01"] {
        let fx = flow.handle(Action::EditAmount(amount.into()));
        timers.push(timer(&fx, TimerKind::Proposal).expect("timer").0);
    }

    let dispatched: Vec<_> = timers
        .into_iter()
        .filter_map(|id| proposal(&flow.handle(Event::TimerFired(id))))
        .collect();
    assert_eq!(dispatched.len(), 1);
    assert_eq!(dispatched[0].1.amount, "0.01");
}

#[test]
fn send_all_asks_backend_for_amount() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Low));
    flow.handle(Action::EditAddress("bc1qX".into()));

    let fx = flow.handle(Action::SetSendAll(true));
    let (token, args) = proposal(&fx).expect("immediate proposal");
    assert!(args.send_all);
    assert_eq!(args.amount, "");

    let fx = flow.handle(Event::ProposalResolved {
        token,
        reply: accepted("0.4999", "0.0001"),
    });
    let (conv, direction, value) = conversion(&fx).expect("fiat refresh for computed amount");
    assert_eq!((direction, value.as_str()), (ConversionDirection::ToFiat, "0.4999"));
    assert_eq!(flow.snapshot().display_amount(), "0.4999");

    flow.handle(Event::ConversionResolved {
        token: conv,
        direction,
        converted: Some("12000.00".into()),
    });
    assert_eq!(flow.fiat_amount(), "12000.00");

    assert!(flow.handle(Action::EditAmount("5".into())).is_empty());
}

#[test]
fn coin_control_changes_supersede_the_quote() {
    let mut flow = new_flow("btc");
    flow.handle(Event::UtxosLoaded(vec![
        Utxo {
            out_point: "aa:0".into(),
            amount: Amount::new("0.5", "BTC"),
            address: "bc1qA".into(),
            script_type: None,
        },
        Utxo {
            out_point: "bb:1".into(),
            amount: Amount::new("0.2", "BTC"),
            address: "bc1qB".into(),
            script_type: None,
        },
    ]));
    valid_form(&mut flow);

    let fx = flow.handle(Action::SetCoinControl(true));
    let (first, _) = proposal(&fx).expect("renegotiates on enable");
    assert_eq!(flow.result(), None);

    let fx = flow.handle(Action::ToggleUtxo("aa:0".into()));
    let (second, args) = proposal(&fx).expect("renegotiates on toggle");
    assert_eq!(args.selected_utxos, vec!["aa:0".to_string()]);

    flow.handle(Event::ProposalResolved {
        token: first,
        reply: accepted("0.01", "0.0001"),
    });
    assert_eq!(flow.result(), None);
    flow.handle(Event::ProposalResolved {
        token: second,
        reply: accepted("0.01", "0.0003"),
    });
    assert!(matches!(
        flow.result(),
        Some(ProposalResult::Valid(q)) if q.proposed_fee.amount == "0.0003"
    ));

    // Unknown outpoints are not selectable.
    assert!(flow.handle(Action::ToggleUtxo("zz:9".into())).is_empty());

    // The selected output got spent elsewhere.
    let fx = flow.handle(Event::UtxosLoaded(vec![Utxo {
        out_point: "bb:1".into(),
        amount: Amount::new("0.2", "BTC"),
        address: "bc1qB".into(),
        script_type: None,
    }]));
    let (_, args) = proposal(&fx).expect("renegotiates after pruning");
    assert!(args.selected_utxos.is_empty());

    let fx = flow.handle(Action::SetUtxoSelection(BTreeSet::from(["bb:1".to_string()])));
    assert_eq!(proposal(&fx).expect("selection").1.selected_utxos, vec!["bb:1".to_string()]);
}

#[test]
fn edits_are_locked_while_device_confirms() {
    let mut flow = new_flow("btc");
    valid_form(&mut flow);
    let session = send_session(&flow.handle(Action::Submit)).expect("sendtx");

    assert!(flow.handle(Action::EditAddress("bc1qOther".into())).is_empty());
    assert!(flow.handle(Action::SetSendAll(true)).is_empty());
    assert_eq!(flow.input().recipient_address, "bc1qX");
    assert!(send_session(&flow.handle(Action::Submit)).is_none());

    let fx = flow.handle(Event::SendResolved {
        session,
        resolution: SendResolution::Completed(SendOutcome::Aborted),
    });
    assert_eq!(flow.signing_state(), SigningState::Aborted);
    let (stale_revert, _) = timer(&fx, TimerKind::ResultDisplay).expect("revert timer");

    // A new submit before the revert fires owns the state from then on.
    let next = send_session(&flow.handle(Action::Submit)).expect("second sendtx");
    assert_ne!(next, session);
    flow.handle(Event::TimerFired(stale_revert));
    assert_eq!(flow.signing_state(), SigningState::Confirming);

    // Resolution for the previous session is ignored.
    flow.handle(Event::SendResolved {
        session,
        resolution: SendResolution::Completed(SendOutcome::Sent),
    });
    assert_eq!(flow.signing_state(), SigningState::Confirming);
}

#[test]
fn send_failures_return_to_idle() {
    let mut flow = new_flow("eth");
    valid_form(&mut flow);
    let session = send_session(&flow.handle(Action::Submit)).expect("sendtx");

    let fx = flow.handle(Event::SendResolved {
        session,
        resolution: SendResolution::Completed(SendOutcome::Failed {
            code: Some(SendErrorCode::Erc20InsufficientGasFunds),
            message: None,
        }),
    });
    assert_eq!(flow.signing_state(), SigningState::Idle);
    assert!(fx.iter().any(|e| matches!(
        e,
        Effect::ShowAlert {
            alert: Alert::Send {
                key: "send.error.erc20InsufficientGasFunds",
                ..
            },
            ..
        }
    )));

    let session = send_session(&flow.handle(Action::Submit)).expect("retry send");
    let fx = flow.handle(Event::SendResolved {
        session,
        resolution: SendResolution::TransportFailed("connection reset".into()),
    });
    assert_eq!(flow.signing_state(), SigningState::Idle);
    assert!(!fx.iter().any(|e| matches!(e, Effect::ShowAlert { .. })));
}

#[test]
fn proposal_errors_map_to_one_place() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    flow.handle(Action::EditAddress("bc1qX".into()));
    let fx = flow.handle(Action::EditAmount("99".into()));
    let (token, _) = settle_debounce(&mut flow, &fx);
    flow.handle(Event::ProposalResolved {
        token,
        reply: rejected(ProposalErrorCode::InsufficientFunds),
    });
    let errors = flow.errors();
    assert_eq!(errors.count(), 1);
    assert_eq!(
        errors.amount.as_ref().map(|e| e.key.as_str()),
        Some("send.error.insufficientFunds")
    );

    let fx = flow.handle(Action::EditAddress("nonsense".into()));
    assert!(flow.errors().is_clear());
    let (token, _) = settle_debounce(&mut flow, &fx);
    let fx = flow.handle(Event::ProposalResolved {
        token,
        reply: rejected(ProposalErrorCode::Other("unexpected".into())),
    });
    assert!(flow.errors().is_clear());
    assert!(fx.contains(&Effect::ShowAlert {
        alert: Alert::Proposal {
            code: "unexpected".into(),
        },
        rearm_on_dismiss: true,
    }));
    assert!(!flow.snapshot().escape_guard_armed);

    flow.handle(Action::AlertDismissed);
    let snap = flow.snapshot();
    assert!(snap.escape_guard_armed);
    assert_eq!(snap.alert, None);
}

#[test]
fn transport_failure_marks_result_invalid() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    flow.handle(Action::EditAddress("bc1qX".into()));
    let fx = flow.handle(Action::EditAmount("0.1".into()));
    let (token, _) = settle_debounce(&mut flow, &fx);
    flow.handle(Event::ProposalResolved {
        token,
        reply: Err(TransportFailure("timed out".into())),
    });
    assert_eq!(flow.result(), Some(&ProposalResult::Invalid { error_code: None }));
    assert!(flow.errors().is_clear());

    let (retry, _) = proposal(&flow.handle(Action::Retry)).expect("retry");
    assert_ne!(retry, token);
}

#[test]
fn fiat_amount_drives_coin_amount() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));
    flow.handle(Action::EditAddress("bc1qX".into()));

    let fx = flow.handle(Action::EditFiatAmount("100".into()));
    let (token, direction, value) = conversion(&fx).expect("from-fiat conversion");
    assert_eq!((direction, value.as_str()), (ConversionDirection::FromFiat, "100"));
    assert!(proposal(&fx).is_none());
    assert!(flow.is_updating_proposal());

    let fx = flow.handle(Event::ConversionResolved {
        token,
        direction,
        converted: Some("0.0025".into()),
    });
    assert_eq!(flow.input().amount, "0.0025");
    let (_, args) = settle_debounce(&mut flow, &fx);
    assert_eq!(args.amount, "0.0025");

    let fx = flow.handle(Action::EditFiatAmount("abc".into()));
    let (token, direction, _) = conversion(&fx).expect("from-fiat conversion");
    flow.handle(Event::ConversionResolved {
        token,
        direction,
        converted: None,
    });
    assert_eq!(flow.result(), Some(&ProposalResult::Invalid { error_code: None }));
    assert!(!flow.is_updating_proposal());
    assert_eq!(
        flow.errors().amount.as_ref().map(|e| e.key.as_str()),
        Some("send.error.invalidAmount")
    );
}

#[test]
fn address_edit_waits_for_pending_fiat_conversion() {
    let mut flow = new_flow("btc");
    valid_form(&mut flow);

    let fx = flow.handle(Action::EditFiatAmount("100".into()));
    let (conv, direction, _) = conversion(&fx).expect("from-fiat conversion");

    // The coin amount in the form is still the old one: nothing may be priced with it.
    let fx = flow.handle(Action::EditAddress("bc1qY".into()));
    assert!(proposal(&fx).is_none());
    assert!(timer(&fx, TimerKind::Proposal).is_none());
    let fx = flow.handle(Action::SelectFeeTarget(FeeTargetCode::High));
    assert!(proposal(&fx).is_none());
    assert!(flow.is_updating_proposal());
    assert_eq!(flow.result(), None);
    assert!(send_session(&flow.handle(Action::Submit)).is_none());
    assert_eq!(flow.signing_state(), SigningState::Idle);

    let fx = flow.handle(Event::ConversionResolved {
        token: conv,
        direction,
        converted: Some("0.0025".into()),
    });
    assert_eq!(flow.input().amount, "0.0025");
    let (token, args) = settle_debounce(&mut flow, &fx);
    assert_eq!(args.address, "bc1qY");
    assert_eq!(args.amount, "0.0025");
    assert_eq!(args.fee_target, FeeTargetCode::High);

    // The typed fiat amount stays; no refresh conversion replaces it.
    let fx = flow.handle(Event::ProposalResolved {
        token,
        reply: accepted("0.0025", "0.0001"),
    });
    assert!(conversion(&fx).is_none());
    let snap = flow.snapshot();
    assert_eq!(snap.quote().map(|q| q.proposed_amount.amount.as_str()), Some("0.0025"));
    assert_eq!(snap.fiat_amount, "100");
    assert!(!snap.is_updating_proposal);
    assert!(send_session(&flow.handle(Action::Submit)).is_some());
}

#[test]
fn custom_fee_target_needs_a_fee_rate() {
    let mut flow = new_flow("btc");
    flow.handle(Action::EditAddress("bc1qX".into()));
    flow.handle(Action::EditAmount("0.01".into()));

    let fx = flow.handle(Action::SelectFeeTarget(FeeTargetCode::Custom));
    assert!(proposal(&fx).is_none());
    assert!(timer(&fx, TimerKind::Proposal).is_none());
    assert_eq!(flow.result(), Some(&ProposalResult::Invalid { error_code: None }));
    assert!(!flow.is_updating_proposal());

    let fx = flow.handle(Action::EditCustomFee("12".into()));
    assert!(proposal(&fx).is_none());
    assert!(flow.is_updating_proposal());
    let (_, args) = settle_debounce(&mut flow, &fx);
    assert_eq!(args.fee_target, FeeTargetCode::Custom);
    assert_eq!(args.custom_fee, "12");

    let fx = flow.handle(Action::EditCustomFee("  ".into()));
    assert!(timer(&fx, TimerKind::Proposal).is_none());
    assert_eq!(flow.result(), Some(&ProposalResult::Invalid { error_code: None }));
}

#[test]
fn scanned_payment_uri_fills_the_form() {
    let mut flow = new_flow("btc");
    flow.handle(Action::SelectFeeTarget(FeeTargetCode::Normal));

    let fx = flow.handle(Action::QrScanned("bitcoin:bc1qQR?amount=0.5&label=x".into()));
    assert_eq!(flow.input().recipient_address, "bc1qQR");
    assert_eq!(flow.input().amount, "0.5");
    assert!(conversion(&fx).is_some());
    let (_, args) = settle_debounce(&mut flow, &fx);
    assert_eq!((args.address.as_str(), args.amount.as_str()), ("bc1qQR", "0.5"));

    // Amounts are read as the backend reads them and rounded to whole satoshis.
    let fx = flow.handle(Action::QrScanned("bitcoin:bc1qQR2?amount=1e-3".into()));
    assert_eq!(flow.input().amount, "0.001");
    let (_, args) = settle_debounce(&mut flow, &fx);
    assert_eq!(args.amount, "0.001");
    flow.handle(Action::QrScanned("bitcoin:bc1qQR2?amount=.123456789".into()));
    assert_eq!(flow.input().amount, "0.12345679");
    assert!(flow.errors().is_clear());

    let fx = flow.handle(Action::QrScanned("bitcoin:bc1qQR3?amount=lots".into()));
    assert_eq!(flow.input().recipient_address, "bc1qQR3");
    assert_eq!(flow.input().amount, "");
    assert_eq!(flow.fiat_amount(), "");
    assert!(conversion(&fx).is_none());
    assert!(proposal(&fx).is_none());
    assert_eq!(
        flow.errors().amount.as_ref().map(|e| e.key.as_str()),
        Some("send.error.invalidAmount")
    );

    let fx = flow.handle(Action::QrScanned("mailto:someone@example.com".into()));
    assert!(fx.contains(&Effect::ShowAlert {
        alert: Alert::InvalidQrFormat,
        rearm_on_dismiss: false,
    }));
    assert_eq!(flow.input().recipient_address, "bc1qQR3");
}

#[test]
fn unpaired_mobile_channel_blocks_submit() {
    let mut flow = new_flow("btc");
    valid_form(&mut flow);
    flow.handle(Action::SetPairing {
        paired: true,
        mobile_channel: false,
    });
    let fx = flow.handle(Action::Submit);
    assert!(send_session(&fx).is_none());
    assert!(fx.contains(&Effect::ShowAlert {
        alert: Alert::PairingRequired,
        rearm_on_dismiss: false,
    }));
    assert_eq!(flow.signing_state(), SigningState::Idle);
}

#[test]
fn account_sync_refreshes_balance_only_for_own_account() {
    let mut flow = new_flow("btc");
    let fx = flow.handle(Event::Push(PushEvent::AccountSynced {
        account: "btc-main".into(),
    }));
    assert_eq!(fx, vec![Effect::RefreshBalance]);
    let fx = flow.handle(Event::Push(PushEvent::AccountSynced {
        account: "ltc-main".into(),
    }));
    assert!(fx.is_empty());

    // Device events with no session are ignored.
    flow.handle(Event::Push(PushEvent::SignConfirm));
    assert_eq!(flow.signing_state(), SigningState::Idle);
}
