use anyhow::{anyhow, Context};
use clap::Parser;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;
use txflow_engine::push::{self, PushStatus};
use txflow_engine::{
    AccountContext, Action, FlowConfig, FlowDriver, FlowHandle, FlowSnapshot, HttpBackend,
    ProposalResult, SigningState,
};
use txflow_protocol::FeeTargetCode;
use url::Url;

#[derive(Parser, Debug)]
#[command(name = "txflow_cli")]
struct Args {
    /// Account code as the backend knows it, e.g. `v0-55555555-btc-0`.
    #[arg(long)]
    account: String,

    #[arg(long, default_value = "btc")]
    coin: String,

    #[arg(long, default_value = "USD")]
    fiat: String,

    #[arg(long)]
    address: Option<String>,

    #[arg(long, conflicts_with_all = ["fiat_amount", "send_all"])]
    amount: Option<String>,

    #[arg(long, conflicts_with = "send_all")]
    fiat_amount: Option<String>,

    #[arg(long, default_value_t = false)]
    send_all: bool,

    /// custom, low, economy, normal or high. Defaults to the backend's choice.
    #[arg(long)]
    fee_target: Option<String>,

    /// Required with `--fee-target custom`.
    #[arg(long)]
    custom_fee: Option<String>,

    /// Spend only these outpoints (`txid:vout`). Repeatable.
    #[arg(long = "utxo", value_name = "OUTPOINT")]
    utxos: Vec<String>,

    /// A scanned payment URI, applied before the other fields.
    #[arg(long)]
    qr_uri: Option<String>,

    #[arg(long)]
    note: Option<String>,

    /// Submit once the proposal is valid and wait for the device.
    #[arg(long, default_value_t = false)]
    send: bool,

    #[arg(long)]
    backend_url: Option<Url>,

    #[arg(long)]
    push_url: Option<Url>,

    /// Run without the push channel (no device progress, no sync refresh).
    #[arg(long, default_value_t = false)]
    no_push: bool,

    #[arg(long, default_value_t = 30)]
    wait_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let mut cfg = FlowConfig::from_env();
    if let Some(url) = args.backend_url.clone() {
        cfg.backend_url = url;
    }
    if let Some(url) = args.push_url.clone() {
        cfg.push_url = url;
    }
    let fee_target = args
        .fee_target
        .as_deref()
        .map(|raw| FeeTargetCode::parse(raw).ok_or_else(|| anyhow!("unknown fee target: {raw}")))
        .transpose()?;
    let wait = Duration::from_secs(args.wait_secs);

    let backend = Arc::new(HttpBackend::new(cfg.backend_url.clone(), cfg.http_timeout)?);
    let (push_tx, push_rx) = mpsc::channel(64);
    let _push_control = if args.no_push {
        drop(push_tx);
        None
    } else {
        let (control_tx, control_rx) = mpsc::channel(4);
        let (status_tx, status_rx) = watch::channel(PushStatus::Connecting);
        tokio::spawn(push::run(cfg.push_url.clone(), control_rx, push_tx, status_tx));
        tokio::spawn(log_push_status(status_rx));
        Some(control_tx)
    };

    let ctx = AccountContext {
        code: args.account.clone(),
        coin_code: args.coin.clone(),
    };
    let (handle, _driver) =
        FlowDriver::spawn(backend, ctx, args.fiat.clone(), cfg.timing, push_rx);
    let mut snapshots = handle.subscribe();

    wait_for(&mut snapshots, wait, "fee targets", |s| s.fee_targets.is_some())
        .await
        .context("account did not load (is the backend running?)")?;

    for action in edits(&args, fee_target) {
        handle.apply(action).await.ok_or_else(|| anyhow!("flow driver stopped"))?;
    }

    let snap = wait_for(&mut snapshots, wait, "proposal", |s| {
        !s.is_updating_proposal && s.result.is_some()
    })
    .await?;
    print_snapshot(&snap);

    if args.send {
        submit(&handle, &mut snapshots).await?;
    }
    Ok(())
}

fn edits(args: &Args, fee_target: Option<FeeTargetCode>) -> Vec<Action> {
    let mut out = Vec::new();
    if let Some(uri) = &args.qr_uri {
        out.push(Action::QrScanned(uri.clone()));
    }
    if let Some(code) = fee_target {
        out.push(Action::SelectFeeTarget(code));
    }
    if let Some(fee) = &args.custom_fee {
        out.push(Action::EditCustomFee(fee.clone()));
    }
    if !args.utxos.is_empty() {
        out.push(Action::SetCoinControl(true));
        out.push(Action::SetUtxoSelection(args.utxos.iter().cloned().collect::<BTreeSet<_>>()));
    }
    if let Some(address) = &args.address {
        out.push(Action::EditAddress(address.clone()));
    }
    if args.send_all {
        out.push(Action::SetSendAll(true));
    }
    if let Some(amount) = &args.amount {
        out.push(Action::EditAmount(amount.clone()));
    }
    if let Some(fiat) = &args.fiat_amount {
        out.push(Action::EditFiatAmount(fiat.clone()));
    }
    if let Some(note) = &args.note {
        out.push(Action::EditNote(note.clone()));
    }
    out
}

async fn submit(
    handle: &FlowHandle,
    snapshots: &mut watch::Receiver<FlowSnapshot>,
) -> anyhow::Result<()> {
    if handle.snapshot().quote().is_none() {
        return Err(anyhow!("proposal is not valid, not sending"));
    }
    let snap = handle
        .apply(Action::Submit)
        .await
        .ok_or_else(|| anyhow!("flow driver stopped"))?;
    if !snap.signing.is_active() {
        let reason = snap.alert.as_ref().map_or("proposal not ready", |a| a.message_key());
        return Err(anyhow!("send refused: {reason}"));
    }
    eprintln!("confirm on the device...");

    // Signing can take as long as the user needs.
    let mut last = snap.signing;
    loop {
        if snapshots.changed().await.is_err() {
            return Err(anyhow!("flow driver stopped"));
        }
        let snap = snapshots.borrow_and_update().clone();
        if snap.signing != last {
            if let SigningState::SignProgress { step, steps } = snap.signing {
                eprintln!("  signing {step}/{steps}");
            }
            last = snap.signing;
        }
        match snap.signing {
            SigningState::Sent => {
                println!("sent");
                return Ok(());
            }
            SigningState::Aborted => return Err(anyhow!("aborted on the device")),
            SigningState::Idle => {
                let reason = snap.alert.as_ref().map_or("transport error", |a| a.message_key());
                return Err(anyhow!("send failed: {reason}"));
            }
            _ => {}
        }
    }
}

async fn wait_for(
    rx: &mut watch::Receiver<FlowSnapshot>,
    wait: Duration,
    what: &str,
    f: impl FnMut(&FlowSnapshot) -> bool,
) -> anyhow::Result<FlowSnapshot> {
    match tokio::time::timeout(wait, rx.wait_for(f)).await {
        Ok(Ok(snap)) => Ok(snap.clone()),
        Ok(Err(_)) => Err(anyhow!("flow driver stopped while waiting for {what}")),
        Err(_) => Err(anyhow!("timed out waiting for {what}")),
    }
}

async fn log_push_status(mut rx: watch::Receiver<PushStatus>) {
    while rx.changed().await.is_ok() {
        let status = *rx.borrow_and_update();
        tracing::debug!(?status, "push channel");
    }
}

fn print_snapshot(s: &FlowSnapshot) {
    if let Some(balance) = &s.balance {
        eprintln!("balance: {} {}", balance.available.amount, balance.available.unit);
    }
    let fields = [
        ("address", &s.errors.address),
        ("amount", &s.errors.amount),
        ("fee", &s.errors.fee),
    ];
    for (field, err) in fields {
        if let Some(err) = err {
            eprintln!("{field}: {}", err.key);
        }
    }
    if let Some(alert) = &s.alert {
        eprintln!("alert: {}", alert.message_key());
    }
    match &s.result {
        Some(ProposalResult::Valid(q)) => {
            println!("fee target: {}", q.fee_target);
            println!("amount:     {} {}", s.display_amount(), q.proposed_amount.unit);
            if !s.fiat_amount.is_empty() {
                println!("fiat:       {}", s.fiat_amount);
            }
            println!("fee:        {} {}", q.proposed_fee.amount, q.proposed_fee.unit);
            println!("total:      {} {}", q.proposed_total.amount, q.proposed_total.unit);
            if !s.input.selected_utxos.is_empty() {
                let inputs: Vec<_> = s.input.selected_utxos.iter().cloned().collect();
                println!("inputs:     {}", inputs.join(", "));
            }
        }
        Some(ProposalResult::Invalid { error_code }) => {
            println!("invalid: {}", error_code.as_ref().map_or("incomplete input", |c| c.as_str()));
        }
        None => println!("no proposal"),
    }
}
