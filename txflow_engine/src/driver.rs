use crate::backend::{first_receive_address, load_account_data, WalletBackend};
use crate::config::Timing;
use crate::debounce::TimerKind;
use crate::fiat::ConversionDirection;
use crate::flow::{
    AccountContext, Action, Effect, Event, FlowSnapshot, SendFlow, TransportFailure,
};
use crate::signing::SendResolution;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use txflow_protocol::{is_bitcoin_based, PushEvent};

#[derive(Debug)]
struct Command {
    action: Action,
    ack: Option<oneshot::Sender<FlowSnapshot>>,
}

/// What a view holds on to: an action sender and the latest snapshot.
#[derive(Debug, Clone)]
pub struct FlowHandle {
    actions: mpsc::Sender<Command>,
    snapshot: watch::Receiver<FlowSnapshot>,
}

impl FlowHandle {
    /// Returns `false` once the driver has stopped.
    pub async fn send(&self, action: Action) -> bool {
        self.actions
            .send(Command { action, ack: None })
            .await
            .is_ok()
    }

    /// Like [`FlowHandle::send`], but waits until the action is handled and returns the
    /// snapshot right after it.
    pub async fn apply(&self, action: Action) -> Option<FlowSnapshot> {
        let (ack, done) = oneshot::channel();
        self.actions
            .send(Command {
                action,
                ack: Some(ack),
            })
            .await
            .ok()?;
        done.await.ok()
    }

    pub fn snapshot(&self) -> FlowSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<FlowSnapshot> {
        self.snapshot.clone()
    }
}

#[derive(Debug, Default)]
struct Timers {
    proposal: Option<JoinHandle<()>>,
    result_display: Option<JoinHandle<()>>,
}

impl Timers {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<JoinHandle<()>> {
        match kind {
            TimerKind::Proposal => &mut self.proposal,
            TimerKind::ResultDisplay => &mut self.result_display,
        }
    }

    fn replace(&mut self, kind: TimerKind, handle: JoinHandle<()>) {
        if let Some(old) = self.slot(kind).replace(handle) {
            old.abort();
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(old) = self.slot(kind).take() {
            old.abort();
        }
    }

    fn abort_all(&mut self) {
        self.cancel(TimerKind::Proposal);
        self.cancel(TimerKind::ResultDisplay);
    }
}

/// Runs a [`SendFlow`] against a backend: executes its effects as tokio tasks and feeds the
/// completions back in as events.
pub struct FlowDriver<B> {
    flow: SendFlow,
    backend: Arc<B>,
    fiat_unit: String,
    completions_tx: mpsc::UnboundedSender<Event>,
    completions_rx: mpsc::UnboundedReceiver<Event>,
    timers: Timers,
    snapshot: watch::Sender<FlowSnapshot>,
}

impl<B: WalletBackend> FlowDriver<B> {
    fn new(
        backend: Arc<B>,
        ctx: AccountContext,
        fiat_unit: impl Into<String>,
        timing: Timing,
    ) -> (Self, watch::Receiver<FlowSnapshot>) {
        let flow = SendFlow::new(ctx, timing);
        let (snapshot, snapshot_rx) = watch::channel(flow.snapshot());
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let driver = Self {
            flow,
            backend,
            fiat_unit: fiat_unit.into(),
            completions_tx,
            completions_rx,
            timers: Timers::default(),
            snapshot,
        };
        (driver, snapshot_rx)
    }

    /// Spawns the driver loop on the current runtime.
    pub fn spawn(
        backend: Arc<B>,
        ctx: AccountContext,
        fiat_unit: impl Into<String>,
        timing: Timing,
        push: mpsc::Receiver<PushEvent>,
    ) -> (FlowHandle, JoinHandle<()>) {
        let (driver, snapshot) = Self::new(backend, ctx, fiat_unit, timing);
        let (actions_tx, actions_rx) = mpsc::channel(64);
        let task = tokio::spawn(driver.run(actions_rx, push));
        (
            FlowHandle {
                actions: actions_tx,
                snapshot,
            },
            task,
        )
    }

    /// Loads the account, then handles events until every action sender is dropped.
    async fn run(
        mut self,
        mut actions: mpsc::Receiver<Command>,
        mut push: mpsc::Receiver<PushEvent>,
    ) {
        self.load_initial();
        let mut push_open = true;

        loop {
            tokio::select! {
                command = actions.recv() => match command {
                    Some(Command { action, ack }) => {
                        self.apply(Event::Action(action));
                        if let Some(ack) = ack {
                            let _ = ack.send(self.flow.snapshot());
                        }
                    }
                    None => break,
                },
                Some(event) = self.completions_rx.recv() => self.apply(event),
                event = push.recv(), if push_open => match event {
                    Some(event) => self.apply(Event::Push(event)),
                    None => {
                        tracing::debug!("push channel gone, continuing without device events");
                        push_open = false;
                    }
                },
            }
        }

        self.timers.abort_all();
    }

    fn apply(&mut self, event: Event) {
        for effect in self.flow.handle(event) {
            self.execute(effect);
        }
        self.snapshot.send_replace(self.flow.snapshot());
    }

    fn execute(&mut self, effect: Effect) {
        let account = self.flow.context().code.clone();
        let tx = self.completions_tx.clone();
        match effect {
            Effect::StartTimer { id, delay } => {
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Event::TimerFired(id));
                });
                self.timers.replace(id.kind, handle);
            }
            Effect::CancelTimer(kind) => self.timers.cancel(kind),
            Effect::ProposeTx { token, args } => {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let reply = backend.propose_tx(&account, &args).await.map_err(|e| {
                        tracing::warn!(error = %e, token = token.value(), "tx proposal failed");
                        TransportFailure(e.to_string())
                    });
                    let _ = tx.send(Event::ProposalResolved { token, reply });
                });
            }
            Effect::Convert {
                token,
                direction,
                value,
            } => {
                let backend = self.backend.clone();
                let coin = self.flow.context().coin_code.clone();
                let fiat = self.fiat_unit.clone();
                tokio::spawn(async move {
                    let result = match direction {
                        ConversionDirection::ToFiat => {
                            backend.convert_to_fiat(&coin, &fiat, &value).await
                        }
                        ConversionDirection::FromFiat => {
                            backend.convert_from_fiat(&fiat, &coin, &value).await
                        }
                    };
                    let converted = result.unwrap_or_else(|e| {
                        tracing::warn!(error = %e, ?direction, "conversion failed");
                        None
                    });
                    let _ = tx.send(Event::ConversionResolved {
                        token,
                        direction,
                        converted,
                    });
                });
            }
            Effect::SendTx { session } => {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let resolution = match backend.send_tx(&account).await {
                        Ok(outcome) => SendResolution::Completed(outcome),
                        Err(e) => {
                            tracing::error!(error = %e, "sendtx failed");
                            SendResolution::TransportFailed(e.to_string())
                        }
                    };
                    let _ = tx.send(Event::SendResolved {
                        session,
                        resolution,
                    });
                });
            }
            Effect::ProposeNote(note) => {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    if let Err(e) = backend.propose_note(&account, &note).await {
                        tracing::warn!(error = %e, "storing tx note failed");
                    }
                });
            }
            Effect::FetchReceiveAddress => {
                let backend = self.backend.clone();
                tokio::spawn(async move {
                    let address = match backend.receive_addresses(&account).await {
                        Ok(lists) => first_receive_address(&lists),
                        Err(e) => {
                            tracing::warn!(error = %e, "loading receive addresses failed");
                            None
                        }
                    };
                    let _ = tx.send(Event::ReceiveAddressLoaded(address));
                });
            }
            Effect::RefreshBalance => {
                let backend = self.backend.clone();
                let with_utxos = is_bitcoin_based(&self.flow.context().coin_code);
                tokio::spawn(async move {
                    match backend.balance(&account).await {
                        Ok(balance) => {
                            let _ = tx.send(Event::BalanceLoaded(balance));
                        }
                        Err(e) => tracing::warn!(error = %e, "balance refresh failed"),
                    }
                    if with_utxos {
                        match backend.utxos(&account).await {
                            Ok(utxos) => {
                                let _ = tx.send(Event::UtxosLoaded(utxos));
                            }
                            Err(e) => tracing::warn!(error = %e, "utxo refresh failed"),
                        }
                    }
                });
            }
            Effect::ShowAlert {
                alert,
                rearm_on_dismiss,
            } => {
                tracing::info!(key = alert.message_key(), rearm_on_dismiss, "alert raised");
            }
        }
    }

    fn load_initial(&self) {
        let backend = self.backend.clone();
        let ctx = self.flow.context().clone();
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let loaded = load_account_data(backend.as_ref(), &ctx.code, &ctx.coin_code).await;
            match loaded.balance {
                Ok(balance) => {
                    let _ = tx.send(Event::BalanceLoaded(balance));
                }
                Err(e) => {
                    tracing::warn!(error = %e, account = %ctx.code, "loading balance failed")
                }
            }
            match loaded.utxos {
                Some(Ok(utxos)) => {
                    let _ = tx.send(Event::UtxosLoaded(utxos));
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, account = %ctx.code, "loading utxos failed")
                }
                None => {}
            }
            match loaded.fee_targets {
                Ok(list) => {
                    let _ = tx.send(Event::FeeTargetsLoaded(list));
                }
                Err(e) => {
                    tracing::warn!(error = %e, account = %ctx.code, "loading fee targets failed")
                }
            }
        });
    }
}
