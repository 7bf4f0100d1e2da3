//! Client-side negotiation of transaction proposals with a wallet backend.
//!
//! [`flow::SendFlow`] is the pure state machine; [`driver::FlowDriver`] runs it on tokio
//! against a [`backend::WalletBackend`].

pub mod backend;
pub mod camera;
pub mod coin_control;
pub mod config;
pub mod debounce;
pub mod driver;
pub mod error_map;
pub mod fiat;
pub mod flow;
pub mod push;
pub mod qr;
pub mod signing;
pub mod tracker;

pub use backend::{load_account_data, BackendError, HttpBackend, LoadedAccountData, WalletBackend};
pub use config::{FlowConfig, Timing};
pub use driver::{FlowDriver, FlowHandle};
pub use error_map::Alert;
pub use flow::{
    AccountContext, Action, Effect, Event, FeeQuote, FlowSnapshot, ProposalInput, ProposalResult,
    SendFlow,
};
pub use signing::SigningState;
