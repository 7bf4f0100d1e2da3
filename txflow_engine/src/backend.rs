use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use txflow_protocol::{
    is_bitcoin_based, Balance, ConvertFromFiatResponse, ConvertToFiatResponse, FeeTargetList,
    ProposalReply, ReceiveAddress, SendOutcome, SendTxResponse, TxProposalArgs, TxProposalResponse,
    Utxo,
};
use url::Url;

use crate::config::ensure_trailing_slash;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend request failed: status={status} body={body}")]
    BadStatus { status: StatusCode, body: String },
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    #[error("backend response parse failed: {0}")]
    Parse(String),
}

/// The wallet backend endpoints the send flow consumes.
///
/// Conversions return `Ok(None)` when the backend answered `success: false`.
pub trait WalletBackend: Send + Sync + 'static {
    fn propose_tx(
        &self,
        account: &str,
        args: &TxProposalArgs,
    ) -> impl Future<Output = Result<ProposalReply, BackendError>> + Send;

    fn convert_to_fiat(
        &self,
        coin: &str,
        fiat: &str,
        amount: &str,
    ) -> impl Future<Output = Result<Option<String>, BackendError>> + Send;

    fn convert_from_fiat(
        &self,
        fiat: &str,
        coin: &str,
        amount: &str,
    ) -> impl Future<Output = Result<Option<String>, BackendError>> + Send;

    fn send_tx(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<SendOutcome, BackendError>> + Send;

    fn propose_note(
        &self,
        account: &str,
        note: &str,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    fn balance(&self, account: &str) -> impl Future<Output = Result<Balance, BackendError>> + Send;

    fn utxos(&self, account: &str) -> impl Future<Output = Result<Vec<Utxo>, BackendError>> + Send;

    fn fee_targets(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<FeeTargetList, BackendError>> + Send;

    fn receive_addresses(
        &self,
        account: &str,
    ) -> impl Future<Output = Result<Vec<Vec<ReceiveAddress>>, BackendError>> + Send;
}

/// JSON-over-HTTP client for the wallet backend API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
}

impl HttpBackend {
    pub fn new(base: Url, timeout: Duration) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: ensure_trailing_slash(base),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, BackendError> {
        let url = self.base.join(path)?;
        let resp = self.client.get(url).query(query).send().await?;
        read_json(resp).await
    }

    async fn post<B, T>(&self, path: &str, body: Option<&B>) -> Result<T, BackendError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.base.join(path)?;
        let mut req = self.client.post(url);
        if let Some(body) = body {
            req = req.json(body);
        }
        read_json(req.send().await?).await
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, BackendError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(BackendError::BadStatus { status, body });
    }
    Ok(resp.json::<T>().await?)
}

impl WalletBackend for HttpBackend {
    async fn propose_tx(
        &self,
        account: &str,
        args: &TxProposalArgs,
    ) -> Result<ProposalReply, BackendError> {
        let resp: TxProposalResponse = self
            .post(&format!("account/{account}/tx-proposal"), Some(args))
            .await?;
        resp.into_reply().map_err(BackendError::Parse)
    }

    async fn convert_to_fiat(
        &self,
        coin: &str,
        fiat: &str,
        amount: &str,
    ) -> Result<Option<String>, BackendError> {
        let resp: ConvertToFiatResponse = self
            .get("coins/convert-to-fiat", &[("from", coin), ("to", fiat), ("amount", amount)])
            .await?;
        Ok(resp.fiat_amount.filter(|_| resp.success))
    }

    async fn convert_from_fiat(
        &self,
        fiat: &str,
        coin: &str,
        amount: &str,
    ) -> Result<Option<String>, BackendError> {
        let resp: ConvertFromFiatResponse = self
            .get("coins/convert-from-fiat", &[("from", fiat), ("to", coin), ("amount", amount)])
            .await?;
        Ok(resp.amount.filter(|_| resp.success))
    }

    async fn send_tx(&self, account: &str) -> Result<SendOutcome, BackendError> {
        let resp: SendTxResponse = self
            .post::<(), _>(&format!("account/{account}/sendtx"), None)
            .await?;
        Ok(resp.into())
    }

    async fn propose_note(&self, account: &str, note: &str) -> Result<(), BackendError> {
        let _: serde_json::Value = self
            .post(&format!("account/{account}/propose-tx-note"), Some(note))
            .await?;
        Ok(())
    }

    async fn balance(&self, account: &str) -> Result<Balance, BackendError> {
        self.get(&format!("account/{account}/balance"), &[]).await
    }

    async fn utxos(&self, account: &str) -> Result<Vec<Utxo>, BackendError> {
        self.get(&format!("account/{account}/utxos"), &[]).await
    }

    async fn fee_targets(&self, account: &str) -> Result<FeeTargetList, BackendError> {
        self.get(&format!("account/{account}/fee-targets"), &[]).await
    }

    async fn receive_addresses(
        &self,
        account: &str,
    ) -> Result<Vec<Vec<ReceiveAddress>>, BackendError> {
        self.get(&format!("account/{account}/receive-addresses"), &[]).await
    }
}

/// Initial reads for an account, fetched concurrently. Each field fails independently.
#[derive(Debug)]
pub struct LoadedAccountData {
    pub balance: Result<Balance, BackendError>,
    /// `None` for coins without coin control.
    pub utxos: Option<Result<Vec<Utxo>, BackendError>>,
    pub fee_targets: Result<FeeTargetList, BackendError>,
}

pub async fn load_account_data<B: WalletBackend>(
    backend: &B,
    account: &str,
    coin_code: &str,
) -> LoadedAccountData {
    let utxos = async {
        if is_bitcoin_based(coin_code) {
            Some(backend.utxos(account).await)
        } else {
            None
        }
    };
    let (balance, utxos, fee_targets) =
        tokio::join!(backend.balance(account), utxos, backend.fee_targets(account));
    LoadedAccountData {
        balance,
        utxos,
        fee_targets,
    }
}

/// The address offered by "send to self": the first unused receive address.
pub fn first_receive_address(lists: &[Vec<ReceiveAddress>]) -> Option<String> {
    lists.first()?.first().map(|a| a.address.clone())
}
