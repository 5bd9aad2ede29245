//! HTTP JSON transport for the peer RPC: the axum server side and a
//! blocking reqwest client fulfilling the peer-exchange contract.
//!
//! Requests are `{type: ...}`-tagged objects POSTed to `/rpc`; responses are
//! `{ok:true,data:...}` or `{ok:false,error:"..."}`. Nothing a peer returns
//! is trusted: chains are replayed and transactions re-validated by the
//! ledger before they take effect.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use kaidos_core::{Block, Ledger, OutPoint, PeerExchange, Transaction, TxOutput};
use shared::{Address, Amount, ChainError, Hash256, Result};

/// Per-call timeout for outbound peer requests.
const PEER_TIMEOUT: Duration = Duration::from_secs(5);

/// Request envelope of the peer RPC.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcRequest {
    GetBlocks,
    GetUtxos { address: Address },
    SubmitTx { tx: Transaction },
    SubmitBlock { block: Block },
    GetPeers,
}

/// Response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    fn success(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(err: &ChainError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(err.to_string()),
        }
    }
}

/// One unspent output as it appears in `get_utxos` responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub txid: Hash256,
    pub vout: u32,
    pub address: Address,
    pub amount: Amount,
}

impl From<(OutPoint, TxOutput)> for UtxoRecord {
    fn from((outpoint, output): (OutPoint, TxOutput)) -> Self {
        Self {
            txid: outpoint.txid,
            vout: outpoint.vout,
            address: output.address,
            amount: output.amount,
        }
    }
}

impl From<UtxoRecord> for (OutPoint, TxOutput) {
    fn from(record: UtxoRecord) -> Self {
        (
            OutPoint::new(record.txid, record.vout),
            TxOutput::new(record.address, record.amount),
        )
    }
}

/// The RPC routes over a shared ledger.
pub fn router(ledger: Arc<Ledger>) -> Router {
    Router::new()
        .route("/rpc", post(handle))
        .with_state(ledger)
}

async fn handle(
    State(ledger): State<Arc<Ledger>>,
    Json(request): Json<RpcRequest>,
) -> Json<RpcResponse> {
    Json(match dispatch(&ledger, request) {
        Ok(data) => RpcResponse::success(data),
        Err(err) => RpcResponse::failure(&err),
    })
}

fn dispatch(ledger: &Ledger, request: RpcRequest) -> Result<serde_json::Value> {
    match request {
        RpcRequest::GetBlocks => to_value(ledger.chain_blocks()),
        RpcRequest::GetUtxos { address } => {
            let records: Vec<UtxoRecord> = ledger
                .utxos_for(&address)
                .into_iter()
                .map(UtxoRecord::from)
                .collect();
            to_value(records)
        }
        RpcRequest::SubmitTx { tx } => {
            let txid = tx.txid;
            ledger.submit_transaction(tx)?;
            Ok(json!({ "txid": txid }))
        }
        RpcRequest::SubmitBlock { block } => {
            let hash = block.hash;
            ledger.submit_block(block)?;
            Ok(json!({ "hash": hash }))
        }
        RpcRequest::GetPeers => to_value(ledger.peers()),
    }
}

fn to_value<T: Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| ChainError::Serialization(e.to_string()))
}

/// Serves the RPC until the process exits.
///
/// # Errors
///
/// Returns `Io` if the listener cannot bind or the server fails.
pub async fn serve(ledger: Arc<Ledger>, host: &str, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind((host, port))
        .await
        .map_err(|e| ChainError::Io(e.to_string()))?;
    info!(host, port, "rpc server listening");
    axum::serve(listener, router(ledger))
        .await
        .map_err(|e| ChainError::Io(e.to_string()))
}

/// Blocking HTTP client for talking to peers, with a 5 second per-call
/// timeout. Do not use from an async context; the node wraps consensus
/// rounds in `spawn_blocking`.
pub struct HttpPeers {
    client: reqwest::blocking::Client,
}

impl HttpPeers {
    /// Builds the client.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the underlying client cannot be constructed.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(PEER_TIMEOUT)
            .build()
            .map_err(|e| ChainError::Io(e.to_string()))?;
        Ok(Self { client })
    }

    fn call(&self, peer: &str, request: &RpcRequest) -> Result<serde_json::Value> {
        let url = format!("http://{peer}/rpc");
        let response = self.client.post(url).json(request).send().map_err(|e| {
            if e.is_timeout() {
                ChainError::Timeout
            } else {
                ChainError::PeerUnavailable(e.to_string())
            }
        })?;
        let envelope: RpcResponse = response
            .json()
            .map_err(|e| ChainError::PeerMalformed(e.to_string()))?;
        if envelope.ok {
            envelope
                .data
                .ok_or_else(|| ChainError::PeerMalformed("ok response without data".to_string()))
        } else {
            Err(ChainError::PeerMalformed(
                envelope
                    .error
                    .unwrap_or_else(|| "unspecified error".to_string()),
            ))
        }
    }

    fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| ChainError::PeerMalformed(e.to_string()))
    }
}

impl PeerExchange for HttpPeers {
    fn get_blocks(&self, peer: &str) -> Result<Vec<Block>> {
        Self::decode(self.call(peer, &RpcRequest::GetBlocks)?)
    }

    fn get_utxos(&self, peer: &str, address: &Address) -> Result<Vec<(OutPoint, TxOutput)>> {
        let records: Vec<UtxoRecord> = Self::decode(self.call(
            peer,
            &RpcRequest::GetUtxos {
                address: address.clone(),
            },
        )?)?;
        Ok(records.into_iter().map(Into::into).collect())
    }

    fn broadcast_tx(&self, peer: &str, tx: &Transaction) -> Result<()> {
        self.call(peer, &RpcRequest::SubmitTx { tx: tx.clone() })
            .map(|_| ())
    }

    fn broadcast_block(&self, peer: &str, block: &Block) -> Result<()> {
        self.call(peer, &RpcRequest::SubmitBlock { block: block.clone() })
            .map(|_| ())
    }

    fn exchange_peers(&self, peer: &str) -> Result<Vec<String>> {
        Self::decode(self.call(peer, &RpcRequest::GetPeers)?)
    }
}
