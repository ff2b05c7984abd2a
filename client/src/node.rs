//! Ledger backed by the guestbook contract on a Freenet node.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use freenet_stdlib::client_api::{
    ClientRequest, ContractRequest, ContractResponse, HostResponse, WebApi,
};
use freenet_stdlib::prelude::*;
use guestbook_common::guestbook::GuestbookState;
use guestbook_common::message::Message;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::ledger::{Ledger, LedgerError, WriteArgs};

/// Embedded guestbook contract WASM (built with `cargo build -p guestbook-contract
/// --features contract --target wasm32-unknown-unknown --release`).
const GUESTBOOK_CONTRACT_WASM: &[u8] =
    include_bytes!("../../target/wasm32-unknown-unknown/release/guestbook_contract.wasm");

/// Build a ContractContainer from raw WASM bytes and parameters.
fn make_contract(wasm_bytes: &[u8], params: Parameters<'static>) -> ContractContainer {
    let code = ContractCode::from(wasm_bytes.to_vec());
    let wrapped = WrappedContract::new(Arc::new(code), params);
    ContractContainer::Wasm(ContractWasmAPIVersion::V1(wrapped))
}

/// Guestbook ledger on a Freenet node, reached over the node's WebSocket API.
///
/// One request is outstanding at a time; clones share the connection.
#[derive(Clone)]
pub struct NodeLedger {
    api: Rc<Mutex<WebApi>>,
    key: ContractKey,
    timeout: Duration,
}

impl NodeLedger {
    /// Connect to the node and make sure the guestbook contract exists there,
    /// putting it with an empty state if the node does not know it yet.
    pub async fn connect(config: &ClientConfig) -> Result<Self, LedgerError> {
        let (ws_conn, _) = tokio_tungstenite::connect_async(config.node_url.as_str())
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{}: {e}", config.node_url)))?;
        info!(url = %config.node_url, "connected to Freenet node");

        let contract = make_contract(GUESTBOOK_CONTRACT_WASM, Parameters::from(vec![]));
        let ledger = Self {
            api: Rc::new(Mutex::new(WebApi::start(ws_conn))),
            key: contract.key(),
            timeout: config.request_timeout,
        };
        info!("Guestbook contract key: {:?}", ledger.key);

        if ledger.fetch_state().await.is_err() {
            info!("guestbook contract not found; putting empty state");
            let state = serde_json::to_vec(&GuestbookState::default())
                .map_err(|e| LedgerError::Malformed(e.to_string()))?;
            ledger
                .request(
                    ClientRequest::ContractOp(ContractRequest::Put {
                        contract,
                        state: WrappedState::new(state),
                        related_contracts: RelatedContracts::default(),
                        subscribe: false,
                        blocking_subscribe: false,
                    }),
                    |resp| {
                        matches!(
                            resp,
                            HostResponse::ContractResponse(ContractResponse::PutResponse { .. })
                        )
                        .then_some(())
                    },
                )
                .await?;
        }
        Ok(ledger)
    }

    async fn fetch_state(&self) -> Result<GuestbookState, LedgerError> {
        let bytes = self
            .request(
                ClientRequest::ContractOp(ContractRequest::Get {
                    key: *self.key.id(),
                    return_contract_code: false,
                    subscribe: false,
                    blocking_subscribe: false,
                }),
                |resp| match resp {
                    HostResponse::ContractResponse(ContractResponse::GetResponse {
                        state, ..
                    }) => Some(state.as_ref().to_vec()),
                    _ => None,
                },
            )
            .await?;
        if bytes.is_empty() {
            return Ok(GuestbookState::default());
        }
        serde_json::from_slice(&bytes).map_err(|e| LedgerError::Malformed(e.to_string()))
    }

    /// Send a request and wait for the first response `extract` accepts.
    /// Other responses (e.g. notifications) are logged and discarded.
    async fn request<T>(
        &self,
        request: ClientRequest<'static>,
        extract: impl Fn(&HostResponse) -> Option<T>,
    ) -> Result<T, LedgerError> {
        let mut api = self.api.lock().await;
        api.send(request)
            .await
            .map_err(|e| LedgerError::Unavailable(format!("{e:?}")))?;

        let deadline = Instant::now() + self.timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LedgerError::Timeout);
            }
            match tokio::time::timeout(remaining, api.recv()).await {
                Ok(Ok(resp)) => match extract(&resp) {
                    Some(value) => return Ok(value),
                    None => debug!("Discarding non-matching response: {:?}", resp),
                },
                Ok(Err(e)) => return Err(LedgerError::Rejected(e.to_string())),
                Err(_) => return Err(LedgerError::Timeout),
            }
        }
    }
}

impl Ledger for NodeLedger {
    async fn add_message(&self, message: &Message, args: &WriteArgs) -> Result<(), LedgerError> {
        // Freenet has no gas; the attached amount travels inside the message.
        debug!(id = %message.id, gas = args.gas_budget, "sending guestbook update");
        let delta = GuestbookState {
            messages: vec![message.clone()],
        };
        let bytes =
            serde_json::to_vec(&delta).map_err(|e| LedgerError::Malformed(e.to_string()))?;
        self.request(
            ClientRequest::ContractOp(ContractRequest::Update {
                key: self.key,
                data: UpdateData::Delta(StateDelta::from(bytes)),
            }),
            |resp| {
                matches!(
                    resp,
                    HostResponse::ContractResponse(ContractResponse::UpdateResponse { .. })
                )
                .then_some(())
            },
        )
        .await
    }

    async fn get_messages(&self) -> Result<Vec<Message>, LedgerError> {
        Ok(self.fetch_state().await?.messages)
    }

    fn backend_name(&self) -> &str {
        "freenet"
    }
}
