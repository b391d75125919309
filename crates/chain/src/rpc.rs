//! JSON-RPC client for the ledger endpoint.
//!
//! Speaks JSON-RPC 2.0 over HTTP with `reqwest`. Bulk account reads go out as
//! JSON-RPC batches so several address lists share one HTTP round trip.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use solana_sdk::hash::Hash;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_sdk::transaction::Transaction;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::error::{ChainError, ChainResult};

/// Maximum addresses per `getMultipleAccounts` call accepted by the RPC backend.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;

/// JSON-RPC "method not found".
const METHOD_NOT_FOUND: i64 = -32601;

/// Raw account data, `None` when the account does not exist.
pub type AccountBlob = Option<Vec<u8>>;

/// Read commitment level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Confirmed => "confirmed",
            Self::Finalized => "finalized",
        }
    }
}

/// Server-side filter for program account enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountFilter {
    /// Bytes at `offset` must equal `bytes`
    Memcmp { offset: usize, bytes: Vec<u8> },
}

impl AccountFilter {
    fn to_json(&self) -> Value {
        match self {
            Self::Memcmp { offset, bytes } => json!({
                "memcmp": {
                    "offset": offset,
                    "bytes": BASE64.encode(bytes),
                    "encoding": "base64",
                }
            }),
        }
    }
}

/// One window of a paged program account enumeration.
#[derive(Debug, Clone, Default)]
pub struct ProgramAccountsPage {
    /// Accounts in this window
    pub accounts: Vec<(Pubkey, Vec<u8>)>,
    /// Cursor for the next window, `None` on the last page
    pub next: Option<String>,
}

/// Ledger reads and writes used by the monitor.
#[async_trait]
pub trait AccountsRpc: Send + Sync {
    /// Fetch several address lists in one round trip.
    ///
    /// The outer result is aligned with `lists`, each inner list with its request.
    async fn get_multiple_accounts_batch(
        &self,
        lists: &[&[Pubkey]],
        commitment: Commitment,
    ) -> ChainResult<Vec<Vec<AccountBlob>>>;

    /// Fetch a single account.
    async fn get_account(&self, key: &Pubkey, commitment: Commitment) -> ChainResult<AccountBlob>;

    /// Lamport balance of an account.
    async fn get_balance(&self, key: &Pubkey) -> ChainResult<u64>;

    /// Fetch one window of accounts owned by `program`.
    ///
    /// Endpoints without paged enumeration return every matching account in one
    /// window with no cursor.
    async fn get_program_accounts_page(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
        cursor: Option<&str>,
        limit: usize,
        commitment: Commitment,
    ) -> ChainResult<ProgramAccountsPage>;

    async fn get_latest_blockhash(&self) -> ChainResult<Hash>;

    /// Submit a signed transaction, returning its signature.
    async fn send_transaction(&self, tx: &Transaction) -> ChainResult<Signature>;
}

#[derive(Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcResponse<T> {
    id: Option<u64>,
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Deserialize)]
struct UiAccount {
    /// `[payload, encoding]`
    data: (String, String),
}

impl UiAccount {
    fn decode(self) -> ChainResult<Vec<u8>> {
        let (payload, encoding) = self.data;
        if encoding != "base64" {
            return Err(ChainError::MalformedResponse(format!(
                "unexpected account encoding {encoding}"
            )));
        }
        BASE64
            .decode(payload)
            .map_err(|e| ChainError::MalformedResponse(format!("bad base64 payload: {e}")))
    }
}

#[derive(Deserialize)]
struct KeyedUiAccount {
    pubkey: String,
    account: UiAccount,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgramAccountsV2 {
    accounts: Vec<KeyedUiAccount>,
    pagination_key: Option<String>,
}

#[derive(Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

fn decode_keyed(accounts: Vec<KeyedUiAccount>) -> ChainResult<Vec<(Pubkey, Vec<u8>)>> {
    accounts
        .into_iter()
        .map(|keyed| Ok((parse_pubkey(&keyed.pubkey)?, keyed.account.decode()?)))
        .collect()
}

fn parse_pubkey(s: &str) -> ChainResult<Pubkey> {
    Pubkey::from_str(s).map_err(|e| ChainError::MalformedResponse(format!("bad pubkey {s}: {e}")))
}

fn unwrap_response<T>(response: RpcResponse<T>) -> ChainResult<T> {
    if let Some(err) = response.error {
        return Err(ChainError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    response
        .result
        .ok_or_else(|| ChainError::MalformedResponse("missing result".into()))
}

fn decode_account_list(
    accounts: Vec<Option<UiAccount>>,
    expected: usize,
) -> ChainResult<Vec<AccountBlob>> {
    if accounts.len() != expected {
        return Err(ChainError::LengthMismatch {
            expected,
            got: accounts.len(),
        });
    }
    accounts
        .into_iter()
        .map(|account| account.map(UiAccount::decode).transpose())
        .collect()
}

/// HTTP JSON-RPC client.
#[derive(Debug)]
pub struct SolanaRpc {
    client: reqwest::Client,
    url: String,
    next_id: AtomicU64,
    /// Cleared once the endpoint rejects `getProgramAccountsV2`
    paging: AtomicBool,
}

impl SolanaRpc {
    /// Create a client for `url` with a per-request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> ChainResult<Self> {
        let url = url.into();
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        info!(url = %url, timeout_ms = timeout.as_millis() as u64, "RPC client created");

        Ok(Self {
            client,
            url,
            next_id: AtomicU64::new(1),
            paging: AtomicBool::new(true),
        })
    }

    fn request<'a>(&self, method: &'a str, params: Value) -> RpcRequest<'a> {
        RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        let request = self.request(method, params);
        let response: RpcResponse<T> = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        unwrap_response(response)
    }

    /// Send a JSON-RPC batch and return results in request order.
    async fn batch<T: DeserializeOwned>(
        &self,
        requests: Vec<RpcRequest<'_>>,
    ) -> ChainResult<Vec<T>> {
        let ids: Vec<u64> = requests.iter().map(|r| r.id).collect();
        let mut responses: Vec<RpcResponse<T>> = self
            .client
            .post(&self.url)
            .json(&requests)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if responses.len() != ids.len() {
            return Err(ChainError::MalformedResponse(format!(
                "batch returned {} responses for {} requests",
                responses.len(),
                ids.len()
            )));
        }

        // Batch responses may arrive in any order.
        let mut ordered = Vec::with_capacity(ids.len());
        for id in ids {
            let position = responses
                .iter()
                .position(|r| r.id == Some(id))
                .ok_or_else(|| ChainError::MalformedResponse(format!("no response for id {id}")))?;
            ordered.push(unwrap_response(responses.swap_remove(position))?);
        }
        Ok(ordered)
    }

    async fn program_accounts_v2(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
        cursor: Option<&str>,
        limit: usize,
        commitment: Commitment,
    ) -> ChainResult<ProgramAccountsPage> {
        let mut config = json!({
            "commitment": commitment.as_str(),
            "encoding": "base64",
            "limit": limit,
            "filters": filters.iter().map(AccountFilter::to_json).collect::<Vec<_>>(),
        });
        if let Some(cursor) = cursor {
            config["paginationKey"] = json!(cursor);
        }

        let result: ProgramAccountsV2 = self
            .call("getProgramAccountsV2", json!([program.to_string(), config]))
            .await?;
        Ok(ProgramAccountsPage {
            accounts: decode_keyed(result.accounts)?,
            next: result.pagination_key,
        })
    }

    async fn program_accounts_all(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
        commitment: Commitment,
    ) -> ChainResult<ProgramAccountsPage> {
        let config = json!({
            "commitment": commitment.as_str(),
            "encoding": "base64",
            "filters": filters.iter().map(AccountFilter::to_json).collect::<Vec<_>>(),
        });
        let result: Vec<KeyedUiAccount> = self
            .call("getProgramAccounts", json!([program.to_string(), config]))
            .await?;
        Ok(ProgramAccountsPage {
            accounts: decode_keyed(result)?,
            next: None,
        })
    }
}

#[async_trait]
impl AccountsRpc for SolanaRpc {
    #[instrument(skip_all, fields(lists = lists.len()))]
    async fn get_multiple_accounts_batch(
        &self,
        lists: &[&[Pubkey]],
        commitment: Commitment,
    ) -> ChainResult<Vec<Vec<AccountBlob>>> {
        let requests = lists
            .iter()
            .map(|keys| {
                let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
                self.request(
                    "getMultipleAccounts",
                    json!([keys, { "commitment": commitment.as_str(), "encoding": "base64" }]),
                )
            })
            .collect();

        let results: Vec<WithContext<Vec<Option<UiAccount>>>> = self.batch(requests).await?;

        let decoded = results
            .into_iter()
            .zip(lists)
            .map(|(result, keys)| decode_account_list(result.value, keys.len()))
            .collect::<ChainResult<Vec<_>>>()?;

        debug!(
            accounts = lists.iter().map(|l| l.len()).sum::<usize>(),
            "Fetched multiple accounts"
        );
        Ok(decoded)
    }

    async fn get_account(&self, key: &Pubkey, commitment: Commitment) -> ChainResult<AccountBlob> {
        let result: WithContext<Option<UiAccount>> = self
            .call(
                "getAccountInfo",
                json!([
                    key.to_string(),
                    { "commitment": commitment.as_str(), "encoding": "base64" }
                ]),
            )
            .await?;
        result.value.map(UiAccount::decode).transpose()
    }

    async fn get_balance(&self, key: &Pubkey) -> ChainResult<u64> {
        let result: WithContext<u64> = self.call("getBalance", json!([key.to_string()])).await?;
        Ok(result.value)
    }

    #[instrument(skip(self, filters), fields(program = %program))]
    async fn get_program_accounts_page(
        &self,
        program: &Pubkey,
        filters: &[AccountFilter],
        cursor: Option<&str>,
        limit: usize,
        commitment: Commitment,
    ) -> ChainResult<ProgramAccountsPage> {
        if self.paging.load(Ordering::Relaxed) {
            match self
                .program_accounts_v2(program, filters, cursor, limit, commitment)
                .await
            {
                Err(ChainError::Rpc {
                    code: METHOD_NOT_FOUND,
                    ..
                }) => {
                    self.paging.store(false, Ordering::Relaxed);
                    warn!("Paged enumeration unavailable, reading all program accounts at once");
                }
                result => {
                    if let Ok(page) = &result {
                        debug!(
                            count = page.accounts.len(),
                            has_next = page.next.is_some(),
                            "Fetched program account page"
                        );
                    }
                    return result;
                }
            }
        }

        let page = self.program_accounts_all(program, filters, commitment).await?;
        debug!(count = page.accounts.len(), "Fetched all program accounts");
        Ok(page)
    }

    async fn get_latest_blockhash(&self) -> ChainResult<Hash> {
        let result: WithContext<BlockhashValue> = self
            .call("getLatestBlockhash", json!([{ "commitment": "confirmed" }]))
            .await?;
        Hash::from_str(&result.value.blockhash)
            .map_err(|e| ChainError::MalformedResponse(format!("bad blockhash: {e}")))
    }

    async fn send_transaction(&self, tx: &Transaction) -> ChainResult<Signature> {
        let wire = bincode::serialize(tx).map_err(|e| ChainError::Transaction(e.to_string()))?;
        let signature: String = self
            .call(
                "sendTransaction",
                json!([
                    BASE64.encode(wire),
                    { "encoding": "base64", "preflightCommitment": "confirmed" }
                ]),
            )
            .await?;
        Signature::from_str(&signature)
            .map_err(|e| ChainError::MalformedResponse(format!("bad signature: {e}")))
    }
}
