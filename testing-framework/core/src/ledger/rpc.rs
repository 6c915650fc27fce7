use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use testing_framework_config::{
    Amount, ChainId, Dialect, testcase::ValidatorDescription, timeouts::receipt_poll_interval,
};
use thiserror::Error;
use tracing::{debug, warn};

use super::{
    Delegation, LedgerClient, TxReceipt, TxRequest, TxSubmitter, Undelegation, ValidatorInfo,
    ValidatorStatus,
};
use crate::{
    convergence::{RetryPolicy, await_condition},
    scenario::DynError,
};

/// Shard holding validator and delegation state.
const BEACON_SHARD: u32 = 0;

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("no rpc endpoint configured for shard {shard}")]
    UnknownShard { shard: u32 },
    #[error("invalid rpc endpoint `{url}`: {message}")]
    InvalidEndpoint { url: String, message: String },
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("{method} failed with code {code}: {message}")]
    Remote {
        method: &'static str,
        code: i64,
        message: String,
    },
    #[error("{method} returned neither a result nor an error")]
    EmptyResult { method: &'static str },
    #[error("{method} returned malformed `{field}`: {value}")]
    Malformed {
        method: &'static str,
        field: &'static str,
        value: String,
    },
}

impl RpcError {
    fn is_not_found(&self) -> bool {
        match self {
            Self::Remote { message, .. } => {
                let message = message.to_ascii_lowercase();
                message.contains("not found") || message.contains("not exist")
            }
            _ => false,
        }
    }
}

#[derive(Serialize)]
struct RpcRequest<'a, P: ?Sized> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: &'a P,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcFault>,
}

#[derive(Deserialize)]
struct RpcFault {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// JSON-RPC 2.0 client with one endpoint per shard.
pub struct RpcClient {
    endpoints: BTreeMap<u32, Url>,
    client: Client,
    next_id: AtomicU64,
}

impl RpcClient {
    /// Builds a client for the configured shard endpoints.
    pub fn from_endpoints(
        endpoints: &BTreeMap<u32, String>,
        timeout: Duration,
    ) -> Result<Self, RpcError> {
        let endpoints = endpoints
            .iter()
            .map(|(shard, raw)| {
                Url::parse(raw)
                    .map(|url| (*shard, url))
                    .map_err(|err| RpcError::InvalidEndpoint {
                        url: raw.clone(),
                        message: err.to_string(),
                    })
            })
            .collect::<Result<_, _>>()?;
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            endpoints,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    /// Endpoint serving `shard`.
    pub fn endpoint(&self, shard: u32) -> Result<&Url, RpcError> {
        self.endpoints
            .get(&shard)
            .ok_or(RpcError::UnknownShard { shard })
    }

    /// Issues one call against the shard's endpoint and returns the raw
    /// `result` value.
    pub async fn call<P>(&self, shard: u32, method: &'static str, params: &P) -> Result<Value, RpcError>
    where
        P: Serialize + Sync + ?Sized,
    {
        let url = self.endpoint(shard)?.clone();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(shard, method, id, "rpc call");

        let response: RpcResponse = self
            .client
            .post(url)
            .json(&RpcRequest {
                jsonrpc: "2.0",
                id,
                method,
                params,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(fault) = response.error {
            return Err(RpcError::Remote {
                method,
                code: fault.code,
                message: fault.message,
            });
        }
        response.result.ok_or(RpcError::EmptyResult { method })
    }
}

#[async_trait]
impl LedgerClient for RpcClient {
    async fn balance(&self, address: &str, shard: u32) -> Result<Option<Amount>, DynError> {
        const METHOD: &str = "hmy_getBalance";
        let result = self.call(shard, METHOD, &json!([address, "latest"])).await?;
        if result.is_null() {
            return Ok(None);
        }
        Ok(Some(base_units(METHOD, "balance", &result)?))
    }

    async fn validator(&self, address: &str) -> Result<Option<ValidatorInfo>, DynError> {
        const METHOD: &str = "hmyv2_getValidatorInformation";
        match self.call(BEACON_SHARD, METHOD, &json!([address])).await {
            Ok(result) if result.is_null() => Ok(None),
            Ok(result) => Ok(Some(parse_validator(METHOD, &result)?)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delegations_by_delegator(&self, address: &str) -> Result<Vec<Delegation>, DynError> {
        const METHOD: &str = "hmyv2_getDelegationsByDelegator";
        let result = self.call(BEACON_SHARD, METHOD, &json!([address])).await?;
        let Some(entries) = result.as_array() else {
            return Ok(Vec::new());
        };
        entries
            .iter()
            .map(|entry| parse_delegation(METHOD, entry).map_err(Into::into))
            .collect()
    }

    async fn current_epoch(&self, shard: u32) -> Result<u64, DynError> {
        const METHOD: &str = "hmyv2_getEpoch";
        let result = self.call(shard, METHOD, &json!([])).await?;
        Ok(integer(METHOD, "epoch", &result)?)
    }
}

/// A transaction serialized and signed for broadcast.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedTx {
    /// Hex-encoded raw transaction, `0x` prefixed.
    pub raw: String,
    pub hash: Option<String>,
}

/// Produces signed raw transactions. Key material stays behind this trait.
#[async_trait]
pub trait TxSigner: Send + Sync {
    async fn sign(
        &self,
        dialect: Dialect,
        chain: ChainId,
        request: &TxRequest,
        nonce: u64,
    ) -> Result<SignedTx, DynError>;
}

/// Submits signed transactions over JSON-RPC and waits for their receipts.
pub struct RpcSubmitter<S> {
    client: Arc<RpcClient>,
    signer: S,
    receipt_poll: Duration,
}

impl<S: TxSigner> RpcSubmitter<S> {
    #[must_use]
    pub fn new(client: Arc<RpcClient>, signer: S) -> Self {
        Self {
            client,
            signer,
            receipt_poll: receipt_poll_interval(),
        }
    }

    #[must_use]
    pub const fn with_receipt_poll(mut self, interval: Duration) -> Self {
        self.receipt_poll = interval;
        self
    }

    async fn nonce(&self, dialect: Dialect, address: &str, shard: u32) -> Result<u64, RpcError> {
        let method = match dialect {
            Dialect::Native => "hmyv2_getTransactionCount",
            Dialect::Eth => "eth_getTransactionCount",
        };
        let result = self
            .client
            .call(shard, method, &json!([address, "latest"]))
            .await?;
        integer(method, "nonce", &result)
    }

    async fn submit(
        &self,
        dialect: Dialect,
        chain: ChainId,
        request: &TxRequest,
    ) -> Result<TxReceipt, DynError> {
        let shard = request.from_shard;
        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.nonce(dialect, &request.sender, shard).await?,
        };
        let signed = self.signer.sign(dialect, chain, request, nonce).await?;

        let staking = request.payload.is_staking();
        let (send, receipt) = match (dialect, staking) {
            (Dialect::Native, true) => (
                "hmy_sendRawStakingTransaction",
                "hmyv2_getStakingTransactionReceipt",
            ),
            (Dialect::Native, false) => ("hmy_sendRawTransaction", "hmyv2_getTransactionReceipt"),
            (Dialect::Eth, _) => ("eth_sendRawTransaction", "eth_getTransactionReceipt"),
        };

        let hash = match self.client.call(shard, send, &json!([signed.raw])).await {
            Ok(result) => result.as_str().map(str::to_owned).or(signed.hash),
            Err(err @ RpcError::Remote { .. }) => {
                warn!(chain = %chain, nonce, %err, "transaction rejected by node");
                return Ok(TxReceipt {
                    hash: signed.hash,
                    success: false,
                    error: Some(err.to_string()),
                });
            }
            Err(err) => return Err(err.into()),
        };
        let Some(hash) = hash else {
            return Err(RpcError::EmptyResult { method: send }.into());
        };

        let policy = RetryPolicy::covering(request.timeout, self.receipt_poll);
        let status = await_condition(
            format!("receipt for {hash}"),
            policy,
            || async {
                let result = self.client.call(shard, receipt, &json!([hash])).await?;
                let status = if result.is_null() {
                    None
                } else {
                    Some(receipt_status(receipt, &result)?)
                };
                Ok::<_, DynError>(status)
            },
            Option::is_some,
        )
        .await;

        Ok(match status {
            Ok(Some(true)) => TxReceipt {
                hash: Some(hash),
                success: true,
                error: None,
            },
            Ok(_) => TxReceipt {
                hash: Some(hash),
                success: false,
                error: Some("transaction failed on chain".to_owned()),
            },
            Err(unmet) => TxReceipt {
                hash: Some(hash),
                success: false,
                error: Some(format!(
                    "no receipt within {:?}: {unmet}",
                    request.timeout
                )),
            },
        })
    }
}

#[async_trait]
impl<S: TxSigner> TxSubmitter for RpcSubmitter<S> {
    async fn submit_native(
        &self,
        chain: ChainId,
        request: &TxRequest,
    ) -> Result<TxReceipt, DynError> {
        self.submit(Dialect::Native, chain, request).await
    }

    async fn submit_eth(&self, chain: ChainId, request: &TxRequest) -> Result<TxReceipt, DynError> {
        self.submit(Dialect::Eth, chain, request).await
    }
}

fn malformed(method: &'static str, field: &'static str, value: &Value) -> RpcError {
    RpcError::Malformed {
        method,
        field,
        value: value.to_string(),
    }
}

/// Reads an integer encoded as a JSON number, decimal string or `0x` hex.
fn integer(method: &'static str, field: &'static str, value: &Value) -> Result<u64, RpcError> {
    match value {
        Value::Number(number) => number.as_u64(),
        Value::String(text) => match text.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        },
        _ => None,
    }
    .ok_or_else(|| malformed(method, field, value))
}

/// Reads an amount in base units encoded as a JSON number, decimal string or
/// `0x` hex.
fn base_units(method: &'static str, field: &'static str, value: &Value) -> Result<Amount, RpcError> {
    let units = match value {
        Value::Number(number) => number.as_u64().map(u128::from).or_else(|| {
            number
                .as_f64()
                .filter(|f| f.is_finite() && *f >= 0.0)
                .map(|f| f as u128)
        }),
        Value::String(text) => match text.strip_prefix("0x") {
            Some(hex) => u128::from_str_radix(hex, 16).ok(),
            None => text.parse().ok(),
        },
        _ => None,
    };
    units
        .map(Amount::from_base_units)
        .ok_or_else(|| malformed(method, field, value))
}

/// Reads a decimal token amount such as a commission rate.
fn decimal(method: &'static str, field: &'static str, value: &Value) -> Result<Amount, RpcError> {
    value
        .as_str()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| malformed(method, field, value))
}

fn text(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

fn field<'a>(
    method: &'static str,
    value: &'a Value,
    field: &'static str,
) -> Result<&'a Value, RpcError> {
    value
        .get(field)
        .ok_or_else(|| malformed(method, field, value))
}

fn parse_validator(method: &'static str, result: &Value) -> Result<ValidatorInfo, RpcError> {
    let validator = field(method, result, "validator")?;
    let status = match result.get("active-status").and_then(Value::as_str) {
        Some("active") => ValidatorStatus::Active,
        Some("banned") => ValidatorStatus::Banned,
        _ => ValidatorStatus::Inactive,
    };
    let total_delegation = match result.get("total-delegation") {
        Some(value) if !value.is_null() => base_units(method, "total-delegation", value)?,
        _ => Amount::ZERO,
    };
    let bls_keys = validator
        .get("bls-public-keys")
        .and_then(Value::as_array)
        .map(|keys| {
            keys.iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Ok(ValidatorInfo {
        address: text(validator, "address"),
        description: ValidatorDescription {
            name: text(validator, "name"),
            identity: text(validator, "identity"),
            website: text(validator, "website"),
            security_contact: text(validator, "security-contact"),
            details: text(validator, "details"),
        },
        commission_rate: decimal(method, "rate", field(method, validator, "rate")?)?,
        min_self_delegation: base_units(
            method,
            "min-self-delegation",
            field(method, validator, "min-self-delegation")?,
        )?,
        max_total_delegation: base_units(
            method,
            "max-total-delegation",
            field(method, validator, "max-total-delegation")?,
        )?,
        status,
        total_delegation,
        bls_keys,
    })
}

fn parse_delegation(method: &'static str, entry: &Value) -> Result<Delegation, RpcError> {
    let undelegations = entry
        .get("Undelegations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| {
                    Ok(Undelegation {
                        amount: base_units(method, "Amount", field(method, item, "Amount")?)?,
                        epoch: integer(method, "Epoch", field(method, item, "Epoch")?)?,
                    })
                })
                .collect::<Result<Vec<_>, RpcError>>()
        })
        .transpose()?
        .unwrap_or_default();

    Ok(Delegation {
        delegator: text(entry, "delegator_address"),
        validator: text(entry, "validator_address"),
        amount: base_units(method, "amount", field(method, entry, "amount")?)?,
        undelegations,
    })
}

fn receipt_status(method: &'static str, receipt: &Value) -> Result<bool, RpcError> {
    let status = field(method, receipt, "status")?;
    Ok(integer(method, "status", status)? == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    const METHOD: &str = "test";

    #[test]
    fn reads_integers_in_every_encoding() {
        assert_eq!(integer(METHOD, "n", &json!(42)).expect("number"), 42);
        assert_eq!(integer(METHOD, "n", &json!("42")).expect("decimal"), 42);
        assert_eq!(integer(METHOD, "n", &json!("0x2a")).expect("hex"), 42);
        assert!(integer(METHOD, "n", &json!("forty-two")).is_err());
        assert!(integer(METHOD, "n", &json!(null)).is_err());
    }

    #[test]
    fn reads_large_balances_from_hex() {
        let balance = base_units(METHOD, "balance", &json!("0x3635c9adc5dea00000"))
            .expect("hex balance");
        assert_eq!(balance, Amount::from_whole(1000));
    }

    #[test]
    fn parses_validator_information() {
        let result = json!({
            "validator": {
                "address": "one1val",
                "name": "alpha",
                "identity": "id",
                "website": "",
                "security-contact": "sec",
                "details": "edited",
                "rate": "0.100000000000000000",
                "min-self-delegation": 10_000_000_000_000_000_000_u64,
                "max-total-delegation": "100000000000000000000",
                "bls-public-keys": ["4f1c", "9e2d"],
            },
            "active-status": "active",
            "total-delegation": 10_000_000_000_000_000_000_u64,
        });
        let info = parse_validator(METHOD, &result).expect("valid validator");

        assert_eq!(info.address, "one1val");
        assert_eq!(info.description.security_contact, "sec");
        assert_eq!(info.commission_rate, "0.1".parse::<Amount>().expect("rate"));
        assert_eq!(info.min_self_delegation, Amount::from_whole(10));
        assert_eq!(info.max_total_delegation, Amount::from_whole(100));
        assert_eq!(info.status, ValidatorStatus::Active);
        assert_eq!(info.bls_keys, ["4f1c", "9e2d"]);
    }

    #[test]
    fn parses_delegations_with_undelegations() {
        let entry = json!({
            "validator_address": "one1val",
            "delegator_address": "one1del",
            "amount": "0x56bc75e2d63100000",
            "Undelegations": [{ "Amount": "0x56bc75e2d63100000", "Epoch": 7 }],
        });
        let delegation = parse_delegation(METHOD, &entry).expect("valid delegation");

        assert_eq!(delegation.validator, "one1val");
        assert_eq!(delegation.amount, Amount::from_whole(100));
        assert_eq!(
            delegation.undelegations,
            [Undelegation {
                amount: Amount::from_whole(100),
                epoch: 7
            }]
        );
    }

    #[test]
    fn missing_validator_is_recognized() {
        let err = RpcError::Remote {
            method: METHOD,
            code: -32000,
            message: "Validator not found".to_owned(),
        };
        assert!(err.is_not_found());
        assert!(!RpcError::UnknownShard { shard: 1 }.is_not_found());
    }

    #[test]
    fn rejects_unconfigured_shards() {
        let endpoints = BTreeMap::from([(0, "http://127.0.0.1:9500".to_owned())]);
        let client =
            RpcClient::from_endpoints(&endpoints, Duration::from_secs(1)).expect("valid endpoint");
        assert!(client.endpoint(0).is_ok());
        assert!(matches!(
            client.endpoint(1),
            Err(RpcError::UnknownShard { shard: 1 })
        ));

        let bad = BTreeMap::from([(0, "not a url".to_owned())]);
        assert!(matches!(
            RpcClient::from_endpoints(&bad, Duration::from_secs(1)),
            Err(RpcError::InvalidEndpoint { .. })
        ));
    }
}
