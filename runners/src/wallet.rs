//! Key management and signing delegated to an external wallet program.
//!
//! The program is invoked once per operation:
//!
//! - `keys add <name>` prints the new address on its last stdout line.
//! - `keys remove <name>` removes the key.
//! - `sign --dialect <hmy|eth> --chain-id <id> --nonce <n>` reads the request
//!   as JSON on stdin and prints the raw transaction hex, optionally followed
//!   by the transaction hash on a second line.

use std::{path::PathBuf, process::Stdio};

use async_trait::async_trait;
use serde_json::{Value, json};
use testing_framework_config::{ChainId, Dialect};
use testing_framework_core::{
    DynError,
    ledger::{Account, KeyStore, SignedTx, TxPayload, TxRequest, TxSigner},
};
use thiserror::Error;
use tokio::{io::AsyncWriteExt as _, process::Command};
use tracing::debug;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("failed to run wallet program `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {status}: {stderr}")]
    Failed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("`{command}` printed nothing")]
    EmptyOutput { command: String },
}

#[derive(Clone, Debug)]
pub struct CliWallet {
    program: PathBuf,
    passphrase: Option<String>,
}

impl CliWallet {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, passphrase: &str) -> Self {
        Self {
            program: program.into(),
            passphrase: (!passphrase.is_empty()).then(|| passphrase.to_owned()),
        }
    }

    async fn invoke(&self, args: &[String], stdin: Option<&[u8]>) -> Result<String, WalletError> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        debug!(%command, "invoking wallet");

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(passphrase) = &self.passphrase {
            cmd.env("WALLET_PASSPHRASE", passphrase);
        }

        let spawn_err = |source| WalletError::Spawn {
            program: self.program.display().to_string(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await.map_err(spawn_err)?;
        }
        let output = child.wait_with_output().await.map_err(spawn_err)?;

        if !output.status.success() {
            return Err(WalletError::Failed {
                command,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        if stdout.is_empty() {
            return Err(WalletError::EmptyOutput { command });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl KeyStore for CliWallet {
    async fn generate(&self, name: &str) -> Result<Account, DynError> {
        let args = ["keys".to_owned(), "add".to_owned(), name.to_owned()];
        let stdout = self.invoke(&args, None).await?;
        let address = stdout.lines().last().unwrap_or_default().trim();
        Ok(Account::new(name, address))
    }

    async fn remove(&self, name: &str) -> Result<(), DynError> {
        let args = ["keys".to_owned(), "remove".to_owned(), name.to_owned()];
        match self.invoke(&args, None).await {
            Ok(_) | Err(WalletError::EmptyOutput { .. }) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl TxSigner for CliWallet {
    async fn sign(
        &self,
        dialect: Dialect,
        chain: ChainId,
        request: &TxRequest,
        nonce: u64,
    ) -> Result<SignedTx, DynError> {
        let args = [
            "sign".to_owned(),
            "--dialect".to_owned(),
            dialect.prefix().to_owned(),
            "--chain-id".to_owned(),
            chain.value.to_string(),
            "--nonce".to_owned(),
            nonce.to_string(),
        ];
        let body = serde_json::to_vec(&request_json(request))?;
        let stdout = self.invoke(&args, Some(&body)).await?;

        let mut lines = stdout.lines().map(str::trim);
        let raw = lines.next().unwrap_or_default();
        let raw = if raw.starts_with("0x") {
            raw.to_owned()
        } else {
            format!("0x{raw}")
        };
        let hash = lines.next().filter(|hash| !hash.is_empty()).map(str::to_owned);
        Ok(SignedTx { raw, hash })
    }
}

fn request_json(request: &TxRequest) -> Value {
    let payload = match &request.payload {
        TxPayload::Transfer {
            receiver,
            to_shard,
            amount,
            data,
        } => json!({
            "type": "transfer",
            "to": receiver,
            "to_shard": to_shard,
            "amount": amount,
            "data": data,
        }),
        TxPayload::CreateValidator {
            validator,
            description,
            commission,
            min_self_delegation,
            max_total_delegation,
            amount,
            bls_keys,
        } => json!({
            "type": "create_validator",
            "validator": validator,
            "name": description.name,
            "identity": description.identity,
            "website": description.website,
            "security_contact": description.security_contact,
            "details": description.details,
            "rate": commission.rate,
            "max_rate": commission.max_rate,
            "max_change_rate": commission.max_change_rate,
            "min_self_delegation": min_self_delegation,
            "max_total_delegation": max_total_delegation,
            "amount": amount,
            "bls_keys": bls_keys,
        }),
        TxPayload::EditValidator {
            validator,
            changes,
            status,
        } => json!({
            "type": "edit_validator",
            "validator": validator,
            "name": changes.name,
            "identity": changes.identity,
            "website": changes.website,
            "security_contact": changes.security_contact,
            "details": changes.details,
            "rate": changes.commission_rate,
            "min_self_delegation": changes.min_self_delegation,
            "max_total_delegation": changes.max_total_delegation,
            "status": status,
        }),
        TxPayload::Delegate {
            delegator,
            validator,
            amount,
        } => json!({
            "type": "delegate",
            "delegator": delegator,
            "validator": validator,
            "amount": amount,
        }),
        TxPayload::Undelegate {
            delegator,
            validator,
            amount,
        } => json!({
            "type": "undelegate",
            "delegator": delegator,
            "validator": validator,
            "amount": amount,
        }),
    };

    json!({
        "from": request.sender,
        "from_shard": request.from_shard,
        "gas_limit": request.gas.limit,
        "gas_price": request.gas.price,
        "payload": payload,
    })
}
