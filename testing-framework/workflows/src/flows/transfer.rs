use async_trait::async_trait;
use testing_framework_config::{Amount, testcase::TransferParams};
use testing_framework_core::{
    convergence::{await_balance_at_least, await_nonzero_balance},
    ledger::{Account, TxPayload, TxRequest},
    scenario::{Checks, RoleSpec, ScenarioError, ScenarioFlow, Step},
};
use tracing::info;

use super::{RECEIVERS, SENDER, SENDERS};

fn transfer_request(params: &TransferParams, sender: &Account, receiver: &str) -> TxRequest {
    TxRequest {
        sender: sender.address.clone(),
        from_shard: params.from_shard,
        payload: TxPayload::Transfer {
            receiver: receiver.to_owned(),
            to_shard: params.to_shard,
            amount: params.amount,
            data: params.data.clone(),
        },
        nonce: params.nonce,
        gas: params.gas,
        timeout: params.timeout(),
    }
}

/// Nonce of the `index`-th transfer when the first one is pinned to `start`.
fn sequential_nonce(start: Option<u64>, index: usize) -> Result<Option<u64>, ScenarioError> {
    let Some(start) = start else {
        return Ok(None);
    };
    u64::try_from(index)
        .ok()
        .and_then(|offset| start.checked_add(offset))
        .map(Some)
        .ok_or_else(|| ScenarioError::InvalidParameters {
            reason: format!("nonce {start} overflows at transfer {}", index + 1),
        })
}

fn receiver_roles(params: &TransferParams) -> impl Iterator<Item = &'static str> {
    RECEIVERS
        .into_iter()
        .take(usize::try_from(params.receiver_count).unwrap_or(RECEIVERS.len()))
}

fn sender_roles(params: &TransferParams) -> impl Iterator<Item = &'static str> {
    SENDERS
        .into_iter()
        .take(usize::try_from(params.sender_count).unwrap_or(SENDERS.len()))
}

/// Sender pays `amount` to each of `receiver_count` fresh receivers.
///
/// With a repeated nonce every transfer carries the same nonce, so the
/// ledger is expected to accept only the first one.
pub struct TransferFlow {
    params: TransferParams,
    repeat_nonce: bool,
}

impl TransferFlow {
    #[must_use]
    pub const fn new(params: TransferParams) -> Self {
        Self {
            params,
            repeat_nonce: false,
        }
    }

    #[must_use]
    pub const fn repeating_nonce(params: TransferParams) -> Self {
        Self {
            params,
            repeat_nonce: true,
        }
    }

    fn nonces(&self, count: usize) -> Result<Vec<Option<u64>>, ScenarioError> {
        if self.repeat_nonce {
            let nonce = self.params.nonce.unwrap_or_default();
            return Ok(vec![Some(nonce); count]);
        }
        (0..count)
            .map(|index| sequential_nonce(self.params.nonce, index))
            .collect()
    }
}

pub struct TransferSnapshot {
    sender: Account,
    sender_start: Amount,
    /// Receiver, its starting balance and whether the transfer was accepted.
    receivers: Vec<(Account, Amount, bool)>,
}

#[async_trait]
impl ScenarioFlow for TransferFlow {
    type Snapshot = TransferSnapshot;

    fn name(&self) -> &'static str {
        if self.repeat_nonce {
            "multiple_receivers_invalid_nonce"
        } else {
            "transfer"
        }
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        let mut roles = vec![
            RoleSpec::funded(SENDER, params.from_shard, params.amount)
                .paying_fees(&params.gas, 1)
                .with_multiple(params.receiver_count),
        ];
        roles.extend(receiver_roles(params).map(|role| RoleSpec::unfunded(role, params.to_shard)));
        roles
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<TransferSnapshot, ScenarioError> {
        let params = &self.params;
        let sender = step.account(SENDER)?;
        let sender_start = step.balance(&sender.address, params.from_shard).await?;

        let mut receivers = Vec::new();
        for role in receiver_roles(params) {
            let receiver = step.account(role)?;
            let start = step.balance(&receiver.address, params.to_shard).await?;
            receivers.push((receiver, start, false));
        }

        let nonces = self.nonces(receivers.len())?;
        for ((receiver, _, accepted), nonce) in receivers.iter_mut().zip(nonces) {
            let mut request = transfer_request(params, &sender, &receiver.address);
            request.nonce = nonce;
            *accepted = step.send(params.rpc_prefix, &request).await.success;
        }
        info!(
            sender = %sender.address,
            receivers = receivers.len(),
            repeat_nonce = self.repeat_nonce,
            cross_shard = params.is_cross_shard(),
            "transfers submitted"
        );

        Ok(TransferSnapshot {
            sender,
            sender_start,
            receivers,
        })
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        snapshot: TransferSnapshot,
    ) -> Result<Checks, ScenarioError> {
        let params = &self.params;
        let ctx = step.ctx();
        let policy = ctx.settings().balance_retry;
        let mut checks = Checks::new();
        let mut accepted_count = 0_u64;

        for (receiver, start, accepted) in &snapshot.receivers {
            let label = format!("{} credited on shard {}", receiver.name, params.to_shard);
            if !accepted {
                checks.record(label, false, "transfer was not accepted");
                continue;
            }
            accepted_count += 1;

            let expected = start.checked_add(params.amount).unwrap_or(*start);
            let observed = checks.condition(
                label,
                await_balance_at_least(
                    ctx.ledger(),
                    &receiver.address,
                    params.to_shard,
                    expected,
                    policy,
                )
                .await,
            );
            if let Some(observed) = observed {
                checks.record(
                    format!("{} received exactly {}", receiver.name, params.amount),
                    observed == expected,
                    format!("expected {expected}, observed {observed}"),
                );
            }
        }

        let spent = params.amount.checked_mul(accepted_count).unwrap_or(params.amount);
        let fees = params.gas.max_fee().checked_mul(accepted_count).unwrap_or(spent);
        let expected = snapshot.sender_start.saturating_sub(spent);
        let ending = step
            .balance(&snapshot.sender.address, params.from_shard)
            .await?;
        checks.record(
            "sender debited amount plus fees",
            ending <= expected && ending.within(expected, fees),
            format!("expected {expected} minus at most {fees}, observed {ending}"),
        );

        Ok(checks)
    }
}

/// `sender_count` funded senders each pay `amount` to one receiver.
pub struct MultipleSendersFlow {
    params: TransferParams,
}

impl MultipleSendersFlow {
    #[must_use]
    pub const fn new(params: TransferParams) -> Self {
        Self { params }
    }
}

pub struct MultipleSendersSnapshot {
    receiver: Account,
    receiver_start: Amount,
    /// Sender, its starting balance and whether its transfer was accepted.
    senders: Vec<(Account, Amount, bool)>,
}

#[async_trait]
impl ScenarioFlow for MultipleSendersFlow {
    type Snapshot = MultipleSendersSnapshot;

    fn name(&self) -> &'static str {
        "multiple_senders"
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        let mut roles: Vec<_> = sender_roles(params)
            .map(|role| {
                RoleSpec::funded(role, params.from_shard, params.amount).paying_fees(&params.gas, 1)
            })
            .collect();
        roles.push(RoleSpec::unfunded(RECEIVERS[0], params.to_shard));
        roles
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<MultipleSendersSnapshot, ScenarioError> {
        let params = &self.params;
        let receiver = step.account(RECEIVERS[0])?;
        let receiver_start = step.balance(&receiver.address, params.to_shard).await?;

        let mut senders = Vec::new();
        for role in sender_roles(params) {
            let sender = step.account(role)?;
            let start = step.balance(&sender.address, params.from_shard).await?;
            senders.push((sender, start, false));
        }

        for (sender, _, accepted) in &mut senders {
            let request = transfer_request(params, sender, &receiver.address);
            *accepted = step.send(params.rpc_prefix, &request).await.success;
        }
        info!(
            receiver = %receiver.address,
            senders = senders.len(),
            cross_shard = params.is_cross_shard(),
            "transfers submitted"
        );

        Ok(MultipleSendersSnapshot {
            receiver,
            receiver_start,
            senders,
        })
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        snapshot: MultipleSendersSnapshot,
    ) -> Result<Checks, ScenarioError> {
        let params = &self.params;
        let ctx = step.ctx();
        let policy = ctx.settings().balance_retry;
        let mut checks = Checks::new();

        let accepted = snapshot.senders.iter().filter(|(_, _, accepted)| *accepted).count();
        let credited = u64::try_from(accepted)
            .ok()
            .and_then(|count| params.amount.checked_mul(count))
            .and_then(|total| snapshot.receiver_start.checked_add(total))
            .ok_or_else(|| ScenarioError::InvalidParameters {
                reason: format!("{accepted} transfers of {} overflow", params.amount),
            })?;

        let receiver = &snapshot.receiver;
        let observed = checks.condition(
            format!("{} credited by {accepted} senders", receiver.name),
            await_balance_at_least(
                ctx.ledger(),
                &receiver.address,
                params.to_shard,
                credited,
                policy,
            )
            .await,
        );
        if let Some(observed) = observed {
            checks.record(
                format!("{} received exactly {accepted} transfers", receiver.name),
                observed == credited,
                format!("expected {credited}, observed {observed}"),
            );
        }

        let fee = params.gas.max_fee();
        for (sender, start, accepted) in &snapshot.senders {
            let label = format!("{} debited amount plus fee", sender.name);
            if !accepted {
                checks.record(label, false, "transfer was not accepted");
                continue;
            }
            let expected = start.saturating_sub(params.amount);
            let ending = step.balance(&sender.address, params.from_shard).await?;
            checks.record(
                label,
                ending <= expected && ending.within(expected, fee),
                format!("expected {expected} minus at most {fee}, observed {ending}"),
            );
        }

        Ok(checks)
    }
}

/// An account sends `amount` to itself, possibly across shards.
pub struct SameAccountTransferFlow {
    params: TransferParams,
}

impl SameAccountTransferFlow {
    #[must_use]
    pub const fn new(params: TransferParams) -> Self {
        Self { params }
    }
}

pub struct SameAccountSnapshot {
    account: Account,
    source_start: Amount,
    target_start: Amount,
    accepted: bool,
}

#[async_trait]
impl ScenarioFlow for SameAccountTransferFlow {
    type Snapshot = SameAccountSnapshot;

    fn name(&self) -> &'static str {
        "same_account_transfer"
    }

    fn roles(&self) -> Vec<RoleSpec> {
        let params = &self.params;
        vec![RoleSpec::funded(SENDER, params.from_shard, params.amount).paying_fees(&params.gas, 1)]
    }

    async fn execute(&self, step: &mut Step<'_>) -> Result<SameAccountSnapshot, ScenarioError> {
        let params = &self.params;
        let account = step.account(SENDER)?;
        step.touch_shard(SENDER, params.to_shard);

        let source_start = step.balance(&account.address, params.from_shard).await?;
        let target_start = if params.is_cross_shard() {
            step.balance(&account.address, params.to_shard).await?
        } else {
            source_start
        };

        let request = transfer_request(params, &account, &account.address);
        let accepted = step.send(params.rpc_prefix, &request).await.success;

        Ok(SameAccountSnapshot {
            account,
            source_start,
            target_start,
            accepted,
        })
    }

    async fn verify(
        &self,
        step: &mut Step<'_>,
        snapshot: SameAccountSnapshot,
    ) -> Result<Checks, ScenarioError> {
        let params = &self.params;
        let ctx = step.ctx();
        let policy = ctx.settings().balance_retry;
        let address = &snapshot.account.address;
        let mut checks = Checks::new();
        if !snapshot.accepted {
            checks.record("self transfer accepted", false, "transfer was not accepted");
            return Ok(checks);
        }

        let expected = snapshot
            .target_start
            .checked_add(params.amount)
            .unwrap_or(snapshot.target_start);

        if params.is_cross_shard() {
            let observed = checks.condition(
                format!("credited on shard {}", params.to_shard),
                await_balance_at_least(ctx.ledger(), address, params.to_shard, expected, policy)
                    .await,
            );
            if let Some(observed) = observed {
                checks.record(
                    "target shard balance equals start plus amount",
                    observed == expected,
                    format!("expected {expected}, observed {observed}"),
                );
            }
            let source = step.balance(address, params.from_shard).await?;
            let ceiling = snapshot.source_start.saturating_sub(params.amount);
            checks.record(
                format!("debited on shard {}", params.from_shard),
                source <= ceiling,
                format!("expected at most {ceiling}, observed {source}"),
            );
        } else {
            let observed = checks.condition(
                "balance readable after self transfer",
                await_nonzero_balance(ctx.ledger(), address, params.from_shard, policy).await,
            );
            if let Some(observed) = observed {
                let fee = params.gas.max_fee();
                checks.record(
                    "ending balance at most start plus amount",
                    observed <= expected,
                    format!("expected at most {expected}, observed {observed}"),
                );
                checks.record(
                    "only fees deducted",
                    observed <= snapshot.source_start
                        && observed.within(snapshot.source_start, fee),
                    format!(
                        "expected {} minus at most {fee}, observed {observed}",
                        snapshot.source_start
                    ),
                );
            }
        }

        Ok(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_nonces_increase_per_transfer() {
        assert_eq!(sequential_nonce(Some(7), 0).expect("first"), Some(7));
        assert_eq!(sequential_nonce(Some(7), 3).expect("fourth"), Some(10));
        assert_eq!(sequential_nonce(None, 5).expect("unpinned"), None);
    }

    #[test]
    fn nonce_overflow_is_an_error() {
        assert_eq!(sequential_nonce(Some(u64::MAX), 0).expect("first"), Some(u64::MAX));
        let err = sequential_nonce(Some(u64::MAX), 1).expect_err("overflow");
        assert!(matches!(err, ScenarioError::InvalidParameters { .. }));
    }

    #[test]
    fn repeated_nonce_is_shared_by_every_transfer() {
        let params = TransferParams {
            nonce: Some(4),
            ..TransferParams::default()
        };
        let flow = TransferFlow::repeating_nonce(params);
        assert_eq!(flow.nonces(3).expect("nonces"), [Some(4); 3]);

        let unpinned = TransferFlow::repeating_nonce(TransferParams::default());
        assert_eq!(unpinned.nonces(2).expect("nonces"), [Some(0); 2]);
        assert_eq!(unpinned.name(), "multiple_receivers_invalid_nonce");
    }

    #[test]
    fn every_sender_is_funded_for_one_transfer() {
        let params = TransferParams {
            amount: Amount::from_whole(3),
            sender_count: 3,
            to_shard: 1,
            ..TransferParams::default()
        };
        let roles = MultipleSendersFlow::new(params).roles();

        let names: Vec<_> = roles.iter().map(|role| role.role).collect();
        assert_eq!(names, ["Sender1", "Sender2", "Sender3", "Receiver1"]);
        assert!(roles[..3].iter().all(|role| role.funding.is_some()));
        assert!(roles[3].funding.is_none());
        assert_eq!(roles[3].shard, 1);
    }
}
