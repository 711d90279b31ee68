//! In-process host environment for the election ledger.
//!
//! The host pairs an [`ElectionLedger`] with the [`LedgerState`] holding
//! account balances. Every mutating election operation is executed as one
//! transaction: the election runs against a staged copy, the transfers it
//! returns are applied to the account ledger, and only if both succeed is
//! the staged election committed. Exclusive `&mut self` access gives the
//! single-writer ordering the election ledger relies on.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::{ConfigError, ElectionConfig};
use crate::election::{
    Ballot, Call, CampaignId, ElectionError, ElectionLedger, Settlement, Transfers, Withdrawal,
    CANDIDATE_COUNT,
};
use crate::ledger::{AccountId, Amount, LedgerError, LedgerMutation, LedgerState, ReceiptId};

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error(transparent)]
    Election(#[from] ElectionError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Host {
    election: ElectionLedger,
    ledger: LedgerState,
}

impl Host {
    pub fn new(owner: impl Into<AccountId>, config: ElectionConfig) -> Result<Self, HostError> {
        config.validate()?;
        Ok(Self {
            election: ElectionLedger::new(owner, config),
            ledger: LedgerState::new(),
        })
    }

    pub fn election(&self) -> &ElectionLedger {
        &self.election
    }

    pub fn ledger(&self) -> &LedgerState {
        &self.ledger
    }

    pub fn balance(&self, account: &str) -> Amount {
        self.ledger.balance(account)
    }

    /// Credits an account out of thin air. Development faucet only.
    pub fn mint(&mut self, to: &str, amount: Amount, now: u64) -> Result<ReceiptId, HostError> {
        let mutations = vec![LedgerMutation::Mint {
            to: to.to_string(),
            amount,
        }];
        let receipt = self.next_receipt("mint", &mutations);
        self.ledger.apply_mutations(&mutations, receipt, now)?;
        info!(account = to, amount = %amount, "minted");
        Ok(receipt)
    }

    pub fn create_campaign(
        &mut self,
        call: &Call,
        name: &str,
        candidates: [AccountId; CANDIDATE_COUNT],
    ) -> Result<CampaignId, HostError> {
        self.transact(call, "create_campaign", |election| {
            election.create_campaign(call, name, candidates)
        })
    }

    pub fn vote(&mut self, call: &Call, name: &str, candidate: u32) -> Result<Ballot, HostError> {
        self.transact(call, "vote", |election| election.vote(call, name, candidate))
    }

    pub fn finish_campaign(&mut self, call: &Call, name: &str) -> Result<Settlement, HostError> {
        self.transact(call, "finish_campaign", |election| {
            election.finish_campaign(call, name)
        })
    }

    pub fn withdraw_commission(&mut self, call: &Call) -> Result<Withdrawal, HostError> {
        self.transact(call, "withdraw_commission", |election| {
            election.withdraw_commission(call)
        })
    }

    /// Escrow must always cover what the election ledger claims to hold.
    pub fn is_consistent(&self) -> bool {
        self.election.is_conserved() && self.ledger.escrow_balance() == self.election.escrowed()
    }

    fn transact<T, F>(&mut self, call: &Call, op: &str, f: F) -> Result<T, HostError>
    where
        T: Transfers,
        F: FnOnce(&mut ElectionLedger) -> Result<T, ElectionError>,
    {
        let mut staged = self.election.stage();
        let outcome = f(&mut staged).map_err(|err| {
            debug!(op, caller = %call.caller, error = %err, "call rejected");
            err
        })?;
        let mutations = outcome.mutations();
        let receipt = self.next_receipt(op, &mutations);
        self.ledger
            .apply_mutations(&mutations, receipt, call.now)
            .map_err(|err| {
                debug!(op, caller = %call.caller, error = %err, "transfer rejected");
                err
            })?;
        self.election.commit(staged);
        Ok(outcome)
    }

    fn next_receipt(&self, op: &str, mutations: &[LedgerMutation]) -> ReceiptId {
        let mut hasher = Sha256::new();
        hasher.update(b"elections-receipt");
        if let Some(previous) = &self.ledger.meta.previous_receipt {
            hasher.update(previous.as_bytes());
        }
        hasher.update(self.ledger.meta.height.to_le_bytes());
        hasher.update(op.as_bytes());
        for mutation in mutations {
            hasher.update(mutation.commitment());
        }
        hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_000;

    fn host() -> Host {
        let mut host = Host::new("owner", ElectionConfig::default()).unwrap();
        for voter in ["v1", "v2"] {
            host.mint(voter, ElectionConfig::default().vote_price, T0).unwrap();
        }
        host.create_campaign(
            &Call::new("owner", T0),
            "GD2021",
            ["a".into(), "b".into(), "c".into()],
        )
        .unwrap();
        host
    }

    #[test]
    fn vote_moves_value_into_escrow() {
        let mut host = host();
        let price = host.election().config().vote_price;
        host.vote(&Call::new("v1", T0).with_value(price), "GD2021", 2)
            .unwrap();
        assert_eq!(host.balance("v1"), 0);
        assert_eq!(host.ledger().escrow_balance(), price);
        assert!(host.is_consistent());
    }

    #[test]
    fn unfunded_voter_leaves_election_untouched() {
        let mut host = host();
        let price = host.election().config().vote_price;
        let before = host.clone();
        let err = host
            .vote(&Call::new("broke", T0).with_value(price), "GD2021", 1)
            .unwrap_err();
        assert!(matches!(err, HostError::Ledger(LedgerError::UnknownAccount { .. })));
        assert_eq!(host, before);
    }

    #[test]
    fn election_rejection_skips_transfers() {
        let mut host = host();
        let before = host.clone();
        let err = host
            .vote(&Call::new("v1", T0).with_value(1), "GD2021", 1)
            .unwrap_err();
        assert!(matches!(
            err,
            HostError::Election(ElectionError::InvalidVotePrice { .. })
        ));
        assert_eq!(host, before);
    }

    #[test]
    fn committed_transactions_extend_the_audit_log() {
        let mut host = host();
        let price = host.election().config().vote_price;
        host.vote(&Call::new("v1", T0).with_value(price), "GD2021", 1)
            .unwrap();
        let _ = host.vote(&Call::new("v1", T0).with_value(price), "GD2021", 1);
        host.vote(&Call::new("v2", T0).with_value(price), "GD2021", 3)
            .unwrap();
        assert_eq!(host.election().events().len(), 3);
        assert!(host.is_consistent());
    }

    #[test]
    fn replaying_the_last_receipt_is_rejected() {
        let mut host = host();
        let mutations = vec![LedgerMutation::Mint {
            to: "v3".into(),
            amount: 5,
        }];
        let receipt = host.next_receipt("mint", &mutations);
        host.ledger.apply_mutations(&mutations, receipt, T0).unwrap();
        let err = host
            .ledger
            .apply_mutations(&mutations, receipt, T0)
            .unwrap_err();
        assert_eq!(err, LedgerError::DuplicateReceipt);
        assert_eq!(host.balance("v3"), 5);
    }

    #[test]
    fn receipts_chain_per_transaction() {
        let mut host = host();
        let height = host.ledger().meta.height;
        let first = host.mint("v3", 5, T0).unwrap();
        let second = host.mint("v3", 5, T0).unwrap();
        assert_ne!(first, second);
        assert_eq!(host.ledger().meta.height, height + 2);
        assert_eq!(host.balance("v3"), 10);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = ElectionConfig {
            vote_price: 0,
            ..ElectionConfig::default()
        };
        assert!(matches!(
            Host::new("owner", config),
            Err(HostError::Config(ConfigError::ZeroVotePrice))
        ));
    }
}
