//! Account balances and escrow of the host environment.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type AccountId = String;
pub type Amount = u128;
pub type ReceiptId = [u8; 32];

pub const DECIMALS: u32 = 18;
pub const BASE_UNIT: Amount = 10u128.pow(DECIMALS); // 1 unit = 1e18 minimal units

/// Host account holding every value received by the election ledger until it
/// is released to a winner or to the owner.
pub const ESCROW_ACCOUNT: &str = "elections:escrow";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: need {needed}, have {available}")]
    InsufficientFunds {
        account: AccountId,
        needed: Amount,
        available: Amount,
    },
    #[error("unknown account {account}")]
    UnknownAccount { account: AccountId },
    #[error("duplicate receipt detected")]
    DuplicateReceipt,
    #[error("invalid amount {input:?}: {reason}")]
    InvalidAmount { input: String, reason: &'static str },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
    pub timestamp: u64,
    pub previous_receipt: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    pub accounts: BTreeMap<AccountId, Amount>,
    pub merkle_root: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEvent {
    Minted {
        to: AccountId,
        amount: Amount,
    },
    Escrowed {
        from: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
    Released {
        to: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LedgerMutation {
    Mint {
        to: AccountId,
        amount: Amount,
    },
    Escrow {
        from: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
    Release {
        to: AccountId,
        amount: Amount,
        memo: Option<String>,
    },
}

impl LedgerMutation {
    /// Canonical byte encoding folded into receipt ids.
    pub fn commitment(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        let (tag, account, amount, memo) = match self {
            LedgerMutation::Mint { to, amount } => (b"mint".as_slice(), to, amount, None),
            LedgerMutation::Escrow { from, amount, memo } => {
                (b"escrow".as_slice(), from, amount, memo.as_ref())
            }
            LedgerMutation::Release { to, amount, memo } => {
                (b"release".as_slice(), to, amount, memo.as_ref())
            }
        };
        buf.extend_from_slice(tag);
        buf.extend_from_slice(&(account.len() as u64).to_le_bytes());
        buf.extend_from_slice(account.as_bytes());
        buf.extend_from_slice(&amount.to_le_bytes());
        if let Some(memo) = memo {
            buf.extend_from_slice(memo.as_bytes());
        }
        buf
    }
}

/// Account balances of the host environment.
///
/// Mutations are applied all-or-nothing: a failing mutation leaves balances,
/// events and metadata untouched. Receipt ids chain the previous receipt and
/// the height, so replaying the last receipt is the only duplicate to catch.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerState {
    pub meta: SnapshotMetadata,
    pub accounts: BTreeMap<AccountId, Amount>,
    pub events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, account: &str) -> Amount {
        self.accounts.get(account).copied().unwrap_or(0)
    }

    pub fn escrow_balance(&self) -> Amount {
        self.balance(ESCROW_ACCOUNT)
    }

    pub fn total_supply(&self) -> Amount {
        self.accounts.values().sum()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            accounts: self.accounts.clone(),
            merkle_root: hex::encode(compute_merkle_root(&self.accounts)),
        }
    }

    pub fn apply_mutations(
        &mut self,
        mutations: &[LedgerMutation],
        receipt_id: ReceiptId,
        timestamp: u64,
    ) -> Result<(), LedgerError> {
        let receipt = hex::encode(receipt_id);
        if self.meta.previous_receipt.as_deref() == Some(receipt.as_str()) {
            return Err(LedgerError::DuplicateReceipt);
        }

        let mut staged = self.accounts.clone();
        let mut events = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            match mutation {
                LedgerMutation::Mint { to, amount } => {
                    credit(&mut staged, to, *amount);
                    events.push(LedgerEvent::Minted {
                        to: to.clone(),
                        amount: *amount,
                    });
                }
                LedgerMutation::Escrow { from, amount, memo } => {
                    debit(&mut staged, from, *amount)?;
                    credit(&mut staged, ESCROW_ACCOUNT, *amount);
                    events.push(LedgerEvent::Escrowed {
                        from: from.clone(),
                        amount: *amount,
                        memo: memo.clone(),
                    });
                }
                LedgerMutation::Release { to, amount, memo } => {
                    debit(&mut staged, ESCROW_ACCOUNT, *amount)?;
                    credit(&mut staged, to, *amount);
                    events.push(LedgerEvent::Released {
                        to: to.clone(),
                        amount: *amount,
                        memo: memo.clone(),
                    });
                }
            }
        }

        self.accounts = staged;
        self.events.extend(events);
        self.meta.height += 1;
        self.meta.timestamp = timestamp;
        self.meta.previous_receipt = Some(receipt);
        Ok(())
    }
}

fn credit(accounts: &mut BTreeMap<AccountId, Amount>, account: &str, amount: Amount) {
    if amount == 0 {
        return;
    }
    *accounts.entry(account.to_string()).or_default() += amount;
}

fn debit(
    accounts: &mut BTreeMap<AccountId, Amount>,
    account: &str,
    amount: Amount,
) -> Result<(), LedgerError> {
    if amount == 0 {
        return Ok(());
    }
    let balance = accounts
        .get_mut(account)
        .ok_or_else(|| LedgerError::UnknownAccount {
            account: account.to_string(),
        })?;
    if *balance < amount {
        return Err(LedgerError::InsufficientFunds {
            account: account.to_string(),
            needed: amount,
            available: *balance,
        });
    }
    *balance -= amount;
    Ok(())
}

fn compute_merkle_root(accounts: &BTreeMap<AccountId, Amount>) -> [u8; 32] {
    let leaves = accounts
        .iter()
        .map(|(account, balance)| -> [u8; 32] {
            let mut hasher = Sha256::new();
            hasher.update(b"acct");
            hasher.update(account.as_bytes());
            hasher.update(balance.to_le_bytes());
            hasher.finalize().into()
        })
        .collect();
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"elections-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            hasher.update(chunk.get(1).unwrap_or(&chunk[0]));
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

/// Parses a decimal amount such as `"0.01"` into minimal units.
pub fn parse_units(input: &str) -> Result<Amount, LedgerError> {
    let invalid = |reason| LedgerError::InvalidAmount {
        input: input.to_string(),
        reason,
    };
    let trimmed = input.trim();
    let (whole, fraction) = match trimmed.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (trimmed, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid("empty"));
    }
    if !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid("not a decimal number"));
    }
    if fraction.len() > DECIMALS as usize {
        return Err(invalid("too many decimal places"));
    }

    let whole: Amount = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid("overflow"))?
    };
    let mut frac: Amount = 0;
    if !fraction.is_empty() {
        frac = fraction.parse().map_err(|_| invalid("overflow"))?;
        frac *= 10u128.pow(DECIMALS - fraction.len() as u32);
    }
    whole
        .checked_mul(BASE_UNIT)
        .and_then(|w| w.checked_add(frac))
        .ok_or_else(|| invalid("overflow"))
}

/// Renders minimal units as a decimal string without trailing zeros.
pub fn format_units(amount: Amount) -> String {
    let whole = amount / BASE_UNIT;
    let frac = amount % BASE_UNIT;
    if frac == 0 {
        return whole.to_string();
    }
    let digits = format!("{:0width$}", frac, width = DECIMALS as usize);
    format!("{}.{}", whole, digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(account: &str, amount: Amount) -> LedgerState {
        let mut ledger = LedgerState::new();
        ledger
            .apply_mutations(
                &[LedgerMutation::Mint {
                    to: account.into(),
                    amount,
                }],
                [9u8; 32],
                0,
            )
            .unwrap();
        ledger
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let ledger = funded("alice", 1_000);
        let root1 = ledger.snapshot().merkle_root;
        let root2 = ledger.snapshot().merkle_root;
        assert_eq!(root1, root2);
        assert_ne!(root1, LedgerState::new().snapshot().merkle_root);
    }

    #[test]
    fn escrow_and_release_move_value_through_escrow() {
        let mut ledger = funded("alice", 10_000);
        ledger
            .apply_mutations(
                &[
                    LedgerMutation::Escrow {
                        from: "alice".into(),
                        amount: 4_000,
                        memo: Some("vote".into()),
                    },
                    LedgerMutation::Release {
                        to: "bob".into(),
                        amount: 3_000,
                        memo: None,
                    },
                ],
                [1u8; 32],
                7,
            )
            .unwrap();
        assert_eq!(ledger.balance("alice"), 6_000);
        assert_eq!(ledger.balance("bob"), 3_000);
        assert_eq!(ledger.escrow_balance(), 1_000);
        assert_eq!(ledger.total_supply(), 10_000);
        assert_eq!(ledger.events.len(), 3);
        assert_eq!(ledger.meta.height, 2);
        assert_eq!(ledger.meta.timestamp, 7);
    }

    #[test]
    fn failed_batch_leaves_state_untouched() {
        let mut ledger = funded("alice", 100);
        let before = ledger.clone();
        let err = ledger
            .apply_mutations(
                &[
                    LedgerMutation::Escrow {
                        from: "alice".into(),
                        amount: 60,
                        memo: None,
                    },
                    LedgerMutation::Escrow {
                        from: "alice".into(),
                        amount: 60,
                        memo: None,
                    },
                ],
                [2u8; 32],
                1,
            )
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientFunds {
                account: "alice".into(),
                needed: 60,
                available: 40,
            }
        );
        assert_eq!(ledger, before);
    }

    #[test]
    fn unknown_account_and_duplicate_receipt_are_rejected() {
        let mut ledger = funded("alice", 100);
        let err = ledger
            .apply_mutations(
                &[LedgerMutation::Escrow {
                    from: "mallory".into(),
                    amount: 1,
                    memo: None,
                }],
                [3u8; 32],
                1,
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::UnknownAccount { .. }));

        let err = ledger.apply_mutations(&[], [9u8; 32], 1).unwrap_err();
        assert_eq!(err, LedgerError::DuplicateReceipt);
    }

    #[test]
    fn zero_value_release_succeeds_without_escrow_account() {
        let mut ledger = LedgerState::new();
        ledger
            .apply_mutations(
                &[LedgerMutation::Release {
                    to: "winner".into(),
                    amount: 0,
                    memo: None,
                }],
                [4u8; 32],
                1,
            )
            .unwrap();
        assert_eq!(ledger.balance("winner"), 0);
        assert!(ledger.accounts.is_empty());
    }

    #[test]
    fn units_parse_and_format() {
        assert_eq!(parse_units("0.01").unwrap(), BASE_UNIT / 100);
        assert_eq!(parse_units("1").unwrap(), BASE_UNIT);
        assert_eq!(parse_units(".5").unwrap(), BASE_UNIT / 2);
        assert_eq!(format_units(BASE_UNIT * 9 / 1_000), "0.009");
        assert_eq!(format_units(BASE_UNIT * 3), "3");
        assert_eq!(format_units(0), "0");
        assert!(parse_units("").is_err());
        assert!(parse_units("1.2.3").is_err());
        assert!(parse_units("0.0000000000000000001").is_err());
        assert!(parse_units("-1").is_err());
    }
}
