//! Deterministic election campaign ledger.
//!
//! The crate is organised around one state machine and the minimal host it
//! needs to run:
//!
//! * [`election`]: campaign registry, fixed-price voting, time-gated
//!   settlement with lowest-index tie-break, and owner commission.
//! * [`ledger`]: account balances and escrow; applies the transfers the
//!   election returns, all-or-nothing.
//! * [`host`]: couples the two into single-writer transactions.
//! * [`store`]: durable JSON snapshot of a host.
//! * [`config`]: vote price, commission rate and voting window.
//! * [`identity`]: ed25519 keyfiles that name callers.
//!
//! Time and caller identity are always passed in explicitly; nothing here
//! reads the wall clock or keeps global state.

pub mod config;
pub mod election;
pub mod host;
pub mod identity;
pub mod ledger;
pub mod logging;
pub mod store;

pub use config::ElectionConfig;
pub use election::{Call, ElectionError, ElectionLedger, ErrorKind};
pub use host::{Host, HostError};
