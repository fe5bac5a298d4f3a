//! Watchtower race harness.
//!
//! Races an off-chain watchtower's signed emergency pause against an on-chain exploit and
//! classifies who won from block and transaction-index ordering. `experiment` drives repeated
//! randomized races; `ledger` abstracts the chain (JSON-RPC node or in-process simulation).

pub mod arbiter;
pub mod defense;
pub mod drill;
pub mod error;
pub mod experiment;
pub mod ledger;
pub mod report;
pub mod scenario;
pub mod signer;
pub mod utils;
