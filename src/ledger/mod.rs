//! Ledger gateway seam.
//!
//! The harness never talks to a chain directly; it consumes `LedgerGateway`, which exposes
//! nonce reads, view calls, transaction broadcast and receipt lookup. `rpc` backs it with a
//! JSON-RPC node, `sim` with a deterministic in-process block builder.

pub mod revert;
pub mod rpc;
pub mod sim;

pub use revert::{classify_revert_reason, RevertCategory};

use crate::error::LedgerError;
use crate::signer::Identity;
use alloy::primitives::{Address, Bytes, B256, U256};
use async_trait::async_trait;
use std::time::Duration;

pub type TxHandle = B256;

/// Fixed gas limit for watchtower/admin calls. These are sent without estimation so a failing
/// contract check still lands on-chain (and burns its nonce slot) instead of erroring locally.
pub const CONTROL_CALL_GAS_LIMIT: u64 = 300_000;

pub const WEI_PER_TOKEN: u128 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractRole {
    Token,
    Vault,
    Dex,
    ReserveToken,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractAddresses {
    pub token: Address,
    pub vault: Address,
    pub dex: Address,
    pub reserve_token: Address,
}

impl ContractAddresses {
    pub fn get(&self, role: ContractRole) -> Address {
        match role {
            ContractRole::Token => self.token,
            ContractRole::Vault => self.vault,
            ContractRole::Dex => self.dex,
            ContractRole::ReserveToken => self.reserve_token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractCall {
    PauseByWatchtower { signature: Bytes },
    ResumeService,
    BlacklistAccount { account: Address },
    UnblacklistAccount { account: Address },
    ExploitMint { amount: U256 },
    ExploitDrain { amount: U256 },
    SimulateDump { amount: U256 },
    Transfer { to: Address, amount: U256 },
}

impl ContractCall {
    pub fn target(&self) -> ContractRole {
        match self {
            ContractCall::ExploitDrain { .. } => ContractRole::Vault,
            ContractCall::SimulateDump { .. } => ContractRole::Dex,
            _ => ContractRole::Token,
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            ContractCall::PauseByWatchtower { .. } => "pauseByWatchtower",
            ContractCall::ResumeService => "resumeService",
            ContractCall::BlacklistAccount { .. } => "blacklistAccount",
            ContractCall::UnblacklistAccount { .. } => "unblacklistAccount",
            ContractCall::ExploitMint { .. } => "exploitMint",
            ContractCall::ExploitDrain { .. } => "exploitDrain",
            ContractCall::SimulateDump { .. } => "simulateDump",
            ContractCall::Transfer { .. } => "transfer",
        }
    }

    /// `None` means the gas limit is estimated, i.e. the call is dry-run against pending state
    /// before broadcast and a revert surfaces as `LedgerError::Rejected`.
    pub fn gas_limit(&self) -> Option<u64> {
        match self {
            ContractCall::PauseByWatchtower { .. }
            | ContractCall::ResumeService
            | ContractCall::BlacklistAccount { .. }
            | ContractCall::UnblacklistAccount { .. } => Some(CONTROL_CALL_GAS_LIMIT),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewQuery {
    Paused,
    RateLimitRemaining,
    ReserveBalance,
    BalanceOf(Address),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Success,
    Reverted(RevertCategory),
}

impl TxStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, TxStatus::Success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHandle,
    pub block_number: u64,
    pub transaction_index: u64,
    pub status: TxStatus,
    pub gas_used: u64,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    fn contracts(&self) -> &ContractAddresses;

    /// Upper bound on a confirmation wait.
    fn confirmation_timeout(&self) -> Duration;

    fn poll_interval(&self) -> Duration;

    async fn chain_id(&self) -> Result<u64, LedgerError>;

    async fn block_number(&self) -> Result<u64, LedgerError>;

    /// Observed market gas price in wei.
    async fn market_fee(&self) -> Result<u128, LedgerError>;

    /// The token contract's expected pause-authorization nonce for `identity`.
    async fn get_nonce(&self, identity: Address) -> Result<u64, LedgerError>;

    async fn call_view(&self, view: ViewQuery) -> Result<U256, LedgerError>;

    /// Signs and broadcasts `call` from `signer` at gas price `fee`. Returns once the node has
    /// accepted the transaction, not when it is mined.
    async fn broadcast(
        &self,
        call: ContractCall,
        signer: &Identity,
        fee: u128,
    ) -> Result<TxHandle, LedgerError>;

    async fn get_receipt(&self, tx: TxHandle) -> Result<Option<Receipt>, LedgerError>;

    /// Broadcast, then suspend until mined or `confirmation_timeout` elapses.
    async fn submit(
        &self,
        call: ContractCall,
        signer: &Identity,
        fee: u128,
    ) -> Result<Receipt, LedgerError> {
        let method = call.method();
        let tx = self.broadcast(call, signer, fee).await?;
        let receipt = self.await_receipt(tx).await?;
        tracing::debug!(
            "[LEDGER] {} from {} mined: block={} index={} status={:?}",
            method,
            signer.label(),
            receipt.block_number,
            receipt.transaction_index,
            receipt.status
        );
        Ok(receipt)
    }

    /// Polls `get_receipt` until `tx` is mined, bounded by `confirmation_timeout`.
    async fn await_receipt(&self, tx: TxHandle) -> Result<Receipt, LedgerError> {
        let timeout = self.confirmation_timeout();
        let started = tokio::time::Instant::now();
        loop {
            if let Some(receipt) = self.get_receipt(tx).await? {
                return Ok(receipt);
            }
            let waited = started.elapsed();
            if waited >= timeout {
                return Err(LedgerError::Timeout {
                    tx,
                    waited_ms: saturating_millis(waited),
                });
            }
            tokio::time::sleep(self.poll_interval().min(timeout - waited)).await;
        }
    }

    async fn is_paused(&self) -> Result<bool, LedgerError> {
        Ok(!self.call_view(ViewQuery::Paused).await?.is_zero())
    }
}

pub(crate) fn saturating_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Whole-token magnitude to 18-decimal base units, keeping six fractional digits.
pub fn tokens_to_wei(tokens: f64) -> U256 {
    if !tokens.is_finite() || tokens <= 0.0 {
        return U256::ZERO;
    }
    let micro = (tokens * 1_000_000.0).round() as u128;
    U256::from(micro) * U256::from(WEI_PER_TOKEN / 1_000_000)
}

pub fn wei_to_tokens(wei: U256) -> f64 {
    let whole = wei / U256::from(WEI_PER_TOKEN);
    let frac = wei % U256::from(WEI_PER_TOKEN);
    let whole = u128::try_from(whole).unwrap_or(u128::MAX) as f64;
    let frac = u128::try_from(frac).unwrap_or(0) as f64 / WEI_PER_TOKEN as f64;
    whole + frac
}
