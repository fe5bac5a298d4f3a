//! In-process ledger with deterministic block production.
//!
//! Blocks are sealed lazily on the tokio clock: block `k` after genesis closes at
//! `genesis + k * block_time`. A transaction lands in the block under construction when it is
//! broadcast, one block later if its fee is below the market fee. Within a block transactions
//! execute in fee-descending, arrival-ascending order. Under a paused tokio clock every race is
//! reproducible.

use super::{
    classify_revert_reason, tokens_to_wei, ContractAddresses, ContractCall, LedgerGateway,
    Receipt, TxHandle, TxStatus, ViewQuery,
};
use crate::error::LedgerError;
use crate::signer::{accepts_pause, Identity};
use alloy::primitives::{address, keccak256, Address, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

pub const HARDHAT_CHAIN_ID: u64 = 31_337;

const REVERT_GAS: u64 = 23_800;

// Hardhat's first four deployment addresses for the owner account.
const SIM_TOKEN: Address = address!("5FbDB2315678afecb367f032d93F642f64180aa3");
const SIM_VAULT: Address = address!("e7f1725E7734CE288F8367e1Bb143E90bb3F0512");
const SIM_DEX: Address = address!("9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0");
const SIM_RESERVE: Address = address!("Cf7Ed3AccA5a467e9e704C703E8D87F634fB0Fc9");

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub chain_id: u64,
    pub initial_block: u64,
    pub block_time: Duration,
    pub market_fee: u128,
    /// Per-block cap on value moved by mint/drain/dump calls, in base units.
    pub rate_limit: U256,
    pub reserve_balance: U256,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
    /// Dry-run estimated calls at broadcast, the way `eth_estimateGas` does.
    pub preflight: bool,
    pub watchtower: Address,
    pub owner: Address,
    pub contracts: ContractAddresses,
    pub initial_balances: Vec<(Address, U256)>,
}

impl SimConfig {
    pub fn new(watchtower: Address, owner: Address) -> Self {
        Self {
            chain_id: HARDHAT_CHAIN_ID,
            initial_block: 1,
            block_time: Duration::from_millis(1_000),
            market_fee: 1_000_000_000,
            rate_limit: tokens_to_wei(100_000.0),
            reserve_balance: tokens_to_wei(1_000_000.0),
            confirmation_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(50),
            preflight: true,
            watchtower,
            owner,
            contracts: ContractAddresses {
                token: SIM_TOKEN,
                vault: SIM_VAULT,
                dex: SIM_DEX,
                reserve_token: SIM_RESERVE,
            },
            initial_balances: vec![(owner, tokens_to_wei(10_000_000.0))],
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ContractState {
    paused: bool,
    pause_nonces: HashMap<Address, u64>,
    blacklisted: HashSet<Address>,
    balances: HashMap<Address, U256>,
    reserve: U256,
    window_block: u64,
    window_used: U256,
}

impl ContractState {
    fn balance(&self, who: Address) -> U256 {
        self.balances.get(&who).copied().unwrap_or(U256::ZERO)
    }

    fn consume_rate_budget(&mut self, cfg: &SimConfig, block: u64, amount: U256) -> Result<(), String> {
        if self.window_block != block {
            self.window_block = block;
            self.window_used = U256::ZERO;
        }
        let next = self.window_used.saturating_add(amount);
        if next > cfg.rate_limit {
            return Err("Rate limit exceeded".to_string());
        }
        self.window_used = next;
        Ok(())
    }

    fn require_live(&self, from: Address) -> Result<(), String> {
        if self.paused {
            return Err("EnforcedPause()".to_string());
        }
        if self.blacklisted.contains(&from) {
            return Err("Blacklisted".to_string());
        }
        Ok(())
    }

    fn require_owner(cfg: &SimConfig, from: Address) -> Result<(), String> {
        if from != cfg.owner {
            return Err(format!("OwnableUnauthorizedAccount({from})"));
        }
        Ok(())
    }

    fn debit(&mut self, from: Address, amount: U256) -> Result<(), String> {
        let balance = self.balance(from);
        if balance < amount {
            return Err(format!("ERC20InsufficientBalance({from}, {balance}, {amount})"));
        }
        self.balances.insert(from, balance - amount);
        Ok(())
    }

    fn credit(&mut self, to: Address, amount: U256) {
        let balance = self.balance(to);
        self.balances.insert(to, balance.saturating_add(amount));
    }

    /// Executes one call at `block`. On error the state is left untouched, matching EVM revert.
    fn apply(
        &mut self,
        cfg: &SimConfig,
        from: Address,
        call: &ContractCall,
        block: u64,
    ) -> Result<u64, String> {
        let mut next = self.clone();
        let gas = next.apply_inner(cfg, from, call, block)?;
        *self = next;
        Ok(gas)
    }

    fn apply_inner(
        &mut self,
        cfg: &SimConfig,
        from: Address,
        call: &ContractCall,
        block: u64,
    ) -> Result<u64, String> {
        match call {
            ContractCall::PauseByWatchtower { signature } => {
                if self.paused {
                    return Err("EnforcedPause()".to_string());
                }
                let nonce = self.pause_nonces.get(&cfg.watchtower).copied().unwrap_or(0);
                if !accepts_pause(cfg.chain_id, cfg.contracts.token, nonce, cfg.watchtower, signature) {
                    return Err("Invalid signature".to_string());
                }
                self.pause_nonces.insert(cfg.watchtower, nonce + 1);
                self.paused = true;
                Ok(54_210)
            }
            ContractCall::ResumeService => {
                Self::require_owner(cfg, from)?;
                if !self.paused {
                    return Err("ExpectedPause()".to_string());
                }
                self.paused = false;
                Ok(28_760)
            }
            ContractCall::BlacklistAccount { account } => {
                Self::require_owner(cfg, from)?;
                self.blacklisted.insert(*account);
                Ok(46_380)
            }
            ContractCall::UnblacklistAccount { account } => {
                Self::require_owner(cfg, from)?;
                self.blacklisted.remove(account);
                Ok(24_520)
            }
            ContractCall::ExploitMint { amount } => {
                self.require_live(from)?;
                self.consume_rate_budget(cfg, block, *amount)?;
                self.credit(from, *amount);
                Ok(71_940)
            }
            ContractCall::ExploitDrain { amount } => {
                self.require_live(from)?;
                if self.reserve < *amount {
                    return Err("Insufficient reserve".to_string());
                }
                self.consume_rate_budget(cfg, block, *amount)?;
                self.reserve -= *amount;
                self.credit(from, *amount);
                Ok(64_120)
            }
            ContractCall::SimulateDump { amount } => {
                self.require_live(from)?;
                self.consume_rate_budget(cfg, block, *amount)?;
                self.debit(from, *amount)?;
                self.credit(cfg.contracts.dex, *amount);
                Ok(58_330)
            }
            ContractCall::Transfer { to, amount } => {
                self.require_live(from)?;
                self.debit(from, *amount)?;
                self.credit(*to, *amount);
                Ok(51_480)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct PendingTx {
    seq: u64,
    hash: B256,
    from: Address,
    call: ContractCall,
    fee: u128,
    target_block: u64,
}

#[derive(Debug)]
struct SimState {
    contract: ContractState,
    head: u64,
    sealed_since_genesis: u64,
    seq: u64,
    pending: Vec<PendingTx>,
    receipts: HashMap<B256, Receipt>,
}

#[derive(Debug)]
pub struct SimulatedLedger {
    cfg: SimConfig,
    genesis: Instant,
    state: Mutex<SimState>,
}

impl SimulatedLedger {
    pub fn new(cfg: SimConfig) -> Self {
        let mut contract = ContractState {
            reserve: cfg.reserve_balance,
            ..ContractState::default()
        };
        for (holder, amount) in &cfg.initial_balances {
            contract.credit(*holder, *amount);
        }
        let head = cfg.initial_block;
        Self {
            genesis: Instant::now(),
            state: Mutex::new(SimState {
                contract,
                head,
                sealed_since_genesis: 0,
                seq: 0,
                pending: Vec::new(),
                receipts: HashMap::new(),
            }),
            cfg,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.cfg
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seals every block whose close time has passed.
    fn advance(&self, state: &mut SimState) {
        let now = Instant::now();
        loop {
            let elapsed_blocks = u32::try_from(state.sealed_since_genesis + 1).unwrap_or(u32::MAX);
            let Some(offset) = self.cfg.block_time.checked_mul(elapsed_blocks) else {
                break;
            };
            let close_at = self.genesis + offset;
            if close_at > now {
                break;
            }
            self.seal_next(state);
        }
    }

    fn seal_next(&self, state: &mut SimState) {
        let block = state.head + 1;
        let (mut included, waiting): (Vec<_>, Vec<_>) = state
            .pending
            .drain(..)
            .partition(|tx| tx.target_block <= block);
        state.pending = waiting;
        included.sort_by(|a, b| b.fee.cmp(&a.fee).then(a.seq.cmp(&b.seq)));

        for (index, tx) in included.into_iter().enumerate() {
            let (status, gas_used) = match state.contract.apply(&self.cfg, tx.from, &tx.call, block) {
                Ok(gas) => (TxStatus::Success, gas),
                Err(reason) => (TxStatus::Reverted(classify_revert_reason(&reason)), REVERT_GAS),
            };
            tracing::debug!(
                "[SIM] block {} index {}: {} fee={} -> {:?}",
                block,
                index,
                tx.call.method(),
                tx.fee,
                status
            );
            state.receipts.insert(
                tx.hash,
                Receipt {
                    tx_hash: tx.hash,
                    block_number: block,
                    transaction_index: index as u64,
                    status,
                    gas_used,
                },
            );
        }
        state.head = block;
        state.sealed_since_genesis += 1;
    }

    fn tx_hash(seq: u64, from: Address, call: &ContractCall) -> B256 {
        let mut buf = Vec::with_capacity(8 + 20 + 32);
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(from.as_slice());
        buf.extend_from_slice(call.method().as_bytes());
        keccak256(buf)
    }
}

#[async_trait]
impl LedgerGateway for SimulatedLedger {
    fn contracts(&self) -> &ContractAddresses {
        &self.cfg.contracts
    }

    fn confirmation_timeout(&self) -> Duration {
        self.cfg.confirmation_timeout
    }

    fn poll_interval(&self) -> Duration {
        self.cfg.poll_interval
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.cfg.chain_id)
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        self.advance(&mut state);
        Ok(state.head)
    }

    async fn market_fee(&self) -> Result<u128, LedgerError> {
        Ok(self.cfg.market_fee)
    }

    async fn get_nonce(&self, identity: Address) -> Result<u64, LedgerError> {
        let mut state = self.lock();
        self.advance(&mut state);
        Ok(state.contract.pause_nonces.get(&identity).copied().unwrap_or(0))
    }

    async fn call_view(&self, view: ViewQuery) -> Result<U256, LedgerError> {
        let mut state = self.lock();
        self.advance(&mut state);
        let contract = &state.contract;
        let value = match view {
            ViewQuery::Paused => U256::from(contract.paused as u8),
            ViewQuery::RateLimitRemaining => {
                if contract.window_block == state.head {
                    self.cfg.rate_limit.saturating_sub(contract.window_used)
                } else {
                    self.cfg.rate_limit
                }
            }
            ViewQuery::ReserveBalance => contract.reserve,
            ViewQuery::BalanceOf(holder) => contract.balance(holder),
        };
        Ok(value)
    }

    async fn broadcast(
        &self,
        call: ContractCall,
        signer: &Identity,
        fee: u128,
    ) -> Result<TxHandle, LedgerError> {
        let mut state = self.lock();
        self.advance(&mut state);
        let from = signer.address();
        let building = state.head + 1;

        if self.cfg.preflight && call.gas_limit().is_none() {
            let mut dry_run = state.contract.clone();
            if let Err(reason) = dry_run.apply(&self.cfg, from, &call, building) {
                tracing::debug!(
                    "[SIM] {} from {} rejected at estimation: {}",
                    call.method(),
                    signer.label(),
                    reason
                );
                return Err(LedgerError::Rejected {
                    reason: format!("execution reverted: {reason}"),
                });
            }
        }

        let target_block = if fee < self.cfg.market_fee {
            building + 1
        } else {
            building
        };
        state.seq += 1;
        let seq = state.seq;
        let hash = Self::tx_hash(seq, from, &call);
        state.pending.push(PendingTx {
            seq,
            hash,
            from,
            call,
            fee,
            target_block,
        });
        Ok(hash)
    }

    async fn get_receipt(&self, tx: TxHandle) -> Result<Option<Receipt>, LedgerError> {
        let mut state = self.lock();
        self.advance(&mut state);
        Ok(state.receipts.get(&tx).cloned())
    }
}
