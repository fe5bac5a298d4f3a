use super::{
    classify_revert_reason, ContractAddresses, ContractCall, LedgerGateway, Receipt, TxHandle,
    TxStatus, ViewQuery,
};
use crate::error::LedgerError;
use crate::signer::Identity;
use alloy::eips::eip2718::Encodable2718;
use alloy::eips::BlockId;
use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes as AlloyBytes, U256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::eth::TransactionRequest;
use alloy::sol_types::SolCall;
use alloy::transports::http::Http;
use alloy::transports::{RpcError, TransportErrorKind};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const VIEW_TIMEOUT_MS: u64 = 2_000;
const ESTIMATE_HEADROOM_BPS: u64 = 12_000;

alloy::sol! {
    interface IWatchtowerToken {
        function nonces(address owner) external view returns (uint256 nonce);
        function paused() external view returns (bool isPaused);
        function rateLimitRemaining() external view returns (uint256 remaining);
        function balanceOf(address account) external view returns (uint256 balance);
        function pauseByWatchtower(bytes signature) external;
        function resumeService() external;
        function blacklistAccount(address account) external;
        function unblacklistAccount(address account) external;
        function exploitMint(uint256 amount) external;
        function transfer(address to, uint256 amount) external returns (bool success);
    }

    interface IExploitVault {
        function exploitDrain(uint256 amount) external;
    }

    interface IExploitDex {
        function simulateDump(uint256 amount) external;
    }
}

#[derive(Debug, Clone)]
pub struct RpcLedgerConfig {
    pub rpc_url: String,
    pub contracts: ContractAddresses,
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

/// Gateway over a JSON-RPC node (Hardhat/Anvil). Transactions are signed locally and sent raw.
pub struct RpcLedger {
    provider: RootProvider<Http<Client>>,
    contracts: ContractAddresses,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    chain_id: u64,
    // Sent requests, kept so a reverted receipt can be replayed for its reason.
    sent: Mutex<HashMap<TxHandle, TransactionRequest>>,
}

impl RpcLedger {
    pub async fn connect(cfg: RpcLedgerConfig) -> Result<Self, LedgerError> {
        let url = cfg
            .rpc_url
            .parse::<reqwest::Url>()
            .map_err(|err| LedgerError::Transport(format!("invalid rpc url {}: {err}", cfg.rpc_url)))?;
        let provider = ProviderBuilder::new().on_http(url);
        let chain_id = tokio::time::timeout(
            Duration::from_millis(VIEW_TIMEOUT_MS),
            provider.get_chain_id(),
        )
        .await
        .map_err(|_| LedgerError::Transport(format!("chain id probe timed out at {}", cfg.rpc_url)))?
        .map_err(transport_error)?;
        tracing::info!("[LEDGER] connected to {} (chain_id={})", cfg.rpc_url, chain_id);
        Ok(Self {
            provider,
            contracts: cfg.contracts,
            confirmation_timeout: cfg.confirmation_timeout,
            poll_interval: cfg.poll_interval,
            chain_id,
            sent: Mutex::new(HashMap::new()),
        })
    }

    fn sent(&self) -> MutexGuard<'_, HashMap<TxHandle, TransactionRequest>> {
        self.sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn eth_call(&self, to: Address, input: Vec<u8>) -> Result<AlloyBytes, LedgerError> {
        let request = TransactionRequest::default()
            .with_to(to)
            .with_input(AlloyBytes::from(input));
        tokio::time::timeout(
            Duration::from_millis(VIEW_TIMEOUT_MS),
            self.provider.call(&request),
        )
        .await
        .map_err(|_| LedgerError::Transport(format!("eth_call timed out after {VIEW_TIMEOUT_MS}ms for to={to:#x}")))?
        .map_err(transport_error)
    }

    /// Replays a mined-but-reverted request against its block to recover the revert reason.
    async fn replay_revert_reason(&self, tx: TxHandle, block: u64) -> String {
        let request = self.sent().get(&tx).cloned();
        let Some(mut request) = request else {
            return "reverted (reason unavailable)".to_string();
        };
        request.nonce = None;
        request.gas = None;
        match self
            .provider
            .call(&request)
            .block(BlockId::number(block))
            .await
        {
            Ok(_) => "reverted (replay succeeded)".to_string(),
            Err(err) => match err.as_error_resp() {
                Some(payload) => payload.message.to_string(),
                None => err.to_string(),
            },
        }
    }
}

fn transport_error(err: RpcError<TransportErrorKind>) -> LedgerError {
    LedgerError::Transport(err.to_string())
}

fn encode_call(call: &ContractCall) -> Vec<u8> {
    match call {
        ContractCall::PauseByWatchtower { signature } => IWatchtowerToken::pauseByWatchtowerCall {
            signature: signature.clone(),
        }
        .abi_encode(),
        ContractCall::ResumeService => IWatchtowerToken::resumeServiceCall {}.abi_encode(),
        ContractCall::BlacklistAccount { account } => {
            IWatchtowerToken::blacklistAccountCall { account: *account }.abi_encode()
        }
        ContractCall::UnblacklistAccount { account } => {
            IWatchtowerToken::unblacklistAccountCall { account: *account }.abi_encode()
        }
        ContractCall::ExploitMint { amount } => {
            IWatchtowerToken::exploitMintCall { amount: *amount }.abi_encode()
        }
        ContractCall::ExploitDrain { amount } => {
            IExploitVault::exploitDrainCall { amount: *amount }.abi_encode()
        }
        ContractCall::SimulateDump { amount } => {
            IExploitDex::simulateDumpCall { amount: *amount }.abi_encode()
        }
        ContractCall::Transfer { to, amount } => IWatchtowerToken::transferCall {
            to: *to,
            amount: *amount,
        }
        .abi_encode(),
    }
}

#[async_trait::async_trait]
impl LedgerGateway for RpcLedger {
    fn contracts(&self) -> &ContractAddresses {
        &self.contracts
    }

    fn confirmation_timeout(&self) -> Duration {
        self.confirmation_timeout
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn chain_id(&self) -> Result<u64, LedgerError> {
        Ok(self.chain_id)
    }

    async fn block_number(&self) -> Result<u64, LedgerError> {
        self.provider.get_block_number().await.map_err(transport_error)
    }

    async fn market_fee(&self) -> Result<u128, LedgerError> {
        self.provider.get_gas_price().await.map_err(transport_error)
    }

    async fn get_nonce(&self, identity: Address) -> Result<u64, LedgerError> {
        let raw = self
            .eth_call(
                self.contracts.token,
                IWatchtowerToken::noncesCall { owner: identity }.abi_encode(),
            )
            .await?;
        let decoded = <IWatchtowerToken::noncesCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
            .map_err(|err| LedgerError::Decode(format!("nonces: {err}")))?;
        u64::try_from(decoded.nonce)
            .map_err(|_| LedgerError::Decode(format!("nonce {} exceeds u64", decoded.nonce)))
    }

    async fn call_view(&self, view: ViewQuery) -> Result<U256, LedgerError> {
        match view {
            ViewQuery::Paused => {
                let raw = self
                    .eth_call(self.contracts.token, IWatchtowerToken::pausedCall {}.abi_encode())
                    .await?;
                let decoded =
                    <IWatchtowerToken::pausedCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
                        .map_err(|err| LedgerError::Decode(format!("paused: {err}")))?;
                Ok(U256::from(decoded.isPaused as u8))
            }
            ViewQuery::RateLimitRemaining => {
                let raw = self
                    .eth_call(
                        self.contracts.token,
                        IWatchtowerToken::rateLimitRemainingCall {}.abi_encode(),
                    )
                    .await?;
                let decoded = <IWatchtowerToken::rateLimitRemainingCall as SolCall>::abi_decode_returns(
                    raw.as_ref(),
                    true,
                )
                .map_err(|err| LedgerError::Decode(format!("rateLimitRemaining: {err}")))?;
                Ok(decoded.remaining)
            }
            ViewQuery::ReserveBalance => {
                let raw = self
                    .eth_call(
                        self.contracts.reserve_token,
                        IWatchtowerToken::balanceOfCall {
                            account: self.contracts.vault,
                        }
                        .abi_encode(),
                    )
                    .await?;
                let decoded =
                    <IWatchtowerToken::balanceOfCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
                        .map_err(|err| LedgerError::Decode(format!("vault reserve: {err}")))?;
                Ok(decoded.balance)
            }
            ViewQuery::BalanceOf(account) => {
                let raw = self
                    .eth_call(
                        self.contracts.token,
                        IWatchtowerToken::balanceOfCall { account }.abi_encode(),
                    )
                    .await?;
                let decoded =
                    <IWatchtowerToken::balanceOfCall as SolCall>::abi_decode_returns(raw.as_ref(), true)
                        .map_err(|err| LedgerError::Decode(format!("balanceOf: {err}")))?;
                Ok(decoded.balance)
            }
        }
    }

    async fn broadcast(
        &self,
        call: ContractCall,
        signer: &Identity,
        fee: u128,
    ) -> Result<TxHandle, LedgerError> {
        let from = signer.address();
        let to = self.contracts.get(call.target());
        let mut request = TransactionRequest::default()
            .with_to(to)
            .with_input(AlloyBytes::from(encode_call(&call)))
            .with_chain_id(self.chain_id)
            .with_gas_price(fee);
        request.from = Some(from);

        let gas_limit = match call.gas_limit() {
            Some(limit) => limit,
            None => {
                let estimate = self.provider.estimate_gas(&request).await.map_err(|err| {
                    match err.as_error_resp() {
                        Some(payload) => LedgerError::Rejected {
                            reason: payload.message.to_string(),
                        },
                        None => transport_error(err),
                    }
                })?;
                estimate.saturating_mul(ESTIMATE_HEADROOM_BPS) / 10_000
            }
        };

        let nonce = self
            .provider
            .get_transaction_count(from)
            .pending()
            .await
            .map_err(transport_error)?;
        let request = request.with_nonce(nonce).with_gas_limit(gas_limit);
        let envelope = request
            .clone()
            .build(&signer.wallet())
            .await
            .map_err(|err| LedgerError::Signing(format!("{} {}: {err}", signer.label(), call.method())))?;
        let pending = self
            .provider
            .send_raw_transaction(&envelope.encoded_2718())
            .await
            .map_err(|err| match err.as_error_resp() {
                Some(payload) => LedgerError::Rejected {
                    reason: payload.message.to_string(),
                },
                None => transport_error(err),
            })?;
        let tx = *pending.tx_hash();
        tracing::debug!(
            "[LEDGER] {} from {} sent: tx={} nonce={} fee={}",
            call.method(),
            signer.label(),
            tx,
            nonce,
            fee
        );
        self.sent().insert(tx, request);
        Ok(tx)
    }

    async fn get_receipt(&self, tx: TxHandle) -> Result<Option<Receipt>, LedgerError> {
        let Some(receipt) = self
            .provider
            .get_transaction_receipt(tx)
            .await
            .map_err(transport_error)?
        else {
            return Ok(None);
        };
        let (Some(block_number), Some(transaction_index)) =
            (receipt.block_number, receipt.transaction_index)
        else {
            return Ok(None);
        };
        let status = if receipt.status() {
            TxStatus::Success
        } else {
            let reason = self.replay_revert_reason(tx, block_number).await;
            TxStatus::Reverted(classify_revert_reason(&reason))
        };
        self.sent().remove(&tx);
        Ok(Some(Receipt {
            tx_hash: tx,
            block_number,
            transaction_index,
            status,
            gas_used: receipt.gas_used as u64,
        }))
    }
}
