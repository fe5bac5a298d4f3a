use crate::defense::FeePolicy;
use crate::error::{ConfigError, HarnessError, Result};
use crate::experiment::Participants;
use crate::ledger::rpc::RpcLedgerConfig;
use crate::ledger::sim::SimConfig;
use crate::ledger::{tokens_to_wei, ContractAddresses};
use crate::scenario::{AttackKind, DefenseAction, ScenarioConfig};
use crate::signer::Identity;
use alloy::primitives::Address;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

// Hardhat dev accounts #0, #1 and #19. Public test keys, never funded outside a local node.
pub const DEV_OWNER_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
pub const DEV_WATCHTOWER_KEY: &str = "0x59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
pub const DEV_ATTACKER_KEY: &str = "0xdf57089febbacf7ba0bc227dafbffa9fc08a93fdc68e1e42411a14efcf23656e";

pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
pub const DEFAULT_EXPORT_DIR: &str = "./experiment_results";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerMode {
    /// In-process simulated ledger.
    Offline,
    /// JSON-RPC node with deployed contracts.
    Rpc,
}

#[derive(Clone)]
pub struct IdentityKeys {
    pub watchtower: String,
    pub attacker: String,
    pub owner: String,
    pub lender: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfflineLedgerSettings {
    pub block_time: Duration,
    pub rate_limit_tokens: f64,
    pub reserve_balance_tokens: f64,
    pub market_fee_wei: u128,
}

pub struct Config {
    pub ledger_mode: LedgerMode,
    pub eth_rpc_url: String,
    pub keys: IdentityKeys,
    pub contracts: Option<ContractAddresses>,
    pub scenario: ScenarioConfig,
    pub fee_policy: FeePolicy,
    pub confirmation_timeout: Duration,
    pub export_dir: PathBuf,
    pub offline: OfflineLedgerSettings,
}

fn validate_http_url(name: &str, raw: &str) -> Result<()> {
    let parsed = raw.parse::<reqwest::Url>().map_err(|e| {
        ConfigError::Invalid(format!("{name} must be a valid URL, got `{raw}`: {e}"))
    })?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{name} must use http(s) scheme, got `{other}`"
        ))
        .into()),
    }
}

struct Source<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Source<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parsed<T: FromStr>(&self, key: &str, default: T) -> Result<T>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(raw) => raw.parse::<T>().map_err(|e| {
                HarnessError::from(ConfigError::Invalid(format!(
                    "{key} could not be parsed from `{raw}`: {e}"
                )))
            }),
        }
    }

    fn address(&self, key: &str) -> Result<Option<Address>> {
        self.get(key)
            .map(|raw| {
                Address::from_str(&raw).map_err(|e| {
                    HarnessError::from(ConfigError::Invalid(format!(
                        "{key} must be a 20-byte hex address, got `{raw}`: {e}"
                    )))
                })
            })
            .transpose()
    }

    fn required_address(&self, key: &str) -> Result<Address> {
        self.address(key)?.ok_or_else(|| {
            HarnessError::from(ConfigError::Missing(format!(
                "{key} must be set when LEDGER_MODE=rpc"
            )))
        })
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let src = Source { lookup };

        let ledger_mode = match src.get("LEDGER_MODE").map(|v| v.to_ascii_lowercase()).as_deref() {
            None | Some("offline") | Some("sim") => LedgerMode::Offline,
            Some("rpc") => LedgerMode::Rpc,
            Some(other) => {
                return Err(ConfigError::Invalid(format!(
                    "LEDGER_MODE must be `offline` or `rpc`, got `{other}`"
                ))
                .into())
            }
        };

        let eth_rpc_url = src.get("ETH_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.to_string());
        validate_http_url("ETH_RPC_URL", &eth_rpc_url)?;

        let owner_key = src.get("OWNER_PRIVATE_KEY").unwrap_or_else(|| DEV_OWNER_KEY.to_string());
        let keys = IdentityKeys {
            watchtower: src
                .get("WATCHTOWER_PRIVATE_KEY")
                .unwrap_or_else(|| DEV_WATCHTOWER_KEY.to_string()),
            attacker: src
                .get("ATTACKER_PRIVATE_KEY")
                .unwrap_or_else(|| DEV_ATTACKER_KEY.to_string()),
            lender: src.get("LENDER_PRIVATE_KEY").unwrap_or_else(|| owner_key.clone()),
            owner: owner_key,
        };

        let contracts = match ledger_mode {
            LedgerMode::Rpc => {
                let token = src.required_address("TOKEN_ADDRESS")?;
                Some(ContractAddresses {
                    token,
                    vault: src.required_address("VAULT_ADDRESS")?,
                    dex: src.required_address("DEX_ADDRESS")?,
                    reserve_token: src.address("RESERVE_TOKEN_ADDRESS")?.unwrap_or(token),
                })
            }
            LedgerMode::Offline => None,
        };

        let attack_kind = match src.get("ATTACK_KIND") {
            None => AttackKind::InfiniteMint,
            Some(raw) => AttackKind::parse(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "ATTACK_KIND must be infinite_mint, vault_drain or flash_loan_depeg, got `{raw}`"
                ))
            })?,
        };
        let defense_action = match src.get("DEFENSE_ACTION") {
            None => DefenseAction::Pause,
            Some(raw) => DefenseAction::parse(&raw).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "DEFENSE_ACTION must be pause, wallet_freeze or vault_safe_mode, got `{raw}`"
                ))
            })?,
        };

        let defaults = ScenarioConfig::new(attack_kind);
        let scenario = ScenarioConfig {
            attack_kind,
            detection_threshold: src.parsed("DETECTION_THRESHOLD", defaults.detection_threshold)?,
            magnitude_range: (
                src.parsed("ATTACK_MIN", defaults.magnitude_range.0)?,
                src.parsed("ATTACK_MAX", defaults.magnitude_range.1)?,
            ),
            gas_volatility_pct: src.parsed("GAS_VOLATILITY_PCT", defaults.gas_volatility_pct)?,
            latency_range_ms: (
                src.parsed("LATENCY_MIN_MS", defaults.latency_range_ms.0)?,
                src.parsed("LATENCY_MAX_MS", defaults.latency_range_ms.1)?,
            ),
            defense_action,
            iterations: src.parsed("ITERATIONS", defaults.iterations)?,
            seed: src
                .get("EXPERIMENT_SEED")
                .map(|raw| {
                    raw.parse::<u64>().map_err(|_| {
                        ConfigError::Invalid(format!("EXPERIMENT_SEED must be a u64, got `{raw}`"))
                    })
                })
                .transpose()?,
        };
        scenario.validate()?;

        let fee_policy = FeePolicy::from_multiplier(src.parsed("DEFENSE_FEE_MULTIPLIER", 1.5f64)?)?;
        let confirmation_timeout =
            Duration::from_millis(src.parsed("CONFIRMATION_TIMEOUT_MS", 30_000u64)?);
        if confirmation_timeout.is_zero() {
            return Err(ConfigError::Invalid("CONFIRMATION_TIMEOUT_MS must be positive".to_string()).into());
        }

        let offline = OfflineLedgerSettings {
            block_time: Duration::from_millis(src.parsed("SIM_BLOCK_TIME_MS", 1_000u64)?),
            rate_limit_tokens: src.parsed("SIM_RATE_LIMIT", 100_000f64)?,
            reserve_balance_tokens: src.parsed("SIM_RESERVE_BALANCE", 1_000_000f64)?,
            market_fee_wei: src.parsed("SIM_MARKET_FEE_WEI", 1_000_000_000u128)?,
        };
        if offline.block_time.is_zero() {
            return Err(ConfigError::Invalid("SIM_BLOCK_TIME_MS must be positive".to_string()).into());
        }

        Ok(Self {
            ledger_mode,
            eth_rpc_url,
            keys,
            contracts,
            scenario,
            fee_policy,
            confirmation_timeout,
            export_dir: PathBuf::from(
                src.get("EXPORT_DIR")
                    .unwrap_or_else(|| DEFAULT_EXPORT_DIR.to_string()),
            ),
            offline,
        })
    }

    pub fn participants(&self) -> Result<Participants> {
        Ok(Participants {
            watchtower: Identity::from_private_key("watchtower", &self.keys.watchtower)?,
            attacker: Identity::from_private_key("attacker", &self.keys.attacker)?,
            owner: Identity::from_private_key("owner", &self.keys.owner)?,
            lender: Identity::from_private_key("lender", &self.keys.lender)?,
        })
    }

    pub fn sim_config(&self, participants: &Participants) -> SimConfig {
        let mut cfg = SimConfig::new(participants.watchtower.address(), participants.owner.address());
        cfg.block_time = self.offline.block_time;
        cfg.market_fee = self.offline.market_fee_wei;
        cfg.rate_limit = tokens_to_wei(self.offline.rate_limit_tokens);
        cfg.reserve_balance = tokens_to_wei(self.offline.reserve_balance_tokens);
        cfg.confirmation_timeout = self.confirmation_timeout;
        if participants.lender.address() != participants.owner.address() {
            cfg.initial_balances
                .push((participants.lender.address(), tokens_to_wei(10_000_000.0)));
        }
        cfg
    }

    pub fn rpc_config(&self) -> Result<RpcLedgerConfig> {
        let contracts = self.contracts.ok_or_else(|| {
            ConfigError::Missing("contract addresses are required for the rpc ledger".to_string())
        })?;
        Ok(RpcLedgerConfig {
            rpc_url: self.eth_rpc_url.clone(),
            contracts,
            confirmation_timeout: self.confirmation_timeout,
            poll_interval: Duration::from_millis(200),
        })
    }
}
