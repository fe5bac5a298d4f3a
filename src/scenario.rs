//! Attack scenarios and the randomized per-iteration parameters drawn for them.

use crate::error::ConfigError;
use crate::ledger::{tokens_to_wei, ContractCall};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;

/// Liquidity pool size the flash-loan depeg ratio is measured against. Fixed, not queried.
pub const REFERENCE_POOL_SIZE: f64 = 500_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AttackKind {
    InfiniteMint,
    VaultDrain,
    FlashLoanDepeg,
}

impl AttackKind {
    pub const ALL: [AttackKind; 3] = [
        AttackKind::InfiniteMint,
        AttackKind::VaultDrain,
        AttackKind::FlashLoanDepeg,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttackKind::InfiniteMint => "infinite_mint",
            AttackKind::VaultDrain => "vault_drain",
            AttackKind::FlashLoanDepeg => "flash_loan_depeg",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AttackKind::InfiniteMint => "Infinite Mint",
            AttackKind::VaultDrain => "Vault Drain",
            AttackKind::FlashLoanDepeg => "Flash Loan Depeg",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "infinite_mint" | "mint" => Some(AttackKind::InfiniteMint),
            "vault_drain" | "drain" => Some(AttackKind::VaultDrain),
            "flash_loan_depeg" | "flash_loan" | "depeg" => Some(AttackKind::FlashLoanDepeg),
            _ => None,
        }
    }

    /// Absolute token amount for mints, percent for the ratio-based kinds.
    pub fn default_threshold(self) -> f64 {
        match self {
            AttackKind::InfiniteMint => 50_000.0,
            AttackKind::VaultDrain => 10.0,
            AttackKind::FlashLoanDepeg => 5.0,
        }
    }

    pub fn needs_reserve(self) -> bool {
        matches!(self, AttackKind::VaultDrain)
    }

    pub fn detect(self, magnitude: f64, threshold: f64, ctx: &DetectionContext) -> Detection {
        match self {
            AttackKind::InfiniteMint => Detection::against(magnitude, threshold),
            AttackKind::VaultDrain => {
                if ctx.reserve_balance <= 0.0 {
                    tracing::warn!("[DETECT] vault reserve is empty; drain ratio undefined, not triggering");
                    return Detection {
                        metric: 0.0,
                        triggered: false,
                    };
                }
                Detection::against(magnitude / ctx.reserve_balance * 100.0, threshold)
            }
            AttackKind::FlashLoanDepeg => {
                Detection::against(magnitude / REFERENCE_POOL_SIZE * 100.0, threshold)
            }
        }
    }

    /// The transaction that races the watchtower.
    pub fn attack_call(self, magnitude: f64) -> ContractCall {
        let amount = tokens_to_wei(magnitude);
        match self {
            AttackKind::InfiniteMint => ContractCall::ExploitMint { amount },
            AttackKind::VaultDrain => ContractCall::ExploitDrain { amount },
            AttackKind::FlashLoanDepeg => ContractCall::SimulateDump { amount },
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionContext {
    /// Vault reserve, in whole tokens.
    pub reserve_balance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub metric: f64,
    pub triggered: bool,
}

impl Detection {
    fn against(metric: f64, threshold: f64) -> Self {
        Self {
            metric,
            triggered: metric >= threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DefenseAction {
    Pause,
    WalletFreeze,
    VaultSafeMode,
}

impl DefenseAction {
    pub fn as_str(self) -> &'static str {
        match self {
            DefenseAction::Pause => "pause",
            DefenseAction::WalletFreeze => "wallet_freeze",
            DefenseAction::VaultSafeMode => "vault_safe_mode",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "pause" | "system_pause" => Some(DefenseAction::Pause),
            "wallet_freeze" | "freeze" | "blacklist" => Some(DefenseAction::WalletFreeze),
            "vault_safe_mode" | "safe_mode" => Some(DefenseAction::VaultSafeMode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioConfig {
    pub attack_kind: AttackKind,
    pub detection_threshold: f64,
    pub magnitude_range: (f64, f64),
    pub gas_volatility_pct: f64,
    pub latency_range_ms: (u64, u64),
    pub defense_action: DefenseAction,
    pub iterations: u32,
    pub seed: Option<u64>,
}

impl ScenarioConfig {
    pub fn new(attack_kind: AttackKind) -> Self {
        Self {
            attack_kind,
            detection_threshold: attack_kind.default_threshold(),
            magnitude_range: (40_000.0, 150_000.0),
            gas_volatility_pct: 20.0,
            latency_range_ms: (100, 500),
            defense_action: DefenseAction::Pause,
            iterations: 5,
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let (min, max) = self.magnitude_range;
        if !min.is_finite() || !max.is_finite() || min < 0.0 || min > max {
            return Err(ConfigError::Invalid(format!(
                "attack magnitude range ({min}, {max}) must satisfy 0 <= min <= max"
            )));
        }
        let (lat_min, lat_max) = self.latency_range_ms;
        if lat_min > lat_max {
            return Err(ConfigError::Invalid(format!(
                "latency range ({lat_min}, {lat_max}) must satisfy min <= max"
            )));
        }
        if !(0.0..=100.0).contains(&self.gas_volatility_pct) {
            return Err(ConfigError::Invalid(format!(
                "gas volatility {}% is outside 0..=100",
                self.gas_volatility_pct
            )));
        }
        if self.iterations == 0 {
            return Err(ConfigError::Invalid("iterations must be at least 1".to_string()));
        }
        if !self.detection_threshold.is_finite() || self.detection_threshold <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "detection threshold {} must be positive",
                self.detection_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttackAttempt {
    pub magnitude: f64,
    pub fee_multiplier: f64,
    pub simulated_gas_price: u128,
    pub simulated_latency: Duration,
}

pub struct ScenarioGenerator {
    rng: StdRng,
    magnitude_range: (f64, f64),
    volatility: f64,
    latency_range_ms: (u64, u64),
}

impl ScenarioGenerator {
    pub fn new(config: &ScenarioConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            magnitude_range: config.magnitude_range,
            volatility: config.gas_volatility_pct / 100.0,
            latency_range_ms: config.latency_range_ms,
        }
    }

    /// Draws magnitude, fee multiplier and latency, in that order.
    pub fn next_attempt(&mut self, market_fee: u128) -> AttackAttempt {
        let (min, max) = self.magnitude_range;
        let magnitude = if min < max {
            self.rng.gen_range(min..=max)
        } else {
            min
        };
        let fee_multiplier = if self.volatility > 0.0 {
            self.rng
                .gen_range((1.0 - self.volatility)..=(1.0 + self.volatility))
        } else {
            1.0
        };
        let (lat_min, lat_max) = self.latency_range_ms;
        let latency_ms = self.rng.gen_range(lat_min..=lat_max);

        AttackAttempt {
            magnitude,
            fee_multiplier,
            simulated_gas_price: scale_fee(market_fee, fee_multiplier),
            simulated_latency: Duration::from_millis(latency_ms),
        }
    }
}

/// `fee * multiplier` in basis points, saturating.
pub fn scale_fee(fee: u128, multiplier: f64) -> u128 {
    let bps = (multiplier.max(0.0) * 10_000.0).round() as u128;
    fee.saturating_mul(bps) / 10_000
}
