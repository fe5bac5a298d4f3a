use alloy::primitives::{Address, B256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("submission error: {0}")]
    Submission(#[from] SubmissionError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("arbiter error: {0}")]
    Arbiter(#[from] ArbiterError),
    #[error("report error: {0}")]
    Report(#[from] ReportError),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("state restore failed after {attempts} attempt(s): {reason}")]
    StateRestore { attempts: u32, reason: String },
    #[error("system still paused before iteration start: {0}")]
    StatePrecondition(String),
}

impl HarnessError {
    /// Short machine label used for errored iteration records.
    pub fn kind(&self) -> &'static str {
        match self {
            HarnessError::Submission(SubmissionError::StaleNonce { .. }) => "stale_nonce",
            HarnessError::Submission(SubmissionError::Timeout { .. }) => "submission_timeout",
            HarnessError::Submission(_) => "submission",
            HarnessError::Ledger(LedgerError::Timeout { .. }) => "submission_timeout",
            HarnessError::Ledger(_) => "ledger",
            HarnessError::Config(_) => "config",
            HarnessError::Arbiter(_) => "arbiter",
            HarnessError::Report(_) => "report",
            HarnessError::Signing(_) => "signing",
            HarnessError::StateRestore { .. } => "state_restore",
            HarnessError::StatePrecondition(_) => "state_precondition",
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("transaction rejected before inclusion: {reason}")]
    Rejected { reason: String },
    #[error("confirmation wait for {tx} timed out after {waited_ms}ms")]
    Timeout { tx: B256, waited_ms: u64 },
    #[error("decode failure: {0}")]
    Decode(String),
    #[error("signing failure: {0}")]
    Signing(String),
}

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("authorization nonce {nonce} is stale for watchtower {signer}")]
    StaleNonce {
        signer: Address,
        nonce: u64,
        gas_used: u64,
    },
    #[error("defense confirmation timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },
    #[error("defense transaction reverted: {reason}")]
    Reverted { reason: String, gas_used: u64 },
    #[error(transparent)]
    Ledger(LedgerError),
    #[error("signing failed: {0}")]
    Signing(String),
}

impl SubmissionError {
    /// Gas burned by mined-but-failed defense transactions.
    pub fn gas_used(&self) -> u64 {
        match self {
            SubmissionError::StaleNonce { gas_used, .. }
            | SubmissionError::Reverted { gas_used, .. } => *gas_used,
            _ => 0,
        }
    }
}

impl From<LedgerError> for SubmissionError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Timeout { waited_ms, .. } => SubmissionError::Timeout { waited_ms },
            other => SubmissionError::Ledger(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration: {0}")]
    Missing(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArbiterError {
    #[error("triggered iteration has no defense inclusion")]
    MissingDefense,
    #[error("untriggered iteration carries a defense inclusion")]
    UnexpectedDefense,
    #[error("defense and attack share block {block} and index {index}")]
    DuplicateInclusion { block: u64, index: u64 },
}

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("export io failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("summary serialization failure: {0}")]
    Serialize(#[from] serde_json::Error),
}
