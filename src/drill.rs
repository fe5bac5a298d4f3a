//! Signature drill: pause with a fresh authorization, resume, then replay the same signature.
//!
//! A third party (the owner here) submits the watchtower's signature, since the contract only
//! cares who signed. The replay must be refused because the accepted pause advanced the nonce.

use crate::defense::{submit_defense, FeePolicy};
use crate::error::{HarnessError, LedgerError, Result, SubmissionError};
use crate::ledger::{ContractCall, LedgerGateway};
use crate::signer::{sign_pause, Identity};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DrillReport {
    pub nonce_before: u64,
    pub nonce_after: u64,
    pub pause_block: u64,
    pub paused_after_pause: bool,
    pub paused_after_resume: bool,
    pub replay_rejected: bool,
}

impl DrillReport {
    pub fn passed(&self) -> bool {
        self.paused_after_pause
            && !self.paused_after_resume
            && self.replay_rejected
            && self.nonce_after == self.nonce_before + 1
    }
}

pub async fn run_pause_drill(
    ledger: &dyn LedgerGateway,
    watchtower: &Identity,
    submitter: &Identity,
    owner: &Identity,
    fee_policy: FeePolicy,
) -> Result<DrillReport> {
    if ledger.is_paused().await? {
        return Err(HarnessError::StatePrecondition(
            "contract is paused before the drill".to_string(),
        ));
    }
    let chain_id = ledger.chain_id().await?;
    let token = ledger.contracts().token;
    let nonce_before = ledger.get_nonce(watchtower.address()).await?;
    let signed = sign_pause(chain_id, token, nonce_before, watchtower)?;
    tracing::info!(
        "[DRILL] signed pause for nonce {} (signer {:#x})",
        nonce_before,
        signed.recover_signer()?
    );

    let (receipt, latency) = submit_defense(ledger, &signed, submitter, fee_policy).await?;
    let paused_after_pause = ledger.is_paused().await?;
    tracing::info!(
        "[DRILL] pause mined in block {} after {}ms; paused={}",
        receipt.block_number,
        latency.as_millis(),
        paused_after_pause
    );

    let fee = fee_policy.bid(ledger.market_fee().await?);
    let resumed = ledger.submit(ContractCall::ResumeService, owner, fee).await?;
    if !resumed.status.is_success() {
        return Err(LedgerError::Rejected {
            reason: format!("resumeService reverted: {:?}", resumed.status),
        }
        .into());
    }
    let paused_after_resume = ledger.is_paused().await?;

    let replay_rejected = match submit_defense(ledger, &signed, submitter, fee_policy).await {
        Err(SubmissionError::StaleNonce { .. }) => true,
        Ok(_) => false,
        Err(err) => return Err(err.into()),
    };
    if replay_rejected {
        tracing::info!("[DRILL] replayed signature refused (nonce already consumed)");
    } else {
        tracing::error!("[DRILL] replayed signature was ACCEPTED");
    }

    Ok(DrillReport {
        nonce_before,
        nonce_after: ledger.get_nonce(watchtower.address()).await?,
        pause_block: receipt.block_number,
        paused_after_pause,
        paused_after_resume,
        replay_rejected,
    })
}
