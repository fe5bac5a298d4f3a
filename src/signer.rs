//! Emergency-pause authorizations.
//!
//! The token contract accepts `pauseByWatchtower(signature)` from any sender as long as the
//! signature recovers to the registered watchtower over
//! `keccak256(abi.encodePacked("EMERGENCY_PAUSE", chainId, address(this), nonces[watchtower]))`
//! wrapped in the EIP-191 personal-message prefix. The per-watchtower nonce advances on every
//! accepted pause, which is what makes a used signature worthless afterwards.

use crate::error::{ConfigError, HarnessError, Result};
use alloy::network::EthereumWallet;
use alloy::primitives::{eip191_hash_message, keccak256, Address, Bytes, PrimitiveSignature, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use std::fmt;
use std::str::FromStr;

pub const PURPOSE_TAG: &str = "EMERGENCY_PAUSE";

/// A named key holder. Every signer/submitter call takes one explicitly.
#[derive(Clone)]
pub struct Identity {
    label: String,
    signer: PrivateKeySigner,
}

impl Identity {
    pub fn new(label: impl Into<String>, signer: PrivateKeySigner) -> Self {
        Self {
            label: label.into(),
            signer,
        }
    }

    pub fn from_private_key(label: impl Into<String>, raw: &str) -> Result<Self> {
        let label = label.into();
        let clean = raw.trim().trim_start_matches("0x");
        let signer = PrivateKeySigner::from_str(clean).map_err(|err| {
            ConfigError::Invalid(format!("private key for `{label}` is not a valid secp256k1 key: {err}"))
        })?;
        Ok(Self { label, signer })
    }

    pub fn random(label: impl Into<String>) -> Self {
        Self::new(label, PrivateKeySigner::random())
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }

    pub fn wallet(&self) -> EthereumWallet {
        EthereumWallet::from(self.signer.clone())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("label", &self.label)
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Authorization {
    pub chain_id: u64,
    pub contract: Address,
    pub nonce: u64,
}

impl Authorization {
    pub fn new(chain_id: u64, contract: Address, nonce: u64) -> Self {
        Self {
            chain_id,
            contract,
            nonce,
        }
    }

    pub fn purpose_tag(&self) -> &'static str {
        PURPOSE_TAG
    }

    /// `abi.encodePacked(string, uint256, address, uint256)`.
    pub fn packed_encoding(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PURPOSE_TAG.len() + 32 + 20 + 32);
        buf.extend_from_slice(PURPOSE_TAG.as_bytes());
        buf.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        buf.extend_from_slice(self.contract.as_slice());
        buf.extend_from_slice(&U256::from(self.nonce).to_be_bytes::<32>());
        buf
    }

    pub fn digest(&self) -> B256 {
        keccak256(self.packed_encoding())
    }

    /// The hash actually signed: `keccak256("\x19Ethereum Signed Message:\n32" ++ digest)`.
    pub fn personal_digest(&self) -> B256 {
        eip191_hash_message(self.digest())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedAuthorization {
    authorization: Authorization,
    signature: Bytes,
}

impl SignedAuthorization {
    pub fn authorization(&self) -> &Authorization {
        &self.authorization
    }

    pub fn nonce(&self) -> u64 {
        self.authorization.nonce
    }

    /// 65-byte `r || s || v` signature as submitted on-chain.
    pub fn signature(&self) -> &Bytes {
        &self.signature
    }

    pub fn recover_signer(&self) -> Result<Address> {
        recover_pause_signer(&self.authorization, &self.signature)
            .ok_or_else(|| HarnessError::Signing("signature does not recover to an address".to_string()))
    }

    /// Would the contract accept this signature when it expects `expected_nonce`?
    pub fn verify_for(&self, expected_nonce: u64, watchtower: Address) -> bool {
        accepts_pause(
            self.authorization.chain_id,
            self.authorization.contract,
            expected_nonce,
            watchtower,
            &self.signature,
        )
    }
}

/// Recovers the address that signed `signature` for `authorization`, mirroring the contract
/// check. `None` when the bytes are not a well-formed signature.
pub fn recover_pause_signer(authorization: &Authorization, signature: &[u8]) -> Option<Address> {
    let parsed = PrimitiveSignature::try_from(signature).ok()?;
    parsed.recover_address_from_msg(authorization.digest()).ok()
}

/// Contract-side acceptance rule: the signature must recover to `watchtower` for the nonce the
/// contract currently expects.
pub fn accepts_pause(
    chain_id: u64,
    contract: Address,
    expected_nonce: u64,
    watchtower: Address,
    signature: &[u8],
) -> bool {
    let authorization = Authorization::new(chain_id, contract, expected_nonce);
    recover_pause_signer(&authorization, signature) == Some(watchtower)
}

pub fn sign_pause(
    chain_id: u64,
    contract_address: Address,
    nonce: u64,
    identity: &Identity,
) -> Result<SignedAuthorization> {
    let authorization = Authorization::new(chain_id, contract_address, nonce);
    let digest = authorization.digest();
    let signature = identity
        .signer()
        .sign_message_sync(digest.as_slice())
        .map_err(|err| HarnessError::Signing(format!("{} could not sign pause: {err}", identity.label())))?;
    Ok(SignedAuthorization {
        authorization,
        signature: Bytes::from(signature.as_bytes().to_vec()),
    })
}
