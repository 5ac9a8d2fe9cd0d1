use ethers::abi::{ encode_packed, Token };
use ethers::core::types::{ Address, H160, U256 };
use ethers::signers::{ LocalWallet, Signer };
use ethers::utils::{ hex, keccak256 };

use crate::crypto::encryption::normalize_private_key;
use crate::error::{ AppError, Result };

/// Address and `0x` private key of a freshly generated custody wallet.
pub struct GeneratedWallet {
    pub address: String,
    pub private_key: String,
}

pub fn generate_wallet() -> GeneratedWallet {
    let wallet = LocalWallet::new(&mut ethers::core::rand::thread_rng());

    GeneratedWallet {
        address: format!("{:?}", wallet.address()),
        private_key: format!("0x{}", hex::encode(wallet.signer().to_bytes())),
    }
}

pub fn signer_from_private_key(private_key: &str) -> Result<LocalWallet> {
    let normalized = normalize_private_key(private_key)?;

    normalized.trim_start_matches("0x").parse().map_err(|_| AppError::InvalidPrivateKey)
}

pub fn address_from_private_key(private_key: &str) -> Result<String> {
    let wallet = signer_from_private_key(private_key)?;
    Ok(format!("{:?}", wallet.address()))
}

pub fn validate_address(address: &str) -> bool {
    address.len() == 42 && address.parse::<H160>().is_ok()
}

/// Digest the pool contract checks before releasing a payout:
/// `keccak256(abi.encodePacked(to, amount, reference))`.
pub fn payout_digest(to: Address, amount: U256, reference: &str) -> Result<[u8; 32]> {
    let packed = encode_packed(
        &[Token::Address(to), Token::Uint(amount), Token::String(reference.to_string())]
    ).map_err(|e| AppError::Chain(format!("Failed to encode payout message: {}", e)))?;

    Ok(keccak256(packed))
}

/// EIP-191 signature over the payout digest, `0x` hex encoded.
pub async fn sign_payout(
    private_key: &str,
    to: Address,
    amount: U256,
    reference: &str
) -> Result<String> {
    let wallet = signer_from_private_key(private_key)?;
    let digest = payout_digest(to, amount, reference)?;

    let signature = wallet
        .sign_message(digest).await
        .map_err(|e| AppError::Chain(format!("Failed to sign payout: {}", e)))?;

    Ok(format!("0x{}", signature))
}
