use std::fmt;
use std::str::FromStr;

use serde::{ Deserialize, Serialize };

use crate::error::AppError;

// ─── Direction ──────────────────────────────────────────────────────

/// Which way a ledger movement pushes the balance it touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Credit,
    Debit,
}

// ─── WalletTxType ───────────────────────────────────────────────────

/// Kind of movement recorded on the wallet ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletTxType {
    Deposit,
    Play,
    Claim,
    Redeem,
    Referral,
    InternalTransfer,
    ClaimJackpot,
}

impl WalletTxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletTxType::Deposit => "DEPOSIT",
            WalletTxType::Play => "PLAY",
            WalletTxType::Claim => "CLAIM",
            WalletTxType::Redeem => "REDEEM",
            WalletTxType::Referral => "REFERRAL",
            WalletTxType::InternalTransfer => "INTERNAL_TRANSFER",
            WalletTxType::ClaimJackpot => "CLAIM_JACKPOT",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            WalletTxType::Play | WalletTxType::Redeem | WalletTxType::InternalTransfer => {
                Direction::Debit
            }
            _ => Direction::Credit,
        }
    }

    /// Winnings and commissions can be withdrawn; deposits must be played first.
    pub fn moves_redeemable(&self) -> bool {
        matches!(
            self,
            WalletTxType::Claim |
                WalletTxType::ClaimJackpot |
                WalletTxType::Referral |
                WalletTxType::Redeem
        )
    }

    pub fn all() -> &'static [WalletTxType] {
        &[
            WalletTxType::Deposit,
            WalletTxType::Play,
            WalletTxType::Claim,
            WalletTxType::Redeem,
            WalletTxType::Referral,
            WalletTxType::InternalTransfer,
            WalletTxType::ClaimJackpot,
        ]
    }

    pub fn debits() -> Vec<&'static str> {
        Self::all()
            .iter()
            .filter(|t| t.direction() == Direction::Debit)
            .map(|t| t.as_str())
            .collect()
    }
}

impl fmt::Display for WalletTxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletTxType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Ok(WalletTxType::Deposit),
            "PLAY" => Ok(WalletTxType::Play),
            "CLAIM" => Ok(WalletTxType::Claim),
            "REDEEM" => Ok(WalletTxType::Redeem),
            "REFERRAL" => Ok(WalletTxType::Referral),
            "INTERNAL_TRANSFER" => Ok(WalletTxType::InternalTransfer),
            "CLAIM_JACKPOT" => Ok(WalletTxType::ClaimJackpot),
            _ => Err(AppError::InvalidInput(format!("Invalid wallet tx type: {}", s))),
        }
    }
}

// ─── CreditTxType ───────────────────────────────────────────────────

/// Kind of movement recorded on the promotional credit ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CreditTxType {
    Credit,
    Play,
    Expiry,
}

impl CreditTxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditTxType::Credit => "CREDIT",
            CreditTxType::Play => "PLAY",
            CreditTxType::Expiry => "EXPIRY",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            CreditTxType::Credit => Direction::Credit,
            CreditTxType::Play | CreditTxType::Expiry => Direction::Debit,
        }
    }
}

impl fmt::Display for CreditTxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CreditTxType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREDIT" => Ok(CreditTxType::Credit),
            "PLAY" => Ok(CreditTxType::Play),
            "EXPIRY" => Ok(CreditTxType::Expiry),
            _ => Err(AppError::InvalidInput(format!("Invalid credit tx type: {}", s))),
        }
    }
}

// ─── TxStatus ───────────────────────────────────────────────────────

/// Status shared by every settlement row (wallet, credit, deposit, mint, payout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    Pending,
    Success,
    Failed,
    PendingAdmin,
    PendingDeveloper,
    Expired,
}

impl TxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Success => "success",
            TxStatus::Failed => "failed",
            TxStatus::PendingAdmin => "pending_admin",
            TxStatus::PendingDeveloper => "pending_developer",
            TxStatus::Expired => "expired",
        }
    }

    /// Terminal rows are never touched again (credit issuance may still expire).
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxStatus::Success | TxStatus::Failed | TxStatus::Expired)
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" | "p" => Ok(TxStatus::Pending),
            "success" | "s" => Ok(TxStatus::Success),
            "failed" | "f" => Ok(TxStatus::Failed),
            "pending_admin" => Ok(TxStatus::PendingAdmin),
            "pending_developer" => Ok(TxStatus::PendingDeveloper),
            "expired" => Ok(TxStatus::Expired),
            _ => Err(AppError::InvalidInput(format!("Invalid tx status: {}", s))),
        }
    }
}

// ─── JobStatus ──────────────────────────────────────────────────────

/// Lifecycle of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Waiting => "waiting",
            JobStatus::Active => "active",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "waiting" => Ok(JobStatus::Waiting),
            "active" => Ok(JobStatus::Active),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(AppError::InvalidInput(format!("Invalid job status: {}", s))),
        }
    }
}

// ─── PrizeCategory ──────────────────────────────────────────────────

/// Draw prize tier a number can land in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrizeCategory {
    First,
    Second,
    Third,
    Special,
    Consolation,
}

impl PrizeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrizeCategory::First => "1",
            PrizeCategory::Second => "2",
            PrizeCategory::Third => "3",
            PrizeCategory::Special => "S",
            PrizeCategory::Consolation => "C",
        }
    }
}

impl fmt::Display for PrizeCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PrizeCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "1" => Ok(PrizeCategory::First),
            "2" => Ok(PrizeCategory::Second),
            "3" => Ok(PrizeCategory::Third),
            "S" | "SPECIAL" => Ok(PrizeCategory::Special),
            "C" | "CONSOLATION" => Ok(PrizeCategory::Consolation),
            _ => Err(AppError::InvalidInput(format!("Invalid prize category: {}", s))),
        }
    }
}

// ─── Forecast ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Forecast {
    Big,
    Small,
}

impl Forecast {
    pub fn as_str(&self) -> &'static str {
        match self {
            Forecast::Big => "big",
            Forecast::Small => "small",
        }
    }

    /// Encoding used by the betting contract.
    pub fn contract_code(&self) -> u8 {
        match self {
            Forecast::Big => 1,
            Forecast::Small => 2,
        }
    }
}

impl fmt::Display for Forecast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_tx_type_directions() {
        assert_eq!(WalletTxType::Deposit.direction(), Direction::Credit);
        assert_eq!(WalletTxType::Referral.direction(), Direction::Credit);
        assert_eq!(WalletTxType::Play.direction(), Direction::Debit);
        assert_eq!(WalletTxType::Redeem.direction(), Direction::Debit);
        assert_eq!(WalletTxType::InternalTransfer.direction(), Direction::Debit);

        let debits = WalletTxType::debits();
        assert_eq!(debits, vec!["PLAY", "REDEEM", "INTERNAL_TRANSFER"]);
    }

    #[test]
    fn test_status_round_trip_and_legacy_codes() {
        assert_eq!("success".parse::<TxStatus>().unwrap(), TxStatus::Success);
        assert_eq!("S".parse::<TxStatus>().unwrap(), TxStatus::Success);
        assert_eq!("P".parse::<TxStatus>().unwrap(), TxStatus::Pending);
        assert!(TxStatus::Success.is_terminal());
        assert!(!TxStatus::PendingDeveloper.is_terminal());
        assert!("bogus".parse::<TxStatus>().is_err());
    }

    #[test]
    fn test_prize_category_parsing() {
        assert_eq!("2".parse::<PrizeCategory>().unwrap(), PrizeCategory::Second);
        assert_eq!("s".parse::<PrizeCategory>().unwrap(), PrizeCategory::Special);
        assert!("4".parse::<PrizeCategory>().is_err());
    }
}
