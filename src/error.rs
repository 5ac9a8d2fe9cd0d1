use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")] Database(#[from] sea_orm::DbErr),

    #[error("Encryption error: {0}")] Encryption(String),

    #[error("Invalid input: {0}")] InvalidInput(String),

    #[error("Not found: {0}")] NotFound(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Insufficient credit")]
    InsufficientCredit,

    #[error("Invalid epoch: {0}")] InvalidEpoch(String),

    #[error("Amount {amount} is below the minimum of {minimum}")] BelowMinimum {
        amount: String,
        minimum: String,
    },

    #[error("Invalid address")]
    InvalidAddress,

    #[error("Invalid private key")]
    InvalidPrivateKey,

    #[error("Custody error: {0}")] Custody(String),

    #[error("Chain error: {0}")] Chain(String),

    #[error("RPC error: {0}")] Rpc(String),

    #[error("Insufficient native gas on {0}")] InsufficientGas(String),

    #[error("Timed out waiting for receipt of {0}")] ReceiptTimeout(String),

    #[error("Transaction {tx_hash} reverted on chain")] OnChainFailure {
        tx_hash: String,
    },

    #[error("Database transaction rolled back: {0}")] TransactionRollback(String),

    #[error("Serialization error: {0}")] Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")] Config(String),

    #[error("Internal error: {0}")] Internal(String),
}

impl AppError {
    /// Errors that resolve themselves by trying the on-chain leg again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Rpc(_) |
                AppError::Chain(_) |
                AppError::Custody(_) |
                AppError::InsufficientGas(_) |
                AppError::ReceiptTimeout(_) |
                AppError::OnChainFailure { .. }
        )
    }

    /// Validation failures are rejected before any ledger row exists.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidInput(_) |
                AppError::InsufficientBalance |
                AppError::InsufficientCredit |
                AppError::InvalidEpoch(_) |
                AppError::BelowMinimum { .. } |
                AppError::InvalidAddress
        )
    }

    /// Hash of a confirmed on-chain failure, kept for the audit log.
    pub fn failed_hash(&self) -> Option<&str> {
        match self {
            AppError::OnChainFailure { tx_hash } => Some(tx_hash),
            AppError::ReceiptTimeout(hash) => Some(hash),
            _ => None,
        }
    }
}

#[derive(serde::Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(serde::Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl AppError {
    pub fn to_error_response(&self) -> ErrorResponse {
        let (code, field) = match self {
            AppError::Database(_) => ("DATABASE_ERROR", None),
            AppError::Encryption(_) => ("ENCRYPTION_ERROR", None),
            AppError::InvalidInput(_) => ("INVALID_INPUT", None),
            AppError::NotFound(_) => ("NOT_FOUND", None),
            AppError::InsufficientBalance => ("INSUFFICIENT_BALANCE", Some("amount")),
            AppError::InsufficientCredit => ("INSUFFICIENT_CREDIT", Some("amount")),
            AppError::InvalidEpoch(_) => ("INVALID_EPOCH", Some("epoch")),
            AppError::BelowMinimum { .. } => ("BELOW_MINIMUM", Some("amount")),
            AppError::InvalidAddress => ("INVALID_ADDRESS", Some("address")),
            AppError::InvalidPrivateKey => ("INVALID_PRIVATE_KEY", None),
            AppError::Custody(_) => ("CUSTODY_ERROR", None),
            AppError::Chain(_) => ("CHAIN_ERROR", None),
            AppError::Rpc(_) => ("RPC_ERROR", None),
            AppError::InsufficientGas(_) => ("INSUFFICIENT_GAS", None),
            AppError::ReceiptTimeout(_) => ("RECEIPT_TIMEOUT", None),
            AppError::OnChainFailure { .. } => ("ON_CHAIN_FAILURE", None),
            AppError::TransactionRollback(_) => ("TRANSACTION_ROLLBACK", None),
            AppError::Serialization(_) => ("SERIALIZATION_ERROR", None),
            AppError::Config(_) => ("CONFIG_ERROR", None),
            AppError::Internal(_) => ("INTERNAL_ERROR", None),
        };

        ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
                field: field.map(str::to_string),
            },
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::NotFound(_) => axum::http::StatusCode::NOT_FOUND,
            _ if self.is_validation() => axum::http::StatusCode::BAD_REQUEST,
            _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        };

        let response = self.to_error_response();
        (status, axum::Json(response)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
