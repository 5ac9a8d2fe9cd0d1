pub mod config;
pub mod enums;
pub mod error;
pub mod crypto;
pub mod db;
pub mod providers;
pub mod chains;
pub mod rpc;
pub mod queue;
pub mod services;
pub mod pipelines;
pub mod reconciler;
pub mod scheduler;
pub mod api;

pub use config::Config;
pub use enums::{ CreditTxType, TxStatus, WalletTxType };
pub use error::{ AppError, Result };
