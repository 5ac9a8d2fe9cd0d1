pub mod gas_reload_service;
pub mod ledger_service;
pub mod notification_service;
pub mod settlement_adapter;

pub use gas_reload_service::GasReloadService;
pub use ledger_service::LedgerService;
pub use notification_service::{ AdminNotification, DbNotifier, Notifier, UserNotification };
pub use settlement_adapter::SettlementAdapter;
