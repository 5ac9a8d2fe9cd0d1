pub mod user;
pub mod user_wallet;
pub mod wallet_tx;
pub mod credit_wallet_tx;
pub mod deposit_tx;
pub mod game_usd_tx;
pub mod redeem_tx;
pub mod bet_order;
pub mod claim_detail;
pub mod game;
pub mod draw_result;
pub mod notification;
pub mod job;
pub mod custody_key;

pub use user::Entity as User;
pub use user_wallet::Entity as UserWallet;
pub use wallet_tx::Entity as WalletTx;
pub use credit_wallet_tx::Entity as CreditWalletTx;
pub use deposit_tx::Entity as DepositTx;
pub use game_usd_tx::Entity as GameUsdTx;
pub use redeem_tx::Entity as RedeemTx;
pub use bet_order::Entity as BetOrder;
pub use claim_detail::Entity as ClaimDetail;
pub use game::Entity as Game;
pub use draw_result::Entity as DrawResult;
pub use notification::Entity as Notification;
pub use job::Entity as Job;
pub use custody_key::Entity as CustodyKey;
