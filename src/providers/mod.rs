pub mod chain_provider;
pub mod key_custody;

pub use chain_provider::{ ContractCall, ForecastParam, Receipt, SettlementChain };
pub use key_custody::KeyCustody;

#[cfg(test)]
pub(crate) mod testing;
