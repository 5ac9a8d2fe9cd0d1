pub mod contracts;
pub mod provider;
pub mod wallet;

pub use provider::EvmProvider;
