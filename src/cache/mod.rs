pub mod contract_cache;

pub use contract_cache::{ContractCache, ExpiryMapping, StrikeRange};
