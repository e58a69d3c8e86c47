pub mod account;
pub mod chain;
pub mod derivation;
pub mod transaction;
