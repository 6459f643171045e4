pub mod broker_registry;
pub mod dhan_client;
pub mod zerodha_client;
