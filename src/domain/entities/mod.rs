pub mod broadcast;
pub mod broker_account;
pub mod position;
pub mod trading_profile;
pub mod user;
