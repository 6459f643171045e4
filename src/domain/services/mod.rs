pub mod broadcast_orchestrator;
pub mod lot_sizer;
pub mod position_ledger;
pub mod token_lifecycle;
