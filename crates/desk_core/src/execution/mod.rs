pub mod engine;
pub mod lifecycle;
pub mod oco;
pub mod precision;

pub use engine::{CancelAllReport, EngineLimits, ExecutionEngine};
pub use lifecycle::{StatusTransition, apply_snapshot, lifecycle_out_of_order_total};
pub use oco::{OcoAction, OcoPair, OcoState};
pub use precision::{
    ceil_to_step, check_notional, floor_to_step, is_multiple_of, precision_reject_total,
    price_to_tick, validate_intent,
};
