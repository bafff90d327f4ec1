//! Order execution and strategy scheduling core for the futures trading desk.

pub mod clock;
pub mod desk;
pub mod error;
pub mod events;
pub mod execution;
pub mod gateway;
pub mod strategy;
pub mod types;
pub mod venue;

pub use clock::{Clock, ManualClock, SystemClock};
pub use desk::{StrategySettings, TradingDesk};
pub use error::{
    DeskError, ExchangeError, ExchangeErrorKind, NotFoundError, StrategyFatalError,
    ValidationError,
};
pub use events::{AuditEvent, AuditLog, EventSink, EventType, MemorySink, SinkError};
pub use execution::{CancelAllReport, EngineLimits, ExecutionEngine, OcoPair, OcoState};
pub use gateway::{
    ApiError, ExchangeApi, GatewayAdapter, GatewaySettings, MockExchange, MockOp, RetryPolicy,
    VenueCapabilities,
};
pub use strategy::{
    GridConfig, GridPlan, GridSpacing, LevelState, StrategyHandle, StrategySnapshot,
    StrategyStatus, TwapPlan, TwapSummary,
};
pub use types::{
    AssetBalance, HistoricalOrder, OrderId, OrderIntent, OrderRecord, OrderSnapshot, OrderStatus,
    OrderType, Side, TimeInForce,
};
pub use venue::{SymbolRegistry, SymbolRules};
