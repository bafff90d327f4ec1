pub mod grid;
pub mod handle;
pub mod twap;

pub use grid::{GridConfig, GridLevel, GridPlan, GridProgress, GridRuntime, GridSpacing, LevelState};
pub use handle::{
    StatusReporter, StrategyHandle, StrategyKind, StrategyProgress, StrategySnapshot, StrategyStatus,
};
pub use twap::{TwapPlan, TwapProgress, TwapSummary};
