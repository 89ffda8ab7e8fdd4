//! Application Layer - Runtime services built on the domain and ports
//!
//! - `risk_gate`: circuit breaker actor
//! - `settlement`: simulated and live order settlement
//! - `lifecycle`: positions and orders from admission to close
//! - `position_worker`: one exit-evaluation task per open position
//! - `decay_feedback`: wallet outcome statistics service
//! - `pipeline`: per-wallet signal lanes and maintenance
//! - `engine`: wiring and shutdown

pub mod risk_gate;
pub mod settlement;
pub mod lifecycle;
pub mod position_worker;
pub mod decay_feedback;
pub mod pipeline;
pub mod engine;

pub use risk_gate::{RiskGate, RiskGateCommand, RiskGateError, RiskGateHandle, RiskGateTasks};
pub use settlement::{apply_slippage, LiveSettlement, RetryPolicy, Settlement, SimulatedSettlement};
pub use lifecycle::{ExitReport, LifecycleError, LifecycleManager, LifecycleSettings};
pub use position_worker::{PositionWorkers, WorkerCommand, WorkerSettings};
pub use decay_feedback::DecayFeedback;
pub use pipeline::{LaneSettings, PipelineError, SignalPipeline};
pub use engine::{Engine, EngineError, EnginePorts};
