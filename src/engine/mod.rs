//! Core engine: outcome draw, bet intake, settlement and the round scheduler.

pub mod intake;
pub mod outcome;
pub mod scheduler;
pub mod settlement;

pub use intake::BetIntake;
pub use scheduler::Scheduler;
pub use settlement::SettlementEngine;
