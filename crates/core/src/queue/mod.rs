//! Per-destination FIFO queues of vehicles awaiting their next turn.

mod estimate;
mod scheduler;

pub use estimate::{BoardingEstimator, FixedSlotEstimator};
pub use scheduler::QueueScheduler;
