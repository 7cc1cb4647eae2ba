pub mod frame;
pub mod pipeline;
pub mod slot;
pub mod state;

pub use frame::TrackingFrame;
pub use pipeline::{TrackingOutcome, TrackingPipeline};
pub use slot::LatestSlot;
pub use state::CycleState;
