//! Monitoring side of the agent: the always-on live feed with its pre-roll
//! buffer, the inference gate, and the capture loop driving both.

pub mod controller;
pub mod feed;
pub mod gate;
pub mod loop_worker;
pub mod preroll;

pub use controller::CaptureController;
pub use loop_worker::{CaptureLoop, LoopPaths, LoopState, PassOutcome};
