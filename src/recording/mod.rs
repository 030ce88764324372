pub mod recorder;

pub use recorder::{AssemblyState, EventRecorder, RecordedEvent, TriggeredEvent};
