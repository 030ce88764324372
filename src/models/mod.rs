mod decision;
mod descriptor;
mod frame;
mod segment;

pub use decision::{Decision, ScoredLabel};
pub use descriptor::EventDescriptor;
pub use frame::{Frame, PixelFormat, StreamChunk};
pub use segment::{Segment, SegmentKind};
