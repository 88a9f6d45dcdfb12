//! Timeline reconstruction from the event stream.

pub mod block;
pub mod reconstructor;

pub use block::{BlockStatus, ResultMatching, TimelineBlock};
pub use reconstructor::{GenerationTimeline, SessionTimeline, Violation};
