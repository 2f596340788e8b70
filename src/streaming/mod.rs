//! Per-frame streaming: allocation, compaction, and recycling
//!
//! The streaming controller turns each depth frame into block allocations
//! and a dense visible list; the recycler bounds memory by decaying and
//! reclaiming blocks that stop earning their keep.

/// Decay and reclamation of dead blocks
pub mod recycler;
/// Candidate allocation and visible-list compaction
pub mod streamer;

pub use recycler::{RecycleStats, Recycler};
pub use streamer::{blocks_on_segment, MappingStats, StreamingController};
