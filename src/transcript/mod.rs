//! Transcript model: segments, parsing and offset projection.

pub mod offsets;
pub mod parser;
pub mod segment;

pub use offsets::{OffsetTable, SEGMENT_SEPARATOR, project, project_with};
pub use parser::{ParseError, TranscriptParser};
pub use segment::{DEFAULT_SEGMENT_DURATION_SECS, Transcript, TranscriptSegment};
