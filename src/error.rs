// THEORY:
// Every failure the engine can produce falls into one of a few well-separated
// buckets, and almost none of them are fatal. Occupancy errors mark a single
// measurement as unusable, sink errors downgrade a run to "no recording" or
// "no series file", and source errors end the acquisition loop. Only the
// demo binary treats anything (a source that cannot be opened) as fatal.

use thiserror::Error;

/// A single occupancy measurement could not be produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OccupancyError {
    /// The region center was never set; the measurement is meaningless.
    #[error("occupancy requested against an unset region")]
    RegionUnset,
    /// The region footprint contains zero in-bounds pixels, so the
    /// occupied/in-region ratio is undefined.
    #[error("region has no in-bounds pixels (center ({x}, {y}), radius {radius})")]
    DegenerateRegion { x: i32, y: i32, radius: i32 },
}

/// A lifecycle transition was requested that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// `start()` requires both region centers to be set first.
    #[error("cannot start analysis: both regions must be set")]
    RegionsNotSet,
    /// The requested transition does not exist from the current state.
    #[error("illegal transition: {attempted} is not allowed from {from}")]
    IllegalTransition {
        from: &'static str,
        attempted: &'static str,
    },
}

/// A recording or series sink misbehaved. Never fatal to the run.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failure: {0}")]
    Image(#[from] image::ImageError),
    #[error("series encoding failure: {0}")]
    Csv(#[from] csv::Error),
}

/// The frame source failed in a way that is not a plain end-of-stream.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("frame source I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame source produced a frame of {got} bytes, expected {expected}")]
    BadFrameSize { got: usize, expected: usize },
}
