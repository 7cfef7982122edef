// THEORY:
// This file is the public API of the `worm_vision` engine. The crate
// measures, frame by frame, how much of two fixed circular regions is
// occupied by dark, thread-like organisms, and integrates those occupancy
// ratios over the length of a timed run.
//
// The high-level entry points are `AnalysisSession` (the single-threaded
// core: isolation, occupancy, lifecycle, accumulation) and
// `runtime::spawn_session` (the ordered frame/command channel that wires a
// blocking frame source to the session). The leaf numeric components live
// in `core_modules` and are exported for callers that want to run the
// isolation transform or the occupancy measurement standalone.

pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod sinks;
pub mod source;

pub use core_modules::accumulator::Sample;
pub use core_modules::isolation::{VisionParams, WormIsolator};
pub use core_modules::occupancy::{occupancy, occupancy_pair};
pub use core_modules::region::{Point, RegionPair, Side, DEFAULT_CIRCLE_RADIUS};
pub use core_modules::sampling::SamplingClock;
pub use error::{OccupancyError, SinkError, SourceError, TransitionError};
pub use pipeline::{AnalysisSession, FrameReport, RunState, SessionConfig};
pub use runtime::{spawn_session, RuntimeOptions, SessionHandle, SessionRuntime};
pub use sinks::{CsvSeriesSink, PngSequenceRecorder, RecordingSink, SeriesSink};
pub use source::{FrameSource, SyntheticSource};
