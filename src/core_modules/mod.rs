// The leaf components of the engine, ordered the way data flows through
// them: a frame is isolated into a mask, the mask is measured against the
// two regions, the sampling clock decides whether the measurement becomes
// data, and the accumulator folds accepted samples into the run's series
// and totals.

pub mod accumulator;
pub mod isolation;
pub mod occupancy;
pub mod region;
pub mod sampling;
