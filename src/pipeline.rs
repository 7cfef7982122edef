// THEORY:
// The `pipeline` module is the top-level API of the engine. An
// `AnalysisSession` owns every piece of mutable run state (the lifecycle
// state machine, the regions, the vision parameters, the isolator's
// scratch buffers, the accumulator, and the output sinks) so the whole
// per-frame update is one method call on one object. Callers that need
// concurrency wrap it in the `runtime` actor; the session itself is
// deliberately single-threaded and fully deterministic, which is what makes
// it testable.
//
// The lifecycle is a strict three-state cycle:
//
//     RESET ──start()──▶ RUNNING ──stop()/auto──▶ STOPPED ──reset()──▶ RESET
//
// Side effects are tied to transitions, never to per-frame logic: sinks
// open exactly once on entry to RUNNING and close exactly once on entry to
// STOPPED, including the automatic stops (duration exhausted, source ended).

use std::path::PathBuf;

use chrono::Local;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core_modules::accumulator::{OccupancyAccumulator, Sample};
use crate::core_modules::isolation::{VisionParams, WormIsolator};
use crate::core_modules::occupancy::occupancy_pair;
use crate::core_modules::region::{Point, RegionPair, Side, DEFAULT_CIRCLE_RADIUS};
use crate::core_modules::sampling::SamplingClock;
use crate::error::{OccupancyError, TransitionError};
use crate::sinks::{RecordingSink, SeriesSink};

/// Lifecycle state of an analysis session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    /// Idle, no data. Regions may be placed and parameters tuned.
    #[default]
    Reset,
    /// Frames are sampled and accumulated; sinks are open.
    Running,
    /// Idle with data on display; sinks are closed and finalized.
    Stopped,
}

impl RunState {
    fn name(self) -> &'static str {
        match self {
            RunState::Reset => "RESET",
            RunState::Running => "RUNNING",
            RunState::Stopped => "STOPPED",
        }
    }
}

/// Per-run configuration, supplied by the caller. The engine performs no
/// file or environment configuration loading itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Used in the timestamped base name of every output file.
    pub experiment_name: String,
    /// Data samples per second while RUNNING. Must be positive and finite.
    pub sample_rate_hz: f64,
    /// The run stops automatically once the elapsed minutes exceed this.
    pub duration_minutes: f64,
    /// Frame rate stamped on the recording sink. Decoupled from the data
    /// rate: a 1 Hz run plays back at a watchable speed.
    pub recording_fps: u32,
    /// Live sources are throttled by the sampling clock and recorded;
    /// file-backed sources are sampled at full decode rate.
    pub source_is_live: bool,
    /// Directory output files land in.
    pub output_dir: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            experiment_name: "experiment".to_owned(),
            sample_rate_hz: 1.0,
            duration_minutes: 20.0,
            recording_fps: 15,
            source_is_live: true,
            output_dir: PathBuf::from("."),
        }
    }
}

/// What one ingested frame amounted to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FrameReport {
    /// Not RUNNING; the frame was isolated for preview only.
    Idle,
    /// RUNNING, but the sampling clock rejected the frame.
    Skipped,
    /// The frame became a data sample.
    Sampled(Sample),
    /// The frame became a data sample and crossed the configured duration;
    /// the session is now STOPPED.
    SampledAndStopped(Sample),
}

/// Owns all mutable state of one analysis run. See the module THEORY block.
pub struct AnalysisSession {
    config: SessionConfig,
    state: RunState,
    regions: RegionPair,
    params: VisionParams,
    isolator: WormIsolator,
    clock: SamplingClock,
    accumulator: OccupancyAccumulator,
    recording: Option<Box<dyn RecordingSink>>,
    series: Option<Box<dyn SeriesSink>>,
    /// Opened successfully for the current run; cleared on STOPPED entry.
    recording_active: bool,
    series_active: bool,
}

impl AnalysisSession {
    pub fn new(width: u32, height: u32, config: SessionConfig) -> Self {
        let clock = SamplingClock::new(config.sample_rate_hz);
        Self {
            config,
            state: RunState::Reset,
            regions: RegionPair::new(DEFAULT_CIRCLE_RADIUS),
            params: VisionParams::default(),
            isolator: WormIsolator::new(width, height),
            clock,
            accumulator: OccupancyAccumulator::new(),
            recording: None,
            series: None,
            recording_active: false,
            series_active: false,
        }
    }

    /// Attaches the output sinks. Builder-style, called before the first
    /// start; a session without sinks still measures, it just emits nothing.
    pub fn with_sinks(
        mut self,
        recording: Option<Box<dyn RecordingSink>>,
        series: Option<Box<dyn SeriesSink>>,
    ) -> Self {
        self.recording = recording;
        self.series = series;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn regions(&self) -> &RegionPair {
        &self.regions
    }

    pub fn params(&self) -> &VisionParams {
        &self.params
    }

    pub fn num_points(&self) -> u64 {
        self.accumulator.num_points()
    }

    pub fn left_total(&self) -> f64 {
        self.accumulator.left_total()
    }

    pub fn right_total(&self) -> f64 {
        self.accumulator.right_total()
    }

    pub fn series(&self) -> &[Sample] {
        self.accumulator.series()
    }

    /// The mask of the most recently ingested frame, for preview rendering.
    pub fn last_mask(&self) -> &[u8] {
        self.isolator.last_mask()
    }

    /// Parameter updates take effect on the next frame, so a UI can expose
    /// them as live tuning sliders while the preview runs.
    pub fn set_params(&mut self, params: VisionParams) {
        self.params = params;
    }

    /// Region placement is ignored while RUNNING; the circles are part of
    /// the measurement and may not move mid-run.
    pub fn set_region(&mut self, side: Side, point: Point) {
        if self.state == RunState::Running {
            debug!(?side, "ignoring region placement while running");
            return;
        }
        self.regions.set(side, point);
    }

    pub fn set_pointed(&mut self, point: Option<Point>) {
        if self.state == RunState::Running {
            self.regions.set_pointed(None);
            return;
        }
        self.regions.set_pointed(point);
    }

    /// RESET → RUNNING. Refused unless both regions are placed.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        if self.state != RunState::Reset {
            return Err(TransitionError::IllegalTransition {
                from: self.state.name(),
                attempted: "RUNNING",
            });
        }
        if !self.regions.both_set() {
            return Err(TransitionError::RegionsNotSet);
        }

        let base = self.base_output_path();
        if self.config.source_is_live {
            if let Some(recording) = &mut self.recording {
                match recording.open(
                    &base,
                    self.isolator.width(),
                    self.isolator.height(),
                    self.config.recording_fps,
                ) {
                    Ok(()) => self.recording_active = true,
                    Err(e) => warn!("couldn't start recording, video will NOT be written: {e}"),
                }
            }
        }
        if let Some(series) = &mut self.series {
            match series.open(&base) {
                Ok(()) => self.series_active = true,
                Err(e) => warn!("couldn't open series output, no series will be written: {e}"),
            }
        }

        self.regions.set_pointed(None);
        self.state = RunState::Running;
        info!(
            experiment = %self.config.experiment_name,
            duration_min = self.config.duration_minutes,
            "analysis started"
        );
        Ok(())
    }

    /// RUNNING → STOPPED on explicit user stop.
    pub fn stop(&mut self) -> Result<(), TransitionError> {
        if self.state != RunState::Running {
            return Err(TransitionError::IllegalTransition {
                from: self.state.name(),
                attempted: "STOPPED",
            });
        }
        self.enter_stopped();
        Ok(())
    }

    /// STOPPED → RESET. Clears the count, totals and series; the sampling
    /// grid is re-armed. Rewinding a file-backed source is the acquisition
    /// side's job, triggered by observing this state change.
    pub fn reset(&mut self) -> Result<(), TransitionError> {
        if self.state != RunState::Stopped {
            return Err(TransitionError::IllegalTransition {
                from: self.state.name(),
                attempted: "RESET",
            });
        }
        self.accumulator.clear();
        self.clock.reset();
        self.state = RunState::Reset;
        info!("analysis data reset");
        Ok(())
    }

    /// The source signaled end-of-stream. Forces STOPPED if a run was
    /// active; returns whether a stop happened.
    pub fn end_of_stream(&mut self) -> bool {
        if self.state == RunState::Running {
            info!("source ended while running, stopping analysis");
            self.enter_stopped();
            true
        } else {
            false
        }
    }

    /// The per-frame update. Always isolates (the preview shows the mask
    /// even while idle); while RUNNING, frames the sampling clock accepts
    /// become samples: occupancy is measured, the series appended, the
    /// totals integrated, the sinks notified, and the duration cutoff
    /// checked, all before the next frame is considered.
    pub fn ingest_frame(
        &mut self,
        frame: &[u8],
        timestamp_us: u64,
    ) -> Result<FrameReport, OccupancyError> {
        let width = self.isolator.width();
        let height = self.isolator.height();

        // Live sources deliver frames faster than the data rate; the clock
        // gates which of them count. File-backed sources are never faster,
        // so every frame counts while running.
        let sampled = self.state == RunState::Running
            && (!self.config.source_is_live || self.clock.accept(timestamp_us));

        let mask = self.isolator.isolate(frame, &self.params);
        if !sampled {
            return Ok(if self.state == RunState::Running {
                FrameReport::Skipped
            } else {
                FrameReport::Idle
            });
        }

        let (left, right) = occupancy_pair(mask, width, height, &self.regions)?;

        if self.recording_active {
            if let Some(recording) = &mut self.recording {
                if let Err(e) = recording.write_frame(frame) {
                    warn!("recording write failed, disabling recording for this run: {e}");
                    self.recording_active = false;
                }
            }
        }

        let sample = self.accumulator.record(left, right, self.config.sample_rate_hz);
        debug!(
            minutes = sample.minutes,
            left = sample.left,
            right = sample.right,
            "sample recorded"
        );

        if self.series_active {
            if let Some(series) = &mut self.series {
                if let Err(e) = series.append(&sample) {
                    warn!("series append failed, disabling series output for this run: {e}");
                    self.series_active = false;
                }
            }
        }

        // The crossing sample is recorded first, then the run stops.
        if sample.minutes > self.config.duration_minutes {
            info!(minutes = sample.minutes, "configured duration exhausted");
            self.enter_stopped();
            return Ok(FrameReport::SampledAndStopped(sample));
        }
        Ok(FrameReport::Sampled(sample))
    }

    /// Closes sinks if a run is still active. Called by the runtime on
    /// teardown so no open sink handle outlives the session.
    pub fn shutdown(&mut self) {
        if self.state == RunState::Running {
            self.enter_stopped();
        }
    }

    fn enter_stopped(&mut self) {
        if self.recording_active {
            if let Some(recording) = &mut self.recording {
                recording.close();
            }
            self.recording_active = false;
        }
        if self.series_active {
            if let Some(series) = &mut self.series {
                if let Err(e) =
                    series.finalize(self.accumulator.left_total(), self.accumulator.right_total())
                {
                    warn!("series finalization failed: {e}");
                }
            }
            self.series_active = false;
        }
        self.state = RunState::Stopped;
        info!(
            points = self.accumulator.num_points(),
            left_total = self.accumulator.left_total(),
            right_total = self.accumulator.right_total(),
            "analysis stopped"
        );
    }

    fn base_output_path(&self) -> PathBuf {
        let stamp = Local::now().format("%Y-%m-%d_%H-%M-%S");
        self.config
            .output_dir
            .join(format!("{stamp}_{}", self.config.experiment_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SinkCounters {
        opens: Arc<AtomicUsize>,
        closes: Arc<AtomicUsize>,
        frames: Arc<AtomicUsize>,
        appends: Arc<AtomicUsize>,
        finalizes: Arc<AtomicUsize>,
    }

    struct FakeRecorder(SinkCounters);

    impl RecordingSink for FakeRecorder {
        fn open(&mut self, _: &Path, _: u32, _: u32, _: u32) -> Result<(), SinkError> {
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn write_frame(&mut self, _: &[u8]) -> Result<(), SinkError> {
            self.0.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&mut self) {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeSeries(SinkCounters);

    impl SeriesSink for FakeSeries {
        fn open(&mut self, _: &Path) -> Result<(), SinkError> {
            self.0.opens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn append(&mut self, _: &Sample) -> Result<(), SinkError> {
            self.0.appends.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn finalize(&mut self, _: f64, _: f64) -> Result<(), SinkError> {
            self.0.finalizes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn file_config() -> SessionConfig {
        SessionConfig {
            source_is_live: false,
            output_dir: std::env::temp_dir(),
            ..SessionConfig::default()
        }
    }

    fn session_with_regions(config: SessionConfig) -> AnalysisSession {
        let mut session = AnalysisSession::new(100, 100, config);
        session.set_region(Side::Left, Point::new(30, 50));
        session.set_region(Side::Right, Point::new(70, 50));
        session
    }

    fn dark_frame() -> Vec<u8> {
        vec![0u8; 100 * 100]
    }

    #[test]
    fn start_is_refused_without_both_regions() {
        let mut session = AnalysisSession::new(100, 100, file_config());
        assert_eq!(session.start().unwrap_err(), TransitionError::RegionsNotSet);
        assert_eq!(session.state(), RunState::Reset);

        session.set_region(Side::Left, Point::new(30, 50));
        assert_eq!(session.start().unwrap_err(), TransitionError::RegionsNotSet);
        assert_eq!(session.state(), RunState::Reset);
    }

    #[test]
    fn frames_while_idle_produce_no_data() {
        let mut session = session_with_regions(file_config());
        let report = session.ingest_frame(&dark_frame(), 0).unwrap();
        assert_eq!(report, FrameReport::Idle);
        assert_eq!(session.num_points(), 0);
    }

    #[test]
    fn file_backed_run_samples_every_frame() {
        let mut session = session_with_regions(file_config());
        session.start().unwrap();
        for i in 0..3 {
            let report = session.ingest_frame(&dark_frame(), i * 1000).unwrap();
            assert!(matches!(report, FrameReport::Sampled(_)));
        }
        assert_eq!(session.num_points(), 3);
    }

    #[test]
    fn live_run_is_gated_by_the_sampling_clock() {
        let config = SessionConfig {
            source_is_live: true,
            ..file_config()
        };
        let mut session = session_with_regions(config);
        session.start().unwrap();

        assert!(matches!(
            session.ingest_frame(&dark_frame(), 0).unwrap(),
            FrameReport::Sampled(_)
        ));
        assert_eq!(
            session.ingest_frame(&dark_frame(), 300_000).unwrap(),
            FrameReport::Skipped
        );
        assert!(matches!(
            session.ingest_frame(&dark_frame(), 1_100_000).unwrap(),
            FrameReport::Sampled(_)
        ));
        assert_eq!(session.num_points(), 2);
    }

    #[test]
    fn duration_crossing_sample_is_recorded_then_stopped() {
        let config = SessionConfig {
            duration_minutes: 0.0,
            ..file_config()
        };
        let mut session = session_with_regions(config);
        session.start().unwrap();

        // Sample at minute 0.0 is not strictly greater than the duration.
        assert!(matches!(
            session.ingest_frame(&dark_frame(), 0).unwrap(),
            FrameReport::Sampled(_)
        ));
        // The next one crosses and must still be recorded.
        assert!(matches!(
            session.ingest_frame(&dark_frame(), 1_000_000).unwrap(),
            FrameReport::SampledAndStopped(_)
        ));
        assert_eq!(session.state(), RunState::Stopped);
        assert_eq!(session.num_points(), 2);
    }

    #[test]
    fn reset_clears_count_totals_and_series() {
        let mut session = session_with_regions(file_config());
        session.start().unwrap();
        session.ingest_frame(&dark_frame(), 0).unwrap();
        session.stop().unwrap();
        session.reset().unwrap();

        assert_eq!(session.state(), RunState::Reset);
        assert_eq!(session.num_points(), 0);
        assert_eq!(session.left_total(), 0.0);
        assert_eq!(session.right_total(), 0.0);
        assert!(session.series().is_empty());
    }

    #[test]
    fn only_the_three_cyclic_transitions_exist() {
        let mut session = session_with_regions(file_config());
        assert!(session.stop().is_err());
        assert!(session.reset().is_err());

        session.start().unwrap();
        assert!(session.start().is_err());
        assert!(session.reset().is_err());

        session.stop().unwrap();
        assert!(session.stop().is_err());
        assert!(session.start().is_err());
    }

    #[test]
    fn end_of_stream_forces_stopped_only_while_running() {
        let mut session = session_with_regions(file_config());
        assert!(!session.end_of_stream());
        assert_eq!(session.state(), RunState::Reset);

        session.start().unwrap();
        assert!(session.end_of_stream());
        assert_eq!(session.state(), RunState::Stopped);
    }

    #[test]
    fn sinks_open_and_close_exactly_once_per_cycle() {
        let counters = SinkCounters::default();
        let config = SessionConfig {
            source_is_live: true,
            ..file_config()
        };
        let mut session = session_with_regions(config).with_sinks(
            Some(Box::new(FakeRecorder(counters.clone()))),
            Some(Box::new(FakeSeries(counters.clone()))),
        );

        for cycle in 1..=2 {
            session.start().unwrap();
            session.ingest_frame(&dark_frame(), cycle * 10_000_000).unwrap();
            session.stop().unwrap();
            session.reset().unwrap();

            // One recording open + one series open per cycle.
            assert_eq!(counters.opens.load(Ordering::SeqCst), 2 * cycle as usize);
            assert_eq!(counters.closes.load(Ordering::SeqCst), cycle as usize);
            assert_eq!(counters.finalizes.load(Ordering::SeqCst), cycle as usize);
        }
        assert_eq!(counters.frames.load(Ordering::SeqCst), 2);
        assert_eq!(counters.appends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn recording_is_skipped_for_file_backed_sources() {
        let counters = SinkCounters::default();
        let mut session = session_with_regions(file_config())
            .with_sinks(Some(Box::new(FakeRecorder(counters.clone()))), None);
        session.start().unwrap();
        session.ingest_frame(&dark_frame(), 0).unwrap();
        session.stop().unwrap();

        assert_eq!(counters.opens.load(Ordering::SeqCst), 0);
        assert_eq!(counters.frames.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn isolation_to_occupancy_end_to_end() {
        use crate::core_modules::occupancy::occupancy;

        // An all-zero frame has no isolatable structure: occupancy 0.0.
        let mut isolator = WormIsolator::new(100, 100);
        let mask = isolator.isolate(&vec![0u8; 100 * 100], &VisionParams::default());
        assert_eq!(occupancy(mask, 100, 100, Point::new(50, 50), 10).unwrap(), 0.0);

        // A dark disc swallowing the whole region isolates to solid
        // foreground there: occupancy 1.0. Parameters chosen so the
        // threshold window always sees background.
        let mut frame = vec![200u8; 100 * 100];
        for y in 0..100i32 {
            for x in 0..100i32 {
                let (dx, dy) = (x - 50, y - 50);
                if dx * dx + dy * dy <= 30 * 30 {
                    frame[(y * 100 + x) as usize] = 0;
                }
            }
        }
        let params = VisionParams {
            presmoothing_w: 1,
            detrend_w: 101,
            adaptive_threshold_kernel: 81,
            morphologic_depth: 0,
            ..VisionParams::default()
        };
        let mask = isolator.isolate(&frame, &params);
        assert_eq!(occupancy(mask, 100, 100, Point::new(50, 50), 10).unwrap(), 1.0);
    }

    #[test]
    fn region_placement_is_ignored_while_running() {
        let mut session = session_with_regions(file_config());
        session.start().unwrap();
        session.set_region(Side::Left, Point::new(1, 1));
        assert_eq!(session.regions().left, Some(Point::new(30, 50)));

        session.set_pointed(Some(Point::new(5, 5)));
        assert!(session.regions().pointed.is_none());
    }
}
