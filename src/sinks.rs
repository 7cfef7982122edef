// THEORY:
// Recording and series output are side effects of a run, never part of its
// correctness. The session talks to them through two narrow traits and
// treats every failure as a warning: a run that cannot record video still
// produces occupancy data, and a run that cannot write its series file
// still updates the on-screen totals. Opens happen exactly once on entry
// to RUNNING and closes exactly once on entry to STOPPED.
//
// The shipped implementations cover the common case without external
// processes: accepted frames land as a numbered grayscale PNG sequence, and
// the series lands as CSV with a companion totals file written at
// finalization, since the accumulated totals do not exist until the run
// ends.

use std::fs;
use std::path::{Path, PathBuf};

use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageEncoder};

use crate::core_modules::accumulator::Sample;
use crate::error::SinkError;

/// Receives every accepted frame of a run, for later playback.
pub trait RecordingSink: Send {
    fn open(&mut self, base: &Path, width: u32, height: u32, fps: u32) -> Result<(), SinkError>;
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError>;
    fn close(&mut self);
}

/// Receives the numeric time series of a run.
pub trait SeriesSink: Send {
    fn open(&mut self, base: &Path) -> Result<(), SinkError>;
    fn append(&mut self, sample: &Sample) -> Result<(), SinkError>;
    /// Called once on entry to STOPPED with the final accumulated totals,
    /// in ratio-seconds.
    fn finalize(&mut self, left_total: f64, right_total: f64) -> Result<(), SinkError>;
}

/// Writes accepted frames as `frame_NNNNNN.png` under `<base>_frames/`.
#[derive(Default)]
pub struct PngSequenceRecorder {
    dir: Option<PathBuf>,
    width: u32,
    height: u32,
    frame_index: u64,
}

impl PngSequenceRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordingSink for PngSequenceRecorder {
    fn open(&mut self, base: &Path, width: u32, height: u32, _fps: u32) -> Result<(), SinkError> {
        let mut dir = base.as_os_str().to_owned();
        dir.push("_frames");
        let dir = PathBuf::from(dir);
        fs::create_dir_all(&dir)?;
        self.dir = Some(dir);
        self.width = width;
        self.height = height;
        self.frame_index = 0;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<(), SinkError> {
        let Some(dir) = &self.dir else {
            return Ok(()); // not opened; recording was skipped for this run
        };
        let path = dir.join(format!("frame_{:06}.png", self.frame_index));
        let file = fs::File::create(path)?;
        PngEncoder::new(file).write_image(frame, self.width, self.height, ExtendedColorType::L8)?;
        self.frame_index += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.dir = None;
    }
}

/// Writes the series as `<base>.csv` and, at finalization,
/// `<base>_totals.csv` holding the two accumulated ratio-second values.
#[derive(Default)]
pub struct CsvSeriesSink {
    writer: Option<csv::Writer<fs::File>>,
    totals_path: Option<PathBuf>,
}

impl CsvSeriesSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SeriesSink for CsvSeriesSink {
    fn open(&mut self, base: &Path) -> Result<(), SinkError> {
        let mut series_path = base.as_os_str().to_owned();
        series_path.push(".csv");
        let mut totals_path = base.as_os_str().to_owned();
        totals_path.push("_totals.csv");

        let mut writer = csv::Writer::from_writer(fs::File::create(PathBuf::from(series_path))?);
        writer.write_record(["minutes", "left_occupancy", "right_occupancy"])?;
        self.writer = Some(writer);
        self.totals_path = Some(PathBuf::from(totals_path));
        Ok(())
    }

    fn append(&mut self, sample: &Sample) -> Result<(), SinkError> {
        if let Some(writer) = &mut self.writer {
            writer.write_record([
                sample.minutes.to_string(),
                sample.left.to_string(),
                sample.right.to_string(),
            ])?;
        }
        Ok(())
    }

    fn finalize(&mut self, left_total: f64, right_total: f64) -> Result<(), SinkError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        if let Some(path) = self.totals_path.take() {
            let mut writer = csv::Writer::from_writer(fs::File::create(path)?);
            writer.write_record(["left_total_ratio_seconds", "right_total_ratio_seconds"])?;
            writer.write_record([left_total.to_string(), right_total.to_string()])?;
            writer.flush()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_recorder_writes_numbered_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("run");
        let mut recorder = PngSequenceRecorder::new();
        recorder.open(&base, 8, 8, 15).unwrap();
        recorder.write_frame(&[0u8; 64]).unwrap();
        recorder.write_frame(&[255u8; 64]).unwrap();
        recorder.close();

        let dir = tmp.path().join("run_frames");
        assert!(dir.join("frame_000000.png").exists());
        assert!(dir.join("frame_000001.png").exists());
    }

    #[test]
    fn recorder_ignores_frames_when_unopened() {
        let mut recorder = PngSequenceRecorder::new();
        recorder.write_frame(&[0u8; 64]).unwrap();
    }

    #[test]
    fn csv_sink_writes_series_and_totals() {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().join("run");
        let mut sink = CsvSeriesSink::new();
        sink.open(&base).unwrap();
        sink.append(&Sample {
            minutes: 0.0,
            left: 0.25,
            right: 0.5,
        })
        .unwrap();
        sink.finalize(0.25, 0.5).unwrap();

        let series = fs::read_to_string(tmp.path().join("run.csv")).unwrap();
        assert!(series.starts_with("minutes,left_occupancy,right_occupancy"));
        assert!(series.contains("0,0.25,0.5"));

        let totals = fs::read_to_string(tmp.path().join("run_totals.csv")).unwrap();
        assert!(totals.contains("0.25,0.5"));
    }
}
