// THEORY:
// The engine does not know where frames come from. A camera driver, a video
// decoder, or a synthetic generator all hide behind `FrameSource`: fixed
// dimensions, one blocking `read_frame` call into a caller-owned buffer,
// an explicit end-of-stream signal, and a rewind. The one property the rest
// of the engine does care about is liveness: a live source is throttled by
// the sampling clock, while a finite file-backed source is consumed at full
// decode rate and rewound when it runs out.

use crate::error::SourceError;

/// A timestamped grayscale frame producer.
pub trait FrameSource: Send {
    fn width(&self) -> u32;
    fn height(&self) -> u32;

    /// True for camera-like sources that produce frames at their own pace
    /// forever; false for finite, rewindable sources.
    fn is_live(&self) -> bool;

    /// Rewinds a file-backed source to its first frame. A no-op for live
    /// sources.
    fn restart_stream(&mut self);

    /// Blocks until the next frame is available and copies it into `buf`
    /// (which must hold exactly `width * height` bytes). Returns the frame
    /// timestamp in microseconds, or `Ok(None)` at end of stream.
    fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<u64>, SourceError>;
}

/// A deterministic in-memory source: a dark disc drifting across a bright
/// field. Ships for the demo binary and the runtime tests; real deployments
/// plug in a camera or decoder behind the same trait.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    live: bool,
    frame_interval_us: u64,
    /// `None` produces frames forever (live camera); `Some(n)` ends the
    /// stream after n frames (file-backed clip).
    total_frames: Option<u64>,
    next_frame: u64,
}

impl SyntheticSource {
    pub fn live(width: u32, height: u32, fps: f64) -> Self {
        Self {
            width,
            height,
            live: true,
            frame_interval_us: (1e6 / fps) as u64,
            total_frames: None,
            next_frame: 0,
        }
    }

    pub fn file_backed(width: u32, height: u32, fps: f64, total_frames: u64) -> Self {
        Self {
            width,
            height,
            live: false,
            frame_interval_us: (1e6 / fps) as u64,
            total_frames: Some(total_frames),
            next_frame: 0,
        }
    }

    fn render(&self, frame_index: u64, buf: &mut [u8]) {
        let (w, h) = (self.width as i64, self.height as i64);
        // The disc crosses the frame once per 100 frames.
        let cx = (frame_index as i64 * w / 100) % w;
        let cy = h / 2;
        let radius = (w.min(h) / 8).max(3);
        for y in 0..h {
            for x in 0..w {
                let (dx, dy) = (x - cx, y - cy);
                buf[(y * w + x) as usize] = if dx * dx + dy * dy <= radius * radius {
                    10
                } else {
                    200
                };
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn is_live(&self) -> bool {
        self.live
    }

    fn restart_stream(&mut self) {
        self.next_frame = 0;
    }

    fn read_frame(&mut self, buf: &mut [u8]) -> Result<Option<u64>, SourceError> {
        let expected = (self.width * self.height) as usize;
        if buf.len() != expected {
            return Err(SourceError::BadFrameSize {
                got: buf.len(),
                expected,
            });
        }
        if let Some(total) = self.total_frames {
            if self.next_frame >= total {
                return Ok(None);
            }
        }
        let index = self.next_frame;
        self.next_frame += 1;
        self.render(index, buf);
        Ok(Some(index * self.frame_interval_us))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backed_source_ends_and_rewinds() {
        let mut source = SyntheticSource::file_backed(32, 32, 15.0, 2);
        let mut buf = vec![0u8; 32 * 32];
        assert_eq!(source.read_frame(&mut buf).unwrap(), Some(0));
        assert!(source.read_frame(&mut buf).unwrap().is_some());
        assert_eq!(source.read_frame(&mut buf).unwrap(), None);

        source.restart_stream();
        assert_eq!(source.read_frame(&mut buf).unwrap(), Some(0));
    }

    #[test]
    fn live_source_never_ends() {
        let mut source = SyntheticSource::live(16, 16, 15.0);
        let mut buf = vec![0u8; 16 * 16];
        for _ in 0..500 {
            assert!(source.read_frame(&mut buf).unwrap().is_some());
        }
    }

    #[test]
    fn wrong_buffer_size_is_reported() {
        let mut source = SyntheticSource::live(16, 16, 15.0);
        let mut buf = vec![0u8; 10];
        assert!(matches!(
            source.read_frame(&mut buf),
            Err(SourceError::BadFrameSize { .. })
        ));
    }
}
