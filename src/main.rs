// Demo runner for the `worm_vision` engine: drives a short timed run
// against the synthetic frame source, placing the two circles in frame
// thirds the way an operator would, and prints what a GUI would display.
// Real deployments implement `FrameSource` over a camera or decoder and
// supply region centers from their own selection UI.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use worm_vision::{
    spawn_session, AnalysisSession, CsvSeriesSink, PngSequenceRecorder, Point, RunState,
    RuntimeOptions, SessionConfig, Side, SyntheticSource,
};

const FRAME_W: u32 = 480;
const FRAME_H: u32 = 480;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "worm_vision=info".into()),
        )
        .init();

    let output_dir = PathBuf::from(".");
    std::fs::read_dir(&output_dir).context("output directory is not accessible")?;

    // A camera would be fatal to miss; the synthetic source cannot fail to
    // open, but the shape of the program stays the same.
    let source = SyntheticSource::live(FRAME_W, FRAME_H, 15.0);
    info!("frame source open: {FRAME_W}x{FRAME_H} synthetic, live");

    let config = SessionConfig {
        experiment_name: "demo".to_owned(),
        sample_rate_hz: 1.0,
        duration_minutes: 0.05, // three seconds of data
        recording_fps: 15,
        source_is_live: true,
        output_dir,
    };
    let session = AnalysisSession::new(FRAME_W, FRAME_H, config).with_sinks(
        Some(Box::new(PngSequenceRecorder::new())),
        Some(Box::new(CsvSeriesSink::new())),
    );

    let mut runtime = spawn_session(source, session, RuntimeOptions::default());

    runtime
        .handle
        .set_region(Side::Left, Point::new((FRAME_W / 3) as i32, (FRAME_H / 2) as i32))
        .await;
    runtime
        .handle
        .set_region(Side::Right, Point::new((2 * FRAME_W / 3) as i32, (FRAME_H / 2) as i32))
        .await;
    runtime.handle.start().await.context("couldn't start the analysis")?;

    // The wait future borrows the handle, so it lives in its own block and
    // is gone before the runtime is torn down.
    {
        let stopped = runtime.handle.wait_for_state(RunState::Stopped);
        tokio::pin!(stopped);
        loop {
            tokio::select! {
                sample = runtime.samples.recv() => match sample {
                    Some(sample) => info!(
                        minutes = format!("{:.3}", sample.minutes),
                        left = format!("{:.3}", sample.left),
                        right = format!("{:.3}", sample.right),
                        "sample"
                    ),
                    None => break,
                },
                _ = &mut stopped => break,
                _ = tokio::time::sleep(Duration::from_secs(30)) => {
                    anyhow::bail!("run neither sampled nor stopped within 30s");
                }
            }
        }
    }
    while let Ok(sample) = runtime.samples.try_recv() {
        info!(
            minutes = format!("{:.3}", sample.minutes),
            left = format!("{:.3}", sample.left),
            right = format!("{:.3}", sample.right),
            "sample"
        );
    }

    runtime.shutdown().await;
    info!("run complete");
    Ok(())
}
