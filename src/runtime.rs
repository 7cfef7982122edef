// THEORY:
// Two guarantees hold no matter how acquisition and control interleave:
// state transitions and sample accumulation can never race, and samples
// land in frame order. Both come from message passing rather than locking:
// every frame and every control command travels through one ordered channel
// into a single consumer task that owns the `AnalysisSession` exclusively.
// A stop command enqueued from the control side is therefore observed
// before the very next frame behind it; no frame's accumulation straddles
// a transition.
//
// Acquisition runs on a dedicated blocking thread because `read_frame`
// blocks on capture/decode I/O. Frame buffers are recycled through a small
// pool channel so the steady state allocates nothing.

use std::thread;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{error, info, warn};

use crate::core_modules::accumulator::Sample;
use crate::core_modules::isolation::VisionParams;
use crate::core_modules::region::{Point, Side};
use crate::error::TransitionError;
use crate::pipeline::{AnalysisSession, FrameReport, RunState};
use crate::source::FrameSource;

const FRAME_POOL_SIZE: usize = 8;
const FRAME_CHANNEL_CAPACITY: usize = 4;

/// Tuning for the acquisition loop.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Inserted after every frame of a live source, throttling capture to a
    /// comfortable preview rate.
    pub inter_frame_delay: Duration,
    /// Refresh cap while previewing a file-backed source outside a run.
    pub preview_fps: f64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            inter_frame_delay: Duration::from_micros(1_000_000 / 15),
            preview_fps: 15.0,
        }
    }
}

enum SessionMsg {
    Frame { data: Vec<u8>, timestamp_us: u64 },
    EndOfStream,
    Start(oneshot::Sender<Result<(), TransitionError>>),
    Stop(oneshot::Sender<Result<(), TransitionError>>),
    Reset(oneshot::Sender<Result<(), TransitionError>>),
    SetRegion(Side, Point),
    SetPointed(Option<Point>),
    SetParams(VisionParams),
    Shutdown,
}

/// Control surface of a spawned session. All commands travel down the same
/// ordered channel as the frames.
pub struct SessionHandle {
    tx: mpsc::Sender<SessionMsg>,
    state_rx: watch::Receiver<RunState>,
}

impl SessionHandle {
    pub async fn start(&self) -> Result<(), TransitionError> {
        self.transition(SessionMsg::Start).await
    }

    pub async fn stop(&self) -> Result<(), TransitionError> {
        self.transition(SessionMsg::Stop).await
    }

    pub async fn reset(&self) -> Result<(), TransitionError> {
        self.transition(SessionMsg::Reset).await
    }

    async fn transition(
        &self,
        make: fn(oneshot::Sender<Result<(), TransitionError>>) -> SessionMsg,
    ) -> Result<(), TransitionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(make(reply_tx)).await.is_err() {
            // The consumer is gone; report the transition as illegal from
            // a torn-down session rather than panicking.
            return Err(TransitionError::IllegalTransition {
                from: "SHUTDOWN",
                attempted: "any",
            });
        }
        reply_rx.await.unwrap_or(Err(TransitionError::IllegalTransition {
            from: "SHUTDOWN",
            attempted: "any",
        }))
    }

    pub async fn set_region(&self, side: Side, point: Point) {
        let _ = self.tx.send(SessionMsg::SetRegion(side, point)).await;
    }

    pub async fn set_pointed(&self, point: Option<Point>) {
        let _ = self.tx.send(SessionMsg::SetPointed(point)).await;
    }

    pub async fn set_params(&self, params: VisionParams) {
        let _ = self.tx.send(SessionMsg::SetParams(params)).await;
    }

    /// Current lifecycle state as last published by the consumer.
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Waits until the published state equals `target`.
    pub async fn wait_for_state(&mut self, target: RunState) {
        while *self.state_rx.borrow_and_update() != target {
            if self.state_rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// A spawned acquisition thread + consumer task pair around one session.
pub struct SessionRuntime {
    pub handle: SessionHandle,
    /// Every recorded sample, in frame order.
    pub samples: mpsc::UnboundedReceiver<Sample>,
    consumer: tokio::task::JoinHandle<()>,
    acquisition: thread::JoinHandle<()>,
}

impl SessionRuntime {
    /// Sends the shutdown message and waits for both halves to finish. The
    /// session closes any open sinks on the way out.
    pub async fn shutdown(self) {
        let _ = self.handle.tx.send(SessionMsg::Shutdown).await;
        let _ = self.consumer.await;
        let acquisition = self.acquisition;
        let _ = tokio::task::spawn_blocking(move || acquisition.join()).await;
    }
}

/// Wires a frame source to a session: one blocking acquisition thread, one
/// consumer task, one ordered channel between them. Must be called from
/// within a tokio runtime.
pub fn spawn_session(
    source: impl FrameSource + 'static,
    session: AnalysisSession,
    options: RuntimeOptions,
) -> SessionRuntime {
    let (msg_tx, msg_rx) = mpsc::channel::<SessionMsg>(FRAME_CHANNEL_CAPACITY);
    let (pool_tx, pool_rx) = mpsc::channel::<Vec<u8>>(FRAME_POOL_SIZE);
    let (state_tx, state_rx) = watch::channel(RunState::Reset);
    let (sample_tx, sample_rx) = mpsc::unbounded_channel::<Sample>();

    let frame_tx = msg_tx.clone();
    let acquisition_state = state_rx.clone();
    let acquisition = thread::Builder::new()
        .name("frame-acquisition".to_owned())
        .spawn(move || {
            acquisition_loop(source, frame_tx, pool_rx, acquisition_state, options);
        })
        .expect("failed to spawn acquisition thread");

    let consumer = tokio::spawn(consume_loop(session, msg_rx, pool_tx, state_tx, sample_tx));

    SessionRuntime {
        handle: SessionHandle {
            tx: msg_tx,
            state_rx,
        },
        samples: sample_rx,
        consumer,
        acquisition,
    }
}

fn acquisition_loop(
    mut source: impl FrameSource,
    frame_tx: mpsc::Sender<SessionMsg>,
    mut pool_rx: mpsc::Receiver<Vec<u8>>,
    state_rx: watch::Receiver<RunState>,
    options: RuntimeOptions,
) {
    let frame_len = (source.width() * source.height()) as usize;
    let preview_delay = Duration::from_secs_f64(1.0 / options.preview_fps);

    loop {
        let mut buf = pool_rx.try_recv().unwrap_or_else(|_| vec![0u8; frame_len]);
        match source.read_frame(&mut buf) {
            Ok(Some(timestamp_us)) => {
                if frame_tx
                    .blocking_send(SessionMsg::Frame {
                        data: buf,
                        timestamp_us,
                    })
                    .is_err()
                {
                    return; // consumer gone, we are shutting down
                }
            }
            Ok(None) => {
                if frame_tx.blocking_send(SessionMsg::EndOfStream).is_err() {
                    return;
                }
                if source.is_live() {
                    // A live source that ends is not coming back.
                    return;
                }
                source.restart_stream();
                continue;
            }
            Err(e) => {
                error!("frame source failed: {e}");
                let _ = frame_tx.blocking_send(SessionMsg::EndOfStream);
                return;
            }
        }

        if source.is_live() {
            if !options.inter_frame_delay.is_zero() {
                thread::sleep(options.inter_frame_delay);
            }
        } else if *state_rx.borrow() != RunState::Running {
            // Previewing a file outside a run: rewind after every frame and
            // cap the refresh rate.
            source.restart_stream();
            thread::sleep(preview_delay);
        }
    }
}

async fn consume_loop(
    mut session: AnalysisSession,
    mut rx: mpsc::Receiver<SessionMsg>,
    pool_tx: mpsc::Sender<Vec<u8>>,
    state_tx: watch::Sender<RunState>,
    sample_tx: mpsc::UnboundedSender<Sample>,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            SessionMsg::Frame { data, timestamp_us } => {
                match session.ingest_frame(&data, timestamp_us) {
                    Ok(FrameReport::Sampled(sample)) => {
                        let _ = sample_tx.send(sample);
                    }
                    Ok(FrameReport::SampledAndStopped(sample)) => {
                        let _ = sample_tx.send(sample);
                    }
                    Ok(FrameReport::Idle | FrameReport::Skipped) => {}
                    Err(e) => warn!("frame measurement failed: {e}"),
                }
                // Recycle the buffer; if the pool is full the allocation is
                // simply dropped.
                let _ = pool_tx.try_send(data);
            }
            SessionMsg::EndOfStream => {
                session.end_of_stream();
            }
            // The state watch is published before the acknowledgment, so a
            // caller that awaited a transition always observes its result.
            SessionMsg::Start(reply) => {
                let result = session.start();
                publish_state(&state_tx, &session);
                let _ = reply.send(result);
            }
            SessionMsg::Stop(reply) => {
                let result = session.stop();
                publish_state(&state_tx, &session);
                let _ = reply.send(result);
            }
            SessionMsg::Reset(reply) => {
                let result = session.reset();
                publish_state(&state_tx, &session);
                let _ = reply.send(result);
            }
            SessionMsg::SetRegion(side, point) => session.set_region(side, point),
            SessionMsg::SetPointed(point) => session.set_pointed(point),
            SessionMsg::SetParams(params) => session.set_params(params),
            SessionMsg::Shutdown => break,
        }
        publish_state(&state_tx, &session);
    }
    session.shutdown();
    info!("session consumer finished");
}

fn publish_state(state_tx: &watch::Sender<RunState>, session: &AnalysisSession) {
    state_tx.send_if_modified(|state| {
        if *state != session.state() {
            *state = session.state();
            true
        } else {
            false
        }
    });
}
