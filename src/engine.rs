/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 *
 * Unless you explicitly state otherwise, any contribution intentionally
 * submitted for inclusion in the work by you, as defined in the Apache-2.0
 * license, shall be dual licensed as above, without any additional terms or
 * conditions.
 */

//! The decode engine: one background thread per play session.
//!
//! The thread waits for the stream buffer to hold SPS, PPS and a first
//! frame, configures the injected decoder, then runs a consume-submit-drain
//! loop until the stop flag is observed. Cancellation is cooperative: every
//! wait in the session is bounded, so `release` completes promptly after
//! setting the flag.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use web_time::Instant;

use crate::buffer::StreamBuffer;
use crate::config::PlayerConfig;
use crate::decoder::{DecoderConfig, OutputStatus, SubmitStatus, VideoDecoder};
use crate::frame::RawFrame;
use crate::stats::DecodeCounters;
use crate::{PlayerError, Result};

/// Lifecycle state of a decode engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// No decode loop is running.
    Idle,
    /// The decoder is configured and the decode loop is consuming frames.
    Ready,
    /// The session failed; only a fresh start recovers.
    Error,
}

impl fmt::Display for DecoderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderState::Idle => write!(f, "Idle"),
            DecoderState::Ready => write!(f, "Ready"),
            DecoderState::Error => write!(f, "Error"),
        }
    }
}

impl DecoderState {
    pub fn is_ready(&self) -> bool {
        matches!(self, DecoderState::Ready)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, DecoderState::Error)
    }
}

/// Callback invoked on every engine state transition, synchronously on the
/// engine's thread, with a human-readable reason.
pub type StateListener = Box<dyn Fn(DecoderState, &str) + Send + Sync>;

/// How the parameter-wait phase ended.
enum ParameterWait {
    Ready,
    Cancelled,
    TimedOut { waited_ms: u64 },
}

/// Everything one session thread owns.
struct Session<D: VideoDecoder> {
    buffer: Arc<StreamBuffer>,
    decoder: D,
    config: PlayerConfig,
    frame_rate: Arc<AtomicU32>,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<DecoderState>>,
    counters: Arc<DecodeCounters>,
    listener: StateListener,
}

impl<D: VideoDecoder> Session<D> {
    fn run(mut self, target: D::Target) {
        match self.await_parameters() {
            ParameterWait::Ready => {}
            ParameterWait::Cancelled => {
                let err = PlayerError::Cancelled;
                self.decoder.release();
                self.transition(DecoderState::Idle, &err.to_string());
                return;
            }
            ParameterWait::TimedOut { waited_ms } => {
                let err = PlayerError::ParameterTimeout { waited_ms };
                self.decoder.release();
                self.transition(DecoderState::Error, &err.to_string());
                return;
            }
        }

        let params = self.buffer.parameters();
        let (sps, pps) = match (params.sps, params.pps) {
            (Some(sps), Some(pps)) => (sps, pps),
            _ => {
                // Readiness was observed, so the sets cannot be gone unless
                // something outside the session reset the buffer.
                self.decoder.release();
                self.transition(
                    DecoderState::Error,
                    "stream parameters disappeared before configuration",
                );
                return;
            }
        };

        let decoder_config = DecoderConfig {
            width: self.config.width,
            height: self.config.height,
            frame_rate: self.frame_rate.load(Ordering::SeqCst),
        };
        if let Err(e) = self
            .decoder
            .configure(&decoder_config, &sps, &pps, target)
        {
            self.decoder.release();
            self.transition(DecoderState::Error, &e.to_string());
            return;
        }
        self.transition(DecoderState::Ready, "decoder configured, consuming frames");

        match self.decode_loop() {
            Ok(()) => {
                self.decoder.release();
                self.transition(DecoderState::Idle, "decode session stopped");
            }
            Err(e) => {
                self.decoder.release();
                self.transition(DecoderState::Error, &e.to_string());
            }
        }
    }

    /// Poll in bounded slices until SPS, PPS and a first frame are present,
    /// the deadline passes, or the stop flag is observed.
    fn await_parameters(&self) -> ParameterWait {
        let started = Instant::now();
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return ParameterWait::Cancelled;
            }
            if self.buffer.wait_ready(self.config.parameter_poll_interval) {
                return ParameterWait::Ready;
            }
            let waited = started.elapsed();
            if waited >= self.config.parameter_deadline {
                return ParameterWait::TimedOut {
                    waited_ms: waited.as_millis() as u64,
                };
            }
        }
    }

    fn decode_loop(&mut self) -> Result<()> {
        while self.running.load(Ordering::SeqCst) {
            let frame = match self.buffer.wait_take_oldest(self.config.io_timeout) {
                Some(frame) => frame,
                None => continue,
            };
            if !self.submit_frame(&frame)? {
                // Stop observed while the decoder stayed busy; the dequeued
                // frame is dropped with the session.
                break;
            }
            self.drain_output()?;
        }
        Ok(())
    }

    /// Offer one frame until the decoder accepts it or the stop flag is
    /// observed. Returns whether the frame was accepted.
    fn submit_frame(&mut self, frame: &RawFrame) -> Result<bool> {
        while self.running.load(Ordering::SeqCst) {
            let status = self.decoder.submit_input(
                &frame.data,
                frame.timestamp_ms,
                self.config.io_timeout,
            )?;
            match status {
                SubmitStatus::Accepted => {
                    self.counters.record_submitted();
                    return Ok(true);
                }
                SubmitStatus::Busy => continue,
            }
        }
        Ok(false)
    }

    /// One bounded wait on the decoder's output side.
    fn drain_output(&mut self) -> Result<()> {
        match self.decoder.retrieve_output(self.config.io_timeout)? {
            OutputStatus::TryAgain => {}
            OutputStatus::FormatChanged => {
                log::info!("Decoder reported an output format change");
                self.counters.record_format_change();
            }
            OutputStatus::BuffersChanged => {
                log::info!("Decoder reported an output buffer change");
                self.counters.record_format_change();
            }
            OutputStatus::FrameReady(frame) => {
                self.decoder.render(frame)?;
                self.counters.record_rendered();
            }
        }
        Ok(())
    }

    fn transition(&self, next: DecoderState, reason: &str) {
        *self.state.lock().unwrap() = next;
        match next {
            DecoderState::Error => log::error!("Decode session error: {reason}"),
            _ => log::info!("Decode session {next}: {reason}"),
        }
        (self.listener)(next, reason);
    }
}

/// Handle to one running decode session.
///
/// Created by [`DecodeEngine::start`]; dropping the handle stops the
/// session and joins its thread.
pub struct DecodeEngine {
    running: Arc<AtomicBool>,
    state: Arc<Mutex<DecoderState>>,
    frame_rate: Arc<AtomicU32>,
    handle: Option<JoinHandle<()>>,
}

impl DecodeEngine {
    /// Spawn the session thread for one play session.
    ///
    /// The decoder and target are moved onto the thread; the listener is
    /// invoked from there on every state transition.
    pub fn start<D: VideoDecoder>(
        buffer: Arc<StreamBuffer>,
        decoder: D,
        target: D::Target,
        config: PlayerConfig,
        counters: Arc<DecodeCounters>,
        listener: StateListener,
    ) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let state = Arc::new(Mutex::new(DecoderState::Idle));
        let frame_rate = Arc::new(AtomicU32::new(config.frame_rate));
        log::info!(
            "Starting decode session ({}x{} @ {} fps)",
            config.width,
            config.height,
            config.frame_rate
        );

        let session = Session {
            buffer,
            decoder,
            config,
            frame_rate: Arc::clone(&frame_rate),
            running: Arc::clone(&running),
            state: Arc::clone(&state),
            counters,
            listener,
        };
        let handle = thread::spawn(move || session.run(target));

        Self {
            running,
            state,
            frame_rate,
            handle: Some(handle),
        }
    }

    /// Current engine state.
    pub fn state(&self) -> DecoderState {
        *self.state.lock().unwrap()
    }

    /// True until `release` is called or the session thread has been joined.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.handle.is_some()
    }

    /// Update the frame rate used at decoder configuration time.
    ///
    /// Values outside `1..=120` are ignored and the previous value is kept.
    /// Takes effect if configuration has not happened yet; a running loop is
    /// not reconfigured.
    pub fn set_frame_rate(&self, fps: u32) {
        if PlayerConfig::frame_rate_in_range(fps) {
            self.frame_rate.store(fps, Ordering::SeqCst);
        } else {
            log::debug!("Ignoring out-of-range frame rate {fps}");
        }
    }

    /// Stop the session and block until its thread has fully exited.
    ///
    /// When this returns, no further decoder call will be made for this
    /// session. Safe to call more than once.
    pub fn release(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            log::debug!("Waiting for decode session thread to exit");
            if handle.join().is_err() {
                log::error!("Decode session thread panicked before exiting");
                *self.state.lock().unwrap() = DecoderState::Error;
            }
        }
    }
}

impl Drop for DecodeEngine {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::{MockDecoder, MockEvent, MockOutput};
    use web_time::Duration;

    fn sps_unit() -> Vec<u8> {
        vec![0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F, 0xE9]
    }

    fn pps_unit() -> Vec<u8> {
        vec![0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80]
    }

    fn slice_unit(total_len: usize) -> Vec<u8> {
        let mut bytes = vec![0, 0, 0, 1, 0x65];
        bytes.resize(total_len, 0x5A);
        bytes
    }

    fn test_config() -> PlayerConfig {
        PlayerConfig {
            capacity: 32,
            admission_threshold: 10,
            width: 320,
            height: 240,
            frame_rate: 30,
            parameter_poll_interval: Duration::from_millis(20),
            parameter_deadline: Duration::from_secs(5),
            io_timeout: Duration::from_millis(5),
        }
    }

    /// Buffer with parameters captured and the given slice timestamps queued.
    fn primed_buffer(timestamps: &[u64]) -> Arc<StreamBuffer> {
        let buffer = Arc::new(StreamBuffer::new(32, 10));
        buffer.ingest(&sps_unit(), 0).unwrap();
        buffer.ingest(&pps_unit(), 0).unwrap();
        for &ts in timestamps {
            buffer.ingest(&slice_unit(64), ts).unwrap();
        }
        buffer
    }

    type TransitionLog = Arc<Mutex<Vec<(DecoderState, String)>>>;

    fn recording_listener() -> (StateListener, TransitionLog) {
        let log: TransitionLog = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let listener: StateListener = Box::new(move |state, reason| {
            sink.lock().unwrap().push((state, reason.to_string()));
        });
        (listener, log)
    }

    fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn states(log: &TransitionLog) -> Vec<DecoderState> {
        log.lock().unwrap().iter().map(|(s, _)| *s).collect()
    }

    #[test]
    fn test_session_decodes_and_renders_in_order() {
        let buffer = primed_buffer(&[100, 200]);
        let decoder = MockDecoder::new();
        let events = decoder.events();
        let (listener, transitions) = recording_listener();
        let counters = Arc::new(DecodeCounters::default());

        let mut engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface-1".to_string(),
            test_config(),
            Arc::clone(&counters),
            listener,
        );

        assert!(
            wait_until(
                || {
                    events
                        .lock()
                        .unwrap()
                        .iter()
                        .filter(|e| matches!(e, MockEvent::Rendered { .. }))
                        .count()
                        == 2
                },
                Duration::from_secs(2)
            ),
            "both frames should render"
        );
        engine.release();

        let log = events.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                MockEvent::Configured {
                    width: 320,
                    height: 240,
                    frame_rate: 30,
                    sps_len: 9,
                    pps_len: 8,
                    target: "surface-1".to_string(),
                },
                MockEvent::Submitted {
                    timestamp_ms: 100,
                    bytes: 64
                },
                MockEvent::Rendered { timestamp_ms: 100 },
                MockEvent::Submitted {
                    timestamp_ms: 200,
                    bytes: 64
                },
                MockEvent::Rendered { timestamp_ms: 200 },
                MockEvent::Released,
            ]
        );
        assert_eq!(states(&transitions), vec![DecoderState::Ready, DecoderState::Idle]);
        assert_eq!(engine.state(), DecoderState::Idle);

        let stats = counters.snapshot();
        assert_eq!(stats.frames_submitted, 2);
        assert_eq!(stats.frames_rendered, 2);
    }

    #[test]
    fn test_parameter_timeout_transitions_to_error() {
        let buffer = Arc::new(StreamBuffer::new(32, 10));
        let decoder = MockDecoder::new();
        let events = decoder.events();
        let (listener, transitions) = recording_listener();
        let config = PlayerConfig {
            parameter_deadline: Duration::from_millis(60),
            ..test_config()
        };

        let started = Instant::now();
        let engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface".to_string(),
            config,
            Arc::new(DecodeCounters::default()),
            listener,
        );

        assert!(
            wait_until(
                || engine.state() == DecoderState::Error,
                Duration::from_secs(2)
            ),
            "engine should fail once the deadline passes"
        );
        assert!(
            started.elapsed() < Duration::from_millis(500),
            "failure should arrive near the deadline, not long after"
        );

        let log = transitions.lock().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].0, DecoderState::Error);
        assert!(
            log[0].1.contains("Timed out"),
            "reason should be human-readable: {}",
            log[0].1
        );
        // The decoder was torn down without ever being configured.
        assert_eq!(*events.lock().unwrap(), vec![MockEvent::Released]);
    }

    #[test]
    fn test_release_during_parameter_wait_returns_to_idle() {
        let buffer = Arc::new(StreamBuffer::new(32, 10));
        let decoder = MockDecoder::new();
        let events = decoder.events();
        let (listener, transitions) = recording_listener();

        let mut engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::new(DecodeCounters::default()),
            listener,
        );
        thread::sleep(Duration::from_millis(30));

        let release_started = Instant::now();
        engine.release();
        assert!(
            release_started.elapsed() < Duration::from_millis(500),
            "release must return within a bounded interval"
        );

        assert_eq!(states(&transitions), vec![DecoderState::Idle]);
        assert_eq!(engine.state(), DecoderState::Idle);
        assert!(!engine.is_running());
        assert_eq!(*events.lock().unwrap(), vec![MockEvent::Released]);
    }

    #[test]
    fn test_configure_failure_is_fatal() {
        let buffer = primed_buffer(&[100]);
        let mut decoder = MockDecoder::new();
        decoder.fail_configure("no hardware codec available");
        let events = decoder.events();
        let (listener, transitions) = recording_listener();

        let engine = DecodeEngine::start(
            buffer.clone(),
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::new(DecodeCounters::default()),
            listener,
        );

        assert!(wait_until(
            || engine.state() == DecoderState::Error,
            Duration::from_secs(2)
        ));
        assert_eq!(states(&transitions), vec![DecoderState::Error]);
        // The loop never started: no frame was consumed or submitted.
        assert_eq!(*events.lock().unwrap(), vec![MockEvent::Released]);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_decoder_fault_ends_the_loop() {
        let buffer = primed_buffer(&[100]);
        let mut decoder = MockDecoder::new();
        decoder.script_output(MockOutput::Fault("codec died".to_string()));
        let events = decoder.events();
        let (listener, transitions) = recording_listener();
        let counters = Arc::new(DecodeCounters::default());

        let engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::clone(&counters),
            listener,
        );

        assert!(wait_until(
            || engine.state() == DecoderState::Error,
            Duration::from_secs(2)
        ));
        assert_eq!(
            states(&transitions),
            vec![DecoderState::Ready, DecoderState::Error]
        );
        let log = events.lock().unwrap();
        assert_eq!(log.last(), Some(&MockEvent::Released));
        assert_eq!(counters.snapshot().frames_rendered, 0);
    }

    #[test]
    fn test_busy_submit_is_retried_until_accepted() {
        let buffer = primed_buffer(&[100]);
        let mut decoder = MockDecoder::new();
        decoder.make_busy(3);
        let events = decoder.events();
        let io_calls = decoder.io_calls();
        let (listener, _transitions) = recording_listener();
        let counters = Arc::new(DecodeCounters::default());

        let mut engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::clone(&counters),
            listener,
        );

        assert!(wait_until(
            || {
                events
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|e| matches!(e, MockEvent::Rendered { timestamp_ms: 100 }))
            },
            Duration::from_secs(2)
        ));
        engine.release();

        // Three busy offers, one accepted submit, one retrieve at minimum.
        assert!(io_calls.load(Ordering::SeqCst) >= 5);
        assert_eq!(counters.snapshot().frames_submitted, 1);
        assert_eq!(counters.snapshot().frames_rendered, 1);
    }

    #[test]
    fn test_format_and_buffer_changes_are_nonfatal() {
        let buffer = primed_buffer(&[100, 200, 300]);
        let mut decoder = MockDecoder::new();
        decoder.script_output(MockOutput::FormatChanged);
        decoder.script_output(MockOutput::BuffersChanged);
        let events = decoder.events();
        let (listener, transitions) = recording_listener();
        let counters = Arc::new(DecodeCounters::default());

        let mut engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::clone(&counters),
            listener,
        );

        // The first two drains consume the scripted notifications, so the
        // first rendered frame is the first submitted timestamp.
        assert!(wait_until(
            || {
                events
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|e| matches!(e, MockEvent::Rendered { timestamp_ms: 100 }))
            },
            Duration::from_secs(2)
        ));
        engine.release();

        let stats = counters.snapshot();
        assert_eq!(stats.format_changes, 2);
        assert_eq!(stats.frames_submitted, 3);
        assert_eq!(stats.frames_rendered, 1);
        assert!(
            !states(&transitions).contains(&DecoderState::Error),
            "format notifications must not fail the session"
        );
    }

    #[test]
    fn test_empty_retrieval_keeps_the_loop_running() {
        let buffer = primed_buffer(&[100, 200]);
        let mut decoder = MockDecoder::new();
        decoder.script_output(MockOutput::TryAgain);
        let events = decoder.events();
        let (listener, transitions) = recording_listener();
        let counters = Arc::new(DecodeCounters::default());

        let mut engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::clone(&counters),
            listener,
        );

        // The scripted empty retrieval displaces the first frame's output by
        // one drain: it surfaces only after the second frame is submitted.
        assert!(wait_until(
            || {
                events
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|e| matches!(e, MockEvent::Rendered { timestamp_ms: 100 }))
            },
            Duration::from_secs(2)
        ));
        engine.release();

        let stats = counters.snapshot();
        assert_eq!(stats.frames_submitted, 2);
        assert_eq!(stats.frames_rendered, 1);
        assert_eq!(stats.format_changes, 0);
        assert!(
            !states(&transitions).contains(&DecoderState::Error),
            "an empty retrieval is transient, not a failure"
        );
    }

    #[test]
    fn test_set_frame_rate_applied_at_configure_time() {
        let buffer = Arc::new(StreamBuffer::new(32, 10));
        let decoder = MockDecoder::new();
        let events = decoder.events();
        let (listener, _transitions) = recording_listener();

        let mut engine = DecodeEngine::start(
            Arc::clone(&buffer),
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::new(DecodeCounters::default()),
            listener,
        );

        // Out-of-range updates are ignored, the last in-range one wins.
        engine.set_frame_rate(0);
        engine.set_frame_rate(90);
        engine.set_frame_rate(121);

        buffer.ingest(&sps_unit(), 0).unwrap();
        buffer.ingest(&pps_unit(), 0).unwrap();
        buffer.ingest(&slice_unit(64), 100).unwrap();

        assert!(wait_until(
            || !events.lock().unwrap().is_empty(),
            Duration::from_secs(2)
        ));
        engine.release();

        let log = events.lock().unwrap();
        match &log[0] {
            MockEvent::Configured { frame_rate, .. } => assert_eq!(*frame_rate, 90),
            other => panic!("expected a configure event first, got {other:?}"),
        }
    }

    #[test]
    fn test_release_blocks_until_no_more_decoder_io() {
        let buffer = primed_buffer(&[100]);
        let mut decoder = MockDecoder::new();
        decoder.delay_retrieve(Duration::from_millis(150));
        let events = decoder.events();
        let io_calls = decoder.io_calls();
        let (listener, _transitions) = recording_listener();

        let mut engine = DecodeEngine::start(
            buffer,
            decoder,
            "surface".to_string(),
            test_config(),
            Arc::new(DecodeCounters::default()),
            listener,
        );

        // Let the loop get into the slow retrieve call.
        assert!(wait_until(
            || {
                events
                    .lock()
                    .unwrap()
                    .iter()
                    .any(|e| matches!(e, MockEvent::Submitted { .. }))
            },
            Duration::from_secs(2)
        ));

        engine.release();
        let after_release = io_calls.load(Ordering::SeqCst);

        // The loop has fully ceased: the decoder sees no further calls.
        thread::sleep(Duration::from_millis(200));
        assert_eq!(io_calls.load(Ordering::SeqCst), after_release);
        assert_eq!(engine.state(), DecoderState::Idle);
        assert_eq!(events.lock().unwrap().last(), Some(&MockEvent::Released));
    }

    #[test]
    fn test_release_is_idempotent() {
        let buffer = primed_buffer(&[100]);
        let (listener, _transitions) = recording_listener();
        let mut engine = DecodeEngine::start(
            buffer,
            MockDecoder::new(),
            "surface".to_string(),
            test_config(),
            Arc::new(DecodeCounters::default()),
            listener,
        );

        engine.release();
        engine.release();
        assert!(!engine.is_running());
    }
}
