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

//! The decoder capability boundary.
//!
//! The pipeline never decodes H.264 itself; it drives an injected
//! [`VideoDecoder`]. Production bindings wrap a platform codec behind this
//! trait. [`MockDecoder`] is the deterministic stand-in used by the test
//! suite and the simulation binary; it can script every retrieval outcome
//! a real codec can produce.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use web_time::Duration;

use crate::{PlayerError, Result};

/// Geometry and pacing hints handed to the decoder at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

/// Result of offering one input buffer to the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitStatus {
    /// The decoder consumed the buffer.
    Accepted,
    /// No input slot freed up within the bounded wait; the caller may retry
    /// with the same buffer.
    Busy,
}

/// Result of one bounded wait on the decoder's output side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus<F> {
    /// Nothing available yet; transient.
    TryAgain,
    /// The decoder announced a new output format; informational.
    FormatChanged,
    /// The decoder recreated its output buffers; informational.
    BuffersChanged,
    /// A decoded frame is ready to be rendered.
    FrameReady(F),
}

/// An external video decoder the engine feeds and drains.
///
/// `Busy` and `TryAgain` are ordinary values; an `Err` from any method is a
/// hard fault that ends the decode session. Implementations are moved onto
/// the engine's thread, which calls `release` before exiting.
pub trait VideoDecoder: Send + 'static {
    /// Opaque rendering target, moved into the decoder at configure time and
    /// never inspected by the pipeline.
    type Target: Send + 'static;
    /// Opaque decoded output token returned by `retrieve_output`.
    type Frame;

    /// Bind the decoder to a target and the stream's parameter sets.
    fn configure(
        &mut self,
        config: &DecoderConfig,
        sps: &[u8],
        pps: &[u8],
        target: Self::Target,
    ) -> Result<()>;

    /// Offer one encoded access unit, waiting at most `timeout` for an
    /// input slot.
    fn submit_input(
        &mut self,
        data: &[u8],
        timestamp_ms: u64,
        timeout: Duration,
    ) -> Result<SubmitStatus>;

    /// Wait at most `timeout` for the decoder's output side to report
    /// progress.
    fn retrieve_output(&mut self, timeout: Duration) -> Result<OutputStatus<Self::Frame>>;

    /// Present one decoded frame on the configured target.
    fn render(&mut self, frame: Self::Frame) -> Result<()>;

    /// Tear down decoder resources. Called exactly once, after the decode
    /// loop has ended.
    fn release(&mut self);
}

/// Everything a [`MockDecoder`] was asked to do, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Configured {
        width: u32,
        height: u32,
        frame_rate: u32,
        sps_len: usize,
        pps_len: usize,
        target: String,
    },
    Submitted {
        timestamp_ms: u64,
        bytes: usize,
    },
    Rendered {
        timestamp_ms: u64,
    },
    Released,
}

/// A scripted outcome served by [`MockDecoder::retrieve_output`] before it
/// falls back to echoing submitted frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutput {
    TryAgain,
    FormatChanged,
    BuffersChanged,
    Fault(String),
}

/// Deterministic [`VideoDecoder`] for tests and simulation.
///
/// Submitted timestamps queue up internally and come back as
/// `FrameReady(timestamp)` in order, after any scripted outcomes have been
/// served. Clones share the event log and the I/O counter while scripted
/// behavior carries over, so a clone-per-session factory applies the script
/// to each session and reports them all in one place.
#[derive(Debug, Clone)]
pub struct MockDecoder {
    events: Arc<Mutex<Vec<MockEvent>>>,
    io_calls: Arc<AtomicU64>,
    pending: VecDeque<u64>,
    script: VecDeque<MockOutput>,
    configure_failure: Option<String>,
    submit_fault: Option<String>,
    busy_submits: u32,
    retrieve_delay: Duration,
}

impl MockDecoder {
    pub fn new() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
            io_calls: Arc::new(AtomicU64::new(0)),
            pending: VecDeque::new(),
            script: VecDeque::new(),
            configure_failure: None,
            submit_fault: None,
            busy_submits: 0,
            retrieve_delay: Duration::ZERO,
        }
    }

    /// Handle to the shared event log; clones recorded into the same log.
    pub fn events(&self) -> Arc<Mutex<Vec<MockEvent>>> {
        Arc::clone(&self.events)
    }

    /// Counter incremented on every `submit_input` and `retrieve_output`
    /// call, shared with clones. Lets tests assert that no decoder I/O
    /// happens after a stop has returned.
    pub fn io_calls(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.io_calls)
    }

    /// Queue an outcome to be served by `retrieve_output` ahead of any
    /// pending frames.
    pub fn script_output(&mut self, output: MockOutput) {
        self.script.push_back(output);
    }

    /// Make `configure` fail with the given reason.
    pub fn fail_configure(&mut self, reason: &str) {
        self.configure_failure = Some(reason.to_string());
    }

    /// Make the next `submit_input` call report a hard fault.
    pub fn fail_next_submit(&mut self, reason: &str) {
        self.submit_fault = Some(reason.to_string());
    }

    /// Report `Busy` for the next `count` submit calls.
    pub fn make_busy(&mut self, count: u32) {
        self.busy_submits = count;
    }

    /// Sleep this long inside every `retrieve_output` call, simulating a
    /// slow decoder that outlives the stop signal.
    pub fn delay_retrieve(&mut self, delay: Duration) {
        self.retrieve_delay = delay;
    }

    fn record(&self, event: MockEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl Default for MockDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoDecoder for MockDecoder {
    type Target = String;
    type Frame = u64;

    fn configure(
        &mut self,
        config: &DecoderConfig,
        sps: &[u8],
        pps: &[u8],
        target: Self::Target,
    ) -> Result<()> {
        if let Some(reason) = self.configure_failure.take() {
            return Err(PlayerError::Configuration(reason));
        }
        self.record(MockEvent::Configured {
            width: config.width,
            height: config.height,
            frame_rate: config.frame_rate,
            sps_len: sps.len(),
            pps_len: pps.len(),
            target,
        });
        Ok(())
    }

    fn submit_input(
        &mut self,
        data: &[u8],
        timestamp_ms: u64,
        _timeout: Duration,
    ) -> Result<SubmitStatus> {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.submit_fault.take() {
            return Err(PlayerError::DecoderFault(reason));
        }
        if self.busy_submits > 0 {
            self.busy_submits -= 1;
            return Ok(SubmitStatus::Busy);
        }
        self.record(MockEvent::Submitted {
            timestamp_ms,
            bytes: data.len(),
        });
        self.pending.push_back(timestamp_ms);
        Ok(SubmitStatus::Accepted)
    }

    fn retrieve_output(&mut self, _timeout: Duration) -> Result<OutputStatus<Self::Frame>> {
        self.io_calls.fetch_add(1, Ordering::SeqCst);
        if !self.retrieve_delay.is_zero() {
            std::thread::sleep(self.retrieve_delay);
        }
        if let Some(scripted) = self.script.pop_front() {
            return match scripted {
                MockOutput::TryAgain => Ok(OutputStatus::TryAgain),
                MockOutput::FormatChanged => Ok(OutputStatus::FormatChanged),
                MockOutput::BuffersChanged => Ok(OutputStatus::BuffersChanged),
                MockOutput::Fault(reason) => Err(PlayerError::DecoderFault(reason)),
            };
        }
        match self.pending.pop_front() {
            Some(timestamp_ms) => Ok(OutputStatus::FrameReady(timestamp_ms)),
            None => Ok(OutputStatus::TryAgain),
        }
    }

    fn render(&mut self, frame: Self::Frame) -> Result<()> {
        self.record(MockEvent::Rendered {
            timestamp_ms: frame,
        });
        Ok(())
    }

    fn release(&mut self) {
        self.pending.clear();
        self.record(MockEvent::Released);
    }
}
