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

//! Bounded FIFO store for raw access units plus captured parameter sets.
//!
//! The buffer is the single resource shared between the ingestion thread and
//! the decode engine's thread. Every operation runs under one internal lock,
//! and a condition variable lets the engine block for readiness or for the
//! next frame with a bounded wait instead of spinning.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use web_time::{Duration, Instant};

use crate::frame::{ParameterSets, RawFrame};
use crate::nal::{self, NalUnitType};
use crate::stats::BufferStats;
use crate::{PlayerError, Result};

/// What a single `ingest` call did to the buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestOutcome {
    /// SPS was captured from this buffer (first time this session).
    pub captured_sps: bool,
    /// PPS was captured from this buffer (first time this session).
    pub captured_pps: bool,
    /// Id assigned to the admitted frame, if the buffer was queued.
    pub admitted_id: Option<u64>,
    /// Id of the oldest frame evicted to make room, if any.
    pub evicted_id: Option<u64>,
}

#[derive(Debug, Default)]
struct Inner {
    frames: VecDeque<RawFrame>,
    parameters: ParameterSets,
    next_id: u64,
    stats: BufferStats,
}

impl Inner {
    /// The decode engine may configure and start draining once both
    /// parameter sets and at least one frame are present.
    fn is_ready(&self) -> bool {
        self.parameters.is_complete() && !self.frames.is_empty()
    }
}

/// Thread-safe stream buffer with oldest-first eviction.
#[derive(Debug)]
pub struct StreamBuffer {
    /// Maximum number of queued frames.
    capacity: usize,
    /// Ingest size in bytes (exclusive) below which a buffer is treated as
    /// parameter-set-only data and not queued.
    admission_threshold: usize,
    inner: Mutex<Inner>,
    readiness: Condvar,
}

impl StreamBuffer {
    /// Create a new stream buffer.
    pub fn new(capacity: usize, admission_threshold: usize) -> Self {
        Self {
            capacity,
            admission_threshold,
            inner: Mutex::new(Inner::default()),
            readiness: Condvar::new(),
        }
    }

    /// Ingest one buffer of Annex-B bytes.
    ///
    /// The bytes must begin with a 3- or 4-byte start code. Until SPS and PPS
    /// have been captured for the session, each valid buffer is scanned for
    /// them; a buffer is queued as a frame only once both sets are known and
    /// its size exceeds the admission threshold. At capacity the oldest frame
    /// is evicted first.
    pub fn ingest(&self, bytes: &[u8], timestamp_ms: u64) -> Result<IngestOutcome> {
        let mut inner = self.inner.lock().unwrap();

        if bytes.is_empty() {
            inner.stats.frames_rejected += 1;
            return Err(PlayerError::InvalidData("empty buffer".to_string()));
        }
        if !nal::has_annex_b_prefix(bytes) {
            inner.stats.frames_rejected += 1;
            return Err(PlayerError::InvalidData(
                "buffer does not begin with an Annex-B start code".to_string(),
            ));
        }

        let mut outcome = IngestOutcome::default();

        if inner.parameters.sps.is_none() {
            if let Some(range) = nal::find_unit_of_type(bytes, NalUnitType::Sps) {
                log::debug!("Captured SPS ({} bytes)", range.len());
                inner.parameters.sps = Some(bytes[range].to_vec());
                outcome.captured_sps = true;
            }
        }
        if inner.parameters.pps.is_none() {
            if let Some(range) = nal::find_unit_of_type(bytes, NalUnitType::Pps) {
                log::debug!("Captured PPS ({} bytes)", range.len());
                inner.parameters.pps = Some(bytes[range].to_vec());
                outcome.captured_pps = true;
            }
        }

        // Admission heuristic: parameter-set-only buffers are small, slice
        // data is not. Buffers below the threshold still feed the scan above.
        if inner.parameters.is_complete() && bytes.len() > self.admission_threshold {
            if inner.frames.len() >= self.capacity {
                if let Some(oldest) = inner.frames.pop_front() {
                    log::debug!(
                        "Buffer at capacity {}: evicted oldest frame {}",
                        self.capacity,
                        oldest.id
                    );
                    inner.stats.frames_evicted += 1;
                    outcome.evicted_id = Some(oldest.id);
                }
            }
            let id = inner.next_id;
            inner.next_id += 1;
            inner
                .frames
                .push_back(RawFrame::new(id, bytes.to_vec(), timestamp_ms));
            inner.stats.frames_ingested += 1;
            outcome.admitted_id = Some(id);
        } else {
            inner.stats.parameter_only_buffers += 1;
        }

        if outcome.captured_sps || outcome.captured_pps || outcome.admitted_id.is_some() {
            self.readiness.notify_all();
        }

        Ok(outcome)
    }

    /// Remove and return the earliest queued frame.
    pub fn take_oldest(&self) -> Result<RawFrame> {
        let mut inner = self.inner.lock().unwrap();
        inner.frames.pop_front().ok_or(PlayerError::BufferEmpty)
    }

    /// Remove and return the frame with the given id, wherever it is queued.
    pub fn remove(&self, id: u64) -> Result<RawFrame> {
        let mut inner = self.inner.lock().unwrap();
        let position = inner
            .frames
            .iter()
            .position(|frame| frame.id == id)
            .ok_or(PlayerError::FrameNotFound(id))?;
        inner
            .frames
            .remove(position)
            .ok_or(PlayerError::FrameNotFound(id))
    }

    /// Snapshot of the captured parameter sets, possibly still partial.
    pub fn parameters(&self) -> ParameterSets {
        self.inner.lock().unwrap().parameters.clone()
    }

    /// Clear frames and parameter sets and restart the id counter.
    ///
    /// Used at session boundaries. Lifetime counters are preserved. Any
    /// blocked waiter is woken so it observes the boundary.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        let dropped = inner.frames.len();
        inner.frames.clear();
        inner.parameters = ParameterSets::default();
        inner.next_id = 0;
        if dropped > 0 {
            log::info!("Stream buffer reset, dropped {dropped} queued frames");
        }
        self.readiness.notify_all();
    }

    /// Block until SPS, PPS and at least one frame are all present, or until
    /// `timeout` elapses. Returns the readiness at exit.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if inner.is_ready() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            let (guard, _) = self.readiness.wait_timeout(inner, remaining).unwrap();
            inner = guard;
        }
    }

    /// Block until a frame can be dequeued, up to `timeout`. Returns `None`
    /// on timeout so callers can re-check their stop signal at a bounded
    /// interval.
    pub fn wait_take_oldest(&self, timeout: Duration) -> Option<RawFrame> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                return Some(frame);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            let (guard, _) = self.readiness.wait_timeout(inner, remaining).unwrap();
            inner = guard;
        }
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().frames.len()
    }

    /// True when no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().frames.is_empty()
    }

    /// Snapshot of the ingest-side lifetime counters.
    pub fn stats(&self) -> BufferStats {
        self.inner.lock().unwrap().stats.clone()
    }
}
