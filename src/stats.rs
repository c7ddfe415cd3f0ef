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

//! Lifetime counters for the playback pipeline.
//!
//! Counters accumulate across sessions of one player; they are not reset by
//! `stop()`. Buffer-side counters are kept under the stream buffer's lock,
//! decode-side counters are atomics shared with the engine thread.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Ingest-side counters, maintained by the stream buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferStats {
    /// Buffers admitted into the queue as frames
    pub frames_ingested: u64,
    /// Buffers rejected for a missing start code or empty payload
    pub frames_rejected: u64,
    /// Frames evicted oldest-first under capacity pressure
    pub frames_evicted: u64,
    /// Valid buffers scanned for parameter sets but not queued
    pub parameter_only_buffers: u64,
}

/// Decode-side counters, maintained by the engine thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeStats {
    /// Frames handed to the decoder's input
    pub frames_submitted: u64,
    /// Decoded frames handed to the rendering target
    pub frames_rendered: u64,
    /// Output format or buffer-layout change notifications observed
    pub format_changes: u64,
}

/// Combined snapshot returned by `Player::stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub buffer: BufferStats,
    pub decode: DecodeStats,
    /// Frames currently queued and awaiting decode
    pub queued_frames: usize,
}

/// Atomic home for [`DecodeStats`], shared between the engine thread that
/// increments and the player that snapshots.
#[derive(Debug, Default)]
pub struct DecodeCounters {
    frames_submitted: AtomicU64,
    frames_rendered: AtomicU64,
    format_changes: AtomicU64,
}

impl DecodeCounters {
    pub(crate) fn record_submitted(&self) {
        self.frames_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rendered(&self) {
        self.frames_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_format_change(&self) {
        self.format_changes.fetch_add(1, Ordering::Relaxed);
    }

    /// Current counter values.
    pub fn snapshot(&self) -> DecodeStats {
        DecodeStats {
            frames_submitted: self.frames_submitted.load(Ordering::Relaxed),
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            format_changes: self.format_changes.load(Ordering::Relaxed),
        }
    }
}
