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

//! Fundamental data structures for the playback pipeline.

use serde::{Deserialize, Serialize};

/// A raw access unit as admitted into the stream buffer, owned by the buffer
/// until it is dequeued for decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawFrame {
    /// Monotonically increasing id, assigned on admission and never reused
    /// within a session.
    pub id: u64,
    /// The Annex-B bytes exactly as ingested, start code included.
    pub data: Vec<u8>,
    /// Presentation timestamp supplied by the feed, in milliseconds.
    pub timestamp_ms: u64,
}

impl RawFrame {
    pub fn new(id: u64, data: Vec<u8>, timestamp_ms: u64) -> Self {
        Self {
            id,
            data,
            timestamp_ms,
        }
    }

    /// Size of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Decoder parameter sets captured from the stream, each stored with its
/// start code so they can be handed to a decoder verbatim.
///
/// Each set is written at most once per session; `reset` on the stream
/// buffer clears both for the next session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSets {
    /// Sequence parameter set (NAL type 7), if seen.
    pub sps: Option<Vec<u8>>,
    /// Picture parameter set (NAL type 8), if seen.
    pub pps: Option<Vec<u8>>,
}

impl ParameterSets {
    /// True once both SPS and PPS have been captured.
    pub fn is_complete(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }
}
