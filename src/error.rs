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

use thiserror::Error;

/// Result type for playback pipeline operations
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Errors that can occur in the playback pipeline
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    /// Ingested bytes are empty or do not begin with an Annex-B start code.
    /// Local to one ingest call; the session keeps accepting data.
    #[error("Invalid stream data: {0}")]
    InvalidData(String),

    /// SPS, PPS and a first frame were not all observed before the deadline.
    /// Fatal for the session.
    #[error("Timed out waiting for stream parameters after {waited_ms}ms")]
    ParameterTimeout { waited_ms: u64 },

    /// The decoder capability rejected its configuration. Fatal.
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The decoder capability reported a hard failure while submitting input
    /// or retrieving output. Fatal.
    #[error("Decoder fault: {0}")]
    DecoderFault(String),

    /// Dequeue attempted on an empty buffer.
    #[error("Buffer is empty")]
    BufferEmpty,

    /// Removal of a frame id that is no longer queued.
    #[error("Frame {0} is not in the buffer")]
    FrameNotFound(u64),

    /// A stop signal arrived while waiting for stream parameters.
    /// Non-fatal; the engine returns to idle.
    #[error("Decode session cancelled")]
    Cancelled,
}
