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

//! Buffering and decode-loop pipeline for live Annex-B H.264 playback.
//!
//! Raw byte buffers go in through [`Player::ingest`]; SPS and PPS are
//! captured from the stream, decodable access units are queued in a bounded
//! FIFO, and a per-session background thread drains them into an injected
//! [`VideoDecoder`] for rendering. Decoding itself is delegated to that
//! capability; this crate owns framing, buffering and lifecycle control.
//!
//! ```
//! use h264_playback::{MockDecoder, Player, PlayerConfig};
//!
//! let player = Player::new(PlayerConfig::default(), Box::new(MockDecoder::new)).unwrap();
//! player.start("window-1".to_string());
//!
//! // Parameter sets first, then slice data large enough to be queued.
//! player.ingest(&[0, 0, 0, 1, 0x67, 0x42, 0x00, 0x1F], 0);
//! player.ingest(&[0, 0, 0, 1, 0x68, 0xCE, 0x38, 0x80], 0);
//! let mut slice = vec![0, 0, 0, 1, 0x65];
//! slice.resize(512, 0x51);
//! player.ingest(&slice, 33);
//!
//! player.stop();
//! ```

pub mod buffer;
pub mod config;
pub mod decoder;
pub mod engine;
pub mod error;
pub mod frame;
pub mod nal;
pub mod player;
pub mod stats;

pub use buffer::{IngestOutcome, StreamBuffer};
pub use config::{PlayerConfig, MAX_FRAME_RATE};
pub use decoder::{
    DecoderConfig, MockDecoder, MockEvent, MockOutput, OutputStatus, SubmitStatus, VideoDecoder,
};
pub use engine::{DecodeEngine, DecoderState, StateListener};
pub use error::{PlayerError, Result};
pub use frame::{ParameterSets, RawFrame};
pub use player::{Player, PlayingListener};
pub use stats::{BufferStats, DecodeCounters, DecodeStats, PipelineStats};
