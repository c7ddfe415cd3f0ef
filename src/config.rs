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

use web_time::Duration;

use crate::{PlayerError, Result};

/// Highest frame rate the pipeline accepts as a decoder hint.
pub const MAX_FRAME_RATE: u32 = 120;

/// Playback pipeline configuration.
///
/// Every tunable the pipeline relies on is an explicit field here so tests
/// can run with small synthetic values instead of production defaults.
#[derive(Debug, Clone)]
pub struct PlayerConfig {
    /// Maximum number of frames queued before the oldest is evicted.
    pub capacity: usize,
    /// Minimum ingest size in bytes (exclusive) for a buffer to be queued
    /// as a frame rather than treated as parameter-set-only data.
    pub admission_threshold: usize,
    /// Width passed to the decoder at configuration time.
    pub width: u32,
    /// Height passed to the decoder at configuration time.
    pub height: u32,
    /// Frame rate hint passed to the decoder, `1..=MAX_FRAME_RATE`.
    pub frame_rate: u32,
    /// How long each bounded wait lasts while polling for SPS, PPS and a
    /// first frame. The stop signal is re-checked between waits.
    pub parameter_poll_interval: Duration,
    /// Total time allowed for SPS, PPS and a first frame to appear before
    /// the session fails.
    pub parameter_deadline: Duration,
    /// Bounded wait used for each dequeue, submit and retrieve step of the
    /// decode loop.
    pub io_timeout: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            capacity: 20_000,
            admission_threshold: 300,
            width: 1920,
            height: 1080,
            frame_rate: 30,
            parameter_poll_interval: Duration::from_millis(300),
            parameter_deadline: Duration::from_secs(10),
            io_timeout: Duration::from_millis(10),
        }
    }
}

impl PlayerConfig {
    /// True when `fps` is an acceptable decoder frame rate hint.
    pub fn frame_rate_in_range(fps: u32) -> bool {
        fps > 0 && fps <= MAX_FRAME_RATE
    }

    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PlayerError::Configuration(
                "buffer capacity must be greater than zero".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(PlayerError::Configuration(format!(
                "invalid output resolution {}x{}",
                self.width, self.height
            )));
        }
        if !Self::frame_rate_in_range(self.frame_rate) {
            return Err(PlayerError::Configuration(format!(
                "frame rate {} outside 1..={}",
                self.frame_rate, MAX_FRAME_RATE
            )));
        }
        if self.parameter_poll_interval.is_zero() {
            return Err(PlayerError::Configuration(
                "parameter poll interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
