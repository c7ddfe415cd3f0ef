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

//! The playback facade composing the stream buffer and the decode engine.
//!
//! One `Player` owns one stream buffer for its whole lifetime and one decode
//! engine per play session. A decoder factory supplied at construction mints
//! a fresh decoder capability for every session.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::StreamBuffer;
use crate::config::PlayerConfig;
use crate::decoder::VideoDecoder;
use crate::engine::{DecodeEngine, StateListener};
use crate::stats::{DecodeCounters, PipelineStats};
use crate::{DecoderState, Result};

/// Callback invoked with the playing flag on every player transition,
/// synchronously on whichever thread detected it. Hosts that need another
/// execution context must marshal themselves, and must not call back into
/// player control methods from inside the listener.
pub type PlayingListener = Box<dyn Fn(bool) + Send + Sync>;

/// Orchestrates one stream buffer and one decode session at a time.
pub struct Player<D: VideoDecoder> {
    config: PlayerConfig,
    buffer: Arc<StreamBuffer>,
    engine: Mutex<Option<DecodeEngine>>,
    factory: Box<dyn Fn() -> D + Send + Sync>,
    playing: Arc<AtomicBool>,
    listener: Arc<Mutex<Option<PlayingListener>>>,
    frame_rate: AtomicU32,
    counters: Arc<DecodeCounters>,
}

impl<D: VideoDecoder> Player<D> {
    /// Create a player. The factory is called once per `start` to produce
    /// the session's decoder.
    pub fn new(config: PlayerConfig, factory: Box<dyn Fn() -> D + Send + Sync>) -> Result<Self> {
        config.validate()?;
        let buffer = Arc::new(StreamBuffer::new(
            config.capacity,
            config.admission_threshold,
        ));
        let frame_rate = AtomicU32::new(config.frame_rate);
        Ok(Self {
            config,
            buffer,
            engine: Mutex::new(None),
            factory,
            playing: Arc::new(AtomicBool::new(false)),
            listener: Arc::new(Mutex::new(None)),
            frame_rate,
            counters: Arc::new(DecodeCounters::default()),
        })
    }

    /// Register the playing-state listener, replacing any previous one.
    pub fn set_playing_listener(&self, listener: PlayingListener) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Start a play session against the given rendering target.
    ///
    /// If a session is already active it is stopped first, synchronously;
    /// calling `start` while playing is a restart, and any frame in flight
    /// in the prior session is discarded. The host must `stop` the player
    /// before the target becomes invalid.
    pub fn start(&self, target: D::Target) {
        if self.playing.load(Ordering::SeqCst) {
            log::info!("Player already active, restarting session");
        }
        self.halt_engine();

        let decoder = (self.factory)();
        let playing = Arc::clone(&self.playing);
        let listener = Arc::clone(&self.listener);
        let engine_listener: StateListener = Box::new(move |state, _reason| {
            // Idle and Error both mean not playing; Ready means playing.
            let now_playing = state.is_ready();
            playing.store(now_playing, Ordering::SeqCst);
            if let Some(callback) = &*listener.lock().unwrap() {
                callback(now_playing);
            }
        });

        let mut config = self.config.clone();
        config.frame_rate = self.frame_rate.load(Ordering::SeqCst);
        let engine = DecodeEngine::start(
            Arc::clone(&self.buffer),
            decoder,
            target,
            config,
            Arc::clone(&self.counters),
            engine_listener,
        );
        *self.engine.lock().unwrap() = Some(engine);

        self.playing.store(true, Ordering::SeqCst);
        self.notify_playing(true);
    }

    /// Stop the active session, if any.
    ///
    /// Blocks until the decode thread has fully exited, then clears the
    /// stream buffer. Safe to call when already stopped.
    pub fn stop(&self) {
        self.halt_engine();
        self.playing.store(false, Ordering::SeqCst);
        self.notify_playing(false);
    }

    /// Feed one buffer of Annex-B bytes into the session.
    ///
    /// A no-op while not playing. Invalid buffers are dropped without
    /// affecting the session.
    pub fn ingest(&self, bytes: &[u8], timestamp_ms: u64) {
        if !self.playing.load(Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.buffer.ingest(bytes, timestamp_ms) {
            log::debug!("Dropped invalid buffer at {timestamp_ms}ms: {e}");
        }
    }

    /// Update the frame rate hint for this and future sessions.
    ///
    /// Values outside `1..=120` are ignored and the previous value is kept.
    pub fn set_frame_rate(&self, fps: u32) {
        if !PlayerConfig::frame_rate_in_range(fps) {
            log::debug!("Ignoring out-of-range frame rate {fps}");
            return;
        }
        self.frame_rate.store(fps, Ordering::SeqCst);
        if let Some(engine) = &*self.engine.lock().unwrap() {
            engine.set_frame_rate(fps);
        }
    }

    /// The frame rate hint currently in effect.
    pub fn frame_rate(&self) -> u32 {
        self.frame_rate.load(Ordering::SeqCst)
    }

    /// Whether a session is currently playing.
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    /// State of the current session's engine, `Idle` when none is active.
    pub fn decoder_state(&self) -> DecoderState {
        self.engine
            .lock()
            .unwrap()
            .as_ref()
            .map(|engine| engine.state())
            .unwrap_or(DecoderState::Idle)
    }

    /// Number of frames queued and awaiting decode.
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Combined lifetime counters plus the current queue depth.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            buffer: self.buffer.stats(),
            decode: self.counters.snapshot(),
            queued_frames: self.buffer.len(),
        }
    }

    /// Release the engine and clear the buffer for a session boundary.
    fn halt_engine(&self) {
        let engine = self.engine.lock().unwrap().take();
        if let Some(mut engine) = engine {
            engine.release();
        }
        self.buffer.reset();
    }

    fn notify_playing(&self, playing: bool) {
        if let Some(callback) = &*self.listener.lock().unwrap() {
            callback(playing);
        }
    }
}

impl<D: VideoDecoder> Drop for Player<D> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::MockDecoder;
    use crate::PlayerError;

    fn mock_player(config: PlayerConfig) -> Player<MockDecoder> {
        Player::new(config, Box::new(MockDecoder::new)).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = PlayerConfig {
            capacity: 0,
            ..Default::default()
        };
        let err = Player::new(config, Box::new(MockDecoder::new)).err();
        assert!(matches!(err, Some(PlayerError::Configuration(_))));
    }

    #[test]
    fn test_ingest_is_noop_while_stopped() {
        let player = mock_player(PlayerConfig::default());
        let mut slice = vec![0, 0, 0, 1, 0x65];
        slice.resize(400, 0x5A);

        player.ingest(&slice, 100);
        assert_eq!(player.buffer_len(), 0);
        assert_eq!(player.stats().buffer.frames_rejected, 0, "dropped, not rejected");
    }

    #[test]
    fn test_invalid_data_not_validated_while_stopped() {
        let player = mock_player(PlayerConfig::default());
        // Not playing: not even validated.
        player.ingest(&[], 0);
        assert_eq!(player.stats().buffer.frames_rejected, 0);
    }

    #[test]
    fn test_frame_rate_range_filtering() {
        let player = mock_player(PlayerConfig::default());
        assert_eq!(player.frame_rate(), 30);

        player.set_frame_rate(60);
        assert_eq!(player.frame_rate(), 60);

        player.set_frame_rate(0);
        assert_eq!(player.frame_rate(), 60, "zero is ignored");

        player.set_frame_rate(121);
        assert_eq!(player.frame_rate(), 60, "above the cap is ignored");

        player.set_frame_rate(120);
        assert_eq!(player.frame_rate(), 120, "the cap itself is accepted");
    }

    #[test]
    fn test_stop_when_never_started_notifies_not_playing() {
        let player = mock_player(PlayerConfig::default());
        let notifications = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&notifications);
        player.set_playing_listener(Box::new(move |playing| {
            sink.lock().unwrap().push(playing);
        }));

        player.stop();
        player.stop();

        assert_eq!(*notifications.lock().unwrap(), vec![false, false]);
        assert!(!player.is_playing());
    }
}
