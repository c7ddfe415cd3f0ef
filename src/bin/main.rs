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

use h264_playback::{MockDecoder, MockEvent, Player, PlayerConfig};

use rand::{thread_rng, Rng};
use std::time::Duration;

const SIMULATED_FRAMES: u64 = 90;
const KEYFRAME_INTERVAL: u64 = 30;

/// Annex-B buffer with a 4-byte start code, the given NAL header byte and a
/// filler payload.
fn annex_b_unit(header: u8, total_len: usize) -> Vec<u8> {
    let mut bytes = vec![0, 0, 0, 1, header];
    bytes.resize(total_len, 0x5A);
    bytes
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    println!("--- H.264 Playback Pipeline Simulation ---");

    // One mock decoder template; each play session gets a clone that reports
    // into the shared event log.
    let template = MockDecoder::new();
    let events = template.events();
    let player = Player::new(PlayerConfig::default(), Box::new(move || template.clone()))?;
    player.set_playing_listener(Box::new(|playing| {
        println!("[PLAYER] playing = {playing}");
    }));

    player.start("simulated-surface".to_string());

    // A live camera sends SPS and PPS ahead of the first slice.
    player.ingest(&annex_b_unit(0x67, 12), 0);
    player.ingest(&annex_b_unit(0x68, 9), 0);

    let mut rng = thread_rng();
    let mut timestamp_ms: u64 = 0;
    for n in 0..SIMULATED_FRAMES {
        timestamp_ms += rng.gen_range(28..=38);

        // Roughly one slice in twenty never arrives.
        if rng.gen::<f32>() < 0.05 {
            println!("[FEED] dropped slice at {timestamp_ms}ms");
            continue;
        }

        let (header, size) = if n % KEYFRAME_INTERVAL == 0 {
            (0x65, rng.gen_range(1200..=1600))
        } else {
            (0x41, rng.gen_range(350..=700))
        };
        player.ingest(&annex_b_unit(header, size), timestamp_ms);

        if n == SIMULATED_FRAMES / 2 {
            println!("[FEED] camera switched to 60 fps");
            player.set_frame_rate(60);
        }

        if n % KEYFRAME_INTERVAL == KEYFRAME_INTERVAL - 1 {
            let stats = player.stats();
            println!(
                "\n[STATS] queued: {} | ingested: {} | rendered: {} | evicted: {}\n",
                stats.queued_frames,
                stats.buffer.frames_ingested,
                stats.decode.frames_rendered,
                stats.buffer.frames_evicted
            );
        }

        std::thread::sleep(Duration::from_millis(rng.gen_range(24..=42)));
    }

    // Let the decode loop drain whatever is still queued.
    std::thread::sleep(Duration::from_millis(200));
    player.stop();

    let rendered = events
        .lock()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, MockEvent::Rendered { .. }))
        .count();
    let stats = player.stats();
    println!("--- Simulation complete ---");
    println!(
        "[FINAL] ingested: {} | submitted: {} | rendered: {} | still queued: {}",
        stats.buffer.frames_ingested, stats.decode.frames_submitted, rendered, stats.queued_frames
    );

    Ok(())
}
