//! Producer and viewer in one process over loopback
//!
//! Run with: cargo run --example loopback [PORT]
//!
//! Streams synthetic video frames and a sine-wave audio track for a few
//! seconds, printing what the viewer receives. Set `RUST_LOG=framecast=debug`
//! for connection-level logs.

use std::time::Duration;

use framecast::server::ProducerEvent;
use framecast::{ClientConfig, ServerConfig, StreamProducer, StreamViewer, ViewerEvent};

const FRAMES_PER_SECOND: u64 = 30;
const SAMPLE_RATE: u32 = 44_100;
const AUDIO_CHUNK_MS: u64 = 20;

/// A fake encoded image whose size follows the suggested quality
fn synthetic_frame(index: u64, quality: u8) -> Vec<u8> {
    let size = 4 * 1024 + quality as usize * 1024;
    (0..size).map(|i| (i as u64 ^ index) as u8).collect()
}

/// 16-bit mono PCM of a 440 Hz tone
fn sine_chunk(start_sample: u64, samples: usize) -> Vec<u8> {
    (0..samples as u64)
        .flat_map(|i| {
            let t = (start_sample + i) as f32 / SAMPLE_RATE as f32;
            let sample = (t * 440.0 * std::f32::consts::TAU).sin() * 8000.0;
            (sample as i16).to_le_bytes()
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("framecast=info".parse()?),
        )
        .init();

    let port: u16 = std::env::args()
        .nth(1)
        .map(|p| p.parse())
        .transpose()?
        .unwrap_or(0);
    let config = ServerConfig::with_addr(([127, 0, 0, 1], port).into());

    let (producer, mut producer_events) = StreamProducer::new(config)?;
    let addr = producer.start().await?;
    println!("Streaming on {}", addr);

    tokio::spawn(async move {
        while let Some(event) = producer_events.recv().await {
            match event {
                ProducerEvent::AudioLevel(_) => {}
                other => println!("[producer] {:?}", other),
            }
        }
    });

    let (viewer, mut viewer_events) = StreamViewer::new(ClientConfig::default());
    viewer.connect("127.0.0.1", addr.port()).await?;

    let printer = tokio::spawn(async move {
        let mut frames = 0u64;
        let mut chunks = 0u64;
        while let Some(event) = viewer_events.recv().await {
            match event {
                ViewerEvent::Frame { data, sequence } => {
                    frames += 1;
                    if sequence % FRAMES_PER_SECOND as u32 == 0 {
                        println!("[viewer] frame #{} ({} bytes)", sequence, data.len());
                    }
                }
                ViewerEvent::AudioChunk { .. } => chunks += 1,
                ViewerEvent::AudioLevel(_) => {}
                other => println!("[viewer] {:?}", other),
            }
        }
        (frames, chunks)
    });

    // Capture side: video and audio on their own clocks
    let video = {
        let producer = producer.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_millis(1000 / FRAMES_PER_SECOND));
            for index in 0..FRAMES_PER_SECOND * 3 {
                tick.tick().await;
                let quality = producer.current_quality();
                if let Err(e) = producer.push_video(synthetic_frame(index, quality), 1280, 720, quality) {
                    println!("[capture] video frame dropped: {}", e);
                }
            }
        })
    };
    let audio = {
        let producer = producer.clone();
        tokio::spawn(async move {
            let samples = (SAMPLE_RATE as u64 * AUDIO_CHUNK_MS / 1000) as usize;
            let mut tick = tokio::time::interval(Duration::from_millis(AUDIO_CHUNK_MS));
            for chunk in 0..(3000 / AUDIO_CHUNK_MS) {
                tick.tick().await;
                let _ = producer.push_audio(sine_chunk(chunk * samples as u64, samples), SAMPLE_RATE, 1);
            }
        })
    };

    video.await?;
    audio.await?;

    let stats = producer.stats();
    println!(
        "Producer: video={} audio={} dropped={} bytes={} avg_transfer={:?} fps={:.1} bitrate={}",
        stats.video_frames,
        stats.audio_chunks,
        stats.dropped_frames,
        stats.bytes_sent,
        stats.average_transfer,
        stats.fps,
        stats.bitrate,
    );

    viewer.disconnect().await;
    let viewer_stats = viewer.stats();
    producer.stop().await;
    drop(viewer);

    let (frames, chunks) = printer.await?;
    println!(
        "Viewer: frames={} chunks={} missing={}",
        frames, chunks, viewer_stats.missing_packets
    );

    Ok(())
}
