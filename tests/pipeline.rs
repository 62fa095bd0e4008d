//! End-to-end behaviour of the streaming pipeline

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use futures_util::{stream, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use voicechat_stream::audio::pcm::{f32_to_le_bytes, i16_to_le_bytes};
use voicechat_stream::audio::{renderer, OfflineRendererFactory, RingBuffer};
use voicechat_stream::client::{ClientEvent, VoiceClient};
use voicechat_stream::config::{AppConfig, PlaybackConfig, RenderConfig, StreamConfig};
use voicechat_stream::playback::{AudioSource, OfflineContextFactory, PlaybackScheduler};
use voicechat_stream::stream::{Sinks, StreamProcessor};
use voicechat_stream::transport::{ByteStream, FileTransport};
use voicechat_stream::StreamError;

fn frame(event: &str, data: serde_json::Value) -> String {
    format!("event: {}\ndata: {}\n\n", event, data)
}

fn audio(index: u64, bytes: &[u8]) -> String {
    frame(
        "audio",
        serde_json::json!({ "chunk": BASE64.encode(bytes), "index": index }),
    )
}

/// Split the body at arbitrary points, as a network would
fn body_in_pieces(frames: &[String], piece: usize) -> ByteStream {
    let all: Vec<u8> = frames.concat().into_bytes();
    let chunks: Vec<Result<Bytes, StreamError>> = all
        .chunks(piece)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(chunks).boxed()
}

#[tokio::test(start_paused = true)]
async fn test_out_of_order_audio_plays_gapless() {
    let playback = PlaybackConfig {
        sample_rate: 1000,
        channels: 1,
        render_buffer_frames: 50,
        settle_delay_ms: 50,
        device_id: None,
    };
    let factory = OfflineContextFactory::new();
    let scheduler = PlaybackScheduler::new(playback, Arc::new(factory.clone()));

    let (tx, source) = AudioSource::channel();
    let (played_tx, played_rx) = oneshot::channel();
    scheduler.enqueue(source, move || {
        let _ = played_tx.send(());
    });

    let (done_tx, done_rx) = oneshot::channel();
    let processor = StreamProcessor::new(
        StreamConfig::default(),
        Sinks::new()
            .on_audio(move |_, bytes| {
                let _ = tx.send(bytes);
            })
            .on_complete(move |text, latency| {
                let _ = done_tx.send((text, latency));
            }),
    );

    let pcm = f32_to_le_bytes(&(0..400).map(|i| i as f32 / 400.0).collect::<Vec<_>>());
    let parts: Vec<&[u8]> = pcm.chunks(300).collect();
    let frames = vec![
        frame("text", serde_json::json!({ "content": "Hi" })),
        audio(2, parts[2]),
        audio(0, parts[0]),
        audio(4, parts[4]),
        audio(1, parts[1]),
        audio(3, parts[3]),
        audio(5, parts[5]),
        frame("complete", serde_json::json!({ "fullText": "Hi!" })),
    ];

    processor.process(body_in_pieces(&frames, 37)).await.unwrap();
    let (text, _) = done_rx.await.unwrap();
    assert_eq!(text, "Hi!");

    played_rx.await.unwrap();
    let records = factory.records();
    let total: u64 = records.iter().map(|r| r.frames).sum();
    assert_eq!(total, 400);
    for pair in records.windows(2) {
        assert_eq!(pair[0].end_frame(), pair[1].start_frame);
    }
    assert_eq!(processor.stats().audio_chunks, 6);
}

#[tokio::test(start_paused = true)]
async fn test_segments_queue_strictly_in_order() {
    let playback = PlaybackConfig {
        sample_rate: 1000,
        render_buffer_frames: 1000,
        ..PlaybackConfig::default()
    };
    let factory = OfflineContextFactory::new();
    let scheduler = PlaybackScheduler::new(playback, Arc::new(factory.clone()));
    let finished = Arc::new(Mutex::new(Vec::new()));

    let (last_tx, last_rx) = oneshot::channel();
    let mut last_tx = Some(last_tx);
    for (n, frames) in [300usize, 100, 200].into_iter().enumerate() {
        let finished = finished.clone();
        let done = if n == 2 { last_tx.take() } else { None };
        scheduler.enqueue(
            AudioSource::from_bytes(f32_to_le_bytes(&vec![0.5; frames])),
            move || {
                finished.lock().push(n);
                if let Some(done) = done {
                    let _ = done.send(());
                }
            },
        );
    }
    last_rx.await.unwrap();

    assert_eq!(*finished.lock(), vec![0, 1, 2]);
    let records = factory.records();
    assert_eq!(records.len(), 3);
    for pair in records.windows(2) {
        assert!(pair[1].start_frame >= pair[0].end_frame());
    }
}

#[test]
fn test_ring_overflow_keeps_newest_samples() {
    let mut ring = RingBuffer::new(10);
    let samples: Vec<f32> = (0..15).map(|i| i as f32).collect();
    ring.write(&samples);

    assert_eq!(ring.read_position(), 5);
    assert_eq!(ring.dropped(), 5);

    let mut out = [0.0f32; 10];
    assert_eq!(ring.read(&mut out), 10);
    let expected: Vec<f32> = (5..15).map(|i| i as f32).collect();
    assert_eq!(out.to_vec(), expected);
}

#[test]
fn test_barge_in_silences_renderer() {
    let (handle, mut renderer) = renderer(&RenderConfig::default());
    handle.push_samples(&[16384; 256]).unwrap();

    let mut out = [0.0f32; 64];
    renderer.process(&mut out, 1);
    assert!(out.iter().all(|&s| s == 0.5));

    handle.end_of_input().unwrap();
    renderer.process(&mut out, 1);
    assert!(out.iter().all(|&s| s == 0.0));
    assert_eq!(handle.stats().resets, 1);

    // New audio after the reset plays normally
    handle.push_samples(&[-16384; 64]).unwrap();
    renderer.process(&mut out, 1);
    assert!(out.iter().all(|&s| s == -0.5));
}

#[tokio::test(start_paused = true)]
async fn test_replay_file_through_client() {
    let pcm = i16_to_le_bytes(&[100, 200, 300, 400]);
    let body = [
        "event: transcript\r\ndata: {\"content\":\"what time is it\"}\r\n\r\n".to_string(),
        ": keep-alive\n\n".to_string(),
        frame("text", serde_json::json!({ "content": "It is " })),
        audio(0, &pcm),
        frame("mystery", serde_json::json!({ "x": 1 })),
        frame("text", serde_json::json!({ "content": "noon." })),
        frame("complete", serde_json::json!({ "fullText": "It is noon." })),
    ]
    .concat();

    let path = std::env::temp_dir().join(format!("replay-{}.sse", uuid::Uuid::new_v4()));
    std::fs::write(&path, body).unwrap();

    let transport = Arc::new(FileTransport::new(&path).with_chunk_size(7));
    let renderers = OfflineRendererFactory::new();
    let (client, mut events) = VoiceClient::new(
        AppConfig::default(),
        transport,
        Arc::new(OfflineContextFactory::new()),
    );
    let mut client = client.with_renderer(Arc::new(renderers.clone()));

    client.submit("ignored").await;
    client.wait().await.unwrap();

    let mut transcript = None;
    let mut last_text = String::new();
    let completed = loop {
        match events.recv().await.unwrap() {
            ClientEvent::Transcript(t) => transcript = Some(t),
            ClientEvent::Text(t) => last_text = t,
            ClientEvent::Completed { text, .. } => break text,
            other => panic!("unexpected event {:?}", other),
        }
    };
    let _ = std::fs::remove_file(&path);

    assert_eq!(transcript.as_deref(), Some("what time is it"));
    assert_eq!(completed, "It is noon.");
    assert_eq!(last_text, "It is noon.");

    let mut out = [0.0f32; 4];
    assert!(renderers.process(&mut out, 1));
    assert_eq!(out[3], 400.0 / 32768.0);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_processor_ignores_late_bytes() {
    let calls = Arc::new(Mutex::new(0));
    let text_calls = calls.clone();
    let processor = StreamProcessor::new(
        StreamConfig::default(),
        Sinks::new().on_text(move |_| *text_calls.lock() += 1),
    );

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Result<Bytes, StreamError>>();
    let body = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|i| (i, rx)) }).boxed();
    let runner = processor.clone();
    let task = tokio::spawn(async move { runner.process(body).await });

    processor.stop();
    let _ = tx.send(Ok(Bytes::from(frame(
        "text",
        serde_json::json!({ "content": "too late" }),
    ))));
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(*calls.lock(), 0);
    assert!(task.await.unwrap().is_err());
}
