//! End-to-end consumer scenarios against a scripted in-memory face.
//!
//! A simulated producer publishes frames on a fixed cadence into a content
//! store; a responder task answers the consumer's Interests from the store
//! (including rightmost discovery and on-demand `_live`/`_latest`), and
//! asserts face-level timeouts for Interests that never match. The
//! exchange runs in real time (the engine's latency arithmetic reads the
//! monotonic wall clock), so assertions use generous margins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use ndnrtc_core::{
    AcceptAllVerifier, Consumer, ConsumerConfig, Data, DigestSigner, EncodedFrame, Face,
    FaceEvent, FrameType, Indicator, Interest, Name, NdnRtcError, NdnRtcResult, PublisherConfig,
    VideoStream,
};

const SEGMENT_SIZE: usize = 1000;
const FRAME_PERIOD_MS: u64 = 33;

/// What the responder serves.
struct World {
    store: HashMap<Name, Data>,
    publisher: VideoStream,
    last_frame_seg0: Option<Name>,
    /// Segment names the network "loses" (never answered).
    dropped: Vec<Name>,
    /// Segment names corrupted in flight (one content byte flipped).
    corrupted: Vec<Name>,
}

impl World {
    fn new(use_fec: bool) -> Self {
        World {
            store: HashMap::new(),
            publisher: VideoStream::new(
                &Name::from("/test/producer"),
                "camera",
                PublisherConfig {
                    segment_size: SEGMENT_SIZE,
                    use_fec,
                    framerate: 30,
                    gop_size: 10,
                    ..Default::default()
                },
                Box::new(DigestSigner),
            ),
            last_frame_seg0: None,
            dropped: vec![],
            corrupted: vec![],
        }
    }

    fn stream_prefix(&self) -> Name {
        self.publisher.stream_prefix().clone()
    }

    fn publish_frame(&mut self, seq: u64) {
        let payload: Vec<u8> = (0..2100u32).map(|i| ((i as u64 + seq) % 251) as u8).collect();
        let frame_type = if seq % 10 == 0 {
            FrameType::Key
        } else {
            FrameType::Delta
        };
        let packets = self
            .publisher
            .process_frame(
                &EncodedFrame {
                    frame_type,
                    width: 320,
                    height: 240,
                    codec_timestamp: (seq * 3000) as u32,
                    capture_time_ms: 0,
                    data: &payload,
                },
                |_| None,
            )
            .expect("publish");
        for mut d in packets {
            if self.corrupted.iter().any(|n| *n == d.name) {
                let mut bytes = d.content.to_vec();
                if let Some(last) = bytes.last_mut() {
                    *last ^= 0xFF;
                }
                d.set_content(bytes);
            }
            if d.name.to_uri().ends_with("/seg=0")
                && !d.name.to_uri().contains("_parity")
            {
                self.last_frame_seg0 = Some(d.name.clone());
            }
            self.store.insert(d.name.clone(), d);
        }
    }

    /// Answers one Interest from the store, or `None` if nothing matches
    /// yet.
    fn answer(&mut self, interest: &Interest) -> Option<Data> {
        if self.dropped.iter().any(|n| *n == interest.name) {
            return None;
        }

        let uri = interest.name.to_uri();
        if uri.ends_with("/_live") {
            return Some(self.publisher.generate_live());
        }
        if uri.ends_with("/_latest") {
            return Some(self.publisher.generate_latest());
        }
        if let Some(exact) = self.store.get(&interest.name) {
            return Some(exact.clone());
        }
        // rightmost discovery: a MustBeFresh prefix Interest under the
        // stream prefix answers with the newest frame's first segment
        if interest.can_be_prefix && interest.name == self.stream_prefix() {
            return self
                .last_frame_seg0
                .as_ref()
                .and_then(|n| self.store.get(n))
                .cloned();
        }
        None
    }
}

struct ScriptedFace {
    expressed: mpsc::UnboundedSender<Interest>,
}

impl Face for ScriptedFace {
    fn express_interest(&mut self, interest: &Interest) -> NdnRtcResult<()> {
        self.expressed
            .send(interest.clone())
            .map_err(|_| NdnRtcError::InvalidState("responder gone".into()))
    }
}

/// Drives the responder: answers Interests as content appears, publishes
/// new frames on the producer cadence, and times out unanswered Interests.
async fn run_world(
    world: Arc<Mutex<World>>,
    mut expressed: mpsc::UnboundedReceiver<Interest>,
    events: mpsc::UnboundedSender<FaceEvent>,
    frames_to_publish: u64,
) {
    let mut pending: Vec<(Interest, tokio::time::Instant)> = vec![];
    let mut publish_tick = tokio::time::interval(Duration::from_millis(FRAME_PERIOD_MS));
    let mut rematch_tick = tokio::time::interval(Duration::from_millis(5));
    let mut next_seq = 0u64;

    loop {
        tokio::select! {
            interest = expressed.recv() => {
                let Some(interest) = interest else { return };
                match world.lock().answer(&interest) {
                    Some(data) => {
                        let _ = events.send(FaceEvent::Data { interest, data });
                    }
                    None => {
                        let deadline = tokio::time::Instant::now()
                            + Duration::from_millis(interest.lifetime_ms);
                        pending.push((interest, deadline));
                    }
                }
            }

            _ = publish_tick.tick() => {
                if next_seq < frames_to_publish {
                    world.lock().publish_frame(next_seq);
                    next_seq += 1;
                }
            }

            _ = rematch_tick.tick() => {
                let now = tokio::time::Instant::now();
                let mut still_pending = vec![];
                for (interest, deadline) in pending.drain(..) {
                    if let Some(data) = world.lock().answer(&interest) {
                        let _ = events.send(FaceEvent::Data { interest, data });
                    } else if deadline <= now {
                        let _ = events.send(FaceEvent::Timeout { interest });
                    } else {
                        still_pending.push((interest, deadline));
                    }
                }
                pending = still_pending;
            }
        }
    }
}

fn consumer_config(use_fec: bool) -> ConsumerConfig {
    ConsumerConfig {
        segment_size: SEGMENT_SIZE,
        use_fec,
        ..Default::default()
    }
}

/// Builds the consumer + responder pair and returns the consumer plus the
/// world handle.
fn build(
    world: World,
    config: ConsumerConfig,
    frames: u64,
) -> (Consumer, Arc<Mutex<World>>) {
    let stream_prefix = world.stream_prefix();
    let world = Arc::new(Mutex::new(world));

    let (interest_tx, interest_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(run_world(
        Arc::clone(&world),
        interest_rx,
        event_tx,
        frames,
    ));

    let consumer = Consumer::new(
        config,
        &stream_prefix,
        Box::new(ScriptedFace {
            expressed: interest_tx,
        }),
        event_rx,
        Arc::new(AcceptAllVerifier),
        None,
    )
    .expect("consumer builds");
    (consumer, world)
}

#[tokio::test(flavor = "multi_thread")]
async fn startup_reaches_live_fetching_and_plays_frames() {
    let mut world = World::new(false);
    // a little history exists before the consumer shows up
    for seq in 0..5 {
        world.publish_frame(seq);
    }
    let (consumer, _world) = build(world, consumer_config(false), 300);
    let handle = consumer.handle();
    let run = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_secs(4)).await;
    // the shutdown path resets the machine to Idle, so sample first
    let reached_state = handle.stats.get(Indicator::State);
    handle.shutdown();
    let result = run.await.expect("task join");
    assert!(result.is_ok(), "run ended with {:?}", result);

    let stats = handle.stats;
    assert!(
        stats.get(Indicator::AssembledNum) > 30.,
        "frames should assemble continuously, got {}",
        stats.get(Indicator::AssembledNum)
    );
    assert!(
        stats.get(Indicator::PlayedNum) > 10.,
        "playout should release frames, got {}",
        stats.get(Indicator::PlayedNum)
    );
    assert!(
        reached_state >= 3.,
        "the machine should be at or past Chasing, got {}",
        reached_state
    );
    assert!(
        !handle.decode_queue.lock().is_empty(),
        "decoded frames reach the decode queue"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unresponsive_producer_is_meta_unavailable() {
    // a world that never publishes and never answers
    let world = World::new(false);
    let (consumer, _world) = build(world, consumer_config(false), 0);
    let result = consumer.run().await;
    match result {
        Err(NdnRtcError::MetaUnavailable(_)) => {}
        other => panic!("expected MetaUnavailable, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lost_segments_recover_through_fec() {
    let mut world = World::new(true);
    for seq in 0..5 {
        world.publish_frame(seq);
    }
    // every frame loses data segments 1 and 2; parity must cover
    let prefix = world.stream_prefix();
    for seq in 0..300u64 {
        for seg in [1u64, 2] {
            world.dropped.push(
                prefix
                    .clone()
                    .append_sequence_number(seq)
                    .append_segment(seg),
            );
        }
    }

    let (consumer, _world) = build(world, consumer_config(true), 300);
    let handle = consumer.handle();
    let run = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_secs(4)).await;
    handle.shutdown();
    let _ = run.await.expect("task join");

    let stats = handle.stats;
    assert!(
        stats.get(Indicator::AssembledNum) > 10.,
        "frames still assemble under loss, got {}",
        stats.get(Indicator::AssembledNum)
    );
    assert!(
        stats.get(Indicator::RecoveredNum) > 0.,
        "some frames must be FEC-recovered"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn corrupted_segment_fails_verification_but_still_plays() {
    let mut world = World::new(false);
    let prefix = world.stream_prefix();
    // corrupt one mid-stream segment in flight; the manifest digests are
    // computed over the clean packets at publish time
    for seq in 20..40u64 {
        world.corrupted.push(
            prefix
                .clone()
                .append_sequence_number(seq)
                .append_segment(0),
        );
    }
    for seq in 0..5 {
        world.publish_frame(seq);
    }

    let (consumer, _world) = build(world, consumer_config(false), 300);
    let handle = consumer.handle();
    let run = tokio::spawn(consumer.run());

    tokio::time::sleep(Duration::from_secs(4)).await;
    handle.shutdown();
    let _ = run.await.expect("task join");

    let stats = handle.stats;
    assert!(
        stats.get(Indicator::VerifyFailure) > 0.,
        "digest mismatch must surface as a verification failure"
    );
    assert!(
        stats.get(Indicator::PlayedNum) > 0.,
        "failed slots are still delivered to playout"
    );
}
