//! The remote stream consumer: wiring and the face-task event loop.
//!
//! One [`Consumer`] drives fetching for one stream. It owns every
//! face-side component (request queue, buffer control, controllers, the
//! pipeline-control state machine) and runs them on a single task; playout
//! runs on its own task fed through the shared playback queue. The startup
//! sequence fetches `_meta`, `_live`, and `_latest` (failure is fatal with
//! [`NdnRtcError::MetaUnavailable`]), then hands control to the state
//! machine for the rightmost handshake and steady-state fetching.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::buffer::{Buffer, SlotPool, SlotState};
use crate::buffer_control::BufferControl;
use crate::clock;
use crate::config::ConsumerConfig;
use crate::decode_queue::{DecodeQueue, FrameDecoder, PassthroughDecoder};
use crate::drd_estimator::DrdEstimator;
use crate::error::{NdnRtcError, NdnRtcResult};
use crate::interest_control::{InterestControl, StrategyDefault};
use crate::latency_control::{LatencyControl, PipelineAdjust, ThresholdCoeffs};
use crate::name::Name;
use crate::namespace::{NameComponents, NameFilter, StreamType};
use crate::packets::{DelegationSet, LiveMeta, NdnrtcPacket, StreamMeta, WireSegment};
use crate::pipeline_control::{
    PipelineControl, PipelineControlContext, PipelineControlStateMachine, StateId,
};
use crate::pipeliner::{AudioNameScheme, Pipeliner, VideoNameScheme};
use crate::playback_queue::PlaybackQueue;
use crate::playout::{AudioPlayoutSink, AudioRenderer, Playout, PlayoutSink, VideoPlayoutSink};
use crate::playout_control::PlayoutControl;
use crate::protocol;
use crate::request::{DataRequest, RequestQueue, RequestStatus};
use crate::rtx_controller::{RtxController, SlotView};
use crate::sample_estimator::SampleEstimator;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::{Face, FaceEvent, Interest};
use crate::validator::{ManifestValidator, ValidationEvent, Verifier};

/// Borrows the machine's collaborators out of the consumer's fields.
/// Expanded inline so the borrows stay disjoint from `pipeline_control`.
macro_rules! fsm_ctx {
    ($self:ident) => {
        PipelineControlContext {
            thread_prefix: &$self.stream_prefix,
            buffer: &$self.buffer,
            playback_queue: &$self.playback_queue,
            pipeliner: &mut $self.pipeliner,
            sample_estimator: &$self.sample_estimator,
            interest_control: &mut $self.interest_control,
            latency_control: &mut $self.latency_control,
            playout_control: &$self.playout_control,
            request_queue: &mut $self.request_queue,
            rtx_controller: &mut $self.rtx_controller,
        }
    };
}

/// Cheap clone handed to the embedding application.
#[derive(Clone)]
pub struct ConsumerHandle {
    pub decode_queue: Arc<Mutex<DecodeQueue>>,
    pub stats: StatisticsStorage,
    cancel: CancellationToken,
}

impl ConsumerHandle {
    /// Requests an orderly shutdown of the consumer and its playout task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub struct Consumer {
    config: ConsumerConfig,
    stream_prefix: Name,
    stream_type: StreamType,
    stats: StatisticsStorage,

    face_events: mpsc::UnboundedReceiver<FaceEvent>,
    validation_events: mpsc::UnboundedReceiver<ValidationEvent>,
    cancel: CancellationToken,

    request_queue: RequestQueue,
    buffer: Arc<Mutex<Buffer>>,
    playback_queue: Arc<Mutex<PlaybackQueue>>,
    buffer_control: BufferControl,
    sample_estimator: SampleEstimator,
    interest_control: InterestControl,
    latency_control: LatencyControl,
    rtx_controller: RtxController,
    pipeliner: Pipeliner,
    pipeline_control: PipelineControl,
    playout_control: PlayoutControl,
    validator: ManifestValidator,
    decode_queue: Arc<Mutex<DecodeQueue>>,

    stream_meta: Option<StreamMeta>,
    live_meta: Option<LiveMeta>,
    latest_pointer: Option<DelegationSet>,
    last_segment_ts_ms: i64,
    fetching: bool,
}

impl Consumer {
    /// Consumer for a video stream, decoding through `decoder` into the
    /// decode queue.
    pub fn new(
        config: ConsumerConfig,
        stream_name: &Name,
        face: Box<dyn Face>,
        face_events: mpsc::UnboundedReceiver<FaceEvent>,
        verifier: Arc<dyn Verifier>,
        decoder: Option<Box<dyn FrameDecoder>>,
    ) -> NdnRtcResult<Self> {
        let stats = StatisticsStorage::consumer();
        let info = NameComponents::extract_info(stream_name)?;
        let stream_prefix = info.prefix(NameFilter::Stream);
        let stream_type = info.stream_type;

        let buffer = Arc::new(Mutex::new(Buffer::new(
            SlotPool::new(protocol::SLOT_POOL_CAPACITY),
            stats.clone(),
        )));
        let playback_queue = Arc::new(Mutex::new(PlaybackQueue::new(
            Arc::clone(&buffer),
            stats.clone(),
        )));

        let decode_queue = Arc::new(Mutex::new(DecodeQueue::new(
            3 * protocol::DEFAULT_GOP_SIZE as usize,
            decoder.unwrap_or_else(|| Box::new(PassthroughDecoder)),
        )));
        let sink: Box<dyn PlayoutSink> = Box::new(VideoPlayoutSink::new(
            Arc::clone(&decode_queue),
            stats.clone(),
        ));
        Self::with_sink(
            config,
            stream_prefix,
            stream_type,
            face,
            face_events,
            verifier,
            buffer,
            playback_queue,
            decode_queue,
            sink,
            stats,
        )
    }

    /// Consumer for an audio stream, feeding bundles to `renderer`.
    pub fn new_audio(
        config: ConsumerConfig,
        stream_name: &Name,
        face: Box<dyn Face>,
        face_events: mpsc::UnboundedReceiver<FaceEvent>,
        verifier: Arc<dyn Verifier>,
        renderer: Box<dyn AudioRenderer>,
    ) -> NdnRtcResult<Self> {
        let stats = StatisticsStorage::consumer();
        let info = NameComponents::extract_info(stream_name)?;
        let stream_prefix = info.prefix(NameFilter::Stream);

        let buffer = Arc::new(Mutex::new(Buffer::new(
            SlotPool::new(protocol::SLOT_POOL_CAPACITY),
            stats.clone(),
        )));
        let playback_queue = Arc::new(Mutex::new(PlaybackQueue::new(
            Arc::clone(&buffer),
            stats.clone(),
        )));
        let decode_queue = Arc::new(Mutex::new(DecodeQueue::new(
            3 * protocol::DEFAULT_GOP_SIZE as usize,
            Box::new(PassthroughDecoder),
        )));
        let sink: Box<dyn PlayoutSink> = Box::new(AudioPlayoutSink::new(renderer, stats.clone()));
        Self::with_sink(
            config,
            stream_prefix,
            StreamType::Audio,
            face,
            face_events,
            verifier,
            buffer,
            playback_queue,
            decode_queue,
            sink,
            stats,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn with_sink(
        config: ConsumerConfig,
        stream_prefix: Name,
        stream_type: StreamType,
        face: Box<dyn Face>,
        face_events: mpsc::UnboundedReceiver<FaceEvent>,
        verifier: Arc<dyn Verifier>,
        buffer: Arc<Mutex<Buffer>>,
        playback_queue: Arc<Mutex<PlaybackQueue>>,
        decode_queue: Arc<Mutex<DecodeQueue>>,
        sink: Box<dyn PlayoutSink>,
        stats: StatisticsStorage,
    ) -> NdnRtcResult<Self> {
        let cancel = CancellationToken::new();

        let (playout_tx, playout_rx) = mpsc::unbounded_channel();
        let playout_control =
            PlayoutControl::new(playout_tx, Arc::clone(&playback_queue), stats.clone());
        let playout = Playout::new(Arc::clone(&playback_queue), sink, stats.clone());
        tokio::spawn(playout.run(playout_rx, cancel.clone()));

        let (validation_tx, validation_events) = mpsc::unbounded_channel();
        let validator = ManifestValidator::new(verifier, validation_tx, stats.clone());

        let machine = match stream_type {
            StreamType::Video => PipelineControlStateMachine::video_machine(stats.clone()),
            StreamType::Audio => PipelineControlStateMachine::default_machine(stats.clone()),
        };

        let pipeliner = Pipeliner::new(
            match stream_type {
                StreamType::Video => Box::new(VideoNameScheme { threaded: false }),
                StreamType::Audio => Box::new(AudioNameScheme),
            },
            config.interest_lifetime_ms,
            config.use_fec,
            config.pipeline_step,
            stats.clone(),
        );

        Ok(Consumer {
            stream_prefix,
            stream_type,
            face_events,
            validation_events,
            cancel,
            request_queue: RequestQueue::new(face, stats.clone()),
            buffer,
            playback_queue,
            buffer_control: BufferControl::new(
                DrdEstimator::new(config.initial_drd_ms, protocol::DRD_WINDOW_MS),
                stats.clone(),
            ),
            sample_estimator: SampleEstimator::new(stats.clone()),
            interest_control: InterestControl::new(Box::new(StrategyDefault), stats.clone()),
            latency_control: LatencyControl::new(
                ThresholdCoeffs {
                    alpha: config.threshold_alpha,
                    beta: config.threshold_beta,
                },
                stats.clone(),
            ),
            rtx_controller: RtxController::new(protocol::DEFAULT_GOP_SIZE, stats.clone()),
            pipeliner,
            pipeline_control: PipelineControl::new(machine, stats.clone()),
            playout_control,
            validator,
            decode_queue,
            stream_meta: None,
            live_meta: None,
            latest_pointer: None,
            last_segment_ts_ms: 0,
            fetching: false,
            config,
            stats,
        })
    }

    pub fn handle(&self) -> ConsumerHandle {
        ConsumerHandle {
            decode_queue: Arc::clone(&self.decode_queue),
            stats: self.stats.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn state(&self) -> StateId {
        self.pipeline_control.state()
    }

    /// Fetches until shutdown. Only [`NdnRtcError::MetaUnavailable`] and an
    /// explicit shutdown end the run.
    pub async fn run(mut self) -> NdnRtcResult<()> {
        self.bootstrap_meta().await?;
        self.start_fetching()?;
        self.event_loop().await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Startup
    // ─────────────────────────────────────────────────────────────────────

    /// Fetches `_meta`, `_live`, and `_latest` before any frame fetching
    /// begins. All three must answer; a timeout or nack on any is fatal.
    async fn bootstrap_meta(&mut self) -> NdnRtcResult<()> {
        log::info!("[Consumer] fetching from {}", self.stream_prefix);

        let requests: Vec<Arc<DataRequest>> = [
            NameComponents::META,
            NameComponents::LIVE,
            NameComponents::LATEST,
        ]
        .iter()
        .map(|token| {
            DataRequest::new(
                Interest::new(self.stream_prefix.clone().append_str(token))
                    .with_lifetime(self.config.interest_lifetime_ms)
                    .with_must_be_fresh(true)
                    .with_can_be_prefix(true),
            )
        })
        .collect::<NdnRtcResult<_>>()?;

        let outcome: Arc<Mutex<Option<Result<(), String>>>> = Arc::new(Mutex::new(None));
        {
            let ok = Arc::clone(&outcome);
            DataRequest::invoke_when_all(&requests, RequestStatus::Data, move |_| {
                ok.lock().get_or_insert(Ok(()));
            });
            let fail = Arc::clone(&outcome);
            DataRequest::invoke_if_any(
                &requests,
                &[
                    RequestStatus::Timeout,
                    RequestStatus::NetworkNack,
                    RequestStatus::AppNack,
                ],
                move |r| {
                    fail.lock().get_or_insert(Err(format!(
                        "{} replied {:?}",
                        r.name(),
                        r.status()
                    )));
                },
            );
        }

        for r in &requests {
            self.request_queue.enqueue_request(Arc::clone(r));
        }

        loop {
            if let Some(result) = outcome.lock().clone() {
                return result.map_err(NdnRtcError::MetaUnavailable).map(|_| {
                    self.apply_bootstrap(&requests);
                });
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(NdnRtcError::MetaUnavailable("cancelled".to_string()));
                }
                ev = self.face_events.recv() => match ev {
                    Some(ev) => self.route_face_event(ev),
                    None => {
                        return Err(NdnRtcError::MetaUnavailable(
                            "face closed during meta fetch".to_string(),
                        ))
                    }
                },
            }
        }
    }

    /// Applies the bootstrap replies: sample rate, segment estimates,
    /// initial DRD, and the initial pipeline.
    fn apply_bootstrap(&mut self, requests: &[Arc<DataRequest>]) {
        // seed DRD with the observed round trip of the live-meta exchange
        if let Some(rtt_us) = requests[1].rtt_usec() {
            self.buffer_control
                .drd_mut()
                .new_value(rtt_us as f64 / 1000., true, 0.);
        }

        let rate = self.target_rate();
        self.interest_control
            .initialize(rate, self.config.pipeline_size, self.buffer_control.drd());
        self.latency_control.target_rate_update(rate);
        self.playback_queue.lock().update_packet_rate(rate);
        self.playout_control.set_threshold(
            self.latency_control
                .playout_threshold_ms(self.buffer_control.drd()),
        );
        self.rtx_controller.set_enabled(true);

        if let Some(pointer) = &self.latest_pointer {
            if let Some(last_frame) = pointer.get(0) {
                log::debug!(
                    "[Consumer] latest pointer names {}",
                    last_frame.name
                );
            }
        }
        log::debug!(
            "[Consumer] bootstrap done: rate {:.1}fps, drd {:.1}ms, pipeline {}",
            rate,
            self.buffer_control.drd().original_estimation_ms(),
            self.interest_control.pipeline_limit()
        );
    }

    fn start_fetching(&mut self) -> NdnRtcResult<()> {
        self.fetching = true;
        self.last_segment_ts_ms = clock::millis();
        let mut ctx = fsm_ctx!(self);
        self.pipeline_control.start(&mut ctx)
    }

    /// Configured override, `_live` framerate, or a conservative default.
    fn target_rate(&self) -> f64 {
        if self.config.playback_rate > 0. {
            self.config.playback_rate
        } else {
            self.live_meta
                .as_ref()
                .map(|m| m.framerate)
                .filter(|r| *r > 0.)
                .unwrap_or(30.)
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event loop
    // ─────────────────────────────────────────────────────────────────────

    async fn event_loop(&mut self) -> NdnRtcResult<()> {
        let mut starvation_check =
            tokio::time::interval(Duration::from_millis(self.config.starvation_window_ms / 4));
        let mut live_refresh =
            tokio::time::interval(Duration::from_millis(protocol::LIVE_META_REFRESH_MS));
        live_refresh.reset(); // the bootstrap just fetched it

        let mut rtx_tick = tokio::time::interval(Duration::from_millis(50));

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.shutdown();
                    return Ok(());
                }

                ev = self.face_events.recv() => match ev {
                    Some(ev) => self.route_face_event(ev),
                    None => {
                        self.shutdown();
                        return Err(NdnRtcError::InvalidState(
                            "face connection closed".to_string(),
                        ));
                    }
                },

                ev = self.validation_events.recv() => {
                    if let Some(ev) = ev {
                        self.route_validation_event(ev);
                    }
                }

                _ = starvation_check.tick() => self.check_starvation(),

                _ = live_refresh.tick() => self.refresh_live_meta(),

                _ = rtx_tick.tick() => {
                    #[cfg(feature = "rtx-tick")]
                    self.sweep_retransmissions();
                }
            }
        }
    }

    fn shutdown(&mut self) {
        log::info!("[Consumer] shutting down");
        log::debug!("[Consumer] final stats: {}", self.stats.snapshot_json());
        self.playout_control.allow_playout(false);
        let mut ctx = fsm_ctx!(self);
        self.pipeline_control.stop(&mut ctx);
        self.request_queue.reset();
        self.cancel.cancel();
    }

    fn check_starvation(&mut self) {
        if !self.fetching {
            return;
        }
        if !matches!(
            self.pipeline_control.state(),
            StateId::Chasing | StateId::Adjusting | StateId::Fetching
        ) {
            return;
        }
        let now = clock::millis();
        let silent_ms = now - self.last_segment_ts_ms;
        if silent_ms >= self.config.starvation_window_ms as i64 {
            log::warn!("[Consumer] starvation: no segments for {}ms", silent_ms);
            self.last_segment_ts_ms = now;
            let mut ctx = fsm_ctx!(self);
            self.pipeline_control
                .starvation(self.config.starvation_window_ms, &mut ctx);
        }
    }

    fn refresh_live_meta(&mut self) {
        if !self.fetching {
            return;
        }
        let interest = Interest::new(
            self.stream_prefix
                .clone()
                .append_str(NameComponents::LIVE),
        )
        .with_lifetime(self.config.interest_lifetime_ms)
        .with_must_be_fresh(true)
        .with_can_be_prefix(true);
        match DataRequest::new(interest) {
            Ok(request) => self.request_queue.enqueue_request(request),
            Err(e) => log::warn!("[Consumer] live refresh failed: {}", e),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Routing
    // ─────────────────────────────────────────────────────────────────────

    fn route_face_event(&mut self, event: FaceEvent) {
        match event {
            FaceEvent::Data { interest, data } => {
                if let Some(request) = self.request_queue.on_data(&interest, data) {
                    self.route_completed(request);
                }
            }
            FaceEvent::Timeout { interest } => {
                if let Some(request) = self.request_queue.on_timeout(&interest) {
                    let info = request.info().clone();
                    let mut ctx = fsm_ctx!(self);
                    self.pipeline_control.segment_timeout(&info, &mut ctx);
                }
            }
            FaceEvent::NetworkNack { interest, reason } => {
                if let Some(request) = self.request_queue.on_network_nack(&interest, reason) {
                    let info = request.info().clone();
                    let mut ctx = fsm_ctx!(self);
                    self.pipeline_control.segment_nack(&info, &mut ctx);
                }
            }
        }
    }

    fn route_completed(&mut self, request: Arc<DataRequest>) {
        let Some(packet) = request.packet() else {
            // app-nack or undecodable reply: nothing to route
            return;
        };
        match &*packet {
            NdnrtcPacket::Segment(wire) => self.route_segment(wire.clone()),
            NdnrtcPacket::Manifest(_) => {
                let info = request.reply_info();
                self.buffer.lock().request_fulfilled(&info);
                if let Some(data) = request.data() {
                    self.validator.manifest_arrived(info.sample_prefix(), data);
                }
            }
            NdnrtcPacket::FrameMeta { meta, .. } => {
                let info = request.reply_info();
                if let Err(e) = self.buffer.lock().meta_received(&info, meta.clone()) {
                    log::trace!("[Consumer] meta for inactive sample: {}", e);
                }
            }
            NdnrtcPacket::LiveMeta(meta) => {
                if let Some(data) = request.data() {
                    self.validator.packet_arrived(data);
                }
                self.apply_live_meta(meta.clone());
            }
            NdnrtcPacket::StreamMeta(meta) => {
                if let Some(data) = request.data() {
                    self.validator.packet_arrived(data);
                }
                self.rtx_controller.set_gop_size(meta.gop_size);
                self.stream_meta = Some(meta.clone());
            }
            NdnrtcPacket::Pointer(set) => {
                self.latest_pointer = Some(set.clone());
                self.stats.inc(Indicator::RdrPointerNum);
            }
        }
    }

    fn route_segment(&mut self, wire: WireSegment) {
        self.last_segment_ts_ms = clock::millis();
        let wire_info = wire.info.clone();
        let wire_paired = wire.header.as_video().map(|h| h.paired_sequence_no as i64);

        let arrival = match self.buffer_control.segment_arrived(wire, &self.buffer) {
            Ok(arrival) => arrival,
            Err(e) => {
                // not buffered (a rightmost answer, a released slot, a
                // previous epoch) - it still steers the state machine
                log::trace!("[Consumer] segment not buffered: {}", e);
                let mut ctx = fsm_ctx!(self);
                self.pipeline_control
                    .segment_arrived(&wire_info, wire_paired, &mut ctx);
                return;
            }
        };
        if arrival.receipt.discarded {
            return;
        }
        let info = arrival.receipt.segment_info.clone();

        if let Some((total, parity)) = arrival.geometry {
            self.sample_estimator
                .segment_arrived(arrival.receipt.sample_class, total, parity);
        }
        if let Some(rate) = arrival.sample_rate {
            self.apply_rate(rate);
        }
        if let Some(update) = arrival.drd_update {
            self.interest_control.on_drd_update(self.buffer_control.drd());
            let threshold = self
                .latency_control
                .on_drd_update(&update, self.buffer_control.drd());
            self.playout_control.set_threshold(threshold);
        }

        // the first segment of a sample closes one pipeline slot and feeds
        // the latest-data detector
        if arrival.receipt.old_state == SlotState::New {
            self.interest_control.sample_arrived();
            let command = self.latency_control.sample_arrived();
            if command != PipelineAdjust::KeepPipeline {
                self.pipeline_control
                    .need_pipeline_adjustment(command, &mut self.interest_control);
            }
        }

        if arrival.receipt.became_ready {
            self.on_sample_ready(&arrival.receipt.slot_name);
        }

        self.sweep_retransmissions();

        let mut ctx = fsm_ctx!(self);
        self.pipeline_control
            .segment_arrived(&info, arrival.paired_sequence_no, &mut ctx);
    }

    fn on_sample_ready(&mut self, slot_name: &Name) {
        self.playback_queue.lock().on_sample_ready(slot_name);
        {
            let mut buffer = self.buffer.lock();
            let validator = &self.validator;
            let stats = &self.stats;
            buffer.with_slot(slot_name, |slot| {
                validator.verify_slot(slot);
                if let Some(header) = slot.common_header() {
                    stats.set(
                        Indicator::LatencyEstimated,
                        clock::millis_since_epoch() as f64 - header.publish_unix_timestamp_ms,
                    );
                }
            });
        }
        self.playout_control.on_new_sample_ready();
    }

    fn sweep_retransmissions(&mut self) {
        let min_drd = self
            .buffer_control
            .drd()
            .original_estimation_ms()
            .min(self.buffer_control.drd().cached_estimation_ms());
        let buffer = Arc::clone(&self.buffer);
        let interests = self
            .rtx_controller
            .check_retransmissions(min_drd, move |name| {
                let mut b = buffer.lock();
                b.with_slot(name, |slot| SlotView {
                    state: slot.state(),
                    pending_interests: slot.pending_interests(),
                })
            });
        if !interests.is_empty() {
            let mut ctx = fsm_ctx!(self);
            self.pipeline_control
                .retransmission_required(interests, &mut ctx);
        }
    }

    fn route_validation_event(&mut self, event: ValidationEvent) {
        match event {
            ValidationEvent::Manifest {
                slot_name,
                content,
                trusted,
            } => {
                let mut buffer = self.buffer.lock();
                let validator = &self.validator;
                buffer.with_slot(&slot_name, |slot| {
                    validator.apply_manifest(slot, content, trusted);
                });
            }
            ValidationEvent::Packet { name, trusted } => {
                if !trusted {
                    log::warn!("[Consumer] packet {} failed verification", name);
                }
            }
        }
    }

    fn apply_live_meta(&mut self, meta: LiveMeta) {
        self.sample_estimator.bootstrap(&meta);
        self.stats
            .set(Indicator::CurrentProducerFramerate, meta.framerate);
        self.live_meta = Some(meta);
        let rate = self.target_rate();
        self.apply_rate(rate);
    }

    fn apply_rate(&mut self, rate: f64) {
        if rate <= 0. {
            return;
        }
        let rate = if self.config.playback_rate > 0. {
            self.config.playback_rate
        } else {
            rate
        };
        self.playback_queue.lock().update_packet_rate(rate);
        self.latency_control.target_rate_update(rate);
        self.interest_control
            .target_rate_update(rate, self.buffer_control.drd());
    }
}

// stream_type participates in machine/name-scheme selection at build time;
// keep it observable for diagnostics
impl Consumer {
    pub fn stream_type(&self) -> StreamType {
        self.stream_type
    }

    pub fn stream_prefix(&self) -> &Name {
        &self.stream_prefix
    }

    /// True while segments keep arriving within the starvation window.
    pub fn is_fetching(&self) -> bool {
        self.fetching
    }

    /// Last seen `_latest` delegation set.
    pub fn latest_pointer(&self) -> Option<&DelegationSet> {
        self.latest_pointer.as_ref()
    }

    /// Stream metadata, once fetched.
    pub fn stream_meta(&self) -> Option<&StreamMeta> {
        self.stream_meta.as_ref()
    }

    /// Most recent `_live` metadata.
    pub fn live_meta(&self) -> Option<&LiveMeta> {
        self.live_meta.as_ref()
    }
}
