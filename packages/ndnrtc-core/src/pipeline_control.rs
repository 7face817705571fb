//! The pipeline-control state machine.
//!
//! Orchestrates the startup handshake and steady-state adaptation:
//!
//! ```text
//! IDLE --|start|--> WAITFORRIGHTMOST --|segment|--> WAITFORINITIAL -|segment|-+
//!                                                                            |
//!                 +-- ADJUSTING <--|latest data arrives|-- CHASING <---------+
//!                 |
//!                 +--|minimized pipeline|--> FETCHING
//! ```
//!
//! Transitions are table-driven (`{state, event} → state`); state entry
//! actions are functions over a [`PipelineControlContext`] bundling the
//! collaborators. A per-epoch sequence latch keeps stale samples from an
//! earlier run from steering the current one.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::buffer::Buffer;
use crate::clock;
use crate::error::NdnRtcResult;
use crate::interest_control::InterestControl;
use crate::latency_control::{LatencyControl, PipelineAdjust};
use crate::name::Name;
use crate::namespace::{NamespaceInfo, SampleClass};
use crate::pipeliner::{Pipeliner, PipelinerBatch, SequenceCounter};
use crate::playback_queue::PlaybackQueue;
use crate::playout_control::PlayoutControl;
use crate::protocol::RTX_DEADLINE_MS;
use crate::request::{DeadlinePriority, RequestQueue};
use crate::rtx_controller::RtxController;
use crate::sample_estimator::SampleEstimator;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::Interest;

/// Machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StateId {
    Idle,
    WaitForRightmost,
    WaitForInitial,
    Chasing,
    Adjusting,
    Fetching,
}

impl StateId {
    fn name(&self) -> &'static str {
        match self {
            StateId::Idle => "Idle",
            StateId::WaitForRightmost => "WaitForRightmost",
            StateId::WaitForInitial => "WaitForInitial",
            StateId::Chasing => "Chasing",
            StateId::Adjusting => "Adjusting",
            StateId::Fetching => "Fetching",
        }
    }
}

/// Machine events.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Start,
    Reset,
    Starvation {
        duration_ms: u64,
    },
    Segment {
        info: NamespaceInfo,
        /// `paired_sequence_no` from the video segment header: the delta
        /// sequence paired with a key sample.
        paired_sequence_no: Option<i64>,
    },
    Timeout {
        info: NamespaceInfo,
    },
    Nack {
        info: NamespaceInfo,
    },
}

impl PipelineEvent {
    fn label(&self) -> &'static str {
        match self {
            PipelineEvent::Start => "Start",
            PipelineEvent::Reset => "Reset",
            PipelineEvent::Starvation { .. } => "Starvation",
            PipelineEvent::Segment { .. } => "Segment",
            PipelineEvent::Timeout { .. } => "Timeout",
            PipelineEvent::Nack { .. } => "Nack",
        }
    }
}

/// Everything the machine drives, borrowed for one dispatch.
pub struct PipelineControlContext<'a> {
    pub thread_prefix: &'a Name,
    pub buffer: &'a Arc<Mutex<Buffer>>,
    pub playback_queue: &'a Arc<Mutex<PlaybackQueue>>,
    pub pipeliner: &'a mut Pipeliner,
    pub sample_estimator: &'a SampleEstimator,
    pub interest_control: &'a mut InterestControl,
    pub latency_control: &'a mut LatencyControl,
    pub playout_control: &'a PlayoutControl,
    pub request_queue: &'a mut RequestQueue,
    pub rtx_controller: &'a mut RtxController,
}

impl<'a> PipelineControlContext<'a> {
    /// Dispatches a built batch: slots into the buffer (rightmost Interests
    /// skip it), registers the retransmission deadline, and enqueues onto
    /// the face.
    pub fn express(&mut self, batch: PipelinerBatch) -> NdnRtcResult<()> {
        let lifetime = batch
            .requests
            .first()
            .map(|r| r.interest().lifetime_ms as i64)
            .unwrap_or(0);

        if !batch.is_rightmost {
            let event = {
                let mut buffer = self.buffer.lock();
                buffer.requested(&batch.requests)?
            };
            if event.is_new_slot {
                let (queued_ms, period) = {
                    let q = self.playback_queue.lock();
                    (q.size_ms() + q.pending_size_ms(), q.sample_period())
                };
                self.rtx_controller.on_new_request(
                    &event.slot_name,
                    batch.sample_class,
                    queued_ms,
                    period,
                );
            }
        }
        self.request_queue
            .enqueue_requests(batch.requests, DeadlinePriority::from_now(lifetime));
        Ok(())
    }

    /// Keeps issuing batches while the interest control has room.
    fn fill_pipeline(&mut self) {
        while self.interest_control.increment() {
            match self
                .pipeliner
                .next_batch(self.thread_prefix, self.sample_estimator)
            {
                Ok(batch) => {
                    if let Err(e) = self.express(batch) {
                        log::warn!("[PipelineControl] express failed: {}", e);
                        self.interest_control.decrement();
                        break;
                    }
                }
                Err(e) => {
                    log::warn!("[PipelineControl] batch build failed: {}", e);
                    self.interest_control.decrement();
                    break;
                }
            }
        }
    }

    fn express_current(&mut self) {
        match self
            .pipeliner
            .express(self.thread_prefix, self.sample_estimator)
        {
            Ok(batch) => {
                if let Err(e) = self.express(batch) {
                    log::warn!("[PipelineControl] express failed: {}", e);
                }
            }
            Err(e) => log::warn!("[PipelineControl] express failed: {}", e),
        }
    }
}

/// Table-driven state machine.
pub struct PipelineControlStateMachine {
    state: StateId,
    video: bool,
    n_timeouts: u32,
    pipeline_lower_limit: usize,
    last_event_ts_ms: i64,
    stats: StatisticsStorage,
}

impl PipelineControlStateMachine {
    /// Machine for audio consumers: initial data is whatever the rightmost
    /// answer names.
    pub fn default_machine(stats: StatisticsStorage) -> Self {
        Self::new(false, stats)
    }

    /// Machine for video consumers: rightmost and initial data target the
    /// Key namespace, and the paired delta sequence is learned from the key
    /// sample's segment header.
    pub fn video_machine(stats: StatisticsStorage) -> Self {
        Self::new(true, stats)
    }

    fn new(video: bool, stats: StatisticsStorage) -> Self {
        PipelineControlStateMachine {
            state: StateId::Idle,
            video,
            n_timeouts: 0,
            pipeline_lower_limit: 0,
            last_event_ts_ms: clock::millis(),
            stats,
        }
    }

    pub fn state(&self) -> StateId {
        self.state
    }

    /// `{state, event} → state` pairs with no handler logic: the global
    /// reset/starvation rules.
    fn table_transition(&self, event: &PipelineEvent) -> Option<StateId> {
        use PipelineEvent::*;
        use StateId::*;
        match (self.state, event) {
            (Idle, Start) => Some(WaitForRightmost),
            (WaitForRightmost, Reset)
            | (WaitForInitial, Reset)
            | (Chasing, Reset)
            | (Adjusting, Reset)
            | (Fetching, Reset) => Some(Idle),
            (Chasing, Starvation { .. })
            | (Adjusting, Starvation { .. })
            | (Fetching, Starvation { .. }) => Some(Idle),
            _ => None,
        }
    }

    /// Dispatches one event. Returns the state the machine ended in.
    pub fn dispatch(&mut self, event: &PipelineEvent, ctx: &mut PipelineControlContext) -> StateId {
        let next = self
            .handle(event, ctx)
            .or_else(|| self.table_transition(event));

        if let Some(next) = next {
            if next != self.state {
                self.switch_to(next, event, ctx);
            }
        }
        self.state
    }

    /// State-specific event handling; `Some(next)` requests a transition.
    fn handle(
        &mut self,
        event: &PipelineEvent,
        ctx: &mut PipelineControlContext,
    ) -> Option<StateId> {
        use PipelineEvent::*;
        match (self.state, event) {
            (StateId::WaitForRightmost, Segment { info, .. }) => {
                self.received_rightmost(info, ctx);
                Some(StateId::WaitForInitial)
            }
            (StateId::WaitForRightmost, Timeout { .. }) => {
                // re-issue the rightmost Interest
                ctx.pipeliner.set_need_rightmost();
                if self.video {
                    ctx.pipeliner.set_need_sample(SampleClass::Key);
                }
                ctx.express_current();
                None
            }

            (StateId::WaitForInitial, Segment {
                info,
                paired_sequence_no,
            }) => {
                self.n_timeouts = 0;
                if self.video {
                    if let Some(paired) = paired_sequence_no {
                        ctx.pipeliner
                            .set_sequence_number((*paired).max(0) as u64, SampleClass::Delta);
                    }
                    if info.has_seq_no {
                        ctx.pipeliner
                            .set_sequence_number(info.sample_no + 1, SampleClass::Key);
                    }
                }
                ctx.fill_pipeline();
                Some(StateId::Chasing)
            }
            (StateId::WaitForInitial, Timeout { info }) => {
                self.n_timeouts += 1;
                if self.n_timeouts > 3 {
                    return Some(StateId::Idle);
                }
                // re-express the timed-out sample without advancing counters
                let class = self.resolve_class(info.sample_class);
                if info.has_seq_no {
                    match ctx.pipeliner.batch_for(
                        ctx.thread_prefix,
                        class,
                        info.sample_no,
                        ctx.sample_estimator,
                    ) {
                        Ok(batch) => {
                            if let Err(e) = ctx.express(batch) {
                                log::warn!("[PipelineControl] re-express failed: {}", e);
                            }
                        }
                        Err(e) => log::warn!("[PipelineControl] re-express failed: {}", e),
                    }
                } else {
                    ctx.pipeliner.set_need_sample(class);
                    ctx.express_current();
                }
                None
            }

            (StateId::Chasing, Segment { .. }) => {
                ctx.fill_pipeline();
                if ctx.latency_control.current_command() == PipelineAdjust::DecreasePipeline {
                    return Some(StateId::Adjusting);
                }
                None
            }

            (StateId::Adjusting, Segment { .. }) => {
                ctx.fill_pipeline();
                match ctx.latency_control.current_command() {
                    PipelineAdjust::IncreasePipeline => {
                        ctx.interest_control
                            .mark_lower_limit(self.pipeline_lower_limit);
                        Some(StateId::Fetching)
                    }
                    PipelineAdjust::DecreasePipeline => {
                        self.pipeline_lower_limit = ctx.interest_control.pipeline_limit();
                        None
                    }
                    PipelineAdjust::KeepPipeline => None,
                }
            }

            (StateId::Fetching, Segment { .. }) => {
                ctx.fill_pipeline();
                if ctx.latency_control.current_command() == PipelineAdjust::IncreasePipeline {
                    // catch-up lost: minimize again
                    return Some(StateId::Adjusting);
                }
                None
            }

            _ => None,
        }
    }

    /// Generalized-object names carry no class component; the video machine
    /// targets the key namespace for handshake samples.
    fn resolve_class(&self, class: SampleClass) -> SampleClass {
        match class {
            SampleClass::Unknown if self.video => SampleClass::Key,
            SampleClass::Unknown => SampleClass::Delta,
            known => known,
        }
    }

    fn received_rightmost(&mut self, info: &NamespaceInfo, ctx: &mut PipelineControlContext) {
        let class = self.resolve_class(info.sample_class);
        if info.has_seq_no {
            ctx.pipeliner.set_sequence_number(info.sample_no + 1, class);
        }
        ctx.pipeliner.set_need_sample(class);
        match ctx
            .pipeliner
            .next_batch(ctx.thread_prefix, ctx.sample_estimator)
        {
            Ok(batch) => {
                if let Err(e) = ctx.express(batch) {
                    log::warn!("[PipelineControl] initial express failed: {}", e);
                }
            }
            Err(e) => log::warn!("[PipelineControl] initial express failed: {}", e),
        }
        ctx.interest_control.increment();
    }

    fn switch_to(
        &mut self,
        next: StateId,
        event: &PipelineEvent,
        ctx: &mut PipelineControlContext,
    ) {
        let now = clock::millis();
        let elapsed = now - self.last_event_ts_ms;
        self.last_event_ts_ms = now;
        log::info!(
            "[StateMachine] [{}]-({})->[{}] {}ms",
            self.state.name(),
            event.label(),
            next.name(),
            elapsed
        );

        self.state = next;
        self.enter(ctx);
        if matches!(event, PipelineEvent::Starvation { .. }) {
            self.stats.inc(Indicator::RebufferingsNum);
        }
        self.stats.set(Indicator::State, self.state as u8 as f64);
    }

    fn enter(&mut self, ctx: &mut PipelineControlContext) {
        match self.state {
            StateId::Idle => {
                ctx.buffer.lock().reset();
                ctx.playback_queue.lock().reset();
                ctx.pipeliner.reset();
                ctx.latency_control.reset();
                ctx.interest_control.reset();
                ctx.rtx_controller.reset();
                ctx.playout_control.allow_playout(false);
            }
            StateId::WaitForRightmost => {
                ctx.pipeliner.set_need_rightmost();
                if self.video {
                    ctx.pipeliner.set_need_sample(SampleClass::Key);
                }
                ctx.express_current();
            }
            StateId::WaitForInitial => {
                self.n_timeouts = 0;
            }
            StateId::Adjusting => {
                self.pipeline_lower_limit = ctx.interest_control.pipeline_limit();
                ctx.playout_control.allow_playout(true);
            }
            StateId::Chasing | StateId::Fetching => {}
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────────────────

/// Wraps the machine with the per-epoch sequence latch and restart logic.
pub struct PipelineControl {
    machine: PipelineControlStateMachine,
    sample_latch: SequenceCounter,
    stats: StatisticsStorage,
}

impl PipelineControl {
    pub fn new(machine: PipelineControlStateMachine, stats: StatisticsStorage) -> Self {
        PipelineControl {
            machine,
            sample_latch: SequenceCounter::default(),
            stats,
        }
    }

    pub fn state(&self) -> StateId {
        self.machine.state()
    }

    pub fn start(&mut self, ctx: &mut PipelineControlContext) -> NdnRtcResult<()> {
        if self.machine.state() != StateId::Idle {
            return Err(crate::error::NdnRtcError::InvalidState(
                "pipeline control has started already; reset first".to_string(),
            ));
        }
        self.machine.dispatch(&PipelineEvent::Start, ctx);
        log::debug!("[PipelineControl] started");
        Ok(())
    }

    pub fn stop(&mut self, ctx: &mut PipelineControlContext) {
        self.machine.dispatch(&PipelineEvent::Reset, ctx);
        log::debug!("[PipelineControl] stopped");
    }

    /// Feeds a sample segment arrival, subject to the epoch latch.
    pub fn segment_arrived(
        &mut self,
        info: &NamespaceInfo,
        paired_sequence_no: Option<i64>,
        ctx: &mut PipelineControlContext,
    ) {
        if !self.passes_latch(info) {
            return;
        }
        self.machine.dispatch(
            &PipelineEvent::Segment {
                info: info.clone(),
                paired_sequence_no,
            },
            ctx,
        );
    }

    pub fn segment_timeout(&mut self, info: &NamespaceInfo, ctx: &mut PipelineControlContext) {
        if !self.passes_latch(info) {
            return;
        }
        let before = self.machine.state();
        let counters = ctx.pipeliner.sequence_counter();
        self.machine
            .dispatch(&PipelineEvent::Timeout { info: info.clone() }, ctx);
        // a timeout during the handshake invalidates the latched epoch
        let latch = if matches!(
            before,
            StateId::WaitForRightmost | StateId::WaitForInitial
        ) {
            self.sample_latch = SequenceCounter::default();
            SequenceCounter::default()
        } else {
            counters
        };
        self.maybe_restart(latch, ctx);
    }

    pub fn segment_nack(&mut self, info: &NamespaceInfo, ctx: &mut PipelineControlContext) {
        if !self.passes_latch(info) {
            return;
        }
        self.machine
            .dispatch(&PipelineEvent::Nack { info: info.clone() }, ctx);
    }

    /// No segment arrivals for the starvation window: restart from Idle.
    pub fn starvation(&mut self, duration_ms: u64, ctx: &mut PipelineControlContext) {
        // the counters must be read before Idle entry resets the pipeliner
        let counters = ctx.pipeliner.sequence_counter();
        self.machine
            .dispatch(&PipelineEvent::Starvation { duration_ms }, ctx);
        self.maybe_restart(counters, ctx);
    }

    /// Applies a latency-control command to the interest control. Returns
    /// true when the command changed the pipeline.
    pub fn need_pipeline_adjustment(
        &mut self,
        command: PipelineAdjust,
        interest_control: &mut InterestControl,
    ) -> bool {
        match command {
            PipelineAdjust::IncreasePipeline => interest_control.burst(),
            PipelineAdjust::DecreasePipeline => interest_control.withhold(),
            PipelineAdjust::KeepPipeline => false,
        }
    }

    /// Re-expresses deadline-breached Interests, once the machine is past
    /// the handshake.
    pub fn retransmission_required(
        &mut self,
        interests: Vec<Interest>,
        ctx: &mut PipelineControlContext,
    ) {
        if self.machine.state() < StateId::Chasing || interests.is_empty() {
            return;
        }
        log::debug!(
            "[PipelineControl] retransmission for {} interests",
            interests.len()
        );
        let mut requests = vec![];
        for interest in interests {
            match crate::request::DataRequest::new(interest.refreshed()) {
                Ok(r) => requests.push(r),
                Err(e) => log::warn!("[PipelineControl] bad rtx interest: {}", e),
            }
        }
        if requests.is_empty() {
            return;
        }
        if let Ok(event) = ctx.buffer.lock().requested(&requests) {
            log::trace!("[PipelineControl] rtx slot {}", event.slot_name);
        }
        ctx.request_queue
            .enqueue_requests(requests, DeadlinePriority::from_now(RTX_DEADLINE_MS));
        self.stats.inc(Indicator::OutOfOrderNum);
    }

    /// Only samples at or past the latch steer the machine; older ones are
    /// echoes of a previous epoch.
    fn passes_latch(&self, info: &NamespaceInfo) -> bool {
        if !info.has_seq_no {
            return true;
        }
        let barrier = self.sample_latch.get(info.sample_class);
        if info.sample_no >= barrier {
            true
        } else {
            log::warn!(
                "[PipelineControl] sample {} below latch {}, ignored",
                info.sample_no,
                barrier
            );
            false
        }
    }

    /// After an involuntary drop to Idle, latch the pre-reset sequence
    /// numbers and start over.
    fn maybe_restart(&mut self, latch: SequenceCounter, ctx: &mut PipelineControlContext) {
        if self.machine.state() != StateId::Idle {
            return;
        }
        self.sample_latch = latch;
        log::info!(
            "[PipelineControl] reverted to Idle (latched {}d/{}k), starting over",
            self.sample_latch.delta,
            self.sample_latch.key
        );
        self.stats.inc(Indicator::RebufferingsNum);
        self.machine.dispatch(&PipelineEvent::Start, ctx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::SlotPool;
    use crate::config::ConsumerConfig;
    use crate::drd_estimator::DrdEstimator;
    use crate::interest_control::StrategyDefault;
    use crate::latency_control::ThresholdCoeffs;
    use crate::namespace::NameComponents;
    use crate::pipeliner::VideoNameScheme;
    use crate::playout_control::PlayoutCommand;
    use crate::transport::Face;
    use tokio::sync::mpsc;

    struct NullFace;
    impl Face for NullFace {
        fn express_interest(&mut self, _interest: &Interest) -> NdnRtcResult<()> {
            Ok(())
        }
    }

    /// All collaborators a dispatch needs, owned by the test.
    struct Harness {
        thread_prefix: Name,
        buffer: Arc<Mutex<Buffer>>,
        playback_queue: Arc<Mutex<PlaybackQueue>>,
        pipeliner: Pipeliner,
        sample_estimator: SampleEstimator,
        interest_control: InterestControl,
        latency_control: LatencyControl,
        playout_control: PlayoutControl,
        request_queue: RequestQueue,
        rtx_controller: RtxController,
        _playout_rx: mpsc::UnboundedReceiver<PlayoutCommand>,
    }

    impl Harness {
        fn new() -> Self {
            let stats = StatisticsStorage::consumer();
            let buffer = Arc::new(Mutex::new(Buffer::new(
                SlotPool::new(50),
                stats.clone(),
            )));
            let playback_queue = Arc::new(Mutex::new(PlaybackQueue::new(
                Arc::clone(&buffer),
                stats.clone(),
            )));
            let (tx, rx) = mpsc::unbounded_channel();
            let playout_control =
                PlayoutControl::new(tx, Arc::clone(&playback_queue), stats.clone());
            let mut interest_control =
                InterestControl::new(Box::new(StrategyDefault), stats.clone());
            let mut drd = DrdEstimator::new(150, 200);
            drd.new_value(75., true, 0.);
            interest_control.initialize(30., 0, &drd);
            let mut latency_control = LatencyControl::new(
                ThresholdCoeffs {
                    alpha: 2.,
                    beta: 4.,
                },
                stats.clone(),
            );
            latency_control.target_rate_update(30.);

            Harness {
                thread_prefix: NameComponents::video_stream_prefix(&Name::from("/prod"), "cam"),
                buffer,
                playback_queue,
                pipeliner: Pipeliner::new(
                    Box::new(VideoNameScheme { threaded: false }),
                    ConsumerConfig::default().interest_lifetime_ms,
                    true,
                    1,
                    stats.clone(),
                ),
                sample_estimator: SampleEstimator::new(stats.clone()),
                interest_control,
                latency_control,
                playout_control,
                request_queue: RequestQueue::new(Box::new(NullFace), stats.clone()),
                rtx_controller: RtxController::new(30, stats),
                _playout_rx: rx,
            }
        }

        fn ctx(&mut self) -> PipelineControlContext<'_> {
            PipelineControlContext {
                thread_prefix: &self.thread_prefix,
                buffer: &self.buffer,
                playback_queue: &self.playback_queue,
                pipeliner: &mut self.pipeliner,
                sample_estimator: &self.sample_estimator,
                interest_control: &mut self.interest_control,
                latency_control: &mut self.latency_control,
                playout_control: &self.playout_control,
                request_queue: &mut self.request_queue,
                rtx_controller: &mut self.rtx_controller,
            }
        }
    }

    fn segment_info(seq: u64) -> NamespaceInfo {
        let name = NameComponents::video_stream_prefix(&Name::from("/prod"), "cam")
            .append_sequence_number(seq)
            .append_segment(0);
        NameComponents::extract_info(&name).unwrap()
    }

    fn control() -> PipelineControl {
        PipelineControl::new(
            PipelineControlStateMachine::video_machine(StatisticsStorage::consumer()),
            StatisticsStorage::consumer(),
        )
    }

    #[tokio::test]
    async fn startup_walks_rightmost_initial_chasing() {
        let mut h = Harness::new();
        let mut pc = control();

        pc.start(&mut h.ctx()).unwrap();
        assert_eq!(pc.state(), StateId::WaitForRightmost);
        assert!(
            h.request_queue.pending_len() >= 1,
            "rightmost interest expressed on entry"
        );

        // rightmost answered with sample 123
        pc.segment_arrived(&segment_info(123), None, &mut h.ctx());
        assert_eq!(pc.state(), StateId::WaitForInitial);
        assert_eq!(
            h.pipeliner.sequence_number(SampleClass::Key),
            124,
            "next key sample follows the rightmost answer"
        );

        // initial key arrives, carrying its paired delta sequence
        pc.segment_arrived(&segment_info(124), Some(120), &mut h.ctx());
        assert_eq!(pc.state(), StateId::Chasing);
        assert!(
            h.pipeliner.sequence_number(SampleClass::Delta) >= 120,
            "delta sequence learned from the key's pairing header"
        );
        assert_eq!(
            h.interest_control.pipeline_size(),
            h.interest_control.pipeline_limit(),
            "chasing fills the pipeline to the limit"
        );
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let mut h = Harness::new();
        let mut pc = control();
        pc.start(&mut h.ctx()).unwrap();
        assert!(pc.start(&mut h.ctx()).is_err());
    }

    #[tokio::test]
    async fn rightmost_timeout_reissues_the_interest() {
        let mut h = Harness::new();
        let mut pc = control();
        pc.start(&mut h.ctx()).unwrap();
        let pending_before = h.request_queue.pending_len();

        let rightmost_info =
            NameComponents::extract_info(&h.thread_prefix.clone()).unwrap();
        pc.segment_timeout(&rightmost_info, &mut h.ctx());
        assert_eq!(pc.state(), StateId::WaitForRightmost);
        assert!(h.request_queue.pending_len() > pending_before);
    }

    #[tokio::test]
    async fn four_initial_timeouts_restart_from_idle() {
        let mut h = Harness::new();
        let mut pc = control();
        pc.start(&mut h.ctx()).unwrap();
        pc.segment_arrived(&segment_info(10), None, &mut h.ctx());
        assert_eq!(pc.state(), StateId::WaitForInitial);

        for _ in 0..4 {
            pc.segment_timeout(&segment_info(11), &mut h.ctx());
        }
        // the machine dropped to Idle and was restarted straight away
        assert_eq!(pc.state(), StateId::WaitForRightmost);
    }

    #[tokio::test]
    async fn chasing_moves_to_adjusting_on_decrease_command() {
        let mut h = Harness::new();
        let mut pc = control();
        pc.start(&mut h.ctx()).unwrap();
        pc.segment_arrived(&segment_info(10), None, &mut h.ctx());
        pc.segment_arrived(&segment_info(11), Some(8), &mut h.ctx());
        assert_eq!(pc.state(), StateId::Chasing);

        // fast cache-drain arrivals push latency control to Decrease
        let mut now = 0;
        for _ in 0..10 {
            h.latency_control.sample_arrived_at(now);
            now += 5;
        }
        assert_eq!(
            h.latency_control.current_command(),
            PipelineAdjust::DecreasePipeline
        );
        pc.segment_arrived(&segment_info(12), None, &mut h.ctx());
        assert_eq!(pc.state(), StateId::Adjusting, "caught-up signal adjusts");
    }

    #[tokio::test]
    async fn starvation_resets_and_restarts() {
        let mut h = Harness::new();
        let mut pc = control();
        pc.start(&mut h.ctx()).unwrap();
        pc.segment_arrived(&segment_info(50), None, &mut h.ctx());
        pc.segment_arrived(&segment_info(51), Some(48), &mut h.ctx());
        assert_eq!(pc.state(), StateId::Chasing);

        pc.starvation(500, &mut h.ctx());
        assert_eq!(
            pc.state(),
            StateId::WaitForRightmost,
            "starvation re-enters Idle then starts over"
        );
        // pipeline state was torn down on Idle entry
        assert_eq!(h.interest_control.pipeline_size(), 0);
    }

    #[tokio::test]
    async fn latch_suppresses_stale_epoch_samples() {
        let mut h = Harness::new();
        let mut pc = control();
        pc.start(&mut h.ctx()).unwrap();
        pc.segment_arrived(&segment_info(50), None, &mut h.ctx());
        pc.segment_arrived(&segment_info(51), Some(48), &mut h.ctx());

        pc.starvation(500, &mut h.ctx());
        assert_eq!(pc.state(), StateId::WaitForRightmost);

        // a stale sample from the previous epoch must not advance the
        // handshake
        pc.segment_arrived(&segment_info(10), None, &mut h.ctx());
        assert_eq!(pc.state(), StateId::WaitForRightmost, "stale sample latched out");

        // the live edge moved on; new samples pass
        pc.segment_arrived(&segment_info(60), None, &mut h.ctx());
        assert_eq!(pc.state(), StateId::WaitForInitial);
    }

    #[tokio::test]
    async fn adjustment_commands_drive_burst_and_withhold() {
        let mut h = Harness::new();
        let mut pc = control();
        let before = h.interest_control.pipeline_limit();
        assert!(pc.need_pipeline_adjustment(
            PipelineAdjust::IncreasePipeline,
            &mut h.interest_control
        ));
        assert!(h.interest_control.pipeline_limit() > before);

        assert!(!pc.need_pipeline_adjustment(
            PipelineAdjust::KeepPipeline,
            &mut h.interest_control
        ));
    }
}
