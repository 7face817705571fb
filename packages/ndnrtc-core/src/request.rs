//! Data requests and the priority Interest queue.
//!
//! A [`DataRequest`] tracks one Interest through its lifecycle
//! (`Created → Expressed → {Data | Timeout | NetworkNack | AppNack}`),
//! stamping request/reply times and firing per-status subscriptions exactly
//! once per transition. Exactly one terminal status is ever reached; stray
//! replies arriving afterwards are dropped with a trace.
//!
//! The [`RequestQueue`] orders outgoing requests by [`DeadlinePriority`]
//! (expected data arrival time; sooner sorts first, FIFO on ties) and drains
//! onto the face opportunistically after every enqueue.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock;
use crate::error::{NdnRtcError, NdnRtcResult};
use crate::estimators::{Average, Window};
use crate::name::Name;
use crate::namespace::{NameComponents, NamespaceInfo};
use crate::packets::NdnrtcPacket;
use crate::stats::{Indicator, StatisticsStorage};
use crate::transport::{ContentType, Data, Face, Interest, NackReason};

/// Sample sequence numbers.
pub type PacketNumber = u64;

/// Request lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    Created,
    Expressed,
    Timeout,
    AppNack,
    NetworkNack,
    Data,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Data
                | RequestStatus::Timeout
                | RequestStatus::NetworkNack
                | RequestStatus::AppNack
        )
    }
}

type OnRequestUpdate = Arc<dyn Fn(&DataRequest) + Send + Sync>;

struct RequestState {
    status: RequestStatus,
    request_ts_us: i64,
    reply_ts_us: i64,
    rtx_count: u32,
    timeout_count: u32,
    network_nack_count: u32,
    app_nack_count: u32,
    data: Option<Data>,
    nack_reason: Option<NackReason>,
    packet: Option<Arc<NdnrtcPacket>>,
    /// Namespace info of the reply's (possibly longer) name. A rightmost
    /// Interest names only the stream; the answer names a concrete segment.
    reply_info: Option<NamespaceInfo>,
    subscriptions: Vec<(RequestStatus, OnRequestUpdate)>,
}

/// One Interest in flight.
pub struct DataRequest {
    interest: Interest,
    info: NamespaceInfo,
    state: Mutex<RequestState>,
}

impl DataRequest {
    pub fn new(interest: Interest) -> NdnRtcResult<Arc<Self>> {
        let info = NameComponents::extract_info(&interest.name).map_err(|e| {
            NdnRtcError::BadName(format!(
                "cannot create request from {}: {}",
                interest.name, e
            ))
        })?;
        Ok(Arc::new(DataRequest {
            interest,
            info,
            state: Mutex::new(RequestState {
                status: RequestStatus::Created,
                request_ts_us: 0,
                reply_ts_us: 0,
                rtx_count: 0,
                timeout_count: 0,
                network_nack_count: 0,
                app_nack_count: 0,
                data: None,
                nack_reason: None,
                packet: None,
                reply_info: None,
                subscriptions: vec![],
            }),
        }))
    }

    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    pub fn name(&self) -> &Name {
        &self.interest.name
    }

    /// Namespace info of the Interest name.
    pub fn info(&self) -> &NamespaceInfo {
        &self.info
    }

    /// Namespace info of the reply when one arrived (a rightmost answer
    /// names a concrete segment), otherwise of the Interest.
    pub fn reply_info(&self) -> NamespaceInfo {
        self.state
            .lock()
            .reply_info
            .clone()
            .unwrap_or_else(|| self.info.clone())
    }

    pub fn status(&self) -> RequestStatus {
        self.state.lock().status
    }

    pub fn data(&self) -> Option<Data> {
        self.state.lock().data.clone()
    }

    pub fn packet(&self) -> Option<Arc<NdnrtcPacket>> {
        self.state.lock().packet.clone()
    }

    pub fn nack_reason(&self) -> Option<NackReason> {
        self.state.lock().nack_reason
    }

    pub fn request_ts_us(&self) -> i64 {
        self.state.lock().request_ts_us
    }

    pub fn reply_ts_us(&self) -> i64 {
        self.state.lock().reply_ts_us
    }

    pub fn timeout_count(&self) -> u32 {
        self.state.lock().timeout_count
    }

    pub fn rtx_count(&self) -> u32 {
        self.state.lock().rtx_count
    }

    /// Round-trip time in microseconds, or `None` before a reply.
    pub fn rtt_usec(&self) -> Option<i64> {
        let s = self.state.lock();
        (s.reply_ts_us > 0 && s.request_ts_us > 0).then(|| s.reply_ts_us - s.request_ts_us)
    }

    /// Subscribes to a status transition. The callback runs on the face
    /// task, once per transition into `status`.
    pub fn subscribe(
        &self,
        status: RequestStatus,
        on_update: impl Fn(&DataRequest) + Send + Sync + 'static,
    ) {
        self.state
            .lock()
            .subscriptions
            .push((status, Arc::new(on_update)));
    }

    // ── transitions, called by the RequestQueue ─────────────────────────

    fn mark_expressed(&self, is_rtx: bool) {
        {
            let mut s = self.state.lock();
            s.status = RequestStatus::Expressed;
            s.request_ts_us = clock::micros();
            s.reply_ts_us = 0;
            if is_rtx {
                s.rtx_count += 1;
            }
        }
        self.fire(RequestStatus::Expressed);
    }

    fn mark_data(&self, data: Data) -> RequestStatus {
        let status = {
            let mut s = self.state.lock();
            if s.status.is_terminal() {
                log::trace!("[DataRequest] late reply for {} ignored", self.name());
                return s.status;
            }
            s.reply_ts_us = clock::micros();
            let is_app_nack = data.meta_info.content_type == ContentType::Nack;
            if is_app_nack {
                s.app_nack_count += 1;
                s.status = RequestStatus::AppNack;
            } else {
                // classify by the reply's own name: it may extend the
                // Interest name (rightmost discovery)
                let reply_info = NameComponents::extract_info(&data.name)
                    .unwrap_or_else(|_| self.info.clone());
                match NdnrtcPacket::from_reply(&reply_info, &data, &self.interest) {
                    Ok(packet) => s.packet = Some(Arc::new(packet)),
                    Err(e) => {
                        // confined: the request still completes, consumers
                        // see a Data status with no decoded packet
                        log::warn!("[DataRequest] undecodable reply for {}: {}", self.name(), e);
                    }
                }
                s.reply_info = Some(reply_info);
                s.status = RequestStatus::Data;
            }
            s.data = Some(data);
            s.status
        };
        self.fire(status);
        status
    }

    fn mark_timeout(&self) -> RequestStatus {
        {
            let mut s = self.state.lock();
            if s.status.is_terminal() {
                return s.status;
            }
            s.reply_ts_us = clock::micros();
            s.timeout_count += 1;
            s.status = RequestStatus::Timeout;
        }
        self.fire(RequestStatus::Timeout);
        RequestStatus::Timeout
    }

    fn mark_network_nack(&self, reason: NackReason) -> RequestStatus {
        {
            let mut s = self.state.lock();
            if s.status.is_terminal() {
                return s.status;
            }
            s.reply_ts_us = clock::micros();
            s.network_nack_count += 1;
            s.nack_reason = Some(reason);
            s.status = RequestStatus::NetworkNack;
        }
        self.fire(RequestStatus::NetworkNack);
        RequestStatus::NetworkNack
    }

    fn fire(&self, status: RequestStatus) {
        // snapshot matching callbacks, then run them outside the state lock
        // so a subscriber may inspect the request or add subscriptions
        let callbacks: Vec<OnRequestUpdate> = {
            let s = self.state.lock();
            s.subscriptions
                .iter()
                .filter(|(st, _)| *st == status)
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };
        for cb in callbacks {
            cb(self);
        }
    }

    /// Fires `on_ready` once every request has reached `status`.
    pub fn invoke_when_all(
        requests: &[Arc<DataRequest>],
        status: RequestStatus,
        on_ready: impl Fn(&[Arc<DataRequest>]) + Send + Sync + 'static,
    ) {
        let total = requests.len();
        let reached = Arc::new(Mutex::new(vec![false; total]));
        let all: Vec<Arc<DataRequest>> = requests.to_vec();
        let on_ready = Arc::new(on_ready);

        for (i, r) in requests.iter().enumerate() {
            let reached = Arc::clone(&reached);
            let all = all.clone();
            let on_ready = Arc::clone(&on_ready);
            r.subscribe(status, move |_| {
                let complete = {
                    let mut flags = reached.lock();
                    flags[i] = true;
                    flags.iter().all(|f| *f)
                };
                if complete {
                    on_ready(&all);
                }
            });
        }
    }

    /// Fires `on_any` the first time any request reaches one of `statuses`.
    pub fn invoke_if_any(
        requests: &[Arc<DataRequest>],
        statuses: &[RequestStatus],
        on_any: impl Fn(&Arc<DataRequest>) + Send + Sync + 'static,
    ) {
        let fired = Arc::new(Mutex::new(false));
        let on_any = Arc::new(on_any);
        for r in requests {
            for status in statuses {
                let fired = Arc::clone(&fired);
                let on_any = Arc::clone(&on_any);
                let this = Arc::clone(r);
                r.subscribe(*status, move |_| {
                    let mut f = fired.lock();
                    if !*f {
                        *f = true;
                        on_any(&this);
                    }
                });
            }
        }
    }
}

impl std::fmt::Debug for DataRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DataRequest({}, {:?})", self.name(), self.status())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Priorities
// ─────────────────────────────────────────────────────────────────────────────

/// Priority by expected data arrival deadline: `enqueue time + arrival
/// delay`. Sooner deadlines dispatch first.
#[derive(Debug, Clone, Copy)]
pub struct DeadlinePriority {
    arrival_delay_ms: i64,
    enqueue_ts_ms: i64,
}

impl DeadlinePriority {
    pub fn from_now(arrival_delay_ms: i64) -> Self {
        DeadlinePriority {
            arrival_delay_ms,
            enqueue_ts_ms: clock::millis(),
        }
    }

    fn deadline_ms(&self) -> i64 {
        self.enqueue_ts_ms + self.arrival_delay_ms
    }
}

struct QueueEntry {
    request: Arc<DataRequest>,
    deadline_ms: i64,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline_ms == other.deadline_ms && self.seq == other.seq
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.deadline_ms, self.seq).cmp(&(other.deadline_ms, other.seq))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request queue
// ─────────────────────────────────────────────────────────────────────────────

/// Priority queue of requests, draining onto the face.
pub struct RequestQueue {
    face: Box<dyn Face>,
    queue: BinaryHeap<Reverse<QueueEntry>>,
    pending: HashMap<Name, Vec<Arc<DataRequest>>>,
    next_seq: u64,
    rtt_avg: Average,
    stats: StatisticsStorage,
}

impl RequestQueue {
    pub fn new(face: Box<dyn Face>, stats: StatisticsStorage) -> Self {
        RequestQueue {
            face,
            queue: BinaryHeap::new(),
            pending: HashMap::new(),
            next_seq: 0,
            rtt_avg: Average::new(Window::time(30_000)),
            stats,
        }
    }

    /// Enqueues with the default priority derived from the Interest
    /// lifetime.
    pub fn enqueue_request(&mut self, request: Arc<DataRequest>) {
        let lifetime = request.interest().lifetime_ms as i64;
        self.enqueue(request, DeadlinePriority::from_now(lifetime));
    }

    pub fn enqueue(&mut self, request: Arc<DataRequest>, priority: DeadlinePriority) {
        self.queue.push(Reverse(QueueEntry {
            request,
            deadline_ms: priority.deadline_ms(),
            seq: self.next_seq,
        }));
        self.next_seq += 1;
        self.drain();
    }

    pub fn enqueue_requests(&mut self, requests: Vec<Arc<DataRequest>>, priority: DeadlinePriority) {
        for r in requests {
            self.queue.push(Reverse(QueueEntry {
                request: r,
                deadline_ms: priority.deadline_ms(),
                seq: self.next_seq,
            }));
            self.next_seq += 1;
        }
        self.drain();
    }

    fn drain(&mut self) {
        while let Some(Reverse(entry)) = self.queue.pop() {
            let request = entry.request;
            // re-expression of an already-stamped request is a retransmission
            let is_rtx = request.request_ts_us() > 0;
            if let Err(e) = self.face.express_interest(request.interest()) {
                log::warn!("[RequestQueue] express failed for {}: {}", request.name(), e);
                continue;
            }
            request.mark_expressed(is_rtx);
            self.stats.inc(Indicator::InterestsSentNum);
            self.pending
                .entry(request.name().clone())
                .or_default()
                .push(request);
        }
        self.stats.set(Indicator::QueueSize, self.queue.len() as f64);
    }

    /// Routes a Data reply to its pending request. Returns the completed
    /// request for downstream dispatch.
    pub fn on_data(&mut self, interest: &Interest, data: Data) -> Option<Arc<DataRequest>> {
        let request = self.take_pending(interest)?;
        if let Some(rtt) = {
            request.mark_data(data.clone());
            request.rtt_usec()
        } {
            self.rtt_avg.new_value(rtt as f64);
        }
        self.stats
            .add(Indicator::RawBytesReceived, data.encode().len() as f64);
        self.stats
            .add(Indicator::BytesReceived, data.content.len() as f64);
        if request.status() == RequestStatus::AppNack {
            self.stats.inc(Indicator::AppNackNum);
        }
        Some(request)
    }

    pub fn on_timeout(&mut self, interest: &Interest) -> Option<Arc<DataRequest>> {
        let request = self.take_pending(interest)?;
        request.mark_timeout();
        self.stats.inc(Indicator::TimeoutsNum);
        Some(request)
    }

    pub fn on_network_nack(
        &mut self,
        interest: &Interest,
        reason: NackReason,
    ) -> Option<Arc<DataRequest>> {
        let request = self.take_pending(interest)?;
        request.mark_network_nack(reason);
        self.stats.inc(Indicator::NacksNum);
        Some(request)
    }

    /// Drops all queued entries without firing status events. Pending
    /// (already expressed) requests are forgotten; late replies for them are
    /// ignored.
    pub fn reset(&mut self) {
        self.queue.clear();
        self.pending.clear();
        self.stats.set(Indicator::QueueSize, 0.);
    }

    /// Average observed round-trip time, microseconds.
    pub fn rtt_estimate_usec(&self) -> f64 {
        self.rtt_avg.value()
    }

    /// Round-trip jitter (deviation), microseconds.
    pub fn rtt_jitter_usec(&self) -> f64 {
        self.rtt_avg.deviation()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(|v| v.len()).sum()
    }

    fn take_pending(&mut self, interest: &Interest) -> Option<Arc<DataRequest>> {
        let requests = self.pending.get_mut(&interest.name)?;
        let idx = requests
            .iter()
            .position(|r| r.interest().nonce == interest.nonce)
            .or_else(|| (!requests.is_empty()).then_some(0))?;
        let request = requests.remove(idx);
        if requests.is_empty() {
            self.pending.remove(&interest.name);
        }
        Some(request)
    }
}
