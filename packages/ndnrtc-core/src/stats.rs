//! Process-wide statistics storage.
//!
//! A [`StatisticsStorage`] is a shared map of [`Indicator`] → value that
//! every component updates in place. Consumers of the numbers (the fetch
//! tool's CSV writer, log snapshots) read the map without coordinating with
//! writers.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

/// Statistic indicators maintained by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Indicator {
    // consumer
    Timestamp,
    AcquiredNum,
    AcquiredKeyNum,
    DroppedNum,
    AssembledNum,
    AssembledKeyNum,
    RecoveredNum,
    RecoveredKeyNum,
    IncompleteNum,
    BufferTargetSize,
    BufferPlayableSize,
    CurrentProducerFramerate,
    VerifySuccess,
    VerifyFailure,
    LatencyControlStable,
    LatencyControlCommand,
    PlayedNum,
    PlayedKeyNum,
    SkippedNum,
    LatencyEstimated,
    SegmentsDeltaAvgNum,
    SegmentsKeyAvgNum,
    SegmentsDeltaParityAvgNum,
    SegmentsKeyParityAvgNum,
    RtxNum,
    RebufferingsNum,
    RequestedNum,
    RequestedKeyNum,
    PipelineLimit,
    PipelineSize,
    SegmentsReceivedNum,
    TimeoutsNum,
    NacksNum,
    AppNackNum,
    BytesReceived,
    RawBytesReceived,
    State,
    DrdOriginalEstimation,
    DrdCachedEstimation,
    QueueSize,
    InterestsSentNum,
    OutOfOrderNum,
    // producer
    BytesPublished,
    FecBytesPublished,
    RawBytesPublished,
    PublishedSegmentsNum,
    FecPublishedSegmentsNum,
    ProcessedNum,
    PublishedNum,
    PublishedKeyNum,
    SignNum,
    RdrPointerNum,
    PublishDelay,
    CodecDelay,
    FrameSizeEstimate,
    SegnumEstimate,
}

impl Indicator {
    /// Short column name used in CSV output.
    pub fn abbreviation(&self) -> &'static str {
        use Indicator::*;
        match self {
            Timestamp => "ts",
            AcquiredNum => "acq",
            AcquiredKeyNum => "acqK",
            DroppedNum => "drop",
            AssembledNum => "asm",
            AssembledKeyNum => "asmK",
            RecoveredNum => "rec",
            RecoveredKeyNum => "recK",
            IncompleteNum => "inc",
            BufferTargetSize => "bufTar",
            BufferPlayableSize => "bufPlay",
            CurrentProducerFramerate => "fps",
            VerifySuccess => "vOk",
            VerifyFailure => "vFail",
            LatencyControlStable => "lcStable",
            LatencyControlCommand => "lcCmd",
            PlayedNum => "play",
            PlayedKeyNum => "playK",
            SkippedNum => "skip",
            LatencyEstimated => "lat",
            SegmentsDeltaAvgNum => "segD",
            SegmentsKeyAvgNum => "segK",
            SegmentsDeltaParityAvgNum => "segDP",
            SegmentsKeyParityAvgNum => "segKP",
            RtxNum => "rtx",
            RebufferingsNum => "rebuf",
            RequestedNum => "req",
            RequestedKeyNum => "reqK",
            PipelineLimit => "w",
            PipelineSize => "lambda",
            SegmentsReceivedNum => "segRecv",
            TimeoutsNum => "tout",
            NacksNum => "nack",
            AppNackNum => "appNack",
            BytesReceived => "bytes",
            RawBytesReceived => "rawBytes",
            State => "state",
            DrdOriginalEstimation => "drdOrig",
            DrdCachedEstimation => "drdCach",
            QueueSize => "qsz",
            InterestsSentNum => "isent",
            OutOfOrderNum => "ooo",
            BytesPublished => "pubBytes",
            FecBytesPublished => "pubFecBytes",
            RawBytesPublished => "pubRawBytes",
            PublishedSegmentsNum => "pubSeg",
            FecPublishedSegmentsNum => "pubFecSeg",
            ProcessedNum => "proc",
            PublishedNum => "pub",
            PublishedKeyNum => "pubK",
            SignNum => "sign",
            RdrPointerNum => "rdr",
            PublishDelay => "pubDelay",
            CodecDelay => "codecDelay",
            FrameSizeEstimate => "fsizeEst",
            SegnumEstimate => "segnumEst",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// Shared indicator map. Cloning shares the underlying storage.
#[derive(Debug, Clone, Default)]
pub struct StatisticsStorage {
    values: Arc<DashMap<Indicator, f64>>,
}

impl StatisticsStorage {
    /// Storage pre-seeded with the consumer indicator set.
    pub fn consumer() -> Self {
        use Indicator::*;
        let s = StatisticsStorage::default();
        for i in [
            Timestamp,
            AcquiredNum,
            AcquiredKeyNum,
            DroppedNum,
            AssembledNum,
            AssembledKeyNum,
            RecoveredNum,
            RecoveredKeyNum,
            IncompleteNum,
            BufferTargetSize,
            BufferPlayableSize,
            CurrentProducerFramerate,
            VerifySuccess,
            VerifyFailure,
            LatencyControlStable,
            LatencyControlCommand,
            PlayedNum,
            PlayedKeyNum,
            SkippedNum,
            LatencyEstimated,
            SegmentsDeltaAvgNum,
            SegmentsKeyAvgNum,
            SegmentsDeltaParityAvgNum,
            SegmentsKeyParityAvgNum,
            RtxNum,
            RebufferingsNum,
            RequestedNum,
            RequestedKeyNum,
            PipelineLimit,
            PipelineSize,
            SegmentsReceivedNum,
            TimeoutsNum,
            NacksNum,
            AppNackNum,
            BytesReceived,
            RawBytesReceived,
            State,
            DrdOriginalEstimation,
            DrdCachedEstimation,
            QueueSize,
            InterestsSentNum,
            OutOfOrderNum,
        ] {
            s.values.insert(i, 0.);
        }
        s
    }

    /// Storage pre-seeded with the producer indicator set.
    pub fn producer() -> Self {
        use Indicator::*;
        let s = StatisticsStorage::default();
        for i in [
            Timestamp,
            BytesPublished,
            FecBytesPublished,
            RawBytesPublished,
            PublishedSegmentsNum,
            FecPublishedSegmentsNum,
            ProcessedNum,
            DroppedNum,
            PublishedNum,
            PublishedKeyNum,
            SignNum,
            RdrPointerNum,
            PublishDelay,
            CodecDelay,
            CurrentProducerFramerate,
            FrameSizeEstimate,
            SegnumEstimate,
        ] {
            s.values.insert(i, 0.);
        }
        s
    }

    pub fn set(&self, indicator: Indicator, value: f64) {
        self.values.insert(indicator, value);
    }

    pub fn add(&self, indicator: Indicator, delta: f64) {
        *self.values.entry(indicator).or_insert(0.) += delta;
    }

    pub fn inc(&self, indicator: Indicator) {
        self.add(indicator, 1.);
    }

    pub fn get(&self, indicator: Indicator) -> f64 {
        self.values.get(&indicator).map(|v| *v).unwrap_or(0.)
    }

    /// Snapshot of all indicators, sorted by column name for stable output.
    pub fn snapshot(&self) -> Vec<(Indicator, f64)> {
        let mut all: Vec<(Indicator, f64)> =
            self.values.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_by_key(|(i, _)| i.abbreviation());
        all
    }

    /// One-line JSON rendering of the snapshot, for teardown logs.
    pub fn snapshot_json(&self) -> String {
        let map: serde_json::Map<String, serde_json::Value> = self
            .snapshot()
            .into_iter()
            .map(|(i, v)| (i.abbreviation().to_string(), serde_json::json!(v)))
            .collect();
        serde_json::Value::Object(map).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_accumulate() {
        let s = StatisticsStorage::consumer();
        s.inc(Indicator::RtxNum);
        s.inc(Indicator::RtxNum);
        s.add(Indicator::BytesReceived, 100.);
        assert_eq!(s.get(Indicator::RtxNum), 2.);
        assert_eq!(s.get(Indicator::BytesReceived), 100.);
    }

    #[test]
    fn clones_share_storage() {
        let a = StatisticsStorage::consumer();
        let b = a.clone();
        b.inc(Indicator::TimeoutsNum);
        assert_eq!(a.get(Indicator::TimeoutsNum), 1.);
    }

    #[test]
    fn snapshot_is_sorted_and_complete() {
        let s = StatisticsStorage::producer();
        let snap = s.snapshot();
        assert!(snap.len() >= 15);
        let cols: Vec<&str> = snap.iter().map(|(i, _)| i.abbreviation()).collect();
        let mut sorted = cols.clone();
        sorted.sort();
        assert_eq!(cols, sorted);
    }
}
