//! End-to-end behavior of the windowed snapshot rate limiter.

use laminar_ratelimit::checkpoint::{LimiterCheckpoint, PartitionSnapshot};
use laminar_ratelimit::time::{Clock, ManualClock, Scheduler};
use laminar_ratelimit::{
    CollectingSink, Event, FnSink, OutputSink, PartitionKey, RateLimiterConfig, SnapshotBatch,
    StreamEvent, Value, WindowedSnapshotRateLimiter,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Scheduler that records every re-arm and cancel request.
#[derive(Default)]
struct RecordingScheduler {
    calls: Mutex<Vec<(PartitionKey, i64)>>,
    cancels: Mutex<Vec<PartitionKey>>,
}

impl RecordingScheduler {
    fn calls(&self) -> Vec<(PartitionKey, i64)> {
        self.calls.lock().clone()
    }

    fn cancels(&self) -> Vec<PartitionKey> {
        self.cancels.lock().clone()
    }
}

impl Scheduler for RecordingScheduler {
    fn notify_at(&self, key: &PartitionKey, timestamp: i64) {
        self.calls.lock().push((key.clone(), timestamp));
    }

    fn cancel(&self, key: &PartitionKey) -> bool {
        self.cancels.lock().push(key.clone());
        false
    }
}

struct Harness {
    limiter: WindowedSnapshotRateLimiter,
    scheduler: Arc<RecordingScheduler>,
    clock: Arc<ManualClock>,
    sink: Arc<CollectingSink>,
}

fn harness(interval_ms: u64) -> Harness {
    let scheduler = Arc::new(RecordingScheduler::default());
    let clock = Arc::new(ManualClock::new(0));
    let limiter = WindowedSnapshotRateLimiter::new(
        &RateLimiterConfig::new(Duration::from_millis(interval_ms)).with_operator_id("snapshot_q"),
        Arc::clone(&scheduler) as Arc<dyn Scheduler>,
        Arc::clone(&clock) as Arc<dyn Clock>,
    )
    .unwrap();
    let sink = Arc::new(CollectingSink::new());
    limiter.subscribe(Arc::clone(&sink) as Arc<dyn OutputSink>);
    Harness {
        limiter,
        scheduler,
        clock,
        sink,
    }
}

fn row(sym: &str) -> Vec<Value> {
    vec![Value::from(sym)]
}

fn current(ts: i64, sym: &str) -> StreamEvent {
    Event::current(ts, row(sym)).into()
}

fn expired(ts: i64, sym: &str) -> StreamEvent {
    Event::expired(ts, row(sym)).into()
}

fn rows(batch: &SnapshotBatch) -> Vec<Vec<Value>> {
    batch.events.iter().map(|e| e.output_data.clone()).collect()
}

fn global_snapshot(h: &Harness) -> PartitionSnapshot {
    h.limiter
        .snapshot_partition(&PartitionKey::global())
        .unwrap()
}

#[test]
fn test_reference_scenario() {
    let h = harness(1000);
    let global = PartitionKey::global();

    h.limiter.on_partition_created(&global);
    assert_eq!(global_snapshot(&h).scheduled_time, Some(1000));

    // CURRENT@500: not due, joins the window.
    assert_eq!(h.limiter.process(vec![current(500, "A")]), 0);

    // CURRENT@1200: flushes [A] before appending B.
    assert_eq!(h.limiter.process(vec![current(1200, "B")]), 1);
    let batches = h.sink.drain();
    assert_eq!(rows(&batches[0]), vec![row("A")]);
    assert_eq!(batches[0].timestamp, 1200);
    assert_eq!(global_snapshot(&h).scheduled_time, Some(2000));

    // TIMER@2500: flushes [A, B].
    assert_eq!(h.limiter.fire_timer(&global, 2500), 1);
    let batches = h.sink.drain();
    assert_eq!(rows(&batches[0]), vec![row("A"), row("B")]);
    assert_eq!(global_snapshot(&h).scheduled_time, Some(3000));

    // EXPIRED@3100: flushes [A, B] before removing A.
    assert_eq!(h.limiter.process(vec![expired(3100, "A")]), 1);
    let batches = h.sink.drain();
    assert_eq!(rows(&batches[0]), vec![row("A"), row("B")]);

    let snapshot = global_snapshot(&h);
    assert_eq!(snapshot.scheduled_time, Some(4000));
    let left: Vec<_> = snapshot.event_list.iter().map(|e| e.output_data.clone()).collect();
    assert_eq!(left, vec![row("B")]);

    let arms: Vec<i64> = h.scheduler.calls().iter().map(|(_, ts)| *ts).collect();
    assert_eq!(arms, vec![1000, 2000, 3000, 4000]);
}

#[test]
fn test_creation_hook_uses_clock() {
    let h = harness(250);
    h.clock.set(10_000);
    let key = PartitionKey::from("IBM");
    h.limiter.on_partition_created(&key);
    assert_eq!(h.scheduler.calls(), vec![(key.clone(), 10_250)]);
    assert_eq!(
        h.limiter.snapshot_partition(&key).unwrap().scheduled_time,
        Some(10_250)
    );
}

#[test]
fn test_expired_removes_first_inserted_duplicate() {
    let h = harness(1000);
    h.limiter.on_partition_created(&PartitionKey::global());

    let first = Event::current(10, vec![Value::from("IBM"), Value::Double(1.0)]);
    let other = Event::current(20, vec![Value::from("WSO2"), Value::Double(2.0)]);
    let second = Event::current(30, vec![Value::from("IBM"), Value::Double(1.0)]);
    h.limiter.process(vec![
        first.into(),
        other.into(),
        second.into(),
        Event::expired(40, vec![Value::from("IBM"), Value::Double(1.0)]).into(),
    ]);

    let timestamps: Vec<i64> = global_snapshot(&h)
        .event_list
        .iter()
        .map(|e| e.timestamp)
        .collect();
    assert_eq!(timestamps, vec![20, 30]);
}

#[test]
fn test_membership_size_tracks_current_minus_matched_expired() {
    let h = harness(1_000_000);
    h.limiter.on_partition_created(&PartitionKey::global());

    h.limiter.process(vec![
        current(1, "A"),
        current(2, "B"),
        expired(3, "Z"),
        current(4, "C"),
        expired(5, "A"),
        expired(6, "A"),
        expired(7, "B"),
    ]);

    // 3 CURRENT, 2 matched EXPIRED.
    assert_eq!(global_snapshot(&h).event_list.len(), 1);
    assert_eq!(h.limiter.metrics().unmatched_expired(), 2);
    assert_eq!(h.limiter.metrics().events_absorbed(), 7);
    assert!(h.sink.is_empty());
}

#[test]
fn test_flush_emits_copy_not_view() {
    let h = harness(100);
    h.limiter.on_partition_created(&PartitionKey::global());
    h.limiter.process(vec![current(10, "A"), current(150, "B")]);

    let batches = h.sink.drain();
    assert_eq!(rows(&batches[0]), vec![row("A")]);

    // Later mutation must not leak into an already emitted snapshot.
    h.limiter.process(vec![Event::reset(160).into()]);
    assert_eq!(rows(&batches[0]), vec![row("A")]);
    assert!(global_snapshot(&h).event_list.is_empty());
}

#[test]
fn test_schedule_advances_by_exactly_one_interval_per_flush() {
    let h = harness(1000);
    h.limiter.on_partition_created(&PartitionKey::global());

    // A burst far past several boundaries flushes once per event.
    let emitted = h
        .limiter
        .process(vec![current(5500, "A"), current(5600, "B"), current(5700, "C")]);
    assert_eq!(emitted, 3);
    assert_eq!(global_snapshot(&h).scheduled_time, Some(4000));

    let arms: Vec<i64> = h.scheduler.calls().iter().map(|(_, ts)| *ts).collect();
    assert!(arms.windows(2).all(|w| w[1] - w[0] == 1000));

    // Snapshots grow as the catch-up proceeds.
    let sizes: Vec<usize> = h.sink.drain().iter().map(SnapshotBatch::len).collect();
    assert_eq!(sizes, vec![0, 1, 2]);
}

#[test]
fn test_reset_flushes_then_empties() {
    let h = harness(1000);
    h.limiter.on_partition_created(&PartitionKey::global());
    h.limiter.process(vec![current(100, "A"), current(200, "B")]);

    assert_eq!(h.limiter.process(vec![Event::reset(1000).into()]), 1);
    let batches = h.sink.drain();
    assert_eq!(rows(&batches[0]), vec![row("A"), row("B")]);

    let snapshot = global_snapshot(&h);
    assert!(snapshot.event_list.is_empty());
    assert_eq!(snapshot.scheduled_time, Some(2000));

    // Empty but still scheduled: not reclaimable.
    assert_eq!(h.limiter.reclaim(), 0);
    assert_eq!(h.limiter.partition_count(), 1);

    // Unscheduling the empty partition makes it reclaimable.
    h.limiter
        .restore_partition(&PartitionKey::global(), PartitionSnapshot::default());
    assert_eq!(h.limiter.partition_count(), 0);
    assert_eq!(h.limiter.metrics().partitions_reclaimed(), 1);
}

#[test]
fn test_partitions_are_isolated() {
    let h = harness(1000);
    let ibm = PartitionKey::from("IBM");
    let wso2 = PartitionKey::from("WSO2");

    h.clock.set(0);
    h.limiter.on_partition_created(&ibm);
    h.clock.set(600);
    h.limiter.on_partition_created(&wso2);

    h.limiter.process(vec![
        StreamEvent::grouped("IBM", Event::current(100, row("ibm-1"))),
        StreamEvent::grouped("WSO2", Event::current(700, row("wso2-1"))),
    ]);
    assert!(h.sink.is_empty());

    // IBM is due at 1000, WSO2 only at 1600.
    h.limiter.process(vec![
        StreamEvent::grouped("IBM", Event::current(1100, row("ibm-2"))),
        StreamEvent::grouped("WSO2", Event::current(1100, row("wso2-2"))),
    ]);
    let batches = h.sink.drain();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].partition_key, ibm);
    assert_eq!(rows(&batches[0]), vec![row("ibm-1")]);

    let wso2_snapshot = h.limiter.snapshot_partition(&wso2).unwrap();
    assert_eq!(wso2_snapshot.event_list.len(), 2);
    assert_eq!(wso2_snapshot.scheduled_time, Some(1600));
}

#[test]
fn test_mixed_key_batch_preserves_output_order() {
    let h = harness(1000);
    for key in ["a", "b"] {
        h.limiter.on_partition_created(&PartitionKey::from(key));
    }

    let emitted = h.limiter.process(vec![
        StreamEvent::grouped("a", Event::current(100, row("a1"))),
        StreamEvent::grouped("b", Event::current(1000, row("b1"))),
        StreamEvent::grouped("a", Event::current(1000, row("a2"))),
        StreamEvent::grouped("b", Event::current(2000, row("b2"))),
    ]);
    assert_eq!(emitted, 3);

    let keys: Vec<String> = h
        .sink
        .drain()
        .iter()
        .map(|b| b.partition_key.to_string())
        .collect();
    assert_eq!(keys, vec!["b", "a", "b"]);
}

#[test]
fn test_grouped_and_plain_events_use_distinct_partitions() {
    let h = harness(1000);
    h.limiter.process(vec![
        current(1, "plain"),
        StreamEvent::grouped("k", Event::current(1, row("keyed"))),
    ]);
    assert_eq!(h.limiter.partition_count(), 2);
    assert_eq!(h.limiter.metrics().partitions_created(), 2);
}

#[test]
fn test_float_rows_match_by_bit_pattern() {
    let h = harness(1_000_000);
    h.limiter.on_partition_created(&PartitionKey::global());
    h.limiter.process(vec![
        Event::current(1, vec![Value::Double(f64::NAN)]).into(),
        Event::current(2, vec![Value::Double(0.0)]).into(),
        Event::expired(3, vec![Value::Double(f64::NAN)]).into(),
        Event::expired(4, vec![Value::Double(-0.0)]).into(),
    ]);

    let left = global_snapshot(&h).event_list;
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].output_data, vec![Value::Double(0.0)]);
}

#[test]
fn test_checkpoint_restore_is_identity() {
    let h = harness(1000);
    h.limiter.on_partition_created(&PartitionKey::from("IBM"));
    h.limiter.process(vec![
        StreamEvent::grouped("IBM", Event::current(10, row("x"))),
        StreamEvent::grouped("IBM", Event::current(20, row("y"))),
        StreamEvent::grouped("ORCL", Event::current(30, row("z"))),
    ]);

    let before_ibm = h.limiter.snapshot_partition(&PartitionKey::from("IBM"));
    let before_orcl = h.limiter.snapshot_partition(&PartitionKey::from("ORCL"));
    let state = h.limiter.checkpoint().unwrap();
    assert_eq!(state.operator_id, "snapshot_q");
    assert_eq!(
        LimiterCheckpoint::from_bytes(&state.data)
            .unwrap()
            .partitions
            .len(),
        2
    );

    h.limiter.restore(&state).unwrap();
    assert_eq!(h.limiter.snapshot_partition(&PartitionKey::from("IBM")), before_ibm);
    assert_eq!(h.limiter.snapshot_partition(&PartitionKey::from("ORCL")), before_orcl);
}

#[test]
fn test_restore_into_fresh_limiter_rearms_scheduler() {
    let source = harness(1000);
    source.limiter.on_partition_created(&PartitionKey::from("IBM"));
    source.limiter.process(vec![StreamEvent::grouped(
        "IBM",
        Event::current(10, row("x")),
    )]);
    let state = source.limiter.checkpoint().unwrap();

    let target = harness(1000);
    target.limiter.process(vec![current(5, "stale")]);
    target.limiter.restore(&state).unwrap();

    assert!(target.limiter.snapshot_partition(&PartitionKey::global()).is_none());
    assert_eq!(
        target.scheduler.cancels(),
        vec![PartitionKey::global(), PartitionKey::from("IBM")]
    );
    let restored = target
        .limiter
        .snapshot_partition(&PartitionKey::from("IBM"))
        .unwrap();
    assert_eq!(restored.event_list.len(), 1);
    assert_eq!(restored.scheduled_time, Some(1000));
    assert!(target
        .scheduler
        .calls()
        .contains(&(PartitionKey::from("IBM"), 1000)));

    // Processing continues from the restored schedule.
    assert_eq!(
        target
            .limiter
            .process(vec![StreamEvent::grouped("IBM", Event::current(1000, row("y")))]),
        1
    );
    assert_eq!(rows(&target.sink.drain().pop().unwrap()), vec![row("x")]);
}

#[test]
fn test_every_sink_sees_every_batch() {
    let h = harness(1000);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&seen);
    h.limiter.subscribe(Arc::new(FnSink::new(move |b: &SnapshotBatch| {
        recorder.lock().push(b.timestamp);
    })));

    h.limiter.process(vec![current(1, "A"), current(1000, "B")]);
    assert_eq!(*seen.lock(), vec![1, 1000]);
    assert_eq!(h.sink.len(), 2);
    assert_eq!(h.limiter.metrics().snapshots_emitted(), 2);
    assert_eq!(h.limiter.metrics().snapshot_events(), 1);
}
