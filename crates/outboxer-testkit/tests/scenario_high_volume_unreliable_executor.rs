//! §8 scenario 4: high-volume, unreliable executor. 100 invocations enqueued
//! across 10 concurrent business transactions, dispatched to a handler that
//! fails deterministically on roughly a third of its calls. Every entry must
//! eventually be observed exactly once, regardless of how many attempts it
//! took.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use outboxer_execution::{Clock, DispatchTable, FixedClock, OutboxListener};
use outboxer_runtime::OutboxBuilder;
use outboxer_schemas::{ArgValue, Entry, Invocation, JsonSerializer, ScheduleOptions, Serializer};

struct ObservedListener {
    seen: Arc<Mutex<HashSet<i64>>>,
}

impl OutboxListener for ObservedListener {
    fn success(&self, entry: &Entry) {
        if let Some(index) = index_arg(entry) {
            self.seen.lock().unwrap().insert(index);
        }
    }
}

fn index_arg(entry: &Entry) -> Option<i64> {
    let inv = JsonSerializer.deserialize(&entry.invocation).ok()?;
    match inv.args.first() {
        Some(ArgValue::I64(n)) => Some(*n),
        _ => None,
    }
}

#[tokio::test]
async fn every_entry_is_observed_exactly_once_under_unreliable_execution() -> anyhow::Result<()> {
    let (pool, dialect) = outboxer_testkit::memory_pool().await?;

    let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
    let dispatch = DispatchTable::new();
    let attempt_counts = Arc::new(Mutex::new(std::collections::HashMap::<i64, i64>::new()));
    let ac = attempt_counts.clone();
    dispatch.register("Worker", "process", move |invocation| {
        let ac = ac.clone();
        async move {
            let index = match invocation.args.first() {
                Some(ArgValue::I64(n)) => *n,
                _ => return Err(anyhow::anyhow!("missing index arg")),
            };
            let attempt = {
                let mut guard = ac.lock().unwrap();
                let entry = guard.entry(index).or_insert(0);
                *entry += 1;
                *entry
            };
            // Deterministic pseudo-random failure, independent of any RNG
            // crate: fails roughly a third of the time and is guaranteed to
            // succeed by the third attempt.
            if (index * 7 + attempt) % 3 != 0 {
                Ok(())
            } else {
                Err(anyhow::anyhow!("simulated transient failure"))
            }
        }
    });

    let seen = Arc::new(Mutex::new(HashSet::new()));
    let outbox = Arc::new(
        OutboxBuilder::new(dialect, pool)
            .instantiator(Arc::new(dispatch))
            .clock(clock.clone() as Arc<dyn Clock>)
            .attempt_frequency(StdDuration::from_millis(1))
            .blocklist_after_attempts(10)
            .listener(Arc::new(ObservedListener { seen: seen.clone() }))
            .build(),
    );

    const TOTAL: i64 = 100;
    const TX_COUNT: i64 = 10;
    const PER_TX: i64 = TOTAL / TX_COUNT;

    let scheduled = Arc::new(AtomicUsize::new(0));
    let mut handles = Vec::new();
    for tx_index in 0..TX_COUNT {
        let outbox = outbox.clone();
        let scheduled = scheduled.clone();
        handles.push(tokio::spawn(async move {
            let mut tx = outbox.begin().await.unwrap();
            for offset in 0..PER_TX {
                let index = tx_index * PER_TX + offset;
                let invocation = Invocation::new("Worker", "process").with_arg("i64", ArgValue::I64(index));
                outbox
                    .schedule(&mut tx, invocation, ScheduleOptions::default())
                    .await
                    .unwrap();
            }
            tx.commit().await.unwrap();
            scheduled.fetch_add(PER_TX as usize, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.await?;
    }
    assert_eq!(scheduled.load(Ordering::SeqCst), TOTAL as usize);

    // Drive flush cycles until every entry has been observed, or give up
    // after a generous bound.
    for _ in 0..200 {
        if seen.lock().unwrap().len() >= TOTAL as usize {
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        clock.advance(chrono::Duration::seconds(1));
        outbox.flush_once().await?;
    }
    tokio::time::sleep(StdDuration::from_millis(50)).await;

    let final_seen = seen.lock().unwrap();
    let missing: Vec<i64> = (0..TOTAL).filter(|i| !final_seen.contains(i)).collect();
    assert!(missing.is_empty(), "entries never observed: {missing:?}");
    assert_eq!(final_seen.len(), TOTAL as usize, "no entry observed more than once");

    Ok(())
}
