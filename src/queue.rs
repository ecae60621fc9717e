use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Urgent,
    Normal,
}

impl Priority {
    pub fn from_urgent_flag(is_urgent: bool) -> Self {
        if is_urgent {
            Priority::Urgent
        } else {
            Priority::Normal
        }
    }
}

/// What the per-item processing step did with a dequeued email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A reply was generated and persisted.
    Generated,
    /// The record already had a reply; duplicate enqueues land here.
    AlreadyAnswered,
    /// The record was deleted between enqueue and processing.
    RecordMissing,
}

/// The side effect the queue runs per item. Implementations must confine
/// failures to their own item; the drain loop logs and moves on.
#[async_trait]
pub trait ProcessEmail: Send + Sync {
    async fn process(&self, email_id: Uuid) -> AppResult<ProcessOutcome>;
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub email_id: Uuid,
    pub priority: Priority,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueInner {
    urgent: VecDeque<QueueItem>,
    normal: VecDeque<QueueItem>,
    /// Class of the item currently mid-processing, if any.
    active: Option<Priority>,
}

impl QueueInner {
    fn push(&mut self, item: QueueItem) {
        match item.priority {
            Priority::Urgent => self.urgent.push_back(item),
            Priority::Normal => self.normal.push_back(item),
        }
    }

    /// Urgent strictly before normal; FIFO within each class.
    fn pop(&mut self) -> Option<QueueItem> {
        self.urgent.pop_front().or_else(|| self.normal.pop_front())
    }

    fn is_empty(&self) -> bool {
        self.urgent.is_empty() && self.normal.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClassStats {
    pub waiting: usize,
    /// 0 or 1; a single worker drains the queue.
    pub active: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub urgent: ClassStats,
    pub normal: ClassStats,
    pub total: ClassStats,
}

/// In-process priority queue that serializes reply generation. At most one
/// drain worker runs per queue instance, so no two emails are ever
/// mid-generation at the same time and an urgent arrival only ever waits
/// behind the item already executing.
///
/// Queue contents are not persisted; on a crash, unprocessed items are
/// lost and must be re-enqueued from the store.
#[derive(Clone)]
pub struct ResponseQueue {
    inner: Arc<Mutex<QueueInner>>,
    draining: Arc<AtomicBool>,
    processor: Arc<dyn ProcessEmail>,
}

impl ResponseQueue {
    pub fn new(processor: Arc<dyn ProcessEmail>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner::default())),
            draining: Arc::new(AtomicBool::new(false)),
            processor,
        }
    }

    /// Fire-and-forget: appends the item and wakes a drain worker if none
    /// is running. Duplicate ids are allowed; the processing step no-ops
    /// when a reply already exists.
    pub fn enqueue(&self, email_id: Uuid, is_urgent: bool) {
        let priority = Priority::from_urgent_flag(is_urgent);
        {
            let mut inner = self.inner.lock().unwrap();
            inner.push(QueueItem {
                email_id,
                priority,
                enqueued_at: Utc::now(),
            });
        }
        tracing::debug!("Enqueued email {} with {} priority", email_id, priority);
        self.start_drain_if_idle();
    }

    /// Snapshot of waiting/active counts. Safe to call at any time.
    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        let urgent = ClassStats {
            waiting: inner.urgent.len(),
            active: usize::from(inner.active == Some(Priority::Urgent)),
        };
        let normal = ClassStats {
            waiting: inner.normal.len(),
            active: usize::from(inner.active == Some(Priority::Normal)),
        };
        QueueStats {
            urgent,
            normal,
            total: ClassStats {
                waiting: urgent.waiting + normal.waiting,
                active: urgent.active + normal.active,
            },
        }
    }

    fn start_drain_if_idle(&self) {
        // Single-flight guard: only the caller that flips the flag spawns
        // a worker.
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let queue = self.clone();
            tokio::spawn(async move { queue.drain().await });
        }
    }

    async fn drain(&self) {
        tracing::debug!("Starting queue drain");
        loop {
            let item = {
                let mut inner = self.inner.lock().unwrap();
                // Removed from the pending set before the side effect runs,
                // so the same item can never be picked up twice.
                let item = inner.pop();
                inner.active = item.as_ref().map(|i| i.priority);
                item
            };
            let Some(item) = item else { break };

            let result = AssertUnwindSafe(self.processor.process(item.email_id))
                .catch_unwind()
                .await;

            self.inner.lock().unwrap().active = None;

            match result {
                Ok(Ok(outcome)) => {
                    tracing::debug!("Processed {} email {}: {:?}", item.priority, item.email_id, outcome);
                }
                Ok(Err(e)) => {
                    // Dropped, not retried; the record stays pending and can
                    // be re-enqueued.
                    tracing::error!("Error processing email {}: {:?}", item.email_id, e);
                }
                Err(_) => {
                    tracing::error!("Processing panicked for email {}", item.email_id);
                }
            }
        }

        self.draining.store(false, Ordering::Release);
        // An enqueue can land between the final empty pop and the flag
        // store above; pick that work back up.
        if !self.inner.lock().unwrap().is_empty() {
            self.start_drain_if_idle();
        }
        tracing::debug!("Queue drained");
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::HashSet,
        sync::atomic::{AtomicUsize, Ordering::Relaxed},
        time::Duration,
    };

    use anyhow::anyhow;

    use super::*;

    #[derive(Default)]
    struct RecordingProcessor {
        order: Mutex<Vec<Uuid>>,
        fail_ids: HashSet<Uuid>,
        panic_ids: HashSet<Uuid>,
        delay_ms: u64,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    #[async_trait]
    impl ProcessEmail for RecordingProcessor {
        async fn process(&self, email_id: Uuid) -> AppResult<ProcessOutcome> {
            let running = self.running.fetch_add(1, Relaxed) + 1;
            self.max_running.fetch_max(running, Relaxed);

            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
            }
            self.order.lock().unwrap().push(email_id);
            self.running.fetch_sub(1, Relaxed);

            if self.panic_ids.contains(&email_id) {
                panic!("boom");
            }
            if self.fail_ids.contains(&email_id) {
                return Err(anyhow!("generation failed").into());
            }
            Ok(ProcessOutcome::Generated)
        }
    }

    async fn wait_until_idle(queue: &ResponseQueue) {
        for _ in 0..200 {
            let stats = queue.stats();
            assert!(stats.total.active <= 1);
            if stats.total.waiting == 0 && stats.total.active == 0 {
                // Let the drain task run to completion
                tokio::time::sleep(Duration::from_millis(10)).await;
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue never went idle");
    }

    fn queue_with(processor: RecordingProcessor) -> (ResponseQueue, Arc<RecordingProcessor>) {
        let processor = Arc::new(processor);
        (ResponseQueue::new(processor.clone()), processor)
    }

    #[test]
    fn test_inner_prefers_urgent_fifo_within_class() {
        let mut inner = QueueInner::default();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();

        for (i, id) in ids.iter().enumerate() {
            let priority = if i % 2 == 0 {
                Priority::Normal
            } else {
                Priority::Urgent
            };
            inner.push(QueueItem {
                email_id: *id,
                priority,
                enqueued_at: Utc::now(),
            });
        }

        // Urgent items (1, 3) first in arrival order, then normals (0, 2, 4)
        let popped: Vec<Uuid> = std::iter::from_fn(|| inner.pop().map(|i| i.email_id)).collect();
        assert_eq!(popped, vec![ids[1], ids[3], ids[0], ids[2], ids[4]]);
        assert!(inner.is_empty());
    }

    #[tokio::test]
    async fn test_fifo_within_class() {
        let (queue, processor) = queue_with(RecordingProcessor {
            delay_ms: 5,
            ..Default::default()
        });
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            queue.enqueue(*id, false);
        }

        wait_until_idle(&queue).await;
        assert_eq!(*processor.order.lock().unwrap(), ids);
    }

    #[tokio::test]
    async fn test_urgent_arrival_jumps_pending_normals() {
        let (queue, processor) = queue_with(RecordingProcessor {
            delay_ms: 50,
            ..Default::default()
        });

        let blocker = Uuid::new_v4();
        queue.enqueue(blocker, false);
        // Let the drain worker pick the blocker up
        tokio::time::sleep(Duration::from_millis(10)).await;

        let e5 = Uuid::new_v4();
        let e6 = Uuid::new_v4();
        let e7 = Uuid::new_v4();
        queue.enqueue(e5, false);
        queue.enqueue(e6, true);
        queue.enqueue(e7, false);

        wait_until_idle(&queue).await;
        assert_eq!(*processor.order.lock().unwrap(), vec![blocker, e6, e5, e7]);
    }

    #[tokio::test]
    async fn test_urgent_before_earlier_normal() {
        let (queue, processor) = queue_with(RecordingProcessor {
            delay_ms: 50,
            ..Default::default()
        });

        let blocker = Uuid::new_v4();
        queue.enqueue(blocker, false);
        tokio::time::sleep(Duration::from_millis(10)).await;

        let e1 = Uuid::new_v4();
        let e2 = Uuid::new_v4();
        queue.enqueue(e1, false);
        queue.enqueue(e2, true);

        wait_until_idle(&queue).await;
        assert_eq!(*processor.order.lock().unwrap(), vec![blocker, e2, e1]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_flight_across_rapid_enqueues() {
        let (queue, processor) = queue_with(RecordingProcessor {
            delay_ms: 2,
            ..Default::default()
        });

        let mut handles = Vec::new();
        for i in 0..20 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue(Uuid::new_v4(), i % 3 == 0);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        wait_until_idle(&queue).await;
        assert_eq!(processor.order.lock().unwrap().len(), 20);
        assert_eq!(processor.max_running.load(Relaxed), 1);
    }

    #[tokio::test]
    async fn test_failed_item_does_not_halt_drain() {
        let failing = Uuid::new_v4();
        let (queue, processor) = queue_with(RecordingProcessor {
            fail_ids: HashSet::from([failing]),
            ..Default::default()
        });

        let first = Uuid::new_v4();
        let last = Uuid::new_v4();
        queue.enqueue(first, false);
        queue.enqueue(failing, false);
        queue.enqueue(last, false);

        wait_until_idle(&queue).await;
        assert_eq!(*processor.order.lock().unwrap(), vec![first, failing, last]);

        // Stats are zeroed and stay zeroed on repeated reads
        let stats = queue.stats();
        assert_eq!(stats, QueueStats::default());
        assert_eq!(queue.stats(), stats);
    }

    #[tokio::test]
    async fn test_panicking_item_does_not_stick_active_flag() {
        let panicking = Uuid::new_v4();
        let (queue, processor) = queue_with(RecordingProcessor {
            panic_ids: HashSet::from([panicking]),
            ..Default::default()
        });

        let after = Uuid::new_v4();
        queue.enqueue(panicking, true);
        queue.enqueue(after, false);

        wait_until_idle(&queue).await;
        assert!(processor.order.lock().unwrap().contains(&after));
        assert_eq!(queue.stats(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_drain_restarts_after_going_idle() {
        let (queue, processor) = queue_with(RecordingProcessor::default());

        let first = Uuid::new_v4();
        queue.enqueue(first, false);
        wait_until_idle(&queue).await;

        let second = Uuid::new_v4();
        queue.enqueue(second, true);
        wait_until_idle(&queue).await;

        assert_eq!(*processor.order.lock().unwrap(), vec![first, second]);
    }

    #[tokio::test]
    async fn test_stats_reflect_waiting_classes() {
        // No drain runs: stats come straight off the pending deques
        let (queue, _processor) = queue_with(RecordingProcessor {
            delay_ms: 100,
            ..Default::default()
        });

        queue.enqueue(Uuid::new_v4(), true);
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.enqueue(Uuid::new_v4(), true);
        queue.enqueue(Uuid::new_v4(), false);

        let stats = queue.stats();
        assert_eq!(stats.urgent.active, 1);
        assert_eq!(stats.urgent.waiting, 1);
        assert_eq!(stats.normal.waiting, 1);
        assert_eq!(stats.total.waiting, 2);
        assert_eq!(stats.total.active, 1);
    }
}
