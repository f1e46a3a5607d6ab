//! In-memory broker with work-queue semantics
//!
//! Single-process stand-in for the external broker: named queues, competing
//! consumers, manual ack, requeue-on-nack with a redelivery counter. State
//! lives only as long as the process, which matches the pipeline's
//! non-goals (no cross-restart persistence of in-flight work).

use crate::{Broker, BrokerError, Consumer, Delivery, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
struct Stored {
    body: Vec<u8>,
    redeliveries: u32,
}

struct QueueState {
    messages: Mutex<VecDeque<Stored>>,
    /// One permit per enqueued message; waiters race for permits the same
    /// way competing consumers race for deliveries.
    notify: Notify,
    deleted: AtomicBool,
}

impl QueueState {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            messages: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            deleted: AtomicBool::new(false),
        })
    }
}

struct Unacked {
    queue: String,
    body: Vec<u8>,
    redeliveries: u32,
}

struct Shared {
    queues: RwLock<HashMap<String, Arc<QueueState>>>,
    unacked: Mutex<HashMap<u64, Unacked>>,
    tag_seq: AtomicU64,
}

/// In-memory [`Broker`] implementation
#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                queues: RwLock::new(HashMap::new()),
                unacked: Mutex::new(HashMap::new()),
                tag_seq: AtomicU64::new(1),
            }),
        }
    }

    async fn queue(&self, name: &str) -> Result<Arc<QueueState>> {
        self.shared
            .queues
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownQueue(name.to_string()))
    }

    async fn enqueue(&self, name: &str, stored: Stored) -> Result<()> {
        let queue = self.queue(name).await?;
        queue.messages.lock().await.push_back(stored);
        queue.notify.notify_one();
        Ok(())
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_queue(&self, name: &str) -> Result<()> {
        let mut queues = self.shared.queues.write().await;
        queues
            .entry(name.to_string())
            .or_insert_with(QueueState::new);
        Ok(())
    }

    async fn declare_reply_queue(&self, prefix: &str) -> Result<String> {
        let name = format!("{prefix}{}", Uuid::new_v4());
        self.declare_queue(&name).await?;
        debug!(queue = %name, "declared exclusive reply queue");
        Ok(name)
    }

    async fn delete_queue(&self, name: &str) -> Result<()> {
        let removed = self.shared.queues.write().await.remove(name);
        match removed {
            Some(queue) => {
                queue.deleted.store(true, Ordering::SeqCst);
                queue.notify.notify_waiters();
                Ok(())
            }
            None => Err(BrokerError::UnknownQueue(name.to_string())),
        }
    }

    async fn publish(&self, queue: &str, body: Vec<u8>) -> Result<()> {
        self.enqueue(
            queue,
            Stored {
                body,
                redeliveries: 0,
            },
        )
        .await
    }

    async fn consume(&self, queue: &str) -> Result<Box<dyn Consumer>> {
        let state = self.queue(queue).await?;
        Ok(Box::new(MemoryConsumer {
            queue_name: queue.to_string(),
            queue: state,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        self.shared
            .unacked
            .lock()
            .await
            .remove(&delivery.tag)
            .map(|_| ())
            .ok_or(BrokerError::UnknownDelivery(delivery.tag))
    }

    async fn nack_requeue(&self, delivery: &Delivery) -> Result<()> {
        let unacked = self
            .shared
            .unacked
            .lock()
            .await
            .remove(&delivery.tag)
            .ok_or(BrokerError::UnknownDelivery(delivery.tag))?;

        let stored = Stored {
            body: unacked.body,
            redeliveries: unacked.redeliveries + 1,
        };
        match self.enqueue(&unacked.queue, stored).await {
            Ok(()) => Ok(()),
            Err(BrokerError::UnknownQueue(name)) => {
                // The queue was deleted while the message was in flight.
                // Reply queues are torn down after their single response, so
                // this is expected there.
                warn!(queue = %name, tag = delivery.tag, "dropping requeue for deleted queue");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

struct MemoryConsumer {
    queue_name: String,
    queue: Arc<QueueState>,
    shared: Arc<Shared>,
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Option<Delivery>> {
        loop {
            // Arm the waiter before checking the queue so a publish between
            // the check and the await cannot be missed.
            let notified = self.queue.notify.notified();

            let popped = self.queue.messages.lock().await.pop_front();
            if let Some(stored) = popped {
                let tag = self.shared.tag_seq.fetch_add(1, Ordering::Relaxed);
                let delivery = Delivery {
                    tag,
                    queue: self.queue_name.clone(),
                    body: stored.body.clone(),
                    redeliveries: stored.redeliveries,
                };
                self.shared.unacked.lock().await.insert(
                    tag,
                    Unacked {
                        queue: self.queue_name.clone(),
                        body: stored.body,
                        redeliveries: stored.redeliveries,
                    },
                );
                return Ok(Some(delivery));
            }

            if self.queue.deleted.load(Ordering::SeqCst) {
                return Ok(None);
            }

            notified.await;
        }
    }
}
