//! Fan-out of events to live subscribers.
//!
//! The registry lives inside a single actor task. Every register, unregister,
//! publish and direct send goes through its command channel, so the registry
//! itself needs no lock. Each subscriber owns a bounded queue; a publish that
//! finds a queue full (or closed) drops that subscriber in the same pass.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

pub type SubscriberId = Uuid;

enum Command<T> {
    Register {
        queue: mpsc::Sender<Arc<T>>,
        reply: oneshot::Sender<SubscriberId>,
    },
    Unregister(SubscriberId),
    Publish(Arc<T>),
    SendDirect {
        id: SubscriberId,
        item: Arc<T>,
        reply: oneshot::Sender<bool>,
    },
    Count(oneshot::Sender<usize>),
}

/// Cloneable handle to the hub actor.
pub struct Hub<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    queue_len: usize,
}

impl<T> Clone for Hub<T> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            queue_len: self.queue_len,
        }
    }
}

impl<T: Send + Sync + 'static> Hub<T> {
    /// Start the actor. It runs until `shutdown` flips to `true` or every
    /// handle is dropped, then closes all subscriber queues.
    pub fn spawn(queue_len: usize, shutdown: watch::Receiver<bool>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, shutdown));
        (
            Self {
                commands: tx,
                queue_len: queue_len.max(1),
            },
            task,
        )
    }

    /// Add a subscriber. `None` once the hub has stopped.
    pub async fn register(&self) -> Option<Subscription<T>> {
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_len);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Register {
                queue: queue_tx,
                reply: reply_tx,
            })
            .ok()?;
        let id = reply_rx.await.ok()?;
        Some(Subscription {
            id,
            queue: queue_rx,
            commands: self.commands.clone(),
        })
    }

    pub fn unregister(&self, id: SubscriberId) {
        let _ = self.commands.send(Command::Unregister(id));
    }

    /// Queue `item` for every current subscriber. Never waits on a subscriber.
    pub fn publish(&self, item: T) {
        let _ = self.commands.send(Command::Publish(Arc::new(item)));
    }

    /// Deliver `item` to one subscriber only. `false` when the id is unknown
    /// or its queue has no room.
    pub async fn send_direct(&self, id: SubscriberId, item: T) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let sent = self.commands.send(Command::SendDirect {
            id,
            item: Arc::new(item),
            reply: reply_tx,
        });
        if sent.is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    pub async fn subscriber_count(&self) -> usize {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Count(reply_tx)).is_err() {
            return 0;
        }
        reply_rx.await.unwrap_or(0)
    }
}

async fn run<T>(mut commands: mpsc::UnboundedReceiver<Command<T>>, mut shutdown: watch::Receiver<bool>) {
    let mut subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<T>>> = HashMap::new();

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            cmd = commands.recv() => {
                let Some(cmd) = cmd else { break };
                handle(cmd, &mut subscribers);
            }
        }
    }

    info!(subscribers = subscribers.len(), "hub stopping, closing subscriber queues");
    // Dropping the senders closes every queue.
    subscribers.clear();
}

fn handle<T>(cmd: Command<T>, subscribers: &mut HashMap<SubscriberId, mpsc::Sender<Arc<T>>>) {
    match cmd {
        Command::Register { queue, reply } => {
            let id = Uuid::new_v4();
            subscribers.insert(id, queue);
            debug!(subscriber = %id, total = subscribers.len(), "subscriber registered");
            if reply.send(id).is_err() {
                // Caller went away before learning its id.
                subscribers.remove(&id);
            }
        }
        Command::Unregister(id) => {
            if subscribers.remove(&id).is_some() {
                debug!(subscriber = %id, total = subscribers.len(), "subscriber unregistered");
            }
        }
        Command::Publish(item) => {
            subscribers.retain(|id, queue| match queue.try_send(Arc::clone(&item)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    info!(subscriber = %id, "dropping slow subscriber");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        Command::SendDirect { id, item, reply } => {
            let delivered = match subscribers.get(&id) {
                Some(queue) => queue.try_send(item).is_ok(),
                None => false,
            };
            let _ = reply.send(delivered);
        }
        Command::Count(reply) => {
            let _ = reply.send(subscribers.len());
        }
    }
}

/// A live subscription. Dropping it unregisters the subscriber.
pub struct Subscription<T> {
    id: SubscriberId,
    queue: mpsc::Receiver<Arc<T>>,
    commands: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Subscription<T> {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next queued item. `None` once the hub dropped this subscriber or shut
    /// down and the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<T>> {
        self.queue.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Unregister(self.id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hub(queue_len: usize) -> (Hub<u32>, watch::Sender<bool>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(false);
        let (hub, task) = Hub::spawn(queue_len, rx);
        (hub, tx, task)
    }

    #[tokio::test]
    async fn publish_reaches_every_subscriber() {
        let (hub, _stop, _task) = hub(4);
        let mut a = hub.register().await.unwrap();
        let mut b = hub.register().await.unwrap();
        hub.publish(7);
        assert_eq!(*a.recv().await.unwrap(), 7);
        assert_eq!(*b.recv().await.unwrap(), 7);
        assert_eq!(hub.subscriber_count().await, 2);
    }

    #[tokio::test]
    async fn full_queue_is_dropped_without_stalling_others() {
        let (hub, _stop, _task) = hub(1);
        let mut slow = hub.register().await.unwrap();
        let mut fast = hub.register().await.unwrap();

        hub.publish(1);
        assert_eq!(*fast.recv().await.unwrap(), 1);
        // `slow` never drained its single slot.
        hub.publish(2);
        assert_eq!(*fast.recv().await.unwrap(), 2);
        assert_eq!(hub.subscriber_count().await, 1);

        assert_eq!(*slow.recv().await.unwrap(), 1);
        assert!(slow.recv().await.is_none(), "dropped subscriber sees a closed queue");
    }

    #[tokio::test]
    async fn send_direct_targets_one_subscriber() {
        let (hub, _stop, _task) = hub(2);
        let mut a = hub.register().await.unwrap();
        let mut b = hub.register().await.unwrap();

        assert!(hub.send_direct(a.id(), 42).await);
        assert!(!hub.send_direct(Uuid::new_v4(), 1).await);
        hub.publish(5);

        assert_eq!(*a.recv().await.unwrap(), 42);
        assert_eq!(*a.recv().await.unwrap(), 5);
        assert_eq!(*b.recv().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn send_direct_reports_full_queue() {
        let (hub, _stop, _task) = hub(1);
        let sub = hub.register().await.unwrap();
        assert!(hub.send_direct(sub.id(), 1).await);
        assert!(!hub.send_direct(sub.id(), 2).await);
        assert_eq!(hub.subscriber_count().await, 1, "direct sends never drop");
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let (hub, _stop, _task) = hub(2);
        let sub = hub.register().await.unwrap();
        let id = sub.id();
        drop(sub);
        assert_eq!(hub.subscriber_count().await, 0);
        assert!(!hub.send_direct(id, 1).await);
    }

    #[tokio::test]
    async fn shutdown_closes_queues() {
        let (hub, stop, task) = hub(4);
        let mut a = hub.register().await.unwrap();
        let mut b = hub.register().await.unwrap();
        stop.send(true).unwrap();
        task.await.unwrap();

        let closed = timeout(Duration::from_secs(1), async {
            assert!(a.recv().await.is_none());
            assert!(b.recv().await.is_none());
        })
        .await;
        assert!(closed.is_ok());
        assert!(hub.register().await.is_none());
        assert_eq!(hub.subscriber_count().await, 0);
    }
}
