//! In-process transport

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

use super::{Delivery, Transport};
use crate::error::TransportError;

/// Default time `receive` waits before reporting an empty topic
pub const DEFAULT_MEMORY_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
struct Queues {
    topics: HashMap<String, VecDeque<Delivery>>,
    in_flight: HashMap<i64, Delivery>,
    next_id: i64,
}

/// Named in-memory queues shared by every stage of one process
#[derive(Debug)]
pub struct MemoryTransport {
    queues: Mutex<Queues>,
    notify: Notify,
    poll_interval: Duration,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_POLL)
    }
}

impl MemoryTransport {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            queues: Mutex::new(Queues::default()),
            notify: Notify::new(),
            poll_interval,
        }
    }

    /// Messages waiting on `topic`, excluding unacknowledged ones
    pub async fn pending(&self, topic: &str) -> usize {
        self.queues
            .lock()
            .await
            .topics
            .get(topic)
            .map_or(0, VecDeque::len)
    }

    pub async fn in_flight(&self) -> usize {
        self.queues.lock().await.in_flight.len()
    }

    /// Return every unacknowledged message to the front of its topic
    pub async fn requeue_unacked(&self) -> usize {
        let mut queues = self.queues.lock().await;
        let mut returned: Vec<Delivery> = queues.in_flight.drain().map(|(_, d)| d).collect();
        returned.sort_by_key(|d| std::cmp::Reverse(d.id));
        let count = returned.len();
        for delivery in returned {
            queues
                .topics
                .entry(delivery.topic.clone())
                .or_default()
                .push_front(delivery);
        }
        drop(queues);
        self.notify.notify_waiters();
        count
    }

    /// Remove and return everything waiting on `topic`
    pub async fn drain(&self, topic: &str) -> Vec<Vec<u8>> {
        self.queues
            .lock()
            .await
            .topics
            .remove(topic)
            .map(|q| q.into_iter().map(|d| d.payload).collect())
            .unwrap_or_default()
    }

    async fn take(&self, topic: &str) -> Option<Delivery> {
        let mut queues = self.queues.lock().await;
        let delivery = queues.topics.get_mut(topic)?.pop_front()?;
        queues.in_flight.insert(delivery.id, delivery.clone());
        Some(delivery)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, TransportError> {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if let Some(delivery) = self.take(topic).await {
            return Ok(Some(delivery));
        }

        match tokio::time::timeout(self.poll_interval, notified).await {
            Ok(()) => Ok(self.take(topic).await),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        self.queues.lock().await.in_flight.remove(&delivery.id);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut queues = self.queues.lock().await;
        queues.next_id += 1;
        let delivery = Delivery {
            id: queues.next_id,
            topic: topic.to_string(),
            payload,
        };
        queues.topics.entry(topic.to_string()).or_default().push_back(delivery);
        drop(queues);

        self.notify.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_per_topic() {
        let transport = MemoryTransport::default();
        transport.publish("a_raw", b"1".to_vec()).await.unwrap();
        transport.publish("b_raw", b"x".to_vec()).await.unwrap();
        transport.publish("a_raw", b"2".to_vec()).await.unwrap();

        let first = transport.receive("a_raw").await.unwrap().unwrap();
        let second = transport.receive("a_raw").await.unwrap().unwrap();
        assert_eq!(first.payload, b"1");
        assert_eq!(second.payload, b"2");
        assert_eq!(transport.pending("b_raw").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_topic_returns_none_after_poll() {
        let transport = MemoryTransport::new(Duration::from_millis(10));
        assert!(transport.receive("nothing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_wakes_on_publish() {
        let transport = Arc::new(MemoryTransport::new(Duration::from_secs(5)));
        let consumer = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.receive("t").await })
        };

        tokio::task::yield_now().await;
        transport.publish("t", b"hello".to_vec()).await.unwrap();

        let delivery = consumer.await.unwrap().unwrap().unwrap();
        assert_eq!(delivery.payload, b"hello");
    }

    #[tokio::test]
    async fn test_unacked_is_redelivered() {
        let transport = MemoryTransport::default();
        transport.publish("t", b"1".to_vec()).await.unwrap();
        transport.publish("t", b"2".to_vec()).await.unwrap();

        let first = transport.receive("t").await.unwrap().unwrap();
        let second = transport.receive("t").await.unwrap().unwrap();
        transport.ack(&second).await.unwrap();
        assert_eq!(transport.in_flight().await, 1);

        assert_eq!(transport.requeue_unacked().await, 1);
        let again = transport.receive("t").await.unwrap().unwrap();
        assert_eq!(again, first);
    }
}
