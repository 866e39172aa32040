use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::messaging::{port::ChatPort, types::OutboundItem};

struct SenderTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct QueueState {
    rx: Option<mpsc::UnboundedReceiver<OutboundItem>>,
    sender: Option<SenderTask>,
}

/// Unbounded FIFO of replies drained by a single background sender.
///
/// Command handlers `post` and move on; a slow or flooded chat connection only
/// ever stalls the sender task.
pub struct DeliveryQueue {
    tx: mpsc::UnboundedSender<OutboundItem>,
    state: Mutex<QueueState>,
}

impl Default for DeliveryQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliveryQueue {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            state: Mutex::new(QueueState {
                rx: Some(rx),
                sender: None,
            }),
        }
    }

    /// Enqueue a reply. Never waits.
    pub fn post(&self, destination: &str, payload: &str) {
        let item = OutboundItem::new(destination, payload);
        if let Err(e) = self.tx.send(item) {
            debug!(destination = %e.0.destination, "delivery queue stopped; reply dropped");
        }
    }

    /// Start the sender. Items posted earlier are delivered first.
    pub async fn start(&self, chat: Arc<dyn ChatPort>) {
        let mut st = self.state.lock().await;
        if st.sender.is_some() {
            return;
        }
        let Some(rx) = st.rx.take() else {
            warn!("delivery queue already stopped; not restarting");
            return;
        };

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(sender_loop(chat, rx, cancel.clone()));
        st.sender = Some(SenderTask { cancel, handle });
        info!("delivery queue started");
    }

    /// Stop the sender after its in-flight item. No-op if never started.
    pub async fn stop(&self) {
        let task = self.state.lock().await.sender.take();
        let Some(task) = task else {
            return;
        };

        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            warn!(error = %e, "delivery sender ended abnormally");
        }
        info!("delivery queue stopped");
    }
}

async fn sender_loop(
    chat: Arc<dyn ChatPort>,
    mut rx: mpsc::UnboundedReceiver<OutboundItem>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
          biased;
          _ = cancel.cancelled() => break,
          item = rx.recv() => match item {
            Some(item) => item,
            None => break,
          },
        };

        // At-most-once: a failed item is not retried.
        if let Err(e) = chat.send_message(&item.destination, &item.payload).await {
            warn!(destination = %item.destination, error = %e, "reply delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeChat;
    use std::time::Duration;
    use tokio::time::{sleep, timeout};

    async fn wait_for_sent(chat: &FakeChat, n: usize) {
        timeout(Duration::from_secs(2), async {
            while chat.sent().len() < n {
                sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn delivers_in_submission_order_including_items_posted_before_start() {
        let chat = Arc::new(FakeChat::default());
        let queue = DeliveryQueue::new();
        for i in 0..5 {
            queue.post("alice", &format!("line {i}"));
        }

        queue.start(chat.clone()).await;
        queue.post("bob", "late");
        wait_for_sent(&chat, 6).await;

        let sent = chat.sent();
        let payloads: Vec<_> = sent.iter().map(|i| i.payload.as_str()).collect();
        assert_eq!(
            payloads,
            vec!["line 0", "line 1", "line 2", "line 3", "line 4", "late"]
        );
        assert_eq!(sent[5].destination, "bob");
        queue.stop().await;
    }

    #[tokio::test]
    async fn failed_delivery_is_not_retried_and_does_not_stall() {
        let chat = Arc::new(FakeChat::default());
        chat.fail_payload("boom");
        let queue = DeliveryQueue::new();
        queue.start(chat.clone()).await;

        queue.post("alice", "one");
        queue.post("alice", "boom");
        queue.post("alice", "two");
        wait_for_sent(&chat, 2).await;
        sleep(Duration::from_millis(20)).await;

        let payloads: Vec<_> = chat.sent().into_iter().map(|i| i.payload).collect();
        assert_eq!(payloads, vec!["one", "two"]);
        assert_eq!(chat.send_attempts(), 3);
        queue.stop().await;
    }

    #[tokio::test]
    async fn stop_lets_in_flight_item_finish_and_sends_nothing_after() {
        let chat = Arc::new(FakeChat::default());
        chat.set_send_delay(Duration::from_millis(100));
        let queue = DeliveryQueue::new();
        queue.start(chat.clone()).await;

        queue.post("alice", "first");
        queue.post("alice", "second");
        queue.post("alice", "third");
        sleep(Duration::from_millis(30)).await;

        queue.stop().await;
        let at_stop = chat.sent().len();
        assert_eq!(at_stop, 1);

        sleep(Duration::from_millis(250)).await;
        assert_eq!(chat.sent().len(), at_stop);
        assert_eq!(chat.send_attempts(), 1);

        queue.post("alice", "after stop");
        queue.start(chat.clone()).await;
        sleep(Duration::from_millis(150)).await;
        assert_eq!(chat.send_attempts(), 1);
    }

    #[tokio::test]
    async fn post_then_stop_is_all_or_nothing() {
        let chat = Arc::new(FakeChat::default());
        let queue = DeliveryQueue::new();
        queue.start(chat.clone()).await;

        queue.post("alice", "maybe");
        queue.stop().await;
        let delivered = chat.sent();
        assert!(delivered.len() <= 1);

        sleep(Duration::from_millis(50)).await;
        assert_eq!(chat.sent(), delivered);
    }

    #[tokio::test]
    async fn stop_without_start_is_a_no_op() {
        let queue = DeliveryQueue::new();
        queue.post("alice", "never sent");
        queue.stop().await;
        queue.stop().await;
    }
}
