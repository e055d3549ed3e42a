//! Typed events and the fan-in ring buffer (§4.A, §5).

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Ingress,
    Service,
    Endpoints,
    Secret,
    ConfigMap,
    Pod,
    IngressCheckSum,
    SecretCheckSum,
}

#[derive(Debug, Clone)]
pub enum Event {
    Created { kind: ObjectKind, key: String },
    Updated { kind: ObjectKind, key: String },
    Deleted { kind: ObjectKind, key: String },
    /// A watch stream finished its initial list (`watcher::Event::InitDone`).
    /// Carries no key: the assembler always reads the full snapshot, so this
    /// exists purely to wake the reconcile worker for a first pass.
    Resynced { kind: ObjectKind },
}

/// Single bounded fan-in queue (§4.A, §5). All informer tasks enqueue
/// here; a single reconcile worker drains it.
pub struct RingBuffer {
    tx: mpsc::Sender<Event>,
    // `tokio::sync::Mutex` rather than `parking_lot`: its guard is `Send`,
    // so holding it across the `.await` in `recv_batch` doesn't make this
    // future `!Send` (it's polled inside `tokio::spawn`).
    rx: tokio::sync::Mutex<mpsc::Receiver<Event>>,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        RingBuffer {
            tx,
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    pub fn sender(&self) -> mpsc::Sender<Event> {
        self.tx.clone()
    }

    /// Drain at least one event, then greedily coalesce whatever else is
    /// already queued without blocking (§5: "excess events coalesce into a
    /// single follow-up sync").
    pub async fn recv_batch(&self) -> Option<Vec<Event>> {
        let mut rx = self.rx.lock().await;
        let first = rx.recv().await?;
        let mut batch = vec![first];
        while let Ok(ev) = rx.try_recv() {
            batch.push(ev);
        }
        Some(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_coalesces_pending_events() {
        let buf = RingBuffer::new(16);
        let tx = buf.sender();
        tx.send(Event::Created {
            kind: ObjectKind::Ingress,
            key: "ns/a".into(),
        })
        .await
        .unwrap();
        tx.send(Event::Updated {
            kind: ObjectKind::Ingress,
            key: "ns/b".into(),
        })
        .await
        .unwrap();
        let batch = buf.recv_batch().await.unwrap();
        assert_eq!(batch.len(), 2);
    }
}
