use tokio::sync::{broadcast, mpsc};

pub type ClientId = String;

/// Why a broadcaster is going away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// The upstream or ingest feeding the channel ended.
    Ended,
    /// Operator/service shutdown.
    Shutdown,
}

pub type ClientClosedTx = mpsc::UnboundedSender<ClientId>;
pub type ClientClosedRx = mpsc::UnboundedReceiver<ClientId>;

pub type BroadcasterClosedTx = broadcast::Sender<CloseKind>;
pub type BroadcasterClosedRx = broadcast::Receiver<CloseKind>;

pub fn signal_channels() -> (ClientClosedTx, ClientClosedRx, BroadcasterClosedTx) {
    let (client_closed_tx, client_closed_rx) = mpsc::unbounded_channel();
    let (closed_tx, _) = broadcast::channel(4);
    (client_closed_tx, client_closed_rx, closed_tx)
}

/// The only back-pointer a subscriber holds to its broadcaster: the two
/// notifier channels, no shared mutable state.
#[derive(Clone)]
pub struct BroadcasterHandle {
    client_closed: ClientClosedTx,
    closed: BroadcasterClosedTx,
}

impl BroadcasterHandle {
    pub fn new(client_closed: ClientClosedTx, closed: BroadcasterClosedTx) -> Self {
        Self {
            client_closed,
            closed,
        }
    }

    /// Announces this client's departure. The broadcaster may already be
    /// gone, in which case the signal is moot.
    pub fn notify_client_closed(&self, id: ClientId) {
        let _ = self.client_closed.send(id);
    }

    pub fn subscribe_closed(&self) -> BroadcasterClosedRx {
        self.closed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn client_closed_signal_reaches_inbox() {
        let (tx, mut rx, closed) = signal_channels();
        let handle = BroadcasterHandle::new(tx, closed);
        handle.notify_client_closed("c1".into());
        assert_eq!(rx.recv().await.unwrap(), "c1");
    }

    #[tokio::test]
    async fn closed_notifier_fans_out_to_all_subscribers() {
        let (tx, _rx, closed) = signal_channels();
        let handle = BroadcasterHandle::new(tx, closed.clone());
        let mut a = handle.subscribe_closed();
        let mut b = handle.subscribe_closed();
        closed.send(CloseKind::Shutdown).unwrap();
        assert_eq!(a.recv().await.unwrap(), CloseKind::Shutdown);
        assert_eq!(b.recv().await.unwrap(), CloseKind::Shutdown);
    }
}
