use {
    crate::transport::{BroadcasterHandle, ClientId},
    bytes::Bytes,
    hyper::body::Sender,
    tokio::sync::mpsc,
};

/// One byte-stream viewer (HTTP-FLV or camera): a bounded queue drained
/// by a single write task into the response body.
///
/// The broadcaster enqueues non-blocking; when the queue is full the
/// packet is simply dropped for this viewer. The write task exits on
/// peer disconnect, write failure or broadcaster close, announcing the
/// departure on the client-closed notifier exactly once.
pub struct StreamSubscriber;

impl StreamSubscriber {
    /// Starts the write task and returns the queue producer to hand to
    /// the broadcaster.
    pub fn spawn(
        key: &str,
        client_id: &str,
        capacity: usize,
        handle: BroadcasterHandle,
        body_tx: Sender,
    ) -> mpsc::Sender<Bytes> {
        let (tx, rx) = mpsc::channel(capacity);
        tokio::spawn(write_loop(
            key.to_owned(),
            client_id.to_owned(),
            rx,
            handle,
            body_tx,
        ));
        tx
    }
}

async fn write_loop(
    key: String,
    client_id: ClientId,
    mut rx: mpsc::Receiver<Bytes>,
    handle: BroadcasterHandle,
    mut body_tx: Sender,
) {
    let mut closed = handle.subscribe_closed();
    loop {
        tokio::select! {
            maybe_packet = rx.recv() => match maybe_packet {
                Some(packet) => {
                    if let Err(e) = body_tx.send_data(packet).await {
                        log::debug!("stream[{}]: write to {} failed: {}", key, client_id, e);
                        break;
                    }
                }
                None => break,
            },
            _ = closed.recv() => break,
        }
    }

    handle.notify_client_closed(client_id.clone());
    log::info!("stream[{}]: client {} detached", key, client_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{signal_channels, CloseKind};
    use hyper::body::HttpBody;
    use hyper::Body;

    fn handle_pair() -> (
        BroadcasterHandle,
        tokio::sync::mpsc::UnboundedReceiver<ClientId>,
        crate::transport::BroadcasterClosedTx,
    ) {
        let (client_tx, client_rx, closed_tx) = signal_channels();
        (
            BroadcasterHandle::new(client_tx, closed_tx.clone()),
            client_rx,
            closed_tx,
        )
    }

    #[tokio::test]
    async fn queue_packets_reach_the_response_body_in_order() {
        let (handle, _client_rx, _closed_tx) = handle_pair();
        let (sender, mut body) = Body::channel();
        let tx = StreamSubscriber::spawn("room", "c1", 8, handle, sender);

        tx.send(Bytes::from_static(b"one")).await.unwrap();
        tx.send(Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(body.data().await.unwrap().unwrap(), Bytes::from_static(b"one"));
        assert_eq!(body.data().await.unwrap().unwrap(), Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn broadcaster_close_terminates_and_signals_departure() {
        let (handle, mut client_rx, closed_tx) = handle_pair();
        let (sender, _body) = Body::channel();
        let _tx = StreamSubscriber::spawn("room", "c1", 8, handle, sender);

        closed_tx.send(CloseKind::Shutdown).unwrap();
        assert_eq!(client_rx.recv().await.unwrap(), "c1");
    }

    #[tokio::test]
    async fn dropped_body_ends_the_write_loop() {
        let (handle, mut client_rx, _closed_tx) = handle_pair();
        let (sender, body) = Body::channel();
        let tx = StreamSubscriber::spawn("room", "c1", 8, handle, sender);

        drop(body);
        // the failing write surfaces on the next packet
        let _ = tx.send(Bytes::from_static(b"data")).await;
        assert_eq!(client_rx.recv().await.unwrap(), "c1");
    }

    #[tokio::test]
    async fn dropped_queue_producer_ends_the_write_loop() {
        let (handle, mut client_rx, _closed_tx) = handle_pair();
        let (sender, _body) = Body::channel();
        let tx = StreamSubscriber::spawn("room", "c1", 8, handle, sender);

        drop(tx);
        assert_eq!(client_rx.recv().await.unwrap(), "c1");
    }
}
