mod channel;
pub mod memory;
pub mod tungstenite;

pub use channel::{Channel, ChannelError, ChannelStatus, ClosedListener, DataListener, EarlyStrategy, OpenListener};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn early_sends_flush_before_open_completes_send() {
        let transport = MemoryTransport::new();
        let mut listener = transport.bind("localhost", 9001).await.unwrap();

        let channel = Channel::outgoing("peer", "ws://localhost:9001", EarlyStrategy::Queue(10));
        channel.send(b"first".to_vec()).await.unwrap();
        channel.send(b"second".to_vec()).await.unwrap();

        let open_transport = transport.clone();
        let open_channel = channel.clone();
        let opener = tokio::spawn(async move { open_channel.open(&open_transport).await });

        let (_peer_url, _sender, mut receiver) = listener.accept().await.unwrap();
        opener.await.unwrap().unwrap();

        channel.send(b"third".to_vec()).await.unwrap();

        use cohort_interfaces::{TransportEvent, TransportReceiver};
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(TransportEvent::Data(d)) = receiver.recv().await {
                received.push(d);
            }
        }
        assert_eq!(received, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);
        assert_eq!(channel.status().await, ChannelStatus::Open);
    }

    #[tokio::test]
    async fn send_rejected_when_early_strategy_is_reject() {
        let channel = Channel::outgoing("peer", "ws://localhost:9002", EarlyStrategy::Reject);
        let err = channel.send(b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChannelError::EarlyRejected(_)));
    }

    #[tokio::test]
    async fn queue_rejects_once_capacity_exceeded() {
        let channel = Channel::outgoing("peer", "ws://localhost:9003", EarlyStrategy::Queue(2));
        channel.send(b"a".to_vec()).await.unwrap();
        channel.send(b"b".to_vec()).await.unwrap();
        let err = channel.send(b"c".to_vec()).await.unwrap_err();
        assert!(matches!(err, ChannelError::EarlyRejected(_)));
    }

    #[tokio::test]
    async fn listener_panic_as_error_does_not_block_other_listeners() {
        let transport = MemoryTransport::new();
        let mut listener = transport.bind("localhost", 9004).await.unwrap();
        let channel = Channel::outgoing("peer", "ws://localhost:9004", EarlyStrategy::Queue(10));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_a = calls.clone();
        channel.register_listener(Box::new(move |_data| {
            calls_a.fetch_add(1, Ordering::SeqCst);
            Err("boom".into())
        }));
        let calls_b = calls.clone();
        channel.register_listener(Box::new(move |_data| {
            calls_b.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        let open_transport = transport.clone();
        let open_channel = channel.clone();
        let opener = tokio::spawn(async move { open_channel.open(&open_transport).await });
        let (_peer_url, sender, _receiver) = listener.accept().await.unwrap();
        opener.await.unwrap().unwrap();

        use cohort_interfaces::TransportSender;
        sender.send(b"hello".to_vec()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn open_is_illegal_outside_created() {
        let transport = MemoryTransport::new();
        let channel = Channel::outgoing("peer", "ws://localhost:9005", EarlyStrategy::Queue(10));
        let err = channel.open(&transport).await.unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));

        let _listener = transport.bind("localhost", 9006).await.unwrap();
        let channel2 = Channel::outgoing("peer2", "ws://localhost:9006", EarlyStrategy::Queue(10));
        channel2.open(&transport).await.unwrap();
        let err = channel2.open(&transport).await.unwrap_err();
        assert!(matches!(err, ChannelError::AlreadyOpen(_)));
    }
}
