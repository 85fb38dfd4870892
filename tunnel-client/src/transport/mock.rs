//! In-memory transport standing in for a remote agent.
//!
//! Records every frame the orchestrator sends and delivers replies that were
//! pushed by the test. A [`Responder`] turns it into a scripted agent: each
//! sent frame is handed to the responder and its replies are delivered to
//! `recv()` in order.

use super::{Transport, TransportError};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

/// Scripted agent: maps one sent frame to zero or more reply frames.
pub type Responder = Arc<dyn Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync>;

/// Operation a one-shot fault is injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next `connect()`
    Connect,
    /// Next `send()`
    Send,
    /// Next `recv()`
    Recv,
}

/// `None` wakes a parked `recv()` with `ConnectionClosed`.
type Inbox = mpsc::UnboundedReceiver<Option<Vec<u8>>>;

/// In-memory agent link. Clones share state, so a test keeps a handle
/// after moving one into a channel.
#[derive(Clone)]
pub struct MockTransport {
    link: Arc<Mutex<Link>>,
    replies: mpsc::UnboundedSender<Option<Vec<u8>>>,
    inbox: Arc<tokio::sync::Mutex<Inbox>>,
}

#[derive(Default)]
struct Link {
    up: bool,
    peer: Option<String>,
    sent: Vec<Vec<u8>>,
    responder: Option<Responder>,
    connect_fault: Option<String>,
    send_fault: Option<String>,
    recv_fault: Option<String>,
}

impl Link {
    fn fault(&mut self, op: Fault) -> &mut Option<String> {
        match op {
            Fault::Connect => &mut self.connect_fault,
            Fault::Send => &mut self.send_fault,
            Fault::Recv => &mut self.recv_fault,
        }
    }
}

impl MockTransport {
    /// Silent agent: replies only when pushed.
    pub fn new() -> Self {
        let (replies, inbox) = mpsc::unbounded_channel();
        Self {
            link: Arc::default(),
            replies,
            inbox: Arc::new(tokio::sync::Mutex::new(inbox)),
        }
    }

    /// Scripted agent answering through `responder`.
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<Vec<u8>> + Send + Sync + 'static,
    {
        let transport = Self::new();
        transport.lock().responder = Some(Arc::new(responder));
        transport
    }

    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a reply frame to the next `recv()`.
    pub fn push_reply(&self, frame: Vec<u8>) {
        // The inbox lives as long as any clone, so the send cannot fail.
        let _ = self.replies.send(Some(frame));
    }

    /// Frames sent so far, oldest first.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.lock().sent.clone()
    }

    /// Most recent frame sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent.last().cloned()
    }

    /// Address of the last successful `connect()`.
    pub fn peer(&self) -> Option<String> {
        self.lock().peer.clone()
    }

    /// Make the next call of `op` fail with `reason`.
    pub fn inject(&self, op: Fault, reason: &str) {
        *self.lock().fault(op) = Some(reason.to_string());
    }

    /// The agent goes away: the link drops and a parked `recv()` wakes.
    pub fn hang_up(&self) {
        self.lock().up = false;
        let _ = self.replies.send(None);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let link = self.lock();
        f.debug_struct("MockTransport")
            .field("up", &link.up)
            .field("peer", &link.peer)
            .field("sent", &link.sent.len())
            .field("scripted", &link.responder.is_some())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, address: &str) -> Result<(), TransportError> {
        let mut link = self.lock();
        if let Some(reason) = link.connect_fault.take() {
            return Err(TransportError::Unreachable(format!("{address}: {reason}")));
        }
        link.up = true;
        link.peer = Some(address.to_string());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let responder = {
            let mut link = self.lock();
            if !link.up {
                return Err(TransportError::NotConnected);
            }
            if let Some(reason) = link.send_fault.take() {
                return Err(TransportError::WriteFailed(reason));
            }
            link.sent.push(data.to_vec());
            link.responder.clone()
        };

        // Run the script outside the lock; it may inspect the mock.
        for reply in responder.map(|script| script(data)).unwrap_or_default() {
            self.push_reply(reply);
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        {
            let mut link = self.lock();
            if !link.up {
                return Err(TransportError::NotConnected);
            }
            if let Some(reason) = link.recv_fault.take() {
                return Err(TransportError::ReadFailed(reason));
            }
        }

        match self.inbox.lock().await.recv().await {
            Some(Some(frame)) => Ok(frame),
            Some(None) | None => Err(TransportError::ConnectionClosed),
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().up
    }

    async fn close(&self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.lock().up, false) {
            let _ = self.replies.send(None);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connected() -> MockTransport {
        let transport = MockTransport::new();
        transport.connect("192.168.1.33:3333").await.unwrap();
        transport
    }

    // ===========================================
    // Link State
    // ===========================================

    #[tokio::test]
    async fn connect_records_peer() {
        let transport = MockTransport::new();
        assert!(!transport.is_connected());
        assert_eq!(transport.peer(), None);

        transport.connect("192.168.1.33:3333").await.unwrap();

        assert!(transport.is_connected());
        assert_eq!(transport.peer().as_deref(), Some("192.168.1.33:3333"));
    }

    #[tokio::test]
    async fn io_requires_connection() {
        let transport = MockTransport::new();
        assert!(matches!(transport.send(b"x").await, Err(TransportError::NotConnected)));
        assert!(matches!(transport.recv().await, Err(TransportError::NotConnected)));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn clones_share_the_link() {
        let a = connected().await;
        let b = a.clone();

        a.send(b"from a").await.unwrap();
        b.send(b"from b").await.unwrap();

        assert!(b.is_connected());
        assert_eq!(a.sent(), vec![b"from a".to_vec(), b"from b".to_vec()]);
        assert_eq!(b.last_sent(), Some(b"from b".to_vec()));
    }

    // ===========================================
    // Replies
    // ===========================================

    #[tokio::test]
    async fn pushed_replies_arrive_in_order() {
        let transport = connected().await;
        transport.push_reply(b"first".to_vec());
        transport.push_reply(b"second".to_vec());

        assert_eq!(transport.recv().await.unwrap(), b"first");
        assert_eq!(transport.recv().await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn responder_answers_each_frame() {
        let transport = MockTransport::with_responder(|frame| {
            vec![frame.to_ascii_uppercase(), b"ack".to_vec()]
        });
        transport.connect("agent").await.unwrap();

        transport.send(b"link").await.unwrap();

        assert_eq!(transport.recv().await.unwrap(), b"LINK");
        assert_eq!(transport.recv().await.unwrap(), b"ack");
    }

    #[tokio::test]
    async fn close_and_hang_up_wake_parked_recv() {
        for hang_up in [false, true] {
            let transport = connected().await;
            let reader = transport.clone();
            let parked = tokio::spawn(async move { reader.recv().await });
            tokio::task::yield_now().await;

            if hang_up {
                transport.hang_up();
            } else {
                transport.close().await.unwrap();
            }

            assert!(matches!(
                parked.await.unwrap(),
                Err(TransportError::ConnectionClosed)
            ));
            assert!(!transport.is_connected());
        }
    }

    // ===========================================
    // Fault Injection
    // ===========================================

    #[tokio::test]
    async fn connect_fault_is_one_shot() {
        let transport = MockTransport::new();
        transport.inject(Fault::Connect, "no route to host");

        assert!(matches!(
            transport.connect("agent").await,
            Err(TransportError::Unreachable(_))
        ));
        assert!(!transport.is_connected());
        transport.connect("agent").await.unwrap();
    }

    #[tokio::test]
    async fn send_fault_drops_the_frame() {
        let transport = connected().await;
        transport.inject(Fault::Send, "broken pipe");

        assert!(matches!(
            transport.send(b"lost").await,
            Err(TransportError::WriteFailed(_))
        ));
        transport.send(b"kept").await.unwrap();
        assert_eq!(transport.sent(), vec![b"kept".to_vec()]);
    }

    #[tokio::test]
    async fn recv_fault_keeps_pending_reply() {
        let transport = connected().await;
        transport.push_reply(b"reply".to_vec());
        transport.inject(Fault::Recv, "reset");

        assert!(matches!(
            transport.recv().await,
            Err(TransportError::ReadFailed(_))
        ));
        assert_eq!(transport.recv().await.unwrap(), b"reply");
    }
}
