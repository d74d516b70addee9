//! In-memory hub links for driver and session tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use frames::{HubMessage, RECORD_SEPARATOR, RecordBuffer};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{Link, Transport};
use crate::error::ChatError;

#[derive(Default)]
struct Script {
    links: VecDeque<Option<FakeLink>>,
    tokens: Vec<String>,
}

/// Transport whose `open` hands out pre-scripted in-memory links.
#[derive(Clone, Default)]
pub struct FakeTransport {
    script: Arc<Mutex<Script>>,
    sent: Arc<AtomicUsize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a link whose server side has already accepted the handshake.
    pub fn accept_next(&self) -> ServerSide {
        let server = self.queue_link();
        server.send_raw("{}");
        server
    }

    /// Queue a link whose server side rejects the handshake.
    pub fn reject_next(&self, error: &str) -> ServerSide {
        let server = self.queue_link();
        server.send_raw(&serde_json::json!({ "error": error }).to_string());
        server
    }

    /// Queue a link whose server side never answers the handshake.
    pub fn stall_next(&self) -> ServerSide {
        self.queue_link()
    }

    /// Queue an `open` call that fails outright.
    pub fn refuse_next(&self) {
        self.script.lock().expect("script lock").links.push_back(None);
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.script.lock().expect("script lock").tokens.len()
    }

    /// Credentials passed to `open`, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.script.lock().expect("script lock").tokens.clone()
    }

    /// Text payloads sent by clients across every link.
    pub fn sent_count(&self) -> usize {
        self.sent.load(Ordering::SeqCst)
    }

    fn queue_link(&self) -> ServerSide {
        let (to_client, from_server) = mpsc::unbounded_channel();
        let (to_server, from_client) = mpsc::unbounded_channel();
        let link = FakeLink { incoming: from_server, outgoing: to_server, sent: Arc::clone(&self.sent) };
        self.script.lock().expect("script lock").links.push_back(Some(link));
        ServerSide { to_client, from_client, buffer: RecordBuffer::new() }
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _url: &str, access_token: &str) -> Result<Box<dyn Link>, ChatError> {
        let next = {
            let mut script = self.script.lock().expect("script lock");
            script.tokens.push(access_token.to_owned());
            script.links.pop_front()
        };
        match next {
            Some(Some(link)) => Ok(Box::new(link)),
            Some(None) | None => Err(ChatError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "scripted refusal",
            ))),
        }
    }
}

struct FakeLink {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
    sent: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl Link for FakeLink {
    async fn send_text(&mut self, text: String) -> Result<(), ChatError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        self.outgoing.send(text).map_err(|_| ChatError::ConnectionLost)
    }

    async fn recv_text(&mut self) -> Option<Result<String, ChatError>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

// =============================================================================
// SERVER SIDE
// =============================================================================

/// Test-controlled end of a fake link. Dropping it drops the connection.
pub struct ServerSide {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
    buffer: RecordBuffer,
}

impl ServerSide {
    pub fn send_raw(&self, record: &str) {
        let mut text = record.to_owned();
        text.push(RECORD_SEPARATOR);
        self.to_client.send(text).expect("client link alive");
    }

    pub fn send(&self, message: &HubMessage) {
        self.to_client
            .send(frames::encode_message(message))
            .expect("client link alive");
    }

    /// Push a `ReceiveMessage` invocation carrying `payload`.
    pub fn push_message(&self, payload: Value) {
        self.send(&HubMessage::Invocation {
            invocation_id: None,
            target: "ReceiveMessage".to_owned(),
            arguments: vec![payload],
        });
    }

    /// Next hub message from the client, skipping the handshake and pings.
    pub async fn next_message(&mut self) -> HubMessage {
        tokio::time::timeout(Duration::from_secs(2), self.recv_message())
            .await
            .expect("client message timed out")
            .expect("client link closed")
    }

    /// Like [`Self::next_message`] without a deadline; `None` once the
    /// client side is gone.
    async fn recv_message(&mut self) -> Option<HubMessage> {
        loop {
            let chunk = self.from_client.recv().await?;
            for record in self.buffer.push(&chunk) {
                if record.contains("\"protocol\"") {
                    continue;
                }
                let message = frames::decode_message(&record).expect("client record decodes");
                if message != HubMessage::Ping {
                    return Some(message);
                }
            }
        }
    }

    /// Answer every client invocation with an empty completion from a
    /// background task, recording what was invoked.
    pub fn auto_ack(self) -> AckingServer {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pusher = self.to_client.clone();
        let recorded = Arc::clone(&seen);
        let mut server = self;
        let task = tokio::spawn(async move {
            while let Some(message) = server.recv_message().await {
                recorded.lock().expect("seen lock").push(message.clone());
                if let HubMessage::Invocation { invocation_id: Some(id), .. } = message {
                    let completion = HubMessage::Completion { invocation_id: id, result: None, error: None };
                    if server.to_client.send(frames::encode_message(&completion)).is_err() {
                        break;
                    }
                }
            }
        });
        AckingServer { pusher, seen, task }
    }
}

/// Server that acknowledges invocations until dropped.
pub struct AckingServer {
    pusher: mpsc::UnboundedSender<String>,
    seen: Arc<Mutex<Vec<HubMessage>>>,
    task: JoinHandle<()>,
}

impl AckingServer {
    pub fn push_message(&self, payload: Value) {
        let record = frames::encode_message(&HubMessage::Invocation {
            invocation_id: None,
            target: "ReceiveMessage".to_owned(),
            arguments: vec![payload],
        });
        self.pusher.send(record).expect("client link alive");
    }

    pub fn invocations(&self) -> Vec<HubMessage> {
        self.seen.lock().expect("seen lock").clone()
    }
}

impl Drop for AckingServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
