use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::{ClientEvent, ClientFactory, ClientHandle, GroupInfo, MessagingClient};
use crate::core::error::BotError;
use crate::core::poll::PollJob;
use crate::core::session_store::SessionBinding;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lines written to the bridge process, one JSON object per line.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Initialize {
        id: u64,
        client_id: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    SendPoll {
        id: u64,
        destination: &'a str,
        name: &'a str,
        options: &'a [String; 2],
        allow_multiple_answers: bool,
    },
    ListGroups {
        id: u64,
    },
}

/// Lines read back from the bridge process.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BridgeMessage {
    Qr {
        payload: String,
    },
    Authenticated,
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Ready,
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    LoadingScreen {
        percent: u8,
        #[serde(default)]
        message: String,
    },
    SessionSaved {
        session: String,
    },
    SessionRemoved,
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        data: Value,
    },
}

struct Reply {
    ok: bool,
    error: Option<String>,
    data: Value,
}

/// `None` once the bridge's stdout has closed; no reply can arrive after that.
type PendingReplies = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<Reply>>>>>;

/// Messaging client backed by a sidecar process that drives the actual
/// messaging session. Events and replies arrive interleaved on its stdout.
pub struct BridgeClient {
    _child: Mutex<Option<Child>>,
    next_id: AtomicU64,
    pending: PendingReplies,
    tx_req: mpsc::Sender<String>,
    binding: SessionBinding,
}

impl BridgeClient {
    pub async fn spawn(
        command: &str,
        args: &[String],
        binding: SessionBinding,
    ) -> Result<ClientHandle, BotError> {
        info!("Starting messaging bridge: {} {}", command, args.join(" "));

        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BotError::Client(format!("failed to start '{}': {}", command, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| BotError::Client("bridge stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BotError::Client("bridge stdout unavailable".to_string()))?;
        let stderr = child.stderr.take();

        let (tx_req, rx_req) = mpsc::channel::<String>(100);
        let (tx_events, rx_events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let pending: PendingReplies = Arc::new(Mutex::new(Some(HashMap::new())));

        tokio::spawn(write_bridge_input(stdin, rx_req));

        tokio::spawn(read_bridge_output(
            stdout,
            pending.clone(),
            tx_events,
            binding.clone(),
        ));

        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!("Bridge STDERR: {}", line);
                }
            });
        }

        let client = Arc::new(Self {
            _child: Mutex::new(Some(child)),
            next_id: AtomicU64::new(1),
            pending,
            tx_req,
            binding,
        });

        Ok(ClientHandle {
            client,
            events: rx_events,
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn call(&self, id: u64, command: BridgeCommand<'_>) -> Result<Value, BotError> {
        let line = serde_json::to_string(&command).map_err(|e| BotError::Client(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        match self.pending.lock().await.as_mut() {
            Some(pending) => {
                pending.insert(id, tx);
            }
            None => return Err(BotError::Client("bridge process has exited".to_string())),
        }

        if self.tx_req.send(line).await.is_err() {
            if let Some(pending) = self.pending.lock().await.as_mut() {
                pending.remove(&id);
            }
            return Err(BotError::Client("bridge process is gone".to_string()));
        }

        let reply = rx
            .await
            .map_err(|_| BotError::Client("bridge closed before replying".to_string()))?;
        if reply.ok {
            Ok(reply.data)
        } else {
            Err(BotError::Client(
                reply.error.unwrap_or_else(|| "unknown bridge error".to_string()),
            ))
        }
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn initialize(&self) -> Result<(), BotError> {
        let session = match self.binding.restore().await {
            Ok(blob) => blob.map(|b| BASE64.encode(b)),
            Err(e) => {
                warn!("Could not restore stored session, starting fresh: {}", e);
                None
            }
        };
        let id = self.next_id();
        self.call(
            id,
            BridgeCommand::Initialize {
                id,
                client_id: self.binding.client_id(),
                session,
            },
        )
        .await?;
        Ok(())
    }

    async fn send_poll(&self, destination: &str, poll: &PollJob) -> Result<(), BotError> {
        let id = self.next_id();
        self.call(
            id,
            BridgeCommand::SendPoll {
                id,
                destination,
                name: &poll.name,
                options: &poll.options,
                allow_multiple_answers: poll.allow_multiple_answers,
            },
        )
        .await
        .map_err(|e| match e {
            BotError::Client(message) => BotError::Dispatch(message),
            other => other,
        })?;
        Ok(())
    }

    async fn list_groups(&self) -> Result<Vec<GroupInfo>, BotError> {
        let id = self.next_id();
        let data = self.call(id, BridgeCommand::ListGroups { id }).await?;
        let groups = data.get("groups").cloned().unwrap_or(data);
        serde_json::from_value(groups).map_err(|e| BotError::Client(e.to_string()))
    }
}

/// Forwards queued command lines to the bridge. Stops at the first write or
/// flush error, which drops the queue and fails later sends.
async fn write_bridge_input<W>(stdin: W, mut rx_req: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    let mut writer = tokio::io::BufWriter::new(stdin);
    while let Some(line) = rx_req.recv().await {
        debug!("Bridge TX: {}", line);
        if let Err(e) = writer.write_all(format!("{}\n", line).as_bytes()).await {
            error!("Failed to write to bridge stdin: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            error!("Failed to flush bridge stdin: {}", e);
            break;
        }
    }
}

async fn read_bridge_output(
    stdout: ChildStdout,
    pending: PendingReplies,
    events: mpsc::Sender<ClientEvent>,
    binding: SessionBinding,
) {
    let mut reader = BufReader::new(stdout).lines();
    while let Ok(Some(line)) = reader.next_line().await {
        debug!("Bridge RX: {}", line);
        let message = match serde_json::from_str::<BridgeMessage>(&line) {
            Ok(message) => message,
            Err(_) => {
                warn!("Unparsed bridge output: {}", line);
                continue;
            }
        };

        let event = match message {
            BridgeMessage::Response {
                id,
                ok,
                error,
                data,
            } => {
                let waiter = pending
                    .lock()
                    .await
                    .as_mut()
                    .and_then(|pending| pending.remove(&id));
                if let Some(tx) = waiter {
                    let _ = tx.send(Reply { ok, error, data });
                }
                continue;
            }
            BridgeMessage::Qr { payload } => ClientEvent::Qr(payload),
            BridgeMessage::Authenticated => ClientEvent::Authenticated,
            BridgeMessage::AuthFailure { message } => ClientEvent::AuthFailure(message),
            BridgeMessage::Ready => ClientEvent::Ready,
            BridgeMessage::Disconnected { reason } => ClientEvent::Disconnected(reason),
            BridgeMessage::LoadingScreen { percent, message } => {
                ClientEvent::LoadingScreen { percent, message }
            }
            BridgeMessage::SessionSaved { session } => {
                match BASE64.decode(session.as_bytes()) {
                    Ok(blob) => {
                        if let Err(e) = binding.persist(&blob).await {
                            error!("Failed to persist session: {}", e);
                            continue;
                        }
                    }
                    Err(e) => {
                        warn!("Bridge sent an undecodable session blob: {}", e);
                        continue;
                    }
                }
                ClientEvent::SessionSaved
            }
            BridgeMessage::SessionRemoved => {
                if let Err(e) = binding.clear().await {
                    error!("Failed to remove stored session: {}", e);
                }
                ClientEvent::SessionRemoved
            }
        };

        if events.send(event).await.is_err() {
            break;
        }
    }

    warn!("Bridge stdout closed");
    // Dropping the senders fails every outstanding call; later calls see `None`.
    pending.lock().await.take();
    let _ = events
        .send(ClientEvent::Exited("bridge process exited".to_string()))
        .await;
}

/// Spawns one [`BridgeClient`] per build using the configured command line.
pub struct BridgeClientFactory {
    command: String,
    args: Vec<String>,
}

impl BridgeClientFactory {
    pub fn new(command: &str, args: &[String]) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
        }
    }
}

#[async_trait]
impl ClientFactory for BridgeClientFactory {
    async fn build(&self, binding: SessionBinding) -> Result<ClientHandle, BotError> {
        BridgeClient::spawn(&self.command, &self.args, binding).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session_store::{self, MemorySessionStore};
    use std::time::Duration;

    fn memory_binding() -> SessionBinding {
        session_store::bind(Arc::new(MemorySessionStore::new()), "pollbot-session")
    }

    #[test]
    fn send_poll_command_shape() {
        let options = ["Yes".to_string(), "No".to_string()];
        let line = serde_json::to_value(BridgeCommand::SendPoll {
            id: 7,
            destination: "1203630@g.us",
            name: "Lunch?",
            options: &options,
            allow_multiple_answers: false,
        })
        .unwrap();
        assert_eq!(
            line,
            serde_json::json!({
                "type": "send_poll",
                "id": 7,
                "destination": "1203630@g.us",
                "name": "Lunch?",
                "options": ["Yes", "No"],
                "allow_multiple_answers": false
            })
        );
    }

    #[test]
    fn initialize_omits_missing_session() {
        let line = serde_json::to_value(BridgeCommand::Initialize {
            id: 1,
            client_id: "pollbot-session",
            session: None,
        })
        .unwrap();
        assert!(line.get("session").is_none());
        assert_eq!(line["type"], "initialize");
    }

    #[test]
    fn parses_events_and_responses() {
        let qr: BridgeMessage = serde_json::from_str(r#"{"type":"qr","payload":"2@abc"}"#).unwrap();
        assert!(matches!(qr, BridgeMessage::Qr { payload } if payload == "2@abc"));

        let loading: BridgeMessage =
            serde_json::from_str(r#"{"type":"loading_screen","percent":42}"#).unwrap();
        assert!(matches!(loading, BridgeMessage::LoadingScreen { percent: 42, .. }));

        let reply: BridgeMessage =
            serde_json::from_str(r#"{"type":"response","id":3,"ok":false,"error":"boom"}"#)
                .unwrap();
        assert!(
            matches!(reply, BridgeMessage::Response { id: 3, ok: false, error: Some(e), .. } if e == "boom")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn calls_fail_fast_once_the_bridge_has_exited() {
        let factory = BridgeClientFactory::new("true", &[]);
        let ClientHandle { client, mut events } = factory.build(memory_binding()).await.unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                match events.recv().await {
                    Some(ClientEvent::Exited(reason)) => return reason,
                    Some(_) => continue,
                    None => panic!("event stream closed without an exit event"),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(reason, "bridge process exited");

        let init = tokio::time::timeout(Duration::from_secs(3), client.initialize()).await;
        assert!(matches!(init, Ok(Err(BotError::Client(_)))));

        let poll = PollJob::new("Lunch?", &["Yes".to_string(), "No".to_string()], false, false)
            .unwrap();
        let send =
            tokio::time::timeout(Duration::from_secs(3), client.send_poll("1@g.us", &poll)).await;
        assert!(matches!(send, Ok(Err(BotError::Dispatch(_)))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn call_in_flight_when_bridge_exits_is_failed() {
        // `sleep` never answers, then exits shortly after the request is queued.
        let factory = BridgeClientFactory::new("sleep", &["0.3".to_string()]);
        let ClientHandle { client, .. } = factory.build(memory_binding()).await.unwrap();

        let init = tokio::time::timeout(Duration::from_secs(3), client.initialize()).await;
        assert!(matches!(init, Ok(Err(BotError::Client(_)))));
    }

    #[tokio::test]
    async fn missing_bridge_command_is_a_client_error() {
        let factory = BridgeClientFactory::new("pollbot-bridge-that-does-not-exist", &[]);
        assert!(matches!(
            factory.build(memory_binding()).await,
            Err(BotError::Client(_))
        ));
    }

    /// Accepts writes but refuses to flush, like a pipe whose reader is gone.
    struct UnflushablePipe;

    impl AsyncWrite for UnflushablePipe {
        fn poll_write(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            buf: &[u8],
        ) -> std::task::Poll<std::io::Result<usize>> {
            std::task::Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::ErrorKind::BrokenPipe.into()))
        }

        fn poll_shutdown(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writer_stops_on_flush_error() {
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(write_bridge_input(UnflushablePipe, rx));

        tx.send("{\"type\":\"list_groups\",\"id\":1}".to_string())
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(3), writer)
            .await
            .expect("writer kept running after a failed flush")
            .unwrap();
        assert!(tx.send("next".to_string()).await.is_err());
    }
}
