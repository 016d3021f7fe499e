//! Subprocess skill bridge.
//!
//! Spawns the configured command and speaks JSON lines over its
//! stdin/stdout. Responses are matched to requests by id, so concurrent
//! invocations share one process.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use enrichflow_document::Value;
use enrichflow_shared::{BridgeConfig, EnrichflowError, Result};
use enrichflow_skills::{SkillInvocation, SkillInvoker, SkillOutputs};

// ---------------------------------------------------------------------------
// Protocol types
// ---------------------------------------------------------------------------

/// Request message sent to the bridge.
#[derive(Debug, serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RequestMessage<'a> {
    Invoke {
        id: String,
        invocation: &'a SkillInvocation,
    },
    Shutdown,
}

/// Response message received from the bridge.
#[derive(Debug, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseMessage {
    Ready,
    Result {
        id: String,
        #[serde(default)]
        outputs: IndexMap<String, serde_json::Value>,
    },
    Error {
        id: String,
        error: String,
    },
}

type Reply = std::result::Result<IndexMap<String, serde_json::Value>, String>;
/// Waiting invocations by request id; `None` once the bridge has closed.
type Pending = Arc<Mutex<Option<HashMap<String, oneshot::Sender<Reply>>>>>;

// ---------------------------------------------------------------------------
// Bridge invoker
// ---------------------------------------------------------------------------

/// [`SkillInvoker`] backed by a long-lived bridge subprocess.
pub(crate) struct BridgeInvoker {
    child: tokio::sync::Mutex<Child>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Pending,
    request_counter: AtomicU64,
    reader: JoinHandle<()>,
}

impl BridgeInvoker {
    /// Spawn the bridge and wait for its ready message.
    pub(crate) async fn spawn(config: &BridgeConfig) -> Result<Self> {
        info!(cmd = %config.command, args = ?config.args, "spawning skill bridge");

        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit()) // Bridge logs go to parent stderr
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| EnrichflowError::io(&config.command, e))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EnrichflowError::invalid_state("failed to capture bridge stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EnrichflowError::invalid_state("failed to capture bridge stdout"))?;

        let mut lines = BufReader::new(stdout).lines();
        wait_for_ready(&mut lines).await?;

        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        let reader = tokio::spawn(read_responses(lines, Arc::clone(&pending)));

        Ok(Self {
            child: tokio::sync::Mutex::new(child),
            stdin: tokio::sync::Mutex::new(stdin),
            pending,
            request_counter: AtomicU64::new(0),
            reader,
        })
    }

    async fn send(&self, line: String) -> std::io::Result<()> {
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    }

    /// Send shutdown and wait for the bridge to exit.
    pub(crate) async fn shutdown(&self) -> Result<()> {
        let json = serde_json::to_string(&RequestMessage::Shutdown)
            .map_err(|e| EnrichflowError::parse(e.to_string()))?;
        if let Err(e) = self.send(json).await {
            warn!("failed to send bridge shutdown: {e}");
        }

        match self.child.lock().await.wait().await {
            Ok(status) => info!(?status, "bridge exited"),
            Err(e) => warn!("bridge wait error: {e}"),
        }
        self.reader.abort();
        Ok(())
    }
}

#[async_trait]
impl SkillInvoker for BridgeInvoker {
    async fn invoke(&self, invocation: &SkillInvocation) -> Result<SkillOutputs> {
        let failed = |msg: String| {
            EnrichflowError::skill(&invocation.skill, invocation.instance.to_string(), msg)
        };

        let n = self.request_counter.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("req-{n}");
        let request = RequestMessage::Invoke {
            id: id.clone(),
            invocation,
        };
        let json = serde_json::to_string(&request)
            .map_err(|e| failed(format!("failed to serialize request: {e}")))?;

        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(pending) => pending.insert(id.clone(), tx),
            None => return Err(failed("bridge is closed".into())),
        };
        // Forget the request on every exit, including this future being dropped.
        let _waiting = Waiting {
            pending: &self.pending,
            id: &id,
        };

        if let Err(e) = self.send(json).await {
            return Err(failed(format!("failed to write to bridge stdin: {e}")));
        }
        debug!(%id, skill = %invocation.skill, "sent invocation to bridge");

        match rx.await {
            Ok(Ok(outputs)) => Ok(outputs
                .into_iter()
                .filter_map(|(name, value)| Value::from_json(value).map(|v| (name, v)))
                .collect()),
            Ok(Err(message)) => Err(failed(message)),
            Err(_) => Err(failed("bridge closed stdout unexpectedly".into())),
        }
    }
}

/// Removes a request's pending entry when its invocation ends.
struct Waiting<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        if let Some(pending) = lock(self.pending).as_mut() {
            pending.remove(self.id);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Wait for the bridge to send its "ready" message.
async fn wait_for_ready(lines: &mut Lines<BufReader<ChildStdout>>) -> Result<()> {
    let line = lines
        .next_line()
        .await
        .map_err(|e| EnrichflowError::parse(format!("bridge read error: {e}")))?
        .ok_or_else(|| EnrichflowError::parse("bridge exited before it was ready"))?;

    match serde_json::from_str::<ResponseMessage>(line.trim()) {
        Ok(ResponseMessage::Ready) => {
            info!("bridge is ready");
            Ok(())
        }
        Ok(_) => Err(EnrichflowError::parse(format!(
            "expected ready message, got: {line}"
        ))),
        Err(e) => Err(EnrichflowError::parse(format!(
            "invalid bridge ready message: {e} (got: {line})"
        ))),
    }
}

/// Route responses to their waiting invocations until stdout closes.
async fn read_responses(mut lines: Lines<BufReader<ChildStdout>>, pending: Pending) {
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("bridge read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        route(&line, &pending);
    }

    // Dropping the senders fails every invocation still waiting.
    let orphaned = lock(&pending).take().unwrap_or_default();
    if !orphaned.is_empty() {
        warn!(requests = orphaned.len(), "bridge closed with requests in flight");
    }
}

fn route(line: &str, pending: &Pending) {
    let (id, reply) = match serde_json::from_str::<ResponseMessage>(line.trim()) {
        Ok(ResponseMessage::Result { id, outputs }) => (id, Ok(outputs)),
        Ok(ResponseMessage::Error { id, error }) => (id, Err(error)),
        Ok(ResponseMessage::Ready) => {
            warn!("unexpected ready message from bridge");
            return;
        }
        Err(e) => {
            warn!(
                "invalid bridge response: {e} (got: {})",
                line.chars().take(200).collect::<String>()
            );
            return;
        }
    };

    let sender = lock(pending).as_mut().and_then(|p| p.remove(&id));
    match sender {
        Some(tx) => {
            // The invocation may have been cancelled.
            let _ = tx.send(reply);
        }
        None => warn!(%id, "bridge response for unknown request"),
    }
}
