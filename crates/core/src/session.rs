//! Line-oriented request/response protocol engine
//!
//! Turns the raw byte stream from a [`Transport`](crate::transport::Transport)
//! into discrete line-based exchanges. One textual query may be in flight at
//! a time; its reply is considered complete once no new line has arrived
//! within the configured inactivity window, because the device's REPL emits
//! no deterministic end-of-output marker for arbitrary script output.
//!
//! Every received line is appended to an accumulation buffer and forwarded
//! to an optional observer callback whether or not a request is outstanding,
//! so live status text (login banners, upload progress prints) is never lost.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::hooks::PasswordResolver;
use crate::transport::SharedTransport;
use crate::{CoreError, Result};

/// Marker the device prints when it wants a login credential.
const PASSWORD_PROMPT: &str = "Password:";

/// Cap on buffered bytes of an unterminated line. Binary garbage without a
/// newline would otherwise grow the partial buffer forever.
const MAX_PARTIAL: usize = 64 * 1024;

/// Per-line observer for live status reporting.
pub type LineObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Inactivity window after which a reply is considered complete.
    /// Callers pick longer windows per query for slow device-side loops.
    pub inactivity_timeout: Duration,

    /// How long to wait for the boot/prompt banner during login.
    pub banner_grace: Duration,

    /// Optional ceiling on a query's total wait. `None` reproduces the
    /// unbounded behavior: a device that keeps emitting output can delay
    /// completion indefinitely.
    pub query_ceiling: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_millis(100),
            banner_grace: Duration::from_millis(300),
            query_ceiling: None,
        }
    }
}

/// One outstanding query.
struct PendingRequest {
    /// Distinguishes this request from its predecessors so an inactivity
    /// check scheduled for an aborted request cannot touch a later one.
    id: u64,
    /// Lines received whose inactivity check has not fired yet.
    pending: u32,
    /// Inactivity window for this request.
    timeout: Duration,
    /// Resolved exactly once with the accumulated lines.
    done: Option<oneshot::Sender<Vec<String>>>,
}

#[derive(Default)]
struct SessionState {
    /// Decoded lines since the last query reset.
    lines: Vec<String>,
    /// Bytes of the current unterminated line.
    partial: Vec<u8>,
    request: Option<PendingRequest>,
    observer: Option<LineObserver>,
    /// Id for the next request.
    next_id: u64,
}

/// The protocol engine for one logical device session.
///
/// Created fresh by the board for each high-level operation and discarded
/// afterwards; sessions are never reused across reconnects.
pub struct LineSession {
    transport: SharedTransport,
    state: Arc<Mutex<SessionState>>,
    config: SessionConfig,
    pump: tokio::task::JoinHandle<()>,
}

impl LineSession {
    /// Wire a session onto an already-connected transport's byte stream.
    pub fn new(transport: SharedTransport, rx: mpsc::Receiver<Bytes>, config: SessionConfig) -> Self {
        let state = Arc::new(Mutex::new(SessionState::default()));
        let pump = tokio::spawn(Self::pump(rx, state.clone()));
        Self {
            transport,
            state,
            config,
            pump,
        }
    }

    /// Install the per-line observer.
    pub async fn set_observer(&self, observer: impl Fn(&str) + Send + Sync + 'static) {
        self.state.lock().await.observer = Some(Arc::new(observer));
    }

    /// Whether no request is outstanding.
    pub async fn is_idle(&self) -> bool {
        self.state.lock().await.request.is_none()
    }

    /// Snapshot of the lines accumulated since the last query reset.
    pub async fn buffered_lines(&self) -> Vec<String> {
        self.state.lock().await.lines.clone()
    }

    /// Write raw bytes to the transport.
    pub async fn write(&self, data: &[u8]) -> Result<usize> {
        self.transport.lock().await.write(data).await
    }

    /// Send a command and collect its reply lines.
    ///
    /// Unless `raw`, a CRLF terminator is appended when missing — the REPL
    /// requires line termination to execute. The pending counter and line
    /// buffer are reset before sending, so no cross-query leakage occurs.
    ///
    /// # Errors
    /// * [`CoreError::RequestPending`] if a query is already outstanding.
    ///   Callers must serialize; this is a logic error, and the first
    ///   request's resolution is unaffected.
    /// * [`CoreError::NotConnected`] if the transport dropped the write.
    /// * [`CoreError::Timeout`] if a configured ceiling elapses first.
    pub async fn query(
        &self,
        msg: &[u8],
        raw: bool,
        timeout: Option<Duration>,
    ) -> Result<Vec<String>> {
        let (tx, done) = oneshot::channel();
        {
            let mut state = self.state.lock().await;
            if state.request.is_some() {
                return Err(CoreError::RequestPending);
            }
            state.lines.clear();
            let id = state.next_id;
            state.next_id += 1;
            state.request = Some(PendingRequest {
                id,
                pending: 0,
                timeout: timeout.unwrap_or(self.config.inactivity_timeout),
                done: Some(tx),
            });
        }

        let mut payload = msg.to_vec();
        if !raw && !payload.ends_with(b"\r\n") {
            payload.extend_from_slice(b"\r\n");
        }
        let wrote = self.write(&payload).await?;
        if wrote == 0 {
            self.state.lock().await.request = None;
            return Err(CoreError::NotConnected);
        }
        tracing::trace!("query sent, {} bytes", wrote);

        match self.config.query_ceiling {
            Some(limit) => match tokio::time::timeout(limit, done).await {
                Ok(result) => result.map_err(|_| CoreError::Connection("session closed".into())),
                Err(_) => {
                    self.state.lock().await.request = None;
                    Err(CoreError::Timeout(limit.as_millis() as u64))
                }
            },
            None => done
                .await
                .map_err(|_| CoreError::Connection("session closed".into())),
        }
    }

    /// Log in past the device's password prompt, if it shows one.
    ///
    /// Waits a short grace period for the boot banner, then checks the
    /// buffered text for the prompt marker. When present, the credential
    /// comes from the resolver (a cached value or the operator); when the
    /// resolver has none, login fails. No marker means no authentication
    /// is required and login completes immediately.
    pub async fn login(&self, resolver: &dyn PasswordResolver) -> Result<()> {
        tokio::time::sleep(self.config.banner_grace).await;

        let banner = {
            let state = self.state.lock().await;
            let mut text = state.lines.join("\n");
            text.push_str(&String::from_utf8_lossy(&state.partial));
            text
        };
        tracing::debug!("login banner: {:?}", banner);

        if !banner.contains(PASSWORD_PROMPT) {
            return Ok(());
        }

        let name = self.transport.lock().await.name();
        match resolver.resolve(&name).await {
            Some(password) => {
                self.write(format!("{}\r\n", password).as_bytes()).await?;
                Ok(())
            }
            None => Err(CoreError::PasswordRequired(name)),
        }
    }

    /// Decode incoming chunks into lines and drive request completion.
    ///
    /// Completion algorithm: each line received while a request is
    /// outstanding bumps the pending counter and schedules a
    /// decrement-and-check after the inactivity window; the check that
    /// finds the counter at zero concludes no further output is coming
    /// and resolves the request with the accumulated buffer.
    async fn pump(mut rx: mpsc::Receiver<Bytes>, state: Arc<Mutex<SessionState>>) {
        while let Some(chunk) = rx.recv().await {
            let mut st = state.lock().await;
            st.partial.extend_from_slice(&chunk);

            while let Some(pos) = st.partial.iter().position(|&b| b == b'\n') {
                let mut line_bytes: Vec<u8> = st.partial.drain(..=pos).collect();
                line_bytes.pop();
                if line_bytes.last() == Some(&b'\r') {
                    line_bytes.pop();
                }
                match String::from_utf8(line_bytes) {
                    Ok(line) => {
                        tracing::debug!("<- {}", line);
                        if let Some(observer) = &st.observer {
                            observer(&line);
                        }
                        st.lines.push(line);
                        if let Some(request) = &mut st.request {
                            request.pending += 1;
                            let id = request.id;
                            let window = request.timeout;
                            let state = state.clone();
                            tokio::spawn(async move {
                                tokio::time::sleep(window).await;
                                Self::finish(&state, id).await;
                            });
                        }
                    }
                    Err(e) => {
                        tracing::warn!("dropping undecodable line: {}", e);
                    }
                }
            }

            if st.partial.len() > MAX_PARTIAL {
                tracing::warn!("discarding {} bytes of unterminated input", st.partial.len());
                st.partial.clear();
            }
        }
        tracing::debug!("session byte stream ended");
    }

    /// Inactivity check. A check whose request is gone or has been
    /// superseded (aborted by ceiling or write failure, then re-queried)
    /// is a no-op.
    async fn finish(state: &Arc<Mutex<SessionState>>, id: u64) {
        let mut st = state.lock().await;
        let Some(request) = &mut st.request else {
            return;
        };
        if request.id != id {
            return;
        }
        request.pending -= 1;
        if request.pending > 0 {
            return;
        }
        let lines = std::mem::take(&mut st.lines);
        if let Some(done) = st.request.take().and_then(|r| r.done) {
            let _ = done.send(lines);
        }
    }
}

impl Drop for LineSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}
