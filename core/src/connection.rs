/*
 * connection.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Cassetta, an extensible IMAP server.
 *
 * Cassetta is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Cassetta is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Cassetta.  If not, see <http://www.gnu.org/licenses/>.
 */

//! One accepted session: the three-state machine, command dispatch to local
//! responders or hook pipelines, result mapping back onto the wire, the
//! inactivity watchdog, and the pause/resume discipline that keeps command
//! processing strictly one at a time per connection.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::futures::Notified;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::yield_now;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error};

use crate::decoder::{self, CommandLine, LineDecoder};
use crate::pipeline::{self, Mode, PipelineResult};
use crate::plugin::{Hook, Outcome};
use crate::server::{CapabilityFn, ImapServer};
use crate::util;

/// Protocol state of one session. Mutated only by result mapping: a
/// successful authenticate moves to Authenticated, select/examine to
/// Selected, close back to Authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotAuthenticated,
    Authenticated,
    Selected,
}

pub(crate) enum WriterCmd {
    Line(String),
    Close,
}

struct Shared {
    peer: SocketAddr,
    writer: mpsc::UnboundedSender<WriterCmd>,
    state: Mutex<SessionState>,
    /// Scratch space shared ad hoc with plugins. One namespace per
    /// connection; key collisions between plugins are the plugins' problem.
    notes: Mutex<HashMap<String, Value>>,
    paused: AtomicBool,
    closed: watch::Sender<bool>,
    continuation: Mutex<Option<oneshot::Sender<String>>>,
    continuation_notify: Notify,
    deadline: Mutex<Instant>,
    idle_timeout: Duration,
    capabilities: CapabilityFn,
}

/// Shareable handle to one session. Plugins may clone it and keep it for the
/// duration of their work; once the transport is gone every operation on it
/// degrades to a no-op rather than an error.
#[derive(Clone)]
pub struct Conn {
    shared: Arc<Shared>,
}

impl Conn {
    pub(crate) fn new(
        peer: SocketAddr,
        writer: mpsc::UnboundedSender<WriterCmd>,
        capabilities: CapabilityFn,
        idle_timeout: Duration,
    ) -> Self {
        let shared = Shared {
            peer,
            writer,
            state: Mutex::new(SessionState::NotAuthenticated),
            notes: Mutex::new(HashMap::new()),
            paused: AtomicBool::new(false),
            closed: watch::Sender::new(false),
            continuation: Mutex::new(None),
            continuation_notify: Notify::new(),
            deadline: Mutex::new(Instant::now() + idle_timeout),
            idle_timeout,
            capabilities,
        };
        Self { shared: Arc::new(shared) }
    }

    pub fn peer(&self) -> SocketAddr {
        self.shared.peer
    }

    pub fn state(&self) -> SessionState {
        match self.shared.state.lock() {
            Ok(state) => *state,
            Err(_) => SessionState::NotAuthenticated,
        }
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        if let Ok(mut guard) = self.shared.state.lock() {
            *guard = state;
        }
    }

    /// Write one response line. `tag` of `None` produces an untagged (`*`)
    /// line; `status` of `None` omits the status token.
    pub fn send(&self, tag: Option<&str>, status: Option<&str>, text: &str) {
        let mut line = String::new();
        line.push_str(tag.unwrap_or("*"));
        if let Some(status) = status {
            line.push(' ');
            line.push_str(&status.to_ascii_uppercase());
        }
        line.push(' ');
        line.push_str(text);
        self.write_raw(line);
    }

    /// Prompt the client for one more line (`+ <prompt>`). The next raw line
    /// from the client resolves the returned receiver instead of being
    /// dispatched as a command; the registration is consumed by that one line.
    pub fn request_continuation(&self, prompt: &str) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        if let Ok(mut slot) = self.shared.continuation.lock() {
            *slot = Some(tx);
        }
        self.shared.continuation_notify.notify_one();
        self.write_raw(format!("+ {}", prompt));
        rx
    }

    /// Gracefully terminate the transport. Queued response lines are still
    /// flushed first.
    pub fn close(&self) {
        // send_replace updates the flag even with no subscriber; a plain
        // send would be dropped whenever nobody is inside closed_wait.
        if self.shared.closed.send_replace(true) {
            return;
        }
        let _ = self.shared.writer.send(WriterCmd::Close);
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.closed.borrow()
    }

    /// True while a hook pipeline is in flight and no further command
    /// records are being pulled from the transport.
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    /// Capability list for this connection, as the embedding server computes
    /// it (CAPABILITY response, greeting banners).
    pub fn capabilities(&self) -> Vec<String> {
        (self.shared.capabilities)(self)
    }

    pub fn note(&self, key: &str) -> Option<Value> {
        match self.shared.notes.lock() {
            Ok(notes) => notes.get(key).cloned(),
            Err(_) => None,
        }
    }

    pub fn set_note(&self, key: impl Into<String>, value: Value) {
        if let Ok(mut notes) = self.shared.notes.lock() {
            notes.insert(key.into(), value);
        }
    }

    pub(crate) fn set_paused(&self, paused: bool) {
        self.shared.paused.store(paused, Ordering::SeqCst);
    }

    /// Rearm the inactivity deadline.
    pub(crate) fn touch(&self) {
        if let Ok(mut deadline) = self.shared.deadline.lock() {
            *deadline = Instant::now() + self.shared.idle_timeout;
        }
    }

    pub(crate) fn deadline(&self) -> Instant {
        match self.shared.deadline.lock() {
            Ok(deadline) => *deadline,
            Err(_) => Instant::now(),
        }
    }

    pub(crate) fn take_pending_continuation(&self) -> Option<oneshot::Sender<String>> {
        match self.shared.continuation.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        }
    }

    pub(crate) fn wants_continuation_line(&self) -> bool {
        match self.shared.continuation.lock() {
            Ok(slot) => slot.is_some(),
            Err(_) => false,
        }
    }

    pub(crate) fn continuation_requested(&self) -> Notified<'_> {
        self.shared.continuation_notify.notified()
    }

    pub(crate) async fn closed_wait(&self) {
        let mut rx = self.shared.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    fn write_raw(&self, line: String) {
        debug!(peer = %self.shared.peer, "<<< {}", line);
        let _ = self.shared.writer.send(WriterCmd::Line(line));
    }

    #[cfg(test)]
    pub(crate) fn detached() -> Conn {
        Self::detached_with_output().0
    }

    #[cfg(test)]
    pub(crate) fn detached_with_output() -> (Conn, mpsc::UnboundedReceiver<WriterCmd>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let capabilities: CapabilityFn = Arc::new(|_conn: &Conn| vec!["IMAP4rev1".to_string()]);
        let peer = "127.0.0.1:10143".parse().expect("test peer address");
        (Conn::new(peer, tx, capabilities, Duration::from_secs(30)), rx)
    }
}

/// Drive one accepted session to completion. Returns an error only for
/// transport faults that are not ordinary disconnects; those must reach the
/// supervisor instead of being swallowed here.
pub(crate) async fn run<S>(stream: S, peer: SocketAddr, server: Arc<ImapServer>) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_loop(write_half, writer_rx));

    let config = server.config().clone();
    let conn = Conn::new(peer, writer_tx, server.capability_fn(), config.idle_timeout);
    conn.set_note("remote_address", Value::String(peer.ip().to_string()));
    conn.set_note("remote_port", Value::from(peer.port()));
    debug!(peer = %peer, "connected");

    let watchdog = tokio::spawn(watch_idle(conn.clone()));

    let decoder = LineDecoder::new(read_half, config.max_line_len);
    let mut session = Session {
        server,
        conn: conn.clone(),
        decoder,
    };

    // Let interested plugins see the new session before any command is read.
    session.call_hook(Hook::Connection, Mode::All).await;

    let result = session.serve_lines().await;

    debug!(peer = %peer, "disconnected");
    conn.close();
    watchdog.abort();
    let _ = writer.await;

    match result {
        Err(e) if is_benign_disconnect(&e) => Ok(()),
        other => other,
    }
}

/// Connection-reset and broken-pipe are ordinary client departures.
fn is_benign_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::BrokenPipe
    )
}

async fn write_loop<W>(mut writer: W, mut rx: mpsc::UnboundedReceiver<WriterCmd>)
where
    W: AsyncWrite + Unpin,
{
    use tokio::io::AsyncWriteExt;

    while let Some(cmd) = rx.recv().await {
        match cmd {
            WriterCmd::Line(line) => {
                if writer.write_all(line.as_bytes()).await.is_err()
                    || writer.write_all(b"\r\n").await.is_err()
                    || writer.flush().await.is_err()
                {
                    break;
                }
            }
            WriterCmd::Close => {
                let _ = writer.flush().await;
                let _ = writer.shutdown().await;
                break;
            }
        }
    }
}

/// Inactivity watchdog. Runs independently of any in-flight pipeline, so it
/// can fire mid-command; the deadline is rearmed on every received line.
async fn watch_idle(conn: Conn) {
    loop {
        let deadline = conn.deadline();
        sleep_until(deadline).await;
        if conn.is_closed() {
            return;
        }
        if Instant::now() >= conn.deadline() {
            conn.send(None, Some("BYE"), "Disconnected for inactivity.");
            conn.close();
            return;
        }
    }
}

struct Session<R> {
    server: Arc<ImapServer>,
    conn: Conn,
    decoder: LineDecoder<R>,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    async fn serve_lines(&mut self) -> io::Result<()> {
        loop {
            if self.conn.is_closed() {
                return Ok(());
            }
            let line = tokio::select! {
                line = self.decoder.next_line() => match line? {
                    Some(line) => line,
                    None => return Ok(()),
                },
                _ = self.conn.closed_wait() => return Ok(()),
            };
            self.conn.touch();
            debug!(peer = %self.conn.peer(), ">>> {}", line);
            if let Some(tx) = self.conn.take_pending_continuation() {
                let _ = tx.send(line);
                continue;
            }
            let cmd = decoder::parse_command(&line);
            self.dispatch(cmd).await;
        }
    }

    async fn dispatch(&mut self, cmd: CommandLine) {
        let tag = cmd.tag.clone();
        let tag = tag.as_deref();

        // State-independent commands are answered locally, with no plugin
        // involvement and no pause.
        match cmd.verb.as_str() {
            "CAPABILITY" => {
                let caps = self.conn.capabilities();
                self.conn.send(None, Some("CAPABILITY"), &caps.join(" "));
                self.conn.send(tag, Some("OK"), "CAPABILITY completed");
                return;
            }
            "NOOP" => {
                self.conn.send(tag, Some("OK"), "NOOP completed");
                return;
            }
            "LOGOUT" => {
                self.conn.send(None, Some("BYE"), "See you soon!");
                self.conn.send(tag, Some("OK"), "LOGOUT completed");
                self.conn.close();
                return;
            }
            _ => {}
        }

        match self.conn.state() {
            SessionState::NotAuthenticated => self.dispatch_not_authenticated(tag, &cmd).await,
            SessionState::Authenticated => self.dispatch_authenticated(tag, &cmd).await,
            SessionState::Selected => self.dispatch_selected(tag, &cmd).await,
        }
    }

    async fn dispatch_not_authenticated(&mut self, tag: Option<&str>, cmd: &CommandLine) {
        match cmd.verb.as_str() {
            "STARTTLS" => {
                let result = self.call_hook(Hook::StartTls, Mode::FirstResult).await;
                self.finish_generic(tag, result);
            }
            "LOGIN" => {
                if cmd.args.len() < 2 {
                    self.conn
                        .send(tag, Some("BAD"), "Need a username and password to login");
                    return;
                }
                let (mechanism, initial) = util::login_to_auth_plain(&cmd.args[0], &cmd.args[1]);
                self.authenticate(tag, &mechanism, Some(&initial)).await;
            }
            "AUTHENTICATE" => {
                if cmd.args.is_empty() {
                    self.conn
                        .send(tag, Some("BAD"), "Need an authentication mechanism to proceed.");
                    return;
                }
                let initial = cmd.args.get(1).map(|s| s.as_str());
                self.authenticate(tag, &cmd.args[0], initial).await;
            }
            _ => self.unknown_command(tag, cmd).await,
        }
    }

    async fn dispatch_authenticated(&mut self, tag: Option<&str>, cmd: &CommandLine) {
        match cmd.verb.as_str() {
            // Reserved vocabulary: recognized, not yet wired to a hook.
            "CREATE" | "DELETE" | "RENAME" | "UNSUBSCRIBE" | "STATUS" | "APPEND" | "LSUB" => {
                debug!(peer = %self.conn.peer(), verb = %cmd.verb, "reserved command");
                self.conn.send(tag, Some("BAD"), "Command not implemented");
            }
            "LIST" => {
                if cmd.args.len() != 2 {
                    self.conn.send(tag, Some("BAD"), "LIST needs 2 arguments");
                    return;
                }
                let hook = Hook::List {
                    reference: cmd.args[0].clone(),
                    pattern: cmd.args[1].clone(),
                };
                let result = self.call_hook(hook, Mode::FirstResult).await;
                self.finish_generic(tag, result);
            }
            "EXAMINE" => {
                if cmd.args.len() != 1 {
                    self.conn.send(tag, Some("BAD"), "EXAMINE needs a mailbox name");
                    return;
                }
                let hook = Hook::Examine {
                    mailbox: cmd.args[0].clone(),
                };
                let result = self.call_hook(hook, Mode::FirstResult).await;
                self.finish_select(tag, result);
            }
            "SELECT" => {
                if cmd.args.len() != 1 {
                    self.conn.send(tag, Some("BAD"), "SELECT needs a mailbox name");
                    return;
                }
                let hook = Hook::Select {
                    mailbox: cmd.args[0].clone(),
                };
                let result = self.call_hook(hook, Mode::FirstResult).await;
                self.finish_select(tag, result);
            }
            "SUBSCRIBE" => {
                if cmd.args.len() != 1 {
                    self.conn.send(tag, Some("BAD"), "SUBSCRIBE needs a mailbox name");
                    return;
                }
                let hook = Hook::Subscribe {
                    mailbox: cmd.args[0].clone(),
                };
                let result = self.call_hook(hook, Mode::FirstResult).await;
                self.finish_generic(tag, result);
            }
            _ => self.unknown_command(tag, cmd).await,
        }
    }

    async fn dispatch_selected(&mut self, tag: Option<&str>, cmd: &CommandLine) {
        match cmd.verb.as_str() {
            "UID" => {
                let hook = Hook::Uid {
                    args: cmd.args.clone(),
                };
                let result = self.call_hook(hook, Mode::FirstResult).await;
                self.finish_generic(tag, result);
            }
            "CLOSE" => {
                let result = self.call_hook(Hook::Close, Mode::FirstResult).await;
                self.finish_close(tag, result);
            }
            "FETCH" => {
                if cmd.args.len() != 2 {
                    self.conn.send(tag, Some("BAD"), "FETCH needs 2 arguments");
                    return;
                }
                let hook = Hook::Fetch {
                    sequence: cmd.args[0].clone(),
                    items: cmd.args[1].clone(),
                };
                let result = self.call_hook(hook, Mode::FirstResult).await;
                self.finish_generic(tag, result);
            }
            _ => self.unknown_command(tag, cmd).await,
        }
    }

    async fn unknown_command(&mut self, tag: Option<&str>, cmd: &CommandLine) {
        let hook = Hook::UnknownCommand {
            verb: cmd.verb.clone(),
            args: cmd.args.clone(),
        };
        let result = self.call_hook(hook, Mode::FirstResult).await;
        self.finish_generic(tag, result);
    }

    async fn authenticate(&mut self, tag: Option<&str>, mechanism: &str, initial: Option<&str>) {
        let initial = initial.and_then(|raw| match STANDARD.decode(raw) {
            Ok(bytes) => Some(bytes),
            Err(_) => {
                debug!(peer = %self.conn.peer(), "discarding undecodable initial response");
                None
            }
        });
        let hook = Hook::Authenticate {
            mechanism: mechanism.to_ascii_lowercase(),
            initial,
        };
        let result = self.call_hook(hook, Mode::FirstResult).await;
        self.finish_authenticate(tag, result);
    }

    /// Run one hook pipeline under the flow-control discipline: mark the
    /// connection paused, stop pulling command records, and resume one tick
    /// after the terminal result arrives. While paused the decoder is only
    /// polled to satisfy a continuation request registered by a handler;
    /// such a line is consumed by the one-shot slot, never dispatched.
    async fn call_hook(&mut self, hook: Hook, mode: Mode) -> PipelineResult {
        self.conn.set_paused(true);
        let snapshot = self.server.plugin_snapshot();
        let mut pipeline = Box::pin(pipeline::run(snapshot, self.conn.clone(), hook, mode));
        let mut inbound_open = true;

        let result = loop {
            if inbound_open && self.conn.wants_continuation_line() {
                tokio::select! {
                    result = &mut pipeline => break result,
                    line = self.decoder.next_line() => match line {
                        Ok(Some(line)) => {
                            self.conn.touch();
                            debug!(peer = %self.conn.peer(), ">>> {}", line);
                            if let Some(tx) = self.conn.take_pending_continuation() {
                                let _ = tx.send(line);
                            }
                        }
                        Ok(None) | Err(_) => inbound_open = false,
                    },
                }
            } else {
                tokio::select! {
                    result = &mut pipeline => break result,
                    _ = self.conn.continuation_requested() => {}
                }
            }
        };

        // Resume one tick later so a still-unwinding completion never races
        // the next command record.
        yield_now().await;
        self.conn.set_paused(false);
        result
    }

    fn finish_generic(&mut self, tag: Option<&str>, result: PipelineResult) {
        match result {
            PipelineResult::Failed { error, message } => {
                self.conn.send(
                    tag,
                    Some("BAD"),
                    message.as_deref().unwrap_or("Error processing your request."),
                );
                error!(peer = %self.conn.peer(), "plugin handler failed: {}", error);
            }
            PipelineResult::Resolved { outcome: Outcome::Ok, message } => {
                self.conn
                    .send(tag, Some("OK"), message.as_deref().unwrap_or("completed."));
            }
            PipelineResult::Resolved { outcome: Outcome::No, message } => {
                self.conn
                    .send(tag, Some("NO"), message.as_deref().unwrap_or("action refused."));
            }
            PipelineResult::Resolved { outcome: Outcome::Bad, message } => {
                self.conn
                    .send(tag, Some("BAD"), message.as_deref().unwrap_or("Client error."));
            }
            PipelineResult::Unhandled | PipelineResult::AllDone => {
                self.conn.send(tag, Some("BAD"), "Something strange happen.");
                error!(peer = %self.conn.peer(), "no plugin produced a definitive answer");
            }
        }
    }

    fn finish_authenticate(&mut self, tag: Option<&str>, result: PipelineResult) {
        match result {
            PipelineResult::Resolved { outcome: Outcome::Ok, message } => {
                self.conn.set_state(SessionState::Authenticated);
                self.conn
                    .send(tag, Some("OK"), message.as_deref().unwrap_or("Success"));
            }
            PipelineResult::Resolved { outcome: Outcome::No, message } => {
                self.conn.send(
                    tag,
                    Some("NO"),
                    message.as_deref().unwrap_or("Bad username or password."),
                );
            }
            other => self.finish_generic(tag, other),
        }
    }

    fn finish_select(&mut self, tag: Option<&str>, result: PipelineResult) {
        match result {
            PipelineResult::Resolved { outcome: Outcome::Ok, message } => {
                self.conn.set_state(SessionState::Selected);
                self.conn
                    .send(tag, Some("OK"), message.as_deref().unwrap_or("SELECT completed"));
            }
            PipelineResult::Resolved { outcome: Outcome::No, message } => {
                self.conn
                    .send(tag, Some("NO"), message.as_deref().unwrap_or("SELECT failed"));
            }
            other => self.finish_generic(tag, other),
        }
    }

    fn finish_close(&mut self, tag: Option<&str>, result: PipelineResult) {
        match result {
            PipelineResult::Resolved { outcome: Outcome::Ok, message } => {
                self.conn.set_state(SessionState::Authenticated);
                self.conn
                    .send(tag, Some("OK"), message.as_deref().unwrap_or("CLOSE completed"));
            }
            PipelineResult::Resolved { outcome: Outcome::No, message } => {
                self.conn
                    .send(tag, Some("NO"), message.as_deref().unwrap_or("CLOSE failed"));
            }
            other => self.finish_generic(tag, other),
        }
    }
}
