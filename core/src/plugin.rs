/*
 * plugin.rs
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

//! Plugin contract: the closed hook vocabulary, the continuation a handler
//! must answer exactly once, and the `Plugin` trait itself.
//!
//! Plugins are process-wide and shared across connections; per-connection
//! state belongs in the connection's notes, never on the plugin.

use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::warn;

use crate::connection::Conn;

/// Plugin failure (handler fault). Carries operator-facing detail only;
/// the client never sees this text.
#[derive(Debug)]
pub struct PluginError {
    pub message: String,
}

impl PluginError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { message: msg.into() }
    }
}

impl std::fmt::Display for PluginError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for PluginError {}

impl From<std::io::Error> for PluginError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}

/// Definitive classification of a hook result, echoed to the client as the
/// tagged response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    No,
    Bad,
}

/// What a handler delivered through its continuation.
#[derive(Debug)]
pub enum HookSignal {
    /// No definitive answer; the pipeline moves to the next plugin.
    Pass,
    /// Definitive answer. `message` overrides the default response text.
    Resolved {
        outcome: Outcome,
        message: Option<String>,
    },
    /// Handler fault. `message`, when present, is a client-safe text; the
    /// error itself goes to the diagnostic log only.
    Failed {
        error: PluginError,
        message: Option<String>,
    },
}

/// Named extension point with its typed parameters. The set is closed: the
/// engine only ever invokes these hooks, and a plugin declares which of them
/// it implements.
#[derive(Debug, Clone)]
pub enum Hook {
    /// New session accepted (fan-out; definitive answers are discarded).
    Connection,
    /// STARTTLS requested while not authenticated.
    StartTls,
    /// AUTHENTICATE (or rewritten LOGIN). `mechanism` is lowercased; the
    /// initial response is base64-decoded, `None` when absent or when the
    /// argument does not decode.
    Authenticate {
        mechanism: String,
        initial: Option<Vec<u8>>,
    },
    /// Verb not recognized in the current state.
    UnknownCommand { verb: String, args: Vec<String> },
    List { reference: String, pattern: String },
    Select { mailbox: String },
    Examine { mailbox: String },
    Subscribe { mailbox: String },
    /// UID arguments are passed through unparsed.
    Uid { args: Vec<String> },
    Close,
    Fetch { sequence: String, items: String },
}

impl Hook {
    /// Wire-level hook name, as plugins and diagnostics know it.
    pub fn name(&self) -> String {
        match self {
            Hook::Connection => "connection".to_string(),
            Hook::StartTls => "starttls".to_string(),
            Hook::Authenticate { mechanism, .. } => format!("auth_{}", mechanism),
            Hook::UnknownCommand { .. } => "unknown_command".to_string(),
            Hook::List { .. } => "list".to_string(),
            Hook::Select { .. } => "select".to_string(),
            Hook::Examine { .. } => "examine".to_string(),
            Hook::Subscribe { .. } => "subscribe".to_string(),
            Hook::Uid { .. } => "uid".to_string(),
            Hook::Close => "close".to_string(),
            Hook::Fetch { .. } => "fetch".to_string(),
        }
    }
}

/// One-shot reply channel handed to a handler. The contract is exactly one
/// call; extra calls are ignored (and logged), and dropping it unanswered
/// counts as a pass so the pipeline cannot stall on a misbehaving plugin.
pub struct Continuation {
    plugin: String,
    hook: String,
    tx: Mutex<Option<oneshot::Sender<HookSignal>>>,
}

impl Continuation {
    pub(crate) fn new(plugin: &str, hook: &str) -> (Self, oneshot::Receiver<HookSignal>) {
        let (tx, rx) = oneshot::channel();
        let done = Self {
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            tx: Mutex::new(Some(tx)),
        };
        (done, rx)
    }

    /// Decline to answer; the next plugin in the chain gets a turn.
    pub fn pass(&self) {
        self.deliver(HookSignal::Pass);
    }

    /// Deliver a definitive outcome, optionally with response text.
    pub fn resolve(&self, outcome: Outcome, message: Option<String>) {
        self.deliver(HookSignal::Resolved { outcome, message });
    }

    /// Report a handler fault. The client gets a generic BAD; the error text
    /// only reaches the diagnostic log.
    pub fn fail(&self, error: PluginError) {
        self.deliver(HookSignal::Failed { error, message: None });
    }

    /// Report a handler fault with an explicit client-safe message.
    pub fn fail_with_message(&self, error: PluginError, message: impl Into<String>) {
        self.deliver(HookSignal::Failed {
            error,
            message: Some(message.into()),
        });
    }

    fn deliver(&self, signal: HookSignal) {
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match tx {
            // Receiver gone means the connection was torn down; nothing to do.
            Some(tx) => {
                let _ = tx.send(signal);
            }
            None => {
                warn!(
                    plugin = %self.plugin,
                    hook = %self.hook,
                    "plugin called its continuation more than once; extra call ignored"
                );
            }
        }
    }
}

impl Drop for Continuation {
    fn drop(&mut self) {
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(tx) = tx {
            warn!(
                plugin = %self.plugin,
                hook = %self.hook,
                "plugin dropped its continuation without answering; treated as pass"
            );
            let _ = tx.send(HookSignal::Pass);
        }
    }
}

/// An extension module. One instance serves every connection; the registry
/// holding it is immutable once the server starts.
pub trait Plugin: Send + Sync {
    /// Name used in diagnostics.
    fn name(&self) -> &str;

    /// Capability table: does this plugin handle the given hook? Checked
    /// before every invocation; unimplemented hooks are silently skipped.
    fn implements(&self, hook: &Hook) -> bool;

    /// Handle a hook invocation. Must answer `done` exactly once, either
    /// immediately or from a task the handler spawns. `conn` may be cloned
    /// and kept for the duration of the handler's work.
    fn invoke(&self, conn: &Conn, hook: &Hook, done: Continuation);
}
