/*
 * pipeline.rs
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

//! Hook pipeline: runs one hook against a snapshot of the plugin registry,
//! one handler at a time in registration order, and produces exactly one
//! terminal result. Two completion modes: short-circuit (first definitive
//! answer wins) and fan-out (every handler runs, answers are discarded).

use std::sync::Arc;

use tokio::task::yield_now;

use crate::connection::Conn;
use crate::plugin::{Continuation, Hook, HookSignal, Outcome, Plugin, PluginError};

/// Completion mode for one pipeline invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Stop at the first plugin that delivers a definitive answer.
    FirstResult,
    /// Run every implementing plugin; individual answers are discarded.
    /// A definitive failure from one plugin does not abort the chain.
    All,
}

/// Terminal result of a pipeline invocation.
#[derive(Debug)]
pub enum PipelineResult {
    /// Short-circuit snapshot exhausted with no definitive answer.
    Unhandled,
    Resolved {
        outcome: Outcome,
        message: Option<String>,
    },
    Failed {
        error: PluginError,
        message: Option<String>,
    },
    /// Fan-out completed: every implementing handler ran once.
    AllDone,
}

/// Run `hook` against `snapshot`. Handlers never run concurrently with each
/// other, and the first handler never runs in the caller's current turn:
/// the pipeline yields once before touching any plugin, so callers may
/// assume asynchronous dispatch even when every handler answers immediately.
pub async fn run(snapshot: Vec<Arc<dyn Plugin>>, conn: Conn, hook: Hook, mode: Mode) -> PipelineResult {
    yield_now().await;

    for plugin in &snapshot {
        if !plugin.implements(&hook) {
            continue;
        }
        let (done, rx) = Continuation::new(plugin.name(), &hook.name());
        plugin.invoke(&conn, &hook, done);
        // The Continuation cannot be dropped without sending, so this only
        // errs if the runtime is shutting down; treat that as a pass.
        let signal = rx.await.unwrap_or(HookSignal::Pass);

        if mode == Mode::All {
            continue;
        }
        match signal {
            HookSignal::Pass => {}
            HookSignal::Resolved { outcome, message } => {
                return PipelineResult::Resolved { outcome, message };
            }
            HookSignal::Failed { error, message } => {
                return PipelineResult::Failed { error, message };
            }
        }
    }

    match mode {
        Mode::FirstResult => PipelineResult::Unhandled,
        Mode::All => PipelineResult::AllDone,
    }
}
