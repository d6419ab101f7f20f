/*
 * logging.rs
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

//! Session diagnostics plugin: logs new connections and answers unknown
//! commands with a definitive BAD so they do not fall through unhandled.

use tracing::debug;

use crate::connection::Conn;
use crate::plugin::{Continuation, Hook, Outcome, Plugin};

pub struct LoggingPlugin;

impl Plugin for LoggingPlugin {
    fn name(&self) -> &str {
        "logging"
    }

    fn implements(&self, hook: &Hook) -> bool {
        matches!(hook, Hook::Connection | Hook::UnknownCommand { .. })
    }

    fn invoke(&self, conn: &Conn, hook: &Hook, done: Continuation) {
        match hook {
            Hook::Connection => {
                debug!(peer = %conn.peer(), "(connected)");
                done.pass();
            }
            Hook::UnknownCommand { verb, args } => {
                debug!(peer = %conn.peer(), verb = %verb, ?args, "unknown command");
                done.resolve(Outcome::Bad, Some("Unknown command".to_string()));
            }
            _ => done.pass(),
        }
    }
}
