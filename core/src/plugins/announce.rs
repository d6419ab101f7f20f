/*
 * announce.rs
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

//! Greeting plugin: sends the `* OK [CAPABILITY ...]` banner when a session
//! is announced through the `connection` hook.

use crate::connection::Conn;
use crate::plugin::{Continuation, Hook, Plugin};

pub struct AnnouncePlugin {
    message: String,
}

impl AnnouncePlugin {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl Default for AnnouncePlugin {
    fn default() -> Self {
        Self::new("cassetta ready")
    }
}

impl Plugin for AnnouncePlugin {
    fn name(&self) -> &str {
        "announce"
    }

    fn implements(&self, hook: &Hook) -> bool {
        matches!(hook, Hook::Connection)
    }

    fn invoke(&self, conn: &Conn, _hook: &Hook, done: Continuation) {
        let caps = conn.capabilities();
        conn.send(
            None,
            Some("OK"),
            &format!("[CAPABILITY {}] {}", caps.join(" "), self.message),
        );
        done.pass();
    }
}
