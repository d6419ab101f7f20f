/*
 * config.rs
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

//! Engine tunables. Account/listener configuration belongs to the embedding
//! binary, not here.

use std::time::Duration;

/// Per-server engine settings, applied to every accepted connection.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Idle window after which a connection is told BYE and closed.
    /// Rearmed on every received line.
    pub idle_timeout: Duration,
    /// Hard cap on a single command line; longer input is a transport fault.
    pub max_line_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(30),
            max_line_len: 8 * 1024,
        }
    }
}

impl ServerConfig {
    pub fn set_idle_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn set_max_line_len(&mut self, len: usize) -> &mut Self {
        self.max_line_len = len;
        self
    }
}
