/*
 * lib.rs
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

//! Server-side IMAP engine: per-connection state machine and command dispatch,
//! with all protocol semantics (auth, mailbox access, fetch) delegated to an
//! ordered chain of plugins invoked through named hooks.
//!
//! The crate is a library; an embedding binary supplies the plugin list and
//! capability provider, binds a listener (or hands over any established
//! stream) and calls [`ImapServer::listen`] or [`ImapServer::serve`].

pub mod config;
pub mod connection;
pub mod decoder;
pub mod pipeline;
pub mod plugin;
pub mod plugins;
pub mod server;
pub mod util;

pub use config::ServerConfig;
pub use connection::{Conn, SessionState};
pub use decoder::{CommandLine, LineDecoder};
pub use pipeline::{Mode, PipelineResult};
pub use plugin::{Continuation, Hook, HookSignal, Outcome, Plugin, PluginError};
pub use server::ImapServer;
