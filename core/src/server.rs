/*
 * server.rs
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

//! Server surface: the ordered plugin registry (immutable once serving
//! starts), the capability provider, and the accept loop. TLS setup is the
//! embedder's business; any established stream can be handed to `serve`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, error};

use crate::config::ServerConfig;
use crate::connection::{self, Conn};
use crate::plugin::Plugin;

/// Capability provider, queried per connection for the CAPABILITY response
/// and greeting banners.
pub type CapabilityFn = Arc<dyn Fn(&Conn) -> Vec<String> + Send + Sync>;

/// The server: plugin registry plus engine settings. Register plugins in the
/// order they should get their turn, then hand the server to `listen` (or
/// feed it streams through `serve`).
pub struct ImapServer {
    plugins: Vec<Arc<dyn Plugin>>,
    capabilities: CapabilityFn,
    config: ServerConfig,
}

impl ImapServer {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self {
            plugins: Vec::new(),
            capabilities: Arc::new(|_conn: &Conn| vec!["IMAP4rev1".to_string()]),
            config,
        }
    }

    /// Append a plugin to the registry. Registration order is invocation
    /// order for every hook.
    pub fn use_plugin(&mut self, plugin: impl Plugin + 'static) -> &mut Self {
        self.plugins.push(Arc::new(plugin));
        self
    }

    /// Replace the capability provider (default: `IMAP4rev1` only).
    pub fn set_capabilities<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&Conn) -> Vec<String> + Send + Sync + 'static,
    {
        self.capabilities = Arc::new(f);
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn capability_fn(&self) -> CapabilityFn {
        self.capabilities.clone()
    }

    /// Point-in-time copy of the registry for one pipeline invocation.
    pub(crate) fn plugin_snapshot(&self) -> Vec<Arc<dyn Plugin>> {
        self.plugins.clone()
    }

    /// Serve one established stream (TCP, TLS, an in-memory pipe in tests).
    pub async fn serve<S>(self: Arc<Self>, stream: S, peer: SocketAddr) -> io::Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        connection::run(stream, peer, self).await
    }

    /// Accept loop: one spawned session per connection. Returns only when
    /// the listener itself fails.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) -> io::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            debug!(peer = %peer, "accepted");
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(socket, peer).await {
                    error!(peer = %peer, "session failed: {}", e);
                }
            });
        }
    }
}

impl Default for ImapServer {
    fn default() -> Self {
        Self::new()
    }
}
