/*
 * dispatcher.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Portolano, a multi-protocol mail server.
 *
 * Portolano is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Portolano is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Portolano.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Async accept loops for the three listeners. This is the only
//! tokio-aware layer in the server: each accepted connection is handed to
//! one of the blocking session engines in `crate::protocol` via
//! `spawn_blocking`, bounded by a semaphore sized to `max_workers` shared
//! across all three ports.

use crate::config::{ServerConfig, IMAP_PORT, POP3_PORT, SMTP_PORT};
use crate::logging::log_line;
use crate::protocol::{imap, pop3, smtp};
use crate::store::LockManager;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

/// How long [`run`] waits, after the shutdown signal fires, for
/// in-flight sessions to finish before returning anyway.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Bind all three listeners and accept connections until `shutdown`
/// resolves, then wait up to [`SHUTDOWN_GRACE`] for in-flight sessions to
/// finish.
pub async fn run(config: Arc<ServerConfig>, shutdown: impl std::future::Future<Output = ()>) -> io::Result<()> {
    let locks = Arc::new(LockManager::new());
    let permits = Arc::new(Semaphore::new(config.max_workers.max(1)));

    // A bind failure on one protocol is fatal only to that protocol; the
    // other two still come up (spec.md §7, "Listener bind failures are
    // fatal only for that protocol").
    let smtp_listener = bind_listener("smtp", SMTP_PORT).await;
    let imap_listener = bind_listener("imap", IMAP_PORT).await;
    let pop3_listener = bind_listener("pop3", POP3_PORT).await;

    if smtp_listener.is_none() && imap_listener.is_none() && pop3_listener.is_none() {
        return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "no listener could be bound"));
    }

    let smtp_task = maybe_accept_loop("smtp", smtp_listener, config.clone(), locks.clone(), permits.clone(), run_smtp);
    let imap_task = maybe_accept_loop("imap", imap_listener, config.clone(), locks.clone(), permits.clone(), run_imap);
    let pop3_task = maybe_accept_loop("pop3", pop3_listener, config.clone(), locks.clone(), permits.clone(), run_pop3);

    tokio::select! {
        _ = smtp_task => {},
        _ = imap_task => {},
        _ = pop3_task => {},
        _ = shutdown => {
            log_line("dispatcher", "shutdown signal received, draining in-flight sessions");
        }
    }

    // Give outstanding spawn_blocking sessions a chance to finish before the
    // process tears the runtime down; we don't track individual handles, so
    // this is a fixed grace period rather than a join.
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}

async fn bind_listener(tag: &'static str, port: u16) -> Option<TcpListener> {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            log_line("dispatcher", format!("{} listening on port {}", tag, port));
            Some(listener)
        }
        Err(e) => {
            log_line("dispatcher", format!("{} bind failed on port {}: {} (protocol disabled)", tag, port, e));
            None
        }
    }
}

/// Run [`accept_loop`] if `listener` bound successfully, otherwise block
/// forever so `tokio::select!` in [`run`] never picks this branch.
async fn maybe_accept_loop(
    tag: &'static str,
    listener: Option<TcpListener>,
    config: Arc<ServerConfig>,
    locks: Arc<LockManager>,
    permits: Arc<Semaphore>,
    runner: SessionRunner,
) {
    match listener {
        Some(listener) => accept_loop(tag, listener, config, locks, permits, runner).await,
        None => std::future::pending().await,
    }
}

type SessionRunner = fn(&ServerConfig, &LockManager, TcpStream) -> io::Result<()>;

async fn accept_loop(
    tag: &'static str,
    listener: TcpListener,
    config: Arc<ServerConfig>,
    locks: Arc<LockManager>,
    permits: Arc<Semaphore>,
    runner: SessionRunner,
) {
    loop {
        let (socket, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log_line(tag, format!("accept failed: {}", e));
                continue;
            }
        };
        let permit = match permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return, // semaphore closed: shutting down
        };
        let config = config.clone();
        let locks = locks.clone();
        log_line(tag, format!("accepted connection from {}", addr));
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            if let Err(e) = runner(&config, &locks, socket) {
                log_line(tag, format!("session with {} ended: {}", addr, e));
            }
        });
    }
}

// Per-protocol idle read timeouts (spec.md §5: "Sockets carry per-protocol
// idle timeouts (SMTP/IMAP/POP3 distinct)"). A session that sits with no
// client input for longer than this has its next read fail, ending the
// session the same way a closed socket would.
const SMTP_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const IMAP_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const POP3_IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

fn run_smtp(config: &ServerConfig, locks: &LockManager, socket: TcpStream) -> io::Result<()> {
    smtp::run_session(config, locks, BlockingSocket::new(socket, SMTP_IDLE_TIMEOUT)?)
}

fn run_imap(config: &ServerConfig, locks: &LockManager, socket: TcpStream) -> io::Result<()> {
    imap::run_session(config, locks, BlockingSocket::new(socket, IMAP_IDLE_TIMEOUT)?)
}

fn run_pop3(config: &ServerConfig, locks: &LockManager, socket: TcpStream) -> io::Result<()> {
    pop3::run_session(config, locks, BlockingSocket::new(socket, POP3_IDLE_TIMEOUT)?)
}

/// Adapts a tokio [`TcpStream`] to `std::io::Read + Write` for the blocking
/// protocol engines, by handing them the underlying std socket in blocking
/// mode. `spawn_blocking` guarantees this runs off the async reactor.
struct BlockingSocket {
    inner: std::net::TcpStream,
}

impl BlockingSocket {
    fn new(socket: TcpStream, idle_timeout: Duration) -> io::Result<Self> {
        let inner = socket.into_std()?;
        inner.set_nonblocking(false)?;
        inner.set_read_timeout(Some(idle_timeout))?;
        Ok(Self { inner })
    }
}

impl io::Read for BlockingSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl io::Write for BlockingSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
