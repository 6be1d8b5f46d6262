/*
 * main.rs
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

//! Entry point: `portolano <domain> <maxWorkers>`. Builds the process-wide
//! [`ServerConfig`] once and hands it to the dispatcher; exits 0 on a clean
//! `SIGINT`/Ctrl-C shutdown, 1 on bad arguments.

use portolano_core::config::ServerConfig;
use portolano_core::dispatcher;
use portolano_core::logging::log_line;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

/// Compiled-in demo account table. A real deployment would load credentials
/// from its own source; that lookup is out of this crate's scope.
fn demo_credentials() -> HashMap<String, String> {
    let mut creds = HashMap::new();
    creds.insert("dcd".to_string(), "password".to_string());
    creds.insert("postmaster".to_string(), "postmaster".to_string());
    creds
}

fn usage() -> &'static str {
    "usage: portolano <domain> <maxWorkers>"
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let (domain, max_workers) = match args.as_slice() {
        [_, domain, workers] => match workers.parse::<usize>() {
            Ok(w) => (domain.clone(), w),
            Err(_) => {
                eprintln!("{}", usage());
                return ExitCode::FAILURE;
            }
        },
        _ => {
            eprintln!("{}", usage());
            return ExitCode::FAILURE;
        }
    };

    let storage_root = PathBuf::from("/var/lib/portolano/mail");
    let config = Arc::new(ServerConfig::new(domain, max_workers, storage_root).with_credentials(demo_credentials()));

    log_line("main", format!("starting portolano for domain {} with {} workers", config.domain, config.max_workers));

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    match dispatcher::run(config, shutdown).await {
        Ok(()) => {
            log_line("main", "shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_line("main", format!("fatal dispatcher error: {}", e));
            ExitCode::FAILURE
        }
    }
}
