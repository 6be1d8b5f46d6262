/*
 * mod.rs
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

//! Raw-UDP MX/A resolution against the host's configured recursive
//! resolver. No third-party DNS library is used; `message` is a hand-rolled
//! RFC 1035 codec and this module drives it over a blocking
//! `std::net::UdpSocket`.
//!
//! Failure (timeout, transaction-id mismatch, malformed packet, empty answer
//! section) never propagates past `resolve_mx`/`resolve_a`: each collapses
//! to `None` at this boundary, as spec'd.

pub mod message;

use std::fmt;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::time::Duration;

const DNS_PORT: u16 = 53;
const RECV_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: u32 = 3;
const MAX_RESPONSE_BYTES: usize = 512;

#[derive(Debug)]
pub enum DnsError {
    Timeout,
    Malformed,
    NoAnswer,
    Io(std::io::Error),
}

impl fmt::Display for DnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsError::Timeout => write!(f, "DNS query timed out"),
            DnsError::Malformed => write!(f, "malformed DNS response"),
            DnsError::NoAnswer => write!(f, "no usable answer"),
            DnsError::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for DnsError {}

impl From<std::io::Error> for DnsError {
    fn from(e: std::io::Error) -> Self {
        DnsError::Io(e)
    }
}

/// Resolve the mail exchanger for `domain`: the MX answer with the smallest
/// preference, or `None` on any failure or empty answer set.
pub fn resolve_mx(domain: &str) -> Option<String> {
    let server = pick_nameserver();
    let answer = query_with_retry(server, domain, message::TYPE_MX)?;
    answer.mx.into_iter().min_by_key(|m| m.preference).map(|m| m.host)
}

/// Resolve `name` to its first A record, rendered as a dotted quad.
pub fn resolve_a(name: &str) -> Option<String> {
    let server = pick_nameserver();
    let answer = query_with_retry(server, name, message::TYPE_A)?;
    answer
        .a
        .map(|quad| quad.iter().map(|b| b.to_string()).collect::<Vec<_>>().join("."))
}

fn query_with_retry(server: SocketAddr, qname: &str, qtype: u16) -> Option<message::ParsedAnswer> {
    for attempt in 0..MAX_ATTEMPTS {
        match query_once(server, qname, qtype) {
            Ok(answer) => {
                if answer.mx.is_empty() && answer.a.is_none() {
                    return None;
                }
                return Some(answer);
            }
            Err(DnsError::Timeout) => {
                crate::logging::log_line(
                    "dns",
                    format!("timeout querying {} for {} (attempt {})", server, qname, attempt + 1),
                );
                continue;
            }
            Err(e) => {
                crate::logging::log_line("dns", format!("query for {} failed: {}", qname, e));
                return None;
            }
        }
    }
    None
}

fn query_once(server: SocketAddr, qname: &str, qtype: u16) -> Result<message::ParsedAnswer, DnsError> {
    let id = rand::random::<u16>();
    let packet = message::build_query(id, qname, qtype);

    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.set_read_timeout(Some(RECV_TIMEOUT))?;
    socket.send_to(&packet, server)?;

    let mut buf = [0u8; MAX_RESPONSE_BYTES];
    let n = match socket.recv(&mut buf) {
        Ok(n) => n,
        Err(e)
            if e.kind() == std::io::ErrorKind::WouldBlock
                || e.kind() == std::io::ErrorKind::TimedOut =>
        {
            return Err(DnsError::Timeout)
        }
        Err(e) => return Err(DnsError::Io(e)),
    };
    message::parse_response(&buf[..n], id)
}

/// Read the first uncommented `nameserver` directive from `/etc/resolv.conf`,
/// falling back to `8.8.8.8` if the file is absent, unreadable, or has none.
fn pick_nameserver() -> SocketAddr {
    let ip = std::fs::read_to_string("/etc/resolv.conf")
        .ok()
        .as_deref()
        .and_then(parse_resolv_conf)
        .unwrap_or_else(|| IpAddr::V4(std::net::Ipv4Addr::new(8, 8, 8, 8)));
    SocketAddr::new(ip, DNS_PORT)
}

fn parse_resolv_conf(content: &str) -> Option<IpAddr> {
    content.lines().find_map(|line| {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            return None;
        }
        let mut parts = line.split_whitespace();
        if parts.next()? != "nameserver" {
            return None;
        }
        parts.next()?.parse::<IpAddr>().ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_resolv_conf_finds_first_nameserver() {
        let content = "# comment\nnameserver 1.2.3.4\nnameserver 5.6.7.8\n";
        assert_eq!(
            parse_resolv_conf(content),
            Some(IpAddr::V4(std::net::Ipv4Addr::new(1, 2, 3, 4)))
        );
    }

    #[test]
    fn parse_resolv_conf_skips_commented_lines() {
        let content = "; nameserver 9.9.9.9\nnameserver 1.1.1.1\n";
        assert_eq!(
            parse_resolv_conf(content),
            Some(IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1)))
        );
    }

    #[test]
    fn parse_resolv_conf_absent_directive_yields_none() {
        assert_eq!(parse_resolv_conf("domain example.com\n"), None);
    }
}
