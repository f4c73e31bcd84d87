// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! CHIRP beacon: zero-configuration peer discovery within a group.
//!
//! One UDP socket per satellite, bound to the well-known beacon port with
//! address reuse and broadcast enabled, non-blocking. Outgoing datagrams go
//! to every known broadcast address of the selected interface; incoming
//! datagrams are validated, self-sent packets dropped, and foreign-group
//! packets dropped while the group filter is on (the default).

mod manager;
mod socket;

pub use manager::{BroadcastManager, DiscoveredService, ServiceCallback};
pub use socket::BeaconSocket;

use std::net::Ipv4Addr;

/// Broadcast addresses for the selected interface.
///
/// `*` selects every broadcast-capable interface. On Linux the addresses
/// come from `ip -4 addr show` (the `brd` column); when that is unavailable
/// or yields nothing, the limited broadcast address is used so discovery
/// still works inside containers.
pub fn broadcast_addresses(interface: &str) -> Vec<Ipv4Addr> {
    let mut addrs = platform_broadcasts(interface);
    if addrs.is_empty() {
        addrs.push(Ipv4Addr::BROADCAST);
    }
    addrs
}

#[cfg(target_os = "linux")]
fn platform_broadcasts(interface: &str) -> Vec<Ipv4Addr> {
    use std::process::Command;

    let output = match Command::new("ip").args(["-4", "addr", "show"]).output() {
        Ok(o) => o,
        Err(_) => {
            log::debug!("[CHIRP] 'ip' command not found, using crate fallback");
            return crate_fallback();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut addrs = Vec::new();
    for line in stdout.lines() {
        let line = line.trim();
        let Some(inet_part) = line.strip_prefix("inet ") else {
            continue;
        };
        let own_addr = inet_part
            .split('/')
            .next()
            .and_then(|a| a.trim().parse::<Ipv4Addr>().ok());
        if interface != "*" {
            match own_addr {
                Some(addr) if addr.to_string() == interface => {}
                _ => continue,
            }
        }
        if let Some(brd) = line.split_whitespace().skip_while(|w| *w != "brd").nth(1) {
            if let Ok(addr) = brd.parse::<Ipv4Addr>() {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
    }
    addrs
}

#[cfg(not(target_os = "linux"))]
fn platform_broadcasts(interface: &str) -> Vec<Ipv4Addr> {
    let _ = interface;
    crate_fallback()
}

/// Without netmask information, fall back to the limited broadcast
/// address; `local_ip_address` confirms there is at least one usable IPv4
/// interface.
fn crate_fallback() -> Vec<Ipv4Addr> {
    match local_ip_address::local_ip() {
        Ok(std::net::IpAddr::V4(_)) => vec![Ipv4Addr::BROADCAST],
        _ => Vec::new(),
    }
}
