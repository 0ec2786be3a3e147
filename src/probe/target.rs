//! Extracting hosts and ports from endpoint targets.
//!
//! Targets are free-form: a URL (`https://host/path`, `tcp://host:5432`),
//! a `host:port` pair, a bracketed IPv6 address, or a bare host.

use std::net::{IpAddr, SocketAddr};

use reqwest::Url;

use super::ProbeError;

/// Split a target into host and port. URLs without an explicit port use
/// their scheme's default; bare hosts have no port and are rejected.
pub fn host_port(target: &str) -> Result<(String, u16), ProbeError> {
    let target = target.trim();

    if target.contains("://") {
        let url = Url::parse(target).map_err(|e| ProbeError::Target(format!("{}: {}", target, e)))?;
        let host = url_host(&url)?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| ProbeError::Target(format!("no port in {}", target)))?;
        return Ok((host, port));
    }

    let authority = strip_path(target);
    if let Ok(addr) = authority.parse::<SocketAddr>() {
        return Ok((addr.ip().to_string(), addr.port()));
    }

    match authority.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port = port
                .parse::<u16>()
                .map_err(|_| ProbeError::Target(format!("bad port in {}", target)))?;
            Ok((host.to_string(), port))
        }
        _ => Err(ProbeError::Target(format!("no port in {}", target))),
    }
}

/// The host part of a target, without scheme, port, or path.
pub fn hostname(target: &str) -> Result<String, ProbeError> {
    let target = target.trim();

    if target.contains("://") {
        let url = Url::parse(target).map_err(|e| ProbeError::Target(format!("{}: {}", target, e)))?;
        return url_host(&url);
    }

    let authority = strip_path(target);
    if let Ok(addr) = authority.parse::<SocketAddr>() {
        return Ok(addr.ip().to_string());
    }
    if let Ok(ip) = authority.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
        return Ok(ip.to_string());
    }

    let host = match authority.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => authority,
    };
    if host.is_empty() {
        return Err(ProbeError::Target(format!("no host in {}", target)));
    }
    // Would be read as an option by the ping command
    if host.starts_with('-') {
        return Err(ProbeError::Target(format!("invalid host in {}", target)));
    }
    Ok(host.to_string())
}

fn url_host(url: &Url) -> Result<String, ProbeError> {
    let host = url
        .host_str()
        .ok_or_else(|| ProbeError::Target(format!("no host in {}", url)))?;
    Ok(host.trim_start_matches('[').trim_end_matches(']').to_string())
}

fn strip_path(target: &str) -> &str {
    target.split(['/', '?', '#']).next().unwrap_or(target)
}
