//! Parses the `ssl:` and `pssl:` connection names this crate's streams are
//! opened with.

use std::net::IpAddr;

/// Default port for `ssl:` URIs with no explicit port, and for `pssl:`
/// listeners with no explicit port: the OpenFlow-over-TLS port of the
/// framework this module was distilled from.
pub const DEFAULT_PORT: u16 = 6633;

/// A parsed `ssl:<host>[:<port>]` active connection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveName {
    pub host: String,
    pub port: u16,
}

/// A parsed `pssl:[<port>][:<bind-addr>]` passive connection name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveName {
    pub port: u16,
    pub bind_addr: Option<IpAddr>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameError {
    #[error("`{0}` is not a valid port number")]
    BadPort(String),
    #[error("`{0}` is not a valid bind address")]
    BadAddress(String),
    #[error("connection name is empty")]
    Empty,
}

/// Parses the suffix after `ssl:` (i.e. everything a host framework would
/// pass as `suffix` to `open(name, suffix)`): `<host>[:<port>]`.
pub fn parse_active(suffix: &str) -> Result<ActiveName, NameError> {
    if suffix.is_empty() {
        return Err(NameError::Empty);
    }
    match suffix.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            let port = port.parse().map_err(|_| NameError::BadPort(port.to_string()))?;
            Ok(ActiveName { host: host.to_string(), port })
        }
        _ => Ok(ActiveName { host: suffix.to_string(), port: DEFAULT_PORT }),
    }
}

/// Parses the suffix after `pssl:`: `[<port>][:<bind-addr>]`.
pub fn parse_passive(suffix: &str) -> Result<PassiveName, NameError> {
    if suffix.is_empty() {
        return Ok(PassiveName { port: DEFAULT_PORT, bind_addr: None });
    }

    let (port_part, addr_part) = match suffix.split_once(':') {
        Some((p, a)) => (p, Some(a)),
        None => (suffix, None),
    };

    let port = if port_part.is_empty() {
        DEFAULT_PORT
    } else {
        port_part.parse().map_err(|_| NameError::BadPort(port_part.to_string()))?
    };

    let bind_addr = match addr_part {
        None | Some("") => None,
        Some(a) => Some(a.parse().map_err(|_| NameError::BadAddress(a.to_string()))?),
    };

    Ok(PassiveName { port, bind_addr })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_name_defaults_port() {
        assert_eq!(parse_active("switch.example").unwrap(), ActiveName {
            host: "switch.example".into(),
            port: DEFAULT_PORT,
        });
    }

    #[test]
    fn active_name_with_explicit_port() {
        assert_eq!(parse_active("127.0.0.1:6634").unwrap(), ActiveName {
            host: "127.0.0.1".into(),
            port: 6634,
        });
    }

    #[test]
    fn active_name_rejects_empty() {
        assert_eq!(parse_active("").unwrap_err(), NameError::Empty);
    }

    #[test]
    fn passive_name_defaults_everything() {
        let n = parse_passive("").unwrap();
        assert_eq!(n.port, DEFAULT_PORT);
        assert_eq!(n.bind_addr, None);
    }

    #[test]
    fn passive_name_with_port_only() {
        let n = parse_passive("6634").unwrap();
        assert_eq!(n.port, 6634);
        assert_eq!(n.bind_addr, None);
    }

    #[test]
    fn passive_name_with_port_and_addr() {
        let n = parse_passive("6634:0.0.0.0").unwrap();
        assert_eq!(n.port, 6634);
        assert_eq!(n.bind_addr, Some("0.0.0.0".parse().unwrap()));
    }

    #[test]
    fn passive_name_with_addr_only() {
        let n = parse_passive(":192.168.1.1").unwrap();
        assert_eq!(n.port, DEFAULT_PORT);
        assert_eq!(n.bind_addr, Some("192.168.1.1".parse().unwrap()));
    }
}
