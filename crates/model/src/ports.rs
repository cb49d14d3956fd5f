use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Network protocol of an opened port range.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    Tcp,

    /// UDP.
    Udp,

    /// ICMP; carries no port numbers.
    Icmp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
        })
    }
}

/// An inclusive range of ports for one protocol.
///
/// Parsed from `80`, `80/udp`, `8000-8080/tcp` or `icmp`; the protocol
/// defaults to TCP.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRange {
    protocol: Protocol,
    from: u16,
    to: u16,
}

impl PortRange {
    /// Creates a validated TCP or UDP range.
    ///
    /// # Errors
    ///
    /// Returns an error for port 0, an inverted range or ICMP.
    pub fn new(from: u16, to: u16, protocol: Protocol) -> Result<Self, ParseError> {
        let display = format!("{from}-{to}/{protocol}");
        if protocol == Protocol::Icmp {
            return Err(ParseError::PortRange(display, "icmp does not take ports"));
        }
        if from == 0 || to == 0 {
            return Err(ParseError::PortRange(display, "ports must be between 1 and 65535"));
        }
        if from > to {
            return Err(ParseError::PortRange(display, "range start exceeds range end"));
        }
        Ok(Self { protocol, from, to })
    }

    /// A single TCP or UDP port.
    ///
    /// # Errors
    ///
    /// Returns an error for port 0 or ICMP.
    pub fn single(port: u16, protocol: Protocol) -> Result<Self, ParseError> {
        Self::new(port, port, protocol)
    }

    /// The ICMP pseudo-range.
    #[must_use]
    pub const fn icmp() -> Self {
        Self {
            protocol: Protocol::Icmp,
            from: 0,
            to: 0,
        }
    }

    /// Protocol of the range.
    #[must_use]
    pub const fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// First port in the range.
    #[must_use]
    pub const fn from_port(&self) -> u16 {
        self.from
    }

    /// Last port in the range.
    #[must_use]
    pub const fn to_port(&self) -> u16 {
        self.to
    }

    /// Whether the two ranges share a protocol and at least one port.
    #[must_use]
    pub const fn overlaps(&self, other: &Self) -> bool {
        self.protocol as u8 == other.protocol as u8 && self.from <= other.to && other.from <= self.to
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.protocol {
            Protocol::Icmp => f.write_str("icmp"),
            _ if self.from == self.to => write!(f, "{}/{}", self.from, self.protocol),
            _ => write!(f, "{}-{}/{}", self.from, self.to, self.protocol),
        }
    }
}

impl FromStr for PortRange {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim().to_ascii_lowercase();
        if input == "icmp" {
            return Ok(Self::icmp());
        }

        let (ports, protocol) = match input.split_once('/') {
            Some((ports, "tcp")) => (ports, Protocol::Tcp),
            Some((ports, "udp")) => (ports, Protocol::Udp),
            Some((_, "icmp")) => {
                return Err(ParseError::PortRange(s.to_string(), "icmp does not take ports"));
            }
            Some(_) => {
                return Err(ParseError::PortRange(
                    s.to_string(),
                    "protocol must be tcp, udp or icmp",
                ));
            }
            None => (input.as_str(), Protocol::Tcp),
        };

        let parse_port = |port: &str| {
            port.parse::<u16>()
                .map_err(|_| ParseError::PortRange(s.to_string(), "ports must be between 1 and 65535"))
        };

        let (from, to) = match ports.split_once('-') {
            Some((from, to)) => (parse_port(from)?, parse_port(to)?),
            None => {
                let port = parse_port(ports)?;
                (port, port)
            }
        };

        Self::new(from, to, protocol).map_err(|e| match e {
            ParseError::PortRange(_, reason) => ParseError::PortRange(s.to_string(), reason),
            other => other,
        })
    }
}

impl TryFrom<String> for PortRange {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortRange> for String {
    fn from(value: PortRange) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_port_forms() {
        assert_eq!("80".parse::<PortRange>().unwrap().to_string(), "80/tcp");
        assert_eq!("53/UDP".parse::<PortRange>().unwrap().to_string(), "53/udp");
        assert_eq!(
            "8000-8080/tcp".parse::<PortRange>().unwrap().to_string(),
            "8000-8080/tcp"
        );
        assert_eq!("icmp".parse::<PortRange>().unwrap(), PortRange::icmp());
    }

    #[test]
    fn test_reject_invalid_ports() {
        for bad in ["0", "70000", "90-80/tcp", "80/sctp", "80/icmp", "http", "-/tcp"] {
            assert!(bad.parse::<PortRange>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_overlap() {
        let a: PortRange = "8000-8080".parse().unwrap();
        let b: PortRange = "8080".parse().unwrap();
        let c: PortRange = "8080/udp".parse().unwrap();

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
