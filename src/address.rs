//! Data types for addresses of application entities in DICOM networks.

use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use snafu::Snafu;

/// A full address to a peer application entity:
/// an AE title plus a network socket address.
///
/// These addresses can be serialized and parsed
/// with the syntax `{ae_title}@{host}:{port}`.
///
/// # Example
///
/// ```
/// # use dicom_association::FullAeAddr;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let addr: FullAeAddr = "STORE-SCP@127.0.0.1:104".parse()?;
/// assert_eq!(addr.ae_title(), "STORE-SCP");
/// assert_eq!(addr.socket_addr(), "127.0.0.1:104");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullAeAddr {
    ae_title: String,
    socket_addr: String,
}

impl FullAeAddr {
    /// Create an AE address from its bare constituent parts.
    pub fn new(ae_title: impl Into<String>, socket_addr: impl Into<String>) -> Self {
        FullAeAddr {
            ae_title: ae_title.into(),
            socket_addr: socket_addr.into(),
        }
    }

    /// Retrieve the application entity title portion.
    pub fn ae_title(&self) -> &str {
        &self.ae_title
    }

    /// Retrieve the socket address portion.
    ///
    /// Host names are kept unresolved
    /// so that resolution can happen at connection time.
    pub fn socket_addr(&self) -> &str {
        &self.socket_addr
    }
}

impl From<(String, SocketAddr)> for FullAeAddr {
    fn from((ae_title, socket_addr): (String, SocketAddr)) -> Self {
        Self::new(ae_title, socket_addr.to_string())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Snafu)]
pub enum ParseAeAddressError {
    /// Missing `@` separator in full AE address
    MissingPart,

    /// Missing port in socket address
    MissingPort,
}

impl FromStr for FullAeAddr {
    type Err = ParseAeAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((ae_title, addr)) = s.split_once('@') {
            if !addr.contains(':') {
                return Err(ParseAeAddressError::MissingPort);
            }
            Ok(FullAeAddr {
                ae_title: ae_title.to_string(),
                socket_addr: addr.to_string(),
            })
        } else {
            Err(ParseAeAddressError::MissingPart)
        }
    }
}

impl ToSocketAddrs for FullAeAddr {
    type Iter = std::vec::IntoIter<SocketAddr>;

    fn to_socket_addrs(&self) -> std::io::Result<Self::Iter> {
        self.socket_addr.to_socket_addrs()
    }
}

impl std::fmt::Display for FullAeAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.ae_title)?;
        f.write_str("@")?;
        f.write_str(&self.socket_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_ae_addr() {
        let addr: FullAeAddr = "QUERY-SCP@pacs.example.org:11112".parse().unwrap();
        assert_eq!(addr.ae_title(), "QUERY-SCP");
        assert_eq!(addr.socket_addr(), "pacs.example.org:11112");
        assert_eq!(&addr.to_string(), "QUERY-SCP@pacs.example.org:11112");

        assert_eq!(
            "no-separator:104".parse::<FullAeAddr>(),
            Err(ParseAeAddressError::MissingPart)
        );
        assert_eq!(
            "AET@no-port".parse::<FullAeAddr>(),
            Err(ParseAeAddressError::MissingPort)
        );
    }
}
