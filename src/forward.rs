// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Relaying of query datagrams to upstream resolvers.
//!
//! The [`Forwarder`] holds a pair of upstream addresses and a receive
//! timeout. A query datagram is relayed byte-for-byte to the primary
//! upstream; on timeout or socket error the secondary is tried once.
//! The reply is returned verbatim, so the upstream's ID and flags reach
//! the client unchanged.
//!
//! The [`Upstream`] trait is the seam between the query pipeline and
//! the network: tests substitute an implementation that counts
//! invocations and serves canned answers.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket};
use std::str::FromStr;
use std::time::Duration;

use log::warn;

/// The standard DNS port.
const DNS_PORT: u16 = 53;

////////////////////////////////////////////////////////////////////////
// THE UPSTREAM SEAM                                                  //
////////////////////////////////////////////////////////////////////////

/// Something that can resolve a raw query datagram into a raw response
/// datagram. Implemented by [`Forwarder`] for the real network path.
pub trait Upstream {
    /// Relays `query` and writes the reply into `response`, returning
    /// the reply's length.
    fn forward(&self, query: &[u8], response: &mut [u8]) -> Result<usize>;
}

////////////////////////////////////////////////////////////////////////
// UPSTREAM PRESETS                                                   //
////////////////////////////////////////////////////////////////////////

/// A named pair of public upstream resolvers.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Preset {
    Quad9,
    Cloudflare,
}

impl Preset {
    /// Returns the preset's primary and secondary server addresses.
    pub fn servers(self) -> (Ipv4Addr, Ipv4Addr) {
        match self {
            Self::Quad9 => (
                Ipv4Addr::new(9, 9, 9, 9),
                Ipv4Addr::new(149, 112, 112, 112),
            ),
            Self::Cloudflare => (Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(1, 0, 0, 1)),
        }
    }
}

impl FromStr for Preset {
    type Err = &'static str;

    fn from_str(text: &str) -> std::result::Result<Self, Self::Err> {
        match text.to_ascii_lowercase().as_str() {
            "quad9" => Ok(Self::Quad9),
            "cloudflare" => Ok(Self::Cloudflare),
            _ => Err("unknown upstream preset"),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Quad9 => f.write_str("quad9"),
            Self::Cloudflare => f.write_str("cloudflare"),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// THE FORWARDER                                                      //
////////////////////////////////////////////////////////////////////////

/// Relays query datagrams to a pair of upstream resolvers with timeout
/// and failover. See the [module documentation](self).
pub struct Forwarder {
    primary: SocketAddrV4,
    secondary: SocketAddrV4,
    timeout: Duration,
}

impl Forwarder {
    /// Creates a `Forwarder` for a [`Preset`] with the given
    /// per-attempt receive timeout.
    pub fn new(preset: Preset, timeout: Duration) -> Self {
        let (primary, secondary) = preset.servers();
        Self::with_servers(
            SocketAddrV4::new(primary, DNS_PORT),
            SocketAddrV4::new(secondary, DNS_PORT),
            timeout,
        )
    }

    /// Creates a `Forwarder` with explicit server addresses.
    pub fn with_servers(primary: SocketAddrV4, secondary: SocketAddrV4, timeout: Duration) -> Self {
        Self {
            primary,
            secondary,
            timeout,
        }
    }

    /// Performs one exchange with a single upstream server over an
    /// ephemeral socket. The socket is connected to the server, so
    /// datagrams from other sources are not mistaken for the reply.
    fn exchange(&self, server: SocketAddrV4, query: &[u8], response: &mut [u8]) -> io::Result<usize> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.set_read_timeout(Some(self.timeout))?;
        socket.connect(server)?;
        socket.send(query)?;
        socket.recv(response)
    }
}

impl Upstream for Forwarder {
    fn forward(&self, query: &[u8], response: &mut [u8]) -> Result<usize> {
        let primary_error = match self.exchange(self.primary, query, response) {
            Ok(len) => return Ok(len),
            Err(e) => e,
        };
        warn!(
            "Primary upstream {} failed ({}); trying {}.",
            self.primary, primary_error, self.secondary,
        );
        match self.exchange(self.secondary, query, response) {
            Ok(len) => Ok(len),
            Err(secondary_error) => Err(Error::Exhausted(secondary_error)),
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that neither upstream produced a reply. The
/// secondary upstream's error is carried for the log.
#[derive(Debug)]
pub enum Error {
    Exhausted(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Exhausted(e) => write!(f, "both upstreams failed: {e}"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by [`Upstream::forward`].
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::thread;

    use super::*;

    #[test]
    fn presets_parse_and_name_the_documented_servers() {
        let quad9: Preset = "quad9".parse().unwrap();
        let cloudflare: Preset = "CloudFlare".parse().unwrap();
        assert_eq!(
            quad9.servers(),
            (
                Ipv4Addr::new(9, 9, 9, 9),
                Ipv4Addr::new(149, 112, 112, 112),
            ),
        );
        assert_eq!(
            cloudflare.servers(),
            (Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(1, 0, 0, 1)),
        );
        assert!("opendns".parse::<Preset>().is_err());
    }

    /// Starts a loopback "upstream" that answers one datagram by
    /// echoing it with the first octet incremented.
    fn start_echo_upstream() -> SocketAddrV4 {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        thread::spawn(move || {
            let mut buf = [0; 512];
            let (len, src) = socket.recv_from(&mut buf).unwrap();
            buf[0] = buf[0].wrapping_add(1);
            socket.send_to(&buf[..len], src).unwrap();
        });
        addr
    }

    /// Starts a loopback "upstream" that never answers.
    fn start_silent_upstream() -> (UdpSocket, SocketAddrV4) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let addr = match socket.local_addr().unwrap() {
            SocketAddr::V4(addr) => addr,
            SocketAddr::V6(_) => unreachable!(),
        };
        (socket, addr)
    }

    #[test]
    fn the_primary_reply_is_returned() {
        let primary = start_echo_upstream();
        let (_keep_alive, secondary) = start_silent_upstream();
        let forwarder = Forwarder::with_servers(primary, secondary, Duration::from_secs(2));
        let mut response = [0; 512];
        let len = forwarder.forward(b"\x10query", &mut response).unwrap();
        assert_eq!(&response[..len], b"\x11query");
    }

    #[test]
    fn a_silent_primary_fails_over_to_the_secondary() {
        let (_keep_alive, primary) = start_silent_upstream();
        let secondary = start_echo_upstream();
        let forwarder = Forwarder::with_servers(primary, secondary, Duration::from_millis(200));
        let mut response = [0; 512];
        let len = forwarder.forward(b"\x20query", &mut response).unwrap();
        assert_eq!(&response[..len], b"\x21query");
    }

    #[test]
    fn two_silent_upstreams_exhaust_the_forwarder() {
        let (_keep_a, primary) = start_silent_upstream();
        let (_keep_b, secondary) = start_silent_upstream();
        let forwarder = Forwarder::with_servers(primary, secondary, Duration::from_millis(100));
        let mut response = [0; 512];
        assert!(matches!(
            forwarder.forward(b"\x30query", &mut response),
            Err(Error::Exhausted(_)),
        ));
    }
}
