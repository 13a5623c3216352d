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

//! The single-threaded event loop.
//!
//! One thread owns the UDP socket, the [`Store`](crate::store::Store)
//! (through the [`Resolver`]), and the control socket listener. Each
//! iteration of the loop, in order:
//!
//! 1. polls the control socket (non-blocking, at most one client);
//! 2. evicts expired cache entries;
//! 3. receives one query datagram;
//! 4. processes it through the [`Resolver`]; and
//! 5. sends the response to the query's source address.
//!
//! The receive in step 3 uses a short timeout so that steps 1 and 2 run
//! regularly even when no queries arrive. Queries are serviced strictly
//! in arrival order, and each response is sent before the next receive.
//! There are no locks and no shared mutable state: the control plane
//! mutates the store inline from this same thread.

use std::io;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, warn};

use crate::control::ControlPlane;
use crate::forward::Upstream;
use crate::resolver::Resolver;

/// The timeout on the UDP receive. This bounds how long the control
/// socket and cache eviction can go unserviced under idle load, and how
/// long shutdown takes to be noticed.
const RECEIVE_TIMEOUT: Duration = Duration::from_millis(250);

/// How long to pause after an unexpected socket error before trying to
/// receive again, so that a persistently failing socket does not spin
/// the CPU.
const RECEIVE_ERROR_DELAY: Duration = Duration::from_millis(100);

/// The size of the receive buffer. Queries are relayed upstream
/// byte-for-byte, so the buffer accommodates more than the classic
/// 512-octet message in case a client sends a larger (EDNS) query.
const RECEIVED_BUF_SIZE: usize = 2048;

/// The size of the response buffer. Forwarded replies are returned
/// verbatim at whatever size the upstream produced.
const RESPONSE_BUF_SIZE: usize = 4096;

/// The event loop. See the [module documentation](self).
pub struct Engine<U> {
    socket: UdpSocket,
    control: ControlPlane,
    resolver: Resolver<U>,
    shutdown: Arc<AtomicBool>,
}

impl<U: Upstream> Engine<U> {
    /// Creates a new `Engine` from its parts. The engine takes sole
    /// ownership of both sockets and the resolver; `shutdown` is the
    /// flag a signal handler raises to stop the loop.
    pub fn new(
        socket: UdpSocket,
        control: ControlPlane,
        resolver: Resolver<U>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            socket,
            control,
            resolver,
            shutdown,
        }
    }

    /// Runs the event loop until the shutdown flag is raised. Per-query
    /// trouble never ends the loop; only the inability to configure the
    /// UDP socket is reported as an error.
    pub fn run(&mut self) -> io::Result<()> {
        self.socket.set_read_timeout(Some(RECEIVE_TIMEOUT))?;

        let mut received_buf = [0; RECEIVED_BUF_SIZE];
        let mut response_buf = [0; RESPONSE_BUF_SIZE];
        while !self.shutdown.load(Ordering::Relaxed) {
            self.control.poll(self.resolver.store_mut());
            self.resolver.store_mut().evict_expired();

            let (len, src) = match self.socket.recv_from(&mut received_buf) {
                Ok(received) => received,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => {
                    error!("UDP receive failed: {}", e);
                    thread::sleep(RECEIVE_ERROR_DELAY);
                    continue;
                }
            };

            if let Some(response_len) = self
                .resolver
                .handle_datagram(&received_buf[..len], &mut response_buf)
            {
                // Send failures are logged and ignored; we keep
                // processing incoming queries as long as receiving
                // works.
                if let Err(e) = self.socket.send_to(&response_buf[..response_len], src) {
                    warn!("Failed to send a response to {}: {}", src, e);
                }
            }
        }
        Ok(())
    }
}
