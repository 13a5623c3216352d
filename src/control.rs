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

//! The administrative control socket.
//!
//! A Unix stream socket (by default at `/run/charon.sock`) accepts
//! line-oriented commands:
//!
//! ```text
//! flush
//! evict
//! stats
//! add NAME TYPE RDATA [TTL]
//! del NAME TYPE
//! ```
//!
//! Each connection carries exactly one command and receives exactly one
//! reply line, starting with `OK:` or `ERR:`. Failed commands never
//! mutate the store.
//!
//! The listener is non-blocking; the engine polls it once per event
//! loop iteration and services at most one client inline, on the same
//! thread that owns the store. There are no persistent sessions.

use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, warn};

use crate::name::Name;
use crate::rr::{rdata, Ttl, Type};
use crate::store::{Store, DEFAULT_LOCAL_TTL};

/// The default location of the control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/run/charon.sock";

/// The longest command line a client may send.
const MAX_COMMAND_LEN: usize = 512;

/// How long a connected client has to deliver its command. The client
/// is serviced inline on the engine thread, so a stalled client must
/// not stall query processing for long.
const CLIENT_TIMEOUT: Duration = Duration::from_millis(500);

////////////////////////////////////////////////////////////////////////
// THE CONTROL PLANE                                                  //
////////////////////////////////////////////////////////////////////////

/// The control socket listener. See the [module documentation](self).
pub struct ControlPlane {
    listener: UnixListener,
    path: PathBuf,
}

impl ControlPlane {
    /// Binds the control socket at `path`, unlinking a stale socket
    /// file from a previous run first, and puts the listener in
    /// non-blocking mode.
    pub fn bind(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener, path })
    }

    /// Returns the path the control socket is bound at.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts and services at most one waiting client, mutating
    /// `store` as its command directs. Returns immediately if no client
    /// is waiting.
    pub fn poll(&self, store: &mut Store) {
        match self.listener.accept() {
            Ok((stream, _)) => {
                if let Err(e) = handle_client(stream, store) {
                    warn!("Control client error: {}", e);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => (),
            Err(e) => warn!("Control socket accept failed: {}", e),
        }
    }
}

impl Drop for ControlPlane {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Reads one command line from a client, executes it, and writes the
/// reply. The connection is closed when the stream is dropped.
fn handle_client(mut stream: UnixStream, store: &mut Store) -> io::Result<()> {
    // The accepted stream may inherit non-blocking mode from the
    // listener on some platforms.
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(CLIENT_TIMEOUT))?;

    let mut buf = [0; MAX_COMMAND_LEN];
    let mut len = 0;
    while len < buf.len() {
        let n = stream.read(&mut buf[len..])?;
        if n == 0 {
            break;
        }
        len += n;
        if buf[..len].contains(&b'\n') {
            break;
        }
    }

    let text = String::from_utf8_lossy(&buf[..len]);
    let line = text.split('\n').next().unwrap_or("").trim();
    let reply = execute(line, store);
    debug!("Control command {:?} -> {:?}", line, reply.trim_end());
    stream.write_all(reply.as_bytes())
}

////////////////////////////////////////////////////////////////////////
// COMMAND EXECUTION                                                  //
////////////////////////////////////////////////////////////////////////

/// Executes a single command line against `store` and returns the reply
/// line (including the trailing newline).
pub fn execute(line: &str, store: &mut Store) -> String {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields.split_first() {
        Some((&"flush", [])) => {
            store.flush_cache();
            "OK: cache flushed\n".to_owned()
        }
        Some((&"evict", [])) => {
            store.evict_expired();
            "OK: expired entries evicted\n".to_owned()
        }
        Some((&"stats", [])) => {
            format!("OK: {} cache entries\n", store.cache_count())
        }
        Some((&"add", args)) => add(args, store),
        Some((&"del", args)) => del(args, store),
        _ => "ERR: unknown command. Known commands: flush, evict, stats, add NAME TYPE RDATA \
              [TTL], del NAME TYPE\n"
            .to_owned(),
    }
}

/// Implements `add NAME TYPE RDATA [TTL]`. All arguments are validated
/// before anything is inserted, so a failed `add` leaves the store
/// untouched.
fn add(args: &[&str], store: &mut Store) -> String {
    if args.len() < 3 {
        return "ERR: usage: add NAME TYPE RDATA [TTL]\n".to_owned();
    }

    let name: Name = match args[0].parse() {
        Ok(name) => name,
        Err(e) => return format!("ERR: invalid name: {e}\n"),
    };
    let rr_type: Type = match args[1].parse() {
        Ok(rr_type) => rr_type,
        Err(e) => return format!("ERR: invalid type: {e}\n"),
    };

    // As in the zone file format, the TTL is the final argument when
    // there is room for one and it is numeric; RDATA may contain
    // whitespace (an MX record, say).
    let (rdata_args, ttl) = match args.last().unwrap().parse::<u32>() {
        Ok(ttl) if args.len() > 3 => (&args[2..args.len() - 1], Ttl::from(ttl)),
        _ => (&args[2..], Ttl::from(DEFAULT_LOCAL_TTL)),
    };
    let rdata_text = rdata_args.join(" ");
    if let Err(e) = rdata::encode(rr_type, &rdata_text) {
        return format!("ERR: invalid RDATA: {e}\n");
    }

    store.add_local(name, rr_type, rdata_text, ttl);
    "OK: record added\n".to_owned()
}

/// Implements `del NAME TYPE`.
fn del(args: &[&str], store: &mut Store) -> String {
    let (name, rr_type) = match args {
        [name, rr_type] => (name, rr_type),
        _ => return "ERR: usage: del NAME TYPE\n".to_owned(),
    };
    let name: Name = match name.parse() {
        Ok(name) => name,
        Err(e) => return format!("ERR: invalid name: {e}\n"),
    };
    let rr_type: Type = match rr_type.parse() {
        Ok(rr_type) => rr_type,
        Err(e) => return format!("ERR: invalid type: {e}\n"),
    };
    store.delete_local(&name, rr_type);
    "OK: record deleted\n".to_owned()
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    fn name(text: &str) -> Name {
        text.parse().unwrap()
    }

    #[test]
    fn add_then_del_round_trips() {
        let mut store = Store::new();
        assert_eq!(
            execute("add myhost.local A 10.0.0.5", &mut store),
            "OK: record added\n",
        );
        let records = store.lookup_local(&name("myhost.local."), Type::A);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].rdata, "10.0.0.5");
        assert_eq!(records[0].ttl, Ttl::from(DEFAULT_LOCAL_TTL));

        assert_eq!(
            execute("del myhost.local A", &mut store),
            "OK: record deleted\n",
        );
        assert!(store.lookup_local(&name("myhost.local."), Type::A).is_empty());
    }

    #[test]
    fn add_accepts_an_explicit_ttl_and_spaced_rdata() {
        let mut store = Store::new();
        assert_eq!(
            execute("add myhost.local A 10.0.0.5 120", &mut store),
            "OK: record added\n",
        );
        assert_eq!(
            store.lookup_local(&name("myhost.local."), Type::A)[0].ttl,
            Ttl::from(120),
        );

        assert_eq!(
            execute("add styx.local MX 10 mail.styx.local. 600", &mut store),
            "OK: record added\n",
        );
        let mx = store.lookup_local(&name("styx.local."), Type::MX);
        assert_eq!(mx[0].rdata, "10 mail.styx.local.");
        assert_eq!(mx[0].ttl, Ttl::from(600));
    }

    #[test]
    fn a_failed_add_leaves_the_store_unchanged() {
        let mut store = Store::new();
        let reply = execute("add myhost.local BOGUS 10.0.0.5", &mut store);
        assert!(reply.starts_with("ERR: invalid type"), "{reply}");
        let reply = execute("add myhost.local A not-an-address", &mut store);
        assert!(reply.starts_with("ERR: invalid RDATA"), "{reply}");
        let reply = execute("add ..bad.. A 10.0.0.5", &mut store);
        assert!(reply.starts_with("ERR: invalid name"), "{reply}");
        assert_eq!(store.local_count(), 0);
    }

    #[test]
    fn flush_evict_and_stats_report_the_cache() {
        let mut store = Store::new();
        store.cache_record(name("example.com."), Type::A, "1.2.3.4".to_owned(), Ttl::from(60));
        assert_eq!(execute("stats", &mut store), "OK: 1 cache entries\n");
        assert_eq!(execute("flush", &mut store), "OK: cache flushed\n");
        assert_eq!(execute("stats", &mut store), "OK: 0 cache entries\n");
        assert_eq!(
            execute("evict", &mut store),
            "OK: expired entries evicted\n",
        );
    }

    #[test]
    fn unknown_and_malformed_commands_get_err_replies() {
        let mut store = Store::new();
        assert!(execute("frobnicate", &mut store).starts_with("ERR: unknown command"));
        assert!(execute("", &mut store).starts_with("ERR: unknown command"));
        assert!(execute("add onlyaname", &mut store).starts_with("ERR: usage"));
        assert!(execute("del onlyaname", &mut store).starts_with("ERR: usage"));
        // Commands take no stray arguments.
        assert!(execute("flush everything", &mut store).starts_with("ERR: unknown command"));
    }

    #[test]
    fn the_socket_services_one_command_per_connection() {
        let path = std::env::temp_dir().join(format!("charon-control-test-{}.sock", std::process::id()));
        let control = ControlPlane::bind(&path).unwrap();
        let mut store = Store::new();

        // No client yet: poll must return without doing anything.
        control.poll(&mut store);

        let mut client = UnixStream::connect(&path).unwrap();
        client.write_all(b"add myhost.local A 10.0.0.5\n").unwrap();
        control.poll(&mut store);
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();
        assert_eq!(reply, "OK: record added\n");
        assert_eq!(store.local_count(), 1);

        drop(control);
        assert!(!path.exists());
    }
}
