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

//! Implements the server configuration.
//!
//! The configuration can come from two places:
//!
//! * a flat TOML file of top-level `key = value` pairs, named as a
//!   positional argument; or
//! * a SQLite settings store, selected with `--db`, holding the same
//!   keys as rows of a `settings(key, value)` table.
//!
//! With neither, the defaults apply. The settings store may be shared
//! with other tools of the system, so keys it holds that Charon does
//! not recognize are ignored; the dedicated configuration file, by
//! contrast, rejects unknown keys.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use rusqlite::{Connection, OpenFlags};
use serde::Deserialize;

use charon::control::DEFAULT_SOCKET_PATH;
use charon::forward::Preset;

use crate::args::Args;

////////////////////////////////////////////////////////////////////////
// CONFIGURATION STRUCTURE                                            //
////////////////////////////////////////////////////////////////////////

/// The complete server configuration.
#[derive(Debug, Deserialize, Eq, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct Config {
    /// The UDP port to answer queries on.
    pub listen_port: u16,

    /// The address to bind the UDP socket at.
    pub listen_addr: IpAddr,

    /// The upstream preset to forward cache misses to (`"quad9"` or
    /// `"cloudflare"`).
    pub upstream: String,

    /// The per-attempt upstream receive timeout, in milliseconds.
    pub upstream_timeout_ms: u64,

    /// A zone file to load into the local zone relation at startup.
    pub zone_file: Option<PathBuf>,

    /// The TTL given to cached records whose upstream answer carried
    /// none (that is, a zero TTL).
    pub cache_ttl: u32,

    /// An advisory upper bound on the cache size.
    pub max_cache_entries: Option<usize>,

    /// Whether to log per-query decisions.
    pub verbose: bool,

    /// The path of the control socket.
    pub control_socket: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 53,
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            upstream: "quad9".to_owned(),
            upstream_timeout_ms: 3000,
            zone_file: None,
            cache_ttl: 300,
            max_cache_entries: None,
            verbose: false,
            control_socket: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

impl Config {
    /// Resolves the `upstream` key into a [`Preset`].
    pub fn upstream_preset(&self) -> Result<Preset> {
        self.upstream
            .parse()
            .map_err(|e| anyhow!("invalid upstream {:?}: {}", self.upstream, e))
    }
}

////////////////////////////////////////////////////////////////////////
// CONFIGURATION LOADING                                              //
////////////////////////////////////////////////////////////////////////

/// Loads the configuration from whichever source the command line
/// selected, or the defaults if it selected none.
pub fn load(args: &Args) -> Result<Config> {
    if let Some(ref db) = args.db {
        load_from_db(db)
    } else if let Some(ref file) = args.config {
        load_from_path(file)
    } else {
        Ok(Config::default())
    }
}

/// Loads the configuration from the flat file at `path`.
pub fn load_from_path(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path).context("failed to read the configuration file")?;
    toml::from_str(&raw).context("failed to parse the configuration file")
}

/// Loads the configuration from the SQLite settings store at `path`.
pub fn load_from_db(path: &Path) -> Result<Config> {
    let connection = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .context("failed to open the settings store")?;
    load_from_connection(&connection)
}

/// The underlying implementation of [`load_from_db`].
fn load_from_connection(connection: &Connection) -> Result<Config> {
    let mut config = Config::default();
    let mut statement = connection
        .prepare("SELECT key, value FROM settings")
        .context("failed to read the settings table")?;
    let rows = statement
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .context("failed to read the settings table")?;
    for row in rows {
        let (key, value) = row.context("failed to read the settings table")?;
        apply(&mut config, &key, &value)
            .with_context(|| format!("bad value for settings key {:?}", key))?;
    }
    Ok(config)
}

/// Applies a single settings-store row to `config`. Keys that Charon
/// does not recognize belong to other tools sharing the store and are
/// ignored.
fn apply(config: &mut Config, key: &str, value: &str) -> Result<()> {
    match key {
        "listen_port" => config.listen_port = value.parse()?,
        "listen_addr" => config.listen_addr = value.parse()?,
        "upstream" => config.upstream = value.to_owned(),
        "upstream_timeout_ms" => config.upstream_timeout_ms = value.parse()?,
        "zone_file" => config.zone_file = Some(PathBuf::from(value)),
        "cache_ttl" => config.cache_ttl = value.parse()?,
        "max_cache_entries" => config.max_cache_entries = Some(value.parse()?),
        "verbose" => config.verbose = parse_bool(value)?,
        "control_socket" => config.control_socket = PathBuf::from(value),
        _ => (),
    }
    Ok(())
}

/// Parses the boolean forms a settings store tends to hold.
fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(anyhow!("not a boolean: {:?}", value)),
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_defaults_are_as_documented() {
        let config = Config::default();
        assert_eq!(config.listen_port, 53);
        assert_eq!(config.listen_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.upstream_preset().unwrap(), Preset::Quad9);
        assert_eq!(config.upstream_timeout_ms, 3000);
        assert_eq!(config.cache_ttl, 300);
        assert!(!config.verbose);
        assert_eq!(config.control_socket, PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn a_flat_file_overrides_the_defaults() {
        let config: Config = toml::from_str(
            r#"
            listen_port = 5353
            listen_addr = "127.0.0.1"
            upstream = "cloudflare"
            zone_file = "/etc/charon/styx.zone"
            cache_ttl = 60
            verbose = true
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_port, 5353);
        assert_eq!(config.listen_addr, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.upstream_preset().unwrap(), Preset::Cloudflare);
        assert_eq!(config.zone_file, Some(PathBuf::from("/etc/charon/styx.zone")));
        assert_eq!(config.cache_ttl, 60);
        assert!(config.verbose);
        // Unset keys keep their defaults.
        assert_eq!(config.upstream_timeout_ms, 3000);
    }

    #[test]
    fn unknown_keys_in_the_flat_file_are_rejected() {
        assert!(toml::from_str::<Config>("listen_prot = 53").is_err());
    }

    #[test]
    fn a_settings_store_overrides_the_defaults_and_ignores_foreign_keys() {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT NOT NULL);
                 INSERT INTO settings VALUES
                     ('listen_port', '5353'),
                     ('upstream', 'cloudflare'),
                     ('verbose', '1'),
                     ('hostname', 'styx01');",
            )
            .unwrap();
        let config = load_from_connection(&connection).unwrap();
        assert_eq!(config.listen_port, 5353);
        assert_eq!(config.upstream_preset().unwrap(), Preset::Cloudflare);
        assert!(config.verbose);
        assert_eq!(config.cache_ttl, 300);
    }

    #[test]
    fn bad_settings_store_values_are_reported() {
        let connection = Connection::open_in_memory().unwrap();
        connection
            .execute_batch(
                "CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT NOT NULL);
                 INSERT INTO settings VALUES ('listen_port', 'not-a-port');",
            )
            .unwrap();
        assert!(load_from_connection(&connection).is_err());
    }
}
