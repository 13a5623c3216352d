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

//! Implements command-line argument parsing.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

/// Parses the command line arguments.
pub fn parse() -> Args {
    Args::parse()
}

/// The Charon caching, forwarding DNS resolver
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Args {
    /// Read the configuration from a SQLite settings store
    #[clap(long, value_name = "PATH", conflicts_with = "config")]
    pub db: Option<PathBuf>,

    /// Override the UDP bind address
    #[clap(long, value_name = "IP")]
    pub bind: Option<IpAddr>,

    /// Override the UDP bind port
    #[clap(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Read the configuration from a flat configuration file
    #[clap(value_name = "FILE")]
    pub config: Option<PathBuf>,
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_and_port_overrides_parse() {
        let args = Args::try_parse_from([
            "charond",
            "--bind",
            "127.0.0.1",
            "--port",
            "5353",
            "charon.toml",
        ])
        .unwrap();
        assert_eq!(args.bind, Some("127.0.0.1".parse().unwrap()));
        assert_eq!(args.port, Some(5353));
        assert_eq!(args.config, Some(PathBuf::from("charon.toml")));
        assert_eq!(args.db, None);
    }

    #[test]
    fn the_two_configuration_sources_conflict() {
        assert!(Args::try_parse_from(["charond", "--db", "settings.db", "charon.toml"]).is_err());
    }
}
