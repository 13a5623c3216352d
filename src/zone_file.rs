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

//! Loading of the flat zone file format.
//!
//! Each non-empty, non-comment line describes one authoritative record:
//!
//! ```text
//! NAME TYPE RDATA [TTL]
//! ```
//!
//! Fields are whitespace-separated. A line whose first non-whitespace
//! character is `#` or `;` is a comment. Because RDATA may itself
//! contain whitespace (an MX record, say), the optional TTL is taken to
//! be the final field when there are at least four fields and the final
//! field parses as an unsigned integer.
//!
//! Invalid lines are skipped: a zone file never fails to load because
//! of a bad record. (Failure to *open* the file is an I/O error, which
//! the caller treats as fatal at startup.) The loader returns the
//! number of records accepted.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use log::{debug, warn};

use crate::name::Name;
use crate::rr::{rdata, Ttl, Type};
use crate::store::{Store, DEFAULT_LOCAL_TTL};

/// Opens the zone file at `path` and loads its records into the local
/// zone relation of `store`. Returns the number of records accepted.
pub fn load_into(store: &mut Store, path: &Path) -> io::Result<usize> {
    let file = File::open(path)?;
    let accepted = read_into(store, BufReader::new(file));
    debug!("Loaded {} records from {}.", accepted, path.display());
    Ok(accepted)
}

/// Loads records from `reader` into the local zone relation of `store`.
/// Returns the number of records accepted.
pub fn read_into(store: &mut Store, reader: impl BufRead) -> usize {
    let mut accepted = 0;
    for (index, line) in reader.lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Stopped reading the zone file at line {}: {}", index + 1, e);
                break;
            }
        };
        match parse_line(&line) {
            Ok(Some((name, rr_type, rdata, ttl))) => {
                store.add_local(name, rr_type, rdata, ttl);
                accepted += 1;
            }
            Ok(None) => (),
            Err(reason) => {
                warn!("Skipping zone file line {}: {}", index + 1, reason);
            }
        }
    }
    accepted
}

/// Parses a single zone file line. `Ok(None)` means the line is blank
/// or a comment; `Err` carries the reason an invalid line was skipped.
fn parse_line(line: &str) -> Result<Option<(Name, Type, String, Ttl)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
        return Ok(None);
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 3 {
        return Err("expected NAME TYPE RDATA [TTL]".to_owned());
    }

    let name: Name = fields[0]
        .parse()
        .map_err(|e| format!("invalid name {:?}: {}", fields[0], e))?;
    let rr_type: Type = fields[1]
        .parse()
        .map_err(|e| format!("invalid type {:?}: {}", fields[1], e))?;

    // The TTL is the final field, if there is room for one and it is
    // numeric; everything between the type and the TTL is RDATA.
    let (rdata_fields, ttl) = match fields.last().unwrap().parse::<u32>() {
        Ok(ttl) if fields.len() > 3 => (&fields[2..fields.len() - 1], Ttl::from(ttl)),
        _ => (&fields[2..], Ttl::from(DEFAULT_LOCAL_TTL)),
    };
    let rdata_text = rdata_fields.join(" ");

    // Validate the RDATA now so that bad records never enter the
    // store.
    rdata::encode(rr_type, &rdata_text)
        .map_err(|e| format!("invalid {} data {:?}: {}", rr_type, rdata_text, e))?;

    Ok(Some((name, rr_type, rdata_text, ttl)))
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const ZONE_FILE: &str = "\
# Styx site zone data.
gateway.styx.local    A     192.168.1.1
gateway.styx.local    AAAA  fd00::1        3600
; aliases
dns.styx.local        CNAME gateway.styx.local.
node01.styx.local     TXT   role=compute
styx.local            MX    10 mail.styx.local.  600

this is not a valid record line
bad.styx.local        A     not-an-address
bad.styx.local        BOGUS 1.2.3.4
short.styx.local
";

    #[test]
    fn valid_lines_load_and_invalid_lines_are_skipped() {
        let mut store = Store::new();
        let accepted = read_into(&mut store, Cursor::new(ZONE_FILE));
        assert_eq!(accepted, 5);
        assert_eq!(store.local_count(), 5);

        let a = store.lookup_local(&"gateway.styx.local.".parse().unwrap(), Type::A);
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].rdata, "192.168.1.1");
        assert_eq!(a[0].ttl, Ttl::from(DEFAULT_LOCAL_TTL));

        let aaaa = store.lookup_local(&"gateway.styx.local.".parse().unwrap(), Type::AAAA);
        assert_eq!(aaaa[0].ttl, Ttl::from(3600));

        let mx = store.lookup_local(&"styx.local.".parse().unwrap(), Type::MX);
        assert_eq!(mx[0].rdata, "10 mail.styx.local.");
        assert_eq!(mx[0].ttl, Ttl::from(600));
    }

    #[test]
    fn a_wholly_invalid_file_loads_zero_records() {
        let mut store = Store::new();
        let accepted = read_into(&mut store, Cursor::new("garbage\nmore garbage\n"));
        assert_eq!(accepted, 0);
        assert_eq!(store.local_count(), 0);
    }

    #[test]
    fn an_empty_file_is_fine() {
        let mut store = Store::new();
        assert_eq!(read_into(&mut store, Cursor::new("")), 0);
    }
}
