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

//! Implementation of data structures related to domain names.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use arrayvec::ArrayVec;

/// The maximum length of the uncompressed on-the-wire representation of
/// a domain name, including the terminating null label.
const MAX_WIRE_LEN: usize = 255;

/// The maximum length of a label in a domain name (not including the
/// octet that provides the length).
const MAX_LABEL_LEN: usize = 63;

////////////////////////////////////////////////////////////////////////
// NAME STRUCTURE                                                     //
////////////////////////////////////////////////////////////////////////

/// A structure to represent a domain name.
///
/// A `Name` stores the uncompressed on-the-wire representation of a
/// domain name defined in [RFC 1035 § 3.1]: a sequence of
/// length-prefixed labels terminated by the null label. The buffer is
/// inline and fixed-size, since the wire representation is at most 255
/// octets long.
///
/// `Name`s can be constructed in two ways:
///
/// * through the [`FromStr`] implementation, which parses the
///   dot-separated presentation form; and
/// * from (possibly compressed) on-the-wire names through
///   [`Name::try_from_compressed`].
///
/// The original casing of the name is preserved, but comparison and
/// hashing are ASCII-case-insensitive, as [RFC 1035 § 2.3.3] requires.
/// A `Name` may therefore be used directly as a case-insensitive map
/// key.
///
/// [RFC 1035 § 2.3.3]: https://datatracker.ietf.org/doc/html/rfc1035#section-2.3.3
/// [RFC 1035 § 3.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-3.1
#[derive(Clone)]
pub struct Name {
    wire: ArrayVec<u8, MAX_WIRE_LEN>,
}

impl Name {
    /// Returns the root name `.`.
    pub fn root() -> Self {
        let mut wire = ArrayVec::new();
        wire.push(0);
        Self { wire }
    }

    /// Returns whether the `Name` is the DNS root `.`.
    pub fn is_root(&self) -> bool {
        self.wire.len() == 1
    }

    /// Returns the uncompressed on-the-wire representation of the name.
    pub fn wire_repr(&self) -> &[u8] {
        &self.wire
    }

    /// Returns an iterator over the labels of the name, not including
    /// the terminating null label.
    pub fn labels(&self) -> Labels {
        Labels { rest: &self.wire }
    }

    /// Returns whether this `Name` is equal to or a subdomain of
    /// `other`. Comparison is ASCII-case-insensitive.
    pub fn eq_or_subdomain_of(&self, other: &Name) -> bool {
        let skip = match self.wire.len().checked_sub(other.wire.len()) {
            Some(skip) => skip,
            None => return false,
        };

        // A suffix of a valid wire-form name is itself a valid
        // wire-form name only if it starts on a label boundary, so we
        // walk the labels rather than comparing raw suffixes.
        let mut offset = 0;
        loop {
            if offset == skip {
                return self.wire[offset..].eq_ignore_ascii_case(&other.wire);
            } else if offset > skip {
                return false;
            }
            offset += self.wire[offset] as usize + 1;
        }
    }

    /// Reads a `Name` from the on-the-wire form starting at offset
    /// `start` of `octets`, following compression pointers if present.
    ///
    /// On success, the parsed name is returned along with the number of
    /// octets the name occupies at `start` (that is, up to and
    /// including the null label or the first compression pointer).
    ///
    /// Compression pointers must reference strictly earlier offsets;
    /// this, together with the 255-octet bound on the assembled name,
    /// guarantees that parsing terminates.
    pub fn try_from_compressed(octets: &[u8], start: usize) -> Result<(Self, usize), Error> {
        let mut wire = ArrayVec::new();
        let mut pos = start;
        let mut consumed = None;

        loop {
            let len = *octets.get(pos).ok_or(Error::UnexpectedEom)? as usize;
            if len & 0xc0 == 0xc0 {
                let second = *octets.get(pos + 1).ok_or(Error::UnexpectedEom)? as usize;
                let target = ((len & 0x3f) << 8) | second;
                if target >= pos {
                    return Err(Error::BadPointer);
                }
                if consumed.is_none() {
                    consumed = Some(pos + 2 - start);
                }
                pos = target;
            } else if len & 0xc0 != 0 {
                // The 0x40 and 0x80 label types were never standardized.
                return Err(Error::BadLabelType);
            } else if len == 0 {
                wire.try_push(0).map_err(|_| Error::NameTooLong)?;
                let consumed = consumed.unwrap_or(pos + 1 - start);
                return Ok((Self { wire }, consumed));
            } else {
                let label = octets
                    .get(pos + 1..pos + 1 + len)
                    .ok_or(Error::UnexpectedEom)?;
                wire.try_push(len as u8).map_err(|_| Error::NameTooLong)?;
                wire.try_extend_from_slice(label)
                    .map_err(|_| Error::NameTooLong)?;
                pos += len + 1;
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// LABEL ITERATION                                                    //
////////////////////////////////////////////////////////////////////////

/// An iterator over the labels of a [`Name`], as returned by
/// [`Name::labels`]. The terminating null label is not included.
pub struct Labels<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for Labels<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let len = *self.rest.first()? as usize;
        if len == 0 {
            return None;
        }
        let label = &self.rest[1..1 + len];
        self.rest = &self.rest[1 + len..];
        Some(label)
    }
}

////////////////////////////////////////////////////////////////////////
// PARSING AND DISPLAY OF THE PRESENTATION FORM                       //
////////////////////////////////////////////////////////////////////////

impl FromStr for Name {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self, Error> {
        if text.is_empty() {
            return Err(Error::EmptyName);
        } else if text == "." {
            return Ok(Self::root());
        }

        let mut wire = ArrayVec::new();
        let relative = text.strip_suffix('.').unwrap_or(text);
        for label in relative.split('.') {
            if label.is_empty() {
                return Err(Error::EmptyLabel);
            } else if label.len() > MAX_LABEL_LEN {
                return Err(Error::LabelTooLong);
            }
            wire.try_push(label.len() as u8)
                .map_err(|_| Error::NameTooLong)?;
            wire.try_extend_from_slice(label.as_bytes())
                .map_err(|_| Error::NameTooLong)?;
        }
        wire.try_push(0).map_err(|_| Error::NameTooLong)?;
        Ok(Self { wire })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_root() {
            return f.write_str(".");
        }
        for label in self.labels() {
            for &octet in label {
                // Non-printing and special octets use the \DDD escape
                // of RFC 1035 § 5.1.
                if octet.is_ascii_graphic() && octet != b'.' && octet != b'\\' {
                    write!(f, "{}", octet as char)?;
                } else {
                    write!(f, "\\{octet:03}")?;
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}

////////////////////////////////////////////////////////////////////////
// CASE-INSENSITIVE COMPARISON AND HASHING                            //
////////////////////////////////////////////////////////////////////////

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.wire.eq_ignore_ascii_case(&other.wire)
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for &octet in &self.wire {
            state.write_u8(octet.to_ascii_lowercase());
        }
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered while parsing a domain name.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    EmptyName,
    EmptyLabel,
    LabelTooLong,
    NameTooLong,
    UnexpectedEom,
    BadPointer,
    BadLabelType,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::EmptyName => f.write_str("empty domain name"),
            Self::EmptyLabel => f.write_str("empty label"),
            Self::LabelTooLong => f.write_str("label exceeds 63 octets"),
            Self::NameTooLong => f.write_str("name exceeds 255 octets"),
            Self::UnexpectedEom => f.write_str("unexpected end of message in name"),
            Self::BadPointer => f.write_str("compression pointer does not point backwards"),
            Self::BadLabelType => f.write_str("unknown label type"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_str_builds_the_wire_repr() {
        let name: Name = "gateway.styx.local.".parse().unwrap();
        assert_eq!(name.wire_repr(), b"\x07gateway\x04styx\x05local\x00");
    }

    #[test]
    fn from_str_accepts_names_without_the_trailing_dot() {
        let with: Name = "host.example.".parse().unwrap();
        let without: Name = "host.example".parse().unwrap();
        assert_eq!(with, without);
    }

    #[test]
    fn from_str_parses_the_root() {
        let root: Name = ".".parse().unwrap();
        assert!(root.is_root());
        assert_eq!(root.wire_repr(), b"\x00");
    }

    #[test]
    fn from_str_rejects_invalid_names() {
        assert_eq!("".parse::<Name>(), Err(Error::EmptyName));
        assert_eq!("a..b.".parse::<Name>(), Err(Error::EmptyLabel));
        let long_label = format!("{}.example.", "x".repeat(64));
        assert_eq!(long_label.parse::<Name>(), Err(Error::LabelTooLong));
        let long_name = ["a"; 130].join(".");
        assert_eq!(long_name.parse::<Name>(), Err(Error::NameTooLong));
    }

    #[test]
    fn comparison_is_case_insensitive() {
        let lower: Name = "gateway.styx.local.".parse().unwrap();
        let upper: Name = "GATEWAY.STYX.LOCAL.".parse().unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn display_preserves_the_stored_casing() {
        let name: Name = "Gateway.Styx.Local.".parse().unwrap();
        assert_eq!(name.to_string(), "Gateway.Styx.Local.");
    }

    #[test]
    fn eq_or_subdomain_of_works() {
        let apex: Name = "styx.local.".parse().unwrap();
        let host: Name = "gateway.STYX.local.".parse().unwrap();
        let other: Name = "gateway.example.".parse().unwrap();
        assert!(host.eq_or_subdomain_of(&apex));
        assert!(apex.eq_or_subdomain_of(&apex));
        assert!(!other.eq_or_subdomain_of(&apex));
        assert!(!apex.eq_or_subdomain_of(&host));
    }

    #[test]
    fn try_from_compressed_reads_an_uncompressed_name() {
        let message = b"\x03www\x07example\x03com\x00";
        let (name, consumed) = Name::try_from_compressed(message, 0).unwrap();
        assert_eq!(name, "www.example.com.".parse().unwrap());
        assert_eq!(consumed, message.len());
    }

    #[test]
    fn try_from_compressed_follows_pointers() {
        // "example.com." at offset 0, then "www" + pointer to 0 at
        // offset 13.
        let message = b"\x07example\x03com\x00\x03www\xc0\x00";
        let (name, consumed) = Name::try_from_compressed(message, 13).unwrap();
        assert_eq!(name, "www.example.com.".parse().unwrap());
        assert_eq!(consumed, 6);
    }

    #[test]
    fn try_from_compressed_rejects_forward_pointers() {
        let message = b"\x03www\xc0\x06\x00\x07example\x00";
        assert_eq!(
            Name::try_from_compressed(message, 0),
            Err(Error::BadPointer),
        );
    }

    #[test]
    fn try_from_compressed_rejects_self_pointers() {
        let message = b"\xc0\x00";
        assert_eq!(
            Name::try_from_compressed(message, 0),
            Err(Error::BadPointer),
        );
    }

    #[test]
    fn try_from_compressed_rejects_truncated_names() {
        let message = b"\x07exam";
        assert_eq!(
            Name::try_from_compressed(message, 0),
            Err(Error::UnexpectedEom),
        );
    }

    #[test]
    fn try_from_compressed_bounds_the_assembled_name() {
        // Each hop adds 62 octets of label to the name; enough hops
        // overflow the 255-octet bound even though every pointer goes
        // strictly backwards.
        let mut message = Vec::new();
        let mut prev_start = 0;
        for i in 0..5 {
            let start = message.len();
            message.push(61);
            message.extend_from_slice(&[b'a'; 61]);
            if i == 0 {
                message.push(0);
            } else {
                message.push(0xc0);
                message.push(prev_start as u8);
            }
            prev_start = start;
        }
        assert_eq!(
            Name::try_from_compressed(&message, prev_start),
            Err(Error::NameTooLong),
        );
    }
}
