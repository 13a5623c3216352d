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

//! Conversion of record data between presentation and wire form.
//!
//! Records are stored with their RDATA in presentation form (an address
//! literal, a target name, a raw TXT string) and re-encoded each time a
//! response is synthesized. [`encode`] performs that conversion.
//! [`decode`] goes the other way and is used when answers received from
//! an upstream resolver are taken apart for caching.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::Type;
use crate::name::{self, Name};

/// The maximum length of a single TXT `<character-string>`.
const MAX_CHARACTER_STRING_LEN: usize = 255;

////////////////////////////////////////////////////////////////////////
// PRESENTATION → WIRE                                                //
////////////////////////////////////////////////////////////////////////

/// Encodes the presentation-form RDATA `text` into the wire form for
/// `rr_type`.
///
/// The supported conversions are:
///
/// * A — an IPv4 address literal, encoded as 4 octets;
/// * AAAA — an [RFC 4291] IPv6 address literal (including `::`
///   shorthand), encoded as 16 octets;
/// * CNAME, NS, PTR — a domain name, encoded uncompressed;
/// * MX — `<preference> <exchange>`, encoded as a 16-bit preference
///   followed by the exchange name; and
/// * TXT — a raw string, encoded as a single length-prefixed
///   `<character-string>`.
///
/// Anything else fails with [`EncodeError::UnsupportedType`]; such
/// records are never synthesized locally.
///
/// [RFC 4291]: https://datatracker.ietf.org/doc/html/rfc4291
pub fn encode(rr_type: Type, text: &str) -> Result<Vec<u8>, EncodeError> {
    match rr_type {
        Type::A => {
            let address: Ipv4Addr = text.parse().or(Err(EncodeError::InvalidIpv4))?;
            Ok(address.octets().to_vec())
        }
        Type::AAAA => {
            let address: Ipv6Addr = text.parse().or(Err(EncodeError::InvalidIpv6))?;
            Ok(address.octets().to_vec())
        }
        Type::CNAME | Type::NS | Type::PTR => {
            let name: Name = text.parse()?;
            Ok(name.wire_repr().to_vec())
        }
        Type::MX => {
            let (preference, exchange) =
                text.split_once(char::is_whitespace).ok_or(EncodeError::InvalidMx)?;
            let preference: u16 = preference.trim().parse().or(Err(EncodeError::InvalidMx))?;
            let exchange: Name = exchange.trim().parse()?;
            let mut octets = preference.to_be_bytes().to_vec();
            octets.extend_from_slice(exchange.wire_repr());
            Ok(octets)
        }
        Type::TXT => {
            if text.len() > MAX_CHARACTER_STRING_LEN {
                return Err(EncodeError::TxtTooLong);
            }
            let mut octets = Vec::with_capacity(text.len() + 1);
            octets.push(text.len() as u8);
            octets.extend_from_slice(text.as_bytes());
            Ok(octets)
        }
        _ => Err(EncodeError::UnsupportedType),
    }
}

////////////////////////////////////////////////////////////////////////
// WIRE → PRESENTATION                                                //
////////////////////////////////////////////////////////////////////////

/// Decodes the RDATA of the given type at `message[start..start +
/// rdlength]` back into presentation form.
///
/// The whole `message` is passed (rather than just the RDATA octets)
/// because domain names inside RDATA received from an upstream may be
/// compressed against earlier parts of the message. Types without a
/// presentation-form conversion yield `None`; callers skip such
/// records.
pub fn decode(rr_type: Type, message: &[u8], start: usize, rdlength: usize) -> Option<String> {
    let rdata = message.get(start..start + rdlength)?;
    match rr_type {
        Type::A => {
            let octets: [u8; 4] = rdata.try_into().ok()?;
            Some(Ipv4Addr::from(octets).to_string())
        }
        Type::AAAA => {
            let octets: [u8; 16] = rdata.try_into().ok()?;
            Some(Ipv6Addr::from(octets).to_string())
        }
        Type::CNAME | Type::NS | Type::PTR => {
            let (name, _) = Name::try_from_compressed(message, start).ok()?;
            Some(name.to_string())
        }
        Type::MX => {
            let preference = u16::from_be_bytes(rdata.get(0..2)?.try_into().unwrap());
            let (exchange, _) = Name::try_from_compressed(message, start + 2).ok()?;
            Some(format!("{preference} {exchange}"))
        }
        Type::TXT => {
            // Only a single full-length <character-string> converts
            // cleanly back to the stored form.
            let len = *rdata.first()? as usize;
            if len + 1 != rdlength {
                return None;
            }
            String::from_utf8(rdata[1..].to_vec()).ok()
        }
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error signaling that presentation-form RDATA could not be encoded
/// into wire form.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EncodeError {
    InvalidIpv4,
    InvalidIpv6,
    InvalidName(name::Error),
    InvalidMx,
    TxtTooLong,
    UnsupportedType,
}

impl From<name::Error> for EncodeError {
    fn from(err: name::Error) -> Self {
        Self::InvalidName(err)
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::InvalidIpv4 => f.write_str("invalid IPv4 address"),
            Self::InvalidIpv6 => f.write_str("invalid IPv6 address"),
            Self::InvalidName(err) => write!(f, "invalid domain name: {err}"),
            Self::InvalidMx => f.write_str("MX data is not <preference> <exchange>"),
            Self::TxtTooLong => f.write_str("TXT data exceeds 255 octets"),
            Self::UnsupportedType => f.write_str("no presentation-form encoding for this type"),
        }
    }
}

impl std::error::Error for EncodeError {}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_records_encode_to_four_octets() {
        assert_eq!(
            encode(Type::A, "192.168.1.1").unwrap(),
            vec![192, 168, 1, 1],
        );
        assert_eq!(encode(Type::A, "256.0.0.1"), Err(EncodeError::InvalidIpv4));
        assert_eq!(encode(Type::A, "fd00::1"), Err(EncodeError::InvalidIpv4));
    }

    #[test]
    fn aaaa_records_encode_to_sixteen_octets() {
        let mut expected = vec![0xfd, 0x00];
        expected.resize(15, 0);
        expected.push(1);
        assert_eq!(encode(Type::AAAA, "fd00::1").unwrap(), expected);
        assert_eq!(
            encode(Type::AAAA, "not-an-address"),
            Err(EncodeError::InvalidIpv6),
        );
    }

    #[test]
    fn cname_records_encode_to_a_wire_form_name() {
        assert_eq!(
            encode(Type::CNAME, "gateway.styx.local.").unwrap(),
            b"\x07gateway\x04styx\x05local\x00".to_vec(),
        );
    }

    #[test]
    fn txt_records_encode_to_a_character_string() {
        let octets = encode(Type::TXT, "role=compute").unwrap();
        assert_eq!(octets[0], 12);
        assert_eq!(&octets[1..], b"role=compute");
        assert_eq!(
            encode(Type::TXT, &"x".repeat(256)),
            Err(EncodeError::TxtTooLong),
        );
    }

    #[test]
    fn mx_records_encode_preference_and_exchange() {
        let octets = encode(Type::MX, "10 mail.styx.local.").unwrap();
        assert_eq!(&octets[0..2], &[0, 10]);
        assert_eq!(&octets[2..], b"\x04mail\x04styx\x05local\x00");
        assert_eq!(encode(Type::MX, "mail.styx.local."), Err(EncodeError::InvalidMx));
    }

    #[test]
    fn soa_records_are_not_synthesized() {
        assert_eq!(
            encode(Type::SOA, "ns1. admin. 1 2 3 4 5"),
            Err(EncodeError::UnsupportedType),
        );
    }

    #[test]
    fn known_types_round_trip_through_the_wire_form() {
        for (rr_type, text) in [
            (Type::A, "10.0.0.5"),
            (Type::AAAA, "fd00::1:2"),
            (Type::CNAME, "gateway.styx.local."),
            (Type::NS, "ns1.styx.local."),
            (Type::PTR, "host.styx.local."),
            (Type::MX, "10 mail.styx.local."),
            (Type::TXT, "role=compute"),
        ] {
            let octets = encode(rr_type, text).unwrap();
            let decoded = decode(rr_type, &octets, 0, octets.len()).unwrap();
            assert_eq!(decoded, text, "{rr_type} did not round-trip");
        }
    }

    #[test]
    fn decode_skips_types_without_a_presentation_form() {
        assert_eq!(decode(Type::from(48), &[0; 10], 0, 10), None);
    }
}
