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

//! Implementation of the [`Opcode`] type.

use std::fmt;

/// The OPCODE field of a DNS message header.
///
/// [RFC 1035 § 4.1.1] defines a four-bit field describing the kind of
/// query a message carries. The resolver only ever processes
/// [`QUERY`](Opcode::QUERY), but the field is carried through so that
/// responses echo the opcode of the request. All four-bit values are
/// representable; this is a wrapper around [`u8`] holding the low four
/// bits.
///
/// [RFC 1035 § 4.1.1]: https://datatracker.ietf.org/doc/html/rfc1035#section-4.1.1
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Opcode(u8);

impl Opcode {
    pub const QUERY: Self = Self(0);
    pub const IQUERY: Self = Self(1);
    pub const STATUS: Self = Self(2);
    pub const NOTIFY: Self = Self(4);
    pub const UPDATE: Self = Self(5);
}

impl From<u8> for Opcode {
    fn from(value: u8) -> Self {
        Self(value & 0x0f)
    }
}

impl From<Opcode> for u8 {
    fn from(opcode: Opcode) -> Self {
        opcode.0
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Self::QUERY => f.write_str("QUERY"),
            Self::IQUERY => f.write_str("IQUERY"),
            Self::STATUS => f.write_str("STATUS"),
            Self::NOTIFY => f.write_str("NOTIFY"),
            Self::UPDATE => f.write_str("UPDATE"),
            Self(value) => write!(f, "OPCODE{value}"),
        }
    }
}

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self}")
    }
}
