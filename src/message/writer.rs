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

//! Implementation of the [`Writer`] type to write on-the-wire DNS
//! messages.

use std::fmt;

use super::constants::*;
use super::{Opcode, Question, Rcode};
use crate::class::Class;
use crate::name::Name;
use crate::rr::{Ttl, Type};

////////////////////////////////////////////////////////////////////////
// WRITER                                                             //
////////////////////////////////////////////////////////////////////////

/// A "frame" around a buffer that serializes a DNS message into it.
///
/// A `Writer` is constructed using [`Writer::new`] (to set an initial
/// message size limit different from the underlying buffer size) or
/// with its [`TryFrom`] implementation (which sets the message size
/// limit equal to the buffer length). The underlying buffer and initial
/// message size limit must be long enough to accommodate a full DNS
/// message header of 12 octets. The message header is initially zeroed.
///
/// Since header information is in a fixed position, it can be written
/// at any time through the appropriate `Writer` methods. Questions and
/// answer resource records are written sequentially into the buffer
/// based on a cursor, through [`Writer::add_question`] and
/// [`Writer::add_answer_rr`]. Each of these methods is atomic: if the
/// data does not fit within the message size limit, the method fails
/// with [`Error::Truncation`] and the buffer cursor is rolled back, so
/// the caller may set the TC bit and send what was already written.
///
/// Domain names are always written uncompressed. Compression on output
/// is optional for interoperability, and the records the resolver
/// synthesizes are small.
pub struct Writer<'a> {
    octets: &'a mut [u8],
    cursor: usize,
    limit: usize,
    qdcount: u16,
    ancount: u16,
}

impl<'a> Writer<'a> {
    /// Creates a new `Writer` from the underlying buffer `octets`. The
    /// message size is initially limited to `limit` or `octets.len()`
    /// (whichever is smaller). If the smaller limit is too small to
    /// hold a full DNS message header of 12 octets, then this will
    /// fail.
    pub fn new(octets: &'a mut [u8], limit: usize) -> Result<Self> {
        let limit = limit.min(octets.len());
        if limit < HEADER_SIZE {
            Err(Error::Truncation)
        } else {
            octets[0..HEADER_SIZE].fill(0);
            Ok(Self {
                octets,
                cursor: HEADER_SIZE,
                limit,
                qdcount: 0,
                ancount: 0,
            })
        }
    }

    /// Sets the 16-bit ID of the message.
    pub fn set_id(&mut self, id: u16) {
        self.write_u16(ID_START, id);
    }

    /// Sets or clears the QR (query response) bit.
    pub fn set_qr(&mut self, qr: bool) {
        self.set_flag(QR_BYTE, QR_MASK, qr);
    }

    /// Sets the message's opcode.
    pub fn set_opcode(&mut self, opcode: Opcode) {
        self.octets[OPCODE_BYTE] &= !OPCODE_MASK;
        self.octets[OPCODE_BYTE] |= u8::from(opcode) << OPCODE_SHIFT;
    }

    /// Sets or clears the AA (authoritative answer) bit.
    pub fn set_aa(&mut self, aa: bool) {
        self.set_flag(AA_BYTE, AA_MASK, aa);
    }

    /// Sets or clears the TC (truncation) bit.
    pub fn set_tc(&mut self, tc: bool) {
        self.set_flag(TC_BYTE, TC_MASK, tc);
    }

    /// Sets or clears the RD (recursion desired) bit.
    pub fn set_rd(&mut self, rd: bool) {
        self.set_flag(RD_BYTE, RD_MASK, rd);
    }

    /// Sets or clears the RA (recursion available) bit.
    pub fn set_ra(&mut self, ra: bool) {
        self.set_flag(RA_BYTE, RA_MASK, ra);
    }

    /// Sets the message's RCODE.
    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.octets[RCODE_BYTE] &= !RCODE_MASK;
        self.octets[RCODE_BYTE] |= u8::from(rcode);
    }

    /// Returns the current number of answer RRs in the message.
    pub fn ancount(&self) -> u16 {
        self.ancount
    }

    /// Adds a question to the message. This must be used before any
    /// resource records are added.
    pub fn add_question(&mut self, question: &Question) -> Result<()> {
        if let Some(new_qdcount) = self.qdcount.checked_add(1) {
            self.with_rollback(|this| {
                this.try_push(question.qname.wire_repr())?;
                this.try_push_u16(question.qtype.into())?;
                this.try_push_u16(question.qclass.into())
            })?;
            self.qdcount = new_qdcount;
            Ok(())
        } else {
            Err(Error::CountOverflow)
        }
    }

    /// Adds a resource record to the answer section of the message.
    /// `rdata` must already be in wire form (see
    /// [`rdata::encode`](crate::rr::rdata::encode)).
    pub fn add_answer_rr(
        &mut self,
        owner: &Name,
        rr_type: Type,
        class: Class,
        ttl: Ttl,
        rdata: &[u8],
    ) -> Result<()> {
        if rdata.len() > u16::MAX as usize {
            return Err(Error::RdataTooLong);
        }
        if let Some(new_ancount) = self.ancount.checked_add(1) {
            self.with_rollback(|this| {
                this.try_push(owner.wire_repr())?;
                this.try_push_u16(rr_type.into())?;
                this.try_push_u16(class.into())?;
                this.try_push_u32(ttl.into())?;
                this.try_push_u16(rdata.len() as u16)?;
                this.try_push(rdata)
            })?;
            self.ancount = new_ancount;
            Ok(())
        } else {
            Err(Error::CountOverflow)
        }
    }

    /// Finishes writing the message. The section counts are written
    /// into the header, and the final length of the message is
    /// returned.
    pub fn finish(mut self) -> usize {
        self.write_u16(QDCOUNT_START, self.qdcount);
        self.write_u16(ANCOUNT_START, self.ancount);
        self.write_u16(NSCOUNT_START, 0);
        self.write_u16(ARCOUNT_START, 0);
        self.cursor
    }

    /// Executes `f(self)`, rolling the cursor back to its current value
    /// first if the result is an error.
    fn with_rollback<F>(&mut self, f: F) -> Result<()>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        let saved_cursor = self.cursor;
        let result = f(self);
        if result.is_err() {
            self.cursor = saved_cursor;
        }
        result
    }

    /// Sets or clears the flag bit given by `byte` and `mask`.
    fn set_flag(&mut self, byte: usize, mask: u8, value: bool) {
        if value {
            self.octets[byte] |= mask;
        } else {
            self.octets[byte] &= !mask;
        }
    }

    /// Tries to write `data` to the underlying buffer at the current
    /// cursor, failing if there is not sufficient space.
    fn try_push(&mut self, data: &[u8]) -> Result<()> {
        if self.limit - self.cursor >= data.len() {
            self.octets[self.cursor..self.cursor + data.len()].copy_from_slice(data);
            self.cursor += data.len();
            Ok(())
        } else {
            Err(Error::Truncation)
        }
    }

    /// Tries to write `data` in network byte order to the underlying
    /// buffer, failing if there is not sufficient space.
    fn try_push_u16(&mut self, data: u16) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Tries to write `data` in network byte order to the underlying
    /// buffer, failing if there is not sufficient space.
    fn try_push_u32(&mut self, data: u32) -> Result<()> {
        self.try_push(&data.to_be_bytes())
    }

    /// Writes `data` in network byte order to the underlying buffer at
    /// `position`. Note that this performs no bounds checking.
    fn write_u16(&mut self, position: usize, data: u16) {
        self.octets[position..position + 2].copy_from_slice(&data.to_be_bytes());
    }
}

impl<'a> TryFrom<&'a mut [u8]> for Writer<'a> {
    type Error = Error;

    fn try_from(octets: &'a mut [u8]) -> Result<Self> {
        Self::new(octets, octets.len())
    }
}

impl fmt::Debug for Writer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Writer")
            .field("cursor", &self.cursor)
            .field("limit", &self.limit)
            .field("qdcount", &self.qdcount)
            .field("ancount", &self.ancount)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error encountered while writing a DNS message.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Error {
    Truncation,
    CountOverflow,
    RdataTooLong,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Truncation => f.write_str("message would exceed the size limit"),
            Self::CountOverflow => f.write_str("section count would overflow"),
            Self::RdataTooLong => f.write_str("RDATA exceeds 65,535 octets"),
        }
    }
}

impl std::error::Error for Error {}

/// The type returned by fallible [`Writer`] methods.
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::super::{Qclass, Qtype, Reader};
    use super::*;

    fn question() -> Question {
        Question {
            qname: "gateway.styx.local.".parse().unwrap(),
            qtype: Qtype::from(Type::A),
            qclass: Qclass::from(Class::IN),
        }
    }

    #[test]
    fn written_messages_read_back() {
        let mut buf = [0; MAX_UDP_MESSAGE_SIZE];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.set_id(0x1234);
        writer.set_qr(true);
        writer.set_aa(true);
        writer.set_ra(true);
        writer.set_rcode(Rcode::NoError);
        let question = question();
        writer.add_question(&question).unwrap();
        writer
            .add_answer_rr(
                &question.qname,
                Type::A,
                Class::IN,
                Ttl::from(300),
                &[192, 168, 1, 1],
            )
            .unwrap();
        let len = writer.finish();

        let mut reader = Reader::try_from(&buf[..len]).unwrap();
        assert_eq!(reader.id(), 0x1234);
        assert!(reader.qr());
        assert!(reader.aa());
        assert!(reader.ra());
        assert_eq!(reader.rcode(), Rcode::NoError);
        assert_eq!(reader.qdcount(), 1);
        assert_eq!(reader.ancount(), 1);
        assert_eq!(reader.read_question().unwrap(), question);
        let rr = reader.read_rr().unwrap();
        assert_eq!(rr.owner, question.qname);
        assert_eq!(rr.ttl, Ttl::from(300));
        assert_eq!(rr.rdata.as_deref(), Some("192.168.1.1"));
        assert!(reader.at_eom());
    }

    #[test]
    fn writer_rejects_buffers_shorter_than_the_header() {
        let mut buf = [0; HEADER_SIZE - 1];
        assert!(Writer::try_from(buf.as_mut_slice()).is_err());
    }

    #[test]
    fn adds_roll_back_on_truncation() {
        let question = question();

        // Room for the header and question, but not for any answer.
        let mut buf = [0; HEADER_SIZE + 25];
        let mut writer = Writer::try_from(buf.as_mut_slice()).unwrap();
        writer.add_question(&question).unwrap();
        let before = format!("{writer:?}");
        assert_eq!(
            writer.add_answer_rr(
                &question.qname,
                Type::A,
                Class::IN,
                Ttl::from(300),
                &[192, 168, 1, 1],
            ),
            Err(Error::Truncation),
        );
        assert_eq!(format!("{writer:?}"), before);

        // The message so far is still valid and can be finished.
        writer.set_tc(true);
        let len = writer.finish();
        let reader = Reader::try_from(&buf[..len]).unwrap();
        assert!(reader.tc());
        assert_eq!(reader.qdcount(), 1);
        assert_eq!(reader.ancount(), 0);
    }

    #[test]
    fn the_message_size_limit_is_respected() {
        let mut buf = [0; 1024];
        let mut writer = Writer::new(buf.as_mut_slice(), MAX_UDP_MESSAGE_SIZE).unwrap();
        let question = question();
        writer.add_question(&question).unwrap();
        let mut added = 0;
        loop {
            let result = writer.add_answer_rr(
                &question.qname,
                Type::TXT,
                Class::IN,
                Ttl::from(60),
                &[100; 101],
            );
            match result {
                Ok(()) => added += 1,
                Err(Error::Truncation) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert!(added > 0);
        let len = writer.finish();
        assert!(len <= MAX_UDP_MESSAGE_SIZE);
    }
}
