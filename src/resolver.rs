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

//! The query-processing pipeline, abstracted from any underlying
//! network I/O.
//!
//! The [`Resolver`] receives, parses, and responds to DNS query
//! datagrams through [`Resolver::handle_datagram`]. The [event
//! loop](crate::engine) is responsible for receiving those datagrams
//! from the network and sending the responses the `Resolver` produces.
//!
//! Each query is answered from the first of three tiers that can:
//!
//! 1. the **local zone** relation of the [`Store`], yielding an
//!    authoritative answer;
//! 2. the **cache** relation, yielding a non-authoritative answer
//!    carrying each entry's remaining TTL; and
//! 3. the **upstream**, whose reply datagram is returned to the client
//!    verbatim, with its answer records parsed out and cached along the
//!    way.

use log::{debug, warn};

use crate::class::Class;
use crate::forward::Upstream;
use crate::message::constants::MAX_UDP_MESSAGE_SIZE;
use crate::message::{writer, Question, Rcode, Reader, Writer};
use crate::rr::{rdata, Ttl, Type};
use crate::store::{Record, Store};

////////////////////////////////////////////////////////////////////////
// THE RESOLVER                                                       //
////////////////////////////////////////////////////////////////////////

/// The three-tier query pipeline. See the [module documentation](self).
pub struct Resolver<U> {
    store: Store,
    upstream: U,
    cache_ttl: Ttl,
    max_cache_entries: Option<usize>,
}

impl<U: Upstream> Resolver<U> {
    /// Creates a new `Resolver` answering from `store` and falling back
    /// to `upstream`. Cached records whose answers carried a zero TTL
    /// are given `cache_ttl` instead.
    pub fn new(store: Store, upstream: U, cache_ttl: Ttl) -> Self {
        Self {
            store,
            upstream,
            cache_ttl,
            max_cache_entries: None,
        }
    }

    /// Sets an advisory upper bound on the cache size. Exceeding it is
    /// reported in the log; nothing is refused.
    pub fn set_max_cache_entries(&mut self, max_cache_entries: Option<usize>) {
        self.max_cache_entries = max_cache_entries;
    }

    /// Returns a reference to the resolver's [`Store`].
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Returns a mutable reference to the resolver's [`Store`]. The
    /// control plane mutates the local zone relation through this.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Handles a received DNS datagram. This is the API through which
    /// the event loop submits queries.
    ///
    /// `received_buf` contains the datagram received, and
    /// `response_buf` is a buffer into which a response may be written.
    /// Synthesized responses are limited to 512 octets (with the TC bit
    /// set if not everything fit); forwarded responses are returned
    /// verbatim at whatever size the upstream produced.
    ///
    /// `Some(len)` means a response of `len` octets has been written
    /// into `response_buf`; `None` means the datagram is dropped with
    /// no reply.
    pub fn handle_datagram(
        &mut self,
        received_buf: &[u8],
        response_buf: &mut [u8],
    ) -> Option<usize> {
        // Datagrams too short to carry a DNS header are dropped
        // silently.
        let mut received = match Reader::try_from(received_buf) {
            Ok(reader) => reader,
            Err(_) => return None,
        };

        // A message that is itself a response, or that carries no
        // question, cannot be answered.
        if received.qr() || received.qdcount() == 0 {
            return self.failure(&received, None, response_buf);
        }

        let question = match received.read_question() {
            Ok(question) => question,
            Err(_) => return self.failure(&received, None, response_buf),
        };
        let rr_type = Type::from(question.qtype);

        // Tier 1: the local zone. A hit here never consults the cache
        // or the upstream.
        let records = self.store.lookup_local(&question.qname, rr_type);
        if !records.is_empty() {
            debug!(
                "{} {} answered from the local zone ({} records)",
                question.qname,
                question.qtype,
                records.len(),
            );
            let records: Vec<_> = records
                .into_iter()
                .map(|record| {
                    let ttl = record.ttl;
                    (record, ttl)
                })
                .collect();
            return self.answer(&received, &question, &records, true, response_buf);
        }

        // Tier 2: the cache, with per-entry remaining TTLs.
        let hits = self.store.lookup_cache(&question.qname, rr_type);
        if !hits.is_empty() {
            debug!(
                "{} {} answered from the cache ({} records)",
                question.qname,
                question.qtype,
                hits.len(),
            );
            return self.answer(&received, &question, &hits, false, response_buf);
        }

        // Tier 3: the upstream. The received bytes are relayed
        // unchanged, so the upstream's reply already carries the
        // client's ID and question and is returned verbatim.
        match self.upstream.forward(received_buf, response_buf) {
            Ok(len) => {
                debug!("{} {} forwarded upstream", question.qname, question.qtype);
                self.cache_upstream_answers(&response_buf[..len]);
                Some(len)
            }
            Err(e) => {
                warn!(
                    "Forwarding {} {} failed: {}",
                    question.qname, question.qtype, e,
                );
                self.failure(&received, Some(&question), response_buf)
            }
        }
    }

    /// Synthesizes an answer from `records`, each paired with the TTL
    /// to put on the wire. Records whose RDATA fails to encode are
    /// skipped; if the response fills up, the TC bit is set and what
    /// fit is sent.
    fn answer(
        &self,
        received: &Reader,
        question: &Question,
        records: &[(Record, Ttl)],
        authoritative: bool,
        response_buf: &mut [u8],
    ) -> Option<usize> {
        let mut response = self.start_response(received, response_buf)?;
        response.set_aa(authoritative);
        response.set_ra(true);
        response.set_rcode(Rcode::NoError);
        if response.add_question(question).is_err() {
            drop(response);
            return self.failure(received, None, response_buf);
        }

        for (record, ttl) in records {
            let rdata = match rdata::encode(record.rr_type, &record.rdata) {
                Ok(rdata) => rdata,
                Err(e) => {
                    warn!(
                        "Skipping {} {} record with bad data {:?}: {}",
                        record.name, record.rr_type, record.rdata, e,
                    );
                    continue;
                }
            };
            match response.add_answer_rr(&record.name, record.rr_type, Class::IN, *ttl, &rdata) {
                Ok(()) => (),
                Err(writer::Error::Truncation) => {
                    response.set_tc(true);
                    break;
                }
                Err(e) => {
                    warn!("Failed to add {} {} record: {}", record.name, record.rr_type, e);
                    break;
                }
            }
        }
        Some(response.finish())
    }

    /// Builds a SERVFAIL response, echoing the question when it was
    /// parseable.
    fn failure(
        &self,
        received: &Reader,
        question: Option<&Question>,
        response_buf: &mut [u8],
    ) -> Option<usize> {
        let mut response = self.start_response(received, response_buf)?;
        response.set_rcode(Rcode::ServFail);
        if let Some(question) = question {
            let _ = response.add_question(question);
        }
        Some(response.finish())
    }

    /// Starts a response, copying the ID, opcode, and RD flag from the
    /// received message and setting QR.
    fn start_response<'b>(
        &self,
        received: &Reader,
        response_buf: &'b mut [u8],
    ) -> Option<Writer<'b>> {
        let mut response = Writer::new(response_buf, MAX_UDP_MESSAGE_SIZE).ok()?;
        response.set_id(received.id());
        response.set_qr(true);
        response.set_opcode(received.opcode());
        response.set_rd(received.rd());
        Some(response)
    }

    /// Parses an upstream reply and inserts its answer records into the
    /// cache. This is best-effort: a reply that cannot be fully parsed
    /// contributes whatever records were read before the trouble, and
    /// records of types without a presentation form are passed over.
    fn cache_upstream_answers(&mut self, message: &[u8]) {
        let mut reader = match Reader::try_from(message) {
            Ok(reader) => reader,
            Err(_) => return,
        };
        if reader.rcode() != Rcode::NoError {
            return;
        }

        for _ in 0..reader.qdcount() {
            if reader.read_question().is_err() {
                return;
            }
        }
        for _ in 0..reader.ancount() {
            let rr = match reader.read_rr() {
                Ok(rr) => rr,
                Err(_) => return,
            };
            if rr.class != Class::IN {
                continue;
            }
            let rdata = match rr.rdata {
                Some(rdata) => rdata,
                None => continue,
            };
            let ttl = if u32::from(rr.ttl) == 0 {
                self.cache_ttl
            } else {
                rr.ttl
            };
            self.store.cache_record(rr.owner, rr.rr_type, rdata, ttl);
        }

        if let Some(max) = self.max_cache_entries {
            let count = self.store.cache_count();
            if count > max {
                debug!("Cache holds {} entries, over the advisory limit of {}.", count, max);
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////
