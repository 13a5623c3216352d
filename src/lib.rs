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

//! The `charon` caching, forwarding DNS resolver.
//!
//! Charon answers UDP DNS queries from three tiers, in order: an
//! authoritative local zone store, a TTL-bounded cache of previously
//! forwarded answers, and a pair of upstream public resolvers. It is
//! administered at runtime through a line-oriented Unix control socket.
//!
//! The crate is organized as follows:
//!
//! * [`message`] and [`name`] implement the DNS wire format;
//! * [`rr`] provides RR types and presentation-form RDATA encoding;
//! * [`store`] holds the local zone and cache relations;
//! * [`zone_file`] loads the flat zone file format into the store;
//! * [`forward`] relays query datagrams upstream with failover;
//! * [`control`] interprets administrative commands; and
//! * [`resolver`] and [`engine`] tie everything together into the
//!   query-processing pipeline and its event loop.

pub mod class;
pub mod control;
pub mod engine;
pub mod forward;
pub mod message;
pub mod name;
pub mod resolver;
pub mod rr;
pub mod store;
pub mod zone_file;
