// Copyright 2023 Strixpyrr
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! ## How it works
//!
//! A logical byte stream is a [`Chain`] of fixed-capacity [`Segment`]s. An
//! encoder appends bytes by walking forward through the chain, growing it
//! (allocating a segment outright, or fetching one from a [`Pool`]) when the
//! current segment runs out of room; a decoder walks the same chain
//! consuming bytes. [`Chain`]'s stream operations — [`Chain::get_unit`],
//! [`Chain::put_unit`], [`Chain::get_bytes`], [`Chain::put_bytes`],
//! [`Chain::getpos`]/[`Chain::setpos`], and the scatter/gather pair
//! [`Chain::fill_bufs`]/[`Chain::alloc_hdrs`] — hide the seams between
//! segments so that XDR primitives read and write as though the chain were
//! one contiguous buffer.
//!
//! ### Segments and pools
//!
//! A [`Segment`] is a `base <= head <= tail <= wrap` window into a shared
//! backing buffer, reference-counted, with one of four disjoint
//! [`ReleasePolicy`]s deciding what happens when its last reference drops:
//! run a callback, release a borrowed parent, free owned storage, or
//! recycle to the [`Pool`] it was fetched from. A `Pool` is a blocking FIFO:
//! `fetch` parks the calling thread until enough segments have been
//! deposited by other threads' `recycle` calls, waking exactly once per
//! waiter, after its last requested segment arrives — never once per
//! intermediate deposit.
//!
//! ### The RDMA variant
//!
//! [`rdma::RdmaPool`] trades blocking for grow-on-demand: instead of parking
//! a waiter, it asks its owning [`rdma::RdmaTransport`] for another chunk of
//! registered memory. Segments fetched from an `RdmaPool` carry a reference
//! to the [`rdma::ChunkMeta`] of the chunk backing them; idle chunks are
//! periodically shrunk out from under the transport once unreferenced and
//! past an idle threshold.
//!
//! ### Netconfig
//!
//! [`netconfig`] is an unrelated collaborator: a session-based reader for
//! the `/etc/netconfig`-format transport database, included at the
//! boundary this crate shares with the rest of an RPC stack.

mod chain;
mod error;
pub mod netconfig;
mod pool;
pub mod rdma;
mod segment;
mod stream;
mod vio;

pub use chain::{Chain, FetchSource, OpMode};
pub use error::{Error, ErrorKind, Result};
pub use pool::{fetch_nothing, Pool, PoolError};
pub use segment::{ReleasePolicy, Segment, SegmentShared};
pub use vio::{VioEntry, VioType};
