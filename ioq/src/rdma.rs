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

//! The RDMA pool variant: non-blocking, grow-on-demand segment pools
//! backed by registered-memory "chunks", with an idle-shrink sweep.
//!
//! Actual memory registration and RDMA verbs are out of scope (see
//! spec.md's Non-goals); a chunk's `grower` closure stands in for "ask the
//! owning transport for another chunk of this kind", the way a real
//! transport would call into its registered-memory allocator.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::chain::Chain;
use crate::pool::Pool;
use crate::segment::Segment;
use crate::Result;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PoolKind {
	InboundHeader,
	InboundData,
	OutboundHeader,
	OutboundData,
	ControlBlock,
}

impl PoolKind {
	/// Only data chunks, and never the transport's first (always-resident)
	/// chunk, are candidates for idle shrink (mirrors `is_shrink_buf`).
	fn is_shrinkable_kind(self) -> bool {
		matches!(self, PoolKind::InboundData | PoolKind::OutboundData)
	}
}

/// A registered-memory chunk backing some number of segments. `refs` counts
/// segments currently fetched out of this chunk; it idle-shrinks only once
/// that count is zero.
pub struct ChunkMeta {
	kind: PoolKind,
	is_initial: bool,
	refs: AtomicU32,
	ready: AtomicBool,
	pool: Pool,
}

impl ChunkMeta {
	pub(crate) fn unref(&self) {
		self.refs.fetch_sub(1, Ordering::AcqRel);
	}

	fn is_shrinkable(&self) -> bool {
		!self.is_initial
			&& self.kind.is_shrinkable_kind()
			&& self.ready.load(Ordering::Acquire)
			&& self.refs.load(Ordering::Acquire) == 0
	}
}

struct TransportState {
	chunks: Mutex<Vec<Arc<ChunkMeta>>>,
	total_extra_allocations: AtomicU32,
	last_extra_alloc: Mutex<Option<Instant>>,
	idle_threshold: Duration,
}

/// Owns the chunk list shared by every [`RdmaPool`] of one transport
/// connection (mirrors `RDMAXPRT::io_bufs`/`first_io_buf`).
#[derive(Clone)]
pub struct RdmaTransport {
	state: Arc<TransportState>,
}

impl RdmaTransport {
	pub fn new() -> Self {
		Self::with_idle_threshold(Duration::from_secs(60))
	}

	pub fn with_idle_threshold(idle_threshold: Duration) -> Self {
		RdmaTransport {
			state: Arc::new(TransportState {
				chunks: Mutex::new(Vec::new()),
				total_extra_allocations: AtomicU32::new(0),
				last_extra_alloc: Mutex::new(None),
				idle_threshold,
			}),
		}
	}

	fn note_extra_allocation(&self) {
		self.state.total_extra_allocations.fetch_add(1, Ordering::Relaxed);
		*self.state.last_extra_alloc.lock().expect("rdma transport mutex poisoned") = Some(Instant::now());
	}

	/// Sweep the chunk list for one idle, shrinkable, zero-refcount chunk
	/// and deregister it. `try_lock`-and-skip, deliberately without retry,
	/// so a busy pool is never blocked on for a best-effort cleanup pass.
	pub fn maybe_shrink(&self) {
		let idle_for = match *self.state.last_extra_alloc.lock().expect("rdma transport mutex poisoned") {
			Some(t) => t.elapsed(),
			None => return,
		};
		if idle_for < self.state.idle_threshold {
			return;
		}
		let mut chunks = self.state.chunks.lock().expect("rdma transport mutex poisoned");
		let victim = chunks.iter().position(|c| c.is_shrinkable());
		let Some(victim) = victim else { return };
		let chunk = chunks[victim].clone();
		match chunk.pool.try_lock_for_shrink() {
			Some(_guard) => {
				chunks.remove(victim);
			}
			None => {
				// someone else holds this pool's mutex; skip this round
			}
		}
	}
}

impl Default for RdmaTransport {
	fn default() -> Self { Self::new() }
}

/// A non-blocking, grow-on-demand pool for one [`PoolKind`] of one
/// transport. `fetch` never parks: it claims what is already available and
/// otherwise asks `grower` for a brand-new chunk.
#[derive(Clone)]
pub struct RdmaPool {
	pool: Pool,
	transport: RdmaTransport,
	kind: PoolKind,
	segment_size: usize,
	grower: Arc<dyn Fn() -> Result<()> + Send + Sync>,
}

impl RdmaPool {
	pub fn new(
		transport: RdmaTransport,
		kind: PoolKind,
		segment_size: usize,
		is_initial: bool,
	) -> Self {
		let pool = Pool::new();
		let chunk = Arc::new(ChunkMeta {
			kind,
			is_initial,
			refs: AtomicU32::new(0),
			ready: AtomicBool::new(true),
			pool: pool.clone(),
		});
		transport.state.chunks.lock().expect("rdma transport mutex poisoned").push(chunk.clone());
		let pool_for_grower = pool.clone();
		let chunk_for_grower = chunk.clone();
		let size = segment_size;
		RdmaPool {
			pool,
			transport,
			kind,
			segment_size,
			grower: Arc::new(move || {
				let mut seg = Segment::pooled(size, pool_for_grower.clone());
				seg.rdma_meta = Some(chunk_for_grower.clone());
				pool_for_grower.stock(seg);
				Ok(())
			}),
		}
	}

	pub fn kind(&self) -> PoolKind { self.kind }

	/// Claim `count` segments for `chain`, growing a new chunk on demand
	/// instead of ever blocking.
	pub fn fetch(&self, chain: &Chain, count: usize) -> Result<()> {
		for _ in 0..count {
			if !self.pool.try_claim(chain) {
				(self.grower)()?;
				self.transport.note_extra_allocation();
				let grown = self.pool.try_claim(chain);
				debug_assert!(grown, "grower must stock at least one segment");
			}
			if let Some(seg) = chain.segments_handle().lock().expect("chain segment list poisoned").back() {
				if let Some(meta) = &seg.rdma_meta {
					meta.refs.fetch_add(1, Ordering::AcqRel);
				}
			}
		}
		self.transport.maybe_shrink();
		Ok(())
	}

	pub fn segment_size(&self) -> usize { self.segment_size }
}

impl Chain {
	/// Read `dst.len()` bytes that may have been scattered directly into
	/// RDMA write-target segments following the header segment, without
	/// disturbing the cursor's position in the header stream.
	///
	/// If the segment under the cursor already holds enough bytes, this is
	/// exactly `get_bytes`. Otherwise the cursor is snapshotted, advanced
	/// past the header segment into the segments the RDMA-write landed the
	/// data in, read from there (possibly spanning several of them, same as
	/// an ordinary `get_bytes`), and then restored verbatim — including
	/// `pcount`/`plength` — so the caller's next read continues in the
	/// header stream exactly where it left off.
	pub fn get_bytes_rdma(&mut self, dst: &mut [u8]) -> Result<()> {
		let remaining_here = {
			let segs = self.segments.lock().expect("chain segment list poisoned");
			let seg = segs.get(self.cursor.index).ok_or_else(crate::Error::truncated)?;
			seg.tail().saturating_sub(self.cursor.pos)
		};
		if remaining_here >= dst.len() {
			return self.get_bytes(dst);
		}

		let saved_cursor = self.cursor;
		let saved_pcount = self.pcount;
		let saved_plength = self.plength;

		if !self.step() {
			self.cursor = saved_cursor;
			return Err(crate::Error::truncated());
		}

		let result = self.get_bytes(dst);

		self.cursor = saved_cursor;
		self.pcount = saved_pcount;
		self.plength = saved_plength;

		result
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chain::{Chain, FetchSource, OpMode};

	#[test]
	fn fetch_grows_a_fresh_chunk_when_empty() {
		let transport = RdmaTransport::new();
		let rdma_pool = RdmaPool::new(transport, PoolKind::InboundData, 64, false);
		let mut c = Chain::new(64, 64, OpMode::Decode, FetchSource::PoolRdma(rdma_pool)).unwrap();
		c.new_buf().unwrap();
		assert!(c.segment_count() >= 1);
	}

	#[test]
	fn get_bytes_rdma_restores_header_cursor() {
		let mut c = Chain::new(4, 4, OpMode::Decode, FetchSource::Allocate).unwrap();
		c.new_buf().unwrap();
		{
			let mut segs = c.segments.lock().unwrap();
			segs[0].set_tail(2);
			segs[1].set_tail(4);
		}
		c.cursor = crate::chain::Cursor { index: 0, pos: 0 };
		let mut dst = [0u8; 4];
		c.get_bytes_rdma(&mut dst).unwrap();
		// Cursor is back in the header segment, at its original offset,
		// even though the bytes were read out of the segment after it.
		assert_eq!(c.cursor.index, 0);
		assert_eq!(c.cursor.pos, 0);
	}

	#[test]
	fn shrink_does_not_deadlock_on_idle_segments() {
		let transport = RdmaTransport::with_idle_threshold(std::time::Duration::from_millis(0));
		let rdma_pool = RdmaPool::new(transport.clone(), PoolKind::InboundData, 64, false);
		{
			let c = Chain::new(64, 64, OpMode::Decode, FetchSource::PoolRdma(rdma_pool.clone())).unwrap();
			rdma_pool.fetch(&c, 1).unwrap();
			// `c` drops here, recycling its one segment back to the pool as
			// idle — exactly the state that used to deadlock the shrink
			// sweep below (recycle re-entering the pool mutex it was
			// dropped under).
		}
		transport.maybe_shrink();
	}
}
