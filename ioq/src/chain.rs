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

//! The segment chain: an ordered sequence of segments with one cursor that
//! hides segment boundaries from the stream operations in [`crate::stream`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::pool::Pool;
use crate::rdma::RdmaPool;
use crate::segment::Segment;
use crate::{Error, Result};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum OpMode {
	Encode,
	Decode,
}

/// How a chain obtains another segment once its current ones are full.
#[derive(Clone)]
pub enum FetchSource {
	/// Allocate a fresh, owned segment of `min_bsize` bytes (the default
	/// when a chain is not pool-backed).
	Allocate,
	/// Fetch from a blocking [`Pool`].
	Pool(Pool),
	/// Fetch (non-blocking, grow-on-demand) from an [`RdmaPool`].
	PoolRdma(RdmaPool),
	/// Never grow; every call fails (mirrors `fetch_nothing`).
	Nothing,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct Cursor {
	pub index: usize,
	pub pos: usize,
}

/// An ordered sequence of segments plus the bookkeeping that lets the
/// stream operations treat it as one continuous byte stream.
pub struct Chain {
	pub(crate) segments: Arc<Mutex<VecDeque<Segment>>>,
	pub(crate) fetch: FetchSource,
	pub(crate) min_bsize: usize,
	pub(crate) max_bsize: usize,
	pub(crate) mode: OpMode,
	pub(crate) pcount: usize,
	pub(crate) plength: usize,
	pub(crate) cursor: Cursor,
	pub id: u64,
}

impl Chain {
	/// Create a new chain. Unless `fetch` is pool-backed, one segment of
	/// `min_bsize` bytes is allocated immediately and the cursor reset to
	/// its head, mirroring `xdr_ioq_create`.
	pub fn new(min_bsize: usize, max_bsize: usize, mode: OpMode, fetch: FetchSource) -> Result<Self> {
		let mut segments = VecDeque::new();
		if !matches!(fetch, FetchSource::Pool(_) | FetchSource::PoolRdma(_)) {
			segments.push_back(Segment::owned_growable(min_bsize));
		}
		let mut chain = Chain {
			segments: Arc::new(Mutex::new(segments)),
			fetch,
			min_bsize,
			max_bsize,
			mode,
			pcount: 0,
			plength: 0,
			cursor: Cursor { index: 0, pos: 0 },
			id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
		};
		if !chain.segments.lock().expect("chain segment list poisoned").is_empty() {
			chain.reset(0)?;
		}
		Ok(chain)
	}

	/// Reset the cursor to the head of the first segment, optionally offset
	/// by `wh_pos` bytes (mirrors `xdr_ioq_reset`). Must be called before
	/// any `getpos`/`setpos`.
	pub fn reset(&mut self, wh_pos: usize) -> Result<()> {
		self.pcount = 0;
		self.plength = 0;
		let mut segs = self.segments.lock().expect("chain segment list poisoned");
		let first = segs.front_mut().ok_or_else(Error::truncated)?;
		if wh_pos >= first.capacity() {
			return Err(Error::out_of_space());
		}
		first.set_head(wh_pos);
		drop(segs);
		self.cursor = Cursor { index: 0, pos: wh_pos };
		Ok(())
	}

	pub(crate) fn segments_handle(&self) -> Arc<Mutex<VecDeque<Segment>>> {
		self.segments.clone()
	}

	/// Release every segment this chain holds. Equivalent to dropping the
	/// chain outright; provided for API parity with `xdr_ioq_destroy`,
	/// which a caller may want to invoke explicitly rather than rely on
	/// scope exit.
	pub fn destroy(self) {}

	pub fn segment_count(&self) -> usize {
		self.segments.lock().expect("chain segment list poisoned").len()
	}

	/// If in ENCODE mode, commit the cursor position as the current
	/// segment's new tail (mirrors `xdr_tail_update`).
	pub(crate) fn commit_tail(&mut self) {
		if self.mode == OpMode::Encode {
			let mut segs = self.segments.lock().expect("chain segment list poisoned");
			let seg = &mut segs[self.cursor.index];
			if self.cursor.pos > seg.tail() {
				seg.set_tail(self.cursor.pos);
			}
		}
	}

	/// Move to the next *existing* segment, committing this one's
	/// plength/pcount contribution regardless of whether one exists.
	/// Returns `false` if there is no next segment (mirrors
	/// `xdr_ioq_uv_advance` returning `NULL`).
	pub(crate) fn step(&mut self) -> bool {
		if self.segments.lock().expect("chain segment list poisoned").is_empty() {
			return false;
		}
		self.commit_tail();
		let segs = self.segments.lock().expect("chain segment list poisoned");
		let len = segs[self.cursor.index].len();
		drop(segs);
		self.plength += len;
		self.pcount += 1;
		let segs = self.segments.lock().expect("chain segment list poisoned");
		if self.cursor.index + 1 < segs.len() {
			self.cursor.index += 1;
			self.cursor.pos = segs[self.cursor.index].head();
			true
		} else {
			false
		}
	}

	/// Obtain one more segment via this chain's `fetch` source and append
	/// it to the end of the segment list (mirrors `xdr_ioq_uv_append`'s
	/// non-REALLOC branches — see DESIGN.md for why the REALLOC in-place
	/// grow workaround was not ported).
	pub(crate) fn grow(&mut self) -> Result<()> {
		match self.fetch.clone() {
			FetchSource::Nothing => crate::pool::fetch_nothing(),
			FetchSource::Allocate => {
				if self.min_bsize > self.max_bsize {
					return Err(Error::out_of_space());
				}
				let seg = Segment::owned_growable(self.min_bsize);
				self.segments.lock().expect("chain segment list poisoned").push_back(seg);
				Ok(())
			}
			FetchSource::Pool(pool) => pool.fetch(self, 1),
			FetchSource::PoolRdma(pool) => pool.fetch(self, 1),
		}
	}

	/// Advance the cursor onto the next segment (existing or freshly
	/// grown), unconditionally — used by `new_buf`.
	pub(crate) fn advance_unconditional(&mut self) -> Result<()> {
		if !self.step() {
			self.grow()?;
			let segs = self.segments.lock().expect("chain segment list poisoned");
			let idx = segs.len() - 1;
			let head = segs[idx].head();
			drop(segs);
			self.cursor.index = idx;
			self.cursor.pos = head;
		}
		Ok(())
	}

	/// Ensure at least `want` more bytes of room exist ahead of the cursor
	/// in ENCODE mode, advancing/growing segments as needed.
	pub(crate) fn ensure_write_room(&mut self, want: usize) -> Result<()> {
		loop {
			let enough = {
				let segs = self.segments.lock().expect("chain segment list poisoned");
				self.cursor.pos + want <= segs[self.cursor.index].wrap()
			};
			if enough {
				return Ok(());
			}
			self.advance_unconditional()?;
		}
	}
}
