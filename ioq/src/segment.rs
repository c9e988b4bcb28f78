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

//! Fixed-capacity byte regions and their release lifecycle.
//!
//! A [`Segment`] is a `base ≤ head ≤ tail ≤ wrap` window over a shared,
//! mutex-guarded byte buffer, plus a reference count and a [`ReleasePolicy`]
//! that says what happens when that count reaches zero. The four release
//! policies are mutually exclusive by construction (a sum type), rather than
//! the flag-precedence dance the original C union required.

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::pool::Pool;

/// What happens to a segment when its last reference is dropped.
#[derive(Clone)]
pub enum ReleasePolicy {
	/// Run an arbitrary callback; used for externally-supplied buffers
	/// (e.g. a caller's GSS-wrap output) that this crate does not own.
	Callback(Arc<dyn Fn() + Send + Sync>),
	/// Decrement another segment's reference count; used for segments that
	/// alias another segment's bytes rather than owning storage of their
	/// own. The aliased segment must itself resolve to `Owned` or
	/// `Callback` — aliasing a pool-owned segment is a construction error,
	/// since there would be no concrete segment left to recycle.
	Borrowed(Arc<SegmentShared>),
	/// Drop the backing storage; ordinary heap-allocated segment.
	Owned,
	/// Hand the segment back to the pool it was fetched from.
	Pooled(Pool),
}

impl fmt::Debug for ReleasePolicy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			ReleasePolicy::Callback(_) => "Callback",
			ReleasePolicy::Borrowed(_) => "Borrowed",
			ReleasePolicy::Owned => "Owned",
			ReleasePolicy::Pooled(_) => "Pooled",
		};
		f.write_str(name)
	}
}

/// The reference-counted control block behind a segment, split out from the
/// segment's own bounds/storage so that a [`ReleasePolicy::Borrowed`] parent
/// can be addressed without needing the parent's concrete bytes.
#[derive(Debug)]
pub struct SegmentShared {
	references: AtomicUsize,
	policy: ReleasePolicy,
}

fn release_shared(shared: &Arc<SegmentShared>) {
	if shared.references.fetch_sub(1, Ordering::AcqRel) != 1 {
		return;
	}
	match &shared.policy {
		ReleasePolicy::Callback(cb) => cb(),
		ReleasePolicy::Borrowed(parent) => release_shared(parent),
		ReleasePolicy::Owned => {}
		ReleasePolicy::Pooled(_) => {
			unreachable!("a Borrowed segment must not alias a pool-owned parent")
		}
	}
}

/// A fixed-capacity byte region: `base <= head <= tail <= wrap`, all byte
/// offsets into a shared backing buffer.
pub struct Segment {
	base: usize,
	head: usize,
	tail: usize,
	wrap: usize,
	/// Whether this segment's storage may be grown in place rather than
	/// superseded by a freshly appended segment. Unused by this port: see
	/// DESIGN.md's note on the dropped `REALLOC` in-place-grow workaround.
	growable: bool,
	storage: Arc<Mutex<Box<[u8]>>>,
	shared: Arc<SegmentShared>,
	/// Parent chunk for RDMA-registered storage, if any. Bumped on fetch,
	/// decremented on release, ahead of normal policy dispatch.
	pub(crate) rdma_meta: Option<Arc<crate::rdma::ChunkMeta>>,
	released: bool,
}

impl Segment {
	fn raw(size: usize, policy: ReleasePolicy, growable: bool) -> Self {
		Segment {
			base: 0,
			head: 0,
			tail: 0,
			wrap: size,
			growable,
			storage: Arc::new(Mutex::new(vec![0u8; size].into_boxed_slice())),
			shared: Arc::new(SegmentShared { references: AtomicUsize::new(1), policy }),
			rdma_meta: None,
			released: false,
		}
	}

	/// Allocate a freshly owned segment of `size` bytes. Released by
	/// dropping its storage.
	pub fn owned(size: usize) -> Self {
		Self::raw(size, ReleasePolicy::Owned, false)
	}

	/// Allocate an owned segment that participates in the chain's
	/// in-place-growable bookkeeping (see `growable` above).
	pub fn owned_growable(size: usize) -> Self {
		Self::raw(size, ReleasePolicy::Owned, true)
	}

	/// Allocate a segment that runs `cb` once its last reference drops.
	pub fn with_callback(size: usize, cb: Arc<dyn Fn() + Send + Sync>) -> Self {
		Self::raw(size, ReleasePolicy::Callback(cb), false)
	}

	/// Construct a segment straight from pooled storage, tagged to recycle
	/// back into `pool` on release.
	pub(crate) fn pooled(size: usize, pool: Pool) -> Self {
		Self::raw(size, ReleasePolicy::Pooled(pool), false)
	}

	/// Create a new segment that aliases this segment's bytes over
	/// `range`, incrementing this segment's reference count. The parent
	/// must resolve to `Owned` or `Callback` (see [`ReleasePolicy::Borrowed`]).
	pub fn share(&self, range: Range<usize>) -> Self {
		debug_assert!(
			!matches!(self.shared.policy, ReleasePolicy::Pooled(_)),
			"cannot alias a pool-owned segment"
		);
		self.shared.references.fetch_add(1, Ordering::AcqRel);
		Segment {
			base: range.start,
			head: range.start,
			tail: range.start,
			wrap: range.end,
			growable: false,
			storage: self.storage.clone(),
			shared: Arc::new(SegmentShared {
				references: AtomicUsize::new(1),
				policy: ReleasePolicy::Borrowed(self.shared.clone()),
			}),
			rdma_meta: self.rdma_meta.clone(),
			released: false,
		}
	}

	pub fn base(&self) -> usize { self.base }
	pub fn head(&self) -> usize { self.head }
	pub fn tail(&self) -> usize { self.tail }
	pub fn wrap(&self) -> usize { self.wrap }
	pub fn set_head(&mut self, head: usize) { self.head = head; }
	pub fn set_tail(&mut self, tail: usize) { self.tail = tail; }
	pub fn is_growable(&self) -> bool { self.growable }
	pub fn len(&self) -> usize { self.tail - self.head }
	pub fn is_empty(&self) -> bool { self.tail == self.head }
	pub fn capacity(&self) -> usize { self.wrap - self.base }

	pub(crate) fn storage(&self) -> Arc<Mutex<Box<[u8]>>> { self.storage.clone() }

	pub(crate) fn read_at(&self, offset: usize, buf: &mut [u8]) {
		let guard = self.storage.lock().expect("segment storage poisoned");
		buf.copy_from_slice(&guard[offset..offset + buf.len()]);
	}

	pub(crate) fn write_at(&self, offset: usize, bytes: &[u8]) {
		let mut guard = self.storage.lock().expect("segment storage poisoned");
		guard[offset..offset + bytes.len()].copy_from_slice(bytes);
	}

	/// Release this segment's storage without dispatching its release
	/// policy. Used only when a pool is tearing down its own idle segments
	/// (RDMA LRU shrink): those segments' policy is `Pooled` against the
	/// very pool being dismantled, so recycling them would re-enter that
	/// pool's already-held mutex.
	pub(crate) fn discard(mut self) {
		self.released = true;
	}

	/// Grow this segment's backing storage to `new_size`, preserving the
	/// bytes currently in `[head, tail)`. Only valid on growable, singly
	/// referenced segments.
	#[allow(dead_code)]
	pub(crate) fn grow_in_place(&mut self, new_size: usize) {
		debug_assert!(self.growable);
		let len = self.tail - self.head;
		let mut guard = self.storage.lock().expect("segment storage poisoned");
		let mut next = vec![0u8; new_size].into_boxed_slice();
		next[..len].copy_from_slice(&guard[self.head..self.tail]);
		*guard = next;
		drop(guard);
		self.base = 0;
		self.head = 0;
		self.tail = len;
		self.wrap = new_size;
	}
}

impl Drop for Segment {
	fn drop(&mut self) {
		if self.released {
			return;
		}
		self.released = true;
		// Decrement the chunk's in-use count first, but keep the handle: a
		// pool-recycled segment still belongs to the same chunk and must
		// re-attribute itself on its next fetch.
		if let Some(meta) = &self.rdma_meta {
			meta.unref();
		}
		if self.shared.references.fetch_sub(1, Ordering::AcqRel) != 1 {
			return;
		}
		match self.shared.policy.clone() {
			ReleasePolicy::Callback(cb) => cb(),
			ReleasePolicy::Borrowed(parent) => release_shared(&parent),
			ReleasePolicy::Owned => {}
			ReleasePolicy::Pooled(pool) => {
				self.shared.references.store(1, Ordering::Release);
				let seg = Segment {
					base: self.base,
					head: self.base,
					tail: self.base,
					wrap: self.wrap,
					growable: self.growable,
					storage: self.storage.clone(),
					shared: self.shared.clone(),
					rdma_meta: self.rdma_meta.take(),
					released: false,
				};
				pool.recycle_one(seg);
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::sync::atomic::AtomicUsize as StdAtomicUsize;

	#[test]
	fn owned_segment_drops_storage_on_release() {
		let seg = Segment::owned(16);
		assert_eq!(seg.capacity(), 16);
		drop(seg);
	}

	#[test]
	fn callback_runs_exactly_once_on_last_release() {
		let count = Arc::new(StdAtomicUsize::new(0));
		let count2 = count.clone();
		let seg = Segment::with_callback(8, Arc::new(move || {
			count2.fetch_add(1, Ordering::SeqCst);
		}));
		let alias = seg.share(0..8);
		drop(alias);
		assert_eq!(count.load(Ordering::SeqCst), 0, "parent still has a reference");
		drop(seg);
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn shared_bytes_are_visible_across_aliases() {
		let seg = Segment::owned(8);
		seg.write_at(0, b"hello!!!");
		let alias = seg.share(0..8);
		let mut buf = [0u8; 8];
		alias.read_at(0, &mut buf);
		assert_eq!(&buf, b"hello!!!");
	}
}
