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

//! A blocking FIFO pool of segments.
//!
//! `qcount` (as exposed by [`Pool::qcount`]) is positive while buffers sit
//! idle, negative while `|qcount|` `fetch` calls are parked, and zero when
//! both sides are empty — the single signed counter spec.md's design notes
//! describe. Internally this pool keeps two separate queues (segments and
//! waiters) under one mutex rather than replicate the original's
//! pre-decrement/pre-increment unsigned-wraparound trick; the two are
//! observably identical, and this one doesn't rely on wraparound semantics
//! to be correct.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use thiserror::Error as ThisError;

use crate::chain::Chain;
use crate::segment::Segment;

/// Leaf error for pool-level failures, wrapped by [`crate::Error::pool_exhausted`]
/// the way `orio::new::pool::PoolError` is wrapped by its callers.
#[derive(Debug, ThisError)]
pub enum PoolError {
	#[error("pool mutex poisoned by a panicking thread")]
	Poisoned,
	#[error("fetch_nothing pool can never grow")]
	Nothing,
}

struct Waiter {
	/// Units still owed to this waiter before it can be woken. Decremented
	/// by depositing producers; the waiter that takes it to zero also
	/// removes it from the queue and signals.
	remaining: AtomicUsize,
	condvar: Condvar,
	target: Arc<Mutex<VecDeque<Segment>>>,
}

struct PoolState {
	qcount: isize,
	segments: VecDeque<Segment>,
	waiters: VecDeque<Arc<Waiter>>,
}

impl PoolState {
	fn recompute_qcount(&mut self) {
		self.qcount = if self.waiters.is_empty() {
			self.segments.len() as isize
		} else {
			-(self.waiters.len() as isize)
		};
	}
}

struct PoolInner {
	state: Mutex<PoolState>,
}

/// A cheaply cloned handle to a shared buffer pool.
#[derive(Clone)]
pub struct Pool {
	inner: Arc<PoolInner>,
}

impl Pool {
	pub fn new() -> Self {
		Pool {
			inner: Arc::new(PoolInner {
				state: Mutex::new(PoolState {
					qcount: 0,
					segments: VecDeque::new(),
					waiters: VecDeque::new(),
				}),
			}),
		}
	}

	/// Signed availability counter: positive = idle segments, negative =
	/// `|qcount|` parked waiters, zero = both empty.
	pub fn qcount(&self) -> isize {
		self.inner.state.lock().expect("pool mutex poisoned").qcount
	}

	/// Seed the pool with a freshly allocated segment. Used by callers that
	/// pre-populate a pool before handing it to chains (mirrors
	/// `pool_create` immediately stocking a handful of buffers).
	pub fn stock(&self, seg: Segment) {
		let mut state = self.inner.state.lock().expect("pool mutex poisoned");
		state.segments.push_back(seg);
		state.recompute_qcount();
	}

	/// Block the calling thread until `count` segments have been appended
	/// to `chain`'s segment list. Wakes exactly once, after the last
	/// segment this call still needed has been deposited — never once per
	/// intermediate deposit.
	pub fn fetch(&self, chain: &Chain, count: usize) -> crate::Result<()> {
		let mut state = self.inner.state.lock().map_err(crate::Error::poisoned)?;
		let take = count.min(state.segments.len());
		if take > 0 {
			let drained: Vec<Segment> = state.segments.drain(..take).collect();
			chain.segments_handle().lock().expect("chain segment list poisoned").extend(drained);
		}
		state.recompute_qcount();

		let remaining = count - take;
		if remaining == 0 {
			return Ok(());
		}

		let waiter = Arc::new(Waiter {
			remaining: AtomicUsize::new(remaining),
			condvar: Condvar::new(),
			target: chain.segments_handle(),
		});
		state.waiters.push_back(waiter.clone());
		state.recompute_qcount();

		while waiter.remaining.load(Ordering::Acquire) > 0 {
			state = waiter.condvar.wait(state).map_err(crate::Error::poisoned)?;
		}
		Ok(())
	}

	/// Attempt to move exactly one idle segment onto `chain` without
	/// blocking. Returns `false` if the pool has none on hand. Used by the
	/// RDMA variant, which grows instead of parking.
	pub(crate) fn try_claim(&self, chain: &Chain) -> bool {
		let mut state = self.inner.state.lock().expect("pool mutex poisoned");
		if state.waiters.is_empty() {
			if let Some(seg) = state.segments.pop_front() {
				chain.segments_handle().lock().expect("chain segment list poisoned").push_back(seg);
				state.recompute_qcount();
				return true;
			}
		}
		false
	}

	/// Attempt, without blocking, to seize this pool's idle segments for
	/// shrinkage. On success, every idle segment is discarded outright
	/// (releasing its storage without recycling — recycling here would try
	/// to re-lock this same mutex, since these segments' own release policy
	/// points right back at this pool) and `Some(())` is returned; on
	/// contention, `None`.
	pub(crate) fn try_lock_for_shrink(&self) -> Option<()> {
		let mut state = self.inner.state.try_lock().ok()?;
		for seg in state.segments.drain(..) {
			seg.discard();
		}
		state.recompute_qcount();
		Some(())
	}

	/// Return `seg` to the pool, or hand it straight to the oldest waiting
	/// `fetch` call if one still needs it.
	pub fn recycle_one(&self, seg: Segment) {
		let mut state = self.inner.state.lock().expect("pool mutex poisoned");
		if let Some(waiter) = state.waiters.front().cloned() {
			waiter.target.lock().expect("chain segment list poisoned").push_back(seg);
			if waiter.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
				state.waiters.pop_front();
				waiter.condvar.notify_one();
			}
		} else {
			state.segments.push_back(seg);
		}
		state.recompute_qcount();
	}
}

impl Default for Pool {
	fn default() -> Self { Self::new() }
}

impl Pool {
	/// Drop every idle segment this pool holds. Equivalent to dropping the
	/// pool outright; provided for API parity with `pool_destroy`. Parked
	/// waiters, if any, are left parked — a pool with waiters still attached
	/// is a caller bug, not something this call should silently resolve.
	pub fn destroy(self) {}
}

/// A `fetch` that never succeeds, for chains that must never grow past
/// their initial allocation (mirrors the C `fetch_nothing` stub).
pub fn fetch_nothing() -> crate::Result<()> {
	Err(crate::Error::pool_exhausted(PoolError::Nothing))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chain::{Chain, FetchSource, OpMode};
	use std::thread;
	use std::time::Duration;

	fn chain(fetch: FetchSource) -> Chain {
		Chain::new(64, 64, OpMode::Decode, fetch).unwrap()
	}

	#[test]
	fn fetch_from_stocked_pool_does_not_block() {
		let pool = Pool::new();
        pool.stock(Segment::pooled(64, pool.clone()));
        pool.stock(Segment::pooled(64, pool.clone()));
		let mut c = chain(FetchSource::Nothing);
		pool.fetch(&c, 2).unwrap();
		assert_eq!(c.segment_count(), 2);
		assert_eq!(pool.qcount(), 0);
		let _ = &mut c;
	}

	#[test]
	fn fetch_wakes_exactly_once_after_last_deposit() {
		let pool = Pool::new();
		let mut waiter_chain = chain(FetchSource::Nothing);
		let pool2 = pool.clone();

		let handle = thread::scope(|scope| {
			let h = scope.spawn(|| {
				pool2.fetch(&waiter_chain, 2).unwrap();
				waiter_chain.segment_count()
			});
			thread::sleep(Duration::from_millis(20));
			assert_eq!(pool.qcount(), -1, "one fetch() call is parked");
			pool.recycle_one(Segment::owned(64));
			thread::sleep(Duration::from_millis(20));
			assert_eq!(pool.qcount(), -1, "still waiting on the second segment");
			pool.recycle_one(Segment::owned(64));
			h.join().unwrap()
		});
		assert_eq!(handle, 2);
		assert_eq!(pool.qcount(), 0);
	}
}
