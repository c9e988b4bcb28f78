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

//! Two waiters of different sizes parked on the same empty pool must be
//! served strictly in arrival order, and each must wake only once its own
//! count has been fully deposited.

use ioq::{Chain, FetchSource, OpMode, Pool, Segment};
use std::thread;
use std::time::Duration;

fn waiting_chain(fetch: FetchSource) -> Chain {
	Chain::new(64, 64, OpMode::Decode, fetch).unwrap()
}

#[test]
fn two_waiters_are_served_in_arrival_order() {
	let pool = Pool::new();
	let mut chain_a = waiting_chain(FetchSource::Nothing);
	let mut chain_b = waiting_chain(FetchSource::Nothing);

	thread::scope(|scope| {
		let pool_a = pool.clone();
		let a = scope.spawn(move || {
			pool_a.fetch(&chain_a, 2).unwrap();
			chain_a
		});

		// Give A a chance to park before B arrives, so arrival order is
		// unambiguous.
		thread::sleep(Duration::from_millis(20));
		assert_eq!(pool.qcount(), -1, "A is parked, wanting 2");

		let pool_b = pool.clone();
		let b = scope.spawn(move || {
			pool_b.fetch(&chain_b, 1).unwrap();
			chain_b
		});

		thread::sleep(Duration::from_millis(20));
		assert_eq!(pool.qcount(), -2, "A and B are both parked");

		// Producer recycles three segments in order: s1, s2, s3.
		pool.recycle_one(Segment::owned(64));
		thread::sleep(Duration::from_millis(20));
		assert_eq!(pool.qcount(), -2, "A still owed one more, B untouched");

		pool.recycle_one(Segment::owned(64));
		thread::sleep(Duration::from_millis(20));
		assert_eq!(pool.qcount(), -1, "A woke after s2, B still parked");

		pool.recycle_one(Segment::owned(64));

		chain_a = a.join().unwrap();
		chain_b = b.join().unwrap();

		assert_eq!(chain_a.segment_count(), 2, "A's chain received s1 then s2");
		assert_eq!(chain_b.segment_count(), 1, "B's chain received s3");
	});

	assert_eq!(pool.qcount(), 0);
}
