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

//! Vector-entry descriptors produced by `fill_bufs`/`alloc_hdrs`.

/// What a [`VioEntry`] stands in for within a scatter/gather layout.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum VioType {
	/// Caller-reserved space ahead of the data, written by the caller
	/// after layout (record-mark, RPC header, ...).
	Header,
	/// A run of payload bytes taken directly from the chain.
	Data,
	/// A fixed-width trailer-length field, written immediately as a
	/// big-endian `u32` by `alloc_hdrs` itself.
	TrailerLen,
	/// Caller-reserved trailer space, written by the caller after layout.
	Trailer,
}

/// A `base/head/tail/wrap` window into some segment's storage, tagged with
/// its role in the layout. Unlike [`crate::segment::Segment`], a `VioEntry`
/// carries no reference count: it borrows a range inside a segment that
/// the chain itself keeps alive, and it never outlives one layout call.
#[derive(Copy, Clone, Debug)]
pub struct VioEntry {
	pub vio_type: VioType,
	pub base: usize,
	pub head: usize,
	pub tail: usize,
	pub wrap: usize,
}

impl VioEntry {
	pub fn len(&self) -> usize { self.tail - self.head }
	pub fn is_empty(&self) -> bool { self.tail == self.head }
}
