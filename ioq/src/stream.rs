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

//! The nine stream operations a [`Chain`] exposes to an XDR codec: unit and
//! byte-run get/put, position get/set, forced segment advance, and the
//! scatter/gather layout pair used to splice caller-reserved header/trailer
//! space around payload data without copying it.

use crate::chain::Chain;
use crate::vio::{VioEntry, VioType};
use crate::{Error, Result};

impl Chain {
	/// Read one big-endian 32-bit unit, advancing across segment
	/// boundaries. Fails with `AlignmentViolation` if the cursor sits
	/// mid-segment with fewer than 4 bytes left (data that was never a
	/// whole unit), or `Truncated` if there is no further segment.
	pub fn get_unit(&mut self) -> Result<u32> {
		loop {
			let (enough, at_tail) = {
				let segs = self.segments.lock().expect("chain segment list poisoned");
				let seg = segs.get(self.cursor.index).ok_or_else(Error::truncated)?;
				(self.cursor.pos + 4 <= seg.tail(), self.cursor.pos == seg.tail())
			};
			if enough {
				let mut buf = [0u8; 4];
				let seg_storage = {
					let segs = self.segments.lock().expect("chain segment list poisoned");
					segs[self.cursor.index].storage()
				};
				{
					let guard = seg_storage.lock().expect("segment storage poisoned");
					buf.copy_from_slice(&guard[self.cursor.pos..self.cursor.pos + 4]);
				}
				self.cursor.pos += 4;
				return Ok(u32::from_be_bytes(buf));
			}
			if !at_tail {
				return Err(Error::alignment_violation());
			}
			if !self.step() {
				return Err(Error::truncated());
			}
		}
	}

	/// Write one big-endian 32-bit unit, growing the chain (bounded by
	/// `max_bsize`) if the current segment has no room left.
	pub fn put_unit(&mut self, v: u32) -> Result<()> {
		self.ensure_write_room(4)?;
		let seg_storage = {
			let segs = self.segments.lock().expect("chain segment list poisoned");
			segs[self.cursor.index].storage()
		};
		{
			let mut guard = seg_storage.lock().expect("segment storage poisoned");
			guard[self.cursor.pos..self.cursor.pos + 4].copy_from_slice(&v.to_be_bytes());
		}
		self.cursor.pos += 4;
		Ok(())
	}

	/// Fill `dst` entirely from the chain, advancing across as many
	/// segments as needed. Fails with `Truncated` if the chain runs out.
	pub fn get_bytes(&mut self, dst: &mut [u8]) -> Result<()> {
		let mut written = 0;
		while written < dst.len() {
			let (remaining, storage, start) = {
				let segs = self.segments.lock().expect("chain segment list poisoned");
				let seg = segs.get(self.cursor.index).ok_or_else(Error::truncated)?;
				(seg.tail().saturating_sub(self.cursor.pos), seg.storage(), self.cursor.pos)
			};
			if remaining == 0 {
				if !self.step() {
					return Err(Error::truncated());
				}
				continue;
			}
			let take = remaining.min(dst.len() - written);
			{
				let guard = storage.lock().expect("segment storage poisoned");
				dst[written..written + take].copy_from_slice(&guard[start..start + take]);
			}
			self.cursor.pos += take;
			written += take;
		}
		Ok(())
	}

	/// Write all of `src` into the chain, growing as needed.
	pub fn put_bytes(&mut self, src: &[u8]) -> Result<()> {
		let mut consumed = 0;
		while consumed < src.len() {
			let avail = {
				let segs = self.segments.lock().expect("chain segment list poisoned");
				segs[self.cursor.index].wrap() - self.cursor.pos
			};
			if avail == 0 {
				self.advance_unconditional()?;
				continue;
			}
			let take = avail.min(src.len() - consumed);
			let storage = {
				let segs = self.segments.lock().expect("chain segment list poisoned");
				segs[self.cursor.index].storage()
			};
			{
				let mut guard = storage.lock().expect("segment storage poisoned");
				guard[self.cursor.pos..self.cursor.pos + take]
					.copy_from_slice(&src[consumed..consumed + take]);
			}
			self.cursor.pos += take;
			consumed += take;
		}
		Ok(())
	}

	/// Logical stream position: bytes fully traversed plus the cursor's
	/// offset within the current segment. Commits the ENCODE tail first.
	pub fn getpos(&mut self) -> usize {
		self.commit_tail();
		let segs = self.segments.lock().expect("chain segment list poisoned");
		self.plength + (self.cursor.pos - segs[self.cursor.index].head())
	}

	/// Seek to logical byte offset `pos`. The last segment gets a special
	/// case: landing exactly at its tail when no successor exists is still
	/// legal (the next write extends it), but landing at a tail that *does*
	/// have a successor forces positioning into that successor instead, so
	/// the unused `[tail, wrap)` gap is never addressed directly.
	pub fn setpos(&mut self, mut pos: usize) -> Result<()> {
		self.commit_tail();
		self.pcount = 0;
		self.plength = 0;
		let segs = self.segments.lock().expect("chain segment list poisoned");
		for (i, seg) in segs.iter().enumerate() {
			let len = seg.len();
			let full = seg.wrap() - seg.head();
			let is_last = i + 1 == segs.len();
			if pos < len || (is_last && pos <= full) {
				self.cursor.index = i;
				self.cursor.pos = seg.head() + pos;
				return Ok(());
			}
			pos -= len;
			self.pcount += 1;
			self.plength += len;
		}
		Err(Error::truncated())
	}

	/// Unconditionally move to the next segment, appending a fresh one if
	/// none exists yet.
	pub fn new_buf(&mut self) -> Result<()> {
		self.advance_unconditional()
	}

	/// Count how many segments a `[start, start+datalen)` byte range spans.
	/// Returns `Err(Truncated)` if the chain does not hold that much data
	/// (mirrors `xdr_ioq_iovcount` returning `-1`).
	pub fn iov_count(&mut self, mut start: usize, mut datalen: usize) -> Result<usize> {
		self.commit_tail();
		let segs = self.segments.lock().expect("chain segment list poisoned");
		let mut buffers: isize = -1;
		for seg in segs.iter() {
			let len = seg.len();
			if buffers > 0 {
				buffers += 1;
			} else if start < len {
				buffers = 1;
			} else {
				start -= len;
				continue;
			}
			let buflen = len - start;
			if buflen >= datalen {
				datalen = 0;
				break;
			}
			datalen -= buflen;
			start = 0;
		}
		if datalen != 0 {
			return Err(Error::truncated());
		}
		Ok(buffers.max(0) as usize)
	}

	/// Describe the `[start, start+datalen)` byte range as a sequence of
	/// `VIO_DATA` descriptors, one per segment it touches. The first and
	/// last descriptors are trimmed to the requested range.
	pub fn fill_bufs(&mut self, mut start: usize, mut datalen: usize) -> Result<Vec<VioEntry>> {
		self.commit_tail();
		let segs = self.segments.lock().expect("chain segment list poisoned");
		let mut found = false;
		let mut out = Vec::new();
		for seg in segs.iter() {
			let mut len = seg.len();
			if !found {
				if start < len {
					found = true;
				} else {
					start -= len;
					continue;
				}
			}
			let mut entry = VioEntry {
				vio_type: VioType::Data,
				base: seg.base(),
				head: seg.head(),
				tail: seg.tail(),
				wrap: seg.wrap(),
			};
			if start > 0 {
				len -= start;
				entry.head += start;
				start = 0;
			}
			if datalen < len {
				entry.tail = entry.head + datalen;
				out.push(entry);
				datalen = 0;
				break;
			} else if datalen == len {
				out.push(entry);
				datalen = 0;
				break;
			}
			datalen -= len;
			out.push(entry);
		}
		if datalen != 0 {
			return Err(Error::truncated());
		}
		Ok(out)
	}

	/// Splice caller-reserved `Header`/`TrailerLen`/`Trailer` entries into
	/// the segment layout around the data described by `vector`, following
	/// the `use existing suffix, else insert a new segment` policy. A
	/// `TrailerLen` entry is written immediately, big-endian, with the
	/// following `Trailer` entry's length. On success, the cursor is left
	/// at the end of the whole layout.
	pub fn alloc_hdrs(&mut self, start: usize, vector: &mut [VioEntry]) -> Result<()> {
		self.commit_tail();
		let mut totlen = start;
		let mut remaining = start;
		let mut seg_idx = None;
		{
			let segs = self.segments.lock().expect("chain segment list poisoned");
			for (i, seg) in segs.iter().enumerate() {
				let len = seg.len();
				if remaining < len {
					seg_idx = Some(i);
					break;
				}
				remaining -= len;
				if remaining == 0 {
					seg_idx = Some(i);
					break;
				}
			}
		}
		let mut idx = seg_idx.ok_or_else(Error::layout_error)?;
		let mut vi = 0;

		if vector.first().map(|v| v.vio_type) == Some(VioType::Header) {
			if remaining != 0 {
				return Err(Error::layout_error());
			}
			idx = self.use_or_allocate(idx, &mut vector[0])?;
			totlen += vector[0].len();
			vi += 1;
		}

		if remaining == 0 {
			let segs = self.segments.lock().expect("chain segment list poisoned");
			if idx + 1 < segs.len() {
				idx += 1;
			}
		}

		while vi < vector.len() && vector[vi].vio_type == VioType::Data {
			totlen += vector[vi].len();
			let segs = self.segments.lock().expect("chain segment list poisoned");
			if idx + 1 < segs.len() {
				idx += 1;
			}
			vi += 1;
		}

		while vi < vector.len() {
			let vt = vector[vi].vio_type;
			if vt != VioType::Trailer && vt != VioType::TrailerLen {
				return Err(Error::layout_error());
			}
			if vt == VioType::TrailerLen
				&& (vi + 1 == vector.len() || vector[vi + 1].vio_type != VioType::Trailer)
			{
				return Err(Error::layout_error());
			}
			idx = self.use_or_allocate(idx, &mut vector[vi])?;
			if vt == VioType::TrailerLen {
				let trailer_len = vector[vi + 1].len() as u32;
				let storage = {
					let segs = self.segments.lock().expect("chain segment list poisoned");
					segs[idx].storage()
				};
				let mut guard = storage.lock().expect("segment storage poisoned");
				guard[vector[vi].head..vector[vi].head + 4]
					.copy_from_slice(&trailer_len.to_be_bytes());
			}
			totlen += vector[vi].len();
			vi += 1;
		}

		self.setpos(totlen)
	}

	/// Fit `entry` (a header/trailer reservation) into the suffix of the
	/// segment at `idx` if it has room, else allocate and insert a fresh
	/// segment right after it. Returns the index of the segment that ended
	/// up holding `entry`.
	fn use_or_allocate(&mut self, idx: usize, entry: &mut VioEntry) -> Result<usize> {
		let htlen = entry.len();
		let (more, tail, base, wrap) = {
			let segs = self.segments.lock().expect("chain segment list poisoned");
			let seg = &segs[idx];
			(seg.wrap() - seg.tail(), seg.tail(), seg.base(), seg.wrap())
		};

		if more >= htlen {
			entry.base = base;
			entry.head = tail;
			entry.tail = tail + htlen;
			entry.wrap = wrap;
			let mut segs = self.segments.lock().expect("chain segment list poisoned");
			segs[idx].set_tail(entry.tail);
			Ok(idx)
		} else {
			self.grow_after(idx)?;
			let new_idx = idx + 1;
			let (head, wrap) = {
				let segs = self.segments.lock().expect("chain segment list poisoned");
				let seg = &segs[new_idx];
				(seg.head(), seg.wrap())
			};
			entry.base = {
				let segs = self.segments.lock().expect("chain segment list poisoned");
				segs[new_idx].base()
			};
			entry.head = head;
			entry.tail = head + htlen;
			entry.wrap = wrap;
			let mut segs = self.segments.lock().expect("chain segment list poisoned");
			segs[new_idx].set_tail(entry.tail);
			Ok(new_idx)
		}
	}

	/// Insert a freshly fetched/allocated segment immediately after `idx`.
	fn grow_after(&mut self, idx: usize) -> Result<()> {
		match self.fetch.clone() {
			crate::chain::FetchSource::Nothing => crate::pool::fetch_nothing(),
			crate::chain::FetchSource::Allocate => {
				if self.min_bsize > self.max_bsize {
					return Err(Error::out_of_space());
				}
				let seg = crate::segment::Segment::owned_growable(self.min_bsize);
				let mut segs = self.segments.lock().expect("chain segment list poisoned");
				segs.insert(idx + 1, seg);
				Ok(())
			}
			crate::chain::FetchSource::Pool(_) | crate::chain::FetchSource::PoolRdma(_) => {
				// A pool-fetched segment lands at the tail of the chain, not
				// necessarily right after idx. That tail position is exactly
				// right here, since alloc_hdrs only ever calls this once it
				// has walked to the chain's current last segment.
				self.grow()
			}
		}
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::chain::{Chain, FetchSource, OpMode};

	#[test]
	fn put_then_get_unit_round_trips() {
		let mut enc = Chain::new(16, 16, OpMode::Encode, FetchSource::Allocate).unwrap();
		enc.put_unit(0xdead_beef).unwrap();
		assert_eq!(enc.getpos(), 4);
	}

	#[test]
	fn put_unit_crosses_segment_boundary() {
		let mut c = Chain::new(4, 64, OpMode::Encode, FetchSource::Allocate).unwrap();
		c.put_unit(1).unwrap();
		c.put_unit(2).unwrap();
		assert_eq!(c.segment_count(), 2);
		assert_eq!(c.getpos(), 8);
	}

	#[test]
	fn get_unit_alignment_violation_on_partial_tail() {
		let mut c = Chain::new(8, 8, OpMode::Decode, FetchSource::Nothing).unwrap();
		{
			let mut segs = c.segments.lock().unwrap();
			segs[0].set_tail(3);
		}
		let err = c.get_unit().unwrap_err();
		assert!(matches!(err.kind(), crate::ErrorKind::AlignmentViolation));
	}

	#[test]
	fn setpos_across_padding_lands_at_next_head() {
		let mut c = Chain::new(4, 4, OpMode::Encode, FetchSource::Allocate).unwrap();
		c.put_bytes(&[1, 2, 3, 4]).unwrap();
		c.put_bytes(&[5, 6]).unwrap();
		c.setpos(4).unwrap();
		assert_eq!(c.cursor.index, 1);
		assert_eq!(c.cursor.pos, c.segments.lock().unwrap()[1].head());
	}

	#[test]
	fn put_unit_out_of_space_when_fetch_exhausted() {
		let mut c = Chain::new(4, 4, OpMode::Encode, FetchSource::Nothing).unwrap();
		c.put_unit(1).unwrap();
		let err = c.put_unit(2).unwrap_err();
		assert!(matches!(err.kind(), crate::ErrorKind::PoolExhausted));
	}
}
