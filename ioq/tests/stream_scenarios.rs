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

//! The concrete end-to-end scenarios a chain must satisfy, one test per
//! scenario rather than a mechanical encode/decode grid.

use ioq::{Chain, FetchSource, OpMode, VioType};
use quickcheck_macros::quickcheck;

#[test]
fn linear_put_get_round_trips_two_units() {
	let mut c = Chain::new(16, 64, OpMode::Encode, FetchSource::Allocate).unwrap();
	c.put_unit(0xDEAD_BEEF).unwrap();
	c.put_unit(0x0102_0304).unwrap();
	assert_eq!(c.getpos(), 8);

	c.setpos(0).unwrap();
	assert_eq!(c.get_unit().unwrap(), 0xDEAD_BEEF);
	assert_eq!(c.get_unit().unwrap(), 0x0102_0304);
}

#[test]
fn put_bytes_crosses_segment_boundary_and_reads_back_contiguous() {
	let mut c = Chain::new(8, 64, OpMode::Encode, FetchSource::Allocate).unwrap();
	c.put_bytes(b"ABCDEFG").unwrap();
	c.put_bytes(b"HIJK").unwrap();
	assert_eq!(c.segment_count(), 2);

	c.setpos(0).unwrap();
	let mut buf = [0u8; 11];
	c.get_bytes(&mut buf).unwrap();
	assert_eq!(&buf, b"ABCDEFGHIJK");
}

#[test]
fn setpos_across_padding_lands_exactly_at_next_head_or_one_past() {
	let mut c = Chain::new(4, 4, OpMode::Encode, FetchSource::Allocate).unwrap();
	c.put_bytes(&[1, 2, 3, 4]).unwrap();
	c.put_bytes(&[5, 6]).unwrap();

	c.setpos(4).unwrap();
	assert_eq!(c.getpos(), 4);
	let mut one = [0u8; 1];
	c.get_bytes(&mut one).unwrap();
	assert_eq!(one[0], 5);

	c.setpos(5).unwrap();
	let mut one = [0u8; 1];
	c.get_bytes(&mut one).unwrap();
	assert_eq!(one[0], 6);
}

#[test]
fn alloc_hdrs_inserts_a_fresh_header_segment_when_no_suffix_room() {
	let mut c = Chain::new(100, 200, OpMode::Encode, FetchSource::Allocate).unwrap();
	c.put_bytes(&[7u8; 100]).unwrap();
	assert_eq!(c.segment_count(), 1);

	let mut vec = [
		ioq::VioEntry { vio_type: VioType::Header, base: 0, head: 0, tail: 8, wrap: 0 },
		ioq::VioEntry { vio_type: VioType::Data, base: 0, head: 0, tail: 0, wrap: 0 },
	];
	vec[1] = ioq::VioEntry { vio_type: VioType::Data, base: 0, head: 0, tail: 100, wrap: 0 };

	c.alloc_hdrs(0, &mut vec).unwrap();
	assert_eq!(c.segment_count(), 2, "a fresh segment was inserted ahead of the data segment");
	assert_eq!(vec[0].len(), 8);
	assert_eq!(c.getpos(), 108);
}

#[test]
fn iov_count_reports_truncated_past_end_of_chain() {
	// 8 bytes of backing storage, no data written, and nowhere to grow into.
	let mut c = Chain::new(8, 8, OpMode::Decode, FetchSource::Nothing).unwrap();
	assert!(c.iov_count(0, 100).is_err());
}

#[quickcheck]
fn put_then_setpos_then_get_bytes_round_trips(bytes: Vec<u8>) -> bool {
	if bytes.is_empty() || bytes.len() > 4096 {
		return true;
	}
	let mut c = Chain::new(16, 8192, OpMode::Encode, FetchSource::Allocate).unwrap();
	if c.put_bytes(&bytes).is_err() {
		return false;
	}
	if c.setpos(0).is_err() {
		return false;
	}
	let mut out = vec![0u8; bytes.len()];
	if c.get_bytes(&mut out).is_err() {
		return false;
	}
	out == bytes
}

#[quickcheck]
fn getpos_then_setpos_to_same_value_is_a_no_op(len: u8) -> bool {
	let len = (len as usize).max(1);
	let mut c = Chain::new(16, 8192, OpMode::Encode, FetchSource::Allocate).unwrap();
	c.put_bytes(&vec![0u8; len]).unwrap();
	let before = c.getpos();
	c.setpos(before).unwrap();
	c.getpos() == before
}
