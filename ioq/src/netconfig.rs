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

//! A reader for the `/etc/netconfig`-format transport database.
//!
//! This is an external collaborator, not part of the segmented I/O engine:
//! thin, sequential line parsing, included here only at the boundary the
//! rest of an RPC stack shares with it. A [`Session`] mirrors
//! `setnetconfig`/`getnetconfig`/`endnetconfig`: nestable (reference
//! counted), backed by one process-wide cache of already-parsed records and
//! one open file, so that a second session started while a first is still
//! reading does not re-read lines the first already consumed.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;

const DEFAULT_PATH: &str = "/etc/netconfig";

/// `nc_semantics`.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Semantics {
	Clts,
	Cots,
	CotsOrd,
	Raw,
}

/// `nc_flag`: `-` is a no-op, `v` sets `visible`, `b` sets `broadcast`.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Default)]
pub struct Flags {
	pub visible: bool,
	pub broadcast: bool,
}

/// One parsed `/etc/netconfig` record. Every lookup in this module returns
/// an owned copy: the caller never aliases the process-wide cache.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct Netconfig {
	pub netid: String,
	pub semantics: Semantics,
	pub flags: Flags,
	pub protofamily: String,
	pub protoname: String,
	pub device: String,
	pub lookups: Vec<String>,
}

/// The five errors `getnetconfig.c` defines, carrying the same canonical
/// message strings and the same errno values the C source reused for its
/// custom error codes (`NC_NONETCONFIG` &c. are `#define`d directly to
/// `ENOENT`/`ENOMEM`/...).
#[derive(Debug, thiserror::Error)]
pub enum NetconfigError {
	#[error("netconfig database not found")]
	DatabaseMissing(#[source] std::io::Error),
	#[error("not enough memory")]
	OutOfMemory,
	#[error("setnetconfig was not called first")]
	NotInitialised,
	#[error("netconfig database has invalid format")]
	BadFormat,
	#[error("netid not found in netconfig database")]
	NotFound,
}

// The standard Linux errno values `getnetconfig.c` `#define`d its own error
// codes to directly (NC_NONETCONFIG -> ENOENT, and so on), named out here
// rather than pulling in `libc` for five constants.
const ENOENT: i32 = 2;
const EBADF: i32 = 9;
const ENOMEM: i32 = 12;
const EINVAL: i32 = 22;
const ENOPROTOOPT: i32 = 92;

impl NetconfigError {
	/// The stable integer code `nc_error` would have held for this failure.
	pub fn code(&self) -> i32 {
		match self {
			NetconfigError::DatabaseMissing(_) => ENOENT,
			NetconfigError::OutOfMemory => ENOMEM,
			NetconfigError::NotInitialised => EINVAL,
			NetconfigError::BadFormat => EBADF,
			NetconfigError::NotFound => ENOPROTOOPT,
		}
	}
}

/// Write `nc_perror`-style diagnostic: `{context}: {message}`.
pub fn perror(context: &str, err: &NetconfigError) {
	eprintln!("{context}: {err}");
}

struct Global {
	ref_count: usize,
	path: PathBuf,
	entries: Vec<Arc<Netconfig>>,
	eof: bool,
	reader: Option<BufReader<File>>,
}

impl Global {
	fn new() -> Self {
		let path = std::env::var_os("NETCONFIG_PATH")
			.map(PathBuf::from)
			.unwrap_or_else(|| PathBuf::from(DEFAULT_PATH));
		Global { ref_count: 0, path, entries: Vec::new(), eof: false, reader: None }
	}
}

static GLOBAL: Lazy<Mutex<Global>> = Lazy::new(|| Mutex::new(Global::new()));

/// A `setnetconfig()` session handle. Dropping it (or calling
/// [`Session::close`] explicitly) is `endnetconfig()`: the process-wide
/// cache and file handle are torn down only once every nested session has
/// closed.
pub struct Session {
	/// Index into the shared cache this session has most recently handed
	/// out, or `None` before the first [`Session::next`] call.
	cursor: Option<usize>,
	started: bool,
	open: bool,
}

/// Establish a session, opening the database file if no other session
/// already has it open. Mirrors `setnetconfig()`.
pub fn open_session() -> Result<Session, NetconfigError> {
	let mut g = GLOBAL.lock().expect("netconfig mutex poisoned");
	g.ref_count += 1;
	if g.reader.is_none() {
		match File::open(&g.path) {
			Ok(f) => g.reader = Some(BufReader::new(f)),
			Err(e) => {
				g.ref_count -= 1;
				return Err(NetconfigError::DatabaseMissing(e));
			}
		}
	}
	Ok(Session { cursor: None, started: false, open: true })
}

impl Session {
	/// Return the next record, reading one further line from the database
	/// only once the shared cache is exhausted. Returns `Ok(None)` at end
	/// of file (mirrors `getnetconfig()` returning `NULL` without setting
	/// `nc_error`, since EOF is not itself a failure).
	pub fn next(&mut self) -> Result<Option<Netconfig>, NetconfigError> {
		if !self.open {
			return Err(NetconfigError::NotInitialised);
		}
		let mut g = GLOBAL.lock().expect("netconfig mutex poisoned");

		if !self.started {
			self.started = true;
			if !g.entries.is_empty() {
				self.cursor = Some(0);
				return Ok(Some((*g.entries[0]).clone()));
			}
		} else if let Some(idx) = self.cursor {
			if idx + 1 < g.entries.len() {
				self.cursor = Some(idx + 1);
				return Ok(Some((*g.entries[idx + 1]).clone()));
			}
		}

		if g.eof {
			return Ok(None);
		}

		loop {
			let Some(reader) = g.reader.as_mut() else {
				g.eof = true;
				return Ok(None);
			};
			let mut line = String::new();
			let n = reader
				.read_line(&mut line)
				.map_err(NetconfigError::DatabaseMissing)?;
			if n == 0 {
				g.eof = true;
				return Ok(None);
			}
			let trimmed = line.trim_end_matches(['\n', '\r']);
			if trimmed.is_empty() || trimmed.starts_with('#') {
				continue;
			}
			let parsed = parse_line(trimmed)?;
			g.entries.push(Arc::new(parsed.clone()));
			self.cursor = Some(g.entries.len() - 1);
			return Ok(Some(parsed));
		}
	}

	/// Find the record for `netid`, reading further into the database if
	/// the cache and the session's own position don't already cover it.
	/// Returns [`NetconfigError::NotFound`] at end of file with no match.
	pub fn lookup(&mut self, netid: &str) -> Result<Netconfig, NetconfigError> {
		{
			let g = GLOBAL.lock().expect("netconfig mutex poisoned");
			if let Some(found) = g.entries.iter().find(|e| e.netid == netid) {
				return Ok((**found).clone());
			}
		}
		loop {
			match self.next()? {
				Some(rec) if rec.netid == netid => return Ok(rec),
				Some(_) => continue,
				None => return Err(NetconfigError::NotFound),
			}
		}
	}

	/// Explicitly end this session. Equivalent to dropping it; provided
	/// for API parity with `endnetconfig()`.
	pub fn close(self) {}
}

impl Drop for Session {
	fn drop(&mut self) {
		if !self.open {
			return;
		}
		self.open = false;
		let mut g = GLOBAL.lock().expect("netconfig mutex poisoned");
		g.ref_count -= 1;
		if g.ref_count == 0 {
			g.entries.clear();
			g.eof = false;
			g.reader = None;
		}
	}
}

/// A session-less one-shot lookup that does not require [`open_session`]
/// first: consults the shared cache if warm, otherwise opens its own,
/// independent file handle and scans forward without disturbing any open
/// session's position. Mirrors `getnetconfigent()`.
pub fn lookup_entry(netid: &str) -> Result<Netconfig, NetconfigError> {
	if netid.is_empty() {
		return Err(NetconfigError::NotFound);
	}
	let path = {
		let g = GLOBAL.lock().expect("netconfig mutex poisoned");
		if let Some(found) = g.entries.iter().find(|e| e.netid == netid) {
			return Ok((**found).clone());
		}
		if g.eof {
			return Err(NetconfigError::NotFound);
		}
		g.path.clone()
	};

	let file = File::open(&path).map_err(NetconfigError::DatabaseMissing)?;
	let mut reader = BufReader::new(file);
	let mut line = String::new();
	loop {
		line.clear();
		let n = reader
			.read_line(&mut line)
			.map_err(NetconfigError::DatabaseMissing)?;
		if n == 0 {
			return Err(NetconfigError::NotFound);
		}
		let trimmed = line.trim_end_matches(['\n', '\r']);
		if trimmed.is_empty() || trimmed.starts_with('#') {
			continue;
		}
		let first = trimmed.split_whitespace().next().ok_or(NetconfigError::BadFormat)?;
		if first == netid {
			return parse_line(trimmed);
		}
	}
}

/// Parse one non-comment, non-blank netconfig line: `netid semantics flags
/// protofamily protoname device lookups`, exactly seven fields.
fn parse_line(line: &str) -> Result<Netconfig, NetconfigError> {
	let mut fields = line.split_whitespace();

	let netid = fields.next().ok_or(NetconfigError::BadFormat)?.to_string();

	let semantics = match fields.next().ok_or(NetconfigError::BadFormat)? {
		"tpi_cots_ord" => Semantics::CotsOrd,
		"tpi_cots" => Semantics::Cots,
		"tpi_clts" => Semantics::Clts,
		"tpi_raw" => Semantics::Raw,
		_ => return Err(NetconfigError::BadFormat),
	};

	let flags_field = fields.next().ok_or(NetconfigError::BadFormat)?;
	let mut flags = Flags::default();
	for c in flags_field.chars() {
		match c {
			'-' => {}
			'v' => flags.visible = true,
			'b' => flags.broadcast = true,
			_ => return Err(NetconfigError::BadFormat),
		}
	}

	let protofamily = fields.next().ok_or(NetconfigError::BadFormat)?.to_string();
	let protoname = fields.next().ok_or(NetconfigError::BadFormat)?.to_string();
	let device = fields.next().ok_or(NetconfigError::BadFormat)?.to_string();

	let lookups_field = fields.next().ok_or(NetconfigError::BadFormat)?;
	let lookups = if lookups_field == "-" {
		Vec::new()
	} else {
		lookups_field.split(',').map(str::to_string).collect()
	};

	if fields.next().is_some() {
		return Err(NetconfigError::BadFormat);
	}

	Ok(Netconfig { netid, semantics, flags, protofamily, protoname, device, lookups })
}

#[cfg(test)]
mod test {
	use super::*;

	/// Tests that touch `NETCONFIG_PATH` and the process-wide cache must not
	/// interleave with each other across `cargo test`'s default thread pool.
	static TEST_GUARD: Mutex<()> = Mutex::new(());

	fn write_netconfig(contents: &str) -> tempfile::NamedTempFile {
		use std::io::Write;
		let mut file = tempfile::NamedTempFile::new().expect("create temp netconfig file");
		file.write_all(contents.as_bytes()).expect("write temp netconfig file");
		file.flush().expect("flush temp netconfig file");
		file
	}

	fn with_netconfig<T>(contents: &str, f: impl FnOnce() -> T) -> T {
		let _guard = TEST_GUARD.lock().unwrap();
		let file = write_netconfig(contents);
		std::env::set_var("NETCONFIG_PATH", file.path());
		// Force a fresh Global the next time it's touched by draining any
		// cached state from a prior test in this process.
		{
			let mut g = GLOBAL.lock().unwrap();
			*g = Global::new();
		}
		f()
	}

	#[test]
	fn parses_udp_line() {
		let rec = parse_line("udp tpi_clts v inet udp /dev/udp -").unwrap();
		assert_eq!(rec.netid, "udp");
		assert_eq!(rec.semantics, Semantics::Clts);
		assert!(rec.flags.visible);
		assert!(!rec.flags.broadcast);
		assert_eq!(rec.protofamily, "inet");
		assert_eq!(rec.protoname, "udp");
		assert_eq!(rec.device, "/dev/udp");
		assert!(rec.lookups.is_empty());
	}

	#[test]
	fn rejects_unknown_semantics() {
		assert!(matches!(
			parse_line("udp bogus v inet udp /dev/udp -").unwrap_err(),
			NetconfigError::BadFormat
		));
	}

	#[test]
	fn rejects_wrong_field_count() {
		assert!(matches!(
			parse_line("udp tpi_clts v inet udp /dev/udp").unwrap_err(),
			NetconfigError::BadFormat
		));
	}

	#[test]
	fn session_reads_comment_and_blank_lines() {
		with_netconfig(
			"# a comment\n\nudp tpi_clts v inet udp /dev/udp -\n",
			|| {
				let mut s = open_session().unwrap();
				let rec = s.next().unwrap().unwrap();
				assert_eq!(rec.netid, "udp");
				assert!(s.next().unwrap().is_none());
			},
		);
	}

	#[test]
	fn session_lookup_finds_entry_by_netid() {
		with_netconfig(
			"udp tpi_clts v inet udp /dev/udp -\ntcp tpi_cots_ord - inet tcp /dev/tcp -\n",
			|| {
				let mut s = open_session().unwrap();
				let rec = s.lookup("tcp").unwrap();
				assert_eq!(rec.semantics, Semantics::CotsOrd);
			},
		);
	}

	#[test]
	fn nested_sessions_share_one_file() {
		with_netconfig("udp tpi_clts v inet udp /dev/udp -\n", || {
			let mut s1 = open_session().unwrap();
			let s2 = open_session().unwrap();
			assert_eq!(s1.next().unwrap().unwrap().netid, "udp");
			drop(s2);
			// Still alive: s1 still holds a reference.
			assert!(s1.next().unwrap().is_none());
		});
	}

	#[test]
	fn lookup_entry_works_without_a_session() {
		with_netconfig("udp tpi_clts v inet udp /dev/udp -\n", || {
			let rec = lookup_entry("udp").unwrap();
			assert_eq!(rec.netid, "udp");
			assert!(matches!(lookup_entry("nope").unwrap_err(), NetconfigError::NotFound));
		});
	}

	#[test]
	fn error_codes_match_canonical_errno_aliases() {
		assert_eq!(NetconfigError::NotFound.code(), 92);
		assert_eq!(NetconfigError::BadFormat.code(), 9);
		assert_eq!(NetconfigError::NotInitialised.code(), 22);
		assert_eq!(NetconfigError::OutOfMemory.code(), 12);
	}
}
