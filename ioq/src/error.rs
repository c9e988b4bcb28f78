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

use std::error;
use std::sync::PoisonError;
use amplify_derive::Display;

/// The recoverable error surfaces a stream operation can return.
///
/// Invariant violations (a segment released with no release policy) are not
/// modeled here: the engine treats them as design-invariant violations and
/// aborts, per spec, rather than returning a value the caller could ignore.
#[derive(Copy, Clone, Debug, Display)]
pub enum ErrorKind {
	#[display("put_* hit max_bsize with no room left to grow")]
	OutOfSpace,
	#[display("get_* ran past the end of the chain")]
	Truncated,
	#[display("get_unit crossed a segment boundary mid-unit")]
	AlignmentViolation,
	#[display("alloc_hdrs given a malformed header/trailer layout")]
	LayoutError,
	#[display("the pool's grow routine failed to produce a buffer")]
	PoolExhausted,
	#[display("a pool or chain mutex was poisoned by a panicking thread")]
	Poisoned,
}

#[derive(Debug, Display)]
#[display("{kind}")]
pub struct Error {
	kind: ErrorKind,
	source: Option<Box<dyn error::Error + Send + Sync + 'static>>,
}

impl error::Error for Error {
	fn source(&self) -> Option<&(dyn error::Error + 'static)> {
		self.source.as_deref().map(|e| e as _)
	}
}

impl Error {
	fn new(kind: ErrorKind) -> Self {
		Self { kind, source: None }
	}

	pub fn kind(&self) -> ErrorKind { self.kind }

	pub(crate) fn out_of_space() -> Self { Self::new(ErrorKind::OutOfSpace) }
	pub(crate) fn truncated() -> Self { Self::new(ErrorKind::Truncated) }
	pub(crate) fn alignment_violation() -> Self { Self::new(ErrorKind::AlignmentViolation) }
	pub(crate) fn layout_error() -> Self { Self::new(ErrorKind::LayoutError) }
	pub(crate) fn pool_exhausted(source: impl error::Error + Send + Sync + 'static) -> Self {
		Self { kind: ErrorKind::PoolExhausted, source: Some(Box::new(source)) }
	}

	pub(crate) fn poisoned<T>(_: PoisonError<T>) -> Self {
		Self::new(ErrorKind::Poisoned)
	}
}

pub type Result<T = ()> = std::result::Result<T, Error>;
