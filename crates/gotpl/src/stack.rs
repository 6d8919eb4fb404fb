//! Stack growth for the recursive compiler and interpreter.
//!
//! Parsing and evaluation recurse once per nesting level of the template,
//! and a render recurses again for every function call and include. The
//! depth limits keep that bounded; these helpers make sure the bounded depth
//! also fits on whatever thread the caller renders on.

/// Remaining stack below which a new segment is allocated.
const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment.
const SEGMENT: usize = 2 * 1024 * 1024;

/// Runs `f`, first moving to a fresh stack segment if the current one is
/// nearly exhausted.
#[inline]
pub(crate) fn ensure<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT, f)
}
