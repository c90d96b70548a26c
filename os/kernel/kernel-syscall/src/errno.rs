//! Negative result codes shared by several system calls.
//!
//! Calls with their own failure taxonomy (such as `join`) return small
//! negative numbers documented with the call instead.

/// Out of memory.
pub const ENOMEM: i32 = -12;

/// Invalid argument: a bad pointer, an unterminated string or an out of
/// range value.
pub const EINVAL: i32 = -22;

/// Unknown system call number.
pub const ENOSYS: i32 = -38;
