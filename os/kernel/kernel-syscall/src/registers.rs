//! Indices into [`UserContext::cpu_regs`](crate::UserContext::cpu_regs).

/// Hardwired zero.
pub const ZERO: usize = 0;
/// Return value.
pub const V0: usize = 2;
pub const V1: usize = 3;
/// First argument register; carries the syscall number.
pub const A0: usize = 4;
pub const A1: usize = 5;
pub const A2: usize = 6;
pub const A3: usize = 7;
/// Stack pointer.
pub const SP: usize = 29;
/// Return address.
pub const RA: usize = 31;
