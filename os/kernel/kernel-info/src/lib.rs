//! # Kernel Configuration
//!
//! Build-time constants that govern the kernel's memory layout and its fixed
//! capacities. Nothing here is configurable at runtime: the process table and
//! the per-process page tables are sized by these values, and the compile-time
//! checks below keep the combinations consistent.
//!
//! ## Memory Layout ([`memory`])
//!
//! ```text
//! Virtual Address Space Layout (32-bit MIPS):
//!
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │  Unmapped guard page            │
//! 0x0000_1000 ├─────────────────────────────────┤
//!             │  User segments (ro, rw, heap)   │
//!             │           (TLB mapped)          │
//!             │                                 │
//!             │  User stack, grows down from    │
//!             │  USERLAND_STACK_TOP             │
//! KSEG0_BASE  ├─────────────────────────────────┤ 0x8000_0000
//!             │  Kernel, unmapped and cached    │
//!             │  (physical = virtual - KSEG0)   │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ## Process Limits ([`process`])
//!
//! The process table is an array of [`PROCESS_MAX_PROCESSES`](process::PROCESS_MAX_PROCESSES)
//! control blocks indexed by process id.

#![cfg_attr(not(any(test, doctest)), no_std)]

pub mod memory;
pub mod process;
