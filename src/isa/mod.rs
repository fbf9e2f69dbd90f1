//! Target instruction-set backends.
//!
//! One backend exists: System-V AMD64 emitting textual assembly.

pub mod x64;
