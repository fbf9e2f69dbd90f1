//! Charcoal C compiler core.
//!
//! This crate contains the translation pipeline that turns an analyzed C
//! abstract syntax tree into textual x86-64 assembly: semantic analysis,
//! lowering to a stack-based mid-level IR, construction of an SSA-form
//! optimizer IR, instruction selection into a virtual-register assembly IR,
//! register allocation, stack-frame computation and final serialization.
//! The preprocessor, lexer, parser, assembler and linker live elsewhere;
//! the crate consumes ASTs built through the constructors in [`ast`] and a
//! target descriptor from [`target`], and produces assembler text.

#![deny(trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod ast;
pub mod bigint;
pub mod bitset;
pub mod context;
pub mod entity;
pub mod graph;
pub mod ir;
pub mod isa;
pub mod opt;
pub mod result;
pub mod sema;
pub mod source;
pub mod strings;
pub mod target;
pub mod types;

pub use crate::context::Context;
pub use crate::result::{Error, Result};
pub use crate::source::SourceLocation;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
