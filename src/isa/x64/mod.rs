//! System-V AMD64 backend.
//!
//! The pipeline per function: instruction selection over the scheduled
//! optimizer IR, register allocation, devirtualization, the asmcmp
//! rewriting passes, and finally text emission. Module-level data (globals,
//! string literals, bit-precise constants) is serialized after the code.

pub mod abi;
pub mod asmcmp;
pub mod devirtualize;
pub mod emit;
pub mod frame;
pub mod lower;
pub mod pipeline;
pub mod regalloc;
pub mod regs;
pub mod x87;

pub use self::emit::AsmSyntax;

use crate::ir::IrModule;
use crate::opt::{build, CodeAnalysis};
use crate::result::Result;
use crate::target::TypeTraits;
use crate::types::TypeBundle;
use log::debug;

/// Generate textual assembly for a translated module.
pub fn generate(
    module: &IrModule,
    bundle: &TypeBundle,
    traits: &TypeTraits,
    syntax: AsmSyntax,
) -> Result<String> {
    let opt_module = build::build_module(module, bundle)?;
    let mut text = String::new();
    let mut externals: std::collections::BTreeSet<String> =
        module.externals.iter().cloned().collect();
    for func in opt_module.functions.values() {
        debug!("generating code for {}", func.name);
        let analysis = CodeAnalysis::of(func);
        let mut lowered = lower::lower_function(module, bundle, traits, func, &analysis)?;
        for (local, decl) in lowered.locals.iter() {
            lowered.frame.locals.allocate(local, decl);
        }
        let alloc = regalloc::RegisterAllocator::run(&mut lowered.ctx, &mut lowered.frame)?;
        devirtualize::devirtualize(&mut lowered.ctx, &alloc)?;
        pipeline::run(&mut lowered.ctx, &alloc)?;
        let offsets = lowered.frame.compute();
        externals.extend(lowered.ctx.externals.iter().cloned());
        emit::function(
            &mut text,
            syntax,
            &lowered.ctx,
            &alloc,
            &lowered.frame,
            &offsets,
            func.internal,
        )?;
    }
    // Locally defined symbols need no external directive.
    for func in opt_module.functions.values() {
        externals.remove(&func.name);
    }
    for global in &module.globals {
        externals.remove(&global.name);
    }
    let mut out = String::new();
    emit::module_header(&mut out, syntax, &externals)?;
    out.push_str(&text);
    emit::data_sections(&mut out, module)?;
    Ok(out)
}
