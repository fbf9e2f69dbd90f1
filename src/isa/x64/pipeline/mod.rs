//! Asmcmp rewriting pipeline.
//!
//! Four passes run between devirtualization and emission: a peephole pass
//! over common instruction idioms, jump propagation through unconditional
//! jump chains, removal of unreferenced labels, and removal of the virtual
//! opcodes codegen used for bookkeeping. Each pass reaches a fixed point in
//! a single application; running one twice changes nothing.

mod drop_virtual;
mod eliminate_label;
mod peephole;
mod propagate_jump;

pub use self::drop_virtual::drop_virtual;
pub use self::eliminate_label::eliminate_label;
pub use self::peephole::peephole;
pub use self::propagate_jump::propagate_jump;

use super::asmcmp::AsmcmpContext;
use super::regalloc::RegisterAllocator;
use crate::result::Result;

/// Run the full pipeline in order.
pub fn run(ctx: &mut AsmcmpContext, alloc: &RegisterAllocator) -> Result<()> {
    peephole(ctx, alloc)?;
    propagate_jump(ctx)?;
    eliminate_label(ctx)?;
    drop_virtual(ctx, alloc)?;
    ctx.compact();
    Ok(())
}
