//! amd64 drop-virtual pass.
//!
//! Removes the purely virtual opcodes codegen used for bookkeeping
//! (`touch_virtual_register`, `vreg_lifetime_range_{begin,end}`, virtual
//! block markers, `noop`) and resolves `virtual_register_link`
//! instructions: links whose endpoints received the same allocation
//! disappear; the rest become moves. When the final instruction of the
//! stream is removed it is rewritten to a `noop` instead, keeping the
//! terminator position stable for attached labels.

use super::super::asmcmp::{AsmcmpContext, IndirectBase, Opcode, OperandVariant, Value, VregKind};
use super::super::devirtualize::{is_memory, reg_of};
use super::super::regalloc::{Allocation, RegisterAllocator};
use super::super::regs::GP_SCRATCH;
use crate::result::Result;

/// Run the drop-virtual pass.
pub fn drop_virtual(ctx: &mut AsmcmpContext, alloc: &RegisterAllocator) -> Result<()> {
    let mut index = 0;
    while index < ctx.instrs.len() {
        match ctx.instrs[index].opcode {
            Opcode::TouchVirtualRegister
            | Opcode::VregLifetimeRangeBegin
            | Opcode::VregLifetimeRangeEnd
            | Opcode::VirtualBlockBegin
            | Opcode::VirtualBlockEnd
            | Opcode::Noop => {
                ctx.remove(index);
            }
            Opcode::VirtualRegisterLink => {
                expand_link(ctx, alloc, index)?;
            }
            _ => {}
        }
        index += 1;
    }
    Ok(())
}

fn expand_link(ctx: &mut AsmcmpContext, alloc: &RegisterAllocator, index: usize) -> Result<()> {
    let dst = ctx.instrs[index].args[0].clone();
    let src = ctx.instrs[index].args[1].clone();
    // Identical allocations need no move at all.
    if let (Some(dst_reg), Some(src_reg)) = (reg_of(alloc, &dst), reg_of(alloc, &src)) {
        if dst_reg == src_reg {
            ctx.remove(index);
            return Ok(());
        }
    }
    if let (Some(dst_vreg), Some(src_vreg)) = (dst.as_vreg(), src.as_vreg()) {
        if alloc.allocation_of(dst_vreg) == alloc.allocation_of(src_vreg)
            && alloc.allocation_of(dst_vreg) != Allocation::Unallocated
        {
            ctx.remove(index);
            return Ok(());
        }
        // Long-double links copy both eightbytes through the scratch.
        let long_double = matches!(ctx.vregs[dst_vreg].kind, VregKind::LongDouble)
            || matches!(ctx.vregs[src_vreg].kind, VregKind::LongDouble);
        if long_double {
            let location = ctx.instrs[index].location;
            let labels = std::mem::take(&mut ctx.instrs[index].labels);
            ctx.remove(index);
            let mut insert_at = index;
            for part in 0..2i64 {
                let load = super::super::asmcmp::Inst {
                    opcode: Opcode::Mov,
                    args: [
                        Value::PhysReg(GP_SCRATCH),
                        Value::Indirect {
                            base: IndirectBase::Vreg(src_vreg),
                            offset: part * 8,
                            variant: OperandVariant::B64,
                        },
                        Value::None,
                    ],
                    labels: if part == 0 { labels.clone() } else { Vec::new() },
                    location,
                };
                let store = super::super::asmcmp::Inst {
                    opcode: Opcode::Mov,
                    args: [
                        Value::Indirect {
                            base: IndirectBase::Vreg(dst_vreg),
                            offset: part * 8,
                            variant: OperandVariant::B64,
                        },
                        Value::PhysReg(GP_SCRATCH),
                        Value::None,
                    ],
                    labels: Vec::new(),
                    location,
                };
                ctx.instrs.insert(insert_at + 1, load);
                ctx.instrs.insert(insert_at + 2, store);
                insert_at += 2;
            }
            rebind_labels(ctx);
            return Ok(());
        }
    }
    // Everything else becomes a single move; the devirtualizer rules
    // guarantee at least one side is a register, so pick the flavor from
    // whichever side resolved to SSE.
    let sse = reg_of(alloc, &dst).map(|r| r.is_xmm()).unwrap_or(false)
        || reg_of(alloc, &src).map(|r| r.is_xmm()).unwrap_or(false);
    let both_memory = is_memory(alloc, &dst) && is_memory(alloc, &src);
    if both_memory {
        let location = ctx.instrs[index].location;
        let labels = std::mem::take(&mut ctx.instrs[index].labels);
        ctx.remove(index);
        let load = super::super::asmcmp::Inst {
            opcode: Opcode::Mov,
            args: [Value::PhysReg(GP_SCRATCH), src, Value::None],
            labels,
            location,
        };
        let store = super::super::asmcmp::Inst {
            opcode: Opcode::Mov,
            args: [dst, Value::PhysReg(GP_SCRATCH), Value::None],
            labels: Vec::new(),
            location,
        };
        ctx.instrs.insert(index + 1, load);
        ctx.instrs.insert(index + 2, store);
        rebind_labels(ctx);
        return Ok(());
    }
    ctx.instrs[index].opcode = if sse { Opcode::Movq } else { Opcode::Mov };
    Ok(())
}

fn rebind_labels(ctx: &mut AsmcmpContext) {
    for label in ctx.labels.keys().collect::<Vec<_>>() {
        ctx.labels[label].position = None;
    }
    for (index, inst) in ctx.instrs.iter().enumerate() {
        for &label in &inst.labels {
            ctx.labels[label].position = Some(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::asmcmp::Preallocation;
    use crate::isa::x64::frame::StackFrame;
    use crate::isa::x64::regs::PhysReg;

    #[test]
    fn identical_links_collapse() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_vreg(VregKind::GeneralPurpose);
        let b = ctx.new_vreg(VregKind::FixedRegister(PhysReg::Rax));
        ctx.preallocate(a, Preallocation::Requirement(PhysReg::Rax));
        ctx.push2(Opcode::VirtualRegisterLink, Value::vreg(a), Value::vreg(b));
        ctx.push0(Opcode::Ret);
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        drop_virtual(&mut ctx, &alloc).unwrap();
        assert_eq!(ctx.instrs[0].opcode, Opcode::Noop);
    }

    #[test]
    fn differing_links_become_moves() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_vreg(VregKind::FixedRegister(PhysReg::Rax));
        let b = ctx.new_vreg(VregKind::FixedRegister(PhysReg::Rdi));
        ctx.push2(Opcode::VirtualRegisterLink, Value::vreg(a), Value::vreg(b));
        ctx.push0(Opcode::Ret);
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        drop_virtual(&mut ctx, &alloc).unwrap();
        assert_eq!(ctx.instrs[0].opcode, Opcode::Mov);
    }

    #[test]
    fn virtual_markers_disappear_and_final_noop_is_stable() {
        let mut ctx = AsmcmpContext::new("f");
        let v = ctx.new_vreg(VregKind::GeneralPurpose);
        ctx.push1(Opcode::VirtualBlockBegin, Value::UnsignedImm(1));
        ctx.push2(Opcode::Mov, Value::vreg(v), Value::SignedImm(3));
        ctx.push1(Opcode::VirtualBlockEnd, Value::UnsignedImm(1));
        ctx.push1(Opcode::TouchVirtualRegister, Value::vreg(v));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        drop_virtual(&mut ctx, &alloc).unwrap();
        let survivors: Vec<_> = ctx
            .instrs
            .iter()
            .map(|inst| inst.opcode)
            .filter(|&op| op != Opcode::Noop)
            .collect();
        assert_eq!(survivors, vec![Opcode::Mov]);
        // The dropped final instruction stays as a noop in place.
        assert_eq!(ctx.instrs.last().unwrap().opcode, Opcode::Noop);
    }
}
