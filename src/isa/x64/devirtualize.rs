//! Devirtualization.
//!
//! Runs right after register allocation: expands stash activations into
//! save/restore moves and rewrites instructions whose operand allocations
//! produced encodings x86 cannot express (two memory operands, a memory
//! destination on register-only instructions) using the reserved scratch
//! registers. Virtual-register operands stay in the stream; the emitter
//! resolves them through the allocation table.

use super::asmcmp::{AsmcmpContext, IndirectBase, Inst, Opcode, OperandVariant, Value};
use super::regalloc::{Allocation, RegisterAllocator};
use super::regs::{PhysReg, GP_SCRATCH, SSE_SCRATCH};
use crate::result::Result;

/// Does this operand resolve to memory after allocation?
pub fn is_memory(alloc: &RegisterAllocator, value: &Value) -> bool {
    match value {
        Value::Indirect { .. } | Value::RipIndirect { .. } => true,
        Value::Vreg { vreg, .. } => matches!(
            alloc.allocation_of(*vreg),
            Allocation::SpillDirect { .. } | Allocation::SpillIndirect { .. } | Allocation::MemoryPointer
        ),
        _ => false,
    }
}

/// The physical register an operand resolves to, if any.
pub fn reg_of(alloc: &RegisterAllocator, value: &Value) -> Option<PhysReg> {
    match value {
        Value::PhysReg(reg) => Some(*reg),
        Value::Vreg { vreg, .. } => match alloc.allocation_of(*vreg) {
            Allocation::Register(reg) => Some(reg),
            _ => None,
        },
        _ => None,
    }
}

fn uses_sse(inst: &Inst) -> bool {
    use Opcode::*;
    matches!(
        inst.opcode,
        Movd | Movq | Movss | Movsd | Addss | Addsd | Subss | Subsd | Mulss | Mulsd | Divss
            | Divsd | Pxor | Xorps | Xorpd | Ucomiss | Ucomisd | Cvtsi2ss | Cvtsi2sd | Cvtss2sd
            | Cvtsd2ss
    )
}

// Instructions whose destination operand must live in a register.
fn needs_register_destination(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        Imul | Imul3
            | Movsx
            | Movzx
            | Lea
            | Addss
            | Addsd
            | Subss
            | Subsd
            | Mulss
            | Mulsd
            | Divss
            | Divsd
            | Pxor
            | Xorps
            | Xorpd
            | Ucomiss
            | Ucomisd
            | Cvtsi2ss
            | Cvtsi2sd
            | Cvttss2si
            | Cvttsd2si
            | Cvtss2sd
            | Cvtsd2ss
    )
}

// Destination is overwritten without reading its previous contents.
fn write_only_destination(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        Movsx | Movzx | Lea | Cvtsi2ss | Cvtsi2sd | Cvttss2si | Cvttsd2si | Cvtss2sd | Cvtsd2ss
            | Movss | Movsd | Movd | Movq | Mov
    )
}

fn two_operand_alu(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        Mov | Add | Sub | And | Or | Xor | Cmp | Test | Imul | Addss | Addsd | Subss | Subsd
            | Mulss | Mulsd | Divss | Divsd | Ucomiss | Ucomisd | Movss | Movsd | Movd | Movq
    )
}

/// Rewrite the stream for operand legality and expand stashes.
pub fn devirtualize(ctx: &mut AsmcmpContext, alloc: &RegisterAllocator) -> Result<()> {
    let mut rewritten: Vec<Inst> = Vec::with_capacity(ctx.instrs.len());
    let instrs = std::mem::take(&mut ctx.instrs);
    for mut inst in instrs {
        match inst.opcode {
            Opcode::StashActivate => {
                let Value::Stash(stash) = inst.args[0] else {
                    rewritten.push(inst);
                    continue;
                };
                let saved = ctx.stashes[stash].saved.clone();
                let mut labels = std::mem::take(&mut inst.labels);
                for (reg, slot) in saved {
                    let opcode = if reg.is_xmm() { Opcode::Movq } else { Opcode::Mov };
                    let mut save = Inst {
                        opcode,
                        args: [
                            Value::Indirect {
                                base: IndirectBase::SpillArea(slot),
                                offset: 0,
                                variant: OperandVariant::B64,
                            },
                            Value::PhysReg(reg),
                            Value::None,
                        ],
                        labels: Vec::new(),
                        location: inst.location,
                    };
                    save.labels = std::mem::take(&mut labels);
                    rewritten.push(save);
                }
                if !labels.is_empty() {
                    rewritten.push(Inst {
                        opcode: Opcode::Noop,
                        args: [Value::None, Value::None, Value::None],
                        labels,
                        location: inst.location,
                    });
                }
            }
            Opcode::StashDeactivate => {
                let Value::Stash(stash) = inst.args[0] else {
                    rewritten.push(inst);
                    continue;
                };
                let saved = ctx.stashes[stash].saved.clone();
                let mut labels = std::mem::take(&mut inst.labels);
                for (reg, slot) in saved {
                    let opcode = if reg.is_xmm() { Opcode::Movq } else { Opcode::Mov };
                    let mut restore = Inst {
                        opcode,
                        args: [
                            Value::PhysReg(reg),
                            Value::Indirect {
                                base: IndirectBase::SpillArea(slot),
                                offset: 0,
                                variant: OperandVariant::B64,
                            },
                            Value::None,
                        ],
                        labels: Vec::new(),
                        location: inst.location,
                    };
                    restore.labels = std::mem::take(&mut labels);
                    rewritten.push(restore);
                }
                if !labels.is_empty() {
                    rewritten.push(Inst {
                        opcode: Opcode::Noop,
                        args: [Value::None, Value::None, Value::None],
                        labels,
                        location: inst.location,
                    });
                }
            }
            opcode if two_operand_alu(opcode) || needs_register_destination(opcode) => {
                let inst = fix_indirect_bases(ctx, alloc, &mut rewritten, inst);
                legalize(alloc, &mut rewritten, inst);
            }
            _ => {
                let inst = fix_indirect_bases(ctx, alloc, &mut rewritten, inst);
                rewritten.push(inst);
            }
        }
    }
    ctx.instrs = rewritten;
    // Positions moved; rebind labels from the instruction side.
    for label in ctx.labels.keys().collect::<Vec<_>>() {
        ctx.labels[label].position = None;
    }
    for (index, inst) in ctx.instrs.iter().enumerate() {
        for &label in &inst.labels {
            ctx.labels[label].position = Some(index);
        }
    }
    Ok(())
}

// An indirect operand whose base vreg spilled holds a pointer in memory;
// stage the pointer through the scratch register. Long-double vregs are the
// exception: their spill slots hold the value itself and the emitter
// resolves them directly.
fn fix_indirect_bases(
    ctx: &AsmcmpContext,
    alloc: &RegisterAllocator,
    out: &mut Vec<Inst>,
    mut inst: Inst,
) -> Inst {
    use super::asmcmp::VregKind;
    for index in 0..inst.args.len() {
        let Value::Indirect {
            base: IndirectBase::Vreg(vreg),
            offset,
            variant,
        } = inst.args[index].clone()
        else {
            continue;
        };
        let spilled_pointer = matches!(
            alloc.allocation_of(vreg),
            Allocation::SpillDirect { .. } | Allocation::SpillIndirect { .. }
        ) && !matches!(ctx.vregs[vreg].kind, VregKind::LongDouble);
        if spilled_pointer {
            let labels = std::mem::take(&mut inst.labels);
            out.push(Inst {
                opcode: Opcode::Mov,
                args: [
                    Value::PhysReg(GP_SCRATCH),
                    Value::Vreg {
                        vreg,
                        variant: OperandVariant::B64,
                    },
                    Value::None,
                ],
                labels,
                location: inst.location,
            });
            inst.args[index] = Value::Indirect {
                base: IndirectBase::PhysReg(GP_SCRATCH),
                offset,
                variant,
            };
        }
    }
    inst
}

fn scratch_for(inst: &Inst) -> PhysReg {
    if uses_sse(inst) {
        SSE_SCRATCH
    } else {
        GP_SCRATCH
    }
}

fn load_opcode(scratch: PhysReg) -> Opcode {
    if scratch.is_xmm() {
        Opcode::Movq
    } else {
        Opcode::Mov
    }
}

fn legalize(alloc: &RegisterAllocator, out: &mut Vec<Inst>, mut inst: Inst) {
    let dst_memory = is_memory(alloc, &inst.args[0]);
    let src_memory = !matches!(inst.args[1], Value::None) && is_memory(alloc, &inst.args[1]);
    let dst_must_be_register = needs_register_destination(inst.opcode);

    if dst_memory && dst_must_be_register {
        let scratch = scratch_for(&inst);
        let destination = inst.args[0].clone();
        let labels = std::mem::take(&mut inst.labels);
        if !write_only_destination(inst.opcode) {
            out.push(Inst {
                opcode: load_opcode(scratch),
                args: [Value::PhysReg(scratch), destination.clone(), Value::None],
                labels: labels.clone(),
                location: inst.location,
            });
        } else if !labels.is_empty() {
            out.push(Inst {
                opcode: Opcode::Noop,
                args: [Value::None, Value::None, Value::None],
                labels,
                location: inst.location,
            });
        }
        inst.args[0] = Value::PhysReg(scratch);
        let store_back = Inst {
            opcode: load_opcode(scratch),
            args: [destination, Value::PhysReg(scratch), Value::None],
            labels: Vec::new(),
            location: inst.location,
        };
        out.push(inst);
        out.push(store_back);
        return;
    }

    if dst_memory && src_memory {
        // Two memory operands: stage the source through the scratch.
        let scratch = scratch_for(&inst);
        let source = inst.args[1].clone();
        let labels = std::mem::take(&mut inst.labels);
        out.push(Inst {
            opcode: load_opcode(scratch),
            args: [Value::PhysReg(scratch), source, Value::None],
            labels,
            location: inst.location,
        });
        inst.args[1] = Value::PhysReg(scratch);
        out.push(inst);
        return;
    }

    out.push(inst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::asmcmp::{StashData, VregKind};
    use crate::isa::x64::frame::StackFrame;

    #[test]
    fn memory_to_memory_mov_goes_through_scratch() {
        let mut ctx = AsmcmpContext::new("f");
        let spill_a = Value::Indirect {
            base: IndirectBase::SpillArea(0),
            offset: 0,
            variant: OperandVariant::B64,
        };
        let spill_b = Value::Indirect {
            base: IndirectBase::SpillArea(1),
            offset: 0,
            variant: OperandVariant::B64,
        };
        ctx.push2(Opcode::Mov, spill_a.clone(), spill_b.clone());
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        devirtualize(&mut ctx, &alloc).unwrap();
        assert_eq!(ctx.instrs.len(), 2);
        assert_eq!(ctx.instrs[0].args[0], Value::PhysReg(GP_SCRATCH));
        assert_eq!(ctx.instrs[0].args[1], spill_b);
        assert_eq!(ctx.instrs[1].args[0], spill_a);
        assert_eq!(ctx.instrs[1].args[1], Value::PhysReg(GP_SCRATCH));
    }

    #[test]
    fn stash_expands_into_saves_and_restores() {
        let mut ctx = AsmcmpContext::new("f");
        let stash = ctx.stashes.push(StashData::default());
        ctx.push1(Opcode::StashActivate, Value::Stash(stash));
        ctx.push1(Opcode::Call, Value::ExternalLabel {
            name: "g".into(),
            position: crate::isa::x64::asmcmp::SymbolPosition::Plt,
            offset: 0,
        });
        ctx.push1(Opcode::StashDeactivate, Value::Stash(stash));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        // Pretend two caller-saved registers were live across the call.
        ctx.stashes[stash].saved = vec![(PhysReg::Rax, 0), (PhysReg::Rcx, 1)];
        devirtualize(&mut ctx, &alloc).unwrap();
        let opcodes: Vec<_> = ctx.instrs.iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::Mov, Opcode::Mov, Opcode::Call, Opcode::Mov, Opcode::Mov]
        );
        // Saves write to the spill area, restores read from it.
        assert!(matches!(ctx.instrs[0].args[0], Value::Indirect { .. }));
        assert!(matches!(ctx.instrs[4].args[0], Value::PhysReg(PhysReg::Rcx)));
    }

    #[test]
    fn register_destination_constraint_is_fixed_up() {
        let mut ctx = AsmcmpContext::new("f");
        let v = ctx.new_vreg(VregKind::GeneralPurpose);
        // Force a spill by requiring an indirect operand on the vreg.
        let mem = Value::Indirect {
            base: IndirectBase::SpillArea(3),
            offset: 0,
            variant: OperandVariant::B64,
        };
        ctx.push2(Opcode::Imul, mem.clone(), Value::vreg(v));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        devirtualize(&mut ctx, &alloc).unwrap();
        let opcodes: Vec<_> = ctx.instrs.iter().map(|i| i.opcode).collect();
        assert_eq!(opcodes, vec![Opcode::Mov, Opcode::Imul, Opcode::Mov]);
        assert_eq!(ctx.instrs[1].args[0], Value::PhysReg(GP_SCRATCH));
    }
}
