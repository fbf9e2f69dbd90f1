//! amd64 peephole pass.
//!
//! Local rewrites over the instruction stream:
//! - `mov reg, 0` becomes `xor reg, reg` (printed at 32 bits);
//! - `mov reg, src` + `add reg, k` fuses into `lea reg, [src + k]`;
//! - `add`/`sub reg, 0` disappears;
//! - `imul3 x, y, 1` becomes `mov x, y`;
//! - `lea reg, [base + d1]` + `mov reg, [reg + d2]` folds the displacement;
//! - a `jmp` whose target is itself a `jmp` pulls the final target in;
//! - a conditional jump over an unconditional one inverts when its target
//!   is the fall-through;
//! - `fxch n; fxch n` cancels;
//! - `test reg, reg` right after `and`/`or` into the same register drops;
//! - duplicate `cmp reg, imm` around a `setcc` drops.
//!
//! The pass reaches its fixed point in one application.

use super::super::asmcmp::{AsmcmpContext, IndirectBase, Opcode, Value};
use super::super::devirtualize::reg_of;
use super::super::regalloc::RegisterAllocator;
use crate::result::Result;

fn is_zero_imm(value: &Value) -> bool {
    matches!(value, Value::SignedImm(0) | Value::UnsignedImm(0))
}

fn imm_of(value: &Value) -> Option<i64> {
    match value {
        Value::SignedImm(v) => Some(*v),
        Value::UnsignedImm(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

/// Run the peephole pass.
pub fn peephole(ctx: &mut AsmcmpContext, alloc: &RegisterAllocator) -> Result<()> {
    let mut index = 0;
    while index < ctx.instrs.len() {
        let applied = try_rewrite(ctx, alloc, index)?;
        if !applied {
            index += 1;
        }
    }
    Ok(())
}

fn try_rewrite(ctx: &mut AsmcmpContext, alloc: &RegisterAllocator, index: usize) -> Result<bool> {
    let opcode = ctx.instrs[index].opcode;
    match opcode {
        // mov reg, 0 -> xor reg, reg
        Opcode::Mov => {
            let dst_is_reg = reg_of(alloc, &ctx.instrs[index].args[0]).is_some();
            if dst_is_reg && is_zero_imm(&ctx.instrs[index].args[1]) {
                let dst = ctx.instrs[index].args[0].clone();
                ctx.instrs[index].opcode = Opcode::Xor;
                ctx.instrs[index].args[1] = dst;
                return Ok(true);
            }
            // mov reg, src; add reg, k -> lea reg, [src + k]
            if let Some(next) = ctx.next_real(index) {
                if ctx.instrs[next].opcode == Opcode::Add
                    && ctx.instrs[next].args[0] == ctx.instrs[index].args[0]
                    && ctx.instrs[next].labels.is_empty()
                {
                    let dst_reg = reg_of(alloc, &ctx.instrs[index].args[0]);
                    let src_reg = reg_of(alloc, &ctx.instrs[index].args[1]);
                    let delta = imm_of(&ctx.instrs[next].args[1]);
                    if let (Some(_), Some(src), Some(delta)) = (dst_reg, src_reg, delta) {
                        if i32::try_from(delta).is_ok() {
                            let dst = ctx.instrs[index].args[0].clone();
                            ctx.instrs[index].opcode = Opcode::Lea;
                            ctx.instrs[index].args = [
                                dst,
                                Value::Indirect {
                                    base: IndirectBase::PhysReg(src),
                                    offset: delta,
                                    variant: super::super::asmcmp::OperandVariant::Default,
                                },
                                Value::None,
                            ];
                            ctx.remove(next);
                            return Ok(true);
                        }
                    }
                }
            }
            Ok(false)
        }
        // add/sub reg, 0 -> (nothing)
        Opcode::Add | Opcode::Sub => {
            if is_zero_imm(&ctx.instrs[index].args[1]) {
                ctx.remove(index);
                return Ok(true);
            }
            Ok(false)
        }
        // imul3 x, y, 1 -> mov x, y
        Opcode::Imul3 => {
            if imm_of(&ctx.instrs[index].args[2]) == Some(1) {
                ctx.instrs[index].opcode = Opcode::Mov;
                ctx.instrs[index].args[2] = Value::None;
                return Ok(true);
            }
            Ok(false)
        }
        // lea reg, [base + d1]; mov reg, [reg + d2] -> mov reg, [base + d1 + d2]
        Opcode::Lea => {
            let Some(next) = ctx.next_real(index) else {
                return Ok(false);
            };
            if ctx.instrs[next].opcode != Opcode::Mov || !ctx.instrs[next].labels.is_empty() {
                return Ok(false);
            }
            let lea_dst = reg_of(alloc, &ctx.instrs[index].args[0]);
            let mov_dst = reg_of(alloc, &ctx.instrs[next].args[0]);
            let (lea_base, d1) = match &ctx.instrs[index].args[1] {
                Value::Indirect {
                    base: IndirectBase::PhysReg(base),
                    offset,
                    ..
                } => (Some(*base), *offset),
                _ => (None, 0),
            };
            let folded = match (&ctx.instrs[next].args[1], lea_dst) {
                (
                    Value::Indirect {
                        base: IndirectBase::Vreg(base_vreg),
                        offset: d2,
                        variant,
                    },
                    Some(lea_dst),
                ) if reg_of(alloc, &Value::vreg(*base_vreg)) == Some(lea_dst) => {
                    Some((*d2, *variant))
                }
                (
                    Value::Indirect {
                        base: IndirectBase::PhysReg(base),
                        offset: d2,
                        variant,
                    },
                    Some(lea_dst),
                ) if *base == lea_dst => Some((*d2, *variant)),
                _ => None,
            };
            if let (Some(base), Some(mov_dst), Some(lea_dst), Some((d2, variant))) =
                (lea_base, mov_dst, lea_dst, folded)
            {
                // Folding is safe only when the load overwrites the
                // address register itself.
                if mov_dst == lea_dst {
                    ctx.instrs[next].args[1] = Value::Indirect {
                        base: IndirectBase::PhysReg(base),
                        offset: d1 + d2,
                        variant,
                    };
                    ctx.remove(index);
                    return Ok(true);
                }
            }
            Ok(false)
        }
        // jmp L1 where L1: jmp L2 -> jmp L2
        Opcode::Jmp => {
            let Value::InternalLabel(target) = ctx.instrs[index].args[0] else {
                return Ok(false);
            };
            let Some(position) = ctx.labels[target].position else {
                return Ok(false);
            };
            if position == index {
                return Ok(false);
            }
            if ctx.instrs[position].opcode == Opcode::Jmp {
                if let Value::InternalLabel(final_target) = ctx.instrs[position].args[0] {
                    if final_target != target {
                        ctx.instrs[index].args[0] = Value::InternalLabel(final_target);
                        return Ok(true);
                    }
                }
            }
            Ok(false)
        }
        // jcc L1; jmp L2 with L1 being the fall-through -> j!cc L2
        Opcode::Jcc(cond) => {
            let Some(next) = ctx.next_real(index) else {
                return Ok(false);
            };
            if ctx.instrs[next].opcode != Opcode::Jmp || !ctx.instrs[next].labels.is_empty() {
                return Ok(false);
            }
            let Value::InternalLabel(cond_target) = ctx.instrs[index].args[0] else {
                return Ok(false);
            };
            let fallthrough = ctx.next_real(next);
            let target_position = ctx.labels[cond_target].position;
            if let (Some(fallthrough), Some(target_position)) = (fallthrough, target_position) {
                if fallthrough == target_position {
                    let unconditional = ctx.instrs[next].args[0].clone();
                    ctx.instrs[index].opcode = Opcode::Jcc(cond.invert());
                    ctx.instrs[index].args[0] = unconditional;
                    ctx.remove(next);
                    return Ok(true);
                }
            }
            Ok(false)
        }
        // fxch n; fxch n -> (nothing)
        Opcode::Fxch => {
            let Some(next) = ctx.next_real(index) else {
                return Ok(false);
            };
            if ctx.instrs[next].opcode == Opcode::Fxch
                && ctx.instrs[next].args[0] == ctx.instrs[index].args[0]
                && ctx.instrs[next].labels.is_empty()
            {
                ctx.remove(index);
                ctx.remove(next);
                return Ok(true);
            }
            Ok(false)
        }
        // and/or reg, x; test reg, reg -> drop the test (flags already set)
        Opcode::And | Opcode::Or => {
            let Some(next) = ctx.next_real(index) else {
                return Ok(false);
            };
            if ctx.instrs[next].opcode != Opcode::Test || !ctx.instrs[next].labels.is_empty() {
                return Ok(false);
            }
            let alu_dst = reg_of(alloc, &ctx.instrs[index].args[0]);
            let test_a = reg_of(alloc, &ctx.instrs[next].args[0]);
            let test_b = reg_of(alloc, &ctx.instrs[next].args[1]);
            if alu_dst.is_some() && alu_dst == test_a && test_a == test_b {
                ctx.remove(next);
                return Ok(true);
            }
            Ok(false)
        }
        // cmp reg, imm; setcc; cmp reg, imm -> drop the duplicate compare
        Opcode::Cmp => {
            let Some(set_index) = ctx.next_real(index) else {
                return Ok(false);
            };
            if !matches!(ctx.instrs[set_index].opcode, Opcode::SetCc(_))
                || !ctx.instrs[set_index].labels.is_empty()
            {
                return Ok(false);
            }
            let Some(second_cmp) = ctx.next_real(set_index) else {
                return Ok(false);
            };
            if ctx.instrs[second_cmp].opcode == Opcode::Cmp
                && ctx.instrs[second_cmp].labels.is_empty()
                && ctx.instrs[second_cmp].args == ctx.instrs[index].args
                && imm_of(&ctx.instrs[index].args[1]).is_some()
                && reg_of(alloc, &ctx.instrs[index].args[0]).is_some()
            {
                ctx.remove(second_cmp);
                return Ok(true);
            }
            Ok(false)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::asmcmp::{Cond, OperandVariant};
    use crate::isa::x64::frame::StackFrame;
    use crate::isa::x64::regs::PhysReg;

    fn run(ctx: &mut AsmcmpContext) -> RegisterAllocator {
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(ctx, &mut frame).unwrap();
        peephole(ctx, &alloc).unwrap();
        alloc
    }

    fn opcodes(ctx: &AsmcmpContext) -> Vec<Opcode> {
        ctx.instrs
            .iter()
            .map(|inst| inst.opcode)
            .filter(|&op| op != Opcode::Noop)
            .collect()
    }

    #[test]
    fn mov_zero_becomes_xor() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push2(Opcode::Mov, Value::PhysReg(PhysReg::Rax), Value::SignedImm(0));
        run(&mut ctx);
        assert_eq!(ctx.instrs[0].opcode, Opcode::Xor);
        assert_eq!(ctx.instrs[0].args[0], ctx.instrs[0].args[1]);
    }

    #[test]
    fn mov_add_fuses_to_lea() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push2(
            Opcode::Mov,
            Value::PhysReg(PhysReg::Rax),
            Value::PhysReg(PhysReg::Rcx),
        );
        ctx.push2(Opcode::Add, Value::PhysReg(PhysReg::Rax), Value::SignedImm(16));
        run(&mut ctx);
        assert_eq!(opcodes(&ctx), vec![Opcode::Lea]);
        assert_eq!(
            ctx.instrs[0].args[1],
            Value::Indirect {
                base: IndirectBase::PhysReg(PhysReg::Rcx),
                offset: 16,
                variant: OperandVariant::Default,
            }
        );
    }

    #[test]
    fn add_zero_drops() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push2(Opcode::Add, Value::PhysReg(PhysReg::Rax), Value::SignedImm(0));
        ctx.push2(Opcode::Sub, Value::PhysReg(PhysReg::Rcx), Value::SignedImm(0));
        run(&mut ctx);
        assert!(opcodes(&ctx).is_empty());
    }

    #[test]
    fn jump_chain_collapses() {
        let mut ctx = AsmcmpContext::new("f");
        let l1 = ctx.new_label();
        let l2 = ctx.new_label();
        ctx.push1(Opcode::Jmp, Value::InternalLabel(l1));
        ctx.bind_label(l1);
        ctx.push1(Opcode::Jmp, Value::InternalLabel(l2));
        ctx.bind_label(l2);
        ctx.push0(Opcode::Ret);
        run(&mut ctx);
        assert_eq!(ctx.instrs[0].args[0], Value::InternalLabel(l2));
    }

    #[test]
    fn conditional_over_unconditional_inverts() {
        let mut ctx = AsmcmpContext::new("f");
        let l1 = ctx.new_label();
        let l2 = ctx.new_label();
        ctx.push1(Opcode::Jcc(Cond::E), Value::InternalLabel(l1));
        ctx.push1(Opcode::Jmp, Value::InternalLabel(l2));
        ctx.bind_label(l1);
        ctx.push0(Opcode::Ret);
        ctx.bind_label(l2);
        ctx.push0(Opcode::Ret);
        run(&mut ctx);
        assert_eq!(ctx.instrs[0].opcode, Opcode::Jcc(Cond::Ne));
        assert_eq!(ctx.instrs[0].args[0], Value::InternalLabel(l2));
        assert_eq!(ctx.instrs[1].opcode, Opcode::Noop);
    }

    #[test]
    fn fxch_pair_cancels() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push1(Opcode::Fxch, Value::X87(2));
        ctx.push1(Opcode::Fxch, Value::X87(2));
        ctx.push0(Opcode::Ret);
        run(&mut ctx);
        assert_eq!(opcodes(&ctx), vec![Opcode::Ret]);
    }

    #[test]
    fn redundant_test_after_and_drops() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push2(Opcode::And, Value::PhysReg(PhysReg::Rax), Value::SignedImm(7));
        ctx.push2(
            Opcode::Test,
            Value::PhysReg(PhysReg::Rax),
            Value::PhysReg(PhysReg::Rax),
        );
        run(&mut ctx);
        assert_eq!(opcodes(&ctx), vec![Opcode::And]);
    }

    #[test]
    fn duplicate_cmp_around_setcc_drops() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push2(Opcode::Cmp, Value::PhysReg(PhysReg::Rax), Value::SignedImm(3));
        ctx.push1(Opcode::SetCc(Cond::E), Value::PhysReg(PhysReg::Rcx));
        ctx.push2(Opcode::Cmp, Value::PhysReg(PhysReg::Rax), Value::SignedImm(3));
        ctx.push1(Opcode::SetCc(Cond::L), Value::PhysReg(PhysReg::Rdx));
        run(&mut ctx);
        assert_eq!(
            opcodes(&ctx),
            vec![Opcode::Cmp, Opcode::SetCc(Cond::E), Opcode::SetCc(Cond::L)]
        );
    }

    #[test]
    fn peephole_is_idempotent() {
        let mut ctx = AsmcmpContext::new("f");
        ctx.push2(Opcode::Mov, Value::PhysReg(PhysReg::Rax), Value::SignedImm(0));
        ctx.push2(
            Opcode::Mov,
            Value::PhysReg(PhysReg::Rdx),
            Value::PhysReg(PhysReg::Rcx),
        );
        ctx.push2(Opcode::Add, Value::PhysReg(PhysReg::Rdx), Value::SignedImm(8));
        ctx.push2(Opcode::Add, Value::PhysReg(PhysReg::Rsi), Value::SignedImm(0));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        peephole(&mut ctx, &alloc).unwrap();
        let once = ctx.instrs.clone();
        peephole(&mut ctx, &alloc).unwrap();
        let twice = ctx.instrs.clone();
        assert_eq!(
            once.iter().map(|i| i.opcode).collect::<Vec<_>>(),
            twice.iter().map(|i| i.opcode).collect::<Vec<_>>()
        );
        assert_eq!(
            once.iter().map(|i| i.args.clone()).collect::<Vec<_>>(),
            twice.iter().map(|i| i.args.clone()).collect::<Vec<_>>()
        );
    }
}
