//! amd64 jump propagation pass.
//!
//! A jump (conditional or not) whose target label sits on an unconditional
//! `jmp` is retargeted to that jump's destination. Chains are followed with
//! a visited set so degenerate cycles cannot loop forever.

use super::super::asmcmp::{AsmcmpContext, LabelId, Opcode, Value};
use crate::result::Result;
use rustc_hash::FxHashSet;

/// Run the jump-propagation pass.
pub fn propagate_jump(ctx: &mut AsmcmpContext) -> Result<()> {
    for index in 0..ctx.instrs.len() {
        if !matches!(ctx.instrs[index].opcode, Opcode::Jmp | Opcode::Jcc(_)) {
            continue;
        }
        let Value::InternalLabel(start) = ctx.instrs[index].args[0] else {
            continue;
        };
        let resolved = resolve(ctx, start);
        if resolved != start {
            ctx.instrs[index].args[0] = Value::InternalLabel(resolved);
        }
    }
    Ok(())
}

fn resolve(ctx: &AsmcmpContext, start: LabelId) -> LabelId {
    let mut visited: FxHashSet<LabelId> = FxHashSet::default();
    let mut current = start;
    while visited.insert(current) {
        let Some(position) = ctx.labels[current].position else {
            break;
        };
        let inst = &ctx.instrs[position];
        if inst.opcode != Opcode::Jmp {
            break;
        }
        let Value::InternalLabel(next) = inst.args[0] else {
            break;
        };
        if next == current {
            break;
        }
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::asmcmp::Cond;

    #[test]
    fn conditional_jump_skips_trampoline() {
        let mut ctx = AsmcmpContext::new("f");
        let trampoline = ctx.new_label();
        let target = ctx.new_label();
        ctx.push1(Opcode::Jcc(Cond::E), Value::InternalLabel(trampoline));
        ctx.push0(Opcode::Ret);
        ctx.bind_label(trampoline);
        ctx.push1(Opcode::Jmp, Value::InternalLabel(target));
        ctx.bind_label(target);
        ctx.push0(Opcode::Ret);
        propagate_jump(&mut ctx).unwrap();
        assert_eq!(ctx.instrs[0].args[0], Value::InternalLabel(target));
    }

    #[test]
    fn jump_cycles_terminate() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_label();
        let b = ctx.new_label();
        ctx.push1(Opcode::Jmp, Value::InternalLabel(a));
        ctx.bind_label(a);
        ctx.push1(Opcode::Jmp, Value::InternalLabel(b));
        ctx.bind_label(b);
        ctx.push1(Opcode::Jmp, Value::InternalLabel(a));
        propagate_jump(&mut ctx).unwrap();
        // The chain resolves as far as the cycle allows and stops.
        assert!(matches!(ctx.instrs[0].args[0], Value::InternalLabel(_)));
    }
}
