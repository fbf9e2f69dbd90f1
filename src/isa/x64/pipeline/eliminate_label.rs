//! amd64 label elimination pass.
//!
//! Labels attached to instructions but never referenced from any operand
//! (and without external dependencies) are detached, keeping the emitted
//! text free of dead local labels.

use super::super::asmcmp::{AsmcmpContext, IndirectBase, LabelId, RipTarget, Value};
use crate::result::Result;
use rustc_hash::FxHashSet;

/// Run the label-elimination pass.
pub fn eliminate_label(ctx: &mut AsmcmpContext) -> Result<()> {
    let mut referenced: FxHashSet<LabelId> = FxHashSet::default();
    for inst in &ctx.instrs {
        for value in inst.present_args() {
            match value {
                Value::InternalLabel(label) => {
                    referenced.insert(*label);
                }
                Value::Indirect {
                    base: IndirectBase::InternalLabel(label),
                    ..
                } => {
                    referenced.insert(*label);
                }
                Value::RipIndirect {
                    target: RipTarget::Internal(label),
                    ..
                } => {
                    referenced.insert(*label);
                }
                _ => {}
            }
        }
    }
    for inst in &mut ctx.instrs {
        inst.labels
            .retain(|label| referenced.contains(label) || ctx.labels[*label].external_dependencies);
    }
    for label in ctx.labels.keys().collect::<Vec<_>>() {
        if !referenced.contains(&label) && !ctx.labels[label].external_dependencies {
            ctx.labels[label].position = None;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::asmcmp::Opcode;

    #[test]
    fn unreferenced_labels_are_detached() {
        let mut ctx = AsmcmpContext::new("f");
        let used = ctx.new_label();
        let unused = ctx.new_label();
        let pinned = ctx.new_label();
        ctx.labels[pinned].external_dependencies = true;
        ctx.push1(Opcode::Jmp, Value::InternalLabel(used));
        ctx.bind_label(used);
        ctx.bind_label(unused);
        ctx.bind_label(pinned);
        ctx.push0(Opcode::Ret);
        eliminate_label(&mut ctx).unwrap();
        assert_eq!(ctx.instrs[1].labels, vec![used, pinned]);
        assert!(ctx.labels[unused].position.is_none());
        assert!(ctx.labels[pinned].position.is_some());
    }
}
