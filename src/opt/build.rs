//! Optimizer-IR construction from the stack IR.
//!
//! The flat instruction vector is cut into basic blocks at branch targets
//! and after terminators, then each block is simulated with an abstract
//! operand stack of instruction references. A branch edge carrying stack
//! entries materializes one phi per entry in the target block; backward
//! edges always carry empty stacks (the translator never keeps operands
//! live across loop back-edges).

use super::{
    Block, BlockId, CallNode, Callee, InstrKind, InstrRef, IntBinaryOp, IntUnaryOp, OptFunction,
    OptModule, PhiNode,
};
use crate::entity::{EntityRef, PrimaryMap};
use crate::ir::{IrFunction, IrModule, IrOp};
use crate::result::{Error, Result};
use crate::types::{Type, TypeBundle};
use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

/// Build the optimizer module for a translated IR module.
pub fn build_module(module: &IrModule, bundle: &TypeBundle) -> Result<OptModule> {
    let mut out = OptModule::default();
    for function in module.functions.values() {
        let built = build_function(module, function, bundle)?;
        out.functions.push(built);
    }
    Ok(out)
}

/// Build one optimizer function.
pub fn build_function(
    module: &IrModule,
    func: &IrFunction,
    bundle: &TypeBundle,
) -> Result<OptFunction> {
    trace!("building SSA for {}", func.name);
    let code = &func.code;
    let mut leaders: BTreeSet<usize> = BTreeSet::new();
    leaders.insert(0);
    for (index, op) in code.iter().enumerate() {
        match op {
            IrOp::Jump(target) | IrOp::BranchZero(target) | IrOp::BranchNonZero(target) => {
                leaders.insert(*target);
                leaders.insert(index + 1);
            }
            IrOp::Return | IrOp::ReturnVoid => {
                leaders.insert(index + 1);
            }
            _ => {}
        }
    }
    leaders.retain(|&leader| leader < code.len());

    let mut blocks: PrimaryMap<BlockId, Block> = PrimaryMap::new();
    let mut block_of: FxHashMap<usize, BlockId> = FxHashMap::default();
    let starts: Vec<usize> = leaders.iter().copied().collect();
    for &start in &starts {
        let block = blocks.push(Block::default());
        block_of.insert(start, block);
    }
    if blocks.is_empty() {
        blocks.push(Block::default());
    }

    let mut f = OptFunction {
        name: func.name.clone(),
        ty: func.ty,
        locals: func.locals.clone(),
        parameters: func.parameters.clone(),
        blocks,
        instrs: PrimaryMap::new(),
        phis: PrimaryMap::new(),
        calls: PrimaryMap::new(),
        entry: BlockId::new(0),
        internal: func.internal,
        variadic: func.variadic,
    };
    let mut entry_stack: FxHashMap<BlockId, Vec<InstrRef>> = FxHashMap::default();
    let mut processed: FxHashSet<BlockId> = FxHashSet::default();

    for (position, &start) in starts.iter().enumerate() {
        let block = block_of[&start];
        let end = starts.get(position + 1).copied().unwrap_or(code.len());
        let mut stack: Vec<InstrRef> = entry_stack.get(&block).cloned().unwrap_or_default();
        processed.insert(block);
        let mut terminated = false;
        for index in start..end {
            let appended_from = f.instrs.len();
            match &code[index] {
                IrOp::Jump(target) => {
                    let target = block_of[target];
                    add_edge(&mut f, &mut entry_stack, &processed, block, target, &stack)?;
                    f.append(block, InstrKind::Jump { target });
                    terminated = true;
                }
                IrOp::BranchZero(target) | IrOp::BranchNonZero(target) => {
                    let nonzero = matches!(code[index], IrOp::BranchNonZero(_));
                    let condition = pop(&mut stack)?;
                    let jump_target = block_of[target];
                    let fallthrough = starts
                        .get(position + 1)
                        .and_then(|next| block_of.get(next))
                        .copied()
                        .ok_or(Error::Internal("conditional branch at function end"))?;
                    let (on_true, on_false) = if nonzero {
                        (jump_target, fallthrough)
                    } else {
                        (fallthrough, jump_target)
                    };
                    add_edge(&mut f, &mut entry_stack, &processed, block, on_true, &stack)?;
                    add_edge(&mut f, &mut entry_stack, &processed, block, on_false, &stack)?;
                    f.append(
                        block,
                        InstrKind::Branch {
                            condition,
                            on_true,
                            on_false,
                        },
                    );
                    terminated = true;
                }
                IrOp::Return => {
                    let value = pop(&mut stack)?;
                    f.append(block, InstrKind::Return { value: Some(value) });
                    terminated = true;
                }
                IrOp::ReturnVoid => {
                    f.append(block, InstrKind::Return { value: None });
                    terminated = true;
                }
                op => {
                    step(module, func, bundle, &mut f, block, &mut stack, op)?;
                }
            }
            // Newly created instructions inherit the statement's location.
            let location = func.location_at(index);
            if !location.is_unknown() {
                for created in appended_from..f.instrs.len() {
                    f.instrs[InstrRef::new(created)].location = location;
                }
            }
        }
        if !terminated {
            let next = starts
                .get(position + 1)
                .and_then(|next| block_of.get(next))
                .copied()
                .ok_or(Error::Internal("fallthrough off the function end"))?;
            add_edge(&mut f, &mut entry_stack, &processed, block, next, &stack)?;
            f.append(block, InstrKind::Jump { target: next });
        }
    }
    if f.blocks[f.entry].instrs.is_empty() {
        f.append(f.entry, InstrKind::Return { value: None });
    }
    Ok(f)
}

fn pop(stack: &mut Vec<InstrRef>) -> Result<InstrRef> {
    stack.pop().ok_or(Error::Internal("operand stack underflow"))
}

fn add_edge(
    f: &mut OptFunction,
    entry_stack: &mut FxHashMap<BlockId, Vec<InstrRef>>,
    processed: &FxHashSet<BlockId>,
    from: BlockId,
    to: BlockId,
    stack: &[InstrRef],
) -> Result<()> {
    if let Some(phis) = entry_stack.get(&to) {
        if phis.len() != stack.len() {
            return Err(Error::Internal("operand stack depth mismatch at block entry"));
        }
        for (&phi_instr, &value) in phis.iter().zip(stack) {
            let InstrKind::Phi(phi) = f.instrs[phi_instr].kind else {
                return Err(Error::Internal("block entry value is not a phi"));
            };
            f.phis[phi].links.push((from, value));
        }
        return Ok(());
    }
    if processed.contains(&to) {
        if !stack.is_empty() {
            return Err(Error::Internal("live operands across a back edge"));
        }
        return Ok(());
    }
    let mut refs = Vec::with_capacity(stack.len());
    for &value in stack {
        let phi = f.phis.push(PhiNode {
            links: vec![(from, value)],
        });
        let instr = f.append(to, InstrKind::Phi(phi));
        refs.push(instr);
    }
    entry_stack.insert(to, refs);
    Ok(())
}

fn step(
    module: &IrModule,
    func: &IrFunction,
    bundle: &TypeBundle,
    f: &mut OptFunction,
    block: BlockId,
    stack: &mut Vec<InstrRef>,
    op: &IrOp,
) -> Result<()> {
    let _ = func;
    match op {
        IrOp::Nop => {}
        IrOp::IntConst(v) => stack.push(f.append(block, InstrKind::IntConst(*v))),
        IrOp::UIntConst(v) => stack.push(f.append(block, InstrKind::UIntConst(*v))),
        IrOp::F32Const(v) => stack.push(f.append(block, InstrKind::F32Const(*v))),
        IrOp::F64Const(v) => stack.push(f.append(block, InstrKind::F64Const(*v))),
        IrOp::LongDoubleConst(v) => stack.push(f.append(block, InstrKind::LongDoubleConst(*v))),
        IrOp::BigIntConst(id) => stack.push(f.append(block, InstrKind::BigIntConst(*id))),
        IrOp::StringAddr(id) => stack.push(f.append(block, InstrKind::StringAddr(*id))),
        IrOp::GlobalAddr { name, offset } => stack.push(f.append(
            block,
            InstrKind::GlobalAddr {
                name: name.clone(),
                offset: *offset,
            },
        )),
        IrOp::LocalAddr(local) => stack.push(f.append(block, InstrKind::LocalAddr(*local))),
        IrOp::Pick(depth) => {
            let index = stack
                .len()
                .checked_sub(1 + *depth as usize)
                .ok_or(Error::Internal("pick beyond stack depth"))?;
            let value = stack[index];
            stack.push(value);
        }
        IrOp::Xchg(depth) => {
            let top = stack.len().checked_sub(1).ok_or(Error::Internal("xchg on empty stack"))?;
            let other = stack
                .len()
                .checked_sub(1 + *depth as usize)
                .ok_or(Error::Internal("xchg beyond stack depth"))?;
            stack.swap(top, other);
        }
        IrOp::Pop => {
            pop(stack)?;
        }
        IrOp::Load {
            width,
            signed,
            volatile,
        } => {
            let addr = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::Load {
                    addr,
                    width: *width,
                    signed: *signed,
                    volatile: *volatile,
                },
            ));
        }
        IrOp::Store { width, volatile } => {
            let addr = pop(stack)?;
            let value = pop(stack)?;
            f.append(
                block,
                InstrKind::Store {
                    addr,
                    value,
                    width: *width,
                    volatile: *volatile,
                },
            );
        }
        IrOp::LoadFloat { width, volatile } => {
            let addr = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::LoadFloat {
                    addr,
                    width: *width,
                    volatile: *volatile,
                },
            ));
        }
        IrOp::StoreFloat { width, volatile } => {
            let addr = pop(stack)?;
            let value = pop(stack)?;
            f.append(
                block,
                InstrKind::StoreFloat {
                    addr,
                    value,
                    width: *width,
                    volatile: *volatile,
                },
            );
        }
        IrOp::CopyMemory { size } => {
            let src = pop(stack)?;
            let dst = pop(stack)?;
            f.append(
                block,
                InstrKind::CopyMemory {
                    dst,
                    src,
                    size: *size,
                },
            );
        }
        IrOp::ZeroMemory { size } => {
            let addr = pop(stack)?;
            f.append(block, InstrKind::ZeroMemory { addr, size: *size });
        }
        IrOp::BitExtract {
            offset,
            width,
            signed,
        } => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::BitExtract {
                    value,
                    offset: *offset,
                    width: *width,
                    signed: *signed,
                },
            ));
        }
        IrOp::BitInsert { offset, width } => {
            let value = pop(stack)?;
            let base = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::BitInsert {
                    base,
                    value,
                    offset: *offset,
                    width: *width,
                },
            ));
        }
        IrOp::IntAdd(width) => int_binary(f, block, stack, IntBinaryOp::Add, *width)?,
        IrOp::IntSub(width) => int_binary(f, block, stack, IntBinaryOp::Sub, *width)?,
        IrOp::IntMul { width, signed } => {
            int_binary(f, block, stack, IntBinaryOp::Mul { signed: *signed }, *width)?
        }
        IrOp::IntDiv { width, signed } => {
            int_binary(f, block, stack, IntBinaryOp::Div { signed: *signed }, *width)?
        }
        IrOp::IntMod { width, signed } => {
            int_binary(f, block, stack, IntBinaryOp::Mod { signed: *signed }, *width)?
        }
        IrOp::IntAnd(width) => int_binary(f, block, stack, IntBinaryOp::And, *width)?,
        IrOp::IntOr(width) => int_binary(f, block, stack, IntBinaryOp::Or, *width)?,
        IrOp::IntXor(width) => int_binary(f, block, stack, IntBinaryOp::Xor, *width)?,
        IrOp::IntShl(width) => int_binary(f, block, stack, IntBinaryOp::Shl, *width)?,
        IrOp::IntShr(width) => int_binary(f, block, stack, IntBinaryOp::Shr, *width)?,
        IrOp::IntSar(width) => int_binary(f, block, stack, IntBinaryOp::Sar, *width)?,
        IrOp::IntNeg(width) => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::IntUnary {
                    op: IntUnaryOp::Neg,
                    width: *width,
                    value,
                },
            ));
        }
        IrOp::IntNot(width) => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::IntUnary {
                    op: IntUnaryOp::Not,
                    width: *width,
                    value,
                },
            ));
        }
        IrOp::IntCmp { width, op } => {
            let rhs = pop(stack)?;
            let lhs = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::IntCmp {
                    op: *op,
                    width: *width,
                    lhs,
                    rhs,
                },
            ));
        }
        IrOp::BoolNot => {
            let value = pop(stack)?;
            stack.push(f.append(block, InstrKind::BoolNot { value }));
        }
        IrOp::SignExtend(width) => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::SignExtend {
                    width: *width,
                    value,
                },
            ));
        }
        IrOp::ZeroExtend(width) => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::ZeroExtend {
                    width: *width,
                    value,
                },
            ));
        }
        IrOp::FloatAdd(width) => float_binary(f, block, stack, super::FloatBinaryOp::Add, *width)?,
        IrOp::FloatSub(width) => float_binary(f, block, stack, super::FloatBinaryOp::Sub, *width)?,
        IrOp::FloatMul(width) => float_binary(f, block, stack, super::FloatBinaryOp::Mul, *width)?,
        IrOp::FloatDiv(width) => float_binary(f, block, stack, super::FloatBinaryOp::Div, *width)?,
        IrOp::FloatNeg(width) => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::FloatNeg {
                    width: *width,
                    value,
                },
            ));
        }
        IrOp::FloatCmp { width, op } => {
            let rhs = pop(stack)?;
            let lhs = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::FloatCmp {
                    op: *op,
                    width: *width,
                    lhs,
                    rhs,
                },
            ));
        }
        IrOp::IntToFloat { to, signed } => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::IntToFloat {
                    to: *to,
                    signed: *signed,
                    value,
                },
            ));
        }
        IrOp::FloatToInt { from, signed } => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::FloatToInt {
                    from: *from,
                    signed: *signed,
                    value,
                },
            ));
        }
        IrOp::FloatConvert { from, to } => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::FloatConvert {
                    from: *from,
                    to: *to,
                    value,
                },
            ));
        }
        IrOp::BitintOp { op, width } => {
            let rhs = pop(stack)?;
            let lhs = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::BitintOp {
                    op: *op,
                    width: *width,
                    lhs,
                    rhs,
                },
            ));
        }
        IrOp::BitintUnary { op, width } => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::BitintUnary {
                    op: *op,
                    width: *width,
                    value,
                },
            ));
        }
        IrOp::BitintShift { op, width } => {
            let count = pop(stack)?;
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::BitintShift {
                    op: *op,
                    width: *width,
                    value,
                    count,
                },
            ));
        }
        IrOp::BitintIsZero { width } => {
            let value = pop(stack)?;
            stack.push(f.append(block, InstrKind::BitintIsZero { width: *width, value }));
        }
        IrOp::BitintCast { signed, from, to } => {
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::BitintCast {
                    signed: *signed,
                    from: *from,
                    to: *to,
                    value,
                },
            ));
        }
        IrOp::BitintFromInt { signed, width } => {
            let addr = pop(stack)?;
            let value = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::BitintFromInt {
                    signed: *signed,
                    width: *width,
                    value,
                    addr,
                },
            ));
        }
        IrOp::AtomicLoad { width, order } => {
            let addr = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::AtomicLoad {
                    addr,
                    width: *width,
                    order: *order,
                },
            ));
        }
        IrOp::AtomicStore { width, order } => {
            let addr = pop(stack)?;
            let value = pop(stack)?;
            f.append(
                block,
                InstrKind::AtomicStore {
                    addr,
                    value,
                    width: *width,
                    order: *order,
                },
            );
        }
        IrOp::AtomicCompareExchange { width, order } => {
            let addr = pop(stack)?;
            let desired = pop(stack)?;
            let expected = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::AtomicCompareExchange {
                    addr,
                    expected,
                    desired,
                    width: *width,
                    order: *order,
                },
            ));
        }
        IrOp::AtomicCopyMemory { size, order } => {
            let src = pop(stack)?;
            let dst = pop(stack)?;
            f.append(
                block,
                InstrKind::AtomicCopyMemory {
                    dst,
                    src,
                    size: *size,
                    order: *order,
                },
            );
        }
        IrOp::OverflowArith { op, width, signed } => {
            let result_addr = pop(stack)?;
            let rhs = pop(stack)?;
            let lhs = pop(stack)?;
            stack.push(f.append(
                block,
                InstrKind::OverflowArith {
                    op: *op,
                    width: *width,
                    signed: *signed,
                    lhs,
                    rhs,
                    result_addr,
                },
            ));
        }
        IrOp::Invoke {
            name,
            signature,
            argc,
            return_space,
        } => {
            let mut args = Vec::with_capacity(*argc as usize);
            for _ in 0..*argc {
                args.push(pop(stack)?);
            }
            args.reverse();
            let space = if *return_space { Some(pop(stack)?) } else { None };
            let call = f.calls.push(CallNode {
                callee: Callee::Direct(name.clone()),
                signature: Some(*signature),
                args,
                return_space: space,
            });
            let instr = f.append(block, InstrKind::Call(call));
            if call_pushes_value(bundle, Some(*signature), space.is_some()) {
                stack.push(instr);
            }
        }
        IrOp::InvokeVirtual {
            signature,
            argc,
            return_space,
        } => {
            let callee = pop(stack)?;
            let mut args = Vec::with_capacity(*argc as usize);
            for _ in 0..*argc {
                args.push(pop(stack)?);
            }
            args.reverse();
            let space = if *return_space { Some(pop(stack)?) } else { None };
            let call = f.calls.push(CallNode {
                callee: Callee::Indirect(callee),
                signature: Some(*signature),
                args,
                return_space: space,
            });
            let instr = f.append(block, InstrKind::Call(call));
            if call_pushes_value(bundle, Some(*signature), space.is_some()) {
                stack.push(instr);
            }
        }
        IrOp::ComplexLibcall { name, width } => {
            // [result_addr, a_re, a_im, b_re, b_im] -> [result_addr]
            let b_im = pop(stack)?;
            let b_re = pop(stack)?;
            let a_im = pop(stack)?;
            let a_re = pop(stack)?;
            let result_addr = pop(stack)?;
            let _ = width;
            let call = f.calls.push(CallNode {
                callee: Callee::Direct(name.clone()),
                signature: None,
                args: vec![a_re, a_im, b_re, b_im],
                return_space: Some(result_addr),
            });
            let instr = f.append(block, InstrKind::Call(call));
            stack.push(instr);
        }
        IrOp::VaStart => {
            let ap = pop(stack)?;
            f.append(block, InstrKind::VaStart { ap });
        }
        IrOp::VaEnd => {
            let ap = pop(stack)?;
            f.append(block, InstrKind::VaEnd { ap });
        }
        IrOp::VaCopy => {
            let dst = pop(stack)?;
            let src = pop(stack)?;
            f.append(block, InstrKind::VaCopy { dst, src });
        }
        IrOp::VaArg { ty } => {
            let ap = pop(stack)?;
            stack.push(f.append(block, InstrKind::VaArg { ap, ty: *ty }));
        }
        IrOp::FenvSave => {
            stack.push(f.append(block, InstrKind::FenvSave));
        }
        IrOp::FenvRestore => {
            let state = pop(stack)?;
            f.append(block, InstrKind::FenvRestore { state });
        }
        IrOp::InlineAsm(template) => {
            let info = &module.asm_templates[*template];
            let mut outputs = Vec::with_capacity(info.outputs);
            for _ in 0..info.outputs {
                outputs.push(pop(stack)?);
            }
            outputs.reverse();
            let mut inputs = Vec::with_capacity(info.inputs);
            for _ in 0..info.inputs {
                inputs.push(pop(stack)?);
            }
            inputs.reverse();
            let mut operands = inputs;
            operands.extend(outputs);
            f.append(
                block,
                InstrKind::InlineAsm {
                    template: *template,
                    operands,
                },
            );
        }
        IrOp::Jump(_) | IrOp::BranchZero(_) | IrOp::BranchNonZero(_) | IrOp::Return
        | IrOp::ReturnVoid => {
            return Err(Error::Internal("terminator reached the straight-line step"));
        }
    }
    Ok(())
}

fn call_pushes_value(bundle: &TypeBundle, signature: Option<crate::types::TypeId>, has_space: bool) -> bool {
    if has_space {
        return true;
    }
    match signature {
        Some(signature) => match bundle.get(bundle.unqualified(signature)) {
            Type::Function(function) => !bundle.is_void(function.return_type),
            _ => true,
        },
        None => true,
    }
}

fn int_binary(
    f: &mut OptFunction,
    block: BlockId,
    stack: &mut Vec<InstrRef>,
    op: IntBinaryOp,
    width: crate::ir::OpWidth,
) -> Result<()> {
    let rhs = pop(stack)?;
    let lhs = pop(stack)?;
    stack.push(f.append(block, InstrKind::IntBinary { op, width, lhs, rhs }));
    Ok(())
}

fn float_binary(
    f: &mut OptFunction,
    block: BlockId,
    stack: &mut Vec<InstrRef>,
    op: super::FloatBinaryOp,
    width: crate::ir::FloatWidth,
) -> Result<()> {
    let rhs = pop(stack)?;
    let lhs = pop(stack)?;
    stack.push(f.append(block, InstrKind::FloatBinary { op, width, lhs, rhs }));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{IrFunction, IrModule, IrOp, OpWidth};
    use crate::types::TypeBundle;

    fn function_of(code: Vec<IrOp>) -> IrFunction {
        let bundle = TypeBundle::new();
        IrFunction {
            name: "t".into(),
            ty: bundle.signed_int(),
            parameters: Vec::new(),
            locals: PrimaryMap::new(),
            code,
            source_map: Vec::new(),
            internal: false,
            variadic: false,
        }
    }

    fn build(code: Vec<IrOp>) -> Result<OptFunction> {
        let mut module = IrModule::new();
        let bundle = TypeBundle::new();
        let func = function_of(code);
        module.functions.push(func.clone());
        let built = build_module(&module, &bundle)?;
        let function = build_function(&module, &func, &bundle)?;
        assert_eq!(built.functions.len(), 1);
        Ok(function)
    }

    fn phi_refs(f: &OptFunction, block: BlockId) -> Vec<InstrRef> {
        f.blocks[block]
            .instrs
            .iter()
            .copied()
            .filter(|&instr| matches!(f.instrs[instr].kind, InstrKind::Phi(_)))
            .collect()
    }

    #[test]
    fn straight_line_code_forms_one_block() {
        let f = build(vec![
            IrOp::IntConst(1),
            IrOp::IntConst(2),
            IrOp::IntAdd(OpWidth::W32),
            IrOp::Return,
        ])
        .unwrap();
        assert_eq!(f.blocks.len(), 1);
        assert!(f.phis.is_empty());
        let terminator = f.terminator(f.entry).unwrap();
        let InstrKind::Return { value: Some(sum) } = f.instrs[terminator].kind else {
            panic!("expected a value return");
        };
        assert!(matches!(f.instrs[sum].kind, InstrKind::IntBinary { .. }));
    }

    #[test]
    fn diamond_merge_carries_the_value_through_a_phi() {
        // cond ? 1 : 2, with the selected value returned from the merge.
        let f = build(vec![
            IrOp::IntConst(7),    // 0: condition
            IrOp::BranchZero(4),  // 1
            IrOp::IntConst(1),    // 2: then value
            IrOp::Jump(5),        // 3
            IrOp::IntConst(2),    // 4: else value, falls through
            IrOp::Return,         // 5: merge
        ])
        .unwrap();
        assert_eq!(f.blocks.len(), 4);
        assert_eq!(f.phis.len(), 1);

        // The merge block opens with the phi and returns it.
        let merge = f.instrs[f
            .blocks
            .values()
            .flat_map(|b| b.instrs.iter().copied())
            .find(|&i| matches!(f.instrs[i].kind, InstrKind::Return { value: Some(_) }))
            .unwrap()]
        .block;
        let phis = phi_refs(&f, merge);
        assert_eq!(phis.len(), 1);
        assert_eq!(f.blocks[merge].instrs.first().copied(), Some(phis[0]));
        let InstrKind::Return { value: Some(returned) } =
            f.instrs[*f.blocks[merge].instrs.last().unwrap()].kind
        else {
            panic!("merge block does not return a value");
        };
        assert_eq!(returned, phis[0]);

        // One incoming value per predecessor, and they are the two arms.
        let InstrKind::Phi(phi) = f.instrs[phis[0]].kind else {
            panic!("leading instruction is not a phi");
        };
        let links = &f.phis[phi].links;
        assert_eq!(links.len(), 2);
        let mut incoming: Vec<i64> = links
            .iter()
            .map(|&(_, value)| match f.instrs[value].kind {
                InstrKind::IntConst(v) => v,
                ref other => panic!("unexpected incoming {other:?}"),
            })
            .collect();
        incoming.sort_unstable();
        assert_eq!(incoming, vec![1, 2]);
        let preds: Vec<BlockId> = links.iter().map(|&(pred, _)| pred).collect();
        assert_ne!(preds[0], preds[1]);
        for &(pred, _) in links {
            assert!(f.successors(pred).contains(&merge));
        }
    }

    #[test]
    fn loop_back_edge_reaches_the_header_without_phis() {
        // do { } while (1); followed by an unreachable return.
        let f = build(vec![
            IrOp::Nop,              // 0: preheader
            IrOp::IntConst(1),      // 1: body/header
            IrOp::BranchNonZero(1), // 2: back edge
            IrOp::ReturnVoid,       // 3: exit
        ])
        .unwrap();
        assert_eq!(f.blocks.len(), 3);
        // Back edges carry empty stacks, so no phi materializes.
        assert!(f.phis.is_empty());
        let header = f
            .blocks
            .keys()
            .find(|&b| {
                f.blocks[b]
                    .instrs
                    .iter()
                    .any(|&i| matches!(f.instrs[i].kind, InstrKind::Branch { .. }))
            })
            .unwrap();
        // The branch targets the header itself and the exit block.
        let successors = f.successors(header);
        assert!(successors.contains(&header));
        assert_eq!(successors.len(), 2);
    }

    #[test]
    fn mismatched_merge_stack_depth_is_an_invariant_violation() {
        // One arm reaches the join with a value, the other with none.
        let error = build(vec![
            IrOp::IntConst(9),   // 0: condition
            IrOp::BranchZero(4), // 1
            IrOp::IntConst(1),   // 2: pushes a value
            IrOp::Jump(5),       // 3: depth 1 into the join
            IrOp::Jump(5),       // 4: depth 0 into the join
            IrOp::ReturnVoid,    // 5
        ])
        .unwrap_err();
        assert!(matches!(error, Error::Internal(_)), "{error:?}");
    }

    #[test]
    fn operand_stack_underflow_is_reported() {
        let error = build(vec![IrOp::Pop, IrOp::ReturnVoid]).unwrap_err();
        assert!(matches!(error, Error::Internal(_)), "{error:?}");
    }

    #[test]
    fn statement_locations_reach_the_instructions() {
        let mut func = function_of(vec![IrOp::IntConst(3), IrOp::Return]);
        func.source_map.push((0, crate::source::SourceLocation::new(12, 1)));
        let module = IrModule::new();
        let bundle = TypeBundle::new();
        let f = build_function(&module, &func, &bundle).unwrap();
        for instr in f.instrs.values() {
            assert_eq!(instr.location, crate::source::SourceLocation::new(12, 1));
        }
    }
}
