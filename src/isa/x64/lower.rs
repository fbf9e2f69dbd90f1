//! Instruction selection.
//!
//! Walks the optimizer IR in schedule order and emits asmcmp instructions.
//! Every SSA value gets a virtual register of the appropriate bank; ABI
//! boundary values are linked into fixed-register vregs so the allocator
//! sees the constraints; `long double` values flow through the x87 stack
//! model; bit-precise and atomic operations that have no inline lowering
//! become calls into their runtime libraries.

use super::abi::{classify_return, EightbyteClass, FunctionAbi, ParamLocation, ReturnLocation};
use super::asmcmp::{
    AsmcmpContext, Cond, IndirectBase, LabelId, Opcode, OperandVariant, Preallocation, StashData,
    Value, VregId, VregKind,
};
use super::frame::StackFrame;
use super::regs::{PhysReg, ABI_INTEGER_ARGS, ABI_SSE_ARGS};
use super::x87::X87Stack;
use crate::entity::{EntityRef, PrimaryMap, SecondaryMap};
use crate::ir::translate::encode_f80;
use crate::ir::{
    BitintOpKind, CmpOp, FloatWidth, IrModule, LocalDecl, LocalId, OpWidth, OverflowOp,
};
use crate::opt::{
    BlockId, CallNode, Callee, CodeAnalysis, FloatBinaryOp, InstrKind, InstrRef, IntBinaryOp,
    IntUnaryOp, OptFunction,
};
use crate::result::{Error, Result};
use crate::types::{Type, TypeBundle, TypeId};
use log::trace;
use rustc_hash::FxHashMap;

/// Result of lowering one function.
pub struct LoweredFunction {
    /// The asmcmp stream.
    pub ctx: AsmcmpContext,
    /// Frame requirements accumulated during lowering.
    pub frame: StackFrame,
    /// Local slots, including staging temporaries added by lowering.
    pub locals: PrimaryMap<LocalId, LocalDecl>,
}

/// Lower `func` into asmcmp.
pub fn lower_function(
    module: &IrModule,
    bundle: &TypeBundle,
    traits: &crate::target::TypeTraits,
    func: &OptFunction,
    analysis: &CodeAnalysis,
) -> Result<LoweredFunction> {
    let abi = FunctionAbi::of(bundle, traits, func.ty)?;
    let mut codegen = FunctionCodegen {
        module,
        bundle,
        traits,
        func,
        analysis,
        ctx: AsmcmpContext::new(func.name.clone()),
        frame: StackFrame::new(),
        locals: func.locals.clone(),
        x87: X87Stack::new(),
        vregs: FxHashMap::default(),
        block_labels: FxHashMap::default(),
        use_counts: SecondaryMap::new(),
        fenv_slots: FxHashMap::default(),
        x87_alias: FxHashMap::default(),
        last_f80_load: None,
        abi,
        next_vblock: 0,
    };
    codegen.run()?;
    Ok(LoweredFunction {
        ctx: codegen.ctx,
        frame: codegen.frame,
        locals: codegen.locals,
    })
}

struct FunctionCodegen<'a> {
    module: &'a IrModule,
    bundle: &'a TypeBundle,
    traits: &'a crate::target::TypeTraits,
    func: &'a OptFunction,
    analysis: &'a CodeAnalysis,
    ctx: AsmcmpContext,
    frame: StackFrame,
    locals: PrimaryMap<LocalId, LocalDecl>,
    x87: X87Stack,
    vregs: FxHashMap<InstrRef, VregId>,
    block_labels: FxHashMap<BlockId, LabelId>,
    use_counts: SecondaryMap<InstrRef, u32>,
    fenv_slots: FxHashMap<InstrRef, LocalId>,
    x87_alias: FxHashMap<InstrRef, InstrRef>,
    last_f80_load: Option<InstrRef>,
    abi: FunctionAbi,
    next_vblock: u64,
}

impl FunctionCodegen<'_> {
    fn run(&mut self) -> Result<()> {
        trace!("lowering {}", self.func.name);
        self.count_uses();
        for &block in &self.analysis.block_order {
            let label = self.ctx.new_label();
            self.block_labels.insert(block, label);
        }
        // The entry label carries the public function symbol; emission
        // prints the alias, and the external-dependency flag keeps the
        // label alive through the elimination pass.
        let entry = self.ctx.new_label();
        self.ctx.labels[entry].external_dependencies = true;
        let name = self.ctx.function_name.clone();
        self.ctx.labels[entry].public.push(name);
        self.ctx.bind_label(entry);
        self.ctx.push0(Opcode::FunctionPrologue);
        self.lower_entry()?;
        let order = self.analysis.block_order.clone();
        for (position, &block) in order.iter().enumerate() {
            let label = self.block_labels[&block];
            self.ctx.bind_label(label);
            let next = order.get(position + 1).copied();
            self.lower_block(block, next)?;
        }
        Ok(())
    }

    fn count_uses(&mut self) {
        self.use_counts.resize(self.func.instrs.len());
        for instr in self.func.instrs.values() {
            for used in instr_operands(&instr.kind) {
                self.use_counts[used] += 1;
            }
        }
        for phi in self.func.phis.values() {
            for &(_, value) in &phi.links {
                self.use_counts[value] += 1;
            }
        }
        for call in self.func.calls.values() {
            for &arg in &call.args {
                self.use_counts[arg] += 1;
            }
            if let Some(space) = call.return_space {
                self.use_counts[space] += 1;
            }
            if let Callee::Indirect(callee) = call.callee {
                self.use_counts[callee] += 1;
            }
        }
    }

    // Parameter moves, hidden return pointer, vararg save area.
    fn lower_entry(&mut self) -> Result<()> {
        if self.abi.ret == ReturnLocation::Memory {
            self.frame.implicit_parameter = true;
            self.ctx.push2(
                Opcode::Mov,
                Value::Indirect {
                    base: IndirectBase::ImplicitParameter,
                    offset: 0,
                    variant: OperandVariant::B64,
                },
                Value::PhysReg(PhysReg::Rdi),
            );
        }
        if self.func.variadic {
            self.frame.vararg_save = true;
            for (index, &reg) in ABI_INTEGER_ARGS.iter().enumerate() {
                self.ctx.push2(
                    Opcode::Mov,
                    Value::Indirect {
                        base: IndirectBase::VarargSave,
                        offset: (index * 8) as i64,
                        variant: OperandVariant::B64,
                    },
                    Value::PhysReg(reg),
                );
            }
            for (index, &reg) in ABI_SSE_ARGS.iter().enumerate() {
                self.ctx.push2(
                    Opcode::Movq,
                    Value::Indirect {
                        base: IndirectBase::VarargSave,
                        offset: (super::abi::VARARG_GP_SAVE_SIZE as usize + index * 16) as i64,
                        variant: OperandVariant::B64,
                    },
                    Value::PhysReg(reg),
                );
            }
        }
        let parameters: Vec<(LocalId, ParamLocation)> = self
            .func
            .parameters
            .iter()
            .copied()
            .zip(self.abi.parameters.iter().cloned())
            .collect();
        for (local, location) in parameters {
            match location {
                ParamLocation::Integer(reg) => {
                    self.ctx.push2(
                        Opcode::Mov,
                        local_operand(local, 0, OperandVariant::B64),
                        Value::PhysReg(reg),
                    );
                }
                ParamLocation::Sse(reg) => {
                    self.ctx.push2(
                        Opcode::Movq,
                        local_operand(local, 0, OperandVariant::B64),
                        Value::PhysReg(reg),
                    );
                }
                ParamLocation::Multiple(parts) => {
                    for (index, (_, reg)) in parts.iter().enumerate() {
                        let opcode = if reg.is_xmm() { Opcode::Movq } else { Opcode::Mov };
                        self.ctx.push2(
                            opcode,
                            local_operand(local, (index * 8) as i64, OperandVariant::B64),
                            Value::PhysReg(*reg),
                        );
                    }
                }
                ParamLocation::Stack { offset, size } => {
                    // Arguments live above the return address and saved rbp.
                    let mut copied = 0u64;
                    while copied < size {
                        self.ctx.push2(
                            Opcode::Mov,
                            Value::PhysReg(super::regs::GP_SCRATCH),
                            Value::Indirect {
                                base: IndirectBase::PhysReg(PhysReg::Rbp),
                                offset: 16 + (offset + copied) as i64,
                                variant: OperandVariant::B64,
                            },
                        );
                        self.ctx.push2(
                            Opcode::Mov,
                            local_operand(local, copied as i64, OperandVariant::B64),
                            Value::PhysReg(super::regs::GP_SCRATCH),
                        );
                        copied += 8;
                    }
                }
            }
        }
        Ok(())
    }

    fn lower_block(&mut self, block: BlockId, next: Option<BlockId>) -> Result<()> {
        let instrs = self.func.blocks[block].instrs.clone();
        for &instr in &instrs {
            let kind = self.func.instrs[instr].kind.clone();
            self.ctx.set_location(self.func.instrs[instr].location);
            if kind.is_terminator() {
                // Returns manage the x87 state themselves (reorder to the
                // top, drop the rest); branches spill it.
                if !matches!(kind, InstrKind::Return { .. }) {
                    self.flush_x87()?;
                }
                self.link_phis(block, &kind)?;
                self.lower_terminator(instr, &kind, next)?;
            } else {
                self.lower_instr(instr, &kind)?;
            }
        }
        Ok(())
    }

    fn vreg_kind_for(&self, kind: &InstrKind) -> VregKind {
        match kind {
            InstrKind::F32Const(_)
            | InstrKind::F64Const(_)
            | InstrKind::IntToFloat {
                to: FloatWidth::F32 | FloatWidth::F64,
                ..
            }
            | InstrKind::FloatConvert {
                to: FloatWidth::F32 | FloatWidth::F64,
                ..
            }
            | InstrKind::LoadFloat {
                width: FloatWidth::F32 | FloatWidth::F64,
                ..
            }
            | InstrKind::FloatBinary {
                width: FloatWidth::F32 | FloatWidth::F64,
                ..
            }
            | InstrKind::FloatNeg {
                width: FloatWidth::F32 | FloatWidth::F64,
                ..
            } => VregKind::FloatingPoint,
            InstrKind::LongDoubleConst(_)
            | InstrKind::IntToFloat {
                to: FloatWidth::F80,
                ..
            }
            | InstrKind::FloatConvert {
                to: FloatWidth::F80,
                ..
            }
            | InstrKind::LoadFloat {
                width: FloatWidth::F80,
                ..
            }
            | InstrKind::FloatBinary {
                width: FloatWidth::F80,
                ..
            }
            | InstrKind::FloatNeg {
                width: FloatWidth::F80,
                ..
            } => VregKind::LongDouble,
            InstrKind::Phi(phi) => {
                let links = &self.func.phis[*phi].links;
                links
                    .first()
                    .map(|&(_, value)| self.vreg_kind_for(&self.func.instrs[value].kind))
                    .unwrap_or(VregKind::GeneralPurpose)
            }
            InstrKind::Call(call) => {
                let node = &self.func.calls[*call];
                if node.return_space.is_some() {
                    return VregKind::GeneralPurpose;
                }
                match self.call_return_location(node) {
                    Ok(ReturnLocation::Sse(_)) => VregKind::FloatingPoint,
                    Ok(ReturnLocation::X87) => VregKind::LongDouble,
                    _ => VregKind::GeneralPurpose,
                }
            }
            InstrKind::Select { on_true, .. } => self.vreg_kind_for(&self.func.instrs[*on_true].kind),
            _ => VregKind::GeneralPurpose,
        }
    }

    fn vreg_of(&mut self, instr: InstrRef) -> VregId {
        if let Some(&vreg) = self.vregs.get(&instr) {
            return vreg;
        }
        let kind = self.vreg_kind_for(&self.func.instrs[instr].kind);
        let vreg = self.ctx.new_vreg(kind);
        self.vregs.insert(instr, vreg);
        vreg
    }

    /// Operand for a value; address-producing and constant instructions
    /// rematerialize at each use so their definition dominates it.
    fn operand(&mut self, instr: InstrRef) -> Result<Value> {
        let kind = self.func.instrs[instr].kind.clone();
        match kind {
            InstrKind::LocalAddr(local) => {
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::Lea,
                    Value::vreg(vreg),
                    local_operand(local, 0, OperandVariant::Default),
                );
                Ok(Value::vreg(vreg))
            }
            InstrKind::GlobalAddr { ref name, offset } => {
                let vreg = self.vreg_of(instr);
                self.ctx.declare_external(name);
                self.ctx.push2(
                    Opcode::Lea,
                    Value::vreg(vreg),
                    Value::RipIndirect {
                        target: super::asmcmp::RipTarget::External(name.clone()),
                        variant: OperandVariant::Default,
                        position: super::asmcmp::SymbolPosition::Absolute,
                    },
                );
                if offset != 0 {
                    self.ctx
                        .push2(Opcode::Add, Value::vreg(vreg), Value::SignedImm(offset));
                }
                Ok(Value::vreg(vreg))
            }
            InstrKind::StringAddr(id) => {
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::Lea,
                    Value::vreg(vreg),
                    Value::RipIndirect {
                        target: super::asmcmp::RipTarget::External(string_symbol(id)),
                        variant: OperandVariant::Default,
                        position: super::asmcmp::SymbolPosition::Absolute,
                    },
                );
                Ok(Value::vreg(vreg))
            }
            InstrKind::BigIntConst(id) => {
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::Lea,
                    Value::vreg(vreg),
                    Value::RipIndirect {
                        target: super::asmcmp::RipTarget::External(bigint_symbol(id)),
                        variant: OperandVariant::Default,
                        position: super::asmcmp::SymbolPosition::Absolute,
                    },
                );
                Ok(Value::vreg(vreg))
            }
            InstrKind::IntConst(value) => {
                let vreg = self.vreg_of(instr);
                self.emit_move_imm(vreg, value);
                Ok(Value::vreg(vreg))
            }
            InstrKind::UIntConst(value) => {
                let vreg = self.vreg_of(instr);
                self.emit_move_imm(vreg, value as i64);
                Ok(Value::vreg(vreg))
            }
            _ => Ok(Value::vreg(self.vreg_of(instr))),
        }
    }

    /// Immediate operand when the value is a small constant; otherwise a
    /// register operand.
    fn imm_or_operand(&mut self, instr: InstrRef) -> Result<Value> {
        match self.func.instrs[instr].kind {
            InstrKind::IntConst(value) if i32::try_from(value).is_ok() => {
                Ok(Value::SignedImm(value))
            }
            InstrKind::UIntConst(value) if u32::try_from(value).is_ok() => {
                Ok(Value::SignedImm(value as i64))
            }
            _ => self.operand(instr),
        }
    }

    /// Memory operand for an address value, folding direct local/global
    /// address producers into the addressing mode.
    fn memory_operand(&mut self, addr: InstrRef, variant: OperandVariant) -> Result<Value> {
        match self.func.instrs[addr].kind.clone() {
            InstrKind::LocalAddr(local) => Ok(local_operand(local, 0, variant)),
            InstrKind::GlobalAddr { name, offset } if offset == 0 => {
                self.ctx.declare_external(&name);
                Ok(Value::RipIndirect {
                    target: super::asmcmp::RipTarget::External(name),
                    variant,
                    position: super::asmcmp::SymbolPosition::Absolute,
                })
            }
            _ => {
                let base = self.operand(addr)?;
                let vreg = base
                    .as_vreg()
                    .ok_or(Error::Internal("address operand without a register"))?;
                Ok(Value::Indirect {
                    base: IndirectBase::Vreg(vreg),
                    offset: 0,
                    variant,
                })
            }
        }
    }

    fn emit_move_imm(&mut self, vreg: VregId, value: i64) {
        if i32::try_from(value).is_ok() {
            self.ctx
                .push2(Opcode::Mov, Value::vreg(vreg), Value::SignedImm(value));
        } else {
            self.ctx
                .push2(Opcode::Movabs, Value::vreg(vreg), Value::SignedImm(value));
        }
    }

    fn fixed(&mut self, reg: PhysReg) -> VregId {
        self.ctx.new_vreg(VregKind::FixedRegister(reg))
    }

    fn scratch_local(&mut self, size: u64, alignment: u64) -> LocalId {
        self.locals.push(LocalDecl {
            size,
            alignment,
            ty: None,
        })
    }

    fn flush_x87(&mut self) -> Result<()> {
        let vregs = &self.vregs;
        let mut backing = |instr: InstrRef| {
            Value::Vreg {
                vreg: vregs[&instr],
                variant: OperandVariant::B80,
            }
        };
        self.x87.flush(&mut self.ctx, &mut backing)
    }

    fn x87_ensure(&mut self, room: usize) -> Result<()> {
        let vregs = &self.vregs;
        let mut backing = |instr: InstrRef| Value::Vreg {
            vreg: vregs[&instr],
            variant: OperandVariant::B80,
        };
        self.x87.ensure(&mut self.ctx, &mut backing, room)
    }

    fn x87_bring_to_top(&mut self, instr: InstrRef) -> Result<()> {
        let vregs = &self.vregs;
        let mut backing = |instr: InstrRef| Value::Vreg {
            vreg: vregs[&instr],
            variant: OperandVariant::B80,
        };
        self.x87.bring_to_top(&mut self.ctx, &mut backing, instr)
    }

    // Ensure the value also exists in its memory backing, spilling from the
    // x87 stack when it currently lives there.
    fn x87_materialize(&mut self, instr: InstrRef) -> Result<Value> {
        let vreg = self.vreg_of(instr);
        if self.x87.position_of(instr).is_some() {
            self.x87_bring_to_top(instr)?;
            self.ctx.push1(
                Opcode::Fstp,
                Value::vreg_sized(vreg, OperandVariant::B80),
            );
            self.x87.consume_by(instr, instr)?;
            if self.use_counts[instr] > 1 {
                // Keep a live copy on the stack for remaining consumers.
                self.x87_ensure(1)?;
                self.ctx.push1(
                    Opcode::Fld,
                    Value::vreg_sized(vreg, OperandVariant::B80),
                );
                self.x87.push(instr)?;
            }
        }
        Ok(Value::vreg_sized(vreg, OperandVariant::B80))
    }

    fn phis_of(&self, block: BlockId) -> Vec<(InstrRef, crate::opt::PhiRef)> {
        self.func.blocks[block]
            .instrs
            .iter()
            .filter_map(|&instr| match self.func.instrs[instr].kind {
                InstrKind::Phi(phi) => Some((instr, phi)),
                _ => None,
            })
            .collect()
    }

    fn link_phis(&mut self, block: BlockId, terminator: &InstrKind) -> Result<()> {
        let successors: Vec<BlockId> = match terminator {
            InstrKind::Jump { target } => vec![*target],
            InstrKind::Branch {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            _ => Vec::new(),
        };
        for successor in successors {
            for (phi_instr, phi) in self.phis_of(successor) {
                let incoming = self.func.phis[phi]
                    .incoming(block)
                    .ok_or(Error::Internal("phi is missing a predecessor link"))?;
                let dst = self.vreg_of(phi_instr);
                let src = self
                    .operand(incoming)?
                    .as_vreg()
                    .ok_or(Error::Internal("phi input without a register"))?;
                self.ctx.push2(
                    Opcode::VirtualRegisterLink,
                    Value::vreg(dst),
                    Value::vreg(src),
                );
                self.ctx
                    .preallocate(dst, Preallocation::SameAs(src));
            }
        }
        Ok(())
    }

    fn lower_terminator(
        &mut self,
        _instr: InstrRef,
        kind: &InstrKind,
        next: Option<BlockId>,
    ) -> Result<()> {
        match kind {
            InstrKind::Jump { target } => {
                if next != Some(*target) {
                    let label = self.block_labels[target];
                    self.ctx.push1(Opcode::Jmp, Value::InternalLabel(label));
                }
            }
            InstrKind::Branch {
                condition,
                on_true,
                on_false,
            } => {
                let condition = self.operand(*condition)?;
                self.ctx
                    .push2(Opcode::Test, condition.clone(), condition);
                let true_label = self.block_labels[on_true];
                self.ctx
                    .push1(Opcode::Jcc(Cond::Ne), Value::InternalLabel(true_label));
                if next != Some(*on_false) {
                    let false_label = self.block_labels[on_false];
                    self.ctx.push1(Opcode::Jmp, Value::InternalLabel(false_label));
                }
            }
            InstrKind::Return { value } => {
                self.lower_return(*value)?;
            }
            _ => return Err(Error::Internal("non-terminator in terminator position")),
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<InstrRef>) -> Result<()> {
        match self.abi.ret.clone() {
            ReturnLocation::None => {
                self.drop_x87_stack();
            }
            ReturnLocation::Integer(reg) => match value {
                Some(value) => {
                    self.drop_x87_stack();
                    let rax = self.fixed(reg);
                    let src = self.operand(value)?;
                    self.ctx
                        .push2(Opcode::VirtualRegisterLink, Value::vreg(rax), src);
                }
                None => {
                    self.drop_x87_stack();
                    self.ctx.push2(
                        Opcode::Xor,
                        Value::PhysReg(reg),
                        Value::PhysReg(reg),
                    );
                }
            },
            ReturnLocation::Sse(reg) => {
                self.drop_x87_stack();
                if let Some(value) = value {
                    let xmm = self.fixed(reg);
                    let src = self.operand(value)?;
                    self.ctx
                        .push2(Opcode::VirtualRegisterLink, Value::vreg(xmm), src);
                } else {
                    self.ctx
                        .push2(Opcode::Pxor, Value::PhysReg(reg), Value::PhysReg(reg));
                }
            }
            ReturnLocation::X87 => {
                if let Some(value) = value {
                    let value = self.resolve_x87(value);
                    if self.x87.position_of(value).is_some() {
                        // Reorder to the top and pop everything below it.
                        let vregs = &self.vregs;
                        let mut backing = |instr: InstrRef| Value::Vreg {
                            vreg: vregs[&instr],
                            variant: OperandVariant::B80,
                        };
                        self.x87.isolate_top(&mut self.ctx, &mut backing, value)?;
                    } else {
                        self.drop_x87_stack();
                        let vreg = self.vreg_of(value);
                        self.ctx.push1(
                            Opcode::Fld,
                            Value::vreg_sized(vreg, OperandVariant::B80),
                        );
                    }
                } else {
                    self.drop_x87_stack();
                    self.ctx.push0(Opcode::Fldz);
                }
            }
            ReturnLocation::ComplexX87 => {
                self.drop_x87_stack();
                if let Some(value) = value {
                    let addr = self.memory_operand(value, OperandVariant::B80)?;
                    let imag = offset_operand(addr.clone(), 16);
                    self.ctx.push1(Opcode::Fld, imag);
                    self.ctx.push1(Opcode::Fld, addr);
                }
            }
            ReturnLocation::Multiple(parts) => {
                self.drop_x87_stack();
                if let Some(value) = value {
                    let addr = self.memory_operand(value, OperandVariant::B64)?;
                    for (index, (class, reg)) in parts.iter().enumerate() {
                        let source = offset_operand(addr.clone(), (index * 8) as i64);
                        match class {
                            EightbyteClass::Integer => {
                                self.ctx.push2(Opcode::Mov, Value::PhysReg(*reg), source);
                            }
                            EightbyteClass::Sse => {
                                self.ctx.push2(Opcode::Movq, Value::PhysReg(*reg), source);
                            }
                            _ => {}
                        }
                    }
                }
            }
            ReturnLocation::Memory => {
                self.drop_x87_stack();
                if let Some(value) = value {
                    let return_ty = self.return_type()?;
                    let size = crate::types::type_layout(self.bundle, self.traits, return_ty)?.size;
                    let suppress_copy = matches!(
                        self.func.instrs[value].kind,
                        InstrKind::LocalAddr(local)
                            if self.frame.locals.return_space() == Some(local)
                    );
                    if !suppress_copy {
                        let rdi = self.fixed(PhysReg::Rdi);
                        let rsi = self.fixed(PhysReg::Rsi);
                        let rcx = self.fixed(PhysReg::Rcx);
                        self.ctx.push2(
                            Opcode::Mov,
                            Value::vreg(rdi),
                            Value::Indirect {
                                base: IndirectBase::ImplicitParameter,
                                offset: 0,
                                variant: OperandVariant::B64,
                            },
                        );
                        let src = self.operand(value)?;
                        self.ctx
                            .push2(Opcode::VirtualRegisterLink, Value::vreg(rsi), src);
                        self.ctx
                            .push2(Opcode::Mov, Value::vreg(rcx), Value::SignedImm(size as i64));
                        self.ctx.push0(Opcode::Cld);
                        self.ctx.push0(Opcode::RepMovsb);
                    }
                    self.ctx.push2(
                        Opcode::Mov,
                        Value::PhysReg(PhysReg::Rax),
                        Value::Indirect {
                            base: IndirectBase::ImplicitParameter,
                            offset: 0,
                            variant: OperandVariant::B64,
                        },
                    );
                }
            }
        }
        self.ctx.push0(Opcode::FunctionEpilogue);
        self.ctx.push0(Opcode::Ret);
        Ok(())
    }

    // Returning code paths drop whatever the x87 model still tracks.
    fn drop_x87_stack(&mut self) {
        while let Some(top) = self.x87.top() {
            self.ctx.push1(Opcode::Fstp, Value::X87(0));
            let _ = self.x87.consume_by(top, top);
        }
    }

    fn return_type(&self) -> Result<TypeId> {
        match self.bundle.get(self.bundle.unqualified(self.func.ty)) {
            Type::Function(function) => Ok(function.return_type),
            _ => Err(Error::Internal("function without function type")),
        }
    }

    fn call_return_location(&self, node: &CallNode) -> Result<ReturnLocation> {
        match node.signature {
            Some(signature) => {
                let return_ty = match self.bundle.get(self.bundle.unqualified(signature)) {
                    Type::Function(function) => function.return_type,
                    _ => return Err(Error::Internal("call signature is not a function")),
                };
                classify_return(self.bundle, self.traits, return_ty)
            }
            None => Ok(ReturnLocation::None),
        }
    }

    // Do the two instructions load the same `long double` location?
    fn equivalent_f80_load(&self, lhs: InstrRef, rhs: InstrRef) -> bool {
        match (&self.func.instrs[lhs].kind, &self.func.instrs[rhs].kind) {
            (
                InstrKind::LoadFloat {
                    addr: a1,
                    width: FloatWidth::F80,
                    volatile: false,
                },
                InstrKind::LoadFloat {
                    addr: a2,
                    width: FloatWidth::F80,
                    volatile: false,
                },
            ) => self.func.instrs[*a1].kind == self.func.instrs[*a2].kind,
            _ => false,
        }
    }

    /// Canonical reference after x87 load aliasing.
    fn resolve_x87(&self, instr: InstrRef) -> InstrRef {
        let mut current = instr;
        while let Some(&next) = self.x87_alias.get(&current) {
            current = next;
        }
        current
    }

    fn lower_instr(&mut self, instr: InstrRef, kind: &InstrKind) -> Result<()> {
        // Any store or call invalidates load aliasing.
        match kind {
            InstrKind::Store { .. }
            | InstrKind::StoreFloat { .. }
            | InstrKind::CopyMemory { .. }
            | InstrKind::ZeroMemory { .. }
            | InstrKind::AtomicStore { .. }
            | InstrKind::AtomicCopyMemory { .. }
            | InstrKind::Call(_)
            | InstrKind::BitintOp { .. }
            | InstrKind::BitintUnary { .. }
            | InstrKind::BitintShift { .. }
            | InstrKind::BitintCast { .. }
            | InstrKind::BitintFromInt { .. }
            | InstrKind::InlineAsm { .. } => {
                self.last_f80_load = None;
            }
            _ => {}
        }
        match kind {
            // Constants and addresses materialize at their uses.
            InstrKind::IntConst(_)
            | InstrKind::UIntConst(_)
            | InstrKind::LocalAddr(_)
            | InstrKind::GlobalAddr { .. }
            | InstrKind::StringAddr(_)
            | InstrKind::BigIntConst(_)
            | InstrKind::Phi(_) => {}
            InstrKind::F32Const(value) => {
                let vreg = self.vreg_of(instr);
                let tmp = self.ctx.new_vreg(VregKind::GeneralPurpose);
                self.ctx.push2(
                    Opcode::Mov,
                    Value::vreg(tmp),
                    Value::SignedImm(i64::from(value.to_bits())),
                );
                self.ctx.push2(Opcode::Movq, Value::vreg(vreg), Value::vreg(tmp));
            }
            InstrKind::F64Const(value) => {
                let vreg = self.vreg_of(instr);
                let tmp = self.ctx.new_vreg(VregKind::GeneralPurpose);
                let bits = value.to_bits() as i64;
                if i32::try_from(bits).is_ok() {
                    self.ctx
                        .push2(Opcode::Mov, Value::vreg(tmp), Value::SignedImm(bits));
                } else {
                    self.ctx
                        .push2(Opcode::Movabs, Value::vreg(tmp), Value::SignedImm(bits));
                }
                self.ctx.push2(Opcode::Movq, Value::vreg(vreg), Value::vreg(tmp));
            }
            InstrKind::LongDoubleConst(value) => {
                let vreg = self.vreg_of(instr);
                let image = encode_f80(*value);
                let mut low_bytes = [0u8; 8];
                low_bytes.copy_from_slice(&image[0..8]);
                let low = i64::from_le_bytes(low_bytes);
                let high = u16::from_le_bytes([image[8], image[9]]);
                let tmp = self.ctx.new_vreg(VregKind::GeneralPurpose);
                if i32::try_from(low).is_ok() {
                    self.ctx
                        .push2(Opcode::Mov, Value::vreg(tmp), Value::SignedImm(low));
                } else {
                    self.ctx
                        .push2(Opcode::Movabs, Value::vreg(tmp), Value::SignedImm(low));
                }
                self.ctx.push2(
                    Opcode::Mov,
                    Value::vreg_sized(vreg, OperandVariant::B64),
                    Value::vreg(tmp),
                );
                self.ctx.push2(
                    Opcode::Mov,
                    Value::vreg(tmp),
                    Value::SignedImm(i64::from(high)),
                );
                self.ctx.push2(
                    Opcode::Mov,
                    offset_operand(Value::vreg_sized(vreg, OperandVariant::B16), 8),
                    Value::vreg_sized(tmp, OperandVariant::B16),
                );
            }
            InstrKind::Load {
                addr,
                width,
                signed,
                ..
            } => {
                let vreg = self.vreg_of(instr);
                let source = self.memory_operand(*addr, variant_of(*width))?;
                match (width, signed) {
                    (OpWidth::W8 | OpWidth::W16, true) => {
                        self.ctx.push2(Opcode::Movsx, Value::vreg(vreg), source);
                    }
                    (OpWidth::W8 | OpWidth::W16, false) => {
                        self.ctx.push2(Opcode::Movzx, Value::vreg(vreg), source);
                    }
                    (OpWidth::W32, true) => {
                        self.ctx.push2(Opcode::Movsx, Value::vreg(vreg), source);
                    }
                    (OpWidth::W32, false) => {
                        self.ctx.push2(
                            Opcode::Mov,
                            Value::vreg_sized(vreg, OperandVariant::B32),
                            source,
                        );
                    }
                    (OpWidth::W64, _) => {
                        self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
                    }
                }
            }
            InstrKind::Store {
                addr, value, width, ..
            } => {
                let destination = self.memory_operand(*addr, variant_of(*width))?;
                let source = match self.func.instrs[*value].kind {
                    InstrKind::IntConst(v) if i32::try_from(v).is_ok() => Value::SignedImm(v),
                    _ => {
                        let vreg = self
                            .operand(*value)?
                            .as_vreg()
                            .ok_or(Error::Internal("store value without a register"))?;
                        Value::vreg_sized(vreg, variant_of(*width))
                    }
                };
                self.ctx.push2(Opcode::Mov, destination, source);
            }
            InstrKind::LoadFloat { addr, width, .. } => match width {
                FloatWidth::F32 => {
                    let vreg = self.vreg_of(instr);
                    let source = self.memory_operand(*addr, OperandVariant::FpSingle)?;
                    self.ctx.push2(Opcode::Movss, Value::vreg(vreg), source);
                }
                FloatWidth::F64 => {
                    let vreg = self.vreg_of(instr);
                    let source = self.memory_operand(*addr, OperandVariant::FpDouble)?;
                    self.ctx.push2(Opcode::Movsd, Value::vreg(vreg), source);
                }
                FloatWidth::F80 => {
                    // A repeated load of the same location while the first
                    // one still sits on top aliases it instead of pushing
                    // a second copy.
                    if let Some(previous) = self.last_f80_load {
                        if self.x87.top() == Some(previous)
                            && self.equivalent_f80_load(previous, instr)
                        {
                            self.x87_alias.insert(instr, previous);
                            return Ok(());
                        }
                    }
                    let _ = self.vreg_of(instr);
                    let source = self.memory_operand(*addr, OperandVariant::B80)?;
                    self.x87_ensure(1)?;
                    self.ctx.push1(Opcode::Fld, source);
                    self.x87.push(instr)?;
                    self.last_f80_load = Some(instr);
                }
            },
            InstrKind::StoreFloat {
                addr, value, width, ..
            } => match width {
                FloatWidth::F32 => {
                    let destination = self.memory_operand(*addr, OperandVariant::FpSingle)?;
                    let source = self.operand(*value)?;
                    self.ctx.push2(Opcode::Movss, destination, source);
                }
                FloatWidth::F64 => {
                    let destination = self.memory_operand(*addr, OperandVariant::FpDouble)?;
                    let source = self.operand(*value)?;
                    self.ctx.push2(Opcode::Movsd, destination, source);
                }
                FloatWidth::F80 => {
                    // The value must transit the x87 stack; fstp into the
                    // destination, reloading when more uses remain.
                    let value = &self.resolve_x87(*value);
                    if self.x87.position_of(*value).is_none() {
                        let vreg = self.vreg_of(*value);
                        self.x87_ensure(1)?;
                        self.ctx
                            .push1(Opcode::Fld, Value::vreg_sized(vreg, OperandVariant::B80));
                        self.x87.push(*value)?;
                    }
                    self.x87_bring_to_top(*value)?;
                    if self.use_counts[*value] > 1 {
                        // Duplicate the top so the pop leaves a live copy.
                        self.x87_ensure(1)?;
                        self.ctx.push1(Opcode::Fld, Value::X87(0));
                        self.x87.push(*value)?;
                    }
                    let destination = self.memory_operand(*addr, OperandVariant::B80)?;
                    self.ctx.push1(Opcode::Fstp, destination);
                    self.x87.consume_by(*value, instr)?;
                }
            },
            InstrKind::CopyMemory { dst, src, size } => {
                self.emit_memory_copy(*dst, *src, *size)?;
            }
            InstrKind::ZeroMemory { addr, size } => {
                let rdi = self.fixed(PhysReg::Rdi);
                let rcx = self.fixed(PhysReg::Rcx);
                let rax = self.fixed(PhysReg::Rax);
                let dst = self.operand(*addr)?;
                self.ctx
                    .push2(Opcode::VirtualRegisterLink, Value::vreg(rdi), dst);
                self.ctx
                    .push2(Opcode::Mov, Value::vreg(rcx), Value::SignedImm(*size as i64));
                self.ctx.push2(
                    Opcode::Xor,
                    Value::vreg_sized(rax, OperandVariant::B32),
                    Value::vreg_sized(rax, OperandVariant::B32),
                );
                self.ctx.push0(Opcode::Cld);
                self.ctx.push0(Opcode::RepStosb);
            }
            InstrKind::BitExtract {
                value,
                offset,
                width,
                signed,
            } => {
                let vreg = self.vreg_of(instr);
                let source = self.operand(*value)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
                let left = 64 - offset - width;
                if left > 0 {
                    self.ctx
                        .push2(Opcode::Shl, Value::vreg(vreg), Value::SignedImm(left as i64));
                }
                let right = 64 - width;
                if right > 0 {
                    let opcode = if *signed { Opcode::Sar } else { Opcode::Shr };
                    self.ctx
                        .push2(opcode, Value::vreg(vreg), Value::SignedImm(right as i64));
                }
            }
            InstrKind::BitInsert {
                base,
                value,
                offset,
                width,
            } => {
                let vreg = self.vreg_of(instr);
                let mask = if *width >= 64 { !0u64 } else { (1u64 << width) - 1 };
                let field = self.ctx.new_vreg(VregKind::GeneralPurpose);
                let source = self.operand(*value)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(field), source);
                self.emit_and_mask(field, mask);
                if *offset > 0 {
                    self.ctx
                        .push2(Opcode::Shl, Value::vreg(field), Value::SignedImm(*offset as i64));
                }
                let base_value = self.operand(*base)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), base_value);
                self.emit_and_mask(vreg, !(mask << offset));
                self.ctx
                    .push2(Opcode::Or, Value::vreg(vreg), Value::vreg(field));
            }
            InstrKind::IntBinary { op, width, lhs, rhs } => {
                self.lower_int_binary(instr, *op, *width, *lhs, *rhs)?;
            }
            InstrKind::IntUnary { op, width, value } => {
                let vreg = self.vreg_of(instr);
                let source = self.operand(*value)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
                let variant = alu_variant(*width);
                let opcode = match op {
                    IntUnaryOp::Neg => Opcode::Neg,
                    IntUnaryOp::Not => Opcode::Not,
                };
                self.ctx.push1(opcode, Value::vreg_sized(vreg, variant));
                self.renormalize(vreg, *width, matches!(op, IntUnaryOp::Neg));
            }
            InstrKind::IntCmp { op, width: _, lhs, rhs } => {
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::Xor,
                    Value::vreg_sized(vreg, OperandVariant::B32),
                    Value::vreg_sized(vreg, OperandVariant::B32),
                );
                let lhs_value = self.operand(*lhs)?;
                let rhs_value = self.imm_or_operand(*rhs)?;
                self.ctx.push2(Opcode::Cmp, lhs_value, rhs_value);
                self.ctx.push1(
                    Opcode::SetCc(cond_of(*op)),
                    Value::vreg_sized(vreg, OperandVariant::B8),
                );
            }
            InstrKind::BoolNot { value } => {
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::Xor,
                    Value::vreg_sized(vreg, OperandVariant::B32),
                    Value::vreg_sized(vreg, OperandVariant::B32),
                );
                let source = self.operand(*value)?;
                self.ctx.push2(Opcode::Test, source.clone(), source);
                self.ctx.push1(
                    Opcode::SetCc(Cond::E),
                    Value::vreg_sized(vreg, OperandVariant::B8),
                );
            }
            InstrKind::SignExtend { width, value } => {
                let vreg = self.vreg_of(instr);
                let source = self.operand(*value)?;
                let src_vreg = source.as_vreg().ok_or(Error::Internal("extend of non-register"))?;
                self.ctx.push2(
                    Opcode::Movsx,
                    Value::vreg(vreg),
                    Value::vreg_sized(src_vreg, variant_of(*width)),
                );
            }
            InstrKind::ZeroExtend { width, value } => {
                let vreg = self.vreg_of(instr);
                let source = self.operand(*value)?;
                let src_vreg = source.as_vreg().ok_or(Error::Internal("extend of non-register"))?;
                match width {
                    OpWidth::W32 => {
                        self.ctx.push2(
                            Opcode::Mov,
                            Value::vreg_sized(vreg, OperandVariant::B32),
                            Value::vreg_sized(src_vreg, OperandVariant::B32),
                        );
                    }
                    OpWidth::W64 => {
                        self.ctx.push2(Opcode::Mov, Value::vreg(vreg), Value::vreg(src_vreg));
                    }
                    _ => {
                        self.ctx.push2(
                            Opcode::Movzx,
                            Value::vreg(vreg),
                            Value::vreg_sized(src_vreg, variant_of(*width)),
                        );
                    }
                }
            }
            InstrKind::FloatBinary { op, width, lhs, rhs } => {
                self.lower_float_binary(instr, *op, *width, *lhs, *rhs)?;
            }
            InstrKind::FloatNeg { width, value } => match width {
                FloatWidth::F80 => {
                    let value = &self.resolve_x87(*value);
                    if self.x87.position_of(*value).is_none() {
                        let vreg = self.vreg_of(*value);
                        self.x87_ensure(1)?;
                        self.ctx
                            .push1(Opcode::Fld, Value::vreg_sized(vreg, OperandVariant::B80));
                        self.x87.push(*value)?;
                    }
                    self.x87_bring_to_top(*value)?;
                    self.ctx.push0(Opcode::Fchs);
                    // The negation replaces the operand on the stack.
                    self.x87.consume_by(*value, instr)?;
                    let _ = self.vreg_of(instr);
                    self.x87.push(instr)?;
                }
                _ => {
                    let vreg = self.vreg_of(instr);
                    let (mov, xor_op, bits): (Opcode, Opcode, i64) = match width {
                        FloatWidth::F32 => (Opcode::Movss, Opcode::Xorps, 0x8000_0000),
                        _ => (Opcode::Movsd, Opcode::Xorpd, i64::MIN),
                    };
                    let source = self.operand(*value)?;
                    self.ctx.push2(mov, Value::vreg(vreg), source);
                    let gp = self.ctx.new_vreg(VregKind::GeneralPurpose);
                    let mask = self.ctx.new_vreg(VregKind::FloatingPoint);
                    if i32::try_from(bits).is_ok() {
                        self.ctx
                            .push2(Opcode::Mov, Value::vreg(gp), Value::SignedImm(bits));
                    } else {
                        self.ctx
                            .push2(Opcode::Movabs, Value::vreg(gp), Value::SignedImm(bits));
                    }
                    self.ctx.push2(Opcode::Movq, Value::vreg(mask), Value::vreg(gp));
                    self.ctx.push2(xor_op, Value::vreg(vreg), Value::vreg(mask));
                }
            },
            InstrKind::FloatCmp { op, width, lhs, rhs } => {
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::Xor,
                    Value::vreg_sized(vreg, OperandVariant::B32),
                    Value::vreg_sized(vreg, OperandVariant::B32),
                );
                match width {
                    FloatWidth::F80 => {
                        // Compare via the x87 stack: load rhs then lhs so
                        // fucomip compares st(0) (lhs) with st(1) (rhs).
                        let rhs = &self.resolve_x87(*rhs);
                        let lhs = &self.resolve_x87(*lhs);
                        for &operand in &[*rhs, *lhs] {
                            if self.x87.position_of(operand).is_none() {
                                let ovreg = self.vreg_of(operand);
                                self.x87_ensure(1)?;
                                self.ctx.push1(
                                    Opcode::Fld,
                                    Value::vreg_sized(ovreg, OperandVariant::B80),
                                );
                                self.x87.push(operand)?;
                            }
                        }
                        self.x87_bring_to_top(*lhs)?;
                        self.ctx.push1(Opcode::Fucomip, Value::X87(1));
                        self.x87.consume_by(*lhs, instr)?;
                        // fucomip pops only st(0); drop rhs as well.
                        self.x87_bring_to_top(*rhs)?;
                        self.ctx.push1(Opcode::Fstp, Value::X87(0));
                        self.x87.consume_by(*rhs, instr)?;
                    }
                    _ => {
                        let opcode = if *width == FloatWidth::F32 {
                            Opcode::Ucomiss
                        } else {
                            Opcode::Ucomisd
                        };
                        let lhs_value = self.operand(*lhs)?;
                        let rhs_value = self.operand(*rhs)?;
                        self.ctx.push2(opcode, lhs_value, rhs_value);
                    }
                }
                self.ctx.push1(
                    Opcode::SetCc(float_cond_of(*op)),
                    Value::vreg_sized(vreg, OperandVariant::B8),
                );
            }
            InstrKind::IntToFloat { to, signed: _, value } => match to {
                FloatWidth::F32 => {
                    let vreg = self.vreg_of(instr);
                    let source = self.operand(*value)?;
                    self.ctx.push2(Opcode::Cvtsi2ss, Value::vreg(vreg), source);
                }
                FloatWidth::F64 => {
                    let vreg = self.vreg_of(instr);
                    let source = self.operand(*value)?;
                    self.ctx.push2(Opcode::Cvtsi2sd, Value::vreg(vreg), source);
                }
                FloatWidth::F80 => {
                    let vreg = self.vreg_of(instr);
                    let source = self.operand(*value)?;
                    self.ctx.push2(
                        Opcode::Mov,
                        Value::vreg_sized(vreg, OperandVariant::B64),
                        source,
                    );
                    self.x87_ensure(1)?;
                    self.ctx
                        .push1(Opcode::Fild, Value::vreg_sized(vreg, OperandVariant::B64));
                    self.x87.push(instr)?;
                }
            },
            InstrKind::FloatToInt { from, signed: _, value } => {
                let vreg = self.vreg_of(instr);
                match from {
                    FloatWidth::F32 => {
                        let source = self.operand(*value)?;
                        self.ctx.push2(Opcode::Cvttss2si, Value::vreg(vreg), source);
                    }
                    FloatWidth::F64 => {
                        let source = self.operand(*value)?;
                        self.ctx.push2(Opcode::Cvttsd2si, Value::vreg(vreg), source);
                    }
                    FloatWidth::F80 => {
                        let value = &self.resolve_x87(*value);
                        if self.x87.position_of(*value).is_none() {
                            let ovreg = self.vreg_of(*value);
                            self.x87_ensure(1)?;
                            self.ctx
                                .push1(Opcode::Fld, Value::vreg_sized(ovreg, OperandVariant::B80));
                            self.x87.push(*value)?;
                        }
                        self.x87_bring_to_top(*value)?;
                        if self.use_counts[*value] > 1 {
                            self.x87_ensure(1)?;
                            self.ctx.push1(Opcode::Fld, Value::X87(0));
                            self.x87.push(*value)?;
                        }
                        let stage = self.scratch_local(8, 8);
                        self.ctx
                            .push1(Opcode::Fisttp, local_operand(stage, 0, OperandVariant::B64));
                        self.x87.consume_by(*value, instr)?;
                        self.ctx.push2(
                            Opcode::Mov,
                            Value::vreg(vreg),
                            local_operand(stage, 0, OperandVariant::B64),
                        );
                    }
                }
            }
            InstrKind::FloatConvert { from, to, value } => {
                self.lower_float_convert(instr, *from, *to, *value)?;
            }
            InstrKind::BitintOp { op, width, lhs, rhs } => {
                self.lower_bitint_binary(instr, *op, *width, *lhs, *rhs)?;
            }
            InstrKind::BitintUnary { op, width, value } => {
                let name = match op {
                    BitintOpKind::Negate => "__kefir_bigint_negate",
                    BitintOpKind::Invert => "__kefir_bigint_invert",
                    _ => return Err(Error::Internal("invalid unary bit-precise selector")),
                };
                let args = vec![
                    RuntimeArg::Value(*value),
                    RuntimeArg::Imm(*width as i64),
                ];
                self.emit_runtime_call(name, &args, None)?;
                let vreg = self.vreg_of(instr);
                let source = self.operand(*value)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
            }
            InstrKind::BitintShift { op, width, value, count } => {
                let name = match op {
                    BitintOpKind::ShiftLeft => "__kefir_bigint_left_shift",
                    BitintOpKind::ShiftRight => "__kefir_bigint_right_shift",
                    BitintOpKind::ArithmeticShiftRight => "__kefir_bigint_arithmetic_right_shift",
                    _ => return Err(Error::Internal("invalid shift bit-precise selector")),
                };
                let args = vec![
                    RuntimeArg::Value(*value),
                    RuntimeArg::Value(*count),
                    RuntimeArg::Imm(*width as i64),
                ];
                self.emit_runtime_call(name, &args, None)?;
                let vreg = self.vreg_of(instr);
                let source = self.operand(*value)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
            }
            InstrKind::BitintIsZero { width, value } => {
                let vreg = self.vreg_of(instr);
                let args = vec![RuntimeArg::Value(*value), RuntimeArg::Imm(*width as i64)];
                self.emit_runtime_call("__kefir_bigint_is_zero", &args, Some(vreg))?;
            }
            InstrKind::BitintCast {
                signed,
                from,
                to,
                value,
            } => {
                let name = if *signed {
                    "__kefir_bigint_cast_signed"
                } else {
                    "__kefir_bigint_cast_unsigned"
                };
                let args = vec![
                    RuntimeArg::Value(*value),
                    RuntimeArg::Imm(*from as i64),
                    RuntimeArg::Imm(*to as i64),
                ];
                self.emit_runtime_call(name, &args, None)?;
                let vreg = self.vreg_of(instr);
                let source = self.operand(*value)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
            }
            InstrKind::BitintFromInt {
                signed,
                width,
                value,
                addr,
            } => {
                let name = if *signed {
                    "__kefir_bigint_set_signed_integer"
                } else {
                    "__kefir_bigint_set_unsigned_integer"
                };
                let args = vec![
                    RuntimeArg::Value(*addr),
                    RuntimeArg::Imm(*width as i64),
                    RuntimeArg::Value(*value),
                ];
                self.emit_runtime_call(name, &args, None)?;
                let vreg = self.vreg_of(instr);
                let source = self.operand(*addr)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
            }
            InstrKind::AtomicLoad { addr, width, order } => {
                let vreg = self.vreg_of(instr);
                let name = atomic_symbol("__atomic_load", *width);
                let args = vec![RuntimeArg::Value(*addr), RuntimeArg::Imm(order.encoding())];
                self.emit_runtime_call(name, &args, Some(vreg))?;
            }
            InstrKind::AtomicStore {
                addr,
                value,
                width,
                order,
            } => {
                let name = atomic_symbol("__atomic_store", *width);
                let args = vec![
                    RuntimeArg::Value(*addr),
                    RuntimeArg::Value(*value),
                    RuntimeArg::Imm(order.encoding()),
                ];
                self.emit_runtime_call(name, &args, None)?;
            }
            InstrKind::AtomicCompareExchange {
                addr,
                expected,
                desired,
                width,
                order,
            } => {
                let vreg = self.vreg_of(instr);
                let name = atomic_symbol("__atomic_compare_exchange", *width);
                let args = vec![
                    RuntimeArg::Value(*addr),
                    RuntimeArg::Value(*expected),
                    RuntimeArg::Value(*desired),
                    RuntimeArg::Imm(order.encoding()),
                    RuntimeArg::Imm(order.encoding()),
                ];
                self.emit_runtime_call(name, &args, Some(vreg))?;
            }
            InstrKind::AtomicCopyMemory {
                dst,
                src,
                size,
                order,
            } => {
                let args = vec![
                    RuntimeArg::Imm(*size as i64),
                    RuntimeArg::Value(*src),
                    RuntimeArg::Value(*dst),
                    RuntimeArg::Imm(order.encoding()),
                ];
                self.emit_runtime_call("__atomic_load", &args, None)?;
            }
            InstrKind::OverflowArith {
                op,
                width,
                signed,
                lhs,
                rhs,
                result_addr,
            } => {
                let vreg = self.vreg_of(instr);
                let tmp = self.ctx.new_vreg(VregKind::GeneralPurpose);
                let lhs_value = self.operand(*lhs)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(tmp), lhs_value);
                let rhs_value = self.imm_or_operand(*rhs)?;
                let variant = alu_variant(*width);
                let opcode = match op {
                    OverflowOp::Add => Opcode::Add,
                    OverflowOp::Subtract => Opcode::Sub,
                    OverflowOp::Multiply => Opcode::Imul,
                };
                let rhs_sized = match rhs_value {
                    Value::Vreg { vreg, .. } => Value::vreg_sized(vreg, variant),
                    other => other,
                };
                self.ctx
                    .push2(opcode, Value::vreg_sized(tmp, variant), rhs_sized);
                let cond = if *signed { Cond::O } else { Cond::B };
                self.ctx.push2(
                    Opcode::Xor,
                    Value::vreg_sized(vreg, OperandVariant::B32),
                    Value::vreg_sized(vreg, OperandVariant::B32),
                );
                self.ctx.push1(
                    Opcode::SetCc(cond),
                    Value::vreg_sized(vreg, OperandVariant::B8),
                );
                let destination = self.memory_operand(*result_addr, variant_of(*width))?;
                self.ctx
                    .push2(Opcode::Mov, destination, Value::vreg_sized(tmp, variant_of(*width)));
            }
            InstrKind::Call(call) => {
                self.lower_call(instr, *call)?;
            }
            InstrKind::Select {
                condition,
                on_true,
                on_false,
            } => {
                let vreg = self.vreg_of(instr);
                let false_value = self.operand(*on_false)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), false_value);
                let cond_value = self.operand(*condition)?;
                self.ctx.push2(Opcode::Test, cond_value.clone(), cond_value);
                let true_value = self.operand(*on_true)?;
                self.ctx
                    .push2(Opcode::Cmov(Cond::Ne), Value::vreg(vreg), true_value);
            }
            InstrKind::SelectCompare {
                op,
                width: _,
                lhs,
                rhs,
                on_true,
                on_false,
            } => {
                let vreg = self.vreg_of(instr);
                let false_value = self.operand(*on_false)?;
                self.ctx.push2(Opcode::Mov, Value::vreg(vreg), false_value);
                let lhs_value = self.operand(*lhs)?;
                let rhs_value = self.imm_or_operand(*rhs)?;
                self.ctx.push2(Opcode::Cmp, lhs_value, rhs_value);
                let true_value = self.operand(*on_true)?;
                self.ctx
                    .push2(Opcode::Cmov(cond_of(*op)), Value::vreg(vreg), true_value);
            }
            InstrKind::VaStart { ap } => {
                self.lower_va_start(*ap)?;
            }
            InstrKind::VaEnd { .. } => {}
            InstrKind::VaCopy { dst, src } => {
                let dst_mem = self.memory_operand(*dst, OperandVariant::B64)?;
                let src_mem = self.memory_operand(*src, OperandVariant::B64)?;
                for part in 0..3 {
                    let tmp = self.ctx.new_vreg(VregKind::GeneralPurpose);
                    self.ctx.push2(
                        Opcode::Mov,
                        Value::vreg(tmp),
                        offset_operand(src_mem.clone(), part * 8),
                    );
                    self.ctx.push2(
                        Opcode::Mov,
                        offset_operand(dst_mem.clone(), part * 8),
                        Value::vreg(tmp),
                    );
                }
            }
            InstrKind::VaArg { ap, ty } => {
                self.lower_va_arg(instr, *ap, *ty)?;
            }
            InstrKind::FenvSave => {
                let stage = self.scratch_local(28, 4);
                self.fenv_slots.insert(instr, stage);
                self.ctx
                    .push1(Opcode::Fnstenv, local_operand(stage, 0, OperandVariant::Default));
            }
            InstrKind::FenvRestore { state } => {
                let stage = *self
                    .fenv_slots
                    .get(state)
                    .ok_or(Error::Internal("fenv restore without a saved state"))?;
                self.ctx
                    .push1(Opcode::Fldenv, local_operand(stage, 0, OperandVariant::Default));
            }
            InstrKind::InlineAsm { template, operands } => {
                // Operand values are materialized so the fragment can
                // assume its inputs were evaluated.
                for &operand in operands {
                    let _ = self.operand(operand)?;
                }
                let text = self.module.asm_templates[*template].template.clone();
                let fragment = self.ctx.fragments.push(text);
                self.ctx.push1(
                    Opcode::InlineAssembly,
                    Value::UnsignedImm(fragment.index() as u64),
                );
            }
            InstrKind::Jump { .. } | InstrKind::Branch { .. } | InstrKind::Return { .. } => {
                return Err(Error::Internal("terminator outside terminator position"));
            }
        }
        Ok(())
    }

    fn emit_and_mask(&mut self, vreg: VregId, mask: u64) {
        if i32::try_from(mask as i64).is_ok() {
            self.ctx
                .push2(Opcode::And, Value::vreg(vreg), Value::SignedImm(mask as i64));
        } else {
            let tmp = self.ctx.new_vreg(VregKind::GeneralPurpose);
            self.ctx
                .push2(Opcode::Movabs, Value::vreg(tmp), Value::SignedImm(mask as i64));
            self.ctx.push2(Opcode::And, Value::vreg(vreg), Value::vreg(tmp));
        }
    }

    // Renormalize the 64-bit slot after a sub-width operation whose result
    // must stay extension-canonical (negation can set high bits).
    fn renormalize(&mut self, vreg: VregId, width: OpWidth, signed: bool) {
        if width == OpWidth::W64 || width == OpWidth::W32 {
            return;
        }
        let opcode = if signed { Opcode::Movsx } else { Opcode::Movzx };
        self.ctx.push2(
            opcode,
            Value::vreg(vreg),
            Value::vreg_sized(vreg, variant_of(width)),
        );
    }

    fn lower_int_binary(
        &mut self,
        instr: InstrRef,
        op: IntBinaryOp,
        width: OpWidth,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<()> {
        match op {
            IntBinaryOp::Div { signed } | IntBinaryOp::Mod { signed } => {
                return self.lower_division(
                    instr,
                    width,
                    lhs,
                    rhs,
                    signed,
                    matches!(op, IntBinaryOp::Mod { .. }),
                );
            }
            IntBinaryOp::Shl | IntBinaryOp::Shr | IntBinaryOp::Sar => {
                return self.lower_shift(instr, op, width, lhs, rhs);
            }
            _ => {}
        }
        let vreg = self.vreg_of(instr);
        let lhs_value = self.operand(lhs)?;
        self.ctx.push2(Opcode::Mov, Value::vreg(vreg), lhs_value);
        let variant = alu_variant(width);
        let opcode = match op {
            IntBinaryOp::Add => Opcode::Add,
            IntBinaryOp::Sub => Opcode::Sub,
            IntBinaryOp::Mul { .. } => Opcode::Imul,
            IntBinaryOp::And => Opcode::And,
            IntBinaryOp::Or => Opcode::Or,
            IntBinaryOp::Xor => Opcode::Xor,
            _ => return Err(Error::Internal("unhandled integer operator")),
        };
        let rhs_value = match self.imm_or_operand(rhs)? {
            Value::Vreg { vreg, .. } => Value::vreg_sized(vreg, variant),
            other => other,
        };
        self.ctx
            .push2(opcode, Value::vreg_sized(vreg, variant), rhs_value);
        Ok(())
    }

    fn lower_division(
        &mut self,
        instr: InstrRef,
        width: OpWidth,
        lhs: InstrRef,
        rhs: InstrRef,
        signed: bool,
        remainder: bool,
    ) -> Result<()> {
        let wide = width == OpWidth::W64;
        let variant = if wide { OperandVariant::B64 } else { OperandVariant::B32 };
        let vblock = self.next_vblock;
        self.next_vblock += 1;
        self.ctx
            .push1(Opcode::VirtualBlockBegin, Value::UnsignedImm(vblock));
        let rax = self.fixed(PhysReg::Rax);
        let rdx = self.fixed(PhysReg::Rdx);
        let lhs_value = self.operand(lhs)?;
        self.ctx
            .push2(Opcode::VirtualRegisterLink, Value::vreg(rax), lhs_value);
        if signed {
            self.ctx.push1(
                Opcode::TouchVirtualRegister,
                Value::vreg(rdx),
            );
            self.ctx.push0(if wide { Opcode::Cqo } else { Opcode::Cdq });
        } else {
            self.ctx.push2(
                Opcode::Xor,
                Value::vreg_sized(rdx, OperandVariant::B32),
                Value::vreg_sized(rdx, OperandVariant::B32),
            );
        }
        let divisor = self
            .operand(rhs)?
            .as_vreg()
            .ok_or(Error::Internal("division by a non-register"))?;
        self.ctx.push1(
            if signed { Opcode::Idiv } else { Opcode::Div },
            Value::vreg_sized(divisor, variant),
        );
        self.ctx
            .push1(Opcode::TouchVirtualRegister, Value::vreg(rax));
        self.ctx
            .push1(Opcode::TouchVirtualRegister, Value::vreg(rdx));
        let vreg = self.vreg_of(instr);
        let source = if remainder { rdx } else { rax };
        self.ctx.push2(
            Opcode::VirtualRegisterLink,
            Value::vreg(vreg),
            Value::vreg(source),
        );
        self.ctx
            .push1(Opcode::VirtualBlockEnd, Value::UnsignedImm(vblock));
        self.renormalize(vreg, width, signed);
        Ok(())
    }

    fn lower_shift(
        &mut self,
        instr: InstrRef,
        op: IntBinaryOp,
        width: OpWidth,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<()> {
        let vreg = self.vreg_of(instr);
        let lhs_value = self.operand(lhs)?;
        self.ctx.push2(Opcode::Mov, Value::vreg(vreg), lhs_value);
        let variant = alu_variant(width);
        let opcode = match op {
            IntBinaryOp::Shl => Opcode::Shl,
            IntBinaryOp::Shr => Opcode::Shr,
            IntBinaryOp::Sar => Opcode::Sar,
            _ => return Err(Error::Internal("unhandled shift operator")),
        };
        match self.func.instrs[rhs].kind {
            InstrKind::IntConst(count) => {
                self.ctx.push2(
                    opcode,
                    Value::vreg_sized(vreg, variant),
                    Value::SignedImm(count & 63),
                );
            }
            _ => {
                // A non-constant count lives in cl.
                let rcx = self.fixed(PhysReg::Rcx);
                let count = self.operand(rhs)?;
                self.ctx
                    .push2(Opcode::VirtualRegisterLink, Value::vreg(rcx), count);
                self.ctx.push2(
                    opcode,
                    Value::vreg_sized(vreg, variant),
                    Value::vreg_sized(rcx, OperandVariant::B8),
                );
            }
        }
        Ok(())
    }

    fn lower_float_binary(
        &mut self,
        instr: InstrRef,
        op: FloatBinaryOp,
        width: FloatWidth,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<()> {
        if width == FloatWidth::F80 {
            return self.lower_x87_binary(instr, op, lhs, rhs);
        }
        let vreg = self.vreg_of(instr);
        let mov = if width == FloatWidth::F32 { Opcode::Movss } else { Opcode::Movsd };
        let lhs_value = self.operand(lhs)?;
        self.ctx.push2(mov, Value::vreg(vreg), lhs_value);
        let opcode = match (op, width) {
            (FloatBinaryOp::Add, FloatWidth::F32) => Opcode::Addss,
            (FloatBinaryOp::Add, _) => Opcode::Addsd,
            (FloatBinaryOp::Sub, FloatWidth::F32) => Opcode::Subss,
            (FloatBinaryOp::Sub, _) => Opcode::Subsd,
            (FloatBinaryOp::Mul, FloatWidth::F32) => Opcode::Mulss,
            (FloatBinaryOp::Mul, _) => Opcode::Mulsd,
            (FloatBinaryOp::Div, FloatWidth::F32) => Opcode::Divss,
            (FloatBinaryOp::Div, _) => Opcode::Divsd,
        };
        let rhs_value = self.operand(rhs)?;
        self.ctx.push2(opcode, Value::vreg(vreg), rhs_value);
        Ok(())
    }

    fn lower_x87_binary(
        &mut self,
        instr: InstrRef,
        op: FloatBinaryOp,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<()> {
        let _ = self.vreg_of(instr);
        let lhs = self.resolve_x87(lhs);
        let rhs = self.resolve_x87(rhs);
        // Squaring a value that is already on top multiplies st(0) by
        // itself without a pop.
        let same_value = lhs == rhs;
        if same_value {
            if self.x87.position_of(lhs).is_none() {
                let vreg = self.vreg_of(lhs);
                self.x87_ensure(1)?;
                self.ctx
                    .push1(Opcode::Fld, Value::vreg_sized(vreg, OperandVariant::B80));
                self.x87.push(lhs)?;
            }
            self.x87_bring_to_top(lhs)?;
            let opcode = match op {
                FloatBinaryOp::Add => Opcode::Fadd,
                FloatBinaryOp::Mul => Opcode::Fmul,
                FloatBinaryOp::Sub => Opcode::Fsubp,
                FloatBinaryOp::Div => Opcode::Fdivp,
            };
            match op {
                FloatBinaryOp::Add | FloatBinaryOp::Mul => {
                    self.ctx.push2(opcode, Value::X87(0), Value::X87(0));
                    self.x87.consume_by(lhs, instr)?;
                    self.x87.push(instr)?;
                }
                _ => {
                    // x - x / x / x: duplicate the top then pop-combine.
                    self.x87_ensure(1)?;
                    self.ctx.push1(Opcode::Fld, Value::X87(0));
                    self.ctx.push0(if op == FloatBinaryOp::Sub {
                        Opcode::Fsubp
                    } else {
                        Opcode::Fdivp
                    });
                    self.x87.consume_by(lhs, instr)?;
                    self.x87.push(instr)?;
                }
            }
            return Ok(());
        }
        // General case: make the stack end as [rhs, lhs, ...].
        for &operand in &[lhs, rhs] {
            if self.x87.position_of(operand).is_none() {
                let vreg = self.vreg_of(operand);
                self.x87_ensure(1)?;
                self.ctx
                    .push1(Opcode::Fld, Value::vreg_sized(vreg, OperandVariant::B80));
                self.x87.push(operand)?;
            }
        }
        if !(self.x87.position_of(rhs) == Some(0) && self.x87.position_of(lhs) == Some(1)) {
            // Normalize through memory: spill both and reload in order.
            self.x87_materialize(lhs)?;
            self.x87_materialize(rhs)?;
            self.flush_x87()?;
            for &operand in &[lhs, rhs] {
                let vreg = self.vreg_of(operand);
                self.ctx
                    .push1(Opcode::Fld, Value::vreg_sized(vreg, OperandVariant::B80));
                self.x87.push(operand)?;
            }
        }
        let opcode = match op {
            FloatBinaryOp::Add => Opcode::Faddp,
            FloatBinaryOp::Sub => Opcode::Fsubp,
            FloatBinaryOp::Mul => Opcode::Fmulp,
            FloatBinaryOp::Div => Opcode::Fdivp,
        };
        self.ctx.push0(opcode);
        // The pop consumes rhs; the result replaces lhs on the stack.
        self.x87.consume_by(rhs, instr)?;
        self.x87.consume_by(lhs, instr)?;
        self.x87.push(instr)?;
        Ok(())
    }

    fn lower_float_convert(
        &mut self,
        instr: InstrRef,
        from: FloatWidth,
        to: FloatWidth,
        value: InstrRef,
    ) -> Result<()> {
        match (from, to) {
            (FloatWidth::F32, FloatWidth::F64) => {
                let vreg = self.vreg_of(instr);
                let source = self.operand(value)?;
                self.ctx.push2(Opcode::Cvtss2sd, Value::vreg(vreg), source);
            }
            (FloatWidth::F64, FloatWidth::F32) => {
                let vreg = self.vreg_of(instr);
                let source = self.operand(value)?;
                self.ctx.push2(Opcode::Cvtsd2ss, Value::vreg(vreg), source);
            }
            (FloatWidth::F32 | FloatWidth::F64, FloatWidth::F80) => {
                let _ = self.vreg_of(instr);
                let stage = self.scratch_local(8, 8);
                let mov = if from == FloatWidth::F32 { Opcode::Movss } else { Opcode::Movsd };
                let variant = if from == FloatWidth::F32 {
                    OperandVariant::FpSingle
                } else {
                    OperandVariant::FpDouble
                };
                let source = self.operand(value)?;
                self.ctx.push2(mov, local_operand(stage, 0, variant), source);
                self.x87_ensure(1)?;
                self.ctx.push1(Opcode::Fld, local_operand(stage, 0, variant));
                self.x87.push(instr)?;
            }
            (FloatWidth::F80, FloatWidth::F32 | FloatWidth::F64) => {
                let vreg = self.vreg_of(instr);
                let value = self.resolve_x87(value);
                if self.x87.position_of(value).is_none() {
                    let ovreg = self.vreg_of(value);
                    self.x87_ensure(1)?;
                    self.ctx
                        .push1(Opcode::Fld, Value::vreg_sized(ovreg, OperandVariant::B80));
                    self.x87.push(value)?;
                }
                self.x87_bring_to_top(value)?;
                if self.use_counts[value] > 1 {
                    self.x87_ensure(1)?;
                    self.ctx.push1(Opcode::Fld, Value::X87(0));
                    self.x87.push(value)?;
                }
                let stage = self.scratch_local(8, 8);
                let variant = if to == FloatWidth::F32 {
                    OperandVariant::FpSingle
                } else {
                    OperandVariant::FpDouble
                };
                self.ctx.push1(Opcode::Fstp, local_operand(stage, 0, variant));
                self.x87.consume_by(value, instr)?;
                let mov = if to == FloatWidth::F32 { Opcode::Movss } else { Opcode::Movsd };
                self.ctx
                    .push2(mov, Value::vreg(vreg), local_operand(stage, 0, variant));
            }
            _ => {}
        }
        Ok(())
    }

    fn lower_bitint_binary(
        &mut self,
        instr: InstrRef,
        op: BitintOpKind,
        width: u64,
        lhs: InstrRef,
        rhs: InstrRef,
    ) -> Result<()> {
        let digits = width.div_ceil(8);
        match op {
            BitintOpKind::Add
            | BitintOpKind::Subtract
            | BitintOpKind::And
            | BitintOpKind::Or
            | BitintOpKind::Xor => {
                let name = match op {
                    BitintOpKind::Add => "__kefir_bigint_add",
                    BitintOpKind::Subtract => "__kefir_bigint_subtract",
                    BitintOpKind::And => "__kefir_bigint_and",
                    BitintOpKind::Or => "__kefir_bigint_or",
                    _ => "__kefir_bigint_xor",
                };
                let args = vec![
                    RuntimeArg::Value(lhs),
                    RuntimeArg::Value(rhs),
                    RuntimeArg::Imm(width as i64),
                ];
                self.emit_runtime_call(name, &args, None)?;
            }
            BitintOpKind::Multiply { signed } => {
                // The schoolbook multiply wants caller-allocated result and
                // accumulator scratch.
                let result = self.scratch_local(digits * 2, 8);
                let accumulator = self.scratch_local(digits + 1, 8);
                let name = if signed {
                    "__kefir_bigint_signed_multiply"
                } else {
                    "__kefir_bigint_unsigned_multiply"
                };
                let args = vec![
                    RuntimeArg::Local(result),
                    RuntimeArg::Local(accumulator),
                    RuntimeArg::Value(lhs),
                    RuntimeArg::Value(rhs),
                    RuntimeArg::Imm(width as i64),
                    RuntimeArg::Imm(width as i64),
                ];
                self.emit_runtime_call(name, &args, None)?;
                self.emit_local_to_value_copy(result, lhs, digits)?;
            }
            BitintOpKind::Divide { signed } | BitintOpKind::Remainder { signed } => {
                let remainder_scratch = self.scratch_local(digits, 8);
                let name = if signed {
                    "__kefir_bigint_signed_divide"
                } else {
                    "__kefir_bigint_unsigned_divide"
                };
                let args = vec![
                    RuntimeArg::Value(lhs),
                    RuntimeArg::Local(remainder_scratch),
                    RuntimeArg::Value(rhs),
                    RuntimeArg::Imm(width as i64),
                    RuntimeArg::Imm(width as i64),
                ];
                self.emit_runtime_call(name, &args, None)?;
                if matches!(op, BitintOpKind::Remainder { .. }) {
                    self.emit_local_to_value_copy(remainder_scratch, lhs, digits)?;
                }
            }
            BitintOpKind::Compare { signed } => {
                let vreg = self.vreg_of(instr);
                let name = if signed {
                    "__kefir_bigint_signed_compare"
                } else {
                    "__kefir_bigint_unsigned_compare"
                };
                let args = vec![
                    RuntimeArg::Value(lhs),
                    RuntimeArg::Value(rhs),
                    RuntimeArg::Imm(width as i64),
                ];
                self.emit_runtime_call(name, &args, Some(vreg))?;
                self.ctx.push2(
                    Opcode::Movsx,
                    Value::vreg(vreg),
                    Value::vreg_sized(vreg, OperandVariant::B32),
                );
                return Ok(());
            }
            _ => return Err(Error::Internal("invalid binary bit-precise selector")),
        }
        let vreg = self.vreg_of(instr);
        let source = self.operand(lhs)?;
        self.ctx.push2(Opcode::Mov, Value::vreg(vreg), source);
        Ok(())
    }

    fn emit_local_to_value_copy(&mut self, from: LocalId, to: InstrRef, bytes: u64) -> Result<()> {
        let rdi = self.fixed(PhysReg::Rdi);
        let rsi = self.fixed(PhysReg::Rsi);
        let rcx = self.fixed(PhysReg::Rcx);
        let dst = self.operand(to)?;
        self.ctx
            .push2(Opcode::VirtualRegisterLink, Value::vreg(rdi), dst);
        self.ctx.push2(
            Opcode::Lea,
            Value::vreg(rsi),
            local_operand(from, 0, OperandVariant::Default),
        );
        self.ctx
            .push2(Opcode::Mov, Value::vreg(rcx), Value::SignedImm(bytes as i64));
        self.ctx.push0(Opcode::Cld);
        self.ctx.push0(Opcode::RepMovsb);
        Ok(())
    }

    fn emit_memory_copy(&mut self, dst: InstrRef, src: InstrRef, size: u64) -> Result<()> {
        let rdi = self.fixed(PhysReg::Rdi);
        let rsi = self.fixed(PhysReg::Rsi);
        let rcx = self.fixed(PhysReg::Rcx);
        let dst_value = self.operand(dst)?;
        self.ctx
            .push2(Opcode::VirtualRegisterLink, Value::vreg(rdi), dst_value);
        let src_value = self.operand(src)?;
        self.ctx
            .push2(Opcode::VirtualRegisterLink, Value::vreg(rsi), src_value);
        self.ctx
            .push2(Opcode::Mov, Value::vreg(rcx), Value::SignedImm(size as i64));
        self.ctx.push0(Opcode::Cld);
        self.ctx.push0(Opcode::RepMovsb);
        Ok(())
    }

    fn lower_va_start(&mut self, ap: InstrRef) -> Result<()> {
        let list = self.memory_operand(ap, OperandVariant::B32)?;
        let gp_offset = (self.abi.gp_used * 8) as i64;
        let fp_offset =
            super::abi::VARARG_GP_SAVE_SIZE as i64 + (self.abi.sse_used * 16) as i64;
        self.ctx
            .push2(Opcode::Mov, list.clone(), Value::SignedImm(gp_offset));
        self.ctx.push2(
            Opcode::Mov,
            offset_operand(list.clone(), 4),
            Value::SignedImm(fp_offset),
        );
        let overflow = self.ctx.new_vreg(VregKind::GeneralPurpose);
        self.ctx.push2(
            Opcode::Lea,
            Value::vreg(overflow),
            Value::Indirect {
                base: IndirectBase::PhysReg(PhysReg::Rbp),
                offset: 16,
                variant: OperandVariant::Default,
            },
        );
        let list64 = self.memory_operand(ap, OperandVariant::B64)?;
        self.ctx.push2(
            Opcode::Mov,
            offset_operand(list64.clone(), 8),
            Value::vreg(overflow),
        );
        let save = self.ctx.new_vreg(VregKind::GeneralPurpose);
        self.ctx.push2(
            Opcode::Lea,
            Value::vreg(save),
            Value::Indirect {
                base: IndirectBase::VarargSave,
                offset: 0,
                variant: OperandVariant::Default,
            },
        );
        self.ctx
            .push2(Opcode::Mov, offset_operand(list64, 16), Value::vreg(save));
        Ok(())
    }

    fn lower_va_arg(&mut self, instr: InstrRef, ap: InstrRef, ty: TypeId) -> Result<()> {
        let vreg = self.vreg_of(instr);
        let classes = super::abi::classify(self.bundle, self.traits, ty)?;
        let list32 = self.memory_operand(ap, OperandVariant::B32)?;
        let list64 = self.memory_operand(ap, OperandVariant::B64)?;
        let in_register = classes.as_slice() == [EightbyteClass::Integer]
            || classes.as_slice() == [EightbyteClass::Sse];
        let memory_label = self.ctx.new_label();
        let done_label = self.ctx.new_label();
        if in_register {
            let sse = classes.as_slice() == [EightbyteClass::Sse];
            let (offset_field, limit, step) = if sse {
                (4, 176i64, 16i64)
            } else {
                (0, 48i64, 8i64)
            };
            let cursor = self.ctx.new_vreg(VregKind::GeneralPurpose);
            self.ctx.push2(
                Opcode::Mov,
                Value::vreg_sized(cursor, OperandVariant::B32),
                offset_operand(list32.clone(), offset_field),
            );
            self.ctx
                .push2(Opcode::Cmp, Value::vreg(cursor), Value::SignedImm(limit));
            self.ctx
                .push1(Opcode::Jcc(Cond::Ae), Value::InternalLabel(memory_label));
            let base = self.ctx.new_vreg(VregKind::GeneralPurpose);
            self.ctx.push2(
                Opcode::Mov,
                Value::vreg(base),
                offset_operand(list64.clone(), 16),
            );
            self.ctx
                .push2(Opcode::Add, Value::vreg(base), Value::vreg(cursor));
            if sse {
                self.ctx.push2(
                    Opcode::Movq,
                    Value::vreg(vreg),
                    Value::Indirect {
                        base: IndirectBase::Vreg(base),
                        offset: 0,
                        variant: OperandVariant::B64,
                    },
                );
            } else {
                self.ctx.push2(
                    Opcode::Mov,
                    Value::vreg(vreg),
                    Value::Indirect {
                        base: IndirectBase::Vreg(base),
                        offset: 0,
                        variant: OperandVariant::B64,
                    },
                );
            }
            self.ctx.push2(
                Opcode::Add,
                offset_operand(list32.clone(), offset_field),
                Value::SignedImm(step),
            );
            self.ctx
                .push1(Opcode::Jmp, Value::InternalLabel(done_label));
        }
        self.ctx.bind_label(memory_label);
        let overflow = self.ctx.new_vreg(VregKind::GeneralPurpose);
        self.ctx.push2(
            Opcode::Mov,
            Value::vreg(overflow),
            offset_operand(list64.clone(), 8),
        );
        let size = crate::types::type_layout(self.bundle, self.traits, ty)?
            .size
            .next_multiple_of(8);
        if classes.as_slice() == [EightbyteClass::Sse] {
            self.ctx.push2(
                Opcode::Movq,
                Value::vreg(vreg),
                Value::Indirect {
                    base: IndirectBase::Vreg(overflow),
                    offset: 0,
                    variant: OperandVariant::B64,
                },
            );
        } else if in_register {
            self.ctx.push2(
                Opcode::Mov,
                Value::vreg(vreg),
                Value::Indirect {
                    base: IndirectBase::Vreg(overflow),
                    offset: 0,
                    variant: OperandVariant::B64,
                },
            );
        } else {
            // Aggregates yield the address of the argument slot.
            self.ctx.push2(
                Opcode::VirtualRegisterLink,
                Value::vreg(vreg),
                Value::vreg(overflow),
            );
        }
        self.ctx.push2(
            Opcode::Add,
            offset_operand(list64, 8),
            Value::SignedImm(size as i64),
        );
        self.ctx.bind_label(done_label);
        self.ctx.push0(Opcode::Noop);
        Ok(())
    }

    fn lower_call(&mut self, instr: InstrRef, call: crate::opt::CallRef) -> Result<()> {
        let node = self.func.calls[call].clone();
        self.flush_x87()?;
        let stash = self.ctx.stashes.push(StashData::default());
        self.ctx.push1(Opcode::StashActivate, Value::Stash(stash));

        let (locations, variadic, sse_used) = match node.signature {
            Some(signature) => {
                let abi = FunctionAbi::of(self.bundle, self.traits, signature)?;
                let variadic = match self.bundle.get(self.bundle.unqualified(signature)) {
                    Type::Function(function) => function.ellipsis,
                    _ => false,
                };
                (Some(abi.parameters.clone()), variadic, abi.sse_used)
            }
            None => (None, false, node.args.len()),
        };
        let ret = self.call_return_location(&node)?;

        // Hidden return pointer first.
        if ret == ReturnLocation::Memory {
            let space = node
                .return_space
                .ok_or(Error::Internal("memory return without return space"))?;
            let rdi = self.fixed(PhysReg::Rdi);
            let space_value = self.operand(space)?;
            self.ctx
                .push2(Opcode::VirtualRegisterLink, Value::vreg(rdi), space_value);
        }

        let mut stack_args: Vec<(InstrRef, u64)> = Vec::new();
        let mut loose_sse = 0usize;
        for (index, &arg) in node.args.iter().enumerate() {
            let location = locations
                .as_ref()
                .and_then(|locations| locations.get(index).cloned());
            match location {
                Some(ParamLocation::Integer(reg)) => {
                    let fixed = self.fixed(reg);
                    let value = self.operand(arg)?;
                    self.ctx
                        .push2(Opcode::VirtualRegisterLink, Value::vreg(fixed), value);
                }
                Some(ParamLocation::Sse(reg)) => {
                    let fixed = self.fixed(reg);
                    let value = self.operand(arg)?;
                    self.ctx
                        .push2(Opcode::VirtualRegisterLink, Value::vreg(fixed), value);
                }
                Some(ParamLocation::Multiple(parts)) => {
                    let addr = self.memory_operand(arg, OperandVariant::B64)?;
                    for (part, (class, reg)) in parts.iter().enumerate() {
                        let source = offset_operand(addr.clone(), (part * 8) as i64);
                        match class {
                            EightbyteClass::Integer => {
                                let fixed = self.fixed(*reg);
                                self.ctx.push2(Opcode::Mov, Value::vreg(fixed), source);
                            }
                            EightbyteClass::Sse => {
                                let fixed = self.fixed(*reg);
                                self.ctx.push2(Opcode::Movq, Value::vreg(fixed), source);
                            }
                            _ => {}
                        }
                    }
                }
                Some(ParamLocation::Stack { size, .. }) => {
                    stack_args.push((arg, size));
                }
                None => {
                    // No signature: place by value kind, SSE for floats.
                    match self.vreg_kind_for(&self.func.instrs[arg].kind) {
                        VregKind::FloatingPoint => {
                            let reg = ABI_SSE_ARGS[loose_sse.min(ABI_SSE_ARGS.len() - 1)];
                            loose_sse += 1;
                            let fixed = self.fixed(reg);
                            let value = self.operand(arg)?;
                            self.ctx
                                .push2(Opcode::VirtualRegisterLink, Value::vreg(fixed), value);
                        }
                        _ => {
                            stack_args.push((arg, 8));
                        }
                    }
                }
            }
        }

        // Stack arguments are pushed right-to-left, padded for alignment.
        let stack_bytes: u64 = stack_args.iter().map(|&(_, size)| size).sum();
        let padding = if stack_bytes % 16 != 0 { 16 - stack_bytes % 16 } else { 0 };
        if padding != 0 {
            self.ctx.push2(
                Opcode::Sub,
                Value::PhysReg(PhysReg::Rsp),
                Value::SignedImm(padding as i64),
            );
        }
        for &(arg, size) in stack_args.iter().rev() {
            if size <= 8 {
                let value = self.operand(arg)?;
                self.ctx.push1(Opcode::Push, value);
            } else {
                let addr = self.memory_operand(arg, OperandVariant::B64)?;
                let mut pushed = size;
                while pushed > 0 {
                    pushed -= 8;
                    self.ctx
                        .push1(Opcode::Push, offset_operand(addr.clone(), pushed as i64));
                }
            }
        }

        if variadic {
            self.ctx.push2(
                Opcode::Mov,
                Value::PhysReg(PhysReg::Rax),
                Value::SignedImm(sse_used as i64),
            );
        }

        match &node.callee {
            Callee::Direct(name) => {
                self.ctx.declare_external(name);
                self.ctx.push1(
                    Opcode::Call,
                    Value::ExternalLabel {
                        name: name.clone(),
                        position: super::asmcmp::SymbolPosition::Plt,
                        offset: 0,
                    },
                );
            }
            Callee::Indirect(callee) => {
                let value = self.operand(*callee)?;
                self.ctx.push1(Opcode::Call, value);
            }
        }

        let total = stack_bytes + padding;
        if total != 0 {
            self.ctx.push2(
                Opcode::Add,
                Value::PhysReg(PhysReg::Rsp),
                Value::SignedImm(total as i64),
            );
        }

        // Signature-less runtime calls (complex multiply/divide) return by
        // value in xmm0/xmm1 or st0/st1 depending on the component width;
        // spill the parts into the result buffer.
        if node.signature.is_none() {
            if let Some(space) = node.return_space {
                let name = match &node.callee {
                    Callee::Direct(name) => name.clone(),
                    Callee::Indirect(_) => String::new(),
                };
                if name.ends_with("xc3") {
                    let addr = self.memory_operand(space, OperandVariant::B80)?;
                    self.ctx.push1(Opcode::Fstp, addr.clone());
                    self.ctx.push1(Opcode::Fstp, offset_operand(addr, 16));
                } else if name.ends_with("sc3") {
                    // Both float components return packed in xmm0.
                    let addr = self.memory_operand(space, OperandVariant::B64)?;
                    self.ctx
                        .push2(Opcode::Movq, addr, Value::PhysReg(PhysReg::Xmm0));
                } else {
                    let addr = self.memory_operand(space, OperandVariant::FpDouble)?;
                    self.ctx
                        .push2(Opcode::Movsd, addr.clone(), Value::PhysReg(PhysReg::Xmm0));
                    self.ctx.push2(
                        Opcode::Movsd,
                        offset_operand(addr, 8),
                        Value::PhysReg(PhysReg::Xmm1),
                    );
                }
                let vreg = self.vreg_of(instr);
                let space_value = self.operand(space)?;
                self.ctx
                    .push2(Opcode::VirtualRegisterLink, Value::vreg(vreg), space_value);
            }
            self.ctx.push1(Opcode::StashDeactivate, Value::Stash(stash));
            return Ok(());
        }

        // Pull the return value out symmetrically to return lowering.
        match ret {
            ReturnLocation::None => {}
            ReturnLocation::Integer(reg) => {
                let fixed = self.fixed(reg);
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::VirtualRegisterLink,
                    Value::vreg(vreg),
                    Value::vreg(fixed),
                );
            }
            ReturnLocation::Sse(reg) => {
                let fixed = self.fixed(reg);
                let vreg = self.vreg_of(instr);
                self.ctx.push2(
                    Opcode::VirtualRegisterLink,
                    Value::vreg(vreg),
                    Value::vreg(fixed),
                );
            }
            ReturnLocation::X87 => {
                let _ = self.vreg_of(instr);
                self.x87.push(instr)?;
            }
            ReturnLocation::ComplexX87 => {
                let space = node
                    .return_space
                    .ok_or(Error::Internal("complex return without return space"))?;
                let addr = self.memory_operand(space, OperandVariant::B80)?;
                // st0 holds the real part, st1 the imaginary part.
                self.ctx.push1(Opcode::Fstp, addr.clone());
                self.ctx.push1(Opcode::Fstp, offset_operand(addr, 16));
                let vreg = self.vreg_of(instr);
                let space_value = self.operand(space)?;
                self.ctx.push2(
                    Opcode::VirtualRegisterLink,
                    Value::vreg(vreg),
                    space_value,
                );
            }
            ReturnLocation::Multiple(parts) => {
                let space = node
                    .return_space
                    .ok_or(Error::Internal("multi-register return without return space"))?;
                let addr = self.memory_operand(space, OperandVariant::B64)?;
                for (index, (class, reg)) in parts.iter().enumerate() {
                    let destination = offset_operand(addr.clone(), (index * 8) as i64);
                    match class {
                        EightbyteClass::Integer => {
                            self.ctx
                                .push2(Opcode::Mov, destination, Value::PhysReg(*reg));
                        }
                        EightbyteClass::Sse => {
                            self.ctx
                                .push2(Opcode::Movq, destination, Value::PhysReg(*reg));
                        }
                        _ => {}
                    }
                }
                let vreg = self.vreg_of(instr);
                let space_value = self.operand(space)?;
                self.ctx
                    .push2(Opcode::VirtualRegisterLink, Value::vreg(vreg), space_value);
            }
            ReturnLocation::Memory => {
                let space = node
                    .return_space
                    .ok_or(Error::Internal("memory return without return space"))?;
                let vreg = self.vreg_of(instr);
                let space_value = self.operand(space)?;
                self.ctx
                    .push2(Opcode::VirtualRegisterLink, Value::vreg(vreg), space_value);
            }
        }
        self.ctx.push1(Opcode::StashDeactivate, Value::Stash(stash));
        Ok(())
    }

    fn emit_runtime_call(
        &mut self,
        name: &str,
        args: &[RuntimeArg],
        result: Option<VregId>,
    ) -> Result<()> {
        self.flush_x87()?;
        let stash = self.ctx.stashes.push(StashData::default());
        self.ctx.push1(Opcode::StashActivate, Value::Stash(stash));
        for (index, arg) in args.iter().enumerate() {
            let reg = *ABI_INTEGER_ARGS
                .get(index)
                .ok_or(Error::Internal("runtime call with too many arguments"))?;
            let fixed = self.fixed(reg);
            match arg {
                RuntimeArg::Value(value) => {
                    let operand = self.operand(*value)?;
                    self.ctx
                        .push2(Opcode::VirtualRegisterLink, Value::vreg(fixed), operand);
                }
                RuntimeArg::Imm(imm) => {
                    self.ctx
                        .push2(Opcode::Mov, Value::vreg(fixed), Value::SignedImm(*imm));
                }
                RuntimeArg::Local(local) => {
                    self.ctx.push2(
                        Opcode::Lea,
                        Value::vreg(fixed),
                        local_operand(*local, 0, OperandVariant::Default),
                    );
                }
            }
        }
        self.ctx.declare_external(name);
        self.ctx.push1(
            Opcode::Call,
            Value::ExternalLabel {
                name: name.to_string(),
                position: super::asmcmp::SymbolPosition::Plt,
                offset: 0,
            },
        );
        if let Some(result) = result {
            let rax = self.fixed(PhysReg::Rax);
            self.ctx.push2(
                Opcode::VirtualRegisterLink,
                Value::vreg(result),
                Value::vreg(rax),
            );
        }
        self.ctx.push1(Opcode::StashDeactivate, Value::Stash(stash));
        Ok(())
    }
}

/// Argument forms of runtime-library calls.
enum RuntimeArg {
    /// An SSA value.
    Value(InstrRef),
    /// An immediate.
    Imm(i64),
    /// The address of a staging local.
    Local(LocalId),
}

fn local_operand(local: LocalId, offset: i64, variant: OperandVariant) -> Value {
    Value::Indirect {
        base: IndirectBase::LocalVar(local),
        offset,
        variant,
    }
}

fn offset_operand(value: Value, delta: i64) -> Value {
    match value {
        Value::Indirect {
            base,
            offset,
            variant,
        } => Value::Indirect {
            base,
            offset: offset + delta,
            variant,
        },
        Value::Vreg { vreg, variant } => Value::Indirect {
            base: IndirectBase::Vreg(vreg),
            offset: delta,
            variant,
        },
        other => other,
    }
}

fn variant_of(width: OpWidth) -> OperandVariant {
    match width {
        OpWidth::W8 => OperandVariant::B8,
        OpWidth::W16 => OperandVariant::B16,
        OpWidth::W32 => OperandVariant::B32,
        OpWidth::W64 => OperandVariant::B64,
    }
}

fn alu_variant(width: OpWidth) -> OperandVariant {
    match width {
        OpWidth::W64 => OperandVariant::B64,
        _ => OperandVariant::B32,
    }
}

fn cond_of(op: CmpOp) -> Cond {
    match op {
        CmpOp::Equal => Cond::E,
        CmpOp::NotEqual => Cond::Ne,
        CmpOp::SignedLess => Cond::L,
        CmpOp::SignedLessOrEqual => Cond::Le,
        CmpOp::SignedGreater => Cond::G,
        CmpOp::SignedGreaterOrEqual => Cond::Ge,
        CmpOp::Below => Cond::B,
        CmpOp::BelowOrEqual => Cond::Be,
        CmpOp::Above => Cond::A,
        CmpOp::AboveOrEqual => Cond::Ae,
    }
}

fn float_cond_of(op: CmpOp) -> Cond {
    match op {
        CmpOp::Equal => Cond::E,
        CmpOp::NotEqual => Cond::Ne,
        CmpOp::Below | CmpOp::SignedLess => Cond::B,
        CmpOp::BelowOrEqual | CmpOp::SignedLessOrEqual => Cond::Be,
        CmpOp::Above | CmpOp::SignedGreater => Cond::A,
        CmpOp::AboveOrEqual | CmpOp::SignedGreaterOrEqual => Cond::Ae,
    }
}

fn atomic_symbol(prefix: &str, width: OpWidth) -> &'static str {
    match (prefix, width) {
        ("__atomic_load", OpWidth::W8) => "__atomic_load_1",
        ("__atomic_load", OpWidth::W16) => "__atomic_load_2",
        ("__atomic_load", OpWidth::W32) => "__atomic_load_4",
        ("__atomic_load", OpWidth::W64) => "__atomic_load_8",
        ("__atomic_store", OpWidth::W8) => "__atomic_store_1",
        ("__atomic_store", OpWidth::W16) => "__atomic_store_2",
        ("__atomic_store", OpWidth::W32) => "__atomic_store_4",
        ("__atomic_store", OpWidth::W64) => "__atomic_store_8",
        ("__atomic_compare_exchange", OpWidth::W8) => "__atomic_compare_exchange_1",
        ("__atomic_compare_exchange", OpWidth::W16) => "__atomic_compare_exchange_2",
        ("__atomic_compare_exchange", OpWidth::W32) => "__atomic_compare_exchange_4",
        _ => "__atomic_compare_exchange_8",
    }
}

/// Symbol of an interned string literal in the module's data section.
pub fn string_symbol(id: crate::strings::StringId) -> String {
    format!(".Lstr{}", id.index())
}

/// Symbol of an interned bit-precise constant.
pub fn bigint_symbol(id: crate::ir::BigIntId) -> String {
    format!(".Lbigint{}", id.index())
}

fn instr_operands(kind: &InstrKind) -> Vec<InstrRef> {
    use InstrKind::*;
    match kind {
        Load { addr, .. } | LoadFloat { addr, .. } | AtomicLoad { addr, .. } => vec![*addr],
        Store { addr, value, .. }
        | StoreFloat { addr, value, .. }
        | AtomicStore { addr, value, .. } => vec![*addr, *value],
        CopyMemory { dst, src, .. } | AtomicCopyMemory { dst, src, .. } => vec![*dst, *src],
        ZeroMemory { addr, .. } => vec![*addr],
        BitExtract { value, .. } => vec![*value],
        BitInsert { base, value, .. } => vec![*base, *value],
        IntBinary { lhs, rhs, .. } | IntCmp { lhs, rhs, .. } => vec![*lhs, *rhs],
        IntUnary { value, .. } | BoolNot { value } | SignExtend { value, .. }
        | ZeroExtend { value, .. } => vec![*value],
        FloatBinary { lhs, rhs, .. } | FloatCmp { lhs, rhs, .. } => vec![*lhs, *rhs],
        FloatNeg { value, .. }
        | IntToFloat { value, .. }
        | FloatToInt { value, .. }
        | FloatConvert { value, .. } => vec![*value],
        BitintOp { lhs, rhs, .. } => vec![*lhs, *rhs],
        BitintUnary { value, .. } | BitintIsZero { value, .. } | BitintCast { value, .. } => {
            vec![*value]
        }
        BitintShift { value, count, .. } => vec![*value, *count],
        BitintFromInt { value, addr, .. } => vec![*value, *addr],
        AtomicCompareExchange {
            addr,
            expected,
            desired,
            ..
        } => vec![*addr, *expected, *desired],
        OverflowArith {
            lhs,
            rhs,
            result_addr,
            ..
        } => vec![*lhs, *rhs, *result_addr],
        Select {
            condition,
            on_true,
            on_false,
        } => vec![*condition, *on_true, *on_false],
        SelectCompare {
            lhs,
            rhs,
            on_true,
            on_false,
            ..
        } => vec![*lhs, *rhs, *on_true, *on_false],
        VaStart { ap } | VaEnd { ap } | VaArg { ap, .. } => vec![*ap],
        VaCopy { dst, src } => vec![*dst, *src],
        FenvRestore { state } => vec![*state],
        InlineAsm { operands, .. } => operands.clone(),
        Branch { condition, .. } => vec![*condition],
        Return { value } => value.iter().copied().collect(),
        _ => Vec::new(),
    }
}
