//! Assembly text emission.
//!
//! Serializes a fully rewritten asmcmp stream to AT&T or Intel syntax.
//! Virtual-register operands resolve through the allocation table and the
//! computed frame offsets; internal labels print as
//! `_kefir_func_<name>_label<N>`; external symbols carry their relocation
//! suffix. The prologue/epilogue virtual opcodes expand here from the
//! frame descriptor.

use super::asmcmp::{
    AsmcmpContext, Cond, IndirectBase, Inst, LabelId, Opcode, OperandVariant, RipTarget,
    SymbolPosition, Value, VregKind,
};
use super::frame::{FrameOffsets, StackFrame};
use super::regalloc::{Allocation, RegisterAllocator};
use super::regs::PhysReg;
use crate::entity::EntityRef;
use crate::ir::{DataItem, IrModule};
use crate::result::{Error, Result};
use crate::source::SourceLocation;
use core::fmt::Write;

/// Output syntax selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsmSyntax {
    /// AT&T (GNU as default).
    Att,
    /// Intel (`.intel_syntax noprefix`).
    Intel,
}

/// Tracks the current source position and emits a location directive on
/// every change.
#[derive(Debug, Default)]
pub struct SourceLocationTracker {
    current: Option<SourceLocation>,
}

impl SourceLocationTracker {
    /// Create a tracker with no known position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a new position, emitting a `.loc` directive when it changed.
    pub fn update(&mut self, out: &mut String, location: SourceLocation) {
        if location.is_unknown() || self.current == Some(location) {
            return;
        }
        self.current = Some(location);
        let _ = writeln!(out, "    .loc 0 {} {}", location.line, location.column);
    }
}

/// Internal label text for a function.
pub fn label_name(function: &str, label: LabelId) -> String {
    format!("_kefir_func_{}_label{}", function, label.index())
}

/// Emit the module prologue: syntax directive and external symbols.
pub fn module_header(
    out: &mut String,
    syntax: AsmSyntax,
    externals: &std::collections::BTreeSet<String>,
) -> Result<()> {
    match syntax {
        AsmSyntax::Att => out.push_str(".att_syntax\n"),
        AsmSyntax::Intel => out.push_str(".intel_syntax noprefix\n"),
    }
    for external in externals {
        let _ = writeln!(out, ".extern {external}");
    }
    out.push_str(".section .text\n");
    Ok(())
}

/// Emit one function.
pub fn function(
    out: &mut String,
    syntax: AsmSyntax,
    ctx: &AsmcmpContext,
    alloc: &RegisterAllocator,
    frame: &StackFrame,
    offsets: &FrameOffsets,
    internal: bool,
) -> Result<()> {
    if !internal {
        let _ = writeln!(out, ".global {}", ctx.function_name);
    }
    let emitter = Emitter {
        syntax,
        ctx,
        alloc,
        frame,
        offsets,
    };
    let mut tracker = SourceLocationTracker::new();
    for inst in &ctx.instrs {
        for &label in &inst.labels {
            // Public aliases (the function symbol itself on the entry
            // label) precede the internal name.
            for public in &ctx.labels[label].public {
                let _ = writeln!(out, "{public}:");
            }
            let _ = writeln!(out, "{}:", label_name(&ctx.function_name, label));
        }
        if !inst.opcode.info().virtual_op {
            tracker.update(out, inst.location);
        }
        emitter.instruction(out, inst)?;
    }
    Ok(())
}

/// Emit string literals, bit-precise constants and global data.
pub fn data_sections(out: &mut String, module: &IrModule) -> Result<()> {
    if !module.strings.is_empty() || module.bigints.len() > 0 {
        out.push_str(".section .rodata\n");
        for (id, bytes) in module.strings.iter() {
            let _ = writeln!(out, "{}:", super::lower::string_symbol(id));
            emit_bytes(out, bytes);
        }
        for (id, value) in module.bigints.iter() {
            let _ = writeln!(out, "{}:", super::lower::bigint_symbol(id));
            emit_bytes(out, value.digits());
        }
    }
    let initialized: Vec<_> = module.globals.iter().filter(|g| g.image.is_some()).collect();
    let zeroed: Vec<_> = module.globals.iter().filter(|g| g.image.is_none()).collect();
    if !initialized.is_empty() {
        out.push_str(".section .data\n");
        for global in initialized {
            if global.internal {
                let _ = writeln!(out, ".local {}", global.name);
            } else {
                let _ = writeln!(out, ".global {}", global.name);
            }
            let _ = writeln!(out, ".align {}", global.alignment);
            let _ = writeln!(out, "{}:", global.name);
            let Some(image) = &global.image else { continue };
            for item in image {
                match item {
                    DataItem::Bytes(bytes) => emit_bytes(out, bytes),
                    DataItem::Zero(count) => {
                        let _ = writeln!(out, "    .zero {count}");
                    }
                    DataItem::Address { symbol, offset } => {
                        if *offset == 0 {
                            let _ = writeln!(out, "    .quad {symbol}");
                        } else {
                            let _ = writeln!(out, "    .quad {symbol} + {offset}");
                        }
                    }
                }
            }
        }
    }
    if !zeroed.is_empty() {
        out.push_str(".section .bss\n");
        for global in zeroed {
            if global.internal {
                let _ = writeln!(out, ".local {}", global.name);
            } else {
                let _ = writeln!(out, ".global {}", global.name);
            }
            let _ = writeln!(out, ".align {}", global.alignment);
            let _ = writeln!(out, "{}:", global.name);
            let _ = writeln!(out, "    .skip {}", global.size.max(1));
        }
    }
    Ok(())
}

fn emit_bytes(out: &mut String, bytes: &[u8]) {
    for chunk in bytes.chunks(16) {
        let rendered: Vec<String> = chunk.iter().map(|b| format!("0x{b:02x}")).collect();
        let _ = writeln!(out, "    .byte {}", rendered.join(", "));
    }
}

// A fully resolved operand ready for printing.
#[derive(Debug, Clone)]
enum Operand {
    Reg(PhysReg, OperandVariant),
    Imm(i64),
    Mem {
        base: PhysReg,
        offset: i64,
        variant: OperandVariant,
    },
    Rip {
        symbol: String,
        variant: OperandVariant,
    },
    Label(String),
    X87(usize),
}

struct Emitter<'a> {
    syntax: AsmSyntax,
    ctx: &'a AsmcmpContext,
    alloc: &'a RegisterAllocator,
    frame: &'a StackFrame,
    offsets: &'a FrameOffsets,
}

impl Emitter<'_> {
    fn resolve(&self, value: &Value) -> Result<Option<Operand>> {
        Ok(match value {
            Value::None => None,
            Value::SignedImm(v) => Some(Operand::Imm(*v)),
            Value::UnsignedImm(v) => Some(Operand::Imm(*v as i64)),
            Value::PhysReg(reg) => Some(Operand::Reg(*reg, OperandVariant::Default)),
            Value::Vreg { vreg, variant } => match self.alloc.allocation_of(*vreg) {
                Allocation::Register(reg) => Some(Operand::Reg(reg, *variant)),
                Allocation::SpillDirect { index, .. } => Some(Operand::Mem {
                    base: PhysReg::Rbp,
                    offset: self.frame.spill_offset(self.offsets, index),
                    variant: *variant,
                }),
                Allocation::SpillIndirect { index } => Some(Operand::Mem {
                    base: PhysReg::Rbp,
                    offset: self.frame.spill_offset(self.offsets, index),
                    variant: *variant,
                }),
                Allocation::Unallocated => match self.ctx.vregs[*vreg].kind {
                    VregKind::ImmediateInteger(v) => Some(Operand::Imm(v)),
                    _ => return Err(Error::Internal("use of an unallocated virtual register")),
                },
                Allocation::MemoryPointer => match self.ctx.vregs[*vreg].kind.clone() {
                    VregKind::MemoryPointer { base, offset } => Some(Operand::Mem {
                        base,
                        offset,
                        variant: *variant,
                    }),
                    _ => return Err(Error::Internal("memory vreg without a location")),
                },
            },
            Value::Indirect {
                base,
                offset,
                variant,
            } => {
                let (base_reg, extra) = match base {
                    IndirectBase::PhysReg(reg) => (*reg, 0),
                    IndirectBase::Vreg(vreg) => match self.alloc.allocation_of(*vreg) {
                        Allocation::Register(reg) => (reg, 0),
                        Allocation::SpillDirect { index, .. } => {
                            // Value-backed memory vreg: address its slots.
                            (PhysReg::Rbp, self.frame.spill_offset(self.offsets, index))
                        }
                        _ => {
                            return Err(Error::Internal(
                                "indirect base through an unmaterialized vreg",
                            ))
                        }
                    },
                    IndirectBase::LocalVar(local) => {
                        (PhysReg::Rbp, self.frame.local_offset(self.offsets, *local)?)
                    }
                    IndirectBase::SpillArea(slot) => {
                        (PhysReg::Rbp, self.frame.spill_offset(self.offsets, *slot))
                    }
                    IndirectBase::ImplicitParameter => {
                        (PhysReg::Rbp, self.offsets.implicit_parameter)
                    }
                    IndirectBase::TemporaryArea(slot) => (
                        PhysReg::Rbp,
                        self.offsets.spill_area + (*slot as i64) * 8,
                    ),
                    IndirectBase::VarargSave => (PhysReg::Rbp, self.offsets.vararg_save),
                    IndirectBase::InternalLabel(label) => {
                        return Ok(Some(Operand::Rip {
                            symbol: label_name(&self.ctx.function_name, *label),
                            variant: *variant,
                        }))
                    }
                    IndirectBase::ExternalLabel(name) => {
                        return Ok(Some(Operand::Rip {
                            symbol: name.clone(),
                            variant: *variant,
                        }))
                    }
                };
                Some(Operand::Mem {
                    base: base_reg,
                    offset: extra + offset,
                    variant: *variant,
                })
            }
            Value::RipIndirect {
                target,
                variant,
                position,
            } => {
                let symbol = match target {
                    RipTarget::Internal(label) => label_name(&self.ctx.function_name, *label),
                    RipTarget::External(name) => name.clone(),
                };
                Some(Operand::Rip {
                    symbol: format!("{symbol}{}", position.suffix()),
                    variant: *variant,
                })
            }
            Value::InternalLabel(label) => Some(Operand::Label(label_name(
                &self.ctx.function_name,
                *label,
            ))),
            Value::ExternalLabel {
                name,
                position,
                offset,
            } => {
                let mut symbol = format!("{name}{}", position.suffix());
                if *offset != 0 {
                    let _ = write!(symbol, " + {offset}");
                }
                Some(Operand::Label(symbol))
            }
            Value::X87(slot) => Some(Operand::X87(*slot)),
            Value::Stash(_) => return Err(Error::Internal("stash operand reached the emitter")),
        })
    }

    fn instruction(&self, out: &mut String, inst: &Inst) -> Result<()> {
        match inst.opcode {
            Opcode::Noop
            | Opcode::TouchVirtualRegister
            | Opcode::VregLifetimeRangeBegin
            | Opcode::VregLifetimeRangeEnd
            | Opcode::VirtualBlockBegin
            | Opcode::VirtualBlockEnd
            | Opcode::StashActivate
            | Opcode::StashDeactivate => return Ok(()),
            Opcode::VirtualRegisterLink => {
                return Err(Error::Internal("virtual link reached the emitter"))
            }
            Opcode::FunctionPrologue => {
                self.prologue(out);
                return Ok(());
            }
            Opcode::FunctionEpilogue => {
                self.epilogue(out);
                return Ok(());
            }
            Opcode::InlineAssembly => {
                if let Value::UnsignedImm(index) = inst.args[0] {
                    let fragment = super::asmcmp::FragmentId::new(index as usize);
                    for line in self.ctx.fragments[fragment].lines() {
                        let _ = writeln!(out, "    {line}");
                    }
                }
                return Ok(());
            }
            Opcode::DataWord => {
                if let Value::UnsignedImm(word) = inst.args[0] {
                    let _ = writeln!(out, "    .word {word}");
                }
                return Ok(());
            }
            _ => {}
        }
        let operands: Vec<Operand> = inst
            .present_args()
            .map(|value| self.resolve(value))
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        let text = match self.syntax {
            AsmSyntax::Intel => self.render_intel(inst.opcode, &operands),
            AsmSyntax::Att => self.render_att(inst.opcode, &operands),
        };
        let _ = writeln!(out, "    {text}");
        Ok(())
    }

    fn prologue(&self, out: &mut String) {
        let push = |out: &mut String, reg: PhysReg| match self.syntax {
            AsmSyntax::Att => {
                let _ = writeln!(out, "    pushq %{}", reg.name64());
            }
            AsmSyntax::Intel => {
                let _ = writeln!(out, "    push {}", reg.name64());
            }
        };
        push(out, PhysReg::Rbp);
        match self.syntax {
            AsmSyntax::Att => {
                let _ = writeln!(out, "    movq %rsp, %rbp");
            }
            AsmSyntax::Intel => {
                let _ = writeln!(out, "    mov rbp, rsp");
            }
        }
        for reg in self.frame.preserved_registers() {
            push(out, reg);
        }
        if self.offsets.allocated_size > 0 {
            match self.syntax {
                AsmSyntax::Att => {
                    let _ = writeln!(out, "    subq ${}, %rsp", self.offsets.allocated_size);
                }
                AsmSyntax::Intel => {
                    let _ = writeln!(out, "    sub rsp, {}", self.offsets.allocated_size);
                }
            }
        }
        if self.frame.x87_control_word {
            match self.syntax {
                AsmSyntax::Att => {
                    let _ = writeln!(out, "    fstcw {}(%rbp)", self.offsets.x87_control_word);
                }
                AsmSyntax::Intel => {
                    let _ = writeln!(
                        out,
                        "    fstcw word [rbp {}]",
                        signed_offset(self.offsets.x87_control_word)
                    );
                }
            }
        }
        if self.frame.mxcsr {
            match self.syntax {
                AsmSyntax::Att => {
                    let _ = writeln!(out, "    stmxcsr {}(%rbp)", self.offsets.mxcsr);
                }
                AsmSyntax::Intel => {
                    let _ = writeln!(
                        out,
                        "    stmxcsr dword [rbp {}]",
                        signed_offset(self.offsets.mxcsr)
                    );
                }
            }
        }
    }

    fn epilogue(&self, out: &mut String) {
        if self.frame.x87_control_word {
            match self.syntax {
                AsmSyntax::Att => {
                    let _ = writeln!(out, "    fldcw {}(%rbp)", self.offsets.x87_control_word);
                }
                AsmSyntax::Intel => {
                    let _ = writeln!(
                        out,
                        "    fldcw word [rbp {}]",
                        signed_offset(self.offsets.x87_control_word)
                    );
                }
            }
        }
        if self.frame.mxcsr {
            match self.syntax {
                AsmSyntax::Att => {
                    let _ = writeln!(out, "    ldmxcsr {}(%rbp)", self.offsets.mxcsr);
                }
                AsmSyntax::Intel => {
                    let _ = writeln!(
                        out,
                        "    ldmxcsr dword [rbp {}]",
                        signed_offset(self.offsets.mxcsr)
                    );
                }
            }
        }
        let preserved = self.frame.preserved_registers();
        match self.syntax {
            AsmSyntax::Att => {
                if !preserved.is_empty() {
                    let _ = writeln!(out, "    leaq {}(%rbp), %rsp", -8 * preserved.len() as i64);
                } else {
                    let _ = writeln!(out, "    movq %rbp, %rsp");
                }
                for reg in preserved.iter().rev() {
                    let _ = writeln!(out, "    popq %{}", reg.name64());
                }
                let _ = writeln!(out, "    popq %rbp");
            }
            AsmSyntax::Intel => {
                if !preserved.is_empty() {
                    let _ = writeln!(
                        out,
                        "    lea rsp, [rbp {}]",
                        signed_offset(-8 * preserved.len() as i64)
                    );
                } else {
                    let _ = writeln!(out, "    mov rsp, rbp");
                }
                for reg in preserved.iter().rev() {
                    let _ = writeln!(out, "    pop {}", reg.name64());
                }
                let _ = writeln!(out, "    pop rbp");
            }
        }
    }

    fn render_intel(&self, opcode: Opcode, operands: &[Operand]) -> String {
        if let Some(reg) = zeroing_xor(opcode, operands) {
            return format!("xor {}, {}", reg.name32(), reg.name32());
        }
        let mnemonic = intel_mnemonic(opcode, operands);
        if operands.is_empty() {
            return mnemonic;
        }
        let rendered: Vec<String> = operands
            .iter()
            .map(|operand| self.intel_operand(opcode, operand))
            .collect();
        format!("{mnemonic} {}", rendered.join(", "))
    }

    fn intel_operand(&self, opcode: Opcode, operand: &Operand) -> String {
        match operand {
            Operand::Reg(reg, variant) => intel_reg(opcode, *reg, *variant).to_string(),
            Operand::Imm(value) => format!("{value}"),
            Operand::Mem {
                base,
                offset,
                variant,
            } => {
                let keyword = variant
                    .pointer_keyword()
                    .map(|kw| format!("{kw} "))
                    .unwrap_or_default();
                format!("{keyword}[{} {}]", base.name64(), signed_offset(*offset))
            }
            Operand::Rip { symbol, variant } => {
                let keyword = variant
                    .pointer_keyword()
                    .map(|kw| format!("{kw} "))
                    .unwrap_or_default();
                if matches!(opcode, Opcode::Lea) {
                    format!("[rip + {symbol}]")
                } else {
                    format!("{keyword}[rip + {symbol}]")
                }
            }
            Operand::Label(symbol) => symbol.clone(),
            Operand::X87(slot) => format!("st({slot})"),
        }
    }

    fn render_att(&self, opcode: Opcode, operands: &[Operand]) -> String {
        if let Some(reg) = zeroing_xor(opcode, operands) {
            return format!("xorl %{}, %{}", reg.name32(), reg.name32());
        }
        let mnemonic = att_mnemonic(opcode, operands);
        if operands.is_empty() {
            return mnemonic;
        }
        let mut rendered: Vec<String> = operands
            .iter()
            .map(|operand| self.att_operand(opcode, operand))
            .collect();
        // AT&T reverses operand order except for single operands.
        rendered.reverse();
        format!("{mnemonic} {}", rendered.join(", "))
    }

    fn att_operand(&self, opcode: Opcode, operand: &Operand) -> String {
        let indirect_branch = matches!(opcode, Opcode::Call | Opcode::Jmp)
            && matches!(operand, Operand::Reg(..) | Operand::Mem { .. });
        let star = if indirect_branch { "*" } else { "" };
        match operand {
            Operand::Reg(reg, variant) => format!("{star}%{}", intel_reg(opcode, *reg, *variant)),
            Operand::Imm(value) => format!("${value}"),
            Operand::Mem { base, offset, .. } => {
                if *offset == 0 {
                    format!("{star}(%{})", base.name64())
                } else {
                    format!("{star}{offset}(%{})", base.name64())
                }
            }
            Operand::Rip { symbol, .. } => format!("{symbol}(%rip)"),
            Operand::Label(symbol) => {
                if matches!(opcode, Opcode::Call | Opcode::Jmp | Opcode::Jcc(_)) {
                    symbol.clone()
                } else {
                    format!("${symbol}")
                }
            }
            Operand::X87(slot) => format!("%st({slot})"),
        }
    }
}

// Zeroing a register goes through its 32-bit alias; the write clears the
// upper half anyway and drops the REX prefix.
fn zeroing_xor(opcode: Opcode, operands: &[Operand]) -> Option<PhysReg> {
    match (opcode, operands) {
        (Opcode::Xor, [Operand::Reg(a, _), Operand::Reg(b, _)]) if a == b && !a.is_xmm() => {
            Some(*a)
        }
        _ => None,
    }
}

fn signed_offset(offset: i64) -> String {
    if offset < 0 {
        format!("- {}", -offset)
    } else {
        format!("+ {offset}")
    }
}

// Register name for an operand, taking both the operand variant and the
// opcode's natural width into account.
fn intel_reg(opcode: Opcode, reg: PhysReg, variant: OperandVariant) -> &'static str {
    if reg.is_xmm() {
        return reg.name64();
    }
    match variant {
        OperandVariant::B8 => reg.name8(),
        OperandVariant::B16 => reg.name16(),
        OperandVariant::B32 => reg.name32(),
        OperandVariant::B64 | OperandVariant::FpDouble | OperandVariant::FpSingle => reg.name64(),
        OperandVariant::B80 => reg.name64(),
        OperandVariant::Default => match opcode {
            Opcode::SetCc(_) => reg.name8(),
            _ => reg.name64(),
        },
    }
}

fn widest_variant(operands: &[Operand]) -> OperandVariant {
    for operand in operands {
        let variant = match operand {
            Operand::Reg(_, variant) => *variant,
            Operand::Mem { variant, .. } => *variant,
            Operand::Rip { variant, .. } => *variant,
            _ => OperandVariant::Default,
        };
        if variant != OperandVariant::Default {
            return variant;
        }
    }
    OperandVariant::Default
}

fn intel_mnemonic(opcode: Opcode, operands: &[Operand]) -> String {
    match opcode {
        Opcode::SetCc(cond) => format!("set{}", cond.suffix()),
        Opcode::Jcc(cond) => format!("j{}", cond.suffix()),
        Opcode::Cmov(cond) => format!("cmov{}", cond.suffix()),
        Opcode::Movsx => {
            // A 32-bit source takes the dedicated sign-extending move.
            if matches!(
                operands.get(1),
                Some(Operand::Reg(_, OperandVariant::B32))
                    | Some(Operand::Mem {
                        variant: OperandVariant::B32,
                        ..
                    })
            ) {
                "movsxd".to_string()
            } else {
                "movsx".to_string()
            }
        }
        _ => opcode.info().mnemonic.to_string(),
    }
}

fn att_suffix(variant: OperandVariant) -> &'static str {
    match variant {
        OperandVariant::B8 => "b",
        OperandVariant::B16 => "w",
        OperandVariant::B32 => "l",
        OperandVariant::B64 => "q",
        OperandVariant::FpSingle => "s",
        OperandVariant::FpDouble => "l",
        OperandVariant::B80 => "t",
        OperandVariant::Default => "q",
    }
}

fn att_mnemonic(opcode: Opcode, operands: &[Operand]) -> String {
    use Opcode::*;
    match opcode {
        SetCc(cond) => return format!("set{}", cond.suffix()),
        Jcc(cond) => return format!("j{}", cond.suffix()),
        Cmov(cond) => return format!("cmov{}", cond.suffix()),
        Movsx => {
            let src = match operands.get(1) {
                Some(Operand::Reg(_, variant)) => *variant,
                Some(Operand::Mem { variant, .. }) => *variant,
                _ => OperandVariant::B32,
            };
            return match src {
                OperandVariant::B8 => "movsbq".to_string(),
                OperandVariant::B16 => "movswq".to_string(),
                _ => "movslq".to_string(),
            };
        }
        Movzx => {
            let src = match operands.get(1) {
                Some(Operand::Reg(_, variant)) => *variant,
                Some(Operand::Mem { variant, .. }) => *variant,
                _ => OperandVariant::B8,
            };
            return match src {
                OperandVariant::B16 => "movzwq".to_string(),
                _ => "movzbq".to_string(),
            };
        }
        Fld => {
            let variant = widest_variant(operands);
            return match variant {
                OperandVariant::FpSingle | OperandVariant::B32 => "flds".to_string(),
                OperandVariant::FpDouble | OperandVariant::B64 => "fldl".to_string(),
                OperandVariant::B80 => "fldt".to_string(),
                _ => "fld".to_string(),
            };
        }
        Fstp => {
            let variant = widest_variant(operands);
            return match variant {
                OperandVariant::FpSingle | OperandVariant::B32 => "fstps".to_string(),
                OperandVariant::FpDouble | OperandVariant::B64 => "fstpl".to_string(),
                OperandVariant::B80 => "fstpt".to_string(),
                _ => "fstp".to_string(),
            };
        }
        Fild => {
            return "fildll".to_string();
        }
        Fisttp => {
            return "fisttpll".to_string();
        }
        _ => {}
    }
    let base = opcode.info().mnemonic.to_string();
    let needs_suffix = matches!(
        opcode,
        Mov | Movabs | Add | Sub | And | Or | Xor | Cmp | Test | Neg | Not | Imul | Imul3 | Shl
            | Shr | Sar | Push | Pop | Lea | Mul | Div | Idiv | Call | Jmp
    );
    if !needs_suffix {
        return base;
    }
    if matches!(opcode, Call | Jmp) {
        // Indirect calls/jumps need the star prefix; direct ones none.
        return base;
    }
    let has_register = operands.iter().any(|operand| matches!(operand, Operand::Reg(..)));
    let memory_only = operands
        .iter()
        .all(|operand| !matches!(operand, Operand::Reg(..)));
    if has_register || memory_only {
        format!("{base}{}", att_suffix(widest_variant(operands)))
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_naming_pattern() {
        assert_eq!(label_name("add", LabelId::new(3)), "_kefir_func_add_label3");
    }

    #[test]
    fn source_location_tracker_emits_on_change() {
        let mut tracker = SourceLocationTracker::new();
        let mut out = String::new();
        tracker.update(&mut out, SourceLocation::default());
        assert!(out.is_empty());
        tracker.update(&mut out, SourceLocation::new(4, 2));
        tracker.update(&mut out, SourceLocation::new(4, 2));
        assert_eq!(out, "    .loc 0 4 2\n");
    }

    #[test]
    fn relocation_suffixes() {
        assert_eq!(SymbolPosition::Plt.suffix(), "@PLT");
        assert_eq!(SymbolPosition::GotPcRel.suffix(), "@GOTPCREL");
        assert_eq!(SymbolPosition::TlsGd.suffix(), "@TLSGD");
    }
}
