//! Register allocation.
//!
//! A linear-scan style allocator over the asmcmp stream: instructions are
//! linearized, every virtual register gets a lifetime interval (widened to
//! enclosing virtual-block spans), interference follows from interval
//! overlap, and assignment walks preallocated registers first, then the
//! remaining vregs by descending lifetime length. Values that find no free
//! register of their bank take consecutive spill-area slots instead.

use super::asmcmp::{AsmcmpContext, Opcode, Preallocation, Value, VregId, VregKind};
use super::frame::StackFrame;
use super::regs::{PhysReg, GP_ALLOCATION_ORDER, SSE_ALLOCATION_ORDER};
use crate::entity::{EntityRef, SecondaryMap};
use crate::result::{Error, Result};
use log::trace;
use rustc_hash::{FxHashMap, FxHashSet};

/// Where a virtual register ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Allocation {
    /// Never assigned (unused or immediate-like).
    #[default]
    Unallocated,
    /// A physical register.
    Register(PhysReg),
    /// Spill-area slots holding the value itself.
    SpillDirect {
        /// First slot index.
        index: usize,
        /// Slot count.
        length: usize,
    },
    /// A spill-area slot holding a pointer to the value.
    SpillIndirect {
        /// Slot index.
        index: usize,
    },
    /// A memory location described elsewhere; never materialized.
    MemoryPointer,
}

/// Lifetime interval in linearized order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Lifetime {
    /// First occurrence.
    pub begin: usize,
    /// Last occurrence (inclusive).
    pub end: usize,
}

/// Allocation results for one function.
#[derive(Debug, Default)]
pub struct RegisterAllocator {
    /// Per-vreg allocation.
    pub allocations: SecondaryMap<VregId, Allocation>,
    /// Per-vreg lifetime.
    pub lifetimes: SecondaryMap<VregId, Lifetime>,
    /// Per-vreg enclosing virtual-block ids.
    pub virtual_blocks: SecondaryMap<VregId, Vec<u64>>,
    /// Physical registers handed out (for callee-saved preservation).
    pub used_registers: FxHashSet<PhysReg>,
}

impl RegisterAllocator {
    /// Allocation of `vreg`.
    pub fn allocation_of(&self, vreg: VregId) -> Allocation {
        self.allocations[vreg]
    }

    /// Lifetime of `vreg`.
    pub fn lifetime_of(&self, vreg: VregId) -> Lifetime {
        self.lifetimes[vreg]
    }

    /// Run allocation over `ctx`, reserving spill space in `frame`.
    pub fn run(ctx: &mut AsmcmpContext, frame: &mut StackFrame) -> Result<Self> {
        let mut alloc = RegisterAllocator::default();
        alloc.allocations.resize(ctx.vregs.len());
        alloc.lifetimes.resize(ctx.vregs.len());
        alloc.virtual_blocks.resize(ctx.vregs.len());

        // Lifetimes plus virtual-block membership.
        let mut seen: SecondaryMap<VregId, bool> = SecondaryMap::new();
        let mut block_stack: Vec<(u64, usize, Vec<VregId>)> = Vec::new();
        let mut block_spans: Vec<(usize, usize, Vec<VregId>)> = Vec::new();
        for (index, inst) in ctx.instrs.iter().enumerate() {
            match inst.opcode {
                Opcode::VirtualBlockBegin => {
                    if let Value::UnsignedImm(id) = inst.args[0] {
                        block_stack.push((id, index, Vec::new()));
                    }
                }
                Opcode::VirtualBlockEnd => {
                    if let Some((id, begin, members)) = block_stack.pop() {
                        for &member in &members {
                            alloc.virtual_blocks[member].push(id);
                        }
                        block_spans.push((begin, index, members));
                    }
                }
                _ => {}
            }
            for value in inst.present_args() {
                for vreg in value.vregs() {
                    let lifetime = &mut alloc.lifetimes[vreg];
                    if !seen[vreg] {
                        seen[vreg] = true;
                        lifetime.begin = index;
                    }
                    lifetime.end = index;
                    for (_, _, members) in block_stack.iter_mut() {
                        if !members.contains(&vreg) {
                            members.push(vreg);
                        }
                    }
                }
            }
        }
        // Registers inside a virtual block stay alive across the whole
        // block span.
        for (begin, end, members) in &block_spans {
            for &member in members {
                let lifetime = &mut alloc.lifetimes[member];
                lifetime.begin = lifetime.begin.min(*begin);
                lifetime.end = lifetime.end.max(*end);
            }
        }

        // `same-as` merging: redirect to a representative vreg.
        let mut alias: FxHashMap<VregId, VregId> = FxHashMap::default();
        for (&vreg, preallocation) in &ctx.preallocation {
            if let Preallocation::SameAs(other) = preallocation {
                let target = resolve_alias(&alias, *other);
                if target != vreg {
                    alias.insert(vreg, target);
                }
            }
        }
        for (&vreg, &target) in &alias {
            if seen[vreg] {
                let merged_begin = alloc.lifetimes[vreg].begin.min(alloc.lifetimes[target].begin);
                let merged_end = alloc.lifetimes[vreg].end.max(alloc.lifetimes[target].end);
                alloc.lifetimes[target] = Lifetime {
                    begin: merged_begin,
                    end: merged_end,
                };
                alloc.lifetimes[vreg] = alloc.lifetimes[target];
            }
        }

        // Allocation order: preallocated first in appearance order, then by
        // descending lifetime length.
        let mut order: Vec<VregId> = ctx.vregs.keys().filter(|&v| seen[v]).collect();
        order.sort_by_key(|&vreg| {
            let preallocated = matches!(
                ctx.preallocation.get(&vreg),
                Some(Preallocation::Requirement(_)) | Some(Preallocation::Hint(_))
            ) || matches!(ctx.vregs[vreg].kind, VregKind::FixedRegister(_));
            let lifetime = alloc.lifetimes[vreg];
            let length = lifetime.end - lifetime.begin;
            (
                usize::from(!preallocated),
                if preallocated { lifetime.begin } else { usize::MAX - length },
            )
        });

        for vreg in order {
            if alloc.allocations[vreg] != Allocation::Unallocated {
                continue;
            }
            if let Some(&target) = alias.get(&vreg) {
                // Representative allocates; alias copies afterwards.
                if alloc.allocations[target] == Allocation::Unallocated {
                    let assigned = alloc.assign(ctx, frame, target)?;
                    alloc.allocations[target] = assigned;
                }
                alloc.allocations[vreg] = alloc.allocations[target];
                continue;
            }
            let assigned = alloc.assign(ctx, frame, vreg)?;
            alloc.allocations[vreg] = assigned;
        }

        for &reg in &alloc.used_registers {
            frame.preserve_register(reg)?;
        }
        alloc.fill_stashes(ctx, frame)?;
        Ok(alloc)
    }

    fn assign(
        &mut self,
        ctx: &AsmcmpContext,
        frame: &mut StackFrame,
        vreg: VregId,
    ) -> Result<Allocation> {
        let kind = ctx.vregs[vreg].kind.clone();
        let allocation = match kind {
            VregKind::FixedRegister(reg) => {
                self.used_registers.insert(reg);
                Allocation::Register(reg)
            }
            VregKind::ImmediateInteger(_) => Allocation::Unallocated,
            VregKind::MemoryPointer { .. } | VregKind::ExternalMemory => Allocation::MemoryPointer,
            VregKind::SpillAreaIndirect => {
                let index = frame.allocate_spill(1)?;
                Allocation::SpillIndirect { index }
            }
            VregKind::LongDouble => {
                let index = frame.allocate_spill(2)?;
                Allocation::SpillDirect { index, length: 2 }
            }
            VregKind::Pair(first, second) => {
                for child in [first, second] {
                    if self.allocations[child] == Allocation::Unallocated {
                        let assigned = self.assign(ctx, frame, child)?;
                        self.allocations[child] = assigned;
                    }
                }
                Allocation::Unallocated
            }
            VregKind::GeneralPurpose | VregKind::FloatingPoint => {
                let bank: &[PhysReg] = if kind == VregKind::GeneralPurpose {
                    &GP_ALLOCATION_ORDER
                } else {
                    &SSE_ALLOCATION_ORDER
                };
                let conflicts = self.conflicting_registers(ctx, vreg);
                let choice = match ctx.preallocation.get(&vreg) {
                    Some(Preallocation::Requirement(reg)) => {
                        if conflicts.contains(reg) {
                            return Err(Error::Internal(
                                "conflicting physical register requirement",
                            ));
                        }
                        Some(*reg)
                    }
                    Some(Preallocation::Hint(reg))
                        if bank.contains(reg) && !conflicts.contains(reg) =>
                    {
                        Some(*reg)
                    }
                    _ => bank.iter().copied().find(|reg| !conflicts.contains(reg)),
                };
                match choice {
                    Some(reg) => {
                        trace!("{vreg} -> {reg}");
                        self.used_registers.insert(reg);
                        Allocation::Register(reg)
                    }
                    None => {
                        let index = frame.allocate_spill(1)?;
                        trace!("{vreg} -> spill {index}");
                        Allocation::SpillDirect { index, length: 1 }
                    }
                }
            }
        };
        Ok(allocation)
    }

    // Registers already taken by vregs whose lifetime or virtual blocks
    // overlap `vreg`.
    fn conflicting_registers(&self, ctx: &AsmcmpContext, vreg: VregId) -> FxHashSet<PhysReg> {
        let lifetime = self.lifetimes[vreg];
        let blocks = &self.virtual_blocks[vreg];
        let mut conflicts = FxHashSet::default();
        for other in ctx.vregs.keys() {
            if other == vreg {
                continue;
            }
            let Allocation::Register(reg) = self.allocations[other] else {
                continue;
            };
            let other_lifetime = self.lifetimes[other];
            let overlap = lifetime.begin <= other_lifetime.end && other_lifetime.begin <= lifetime.end;
            let shared_block = self.virtual_blocks[other]
                .iter()
                .any(|id| blocks.contains(id));
            if overlap || shared_block {
                conflicts.insert(reg);
            }
        }
        conflicts
    }

    /// Does any vreg use the given physical register?
    pub fn has_used_register(&self, reg: PhysReg) -> bool {
        self.used_registers.contains(&reg)
    }

    // Record, per stash, the caller-saved registers live across it.
    fn fill_stashes(&self, ctx: &mut AsmcmpContext, frame: &mut StackFrame) -> Result<()> {
        let mut pending: Vec<(usize, super::asmcmp::StashId)> = Vec::new();
        for (index, inst) in ctx.instrs.iter().enumerate() {
            if inst.opcode == Opcode::StashActivate {
                if let Value::Stash(stash) = inst.args[0] {
                    pending.push((index, stash));
                }
            }
        }
        for (position, stash) in pending {
            let mut saved = Vec::new();
            for vreg in ctx.vregs.keys() {
                let Allocation::Register(reg) = self.allocations[vreg] else {
                    continue;
                };
                if reg.is_callee_saved() {
                    continue;
                }
                let lifetime = self.lifetimes[vreg];
                if lifetime.begin < position && lifetime.end > position {
                    let slot = frame.allocate_spill(1)?;
                    saved.push((reg, slot));
                }
            }
            saved.sort_by_key(|&(reg, _)| reg);
            saved.dedup_by_key(|&mut (reg, _)| reg);
            ctx.stashes[stash].saved = saved;
        }
        Ok(())
    }
}

fn resolve_alias(alias: &FxHashMap<VregId, VregId>, mut vreg: VregId) -> VregId {
    let mut guard = 0;
    while let Some(&next) = alias.get(&vreg) {
        vreg = next;
        guard += 1;
        if guard > alias.len() {
            break;
        }
    }
    vreg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::x64::asmcmp::OperandVariant;

    fn value(vreg: VregId) -> Value {
        Value::Vreg {
            vreg,
            variant: OperandVariant::Default,
        }
    }

    #[test]
    fn interfering_vregs_take_distinct_registers() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_vreg(VregKind::GeneralPurpose);
        let b = ctx.new_vreg(VregKind::GeneralPurpose);
        ctx.push2(Opcode::Mov, value(a), Value::SignedImm(1));
        ctx.push2(Opcode::Mov, value(b), Value::SignedImm(2));
        ctx.push2(Opcode::Add, value(a), value(b));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        let ra = alloc.allocation_of(a);
        let rb = alloc.allocation_of(b);
        match (ra, rb) {
            (Allocation::Register(x), Allocation::Register(y)) => assert_ne!(x, y),
            other => panic!("expected registers, got {other:?}"),
        }
    }

    #[test]
    fn requirement_is_honored() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_vreg(VregKind::GeneralPurpose);
        ctx.preallocate(a, Preallocation::Requirement(PhysReg::Rax));
        ctx.push2(Opcode::Mov, value(a), Value::SignedImm(1));
        ctx.push1(Opcode::Push, value(a));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        assert_eq!(alloc.allocation_of(a), Allocation::Register(PhysReg::Rax));
    }

    #[test]
    fn lifetimes_cover_all_occurrences() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_vreg(VregKind::GeneralPurpose);
        ctx.push0(Opcode::FunctionPrologue);
        ctx.push2(Opcode::Mov, value(a), Value::SignedImm(1));
        ctx.push0(Opcode::Noop);
        ctx.push2(Opcode::Add, value(a), Value::SignedImm(2));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        assert_eq!(alloc.lifetime_of(a), Lifetime { begin: 1, end: 3 });
    }

    #[test]
    fn long_double_takes_two_spill_slots() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_vreg(VregKind::LongDouble);
        ctx.push1(Opcode::Fld, value(a));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        assert_eq!(alloc.allocation_of(a), Allocation::SpillDirect { index: 0, length: 2 });
        assert!(frame.spill_area.get(1).unwrap());
    }

    #[test]
    fn virtual_block_members_interfere() {
        let mut ctx = AsmcmpContext::new("f");
        let a = ctx.new_vreg(VregKind::GeneralPurpose);
        let b = ctx.new_vreg(VregKind::GeneralPurpose);
        ctx.push1(Opcode::VirtualBlockBegin, Value::UnsignedImm(7));
        ctx.push2(Opcode::Mov, value(a), Value::SignedImm(1));
        ctx.push2(Opcode::Mov, value(b), Value::SignedImm(2));
        ctx.push1(Opcode::VirtualBlockEnd, Value::UnsignedImm(7));
        let mut frame = StackFrame::new();
        let alloc = RegisterAllocator::run(&mut ctx, &mut frame).unwrap();
        match (alloc.allocation_of(a), alloc.allocation_of(b)) {
            (Allocation::Register(x), Allocation::Register(y)) => assert_ne!(x, y),
            other => panic!("expected registers, got {other:?}"),
        }
        assert_eq!(alloc.virtual_blocks[a], vec![7]);
    }
}
