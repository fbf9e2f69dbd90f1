//! Stack-frame computation.
//!
//! Codegen accumulates requirements (preserved registers, spill slots,
//! local variables, x87/MXCSR control state, the implicit return pointer,
//! the variadic save area); `compute` turns them into absolute offsets from
//! the frame pointer, and the emitter expands the prologue/epilogue virtual
//! opcodes from the result. The stack stays 16-byte aligned at call sites.

use super::regs::PhysReg;
use crate::bitset::Bitset;
use crate::entity::SecondaryMap;
use crate::ir::{LocalDecl, LocalId};
use crate::result::{Error, Result};

/// Callee-saved registers in preservation order.
pub const PRESERVED_REGS: [PhysReg; 5] = [
    PhysReg::Rbx,
    PhysReg::R12,
    PhysReg::R13,
    PhysReg::R14,
    PhysReg::R15,
];

/// Bump allocator for the local-variable area.
#[derive(Debug, Default)]
pub struct LocalAllocator {
    offsets: SecondaryMap<LocalId, u64>,
    allocated: SecondaryMap<LocalId, bool>,
    size: u64,
    alignment: u64,
    return_space: Option<LocalId>,
}

impl LocalAllocator {
    /// Assign an offset to each declared local. Slots are sized in whole
    /// eightbytes so register-aggregate spills never straddle neighbors.
    pub fn allocate(&mut self, local: LocalId, decl: &LocalDecl) {
        let alignment = decl.alignment.max(1);
        let offset = self.size.next_multiple_of(alignment);
        self.offsets[local] = offset;
        self.allocated[local] = true;
        self.size = offset + decl.size.max(1).next_multiple_of(8);
        self.alignment = self.alignment.max(alignment);
    }

    /// Offset of a local within the local area.
    pub fn offset_of(&self, local: LocalId) -> Result<u64> {
        if !self.allocated[local] {
            return Err(Error::Internal("local slot was never allocated"));
        }
        Ok(self.offsets[local])
    }

    /// Total area size.
    pub fn total_size(&self) -> u64 {
        self.size
    }

    /// Area alignment.
    pub fn alignment(&self) -> u64 {
        self.alignment.max(1)
    }

    /// Mark `local` as the storage backing a memory-ABI return, allowing
    /// return lowering to skip the copy into the caller's buffer.
    pub fn mark_return_space(&mut self, local: LocalId) {
        self.return_space = Some(local);
    }

    /// The marked return-space local, if any.
    pub fn return_space(&self) -> Option<LocalId> {
        self.return_space
    }
}

/// Accumulated frame requirements.
#[derive(Debug)]
pub struct StackFrame {
    /// Which of [`PRESERVED_REGS`] must be saved.
    pub preserved: Bitset,
    /// Save the x87 control word.
    pub x87_control_word: bool,
    /// Save MXCSR.
    pub mxcsr: bool,
    /// Save the hidden memory-return pointer on entry.
    pub implicit_parameter: bool,
    /// Reserve the variadic register save area.
    pub vararg_save: bool,
    /// Spill slots; one bit per eightbyte.
    pub spill_area: Bitset,
    /// Local-variable allocator.
    pub locals: LocalAllocator,
}

/// Absolute offsets from `rbp` for every frame region.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameOffsets {
    /// Saved caller frame pointer.
    pub previous_base: i64,
    /// Lowest preserved-register slot.
    pub preserved_regs: i64,
    /// x87 control word slot.
    pub x87_control_word: i64,
    /// MXCSR slot.
    pub mxcsr: i64,
    /// Implicit-parameter (hidden return pointer) slot.
    pub implicit_parameter: i64,
    /// Variadic register save area.
    pub vararg_save: i64,
    /// Spill area base.
    pub spill_area: i64,
    /// Local-variable area base.
    pub local_area: i64,
    /// Bytes subtracted from `rsp` after the preserved-register pushes.
    pub allocated_size: u64,
}

impl StackFrame {
    /// Create an empty frame descriptor.
    pub fn new() -> Self {
        Self {
            preserved: Bitset::new_fixed(PRESERVED_REGS.len()),
            x87_control_word: false,
            mxcsr: false,
            implicit_parameter: false,
            vararg_save: false,
            spill_area: Bitset::new(),
            locals: LocalAllocator::default(),
        }
    }

    /// Require preservation of a callee-saved register. Caller-saved
    /// registers are ignored.
    pub fn preserve_register(&mut self, reg: PhysReg) -> Result<()> {
        if let Some(index) = PRESERVED_REGS.iter().position(|&r| r == reg) {
            self.preserved.set(index, true)?;
        }
        Ok(())
    }

    /// Preserved registers in order.
    pub fn preserved_registers(&self) -> Vec<PhysReg> {
        PRESERVED_REGS
            .iter()
            .enumerate()
            .filter(|&(index, _)| self.preserved.get(index).unwrap_or(false))
            .map(|(_, &reg)| reg)
            .collect()
    }

    /// Grow the spill area to at least `slots` eightbytes.
    pub fn ensure_spill(&mut self, slots: usize) -> Result<()> {
        if self.spill_area.length() < slots {
            self.spill_area.resize(slots)?;
        }
        Ok(())
    }

    /// Allocate `length` consecutive spill slots, growing on demand.
    pub fn allocate_spill(&mut self, length: usize) -> Result<usize> {
        if length == 0 {
            return Err(Error::InvalidParameter("zero-length spill allocation"));
        }
        loop {
            match self.spill_area.find_consecutive(false, length, 0) {
                Ok(index) => {
                    self.spill_area.set_consecutive(index, length, true)?;
                    return Ok(index);
                }
                Err(_) => {
                    let grown = self.spill_area.length() + length.max(4);
                    self.spill_area.resize(grown)?;
                }
            }
        }
    }

    /// Compute the frame map.
    pub fn compute(&self) -> FrameOffsets {
        let mut offsets = FrameOffsets {
            previous_base: 0,
            ..FrameOffsets::default()
        };
        let preserved_count = self.preserved_registers().len() as i64;
        // Preserved registers are pushed immediately below the saved rbp.
        offsets.preserved_regs = -8 * preserved_count;
        let mut cursor: i64 = offsets.preserved_regs;
        let mut take = |bytes: u64, alignment: u64| -> i64 {
            let alignment = alignment as i64;
            cursor -= bytes as i64;
            cursor = -(((-cursor) + alignment - 1) / alignment * alignment);
            cursor
        };
        if self.x87_control_word {
            offsets.x87_control_word = take(8, 8);
        }
        if self.mxcsr {
            offsets.mxcsr = take(8, 8);
        }
        if self.implicit_parameter {
            offsets.implicit_parameter = take(8, 8);
        }
        if self.vararg_save {
            offsets.vararg_save = take(
                super::abi::VARARG_GP_SAVE_SIZE + super::abi::VARARG_SSE_SAVE_SIZE,
                16,
            );
        }
        if self.spill_area.length() > 0 {
            offsets.spill_area = take(self.spill_area.length() as u64 * 8, 16);
        }
        if self.locals.total_size() > 0 {
            offsets.local_area = take(self.locals.total_size(), self.locals.alignment().max(16));
        }
        // Keep rsp 16-byte aligned at call sites. On entry rsp is off by
        // the return address; the rbp push realigns it, so the allocation
        // only has to compensate for an odd number of preserved pushes.
        let below_preserved = (-(cursor - offsets.preserved_regs)) as u64;
        let mut allocated = below_preserved.next_multiple_of(16);
        if preserved_count % 2 == 1 {
            allocated += 8;
        }
        offsets.allocated_size = allocated;
        offsets
    }

    /// Absolute `rbp`-relative offset of a local variable.
    pub fn local_offset(&self, offsets: &FrameOffsets, local: LocalId) -> Result<i64> {
        Ok(offsets.local_area + self.locals.offset_of(local)? as i64)
    }

    /// Absolute `rbp`-relative offset of a spill slot.
    pub fn spill_offset(&self, offsets: &FrameOffsets, slot: usize) -> i64 {
        offsets.spill_area + (slot as i64) * 8
    }
}

impl Default for StackFrame {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn zero_length_spill_rejected() {
        let mut frame = StackFrame::new();
        assert!(frame.allocate_spill(0).is_err());
    }

    #[test]
    fn spill_slots_are_consecutive() {
        let mut frame = StackFrame::new();
        let a = frame.allocate_spill(1).unwrap();
        let b = frame.allocate_spill(2).unwrap();
        assert_ne!(a, b);
        assert!(frame.spill_area.get(b).unwrap());
        assert!(frame.spill_area.get(b + 1).unwrap());
    }

    #[test]
    fn frame_is_16_byte_aligned() {
        let mut frame = StackFrame::new();
        frame.preserve_register(PhysReg::Rbx).unwrap();
        frame
            .locals
            .allocate(LocalId::new(0), &LocalDecl { size: 12, alignment: 4, ty: None });
        frame.ensure_spill(3).unwrap();
        let offsets = frame.compute();
        // Return address (8) + rbp push (8) + rbx push (8) + allocation
        // must land back on a 16-byte boundary.
        assert_eq!((8 + 16 + offsets.allocated_size) % 16, 0);
        assert!(offsets.local_area < offsets.spill_area);
    }

    #[test]
    fn return_space_marker_round_trips() {
        let mut allocator = LocalAllocator::default();
        let local = LocalId::new(2);
        allocator.allocate(local, &LocalDecl { size: 24, alignment: 8, ty: None });
        assert_eq!(allocator.return_space(), None);
        allocator.mark_return_space(local);
        assert_eq!(allocator.return_space(), Some(local));
    }

    #[test]
    fn local_offsets_respect_alignment() {
        let mut allocator = LocalAllocator::default();
        allocator.allocate(LocalId::new(0), &LocalDecl { size: 1, alignment: 1, ty: None });
        allocator.allocate(LocalId::new(1), &LocalDecl { size: 16, alignment: 16, ty: None });
        assert_eq!(allocator.offset_of(LocalId::new(0)).unwrap(), 0);
        assert_eq!(allocator.offset_of(LocalId::new(1)).unwrap(), 16);
        assert_eq!(allocator.total_size(), 32);
        assert_eq!(allocator.alignment(), 16);
    }
}
