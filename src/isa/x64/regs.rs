//! x86-64 register definitions: names per operand width, allocation
//! orders, and the System-V caller/callee-saved partition.

use core::fmt;

/// A physical x86-64 register (general-purpose or SSE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PhysReg {
    /// `rax`.
    Rax,
    /// `rbx`.
    Rbx,
    /// `rcx`.
    Rcx,
    /// `rdx`.
    Rdx,
    /// `rsi`.
    Rsi,
    /// `rdi`.
    Rdi,
    /// `rsp`.
    Rsp,
    /// `rbp`.
    Rbp,
    /// `r8`.
    R8,
    /// `r9`.
    R9,
    /// `r10`.
    R10,
    /// `r11`.
    R11,
    /// `r12`.
    R12,
    /// `r13`.
    R13,
    /// `r14`.
    R14,
    /// `r15`.
    R15,
    /// `xmm0`.
    Xmm0,
    /// `xmm1`.
    Xmm1,
    /// `xmm2`.
    Xmm2,
    /// `xmm3`.
    Xmm3,
    /// `xmm4`.
    Xmm4,
    /// `xmm5`.
    Xmm5,
    /// `xmm6`.
    Xmm6,
    /// `xmm7`.
    Xmm7,
    /// `xmm8`.
    Xmm8,
    /// `xmm9`.
    Xmm9,
    /// `xmm10`.
    Xmm10,
    /// `xmm11`.
    Xmm11,
    /// `xmm12`.
    Xmm12,
    /// `xmm13`.
    Xmm13,
    /// `xmm14`.
    Xmm14,
    /// `xmm15`.
    Xmm15,
}

impl PhysReg {
    /// Is this an SSE register?
    pub fn is_xmm(self) -> bool {
        self >= PhysReg::Xmm0
    }

    /// 64-bit (or SSE) name.
    pub fn name64(self) -> &'static str {
        use PhysReg::*;
        match self {
            Rax => "rax",
            Rbx => "rbx",
            Rcx => "rcx",
            Rdx => "rdx",
            Rsi => "rsi",
            Rdi => "rdi",
            Rsp => "rsp",
            Rbp => "rbp",
            R8 => "r8",
            R9 => "r9",
            R10 => "r10",
            R11 => "r11",
            R12 => "r12",
            R13 => "r13",
            R14 => "r14",
            R15 => "r15",
            Xmm0 => "xmm0",
            Xmm1 => "xmm1",
            Xmm2 => "xmm2",
            Xmm3 => "xmm3",
            Xmm4 => "xmm4",
            Xmm5 => "xmm5",
            Xmm6 => "xmm6",
            Xmm7 => "xmm7",
            Xmm8 => "xmm8",
            Xmm9 => "xmm9",
            Xmm10 => "xmm10",
            Xmm11 => "xmm11",
            Xmm12 => "xmm12",
            Xmm13 => "xmm13",
            Xmm14 => "xmm14",
            Xmm15 => "xmm15",
        }
    }

    /// 32-bit name of a general-purpose register.
    pub fn name32(self) -> &'static str {
        use PhysReg::*;
        match self {
            Rax => "eax",
            Rbx => "ebx",
            Rcx => "ecx",
            Rdx => "edx",
            Rsi => "esi",
            Rdi => "edi",
            Rsp => "esp",
            Rbp => "ebp",
            R8 => "r8d",
            R9 => "r9d",
            R10 => "r10d",
            R11 => "r11d",
            R12 => "r12d",
            R13 => "r13d",
            R14 => "r14d",
            R15 => "r15d",
            _ => self.name64(),
        }
    }

    /// 16-bit name of a general-purpose register.
    pub fn name16(self) -> &'static str {
        use PhysReg::*;
        match self {
            Rax => "ax",
            Rbx => "bx",
            Rcx => "cx",
            Rdx => "dx",
            Rsi => "si",
            Rdi => "di",
            Rsp => "sp",
            Rbp => "bp",
            R8 => "r8w",
            R9 => "r9w",
            R10 => "r10w",
            R11 => "r11w",
            R12 => "r12w",
            R13 => "r13w",
            R14 => "r14w",
            R15 => "r15w",
            _ => self.name64(),
        }
    }

    /// 8-bit name of a general-purpose register.
    pub fn name8(self) -> &'static str {
        use PhysReg::*;
        match self {
            Rax => "al",
            Rbx => "bl",
            Rcx => "cl",
            Rdx => "dl",
            Rsi => "sil",
            Rdi => "dil",
            Rsp => "spl",
            Rbp => "bpl",
            R8 => "r8b",
            R9 => "r9b",
            R10 => "r10b",
            R11 => "r11b",
            R12 => "r12b",
            R13 => "r13b",
            R14 => "r14b",
            R15 => "r15b",
            _ => self.name64(),
        }
    }

    /// Is the register preserved across calls by the callee?
    pub fn is_callee_saved(self) -> bool {
        use PhysReg::*;
        matches!(self, Rbx | R12 | R13 | R14 | R15 | Rbp)
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name64())
    }
}

/// Integer argument registers in ABI order.
pub const ABI_INTEGER_ARGS: [PhysReg; 6] = [
    PhysReg::Rdi,
    PhysReg::Rsi,
    PhysReg::Rdx,
    PhysReg::Rcx,
    PhysReg::R8,
    PhysReg::R9,
];

/// SSE argument registers in ABI order.
pub const ABI_SSE_ARGS: [PhysReg; 8] = [
    PhysReg::Xmm0,
    PhysReg::Xmm1,
    PhysReg::Xmm2,
    PhysReg::Xmm3,
    PhysReg::Xmm4,
    PhysReg::Xmm5,
    PhysReg::Xmm6,
    PhysReg::Xmm7,
];

/// Integer return registers in ABI order.
pub const ABI_INTEGER_RETURNS: [PhysReg; 2] = [PhysReg::Rax, PhysReg::Rdx];

/// SSE return registers in ABI order.
pub const ABI_SSE_RETURNS: [PhysReg; 2] = [PhysReg::Xmm0, PhysReg::Xmm1];

/// Scratch register reserved for the devirtualizer's memory-to-memory
/// fixups; never allocated.
pub const GP_SCRATCH: PhysReg = PhysReg::R11;

/// SSE scratch reserved for the devirtualizer; never allocated.
pub const SSE_SCRATCH: PhysReg = PhysReg::Xmm15;

/// General-purpose allocation order: callee-saved last so leaf code avoids
/// save/restore traffic; `rsp`/`rbp` never allocate and `r11` stays free
/// for devirtualization.
pub const GP_ALLOCATION_ORDER: [PhysReg; 13] = [
    PhysReg::Rax,
    PhysReg::Rcx,
    PhysReg::Rdx,
    PhysReg::Rsi,
    PhysReg::Rdi,
    PhysReg::R8,
    PhysReg::R9,
    PhysReg::R10,
    PhysReg::Rbx,
    PhysReg::R12,
    PhysReg::R13,
    PhysReg::R14,
    PhysReg::R15,
];

/// SSE allocation order (all caller-saved on System-V); `xmm15` stays
/// free for devirtualization.
pub const SSE_ALLOCATION_ORDER: [PhysReg; 15] = [
    PhysReg::Xmm0,
    PhysReg::Xmm1,
    PhysReg::Xmm2,
    PhysReg::Xmm3,
    PhysReg::Xmm4,
    PhysReg::Xmm5,
    PhysReg::Xmm6,
    PhysReg::Xmm7,
    PhysReg::Xmm8,
    PhysReg::Xmm9,
    PhysReg::Xmm10,
    PhysReg::Xmm11,
    PhysReg::Xmm12,
    PhysReg::Xmm13,
    PhysReg::Xmm14,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_per_width() {
        assert_eq!(PhysReg::Rax.name8(), "al");
        assert_eq!(PhysReg::Rsi.name8(), "sil");
        assert_eq!(PhysReg::R10.name32(), "r10d");
        assert_eq!(PhysReg::Xmm3.name64(), "xmm3");
    }

    #[test]
    fn callee_saved_partition() {
        assert!(PhysReg::Rbx.is_callee_saved());
        assert!(PhysReg::R15.is_callee_saved());
        assert!(!PhysReg::Rax.is_callee_saved());
        assert!(!PhysReg::Xmm6.is_callee_saved());
    }

    #[test]
    fn allocation_orders_exclude_stack_and_scratch_registers() {
        assert!(!GP_ALLOCATION_ORDER.contains(&PhysReg::Rsp));
        assert!(!GP_ALLOCATION_ORDER.contains(&PhysReg::Rbp));
        assert!(!GP_ALLOCATION_ORDER.contains(&GP_SCRATCH));
        assert!(!SSE_ALLOCATION_ORDER.contains(&SSE_SCRATCH));
    }
}
