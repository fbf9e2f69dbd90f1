//! x87 evaluation-stack model.
//!
//! `long double` values live on the x87 register stack during codegen. The
//! manager tracks which optimizer instruction occupies each hardware slot
//! (head of the list = `st(0)`), spills the deepest entries to their
//! memory-backed virtual registers when room is needed, and reorders via
//! `fxch` when a return wants a particular value on top. The hardware stack
//! never exceeds eight slots; every instruction that would grow it calls
//! [`X87Stack::ensure`] first.

use super::asmcmp::{AsmcmpContext, Opcode, Value};
use crate::opt::InstrRef;
use crate::result::{Error, Result};
use smallvec::SmallVec;

/// Hardware stack capacity.
pub const X87_STACK_DEPTH: usize = 8;

/// The tracked x87 stack.
#[derive(Debug, Default)]
pub struct X87Stack {
    slots: SmallVec<[InstrRef; X87_STACK_DEPTH]>,
}

impl X87Stack {
    /// Create an empty stack model.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current depth.
    pub fn depth(&self) -> usize {
        self.slots.len()
    }

    /// Position of `instr` from the top, if it is on the stack.
    pub fn position_of(&self, instr: InstrRef) -> Option<usize> {
        self.slots.iter().position(|&slot| slot == instr)
    }

    /// The value currently at `st(0)`, if any.
    pub fn top(&self) -> Option<InstrRef> {
        self.slots.first().copied()
    }

    /// Flush slots until at least `room` are free, writing the deepest
    /// entries back to their memory backing.
    pub fn ensure(
        &mut self,
        ctx: &mut AsmcmpContext,
        backing: &mut impl FnMut(InstrRef) -> Value,
        room: usize,
    ) -> Result<()> {
        if room > X87_STACK_DEPTH {
            return Err(Error::InvalidParameter("x87 reservation exceeds the stack"));
        }
        while self.slots.len() + room > X87_STACK_DEPTH {
            let deepest = self.slots.len() - 1;
            if deepest > 0 {
                ctx.push1(Opcode::Fxch, Value::X87(deepest));
                self.slots.swap(0, deepest);
            }
            let spilled = self.slots.remove(0);
            ctx.push1(Opcode::Fstp, backing(spilled));
        }
        Ok(())
    }

    /// Record that a freshly executed `fld`-like instruction put `instr`
    /// on top of the stack.
    pub fn push(&mut self, instr: InstrRef) -> Result<()> {
        if self.slots.len() >= X87_STACK_DEPTH {
            return Err(Error::Internal("x87 stack overflow"));
        }
        self.slots.insert(0, instr);
        Ok(())
    }

    /// Reload a previously spilled value on top of the stack.
    pub fn load(
        &mut self,
        ctx: &mut AsmcmpContext,
        backing: &mut impl FnMut(InstrRef) -> Value,
        instr: InstrRef,
    ) -> Result<()> {
        self.ensure(ctx, backing, 1)?;
        ctx.push1(Opcode::Fld, backing(instr));
        self.push(instr)
    }

    /// Make sure `instr` sits on the hardware stack, reloading if needed,
    /// and rotate it to `st(0)`.
    pub fn bring_to_top(
        &mut self,
        ctx: &mut AsmcmpContext,
        backing: &mut impl FnMut(InstrRef) -> Value,
        instr: InstrRef,
    ) -> Result<()> {
        match self.position_of(instr) {
            None => self.load(ctx, backing, instr),
            Some(0) => Ok(()),
            Some(position) => {
                ctx.push1(Opcode::Fxch, Value::X87(position));
                self.slots.swap(0, position);
                Ok(())
            }
        }
    }

    /// Record that `consumer` popped the top-of-stack value `instr`.
    pub fn consume_by(&mut self, instr: InstrRef, consumer: InstrRef) -> Result<()> {
        let _ = consumer;
        match self.slots.first() {
            Some(&top) if top == instr => {
                self.slots.remove(0);
                Ok(())
            }
            _ => Err(Error::Internal("consumed x87 value is not on top")),
        }
    }

    /// Spill every tracked value to memory, leaving the stack empty.
    pub fn flush(
        &mut self,
        ctx: &mut AsmcmpContext,
        backing: &mut impl FnMut(InstrRef) -> Value,
    ) -> Result<()> {
        while let Some(&top) = self.slots.first() {
            ctx.push1(Opcode::Fstp, backing(top));
            self.slots.remove(0);
        }
        Ok(())
    }

    /// Rotate `instr` to the top and discard everything below it
    /// (`fstp st(0)` for each remaining entry). Used on X87 returns.
    pub fn isolate_top(
        &mut self,
        ctx: &mut AsmcmpContext,
        backing: &mut impl FnMut(InstrRef) -> Value,
        instr: InstrRef,
    ) -> Result<()> {
        self.bring_to_top(ctx, backing, instr)?;
        while self.slots.len() > 1 {
            // Drop the value right below the top.
            ctx.push1(Opcode::Fxch, Value::X87(1));
            self.slots.swap(0, 1);
            ctx.push1(Opcode::Fstp, Value::X87(0));
            self.slots.remove(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    fn refs(count: usize) -> Vec<InstrRef> {
        (0..count).map(InstrRef::new).collect()
    }

    fn backing(_: InstrRef) -> Value {
        Value::X87(7)
    }

    #[test]
    fn depth_matches_push_pop_balance() {
        let mut ctx = AsmcmpContext::new("f");
        let mut stack = X87Stack::new();
        let values = refs(3);
        for &value in &values {
            stack.ensure(&mut ctx, &mut backing, 1).unwrap();
            stack.push(value).unwrap();
        }
        assert_eq!(stack.depth(), 3);
        assert_eq!(stack.position_of(values[2]), Some(0));
        stack.consume_by(values[2], values[0]).unwrap();
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn ensure_spills_deepest_first() {
        let mut ctx = AsmcmpContext::new("f");
        let mut stack = X87Stack::new();
        let values = refs(8);
        for &value in &values {
            stack.ensure(&mut ctx, &mut backing, 1).unwrap();
            stack.push(value).unwrap();
        }
        assert_eq!(stack.depth(), 8);
        let before = ctx.instrs.len();
        stack.ensure(&mut ctx, &mut backing, 1).unwrap();
        assert_eq!(stack.depth(), 7);
        // Spilling the deepest entry costs an fxch and an fstp.
        let emitted: Vec<_> = ctx.instrs[before..].iter().map(|i| i.opcode).collect();
        assert_eq!(emitted, vec![Opcode::Fxch, Opcode::Fstp]);
        // The first-pushed (deepest) value is gone.
        assert_eq!(stack.position_of(values[0]), None);
    }

    #[test]
    fn isolate_top_drops_everything_else() {
        let mut ctx = AsmcmpContext::new("f");
        let mut stack = X87Stack::new();
        let values = refs(3);
        for &value in &values {
            stack.push(value).unwrap();
        }
        stack
            .isolate_top(&mut ctx, &mut backing, values[0])
            .unwrap();
        assert_eq!(stack.depth(), 1);
        assert_eq!(stack.position_of(values[0]), Some(0));
    }

    #[test]
    fn overflow_is_an_invariant_violation() {
        let mut stack = X87Stack::new();
        for value in refs(8) {
            stack.push(value).unwrap();
        }
        assert!(stack.push(InstrRef::new(99)).is_err());
    }
}
