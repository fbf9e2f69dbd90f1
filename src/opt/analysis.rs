//! Code analysis and scheduling.
//!
//! Produces the per-instruction linear indices and the block emission order
//! that instruction selection consumes. Blocks are scheduled in
//! reverse-postorder from the entry so that every block is preceded by at
//! least one predecessor (back edges excepted), which keeps the x87 stack
//! model and phi resolution simple.

use super::{BlockId, InstrRef, OptFunction};
use crate::entity::SecondaryMap;
use rustc_hash::FxHashSet;

/// Analysis results over one function.
#[derive(Debug)]
pub struct CodeAnalysis {
    /// Blocks in emission order.
    pub block_order: Vec<BlockId>,
    /// Linear index of every scheduled instruction.
    pub linear_index: SecondaryMap<InstrRef, usize>,
    /// Total number of scheduled instructions.
    pub length: usize,
}

impl CodeAnalysis {
    /// Analyze `function`: compute the block schedule and linearize.
    pub fn of(function: &OptFunction) -> Self {
        let mut order = Vec::with_capacity(function.blocks.len());
        let mut visited = FxHashSet::default();
        postorder(function, function.entry, &mut visited, &mut order);
        order.reverse();

        let mut linear_index = SecondaryMap::new();
        let mut next = 0usize;
        for &block in &order {
            for &instr in &function.blocks[block].instrs {
                linear_index[instr] = next;
                next += 1;
            }
        }
        Self {
            block_order: order,
            linear_index,
            length: next,
        }
    }

    /// Predecessors of each block, in schedule order.
    pub fn predecessors(&self, function: &OptFunction, block: BlockId) -> Vec<BlockId> {
        self.block_order
            .iter()
            .copied()
            .filter(|&candidate| function.successors(candidate).contains(&block))
            .collect()
    }
}

fn postorder(
    function: &OptFunction,
    block: BlockId,
    visited: &mut FxHashSet<BlockId>,
    out: &mut Vec<BlockId>,
) {
    if !visited.insert(block) {
        return;
    }
    for successor in function.successors(block) {
        postorder(function, successor, visited, out);
    }
    out.push(block);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityRef, PrimaryMap};
    use crate::opt::{Block, InstrKind, OptFunction};

    fn function_with_diamond() -> OptFunction {
        let mut blocks = PrimaryMap::new();
        let entry = blocks.push(Block::default());
        let left = blocks.push(Block::default());
        let right = blocks.push(Block::default());
        let join = blocks.push(Block::default());
        let mut f = OptFunction {
            name: "diamond".into(),
            ty: crate::types::TypeId::new(0),
            locals: PrimaryMap::new(),
            parameters: Vec::new(),
            blocks,
            instrs: PrimaryMap::new(),
            phis: PrimaryMap::new(),
            calls: PrimaryMap::new(),
            entry,
            internal: false,
            variadic: false,
        };
        let condition = f.append(entry, InstrKind::IntConst(1));
        f.append(
            entry,
            InstrKind::Branch {
                condition,
                on_true: left,
                on_false: right,
            },
        );
        f.append(left, InstrKind::Jump { target: join });
        f.append(right, InstrKind::Jump { target: join });
        f.append(join, InstrKind::Return { value: None });
        f
    }

    #[test]
    fn schedule_visits_every_reachable_block_once() {
        let f = function_with_diamond();
        let analysis = CodeAnalysis::of(&f);
        assert_eq!(analysis.block_order.len(), 4);
        assert_eq!(analysis.block_order[0], f.entry);
        assert_eq!(analysis.length, f.instrs.len());
    }

    #[test]
    fn linear_indices_follow_schedule() {
        let f = function_with_diamond();
        let analysis = CodeAnalysis::of(&f);
        let mut seen = vec![false; analysis.length];
        for &block in &analysis.block_order {
            let mut previous = None;
            for &instr in &f.blocks[block].instrs {
                let index = analysis.linear_index[instr];
                assert!(!seen[index]);
                seen[index] = true;
                if let Some(previous) = previous {
                    assert!(index > previous);
                }
                previous = Some(index);
            }
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn join_block_scheduled_after_predecessors() {
        let f = function_with_diamond();
        let analysis = CodeAnalysis::of(&f);
        let join = *analysis.block_order.last().unwrap();
        assert_eq!(analysis.predecessors(&f, join).len(), 2);
    }
}
