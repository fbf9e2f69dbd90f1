//! Flow-control tree.
//!
//! The analyzer keeps a stack of the control structures enclosing the node
//! under analysis. Branching statements (`break`, `continue`, `goto`,
//! `case`, `default`, asm jump labels) resolve against this stack and
//! record a target [`PointId`]; the AST→IR translator later binds each
//! point to an IR block.

use crate::entity::PrimaryMap;
use crate::entity_ref;
use crate::result::{Error, Result};
use std::collections::BTreeMap;

entity_ref! {
    /// Reference to a flow-control structure.
    pub struct FlowId("flow")
}

entity_ref! {
    /// Reference to a flow-control point (a branch target).
    pub struct PointId("fp")
}

/// A branch target.
#[derive(Debug, Clone, Default)]
pub struct FlowPoint {
    /// The structure the point belongs to, if any.
    pub owner: Option<FlowId>,
}

/// Payload of one control structure.
#[derive(Debug, Clone)]
pub enum FlowStructure {
    /// Plain block.
    Block,
    /// `if`/`else`.
    If,
    /// `switch`: case map, default, and the break target.
    Switch {
        /// `case value -> point`, ordered by value.
        cases: BTreeMap<i64, PointId>,
        /// `default:` point, if seen.
        default_case: Option<PointId>,
        /// Break target.
        end: PointId,
    },
    /// `while` loop.
    While {
        /// Continue target.
        continue_point: PointId,
        /// Break target.
        end: PointId,
    },
    /// `do`/`while` loop.
    DoWhile {
        /// Continue target.
        continue_point: PointId,
        /// Break target.
        end: PointId,
    },
    /// `for` loop.
    For {
        /// Continue target.
        continue_point: PointId,
        /// Break target.
        end: PointId,
    },
    /// Block with additional branch points (`asm goto` origin).
    BranchingPoint {
        /// Named branches added by the inline-assembly analyzer.
        branches: Vec<(String, PointId)>,
    },
}

/// One node of the flow-control tree.
#[derive(Debug, Clone)]
pub struct FlowControl {
    /// Structure payload.
    pub structure: FlowStructure,
    /// Enclosing structure.
    pub parent: Option<FlowId>,
}

/// The tree plus the cursor into it.
#[derive(Debug, Default)]
pub struct FlowTree {
    structures: PrimaryMap<FlowId, FlowControl>,
    points: PrimaryMap<PointId, FlowPoint>,
    current: Option<FlowId>,
}

impl FlowTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// The structure the analyzer is currently inside, if any.
    pub fn current(&self) -> Option<FlowId> {
        self.current
    }

    /// Borrow a structure.
    pub fn structure(&self, id: FlowId) -> &FlowControl {
        &self.structures[id]
    }

    /// Borrow a structure mutably.
    pub fn structure_mut(&mut self, id: FlowId) -> &mut FlowControl {
        &mut self.structures[id]
    }

    /// Allocate a fresh branch target owned by the current structure.
    pub fn new_point(&mut self) -> PointId {
        self.points.push(FlowPoint {
            owner: self.current,
        })
    }

    /// Total number of points allocated.
    pub fn point_count(&self) -> usize {
        self.points.len()
    }

    /// Open a structure and descend into it.
    pub fn push(&mut self, structure: FlowStructure) -> FlowId {
        let id = self.structures.push(FlowControl {
            structure,
            parent: self.current,
        });
        self.current = Some(id);
        id
    }

    /// Close the current structure, ascending to its parent.
    pub fn pop(&mut self) -> Result<()> {
        let current = self.current.ok_or(Error::Internal("unbalanced flow pop"))?;
        self.current = self.structures[current].parent;
        Ok(())
    }

    /// The innermost enclosing loop, for `continue`.
    pub fn innermost_loop(&self) -> Option<FlowId> {
        self.walk_up(|s| {
            matches!(
                s,
                FlowStructure::While { .. } | FlowStructure::DoWhile { .. } | FlowStructure::For { .. }
            )
        })
    }

    /// The innermost enclosing loop or switch, for `break`.
    pub fn innermost_breakable(&self) -> Option<FlowId> {
        self.walk_up(|s| {
            matches!(
                s,
                FlowStructure::While { .. }
                    | FlowStructure::DoWhile { .. }
                    | FlowStructure::For { .. }
                    | FlowStructure::Switch { .. }
            )
        })
    }

    /// The innermost enclosing switch, for `case`/`default`.
    pub fn innermost_switch(&self) -> Option<FlowId> {
        self.walk_up(|s| matches!(s, FlowStructure::Switch { .. }))
    }

    fn walk_up(&self, mut predicate: impl FnMut(&FlowStructure) -> bool) -> Option<FlowId> {
        let mut cursor = self.current;
        while let Some(id) = cursor {
            if predicate(&self.structures[id].structure) {
                return Some(id);
            }
            cursor = self.structures[id].parent;
        }
        None
    }

    /// The break target of a loop or switch.
    pub fn end_point(&self, id: FlowId) -> Result<PointId> {
        match &self.structures[id].structure {
            FlowStructure::Switch { end, .. }
            | FlowStructure::While { end, .. }
            | FlowStructure::DoWhile { end, .. }
            | FlowStructure::For { end, .. } => Ok(*end),
            _ => Err(Error::Internal("structure has no end point")),
        }
    }

    /// The continue target of a loop.
    pub fn continue_point(&self, id: FlowId) -> Result<PointId> {
        match &self.structures[id].structure {
            FlowStructure::While { continue_point, .. }
            | FlowStructure::DoWhile { continue_point, .. }
            | FlowStructure::For { continue_point, .. } => Ok(*continue_point),
            _ => Err(Error::Internal("structure has no continue point")),
        }
    }

    /// Insert a `case value -> point` mapping into a switch. Duplicate
    /// values are rejected.
    pub fn register_case(&mut self, switch: FlowId, value: i64, point: PointId) -> Result<()> {
        match &mut self.structures[switch].structure {
            FlowStructure::Switch { cases, .. } => {
                if cases.contains_key(&value) {
                    return Err(Error::AlreadyExists);
                }
                cases.insert(value, point);
                Ok(())
            }
            _ => Err(Error::Internal("case registered on a non-switch structure")),
        }
    }

    /// Register the `default:` point of a switch. Duplicates are rejected.
    pub fn register_default(&mut self, switch: FlowId, point: PointId) -> Result<()> {
        match &mut self.structures[switch].structure {
            FlowStructure::Switch { default_case, .. } => {
                if default_case.is_some() {
                    return Err(Error::AlreadyExists);
                }
                *default_case = Some(point);
                Ok(())
            }
            _ => Err(Error::Internal("default registered on a non-switch structure")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn switch_structure(tree: &mut FlowTree) -> FlowId {
        let end = tree.new_point();
        tree.push(FlowStructure::Switch {
            cases: BTreeMap::new(),
            default_case: None,
            end,
        })
    }

    #[test]
    fn break_and_continue_targets() {
        let mut tree = FlowTree::new();
        tree.push(FlowStructure::Block);
        let continue_point = tree.new_point();
        let end = tree.new_point();
        let loop_id = tree.push(FlowStructure::While {
            continue_point,
            end,
        });
        let switch_id = switch_structure(&mut tree);
        tree.push(FlowStructure::Block);

        assert_eq!(tree.innermost_loop(), Some(loop_id));
        assert_eq!(tree.innermost_breakable(), Some(switch_id));
        assert_eq!(tree.innermost_switch(), Some(switch_id));

        tree.pop().unwrap();
        tree.pop().unwrap();
        assert_eq!(tree.innermost_breakable(), Some(loop_id));
        tree.pop().unwrap();
        tree.pop().unwrap();
        assert!(tree.innermost_loop().is_none());
        assert!(tree.pop().is_err());
    }

    #[test]
    fn duplicate_cases_rejected() {
        let mut tree = FlowTree::new();
        let switch_id = switch_structure(&mut tree);
        let p1 = tree.new_point();
        let p2 = tree.new_point();
        tree.register_case(switch_id, 1, p1).unwrap();
        assert_eq!(tree.register_case(switch_id, 1, p2), Err(Error::AlreadyExists));
        tree.register_default(switch_id, p1).unwrap();
        assert_eq!(tree.register_default(switch_id, p2), Err(Error::AlreadyExists));
    }
}
