//! Scoped identifiers.
//!
//! Three name spaces are tracked: ordinary identifiers (objects, functions,
//! typedefs, enum constants), tags, and labels. Ordinary and tag scopes
//! nest with blocks; the label scope spans one function. Entries live in an
//! arena and are referenced by [`SymbolId`] from AST properties, so the AST
//! never holds pointers into scope structures.

use crate::ast::StorageClass;
use crate::entity::PrimaryMap;
use crate::entity_ref;
use crate::result::{Error, Result};
use crate::sema::flow::PointId;
use crate::types::TypeId;
use rustc_hash::FxHashMap;

entity_ref! {
    /// Reference to a scope entry.
    pub struct SymbolId("sym")
}

/// Linkage of an object or function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Visible across translation units.
    External,
    /// Visible within the translation unit.
    Internal,
    /// No linkage (block-scope objects, parameters).
    None,
}

/// Payload of a scope entry.
#[derive(Debug, Clone)]
pub enum ScopedIdentifier {
    /// A declared object.
    Object {
        /// Declared type.
        ty: TypeId,
        /// Storage class.
        storage: StorageClass,
        /// Linkage.
        linkage: Linkage,
        /// Explicit alignment in bytes, if any.
        alignment: Option<u64>,
        /// Has a definition (tentative or initialized) been seen?
        defined: bool,
    },
    /// A declared function.
    Function {
        /// Function type.
        ty: TypeId,
        /// Storage class (`static` or external).
        storage: StorageClass,
        /// Has the body been seen?
        defined: bool,
    },
    /// An enumeration constant.
    EnumConstant {
        /// The enumeration type.
        ty: TypeId,
        /// Constant value.
        value: i64,
    },
    /// A structure/union/enum tag.
    TypeTag {
        /// The tagged type.
        ty: TypeId,
    },
    /// A `typedef` name.
    TypeDefinition {
        /// Aliased type.
        ty: TypeId,
    },
    /// A statement label.
    Label {
        /// Flow-control point of the label, once defined.
        point: Option<PointId>,
        /// Whether the label's statement has been seen.
        defined: bool,
        /// Number of gotos referring to the label.
        references: u32,
    },
}

/// One named entry.
#[derive(Debug, Clone)]
pub struct ScopeEntry {
    /// Entry name.
    pub name: String,
    /// Payload.
    pub identifier: ScopedIdentifier,
}

/// Nested ordinary/tag scopes plus the per-function label scope.
#[derive(Debug, Default)]
pub struct ScopeManager {
    entries: PrimaryMap<SymbolId, ScopeEntry>,
    ordinary: Vec<FxHashMap<String, SymbolId>>,
    tags: Vec<FxHashMap<String, SymbolId>>,
    labels: Option<FxHashMap<String, SymbolId>>,
}

impl ScopeManager {
    /// Create a manager holding only the file scope.
    pub fn new() -> Self {
        Self {
            entries: PrimaryMap::new(),
            ordinary: vec![FxHashMap::default()],
            tags: vec![FxHashMap::default()],
            labels: None,
        }
    }

    /// Borrow an entry.
    pub fn entry(&self, id: SymbolId) -> &ScopeEntry {
        &self.entries[id]
    }

    /// Borrow an entry mutably.
    pub fn entry_mut(&mut self, id: SymbolId) -> &mut ScopeEntry {
        &mut self.entries[id]
    }

    /// Are we at file scope?
    pub fn is_file_scope(&self) -> bool {
        self.ordinary.len() == 1
    }

    /// Open a block scope (ordinary + tag name spaces together).
    pub fn push_scope(&mut self) {
        self.ordinary.push(FxHashMap::default());
        self.tags.push(FxHashMap::default());
    }

    /// Close the innermost block scope.
    pub fn pop_scope(&mut self) -> Result<()> {
        if self.ordinary.len() <= 1 {
            return Err(Error::Internal("unbalanced scope pop"));
        }
        self.ordinary.pop();
        self.tags.pop();
        Ok(())
    }

    /// Define an ordinary identifier in the innermost scope.
    ///
    /// A duplicate in the same scope is rejected except when both entries
    /// are declarations of the same linked object/function, in which case
    /// the existing entry is returned for the caller to merge into.
    pub fn define_ordinary(
        &mut self,
        name: &str,
        identifier: ScopedIdentifier,
    ) -> Result<SymbolId> {
        if let Some(&existing) = self.ordinary.last().unwrap().get(name) {
            let relinkable = matches!(
                (&self.entries[existing].identifier, &identifier),
                (
                    ScopedIdentifier::Object {
                        linkage: Linkage::External | Linkage::Internal,
                        ..
                    },
                    ScopedIdentifier::Object { .. }
                ) | (ScopedIdentifier::Function { .. }, ScopedIdentifier::Function { .. })
            );
            if relinkable {
                return Ok(existing);
            }
            return Err(Error::AlreadyExists);
        }
        let id = self.entries.push(ScopeEntry {
            name: name.to_string(),
            identifier,
        });
        self.ordinary.last_mut().unwrap().insert(name.to_string(), id);
        Ok(id)
    }

    /// Resolve an ordinary identifier, innermost scope first.
    pub fn resolve_ordinary(&self, name: &str) -> Option<SymbolId> {
        self.ordinary
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Define a tag in the innermost scope.
    pub fn define_tag(&mut self, name: &str, ty: TypeId) -> Result<SymbolId> {
        if self.tags.last().unwrap().contains_key(name) {
            return Err(Error::AlreadyExists);
        }
        let id = self.entries.push(ScopeEntry {
            name: name.to_string(),
            identifier: ScopedIdentifier::TypeTag { ty },
        });
        self.tags.last_mut().unwrap().insert(name.to_string(), id);
        Ok(id)
    }

    /// Resolve a tag, innermost scope first.
    pub fn resolve_tag(&self, name: &str) -> Option<SymbolId> {
        self.tags
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    /// Open the label scope of a function definition.
    pub fn begin_function(&mut self) -> Result<()> {
        if self.labels.is_some() {
            return Err(Error::Internal("nested function label scope"));
        }
        self.labels = Some(FxHashMap::default());
        Ok(())
    }

    /// Close the label scope, verifying every referenced label was defined.
    pub fn end_function(&mut self) -> Result<()> {
        let labels = self
            .labels
            .take()
            .ok_or(Error::Internal("no function label scope to close"))?;
        for (name, id) in &labels {
            if let ScopedIdentifier::Label { defined: false, .. } = self.entries[*id].identifier {
                return Err(Error::Analysis(format!("use of undefined label '{name}'")));
            }
        }
        Ok(())
    }

    /// Reference a label from a `goto`, creating an unresolved entry when
    /// the label has not been seen yet.
    pub fn reference_label(&mut self, name: &str) -> Result<SymbolId> {
        let labels = self
            .labels
            .as_mut()
            .ok_or(Error::Analysis("label referenced outside of a function".into()))?;
        if let Some(&id) = labels.get(name) {
            if let ScopedIdentifier::Label { references, .. } = &mut self.entries[id].identifier {
                *references += 1;
            }
            return Ok(id);
        }
        let id = self.entries.push(ScopeEntry {
            name: name.to_string(),
            identifier: ScopedIdentifier::Label {
                point: None,
                defined: false,
                references: 1,
            },
        });
        self.labels.as_mut().unwrap().insert(name.to_string(), id);
        Ok(id)
    }

    /// Define a label at its statement, satisfying earlier references.
    pub fn define_label(&mut self, name: &str, point: PointId) -> Result<SymbolId> {
        let labels = self
            .labels
            .as_mut()
            .ok_or(Error::Analysis("label defined outside of a function".into()))?;
        if let Some(&id) = labels.get(name) {
            match &mut self.entries[id].identifier {
                ScopedIdentifier::Label {
                    defined, point: label_point, ..
                } => {
                    if *defined {
                        return Err(Error::Analysis(format!("duplicate label '{name}'")));
                    }
                    *defined = true;
                    *label_point = Some(point);
                    return Ok(id);
                }
                _ => return Err(Error::Internal("label entry of non-label kind")),
            }
        }
        let id = self.entries.push(ScopeEntry {
            name: name.to_string(),
            identifier: ScopedIdentifier::Label {
                point: Some(point),
                defined: true,
                references: 0,
            },
        });
        self.labels.as_mut().unwrap().insert(name.to_string(), id);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityRef;

    #[test]
    fn shadowing_resolves_innermost() {
        let mut scopes = ScopeManager::new();
        let outer = scopes
            .define_ordinary(
                "x",
                ScopedIdentifier::EnumConstant {
                    ty: TypeId::new(0),
                    value: 1,
                },
            )
            .unwrap();
        scopes.push_scope();
        let inner = scopes
            .define_ordinary(
                "x",
                ScopedIdentifier::EnumConstant {
                    ty: TypeId::new(0),
                    value: 2,
                },
            )
            .unwrap();
        assert_eq!(scopes.resolve_ordinary("x"), Some(inner));
        scopes.pop_scope().unwrap();
        assert_eq!(scopes.resolve_ordinary("x"), Some(outer));
    }

    #[test]
    fn labels_resolve_forward_references() {
        let mut scopes = ScopeManager::new();
        scopes.begin_function().unwrap();
        let referenced = scopes.reference_label("out").unwrap();
        assert!(scopes.end_function().is_err());

        scopes.begin_function().unwrap();
        let referenced2 = scopes.reference_label("out").unwrap();
        assert_ne!(referenced, referenced2);
        let defined = scopes.define_label("out", PointId::new(0)).unwrap();
        assert_eq!(referenced2, defined);
        assert!(scopes.end_function().is_ok());
    }

    #[test]
    fn duplicate_label_rejected() {
        let mut scopes = ScopeManager::new();
        scopes.begin_function().unwrap();
        scopes.define_label("l", PointId::new(0)).unwrap();
        assert!(scopes.define_label("l", PointId::new(1)).is_err());
    }
}
