//! Compilation context.
//!
//! Bundles the per-translation-unit state and drives the full pipeline:
//! semantic analysis of the AST, translation to the stack IR, SSA
//! construction, and amd64 code generation. The embedding driver owns the
//! arena and type bundle; the context borrows them for one compilation.

use crate::ast::{Arena, NodeId};
use crate::ir::translate::translate_unit;
use crate::ir::IrModule;
use crate::isa::x64::{self, AsmSyntax};
use crate::result::Result;
use crate::sema::{Analyzer, AnalyzerConfig};
use crate::target::TypeTraits;
use crate::types::TypeBundle;

/// Per-translation-unit compilation driver.
pub struct Context<'a> {
    arena: &'a mut Arena,
    bundle: &'a mut TypeBundle,
    traits: &'a TypeTraits,
    config: AnalyzerConfig,
}

impl<'a> Context<'a> {
    /// Create a context over the unit's arena and type bundle.
    pub fn new(arena: &'a mut Arena, bundle: &'a mut TypeBundle, traits: &'a TypeTraits) -> Self {
        Self {
            arena,
            bundle,
            traits,
            config: AnalyzerConfig::default(),
        }
    }

    /// Override the analyzer configuration.
    pub fn with_config(mut self, config: AnalyzerConfig) -> Self {
        self.config = config;
        self
    }

    /// Analyze and translate the unit rooted at `root` into the stack IR.
    pub fn translate(&mut self, root: NodeId) -> Result<IrModule> {
        let mut analyzer = Analyzer::new(self.arena, self.bundle, self.traits);
        analyzer.config = self.config.clone();
        analyzer.analyze_node(root)?;
        let artifacts = analyzer.finish();
        translate_unit(self.arena, self.bundle, self.traits, &artifacts, root)
    }

    /// Run the whole pipeline, producing assembly text.
    pub fn compile(&mut self, root: NodeId, syntax: AsmSyntax) -> Result<String> {
        let module = self.translate(root)?;
        x64::generate(&module, self.bundle, self.traits, syntax)
    }
}
