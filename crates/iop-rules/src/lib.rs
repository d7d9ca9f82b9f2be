//! Rule catalog and evaluation engine
//!
//! ```text
//! content root ──► RuleCatalog (immutable snapshot) ◄── CatalogHandle
//!                        │
//! StagedArchive ──► EvaluationContext ──► EvaluationEngine ──► EvaluationResult
//!                        │                     │
//!                   ParserRegistry ──► FactBase ──► Condition / Template
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use iop_rules::{EvaluationEngine, RuleCatalog};
//!
//! let catalog = RuleCatalog::load("./rules-content");
//! let ctx = catalog.build_context(&staged).with_deadline(deadline);
//! let result = EvaluationEngine::new().evaluate(&ctx)?;
//! println!("{} rules fired", result.rules_found());
//! ```

pub mod catalog;
pub mod condition;
pub mod content;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod facts;
pub mod parsers;

pub use catalog::{CatalogHandle, EvaluationContext, RuleCatalog, RuleDefinition, RulePlugin};
pub use condition::{Condition, ConditionDef, Op, Outcome, Template};
pub use content::{PluginContent, PluginInfo, RuleContent};
pub use deadline::{Deadline, DeadlineExceeded};
pub use engine::{EvaluationEngine, EvaluationResult, RuleHit};
pub use error::{CatalogError, ConditionError, EvaluationError};
pub use facts::{Fact, FactBase, NamedDocument};
pub use parsers::{ParserRegistry, ParserSpec, SourceFormat};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::catalog::{CatalogHandle, RuleCatalog};
    pub use crate::deadline::Deadline;
    pub use crate::engine::{EvaluationEngine, EvaluationResult, RuleHit};
    pub use crate::error::EvaluationError;
}
