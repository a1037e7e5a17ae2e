//! Compiler middle end and tree-walking interpreter for the Leda
//! multiparadigm language.
//!
//! The parser (not part of this crate) drives [`Compiler`] to translate
//! source text into a typed expression/statement tree; [`Interpreter`]
//! evaluates that tree against a uniform heap of tagged cells managed by
//! a two-space copying collector ([`Heap`]).

/// Class-table construction and runtime bootstrap
pub mod boot;
/// Typed tree builder
pub mod builder;
/// Tree evaluator
pub mod interp;
/// Cell heap, copying collector, root stack and registers
pub mod memory;
/// Runtime primitive opcode table
pub mod primitives;
/// Symbol tables and scopes
pub mod symbols;
/// Expression and statement tree nodes
pub mod tree;
/// Type records and conformance
pub mod types;

pub use self::builder::{CompileError, Compiler};
pub use self::interp::{Fault, Interpreter};
pub use self::memory::{Heap, Value};
pub use self::primitives::Primitive;
pub use self::symbols::{Form, ScopeId, SymbolId};
pub use self::tree::{ExprId, StmtId};
pub use self::types::TypeId;
