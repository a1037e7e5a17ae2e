use crate::primitives::Primitive;
use crate::types::TypeId;
use std::rc::Rc;

/// Handle of an expression node in the compiler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl ExprId {
    pub(crate) fn from_index(i: u32) -> Self {
        ExprId(i)
    }

    pub(crate) fn index(self) -> u32 {
        self.0
    }
}

/// Handle of a statement node in the compiler's arena.
///
/// Statement `next` links may form cycles (loops); handles make those
/// free of ownership concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StmtId(u32);

impl StmtId {
    pub(crate) fn from_index(i: u32) -> Self {
        StmtId(i)
    }

    pub(crate) fn index(self) -> u32 {
        self.0
    }
}

/// A typed expression node. `result_type` is `None` for expressions that
/// produce no value (assignments, void calls).
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub result_type: Option<TypeId>,
}

/// The expression opcode set. `symbol` fields carry the source name the
/// node was generated from, for diagnostics only.
#[derive(Debug, Clone)]
pub enum ExprKind {
    /// The current-context register.
    CurrentContext,
    /// `base.slot[location]`.
    Offset {
        base: ExprId,
        location: u32,
        symbol: Option<Rc<str>>,
    },
    /// `globalContext.slot[location]`. The base expression is unused at
    /// run time but kept so assignment and by-reference lowering can
    /// demote the node back to an ordinary offset.
    GlobalOffset {
        base: ExprId,
        location: u32,
        symbol: Option<Rc<str>>,
    },
    /// A fresh 2-slot binary reference cell `{base, location}`.
    MakeReference {
        base: ExprId,
        location: u32,
        symbol: Option<Rc<str>>,
    },
    /// Store through a reference shape; yields no value.
    Assign {
        left: ExprId,
        right: ExprId,
        symbol: Option<Rc<str>>,
    },
    /// Virtual dispatch: `{·, base, base.slot[0].slot[location]}`.
    MethodContext {
        base: ExprId,
        location: u32,
        symbol: Option<Rc<str>>,
    },
    /// `{·, context, code}`. Thunks are closures forced by `EvalThunk`.
    Closure {
        context: ExprId,
        code: StmtId,
        name: Option<Rc<str>>,
    },
    /// Ordinary call; see the calling convention in the evaluator.
    Call {
        target: ExprId,
        args: Vec<ExprId>,
        symbol: Option<Rc<str>>,
    },
    /// Force a by-name argument.
    EvalThunk { base: ExprId, symbol: Option<Rc<str>> },
    /// Dereference a by-reference argument.
    EvalReference { base: ExprId, symbol: Option<Rc<str>> },
    /// Dispatch to a runtime primitive.
    SpecialCall { primitive: Primitive, args: Vec<ExprId> },
    /// Allocate and fill a class instance.
    BuildInstance {
        table: ExprId,
        size: u32,
        args: Vec<ExprId>,
    },
    /// Evaluate `left` for effect, yield `right`.
    Comma { left: ExprId, right: ExprId },
    /// Class test plus field binding through reference cells.
    PatternMatch {
        base: ExprId,
        class: ExprId,
        bindings: Vec<ExprId>,
    },
    Integer(i64),
    StringLit(Rc<str>),
    Real(f32),
}

/// A statement node. Statements form a linked list through `next`; the
/// conditional statement is the sole branching primitive.
#[derive(Debug, Clone)]
pub struct Stmt {
    pub file: Rc<str>,
    pub line: u32,
    pub next: Option<StmtId>,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Allocate the locals cell into slot 3 of the activation.
    MakeLocals { size: u32 },
    /// Evaluate for effect; the expression must yield no value.
    Expression(ExprId),
    /// Exit the statement loop with an optional value.
    Return(Option<ExprId>),
    /// A return whose call re-uses the running frame; recognized by the
    /// builder, executed by splicing in the statement loop.
    TailCall(ExprId),
    /// Branch: `next` when the condition is the true object, `false_part`
    /// otherwise (anything that is not the true object counts as false).
    Conditional {
        condition: ExprId,
        false_part: Option<StmtId>,
    },
    Null,
}
