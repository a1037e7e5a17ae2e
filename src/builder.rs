use crate::primitives::Primitive;
use crate::symbols::{
    ArgumentDecl, Form, Scope, ScopeId, ScopeKind, Symbol, SymbolId, SymbolKind,
};
use crate::tree::{Expr, ExprId, ExprKind, Stmt, StmtId, StmtKind};
use crate::types::{Type, TypeId};
use std::rc::Rc;
use std::{error, fmt};

/// A compile-time diagnostic, carrying the source position the parser
/// last reported through [`Compiler::set_location`].
#[derive(Debug, Clone)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub file: Rc<str>,
    pub line: u32,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "File {} Line {}: {}", self.file, self.line, self.kind)
    }
}

impl error::Error for CompileError {}

#[derive(Debug, Clone)]
pub enum CompileErrorKind {
    UnknownIdentifier(Box<str>),
    NotAType(Box<str>),
    NotAValue(Box<str>),
    DuplicateName(Box<str>),
    ConstantInClass,
    ClassMultiplyDefined(Box<str>),
    NonClassRedefined(Box<str>),
    FunctionMultiplyDefined(Box<str>),
    NonFunctionRedefined(Box<str>),
    NotParameterizable,
    WrongQualifierCount { expected: usize, found: usize },
    InvalidParameterization,
    StorageFormInTypeContext,
    ParentNotClass,
    AssignToConstant,
    NotConformable(&'static str),
    NotAssignable,
    ReturnOutsideFunction,
    ReturnTypeMismatch,
    ReturnValueFromVoid,
    NonFunctionCalled,
    ArgumentMismatch,
    ConstructorValueUnused,
    ValueExpected,
    ValueDiscarded,
    UnknownPrimitive(Box<str>),
    OperatorNotFound(Box<str>),
    PatternTargetNotLocal(Box<str>),
    EmptyArrayLiteral,
    MixedArrayLiteral,
    RelationExpected,
    BooleanExpected,
    Internal(&'static str),
}

impl fmt::Display for CompileErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownIdentifier(n) => write!(f, "unknown identifier {n}"),
            Self::NotAType(n) => write!(f, "non-type identifier {n} used where type expected"),
            Self::NotAValue(n) => write!(f, "identifier {n} cannot be used as a value"),
            Self::DuplicateName(n) => write!(f, "name must be unique within context: {n}"),
            Self::ConstantInClass => f.write_str("constants are not permitted in classes"),
            Self::ClassMultiplyDefined(n) => write!(f, "class {n} multiply defined"),
            Self::NonClassRedefined(n) => write!(f, "non class name {n} used to define class"),
            Self::FunctionMultiplyDefined(n) => write!(f, "function {n} multiply defined"),
            Self::NonFunctionRedefined(n) => {
                write!(f, "non function name {n} redefined as function")
            }
            Self::NotParameterizable => f.write_str("cannot parameterize nonqualified type"),
            Self::WrongQualifierCount { expected, found } => {
                write!(f, "wrong number of qualifiers: expected {expected}, found {found}")
            }
            Self::InvalidParameterization => f.write_str("invalid type parameterization"),
            Self::StorageFormInTypeContext => {
                f.write_str("cannot use storage form in this context")
            }
            Self::ParentNotClass => f.write_str("parent field not class type"),
            Self::AssignToConstant => f.write_str("cannot assign to a constant value"),
            Self::NotConformable(what) => write!(f, "{what} types are not conformable"),
            Self::NotAssignable => f.write_str("only references can be assigned"),
            Self::ReturnOutsideFunction => f.write_str("return statement not inside of function"),
            Self::ReturnTypeMismatch => {
                f.write_str("return type does not match function definition")
            }
            Self::ReturnValueFromVoid => {
                f.write_str("return expression from within function with no return type")
            }
            Self::NonFunctionCalled => f.write_str("attempt to evaluate non-function type"),
            Self::ArgumentMismatch => {
                f.write_str("arguments do not match function declaration")
            }
            Self::ConstructorValueUnused => {
                f.write_str("value generated by constructor must be used")
            }
            Self::ValueExpected => {
                f.write_str("using non-value returning expression where value expected")
            }
            Self::ValueDiscarded => {
                f.write_str("using value returning function where no value is expected")
            }
            Self::UnknownPrimitive(n) => write!(f, "unknown cfunction invoked: {n}"),
            Self::OperatorNotFound(n) => write!(f, "cannot find match for operator {n}"),
            Self::PatternTargetNotLocal(n) => write!(f, "variable {n} in pattern must be local"),
            Self::EmptyArrayLiteral => {
                f.write_str("must be at least one expression in array literal")
            }
            Self::MixedArrayLiteral => {
                f.write_str("all expressions in array literal must be same type")
            }
            Self::RelationExpected => f.write_str("for statement must have relation type"),
            Self::BooleanExpected => {
                f.write_str("stop condition in for statement must be boolean")
            }
            Self::Internal(what) => write!(f, "compiler error: {what}"),
        }
    }
}

/// The built-in types every program starts from.
#[derive(Debug, Clone, Copy)]
pub struct Known {
    pub object: TypeId,
    /// The metaclass `Class`.
    pub metaclass: TypeId,
    pub boolean: TypeId,
    pub integer: TypeId,
    pub real: TypeId,
    pub string: TypeId,
    /// The class of the interned true object.
    pub truth: TypeId,
    pub falsity: TypeId,
    /// The thunked boolean stream type.
    pub relation: TypeId,
    /// `Leda_undefined`; `NIL`'s type, conformable to everything.
    pub undefined: TypeId,
}

/// The typed tree builder and the arenas every compile-time record lives
/// in. The parser drives this with already-interned handles; one
/// instance per translation.
#[derive(Debug)]
pub struct Compiler {
    types: Vec<Type>,
    symbols: Vec<Symbol>,
    scopes: Vec<Scope>,
    exprs: Vec<Expr>,
    stmts: Vec<Stmt>,
    pub known: Known,
    globals: ScopeId,
    file: Rc<str>,
    line: u32,
    temp_count: u32,
    current_context_expr: Option<ExprId>,
}

impl Compiler {
    /// A compiler whose global scope holds the initial classes, the
    /// `NIL`/`true`/`false` constants and the `relation` type.
    #[must_use]
    pub fn new() -> Self {
        let placeholder = TypeId::from_index(u32::MAX);
        let mut c = Compiler {
            types: Vec::new(),
            symbols: Vec::new(),
            scopes: Vec::new(),
            exprs: Vec::new(),
            stmts: Vec::new(),
            known: Known {
                object: placeholder,
                metaclass: placeholder,
                boolean: placeholder,
                integer: placeholder,
                real: placeholder,
                string: placeholder,
                truth: placeholder,
                falsity: placeholder,
                relation: placeholder,
                undefined: placeholder,
            },
            globals: ScopeId::from_index(0),
            file: "<builtin>".into(),
            line: 0,
            temp_count: 0,
            current_context_expr: None,
        };
        c.initial_creation();
        c
    }

    fn initial_class_type(&mut self, parent: Option<TypeId>) -> TypeId {
        self.new_type(Type::Class {
            symbols: None,
            parent,
            static_table: None,
        })
    }

    fn initial_var(&mut self, name: &str, ty: TypeId) {
        let location = self.scope(self.globals).size;
        self.scope_mut(self.globals).size += 1;
        let s = self.new_symbol(Symbol {
            name: Some(name.into()),
            kind: SymbolKind::Var { location, ty },
        });
        self.add_new_symbol(self.globals, s);
    }

    fn initial_class(&mut self, name: &str, ty: TypeId) {
        let location = self.scope(self.globals).size;
        self.scope_mut(self.globals).size += 1;
        let s = self.new_symbol(Symbol {
            name: Some(name.into()),
            kind: SymbolKind::ClassDef { location, ty },
        });
        self.add_new_symbol(self.globals, s);
    }

    fn initial_creation(&mut self) {
        self.globals = self.new_scope(ScopeKind::Global, None);

        let object = self.initial_class_type(None);
        let metaclass = self.initial_class_type(Some(object));
        let boolean = self.initial_class_type(Some(object));
        let integer = self.initial_class_type(None);
        let real = self.initial_class_type(None);
        let string = self.initial_class_type(Some(object));
        let truth = self.initial_class_type(Some(boolean));
        let falsity = self.initial_class_type(Some(boolean));
        let undefined = self.initial_class_type(Some(object));

        // Constants first so they take the low global slots.
        self.initial_var("NIL", undefined);
        self.initial_var("true", truth);
        self.initial_var("false", falsity);

        self.initial_class("object", object);
        self.initial_class("Class", metaclass);
        self.initial_class("boolean", boolean);
        self.initial_class("integer", integer);
        self.initial_class("real", real);
        self.initial_class("string", string);
        self.initial_class("True", truth);
        self.initial_class("False", falsity);
        self.initial_class("Leda_undefined", undefined);

        // The relation type refers to itself through its one argument.
        let relation = self.new_type(Type::Function {
            arguments: Vec::new(),
            returns: Some(boolean),
        });
        let future = self.new_symbol(Symbol {
            name: Some("future".into()),
            kind: SymbolKind::Argument {
                location: 4,
                ty: relation,
                form: Form::ByValue,
            },
        });
        if let Type::Function { ref mut arguments, .. } = *self.ty_mut(relation) {
            arguments.push(future);
        }
        let s = self.new_symbol(Symbol {
            name: Some("relation".into()),
            kind: SymbolKind::TypeDef { ty: relation },
        });
        self.add_new_symbol(self.globals, s);

        self.known = Known {
            object,
            metaclass,
            boolean,
            integer,
            real,
            string,
            truth,
            falsity,
            relation,
            undefined,
        };
    }

    /// The global scope.
    #[must_use]
    pub fn globals(&self) -> ScopeId {
        self.globals
    }

    /// Updates the source position stamped on every statement created
    /// from here on.
    pub fn set_location(&mut self, file: &str, line: u32) {
        if self.file.as_ref() != file {
            self.file = file.into();
        }
        self.line = line;
    }

    pub(crate) fn line(&self) -> u32 {
        self.line
    }

    pub(crate) fn fail(&self, kind: CompileErrorKind) -> CompileError {
        CompileError {
            kind,
            file: self.file.clone(),
            line: self.line,
        }
    }

    // ------------------------------------------------------------------
    // Arena accessors
    // ------------------------------------------------------------------

    pub(crate) fn new_type(&mut self, t: Type) -> TypeId {
        self.types.push(t);
        TypeId::from_index((self.types.len() - 1) as u32)
    }

    #[must_use]
    pub fn ty(&self, id: TypeId) -> &Type {
        &self.types[id.index() as usize]
    }

    pub(crate) fn ty_mut(&mut self, id: TypeId) -> &mut Type {
        &mut self.types[id.index() as usize]
    }

    pub(crate) fn new_symbol(&mut self, s: Symbol) -> SymbolId {
        self.symbols.push(s);
        SymbolId::from_index((self.symbols.len() - 1) as u32)
    }

    #[must_use]
    pub fn sym(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index() as usize]
    }

    pub(crate) fn sym_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index() as usize]
    }

    pub(crate) fn sym_name(&self, id: SymbolId) -> Box<str> {
        match self.sym(id).name {
            Some(ref n) => n.as_ref().into(),
            None => "<anonymous>".into(),
        }
    }

    pub(crate) fn push_scope(&mut self, s: Scope) -> ScopeId {
        self.scopes.push(s);
        ScopeId::from_index((self.scopes.len() - 1) as u32)
    }

    #[must_use]
    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.index() as usize]
    }

    pub(crate) fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.index() as usize]
    }

    pub(crate) fn new_expr(&mut self, kind: ExprKind, result_type: Option<TypeId>) -> ExprId {
        self.exprs.push(Expr { kind, result_type });
        ExprId::from_index((self.exprs.len() - 1) as u32)
    }

    #[must_use]
    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index() as usize]
    }

    pub(crate) fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        &mut self.exprs[id.index() as usize]
    }

    pub(crate) fn new_statement(&mut self, kind: StmtKind) -> StmtId {
        self.stmts.push(Stmt {
            file: self.file.clone(),
            line: self.line,
            next: None,
            kind,
        });
        StmtId::from_index((self.stmts.len() - 1) as u32)
    }

    #[must_use]
    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index() as usize]
    }

    pub(crate) fn stmt_mut(&mut self, id: StmtId) -> &mut Stmt {
        &mut self.stmts[id.index() as usize]
    }

    /// Links `s` to the statement that follows it.
    pub fn set_next(&mut self, s: StmtId, next: StmtId) {
        self.stmt_mut(s).next = Some(next);
    }

    /// A statement with no effect, usable as a join point.
    pub fn null_statement(&mut self) -> StmtId {
        self.new_statement(StmtKind::Null)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Wraps an effect-only expression as a statement.
    pub fn expression_statement(&mut self, e: ExprId) -> Result<StmtId, CompileError> {
        if self.expr(e).result_type.is_some() {
            return Err(self.fail(CompileErrorKind::ValueDiscarded));
        }
        Ok(self.new_statement(StmtKind::Expression(e)))
    }

    /// Type-checks and lowers `left := right`.
    pub fn assignment_statement(
        &mut self,
        left: ExprId,
        right: ExprId,
    ) -> Result<StmtId, CompileError> {
        let Some(lt) = self.expr(left).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        if matches!(*self.ty(lt), Type::Constant { .. }) {
            return Err(self.fail(CompileErrorKind::AssignToConstant));
        }
        let rt = self.expr(right).result_type;
        if !self.conformable_opt(Some(lt), rt) {
            return Err(self.fail(CompileErrorKind::NotConformable("assignment")));
        }
        let a = self.assignment(left, right)?;
        self.expression_statement(a)
    }

    fn can_make_into_tail_call(&self, e: ExprId, ft: TypeId) -> bool {
        let ExprKind::Call { ref args, .. } = self.expr(e).kind else {
            return false;
        };
        if args.len() != 1 {
            return false;
        }
        let Type::Function { ref arguments, .. } = *self.ty(ft) else {
            return false;
        };
        if arguments.len() != 1 {
            return false;
        }
        // The one argument must be the caller's own parameter, verbatim.
        let ExprKind::Offset { base, location: 4, .. } = self.expr(args[0]).kind else {
            return false;
        };
        matches!(self.expr(base).kind, ExprKind::CurrentContext)
    }

    /// Builds a return, converting between boolean and relation values
    /// where the declared return type asks for it, and recognizing the
    /// self-recursive shape that can splice the running frame.
    pub fn return_statement(
        &mut self,
        scope: ScopeId,
        e: Option<ExprId>,
    ) -> Result<StmtId, CompileError> {
        if !matches!(self.scope(scope).kind, ScopeKind::Function { .. }) {
            return Err(self.fail(CompileErrorKind::ReturnOutsideFunction));
        }
        let Some(ft) = self.scope(scope).defining_type else {
            return Err(self.fail(CompileErrorKind::Internal("function scope without type")));
        };
        let declared = match *self.ty(ft) {
            Type::Function { returns, .. } => returns,
            _ => return Err(self.fail(CompileErrorKind::Internal("defining type not a function"))),
        };

        let e = match (declared, e) {
            (Some(t), Some(mut e)) => {
                let et = self.expr(e).result_type;
                let relation = self.known.relation;
                let boolean = self.known.boolean;
                if self.conformable(relation, t) && self.conformable_opt(Some(boolean), et) {
                    e = self.relation_check(scope, e)?;
                } else if self.conformable(boolean, t) && self.conformable_opt(Some(relation), et)
                {
                    e = self.boolean_check(scope, e)?;
                }
                let et = self.expr(e).result_type;
                if !self.conformable_opt(Some(t), et) {
                    return Err(self.fail(CompileErrorKind::ReturnTypeMismatch));
                }
                Some(e)
            }
            (Some(_), None) => return Err(self.fail(CompileErrorKind::ReturnTypeMismatch)),
            (None, Some(_)) => return Err(self.fail(CompileErrorKind::ReturnValueFromVoid)),
            (None, None) => None,
        };

        let kind = match e {
            Some(e) if self.can_make_into_tail_call(e, ft) => StmtKind::TailCall(e),
            _ => StmtKind::Return(e),
        };
        Ok(self.new_statement(kind))
    }

    /// Wires a conditional: true branch through `next`, false branch (or
    /// `next` directly) as the else arm.
    pub fn conditional_statement(
        &mut self,
        line: u32,
        condition: ExprId,
        true_first: StmtId,
        true_last: StmtId,
        false_part: Option<(StmtId, StmtId)>,
        next: StmtId,
    ) -> StmtId {
        let fp = match false_part {
            Some((ff, fl)) => {
                self.stmt_mut(fl).next = Some(next);
                ff
            }
            None => next,
        };
        let s = self.new_statement(StmtKind::Conditional {
            condition,
            false_part: Some(fp),
        });
        self.stmt_mut(s).line = line;
        self.stmt_mut(s).next = Some(true_first);
        self.stmt_mut(true_last).next = Some(next);
        s
    }

    /// Lowers a while loop: a conditional whose body loops back to it.
    pub fn while_statement(
        &mut self,
        line: u32,
        condition: ExprId,
        body_first: StmtId,
        body_last: StmtId,
        next: StmtId,
    ) -> StmtId {
        let s = self.conditional_statement(line, condition, body_first, body_last, None, next);
        self.stmt_mut(body_last).next = Some(s);
        s
    }

    /// Prepends constant initialization and, for function scopes, the
    /// locals-cell allocation to a parsed body. Globals live directly in
    /// the global context, so the top level gets no locals statement.
    pub fn scope_body(&mut self, scope: ScopeId, code: StmtId) -> Result<StmtId, CompileError> {
        let is_function = matches!(self.scope(scope).kind, ScopeKind::Function { .. });
        let mut base = self.current_context_expression();
        if is_function {
            base = self.offset_expr(base, 3, None, None);
        }

        let mut first = code;
        let syms = self.scope(scope).symbols.clone();
        for &s in syms.iter().rev() {
            if let SymbolKind::Constant {
                location,
                value,
                line,
                ..
            } = self.sym(s).kind
            {
                let vt = self.expr(value).result_type;
                let target = self.offset_expr(base, location, None, vt);
                let st = self.assignment_statement(target, value)?;
                self.stmt_mut(st).line = line;
                self.stmt_mut(st).next = Some(first);
                first = st;
            }
        }

        if !is_function {
            return Ok(first);
        }
        let size = self.scope(scope).size;
        let s = self.new_statement(StmtKind::MakeLocals { size });
        self.stmt_mut(s).next = Some(first);
        Ok(s)
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// The (hash-consed) current-context expression.
    pub fn current_context_expression(&mut self) -> ExprId {
        if let Some(e) = self.current_context_expr {
            return e;
        }
        let e = self.new_expr(ExprKind::CurrentContext, None);
        self.current_context_expr = Some(e);
        e
    }

    pub fn integer_literal(&mut self, value: i64) -> ExprId {
        let t = self.known.integer;
        self.new_expr(ExprKind::Integer(value), Some(t))
    }

    pub fn string_literal(&mut self, value: &str) -> ExprId {
        let t = self.known.string;
        self.new_expr(ExprKind::StringLit(value.into()), Some(t))
    }

    pub fn real_literal(&mut self, value: f32) -> ExprId {
        let t = self.known.real;
        self.new_expr(ExprKind::Real(value), Some(t))
    }

    pub(crate) fn offset_expr(
        &mut self,
        base: ExprId,
        location: u32,
        symbol: Option<Rc<str>>,
        t: Option<TypeId>,
    ) -> ExprId {
        self.new_expr(
            ExprKind::Offset {
                base,
                location,
                symbol,
            },
            t,
        )
    }

    /// The address expression for a symbol reached from `base`.
    fn gen_from_symbol(
        &mut self,
        base: ExprId,
        s: SymbolId,
        in_function_table: bool,
        in_globals: bool,
    ) -> Result<ExprId, CompileError> {
        let name = self.sym(s).name.clone();
        match self.sym(s).kind {
            SymbolKind::Var { location, ty } => {
                if in_function_table {
                    // Locals live in the cell at slot 3 of the activation.
                    let l = self.offset_expr(base, 3, None, None);
                    Ok(self.offset_expr(l, location, name, Some(ty)))
                } else if in_globals {
                    Ok(self.new_expr(
                        ExprKind::GlobalOffset {
                            base,
                            location,
                            symbol: name,
                        },
                        Some(ty),
                    ))
                } else {
                    Ok(self.offset_expr(base, location, name, Some(ty)))
                }
            }
            SymbolKind::Constant { location, ty, .. } => {
                if in_function_table {
                    let l = self.offset_expr(base, 3, None, None);
                    Ok(self.offset_expr(l, location, name, Some(ty)))
                } else {
                    Ok(self.offset_expr(base, location, name, Some(ty)))
                }
            }
            SymbolKind::Function { code, ty, .. } => Ok(self.new_expr(
                ExprKind::Closure {
                    context: base,
                    code,
                    name,
                },
                Some(ty),
            )),
            SymbolKind::Argument { location, ty, form } => {
                let e = self.offset_expr(base, location, name.clone(), Some(ty));
                Ok(match form {
                    Form::ByValue => e,
                    Form::ByName => self.new_expr(
                        ExprKind::EvalThunk {
                            base: e,
                            symbol: name,
                        },
                        Some(ty),
                    ),
                    Form::ByReference => self.new_expr(
                        ExprKind::EvalReference {
                            base: e,
                            symbol: name,
                        },
                        Some(ty),
                    ),
                })
            }
            SymbolKind::ClassDef { location, ty } => {
                let e = self.offset_expr(base, location, None, None);
                let rt = match *self.ty(ty) {
                    Type::Qualified { ref qualifiers, base: qbase } => {
                        if !matches!(*self.ty(qbase), Type::Class { .. }) {
                            return Err(self.fail(CompileErrorKind::Internal(
                                "qualified class does not qualify a class",
                            )));
                        }
                        let qualifiers = qualifiers.clone();
                        let cd = self.new_type(Type::ClassDef { base: ty });
                        self.new_type(Type::Qualified {
                            qualifiers,
                            base: cd,
                        })
                    }
                    _ => self.new_type(Type::ClassDef { base: ty }),
                };
                self.expr_mut(e).result_type = Some(rt);
                Ok(e)
            }
            SymbolKind::TypeDef { .. } => {
                Err(self.fail(CompileErrorKind::NotAValue(self.sym_name(s))))
            }
        }
    }

    /// A fresh function-scope local for intermediate values.
    fn generate_temporary(
        &mut self,
        scope: ScopeId,
        t: TypeId,
    ) -> Result<ExprId, CompileError> {
        let name = format!("Leda_temporary_{}", self.temp_count);
        self.temp_count += 1;
        let s = self.add_variable(scope, &name, t)?;
        let cc = self.current_context_expression();
        self.gen_from_symbol(cc, s, true, false)
    }

    /// Resolves a name that must denote a function value.
    pub fn lookup_function(&mut self, scope: ScopeId, name: &str) -> Result<ExprId, CompileError> {
        let e = self.lookup_identifier(scope, name)?;
        match self.expr(e).result_type {
            Some(t) if matches!(*self.ty(t), Type::Function { .. }) => Ok(e),
            _ => Err(self.fail(CompileErrorKind::NonFunctionCalled)),
        }
    }

    /// Converts a method reached through a class-def value into a free
    /// function: a closure whose trailing argument is the receiver.
    fn make_method_into_function(
        &mut self,
        ct: TypeId,
        field: &str,
    ) -> Result<Option<ExprId>, CompileError> {
        let Some(bt) = self.check_class(ct) else {
            return Ok(None);
        };
        let Type::Class {
            symbols: Some(cscope),
            ..
        } = *self.ty(bt)
        else {
            return Ok(None);
        };
        let methods = match self.scope(cscope).kind {
            ScopeKind::Class { ref methods, .. } => methods.clone(),
            _ => return Ok(None),
        };
        for &s in methods.iter().rev() {
            if self.sym(s).name.as_deref() != Some(field) {
                continue;
            }
            let SymbolKind::Function { code, ty, .. } = self.sym(s).kind else {
                return Ok(None);
            };
            let Type::Function {
                ref arguments,
                returns,
            } = *self.ty(ty)
            else {
                return Ok(None);
            };
            let arg_syms = arguments.clone();
            let n = arg_syms.len() as u32;
            let cc = self.current_context_expression();

            // The receiver will sit after the forwarded arguments.
            let recv = self.offset_expr(cc, 4 + n, None, None);
            let inner = self.new_expr(
                ExprKind::Closure {
                    context: recv,
                    code,
                    name: Some(field.into()),
                },
                None,
            );
            let call_args: Vec<ExprId> = (4..4 + n)
                .map(|loc| self.offset_expr(cc, loc, None, None))
                .collect();
            let call = self.new_expr(
                ExprKind::Call {
                    target: inner,
                    args: call_args,
                    symbol: Some(field.into()),
                },
                None,
            );
            let st = self.new_statement(StmtKind::Return(Some(call)));

            let recv_arg = self.anonymous_argument(bt, Form::ByValue);
            let mut nargs = arg_syms;
            nargs.push(recv_arg);
            let nt = self.new_function_type(nargs, returns);
            let outer = self.new_expr(
                ExprKind::Closure {
                    context: cc,
                    code: st,
                    name: Some(field.into()),
                },
                Some(nt),
            );
            return Ok(Some(outer));
        }
        Ok(None)
    }

    /// Field or method access on a value of type `t`.
    pub fn lookup_field(
        &mut self,
        base: ExprId,
        t: TypeId,
        name: &str,
    ) -> Result<Option<ExprId>, CompileError> {
        match *self.ty(t) {
            Type::Constant { base: bt } => self.lookup_field(base, bt, name),
            Type::Unresolved { base: bt } => self.lookup_field(base, bt, name),
            Type::Qualified { base: bt, .. } => self.lookup_field(base, bt, name),
            Type::Resolved { base: bt, .. } => {
                let Some(e) = self.lookup_field(base, bt, name)? else {
                    return Ok(None);
                };
                let rt = self.expr(e).result_type;
                let fixed = self.fix_resolved_type(rt, Some(t));
                self.expr_mut(e).result_type = fixed;
                Ok(Some(e))
            }
            Type::Class {
                symbols: Some(cscope),
                ..
            } => {
                let syms = self.scope(cscope).symbols.clone();
                for &s in syms.iter().rev() {
                    if self.sym(s).name.as_deref() == Some(name) {
                        return self.gen_from_symbol(base, s, false, false).map(Some);
                    }
                }
                let methods = match self.scope(cscope).kind {
                    ScopeKind::Class { ref methods, .. } => methods.clone(),
                    _ => Vec::new(),
                };
                for &s in methods.iter().rev() {
                    if self.sym(s).name.as_deref() != Some(name) {
                        continue;
                    }
                    if let SymbolKind::Function { location, ty, .. } = self.sym(s).kind {
                        let e = self.new_expr(
                            ExprKind::MethodContext {
                                base,
                                location,
                                symbol: Some(name.into()),
                            },
                            Some(ty),
                        );
                        return Ok(Some(e));
                    }
                    return self.gen_from_symbol(base, s, false, false).map(Some);
                }
                Ok(None)
            }
            Type::ClassDef { base: bt } => self.make_method_into_function(bt, name),
            _ => Ok(None),
        }
    }

    fn lookup_address(
        &mut self,
        scope: ScopeId,
        name: &str,
        base: ExprId,
    ) -> Result<Option<ExprId>, CompileError> {
        match self.scope(scope).kind {
            ScopeKind::Global => {
                let syms = self.scope(scope).symbols.clone();
                for &s in syms.iter().rev() {
                    if self.sym(s).name.as_deref() == Some(name) {
                        return self.gen_from_symbol(base, s, false, true).map(Some);
                    }
                }
                Ok(None)
            }
            ScopeKind::Function { .. } => {
                let syms = self.scope(scope).symbols.clone();
                for &s in syms.iter().rev() {
                    if self.sym(s).name.as_deref() == Some(name) {
                        return self.gen_from_symbol(base, s, true, false).map(Some);
                    }
                }
                let Some(up) = self.scope(scope).enclosing else {
                    return Ok(None);
                };
                let outer = self.offset_expr(base, 1, None, None);
                self.lookup_address(up, name, outer)
            }
            ScopeKind::Class { .. } => {
                if let Some(t) = self.scope(scope).defining_type {
                    if let Some(e) = self.lookup_field(base, t, name)? {
                        return Ok(Some(e));
                    }
                }
                let Some(up) = self.scope(scope).enclosing else {
                    return Ok(None);
                };
                let outer = self.offset_expr(base, 1, None, None);
                self.lookup_address(up, name, outer)
            }
        }
    }

    /// Resolves an identifier to its address expression, walking the
    /// lexical chain through slot 1 of each context.
    pub fn lookup_identifier(
        &mut self,
        scope: ScopeId,
        name: &str,
    ) -> Result<ExprId, CompileError> {
        let cc = self.current_context_expression();
        match self.lookup_address(scope, name, cc)? {
            Some(e) => Ok(e),
            None => Err(self.fail(CompileErrorKind::UnknownIdentifier(name.into()))),
        }
    }

    /// Whether the actual arguments could be passed to a value of type
    /// `t`. By-reference arguments must conform both ways.
    pub fn arguments_can_match(&mut self, t: TypeId, args: &[ExprId]) -> bool {
        let Some(ft) = self.check_function(t) else {
            return false;
        };
        let arity = match *self.ty(ft) {
            Type::Function { ref arguments, .. } => arguments.len(),
            _ => return false,
        };
        if arity != args.len() {
            return false;
        }
        for (i, &qe) in args.iter().enumerate() {
            let Ok(ps) = self.argument_number(t, i) else {
                return false;
            };
            let Some((pt, form, _)) = self.argument_info(ps) else {
                return false;
            };
            let qt = self.expr(qe).result_type;
            let ok = match form {
                Form::ByValue | Form::ByName => self.conformable_opt(Some(pt), qt),
                Form::ByReference => {
                    self.conformable_opt(Some(pt), qt)
                        && match qt {
                            Some(qt) => self.conformable(qt, pt),
                            None => false,
                        }
                }
            };
            if !ok {
                return false;
            }
        }
        true
    }

    /// Wraps an expression in a zero-argument closure returning it.
    pub fn thunk(&mut self, e: ExprId) -> ExprId {
        let st = self.new_statement(StmtKind::Return(Some(e)));
        let cc = self.current_context_expression();
        self.new_expr(
            ExprKind::Closure {
                context: cc,
                code: st,
                name: None,
            },
            None,
        )
    }

    /// Lowers a call. Class-def callees become instance construction;
    /// otherwise arguments are coerced to their declared passing forms
    /// and a call node is emitted.
    pub fn call(
        &mut self,
        scope: ScopeId,
        target: ExprId,
        mut args: Vec<ExprId>,
        wants_value: bool,
    ) -> Result<ExprId, CompileError> {
        let Some(mut t) = self.expr(target).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        if let Type::Constant { base } = *self.ty(t) {
            t = base;
        }

        // Constructors: a (possibly parameterized) class-def callee.
        if let Type::Resolved { base, .. } = *self.ty(t) {
            if let Type::ClassDef { base: qual } = *self.ty(base) {
                let Type::Qualified { base: class_t, .. } = *self.ty(qual) else {
                    return Err(self.fail(CompileErrorKind::Internal(
                        "parameterized constructor without qualified class",
                    )));
                };
                let size = self.instance_size(class_t)?;
                if !wants_value {
                    return Err(self.fail(CompileErrorKind::ConstructorValueUnused));
                }
                let rt = self.fix_resolved_type(Some(qual), Some(t));
                return Ok(self.new_expr(
                    ExprKind::BuildInstance {
                        table: target,
                        size,
                        args,
                    },
                    rt,
                ));
            }
        }
        if let Type::ClassDef { base } = *self.ty(t) {
            let size = self.instance_size(base)?;
            if !wants_value {
                return Err(self.fail(CompileErrorKind::ConstructorValueUnused));
            }
            return Ok(self.new_expr(
                ExprKind::BuildInstance {
                    table: target,
                    size,
                    args,
                },
                Some(base),
            ));
        }

        let Some(ft) = self.check_function(t) else {
            return Err(self.fail(CompileErrorKind::NonFunctionCalled));
        };
        if !self.arguments_can_match(t, &args) {
            return Err(self.fail(CompileErrorKind::ArgumentMismatch));
        }

        for i in 0..args.len() {
            let ps = self.argument_number(t, i)?;
            let Some((_, form, _)) = self.argument_info(ps) else {
                return Err(self.fail(CompileErrorKind::Internal("argument symbol expected")));
            };
            match form {
                Form::ByValue => {}
                Form::ByName => args[i] = self.thunk(args[i]),
                Form::ByReference => args[i] = self.reference_argument(scope, args[i])?,
            }
        }

        let symbol = match self.expr(target).kind {
            ExprKind::Offset { ref symbol, .. } => symbol.clone(),
            ExprKind::Closure { ref name, .. } => name.clone(),
            _ => None,
        };
        let returns = match *self.ty(ft) {
            Type::Function { returns, .. } => returns,
            _ => None,
        };
        let rt = if matches!(*self.ty(t), Type::Resolved { .. }) {
            self.fix_resolved_type(returns, Some(t))
        } else {
            returns
        };
        if wants_value && rt.is_none() {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        }
        if !wants_value && rt.is_some() {
            return Err(self.fail(CompileErrorKind::ValueDiscarded));
        }
        Ok(self.new_expr(
            ExprKind::Call {
                target,
                args,
                symbol,
            },
            rt,
        ))
    }

    fn instance_size(&self, class_t: TypeId) -> Result<u32, CompileError> {
        let Type::Class {
            symbols: Some(cs), ..
        } = *self.ty(class_t)
        else {
            return Err(self.fail(CompileErrorKind::Internal("constructing undefined class")));
        };
        Ok(self.scope(cs).size)
    }

    /// Coerces an actual into an lvalue handle for a by-reference
    /// parameter.
    fn reference_argument(
        &mut self,
        scope: ScopeId,
        qe: ExprId,
    ) -> Result<ExprId, CompileError> {
        match self.expr(qe).kind.clone() {
            ExprKind::EvalReference { base, .. } => Ok(base),
            ExprKind::Offset {
                base,
                location,
                symbol,
            }
            | ExprKind::GlobalOffset {
                location,
                symbol,
                base,
            } => Ok(self.new_expr(
                ExprKind::MakeReference {
                    base,
                    location,
                    symbol,
                },
                None,
            )),
            _ => {
                // Not an lvalue: evaluate into a temporary and reference
                // that.
                let Some(t) = self.expr(qe).result_type else {
                    return Err(self.fail(CompileErrorKind::ValueExpected));
                };
                let temp = self.generate_temporary(scope, t)?;
                let ExprKind::Offset { base, location, .. } = self.expr(temp).kind.clone() else {
                    return Err(self.fail(CompileErrorKind::Internal("temporary is not a slot")));
                };
                let assign = self.assignment(temp, qe)?;
                let r = self.new_expr(
                    ExprKind::MakeReference {
                        base,
                        location,
                        symbol: None,
                    },
                    None,
                );
                Ok(self.new_expr(
                    ExprKind::Comma {
                        left: assign,
                        right: r,
                    },
                    None,
                ))
            }
        }
    }

    /// Lowers a declared primitive invocation to its table index.
    pub fn primitive_call(
        &mut self,
        name: &str,
        args: Vec<ExprId>,
        rt: Option<TypeId>,
    ) -> Result<ExprId, CompileError> {
        let Some(primitive) = Primitive::from_name(name) else {
            return Err(self.fail(CompileErrorKind::UnknownPrimitive(name.into())));
        };
        Ok(self.new_expr(ExprKind::SpecialCall { primitive, args }, rt))
    }

    fn check_operator_symbol(
        &mut self,
        scope: ScopeId,
        s: SymbolId,
        name: &str,
        base: ExprId,
        args: &[ExprId],
    ) -> Result<Option<ExprId>, CompileError> {
        if self.sym(s).name.as_deref() != Some(name) {
            return Ok(None);
        }
        let e = self.gen_from_symbol(base, s, false, false)?;
        let Some(t) = self.expr(e).result_type else {
            return Ok(None);
        };
        if self.arguments_can_match(t, args) {
            return self.call(scope, e, args.to_vec(), true).map(Some);
        }
        Ok(None)
    }

    fn lookup_operator(
        &mut self,
        scope: ScopeId,
        base: ExprId,
        name: &str,
        args: &[ExprId],
    ) -> Result<Option<ExprId>, CompileError> {
        match self.scope(scope).kind {
            ScopeKind::Global => {
                let syms = self.scope(scope).symbols.clone();
                for &s in syms.iter().rev() {
                    if let Some(e) = self.check_operator_symbol(scope, s, name, base, args)? {
                        return Ok(Some(e));
                    }
                }
                Ok(None)
            }
            ScopeKind::Function { .. } => {
                let syms = self.scope(scope).symbols.clone();
                for &s in syms.iter().rev() {
                    if let Some(e) = self.check_operator_symbol(scope, s, name, base, args)? {
                        return Ok(Some(e));
                    }
                }
                let Some(up) = self.scope(scope).enclosing else {
                    return Ok(None);
                };
                let outer = self.offset_expr(base, 1, None, None);
                self.lookup_operator(up, outer, name, args)
            }
            ScopeKind::Class { .. } => {
                let Some(up) = self.scope(scope).enclosing else {
                    return Ok(None);
                };
                let outer = self.offset_expr(base, 1, None, None);
                self.lookup_operator(up, outer, name, args)
            }
        }
    }

    /// Resolves `left name right`: a method of the left operand's type
    /// first, then any callable of that name in an enclosing scope.
    pub fn binary_operator(
        &mut self,
        scope: ScopeId,
        name: &str,
        left: ExprId,
        right: ExprId,
    ) -> Result<ExprId, CompileError> {
        let Some(t) = self.expr(left).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        if matches!(
            *self.ty(t),
            Type::Class { .. } | Type::Resolved { .. } | Type::Constant { .. } | Type::Unresolved { .. }
        ) {
            if let Some(e) = self.lookup_field(left, t, name)? {
                if let Some(et) = self.expr(e).result_type {
                    if self.arguments_can_match(et, &[right]) {
                        return self.call(scope, e, vec![right], true);
                    }
                }
            }
        }
        let cc = self.current_context_expression();
        match self.lookup_operator(scope, cc, name, &[left, right])? {
            Some(e) => Ok(e),
            None => Err(self.fail(CompileErrorKind::OperatorNotFound(name.into()))),
        }
    }

    /// Resolves a unary operator: a zero-argument method first, then a
    /// one-argument callable in an enclosing scope.
    pub fn unary_operator(
        &mut self,
        scope: ScopeId,
        name: &str,
        arg: ExprId,
    ) -> Result<ExprId, CompileError> {
        let Some(t) = self.expr(arg).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        if matches!(
            *self.ty(t),
            Type::Class { .. } | Type::Resolved { .. } | Type::Unresolved { .. }
        ) {
            if let Some(e) = self.lookup_field(arg, t, name)? {
                if let Some(et) = self.expr(e).result_type {
                    if self.arguments_can_match(et, &[]) {
                        return self.call(scope, e, Vec::new(), true);
                    }
                }
            }
        }
        let cc = self.current_context_expression();
        match self.lookup_operator(scope, cc, name, &[arg])? {
            Some(e) => Ok(e),
            None => Err(self.fail(CompileErrorKind::OperatorNotFound(name.into()))),
        }
    }

    /// Lowers `left := right` to a store through a reference shape.
    pub fn assignment(&mut self, left: ExprId, right: ExprId) -> Result<ExprId, CompileError> {
        match self.expr(left).kind.clone() {
            ExprKind::Offset {
                base,
                location,
                symbol,
            }
            | ExprKind::GlobalOffset {
                base,
                location,
                symbol,
            } => {
                let l = self.new_expr(
                    ExprKind::MakeReference {
                        base,
                        location,
                        symbol: symbol.clone(),
                    },
                    None,
                );
                Ok(self.new_expr(
                    ExprKind::Assign {
                        left: l,
                        right,
                        symbol,
                    },
                    None,
                ))
            }
            ExprKind::EvalReference { base, symbol } => Ok(self.new_expr(
                ExprKind::Assign {
                    left: base,
                    right,
                    symbol,
                },
                None,
            )),
            _ => Err(self.fail(CompileErrorKind::NotAssignable)),
        }
    }

    /// Lowers `left <- right` to a call of the global `Leda_arrow`,
    /// yielding a relation.
    pub fn left_arrow(
        &mut self,
        scope: ScopeId,
        left: ExprId,
        right: ExprId,
    ) -> Result<ExprId, CompileError> {
        let lt = self.expr(left).result_type;
        let rt = self.expr(right).result_type;
        let ok = match lt {
            Some(lt) => self.conformable_opt(Some(lt), rt),
            None => false,
        };
        if !ok {
            return Err(self.fail(CompileErrorKind::NotConformable("arrow")));
        }
        let r = match self.expr(left).kind.clone() {
            ExprKind::Offset {
                base,
                location,
                symbol,
            } => self.new_expr(
                ExprKind::MakeReference {
                    base,
                    location,
                    symbol,
                },
                None,
            ),
            ExprKind::EvalReference { base, .. } => base,
            _ => return Err(self.fail(CompileErrorKind::NotAssignable)),
        };
        let fun = self.lookup_function(scope, "Leda_arrow")?;
        let relation = self.known.relation;
        Ok(self.new_expr(
            ExprKind::Call {
                target: fun,
                args: vec![r, right],
                symbol: Some("Leda_arrow".into()),
            },
            Some(relation),
        ))
    }

    /// Lowers a for-relation loop: body plus `return stop` become a
    /// thunk handed to the library driver `Leda_forRelation`.
    pub fn for_relation(
        &mut self,
        scope: ScopeId,
        relation_expr: ExprId,
        stop: Option<ExprId>,
        body_first: StmtId,
        body_last: StmtId,
    ) -> Result<ExprId, CompileError> {
        let relation = self.known.relation;
        let rt = self.expr(relation_expr).result_type;
        if !self.conformable_opt(Some(relation), rt) {
            return Err(self.fail(CompileErrorKind::RelationExpected));
        }
        let stop = match stop {
            Some(e) => e,
            None => self.lookup_identifier(scope, "false")?,
        };
        let boolean = self.known.boolean;
        let st = self.expr(stop).result_type;
        if !self.conformable_opt(Some(boolean), st) {
            return Err(self.fail(CompileErrorKind::BooleanExpected));
        }
        let ret = self.new_statement(StmtKind::Return(Some(stop)));
        self.stmt_mut(body_last).next = Some(ret);
        let cc = self.current_context_expression();
        let body_thunk = self.new_expr(
            ExprKind::Closure {
                context: cc,
                code: body_first,
                name: None,
            },
            None,
        );
        let fun = self.lookup_function(scope, "Leda_forRelation")?;
        Ok(self.new_expr(
            ExprKind::Call {
                target: fun,
                args: vec![body_thunk, relation_expr],
                symbol: Some("Leda_forRelation".into()),
            },
            None,
        ))
    }

    /// Converts a relation-valued expression to boolean where one is
    /// expected.
    pub fn boolean_check(&mut self, scope: ScopeId, e: ExprId) -> Result<ExprId, CompileError> {
        let relation = self.known.relation;
        let et = self.expr(e).result_type;
        if !self.conformable_opt(Some(relation), et) {
            return Ok(e);
        }
        let fun = self.lookup_function(scope, "relationAsBoolean")?;
        let boolean = self.known.boolean;
        Ok(self.new_expr(
            ExprKind::Call {
                target: fun,
                args: vec![e],
                symbol: Some("relationAsBoolean".into()),
            },
            Some(boolean),
        ))
    }

    /// Wraps a boolean-valued expression as a relation where one is
    /// expected.
    pub fn relation_check(&mut self, scope: ScopeId, e: ExprId) -> Result<ExprId, CompileError> {
        let boolean = self.known.boolean;
        let et = self.expr(e).result_type;
        if !self.conformable_opt(Some(boolean), et) {
            return Ok(e);
        }
        let fun = self.lookup_function(scope, "booleanAsRelation")?;
        let thunk = self.thunk(e);
        let relation = self.known.relation;
        Ok(self.new_expr(
            ExprKind::Call {
                target: fun,
                args: vec![thunk],
                symbol: Some("booleanAsRelation".into()),
            },
            Some(relation),
        ))
    }

    /// Lowers `for target := start to limit`: the bound is captured in a
    /// temporary and the comparison and increment go through ordinary
    /// operator lookup, so user-defined index types work.
    #[allow(clippy::too_many_arguments)]
    pub fn arithmetic_for(
        &mut self,
        line: u32,
        scope: ScopeId,
        target: ExprId,
        start: ExprId,
        limit: ExprId,
        body_first: StmtId,
        body_last: StmtId,
        next: StmtId,
    ) -> Result<StmtId, CompileError> {
        let Some(t) = self.expr(target).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        let temp = self.generate_temporary(scope, t)?;
        let s = self.assignment_statement(temp, limit)?;
        let s2 = self.assignment_statement(target, start)?;
        let test = self.binary_operator(scope, "lessEqual", target, temp)?;
        let one = self.integer_literal(1);
        let bump = self.binary_operator(scope, "plus", target, one)?;
        let inc = self.assignment_statement(target, bump)?;
        self.stmt_mut(body_last).next = Some(inc);
        let w = self.while_statement(line, test, body_first, inc, next);
        self.set_next(s, s2);
        self.set_next(s2, w);
        Ok(s)
    }

    /// Lowers `[e1, ..., eN]` to an instance of the global `array`
    /// class over a freshly-allocated payload cell.
    pub fn array_literal(
        &mut self,
        scope: ScopeId,
        exps: Vec<ExprId>,
    ) -> Result<ExprId, CompileError> {
        let Some(&first) = exps.first() else {
            return Err(self.fail(CompileErrorKind::EmptyArrayLiteral));
        };
        let Some(base_type) = self.expr(first).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        for &e in &exps[1..] {
            let et = self.expr(e).result_type;
            if !self.conformable_opt(Some(base_type), et) {
                return Err(self.fail(CompileErrorKind::MixedArrayLiteral));
            }
        }

        let ae = self.lookup_identifier(scope, "array")?;
        let Some(at) = self.expr(ae).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        let elem = self.anonymous_argument(base_type, Form::ByValue);
        let rt = self.check_qualifications(at, &[elem])?;
        let Type::Resolved { base: rb, .. } = *self.ty(rt) else {
            return Err(self.fail(CompileErrorKind::Internal("array type did not resolve")));
        };
        let Type::ClassDef { base: qual } = *self.ty(rb) else {
            return Err(self.fail(CompileErrorKind::Internal("array is not a class definition")));
        };

        // Payload cell: count first, elements in reverse.
        let n = exps.len();
        let count = self.integer_literal(n as i64);
        let mut payload_args = Vec::with_capacity(n + 1);
        payload_args.push(count);
        payload_args.extend(exps.iter().rev().copied());
        let payload = self.new_expr(
            ExprKind::SpecialCall {
                primitive: Primitive::ObjectAllocate,
                args: payload_args,
            },
            None,
        );

        let low = self.integer_literal(1);
        let high = self.integer_literal(n as i64);
        let result_type = self.fix_resolved_type(Some(qual), Some(rt));
        Ok(self.new_expr(
            ExprKind::BuildInstance {
                table: ae,
                size: 4,
                args: vec![low, high, payload],
            },
            result_type,
        ))
    }

    /// Lowers `base match Class(f1, ..., fk)`. The targets must resolve
    /// to local slots; they are bound through reference cells when the
    /// class matches.
    pub fn pattern_match(
        &mut self,
        scope: ScopeId,
        base: ExprId,
        class_expr: ExprId,
        targets: &[&str],
    ) -> Result<ExprId, CompileError> {
        let mut bindings = Vec::with_capacity(targets.len());
        for name in targets {
            let f = self.lookup_identifier(scope, name)?;
            let ExprKind::Offset {
                base: fb,
                location,
                symbol,
            } = self.expr(f).kind.clone()
            else {
                return Err(self.fail(CompileErrorKind::PatternTargetNotLocal((*name).into())));
            };
            bindings.push(self.new_expr(
                ExprKind::MakeReference {
                    base: fb,
                    location,
                    symbol,
                },
                None,
            ));
        }
        let boolean = self.known.boolean;
        Ok(self.new_expr(
            ExprKind::PatternMatch {
                base,
                class: class_expr,
                bindings,
            },
            Some(boolean),
        ))
    }

    /// A closure literal over the current context, typed by its
    /// function scope.
    pub fn function_literal(
        &mut self,
        scope: ScopeId,
        body: StmtId,
    ) -> Result<ExprId, CompileError> {
        let cc = self.current_context_expression();
        let ty = self.scope(scope).defining_type;
        Ok(self.new_expr(
            ExprKind::Closure {
                context: cc,
                code: body,
                name: None,
            },
            ty,
        ))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new()
    }
}
