use crate::builder::{CompileError, CompileErrorKind, Compiler};
use crate::tree::{ExprId, StmtId};
use crate::types::{Type, TypeId};
use std::rc::Rc;

/// First activation slot available to arguments (slots 0..=3 are class
/// table, enclosing context, caller context and the locals cell).
pub(crate) const ARGUMENT_BASE: u32 = 4;
/// First method-table slot available to methods (slots 0..=4 are
/// metaclass, global context, name, table size and parent table).
pub(crate) const METHOD_BASE: u32 = 5;

/// Argument passing form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Form {
    ByValue,
    /// The call site wraps the argument in a thunk.
    ByName,
    /// The call site passes an lvalue handle.
    ByReference,
}

/// A parsed argument or type-parameter declaration, as the parser hands
/// them over.
#[derive(Debug, Clone)]
pub struct ArgumentDecl {
    pub name: Rc<str>,
    pub ty: TypeId,
    pub form: Form,
}

/// Handle of a symbol record in the compiler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolId(u32);

impl SymbolId {
    pub(crate) fn from_index(i: u32) -> Self {
        SymbolId(i)
    }

    pub(crate) fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
pub struct Symbol {
    /// Absent for synthesized argument descriptors.
    pub name: Option<Rc<str>>,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone)]
pub enum SymbolKind {
    Var {
        location: u32,
        ty: TypeId,
    },
    Constant {
        location: u32,
        ty: TypeId,
        value: ExprId,
        line: u32,
    },
    Function {
        /// Slot in the enclosing scope, or in the method table for
        /// methods.
        location: u32,
        /// Root of the body statement list. Allocated before the body is
        /// parsed so closures and class tables can hold it.
        code: StmtId,
        ty: TypeId,
        /// Copied from a parent class and not (yet) overridden.
        inherited: bool,
    },
    Argument {
        location: u32,
        ty: TypeId,
        form: Form,
    },
    ClassDef {
        location: u32,
        ty: TypeId,
    },
    TypeDef {
        ty: TypeId,
    },
}

/// Handle of a scope in the compiler's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeId(u32);

impl ScopeId {
    pub(crate) fn from_index(i: u32) -> Self {
        ScopeId(i)
    }

    pub(crate) fn index(self) -> u32 {
        self.0
    }
}

/// A symbol table: global, function or class scope.
#[derive(Debug)]
pub struct Scope {
    pub enclosing: Option<ScopeId>,
    /// Declared symbols in declaration order. Lookups scan newest first.
    pub symbols: Vec<SymbolId>,
    /// Running slot counter; the next variable/constant slot.
    pub size: u32,
    /// The class type for class scopes, the function type for function
    /// scopes.
    pub defining_type: Option<TypeId>,
    pub kind: ScopeKind,
}

#[derive(Debug)]
pub enum ScopeKind {
    Global,
    Function {
        /// Next activation slot for an argument.
        argument_location: u32,
        function_symbol: Option<SymbolId>,
    },
    Class {
        /// The method table, parallel to the instance symbols.
        methods: Vec<SymbolId>,
        /// Next method-table slot.
        method_table_size: u32,
    },
}

impl Compiler {
    pub(crate) fn new_scope(&mut self, kind: ScopeKind, enclosing: Option<ScopeId>) -> ScopeId {
        self.push_scope(Scope {
            enclosing,
            symbols: Vec::new(),
            size: 0,
            defining_type: None,
            kind,
        })
    }

    pub(crate) fn new_function_table(&mut self, enclosing: Option<ScopeId>) -> ScopeId {
        self.new_scope(
            ScopeKind::Function {
                argument_location: ARGUMENT_BASE,
                function_symbol: None,
            },
            enclosing,
        )
    }

    fn new_class_table(&mut self, enclosing: Option<ScopeId>) -> ScopeId {
        self.new_scope(
            ScopeKind::Class {
                methods: Vec::new(),
                method_table_size: METHOD_BASE,
            },
            enclosing,
        )
    }

    fn name_matches(&self, s: SymbolId, name: &str) -> bool {
        self.sym(s).name.as_deref() == Some(name)
    }

    /// Scans one scope, newest declaration first; class scopes also scan
    /// their method table.
    pub fn lookup_local(&self, scope: ScopeId, name: &str) -> Option<SymbolId> {
        let sc = self.scope(scope);
        let hit = sc
            .symbols
            .iter()
            .rev()
            .copied()
            .find(|&s| self.name_matches(s, name));
        if hit.is_some() {
            return hit;
        }
        if let ScopeKind::Class { ref methods, .. } = sc.kind {
            return methods
                .iter()
                .rev()
                .copied()
                .find(|&s| self.name_matches(s, name));
        }
        None
    }

    fn unique_name(&self, scope: ScopeId, name: &str) -> Result<(), CompileError> {
        if self.lookup_local(scope, name).is_some() {
            return Err(self.fail(CompileErrorKind::DuplicateName(name.into())));
        }
        Ok(())
    }

    /// Walks the enclosing chain.
    pub fn lookup_symbol(&self, scope: ScopeId, name: &str) -> Result<SymbolId, CompileError> {
        let mut next = Some(scope);
        while let Some(sc) = next {
            if let Some(s) = self.lookup_local(sc, name) {
                return Ok(s);
            }
            next = self.scope(sc).enclosing;
        }
        Err(self.fail(CompileErrorKind::UnknownIdentifier(name.into())))
    }

    pub(crate) fn add_new_symbol(&mut self, scope: ScopeId, s: SymbolId) {
        self.scope_mut(scope).symbols.push(s);
    }

    /// A synthesized argument descriptor, used for primitive signatures
    /// and type arguments.
    pub fn anonymous_argument(&mut self, ty: TypeId, form: Form) -> SymbolId {
        self.new_symbol(Symbol {
            name: None,
            kind: SymbolKind::Argument {
                location: 0,
                ty,
                form,
            },
        })
    }

    pub(crate) fn argument_info(&self, s: SymbolId) -> Option<(TypeId, Form, u32)> {
        match self.sym(s).kind {
            SymbolKind::Argument { location, ty, form } => Some((ty, form, location)),
            _ => None,
        }
    }

    /// Declares a named constant initialized from `value`; the
    /// initializing assignment is emitted by `scope_body`.
    pub fn add_constant(
        &mut self,
        scope: ScopeId,
        name: &str,
        value: ExprId,
    ) -> Result<SymbolId, CompileError> {
        if matches!(self.scope(scope).kind, ScopeKind::Class { .. }) {
            return Err(self.fail(CompileErrorKind::ConstantInClass));
        }
        self.unique_name(scope, name)?;
        let Some(vt) = self.expr(value).result_type else {
            return Err(self.fail(CompileErrorKind::ValueExpected));
        };
        let ty = self.new_constant_type(vt);
        let location = self.scope(scope).size;
        self.scope_mut(scope).size += 1;
        let line = self.line();
        let s = self.new_symbol(Symbol {
            name: Some(name.into()),
            kind: SymbolKind::Constant {
                location,
                ty,
                value,
                line,
            },
        });
        self.add_new_symbol(scope, s);
        Ok(s)
    }

    pub fn add_variable(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: TypeId,
    ) -> Result<SymbolId, CompileError> {
        self.unique_name(scope, name)?;
        let location = self.scope(scope).size;
        self.scope_mut(scope).size += 1;
        let s = self.new_symbol(Symbol {
            name: Some(name.into()),
            kind: SymbolKind::Var { location, ty },
        });
        self.add_new_symbol(scope, s);
        Ok(s)
    }

    pub fn add_type_declaration(
        &mut self,
        scope: ScopeId,
        name: &str,
        ty: TypeId,
    ) -> Result<SymbolId, CompileError> {
        self.unique_name(scope, name)?;
        let s = self.new_symbol(Symbol {
            name: Some(name.into()),
            kind: SymbolKind::TypeDef { ty },
        });
        self.add_new_symbol(scope, s);
        Ok(s)
    }

    /// Begins a class definition, honoring forward references: a name
    /// already declared as a class without a body is completed rather
    /// than redeclared.
    pub fn new_class_symbol(&mut self, scope: ScopeId, name: &str) -> Result<SymbolId, CompileError> {
        let (s, t) = match self.lookup_local(scope, name) {
            None => {
                let location = self.scope(scope).size;
                self.scope_mut(scope).size += 1;
                let t = self.new_type(Type::Class {
                    symbols: None,
                    parent: None,
                    static_table: None,
                });
                let s = self.new_symbol(Symbol {
                    name: Some(name.into()),
                    kind: SymbolKind::ClassDef { location, ty: t },
                });
                self.add_new_symbol(scope, s);
                (s, t)
            }
            Some(s) => {
                let SymbolKind::ClassDef { ty, .. } = self.sym(s).kind else {
                    return Err(self.fail(CompileErrorKind::NonClassRedefined(name.into())));
                };
                let Type::Class { symbols, .. } = *self.ty(ty) else {
                    return Err(self.fail(CompileErrorKind::Internal("class symbol without class type")));
                };
                if symbols.is_some() {
                    return Err(self.fail(CompileErrorKind::ClassMultiplyDefined(name.into())));
                }
                (s, ty)
            }
        };
        let ns = self.new_class_table(Some(scope));
        self.scope_mut(ns).defining_type = Some(t);
        if let Type::Class { ref mut symbols, .. } = *self.ty_mut(t) {
            *symbols = Some(ns);
        }
        Ok(s)
    }

    /// Splices a parent class into a child: instance variables keep
    /// their slots, methods are copied with `inherited` set and their
    /// types rewritten through the parent's qualifier substitution.
    pub fn fill_in_parent(
        &mut self,
        class_ty: TypeId,
        parent_ty: TypeId,
        type_args: &[SymbolId],
    ) -> Result<(), CompileError> {
        let Type::Class { .. } = *self.ty(class_ty) else {
            return Err(self.fail(CompileErrorKind::Internal("fill in parent on non-class")));
        };
        if let Type::Class { ref mut parent, .. } = *self.ty_mut(class_ty) {
            *parent = Some(parent_ty);
        }

        let (walk, substitution) = if type_args.is_empty() {
            (parent_ty, None)
        } else {
            let Type::Qualified { base, .. } = *self.ty(parent_ty) else {
                return Err(self.fail(CompileErrorKind::NotParameterizable));
            };
            let u = self.check_qualifications(parent_ty, type_args)?;
            (base, Some(u))
        };
        let Type::Class {
            symbols: Some(psyms),
            ..
        } = *self.ty(walk)
        else {
            return Err(self.fail(CompileErrorKind::ParentNotClass));
        };
        let Type::Class {
            symbols: Some(nsyms),
            ..
        } = *self.ty(class_ty)
        else {
            return Err(self.fail(CompileErrorKind::Internal("class has no member table")));
        };

        self.scope_mut(nsyms).size = self.scope(psyms).size;
        for s in self.scope(psyms).symbols.clone() {
            if let SymbolKind::Var { location, ty } = self.sym(s).kind {
                let name = self.sym(s).name.clone();
                let ns = self.new_symbol(Symbol {
                    name,
                    kind: SymbolKind::Var { location, ty },
                });
                self.add_new_symbol(nsyms, ns);
            }
        }

        let (pmethods, ptable_size) = match self.scope(psyms).kind {
            ScopeKind::Class {
                ref methods,
                method_table_size,
            } => (methods.clone(), method_table_size),
            _ => return Err(self.fail(CompileErrorKind::Internal("parent scope is not a class"))),
        };
        if let ScopeKind::Class {
            ref mut method_table_size,
            ..
        } = self.scope_mut(nsyms).kind
        {
            *method_table_size = ptable_size;
        }
        for s in pmethods {
            if let SymbolKind::Function {
                location, code, ty, ..
            } = self.sym(s).kind
            {
                let name = self.sym(s).name.clone();
                let ty = self.fix_resolved_type(Some(ty), substitution).unwrap_or(ty);
                let ns = self.new_symbol(Symbol {
                    name,
                    kind: SymbolKind::Function {
                        location,
                        code,
                        ty,
                        inherited: true,
                    },
                });
                if let ScopeKind::Class { ref mut methods, .. } = self.scope_mut(nsyms).kind {
                    methods.push(ns);
                }
            }
        }
        Ok(())
    }

    /// Opens a function definition in `scope` and returns the new
    /// function scope. Redefinition of an inherited method overrides it;
    /// in a class scope the function becomes a method and `self` is
    /// bound at slot 1.
    pub fn add_function_symbol(
        &mut self,
        scope: ScopeId,
        name: &str,
        type_args: &[ArgumentDecl],
    ) -> Result<ScopeId, CompileError> {
        let ns = self.new_function_table(Some(scope));

        let existing = self.lookup_local(scope, name);
        let is_global = matches!(self.scope(scope).kind, ScopeKind::Global);
        let fs = match existing {
            Some(fs) if !is_global => {
                let SymbolKind::Function { inherited, .. } = self.sym(fs).kind else {
                    return Err(self.fail(CompileErrorKind::NonFunctionRedefined(name.into())));
                };
                if !inherited {
                    return Err(self.fail(CompileErrorKind::FunctionMultiplyDefined(name.into())));
                }
                let code = self.null_statement();
                if let SymbolKind::Function {
                    inherited, code: c, ..
                } = &mut self.sym_mut(fs).kind
                {
                    *inherited = false;
                    *c = code;
                }
                fs
            }
            _ => {
                let code = self.null_statement();
                match self.scope(scope).kind {
                    ScopeKind::Global | ScopeKind::Function { .. } => {
                        let location = self.scope(scope).size;
                        self.scope_mut(scope).size += 1;
                        let fs = self.new_symbol(Symbol {
                            name: Some(name.into()),
                            kind: SymbolKind::Function {
                                location,
                                code,
                                ty: self.known.undefined,
                                inherited: false,
                            },
                        });
                        self.add_new_symbol(scope, fs);
                        fs
                    }
                    ScopeKind::Class { .. } => {
                        let location = match self.scope(scope).kind {
                            ScopeKind::Class {
                                method_table_size, ..
                            } => method_table_size,
                            _ => unreachable!(),
                        };
                        let fs = self.new_symbol(Symbol {
                            name: Some(name.into()),
                            kind: SymbolKind::Function {
                                location,
                                code,
                                ty: self.known.undefined,
                                inherited: false,
                            },
                        });
                        if let ScopeKind::Class {
                            ref mut methods,
                            ref mut method_table_size,
                        } = self.scope_mut(scope).kind
                        {
                            methods.push(fs);
                            *method_table_size += 1;
                        }
                        fs
                    }
                }
            }
        };

        let ft = self.new_function_type(Vec::new(), None);
        self.scope_mut(ns).defining_type = Some(ft);
        let sym_ty = if type_args.is_empty() {
            ft
        } else {
            self.new_qualified_type(ns, type_args, ft)?
        };
        if let SymbolKind::Function { ty, .. } = &mut self.sym_mut(fs).kind {
            *ty = sym_ty;
        }

        if matches!(self.scope(scope).kind, ScopeKind::Class { .. }) {
            let defining = self.scope(scope).defining_type;
            let Some(class_ty) = defining else {
                return Err(self.fail(CompileErrorKind::Internal("method outside class type")));
            };
            let self_ty = self.new_constant_type(class_ty);
            let s = self.new_symbol(Symbol {
                name: Some("self".into()),
                kind: SymbolKind::Argument {
                    location: 1,
                    ty: self_ty,
                    form: Form::ByValue,
                },
            });
            self.add_new_symbol(ns, s);
        }

        if let ScopeKind::Function {
            ref mut function_symbol,
            ..
        } = self.scope_mut(ns).kind
        {
            *function_symbol = Some(fs);
        }
        Ok(ns)
    }

    /// Enters the declared arguments into a function scope, assigning
    /// activation slots upward from the argument base.
    pub fn enter_function_arguments(
        &mut self,
        scope: ScopeId,
        args: &[ArgumentDecl],
    ) -> Vec<SymbolId> {
        let mut out = Vec::with_capacity(args.len());
        for a in args {
            let location = match self.scope(scope).kind {
                ScopeKind::Function {
                    argument_location, ..
                } => argument_location,
                _ => ARGUMENT_BASE,
            };
            if let ScopeKind::Function {
                ref mut argument_location,
                ..
            } = self.scope_mut(scope).kind
            {
                *argument_location += 1;
            }
            let s = self.new_symbol(Symbol {
                name: Some(a.name.clone()),
                kind: SymbolKind::Argument {
                    location,
                    ty: a.ty,
                    form: a.form,
                },
            });
            self.add_new_symbol(scope, s);
            out.push(s);
        }
        out
    }

    /// Completes a function scope's defining type with its argument list
    /// and return type.
    pub fn add_function_arguments(
        &mut self,
        scope: ScopeId,
        args: &[ArgumentDecl],
        returns: Option<TypeId>,
    ) -> Result<(), CompileError> {
        let Some(ft) = self.scope(scope).defining_type else {
            return Err(self.fail(CompileErrorKind::Internal("function scope without type")));
        };
        let entered = self.enter_function_arguments(scope, args);
        if let Type::Function {
            ref mut arguments,
            returns: ref mut r,
        } = *self.ty_mut(ft)
        {
            *arguments = entered;
            *r = returns;
        }
        Ok(())
    }

    /// A scope for an anonymous function-typed expression.
    pub fn function_expression(
        &mut self,
        scope: ScopeId,
        args: &[ArgumentDecl],
        returns: Option<TypeId>,
    ) -> ScopeId {
        let ns = self.new_function_table(Some(scope));
        let entered = self.enter_function_arguments(ns, args);
        let ft = self.new_function_type(entered, returns);
        self.scope_mut(ns).defining_type = Some(ft);
        ns
    }

    /// The stable statement handle a function's body hangs from.
    pub fn function_code(&self, scope: ScopeId) -> Result<StmtId, CompileError> {
        let ScopeKind::Function {
            function_symbol: Some(fs),
            ..
        } = self.scope(scope).kind
        else {
            return Err(self.fail(CompileErrorKind::Internal("scope has no function symbol")));
        };
        match self.sym(fs).kind {
            SymbolKind::Function { code, .. } => Ok(code),
            _ => Err(self.fail(CompileErrorKind::Internal("function symbol without code"))),
        }
    }

    /// Hangs a parsed body off the function's code handle.
    pub fn attach_function_body(&mut self, scope: ScopeId, body: StmtId) -> Result<(), CompileError> {
        let code = self.function_code(scope)?;
        self.stmt_mut(code).next = Some(body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_slots_start_after_the_frame_header() {
        let mut c = Compiler::new();
        let globals = c.globals();
        let int = c.known.integer;
        let ns = c.add_function_symbol(globals, "f", &[]).unwrap();
        let args = [
            ArgumentDecl {
                name: "a".into(),
                ty: int,
                form: Form::ByValue,
            },
            ArgumentDecl {
                name: "b".into(),
                ty: int,
                form: Form::ByReference,
            },
        ];
        c.add_function_arguments(ns, &args, Some(int)).unwrap();
        let a = c.lookup_local(ns, "a").unwrap();
        let b = c.lookup_local(ns, "b").unwrap();
        assert_eq!(Some((int, Form::ByValue, 4)), c.argument_info(a));
        assert_eq!(Some((int, Form::ByReference, 5)), c.argument_info(b));
        // Locals are numbered independently, in the locals cell.
        let v = c.add_variable(ns, "x", int).unwrap();
        assert!(matches!(
            c.sym(v).kind,
            SymbolKind::Var { location: 0, .. }
        ));
    }

    // The built-in classes start without member tables; completing
    // `object` is the test stand-in for the library prelude.
    fn define_object(c: &mut Compiler) {
        let globals = c.globals();
        c.new_class_symbol(globals, "object").unwrap();
        let object = c.known.object;
        c.fill_in_parent(object, object, &[]).unwrap();
    }

    #[test]
    fn methods_fill_the_table_from_slot_five() {
        let mut c = Compiler::new();
        define_object(&mut c);
        let globals = c.globals();
        let cs = c.new_class_symbol(globals, "Point").unwrap();
        let SymbolKind::ClassDef { ty, .. } = c.sym(cs).kind else {
            panic!("not a class def");
        };
        let object = c.known.object;
        c.fill_in_parent(ty, object, &[]).unwrap();
        let Type::Class {
            symbols: Some(scope),
            ..
        } = *c.ty(ty)
        else {
            panic!("no member table");
        };
        let m = c.add_function_symbol(scope, "norm", &[]).unwrap();
        let ms = c.lookup_local(scope, "norm").unwrap();
        assert!(matches!(
            c.sym(ms).kind,
            SymbolKind::Function {
                location: 5,
                inherited: false,
                ..
            }
        ));
        // A method scope binds self at slot 1.
        let selfsym = c.lookup_local(m, "self").unwrap();
        assert_eq!(1, c.argument_info(selfsym).unwrap().2);
    }

    #[test]
    fn inherited_methods_are_copied_then_overridden() {
        let mut c = Compiler::new();
        define_object(&mut c);
        let globals = c.globals();
        let object = c.known.object;

        let a = c.new_class_symbol(globals, "A").unwrap();
        let SymbolKind::ClassDef { ty: aty, .. } = c.sym(a).kind else {
            panic!();
        };
        c.fill_in_parent(aty, object, &[]).unwrap();
        let ascope = c.check_class(aty).and_then(|t| match *c.ty(t) {
            Type::Class { symbols, .. } => symbols,
            _ => None,
        });
        let ascope = ascope.unwrap();
        c.add_function_symbol(ascope, "f", &[]).unwrap();

        let b = c.new_class_symbol(globals, "B").unwrap();
        let SymbolKind::ClassDef { ty: bty, .. } = c.sym(b).kind else {
            panic!();
        };
        c.fill_in_parent(bty, aty, &[]).unwrap();
        let Type::Class {
            symbols: Some(bscope),
            ..
        } = *c.ty(bty)
        else {
            panic!();
        };
        let inherited = c.lookup_local(bscope, "f").unwrap();
        assert!(matches!(
            c.sym(inherited).kind,
            SymbolKind::Function {
                inherited: true,
                location: 5,
                ..
            }
        ));

        // Redefinition keeps the slot and installs a fresh body.
        c.add_function_symbol(bscope, "f", &[]).unwrap();
        assert!(matches!(
            c.sym(inherited).kind,
            SymbolKind::Function {
                inherited: false,
                location: 5,
                ..
            }
        ));
        // A second redefinition is an error.
        assert!(c.add_function_symbol(bscope, "f", &[]).is_err());
    }

    #[test]
    fn constants_are_rejected_in_class_scope() {
        let mut c = Compiler::new();
        define_object(&mut c);
        let globals = c.globals();
        let cs = c.new_class_symbol(globals, "K").unwrap();
        let SymbolKind::ClassDef { ty, .. } = c.sym(cs).kind else {
            panic!();
        };
        let object = c.known.object;
        c.fill_in_parent(ty, object, &[]).unwrap();
        let Type::Class {
            symbols: Some(scope),
            ..
        } = *c.ty(ty)
        else {
            panic!();
        };
        let lit = c.integer_literal(1);
        assert!(c.add_constant(scope, "k", lit).is_err());
    }

    #[test]
    fn names_are_unique_within_a_scope() {
        let mut c = Compiler::new();
        let globals = c.globals();
        let int = c.known.integer;
        c.add_variable(globals, "x", int).unwrap();
        assert!(c.add_variable(globals, "x", int).is_err());
        // Global functions may overload freely.
        c.add_function_symbol(globals, "plus", &[]).unwrap();
        assert!(c.add_function_symbol(globals, "plus", &[]).is_ok());
    }
}
