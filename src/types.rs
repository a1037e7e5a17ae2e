use crate::builder::{CompileError, CompileErrorKind, Compiler};
use crate::memory::Value;
use crate::symbols::{ArgumentDecl, Form, ScopeId, Symbol, SymbolId, SymbolKind};

/// Handle of a type record in the compiler's arena.
///
/// Class records and the static-table chain form a cycle at the root
/// (`object`'s parent is `object` by convention), which is why types
/// live in an arena and refer to each other by handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeId(u32);

impl TypeId {
    pub(crate) fn from_index(i: u32) -> Self {
        TypeId(i)
    }

    pub(crate) fn index(self) -> u32 {
        self.0
    }
}

/// A type record. Placeholders (`Unresolved`) are never conformance
/// endpoints; conformance walks through `Unresolved`, `Constant`,
/// `Qualified` and `Resolved` wrappers before comparing.
#[derive(Debug, Clone)]
pub enum Type {
    Class {
        /// The member table; absent while the class is only forward
        /// declared.
        symbols: Option<ScopeId>,
        parent: Option<TypeId>,
        /// Filled by `boot::build_class_table` once the class body is
        /// complete.
        static_table: Option<Value>,
    },
    Function {
        /// Argument descriptor symbols in declaration order.
        arguments: Vec<SymbolId>,
        returns: Option<TypeId>,
    },
    /// A generic type: placeholder records plus the base they qualify.
    Qualified { qualifiers: Vec<TypeId>, base: TypeId },
    /// A concrete instantiation binding each placeholder in `patterns`
    /// to the argument symbol at the same position in `replacements`.
    Resolved {
        base: TypeId,
        patterns: Vec<TypeId>,
        replacements: Vec<SymbolId>,
    },
    /// A type-variable placeholder carrying its bound.
    Unresolved { base: TypeId },
    /// Marks non-assignable values.
    Constant { base: TypeId },
    /// The meta-type of a class constructor value.
    ClassDef { base: TypeId },
}

impl Compiler {
    pub(crate) fn new_constant_type(&mut self, base: TypeId) -> TypeId {
        self.new_type(Type::Constant { base })
    }

    /// The type a symbol names, for symbols usable in type position.
    pub fn check_type(&self, s: SymbolId) -> Result<TypeId, CompileError> {
        match self.sym(s).kind {
            SymbolKind::TypeDef { ty } | SymbolKind::ClassDef { ty, .. } => Ok(ty),
            _ => Err(self.fail(CompileErrorKind::NotAType(self.sym_name(s)))),
        }
    }

    /// Walks past qualification to the underlying class record, if any.
    pub fn check_class(&self, t: TypeId) -> Option<TypeId> {
        match *self.ty(t) {
            Type::Class { .. } => Some(t),
            Type::Qualified { base, .. } => self.check_class(base),
            _ => None,
        }
    }

    /// Walks past resolution to the underlying function record, if any.
    pub fn check_function(&self, t: TypeId) -> Option<TypeId> {
        match *self.ty(t) {
            Type::Function { .. } => Some(t),
            Type::Resolved { base, .. } => self.check_function(base),
            _ => None,
        }
    }

    /// Validates a qualified-type parameterization and returns the fresh
    /// `Resolved` record binding placeholders to the given argument
    /// symbols.
    pub fn check_qualifications(
        &mut self,
        qt: TypeId,
        args: &[SymbolId],
    ) -> Result<TypeId, CompileError> {
        let Type::Qualified {
            ref qualifiers,
            base,
        } = *self.ty(qt)
        else {
            return Err(self.fail(CompileErrorKind::NotParameterizable));
        };
        let qualifiers = qualifiers.clone();
        if qualifiers.len() != args.len() {
            return Err(self.fail(CompileErrorKind::WrongQualifierCount {
                expected: qualifiers.len(),
                found: args.len(),
            }));
        }
        for (&q, &s) in qualifiers.iter().zip(args) {
            let Type::Unresolved { base: bound } = *self.ty(q) else {
                return Err(self.fail(CompileErrorKind::Internal("qualifier is not a placeholder")));
            };
            let Some((ty, form, _)) = self.argument_info(s) else {
                return Err(self.fail(CompileErrorKind::Internal(
                    "type argument is not an argument symbol",
                )));
            };
            if form != Form::ByValue {
                return Err(self.fail(CompileErrorKind::StorageFormInTypeContext));
            }
            if !self.conformable(bound, ty) {
                return Err(self.fail(CompileErrorKind::InvalidParameterization));
            }
        }
        Ok(self.new_type(Type::Resolved {
            base,
            patterns: qualifiers,
            replacements: args.to_vec(),
        }))
    }

    /// Substitutes through a `Resolved` record: a placeholder becomes
    /// its replacement's type, anything else is wrapped so nested
    /// lookups keep the substitution. Idempotent once every placeholder
    /// has been replaced.
    pub fn fix_resolved_type(&mut self, t: Option<TypeId>, rt: Option<TypeId>) -> Option<TypeId> {
        let (t, rt) = match (t, rt) {
            (Some(t), Some(rt)) => (t, rt),
            _ => return t,
        };
        let Type::Resolved {
            ref patterns,
            ref replacements,
            ..
        } = *self.ty(rt)
        else {
            return Some(t);
        };
        let patterns = patterns.clone();
        let replacements = replacements.clone();
        for (&pat, &rep) in patterns.iter().zip(&replacements) {
            if t == pat {
                let (ty, _, _) = self.argument_info(rep)?;
                return Some(ty);
            }
        }
        Some(self.new_type(Type::Resolved {
            base: t,
            patterns,
            replacements,
        }))
    }

    /// The `n`-th argument symbol of a function type, with type
    /// substitution applied when `t` is resolved.
    pub fn argument_number(&mut self, t: TypeId, n: usize) -> Result<SymbolId, CompileError> {
        match *self.ty(t) {
            Type::Function { ref arguments, .. } => arguments
                .get(n)
                .copied()
                .ok_or_else(|| self.fail(CompileErrorKind::Internal("argument index out of range"))),
            Type::Resolved { base, .. } => {
                let s = self.argument_number(base, n)?;
                let Some((ty, form, location)) = self.argument_info(s) else {
                    return Err(self.fail(CompileErrorKind::Internal("non-argument in type")));
                };
                let fixed = self
                    .fix_resolved_type(Some(ty), Some(t))
                    .unwrap_or(ty);
                let name = self.sym(s).name.clone();
                Ok(self.new_symbol(Symbol {
                    name,
                    kind: SymbolKind::Argument {
                        location,
                        ty: fixed,
                        form,
                    },
                }))
            }
            _ => Err(self.fail(CompileErrorKind::Internal("argument lookup on non-function"))),
        }
    }

    pub(crate) fn new_function_type(
        &mut self,
        arguments: Vec<SymbolId>,
        returns: Option<TypeId>,
    ) -> TypeId {
        self.new_type(Type::Function { arguments, returns })
    }

    fn function_conformable(&mut self, a: TypeId, b: TypeId) -> bool {
        let Type::Function {
            ref arguments,
            returns: ra,
        } = *self.ty(a)
        else {
            return false;
        };
        let pa = arguments.clone();
        match *self.ty(b) {
            Type::Function {
                ref arguments,
                returns,
            } => {
                let len = arguments.len();
                if !self.conformable_opt(ra, returns) {
                    return false;
                }
                if pa.len() != len {
                    return false;
                }
            }
            Type::Resolved { .. } => {
                let Some(ft) = self.check_function(b) else {
                    return false;
                };
                if a == ft {
                    return true;
                }
                let Type::Function {
                    ref arguments,
                    returns,
                } = *self.ty(ft)
                else {
                    return false;
                };
                let len = arguments.len();
                let fixed = self.fix_resolved_type(returns, Some(b));
                if !self.conformable_opt(ra, fixed) {
                    return false;
                }
                if pa.len() != len {
                    return false;
                }
            }
            _ => return false,
        }
        for (i, &ps) in pa.iter().enumerate() {
            let Ok(qs) = self.argument_number(b, i) else {
                return false;
            };
            let (Some((pt, pf, _)), Some((qt, qf, _))) =
                (self.argument_info(ps), self.argument_info(qs))
            else {
                return false;
            };
            if pf != qf {
                return false;
            }
            if !self.conformable(pt, qt) {
                return false;
            }
        }
        true
    }

    /// Directional conformance: may a value of type `b` stand where `a`
    /// is expected.
    pub fn conformable(&mut self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        // NIL is polymorphic.
        if b == self.known.undefined {
            return true;
        }
        if let Type::Constant { base } = *self.ty(b) {
            return self.conformable(a, base);
        }
        // Placeholders are compared through their bounds.
        if let Type::Unresolved { base } = *self.ty(a) {
            return self.conformable(base, b);
        }
        if let Type::Unresolved { base } = *self.ty(b) {
            return self.conformable(a, base);
        }
        match *self.ty(a) {
            Type::Function { .. } => self.function_conformable(a, b),
            Type::Class { .. } => match *self.ty(b) {
                Type::Function { .. } => a == self.known.object,
                Type::ClassDef { .. } => a == self.known.metaclass,
                Type::Class { parent, .. } => match parent {
                    // The root class is its own parent.
                    Some(p) if p != b => self.conformable(a, p),
                    _ => false,
                },
                Type::Qualified { base, .. } => self.conformable(a, base),
                Type::Resolved { base, .. } => self.conformable(a, base),
                _ => false,
            },
            Type::Qualified { base, .. } => self.conformable(base, b),
            Type::Resolved { base, .. } => self.conformable(base, b),
            _ => false,
        }
    }

    /// Conformance over possibly-absent (void) types: two absent types
    /// conform, an absent and a present one never do.
    pub fn conformable_opt(&mut self, a: Option<TypeId>, b: Option<TypeId>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => self.conformable(a, b),
            _ => false,
        }
    }

    /// Builds a qualified (generic) type: each qualifier becomes an
    /// `Unresolved` placeholder entered as a type symbol in `scope`.
    pub fn new_qualified_type(
        &mut self,
        scope: ScopeId,
        qualifiers: &[ArgumentDecl],
        base: TypeId,
    ) -> Result<TypeId, CompileError> {
        let mut placeholders = Vec::with_capacity(qualifiers.len());
        for q in qualifiers {
            if q.form != Form::ByValue {
                return Err(self.fail(CompileErrorKind::StorageFormInTypeContext));
            }
            let nt = self.new_type(Type::Unresolved { base: q.ty });
            let s = self.new_symbol(Symbol {
                name: Some(q.name.clone()),
                kind: SymbolKind::TypeDef { ty: nt },
            });
            self.add_new_symbol(scope, s);
            placeholders.push(nt);
        }
        Ok(self.new_type(Type::Qualified {
            qualifiers: placeholders,
            base,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undefined_conforms_on_the_right() {
        let mut c = Compiler::new();
        let undefined = c.known.undefined;
        for t in [c.known.object, c.known.integer, c.known.boolean, c.known.relation] {
            assert!(c.conformable(t, undefined));
        }
    }

    #[test]
    fn class_chain_and_root_sentinel() {
        let mut c = Compiler::new();
        let (object, boolean, truth) = (c.known.object, c.known.boolean, c.known.truth);
        // boolean's parent is object; True's parent is boolean.
        assert!(c.conformable(object, truth));
        assert!(c.conformable(boolean, truth));
        assert!(!c.conformable(truth, boolean));
        // The root terminates the walk without looping.
        assert!(!c.conformable(c.known.integer, object));
    }

    #[test]
    fn constant_strips_on_the_right_only() {
        let mut c = Compiler::new();
        let boolean = c.known.boolean;
        let konst = c.new_constant_type(boolean);
        assert!(c.conformable(boolean, konst));
        assert!(!c.conformable(konst, c.known.object));
    }

    #[test]
    fn object_conforms_to_function_types() {
        let mut c = Compiler::new();
        let relation = c.known.relation;
        assert!(c.conformable(c.known.object, relation));
        assert!(!c.conformable(c.known.integer, relation));
    }

    #[test]
    fn function_arguments_match_elementwise() {
        let mut c = Compiler::new();
        let int = c.known.integer;
        let a1 = c.anonymous_argument(int, Form::ByValue);
        let f1 = c.new_function_type(vec![a1], Some(int));
        let a2 = c.anonymous_argument(int, Form::ByValue);
        let f2 = c.new_function_type(vec![a2], Some(int));
        assert!(c.conformable(f1, f2));
        // Passing forms must match.
        let a3 = c.anonymous_argument(int, Form::ByName);
        let f3 = c.new_function_type(vec![a3], Some(int));
        assert!(!c.conformable(f1, f3));
        // Arity must match.
        let f4 = c.new_function_type(vec![], Some(int));
        assert!(!c.conformable(f1, f4));
    }

    #[test]
    fn relation_is_conformable_to_itself_via_identity() {
        let mut c = Compiler::new();
        let relation = c.known.relation;
        assert!(c.conformable(relation, relation));
    }

    #[test]
    fn fix_resolved_type_is_idempotent() {
        let mut c = Compiler::new();
        let boolean = c.known.boolean;
        let object = c.known.object;
        let globals = c.globals();
        let decl = ArgumentDecl {
            name: "T".into(),
            ty: object,
            form: Form::ByValue,
        };
        let qt = c.new_qualified_type(globals, &[decl], object).unwrap();
        let Type::Qualified { ref qualifiers, .. } = *c.ty(qt) else {
            panic!("not qualified");
        };
        let placeholder = qualifiers[0];
        let arg = c.anonymous_argument(boolean, Form::ByValue);
        let rt = c.check_qualifications(qt, &[arg]).unwrap();
        // A placeholder substitutes to the actual argument type.
        assert_eq!(
            Some(boolean),
            c.fix_resolved_type(Some(placeholder), Some(rt))
        );
        // Substituting a fully-replaced type again is the identity.
        let once = c.fix_resolved_type(Some(placeholder), Some(rt));
        let twice = c.fix_resolved_type(once, Some(rt));
        assert_eq!(once, twice);
    }

    #[test]
    fn qualification_arity_is_checked() {
        let mut c = Compiler::new();
        let object = c.known.object;
        let int = c.known.integer;
        let globals = c.globals();
        let decl = ArgumentDecl {
            name: "T".into(),
            ty: object,
            form: Form::ByValue,
        };
        let qt = c.new_qualified_type(globals, &[decl], object).unwrap();
        let a = c.anonymous_argument(int, Form::ByValue);
        let b = c.anonymous_argument(int, Form::ByValue);
        assert!(c.check_qualifications(qt, &[a, b]).is_err());
        assert!(c.check_qualifications(qt, &[]).is_err());
    }
}
