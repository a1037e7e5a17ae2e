use crate::builder::Compiler;
use crate::interp::{Fault, Interpreter};
use crate::memory::{Heap, Value};
use crate::symbols::{ScopeKind, SymbolId, SymbolKind};
use crate::types::{Type, TypeId};
use tracing::warn;

/// Builds a class's static table in the non-collected region: a cell of
/// method-table size whose method slots hold the method code handles.
/// Called once per class, right after its body is parsed. The metaclass,
/// name, size and parent slots stay empty until globals exist.
pub fn build_class_table(
    compiler: &mut Compiler,
    heap: &mut Heap,
    sym: SymbolId,
) -> Result<(), Fault> {
    let SymbolKind::ClassDef { ty, .. } = compiler.sym(sym).kind else {
        return Err(Fault::NotAClass(compiler.sym_name(sym)));
    };
    let t = match *compiler.ty(ty) {
        Type::Qualified { base, .. } => base,
        _ => ty,
    };
    let Type::Class {
        symbols: Some(cscope),
        ..
    } = *compiler.ty(t)
    else {
        return Err(Fault::NotAClass(compiler.sym_name(sym)));
    };
    let (methods, table_size) = match compiler.scope(cscope).kind {
        ScopeKind::Class {
            ref methods,
            method_table_size,
        } => (methods.clone(), method_table_size),
        _ => return Err(Fault::NotAClass(compiler.sym_name(sym))),
    };

    let table = heap.static_alloc(table_size as usize)?;
    for m in methods {
        let SymbolKind::Function { location, code, .. } = compiler.sym(m).kind else {
            return Err(Fault::UnknownGlobalSymbol(compiler.sym_name(m)));
        };
        heap.set_slot(table, location as usize, Value::code(code));
    }
    if let Type::Class {
        ref mut static_table,
        ..
    } = *compiler.ty_mut(t)
    {
        *static_table = Some(table);
    }
    Ok(())
}

impl Interpreter<'_> {
    /// Creates the global context, fills every global slot, interns the
    /// small integers, and completes each class's static table with its
    /// metaclass, name, size and parent.
    pub(crate) fn initialize(&mut self) -> Result<(), Fault> {
        let program = self.program;
        let globals = program.globals();
        let size = program.scope(globals).size as usize;
        self.heap.global_context = self.heap.static_alloc(size)?;
        let mut class_class = Value::NIL;

        // Newest first, so class tables are seen before the true/false
        // constants that need their classes.
        for &s in program.scope(globals).symbols.iter().rev() {
            let name = program.sym(s).name.clone();
            let name = name.as_deref().unwrap_or("");
            match program.sym(s).kind {
                SymbolKind::Var { location, .. } => {
                    let v = match name {
                        "true" => {
                            let a = self.heap.static_alloc(1)?;
                            self.heap.set_slot(a, 0, self.builtins.true_class);
                            let g = self.heap.global_context;
                            self.heap.set_slot(a, 1, g);
                            self.builtins.true_object = a;
                            a
                        }
                        "false" => {
                            let a = self.heap.static_alloc(1)?;
                            self.heap.set_slot(a, 0, self.builtins.false_class);
                            let g = self.heap.global_context;
                            self.heap.set_slot(a, 1, g);
                            self.builtins.false_object = a;
                            a
                        }
                        // NIL, and everything else, starts undefined.
                        _ => Value::NIL,
                    };
                    let g = self.heap.global_context;
                    self.heap.set_slot(g, location as usize, v);
                }

                SymbolKind::ClassDef { location, ty } => {
                    let Some(t) = program.check_class(ty) else {
                        return Err(Fault::NotAClass(name.into()));
                    };
                    let table = match *program.ty(t) {
                        Type::Class { static_table, .. } => static_table.unwrap_or(Value::NIL),
                        _ => Value::NIL,
                    };
                    if table.is_nil() && name != "Leda_undefined" {
                        warn!(target: "leda::operators", class = name, "null static table");
                    }
                    let g = self.heap.global_context;
                    self.heap.set_slot(g, location as usize, table);
                    match name {
                        "integer" => self.builtins.integer_class = table,
                        "real" => self.builtins.real_class = table,
                        "string" => self.builtins.string_class = table,
                        "True" => self.builtins.true_class = table,
                        "False" => self.builtins.false_class = table,
                        "Class" => class_class = table,
                        _ => {}
                    }
                }

                SymbolKind::Function { location, code, .. } => {
                    let g = self.heap.global_context;
                    self.heap.set_slot(g, location as usize, Value::code(code));
                }

                SymbolKind::TypeDef { .. } => {}

                SymbolKind::Constant { location, .. } => {
                    let g = self.heap.global_context;
                    self.heap.set_slot(g, location as usize, Value::NIL);
                }

                SymbolKind::Argument { .. } => {
                    return Err(Fault::UnknownGlobalSymbol(name.into()));
                }
            }
        }

        // Keeping common integers in a table reduces allocation; they
        // are static, so they never move.
        for i in 0..20 {
            let v = self.new_integer(i)?;
            self.builtins.integer_table[i as usize] = v;
        }

        for &s in program.scope(globals).symbols.iter().rev() {
            if matches!(program.sym(s).kind, SymbolKind::ClassDef { .. }) {
                self.fix_class_table(s, class_class)?;
            }
        }
        Ok(())
    }

    /// Fills the metaclass, global-context, name, size and parent slots
    /// of one class's static table.
    fn fix_class_table(&mut self, sym: SymbolId, class_class: Value) -> Result<(), Fault> {
        let program = self.program;
        let name = program.sym_name(sym);
        let SymbolKind::ClassDef { ty, .. } = program.sym(sym).kind else {
            return Err(Fault::NotAClass(name));
        };
        let Some(t) = program.check_class(ty) else {
            return Err(Fault::NotAClass(name));
        };
        let Type::Class {
            static_table,
            parent,
            symbols,
        } = *program.ty(t)
        else {
            return Err(Fault::NotAClass(name));
        };
        let Some(table) = static_table else {
            if name.as_ref() != "Leda_undefined" {
                warn!(target: "leda::operators", class = &*name, "empty static table");
            }
            return Ok(());
        };

        self.heap.set_slot(table, 0, class_class);
        let g = self.heap.global_context;
        self.heap.set_slot(table, 1, g);
        let name_cell = self.new_string(name.clone())?;
        self.heap.set_slot(table, 2, name_cell);

        let table_size = symbols
            .and_then(|sc| match program.scope(sc).kind {
                ScopeKind::Class {
                    method_table_size, ..
                } => Some(method_table_size),
                _ => None,
            })
            .unwrap_or(0);
        let size_cell = self.new_integer(i64::from(table_size))?;
        self.heap.set_slot(table, 3, size_cell);

        let parent_table = parent
            .and_then(|p: TypeId| program.check_class(p))
            .and_then(|p| match *program.ty(p) {
                Type::Class { static_table, .. } => static_table,
                _ => None,
            });
        let Some(parent_table) = parent_table else {
            return Err(Fault::MissingParentTable(name));
        };
        self.heap.set_slot(table, 4, parent_table);
        Ok(())
    }
}
