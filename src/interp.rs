use crate::builder::Compiler;
use crate::memory::{self, Heap, Value, ROOT_STACK_LIMIT};
use crate::primitives::Primitive;
use crate::tree::{ExprId, ExprKind, StmtId, StmtKind};
use std::collections::HashMap;
use std::io::BufRead;
use std::rc::Rc;
use std::{error, fmt};
use tracing::trace;

/// A fatal runtime condition. Nothing is recovered; the driver reports
/// the fault and exits.
#[derive(Debug, Clone)]
pub enum Fault {
    /// An undefined (nil) value reached an operation that needs a cell.
    /// `check` numbers the evaluator checkpoint that caught it.
    UndefinedValue {
        check: u8,
        what: Option<Box<str>>,
        file: Rc<str>,
        line: u32,
    },
    Memory(memory::Error),
    RootStackOverflow { file: Rc<str>, line: u32 },
    /// A closure or method slot held no statement handle.
    EmptyStatement,
    NonEmptyExpressionStatement { file: Rc<str>, line: u32 },
    /// A constructor supplied more values than the instance has slots.
    InstanceTooBig { file: Rc<str>, line: u32 },
    BadSubscript { index: i64, file: Rc<str>, line: u32 },
    /// Bootstrap found a class whose parent has no static table.
    MissingParentTable(Box<str>),
    NotAClass(Box<str>),
    UnknownGlobalSymbol(Box<str>),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UndefinedValue {
                check,
                what,
                file,
                line,
            } => {
                write!(f, "File {file} Line {line}: undefined value used")?;
                if let Some(what) = what {
                    write!(f, ": {what}")?;
                }
                write!(f, " (check {check})")
            }
            Self::Memory(e) => e.fmt(f),
            Self::RootStackOverflow { file, line } => {
                write!(f, "File {file} Line {line}: root stack overflow")
            }
            Self::EmptyStatement => f.write_str("internal run-time error: empty statement"),
            Self::NonEmptyExpressionStatement { file, line } => write!(
                f,
                "File {file} Line {line}: internal run-time error: expression statement is non-empty"
            ),
            Self::InstanceTooBig { file, line } => {
                write!(f, "File {file} Line {line}: filling instance too big")
            }
            Self::BadSubscript { index, file, line } => {
                write!(f, "File {file} Line {line}: subscript {index} out of range")
            }
            Self::MissingParentTable(name) => {
                write!(f, "parent doesn't have table for class {name}")
            }
            Self::NotAClass(name) => write!(f, "{name} is not a class"),
            Self::UnknownGlobalSymbol(name) => {
                write!(f, "unimplemented symbol {name} in construction of global context")
            }
        }
    }
}

impl error::Error for Fault {}

impl From<memory::Error> for Fault {
    fn from(e: memory::Error) -> Self {
        Fault::Memory(e)
    }
}

/// Cells the bootstrap pins for the evaluator: the interned boolean
/// objects, the classes of the boxed scalar types, and the small-integer
/// table. All of them live in the static region and never move.
#[derive(Debug)]
pub(crate) struct Builtins {
    pub integer_class: Value,
    pub real_class: Value,
    pub string_class: Value,
    pub true_object: Value,
    pub true_class: Value,
    pub false_object: Value,
    pub false_class: Value,
    pub integer_table: [Value; 20],
}

impl Builtins {
    fn empty() -> Self {
        Builtins {
            integer_class: Value::NIL,
            real_class: Value::NIL,
            string_class: Value::NIL,
            true_object: Value::NIL,
            true_class: Value::NIL,
            false_object: Value::NIL,
            false_class: Value::NIL,
            integer_table: [Value::NIL; 20],
        }
    }
}

/// The tree-walking evaluator. Owns the heap; reads the compiled
/// program.
#[derive(Debug)]
pub struct Interpreter<'a> {
    pub(crate) program: &'a Compiler,
    pub heap: Heap,
    pub(crate) builtins: Builtins,
    literal_handles: HashMap<ExprId, u64>,
    file: Rc<str>,
    line: u32,
}

impl<'a> Interpreter<'a> {
    #[must_use]
    pub fn new(program: &'a Compiler, heap: Heap) -> Self {
        Interpreter {
            program,
            heap,
            builtins: Builtins::empty(),
            literal_handles: HashMap::new(),
            file: "<boot>".into(),
            line: 0,
        }
    }

    /// Bootstraps the runtime and evaluates the top-level statement
    /// list.
    pub fn run(&mut self, first: StmtId) -> Result<Value, Fault> {
        self.initialize()?;
        self.heap.end_initialization();
        self.heap.current_context = self.heap.global_context;
        tracing::info!(target: "leda::functions", "starting execution");
        let result = self.statement(first)?;
        tracing::info!(target: "leda::functions", "execution ended normally");
        Ok(result)
    }

    fn undef(&self, check: u8, what: Option<&str>) -> Fault {
        Fault::UndefinedValue {
            check,
            what: what.map(Into::into),
            file: self.file.clone(),
            line: self.line,
        }
    }

    fn defined(&self, check: u8, v: Value, what: Option<&str>) -> Result<Value, Fault> {
        if v.is_nil() {
            Err(self.undef(check, what))
        } else {
            Ok(v)
        }
    }

    pub(crate) fn boolean(&self, b: bool) -> Value {
        if b {
            self.builtins.true_object
        } else {
            self.builtins.false_object
        }
    }

    // ------------------------------------------------------------------
    // Constants
    // ------------------------------------------------------------------

    /// A 2-slot binary cell; integers and references share the shape.
    /// Never interned, so reference cells stay distinct.
    fn binary_value(&mut self, i: i64) -> Result<Value, Fault> {
        let v = if self.heap.is_initializing() {
            self.heap.static_alloc(2)?
        } else {
            self.heap.alloc(2)?
        };
        self.heap.set_binary(v);
        self.heap.set_raw(v, 2, i as u64);
        Ok(v)
    }

    /// A boxed integer; values 0..19 come from the interned table.
    pub(crate) fn new_integer(&mut self, i: i64) -> Result<Value, Fault> {
        if (0..20).contains(&i) {
            let cached = self.builtins.integer_table[i as usize];
            if !cached.is_nil() {
                return Ok(cached);
            }
        }
        let v = self.binary_value(i)?;
        self.heap.set_slot(v, 0, self.builtins.integer_class);
        let g = self.heap.global_context;
        self.heap.set_slot(v, 1, g);
        Ok(v)
    }

    /// Only single-precision reals, to dodge alignment trouble.
    fn new_real(&mut self, r: f32) -> Result<Value, Fault> {
        let v = self.heap.alloc(2)?;
        self.heap.set_binary(v);
        self.heap.set_slot(v, 0, self.builtins.real_class);
        let g = self.heap.global_context;
        self.heap.set_slot(v, 1, g);
        self.heap.set_raw(v, 2, u64::from(r.to_bits()));
        Ok(v)
    }

    fn string_cell(&mut self, handle: u64) -> Result<Value, Fault> {
        let v = if self.heap.is_initializing() {
            self.heap.static_alloc(2)?
        } else {
            self.heap.alloc(2)?
        };
        self.heap.set_binary(v);
        self.heap.set_slot(v, 0, self.builtins.string_class);
        let g = self.heap.global_context;
        self.heap.set_slot(v, 1, g);
        self.heap.set_raw(v, 2, handle);
        Ok(v)
    }

    pub(crate) fn new_string(&mut self, text: impl Into<Box<str>>) -> Result<Value, Fault> {
        let handle = self.heap.intern(text);
        self.string_cell(handle)
    }

    fn int_val(&self, v: Value) -> i64 {
        self.heap.raw(v, 2) as i64
    }

    fn real_val(&self, v: Value) -> f32 {
        f32::from_bits(self.heap.raw(v, 2) as u32)
    }

    fn string_val(&self, v: Value) -> &str {
        self.heap.string(self.heap.raw(v, 2))
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    pub(crate) fn expression(&mut self, e: ExprId) -> Result<Value, Fault> {
        let program = self.program;
        match &program.expr(e).kind {
            ExprKind::CurrentContext => Ok(self.heap.current_context),

            ExprKind::Offset {
                base,
                location,
                symbol,
            } => {
                let arg = if matches!(program.expr(*base).kind, ExprKind::CurrentContext) {
                    self.heap.current_context
                } else {
                    let v = self.expression(*base)?;
                    self.defined(9, v, symbol.as_deref())?
                };
                Ok(self.heap.slot(arg, *location as usize))
            }

            ExprKind::GlobalOffset { location, .. } => {
                let g = self.heap.global_context;
                Ok(self.heap.slot(g, *location as usize))
            }

            ExprKind::MakeReference {
                base,
                location,
                symbol,
            } => {
                let arg = self.expression(*base)?;
                self.defined(10, arg, symbol.as_deref())?;
                self.heap.push_root(arg);
                let r = self.binary_value(i64::from(*location))?;
                let arg = self.heap.pop_root();
                self.heap.set_slot(r, 0, arg);
                Ok(r)
            }

            ExprKind::Assign {
                left,
                right,
                symbol,
            } => {
                if let ExprKind::MakeReference { base, location, .. } = &program.expr(*left).kind {
                    let arg = if matches!(program.expr(*base).kind, ExprKind::CurrentContext) {
                        self.heap.current_context
                    } else {
                        let v = self.expression(*base)?;
                        self.defined(11, v, symbol.as_deref())?
                    };
                    self.heap.push_root(arg);
                    let result = self.expression(*right)?;
                    let arg = self.heap.pop_root();
                    self.heap.set_slot(arg, *location as usize, result);
                } else {
                    let arg = self.expression(*left)?;
                    self.defined(31, arg, symbol.as_deref())?;
                    self.heap.push_root(arg);
                    let result = self.expression(*right)?;
                    let arg = self.heap.pop_root();
                    let base = self.heap.slot(arg, 0);
                    self.defined(32, base, symbol.as_deref())?;
                    let index = self.heap.raw(arg, 2) as usize;
                    self.heap.set_slot(base, index, result);
                }
                Ok(Value::NIL)
            }

            ExprKind::MethodContext {
                base,
                location,
                symbol,
            } => {
                let arg = self.expression(*base)?;
                self.heap.push_root(arg);
                let result = self.heap.alloc(3)?;
                let arg = self.heap.pop_root();
                self.defined(12, arg, symbol.as_deref())?;
                let table = self.heap.slot(arg, 0);
                self.defined(13, table, Some("method table"))?;
                trace!(target: "leda::operators", location = *location, "make method context");
                self.heap.set_slot(result, 1, arg);
                let code = self.heap.slot(table, *location as usize);
                self.heap.set_slot(result, 2, code);
                Ok(result)
            }

            ExprKind::Closure { context, code, .. } => {
                let mut result = self.heap.alloc(2)?;
                let arg = if matches!(program.expr(*context).kind, ExprKind::CurrentContext) {
                    self.heap.current_context
                } else {
                    self.heap.push_root(result);
                    let a = self.expression(*context)?;
                    result = self.heap.pop_root();
                    self.defined(14, a, Some("<context>"))?
                };
                trace!(target: "leda::operators", "make closure");
                self.heap.set_slot(result, 1, arg);
                self.heap.set_slot(result, 2, Value::code(*code));
                Ok(result)
            }

            ExprKind::Call {
                target,
                args,
                symbol,
            } => self.function_call(*target, args, symbol.as_deref()),

            ExprKind::EvalThunk { base, .. } => {
                let arg = self.expression(*base)?;
                self.defined(19, arg, Some("thunk"))?;
                trace!(target: "leda::operators", "evaluate thunk");
                let code = self
                    .heap
                    .slot(arg, 2)
                    .as_code()
                    .ok_or(Fault::EmptyStatement)?;
                let saved = self.heap.current_context;
                self.heap.push_root(saved);
                self.heap.current_context = self.heap.slot(arg, 1);
                let result = self.statement(code)?;
                self.heap.current_context = self.heap.pop_root();
                Ok(result)
            }

            ExprKind::EvalReference { base, symbol } => {
                let arg = self.expression(*base)?;
                self.defined(33, arg, symbol.as_deref())?;
                trace!(target: "leda::operators", "evaluate reference");
                let cell = self.heap.slot(arg, 0);
                self.defined(34, cell, symbol.as_deref())?;
                let index = self.heap.raw(arg, 2) as usize;
                Ok(self.heap.slot(cell, index))
            }

            ExprKind::Integer(v) => self.new_integer(*v),

            ExprKind::StringLit(s) => {
                let handle = match self.literal_handles.get(&e) {
                    Some(&h) => h,
                    None => {
                        let h = self.heap.intern(s.as_ref());
                        self.literal_handles.insert(e, h);
                        h
                    }
                };
                self.string_cell(handle)
            }

            ExprKind::Real(v) => self.new_real(*v),

            ExprKind::SpecialCall { primitive, args } => {
                trace!(target: "leda::operators", primitive = ?primitive, "do special");
                self.special(*primitive, args)
            }

            ExprKind::BuildInstance { table, size, args } => {
                let arg = self.expression(*table)?;
                self.heap.push_root(arg);
                let mut result = self.heap.alloc(*size as usize)?;
                let arg = self.heap.pop_root();
                self.defined(20, arg, Some("build instance table"))?;
                self.heap.set_slot(result, 0, arg);
                let g = self.heap.global_context;
                self.heap.set_slot(result, 1, g);
                trace!(target: "leda::operators", size = *size, "build instance");
                for (i, &a) in args.iter().enumerate() {
                    let slot = 2 + i;
                    if slot > *size as usize {
                        return Err(Fault::InstanceTooBig {
                            file: self.file.clone(),
                            line: self.line,
                        });
                    }
                    self.heap.push_root(result);
                    let v = self.expression(a)?;
                    result = self.heap.pop_root();
                    self.heap.set_slot(result, slot, v);
                }
                Ok(result)
            }

            ExprKind::Comma { left, right } => {
                self.expression(*left)?;
                self.expression(*right)
            }

            ExprKind::PatternMatch {
                base,
                class,
                bindings,
            } => {
                let b = self.expression(*base)?;
                self.defined(30, b, Some("pattern base"))?;
                self.heap.push_root(b);
                let a = self.expression(*class)?;
                let mut b = self.heap.pop_root();
                self.defined(30, a, Some("pattern class"))?;
                let mut cls = self.heap.slot(b, 0);
                while cls.is_cell() {
                    if cls == a {
                        let mut a = a;
                        for (i, &binding) in bindings.iter().enumerate() {
                            self.heap.push_root(a);
                            self.heap.push_root(b);
                            let r = self.expression(binding)?;
                            b = self.heap.pop_root();
                            a = self.heap.pop_root();
                            let target = self.heap.slot(r, 0);
                            let index = self.heap.raw(r, 2) as usize;
                            let field = self.heap.slot(b, 2 + i);
                            self.heap.set_slot(target, index, field);
                        }
                        return Ok(self.builtins.true_object);
                    }
                    let parent = self.heap.slot(cls, 4);
                    if parent == cls {
                        break;
                    }
                    cls = parent;
                }
                Ok(self.builtins.false_object)
            }
        }
    }

    // ------------------------------------------------------------------
    // Calling convention
    // ------------------------------------------------------------------

    /// Resolves a callee to its (context, code handle) pair without
    /// building a closure cell when the shape is statically known.
    fn call_target(
        &mut self,
        fun: ExprId,
        symbol: Option<&str>,
    ) -> Result<(Value, StmtId), Fault> {
        let program = self.program;
        match &program.expr(fun).kind {
            ExprKind::Closure { context, code, .. } => {
                let ctx = if matches!(program.expr(*context).kind, ExprKind::CurrentContext) {
                    self.heap.current_context
                } else {
                    let c = self.expression(*context)?;
                    self.defined(15, c, Some("context"))?
                };
                Ok((ctx, *code))
            }
            ExprKind::MethodContext { base, location, .. } => {
                let ctx = self.expression(*base)?;
                self.defined(16, ctx, Some("context"))?;
                let table = self.heap.slot(ctx, 0);
                self.defined(17, table, Some("method table"))?;
                let code = self
                    .heap
                    .slot(table, *location as usize)
                    .as_code()
                    .ok_or(Fault::EmptyStatement)?;
                Ok((ctx, code))
            }
            _ => {
                let arg = self.expression(fun)?;
                self.defined(18, arg, symbol)?;
                let code = self
                    .heap
                    .slot(arg, 2)
                    .as_code()
                    .ok_or(Fault::EmptyStatement)?;
                Ok((self.heap.slot(arg, 1), code))
            }
        }
    }

    /// Builds the activation for a call and fills its argument slots,
    /// keeping every live cell rooted across allocations. The caller
    /// slot is read from the register after the allocation, which may
    /// have moved the running frame. A tail call stores the caller's
    /// caller instead, so returning skips the spliced frame.
    fn build_activation(
        &mut self,
        context: Value,
        args: &[ExprId],
        tail: bool,
    ) -> Result<Value, Fault> {
        self.heap.push_root(context);
        let frame = self.heap.alloc(args.len() + 4)?;
        let context = self.heap.pop_root();
        self.heap.set_slot(frame, 1, context);
        let cc = self.heap.current_context;
        let caller = if tail { self.heap.slot(cc, 2) } else { cc };
        self.heap.set_slot(frame, 2, caller);
        let mut frame = frame;
        for (i, &a) in args.iter().enumerate() {
            self.heap.push_root(frame);
            let v = self.expression(a)?;
            frame = self.heap.pop_root();
            self.heap.set_slot(frame, 4 + i, v);
        }
        Ok(frame)
    }

    fn function_call(
        &mut self,
        target: ExprId,
        args: &[ExprId],
        symbol: Option<&str>,
    ) -> Result<Value, Fault> {
        let (context, code) = self.call_target(target, symbol)?;
        let frame = self.build_activation(context, args, false)?;
        trace!(
            target: "leda::functions",
            function = symbol.unwrap_or("?"),
            "call"
        );
        self.heap.current_context = frame;
        let result = self.statement(code)?;
        let cc = self.heap.current_context;
        self.heap.current_context = self.heap.slot(cc, 2);
        trace!(
            target: "leda::functions",
            function = symbol.unwrap_or("?"),
            "return"
        );
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// The statement loop. Tail calls swap the active statement and the
    /// current context instead of recursing, so self-recursive loops run
    /// in constant stack.
    pub(crate) fn statement(&mut self, first: StmtId) -> Result<Value, Fault> {
        if self.heap.root_depth() >= ROOT_STACK_LIMIT {
            return Err(Fault::RootStackOverflow {
                file: self.file.clone(),
                line: self.line,
            });
        }
        let program = self.program;
        let mut current = Some(first);
        while let Some(id) = current {
            let st = program.stmt(id);
            self.file = st.file.clone();
            self.line = st.line;
            match &st.kind {
                StmtKind::MakeLocals { size } => {
                    let locals = if *size > 0 {
                        self.heap.alloc(*size as usize)?
                    } else {
                        Value::NIL
                    };
                    let cc = self.heap.current_context;
                    self.heap.set_slot(cc, 3, locals);
                    trace!(target: "leda::statements", size = *size, "make locals");
                    current = st.next;
                }

                StmtKind::Expression(e) => {
                    trace!(
                        target: "leda::statements",
                        file = %st.file, line = st.line,
                        "expression statement"
                    );
                    let v = self.expression(*e)?;
                    if !v.is_nil() {
                        return Err(Fault::NonEmptyExpressionStatement {
                            file: self.file.clone(),
                            line: self.line,
                        });
                    }
                    current = st.next;
                }

                StmtKind::Return(e) => {
                    trace!(
                        target: "leda::statements",
                        file = %st.file, line = st.line,
                        "return statement"
                    );
                    return match e {
                        Some(e) => self.expression(*e),
                        None => Ok(Value::NIL),
                    };
                }

                StmtKind::TailCall(e) => {
                    let ExprKind::Call {
                        target,
                        args,
                        symbol,
                    } = &program.expr(*e).kind
                    else {
                        return Err(Fault::EmptyStatement);
                    };
                    let (context, code) = self.call_target(*target, symbol.as_deref())?;
                    // Splice: the new frame returns to the caller's
                    // caller, and the loop continues in the callee.
                    let frame = self.build_activation(context, args, true)?;
                    trace!(
                        target: "leda::functions",
                        function = symbol.as_deref().unwrap_or("?"),
                        "tail call"
                    );
                    self.heap.current_context = frame;
                    current = Some(code);
                }

                StmtKind::Conditional {
                    condition,
                    false_part,
                } => {
                    trace!(
                        target: "leda::statements",
                        file = %st.file, line = st.line,
                        "conditional statement"
                    );
                    let v = self.expression(*condition)?;
                    // Anything that is not the true object is false.
                    current = if v == self.builtins.true_object {
                        st.next
                    } else {
                        *false_part
                    };
                }

                StmtKind::Null => current = st.next,
            }
        }
        Ok(Value::NIL)
    }

    // ------------------------------------------------------------------
    // Primitive dispatch
    // ------------------------------------------------------------------

    /// Evaluates two arguments keeping the first rooted across the
    /// second.
    fn eval_pair(&mut self, args: &[ExprId]) -> Result<(Value, Value), Fault> {
        let a = self.expression(args[0])?;
        self.heap.push_root(a);
        let b = self.expression(args[1])?;
        let a = self.heap.pop_root();
        Ok((a, b))
    }

    fn int_pair(&mut self, args: &[ExprId]) -> Result<(i64, i64), Fault> {
        let (a, b) = self.eval_pair(args)?;
        Ok((self.int_val(a), self.int_val(b)))
    }

    /// Reals are unboxed before the second operand is evaluated, so no
    /// rooting is needed.
    fn real_pair(&mut self, args: &[ExprId]) -> Result<(f32, f32), Fault> {
        let a = self.expression(args[0])?;
        let r1 = self.real_val(a);
        let b = self.expression(args[1])?;
        Ok((r1, self.real_val(b)))
    }

    fn checked_slot(&self, v: Value, index: i64) -> Result<usize, Fault> {
        if index < 0 || index as usize > self.heap.len(v) {
            return Err(Fault::BadSubscript {
                index,
                file: self.file.clone(),
                line: self.line,
            });
        }
        Ok(index as usize)
    }

    fn special(&mut self, p: Primitive, args: &[ExprId]) -> Result<Value, Fault> {
        use Primitive::*;

        match p {
            ObjectEquals => {
                let (a, b) = self.eval_pair(args)?;
                Ok(self.boolean(a == b))
            }
            StringCompare => {
                let (a, b) = self.eval_pair(args)?;
                let ord = self.string_val(a).cmp(self.string_val(b)) as i64;
                self.new_integer(ord)
            }
            StringPrint => {
                let v = self.expression(args[0])?;
                print!("{}", self.string_val(v));
                Ok(Value::NIL)
            }
            StringConcat => {
                let (a, b) = self.eval_pair(args)?;
                let mut buffer = String::from(self.string_val(a));
                buffer.push_str(self.string_val(b));
                self.new_string(buffer)
            }
            IntegerEquals => {
                let (a, b) = self.int_pair(args)?;
                Ok(self.boolean(a == b))
            }
            IntegerPlus => {
                let (a, b) = self.int_pair(args)?;
                self.new_integer(a.wrapping_add(b))
            }
            IntegerMinus => {
                let (a, b) = self.int_pair(args)?;
                self.new_integer(a.wrapping_sub(b))
            }
            IntegerTimes => {
                let (a, b) = self.int_pair(args)?;
                self.new_integer(a.wrapping_mul(b))
            }
            IntegerDivide => {
                let (a, b) = self.int_pair(args)?;
                self.new_integer(a.wrapping_div(b))
            }
            IntegerAsString => {
                let v = self.expression(args[0])?;
                let text = self.int_val(v).to_string();
                self.new_string(text)
            }
            IntegerLess => {
                let (a, b) = self.int_pair(args)?;
                Ok(self.boolean(a < b))
            }
            IntegerOr => {
                let (a, b) = self.int_pair(args)?;
                self.new_integer(a | b)
            }
            IntegerAnd => {
                let (a, b) = self.int_pair(args)?;
                self.new_integer(a & b)
            }
            IntegerNot => {
                let v = self.expression(args[0])?;
                let i = self.int_val(v);
                self.new_integer(!i)
            }
            IntegerAsReal => {
                let v = self.expression(args[0])?;
                let i = self.int_val(v);
                self.new_real(i as f32)
            }
            ObjectAllocate => {
                let a = self.expression(args[0])?;
                let size = self.int_val(a);
                let slot_count = self.checked_slot_count(size)?;
                let mut result = self.heap.alloc(slot_count)?;
                for (i, &arg) in args[1..].iter().enumerate() {
                    self.heap.push_root(result);
                    let v = self.expression(arg)?;
                    result = self.heap.pop_root();
                    self.heap.set_slot(result, i, v);
                }
                Ok(result)
            }
            ObjectAt => {
                let a = self.expression(args[0])?;
                self.heap.push_root(a);
                self.defined(1, a, Some("subscript base"))?;
                let b = self.expression(args[1])?;
                self.defined(2, b, Some("subscript index"))?;
                let a = self.heap.pop_root();
                let i = self.checked_slot(a, self.int_val(b))?;
                Ok(self.heap.slot(a, i))
            }
            ObjectAtPut => {
                let a = self.expression(args[0])?;
                self.defined(3, a, Some("subscript base"))?;
                self.heap.push_root(a);
                let b = self.expression(args[1])?;
                self.defined(4, b, Some("subscript index"))?;
                self.heap.push_root(b);
                let c = self.expression(args[2])?;
                let b = self.heap.pop_root();
                let a = self.heap.pop_root();
                let i = self.checked_slot(a, self.int_val(b))?;
                self.heap.set_slot(a, i, c);
                Ok(Value::NIL)
            }
            ObjectCast => self.expression(args[0]),
            StringLength => {
                let v = self.expression(args[0])?;
                self.defined(5, v, Some("string length"))?;
                let len = self.string_val(v).len() as i64;
                self.new_integer(len)
            }
            StringSubstring => {
                let a = self.expression(args[0])?;
                self.heap.push_root(a);
                self.defined(6, a, Some("substring base"))?;
                let b = self.expression(args[1])?;
                self.heap.push_root(b);
                self.defined(7, b, Some("substring start"))?;
                let c = self.expression(args[2])?;
                self.defined(8, c, Some("substring length"))?;
                let b = self.heap.pop_root();
                let a = self.heap.pop_root();
                let start = self.int_val(b).max(0) as usize;
                let count = self.int_val(c).max(0) as usize;
                let bytes = self.string_val(a).as_bytes();
                let start = start.min(bytes.len());
                let end = (start + count).min(bytes.len());
                let text = String::from_utf8_lossy(&bytes[start..end]).into_owned();
                self.new_string(text)
            }
            StdinRead => {
                let mut buffer = String::new();
                let n = std::io::stdin()
                    .lock()
                    .read_line(&mut buffer)
                    .unwrap_or(0);
                if n == 0 {
                    Ok(Value::NIL)
                } else {
                    self.new_string(buffer)
                }
            }
            ObjectDefined => {
                let v = self.expression(args[0])?;
                Ok(self.boolean(!v.is_nil()))
            }
            RealAsString => {
                let v = self.expression(args[0])?;
                let text = format!("{}", self.real_val(v));
                self.new_string(text)
            }
            RealPlus => {
                let (a, b) = self.real_pair(args)?;
                self.new_real(a + b)
            }
            RealMinus => {
                let (a, b) = self.real_pair(args)?;
                self.new_real(a - b)
            }
            RealTimes => {
                let (a, b) = self.real_pair(args)?;
                self.new_real(a * b)
            }
            RealDivide => {
                let (a, b) = self.real_pair(args)?;
                self.new_real(a / b)
            }
            RealLess => {
                let (a, b) = self.real_pair(args)?;
                Ok(self.boolean(a < b))
            }
            RealAsInteger => {
                let v = self.expression(args[0])?;
                let r = self.real_val(v);
                self.new_integer(r as i64)
            }
            RealEquals => {
                let (a, b) = self.real_pair(args)?;
                Ok(self.boolean(a == b))
            }
        }
    }

    fn checked_slot_count(&self, size: i64) -> Result<usize, Fault> {
        if size < 0 {
            return Err(Fault::BadSubscript {
                index: size,
                file: self.file.clone(),
                line: self.line,
            });
        }
        Ok(size as usize)
    }
}
