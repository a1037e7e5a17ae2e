use leda::symbols::{ArgumentDecl, Form, ScopeId, SymbolId, SymbolKind};
use leda::types::{Type, TypeId};
use leda::{boot, CompileError, Compiler, Heap, Interpreter, StmtId, Value};

fn decl(name: &str, ty: TypeId, form: Form) -> ArgumentDecl {
    ArgumentDecl {
        name: name.into(),
        ty,
        form,
    }
}

fn class_scope(c: &Compiler, ty: TypeId) -> ScopeId {
    match *c.ty(ty) {
        Type::Class {
            symbols: Some(s), ..
        } => s,
        _ => panic!("class has no member table"),
    }
}

/// A tiny standard prelude, playing the role the parser and the library
/// prelude play in the full system: bodies for the built-in classes,
/// integer operators, and a print function.
struct Env {
    c: Compiler,
    heap: Heap,
}

impl Env {
    fn new() -> Env {
        let mut c = Compiler::new();
        let mut heap = Heap::default();
        let globals = c.globals();

        let object = c.known.object;
        // The root class is its own parent and carries the two header
        // fields every instance starts with, so user fields begin at
        // slot 2.
        let obj_sym = c.new_class_symbol(globals, "object").unwrap();
        c.fill_in_parent(object, object, &[]).unwrap();
        let oscope = class_scope(&c, object);
        c.add_variable(oscope, "Leda_theClass", c.known.metaclass)
            .unwrap();
        c.add_variable(oscope, "Leda_context", object).unwrap();
        boot::build_class_table(&mut c, &mut heap, obj_sym).unwrap();

        for (name, ty, parent) in [
            ("Class", c.known.metaclass, object),
            ("boolean", c.known.boolean, object),
            ("integer", c.known.integer, object),
            ("real", c.known.real, object),
            ("string", c.known.string, object),
            ("True", c.known.truth, c.known.boolean),
            ("False", c.known.falsity, c.known.boolean),
            ("Leda_undefined", c.known.undefined, object),
        ] {
            let sym = c.new_class_symbol(globals, name).unwrap();
            c.fill_in_parent(ty, parent, &[]).unwrap();
            boot::build_class_table(&mut c, &mut heap, sym).unwrap();
        }

        let mut env = Env { c, heap };
        let int = env.c.known.integer;
        let boolean = env.c.known.boolean;
        env.binary_fn("plus", "Leda_integer_plus", int, int);
        env.binary_fn("minus", "Leda_integer_minus", int, int);
        env.binary_fn("times", "Leda_integer_times", int, int);
        env.binary_fn("less", "Leda_integer_less", int, boolean);
        env.less_equal_fn();
        env.print_fn();
        env
    }

    fn globals(&self) -> ScopeId {
        self.c.globals()
    }

    /// `function <name>(a: integer, b: integer): <rt> { return <prim>(a, b) }`
    fn binary_fn(&mut self, name: &str, primitive: &str, arg_ty: TypeId, rt: TypeId) {
        let c = &mut self.c;
        let globals = c.globals();
        let ns = c.add_function_symbol(globals, name, &[]).unwrap();
        let args = [
            decl("a", arg_ty, Form::ByValue),
            decl("b", arg_ty, Form::ByValue),
        ];
        c.add_function_arguments(ns, &args, Some(rt)).unwrap();
        let a = c.lookup_identifier(ns, "a").unwrap();
        let b = c.lookup_identifier(ns, "b").unwrap();
        let call = c.primitive_call(primitive, vec![a, b], Some(rt)).unwrap();
        let ret = c.return_statement(ns, Some(call)).unwrap();
        let body = c.scope_body(ns, ret).unwrap();
        c.attach_function_body(ns, body).unwrap();
    }

    /// `function lessEqual(a, b): boolean { return less(a, plus(b, 1)) }`
    fn less_equal_fn(&mut self) {
        let c = &mut self.c;
        let globals = c.globals();
        let int = c.known.integer;
        let boolean = c.known.boolean;
        let ns = c.add_function_symbol(globals, "lessEqual", &[]).unwrap();
        let args = [decl("a", int, Form::ByValue), decl("b", int, Form::ByValue)];
        c.add_function_arguments(ns, &args, Some(boolean)).unwrap();
        let a = c.lookup_identifier(ns, "a").unwrap();
        let b = c.lookup_identifier(ns, "b").unwrap();
        let one = c.integer_literal(1);
        let bump = c
            .primitive_call("Leda_integer_plus", vec![b, one], Some(int))
            .unwrap();
        let test = c
            .primitive_call("Leda_integer_less", vec![a, bump], Some(boolean))
            .unwrap();
        let ret = c.return_statement(ns, Some(test)).unwrap();
        let body = c.scope_body(ns, ret).unwrap();
        c.attach_function_body(ns, body).unwrap();
    }

    /// `function print(s: string) { Leda_string_print(s) }`
    fn print_fn(&mut self) {
        let c = &mut self.c;
        let globals = c.globals();
        let string = c.known.string;
        let ns = c.add_function_symbol(globals, "print", &[]).unwrap();
        let args = [decl("s", string, Form::ByValue)];
        c.add_function_arguments(ns, &args, None).unwrap();
        let s = c.lookup_identifier(ns, "s").unwrap();
        let call = c.primitive_call("Leda_string_print", vec![s], None).unwrap();
        let st = c.expression_statement(call).unwrap();
        let body = c.scope_body(ns, st).unwrap();
        c.attach_function_body(ns, body).unwrap();
    }

    fn class(&mut self, name: &str, parent: TypeId) -> (SymbolId, TypeId, ScopeId) {
        let globals = self.globals();
        let sym = self.c.new_class_symbol(globals, name).unwrap();
        let SymbolKind::ClassDef { ty, .. } = self.c.sym(sym).kind else {
            panic!("{name} is not a class definition");
        };
        self.c.fill_in_parent(ty, parent, &[]).unwrap();
        (sym, ty, class_scope(&self.c, ty))
    }

    /// Runs a top-level statement chain; the compiler is leaked so the
    /// interpreter can be handed back for inspection.
    fn run(self, first: StmtId) -> RunResult {
        let Env { c, heap } = self;
        let program: &'static Compiler = Box::leak(Box::new(c));
        let mut interp = Interpreter::new(program, heap);
        interp.run(first).unwrap();
        RunResult { program, interp }
    }
}

struct RunResult {
    program: &'static Compiler,
    interp: Interpreter<'static>,
}

impl RunResult {
    fn global(&self, name: &str) -> Value {
        let c = self.program;
        let s = c.lookup_local(c.globals(), name).expect("global exists");
        let SymbolKind::Var { location, .. } = c.sym(s).kind else {
            panic!("{name} is not a variable");
        };
        let g = self.interp.heap.global_context;
        self.interp.heap.slot(g, location as usize)
    }

    fn global_int(&self, name: &str) -> i64 {
        let v = self.global(name);
        self.interp.heap.raw(v, 2) as i64
    }

    fn global_str(&self, name: &str) -> &str {
        let v = self.global(name);
        self.interp.heap.string(self.interp.heap.raw(v, 2))
    }
}

// ----------------------------------------------------------------------
// S1: arithmetic through operator lookup and primitives
// ----------------------------------------------------------------------

#[test]
fn arithmetic_prints_twenty() {
    let mut env = Env::new();
    let globals = env.globals();
    let string = env.c.known.string;
    env.c.add_variable(globals, "result", string).unwrap();

    let two = env.c.integer_literal(2);
    let three = env.c.integer_literal(3);
    let four = env.c.integer_literal(4);
    let sum = env.c.binary_operator(globals, "plus", two, three).unwrap();
    let product = env.c.binary_operator(globals, "times", sum, four).unwrap();
    let text = env
        .c
        .primitive_call("Leda_integer_asString", vec![product], Some(string))
        .unwrap();
    let target = env.c.lookup_identifier(globals, "result").unwrap();
    let st = env.c.assignment_statement(target, text).unwrap();

    let printer = env.c.lookup_identifier(globals, "print").unwrap();
    let shown = env.c.lookup_identifier(globals, "result").unwrap();
    let pcall = env.c.call(globals, printer, vec![shown], false).unwrap();
    let st2 = env.c.expression_statement(pcall).unwrap();
    env.c.set_next(st, st2);

    let run = env.run(st);
    assert_eq!("20", run.global_str("result"));
}

// ----------------------------------------------------------------------
// S2: a class with a field and a method
// ----------------------------------------------------------------------

#[test]
fn class_with_method() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;

    let (cell_sym, cell_ty, cell_scope) = env.class("Cell", env.c.known.object);
    env.c.add_variable(cell_scope, "x", int).unwrap();

    // method bump(): integer { return x plus 1 }
    let ms = env.c.add_function_symbol(cell_scope, "bump", &[]).unwrap();
    env.c.add_function_arguments(ms, &[], Some(int)).unwrap();
    let x = env.c.lookup_identifier(ms, "x").unwrap();
    let one = env.c.integer_literal(1);
    let bumped = env.c.binary_operator(ms, "plus", x, one).unwrap();
    let ret = env.c.return_statement(ms, Some(bumped)).unwrap();
    let body = env.c.scope_body(ms, ret).unwrap();
    env.c.attach_function_body(ms, body).unwrap();
    boot::build_class_table(&mut env.c, &mut env.heap, cell_sym).unwrap();

    env.c.add_variable(globals, "result", int).unwrap();
    let ctor = env.c.lookup_identifier(globals, "Cell").unwrap();
    let fortyone = env.c.integer_literal(41);
    let instance = env.c.call(globals, ctor, vec![fortyone], true).unwrap();
    let method = env
        .c
        .lookup_field(instance, cell_ty, "bump")
        .unwrap()
        .expect("method found");
    let call = env.c.call(globals, method, vec![], true).unwrap();
    let target = env.c.lookup_identifier(globals, "result").unwrap();
    let st = env.c.assignment_statement(target, call).unwrap();

    let run = env.run(st);
    assert_eq!(42, run.global_int("result"));
}

// ----------------------------------------------------------------------
// S3: inheritance and override dispatch through the static table
// ----------------------------------------------------------------------

#[test]
fn override_dispatches_dynamically() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;

    let (a_sym, a_ty, a_scope) = env.class("A", env.c.known.object);
    let ms = env.c.add_function_symbol(a_scope, "f", &[]).unwrap();
    env.c.add_function_arguments(ms, &[], Some(int)).unwrap();
    let one = env.c.integer_literal(1);
    let ret = env.c.return_statement(ms, Some(one)).unwrap();
    let body = env.c.scope_body(ms, ret).unwrap();
    env.c.attach_function_body(ms, body).unwrap();
    boot::build_class_table(&mut env.c, &mut env.heap, a_sym).unwrap();

    let (b_sym, _b_ty, b_scope) = env.class("B", a_ty);
    let ms = env.c.add_function_symbol(b_scope, "f", &[]).unwrap();
    env.c.add_function_arguments(ms, &[], Some(int)).unwrap();
    let two = env.c.integer_literal(2);
    let ret = env.c.return_statement(ms, Some(two)).unwrap();
    let body = env.c.scope_body(ms, ret).unwrap();
    env.c.attach_function_body(ms, body).unwrap();
    boot::build_class_table(&mut env.c, &mut env.heap, b_sym).unwrap();

    // var a: A := B(); result := a.f()
    env.c.add_variable(globals, "va", a_ty).unwrap();
    env.c.add_variable(globals, "result", int).unwrap();
    let ctor = env.c.lookup_identifier(globals, "B").unwrap();
    let instance = env.c.call(globals, ctor, vec![], true).unwrap();
    let target = env.c.lookup_identifier(globals, "va").unwrap();
    let st1 = env.c.assignment_statement(target, instance).unwrap();

    let through_a = env.c.lookup_identifier(globals, "va").unwrap();
    let method = env
        .c
        .lookup_field(through_a, a_ty, "f")
        .unwrap()
        .expect("method found");
    let call = env.c.call(globals, method, vec![], true).unwrap();
    let target = env.c.lookup_identifier(globals, "result").unwrap();
    let st2 = env.c.assignment_statement(target, call).unwrap();
    env.c.set_next(st1, st2);

    let run = env.run(st1);
    assert_eq!(2, run.global_int("result"));
}

// ----------------------------------------------------------------------
// S4: deep tail recursion runs in constant stack
// ----------------------------------------------------------------------

#[test]
fn tail_recursion_is_constant_stack() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;
    let boolean = env.c.known.boolean;

    // function countdown(n: integer): integer {
    //     if less(0, n) { n := minus(n, 1); return countdown(n); }
    //     return 0;
    // }
    let ns = env.c.add_function_symbol(globals, "countdown", &[]).unwrap();
    let args = [decl("n", int, Form::ByValue)];
    env.c.add_function_arguments(ns, &args, Some(int)).unwrap();

    let zero = env.c.integer_literal(0);
    let n = env.c.lookup_identifier(ns, "n").unwrap();
    let cond = env
        .c
        .primitive_call("Leda_integer_less", vec![zero, n], Some(boolean))
        .unwrap();

    let n2 = env.c.lookup_identifier(ns, "n").unwrap();
    let one = env.c.integer_literal(1);
    let less_one = env
        .c
        .primitive_call("Leda_integer_minus", vec![n2, one], Some(int))
        .unwrap();
    let target = env.c.lookup_identifier(ns, "n").unwrap();
    let dec = env.c.assignment_statement(target, less_one).unwrap();

    let callee = env.c.lookup_identifier(ns, "countdown").unwrap();
    let arg = env.c.lookup_identifier(ns, "n").unwrap();
    let recurse = env.c.call(ns, callee, vec![arg], true).unwrap();
    let tail = env.c.return_statement(ns, Some(recurse)).unwrap();
    env.c.set_next(dec, tail);

    let zero2 = env.c.integer_literal(0);
    let base = env.c.return_statement(ns, Some(zero2)).unwrap();
    let cond_stmt = env
        .c
        .conditional_statement(1, cond, dec, tail, None, base);
    let body = env.c.scope_body(ns, cond_stmt).unwrap();
    env.c.attach_function_body(ns, body).unwrap();

    env.c.add_variable(globals, "result", int).unwrap();
    let callee = env.c.lookup_identifier(globals, "countdown").unwrap();
    let big = env.c.integer_literal(100_000);
    let call = env.c.call(globals, callee, vec![big], true).unwrap();
    let target = env.c.lookup_identifier(globals, "result").unwrap();
    let st = env.c.assignment_statement(target, call).unwrap();

    let run = env.run(st);
    assert_eq!(0, run.global_int("result"));
}

// ----------------------------------------------------------------------
// S5: by-name parameters evaluate only when forced
// ----------------------------------------------------------------------

#[test]
fn by_name_argument_is_lazy() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;
    let boolean = env.c.known.boolean;

    env.c.add_variable(globals, "counter", int).unwrap();

    // function bump(): integer { counter := plus(counter, 1); return counter }
    let bs = env.c.add_function_symbol(globals, "bump", &[]).unwrap();
    env.c.add_function_arguments(bs, &[], Some(int)).unwrap();
    let cur = env.c.lookup_identifier(bs, "counter").unwrap();
    let one = env.c.integer_literal(1);
    let more = env
        .c
        .primitive_call("Leda_integer_plus", vec![cur, one], Some(int))
        .unwrap();
    let target = env.c.lookup_identifier(bs, "counter").unwrap();
    let st = env.c.assignment_statement(target, more).unwrap();
    let back = env.c.lookup_identifier(bs, "counter").unwrap();
    let ret = env.c.return_statement(bs, Some(back)).unwrap();
    env.c.set_next(st, ret);
    let body = env.c.scope_body(bs, st).unwrap();
    env.c.attach_function_body(bs, body).unwrap();

    // function ifTrue(c: boolean, v: byName integer): integer {
    //     if c { return v; }
    //     return 0;
    // }
    let fs = env.c.add_function_symbol(globals, "ifTrue", &[]).unwrap();
    let args = [
        decl("c", boolean, Form::ByValue),
        decl("v", int, Form::ByName),
    ];
    env.c.add_function_arguments(fs, &args, Some(int)).unwrap();
    let cexpr = env.c.lookup_identifier(fs, "c").unwrap();
    let forced = env.c.lookup_identifier(fs, "v").unwrap();
    let ret_v = env.c.return_statement(fs, Some(forced)).unwrap();
    let zero = env.c.integer_literal(0);
    let ret_0 = env.c.return_statement(fs, Some(zero)).unwrap();
    let cond = env
        .c
        .conditional_statement(1, cexpr, ret_v, ret_v, None, ret_0);
    let body = env.c.scope_body(fs, cond).unwrap();
    env.c.attach_function_body(fs, body).unwrap();

    // r1 := ifTrue(true, bump()); r2 := ifTrue(false, bump())
    env.c.add_variable(globals, "r1", int).unwrap();
    env.c.add_variable(globals, "r2", int).unwrap();

    let callee = env.c.lookup_identifier(globals, "ifTrue").unwrap();
    let t = env.c.lookup_identifier(globals, "true").unwrap();
    let bump1 = env.c.lookup_identifier(globals, "bump").unwrap();
    let effect1 = env.c.call(globals, bump1, vec![], true).unwrap();
    let call1 = env.c.call(globals, callee, vec![t, effect1], true).unwrap();
    let target = env.c.lookup_identifier(globals, "r1").unwrap();
    let st1 = env.c.assignment_statement(target, call1).unwrap();

    let callee = env.c.lookup_identifier(globals, "ifTrue").unwrap();
    let f = env.c.lookup_identifier(globals, "false").unwrap();
    let bump2 = env.c.lookup_identifier(globals, "bump").unwrap();
    let effect2 = env.c.call(globals, bump2, vec![], true).unwrap();
    let call2 = env.c.call(globals, callee, vec![f, effect2], true).unwrap();
    let target = env.c.lookup_identifier(globals, "r2").unwrap();
    let st2 = env.c.assignment_statement(target, call2).unwrap();
    env.c.set_next(st1, st2);

    // Seed the counter before anything runs.
    let zero = env.c.integer_literal(0);
    let target = env.c.lookup_identifier(globals, "counter").unwrap();
    let st0 = env.c.assignment_statement(target, zero).unwrap();
    env.c.set_next(st0, st1);

    let run = env.run(st0);
    // The side effect ran exactly once, for the true branch.
    assert_eq!(1, run.global_int("counter"));
    assert_eq!(1, run.global_int("r1"));
    assert_eq!(0, run.global_int("r2"));
}

// ----------------------------------------------------------------------
// S6: pattern match binds fields on a class hit, not otherwise
// ----------------------------------------------------------------------

#[test]
fn pattern_match_binds_on_class_hit() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;
    let object = env.c.known.object;

    let (cons_sym, _cons_ty, cons_scope) = env.class("Cons", object);
    env.c.add_variable(cons_scope, "head", int).unwrap();
    env.c.add_variable(cons_scope, "tail", int).unwrap();
    boot::build_class_table(&mut env.c, &mut env.heap, cons_sym).unwrap();

    // function probe(x: object): integer {
    //     var h, t: integer;
    //     if x match Cons(h, t) { return h; }
    //     return minus(0, 1);
    // }
    let ns = env.c.add_function_symbol(globals, "probe", &[]).unwrap();
    let args = [decl("x", object, Form::ByValue)];
    env.c.add_function_arguments(ns, &args, Some(int)).unwrap();
    env.c.add_variable(ns, "h", int).unwrap();
    env.c.add_variable(ns, "t", int).unwrap();

    let x = env.c.lookup_identifier(ns, "x").unwrap();
    let cons = env.c.lookup_identifier(ns, "Cons").unwrap();
    let pm = env.c.pattern_match(ns, x, cons, &["h", "t"]).unwrap();

    let h = env.c.lookup_identifier(ns, "h").unwrap();
    let ret_h = env.c.return_statement(ns, Some(h)).unwrap();
    let neg = env.c.integer_literal(-1);
    let ret_neg = env.c.return_statement(ns, Some(neg)).unwrap();
    let cond = env.c.conditional_statement(1, pm, ret_h, ret_h, None, ret_neg);
    let body = env.c.scope_body(ns, cond).unwrap();
    env.c.attach_function_body(ns, body).unwrap();

    env.c.add_variable(globals, "hit", int).unwrap();
    env.c.add_variable(globals, "miss", int).unwrap();

    let callee = env.c.lookup_identifier(globals, "probe").unwrap();
    let ctor = env.c.lookup_identifier(globals, "Cons").unwrap();
    let seven = env.c.integer_literal(7);
    let nine = env.c.integer_literal(9);
    let pair = env.c.call(globals, ctor, vec![seven, nine], true).unwrap();
    let call = env.c.call(globals, callee, vec![pair], true).unwrap();
    let target = env.c.lookup_identifier(globals, "hit").unwrap();
    let st1 = env.c.assignment_statement(target, call).unwrap();

    let callee = env.c.lookup_identifier(globals, "probe").unwrap();
    let stray = env.c.integer_literal(42);
    let call = env.c.call(globals, callee, vec![stray], true).unwrap();
    let target = env.c.lookup_identifier(globals, "miss").unwrap();
    let st2 = env.c.assignment_statement(target, call).unwrap();
    env.c.set_next(st1, st2);

    let run = env.run(st1);
    assert_eq!(7, run.global_int("hit"));
    assert_eq!(-1, run.global_int("miss"));
}

// ----------------------------------------------------------------------
// Loop lowering and interning
// ----------------------------------------------------------------------

#[test]
fn while_loop_counts_to_five() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;

    env.c.add_variable(globals, "counter", int).unwrap();
    let zero = env.c.integer_literal(0);
    let target = env.c.lookup_identifier(globals, "counter").unwrap();
    let st0 = env.c.assignment_statement(target, zero).unwrap();

    let cur = env.c.lookup_identifier(globals, "counter").unwrap();
    let five = env.c.integer_literal(5);
    let cond = env.c.binary_operator(globals, "less", cur, five).unwrap();

    let cur = env.c.lookup_identifier(globals, "counter").unwrap();
    let one = env.c.integer_literal(1);
    let more = env.c.binary_operator(globals, "plus", cur, one).unwrap();
    let target = env.c.lookup_identifier(globals, "counter").unwrap();
    let bump = env.c.assignment_statement(target, more).unwrap();

    let done = env.c.null_statement();
    let w = env.c.while_statement(1, cond, bump, bump, done);
    env.c.set_next(st0, w);

    let run = env.run(st0);
    assert_eq!(5, run.global_int("counter"));
}

#[test]
fn arithmetic_for_sums_a_range() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;

    // Lowered loops need a function scope for their temporary.
    // function sum_to(limit: integer): integer {
    //     var total, i: integer;
    //     total := 0;
    //     for i := 1 to limit { total := plus(total, i) }
    //     return total;
    // }
    let ns = env.c.add_function_symbol(globals, "sum_to", &[]).unwrap();
    let args = [decl("limit", int, Form::ByValue)];
    env.c.add_function_arguments(ns, &args, Some(int)).unwrap();
    env.c.add_variable(ns, "total", int).unwrap();
    env.c.add_variable(ns, "i", int).unwrap();

    let zero = env.c.integer_literal(0);
    let target = env.c.lookup_identifier(ns, "total").unwrap();
    let st0 = env.c.assignment_statement(target, zero).unwrap();

    let total = env.c.lookup_identifier(ns, "total").unwrap();
    let i = env.c.lookup_identifier(ns, "i").unwrap();
    let more = env.c.binary_operator(ns, "plus", total, i).unwrap();
    let target = env.c.lookup_identifier(ns, "total").unwrap();
    let add = env.c.assignment_statement(target, more).unwrap();

    let loop_target = env.c.lookup_identifier(ns, "i").unwrap();
    let start = env.c.integer_literal(1);
    let limit = env.c.lookup_identifier(ns, "limit").unwrap();
    let done = env.c.null_statement();
    let f = env
        .c
        .arithmetic_for(2, ns, loop_target, start, limit, add, add, done)
        .unwrap();
    env.c.set_next(st0, f);

    let total = env.c.lookup_identifier(ns, "total").unwrap();
    let ret = env.c.return_statement(ns, Some(total)).unwrap();
    env.c.set_next(done, ret);

    let body = env.c.scope_body(ns, st0).unwrap();
    env.c.attach_function_body(ns, body).unwrap();

    env.c.add_variable(globals, "result", int).unwrap();
    let callee = env.c.lookup_identifier(globals, "sum_to").unwrap();
    let ten = env.c.integer_literal(10);
    let call = env.c.call(globals, callee, vec![ten], true).unwrap();
    let target = env.c.lookup_identifier(globals, "result").unwrap();
    let st = env.c.assignment_statement(target, call).unwrap();

    let run = env.run(st);
    assert_eq!(55, run.global_int("result"));
}

#[test]
fn small_integers_are_interned() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;

    env.c.add_variable(globals, "a", int).unwrap();
    env.c.add_variable(globals, "b", int).unwrap();
    let five1 = env.c.integer_literal(5);
    let target = env.c.lookup_identifier(globals, "a").unwrap();
    let st1 = env.c.assignment_statement(target, five1).unwrap();
    let five2 = env.c.integer_literal(5);
    let target = env.c.lookup_identifier(globals, "b").unwrap();
    let st2 = env.c.assignment_statement(target, five2).unwrap();
    env.c.set_next(st1, st2);

    let run = env.run(st1);
    // Same interned cell, not merely the same numeric value.
    assert_eq!(run.global("a"), run.global("b"));
}

// ----------------------------------------------------------------------
// Relations: returning a relation where a boolean is declared inserts
// the library conversion
// ----------------------------------------------------------------------

#[test]
fn relation_results_coerce_to_boolean() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;
    let boolean = env.c.known.boolean;
    let relation = env.c.known.relation;

    // function relationAsBoolean(r: relation): boolean { return true }
    let ns = env
        .c
        .add_function_symbol(globals, "relationAsBoolean", &[])
        .unwrap();
    let args = [decl("r", relation, Form::ByValue)];
    env.c.add_function_arguments(ns, &args, Some(boolean)).unwrap();
    let t = env.c.lookup_identifier(ns, "true").unwrap();
    let ret = env.c.return_statement(ns, Some(t)).unwrap();
    let body = env.c.scope_body(ns, ret).unwrap();
    env.c.attach_function_body(ns, body).unwrap();

    // var r: relation := fn(future: relation): boolean { return true }
    let fe = env.c.function_expression(
        globals,
        &[decl("future", relation, Form::ByValue)],
        Some(boolean),
    );
    let t = env.c.lookup_identifier(fe, "true").unwrap();
    let ret = env.c.return_statement(fe, Some(t)).unwrap();
    let fbody = env.c.scope_body(fe, ret).unwrap();
    let lit = env.c.function_literal(fe, fbody).unwrap();
    env.c.add_variable(globals, "r", relation).unwrap();
    let target = env.c.lookup_identifier(globals, "r").unwrap();
    let st0 = env.c.assignment_statement(target, lit).unwrap();

    // function check(): boolean { return r }
    let cs = env.c.add_function_symbol(globals, "check", &[]).unwrap();
    env.c.add_function_arguments(cs, &[], Some(boolean)).unwrap();
    let r = env.c.lookup_identifier(cs, "r").unwrap();
    let ret = env.c.return_statement(cs, Some(r)).unwrap();
    let body = env.c.scope_body(cs, ret).unwrap();
    env.c.attach_function_body(cs, body).unwrap();

    // if check() { hit := 1 } else { hit := 2 }
    env.c.add_variable(globals, "hit", int).unwrap();
    let callee = env.c.lookup_identifier(globals, "check").unwrap();
    let call = env.c.call(globals, callee, vec![], true).unwrap();
    let one = env.c.integer_literal(1);
    let target = env.c.lookup_identifier(globals, "hit").unwrap();
    let st_then = env.c.assignment_statement(target, one).unwrap();
    let two = env.c.integer_literal(2);
    let target = env.c.lookup_identifier(globals, "hit").unwrap();
    let st_else = env.c.assignment_statement(target, two).unwrap();
    let done = env.c.null_statement();
    let cond = env.c.conditional_statement(
        3,
        call,
        st_then,
        st_then,
        Some((st_else, st_else)),
        done,
    );
    env.c.set_next(st0, cond);

    let run = env.run(st0);
    assert_eq!(1, run.global_int("hit"));
}

// ----------------------------------------------------------------------
// Bootstrap invariants
// ----------------------------------------------------------------------

#[test]
fn static_tables_chain_to_their_parents() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;
    env.c.add_variable(globals, "unused", int).unwrap();
    let zero = env.c.integer_literal(0);
    let target = env.c.lookup_identifier(globals, "unused").unwrap();
    let st = env.c.assignment_statement(target, zero).unwrap();
    let run = env.run(st);

    let c = run.program;
    let heap = &run.interp.heap;
    for &s in &c.scope(c.globals()).symbols {
        let SymbolKind::ClassDef { ty, .. } = c.sym(s).kind else {
            continue;
        };
        let Some(t) = c.check_class(ty) else { continue };
        let Type::Class {
            static_table: Some(table),
            parent: Some(parent),
            ..
        } = *c.ty(t)
        else {
            continue;
        };
        let parent_table = c
            .check_class(parent)
            .and_then(|p| match *c.ty(p) {
                Type::Class { static_table, .. } => static_table,
                _ => None,
            })
            .expect("parent has a table");
        assert_eq!(parent_table, heap.slot(table, 4));
    }
}

// ----------------------------------------------------------------------
// Builder diagnostics
// ----------------------------------------------------------------------

#[test]
fn assignment_to_constant_is_rejected() {
    let mut env = Env::new();
    let globals = env.globals();
    let lit = env.c.integer_literal(3);
    env.c.add_constant(globals, "three", lit).unwrap();
    let target = env.c.lookup_identifier(globals, "three").unwrap();
    let four = env.c.integer_literal(4);
    let err: CompileError = env.c.assignment_statement(target, four).unwrap_err();
    assert!(format!("{err}").contains("constant"));
}

#[test]
fn unknown_identifier_is_reported_with_location() {
    let mut env = Env::new();
    env.c.set_location("prog.led", 12);
    let globals = env.globals();
    let err = env.c.lookup_identifier(globals, "nonesuch").unwrap_err();
    let text = format!("{err}");
    assert!(text.contains("prog.led"));
    assert!(text.contains("12"));
    assert!(text.contains("nonesuch"));
}

#[test]
fn call_arity_is_checked() {
    let mut env = Env::new();
    let globals = env.globals();
    let plus = env.c.lookup_identifier(globals, "plus").unwrap();
    let one = env.c.integer_literal(1);
    assert!(env.c.call(globals, plus, vec![one], true).is_err());
}

#[test]
fn pattern_targets_must_be_local() {
    let mut env = Env::new();
    let globals = env.globals();
    let int = env.c.known.integer;
    let object = env.c.known.object;
    let (cons_sym, _, cons_scope) = env.class("Pair", object);
    env.c.add_variable(cons_scope, "first", int).unwrap();
    boot::build_class_table(&mut env.c, &mut env.heap, cons_sym).unwrap();

    // A global target resolves to a global offset, not a local slot.
    env.c.add_variable(globals, "g", int).unwrap();
    let x = env.c.lookup_identifier(globals, "g").unwrap();
    let cls = env.c.lookup_identifier(globals, "Pair").unwrap();
    assert!(env.c.pattern_match(globals, x, cls, &["g"]).is_err());
}
