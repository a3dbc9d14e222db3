//! Tests for frames, calls, name resolution and builtins.

use std::rc::Rc;

use byterun::{
    Code, CodeBuilder, CollectStringPrint, DEFAULT_MAX_RECURSION_DEPTH, Environment, ExcType, Exception,
    LimitedTracker, Namespace, NoLimitTracker, NoPrint, Opcode, ResourceLimits, Runner, Value,
};
use pretty_assertions::assert_eq;

fn run(code: Code) -> Result<Value, Exception> {
    Runner::new(code).run(vec![], NoLimitTracker, &mut NoPrint)
}

/// Runs the code and returns everything it printed.
fn run_printed(code: Code) -> String {
    let mut print = CollectStringPrint::new();
    Runner::new(code)
        .run(vec![], NoLimitTracker, &mut print)
        .expect("should succeed");
    print.into_output()
}

/// Binds a function built from `code` to `name`, with `defaults` for its trailing parameters.
fn define_function(b: &mut CodeBuilder, name: &str, code: Code, defaults: &[Value]) {
    for default in defaults {
        b.load_const(default.clone());
    }
    b.load_const(Value::Code(Rc::new(code)));
    b.load_const(name);
    b.emit_arg(Opcode::MakeFunction, u16::try_from(defaults.len()).unwrap());
    b.emit_name(Opcode::StoreName, name);
}

/// `def add(a, b): return a + b`
fn add_function() -> Code {
    let mut f = CodeBuilder::new("add");
    f.add_param("a");
    f.add_param("b");
    f.emit_local(Opcode::LoadFast, "a");
    f.emit_local(Opcode::LoadFast, "b");
    f.emit(Opcode::BinaryAdd);
    f.emit(Opcode::ReturnValue);
    f.build()
}

#[test]
fn load_const_add_return() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(7));
    b.load_const(Value::Int(5));
    b.emit(Opcode::BinaryAdd);
    b.emit(Opcode::ReturnValue);

    assert_eq!(run(b.build()).unwrap(), Value::Int(12));
}

/// `a = 1; b = 2; a + b`: the root frame's locals are its globals.
#[test]
fn names_resolve_through_module_namespace() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(1));
    b.emit_name(Opcode::StoreName, "a");
    b.load_const(Value::Int(2));
    b.emit_name(Opcode::StoreName, "b");
    b.emit_name(Opcode::LoadName, "a");
    b.emit_name(Opcode::LoadName, "b");
    b.emit(Opcode::BinaryAdd);
    b.emit(Opcode::ReturnValue);

    let env = Environment::new();
    let result = Runner::new(b.build())
        .run_with_env(env.clone(), vec![], NoLimitTracker, &mut NoPrint)
        .unwrap();
    assert_eq!(result, Value::Int(3));
    assert_eq!(env.locals().get("a"), Some(Value::Int(1)));
    assert_eq!(env.locals().get("b"), Some(Value::Int(2)));
    assert!(env.locals().ptr_eq(env.globals()));
    assert_eq!(env.globals().get("__name__"), Some(Value::from("__main__")));
}

/// With separate mappings, `STORE_NAME` writes locals and `LOAD_NAME` falls back to globals.
#[test]
fn host_supplied_namespaces() {
    let globals: Namespace = [(Rc::from("g"), Value::Int(40))].into_iter().collect();
    let locals = Namespace::new();
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "g");
    b.load_const(Value::Int(2));
    b.emit(Opcode::BinaryAdd);
    b.emit_name(Opcode::StoreName, "answer");
    b.emit_name(Opcode::LoadName, "answer");
    b.emit(Opcode::ReturnValue);

    let env = Environment::with_namespaces(globals.clone(), locals.clone());
    let result = Runner::new(b.build())
        .run_with_env(env, vec![], NoLimitTracker, &mut NoPrint)
        .unwrap();
    assert_eq!(result, Value::Int(42));
    assert_eq!(locals.get("answer"), Some(Value::Int(42)));
    assert!(!globals.contains("answer"));
}

#[test]
fn function_call_binds_parameters_in_fresh_locals() {
    let mut b = CodeBuilder::new("<module>");
    define_function(&mut b, "add", add_function(), &[]);
    b.emit_name(Opcode::LoadName, "add");
    b.load_const(Value::Int(30));
    b.load_const(Value::Int(12));
    b.emit_arg(Opcode::CallFunction, 2);
    b.emit(Opcode::ReturnValue);

    let env = Environment::new();
    let result = Runner::new(b.build())
        .run_with_env(env.clone(), vec![], NoLimitTracker, &mut NoPrint)
        .unwrap();
    assert_eq!(result, Value::Int(42));
    // parameters live in the callee's locals only
    assert!(!env.globals().contains("a"));
}

#[test]
fn defaults_fill_missing_trailing_parameters() {
    let mut b = CodeBuilder::new("<module>");
    define_function(&mut b, "add", add_function(), &[Value::Int(10)]);
    b.emit_name(Opcode::LoadName, "add");
    b.load_const(Value::Int(1));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit_name(Opcode::LoadName, "add");
    b.load_const(Value::Int(1));
    b.load_const(Value::Int(2));
    b.emit_arg(Opcode::CallFunction, 2);
    b.emit_arg(Opcode::BuildTuple, 2);
    b.emit(Opcode::ReturnValue);

    assert_eq!(
        run(b.build()).unwrap(),
        Value::Tuple(vec![Value::Int(11), Value::Int(3)].into())
    );
}

/// ```python
/// def f(a, b):
///     global touched
///     touched = True
/// f(1)
/// ```
#[test]
fn argument_count_mismatch_fails_before_callee_runs() {
    let mut f = CodeBuilder::new("f");
    f.add_param("a");
    f.add_param("b");
    f.load_const(true);
    f.emit_name(Opcode::StoreGlobal, "touched");
    f.load_const(Value::None);
    f.emit(Opcode::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define_function(&mut b, "f", f.build(), &[]);
    b.emit_name(Opcode::LoadName, "f");
    b.load_const(Value::Int(1));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);

    let env = Environment::new();
    let err = Runner::new(b.build())
        .run_with_env(env.clone(), vec![], NoLimitTracker, &mut NoPrint)
        .unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ArgumentCountMismatch);
    assert_eq!(err.message(), Some("f() takes 2 positional arguments but 1 was given"));
    assert!(!env.globals().contains("touched"));
    assert!(err.exc_type().is_subclass_of(ExcType::TypeError));
}

/// Root-level arguments bind to the root code object's parameters.
#[test]
fn root_code_takes_arguments() {
    let runner = Runner::new(add_function());
    let result = runner
        .run(vec![Value::Int(2), Value::Int(3)], NoLimitTracker, &mut NoPrint)
        .unwrap();
    assert_eq!(result, Value::Int(5));

    let err = runner.run(vec![], NoLimitTracker, &mut NoPrint).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ArgumentCountMismatch);
}

/// Callee writes to globals are visible to the caller: both frames share one mapping.
#[test]
fn callee_shares_globals_with_caller() {
    let mut f = CodeBuilder::new("bump");
    f.emit_name(Opcode::LoadGlobal, "counter");
    f.load_const(Value::Int(1));
    f.emit(Opcode::BinaryAdd);
    f.emit_name(Opcode::StoreGlobal, "counter");
    f.load_const(Value::None);
    f.emit(Opcode::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(0));
    b.emit_name(Opcode::StoreName, "counter");
    define_function(&mut b, "bump", f.build(), &[]);
    for _ in 0..3 {
        b.emit_name(Opcode::LoadName, "bump");
        b.emit_arg(Opcode::CallFunction, 0);
        b.emit(Opcode::PopTop);
    }
    b.emit_name(Opcode::LoadName, "counter");
    b.emit(Opcode::ReturnValue);

    assert_eq!(run(b.build()).unwrap(), Value::Int(3));
}

/// ```python
/// def fact(n):
///     if n <= 1:
///         return 1
///     return n * fact(n - 1)
/// fact(10)
/// ```
fn factorial_program(n: i64) -> Code {
    let mut f = CodeBuilder::new("fact");
    f.add_param("n");
    f.emit_local(Opcode::LoadFast, "n");
    f.load_const(Value::Int(1));
    f.emit_arg(Opcode::CompareOp, byterun::CompareOp::Le as u16);
    let recurse = f.emit_jump(Opcode::PopJumpIfFalse);
    f.load_const(Value::Int(1));
    f.emit(Opcode::ReturnValue);
    f.patch_jump(recurse);
    f.emit_local(Opcode::LoadFast, "n");
    f.emit_name(Opcode::LoadGlobal, "fact");
    f.emit_local(Opcode::LoadFast, "n");
    f.load_const(Value::Int(1));
    f.emit(Opcode::BinarySubtract);
    f.emit_arg(Opcode::CallFunction, 1);
    f.emit(Opcode::BinaryMultiply);
    f.emit(Opcode::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define_function(&mut b, "fact", f.build(), &[]);
    b.emit_name(Opcode::LoadName, "fact");
    b.load_const(Value::Int(n));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    b.build()
}

#[test]
fn recursive_function() {
    assert_eq!(run(factorial_program(10)).unwrap(), Value::Int(3_628_800));
}

#[test]
fn recursion_limit_raises_recursion_error() {
    let limits = ResourceLimits::new().max_recursion_depth(Some(20));
    let err = Runner::new(factorial_program(50))
        .run(vec![], LimitedTracker::new(limits), &mut NoPrint)
        .unwrap_err();
    assert_eq!(err.exc_type(), ExcType::RecursionError);
    // every frame the exception left is recorded: 19 `fact` frames plus the module
    assert_eq!(err.traceback().frames().len(), 20);
    assert_eq!(&*err.traceback().frames()[19].code_name, "<module>");
}

/// `def f(): return f()`
fn runaway_function() -> Code {
    let mut f = CodeBuilder::new("f");
    f.emit_name(Opcode::LoadGlobal, "f");
    f.emit_arg(Opcode::CallFunction, 0);
    f.emit(Opcode::ReturnValue);
    f.build()
}

/// Calls run in the VM's own frame list, so the default cap is reached on an ordinary
/// test thread stack.
#[test]
fn unbounded_recursion_stops_at_the_default_depth() {
    let mut b = CodeBuilder::new("<module>");
    define_function(&mut b, "f", runaway_function(), &[]);
    b.emit_name(Opcode::LoadName, "f");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::ReturnValue);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::RecursionError);
    assert_eq!(err.message(), Some("maximum recursion depth (1000) exceeded"));
    assert_eq!(err.traceback().frames().len(), DEFAULT_MAX_RECURSION_DEPTH);
    assert_eq!(&*err.traceback().frames()[0].code_name, "f");
}

/// ```python
/// try:
///     f()
/// except:
///     return 'caught'
/// ```
#[test]
fn recursion_error_is_caught_by_the_outermost_caller() {
    let mut b = CodeBuilder::new("<module>");
    define_function(&mut b, "f", runaway_function(), &[]);
    let handler = b.emit_jump(Opcode::SetupExcept);
    b.emit_name(Opcode::LoadName, "f");
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::PopTop);
    b.emit(Opcode::PopBlock);
    b.load_const(Value::None);
    b.emit(Opcode::ReturnValue);
    b.patch_jump(handler);
    for _ in 0..3 {
        b.emit(Opcode::PopTop);
    }
    b.emit(Opcode::PopExcept);
    b.load_const("caught");
    b.emit(Opcode::ReturnValue);

    assert_eq!(run(b.build()).unwrap(), Value::from("caught"));
}

/// `def down(n): return down(n - 1) if n else 'bottom'`, called 900 levels deep.
#[test]
fn deep_recursion_below_the_cap_completes() {
    let mut f = CodeBuilder::new("down");
    f.add_param("n");
    f.emit_local(Opcode::LoadFast, "n");
    let bottom = f.emit_jump(Opcode::PopJumpIfFalse);
    f.emit_name(Opcode::LoadGlobal, "down");
    f.emit_local(Opcode::LoadFast, "n");
    f.load_const(Value::Int(1));
    f.emit(Opcode::BinarySubtract);
    f.emit_arg(Opcode::CallFunction, 1);
    f.emit(Opcode::ReturnValue);
    f.patch_jump(bottom);
    f.load_const("bottom");
    f.emit(Opcode::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    define_function(&mut b, "down", f.build(), &[]);
    b.emit_name(Opcode::LoadName, "down");
    b.load_const(Value::Int(900));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);

    assert_eq!(run(b.build()).unwrap(), Value::from("bottom"));
}

#[test]
fn factorial_overflow_is_an_overflow_error() {
    let err = run(factorial_program(25)).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::OverflowError);
    assert!(err.exc_type().is_subclass_of(ExcType::ArithmeticError));
}

#[test]
fn calling_a_non_callable_is_a_type_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(1));
    b.emit_arg(Opcode::CallFunction, 0);
    b.emit(Opcode::ReturnValue);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::TypeError);
    assert_eq!(err.message(), Some("'int' object is not callable"));
}

/// `print('x =', 1, None)` followed by an expression statement.
#[test]
fn print_and_print_expr_write_through_the_print_writer() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "print");
    b.load_const("x =");
    b.load_const(Value::Int(1));
    b.load_const(Value::None);
    b.emit_arg(Opcode::CallFunction, 3);
    b.emit(Opcode::PrintExpr);
    b.load_const("repr'd");
    b.emit(Opcode::PrintExpr);
    b.load_const(Value::None);
    b.emit(Opcode::ReturnValue);

    assert_eq!(run_printed(b.build()), "x = 1 None\n\"repr'd\"\n");
}

/// `len`, `sum`, `max`, `min` and `repr` over a built list.
#[test]
fn builtin_functions() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(3));
    b.load_const(Value::Int(1));
    b.load_const(Value::Int(2));
    b.emit_arg(Opcode::BuildList, 3);
    b.emit_name(Opcode::StoreName, "xs");
    for name in ["len", "sum", "max", "min", "repr"] {
        b.emit_name(Opcode::LoadName, name);
        b.emit_name(Opcode::LoadName, "xs");
        b.emit_arg(Opcode::CallFunction, 1);
    }
    b.emit_arg(Opcode::BuildTuple, 5);
    b.emit(Opcode::ReturnValue);

    assert_eq!(
        run(b.build()).unwrap(),
        Value::Tuple(
            vec![
                Value::Int(3),
                Value::Int(6),
                Value::Int(3),
                Value::Int(1),
                Value::from("[3, 1, 2]"),
            ]
            .into()
        )
    );
}

/// Exception classes are callable and bound by name in the builtins.
#[test]
fn exception_class_call_builds_an_instance() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "ValueError");
    b.load_const("bad value");
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);

    let result = run(b.build()).unwrap();
    assert_eq!(result.py_repr(), "ValueError('bad value')");
}

/// ```python
/// a, b = (1, 2)
/// xs = [a, b]
/// xs[0] = b
/// xs[0] + xs[-1]
/// ```
#[test]
fn unpack_and_subscripts() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Tuple(vec![Value::Int(1), Value::Int(2)].into()));
    b.emit_arg(Opcode::UnpackSequence, 2);
    b.emit_name(Opcode::StoreName, "a");
    b.emit_name(Opcode::StoreName, "b");
    b.emit_name(Opcode::LoadName, "a");
    b.emit_name(Opcode::LoadName, "b");
    b.emit_arg(Opcode::BuildList, 2);
    b.emit_name(Opcode::StoreName, "xs");
    b.emit_name(Opcode::LoadName, "b");
    b.emit_name(Opcode::LoadName, "xs");
    b.load_const(Value::Int(0));
    b.emit(Opcode::StoreSubscr);
    b.emit_name(Opcode::LoadName, "xs");
    b.load_const(Value::Int(0));
    b.emit(Opcode::BinarySubscr);
    b.emit_name(Opcode::LoadName, "xs");
    b.load_const(Value::Int(-1));
    b.emit(Opcode::BinarySubscr);
    b.emit(Opcode::BinaryAdd);
    b.emit(Opcode::ReturnValue);

    assert_eq!(run(b.build()).unwrap(), Value::Int(4));
}

#[test]
fn unpack_length_mismatch_is_a_value_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Tuple(vec![Value::Int(1)].into()));
    b.emit_arg(Opcode::UnpackSequence, 2);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ValueError);
    assert_eq!(err.message(), Some("not enough values to unpack (expected 2, got 1)"));
}

/// `xs += [3]` extends the list object itself.
#[test]
fn inplace_add_extends_list_in_place() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(1));
    b.emit_arg(Opcode::BuildList, 1);
    b.emit(Opcode::DupTop);
    b.emit_name(Opcode::StoreName, "alias");
    b.load_const(Value::Int(3));
    b.emit_arg(Opcode::BuildList, 1);
    b.emit(Opcode::InplaceAdd);
    b.emit(Opcode::PopTop);
    b.emit_name(Opcode::LoadName, "alias");
    b.emit(Opcode::ReturnValue);

    assert_eq!(
        run(b.build()).unwrap(),
        Value::from(vec![Value::Int(1), Value::Int(3)])
    );
}

#[test]
fn delete_name_then_load_is_a_name_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(1));
    b.emit_name(Opcode::StoreName, "x");
    b.emit_name(Opcode::DeleteName, "x");
    b.emit_name(Opcode::LoadName, "x");
    b.emit(Opcode::ReturnValue);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::NameError);
}

/// Stack shuffles: `1 2 3 ROT_THREE` is `3 1 2`, then `ROT_TWO` swaps the top pair.
#[test]
fn rotations() {
    let mut b = CodeBuilder::new("<module>");
    for i in 1..=3 {
        b.load_const(Value::Int(i));
    }
    b.emit(Opcode::RotThree);
    b.emit(Opcode::RotTwo);
    b.emit_arg(Opcode::BuildTuple, 3);
    b.emit(Opcode::ReturnValue);

    assert_eq!(
        run(b.build()).unwrap(),
        Value::Tuple(vec![Value::Int(3), Value::Int(2), Value::Int(1)].into())
    );
}

#[test]
fn unary_operators() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(5));
    b.emit(Opcode::UnaryNegative);
    b.load_const(Value::Int(5));
    b.emit(Opcode::UnaryInvert);
    b.load_const(Value::Int(0));
    b.emit(Opcode::UnaryNot);
    b.emit_arg(Opcode::BuildTuple, 3);
    b.emit(Opcode::ReturnValue);

    assert_eq!(
        run(b.build()).unwrap(),
        Value::Tuple(vec![Value::Int(-5), Value::Int(-6), Value::Bool(true)].into())
    );
}

#[test]
fn binary_type_mismatch_message() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(1));
    b.load_const("a");
    b.emit(Opcode::BinarySubtract);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::TypeError);
    assert_eq!(err.message(), Some("unsupported operand type(s) for -: 'int' and 'str'"));
}

#[test]
fn modulo_by_zero_is_a_zero_division_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Int(7));
    b.load_const(Value::Int(0));
    b.emit(Opcode::BinaryModulo);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::ZeroDivisionError);
    assert_eq!(err.message(), Some("integer division or modulo by zero"));
}

/// `'ab' * 2 ** 62`
#[test]
fn oversized_repeat_is_a_memory_error() {
    let mut b = CodeBuilder::new("<module>");
    b.load_const("ab");
    b.load_const(Value::Int(1 << 62));
    b.emit(Opcode::BinaryMultiply);
    b.emit(Opcode::ReturnValue);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::MemoryError);
    assert!(err.message().unwrap().contains("exceeds the limit of 1073741824 bytes"));
}

/// `list(range(2 ** 62))`
#[test]
fn materializing_a_huge_range_is_a_memory_error() {
    let mut b = CodeBuilder::new("<module>");
    b.emit_name(Opcode::LoadName, "list");
    b.emit_name(Opcode::LoadName, "range");
    b.load_const(Value::Int(1 << 62));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);

    let err = run(b.build()).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::MemoryError);
}

/// `[None] * 10_000` against a 100 kB result limit; `[None] * 10` stays under it.
#[test]
fn result_size_limit_is_configurable() {
    let repeat = |count: i64| {
        let mut b = CodeBuilder::new("<module>");
        b.load_const(Value::None);
        b.emit_arg(Opcode::BuildList, 1);
        b.load_const(Value::Int(count));
        b.emit(Opcode::BinaryMultiply);
        b.emit(Opcode::ReturnValue);
        let limits = ResourceLimits::new().max_result_bytes(100_000);
        Runner::new(b.build()).run(vec![], LimitedTracker::new(limits), &mut NoPrint)
    };
    let err = repeat(10_000).unwrap_err();
    assert_eq!(err.exc_type(), ExcType::MemoryError);
    assert!(!err.exc_type().is_fatal());
    assert_eq!(repeat(10).unwrap().py_len(), Some(10));
}
