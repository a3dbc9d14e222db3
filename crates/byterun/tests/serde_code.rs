//! Tests for loading code objects from JSON and for disassembly.

use std::rc::Rc;

use byterun::{CodeBuilder, CollectStringPrint, ExcType, NoLimitTracker, NoPrint, Opcode, Runner, Value};
use pretty_assertions::assert_eq;

/// `7 + 5`, written the way a compiler front end would emit it.
const ADD_JSON: &str = r#"{
    "name": "<module>",
    "instructions": [100, 0, 0, 100, 1, 0, 23, 83],
    "constants": [{"Int": 7}, {"Int": 5}]
}"#;

#[test]
fn hand_written_json_runs() {
    let runner = Runner::from_json(ADD_JSON).unwrap();
    assert_eq!(runner.code().name(), "<module>");
    assert!(runner.code().names().is_empty());
    assert_eq!(runner.run(vec![], NoLimitTracker, &mut NoPrint).unwrap(), Value::Int(12));
}

#[test]
fn name_defaults_to_module() {
    let runner = Runner::from_json(r#"{"instructions": [100, 0, 0, 83], "constants": ["None"]}"#).unwrap();
    assert_eq!(runner.code().name(), "<module>");
    assert_eq!(runner.run(vec![], NoLimitTracker, &mut NoPrint).unwrap(), Value::None);
}

/// Builtins and exception classes are plain constants in the serialized form.
#[test]
fn builtin_and_exception_constants() {
    let json = r#"{
        "instructions": [100, 0, 0, 100, 1, 0, 131, 1, 0, 100, 2, 0, 102, 2, 0, 83],
        "constants": [
            {"Builtin": "len"},
            {"Tuple": [{"Str": "a"}, {"Bool": true}, {"Float": 1.5}]},
            {"ExcType": "KeyError"}
        ]
    }"#;
    let result = Runner::from_json(json)
        .unwrap()
        .run(vec![], NoLimitTracker, &mut NoPrint)
        .unwrap();
    assert_eq!(
        result,
        Value::Tuple(vec![Value::Int(3), Value::ExcType(ExcType::KeyError)].into())
    );
}

/// Values that only exist while code runs cannot appear in a code object.
#[test]
fn runtime_only_values_are_rejected() {
    let json = r#"{"instructions": [], "constants": [{"Signal": "Break"}]}"#;
    assert!(Runner::from_json(json).is_err());
    assert!(Runner::from_json(r#"{"name": "f"}"#).is_err());
}

/// ```python
/// def double(x):
///     return x * 2
/// double(21)
/// ```
fn nested_program() -> Runner {
    let mut f = CodeBuilder::new("double");
    f.add_param("x");
    f.emit_local(Opcode::LoadFast, "x");
    f.load_const(Value::Int(2));
    f.emit(Opcode::BinaryMultiply);
    f.emit(Opcode::ReturnValue);

    let mut b = CodeBuilder::new("<module>");
    b.load_const(Value::Code(Rc::new(f.build())));
    b.load_const("double");
    b.emit_arg(Opcode::MakeFunction, 0);
    b.emit_name(Opcode::StoreName, "double");
    b.emit_name(Opcode::LoadName, "double");
    b.load_const(Value::Int(21));
    b.emit_arg(Opcode::CallFunction, 1);
    b.emit(Opcode::ReturnValue);
    Runner::new(b.build())
}

#[test]
fn json_round_trip_preserves_nested_code() {
    let runner = nested_program();
    let json = runner.to_json().unwrap();
    let reloaded = Runner::from_json(&json).unwrap();

    assert_eq!(reloaded.code(), runner.code());
    assert_eq!(reloaded.run(vec![], NoLimitTracker, &mut NoPrint).unwrap(), Value::Int(42));
}

#[test]
fn disassembly_lists_instructions_and_nested_code() {
    let listing = nested_program().code().disassemble();
    let lines: Vec<Vec<&str>> = listing.lines().map(|line| line.split_whitespace().collect()).collect();

    assert_eq!(lines[0], ["0", "LOAD_CONST", "0", "(<code", "object", "double>)"]);
    assert_eq!(lines[1], ["3", "LOAD_CONST", "1", "('double')"]);
    assert_eq!(lines[2], ["6", "MAKE_FUNCTION", "0"]);
    assert_eq!(lines[3], ["9", "STORE_NAME", "0", "(double)"]);
    assert_eq!(lines[7], ["21", "RETURN_VALUE"]);
    assert!(listing.contains("\nDisassembly of <code object double>:\n"));
    assert!(listing.contains("LOAD_FAST"));
    assert!(listing.contains("BINARY_MULTIPLY"));
}

#[test]
fn disassembly_marks_undecodable_bytes() {
    let runner = Runner::from_json(r#"{"instructions": [9, 200, 83]}"#).unwrap();
    let listing = runner.code().disassemble();
    assert!(listing.starts_with("     0 NOP"));
    assert!(listing.contains("     1 <"));
    assert!(!listing.contains("RETURN_VALUE"));
}

/// The CLI demo: a `for` loop over `range(5)` and a caught `ZeroDivisionError`.
#[test]
fn cli_demo_program() {
    let json = include_str!("../../byterun-cli/demos/loop_and_except.json");
    let mut print = CollectStringPrint::new();
    let result = Runner::from_json(json)
        .unwrap()
        .run(vec![], NoLimitTracker, &mut print)
        .unwrap();
    assert_eq!(result, Value::Int(10));
    assert_eq!(print.output(), "total 10\ncaught\n");
}
