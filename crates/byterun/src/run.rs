//! Public interface for running code objects.

use std::rc::Rc;

use crate::{
    Exception,
    bytecode::{Code, VirtualMachine},
    io::{PrintWriter, StdPrint},
    namespace::Environment,
    resource::{NoLimitTracker, ResourceTracker},
    tracer::{NoopTracer, VmTracer},
    value::Value,
};

/// Primary interface for running a code object.
///
/// Each run gets a fresh virtual machine and, unless the host passes its own
/// [`Environment`], a fresh module namespace.
///
/// # Example
/// ```
/// use byterun::{CodeBuilder, NoLimitTracker, NoPrint, Opcode, Runner, Value};
///
/// let mut builder = CodeBuilder::new("<module>");
/// builder.load_const(Value::Int(7));
/// builder.load_const(Value::Int(5));
/// builder.emit(Opcode::BinaryAdd);
/// builder.emit(Opcode::ReturnValue);
///
/// let runner = Runner::new(builder.build());
/// let result = runner.run(vec![], NoLimitTracker, &mut NoPrint).unwrap();
/// assert_eq!(result, Value::Int(12));
/// ```
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Runner {
    code: Rc<Code>,
}

impl Runner {
    #[must_use]
    pub fn new(code: Code) -> Self {
        Self { code: Rc::new(code) }
    }

    /// Loads a code object serialized as JSON, e.g. by a compiler front end.
    ///
    /// # Errors
    /// Returns an error if the JSON does not describe a code object.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json).map(Self::new)
    }

    /// Serializes the code object to JSON, the format `from_json()` reads back.
    ///
    /// # Errors
    /// Returns an error if a constant cannot be serialized.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&*self.code)
    }

    #[must_use]
    pub fn code(&self) -> &Code {
        &self.code
    }

    /// Runs to completion with no operation or time limit, printing to stdout.
    pub fn run_no_limits(&self, args: Vec<Value>) -> Result<Value, Exception> {
        self.run(args, NoLimitTracker, &mut StdPrint)
    }

    /// Runs to completion in a fresh module namespace.
    ///
    /// # Arguments
    /// * `args` - Positional arguments bound to the code object's parameters
    /// * `resource_tracker` - Resource policy, e.g. `LimitedTracker`
    /// * `print` - Destination of `print()` and `PRINT_EXPR` output
    pub fn run(
        &self,
        args: Vec<Value>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
    ) -> Result<Value, Exception> {
        self.run_with_env(Environment::new(), args, resource_tracker, print)
    }

    /// Runs against a host-supplied environment, which the host can inspect afterwards.
    pub fn run_with_env(
        &self,
        env: Environment,
        args: Vec<Value>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
    ) -> Result<Value, Exception> {
        let mut vm = VirtualMachine::new(resource_tracker, print, NoopTracer);
        vm.run_code(Rc::clone(&self.code), env, args)
    }

    /// Runs with a tracer attached, returning the tracer alongside the outcome.
    pub fn run_traced<Tr: VmTracer>(
        &self,
        args: Vec<Value>,
        resource_tracker: impl ResourceTracker,
        print: &mut impl PrintWriter,
        tracer: Tr,
    ) -> (Result<Value, Exception>, Tr) {
        let mut vm = VirtualMachine::new(resource_tracker, print, tracer);
        let result = vm.run_code(Rc::clone(&self.code), Environment::new(), args);
        (result, vm.into_tracer())
    }
}
