//! Function creation, frame setup and calls.

use std::rc::Rc;

use super::{VirtualMachine, Why, frame::Frame};
use crate::{
    builtins::{ArgValues, BuiltinTable},
    bytecode::code::{Code, Operand},
    exception::{ExcType, RunResult, SimpleException},
    io::PrintWriter,
    namespace::{Environment, Namespace},
    resource::ResourceTracker,
    tracer::VmTracer,
    value::{Function, Value},
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VirtualMachine<'_, T, P, Tr> {
    /// Creates a frame for `code`, binding `args` to its parameters.
    ///
    /// A frame created while another runs shares the caller's globals and builtins and gets
    /// fresh locals. A root frame uses `env`, where globals and locals are normally the same
    /// namespace. Missing trailing arguments are filled from `defaults`; any other arity
    /// mismatch fails before the callee runs.
    pub(super) fn make_frame(
        &self,
        code: Rc<Code>,
        args: ArgValues,
        defaults: &[Value],
        env: Option<Environment>,
    ) -> RunResult<Frame> {
        let caller = self.frames.len().checked_sub(1);
        let (globals, locals, builtins) = match caller.and_then(|i| self.frames.get(i)) {
            Some(frame) => (frame.globals.clone(), Namespace::new(), frame.builtins.clone()),
            None => {
                let env = env.unwrap_or_default();
                (env.globals().clone(), env.locals().clone(), BuiltinTable::process_default())
            }
        };

        let params = code.params()?;
        let given = args.len();
        let required = params.len().saturating_sub(defaults.len());
        if given < required || given > params.len() {
            return Err(ExcType::argument_count(code.name(), params.len(), given));
        }
        let filled = defaults.len() - (params.len() - given);
        let values = args.into_iter().chain(defaults[filled..].iter().cloned());
        for (name, value) in params.iter().zip(values) {
            locals.set(Rc::clone(name), value);
        }

        Ok(Frame::new(code, globals, locals, builtins, caller))
    }

    /// `MAKE_FUNCTION n`: pops the qualified name, the code object and `n` defaults.
    pub(super) fn make_function(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let defaults_count = operand.into_int()?;
        let [code, name] = self.pop_array()?;
        let defaults = self.pop_n(defaults_count)?;
        let Value::Code(code) = code else {
            return Err(ExcType::system_error(format!(
                "MAKE_FUNCTION expects a code object, got '{}'",
                code.type_name()
            )));
        };
        let name = match name {
            Value::Str(name) => name,
            _ => Rc::clone(&code.name),
        };
        self.tracer.on_make_function(defaults.len());
        self.push(Value::Function(Rc::new(Function { name, code, defaults })))?;
        Ok(None)
    }

    /// `CALL_FUNCTION n`: pops `n` positional arguments and the callee, pushes the result.
    ///
    /// A user function gets a new frame that the main loop runs next; its result is pushed
    /// here when that frame returns. Builtins and exception classes complete immediately.
    pub(super) fn call_function(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let arg_count = operand.into_int()?;
        let args = ArgValues::from_vec(self.pop_n(arg_count)?);
        let callee = self.pop()?;
        let result = match callee {
            Value::Function(func) => {
                let frame = self.make_frame(Rc::clone(&func.code), args, &func.defaults, None)?;
                self.push_frame(frame)?;
                return Ok(None);
            }
            Value::Builtin(builtin) => builtin.call(args, &mut *self.print, &self.tracker)?,
            Value::ExcType(kind) => Value::Exception(Rc::new(instantiate(kind, args))),
            other => {
                return Err(ExcType::type_error(format!(
                    "'{}' object is not callable",
                    other.type_name()
                )));
            }
        };
        self.push(result)?;
        Ok(None)
    }
}

/// Calling an exception class builds an instance; the message is the lone argument's `str`,
/// or the repr of the argument tuple when there are several.
fn instantiate(kind: ExcType, args: ArgValues) -> SimpleException {
    match args.len() {
        0 => SimpleException::new_none(kind),
        1 => SimpleException::new_msg(kind, args[0].py_str()),
        _ => SimpleException::new_msg(kind, Value::Tuple(args.into_vec().into()).py_repr()),
    }
}
