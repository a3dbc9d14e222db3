use std::cmp::Ordering;

use super::{VirtualMachine, Why};
use crate::{
    bytecode::{code::Operand, op::CompareOp},
    exception::{ExcType, RunResult},
    io::PrintWriter,
    resource::ResourceTracker,
    tracer::VmTracer,
    value::Value,
};

impl<T: ResourceTracker, P: PrintWriter, Tr: VmTracer> VirtualMachine<'_, T, P, Tr> {
    /// `COMPARE_OP`: pops `rhs` then `lhs`, pushes the boolean result.
    pub(super) fn compare_op(&mut self, operand: Operand) -> RunResult<Option<Why>> {
        let selector = operand.into_int()?;
        let op = u8::try_from(selector)
            .ok()
            .and_then(CompareOp::from_repr)
            .ok_or_else(|| ExcType::system_error(format!("unknown comparison selector {selector}")))?;
        let [lhs, rhs] = self.pop_array()?;
        let result = compare(op, &lhs, &rhs)?;
        self.push(Value::Bool(result))?;
        Ok(None)
    }
}

fn compare(op: CompareOp, lhs: &Value, rhs: &Value) -> RunResult<bool> {
    let ordered = |accept: fn(Ordering) -> bool| -> RunResult<bool> {
        let symbol = op.to_string();
        Ok(lhs.py_cmp(rhs, &symbol)?.is_some_and(accept))
    };
    match op {
        CompareOp::Lt => ordered(Ordering::is_lt),
        CompareOp::Le => ordered(Ordering::is_le),
        CompareOp::Gt => ordered(Ordering::is_gt),
        CompareOp::Ge => ordered(Ordering::is_ge),
        CompareOp::Eq => Ok(lhs.py_eq(rhs)),
        CompareOp::Ne => Ok(!lhs.py_eq(rhs)),
        CompareOp::In => rhs.py_contains(lhs),
        CompareOp::NotIn => rhs.py_contains(lhs).map(|found| !found),
        CompareOp::Is => Ok(lhs.py_is(rhs)),
        CompareOp::IsNot => Ok(!lhs.py_is(rhs)),
        CompareOp::ExceptionMatch => exception_match(lhs, rhs),
    }
}

/// Whether the raised exception `lhs` is caught by the `except` clause type(s) `rhs`.
///
/// `lhs` is the exception class staged by the handler or an instance; `rhs` is a class or a
/// tuple of classes.
fn exception_match(lhs: &Value, rhs: &Value) -> RunResult<bool> {
    let raised = match lhs {
        Value::ExcType(kind) => *kind,
        Value::Exception(exc) => exc.exc_type(),
        _ => return Ok(false),
    };
    match rhs {
        Value::ExcType(handler) => Ok(raised.is_subclass_of(*handler)),
        Value::Tuple(handlers) => {
            let mut matched = false;
            for handler in handlers.iter() {
                let Value::ExcType(handler) = handler else {
                    return Err(catching_non_exception());
                };
                matched |= raised.is_subclass_of(*handler);
            }
            Ok(matched)
        }
        _ => Err(catching_non_exception()),
    }
}

fn catching_non_exception() -> crate::exception::SimpleException {
    ExcType::type_error("catching classes that do not inherit from BaseException is not allowed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exception_match_follows_subclassing() {
        let zero_div = Value::ExcType(ExcType::ZeroDivisionError);
        assert!(exception_match(&zero_div, &Value::ExcType(ExcType::ArithmeticError)).unwrap());
        assert!(!exception_match(&zero_div, &Value::ExcType(ExcType::LookupError)).unwrap());
        let handlers = Value::Tuple(
            vec![
                Value::ExcType(ExcType::KeyError),
                Value::ExcType(ExcType::Exception),
            ]
            .into(),
        );
        assert!(exception_match(&zero_div, &handlers).unwrap());
    }

    #[test]
    fn exception_match_rejects_non_classes() {
        let err = exception_match(&Value::ExcType(ExcType::KeyError), &Value::Int(1)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::TypeError);
    }

    #[test]
    fn nan_is_unordered() {
        let nan = Value::Float(f64::NAN);
        assert!(!compare(CompareOp::Lt, &nan, &Value::Int(1)).unwrap());
        assert!(!compare(CompareOp::Ge, &nan, &Value::Int(1)).unwrap());
        assert!(compare(CompareOp::Ne, &nan, &nan).unwrap());
    }

    #[test]
    fn membership_tests_the_right_operand() {
        let items = Value::from(vec![Value::Int(1), Value::Int(2)]);
        assert!(compare(CompareOp::In, &Value::Int(2), &items).unwrap());
        assert!(compare(CompareOp::NotIn, &Value::Int(3), &items).unwrap());
    }
}
