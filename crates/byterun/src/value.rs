//! The dynamic value model carried on data stacks and stored in namespaces.

use std::{cell::RefCell, cmp::Ordering, fmt::Write as _, rc::Rc};

use serde::{Deserialize, Serialize};

use crate::{
    builtins::BuiltinFunction,
    bytecode::{Code, Why},
    exception::{ExcType, RunResult, SimpleException, Traceback},
    resource::{MAX_DATA_RECURSION_DEPTH, ResourceTracker, check_result_size},
};

/// Primary value type.
///
/// Scalars are stored inline; containers and callables are reference counted, so cloning
/// a `Value` aliases the same list, iterator or function. Variants that only exist at
/// runtime are skipped by serde: code objects can carry scalars, strings, tuples and nested
/// code as constants, nothing else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Range(Range),
    #[serde(skip)]
    Iterator(Rc<RefCell<ValueIter>>),
    #[serde(skip)]
    Function(Rc<Function>),
    Builtin(BuiltinFunction),
    ExcType(ExcType),
    #[serde(skip)]
    Exception(Rc<SimpleException>),
    #[serde(skip)]
    Traceback(Rc<Traceback>),
    Code(Rc<Code>),
    /// Marker left on the data stack for a `finally` body so `END_FINALLY` can resume the
    /// interrupted return, break or continue.
    #[serde(skip)]
    Signal(Why),
}

/// A user function: a code object plus the default values of its trailing parameters.
#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub code: Rc<Code>,
    pub defaults: Vec<Value>,
}

/// `range(start, stop, step)`; `step` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl Range {
    pub fn new(start: i64, stop: i64, step: i64) -> RunResult<Self> {
        if step == 0 {
            return Err(ExcType::value_error("range() arg 3 must not be zero"));
        }
        Ok(Self { start, stop, step })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        let (start, stop, step) = (i128::from(self.start), i128::from(self.stop), i128::from(self.step));
        let len = if step > 0 && start < stop {
            (stop - start + step - 1) / step
        } else if step < 0 && start > stop {
            (start - stop - step - 1) / -step
        } else {
            0
        };
        usize::try_from(len).unwrap_or(usize::MAX)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `index`th element, if the range is that long.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<i64> {
        if index >= self.len() {
            return None;
        }
        let offset = i128::try_from(index).ok()? * i128::from(self.step);
        i64::try_from(i128::from(self.start) + offset).ok()
    }

    #[must_use]
    pub fn contains(&self, value: i64) -> bool {
        if self.step == 0 {
            return false;
        }
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

/// Cursor over an iterable; shared between clones of the owning `Value::Iterator`.
#[derive(Debug)]
pub struct ValueIter {
    source: IterSource,
    index: usize,
}

#[derive(Debug)]
enum IterSource {
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    /// `index` is a byte offset into the string.
    Str(Rc<str>),
    Range(Range),
}

impl ValueIter {
    /// Advances the cursor. Lists are read live, so appends during iteration are seen.
    pub fn next_value(&mut self) -> Option<Value> {
        let value = match &self.source {
            IterSource::List(items) => items.borrow().get(self.index).cloned(),
            IterSource::Tuple(items) => items.get(self.index).cloned(),
            IterSource::Str(s) => {
                let ch = s.get(self.index..)?.chars().next()?;
                self.index += ch.len_utf8();
                return Some(Value::Str(ch.to_string().into()));
            }
            IterSource::Range(range) => range.get(self.index).map(Value::Int),
        };
        if value.is_some() {
            self.index += 1;
        }
        value
    }

    /// Items left before the cursor is exhausted.
    fn remaining(&self) -> usize {
        match &self.source {
            IterSource::List(items) => items.borrow().len().saturating_sub(self.index),
            IterSource::Tuple(items) => items.len().saturating_sub(self.index),
            IterSource::Str(s) => s.get(self.index..).map_or(0, |rest| rest.chars().count()),
            IterSource::Range(range) => range.len().saturating_sub(self.index),
        }
    }
}

/// Numeric view of a value; `bool` counts as an int.
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn to_f64(self) -> f64 {
        match self {
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }
}

impl Value {
    /// Python type name, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Range(_) => "range",
            Self::Iterator(_) => "iterator",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function_or_method",
            Self::ExcType(_) => "type",
            Self::Exception(exc) => exc.exc_type().into(),
            Self::Traceback(_) => "traceback",
            Self::Code(_) => "code",
            Self::Signal(_) => "signal",
        }
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(i) => *i != 0,
            Self::Float(f) => *f != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.borrow().is_empty(),
            Self::Tuple(items) => !items.is_empty(),
            Self::Range(range) => !range.is_empty(),
            _ => true,
        }
    }

    fn as_num(&self) -> Option<Num> {
        match self {
            Self::Bool(b) => Some(Num::Int(i64::from(*b))),
            Self::Int(i) => Some(Num::Int(*i)),
            Self::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    /// Integer view of the value, accepting `bool`.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Bool(b) => Some(i64::from(*b)),
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    #[must_use]
    pub fn py_repr(&self) -> String {
        let mut out = String::new();
        self.repr_into(&mut out, 0);
        out
    }

    /// `str(value)`: strings are written raw, everything else uses its repr.
    #[must_use]
    pub fn py_str(&self) -> String {
        match self {
            Self::Str(s) => s.to_string(),
            Self::Exception(exc) => exc.message().unwrap_or_default().to_owned(),
            _ => self.py_repr(),
        }
    }

    fn repr_into(&self, out: &mut String, depth: usize) {
        if depth > MAX_DATA_RECURSION_DEPTH {
            out.push_str("...");
            return;
        }
        match self {
            Self::None => out.push_str("None"),
            Self::Bool(true) => out.push_str("True"),
            Self::Bool(false) => out.push_str("False"),
            Self::Int(i) => {
                let _ = write!(out, "{i}");
            }
            Self::Float(f) => out.push_str(&float_repr(*f)),
            Self::Str(s) => str_repr_into(s, out),
            Self::List(items) => {
                out.push('[');
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_into(out, depth + 1);
                }
                out.push(']');
            }
            Self::Tuple(items) => {
                out.push('(');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    item.repr_into(out, depth + 1);
                }
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Self::Range(r) => {
                if r.step == 1 {
                    let _ = write!(out, "range({}, {})", r.start, r.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
                }
            }
            Self::Iterator(_) => out.push_str("<iterator>"),
            Self::Function(func) => {
                let _ = write!(out, "<function {}>", func.name);
            }
            Self::Builtin(builtin) => {
                let _ = write!(out, "<built-in function {builtin}>");
            }
            Self::ExcType(kind) => {
                let _ = write!(out, "<class '{kind}'>");
            }
            Self::Exception(exc) => out.push_str(&exc.py_repr()),
            Self::Traceback(_) => out.push_str("<traceback>"),
            Self::Code(code) => {
                let _ = write!(out, "<code object {}>", code.name);
            }
            Self::Signal(why) => {
                let _ = write!(out, "<signal {why:?}>");
            }
        }
    }

    /// Value equality (`==`). Ints, floats and bools compare numerically.
    #[must_use]
    pub fn py_eq(&self, other: &Self) -> bool {
        self.eq_depth(other, 0)
    }

    fn eq_depth(&self, other: &Self, depth: usize) -> bool {
        if depth > MAX_DATA_RECURSION_DEPTH {
            return false;
        }
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return match (a, b) {
                (Num::Int(a), Num::Int(b)) => a == b,
                (a, b) => a.to_f64() == b.to_f64(),
            };
        }
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow(), depth)
            }
            (Self::Tuple(a), Self::Tuple(b)) => seq_eq(a, b, depth),
            (Self::Range(a), Self::Range(b)) => {
                (a.is_empty() && b.is_empty()) || (a.len() == b.len() && a.start == b.start && a.step == b.step)
            }
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b) || a == b,
            (Self::Signal(a), Self::Signal(b)) => a == b,
            _ => self.py_is(other),
        }
    }

    /// Identity (`is`). Shared values compare by pointer; scalars by value and variant.
    #[must_use]
    pub fn py_is(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Tuple(a), Self::Tuple(b)) => Rc::ptr_eq(a, b),
            (Self::Range(a), Self::Range(b)) => a == b,
            (Self::Iterator(a), Self::Iterator(b)) => Rc::ptr_eq(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (Self::ExcType(a), Self::ExcType(b)) => a == b,
            (Self::Exception(a), Self::Exception(b)) => Rc::ptr_eq(a, b),
            (Self::Traceback(a), Self::Traceback(b)) => Rc::ptr_eq(a, b),
            (Self::Code(a), Self::Code(b)) => Rc::ptr_eq(a, b),
            (Self::Signal(a), Self::Signal(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for `<`, `<=`, `>`, `>=`.
    ///
    /// Returns `Ok(None)` for unordered floats (NaN) and a `TypeError` naming `op` when the
    /// types cannot be ordered at all.
    pub fn py_cmp(&self, other: &Self, op: &str) -> RunResult<Option<Ordering>> {
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return Ok(match (a, b) {
                (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
                (a, b) => a.to_f64().partial_cmp(&b.to_f64()),
            });
        }
        match (self, other) {
            (Self::Str(a), Self::Str(b)) => Ok(Some(a.cmp(b))),
            (Self::List(a), Self::List(b)) => seq_cmp(&a.borrow(), &b.borrow(), op),
            (Self::Tuple(a), Self::Tuple(b)) => seq_cmp(a, b, op),
            _ => Err(ExcType::type_error(format!(
                "'{op}' not supported between instances of '{}' and '{}'",
                self.type_name(),
                other.type_name()
            ))),
        }
    }

    /// Membership (`item in self`).
    pub fn py_contains(&self, item: &Self) -> RunResult<bool> {
        match self {
            Self::List(items) => Ok(items.borrow().iter().any(|v| v.py_eq(item))),
            Self::Tuple(items) => Ok(items.iter().any(|v| v.py_eq(item))),
            Self::Range(range) => Ok(item.as_int().is_some_and(|i| range.contains(i))),
            Self::Str(s) => match item {
                Self::Str(needle) => Ok(s.contains(needle.as_ref())),
                _ => Err(ExcType::type_error(format!(
                    "'in <string>' requires string as left operand, not {}",
                    item.type_name()
                ))),
            },
            _ => Err(ExcType::type_error(format!(
                "argument of type '{}' is not iterable",
                self.type_name()
            ))),
        }
    }

    #[must_use]
    pub fn py_len(&self) -> Option<usize> {
        match self {
            Self::Str(s) => Some(s.chars().count()),
            Self::List(items) => Some(items.borrow().len()),
            Self::Tuple(items) => Some(items.len()),
            Self::Range(range) => Some(range.len()),
            _ => None,
        }
    }

    /// `self + rhs`; `Ok(None)` when the operand types do not support it.
    pub fn py_add(&self, rhs: &Self) -> RunResult<Option<Self>> {
        if let (Some(a), Some(b)) = (self.as_num(), rhs.as_num()) {
            return match (a, b) {
                (Num::Int(a), Num::Int(b)) => int_result(a.checked_add(b)).map(Some),
                (a, b) => Ok(Some(Self::Float(a.to_f64() + b.to_f64()))),
            };
        }
        Ok(match (self, rhs) {
            (Self::Str(a), Self::Str(b)) => Some(Self::Str(format!("{a}{b}").into())),
            (Self::List(a), Self::List(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Some(Self::from(items))
            }
            (Self::Tuple(a), Self::Tuple(b)) => Some(Self::Tuple(a.iter().chain(b.iter()).cloned().collect())),
            _ => None,
        })
    }

    pub fn py_sub(&self, rhs: &Self) -> RunResult<Option<Self>> {
        let (Some(a), Some(b)) = (self.as_num(), rhs.as_num()) else {
            return Ok(None);
        };
        match (a, b) {
            (Num::Int(a), Num::Int(b)) => int_result(a.checked_sub(b)).map(Some),
            (a, b) => Ok(Some(Self::Float(a.to_f64() - b.to_f64()))),
        }
    }

    pub fn py_mult(&self, rhs: &Self) -> RunResult<Option<Self>> {
        if let (Some(a), Some(b)) = (self.as_num(), rhs.as_num()) {
            return match (a, b) {
                (Num::Int(a), Num::Int(b)) => int_result(a.checked_mul(b)).map(Some),
                (a, b) => Ok(Some(Self::Float(a.to_f64() * b.to_f64()))),
            };
        }
        let Some((seq, count)) = self.repeat_operands(rhs) else {
            return Ok(None);
        };
        Ok(match seq {
            Self::Str(s) => Some(Self::Str(repeat_str(s, count)?.into())),
            Self::List(items) => {
                let items = items.borrow();
                Some(Self::from(repeat_items(&items, count)?))
            }
            Self::Tuple(items) => Some(Self::Tuple(repeat_items(items, count)?.into())),
            _ => None,
        })
    }

    /// Approximate bytes `self * rhs` allocates when it repeats a sequence.
    #[must_use]
    pub fn repeat_bytes(&self, rhs: &Self) -> Option<usize> {
        let (seq, count) = self.repeat_operands(rhs)?;
        let unit = match seq {
            Self::Str(s) => s.len(),
            Self::List(items) => items.borrow().len().saturating_mul(size_of::<Self>()),
            Self::Tuple(items) => items.len().saturating_mul(size_of::<Self>()),
            _ => return None,
        };
        Some(unit.saturating_mul(count))
    }

    /// Splits `seq * n` or `n * seq` into the sequence and a non-negative count.
    fn repeat_operands<'a>(&'a self, rhs: &'a Self) -> Option<(&'a Self, usize)> {
        if self.as_num().is_some() && rhs.as_num().is_some() {
            return None;
        }
        let (seq, count) = match (self.as_int(), rhs.as_int()) {
            (_, Some(count)) => (self, count),
            (Some(count), _) => (rhs, count),
            _ => return None,
        };
        Some((seq, usize::try_from(count).unwrap_or(0)))
    }

    pub fn py_truediv(&self, rhs: &Self) -> RunResult<Option<Self>> {
        let (Some(a), Some(b)) = (self.as_num(), rhs.as_num()) else {
            return Ok(None);
        };
        let divisor = b.to_f64();
        if divisor == 0.0 {
            return Err(ExcType::zero_division("division by zero"));
        }
        Ok(Some(Self::Float(a.to_f64() / divisor)))
    }

    /// Floor division, rounding toward negative infinity.
    pub fn py_floordiv(&self, rhs: &Self) -> RunResult<Option<Self>> {
        let (Some(a), Some(b)) = (self.as_num(), rhs.as_num()) else {
            return Ok(None);
        };
        match (a, b) {
            (Num::Int(_), Num::Int(0)) => Err(ExcType::zero_division("integer division or modulo by zero")),
            (Num::Int(a), Num::Int(b)) => {
                let q = a.checked_div(b).ok_or_else(|| ExcType::overflow("integer overflow"))?;
                let adjust = a % b != 0 && ((a < 0) != (b < 0));
                Ok(Some(Self::Int(if adjust { q - 1 } else { q })))
            }
            (a, b) => {
                let divisor = b.to_f64();
                if divisor == 0.0 {
                    return Err(ExcType::zero_division("float floor division by zero"));
                }
                Ok(Some(Self::Float((a.to_f64() / divisor).floor())))
            }
        }
    }

    /// Modulo whose result takes the sign of the divisor.
    pub fn py_mod(&self, rhs: &Self) -> RunResult<Option<Self>> {
        let (Some(a), Some(b)) = (self.as_num(), rhs.as_num()) else {
            return Ok(None);
        };
        match (a, b) {
            (Num::Int(_), Num::Int(0)) => Err(ExcType::zero_division("integer division or modulo by zero")),
            (Num::Int(a), Num::Int(b)) => {
                let r = a.checked_rem(b).unwrap_or(0);
                Ok(Some(Self::Int(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })))
            }
            (a, b) => {
                let (a, b) = (a.to_f64(), b.to_f64());
                if b == 0.0 {
                    return Err(ExcType::zero_division("float modulo"));
                }
                let r = a % b;
                Ok(Some(Self::Float(if r != 0.0 && ((r < 0.0) != (b < 0.0)) { r + b } else { r })))
            }
        }
    }

    pub fn py_pow(&self, rhs: &Self) -> RunResult<Option<Self>> {
        let (Some(a), Some(b)) = (self.as_num(), rhs.as_num()) else {
            return Ok(None);
        };
        match (a, b) {
            (Num::Int(0), Num::Int(exp)) if exp < 0 => Err(ExcType::zero_division(
                "0.0 cannot be raised to a negative power",
            )),
            (Num::Int(_), Num::Int(exp)) if exp < 0 => Ok(Some(Self::Float(a.to_f64().powf(b.to_f64())))),
            (Num::Int(base), Num::Int(exp)) => {
                let exp = u32::try_from(exp).map_err(|_| ExcType::overflow("integer overflow"))?;
                int_result(base.checked_pow(exp)).map(Some)
            }
            (a, b) => {
                let (a, b) = (a.to_f64(), b.to_f64());
                if a == 0.0 && b < 0.0 {
                    return Err(ExcType::zero_division("0.0 cannot be raised to a negative power"));
                }
                Ok(Some(Self::Float(a.powf(b))))
            }
        }
    }

    pub fn py_lshift(&self, rhs: &Self) -> RunResult<Option<Self>> {
        let (Some(a), Some(b)) = (self.as_int(), rhs.as_int()) else {
            return Ok(None);
        };
        if b < 0 {
            return Err(ExcType::value_error("negative shift count"));
        }
        if a == 0 {
            return Ok(Some(Self::Int(0)));
        }
        let shifted = u32::try_from(b)
            .ok()
            .filter(|&b| b < 64)
            .map(|b| (a << b, b))
            .filter(|&(r, b)| r >> b == a)
            .map(|(r, _)| r);
        int_result(shifted).map(Some)
    }

    pub fn py_rshift(&self, rhs: &Self) -> RunResult<Option<Self>> {
        let (Some(a), Some(b)) = (self.as_int(), rhs.as_int()) else {
            return Ok(None);
        };
        if b < 0 {
            return Err(ExcType::value_error("negative shift count"));
        }
        let result = match u32::try_from(b) {
            Ok(b) if b < 64 => a >> b,
            _ if a < 0 => -1,
            _ => 0,
        };
        Ok(Some(Self::Int(result)))
    }

    /// `&`, `^` and `|`: bool with bool stays bool, otherwise integers.
    pub fn py_bitwise(&self, rhs: &Self, op: BitwiseOp) -> Option<Self> {
        if let (Self::Bool(a), Self::Bool(b)) = (self, rhs) {
            return Some(Self::Bool(match op {
                BitwiseOp::And => a & b,
                BitwiseOp::Xor => a ^ b,
                BitwiseOp::Or => a | b,
            }));
        }
        let (a, b) = (self.as_int()?, rhs.as_int()?);
        Some(Self::Int(match op {
            BitwiseOp::And => a & b,
            BitwiseOp::Xor => a ^ b,
            BitwiseOp::Or => a | b,
        }))
    }

    pub fn py_neg(&self) -> RunResult<Option<Self>> {
        match self.as_num() {
            Some(Num::Int(i)) => int_result(i.checked_neg()).map(Some),
            Some(Num::Float(f)) => Ok(Some(Self::Float(-f))),
            None => Ok(None),
        }
    }

    #[must_use]
    pub fn py_pos(&self) -> Option<Self> {
        match self.as_num()? {
            Num::Int(i) => Some(Self::Int(i)),
            Num::Float(f) => Some(Self::Float(f)),
        }
    }

    #[must_use]
    pub fn py_invert(&self) -> Option<Self> {
        self.as_int().map(|i| Self::Int(!i))
    }

    /// `self[index]`
    pub fn py_getitem(&self, index: &Self) -> RunResult<Self> {
        match self {
            Self::List(items) => {
                let items = items.borrow();
                let i = resolve_index(index, items.len(), "list")?;
                Ok(items[i].clone())
            }
            Self::Tuple(items) => {
                let i = resolve_index(index, items.len(), "tuple")?;
                Ok(items[i].clone())
            }
            Self::Str(s) => {
                let i = resolve_index(index, s.chars().count(), "string")?;
                let ch = s.chars().nth(i).unwrap_or_default();
                Ok(Self::Str(ch.to_string().into()))
            }
            Self::Range(range) => {
                let i = resolve_index(index, range.len(), "range object")?;
                range
                    .get(i)
                    .map(Self::Int)
                    .ok_or_else(|| ExcType::index_error("range object index out of range"))
            }
            _ => Err(ExcType::type_error(format!(
                "'{}' object is not subscriptable",
                self.type_name()
            ))),
        }
    }

    /// `self[index] = value`
    pub fn py_setitem(&self, index: &Self, value: Self) -> RunResult<()> {
        match self {
            Self::List(items) => {
                let mut items = items.borrow_mut();
                let i = resolve_index(index, items.len(), "list assignment")?;
                items[i] = value;
                Ok(())
            }
            _ => Err(ExcType::type_error(format!(
                "'{}' object does not support item assignment",
                self.type_name()
            ))),
        }
    }

    /// `iter(self)`; an iterator returns itself so the cursor stays shared.
    pub fn py_iter(&self) -> RunResult<Self> {
        self.iter_cursor().map(Self::Iterator)
    }

    fn iter_cursor(&self) -> RunResult<Rc<RefCell<ValueIter>>> {
        let source = match self {
            Self::Iterator(iter) => return Ok(Rc::clone(iter)),
            Self::List(items) => IterSource::List(Rc::clone(items)),
            Self::Tuple(items) => IterSource::Tuple(Rc::clone(items)),
            Self::Str(s) => IterSource::Str(Rc::clone(s)),
            Self::Range(range) => IterSource::Range(*range),
            _ => {
                return Err(ExcType::type_error(format!(
                    "'{}' object is not iterable",
                    self.type_name()
                )));
            }
        };
        Ok(Rc::new(RefCell::new(ValueIter { source, index: 0 })))
    }

    /// Drains `iter(self)` into a vector.
    ///
    /// The result size is known up front, so `tracker` can refuse it before anything is
    /// allocated.
    pub fn iter_items(&self, tracker: &impl ResourceTracker) -> RunResult<Vec<Self>> {
        let iter = self.iter_cursor()?;
        let mut iter = iter.borrow_mut();
        let len = iter.remaining();
        check_result_size(tracker, len.saturating_mul(size_of::<Self>()))?;
        let mut items = alloc_items(len)?;
        items.extend(std::iter::from_fn(|| iter.next_value()));
        Ok(items)
    }
}

/// Operator selector for [`Value::py_bitwise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitwiseOp {
    And,
    Xor,
    Or,
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.py_eq(other)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s.into())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(Rc::new(RefCell::new(items)))
    }
}

impl From<ExcType> for Value {
    fn from(kind: ExcType) -> Self {
        Self::ExcType(kind)
    }
}

fn int_result(value: Option<i64>) -> RunResult<Value> {
    value.map(Value::Int).ok_or_else(|| ExcType::overflow("integer overflow"))
}

fn seq_eq(a: &[Value], b: &[Value], depth: usize) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.eq_depth(y, depth + 1))
}

fn seq_cmp(a: &[Value], b: &[Value], op: &str) -> RunResult<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if !x.py_eq(y) {
            return x.py_cmp(y, op);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

fn result_too_large() -> SimpleException {
    ExcType::memory_error("result too large to allocate")
}

fn alloc_items(len: usize) -> RunResult<Vec<Value>> {
    let mut items = Vec::new();
    items.try_reserve_exact(len).map_err(|_| result_too_large())?;
    Ok(items)
}

fn repeat_items(items: &[Value], count: usize) -> RunResult<Vec<Value>> {
    if items.is_empty() {
        return Ok(Vec::new());
    }
    let mut out = alloc_items(items.len().checked_mul(count).ok_or_else(result_too_large)?)?;
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn repeat_str(s: &str, count: usize) -> RunResult<String> {
    if s.is_empty() {
        return Ok(String::new());
    }
    let mut out = String::new();
    out.try_reserve_exact(s.len().checked_mul(count).ok_or_else(result_too_large)?)
        .map_err(|_| result_too_large())?;
    for _ in 0..count {
        out.push_str(s);
    }
    Ok(out)
}

/// Maps a possibly negative index onto `0..len`.
fn resolve_index(index: &Value, len: usize, what: &str) -> RunResult<usize> {
    let Some(i) = index.as_int() else {
        return Err(ExcType::type_error(format!(
            "{what} indices must be integers, not {}",
            index.type_name()
        )));
    };
    let len_i = i64::try_from(len).unwrap_or(i64::MAX);
    let resolved = if i < 0 { i + len_i } else { i };
    if (0..len_i).contains(&resolved) {
        usize::try_from(resolved).map_err(|_| ExcType::index_error(format!("{what} index out of range")))
    } else {
        Err(ExcType::index_error(format!("{what} index out of range")))
    }
}

fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_owned();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let abs = f.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        let formatted = format!("{f:e}");
        let (mantissa, exp) = formatted.split_once('e').unwrap_or((&formatted, "0"));
        let (sign, digits) = match exp.strip_prefix('-') {
            Some(digits) => ('-', digits),
            None => ('+', exp),
        };
        return format!("{mantissa}e{sign}{digits:0>2}");
    }
    if f.fract() == 0.0 {
        format!("{f:.1}")
    } else {
        format!("{f}")
    }
}

fn str_repr_into(s: &str, out: &mut String) {
    let quote = if s.contains('\'') && !s.contains('"') { '"' } else { '\'' };
    out.push(quote);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{LARGE_RESULT_THRESHOLD, LimitedTracker, NoLimitTracker, ResourceLimits};

    #[test]
    fn floor_division_rounds_toward_negative_infinity() {
        let q = Value::Int(-7).py_floordiv(&Value::Int(2)).unwrap().unwrap();
        assert_eq!(q, Value::Int(-4));
        let q = Value::Int(7).py_floordiv(&Value::Int(-2)).unwrap().unwrap();
        assert_eq!(q, Value::Int(-4));
        let q = Value::Int(7).py_floordiv(&Value::Int(2)).unwrap().unwrap();
        assert_eq!(q, Value::Int(3));
    }

    #[test]
    fn modulo_takes_sign_of_divisor() {
        assert_eq!(Value::Int(-7).py_mod(&Value::Int(3)).unwrap(), Some(Value::Int(2)));
        assert_eq!(Value::Int(7).py_mod(&Value::Int(-3)).unwrap(), Some(Value::Int(-2)));
        assert_eq!(Value::Float(-1.0).py_mod(&Value::Float(3.0)).unwrap(), Some(Value::Float(2.0)));
    }

    #[test]
    fn division_by_zero_is_an_arithmetic_error() {
        let err = Value::Int(1).py_floordiv(&Value::Int(0)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::ZeroDivisionError);
        assert!(err.exc_type().is_subclass_of(ExcType::ArithmeticError));
        let err = Value::Int(1).py_truediv(&Value::Float(0.0)).unwrap_err();
        assert_eq!(err.message(), Some("division by zero"));
    }

    #[test]
    fn int_overflow_raises() {
        let err = Value::Int(i64::MAX).py_add(&Value::Int(1)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::OverflowError);
        let err = Value::Int(1).py_lshift(&Value::Int(64)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::OverflowError);
        assert_eq!(Value::Int(-8).py_rshift(&Value::Int(100)).unwrap(), Some(Value::Int(-1)));
    }

    #[test]
    fn unsupported_operands_return_none() {
        assert!(Value::Int(1).py_add(&Value::from("a")).unwrap().is_none());
        assert!(Value::None.py_sub(&Value::None).unwrap().is_none());
    }

    #[test]
    fn repr_matches_python() {
        let list = Value::from(vec![Value::Int(1), Value::from("it's"), Value::Float(2.0), Value::None]);
        assert_eq!(list.py_repr(), "[1, \"it's\", 2.0, None]");
        let single = Value::Tuple(vec![Value::Bool(true)].into());
        assert_eq!(single.py_repr(), "(True,)");
        assert_eq!(Value::Float(1e16).py_repr(), "1e+16");
        assert_eq!(Value::Float(0.5).py_repr(), "0.5");
        assert_eq!(Value::from("a\nb").py_repr(), "'a\\nb'");
    }

    #[test]
    fn self_containing_list_repr_terminates() {
        let list = Value::from(vec![]);
        if let Value::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert!(list.py_repr().contains("..."));
    }

    #[test]
    fn numeric_equality_crosses_types() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::Int(1).py_eq(&Value::from("1")));
    }

    #[test]
    fn range_iteration_and_membership() {
        let range = Range::new(10, 0, -3).unwrap();
        assert_eq!(range.len(), 4);
        let items = Value::Range(range).iter_items(&NoLimitTracker).unwrap();
        assert_eq!(items, vec![Value::Int(10), Value::Int(7), Value::Int(4), Value::Int(1)]);
        assert!(range.contains(4));
        assert!(!range.contains(5));
        assert!(Range::new(0, 1, 0).is_err());
    }

    #[test]
    fn oversized_repeats_raise_memory_error() {
        let count = Value::Int(1 << 62);
        let err = Value::from("ab").py_mult(&count).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::MemoryError);
        let err = Value::from(vec![Value::None]).py_mult(&count).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::MemoryError);
        let err = count.py_mult(&Value::Tuple(vec![Value::Int(1)].into())).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::MemoryError);

        assert_eq!(Value::from("").py_mult(&count).unwrap(), Some(Value::from("")));
        assert_eq!(Value::from("ab").py_mult(&Value::Int(-1)).unwrap(), Some(Value::from("")));
        assert_eq!(Value::from("ab").repeat_bytes(&count), Some(1_usize << 63));
        assert_eq!(Value::Int(2).repeat_bytes(&count), None);
    }

    #[test]
    fn materializing_a_huge_range_is_refused() {
        let huge = Value::Range(Range::new(0, i64::MAX, 1).unwrap());
        let err = huge.iter_items(&NoLimitTracker).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::MemoryError);
        let limited = LimitedTracker::new(ResourceLimits::new().max_result_bytes(LARGE_RESULT_THRESHOLD));
        let err = Value::Range(Range::new(0, 1_000_000, 1).unwrap())
            .iter_items(&limited)
            .unwrap_err();
        assert_eq!(err.exc_type(), ExcType::MemoryError);
    }

    #[test]
    fn negative_indices_wrap() {
        let tuple = Value::Tuple(vec![Value::Int(1), Value::Int(2)].into());
        assert_eq!(tuple.py_getitem(&Value::Int(-1)).unwrap(), Value::Int(2));
        let err = tuple.py_getitem(&Value::Int(2)).unwrap_err();
        assert_eq!(err.exc_type(), ExcType::IndexError);
    }
}
