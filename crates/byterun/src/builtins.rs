//! Builtin functions and the read-only builtin namespace every frame falls back to.

use std::{borrow::Cow, cmp::Ordering, rc::Rc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    exception::{ExcType, RunResult},
    io::PrintWriter,
    namespace::Identifier,
    resource::ResourceTracker,
    value::{Range, Value},
};

/// Positional arguments of a call; most calls fit inline.
pub(crate) type ArgValues = SmallVec<[Value; 4]>;

/// Builtin functions, named as they are bound in the builtin table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BuiltinFunction {
    Abs,
    Bool,
    Float,
    Int,
    Len,
    List,
    Max,
    Min,
    Print,
    Range,
    Repr,
    Str,
    Sum,
    Tuple,
}

impl BuiltinFunction {
    /// Calls the builtin with positional arguments.
    ///
    /// `tracker` is consulted before an iterable is materialized.
    pub(crate) fn call(
        self,
        args: ArgValues,
        print: &mut impl PrintWriter,
        tracker: &impl ResourceTracker,
    ) -> RunResult<Value> {
        match self {
            Self::Abs => {
                let [x] = exact_args::<1>(self, args)?;
                match x {
                    Value::Bool(b) => Ok(Value::Int(i64::from(b))),
                    Value::Int(i) => i.checked_abs().map(Value::Int).ok_or_else(|| ExcType::overflow("integer overflow")),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(ExcType::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                }
            }
            Self::Bool => Ok(Value::Bool(optional_arg(self, args)?.is_some_and(|v| v.truthy()))),
            Self::Float => match optional_arg(self, args)? {
                None => Ok(Value::Float(0.0)),
                Some(Value::Float(f)) => Ok(Value::Float(f)),
                Some(Value::Str(s)) => parse_float(&s),
                Some(other) => match other.as_int() {
                    Some(i) => Ok(Value::Float(i as f64)),
                    None => Err(ExcType::type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))),
                },
            },
            Self::Int => match optional_arg(self, args)? {
                None => Ok(Value::Int(0)),
                Some(Value::Float(f)) => float_to_int(f),
                Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                    ExcType::value_error(format!(
                        "invalid literal for int() with base 10: {}",
                        Value::Str(Rc::clone(&s)).py_repr()
                    ))
                }),
                Some(other) => other.as_int().map(Value::Int).ok_or_else(|| {
                    ExcType::type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))
                }),
            },
            Self::Len => {
                let [x] = exact_args::<1>(self, args)?;
                let len = x.py_len().ok_or_else(|| {
                    ExcType::type_error(format!("object of type '{}' has no len()", x.type_name()))
                })?;
                Ok(Value::Int(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            Self::List => match optional_arg(self, args)? {
                None => Ok(Value::from(Vec::new())),
                Some(iterable) => Ok(Value::from(iterable.iter_items(tracker)?)),
            },
            Self::Tuple => match optional_arg(self, args)? {
                None => Ok(Value::Tuple(Rc::from([]))),
                Some(Value::Tuple(items)) => Ok(Value::Tuple(items)),
                Some(iterable) => Ok(Value::Tuple(iterable.iter_items(tracker)?.into())),
            },
            Self::Max => extreme(self, args, Ordering::Greater, tracker),
            Self::Min => extreme(self, args, Ordering::Less, tracker),
            Self::Print => {
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        print.stdout_push(' ')?;
                    }
                    print.stdout_write(Cow::Owned(arg.py_str()))?;
                }
                print.stdout_push('\n')?;
                Ok(Value::None)
            }
            Self::Range => {
                let ints = args.iter().map(range_arg).collect::<RunResult<SmallVec<[i64; 3]>>>()?;
                let range = match ints.as_slice() {
                    [stop] => Range::new(0, *stop, 1)?,
                    [start, stop] => Range::new(*start, *stop, 1)?,
                    [start, stop, step] => Range::new(*start, *stop, *step)?,
                    _ => {
                        return Err(ExcType::type_error(format!(
                            "range expected 1 to 3 arguments, got {}",
                            ints.len()
                        )));
                    }
                };
                Ok(Value::Range(range))
            }
            Self::Repr => {
                let [x] = exact_args::<1>(self, args)?;
                Ok(Value::from(x.py_repr()))
            }
            Self::Str => match optional_arg(self, args)? {
                None => Ok(Value::from("")),
                Some(x) => Ok(Value::from(x.py_str())),
            },
            Self::Sum => {
                if args.is_empty() || args.len() > 2 {
                    return Err(ExcType::type_error(format!(
                        "sum() takes at most 2 arguments ({} given)",
                        args.len()
                    )));
                }
                let mut args = args.into_iter();
                let iterable = args.next().unwrap_or(Value::None);
                let mut total = args.next().unwrap_or(Value::Int(0));
                if let Value::Str(_) = total {
                    return Err(ExcType::type_error("sum() can't sum strings [use ''.join(seq) instead]"));
                }
                for item in iterable.iter_items(tracker)? {
                    total = total.py_add(&item)?.ok_or_else(|| {
                        ExcType::binary_type_error("+", total.type_name(), item.type_name())
                    })?;
                }
                Ok(total)
            }
        }
    }
}

fn exact_args<const N: usize>(func: BuiltinFunction, args: ArgValues) -> RunResult<[Value; N]> {
    let given = args.len();
    args.into_iter().collect::<Vec<_>>().try_into().map_err(|_| {
        if N == 1 {
            ExcType::type_error(format!("{func}() takes exactly one argument ({given} given)"))
        } else {
            ExcType::type_error(format!("{func}() takes exactly {N} arguments ({given} given)"))
        }
    })
}

fn optional_arg(func: BuiltinFunction, args: ArgValues) -> RunResult<Option<Value>> {
    if args.len() > 1 {
        return Err(ExcType::type_error(format!(
            "{func}() takes at most 1 argument ({} given)",
            args.len()
        )));
    }
    Ok(args.into_iter().next())
}

fn range_arg(value: &Value) -> RunResult<i64> {
    value.as_int().ok_or_else(|| {
        ExcType::type_error(format!(
            "'{}' object cannot be interpreted as an integer",
            value.type_name()
        ))
    })
}

/// `max`/`min`: a single argument is iterated, several are compared directly.
fn extreme(
    func: BuiltinFunction,
    args: ArgValues,
    keep: Ordering,
    tracker: &impl ResourceTracker,
) -> RunResult<Value> {
    let items = match args.len() {
        0 => {
            return Err(ExcType::type_error(format!(
                "{func} expected at least 1 argument, got 0"
            )));
        }
        1 => args[0].iter_items(tracker)?,
        _ => args.into_vec(),
    };
    let op = if keep == Ordering::Greater { ">" } else { "<" };
    let mut items = items.into_iter();
    let Some(mut best) = items.next() else {
        return Err(ExcType::value_error(format!("{func}() arg is an empty sequence")));
    };
    for item in items {
        if item.py_cmp(&best, op)? == Some(keep) {
            best = item;
        }
    }
    Ok(best)
}

fn parse_float(s: &str) -> RunResult<Value> {
    let trimmed = s.trim();
    let parsed = match trimmed.to_ascii_lowercase().as_str() {
        "inf" | "+inf" | "infinity" | "+infinity" => Some(f64::INFINITY),
        "-inf" | "-infinity" => Some(f64::NEG_INFINITY),
        "nan" | "+nan" | "-nan" => Some(f64::NAN),
        _ => trimmed.parse::<f64>().ok(),
    };
    parsed.map(Value::Float).ok_or_else(|| {
        ExcType::value_error(format!(
            "could not convert string to float: {}",
            Value::from(s).py_repr()
        ))
    })
}

#[expect(clippy::cast_possible_truncation)]
fn float_to_int(f: f64) -> RunResult<Value> {
    if f.is_nan() {
        return Err(ExcType::value_error("cannot convert float NaN to integer"));
    }
    let truncated = f.trunc();
    if truncated.is_infinite() || truncated < i64::MIN as f64 || truncated >= i64::MAX as f64 {
        return Err(ExcType::overflow("cannot convert float to integer"));
    }
    Ok(Value::Int(truncated as i64))
}

/// The read-only builtin namespace: builtin functions plus every exception class by name.
///
/// Cloning shares the table; frames inherit it by reference from their caller.
#[derive(Debug, Clone)]
pub struct BuiltinTable(Rc<IndexMap<Identifier, Value>>);

thread_local! {
    static DEFAULT_BUILTINS: BuiltinTable = BuiltinTable::build();
}

impl BuiltinTable {
    /// The process-wide default table (one per thread, since values are `!Send`).
    #[must_use]
    pub fn process_default() -> Self {
        DEFAULT_BUILTINS.with(Clone::clone)
    }

    fn build() -> Self {
        let functions = BuiltinFunction::iter().map(|f| {
            let name: &'static str = f.into();
            (Identifier::from(name), Value::Builtin(f))
        });
        let exceptions = ExcType::iter().map(|e| {
            let name: &'static str = e.into();
            (Identifier::from(name), Value::ExcType(e))
        });
        Self(Rc::new(functions.chain(exceptions).collect()))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for BuiltinTable {
    fn default() -> Self {
        Self::process_default()
    }
}
