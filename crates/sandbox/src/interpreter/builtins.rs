//! The capability table and the builtin functions it exposes.

use std::collections::HashMap;
use std::rc::Rc;

use super::errors::{Exception, ExceptionKind, overflow, type_error, value_error};
use super::ops;
use super::value::{Builtin, Dict, Range, Set, TypeKind, Value, check_len, quote};
use super::{Eval, Interpreter};
use crate::config::Denylist;
use crate::parser::ast::BinOp;

const BUILTINS: &[Builtin] = &[
    Builtin::Print,
    Builtin::Len,
    Builtin::Enumerate,
    Builtin::Zip,
    Builtin::Sorted,
    Builtin::Reversed,
    Builtin::Sum,
    Builtin::Min,
    Builtin::Max,
    Builtin::Abs,
    Builtin::Round,
];

const TYPES: &[TypeKind] = &[
    TypeKind::Str,
    TypeKind::Int,
    TypeKind::Float,
    TypeKind::Bool,
    TypeKind::List,
    TypeKind::Dict,
    TypeKind::Tuple,
    TypeKind::Set,
    TypeKind::Range,
    TypeKind::Type,
];

/// Every global name a snippet can reach without defining it.
#[derive(Debug)]
pub(super) struct Capabilities {
    names: HashMap<&'static str, Value>,
}

impl Capabilities {
    /// The standard table minus anything the denylist names.
    pub(super) fn standard(denylist: &Denylist) -> Self {
        let mut names: HashMap<&'static str, Value> = BUILTINS
            .iter()
            .map(|b| (b.name(), Value::Builtin(*b)))
            .chain(TYPES.iter().map(|t| (t.name(), Value::Type(*t))))
            .collect();
        names.retain(|name, _| !denylist.denies_builtin(name));
        Self { names }
    }

    pub(super) fn get(&self, name: &str) -> Option<&Value> {
        self.names.get(name)
    }
}

//
// ─── ARGUMENT HELPERS ──────────────────────────────────────────────────────────
//

pub(super) fn arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), Exception> {
    let given = args.len();
    if (min..=max).contains(&given) {
        return Ok(());
    }
    let s = |n: usize| if n == 1 { "" } else { "s" };
    Err(type_error(if min == max {
        format!("{name}() takes exactly {min} argument{} ({given} given)", s(min))
    } else if given < min {
        format!("{name} expected at least {min} argument{}, got {given}", s(min))
    } else {
        format!("{name} expected at most {max} argument{}, got {given}", s(max))
    }))
}

pub(super) fn no_kwargs(name: &str, kwargs: &[(String, Value)]) -> Result<(), Exception> {
    if kwargs.is_empty() {
        Ok(())
    } else {
        Err(type_error(format!("{name}() takes no keyword arguments")))
    }
}

/// Removes `key` from `kwargs`, returning its value.
pub(super) fn take_kwarg(kwargs: &mut Vec<(String, Value)>, key: &str) -> Option<Value> {
    let position = kwargs.iter().position(|(k, _)| k == key)?;
    Some(kwargs.remove(position).1)
}

pub(super) fn no_leftover(name: &str, kwargs: &[(String, Value)]) -> Result<(), Exception> {
    match kwargs.first() {
        Some((key, _)) => Err(type_error(format!(
            "'{key}' is an invalid keyword argument for {name}()"
        ))),
        None => Ok(()),
    }
}

fn optional_str(name: &str, value: Option<Value>, default: &str) -> Result<String, Exception> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => Err(type_error(format!(
            "{name} must be None or a string, not {}",
            other.type_name()
        ))),
    }
}

//
// ─── BUILTIN FUNCTIONS ─────────────────────────────────────────────────────────
//

impl Interpreter {
    pub(super) fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        let name = builtin.name();
        match builtin {
            Builtin::Print => {
                let sep = optional_str("sep", take_kwarg(&mut kwargs, "sep"), " ")?;
                let end = optional_str("end", take_kwarg(&mut kwargs, "end"), "\n")?;
                no_leftover(name, &kwargs)?;
                let budget = self.repr_budget();
                let mut line = String::new();
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        line.push_str(&sep);
                    }
                    line.push_str(&arg.to_str_within(&budget)?);
                }
                line.push_str(&end);
                self.output.write(&line)?;
                Ok(Value::None)
            }
            Builtin::Len => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(l) => l.len(),
                    Value::Tuple(t) => t.items().len(),
                    Value::Dict(d) => d.len(),
                    Value::Set(s) => s.len(),
                    Value::Range(r) => usize::try_from(r.len()).map_err(|_| overflow())?,
                    other => {
                        return Err(type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        ))
                        .into());
                    }
                };
                Ok(Value::Int(i128::try_from(len).map_err(|_| overflow())?))
            }
            Builtin::Enumerate => {
                let start = take_kwarg(&mut kwargs, "start");
                no_leftover(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let mut index = match args.get(1).cloned().or(start) {
                    Some(value) => value.as_index()?,
                    None => 0,
                };
                let mut pairs = Vec::new();
                for item in ops::iterate(&args[0])? {
                    self.guard.tick()?;
                    pairs.push(Value::tuple(vec![Value::Int(index), item]));
                    check_len(pairs.len(), self.max_len)?;
                    index = index.checked_add(1).ok_or_else(overflow)?;
                }
                Ok(Value::list(pairs))
            }
            Builtin::Zip => {
                no_kwargs(name, &kwargs)?;
                let mut iterators = args
                    .iter()
                    .map(ops::iterate)
                    .collect::<Result<Vec<_>, _>>()?;
                let mut rows = Vec::new();
                if iterators.is_empty() {
                    return Ok(Value::list(rows));
                }
                'rows: loop {
                    self.guard.tick()?;
                    let mut row = Vec::with_capacity(iterators.len());
                    for iterator in &mut iterators {
                        match iterator.next() {
                            Some(item) => row.push(item),
                            None => break 'rows,
                        }
                    }
                    rows.push(Value::tuple(row));
                    check_len(rows.len(), self.max_len)?;
                }
                Ok(Value::list(rows))
            }
            Builtin::Sorted => {
                let key = take_kwarg(&mut kwargs, "key");
                let reverse = take_kwarg(&mut kwargs, "reverse");
                no_leftover(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                let items = ops::collect(&args[0], self.max_len)?;
                Ok(Value::list(self.sort_items(items, key, reverse)?))
            }
            Builtin::Reversed => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) | Value::Dict(_) => {
                        let mut items = ops::collect(&args[0], self.max_len)?;
                        items.reverse();
                        Ok(Value::list(items))
                    }
                    other => Err(type_error(format!(
                        "'{}' object is not reversible",
                        other.type_name()
                    ))
                    .into()),
                }
            }
            Builtin::Sum => {
                let start = take_kwarg(&mut kwargs, "start");
                no_leftover(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let mut total = args.get(1).cloned().or(start).unwrap_or(Value::Int(0));
                if matches!(total, Value::Str(_)) {
                    return Err(type_error("sum() can't sum strings [use ''.join(seq) instead]").into());
                }
                for item in ops::iterate(&args[0])? {
                    self.guard.tick()?;
                    total = ops::binary(BinOp::Add, &total, &item, self.max_len)?;
                }
                Ok(total)
            }
            Builtin::Min | Builtin::Max => self.extreme(builtin, args, kwargs),
            Builtin::Abs => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 1)?;
                match &args[0] {
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => match other.as_int() {
                        Some(n) => Ok(Value::Int(n.checked_abs().ok_or_else(overflow)?)),
                        None => Err(type_error(format!(
                            "bad operand type for abs(): '{}'",
                            other.type_name()
                        ))
                        .into()),
                    },
                }
            }
            Builtin::Round => {
                let ndigits = take_kwarg(&mut kwargs, "ndigits");
                no_leftover(name, &kwargs)?;
                arity(name, &args, 1, 2)?;
                let ndigits = match args.get(1).cloned().or(ndigits) {
                    None | Some(Value::None) => None,
                    Some(value) => Some(value.as_index()?),
                };
                Ok(round(&args[0], ndigits)?)
            }
        }
    }

    /// Sorts `items`, calling `key` once per item when given.
    pub(super) fn sort_items(
        &mut self,
        items: Vec<Value>,
        key: Option<Value>,
        reverse: Option<Value>,
    ) -> Eval<Vec<Value>> {
        let reverse = reverse.is_some_and(|r| r.truthy());
        let keys = match key {
            None | Some(Value::None) => items.clone(),
            Some(key) => {
                let mut keys = Vec::with_capacity(items.len());
                for item in &items {
                    self.guard.tick()?;
                    keys.push(self.call(&key, vec![item.clone()], Vec::new())?);
                }
                keys
            }
        };
        let order = ops::sorted_order(&keys, reverse)?;
        Ok(order.into_iter().map(|i| items[i].clone()).collect())
    }

    fn extreme(&mut self, builtin: Builtin, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> Eval<Value> {
        let name = builtin.name();
        let key = take_kwarg(&mut kwargs, "key");
        let default = take_kwarg(&mut kwargs, "default");
        no_leftover(name, &kwargs)?;
        arity(name, &args, 1, usize::MAX)?;
        let candidates = if args.len() == 1 {
            ops::collect(&args[0], self.max_len)?
        } else {
            args
        };
        let wanted = if builtin == Builtin::Min {
            std::cmp::Ordering::Less
        } else {
            std::cmp::Ordering::Greater
        };
        let mut best: Option<(Value, Value)> = None;
        for candidate in candidates {
            self.guard.tick()?;
            let rank = match &key {
                None | Some(Value::None) => candidate.clone(),
                Some(key) => self.call(key, vec![candidate.clone()], Vec::new())?,
            };
            let replace = match &best {
                None => true,
                Some((best_rank, _)) => {
                    let symbol = if wanted == std::cmp::Ordering::Less { "<" } else { ">" };
                    ops::ordering(&rank, best_rank, symbol)? == Some(wanted)
                }
            };
            if replace {
                best = Some((rank, candidate));
            }
        }
        match (best, default) {
            (Some((_, value)), _) => Ok(value),
            (None, Some(default)) => Ok(default),
            (None, None) => Err(value_error(format!("{name}() arg is an empty sequence")).into()),
        }
    }

    //
    // ─── TYPE CONSTRUCTORS ─────────────────────────────────────────────────────
    //

    pub(super) fn construct(&mut self, kind: TypeKind, args: Vec<Value>, mut kwargs: Vec<(String, Value)>) -> Eval<Value> {
        let name = kind.name();
        match kind {
            TypeKind::Int => {
                let base = take_kwarg(&mut kwargs, "base");
                no_leftover(name, &kwargs)?;
                arity(name, &args, 0, 2)?;
                let base = args.get(1).cloned().or(base);
                match args.first() {
                    None => Ok(Value::Int(0)),
                    Some(value) => Ok(Value::Int(to_int(value, base)?)),
                }
            }
            TypeKind::Float => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::Float(0.0)),
                    Some(value) => Ok(Value::Float(to_float(value)?)),
                }
            }
            TypeKind::Str => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                match args.first() {
                    None => Ok(Value::str("")),
                    Some(value) => Ok(Value::str(&value.to_str_within(&self.repr_budget())?)),
                }
            }
            TypeKind::Bool => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
            }
            TypeKind::List | TypeKind::Tuple | TypeKind::Set => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 0, 1)?;
                let items = match args.first() {
                    None => Vec::new(),
                    Some(value) => ops::collect(value, self.max_len)?,
                };
                Ok(match kind {
                    TypeKind::List => Value::list(items),
                    TypeKind::Tuple => Value::tuple(items),
                    _ => Value::Set(Rc::new(Set::from_values(items)?)),
                })
            }
            TypeKind::Dict => {
                arity(name, &args, 0, 1)?;
                let dict = Dict::default();
                if let Some(source) = args.first() {
                    self.update_dict(&dict, source)?;
                }
                for (key, value) in kwargs {
                    dict.insert(Value::str(&key), value)?;
                }
                check_len(dict.len(), self.max_len)?;
                Ok(Value::Dict(Rc::new(dict)))
            }
            TypeKind::Range => {
                no_kwargs(name, &kwargs)?;
                arity(name, &args, 1, 3)?;
                let bounds = args.iter().map(Value::as_index).collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(type_error("range expected at most 3 arguments").into()),
                };
                if step == 0 {
                    return Err(value_error("range() arg 3 must not be zero").into());
                }
                Ok(Value::Range(Range { start, stop, step }))
            }
            TypeKind::Type => {
                no_kwargs(name, &kwargs)?;
                if args.len() != 1 {
                    return Err(type_error("type() takes 1 argument").into());
                }
                Ok(Value::Type(args[0].type_kind()))
            }
            other => Err(type_error(format!("cannot create '{}' instances", other.name())).into()),
        }
    }

    /// Merges a mapping or an iterable of pairs into `dict`.
    pub(super) fn update_dict(&mut self, dict: &Dict, source: &Value) -> Eval<()> {
        if let Value::Dict(other) = source {
            for (key, value) in other.items() {
                dict.insert(key, value)?;
            }
            return Ok(());
        }
        for (i, item) in ops::iterate(source)?.enumerate() {
            self.guard.tick()?;
            let pair = ops::collect(&item, self.max_len)?;
            let [key, value] = <[Value; 2]>::try_from(pair).map_err(|pair| {
                value_error(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    pair.len()
                ))
            })?;
            dict.insert(key, value)?;
            check_len(dict.len(), self.max_len)?;
        }
        Ok(())
    }
}

//
// ─── CONVERSIONS ───────────────────────────────────────────────────────────────
//

#[allow(clippy::cast_possible_truncation)]
fn float_to_int(f: f64) -> Result<i128, Exception> {
    if f.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    if f.is_infinite() {
        return Err(Exception::new(
            ExceptionKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    if f.abs() >= 1.7e38 {
        return Err(overflow());
    }
    Ok(f as i128)
}

fn to_int(value: &Value, base: Option<Value>) -> Result<i128, Exception> {
    let text = match (value, base) {
        (Value::Str(s), None) => return parse_int(s, 10),
        (Value::Str(s), Some(base)) => {
            let base = base.as_index()?;
            let base = u32::try_from(base)
                .ok()
                .filter(|b| (2..=36).contains(b))
                .ok_or_else(|| value_error("int() base must be >= 2 and <= 36"))?;
            return parse_int(s, base);
        }
        (_, Some(_)) => return Err(type_error("int() can't convert non-string with explicit base")),
        (Value::Float(f), None) => return float_to_int(*f),
        (other, None) => other,
    };
    text.as_int().ok_or_else(|| {
        type_error(format!(
            "int() argument must be a string or a number, not '{}'",
            text.type_name()
        ))
    })
}

fn parse_int(text: &str, base: u32) -> Result<i128, Exception> {
    let invalid = || {
        value_error(format!(
            "invalid literal for int() with base {base}: {}",
            quote(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let prefix = match base {
        16 => Some("0x"),
        8 => Some("0o"),
        2 => Some("0b"),
        _ => None,
    };
    let digits = prefix
        .and_then(|p| digits.strip_prefix(p).or_else(|| digits.strip_prefix(&p.to_uppercase())))
        .unwrap_or(digits);
    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__") {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if cleaned.starts_with(['+', '-']) {
        return Err(invalid());
    }
    let magnitude = i128::from_str_radix(&cleaned, base).map_err(|err| match err.kind() {
        std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow => overflow(),
        _ => invalid(),
    })?;
    Ok(if negative { -magnitude } else { magnitude })
}

fn to_float(value: &Value) -> Result<f64, Exception> {
    match value {
        Value::Str(s) => {
            let cleaned = s.trim();
            cleaned
                .parse::<f64>()
                .ok()
                .filter(|_| !cleaned.contains('_'))
                .ok_or_else(|| {
                    value_error(format!(
                        "could not convert string to float: {}",
                        quote(s)
                    ))
                })
        }
        other => other.as_float().ok_or_else(|| {
            type_error(format!(
                "float() argument must be a string or a real number, not '{}'",
                other.type_name()
            ))
        }),
    }
}

/// Python's `round`, with ties going to the even neighbour.
fn round(value: &Value, ndigits: Option<i128>) -> Result<Value, Exception> {
    match (value, ndigits) {
        (Value::Float(f), None) => float_to_int(f.round_ties_even()).map(Value::Int),
        (Value::Float(f), Some(digits)) => {
            let digits = i32::try_from(digits.clamp(-400, 400)).unwrap_or(0);
            let scale = 10f64.powi(digits);
            let scaled = f * scale;
            if !scaled.is_finite() || scale == 0.0 {
                return Ok(Value::Float(if scale == 0.0 { 0.0 } else { *f }));
            }
            Ok(Value::Float(scaled.round_ties_even() / scale))
        }
        (other, digits) => {
            let n = other.as_int().ok_or_else(|| {
                type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                ))
            })?;
            match digits {
                Some(digits) if digits < 0 => Ok(Value::Int(round_int(n, digits))),
                _ => Ok(Value::Int(n)),
            }
        }
    }
}

fn round_int(n: i128, digits: i128) -> i128 {
    let Some(unit) = u32::try_from(-digits).ok().and_then(|d| 10i128.checked_pow(d)) else {
        return 0;
    };
    let remainder = n.rem_euclid(unit);
    let base = n - remainder;
    let round_up = remainder * 2 > unit || (remainder * 2 == unit && (base / unit) % 2 != 0);
    if round_up { base.saturating_add(unit) } else { base }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denylisted_names_are_removed_from_the_table() {
        let table = Capabilities::standard(&Denylist::default().with_builtins(["sorted"]));
        assert!(table.get("sorted").is_none());
        assert!(table.get("print").is_some());
        assert!(table.get("open").is_none());
        assert!(matches!(table.get("int"), Some(Value::Type(TypeKind::Int))));
    }

    #[test]
    fn int_parsing() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("0xff", 16).unwrap(), 255);
        let err = parse_int("4.5", 10).unwrap_err();
        assert_eq!(err.message, "invalid literal for int() with base 10: '4.5'");
    }

    #[test]
    fn rounding_matches_python() {
        assert_eq!(round(&Value::Float(2.5), None).unwrap().repr().unwrap(), "2");
        assert_eq!(round(&Value::Float(3.5), None).unwrap().repr().unwrap(), "4");
        assert_eq!(round(&Value::Float(2.675), Some(2)).unwrap().repr().unwrap(), "2.67");
        assert_eq!(round(&Value::Int(1250), Some(-2)).unwrap().repr().unwrap(), "1200");
        assert_eq!(round(&Value::Int(1351), Some(-2)).unwrap().repr().unwrap(), "1400");
    }

    #[test]
    fn arity_messages() {
        let err = arity("len", &[], 1, 1).unwrap_err();
        assert_eq!(err.message, "len() takes exactly 1 argument (0 given)");
    }
}
