//! Operators, comparisons, indexing and iteration over runtime values.

use std::cmp::Ordering;
use std::rc::Rc;

use super::errors::{
    Exception, ExceptionKind, index_error, overflow, recursion_error, type_error, value_error,
    zero_division,
};
use super::value::{HashKey, MAX_NESTED_DEPTH, Range, Set, Value, check_len};
use crate::parser::ast::{BinOp, CmpOp, UnaryOp};

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i128),
    Float(f64),
}

impl Num {
    #[allow(clippy::cast_precision_loss)]
    fn float(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }
}

fn num(value: &Value) -> Option<Num> {
    match value {
        Value::Float(f) => Some(Num::Float(*f)),
        other => other.as_int().map(Num::Int),
    }
}

//
// ─── ARITHMETIC ────────────────────────────────────────────────────────────────
//

/// Applies a binary operator. `max_len` caps sequences built by `+` and `*`.
pub fn binary(op: BinOp, left: &Value, right: &Value, max_len: usize) -> Result<Value, Exception> {
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        return arithmetic(op, a, b);
    }
    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), max_len)?;
            Ok(Value::Str(Rc::from(format!("{a}{b}"))))
        }
        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.snapshot();
            items.extend(b.snapshot());
            check_len(items.len(), max_len)?;
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            let mut items = a.items().to_vec();
            items.extend_from_slice(b.items());
            check_len(items.len(), max_len)?;
            Ok(Value::tuple(items))
        }
        (BinOp::Add, Value::Str(_) | Value::List(_) | Value::Tuple(_), other) => Err(type_error(format!(
            "can only concatenate {} (not \"{}\") to {}",
            left.type_name(),
            other.type_name(),
            left.type_name()
        ))),
        (BinOp::Mul, seq, count) | (BinOp::Mul, count, seq)
            if matches!(seq, Value::Str(_) | Value::List(_) | Value::Tuple(_)) =>
        {
            let times = count.as_int().ok_or_else(|| {
                type_error(format!(
                    "can't multiply sequence by non-int of type '{}'",
                    count.type_name()
                ))
            })?;
            repeat(seq, times, max_len)
        }
        (BinOp::Sub, Value::Set(a), Value::Set(b)) => {
            let other = b.borrow();
            let kept = a
                .borrow()
                .iter()
                .filter(|(key, _)| !other.contains_key(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Ok(Value::Set(Rc::new(Set::new(kept))))
        }
        _ => Err(type_error(format!(
            "unsupported operand type(s) for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn repeat(seq: &Value, times: i128, max_len: usize) -> Result<Value, Exception> {
    let times = usize::try_from(times.max(0)).unwrap_or(usize::MAX);
    let unit = match seq {
        Value::Str(s) => s.len(),
        Value::List(l) => l.len(),
        Value::Tuple(t) => t.items().len(),
        _ => 0,
    };
    check_len(unit.saturating_mul(times), max_len)?;
    Ok(match seq {
        Value::Str(s) => Value::Str(Rc::from(s.repeat(times))),
        Value::List(l) => Value::list(repeated(&l.snapshot(), times)),
        Value::Tuple(t) => Value::tuple(repeated(t.items(), times)),
        other => other.clone(),
    })
}

fn repeated(items: &[Value], times: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(items.len() * times);
    for _ in 0..times {
        out.extend_from_slice(items);
    }
    out
}

fn arithmetic(op: BinOp, a: Num, b: Num) -> Result<Value, Exception> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        return int_arithmetic(op, x, y);
    }
    let (x, y) = (a.float(), b.float());
    let result = match op {
        BinOp::Add => x + y,
        BinOp::Sub => x - y,
        BinOp::Mul => x * y,
        BinOp::Div => {
            if y == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            x / y
        }
        BinOp::FloorDiv => {
            if y == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            (x / y).floor()
        }
        BinOp::Mod => {
            if y == 0.0 {
                return Err(zero_division("float modulo"));
            }
            float_mod(x, y)
        }
        BinOp::Pow => float_pow(x, y)?,
    };
    Ok(Value::Float(result))
}

#[allow(clippy::cast_precision_loss)]
fn int_arithmetic(op: BinOp, x: i128, y: i128) -> Result<Value, Exception> {
    let result = match op {
        BinOp::Add => x.checked_add(y),
        BinOp::Sub => x.checked_sub(y),
        BinOp::Mul => x.checked_mul(y),
        BinOp::Div => {
            if y == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Value::Float(x as f64 / y as f64));
        }
        BinOp::FloorDiv => {
            if y == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            floor_div(x, y)
        }
        BinOp::Mod => {
            if y == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            floor_mod(x, y)
        }
        BinOp::Pow => {
            if y < 0 {
                return float_pow(x as f64, y as f64).map(Value::Float);
            }
            int_pow(x, y)
        }
    };
    result.map(Value::Int).ok_or_else(overflow)
}

fn floor_div(x: i128, y: i128) -> Option<i128> {
    let quotient = x.checked_div(y)?;
    let remainder = x.checked_rem(y)?;
    if remainder != 0 && (remainder < 0) != (y < 0) {
        Some(quotient - 1)
    } else {
        Some(quotient)
    }
}

fn floor_mod(x: i128, y: i128) -> Option<i128> {
    let remainder = x.checked_rem(y)?;
    if remainder != 0 && (remainder < 0) != (y < 0) {
        Some(remainder + y)
    } else {
        Some(remainder)
    }
}

fn int_pow(base: i128, exponent: i128) -> Option<i128> {
    match u32::try_from(exponent) {
        Ok(exponent) => base.checked_pow(exponent),
        Err(_) => match base {
            0 | 1 => Some(base),
            -1 => Some(if exponent % 2 == 0 { 1 } else { -1 }),
            _ => None,
        },
    }
}

fn float_mod(x: f64, y: f64) -> f64 {
    let remainder = x % y;
    if remainder != 0.0 && (remainder < 0.0) != (y < 0.0) {
        remainder + y
    } else {
        remainder
    }
}

fn float_pow(x: f64, y: f64) -> Result<f64, Exception> {
    if x == 0.0 && y < 0.0 {
        return Err(zero_division("0.0 cannot be raised to a negative power"));
    }
    if x < 0.0 && y.fract() != 0.0 {
        return Err(value_error("negative number cannot be raised to a fractional power"));
    }
    let result = x.powf(y);
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        return Err(Exception::new(
            ExceptionKind::OverflowError,
            "numerical result out of range",
        ));
    }
    Ok(result)
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, Exception> {
    match (op, num(operand)) {
        (UnaryOp::Not, _) => Ok(Value::Bool(!operand.truthy())),
        (UnaryOp::Neg, Some(Num::Int(n))) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Neg, Some(Num::Float(f))) => Ok(Value::Float(-f)),
        (UnaryOp::Pos, Some(Num::Int(n))) => Ok(Value::Int(n)),
        (UnaryOp::Pos, Some(Num::Float(f))) => Ok(Value::Float(f)),
        (UnaryOp::Neg | UnaryOp::Pos, None) => Err(type_error(format!(
            "bad operand type for unary {}: '{}'",
            if op == UnaryOp::Neg { "-" } else { "+" },
            operand.type_name()
        ))),
    }
}

//
// ─── COMPARISON ────────────────────────────────────────────────────────────────
//

pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, Exception> {
    let ordered = |symbol: &str, accept: fn(Ordering) -> bool| -> Result<bool, Exception> {
        if let (Value::Set(a), Value::Set(b)) = (left, right) {
            return Ok(set_relation(a, b, symbol));
        }
        Ok(ordering(left, right, symbol)?.is_some_and(accept))
    };
    match op {
        CmpOp::Eq => equals(left, right),
        CmpOp::NotEq => Ok(!equals(left, right)?),
        CmpOp::Lt => ordered("<", Ordering::is_lt),
        CmpOp::Le => ordered("<=", Ordering::is_le),
        CmpOp::Gt => ordered(">", Ordering::is_gt),
        CmpOp::Ge => ordered(">=", Ordering::is_ge),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => Ok(!contains(right, left)?),
        CmpOp::Is => Ok(is_same(left, right)),
        CmpOp::IsNot => Ok(!is_same(left, right)),
    }
}

fn set_relation(a: &Set, b: &Set, symbol: &str) -> bool {
    let (small, large) = match symbol {
        "<" | "<=" => (a, b),
        _ => (b, a),
    };
    let large_keys = large.borrow();
    let subset = small.borrow().keys().all(|k| large_keys.contains_key(k));
    let strict = small.len() < large.len();
    match symbol {
        "<" | ">" => subset && strict,
        _ => subset,
    }
}

pub fn equals(left: &Value, right: &Value) -> Result<bool, Exception> {
    equals_at(left, right, 0)
}

fn equals_at(left: &Value, right: &Value, depth: usize) -> Result<bool, Exception> {
    if depth > MAX_NESTED_DEPTH {
        return Err(recursion_error(" in comparison"));
    }
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        return Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => a.float() == b.float(),
        });
    }
    Ok(match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            Rc::ptr_eq(a, b) || seq_equals(&a.snapshot(), &b.snapshot(), depth)?
        }
        (Value::Tuple(a), Value::Tuple(b)) => seq_equals(a.items(), b.items(), depth)?,
        (Value::Dict(a), Value::Dict(b)) => {
            if Rc::ptr_eq(a, b) {
                return Ok(true);
            }
            if a.len() != b.len() {
                return Ok(false);
            }
            let entries: Vec<_> = a
                .borrow()
                .iter()
                .map(|(key, (_, value))| (key.clone(), value.clone()))
                .collect();
            for (key, value) in entries {
                let other = b.borrow().get(&key).map(|(_, v)| v.clone());
                match other {
                    Some(other) if equals_at(&value, &other, depth + 1)? => {}
                    _ => return Ok(false),
                }
            }
            true
        }
        (Value::Set(a), Value::Set(b)) => {
            a.len() == b.len() && {
                let other = b.borrow();
                a.borrow().keys().all(|k| other.contains_key(k))
            }
        }
        (Value::Range(a), Value::Range(b)) => {
            let len = a.len();
            len == b.len() && (len == 0 || (a.start == b.start && (len == 1 || a.step == b.step)))
        }
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Type(a), Value::Type(b)) => a == b,
        _ => false,
    })
}

fn seq_equals(a: &[Value], b: &[Value], depth: usize) -> Result<bool, Exception> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !equals_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Ordering used by `<` and friends. `None` means unordered (a NaN was involved).
pub fn ordering(left: &Value, right: &Value, symbol: &str) -> Result<Option<Ordering>, Exception> {
    ordering_at(left, right, symbol, 0)
}

fn ordering_at(left: &Value, right: &Value, symbol: &str, depth: usize) -> Result<Option<Ordering>, Exception> {
    if depth > MAX_NESTED_DEPTH {
        return Err(recursion_error(" in comparison"));
    }
    if let (Some(a), Some(b)) = (num(left), num(right)) {
        return Ok(match (a, b) {
            (Num::Int(x), Num::Int(y)) => Some(x.cmp(&y)),
            _ => a.float().partial_cmp(&b.float()),
        });
    }
    match (left, right) {
        (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => seq_ordering(&a.snapshot(), &b.snapshot(), symbol, depth),
        (Value::Tuple(a), Value::Tuple(b)) => seq_ordering(a.items(), b.items(), symbol, depth),
        _ => Err(type_error(format!(
            "'{symbol}' not supported between instances of '{}' and '{}'",
            left.type_name(),
            right.type_name()
        ))),
    }
}

fn seq_ordering(a: &[Value], b: &[Value], symbol: &str, depth: usize) -> Result<Option<Ordering>, Exception> {
    for (x, y) in a.iter().zip(b) {
        if !equals_at(x, y, depth + 1)? {
            return ordering_at(x, y, symbol, depth + 1);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

pub fn contains(container: &Value, item: &Value) -> Result<bool, Exception> {
    match container {
        Value::Str(haystack) => match item {
            Value::Str(needle) => Ok(haystack.contains(needle.as_ref())),
            other => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Value::List(list) => seq_contains(&list.snapshot(), item),
        Value::Tuple(tuple) => seq_contains(tuple.items(), item),
        Value::Dict(dict) => Ok(dict.borrow().contains_key(&item.hash_key()?)),
        Value::Set(set) => Ok(set.borrow().contains_key(&item.hash_key()?)),
        Value::Range(range) => Ok(match item {
            Value::Float(f) => {
                let as_int = Value::Float(*f).hash_key()?;
                matches!(as_int, HashKey::Int(n) if range.contains(n))
            }
            other => other.as_int().is_some_and(|n| range.contains(n)),
        }),
        other => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn seq_contains(items: &[Value], item: &Value) -> Result<bool, Exception> {
    for candidate in items {
        if is_same(candidate, item) || equals(candidate, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Identity as `is` sees it. Immutable scalars compare by value.
pub fn is_same(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
        (Value::Tuple(a), Value::Tuple(b)) => Rc::ptr_eq(a, b),
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
        (Value::Set(a), Value::Set(b)) => Rc::ptr_eq(a, b),
        (Value::Range(a), Value::Range(b)) => a == b,
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Method(a), Value::Method(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => a == b,
        (Value::Type(a), Value::Type(b)) => a == b,
        _ => false,
    }
}

/// Stable merge sort over `keys`, returning the sorted positions.
///
/// A hand-rolled merge keeps comparison errors recoverable and tolerates
/// unordered keys such as NaN.
pub fn sorted_order(keys: &[Value], reverse: bool) -> Result<Vec<usize>, Exception> {
    let before = |a: &Value, b: &Value| -> Result<bool, Exception> {
        let order = ordering(a, b, "<")?;
        Ok(if reverse {
            order == Some(Ordering::Greater)
        } else {
            order == Some(Ordering::Less)
        })
    };
    let len = keys.len();
    let mut order: Vec<usize> = (0..len).collect();
    let mut scratch = vec![0usize; len];
    let mut width = 1;
    while width < len {
        let mut start = 0;
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let (mut i, mut j, mut k) = (start, mid, start);
            while i < mid && j < end {
                if before(&keys[order[j]], &keys[order[i]])? {
                    scratch[k] = order[j];
                    j += 1;
                } else {
                    scratch[k] = order[i];
                    i += 1;
                }
                k += 1;
            }
            scratch[k..k + (mid - i)].copy_from_slice(&order[i..mid]);
            k += mid - i;
            scratch[k..k + (end - j)].copy_from_slice(&order[j..end]);
            start = end;
        }
        std::mem::swap(&mut order, &mut scratch);
        width *= 2;
    }
    Ok(order)
}

//
// ─── INDEXING ──────────────────────────────────────────────────────────────────
//

fn normalize(index: i128, len: usize) -> Option<usize> {
    let len = i128::try_from(len).ok()?;
    let index = if index < 0 { index + len } else { index };
    if (0..len).contains(&index) {
        usize::try_from(index).ok()
    } else {
        None
    }
}

fn index_of(index: &Value, container: &str) -> Result<i128, Exception> {
    index.as_int().ok_or_else(|| {
        type_error(format!(
            "{container} indices must be integers or slices, not {}",
            index.type_name()
        ))
    })
}

pub fn get_item(object: &Value, index: &Value) -> Result<Value, Exception> {
    match object {
        Value::List(list) => {
            let i = index_of(index, "list")?;
            let items = list.borrow();
            normalize(i, items.len())
                .map(|i| items[i].clone())
                .ok_or_else(|| index_error("list index out of range"))
        }
        Value::Tuple(tuple) => {
            let i = index_of(index, "tuple")?;
            normalize(i, tuple.items().len())
                .map(|i| tuple.items()[i].clone())
                .ok_or_else(|| index_error("tuple index out of range"))
        }
        Value::Str(s) => {
            let i = index_of(index, "string")?;
            let chars: Vec<char> = s.chars().collect();
            normalize(i, chars.len())
                .map(|i| Value::str(chars[i].encode_utf8(&mut [0; 4])))
                .ok_or_else(|| index_error("string index out of range"))
        }
        Value::Range(range) => {
            let i = index_of(index, "range")?;
            let i = if i < 0 { i + range.len() } else { i };
            range
                .get(i)
                .map(Value::Int)
                .ok_or_else(|| index_error("range object index out of range"))
        }
        Value::Dict(dict) => dict
            .get(index)?
            .ok_or_else(|| Exception::new(ExceptionKind::KeyError, index.repr().unwrap_or_default())),
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

pub fn set_item(object: &Value, index: Value, value: Value, max_len: usize) -> Result<(), Exception> {
    match object {
        Value::List(list) => {
            let i = index_of(&index, "list")?;
            let mut items = list.borrow_mut();
            let len = items.len();
            let slot = normalize(i, len).ok_or_else(|| index_error("list assignment index out of range"))?;
            items[slot] = value;
            Ok(())
        }
        Value::Dict(dict) => {
            check_len(dict.len() + 1, max_len)?;
            dict.insert(index, value)
        }
        other => Err(type_error(format!(
            "'{}' object does not support item assignment",
            other.type_name()
        ))),
    }
}

/// Resolves slice bounds against `len` the way Python's `slice.indices` does.
pub fn slice_indices(
    len: usize,
    lower: Option<i128>,
    upper: Option<i128>,
    step: Option<i128>,
) -> Result<(i128, i128, i128), Exception> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(value_error("slice step cannot be zero"));
    }
    let len = i128::try_from(len).unwrap_or(i128::MAX);
    let clamp = |bound: i128| -> i128 {
        if bound < 0 {
            let shifted = bound.saturating_add(len);
            if shifted < 0 {
                if step < 0 { -1 } else { 0 }
            } else {
                shifted
            }
        } else if bound >= len {
            if step < 0 { len - 1 } else { len }
        } else {
            bound
        }
    };
    let (default_start, default_stop) = if step > 0 { (0, len) } else { (len - 1, -1) };
    Ok((
        lower.map_or(default_start, clamp),
        upper.map_or(default_stop, clamp),
        step,
    ))
}

fn slice_positions(start: i128, stop: i128, step: i128) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        if let Ok(position) = usize::try_from(i) {
            positions.push(position);
        }
        i += step;
    }
    positions
}

pub fn get_slice(
    object: &Value,
    lower: Option<i128>,
    upper: Option<i128>,
    step: Option<i128>,
) -> Result<Value, Exception> {
    let pick = |items: &[Value]| -> Result<Vec<Value>, Exception> {
        let (start, stop, step) = slice_indices(items.len(), lower, upper, step)?;
        Ok(slice_positions(start, stop, step)
            .into_iter()
            .map(|i| items[i].clone())
            .collect())
    };
    match object {
        Value::List(list) => Ok(Value::list(pick(&list.borrow())?)),
        Value::Tuple(tuple) => Ok(Value::tuple(pick(tuple.items())?)),
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (start, stop, step) = slice_indices(chars.len(), lower, upper, step)?;
            let text: String = slice_positions(start, stop, step)
                .into_iter()
                .map(|i| chars[i])
                .collect();
            Ok(Value::Str(Rc::from(text)))
        }
        Value::Range(range) => {
            let len = usize::try_from(range.len()).unwrap_or(usize::MAX);
            let (start, stop, step) = slice_indices(len, lower, upper, step)?;
            let at = |i: i128| {
                i.checked_mul(range.step)
                    .and_then(|offset| range.start.checked_add(offset))
            };
            match (at(start), at(stop), range.step.checked_mul(step)) {
                (Some(start), Some(stop), Some(step)) => Ok(Value::Range(Range { start, stop, step })),
                _ => Err(overflow()),
            }
        }
        other => Err(type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

//
// ─── ITERATION ─────────────────────────────────────────────────────────────────
//

/// Iterator over the items of an iterable value.
///
/// Lists are snapshotted; ranges stay lazy so `sum(range(10**7))` does not
/// allocate.
pub enum ValueIter {
    Items(std::vec::IntoIter<Value>),
    Range { range: Range, next: i128 },
    Chars(std::vec::IntoIter<char>),
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            ValueIter::Items(items) => items.next(),
            ValueIter::Range { range, next } => {
                let value = range.get(*next)?;
                *next += 1;
                Some(Value::Int(value))
            }
            ValueIter::Chars(chars) => chars.next().map(|c| Value::str(c.encode_utf8(&mut [0; 4]))),
        }
    }
}

pub fn iterate(value: &Value) -> Result<ValueIter, Exception> {
    Ok(match value {
        Value::List(list) => ValueIter::Items(list.snapshot().into_iter()),
        Value::Tuple(tuple) => ValueIter::Items(tuple.items().to_vec().into_iter()),
        Value::Dict(dict) => ValueIter::Items(dict.keys().into_iter()),
        Value::Set(set) => ValueIter::Items(set.values().into_iter()),
        Value::Str(s) => ValueIter::Chars(s.chars().collect::<Vec<_>>().into_iter()),
        Value::Range(range) => ValueIter::Range {
            range: *range,
            next: 0,
        },
        other => {
            return Err(type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            )));
        }
    })
}

/// Materializes an iterable, refusing to build more than `max_len` items.
pub fn collect(value: &Value, max_len: usize) -> Result<Vec<Value>, Exception> {
    if let Value::Range(range) = value {
        check_len(usize::try_from(range.len()).unwrap_or(usize::MAX), max_len)?;
    }
    Ok(iterate(value)?.collect())
}
