//! Runtime values.
//!
//! Containers are reference counted and shared the way Python objects are:
//! `b = a` aliases the same list. Container drops are iterative so a deeply
//! nested value cannot exhaust the worker's stack when it is released.

use std::cell::{Ref, RefCell, RefMut};
use std::fmt::Write as _;
use std::rc::Rc;

use indexmap::IndexMap;

use super::errors::{Exception, ExceptionKind, recursion_error, type_error};
use super::format::float_repr;
use crate::executor::CancelToken;
use crate::parser::ast::FunctionDef;

/// Deepest container nesting that repr, comparison and hashing will walk.
pub const MAX_NESTED_DEPTH: usize = 200;

#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(Rc<str>),
    List(Rc<List>),
    Tuple(Rc<Tuple>),
    Dict(Rc<Dict>),
    Set(Rc<Set>),
    Range(Range),
    Function(Rc<Function>),
    Builtin(Builtin),
    Type(TypeKind),
    Method(Rc<BoundMethod>),
}

//
// ─── CONTAINERS ────────────────────────────────────────────────────────────────
//

#[derive(Debug, Default)]
pub struct List {
    items: RefCell<Vec<Value>>,
}

impl List {
    pub fn new(items: Vec<Value>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }

    pub fn borrow(&self) -> Ref<'_, Vec<Value>> {
        self.items.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Vec<Value>> {
        self.items.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn snapshot(&self) -> Vec<Value> {
        self.items.borrow().clone()
    }
}

impl Drop for List {
    fn drop(&mut self) {
        release(std::mem::take(self.items.get_mut()));
    }
}

#[derive(Debug, Default)]
pub struct Tuple {
    items: Vec<Value>,
}

impl Tuple {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }
}

impl Drop for Tuple {
    fn drop(&mut self) {
        release(std::mem::take(&mut self.items));
    }
}

/// Insertion-ordered mapping keyed by the hashable form of each key.
#[derive(Debug, Default)]
pub struct Dict {
    entries: RefCell<IndexMap<HashKey, (Value, Value)>>,
}

impl Dict {
    pub fn new(entries: IndexMap<HashKey, (Value, Value)>) -> Self {
        Self {
            entries: RefCell::new(entries),
        }
    }

    pub fn borrow(&self) -> Ref<'_, IndexMap<HashKey, (Value, Value)>> {
        self.entries.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, IndexMap<HashKey, (Value, Value)>> {
        self.entries.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn get(&self, key: &Value) -> Result<Option<Value>, Exception> {
        let hashed = key.hash_key()?;
        Ok(self.entries.borrow().get(&hashed).map(|(_, v)| v.clone()))
    }

    pub fn insert(&self, key: Value, value: Value) -> Result<(), Exception> {
        let hashed = key.hash_key()?;
        let mut entries = self.entries.borrow_mut();
        match entries.get_mut(&hashed) {
            // Python keeps the original key object on overwrite.
            Some(slot) => slot.1 = value,
            None => {
                entries.insert(hashed, (key, value));
            }
        }
        Ok(())
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.borrow().values().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries.borrow().values().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries.borrow().values().cloned().collect()
    }
}

impl Drop for Dict {
    fn drop(&mut self) {
        let pending = self
            .entries
            .get_mut()
            .drain(..)
            .flat_map(|(_, (k, v))| [k, v])
            .collect();
        release(pending);
    }
}

#[derive(Debug, Default)]
pub struct Set {
    items: RefCell<IndexMap<HashKey, Value>>,
}

impl Set {
    pub fn new(items: IndexMap<HashKey, Value>) -> Self {
        Self {
            items: RefCell::new(items),
        }
    }

    pub fn from_values(values: Vec<Value>) -> Result<Self, Exception> {
        let mut items = IndexMap::with_capacity(values.len());
        for value in values {
            items.entry(value.hash_key()?).or_insert(value);
        }
        Ok(Self::new(items))
    }

    pub fn borrow(&self) -> Ref<'_, IndexMap<HashKey, Value>> {
        self.items.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, IndexMap<HashKey, Value>> {
        self.items.borrow_mut()
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn values(&self) -> Vec<Value> {
        self.items.borrow().values().cloned().collect()
    }
}

impl Drop for Set {
    fn drop(&mut self) {
        let pending = self.items.get_mut().drain(..).map(|(_, v)| v).collect();
        release(pending);
    }
}

/// Drops `pending` without recursing into uniquely owned children.
fn release(mut pending: Vec<Value>) {
    while let Some(value) = pending.pop() {
        match value {
            Value::List(list) => {
                if let Ok(mut list) = Rc::try_unwrap(list) {
                    pending.append(list.items.get_mut());
                }
            }
            Value::Tuple(tuple) => {
                if let Ok(mut tuple) = Rc::try_unwrap(tuple) {
                    pending.append(&mut tuple.items);
                }
            }
            Value::Dict(dict) => {
                if let Ok(mut dict) = Rc::try_unwrap(dict) {
                    pending.extend(dict.entries.get_mut().drain(..).flat_map(|(_, (k, v))| [k, v]));
                }
            }
            Value::Set(set) => {
                if let Ok(mut set) = Rc::try_unwrap(set) {
                    pending.extend(set.items.get_mut().drain(..).map(|(_, v)| v));
                }
            }
            Value::Method(method) => {
                if let Ok(method) = Rc::try_unwrap(method) {
                    pending.push(method.receiver);
                }
            }
            _ => {}
        }
    }
}

//
// ─── OTHER OBJECTS ─────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub start: i128,
    pub stop: i128,
    pub step: i128,
}

impl Range {
    pub fn len(&self) -> i128 {
        let (span, step) = if self.step > 0 {
            (self.stop.saturating_sub(self.start), self.step)
        } else {
            (self.start.saturating_sub(self.stop), self.step.saturating_neg())
        };
        if span <= 0 {
            0
        } else {
            span.saturating_add(step - 1) / step
        }
    }

    pub fn get(&self, index: i128) -> Option<i128> {
        if index < 0 || index >= self.len() {
            return None;
        }
        index
            .checked_mul(self.step)
            .and_then(|offset| self.start.checked_add(offset))
    }

    pub fn contains(&self, value: i128) -> bool {
        let in_bounds = if self.step > 0 {
            self.start <= value && value < self.stop
        } else {
            self.stop < value && value <= self.start
        };
        in_bounds
            && value
                .checked_sub(self.start)
                .is_some_and(|offset| offset % self.step == 0)
    }
}

#[derive(Debug)]
pub struct Function {
    pub def: Rc<FunctionDef>,
    /// Default values, evaluated once at definition time, aligned with `def.params`.
    pub defaults: Vec<Option<Value>>,
}

#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub name: &'static str,
}

/// Functions in the capability table that are not types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    Len,
    Enumerate,
    Zip,
    Sorted,
    Reversed,
    Sum,
    Min,
    Max,
    Abs,
    Round,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::Len => "len",
            Builtin::Enumerate => "enumerate",
            Builtin::Zip => "zip",
            Builtin::Sorted => "sorted",
            Builtin::Reversed => "reversed",
            Builtin::Sum => "sum",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Abs => "abs",
            Builtin::Round => "round",
        }
    }
}

/// Result of `type(x)`. The callable ones double as conversion builtins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Function,
    BuiltinFunction,
    Method,
    Type,
}

impl TypeKind {
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::NoneType => "NoneType",
            TypeKind::Bool => "bool",
            TypeKind::Int => "int",
            TypeKind::Float => "float",
            TypeKind::Str => "str",
            TypeKind::List => "list",
            TypeKind::Tuple => "tuple",
            TypeKind::Dict => "dict",
            TypeKind::Set => "set",
            TypeKind::Range => "range",
            TypeKind::Function => "function",
            TypeKind::BuiltinFunction => "builtin_function_or_method",
            TypeKind::Method => "method",
            TypeKind::Type => "type",
        }
    }
}

/// Hashable projection of a value, used as dict key and set member.
///
/// Numbers that compare equal hash equal, so `1`, `1.0` and `True` collide
/// the way they do in Python.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    None,
    Int(i128),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Type(TypeKind),
    Builtin(Builtin),
    Identity(usize),
}

//
// ─── VALUE HELPERS ─────────────────────────────────────────────────────────────
//

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(List::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Self {
        Value::Tuple(Rc::new(Tuple::new(items)))
    }

    pub fn type_kind(&self) -> TypeKind {
        match self {
            Value::None => TypeKind::NoneType,
            Value::Bool(_) => TypeKind::Bool,
            Value::Int(_) => TypeKind::Int,
            Value::Float(_) => TypeKind::Float,
            Value::Str(_) => TypeKind::Str,
            Value::List(_) => TypeKind::List,
            Value::Tuple(_) => TypeKind::Tuple,
            Value::Dict(_) => TypeKind::Dict,
            Value::Set(_) => TypeKind::Set,
            Value::Range(_) => TypeKind::Range,
            Value::Function(_) => TypeKind::Function,
            Value::Builtin(_) => TypeKind::BuiltinFunction,
            Value::Type(_) => TypeKind::Type,
            Value::Method(_) => TypeKind::Method,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_kind().name()
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(l) => l.len() > 0,
            Value::Tuple(t) => !t.items().is_empty(),
            Value::Dict(d) => d.len() > 0,
            Value::Set(s) => s.len() > 0,
            Value::Range(r) => r.len() > 0,
            Value::Function(_) | Value::Builtin(_) | Value::Type(_) | Value::Method(_) => true,
        }
    }

    /// Integer view of `int` and `bool`.
    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i128::from(*b)),
            _ => None,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            other => other.as_int().map(|n| n as f64),
        }
    }

    /// # Errors
    ///
    /// `TypeError` for anything but `int` and `bool`.
    pub fn as_index(&self) -> Result<i128, Exception> {
        self.as_int().ok_or_else(|| {
            type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                self.type_name()
            ))
        })
    }

    pub fn hash_key(&self) -> Result<HashKey, Exception> {
        self.hash_key_at(0)
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn hash_key_at(&self, depth: usize) -> Result<HashKey, Exception> {
        if depth > MAX_NESTED_DEPTH {
            return Err(recursion_error(" while hashing"));
        }
        Ok(match self {
            Value::None => HashKey::None,
            Value::Bool(b) => HashKey::Int(i128::from(*b)),
            Value::Int(n) => HashKey::Int(*n),
            Value::Float(f) => {
                let whole = f.fract() == 0.0 && f.abs() < 1e30;
                if whole {
                    HashKey::Int(*f as i128)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Value::Str(s) => HashKey::Str(Rc::clone(s)),
            Value::Tuple(t) => HashKey::Tuple(
                t.items()
                    .iter()
                    .map(|v| v.hash_key_at(depth + 1))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Type(kind) => HashKey::Type(*kind),
            Value::Builtin(b) => HashKey::Builtin(*b),
            Value::Function(f) => HashKey::Identity(Rc::as_ptr(f) as usize),
            Value::Range(_) | Value::List(_) | Value::Dict(_) | Value::Set(_) | Value::Method(_) => {
                return Err(type_error(format!("unhashable type: '{}'", self.type_name())));
            }
        })
    }

    /// The `str()` form.
    pub fn to_str(&self) -> Result<String, Exception> {
        self.to_str_within(&ReprBudget::default())
    }

    pub fn to_str_within(&self, budget: &ReprBudget) -> Result<String, Exception> {
        match self {
            Value::Str(s) => Ok(s.to_string()),
            other => other.repr_within(budget),
        }
    }

    /// The `repr()` form. Self-containing containers print as `[...]`.
    pub fn repr(&self) -> Result<String, Exception> {
        self.repr_within(&ReprBudget::default())
    }

    /// `repr` that raises `MemoryError` once the text outgrows `budget`.
    pub fn repr_within(&self, budget: &ReprBudget) -> Result<String, Exception> {
        let mut out = String::new();
        self.write_repr(&mut out, 0, &mut Vec::new(), budget)?;
        Ok(out)
    }

    fn write_repr(
        &self,
        out: &mut String,
        depth: usize,
        seen: &mut Vec<usize>,
        budget: &ReprBudget,
    ) -> Result<(), Exception> {
        if depth > MAX_NESTED_DEPTH {
            return Err(recursion_error(" while getting the repr of an object"));
        }
        match self {
            Value::None => out.push_str("None"),
            Value::Bool(true) => out.push_str("True"),
            Value::Bool(false) => out.push_str("False"),
            Value::Int(n) => {
                let _ = write!(out, "{n}");
            }
            Value::Float(f) => out.push_str(&float_repr(*f)),
            Value::Str(s) => {
                out.push_str(&quote(s));
                budget.check(out)?;
            }
            Value::List(list) => {
                let id = Rc::as_ptr(list) as usize;
                if seen.contains(&id) {
                    out.push_str("[...]");
                    return Ok(());
                }
                seen.push(id);
                out.push('[');
                write_items(out, &list.snapshot(), depth, seen, budget)?;
                out.push(']');
                seen.pop();
            }
            Value::Tuple(tuple) => {
                out.push('(');
                write_items(out, tuple.items(), depth, seen, budget)?;
                if tuple.items().len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Value::Dict(dict) => {
                let id = Rc::as_ptr(dict) as usize;
                if seen.contains(&id) {
                    out.push_str("{...}");
                    return Ok(());
                }
                seen.push(id);
                out.push('{');
                for (i, (key, value)) in dict.items().iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    key.write_repr(out, depth + 1, seen, budget)?;
                    out.push_str(": ");
                    value.write_repr(out, depth + 1, seen, budget)?;
                    budget.check(out)?;
                }
                out.push('}');
                seen.pop();
            }
            Value::Set(set) => {
                let values = set.values();
                if values.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    write_items(out, &values, depth, seen, budget)?;
                    out.push('}');
                }
            }
            Value::Range(r) => {
                if r.step == 1 {
                    let _ = write!(out, "range({}, {})", r.start, r.stop);
                } else {
                    let _ = write!(out, "range({}, {}, {})", r.start, r.stop, r.step);
                }
            }
            Value::Function(f) => {
                let _ = write!(out, "<function {}>", f.def.name);
            }
            Value::Builtin(b) => {
                let _ = write!(out, "<built-in function {}>", b.name());
            }
            Value::Type(kind) => {
                let _ = write!(out, "<class '{}'>", kind.name());
            }
            Value::Method(m) => {
                let _ = write!(
                    out,
                    "<built-in method {} of {} object>",
                    m.name,
                    m.receiver.type_name()
                );
            }
        }
        Ok(())
    }
}

fn write_items(
    out: &mut String,
    items: &[Value],
    depth: usize,
    seen: &mut Vec<usize>,
    budget: &ReprBudget,
) -> Result<(), Exception> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.write_repr(out, depth + 1, seen, budget)?;
        budget.check(out)?;
    }
    Ok(())
}

/// Longest text a `str()` or `repr()` may produce outside a run.
pub const DEFAULT_REPR_LIMIT: usize = 100_000;

/// Bounds one rendering: its length, and the run's cancel token checked per item.
#[derive(Debug, Clone)]
pub struct ReprBudget {
    max_len: usize,
    cancel: Option<CancelToken>,
}

impl Default for ReprBudget {
    fn default() -> Self {
        Self::new(DEFAULT_REPR_LIMIT)
    }
}

impl ReprBudget {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn check(&self, out: &str) -> Result<(), Exception> {
        if self.cancel.as_ref().is_some_and(CancelToken::is_cancelled) {
            return Err(Exception::new(
                ExceptionKind::RuntimeError,
                "execution interrupted",
            ));
        }
        if out.len() > self.max_len {
            return Err(Exception::new(
                ExceptionKind::MemoryError,
                format!("text would be longer than {} characters", self.max_len),
            ));
        }
        Ok(())
    }
}

/// Quotes a string the way Python's `repr` does.
pub fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

/// `MemoryError` raised when a value would outgrow the collection limit.
pub fn check_len(len: usize, max: usize) -> Result<(), Exception> {
    if len > max {
        return Err(Exception::new(
            ExceptionKind::MemoryError,
            format!("result would hold {len} items, the limit is {max}"),
        ));
    }
    Ok(())
}
