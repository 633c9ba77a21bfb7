//! Methods on the built-in container and string types.

use std::rc::Rc;

use indexmap::IndexMap;

use super::builtins::{arity, no_kwargs, no_leftover, take_kwarg};
use super::errors::{Exception, ExceptionKind, index_error, type_error, value_error};
use super::format::format_template;
use super::ops;
use super::value::{Dict, List, Set, Value, check_len};
use super::{Eval, Interpreter};

const STR_METHODS: &[&str] = &[
    "upper", "lower", "strip", "lstrip", "rstrip", "split", "join", "replace", "startswith",
    "endswith", "find", "index", "count", "title", "capitalize", "isdigit", "isalpha", "isalnum",
    "isspace", "isupper", "islower", "format", "zfill", "center", "ljust", "rjust", "splitlines",
];

const LIST_METHODS: &[&str] = &[
    "append", "extend", "insert", "pop", "remove", "index", "count", "sort", "reverse", "copy",
    "clear",
];

const DICT_METHODS: &[&str] = &[
    "get", "keys", "values", "items", "pop", "update", "setdefault", "copy", "clear",
];

const SET_METHODS: &[&str] = &[
    "add", "remove", "discard", "union", "intersection", "difference", "copy", "clear",
];

/// The interned method name when `receiver` has a method called `name`.
pub(super) fn method_name(receiver: &Value, name: &str) -> Option<&'static str> {
    let table = match receiver {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        _ => return None,
    };
    table.iter().find(|m| **m == name).copied()
}

fn str_arg<'a>(method: &str, value: &'a Value) -> Result<&'a str, Exception> {
    match value {
        Value::Str(s) => Ok(s),
        other => Err(type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        ))),
    }
}

fn char_index(text: &str, byte_offset: usize) -> i128 {
    i128::try_from(text[..byte_offset].chars().count()).unwrap_or(i128::MAX)
}

fn int(n: usize) -> Value {
    Value::Int(i128::try_from(n).unwrap_or(i128::MAX))
}

impl Interpreter {
    pub(super) fn call_method(
        &mut self,
        receiver: &Value,
        name: &'static str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        match receiver {
            Value::Str(s) => self.str_method(s, name, args, kwargs),
            Value::List(list) => self.list_method(list, name, args, kwargs),
            Value::Dict(dict) => self.dict_method(dict, name, args, kwargs),
            Value::Set(set) => Ok(self.set_method(set, name, args, &kwargs)?),
            other => Err(Exception::new(
                ExceptionKind::AttributeError,
                format!("'{}' object has no attribute '{name}'", other.type_name()),
            )
            .into()),
        }
    }

    //
    // ─── STR ───────────────────────────────────────────────────────────────────
    //

    #[allow(clippy::too_many_lines)]
    fn str_method(
        &mut self,
        s: &Rc<str>,
        name: &'static str,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if name == "format" {
            let text = format_template(s, &args, &kwargs, &self.repr_budget())?;
            check_len(text.len(), self.max_len)?;
            return Ok(Value::str(&text));
        }
        if name == "split" {
            let sep = take_kwarg(&mut kwargs, "sep");
            let maxsplit = take_kwarg(&mut kwargs, "maxsplit");
            no_leftover(name, &kwargs)?;
            arity(name, &args, 0, 2)?;
            let sep = args.first().cloned().or(sep);
            let maxsplit = match args.get(1).cloned().or(maxsplit) {
                Some(value) => value.as_index()?,
                None => -1,
            };
            return Ok(Value::list(split(s, sep.as_ref(), maxsplit)?));
        }
        no_kwargs(name, &kwargs)?;
        let text: &str = s;
        let value = match name {
            "upper" | "lower" | "title" | "capitalize" | "splitlines" => {
                arity(name, &args, 0, 0)?;
                match name {
                    "upper" => Value::str(&text.to_uppercase()),
                    "lower" => Value::str(&text.to_lowercase()),
                    "title" => Value::str(&title_case(text)),
                    "capitalize" => {
                        let mut chars = text.chars();
                        let capitalized: String = match chars.next() {
                            Some(first) => first.to_uppercase().chain(chars.as_str().to_lowercase().chars()).collect(),
                            None => String::new(),
                        };
                        Value::str(&capitalized)
                    }
                    _ => Value::list(text.lines().map(Value::str).collect()),
                }
            }
            "strip" | "lstrip" | "rstrip" => {
                arity(name, &args, 0, 1)?;
                let chars = match args.first() {
                    None | Some(Value::None) => None,
                    Some(value) => Some(str_arg(name, value)?.to_string()),
                };
                let matches = |c: char| match &chars {
                    Some(set) => set.contains(c),
                    None => c.is_whitespace(),
                };
                Value::str(match name {
                    "strip" => text.trim_matches(matches),
                    "lstrip" => text.trim_start_matches(matches),
                    _ => text.trim_end_matches(matches),
                })
            }
            "join" => {
                arity(name, &args, 1, 1)?;
                let mut joined = String::new();
                for (i, item) in ops::iterate(&args[0])?.enumerate() {
                    self.guard.tick()?;
                    let Value::Str(part) = &item else {
                        return Err(type_error(format!(
                            "sequence item {i}: expected str instance, {} found",
                            item.type_name()
                        ))
                        .into());
                    };
                    if i > 0 {
                        joined.push_str(text);
                    }
                    joined.push_str(part);
                    check_len(joined.len(), self.max_len)?;
                }
                Value::str(&joined)
            }
            "replace" => {
                arity(name, &args, 2, 3)?;
                let old = str_arg(name, &args[0])?;
                let new = str_arg(name, &args[1])?;
                let limit = match args.get(2) {
                    Some(count) => usize::try_from(count.as_index()?).ok(),
                    None => None,
                };
                let occurrences = if old.is_empty() {
                    text.chars().count() + 1
                } else {
                    text.matches(old).count()
                };
                let replaced = limit.map_or(occurrences, |l| l.min(occurrences));
                let grown = text.len() + replaced * new.len();
                check_len(grown.saturating_sub(replaced * old.len()), self.max_len)?;
                Value::str(&match limit {
                    Some(limit) => text.replacen(old, new, limit),
                    None => text.replace(old, new),
                })
            }
            "startswith" | "endswith" => {
                arity(name, &args, 1, 1)?;
                let candidates: Vec<Value> = match &args[0] {
                    Value::Tuple(t) => t.items().to_vec(),
                    other => vec![other.clone()],
                };
                let mut found = false;
                for candidate in &candidates {
                    let affix = str_arg(name, candidate)?;
                    found |= if name == "startswith" {
                        text.starts_with(affix)
                    } else {
                        text.ends_with(affix)
                    };
                }
                Value::Bool(found)
            }
            "find" | "index" => {
                arity(name, &args, 1, 1)?;
                let needle = str_arg(name, &args[0])?;
                match text.find(needle) {
                    Some(offset) => Value::Int(char_index(text, offset)),
                    None if name == "find" => Value::Int(-1),
                    None => return Err(value_error("substring not found").into()),
                }
            }
            "count" => {
                arity(name, &args, 1, 1)?;
                let needle = str_arg(name, &args[0])?;
                if needle.is_empty() {
                    int(text.chars().count() + 1)
                } else {
                    int(text.matches(needle).count())
                }
            }
            "isdigit" | "isalpha" | "isalnum" | "isspace" => {
                arity(name, &args, 0, 0)?;
                let test: fn(char) -> bool = match name {
                    "isdigit" => char::is_numeric,
                    "isalpha" => char::is_alphabetic,
                    "isalnum" => char::is_alphanumeric,
                    _ => char::is_whitespace,
                };
                Value::Bool(!text.is_empty() && text.chars().all(test))
            }
            "isupper" | "islower" => {
                arity(name, &args, 0, 0)?;
                let has_upper = text.chars().any(char::is_uppercase);
                let has_lower = text.chars().any(char::is_lowercase);
                Value::Bool(if name == "isupper" {
                    has_upper && !has_lower
                } else {
                    has_lower && !has_upper
                })
            }
            "zfill" => {
                arity(name, &args, 1, 1)?;
                let width = self.width(&args[0])?;
                let len = text.chars().count();
                if width <= len {
                    Value::str(text)
                } else {
                    let (sign, digits) = match text.strip_prefix(['+', '-']) {
                        Some(rest) => (&text[..1], rest),
                        None => ("", text),
                    };
                    Value::str(&format!("{sign}{}{digits}", "0".repeat(width - len)))
                }
            }
            "center" | "ljust" | "rjust" => {
                arity(name, &args, 1, 2)?;
                let width = self.width(&args[0])?;
                let fill = match args.get(1) {
                    None => ' ',
                    Some(value) => {
                        let fill = str_arg(name, value)?;
                        let mut chars = fill.chars();
                        match (chars.next(), chars.next()) {
                            (Some(c), None) => c,
                            _ => {
                                return Err(type_error(
                                    "The fill character must be exactly one character long",
                                )
                                .into());
                            }
                        }
                    }
                };
                let len = text.chars().count();
                let pad = width.saturating_sub(len);
                let (left, right) = match name {
                    "ljust" => (0, pad),
                    "rjust" => (pad, 0),
                    _ => {
                        let left = pad / 2 + (pad & width & 1);
                        (left, pad - left)
                    }
                };
                let fill = fill.to_string();
                Value::str(&format!("{}{text}{}", fill.repeat(left), fill.repeat(right)))
            }
            _ => return Err(attribute_error("str", name).into()),
        };
        Ok(value)
    }

    fn width(&self, value: &Value) -> Result<usize, Exception> {
        let width = usize::try_from(value.as_index()?.max(0)).unwrap_or(usize::MAX);
        check_len(width, self.max_len)?;
        Ok(width)
    }

    //
    // ─── LIST ──────────────────────────────────────────────────────────────────
    //

    fn list_method(
        &mut self,
        list: &Rc<List>,
        name: &'static str,
        args: Vec<Value>,
        mut kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if name == "sort" {
            let key = take_kwarg(&mut kwargs, "key");
            let reverse = take_kwarg(&mut kwargs, "reverse");
            no_leftover(name, &kwargs)?;
            arity(name, &args, 0, 0)?;
            let sorted = self.sort_items(list.snapshot(), key, reverse)?;
            *list.borrow_mut() = sorted;
            return Ok(Value::None);
        }
        no_kwargs(name, &kwargs)?;
        match name {
            "append" => {
                arity(name, &args, 1, 1)?;
                check_len(list.len() + 1, self.max_len)?;
                list.borrow_mut().extend(args);
            }
            "extend" => {
                arity(name, &args, 1, 1)?;
                let items = ops::collect(&args[0], self.max_len)?;
                check_len(list.len() + items.len(), self.max_len)?;
                list.borrow_mut().extend(items);
            }
            "insert" => {
                arity(name, &args, 2, 2)?;
                check_len(list.len() + 1, self.max_len)?;
                let index = args[0].as_index()?;
                let mut items = list.borrow_mut();
                let len = i128::try_from(items.len()).unwrap_or(i128::MAX);
                let position = if index < 0 { (index + len).max(0) } else { index.min(len) };
                let position = usize::try_from(position).unwrap_or(0);
                items.insert(position, args[1].clone());
            }
            "pop" => {
                arity(name, &args, 0, 1)?;
                let index = match args.first() {
                    Some(value) => value.as_index()?,
                    None => -1,
                };
                let mut items = list.borrow_mut();
                if items.is_empty() {
                    return Err(index_error("pop from empty list").into());
                }
                let len = i128::try_from(items.len()).unwrap_or(i128::MAX);
                let position = if index < 0 { index + len } else { index };
                let position = usize::try_from(position)
                    .ok()
                    .filter(|p| *p < items.len())
                    .ok_or_else(|| index_error("pop index out of range"))?;
                return Ok(items.remove(position));
            }
            "remove" | "index" | "count" => {
                arity(name, &args, 1, 1)?;
                let items = list.snapshot();
                let mut positions = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    if ops::is_same(item, &args[0]) || ops::equals(item, &args[0])? {
                        positions.push(i);
                        if name != "count" {
                            break;
                        }
                    }
                }
                match (name, positions.first()) {
                    ("count", _) => return Ok(int(positions.len())),
                    ("index", Some(i)) => return Ok(int(*i)),
                    ("remove", Some(i)) => {
                        list.borrow_mut().remove(*i);
                    }
                    ("index", None) => {
                        return Err(value_error(format!("{} is not in list", args[0].repr()?)).into());
                    }
                    _ => return Err(value_error("list.remove(x): x not in list").into()),
                }
            }
            "reverse" => {
                arity(name, &args, 0, 0)?;
                list.borrow_mut().reverse();
            }
            "copy" => {
                arity(name, &args, 0, 0)?;
                return Ok(Value::list(list.snapshot()));
            }
            "clear" => {
                arity(name, &args, 0, 0)?;
                let drained = std::mem::take(&mut *list.borrow_mut());
                drop(drained);
            }
            _ => return Err(attribute_error("list", name).into()),
        }
        Ok(Value::None)
    }

    //
    // ─── DICT ──────────────────────────────────────────────────────────────────
    //

    fn dict_method(
        &mut self,
        dict: &Rc<Dict>,
        name: &'static str,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if name == "update" {
            arity(name, &args, 0, 1)?;
            if let Some(source) = args.first() {
                self.update_dict(dict, source)?;
            }
            for (key, value) in kwargs {
                dict.insert(Value::str(&key), value)?;
            }
            check_len(dict.len(), self.max_len)?;
            return Ok(Value::None);
        }
        no_kwargs(name, &kwargs)?;
        Ok(match name {
            "get" => {
                arity(name, &args, 1, 2)?;
                dict.get(&args[0])?
                    .or_else(|| args.get(1).cloned())
                    .unwrap_or(Value::None)
            }
            "keys" => {
                arity(name, &args, 0, 0)?;
                Value::list(dict.keys())
            }
            "values" => {
                arity(name, &args, 0, 0)?;
                Value::list(dict.values())
            }
            "items" => {
                arity(name, &args, 0, 0)?;
                Value::list(
                    dict.items()
                        .into_iter()
                        .map(|(k, v)| Value::tuple(vec![k, v]))
                        .collect(),
                )
            }
            "pop" => {
                arity(name, &args, 1, 2)?;
                let key = args[0].hash_key()?;
                let removed = dict.borrow_mut().shift_remove(&key);
                match (removed, args.get(1)) {
                    (Some((_, value)), _) => value,
                    (None, Some(default)) => default.clone(),
                    (None, None) => {
                        return Err(Exception::new(ExceptionKind::KeyError, args[0].repr()?).into());
                    }
                }
            }
            "setdefault" => {
                arity(name, &args, 1, 2)?;
                match dict.get(&args[0])? {
                    Some(existing) => existing,
                    None => {
                        check_len(dict.len() + 1, self.max_len)?;
                        let value = args.get(1).cloned().unwrap_or(Value::None);
                        dict.insert(args[0].clone(), value.clone())?;
                        value
                    }
                }
            }
            "copy" => {
                arity(name, &args, 0, 0)?;
                Value::Dict(Rc::new(Dict::new(dict.borrow().clone())))
            }
            "clear" => {
                arity(name, &args, 0, 0)?;
                let drained = std::mem::take(&mut *dict.borrow_mut());
                drop(drained);
                Value::None
            }
            _ => return Err(attribute_error("dict", name).into()),
        })
    }

    //
    // ─── SET ───────────────────────────────────────────────────────────────────
    //

    fn set_method(
        &mut self,
        set: &Rc<Set>,
        name: &'static str,
        args: Vec<Value>,
        kwargs: &[(String, Value)],
    ) -> Result<Value, Exception> {
        no_kwargs(name, kwargs)?;
        Ok(match name {
            "add" => {
                arity(name, &args, 1, 1)?;
                check_len(set.len() + 1, self.max_len)?;
                let key = args[0].hash_key()?;
                set.borrow_mut().entry(key).or_insert_with(|| args[0].clone());
                Value::None
            }
            "remove" | "discard" => {
                arity(name, &args, 1, 1)?;
                let key = args[0].hash_key()?;
                let removed = set.borrow_mut().shift_remove(&key);
                if removed.is_none() && name == "remove" {
                    return Err(Exception::new(ExceptionKind::KeyError, args[0].repr()?));
                }
                Value::None
            }
            "union" | "intersection" | "difference" => {
                let mut result: IndexMap<_, _> = set.borrow().clone();
                for other in &args {
                    let other = Set::from_values(ops::collect(other, self.max_len)?)?;
                    let other = other.borrow();
                    match name {
                        "union" => {
                            for (key, value) in other.iter() {
                                result.entry(key.clone()).or_insert_with(|| value.clone());
                            }
                            check_len(result.len(), self.max_len)?;
                        }
                        "intersection" => result.retain(|key, _| other.contains_key(key)),
                        _ => result.retain(|key, _| !other.contains_key(key)),
                    }
                }
                Value::Set(Rc::new(Set::new(result)))
            }
            "copy" => {
                arity(name, &args, 0, 0)?;
                Value::Set(Rc::new(Set::new(set.borrow().clone())))
            }
            "clear" => {
                arity(name, &args, 0, 0)?;
                let drained = std::mem::take(&mut *set.borrow_mut());
                drop(drained);
                Value::None
            }
            _ => return Err(attribute_error("set", name)),
        })
    }
}

fn attribute_error(type_name: &str, name: &str) -> Exception {
    Exception::new(
        ExceptionKind::AttributeError,
        format!("'{type_name}' object has no attribute '{name}'"),
    )
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_word = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if in_word {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            in_word = true;
        } else {
            out.push(c);
            in_word = false;
        }
    }
    out
}

fn split(text: &str, sep: Option<&Value>, maxsplit: i128) -> Result<Vec<Value>, Exception> {
    let limit = usize::try_from(maxsplit).ok();
    match sep {
        None | Some(Value::None) => {
            let mut parts = Vec::new();
            let mut rest = text.trim_start();
            while !rest.is_empty() {
                if limit == Some(parts.len()) {
                    parts.push(Value::str(rest));
                    break;
                }
                match rest.find(char::is_whitespace) {
                    Some(end) => {
                        parts.push(Value::str(&rest[..end]));
                        rest = rest[end..].trim_start();
                    }
                    None => {
                        parts.push(Value::str(rest));
                        break;
                    }
                }
            }
            Ok(parts)
        }
        Some(sep) => {
            let sep = str_arg("split", sep)?;
            if sep.is_empty() {
                return Err(value_error("empty separator"));
            }
            Ok(match limit {
                Some(limit) => text.splitn(limit + 1, sep).map(Value::str).collect(),
                None => text.split(sep).map(Value::str).collect(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[Value]) -> Vec<String> {
        values.iter().map(|v| v.to_str().unwrap()).collect()
    }

    #[test]
    fn split_variants() {
        assert_eq!(strings(&split("  a b\tc  ", None, -1).unwrap()), ["a", "b", "c"]);
        assert_eq!(strings(&split("a b  c ", None, 1).unwrap()), ["a", "b  c "]);
        assert_eq!(strings(&split("a,,b", Some(&Value::str(",")), -1).unwrap()), ["a", "", "b"]);
        assert!(split("a", Some(&Value::str("")), -1).is_err());
    }

    #[test]
    fn title_case_words() {
        assert_eq!(title_case("hello wORLD 2nd"), "Hello World 2Nd");
    }

    #[test]
    fn method_lookup_is_per_type() {
        assert_eq!(method_name(&Value::str("x"), "upper"), Some("upper"));
        assert_eq!(method_name(&Value::list(Vec::new()), "upper"), None);
        assert_eq!(method_name(&Value::Int(1), "append"), None);
    }
}
