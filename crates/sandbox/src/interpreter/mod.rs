//! Tree-walking evaluator for parsed snippets.
//!
//! Every statement, loop iteration and builtin iteration step goes through
//! [`Guard::tick`], which is where a cancelled or overdue run stops.

mod builtins;
mod errors;
mod format;
mod methods;
mod ops;
mod output;
mod value;

use std::collections::HashMap;
use std::rc::Rc;
use std::time::Instant;

use crate::config::SandboxConfig;
use crate::executor::CancelToken;
use crate::parser::ast::{BinOp, BoolOp, Expr, FStringPart, FunctionDef, Stmt, StmtKind, Target, UnaryOp};
use crate::parser::parse_program;

use self::builtins::Capabilities;
use self::errors::{Exception, ExceptionKind, recursion_error, type_error, value_error};
pub(crate) use self::errors::Fault;
use self::output::OutputBuffer;
use self::value::{BoundMethod, Function, List, ReprBudget, Value, check_len};

type Eval<T> = Result<T, Fault>;

/// How often the wall clock is consulted, in ticks.
const DEADLINE_CHECK_INTERVAL: u32 = 1024;

/// Stops a run once its token is cancelled or its deadline passes.
#[derive(Debug)]
pub(crate) struct Guard {
    cancel: CancelToken,
    deadline: Instant,
    ticks: u32,
}

impl Guard {
    pub(crate) fn new(cancel: CancelToken, deadline: Instant) -> Self {
        Self {
            cancel,
            deadline,
            ticks: 0,
        }
    }

    fn tick(&mut self) -> Eval<()> {
        if self.cancel.is_cancelled() {
            return Err(Fault::Interrupted);
        }
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= self.deadline {
            return Err(Fault::Interrupted);
        }
        Ok(())
    }
}

/// What a finished run leaves behind.
#[derive(Debug)]
pub(crate) struct RunOutcome {
    pub output: String,
    pub fault: Option<Fault>,
}

/// Parses and runs `source` to completion or until the first fault.
pub(crate) fn run(source: &str, config: &SandboxConfig, guard: Guard) -> RunOutcome {
    let mut interpreter = Interpreter::new(config, guard);
    let fault = match parse_program(source) {
        Ok(program) => interpreter.exec_block(&program).err(),
        Err(err) => Some(Fault::Raised(err.into())),
    };
    RunOutcome {
        output: interpreter.output.finish(),
        fault,
    }
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// Walks a list, re-reading its length every step so appends during the
/// loop are seen.
enum Cursor {
    Live { list: Rc<List>, index: usize },
    Items(ops::ValueIter),
}

impl Cursor {
    fn new(value: &Value) -> Result<Self, Exception> {
        Ok(match value {
            Value::List(list) => Cursor::Live {
                list: Rc::clone(list),
                index: 0,
            },
            other => Cursor::Items(ops::iterate(other)?),
        })
    }

    fn next(&mut self) -> Option<Value> {
        match self {
            Cursor::Live { list, index } => {
                let item = list.borrow().get(*index).cloned();
                *index += 1;
                item
            }
            Cursor::Items(items) => items.next(),
        }
    }
}

pub(crate) struct Interpreter {
    globals: HashMap<String, Value>,
    frames: Vec<HashMap<String, Value>>,
    capabilities: Capabilities,
    output: OutputBuffer,
    guard: Guard,
    max_len: usize,
    max_call_depth: usize,
}

impl Interpreter {
    fn new(config: &SandboxConfig, guard: Guard) -> Self {
        Self {
            globals: HashMap::new(),
            frames: Vec::new(),
            capabilities: Capabilities::standard(&config.denylist),
            output: OutputBuffer::new(config.output_limit),
            guard,
            max_len: config.max_collection_len,
            max_call_depth: config.max_call_depth,
        }
    }

    /// Rendering limits for this run: the collection cap and the run's cancel token.
    fn repr_budget(&self) -> ReprBudget {
        ReprBudget::new(self.max_len).with_cancel(self.guard.cancel.clone())
    }

    //
    // ─── STATEMENTS ────────────────────────────────────────────────────────────
    //

    fn exec_block(&mut self, block: &[Stmt]) -> Eval<Flow> {
        for stmt in block {
            self.guard.tick()?;
            match self.exec(stmt).map_err(|fault| fault.at_line(stmt.line))? {
                Flow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(&mut self, stmt: &Stmt) -> Eval<Flow> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => self.aug_assign(target, *op, value)?,
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    if self.eval(cond)?.truthy() {
                        return self.exec_block(body);
                    }
                }
                return self.exec_block(orelse);
            }
            StmtKind::While { cond, body } => loop {
                self.guard.tick()?;
                if !self.eval(cond)?.truthy() {
                    break;
                }
                match self.exec_block(body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                let mut cursor = Cursor::new(&iterable)?;
                loop {
                    self.guard.tick()?;
                    let Some(item) = cursor.next() else { break };
                    self.assign(target, item)?;
                    match self.exec_block(body)? {
                        Flow::Break => break,
                        Flow::Return(value) => return Ok(Flow::Return(value)),
                        Flow::Normal | Flow::Continue => {}
                    }
                }
            }
            StmtKind::FunctionDef(def) => {
                let defaults = def
                    .params
                    .iter()
                    .map(|param| param.default.as_ref().map(|e| self.eval(e)).transpose())
                    .collect::<Eval<Vec<_>>>()?;
                let function = Function {
                    def: Rc::clone(def),
                    defaults,
                };
                self.store(&def.name, Value::Function(Rc::new(function)));
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Import(module) => {
                return Err(Exception::new(
                    ExceptionKind::ImportError,
                    format!("No module named '{module}'"),
                )
                .into());
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
        }
        Ok(Flow::Normal)
    }

    fn aug_assign(&mut self, target: &Target, op: BinOp, value: &Expr) -> Eval<()> {
        match target {
            Target::Name(name) => {
                let current = self.lookup(name)?;
                let rhs = self.eval(value)?;
                let updated = self.combine_in_place(op, current, &rhs)?;
                self.store(name, updated);
            }
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.subscript_index(index)?;
                let current = ops::get_item(&object, &index)?;
                let rhs = self.eval(value)?;
                let updated = self.combine_in_place(op, current, &rhs)?;
                ops::set_item(&object, index, updated, self.max_len)?;
            }
            Target::Tuple(_) => {
                return Err(type_error("illegal expression for augmented assignment").into());
            }
        }
        Ok(())
    }

    /// `list += iterable` extends in place; everything else rebinds.
    fn combine_in_place(&mut self, op: BinOp, current: Value, rhs: &Value) -> Eval<Value> {
        if let (BinOp::Add, Value::List(list)) = (op, &current) {
            let items = ops::collect(rhs, self.max_len)?;
            check_len(list.len() + items.len(), self.max_len)?;
            list.borrow_mut().extend(items);
            return Ok(current);
        }
        Ok(ops::binary(op, &current, rhs, self.max_len)?)
    }

    //
    // ─── NAMES ─────────────────────────────────────────────────────────────────
    //

    fn scope(&mut self) -> &mut HashMap<String, Value> {
        match self.frames.last_mut() {
            Some(frame) => frame,
            None => &mut self.globals,
        }
    }

    fn store(&mut self, name: &str, value: Value) {
        self.scope().insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> Eval<Value> {
        self.frames
            .last()
            .and_then(|frame| frame.get(name))
            .or_else(|| self.globals.get(name))
            .or_else(|| self.capabilities.get(name))
            .cloned()
            .ok_or_else(|| {
                Exception::new(
                    ExceptionKind::NameError,
                    format!("name '{name}' is not defined"),
                )
                .into()
            })
    }

    fn assign(&mut self, target: &Target, value: Value) -> Eval<()> {
        match target {
            Target::Name(name) => self.store(name, value),
            Target::Subscript { object, index } => {
                let object = self.eval(object)?;
                let index = self.subscript_index(index)?;
                ops::set_item(&object, index, value, self.max_len)?;
            }
            Target::Tuple(targets) => {
                let items = ops::collect(&value, self.max_len)?;
                if items.len() > targets.len() {
                    return Err(value_error(format!(
                        "too many values to unpack (expected {})",
                        targets.len()
                    ))
                    .into());
                }
                if items.len() < targets.len() {
                    return Err(value_error(format!(
                        "not enough values to unpack (expected {}, got {})",
                        targets.len(),
                        items.len()
                    ))
                    .into());
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn subscript_index(&mut self, index: &Expr) -> Eval<Value> {
        if matches!(index, Expr::Slice { .. }) {
            return Err(type_error("slice assignment is not supported").into());
        }
        self.eval(index)
    }

    //
    // ─── EXPRESSIONS ───────────────────────────────────────────────────────────
    //

    fn eval(&mut self, expr: &Expr) -> Eval<Value> {
        Ok(match expr {
            Expr::None => Value::None,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Int(n) => Value::Int(*n),
            Expr::Float(f) => Value::Float(*f),
            Expr::Str(s) => Value::str(s),
            Expr::FString(parts) => {
                let mut text = String::new();
                for part in parts {
                    match part {
                        FStringPart::Literal(literal) => text.push_str(literal),
                        FStringPart::Field { expr, spec } => {
                            let value = self.eval(expr)?;
                            text.push_str(&format::apply_spec(&value, *spec, &self.repr_budget())?);
                        }
                    }
                }
                check_len(text.len(), self.max_len)?;
                Value::str(&text)
            }
            Expr::Name(name) => self.lookup(name)?,
            Expr::List(items) => Value::list(self.eval_all(items)?),
            Expr::Tuple(items) => Value::tuple(self.eval_all(items)?),
            Expr::Set(items) => {
                let items = self.eval_all(items)?;
                Value::Set(Rc::new(value::Set::from_values(items)?))
            }
            Expr::Dict(pairs) => {
                let dict = value::Dict::default();
                for (key, value) in pairs {
                    let key = self.eval(key)?;
                    let value = self.eval(value)?;
                    dict.insert(key, value)?;
                }
                Value::Dict(Rc::new(dict))
            }
            Expr::ListComp {
                element,
                target,
                iter,
                cond,
            } => self.list_comprehension(element, target, iter, cond.as_deref())?,
            Expr::IfExp {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.truthy() {
                    self.eval(then)?
                } else {
                    self.eval(otherwise)?
                }
            }
            Expr::BoolOp { op, left, right } => {
                let left = self.eval(left)?;
                match (op, left.truthy()) {
                    (BoolOp::And, false) | (BoolOp::Or, true) => left,
                    _ => self.eval(right)?,
                }
            }
            Expr::Unary { op, operand } => {
                let operand = self.eval(operand)?;
                match op {
                    UnaryOp::Not => Value::Bool(!operand.truthy()),
                    _ => ops::unary(*op, &operand)?,
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                ops::binary(*op, &left, &right, self.max_len)?
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first)?;
                for (op, right) in rest {
                    let right = self.eval(right)?;
                    if !ops::compare(*op, &left, &right)? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Value::Bool(true)
            }
            Expr::Call { func, args, kwargs } => {
                let func = self.eval(func)?;
                let args = self.eval_all(args)?;
                let kwargs = kwargs
                    .iter()
                    .map(|(name, e)| Ok((name.clone(), self.eval(e)?)))
                    .collect::<Eval<Vec<_>>>()?;
                self.call(&func, args, kwargs)?
            }
            Expr::Attribute { object, name } => {
                let object = self.eval(object)?;
                self.attribute(object, name)?
            }
            Expr::Subscript { object, index } => {
                let object = self.eval(object)?;
                match index.as_ref() {
                    Expr::Slice { lower, upper, step } => {
                        let lower = self.slice_bound(lower.as_deref())?;
                        let upper = self.slice_bound(upper.as_deref())?;
                        let step = self.slice_bound(step.as_deref())?;
                        ops::get_slice(&object, lower, upper, step)?
                    }
                    index => {
                        let index = self.eval(index)?;
                        ops::get_item(&object, &index)?
                    }
                }
            }
            Expr::Slice { .. } => return Err(type_error("slices are only valid inside []").into()),
        })
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> Eval<Vec<Value>> {
        check_len(exprs.len(), self.max_len)?;
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn slice_bound(&mut self, bound: Option<&Expr>) -> Eval<Option<i128>> {
        let Some(expr) = bound else { return Ok(None) };
        match self.eval(expr)? {
            Value::None => Ok(None),
            value => value.as_int().map(Some).ok_or_else(|| {
                type_error("slice indices must be integers or None").into()
            }),
        }
    }

    fn list_comprehension(
        &mut self,
        element: &Expr,
        target: &Target,
        iter: &Expr,
        cond: Option<&Expr>,
    ) -> Eval<Value> {
        let iterable = self.eval(iter)?;
        let mut names = Vec::new();
        target_names(target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|name| {
                let previous = self.scope().get(&name).cloned();
                (name, previous)
            })
            .collect();

        let result = self.comprehension_items(element, target, &iterable, cond);

        let scope = self.scope();
        for (name, previous) in saved {
            match previous {
                Some(value) => {
                    scope.insert(name, value);
                }
                None => {
                    scope.remove(&name);
                }
            }
        }
        result.map(Value::list)
    }

    fn comprehension_items(
        &mut self,
        element: &Expr,
        target: &Target,
        iterable: &Value,
        cond: Option<&Expr>,
    ) -> Eval<Vec<Value>> {
        let mut cursor = Cursor::new(iterable)?;
        let mut items = Vec::new();
        loop {
            self.guard.tick()?;
            let Some(item) = cursor.next() else { break };
            self.assign(target, item)?;
            if let Some(cond) = cond {
                if !self.eval(cond)?.truthy() {
                    continue;
                }
            }
            items.push(self.eval(element)?);
            check_len(items.len(), self.max_len)?;
        }
        Ok(items)
    }

    fn attribute(&mut self, object: Value, name: &str) -> Eval<Value> {
        if name == "__name__" {
            let named = match &object {
                Value::Function(f) => Some(f.def.name.clone()),
                Value::Builtin(b) => Some(b.name().to_string()),
                Value::Type(kind) => Some(kind.name().to_string()),
                Value::Method(m) => Some(m.name.to_string()),
                _ => None,
            };
            if let Some(named) = named {
                return Ok(Value::str(&named));
            }
        }
        match methods::method_name(&object, name) {
            Some(name) => Ok(Value::Method(Rc::new(BoundMethod {
                receiver: object,
                name,
            }))),
            None => Err(Exception::new(
                ExceptionKind::AttributeError,
                format!("'{}' object has no attribute '{name}'", object.type_name()),
            )
            .into()),
        }
    }

    //
    // ─── CALLS ─────────────────────────────────────────────────────────────────
    //

    fn call(&mut self, func: &Value, args: Vec<Value>, kwargs: Vec<(String, Value)>) -> Eval<Value> {
        match func {
            Value::Function(function) => self.call_function(function, args, kwargs),
            Value::Builtin(builtin) => self.call_builtin(*builtin, args, kwargs),
            Value::Type(kind) => self.construct(*kind, args, kwargs),
            Value::Method(method) => self.call_method(&method.receiver, method.name, args, kwargs),
            other => Err(type_error(format!("'{}' object is not callable", other.type_name())).into()),
        }
    }

    fn call_function(
        &mut self,
        function: &Function,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> Eval<Value> {
        if self.frames.len() >= self.max_call_depth {
            return Err(recursion_error("").into());
        }
        let locals = bind_arguments(&function.def, &function.defaults, args, kwargs)?;
        self.frames.push(locals);
        let result = self.exec_block(&function.def.body);
        self.frames.pop();
        match result? {
            Flow::Return(value) => Ok(value),
            Flow::Normal | Flow::Break | Flow::Continue => Ok(Value::None),
        }
    }
}

fn target_names(target: &Target, out: &mut Vec<String>) {
    match target {
        Target::Name(name) => out.push(name.clone()),
        Target::Tuple(targets) => targets.iter().for_each(|t| target_names(t, out)),
        Target::Subscript { .. } => {}
    }
}

fn plural(count: usize, word: &str) -> String {
    if count == 1 {
        format!("{count} {word}")
    } else {
        format!("{count} {word}s")
    }
}

/// Matches call arguments to parameters the way Python reports mistakes.
fn bind_arguments(
    def: &FunctionDef,
    defaults: &[Option<Value>],
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> Result<HashMap<String, Value>, Exception> {
    let name = &def.name;
    let params = &def.params;
    if args.len() > params.len() {
        return Err(type_error(format!(
            "{name}() takes {} but {} given",
            plural(params.len(), "positional argument"),
            if args.len() == 1 { "1 was".to_string() } else { format!("{} were", args.len()) }
        )));
    }
    let mut slots: Vec<Option<Value>> = vec![None; params.len()];
    for (slot, arg) in slots.iter_mut().zip(args) {
        *slot = Some(arg);
    }
    for (key, value) in kwargs {
        let position = params
            .iter()
            .position(|p| p.name == key)
            .ok_or_else(|| type_error(format!("{name}() got an unexpected keyword argument '{key}'")))?;
        if slots[position].is_some() {
            return Err(type_error(format!(
                "{name}() got multiple values for argument '{key}'"
            )));
        }
        slots[position] = Some(value);
    }

    let mut locals = HashMap::with_capacity(params.len());
    let mut missing = Vec::new();
    for ((param, slot), default) in params.iter().zip(slots).zip(defaults) {
        match slot.or_else(|| default.clone()) {
            Some(value) => {
                locals.insert(param.name.clone(), value);
            }
            None => missing.push(format!("'{}'", param.name)),
        }
    }
    if !missing.is_empty() {
        let listed = match missing.as_slice() {
            [one] => one.clone(),
            [init @ .., last] => format!("{} and {last}", init.join(", ")),
            [] => String::new(),
        };
        return Err(type_error(format!(
            "{name}() missing {}: {listed}",
            plural(missing.len(), "required positional argument")
        )));
    }
    Ok(locals)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn run_source(source: &str) -> RunOutcome {
        let config = SandboxConfig::default();
        let guard = Guard::new(CancelToken::new(), Instant::now() + Duration::from_secs(5));
        run(source, &config, guard)
    }

    fn output_of(source: &str) -> String {
        let outcome = run_source(source);
        assert!(outcome.fault.is_none(), "unexpected fault: {:?}", outcome.fault);
        outcome.output
    }

    fn error_of(source: &str) -> String {
        match run_source(source).fault {
            Some(Fault::Raised(e)) => e.to_string(),
            other => panic!("expected an exception, got {other:?}"),
        }
    }

    #[test]
    fn prints_arithmetic() {
        assert_eq!(output_of("print(2 + 2)"), "4");
        assert_eq!(output_of("print(7 / 2, 7 // 2, 2 ** 10)"), "3.5 3 1024");
    }

    #[test]
    fn loops_and_functions() {
        let source = "\
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)

total = 0
for i in range(5):
    if i == 3:
        continue
    total += fact(i)
print(total)
";
        assert_eq!(output_of(source), "10");
    }

    #[test]
    fn lists_alias_and_extend_in_place() {
        let source = "a = [1]\nb = a\nb += [2]\na.append(3)\nprint(a, len(b))";
        assert_eq!(output_of(source), "[1, 2, 3] 3");
    }

    #[test]
    fn comprehension_variables_do_not_leak() {
        let source = "x = 'kept'\nsquares = [x * x for x in range(4) if x % 2 == 0]\nprint(squares, x)";
        assert_eq!(output_of(source), "[0, 4] kept");
    }

    #[test]
    fn errors_carry_the_failing_line() {
        assert_eq!(
            error_of("a = 1\nb = 0\nprint(a / b)"),
            "ZeroDivisionError: division by zero (line 3)"
        );
        assert_eq!(error_of("print(missing)"), "NameError: name 'missing' is not defined (line 1)");
    }

    #[test]
    fn error_inside_a_function_reports_the_inner_line() {
        let source = "def f():\n    return [][1]\n\nf()";
        assert_eq!(error_of(source), "IndexError: list index out of range (line 2)");
    }

    #[test]
    fn argument_binding_messages() {
        assert_eq!(
            error_of("def f(a, b):\n    pass\nf(1)"),
            "TypeError: f() missing 1 required positional argument: 'b' (line 3)"
        );
        assert_eq!(
            error_of("def f(a):\n    pass\nf(1, 2)"),
            "TypeError: f() takes 1 positional argument but 2 were given (line 3)"
        );
        assert_eq!(output_of("def f(a, b=2):\n    return a + b\nprint(f(1), f(1, b=5))"), "3 6");
    }

    #[test]
    fn runaway_recursion_is_caught() {
        let message = error_of("def f(n):\n    return f(n + 1)\nf(0)");
        assert!(message.starts_with("RecursionError: maximum recursion depth exceeded"));
    }

    #[test]
    fn imports_fail() {
        assert_eq!(error_of("import math"), "ImportError: No module named 'math' (line 1)");
    }

    #[test]
    fn cancelled_guard_interrupts() {
        let token = CancelToken::new();
        token.cancel();
        let guard = Guard::new(token, Instant::now() + Duration::from_secs(5));
        let outcome = run("while True:\n    pass", &SandboxConfig::default(), guard);
        assert_eq!(outcome.fault, Some(Fault::Interrupted));
    }

    #[test]
    fn expired_deadline_interrupts_a_busy_loop() {
        let guard = Guard::new(CancelToken::new(), Instant::now());
        let outcome = run("n = 0\nwhile True:\n    n += 1", &SandboxConfig::default(), guard);
        assert_eq!(outcome.fault, Some(Fault::Interrupted));
    }

    #[test]
    fn partial_output_survives_a_fault() {
        let outcome = run_source("print('before')\nprint(1 / 0)");
        assert_eq!(outcome.output, "before");
        assert!(outcome.fault.is_some());
    }
}
