//! A tree-walking interpreter for compiled formulas.
//!
//! Block scopes live in an arena owned by the interpreter. Closures refer to
//! their defining scope by arena slot, so a closure sees later updates to the
//! variables it closes over. A closure that escapes the interpreter (a helper
//! function stored in the template scope) is detached: its captured bindings
//! are copied out and it resolves everything else against the scope of the
//! formula that eventually calls it.
use super::builtins;
use super::error::{EvalError, EvalResult};
use super::value::{format_number, Closure, ClosureEnv, Scope, Value};
use crate::formula::ast::*;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::Rc;
use std::sync::Arc;

type Args = SmallVec<[Value; 4]>;

/// Resource bounds for a single formula evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Loop iterations shared by every loop of the evaluation.
    pub max_iterations: u64,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self { max_iterations: 100_000, max_call_depth: 64 }
    }
}

/// Evaluates a program against a read-only scope and returns its completion
/// value: the value of a top-level `return`, else the last top-level
/// expression statement (or function declaration), else null.
pub fn evaluate(program: &Program, scope: &Scope, limits: Limits) -> EvalResult<Value> {
    let mut interpreter = Interpreter::new(scope, limits);
    let value = interpreter.run(program)?;
    Ok(interpreter.detach(value))
}

struct Binding {
    value: Value,
    constant: bool,
}

#[derive(Default)]
struct Env {
    parent: Option<usize>,
    vars: HashMap<String, Binding>,
    /// Set once a closure refers to this slot; the slot is then never reused.
    captured: bool,
}

enum Flow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

/// One step of an assignment target path, `a.b[i]`.
enum Key {
    Name(String),
    Value(Value),
}

impl Key {
    fn object_key(&self) -> EvalResult<String> {
        match self {
            Key::Name(n) | Key::Value(Value::Text(n)) => Ok(n.clone()),
            Key::Value(Value::Number(n)) => Ok(format_number(*n)),
            Key::Value(other) => Err(EvalError::runtime(format!("{} cannot be used as a key", other.type_name()))),
        }
    }
}

struct Interpreter<'s> {
    scope: &'s Scope,
    envs: Vec<Env>,
    current: usize,
    limits: Limits,
    iterations: u64,
    depth: usize,
}

impl<'s> Interpreter<'s> {
    fn new(scope: &'s Scope, limits: Limits) -> Self {
        Self { scope, envs: vec![Env::default()], current: 0, limits, iterations: 0, depth: 0 }
    }

    fn run(&mut self, program: &Program) -> EvalResult<Value> {
        self.hoist(&program.body);
        let mut completion = Value::Null;
        for stmt in &program.body {
            match stmt {
                Stmt::Expr(e) => completion = self.expr(e)?,
                Stmt::Function(def) => {
                    if let Some(name) = &def.name {
                        completion = self.lookup(name)?;
                    }
                }
                _ => match self.stmt(stmt)? {
                    Flow::Normal => {}
                    Flow::Return(v) => return Ok(v),
                    Flow::Break => return Err(EvalError::runtime("'break' outside of a loop or switch")),
                    Flow::Continue => return Err(EvalError::runtime("'continue' outside of a loop")),
                },
            }
        }
        Ok(completion)
    }

    // --- Scopes ---

    fn enter(&mut self, parent: usize) -> usize {
        let saved = self.current;
        self.envs.push(Env { parent: Some(parent), ..Env::default() });
        self.current = self.envs.len() - 1;
        saved
    }

    fn leave(&mut self, saved: usize) {
        let id = self.current;
        if id + 1 == self.envs.len() && !self.envs[id].captured {
            self.envs.pop();
        }
        self.current = saved;
    }

    fn declare(&mut self, name: &str, value: Value, constant: bool) {
        self.envs[self.current].vars.insert(name.to_string(), Binding { value, constant });
    }

    fn find(&self, name: &str) -> Option<usize> {
        let mut env = Some(self.current);
        while let Some(id) = env {
            if self.envs[id].vars.contains_key(name) {
                return Some(id);
            }
            env = self.envs[id].parent;
        }
        None
    }

    fn lookup(&self, name: &str) -> EvalResult<Value> {
        if let Some(id) = self.find(name) {
            return Ok(self.envs[id].vars[name].value.clone());
        }
        if let Some(v) = self.scope.get(name) {
            return Ok(v.clone());
        }
        builtins::global(name).ok_or_else(|| EvalError::unbound(name))
    }

    fn binding_mut(&mut self, name: &str) -> EvalResult<&mut Binding> {
        match self.find(name) {
            Some(id) => self.envs[id]
                .vars
                .get_mut(name)
                .ok_or_else(|| EvalError::unbound(name)),
            None if self.scope.contains_key(name) || builtins::is_global(name) => {
                Err(EvalError::runtime(format!("'{}' is read-only inside a formula", name)))
            }
            None => Err(EvalError::unbound(name)),
        }
    }

    fn tick(&mut self) -> EvalResult<()> {
        self.iterations += 1;
        if self.iterations > self.limits.max_iterations {
            return Err(EvalError::IterationLimitExceeded { limit: self.limits.max_iterations });
        }
        Ok(())
    }

    // --- Statements ---

    /// Function declarations are visible throughout their block.
    fn hoist(&mut self, body: &[Stmt]) {
        for stmt in body {
            if let Stmt::Function(def) = stmt {
                if let Some(name) = &def.name {
                    let closure = self.closure(def);
                    self.declare(name, closure, false);
                }
            }
        }
    }

    fn stmts(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        self.hoist(body);
        for stmt in body {
            match self.stmt(stmt)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        let saved = self.enter(self.current);
        let flow = self.stmts(body);
        self.leave(saved);
        flow
    }

    fn stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        match stmt {
            Stmt::Let { kind, pattern, init } => {
                let value = match init {
                    Some(e) => self.expr(e)?,
                    None => Value::Null,
                };
                self.bind_pattern(pattern, value, *kind == DeclKind::Const)?;
            }
            Stmt::Assign { target, op, value } => {
                let rhs = self.expr(value)?;
                let new = match op.binary() {
                    None => rhs,
                    Some(bin) => binary(bin, self.expr(target)?, rhs)?,
                };
                self.assign(target, new)?;
            }
            Stmt::Expr(e) => {
                self.expr(e)?;
            }
            Stmt::If { cond, then, otherwise } => {
                if self.expr(cond)?.truthy() {
                    return self.block(then);
                } else if let Some(o) = otherwise {
                    return self.block(o);
                }
            }
            Stmt::While { cond, body } => loop {
                self.tick()?;
                if !self.expr(cond)?.truthy() {
                    break;
                }
                match self.block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
            },
            Stmt::DoWhile { body, cond } => loop {
                self.tick()?;
                match self.block(body)? {
                    Flow::Break => break,
                    Flow::Return(v) => return Ok(Flow::Return(v)),
                    Flow::Normal | Flow::Continue => {}
                }
                if !self.expr(cond)?.truthy() {
                    break;
                }
            },
            Stmt::For { init, cond, update, body } => {
                let saved = self.enter(self.current);
                let flow = self.for_loop(init.as_deref(), cond.as_ref(), update.as_deref(), body);
                self.leave(saved);
                return flow;
            }
            Stmt::ForOf { binding, iterable, body } => {
                let items: Vec<Value> = match self.expr(iterable)? {
                    Value::Array(items) => items.as_ref().clone(),
                    Value::Text(s) => s.chars().map(|c| Value::Text(c.to_string())).collect(),
                    other => {
                        return Err(EvalError::runtime(format!("{} is not iterable", other.type_name())))
                    }
                };
                return self.each(binding, items, body);
            }
            Stmt::ForIn { binding, object, body } => {
                let keys: Vec<Value> = match self.expr(object)? {
                    Value::Object(map) => map.keys().cloned().map(Value::Text).collect(),
                    Value::Array(items) => (0..items.len()).map(|i| Value::Text(i.to_string())).collect(),
                    other => {
                        return Err(EvalError::runtime(format!("cannot enumerate keys of {}", other.type_name())))
                    }
                };
                return self.each(binding, keys, body);
            }
            Stmt::Switch { discriminant, cases } => return self.switch(discriminant, cases),
            Stmt::Block(body) => return self.block(body),
            Stmt::Function(_) => {}
            Stmt::Return(value) => {
                let v = match value {
                    Some(e) => self.expr(e)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(v));
            }
            Stmt::Break => return Ok(Flow::Break),
            Stmt::Continue => return Ok(Flow::Continue),
        }
        Ok(Flow::Normal)
    }

    fn for_loop(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Stmt>,
        body: &[Stmt],
    ) -> EvalResult<Flow> {
        // Every declarator of `let i = 0, n = xs.length` lives in the loop scope.
        for decl in for_init(init) {
            self.stmt(decl)?;
        }
        loop {
            self.tick()?;
            if let Some(c) = cond {
                if !self.expr(c)?.truthy() {
                    break;
                }
            }
            match self.block(body)? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
            if let Some(u) = update {
                self.stmt(u)?;
            }
        }
        Ok(Flow::Normal)
    }

    fn each(&mut self, binding: &Pattern, items: Vec<Value>, body: &[Stmt]) -> EvalResult<Flow> {
        for item in items {
            self.tick()?;
            let saved = self.enter(self.current);
            let flow = self.bind_pattern(binding, item, false).and_then(|()| self.stmts(body));
            self.leave(saved);
            match flow? {
                Flow::Break => break,
                Flow::Return(v) => return Ok(Flow::Return(v)),
                Flow::Normal | Flow::Continue => {}
            }
        }
        Ok(Flow::Normal)
    }

    fn switch(&mut self, discriminant: &Expr, cases: &[SwitchCase]) -> EvalResult<Flow> {
        let value = self.expr(discriminant)?;
        let mut start = None;
        for (i, case) in cases.iter().enumerate() {
            if let Some(test) = &case.test {
                if self.expr(test)? == value {
                    start = Some(i);
                    break;
                }
            }
        }
        let Some(start) = start.or_else(|| cases.iter().position(|c| c.test.is_none())) else {
            return Ok(Flow::Normal);
        };
        let saved = self.enter(self.current);
        let mut result = Ok(Flow::Normal);
        for case in &cases[start..] {
            match self.stmts(&case.body) {
                Ok(Flow::Normal) => {}
                Ok(Flow::Break) => break,
                other => {
                    result = other;
                    break;
                }
            }
        }
        self.leave(saved);
        result
    }

    fn bind_pattern(&mut self, pattern: &Pattern, value: Value, constant: bool) -> EvalResult<()> {
        match pattern {
            Pattern::Name(name) => self.declare(name, value, constant),
            Pattern::Object(pairs) => {
                let map = match value {
                    Value::Object(map) => map,
                    other => {
                        return Err(EvalError::runtime(format!("cannot destructure {} as an object", other.type_name())))
                    }
                };
                for (key, name) in pairs {
                    let v = map.get(key).cloned().unwrap_or(Value::Null);
                    self.declare(name, v, constant);
                }
            }
            Pattern::Array(slots) => {
                let items = match value {
                    Value::Array(items) => items,
                    other => {
                        return Err(EvalError::runtime(format!("cannot destructure {} as an array", other.type_name())))
                    }
                };
                for (i, slot) in slots.iter().enumerate() {
                    if let Some(name) = slot {
                        let v = items.get(i).cloned().unwrap_or(Value::Null);
                        self.declare(name, v, constant);
                    }
                }
            }
        }
        Ok(())
    }

    // --- Assignment ---

    fn assign(&mut self, target: &Expr, value: Value) -> EvalResult<()> {
        if let Expr::Ident(name) = target {
            let binding = self.binding_mut(name)?;
            if binding.constant {
                return Err(EvalError::runtime(format!("assignment to constant '{}'", name)));
            }
            binding.value = value;
            return Ok(());
        }
        *self.place(target)? = value;
        Ok(())
    }

    /// Mutable access to the storage a place expression designates.
    fn place(&mut self, target: &Expr) -> EvalResult<&mut Value> {
        let mut path = Vec::new();
        let root = self.place_path(target, &mut path)?;
        let binding = self.binding_mut(&root)?;
        place_mut(&mut binding.value, &path)
    }

    fn place_path(&mut self, expr: &Expr, path: &mut Vec<Key>) -> EvalResult<String> {
        match expr {
            Expr::Ident(name) => Ok(name.clone()),
            Expr::Member { object, property } => {
                let root = self.place_path(object, path)?;
                path.push(Key::Name(property.clone()));
                Ok(root)
            }
            Expr::Index { object, index } => {
                let root = self.place_path(object, path)?;
                let key = self.expr(index)?;
                path.push(Key::Value(key));
                Ok(root)
            }
            _ => Err(EvalError::runtime("invalid assignment target")),
        }
    }

    // --- Expressions ---

    fn closure(&mut self, def: &Arc<FunctionDef>) -> Value {
        self.envs[self.current].captured = true;
        Value::Function(Rc::new(Closure { def: Arc::clone(def), env: ClosureEnv::Arena(self.current) }))
    }

    fn expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        Ok(match expr {
            Expr::Number(n) => Value::Number(*n),
            Expr::Str(s) => Value::Text(s.clone()),
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Null => Value::Null,
            Expr::Ident(name) => self.lookup(name)?,
            Expr::Template(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TemplatePart::Text(t) => out.push_str(t),
                        TemplatePart::Expr(e) => out.push_str(&self.expr(e)?.to_display()),
                    }
                }
                Value::Text(out)
            }
            Expr::Array(items) => Value::array(self.elements(items)?.into_vec()),
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for entry in entries {
                    match entry {
                        ObjectEntry::Property(key, e) => {
                            let v = self.expr(e)?;
                            map.insert(key.clone(), v);
                        }
                        ObjectEntry::Spread(e) => match self.expr(e)? {
                            Value::Object(other) => {
                                map.extend(other.iter().map(|(k, v)| (k.clone(), v.clone())))
                            }
                            Value::Null => {}
                            other => {
                                return Err(EvalError::runtime(format!("cannot spread {} into an object", other.type_name())))
                            }
                        },
                    }
                }
                Value::object(map)
            }
            Expr::Spread(_) => return Err(EvalError::runtime("spread is only allowed in arrays, objects and calls")),
            Expr::Unary { op, expr } => {
                let v = self.expr(expr)?;
                match op {
                    UnaryOp::Not => Value::Bool(!v.truthy()),
                    UnaryOp::TypeOf => Value::Text(v.type_of().to_string()),
                    UnaryOp::Plus => Value::Number(builtins::to_number(&v)),
                    UnaryOp::Neg => match v {
                        Value::Number(n) => Value::Number(-n),
                        other => return Err(EvalError::runtime(format!("cannot negate {}", other.type_name()))),
                    },
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.expr(lhs)?;
                let r = self.expr(rhs)?;
                binary(*op, l, r)?
            }
            Expr::Logical { op, lhs, rhs } => {
                let l = self.expr(lhs)?;
                let short = match op {
                    LogicalOp::And => !l.truthy(),
                    LogicalOp::Or => l.truthy(),
                    LogicalOp::Coalesce => !matches!(l, Value::Null),
                };
                if short { l } else { self.expr(rhs)? }
            }
            Expr::Conditional { cond, then, otherwise } => {
                if self.expr(cond)?.truthy() {
                    self.expr(then)?
                } else {
                    self.expr(otherwise)?
                }
            }
            Expr::Member { object, property } => builtins::property(&self.expr(object)?, property)?,
            Expr::Index { object, index } => {
                let obj = self.expr(object)?;
                let key = self.expr(index)?;
                index_value(&obj, &key)?
            }
            Expr::Call { callee, args } => self.call_expr(callee, args)?,
            Expr::Function(def) => self.closure(def),
        })
    }

    fn elements(&mut self, items: &[Expr]) -> EvalResult<Args> {
        let mut out = Args::new();
        for item in items {
            match item {
                Expr::Spread(inner) => match self.expr(inner)? {
                    Value::Array(values) => out.extend(values.iter().cloned()),
                    other => return Err(EvalError::runtime(format!("{} is not iterable", other.type_name()))),
                },
                e => out.push(self.expr(e)?),
            }
        }
        Ok(out)
    }

    // --- Calls ---

    fn call_expr(&mut self, callee: &Expr, args: &[Expr]) -> EvalResult<Value> {
        if let Expr::Member { object, property } = callee {
            let receiver = self.expr(object)?;
            let args = self.elements(args)?;
            return self.call_method(object, receiver, property, args);
        }
        let function = self.expr(callee)?;
        let args = self.elements(args)?;
        self.call_value(&function, args)
    }

    fn call_value(&mut self, function: &Value, args: Args) -> EvalResult<Value> {
        match function {
            Value::Function(closure) => self.call_closure(Rc::clone(closure), args),
            Value::Builtin(name) => builtins::call(name, &args),
            other => Err(EvalError::runtime(format!("{} is not a function", other.type_name()))),
        }
    }

    fn call_closure(&mut self, closure: Rc<Closure>, args: Args) -> EvalResult<Value> {
        if self.depth >= self.limits.max_call_depth {
            return Err(EvalError::runtime(format!(
                "maximum call depth of {} exceeded",
                self.limits.max_call_depth
            )));
        }
        let saved = self.current;
        let base = self.envs.len();
        let parent = match &closure.env {
            ClosureEnv::Arena(id) => *id,
            ClosureEnv::Detached(captured) => {
                let vars = captured
                    .iter()
                    .map(|(k, v)| (k.clone(), Binding { value: v.clone(), constant: false }))
                    .collect();
                self.envs.push(Env { parent: None, vars, captured: false });
                self.envs.len() - 1
            }
        };
        self.envs.push(Env { parent: Some(parent), ..Env::default() });
        self.current = self.envs.len() - 1;

        // Named functions can always call themselves.
        if let Some(name) = closure.name() {
            self.declare(name, Value::Function(Rc::clone(&closure)), false);
        }
        let mut args = args.into_iter();
        for param in &closure.def.params {
            self.declare(param, args.next().unwrap_or(Value::Null), false);
        }

        self.depth += 1;
        let result = match &closure.def.body {
            FunctionBody::Expr(e) => self.expr(e),
            FunctionBody::Block(body) => self.stmts(body).map(|flow| match flow {
                Flow::Return(v) => v,
                _ => Value::Null,
            }),
        };
        self.depth -= 1;
        self.current = saved;
        if self.envs[base..].iter().all(|e| !e.captured) {
            self.envs.truncate(base);
        }
        result
    }

    fn call_method(&mut self, object: &Expr, receiver: Value, name: &str, args: Args) -> EvalResult<Value> {
        match (&receiver, name) {
            (Value::Builtin(owner), _) => {
                let function = builtins::member(owner, name)?;
                self.call_value(&function, args)
            }
            (Value::Object(map), _) if matches!(map.get(name), Some(Value::Function(_) | Value::Builtin(_))) => {
                let function = map.get(name).cloned().unwrap_or(Value::Null);
                self.call_value(&function, args)
            }
            (Value::Array(items), "map" | "filter" | "reduce" | "forEach" | "some" | "every" | "find" | "findIndex") => {
                let items = Rc::clone(items);
                self.array_callback(&items, name, args)
            }
            (Value::Array(items), "sort") => {
                let sorted = Value::array(self.sorted(items.as_ref().clone(), args.first())?);
                if self.is_local_place(object) {
                    *self.place_or_binding(object)? = sorted.clone();
                }
                Ok(sorted)
            }
            (Value::Array(_), "push" | "pop" | "shift" | "unshift" | "reverse") => {
                // Reversing a template value yields a reversed copy; the others
                // only exist for their side effect, so they still report read-only.
                let write_back = object.is_place() && (name != "reverse" || self.is_local_place(object));
                if write_back {
                    drop(receiver);
                    let slot = self.place_or_binding(object)?;
                    mutate_array(slot, name, args)
                } else {
                    let mut temp = receiver;
                    mutate_array(&mut temp, name, args)
                }
            }
            _ => builtins::method(&receiver, name, &args),
        }
    }

    /// Whether a place expression is rooted in a formula-local variable.
    fn is_local_place(&self, object: &Expr) -> bool {
        place_root(object).map_or(false, |root| self.find(root).is_some())
    }

    fn place_or_binding(&mut self, object: &Expr) -> EvalResult<&mut Value> {
        match object {
            Expr::Ident(name) => Ok(&mut self.binding_mut(name)?.value),
            other => self.place(other),
        }
    }

    fn callback(&mut self, function: &Value, args: &[Value]) -> EvalResult<Value> {
        self.call_value(function, args.iter().cloned().collect())
    }

    fn array_callback(&mut self, items: &[Value], name: &str, args: Args) -> EvalResult<Value> {
        let function = match args.first() {
            Some(f @ (Value::Function(_) | Value::Builtin(_))) => f.clone(),
            _ => return Err(EvalError::runtime(format!("{}() expects a function", name))),
        };
        let index = |i: usize| Value::Number(i as f64);
        Ok(match name {
            "map" => {
                let mut out = Vec::with_capacity(items.len());
                for (i, v) in items.iter().enumerate() {
                    out.push(self.callback(&function, &[v.clone(), index(i)])?);
                }
                Value::array(out)
            }
            "filter" => {
                let mut out = Vec::new();
                for (i, v) in items.iter().enumerate() {
                    if self.callback(&function, &[v.clone(), index(i)])?.truthy() {
                        out.push(v.clone());
                    }
                }
                Value::array(out)
            }
            "forEach" => {
                for (i, v) in items.iter().enumerate() {
                    self.callback(&function, &[v.clone(), index(i)])?;
                }
                Value::Null
            }
            "some" | "every" => {
                let want = name == "some";
                for (i, v) in items.iter().enumerate() {
                    if self.callback(&function, &[v.clone(), index(i)])?.truthy() == want {
                        return Ok(Value::Bool(want));
                    }
                }
                Value::Bool(!want)
            }
            "find" | "findIndex" => {
                for (i, v) in items.iter().enumerate() {
                    if self.callback(&function, &[v.clone(), index(i)])?.truthy() {
                        return Ok(if name == "find" { v.clone() } else { index(i) });
                    }
                }
                if name == "find" { Value::Null } else { Value::Number(-1.0) }
            }
            _ => {
                let mut iter = items.iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(init) => init.clone(),
                    None => match iter.next() {
                        Some((_, first)) => first.clone(),
                        None => return Err(EvalError::runtime("reduce() of an empty array with no initial value")),
                    },
                };
                for (i, v) in iter {
                    acc = self.callback(&function, &[acc, v.clone(), index(i)])?;
                }
                acc
            }
        })
    }

    /// Stable merge sort; the comparator may fail, so `slice::sort_by` is not used.
    fn sorted(&mut self, items: Vec<Value>, comparator: Option<&Value>) -> EvalResult<Vec<Value>> {
        if items.len() < 2 {
            return Ok(items);
        }
        let mut right = items;
        let left: Vec<Value> = right.drain(..right.len() / 2).collect();
        let left = self.sorted(left, comparator)?;
        let right = self.sorted(right, comparator)?;
        let mut out = Vec::with_capacity(left.len() + right.len());
        let (mut l, mut r) = (left.into_iter().peekable(), right.into_iter().peekable());
        while let (Some(a), Some(b)) = (l.peek(), r.peek()) {
            let take_right = match comparator {
                Some(f) => {
                    let order = self.callback(f, &[a.clone(), b.clone()])?;
                    matches!(order, Value::Number(n) if n > 0.0)
                }
                None => default_order(a, b) == Ordering::Greater,
            };
            let next = if take_right { r.next() } else { l.next() };
            out.extend(next);
        }
        out.extend(l);
        out.extend(r);
        Ok(out)
    }

    // --- Escape ---

    /// Makes a value independent of this interpreter's arena.
    fn detach(&self, value: Value) -> Value {
        self.detach_with(value, &mut Detaching::default())
    }

    fn detach_with(&self, value: Value, state: &mut Detaching) -> Value {
        match value {
            Value::Function(closure) => {
                let id = match closure.env {
                    ClosureEnv::Arena(id) => id,
                    ClosureEnv::Detached(_) => return Value::Function(closure),
                };
                let key = Rc::as_ptr(&closure);
                if let Some(done) = state.done.get(&key) {
                    return done.clone();
                }
                if !state.active.insert(key) {
                    // Reached through its own captured bindings.
                    return Value::Null;
                }
                let captured = self.snapshot(id, state);
                state.active.remove(&key);
                let detached = Value::Function(Rc::new(Closure {
                    def: Arc::clone(&closure.def),
                    env: ClosureEnv::Detached(Rc::new(captured)),
                }));
                state.done.insert(key, detached.clone());
                detached
            }
            Value::Array(items) if items.iter().any(contains_function) => {
                Value::array(items.iter().map(|v| self.detach_with(v.clone(), state)).collect())
            }
            Value::Object(map) if map.values().any(contains_function) => Value::object(
                map.iter().map(|(k, v)| (k.clone(), self.detach_with(v.clone(), state))).collect(),
            ),
            other => other,
        }
    }

    /// Visible bindings of an arena slot, with local functions detached in
    /// turn. A function being detached is left out of its own snapshot;
    /// named functions rebind themselves when called.
    fn snapshot(&self, id: usize, state: &mut Detaching) -> HashMap<String, Value> {
        let mut out = HashMap::new();
        let mut shadowed = HashSet::new();
        let mut env = Some(id);
        while let Some(i) = env {
            for (name, binding) in &self.envs[i].vars {
                if !shadowed.insert(name.as_str()) {
                    continue;
                }
                let value = match &binding.value {
                    Value::Function(c) if state.active.contains(&Rc::as_ptr(c)) => continue,
                    v if contains_function(v) => self.detach_with(v.clone(), state),
                    v => v.clone(),
                };
                out.insert(name.clone(), value);
            }
            env = self.envs[i].parent;
        }
        out
    }
}

/// Closures met while detaching one value.
#[derive(Default)]
struct Detaching {
    active: HashSet<*const Closure>,
    done: HashMap<*const Closure, Value>,
}

/// Declarations of a C-style `for` initializer.
fn for_init(init: Option<&Stmt>) -> &[Stmt] {
    match init {
        Some(Stmt::Block(decls)) => decls.as_slice(),
        Some(other) => std::slice::from_ref(other),
        None => &[],
    }
}

fn place_root(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Ident(name) => Some(name.as_str()),
        Expr::Member { object, .. } | Expr::Index { object, .. } => place_root(object),
        _ => None,
    }
}

fn contains_function(value: &Value) -> bool {
    match value {
        Value::Function(_) => true,
        Value::Array(items) => items.iter().any(contains_function),
        Value::Object(map) => map.values().any(contains_function),
        _ => false,
    }
}

fn place_mut<'v>(slot: &'v mut Value, path: &[Key]) -> EvalResult<&'v mut Value> {
    let Some((key, rest)) = path.split_first() else {
        return Ok(slot);
    };
    let child = match slot {
        Value::Array(items) => {
            let len = items.len();
            let i = match key {
                Key::Value(Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 && (*n as usize) <= len => *n as usize,
                Key::Value(Value::Number(n)) => {
                    return Err(EvalError::runtime(format!(
                        "index {} out of bounds for array of length {}",
                        format_number(*n),
                        len
                    )))
                }
                _ => return Err(EvalError::runtime("array elements are assigned by numeric index")),
            };
            let items = Rc::make_mut(items);
            if i == items.len() {
                items.push(Value::Null);
            }
            &mut items[i]
        }
        Value::Object(map) => Rc::make_mut(map).entry(key.object_key()?).or_insert(Value::Null),
        other => {
            return Err(EvalError::runtime(format!("cannot set a property on {}", other.type_name())))
        }
    };
    place_mut(child, rest)
}

fn mutate_array(slot: &mut Value, name: &str, args: Args) -> EvalResult<Value> {
    let Value::Array(items) = slot else {
        return Err(EvalError::runtime(format!("{}() requires an array", name)));
    };
    let items = Rc::make_mut(items);
    Ok(match name {
        "push" => {
            items.extend(args);
            Value::Number(items.len() as f64)
        }
        "pop" => items.pop().unwrap_or(Value::Null),
        "shift" => {
            if items.is_empty() { Value::Null } else { items.remove(0) }
        }
        "unshift" => {
            let mut front = args.into_vec();
            front.append(items);
            *items = front;
            Value::Number(items.len() as f64)
        }
        _ => {
            items.reverse();
            slot.clone()
        }
    })
}

/// Numbers sort numerically and before everything else, which sorts by text.
fn default_order(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.total_cmp(y),
        (Value::Number(_), _) => Ordering::Less,
        (_, Value::Number(_)) => Ordering::Greater,
        _ => a.to_display().cmp(&b.to_display()),
    }
}

fn index_value(object: &Value, key: &Value) -> EvalResult<Value> {
    match (object, key) {
        (Value::Array(items), Value::Number(n)) => {
            if *n >= 0.0 && n.fract() == 0.0 && (*n as usize) < items.len() {
                Ok(items[*n as usize].clone())
            } else {
                Err(EvalError::runtime(format!(
                    "index {} out of bounds for array of length {}",
                    format_number(*n),
                    items.len()
                )))
            }
        }
        (Value::Text(s), Value::Number(n)) => {
            let c = if *n >= 0.0 && n.fract() == 0.0 { s.chars().nth(*n as usize) } else { None };
            c.map(|c| Value::Text(c.to_string())).ok_or_else(|| {
                EvalError::runtime(format!("index {} out of bounds for string", format_number(*n)))
            })
        }
        (Value::Object(map), Value::Number(n)) => Ok(map.get(&format_number(*n)).cloned().unwrap_or(Value::Null)),
        (_, Value::Text(key)) => builtins::property(object, key),
        (Value::Null, _) => Err(EvalError::runtime("cannot index null")),
        (other, key) => Err(EvalError::runtime(format!(
            "cannot index {} with {}",
            other.type_name(),
            key.type_name()
        ))),
    }
}

fn symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Pow => "**",
        BinaryOp::Eq => "===",
        BinaryOp::NotEq => "!==",
        BinaryOp::Lt => "<",
        BinaryOp::LtEq => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::GtEq => ">=",
    }
}

/// Applies a binary operator. Both equality spellings compare strictly.
pub fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> EvalResult<Value> {
    let mismatch = |l: &Value, r: &Value| {
        EvalError::runtime(format!(
            "cannot apply '{}' to {} and {}",
            symbol(op),
            l.type_name(),
            r.type_name()
        ))
    };
    Ok(match op {
        BinaryOp::Add => match (&lhs, &rhs) {
            (Value::Number(a), Value::Number(b)) => Value::Number(a + b),
            (Value::Text(_), _) | (_, Value::Text(_)) => {
                Value::Text(lhs.to_display() + &rhs.to_display())
            }
            _ => return Err(mismatch(&lhs, &rhs)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem | BinaryOp::Pow => {
            let (Value::Number(a), Value::Number(b)) = (&lhs, &rhs) else {
                return Err(mismatch(&lhs, &rhs));
            };
            let (a, b) = (*a, *b);
            Value::Number(match op {
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div | BinaryOp::Rem if b == 0.0 => return Err(EvalError::runtime("division by zero")),
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                _ => a.powf(b),
            })
        }
        BinaryOp::Eq => Value::Bool(lhs == rhs),
        BinaryOp::NotEq => Value::Bool(lhs != rhs),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let order = match (&lhs, &rhs) {
                (Value::Number(a), Value::Number(b)) => a.partial_cmp(b),
                (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
                (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
                _ => return Err(mismatch(&lhs, &rhs)),
            };
            Value::Bool(match order {
                None => false,
                Some(o) => match op {
                    BinaryOp::Lt => o == Ordering::Less,
                    BinaryOp::LtEq => o != Ordering::Greater,
                    BinaryOp::Gt => o == Ordering::Greater,
                    _ => o != Ordering::Less,
                },
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::parse_program;
    use rstest::rstest;

    fn eval_with(src: &str, scope: &Scope) -> EvalResult<Value> {
        let program = parse_program(src).unwrap();
        evaluate(&program, scope, Limits::default())
    }

    fn eval(src: &str) -> EvalResult<Value> {
        eval_with(src, &Scope::new())
    }

    fn num(src: &str) -> f64 {
        match eval(src).unwrap() {
            Value::Number(n) => n,
            other => panic!("expected a number, got {:?}", other),
        }
    }

    #[rstest]
    #[case("1 + 2 * 3", 7.0)]
    #[case("2 ** 3 ** 2", 512.0)]
    #[case("7 % 3", 1.0)]
    #[case("let x = 10; x += 5; x *= 2; return x", 30.0)]
    #[case("let i = 0; i++; i++; i--; return i", 1.0)]
    #[case("Math.max(...[3, 9, 4])", 9.0)]
    #[case("[1, 2, 3, 4].reduce((a, b) => a + b, 0)", 10.0)]
    #[case("[1, 2, 3].map(x => x * 2).filter(x => x > 2).length", 2.0)]
    #[case("const { a, b: c } = { a: 2, b: 5 }; return a * c", 10.0)]
    #[case("const [x, , z] = [1, 2, 3]; return x + z", 4.0)]
    #[case("null ?? 4", 4.0)]
    fn test_expressions(#[case] src: &str, #[case] expected: f64) {
        assert_eq!(num(src), expected);
    }

    #[test]
    fn test_completion_value() {
        assert_eq!(eval("1; 2; 3").unwrap(), Value::Number(3.0));
        assert_eq!(eval("let a = 1").unwrap(), Value::Null);
        assert_eq!(eval("if (true) { return 5 } 6").unwrap(), Value::Number(5.0));
    }

    #[test]
    fn test_loops_and_control_flow() {
        let src = "
            let total = 0
            for (let i = 0; i < 10; i++) {
                if (i % 2 === 0) continue
                if (i > 7) break
                total += i
            }
            let j = 0
            while (j < 3) { j++ }
            do { j++ } while (false)
            for (const k in { a: 1, b: 2 }) { total += k.length }
            return total + j";
        // 1 + 3 + 5 + 7 = 16, two keys of length 1, j = 4
        assert_eq!(eval(src).unwrap(), Value::Number(22.0));
    }

    #[test]
    fn test_switch_falls_through_until_break() {
        let src = "
            let out = ''
            switch (tipo) {
                case 'a': out += 'a'
                case 'b': out += 'b'; break
                case 'c': out += 'c'
                default: out += 'd'
            }
            return out";
        let mut scope = Scope::new();
        scope.insert("tipo".into(), Value::Text("a".into()));
        assert_eq!(eval_with(src, &scope).unwrap(), Value::Text("ab".into()));
        scope.insert("tipo".into(), Value::Text("z".into()));
        assert_eq!(eval_with(src, &scope).unwrap(), Value::Text("d".into()));
    }

    #[test]
    fn test_closures_share_enclosing_variables() {
        let src = "
            let count = 0
            const items = [1, 2, 3]
            items.forEach(x => { count += x })
            const add = n => m => n + m
            return count * 10 + add(2)(3)";
        assert_eq!(num(src), 65.0);
    }

    #[test]
    fn test_recursion_and_call_depth() {
        assert_eq!(num("function fact(n) { return n <= 1 ? 1 : n * fact(n - 1) } fact(5)"), 120.0);
        let err = eval("function f(n) { return f(n + 1) } f(0)").unwrap_err();
        assert!(matches!(err, EvalError::Runtime { ref message } if message.contains("call depth")));
    }

    #[test]
    fn test_infinite_loop_hits_iteration_limit() {
        let program = parse_program("while (true) {}").unwrap();
        let limits = Limits { max_iterations: 1_000, ..Limits::default() };
        let err = evaluate(&program, &Scope::new(), limits).unwrap_err();
        assert_eq!(err, EvalError::IterationLimitExceeded { limit: 1_000 });
    }

    #[test]
    fn test_array_mutation_through_places() {
        let src = "
            const xs = []
            for (const v of [3, 1, 2]) { xs.push(v * 10) }
            const o = { list: [1] }
            o.list.push(2)
            o.count = o.list.length
            xs.sort((a, b) => a - b)
            xs[0] = 5
            return [xs.join('-'), o.count, xs.pop()]";
        let expected = Value::array(vec![Value::Text("5-20-30".into()), Value::Number(2.0), Value::Number(30.0)]);
        assert_eq!(eval(src).unwrap(), expected);
    }

    #[test]
    fn test_template_scope_is_read_only() {
        let mut scope = Scope::new();
        scope.insert("base".into(), Value::Number(1.0));
        let err = eval_with("base = 2", &scope).unwrap_err();
        assert!(matches!(err, EvalError::Runtime { .. }));
        assert!(eval("const k = 1; k = 2").is_err());
    }

    #[rstest]
    #[case("1 / 0")]
    #[case("'a' - 1")]
    #[case("[1, 2][5]")]
    #[case("null.x")]
    #[case("(1)(2)")]
    #[case("Math.random()")]
    fn test_runtime_errors(#[case] src: &str) {
        assert!(matches!(eval(src).unwrap_err(), EvalError::Runtime { .. }), "{}", src);
    }

    #[test]
    fn test_unknown_identifier_is_unbound() {
        assert_eq!(eval("x + 1").unwrap_err(), EvalError::unbound("x"));
    }

    #[test]
    fn test_strict_equality_and_strings() {
        assert_eq!(eval("'1' == 1").unwrap(), Value::Bool(false));
        assert_eq!(eval("`area: ${2 * 3} m2`").unwrap(), Value::Text("area: 6 m2".into()));
        assert_eq!(eval("'n' + 1.5").unwrap(), Value::Text("n1.5".into()));
    }

    #[test]
    fn test_template_arrays_sort_into_copies() {
        let mut scope = Scope::new();
        let d = Value::array(vec![Value::Number(3.0), Value::Number(1.0), Value::Number(2.0)]);
        scope.insert("d".into(), d.clone());
        let got = eval_with("const s = d.sort((a, b) => a - b); return [s[0], d[0], d.reverse()[0]]", &scope).unwrap();
        assert_eq!(got, Value::array(vec![Value::Number(1.0), Value::Number(3.0), Value::Number(2.0)]));
        assert_eq!(scope["d"], d);
        let err = eval_with("d.push(4)", &scope).unwrap_err();
        assert!(matches!(err, EvalError::Runtime { ref message } if message.contains("read-only")));
    }

    #[test]
    fn test_loop_bindings_destructure_and_declarator_lists() {
        let src = "
            const muros = [{ longitud: 4, espesor: 0.25 }, { longitud: 2, espesor: 0.5 }]
            let volumen = 0
            for (const { longitud, espesor } of muros) { volumen += longitud * espesor }
            for (const [k, v] of [['a', 1], ['b', 2]]) { volumen += v }
            let s = 0
            const xs = [1, 2, 3]
            for (let i = 0, n = xs.length; i < n; i++) { s += xs[i] }
            return volumen * 10 + s";
        // (2 + 3) * 10 + 6
        assert_eq!(num(src), 56.0);
    }

    #[test]
    fn test_escaped_helper_keeps_local_functions() {
        let helper = eval(
            "const doble = v => v * 2
            function triple(v) { return v * 3 }
            function h(y) { return doble(y) + triple(y) + (y > 0 ? h(y - 1) : 0) }",
        )
        .unwrap();
        let mut scope = Scope::new();
        scope.insert("h".into(), helper);
        // h(2) = 10 + h(1) = 10 + 5
        assert_eq!(eval_with("h(2)", &scope).unwrap(), Value::Number(15.0));
    }

    #[test]
    fn test_escaped_helper_is_callable_from_another_scope() {
        let helper = eval("function sa(T) { return T < 1 ? Z * 2.5 : Z * 2.5 / T }").unwrap();
        let mut scope = Scope::new();
        scope.insert("sa".into(), helper);
        scope.insert("Z".into(), Value::Number(0.4));
        assert_eq!(eval_with("sa(0.5) + sa(2)", &scope).unwrap(), Value::Number(1.5));
    }
}
