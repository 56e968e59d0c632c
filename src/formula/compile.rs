//! Compiles formula text into a [`CompiledFormula`]: the parsed program plus
//! the set of identifiers it reads from its enclosing scope.
use super::ast::*;
use super::parser::parse_program;
use crate::compute::error::EvalResult;
use std::collections::{BTreeSet, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFormula {
    pub source: String,
    pub program: Program,
    /// Identifiers not bound inside the formula, sorted.
    pub free_identifiers: BTreeSet<String>,
}

impl CompiledFormula {
    pub fn references(&self, name: &str) -> bool {
        self.free_identifiers.contains(name)
    }
}

pub fn compile(source: &str) -> EvalResult<CompiledFormula> {
    let program = parse_program(source)?;
    let free_identifiers = free_identifiers(&program);
    Ok(CompiledFormula { source: source.to_string(), program, free_identifiers })
}

/// Collects identifiers read but not declared in the program.
pub fn free_identifiers(program: &Program) -> BTreeSet<String> {
    let mut collector = FreeVars { scopes: Vec::new(), free: BTreeSet::new() };
    collector.block(&program.body, &[]);
    collector.free
}

struct FreeVars {
    scopes: Vec<HashSet<String>>,
    free: BTreeSet<String>,
}

impl FreeVars {
    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.contains(name))
    }

    fn use_name(&mut self, name: &str) {
        if !self.is_bound(name) {
            self.free.insert(name.to_string());
        }
    }

    /// Declarations are hoisted to the start of their block.
    fn block(&mut self, body: &[Stmt], extra: &[&str]) {
        let mut scope: HashSet<String> = extra.iter().map(|s| s.to_string()).collect();
        for stmt in body {
            match stmt {
                Stmt::Let { pattern, .. } => {
                    scope.extend(pattern.bound_names().into_iter().map(str::to_string));
                }
                Stmt::Function(def) => {
                    if let Some(name) = &def.name {
                        scope.insert(name.clone());
                    }
                }
                _ => {}
            }
        }
        self.scopes.push(scope);
        for stmt in body {
            self.stmt(stmt);
        }
        self.scopes.pop();
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Let { init, .. } => {
                if let Some(e) = init {
                    self.expr(e);
                }
            }
            Stmt::Assign { target, value, .. } => {
                self.expr(target);
                self.expr(value);
            }
            Stmt::Expr(e) => self.expr(e),
            Stmt::If { cond, then, otherwise } => {
                self.expr(cond);
                self.block(then, &[]);
                if let Some(o) = otherwise {
                    self.block(o, &[]);
                }
            }
            Stmt::While { cond, body } | Stmt::DoWhile { body, cond } => {
                self.expr(cond);
                self.block(body, &[]);
            }
            Stmt::For { init, cond, update, body } => {
                let decls: &[Stmt] = match init.as_deref() {
                    Some(Stmt::Block(decls)) => decls.as_slice(),
                    Some(other) => std::slice::from_ref(other),
                    None => &[],
                };
                let mut scope = HashSet::new();
                for decl in decls {
                    if let Stmt::Let { pattern, .. } = decl {
                        scope.extend(pattern.bound_names().into_iter().map(str::to_string));
                    }
                }
                self.scopes.push(scope);
                for decl in decls {
                    self.stmt(decl);
                }
                if let Some(c) = cond {
                    self.expr(c);
                }
                if let Some(u) = update {
                    self.stmt(u);
                }
                self.block(body, &[]);
                self.scopes.pop();
            }
            Stmt::ForOf { binding, iterable: source, body } | Stmt::ForIn { binding, object: source, body } => {
                self.expr(source);
                self.block(body, &binding.bound_names());
            }
            Stmt::Switch { discriminant, cases } => {
                self.expr(discriminant);
                for case in cases {
                    if let Some(t) = &case.test {
                        self.expr(t);
                    }
                    self.block(&case.body, &[]);
                }
            }
            Stmt::Block(body) => self.block(body, &[]),
            Stmt::Function(def) => self.function(def),
            Stmt::Return(value) => {
                if let Some(v) = value {
                    self.expr(v);
                }
            }
            Stmt::Break | Stmt::Continue => {}
        }
    }

    fn function(&mut self, def: &FunctionDef) {
        let mut bound: Vec<&str> = def.params.iter().map(String::as_str).collect();
        if let Some(name) = &def.name {
            bound.push(name);
        }
        match &def.body {
            FunctionBody::Expr(e) => {
                self.scopes.push(bound.iter().map(|s| s.to_string()).collect());
                self.expr(e);
                self.scopes.pop();
            }
            FunctionBody::Block(body) => self.block(body, &bound),
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Number(_) | Expr::Str(_) | Expr::Bool(_) | Expr::Null => {}
            Expr::Ident(name) => self.use_name(name),
            Expr::Template(parts) => {
                for part in parts {
                    if let TemplatePart::Expr(e) = part {
                        self.expr(e);
                    }
                }
            }
            Expr::Array(items) => items.iter().for_each(|e| self.expr(e)),
            Expr::Object(entries) => {
                for entry in entries {
                    match entry {
                        ObjectEntry::Property(_, e) | ObjectEntry::Spread(e) => self.expr(e),
                    }
                }
            }
            Expr::Spread(e) | Expr::Unary { expr: e, .. } => self.expr(e),
            Expr::Member { object, .. } => self.expr(object),
            Expr::Binary { lhs, rhs, .. } | Expr::Logical { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::Index { object, index } => {
                self.expr(object);
                self.expr(index);
            }
            Expr::Conditional { cond, then, otherwise } => {
                self.expr(cond);
                self.expr(then);
                self.expr(otherwise);
            }
            Expr::Call { callee, args } => {
                self.expr(callee);
                args.iter().for_each(|a| self.expr(a));
            }
            Expr::Function(def) => self.function(def),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn free(src: &str) -> Vec<String> {
        compile(src).unwrap().free_identifiers.into_iter().collect()
    }

    #[test]
    fn test_locals_are_not_free() {
        assert_eq!(
            free("const area = longitud * ancho;\nreturn { area, total: area * carga };"),
            ["ancho", "carga", "longitud"]
        );
    }

    #[test]
    fn test_function_params_and_names_are_bound() {
        assert_eq!(
            free("function sa(T) { return T < T0 ? Fa * Z : sa(T / 2) }"),
            ["Fa", "T0", "Z"]
        );
        assert_eq!(free("xs.map(x => x * k)"), ["k", "xs"]);
    }

    #[test]
    fn test_loop_bindings_are_scoped() {
        assert_eq!(
            free("let s = 0; for (let i = 0; i < n; i++) { s += v[i] } for (const d of ds) { s += d } return s"),
            ["ds", "n", "v"]
        );
    }

    #[test]
    fn test_loop_patterns_and_declarator_lists_are_bound() {
        assert_eq!(
            free("let t = 0; for (const { longitud, espesor: e } of muros) { t += longitud * e * k } return t"),
            ["k", "muros"]
        );
        assert_eq!(free("let s = 0; for (let i = 0, n = xs.length; i < n; i++) { s += xs[i] } return s"), ["xs"]);
    }

    #[test]
    fn test_member_names_are_not_identifiers() {
        assert_eq!(free("Math.sqrt(muro.longitud)"), ["Math", "muro"]);
    }

    #[test]
    fn test_block_local_does_not_leak() {
        assert_eq!(free("if (a) { let t = 1 } return t"), ["a", "t"]);
    }
}
