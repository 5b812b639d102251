// visit.rs — Visitor and mutator traits over the IR
//
// `IrVisitor` walks a tree by shared reference (default: recurse into every
// child). `IrMutator` consumes a tree and rebuilds it (default: identity
// reconstruction). Passes override `visit_expr`/`mutate_stmt` etc. and match
// on the node kinds they care about, delegating the rest to the walk
// functions.

use crate::ir::{Expr, Stmt};

// ── Visitor ────────────────────────────────────────────────────────────────

pub trait IrVisitor: Sized {
    fn visit_expr(&mut self, e: &Expr) {
        walk_expr(self, e);
    }

    fn visit_stmt(&mut self, s: &Stmt) {
        walk_stmt(self, s);
    }
}

pub fn walk_expr<V: IrVisitor>(v: &mut V, e: &Expr) {
    match e {
        Expr::Int(_)
        | Expr::Float(_)
        | Expr::Bool(_)
        | Expr::Str(_)
        | Expr::Var(_)
        | Expr::Handle(_) => {}
        Expr::Add(a, b)
        | Expr::Sub(a, b)
        | Expr::Mul(a, b)
        | Expr::Div(a, b)
        | Expr::Mod(a, b)
        | Expr::Min(a, b)
        | Expr::Max(a, b)
        | Expr::Eq(a, b)
        | Expr::Le(a, b)
        | Expr::Lt(a, b)
        | Expr::And(a, b) => {
            v.visit_expr(a);
            v.visit_expr(b);
        }
        Expr::Call { args, .. } => {
            for a in args {
                v.visit_expr(a);
            }
        }
    }
}

pub fn walk_stmt<V: IrVisitor>(v: &mut V, s: &Stmt) {
    match s {
        Stmt::Provide { values, site, .. } => {
            for e in values {
                v.visit_expr(e);
            }
            for e in site {
                v.visit_expr(e);
            }
        }
        Stmt::For {
            min, extent, body, ..
        } => {
            v.visit_expr(min);
            v.visit_expr(extent);
            v.visit_stmt(body);
        }
        Stmt::Let { value, body, .. } => {
            v.visit_expr(value);
            v.visit_stmt(body);
        }
        Stmt::IfThenElse {
            condition,
            then_case,
            else_case,
        } => {
            v.visit_expr(condition);
            v.visit_stmt(then_case);
            if let Some(e) = else_case {
                v.visit_stmt(e);
            }
        }
        Stmt::Block { first, rest } => {
            v.visit_stmt(first);
            v.visit_stmt(rest);
        }
        Stmt::Realize {
            bounds,
            condition,
            body,
            ..
        } => {
            for r in bounds {
                v.visit_expr(&r.min);
                v.visit_expr(&r.extent);
            }
            v.visit_expr(condition);
            v.visit_stmt(body);
        }
        Stmt::ProducerConsumer { body, .. } => v.visit_stmt(body),
        Stmt::Assert { condition, message } => {
            v.visit_expr(condition);
            v.visit_expr(message);
        }
        Stmt::Evaluate(e) => v.visit_expr(e),
    }
}

// ── Mutator ────────────────────────────────────────────────────────────────

pub trait IrMutator: Sized {
    fn mutate_expr(&mut self, e: Expr) -> Expr {
        remake_expr(self, e)
    }

    fn mutate_stmt(&mut self, s: Stmt) -> Stmt {
        remake_stmt(self, s)
    }
}

pub fn remake_expr<M: IrMutator>(m: &mut M, e: Expr) -> Expr {
    fn bin<M: IrMutator>(
        m: &mut M,
        a: Box<Expr>,
        b: Box<Expr>,
        make: fn(Box<Expr>, Box<Expr>) -> Expr,
    ) -> Expr {
        make(Box::new(m.mutate_expr(*a)), Box::new(m.mutate_expr(*b)))
    }
    match e {
        Expr::Int(_)
        | Expr::Float(_)
        | Expr::Bool(_)
        | Expr::Str(_)
        | Expr::Var(_)
        | Expr::Handle(_) => e,
        Expr::Add(a, b) => bin(m, a, b, Expr::Add),
        Expr::Sub(a, b) => bin(m, a, b, Expr::Sub),
        Expr::Mul(a, b) => bin(m, a, b, Expr::Mul),
        Expr::Div(a, b) => bin(m, a, b, Expr::Div),
        Expr::Mod(a, b) => bin(m, a, b, Expr::Mod),
        Expr::Min(a, b) => bin(m, a, b, Expr::Min),
        Expr::Max(a, b) => bin(m, a, b, Expr::Max),
        Expr::Eq(a, b) => bin(m, a, b, Expr::Eq),
        Expr::Le(a, b) => bin(m, a, b, Expr::Le),
        Expr::Lt(a, b) => bin(m, a, b, Expr::Lt),
        Expr::And(a, b) => bin(m, a, b, Expr::And),
        Expr::Call { name, args, kind } => Expr::Call {
            name,
            args: args.into_iter().map(|a| m.mutate_expr(a)).collect(),
            kind,
        },
    }
}

pub fn remake_stmt<M: IrMutator>(m: &mut M, s: Stmt) -> Stmt {
    match s {
        Stmt::Provide { name, values, site } => Stmt::Provide {
            name,
            values: values.into_iter().map(|e| m.mutate_expr(e)).collect(),
            site: site.into_iter().map(|e| m.mutate_expr(e)).collect(),
        },
        Stmt::For {
            name,
            min,
            extent,
            for_type,
            device_api,
            body,
        } => Stmt::For {
            name,
            min: m.mutate_expr(min),
            extent: m.mutate_expr(extent),
            for_type,
            device_api,
            body: Box::new(m.mutate_stmt(*body)),
        },
        Stmt::Let { name, value, body } => Stmt::Let {
            name,
            value: m.mutate_expr(value),
            body: Box::new(m.mutate_stmt(*body)),
        },
        Stmt::IfThenElse {
            condition,
            then_case,
            else_case,
        } => Stmt::IfThenElse {
            condition: m.mutate_expr(condition),
            then_case: Box::new(m.mutate_stmt(*then_case)),
            else_case: else_case.map(|e| Box::new(m.mutate_stmt(*e))),
        },
        Stmt::Block { first, rest } => Stmt::Block {
            first: Box::new(m.mutate_stmt(*first)),
            rest: Box::new(m.mutate_stmt(*rest)),
        },
        Stmt::Realize {
            name,
            types,
            bounds,
            condition,
            body,
        } => Stmt::Realize {
            name,
            types,
            bounds: bounds
                .into_iter()
                .map(|r| crate::ir::Range {
                    min: m.mutate_expr(r.min),
                    extent: m.mutate_expr(r.extent),
                })
                .collect(),
            condition: m.mutate_expr(condition),
            body: Box::new(m.mutate_stmt(*body)),
        },
        Stmt::ProducerConsumer {
            name,
            is_producer,
            body,
        } => Stmt::ProducerConsumer {
            name,
            is_producer,
            body: Box::new(m.mutate_stmt(*body)),
        },
        Stmt::Assert { condition, message } => Stmt::Assert {
            condition: m.mutate_expr(condition),
            message: m.mutate_expr(message),
        },
        Stmt::Evaluate(e) => Stmt::Evaluate(m.mutate_expr(e)),
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
