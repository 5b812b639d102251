// subst.rs — Variable substitution and use queries
//
// Small mutators and visitors shared by every lowering stage: substituting a
// value for a named variable, asking whether an expression mentions a
// variable, qualifying free variables with a stage prefix, and detecting
// impure calls (which pin predicates in place during hoisting).

use crate::ir::{Expr, Stmt};
use crate::visit::{remake_expr, walk_expr, IrMutator, IrVisitor};

// ── substitute ─────────────────────────────────────────────────────────────

struct Substitute<'a> {
    name: &'a str,
    value: &'a Expr,
}

impl IrMutator for Substitute<'_> {
    fn mutate_expr(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Var(ref n) if n == self.name => self.value.clone(),
            other => remake_expr(self, other),
        }
    }
}

/// Replace every reference to scalar variable `name` in `s` with `value`.
pub fn substitute(name: &str, value: &Expr, s: Stmt) -> Stmt {
    Substitute { name, value }.mutate_stmt(s)
}

/// Expression form of [`substitute`].
pub fn substitute_expr(name: &str, value: &Expr, e: Expr) -> Expr {
    Substitute { name, value }.mutate_expr(e)
}

// ── expr_uses_var ──────────────────────────────────────────────────────────

struct UsesVar<'a> {
    name: &'a str,
    found: bool,
}

impl IrVisitor for UsesVar<'_> {
    fn visit_expr(&mut self, e: &Expr) {
        match e {
            Expr::Var(n) | Expr::Handle(n) if n == self.name => self.found = true,
            _ => walk_expr(self, e),
        }
    }
}

/// True iff `e` references the variable `name`.
pub fn expr_uses_var(e: &Expr, name: &str) -> bool {
    let mut v = UsesVar { name, found: false };
    v.visit_expr(e);
    v.found
}

// ── qualify ────────────────────────────────────────────────────────────────

struct Qualify<'a> {
    prefix: &'a str,
}

impl IrMutator for Qualify<'_> {
    fn mutate_expr(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Var(n) if !n.contains('.') => Expr::Var(format!("{}{}", self.prefix, n)),
            other => remake_expr(self, other),
        }
    }
}

/// Rewrite every unqualified variable reference in `e` to `prefix + name`.
/// Already-qualified references (containing a dot) are left alone.
pub fn qualify(prefix: &str, e: Expr) -> Expr {
    Qualify { prefix }.mutate_expr(e)
}

// ── contains_impure_call ───────────────────────────────────────────────────

struct ImpureCall {
    found: bool,
}

impl IrVisitor for ImpureCall {
    fn visit_expr(&mut self, e: &Expr) {
        if !e.is_pure_call() {
            self.found = true;
        } else {
            walk_expr(self, e);
        }
    }
}

/// True iff `e` contains a call whose evaluation is not pure. Hoisting a
/// predicate over such a call would change how often it executes.
pub fn contains_impure_call(e: &Expr) -> bool {
    let mut v = ImpureCall { found: false };
    v.visit_expr(e);
    v.found
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    #[test]
    fn substitute_replaces_all_references() {
        let s = Stmt::Provide {
            name: "f".into(),
            values: vec![add(var("x"), var("x"))],
            site: vec![var("x")],
        };
        let out = substitute("x", &add(var("xo"), var("xi")), s);
        match out {
            Stmt::Provide { values, site, .. } => {
                assert_eq!(values[0], add(add(var("xo"), var("xi")), add(var("xo"), var("xi"))));
                assert_eq!(site[0], add(var("xo"), var("xi")));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn qualify_skips_dotted_names() {
        let e = add(var("x"), var("g.s0.y"));
        assert_eq!(qualify("f.s0.", e), add(var("f.s0.x"), var("g.s0.y")));
    }

    #[test]
    fn uses_var_sees_handles() {
        assert!(expr_uses_var(&handle("f.buffer"), "f.buffer"));
        assert!(!expr_uses_var(&var("x"), "y"));
    }

    #[test]
    fn extern_calls_are_impure() {
        assert!(contains_impure_call(&extern_call("random_float", vec![])));
        assert!(!contains_impure_call(&likely(var("x"))));
        // An impure call nested under an intrinsic still counts.
        assert!(contains_impure_call(&likely(extern_call("rand", vec![]))));
    }
}
