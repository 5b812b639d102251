// simplify.rs — Structural simplification of bound expressions
//
// A small bottom-up folder used on computed loop bounds (union bounds,
// collapsed extents, `__outermost` values). Not a general simplifier: it
// folds integer constants, strips arithmetic identities, and collapses
// trivial min/max. Anything it cannot prove it leaves alone.

use crate::ir::Expr;

/// Recursively simplify an expression.
pub fn simplify(e: Expr) -> Expr {
    match e {
        Expr::Add(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Int(x + y),
                (Expr::Int(0), _) => b,
                (_, Expr::Int(0)) => a,
                _ => {
                    // (x - y) + y cancels; shows up in max-min+1 extents.
                    if let Expr::Sub(x, y) = &a {
                        if **y == b {
                            return (**x).clone();
                        }
                    }
                    Expr::Add(Box::new(a), Box::new(b))
                }
            }
        }
        Expr::Sub(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Int(x - y),
                (_, Expr::Int(0)) => a,
                _ if a == b => Expr::Int(0),
                _ => {
                    // (x + y) - y → x
                    if let Expr::Add(x, y) = &a {
                        if **y == b {
                            return (**x).clone();
                        }
                        if **x == b {
                            return (**y).clone();
                        }
                    }
                    Expr::Sub(Box::new(a), Box::new(b))
                }
            }
        }
        Expr::Mul(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Int(x * y),
                (Expr::Int(0), _) | (_, Expr::Int(0)) => Expr::Int(0),
                (Expr::Int(1), _) => b,
                (_, Expr::Int(1)) => a,
                _ => Expr::Mul(Box::new(a), Box::new(b)),
            }
        }
        Expr::Div(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) if *y != 0 => Expr::Int(x.div_euclid(*y)),
                (_, Expr::Int(1)) => a,
                _ => Expr::Div(Box::new(a), Box::new(b)),
            }
        }
        Expr::Mod(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) if *y != 0 => Expr::Int(x.rem_euclid(*y)),
                (_, Expr::Int(1)) => Expr::Int(0),
                _ => Expr::Mod(Box::new(a), Box::new(b)),
            }
        }
        Expr::Min(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Int(*x.min(y)),
                _ if a == b => a,
                _ => Expr::Min(Box::new(a), Box::new(b)),
            }
        }
        Expr::Max(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Int(*x.max(y)),
                _ if a == b => a,
                _ => Expr::Max(Box::new(a), Box::new(b)),
            }
        }
        Expr::Eq(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Bool(x == y),
                _ if a == b => Expr::Bool(true),
                _ => Expr::Eq(Box::new(a), Box::new(b)),
            }
        }
        Expr::Le(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Bool(x <= y),
                _ if a == b => Expr::Bool(true),
                _ => Expr::Le(Box::new(a), Box::new(b)),
            }
        }
        Expr::Lt(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Int(x), Expr::Int(y)) => Expr::Bool(x < y),
                _ => Expr::Lt(Box::new(a), Box::new(b)),
            }
        }
        Expr::And(a, b) => {
            let (a, b) = (simplify(*a), simplify(*b));
            match (&a, &b) {
                (Expr::Bool(true), _) => b,
                (_, Expr::Bool(true)) => a,
                (Expr::Bool(false), _) | (_, Expr::Bool(false)) => Expr::Bool(false),
                _ => Expr::And(Box::new(a), Box::new(b)),
            }
        }
        Expr::Call { name, args, kind } => Expr::Call {
            name,
            args: args.into_iter().map(simplify).collect(),
            kind,
        },
        leaf => leaf,
    }
}

pub fn is_zero(e: &Expr) -> bool {
    matches!(e, Expr::Int(0))
}

pub fn is_one(e: &Expr) -> bool {
    matches!(e, Expr::Int(1))
}

pub fn is_const(e: &Expr) -> Option<i64> {
    match e {
        Expr::Int(v) => Some(*v),
        _ => None,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::*;

    #[test]
    fn folds_constants() {
        assert_eq!(simplify(add(Expr::Int(2), Expr::Int(3))), Expr::Int(5));
        assert_eq!(simplify(div(Expr::Int(-7), Expr::Int(2))), Expr::Int(-4));
        assert_eq!(simplify(rem(Expr::Int(-7), Expr::Int(2))), Expr::Int(1));
    }

    #[test]
    fn strips_identities() {
        assert_eq!(simplify(add(var("x"), Expr::Int(0))), var("x"));
        assert_eq!(simplify(mul(var("x"), Expr::Int(1))), var("x"));
        assert_eq!(simplify(min(var("x"), var("x"))), var("x"));
    }

    #[test]
    fn extent_of_collapsed_loop_is_one() {
        // max - min + 1 where max == min
        let e = add(sub(var("v"), var("v")), Expr::Int(1));
        assert_eq!(simplify(e), Expr::Int(1));
    }

    #[test]
    fn add_sub_cancellation() {
        let e = add(sub(var("a"), var("b")), var("b"));
        assert_eq!(simplify(e), var("a"));
    }
}
