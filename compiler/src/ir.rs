// ir.rs — Imperative IR consumed and produced by schedule lowering
//
// Immutable expression and statement trees. The lowering pass never edits a
// node in place; mutators consume a tree and return a new one, sharing
// nothing. Loop bounds are symbolic (`Variable` references to `.loop_min` /
// `.loop_extent` bindings) until bounds inference runs downstream.
//
// Preconditions: none (types and constructors only).
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use std::fmt;

// ── Scalar value types ─────────────────────────────────────────────────────

/// Element type of a function output or buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Type {
    Int32,
    UInt8,
    UInt16,
    Float32,
}

impl Type {
    /// The zero constant of this type (float zero is represented exactly).
    pub fn zero(self) -> Expr {
        match self {
            Type::Int32 | Type::UInt8 | Type::UInt16 => Expr::Int(0),
            Type::Float32 => Expr::Float(0.0),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int32 => write!(f, "int32"),
            Type::UInt8 => write!(f, "uint8"),
            Type::UInt16 => write!(f, "uint16"),
            Type::Float32 => write!(f, "float32"),
        }
    }
}

// ── Loop metadata ──────────────────────────────────────────────────────────

/// Execution tag on a `For` loop. Recorded here, acted on downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForType {
    Serial,
    Parallel,
    Vectorized,
    Unrolled,
}

impl ForType {
    /// Parallel and vectorized loops race on shared allocations.
    pub fn is_parallel(self) -> bool {
        matches!(self, ForType::Parallel | ForType::Vectorized)
    }
}

/// Device placement of a loop. `None` means "inherit from the enclosing
/// loop"; `Host` pins to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceApi {
    None,
    Host,
    Cuda,
    OpenCl,
}

impl fmt::Display for DeviceApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceApi::None => write!(f, "none"),
            DeviceApi::Host => write!(f, "host"),
            DeviceApi::Cuda => write!(f, "cuda"),
            DeviceApi::OpenCl => write!(f, "opencl"),
        }
    }
}

// ── Calls ──────────────────────────────────────────────────────────────────

/// What a `Call` node refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallKind {
    /// A read of another pipeline function at a site. `value_index` selects
    /// the output for multi-valued functions.
    Func { value_index: usize },
    /// A call through the C ABI (runtime error hooks, extern stages).
    /// Treated as impure: it may observe or affect state.
    Extern,
    /// A pure compiler intrinsic (`likely`, `address_of`,
    /// `create_buffer_descriptor`, ...).
    Intrinsic,
}

// ── Expressions ────────────────────────────────────────────────────────────

/// An expression over integer indices, scalars, and opaque handles.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i64),
    Float(f64),
    Bool(bool),
    /// String literal; only appears as an argument to error intrinsics.
    Str(String),
    /// A scalar (i32) variable reference.
    Var(String),
    /// An opaque pointer variable (buffer descriptors).
    Handle(String),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    /// Euclidean division (rounds toward negative infinity).
    Div(Box<Expr>, Box<Expr>),
    /// Euclidean remainder (always non-negative for positive modulus).
    Mod(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Max(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Le(Box<Expr>, Box<Expr>),
    Lt(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        kind: CallKind,
    },
}

impl Expr {
    pub fn is_pure_call(&self) -> bool {
        match self {
            Expr::Call { kind, .. } => !matches!(kind, CallKind::Extern),
            _ => true,
        }
    }
}

// ── Expression constructors ────────────────────────────────────────────────

pub fn var(name: impl Into<String>) -> Expr {
    Expr::Var(name.into())
}

pub fn handle(name: impl Into<String>) -> Expr {
    Expr::Handle(name.into())
}

pub fn add(a: Expr, b: Expr) -> Expr {
    Expr::Add(Box::new(a), Box::new(b))
}

pub fn sub(a: Expr, b: Expr) -> Expr {
    Expr::Sub(Box::new(a), Box::new(b))
}

pub fn mul(a: Expr, b: Expr) -> Expr {
    Expr::Mul(Box::new(a), Box::new(b))
}

pub fn div(a: Expr, b: Expr) -> Expr {
    Expr::Div(Box::new(a), Box::new(b))
}

pub fn rem(a: Expr, b: Expr) -> Expr {
    Expr::Mod(Box::new(a), Box::new(b))
}

pub fn min(a: Expr, b: Expr) -> Expr {
    Expr::Min(Box::new(a), Box::new(b))
}

pub fn max(a: Expr, b: Expr) -> Expr {
    Expr::Max(Box::new(a), Box::new(b))
}

pub fn eq(a: Expr, b: Expr) -> Expr {
    Expr::Eq(Box::new(a), Box::new(b))
}

pub fn le(a: Expr, b: Expr) -> Expr {
    Expr::Le(Box::new(a), Box::new(b))
}

pub fn lt(a: Expr, b: Expr) -> Expr {
    Expr::Lt(Box::new(a), Box::new(b))
}

pub fn ge(a: Expr, b: Expr) -> Expr {
    le(b, a)
}

pub fn and(a: Expr, b: Expr) -> Expr {
    Expr::And(Box::new(a), Box::new(b))
}

pub fn const_true() -> Expr {
    Expr::Bool(true)
}

/// Branch-prediction hint consumed by loop partitioning downstream.
pub fn likely(e: Expr) -> Expr {
    Expr::Call {
        name: "likely".into(),
        args: vec![e],
        kind: CallKind::Intrinsic,
    }
}

pub fn address_of(e: Expr) -> Expr {
    Expr::Call {
        name: "address_of".into(),
        args: vec![e],
        kind: CallKind::Intrinsic,
    }
}

pub fn extern_call(name: impl Into<String>, args: Vec<Expr>) -> Expr {
    Expr::Call {
        name: name.into(),
        args,
        kind: CallKind::Extern,
    }
}

pub fn func_call(name: impl Into<String>, args: Vec<Expr>, value_index: usize) -> Expr {
    Expr::Call {
        name: name.into(),
        args,
        kind: CallKind::Func { value_index },
    }
}

// ── Statements ─────────────────────────────────────────────────────────────

/// A realization bound along one dimension: `(min, extent)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Range {
    pub min: Expr,
    pub extent: Expr,
}

/// An imperative statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Multi-valued store to a function at a site.
    Provide {
        name: String,
        values: Vec<Expr>,
        site: Vec<Expr>,
    },
    For {
        name: String,
        min: Expr,
        extent: Expr,
        for_type: ForType,
        device_api: DeviceApi,
        body: Box<Stmt>,
    },
    Let {
        name: String,
        value: Expr,
        body: Box<Stmt>,
    },
    IfThenElse {
        condition: Expr,
        then_case: Box<Stmt>,
        else_case: Option<Box<Stmt>>,
    },
    /// Sequential composition. Longer sequences fold right.
    Block {
        first: Box<Stmt>,
        rest: Box<Stmt>,
    },
    /// Introduces the allocation region owning a function's storage.
    Realize {
        name: String,
        types: Vec<Type>,
        bounds: Vec<Range>,
        condition: Expr,
        body: Box<Stmt>,
    },
    /// Marker delineating where a function is produced vs. consumed.
    ProducerConsumer {
        name: String,
        is_producer: bool,
        body: Box<Stmt>,
    },
    Assert {
        condition: Expr,
        message: Expr,
    },
    Evaluate(Expr),
}

// ── Statement constructors ─────────────────────────────────────────────────

pub fn for_loop(
    name: impl Into<String>,
    min: Expr,
    extent: Expr,
    for_type: ForType,
    device_api: DeviceApi,
    body: Stmt,
) -> Stmt {
    Stmt::For {
        name: name.into(),
        min,
        extent,
        for_type,
        device_api,
        body: Box::new(body),
    }
}

pub fn let_stmt(name: impl Into<String>, value: Expr, body: Stmt) -> Stmt {
    Stmt::Let {
        name: name.into(),
        value,
        body: Box::new(body),
    }
}

pub fn if_then(condition: Expr, then_case: Stmt) -> Stmt {
    Stmt::IfThenElse {
        condition,
        then_case: Box::new(then_case),
        else_case: None,
    }
}

pub fn if_then_else(condition: Expr, then_case: Stmt, else_case: Stmt) -> Stmt {
    Stmt::IfThenElse {
        condition,
        then_case: Box::new(then_case),
        else_case: Some(Box::new(else_case)),
    }
}

pub fn block(first: Stmt, rest: Stmt) -> Stmt {
    Stmt::Block {
        first: Box::new(first),
        rest: Box::new(rest),
    }
}

/// Fold a sequence into right-nested `Block`s. Empty input yields `None`.
pub fn block_of(stmts: Vec<Stmt>) -> Option<Stmt> {
    let mut iter = stmts.into_iter().rev();
    let last = iter.next()?;
    Some(iter.fold(last, |rest, first| block(first, rest)))
}

/// Sequence two optional statements.
pub fn block_opt(a: Option<Stmt>, b: Option<Stmt>) -> Option<Stmt> {
    match (a, b) {
        (Some(a), Some(b)) => Some(block(a, b)),
        (Some(a), None) => Some(a),
        (None, b) => b,
    }
}

// ── Printer ────────────────────────────────────────────────────────────────

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v) => write!(f, "{}", v),
            Expr::Float(v) => write!(f, "{:?}f", v),
            Expr::Bool(v) => write!(f, "{}", v),
            Expr::Str(s) => write!(f, "{:?}", s),
            Expr::Var(n) => write!(f, "{}", n),
            Expr::Handle(n) => write!(f, "&{}", n),
            Expr::Add(a, b) => write!(f, "({} + {})", a, b),
            Expr::Sub(a, b) => write!(f, "({} - {})", a, b),
            Expr::Mul(a, b) => write!(f, "({}*{})", a, b),
            Expr::Div(a, b) => write!(f, "({}/{})", a, b),
            Expr::Mod(a, b) => write!(f, "({} % {})", a, b),
            Expr::Min(a, b) => write!(f, "min({}, {})", a, b),
            Expr::Max(a, b) => write!(f, "max({}, {})", a, b),
            Expr::Eq(a, b) => write!(f, "({} == {})", a, b),
            Expr::Le(a, b) => write!(f, "({} <= {})", a, b),
            Expr::Lt(a, b) => write!(f, "({} < {})", a, b),
            Expr::And(a, b) => write!(f, "({} && {})", a, b),
            Expr::Call { name, args, .. } => {
                write!(f, "{}(", name)?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl Stmt {
    fn fmt_indent(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        match self {
            Stmt::Provide { name, values, site } => {
                write!(f, "{}{}(", pad, name)?;
                for (i, s) in site.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", s)?;
                }
                write!(f, ") = ")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                writeln!(f)
            }
            Stmt::For {
                name,
                min,
                extent,
                for_type,
                body,
                ..
            } => {
                let tag = match for_type {
                    ForType::Serial => "for",
                    ForType::Parallel => "parallel",
                    ForType::Vectorized => "vectorized",
                    ForType::Unrolled => "unrolled",
                };
                writeln!(f, "{}{} ({}, {}, {}) {{", pad, tag, name, min, extent)?;
                body.fmt_indent(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::Let { name, value, body } => {
                writeln!(f, "{}let {} = {}", pad, name, value)?;
                body.fmt_indent(f, indent)
            }
            Stmt::IfThenElse {
                condition,
                then_case,
                else_case,
            } => {
                writeln!(f, "{}if ({}) {{", pad, condition)?;
                then_case.fmt_indent(f, indent + 1)?;
                if let Some(e) = else_case {
                    writeln!(f, "{}}} else {{", pad)?;
                    e.fmt_indent(f, indent + 1)?;
                }
                writeln!(f, "{}}}", pad)
            }
            Stmt::Block { first, rest } => {
                first.fmt_indent(f, indent)?;
                rest.fmt_indent(f, indent)
            }
            Stmt::Realize {
                name,
                types,
                bounds,
                condition,
                body,
            } => {
                write!(f, "{}realize {}(", pad, name)?;
                for (i, b) in bounds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "[{}, {}]", b.min, b.extent)?;
                }
                write!(f, ") of ")?;
                for (i, t) in types.iter().enumerate() {
                    if i > 0 {
                        write!(f, "x")?;
                    }
                    write!(f, "{}", t)?;
                }
                if !matches!(condition, Expr::Bool(true)) {
                    write!(f, " if {}", condition)?;
                }
                writeln!(f, " {{")?;
                body.fmt_indent(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::ProducerConsumer {
                name,
                is_producer,
                body,
            } => {
                let role = if *is_producer { "produce" } else { "consume" };
                writeln!(f, "{}{} {} {{", pad, role, name)?;
                body.fmt_indent(f, indent + 1)?;
                writeln!(f, "{}}}", pad)
            }
            Stmt::Assert { condition, message } => {
                writeln!(f, "{}assert({}, {})", pad, condition, message)
            }
            Stmt::Evaluate(e) => writeln!(f, "{}{}", pad, e),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indent(f, 0)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
