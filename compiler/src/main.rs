use clap::Parser;

use mcc::func::Function;
use mcc::ir::{add, div, func_call, var, Expr, Type};
use mcc::lower::{lower_schedules, verify_lowering};
use mcc::schedule::{LoopLevel, TailStrategy};
use mcc::target::Target;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Stmt,
    Diag,
    Cert,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum Demo {
    /// Separable blur: blur_x computed at blur_y's rows.
    Blur,
    /// Producer inlined into its consumer.
    Inline,
    /// Split with a GuardWithIf tail.
    Split,
    /// Two producers sharing loops via compute_with.
    Fused,
}

#[derive(Parser, Debug)]
#[command(
    name = "mcc",
    version,
    about = "Mosaic Compiler Collection — lowers pipeline schedules to imperative loop nests"
)]
struct Cli {
    /// Built-in demo pipeline to lower
    #[arg(long, value_enum, default_value_t = Demo::Blur)]
    demo: Demo,

    /// What to print
    #[arg(long, value_enum, default_value_t = EmitStage::Stmt)]
    emit: EmitStage,

    /// Target feature string, e.g. host-msan-no_asserts
    #[arg(long, default_value = "host")]
    target: String,

    /// Print lowering phases and timing
    #[arg(long)]
    verbose: bool,
}

struct Pipeline {
    outputs: Vec<String>,
    order: Vec<String>,
    fused_groups: Vec<Vec<String>>,
    env: std::collections::HashMap<String, Function>,
}

fn pipeline_of(funcs: Vec<Function>, outputs: &[&str], groups: &[&[&str]]) -> Pipeline {
    Pipeline {
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
        order: funcs.iter().map(|f| f.name.clone()).collect(),
        fused_groups: groups
            .iter()
            .map(|g| g.iter().map(|s| s.to_string()).collect())
            .collect(),
        env: funcs.into_iter().map(|f| (f.name.clone(), f)).collect(),
    }
}

fn blur_demo() -> Pipeline {
    let input = |x, y| func_call("in", vec![x, y], 0);
    let mut blur_x = Function::new(
        "blur_x",
        vec!["x", "y"],
        vec![Type::UInt16],
        vec![div(
            add(
                add(input(var("x"), var("y")), input(add(var("x"), Expr::Int(1)), var("y"))),
                input(add(var("x"), Expr::Int(2)), var("y")),
            ),
            Expr::Int(3),
        )],
    );
    let bx = |x, y| func_call("blur_x", vec![x, y], 0);
    let mut blur_y = Function::new(
        "blur_y",
        vec!["x", "y"],
        vec![Type::UInt16],
        vec![div(
            add(
                add(bx(var("x"), var("y")), bx(var("x"), add(var("y"), Expr::Int(1)))),
                bx(var("x"), add(var("y"), Expr::Int(2))),
            ),
            Expr::Int(3),
        )],
    );
    let mut input_fn = Function::new("in", vec!["x", "y"], vec![Type::UInt16], vec![Expr::Int(0)]);
    input_fn.compute_root();
    blur_y.compute_root();
    blur_x.compute_at(LoopLevel::at("blur_y", "y"));
    pipeline_of(
        vec![input_fn, blur_x, blur_y],
        &["blur_y"],
        &[&["in"], &["blur_x"], &["blur_y"]],
    )
}

fn inline_demo() -> Pipeline {
    let f = Function::new(
        "f",
        vec!["x"],
        vec![Type::Int32],
        vec![add(var("x"), Expr::Int(1))],
    );
    let mut g = Function::new(
        "g",
        vec!["x"],
        vec![Type::Int32],
        vec![add(func_call("f", vec![var("x")], 0), Expr::Int(2))],
    );
    g.compute_root();
    pipeline_of(vec![f, g], &["g"], &[&["f"], &["g"]])
}

fn split_demo() -> Pipeline {
    let mut f = Function::new(
        "f",
        vec!["x"],
        vec![Type::Int32],
        vec![add(var("x"), Expr::Int(7))],
    );
    f.compute_root();
    f.definition
        .schedule
        .split("x", "xo", "xi", Expr::Int(8), TailStrategy::GuardWithIf);
    pipeline_of(vec![f], &["f"], &[&["f"]])
}

fn fused_demo() -> Pipeline {
    let mut f = Function::new(
        "f",
        vec!["x", "y"],
        vec![Type::Int32],
        vec![add(var("x"), var("y"))],
    );
    let mut g = Function::new(
        "g",
        vec!["x", "y"],
        vec![Type::Int32],
        vec![add(var("x"), Expr::Int(1))],
    );
    f.compute_root();
    g.compute_root();
    g.compute_with(0, "f", "y");
    f.add_fused_child(0, "g", 0, "y");
    let fc = |name: &str, x, y| func_call(name, vec![x, y], 0);
    let mut out = Function::new(
        "out",
        vec!["x", "y"],
        vec![Type::Int32],
        vec![add(fc("f", var("x"), var("y")), fc("g", var("x"), var("y")))],
    );
    out.compute_root();
    pipeline_of(vec![f, g, out], &["out"], &[&["f", "g"], &["out"]])
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let target = match Target::from_features(&cli.target) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("mcc: error: {}", e);
            std::process::exit(2);
        }
    };

    let pipeline = match cli.demo {
        Demo::Blur => blur_demo(),
        Demo::Inline => inline_demo(),
        Demo::Split => split_demo(),
        Demo::Fused => fused_demo(),
    };

    if cli.verbose {
        eprintln!("mcc: demo   = {:?}", cli.demo);
        eprintln!("mcc: target = {}", cli.target);
        eprintln!("mcc: order  = {:?}", pipeline.order);
    }

    let t = std::time::Instant::now();
    let result = lower_schedules(
        &pipeline.outputs,
        &pipeline.order,
        &pipeline.fused_groups,
        &pipeline.env,
        &target,
    );
    if cli.verbose {
        eprintln!(
            "mcc: lowering complete, {:.1}ms",
            t.elapsed().as_secs_f64() * 1000.0
        );
    }

    for d in &result.diagnostics {
        eprintln!("{}", d);
    }
    if result.has_errors() {
        std::process::exit(1);
    }
    let stmt = result.stmt.expect("no errors, so lowering must produce a statement");

    match cli.emit {
        EmitStage::Stmt => print!("{}", stmt),
        EmitStage::Diag => {
            // Diagnostics were already printed above; report the count.
            println!("{} diagnostic(s)", result.diagnostics.len());
        }
        EmitStage::Cert => {
            let cert = verify_lowering(&stmt, &pipeline.outputs);
            for (name, ok) in cert.obligations() {
                println!("{} {}", if ok { "PASS" } else { "FAIL" }, name);
            }
            if !cert.all_pass() {
                std::process::exit(1);
            }
        }
    }
}
