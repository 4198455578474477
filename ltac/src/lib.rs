mod lower;
mod peephole;
pub mod platform;
mod pool;
mod program;
pub mod regalloc;

use rayon::prelude::*;

use mtac::dataflow::{solve, Liveness};
use mtac::{Dominators, Fundef, Loops, Module, Result, Statistics};

pub use lower::lower;
pub use peephole::optimize as peephole;
pub use pool::FloatPool;
pub use program::{Cond, FloatOp, Function, Inst, IntOp, Operand, Program};

fn compile_fundef(f: &Fundef, pool: &FloatPool, optimize: bool) -> Result<(Function, Statistics)> {
    let mut stats = Statistics::new();

    let live = solve(&Liveness::new(f), f)?;
    let dom = Dominators::compute(f)?;
    let loops = Loops::detect(f, &dom);
    let alloc = regalloc::allocate(f, &live, &loops)?;
    stats.add("regalloc.spills", alloc.spilled.len());
    stats.add(
        "regalloc.registers",
        alloc.locations.iter().filter(|l| l.is_register()).count(),
    );

    let mut func = lower(f, &alloc, &live, pool)?;
    if optimize {
        peephole(&mut func, &mut stats);
    }
    log::info!(
        "{}: {} instructions, {} bytes of frame, {} spills",
        f.name,
        func.insts.len(),
        func.frame_size,
        alloc.spilled.len()
    );
    Ok((func, stats))
}

/// Allocates registers for and lowers every function of `m`, in parallel.
pub fn compile(m: &Module, optimize: bool) -> Result<(Program, Statistics)> {
    let pool = FloatPool::new();
    let results = m
        .fundefs
        .par_iter()
        .map(|f| compile_fundef(f, &pool, optimize))
        .collect::<Result<Vec<_>>>()?;

    let mut stats = Statistics::new();
    let mut functions = Vec::with_capacity(results.len());
    for (func, s) in results {
        stats.merge(&s);
        functions.push(func);
    }

    Ok((
        Program {
            functions,
            globals: m.globals.clone(),
            strings: m.strings.iter().cloned().collect(),
            floats: pool.into_entries(),
        },
        stats,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtac::*;

    #[test]
    fn every_function_is_lowered_once() {
        let mut main = mtac::Function::new("main");
        let x = main.add_var("x", Ty::Float, Scope::Local);
        let r = main.add_var("r", Ty::Int, Scope::Local);
        main.push(Some(x), QuadKind::Assign(Arg::float(0.5)));
        main.push(None, QuadKind::Print(Arg::Var(x)));
        main.push(Some(r), QuadKind::Call("twice".into(), vec![Arg::int(21)]));
        main.push(None, QuadKind::Print(Arg::Var(r)));
        main.push(None, QuadKind::Return(Some(Arg::int(0))));

        let mut twice = mtac::Function::new("twice");
        let n = twice.add_var("n", Ty::Int, Scope::Param);
        let t = twice.add_var("t", Ty::Int, Scope::Local);
        twice.push(Some(t), QuadKind::BinOp(BinOpKind::Mul, Arg::Var(n), Arg::int(2)));
        twice.push(None, QuadKind::Return(Some(Arg::Var(t))));

        let m = build_module(mtac::Program {
            globals: vec![],
            strings: vec![],
            functions: vec![main, twice],
        })
        .unwrap();
        let (p, stats) = compile(&m, true).unwrap();

        let names: Vec<&str> = p.functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["main", "twice"]);
        assert_eq!(p.floats.len(), 1);
        assert_eq!(stats.get("regalloc.spills"), 0);

        let listing = p.to_string();
        assert!(listing.contains("main:"));
        assert!(listing.contains("\tcall\ttwice"));
        assert!(listing.contains(".double\t0.5"));
    }
}
