use anyhow::{Context, Result};
use clap::Parser;

use mtac::{Module, Statistics};

#[derive(Debug, Parser)]
pub struct Args {
    #[clap(short = 'O', long)]
    pub optimize: bool,
    // 1: local passes, 2: loop passes as well
    #[clap(long, default_value_t = 2)]
    pub level: usize,
    #[clap(long, default_value_t = 100)]
    pub loop_opt: usize,
    // trip count bound for complete unrolling
    #[clap(long, default_value_t = 8)]
    pub unroll: usize,
    #[clap(long)]
    pub dump_mtac: bool,
    #[clap(long)]
    pub dump_ltac: bool,
    #[clap(long)]
    pub stats: bool,
    #[clap(short, long)]
    pub debug: bool,
    #[clap(short, long)]
    pub output: Option<String>,
    pub source: String,
}

impl Args {
    pub fn config(&self) -> opt::Config {
        if !self.optimize {
            return opt::Config::disabled();
        }
        opt::Config {
            level: self.level,
            max_rounds: self.loop_opt,
            unroll_limit: self.unroll,
            ..opt::Config::default()
        }
    }
}

/// Reads a program in the front-end's JSON form.
pub fn load(path: &str) -> Result<mtac::Program> {
    let src = std::fs::read_to_string(path).context(format!("failed to open file: {}", path))?;
    serde_json::from_str(&src).context(format!("malformed program: {}", path))
}

/// Builds the control flow graph and runs the optimizer.
pub fn optimize(program: mtac::Program, args: &Args) -> Result<(Module, Statistics)> {
    let mut module = mtac::build_module(program).context("failed to build the control flow graph")?;
    let stats = opt::optimize_module(&mut module, &args.config()).context("optimization failed")?;

    if args.dump_mtac {
        println!("[[mtac]]\n{}", module);
    }
    Ok((module, stats))
}

pub fn compile(program: mtac::Program, args: &Args) -> Result<(ltac::Program, Statistics)> {
    let (module, mut stats) = optimize(program, args)?;
    let (asm, backend) = ltac::compile(&module, args.optimize).context("code generation failed")?;
    stats.merge(&backend);

    if args.dump_ltac {
        println!("[[ltac]]\n{}", asm);
    }
    Ok((asm, stats))
}

pub fn run(args: &Args) -> Result<()> {
    let program = load(&args.source)?;
    let (asm, stats) = compile(program, args)?;

    match &args.output {
        Some(path) => {
            std::fs::write(path, asm.to_string()).context(format!("failed to write {}", path))?
        }
        None => print!("{}", asm),
    }
    if args.stats {
        eprintln!("[[stats]]\n{}", stats);
    }
    Ok(())
}
