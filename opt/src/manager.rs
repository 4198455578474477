use rayon::prelude::*;

use mtac::*;

use crate::passes::*;
use crate::{Config, Invalidates, PassContext};

pub type PassFn = fn(&mut Fundef, &mut PassContext) -> Result<bool>;

pub struct Pass {
    pub name: &'static str,
    pub run: PassFn,
    // what has to be recomputed once the pass reports a change
    pub invalidates: Invalidates,
    // lowest optimization level running the pass
    pub level: usize,
}

const fn pass(name: &'static str, run: PassFn, invalidates: Invalidates, level: usize) -> Pass {
    Pass {
        name,
        run,
        invalidates,
        level,
    }
}

/// Per-function passes, in the order of one round.
pub const PASSES: &[Pass] = &[
    pass("const_prop", const_prop, Invalidates::ALL, 1),
    pass("copy_prop", copy_prop, Invalidates::VALUES, 1),
    pass("resolve_aliases", resolve_aliases, Invalidates::VALUES, 1),
    pass("cse", cse, Invalidates::VALUES, 1),
    pass("dead_code", dead_code, Invalidates::VALUES, 1),
    pass("skip_jumps", skip_jumps, Invalidates::ALL, 1),
    pass("merge_blocks", merge_blocks, Invalidates::ALL, 1),
    pass("licm", licm, Invalidates::ALL, 2),
    pass("unswitch", unswitch, Invalidates::ALL, 2),
    pass("unroll", unroll, Invalidates::ALL, 2),
];

/// Runs rounds of `PASSES` until one of them changes nothing.
pub fn optimize_fundef(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let level = ctx.config.level;
    let passes: Vec<&Pass> = PASSES.iter().filter(|p| p.level <= level).collect();
    if passes.is_empty() {
        return Ok(false);
    }

    let mut changed = false;
    for i in 0..ctx.config.max_rounds {
        log::debug!("`{}` opt round: {}", f.name, i + 1);

        let mut round = false;
        for p in &passes {
            if (p.run)(f, ctx)? {
                log::debug!("`{}` changed `{}`", p.name, f.name);
                ctx.invalidate(p.invalidates);
                round = true;
            }
        }
        if !round {
            return Ok(changed);
        }
        changed = true;
    }

    Err(f.error(
        "pass manager",
        ErrorKind::PassCap(ctx.config.max_rounds),
    ))
}

/// Alternates the whole-module passes with a fixpoint over every
/// function; functions are optimized in parallel.
pub fn optimize_module(m: &mut Module, config: &Config) -> Result<Statistics> {
    let mut stats = Statistics::new();
    if config.level == 0 {
        return Ok(stats);
    }

    for i in 0..config.max_rounds {
        log::info!("module opt loop: {}", i + 1);

        let mut changed = propagate_parameters(m, &mut stats);
        changed |= remove_empty_functions(m, &mut stats);

        let results = m
            .fundefs
            .par_iter_mut()
            .map(|f| {
                let mut ctx = PassContext::new(config.clone());
                let changed = optimize_fundef(f, &mut ctx)?;
                Ok((changed, ctx.stats))
            })
            .collect::<Result<Vec<_>>>()?;
        for (c, s) in results {
            changed |= c;
            stats.merge(&s);
        }

        if !changed {
            return Ok(stats);
        }
    }

    Err(InternalError::new(
        "pass manager",
        "<module>",
        ErrorKind::PassCap(config.max_rounds),
    ))
}
