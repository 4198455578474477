use mtac::dataflow::Liveness;
use mtac::*;

use crate::PassContext;

// removes definitions nobody reads; calls and reads keep their effect
pub fn dead_code(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let live = ctx.liveness(f)?;
    let problem = Liveness::new(f);
    let memory = f.memory_resident();

    let mut removed = 0;
    let mut unbound = 0;
    for bid in f.layout.clone() {
        let after = live.points(&problem, f, bid);
        let body = std::mem::take(&mut f.blocks[bid].body);
        let mut kept = Vec::with_capacity(body.len());

        for (mut q, live_after) in body.into_iter().zip(after) {
            if q.kind == QuadKind::Nop {
                removed += 1;
                continue;
            }
            if let Some(r) = q.result {
                if q.kind == QuadKind::Assign(Arg::Var(r)) {
                    removed += 1;
                    continue;
                }
                if !memory.contains(&r) && !live_after.contains(&r) {
                    if !q.has_effect() {
                        log::debug!("eliminating {}", q.display(&f.vars));
                        removed += 1;
                        continue;
                    }
                    q.result = None;
                    unbound += 1;
                }
            }
            kept.push(q);
        }
        f.blocks[bid].body = kept;
    }

    ctx.stats.add("dead_code.removed", removed);
    let changed = removed + unbound > 0;
    if changed {
        log::info!("dead_code on `{}`: {removed} quadruples removed", f.name);
    }
    Ok(changed)
}
