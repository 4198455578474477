use mtac::*;
use util::Map;

use crate::PassContext;

/// Within a block, `p = &x` followed by `*p` reads or writes `x` directly.
pub fn resolve_aliases(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let memory = f.memory_resident();
    let scalar: Vec<bool> = f.vars.iter().map(|v| v.ty.is_scalar()).collect();
    let mut n = 0;

    for bid in f.layout.clone() {
        let block = &mut f.blocks[bid];
        // pointer -> pointee
        let mut alias: Map<VarId, VarId> = Map::default();

        for q in &mut block.body {
            match &q.kind {
                QuadKind::Deref(p) if q.result.is_some() => {
                    if let Some(x) = alias.get(p) {
                        q.kind = QuadKind::Assign(Arg::Var(*x));
                        n += 1;
                    }
                }
                QuadKind::DerefStore(p, v) => {
                    if let Some(x) = alias.get(p) {
                        *q = Quadruple::new(*x, QuadKind::Assign(v.clone()));
                        n += 1;
                    }
                }
                _ => (),
            }

            if let Some(r) = q.def() {
                alias.remove(&r);
                if let QuadKind::Address(x) = &q.kind {
                    if scalar[x.0] && !memory.contains(&r) {
                        alias.insert(r, *x);
                    }
                }
            }
        }
    }

    ctx.stats.add("aliases.resolved", n);
    if n > 0 {
        log::info!("resolved {n} dereferences in `{}`", f.name);
    }
    Ok(n > 0)
}
