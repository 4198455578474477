use mtac::*;
use util::Map;

use crate::PassContext;

fn replace(args: Vec<&mut Arg>, copies: &Map<VarId, Arg>) -> usize {
    let mut n = 0;
    for a in args {
        if let Some(x) = a.var().and_then(|v| copies.get(&v)) {
            *a = x.clone();
            n += 1;
        }
    }
    n
}

// block-local forward substitution of `x = y` and `x = c`
pub fn copy_prop(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let memory = f.memory_resident();
    let mut n = 0;

    for bid in f.layout.clone() {
        let block = &mut f.blocks[bid];
        let mut copies: Map<VarId, Arg> = Map::default();

        for q in &mut block.body {
            n += replace(q.args_mut(), &copies);

            if let Some(r) = q.def() {
                copies.retain(|k, x| *k != r && x.var() != Some(r));
                if let QuadKind::Assign(x) = &q.kind {
                    let movable = match x.var() {
                        Some(v) => v != r && !memory.contains(&v),
                        None => true,
                    };
                    if movable && !memory.contains(&r) {
                        copies.insert(r, x.clone());
                    }
                }
            }
        }
        n += replace(block.tail.args_mut(), &copies);
    }

    ctx.stats.add("copy_prop.replaced", n);
    if n > 0 {
        log::info!("copy_prop on `{}`: {n} operands replaced", f.name);
    }
    Ok(n > 0)
}
