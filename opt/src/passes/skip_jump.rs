use mtac::*;
use util::{Map, Set};

use crate::PassContext;

fn is_empty(b: &Block) -> bool {
    b.body.iter().all(|q| q.kind == QuadKind::Nop)
}

fn resolve(b: BlockId, skip: &Map<BlockId, BlockId>) -> BlockId {
    let mut cur = b;
    let mut seen = Set::default();
    while let Some(next) = skip.get(&cur) {
        if !seen.insert(cur) {
            // a cycle of empty blocks is an infinite loop; leave it alone
            return b;
        }
        cur = *next;
    }
    cur
}

// jumps into an empty block go straight to its successor
pub fn skip_jumps(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let dom = ctx.dominators(f)?;
    let is_header = |h: BlockId| f.preds(h).iter().any(|p| dom.dominates(h, *p));

    let mut skip = Map::default();
    for b in &f.layout {
        let block = &f.blocks[*b];
        if *b == f.entry || !is_empty(block) {
            continue;
        }
        let target = match block.tail {
            Tail::Jump(t) | Tail::Fallthrough(t) if t != *b => t,
            _ => continue,
        };
        // keep the single entry edge of a loop
        if is_header(target) && !dom.dominates(target, *b) {
            continue;
        }
        skip.insert(*b, target);
    }

    let mut n = 0;
    for b in f.layout.clone() {
        let tail = &mut f.blocks[b].tail;
        let old = tail.clone();
        tail.map_targets(|t| resolve(t, &skip));
        if let Tail::Branch {
            on_true, on_false, ..
        } = *tail
        {
            if on_true == on_false {
                *tail = Tail::Jump(on_true);
            }
        }
        if *tail != old {
            n += 1;
        }
    }

    if n > 0 {
        f.relink();
        log::info!("skip_jumps on `{}`: {n} jumps redirected", f.name);
    }
    ctx.stats.add("skip_jumps.redirected", n);
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn empty_block_is_bypassed() {
        let mut g = Function::new("f");
        let a = g.add_var("a", Ty::Int, Scope::Param);
        g.push(
            None,
            QuadKind::If(CmpKind::Eq, Arg::Var(a), Arg::int(0), "empty".into()),
        );
        g.push(None, QuadKind::Print(Arg::Var(a)));
        g.push(None, QuadKind::Goto("end".into()));
        g.push(None, QuadKind::Label("empty".into()));
        g.push(None, QuadKind::Goto("end".into()));
        g.push(None, QuadKind::Label("end".into()));
        g.push(None, QuadKind::Return(None));
        let mut f = build(g).unwrap();
        assert_eq!(f.layout.len(), 4);

        let mut ctx = PassContext::new(Config::default());
        assert!(skip_jumps(&mut f, &mut ctx).unwrap());
        assert_eq!(f.layout.len(), 3);
        let end = *f.layout.last().unwrap();
        assert_eq!(f.blocks[end].label, "end");
        assert_eq!(f.succs(f.entry)[0], end);
    }
}
