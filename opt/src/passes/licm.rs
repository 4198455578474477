use mtac::dataflow::{LiveSet, Solution};
use mtac::*;
use util::{Label, Map, Set};

use crate::common::{count_defs, insert_preheader};
use crate::{Invalidates, PassContext};

fn is_hoistable(q: &Quadruple) -> bool {
    use QuadKind::*;
    matches!(q.kind, Assign(_) | BinOp(..) | UnOp(..) | Cmp(..)) && !q.can_trap()
}

// (block, index) of quadruples computing the same value in every iteration,
// in an order where operands are hoisted before their users
fn invariants(
    f: &Fundef,
    l: &Loop,
    dom: &Dominators,
    live: &Solution<LiveSet>,
    memory: &Set<VarId>,
) -> Vec<(BlockId, usize)> {
    let blocks = l.blocks_in_layout(f);
    let defs = count_defs(f, &blocks);
    let exits = l.exits(f);
    let live_at_header = live.block_in(l.header);

    let mut hoisted: Set<VarId> = Set::default();
    let mut r = vec![];
    loop {
        let mut found = false;
        for b in &blocks {
            for (i, q) in f.blocks[*b].body.iter().enumerate() {
                let v = match q.result {
                    Some(v) => v,
                    None => continue,
                };
                if hoisted.contains(&v)
                    || !is_hoistable(q)
                    || memory.contains(&v)
                    || defs.get(&v) != Some(&1)
                    || live_at_header.contains(&v)
                {
                    continue;
                }
                let operands = q
                    .uses()
                    .iter()
                    .all(|u| !memory.contains(u) && (!defs.contains_key(u) || hoisted.contains(u)));
                // on a path leaving the loop before `b` runs, `v` must not be observed
                let exits_ok = exits
                    .iter()
                    .all(|(src, dst)| dom.dominates(*b, *src) || !live.block_in(*dst).contains(&v));
                if operands && exits_ok {
                    hoisted.insert(v);
                    r.push((*b, i));
                    found = true;
                }
            }
        }
        if !found {
            break;
        }
    }
    r
}

/// Loop-invariant code motion into the preheader, innermost loops first.
pub fn licm(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let memory = f.memory_resident();
    let mut visited: Set<Label> = Set::default();
    let mut total = 0;

    loop {
        let loops = ctx.loops(f)?;
        let next = loops
            .innermost_first()
            .into_iter()
            .find(|l| !visited.contains(&f.blocks[l.header].label))
            .cloned();
        let l = match next {
            Some(l) => l,
            None => break,
        };
        visited.insert(f.blocks[l.header].label.clone());

        let dom = ctx.dominators(f)?;
        let live = ctx.liveness(f)?;
        let hoist = invariants(f, &l, &dom, &live, &memory);
        if hoist.is_empty() {
            continue;
        }

        let pre = match l.preheader(f) {
            Some(p) => p,
            None => {
                let p = insert_preheader(f, &l);
                f.relink();
                ctx.invalidate(Invalidates::ALL);
                p
            }
        };

        let quads: Vec<Quadruple> = hoist
            .iter()
            .map(|(b, i)| f.blocks[*b].body[*i].clone())
            .collect();
        let mut by_block: Map<BlockId, Vec<usize>> = Map::default();
        for (b, i) in &hoist {
            by_block.entry(*b).or_default().push(*i);
        }
        for (b, mut idxs) in by_block {
            idxs.sort_unstable_by(|x, y| y.cmp(x));
            for i in idxs {
                f.blocks[b].body.remove(i);
            }
        }
        for q in &quads {
            log::debug!(
                "hoisting {} into `{}`",
                q.display(&f.vars),
                f.blocks[pre].label
            );
        }
        f.blocks[pre].body.extend(quads);

        ctx.invalidate(Invalidates::VALUES);
        total += hoist.len();
    }

    ctx.stats.add("licm.hoisted", total);
    if total > 0 {
        log::info!("licm on `{}`: {total} quadruples hoisted", f.name);
    }
    Ok(total > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use mtac::eval::{run_fundef, Value};

    // s = 0; i = 0; while i < n { t = k * 3; s = s + t; i = i + 1 }; return s
    fn running_sum() -> Fundef {
        let mut g = Function::new("sum");
        let n = g.add_var("n", Ty::Int, Scope::Param);
        let k = g.add_var("k", Ty::Int, Scope::Param);
        let s = g.add_var("s", Ty::Int, Scope::Local);
        let i = g.add_var("i", Ty::Int, Scope::Local);
        let t = g.add_var("t", Ty::Int, Scope::Local);
        g.push(Some(s), QuadKind::Assign(Arg::int(0)));
        g.push(Some(i), QuadKind::Assign(Arg::int(0)));
        g.push(None, QuadKind::Label("head".into()));
        g.push(
            None,
            QuadKind::IfFalse(CmpKind::Lt, Arg::Var(i), Arg::Var(n), "exit".into()),
        );
        g.push(Some(t), QuadKind::BinOp(BinOpKind::Mul, Arg::Var(k), Arg::int(3)));
        g.push(Some(s), QuadKind::BinOp(BinOpKind::Add, Arg::Var(s), Arg::Var(t)));
        g.push(Some(i), QuadKind::BinOp(BinOpKind::Add, Arg::Var(i), Arg::int(1)));
        g.push(None, QuadKind::Goto("head".into()));
        g.push(None, QuadKind::Label("exit".into()));
        g.push(None, QuadKind::Return(Some(Arg::Var(s))));
        build(g).unwrap()
    }

    fn is_mul(q: &Quadruple) -> bool {
        matches!(q.kind, QuadKind::BinOp(BinOpKind::Mul, ..))
    }

    #[test]
    fn multiplier_moves_to_preheader() {
        let original = running_sum();
        let mut f = original.clone();
        let mut ctx = PassContext::new(Config::default());
        assert!(licm(&mut f, &mut ctx).unwrap());
        assert_eq!(ctx.stats.get("licm.hoisted"), 1);

        let loops = ctx.loops(&f).unwrap();
        let l = loops.get(0);
        let pre = l.preheader(&f).unwrap();
        assert_eq!(f.blocks[pre].body.iter().filter(|q| is_mul(q)).count(), 1);
        for b in &l.blocks {
            assert!(!f.blocks[*b].body.iter().any(is_mul));
        }

        for n in 0..4 {
            let args = vec![Value::Int(n), Value::Int(2)];
            assert_eq!(
                run_fundef(&f, args.clone()).unwrap(),
                run_fundef(&original, args).unwrap()
            );
        }
    }

    #[test]
    fn loop_carried_value_stays() {
        let mut f = running_sum();
        let mut ctx = PassContext::new(Config::default());
        licm(&mut f, &mut ctx).unwrap();
        ctx.invalidate(Invalidates::ALL);
        // `s` and `i` depend on the previous iteration
        assert!(!licm(&mut f, &mut ctx).unwrap());
    }
}
