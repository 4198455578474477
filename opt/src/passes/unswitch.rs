use mtac::*;

use crate::common::{clone_blocks, count_defs, insert_preheader, loop_quads};
use crate::{Invalidates, PassContext};

// a block of `l` branching on a condition no iteration can change
fn find_switch(f: &Fundef, l: &Loop, memory: &util::Set<VarId>) -> Option<BlockId> {
    let blocks = l.blocks_in_layout(f);
    let defs = count_defs(f, &blocks);
    let invariant = |a: &Arg| match a {
        Arg::Var(v) => !defs.contains_key(v) && !memory.contains(v),
        _ => true,
    };
    blocks.into_iter().find(|b| match &f.blocks[*b].tail {
        Tail::Branch {
            lhs,
            rhs,
            on_true,
            on_false,
            ..
        } => l.contains(*on_true) && l.contains(*on_false) && invariant(lhs) && invariant(rhs),
        _ => false,
    })
}

/// Moves a loop-invariant branch in front of the loop; each arm gets its
/// own copy of the loop with the branch resolved.
pub fn unswitch(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let max = ctx.config.unswitch_size;
    let memory = f.memory_resident();
    let mut n = 0;

    'search: loop {
        let loops = ctx.loops(f)?;
        for l in loops.innermost_first() {
            if loop_quads(f, l) > max {
                continue;
            }
            let b = match find_switch(f, l, &memory) {
                Some(b) => b,
                None => continue,
            };
            let (kind, lhs, rhs, on_true, on_false) = match &f.blocks[b].tail {
                Tail::Branch {
                    kind,
                    lhs,
                    rhs,
                    on_true,
                    on_false,
                } => (*kind, lhs.clone(), rhs.clone(), *on_true, *on_false),
                _ => continue,
            };

            let pre = match l.preheader(f) {
                Some(p) => p,
                None => insert_preheader(f, l),
            };
            let blocks = l.blocks_in_layout(f);
            let copy = clone_blocks(f, &blocks);

            f.blocks[b].tail = Tail::Jump(on_true);
            f.blocks[copy[&b]].tail = Tail::Jump(copy[&on_false]);
            f.blocks[pre].tail = Tail::Branch {
                kind,
                lhs,
                rhs,
                on_true: l.header,
                on_false: copy[&l.header],
            };
            f.relink();

            log::info!(
                "unswitched loop `{}` of `{}` on the branch of `{}`",
                f.blocks[l.header].label,
                f.name,
                f.blocks[b].label
            );
            n += 1;
            ctx.invalidate(Invalidates::ALL);
            continue 'search;
        }
        break;
    }

    ctx.stats.add("unswitch.loops", n);
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;
    use mtac::eval::{run_fundef, Value};

    // for i in 0..n { if flag == 0 { s += 1 } else { s += 2 } }
    fn flagged() -> Fundef {
        let mut g = Function::new("flagged");
        let n = g.add_var("n", Ty::Int, Scope::Param);
        let flag = g.add_var("flag", Ty::Int, Scope::Param);
        let s = g.add_var("s", Ty::Int, Scope::Local);
        let i = g.add_var("i", Ty::Int, Scope::Local);
        let add = |v: VarId, k: i32| QuadKind::BinOp(BinOpKind::Add, Arg::Var(v), Arg::int(k));
        g.push(Some(s), QuadKind::Assign(Arg::int(0)));
        g.push(Some(i), QuadKind::Assign(Arg::int(0)));
        g.push(None, QuadKind::Label("head".into()));
        g.push(
            None,
            QuadKind::IfFalse(CmpKind::Lt, Arg::Var(i), Arg::Var(n), "exit".into()),
        );
        g.push(
            None,
            QuadKind::IfFalse(CmpKind::Eq, Arg::Var(flag), Arg::int(0), "else".into()),
        );
        g.push(Some(s), add(s, 1));
        g.push(None, QuadKind::Goto("latch".into()));
        g.push(None, QuadKind::Label("else".into()));
        g.push(Some(s), add(s, 2));
        g.push(None, QuadKind::Label("latch".into()));
        g.push(Some(i), add(i, 1));
        g.push(None, QuadKind::Goto("head".into()));
        g.push(None, QuadKind::Label("exit".into()));
        g.push(None, QuadKind::Return(Some(Arg::Var(s))));
        build(g).unwrap()
    }

    #[test]
    fn invariant_branch_leaves_the_loop() {
        let original = flagged();
        let mut f = original.clone();
        let mut ctx = PassContext::new(Config::default());
        assert!(unswitch(&mut f, &mut ctx).unwrap());
        assert_eq!(ctx.stats.get("unswitch.loops"), 1);

        let loops = ctx.loops(&f).unwrap();
        assert_eq!(loops.len(), 2);
        // only the exit tests branch inside the loops
        for l in loops.iter() {
            let branches = l
                .blocks
                .iter()
                .filter(|b| matches!(f.blocks[**b].tail, Tail::Branch { .. }))
                .count();
            assert_eq!(branches, 1);
        }

        for flag in 0..2 {
            let args = vec![Value::Int(3), Value::Int(flag)];
            assert_eq!(
                run_fundef(&f, args.clone()).unwrap(),
                run_fundef(&original, args).unwrap()
            );
        }
        assert!(!unswitch(&mut f, &mut ctx).unwrap());
    }
}
