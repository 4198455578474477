use mtac::dataflow::{eval_arg, ConstantPropagation, ConstState};
use mtac::*;

use crate::PassContext;

fn fold(q: &Quadruple) -> Option<Const> {
    let c = |a: &Arg| a.constant();
    match &q.kind {
        QuadKind::BinOp(op, x, y) => op.fold(c(x)?, c(y)?),
        QuadKind::UnOp(op, x) => op.fold(c(x)?),
        QuadKind::Cmp(op, x, y) => op.fold(c(x)?, c(y)?).map(|b| Const::Int(b as i32)),
        _ => None,
    }
}

fn substitute_args(args: Vec<&mut Arg>, state: &dyn Fn(&Arg) -> ConstState) -> usize {
    let mut n = 0;
    for a in args {
        if a.var().is_none() {
            continue;
        }
        if let ConstState::Constant(c) = state(a) {
            *a = Arg::Const(c);
            n += 1;
        }
    }
    n
}

/// Replaces reads of variables known to be constant, folds arithmetic
/// over constants and resolves branches with a known outcome.
pub fn const_prop(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let sol = ctx.constants(f)?;
    let problem = ConstantPropagation::new(f);

    let mut substituted = 0;
    let mut folded = 0;
    let mut branches = 0;
    for bid in f.layout.clone() {
        let points = sol.points(&problem, f, bid);
        let block = &mut f.blocks[bid];

        for (q, before) in block.body.iter_mut().zip(&points) {
            substituted += substitute_args(q.args_mut(), &|a| eval_arg(before, a));
            if q.result.is_some() {
                if let Some(c) = fold(q) {
                    log::debug!("folded {:?} into {c}", q.kind);
                    q.kind = QuadKind::Assign(Arg::Const(c));
                    folded += 1;
                }
            }
        }

        let before_tail = &points[points.len() - 1];
        substituted += substitute_args(block.tail.args_mut(), &|a| eval_arg(before_tail, a));

        if let Tail::Branch {
            kind,
            lhs: Arg::Const(x),
            rhs: Arg::Const(y),
            on_true,
            on_false,
        } = &block.tail
        {
            if let Some(taken) = kind.fold(*x, *y) {
                let target = if taken { *on_true } else { *on_false };
                block.tail = Tail::Jump(target);
                branches += 1;
            }
        }
    }

    if branches > 0 {
        f.relink();
    }

    ctx.stats.add("const_prop.substituted", substituted);
    ctx.stats.add("const_prop.folded", folded);
    ctx.stats.add("const_prop.branches", branches);
    let changed = substituted + folded + branches > 0;
    if changed {
        log::info!(
            "const_prop on `{}`: {substituted} substituted, {folded} folded, {branches} branches",
            f.name
        );
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn folds_two_plus_three() {
        let mut g = Function::new("main");
        let x = g.add_var("x", Ty::Int, Scope::Local);
        g.push(Some(x), QuadKind::BinOp(BinOpKind::Add, Arg::int(2), Arg::int(3)));
        g.push(None, QuadKind::Print(Arg::Var(x)));
        g.push(None, QuadKind::Return(None));
        let mut f = build(g).unwrap();

        let mut ctx = PassContext::new(Config::default());
        assert!(const_prop(&mut f, &mut ctx).unwrap());
        let body = &f.blocks[f.entry].body;
        assert_eq!(body[0].kind, QuadKind::Assign(Arg::int(5)));
        assert_eq!(body[1].kind, QuadKind::Print(Arg::int(5)));
    }

    #[test]
    fn resolves_constant_branch() {
        let mut g = Function::new("main");
        let x = g.add_var("x", Ty::Int, Scope::Local);
        g.push(Some(x), QuadKind::Assign(Arg::int(1)));
        g.push(
            None,
            QuadKind::IfFalse(CmpKind::Eq, Arg::Var(x), Arg::int(1), "else".into()),
        );
        g.push(None, QuadKind::Print(Arg::int(1)));
        g.push(None, QuadKind::Return(None));
        g.push(None, QuadKind::Label("else".into()));
        g.push(None, QuadKind::Print(Arg::int(2)));
        g.push(None, QuadKind::Return(None));
        let mut f = build(g).unwrap();
        assert_eq!(f.layout.len(), 3);

        let mut ctx = PassContext::new(Config::default());
        assert!(const_prop(&mut f, &mut ctx).unwrap());
        assert_eq!(f.layout.len(), 2);
        assert_eq!(ctx.stats.get("const_prop.branches"), 1);
        assert!(f.layout.iter().all(|b| f.blocks[*b].label != "else"));
    }
}
