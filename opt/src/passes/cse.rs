use std::hash::{BuildHasher, Hash, Hasher};

use mtac::*;
use util::{Map, Set};

use crate::PassContext;

// compares expressions modulo commutativity and swapped comparisons,
// so `a + b` and `b + a` share an entry
#[derive(Debug, Clone)]
struct Expr(QuadKind);

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        use QuadKind::*;
        match (&self.0, &other.0) {
            (BinOp(op1, x1, x2), BinOp(op2, y1, y2)) if op1 == op2 => {
                (x1, x2) == (y1, y2) || (op1.is_commutative() && (x2, x1) == (y1, y2))
            }
            (Cmp(k1, x1, x2), Cmp(k2, y1, y2)) => {
                (k1 == k2 && (x1, x2) == (y1, y2)) || (*k1 == k2.swap() && (x1, x2) == (y2, y1))
            }
            (a, b) => a == b,
        }
    }
}

impl Eq for Expr {}

fn hash_one(a: &Arg) -> u64 {
    util::Hasher::default().hash_one(a)
}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        use QuadKind::*;
        core::mem::discriminant(&self.0).hash(state);
        match &self.0 {
            BinOp(op, x, y) => {
                op.hash(state);
                let (hx, hy) = (hash_one(x), hash_one(y));
                if op.is_commutative() {
                    (hx.min(hy), hx.max(hy)).hash(state)
                } else {
                    (hx, hy).hash(state)
                }
            }
            Cmp(_, x, y) => {
                let (hx, hy) = (hash_one(x), hash_one(y));
                (hx.min(hy), hx.max(hy)).hash(state)
            }
            UnOp(op, x) => {
                op.hash(state);
                x.hash(state)
            }
            _ => (),
        }
    }
}

impl Expr {
    fn mentions(&self, v: VarId) -> bool {
        Quadruple::effect(self.0.clone()).uses().contains(&v)
    }
}

fn candidate(q: &Quadruple, memory: &Set<VarId>) -> Option<Expr> {
    match &q.kind {
        QuadKind::BinOp(..) | QuadKind::UnOp(..) | QuadKind::Cmp(..) => {
            if q.uses().iter().any(|v| memory.contains(v)) {
                None
            } else {
                Some(Expr(q.kind.clone()))
            }
        }
        _ => None,
    }
}

// block-local common subexpression elimination
pub fn cse(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let memory = f.memory_resident();
    let mut n = 0;

    for bid in f.layout.clone() {
        let mut avail: Map<Expr, VarId> = Map::default();
        for q in &mut f.blocks[bid].body {
            let r = match q.def() {
                Some(r) => r,
                None => continue,
            };
            let e = if memory.contains(&r) {
                None
            } else {
                candidate(q, &memory)
            };

            let mut fresh = e.clone();
            if let Some(h) = e.as_ref().and_then(|e| avail.get(e)) {
                if *h != r {
                    log::debug!("replacing recomputation of {:?} by {h}", q.kind);
                    q.kind = QuadKind::Assign(Arg::Var(*h));
                    n += 1;
                }
                fresh = None;
            }

            avail.retain(|e, h| *h != r && !e.mentions(r));
            if let Some(e) = fresh {
                if !e.mentions(r) {
                    avail.insert(e, r);
                }
            }
        }
    }

    ctx.stats.add("cse.replaced", n);
    if n > 0 {
        log::info!("cse on `{}`: {n} expressions reused", f.name);
    }
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn commutative_recomputation_is_reused() {
        let mut g = Function::new("f");
        let a = g.add_var("a", Ty::Int, Scope::Param);
        let b = g.add_var("b", Ty::Int, Scope::Param);
        let x = g.add_var("x", Ty::Int, Scope::Local);
        let y = g.add_var("y", Ty::Int, Scope::Local);
        let z = g.add_var("z", Ty::Int, Scope::Local);
        let w = g.add_var("w", Ty::Int, Scope::Local);
        g.push(Some(x), QuadKind::BinOp(BinOpKind::Add, Arg::Var(a), Arg::Var(b)));
        g.push(Some(y), QuadKind::BinOp(BinOpKind::Add, Arg::Var(b), Arg::Var(a)));
        g.push(Some(z), QuadKind::BinOp(BinOpKind::Sub, Arg::Var(b), Arg::Var(a)));
        g.push(Some(a), QuadKind::Assign(Arg::int(1)));
        g.push(Some(w), QuadKind::BinOp(BinOpKind::Add, Arg::Var(a), Arg::Var(b)));
        g.push(None, QuadKind::Return(Some(Arg::Var(w))));
        let mut f = build(g).unwrap();

        let mut ctx = PassContext::new(Config::default());
        assert!(cse(&mut f, &mut ctx).unwrap());
        let body = &f.blocks[f.entry].body;
        assert_eq!(body[1].kind, QuadKind::Assign(Arg::Var(x)));
        assert!(matches!(body[2].kind, QuadKind::BinOp(BinOpKind::Sub, ..)));
        // `a` was redefined in between
        assert!(matches!(body[4].kind, QuadKind::BinOp(BinOpKind::Add, ..)));
        assert_eq!(ctx.stats.get("cse.replaced"), 1);
    }

    #[test]
    fn swapped_comparison_is_equal() {
        let a = Arg::Var(VarId(0));
        let b = Arg::Var(VarId(1));
        let e1 = Expr(QuadKind::Cmp(CmpKind::Lt, a.clone(), b.clone()));
        let e2 = Expr(QuadKind::Cmp(CmpKind::Gt, b, a));
        assert_eq!(e1, e2);
        assert_eq!(
            util::Hasher::default().hash_one(&e1),
            util::Hasher::default().hash_one(&e2)
        );
    }
}
