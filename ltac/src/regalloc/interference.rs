use mtac::dataflow::{LiveSet, Liveness, Solution};
use mtac::{Fundef, VarId};
use util::{Map, Set};

/// Register candidates that are live at the same time somewhere.
#[derive(Debug, Clone, Default)]
pub struct Interference {
    edges: Map<VarId, Set<VarId>>,
}

impl Interference {
    pub fn build(f: &Fundef, live: &Solution<LiveSet>, candidates: &Set<VarId>) -> Self {
        let problem = Liveness::new(f);
        let mut g = Self::default();

        // the prologue loads every parameter, read or not
        for p in &f.params {
            for v in live.block_in(f.entry) {
                g.add(*p, *v, candidates);
            }
        }

        for b in &f.layout {
            g.clique(live.block_in(*b), candidates);
            let points = live.points(&problem, f, *b);
            for (q, after) in f.blocks[*b].body.iter().zip(&points) {
                g.clique(after, candidates);
                // a dead definition still overwrites its register
                if let Some(d) = q.def() {
                    for v in after {
                        g.add(d, *v, candidates);
                    }
                }
            }
            if let Some(out) = points.last() {
                g.clique(out, candidates);
            }
        }
        g
    }

    fn clique(&mut self, live: &LiveSet, candidates: &Set<VarId>) {
        let vs: Vec<VarId> = live
            .iter()
            .copied()
            .filter(|v| candidates.contains(v))
            .collect();
        for (i, a) in vs.iter().enumerate() {
            for b in &vs[i + 1..] {
                self.add(*a, *b, candidates);
            }
        }
    }

    fn add(&mut self, a: VarId, b: VarId, candidates: &Set<VarId>) {
        if a == b || !candidates.contains(&a) || !candidates.contains(&b) {
            return;
        }
        self.edges.entry(a).or_default().insert(b);
        self.edges.entry(b).or_default().insert(a);
    }

    pub fn interferes(&self, a: VarId, b: VarId) -> bool {
        self.edges.get(&a).map_or(false, |s| s.contains(&b))
    }

    pub fn neighbors(&self, v: VarId) -> impl Iterator<Item = VarId> + '_ {
        self.edges.get(&v).into_iter().flat_map(|s| s.iter().copied())
    }

    pub fn degree(&self, v: VarId) -> usize {
        self.edges.get(&v).map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtac::dataflow::solve;
    use mtac::*;

    #[test]
    fn overlapping_ranges_interfere() {
        // a = 1; b = 2; c = a + b; d = c; return d
        let mut g = Function::new("f");
        let a = g.add_var("a", Ty::Int, Scope::Local);
        let b = g.add_var("b", Ty::Int, Scope::Local);
        let c = g.add_var("c", Ty::Int, Scope::Local);
        let d = g.add_var("d", Ty::Int, Scope::Local);
        g.push(Some(a), QuadKind::Assign(Arg::int(1)));
        g.push(Some(b), QuadKind::Assign(Arg::int(2)));
        g.push(Some(c), QuadKind::BinOp(BinOpKind::Add, Arg::Var(a), Arg::Var(b)));
        g.push(Some(d), QuadKind::Assign(Arg::Var(c)));
        g.push(None, QuadKind::Return(Some(Arg::Var(d))));
        let f = build(g).unwrap();

        let live = solve(&Liveness::new(&f), &f).unwrap();
        let all = [a, b, c, d].into_iter().collect();
        let graph = Interference::build(&f, &live, &all);
        assert!(graph.interferes(a, b));
        assert!(!graph.interferes(a, c));
        assert!(!graph.interferes(c, d));
        assert_eq!(graph.degree(d), 0);
    }

    #[test]
    fn unread_parameter_interferes_with_live_ones() {
        let mut g = Function::new("first");
        let a = g.add_var("a", Ty::Int, Scope::Param);
        let b = g.add_var("b", Ty::Int, Scope::Param);
        g.push(None, QuadKind::Return(Some(Arg::Var(a))));
        let f = build(g).unwrap();

        let live = solve(&Liveness::new(&f), &f).unwrap();
        let all = [a, b].into_iter().collect();
        let graph = Interference::build(&f, &live, &all);
        assert!(graph.interferes(a, b));
    }
}
