use super::{Direction, Problem};
use crate::cfg::{Fundef, Tail};
use crate::program::{QuadKind, Quadruple, VarId};
use util::Set;

pub type LiveSet = Set<VarId>;

pub struct Liveness {
    globals: LiveSet,
    address_taken: LiveSet,
}

impl Liveness {
    pub fn new(f: &Fundef) -> Self {
        Self {
            globals: f.globals().into_iter().collect(),
            address_taken: f.address_taken(),
        }
    }
}

impl Problem for Liveness {
    type Value = LiveSet;

    const DIRECTION: Direction = Direction::Backward;
    const NAME: &'static str = "liveness";

    // globals outlive the function
    fn boundary(&self, _: &Fundef) -> LiveSet {
        self.globals.clone()
    }

    fn init(&self, _: &Fundef) -> LiveSet {
        LiveSet::default()
    }

    fn meet(&self, a: &LiveSet, b: &LiveSet) -> LiveSet {
        a.union(b).copied().collect()
    }

    fn transfer(&self, q: &Quadruple, live: &mut LiveSet) {
        if let Some(r) = q.def() {
            live.remove(&r);
        }
        live.extend(q.uses());
        match &q.kind {
            QuadKind::Call(..) => {
                live.extend(self.globals.iter().copied());
                live.extend(self.address_taken.iter().copied());
            }
            QuadKind::Deref(_) => live.extend(self.address_taken.iter().copied()),
            _ => (),
        }
    }

    fn transfer_tail(&self, t: &Tail, live: &mut LiveSet) {
        live.extend(t.uses());
    }
}
