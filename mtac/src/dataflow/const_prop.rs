use super::{Direction, Problem};
use crate::cfg::{Fundef, Tail};
use crate::program::*;
use util::{Map, Set};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstState {
    // no assignment seen yet
    Unknown,
    Constant(Const),
    NotConstant,
}

impl ConstState {
    pub fn meet(self, other: ConstState) -> ConstState {
        use ConstState::*;
        match (self, other) {
            (Unknown, x) | (x, Unknown) => x,
            (Constant(a), Constant(b)) if a == b => Constant(a),
            _ => NotConstant,
        }
    }

    pub fn constant(&self) -> Option<Const> {
        match self {
            ConstState::Constant(c) => Some(*c),
            _ => None,
        }
    }
}

/// Absent variables are `Unknown`; `Unknown` is never stored explicitly.
pub type ConstMap = Map<VarId, ConstState>;

pub fn lookup(m: &ConstMap, v: VarId) -> ConstState {
    m.get(&v).copied().unwrap_or(ConstState::Unknown)
}

pub fn eval_arg(m: &ConstMap, a: &Arg) -> ConstState {
    match a {
        Arg::Var(v) => lookup(m, *v),
        Arg::Const(c) => ConstState::Constant(*c),
        Arg::Str(_) => ConstState::NotConstant,
    }
}

fn set(m: &mut ConstMap, v: VarId, s: ConstState) {
    if s == ConstState::Unknown {
        m.remove(&v);
    } else {
        m.insert(v, s);
    }
}

pub struct ConstantPropagation {
    // values that may change behind a call
    escaping: Set<VarId>,
    address_taken: Set<VarId>,
    entry: ConstMap,
}

impl ConstantPropagation {
    pub fn new(f: &Fundef) -> Self {
        let address_taken = f.address_taken();
        let mut escaping: Set<VarId> = f.globals().into_iter().collect();
        escaping.extend(address_taken.iter().copied());

        let entry = f
            .params
            .iter()
            .chain(escaping.iter())
            .map(|v| (*v, ConstState::NotConstant))
            .collect();

        Self {
            escaping,
            address_taken,
            entry,
        }
    }

    fn clobber<'a, I: IntoIterator<Item = &'a VarId>>(m: &mut ConstMap, vs: I) {
        for v in vs {
            m.insert(*v, ConstState::NotConstant);
        }
    }
}

// NotConstant as soon as one operand is not a known constant
fn fold(m: &ConstMap, kind: &QuadKind) -> ConstState {
    use ConstState::*;
    let c = |a: &Arg| eval_arg(m, a).constant();
    let r = match kind {
        QuadKind::Assign(x) => return eval_arg(m, x),
        QuadKind::BinOp(op, x, y) => c(x).zip(c(y)).and_then(|(x, y)| op.fold(x, y)),
        QuadKind::UnOp(op, x) => c(x).and_then(|x| op.fold(x)),
        QuadKind::Cmp(op, x, y) => c(x)
            .zip(c(y))
            .and_then(|(x, y)| op.fold(x, y))
            .map(|b| Const::Int(b as i32)),
        _ => None,
    };
    r.map(Constant).unwrap_or(NotConstant)
}

impl Problem for ConstantPropagation {
    type Value = ConstMap;

    const DIRECTION: Direction = Direction::Forward;
    const NAME: &'static str = "constant propagation";

    fn boundary(&self, _: &Fundef) -> ConstMap {
        self.entry.clone()
    }

    fn init(&self, _: &Fundef) -> ConstMap {
        ConstMap::default()
    }

    fn meet(&self, a: &ConstMap, b: &ConstMap) -> ConstMap {
        let mut r = a.clone();
        for (v, s) in b {
            let x = lookup(a, *v).meet(*s);
            set(&mut r, *v, x);
        }
        r
    }

    fn transfer(&self, q: &Quadruple, m: &mut ConstMap) {
        match &q.kind {
            QuadKind::Call(..) => Self::clobber(m, &self.escaping),
            QuadKind::DerefStore(..) => Self::clobber(m, &self.address_taken),
            _ => (),
        }
        if let Some(r) = q.result {
            let s = fold(m, &q.kind);
            set(m, r, s);
        }
    }

    fn transfer_tail(&self, _: &Tail, _: &mut ConstMap) {}
}
