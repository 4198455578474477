use mtac::dataflow::{LiveSet, Solution};
use mtac::{ErrorKind, Fundef, Loops, Result, VarId};
use util::{Label, Map, Set};

use super::{interference::Interference, spill};
use crate::platform::{Reg, Xmm, ARGS_OFFSET, CALLEE_SAVED, FLOAT_REGS, GP_REGS, SLOT, STACK_ALIGN};

const PASS: &str = "regalloc";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(Reg),
    Xmm(Xmm),
    // offset from rbp; aggregates start here and grow upwards
    Stack(i32),
    Global(Label),
}

impl Location {
    pub fn is_register(&self) -> bool {
        matches!(self, Location::Reg(_) | Location::Xmm(_))
    }
}

#[derive(Debug, Clone)]
pub struct Allocation {
    pub locations: Vec<Location>,
    // multiple of 16 once the callee-saved pushes are added
    pub frame_size: i32,
    pub callee_saved: Vec<Reg>,
    pub spilled: Vec<VarId>,
    pub interference: Interference,
}

impl Allocation {
    pub fn location(&self, v: VarId) -> &Location {
        &self.locations[v.0]
    }
}

struct Frame {
    size: i32,
}

impl Frame {
    // lowest address of `slots` fresh slots
    fn reserve(&mut self, slots: usize) -> Option<i32> {
        let bytes = i32::try_from(slots).ok()?.checked_mul(SLOT)?;
        self.size = self.size.checked_add(bytes)?;
        Some(-self.size)
    }
}

pub fn allocate(f: &Fundef, live: &Solution<LiveSet>, loops: &Loops) -> Result<Allocation> {
    let memory = f.memory_resident();
    let candidates: Set<VarId> = (0..f.vars.len())
        .map(VarId)
        .filter(|v| !memory.contains(v))
        .collect();
    let interference = Interference::build(f, live, &candidates);
    let priority = spill::priorities(f, live, loops, &candidates);

    let incoming: Map<VarId, i32> = f
        .params
        .iter()
        .enumerate()
        .map(|(k, p)| (*p, ARGS_OFFSET + SLOT * k as i32))
        .collect();
    let unplaceable = |v: VarId| f.error(PASS, ErrorKind::Unplaceable(f.var(v).name.clone()));

    let mut frame = Frame { size: 0 };
    let mut locations: Vec<Option<Location>> = vec![None; f.vars.len()];

    for v in (0..f.vars.len()).map(VarId).filter(|v| memory.contains(v)) {
        let var = f.var(v);
        let loc = if var.is_global() {
            Location::Global(var.name.clone())
        } else if let Some(off) = incoming.get(&v) {
            Location::Stack(*off)
        } else {
            Location::Stack(frame.reserve(var.ty.slots()).ok_or_else(|| unplaceable(v))?)
        };
        locations[v.0] = Some(loc);
    }

    let mut order: Vec<VarId> = candidates.iter().copied().collect();
    order.sort_by(|a, b| {
        priority[b]
            .partial_cmp(&priority[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(b))
    });

    let mut spilled = vec![];
    for v in order {
        let taken: Set<&Location> = interference
            .neighbors(v)
            .filter_map(|u| locations[u.0].as_ref())
            .collect();
        let free = if f.var(v).ty.is_float() {
            FLOAT_REGS
                .iter()
                .map(|x| Location::Xmm(*x))
                .find(|l| !taken.contains(l))
        } else {
            GP_REGS
                .iter()
                .map(|r| Location::Reg(*r))
                .find(|l| !taken.contains(l))
        };
        let loc = match free {
            Some(l) => l,
            None => {
                log::debug!("{}: spilling `{}`", f.name, f.var(v).name);
                spilled.push(v);
                match incoming.get(&v) {
                    Some(off) => Location::Stack(*off),
                    None => Location::Stack(frame.reserve(1).ok_or_else(|| unplaceable(v))?),
                }
            }
        };
        locations[v.0] = Some(loc);
    }

    let locations = locations
        .into_iter()
        .enumerate()
        .map(|(i, l)| l.ok_or_else(|| unplaceable(VarId(i))))
        .collect::<Result<Vec<_>>>()?;

    let callee_saved: Vec<Reg> = CALLEE_SAVED
        .iter()
        .copied()
        .filter(|r| locations.contains(&Location::Reg(*r)))
        .collect();
    let pushed = SLOT * callee_saved.len() as i32;
    let misalign = (frame.size + pushed) % STACK_ALIGN;
    if misalign != 0 {
        frame.reserve(((STACK_ALIGN - misalign) / SLOT) as usize)
            .ok_or_else(|| f.error(PASS, ErrorKind::Unplaceable(f.name.clone())))?;
    }

    Ok(Allocation {
        locations,
        frame_size: frame.size,
        callee_saved,
        spilled,
        interference,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtac::dataflow::{solve, Liveness};
    use mtac::*;

    // s = 0; s = s + v0; ... with every vi defined up front
    fn pressure(n: usize, scope: Scope) -> Fundef {
        let mut g = Function::new("pressure");
        let vs: Vec<VarId> = (0..n)
            .map(|i| g.add_var(&format!("v{i}"), Ty::Int, scope))
            .collect();
        let s = g.add_var("s", Ty::Int, Scope::Local);
        if scope != Scope::Param {
            for (i, v) in vs.iter().enumerate() {
                g.push(Some(*v), QuadKind::Assign(Arg::int(i as i32)));
            }
        }
        g.push(Some(s), QuadKind::Assign(Arg::int(0)));
        for v in &vs {
            g.push(Some(s), QuadKind::BinOp(BinOpKind::Add, Arg::Var(s), Arg::Var(*v)));
        }
        g.push(None, QuadKind::Return(Some(Arg::Var(s))));
        build(g).unwrap()
    }

    fn run(f: &Fundef) -> (Allocation, Solution<LiveSet>) {
        let live = solve(&Liveness::new(f), f).unwrap();
        let dom = Dominators::compute(f).unwrap();
        let loops = Loops::detect(f, &dom);
        (allocate(f, &live, &loops).unwrap(), live)
    }

    fn assert_safe(f: &Fundef, a: &Allocation, live: &Solution<LiveSet>) {
        let p = Liveness::new(f);
        for b in &f.layout {
            let mut sets = live.points(&p, f, *b);
            sets.push(live.block_in(*b).clone());
            for set in &sets {
                for x in set {
                    for y in set {
                        if x != y && a.location(*x).is_register() {
                            assert_ne!(a.location(*x), a.location(*y), "{x} and {y}");
                        }
                    }
                }
            }
        }
        let slots: Set<&Location> = a.spilled.iter().map(|v| a.location(*v)).collect();
        assert_eq!(slots.len(), a.spilled.len());
        assert_eq!((a.frame_size + SLOT * a.callee_saved.len() as i32) % STACK_ALIGN, 0);
    }

    #[test]
    fn pressure_forces_spills() {
        let f = pressure(12, Scope::Local);
        let (a, live) = run(&f);
        // 13 values are live after `s = 0`
        assert!(a.spilled.len() >= 3);
        assert!(a.frame_size >= 3 * SLOT);
        assert_safe(&f, &a, &live);
    }

    #[test]
    fn few_values_need_no_stack() {
        let f = pressure(4, Scope::Local);
        let (a, live) = run(&f);
        assert!(a.spilled.is_empty());
        assert_eq!(a.frame_size % SLOT, 0);
        assert_safe(&f, &a, &live);
    }

    #[test]
    fn spilled_params_keep_their_incoming_slot() {
        let f = pressure(12, Scope::Param);
        let (a, live) = run(&f);
        assert!(!a.spilled.is_empty());
        for v in &a.spilled {
            if let Some(k) = f.params.iter().position(|p| p == v) {
                assert_eq!(*a.location(*v), Location::Stack(ARGS_OFFSET + SLOT * k as i32));
            }
        }
        assert_safe(&f, &a, &live);
    }

    #[test]
    fn floats_go_to_xmm_registers() {
        let mut g = Function::new("mix");
        let x = g.add_var("x", Ty::Float, Scope::Local);
        let i = g.add_var("i", Ty::Int, Scope::Local);
        let arr = g.add_var("arr", Ty::Array(Box::new(Ty::Int), 3), Scope::Local);
        g.push(Some(x), QuadKind::Assign(Arg::float(1.5)));
        g.push(Some(i), QuadKind::Assign(Arg::int(2)));
        g.push(None, QuadKind::Store(arr, Arg::int(0), Arg::Var(i)));
        g.push(None, QuadKind::Print(Arg::Var(x)));
        g.push(None, QuadKind::Return(Some(Arg::Var(i))));
        let f = build(g).unwrap();

        let (a, live) = run(&f);
        assert!(matches!(a.location(x), Location::Xmm(_)));
        assert!(matches!(a.location(i), Location::Reg(_)));
        // three slots, padded to 16 bytes with whatever callee-saved pushes follow
        match a.location(arr) {
            Location::Stack(off) => assert!(*off + 2 * SLOT < 0),
            l => panic!("array placed in {l:?}"),
        }
        assert_safe(&f, &a, &live);
    }
}
