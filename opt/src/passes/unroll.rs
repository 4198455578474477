use mtac::dataflow::{lookup, ConstState};
use mtac::*;

use crate::common::count_defs;
use crate::{Invalidates, PassContext};

// trip counts are simulated; partial unrolling gives up beyond this
const SIMULATION_LIMIT: usize = 1 << 16;

// the header's conditional branch, comparing the induction variable with a constant
struct ExitTest {
    kind: CmpKind,
    var: VarId,
    bound: i32,
    var_on_left: bool,
    stay_on_true: bool,
    exit: BlockId,
}

impl ExitTest {
    fn of(f: &Fundef, l: &Loop) -> Option<Self> {
        let (kind, lhs, rhs, on_true, on_false) = match &f.blocks[l.header].tail {
            Tail::Branch {
                kind,
                lhs,
                rhs,
                on_true,
                on_false,
            } => (*kind, lhs, rhs, *on_true, *on_false),
            _ => return None,
        };
        let stay_on_true = l.contains(on_true);
        if stay_on_true == l.contains(on_false) {
            return None;
        }
        let (var, bound, var_on_left) = match (lhs, rhs) {
            (Arg::Var(v), Arg::Const(Const::Int(c))) => (*v, *c, true),
            (Arg::Const(Const::Int(c)), Arg::Var(v)) => (*v, *c, false),
            _ => return None,
        };
        Some(Self {
            kind,
            var,
            bound,
            var_on_left,
            stay_on_true,
            exit: if stay_on_true { on_false } else { on_true },
        })
    }

    fn stays(&self, v: i32) -> bool {
        let t = if self.var_on_left {
            self.kind.test(v, self.bound)
        } else {
            self.kind.test(self.bound, v)
        };
        t == self.stay_on_true
    }
}

fn step_of(q: &Quadruple, v: VarId) -> Option<i32> {
    use BinOpKind::*;
    match &q.kind {
        QuadKind::BinOp(Add, Arg::Var(x), Arg::Const(Const::Int(c)))
        | QuadKind::BinOp(Add, Arg::Const(Const::Int(c)), Arg::Var(x))
            if *x == v =>
        {
            Some(*c)
        }
        QuadKind::BinOp(Sub, Arg::Var(x), Arg::Const(Const::Int(c))) if *x == v => c.checked_neg(),
        _ => None,
    }
}

// header first, then the blocks of the only cycle through it
fn simple_cycle(f: &Fundef, l: &Loop, test: &ExitTest) -> Option<Vec<BlockId>> {
    let mut r = vec![l.header];
    let mut cur = f
        .succs(l.header)
        .into_iter()
        .find(|s| *s != test.exit)?;
    while cur != l.header {
        if !l.contains(cur) || r.contains(&cur) {
            return None;
        }
        r.push(cur);
        cur = match f.blocks[cur].tail {
            Tail::Jump(s) | Tail::Fallthrough(s) => s,
            _ => return None,
        };
    }
    if r.len() != l.blocks.len() {
        return None;
    }
    Some(r)
}

/// A loop whose iteration count is known at compile time.
struct Counted {
    cycle: Vec<BlockId>,
    exit: BlockId,
    // times the test decides to stay in the loop
    trips: usize,
}

fn analyze(f: &Fundef, l: &Loop, ctx: &mut PassContext, limit: usize) -> Result<Option<Counted>> {
    let test = match ExitTest::of(f, l) {
        Some(t) => t,
        None => return Ok(None),
    };
    if l.exits(f).len() != 1 || f.memory_resident().contains(&test.var) {
        return Ok(None);
    }
    let cycle = match simple_cycle(f, l, &test) {
        Some(c) => c,
        None => return Ok(None),
    };
    if count_defs(f, &cycle).get(&test.var) != Some(&1) {
        return Ok(None);
    }
    let (def_block, step) = match cycle.iter().find_map(|b| {
        f.blocks[*b]
            .body
            .iter()
            .find(|q| q.def() == Some(test.var))
            .map(|q| (*b, step_of(q, test.var)))
    }) {
        Some((b, Some(step))) => (b, step),
        _ => return Ok(None),
    };

    // every way into the loop brings the same start value
    let consts = ctx.constants(f)?;
    let mut init = None;
    for p in f.preds(l.header).iter().filter(|p| !l.contains(**p)) {
        match lookup(consts.block_out(*p), test.var) {
            ConstState::Constant(Const::Int(c)) if init.is_none() || init == Some(c) => {
                init = Some(c)
            }
            _ => return Ok(None),
        }
    }
    let mut v = match init {
        Some(v) => v,
        None => return Ok(None),
    };

    let in_header = def_block == l.header;
    let mut trips = 0;
    loop {
        if in_header {
            v = match v.checked_add(step) {
                Some(v) => v,
                None => return Ok(None),
            };
        }
        if !test.stays(v) {
            break;
        }
        trips += 1;
        if trips > limit {
            return Ok(None);
        }
        if !in_header {
            v = match v.checked_add(step) {
                Some(v) => v,
                None => return Ok(None),
            };
        }
    }

    Ok(Some(Counted {
        cycle,
        exit: test.exit,
        trips,
    }))
}

// replaces the loop by straight-line code: the cycle `trips` times, then the header once more
fn unroll_completely(f: &mut Fundef, l: &Loop, c: &Counted) -> usize {
    let mut body = vec![];
    for _ in 0..c.trips {
        for b in &c.cycle {
            body.extend(f.blocks[*b].body.iter().cloned());
        }
    }
    body.extend(f.blocks[l.header].body.iter().cloned());
    let n = body.len();

    let mut block = Block::new();
    block.body = body;
    block.tail = Tail::Jump(c.exit);
    let u = f.blocks.alloc(block);

    let outside: Vec<BlockId> = f
        .preds(l.header)
        .iter()
        .copied()
        .filter(|p| !l.contains(*p))
        .collect();
    for p in outside {
        f.blocks[p].tail.retarget(l.header, u);
    }
    if f.entry == l.header {
        f.entry = u;
    }
    let pos = f.layout.iter().position(|b| *b == l.header).unwrap_or(0);
    f.layout.insert(pos, u);
    f.relink();
    n
}

fn complete_size(f: &Fundef, l: &Loop, c: &Counted) -> usize {
    let cycle: usize = c.cycle.iter().map(|b| f.blocks[*b].body.len()).sum();
    c.trips * cycle + f.blocks[l.header].body.len()
}

/// Complete unrolling of loops with a small known trip count, and
/// unrolling by 4 or 2 of single-block loops whose trip count allows it.
pub fn unroll(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let limit = ctx.config.unroll_limit;
    let size = ctx.config.unroll_size;
    let mut complete = 0;
    let mut partial = 0;

    'search: loop {
        let loops = ctx.loops(f)?;
        for l in loops.innermost_first() {
            let label = f.blocks[l.header].label.clone();

            if let Some(c) = analyze(f, l, ctx, limit)? {
                if complete_size(f, l, &c) <= size {
                    let n = unroll_completely(f, l, &c);
                    log::info!(
                        "unrolled loop `{label}` of `{}` completely ({} trips, {n} quadruples)",
                        f.name,
                        c.trips
                    );
                    complete += 1;
                    ctx.invalidate(Invalidates::ALL);
                    continue 'search;
                }
            }

            if l.blocks.len() != 1 || ctx.unrolled.contains(&label) {
                continue;
            }
            let c = match analyze(f, l, ctx, SIMULATION_LIMIT)? {
                Some(c) => c,
                None => continue,
            };
            let runs = c.trips + 1;
            let body = &f.blocks[l.header].body;
            let factor = [4, 2]
                .into_iter()
                .find(|k| runs % k == 0 && body.len() * k <= size);
            if let Some(k) = factor {
                let once = body.clone();
                let header = &mut f.blocks[l.header];
                for _ in 1..k {
                    header.body.extend(once.iter().cloned());
                }
                log::info!("unrolled loop `{label}` of `{}` by {k}", f.name);
                ctx.unrolled.insert(label);
                partial += 1;
                ctx.invalidate(Invalidates::VALUES);
                continue 'search;
            }
        }
        break;
    }

    ctx.stats.add("unroll.complete", complete);
    ctx.stats.add("unroll.partial", partial);
    Ok(complete + partial > 0)
}
