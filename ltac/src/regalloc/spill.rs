use mtac::dataflow::{LiveSet, Liveness, Solution};
use mtac::{Fundef, Loops, VarId};
use util::{Map, Set};

/// Priority of each candidate for a register: its uses and definitions,
/// each weighted by 10^loop-depth, per program point it is live at.
/// The lowest priorities are the first to spill.
pub fn priorities(
    f: &Fundef,
    live: &Solution<LiveSet>,
    loops: &Loops,
    candidates: &Set<VarId>,
) -> Map<VarId, f64> {
    let problem = Liveness::new(f);
    let mut weight: Map<VarId, f64> = Map::default();
    let mut length: Map<VarId, usize> = Map::default();

    for b in &f.layout {
        let w = 10f64.powi(loops.depth_of(*b) as i32);
        let block = &f.blocks[*b];
        let mentions = block
            .body
            .iter()
            .flat_map(|q| q.uses().into_iter().chain(q.def()))
            .chain(block.tail.uses());
        for v in mentions.filter(|v| candidates.contains(v)) {
            *weight.entry(v).or_default() += w;
        }

        for set in live.points(&problem, f, *b) {
            for v in set.iter().filter(|v| candidates.contains(v)) {
                *length.entry(*v).or_default() += 1;
            }
        }
    }

    candidates
        .iter()
        .map(|v| {
            let w = weight.get(v).copied().unwrap_or(0.0);
            let l = length.get(v).copied().unwrap_or(0).max(1);
            (*v, w / l as f64)
        })
        .collect()
}
