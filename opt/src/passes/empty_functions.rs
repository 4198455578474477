use mtac::*;
use util::{Label, Set};

fn is_empty(f: &Fundef) -> bool {
    f.quad_count() == 0
        && f
            .layout
            .iter()
            .all(|b| !matches!(f.blocks[*b].tail, Tail::Return(Some(_))))
}

/// Deletes functions other than `main` that do nothing, together with the
/// calls to them.
pub fn remove_empty_functions(m: &mut Module, stats: &mut Statistics) -> bool {
    let mut empty: Set<Label> = m
        .fundefs
        .iter()
        .filter(|f| f.name != "main" && is_empty(f))
        .map(|f| f.name.clone())
        .collect();

    // a call whose result is used keeps its callee
    for f in &m.fundefs {
        for b in &f.layout {
            for q in &f.blocks[*b].body {
                if let (Some(_), QuadKind::Call(callee, _)) = (q.result, &q.kind) {
                    empty.remove(callee);
                }
            }
        }
    }
    if empty.is_empty() {
        return false;
    }

    let mut calls = 0;
    for f in &mut m.fundefs {
        for b in f.layout.clone() {
            let body = &mut f.blocks[b].body;
            let before = body.len();
            body.retain(|q| !matches!(&q.kind, QuadKind::Call(callee, _) if empty.contains(callee)));
            calls += before - body.len();
        }
    }
    m.fundefs.retain(|f| !empty.contains(&f.name));

    log::info!(
        "removed {} empty functions and {calls} calls to them",
        empty.len()
    );
    stats.add("remove_empty_functions.removed", empty.len());
    true
}
