use mtac::dataflow::ConstState;
use mtac::*;
use util::{Label, Map};

fn calls(m: &Module) -> impl Iterator<Item = (&Label, &Vec<Arg>)> {
    m.fundefs.iter().flat_map(|f| {
        f.layout.iter().flat_map(move |b| {
            f.blocks[*b].body.iter().filter_map(|q| match &q.kind {
                QuadKind::Call(callee, args) => Some((callee, args)),
                _ => None,
            })
        })
    })
}

// what every call site passes for each parameter
fn incoming(m: &Module) -> Map<Label, Vec<ConstState>> {
    let mut r: Map<Label, Vec<ConstState>> = m
        .fundefs
        .iter()
        .map(|f| (f.name.clone(), vec![ConstState::Unknown; f.params.len()]))
        .collect();

    for (callee, args) in calls(m) {
        let states = match r.get_mut(callee) {
            Some(s) => s,
            None => continue,
        };
        if states.len() != args.len() {
            states.iter_mut().for_each(|s| *s = ConstState::NotConstant);
            continue;
        }
        for (s, a) in states.iter_mut().zip(args) {
            let arg = match a {
                Arg::Const(c) => ConstState::Constant(*c),
                _ => ConstState::NotConstant,
            };
            *s = s.meet(arg);
        }
    }
    r
}

// a block that no edge enters, so code placed in it runs once per call
fn fresh_entry(f: &mut Fundef) -> BlockId {
    if f.preds(f.entry).is_empty() {
        return f.entry;
    }
    let b = f.new_block();
    f.blocks[b].tail = Tail::Jump(f.entry);
    f.entry = b;
    f.layout.insert(0, b);
    f.relink();
    b
}

/// Turns a parameter that receives the same constant at every call site
/// into a local initialised with that constant.
pub fn propagate_parameters(m: &mut Module, stats: &mut Statistics) -> bool {
    let incoming = incoming(m);
    let mut removed: Map<Label, Vec<usize>> = Map::default();

    for f in m.fundefs.iter_mut().filter(|f| f.name != "main") {
        let constants: Vec<(usize, Const)> = incoming[&f.name]
            .iter()
            .enumerate()
            .filter_map(|(k, s)| s.constant().map(|c| (k, c)))
            .collect();
        if constants.is_empty() {
            continue;
        }

        let entry = fresh_entry(f);
        for (k, c) in constants.iter().rev() {
            let p = f.params.remove(*k);
            f.vars[p.0].scope = Scope::Local;
            f.blocks[entry]
                .body
                .insert(0, Quadruple::new(p, QuadKind::Assign(Arg::Const(*c))));
            log::debug!(
                "parameter `{}` of `{}` is always {c}",
                f.vars[p.0].name,
                f.name
            );
        }
        removed.insert(f.name.clone(), constants.iter().map(|(k, _)| *k).collect());
    }

    if removed.is_empty() {
        return false;
    }
    for f in &mut m.fundefs {
        for b in f.layout.clone() {
            for q in &mut f.blocks[b].body {
                if let QuadKind::Call(callee, args) = &mut q.kind {
                    if let Some(ks) = removed.get(callee) {
                        for k in ks.iter().rev() {
                            args.remove(*k);
                        }
                    }
                }
            }
        }
    }

    let n = removed.values().map(|ks| ks.len()).sum();
    log::info!("propagated {n} constant parameters");
    stats.add("propagate_parameters.propagated", n);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtac::eval::run;

    // int scale(int a, int k) { return a * k }
    fn scale() -> Function {
        let mut g = Function::new("scale");
        let a = g.add_var("a", Ty::Int, Scope::Param);
        let k = g.add_var("k", Ty::Int, Scope::Param);
        let r = g.add_var("r", Ty::Int, Scope::Temporary);
        g.push(Some(r), QuadKind::BinOp(BinOpKind::Mul, Arg::Var(a), Arg::Var(k)));
        g.push(None, QuadKind::Return(Some(Arg::Var(r))));
        g
    }

    fn program(second: i32) -> Module {
        let mut main = Function::new("main");
        let x = main.add_var("x", Ty::Int, Scope::Local);
        let y = main.add_var("y", Ty::Int, Scope::Local);
        main.push(Some(x), QuadKind::Call("scale".into(), vec![Arg::int(2), Arg::int(3)]));
        main.push(None, QuadKind::Print(Arg::Var(x)));
        main.push(
            Some(y),
            QuadKind::Call("scale".into(), vec![Arg::int(5), Arg::int(second)]),
        );
        main.push(None, QuadKind::Print(Arg::Var(y)));
        main.push(None, QuadKind::Return(None));
        build_module(Program {
            functions: vec![main, scale()],
            ..Program::default()
        })
        .unwrap()
    }

    #[test]
    fn same_constant_everywhere_is_propagated() {
        let original = program(3);
        let mut m = original.clone();
        let mut stats = Statistics::new();
        assert!(propagate_parameters(&mut m, &mut stats));
        assert_eq!(stats.get("propagate_parameters.propagated"), 1);

        let scale = m.fundef("scale").unwrap();
        assert_eq!(scale.params.len(), 1);
        assert_eq!(scale.vars[scale.params[0].0].name, "a");
        for (_, args) in calls(&m) {
            assert_eq!(args.len(), 1);
        }

        assert_eq!(
            run(&m, "main", vec![], &[]).unwrap(),
            run(&original, "main", vec![], &[]).unwrap()
        );
    }

    #[test]
    fn differing_constants_are_kept() {
        let mut m = program(4);
        let mut stats = Statistics::new();
        assert!(!propagate_parameters(&mut m, &mut stats));
        assert_eq!(m.fundef("scale").unwrap().params.len(), 2);
    }
}
