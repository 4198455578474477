use mtac::*;

use crate::PassContext;

// b -> s where s has no other predecessor
fn find(f: &Fundef) -> Option<(BlockId, BlockId)> {
    f.layout.iter().find_map(|b| {
        let s = match f.blocks[*b].tail {
            Tail::Jump(s) | Tail::Fallthrough(s) => s,
            _ => return None,
        };
        if s != *b && s != f.entry && f.preds(s) == [*b] {
            Some((*b, s))
        } else {
            None
        }
    })
}

pub fn merge_blocks(f: &mut Fundef, ctx: &mut PassContext) -> Result<bool> {
    let mut n = 0;
    while let Some((b, s)) = find(f) {
        log::debug!(
            "merging `{}` into `{}`",
            f.blocks[s].label,
            f.blocks[b].label
        );
        let mut body = std::mem::take(&mut f.blocks[s].body);
        let tail = f.blocks[s].tail.clone();
        let block = &mut f.blocks[b];
        block.body.append(&mut body);
        block.tail = tail;
        f.relink();
        n += 1;
    }

    ctx.stats.add("merge_blocks.merged", n);
    if n > 0 {
        log::info!("merged {n} blocks in `{}`", f.name);
    }
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Config;

    #[test]
    fn call_split_is_undone() {
        let mut g = Function::new("f");
        let x = g.add_var("x", Ty::Int, Scope::Local);
        g.push(Some(x), QuadKind::Call("g".into(), vec![]));
        g.push(None, QuadKind::Print(Arg::Var(x)));
        g.push(None, QuadKind::Label("unused".into()));
        g.push(None, QuadKind::Return(Some(Arg::Var(x))));
        let mut f = build(g).unwrap();
        assert_eq!(f.layout.len(), 3);

        let mut ctx = PassContext::new(Config::default());
        assert!(merge_blocks(&mut f, &mut ctx).unwrap());
        assert_eq!(f.layout, vec![f.entry]);
        assert_eq!(f.blocks[f.entry].body.len(), 2);
        assert_eq!(f.blocks[f.entry].tail, Tail::Return(Some(Arg::Var(x))));
        assert_eq!(ctx.stats.get("merge_blocks.merged"), 2);
    }
}
