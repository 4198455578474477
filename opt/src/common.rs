use mtac::*;
use util::{Map, Set};

// number of definitions of each variable inside `blocks`
pub fn count_defs<'a, I>(f: &Fundef, blocks: I) -> Map<VarId, usize>
where
    I: IntoIterator<Item = &'a BlockId>,
{
    let mut r = Map::default();
    for b in blocks {
        for q in &f.blocks[*b].body {
            if let Some(v) = q.def() {
                *r.entry(v).or_default() += 1;
            }
        }
    }
    r
}

pub fn loop_quads(f: &Fundef, l: &Loop) -> usize {
    l.blocks.iter().map(|b| f.blocks[*b].body.len() + 1).sum()
}

/// Gives `l` a block that is the only way into its header from outside.
/// The CFG must be relinked afterwards.
pub fn insert_preheader(f: &mut Fundef, l: &Loop) -> BlockId {
    let header = l.header;
    let outside: Vec<BlockId> = f
        .preds(header)
        .iter()
        .copied()
        .filter(|p| !l.contains(*p))
        .collect();

    let pre = f.new_block();
    f.blocks[pre].tail = Tail::Jump(header);
    for p in outside {
        f.blocks[p].tail.retarget(header, pre);
    }
    if f.entry == header {
        f.entry = pre;
    }

    let pos = f.layout.iter().position(|b| *b == header).unwrap_or(0);
    f.layout.insert(pos, pre);

    log::debug!(
        "inserted preheader `{}` before `{}`",
        f.blocks[pre].label,
        f.blocks[header].label
    );
    pre
}

/// Copies `blocks`; edges between copied blocks are redirected to the
/// copies, edges leaving the set are kept. Copies are laid out after the
/// last original block.
pub fn clone_blocks(f: &mut Fundef, blocks: &[BlockId]) -> Map<BlockId, BlockId> {
    let mut map = Map::default();
    for b in blocks {
        let mut copy = Block::new();
        copy.body = f.blocks[*b].body.clone();
        copy.tail = f.blocks[*b].tail.clone();
        map.insert(*b, f.blocks.alloc(copy));
    }
    for b in blocks {
        let c = map[b];
        f.blocks[c]
            .tail
            .map_targets(|t| map.get(&t).copied().unwrap_or(t));
    }

    let set: Set<BlockId> = blocks.iter().copied().collect();
    let pos = f
        .layout
        .iter()
        .rposition(|b| set.contains(b))
        .map(|p| p + 1)
        .unwrap_or(f.layout.len());
    let copies: Vec<BlockId> = blocks.iter().map(|b| map[b]).collect();
    f.layout.splice(pos..pos, copies);
    map
}
