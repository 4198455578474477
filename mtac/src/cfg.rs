use id_arena::Arena;
use std::fmt;

use crate::error::{ErrorKind, InternalError, Result};
use crate::program::*;
use util::{Label, Map, Set};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdgeKind {
    Unconditional,
    True,
    False,
    Fallthrough,
}

// the end of a basic block
#[derive(Debug, Clone, PartialEq)]
pub enum Tail {
    Jump(BlockId),
    Fallthrough(BlockId),
    Branch {
        kind: CmpKind,
        lhs: Arg,
        rhs: Arg,
        on_true: BlockId,
        on_false: BlockId,
    },
    Return(Option<Arg>),
}

impl Tail {
    pub fn successors(&self) -> Vec<(BlockId, EdgeKind)> {
        match self {
            Tail::Jump(b) => vec![(*b, EdgeKind::Unconditional)],
            Tail::Fallthrough(b) => vec![(*b, EdgeKind::Fallthrough)],
            Tail::Branch {
                on_true, on_false, ..
            } => vec![(*on_true, EdgeKind::True), (*on_false, EdgeKind::False)],
            Tail::Return(_) => vec![],
        }
    }

    pub fn targets(&self) -> Vec<BlockId> {
        self.successors().into_iter().map(|(b, _)| b).collect()
    }

    pub fn args(&self) -> Vec<&Arg> {
        match self {
            Tail::Branch { lhs, rhs, .. } => vec![lhs, rhs],
            Tail::Return(Some(x)) => vec![x],
            _ => vec![],
        }
    }

    pub fn args_mut(&mut self) -> Vec<&mut Arg> {
        match self {
            Tail::Branch { lhs, rhs, .. } => vec![lhs, rhs],
            Tail::Return(Some(x)) => vec![x],
            _ => vec![],
        }
    }

    pub fn uses(&self) -> Vec<VarId> {
        self.args().into_iter().filter_map(|a| a.var()).collect()
    }

    pub fn substitute(&mut self, from: VarId, to: &Arg) -> bool {
        let mut changed = false;
        for a in self.args_mut() {
            if a.var() == Some(from) {
                *a = to.clone();
                changed = true;
            }
        }
        changed
    }

    // redirects every edge to `from` towards `to`
    pub fn retarget(&mut self, from: BlockId, to: BlockId) -> bool {
        let mut changed = false;
        let mut f = |b: &mut BlockId| {
            if *b == from {
                *b = to;
                changed = true;
            }
        };
        match self {
            Tail::Jump(b) | Tail::Fallthrough(b) => f(b),
            Tail::Branch {
                on_true, on_false, ..
            } => {
                f(on_true);
                f(on_false);
            }
            Tail::Return(_) => (),
        }
        changed
    }

    pub fn map_targets<F: FnMut(BlockId) -> BlockId>(&mut self, mut f: F) {
        match self {
            Tail::Jump(b) | Tail::Fallthrough(b) => *b = f(*b),
            Tail::Branch {
                on_true, on_false, ..
            } => {
                *on_true = f(*on_true);
                *on_false = f(*on_false);
            }
            Tail::Return(_) => (),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub label: Label,
    pub body: Vec<Quadruple>,
    pub tail: Tail,
    pub preds: Vec<BlockId>,
    pub succs: Vec<(BlockId, EdgeKind)>,
}

impl Block {
    pub fn new() -> Self {
        Self::with_label(util::id::gen_uniq_with(".B"))
    }

    pub fn with_label(label: Label) -> Self {
        Self {
            label,
            body: vec![],
            tail: Tail::Return(None),
            preds: vec![],
            succs: vec![],
        }
    }
}

impl Default for Block {
    fn default() -> Self {
        Self::new()
    }
}

pub type BlockId = id_arena::Id<Block>;

/// A function in block form.
#[derive(Debug, Clone)]
pub struct Fundef {
    pub name: Label,
    pub ret: Option<Ty>,
    pub vars: Vec<Variable>,
    pub params: Vec<VarId>,
    pub blocks: Arena<Block>,
    // live blocks, in layout order
    pub layout: Vec<BlockId>,
    pub entry: BlockId,
}

impl Fundef {
    pub fn new_block(&mut self) -> BlockId {
        self.blocks.alloc(Block::new())
    }

    pub fn add_temp(&mut self, ty: Ty) -> VarId {
        let id = VarId(self.vars.len());
        let name = util::id::gen_uniq();
        self.vars.push(Variable::new(&name, ty, Scope::Temporary));
        id
    }

    pub fn var(&self, v: VarId) -> &Variable {
        &self.vars[v.0]
    }

    pub fn preds(&self, b: BlockId) -> &[BlockId] {
        &self.blocks[b].preds
    }

    pub fn succs(&self, b: BlockId) -> Vec<BlockId> {
        self.blocks[b].succs.iter().map(|(s, _)| *s).collect()
    }

    pub fn quad_count(&self) -> usize {
        self.layout.iter().map(|b| self.blocks[*b].body.len()).sum()
    }

    // globals, aggregates and variables whose address is taken
    pub fn memory_resident(&self) -> Set<VarId> {
        let mut r: Set<VarId> = self
            .vars
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_global() || !v.ty.is_scalar())
            .map(|(i, _)| VarId(i))
            .collect();
        r.extend(self.address_taken());
        r
    }

    pub fn address_taken(&self) -> Set<VarId> {
        let mut r = Set::default();
        for bid in &self.layout {
            for q in &self.blocks[*bid].body {
                if let QuadKind::Address(x) = &q.kind {
                    r.insert(*x);
                }
            }
        }
        r
    }

    pub fn globals(&self) -> Vec<VarId> {
        (0..self.vars.len())
            .map(VarId)
            .filter(|v| self.vars[v.0].is_global())
            .collect()
    }

    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited = Set::default();
        let mut order = Vec::with_capacity(self.layout.len());
        // explicit stack: (block, next successor index)
        let mut stack = vec![(self.entry, 0)];
        visited.insert(self.entry);
        while let Some((b, i)) = stack.pop() {
            let succs = self.blocks[b].tail.targets();
            if i < succs.len() {
                stack.push((b, i + 1));
                let s = succs[i];
                if visited.insert(s) {
                    stack.push((s, 0));
                }
            } else {
                order.push(b);
            }
        }
        order
    }

    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        let mut order = self.postorder();
        order.reverse();
        order
    }

    /// Recomputes edge lists from the tails and prunes blocks that are no
    /// longer reachable from the entry.
    pub fn relink(&mut self) {
        let reachable: Set<BlockId> = self.postorder().into_iter().collect();

        let mut layout: Vec<BlockId> = self
            .layout
            .iter()
            .copied()
            .filter(|b| reachable.contains(b))
            .collect();
        let placed: Set<BlockId> = layout.iter().copied().collect();
        for b in self.reverse_postorder() {
            if !placed.contains(&b) {
                layout.push(b);
            }
        }
        for b in self.layout.iter().filter(|b| !reachable.contains(b)) {
            log::debug!("removing unreachable block `{}`", self.blocks[*b].label);
        }
        self.layout = layout;

        for b in &self.layout {
            let block = &mut self.blocks[*b];
            block.preds.clear();
            block.succs = block.tail.successors();
        }
        for b in self.layout.clone() {
            for (s, _) in self.blocks[b].succs.clone() {
                let preds = &mut self.blocks[s].preds;
                if !preds.contains(&b) {
                    preds.push(b);
                }
            }
        }
    }

    /// Back to the flat, label-addressed form.
    pub fn linearize(&self) -> Vec<Quadruple> {
        let mut r = vec![];
        for (i, bid) in self.layout.iter().enumerate() {
            let block = &self.blocks[*bid];
            let next = self.layout.get(i + 1).copied();
            let label = |b: BlockId| self.blocks[b].label.clone();

            r.push(Quadruple::effect(QuadKind::Label(block.label.clone())));
            r.extend(block.body.iter().cloned());
            match &block.tail {
                Tail::Jump(b) | Tail::Fallthrough(b) => {
                    if Some(*b) != next {
                        r.push(Quadruple::effect(QuadKind::Goto(label(*b))));
                    }
                }
                Tail::Branch {
                    kind,
                    lhs,
                    rhs,
                    on_true,
                    on_false,
                } => {
                    if Some(*on_true) == next {
                        r.push(Quadruple::effect(QuadKind::IfFalse(
                            *kind,
                            lhs.clone(),
                            rhs.clone(),
                            label(*on_false),
                        )));
                    } else {
                        r.push(Quadruple::effect(QuadKind::If(
                            *kind,
                            lhs.clone(),
                            rhs.clone(),
                            label(*on_true),
                        )));
                        if Some(*on_false) != next {
                            r.push(Quadruple::effect(QuadKind::Goto(label(*on_false))));
                        }
                    }
                }
                Tail::Return(x) => r.push(Quadruple::effect(QuadKind::Return(x.clone()))),
            }
        }
        r
    }

    pub fn to_function(&self) -> Function {
        Function {
            name: self.name.clone(),
            ret: self.ret.clone(),
            vars: self.vars.clone(),
            params: self.params.clone(),
            quads: self.linearize(),
        }
    }

    pub fn error(&self, pass: &'static str, kind: ErrorKind) -> InternalError {
        InternalError::new(pass, &self.name, kind)
    }
}

impl fmt::Display for Fundef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_function())
    }
}

#[derive(Debug, Clone)]
pub struct Module {
    pub globals: Vec<Global>,
    pub strings: StringPool,
    pub fundefs: Vec<Fundef>,
}

impl Module {
    pub fn fundef(&self, name: &str) -> Option<&Fundef> {
        self.fundefs.iter().find(|f| f.name == name)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for g in &self.globals {
            writeln!(f, "global {}: {}", g.name, g.ty)?;
        }
        for (label, s) in self.strings.iter() {
            writeln!(f, "string {label} = {s:?}")?;
        }
        for fun in &self.fundefs {
            writeln!(f, "{fun}")?;
        }
        Ok(())
    }
}

fn ends_block(q: &Quadruple) -> bool {
    matches!(
        q.kind,
        QuadKind::Goto(_)
            | QuadKind::If(..)
            | QuadKind::IfFalse(..)
            | QuadKind::Return(_)
            | QuadKind::Call(..)
    )
}

/// Partitions the flat quadruple stream into basic blocks.
pub fn build(f: Function) -> Result<Fundef> {
    const PASS: &str = "cfg";
    let err = |kind| InternalError::new(PASS, &f.name, kind);

    // leaders
    let mut starts = vec![0];
    for (i, q) in f.quads.iter().enumerate() {
        if matches!(q.kind, QuadKind::Label(_)) && i != 0 {
            starts.push(i);
        }
        if ends_block(q) && i + 1 < f.quads.len() {
            starts.push(i + 1);
        }
    }
    starts.sort_unstable();
    starts.dedup();

    let mut blocks = Arena::new();
    let mut ids = vec![];
    let mut by_label: Map<Label, BlockId> = Map::default();
    let mut ranges = vec![];
    for (k, start) in starts.iter().enumerate() {
        let end = starts.get(k + 1).copied().unwrap_or(f.quads.len());
        let mut body_start = *start;
        let block = match f.quads.get(*start).map(|q| &q.kind) {
            Some(QuadKind::Label(label)) => {
                body_start += 1;
                Block::with_label(label.clone())
            }
            _ => Block::new(),
        };
        let label = block.label.clone();
        let id = blocks.alloc(block);
        if by_label.insert(label.clone(), id).is_some() {
            return Err(err(ErrorKind::DuplicateLabel(label)));
        }
        ids.push(id);
        ranges.push((body_start, end));
    }

    let resolve = |label: &Label| {
        by_label
            .get(label)
            .copied()
            .ok_or_else(|| err(ErrorKind::UnknownLabel(label.clone())))
    };

    for (k, (start, end)) in ranges.into_iter().enumerate() {
        let id = ids[k];
        let next = ids.get(k + 1).copied();
        let fall = |next: Option<BlockId>| match next {
            Some(n) => Tail::Fallthrough(n),
            None => Tail::Return(None),
        };

        let mut body = vec![];
        let mut tail = None;
        for q in &f.quads[start..end] {
            if tail.is_some() {
                return Err(err(ErrorKind::MisplacedControl(blocks[id].label.clone())));
            }
            match &q.kind {
                QuadKind::Goto(label) => tail = Some(Tail::Jump(resolve(label)?)),
                QuadKind::If(kind, x, y, label) => {
                    tail = Some(Tail::Branch {
                        kind: *kind,
                        lhs: x.clone(),
                        rhs: y.clone(),
                        on_true: resolve(label)?,
                        on_false: match next {
                            Some(n) => n,
                            None => return Err(err(ErrorKind::Malformed(format!(
                                "conditional jump at the end of `{}`",
                                f.name
                            )))),
                        },
                    })
                }
                QuadKind::IfFalse(kind, x, y, label) => {
                    tail = Some(Tail::Branch {
                        kind: *kind,
                        lhs: x.clone(),
                        rhs: y.clone(),
                        on_true: match next {
                            Some(n) => n,
                            None => return Err(err(ErrorKind::Malformed(format!(
                                "conditional jump at the end of `{}`",
                                f.name
                            )))),
                        },
                        on_false: resolve(label)?,
                    })
                }
                QuadKind::Return(x) => tail = Some(Tail::Return(x.clone())),
                QuadKind::Label(_) => {
                    return Err(err(ErrorKind::MisplacedControl(blocks[id].label.clone())))
                }
                _ => body.push(q.clone()),
            }
        }

        let block = &mut blocks[id];
        block.body = body;
        block.tail = tail.unwrap_or_else(|| fall(next));
    }

    let entry = match ids.first() {
        Some(e) => *e,
        None => blocks.alloc(Block::new()),
    };
    let layout = if ids.is_empty() { vec![entry] } else { ids };

    let mut fundef = Fundef {
        name: f.name,
        ret: f.ret,
        vars: f.vars,
        params: f.params,
        blocks,
        layout,
        entry,
    };
    fundef.relink();

    log::debug!(
        "built {} blocks for `{}`",
        fundef.layout.len(),
        fundef.name
    );

    Ok(fundef)
}

pub fn build_module(p: Program) -> Result<Module> {
    let fundefs = p
        .functions
        .into_iter()
        .map(build)
        .collect::<Result<Vec<_>>>()?;

    Ok(Module {
        globals: p.globals,
        strings: StringPool::from(p.strings),
        fundefs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(l: &str) -> QuadKind {
        QuadKind::Label(l.to_string())
    }

    // if (a < 10) x = 1 else x = 2; return x
    fn diamond() -> Function {
        let mut f = Function::new("diamond");
        let a = f.add_var("a", Ty::Int, Scope::Param);
        let x = f.add_var("x", Ty::Int, Scope::Local);
        f.push(
            None,
            QuadKind::IfFalse(CmpKind::Lt, Arg::Var(a), Arg::int(10), "else".into()),
        );
        f.push(Some(x), QuadKind::Assign(Arg::int(1)));
        f.push(None, QuadKind::Goto("end".into()));
        f.push(None, label("else"));
        f.push(Some(x), QuadKind::Assign(Arg::int(2)));
        f.push(None, label("end"));
        f.push(None, QuadKind::Return(Some(Arg::Var(x))));
        f
    }

    #[test]
    fn diamond_blocks() {
        let g = build(diamond()).unwrap();
        assert_eq!(g.layout.len(), 4);

        let entry = &g.blocks[g.entry];
        assert_eq!(entry.succs.len(), 2);
        assert_eq!(entry.succs[0].1, EdgeKind::True);
        assert_eq!(entry.succs[1].1, EdgeKind::False);

        let end = g.layout[3];
        assert_eq!(g.blocks[end].label, "end");
        assert_eq!(g.preds(end).len(), 2);
    }

    #[test]
    fn quads_kept_in_order() {
        let f = diamond();
        let g = build(f.clone()).unwrap();

        let strip = |qs: &[Quadruple]| -> Vec<Quadruple> {
            qs.iter().filter(|q| !q.is_control()).cloned().collect()
        };
        assert_eq!(strip(&f.quads), strip(&g.linearize()));
    }

    #[test]
    fn unreachable_blocks_are_pruned() {
        let mut f = Function::new("dead");
        let x = f.add_var("x", Ty::Int, Scope::Local);
        f.push(None, QuadKind::Return(None));
        f.push(Some(x), QuadKind::Assign(Arg::int(1)));
        f.push(None, label("orphan"));
        f.push(Some(x), QuadKind::Assign(Arg::int(2)));

        let g = build(f).unwrap();
        assert_eq!(g.layout, vec![g.entry]);
        assert!(g.blocks[g.entry].preds.is_empty());
    }

    #[test]
    fn call_ends_block() {
        let mut f = Function::new("calls");
        let x = f.add_var("x", Ty::Int, Scope::Local);
        f.push(Some(x), QuadKind::Call("g".into(), vec![]));
        f.push(None, QuadKind::Print(Arg::Var(x)));

        let g = build(f).unwrap();
        assert_eq!(g.layout.len(), 2);
        assert!(matches!(g.blocks[g.entry].tail, Tail::Fallthrough(_)));
    }

    #[test]
    fn unknown_label_is_internal_error() {
        let mut f = Function::new("bad");
        f.push(None, QuadKind::Goto("nowhere".into()));
        let e = build(f).unwrap_err();
        assert_eq!(e.kind, ErrorKind::UnknownLabel("nowhere".into()));
        assert_eq!(e.pass, "cfg");
    }
}
