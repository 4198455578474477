//! Generic iterative dataflow solver.
//!
//! A problem supplies its lattice value, the meet operator, a transfer
//! function per quadruple and per block tail, and a direction. The solver
//! sweeps the blocks (reverse postorder forward, postorder backward) until
//! no IN/OUT value changes.

mod const_prop;
mod liveness;

pub use const_prop::{eval_arg, lookup, ConstMap, ConstState, ConstantPropagation};
pub use liveness::{LiveSet, Liveness};

use std::fmt;

use crate::cfg::{BlockId, Fundef, Tail};
use crate::error::{ErrorKind, Result};
use crate::program::Quadruple;
use util::Map;

/// Every lattice used here has finite height; hitting this bound means a
/// transfer function is not monotone.
pub const SWEEP_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

pub trait Problem {
    type Value: Clone + PartialEq + fmt::Debug;

    const DIRECTION: Direction;
    const NAME: &'static str;

    /// Value flowing into the entry block (forward) or out of returning blocks (backward).
    fn boundary(&self, f: &Fundef) -> Self::Value;

    /// Starting value of every other block; the identity of `meet`.
    fn init(&self, f: &Fundef) -> Self::Value;

    fn meet(&self, a: &Self::Value, b: &Self::Value) -> Self::Value;

    fn transfer(&self, q: &Quadruple, value: &mut Self::Value);

    fn transfer_tail(&self, t: &Tail, value: &mut Self::Value);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution<V> {
    ins: Map<BlockId, V>,
    outs: Map<BlockId, V>,
    pub sweeps: usize,
}

impl<V: Clone> Solution<V> {
    pub fn block_in(&self, b: BlockId) -> &V {
        &self.ins[&b]
    }

    pub fn block_out(&self, b: BlockId) -> &V {
        &self.outs[&b]
    }

    /// Values at each program point of `b`: index `i < body.len()` is the
    /// point of the i-th quadruple and `body.len()` the point of the tail.
    /// Forward problems give the value before the point, backward problems
    /// the value after it.
    pub fn points<P: Problem<Value = V>>(&self, p: &P, f: &Fundef, b: BlockId) -> Vec<V> {
        let block = &f.blocks[b];
        let mut r = Vec::with_capacity(block.body.len() + 1);
        match P::DIRECTION {
            Direction::Forward => {
                let mut v = self.ins[&b].clone();
                for q in &block.body {
                    r.push(v.clone());
                    p.transfer(q, &mut v);
                }
                r.push(v);
            }
            Direction::Backward => {
                let mut v = self.outs[&b].clone();
                r.push(v.clone());
                p.transfer_tail(&block.tail, &mut v);
                for q in block.body.iter().rev() {
                    r.push(v.clone());
                    p.transfer(q, &mut v);
                }
                r.reverse();
            }
        }
        r
    }
}

fn through_block<P: Problem>(p: &P, f: &Fundef, b: BlockId, mut v: P::Value) -> P::Value {
    let block = &f.blocks[b];
    match P::DIRECTION {
        Direction::Forward => {
            for q in &block.body {
                p.transfer(q, &mut v);
            }
            p.transfer_tail(&block.tail, &mut v);
        }
        Direction::Backward => {
            p.transfer_tail(&block.tail, &mut v);
            for q in block.body.iter().rev() {
                p.transfer(q, &mut v);
            }
        }
    }
    v
}

pub fn solve<P: Problem>(p: &P, f: &Fundef) -> Result<Solution<P::Value>> {
    let order = match P::DIRECTION {
        Direction::Forward => f.reverse_postorder(),
        Direction::Backward => f.postorder(),
    };

    let init = p.init(f);
    let boundary = p.boundary(f);
    let mut ins: Map<BlockId, P::Value> = order.iter().map(|b| (*b, init.clone())).collect();
    let mut outs: Map<BlockId, P::Value> = order.iter().map(|b| (*b, init.clone())).collect();

    let mut sweeps = 0;
    loop {
        let mut changed = false;
        for b in &order {
            let b = *b;
            match P::DIRECTION {
                Direction::Forward => {
                    let mut v = if b == f.entry {
                        boundary.clone()
                    } else {
                        init.clone()
                    };
                    for pred in f.preds(b) {
                        v = p.meet(&v, &outs[pred]);
                    }
                    let out = through_block(p, f, b, v.clone());
                    if out != outs[&b] {
                        outs.insert(b, out);
                        changed = true;
                    }
                    ins.insert(b, v);
                }
                Direction::Backward => {
                    let mut v = if matches!(f.blocks[b].tail, Tail::Return(_)) {
                        boundary.clone()
                    } else {
                        init.clone()
                    };
                    for (succ, _) in &f.blocks[b].succs {
                        v = p.meet(&v, &ins[succ]);
                    }
                    let inv = through_block(p, f, b, v.clone());
                    if inv != ins[&b] {
                        ins.insert(b, inv);
                        changed = true;
                    }
                    outs.insert(b, v);
                }
            }
        }

        sweeps += 1;
        if !changed {
            break;
        }
        if sweeps > SWEEP_LIMIT {
            return Err(f.error(P::NAME, ErrorKind::Diverged(sweeps)));
        }
    }

    log::debug!("{} on `{}` converged after {} sweeps", P::NAME, f.name, sweeps);

    Ok(Solution { ins, outs, sweeps })
}
