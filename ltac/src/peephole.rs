use mtac::Statistics;

use crate::platform::{FLOAT_SCRATCH, FLOAT_SCRATCH2};
use crate::program::{Function, Inst, IntOp, Operand};

// whether the flags left by insts[i] may still be read
fn flags_observed(insts: &[Inst], i: usize) -> bool {
    for inst in &insts[i + 1..] {
        if inst.reads_flags() {
            return true;
        }
        match inst {
            // successor unknown
            Inst::Label(_) | Inst::Jmp(_) => return true,
            Inst::Call(_) | Inst::Ret => return false,
            other if other.writes_flags() => return false,
            _ => (),
        }
    }
    false
}

// the registers `a` is computed from are not written by a move into `b`
fn independent(a: &Operand, b: &Operand) -> bool {
    match b {
        Operand::Reg(r) => !a.reads(*r),
        Operand::Xmm(x) => !a.reads_xmm(*x),
        _ => true,
    }
}

/// A rewrite of `insts[i..i + n]`, as (n, replacement).
fn rewrite(insts: &[Inst], i: usize) -> Option<(usize, Vec<Inst>)> {
    use Inst::*;

    match &insts[i] {
        Mov(d, s) | Movsd(d, s) if d == s => return Some((1, vec![])),
        Int(IntOp::Add | IntOp::Sub, _, Operand::Imm(0)) | Int(IntOp::Imul, _, Operand::Imm(1))
            if !flags_observed(insts, i) =>
        {
            return Some((1, vec![]))
        }
        _ => (),
    }

    let next = insts.get(i + 1)?;
    match (&insts[i], next) {
        (Jmp(l), Label(m)) if l == m => Some((1, vec![])),
        (Jcc(c, l), Jmp(t)) => match insts.get(i + 2) {
            Some(Label(m)) if m == l => Some((2, vec![Jcc(c.negate(), t.clone())])),
            _ => None,
        },
        // store then reload of the same slot
        (Mov(m, Operand::Reg(r)), Mov(Operand::Reg(r2), m2)) if m.is_memory() && m == m2 => {
            if r == r2 {
                Some((2, vec![insts[i].clone()]))
            } else {
                Some((2, vec![insts[i].clone(), Mov(Operand::Reg(*r2), Operand::Reg(*r))]))
            }
        }
        (Movsd(m, Operand::Xmm(r)), Movsd(Operand::Xmm(r2), m2)) if m.is_memory() && m == m2 => {
            if r == r2 {
                Some((2, vec![insts[i].clone()]))
            } else {
                Some((2, vec![insts[i].clone(), Movsd(Operand::Xmm(*r2), Operand::Xmm(*r))]))
            }
        }
        // x = y; y = x
        (Mov(x, y), Mov(y2, x2)) | (Movsd(x, y), Movsd(y2, x2))
            if x == x2 && y == y2 && independent(x, y) && independent(y, x) =>
        {
            Some((2, vec![insts[i].clone()]))
        }
        // first value never read
        (Mov(Operand::Reg(r), _), Mov(Operand::Reg(r2), s)) if r == r2 && !s.reads(*r) => {
            Some((2, vec![next.clone()]))
        }
        (Movsd(Operand::Xmm(r), _), Movsd(Operand::Xmm(r2), s))
            if r == r2 && !s.reads_xmm(*r) =>
        {
            Some((2, vec![next.clone()]))
        }
        (Push(s), Pop(d @ Operand::Reg(_))) if matches!(s, Operand::Reg(_) | Operand::Imm(_)) => {
            if s == d {
                Some((2, vec![]))
            } else {
                Some((2, vec![Mov(d.clone(), s.clone())]))
            }
        }
        // int -> float -> int through a scratch register
        (Cvtsi2sd(x, s), Cvttsd2si(d, Operand::Xmm(x2)))
            if x == x2 && (*x == FLOAT_SCRATCH || *x == FLOAT_SCRATCH2) =>
        {
            Some((2, vec![Mov(Operand::Reg(*d), s.clone())]))
        }
        _ => None,
    }
}

/// Rewrites `f` to a fixpoint and returns the number of rewrites.
pub fn optimize(f: &mut Function, stats: &mut Statistics) -> usize {
    let mut n = 0;
    loop {
        let mut changed = false;
        let mut i = 0;
        while i < f.insts.len() {
            match rewrite(&f.insts, i) {
                Some((len, replacement)) => {
                    log::trace!("{}: peephole at {}: {}", f.name, i, f.insts[i]);
                    f.insts.splice(i..i + len, replacement);
                    n += 1;
                    changed = true;
                }
                None => i += 1,
            }
        }
        if !changed {
            break;
        }
    }
    stats.add("peephole.rewrites", n);
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{Reg, Xmm, SCRATCH};
    use crate::program::Cond;

    fn run(insts: Vec<Inst>) -> Vec<Inst> {
        let mut f = Function {
            name: "f".into(),
            insts,
            frame_size: 0,
            callee_saved: vec![],
        };
        optimize(&mut f, &mut Statistics::new());
        f.insts
    }

    fn reg(r: Reg) -> Operand {
        Operand::Reg(r)
    }

    #[test]
    fn self_moves_vanish() {
        let out = run(vec![
            Inst::Mov(reg(Reg::Rbx), reg(Reg::Rbx)),
            Inst::Movsd(Xmm(1).into(), Xmm(1).into()),
            Inst::Ret,
        ]);
        assert_eq!(out, vec![Inst::Ret]);
    }

    #[test]
    fn reload_reuses_the_stored_register() {
        let slot = Operand::stack(-8);
        let out = run(vec![
            Inst::Mov(slot.clone(), reg(Reg::R10)),
            Inst::Mov(reg(Reg::Rbx), slot.clone()),
            Inst::Ret,
        ]);
        assert_eq!(
            out,
            vec![
                Inst::Mov(slot, reg(Reg::R10)),
                Inst::Mov(reg(Reg::Rbx), reg(Reg::R10)),
                Inst::Ret
            ]
        );
    }

    #[test]
    fn move_back_is_dropped_unless_the_address_moves() {
        let out = run(vec![
            Inst::Mov(reg(Reg::Rbx), reg(Reg::Rcx)),
            Inst::Mov(reg(Reg::Rcx), reg(Reg::Rbx)),
            Inst::Ret,
        ]);
        assert_eq!(out, vec![Inst::Mov(reg(Reg::Rbx), reg(Reg::Rcx)), Inst::Ret]);

        let through = Operand::Mem {
            base: Reg::R10,
            index: None,
            offset: 0,
        };
        let kept = vec![
            Inst::Mov(reg(Reg::R10), through.clone()),
            Inst::Mov(through, reg(Reg::R10)),
            Inst::Ret,
        ];
        assert_eq!(run(kept.clone()), kept);
    }

    #[test]
    fn overwritten_register_loses_its_first_move() {
        let out = run(vec![
            Inst::Mov(reg(SCRATCH), Operand::Imm(1)),
            Inst::Mov(reg(SCRATCH), Operand::stack(-16)),
            Inst::Ret,
        ]);
        assert_eq!(out, vec![Inst::Mov(reg(SCRATCH), Operand::stack(-16)), Inst::Ret]);

        // the second move reads the first
        let kept = vec![
            Inst::Mov(reg(Reg::R11), Operand::stack(-16)),
            Inst::Mov(
                reg(Reg::R11),
                Operand::Mem {
                    base: Reg::R11,
                    index: None,
                    offset: 0,
                },
            ),
            Inst::Ret,
        ];
        assert_eq!(run(kept.clone()), kept);
    }

    #[test]
    fn identities_respect_flag_readers() {
        let out = run(vec![
            Inst::Int(IntOp::Add, reg(Reg::Rbx), Operand::Imm(0)),
            Inst::Int(IntOp::Imul, reg(Reg::Rbx), Operand::Imm(1)),
            Inst::Ret,
        ]);
        assert_eq!(out, vec![Inst::Ret]);

        let kept = vec![
            Inst::Int(IntOp::Sub, reg(Reg::Rbx), Operand::Imm(0)),
            Inst::Jcc(Cond::E, ".f_done".into()),
            Inst::Ret,
            Inst::Label(".f_done".into()),
            Inst::Ret,
        ];
        assert_eq!(run(kept.clone()), kept);
    }

    #[test]
    fn jumps_fall_through() {
        let out = run(vec![
            Inst::Cmp(reg(SCRATCH), Operand::Imm(3)),
            Inst::Jcc(Cond::L, ".f_body".into()),
            Inst::Jmp(".f_exit".into()),
            Inst::Label(".f_body".into()),
            Inst::Jmp(".f_exit".into()),
            Inst::Label(".f_exit".into()),
            Inst::Ret,
        ]);
        assert_eq!(
            out,
            vec![
                Inst::Cmp(reg(SCRATCH), Operand::Imm(3)),
                Inst::Jcc(Cond::Ge, ".f_exit".into()),
                Inst::Label(".f_body".into()),
                Inst::Label(".f_exit".into()),
                Inst::Ret,
            ]
        );
    }

    #[test]
    fn push_pop_and_conversions_become_moves() {
        let out = run(vec![
            Inst::Push(reg(Reg::Rbx)),
            Inst::Pop(reg(Reg::Rcx)),
            Inst::Cvtsi2sd(FLOAT_SCRATCH, Operand::stack(-8)),
            Inst::Cvttsd2si(Reg::Rsi, FLOAT_SCRATCH.into()),
            Inst::Ret,
        ]);
        assert_eq!(
            out,
            vec![
                Inst::Mov(reg(Reg::Rcx), reg(Reg::Rbx)),
                Inst::Mov(reg(Reg::Rsi), Operand::stack(-8)),
                Inst::Ret,
            ]
        );

        // an allocated xmm register keeps its converted value
        let kept = vec![
            Inst::Cvtsi2sd(Xmm(3), reg(Reg::Rbx)),
            Inst::Cvttsd2si(Reg::Rsi, Xmm(3).into()),
            Inst::Ret,
        ];
        assert_eq!(run(kept.clone()), kept);
    }

    #[test]
    fn rewrites_are_counted() {
        let mut f = Function {
            name: "f".into(),
            insts: vec![Inst::Mov(reg(Reg::Rbx), reg(Reg::Rbx)), Inst::Ret],
            frame_size: 0,
            callee_saved: vec![],
        };
        let mut stats = Statistics::new();
        assert_eq!(optimize(&mut f, &mut stats), 1);
        assert_eq!(stats.get("peephole.rewrites"), 1);
    }
}
