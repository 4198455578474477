use mtac::dataflow::{LiveSet, Liveness, Solution};
use mtac::{
    Arg, BinOpKind, BlockId, CmpKind, Const, ErrorKind, Fundef, QuadKind, Quadruple, Result,
    Tail, Ty, UnOpKind, VarId,
};
use util::Label;

use crate::platform::*;
use crate::pool::FloatPool;
use crate::program::{Cond, FloatOp, Function, Inst, IntOp, Operand};
use crate::regalloc::{Allocation, Location};

const PASS: &str = "lower";

struct Lowering<'a> {
    f: &'a Fundef,
    alloc: &'a Allocation,
    pool: &'a FloatPool,
    insts: Vec<Inst>,
}

/// Lowers an allocated function to x86-64, cdecl-like: arguments pushed
/// right to left, caller cleans up, result in rax or xmm0.
pub fn lower(
    f: &Fundef,
    alloc: &Allocation,
    live: &Solution<LiveSet>,
    pool: &FloatPool,
) -> Result<Function> {
    let mut l = Lowering {
        f,
        alloc,
        pool,
        insts: vec![],
    };
    let problem = Liveness::new(f);

    l.prologue();
    if f.layout.first() != Some(&f.entry) {
        l.emit(Inst::Jmp(l.block_label(f.entry)));
    }
    for b in &f.layout {
        l.emit(Inst::Label(l.block_label(*b)));
        let points = live.points(&problem, f, *b);
        for (q, after) in f.blocks[*b].body.iter().zip(&points) {
            l.quad(q, after)?;
        }
        l.tail(*b)?;
    }

    Ok(Function {
        name: f.name.clone(),
        insts: l.insts,
        frame_size: alloc.frame_size,
        callee_saved: alloc.callee_saved.clone(),
    })
}

impl<'a> Lowering<'a> {
    fn emit(&mut self, i: Inst) {
        self.insts.push(i)
    }

    fn block_label(&self, b: BlockId) -> Label {
        let label = &self.f.blocks[b].label;
        format!(".{}_{}", self.f.name, label.trim_start_matches('.'))
    }

    fn malformed(&self, what: &str) -> mtac::InternalError {
        self.f.error(PASS, ErrorKind::Malformed(what.to_string()))
    }

    fn loc(&self, v: VarId) -> Operand {
        match self.alloc.location(v) {
            Location::Reg(r) => Operand::Reg(*r),
            Location::Xmm(x) => Operand::Xmm(*x),
            Location::Stack(off) => Operand::stack(*off),
            Location::Global(l) => Operand::global(l),
        }
    }

    fn is_float(&self, a: &Arg) -> bool {
        match a {
            Arg::Var(v) => self.f.var(*v).ty.is_float(),
            Arg::Const(Const::Float(_)) => true,
            _ => false,
        }
    }

    // string addresses are materialized in SCRATCH2
    fn operand(&mut self, a: &Arg) -> Operand {
        match a {
            Arg::Var(v) => self.loc(*v),
            Arg::Const(Const::Int(i)) => Operand::Imm(*i as i64),
            Arg::Const(Const::Float(x)) => Operand::global(&self.pool.intern(*x)),
            Arg::Str(l) => {
                self.emit(Inst::Lea(SCRATCH2, Operand::global(l)));
                Operand::Reg(SCRATCH2)
            }
        }
    }

    fn mov(&mut self, dst: Operand, src: Operand) {
        if dst.is_memory() && src.is_memory() {
            self.emit(Inst::Mov(SCRATCH.into(), src));
            self.emit(Inst::Mov(dst, SCRATCH.into()));
        } else {
            self.emit(Inst::Mov(dst, src));
        }
    }

    fn movsd(&mut self, dst: Operand, src: Operand) {
        if dst.is_memory() && src.is_memory() {
            self.emit(Inst::Movsd(FLOAT_SCRATCH.into(), src));
            self.emit(Inst::Movsd(dst, FLOAT_SCRATCH.into()));
        } else {
            self.emit(Inst::Movsd(dst, src));
        }
    }

    fn assign(&mut self, float: bool, dst: Operand, src: Operand) {
        if float {
            self.movsd(dst, src)
        } else {
            self.mov(dst, src)
        }
    }

    fn prologue(&mut self) {
        self.emit(Inst::Label(self.f.name.clone()));
        self.emit(Inst::Push(Reg::Rbp.into()));
        self.emit(Inst::Mov(Reg::Rbp.into(), Reg::Rsp.into()));
        if self.alloc.frame_size > 0 {
            self.emit(Inst::Int(
                IntOp::Sub,
                Reg::Rsp.into(),
                Operand::Imm(self.alloc.frame_size as i64),
            ));
        }
        for r in &self.alloc.callee_saved {
            self.insts.push(Inst::Push(Operand::Reg(*r)));
        }
        let f = self.f;
        for (k, p) in f.params.iter().enumerate() {
            let dst = self.loc(*p);
            if matches!(dst, Operand::Reg(_) | Operand::Xmm(_)) {
                let float = f.var(*p).ty.is_float();
                self.assign(float, dst, Operand::stack(ARGS_OFFSET + SLOT * k as i32));
            }
        }
    }

    fn epilogue(&mut self) {
        for r in self.alloc.callee_saved.iter().rev() {
            self.insts.push(Inst::Pop(Operand::Reg(*r)));
        }
        self.emit(Inst::Mov(Reg::Rsp.into(), Reg::Rbp.into()));
        self.emit(Inst::Pop(Reg::Rbp.into()));
        self.emit(Inst::Ret);
    }

    fn quad(&mut self, q: &Quadruple, after: &LiveSet) -> Result<()> {
        if q.is_control() {
            return Err(self.malformed("control quadruple inside a block"));
        }
        let dst = q.result.map(|r| self.loc(r));
        let dst_float = q.result.map_or(false, |r| self.f.var(r).ty.is_float());

        match (&q.kind, dst) {
            (QuadKind::Nop, _) => (),
            (QuadKind::Assign(x), Some(dst)) => {
                let src = self.operand(x);
                self.assign(dst_float, dst, src);
            }
            (QuadKind::BinOp(op, x, y), Some(dst)) => {
                if dst_float {
                    self.float_binop(*op, dst, x, y)?
                } else {
                    self.int_binop(*op, dst, x, y)
                }
            }
            (QuadKind::UnOp(op, x), Some(dst)) => self.unop(*op, dst, x),
            (QuadKind::Cmp(kind, x, y), Some(dst)) => {
                let (c, unordered) = self.compare(*kind, x, y);
                self.emit(Inst::Set(c, SCRATCH));
                match unordered {
                    Some(true) => {
                        self.emit(Inst::Set(Cond::P, SCRATCH2));
                        self.emit(Inst::Int(IntOp::Or, SCRATCH.into(), SCRATCH2.into()));
                    }
                    Some(false) => {
                        self.emit(Inst::Set(Cond::Np, SCRATCH2));
                        self.emit(Inst::Int(IntOp::And, SCRATCH.into(), SCRATCH2.into()));
                    }
                    None => (),
                }
                self.mov(dst, SCRATCH.into());
            }
            (QuadKind::Load(base, index), Some(dst)) => {
                let e = self.element(*base, index);
                self.assign(dst_float, dst, e);
            }
            (QuadKind::Store(base, index, x), _) => {
                let (float, value) = self.stage(x);
                let e = self.element(*base, index);
                self.assign(float, e, value);
            }
            (QuadKind::Address(x), Some(dst)) => {
                let m = self.loc(*x);
                if !m.is_memory() {
                    return Err(self.malformed("address of a register"));
                }
                match dst {
                    Operand::Reg(r) => self.emit(Inst::Lea(r, m)),
                    dst => {
                        self.emit(Inst::Lea(SCRATCH, m));
                        self.mov(dst, SCRATCH.into());
                    }
                }
            }
            (QuadKind::Deref(p), Some(dst)) => {
                let p = self.loc(*p);
                self.mov(SCRATCH2.into(), p);
                self.assign(dst_float, dst, Operand::Mem {
                    base: SCRATCH2,
                    index: None,
                    offset: 0,
                });
            }
            (QuadKind::DerefStore(p, x), _) => {
                let (float, value) = self.stage(x);
                let p = self.loc(*p);
                self.mov(SCRATCH2.into(), p);
                let m = Operand::Mem {
                    base: SCRATCH2,
                    index: None,
                    offset: 0,
                };
                self.assign(float, m, value);
            }
            (QuadKind::Call(name, args), _) => self.call(name, args, q.result, after),
            (QuadKind::Print(x), _) => {
                let routine = match x {
                    Arg::Str(_) => PRINT_STRING,
                    Arg::Var(v) if self.f.var(*v).ty == Ty::Str => PRINT_STRING,
                    x if self.is_float(x) => PRINT_FLOAT,
                    _ => PRINT_INT,
                };
                self.call(routine, std::slice::from_ref(x), None, after);
            }
            (QuadKind::PrintLine, _) => self.call(PRINT_LINE, &[], None, after),
            (QuadKind::Read, _) => self.call(READ_INT, &[], q.result, after),
            (_, None) => return Err(self.malformed("value-producing quadruple without a result")),
            _ => return Err(self.malformed("control quadruple inside a block")),
        }
        Ok(())
    }

    // moves a stored value out of the way of the address registers
    fn stage(&mut self, x: &Arg) -> (bool, Operand) {
        let float = self.is_float(x);
        let src = self.operand(x);
        if float {
            self.movsd(FLOAT_SCRATCH2.into(), src);
            (true, FLOAT_SCRATCH2.into())
        } else {
            self.mov(RETURN.into(), src);
            (false, RETURN.into())
        }
    }

    // address of base[index]; may clobber SCRATCH and SCRATCH2
    fn element(&mut self, base: VarId, index: &Arg) -> Operand {
        let constant = match index {
            Arg::Const(Const::Int(i)) => Some(SLOT.saturating_mul(*i)),
            _ => None,
        };
        if let Ty::Pointer(_) = self.f.var(base).ty {
            let p = self.loc(base);
            self.mov(SCRATCH2.into(), p);
        } else {
            match (self.loc(base), constant) {
                (
                    Operand::Mem {
                        base: b,
                        index: None,
                        offset,
                    },
                    Some(c),
                ) => {
                    return Operand::Mem {
                        base: b,
                        index: None,
                        offset: offset.saturating_add(c),
                    }
                }
                (Operand::Global(l, offset), Some(c)) => {
                    return Operand::Global(l, offset.saturating_add(c))
                }
                (m, _) => self.emit(Inst::Lea(SCRATCH2, m)),
            }
        }
        match constant {
            Some(c) => Operand::Mem {
                base: SCRATCH2,
                index: None,
                offset: c,
            },
            None => {
                let i = self.operand(index);
                self.mov(SCRATCH.into(), i);
                Operand::Mem {
                    base: SCRATCH2,
                    index: Some(SCRATCH),
                    offset: 0,
                }
            }
        }
    }

    fn int_binop(&mut self, op: BinOpKind, dst: Operand, x: &Arg, y: &Arg) {
        let op = match op {
            BinOpKind::Add => IntOp::Add,
            BinOpKind::Sub => IntOp::Sub,
            BinOpKind::Mul => IntOp::Imul,
            BinOpKind::Div | BinOpKind::Mod => {
                let x = self.operand(x);
                self.mov(RETURN.into(), x);
                self.emit(Inst::Cqo);
                let y = match self.operand(y) {
                    Operand::Imm(i) => {
                        self.emit(Inst::Mov(SCRATCH.into(), Operand::Imm(i)));
                        SCRATCH.into()
                    }
                    y => y,
                };
                self.emit(Inst::Idiv(y));
                let r = if op == BinOpKind::Div { RETURN } else { Reg::Rdx };
                // MIN / -1
                self.emit(Inst::Movsxd(r));
                self.mov(dst, r.into());
                return;
            }
        };
        let y = self.operand(y);
        let work = match dst {
            Operand::Reg(r) if !y.reads(r) => r,
            _ => SCRATCH,
        };
        let x = self.operand(x);
        self.mov(work.into(), x);
        self.emit(Inst::Int(op, work.into(), y));
        // ints wrap at 32 bits
        self.emit(Inst::Movsxd(work));
        if dst != Operand::Reg(work) {
            self.mov(dst, work.into());
        }
    }

    fn float_binop(&mut self, op: BinOpKind, dst: Operand, x: &Arg, y: &Arg) -> Result<()> {
        let op = match op {
            BinOpKind::Add => FloatOp::Addsd,
            BinOpKind::Sub => FloatOp::Subsd,
            BinOpKind::Mul => FloatOp::Mulsd,
            BinOpKind::Div => FloatOp::Divsd,
            BinOpKind::Mod => return Err(self.malformed("remainder of floats")),
        };
        let y = self.operand(y);
        let work = match dst {
            Operand::Xmm(r) if !y.reads_xmm(r) => r,
            _ => FLOAT_SCRATCH,
        };
        let x = self.operand(x);
        self.movsd(work.into(), x);
        self.emit(Inst::Float(op, work, y));
        if dst != Operand::Xmm(work) {
            self.movsd(dst, work.into());
        }
        Ok(())
    }

    fn unop(&mut self, op: UnOpKind, dst: Operand, x: &Arg) {
        match op {
            UnOpKind::Neg if self.is_float(x) => {
                let zero = Operand::global(&self.pool.intern(0.0));
                let x = self.operand(x);
                self.emit(Inst::Movsd(FLOAT_SCRATCH.into(), zero));
                self.emit(Inst::Float(FloatOp::Subsd, FLOAT_SCRATCH, x));
                self.movsd(dst, FLOAT_SCRATCH.into());
            }
            UnOpKind::Neg => {
                let x = self.operand(x);
                let work = match dst {
                    Operand::Reg(r) => r,
                    _ => SCRATCH,
                };
                self.mov(work.into(), x);
                self.emit(Inst::Neg(work.into()));
                self.emit(Inst::Movsxd(work));
                if dst != Operand::Reg(work) {
                    self.mov(dst, work.into());
                }
            }
            UnOpKind::Not => {
                let x = self.operand(x);
                self.mov(SCRATCH.into(), x);
                self.emit(Inst::Cmp(SCRATCH.into(), Operand::Imm(0)));
                self.emit(Inst::Set(Cond::E, SCRATCH));
                self.mov(dst, SCRATCH.into());
            }
            UnOpKind::IntToFloat => {
                let src = match self.operand(x) {
                    Operand::Imm(i) => {
                        self.emit(Inst::Mov(SCRATCH.into(), Operand::Imm(i)));
                        SCRATCH.into()
                    }
                    src => src,
                };
                let work = match dst {
                    Operand::Xmm(r) => r,
                    _ => FLOAT_SCRATCH,
                };
                self.emit(Inst::Cvtsi2sd(work, src));
                if dst != Operand::Xmm(work) {
                    self.movsd(dst, work.into());
                }
            }
            UnOpKind::FloatToInt => {
                let src = self.operand(x);
                let work = match dst {
                    Operand::Reg(r) => r,
                    _ => SCRATCH,
                };
                self.emit(Inst::Cvttsd2si(work, src));
                if dst != Operand::Reg(work) {
                    self.mov(dst, work.into());
                }
            }
        }
    }

    // sets the flags for `x kind y`; the second part is the result for
    // unordered floats when the condition alone does not give it
    fn compare(&mut self, kind: CmpKind, x: &Arg, y: &Arg) -> (Cond, Option<bool>) {
        if !(self.is_float(x) || self.is_float(y)) {
            let x = self.operand(x);
            self.mov(SCRATCH.into(), x);
            let y = self.operand(y);
            self.emit(Inst::Cmp(SCRATCH.into(), y));
            return (Cond::of(kind, false), None);
        }
        // `a` and `ae` are false on NaN, `b` and `be` are not
        let (x, y) = match kind {
            CmpKind::Lt | CmpKind::Le => (y, x),
            _ => (x, y),
        };
        let x = self.operand(x);
        self.movsd(FLOAT_SCRATCH.into(), x);
        let y = self.operand(y);
        self.emit(Inst::Ucomisd(FLOAT_SCRATCH, y));
        let unordered = match kind {
            CmpKind::Eq => Some(false),
            CmpKind::Ne => Some(true),
            _ => None,
        };
        (Cond::of(kind, true), unordered)
    }

    fn call(&mut self, name: &str, args: &[Arg], result: Option<VarId>, after: &LiveSet) {
        let mut saved: Vec<VarId> = after
            .iter()
            .copied()
            .filter(|v| Some(*v) != result)
            .filter(|v| match self.alloc.location(*v) {
                Location::Reg(r) => !r.is_callee_saved(),
                Location::Xmm(_) => true,
                _ => false,
            })
            .collect();
        saved.sort();

        for v in &saved {
            match self.loc(*v) {
                Operand::Xmm(x) => self.push_xmm(x),
                o => self.emit(Inst::Push(o)),
            }
        }
        let pad = (saved.len() + args.len()) % 2 == 1;
        if pad {
            self.emit(Inst::Int(IntOp::Sub, Reg::Rsp.into(), Operand::Imm(SLOT as i64)));
        }
        for a in args.iter().rev() {
            if self.is_float(a) {
                let x = match self.operand(a) {
                    Operand::Xmm(x) => x,
                    m => {
                        self.emit(Inst::Movsd(FLOAT_SCRATCH.into(), m));
                        FLOAT_SCRATCH
                    }
                };
                self.push_xmm(x);
            } else {
                let o = self.operand(a);
                self.emit(Inst::Push(o));
            }
        }

        self.emit(Inst::Call(name.to_string()));

        let cleanup = SLOT as i64 * (args.len() as i64 + pad as i64);
        if cleanup > 0 {
            self.emit(Inst::Int(IntOp::Add, Reg::Rsp.into(), Operand::Imm(cleanup)));
        }
        for v in saved.iter().rev() {
            match self.loc(*v) {
                Operand::Xmm(x) => {
                    self.emit(Inst::Movsd(x.into(), top_of_stack()));
                    self.emit(Inst::Int(IntOp::Add, Reg::Rsp.into(), Operand::Imm(SLOT as i64)));
                }
                o => self.emit(Inst::Pop(o)),
            }
        }
        if let Some(r) = result {
            let dst = self.loc(r);
            if self.f.var(r).ty.is_float() {
                self.movsd(dst, FLOAT_RETURN.into());
            } else {
                self.mov(dst, RETURN.into());
            }
        }
    }

    fn push_xmm(&mut self, x: Xmm) {
        self.emit(Inst::Int(IntOp::Sub, Reg::Rsp.into(), Operand::Imm(SLOT as i64)));
        self.emit(Inst::Movsd(top_of_stack(), x.into()));
    }

    fn tail(&mut self, b: BlockId) -> Result<()> {
        let f = self.f;
        match &f.blocks[b].tail {
            Tail::Jump(t) | Tail::Fallthrough(t) => self.emit(Inst::Jmp(self.block_label(*t))),
            Tail::Branch {
                kind,
                lhs,
                rhs,
                on_true,
                on_false,
            } => {
                let (c, unordered) = self.compare(*kind, lhs, rhs);
                if let Some(nan) = unordered {
                    let t = if nan { on_true } else { on_false };
                    self.emit(Inst::Jcc(Cond::P, self.block_label(*t)));
                }
                self.emit(Inst::Jcc(c, self.block_label(*on_true)));
                self.emit(Inst::Jmp(self.block_label(*on_false)));
            }
            Tail::Return(x) => {
                if let Some(x) = x {
                    let float = self.is_float(x);
                    let src = self.operand(x);
                    if float {
                        self.movsd(FLOAT_RETURN.into(), src);
                    } else {
                        self.mov(RETURN.into(), src);
                    }
                }
                self.epilogue();
            }
        }
        Ok(())
    }
}

fn top_of_stack() -> Operand {
    Operand::Mem {
        base: Reg::Rsp,
        index: None,
        offset: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regalloc::allocate;
    use mtac::dataflow::solve;
    use mtac::{build, Dominators, Loops, Scope};

    fn lowered(f: &Fundef) -> (Function, Allocation) {
        let live = solve(&Liveness::new(f), f).unwrap();
        let dom = Dominators::compute(f).unwrap();
        let loops = Loops::detect(f, &dom);
        let alloc = allocate(f, &live, &loops).unwrap();
        let pool = FloatPool::new();
        (lower(f, &alloc, &live, &pool).unwrap(), alloc)
    }

    // bytes pushed since the call into the function, checked at every call
    fn assert_aligned_calls(func: &Function) {
        let mut depth = SLOT as i64;
        let mut calls = 0;
        for i in &func.insts {
            match i {
                Inst::Push(_) => depth += SLOT as i64,
                Inst::Pop(Operand::Reg(Reg::Rbp)) => depth = SLOT as i64,
                Inst::Pop(_) => depth -= SLOT as i64,
                Inst::Int(IntOp::Sub, Operand::Reg(Reg::Rsp), Operand::Imm(k)) => depth += k,
                Inst::Int(IntOp::Add, Operand::Reg(Reg::Rsp), Operand::Imm(k)) => depth -= k,
                Inst::Mov(Operand::Reg(Reg::Rsp), Operand::Reg(Reg::Rbp)) => depth = 2 * SLOT as i64,
                Inst::Call(_) => {
                    assert_eq!(depth % STACK_ALIGN as i64, 0, "misaligned call in {func}");
                    calls += 1;
                }
                _ => (),
            }
        }
        assert!(calls > 0);
    }

    #[test]
    fn parameters_come_from_the_caller_frame() {
        let mut g = mtac::Function::new("add");
        let a = g.add_var("a", Ty::Int, Scope::Param);
        let b = g.add_var("b", Ty::Int, Scope::Param);
        let c = g.add_var("c", Ty::Int, Scope::Local);
        g.push(Some(c), QuadKind::BinOp(BinOpKind::Add, Arg::Var(a), Arg::Var(b)));
        g.push(None, QuadKind::Return(Some(Arg::Var(c))));
        let f = build(g).unwrap();
        let (func, alloc) = lowered(&f);

        assert_eq!(func.insts[0], Inst::Label("add".into()));
        assert_eq!(func.insts[1], Inst::Push(Reg::Rbp.into()));
        let Location::Reg(ra) = alloc.location(a).clone() else {
            panic!("`a` is not in a register")
        };
        assert!(func
            .insts
            .contains(&Inst::Mov(ra.into(), Operand::stack(ARGS_OFFSET))));
        assert!(func.insts.contains(&Inst::Mov(RETURN.into(), alloc_operand(&alloc, c))));
        assert_eq!(func.insts.last(), Some(&Inst::Ret));
    }

    #[test]
    fn unread_parameter_keeps_its_own_register() {
        // first(a, b) = a
        let mut g = mtac::Function::new("first");
        let a = g.add_var("a", Ty::Int, Scope::Param);
        let b = g.add_var("b", Ty::Int, Scope::Param);
        g.push(None, QuadKind::Return(Some(Arg::Var(a))));
        let f = build(g).unwrap();
        let (func, alloc) = lowered(&f);

        assert_ne!(alloc.location(a), alloc.location(b));
        let ra = alloc_operand(&alloc, a);
        let last_write = func
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::Mov(d, _) if *d == ra))
            .last();
        assert_eq!(last_write, Some(&Inst::Mov(ra.clone(), Operand::stack(ARGS_OFFSET))));
        assert!(func.insts.contains(&Inst::Mov(RETURN.into(), ra)));
    }

    #[test]
    fn integer_arithmetic_wraps_like_folding() {
        let mut g = mtac::Function::new("inc");
        let x = g.add_var("x", Ty::Int, Scope::Param);
        let y = g.add_var("y", Ty::Int, Scope::Local);
        let z = g.add_var("z", Ty::Int, Scope::Local);
        g.push(Some(y), QuadKind::BinOp(BinOpKind::Add, Arg::Var(x), Arg::int(1)));
        g.push(Some(z), QuadKind::UnOp(UnOpKind::Neg, Arg::Var(y)));
        g.push(None, QuadKind::Return(Some(Arg::Var(z))));
        let f = build(g).unwrap();
        let (func, _) = lowered(&f);

        let extended = |pos: usize| match (&func.insts[pos], &func.insts[pos + 1]) {
            (Inst::Int(_, Operand::Reg(r), _) | Inst::Neg(Operand::Reg(r)), Inst::Movsxd(r2)) => {
                r == r2
            }
            _ => false,
        };
        let add = func
            .insts
            .iter()
            .position(|i| matches!(i, Inst::Int(IntOp::Add, _, Operand::Imm(1))))
            .unwrap();
        let neg = func
            .insts
            .iter()
            .position(|i| matches!(i, Inst::Neg(_)))
            .unwrap();
        assert!(extended(add));
        assert!(extended(neg));

        // what `add` then `movsxd` leave for x = i32::MAX
        let machine = (i32::MAX as i64 + 1) as i32;
        assert_eq!(
            BinOpKind::Add.fold(Const::Int(i32::MAX), Const::Int(1)),
            Some(Const::Int(machine))
        );
    }

    #[test]
    fn float_comparisons_are_false_on_nan() {
        let mut g = mtac::Function::new("cmp");
        let x = g.add_var("x", Ty::Float, Scope::Param);
        let y = g.add_var("y", Ty::Float, Scope::Param);
        let e = g.add_var("e", Ty::Bool, Scope::Local);
        g.push(Some(e), QuadKind::Cmp(CmpKind::Eq, Arg::Var(x), Arg::Var(y)));
        g.push(None, QuadKind::Print(Arg::Var(e)));
        g.push(
            None,
            QuadKind::If(CmpKind::Lt, Arg::Var(x), Arg::Var(y), "less".into()),
        );
        g.push(None, QuadKind::Return(Some(Arg::int(0))));
        g.push(None, QuadKind::Label("less".into()));
        g.push(None, QuadKind::Return(Some(Arg::int(1))));
        let f = build(g).unwrap();
        let (func, alloc) = lowered(&f);

        let set = func
            .insts
            .iter()
            .position(|i| *i == Inst::Set(Cond::E, SCRATCH))
            .unwrap();
        assert_eq!(func.insts[set + 1], Inst::Set(Cond::Np, SCRATCH2));
        assert_eq!(
            func.insts[set + 2],
            Inst::Int(IntOp::And, SCRATCH.into(), SCRATCH2.into())
        );

        // x < y is tested as y > x
        let ucomisd: Vec<&Inst> = func
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::Ucomisd(..)))
            .collect();
        assert_eq!(ucomisd.len(), 2);
        assert_eq!(
            ucomisd[1],
            &Inst::Ucomisd(FLOAT_SCRATCH, alloc_operand(&alloc, x))
        );
        assert!(func.insts.iter().any(|i| matches!(i, Inst::Jcc(Cond::A, _))));
        assert!(!func
            .insts
            .iter()
            .any(|i| matches!(i, Inst::Jcc(Cond::B | Cond::Be, _))));
    }

    fn alloc_operand(alloc: &Allocation, v: VarId) -> Operand {
        match alloc.location(v) {
            Location::Reg(r) => Operand::Reg(*r),
            Location::Xmm(x) => Operand::Xmm(*x),
            Location::Stack(off) => Operand::stack(*off),
            Location::Global(l) => Operand::global(l),
        }
    }

    #[test]
    fn values_survive_calls() {
        // six values live across a call to g(x)
        let mut g = mtac::Function::new("caller");
        let vs: Vec<VarId> = (0..6)
            .map(|i| g.add_var(&format!("v{i}"), Ty::Int, Scope::Local))
            .collect();
        let r = g.add_var("r", Ty::Int, Scope::Local);
        for (i, v) in vs.iter().enumerate() {
            g.push(Some(*v), QuadKind::Read);
            if i == 5 {
                g.push(Some(r), QuadKind::Call("g".into(), vec![Arg::Var(*v)]));
            }
        }
        for v in &vs {
            g.push(Some(r), QuadKind::BinOp(BinOpKind::Add, Arg::Var(r), Arg::Var(*v)));
        }
        g.push(None, QuadKind::Return(Some(Arg::Var(r))));
        let f = build(g).unwrap();
        let (func, alloc) = lowered(&f);

        let call = func
            .insts
            .iter()
            .position(|i| *i == Inst::Call("g".into()))
            .unwrap();
        for v in &vs {
            if let Location::Reg(reg) = alloc.location(*v) {
                if !reg.is_callee_saved() {
                    assert!(func.insts[..call].contains(&Inst::Push(Operand::Reg(*reg))));
                    assert!(func.insts[call..].contains(&Inst::Pop(Operand::Reg(*reg))));
                }
            }
        }
        assert_aligned_calls(&func);
    }

    #[test]
    fn floats_and_strings_reach_the_runtime() {
        let mut g = mtac::Function::new("main");
        let x = g.add_var("x", Ty::Float, Scope::Local);
        let i = g.add_var("i", Ty::Int, Scope::Local);
        g.push(Some(x), QuadKind::Assign(Arg::float(2.5)));
        g.push(Some(x), QuadKind::BinOp(BinOpKind::Mul, Arg::Var(x), Arg::float(2.0)));
        g.push(Some(i), QuadKind::UnOp(UnOpKind::FloatToInt, Arg::Var(x)));
        g.push(None, QuadKind::Print(Arg::Var(x)));
        g.push(None, QuadKind::Print(Arg::Str("__str0".into())));
        g.push(None, QuadKind::Print(Arg::Var(i)));
        g.push(None, QuadKind::PrintLine);
        g.push(None, QuadKind::Return(Some(Arg::int(0))));
        let f = build(g).unwrap();
        let (func, _) = lowered(&f);

        let calls: Vec<&Inst> = func
            .insts
            .iter()
            .filter(|i| matches!(i, Inst::Call(_)))
            .collect();
        assert_eq!(
            calls,
            vec![
                &Inst::Call(PRINT_FLOAT.into()),
                &Inst::Call(PRINT_STRING.into()),
                &Inst::Call(PRINT_INT.into()),
                &Inst::Call(PRINT_LINE.into()),
            ]
        );
        assert!(func
            .insts
            .contains(&Inst::Lea(SCRATCH2, Operand::global("__str0"))));
        assert!(func.insts.iter().any(|i| matches!(i, Inst::Cvttsd2si(..))));
        assert_aligned_calls(&func);
    }

    #[test]
    fn float_remainder_is_rejected() {
        let mut g = mtac::Function::new("bad");
        let x = g.add_var("x", Ty::Float, Scope::Local);
        g.push(Some(x), QuadKind::BinOp(BinOpKind::Mod, Arg::float(1.0), Arg::float(2.0)));
        g.push(None, QuadKind::Return(None));
        let f = build(g).unwrap();

        let live = solve(&Liveness::new(&f), &f).unwrap();
        let dom = Dominators::compute(&f).unwrap();
        let alloc = allocate(&f, &live, &Loops::detect(&f, &dom)).unwrap();
        let err = lower(&f, &alloc, &live, &FloatPool::new()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Malformed(_)));
    }
}
