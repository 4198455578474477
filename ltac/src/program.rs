use std::fmt;

use mtac::{CmpKind, Const, Global};
use util::Label;

use crate::platform::{Reg, Xmm};

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(Reg),
    Xmm(Xmm),
    Imm(i64),
    // [base + index * 8 + offset]
    Mem {
        base: Reg,
        index: Option<Reg>,
        offset: i32,
    },
    // [label + offset]
    Global(Label, i32),
}

impl Operand {
    pub fn stack(offset: i32) -> Self {
        Operand::Mem {
            base: Reg::Rbp,
            index: None,
            offset,
        }
    }

    pub fn global(label: &str) -> Self {
        Operand::Global(label.to_string(), 0)
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Operand::Mem { .. } | Operand::Global(..))
    }

    // registers read to evaluate the operand
    pub fn reads(&self, r: Reg) -> bool {
        match self {
            Operand::Reg(x) => *x == r,
            Operand::Mem { base, index, .. } => *base == r || *index == Some(r),
            _ => false,
        }
    }

    pub fn reads_xmm(&self, x: Xmm) -> bool {
        *self == Operand::Xmm(x)
    }
}

impl From<Reg> for Operand {
    fn from(r: Reg) -> Self {
        Operand::Reg(r)
    }
}

impl From<Xmm> for Operand {
    fn from(x: Xmm) -> Self {
        Operand::Xmm(x)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Reg(r) => write!(f, "{r}"),
            Operand::Xmm(x) => write!(f, "{x}"),
            Operand::Imm(i) => write!(f, "{i}"),
            Operand::Mem {
                base,
                index,
                offset,
            } => {
                write!(f, "qword ptr [{base}")?;
                if let Some(i) = index {
                    write!(f, " + {i} * 8")?;
                }
                match offset {
                    0 => write!(f, "]"),
                    o if *o < 0 => write!(f, " - {}]", -o),
                    o => write!(f, " + {o}]"),
                }
            }
            Operand::Global(label, 0) => write!(f, "qword ptr [rip + {label}]"),
            Operand::Global(label, o) => write!(f, "qword ptr [rip + {label} + {o}]"),
        }
    }
}

/// Condition codes; the unsigned ones follow `ucomisd`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    E,
    Ne,
    L,
    Le,
    G,
    Ge,
    B,
    Be,
    A,
    Ae,
    // unordered after `ucomisd`
    P,
    Np,
}

impl Cond {
    pub fn of(kind: CmpKind, float: bool) -> Self {
        use CmpKind::*;
        match (kind, float) {
            (Eq, _) => Cond::E,
            (Ne, _) => Cond::Ne,
            (Lt, false) => Cond::L,
            (Le, false) => Cond::Le,
            (Gt, false) => Cond::G,
            (Ge, false) => Cond::Ge,
            // `<` and `<=` are emitted with swapped operands
            (Lt | Gt, true) => Cond::A,
            (Le | Ge, true) => Cond::Ae,
        }
    }

    pub fn negate(&self) -> Self {
        use Cond::*;
        match self {
            E => Ne,
            Ne => E,
            L => Ge,
            Le => G,
            G => Le,
            Ge => L,
            B => Ae,
            Be => A,
            A => Be,
            Ae => B,
            P => Np,
            Np => P,
        }
    }
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = format!("{:?}", self).to_lowercase();
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntOp {
    Add,
    Sub,
    Imul,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatOp {
    Addsd,
    Subsd,
    Mulsd,
    Divsd,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Label(Label),
    // (dst, src)
    Mov(Operand, Operand),
    Movsd(Operand, Operand),
    Lea(Reg, Operand),
    Int(IntOp, Operand, Operand),
    Float(FloatOp, Xmm, Operand),
    Neg(Operand),
    // sign-extends the low 32 bits in place
    Movsxd(Reg),
    Cqo,
    Idiv(Operand),
    Cmp(Operand, Operand),
    Ucomisd(Xmm, Operand),
    // dst = condition ? 1 : 0
    Set(Cond, Reg),
    Cvtsi2sd(Xmm, Operand),
    Cvttsd2si(Reg, Operand),
    Jmp(Label),
    Jcc(Cond, Label),
    Push(Operand),
    Pop(Operand),
    Call(Label),
    Ret,
}

impl Inst {
    pub fn reads_flags(&self) -> bool {
        matches!(self, Inst::Jcc(..) | Inst::Set(..))
    }

    pub fn writes_flags(&self) -> bool {
        matches!(
            self,
            Inst::Int(..) | Inst::Neg(_) | Inst::Idiv(_) | Inst::Cmp(..) | Inst::Ucomisd(..)
        )
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use Inst::*;
        match self {
            Label(l) => write!(f, "{l}:"),
            Mov(d, s) => write!(f, "\tmov\t{d}, {s}"),
            Movsd(d, s) => write!(f, "\tmovsd\t{d}, {s}"),
            Lea(d, s) => write!(f, "\tlea\t{d}, {s}"),
            Int(op, d, s) => write!(f, "\t{}\t{d}, {s}", format!("{:?}", op).to_lowercase()),
            Float(op, d, s) => write!(f, "\t{}\t{d}, {s}", format!("{:?}", op).to_lowercase()),
            Neg(d) => write!(f, "\tneg\t{d}"),
            Movsxd(r) => write!(f, "\tmovsxd\t{r}, {}", r.dword()),
            Cqo => write!(f, "\tcqo"),
            Idiv(s) => write!(f, "\tidiv\t{s}"),
            Cmp(a, b) => write!(f, "\tcmp\t{a}, {b}"),
            Ucomisd(a, b) => write!(f, "\tucomisd\t{a}, {b}"),
            Set(c, r) => write!(f, "\tset{c}\t{}\n\tmovzx\t{r}, {}", r.byte(), r.byte()),
            Cvtsi2sd(d, s) => write!(f, "\tcvtsi2sd\t{d}, {s}"),
            Cvttsd2si(d, s) => write!(f, "\tcvttsd2si\t{d}, {s}"),
            Jmp(l) => write!(f, "\tjmp\t{l}"),
            Jcc(c, l) => write!(f, "\tj{c}\t{l}"),
            Push(s) => write!(f, "\tpush\t{s}"),
            Pop(d) => write!(f, "\tpop\t{d}"),
            Call(l) => write!(f, "\tcall\t{l}"),
            Ret => write!(f, "\tret"),
        }
    }
}

/// A function after register allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: Label,
    pub insts: Vec<Inst>,
    // bytes reserved below rbp for locals and spills
    pub frame_size: i32,
    pub callee_saved: Vec<Reg>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "\t.globl\t{}", self.name)?;
        for i in &self.insts {
            writeln!(f, "{i}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
    pub strings: Vec<(Label, String)>,
    pub floats: Vec<(Label, f64)>,
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "\t.intel_syntax noprefix")?;
        writeln!(f, "\t.data")?;
        for g in &self.globals {
            match g.init {
                Some(Const::Int(i)) => writeln!(f, "{}:\n\t.quad\t{i}", g.name)?,
                Some(Const::Float(x)) => writeln!(f, "{}:\n\t.double\t{x:?}", g.name)?,
                None => writeln!(f, "{}:\n\t.zero\t{}", g.name, g.ty.slots() * 8)?,
            }
        }
        for (label, s) in &self.strings {
            writeln!(f, "{label}:\n\t.string\t{s:?}")?;
        }
        for (label, x) in &self.floats {
            writeln!(f, "{label}:\n\t.double\t{x:?}")?;
        }
        writeln!(f, "\t.text")?;
        for fun in &self.functions {
            writeln!(f, "{fun}")?;
        }
        Ok(())
    }
}
