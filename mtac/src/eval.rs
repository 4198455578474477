//! Reference interpreter over block-form functions. Transformations are
//! checked against it: a rewritten function must produce the same result
//! and the same output as the original on the same inputs.

use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

use crate::cfg::{BlockId, Fundef, Module, Tail};
use crate::program::*;
use util::{Label, Map};

pub const STEP_LIMIT: usize = 1_000_000;

#[derive(Debug, Clone, PartialEq)]
pub enum Loc {
    // (frame index, variable)
    Local(usize, VarId),
    Global(Label),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f64),
    Ptr(Loc, usize),
    Str(Label),
    Undef,
}

impl Value {
    fn of_const(c: Const) -> Self {
        match c {
            Const::Int(i) => Value::Int(i),
            Const::Float(x) => Value::Float(x),
        }
    }

    fn zero(ty: &Ty) -> Self {
        match ty {
            Ty::Float => Value::Float(0.0),
            Ty::Int | Ty::Bool => Value::Int(0),
            _ => Value::Undef,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:.6}"),
            Value::Ptr(loc, off) => write!(f, "&{loc:?}+{off}"),
            Value::Str(s) => write!(f, "@{s}"),
            Value::Undef => write!(f, "undef"),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    #[error("call to unknown function `{0}`")]
    UnknownFunction(Label),
    #[error("read of an undefined value in `{0}`")]
    Undefined(Label),
    #[error("division by zero in `{0}`")]
    DivisionByZero(Label),
    #[error("type mismatch in `{0}`")]
    TypeMismatch(Label),
    #[error("out of bounds access to `{0}`")]
    OutOfBounds(Label),
    #[error("input exhausted")]
    NoInput,
    #[error("step limit of {0} exceeded")]
    StepLimit(usize),
}

pub type Result<T> = std::result::Result<T, EvalError>;

#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub value: Option<Value>,
    pub output: String,
}

pub struct Machine<'a> {
    module: &'a Module,
    globals: Map<Label, Vec<Value>>,
    frames: Vec<Vec<Vec<Value>>>,
    input: VecDeque<i32>,
    output: String,
    steps: usize,
}

impl<'a> Machine<'a> {
    pub fn new(module: &'a Module, input: &[i32]) -> Self {
        let globals = module
            .globals
            .iter()
            .map(|g| {
                let mut slots = vec![Value::zero(&g.ty); g.ty.slots()];
                if let Some(c) = g.init {
                    slots[0] = Value::of_const(c);
                }
                (g.name.clone(), slots)
            })
            .collect();
        Self {
            module,
            globals,
            frames: vec![],
            input: input.iter().copied().collect(),
            output: String::new(),
            steps: 0,
        }
    }

    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>> {
        let module = self.module;
        let f = module
            .fundef(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;

        let mut frame: Vec<Vec<Value>> = f
            .vars
            .iter()
            .map(|v| vec![Value::Undef; v.ty.slots()])
            .collect();
        for (p, a) in f.params.iter().zip(args) {
            frame[p.0][0] = a;
        }
        self.frames.push(frame);
        let r = self.exec(f);
        self.frames.pop();
        r
    }

    fn loc(&self, f: &Fundef, v: VarId) -> Loc {
        let var = f.var(v);
        if var.is_global() {
            Loc::Global(var.name.clone())
        } else {
            Loc::Local(self.frames.len() - 1, v)
        }
    }

    fn slots(&mut self, f: &Fundef, loc: &Loc) -> Result<&mut Vec<Value>> {
        let r = match loc {
            Loc::Local(i, v) => self.frames.get_mut(*i).and_then(|fr| fr.get_mut(v.0)),
            Loc::Global(name) => self.globals.get_mut(name),
        };
        r.ok_or_else(|| EvalError::OutOfBounds(f.name.clone()))
    }

    fn read(&mut self, f: &Fundef, loc: &Loc, off: usize) -> Result<Value> {
        self.slots(f, loc)?
            .get(off)
            .cloned()
            .ok_or_else(|| EvalError::OutOfBounds(f.name.clone()))
    }

    fn write(&mut self, f: &Fundef, loc: &Loc, off: usize, x: Value) -> Result<()> {
        let name = f.name.clone();
        let slot = self
            .slots(f, loc)?
            .get_mut(off)
            .ok_or(EvalError::OutOfBounds(name))?;
        *slot = x;
        Ok(())
    }

    fn var(&mut self, f: &Fundef, v: VarId) -> Result<Value> {
        let loc = self.loc(f, v);
        self.read(f, &loc, 0)
    }

    fn arg(&mut self, f: &Fundef, a: &Arg) -> Result<Value> {
        match a {
            Arg::Var(v) => self.var(f, *v),
            Arg::Const(c) => Ok(Value::of_const(*c)),
            Arg::Str(s) => Ok(Value::Str(s.clone())),
        }
    }

    fn index(&mut self, f: &Fundef, a: &Arg) -> Result<usize> {
        match self.arg(f, a)? {
            Value::Int(i) if i >= 0 => Ok(i as usize),
            Value::Undef => Err(EvalError::Undefined(f.name.clone())),
            _ => Err(EvalError::OutOfBounds(f.name.clone())),
        }
    }

    // the memory cell `base[index]` designates: an aggregate slot or the pointee of a pointer
    fn element(&mut self, f: &Fundef, base: VarId, index: usize) -> Result<(Loc, usize)> {
        if let Ty::Pointer(_) = f.var(base).ty {
            match self.var(f, base)? {
                Value::Ptr(loc, off) => Ok((loc, off + index)),
                _ => Err(EvalError::TypeMismatch(f.name.clone())),
            }
        } else {
            Ok((self.loc(f, base), index))
        }
    }

    fn pointee(&mut self, f: &Fundef, p: VarId) -> Result<(Loc, usize)> {
        match self.var(f, p)? {
            Value::Ptr(loc, off) => Ok((loc, off)),
            Value::Undef => Err(EvalError::Undefined(f.name.clone())),
            _ => Err(EvalError::TypeMismatch(f.name.clone())),
        }
    }

    fn binop(&self, f: &Fundef, op: BinOpKind, x: Value, y: Value) -> Result<Value> {
        let c = |x: &Value| match x {
            Value::Int(i) => Ok(Const::Int(*i)),
            Value::Float(x) => Ok(Const::Float(*x)),
            Value::Undef => Err(EvalError::Undefined(f.name.clone())),
            _ => Err(EvalError::TypeMismatch(f.name.clone())),
        };
        let (a, b) = (c(&x)?, c(&y)?);
        if matches!(op, BinOpKind::Div | BinOpKind::Mod) && b == Const::Int(0) {
            return Err(EvalError::DivisionByZero(f.name.clone()));
        }
        op.fold(a, b)
            .map(Value::of_const)
            .ok_or_else(|| EvalError::TypeMismatch(f.name.clone()))
    }

    fn compare(&self, f: &Fundef, op: CmpKind, x: Value, y: Value) -> Result<bool> {
        match (x, y) {
            (Value::Int(a), Value::Int(b)) => Ok(op.test(a, b)),
            (Value::Float(a), Value::Float(b)) => Ok(op.test(a, b)),
            (Value::Undef, _) | (_, Value::Undef) => Err(EvalError::Undefined(f.name.clone())),
            (a, b) if matches!(op, CmpKind::Eq | CmpKind::Ne) => Ok(op.test(a == b, true)),
            _ => Err(EvalError::TypeMismatch(f.name.clone())),
        }
    }

    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > STEP_LIMIT {
            return Err(EvalError::StepLimit(STEP_LIMIT));
        }
        Ok(())
    }

    fn exec(&mut self, f: &Fundef) -> Result<Option<Value>> {
        let mut bid: BlockId = f.entry;
        loop {
            let block = &f.blocks[bid];
            for q in &block.body {
                self.step()?;
                self.quad(f, q)?;
            }
            self.step()?;
            bid = match &block.tail {
                Tail::Jump(b) | Tail::Fallthrough(b) => *b,
                Tail::Branch {
                    kind,
                    lhs,
                    rhs,
                    on_true,
                    on_false,
                } => {
                    let (x, y) = (self.arg(f, lhs)?, self.arg(f, rhs)?);
                    if self.compare(f, *kind, x, y)? {
                        *on_true
                    } else {
                        *on_false
                    }
                }
                Tail::Return(x) => {
                    return match x {
                        Some(x) => self.arg(f, x).map(Some),
                        None => Ok(None),
                    }
                }
            };
        }
    }

    fn quad(&mut self, f: &Fundef, q: &Quadruple) -> Result<()> {
        let value = match &q.kind {
            QuadKind::Nop => None,
            QuadKind::Assign(x) => Some(self.arg(f, x)?),
            QuadKind::BinOp(op, x, y) => {
                let (x, y) = (self.arg(f, x)?, self.arg(f, y)?);
                Some(self.binop(f, *op, x, y)?)
            }
            QuadKind::UnOp(op, x) => {
                let x = match self.arg(f, x)? {
                    Value::Int(i) => Const::Int(i),
                    Value::Float(x) => Const::Float(x),
                    Value::Undef => return Err(EvalError::Undefined(f.name.clone())),
                    _ => return Err(EvalError::TypeMismatch(f.name.clone())),
                };
                let r = op
                    .fold(x)
                    .ok_or_else(|| EvalError::TypeMismatch(f.name.clone()))?;
                Some(Value::of_const(r))
            }
            QuadKind::Cmp(op, x, y) => {
                let (x, y) = (self.arg(f, x)?, self.arg(f, y)?);
                Some(Value::Int(self.compare(f, *op, x, y)? as i32))
            }
            QuadKind::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|a| self.arg(f, a))
                    .collect::<Result<Vec<_>>>()?;
                self.call(name, args)?
            }
            QuadKind::Load(base, i) => {
                let i = self.index(f, i)?;
                let (loc, off) = self.element(f, *base, i)?;
                Some(self.read(f, &loc, off)?)
            }
            QuadKind::Store(base, i, x) => {
                let i = self.index(f, i)?;
                let x = self.arg(f, x)?;
                let (loc, off) = self.element(f, *base, i)?;
                self.write(f, &loc, off, x)?;
                None
            }
            QuadKind::Address(x) => Some(Value::Ptr(self.loc(f, *x), 0)),
            QuadKind::Deref(p) => {
                let (loc, off) = self.pointee(f, *p)?;
                Some(self.read(f, &loc, off)?)
            }
            QuadKind::DerefStore(p, x) => {
                let x = self.arg(f, x)?;
                let (loc, off) = self.pointee(f, *p)?;
                self.write(f, &loc, off, x)?;
                None
            }
            QuadKind::Print(x) => {
                match self.arg(f, x)? {
                    Value::Str(label) => {
                        let module = self.module;
                        let s = module.strings.get(&label).unwrap_or_default();
                        self.output.push_str(s);
                    }
                    Value::Undef => return Err(EvalError::Undefined(f.name.clone())),
                    v => self.output.push_str(&v.to_string()),
                }
                None
            }
            QuadKind::PrintLine => {
                self.output.push('\n');
                None
            }
            QuadKind::Read => Some(Value::Int(self.input.pop_front().ok_or(EvalError::NoInput)?)),
            QuadKind::Label(_)
            | QuadKind::Goto(_)
            | QuadKind::If(..)
            | QuadKind::IfFalse(..)
            | QuadKind::Return(_) => {
                return Err(EvalError::TypeMismatch(f.name.clone()));
            }
        };

        if let (Some(r), Some(v)) = (q.result, value) {
            let loc = self.loc(f, r);
            self.write(f, &loc, 0, v)?;
        }
        Ok(())
    }
}

pub fn run(module: &Module, entry: &str, args: Vec<Value>, input: &[i32]) -> Result<Outcome> {
    let mut m = Machine::new(module, input);
    let value = m.call(entry, args)?;
    Ok(Outcome {
        value,
        output: m.output,
    })
}

/// Runs a single function in a module of its own.
pub fn run_fundef(f: &Fundef, args: Vec<Value>) -> Result<Outcome> {
    let module = Module {
        globals: vec![],
        strings: StringPool::new(),
        fundefs: vec![f.clone()],
    };
    run(&module, &f.name, args, &[])
}
