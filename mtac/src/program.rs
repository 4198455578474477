use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

use util::{format_vec, Label, Map};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ty {
    Int,
    Float,
    Bool,
    Str,
    Pointer(Box<Ty>),
    Array(Box<Ty>, usize),
    // (name, number of fields)
    Struct(Label, usize),
}

impl Ty {
    pub fn is_float(&self) -> bool {
        matches!(self, Ty::Float)
    }

    pub fn is_scalar(&self) -> bool {
        !matches!(self, Ty::Array(..) | Ty::Struct(..))
    }

    // number of 8-byte slots
    pub fn slots(&self) -> usize {
        match self {
            Ty::Array(t, n) => n * t.slots(),
            Ty::Struct(_, n) => *n,
            _ => 1,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Ty::Int => write!(f, "int"),
            Ty::Float => write!(f, "float"),
            Ty::Bool => write!(f, "bool"),
            Ty::Str => write!(f, "str"),
            Ty::Pointer(t) => write!(f, "{t}*"),
            Ty::Array(t, n) => write!(f, "{t}[{n}]"),
            Ty::Struct(name, _) => write!(f, "struct {name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Global,
    Param,
    Local,
    Temporary,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Position {
    #[default]
    None,
    Stack(i32),
    Register(usize),
    Global(Label),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub name: Label,
    pub ty: Ty,
    pub scope: Scope,
    #[serde(default)]
    pub position: Position,
}

impl Variable {
    pub fn new(name: &str, ty: Ty, scope: Scope) -> Self {
        let position = match scope {
            Scope::Global => Position::Global(name.to_string()),
            _ => Position::None,
        };
        Self {
            name: name.to_string(),
            ty,
            scope,
            position,
        }
    }

    pub fn is_global(&self) -> bool {
        self.scope == Scope::Global
    }
}

/// Index into the owning function's symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub usize);

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// booleans are Int(0) / Int(1)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Const {
    Int(i32),
    Float(f64),
}

impl Const {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Const::Int(i) => Some(*i),
            Const::Float(_) => None,
        }
    }

    pub fn is_true(&self) -> bool {
        match self {
            Const::Int(i) => *i != 0,
            Const::Float(x) => *x != 0.0,
        }
    }
}

// floats compare by bit pattern so that constants can be hashed
impl PartialEq for Const {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Const::Int(a), Const::Int(b)) => a == b,
            (Const::Float(a), Const::Float(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for Const {}

impl Hash for Const {
    fn hash<H: Hasher>(&self, state: &mut H) {
        core::mem::discriminant(self).hash(state);
        match self {
            Const::Int(i) => i.hash(state),
            Const::Float(x) => x.to_bits().hash(state),
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Const::Int(i) => write!(f, "{i}"),
            Const::Float(x) => write!(f, "{x:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Arg {
    Var(VarId),
    Const(Const),
    // label of an interned string literal
    Str(Label),
}

impl Arg {
    pub fn int(i: i32) -> Self {
        Arg::Const(Const::Int(i))
    }

    pub fn float(x: f64) -> Self {
        Arg::Const(Const::Float(x))
    }

    pub fn var(&self) -> Option<VarId> {
        match self {
            Arg::Var(v) => Some(*v),
            _ => None,
        }
    }

    pub fn constant(&self) -> Option<Const> {
        match self {
            Arg::Const(c) => Some(*c),
            _ => None,
        }
    }
}

impl From<VarId> for Arg {
    fn from(v: VarId) -> Self {
        Arg::Var(v)
    }
}

impl From<Const> for Arg {
    fn from(c: Const) -> Self {
        Arg::Const(c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinOpKind {
    pub fn is_commutative(&self) -> bool {
        matches!(self, BinOpKind::Add | BinOpKind::Mul)
    }

    pub fn fold(&self, x: Const, y: Const) -> Option<Const> {
        use BinOpKind::*;
        match (x, y) {
            (Const::Int(a), Const::Int(b)) => {
                let r = match self {
                    Add => a.wrapping_add(b),
                    Sub => a.wrapping_sub(b),
                    Mul => a.wrapping_mul(b),
                    Div if b != 0 => a.wrapping_div(b),
                    Mod if b != 0 => a.wrapping_rem(b),
                    Div | Mod => return None,
                };
                Some(Const::Int(r))
            }
            (Const::Float(a), Const::Float(b)) => {
                let r = match self {
                    Add => a + b,
                    Sub => a - b,
                    Mul => a * b,
                    Div => a / b,
                    Mod => return None,
                };
                Some(Const::Float(r))
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnOpKind {
    Neg,
    Not,
    IntToFloat,
    FloatToInt,
}

impl UnOpKind {
    pub fn fold(&self, x: Const) -> Option<Const> {
        use UnOpKind::*;
        match (self, x) {
            (Neg, Const::Int(a)) => Some(Const::Int(a.wrapping_neg())),
            (Neg, Const::Float(a)) => Some(Const::Float(-a)),
            (Not, Const::Int(a)) => Some(Const::Int((a == 0) as i32)),
            (IntToFloat, Const::Int(a)) => Some(Const::Float(a as f64)),
            (FloatToInt, Const::Float(a)) => Some(Const::Int(a as i32)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmpKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpKind {
    pub fn negate(&self) -> Self {
        use CmpKind::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Lt => Ge,
            Le => Gt,
            Gt => Le,
            Ge => Lt,
        }
    }

    // a op b  <=>  b op.swap() a
    pub fn swap(&self) -> Self {
        use CmpKind::*;
        match self {
            Eq => Eq,
            Ne => Ne,
            Lt => Gt,
            Le => Ge,
            Gt => Lt,
            Ge => Le,
        }
    }

    pub fn test<T: PartialOrd>(&self, a: T, b: T) -> bool {
        use CmpKind::*;
        match self {
            Eq => a == b,
            Ne => a != b,
            Lt => a < b,
            Le => a <= b,
            Gt => a > b,
            Ge => a >= b,
        }
    }

    pub fn fold(&self, x: Const, y: Const) -> Option<bool> {
        match (x, y) {
            (Const::Int(a), Const::Int(b)) => Some(self.test(a, b)),
            (Const::Float(a), Const::Float(b)) => Some(self.test(a, b)),
            _ => None,
        }
    }
}

impl fmt::Display for CmpKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use CmpKind::*;
        let s = match self {
            Eq => "==",
            Ne => "!=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuadKind {
    Nop,
    Assign(Arg),
    BinOp(BinOpKind, Arg, Arg),
    UnOp(UnOpKind, Arg),
    Cmp(CmpKind, Arg, Arg),
    Call(Label, Vec<Arg>),
    // array element / struct field read: base[index]
    Load(VarId, Arg),
    // base[index] = value
    Store(VarId, Arg, Arg),
    Address(VarId),
    Deref(VarId),
    DerefStore(VarId, Arg),
    Print(Arg),
    PrintLine,
    Read,
    Label(Label),
    Goto(Label),
    If(CmpKind, Arg, Arg, Label),
    IfFalse(CmpKind, Arg, Arg, Label),
    Return(Option<Arg>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quadruple {
    #[serde(default)]
    pub result: Option<VarId>,
    pub kind: QuadKind,
}

impl Quadruple {
    pub fn new(result: VarId, kind: QuadKind) -> Self {
        Self {
            result: Some(result),
            kind,
        }
    }

    pub fn effect(kind: QuadKind) -> Self {
        Self { result: None, kind }
    }

    pub fn nop() -> Self {
        Self::effect(QuadKind::Nop)
    }

    pub fn def(&self) -> Option<VarId> {
        self.result
    }

    pub fn args(&self) -> Vec<&Arg> {
        use QuadKind::*;
        match &self.kind {
            Assign(x) | UnOp(_, x) | Load(_, x) | DerefStore(_, x) | Print(x) => vec![x],
            BinOp(_, x, y) | Cmp(_, x, y) | Store(_, x, y) | If(_, x, y, _) | IfFalse(_, x, y, _) => {
                vec![x, y]
            }
            Call(_, xs) => xs.iter().collect(),
            Return(Some(x)) => vec![x],
            Nop | Address(_) | Deref(_) | PrintLine | Read | Label(_) | Goto(_) | Return(None) => {
                vec![]
            }
        }
    }

    pub fn args_mut(&mut self) -> Vec<&mut Arg> {
        use QuadKind::*;
        match &mut self.kind {
            Assign(x) | UnOp(_, x) | Load(_, x) | DerefStore(_, x) | Print(x) => vec![x],
            BinOp(_, x, y) | Cmp(_, x, y) | Store(_, x, y) | If(_, x, y, _) | IfFalse(_, x, y, _) => {
                vec![x, y]
            }
            Call(_, xs) => xs.iter_mut().collect(),
            Return(Some(x)) => vec![x],
            Nop | Address(_) | Deref(_) | PrintLine | Read | Label(_) | Goto(_) | Return(None) => {
                vec![]
            }
        }
    }

    // variables read, including memory bases
    pub fn uses(&self) -> Vec<VarId> {
        use QuadKind::*;
        let mut r: Vec<VarId> = self.args().into_iter().filter_map(|a| a.var()).collect();
        match &self.kind {
            Load(base, _) | Store(base, _, _) | Address(base) | Deref(base) | DerefStore(base, _) => {
                r.push(*base)
            }
            _ => (),
        }
        r
    }

    pub fn has_effect(&self) -> bool {
        use QuadKind::*;
        match &self.kind {
            Nop | Assign(_) | BinOp(..) | UnOp(..) | Cmp(..) | Load(..) | Address(_) | Deref(_) => false,
            Call(..) | Store(..) | DerefStore(..) | Print(_) | PrintLine | Read => true,
            Label(_) | Goto(_) | If(..) | IfFalse(..) | Return(_) => true,
        }
    }

    // may fault when executed speculatively
    pub fn can_trap(&self) -> bool {
        use QuadKind::*;
        match &self.kind {
            BinOp(BinOpKind::Div | BinOpKind::Mod, _, y) => !matches!(y, Arg::Const(Const::Int(i)) if *i != 0 && *i != -1),
            Load(..) | Deref(_) => true,
            _ => false,
        }
    }

    pub fn is_control(&self) -> bool {
        use QuadKind::*;
        matches!(
            self.kind,
            Label(_) | Goto(_) | If(..) | IfFalse(..) | Return(_)
        )
    }

    // replaces every read of `from` (in `Arg` position) by `to`
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

    pub fn display<'a>(&'a self, vars: &'a [Variable]) -> QuadDisplay<'a> {
        QuadDisplay { quad: self, vars }
    }
}

pub struct ArgDisplay<'a> {
    arg: &'a Arg,
    vars: &'a [Variable],
}

impl<'a> ArgDisplay<'a> {
    pub fn new(arg: &'a Arg, vars: &'a [Variable]) -> Self {
        Self { arg, vars }
    }
}

impl fmt::Display for ArgDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.arg {
            Arg::Var(v) => write!(f, "{}", var_name(self.vars, *v)),
            Arg::Const(c) => write!(f, "{c}"),
            Arg::Str(label) => write!(f, "@{label}"),
        }
    }
}

pub fn var_name(vars: &[Variable], v: VarId) -> &str {
    vars.get(v.0).map(|x| x.name.as_str()).unwrap_or("?")
}

pub struct QuadDisplay<'a> {
    quad: &'a Quadruple,
    vars: &'a [Variable],
}

impl<'a> fmt::Display for QuadDisplay<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let quad: &'a Quadruple = self.quad;
        let vars: &'a [Variable] = self.vars;
        let a = |x: &'a Arg| ArgDisplay::new(x, vars);
        let n = |v: VarId| var_name(vars, v);
        if let Some(r) = quad.result {
            write!(f, "{} = ", n(r))?;
        }
        use QuadKind::*;
        match &quad.kind {
            Nop => write!(f, "nop"),
            Assign(x) => write!(f, "{}", a(x)),
            BinOp(op, x, y) => write!(f, "{} {:?} {}", a(x), op, a(y)),
            UnOp(op, x) => write!(f, "{:?} {}", op, a(x)),
            Cmp(op, x, y) => write!(f, "{} {} {}", a(x), op, a(y)),
            Call(label, xs) => {
                write!(f, "call {label}")?;
                let xs: Vec<ArgDisplay> = xs.iter().map(a).collect();
                format_vec(f, &xs, "(", ", ", ")")
            }
            Load(base, i) => write!(f, "{}[{}]", n(*base), a(i)),
            Store(base, i, x) => write!(f, "{}[{}] = {}", n(*base), a(i), a(x)),
            Address(x) => write!(f, "&{}", n(*x)),
            Deref(p) => write!(f, "*{}", n(*p)),
            DerefStore(p, x) => write!(f, "*{} = {}", n(*p), a(x)),
            Print(x) => write!(f, "print {}", a(x)),
            PrintLine => write!(f, "println"),
            Read => write!(f, "read"),
            Label(label) => write!(f, "{label}:"),
            Goto(label) => write!(f, "goto {label}"),
            If(op, x, y, label) => write!(f, "if {} {} {} goto {label}", a(x), op, a(y)),
            IfFalse(op, x, y, label) => write!(f, "if not {} {} {} goto {label}", a(x), op, a(y)),
            Return(Some(x)) => write!(f, "return {}", a(x)),
            Return(None) => write!(f, "return"),
        }
    }
}

/// A routine as handed over by the front-end: flat, label-addressed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: Label,
    #[serde(default)]
    pub ret: Option<Ty>,
    pub vars: Vec<Variable>,
    #[serde(default)]
    pub params: Vec<VarId>,
    pub quads: Vec<Quadruple>,
}

impl Function {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ret: None,
            vars: vec![],
            params: vec![],
            quads: vec![],
        }
    }

    pub fn add_var(&mut self, name: &str, ty: Ty, scope: Scope) -> VarId {
        let id = VarId(self.vars.len());
        self.vars.push(Variable::new(name, ty, scope));
        if scope == Scope::Param {
            self.params.push(id);
        }
        id
    }

    pub fn push(&mut self, result: Option<VarId>, kind: QuadKind) {
        self.quads.push(Quadruple { result, kind });
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "function {}", self.name)?;
        let params: Vec<&str> = self.params.iter().map(|p| var_name(&self.vars, *p)).collect();
        format_vec(f, &params, "(", ", ", ")")?;
        writeln!(f)?;
        for q in &self.quads {
            if matches!(q.kind, QuadKind::Label(_)) {
                writeln!(f, "  {}", q.display(&self.vars))?;
            } else {
                writeln!(f, "    {}", q.display(&self.vars))?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Global {
    pub name: Label,
    pub ty: Ty,
    #[serde(default)]
    pub init: Option<Const>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Program {
    #[serde(default)]
    pub globals: Vec<Global>,
    // (label, literal)
    #[serde(default)]
    pub strings: Vec<(Label, String)>,
    pub functions: Vec<Function>,
}

/// Append-only pool of deduplicated string literals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StringPool {
    entries: Vec<(Label, String)>,
    index: Map<String, Label>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, s: &str) -> Label {
        if let Some(label) = self.index.get(s) {
            return label.clone();
        }
        let label = format!("__str{}", self.entries.len());
        self.insert(label.clone(), s.to_string());
        label
    }

    fn insert(&mut self, label: Label, s: String) {
        self.index.entry(s.clone()).or_insert_with(|| label.clone());
        self.entries.push((label, s));
    }

    pub fn get(&self, label: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, s)| s.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Label, String)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<Vec<(Label, String)>> for StringPool {
    fn from(v: Vec<(Label, String)>) -> Self {
        let mut pool = StringPool::new();
        for (label, s) in v {
            pool.insert(label, s);
        }
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_arith() {
        assert_eq!(
            BinOpKind::Add.fold(Const::Int(2), Const::Int(3)),
            Some(Const::Int(5))
        );
        assert_eq!(BinOpKind::Div.fold(Const::Int(2), Const::Int(0)), None);
        assert_eq!(
            BinOpKind::Mul.fold(Const::Float(1.5), Const::Float(2.0)),
            Some(Const::Float(3.0))
        );
        assert_eq!(BinOpKind::Add.fold(Const::Int(1), Const::Float(1.0)), None);
        assert_eq!(CmpKind::Lt.fold(Const::Int(1), Const::Int(2)), Some(true));
    }

    #[test]
    fn uses_include_memory_base() {
        let q = Quadruple::new(VarId(0), QuadKind::Load(VarId(1), Arg::Var(VarId(2))));
        assert_eq!(q.uses(), vec![VarId(2), VarId(1)]);
        assert!(!q.has_effect());
        assert!(q.can_trap());
    }

    #[test]
    fn string_pool_deduplicates() {
        let mut pool = StringPool::new();
        let a = pool.intern("hello");
        let b = pool.intern("world");
        let c = pool.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(&b), Some("world"));
    }

    #[test]
    fn function_from_json() {
        let src = r#"{
            "name": "main",
            "vars": [{ "name": "x", "ty": "Int", "scope": "Local" }],
            "quads": [
                { "result": 0, "kind": { "BinOp": ["Add", { "Const": { "Int": 2 } }, { "Const": { "Int": 3 } }] } },
                { "kind": { "Return": { "Var": 0 } } }
            ]
        }"#;
        let f: Function = serde_json::from_str(src).unwrap();
        assert_eq!(f.quads.len(), 2);
        assert_eq!(f.quads[0].result, Some(VarId(0)));
        assert_eq!(f.quads[0].display(&f.vars).to_string(), "x = 2 Add 3");
    }
}
