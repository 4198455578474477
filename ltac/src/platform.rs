use std::fmt;

/// x86-64 general purpose registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Reg {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl Reg {
    pub fn is_callee_saved(&self) -> bool {
        CALLEE_SAVED.contains(self)
    }

    // name of the low 32 bits, for movsxd
    pub fn dword(&self) -> &'static str {
        use Reg::*;
        match self {
            Rax => "eax",
            Rbx => "ebx",
            Rcx => "ecx",
            Rdx => "edx",
            Rsi => "esi",
            Rdi => "edi",
            Rbp => "ebp",
            Rsp => "esp",
            R8 => "r8d",
            R9 => "r9d",
            R10 => "r10d",
            R11 => "r11d",
            R12 => "r12d",
            R13 => "r13d",
            R14 => "r14d",
            R15 => "r15d",
        }
    }

    // name of the low byte, for setcc
    pub fn byte(&self) -> &'static str {
        use Reg::*;
        match self {
            Rax => "al",
            Rbx => "bl",
            Rcx => "cl",
            Rdx => "dl",
            Rsi => "sil",
            Rdi => "dil",
            Rbp => "bpl",
            Rsp => "spl",
            R8 => "r8b",
            R9 => "r9b",
            R10 => "r10b",
            R11 => "r11b",
            R12 => "r12b",
            R13 => "r13b",
            R14 => "r14b",
            R15 => "r15b",
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = format!("{:?}", self).to_lowercase();
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xmm(pub u8);

impl fmt::Display for Xmm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "xmm{}", self.0)
    }
}

pub static GP_REGS: &[Reg] = &[
    Reg::Rbx,
    Reg::Rcx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

pub static FLOAT_REGS: &[Xmm] = &[
    Xmm(1),
    Xmm(2),
    Xmm(3),
    Xmm(4),
    Xmm(5),
    Xmm(6),
    Xmm(7),
    Xmm(8),
    Xmm(9),
    Xmm(10),
    Xmm(11),
    Xmm(12),
    Xmm(13),
];

// pushed in this order by the prologue
pub static CALLEE_SAVED: &[Reg] = &[Reg::Rbx, Reg::R12, Reg::R13, Reg::R14, Reg::R15];

pub const RETURN: Reg = Reg::Rax;
pub const FLOAT_RETURN: Xmm = Xmm(0);

// never allocated; only live inside the lowering of one instruction
pub const SCRATCH: Reg = Reg::R10;
pub const SCRATCH2: Reg = Reg::R11;
pub const FLOAT_SCRATCH: Xmm = Xmm(14);
pub const FLOAT_SCRATCH2: Xmm = Xmm(15);

pub const SLOT: i32 = 8;
pub const STACK_ALIGN: i32 = 16;
// offset of the first argument from rbp: saved rbp and return address
pub const ARGS_OFFSET: i32 = 16;

pub const PRINT_INT: &str = "__print_int";
pub const PRINT_FLOAT: &str = "__print_float";
pub const PRINT_STRING: &str = "__print_string";
pub const PRINT_LINE: &str = "__print_line";
pub const READ_INT: &str = "__read_int";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_registers_are_not_allocatable() {
        for r in [RETURN, Reg::Rdx, SCRATCH, SCRATCH2, Reg::Rsp, Reg::Rbp] {
            assert!(!GP_REGS.contains(&r));
        }
        for x in [FLOAT_RETURN, FLOAT_SCRATCH, FLOAT_SCRATCH2] {
            assert!(!FLOAT_REGS.contains(&x));
        }
        assert!(CALLEE_SAVED.iter().all(|r| GP_REGS.contains(r)));
        assert_eq!(Reg::R12.to_string(), "r12");
    }
}
