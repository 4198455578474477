use thiserror::Error;
use util::Label;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("jump to unknown label `{0}`")]
    UnknownLabel(Label),
    #[error("label `{0}` is defined twice")]
    DuplicateLabel(Label),
    #[error("control operator found inside the body of block `{0}`")]
    MisplacedControl(Label),
    #[error("block `{0}` is unreachable from the entry")]
    Unreachable(Label),
    #[error("dataflow iteration did not converge after {0} sweeps")]
    Diverged(usize),
    #[error("no fixpoint reached within {0} rounds")]
    PassCap(usize),
    #[error("no register or stack slot available for `{0}`")]
    Unplaceable(Label),
    #[error("malformed IR: {0}")]
    Malformed(String),
}

// unrecoverable: aborts compilation of the enclosing function
#[derive(Debug, Error, Clone, PartialEq)]
#[error("internal error in `{pass}` while compiling `{function}`: {kind}")]
pub struct InternalError {
    pub pass: &'static str,
    pub function: Label,
    pub kind: ErrorKind,
}

impl InternalError {
    pub fn new(pass: &'static str, function: &str, kind: ErrorKind) -> Self {
        Self {
            pass,
            function: function.to_string(),
            kind,
        }
    }
}

pub type Result<T> = std::result::Result<T, InternalError>;
