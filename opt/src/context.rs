use std::sync::Arc;

use mtac::dataflow::{solve, ConstMap, ConstantPropagation, LiveSet, Liveness, Solution};
use mtac::{Dominators, Fundef, Loops, Result, Statistics};
use util::{Label, Set};

use crate::Config;

/// What a pass may have made stale when it reports a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invalidates {
    // blocks or edges
    pub cfg: bool,
    // quadruples only
    pub values: bool,
}

impl Invalidates {
    pub const ALL: Invalidates = Invalidates {
        cfg: true,
        values: true,
    };
    pub const VALUES: Invalidates = Invalidates {
        cfg: false,
        values: true,
    };
}

#[derive(Default)]
struct Analyses {
    dominators: Option<Arc<Dominators>>,
    loops: Option<Arc<Loops>>,
    liveness: Option<Arc<Solution<LiveSet>>>,
    constants: Option<Arc<Solution<ConstMap>>>,
}

/// State of one function's optimization run.
pub struct PassContext {
    pub config: Config,
    pub stats: Statistics,
    analyses: Analyses,
    // headers of loops already unrolled partially
    pub(crate) unrolled: Set<Label>,
}

impl PassContext {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            stats: Statistics::new(),
            analyses: Analyses::default(),
            unrolled: Set::default(),
        }
    }

    pub fn dominators(&mut self, f: &Fundef) -> Result<Arc<Dominators>> {
        if let Some(d) = &self.analyses.dominators {
            return Ok(d.clone());
        }
        let d = Arc::new(Dominators::compute(f)?);
        self.analyses.dominators = Some(d.clone());
        Ok(d)
    }

    pub fn loops(&mut self, f: &Fundef) -> Result<Arc<Loops>> {
        if let Some(l) = &self.analyses.loops {
            return Ok(l.clone());
        }
        let dom = self.dominators(f)?;
        let l = Arc::new(Loops::detect(f, &dom));
        self.analyses.loops = Some(l.clone());
        Ok(l)
    }

    pub fn liveness(&mut self, f: &Fundef) -> Result<Arc<Solution<LiveSet>>> {
        if let Some(l) = &self.analyses.liveness {
            return Ok(l.clone());
        }
        let l = Arc::new(solve(&Liveness::new(f), f)?);
        self.analyses.liveness = Some(l.clone());
        Ok(l)
    }

    pub fn constants(&mut self, f: &Fundef) -> Result<Arc<Solution<ConstMap>>> {
        if let Some(c) = &self.analyses.constants {
            return Ok(c.clone());
        }
        let c = Arc::new(solve(&ConstantPropagation::new(f), f)?);
        self.analyses.constants = Some(c.clone());
        Ok(c)
    }

    pub fn invalidate(&mut self, inv: Invalidates) {
        if inv.cfg {
            self.analyses.dominators = None;
            self.analyses.loops = None;
        }
        if inv.cfg || inv.values {
            self.analyses.liveness = None;
            self.analyses.constants = None;
        }
    }
}
