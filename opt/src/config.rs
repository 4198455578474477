#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    // 0: nothing, 1: local and global scalar passes, 2: loop passes as well
    pub level: usize,
    pub max_rounds: usize,
    // complete unrolling only below this trip count
    pub unroll_limit: usize,
    // quadruples an unrolled loop may grow to
    pub unroll_size: usize,
    pub unswitch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            level: 2,
            max_rounds: 100,
            unroll_limit: 8,
            unroll_size: 128,
            unswitch_size: 64,
        }
    }
}

impl Config {
    pub fn disabled() -> Self {
        Self {
            level: 0,
            ..Self::default()
        }
    }
}
