//! Lattice engine.
//!
//! A lattice over an instance of `len` tokens has `n = len + 2` rows: row 0
//! is the START anchor, rows `1..=len` are the tokens and row `n - 1` is the
//! END anchor. Transition `r` leads from row `r` to row `r + 1` and is scored
//! by the features active at position `r`.
//!
//! All scores are kept in the log domain, so "previous cell times
//! exp(potential)" becomes a sum and the sum-product accumulator is a
//! log-sum-exp.

use std::io;

use bitflags::bitflags;
use ndarray::{s, Array2, Array3};

use crate::feature::{FeatureIndex, InstanceFeatures, ANY_TAG};
use crate::vocabulary::TagSet;

bitflags! {
    /// Functionality flags for contexts
    ///
    /// The flags select the buffers allocated up front; a pass outside the
    /// flags allocates its buffers on first use.
    #[derive(Default)]
    pub struct Flag: u32 {
        /// Max-product pass with backpointers
        const VITERBI = 0x01;
        /// Forward-backward passes and edge marginals
        const MARGINALS = 0x02;
    }
}

/// Backpointer value of cells nothing reaches
const NO_PARENT: u32 = u32::MAX;

/// Direction of a lattice pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Result of combining the candidates of one cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulated {
    pub value: f64,
    pub argmax: Option<u32>,
}

/// Strategy for folding the candidate values of one lattice cell
///
/// Candidates are indexed by tag; NaN marks a transition that does not exist
/// and must not contribute.
pub trait Accumulator {
    fn combine(&self, candidates: &[f64]) -> Accumulated;
}

/// Sum-product in the log domain
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSumExp;

impl Accumulator for LogSumExp {
    fn combine(&self, candidates: &[f64]) -> Accumulated {
        let max = candidates
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(f64::NEG_INFINITY, f64::max);
        if max.is_infinite() {
            return Accumulated {
                value: max,
                argmax: None,
            };
        }
        let sum: f64 = candidates
            .iter()
            .filter(|v| !v.is_nan())
            .map(|&v| (v - max).exp())
            .sum();
        Accumulated {
            value: max + sum.ln(),
            argmax: None,
        }
    }
}

/// Max-product with argmax tracking
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxProduct;

impl Accumulator for MaxProduct {
    fn combine(&self, candidates: &[f64]) -> Accumulated {
        let mut best = Accumulated {
            value: f64::NEG_INFINITY,
            argmax: None,
        };
        for (i, &value) in candidates.iter().enumerate() {
            if value.is_nan() {
                continue;
            }
            if value > best.value {
                best.value = value;
                best.argmax = Some(i as u32);
            }
        }
        best
    }
}

/// Context maintains the lattice workspace for one instance at a time
#[derive(Debug, Clone)]
pub struct Context {
    /// Flag specifying the functionality
    flag: Flag,
    /// The total number of tags, sentinels included
    num_tags: usize,
    /// The number of rows of the current lattice (`len + 2`)
    num_rows: usize,
    /// The number of rows the buffers can hold
    cap_rows: usize,
    /// Log of the partition function of the current instance
    log_norm: f64,
    /// Transition potentials
    ///
    /// `[r][i][j]` is the summed weight of the features active at position
    /// `r` for the tag pair (i, j).
    pub potential: Array3<f64>,
    /// Forward scores
    ///
    /// `[r][t]` is the log of the total score of the paths leaving START
    /// and arriving at (r, t). Holds max-product scores after a Viterbi pass.
    alpha: Array2<f64>,
    /// Backward scores
    ///
    /// `[r][t]` is the log of the total score of the paths leaving (r, t)
    /// and arriving at END.
    beta: Array2<f64>,
    /// Backward edges
    ///
    /// `[r][j]` is the tag at row `r - 1` on the best path arriving at
    /// (r, j). Available only with the `VITERBI` flag.
    backpointer: Array2<u32>,
    /// Edge marginals of one transition (work space)
    marginal: Array2<f64>,
    /// Candidate values of one cell (work space)
    candidates: Vec<f64>,
}

impl Context {
    /// Create a context for `num_tags` tags, sized for `max_len` tokens
    pub fn new(flag: Flag, num_tags: usize, max_len: usize) -> Self {
        let marginal = if flag.contains(Flag::MARGINALS) {
            Array2::zeros((num_tags, num_tags))
        } else {
            Array2::zeros((0, 0))
        };
        let mut ctx = Self {
            flag,
            num_tags,
            num_rows: 0,
            cap_rows: 0,
            log_norm: 0.0,
            potential: Array3::zeros((0, num_tags, num_tags)),
            alpha: Array2::zeros((0, num_tags)),
            beta: Array2::zeros((0, num_tags)),
            backpointer: Array2::zeros((0, 0)),
            marginal,
            candidates: vec![f64::NAN; num_tags],
        };
        ctx.set_len(max_len);
        ctx
    }

    /// Prepare the buffers for an instance of `len` tokens
    pub fn set_len(&mut self, len: usize) {
        let rows = len + 2;
        self.num_rows = rows;
        if self.cap_rows < rows {
            let l = self.num_tags;
            self.potential = Array3::zeros((rows - 1, l, l));
            self.alpha = Array2::zeros((rows, l));
            if self.flag.contains(Flag::MARGINALS) {
                self.beta = Array2::zeros((rows, l));
            }
            if self.flag.contains(Flag::VITERBI) {
                self.backpointer = Array2::from_elem((rows, l), NO_PARENT);
            }
            self.cap_rows = rows;
        }
    }

    /// Allocate the buffers of the functionality in `flag` not yet available
    fn reserve(&mut self, flag: Flag) {
        let missing = flag - self.flag;
        let (rows, l) = (self.cap_rows, self.num_tags);
        if missing.contains(Flag::MARGINALS) {
            self.beta = Array2::zeros((rows, l));
            self.marginal = Array2::zeros((l, l));
        }
        if missing.contains(Flag::VITERBI) {
            self.backpointer = Array2::from_elem((rows, l), NO_PARENT);
        }
        self.flag |= missing;
    }

    /// Number of rows of the current lattice
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Log partition function computed by the last forward pass
    pub fn log_norm(&self) -> f64 {
        self.log_norm
    }

    /// Sum the weights of the active features into the potential table
    pub fn compute_potentials(
        &mut self,
        features: &InstanceFeatures,
        index: &FeatureIndex,
        weights: &[f64],
    ) {
        self.set_len(features.len());
        let transitions = self.num_rows - 1;
        self.potential.slice_mut(s![..transitions, .., ..]).fill(0.0);

        for (r, contexts) in features.positions().iter().enumerate() {
            let mut table = self.potential.slice_mut(s![r, .., ..]);
            for &context in contexts {
                for entry in index.tag_index(context).entries() {
                    let weight = weights[entry.slot as usize];
                    let cur = entry.cur as usize;
                    if entry.prev == ANY_TAG {
                        table.column_mut(cur).map_inplace(|v| *v += weight);
                    } else {
                        table[[entry.prev as usize, cur]] += weight;
                    }
                }
            }
        }
    }

    /// Sum-product forward pass, returns log Z
    pub fn forward(&mut self, tags: &TagSet) -> f64 {
        let n = self.num_rows;
        init_row(&mut self.alpha, 0, tags.start() as usize);
        fill(
            &mut self.alpha,
            &self.potential,
            tags,
            n,
            Direction::Forward,
            &LogSumExp,
            None,
            &mut self.candidates,
        );
        self.log_norm = self.alpha[[n - 1, tags.end() as usize]];
        self.log_norm
    }

    /// Sum-product backward pass, returns log Z
    pub fn backward(&mut self, tags: &TagSet) -> f64 {
        self.reserve(Flag::MARGINALS);
        let n = self.num_rows;
        init_row(&mut self.beta, n - 1, tags.end() as usize);
        fill(
            &mut self.beta,
            &self.potential,
            tags,
            n,
            Direction::Backward,
            &LogSumExp,
            None,
            &mut self.candidates,
        );
        self.beta[[0, tags.start() as usize]]
    }

    /// Max-product pass anchored at START, then backtrack from END
    ///
    /// Returns the tag of every token in order, and the path score.
    pub fn viterbi(&mut self, tags: &TagSet) -> io::Result<(Vec<u32>, f64)> {
        self.reserve(Flag::VITERBI);
        let n = self.num_rows;
        init_row(&mut self.alpha, 0, tags.start() as usize);
        fill(
            &mut self.alpha,
            &self.potential,
            tags,
            n,
            Direction::Forward,
            &MaxProduct,
            Some(&mut self.backpointer),
            &mut self.candidates,
        );

        let end = tags.end() as usize;
        let score = self.alpha[[n - 1, end]];
        let mut path = vec![0u32; n - 2];
        let mut cur = self.backpointer[[n - 1, end]];
        for row in (1..n - 1).rev() {
            if cur == NO_PARENT {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "no path through the lattice",
                ));
            }
            path[row - 1] = cur;
            cur = self.backpointer[[row, cur as usize]];
        }
        Ok((path, score))
    }

    /// Add the expected feature counts of the current instance into `counts`
    ///
    /// Requires the forward and backward passes of the same instance.
    pub fn expected_counts_into(
        &mut self,
        features: &InstanceFeatures,
        index: &FeatureIndex,
        tags: &TagSet,
        counts: &mut [f64],
    ) {
        self.reserve(Flag::MARGINALS);
        let n = self.num_rows;
        let log_z = self.log_norm;
        for (r, contexts) in features.positions().iter().enumerate() {
            self.marginal.fill(0.0);
            for cur in 0..self.num_tags {
                let a = self.alpha[[r, cur]];
                if a == f64::NEG_INFINITY {
                    continue;
                }
                for &next in tags.next(cur as u32, r, n) {
                    let next = next as usize;
                    self.marginal[[cur, next]] =
                        (a + self.potential[[r, cur, next]] + self.beta[[r + 1, next]] - log_z)
                            .exp();
                }
            }

            for &context in contexts {
                for entry in index.tag_index(context).entries() {
                    let cur = entry.cur as usize;
                    let prob = if entry.prev == ANY_TAG {
                        self.marginal.column(cur).sum()
                    } else {
                        self.marginal[[entry.prev as usize, cur]]
                    };
                    counts[entry.slot as usize] += prob;
                }
            }
        }
    }

    /// Forward lattice of the last forward or Viterbi pass
    pub fn alpha(&self) -> &Array2<f64> {
        &self.alpha
    }

    /// Backward lattice of the last backward pass
    pub fn beta(&self) -> &Array2<f64> {
        &self.beta
    }
}

fn init_row(lattice: &mut Array2<f64>, row: usize, tag: usize) {
    lattice.row_mut(row).fill(f64::NEG_INFINITY);
    lattice[[row, tag]] = 0.0;
}

/// Shared recurrence of every lattice pass
#[allow(clippy::too_many_arguments)]
fn fill<A: Accumulator>(
    lattice: &mut Array2<f64>,
    potential: &Array3<f64>,
    tags: &TagSet,
    n: usize,
    direction: Direction,
    accumulator: &A,
    mut backpointer: Option<&mut Array2<u32>>,
    candidates: &mut [f64],
) {
    let rows: Box<dyn Iterator<Item = usize>> = match direction {
        Direction::Forward => Box::new(1..n),
        Direction::Backward => Box::new((0..n - 1).rev()),
    };
    let num_tags = candidates.len();
    for row in rows {
        for cur in 0..num_tags {
            candidates.fill(f64::NAN);
            match direction {
                Direction::Forward => {
                    for &prev in tags.previous(cur as u32, row, n) {
                        let prev = prev as usize;
                        candidates[prev] =
                            lattice[[row - 1, prev]] + potential[[row - 1, prev, cur]];
                    }
                }
                Direction::Backward => {
                    for &next in tags.next(cur as u32, row, n) {
                        let next = next as usize;
                        candidates[next] = lattice[[row + 1, next]] + potential[[row, cur, next]];
                    }
                }
            }
            let result = accumulator.combine(candidates);
            lattice[[row, cur]] = result.value;
            if let Some(bp) = backpointer.as_deref_mut() {
                bp[[row, cur]] = result.argmax.unwrap_or(NO_PARENT);
            }
        }
    }
}
