use std::io;
use std::time::Instant;

use tracing::{debug, info};

use super::objective::LogLikelihood;

/// Line search algorithm for L-BFGS optimization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LineSearchAlgorithm {
    /// More-Thuente line search
    #[default]
    MoreThuente,
    /// Backtracking with Armijo condition
    BacktrackingArmijo,
    /// Backtracking with Wolfe condition
    BacktrackingWolfe,
    /// Backtracking with strong Wolfe condition
    BacktrackingStrongWolfe,
}

impl LineSearchAlgorithm {
    fn as_solver_name(self) -> &'static str {
        match self {
            Self::MoreThuente => "MoreThuente",
            Self::BacktrackingArmijo => "BacktrackingArmijo",
            Self::BacktrackingWolfe => "BacktrackingWolfe",
            Self::BacktrackingStrongWolfe => "BacktrackingStrongWolfe",
        }
    }
}

/// L-BFGS solver parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct LbfgsParams {
    max_iterations: usize,
    epsilon: f64,
    period: usize,
    delta: f64,
    linesearch: LineSearchAlgorithm,
    max_linesearch: usize,
}

impl Default for LbfgsParams {
    fn default() -> Self {
        Self {
            max_iterations: usize::MAX,
            epsilon: 1e-5,
            period: 10,
            delta: 1e-5,
            linesearch: LineSearchAlgorithm::default(),
            max_linesearch: 20,
        }
    }
}

impl LbfgsParams {
    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn set_max_iterations(&mut self, max_iterations: usize) -> io::Result<()> {
        if max_iterations < 1 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_iterations must be at least 1",
            ));
        }
        self.max_iterations = max_iterations;
        Ok(())
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Set the gradient-norm threshold of the convergence test.
    pub fn set_epsilon(&mut self, epsilon: f64) -> io::Result<()> {
        if epsilon.is_nan() || epsilon < 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "epsilon must be non-negative",
            ));
        }
        self.epsilon = epsilon;
        Ok(())
    }

    pub fn period(&self) -> usize {
        self.period
    }

    /// Set the period for delta-based convergence test.
    ///
    /// Zero disables the test.
    pub fn set_period(&mut self, period: usize) {
        self.period = period;
    }

    pub fn delta(&self) -> f64 {
        self.delta
    }

    pub fn set_delta(&mut self, delta: f64) -> io::Result<()> {
        if delta.is_nan() || delta < 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "delta must be non-negative",
            ));
        }
        self.delta = delta;
        Ok(())
    }

    pub fn linesearch(&self) -> LineSearchAlgorithm {
        self.linesearch
    }

    pub fn set_linesearch(&mut self, linesearch: LineSearchAlgorithm) {
        self.linesearch = linesearch;
    }

    pub fn max_linesearch(&self) -> usize {
        self.max_linesearch
    }

    pub fn set_max_linesearch(&mut self, max_linesearch: usize) -> io::Result<()> {
        if max_linesearch == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "max_linesearch must be positive",
            ));
        }
        self.max_linesearch = max_linesearch;
        Ok(())
    }
}

/// Maximize `objective` starting from `start`, returning the final point.
///
/// The solver minimizes, so value and gradient are negated on the way in.
pub fn minimize(
    objective: &LogLikelihood<'_>,
    start: Vec<f64>,
    params: &LbfgsParams,
) -> io::Result<Vec<f64>> {
    let mut point = start;
    let started = Instant::now();

    let evaluate = |x: &[f64], gx: &mut [f64]| -> Result<f64, anyhow::Error> {
        let value = objective.evaluate(x, gx)?;
        for g in gx.iter_mut() {
            *g = -*g;
        }
        Ok(-value)
    };

    let progress = |prgr: &liblbfgs::Progress| -> bool {
        debug!(
            iteration = prgr.niter,
            objective = -prgr.fx,
            gnorm = prgr.gnorm,
            xnorm = prgr.xnorm,
            elapsed = started.elapsed().as_secs_f64(),
            "lbfgs iteration"
        );
        false
    };

    let result = liblbfgs::lbfgs()
        .with_max_iterations(params.max_iterations)
        .with_epsilon(params.epsilon)
        .with_fx_delta(params.delta, params.period)
        .with_max_linesearch(params.max_linesearch)
        .with_linesearch_algorithm(params.linesearch.as_solver_name())
        .minimize(&mut point, evaluate, progress)
        .map_err(|e| io::Error::other(format!("LBFGS error: {}", e)))?;

    info!(
        objective = -result.fx,
        elapsed = started.elapsed().as_secs_f64(),
        "lbfgs finished"
    );
    Ok(point)
}
