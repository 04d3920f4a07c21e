use std::io;

use rayon::prelude::*;

use crate::context::{Context, Flag};
use crate::feature::{BatchFeatures, FeatureIndex, InstanceFeatures};
use crate::vocabulary::TagSet;

/// L2 penalty `sum(w^2) / (2 sigma^2)`
pub fn regularization(point: &[f64], sigma: f64) -> f64 {
    let squared: f64 = point.iter().map(|w| w * w).sum();
    squared / (2.0 * sigma * sigma)
}

/// Per-worker accumulator of one evaluation
struct Partial {
    log_norm: f64,
    expected: Vec<f64>,
}

impl Partial {
    fn new(num_features: usize) -> Self {
        Self {
            log_norm: 0.0,
            expected: vec![0.0; num_features],
        }
    }

    fn merge(mut self, other: Partial) -> Self {
        self.log_norm += other.log_norm;
        for (a, b) in self.expected.iter_mut().zip(other.expected) {
            *a += b;
        }
        self
    }
}

/// Regularized conditional log-likelihood of a training batch
///
/// Values and gradients are in the maximization sense; the optimizer adapter
/// negates them.
#[derive(Debug)]
pub struct LogLikelihood<'a> {
    index: &'a FeatureIndex,
    batch: &'a BatchFeatures,
    tags: &'a TagSet,
    sigma: f64,
    parallel: bool,
    /// Gold activation count of every slot
    empirical: Vec<f64>,
}

impl<'a> LogLikelihood<'a> {
    pub fn new(
        index: &'a FeatureIndex,
        batch: &'a BatchFeatures,
        tags: &'a TagSet,
        sigma: f64,
    ) -> io::Result<Self> {
        if sigma.is_nan() || sigma <= 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sigma must be positive",
            ));
        }
        let empirical = empirical_counts(index, batch, tags)?;
        Ok(Self {
            index,
            batch,
            tags,
            sigma,
            parallel: true,
            empirical,
        })
    }

    /// Evaluate instances on the rayon pool or sequentially
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn num_features(&self) -> usize {
        self.index.num_features()
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    pub fn empirical(&self) -> &[f64] {
        &self.empirical
    }

    /// Compute the objective at `point`, writing its gradient into `gradient`
    pub fn evaluate(&self, point: &[f64], gradient: &mut [f64]) -> io::Result<f64> {
        let num_features = self.num_features();
        if point.len() != num_features || gradient.len() != num_features {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "expected {} weights, got {} and a gradient of {}",
                    num_features,
                    point.len(),
                    gradient.len()
                ),
            ));
        }

        let num_tags = self.tags.len();
        let max_len = self.batch.max_len();
        let instances = self.batch.as_slice();
        let total = if self.parallel {
            instances
                .par_iter()
                .fold(
                    || {
                        (
                            Context::new(Flag::MARGINALS, num_tags, max_len),
                            Partial::new(num_features),
                        )
                    },
                    |(mut ctx, mut partial), inst| {
                        self.accumulate(&mut ctx, &mut partial, inst, point);
                        (ctx, partial)
                    },
                )
                .map(|(_, partial)| partial)
                .reduce(|| Partial::new(num_features), Partial::merge)
        } else {
            let mut ctx = Context::new(Flag::MARGINALS, num_tags, max_len);
            let mut partial = Partial::new(num_features);
            for inst in instances {
                self.accumulate(&mut ctx, &mut partial, inst, point);
            }
            partial
        };

        let gold_score: f64 = self
            .empirical
            .iter()
            .zip(point)
            .map(|(count, w)| count * w)
            .sum();
        let value = gold_score - total.log_norm - regularization(point, self.sigma);
        if !value.is_finite() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("objective is not finite: {}", value),
            ));
        }

        let inv_var = 1.0 / (self.sigma * self.sigma);
        for (i, g) in gradient.iter_mut().enumerate() {
            *g = self.empirical[i] - total.expected[i] - point[i] * inv_var;
        }
        if gradient.iter().any(|g| g.is_nan()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "gradient contains NaN",
            ));
        }
        Ok(value)
    }

    fn accumulate(
        &self,
        ctx: &mut Context,
        partial: &mut Partial,
        inst: &InstanceFeatures,
        point: &[f64],
    ) {
        ctx.compute_potentials(inst, self.index, point);
        partial.log_norm += ctx.forward(self.tags);
        ctx.backward(self.tags);
        ctx.expected_counts_into(inst, self.index, self.tags, &mut partial.expected);
    }
}

fn empirical_counts(
    index: &FeatureIndex,
    batch: &BatchFeatures,
    tags: &TagSet,
) -> io::Result<Vec<f64>> {
    let mut counts = vec![0.0; index.num_features()];
    for inst in batch.iter() {
        let gold = inst.gold().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "training features carry no gold tags",
            )
        })?;
        let len = inst.len();
        for (r, contexts) in inst.positions().iter().enumerate() {
            let prev = if r == 0 { tags.start() } else { gold[r - 1] };
            let cur = if r == len { tags.end() } else { gold[r] };
            for &context in contexts {
                if let Some(slot) = index.activated(context, prev, cur) {
                    counts[slot as usize] += 1.0;
                }
            }
        }
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Instance;
    use crate::template::TemplateSet;
    use crate::vocabulary::Vocabulary;

    fn corpus() -> Vec<Instance> {
        vec![
            Instance::tagged(&[("the", "D"), ("cat", "N"), ("sat", "V")]),
            Instance::tagged(&[("a", "D"), ("dog", "N")]),
            Instance::tagged(&[("dogs", "N"), ("bark", "V")]),
            Instance::tagged(&[("sat", "V")]),
        ]
    }

    fn prepare(instances: &[Instance]) -> (FeatureIndex, BatchFeatures, TagSet) {
        let vocab = Vocabulary::build(instances.iter().flat_map(|i| i.tokens().map(|t| t.word())));
        let tags = TagSet::build(instances.iter().flat_map(|i| i.tags().flatten())).unwrap();
        let templates = TemplateSet::parse("U00:%x[0,0]\nU01:%x[-1,0]\nU02:%x[1,0]\nB").unwrap();
        let mut index = FeatureIndex::new();
        let batch = index
            .build_training(instances, &templates, &vocab, &tags)
            .unwrap();
        (index, batch, tags)
    }

    fn random_point(len: usize) -> Vec<f64> {
        // small deterministic LCG
        let mut state = 12345u64;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f64 / (1u64 << 31) as f64 - 0.5) * 0.8
            })
            .collect()
    }

    #[test]
    fn test_invalid_sigma() {
        let instances = corpus();
        let (index, batch, tags) = prepare(&instances);
        for sigma in [0.0, -1.0, f64::NAN] {
            let err = LogLikelihood::new(&index, &batch, &tags, sigma).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_non_finite_point_is_fatal() {
        let instances = corpus();
        let (index, batch, tags) = prepare(&instances);
        for parallel in [false, true] {
            let objective = LogLikelihood::new(&index, &batch, &tags, 1.0)
                .unwrap()
                .with_parallel(parallel);
            let n = objective.num_features();
            let mut gradient = vec![0.0; n];

            let err = objective
                .evaluate(&vec![f64::NAN; n], &mut gradient)
                .unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);

            let mut point = vec![0.0; n];
            point[0] = f64::INFINITY;
            let err = objective.evaluate(&point, &mut gradient).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        }
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let instances = corpus();
        let (index, batch, tags) = prepare(&instances);
        let objective = LogLikelihood::new(&index, &batch, &tags, 2.0)
            .unwrap()
            .with_parallel(false);
        let n = objective.num_features();
        let point = random_point(n);
        let mut gradient = vec![0.0; n];
        objective.evaluate(&point, &mut gradient).unwrap();

        let h = 1e-5;
        let mut scratch = vec![0.0; n];
        for i in 0..n {
            let mut plus = point.clone();
            plus[i] += h;
            let mut minus = point.clone();
            minus[i] -= h;
            let f_plus = objective.evaluate(&plus, &mut scratch).unwrap();
            let f_minus = objective.evaluate(&minus, &mut scratch).unwrap();
            let numeric = (f_plus - f_minus) / (2.0 * h);
            assert!(
                (numeric - gradient[i]).abs() < 1e-4,
                "slot {} ({:?}): analytic {} numeric {}",
                i,
                index.feature_name(i as u32),
                gradient[i],
                numeric
            );
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let instances = corpus();
        let (index, batch, tags) = prepare(&instances);
        let sequential = LogLikelihood::new(&index, &batch, &tags, 1.0)
            .unwrap()
            .with_parallel(false);
        let parallel = LogLikelihood::new(&index, &batch, &tags, 1.0).unwrap();
        let point = random_point(index.num_features());
        let mut g1 = vec![0.0; point.len()];
        let mut g2 = vec![0.0; point.len()];
        let v1 = sequential.evaluate(&point, &mut g1).unwrap();
        let v2 = parallel.evaluate(&point, &mut g2).unwrap();
        assert!((v1 - v2).abs() < 1e-9);
        for (a, b) in g1.iter().zip(&g2) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_likelihood_is_negative_at_zero() {
        let instances = corpus();
        let (index, batch, tags) = prepare(&instances);
        let objective = LogLikelihood::new(&index, &batch, &tags, 1.0).unwrap();
        let point = vec![0.0; index.num_features()];
        let mut gradient = vec![0.0; point.len()];
        let value = objective.evaluate(&point, &mut gradient).unwrap();
        // Uniform model: every instance has probability below one
        assert!(value < 0.0);
        assert!(gradient.iter().all(|g| g.is_finite()));
    }

    #[test]
    fn test_regularization_monotonic() {
        let point = [0.5, -1.0, 0.25];
        let mut last = f64::INFINITY;
        for sigma in [0.1, 0.5, 1.0, 2.0, 10.0] {
            let penalty = regularization(&point, sigma);
            assert!(penalty > 0.0);
            assert!(penalty < last);
            last = penalty;
        }
        assert_eq!(regularization(&[0.0, 0.0], 1.0), 0.0);
    }

    #[test]
    fn test_point_length_mismatch() {
        let instances = corpus();
        let (index, batch, tags) = prepare(&instances);
        let objective = LogLikelihood::new(&index, &batch, &tags, 1.0).unwrap();
        let mut gradient = vec![0.0; 1];
        let err = objective.evaluate(&[0.0], &mut gradient).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
