//! Base learners for the ensemble
//!
//! Heterogeneous models behind one `Learner` capability: linear
//! (logistic regression), tree ensemble (gradient-boosted stumps),
//! kernel (RBF prototype regression) and neural (single hidden layer).
//! Every learner is deterministic given its config: initialization uses
//! a seeded xorshift generator, never ambient randomness, so a persisted
//! artifact reproduces identical predictions.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};

/// Capability interface for one base learner
pub trait Learner: Send + Sync {
    fn name(&self) -> &str;

    /// Train on a feature matrix and 0/1 labels. Rows of `x` must share
    /// one width and match `y` in length.
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()>;

    /// Probability estimate in [0, 1] for one feature row
    fn predict_proba(&self, x: &[f64]) -> f64;

    /// Per-feature importances, if this learner can explain itself
    fn feature_importances(&self) -> Option<Vec<f64>> {
        None
    }

    /// Portable snapshot for the model artifact
    fn state(&self) -> LearnerState;
}

/// Serializable learner snapshot: config plus fitted weights, so
/// artifacts are portable rather than opaque blobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearnerState {
    Logistic {
        config: LogisticConfig,
        weights: Vec<f64>,
        bias: f64,
    },
    StumpBoost {
        config: StumpBoostConfig,
        base_score: f64,
        stumps: Vec<Stump>,
        importances: Vec<f64>,
    },
    Kernel {
        config: KernelConfig,
        prototypes: Vec<Vec<f64>>,
        targets: Vec<f64>,
        base_rate: f64,
    },
    Mlp {
        config: MlpConfig,
        hidden_weights: Vec<Vec<f64>>,
        hidden_bias: Vec<f64>,
        output_weights: Vec<f64>,
        output_bias: f64,
    },
}

/// Rebuild a fitted learner from its persisted state
pub fn learner_from_state(state: &LearnerState) -> Box<dyn Learner> {
    match state {
        LearnerState::Logistic { config, weights, bias } => Box::new(LogisticLearner {
            config: config.clone(),
            weights: weights.clone(),
            bias: *bias,
        }),
        LearnerState::StumpBoost { config, base_score, stumps, importances } => {
            Box::new(StumpBoostLearner {
                config: config.clone(),
                base_score: *base_score,
                stumps: stumps.clone(),
                importances: importances.clone(),
            })
        }
        LearnerState::Kernel { config, prototypes, targets, base_rate } => {
            Box::new(KernelLearner {
                config: config.clone(),
                prototypes: prototypes.clone(),
                targets: targets.clone(),
                base_rate: *base_rate,
            })
        }
        LearnerState::Mlp { config, hidden_weights, hidden_bias, output_weights, output_bias } => {
            Box::new(MlpLearner {
                config: config.clone(),
                hidden_weights: hidden_weights.clone(),
                hidden_bias: hidden_bias.clone(),
                output_weights: output_weights.clone(),
                output_bias: *output_bias,
            })
        }
    }
}

/// Untrained learner recipe; the ensemble builds fresh instances from
/// these for full fits and for each stacking fold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LearnerSpec {
    Logistic(LogisticConfig),
    StumpBoost(StumpBoostConfig),
    Kernel(KernelConfig),
    Mlp(MlpConfig),
}

impl LearnerSpec {
    pub fn build(&self) -> Box<dyn Learner> {
        match self {
            LearnerSpec::Logistic(cfg) => Box::new(LogisticLearner::new(cfg.clone())),
            LearnerSpec::StumpBoost(cfg) => Box::new(StumpBoostLearner::new(cfg.clone())),
            LearnerSpec::Kernel(cfg) => Box::new(KernelLearner::new(cfg.clone())),
            LearnerSpec::Mlp(cfg) => Box::new(MlpLearner::new(cfg.clone())),
        }
    }

    /// The default heterogeneous set: linear, tree ensemble, kernel, neural
    pub fn default_set() -> Vec<LearnerSpec> {
        vec![
            LearnerSpec::Logistic(LogisticConfig::default()),
            LearnerSpec::StumpBoost(StumpBoostConfig::default()),
            LearnerSpec::Kernel(KernelConfig::default()),
            LearnerSpec::Mlp(MlpConfig::default()),
        ]
    }
}

/// Default heterogeneous learner set for a fresh ensemble
pub fn default_learners() -> Vec<Box<dyn Learner>> {
    LearnerSpec::default_set().iter().map(|s| s.build()).collect()
}

fn validate_matrix(x: &[Vec<f64>], y: &[f64]) -> Result<usize> {
    if x.is_empty() || y.is_empty() {
        return Err(EngineError::Internal("empty training matrix".into()));
    }
    if x.len() != y.len() {
        return Err(EngineError::Internal(format!(
            "matrix/label length mismatch: {} vs {}",
            x.len(),
            y.len()
        )));
    }
    let width = x[0].len();
    if width == 0 || x.iter().any(|row| row.len() != width) {
        return Err(EngineError::Internal("ragged training matrix".into()));
    }
    Ok(width)
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

fn clamp_prob(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(0.0, 1.0)
}

/// Seeded xorshift generator for deterministic initialization
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        Self { state: seed.max(1) }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform in (-scale, scale)
    fn next_symmetric(&mut self, scale: f64) -> f64 {
        let unit = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        (unit * 2.0 - 1.0) * scale
    }
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.5,
            epochs: 400,
            l2: 0.001,
        }
    }
}

/// Linear learner: batch gradient descent on logistic loss
pub struct LogisticLearner {
    config: LogisticConfig,
    weights: Vec<f64>,
    bias: f64,
}

impl LogisticLearner {
    pub fn new(config: LogisticConfig) -> Self {
        Self {
            config,
            weights: Vec::new(),
            bias: 0.0,
        }
    }

    /// Rebuild a fitted instance from persisted parameters
    pub fn from_parts(config: LogisticConfig, weights: Vec<f64>, bias: f64) -> Self {
        Self { config, weights, bias }
    }
}

impl Learner for LogisticLearner {
    fn name(&self) -> &str {
        "logistic"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let width = validate_matrix(x, y)?;
        let n = x.len() as f64;
        let mut weights = vec![0.0; width];
        let mut bias = 0.0;

        for _ in 0..self.config.epochs {
            let mut grad_w = vec![0.0; width];
            let mut grad_b = 0.0;
            for (row, target) in x.iter().zip(y) {
                let z = bias + row.iter().zip(&weights).map(|(v, w)| v * w).sum::<f64>();
                let residual = sigmoid(z) - target;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += residual * v;
                }
                grad_b += residual;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= self.config.learning_rate * (g / n + self.config.l2 * *w);
            }
            bias -= self.config.learning_rate * grad_b / n;
        }

        self.weights = weights;
        self.bias = bias;
        Ok(())
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.weights.is_empty() || self.weights.len() != x.len() {
            return 0.5;
        }
        let z = self.bias + x.iter().zip(&self.weights).map(|(v, w)| v * w).sum::<f64>();
        clamp_prob(sigmoid(z))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        if self.weights.is_empty() {
            return None;
        }
        let total: f64 = self.weights.iter().map(|w| w.abs()).sum();
        if total == 0.0 {
            return None;
        }
        Some(self.weights.iter().map(|w| w.abs() / total).collect())
    }

    fn state(&self) -> LearnerState {
        LearnerState::Logistic {
            config: self.config.clone(),
            weights: self.weights.clone(),
            bias: self.bias,
        }
    }
}

// ---------------------------------------------------------------------------
// Gradient-boosted decision stumps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StumpBoostConfig {
    pub rounds: usize,
    pub shrinkage: f64,
    /// Candidate split quantiles per feature
    pub split_candidates: usize,
}

impl Default for StumpBoostConfig {
    fn default() -> Self {
        Self {
            rounds: 40,
            shrinkage: 0.3,
            split_candidates: 8,
        }
    }
}

/// One decision stump: score_left if x[feature] <= threshold else score_right
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stump {
    pub feature: usize,
    pub threshold: f64,
    pub left: f64,
    pub right: f64,
}

/// Tree-ensemble learner: boosted stumps on the logistic-loss gradient
pub struct StumpBoostLearner {
    config: StumpBoostConfig,
    base_score: f64,
    stumps: Vec<Stump>,
    importances: Vec<f64>,
}

impl StumpBoostLearner {
    pub fn new(config: StumpBoostConfig) -> Self {
        Self {
            config,
            base_score: 0.0,
            stumps: Vec::new(),
            importances: Vec::new(),
        }
    }

    fn raw_score(&self, x: &[f64]) -> f64 {
        let mut score = self.base_score;
        for stump in &self.stumps {
            let value = x.get(stump.feature).copied().unwrap_or(0.0);
            score += if value <= stump.threshold {
                stump.left
            } else {
                stump.right
            };
        }
        score
    }

    /// Best stump for the current residuals, by squared-error reduction
    fn fit_stump(&self, x: &[Vec<f64>], residuals: &[f64]) -> Option<(Stump, f64)> {
        let width = x[0].len();
        let n = x.len() as f64;
        let total_sum: f64 = residuals.iter().sum();
        let baseline_sse: f64 = {
            let mean = total_sum / n;
            residuals.iter().map(|r| (r - mean).powi(2)).sum()
        };

        let mut best: Option<(Stump, f64)> = None;
        for feature in 0..width {
            let mut values: Vec<f64> = x.iter().map(|row| row[feature]).collect();
            values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
            values.dedup();
            if values.len() < 2 {
                continue;
            }

            for k in 1..=self.config.split_candidates {
                let idx = (values.len() - 1) * k / (self.config.split_candidates + 1);
                let threshold = values[idx.min(values.len() - 2)];

                let mut left_sum = 0.0;
                let mut left_n = 0.0;
                for (row, r) in x.iter().zip(residuals) {
                    if row[feature] <= threshold {
                        left_sum += r;
                        left_n += 1.0;
                    }
                }
                let right_n = n - left_n;
                if left_n == 0.0 || right_n == 0.0 {
                    continue;
                }
                let left_mean = left_sum / left_n;
                let right_mean = (total_sum - left_sum) / right_n;

                let mut sse = 0.0;
                for (row, r) in x.iter().zip(residuals) {
                    let mean = if row[feature] <= threshold {
                        left_mean
                    } else {
                        right_mean
                    };
                    sse += (r - mean).powi(2);
                }
                let gain = baseline_sse - sse;
                if best.as_ref().map(|(_, g)| gain > *g).unwrap_or(gain > 0.0) {
                    best = Some((
                        Stump {
                            feature,
                            threshold,
                            left: left_mean,
                            right: right_mean,
                        },
                        gain,
                    ));
                }
            }
        }
        best
    }
}

impl Learner for StumpBoostLearner {
    fn name(&self) -> &str {
        "stump_boost"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let width = validate_matrix(x, y)?;
        let n = x.len() as f64;

        let positive_rate = (y.iter().sum::<f64>() / n).clamp(0.01, 0.99);
        self.base_score = (positive_rate / (1.0 - positive_rate)).ln();
        self.stumps.clear();
        self.importances = vec![0.0; width];

        let mut scores = vec![self.base_score; x.len()];
        for _ in 0..self.config.rounds {
            let residuals: Vec<f64> = scores
                .iter()
                .zip(y)
                .map(|(s, target)| target - sigmoid(*s))
                .collect();

            let Some((stump, gain)) = self.fit_stump(x, &residuals) else {
                break;
            };
            self.importances[stump.feature] += gain.max(0.0);

            let scaled = Stump {
                left: stump.left * self.config.shrinkage,
                right: stump.right * self.config.shrinkage,
                ..stump
            };
            for (score, row) in scores.iter_mut().zip(x) {
                *score += if row[scaled.feature] <= scaled.threshold {
                    scaled.left
                } else {
                    scaled.right
                };
            }
            self.stumps.push(scaled);
        }

        if self.stumps.is_empty() {
            return Err(EngineError::Internal(
                "no informative split found for stump boosting".into(),
            ));
        }
        Ok(())
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.stumps.is_empty() {
            return 0.5;
        }
        clamp_prob(sigmoid(self.raw_score(x)))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        let total: f64 = self.importances.iter().sum();
        if total <= 0.0 {
            return None;
        }
        Some(self.importances.iter().map(|g| g / total).collect())
    }

    fn state(&self) -> LearnerState {
        LearnerState::StumpBoost {
            config: self.config.clone(),
            base_score: self.base_score,
            stumps: self.stumps.clone(),
            importances: self.importances.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// RBF kernel prototype regression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// Prototypes retained from the training set
    pub max_prototypes: usize,
    /// RBF bandwidth
    pub bandwidth: f64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_prototypes: 200,
            bandwidth: 0.6,
        }
    }
}

/// Kernel learner: Nadaraya-Watson regression over stored prototypes
pub struct KernelLearner {
    config: KernelConfig,
    prototypes: Vec<Vec<f64>>,
    targets: Vec<f64>,
    base_rate: f64,
}

impl KernelLearner {
    pub fn new(config: KernelConfig) -> Self {
        Self {
            config,
            prototypes: Vec::new(),
            targets: Vec::new(),
            base_rate: 0.5,
        }
    }
}

impl Learner for KernelLearner {
    fn name(&self) -> &str {
        "rbf_kernel"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        validate_matrix(x, y)?;
        self.base_rate = y.iter().sum::<f64>() / y.len() as f64;

        // Deterministic even subsample when the set exceeds the prototype cap
        let stride = (x.len() / self.config.max_prototypes.max(1)).max(1);
        self.prototypes = x.iter().step_by(stride).cloned().collect();
        self.targets = y.iter().step_by(stride).copied().collect();
        Ok(())
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.prototypes.is_empty() {
            return 0.5;
        }
        let two_sigma_sq = 2.0 * self.config.bandwidth * self.config.bandwidth;
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (proto, target) in self.prototypes.iter().zip(&self.targets) {
            let dist_sq: f64 = proto
                .iter()
                .zip(x)
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
            let k = (-dist_sq / two_sigma_sq).exp();
            weighted += k * target;
            total += k;
        }
        if total < 1e-9 {
            // Query far from every prototype: fall back to the base rate
            return clamp_prob(self.base_rate);
        }
        clamp_prob(weighted / total)
    }

    fn state(&self) -> LearnerState {
        LearnerState::Kernel {
            config: self.config.clone(),
            prototypes: self.prototypes.clone(),
            targets: self.targets.clone(),
            base_rate: self.base_rate,
        }
    }
}

// ---------------------------------------------------------------------------
// Single-hidden-layer MLP
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpConfig {
    pub hidden: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub seed: u64,
}

impl Default for MlpConfig {
    fn default() -> Self {
        Self {
            hidden: 8,
            learning_rate: 0.3,
            epochs: 300,
            seed: 42,
        }
    }
}

/// Neural learner: one tanh hidden layer, sigmoid output, batch GD
pub struct MlpLearner {
    config: MlpConfig,
    hidden_weights: Vec<Vec<f64>>,
    hidden_bias: Vec<f64>,
    output_weights: Vec<f64>,
    output_bias: f64,
}

impl MlpLearner {
    pub fn new(config: MlpConfig) -> Self {
        Self {
            config,
            hidden_weights: Vec::new(),
            hidden_bias: Vec::new(),
            output_weights: Vec::new(),
            output_bias: 0.0,
        }
    }

    fn forward(&self, x: &[f64]) -> (Vec<f64>, f64) {
        let hidden: Vec<f64> = self
            .hidden_weights
            .iter()
            .zip(&self.hidden_bias)
            .map(|(row, b)| {
                (b + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>()).tanh()
            })
            .collect();
        let z = self.output_bias
            + hidden
                .iter()
                .zip(&self.output_weights)
                .map(|(h, w)| h * w)
                .sum::<f64>();
        (hidden, sigmoid(z))
    }
}

impl Learner for MlpLearner {
    fn name(&self) -> &str {
        "mlp"
    }

    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<()> {
        let width = validate_matrix(x, y)?;
        let n = x.len() as f64;
        let mut rng = XorShift64::new(self.config.seed);
        let scale = (1.0 / width as f64).sqrt();

        self.hidden_weights = (0..self.config.hidden)
            .map(|_| (0..width).map(|_| rng.next_symmetric(scale)).collect())
            .collect();
        self.hidden_bias = vec![0.0; self.config.hidden];
        self.output_weights = (0..self.config.hidden)
            .map(|_| rng.next_symmetric(scale))
            .collect();
        self.output_bias = 0.0;

        let lr = self.config.learning_rate;
        for _ in 0..self.config.epochs {
            let mut grad_hw = vec![vec![0.0; width]; self.config.hidden];
            let mut grad_hb = vec![0.0; self.config.hidden];
            let mut grad_ow = vec![0.0; self.config.hidden];
            let mut grad_ob = 0.0;

            for (row, target) in x.iter().zip(y) {
                let (hidden, out) = self.forward(row);
                let delta_out = out - target;
                grad_ob += delta_out;
                for j in 0..self.config.hidden {
                    grad_ow[j] += delta_out * hidden[j];
                    let delta_hidden =
                        delta_out * self.output_weights[j] * (1.0 - hidden[j] * hidden[j]);
                    grad_hb[j] += delta_hidden;
                    for (g, v) in grad_hw[j].iter_mut().zip(row) {
                        *g += delta_hidden * v;
                    }
                }
            }

            self.output_bias -= lr * grad_ob / n;
            for j in 0..self.config.hidden {
                self.output_weights[j] -= lr * grad_ow[j] / n;
                self.hidden_bias[j] -= lr * grad_hb[j] / n;
                for (w, g) in self.hidden_weights[j].iter_mut().zip(&grad_hw[j]) {
                    *w -= lr * g / n;
                }
            }
        }
        Ok(())
    }

    fn predict_proba(&self, x: &[f64]) -> f64 {
        if self.hidden_weights.is_empty()
            || self.hidden_weights[0].len() != x.len()
        {
            return 0.5;
        }
        clamp_prob(self.forward(x).1)
    }

    fn state(&self) -> LearnerState {
        LearnerState::Mlp {
            config: self.config.clone(),
            hidden_weights: self.hidden_weights.clone(),
            hidden_bias: self.hidden_bias.clone(),
            output_weights: self.output_weights.clone(),
            output_bias: self.output_bias,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Linearly separable toy set: label follows the first feature
    fn toy_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let v = i as f64 / n as f64;
            x.push(vec![v, 1.0 - v, 0.5]);
            y.push(if v > 0.5 { 1.0 } else { 0.0 });
        }
        (x, y)
    }

    fn assert_separates(learner: &dyn Learner) {
        let high = learner.predict_proba(&[0.9, 0.1, 0.5]);
        let low = learner.predict_proba(&[0.1, 0.9, 0.5]);
        assert!(
            high > low,
            "{}: expected {high} > {low}",
            learner.name()
        );
        assert!((0.0..=1.0).contains(&high));
        assert!((0.0..=1.0).contains(&low));
    }

    #[test]
    fn test_logistic_learns_separable() {
        let (x, y) = toy_data(80);
        let mut learner = LogisticLearner::new(LogisticConfig::default());
        learner.fit(&x, &y).unwrap();
        assert_separates(&learner);

        let importances = learner.feature_importances().unwrap();
        assert_eq!(importances.len(), 3);
        let sum: f64 = importances.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_stump_boost_learns_separable() {
        let (x, y) = toy_data(80);
        let mut learner = StumpBoostLearner::new(StumpBoostConfig::default());
        learner.fit(&x, &y).unwrap();
        assert_separates(&learner);

        // Gain should concentrate on the informative first feature
        let importances = learner.feature_importances().unwrap();
        assert!(importances[0] > importances[2]);
    }

    #[test]
    fn test_kernel_learns_separable() {
        let (x, y) = toy_data(80);
        let mut learner = KernelLearner::new(KernelConfig::default());
        learner.fit(&x, &y).unwrap();
        assert_separates(&learner);
        assert!(learner.feature_importances().is_none());
    }

    #[test]
    fn test_kernel_far_query_falls_back_to_base_rate() {
        let (x, y) = toy_data(40);
        let mut learner = KernelLearner::new(KernelConfig {
            bandwidth: 0.05,
            ..Default::default()
        });
        learner.fit(&x, &y).unwrap();
        let p = learner.predict_proba(&[1000.0, -1000.0, 1000.0]);
        assert!((p - learner.base_rate).abs() < 1e-9);
    }

    #[test]
    fn test_mlp_learns_separable() {
        let (x, y) = toy_data(80);
        let mut learner = MlpLearner::new(MlpConfig::default());
        learner.fit(&x, &y).unwrap();
        assert_separates(&learner);
    }

    #[test]
    fn test_mlp_deterministic_given_seed() {
        let (x, y) = toy_data(60);
        let mut a = MlpLearner::new(MlpConfig::default());
        let mut b = MlpLearner::new(MlpConfig::default());
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        let probe = [0.3, 0.7, 0.5];
        assert_eq!(a.predict_proba(&probe), b.predict_proba(&probe));
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        let mut learner = LogisticLearner::new(LogisticConfig::default());
        assert!(learner.fit(&[], &[]).is_err());
        assert!(learner
            .fit(&[vec![1.0], vec![2.0]], &[1.0])
            .is_err());
        assert!(learner
            .fit(&[vec![1.0, 2.0], vec![3.0]], &[1.0, 0.0])
            .is_err());
    }

    #[test]
    fn test_state_round_trip_identical_predictions() {
        let (x, y) = toy_data(80);
        for mut learner in default_learners() {
            learner.fit(&x, &y).unwrap();
            let state = learner.state();
            let json = serde_json::to_string(&state).unwrap();
            let back: LearnerState = serde_json::from_str(&json).unwrap();
            let restored = learner_from_state(&back);
            for probe in [[0.2, 0.8, 0.5], [0.7, 0.3, 0.5]] {
                assert_eq!(
                    learner.predict_proba(&probe),
                    restored.predict_proba(&probe),
                    "round trip diverged for {}",
                    learner.name()
                );
            }
        }
    }

    #[test]
    fn test_unfitted_learners_return_neutral() {
        let probe = [0.5, 0.5, 0.5];
        assert_eq!(LogisticLearner::new(Default::default()).predict_proba(&probe), 0.5);
        assert_eq!(StumpBoostLearner::new(Default::default()).predict_proba(&probe), 0.5);
        assert_eq!(KernelLearner::new(Default::default()).predict_proba(&probe), 0.5);
        assert_eq!(MlpLearner::new(Default::default()).predict_proba(&probe), 0.5);
    }
}
