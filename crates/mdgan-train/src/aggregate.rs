//! Weighting of the per-discriminator generator losses.
//!
//! Everything here works on plain host-side values. The weights are treated as
//! constants by the trainer, only the losses themselves carry gradients.

/// Added to the nadir point so it stays strictly above every loss.
pub const NADIR_EPS: f32 = 1e-8;

pub fn uniform_weights(n: usize) -> Vec<f32> {
    vec![1.0 / n as f32; n]
}

/// softmax(alpha * values).
pub fn softmax_weights(values: &[f32], alpha: f32) -> Vec<f32> {
    let scaled: Vec<f32> = values.iter().map(|v| v * alpha).collect();
    let max = scaled.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = scaled.iter().map(|v| (v - max).exp()).collect();
    let total: f32 = exps.iter().sum();
    exps.iter().map(|e| e / total).collect()
}

/// Nadir point for hypervolume maximisation: the worst loss pushed out by `slack`.
pub fn nadir_point(losses: &[f32], slack: f32) -> f32 {
    let worst = losses.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    worst * slack + NADIR_EPS
}

/// Effective weights of -sum(log(nadir - l_i)), normalised to sum to one.
pub fn hypervolume_weights(losses: &[f32], nadir: f32) -> Vec<f32> {
    let raw: Vec<f32> = losses.iter().map(|l| 1.0 / (nadir - l)).collect();
    let total: f32 = raw.iter().sum();
    raw.iter().map(|w| w / total).collect()
}

/// Weights of the min-norm point in the convex hull of a set of gradients.
///
/// `gram[i][j]` is the inner product of gradients i and j. Solved with Frank-Wolfe
/// starting from the uniform combination.
pub fn min_norm_weights(gram: &[Vec<f64>], max_iters: usize, tol: f64) -> Vec<f32> {
    let n = gram.len();
    if n == 1 {
        return vec![1.0];
    }

    let mut w = vec![1.0 / n as f64; n];
    for _ in 0..max_iters {
        // Gradient of the squared norm (up to a factor 2) is G w.
        let gw: Vec<f64> = (0..n)
            .map(|i| (0..n).map(|j| gram[i][j] * w[j]).sum())
            .collect();
        let Some(t) = (0..n).min_by(|&a, &b| gw[a].total_cmp(&gw[b])) else {
            break;
        };

        // Line search between the current point v1 and vertex e_t.
        let v1v1: f64 = (0..n).map(|i| w[i] * gw[i]).sum();
        let v1v2 = gw[t];
        let v2v2 = gram[t][t];
        let denom = v1v1 + v2v2 - 2.0 * v1v2;
        if denom <= f64::EPSILON {
            break;
        }
        let gamma = ((v2v2 - v1v2) / denom).clamp(0.0, 1.0);

        let mut change = 0.0;
        for i in 0..n {
            let target = if i == t { 1.0 } else { 0.0 };
            let next = gamma * w[i] + (1.0 - gamma) * target;
            change += (next - w[i]).abs();
            w[i] = next;
        }
        if change < tol {
            break;
        }
    }
    w.into_iter().map(|x| x as f32).collect()
}

/// Tracks the state of the strategies that carry information between steps.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AggregatorState {
    /// Last nadir point (hyper mode).
    pub nadir: Option<f32>,
    /// Loss drop of each discriminator over the last generator update (loss-delta mode).
    pub loss_deltas: Option<Vec<f32>>,
}

impl AggregatorState {
    pub fn loss_delta_weights(&self, n: usize, alpha: f32) -> Vec<f32> {
        match &self.loss_deltas {
            Some(deltas) if deltas.len() == n => softmax_weights(deltas, alpha),
            _ => uniform_weights(n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    fn assert_simplex(w: &[f32]) {
        assert!(w.iter().all(|&x| x >= 0.0), "Negative weight in {w:?}");
        assert_approx_eq!(w.iter().sum::<f32>(), 1.0, 1e-5);
    }

    #[test]
    fn softmax_prefers_larger_values() {
        let w = softmax_weights(&[1.0, 2.0, 3.0], 0.8);
        assert_simplex(&w);
        assert!(w[0] < w[1] && w[1] < w[2]);

        // Zero temperature is a plain average.
        let flat = softmax_weights(&[5.0, -3.0], 0.0);
        assert_approx_eq!(flat[0], 0.5, 1e-6);
    }

    #[test]
    fn softmax_handles_large_inputs() {
        let w = softmax_weights(&[1000.0, 1000.0], 1.0);
        assert_approx_eq!(w[0], 0.5, 1e-6);
        assert_approx_eq!(w[1], 0.5, 1e-6);
    }

    #[test]
    fn nadir_dominates_all_losses() {
        let losses = [0.7, 1.2, 0.3];
        let nadir = nadir_point(&losses, 1.5);
        assert_approx_eq!(nadir, 1.8, 1e-6);
        assert!(losses.iter().all(|&l| nadir > l));
        // Even with all-zero losses the nadir stays strictly above them.
        assert!(nadir_point(&[0.0, 0.0], 1.5) > 0.0);
    }

    #[test]
    fn hypervolume_weights_favour_the_worst_discriminator() {
        let losses = [0.5, 1.0];
        let nadir = nadir_point(&losses, 1.5);
        let w = hypervolume_weights(&losses, nadir);
        assert_simplex(&w);
        // 1/(1.5 - 0.5) vs 1/(1.5 - 1.0), so 1:2.
        assert_approx_eq!(w[1] / w[0], 2.0, 1e-4);
    }

    #[test]
    fn equal_losses_weigh_equally_in_every_mode() {
        let losses = [0.9; 4];
        for w in [
            uniform_weights(4),
            softmax_weights(&losses, 0.8),
            hypervolume_weights(&losses, nadir_point(&losses, 1.5)),
        ] {
            for x in w {
                assert_approx_eq!(x, 0.25, 1e-6);
            }
        }
    }

    #[test]
    fn min_norm_of_orthogonal_gradients_is_uniform() {
        let gram = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let w = min_norm_weights(&gram, 100, 1e-8);
        assert_simplex(&w);
        assert_approx_eq!(w[0], 0.5, 1e-5);
    }

    #[test]
    fn min_norm_picks_the_shorter_of_parallel_gradients() {
        // g1 = [1, 0], g2 = [2, 0].
        let gram = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        let w = min_norm_weights(&gram, 100, 1e-8);
        assert_approx_eq!(w[0], 1.0, 1e-5);
        assert_approx_eq!(w[1], 0.0, 1e-5);
    }

    #[test]
    fn min_norm_balances_unequal_orthogonal_gradients() {
        // |g1|^2 = 1, |g2|^2 = 4: optimum w1 = 4/5.
        let gram = vec![vec![1.0, 0.0], vec![0.0, 4.0]];
        let w = min_norm_weights(&gram, 1000, 1e-10);
        assert_simplex(&w);
        assert_approx_eq!(w[0], 0.8, 1e-3);
    }

    #[test]
    fn single_discriminator_gets_full_weight() {
        assert_eq!(min_norm_weights(&[vec![3.0]], 10, 1e-6), vec![1.0]);
        assert_eq!(softmax_weights(&[0.4], 0.8), vec![1.0]);
        assert_eq!(uniform_weights(1), vec![1.0]);
    }

    #[test]
    fn loss_delta_weights_start_uniform() {
        let mut state = AggregatorState::default();
        assert_eq!(state.loss_delta_weights(2, 0.8), vec![0.5, 0.5]);

        state.loss_deltas = Some(vec![0.1, -0.1]);
        let w = state.loss_delta_weights(2, 0.8);
        assert!(w[0] > w[1]);

        // A stale state with the wrong count falls back to uniform.
        assert_eq!(state.loss_delta_weights(4, 0.8), uniform_weights(4));
    }
}
