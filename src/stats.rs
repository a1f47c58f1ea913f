//! Statistical helpers for the beta and maximally-selected-rank split rules.

use statrs::function::gamma::ln_gamma;

/// Rank transform with average ranks for ties (1-based, as in the usual
/// rank statistic).
pub fn rank(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap());

    let mut ranks = vec![0.0; n];
    let mut j = 0;
    while j < n {
        let mut k = j;
        while k + 1 < n && values[order[k + 1]] == values[order[j]] {
            k += 1;
        }
        // positions j..=k hold ties; all get the average rank
        let average = (j + k) as f64 / 2.0 + 1.0;
        for &key in &order[j..=k] {
            ranks[key] = average;
        }
        j = k + 1;
    }
    ranks
}

/// Standard normal density.
pub fn dstdnorm(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Log-likelihood of `y` under a Beta distribution parameterized by mean
/// `mu` and precision `nu`.
pub fn beta_log_likelihood(y: f64, mu: f64, nu: f64) -> f64 {
    ln_gamma(nu) - ln_gamma(mu * nu) - ln_gamma((1.0 - mu) * nu)
        + (mu * nu - 1.0) * y.ln()
        + ((1.0 - mu) * nu - 1.0) * (1.0 - y).ln()
}

/// P-value approximation for the maximum of standardized rank statistics,
/// Lausen & Schumacher (1992). `maxprop` is taken as `1 - min_prop`.
pub fn maxstat_p_value_lausen92(b: f64, min_prop: f64) -> f64 {
    if b < 1.0 {
        return 1.0;
    }
    let max_prop = 1.0 - min_prop;
    let db = dstdnorm(b);
    let p = 4.0 * db / b
        + db * (b - 1.0 / b)
            * ((max_prop * (1.0 - min_prop)) / ((1.0 - max_prop) * min_prop)).ln();
    p.min(1.0)
}

/// Improved p-value approximation, Lausen et al (1994). `node_n_by_candidate`
/// holds the in-node count for each candidate value; the first `n_prefix`
/// candidates are the cut points that were evaluated.
pub fn maxstat_p_value_lausen94(
    b: f64,
    n_sample: usize,
    node_n_by_candidate: &[usize],
    n_prefix: usize,
    min_prop: f64,
) -> f64 {
    // cumulative counts at each evaluated cut point
    let mut m: Vec<f64> = Vec::with_capacity(n_prefix);
    let mut cum = 0usize;
    for &count in node_n_by_candidate.iter().take(n_prefix) {
        if count == 0 {
            continue;
        }
        cum += count;
        m.push(cum as f64);
    }

    let n = n_sample as f64;
    let mut d = 0.0;
    for pair in m.windows(2) {
        let (m1, m2) = (pair[0], pair[1]);
        let t = (1.0 - m1 * (n - m2) / ((n - m1) * m2)).sqrt();
        d += 1.0 / std::f64::consts::PI
            * (-b * b / 2.0).exp()
            * (t - (b * b / 4.0 - 1.0) * (t * t * t) / 6.0);
    }

    maxstat_p_value_lausen92(b, min_prop) - d
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn rank_handles_ties_with_averages() {
        let ranks = rank(&[3.0, 1.0, 4.0, 1.0, 5.0]);
        assert_eq!(ranks, vec![3.0, 1.5, 4.0, 1.5, 5.0]);
    }

    #[test]
    fn rank_of_sorted_sequence_is_identity() {
        let ranks = rank(&[0.1, 0.2, 0.3, 0.4]);
        assert_eq!(ranks, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn beta_log_likelihood_of_uniform_is_zero() {
        // mu = 0.5, nu = 2 is Beta(1, 1), the uniform density
        for &y in &[0.1, 0.5, 0.9] {
            assert_relative_eq!(beta_log_likelihood(y, 0.5, 2.0), 0.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn beta_log_likelihood_matches_closed_form() {
        // mu = 0.5, nu = 4 is Beta(2, 2) with density 6 y (1 - y)
        let expected = (6.0f64 * 0.5 * 0.5).ln();
        assert_relative_eq!(
            beta_log_likelihood(0.5, 0.5, 4.0),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn lausen92_is_one_below_unit_statistic() {
        assert_eq!(maxstat_p_value_lausen92(0.5, 0.1), 1.0);
        let p_small = maxstat_p_value_lausen92(4.0, 0.1);
        let p_large = maxstat_p_value_lausen92(2.0, 0.1);
        assert!(p_small < p_large);
        assert!(p_small > 0.0);
    }

    #[test]
    fn lausen94_refines_lausen92_downward() {
        let counts = vec![3, 2, 4, 1, 5];
        let p92 = maxstat_p_value_lausen92(2.5, 0.1);
        let p94 = maxstat_p_value_lausen94(2.5, 15, &counts, 4, 0.1);
        assert!(p94 <= p92);
    }
}
