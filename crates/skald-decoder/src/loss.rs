//! Negative log-likelihood accumulation over teacher-forced targets.

use anyhow::{ensure, Result};
use ndarray::{Array2, ArrayView1};

/// Sums `-log P(target)` over a batch, skipping padding targets.
///
/// Returns the summed loss and the number of tokens that contributed.
pub fn masked_nll(
    log_probs: &Array2<f32>,
    targets: &ArrayView1<u32>,
    pad: u32,
) -> Result<(f32, usize)> {
    ensure!(
        targets.len() == log_probs.nrows(),
        "target batch {} does not match distribution batch {}",
        targets.len(),
        log_probs.nrows()
    );

    let mut loss = 0.0f32;
    let mut n_tokens = 0usize;
    for (b, &target) in targets.iter().enumerate() {
        if target == pad {
            continue;
        }
        ensure!(
            (target as usize) < log_probs.ncols(),
            "target token {} out of range for vocabulary of {}",
            target,
            log_probs.ncols()
        );
        loss -= log_probs[[b, target as usize]];
        n_tokens += 1;
    }

    Ok((loss, n_tokens))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_sums_negative_log_probs() {
        let log_probs = array![[-0.5f32, -1.0, -2.0], [-3.0, -0.25, -1.5]];
        let targets = array![1u32, 2];
        let (loss, n) = masked_nll(&log_probs, &targets.view(), 0).unwrap();
        assert_relative_eq!(loss, 1.0 + 1.5);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_padding_excluded() {
        let log_probs = array![[-0.5f32, -1.0], [-3.0, -0.25]];
        let targets = array![0u32, 1];
        let (loss, n) = masked_nll(&log_probs, &targets.view(), 0).unwrap();
        assert_relative_eq!(loss, 0.25);
        assert_eq!(n, 1);
    }

    #[test]
    fn test_all_padding_gives_zero() {
        let log_probs = array![[-0.5f32, -1.0]];
        let targets = array![0u32];
        let (loss, n) = masked_nll(&log_probs, &targets.view(), 0).unwrap();
        assert_eq!(loss, 0.0);
        assert_eq!(n, 0);
    }

    #[test]
    fn test_out_of_range_target_fails() {
        let log_probs = array![[-0.5f32, -1.0]];
        let targets = array![5u32];
        assert!(masked_nll(&log_probs, &targets.view(), 0).is_err());
    }

    #[test]
    fn test_batch_mismatch_fails() {
        let log_probs = array![[-0.5f32, -1.0]];
        let targets = array![1u32, 1];
        assert!(masked_nll(&log_probs, &targets.view(), 0).is_err());
    }
}
