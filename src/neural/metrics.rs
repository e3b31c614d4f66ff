// projeto: lstmstocktrain
// file: src/neural/metrics.rs
// Evaluation metrics for inverse-scaled predictions against held-out closes

use log::info;
use serde::{Deserialize, Serialize};

use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
}

impl EvaluationMetrics {
    pub fn compute(predicted: &[f64], actual: &[f64]) -> Result<Self, TrainingError> {
        if predicted.len() != actual.len() {
            return Err(TrainingError::DataProcessing(format!(
                "prediction/actual length mismatch: {} vs {}",
                predicted.len(),
                actual.len()
            )));
        }
        if predicted.is_empty() {
            return Err(TrainingError::DataProcessing(
                "no predictions to evaluate".to_string(),
            ));
        }

        let n = predicted.len() as f64;
        let mse = predicted
            .iter()
            .zip(actual.iter())
            .map(|(p, a)| (p - a).powi(2))
            .sum::<f64>()
            / n;
        let mae = predicted
            .iter()
            .zip(actual.iter())
            .map(|(p, a)| (p - a).abs())
            .sum::<f64>()
            / n;

        // Percentage error is undefined where the actual close is zero.
        let mut mape_sum = 0.0;
        let mut mape_count = 0usize;
        for (p, a) in predicted.iter().zip(actual.iter()) {
            if a.abs() > f64::EPSILON {
                mape_sum += ((p - a) / a).abs();
                mape_count += 1;
            }
        }
        let mape = if mape_count > 0 {
            mape_sum / mape_count as f64 * 100.0
        } else {
            0.0
        };

        Ok(Self {
            rmse: mse.sqrt(),
            mae,
            mape,
        })
    }

    pub fn log_summary(&self, label: &str) {
        info!("📊 Evaluation ({}):", label);
        info!("   ├── RMSE: {:.4}", self.rmse);
        info!("   ├── MAE:  {:.4}", self.mae);
        info!("   └── MAPE: {:.2}%", self.mape);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_perfect_prediction() {
        let actual = vec![10.0, 20.0, 30.0];
        let metrics = EvaluationMetrics::compute(&actual, &actual).unwrap();
        assert!(metrics.rmse.abs() < 1e-12);
        assert!(metrics.mae.abs() < 1e-12);
        assert!(metrics.mape.abs() < 1e-12);
    }

    #[test]
    fn test_metrics_known_values() {
        let predicted = vec![11.0, 19.0];
        let actual = vec![10.0, 20.0];
        let metrics = EvaluationMetrics::compute(&predicted, &actual).unwrap();
        assert!((metrics.rmse - 1.0).abs() < 1e-12);
        assert!((metrics.mae - 1.0).abs() < 1e-12);
        // (10% + 5%) / 2
        assert!((metrics.mape - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_length_mismatch() {
        assert!(EvaluationMetrics::compute(&[1.0], &[1.0, 2.0]).is_err());
        assert!(EvaluationMetrics::compute(&[], &[]).is_err());
    }

    #[test]
    fn test_metrics_skip_zero_actuals_for_mape() {
        let predicted = vec![1.0, 11.0];
        let actual = vec![0.0, 10.0];
        let metrics = EvaluationMetrics::compute(&predicted, &actual).unwrap();
        assert!((metrics.mape - 10.0).abs() < 1e-9);
    }
}
