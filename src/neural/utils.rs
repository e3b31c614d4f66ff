// projeto: lstmstocktrain
// file: src/neural/utils.rs
// Error handling and small validation helpers shared by the pipeline stages

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Data acquisition error: {0}")]
    DataAcquisition(String),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Model error: {0}")]
    Model(#[from] candle_core::Error),

    #[error("Export error: {0}")]
    Export(String),

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}

impl From<toml::de::Error> for TrainingError {
    fn from(err: toml::de::Error) -> Self {
        TrainingError::Configuration(err.to_string())
    }
}

/// Rejects empty series and series containing NaN or infinite values before
/// they reach scaling or the training loop.
pub fn validate_series(data: &[f64], name: &str) -> Result<(), TrainingError> {
    if data.is_empty() {
        return Err(TrainingError::DataProcessing(format!("{} is empty", name)));
    }

    for (i, &value) in data.iter().enumerate() {
        if value.is_nan() {
            return Err(TrainingError::DataProcessing(
                format!("{} contains NaN at position {}", name, i)
            ));
        }
        if value.is_infinite() {
            return Err(TrainingError::DataProcessing(
                format!("{} contains infinite value at position {}", name, i)
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_series_validation() {
        let valid = vec![1.0, 2.0, 3.0];
        assert!(validate_series(&valid, "closes").is_ok());

        let with_nan = vec![1.0, f64::NAN, 3.0];
        assert!(validate_series(&with_nan, "closes").is_err());

        let with_inf = vec![1.0, f64::INFINITY, 3.0];
        assert!(validate_series(&with_inf, "closes").is_err());

        let empty: Vec<f64> = vec![];
        assert!(validate_series(&empty, "closes").is_err());
    }
}
