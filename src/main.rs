// projeto: lstmstocktrain
// file: src/main.rs
// End-to-end pipeline: fetch daily closes, train a stacked LSTM on 60-day
// windows, export the model twice and push the artifacts to the object store

mod neural;

use candle_core::Device;
use chrono::{NaiveDate, Utc};
use log::{error, info, warn};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Instant;

use crate::neural::data::{business_day_closes, MinMaxScaler, WindowedDataset, YahooClient};
use crate::neural::export::{export_onnx, save_native, ExportManifest};
use crate::neural::metrics::EvaluationMetrics;
use crate::neural::model::{build_model, num_parameters, train, NetworkConfig, TrainOptions};
use crate::neural::storage::ObjectStore;
use crate::neural::utils::{validate_series, TrainingError};

const CONFIG_FILE: &str = "stocks-train.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct TrainConfig {
    ticker: String,
    start_date: String,
    end_date: String,
    eval_start_date: String,
    eval_end_date: String,
    window: usize,
    hidden_size: usize,
    num_layers: usize,
    dropout: f64,
    epochs: usize,
    batch_size: usize,
    learning_rate: f64,
    export_dir: String,
    model_version: String,
    onnx_file: String,
    bucket: String,
    onnx_key: String,
    dir_key_prefix: String,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            ticker: "IBM".to_string(),
            start_date: "1980-12-01".to_string(),
            end_date: "2018-12-31".to_string(),
            eval_start_date: "2019-01-01".to_string(),
            eval_end_date: "2019-04-10".to_string(),
            window: 60,
            hidden_size: 50,
            num_layers: 4,
            dropout: 0.2,
            epochs: 2,
            batch_size: 32,
            learning_rate: 0.001,
            export_dir: "scratch/stocks".to_string(),
            model_version: "1".to_string(),
            onnx_file: "stocks.onnx".to_string(),
            bucket: "models".to_string(),
            onnx_key: "stocks.onnx".to_string(),
            dir_key_prefix: "stocks".to_string(),
        }
    }
}

/// The four configured dates, parsed once during validation.
#[derive(Debug, Clone, Copy)]
struct DateRanges {
    start: NaiveDate,
    end: NaiveDate,
    eval_start: NaiveDate,
    eval_end: NaiveDate,
}

impl TrainConfig {
    /// Defaults, optionally overridden from `stocks-train.toml` in the
    /// working directory.
    fn load() -> Result<(Self, DateRanges), TrainingError> {
        let config: Self = if Path::new(CONFIG_FILE).exists() {
            info!("📄 Loading configuration overrides from {}", CONFIG_FILE);
            toml::from_str(&fs::read_to_string(CONFIG_FILE)?)?
        } else {
            Self::default()
        };
        let dates = config.validate()?;
        Ok((config, dates))
    }

    fn validate(&self) -> Result<DateRanges, TrainingError> {
        if self.window == 0 {
            return Err(TrainingError::Configuration("window must be positive".to_string()));
        }
        if self.num_layers == 0 {
            return Err(TrainingError::Configuration("num_layers must be positive".to_string()));
        }
        if self.hidden_size == 0 {
            return Err(TrainingError::Configuration("hidden_size must be positive".to_string()));
        }
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(TrainingError::Configuration(
                "epochs and batch_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(TrainingError::Configuration(
                "dropout must be in [0, 1)".to_string(),
            ));
        }
        if self.learning_rate <= 0.0 {
            return Err(TrainingError::Configuration(
                "learning_rate must be positive".to_string(),
            ));
        }
        let start = parse_date(&self.start_date, "start_date")?;
        let end = parse_date(&self.end_date, "end_date")?;
        if start >= end {
            return Err(TrainingError::Configuration(
                "start_date must precede end_date".to_string(),
            ));
        }
        let eval_start = parse_date(&self.eval_start_date, "eval_start_date")?;
        let eval_end = parse_date(&self.eval_end_date, "eval_end_date")?;
        if eval_start >= eval_end {
            return Err(TrainingError::Configuration(
                "eval_start_date must precede eval_end_date".to_string(),
            ));
        }
        Ok(DateRanges {
            start,
            end,
            eval_start,
            eval_end,
        })
    }

    fn network(&self) -> NetworkConfig {
        NetworkConfig {
            window: self.window,
            hidden_size: self.hidden_size,
            num_layers: self.num_layers,
            dropout: self.dropout,
        }
    }
}

fn parse_date(value: &str, field: &str) -> Result<NaiveDate, TrainingError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| TrainingError::Configuration(format!("invalid {}: {}", field, e)))
}

fn setup_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_timestamp_secs()
        .init();
}

async fn run() -> Result<(), TrainingError> {
    let (config, dates) = TrainConfig::load()?;
    let device = Device::Cpu;
    let client = YahooClient::new()?;

    // Stage 1: data acquisition
    info!("📡 Fetching {} daily bars {} → {}", config.ticker, dates.start, dates.end);
    let records = client
        .fetch_daily(&config.ticker, dates.start, dates.end)
        .await?;

    // Stage 2: preprocessing and windowing
    let closes = business_day_closes(&records, dates.end)?;
    validate_series(&closes, "training closes")?;
    info!("✅ {} business-day closes after forward-fill", closes.len());

    let scaler = MinMaxScaler::fit(&closes)?;
    let scaled = scaler.transform(&closes);
    let dataset = WindowedDataset::from_series(&scaled, config.window);
    info!(
        "🔧 Created {} training sequences (window {})",
        dataset.len, config.window
    );
    let (x, y) = dataset.to_tensors(&device)?;

    // Stage 3: model and training
    let net_config = config.network();
    let (model, varmap) = build_model(&net_config, &device)?;
    info!("🛠️ Model ready with {} parameters", num_parameters(&varmap));

    let training_start = Instant::now();
    let losses = train(
        &model,
        &varmap,
        &x,
        &y,
        &TrainOptions {
            epochs: config.epochs,
            batch_size: config.batch_size,
            learning_rate: config.learning_rate,
        },
    )?;
    info!(
        "⏱️ Total training time {:.2}s",
        training_start.elapsed().as_secs_f64()
    );

    // Stage 4: export in both formats
    let bundle_dir = Path::new(&config.export_dir).join(&config.model_version);
    let manifest = ExportManifest {
        ticker: config.ticker.clone(),
        network: net_config.clone(),
        scaler: scaler.clone(),
        epochs: config.epochs,
        final_loss: losses.last().copied().unwrap_or(0.0),
        training_losses: losses,
        trained_at: Utc::now(),
    };
    save_native(&varmap, &manifest, &bundle_dir)?;
    export_onnx(&varmap, &net_config, Path::new(&config.onnx_file))?;

    // Stage 5: held-out evaluation. The fitted scaler is reused as-is; the
    // predictions are logged, not persisted.
    info!("📡 Fetching evaluation range {} → {}", dates.eval_start, dates.eval_end);
    let eval_records = client
        .fetch_daily(&config.ticker, dates.eval_start, dates.eval_end)
        .await?;
    let eval_closes = business_day_closes(&eval_records, dates.eval_end)?;
    validate_series(&eval_closes, "evaluation closes")?;

    let mut combined = closes;
    combined.extend_from_slice(&eval_closes);
    let tail_len = eval_closes.len() + config.window;
    if combined.len() < tail_len {
        return Err(TrainingError::DataProcessing(
            "not enough history before the evaluation range".to_string(),
        ));
    }
    let tail = &combined[combined.len() - tail_len..];
    let scaled_tail = scaler.transform(tail);
    let eval_dataset = WindowedDataset::from_series(&scaled_tail, config.window);
    let (x_eval, _) = eval_dataset.to_tensors(&device)?;

    let scaled_predictions = model.predict(&x_eval)?;
    let scaled_predictions: Vec<f64> = scaled_predictions.iter().map(|&v| v as f64).collect();
    let predicted = scaler.inverse_transform(&scaled_predictions);
    let metrics = EvaluationMetrics::compute(&predicted, &eval_closes)?;
    metrics.log_summary(&config.ticker);

    // Stage 6: artifact upload
    let store = ObjectStore::connect().await;
    store.ensure_bucket(&config.bucket).await?;

    let mut reports = vec![
        store
            .upload_file(&config.bucket, &config.onnx_key, Path::new(&config.onnx_file))
            .await,
    ];
    reports.extend(
        store
            .upload_dir(
                &config.bucket,
                &config.dir_key_prefix,
                Path::new(&config.export_dir),
            )
            .await?,
    );

    let failed: Vec<_> = reports.iter().filter(|r| !r.ok()).collect();
    if failed.is_empty() {
        info!(
            "✅ Uploaded {} objects to bucket {}",
            reports.len(),
            config.bucket
        );
    } else {
        warn!(
            "⚠️ {}/{} uploads failed; artifacts in bucket {} are incomplete",
            failed.len(),
            reports.len(),
            config.bucket
        );
        for report in failed {
            warn!("   ├── {}", report.key);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    setup_logging();
    let started = Instant::now();
    info!(
        "🚀 LSTM stock training pipeline started at {}",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    );

    match run().await {
        Ok(()) => info!(
            "✅ Pipeline finished in {:.2}s",
            started.elapsed().as_secs_f64()
        ),
        Err(e) => {
            error!("❌ Pipeline failed: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainConfig::default();
        let dates = config.validate().unwrap();
        assert_eq!(dates.start, NaiveDate::from_ymd_opt(1980, 12, 1).unwrap());
        assert_eq!(dates.end, NaiveDate::from_ymd_opt(2018, 12, 31).unwrap());
        assert_eq!(dates.eval_start, NaiveDate::from_ymd_opt(2019, 1, 1).unwrap());
        assert_eq!(dates.eval_end, NaiveDate::from_ymd_opt(2019, 4, 10).unwrap());
        assert_eq!(config.ticker, "IBM");
        assert_eq!(config.window, 60);
        assert_eq!(config.num_layers, 4);
        assert_eq!(config.bucket, "models");
    }

    #[test]
    fn test_config_rejects_bad_values() {
        let mut config = TrainConfig::default();
        config.window = 0;
        assert!(config.validate().is_err());

        let mut config = TrainConfig::default();
        config.dropout = 1.0;
        assert!(config.validate().is_err());

        let mut config = TrainConfig::default();
        config.start_date = "2020-01-01".to_string();
        config.end_date = "2019-01-01".to_string();
        assert!(config.validate().is_err());

        let mut config = TrainConfig::default();
        config.start_date = "not-a-date".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_toml_override() {
        let config: TrainConfig =
            toml::from_str("ticker = \"AAPL\"\nepochs = 5\n").unwrap();
        assert_eq!(config.ticker, "AAPL");
        assert_eq!(config.epochs, 5);
        // Unspecified fields keep their defaults
        assert_eq!(config.window, 60);
        assert!(config.validate().is_ok());
    }
}
