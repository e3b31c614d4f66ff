// projeto: lstmstocktrain
// file: src/neural/mod.rs
// Module declarations for the stock training pipeline

pub mod utils;    // Error handling and validation helpers
pub mod data;     // Market data acquisition and preprocessing
pub mod model;    // Stacked LSTM model and training loop
pub mod metrics;  // Evaluation metrics
pub mod export;   // Native and ONNX serialization of trained parameters
pub mod storage;  // Object store upload

// Re-export commonly used items for convenience
pub use data::{business_day_closes, MinMaxScaler, StockRecord, WindowedDataset, YahooClient};
pub use export::{export_onnx, save_native, ExportManifest};
pub use metrics::EvaluationMetrics;
pub use model::{build_model, num_parameters, train, NetworkConfig, StockLstm, TrainOptions};
pub use storage::{ObjectStore, UploadReport};
pub use utils::TrainingError;
