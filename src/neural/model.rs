// projeto: lstmstocktrain
// file: src/neural/model.rs
// Stacked LSTM regression model and training loop built on candle

use candle_core::{DType, Device, Tensor};
use candle_nn::rnn::{lstm, LSTMConfig, LSTM};
use candle_nn::{
    linear, loss, AdamW, Dropout, Linear, Module, Optimizer, ParamsAdamW, VarBuilder, VarMap, RNN,
};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::neural::utils::TrainingError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub window: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub dropout: f64,
}

#[derive(Debug, Clone)]
pub struct TrainOptions {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
}

/// Sequence-to-one regressor: `num_layers` LSTM layers where every layer but
/// the last feeds its full output sequence forward, the last layer's final
/// hidden state passes through dropout, and a single-unit dense head produces
/// the scaled next-day close.
#[derive(Debug)]
pub struct StockLstm {
    layers: Vec<LSTM>,
    dropout: Dropout,
    head: Linear,
}

impl StockLstm {
    pub fn new(vb: VarBuilder, cfg: &NetworkConfig) -> candle_core::Result<Self> {
        if cfg.num_layers == 0 {
            candle_core::bail!("model needs at least one LSTM layer");
        }

        let mut layers = Vec::with_capacity(cfg.num_layers);
        for i in 0..cfg.num_layers {
            let input_size = if i == 0 { 1 } else { cfg.hidden_size };
            let layer = lstm(
                input_size,
                cfg.hidden_size,
                LSTMConfig::default(),
                vb.pp(format!("lstm{}", i)),
            )?;
            layers.push(layer);
        }

        let head = linear(cfg.hidden_size, 1, vb.pp("head"))?;

        Ok(Self {
            layers,
            dropout: Dropout::new(cfg.dropout as f32),
            head,
        })
    }

    /// Forward pass over a `(batch, window, 1)` tensor. Dropout is active only
    /// when `train` is set.
    pub fn forward(&self, x: &Tensor, train: bool) -> candle_core::Result<Tensor> {
        let last_idx = self.layers.len() - 1;
        let mut xs = x.clone();

        for layer in &self.layers[..last_idx] {
            let states = layer.seq(&xs)?;
            let hs: Vec<Tensor> = states.iter().map(|s| s.h().clone()).collect();
            xs = Tensor::stack(&hs, 1)?;
            xs = self.dropout.forward(&xs, train)?;
        }

        let states = self.layers[last_idx].seq(&xs)?;
        let last_state = states
            .last()
            .ok_or_else(|| candle_core::Error::Msg("empty input sequence".to_string()))?;
        let h = self.dropout.forward(last_state.h(), train)?;
        self.head.forward(&h)
    }

    /// Inference over scaled windows; returns one prediction per example.
    pub fn predict(&self, x: &Tensor) -> Result<Vec<f32>, TrainingError> {
        let predictions = self.forward(x, false)?;
        Ok(predictions.flatten_all()?.to_vec1::<f32>()?)
    }
}

/// Creates a fresh model together with the variable map that owns its
/// parameters. The map is what later gets serialized and exported.
pub fn build_model(
    cfg: &NetworkConfig,
    device: &Device,
) -> Result<(StockLstm, VarMap), TrainingError> {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
    let model = StockLstm::new(vb, cfg)?;
    debug!(
        "Model created: {} layers x {} units, {} parameters",
        cfg.num_layers,
        cfg.hidden_size,
        num_parameters(&varmap)
    );
    Ok((model, varmap))
}

pub fn num_parameters(varmap: &VarMap) -> usize {
    varmap
        .all_vars()
        .iter()
        .map(|v| v.as_tensor().elem_count())
        .sum()
}

/// Mini-batch Adam/MSE training over the windowed dataset. Returns the mean
/// loss per epoch.
pub fn train(
    model: &StockLstm,
    varmap: &VarMap,
    x: &Tensor,
    y: &Tensor,
    opts: &TrainOptions,
) -> Result<Vec<f64>, TrainingError> {
    let params = ParamsAdamW {
        lr: opts.learning_rate,
        weight_decay: 0.0,
        ..Default::default()
    };
    let mut optimizer = AdamW::new(varmap.all_vars(), params)?;

    let n = x.dim(0)?;
    let mut losses = Vec::with_capacity(opts.epochs);

    info!(
        "🎓 Training: {} examples, {} epochs, batch size {}",
        n, opts.epochs, opts.batch_size
    );

    for epoch in 1..=opts.epochs {
        let epoch_start = Instant::now();
        let mut total_loss = 0.0;
        let mut batch_count = 0usize;

        let mut start = 0;
        while start < n {
            let len = opts.batch_size.min(n - start);
            let x_batch = x.narrow(0, start, len)?;
            let y_batch = y.narrow(0, start, len)?;

            let predictions = model.forward(&x_batch, true)?;
            let batch_loss = loss::mse(&predictions, &y_batch)?;
            optimizer.backward_step(&batch_loss)?;

            total_loss += batch_loss.to_scalar::<f32>()? as f64;
            batch_count += 1;
            start += len;
        }

        let avg_loss = total_loss / batch_count.max(1) as f64;
        losses.push(avg_loss);
        info!(
            "📈 Epoch {}/{}: loss = {:.6} ({:.1}s)",
            epoch,
            opts.epochs,
            avg_loss,
            epoch_start.elapsed().as_secs_f64()
        );
    }

    Ok(losses)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config() -> NetworkConfig {
        NetworkConfig {
            window: 8,
            hidden_size: 4,
            num_layers: 2,
            dropout: 0.2,
        }
    }

    #[test]
    fn test_forward_output_shape() {
        let cfg = tiny_config();
        let device = Device::Cpu;
        let (model, _varmap) = build_model(&cfg, &device).unwrap();
        let x = Tensor::zeros((3, cfg.window, 1), DType::F32, &device).unwrap();
        let out = model.forward(&x, false).unwrap();
        assert_eq!(out.dims(), &[3, 1]);
    }

    #[test]
    fn test_predict_length_matches_examples() {
        let cfg = tiny_config();
        let device = Device::Cpu;
        let (model, _varmap) = build_model(&cfg, &device).unwrap();
        let x = Tensor::zeros((5, cfg.window, 1), DType::F32, &device).unwrap();
        let preds = model.predict(&x).unwrap();
        assert_eq!(preds.len(), 5);
    }

    #[test]
    fn test_train_smoke() {
        let cfg = tiny_config();
        let device = Device::Cpu;
        let (model, varmap) = build_model(&cfg, &device).unwrap();

        let series: Vec<f64> = (0..20).map(|i| (i as f64 / 20.0).sin().abs()).collect();
        let ds = crate::neural::data::WindowedDataset::from_series(&series, cfg.window);
        let (x, y) = ds.to_tensors(&device).unwrap();

        let opts = TrainOptions {
            epochs: 2,
            batch_size: 4,
            learning_rate: 0.01,
        };
        let losses = train(&model, &varmap, &x, &y, &opts).unwrap();
        assert_eq!(losses.len(), 2);
        assert!(losses.iter().all(|l| l.is_finite()));
    }

    #[test]
    fn test_parameter_count_positive() {
        let cfg = tiny_config();
        let (_model, varmap) = build_model(&cfg, &Device::Cpu).unwrap();
        assert!(num_parameters(&varmap) > 0);
    }
}
