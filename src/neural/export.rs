// projeto: lstmstocktrain
// file: src/neural/export.rs
// Dual serialization of the trained parameters: a native directory bundle
// (safetensors weights + JSON manifest) and a portable ONNX graph file

use candle_core::Tensor;
use candle_nn::VarMap;
use candle_onnx::onnx::attribute_proto::AttributeType;
use candle_onnx::onnx::tensor_proto::DataType;
use candle_onnx::onnx::tensor_shape_proto::{dimension, Dimension};
use candle_onnx::onnx::{
    type_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};
use chrono::{DateTime, Utc};
use log::info;
use prost::Message;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::neural::data::MinMaxScaler;
use crate::neural::model::NetworkConfig;
use crate::neural::utils::TrainingError;

/// Metadata stored next to the safetensors weights so the bundle is usable
/// for serving without the training process: architecture, the fitted scaler
/// and the training outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub ticker: String,
    pub network: NetworkConfig,
    pub scaler: MinMaxScaler,
    pub epochs: usize,
    pub final_loss: f64,
    pub training_losses: Vec<f64>,
    pub trained_at: DateTime<Utc>,
}

/// Writes the native bundle: `<dir>/model.safetensors` and `<dir>/manifest.json`.
pub fn save_native(
    varmap: &VarMap,
    manifest: &ExportManifest,
    dir: &Path,
) -> Result<(), TrainingError> {
    fs::create_dir_all(dir)?;
    varmap.save(dir.join("model.safetensors"))?;
    let json = serde_json::to_string_pretty(manifest)?;
    fs::write(dir.join("manifest.json"), json)?;
    info!("💾 Native model bundle saved to {:?}", dir);
    Ok(())
}

/// Trained parameters of one LSTM layer, already in ONNX gate order.
#[derive(Debug, Clone)]
pub struct LstmLayerWeights {
    pub input_size: usize,
    /// W: `[1, 4*hidden, input_size]`
    pub w: Vec<f32>,
    /// R: `[1, 4*hidden, hidden]`
    pub r: Vec<f32>,
    /// B: `[1, 8*hidden]`, input-weight biases then recurrence biases
    pub b: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct NetworkWeights {
    pub window: usize,
    pub hidden: usize,
    pub layers: Vec<LstmLayerWeights>,
    pub head_w: Vec<f32>,
    pub head_b: Vec<f32>,
}

/// Reorders stacked gate blocks from candle's `[i, f, g, o]` layout to the
/// ONNX LSTM `[i, o, f, c]` layout. `row_len` is the width of one weight row
/// (the layer input size for W, the hidden size for R, 1 for biases).
pub fn reorder_gate_rows(data: &[f32], hidden: usize, row_len: usize) -> Vec<f32> {
    let chunk = hidden * row_len;
    debug_assert_eq!(data.len(), 4 * chunk);
    let order = [0usize, 3, 1, 2];
    let mut out = Vec::with_capacity(data.len());
    for &c in &order {
        out.extend_from_slice(&data[c * chunk..(c + 1) * chunk]);
    }
    out
}

/// Pulls the trained tensors out of the variable map and converts them into
/// the ONNX weight layout.
pub fn collect_weights(
    varmap: &VarMap,
    cfg: &NetworkConfig,
) -> Result<NetworkWeights, TrainingError> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| TrainingError::Export("variable map lock poisoned".to_string()))?;

    let fetch = |name: &str, dims: &[usize]| -> Result<Vec<f32>, TrainingError> {
        let var = data
            .get(name)
            .ok_or_else(|| TrainingError::Export(format!("missing tensor: {}", name)))?;
        let tensor: &Tensor = var.as_tensor();
        if tensor.dims() != dims {
            return Err(TrainingError::Export(format!(
                "unexpected shape for {}: {:?}, expected {:?}",
                name,
                tensor.dims(),
                dims
            )));
        }
        Ok(tensor.flatten_all()?.to_vec1::<f32>()?)
    };

    let hidden = cfg.hidden_size;
    let mut layers = Vec::with_capacity(cfg.num_layers);
    for i in 0..cfg.num_layers {
        let input_size = if i == 0 { 1 } else { hidden };
        let w_ih = fetch(&format!("lstm{}.weight_ih_l0", i), &[4 * hidden, input_size])?;
        let w_hh = fetch(&format!("lstm{}.weight_hh_l0", i), &[4 * hidden, hidden])?;
        let b_ih = fetch(&format!("lstm{}.bias_ih_l0", i), &[4 * hidden])?;
        let b_hh = fetch(&format!("lstm{}.bias_hh_l0", i), &[4 * hidden])?;

        let mut b = reorder_gate_rows(&b_ih, hidden, 1);
        b.extend(reorder_gate_rows(&b_hh, hidden, 1));

        layers.push(LstmLayerWeights {
            input_size,
            w: reorder_gate_rows(&w_ih, hidden, input_size),
            r: reorder_gate_rows(&w_hh, hidden, hidden),
            b,
        });
    }

    let head_w = fetch("head.weight", &[1, hidden])?;
    let head_b = fetch("head.bias", &[1])?;

    Ok(NetworkWeights {
        window: cfg.window,
        hidden,
        layers,
        head_w,
        head_b,
    })
}

enum Dim {
    Param(&'static str),
    Value(i64),
}

fn value_info(name: &str, dims: &[Dim]) -> ValueInfoProto {
    let dim = dims
        .iter()
        .map(|d| Dimension {
            value: Some(match d {
                Dim::Param(p) => dimension::Value::DimParam((*p).to_string()),
                Dim::Value(v) => dimension::Value::DimValue(*v),
            }),
            ..Default::default()
        })
        .collect();

    ValueInfoProto {
        name: name.to_string(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: DataType::Float as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn float_initializer(name: &str, dims: &[i64], data: Vec<f32>) -> TensorProto {
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: DataType::Float as i32,
        float_data: data,
        ..Default::default()
    }
}

fn int64_initializer(name: &str, dims: &[i64], data: Vec<i64>) -> TensorProto {
    TensorProto {
        name: name.to_string(),
        dims: dims.to_vec(),
        data_type: DataType::Int64 as i32,
        int64_data: data,
        ..Default::default()
    }
}

fn int_attribute(name: &str, value: i64) -> AttributeProto {
    AttributeProto {
        name: name.to_string(),
        r#type: AttributeType::Int as i32,
        i: value,
        ..Default::default()
    }
}

fn squeeze_node(name: &str, input: &str, axes: &str, output: &str) -> NodeProto {
    NodeProto {
        name: name.to_string(),
        op_type: "Squeeze".to_string(),
        input: vec![input.to_string(), axes.to_string()],
        output: vec![output.to_string()],
        ..Default::default()
    }
}

/// Assembles the inference graph: a chain of LSTM nodes (batch-first layout),
/// squeezing the direction axis between layers, the last layer's final hidden
/// state into a Gemm head. Dropout is a training-time identity and is omitted.
pub fn build_model_proto(weights: &NetworkWeights) -> ModelProto {
    let hidden = weights.hidden as i64;
    let n_layers = weights.layers.len();

    // Squeeze takes its axes as an input tensor from opset 13 on. Both squeezes
    // drop the num_directions axis, which under layout=1 sits at axis 2 of Y
    // and axis 1 of Y_h.
    let mut initializers = vec![
        int64_initializer("axes_y_dir", &[1], vec![2]),
        int64_initializer("axes_yh_dir", &[1], vec![1]),
    ];
    let mut nodes = Vec::new();
    let mut current = "input".to_string();

    for (i, layer) in weights.layers.iter().enumerate() {
        let w_name = format!("lstm{}_W", i);
        let r_name = format!("lstm{}_R", i);
        let b_name = format!("lstm{}_B", i);
        initializers.push(float_initializer(
            &w_name,
            &[1, 4 * hidden, layer.input_size as i64],
            layer.w.clone(),
        ));
        initializers.push(float_initializer(
            &r_name,
            &[1, 4 * hidden, hidden],
            layer.r.clone(),
        ));
        initializers.push(float_initializer(&b_name, &[1, 8 * hidden], layer.b.clone()));

        let inputs = vec![current.clone(), w_name, r_name, b_name];
        let attributes = vec![
            int_attribute("hidden_size", hidden),
            int_attribute("layout", 1),
        ];

        if i + 1 < n_layers {
            // Y: [N, seq, num_directions, hidden]; drop the direction axis
            // before the next layer.
            let y_name = format!("lstm{}_Y", i);
            let out_name = format!("lstm{}_out", i);
            nodes.push(NodeProto {
                name: format!("lstm{}", i),
                op_type: "LSTM".to_string(),
                input: inputs,
                output: vec![y_name.clone()],
                attribute: attributes,
                ..Default::default()
            });
            nodes.push(squeeze_node(
                &format!("squeeze{}", i),
                &y_name,
                "axes_y_dir",
                &out_name,
            ));
            current = out_name;
        } else {
            // Only Y_h [N, num_directions, hidden] is needed from the last
            // layer; the empty string skips the unused Y output.
            let yh_name = format!("lstm{}_Yh", i);
            nodes.push(NodeProto {
                name: format!("lstm{}", i),
                op_type: "LSTM".to_string(),
                input: inputs,
                output: vec![String::new(), yh_name.clone()],
                attribute: attributes,
                ..Default::default()
            });
            nodes.push(squeeze_node(
                &format!("squeeze{}", i),
                &yh_name,
                "axes_yh_dir",
                "features",
            ));
        }
    }

    initializers.push(float_initializer("head_W", &[1, hidden], weights.head_w.clone()));
    initializers.push(float_initializer("head_B", &[1], weights.head_b.clone()));
    nodes.push(NodeProto {
        name: "head".to_string(),
        op_type: "Gemm".to_string(),
        input: vec![
            "features".to_string(),
            "head_W".to_string(),
            "head_B".to_string(),
        ],
        output: vec!["prediction".to_string()],
        attribute: vec![int_attribute("transB", 1)],
        ..Default::default()
    });

    let graph = GraphProto {
        name: "stocks".to_string(),
        node: nodes,
        initializer: initializers,
        input: vec![value_info(
            "input",
            &[Dim::Param("N"), Dim::Value(weights.window as i64), Dim::Value(1)],
        )],
        output: vec![value_info("prediction", &[Dim::Param("N"), Dim::Value(1)])],
        ..Default::default()
    };

    ModelProto {
        ir_version: 8,
        producer_name: "lstmstocktrain".to_string(),
        producer_version: env!("CARGO_PKG_VERSION").to_string(),
        graph: Some(graph),
        opset_import: vec![OperatorSetIdProto {
            domain: String::new(),
            version: 14,
        }],
        ..Default::default()
    }
}

/// Converts the trained variable map into an ONNX file at `path`. The encoded
/// weights are the same parameters the native bundle holds.
pub fn export_onnx(
    varmap: &VarMap,
    cfg: &NetworkConfig,
    path: &Path,
) -> Result<(), TrainingError> {
    let weights = collect_weights(varmap, cfg)?;
    let proto = build_model_proto(&weights);
    fs::write(path, proto.encode_to_vec())?;
    info!("💾 ONNX model saved to {:?}", path);
    Ok(())
}
