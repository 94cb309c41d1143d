//! TFLite interpreter wrapper around a quantized wake-word model.
//!
//! Adapted from `agent-edge-rs`'s `WakewordModel` (`src/models/wakeword.rs`),
//! which drove a float model through `tflitec::interpreter::Interpreter`.
//! This target's model is INT8-quantized end to end, so the wrapper adds
//! the manual `(scale, zero_point)` affine quantize/dequantize math the
//! float original never needed, and validates the tensor schema up front
//! instead of discovering a mismatch at `invoke()` time.

use super::WakewordError;
use tflitec::interpreter::{Interpreter, Options};
use tflitec::model::Model;
use tflitec::tensor::DataType;

/// Affine quantization parameters for an INT8 tensor: `real = scale * (q - zero_point)`.
#[derive(Debug, Clone, Copy)]
pub struct QuantParams {
    pub scale: f32,
    pub zero_point: i32,
}

impl QuantParams {
    fn quantize(&self, value: f32) -> i8 {
        let q = (value / self.scale).round() as i32 + self.zero_point;
        q.clamp(i8::MIN as i32, i8::MAX as i32) as i8
    }

    fn dequantize(&self, q: i8) -> f32 {
        self.scale * ((q as i32 - self.zero_point) as f32)
    }
}

pub struct WakewordModel<'a> {
    model: Model<'a>,
    expected_input_size: usize,
    input_quant: QuantParams,
    output_quant: QuantParams,
}

impl<'a> WakewordModel<'a> {
    /// Load the model and validate its schema: a single INT8 input
    /// tensor of length `expected_input_size` and a single INT8 (or
    /// float32) scalar output tensor.
    pub fn load(model_path: &str, expected_input_size: usize) -> Result<Self, WakewordError> {
        let model = Model::new(model_path)
            .map_err(|e| WakewordError::ModelLoad(format!("{model_path}: {e}")))?;

        let options = Options::default();
        let interpreter = Interpreter::new(&model, Some(options))
            .map_err(|e| WakewordError::Inference(e.to_string()))?;
        interpreter
            .allocate_tensors()
            .map_err(|e| WakewordError::Inference(e.to_string()))?;

        let input = interpreter
            .input(0)
            .map_err(|e| WakewordError::Schema(e.to_string()))?;
        let output = interpreter
            .output(0)
            .map_err(|e| WakewordError::Schema(e.to_string()))?;

        let input_len: usize = input.shape().dimensions().iter().product();
        if input_len != expected_input_size {
            return Err(WakewordError::Schema(format!(
                "model expects {input_len} input values, frontend produces {expected_input_size}"
            )));
        }

        let input_quant = quant_params_of(&input, input.data_type());
        let output_quant = quant_params_of(&output, output.data_type());

        Ok(Self {
            model,
            expected_input_size,
            input_quant,
            output_quant,
        })
    }

    /// Run one inference over a flattened feature vector and return a
    /// confidence score in `[0, 1]`.
    pub fn predict(&self, features: &[f32]) -> Result<f32, WakewordError> {
        if features.len() != self.expected_input_size {
            return Err(WakewordError::Schema(format!(
                "expected {} features, got {}",
                self.expected_input_size,
                features.len()
            )));
        }

        let options = Options::default();
        let interpreter = Interpreter::new(&self.model, Some(options))
            .map_err(|e| WakewordError::Inference(e.to_string()))?;
        interpreter
            .allocate_tensors()
            .map_err(|e| WakewordError::Inference(e.to_string()))?;

        let quantized: Vec<i8> = features.iter().map(|&f| self.input_quant.quantize(f)).collect();
        interpreter
            .copy(&quantized, 0)
            .map_err(|e| WakewordError::Inference(e.to_string()))?;

        interpreter
            .invoke()
            .map_err(|e| WakewordError::Inference(e.to_string()))?;

        let output_tensor = interpreter
            .output(0)
            .map_err(|e| WakewordError::Inference(e.to_string()))?;

        let score = match output_tensor.data_type() {
            DataType::Int8 => {
                let raw = output_tensor.data::<i8>();
                let q = *raw.first().ok_or_else(|| WakewordError::Inference("empty output".into()))?;
                self.output_quant.dequantize(q)
            }
            _ => {
                let raw = output_tensor.data::<f32>();
                *raw.first().ok_or_else(|| WakewordError::Inference("empty output".into()))?
            }
        };

        Ok(score.clamp(0.0, 1.0))
    }
}

fn quant_params_of(tensor: &tflitec::tensor::Tensor, data_type: DataType) -> QuantParams {
    match data_type {
        DataType::Int8 => {
            let q = tensor.quantization_parameters();
            QuantParams {
                scale: if q.scale == 0.0 { 1.0 } else { q.scale },
                zero_point: q.zero_point,
            }
        }
        _ => QuantParams { scale: 1.0, zero_point: 0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_dequantize_roundtrips_within_one_step() {
        let q = QuantParams { scale: 0.01, zero_point: -3 };
        let original = 0.47f32;
        let quantized = q.quantize(original);
        let restored = q.dequantize(quantized);
        assert!((restored - original).abs() <= q.scale);
    }

    #[test]
    fn quantize_clamps_out_of_range_values() {
        let q = QuantParams { scale: 1.0, zero_point: 0 };
        assert_eq!(q.quantize(1000.0), i8::MAX);
        assert_eq!(q.quantize(-1000.0), i8::MIN);
    }
}
