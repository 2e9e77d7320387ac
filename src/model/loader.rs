use tokenizers::{FromPretrainedParameters, Tokenizer};

use crate::{config::AppConfig, error::ServiceError};

#[cfg(feature = "tch-backend")]
pub use torch::TorchModel;

const EOS_CANDIDATES: [&str; 4] = ["</s>", "<|endoftext|>", "<eos>", "<|end_of_text|>"];

/// Loads the tokenizer from `TOKENIZER_PATH` when set, otherwise downloads it
/// from the hub under the configured model identifier.
pub fn load_tokenizer(config: &AppConfig) -> Result<Tokenizer, ServiceError> {
    match config.tokenizer_path.as_ref() {
        Some(path) => {
            if !path.exists() {
                return Err(ServiceError::ModelLoad(format!(
                    "tokenizer file missing: {}",
                    path.display()
                )));
            }
            Tokenizer::from_file(path).map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
        None => {
            let params = FromPretrainedParameters {
                revision: config.revision.clone().unwrap_or_else(|| "main".to_string()),
                ..Default::default()
            };
            Tokenizer::from_pretrained(&config.model_id, Some(params))
                .map_err(|e| ServiceError::Tokenizer(e.to_string()))
        }
    }
}

/// An explicit `EOS_TOKEN_ID` wins; otherwise the first well-known end marker
/// present in the vocabulary is used.
pub fn resolve_eos_token(tokenizer: &Tokenizer, configured: Option<u32>) -> Option<u32> {
    configured.or_else(|| {
        EOS_CANDIDATES
            .iter()
            .find_map(|token| tokenizer.token_to_id(token))
    })
}

#[cfg(feature = "tch-backend")]
mod torch {
    use std::fs;

    use parking_lot::Mutex;
    use tch::{Device, IValue, Kind, Tensor, no_grad};
    use tracing::warn;

    use crate::{
        config::AppConfig,
        error::ServiceError,
        model::{CausalLm, GenerateOptions, ModelDescriptor, Sampling},
        precision::{DevicePreference, Precision},
    };

    /// TorchScript export of the model, traced so that `forward(input_ids)`
    /// returns logits (optionally as the first element of a tuple).
    pub struct TorchModel {
        descriptor: ModelDescriptor,
        device: Device,
        module: Mutex<tch::CModule>,
    }

    impl TorchModel {
        pub fn load(config: &AppConfig) -> Result<Self, ServiceError> {
            let path = config.model_path.as_path();
            if !path.exists() {
                return Err(ServiceError::ModelLoad(format!(
                    "model artifact missing: {}",
                    path.display()
                )));
            }
            let size_bytes = fs::metadata(path)?.len();

            let device = resolve_device(config.device);
            let precision = effective_precision(device, config.precision);

            let mut module = tch::CModule::load_on_device(path, device)
                .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;
            module.set_eval();
            module
                .f_to(device, kind_for(precision), false)
                .map_err(|e| ServiceError::ModelLoad(e.to_string()))?;

            Ok(Self {
                descriptor: ModelDescriptor {
                    model_id: config.model_id.clone(),
                    precision,
                    device: format!("{device:?}"),
                    size_bytes,
                },
                device,
                module: Mutex::new(module),
            })
        }
    }

    impl CausalLm for TorchModel {
        fn descriptor(&self) -> &ModelDescriptor {
            &self.descriptor
        }

        fn generate(
            &self,
            input_ids: &[u32],
            options: &GenerateOptions,
        ) -> Result<Vec<u32>, ServiceError> {
            let module = self.module.lock();
            decode_loop(input_ids, options, self.device, |input| {
                let output = module
                    .forward_is(&[IValue::Tensor(input)])
                    .map_err(|e| ServiceError::Inference(e.to_string()))?;
                logits_from(output)
            })
        }
    }

    /// Autoregressive loop around `forward`, which maps `[1, seq_len]` ids to
    /// `[1, seq_len, vocab]` logits. Returns prompt plus new tokens; the EOS
    /// token, when hit, is kept as the last element.
    fn decode_loop<F>(
        input_ids: &[u32],
        options: &GenerateOptions,
        device: Device,
        mut forward: F,
    ) -> Result<Vec<u32>, ServiceError>
    where
        F: FnMut(Tensor) -> Result<Tensor, ServiceError>,
    {
        let mut ids: Vec<i64> = input_ids.iter().map(|&id| i64::from(id)).collect();
        let eos = options.eos_token_id.map(i64::from);

        no_grad(|| {
            for _ in 0..options.max_new_tokens {
                let input = Tensor::from_slice(&ids)
                    .reshape([1, ids.len() as i64])
                    .to(device);

                let logits = forward(input)?;
                let next = next_token(&last_position_logits(&logits), options.sampling);
                ids.push(next);

                if eos == Some(next) {
                    break;
                }
            }

            Ok::<(), ServiceError>(())
        })?;

        ids.into_iter()
            .map(|id| {
                u32::try_from(id)
                    .map_err(|_| ServiceError::Inference(format!("token id out of range: {id}")))
            })
            .collect()
    }

    /// `[1, seq_len, vocab]` -> `[vocab]` for the final position, upcast so
    /// half precision samples cleanly.
    fn last_position_logits(logits: &Tensor) -> Tensor {
        logits.select(1, -1).squeeze_dim(0).to_kind(Kind::Float)
    }

    fn next_token(logits: &Tensor, sampling: Sampling) -> i64 {
        match sampling {
            Sampling::Greedy => logits.argmax(0, false).int64_value(&[]),
            Sampling::Temperature(t) => (logits / t)
                .softmax(-1, Kind::Float)
                .multinomial(1, true)
                .int64_value(&[0]),
        }
    }

    fn logits_from(output: IValue) -> Result<Tensor, ServiceError> {
        match output {
            IValue::Tensor(t) => Ok(t),
            IValue::Tuple(ref tuple) if !tuple.is_empty() => match &tuple[0] {
                IValue::Tensor(t) => Ok(t.shallow_clone()),
                _ => Err(ServiceError::Inference(
                    "expected tensor as first tuple element".into(),
                )),
            },
            _ => Err(ServiceError::Inference("unexpected model output format".into())),
        }
    }

    fn resolve_device(preference: DevicePreference) -> Device {
        match preference {
            DevicePreference::Auto => Device::cuda_if_available(),
            DevicePreference::Cpu => Device::Cpu,
            DevicePreference::Cuda(idx) => {
                if tch::Cuda::is_available() {
                    Device::Cuda(idx)
                } else {
                    warn!(ordinal = idx, "cuda requested but unavailable, falling back to cpu");
                    Device::Cpu
                }
            }
        }
    }

    fn effective_precision(device: Device, requested: Precision) -> Precision {
        if device == Device::Cpu && requested.is_reduced() {
            warn!(
                requested = %requested,
                "reduced precision is not supported on cpu, using float32"
            );
            Precision::F32
        } else {
            requested
        }
    }

    fn kind_for(precision: Precision) -> Kind {
        match precision {
            Precision::F32 => Kind::Float,
            Precision::F16 => Kind::Half,
            Precision::BF16 => Kind::BFloat16,
        }
    }

}
