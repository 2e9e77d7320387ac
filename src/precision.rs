use std::{fmt, str::FromStr};

use serde::Serialize;

use crate::error::ServiceError;

/// Numeric precision the model weights are held in after loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    F32,
    F16,
    BF16,
}

impl Precision {
    pub fn label(self) -> &'static str {
        match self {
            Precision::F32 => "float32",
            Precision::F16 => "float16",
            Precision::BF16 => "bfloat16",
        }
    }

    pub fn bytes_per_param(self) -> u64 {
        match self {
            Precision::F32 => 4,
            Precision::F16 | Precision::BF16 => 2,
        }
    }

    /// Rough parameter count for an artifact of `size_bytes` stored at this
    /// precision.
    pub fn estimated_params(self, size_bytes: u64) -> u64 {
        size_bytes / self.bytes_per_param()
    }

    pub fn is_reduced(self) -> bool {
        self != Precision::F32
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Precision {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "f32" | "fp32" | "float32" | "float" => Ok(Precision::F32),
            "f16" | "fp16" | "float16" | "half" => Ok(Precision::F16),
            "bf16" | "bfloat16" => Ok(Precision::BF16),
            other => Err(ServiceError::Other(format!("unknown precision '{other}'"))),
        }
    }
}

/// Where the model should be placed. `Auto` picks the first accelerator when
/// one is present and falls back to the CPU otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevicePreference {
    Auto,
    Cpu,
    Cuda(usize),
}

impl fmt::Display for DevicePreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DevicePreference::Auto => f.write_str("auto"),
            DevicePreference::Cpu => f.write_str("cpu"),
            DevicePreference::Cuda(idx) => write!(f, "cuda:{idx}"),
        }
    }
}

impl FromStr for DevicePreference {
    type Err = ServiceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lower = raw.trim().to_lowercase();
        match lower.as_str() {
            "auto" => Ok(DevicePreference::Auto),
            "cpu" => Ok(DevicePreference::Cpu),
            "cuda" => Ok(DevicePreference::Cuda(0)),
            other => match other.strip_prefix("cuda:") {
                Some(idx) => idx
                    .parse::<usize>()
                    .map(DevicePreference::Cuda)
                    .map_err(|_| ServiceError::Other(format!("invalid cuda ordinal in '{raw}'"))),
                None => Err(ServiceError::Other(format!("unknown device '{raw}'"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_precision_aliases() {
        assert_eq!("F16".parse::<Precision>().unwrap(), Precision::F16);
        assert_eq!("half".parse::<Precision>().unwrap(), Precision::F16);
        assert_eq!("bfloat16".parse::<Precision>().unwrap(), Precision::BF16);
        assert_eq!(" fp32 ".parse::<Precision>().unwrap(), Precision::F32);
        assert!("int4".parse::<Precision>().is_err());
    }

    #[test]
    fn reduced_precision_halves_param_size() {
        assert_eq!(Precision::F32.bytes_per_param(), 4);
        assert_eq!(Precision::F16.bytes_per_param(), 2);
        assert!(Precision::BF16.is_reduced());
        assert!(!Precision::F32.is_reduced());
    }

    #[test]
    fn parses_device_preferences() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("cuda".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(0));
        assert_eq!("cuda:3".parse::<DevicePreference>().unwrap(), DevicePreference::Cuda(3));
        assert!("cuda:x".parse::<DevicePreference>().is_err());
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn rejects_cuda_lookalikes() {
        assert!("cuda1".parse::<DevicePreference>().is_err());
        assert!("cudax".parse::<DevicePreference>().is_err());
        assert!("cuda:".parse::<DevicePreference>().is_err());
        assert!("cuda:0:1".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn estimates_params_from_artifact_size() {
        assert_eq!(Precision::F16.estimated_params(2_600_000_000), 1_300_000_000);
        assert_eq!(Precision::F32.estimated_params(4_000), 1_000);
    }

    #[test]
    fn device_display_round_trips_through_parse() {
        let device = DevicePreference::Cuda(1);
        assert_eq!(device.to_string(), "cuda:1");
        assert_eq!(device.to_string().parse::<DevicePreference>().unwrap(), device);
    }
}
