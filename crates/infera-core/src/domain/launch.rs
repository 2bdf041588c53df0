//! Launch configuration for inference-server processes.
//!
//! A launch is described by a fully populated [`LaunchConfig`]. Callers supply
//! a sparse [`LaunchOverrides`]; [`LaunchConfig::resolve`] merges it onto the
//! defaults and forces the host/port chosen by the supervisor.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Default fraction of accelerator memory the server may claim.
pub const DEFAULT_GPU_MEMORY_UTILIZATION: f64 = 0.9;

/// Default numeric precision mode (let the server pick).
pub const DEFAULT_DTYPE: &str = "auto";

/// Precision modes accepted by the server.
pub const SUPPORTED_DTYPES: &[&str] = &["auto", "half", "float16", "bfloat16", "float", "float32"];

/// Fully populated launch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchConfig {
    pub host: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokenizer: Option<String>,
    pub tensor_parallel_size: u32,
    pub pipeline_parallel_size: u32,
    pub dtype: String,
    pub gpu_memory_utilization: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_model_len: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_model_name: Option<String>,
    #[serde(default)]
    pub trust_remote_code: bool,
    #[serde(default)]
    pub enforce_eager: bool,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 0,
            tokenizer: None,
            tensor_parallel_size: 1,
            pipeline_parallel_size: 1,
            dtype: DEFAULT_DTYPE.to_string(),
            gpu_memory_utilization: DEFAULT_GPU_MEMORY_UTILIZATION,
            max_model_len: None,
            quantization: None,
            served_model_name: None,
            trust_remote_code: false,
            enforce_eager: false,
        }
    }
}

impl LaunchConfig {
    /// Merge `overrides` onto `defaults`.
    ///
    /// `host` and `port` are always taken from the arguments, never from the
    /// overrides or the defaults.
    pub fn resolve(defaults: &Self, overrides: &LaunchOverrides, host: &str, port: u16) -> Self {
        let mut config = defaults.clone();
        if let Some(ref tokenizer) = overrides.tokenizer {
            config.tokenizer = Some(tokenizer.clone());
        }
        if let Some(size) = overrides.tensor_parallel_size {
            config.tensor_parallel_size = size;
        }
        if let Some(size) = overrides.pipeline_parallel_size {
            config.pipeline_parallel_size = size;
        }
        if let Some(ref dtype) = overrides.dtype {
            config.dtype.clone_from(dtype);
        }
        if let Some(fraction) = overrides.gpu_memory_utilization {
            config.gpu_memory_utilization = fraction;
        }
        if let Some(len) = overrides.max_model_len {
            config.max_model_len = Some(len);
        }
        if let Some(ref quantization) = overrides.quantization {
            config.quantization = Some(quantization.clone());
        }
        if let Some(ref name) = overrides.served_model_name {
            config.served_model_name = Some(name.clone());
        }
        if let Some(flag) = overrides.trust_remote_code {
            config.trust_remote_code = flag;
        }
        if let Some(flag) = overrides.enforce_eager {
            config.enforce_eager = flag;
        }
        config.host = host.to_string();
        config.port = port;
        config
    }

    /// Whether the memory-utilization fraction is inside `(0, 1]`.
    #[must_use]
    pub fn gpu_memory_utilization_in_range(&self) -> bool {
        self.gpu_memory_utilization > 0.0 && self.gpu_memory_utilization <= 1.0
    }

    /// Convert back into overrides, dropping host and port.
    ///
    /// Used by restart, which re-derives host and port.
    #[must_use]
    pub fn to_overrides(&self) -> LaunchOverrides {
        LaunchOverrides {
            tokenizer: self.tokenizer.clone(),
            tensor_parallel_size: Some(self.tensor_parallel_size),
            pipeline_parallel_size: Some(self.pipeline_parallel_size),
            dtype: Some(self.dtype.clone()),
            gpu_memory_utilization: Some(self.gpu_memory_utilization),
            max_model_len: self.max_model_len,
            quantization: self.quantization.clone(),
            served_model_name: self.served_model_name.clone(),
            trust_remote_code: Some(self.trust_remote_code),
            enforce_eager: Some(self.enforce_eager),
        }
    }
}

/// Sparse launch configuration supplied by callers.
///
/// Host and port are not part of the overrides: the supervisor owns them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchOverrides {
    pub tokenizer: Option<String>,
    pub tensor_parallel_size: Option<u32>,
    pub pipeline_parallel_size: Option<u32>,
    pub dtype: Option<String>,
    pub gpu_memory_utilization: Option<f64>,
    pub max_model_len: Option<u32>,
    pub quantization: Option<String>,
    pub served_model_name: Option<String>,
    pub trust_remote_code: Option<bool>,
    pub enforce_eager: Option<bool>,
}

impl LaunchOverrides {
    /// Reject out-of-bounds values before any resource is allocated.
    ///
    /// An out-of-range memory fraction is *not* an error: it is dropped from
    /// the argument vector at launch time.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.tensor_parallel_size == Some(0) {
            return Err(ValidationError::new(
                "tensorParallelSize",
                "must be at least 1",
            ));
        }
        if self.pipeline_parallel_size == Some(0) {
            return Err(ValidationError::new(
                "pipelineParallelSize",
                "must be at least 1",
            ));
        }
        if self.max_model_len == Some(0) {
            return Err(ValidationError::new("maxModelLen", "must be at least 1"));
        }
        if let Some(ref dtype) = self.dtype
            && !SUPPORTED_DTYPES.contains(&dtype.as_str())
        {
            return Err(ValidationError::new(
                "dtype",
                format!(
                    "unsupported value '{dtype}' (expected one of {})",
                    SUPPORTED_DTYPES.join(", ")
                ),
            ));
        }
        if let Some(fraction) = self.gpu_memory_utilization
            && !fraction.is_finite()
        {
            return Err(ValidationError::new(
                "gpuMemoryUtilization",
                "must be a finite number",
            ));
        }
        for (field, value) in [
            ("tokenizer", &self.tokenizer),
            ("quantization", &self.quantization),
            ("servedModelName", &self.served_model_name),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ValidationError::new(field, "must not be empty"));
            }
        }
        Ok(())
    }
}
