//! Deterministic launch-argument construction.
//!
//! Only fields that differ from the server's own defaults are emitted, so two
//! equal configurations always produce the same argument vector and a default
//! configuration produces the shortest one.

use std::path::Path;

use infera_core::LaunchConfig;
use infera_core::domain::{DEFAULT_DTYPE, DEFAULT_GPU_MEMORY_UTILIZATION};

/// Build the arguments appended after the launch command.
pub fn build_launch_args(model_path: &Path, config: &LaunchConfig) -> Vec<String> {
    let mut args = vec![
        model_path.display().to_string(),
        "--host".to_string(),
        config.host.clone(),
        "--port".to_string(),
        config.port.to_string(),
    ];

    if let Some(ref tokenizer) = config.tokenizer {
        args.push("--tokenizer".to_string());
        args.push(tokenizer.clone());
    }

    if config.tensor_parallel_size > 1 {
        args.push("--tensor-parallel-size".to_string());
        args.push(config.tensor_parallel_size.to_string());
    }

    if config.pipeline_parallel_size > 1 {
        args.push("--pipeline-parallel-size".to_string());
        args.push(config.pipeline_parallel_size.to_string());
    }

    if config.dtype != DEFAULT_DTYPE {
        args.push("--dtype".to_string());
        args.push(config.dtype.clone());
    }

    // Out-of-range fractions are dropped rather than passed through.
    if config.gpu_memory_utilization_in_range()
        && (config.gpu_memory_utilization - DEFAULT_GPU_MEMORY_UTILIZATION).abs() > f64::EPSILON
    {
        args.push("--gpu-memory-utilization".to_string());
        args.push(config.gpu_memory_utilization.to_string());
    }

    if let Some(ref quantization) = config.quantization {
        args.push("--quantization".to_string());
        args.push(quantization.clone());
    }

    if let Some(ref name) = config.served_model_name {
        args.push("--served-model-name".to_string());
        args.push(name.clone());
    }

    if let Some(len) = config.max_model_len {
        args.push("--max-model-len".to_string());
        args.push(len.to_string());
    }

    if config.trust_remote_code {
        args.push("--trust-remote-code".to_string());
    }

    if config.enforce_eager {
        args.push("--enforce-eager".to_string());
    }

    args
}
