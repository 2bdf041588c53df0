//! Subcommands.

use clap::{Args, Subcommand};

use infera_core::{DownloadSource, LaunchOverrides};

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start inference servers and follow their output until Ctrl-C
    Serve {
        /// Artifact ids (filenames in the models directory)
        #[arg(required = true)]
        artifacts: Vec<String>,

        #[command(flatten)]
        launch: LaunchArgs,
    },

    /// List process records
    Ps {
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the captured output of a process
    Logs {
        /// Process id or unique prefix
        id: String,
        /// Only print the last N lines
        #[arg(short = 'n', long)]
        tail: Option<usize>,
    },

    /// Forget a stopped or failed process record
    Rm {
        /// Process id or unique prefix
        id: String,
    },

    /// Download a model artifact
    Download {
        #[command(subcommand)]
        source: DownloadCommand,
    },

    /// List artifacts in the models directory
    Artifacts,
}

/// Where to download from.
#[derive(Subcommand, Debug)]
pub enum DownloadCommand {
    /// Plain HTTP(S) URL
    Url {
        url: String,
        /// Display name (defaults to the destination filename)
        #[arg(long)]
        name: Option<String>,
    },

    /// Object-store bucket and key
    ObjectStore {
        bucket: String,
        key: String,
        #[arg(long)]
        name: Option<String>,
    },

    /// File from a model repository, fetched with the external fetch tool
    Repo {
        /// Repository id, e.g. `org/model`
        repo: String,
        /// File inside the repository
        file: String,
        /// Branch, tag or commit
        #[arg(long)]
        revision: Option<String>,
        #[arg(long)]
        name: Option<String>,
    },
}

impl DownloadCommand {
    /// Display name and source for the coordinator.
    pub fn into_request(self) -> (String, DownloadSource) {
        match self {
            Self::Url { url, name } => {
                let name = name.unwrap_or_else(|| last_segment(&url));
                (name, DownloadSource::Url { url })
            }
            Self::ObjectStore { bucket, key, name } => {
                let name = name.unwrap_or_else(|| last_segment(&key));
                (name, DownloadSource::ObjectStore { bucket, key })
            }
            Self::Repo {
                repo,
                file,
                revision,
                name,
            } => {
                let name = name.unwrap_or_else(|| format!("{repo}/{}", last_segment(&file)));
                (
                    name,
                    DownloadSource::Repository {
                        repo,
                        file,
                        revision,
                    },
                )
            }
        }
    }
}

fn last_segment(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(path)
        .to_string()
}

/// Launch flags passed through to the inference server.
#[derive(Args, Debug, Clone, Default)]
pub struct LaunchArgs {
    /// Tokenizer name or path
    #[arg(long)]
    pub tokenizer: Option<String>,

    #[arg(long = "tensor-parallel-size", short = 't')]
    pub tensor_parallel_size: Option<u32>,

    #[arg(long = "pipeline-parallel-size")]
    pub pipeline_parallel_size: Option<u32>,

    /// auto, half, float16, bfloat16, float or float32
    #[arg(long)]
    pub dtype: Option<String>,

    /// Fraction of accelerator memory to use, in (0, 1]
    #[arg(long = "gpu-memory-utilization")]
    pub gpu_memory_utilization: Option<f64>,

    #[arg(long = "max-model-len")]
    pub max_model_len: Option<u32>,

    #[arg(long)]
    pub quantization: Option<String>,

    #[arg(long = "served-model-name")]
    pub served_model_name: Option<String>,

    #[arg(long = "trust-remote-code")]
    pub trust_remote_code: bool,

    #[arg(long = "enforce-eager")]
    pub enforce_eager: bool,
}

impl LaunchArgs {
    pub fn to_overrides(&self) -> LaunchOverrides {
        LaunchOverrides {
            tokenizer: self.tokenizer.clone(),
            tensor_parallel_size: self.tensor_parallel_size,
            pipeline_parallel_size: self.pipeline_parallel_size,
            dtype: self.dtype.clone(),
            gpu_memory_utilization: self.gpu_memory_utilization,
            max_model_len: self.max_model_len,
            quantization: self.quantization.clone(),
            served_model_name: self.served_model_name.clone(),
            trust_remote_code: self.trust_remote_code.then_some(true),
            enforce_eager: self.enforce_eager.then_some(true),
        }
    }
}
