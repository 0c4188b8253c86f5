use std::fmt;

use clap::ValueEnum;

/// Compute backend the pipeline runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ComputeBackend {
    /// GPU through wgpu (Vulkan, Metal, DX12 or WebGPU).
    #[default]
    Wgpu,
    /// CPU through ndarray.
    Ndarray,
}

impl ComputeBackend {
    pub fn is_gpu(self) -> bool {
        matches!(self, Self::Wgpu)
    }
}

impl fmt::Display for ComputeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wgpu => write!(f, "wgpu"),
            Self::Ndarray => write!(f, "ndarray"),
        }
    }
}
