use clap::{Parser, ValueEnum};
use std::path::PathBuf;

pub const DEFAULT_KERNEL_PATH: &str = "./main.cl";
pub const DEFAULT_MEM_SIZE: usize = 128;
pub const DEFAULT_MAX_NAME_LEN: usize = 1000;
pub const DEFAULT_ELEMENTS: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// In-memory backend with host implementations of the demo kernels.
    Mock,
    /// The system OpenCL runtime. Needs the `opencl` cargo feature.
    Opencl,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "opencl") {
            BackendKind::Opencl
        } else {
            BackendKind::Mock
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Capacity of a name buffer, terminator included. Longer names are cut.
    pub max_name_len: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_name_len: DEFAULT_MAX_NAME_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelloConfig {
    pub kernel_path: PathBuf,
    /// Size in bytes of the buffer the kernel writes its string into.
    pub mem_size: usize,
}

impl Default for HelloConfig {
    fn default() -> Self {
        Self {
            kernel_path: DEFAULT_KERNEL_PATH.into(),
            mem_size: DEFAULT_MEM_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecAddConfig {
    /// Length of each vector and size of the launch range.
    pub elements: usize,
}

impl Default for VecAddConfig {
    fn default() -> Self {
        Self {
            elements: DEFAULT_ELEMENTS,
        }
    }
}

/// List compute platforms and devices, then run the `hello` kernel.
#[derive(Parser, Debug)]
#[command(name = "cl_hello", version)]
pub struct HelloOpt {
    /// Kernel source file defining `hello`
    #[arg(long, value_name = "FILE", default_value = DEFAULT_KERNEL_PATH)]
    pub kernel: PathBuf,

    /// Size in bytes of the output buffer
    #[arg(long, default_value_t = DEFAULT_MEM_SIZE)]
    pub mem_size: usize,

    /// Capacity of platform/device name buffers
    #[arg(long, default_value_t = DEFAULT_MAX_NAME_LEN)]
    pub max_name_len: usize,

    #[arg(long, value_enum, default_value_t = BackendKind::default())]
    pub backend: BackendKind,
}

impl HelloOpt {
    pub fn discovery_config(&self) -> DiscoveryConfig {
        DiscoveryConfig {
            max_name_len: self.max_name_len,
        }
    }

    pub fn hello_config(&self) -> HelloConfig {
        HelloConfig {
            kernel_path: self.kernel.clone(),
            mem_size: self.mem_size,
        }
    }
}

/// Add two integer vectors on a device and check the result.
#[derive(Parser, Debug)]
#[command(name = "vecadd", version)]
pub struct VecAddOpt {
    /// Number of elements per vector
    #[arg(long, default_value_t = DEFAULT_ELEMENTS)]
    pub elements: usize,

    #[arg(long, value_enum, default_value_t = BackendKind::default())]
    pub backend: BackendKind,
}

impl VecAddOpt {
    pub fn vecadd_config(&self) -> VecAddConfig {
        VecAddConfig {
            elements: self.elements,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_defaults() {
        let opt = HelloOpt::try_parse_from(["cl_hello"]).unwrap();
        assert_eq!(opt.hello_config(), HelloConfig::default());
        assert_eq!(opt.discovery_config(), DiscoveryConfig::default());
        assert_eq!(opt.backend, BackendKind::default());
    }

    #[test]
    fn vecadd_flags() {
        let opt =
            VecAddOpt::try_parse_from(["vecadd", "--elements", "16", "--backend", "mock"]).unwrap();
        assert_eq!(opt.vecadd_config(), VecAddConfig { elements: 16 });
        assert_eq!(opt.backend, BackendKind::Mock);
        assert!(VecAddOpt::try_parse_from(["vecadd", "--backend", "cuda"]).is_err());
    }
}
