use failure::Fail;
use std::{fmt::Display, io};

pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for a missing or unreadable kernel source file.
pub const EXIT_CONFIG: i32 = 1;
/// Exit code for any failure reported by the compute API.
pub const EXIT_COMPUTE: i32 = 2;

#[derive(Debug, Fail)]
pub enum Error {
    #[fail(display = "Failed to load kernel `{}`: {}", path, cause)]
    KernelSource {
        path: String,
        #[cause]
        cause: io::Error,
    },

    #[fail(display = "{} failed: {}", op, status)]
    Api { op: &'static str, status: String },

    #[fail(display = "Program build failed:\n{}", log)]
    Build { log: String },

    #[fail(display = "Kernel `{}` is not defined in the program", name)]
    KernelNotFound { name: String },

    #[fail(display = "No compute platform available")]
    NoPlatform,

    #[fail(display = "No device available: {}", _0)]
    NoDevice(String),

    #[fail(display = "Invalid configuration: {}", _0)]
    InvalidConfig(String),
}

impl Error {
    pub fn api(op: &'static str, status: impl Display) -> Self {
        Error::Api {
            op,
            status: status.to_string(),
        }
    }

    /// Configuration errors are reported apart from compute errors.
    pub fn is_config(&self) -> bool {
        matches!(self, Error::KernelSource { .. } | Error::InvalidConfig(_))
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_config() {
            EXIT_CONFIG
        } else {
            EXIT_COMPUTE
        }
    }
}

pub trait OptionExt<T> {
    fn context(self, err: impl FnOnce() -> Error) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn context(self, err: impl FnOnce() -> Error) -> Result<T> {
        self.ok_or_else(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let missing = Error::KernelSource {
            path: "./main.cl".into(),
            cause: io::Error::new(io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(missing.exit_code(), EXIT_CONFIG);
        assert_eq!(
            Error::api("clCreateContext", "CL_OUT_OF_HOST_MEMORY").exit_code(),
            EXIT_COMPUTE,
        );
        assert_eq!(Error::NoPlatform.exit_code(), EXIT_COMPUTE);
    }

    #[test]
    fn api_error_names_operation_and_status() {
        let err = Error::api("clBuildProgram", "CL_BUILD_PROGRAM_FAILURE");
        assert_eq!(
            err.to_string(),
            "clBuildProgram failed: CL_BUILD_PROGRAM_FAILURE",
        );
    }
}
