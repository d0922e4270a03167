use crate::backend::{Backend, DeviceType, Launch, MemAccess};
use crate::config::HelloConfig;
use crate::resource::{Buffer, Context, Kernel, Program, Queue};
use crate::{Error, OptionExt as _, Result};
use log::info;
use std::{fs::File, io::Read, path::Path};

pub const KERNEL_NAME: &str = "hello";
/// Larger kernel files are cut at this size.
pub const MAX_SOURCE_SIZE: u64 = 0x10_0000;

pub fn load_kernel_source(path: &Path) -> Result<String> {
    let source_err = |cause| Error::KernelSource {
        path: path.display().to_string(),
        cause,
    };
    let file = File::open(path).map_err(source_err)?;
    let mut src = String::new();
    file.take(MAX_SOURCE_SIZE)
        .read_to_string(&mut src)
        .map_err(source_err)?;
    Ok(src)
}

/// Loads the kernel file and runs it. A missing file fails before any
/// compute API call is made.
pub fn run_hello<B: Backend>(backend: &B, config: &HelloConfig) -> Result<String> {
    let src = load_kernel_source(&config.kernel_path)?;
    info!("Loaded kernel source {}", config.kernel_path.display());
    run_hello_source(backend, &src, config.mem_size)
}

/// Runs `hello` once as a single task over a `mem_size`-byte buffer on the
/// first platform's default device and returns the string it wrote.
pub fn run_hello_source<B: Backend>(backend: &B, src: &str, mem_size: usize) -> Result<String> {
    if mem_size == 0 {
        return Err(Error::InvalidConfig("buffer size must be positive".into()));
    }

    let platform = *backend.platforms()?.first().context(|| Error::NoPlatform)?;
    let device = *backend
        .devices(platform, DeviceType::Default)?
        .first()
        .context(|| Error::NoDevice(format!("{:?} has no default device", platform)))?;

    let context = Context::new(backend, &[device])?;
    let queue = Queue::new(&context, device)?;
    let memobj = Buffer::<_, u8>::new(&context, MemAccess::ReadWrite, mem_size)?;
    let program = Program::build(&context, src)?;
    let mut kernel = Kernel::new(&program, KERNEL_NAME)?;
    kernel.set_arg(0, &memobj)?;

    let teardown = queue.finish_guard();
    unsafe { queue.launch(&kernel, Launch::Task)? };
    let mut out = vec![0u8; mem_size];
    queue.read(&memobj, &mut out)?;
    teardown.complete()?;

    Ok(host_string(&out))
}

/// The NUL-terminated string at the start of `buf`, or all of it if there is
/// no terminator.
pub fn host_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_string_stops_at_terminator() {
        assert_eq!(host_string(b"Hello, World!\0garbage"), "Hello, World!");
        assert_eq!(host_string(b"no terminator"), "no terminator");
        assert_eq!(host_string(&[0; 128]), "");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_kernel_source(Path::new("./definitely/not/here.cl")).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().starts_with("Failed to load kernel"));
    }
}
