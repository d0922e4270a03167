use crate::backend::{Backend, DeviceType, Launch, MemAccess};
use crate::config::VecAddConfig;
use crate::resource::{Buffer, Context, Kernel, Program, Queue};
use crate::{Error, OptionExt as _, Result};
use log::info;

pub const KERNEL_NAME: &str = "vecadd";
pub const PROGRAM_SOURCE: &str = r#"
__kernel
void vecadd(__global int *A,
            __global int *B,
            __global int *C)
{
    int idx = get_global_id(0);

    C[idx] = A[idx] + B[idx];
}
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VecAddReport {
    pub output: Vec<i32>,
    pub correct: bool,
}

impl VecAddReport {
    pub fn message(&self) -> &'static str {
        if self.correct {
            "Output is correct"
        } else {
            "Output is incorrect"
        }
    }
}

/// `A[i] = i` and `B[i] = i`.
pub fn inputs(elements: usize) -> (Vec<i32>, Vec<i32>) {
    let a: Vec<i32> = (0..elements as i32).collect();
    (a.clone(), a)
}

/// Whether `c` holds the element-wise sum of `a` and `b`.
pub fn verify(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    a.len() == c.len()
        && b.len() == c.len()
        && a
            .iter()
            .zip(b)
            .zip(c)
            .all(|((&x, &y), &z)| x.wrapping_add(y) == z)
}

pub fn run_vecadd<B: Backend>(backend: &B, config: &VecAddConfig) -> Result<VecAddReport> {
    if config.elements == 0 || config.elements > i32::MAX as usize {
        return Err(Error::InvalidConfig(format!(
            "element count must be in 1..={}, got {}",
            i32::MAX,
            config.elements,
        )));
    }

    let (a, b) = inputs(config.elements);
    let output = add_on_device(backend, PROGRAM_SOURCE, &a, &b)?;
    let correct = verify(&a, &b, &output);
    info!("Added {} elements, correct: {}", config.elements, correct);
    Ok(VecAddReport { output, correct })
}

/// Builds `src`, which must define `vecadd`, over every device of the first
/// platform and launches it across `a.len()` indices on the first device.
pub fn add_on_device<B: Backend>(backend: &B, src: &str, a: &[i32], b: &[i32]) -> Result<Vec<i32>> {
    if a.len() != b.len() || a.is_empty() {
        return Err(Error::InvalidConfig(format!(
            "inputs must be non-empty and of equal length, got {} and {}",
            a.len(),
            b.len(),
        )));
    }
    let elements = a.len();

    let platform = *backend.platforms()?.first().context(|| Error::NoPlatform)?;
    let devices = backend.devices(platform, DeviceType::All)?;
    let device = *devices
        .first()
        .context(|| Error::NoDevice(format!("{:?} has no device", platform)))?;

    let context = Context::new(backend, &devices)?;
    let queue = Queue::new(&context, device)?;
    let buf_a = Buffer::<_, i32>::new(&context, MemAccess::ReadOnly, elements)?;
    let buf_b = Buffer::<_, i32>::new(&context, MemAccess::ReadOnly, elements)?;
    let buf_c = Buffer::<_, i32>::new(&context, MemAccess::WriteOnly, elements)?;
    let program = Program::build(&context, src)?;
    let mut kernel = Kernel::new(&program, KERNEL_NAME)?;
    kernel.set_arg(0, &buf_a)?;
    kernel.set_arg(1, &buf_b)?;
    kernel.set_arg(2, &buf_c)?;

    let teardown = queue.finish_guard();
    queue.write(&buf_a, a, false)?;
    queue.write(&buf_b, b, false)?;
    unsafe { queue.launch(&kernel, Launch::Range(elements))? };
    let mut c = vec![0i32; elements];
    queue.read(&buf_c, &mut c)?;
    teardown.complete()?;

    Ok(c)
}
