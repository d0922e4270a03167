//! The seam between the demo programs and a compute API.
//!
//! Owned handles (context, queue, program, kernel, buffer) are handed out by
//! value and must be given back exactly once through the matching `release_*`
//! method. Callers normally never do that themselves: see [`crate::resource`].

use crate::Result;
use std::fmt::Debug;

pub mod mock;
#[cfg(feature = "opencl")]
pub mod opencl;

pub use mock::MockBackend;
#[cfg(feature = "opencl")]
pub use opencl::OpenClBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    /// The platform's default device.
    Default,
    /// Every device of every type.
    All,
}

/// How kernels may access a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemAccess {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

/// Shape of a kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// Run the kernel body exactly once.
    Task,
    /// Run one instance per global index in `0..n`, in no particular order.
    Range(usize),
}

impl Launch {
    pub fn global_size(self) -> usize {
        match self {
            Launch::Task => 1,
            Launch::Range(n) => n,
        }
    }
}

pub trait Backend {
    type Platform: Copy + Debug;
    type Device: Copy + Debug;
    type Context;
    type Queue;
    type Program;
    type Kernel;
    type Mem;

    fn platforms(&self) -> Result<Vec<Self::Platform>>;
    fn platform_vendor(&self, platform: Self::Platform) -> Result<String>;
    /// An empty list, not an error, when the platform has no such device.
    fn devices(&self, platform: Self::Platform, ty: DeviceType) -> Result<Vec<Self::Device>>;
    fn device_name(&self, device: Self::Device) -> Result<String>;

    fn create_context(&self, devices: &[Self::Device]) -> Result<Self::Context>;
    /// In-order queue with default properties.
    fn create_queue(&self, context: &Self::Context, device: Self::Device) -> Result<Self::Queue>;
    fn create_program(&self, context: &Self::Context, src: &str) -> Result<Self::Program>;
    /// Compiles synchronously. Failures carry the compiler log.
    fn build_program(&self, program: &Self::Program, devices: &[Self::Device]) -> Result<()>;
    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel>;
    fn create_buffer(
        &self,
        context: &Self::Context,
        access: MemAccess,
        size: usize,
    ) -> Result<Self::Mem>;
    fn set_kernel_arg(&self, kernel: &Self::Kernel, index: u32, mem: &Self::Mem) -> Result<()>;

    /// # Safety
    /// For a non-blocking write `data` must stay valid and unmodified until
    /// the queue has completed the command.
    unsafe fn enqueue_write(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        blocking: bool,
        data: &[u8],
    ) -> Result<()>;
    /// Always blocking: `data` is valid once this returns.
    fn enqueue_read(&self, queue: &Self::Queue, mem: &Self::Mem, data: &mut [u8]) -> Result<()>;
    /// # Safety
    /// The kernel body is foreign code; every bound argument must be large
    /// enough for the index space it is launched over.
    unsafe fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        launch: Launch,
    ) -> Result<()>;
    fn flush(&self, queue: &Self::Queue) -> Result<()>;
    fn finish(&self, queue: &Self::Queue) -> Result<()>;

    fn release_kernel(&self, kernel: Self::Kernel);
    fn release_program(&self, program: Self::Program);
    fn release_mem(&self, mem: Self::Mem);
    fn release_queue(&self, queue: Self::Queue);
    fn release_context(&self, context: Self::Context);
}
