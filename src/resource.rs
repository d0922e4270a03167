//! Owned compute objects that release themselves on drop.
//!
//! Every child borrows its parent (queue, buffer and program borrow the
//! context; a kernel borrows its program and each buffer bound to it), so a
//! parent can never be released first. Declaring them in creation order makes
//! scope exit release them kernel → program → buffers → queue → context.

use crate::backend::{Backend, Launch, MemAccess};
use crate::Result;
use bytemuck::Pod;
use log::{debug, warn};
use std::{cell::Cell, marker::PhantomData, mem::ManuallyDrop};

pub struct Context<'b, B: Backend> {
    backend: &'b B,
    raw: ManuallyDrop<B::Context>,
    devices: Vec<B::Device>,
}

impl<'b, B: Backend> Context<'b, B> {
    pub fn new(backend: &'b B, devices: &[B::Device]) -> Result<Self> {
        let raw = backend.create_context(devices)?;
        debug!("Created context over {} device(s)", devices.len());
        Ok(Self {
            backend,
            raw: ManuallyDrop::new(raw),
            devices: devices.to_vec(),
        })
    }

    pub fn backend(&self) -> &'b B {
        self.backend
    }

    pub fn devices(&self) -> &[B::Device] {
        &self.devices
    }
}

impl<B: Backend> Drop for Context<'_, B> {
    fn drop(&mut self) {
        // SAFETY: `raw` is never touched again.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        debug!("Releasing context");
        self.backend.release_context(raw);
    }
}

/// An in-order command queue on one device of a context.
pub struct Queue<'a, B: Backend> {
    context: &'a Context<'a, B>,
    raw: ManuallyDrop<B::Queue>,
    device: B::Device,
    // Commands were enqueued since the last synchronization point.
    unsynced: Cell<bool>,
    // Invariant in `'a`: a call cannot shorten it, so host slices passed to
    // `write` outlive the queue itself.
    _host: PhantomData<fn(&'a ()) -> &'a ()>,
}

impl<'a, B: Backend> Queue<'a, B> {
    pub fn new(context: &'a Context<'a, B>, device: B::Device) -> Result<Self> {
        let raw = context.backend.create_queue(&context.raw, device)?;
        debug!("Created command queue on {:?}", device);
        Ok(Self {
            context,
            raw: ManuallyDrop::new(raw),
            device,
            unsynced: Cell::new(false),
            _host: PhantomData,
        })
    }

    pub fn device(&self) -> B::Device {
        self.device
    }

    /// Copies `data` into the front of `buffer`.
    ///
    /// A non-blocking write returns before the copy happens; it is only
    /// guaranteed complete after a later blocking call on this queue. The
    /// host slice must therefore outlive the queue, which drains itself on
    /// drop:
    ///
    /// ```compile_fail
    /// use cl_demos::backend::{Backend, DeviceType, MemAccess, MockBackend};
    /// use cl_demos::resource::{Buffer, Context, Queue};
    ///
    /// let mock = MockBackend::new();
    /// let platform = mock.platforms().unwrap()[0];
    /// let devices = mock.devices(platform, DeviceType::All).unwrap();
    /// let context = Context::new(&mock, &devices).unwrap();
    /// let buffer = Buffer::<_, i32>::new(&context, MemAccess::ReadOnly, 4).unwrap();
    /// let queue = Queue::new(&context, devices[0]).unwrap();
    /// {
    ///     let tmp = vec![7i32; 4];
    ///     queue.write(&buffer, &tmp, false).unwrap();
    /// }
    /// queue.finish().unwrap();
    /// ```
    ///
    /// ```
    /// use cl_demos::backend::{Backend, DeviceType, MemAccess, MockBackend};
    /// use cl_demos::resource::{Buffer, Context, Queue};
    ///
    /// let mock = MockBackend::new();
    /// let tmp = vec![7i32; 4];
    /// let platform = mock.platforms().unwrap()[0];
    /// let devices = mock.devices(platform, DeviceType::All).unwrap();
    /// let context = Context::new(&mock, &devices).unwrap();
    /// let buffer = Buffer::<_, i32>::new(&context, MemAccess::ReadOnly, 4).unwrap();
    /// let queue = Queue::new(&context, devices[0]).unwrap();
    /// queue.write(&buffer, &tmp, false).unwrap();
    /// queue.finish().unwrap();
    /// ```
    pub fn write<T: Pod>(
        &self,
        buffer: &Buffer<'_, B, T>,
        data: &'a [T],
        blocking: bool,
    ) -> Result<()> {
        // SAFETY: `data` outlives this queue, whose drop synchronizes.
        unsafe {
            self.context.backend.enqueue_write(
                &self.raw,
                &buffer.raw,
                blocking,
                bytemuck::cast_slice(data),
            )?
        };
        if !blocking {
            self.unsynced.set(true);
        }
        Ok(())
    }

    /// Blocking read from the front of `buffer`. Observes every command
    /// enqueued before it.
    pub fn read<T: Pod>(&self, buffer: &Buffer<'_, B, T>, out: &mut [T]) -> Result<()> {
        self.context
            .backend
            .enqueue_read(&self.raw, &buffer.raw, bytemuck::cast_slice_mut(out))?;
        self.unsynced.set(false);
        Ok(())
    }

    /// # Safety
    /// Every buffer bound to `kernel` must be large enough for `launch`.
    pub unsafe fn launch(&self, kernel: &Kernel<'_, B>, launch: Launch) -> Result<()> {
        self.context
            .backend
            .enqueue_kernel(&self.raw, &kernel.raw, launch)?;
        debug!("Enqueued kernel `{}` as {:?}", kernel.name, launch);
        self.unsynced.set(true);
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.context.backend.flush(&self.raw)
    }

    /// Blocks until every enqueued command has completed.
    pub fn finish(&self) -> Result<()> {
        self.context.backend.finish(&self.raw)?;
        self.unsynced.set(false);
        Ok(())
    }

    /// Declare this after every object the queue's commands use, so that it
    /// is dropped before them.
    pub fn finish_guard(&self) -> FinishGuard<'_, 'a, B> {
        FinishGuard {
            queue: self,
            armed: true,
        }
    }
}

impl<B: Backend> Drop for Queue<'_, B> {
    fn drop(&mut self) {
        if self.unsynced.get() {
            if let Err(err) = self.context.backend.finish(&self.raw) {
                warn!("Cannot drain command queue before release: {}", err);
            }
        }
        // SAFETY: `raw` is never touched again.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        debug!("Releasing command queue");
        self.context.backend.release_queue(raw);
    }
}

/// Teardown point of a queue. `complete` flushes then finishes; dropping it
/// without `complete` (an early `?` return) still finishes, best-effort, so
/// nothing is released while a command using it is outstanding.
pub struct FinishGuard<'q, 'a, B: Backend> {
    queue: &'q Queue<'a, B>,
    armed: bool,
}

impl<B: Backend> FinishGuard<'_, '_, B> {
    pub fn complete(mut self) -> Result<()> {
        self.armed = false;
        self.queue.flush()?;
        self.queue.finish()
    }
}

impl<B: Backend> Drop for FinishGuard<'_, '_, B> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.queue.finish() {
                warn!("Cannot finish command queue during teardown: {}", err);
            }
        }
    }
}

/// A device buffer of `len` elements of `T`.
pub struct Buffer<'a, B: Backend, T: Pod> {
    context: &'a Context<'a, B>,
    raw: ManuallyDrop<B::Mem>,
    len: usize,
    access: MemAccess,
    _elem: PhantomData<T>,
}

impl<'a, B: Backend, T: Pod> Buffer<'a, B, T> {
    pub fn new(context: &'a Context<'a, B>, access: MemAccess, len: usize) -> Result<Self> {
        let size = len * std::mem::size_of::<T>();
        let raw = context.backend.create_buffer(&context.raw, access, size)?;
        debug!("Created {:?} buffer of {} bytes", access, size);
        Ok(Self {
            context,
            raw: ManuallyDrop::new(raw),
            len,
            access,
            _elem: PhantomData,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn access(&self) -> MemAccess {
        self.access
    }
}

impl<B: Backend, T: Pod> Drop for Buffer<'_, B, T> {
    fn drop(&mut self) {
        // SAFETY: `raw` is never touched again.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        debug!("Releasing {:?} buffer", self.access);
        self.context.backend.release_mem(raw);
    }
}

/// A program built for every device of its context.
pub struct Program<'a, B: Backend> {
    context: &'a Context<'a, B>,
    raw: ManuallyDrop<B::Program>,
}

impl<'a, B: Backend> Program<'a, B> {
    pub fn build(context: &'a Context<'a, B>, src: &str) -> Result<Self> {
        let raw = context.backend.create_program(&context.raw, src)?;
        // Wrap first so a failed build still releases the program.
        let program = Self {
            context,
            raw: ManuallyDrop::new(raw),
        };
        context
            .backend
            .build_program(&program.raw, &context.devices)?;
        debug!("Built program ({} bytes of source)", src.len());
        Ok(program)
    }
}

impl<B: Backend> Drop for Program<'_, B> {
    fn drop(&mut self) {
        // SAFETY: `raw` is never touched again.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        debug!("Releasing program");
        self.context.backend.release_program(raw);
    }
}

pub struct Kernel<'a, B: Backend> {
    program: &'a Program<'a, B>,
    raw: ManuallyDrop<B::Kernel>,
    name: String,
}

impl<'a, B: Backend> Kernel<'a, B> {
    pub fn new(program: &'a Program<'a, B>, name: &str) -> Result<Self> {
        let raw = program
            .context
            .backend
            .create_kernel(&program.raw, name)?;
        debug!("Created kernel `{}`", name);
        Ok(Self {
            program,
            raw: ManuallyDrop::new(raw),
            name: name.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binds `buffer` to the zero-based argument slot `index`. The buffer is
    /// borrowed for as long as the kernel lives.
    pub fn set_arg<T: Pod>(&mut self, index: u32, buffer: &'a Buffer<'a, B, T>) -> Result<()> {
        self.program
            .context
            .backend
            .set_kernel_arg(&self.raw, index, &buffer.raw)
    }
}

impl<B: Backend> Drop for Kernel<'_, B> {
    fn drop(&mut self) {
        // SAFETY: `raw` is never touched again.
        let raw = unsafe { ManuallyDrop::take(&mut self.raw) };
        debug!("Releasing kernel `{}`", self.name);
        self.program.context.backend.release_kernel(raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{mock::Event, DeviceType, MockBackend};

    fn released(mock: &MockBackend) -> Vec<u64> {
        mock.journal()
            .into_iter()
            .filter_map(|ev| match ev {
                Event::Released(_, id) => Some(id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn failed_build_releases_program() {
        let mock = MockBackend::new();
        let platform = mock.platforms().unwrap()[0];
        let devices = mock.devices(platform, DeviceType::All).unwrap();
        let context = Context::new(&mock, &devices).unwrap();
        assert!(Program::build(&context, "#error nope\nkernel void x() {}").is_err());
        // Context #1, program #2.
        assert_eq!(released(&mock), [2]);
        drop(context);
        assert_eq!(mock.live_handles(), 0);
        assert!(mock.violations().is_empty(), "{:?}", mock.violations());
    }

    #[test]
    fn unsynchronized_queue_drains_before_release() {
        let mock = MockBackend::new();
        let data = [7i32; 4];
        let platform = mock.platforms().unwrap()[0];
        let devices = mock.devices(platform, DeviceType::All).unwrap();
        let context = Context::new(&mock, &devices).unwrap();
        {
            let buffer = Buffer::<_, i32>::new(&context, MemAccess::ReadOnly, 4).unwrap();
            let queue = Queue::new(&context, devices[0]).unwrap();
            queue.write(&buffer, &data, false).unwrap();
            assert_eq!(mock.pending_commands(), 1);
        }
        assert_eq!(mock.pending_commands(), 0);
        assert!(mock.journal().windows(2).any(|w| {
            w[0] == Event::Call("clFinish") && w[1] == Event::Call("clReleaseCommandQueue")
        }));
        assert!(mock.violations().is_empty(), "{:?}", mock.violations());
    }
}
