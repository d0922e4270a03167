//! In-memory backend for tests and for machines without an OpenCL runtime.
//!
//! Kernels are host closures registered by name. The queue is in-order and
//! deferred: writes and launches sit in the queue until a `finish` or a
//! blocking read drains it, so code that forgets to synchronize observes
//! stale data here just like on a device. Every API call and every handle
//! creation/release is journaled, and lifecycle mistakes are collected as
//! violations instead of crashing.

use super::{Backend, DeviceType, Launch, MemAccess};
use crate::{Error, Result};
use log::{debug, trace};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use std::{
    cell::RefCell,
    collections::{BTreeMap, HashMap, HashSet, VecDeque},
    fmt,
    rc::Rc,
};

const DEFAULT_SEED: u64 = 0x5eed;

/// Body of a mock kernel: called once per global index with the contents of
/// every bound argument, in argument order.
pub type KernelBody = Rc<dyn Fn(usize, &mut [Vec<u8>])>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Context,
    Queue,
    Program,
    Kernel,
    Mem,
}

impl HandleKind {
    fn invalid_status(self) -> &'static str {
        match self {
            HandleKind::Context => "CL_INVALID_CONTEXT",
            HandleKind::Queue => "CL_INVALID_COMMAND_QUEUE",
            HandleKind::Program => "CL_INVALID_PROGRAM",
            HandleKind::Kernel => "CL_INVALID_KERNEL",
            HandleKind::Mem => "CL_INVALID_MEM_OBJECT",
        }
    }
}

/// An owned mock object. Deliberately not `Clone`.
#[derive(Debug, PartialEq, Eq)]
pub struct MockHandle {
    kind: HandleKind,
    id: u64,
}

impl MockHandle {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockPlatform(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockDevice {
    platform: usize,
    index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Call(&'static str),
    Created(HandleKind, u64),
    Released(HandleKind, u64),
}

#[derive(Clone)]
struct KernelDef {
    arity: u32,
    body: KernelBody,
}

impl fmt::Debug for KernelDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelDef")
            .field("arity", &self.arity)
            .finish()
    }
}

#[derive(Debug)]
struct PlatformSpec {
    vendor: String,
    devices: Vec<String>,
}

#[derive(Debug)]
enum Command {
    Write { mem: u64, data: Vec<u8> },
    Launch {
        kernel: u64,
        def: KernelDef,
        args: Vec<u64>,
        launch: Launch,
    },
}

impl Command {
    fn references(&self, id: u64) -> bool {
        match self {
            Command::Write { mem, .. } => *mem == id,
            Command::Launch { kernel, args, .. } => *kernel == id || args.contains(&id),
        }
    }
}

#[derive(Debug)]
enum Object {
    Context {
        devices: Vec<MockDevice>,
    },
    Queue {
        context: u64,
        pending: VecDeque<Command>,
    },
    Program {
        context: u64,
        src: String,
        entry_points: Option<Vec<String>>,
    },
    Kernel {
        program: u64,
        name: String,
        def: KernelDef,
        args: BTreeMap<u32, u64>,
    },
    Mem {
        context: u64,
        access: MemAccess,
        data: Vec<u8>,
    },
}

impl Object {
    fn kind(&self) -> HandleKind {
        match self {
            Object::Context { .. } => HandleKind::Context,
            Object::Queue { .. } => HandleKind::Queue,
            Object::Program { .. } => HandleKind::Program,
            Object::Kernel { .. } => HandleKind::Kernel,
            Object::Mem { .. } => HandleKind::Mem,
        }
    }

    /// Whether this object cannot outlive `id`.
    fn depends_on(&self, id: u64) -> bool {
        match self {
            Object::Context { .. } => false,
            Object::Queue { context, .. }
            | Object::Program { context, .. }
            | Object::Mem { context, .. } => *context == id,
            Object::Kernel { program, args, .. } => {
                *program == id || args.values().any(|&mem| mem == id)
            }
        }
    }
}

struct State {
    objects: HashMap<u64, Object>,
    released: HashSet<u64>,
    next_id: u64,
    journal: Vec<Event>,
    violations: Vec<String>,
    rng: StdRng,
}

impl State {
    fn insert(&mut self, object: Object) -> MockHandle {
        self.next_id += 1;
        let handle = MockHandle {
            kind: object.kind(),
            id: self.next_id,
        };
        debug!("mock: created {:?} #{}", handle.kind, handle.id);
        self.journal.push(Event::Created(handle.kind, handle.id));
        self.objects.insert(handle.id, object);
        handle
    }

    fn get(&mut self, handle: &MockHandle, op: &'static str) -> Result<&mut Object> {
        self.check_live(handle.id, handle.kind, op)?;
        self.objects
            .get_mut(&handle.id)
            .ok_or_else(|| Error::api(op, handle.kind.invalid_status()))
    }

    fn check_live(&mut self, id: u64, kind: HandleKind, op: &'static str) -> Result<()> {
        match self.objects.get(&id) {
            Some(obj) if obj.kind() == kind => Ok(()),
            _ => {
                let what = if self.released.contains(&id) {
                    "use after release"
                } else {
                    "unknown handle"
                };
                self.violations
                    .push(format!("{}: {} of {:?} #{}", op, what, kind, id));
                Err(Error::api(op, kind.invalid_status()))
            }
        }
    }

    fn context_of(&self, id: u64) -> Option<u64> {
        match self.objects.get(&id)? {
            Object::Context { .. } => Some(id),
            Object::Queue { context, .. }
            | Object::Program { context, .. }
            | Object::Mem { context, .. } => Some(*context),
            Object::Kernel { program, .. } => self.context_of(*program),
        }
    }

    fn context_devices(&self, context: u64) -> &[MockDevice] {
        match self.objects.get(&context) {
            Some(Object::Context { devices }) => devices,
            _ => &[],
        }
    }

    fn pending_mut(&mut self, queue: u64) -> Option<&mut VecDeque<Command>> {
        match self.objects.get_mut(&queue) {
            Some(Object::Queue { pending, .. }) => Some(pending),
            _ => None,
        }
    }

    /// Completes every command of `queue` in submission order.
    fn drain(&mut self, queue: u64) {
        let pending = match self.pending_mut(queue) {
            Some(pending) => std::mem::take(pending),
            None => return,
        };
        for cmd in pending {
            self.execute(cmd);
        }
    }

    fn execute(&mut self, cmd: Command) {
        match cmd {
            Command::Write { mem, data } => match self.objects.get_mut(&mem) {
                Some(Object::Mem { data: dest, .. }) => dest[..data.len()].copy_from_slice(&data),
                _ => self
                    .violations
                    .push(format!("write completed after Mem #{} was released", mem)),
            },
            Command::Launch {
                kernel,
                def,
                args,
                launch,
            } => {
                let mut bufs = Vec::with_capacity(args.len());
                for &mem in &args {
                    match self.objects.get(&mem) {
                        Some(Object::Mem { data, .. }) => bufs.push(data.clone()),
                        _ => {
                            self.violations.push(format!(
                                "Kernel #{} ran after its argument Mem #{} was released",
                                kernel, mem,
                            ));
                            return;
                        }
                    }
                }

                let mut order: Vec<usize> = (0..launch.global_size()).collect();
                order.shuffle(&mut self.rng);
                for gid in order {
                    (def.body)(gid, &mut bufs[..]);
                }

                for (&mem, buf) in args.iter().zip(bufs) {
                    if let Some(Object::Mem { data, access, .. }) = self.objects.get_mut(&mem) {
                        if *access == MemAccess::ReadOnly && *data != buf {
                            self.violations.push(format!(
                                "Kernel #{} wrote to read-only Mem #{}",
                                kernel, mem,
                            ));
                        }
                        *data = buf;
                    }
                }
            }
        }
    }

    fn release(&mut self, handle: MockHandle, op: &'static str, expected: HandleKind) {
        self.journal.push(Event::Call(op));
        let MockHandle { kind, id } = handle;
        if kind != expected {
            self.violations
                .push(format!("{}: given {:?} #{}", op, kind, id));
            return;
        }
        if self.released.contains(&id) {
            self.violations
                .push(format!("{}: double release of {:?} #{}", op, kind, id));
            return;
        }
        if !self.objects.contains_key(&id) {
            self.violations
                .push(format!("{}: unknown {:?} #{}", op, kind, id));
            return;
        }

        for (&other, obj) in &self.objects {
            if let Object::Queue { pending, .. } = obj {
                if other == id && !pending.is_empty() {
                    self.violations.push(format!(
                        "Queue #{} released with {} outstanding commands",
                        id,
                        pending.len(),
                    ));
                } else if pending.iter().any(|cmd| cmd.references(id)) {
                    self.violations.push(format!(
                        "{:?} #{} released while Queue #{} has an outstanding command using it",
                        kind, id, other,
                    ));
                }
            }
            if other != id && obj.depends_on(id) {
                self.violations.push(format!(
                    "{:?} #{} released before dependent {:?} #{}",
                    kind,
                    id,
                    obj.kind(),
                    other,
                ));
            }
        }

        self.objects.remove(&id);
        self.released.insert(id);
        debug!("mock: released {:?} #{}", kind, id);
        self.journal.push(Event::Released(kind, id));
    }
}

pub struct MockBackend {
    platforms: Vec<PlatformSpec>,
    kernels: HashMap<String, KernelDef>,
    failing: HashSet<String>,
    state: RefCell<State>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// One platform with one device, and the `hello` and `vecadd` kernels.
    pub fn new() -> Self {
        Self::empty().with_platform("Mock Vendor", &["Mock Device"])
    }

    /// No platform at all.
    pub fn empty() -> Self {
        let backend = Self {
            platforms: Vec::new(),
            kernels: HashMap::new(),
            failing: HashSet::new(),
            state: RefCell::new(State {
                objects: HashMap::new(),
                released: HashSet::new(),
                next_id: 0,
                journal: Vec::new(),
                violations: Vec::new(),
                rng: StdRng::seed_from_u64(DEFAULT_SEED),
            }),
        };
        backend
            .with_kernel("hello", 1, hello_kernel)
            .with_kernel("vecadd", 3, vecadd_kernel)
    }

    pub fn with_platform(mut self, vendor: &str, devices: &[&str]) -> Self {
        self.platforms.push(PlatformSpec {
            vendor: vendor.to_owned(),
            devices: devices.iter().map(|&name| name.to_owned()).collect(),
        });
        self
    }

    /// Registers (or replaces) the host body run for kernel `name`.
    pub fn with_kernel(
        mut self,
        name: &str,
        arity: u32,
        body: impl Fn(usize, &mut [Vec<u8>]) + 'static,
    ) -> Self {
        self.kernels.insert(
            name.to_owned(),
            KernelDef {
                arity,
                body: Rc::new(body),
            },
        );
        self
    }

    /// Makes every call of API function `op` (e.g. `clBuildProgram`) fail.
    pub fn failing_on(mut self, op: &str) -> Self {
        self.failing.insert(op.to_owned());
        self
    }

    /// Seeds the order in which range launches visit their indices.
    pub fn with_seed(self, seed: u64) -> Self {
        self.state.borrow_mut().rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn journal(&self) -> Vec<Event> {
        self.state.borrow().journal.clone()
    }

    /// Forgets the journal and the ids of released handles, so a long-lived
    /// mock does not keep growing. Live handles and violations are kept.
    pub fn reset_journal(&self) {
        let mut state = self.state.borrow_mut();
        state.journal.clear();
        state.released.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    /// Number of handles created and not yet released.
    pub fn live_handles(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Commands submitted but not completed, over every queue.
    pub fn pending_commands(&self) -> usize {
        self.state
            .borrow()
            .objects
            .values()
            .map(|obj| match obj {
                Object::Queue { pending, .. } => pending.len(),
                _ => 0,
            })
            .sum()
    }

    fn call(&self, op: &'static str) -> Result<std::cell::RefMut<'_, State>> {
        trace!("mock: {}", op);
        let mut state = self.state.borrow_mut();
        state.journal.push(Event::Call(op));
        if self.failing.contains(op) {
            return Err(Error::api(op, "CL_OUT_OF_RESOURCES"));
        }
        Ok(state)
    }

    fn platform(&self, platform: MockPlatform, op: &'static str) -> Result<&PlatformSpec> {
        self.platforms
            .get(platform.0)
            .ok_or_else(|| Error::api(op, "CL_INVALID_PLATFORM"))
    }

    fn device_exists(&self, device: MockDevice) -> bool {
        self.platforms
            .get(device.platform)
            .map_or(false, |p| device.index < p.devices.len())
    }
}

impl Backend for MockBackend {
    type Platform = MockPlatform;
    type Device = MockDevice;
    type Context = MockHandle;
    type Queue = MockHandle;
    type Program = MockHandle;
    type Kernel = MockHandle;
    type Mem = MockHandle;

    fn platforms(&self) -> Result<Vec<MockPlatform>> {
        self.call("clGetPlatformIDs")?;
        Ok((0..self.platforms.len()).map(MockPlatform).collect())
    }

    fn platform_vendor(&self, platform: MockPlatform) -> Result<String> {
        const OP: &str = "clGetPlatformInfo";
        self.call(OP)?;
        Ok(self.platform(platform, OP)?.vendor.clone())
    }

    fn devices(&self, platform: MockPlatform, ty: DeviceType) -> Result<Vec<MockDevice>> {
        const OP: &str = "clGetDeviceIDs";
        self.call(OP)?;
        let count = match ty {
            DeviceType::Default => self.platform(platform, OP)?.devices.len().min(1),
            DeviceType::All => self.platform(platform, OP)?.devices.len(),
        };
        Ok((0..count)
            .map(|index| MockDevice {
                platform: platform.0,
                index,
            })
            .collect())
    }

    fn device_name(&self, device: MockDevice) -> Result<String> {
        const OP: &str = "clGetDeviceInfo";
        self.call(OP)?;
        self.platforms
            .get(device.platform)
            .and_then(|p| p.devices.get(device.index))
            .cloned()
            .ok_or_else(|| Error::api(OP, "CL_INVALID_DEVICE"))
    }

    fn create_context(&self, devices: &[MockDevice]) -> Result<MockHandle> {
        const OP: &str = "clCreateContext";
        let mut state = self.call(OP)?;
        if devices.is_empty() {
            return Err(Error::api(OP, "CL_INVALID_VALUE"));
        }
        if !devices.iter().all(|&dev| self.device_exists(dev)) {
            return Err(Error::api(OP, "CL_INVALID_DEVICE"));
        }
        Ok(state.insert(Object::Context {
            devices: devices.to_vec(),
        }))
    }

    fn create_queue(&self, context: &MockHandle, device: MockDevice) -> Result<MockHandle> {
        const OP: &str = "clCreateCommandQueue";
        let mut state = self.call(OP)?;
        state.get(context, OP)?;
        if !state.context_devices(context.id).contains(&device) {
            return Err(Error::api(OP, "CL_INVALID_DEVICE"));
        }
        Ok(state.insert(Object::Queue {
            context: context.id,
            pending: VecDeque::new(),
        }))
    }

    fn create_program(&self, context: &MockHandle, src: &str) -> Result<MockHandle> {
        const OP: &str = "clCreateProgramWithSource";
        let mut state = self.call(OP)?;
        state.get(context, OP)?;
        if src.is_empty() {
            return Err(Error::api(OP, "CL_INVALID_VALUE"));
        }
        Ok(state.insert(Object::Program {
            context: context.id,
            src: src.to_owned(),
            entry_points: None,
        }))
    }

    fn build_program(&self, program: &MockHandle, devices: &[MockDevice]) -> Result<()> {
        const OP: &str = "clBuildProgram";
        let mut state = self.call(OP)?;
        state.get(program, OP)?;
        let context = state.context_of(program.id).unwrap_or_default();
        let known = state.context_devices(context);
        if !devices.iter().all(|dev| known.contains(dev)) {
            return Err(Error::api(OP, "CL_INVALID_DEVICE"));
        }
        if let Object::Program {
            src, entry_points, ..
        } = state.get(program, OP)?
        {
            let entries = compile(src).map_err(|log| Error::Build { log })?;
            *entry_points = Some(entries);
        }
        Ok(())
    }

    fn create_kernel(&self, program: &MockHandle, name: &str) -> Result<MockHandle> {
        const OP: &str = "clCreateKernel";
        let mut state = self.call(OP)?;
        let declared = match state.get(program, OP)? {
            Object::Program {
                entry_points: Some(entries),
                ..
            } => entries.iter().any(|entry| entry == name),
            _ => return Err(Error::api(OP, "CL_INVALID_PROGRAM_EXECUTABLE")),
        };
        let def = match self.kernels.get(name) {
            Some(def) if declared => def.clone(),
            _ => {
                return Err(Error::KernelNotFound {
                    name: name.to_owned(),
                })
            }
        };
        Ok(state.insert(Object::Kernel {
            program: program.id,
            name: name.to_owned(),
            def,
            args: BTreeMap::new(),
        }))
    }

    fn create_buffer(
        &self,
        context: &MockHandle,
        access: MemAccess,
        size: usize,
    ) -> Result<MockHandle> {
        const OP: &str = "clCreateBuffer";
        let mut state = self.call(OP)?;
        state.get(context, OP)?;
        if size == 0 {
            return Err(Error::api(OP, "CL_INVALID_BUFFER_SIZE"));
        }
        Ok(state.insert(Object::Mem {
            context: context.id,
            access,
            data: vec![0; size],
        }))
    }

    fn set_kernel_arg(&self, kernel: &MockHandle, index: u32, mem: &MockHandle) -> Result<()> {
        const OP: &str = "clSetKernelArg";
        let mut state = self.call(OP)?;
        state.get(mem, OP)?;
        let mem_context = state.context_of(mem.id);
        let kernel_context = state.context_of(kernel.id);
        match state.get(kernel, OP)? {
            Object::Kernel { def, args, .. } => {
                if index >= def.arity {
                    return Err(Error::api(OP, "CL_INVALID_ARG_INDEX"));
                }
                if mem_context != kernel_context {
                    return Err(Error::api(OP, "CL_INVALID_MEM_OBJECT"));
                }
                args.insert(index, mem.id);
                Ok(())
            }
            _ => unreachable!("kind checked by `get`"),
        }
    }

    unsafe fn enqueue_write(
        &self,
        queue: &MockHandle,
        mem: &MockHandle,
        blocking: bool,
        data: &[u8],
    ) -> Result<()> {
        const OP: &str = "clEnqueueWriteBuffer";
        let mut state = self.call(OP)?;
        state.get(queue, OP)?;
        match state.get(mem, OP)? {
            Object::Mem { data: dest, .. } if data.len() <= dest.len() => {}
            _ => return Err(Error::api(OP, "CL_INVALID_VALUE")),
        }
        // Snapshot now: the host slice may be reused once this returns.
        if let Some(pending) = state.pending_mut(queue.id) {
            pending.push_back(Command::Write {
                mem: mem.id,
                data: data.to_vec(),
            });
        }
        if blocking {
            state.drain(queue.id);
        }
        Ok(())
    }

    fn enqueue_read(&self, queue: &MockHandle, mem: &MockHandle, data: &mut [u8]) -> Result<()> {
        const OP: &str = "clEnqueueReadBuffer";
        let mut state = self.call(OP)?;
        state.get(queue, OP)?;
        match state.get(mem, OP)? {
            Object::Mem { data: src, .. } if data.len() <= src.len() => {}
            _ => return Err(Error::api(OP, "CL_INVALID_VALUE")),
        }
        state.drain(queue.id);
        if let Object::Mem { data: src, .. } = state.get(mem, OP)? {
            data.copy_from_slice(&src[..data.len()]);
        }
        Ok(())
    }

    unsafe fn enqueue_kernel(
        &self,
        queue: &MockHandle,
        kernel: &MockHandle,
        launch: Launch,
    ) -> Result<()> {
        let op = match launch {
            Launch::Task => "clEnqueueTask",
            Launch::Range(_) => "clEnqueueNDRangeKernel",
        };
        let mut state = self.call(op)?;
        state.get(queue, op)?;
        if launch.global_size() == 0 {
            return Err(Error::api(op, "CL_INVALID_GLOBAL_WORK_SIZE"));
        }
        let (def, args) = match state.get(kernel, op)? {
            Object::Kernel { def, args, name, .. } => {
                let bound: Option<Vec<u64>> =
                    (0..def.arity).map(|i| args.get(&i).copied()).collect();
                match bound {
                    Some(bound) => (def.clone(), bound),
                    None => {
                        debug!("mock: kernel `{}` launched with unset arguments", name);
                        return Err(Error::api(op, "CL_INVALID_KERNEL_ARGS"));
                    }
                }
            }
            _ => unreachable!("kind checked by `get`"),
        };
        for &mem in &args {
            state.check_live(mem, HandleKind::Mem, op)?;
        }
        if let Some(pending) = state.pending_mut(queue.id) {
            pending.push_back(Command::Launch {
                kernel: kernel.id,
                def,
                args,
                launch,
            });
        }
        Ok(())
    }

    fn flush(&self, queue: &MockHandle) -> Result<()> {
        const OP: &str = "clFlush";
        let mut state = self.call(OP)?;
        state.get(queue, OP)?;
        Ok(())
    }

    fn finish(&self, queue: &MockHandle) -> Result<()> {
        const OP: &str = "clFinish";
        let mut state = self.call(OP)?;
        state.get(queue, OP)?;
        state.drain(queue.id);
        Ok(())
    }

    fn release_kernel(&self, kernel: MockHandle) {
        self.state
            .borrow_mut()
            .release(kernel, "clReleaseKernel", HandleKind::Kernel);
    }

    fn release_program(&self, program: MockHandle) {
        self.state
            .borrow_mut()
            .release(program, "clReleaseProgram", HandleKind::Program);
    }

    fn release_mem(&self, mem: MockHandle) {
        self.state
            .borrow_mut()
            .release(mem, "clReleaseMemObject", HandleKind::Mem);
    }

    fn release_queue(&self, queue: MockHandle) {
        self.state
            .borrow_mut()
            .release(queue, "clReleaseCommandQueue", HandleKind::Queue);
    }

    fn release_context(&self, context: MockHandle) {
        self.state
            .borrow_mut()
            .release(context, "clReleaseContext", HandleKind::Context);
    }
}

/// Accepts any source declaring at least one `kernel void <name>` entry
/// point and returns their names. `#error` lines fail the build.
fn compile(src: &str) -> std::result::Result<Vec<String>, String> {
    let mut log = String::new();
    for (lineno, line) in src.lines().enumerate() {
        if let Some(msg) = line.trim_start().strip_prefix("#error") {
            log.push_str(&format!("<source>:{}: error: {}\n", lineno + 1, msg.trim()));
        }
    }
    if !log.is_empty() {
        return Err(log);
    }

    let tokens: Vec<&str> = src
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|tok| !tok.is_empty())
        .collect();
    let entries: Vec<String> = tokens
        .windows(3)
        .filter(|w| (w[0] == "kernel" || w[0] == "__kernel") && w[1] == "void")
        .map(|w| w[2].to_owned())
        .collect();
    if entries.is_empty() {
        Err("<source>: error: no kernel entry point defined\n".to_owned())
    } else {
        Ok(entries)
    }
}

fn hello_kernel(_gid: usize, args: &mut [Vec<u8>]) {
    const MSG: &[u8] = b"Hello, World!\0";
    let out = &mut args[0];
    let n = MSG.len().min(out.len());
    out[..n].copy_from_slice(&MSG[..n]);
}

fn vecadd_kernel(gid: usize, args: &mut [Vec<u8>]) {
    if let (Some(a), Some(b)) = (read_i32(&args[0], gid), read_i32(&args[1], gid)) {
        write_i32(&mut args[2], gid, a.wrapping_add(b));
    }
}

pub fn read_i32(buf: &[u8], idx: usize) -> Option<i32> {
    let b = buf.get(idx * 4..idx * 4 + 4)?;
    Some(i32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn write_i32(buf: &mut [u8], idx: usize, value: i32) {
    if let Some(dest) = buf.get_mut(idx * 4..idx * 4 + 4) {
        dest.copy_from_slice(&value.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(mock: &MockBackend) -> (MockHandle, MockHandle, MockDevice) {
        let platform = mock.platforms().unwrap()[0];
        let device = mock.devices(platform, DeviceType::All).unwrap()[0];
        let ctx = mock.create_context(&[device]).unwrap();
        let queue = mock.create_queue(&ctx, device).unwrap();
        (ctx, queue, device)
    }

    #[test]
    fn compile_finds_entry_points() {
        let src = "__kernel\nvoid vecadd(__global int *A) {}\nkernel void square(int x) {}";
        assert_eq!(compile(src).unwrap(), ["vecadd", "square"]);
        assert!(compile("void helper(void) {}").is_err());
        let log = compile("kernel void hello() {}\n  #error broken here").unwrap_err();
        assert_eq!(log, "<source>:2: error: broken here\n");
    }

    #[test]
    fn reset_journal_keeps_live_handles() {
        let mock = MockBackend::new();
        let (ctx, queue, _) = setup(&mock);
        let mem = mock.create_buffer(&ctx, MemAccess::ReadWrite, 4).unwrap();
        mock.release_mem(mem);
        assert!(!mock.journal().is_empty());

        mock.reset_journal();
        assert!(mock.journal().is_empty());
        assert_eq!(mock.live_handles(), 2);
        mock.finish(&queue).unwrap();
        assert_eq!(mock.journal(), [Event::Call("clFinish")]);

        mock.release_queue(queue);
        mock.release_context(ctx);
        assert_eq!(mock.live_handles(), 0);
        assert!(mock.violations().is_empty(), "{:?}", mock.violations());
    }

    #[test]
    fn default_device_is_first_device() {
        let mock = MockBackend::empty().with_platform("Acme", &["GPU0", "GPU1"]);
        let platform = mock.platforms().unwrap()[0];
        assert_eq!(mock.devices(platform, DeviceType::Default).unwrap().len(), 1);
        assert_eq!(mock.devices(platform, DeviceType::All).unwrap().len(), 2);
    }

    #[test]
    fn writes_are_deferred_until_finish() {
        let mock = MockBackend::new();
        let (ctx, queue, _) = setup(&mock);
        let mem = mock.create_buffer(&ctx, MemAccess::ReadWrite, 4).unwrap();

        unsafe { mock.enqueue_write(&queue, &mem, false, &[1, 2, 3, 4]).unwrap() };
        assert_eq!(mock.pending_commands(), 1);
        mock.finish(&queue).unwrap();
        assert_eq!(mock.pending_commands(), 0);

        let mut out = [0u8; 4];
        mock.enqueue_read(&queue, &mem, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);

        mock.release_mem(mem);
        mock.release_queue(queue);
        mock.release_context(ctx);
        assert!(mock.violations().is_empty(), "{:?}", mock.violations());
        assert_eq!(mock.live_handles(), 0);
    }

    #[test]
    fn range_launch_visits_each_index_once() {
        const N: usize = 97;
        let mock = MockBackend::new().with_kernel("count", 1, |gid, args| {
            let seen = read_i32(&args[0], gid).unwrap();
            write_i32(&mut args[0], gid, seen + 1);
        });
        let (ctx, queue, device) = setup(&mock);
        let program = mock
            .create_program(&ctx, "kernel void count(global int *out) {}")
            .unwrap();
        mock.build_program(&program, &[device]).unwrap();
        let kernel = mock.create_kernel(&program, "count").unwrap();
        let mem = mock.create_buffer(&ctx, MemAccess::ReadWrite, N * 4).unwrap();
        mock.set_kernel_arg(&kernel, 0, &mem).unwrap();
        unsafe { mock.enqueue_kernel(&queue, &kernel, Launch::Range(N)).unwrap() };

        let mut out = vec![0u8; N * 4];
        mock.enqueue_read(&queue, &mem, &mut out).unwrap();
        assert!((0..N).all(|i| read_i32(&out, i) == Some(1)));
    }

    #[test]
    fn launch_requires_every_argument() {
        let mock = MockBackend::new();
        let (ctx, queue, device) = setup(&mock);
        let program = mock
            .create_program(&ctx, "__kernel void vecadd(int *A, int *B, int *C) {}")
            .unwrap();
        mock.build_program(&program, &[device]).unwrap();
        let kernel = mock.create_kernel(&program, "vecadd").unwrap();
        let err = unsafe { mock.enqueue_kernel(&queue, &kernel, Launch::Range(4)) }.unwrap_err();
        assert_eq!(
            err.to_string(),
            "clEnqueueNDRangeKernel failed: CL_INVALID_KERNEL_ARGS",
        );
        assert!(mock.set_kernel_arg(&kernel, 3, &ctx).is_err());
    }

    #[test]
    fn undeclared_kernel_is_not_found() {
        let mock = MockBackend::new();
        let (ctx, _queue, device) = setup(&mock);
        let program = mock
            .create_program(&ctx, "kernel void hello(global char *s) {}")
            .unwrap();
        mock.build_program(&program, &[device]).unwrap();
        match mock.create_kernel(&program, "vecadd") {
            Err(Error::KernelNotFound { name }) => assert_eq!(name, "vecadd"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn release_with_outstanding_write_is_a_violation() {
        let mock = MockBackend::new();
        let (ctx, queue, _) = setup(&mock);
        let mem = mock.create_buffer(&ctx, MemAccess::ReadOnly, 8).unwrap();
        unsafe { mock.enqueue_write(&queue, &mem, false, &[0; 8]).unwrap() };
        mock.release_mem(mem);
        mock.release_queue(queue);
        mock.release_context(ctx);

        let violations = mock.violations();
        assert!(violations[0].contains("outstanding command"), "{:?}", violations);
        assert!(violations[1].contains("outstanding commands"), "{:?}", violations);
    }

    #[test]
    fn parent_released_first_is_a_violation() {
        let mock = MockBackend::new();
        let (ctx, queue, _) = setup(&mock);
        mock.release_context(ctx);
        mock.release_queue(queue);
        let violations = mock.violations();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("before dependent Queue"), "{:?}", violations);
    }

    #[test]
    fn injected_failure_reports_operation() {
        let mock = MockBackend::new().failing_on("clCreateContext");
        let platform = mock.platforms().unwrap()[0];
        let device = mock.devices(platform, DeviceType::All).unwrap()[0];
        let err = mock.create_context(&[device]).unwrap_err();
        assert_eq!(err.to_string(), "clCreateContext failed: CL_OUT_OF_RESOURCES");
        assert_eq!(mock.live_handles(), 0);
    }
}
