//! OpenCL through the `ocl` crate's thin `core` layer, which mirrors the C API
//! one call at a time.

use super::{Backend, DeviceType, Launch, MemAccess};
use crate::{Error, Result};
use log::warn;
use ocl::core::{self, ffi, Status};
use ocl::flags;
use std::{ffi::CString, ptr};

// `cl_khr_icd`: the loader found no installed platform.
const CL_PLATFORM_NOT_FOUND_KHR: ffi::cl_int = -1001;

/// Whether a `clGetPlatformIDs` count query means "no platform installed".
fn no_platform(status: ffi::cl_int, count: ffi::cl_uint) -> bool {
    status == CL_PLATFORM_NOT_FOUND_KHR || (status == ffi::CL_SUCCESS && count == 0)
}

#[derive(Debug, Default, Clone, Copy)]
pub struct OpenClBackend;

impl Backend for OpenClBackend {
    type Platform = core::PlatformId;
    type Device = core::DeviceId;
    type Context = core::Context;
    type Queue = core::CommandQueue;
    type Program = core::Program;
    type Kernel = core::Kernel;
    type Mem = core::Mem;

    fn platforms(&self) -> Result<Vec<Self::Platform>> {
        // `core::get_platform_ids` retries for seconds when the loader reports
        // no platform, so count them first.
        let mut count: ffi::cl_uint = 0;
        let status = unsafe { ffi::clGetPlatformIDs(0, ptr::null_mut(), &mut count) };
        if no_platform(status, count) {
            return Ok(Vec::new());
        }
        core::get_platform_ids().map_err(|err| Error::api("clGetPlatformIDs", err))
    }

    fn platform_vendor(&self, platform: Self::Platform) -> Result<String> {
        core::get_platform_info(platform, core::PlatformInfo::Vendor)
            .map(|info| info.to_string())
            .map_err(|err| Error::api("clGetPlatformInfo", err))
    }

    fn devices(&self, platform: Self::Platform, ty: DeviceType) -> Result<Vec<Self::Device>> {
        let ty = match ty {
            DeviceType::Default => flags::DEVICE_TYPE_DEFAULT,
            DeviceType::All => flags::DEVICE_TYPE_ALL,
        };
        match core::get_device_ids(platform, Some(ty), None) {
            Ok(devices) => Ok(devices),
            // Only "none of this type" means empty; other failures are reported.
            Err(ref err) if err.api_status() == Some(Status::CL_DEVICE_NOT_FOUND) => Ok(Vec::new()),
            Err(err) => Err(Error::api("clGetDeviceIDs", err)),
        }
    }

    fn device_name(&self, device: Self::Device) -> Result<String> {
        core::get_device_info(device, core::DeviceInfo::Name)
            .map(|info| info.to_string())
            .map_err(|err| Error::api("clGetDeviceInfo", err))
    }

    fn create_context(&self, devices: &[Self::Device]) -> Result<Self::Context> {
        core::create_context(None, devices, None, None)
            .map_err(|err| Error::api("clCreateContext", err))
    }

    fn create_queue(&self, context: &Self::Context, device: Self::Device) -> Result<Self::Queue> {
        core::create_command_queue(context, device, None)
            .map_err(|err| Error::api("clCreateCommandQueue", err))
    }

    fn create_program(&self, context: &Self::Context, src: &str) -> Result<Self::Program> {
        let src = CString::new(src).map_err(|err| Error::api("clCreateProgramWithSource", err))?;
        core::create_program_with_source(context, &[src])
            .map_err(|err| Error::api("clCreateProgramWithSource", err))
    }

    fn build_program(&self, program: &Self::Program, devices: &[Self::Device]) -> Result<()> {
        let options = CString::default();
        match core::build_program(program, Some(devices), &options, None, None) {
            Ok(()) => Ok(()),
            Err(err) => {
                let mut logs = Vec::new();
                for &device in devices {
                    match core::get_program_build_info(
                        program,
                        device,
                        core::ProgramBuildInfo::BuildLog,
                    ) {
                        Ok(info) => {
                            let name = self
                                .device_name(device)
                                .unwrap_or_else(|_| format!("{:?}", device));
                            logs.push((name, info.to_string()));
                        }
                        Err(info_err) => warn!("Cannot fetch build log: {}", info_err),
                    }
                }
                let log = if logs.iter().all(|(_, log)| log.trim().is_empty()) {
                    err.to_string()
                } else {
                    join_build_logs(&logs)
                };
                Err(Error::Build { log })
            }
        }
    }

    fn create_kernel(&self, program: &Self::Program, name: &str) -> Result<Self::Kernel> {
        core::create_kernel(program, name).map_err(|err| {
            if err.api_status() == Some(Status::CL_INVALID_KERNEL_NAME) {
                Error::KernelNotFound {
                    name: name.to_owned(),
                }
            } else {
                Error::api("clCreateKernel", err)
            }
        })
    }

    fn create_buffer(
        &self,
        context: &Self::Context,
        access: MemAccess,
        size: usize,
    ) -> Result<Self::Mem> {
        let flags = match access {
            MemAccess::ReadWrite => flags::MEM_READ_WRITE,
            MemAccess::ReadOnly => flags::MEM_READ_ONLY,
            MemAccess::WriteOnly => flags::MEM_WRITE_ONLY,
        };
        unsafe { core::create_buffer::<_, u8>(context, flags, size, None) }
            .map_err(|err| Error::api("clCreateBuffer", err))
    }

    fn set_kernel_arg(&self, kernel: &Self::Kernel, index: u32, mem: &Self::Mem) -> Result<()> {
        core::set_kernel_arg(kernel, index, core::ArgVal::mem(mem))
            .map_err(|err| Error::api("clSetKernelArg", err))
    }

    unsafe fn enqueue_write(
        &self,
        queue: &Self::Queue,
        mem: &Self::Mem,
        blocking: bool,
        data: &[u8],
    ) -> Result<()> {
        core::enqueue_write_buffer(
            queue,
            mem,
            blocking,
            0,
            data,
            None::<core::Event>,
            None::<&mut core::Event>,
        )
        .map_err(|err| Error::api("clEnqueueWriteBuffer", err))
    }

    fn enqueue_read(&self, queue: &Self::Queue, mem: &Self::Mem, data: &mut [u8]) -> Result<()> {
        // Blocking, so `data` is not borrowed past this call.
        unsafe {
            core::enqueue_read_buffer(
                queue,
                mem,
                true,
                0,
                data,
                None::<core::Event>,
                None::<&mut core::Event>,
            )
        }
        .map_err(|err| Error::api("clEnqueueReadBuffer", err))
    }

    unsafe fn enqueue_kernel(
        &self,
        queue: &Self::Queue,
        kernel: &Self::Kernel,
        launch: Launch,
    ) -> Result<()> {
        // A task is a 1-wide range with a 1-wide work-group.
        let local = match launch {
            Launch::Task => Some([1, 1, 1]),
            Launch::Range(_) => None,
        };
        core::enqueue_kernel(
            queue,
            kernel,
            1,
            None,
            &[launch.global_size(), 1, 1],
            local,
            None::<core::Event>,
            None::<&mut core::Event>,
        )
        .map_err(|err| match launch {
            Launch::Task => Error::api("clEnqueueTask", err),
            Launch::Range(_) => Error::api("clEnqueueNDRangeKernel", err),
        })
    }

    fn flush(&self, queue: &Self::Queue) -> Result<()> {
        core::flush(queue).map_err(|err| Error::api("clFlush", err))
    }

    fn finish(&self, queue: &Self::Queue) -> Result<()> {
        core::finish(queue).map_err(|err| Error::api("clFinish", err))
    }

    // The `core` handle types release themselves when dropped.

    fn release_kernel(&self, kernel: Self::Kernel) {
        drop(kernel);
    }

    fn release_program(&self, program: Self::Program) {
        drop(program);
    }

    fn release_mem(&self, mem: Self::Mem) {
        drop(mem);
    }

    fn release_queue(&self, queue: Self::Queue) {
        drop(queue);
    }

    fn release_context(&self, context: Self::Context) {
        drop(context);
    }
}

/// One section per device, headed by its name. Devices with an empty log are
/// left out.
fn join_build_logs(logs: &[(String, String)]) -> String {
    logs.iter()
        .filter(|(_, log)| !log.trim().is_empty())
        .map(|(device, log)| format!("{}:\n{}", device, log.trim_end()))
        .collect::<Vec<_>>()
        .join("\n")
}
