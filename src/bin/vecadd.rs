use cl_demos::{
    backend::{Backend, MockBackend},
    config::{BackendKind, VecAddOpt},
    vecadd, Result,
};
use clap::Parser;

fn main() {
    env_logger::init();
    let opt = VecAddOpt::parse();
    let result = match opt.backend {
        BackendKind::Mock => run(&MockBackend::new(), &opt),
        BackendKind::Opencl => run_opencl(&opt),
    };
    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(err.exit_code());
    }
}

// An incorrect result is reported, not treated as a failure.
fn run<B: Backend>(backend: &B, opt: &VecAddOpt) -> Result<()> {
    let report = vecadd::run_vecadd(backend, &opt.vecadd_config())?;
    println!("{}", report.message());
    Ok(())
}

#[cfg(feature = "opencl")]
fn run_opencl(opt: &VecAddOpt) -> Result<()> {
    run(&cl_demos::backend::OpenClBackend, opt)
}

#[cfg(not(feature = "opencl"))]
fn run_opencl(_opt: &VecAddOpt) -> Result<()> {
    Err(cl_demos::Error::InvalidConfig(
        "built without the `opencl` feature".into(),
    ))
}
