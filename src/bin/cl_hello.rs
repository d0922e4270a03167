use cl_demos::{
    backend::{Backend, MockBackend},
    config::{BackendKind, HelloOpt},
    discovery, hello, Result,
};
use clap::Parser;

fn main() {
    env_logger::init();
    let opt = HelloOpt::parse();
    let result = match opt.backend {
        BackendKind::Mock => run(&MockBackend::new(), &opt),
        BackendKind::Opencl => run_opencl(&opt),
    };
    if let Err(err) = result {
        eprintln!("Error: {}", err);
        std::process::exit(err.exit_code());
    }
}

fn run<B: Backend>(backend: &B, opt: &HelloOpt) -> Result<()> {
    print!("{}", discovery::discover(backend, &opt.discovery_config())?);
    let string = hello::run_hello(backend, &opt.hello_config())?;
    println!("{}", string);
    Ok(())
}

#[cfg(feature = "opencl")]
fn run_opencl(opt: &HelloOpt) -> Result<()> {
    run(&cl_demos::backend::OpenClBackend, opt)
}

#[cfg(not(feature = "opencl"))]
fn run_opencl(_opt: &HelloOpt) -> Result<()> {
    Err(cl_demos::Error::InvalidConfig(
        "built without the `opencl` feature".into(),
    ))
}
