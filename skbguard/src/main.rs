use std::env;
use std::process::ExitCode;

use log::{error, info, warn};

use skbguard::bpf::AyaBackend;
use skbguard::hook::HookSpec;
use skbguard::lifecycle::{Loader, ProgramSpec};
use skbguard::signal::ShutdownSignal;
use skbguard::Result;
use skbguard_common::BLOCKED_TCP_PORT;

const USAGE: &str = "usage: skbguard <object.o> <program> <hook>
hooks:
  tracepoint:<category>:<event>   e.g. tracepoint:syscalls:sys_enter_write
  kprobe:<symbol>                 e.g. kprobe:do_unlinkat
  kretprobe:<symbol>              e.g. kretprobe:do_unlinkat
  cgroup-ingress:<cgroup path>    e.g. cgroup-ingress:/sys/fs/cgroup";

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = env::args().skip(1).collect();
    let spec = match parse_args(&args) {
        Some(spec) => spec,
        None => {
            eprintln!("{USAGE}");
            return ExitCode::from(64);
        }
    };

    match run(spec) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::from(err.exit_code())
        }
    }
}

fn parse_args(args: &[String]) -> Option<ProgramSpec> {
    let [object, program, hook] = args else {
        return None;
    };
    let hook: HookSpec = match hook.parse() {
        Ok(hook) => hook,
        Err(err) => {
            eprintln!("{err}");
            return None;
        }
    };
    Some(ProgramSpec {
        object: object.into(),
        program: program.clone(),
        hook,
    })
}

fn run(spec: ProgramSpec) -> Result<()> {
    bump_memlock_rlimit();

    // Install the handler before attaching so no termination request
    // can slip between attach and wait.
    let signal = ShutdownSignal::install()?;

    let mut loader = Loader::new(AyaBackend::default(), spec);
    loader.open()?;
    loader.load()?;
    loader.resolve()?;
    loader.attach()?;

    info!("{} attached to {}", loader.spec().program, loader.spec().hook);
    if let HookSpec::CgroupIngress { .. } = loader.spec().hook {
        info!("filtering ingress traffic, dropping TCP destination port {BLOCKED_TCP_PORT}");
    }
    info!("press ctrl-c to exit");

    loader.wait(&signal)?;
    info!("termination signal received, shutting down");
    loader.shutdown();
    Ok(())
}

/// Older kernels charge BPF maps against RLIMIT_MEMLOCK; raise it so
/// loading does not fail with EPERM there.
fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("failed to raise memlock rlimit: {}", std::io::Error::last_os_error());
    }
}
