//! The aya-backed kernel backend.
//!
//! aya verifies each program at `Program::load`, which this backend
//! runs during `resolve`; verifier rejections there are still reported
//! as `LoadRejected`, keeping `ProgramNotFound` for missing or
//! wrongly-typed entry points.

use std::fs::{self, File};
use std::path::Path;

use aya::programs::cgroup_skb::CgroupSkbLinkId;
use aya::programs::kprobe::KProbeLinkId;
use aya::programs::trace_point::TracePointLinkId;
use aya::programs::{
    CgroupAttachMode, CgroupSkb, CgroupSkbAttachType, KProbe, ProgramError, TracePoint,
};
use aya::Ebpf;
use aya_log::EbpfLogger;
use log::warn;

use crate::error::LoaderError;
use crate::hook::HookSpec;
use crate::lifecycle::Backend;
use crate::object;
use crate::Result;

#[derive(Debug, Default)]
pub struct AyaBackend;

/// An active attachment. Detaching goes back through the owning
/// program, so the link carries the program name alongside the typed
/// link id.
pub enum AyaLink {
    CgroupSkb(String, CgroupSkbLinkId),
    TracePoint(String, TracePointLinkId),
    KProbe(String, KProbeLinkId),
}

impl Backend for AyaBackend {
    type Object = Ebpf;
    type Link = AyaLink;

    fn open(&mut self, path: &Path) -> Result<Vec<u8>> {
        let open_failed = |reason: String| LoaderError::OpenFailed {
            path: path.to_owned(),
            reason,
        };
        let artifact = fs::read(path).map_err(|err| open_failed(err.to_string()))?;
        object::validate(&artifact).map_err(|err| open_failed(err.to_string()))?;
        Ok(artifact)
    }

    fn load(&mut self, artifact: &[u8]) -> Result<Ebpf> {
        let mut ebpf =
            Ebpf::load(artifact).map_err(|err| LoaderError::LoadRejected(err.to_string()))?;
        // The log map is optional: objects without aya-log calls have
        // none, and their programs work either way.
        if let Err(err) = EbpfLogger::init(&mut ebpf) {
            warn!("kernel-side log output unavailable: {err}");
        }
        Ok(ebpf)
    }

    fn resolve(&mut self, object: &mut Ebpf, name: &str, hook: &HookSpec) -> Result<()> {
        let program = object
            .program_mut(name)
            .ok_or_else(|| LoaderError::ProgramNotFound {
                name: name.to_owned(),
                reason: String::from("no entry point with that name in the object"),
            })?;
        let not_found = |err: ProgramError| LoaderError::ProgramNotFound {
            name: name.to_owned(),
            reason: err.to_string(),
        };
        let rejected = |err: ProgramError| LoaderError::LoadRejected(err.to_string());
        match hook {
            HookSpec::CgroupIngress { .. } => {
                let program: &mut CgroupSkb = program.try_into().map_err(not_found)?;
                program.load().map_err(rejected)
            }
            HookSpec::Tracepoint { .. } => {
                let program: &mut TracePoint = program.try_into().map_err(not_found)?;
                program.load().map_err(rejected)
            }
            HookSpec::Kprobe { .. } => {
                let program: &mut KProbe = program.try_into().map_err(not_found)?;
                program.load().map_err(rejected)
            }
        }
    }

    fn attach(&mut self, object: &mut Ebpf, name: &str, hook: &HookSpec) -> Result<AyaLink> {
        let failed = |reason: String| LoaderError::AttachFailed {
            hook: hook.to_string(),
            reason,
        };
        let program = object
            .program_mut(name)
            .ok_or_else(|| failed(String::from("program missing from the loaded object")))?;
        match hook {
            HookSpec::CgroupIngress { cgroup } => {
                let program: &mut CgroupSkb = program
                    .try_into()
                    .map_err(|err: ProgramError| failed(err.to_string()))?;
                let cgroup = File::open(cgroup).map_err(|err| failed(err.to_string()))?;
                let link = program
                    .attach(
                        cgroup,
                        CgroupSkbAttachType::Ingress,
                        CgroupAttachMode::AllowOverride,
                    )
                    .map_err(|err| failed(err.to_string()))?;
                Ok(AyaLink::CgroupSkb(name.to_owned(), link))
            }
            HookSpec::Tracepoint { category, event } => {
                let program: &mut TracePoint = program
                    .try_into()
                    .map_err(|err: ProgramError| failed(err.to_string()))?;
                let link = program
                    .attach(category, event)
                    .map_err(|err| failed(err.to_string()))?;
                Ok(AyaLink::TracePoint(name.to_owned(), link))
            }
            // The probe variant (entry or return) is fixed by the
            // program's section; the symbol is all attach needs.
            HookSpec::Kprobe { symbol, .. } => {
                let program: &mut KProbe = program
                    .try_into()
                    .map_err(|err: ProgramError| failed(err.to_string()))?;
                let link = program
                    .attach(symbol, 0)
                    .map_err(|err| failed(err.to_string()))?;
                Ok(AyaLink::KProbe(name.to_owned(), link))
            }
        }
    }

    fn detach(&mut self, object: &mut Ebpf, link: AyaLink) {
        if let Err(reason) = try_detach(object, link) {
            // Cleanup is best-effort; the kernel releases the link when
            // the object's file descriptors close anyway.
            warn!("failed to detach program: {reason}");
        }
    }
}

fn try_detach(object: &mut Ebpf, link: AyaLink) -> Result<(), String> {
    let missing = || String::from("program missing from the loaded object");
    match link {
        AyaLink::CgroupSkb(name, id) => {
            let program: &mut CgroupSkb = object
                .program_mut(&name)
                .ok_or_else(missing)?
                .try_into()
                .map_err(|err: ProgramError| err.to_string())?;
            program.detach(id).map_err(|err| err.to_string())
        }
        AyaLink::TracePoint(name, id) => {
            let program: &mut TracePoint = object
                .program_mut(&name)
                .ok_or_else(missing)?
                .try_into()
                .map_err(|err: ProgramError| err.to_string())?;
            program.detach(id).map_err(|err| err.to_string())
        }
        AyaLink::KProbe(name, id) => {
            let program: &mut KProbe = object
                .program_mut(&name)
                .ok_or_else(missing)?
                .try_into()
                .map_err(|err: ProgramError| err.to_string())?;
            program.detach(id).map_err(|err| err.to_string())
        }
    }
}
