//! Program lifecycle: open → load → resolve → attach → wait → shutdown.
//!
//! The kernel's verifier and execution engine sit behind the [`Backend`]
//! trait; the loader only drives the request/response contract. Setup is
//! strictly sequential and single-threaded, and every failure releases
//! whatever was acquired before it, in reverse acquisition order. No
//! operation is retried: retrying an identical rejected program cannot
//! succeed.

use std::path::{Path, PathBuf};

use log::debug;

use crate::error::LoaderError;
use crate::hook::HookSpec;
use crate::signal::ShutdownSignal;
use crate::Result;

/// What to run: the artifact, the entry point within it, and the hook
/// to bind it to.
#[derive(Debug, Clone)]
pub struct ProgramSpec {
    pub object: PathBuf,
    pub program: String,
    pub hook: HookSpec,
}

/// Loader states. `Error` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Uninitialized,
    Opened,
    Loaded,
    Attached,
    Stopping,
    Closed,
    Error,
}

/// Kernel-facing operations, one per lifecycle step.
///
/// `detach` is best-effort cleanup: it must not fail the shutdown path,
/// so it reports nothing.
pub trait Backend {
    /// A loaded-but-not-yet-attached program image. Dropping it
    /// releases the kernel side.
    type Object;
    /// An active binding of a program to a hook.
    type Link;

    /// Reads and statically validates an artifact. No kernel
    /// interaction.
    fn open(&mut self, path: &Path) -> Result<Vec<u8>>;

    /// Submits the artifact to the kernel.
    fn load(&mut self, artifact: &[u8]) -> Result<Self::Object>;

    /// Looks up the entry point by name and prepares it for the hook
    /// kind.
    fn resolve(&mut self, object: &mut Self::Object, name: &str, hook: &HookSpec) -> Result<()>;

    /// Binds the entry point to the hook. The kernel starts invoking
    /// the program immediately on success.
    fn attach(
        &mut self,
        object: &mut Self::Object,
        name: &str,
        hook: &HookSpec,
    ) -> Result<Self::Link>;

    /// Releases an attachment.
    fn detach(&mut self, object: &mut Self::Object, link: Self::Link);
}

/// Drives one program through its lifetime. Owns the bytecode object
/// and the attachment link; the link is always released strictly before
/// the object, on every exit path.
pub struct Loader<B: Backend> {
    backend: B,
    spec: ProgramSpec,
    stage: Stage,
    artifact: Option<Vec<u8>>,
    object: Option<B::Object>,
    resolved: bool,
    link: Option<B::Link>,
}

impl<B: Backend> Loader<B> {
    pub fn new(backend: B, spec: ProgramSpec) -> Self {
        Self {
            backend,
            spec,
            stage: Stage::Uninitialized,
            artifact: None,
            object: None,
            resolved: false,
            link: None,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn spec(&self) -> &ProgramSpec {
        &self.spec
    }

    /// Reads and validates the bytecode artifact.
    pub fn open(&mut self) -> Result<()> {
        self.expect_stage("open", Stage::Uninitialized)?;
        match self.backend.open(&self.spec.object) {
            Ok(artifact) => {
                debug!("opened {} ({} bytes)", self.spec.object.display(), artifact.len());
                self.artifact = Some(artifact);
                self.stage = Stage::Opened;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Submits the opened artifact to the kernel.
    pub fn load(&mut self) -> Result<()> {
        self.expect_stage("load", Stage::Opened)?;
        let artifact = self.artifact.as_deref().unwrap_or_default();
        match self.backend.load(artifact) {
            Ok(object) => {
                debug!("object loaded");
                self.object = Some(object);
                self.stage = Stage::Loaded;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Resolves the entry point by name within the loaded object. The
    /// handle is the retained name; it stays valid only while the
    /// object is alive.
    pub fn resolve(&mut self) -> Result<()> {
        self.expect_stage("resolve", Stage::Loaded)?;
        let ProgramSpec { program, hook, .. } = &self.spec;
        let Some(object) = self.object.as_mut() else {
            return Err(LoaderError::InvalidStage {
                op: "resolve",
                stage: self.stage,
            });
        };
        match self.backend.resolve(object, program, hook) {
            Ok(()) => {
                debug!("resolved program `{program}`");
                self.resolved = true;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Binds the resolved program to its hook.
    pub fn attach(&mut self) -> Result<()> {
        self.expect_stage("attach", Stage::Loaded)?;
        if !self.resolved {
            return Err(LoaderError::InvalidStage {
                op: "attach",
                stage: self.stage,
            });
        }
        let ProgramSpec { program, hook, .. } = &self.spec;
        let Some(object) = self.object.as_mut() else {
            return Err(LoaderError::InvalidStage {
                op: "attach",
                stage: self.stage,
            });
        };
        match self.backend.attach(object, program, hook) {
            Ok(link) => {
                debug!("attached to {hook}");
                self.link = Some(link);
                self.stage = Stage::Attached;
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// The single suspension point: blocks until the termination signal
    /// is observed, then moves to `Stopping`.
    pub fn wait(&mut self, signal: &ShutdownSignal) -> Result<()> {
        self.expect_stage("wait", Stage::Attached)?;
        signal.wait();
        self.stage = Stage::Stopping;
        Ok(())
    }

    /// Releases the attachment (if any) and then the object,
    /// unconditionally. Idempotent; safe when attach never succeeded.
    pub fn shutdown(&mut self) {
        self.release();
        self.stage = Stage::Closed;
    }

    /// Reverse-acquisition-order release. Cleanup never raises.
    fn release(&mut self) {
        if let Some(link) = self.link.take() {
            if let Some(object) = self.object.as_mut() {
                self.backend.detach(object, link);
            }
        }
        self.resolved = false;
        self.object = None;
        self.artifact = None;
    }

    fn fail(&mut self, err: LoaderError) -> LoaderError {
        self.release();
        self.stage = Stage::Error;
        err
    }

    fn expect_stage(&self, op: &'static str, want: Stage) -> Result<()> {
        if self.stage == want {
            Ok(())
        } else {
            Err(LoaderError::InvalidStage {
                op,
                stage: self.stage,
            })
        }
    }
}

impl<B: Backend> Drop for Loader<B> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Event {
        Loaded,
        Attached,
        Detached,
        LinkReleased,
        ObjectReleased,
    }

    type Log = Rc<RefCell<Vec<Event>>>;

    struct FakeObject(Log);

    impl Drop for FakeObject {
        fn drop(&mut self) {
            self.0.borrow_mut().push(Event::ObjectReleased);
        }
    }

    struct FakeLink(Log);

    impl Drop for FakeLink {
        fn drop(&mut self) {
            self.0.borrow_mut().push(Event::LinkReleased);
        }
    }

    #[derive(Default)]
    struct FakeBackend {
        log: Log,
        fail_open: bool,
        fail_load: bool,
        fail_resolve: bool,
        fail_attach: bool,
    }

    impl Backend for FakeBackend {
        type Object = FakeObject;
        type Link = FakeLink;

        fn open(&mut self, path: &Path) -> Result<Vec<u8>> {
            if self.fail_open {
                return Err(LoaderError::OpenFailed {
                    path: path.to_owned(),
                    reason: String::from("no such file"),
                });
            }
            Ok(vec![0x7f, b'E', b'L', b'F'])
        }

        fn load(&mut self, _artifact: &[u8]) -> Result<FakeObject> {
            if self.fail_load {
                return Err(LoaderError::LoadRejected(String::from("verifier said no")));
            }
            self.log.borrow_mut().push(Event::Loaded);
            Ok(FakeObject(Rc::clone(&self.log)))
        }

        fn resolve(&mut self, _object: &mut FakeObject, name: &str, _hook: &HookSpec) -> Result<()> {
            if self.fail_resolve {
                return Err(LoaderError::ProgramNotFound {
                    name: name.to_owned(),
                    reason: String::from("no such entry point"),
                });
            }
            Ok(())
        }

        fn attach(
            &mut self,
            _object: &mut FakeObject,
            _name: &str,
            hook: &HookSpec,
        ) -> Result<FakeLink> {
            if self.fail_attach {
                return Err(LoaderError::AttachFailed {
                    hook: hook.to_string(),
                    reason: String::from("permission denied"),
                });
            }
            self.log.borrow_mut().push(Event::Attached);
            Ok(FakeLink(Rc::clone(&self.log)))
        }

        fn detach(&mut self, _object: &mut FakeObject, link: FakeLink) {
            self.log.borrow_mut().push(Event::Detached);
            drop(link);
        }
    }

    fn spec() -> ProgramSpec {
        ProgramSpec {
            object: PathBuf::from("filter.o"),
            program: String::from("ingress_filter"),
            hook: "cgroup-ingress:/sys/fs/cgroup".parse().unwrap(),
        }
    }

    fn loader_with(backend: FakeBackend) -> (Log, Loader<FakeBackend>) {
        let log = Rc::clone(&backend.log);
        (log, Loader::new(backend, spec()))
    }

    fn setup(loader: &mut Loader<FakeBackend>) {
        loader.open().unwrap();
        loader.load().unwrap();
        loader.resolve().unwrap();
        loader.attach().unwrap();
    }

    #[test]
    fn full_run_releases_link_before_object() {
        let (log, mut loader) = loader_with(FakeBackend::default());
        setup(&mut loader);
        assert_eq!(loader.stage(), Stage::Attached);

        let (trigger, signal) = ShutdownSignal::manual();
        trigger.trigger();
        loader.wait(&signal).unwrap();
        assert_eq!(loader.stage(), Stage::Stopping);

        loader.shutdown();
        assert_eq!(loader.stage(), Stage::Closed);
        assert_eq!(
            *log.borrow(),
            vec![
                Event::Loaded,
                Event::Attached,
                Event::Detached,
                Event::LinkReleased,
                Event::ObjectReleased,
            ]
        );
    }

    #[test]
    fn shutdown_is_idempotent() {
        let (log, mut loader) = loader_with(FakeBackend::default());
        setup(&mut loader);

        loader.shutdown();
        loader.shutdown();
        assert_eq!(loader.stage(), Stage::Closed);

        let events = log.borrow();
        let count = |event| events.iter().filter(|&&e| e == event).count();
        assert_eq!(count(Event::Detached), 1);
        assert_eq!(count(Event::LinkReleased), 1);
        assert_eq!(count(Event::ObjectReleased), 1);
    }

    #[test]
    fn shutdown_without_attach_releases_object_only() {
        let (log, mut loader) = loader_with(FakeBackend::default());
        loader.open().unwrap();
        loader.load().unwrap();

        loader.shutdown();
        assert_eq!(loader.stage(), Stage::Closed);
        assert_eq!(*log.borrow(), vec![Event::Loaded, Event::ObjectReleased]);
    }

    #[test]
    fn open_failure_never_reaches_loaded() {
        let (log, mut loader) = loader_with(FakeBackend {
            fail_open: true,
            ..FakeBackend::default()
        });

        let err = loader.open().unwrap_err();
        assert!(matches!(err, LoaderError::OpenFailed { .. }));
        assert_eq!(loader.stage(), Stage::Error);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn load_rejection_is_terminal() {
        let (log, mut loader) = loader_with(FakeBackend {
            fail_load: true,
            ..FakeBackend::default()
        });

        loader.open().unwrap();
        let err = loader.load().unwrap_err();
        assert!(matches!(err, LoaderError::LoadRejected(_)));
        assert_eq!(loader.stage(), Stage::Error);

        // Nothing kernel-side was acquired, so nothing is released.
        loader.shutdown();
        assert_eq!(loader.stage(), Stage::Closed);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn resolve_failure_releases_object() {
        let (log, mut loader) = loader_with(FakeBackend {
            fail_resolve: true,
            ..FakeBackend::default()
        });

        loader.open().unwrap();
        loader.load().unwrap();
        let err = loader.resolve().unwrap_err();
        assert!(matches!(err, LoaderError::ProgramNotFound { .. }));
        assert_eq!(loader.stage(), Stage::Error);
        assert_eq!(*log.borrow(), vec![Event::Loaded, Event::ObjectReleased]);
    }

    #[test]
    fn attach_failure_releases_object_without_link() {
        let (log, mut loader) = loader_with(FakeBackend {
            fail_attach: true,
            ..FakeBackend::default()
        });

        loader.open().unwrap();
        loader.load().unwrap();
        loader.resolve().unwrap();
        let err = loader.attach().unwrap_err();
        assert!(matches!(err, LoaderError::AttachFailed { .. }));
        assert_eq!(loader.stage(), Stage::Error);
        assert_eq!(*log.borrow(), vec![Event::Loaded, Event::ObjectReleased]);
    }

    #[test]
    fn out_of_order_operations_are_rejected() {
        let (_log, mut loader) = loader_with(FakeBackend::default());

        assert!(matches!(
            loader.load().unwrap_err(),
            LoaderError::InvalidStage { op: "load", .. }
        ));
        assert_eq!(loader.stage(), Stage::Uninitialized);

        loader.open().unwrap();
        loader.load().unwrap();
        // attach before resolve
        assert!(matches!(
            loader.attach().unwrap_err(),
            LoaderError::InvalidStage { op: "attach", .. }
        ));
        // the guard alone must not tear anything down
        assert_eq!(loader.stage(), Stage::Loaded);
        loader.resolve().unwrap();
        loader.attach().unwrap();
    }

    #[test]
    fn drop_releases_link_before_object() {
        let (log, mut loader) = loader_with(FakeBackend::default());
        setup(&mut loader);
        drop(loader);

        assert_eq!(
            *log.borrow(),
            vec![
                Event::Loaded,
                Event::Attached,
                Event::Detached,
                Event::LinkReleased,
                Event::ObjectReleased,
            ]
        );
    }
}
