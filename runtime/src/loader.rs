//! The seam between the runtime and whatever links the guest program.
//!
//! A [`GuestLoader`] turns a [`ModuleResolver`] and the [`HostImports`] of
//! one session into runnable [`GuestExports`]. Marshalling guest calls onto
//! the imports is the loader's business.

use std::path::{Component as PathComponent, Path, PathBuf};

use p2shim_bridge::Bridge;
use p2shim_sys::{Environment, GuestExit, MonotonicClock, RandomSource, Stdio, WallClock};
use p2shim_vfs::VirtualFileSystem;
use thiserror::Error;
use tracing::debug;
use wasmtime::{Engine, Module};

use crate::error::{Result, RuntimeError};

/// Why a guest run did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuestFailure {
    #[error(transparent)]
    Exit(#[from] GuestExit),

    #[error("guest trapped: {0}")]
    Trap(String),
}

/// The single result of running a guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuestOutcome {
    Success,
    Failure(GuestFailure),
}

impl GuestOutcome {
    /// `Ok(())` and an explicit exit with code 0 are both success.
    pub fn from_run(result: std::result::Result<(), GuestFailure>) -> Self {
        match result {
            Ok(()) => GuestOutcome::Success,
            Err(GuestFailure::Exit(exit)) if exit.is_success() => GuestOutcome::Success,
            Err(failure) => GuestOutcome::Failure(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, GuestOutcome::Success)
    }
}

/// Everything the guest's system interface resolves against, built fresh
/// on the guest thread for each session.
#[derive(Debug)]
pub struct HostImports {
    pub environment: Environment,
    pub filesystem: VirtualFileSystem,
    pub stdio: Stdio,
    pub monotonic_clock: MonotonicClock,
    pub wall_clock: WallClock,
    pub random: RandomSource,
    pub bridge: Bridge,
}

/// An instantiated guest.
pub trait GuestExports {
    fn run(&mut self) -> std::result::Result<(), GuestFailure>;
}

/// Links a guest program against a session's imports.
pub trait GuestLoader: Send + Sync {
    fn instantiate(
        &self,
        resolver: &dyn ModuleResolver,
        imports: HostImports,
    ) -> Result<Box<dyn GuestExports>>;
}

/// A compiled module and the engine it belongs to.
#[derive(Clone)]
pub struct ResolvedModule {
    pub name: String,
    pub engine: Engine,
    pub module: Module,
}

impl std::fmt::Debug for ResolvedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedModule")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Maps a module name to one compiled module.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<ResolvedModule>;
}

/// Resolves module names to files directly under one directory.
///
/// Each name maps to exactly one path; there is no search and no fallback.
/// Any failure is a single [`RuntimeError::ModuleLoad`].
pub struct FileModuleResolver {
    root: PathBuf,
    engine: Engine,
}

impl FileModuleResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_engine(root, Engine::default())
    }

    pub fn with_engine(root: impl Into<PathBuf>, engine: Engine) -> Self {
        Self {
            root: root.into(),
            engine,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(PathComponent::Normal(file)), None) => Ok(self.root.join(file)),
            _ => Err(RuntimeError::ModuleLoad {
                name: name.to_string(),
                message: "module names must be a single file name".to_string(),
            }),
        }
    }
}

impl ModuleResolver for FileModuleResolver {
    fn resolve(&self, name: &str) -> Result<ResolvedModule> {
        let path = self.path_for(name)?;
        let load_error = |message: String| RuntimeError::ModuleLoad {
            name: name.to_string(),
            message,
        };

        let bytes = std::fs::read(&path).map_err(|e| load_error(format!("{}: {}", path.display(), e)))?;
        let module = Module::new(&self.engine, &bytes).map_err(|e| load_error(e.to_string()))?;
        debug!(name, path = %path.display(), "Resolved module");

        Ok(ResolvedModule {
            name: name.to_string(),
            engine: self.engine.clone(),
            module,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p2shim_sys::exit_with_code;

    // The smallest valid core module: magic number and version.
    const EMPTY_MODULE: &[u8] = b"\0asm\x01\0\0\0";

    #[test]
    fn resolves_file_under_root() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.core.wasm"), EMPTY_MODULE).unwrap();

        let resolver = FileModuleResolver::new(dir.path());
        let resolved = resolver.resolve("main.core.wasm").unwrap();
        assert_eq!(resolved.name, "main.core.wasm");
    }

    #[test]
    fn missing_file_is_module_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FileModuleResolver::new(dir.path());
        match resolver.resolve("absent.wasm") {
            Err(RuntimeError::ModuleLoad { name, .. }) => assert_eq!(name, "absent.wasm"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn invalid_module_is_module_load_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.wasm"), b"not wasm").unwrap();
        let resolver = FileModuleResolver::new(dir.path());
        assert!(matches!(
            resolver.resolve("bad.wasm"),
            Err(RuntimeError::ModuleLoad { .. })
        ));
    }

    #[test]
    fn names_cannot_escape_root() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = FileModuleResolver::new(dir.path().join("modules"));
        for name in ["../main.wasm", "sub/main.wasm", "/etc/passwd", ""] {
            assert!(
                matches!(resolver.resolve(name), Err(RuntimeError::ModuleLoad { .. })),
                "{} resolved",
                name
            );
        }
    }

    #[test]
    fn outcome_from_run() {
        assert!(GuestOutcome::from_run(Ok(())).is_success());
        assert!(GuestOutcome::from_run(Err(exit_with_code(0).into())).is_success());
        assert_eq!(
            GuestOutcome::from_run(Err(exit_with_code(2).into())),
            GuestOutcome::Failure(GuestFailure::Exit(exit_with_code(2)))
        );
        assert!(!GuestOutcome::from_run(Err(GuestFailure::Trap("unreachable".into()))).is_success());
    }
}
