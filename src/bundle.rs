//! Per-invocation context and outcomes (§3): `CompileBundle`,
//! `ResultBundle`, `LastSuccessfulResult`, and the opaque payload types
//! they carry (`SignatureStore`, `Analysis`, `Products`).

use crate::error::SchedulerError;
use crate::fingerprint::Fingerprint;
use crate::interfaces::{Logger, Reporter};
use crate::mirror::EventMirror;
use crate::project::Project;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An opaque, scheduler-unintelligible payload. Used for the previous
/// analysis carried by a `LastSuccessfulResult` and for whatever else a
/// caller wants to thread through without the scheduler parsing it.
#[derive(Clone)]
pub struct Opaque(Arc<dyn Any + Send + Sync>);

impl Opaque {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

impl std::fmt::Debug for Opaque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Opaque(..)")
    }
}

/// In-memory handle to the type signatures a project exposes to its
/// dependents, for pipelining (§4.6b).
#[derive(Debug, Clone)]
pub struct SignatureStore {
    bytes: Arc<[u8]>,
}

impl SignatureStore {
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn empty() -> Self {
        Self { bytes: Arc::from(&[][..]) }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Build a downstream's dependency store by locating each direct
    /// upstream's classes directory within the raw classpath, sorting by
    /// classpath index, and concatenating each upstream's store in that
    /// order (§4.6b). Ties are impossible: classpath entries are distinct.
    pub fn assemble_for_dependent(
        raw_classpath: &[PathBuf],
        upstream_stores: &std::collections::HashMap<PathBuf, SignatureStore>,
    ) -> Self {
        let mut ordered: Vec<(usize, &SignatureStore)> = raw_classpath
            .iter()
            .enumerate()
            .filter_map(|(index, path)| upstream_stores.get(path).map(|store| (index, store)))
            .collect();
        ordered.sort_by_key(|(index, _)| *index);

        let mut combined = Vec::new();
        for (_, store) in ordered {
            combined.extend_from_slice(store.as_bytes());
        }
        Self::new(combined)
    }
}

/// The compiled class files produced by a successful compile. Opaque to
/// the scheduler beyond "a list of files under a directory."
#[derive(Debug, Clone)]
pub struct Products(Arc<[PathBuf]>);

impl Products {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self(files.into())
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.0
    }
}

/// An idempotent, memoized asynchronous action. Constructing one is free;
/// the underlying work runs on first poll and every subsequent poll
/// (including from clones produced by [`PopulateProducts::clone`]) observes
/// the same cached result. This is what lets `populating_products` be "run
/// zero, one, or more times" while still completing exactly once (§3).
pub type PopulateProducts = Shared<BoxFuture<'static, Result<(), Arc<SchedulerError>>>>;

pub fn populate_task<F>(action: F) -> PopulateProducts
where
    F: std::future::Future<Output = crate::error::Result<()>> + Send + 'static,
{
    let boxed: BoxFuture<'static, Result<(), Arc<SchedulerError>>> =
        Box::pin(async move { action.await.map_err(Arc::new) });
    boxed.shared()
}

/// The most recent successful result for a project: its classes directory,
/// whatever opaque previous-analysis record lets the compiler do
/// incremental work, and the populate action that must complete before the
/// directory may safely be deleted.
#[derive(Clone)]
pub struct LastSuccessfulResult {
    pub project: Project,
    pub classes_dir: PathBuf,
    pub previous_analysis: Option<Opaque>,
    /// Problem diagnostics the compile that produced this result reported,
    /// already decoded from `previous_analysis` into the scheduler's own
    /// `Diagnostic` type. A late dedup subscriber's replay (§4.3 Table 1)
    /// surfaces these before anything the in-flight compile itself emits,
    /// so it sees the same output a fresh compile would have produced.
    pub previous_diagnostics: Vec<crate::mirror::Diagnostic>,
    pub populating_products: PopulateProducts,
    /// Set on the placeholder `compile` is handed when §4.3 step 3b
    /// substitutes a fresh empty result — either because `classes_dir` no
    /// longer exists on disk, or because the result being substituted was
    /// itself such a placeholder. Never set on a result that came from a
    /// real `CompileOutcome::Ok`.
    pub is_empty: bool,
}

impl LastSuccessfulResult {
    /// The substitute §4.3 step 3b installs in place of a stale or already-
    /// empty previous result, without touching that result's refcount.
    pub fn empty(project: Project) -> Self {
        Self {
            project,
            classes_dir: PathBuf::new(),
            previous_analysis: None,
            previous_diagnostics: Vec::new(),
            populating_products: populate_task(async { Ok(()) }),
            is_empty: true,
        }
    }

    pub fn exists_on_disk(&self) -> bool {
        self.classes_dir.exists()
    }

    pub fn is_same_directory_as(&self, other: &Path) -> bool {
        self.classes_dir == other
    }
}

/// Per-invocation context: identity, fingerprint, the sinks a compile
/// writes to, the previous successful result it may read from, and the
/// event mirror subscribers replay from.
#[derive(Clone)]
pub struct CompileBundle {
    pub project: Project,
    pub fingerprint: Fingerprint,
    pub reporter: Arc<dyn Reporter>,
    pub logger: Arc<dyn Logger>,
    pub previous_result: Option<Arc<LastSuccessfulResult>>,
    pub mirror: EventMirror,
}

impl CompileBundle {
    /// Rebind with a (possibly substituted) last-successful result, as
    /// `setupAndDeduplicate` does before invoking `compile` (§4.3c).
    pub fn with_previous_result(mut self, result: Option<Arc<LastSuccessfulResult>>) -> Self {
        self.previous_result = result;
        self
    }
}

/// The outcome the external compiler hands back, tagged per §3.
pub enum CompileOutcome {
    Ok(Products),
    Failed(Vec<crate::mirror::Diagnostic>),
    Cancelled,
    Blocked(Vec<String>),
    Empty,
}

/// Outcome carried back from the external compiler.
pub struct ResultBundle {
    pub outcome: CompileOutcome,
    pub successful: Option<Arc<LastSuccessfulResult>>,
    /// A handle to any background I/O still in flight (e.g. a directory
    /// copy started by the compiler itself); awaited before the result is
    /// considered fully settled.
    pub background_io: Option<tokio::task::JoinHandle<crate::error::Result<()>>>,
}

impl ResultBundle {
    pub fn ok(successful: Arc<LastSuccessfulResult>, products: Products) -> Self {
        Self {
            outcome: CompileOutcome::Ok(products),
            successful: Some(successful),
            background_io: None,
        }
    }

    pub fn failed(diagnostics: Vec<crate::mirror::Diagnostic>) -> Self {
        Self {
            outcome: CompileOutcome::Failed(diagnostics),
            successful: None,
            background_io: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            outcome: CompileOutcome::Cancelled,
            successful: None,
            background_io: None,
        }
    }

    pub fn blocked(names: Vec<String>) -> Self {
        Self {
            outcome: CompileOutcome::Blocked(names),
            successful: None,
            background_io: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            outcome: CompileOutcome::Empty,
            successful: None,
            background_io: None,
        }
    }
}
