//! External collaborators (§6). The scheduler receives these from its
//! caller; it never constructs a concrete `Reporter`, `Logger`, compiler,
//! or client directory policy itself. Production implementations — wiring
//! a real compiler process, a real IPC reporter, a real artifact cache —
//! live outside this crate.

use crate::bundle::{CompileBundle, ResultBundle};
use crate::mirror::{LoggerAction, ReporterAction};
use crate::project::Project;
use crate::result_dag::{JavaSignalFuture, SignaturePromiseTx};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

/// Opaque, caller-defined request for a single project's compilation
/// (sources, classpath, options). The scheduler only needs it to hand to
/// `setup`; it never inspects the contents.
pub struct BundleInputs {
    pub project: Project,
    pub raw_classpath: Vec<PathBuf>,
}

#[async_trait]
pub trait Setup: Send + Sync {
    /// Must be deterministic: equal `BundleInputs` produce bundles with
    /// equal fingerprints.
    async fn setup(&self, inputs: &BundleInputs) -> crate::error::Result<CompileBundle>;
}

/// Everything the external `compile` collaborator needs (§6: `Inputs`).
///
/// `Inputs`' `oracle` member isn't repeated here as its own field: it is
/// already reachable as `bundle.fingerprint`, the same `Fingerprint` the
/// registry deduplicated on, so the compiler never needs a second copy.
pub struct CompileInputs {
    pub bundle: CompileBundle,
    /// Upstream signatures, already assembled in classpath order (§4.6b).
    pub signature_store: crate::bundle::SignatureStore,
    /// The pipelined scheduler's `cf`: the compiler fulfills this as soon
    /// as typechecking finishes. `None` in sequential mode.
    pub signature_promise: Option<SignaturePromiseTx>,
    /// The pipelined scheduler's `jf`: the compiler fulfills this when
    /// Java codegen ends. `None` in sequential mode.
    pub java_completed_promise: Option<crate::result_dag::JavaCompletionTx>,
    /// The aggregated upstream Java trigger the compiler must consult
    /// before entering its own Java phase.
    pub transitive_java_signal: JavaSignalFuture,
    /// Whether this project's Java and Scala sources compile in two
    /// separate passes rather than one mixed pass — caller policy the
    /// scheduler only carries through, via [`ClasspathProvider`].
    pub separate_java_and_scala: bool,
    pub dependent_results: HashMap<PathBuf, crate::bundle::Products>,
}

#[async_trait]
pub trait Compile: Send + Sync {
    async fn compile(&self, inputs: CompileInputs) -> ResultBundle;
}

/// Caller-controlled per-client destination for post-deduplication copies.
pub trait ClientInfo: Send + Sync {
    fn unique_classes_dir_for(&self, project: &Project) -> PathBuf;
}

/// Caller-supplied raw classpath per project, used both to build
/// `BundleInputs` and (in the pipelined scheduler) to order upstream
/// signature stores (§4.6b). The scheduler never computes a classpath
/// itself.
pub trait ClasspathProvider: Send + Sync {
    fn raw_classpath(&self, project: &Project) -> Vec<PathBuf>;

    /// §6's `separateJavaAndScala`: whether `project` compiles Java and
    /// Scala sources in two separate passes. Defaults to `false` (one
    /// mixed pass) since most callers have no mixed-language projects at
    /// all.
    fn separate_java_and_scala(&self, project: &Project) -> bool {
        let _ = project;
        false
    }
}

#[async_trait]
pub trait Reporter: Send + Sync {
    async fn report(&self, action: ReporterAction);
}

#[async_trait]
pub trait Logger: Send + Sync {
    async fn log(&self, action: LoggerAction);
}
