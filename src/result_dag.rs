//! The result algebra (§4.2) and the pipelining-only Java gating signal
//! (§4.6c): tagged outcomes per node, the `blockedBy` propagation rule, and
//! `JavaSignal` aggregation.

use crate::bundle::{ResultBundle, SignatureStore};
use crate::project::Project;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;

/// The pipelined scheduler's `cf`: resolves once typechecking of a project
/// finishes with its signatures, or fails if the upstream blew up before
/// emitting any (§4.6d).
pub type SignaturePromise =
    tokio::sync::watch::Receiver<Option<Result<SignatureStore, String>>>;
pub type SignaturePromiseTx =
    tokio::sync::watch::Sender<Option<Result<SignatureStore, String>>>;

/// The pipelined scheduler's `jf`: resolves once a project's Java codegen
/// phase ends, success or failure.
pub type JavaOutcome = Result<(), String>;
pub type JavaCompletionTx = tokio::sync::watch::Sender<Option<JavaOutcome>>;
pub type JavaCompletionRx = tokio::sync::watch::Receiver<Option<JavaOutcome>>;

/// Per-node gating signal a downstream compile consults before entering
/// its own Java phase (§4.6c).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JavaSignal {
    Continue,
    FailFast(Vec<String>),
}

impl JavaSignal {
    /// `⊕`: combine two upstream triggers into the aggregate a dependent
    /// observes.
    pub fn combine(self, other: JavaSignal) -> JavaSignal {
        match (self, other) {
            (JavaSignal::Continue, JavaSignal::Continue) => JavaSignal::Continue,
            (JavaSignal::Continue, JavaSignal::FailFast(s)) => JavaSignal::FailFast(s),
            (JavaSignal::FailFast(s), JavaSignal::Continue) => JavaSignal::FailFast(s),
            (JavaSignal::FailFast(mut s), JavaSignal::FailFast(t)) => {
                s.extend(t);
                JavaSignal::FailFast(s)
            }
        }
    }

    pub fn aggregate(signals: impl IntoIterator<Item = JavaSignal>) -> JavaSignal {
        signals
            .into_iter()
            .fold(JavaSignal::Continue, JavaSignal::combine)
    }
}

pub type JavaSignalFuture = Shared<BoxFuture<'static, JavaSignal>>;

/// Why a node failed or was never attempted.
#[derive(Clone)]
pub enum FailureCause {
    /// At least one direct dependency failed or was itself blocked; the
    /// project names are the *direct* failed children (§4.5).
    Blocked(Vec<String>),
    CompilerFailure,
    Cancelled,
    /// The pipelined upstream's `cf` failed before emitting signatures
    /// (§4.6d).
    SignaturePromiseFailure(String),
    /// Something thrown by the external compiler, preserved without the
    /// scheduler interpreting it (§7).
    Opaque(Arc<anyhow::Error>),
}

pub struct PartialSuccess {
    pub project: Project,
    /// This project's own type signatures, as exposed to dependents for
    /// pipelining (§4.6b). `SignatureStore::empty()` under the sequential
    /// scheduler, which never pipelines.
    pub ir_store: SignatureStore,
    pub java_completed: JavaCompletionRx,
    pub java_trigger: JavaSignalFuture,
    pub result: Arc<ResultBundle>,
}

pub struct PartialFailureInfo {
    pub project: Project,
    pub cause: FailureCause,
    pub result: Arc<ResultBundle>,
}

/// Outcome attached to a single result-DAG node (§3).
pub enum PartialCompileResult {
    /// Aggregate placeholder.
    Empty,
    Success(Arc<PartialSuccess>),
    Failure(Arc<PartialFailureInfo>),
    /// Multiple failures collected under one node (used when an Aggregate
    /// fans out into several independently-failed roots).
    Failures(Vec<PartialCompileResult>),
}

impl PartialCompileResult {
    pub fn project_name(&self) -> Option<&str> {
        match self {
            PartialCompileResult::Success(s) => Some(s.project.name()),
            PartialCompileResult::Failure(f) => Some(f.project.name()),
            PartialCompileResult::Empty | PartialCompileResult::Failures(_) => None,
        }
    }

    pub(crate) fn is_failure(&self) -> bool {
        match self {
            PartialCompileResult::Success(_) | PartialCompileResult::Empty => false,
            PartialCompileResult::Failure(_) => true,
            PartialCompileResult::Failures(fs) => fs.iter().any(PartialCompileResult::is_failure),
        }
    }
}

/// The result-DAG: isomorphic to the input `ProjectDag` (I1), except
/// `Aggregate` nodes become `Parent(PartialEmpty, dagResults)`.
///
/// Children are `Arc<ResultDag>` rather than owned `ResultDag`: when the
/// traversal memo table (§4.1) hands the same sub-DAG's result to two
/// dependents, it is the *same* result shared by reference, not a copy —
/// `ResultBundle` carries things like an in-flight I/O `JoinHandle` that
/// cannot be cloned, so sharing by `Arc` is how "the same task is returned"
/// is represented here.
pub enum ResultDag {
    Leaf(PartialCompileResult),
    Parent(PartialCompileResult, Vec<Arc<ResultDag>>),
}

impl ResultDag {
    pub(crate) fn own_result(&self) -> &PartialCompileResult {
        match self {
            ResultDag::Leaf(r) => r,
            ResultDag::Parent(r, _) => r,
        }
    }

    pub(crate) fn children(&self) -> &[Arc<ResultDag>] {
        match self {
            ResultDag::Leaf(_) => &[],
            ResultDag::Parent(_, children) => children,
        }
    }
}

/// `Some(project)` iff the root of `dag` is a failure or contains failures,
/// `None` otherwise. Aggregate results (own value `Empty`) are walked left
/// to right; the first blocked child wins.
///
/// This recurses on each child via `Iterator::find_map`, so it always
/// advances past the child just examined — it can never loop on the same
/// list the way a hand-written recursive call that re-passes the full
/// slice instead of the remainder would (§9's open question about
/// `blockedFromResults`).
pub fn blocked_by(dag: &ResultDag) -> Option<String> {
    match dag.own_result() {
        PartialCompileResult::Empty => dag.children().iter().map(|c| c.as_ref()).find_map(blocked_by),
        result if result.is_failure() => Some(
            result
                .project_name()
                .map(str::to_string)
                .unwrap_or_else(|| "<aggregate>".to_string()),
        ),
        _ => None,
    }
}

/// Direct (non-recursive) failed or blocked children's project names. Used
/// by both schedulers to build a `Blocked` cause scoped to immediate
/// dependencies only (§4.5) — a grandchild's failure is already reflected
/// in its parent's own failed status, so it is never listed twice.
pub(crate) fn direct_failure_names(children: &[Arc<ResultDag>]) -> Vec<String> {
    children
        .iter()
        .map(|child| child.own_result())
        .filter(|result| result.is_failure())
        .map(|result| {
            result
                .project_name()
                .map(str::to_string)
                .unwrap_or_else(|| "<aggregate>".to_string())
        })
        .collect()
}
