//! The pipelined scheduler (§4.6): a dependent starts as soon as its direct
//! upstreams' type signatures (`cf`) are available, without waiting for
//! their Java code generation (`jf`) to finish. The Java-gating signal
//! (`JavaSignal`) is threaded through so a downstream can still fail fast
//! if an upstream's Java phase later fails.

use crate::bundle::{CompileOutcome, Products, ResultBundle, SignatureStore};
use crate::interfaces::{BundleInputs, ClasspathProvider, ClientInfo, Compile, CompileInputs, Setup};
use crate::pool::IoPool;
use crate::project::Project;
use crate::registry::SchedulerState;
use crate::result_dag::{
    direct_failure_names, FailureCause, JavaCompletionRx, JavaSignal, JavaSignalFuture,
    PartialCompileResult, PartialFailureInfo, PartialSuccess, ResultDag,
};
use crate::traverse::NodeCompiler;
use async_trait::async_trait;
use futures::future::FutureExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

fn constant_java_signal(signal: JavaSignal) -> JavaSignalFuture {
    async move { signal }.boxed().shared()
}

pub struct PipelinedScheduler {
    state: Arc<SchedulerState>,
    setup: Arc<dyn Setup>,
    compile: Arc<dyn Compile>,
    client: Arc<dyn ClientInfo>,
    classpath: Arc<dyn ClasspathProvider>,
}

impl PipelinedScheduler {
    pub fn new(
        state: Arc<SchedulerState>,
        setup: Arc<dyn Setup>,
        compile: Arc<dyn Compile>,
        client: Arc<dyn ClientInfo>,
        classpath: Arc<dyn ClasspathProvider>,
    ) -> Self {
        Self {
            state,
            setup,
            compile,
            client,
            classpath,
        }
    }

    /// Run `setup`+`compile` in the background and return a node's result
    /// as soon as its signature promise (`cf`) resolves (§4.6a) — the
    /// background task keeps going to completion (Java codegen, registry
    /// settlement) independently, reachable afterwards through
    /// `ResultBundle::background_io`.
    async fn compile_node(
        &self,
        project: &Project,
        dependent_results: HashMap<PathBuf, Products>,
        signature_store: SignatureStore,
        transitive_java_signal: JavaSignalFuture,
    ) -> PartialCompileResult {
        let raw_classpath = self.classpath.raw_classpath(project);
        let separate_java_and_scala = self.classpath.separate_java_and_scala(project);
        let bundle_inputs = BundleInputs {
            project: project.clone(),
            raw_classpath,
        };

        let (cf_tx, mut cf_rx): (
            crate::result_dag::SignaturePromiseTx,
            crate::result_dag::SignaturePromise,
        ) = tokio::sync::watch::channel(None);
        let (jf_tx, jf_rx): (crate::result_dag::JavaCompletionTx, JavaCompletionRx) =
            tokio::sync::watch::channel(None);

        let state = self.state.clone();
        let setup = self.setup.clone();
        let client = self.client.clone();
        let compile = self.compile.clone();
        let signal_for_compile = transitive_java_signal.clone();

        let background: tokio::task::JoinHandle<crate::error::Result<()>> =
            IoPool::spawn(async move {
                let outcome = state
                    .setup_and_deduplicate(setup.as_ref(), client.as_ref(), bundle_inputs, {
                        move |bundle| {
                            Box::pin(async move {
                                let inputs = CompileInputs {
                                    bundle,
                                    signature_store,
                                    signature_promise: Some(cf_tx),
                                    java_completed_promise: Some(jf_tx),
                                    transitive_java_signal: signal_for_compile,
                                    separate_java_and_scala,
                                    dependent_results,
                                };
                                compile.compile(inputs).await
                            })
                        }
                    })
                    .await;
                outcome.map(|_| ())
            });

        match cf_rx.changed().await {
            Ok(()) => match cf_rx.borrow().clone() {
                Some(Ok(store)) => PartialCompileResult::Success(Arc::new(PartialSuccess {
                    project: project.clone(),
                    ir_store: store,
                    java_completed: jf_rx,
                    java_trigger: transitive_java_signal,
                    result: Arc::new(ResultBundle {
                        outcome: CompileOutcome::Empty,
                        successful: None,
                        background_io: Some(background),
                    }),
                })),
                Some(Err(msg)) => signature_promise_failure(project, msg),
                None => signature_promise_failure(
                    project,
                    "signature promise resolved with no value".to_string(),
                ),
            },
            // The sender was dropped without ever sending: the compiler
            // failed before emitting signatures (§4.6d).
            Err(_) => signature_promise_failure(
                project,
                format!("{project} never produced signatures before failing"),
            ),
        }
    }
}

fn signature_promise_failure(project: &Project, message: String) -> PartialCompileResult {
    PartialCompileResult::Failure(Arc::new(PartialFailureInfo {
        project: project.clone(),
        cause: FailureCause::SignaturePromiseFailure(message),
        result: Arc::new(ResultBundle::failed(vec![])),
    }))
}

/// Assemble the dependency signature store (§4.6b): each direct upstream's
/// already-resolved `ir_store`, keyed by that upstream's classes directory
/// so `SignatureStore::assemble_for_dependent` can locate it in the raw
/// classpath. Upstream signatures are always already resolved here — a
/// child only becomes a `Success` node once its own `cf` has fired.
fn collect_upstream_stores(
    children: &[Arc<ResultDag>],
    client: &dyn ClientInfo,
) -> HashMap<PathBuf, SignatureStore> {
    children
        .iter()
        .filter_map(|child| match child.own_result() {
            PartialCompileResult::Success(success) => Some((
                client.unique_classes_dir_for(&success.project),
                success.ir_store.clone(),
            )),
            _ => None,
        })
        .collect()
}

/// Pull each direct upstream's own `javaCompletedSignal` plus its project
/// name, to build this node's `transitiveJavaSignal` (§4.6c). Not awaited
/// here: the upstream's Java phase may still be running.
fn collect_children_jf(children: &[Arc<ResultDag>]) -> Vec<(String, JavaCompletionRx)> {
    children
        .iter()
        .filter_map(|child| match child.own_result() {
            PartialCompileResult::Success(success) => Some((
                success.project.name().to_string(),
                success.java_completed.clone(),
            )),
            _ => None,
        })
        .collect()
}

/// Build the aggregated `javaTrigger` a dependent's `compile` consults
/// before entering its own Java phase: materialize each upstream's `jf`
/// (success ⇒ Continue, failure ⇒ FailFast(name)) and combine per §4.6c's
/// truth table. Lazily awaited by whoever ends up consulting the trigger —
/// typically the external compiler — so building it never blocks the
/// caller on upstream Java codegen finishing.
fn build_transitive_java_signal(children_jf: Vec<(String, JavaCompletionRx)>) -> JavaSignalFuture {
    async move {
        let mut signals = Vec::with_capacity(children_jf.len());
        for (name, mut rx) in children_jf {
            if rx.borrow().is_none() {
                // A dropped sender without a send also falls through to
                // `borrow()` still holding `None`; treat that the same as
                // `Continue` rather than hanging forever.
                let _ = rx.changed().await;
            }
            let outcome = rx.borrow().clone();
            signals.push(match outcome {
                Some(Err(_)) => JavaSignal::FailFast(vec![name]),
                Some(Ok(())) | None => JavaSignal::Continue,
            });
        }
        JavaSignal::aggregate(signals)
    }
    .boxed()
    .shared()
}

fn collect_dependent_products(children: &[Arc<ResultDag>]) -> HashMap<PathBuf, Products> {
    children
        .iter()
        .filter_map(|child| match child.own_result() {
            PartialCompileResult::Success(success) => match &success.result.outcome {
                CompileOutcome::Ok(products) => success
                    .result
                    .successful
                    .as_ref()
                    .map(|last| (last.classes_dir.clone(), products.clone())),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

#[async_trait]
impl NodeCompiler for PipelinedScheduler {
    async fn compile_leaf(&self, project: &Project) -> PartialCompileResult {
        self.compile_node(
            project,
            HashMap::new(),
            SignatureStore::empty(),
            constant_java_signal(JavaSignal::Continue),
        )
        .await
    }

    async fn compile_parent(
        &self,
        project: &Project,
        children: Vec<Arc<ResultDag>>,
    ) -> PartialCompileResult {
        let blocking = direct_failure_names(&children);
        if !blocking.is_empty() {
            return PartialCompileResult::Failure(Arc::new(PartialFailureInfo {
                project: project.clone(),
                cause: FailureCause::Blocked(blocking.clone()),
                result: Arc::new(ResultBundle::blocked(blocking)),
            }));
        }

        let upstream_stores = collect_upstream_stores(&children, self.client.as_ref());
        let raw_classpath = self.classpath.raw_classpath(project);
        let signature_store = SignatureStore::assemble_for_dependent(&raw_classpath, &upstream_stores);

        let children_jf = collect_children_jf(&children);
        let transitive_java_signal = build_transitive_java_signal(children_jf);

        let dependent_results = collect_dependent_products(&children);

        self.compile_node(project, dependent_results, signature_store, transitive_java_signal)
            .await
    }
}
