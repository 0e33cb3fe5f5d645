//! The sequential scheduler (§4.5): a dependent only starts once every one
//! of its dependencies has fully settled. Simplest correct strategy; no
//! signature or Java promises are ever created.

use crate::bundle::{CompileOutcome, ResultBundle, SignatureStore};
use crate::interfaces::{BundleInputs, ClasspathProvider, ClientInfo, Compile, CompileInputs, Setup};
use crate::project::Project;
use crate::registry::SchedulerState;
use crate::result_dag::{
    direct_failure_names, FailureCause, JavaSignal, JavaSignalFuture, PartialCompileResult,
    PartialFailureInfo, PartialSuccess, ResultDag,
};
use crate::traverse::NodeCompiler;
use async_trait::async_trait;
use futures::future::FutureExt;
use std::collections::HashMap;
use std::sync::Arc;

fn constant_java_signal(signal: JavaSignal) -> JavaSignalFuture {
    async move { signal }.boxed().shared()
}

pub struct SequentialScheduler {
    state: Arc<SchedulerState>,
    setup: Arc<dyn Setup>,
    compile: Arc<dyn Compile>,
    client: Arc<dyn ClientInfo>,
    classpath: Arc<dyn ClasspathProvider>,
}

impl SequentialScheduler {
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

    async fn compile_node(
        &self,
        project: &Project,
        dependent_results: HashMap<std::path::PathBuf, crate::bundle::Products>,
    ) -> PartialCompileResult {
        let raw_classpath = self.classpath.raw_classpath(project);
        let separate_java_and_scala = self.classpath.separate_java_and_scala(project);
        let bundle_inputs = BundleInputs {
            project: project.clone(),
            raw_classpath,
        };

        let compile = self.compile.clone();
        let outcome = self
            .state
            .setup_and_deduplicate(
                self.setup.as_ref(),
                self.client.as_ref(),
                bundle_inputs,
                move |bundle| {
                    Box::pin(async move {
                        let inputs = CompileInputs {
                            bundle,
                            signature_store: SignatureStore::empty(),
                            signature_promise: None,
                            java_completed_promise: None,
                            transitive_java_signal: constant_java_signal(JavaSignal::Continue),
                            separate_java_and_scala,
                            dependent_results,
                        };
                        compile.compile(inputs).await
                    })
                },
            )
            .await;

        to_partial_result(project, outcome)
    }
}

fn to_partial_result(
    project: &Project,
    outcome: crate::error::Result<Arc<ResultBundle>>,
) -> PartialCompileResult {
    let result = match outcome {
        Ok(result) => result,
        Err(err) => {
            return PartialCompileResult::Failure(Arc::new(PartialFailureInfo {
                project: project.clone(),
                cause: FailureCause::Opaque(Arc::new(anyhow::Error::new(err))),
                result: Arc::new(ResultBundle::failed(vec![])),
            }));
        }
    };

    match &result.outcome {
        CompileOutcome::Ok(_) => PartialCompileResult::Success(Arc::new(PartialSuccess {
            project: project.clone(),
            ir_store: SignatureStore::empty(),
            java_completed: pre_resolved_java_completion(),
            java_trigger: constant_java_signal(JavaSignal::Continue),
            result,
        })),
        CompileOutcome::Failed(_) => PartialCompileResult::Failure(Arc::new(PartialFailureInfo {
            project: project.clone(),
            cause: FailureCause::CompilerFailure,
            result,
        })),
        CompileOutcome::Cancelled => PartialCompileResult::Failure(Arc::new(PartialFailureInfo {
            project: project.clone(),
            cause: FailureCause::Cancelled,
            result,
        })),
        CompileOutcome::Blocked(names) => {
            PartialCompileResult::Failure(Arc::new(PartialFailureInfo {
                project: project.clone(),
                cause: FailureCause::Blocked(names.clone()),
                result,
            }))
        }
        CompileOutcome::Empty => PartialCompileResult::Empty,
    }
}

fn pre_resolved_java_completion() -> crate::result_dag::JavaCompletionRx {
    let (tx, rx) = tokio::sync::watch::channel(Some(Ok(())));
    // The sender is dropped immediately: sequential compiles never defer
    // Java completion, so the channel starts (and stays) resolved.
    drop(tx);
    rx
}

#[async_trait]
impl NodeCompiler for SequentialScheduler {
    async fn compile_leaf(&self, project: &Project) -> PartialCompileResult {
        self.compile_node(project, HashMap::new()).await
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

        let dependent_results = collect_dependent_products(&children);
        self.compile_node(project, dependent_results).await
    }
}

/// Map each successful child's classes directory to its products, for the
/// `compile` collaborator's `dependent_results` (§6).
fn collect_dependent_products(
    children: &[Arc<ResultDag>],
) -> HashMap<std::path::PathBuf, crate::bundle::Products> {
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
