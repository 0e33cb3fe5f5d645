//! The DAG traversal primitive (§4.1): a memoized post-order walk over a
//! `ProjectDag` that yields a result-DAG of the same shape (I1). Memoized
//! per input-node identity (the `Arc`'s address) so a sub-DAG shared by two
//! dependents is walked exactly once; the memo table is local to a single
//! traversal, never shared across clients.

use crate::pool::ComputationPool;
use crate::project::{Project, ProjectDag};
use crate::result_dag::{PartialCompileResult, ResultDag};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::Arc;

/// What a scheduling strategy (sequential or pipelined, §4.5/§4.6) does at
/// a single node, given its children's already-computed results. `traverse`
/// owns the walk and the memoization; the strategy only decides what a
/// `Leaf` or `Parent` node does with its (gathered) dependencies.
#[async_trait]
pub trait NodeCompiler: Send + Sync {
    async fn compile_leaf(&self, project: &Project) -> PartialCompileResult;

    async fn compile_parent(
        &self,
        project: &Project,
        children: Vec<Arc<ResultDag>>,
    ) -> PartialCompileResult;
}

type MemoEntry = Shared<BoxFuture<'static, Arc<ResultDag>>>;

pub struct Traversal {
    memo: DashMap<usize, MemoEntry>,
}

impl Traversal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            memo: DashMap::new(),
        })
    }
}

fn node_identity(dag: &Arc<ProjectDag>) -> usize {
    Arc::as_ptr(dag) as *const () as usize
}

/// Walk `dag`, memoizing on node identity, and return the result-DAG.
pub fn traverse(
    traversal: Arc<Traversal>,
    dag: Arc<ProjectDag>,
    compiler: Arc<dyn NodeCompiler>,
    pool: ComputationPool,
) -> BoxFuture<'static, Arc<ResultDag>> {
    async move {
        let key = node_identity(&dag);

        // DashMap::entry holds the shard lock across the whole closure:
        // the factory that builds the memoized future runs exactly once
        // even if two callers race to walk the same shared sub-DAG.
        let memoized = traversal
            .memo
            .entry(key)
            .or_insert_with(|| {
                let traversal = traversal.clone();
                let dag = dag.clone();
                let compiler = compiler.clone();
                let pool = pool.clone();
                let fut: BoxFuture<'static, Arc<ResultDag>> = Box::pin(async move {
                    Arc::new(compute_node(traversal, dag, compiler, pool).await)
                });
                fut.shared()
            })
            .clone();

        memoized.await
    }
    .boxed()
}

async fn compute_node(
    traversal: Arc<Traversal>,
    dag: Arc<ProjectDag>,
    compiler: Arc<dyn NodeCompiler>,
    pool: ComputationPool,
) -> ResultDag {
    match &*dag {
        ProjectDag::Leaf(project) => {
            let _permit = pool.acquire().await;
            ResultDag::Leaf(compiler.compile_leaf(project).await)
        }
        ProjectDag::Parent(project, children) => {
            let child_results = gather_children(&traversal, children, &compiler, &pool).await;
            let own = {
                let _permit = pool.acquire().await;
                compiler.compile_parent(project, child_results.clone()).await
            };
            ResultDag::Parent(own, child_results)
        }
        ProjectDag::Aggregate(children) => {
            let child_results = gather_children(&traversal, children, &compiler, &pool).await;
            ResultDag::Parent(PartialCompileResult::Empty, child_results)
        }
    }
}

/// Gather (§5 suspension point "every `gather` over child results") all
/// children concurrently; order of the returned vector matches the DAG's
/// child order so `blocked_by`'s left-to-right walk is meaningful.
async fn gather_children(
    traversal: &Arc<Traversal>,
    children: &[Arc<ProjectDag>],
    compiler: &Arc<dyn NodeCompiler>,
    pool: &ComputationPool,
) -> Vec<Arc<ResultDag>> {
    let futures = children.iter().map(|child| {
        traverse(
            traversal.clone(),
            child.clone(),
            compiler.clone(),
            pool.clone(),
        )
    });
    futures::future::join_all(futures).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingCompiler {
        leaf_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeCompiler for CountingCompiler {
        async fn compile_leaf(&self, project: &Project) -> PartialCompileResult {
            self.leaf_calls.fetch_add(1, Ordering::SeqCst);
            let _ = project;
            PartialCompileResult::Empty
        }

        async fn compile_parent(
            &self,
            _project: &Project,
            _children: Vec<Arc<ResultDag>>,
        ) -> PartialCompileResult {
            PartialCompileResult::Empty
        }
    }

    #[tokio::test]
    async fn shared_subdag_is_compiled_exactly_once() {
        let leaf_calls = Arc::new(AtomicUsize::new(0));
        let compiler: Arc<dyn NodeCompiler> = Arc::new(CountingCompiler {
            leaf_calls: leaf_calls.clone(),
        });
        let pool = ComputationPool::new(&SchedulerConfig::default());
        let traversal = Traversal::new();

        let shared_leaf = ProjectDag::leaf(Project::new("shared", 0));
        let b = ProjectDag::parent(Project::new("b", 0), vec![shared_leaf.clone()]);
        let c = ProjectDag::parent(Project::new("c", 0), vec![shared_leaf.clone()]);
        let root = ProjectDag::aggregate(vec![b, c]);

        let _result = traverse(traversal, root, compiler, pool).await;
        assert_eq!(leaf_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn distinct_equal_nodes_are_not_merged() {
        // Two structurally-equal but distinct Arc allocations are distinct
        // identities: both get compiled (memoization is per-Arc, not
        // per-Eq, matching "memoized per input DAG node identity").
        let leaf_calls = Arc::new(AtomicUsize::new(0));
        let compiler: Arc<dyn NodeCompiler> = Arc::new(CountingCompiler {
            leaf_calls: leaf_calls.clone(),
        });
        let pool = ComputationPool::new(&SchedulerConfig::default());
        let traversal = Traversal::new();

        let leaf_a = ProjectDag::leaf(Project::new("same-name", 0));
        let leaf_b = ProjectDag::leaf(Project::new("same-name", 0));
        let root = ProjectDag::aggregate(vec![leaf_a, leaf_b]);

        let _result = traverse(traversal, root, compiler, pool).await;
        assert_eq!(leaf_calls.load(Ordering::SeqCst), 2);
    }
}
