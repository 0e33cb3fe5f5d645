use std::sync::Arc;

/// A project handle: stable identity used for memoization and for keying
/// the last-successful-result and refcount registries.
///
/// Equality is by `(name, config_hash)`, not by pointer: two `Project`
/// values built from the same name and configuration are the same project
/// even if they're unrelated allocations, matching "opaque handle with
/// stable identity (name + configuration). Equality governs reuse in the
/// memo table."
#[derive(Debug, Clone)]
pub struct Project {
    name: Arc<str>,
    config_hash: u64,
}

impl Project {
    pub fn new(name: impl Into<Arc<str>>, config_hash: u64) -> Self {
        Self {
            name: name.into(),
            config_hash,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl PartialEq for Project {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.config_hash == other.config_hash
    }
}

impl Eq for Project {}

impl std::hash::Hash for Project {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.config_hash.hash(state);
    }
}

impl std::fmt::Display for Project {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A project DAG node.
///
/// `Leaf` and `Parent` carry a project; `Aggregate` is a root-less fan-out
/// used at the top when several independent DAGs are scheduled together.
/// Shared sub-DAGs are represented by cloning the `Arc<ProjectDag>` that
/// wraps them, not by re-building structurally-equal trees: traversal
/// memoizes on the `Arc`'s address (see [`crate::traverse`]), so sharing
/// the `Arc` is what makes "the same sub-DAG encountered twice" detectable.
#[derive(Debug, Clone)]
pub enum ProjectDag {
    Leaf(Project),
    Parent(Project, Vec<Arc<ProjectDag>>),
    Aggregate(Vec<Arc<ProjectDag>>),
}

impl ProjectDag {
    pub fn leaf(project: Project) -> Arc<Self> {
        Arc::new(Self::Leaf(project))
    }

    pub fn parent(project: Project, children: Vec<Arc<ProjectDag>>) -> Arc<Self> {
        Arc::new(Self::Parent(project, children))
    }

    pub fn aggregate(dags: Vec<Arc<ProjectDag>>) -> Arc<Self> {
        Arc::new(Self::Aggregate(dags))
    }

    /// Direct children of this node, empty for a `Leaf`.
    pub fn children(&self) -> &[Arc<ProjectDag>] {
        match self {
            ProjectDag::Leaf(_) => &[],
            ProjectDag::Parent(_, children) => children,
            ProjectDag::Aggregate(dags) => dags,
        }
    }

    pub fn project(&self) -> Option<&Project> {
        match self {
            ProjectDag::Leaf(p) | ProjectDag::Parent(p, _) => Some(p),
            ProjectDag::Aggregate(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_equality_is_by_name_and_config() {
        let a = Project::new("core", 1);
        let b = Project::new("core", 1);
        let c = Project::new("core", 2);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn dag_children_empty_for_leaf() {
        let leaf = ProjectDag::leaf(Project::new("a", 0));
        assert!(leaf.children().is_empty());
    }

    #[test]
    fn dag_shares_subdags_via_arc() {
        let shared = ProjectDag::leaf(Project::new("a", 0));
        let b = ProjectDag::parent(Project::new("b", 0), vec![shared.clone()]);
        let c = ProjectDag::parent(Project::new("c", 0), vec![shared.clone()]);
        assert!(Arc::ptr_eq(&b.children()[0], &c.children()[0]));
    }

    #[test]
    fn aggregate_has_no_project() {
        let leaf = ProjectDag::leaf(Project::new("a", 0));
        let agg = ProjectDag::aggregate(vec![leaf]);
        assert!(agg.project().is_none());
    }
}
