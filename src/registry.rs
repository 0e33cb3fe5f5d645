//! The deduplication registry and last-successful-result lifecycle (§4.3,
//! §4.4). Process-wide, one instance shared across every concurrent
//! traversal so that two clients requesting the same fingerprint at the
//! same time observe exactly one compilation.

use crate::bundle::{CompileBundle, LastSuccessfulResult, ResultBundle};
use crate::error::{Result, SchedulerError};
use crate::fingerprint::Fingerprint;
use crate::interfaces::{BundleInputs, ClientInfo, Logger, Reporter, Setup};
use crate::mirror::{replay, EventMirror};
use crate::pool::IoPool;
use crate::project::Project;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// An in-flight compilation shared by every client that deduplicates onto
/// it. `task` resolves once for every clone; late subscribers replay from
/// `mirror` rather than re-running `compile` (§4.3b).
#[derive(Clone)]
struct RunningCompilation {
    bundle: CompileBundle,
    task: Shared<BoxFuture<'static, Arc<ResultBundle>>>,
}

/// Process-wide scheduler state: the dedup table, the last-successful
/// result per project, and a refcount per classes directory governing when
/// it is safe to delete (§4.4).
pub struct SchedulerState {
    running: DashMap<Fingerprint, RunningCompilation>,
    last_successful: DashMap<Project, Arc<LastSuccessfulResult>>,
    dir_refcounts: DashMap<PathBuf, Arc<AtomicI64>>,
}

impl SchedulerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            running: DashMap::new(),
            last_successful: DashMap::new(),
            dir_refcounts: DashMap::new(),
        })
    }

    pub fn last_successful_result(&self, project: &Project) -> Option<Arc<LastSuccessfulResult>> {
        self.last_successful.get(project).map(|entry| entry.clone())
    }

    fn bump_refcount(&self, dir: &PathBuf) {
        self.dir_refcounts
            .entry(dir.clone())
            .or_insert_with(|| Arc::new(AtomicI64::new(0)))
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement a directory's refcount and delete it on the I/O pool once
    /// it reaches zero. Only called after the directory's populate action
    /// has settled, so deletion never races a write into the same path
    /// (§4.4's "populating, then decrement, then delete" ordering).
    fn release_dir(self: &Arc<Self>, dir: PathBuf) {
        let count = self
            .dir_refcounts
            .get(&dir)
            .map(|entry| entry.fetch_sub(1, Ordering::SeqCst) - 1);

        if count == Some(0) {
            let state = self.clone();
            IoPool::spawn(async move {
                // Re-check under the entry: another setup may have bumped
                // the refcount back up between the decrement above and
                // this task actually running.
                let still_zero = state
                    .dir_refcounts
                    .get(&dir)
                    .map(|entry| entry.load(Ordering::SeqCst) <= 0)
                    .unwrap_or(true);
                if still_zero {
                    if let Err(err) = IoPool::spawn_blocking(move || remove_dir_if_exists(&dir))
                        .await
                        .unwrap_or_else(|join_err| Err(SchedulerError::Other(join_err.into())))
                    {
                        warn!(error = %err, "failed to delete superseded classes directory");
                    }
                }
            });
        }
    }

    /// §4.3: look up or start a compilation for `inputs`, deduplicating on
    /// the fingerprint `setup` derives. Returns the settled result shared
    /// by every caller that deduplicated onto the same fingerprint.
    ///
    /// `run_compile` is the caller-supplied body that actually invokes the
    /// `Compile` collaborator; it is only ever invoked once per
    /// fingerprint, by whichever caller's `setup` call wins the race to
    /// populate `running`.
    pub async fn setup_and_deduplicate<F>(
        self: &Arc<Self>,
        setup: &dyn Setup,
        client: &dyn ClientInfo,
        bundle_inputs: BundleInputs,
        run_compile: F,
    ) -> Result<Arc<ResultBundle>>
    where
        F: FnOnce(CompileBundle) -> BoxFuture<'static, ResultBundle> + Send + 'static,
    {
        let project = bundle_inputs.project.clone();
        let bundle = setup.setup(&bundle_inputs).await?;
        let fingerprint = bundle.fingerprint;

        let previous = self.last_successful_result(&project);
        let bundle = bundle.with_previous_result(previous);

        let (running, is_fresh) = match self.running.entry(fingerprint) {
            dashmap::mapref::entry::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let correlation_id = Uuid::new_v4();
                debug!(project = %project, %fingerprint, %correlation_id, "starting fresh compilation");

                // §4.3 step 3a: bump the installed previous result's
                // directory refcount regardless of what step 3b substitutes
                // for `compile` below — the counter tracks the *installed*
                // result, not whatever `compile` actually gets handed.
                let previous_dir = bundle
                    .previous_result
                    .as_ref()
                    .map(|r| r.classes_dir.clone());
                if let Some(dir) = &previous_dir {
                    self.bump_refcount(dir);
                }

                // §4.3 step 3b: if the installed result's directory no
                // longer exists on disk, or it is itself a prior 3b
                // placeholder, `compile` sees a fresh empty result instead
                // — without touching the counter bumped above.
                let compile_bundle = match &bundle.previous_result {
                    Some(previous) if previous.is_empty || !previous.exists_on_disk() => {
                        bundle
                            .clone()
                            .with_previous_result(Some(Arc::new(LastSuccessfulResult::empty(
                                project.clone(),
                            ))))
                    }
                    _ => bundle.clone(),
                };

                let state = self.clone();
                let finalizer_project = project.clone();
                let task: Shared<BoxFuture<'static, Arc<ResultBundle>>> = async move {
                    let result = run_compile(compile_bundle).await;
                    // §4.4's finalizer: a fresh success installs itself as
                    // the project's last-successful result; anything else
                    // is unregister-on-error — remove F from the running
                    // table and decrement the previous result's directory
                    // counter, since that installed result was never
                    // displaced by a new one.
                    match &result.outcome {
                        crate::bundle::CompileOutcome::Ok(_) => {
                            state.running.remove(&fingerprint);
                            if let Some(successful) = &result.successful {
                                state.process_result_atomically(
                                    &finalizer_project,
                                    successful.clone(),
                                );
                            }
                        }
                        _ => state.unregister(fingerprint, previous_dir.clone()),
                    }
                    Arc::new(result)
                }
                .boxed()
                .shared();

                let running = RunningCompilation {
                    bundle: bundle.clone(),
                    task,
                };
                entry.insert(running.clone());
                (running, true)
            }
        };

        if !is_fresh {
            debug!(project = %project, %fingerprint, "deduplicating onto running compilation");
        }

        // Every caller — fresh or deduplicated — replays the mirror on the
        // I/O pool and copies products into its own client directory once
        // the shared task resolves, so a slow client can never stall the
        // compile itself (§5).
        let previous_diagnostics = running
            .bundle
            .previous_result
            .as_ref()
            .map(|previous| previous.previous_diagnostics.clone())
            .unwrap_or_default();
        let subscription = running.bundle.mirror.subscribe();
        let reporter = running.bundle.reporter.clone();
        let logger = running.bundle.logger.clone();
        IoPool::spawn(async move {
            replay(
                subscription,
                &previous_diagnostics,
                reporter.as_ref(),
                logger.as_ref(),
            )
            .await;
        });

        let result = running.task.clone().await;
        self.copy_into_client_dir(client, &project, &result).await?;
        Ok(result)
    }

    async fn copy_into_client_dir(
        &self,
        client: &dyn ClientInfo,
        project: &Project,
        result: &Arc<ResultBundle>,
    ) -> Result<()> {
        let Some(successful) = &result.successful else {
            return Ok(());
        };
        let dest = client.unique_classes_dir_for(project);
        if successful.is_same_directory_as(&dest) {
            return Ok(());
        }
        let src = successful.classes_dir.clone();
        IoPool::spawn_blocking(move || copy_dir_contents(&src, &dest))
            .await
            .map_err(|err| SchedulerError::DeduplicationIo(err.to_string()))?
    }

    /// §4.4: atomically install `new_result` as the project's last
    /// successful result, decrementing (and, at zero, deleting) whatever it
    /// displaces. Called once a compile settles with `CompileOutcome::Ok`.
    pub fn process_result_atomically(
        self: &Arc<Self>,
        project: &Project,
        new_result: Arc<LastSuccessfulResult>,
    ) {
        let previous = self.last_successful.insert(project.clone(), new_result.clone());
        self.bump_refcount(&new_result.classes_dir);

        if let Some(previous) = previous {
            if previous.is_same_directory_as(&new_result.classes_dir) {
                return;
            }
            let state = self.clone();
            IoPool::spawn(async move {
                // Wait for whatever was still populating the displaced
                // directory, then the new one, before releasing: a
                // concurrent reader may still be copying out of the old
                // directory when this settles (§4.4).
                let _ = previous.populating_products.clone().await;
                let _ = new_result.populating_products.clone().await;
                state.release_dir(previous.classes_dir.clone());
            });
        }
    }

    /// §4.4's unregister-on-error: drop a fingerprint from the running
    /// table so a later retry starts fresh rather than deduplicating onto
    /// a compile that already failed to even start, and decrement the
    /// refcount step 3a bumped on the previous result's directory — that
    /// result was never displaced by a new one, so nothing else will ever
    /// release this reference.
    pub fn unregister(self: &Arc<Self>, fingerprint: Fingerprint, previous_dir: Option<PathBuf>) {
        self.running.remove(&fingerprint);
        if let Some(dir) = previous_dir {
            self.release_dir(dir);
        }
    }
}

fn remove_dir_if_exists(dir: &PathBuf) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SchedulerError::Io(err)),
    }
}

fn copy_dir_contents(src: &PathBuf, dest: &PathBuf) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dest.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_contents(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), dest_path)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::{populate_task, CompileOutcome, Products};
    use crate::fingerprint::Fingerprint;
    use crate::mirror::{LoggerAction, ReporterAction};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FakeSetup {
        fingerprint: Fingerprint,
    }

    #[async_trait]
    impl Setup for FakeSetup {
        async fn setup(&self, inputs: &BundleInputs) -> Result<CompileBundle> {
            Ok(CompileBundle {
                project: inputs.project.clone(),
                fingerprint: self.fingerprint,
                reporter: Arc::new(NullReporter),
                logger: Arc::new(NullLogger),
                previous_result: None,
                mirror: EventMirror::new(),
            })
        }
    }

    struct NullReporter;
    #[async_trait]
    impl Reporter for NullReporter {
        async fn report(&self, _action: ReporterAction) {}
    }

    struct NullLogger;
    #[async_trait]
    impl Logger for NullLogger {
        async fn log(&self, _action: LoggerAction) {}
    }

    struct TempDirClient {
        dir: PathBuf,
    }
    impl ClientInfo for TempDirClient {
        fn unique_classes_dir_for(&self, _project: &Project) -> PathBuf {
            self.dir.clone()
        }
    }

    #[tokio::test]
    async fn concurrent_setup_calls_with_equal_fingerprint_compile_once() {
        let state = SchedulerState::new();
        let setup = FakeSetup {
            fingerprint: Fingerprint::from_hash(&"shared"),
        };
        let client = TempDirClient {
            dir: std::env::temp_dir().join("compile-graph-scheduler-test-dedup"),
        };
        let compile_calls = Arc::new(AtomicUsize::new(0));

        let run = |calls: Arc<AtomicUsize>| {
            move |bundle: CompileBundle| -> BoxFuture<'static, ResultBundle> {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    let products = Products::new(vec![]);
                    let successful = Arc::new(LastSuccessfulResult {
                        project: bundle.project.clone(),
                        classes_dir: std::env::temp_dir()
                            .join("compile-graph-scheduler-test-dedup-out"),
                        previous_analysis: None,
                        previous_diagnostics: vec![],
                        populating_products: populate_task(async { Ok(()) }),
                        is_empty: false,
                    });
                    bundle.mirror.close().await;
                    ResultBundle::ok(successful, products)
                })
            }
        };

        let a = state.setup_and_deduplicate(
            &setup,
            &client,
            BundleInputs {
                project: Project::new("p", 0),
                raw_classpath: vec![],
            },
            run(compile_calls.clone()),
        );
        let b = state.setup_and_deduplicate(
            &setup,
            &client,
            BundleInputs {
                project: Project::new("p", 0),
                raw_classpath: vec![],
            },
            run(compile_calls.clone()),
        );

        let (ra, rb) = tokio::join!(a, b);
        assert!(matches!(ra.unwrap().outcome, CompileOutcome::Ok(_)));
        assert!(matches!(rb.unwrap().outcome, CompileOutcome::Ok(_)));
        assert_eq!(compile_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn refcount_reaches_zero_only_after_both_decrements() {
        let state = SchedulerState::new();
        let dir = PathBuf::from("/tmp/does-not-exist-compile-graph-scheduler");
        state.bump_refcount(&dir);
        state.bump_refcount(&dir);
        let first = state
            .dir_refcounts
            .get(&dir)
            .map(|e| e.fetch_sub(1, Ordering::SeqCst) - 1);
        assert_eq!(first, Some(1));
        let second = state
            .dir_refcounts
            .get(&dir)
            .map(|e| e.fetch_sub(1, Ordering::SeqCst) - 1);
        assert_eq!(second, Some(0));
    }

    /// I3: a compile that fails must release the refcount bumped on its
    /// previous result's directory, the same as a successful compile that
    /// displaces it does — otherwise that directory's counter never reaches
    /// zero and it is never deleted.
    #[tokio::test]
    async fn failed_compile_releases_previous_directory_refcount() {
        let state = SchedulerState::new();
        let project = Project::new("p", 0);
        let previous_dir = std::env::temp_dir().join("compile-graph-scheduler-test-failed-prev");
        let previous = Arc::new(LastSuccessfulResult {
            project: project.clone(),
            classes_dir: previous_dir.clone(),
            previous_analysis: None,
            previous_diagnostics: vec![],
            populating_products: populate_task(async { Ok(()) }),
            is_empty: false,
        });
        state.process_result_atomically(&project, previous.clone());
        // `process_result_atomically` itself bumped the refcount to 1 when
        // installing `previous`; a subsequent failed compile bumps it again
        // (step 3a) and must bring it back down on its own.

        let setup = FakeSetup {
            fingerprint: Fingerprint::from_hash(&"failing"),
        };
        let client = TempDirClient {
            dir: std::env::temp_dir().join("compile-graph-scheduler-test-failed-client"),
        };

        let result = state
            .setup_and_deduplicate(
                &setup,
                &client,
                BundleInputs {
                    project: project.clone(),
                    raw_classpath: vec![],
                },
                |bundle: CompileBundle| -> BoxFuture<'static, ResultBundle> {
                    Box::pin(async move {
                        bundle.mirror.close().await;
                        ResultBundle::failed(vec![])
                    })
                },
            )
            .await;

        assert!(matches!(result.unwrap().outcome, CompileOutcome::Failed(_)));
        let count = state
            .dir_refcounts
            .get(&previous_dir)
            .map(|e| e.load(Ordering::SeqCst));
        assert_eq!(count, Some(1));
    }

    /// §4.3 step 3b: a previous result whose directory no longer exists on
    /// disk must never be handed to `compile` — a fresh empty result is
    /// substituted instead, without touching the counter bumped in step 3a.
    #[tokio::test]
    async fn stale_previous_result_is_substituted_with_a_fresh_empty_one() {
        let state = SchedulerState::new();
        let project = Project::new("p", 0);
        let missing_dir = PathBuf::from("/tmp/compile-graph-scheduler-does-not-exist-on-disk");
        let previous = Arc::new(LastSuccessfulResult {
            project: project.clone(),
            classes_dir: missing_dir.clone(),
            previous_analysis: None,
            previous_diagnostics: vec![],
            populating_products: populate_task(async { Ok(()) }),
            is_empty: false,
        });
        state.process_result_atomically(&project, previous.clone());

        let setup = FakeSetup {
            fingerprint: Fingerprint::from_hash(&"stale"),
        };
        let client = TempDirClient {
            dir: std::env::temp_dir().join("compile-graph-scheduler-test-stale-client"),
        };

        let seen_previous = Arc::new(std::sync::Mutex::new(None));
        let seen_previous_clone = seen_previous.clone();
        let result = state
            .setup_and_deduplicate(
                &setup,
                &client,
                BundleInputs {
                    project: project.clone(),
                    raw_classpath: vec![],
                },
                move |bundle: CompileBundle| -> BoxFuture<'static, ResultBundle> {
                    *seen_previous_clone.lock().unwrap() = bundle.previous_result.clone();
                    Box::pin(async move {
                        bundle.mirror.close().await;
                        ResultBundle::failed(vec![])
                    })
                },
            )
            .await;
        let _ = result;

        let handed_to_compile = seen_previous.lock().unwrap().clone().unwrap();
        assert!(handed_to_compile.is_empty);

        // The counter bumped for the *installed* (stale) previous result is
        // untouched by the substitution itself — only the later
        // unregister-on-error path (exercised above) releases it.
        let count = state
            .dir_refcounts
            .get(&missing_dir)
            .map(|e| e.load(Ordering::SeqCst));
        assert_eq!(count, Some(1));
    }
}
