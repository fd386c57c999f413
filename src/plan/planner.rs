use log::{debug, info};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::InstallationPlan;
use crate::error::Result;
use crate::executor::{ExecutionReport, Executor};
use crate::package::{Dependency, InstalledPackage, Package, StoreMode, UserRequestPackage, normalize_name};
use crate::repository::{InstallationRepository, PlanMode, Repository};
use crate::resolver::{DependencyOverrides, DependencyResolver};
use crate::site::InstallationTarget;

/// Knobs for [`InstallationPlanner::plan_installation`].
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Record the requested dependencies as user requests.
    pub user_requested: bool,
    pub dependencies_override: DependencyOverrides,
    /// Installed packages to re-resolve instead of keeping them pinned.
    pub updates: Vec<String>,
    /// Requested names with no version constraint. Defaults to the requested
    /// dependencies whose specifier allows every version.
    pub unspecified_spec_packages: Option<HashSet<String>>,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            user_requested: true,
            dependencies_override: DependencyOverrides::new(),
            updates: Vec::new(),
            unspecified_spec_packages: None,
        }
    }
}

/// Everything both resolution strategies work from. All maps are keyed by
/// normalized package name.
#[derive(Debug, Clone, Default)]
pub struct PlanningState {
    /// Installed packages minus those being updated.
    pub preinstalled: BTreeMap<String, Arc<InstalledPackage>>,
    /// User requests already recorded on `preinstalled`.
    pub pre_requested: BTreeMap<String, Dependency>,
    /// Dependencies requested by this call.
    pub new_deps: BTreeMap<String, Dependency>,
    pub unspecified: HashSet<String>,
    pub overrides: DependencyOverrides,
}

impl PlanningState {
    /// Recorded and new requests together; a new request replaces a recorded one.
    pub fn all_deps(&self) -> BTreeMap<String, Dependency> {
        let mut all = self.pre_requested.clone();
        all.extend(self.new_deps.iter().map(|(k, v)| (k.clone(), v.clone())));
        all
    }
}

/// Result of the pinned resolution attempt.
#[derive(Debug)]
pub enum FastPathOutcome {
    Resolved(Vec<Arc<dyn Package>>),
    /// The pins conflict with the request; the unpinned strategy has to run.
    NeedsSlowPath { reason: String },
}

/// Plans installations and removals for one target.
pub struct InstallationPlanner {
    pub(super) target: Arc<InstallationTarget>,
    pub(super) resolver: Arc<dyn DependencyResolver>,
    pub(super) executor: Arc<Executor>,
}

impl InstallationPlanner {
    pub fn new(
        target: Arc<InstallationTarget>,
        resolver: Arc<dyn DependencyResolver>,
        executor: Arc<Executor>,
    ) -> Self {
        Self {
            target,
            resolver,
            executor,
        }
    }

    pub fn target(&self) -> &Arc<InstallationTarget> {
        &self.target
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Reload the site and collect what both strategies need.
    pub fn prepare(&self, dependencies: &[Dependency], options: &PlanOptions) -> Result<PlanningState> {
        self.target.reload();
        let site = self.target.site_packages()?;

        let updates: HashSet<String> = options.updates.iter().map(|n| normalize_name(n)).collect();
        let preinstalled: BTreeMap<_, _> = site
            .iter()
            .filter(|(key, _)| !updates.contains(*key))
            .map(|(key, package)| (key.clone(), package.clone()))
            .collect();
        let pre_requested = preinstalled
            .iter()
            .filter_map(|(key, p)| p.user_request().map(|d| (key.clone(), d.clone())))
            .collect();

        let unspecified = match &options.unspecified_spec_packages {
            Some(names) => names.iter().map(|n| normalize_name(n)).collect(),
            None => dependencies
                .iter()
                .filter(|d| d.is_allow_all())
                .map(Dependency::package_name_key)
                .collect(),
        };
        let new_deps = dependencies
            .iter()
            .map(|d| (d.package_name_key(), d.clone()))
            .collect();
        let overrides = options
            .dependencies_override
            .iter()
            .map(|(name, dep)| (normalize_name(name), dep.clone()))
            .collect();

        Ok(PlanningState {
            preinstalled,
            pre_requested,
            new_deps,
            unspecified,
            overrides,
        })
    }

    /// Resolve only the new requests, with every other installed package pinned.
    ///
    /// Installed packages the resolver did not touch are carried over into the
    /// result. An unsolvable resolution is not an error here.
    #[tracing::instrument(skip_all)]
    pub fn resolve_fast_path(
        &self,
        state: &PlanningState,
        repository: &dyn Repository,
    ) -> Result<FastPathOutcome> {
        debug!("Trying fast path for {} new request(s)", state.new_deps.len());
        let root = Arc::new(UserRequestPackage::new(state.new_deps.values().cloned()));
        let adapter = InstallationRepository::new(
            repository,
            root.clone(),
            &state.preinstalled,
            &state.unspecified,
            PlanMode::Fast,
        );

        let mut packages = match self.resolver.resolve(
            &root.to_dependency(),
            &self.target,
            &adapter,
            &state.overrides,
        ) {
            Ok(packages) => packages,
            Err(e) if e.is_unsolvable() => {
                return Ok(FastPathOutcome::NeedsSlowPath {
                    reason: e.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        let resolved: HashSet<String> = packages.iter().map(|p| p.name_key()).collect();
        packages.extend(
            state
                .preinstalled
                .iter()
                .filter(|(key, _)| !resolved.contains(*key))
                .map(|(_, p)| p.clone() as Arc<dyn Package>),
        );
        Ok(FastPathOutcome::Resolved(packages))
    }

    /// Resolve every request, recorded and new, letting installed packages
    /// change version. Failure is final.
    #[tracing::instrument(skip_all)]
    pub fn resolve_slow_path(
        &self,
        state: &PlanningState,
        repository: &dyn Repository,
    ) -> Result<Vec<Arc<dyn Package>>> {
        let all_deps = state.all_deps();
        info!("Resolving {} request(s) without pins", all_deps.len());
        let root = Arc::new(UserRequestPackage::new(all_deps.into_values()));
        let adapter = InstallationRepository::new(
            repository,
            root.clone(),
            &state.preinstalled,
            &state.unspecified,
            PlanMode::Slow,
        );

        Ok(self.resolver.resolve(
            &root.to_dependency(),
            &self.target,
            &adapter,
            &state.overrides,
        )?)
    }

    /// Work out which packages the target should hold once `dependencies` are
    /// installed. Nothing on disk changes.
    pub fn plan_installation(
        &self,
        dependencies: &[Dependency],
        repository: &dyn Repository,
        options: &PlanOptions,
    ) -> Result<InstallationPlan> {
        let state = self.prepare(dependencies, options)?;

        let packages = match self.resolve_fast_path(&state, repository)? {
            FastPathOutcome::Resolved(packages) => packages,
            FastPathOutcome::NeedsSlowPath { reason } => {
                debug!("Fast path failed, falling back to slow path: {}", reason);
                self.resolve_slow_path(&state, repository)?
            }
        };

        let mut user_requests = state.pre_requested;
        if options.user_requested {
            user_requests.extend(state.new_deps);
        }

        let plan = InstallationPlan::new(
            self.target.clone(),
            self.executor.clone(),
            packages,
            user_requests,
        );
        debug!("Planned {} package(s)", plan.packages().len());
        Ok(plan)
    }

    /// Plan and execute. Returns `None` when there is nothing to install.
    pub async fn install(
        &self,
        dependencies: &[Dependency],
        repository: &dyn Repository,
        options: &PlanOptions,
        store_modes: Option<HashMap<String, StoreMode>>,
    ) -> Result<Option<ExecutionReport>> {
        if dependencies.is_empty() {
            return Ok(None);
        }

        let mut plan = self.plan_installation(dependencies, repository, options)?;
        if let Some(store_modes) = store_modes {
            plan.set_store_modes(store_modes);
        }
        plan.execute(None).await.map(Some)
    }
}

impl std::fmt::Debug for InstallationPlanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstallationPlanner")
            .field("target", &self.target)
            .field("executor", &self.executor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ResolveError};
    use crate::package::PackageKind;
    use crate::resolver::MockDependencyResolver;
    use crate::test_utils::{BacktrackingResolver, MemoryRepository, temp_site};

    fn deps(specs: &[&str]) -> Vec<Dependency> {
        specs.iter().map(|s| s.parse().unwrap()).collect()
    }

    fn planner(target: &Arc<InstallationTarget>) -> InstallationPlanner {
        InstallationPlanner::new(
            target.clone(),
            Arc::new(BacktrackingResolver),
            Arc::new(Executor::default()),
        )
    }

    fn versions(plan: &InstallationPlan) -> BTreeMap<String, String> {
        plan.packages()
            .iter()
            .map(|p| (p.name_key(), p.descriptor().version.to_string()))
            .collect()
    }

    fn installed_versions(target: &InstallationTarget) -> BTreeMap<String, String> {
        target
            .site_packages()
            .unwrap()
            .iter()
            .map(|(k, p)| (k.clone(), p.descriptor().version.to_string()))
            .collect()
    }

    #[test_log::test(tokio::test)]
    async fn test_install_into_empty_site() {
        let (_dir, target) = temp_site();
        let repo = MemoryRepository::new()
            .with("app", "1.0", &["lib>=1"])
            .with("lib", "1.0", &[])
            .with("lib", "1.5", &[]);

        let report = planner(&target)
            .install(&deps(&["app"]), &repo, &PlanOptions::default(), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.completed(), 2);

        let site = target.site_packages().unwrap();
        assert_eq!(site.get("lib").unwrap().descriptor().version.to_string(), "1.5");
        assert_eq!(site.get("app").unwrap().user_request(), Some(&"app".parse().unwrap()));
        assert!(!site.get("lib").unwrap().is_user_requested());
    }

    #[tokio::test]
    async fn test_install_nothing_is_a_noop() {
        let (_dir, target) = temp_site();
        let repo = MemoryRepository::new();
        let result = planner(&target)
            .install(&[], &repo, &PlanOptions::default(), None)
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[test_log::test(tokio::test)]
    async fn test_fast_path_keeps_unrelated_pins() {
        let (_dir, target) = temp_site();
        let mut repo = MemoryRepository::new()
            .with("a", "1.0", &["shared"])
            .with("shared", "1.0", &[]);
        let planner = planner(&target);
        planner
            .install(&deps(&["a"]), &repo, &PlanOptions::default(), None)
            .await
            .unwrap();

        // --- Newer releases appear ---
        repo = repo
            .with("shared", "2.0", &[])
            .with("b", "1.0", &["shared"]);
        let plan = planner
            .plan_installation(&deps(&["b"]), &repo, &PlanOptions::default())
            .unwrap();

        assert_eq!(
            versions(&plan),
            BTreeMap::from([
                ("a".to_string(), "1.0".to_string()),
                ("b".to_string(), "1.0".to_string()),
                ("shared".to_string(), "1.0".to_string()),
            ])
        );
        let ops = plan.compute_operations_for_target(None).unwrap();
        for op in ops {
            let expected = if op.package.name_key() == "b" {
                crate::package::PackageOperation::Install
            } else {
                crate::package::PackageOperation::Skip
            };
            assert_eq!(op.operation, expected, "{}", op.package.descriptor());
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_falls_back_to_slow_path() {
        let (_dir, target) = temp_site();
        let mut repo = MemoryRepository::new()
            .with("a", "1.0", &["b"])
            .with("b", "2.0", &[]);
        let planner = planner(&target);
        planner
            .install(&deps(&["a>=1.0"]), &repo, &PlanOptions::default(), None)
            .await
            .unwrap();

        // C needs a newer A than the pinned one.
        repo = repo.with("a", "1.2", &["b"]).with("c", "1.0", &["a>=1.2"]);
        let state = planner.prepare(&deps(&["c>=1.0"]), &PlanOptions::default()).unwrap();
        assert!(matches!(
            planner.resolve_fast_path(&state, &repo).unwrap(),
            FastPathOutcome::NeedsSlowPath { .. }
        ));

        let plan = planner
            .plan_installation(&deps(&["c>=1.0"]), &repo, &PlanOptions::default())
            .unwrap();
        assert_eq!(
            versions(&plan),
            BTreeMap::from([
                ("a".to_string(), "1.2".to_string()),
                ("b".to_string(), "2.0".to_string()),
                ("c".to_string(), "1.0".to_string()),
            ])
        );
        assert_eq!(plan.user_requests().len(), 2);

        let ops: BTreeMap<_, _> = plan
            .compute_operations_for_target(None)
            .unwrap()
            .into_iter()
            .map(|op| (op.package.name_key(), op.operation))
            .collect();
        use crate::package::PackageOperation::*;
        assert_eq!(
            ops,
            BTreeMap::from([
                ("a".to_string(), Update),
                ("b".to_string(), Skip),
                ("c".to_string(), Install),
            ])
        );

        plan.execute(None).await.unwrap();
        assert_eq!(installed_versions(&target).get("a").unwrap(), "1.2");
        // The recorded request for A survives the re-resolution.
        assert_eq!(
            target.site_packages().unwrap().get("a").unwrap().user_request(),
            Some(&"a>=1.0".parse().unwrap())
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_slow_path_failure_propagates() {
        let (_dir, target) = temp_site();
        let mut repo = MemoryRepository::new().with("a", "1.0", &[]);
        let planner = planner(&target);
        planner
            .install(&deps(&["a==1.0"]), &repo, &PlanOptions::default(), None)
            .await
            .unwrap();

        repo = repo.with("c", "1.0", &["a>=2"]);
        let before = installed_versions(&target);
        let err = planner
            .plan_installation(&deps(&["c"]), &repo, &PlanOptions::default())
            .unwrap_err();

        assert!(matches!(err, Error::Resolve(ResolveError::Unsolvable(_))));
        assert_eq!(installed_versions(&target), before);
    }

    #[test]
    fn test_other_resolver_errors_skip_slow_path() {
        let (_dir, target) = temp_site();
        let mut resolver = MockDependencyResolver::new();
        resolver
            .expect_resolve()
            .times(1)
            .returning(|_, _, _, _| Err(ResolveError::Other(anyhow::anyhow!("index offline"))));
        let planner = InstallationPlanner::new(
            target.clone(),
            Arc::new(resolver),
            Arc::new(Executor::default()),
        );

        let err = planner
            .plan_installation(&deps(&["a"]), &MemoryRepository::new(), &PlanOptions::default())
            .unwrap_err();
        assert!(err.to_string().contains("index offline"));
    }

    #[test]
    fn test_resolver_sees_request_root_and_overrides() {
        let (_dir, target) = temp_site();
        let mut resolver = MockDependencyResolver::new();
        resolver
            .expect_resolve()
            .withf(|root, _, _, overrides| {
                root.package_name == crate::package::REQUEST_PACKAGE_NAME
                    && overrides.get("lib-x").is_some_and(|d| d.to_string() == "lib-x==1")
            })
            .times(1)
            .returning(|root, target, repo, _| {
                let found = repo.match_dependency(root, target.env()).unwrap();
                assert_eq!(found[0].kind(), PackageKind::Request);
                Ok(found)
            });
        let planner = InstallationPlanner::new(
            target.clone(),
            Arc::new(resolver),
            Arc::new(Executor::default()),
        );

        let options = PlanOptions {
            dependencies_override: DependencyOverrides::from([(
                "Lib_X".to_string(),
                "lib-x==1".parse().unwrap(),
            )]),
            ..PlanOptions::default()
        };
        let plan = planner
            .plan_installation(&deps(&["a"]), &MemoryRepository::new(), &options)
            .unwrap();
        assert!(plan.packages().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_not_user_requested() {
        let (_dir, target) = temp_site();
        let repo = MemoryRepository::new().with("a", "1.0", &[]);
        let options = PlanOptions {
            user_requested: false,
            ..PlanOptions::default()
        };

        planner(&target)
            .install(&deps(&["a"]), &repo, &options, None)
            .await
            .unwrap();
        assert!(!target.site_packages().unwrap().get("a").unwrap().is_user_requested());
    }

    #[test_log::test(tokio::test)]
    async fn test_updates_release_pins() {
        let (_dir, target) = temp_site();
        let mut repo = MemoryRepository::new()
            .with("a", "1.0", &["b"])
            .with("b", "1.0", &[]);
        let planner = planner(&target);
        planner
            .install(&deps(&["a"]), &repo, &PlanOptions::default(), None)
            .await
            .unwrap();

        repo = repo.with("b", "1.1", &[]);
        let pinned = planner
            .plan_installation(&deps(&["a"]), &repo, &PlanOptions::default())
            .unwrap();
        assert_eq!(versions(&pinned).get("b").unwrap(), "1.0");

        let options = PlanOptions {
            updates: vec!["B".to_string()],
            ..PlanOptions::default()
        };
        let plan = planner.plan_installation(&deps(&["a"]), &repo, &options).unwrap();
        assert_eq!(versions(&plan).get("b").unwrap(), "1.1");
    }

    #[cfg(unix)]
    #[test_log::test(tokio::test)]
    async fn test_store_mode_change_relayouts_installed_package() {
        use crate::runtime::Runtime;

        let (dir, target) = temp_site();
        let repo = MemoryRepository::new().with("foo", "1.0", &[]);
        let planner = planner(&target);
        planner
            .install(&deps(&["foo"]), &repo, &PlanOptions::default(), None)
            .await
            .unwrap();

        let mut plan = planner
            .plan_installation(&deps(&["foo"]), &repo, &PlanOptions::default())
            .unwrap();
        plan.set_store_modes(HashMap::from([("foo".to_string(), StoreMode::Link)]));
        let ops = plan.compute_operations_for_target(None).unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].operation, crate::package::PackageOperation::Update);
        assert_eq!(ops[0].package.kind(), PackageKind::Installed);

        let report = plan.execute(None).await.unwrap();
        assert_eq!(report.completed(), 1);

        let foo = target.site_packages().unwrap().get("foo").unwrap().clone();
        assert_eq!(foo.store_mode(), StoreMode::Link);
        assert!(foo.is_user_requested());
        assert!(target.runtime().is_symlink(&dir.path().join("foo").join("VERSION")));

        // Executing again has nothing left to do.
        let ops = plan.compute_operations_for_target(None).unwrap();
        assert!(ops.iter().all(|op| op.operation == crate::package::PackageOperation::Skip));
        assert!(plan.execute(None).await.unwrap().is_empty());
    }

    #[test]
    fn test_prepare_state() {
        let (_dir, target) = temp_site();
        crate::test_utils::manifest("kept", "1.0", &[])
            .install_to(&target, Some(&"kept>=1".parse().unwrap()), StoreMode::Copy)
            .unwrap();
        crate::test_utils::manifest("refresh", "1.0", &[])
            .install_to(&target, Some(&"refresh".parse().unwrap()), StoreMode::Copy)
            .unwrap();

        let options = PlanOptions {
            updates: vec!["Refresh".to_string()],
            ..PlanOptions::default()
        };
        let state = planner(&target)
            .prepare(&deps(&["New_Pkg", "kept>=2", "pinned==1"]), &options)
            .unwrap();

        assert_eq!(state.preinstalled.keys().collect::<Vec<_>>(), vec!["kept"]);
        assert_eq!(state.pre_requested.len(), 1);
        assert_eq!(state.unspecified, HashSet::from(["new-pkg".to_string()]));
        assert_eq!(state.all_deps().get("kept").unwrap().to_string(), "kept>=2");
        assert_eq!(state.all_deps().len(), 3);
    }
}
