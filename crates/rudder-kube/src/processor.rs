//! One reconciliation pass over the resources of a release
//!
//! ```text
//! rendered resources
//!       │
//!       ▼
//!   transform ──► validate ──► dedupe ──► patch (releasable, deployable)
//!                                               │
//!                                               ▼
//!                                      filter hooks by phase
//!                                               │
//!            ┌─────────┬─────────┬──────────────┼─────────────┐
//!            ▼         ▼         ▼              ▼             ▼
//!          CRDs      hooks    general     prev hooks    prev general
//!            └─────────┴─────────┴──────┬───────┴─────────────┘
//!                                       ▼
//!                            sort ──► adoption check
//! ```
//!
//! On uninstall, validation and duplicate failures only exclude the
//! offending resource with a warning: the release is going away anyway.

use std::borrow::Cow;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use rudder_core::{DeployType, GeneralResource, HookResource, ResourceSpec, StandaloneCrd};

use crate::client::ClusterClient;
use crate::config::ReconcileConfig;
use crate::error::{KubeError, Result};
use crate::info::{
    GeneralResourceInfo, HookResourceInfo, PrevGeneralResourceInfo, PrevHookResourceInfo,
    StandaloneCrdInfo, build_general_resource_info, build_hook_resource_info,
    build_prev_general_resource_info, build_prev_hook_resource_info, build_standalone_crd_info,
};
use crate::patch::{ExtraMetadataPatcher, ReleaseMetadataPatcher, ResourceCategory, ResourcePatcher, run_patchers};
use crate::pool::{proportional_workers, run_bounded};
use crate::transform::{
    DropInvalidAnnotationsAndLabelsTransformer, ResourceListsTransformer, ResourceTransformer,
    run_transformers,
};

/// Everything a pass needs besides the rendered resources
pub struct ProcessorOptions {
    pub release_name: String,
    pub release_namespace: String,
    pub deploy_type: DeployType,
    pub config: ReconcileConfig,
    /// Without a client the pass stops before touching the cluster
    pub client: Option<Arc<ClusterClient>>,
    pub hook_transformers: Vec<Box<dyn ResourceTransformer>>,
    pub general_transformers: Vec<Box<dyn ResourceTransformer>>,
    pub releasable_patchers: Vec<Box<dyn ResourcePatcher>>,
    pub deployable_patchers: Vec<Box<dyn ResourcePatcher>>,
    pub prev_release_hooks: Vec<HookResource>,
    pub prev_release_generals: Vec<GeneralResource>,
}

impl ProcessorOptions {
    pub fn new(
        release_name: impl Into<String>,
        release_namespace: impl Into<String>,
        deploy_type: DeployType,
    ) -> Self {
        Self {
            release_name: release_name.into(),
            release_namespace: release_namespace.into(),
            deploy_type,
            config: ReconcileConfig::default(),
            client: None,
            hook_transformers: Vec::new(),
            general_transformers: Vec::new(),
            releasable_patchers: Vec::new(),
            deployable_patchers: Vec::new(),
            prev_release_hooks: Vec::new(),
            prev_release_generals: Vec::new(),
        }
    }

    pub fn with_client(mut self, client: Arc<ClusterClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_previous_release(mut self, hooks: Vec<HookResource>, generals: Vec<GeneralResource>) -> Self {
        self.prev_release_hooks = hooks;
        self.prev_release_generals = generals;
        self
    }

    pub fn with_hook_transformer(mut self, transformer: Box<dyn ResourceTransformer>) -> Self {
        self.hook_transformers.push(transformer);
        self
    }

    pub fn with_general_transformer(mut self, transformer: Box<dyn ResourceTransformer>) -> Self {
        self.general_transformers.push(transformer);
        self
    }

    pub fn with_releasable_patcher(mut self, patcher: Box<dyn ResourcePatcher>) -> Self {
        self.releasable_patchers.push(patcher);
        self
    }

    pub fn with_deployable_patcher(mut self, patcher: Box<dyn ResourcePatcher>) -> Self {
        self.deployable_patchers.push(patcher);
        self
    }
}

/// Builds every resource list and decision of one release operation
pub struct DeployableResourcesProcessor {
    opts: ProcessorOptions,

    standalone_crds: Vec<StandaloneCrd>,
    hooks: Vec<HookResource>,
    generals: Vec<GeneralResource>,

    releasable_hooks: Vec<HookResource>,
    releasable_generals: Vec<GeneralResource>,

    deployable_crds: Vec<StandaloneCrd>,
    deployable_hooks: Vec<HookResource>,
    deployable_generals: Vec<GeneralResource>,

    crd_infos: Vec<StandaloneCrdInfo>,
    hook_infos: Vec<HookResourceInfo>,
    general_infos: Vec<GeneralResourceInfo>,
    prev_hook_infos: Vec<PrevHookResourceInfo>,
    prev_general_infos: Vec<PrevGeneralResourceInfo>,
}

impl DeployableResourcesProcessor {
    pub fn new(
        opts: ProcessorOptions,
        standalone_crds: Vec<StandaloneCrd>,
        hooks: Vec<HookResource>,
        generals: Vec<GeneralResource>,
    ) -> Self {
        Self {
            opts,
            standalone_crds,
            hooks,
            generals,
            releasable_hooks: Vec::new(),
            releasable_generals: Vec::new(),
            deployable_crds: Vec::new(),
            deployable_hooks: Vec::new(),
            deployable_generals: Vec::new(),
            crd_infos: Vec::new(),
            hook_infos: Vec::new(),
            general_infos: Vec::new(),
            prev_hook_infos: Vec::new(),
            prev_general_infos: Vec::new(),
        }
    }

    fn lenient(&self) -> bool {
        self.opts.deploy_type.is_uninstall()
    }

    /// Run the pass; on error the accessors reflect whatever was reached
    #[tracing::instrument(
        skip_all,
        fields(release = %self.opts.release_name, namespace = %self.opts.release_namespace, operation = %self.opts.deploy_type)
    )]
    pub async fn process(&mut self) -> Result<()> {
        let lenient = self.lenient();

        // Transform
        let hooks = std::mem::take(&mut self.hooks);
        let generals = std::mem::take(&mut self.generals);
        let crds = std::mem::take(&mut self.standalone_crds);
        let hooks = self.transform_hooks(hooks)?;
        let generals = self.transform_generals(generals)?;

        // Validate
        let crds = screen(crds, lenient, |crd| Ok(crd.validate()?))?;
        let hooks = screen(hooks, lenient, |hook| Ok(hook.validate()?))?;
        let generals = screen(generals, lenient, |general| Ok(general.validate()?))?;

        // Duplicates and the release namespace
        let mut seen = HashSet::new();
        let crds = screen(crds, lenient, |crd| check_unique(&mut seen, crd.spec()))?;
        let hooks = screen(hooks, lenient, |hook| {
            self.check_not_release_namespace(hook.spec())?;
            check_unique(&mut seen, hook.spec())
        })?;
        let generals = screen(generals, lenient, |general| {
            self.check_not_release_namespace(general.spec())?;
            check_unique(&mut seen, general.spec())
        })?;

        self.standalone_crds = crds;
        self.hooks = hooks;
        self.generals = generals;

        // Patch
        if lenient {
            self.releasable_hooks = self.hooks.clone();
            self.releasable_generals = self.generals.clone();
            self.deployable_crds = self.standalone_crds.clone();
            self.deployable_hooks = self.hooks.clone();
            self.deployable_generals = self.generals.clone();
        } else {
            self.patch_all()?;
        }

        // Only hooks of this operation's phases run
        let deploy_type = self.opts.deploy_type;
        self.deployable_hooks.retain(|hook| hook.runs_on(deploy_type));

        let Some(client) = self.opts.client.clone() else {
            tracing::debug!("no cluster access, skipping resource infos");
            return Ok(());
        };
        self.build_infos(&client).await?;

        if !self.opts.config.force_adoption && !lenient {
            self.validate_adoptable()?;
        }

        tracing::debug!(
            crds = self.crd_infos.len(),
            hooks = self.hook_infos.len(),
            generals = self.general_infos.len(),
            prev_hooks = self.prev_hook_infos.len(),
            prev_generals = self.prev_general_infos.len(),
            "resource infos built"
        );
        Ok(())
    }

    fn transform_hooks(&self, hooks: Vec<HookResource>) -> Result<Vec<HookResource>> {
        let specs = hooks.into_iter().map(HookResource::into_spec).collect();
        let specs = self.transform(specs, &self.opts.hook_transformers)?;
        Ok(specs.into_iter().map(HookResource::new).collect())
    }

    fn transform_generals(&self, generals: Vec<GeneralResource>) -> Result<Vec<GeneralResource>> {
        let specs = generals.into_iter().map(GeneralResource::into_spec).collect();
        let specs = self.transform(specs, &self.opts.general_transformers)?;
        Ok(specs.into_iter().map(GeneralResource::new).collect())
    }

    fn transform(&self, specs: Vec<ResourceSpec>, extra: &[Box<dyn ResourceTransformer>]) -> Result<Vec<ResourceSpec>> {
        let mut chain: Vec<&dyn ResourceTransformer> =
            vec![&ResourceListsTransformer, &DropInvalidAnnotationsAndLabelsTransformer];
        chain.extend(extra.iter().map(|t| t.as_ref()));

        let mut out = Vec::with_capacity(specs.len());
        for spec in specs {
            let file_path = spec.file_path().to_string();
            for object in run_transformers(vec![spec.into_object()], &chain)? {
                match ResourceSpec::new(object, file_path.as_str(), &self.opts.release_namespace) {
                    Ok(spec) => out.push(spec),
                    Err(err) if self.lenient() => {
                        tracing::warn!(file = %file_path, error = %err, "excluding resource from uninstall");
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }
        Ok(out)
    }

    fn check_not_release_namespace(&self, spec: &ResourceSpec) -> Result<()> {
        let identity = spec.identity();
        if identity.is_namespace() && identity.name() == self.opts.release_namespace {
            return Err(KubeError::ReleaseNamespaceManaged {
                namespace: self.opts.release_namespace.clone(),
            });
        }
        Ok(())
    }

    fn patch_all(&mut self) -> Result<()> {
        let extra = ExtraMetadataPatcher::new(
            self.opts.config.extra_annotations.clone(),
            self.opts.config.extra_labels.clone(),
        );
        let mut releasable: Vec<&dyn ResourcePatcher> = vec![&extra];
        releasable.extend(self.opts.releasable_patchers.iter().map(|p| p.as_ref()));

        let ownership = ReleaseMetadataPatcher::new(&self.opts.release_name, &self.opts.release_namespace);
        let mut deployable: Vec<&dyn ResourcePatcher> = vec![&ownership];
        deployable.extend(self.opts.deployable_patchers.iter().map(|p| p.as_ref()));

        let mut releasable_hooks = Vec::with_capacity(self.hooks.len());
        let mut deployable_hooks = Vec::with_capacity(self.hooks.len());
        for hook in &self.hooks {
            let released = patch_spec(hook.spec(), ResourceCategory::Hook, &releasable)?;
            let deployed = patch_spec(&released, ResourceCategory::Hook, &deployable)?;
            releasable_hooks.push(HookResource::new(released));
            deployable_hooks.push(HookResource::new(deployed));
        }

        let mut releasable_generals = Vec::with_capacity(self.generals.len());
        let mut deployable_generals = Vec::with_capacity(self.generals.len());
        for general in &self.generals {
            let released = patch_spec(general.spec(), ResourceCategory::General, &releasable)?;
            let deployed = patch_spec(&released, ResourceCategory::General, &deployable)?;
            releasable_generals.push(GeneralResource::new(released));
            deployable_generals.push(GeneralResource::new(deployed));
        }

        let mut deployable_crds = Vec::with_capacity(self.standalone_crds.len());
        for crd in &self.standalone_crds {
            let released = patch_spec(crd.spec(), ResourceCategory::StandaloneCrd, &releasable)?;
            let deployed = patch_spec(&released, ResourceCategory::StandaloneCrd, &deployable)?;
            deployable_crds.push(StandaloneCrd::new(deployed));
        }

        self.releasable_hooks = releasable_hooks;
        self.releasable_generals = releasable_generals;
        self.deployable_hooks = deployable_hooks;
        self.deployable_generals = deployable_generals;
        self.deployable_crds = deployable_crds;
        Ok(())
    }

    async fn build_infos(&mut self, client: &ClusterClient) -> Result<()> {
        let parallelism = self.opts.config.network_parallelism;
        let total = self.deployable_crds.len()
            + self.deployable_hooks.len()
            + self.deployable_generals.len()
            + self.opts.prev_release_hooks.len()
            + self.opts.prev_release_generals.len();
        let workers = |len: usize| proportional_workers(len, total, parallelism);

        let crds = self.deployable_crds.clone();
        let hooks = self.deployable_hooks.clone();
        let generals = self.deployable_generals.clone();
        let prev_hooks = self.opts.prev_release_hooks.clone();
        let prev_generals = self.opts.prev_release_generals.clone();

        let (crd_infos, hook_infos, general_infos, prev_hook_infos, prev_general_infos) = futures::join!(
            run_bounded(crds, workers(self.deployable_crds.len()), move |crd| {
                build_standalone_crd_info(client, crd)
            }),
            run_bounded(hooks, workers(self.deployable_hooks.len()), move |hook| {
                build_hook_resource_info(client, hook)
            }),
            run_bounded(generals, workers(self.deployable_generals.len()), move |general| {
                build_general_resource_info(client, general)
            }),
            run_bounded(prev_hooks, workers(self.opts.prev_release_hooks.len()), move |hook| {
                build_prev_hook_resource_info(client, hook)
            }),
            run_bounded(prev_generals, workers(self.opts.prev_release_generals.len()), move |general| {
                build_prev_general_resource_info(client, general)
            }),
        );

        let mut crd_infos = crd_infos?;
        let mut hook_infos = hook_infos?;
        let mut general_infos = general_infos?;
        let mut prev_hook_infos = prev_hook_infos?;
        let mut prev_general_infos = prev_general_infos?;

        crd_infos.sort_by(|a, b| a.identity().cmp(b.identity()));
        hook_infos.sort_by(|a, b| a.identity().cmp(b.identity()));
        general_infos.sort_by(|a, b| a.identity().cmp(b.identity()));
        prev_hook_infos.sort_by(|a, b| a.identity().cmp(b.identity()));
        prev_general_infos.sort_by(|a, b| a.identity().cmp(b.identity()));

        self.crd_infos = crd_infos;
        self.hook_infos = hook_infos;
        self.general_infos = general_infos;
        self.prev_hook_infos = prev_hook_infos;
        self.prev_general_infos = prev_general_infos;
        Ok(())
    }

    fn validate_adoptable(&self) -> Result<()> {
        let problems: Vec<String> = self
            .general_infos
            .iter()
            .filter_map(|info| {
                let live = info.live()?;
                let reason = live.non_adoptable_reason(&self.opts.release_name, &self.opts.release_namespace)?;
                Some(format!("  - {}: {}", info.identity(), reason))
            })
            .collect();

        if problems.is_empty() {
            return Ok(());
        }
        Err(KubeError::NotAdoptable {
            count: problems.len(),
            details: problems.join("\n"),
        })
    }

    /// Hooks as recorded by the release, before phase filtering
    pub fn releasable_hook_resources(&self) -> &[HookResource] {
        &self.releasable_hooks
    }

    pub fn releasable_general_resources(&self) -> &[GeneralResource] {
        &self.releasable_generals
    }

    pub fn deployable_standalone_crds(&self) -> &[StandaloneCrd] {
        &self.deployable_crds
    }

    /// Hooks to run during this operation
    pub fn deployable_hook_resources(&self) -> &[HookResource] {
        &self.deployable_hooks
    }

    pub fn deployable_general_resources(&self) -> &[GeneralResource] {
        &self.deployable_generals
    }

    pub fn standalone_crd_infos(&self) -> &[StandaloneCrdInfo] {
        &self.crd_infos
    }

    pub fn hook_resource_infos(&self) -> &[HookResourceInfo] {
        &self.hook_infos
    }

    pub fn general_resource_infos(&self) -> &[GeneralResourceInfo] {
        &self.general_infos
    }

    pub fn prev_hook_resource_infos(&self) -> &[PrevHookResourceInfo] {
        &self.prev_hook_infos
    }

    pub fn prev_general_resource_infos(&self) -> &[PrevGeneralResourceInfo] {
        &self.prev_general_infos
    }

    /// Live UIDs of everything this operation deploys
    pub fn current_release_uids(&self) -> HashSet<String> {
        self.general_infos
            .iter()
            .filter_map(GeneralResourceInfo::live_uid)
            .chain(self.hook_infos.iter().filter_map(HookResourceInfo::live_uid))
            .map(str::to_string)
            .collect()
    }
}

/// Keep items passing `check`; failures abort unless `lenient`
fn screen<T>(items: Vec<T>, lenient: bool, mut check: impl FnMut(&T) -> Result<()>) -> Result<Vec<T>> {
    let mut kept = Vec::with_capacity(items.len());
    for item in items {
        match check(&item) {
            Ok(()) => kept.push(item),
            Err(err) if lenient => {
                tracing::warn!(error = %err, "excluding resource from uninstall");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(kept)
}

fn check_unique(seen: &mut HashSet<String>, spec: &ResourceSpec) -> Result<()> {
    if seen.insert(spec.identity().id()) {
        return Ok(());
    }
    Err(KubeError::Duplicate {
        resource: spec.identity().human_id(),
    })
}

fn patch_spec(spec: &ResourceSpec, category: ResourceCategory, patchers: &[&dyn ResourcePatcher]) -> Result<ResourceSpec> {
    let patched: Cow<'_, Value> = run_patchers(spec.identity(), spec.object(), category, patchers)?;
    Ok(match patched {
        Cow::Borrowed(_) => spec.clone(),
        Cow::Owned(object) => spec.with_object(object),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::annotations::helm;
    use serde_json::json;

    fn general(name: &str) -> GeneralResource {
        let object = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "app" },
            "data": { "k": "v" }
        });
        GeneralResource::new(ResourceSpec::new(object, "templates/cm.yaml", "app").unwrap())
    }

    fn hook(name: &str, phase: &str) -> HookResource {
        let object = json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": name, "namespace": "app", "annotations": { "helm.sh/hook": phase } }
        });
        HookResource::new(ResourceSpec::new(object, "templates/job.yaml", "app").unwrap())
    }

    #[tokio::test]
    async fn test_without_client_builds_lists_only() {
        let opts = ProcessorOptions::new("web", "app", DeployType::Install);
        let mut processor = DeployableResourcesProcessor::new(
            opts,
            vec![],
            vec![hook("pre", "pre-install"), hook("up", "pre-upgrade")],
            vec![general("a")],
        );

        processor.process().await.unwrap();

        assert_eq!(processor.releasable_hook_resources().len(), 2);
        assert_eq!(processor.deployable_hook_resources().len(), 1);
        assert_eq!(processor.deployable_hook_resources()[0].identity().name(), "pre");
        assert!(processor.general_resource_infos().is_empty());
    }

    #[tokio::test]
    async fn test_releasable_and_deployable_patching() {
        let mut config = ReconcileConfig::default();
        config.extra_labels.insert("team".to_string(), "platform".to_string());
        let opts = ProcessorOptions::new("web", "app", DeployType::Install).with_config(config);
        let mut processor = DeployableResourcesProcessor::new(opts, vec![], vec![], vec![general("a")]);

        processor.process().await.unwrap();

        let releasable = processor.releasable_general_resources()[0].object();
        assert_eq!(releasable["metadata"]["labels"]["team"], "platform");
        assert!(releasable["metadata"].get("annotations").is_none());

        let deployable = processor.deployable_general_resources()[0].object();
        assert_eq!(deployable["metadata"]["labels"]["team"], "platform");
        assert_eq!(deployable["metadata"]["annotations"][helm::RELEASE_NAME], "web");
    }

    #[tokio::test]
    async fn test_duplicate_rejected() {
        let opts = ProcessorOptions::new("web", "app", DeployType::Upgrade);
        let mut processor =
            DeployableResourcesProcessor::new(opts, vec![], vec![], vec![general("a"), general("a")]);

        let err = processor.process().await.unwrap_err();
        assert!(matches!(err, KubeError::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_tolerated_on_uninstall() {
        let opts = ProcessorOptions::new("web", "app", DeployType::Uninstall);
        let mut processor =
            DeployableResourcesProcessor::new(opts, vec![], vec![], vec![general("a"), general("a")]);

        processor.process().await.unwrap();
        assert_eq!(processor.deployable_general_resources().len(), 1);
    }

    #[tokio::test]
    async fn test_release_namespace_rejected() {
        let ns = json!({ "apiVersion": "v1", "kind": "Namespace", "metadata": { "name": "app" } });
        let ns = GeneralResource::new(ResourceSpec::new(ns, "templates/ns.yaml", "app").unwrap());
        let opts = ProcessorOptions::new("web", "app", DeployType::Install);
        let mut processor = DeployableResourcesProcessor::new(opts, vec![], vec![], vec![ns]);

        let err = processor.process().await.unwrap_err();
        assert!(matches!(err, KubeError::ReleaseNamespaceManaged { .. }));
    }

    #[tokio::test]
    async fn test_lists_are_expanded() {
        let list = json!({
            "apiVersion": "v1",
            "kind": "List",
            "metadata": { "name": "bundle" },
            "items": [
                { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "one" } },
                { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "two" } }
            ]
        });
        let list = GeneralResource::new(ResourceSpec::new(list, "templates/list.yaml", "app").unwrap());
        let opts = ProcessorOptions::new("web", "app", DeployType::Install);
        let mut processor = DeployableResourcesProcessor::new(opts, vec![], vec![], vec![list]);

        processor.process().await.unwrap();

        let names: Vec<_> = processor
            .deployable_general_resources()
            .iter()
            .map(|g| g.identity().name().to_string())
            .collect();
        assert_eq!(names, vec!["one", "two"]);
        assert_eq!(processor.deployable_general_resources()[0].identity().namespace(), Some("app"));
    }

    #[tokio::test]
    async fn test_nameless_list_is_expanded() {
        let list = json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                { "apiVersion": "v1", "kind": "ConfigMap", "metadata": { "name": "one" } },
                { "apiVersion": "v1", "kind": "Secret", "metadata": { "name": "two" } }
            ]
        });
        let hooks = json!({
            "apiVersion": "v1",
            "kind": "ConfigMapList",
            "items": [
                {
                    "apiVersion": "v1",
                    "kind": "ConfigMap",
                    "metadata": { "name": "seed", "annotations": { "helm.sh/hook": "pre-install" } }
                }
            ]
        });
        let list = GeneralResource::new(ResourceSpec::new(list, "templates/list.yaml", "app").unwrap());
        let hooks = HookResource::new(ResourceSpec::new(hooks, "templates/hooks.yaml", "app").unwrap());
        let opts = ProcessorOptions::new("web", "app", DeployType::Install);
        let mut processor = DeployableResourcesProcessor::new(opts, vec![], vec![hooks], vec![list]);

        processor.process().await.unwrap();

        let kinds: Vec<_> = processor
            .deployable_general_resources()
            .iter()
            .map(|g| g.identity().kind().to_string())
            .collect();
        assert_eq!(kinds, vec!["ConfigMap", "Secret"]);
        assert_eq!(processor.deployable_hook_resources().len(), 1);
        assert_eq!(processor.deployable_hook_resources()[0].identity().name(), "seed");
    }
}
