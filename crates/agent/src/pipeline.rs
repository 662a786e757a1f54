//! The build pipeline: plan, then build every planned file tier by tier.
//!
//! ```text
//! plan ──▶ tier 1 ──▶ tier 2 ──▶ … ──▶ BuildReport
//!            │
//!            ├─ file A: generate ─▶ audit ─┬─▶ pass
//!            │                             └─▶ fix ─▶ re-audit ─▶ … ─▶ pass | needs_review
//!            └─ file B: …            (files in a tier run concurrently)
//! ```
//!
//! Each file owns its own [`StateManager`]; only that file's task writes it.
//! Between tiers the coordinator folds file outcomes into [`LessonsState`]
//! one at a time and hands the lessons to the next tier's builders.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use buildloop_config::{AppConfig, LimitsConfig, PipelineConfig};
use buildloop_contracts::{
    self as contracts, AcceptanceCriterion, AuditVerdict, BuildPlan, ContractError, FileEntry,
    Finding, Phase, PhaseStatus, StackSpec,
};
use buildloop_core::{
    ArtifactKind, ArtifactStore, CancellationToken, ContractFetcher, Provider, StoreError,
    UsageTotals,
};
use buildloop_state::{
    AUDITOR_SCOPE, BUILDER_SCOPE, BoundaryFilters, FIXER_SCOPE, FileBuildState, FileField,
    FileStatus, HandoffBundle, HandoffFilter, LessonsState, MergePolicy, REPORTER_SCOPE,
    ReducerRegistry, RoleScope, StateManager, StateMap, TierSummary, update,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::actions::{FetchContractAction, NoteAction, ReadStateAction, SubmitArtifactAction};
use crate::dispatch::ActionDispatcher;
use crate::loop_runner::{AgentLoop, LoopError, LoopOutcome};
use crate::observer::TurnObserver;
use crate::roles::PipelineRole;

/// Collection build reports are persisted in.
pub const REPORTS_COLLECTION: &str = "builds";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{role} loop failed for {}: {source}", .subject.as_deref().unwrap_or("build"))]
    Loop {
        role: PipelineRole,
        subject: Option<String>,
        #[source]
        source: LoopError,
    },

    #[error("invalid {kind}: {}", .errors.join("; "))]
    InvalidContract { kind: ArtifactKind, errors: Vec<String> },

    #[error("no plan stored for build '{0}'")]
    PlanNotFound(String),

    #[error("no report stored for build '{0}'")]
    ReportNotFound(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("interrupted")]
    Interrupted,

    #[error("file task failed: {0}")]
    Task(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ContractError> for PipelineError {
    fn from(err: ContractError) -> Self {
        let errors = err.errors();
        match err {
            ContractError::Invalid { kind, .. } | ContractError::Model { kind, .. } => {
                Self::InvalidContract { kind, errors }
            }
        }
    }
}

impl PipelineError {
    /// Wrap a failed loop. A user abort stays `Interrupted` whichever loop
    /// observed it.
    fn from_loop(role: PipelineRole, subject: Option<String>, source: LoopError) -> Self {
        match source {
            LoopError::Interrupted { .. } => Self::Interrupted,
            source => Self::Loop { role, subject, source },
        }
    }
}

/// Overall outcome of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Every file passed its audit.
    Passed,
    /// At least one file needs a human look.
    NeedsReview,
}

/// Outcome of one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    pub phase: String,
    pub status: FileStatus,
    /// Status of the last audit, if one completed.
    pub audit_status: Option<String>,
    /// Findings of the last audit.
    pub findings: Vec<Finding>,
    pub fix_rounds: u32,
    /// Turns taken across every loop run for this file.
    pub iterations: usize,
    pub usage: UsageTotals,
    /// Key of the latest accepted file record in the `files` collection.
    pub artifact_key: Option<String>,
    /// Stage name → key of the artifact it produced.
    pub stage_outputs: StateMap,
    /// Lessons drawn from every finding raised against this file.
    pub lessons: Vec<String>,
    /// Notes the builder and fixer attached to their submissions, capped.
    #[serde(default)]
    pub notes: Vec<String>,
    /// Why the file stopped early, if it did.
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierReport {
    pub name: String,
    pub summary: TierSummary,
}

/// Everything a build produced, persisted under `builds/<build_id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub build_id: String,
    pub status: BuildStatus,
    pub tiers: Vec<TierReport>,
    pub files: Vec<FileReport>,
    pub usage: UsageTotals,
    pub lessons: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl BuildReport {
    pub fn file(&self, path: &str) -> Option<&FileReport> {
        self.files.iter().find(|f| f.path == path)
    }
}

#[derive(Debug, Clone)]
pub struct PlanResult {
    pub plan: BuildPlan,
    pub usage: UsageTotals,
    pub iterations: usize,
}

#[derive(Debug, Clone)]
pub struct AuditResult {
    pub verdict: AuditVerdict,
    pub usage: UsageTotals,
    pub iterations: usize,
}

/// One file's build inputs.
#[derive(Debug, Clone)]
struct FileJob {
    build_id: String,
    phase: String,
    entry: FileEntry,
    stack: StackSpec,
    criteria: Vec<AcceptanceCriterion>,
    lessons: Vec<String>,
}

/// Store key for a per-file stage artifact.
pub fn artifact_key(build_id: &str, path: &str, stage: &str) -> String {
    let slug = path.replace(['/', '\\'], "__");
    format!("{build_id}--{slug}--{stage}")
}

/// Runs the planner, builder, fixer and auditor loops against one store.
#[derive(Clone)]
pub struct BuildPipeline {
    provider: Arc<dyn Provider>,
    store: Arc<dyn ArtifactStore>,
    contracts: Arc<dyn ContractFetcher>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    request_timeout: Duration,
    limits: LimitsConfig,
    settings: PipelineConfig,
    registry: Arc<ReducerRegistry>,
    filters: BoundaryFilters,
    observer: Option<Arc<dyn TurnObserver>>,
    cancel: CancellationToken,
}

impl BuildPipeline {
    pub fn new(
        provider: Arc<dyn Provider>,
        store: Arc<dyn ArtifactStore>,
        contracts: Arc<dyn ContractFetcher>,
        config: &AppConfig,
    ) -> Self {
        let settings = config.pipeline.clone();
        let registry = ReducerRegistry::for_schema::<FileField>()
            .with_policy(FileField::Notes, MergePolicy::AppendCapped(settings.notes_cap));
        Self {
            provider,
            store,
            contracts,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            request_timeout: config.provider.request_timeout(),
            limits: config.limits.clone(),
            filters: BoundaryFilters::new(settings.handoff_max_chars),
            registry: Arc::new(registry),
            settings,
            observer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TurnObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Share a cancellation token with every loop the pipeline runs.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    // ── Planning ──────────────────────────────────────────────

    /// Turn a request into a validated plan stored under `plans/<build_id>`.
    pub async fn plan(&self, request: &str, build_id: &str) -> Result<PlanResult, PipelineError> {
        let dispatcher = ActionDispatcher::new()
            .with(FetchContractAction::new(self.contracts.clone()))
            .with(NoteAction)
            .with(self.submit(ArtifactKind::Plan, build_id, build_id));

        let outcome = self
            .agent(PipelineRole::Planner, format!("Build id: {build_id}"), dispatcher)
            .run(format!("Plan the following build.\n\n{request}"))
            .await
            .map_err(|source| PipelineError::from_loop(PipelineRole::Planner, None, source))?;

        let plan = contracts::parse_plan(outcome.artifact.document())?;
        info!(
            build_id,
            phases = plan.phases.len(),
            files = plan.files().count(),
            iterations = outcome.iterations,
            "Plan accepted"
        );
        Ok(PlanResult {
            plan,
            usage: outcome.usage,
            iterations: outcome.iterations,
        })
    }

    // ── Standalone audit ──────────────────────────────────────

    /// Audit a plan or generated-file record outside of a build.
    ///
    /// The document is validated first; an invalid one is never sent to
    /// the auditor.
    pub async fn audit_artifact(
        &self,
        build_id: &str,
        kind: ArtifactKind,
        document: &Value,
    ) -> Result<AuditResult, PipelineError> {
        let errors = contracts::validate(kind, document);
        if !errors.is_empty() {
            return Err(PipelineError::InvalidContract { kind, errors });
        }

        let mut subject = document.clone();
        contracts::strip_metadata(&mut subject);
        let name = match kind {
            ArtifactKind::GeneratedFile => subject["path"].as_str().unwrap_or("file").to_string(),
            other => other.to_string(),
        };

        let mut instruction = format!(
            "Audit this {kind} against its acceptance criteria and the governance contracts.\n\n\
             ```json\n{}\n```",
            pretty(&subject)
        );
        if kind == ArtifactKind::GeneratedFile {
            let criteria = self.criteria_for(build_id, &name).await?;
            if !criteria.is_empty() {
                instruction.push_str(&format!(
                    "\n\n## Acceptance criteria\n```json\n{}\n```",
                    pretty(&criteria)
                ));
            }
        }

        let key = artifact_key(build_id, &name, "review");
        let dispatcher = ActionDispatcher::new()
            .with(FetchContractAction::new(self.contracts.clone()))
            .with(NoteAction)
            .with(self.submit(ArtifactKind::AuditVerdict, build_id, &key));

        let outcome = self
            .agent(
                PipelineRole::Auditor,
                format!("Build id: {build_id}\nArtifact: {kind}\nSubject: {name}"),
                dispatcher,
            )
            .run(instruction)
            .await
            .map_err(|source| {
                PipelineError::from_loop(PipelineRole::Auditor, Some(name.clone()), source)
            })?;

        let verdict = contracts::parse_verdict(outcome.artifact.document())?;
        info!(build_id, subject = %name, status = verdict.status.as_str(), "Audit complete");
        Ok(AuditResult {
            verdict,
            usage: outcome.usage,
            iterations: outcome.iterations,
        })
    }

    /// Acceptance criteria of the phase that plans `path`, if a plan exists.
    async fn criteria_for(&self, build_id: &str, path: &str) -> Result<Vec<AcceptanceCriterion>, PipelineError> {
        let Some(document) = self.store.fetch(ArtifactKind::Plan.collection(), build_id).await? else {
            return Ok(Vec::new());
        };
        let plan = contracts::parse_plan(&document)?;
        Ok(plan
            .phases
            .into_iter()
            .find(|phase| phase.file_manifest.iter().any(|f| f.path == path))
            .map(|phase| phase.acceptance_criteria)
            .unwrap_or_default())
    }

    // ── Build ─────────────────────────────────────────────────

    /// Build every file of the stored plan for `build_id`.
    pub async fn build(&self, build_id: &str) -> Result<BuildReport, PipelineError> {
        let started_at = Utc::now();
        let plans = ArtifactKind::Plan.collection();
        let mut plan_doc = self
            .store
            .fetch(plans, build_id)
            .await?
            .ok_or_else(|| PipelineError::PlanNotFound(build_id.to_string()))?;
        let plan = contracts::parse_plan(&plan_doc)?;

        info!(build_id, tiers = plan.phases.len(), files = plan.files().count(), "Starting build");

        let mut lessons = LessonsState::new(self.settings.lessons_cap);
        let mut tiers = Vec::with_capacity(plan.phases.len());
        let mut files = Vec::new();
        let mut usage = UsageTotals::default();

        for (index, phase) in plan.phases.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Interrupted);
            }
            info!(build_id, tier = %phase.name, files = phase.file_manifest.len(), "Starting tier");
            let reports = self.build_tier(build_id, &plan, phase, lessons.lessons()).await?;
            let summary = fold_tier(&mut lessons, &phase.name, &reports);
            info!(
                build_id,
                tier = %phase.name,
                passed = summary.passed,
                needs_review = summary.needs_review,
                "Tier finished"
            );

            if let Some(stored) = plan_doc.get_mut("phases").and_then(|p| p.get_mut(index)) {
                stored["status"] = json!(PhaseStatus::Complete);
                self.store.store(plans, build_id, plan_doc.clone()).await?;
            }

            for report in &reports {
                usage.merge(&report.usage);
            }
            tiers.push(TierReport {
                name: phase.name.clone(),
                summary,
            });
            files.extend(reports);
        }

        let status = if files.iter().all(|f| f.status == FileStatus::Passed) {
            BuildStatus::Passed
        } else {
            BuildStatus::NeedsReview
        };
        let report = BuildReport {
            build_id: build_id.to_string(),
            status,
            tiers,
            files,
            usage,
            lessons: lessons.lessons(),
            started_at,
            finished_at: Utc::now(),
        };
        self.store
            .store(REPORTS_COLLECTION, build_id, serde_json::to_value(&report)?)
            .await?;

        info!(
            build_id,
            status = ?report.status,
            input_tokens = report.usage.input_tokens,
            output_tokens = report.usage.output_tokens,
            "Build finished"
        );
        Ok(report)
    }

    /// Load a previously persisted build report.
    pub async fn report(&self, build_id: &str) -> Result<BuildReport, PipelineError> {
        let document = self
            .store
            .fetch(REPORTS_COLLECTION, build_id)
            .await?
            .ok_or_else(|| PipelineError::ReportNotFound(build_id.to_string()))?;
        Ok(serde_json::from_value(document)?)
    }

    /// Build one tier's files concurrently. Reports come back in manifest
    /// order. The first fatal error aborts the rest of the tier.
    async fn build_tier(
        &self,
        build_id: &str,
        plan: &BuildPlan,
        phase: &Phase,
        lessons: Vec<String>,
    ) -> Result<Vec<FileReport>, PipelineError> {
        let permits = Arc::new(Semaphore::new(self.settings.max_parallel_files.max(1)));
        let mut tasks = JoinSet::new();

        for (index, entry) in phase.file_manifest.iter().enumerate() {
            let job = FileJob {
                build_id: build_id.to_string(),
                phase: phase.name.clone(),
                entry: entry.clone(),
                stack: plan.stack.clone(),
                criteria: phase.acceptance_criteria.clone(),
                lessons: lessons.clone(),
            };
            let pipeline = self.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => pipeline.build_file(job).await,
                    Err(e) => Err(PipelineError::Task(e.to_string())),
                };
                (index, result)
            });
        }

        let mut reports = Vec::with_capacity(phase.file_manifest.len());
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|e| PipelineError::Task(e.to_string()))?;
            reports.push((index, result?));
        }
        reports.sort_by_key(|(index, _)| *index);
        Ok(reports.into_iter().map(|(_, report)| report).collect())
    }

    // ── One file ──────────────────────────────────────────────

    async fn build_file(&self, job: FileJob) -> Result<FileReport, PipelineError> {
        let path = job.entry.path.clone();
        let mut run = FileRun::new(&job, self.registry.clone());
        info!(file = %path, tier = %job.phase, "Building file");

        // Generate
        let key = artifact_key(&job.build_id, &path, "generate");
        let dispatcher = self
            .file_actions(&run.state, &BUILDER_SCOPE)
            .with(self.submit(ArtifactKind::GeneratedFile, &job.build_id, &key).expecting_path(&path));
        let instruction = format!(
            "Write `{path}`: {}\n\nRead your build state first, then submit the complete file.",
            job.entry.purpose
        );
        let builder = self.agent(PipelineRole::Builder, file_context(&job), dispatcher);
        let generated = match self.run_stage(PipelineRole::Builder, &path, &builder, instruction).await? {
            Ok(outcome) => outcome,
            Err(e) => return Ok(run.abandon(PipelineRole::Builder, &e)),
        };
        run.accept_file("generate", &generated)?;
        run.state.set(FileField::Status, FileStatus::Generated.as_value());

        // Audit
        let bundle = self.file_bundle(&run.state, &generated);
        let Some((mut verdict, mut auditor_outcome)) = self
            .audit_file(&job, &mut run, &self.filters.generate_to_audit, bundle, 0)
            .await?
        else {
            return Ok(run.finish(FileStatus::NeedsReview));
        };

        // Fix rounds
        while !verdict.passed() && run.fix_rounds < self.settings.max_fix_rounds {
            let round = run.fix_rounds + 1;
            let checkpoint = run.state.snapshot();

            let bundle = (self.filters.audit_to_fix)(HandoffBundle {
                shared_state: run.state.view(&FIXER_SCOPE),
                raw_output: output_map(auditor_outcome.artifact.document(), &[]),
                action_log: auditor_outcome.history.action_calls().cloned().collect(),
                narration: auditor_outcome.history.last_narration().unwrap_or_default().to_string(),
            });

            let stage = format!("fix{round}");
            let key = artifact_key(&job.build_id, &path, &stage);
            let dispatcher = self
                .file_actions(&run.state, &FIXER_SCOPE)
                .with(self.submit(ArtifactKind::GeneratedFile, &job.build_id, &key).expecting_path(&path));
            let instruction = format!(
                "The audit of `{path}` failed (fix round {round} of {}). Correct every finding.\n\n{}",
                self.settings.max_fix_rounds,
                render_bundle(&bundle)
            );
            let fixer = self.agent(PipelineRole::Fixer, file_context(&job), dispatcher);
            let fixed = match self.run_stage(PipelineRole::Fixer, &path, &fixer, instruction).await? {
                Ok(outcome) => outcome,
                Err(e) => {
                    run.record_failure(PipelineRole::Fixer, &e);
                    run.state.restore(checkpoint);
                    break;
                }
            };

            run.fix_rounds = round;
            run.accept_file(&stage, &fixed)?;
            run.state.apply_update(update([
                (
                    FileField::FixHistory,
                    json!([{
                        "round": round,
                        "addressed": verdict.findings.len(),
                        "artifact": fixed.artifact.key(),
                    }]),
                ),
                (FileField::FixRounds, json!(round)),
            ]));

            let bundle = self.file_bundle(&run.state, &fixed);
            match self
                .audit_file(&job, &mut run, &self.filters.fix_to_audit, bundle, round)
                .await?
            {
                Some((next_verdict, next_outcome)) => {
                    verdict = next_verdict;
                    auditor_outcome = next_outcome;
                }
                None => break,
            }
        }

        let status = if verdict.passed() {
            FileStatus::Passed
        } else {
            FileStatus::NeedsReview
        };
        Ok(run.finish(status))
    }

    /// Run one audit of the file's current content. `None` when the audit
    /// loop failed without aborting the build.
    async fn audit_file(
        &self,
        job: &FileJob,
        run: &mut FileRun,
        filter: &HandoffFilter,
        bundle: HandoffBundle,
        round: u32,
    ) -> Result<Option<(AuditVerdict, LoopOutcome)>, PipelineError> {
        let path = &job.entry.path;
        let stage = format!("audit{round}");
        let bundle = filter(bundle);

        let key = artifact_key(&job.build_id, path, &stage);
        let dispatcher = ActionDispatcher::new()
            .with(FetchContractAction::new(self.contracts.clone()))
            .with(NoteAction)
            .with(ReadStateAction::new(run.state.view(&AUDITOR_SCOPE)))
            .with(self.submit(ArtifactKind::AuditVerdict, &job.build_id, &key));
        let instruction = format!("Audit the generated file `{path}`.\n\n{}", render_bundle(&bundle));
        let auditor = self.agent(PipelineRole::Auditor, file_context(job), dispatcher);

        let outcome = match self.run_stage(PipelineRole::Auditor, path, &auditor, instruction).await? {
            Ok(outcome) => outcome,
            Err(e) => {
                run.record_failure(PipelineRole::Auditor, &e);
                return Ok(None);
            }
        };

        let verdict = contracts::parse_verdict(outcome.artifact.document())?;
        run.record_stage(&stage, &outcome);
        run.last_findings = verdict.findings.clone();
        let findings = serde_json::to_value(&verdict.findings)?;
        run.state.apply_update(update([
            (FileField::AuditStatus, json!(verdict.status)),
            (FileField::Findings, findings.clone()),
            (FileField::FindingHistory, findings),
        ]));
        info!(
            file = %path,
            round,
            status = verdict.status.as_str(),
            findings = verdict.findings.len(),
            "Audit verdict"
        );
        Ok(Some((verdict, outcome)))
    }

    /// Run a loop, keeping file-local failures and surfacing fatal ones.
    async fn run_stage(
        &self,
        role: PipelineRole,
        path: &str,
        agent: &AgentLoop,
        instruction: String,
    ) -> Result<Result<LoopOutcome, LoopError>, PipelineError> {
        match agent.run(instruction).await {
            Err(source) if source.aborts_pipeline() => {
                Err(PipelineError::from_loop(role, Some(path.to_string()), source))
            }
            other => Ok(other),
        }
    }

    /// Context handed from a file-producing stage to the auditor.
    fn file_bundle(&self, state: &StateManager, outcome: &LoopOutcome) -> HandoffBundle {
        HandoffBundle {
            shared_state: state.view(&AUDITOR_SCOPE),
            // Content already reaches the auditor through its view.
            raw_output: output_map(outcome.artifact.document(), &["content"]),
            action_log: outcome.history.action_calls().cloned().collect(),
            narration: outcome.history.last_narration().unwrap_or_default().to_string(),
        }
    }

    // ── Loop construction ─────────────────────────────────────

    fn agent(&self, role: PipelineRole, context: String, dispatcher: ActionDispatcher) -> AgentLoop {
        let agent = AgentLoop::new(
            self.provider.clone(),
            self.model.clone(),
            role.system_prompt(context),
            dispatcher,
        )
        .with_role(role.as_str())
        .with_temperature(self.temperature)
        .with_max_tokens(self.max_tokens)
        .with_max_iterations(role.ceiling(&self.limits))
        .with_max_consecutive_corrections(self.limits.max_consecutive_corrections)
        .with_request_timeout(self.request_timeout)
        .with_cancellation(self.cancel.clone());
        match &self.observer {
            Some(observer) => agent.with_observer(observer.clone()),
            None => agent,
        }
    }

    fn submit(&self, kind: ArtifactKind, build_id: &str, key: &str) -> SubmitArtifactAction {
        SubmitArtifactAction::new(kind, self.store.clone(), key)
            .with_model(self.model.clone())
            .with_build_id(build_id)
    }

    /// Non-terminal actions of a file-producing role.
    fn file_actions(&self, state: &StateManager, scope: &RoleScope<FileField>) -> ActionDispatcher {
        ActionDispatcher::new()
            .with(FetchContractAction::new(self.contracts.clone()))
            .with(NoteAction)
            .with(ReadStateAction::new(state.view(scope)))
    }
}

/// Per-file bookkeeping alongside the file's state.
struct FileRun {
    path: String,
    state: StateManager,
    usage: UsageTotals,
    iterations: usize,
    fix_rounds: u32,
    latest_file: Option<String>,
    last_findings: Vec<Finding>,
    error: Option<String>,
}

impl FileRun {
    fn new(job: &FileJob, registry: Arc<ReducerRegistry>) -> Self {
        let state = StateManager::new(
            registry,
            update([
                (FileField::FilePath, json!(job.entry.path)),
                (FileField::Phase, json!(job.phase)),
                (FileField::FileSpec, json!(job.entry)),
                (FileField::Stack, json!(job.stack)),
                (FileField::AcceptanceCriteria, json!(job.criteria)),
                (FileField::Lessons, json!(job.lessons)),
                (FileField::Status, FileStatus::Pending.as_value()),
            ]),
        );
        Self {
            path: job.entry.path.clone(),
            state,
            usage: UsageTotals::default(),
            iterations: 0,
            fix_rounds: 0,
            latest_file: None,
            last_findings: Vec::new(),
            error: None,
        }
    }

    fn record_stage(&mut self, stage: &str, outcome: &LoopOutcome) {
        self.usage.merge(&outcome.usage);
        self.iterations += outcome.iterations;
        self.state.apply_update(update([
            (FileField::StageOutputs, json!({ stage: outcome.artifact.key() })),
            (FileField::StageUsage, json!({ stage: outcome.usage })),
        ]));
    }

    /// Take an accepted file record as the file's current content.
    fn accept_file(&mut self, stage: &str, outcome: &LoopOutcome) -> Result<(), PipelineError> {
        let record = contracts::parse_file_record(outcome.artifact.document())?;
        self.record_stage(stage, outcome);
        self.latest_file = Some(outcome.artifact.key().to_string());
        self.state.apply_update(update([
            (FileField::GeneratedContent, json!(record.content)),
            (FileField::Notes, json!(record.notes)),
        ]));
        Ok(())
    }

    fn record_failure(&mut self, role: PipelineRole, err: &LoopError) {
        warn!(file = %self.path, %role, error = %err, "Stage failed, file needs review");
        self.iterations += err.iterations();
        self.error = Some(format!("{role}: {err}"));
    }

    fn abandon(mut self, role: PipelineRole, err: &LoopError) -> FileReport {
        self.record_failure(role, err);
        self.finish(FileStatus::NeedsReview)
    }

    fn finish(mut self, status: FileStatus) -> FileReport {
        self.state.set(FileField::Status, status.as_value());
        let view = self.state.view(&REPORTER_SCOPE);
        let summary: FileBuildState = serde_json::from_value(Value::Object(view)).unwrap_or_default();

        let mut seen = BTreeSet::new();
        let lessons = summary
            .finding_history
            .iter()
            .filter_map(|finding| lesson(&self.path, finding))
            .filter(|lesson| seen.insert(lesson.clone()))
            .collect();

        info!(file = %self.path, ?status, fix_rounds = summary.fix_rounds, "File finished");
        FileReport {
            path: self.path,
            phase: summary.phase,
            status,
            audit_status: summary.audit_status,
            findings: self.last_findings,
            fix_rounds: summary.fix_rounds,
            iterations: self.iterations,
            usage: self.usage,
            artifact_key: self.latest_file,
            stage_outputs: summary.stage_outputs,
            lessons,
            notes: summary.notes,
            error: self.error,
        }
    }
}

/// `"<path>: [<rule>] <message>"` for a finding value.
fn lesson(path: &str, finding: &Value) -> Option<String> {
    let rule = finding["rule"].as_str()?;
    let message = finding["message"].as_str()?;
    Some(format!("{path}: [{rule}] {message}"))
}

/// Fold a finished tier into the lessons state, serially.
fn fold_tier(lessons: &mut LessonsState, tier: &str, reports: &[FileReport]) -> TierSummary {
    let summary = TierSummary {
        files: reports.len(),
        passed: reports.iter().filter(|r| r.status == FileStatus::Passed).count(),
        needs_review: reports.iter().filter(|r| r.status == FileStatus::NeedsReview).count(),
        fix_rounds: reports.iter().map(|r| r.fix_rounds).sum(),
    };
    let completed: Vec<String> = reports.iter().map(|r| r.path.clone()).collect();

    lessons.record_lessons(reports.iter().flat_map(|r| r.lessons.iter().cloned()));
    lessons.record_tier(tier, &summary, &completed);
    for report in reports {
        lessons.annotate(&report.path, json!(report.status));
    }
    summary
}

fn file_context(job: &FileJob) -> String {
    format!(
        "Build id: {}\nTier: {}\nFile: {}",
        job.build_id, job.phase, job.entry.path
    )
}

/// A stage's document as a map, without metadata or the `drop`ped keys.
fn output_map(document: &Value, drop: &[&str]) -> StateMap {
    let mut map = document.as_object().cloned().unwrap_or_default();
    map.remove(contracts::METADATA_FIELD);
    for key in drop {
        map.remove(*key);
    }
    map
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

/// Render a filtered bundle as instruction text. Empty parts are skipped.
fn render_bundle(bundle: &HandoffBundle) -> String {
    let mut sections = Vec::new();
    if !bundle.shared_state.is_empty() {
        sections.push(format!("## Build state\n```json\n{}\n```", pretty(&bundle.shared_state)));
    }
    if !bundle.raw_output.is_empty() {
        sections.push(format!("## Previous stage output\n```json\n{}\n```", pretty(&bundle.raw_output)));
    }
    if !bundle.action_log.is_empty() {
        let names: Vec<_> = bundle.action_log.iter().map(|c| c.name.as_str()).collect();
        sections.push(format!("## Actions taken\n{}", names.join(", ")));
    }
    if !bundle.narration.trim().is_empty() {
        sections.push(format!("## Previous stage notes\n{}", bundle.narration));
    }
    sections.join("\n\n")
}
