// crates/pipeline/src/pipeline.rs
//! The pipeline facade: one explicit value owning the store, state
//! manager, bus, governor, producer registry, and scheduler.
//!
//! All mutation funnels through `&mut self` methods, which makes the
//! documented single-writer model a compile-time property. Suspension
//! points are method boundaries: between two calls no caller observes
//! intermediate state, and queued events are dispatched cooperatively at
//! the end of each mutating call.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use redline_core::{
    cluster_changes, AutoGrouper, BatchDecision, ChangeProposal, ClusterSet, ClusterUpdateQueue,
    ConsolidationBudget, IncomingChange, PartialReview, PendingEntry, Resolution,
    ResolutionContext, Resolver, ResourceGovernor, Validator,
};
use redline_state::{AuditRecord, MemoryCache, MigrationRegistry, SessionBody, StateManager};
use redline_store::{ChangeStore, CsvOptions, ExportFormat, QueryBuilder, QueryCache, StatsOverview};
use redline_types::{
    AuditAction, AuditEntry, Change, ChangeGroup, ChangeId, ChangeStatus, ConflictResolution,
    ConsolidationError, ErrorCode, GroupId, GroupStatus, MemoryPressure, Outcome, PipelineConfig,
    PipelineError, PipelineEvent, ProducerPolicy, SemanticContext, Session, SessionId, Topic,
};

use crate::bus::{EventBus, Subscription};
use crate::clock::{Clock, SystemClock};
use crate::producer::{AuthContext, ProducerManifest, ProducerRegistry};
use crate::scheduler::{CancellationToken, Scheduler, Task};
use crate::submit::{
    SubmissionError, SubmissionRequest, SubmissionResult, SubmissionWarning, ValidationMode,
    ValidationSummary,
};

/// Submission settings remembered per admitted change so later
/// consolidations can weigh existing pending changes fairly.
#[derive(Debug, Clone)]
struct ChangeSettings {
    priority: u8,
    resolution: ConflictResolution,
    semantic: Option<SemanticContext>,
}

pub struct Pipeline {
    config: PipelineConfig,
    clock: Box<dyn Clock>,
    store: ChangeStore,
    state: Option<StateManager>,
    bus: EventBus,
    governor: ResourceGovernor,
    producers: ProducerRegistry,
    scheduler: Scheduler,
    sessions: HashMap<SessionId, Session>,
    batches: HashMap<GroupId, ChangeGroup>,
    settings: HashMap<ChangeId, ChangeSettings>,
    submissions_seen: HashMap<redline_types::SubmissionId, SubmissionResult>,
    clusters: HashMap<SessionId, ClusterSet>,
    cluster_queues: HashMap<SessionId, ClusterUpdateQueue>,
    query_cache: QueryCache,
    memory: MemoryCache,
    migrations: MigrationRegistry,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("changes", &self.store.len())
            .field("sessions", &self.sessions.len())
            .field("batches", &self.batches.len())
            .field("producers", &self.producers.len())
            .finish()
    }
}

impl Pipeline {
    /// In-memory pipeline (no persistence); mostly for tests and
    /// embedding hosts that persist elsewhere.
    pub fn in_memory(config: PipelineConfig) -> Self {
        Self::build(config, None, Box::new(SystemClock))
    }

    /// Pipeline persisting to `state`.
    pub fn with_state(config: PipelineConfig, state: StateManager) -> Self {
        Self::build(config, Some(state), Box::new(SystemClock))
    }

    /// Full control over persistence and time (tests).
    pub fn with_parts(
        config: PipelineConfig,
        state: Option<StateManager>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self::build(config, state, clock)
    }

    fn build(config: PipelineConfig, state: Option<StateManager>, clock: Box<dyn Clock>) -> Self {
        let governor = ResourceGovernor::new(config.governor.clone());
        let query_cache = QueryCache::new(config.query.cache_ttl_ms);
        let memory = MemoryCache::new(
            config.memory.clone(),
            config.persistence.compression_threshold_bytes,
        );
        let mut pipeline = Self {
            governor,
            query_cache,
            memory,
            clock,
            store: ChangeStore::new(),
            state,
            bus: EventBus::new(),
            producers: ProducerRegistry::new(),
            scheduler: Scheduler::new(),
            sessions: HashMap::new(),
            batches: HashMap::new(),
            settings: HashMap::new(),
            submissions_seen: HashMap::new(),
            clusters: HashMap::new(),
            cluster_queues: HashMap::new(),
            migrations: MigrationRegistry::builtin(),
            config,
        };
        let now = pipeline.clock.now();
        pipeline.scheduler.schedule(
            Task::SnapshotTick,
            now + Duration::milliseconds(pipeline.config.persistence.snapshot_interval_ms as i64),
        );
        pipeline
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &ChangeStore {
        &self.store
    }

    pub fn session(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn batch(&self, id: GroupId) -> Option<&ChangeGroup> {
        self.batches.get(&id)
    }

    pub fn clusters_for(&self, session: SessionId) -> Option<&ClusterSet> {
        self.clusters.get(&session)
    }

    pub fn stats(&self) -> StatsOverview {
        StatsOverview::of(&self.store)
    }

    // -----------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------

    /// Start (or resume) the session bound to `document_key`.
    pub fn start_session(&mut self, document_key: &str) -> Result<SessionId, PipelineError> {
        if let Some(state) = &self.state {
            if let Some(existing) = state.session_for_document(document_key) {
                if self.sessions.contains_key(&existing) {
                    return Ok(existing);
                }
            }
        }
        let now = self.clock.now();
        let session = Session::new(document_key, now);
        let session_id = session.id;
        info!(session = %session_id, document_key, "session started");
        self.sessions.insert(session_id, session);
        if let Some(state) = &self.state {
            state.bind_document(document_key, session_id)?;
        }
        self.persist_session(session_id)?;
        self.bus.publish(PipelineEvent::SessionStarted {
            session_id,
            document_key: document_key.to_string(),
            at: now,
        });
        self.bus.dispatch();
        Ok(session_id)
    }

    /// Close a session; it becomes an immutable snapshot.
    pub fn end_session(&mut self, session_id: SessionId) -> Result<(), PipelineError> {
        let now = self.clock.now();
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(PipelineError::InternalInvariantViolation {
                message: format!("unknown session {session_id}"),
            })?;
        session.close(now);
        self.persist_session(session_id)?;
        self.bus
            .publish(PipelineEvent::SessionEnded { session_id, at: now });
        self.bus.dispatch();
        Ok(())
    }

    /// Reload every recoverable session from disk (startup).
    pub fn recover_sessions(&mut self) -> usize {
        let Some(state) = &self.state else {
            return 0;
        };
        let recovered = state.recover_all();
        let mut restored = 0;
        for item in recovered {
            let Some(body) = item.body else { continue };
            let session_id = body.session_id();
            for change in &body.changes {
                if let Err(e) = self.store.insert(change.clone()) {
                    warn!(session = %session_id, error = %e, "skipped duplicate change during recovery");
                }
            }
            for batch in &body.batches {
                self.batches.insert(batch.group_id, batch.clone());
            }
            self.sessions.insert(session_id, body.session);
            restored += 1;
        }
        info!(restored, "sessions recovered");
        restored
    }

    // -----------------------------------------------------------------
    // Producers
    // -----------------------------------------------------------------

    pub fn register_producer(
        &mut self,
        manifest: ProducerManifest,
        policy: ProducerPolicy,
    ) -> Result<AuthContext, PipelineError> {
        Ok(self.producers.register(manifest, policy)?)
    }

    pub fn producers_mut(&mut self) -> &mut ProducerRegistry {
        &mut self.producers
    }

    pub fn governor_mut(&mut self) -> &mut ResourceGovernor {
        &mut self.governor
    }

    // -----------------------------------------------------------------
    // Submission
    // -----------------------------------------------------------------

    pub fn submit(&mut self, request: SubmissionRequest) -> Result<SubmissionResult, PipelineError> {
        self.submit_with_token(request, &CancellationToken::new())
    }

    /// The full submission path. Suspension points: before validation,
    /// after validation / before consolidation — the token is checked at
    /// each and cancellation leaves no persistent effect.
    pub fn submit_with_token(
        &mut self,
        request: SubmissionRequest,
        token: &CancellationToken,
    ) -> Result<SubmissionResult, PipelineError> {
        // Idempotency: a repeated submission returns its recorded result.
        if let Some(previous) = self.submissions_seen.get(&request.submission_id) {
            debug!(submission = %request.submission_id, "idempotent replay");
            return Ok(previous.clone());
        }
        let now = self.clock.now();
        let total = request.proposals.len();

        let mut summary = ValidationSummary {
            total,
            provider: request.attribution.as_ref().map(|a| a.provider.clone()),
            model: request.attribution.as_ref().map(|a| a.model.clone()),
            validation_mode: if request.auth.is_some() {
                ValidationMode::EditorialEngine
            } else {
                ValidationMode::Standard
            },
            security_checks_enabled: !request.options.bypass_validation,
        };

        // Producer credential, when one is presented.
        if let Some(auth) = &request.auth {
            if let Err(e) = self.producers.verify(auth) {
                self.bus.publish(PipelineEvent::PolicyViolation {
                    producer: request.source.clone(),
                    rule: "invalid credential".into(),
                    at: now,
                });
                self.bus.dispatch();
                // Not recorded for idempotency: re-registering and
                // retrying the same submission id must be allowed.
                return Ok(failed_result(summary, ErrorCode::Unauthorized, e.to_string()));
            }
        }

        // Admission control; trusted internal callers may force past it.
        let admission = if request.options.force_processing {
            redline_core::Admission::Admitted
        } else {
            self.governor.admit(&request.source, now)
        };
        match admission {
            redline_core::Admission::Admitted => {}
            redline_core::Admission::Denied { backoff_ms } => {
                self.bus.publish(PipelineEvent::Throttled {
                    producer: request.source.clone(),
                    backoff_ms,
                    at: now,
                });
                self.scheduler.schedule(
                    Task::BackoffExpiry {
                        producer: request.source.clone(),
                    },
                    now + Duration::milliseconds(backoff_ms as i64),
                );
                self.bus.dispatch();
                // Throttling is transient; the producer retries the same
                // submission id after the backoff.
                let error = self.governor.denial_error(&request.source, backoff_ms);
                return Ok(failed_result(
                    summary,
                    ErrorCode::RateLimitExceeded,
                    error.to_string(),
                ));
            }
        }

        if token.is_cancelled() {
            return self.cancelled("submit", token, now);
        }

        // Session resolution.
        let session_id = match request.options.session_id {
            Some(id) if self.sessions.contains_key(&id) => id,
            Some(id) => {
                return Ok(failed_result(
                    summary,
                    ErrorCode::UnknownId,
                    format!("unknown session {id}"),
                ))
            }
            None if request.options.create_session => {
                let key = request
                    .options
                    .document_key
                    .clone()
                    .unwrap_or_else(|| "untitled".to_string());
                self.start_session(&key)?
            }
            None => {
                return Ok(failed_result(
                    summary,
                    ErrorCode::SchemaInvalid,
                    "no session given and create_session is off",
                ))
            }
        };

        // Validation.
        let policy = request
            .auth
            .as_ref()
            .and_then(|auth| self.producers.policy(&auth.plugin_id))
            .cloned()
            .unwrap_or_default();
        let mut errors: Vec<SubmissionError> = Vec::new();
        let mut warnings: Vec<SubmissionWarning> = Vec::new();

        let (accepted, attribution) = if request.options.bypass_validation {
            (request.proposals.clone(), request.attribution.clone())
        } else {
            let report = Validator::new(policy).validate(
                request.proposals.clone(),
                request.attribution.clone(),
            );
            for violation in &report.violations {
                errors.push(SubmissionError::new(
                    violation.change_id,
                    violation.error.code(),
                    violation.error.to_string(),
                ));
                if violation.error.code() == ErrorCode::PolicyViolation {
                    self.bus.publish(PipelineEvent::PolicyViolation {
                        producer: request.source.clone(),
                        rule: violation.error.to_string(),
                        at: now,
                    });
                }
            }
            for warning in &report.warnings {
                warnings.push(SubmissionWarning {
                    change_id: warning.change_id,
                    message: warning.message.clone(),
                });
            }
            for redaction in &report.redactions {
                if let Some(change_id) = redaction.change_id {
                    self.bus.publish(PipelineEvent::SensitiveDataDetected {
                        producer: request.source.clone(),
                        change_id,
                        rule: redaction.rule.clone(),
                        at: now,
                    });
                }
            }
            (report.accepted, report.attribution)
        };
        let attribution = match (attribution, &request.options.conversation_context) {
            (Some(mut attribution), Some(conversation)) => {
                if attribution.conversation_id.is_none() {
                    attribution.conversation_id = Some(conversation.clone());
                }
                Some(attribution)
            }
            (attribution, _) => attribution,
        };
        summary.provider = attribution.as_ref().map(|a| a.provider.clone());
        summary.model = attribution.as_ref().map(|a| a.model.clone());

        if token.is_cancelled() {
            return self.cancelled("submit", token, now);
        }

        // Consolidation + admission, strictly in submission order.
        let budget_ms = request
            .options
            .consolidation_timeout_ms
            .unwrap_or(self.config.consolidation.timeout_ms);
        let budget = ConsolidationBudget::new(now, budget_ms);
        let ctx = ResolutionContext {
            document: request.options.document_text.clone(),
        };

        let mut admitted_ids: Vec<ChangeId> = Vec::new();
        let mut redacted_ids: Vec<ChangeId> = Vec::new();
        for warning in &warnings {
            if warning.message.contains("redacted") {
                if let Some(id) = warning.change_id {
                    redacted_ids.push(id);
                }
            }
        }

        for proposal in accepted {
            let change_id = self.admit_one(
                proposal,
                session_id,
                &request,
                attribution.clone(),
                &ctx,
                budget,
                &redacted_ids,
                &mut warnings,
            )?;
            if let Some(change_id) = change_id {
                admitted_ids.push(change_id);
            }
        }

        // Batch grouping of this submission's admitted changes.
        let mut group_ids: Vec<GroupId> = Vec::new();
        if request.options.group_changes && !admitted_ids.is_empty() {
            group_ids = self.group_submission(session_id, &admitted_ids, &request)?;
        }

        self.persist_session(session_id)?;
        let success = errors.is_empty() || !admitted_ids.is_empty();
        let result = SubmissionResult {
            success,
            session_id: Some(session_id),
            change_ids: admitted_ids,
            errors,
            warnings,
            change_group_id: group_ids.first().copied(),
            group_ids,
            validation_summary: summary,
        };
        let result = self.record_submission(request.submission_id, result);
        self.bus.dispatch();
        Ok(result)
    }

    /// Admit one validated proposal through consolidation. Returns the
    /// id that ended up live (merged id for merges), or `None` when the
    /// change was deferred or superseded on arrival.
    #[allow(clippy::too_many_arguments)]
    fn admit_one(
        &mut self,
        proposal: ChangeProposal,
        session_id: SessionId,
        request: &SubmissionRequest,
        attribution: Option<redline_types::Attribution>,
        ctx: &ResolutionContext,
        budget: ConsolidationBudget,
        redacted_ids: &[ChangeId],
        warnings: &mut Vec<SubmissionWarning>,
    ) -> Result<Option<ChangeId>, PipelineError> {
        let now = self.clock.now();
        let mut change = Change::new(
            session_id,
            proposal.kind,
            proposal.position,
            proposal.content,
            proposal.category,
            request.source.clone(),
            proposal.confidence,
            now,
        );
        if let Some(id) = proposal.id {
            change.id = id;
        }
        if let Some(attribution) = attribution {
            change.attribution = Some(attribution);
        }
        let was_redacted = redacted_ids.contains(&change.id);
        let submitted_reason = warnings
            .iter()
            .find(|w| w.change_id == Some(change.id))
            .map(|w| w.message.clone());
        let mut entry = AuditEntry::new(request.source.clone(), AuditAction::Submitted, now);
        if let Some(reason) = submitted_reason {
            entry = entry.with_reason(reason);
        }
        change.audit.push(entry);
        if was_redacted {
            change.audit.push(
                AuditEntry::new("sanitizer", AuditAction::Redacted, now)
                    .with_reason("sensitive content replaced"),
            );
        }
        let change_id = change.id;

        let incoming = IncomingChange {
            change,
            priority: request.options.priority.clamp(1, 5),
            automated: request.options.automated,
            resolution: request.options.conflict_resolution.clone(),
            semantic: request.options.semantic_context.clone(),
        };

        // Pending conflict set, with the settings each arrived under.
        // Declared-compatible producers never conflict.
        let pending: Vec<PendingEntry> = if request.options.enable_consolidation {
            self.store
                .pending_in_session(&session_id)
                .into_iter()
                .filter(|existing| {
                    !request.options.compatible_plugins.contains(&existing.source)
                })
                .map(|existing| {
                    let settings = self.settings.get(&existing.id);
                    PendingEntry {
                        change: existing.clone(),
                        priority: settings.map(|s| s.priority).unwrap_or(3),
                        resolution: settings
                            .map(|s| s.resolution.clone())
                            .unwrap_or_default(),
                        semantic: settings.and_then(|s| s.semantic.clone()),
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        let conflicts = Resolver::conflicts(&incoming, &pending);
        let resolved = Resolver::resolve(&incoming, &conflicts, ctx, budget, self.clock.now());

        for warning in &resolved.warnings {
            warnings.push(SubmissionWarning {
                change_id: Some(change_id),
                message: warning.to_string(),
            });
        }

        self.bus.publish(PipelineEvent::ChangeSubmitted {
            session_id,
            submission_id: request.submission_id,
            change_id,
            at: now,
        });

        let settings = ChangeSettings {
            priority: incoming.priority,
            resolution: incoming.resolution.clone(),
            semantic: incoming.semantic.clone(),
        };

        match resolved.resolution {
            Resolution::Admit => {
                self.insert_admitted(incoming.change, settings, now)?;
                Ok(Some(change_id))
            }
            Resolution::AdmitSuperseding { losers } => {
                let mut change = incoming.change;
                change.audit.push(
                    AuditEntry::new("consolidation", AuditAction::Admitted, now).with_reason(
                        format!(
                            "absorbed by priority: {}",
                            losers
                                .iter()
                                .map(|id| id.to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    ),
                );
                // Losers are superseded first so the admitted event
                // observes a consistent store.
                self.store.insert(change)?;
                for loser in &losers {
                    self.supersede_with_event(loser, &change_id, now)?;
                }
                self.finish_admission(change_id, settings, now)?;
                Ok(Some(change_id))
            }
            Resolution::SupersededOnArrival { winner } => {
                self.store.insert(incoming.change)?;
                self.settings.insert(change_id, settings);
                self.supersede_with_event(&change_id, &winner, now)?;
                warnings.push(SubmissionWarning {
                    change_id: Some(change_id),
                    message: format!("superseded on arrival by {winner}"),
                });
                Ok(None)
            }
            Resolution::Defer { to } => {
                self.store.insert(incoming.change)?;
                self.store.update_status(
                    &change_id,
                    ChangeStatus::Rejected,
                    "consolidation",
                    Some("DeferredToHigherPriority"),
                    now,
                )?;
                self.bus.publish(PipelineEvent::ChangeRejected {
                    session_id,
                    change_id,
                    actor: "consolidation".into(),
                    at: now,
                });
                warnings.push(SubmissionWarning {
                    change_id: Some(change_id),
                    message: format!("deferred to higher-priority change {to}"),
                });
                self.record_in_session(session_id, change_id);
                Ok(None)
            }
            Resolution::Merge {
                merged_span,
                merged_content,
                inputs,
            } => {
                // Insert the incoming first so it can be superseded like
                // its peers.
                self.store.insert(incoming.change.clone())?;
                self.settings.insert(change_id, settings.clone());
                self.record_in_session(session_id, change_id);

                let mut merged = Change::new(
                    session_id,
                    incoming.change.kind,
                    merged_span,
                    merged_content,
                    incoming.change.category,
                    request.source.clone(),
                    mean_confidence(&inputs, &self.store),
                    now,
                );
                merged.attribution = incoming.change.attribution.clone();
                merged.audit.push(
                    AuditEntry::new("consolidation", AuditAction::Merged, now).with_reason(
                        format!(
                            "merged from: {}",
                            inputs
                                .iter()
                                .map(|id| id.to_string())
                                .collect::<Vec<_>>()
                                .join(", ")
                        ),
                    ),
                );
                let merged_id = merged.id;
                self.store.insert(merged)?;
                for input in &inputs {
                    self.supersede_with_event(input, &merged_id, now)?;
                }
                self.finish_admission(merged_id, settings, now)?;
                Ok(Some(merged_id))
            }
            Resolution::Chain { order } => {
                self.insert_admitted(incoming.change, settings, now)?;
                let mut previous: Option<ChangeId> = None;
                for id in &order {
                    self.store.set_depends_on(id, previous)?;
                    previous = Some(*id);
                }
                Ok(Some(change_id))
            }
            Resolution::Escalate { conflict_group } => {
                self.insert_admitted(incoming.change, settings, now)?;
                let group = GroupId::new();
                for id in &conflict_group {
                    self.store.set_conflict_group(id, group)?;
                }
                warnings.push(SubmissionWarning {
                    change_id: Some(change_id),
                    message: format!("conflict group {group} awaits explicit resolution"),
                });
                Ok(Some(change_id))
            }
        }
    }

    fn insert_admitted(
        &mut self,
        change: Change,
        settings: ChangeSettings,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let change_id = change.id;
        self.store.insert(change)?;
        self.finish_admission(change_id, settings, now)
    }

    /// Common tail of every admission path: bookkeeping, events,
    /// cluster-debounce scheduling.
    fn finish_admission(
        &mut self,
        change_id: ChangeId,
        settings: ChangeSettings,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let change = self.store.get(&change_id)?.clone();
        let session_id = change.session_id;
        self.settings.insert(change_id, settings.clone());
        self.record_in_session(session_id, change_id);
        self.memory.put(&change, settings.priority, now);
        self.bus.publish(PipelineEvent::ChangeAdmitted {
            session_id,
            change_id,
            at: now,
        });

        let debounce = self.config.clustering.update_debounce_ms;
        self.cluster_queues
            .entry(session_id)
            .or_insert_with(|| ClusterUpdateQueue::new(debounce))
            .record(change_id, now);
        self.scheduler.schedule(
            Task::ClusterRefresh { session_id },
            now + Duration::milliseconds(debounce as i64),
        );
        Ok(())
    }

    fn record_in_session(&mut self, session_id: SessionId, change_id: ChangeId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.record_change(change_id);
        }
    }

    fn supersede_with_event(
        &mut self,
        loser: &ChangeId,
        winner: &ChangeId,
        now: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let outcome = self
            .store
            .supersede(loser, winner, "consolidation", now)?;
        if outcome == Outcome::Applied {
            let session_id = self.store.get(loser)?.session_id;
            self.memory.unpin(loser);
            self.bus.publish(PipelineEvent::ChangeSuperseded {
                session_id,
                change_id: *loser,
                superseded_by: *winner,
                at: now,
            });
            self.append_state_audit(session_id, *loser, AuditAction::Superseded, "consolidation", None, now);
        }
        Ok(())
    }

    fn group_submission(
        &mut self,
        session_id: SessionId,
        admitted: &[ChangeId],
        request: &SubmissionRequest,
    ) -> Result<Vec<GroupId>, PipelineError> {
        let now = self.clock.now();
        let changes: Vec<Change> = admitted
            .iter()
            .filter_map(|id| self.store.get(id).ok().cloned())
            .collect();
        let refs: Vec<&Change> = changes.iter().collect();
        let operation = request
            .options
            .editorial_operation
            .unwrap_or(redline_types::BatchOperation::Custom);
        let description = request
            .options
            .custom_operation_description
            .clone()
            .unwrap_or_else(|| operation.as_str().to_string());

        let batching = request
            .options
            .grouping_config
            .clone()
            .unwrap_or_else(|| self.config.batching.clone());
        let grouper = AutoGrouper::new(batching);
        let groups = grouper.group(&refs, operation, &description, now);
        let mut ids = Vec::with_capacity(groups.len());
        for group in groups {
            let group_id = group.group_id;
            for member in &group.member_ids {
                self.store.set_group(member, group_id)?;
            }
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.record_group(group_id);
            }
            self.bus.publish(PipelineEvent::BatchCreated {
                session_id,
                group_id,
                member_count: group.member_ids.len(),
                at: now,
            });
            self.batches.insert(group_id, group);
            ids.push(group_id);
        }
        Ok(ids)
    }

    fn cancelled(
        &mut self,
        operation: &str,
        token: &CancellationToken,
        now: DateTime<Utc>,
    ) -> Result<SubmissionResult, PipelineError> {
        self.bus.publish(PipelineEvent::OperationCancelled {
            operation: operation.to_string(),
            reason: token.reason().to_string(),
            at: now,
        });
        self.bus.dispatch();
        Err(PipelineError::Cancelled {
            reason: token.reason().to_string(),
        })
    }

    fn record_submission(
        &mut self,
        submission_id: redline_types::SubmissionId,
        result: SubmissionResult,
    ) -> SubmissionResult {
        self.submissions_seen.insert(submission_id, result.clone());
        result
    }

    // -----------------------------------------------------------------
    // Review
    // -----------------------------------------------------------------

    pub fn accept_change(
        &mut self,
        change_id: ChangeId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Outcome, PipelineError> {
        self.decide_change(change_id, ChangeStatus::Accepted, actor, reason)
    }

    pub fn reject_change(
        &mut self,
        change_id: ChangeId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Outcome, PipelineError> {
        self.decide_change(change_id, ChangeStatus::Rejected, actor, reason)
    }

    fn decide_change(
        &mut self,
        change_id: ChangeId,
        status: ChangeStatus,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<Outcome, PipelineError> {
        let now = self.clock.now();
        let (session_id, depends_on) = {
            let change = self.store.get(&change_id)?;
            (change.session_id, change.depends_on)
        };

        // Sequential chains gate acceptance order.
        if status == ChangeStatus::Accepted {
            if let Some(dep) = depends_on {
                let dep_status = self.store.get(&dep)?.status;
                if !dep_status.is_terminal() {
                    return Err(ConsolidationError::OrderingViolation {
                        change_id,
                        depends_on: dep,
                    }
                    .into());
                }
            }
        }

        let outcome = self.store.update_status(&change_id, status, actor, reason, now)?;
        if outcome == Outcome::Unchanged {
            return Ok(outcome);
        }
        self.memory.unpin(&change_id);
        let (action, event) = match status {
            ChangeStatus::Accepted => (
                AuditAction::Accepted,
                PipelineEvent::ChangeAccepted {
                    session_id,
                    change_id,
                    actor: actor.to_string(),
                    at: now,
                },
            ),
            ChangeStatus::Rejected => (
                AuditAction::Rejected,
                PipelineEvent::ChangeRejected {
                    session_id,
                    change_id,
                    actor: actor.to_string(),
                    at: now,
                },
            ),
            _ => {
                return Err(PipelineError::InternalInvariantViolation {
                    message: format!("decide_change cannot target {status}"),
                })
            }
        };
        self.bus.publish(event);
        self.append_state_audit(session_id, change_id, action, actor, reason, now);
        self.refresh_batch_of(change_id, now);
        self.persist_session(session_id)?;
        self.bus.dispatch();
        Ok(outcome)
    }

    pub fn accept_batch(
        &mut self,
        group_id: GroupId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<GroupStatus, PipelineError> {
        self.decide_batch(group_id, BatchDecision::Accept, actor, reason)
    }

    pub fn reject_batch(
        &mut self,
        group_id: GroupId,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<GroupStatus, PipelineError> {
        self.decide_batch(group_id, BatchDecision::Reject, actor, reason)
    }

    /// Bulk decision: depth-first over children, then own members. A
    /// member that cannot transition is skipped (its own transition
    /// reverts); siblings proceed.
    fn decide_batch(
        &mut self,
        group_id: GroupId,
        decision: BatchDecision,
        actor: &str,
        reason: Option<&str>,
    ) -> Result<GroupStatus, PipelineError> {
        let batch = self
            .batches
            .get(&group_id)
            .ok_or(PipelineError::InternalInvariantViolation {
                message: format!("unknown batch {group_id}"),
            })?
            .clone();

        for child in &batch.child_group_ids {
            if self.batches.contains_key(child) {
                let _ = self.decide_batch(*child, decision, actor, reason)?;
            }
        }

        let status = match decision {
            BatchDecision::Accept => ChangeStatus::Accepted,
            BatchDecision::Reject => ChangeStatus::Rejected,
        };
        for member in &batch.member_ids {
            let pending = matches!(self.store.get(member), Ok(change) if change.is_pending());
            if pending {
                if let Err(e) = self.decide_change(*member, status, actor, reason) {
                    warn!(change = %member, error = %e, "batch member skipped");
                }
            }
        }
        let folded = self.refresh_batch(group_id, self.clock.now());
        self.bus.dispatch();
        Ok(folded)
    }

    /// Apply individual decisions to a batch's members atomically at the
    /// batch boundary.
    pub fn partial_review(
        &mut self,
        group_id: GroupId,
        review: &PartialReview,
        actor: &str,
    ) -> Result<GroupStatus, PipelineError> {
        if !self.batches.contains_key(&group_id) {
            return Err(PipelineError::InternalInvariantViolation {
                message: format!("unknown batch {group_id}"),
            });
        }
        for (change_id, decision) in &review.decisions {
            let status = match decision {
                BatchDecision::Accept => ChangeStatus::Accepted,
                BatchDecision::Reject => ChangeStatus::Rejected,
            };
            if let Err(e) = self.decide_change(*change_id, status, actor, None) {
                warn!(change = %change_id, error = %e, "partial review member skipped");
            }
        }
        let folded = self.refresh_batch(group_id, self.clock.now());
        self.bus.dispatch();
        Ok(folded)
    }

    /// Recompute a batch's folded status (and its ancestors'); emits
    /// `BatchFinalized` on the transition into a terminal fold.
    fn refresh_batch(&mut self, group_id: GroupId, now: DateTime<Utc>) -> GroupStatus {
        let Some(batch) = self.batches.get(&group_id) else {
            return GroupStatus::Pending;
        };
        let mut statuses: Vec<ChangeStatus> = Vec::new();
        for member in &batch.member_ids {
            if let Ok(change) = self.store.get(member) {
                statuses.push(change.status);
            }
        }
        // Parents fold over their descendants' members.
        for child in batch.child_group_ids.clone() {
            if let Some(child_batch) = self.batches.get(&child) {
                for member in &child_batch.member_ids {
                    if let Ok(change) = self.store.get(member) {
                        statuses.push(change.status);
                    }
                }
            }
        }
        let folded = GroupStatus::fold(statuses);
        let session_id = self
            .batches
            .get(&group_id)
            .and_then(|b| {
                b.member_ids
                    .first()
                    .or_else(|| {
                        b.child_group_ids
                            .first()
                            .and_then(|c| self.batches.get(c))
                            .and_then(|cb| cb.member_ids.first())
                    })
                    .copied()
            })
            .and_then(|id| self.store.get(&id).ok())
            .map(|c| c.session_id);

        let batch = self.batches.get_mut(&group_id).expect("checked above");
        let was_terminal = batch.status.is_terminal();
        batch.status = folded;
        if folded.is_terminal() && !was_terminal {
            if let Some(session_id) = session_id {
                self.bus.publish(PipelineEvent::BatchFinalized {
                    session_id,
                    group_id,
                    at: now,
                });
            }
        }
        let parent = self.batches.get(&group_id).and_then(|b| b.parent_group_id);
        if let Some(parent) = parent {
            self.refresh_batch(parent, now);
        }
        folded
    }

    fn refresh_batch_of(&mut self, change_id: ChangeId, now: DateTime<Utc>) {
        let group = self.store.get(&change_id).ok().and_then(|c| c.group_id);
        if let Some(group_id) = group {
            self.refresh_batch(group_id, now);
        }
    }

    // -----------------------------------------------------------------
    // Query & export
    // -----------------------------------------------------------------

    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Execute through the TTL cache.
    pub fn run_query(&mut self, builder: &QueryBuilder) -> Result<Vec<Change>, PipelineError> {
        let now = self.clock.now();
        let fingerprint = builder.fingerprint();
        let mutation_count = self.store.mutation_count();
        if let Some(cached) = self.query_cache.get(&fingerprint, mutation_count, now) {
            return Ok(cached);
        }
        let results = builder.execute(&self.store, now)?;
        self.query_cache
            .put(fingerprint, results.clone(), mutation_count, now);
        Ok(results)
    }

    pub fn export(
        &mut self,
        builder: &QueryBuilder,
        format: ExportFormat,
        csv_options: &CsvOptions,
    ) -> Result<Vec<u8>, PipelineError> {
        let results = self.run_query(builder)?;
        redline_store::export(&results, format, csv_options).map_err(|e| {
            PipelineError::State(redline_types::StateError::Serialize(e))
        })
    }

    // -----------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------

    pub fn subscribe(
        &mut self,
        topic: Topic,
        callback: impl FnMut(&PipelineEvent) + 'static,
    ) -> Subscription {
        self.bus.subscribe(topic, callback)
    }

    pub fn unsubscribe(&mut self, subscription: Subscription) -> bool {
        self.bus.unsubscribe(subscription)
    }

    // -----------------------------------------------------------------
    // The cooperative tick
    // -----------------------------------------------------------------

    /// Run everything due on the deadline queue. The embedding loop
    /// calls this at its suspension points (or a timer pegged to
    /// `scheduler.next_deadline`).
    pub fn tick(&mut self) -> Result<(), PipelineError> {
        let now = self.clock.now();
        for task in self.scheduler.take_due(now) {
            match task {
                Task::ClusterRefresh { session_id } => {
                    let due = self
                        .cluster_queues
                        .get(&session_id)
                        .is_some_and(|q| q.is_due(now));
                    if due {
                        self.recluster(session_id, now);
                    } else if let Some(deadline) = self
                        .cluster_queues
                        .get(&session_id)
                        .and_then(|q| q.deadline())
                    {
                        // Debounced further since scheduling; re-arm.
                        self.scheduler
                            .schedule(Task::ClusterRefresh { session_id }, deadline);
                    }
                }
                Task::SnapshotTick => {
                    self.checkpoint_all(now)?;
                    self.scheduler.schedule(
                        Task::SnapshotTick,
                        now + Duration::milliseconds(
                            self.config.persistence.snapshot_interval_ms as i64,
                        ),
                    );
                }
                Task::BackoffExpiry { producer } => {
                    debug!(producer, "backoff window elapsed");
                }
            }
        }
        self.bus.dispatch();
        Ok(())
    }

    fn recluster(&mut self, session_id: SessionId, now: DateTime<Utc>) {
        if let Some(queue) = self.cluster_queues.get_mut(&session_id) {
            queue.drain();
        }
        let pending: Vec<Change> = self
            .store
            .pending_in_session(&session_id)
            .into_iter()
            .cloned()
            .collect();
        let set = cluster_changes(&pending, &self.config.clustering, now);
        let count = set.len();
        self.clusters.insert(session_id, set);
        self.bus.publish(PipelineEvent::ClusterUpdated {
            session_id,
            cluster_count: count,
            at: now,
        });
    }

    /// Force a cluster pass now (explicit refresh).
    pub fn recluster_now(&mut self, session_id: SessionId) -> usize {
        let now = self.clock.now();
        self.recluster(session_id, now);
        self.bus.dispatch();
        self.clusters
            .get(&session_id)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Explicit checkpoint of one session.
    pub fn checkpoint(&mut self, session_id: SessionId) -> Result<(), PipelineError> {
        let now = self.clock.now();
        let body = self.session_body(session_id)?;
        if let Some(state) = &self.state {
            state.checkpoint(&body, now)?;
        }
        Ok(())
    }

    fn checkpoint_all(&mut self, now: DateTime<Utc>) -> Result<(), PipelineError> {
        let active: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| s.is_active())
            .map(|s| s.id)
            .collect();
        for session_id in active {
            let body = self.session_body(session_id)?;
            if let Some(state) = &self.state {
                state.checkpoint(&body, now)?;
            }
        }
        Ok(())
    }

    /// Run pressure-driven eviction over the memory cache.
    pub fn reduce_memory(&mut self, pressure: MemoryPressure) -> usize {
        let now = self.clock.now();
        self.memory.evict(pressure, now).len()
    }

    /// Migrate a persisted session to the current schema version.
    pub fn migrate_session(
        &mut self,
        session_id: SessionId,
        target_version: u32,
    ) -> Result<(), PipelineError> {
        let now = self.clock.now();
        let Some(state) = &self.state else {
            return Ok(());
        };
        let from_version = state.load_session(session_id).map(|b| b.version).unwrap_or(0);
        self.bus.publish(PipelineEvent::MigrationStarted {
            session_id,
            from_version,
            to_version: target_version,
            at: now,
        });
        match state.migrate_session(session_id, &self.migrations, target_version, now) {
            Ok(_report) => {
                self.bus.publish(PipelineEvent::MigrationCompleted {
                    session_id,
                    from_version,
                    to_version: target_version,
                    at: now,
                });
                self.bus.dispatch();
                Ok(())
            }
            Err((error, report)) => {
                self.bus.publish(PipelineEvent::MigrationFailed {
                    session_id,
                    at_version: from_version,
                    message: error.to_string(),
                    at: now,
                });
                if report.rolled_back {
                    self.bus.publish(PipelineEvent::RollbackCompleted {
                        session_id,
                        restored_version: from_version,
                        at: now,
                    });
                }
                self.bus.dispatch();
                Err(error.into())
            }
        }
    }

    // -----------------------------------------------------------------
    // Persistence plumbing
    // -----------------------------------------------------------------

    fn session_body(&self, session_id: SessionId) -> Result<SessionBody, PipelineError> {
        let session = self
            .sessions
            .get(&session_id)
            .ok_or(PipelineError::InternalInvariantViolation {
                message: format!("unknown session {session_id}"),
            })?;
        let mut body = SessionBody::new(session.clone());
        body.version = session.version;
        body.changes = self
            .store
            .session_changes(&session_id)
            .into_iter()
            .cloned()
            .collect();
        body.batches = session
            .group_ids
            .iter()
            .filter_map(|id| self.batches.get(id).cloned())
            .collect();
        body.metadata = session.metadata.clone();
        Ok(body)
    }

    fn persist_session(&mut self, session_id: SessionId) -> Result<(), PipelineError> {
        if self.state.is_none() {
            return Ok(());
        }
        let body = self.session_body(session_id)?;
        if let Some(state) = &self.state {
            state.save_session(&body)?;
        }
        Ok(())
    }

    fn append_state_audit(
        &self,
        session_id: SessionId,
        change_id: ChangeId,
        action: AuditAction,
        actor: &str,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) {
        let Some(state) = &self.state else { return };
        let record = AuditRecord {
            session_id,
            change_id,
            action,
            actor: actor.to_string(),
            reason: reason.map(str::to_string),
            at,
        };
        if let Err(e) = state.append_audit(&record) {
            warn!(change = %change_id, error = %e, "audit append failed");
        }
    }
}

fn mean_confidence(ids: &[ChangeId], store: &ChangeStore) -> f64 {
    let values: Vec<f64> = ids
        .iter()
        .filter_map(|id| store.get(id).ok())
        .map(|c| c.confidence)
        .collect();
    if values.is_empty() {
        0.5
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn failed_result(
    summary: ValidationSummary,
    code: ErrorCode,
    message: impl Into<String>,
) -> SubmissionResult {
    SubmissionResult {
        success: false,
        session_id: None,
        change_ids: Vec::new(),
        errors: vec![SubmissionError::new(None, code, message)],
        warnings: Vec::new(),
        change_group_id: None,
        group_ids: Vec::new(),
        validation_summary: summary,
    }
}
