//! The control strategy.
//!
//! One request runs as a loop of phases over a fresh blackboard:
//!
//! 1. Evaluate the confidence gate once its inputs are present.
//! 2. Stop if every terminal field is present, the deadline has passed, or
//!    the iteration limit is reached.
//! 3. Collect the ready set: sources whose inputs are present, whose outputs
//!    are absent, and which the current route schedules. An empty ready set
//!    with terminal fields missing is a stall.
//! 4. Dispatch the ready set concurrently, each call under its own timeout
//!    and a permit from the shared worker pool. When a call fails, the next
//!    candidate of the field's fallback chain joins the same phase; when the
//!    chain is exhausted the field gets a neutral default.
//! 5. Commit, stream the new fields, repeat.
//!
//! After the loop the quality check runs; a failing result gets one retry of
//! the generation fields on a forked store under the escalated route.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::blackboard::{BlackboardStore, Field, FieldValue, Phase, PhaseRecord, Snapshot, SCHEDULER_PRODUCER};
use crate::config::{EngineConfig, SafetyConfig};
use crate::error::{Escalation, StoreError};
use crate::fallback::{neutral_default, FallbackChain};
use crate::gate::ConfidenceGate;
use crate::knowledge::{Contribution, KnowledgeSource, Registry, SourceContext, SourceError};
use crate::model::SafetyScan;
use crate::quality::{QualityAssurance, QualityReport};
use crate::services::Budget;
use crate::streaming::StreamSender;
use crate::text;
use crate::themes::ThemeCatalog;

use super::event::RunEvent;
use super::state::{RunState, StateTrace};

/// Producer recorded for the gate's `route` field.
pub const GATE_PRODUCER: &str = "confidence_gate";
/// Producer recorded for `quality_report`.
pub const QA_PRODUCER: &str = "quality_assurance";

/// Write the seed fields for a new request.
pub fn seed(
    store: &BlackboardStore,
    text: &str,
    catalog: &Arc<ThemeCatalog>,
    safety: &SafetyConfig,
) -> Result<(), StoreError> {
    let scan = SafetyScan::scan(text, &safety.escalation_terms);
    store.write(Field::USER_INPUT, FieldValue::Text(text.to_string()), SCHEDULER_PRODUCER)?;
    store.write(Field::NORMALIZED_TEXT, FieldValue::Text(text::normalize(text)), SCHEDULER_PRODUCER)?;
    store.write(Field::THEME_CATALOG, FieldValue::Catalog(Arc::clone(catalog)), SCHEDULER_PRODUCER)?;
    store.write(Field::SAFETY_SCAN, FieldValue::Safety(scan), SCHEDULER_PRODUCER)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Everything a finished run leaves behind.
#[derive(Debug)]
pub struct RunOutcome {
    /// The store of the attempt that was kept.
    pub store: BlackboardStore,
    pub trace: StateTrace,
    pub events: Vec<RunEvent>,
    pub phases: Vec<PhaseRecord>,
    pub escalations: Vec<Escalation>,
    /// Quality reports of each attempt that reached the quality check.
    pub attempts: Vec<QualityReport>,
    /// Report for the kept store after finalization.
    pub report: QualityReport,
    pub partial: bool,
    pub quality_below_threshold: bool,
    pub timeout_hit: bool,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
enum Exit {
    Complete,
    Stalled(Vec<Field>),
    Deadline,
    IterationLimit(usize),
}

/// Mutable bookkeeping for one request.
struct Run<'a> {
    request_id: &'a str,
    deadline: Instant,
    trace: StateTrace,
    events: Vec<RunEvent>,
    phases: Vec<PhaseRecord>,
    escalations: Vec<Escalation>,
    stream: Option<&'a StreamSender>,
    timeout_hit: bool,
}

impl<'a> Run<'a> {
    fn enter(&mut self, state: RunState) {
        if let Err(e) = self.trace.advance(state) {
            log::error!("[{}] {}", self.request_id, e);
        }
    }

    fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// A source queued for dispatch, and the fields it is expected to cover.
struct Dispatch {
    source: Arc<dyn KnowledgeSource>,
    cover: Vec<Field>,
}

/// A returned call.
struct Finished {
    source: Arc<dyn KnowledgeSource>,
    cover: Vec<Field>,
    result: Result<(Contribution, Vec<(Field, FieldValue)>), SourceError>,
    elapsed_ms: u64,
}

/// Per-phase accumulators for the phase record.
#[derive(Default)]
struct PhaseLog {
    index: usize,
    committed: Vec<Field>,
    failed: Vec<String>,
    fallbacks: Vec<String>,
}

// ---------------------------------------------------------------------------
// ControlStrategy
// ---------------------------------------------------------------------------

/// Schedules knowledge sources over a blackboard. One instance serves every
/// request; the worker pool is shared between them.
pub struct ControlStrategy {
    registry: Arc<Registry>,
    config: Arc<EngineConfig>,
    catalog: Arc<ThemeCatalog>,
    gate: ConfidenceGate,
    qa: QualityAssurance,
    pool: Arc<Semaphore>,
}

impl std::fmt::Debug for ControlStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlStrategy")
            .field("registry", &self.registry)
            .field("max_concurrency", &self.config.scheduler.max_concurrency)
            .finish()
    }
}

impl ControlStrategy {
    pub fn new(registry: Arc<Registry>, config: Arc<EngineConfig>, catalog: Arc<ThemeCatalog>) -> Self {
        let gate = ConfidenceGate::new(config.thresholds.clone());
        let qa = QualityAssurance::new(
            config.quality.clone(),
            config.selection.clone(),
            config.thresholds.min_citation_similarity,
        );
        let pool = Arc::new(Semaphore::new(config.scheduler.max_concurrency.max(1)));
        Self {
            registry,
            config,
            catalog,
            gate,
            qa,
            pool,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run one request to completion. Never fails: every problem ends up in
    /// the outcome's events, escalations and `partial` flag.
    pub async fn run(&self, request_id: &str, text: &str, stream: Option<&StreamSender>) -> RunOutcome {
        let started = Instant::now();
        let mut run = Run {
            request_id,
            deadline: started + self.config.scheduler.deadline(),
            trace: StateTrace::new(),
            events: Vec::new(),
            phases: Vec::new(),
            escalations: Vec::new(),
            stream,
            timeout_hit: false,
        };
        log::info!("[{}] run started ({} chars)", request_id, text.chars().count());

        let store = BlackboardStore::new();
        if let Err(e) = seed(&store, text, &self.catalog, &self.config.safety) {
            log::error!("[{}] seeding failed: {}", request_id, e);
        }

        let mut attempts = Vec::new();
        let exit = self.drive(&store, &mut run).await;
        let (store, partial) = if exit == Exit::Complete {
            self.check_quality(store, &mut run, &mut attempts).await
        } else {
            self.note_exit(&exit, &mut run);
            (store, true)
        };

        run.enter(RunState::Finalize);
        let report = self.finalize(&store, &mut run);
        let quality_below_threshold = !report.passed;
        if quality_below_threshold && !partial {
            log::warn!(
                "[{}] shipping result below quality minimum ({:.3} < {:.3})",
                request_id,
                report.aggregate,
                report.minimum
            );
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        log::info!(
            "[{}] run finished in {}ms: {} (partial={}, quality={:.3})",
            request_id,
            elapsed_ms,
            run.trace,
            partial,
            report.aggregate
        );

        RunOutcome {
            store,
            trace: run.trace,
            events: run.events,
            phases: run.phases,
            escalations: run.escalations,
            attempts,
            report,
            partial,
            quality_below_threshold,
            timeout_hit: run.timeout_hit,
            elapsed_ms,
        }
    }

    // -----------------------------------------------------------------------
    // Phase loop
    // -----------------------------------------------------------------------

    async fn drive(&self, store: &BlackboardStore, run: &mut Run<'_>) -> Exit {
        let mut tried: HashSet<String> = HashSet::new();
        let mut iterations = 0;
        loop {
            self.maybe_gate(store, run);

            let snapshot = store.snapshot();
            if Field::TERMINAL.iter().all(|f| snapshot.contains(*f)) {
                return Exit::Complete;
            }
            if run.deadline_passed() {
                return Exit::Deadline;
            }
            if iterations >= self.config.scheduler.max_iterations {
                return Exit::IterationLimit(iterations);
            }
            iterations += 1;

            let ready = self.ready_set(&snapshot, &tried);
            if ready.is_empty() {
                let missing = Field::TERMINAL.iter().copied().filter(|f| !snapshot.contains(*f)).collect();
                return Exit::Stalled(missing);
            }

            let index = run.trace.last_phase() + 1;
            let deadline_hit = self.run_phase(index, ready, store, run, &mut tried).await;

            if let Some(stream) = run.stream {
                stream.send_phase(index, store.snapshot().fields_since(&snapshot));
            }
            if deadline_hit {
                return Exit::Deadline;
            }
        }
    }

    /// Ready sources ordered by static level, then priority, then name.
    fn ready_set(&self, snapshot: &Snapshot, tried: &HashSet<String>) -> Vec<Arc<dyn KnowledgeSource>> {
        let mut ready: Vec<Arc<dyn KnowledgeSource>> = self
            .registry
            .sources()
            .iter()
            .filter(|s| !tried.contains(s.name()) && s.can_contribute(snapshot))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            self.registry
                .level_of(a.name())
                .cmp(&self.registry.level_of(b.name()))
                .then_with(|| b.descriptor().priority.cmp(&a.descriptor().priority))
                .then_with(|| a.name().cmp(b.name()))
        });
        ready
    }

    /// Run one phase to completion. Returns `true` when the global deadline
    /// cut it short.
    async fn run_phase(
        &self,
        index: usize,
        ready: Vec<Arc<dyn KnowledgeSource>>,
        store: &BlackboardStore,
        run: &mut Run<'_>,
        tried: &mut HashSet<String>,
    ) -> bool {
        run.enter(RunState::Phase(index));
        let phase = Phase::begin(index, ready.iter().map(|s| s.name().to_string()).collect());
        let mut tally = PhaseLog {
            index,
            ..PhaseLog::default()
        };

        let mut set = JoinSet::new();
        for source in ready {
            tried.insert(source.name().to_string());
            let cover = source.descriptor().outputs.clone();
            self.spawn(&mut set, Dispatch { source, cover }, store, run);
        }

        let mut deadline_hit = false;
        loop {
            let joined = match tokio::time::timeout_at(run.deadline, set.join_next()).await {
                Ok(Some(joined)) => joined,
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "[{}] deadline reached in phase {}, cancelling {} call(s)",
                        run.request_id,
                        index,
                        set.len()
                    );
                    set.abort_all();
                    run.timeout_hit = true;
                    deadline_hit = true;
                    break;
                }
            };
            match joined {
                Ok(finished) => self.settle(finished, store, run, &mut set, tried, &mut tally),
                Err(e) => log::error!("[{}] worker task ended abnormally: {}", run.request_id, e),
            }
        }

        run.phases.push(phase.finish(tally.committed, tally.failed, tally.fallbacks));
        deadline_hit
    }

    fn spawn(&self, set: &mut JoinSet<Finished>, dispatch: Dispatch, store: &BlackboardStore, run: &Run<'_>) {
        let Dispatch { source, cover } = dispatch;
        let snapshot = store.snapshot();
        let timeout = self.registry.timeout_for(source.as_ref(), snapshot.route(), &self.config);
        let config = Arc::clone(&self.config);
        let pool = Arc::clone(&self.pool);
        let request_id = run.request_id.to_string();
        let deadline = run.deadline;

        log::debug!("[{}] dispatch {} (timeout {}ms)", request_id, source.name(), timeout.as_millis());
        set.spawn(async move {
            let started = Instant::now();
            let result = match pool.acquire_owned().await {
                Err(_) => Err(SourceError::failure("worker pool closed")),
                Ok(_permit) => {
                    let timeout = timeout.min(deadline.saturating_duration_since(Instant::now()));
                    let ctx = SourceContext::new(
                        request_id,
                        snapshot,
                        Budget::new(0, timeout),
                        config,
                        source.descriptor().outputs.clone(),
                    );
                    let call = AssertUnwindSafe(source.contribute(&ctx)).catch_unwind();
                    let outcome = match tokio::time::timeout(timeout, call).await {
                        Ok(Ok(result)) => result,
                        Ok(Err(_)) => Err(SourceError::failure("knowledge source panicked")),
                        Err(_) => Err(SourceError::Timeout {
                            after_ms: timeout.as_millis() as u64,
                        }),
                    };
                    outcome.map(|contribution| (contribution, ctx.into_staged()))
                }
            };
            Finished {
                source,
                cover,
                result,
                elapsed_ms: started.elapsed().as_millis() as u64,
            }
        });
    }

    /// Commit a returned call, then cover whatever it left empty.
    fn settle(
        &self,
        finished: Finished,
        store: &BlackboardStore,
        run: &mut Run<'_>,
        set: &mut JoinSet<Finished>,
        tried: &mut HashSet<String>,
        tally: &mut PhaseLog,
    ) {
        let Finished {
            source,
            cover,
            result,
            elapsed_ms,
        } = finished;
        let name = source.name().to_string();

        match result {
            Ok((contribution, staged)) => {
                let mut fields = Vec::new();
                for (field, value) in staged {
                    match store.write(field, value, &name) {
                        Ok(()) => {
                            tally.committed.push(field);
                            fields.push(field.to_string());
                        }
                        Err(e) => {
                            log::debug!("[{}] {} commit rejected: {}", run.request_id, name, e);
                            run.events.push(RunEvent::CommitRejected {
                                source: name.clone(),
                                field: field.to_string(),
                                reason: e.to_string(),
                            });
                        }
                    }
                }
                if contribution.confidence < source.descriptor().confidence_threshold {
                    log::debug!(
                        "[{}] {} confidence {:.3} below its threshold {:.3}",
                        run.request_id,
                        name,
                        contribution.confidence,
                        source.descriptor().confidence_threshold
                    );
                }
                log::debug!("[{}] {} completed in {}ms: [{}]", run.request_id, name, elapsed_ms, fields.join(", "));
                run.events.push(RunEvent::SourceCompleted {
                    source: name.clone(),
                    phase: tally.index,
                    fields,
                    confidence: contribution.confidence,
                    elapsed_ms,
                });
            }
            Err(err) => {
                log::warn!("[{}] {} failed after {}ms: {}", run.request_id, name, elapsed_ms, err);
                if matches!(err, SourceError::Timeout { .. }) {
                    run.timeout_hit = true;
                }
                run.escalations.push(err.to_escalation(&name));
                run.events.push(RunEvent::SourceFailed {
                    source: name.clone(),
                    phase: tally.index,
                    error: err.to_string(),
                    elapsed_ms,
                });
                tally.failed.push(name.clone());
            }
        }

        let missing: Vec<Field> = cover.into_iter().filter(|f| !store.contains(*f)).collect();
        if !missing.is_empty() {
            self.cover_missing(&name, missing, store, run, set, tried, tally);
        }
    }

    /// Dispatch the next fallback candidate for `missing`, or write neutral
    /// defaults when the chain is exhausted.
    #[allow(clippy::too_many_arguments)]
    fn cover_missing(
        &self,
        failed: &str,
        missing: Vec<Field>,
        store: &BlackboardStore,
        run: &mut Run<'_>,
        set: &mut JoinSet<Finished>,
        tried: &mut HashSet<String>,
        tally: &mut PhaseLog,
    ) {
        let snapshot = store.snapshot();
        if !run.deadline_passed() {
            let chain = FallbackChain::for_field(&self.registry, missing[0], snapshot.route());
            if let Some(next) = chain.next_candidate(tried, &snapshot) {
                let fallback = next.name().to_string();
                log::info!(
                    "[{}] {} left [{}] empty, falling back to {}",
                    run.request_id,
                    failed,
                    missing.iter().map(|f| f.as_str()).collect::<Vec<_>>().join(", "),
                    fallback
                );
                run.events.push(RunEvent::FallbackUsed {
                    failed: failed.to_string(),
                    fallback: fallback.clone(),
                    fields: missing.iter().map(|f| f.to_string()).collect(),
                });
                tried.insert(fallback.clone());
                tally.fallbacks.push(fallback);
                self.spawn(set, Dispatch { source: next, cover: missing }, store, run);
                return;
            }
        }

        for field in missing {
            self.write_neutral(field, store, run);
            tally.committed.push(field);
        }
    }

    fn write_neutral(&self, field: Field, store: &BlackboardStore, run: &mut Run<'_>) {
        match store.write(field, neutral_default(field), SCHEDULER_PRODUCER) {
            Ok(()) => {
                log::warn!("[{}] no producer left for '{}', wrote neutral default", run.request_id, field);
                run.events.push(RunEvent::NeutralDefault {
                    field: field.to_string(),
                });
            }
            Err(e) => log::debug!("[{}] neutral default skipped: {}", run.request_id, e),
        }
    }

    /// Decide the route once metrics and the safety scan are present.
    fn maybe_gate(&self, store: &BlackboardStore, run: &mut Run<'_>) {
        if store.contains(Field::ROUTE) {
            return;
        }
        let (Some(metrics), Some(safety)) = (store.read(Field::CONFIDENCE_METRICS), store.read(Field::SAFETY_SCAN))
        else {
            return;
        };
        let (Some(metrics), Some(safety)) = (metrics.as_metrics(), safety.as_safety()) else {
            log::error!("[{}] gate inputs have unexpected types", run.request_id);
            return;
        };

        let (decision, escalation) = self.gate.decide(metrics, safety);
        log::info!(
            "[{}] gate: {} route (confidence {:.3}, margin {:.3}, entropy {:.3})",
            run.request_id,
            decision.route,
            metrics.confidence,
            metrics.margin,
            metrics.entropy
        );
        run.events.push(RunEvent::GateDecided {
            route: decision.route,
            reasons: decision.reasons.clone(),
        });
        if let Some(escalation) = escalation {
            log::warn!("[{}] {}", run.request_id, escalation);
            run.escalations.push(escalation);
        }
        if let Err(e) = store.write(Field::ROUTE, FieldValue::Route(decision), GATE_PRODUCER) {
            log::error!("[{}] could not record route: {}", run.request_id, e);
        }
    }

    fn note_exit(&self, exit: &Exit, run: &mut Run<'_>) {
        match exit {
            Exit::Complete => {}
            Exit::Stalled(missing) => {
                let missing: Vec<String> = missing.iter().map(|f| f.to_string()).collect();
                log::warn!("[{}] schedule stalled, missing [{}]", run.request_id, missing.join(", "));
                run.escalations.push(Escalation::ScheduleStalled {
                    missing: missing.clone(),
                });
                run.events.push(RunEvent::Stalled { missing });
            }
            Exit::Deadline => {
                log::warn!("[{}] global deadline exceeded", run.request_id);
                run.timeout_hit = true;
                run.events.push(RunEvent::DeadlineExceeded {
                    phase: run.trace.last_phase(),
                });
            }
            Exit::IterationLimit(iterations) => {
                log::error!("[{}] iteration limit of {} reached", run.request_id, iterations);
                run.events.push(RunEvent::IterationLimit {
                    iterations: *iterations,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Quality check and retry
    // -----------------------------------------------------------------------

    /// QA the completed store and retry generation once if it fails. Returns
    /// the store to ship and whether it is partial.
    async fn check_quality(
        &self,
        store: BlackboardStore,
        run: &mut Run<'_>,
        attempts: &mut Vec<QualityReport>,
    ) -> (BlackboardStore, bool) {
        run.enter(RunState::QaCheck);
        let first = self.qa.assess(&store.snapshot());
        self.record_verdict(&first, 1, run);
        attempts.push(first.clone());
        if first.passed {
            return (store, false);
        }

        run.escalations.push(Escalation::QualityBelowThreshold {
            score: first.aggregate,
            minimum: first.minimum,
        });
        if run.deadline_passed() {
            return (store, false);
        }
        let Some(decision) = store.read(Field::ROUTE).and_then(|v| v.as_route().map(|d| d.escalated())) else {
            return (store, false);
        };

        run.enter(RunState::RetryGeneration);
        log::info!("[{}] retrying generation in {} route", run.request_id, decision.route);
        run.events.push(RunEvent::RetryStarted { route: decision.route });
        let retry = store.fork_without(&Field::GENERATION);
        if let Err(e) = retry.write(Field::ROUTE, FieldValue::Route(decision), GATE_PRODUCER) {
            log::error!("[{}] could not record retry route: {}", run.request_id, e);
            return (store, false);
        }

        let exit = self.drive(&retry, run).await;
        run.enter(RunState::QaCheck);
        if exit != Exit::Complete {
            self.note_exit(&exit, run);
            return (store, false);
        }

        let second = self.qa.assess(&retry.snapshot());
        self.record_verdict(&second, 2, run);
        attempts.push(second.clone());
        if second.aggregate > first.aggregate {
            (retry, false)
        } else {
            (store, false)
        }
    }

    fn record_verdict(&self, report: &QualityReport, attempt: usize, run: &mut Run<'_>) {
        log::info!(
            "[{}] quality attempt {}: {:.3} (minimum {:.3}) {}",
            run.request_id,
            attempt,
            report.aggregate,
            report.minimum,
            if report.passed { "passed" } else { "failed" }
        );
        run.events.push(RunEvent::QaVerdict {
            attempt,
            aggregate: report.aggregate,
            passed: report.passed,
        });
    }

    /// Fill missing terminal fields and record the final quality report.
    fn finalize(&self, store: &BlackboardStore, run: &mut Run<'_>) -> QualityReport {
        for field in Field::TERMINAL {
            if !store.contains(field) {
                self.write_neutral(field, store, run);
            }
        }
        let report = self.qa.assess(&store.snapshot());
        if let Err(e) = store.write(Field::QUALITY_REPORT, FieldValue::Quality(report.clone()), QA_PRODUCER) {
            log::debug!("[{}] quality report already recorded: {}", run.request_id, e);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::Route;
    use crate::testing::{self, StubSource};
    use std::time::Duration;

    fn control(sources: Vec<Arc<dyn KnowledgeSource>>, config: EngineConfig) -> ControlStrategy {
        let registry = Registry::new(sources, &config).unwrap();
        ControlStrategy::new(Arc::new(registry), Arc::new(config), testing::catalog_arc())
    }

    fn standard(config: EngineConfig) -> ControlStrategy {
        let registry = testing::registry(&config);
        ControlStrategy::new(Arc::new(registry), Arc::new(config), testing::catalog_arc())
    }

    #[tokio::test]
    async fn test_independent_sources_run_concurrently() {
        let names = ["w1", "w2", "w3", "w4"];
        let outputs = [Field::new("o1"), Field::new("o2"), Field::new("o3"), Field::new("o4")];
        let sources: Vec<Arc<dyn KnowledgeSource>> = names
            .iter()
            .zip(outputs)
            .map(|(name, out)| {
                Arc::new(StubSource::new(name, &[Field::USER_INPUT], &[out]).with_delay(Duration::from_millis(150)))
                    as Arc<dyn KnowledgeSource>
            })
            .collect();
        let control = control(sources, EngineConfig::default());

        let outcome = control.run("req-1", "hello", None).await;
        assert!(outcome.elapsed_ms < 450, "took {}ms", outcome.elapsed_ms);
        assert_eq!(outcome.phases[0].sources.len(), 4);
        for (name, out) in names.iter().zip(outputs) {
            assert_eq!(outcome.store.producer_of(out).as_deref(), Some(*name));
        }
        // Nothing produces the terminal fields.
        assert!(outcome.partial);
    }

    #[tokio::test]
    async fn test_stall_finalizes_partial() {
        let mut gated = StubSource::new("gated", &[Field::USER_INPUT], &[Field::new("x")]);
        gated.descriptor = gated.descriptor.primary_in([Route::Balanced]);
        let reader = StubSource::new("reader", &[Field::new("x")], &[Field::new("y")]);
        let control = control(vec![Arc::new(gated), Arc::new(reader)], EngineConfig::default());

        let outcome = control.run("req-2", "hello", None).await;
        assert!(outcome.partial);
        assert_eq!(outcome.trace.states(), &[RunState::Init, RunState::Finalize]);
        assert!(outcome
            .escalations
            .iter()
            .any(|e| matches!(e, Escalation::ScheduleStalled { .. })));
        assert!(Field::TERMINAL.iter().all(|f| outcome.store.contains(*f)));
    }

    #[tokio::test]
    async fn test_deadline_cuts_run_short() {
        let mut config = EngineConfig::default();
        config.scheduler.deadline_ms = 300;
        config.modes.deterministic.timeout_ms = 200;
        config.modes.balanced.timeout_ms = 200;
        config.modes.quality_first.timeout_ms = 200;

        let mut first = StubSource::new("first", &[Field::USER_INPUT], &[Field::new("a")])
            .with_delay(Duration::from_millis(200));
        first.descriptor = first.descriptor.timeout_ms(250);
        let mut second = StubSource::new("second", &[Field::new("a")], &[Field::new("b")])
            .with_delay(Duration::from_secs(5));
        second.descriptor = second.descriptor.timeout_ms(250);
        let control = control(vec![Arc::new(first), Arc::new(second)], config);

        let start = std::time::Instant::now();
        let outcome = control.run("req-3", "hello", None).await;
        assert!(start.elapsed() < Duration::from_millis(700));
        assert!(outcome.partial);
        assert!(outcome.timeout_hit);
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, RunEvent::DeadlineExceeded { .. })));
        assert_eq!(outcome.trace.current(), RunState::Finalize);
    }

    #[tokio::test]
    async fn test_failed_source_without_fallback_gets_neutral_default() {
        let broken = StubSource::new("broken", &[Field::USER_INPUT], &[Field::PASSAGES])
            .failing(SourceError::failure("boom"));
        let control = control(vec![Arc::new(broken)], EngineConfig::default());

        let outcome = control.run("req-4", "hello", None).await;
        assert_eq!(outcome.store.producer_of(Field::PASSAGES).as_deref(), Some(SCHEDULER_PRODUCER));
        assert!(outcome
            .events
            .iter()
            .any(|e| matches!(e, RunEvent::NeutralDefault { field } if field == "passages")));
        assert!(outcome
            .escalations
            .iter()
            .any(|e| matches!(e, Escalation::AgentFailure { agent, .. } if agent == "broken")));
    }

    #[tokio::test]
    async fn test_standard_run_phases_and_trace() {
        let control = standard(EngineConfig::default());
        let outcome = control
            .run("req-5", "I feel anxious, worried and full of panic and fear", None)
            .await;

        assert!(!outcome.partial);
        assert_eq!(outcome.phases.len(), 3);
        assert_eq!(outcome.phases[0].sources, vec!["theme_scorer", "progress_notifier"]);
        assert_eq!(outcome.phases[1].sources, vec!["passage_retriever", "theme_check"]);
        assert_eq!(outcome.phases[2].sources.len(), 1);
        let states = outcome.trace.states();
        assert_eq!(
            &states[..4],
            &[RunState::Init, RunState::Phase(1), RunState::Phase(2), RunState::Phase(3)]
        );
        assert!(states.contains(&RunState::QaCheck));
        assert!(outcome.trace.is_finalized());
        assert_eq!(outcome.store.producer_of(Field::ROUTE).as_deref(), Some(GATE_PRODUCER));
        assert_eq!(outcome.store.producer_of(Field::QUALITY_REPORT).as_deref(), Some(QA_PRODUCER));
        assert_eq!(outcome.attempts.len(), 1 + usize::from(!outcome.attempts[0].passed));
    }

    #[tokio::test]
    async fn test_stream_receives_one_event_per_phase() {
        let control = standard(EngineConfig::default());
        let (tx, mut rx) = crate::streaming::channel(16);
        let outcome = control.run("req-6", "What is quantum physics?", Some(&tx)).await;
        tx.fail("test over");

        let mut indices = Vec::new();
        while let Some(event) = rx.recv().await {
            if let crate::streaming::StreamEvent::Phase { index, fields } = event {
                assert!(!fields.is_empty());
                indices.push(index);
            }
        }
        assert_eq!(indices, (1..=outcome.phases.len()).collect::<Vec<_>>());
    }
}
