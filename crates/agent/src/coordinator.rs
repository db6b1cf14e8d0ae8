use crate::generator::ReplyGenerator;
use crate::race::{DeadlineRace, GenerationResult, PendingReply, RaceOutcome};
use quickreply_core::cache::ResponseCache;
use quickreply_core::dedup::DedupStore;
use quickreply_core::delivery::OutOfBandDelivery;
use quickreply_core::metrics::MetricsStore;
use quickreply_core::types::{InboundEvent, Reply};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// What happens to a reply that misses the deadline. Exactly one strategy is
/// active per deployment.
#[derive(Clone)]
pub enum LateReplyStrategy {
    /// Acknowledge immediately and push the reply through the platform's
    /// out-of-band channel once it is ready.
    Push { delivery: Arc<dyn OutOfBandDelivery> },
    /// Answer with `placeholder` and cache the reply so a resend from the same
    /// sender is answered instantly.
    CacheForResend { placeholder: String },
}

impl LateReplyStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            LateReplyStrategy::Push { .. } => "push",
            LateReplyStrategy::CacheForResend { .. } => "cache_for_resend",
        }
    }

    fn placeholder(&self) -> CoordinatorResponse {
        match self {
            LateReplyStrategy::Push { .. } => CoordinatorResponse::Acknowledge,
            LateReplyStrategy::CacheForResend { placeholder } => {
                CoordinatorResponse::Reply(Reply::text(placeholder.clone()))
            }
        }
    }
}

/// Synchronous answer for the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorResponse {
    Reply(Reply),
    /// The platform's neutral "received, nothing to say" answer.
    Acknowledge,
}

/// Outcome of handling one event.
#[derive(Debug)]
pub struct Handled {
    pub response: CoordinatorResponse,
    /// Continuation for a reply that missed the deadline. Dropping it does not
    /// stop the continuation.
    pub background: Option<JoinHandle<()>>,
}

impl Handled {
    fn now(response: CoordinatorResponse) -> Self {
        Self {
            response,
            background: None,
        }
    }
}

/// Per-event orchestration: cache fast path, dedup, deadline race, and the
/// late-reply continuation.
///
/// Each event is processed on its own task, so a caller that stops waiting
/// (a dropped request) never loses a reply that is still being generated.
#[derive(Clone)]
pub struct EventCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    dedup: Arc<DedupStore>,
    cache: Arc<ResponseCache>,
    generator: Arc<dyn ReplyGenerator>,
    race: DeadlineRace,
    strategy: LateReplyStrategy,
    fallback_text: String,
    metrics: Arc<MetricsStore>,
}

impl EventCoordinator {
    pub fn new(
        dedup: Arc<DedupStore>,
        cache: Arc<ResponseCache>,
        generator: Arc<dyn ReplyGenerator>,
        deadline: Duration,
        strategy: LateReplyStrategy,
        fallback_text: String,
        metrics: Arc<MetricsStore>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                dedup,
                cache,
                generator,
                race: DeadlineRace::new(deadline),
                strategy,
                fallback_text,
                metrics,
            }),
        }
    }

    pub fn dedup(&self) -> &Arc<DedupStore> {
        &self.inner.dedup
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.inner.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsStore> {
        &self.inner.metrics
    }

    pub fn strategy(&self) -> &LateReplyStrategy {
        &self.inner.strategy
    }

    pub fn deadline(&self) -> Duration {
        self.inner.race.deadline()
    }

    /// Handle one inbound event. Dropping the returned future does not stop
    /// processing: the race and any late-reply continuation still run to
    /// completion.
    pub async fn handle(&self, event: InboundEvent) -> Handled {
        let inner = self.inner.clone();
        match tokio::spawn(async move { inner.process(event).await }).await {
            Ok(handled) => handled,
            Err(e) => {
                error!(error = %e, "event processing task failed");
                Handled::now(CoordinatorResponse::Reply(Reply::text(
                    self.inner.fallback_text.clone(),
                )))
            }
        }
    }
}

impl Inner {
    async fn process(&self, event: InboundEvent) -> Handled {
        self.metrics.inc_events_in();
        let key = event.cache_key();
        let sender = event.sender_id().to_string();

        if let Some(reply) = self.cache.lookup(&key).await {
            self.metrics.inc_cache_hits();
            info!(sender = %sender, "answered from response cache");
            return Handled::now(CoordinatorResponse::Reply(reply));
        }

        if self.dedup.check_and_mark(event.event_id()).await {
            self.metrics.inc_duplicates();
            info!(
                sender = %sender,
                event_id = event.event_id().unwrap_or_default(),
                "duplicate delivery acknowledged without generating"
            );
            return Handled::now(CoordinatorResponse::Acknowledge);
        }

        let generator = self.generator.clone();
        let outcome = self
            .race
            .run(async move { generator.generate(&event).await })
            .await;

        match outcome {
            RaceOutcome::Completed(result) => {
                self.metrics.inc_replies_in_time();
                let reply = match settle(result, &self.fallback_text, &self.metrics) {
                    Settled::Generated(reply) => {
                        self.cache.store(&key, reply.clone()).await;
                        reply
                    }
                    Settled::Fallback(reply) => reply,
                };
                debug!(sender = %sender, "replied within deadline");
                Handled::now(CoordinatorResponse::Reply(reply))
            }
            RaceOutcome::TimedOut(pending) => {
                self.metrics.inc_replies_timed_out();
                info!(
                    sender = %sender,
                    deadline_ms = self.race.deadline().as_millis() as u64,
                    strategy = self.strategy.name(),
                    "deadline reached, deferring reply"
                );
                let background = self.spawn_late_reply(pending, key, sender);
                Handled {
                    response: self.strategy.placeholder(),
                    background: Some(background),
                }
            }
        }
    }

    /// Attach the single continuation for a generation that missed the
    /// deadline.
    fn spawn_late_reply(&self, pending: PendingReply, key: String, sender: String) -> JoinHandle<()> {
        let strategy = self.strategy.clone();
        let cache = self.cache.clone();
        let metrics = self.metrics.clone();
        let fallback_text = self.fallback_text.clone();

        tokio::spawn(async move {
            let settled = settle(pending.wait().await, &fallback_text, &metrics);
            metrics.inc_late_completions();

            match strategy {
                LateReplyStrategy::Push { delivery } => {
                    let reply = settled.into_reply();
                    match delivery.deliver(&sender, &reply).await {
                        Ok(()) => info!(sender = %sender, "late reply pushed out of band"),
                        Err(e) => {
                            metrics.inc_deliveries_failed();
                            error!(sender = %sender, error = %e, "out-of-band delivery failed");
                        }
                    }
                }
                LateReplyStrategy::CacheForResend { .. } => match settled {
                    Settled::Generated(reply) => {
                        cache.store(&key, reply).await;
                        info!(sender = %sender, "late reply cached for resend");
                    }
                    Settled::Fallback(_) => {
                        debug!(sender = %sender, "late generation failed, nothing cached");
                    }
                },
            }
        })
    }
}

enum Settled {
    Generated(Reply),
    Fallback(Reply),
}

impl Settled {
    fn into_reply(self) -> Reply {
        match self {
            Settled::Generated(reply) | Settled::Fallback(reply) => reply,
        }
    }
}

/// Fallback replies are never cached so a retry gets a fresh attempt.
fn settle(result: GenerationResult, fallback_text: &str, metrics: &MetricsStore) -> Settled {
    match result {
        Ok(reply) if !reply.is_empty() => Settled::Generated(reply),
        Ok(_) => {
            metrics.inc_generation_failures();
            warn!("generation produced an empty reply, using fallback");
            Settled::Fallback(Reply::text(fallback_text))
        }
        Err(e) => {
            metrics.inc_generation_failures();
            warn!(error = %e, "generation failed, using fallback");
            Settled::Fallback(Reply::text(fallback_text))
        }
    }
}
