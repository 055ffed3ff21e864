//! One ingestion cycle: fetch, normalize, resolve, upsert, then sweep
//!
//! Per provider:
//! 1. List tracked creators from the store
//! 2. Chunk their handles (input order preserved) and fetch the chunks with
//!    bounded parallelism; every request goes through the provider's shared
//!    rate limiter
//! 3. Process the chunks in their original order: each handle the provider
//!    reported is normalized, resolved to an event and upserted
//!
//! Then the composition feed is drained and the sweeper runs.
//!
//! Failures are isolated: a failed chunk is logged and skipped, a failed
//! upsert is logged with the entity identity and the cycle moves on.

use super::comps_feed::CompositionFeed;
use super::normalizer::normalize;
use super::resolver::{EventMapping, EventResolver};
use super::sweeper::StalenessSweeper;
use super::types::{CoStreamUpsert, EventRef};
use crate::clock::Clock;
use crate::provider::{chunk, ProviderError, ProviderPayload, StreamProvider};
use crate::store::{IngestStore, TrackedCreator};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    /// Handles per provider call, capped by the provider's own maximum
    pub batch_size: usize,
    /// Provider calls in flight at once within one cycle
    pub parallelism: usize,
    /// Game assigned to events the resolver has to invent
    pub default_game: String,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            batch_size: crate::provider::MAX_BATCH,
            parallelism: 2,
            default_game: "val".to_string(),
        }
    }
}

/// Counters for one cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub batches_ok: usize,
    pub batches_failed: usize,
    /// Handles the providers reported
    pub signals: usize,
    pub upserts_ok: usize,
    pub upserts_failed: usize,
    pub comps_ok: usize,
    pub comps_failed: usize,
    pub swept: usize,
}

type BatchResult = Result<HashMap<String, ProviderPayload>, ProviderError>;

pub struct IngestionCycle {
    store: Arc<dyn IngestStore>,
    clock: Arc<dyn Clock>,
    providers: Vec<Arc<dyn StreamProvider>>,
    feed: Option<Arc<dyn CompositionFeed>>,
    sweeper: StalenessSweeper,
    settings: IngestionSettings,
}

impl IngestionCycle {
    pub fn new(
        store: Arc<dyn IngestStore>,
        clock: Arc<dyn Clock>,
        sweeper: StalenessSweeper,
        settings: IngestionSettings,
    ) -> Self {
        Self {
            store,
            clock,
            providers: Vec::new(),
            feed: None,
            sweeper,
            settings,
        }
    }

    pub fn with_provider(mut self, provider: Arc<dyn StreamProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_feed(mut self, feed: Arc<dyn CompositionFeed>) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Run one full cycle. Never fails as a whole; see the report.
    pub async fn run_once(&self) -> CycleReport {
        let started = std::time::Instant::now();
        let mut report = CycleReport::default();
        let now = self.clock.now();

        // Without the mapping every creator would land on the fallback event
        match self.store.event_mapping(now).await {
            Ok(mapping) => self.ingest_providers(mapping, now, &mut report).await,
            Err(e) => log::error!("❌ Failed to load event mapping, skipping provider ingestion: {}", e),
        }

        self.ingest_compositions(&mut report).await;

        match self.sweeper.run().await {
            Ok(swept) => report.swept = swept,
            Err(e) => log::error!("❌ Staleness sweep failed: {}", e),
        }

        log::info!(
            "📊 Cycle done in {:?}: batches {}/{} ok, {} signals, {} upserts ({} failed), {} comps ({} failed), {} swept",
            started.elapsed(),
            report.batches_ok,
            report.batches_ok + report.batches_failed,
            report.signals,
            report.upserts_ok,
            report.upserts_failed,
            report.comps_ok,
            report.comps_failed,
            report.swept
        );

        report
    }

    async fn ingest_providers(&self, mapping: EventMapping, now: i64, report: &mut CycleReport) {
        let resolver = EventResolver::new(mapping, self.settings.default_game.clone());

        for provider in &self.providers {
            let platform = provider.platform().to_string();

            let creators = match self.store.tracked_creators(&platform).await {
                Ok(creators) => creators,
                Err(e) => {
                    log::error!("❌ Failed to list {} creators: {}", platform, e);
                    continue;
                }
            };

            if creators.is_empty() {
                log::debug!("   ├─ No tracked {} creators", platform);
                continue;
            }

            let handles: Vec<String> = creators.iter().map(|c| c.handle.clone()).collect();
            let by_handle: HashMap<&str, &TrackedCreator> =
                creators.iter().map(|c| (c.handle.as_str(), c)).collect();

            let size = self.settings.batch_size.min(provider.max_batch()).max(1);
            let batches = chunk(&handles, size);
            let results = self.fetch_batches(provider, &batches).await;

            for (batch, result) in batches.iter().zip(results) {
                let payloads = match result {
                    Ok(payloads) => {
                        report.batches_ok += 1;
                        payloads
                    }
                    Err(e) => {
                        report.batches_failed += 1;
                        log::warn!(
                            "⚠️  Skipping {} batch of {} handles (first: {}): {}",
                            platform,
                            batch.len(),
                            batch.first().map(String::as_str).unwrap_or(""),
                            e
                        );
                        continue;
                    }
                };

                for handle in batch {
                    let Some(payload) = payloads.get(handle) else {
                        continue;
                    };
                    report.signals += 1;

                    let creator = by_handle.get(handle.as_str()).copied();
                    let upsert = self.build_upsert(provider.as_ref(), &resolver, handle, payload, creator, now);

                    match self.store.write_co_stream(&upsert).await {
                        Ok(()) => report.upserts_ok += 1,
                        Err(e) => {
                            report.upserts_failed += 1;
                            log::error!(
                                "❌ Upsert failed for {}:{} -> {}: {}",
                                upsert.platform,
                                upsert.handle,
                                upsert.event.slug,
                                e
                            );
                        }
                    }
                }
            }
        }
    }

    /// Fetch all batches, at most `parallelism` at a time. Results come back
    /// in batch order.
    async fn fetch_batches(
        &self,
        provider: &Arc<dyn StreamProvider>,
        batches: &[Vec<String>],
    ) -> Vec<BatchResult> {
        let permits = Arc::new(Semaphore::new(self.settings.parallelism.max(1)));
        let mut tasks = JoinSet::new();

        for (idx, batch) in batches.iter().enumerate() {
            let provider = Arc::clone(provider);
            let permits = Arc::clone(&permits);
            let batch = batch.clone();

            tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => provider.fetch_live(&batch).await,
                    Err(_) => Err(ProviderError::Cancelled),
                };
                (idx, result)
            });
        }

        let mut slots: Vec<Option<BatchResult>> = (0..batches.len()).map(|_| None).collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((idx, result)) => slots[idx] = Some(result),
                Err(e) => log::error!("❌ Fetch task failed: {}", e),
            }
        }

        slots
            .into_iter()
            .map(|slot| slot.unwrap_or(Err(ProviderError::Cancelled)))
            .collect()
    }

    fn build_upsert(
        &self,
        provider: &dyn StreamProvider,
        resolver: &EventResolver,
        handle: &str,
        payload: &ProviderPayload,
        creator: Option<&TrackedCreator>,
        now: i64,
    ) -> CoStreamUpsert {
        let signal = normalize(provider.platform(), handle, payload);
        let event = resolver.resolve(&signal.platform, &signal.handle, &signal.lang, now);

        CoStreamUpsert {
            event: EventRef {
                slug: event.slug,
                title: event.title,
                game: event.game,
                league: event.league,
                starts_at: None,
            },
            url: provider.channel_url(&signal.handle),
            lang: signal.lang,
            country: creator.map(|c| c.country.clone()).unwrap_or_default(),
            verified: creator.map(|c| c.verified).unwrap_or(false),
            viewers: signal.viewers,
            is_live: signal.is_live,
            platform: signal.platform,
            handle: signal.handle,
        }
    }

    async fn ingest_compositions(&self, report: &mut CycleReport) {
        let Some(feed) = &self.feed else {
            return;
        };

        let batch = match feed.drain() {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("❌ Failed to read composition feed: {}", e);
                return;
            }
        };

        report.comps_failed += batch.rejected;

        for comp in &batch.samples {
            match self.store.write_composition(comp).await {
                Ok(()) => report.comps_ok += 1,
                Err(e) => {
                    report.comps_failed += 1;
                    log::error!(
                        "❌ Composition upsert failed for {}/{}/{}/{} {}/{}: {}",
                        comp.game,
                        comp.region,
                        comp.league,
                        comp.patch,
                        comp.map,
                        comp.side,
                        e
                    );
                }
            }
        }
    }
}
