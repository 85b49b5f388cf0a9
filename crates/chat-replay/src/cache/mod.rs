pub mod config;
pub mod fingerprint;
pub mod store;

pub use config::{CacheConfig, CacheMode};
pub use fingerprint::fingerprint;
pub use store::{CacheStore, JsonDirStore, MemoryStore, PersistedCache, PersistedEntry};

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::Utc;
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::{
    ChatError, ExampleInput, History, ProducerResult, ReplayMode, ResponseProducer,
    validate_examples,
};

/// A built example: its inputs and the producer output, stored verbatim.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExampleEntry {
    pub inputs: ExampleInput,
    pub output: ProducerResult,
}

/// Observable state of one example slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotStatus {
    Empty,
    Building,
    Ready,
    Failed,
}

#[derive(Debug, Default)]
enum SlotState {
    #[default]
    Empty,
    Building,
    Ready(ExampleEntry),
    Failed(ChatError),
}

impl SlotState {
    fn status(&self) -> SlotStatus {
        match self {
            SlotState::Empty => SlotStatus::Empty,
            SlotState::Building => SlotStatus::Building,
            SlotState::Ready(_) => SlotStatus::Ready,
            SlotState::Failed(_) => SlotStatus::Failed,
        }
    }
}

/// One example's state plus the lock that serializes its population.
#[derive(Default)]
struct Slot {
    state: RwLock<SlotState>,
    populate: Mutex<()>,
}

impl Slot {
    fn read(&self) -> RwLockReadGuard<'_, SlotState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlotState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Counts from one [`ExampleCache::build`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub ready: usize,
    pub failed: usize,
    /// Ready slots taken from the store instead of invoking the producer.
    pub restored: usize,
}

/// Precomputed producer output for a fixed list of examples.
///
/// Slots are addressed by position in the example list, so duplicate inputs are
/// cached independently. Each slot moves `Empty -> Building -> Ready | Failed` and
/// stays there until the configuration changes or [`rebuild`](Self::rebuild) is
/// called. An entry is published only after the producer has fully finished, so
/// readers never see a partial stream.
pub struct ExampleCache {
    examples: Vec<ExampleInput>,
    producer: Arc<ResponseProducer>,
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    fingerprint: String,
    slots: Vec<Slot>,
    /// Orders store writes so a later snapshot is never overwritten by an older one.
    persisting: Mutex<()>,
}

impl ExampleCache {
    /// Creates an empty cache. Nothing is invoked until `build` or `load_or_build`.
    pub fn new(
        examples: Vec<ExampleInput>,
        producer: Arc<ResponseProducer>,
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
    ) -> Result<Self, ChatError> {
        validate_examples(producer.schema(), &examples)?;
        let fingerprint = fingerprint(&producer, &examples);
        let slots = empty_slots(examples.len());
        debug!(
            producer = producer.name(),
            examples = examples.len(),
            fingerprint = %short(&fingerprint),
            "example cache created"
        );

        Ok(Self {
            examples,
            producer,
            config,
            store,
            fingerprint,
            slots,
            persisting: Mutex::new(()),
        })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[ExampleInput] {
        &self.examples
    }

    pub fn producer(&self) -> &Arc<ResponseProducer> {
        &self.producer
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `None` when `index` is out of range.
    pub fn status(&self, index: usize) -> Option<SlotStatus> {
        self.slots.get(index).map(|slot| slot.read().status())
    }

    /// Builds every empty slot, at most `concurrency_limit` at a time.
    ///
    /// Slots found in the store under the current fingerprint are restored
    /// instead of re-invoked. Producer failures mark their slot `Failed` and are
    /// counted in the report; only store errors fail the call.
    #[tracing::instrument(
        name = "chat_replay.cache.build",
        level = "debug",
        skip(self),
        fields(
            examples = self.examples.len(),
            concurrency = self.config.concurrency_limit,
            fingerprint = %short(&self.fingerprint)
        )
    )]
    pub async fn build(&self) -> Result<BuildReport, ChatError> {
        let restored = self.restore().await?;
        let limit = self.config.concurrency_limit.max(1);

        let statuses: Vec<SlotStatus> = stream::iter(0..self.examples.len())
            .map(|index| self.populate(index))
            .buffer_unordered(limit)
            .collect()
            .await;

        let report = BuildReport {
            ready: statuses.iter().filter(|s| **s == SlotStatus::Ready).count(),
            failed: statuses.iter().filter(|s| **s == SlotStatus::Failed).count(),
            restored,
        };

        if report.ready > restored {
            self.persist().await?;
        }
        debug!(
            ready = report.ready,
            failed = report.failed,
            restored = report.restored,
            "example cache built"
        );
        Ok(report)
    }

    /// Returns the cached result for `index`.
    ///
    /// A failed slot returns its failure again on every call.
    #[tracing::instrument(name = "chat_replay.cache.load", level = "trace", skip(self))]
    pub fn load(&self, index: usize) -> Result<ProducerResult, ChatError> {
        self.load_entry(index).map(|entry| entry.output)
    }

    pub fn load_entry(&self, index: usize) -> Result<ExampleEntry, ChatError> {
        let slot = self.slot(index)?;
        let state = slot.read();
        match &*state {
            SlotState::Ready(entry) => {
                trace!(frames = entry.output.frames().len(), "cache hit");
                Ok(entry.clone())
            }
            SlotState::Failed(err) => Err(err.clone()),
            SlotState::Empty | SlotState::Building => Err(ChatError::CacheNotBuilt { index }),
        }
    }

    pub fn replay(&self, index: usize, mode: ReplayMode) -> Result<Vec<String>, ChatError> {
        self.load(index).map(|result| result.replay(mode))
    }

    /// Builds `index` if its slot is empty, waiting for an in-flight build, then loads it.
    pub async fn load_or_build(&self, index: usize) -> Result<ProducerResult, ChatError> {
        self.slot(index)?;
        if self.populate(index).await == SlotStatus::Ready
            && let Err(err) = self.persist().await
        {
            warn!(index, error = %err, "failed to persist lazily built example");
        }
        self.load(index)
    }

    /// Swaps in a new configuration and returns whether anything changed.
    ///
    /// Every slot is reset to `Empty` when the fingerprint differs or when
    /// `producer` is a different instance than the current one. In the latter
    /// case the fingerprint can't tell the two functions apart, so the persisted
    /// document is dropped too.
    pub async fn reconfigure(
        &mut self,
        examples: Vec<ExampleInput>,
        producer: Arc<ResponseProducer>,
    ) -> Result<bool, ChatError> {
        validate_examples(producer.schema(), &examples)?;
        let next = fingerprint(&producer, &examples);
        let same_producer = Arc::ptr_eq(&self.producer, &producer);
        if next == self.fingerprint && same_producer {
            return Ok(false);
        }

        if next == self.fingerprint {
            debug!(
                fingerprint = %short(&next),
                "producer replaced under the same fingerprint, resetting"
            );
            self.store.remove(&next).await?;
        } else {
            debug!(
                from = %short(&self.fingerprint),
                to = %short(&next),
                "cache configuration changed, resetting"
            );
        }

        self.slots = empty_slots(examples.len());
        self.examples = examples;
        self.producer = producer;
        self.fingerprint = next;
        Ok(true)
    }

    /// Sets every slot back to `Empty`.
    pub fn reset(&mut self) {
        self.slots = empty_slots(self.examples.len());
    }

    /// Discards the persisted document, resets, and builds from scratch.
    pub async fn rebuild(&mut self) -> Result<BuildReport, ChatError> {
        self.store.remove(&self.fingerprint).await?;
        self.reset();
        self.build().await
    }

    fn slot(&self, index: usize) -> Result<&Slot, ChatError> {
        self.slots.get(index).ok_or(ChatError::IndexOutOfRange {
            index,
            len: self.examples.len(),
        })
    }

    async fn populate(&self, index: usize) -> SlotStatus {
        let slot = &self.slots[index];
        let _populating = slot.populate.lock().await;
        {
            let mut state = slot.write();
            if !matches!(*state, SlotState::Empty) {
                return state.status();
            }
            *state = SlotState::Building;
        }

        let inputs = &self.examples[index];
        let next = match self
            .producer
            .produce(&inputs.message, &History::new(), &inputs.extras)
            .await
        {
            Ok(output) => {
                trace!(index, frames = output.frames().len(), "example built");
                SlotState::Ready(ExampleEntry {
                    inputs: inputs.clone(),
                    output,
                })
            }
            Err(err) => {
                warn!(index, error = %err, "example failed to build");
                SlotState::Failed(err)
            }
        };

        let status = next.status();
        *slot.write() = next;
        status
    }

    async fn restore(&self) -> Result<usize, ChatError> {
        let Some(document) = self.store.load(&self.fingerprint).await? else {
            return Ok(0);
        };

        let mut restored = 0;
        for entry in document.entries {
            let Some(slot) = self.slots.get(entry.index) else {
                continue;
            };
            if entry.inputs != self.examples[entry.index] {
                warn!(index = entry.index, "persisted entry inputs differ, skipping");
                continue;
            }
            let mut state = slot.write();
            if matches!(*state, SlotState::Empty) {
                *state = SlotState::Ready(ExampleEntry {
                    inputs: entry.inputs,
                    output: entry.output,
                });
                restored += 1;
            }
        }

        debug!(restored, "examples restored from store");
        Ok(restored)
    }

    async fn persist(&self) -> Result<(), ChatError> {
        let _persisting = self.persisting.lock().await;
        let entries: Vec<PersistedEntry> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match &*slot.read() {
                SlotState::Ready(entry) => Some(PersistedEntry {
                    index,
                    inputs: entry.inputs.clone(),
                    output: entry.output.clone(),
                }),
                _ => None,
            })
            .collect();

        self.store
            .save(&PersistedCache {
                fingerprint: self.fingerprint.clone(),
                created_at: Utc::now(),
                entries,
            })
            .await
    }
}

fn empty_slots(len: usize) -> Vec<Slot> {
    (0..len).map(|_| Slot::default()).collect()
}

fn short(fingerprint: &str) -> &str {
    crate::utils::truncate(fingerprint, 12)
}
