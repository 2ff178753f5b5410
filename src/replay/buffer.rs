//! Prioritized experience replay buffer.
//!
//! A bounded, priority-stratified sample of observed messages, with weighted
//! random sampling and outcome tracking. Bucket 0 is the highest priority;
//! eviction always starts from the lowest present bucket, removing
//! heavily-sampled, old entries first.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::config::ReplayConfig;
use crate::messaging::AgentMessage;

/// Number of recent entries included in a stats snapshot.
const STATS_RECENT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
}

/// An observed message retained for later inspection or training.
#[derive(Debug, Clone, Serialize)]
pub struct ExperienceEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Bucket index, 0 = highest priority.
    pub priority: usize,
    pub message: AgentMessage,
    pub outcome: Option<Outcome>,
    pub times_sampled: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayBufferStats {
    pub size: usize,
    pub success_rate: f64,
    pub priority_distribution: Vec<usize>,
    pub recent: Vec<ExperienceEntry>,
}

struct BufferState {
    entries: std::collections::HashMap<Uuid, ExperienceEntry>,
    /// Insertion order, oldest first.
    order: Vec<Uuid>,
    /// Entry ids per priority bucket.
    buckets: Vec<Vec<Uuid>>,
    successes: u64,
    failures: u64,
    rng: StdRng,
}

pub struct ReplayBuffer {
    max_size: usize,
    priority_levels: usize,
    alpha: f64,
    state: Mutex<BufferState>,
}

impl ReplayBuffer {
    pub fn new(config: ReplayConfig) -> Self {
        let priority_levels = config.priority_levels.max(1);
        Self {
            max_size: config.max_size,
            priority_levels,
            alpha: config.alpha,
            state: Mutex::new(BufferState {
                entries: std::collections::HashMap::new(),
                order: Vec::new(),
                buckets: vec![Vec::new(); priority_levels],
                successes: 0,
                failures: 0,
                rng: StdRng::from_entropy(),
            }),
        }
    }

    pub fn priority_levels(&self) -> usize {
        self.priority_levels
    }

    /// Add a message at the given priority (clamped into range), then
    /// enforce capacity.
    pub fn add(&self, message: AgentMessage, priority: usize) {
        let priority = priority.min(self.priority_levels - 1);
        let entry = ExperienceEntry {
            id: message.message_id,
            timestamp: Utc::now(),
            priority,
            message,
            outcome: None,
            times_sampled: 0,
        };

        let mut state = self.state.lock();
        if state.entries.contains_key(&entry.id) {
            debug!(id = %entry.id, "experience already recorded, skipping");
            return;
        }
        state.order.push(entry.id);
        state.buckets[priority].push(entry.id);
        state.entries.insert(entry.id, entry);
        self.enforce_max_size(&mut state);
    }

    /// Record the outcome of an experience identified by message id.
    /// Unknown ids are ignored (the message may have been evicted).
    pub fn update_outcome(&self, id: Uuid, success: bool) -> bool {
        let mut state = self.state.lock();
        let Some(entry) = state.entries.get_mut(&id) else {
            return false;
        };
        entry.outcome = Some(if success {
            Outcome::Success
        } else {
            Outcome::Failure
        });
        if success {
            state.successes += 1;
        } else {
            state.failures += 1;
        }
        true
    }

    /// Draw `count` entries with replacement, biased toward higher-priority
    /// buckets by weight `(priority_levels - i)^alpha`. An empty chosen
    /// bucket falls back to the next non-empty one, wrapping. Returns fewer
    /// than `count` only when the buffer is empty.
    pub fn sample(&self, count: usize) -> Vec<ExperienceEntry> {
        let mut state = self.state.lock();
        if state.order.is_empty() {
            return Vec::new();
        }

        let weights: Vec<f64> = (0..self.priority_levels)
            .map(|i| ((self.priority_levels - i) as f64).powf(self.alpha))
            .collect();
        let total: f64 = weights.iter().sum();

        let mut drawn = Vec::with_capacity(count);
        for _ in 0..count {
            let mut roll = state.rng.gen_range(0.0..total);
            let mut chosen = self.priority_levels - 1;
            for (i, weight) in weights.iter().enumerate() {
                if roll < *weight {
                    chosen = i;
                    break;
                }
                roll -= weight;
            }

            let Some(bucket) = (0..self.priority_levels)
                .map(|offset| (chosen + offset) % self.priority_levels)
                .find(|idx| !state.buckets[*idx].is_empty())
            else {
                break;
            };

            let bucket_len = state.buckets[bucket].len();
            let pick = state.rng.gen_range(0..bucket_len);
            let id = state.buckets[bucket][pick];
            let entry = state
                .entries
                .get_mut(&id)
                .expect("bucket ids always present in entry map");
            entry.times_sampled += 1;
            drawn.push(entry.clone());
        }
        drawn
    }

    pub fn len(&self) -> usize {
        self.state.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().order.is_empty()
    }

    /// Successes over recorded outcomes; `0.0` when none recorded yet.
    pub fn success_rate(&self) -> f64 {
        let state = self.state.lock();
        let total = state.successes + state.failures;
        if total == 0 {
            return 0.0;
        }
        state.successes as f64 / total as f64
    }

    /// Entry count per priority bucket.
    pub fn priority_distribution(&self) -> Vec<usize> {
        let state = self.state.lock();
        state.buckets.iter().map(Vec::len).collect()
    }

    /// The `n` most recent entries, newest first.
    pub fn recent(&self, n: usize) -> Vec<ExperienceEntry> {
        let state = self.state.lock();
        state
            .order
            .iter()
            .rev()
            .take(n)
            .map(|id| state.entries[id].clone())
            .collect()
    }

    /// Up to `n` entries matching `predicate`, newest first.
    pub fn filtered<F>(&self, predicate: F, n: usize) -> Vec<ExperienceEntry>
    where
        F: Fn(&ExperienceEntry) -> bool,
    {
        let state = self.state.lock();
        state
            .order
            .iter()
            .rev()
            .map(|id| &state.entries[id])
            .filter(|entry| predicate(entry))
            .take(n)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.order.clear();
        for bucket in &mut state.buckets {
            bucket.clear();
        }
        state.successes = 0;
        state.failures = 0;
    }

    pub fn stats(&self) -> ReplayBufferStats {
        ReplayBufferStats {
            size: self.len(),
            success_rate: self.success_rate(),
            priority_distribution: self.priority_distribution(),
            recent: self.recent(STATS_RECENT),
        }
    }

    /// Evict while over capacity: lowest present bucket first, and within a
    /// bucket the most-sampled entry, ties broken by oldest timestamp.
    fn enforce_max_size(&self, state: &mut BufferState) {
        while state.order.len() > self.max_size {
            let Some(bucket_idx) = (0..self.priority_levels)
                .rev()
                .find(|idx| !state.buckets[*idx].is_empty())
            else {
                return;
            };

            let victim = state.buckets[bucket_idx]
                .iter()
                .max_by(|a, b| {
                    let ea = &state.entries[*a];
                    let eb = &state.entries[*b];
                    ea.times_sampled
                        .cmp(&eb.times_sampled)
                        .then(eb.timestamp.cmp(&ea.timestamp))
                })
                .copied()
                .expect("bucket checked non-empty");

            state.buckets[bucket_idx].retain(|id| *id != victim);
            state.order.retain(|id| *id != victim);
            state.entries.remove(&victim);
            debug!(id = %victim, bucket = bucket_idx, "evicted experience");
        }
    }
}
