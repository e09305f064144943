// crates/core/src/governor.rs
//! Resource governor: per-producer rate limiting over a fixed one-second
//! window with burst capacity and strategy-driven backoff, plus capacity
//! pools with priority-aware preemption.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use redline_types::{GovernorConfig, GovernorError};
use tracing::{debug, warn};

/// Fixed admission window.
fn window() -> Duration {
    Duration::milliseconds(1000)
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    /// Denied; retry no earlier than `backoff_ms` after the last request.
    Denied { backoff_ms: u64 },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Mutable per-producer limiter state.
#[derive(Debug, Clone)]
pub struct ProducerState {
    pub request_count: u32,
    pub window_start: DateTime<Utc>,
    pub backoff_level: u32,
    pub last_request: DateTime<Utc>,
    pub is_throttled: bool,
    /// Backoff computed when throttling engaged; the exit threshold.
    pub current_backoff_ms: u64,
}

impl ProducerState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            request_count: 0,
            window_start: now,
            backoff_level: 0,
            last_request: now,
            is_throttled: false,
            current_backoff_ms: 0,
        }
    }
}

/// The governor proper. Owned by the pipeline; all methods take `now`
/// explicitly so behavior is deterministic under test.
#[derive(Debug, Default)]
pub struct ResourceGovernor {
    default_config: GovernorConfig,
    per_producer: HashMap<String, GovernorConfig>,
    states: HashMap<String, ProducerState>,
}

impl ResourceGovernor {
    pub fn new(default_config: GovernorConfig) -> Self {
        Self {
            default_config,
            per_producer: HashMap::new(),
            states: HashMap::new(),
        }
    }

    /// Install a producer-specific limit, replacing the default for that
    /// producer from the next request on.
    pub fn set_producer_config(&mut self, producer: impl Into<String>, config: GovernorConfig) {
        self.per_producer.insert(producer.into(), config);
    }

    pub fn config_for(&self, producer: &str) -> &GovernorConfig {
        self.per_producer.get(producer).unwrap_or(&self.default_config)
    }

    pub fn state(&self, producer: &str) -> Option<&ProducerState> {
        self.states.get(producer)
    }

    /// Admit or deny one request from `producer` arriving at `now`.
    pub fn admit(&mut self, producer: &str, now: DateTime<Utc>) -> Admission {
        let config = self
            .per_producer
            .get(producer)
            .unwrap_or(&self.default_config)
            .clone();
        let state = self
            .states
            .entry(producer.to_string())
            .or_insert_with(|| ProducerState::new(now));

        // Backoff exit: a request arriving a full backoff after the last
        // one ends throttling and steps the level back down.
        if state.is_throttled {
            let waited = now - state.last_request;
            if waited >= Duration::milliseconds(state.current_backoff_ms as i64) {
                state.is_throttled = false;
                state.backoff_level = state.backoff_level.saturating_sub(1);
                state.window_start = now;
                state.request_count = 0;
                debug!(producer, level = state.backoff_level, "backoff exited");
            } else {
                state.last_request = now;
                return Admission::Denied {
                    backoff_ms: state.current_backoff_ms,
                };
            }
        }

        // Fixed one-second window.
        if now - state.window_start >= window() {
            state.window_start = now;
            state.request_count = 0;
        }
        state.last_request = now;

        let within_rate = state.request_count < config.max_requests_per_second;
        let within_burst = state.request_count < config.burst_capacity && !state.is_throttled;
        if within_rate || within_burst {
            state.request_count += 1;
            return Admission::Admitted;
        }

        // Throttle: compute backoff at the current level, then escalate.
        let backoff_ms = config
            .backoff_strategy
            .backoff_ms(config.base_backoff_ms, state.backoff_level);
        state.is_throttled = true;
        state.backoff_level += 1;
        state.current_backoff_ms = backoff_ms;
        warn!(
            producer,
            backoff_ms,
            level = state.backoff_level,
            "producer throttled"
        );
        Admission::Denied { backoff_ms }
    }

    /// The error surfaced per change for a denied submission.
    pub fn denial_error(&self, producer: &str, backoff_ms: u64) -> GovernorError {
        GovernorError::RateLimitExceeded {
            producer: producer.to_string(),
            backoff_ms,
        }
    }
}

/// One producer's hold on pool capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub producer: String,
    pub amount: u64,
    /// 1 is highest, 5 lowest — same scale as submission priority.
    pub priority: u8,
}

/// A producer preempted to make room for a stronger allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preempted {
    pub producer: String,
    pub amount: u64,
}

/// Capacity/available/allocations model for CPU, memory, or network
/// budget. Higher-priority requests may preempt weaker holders.
#[derive(Debug, Clone)]
pub struct ResourcePool {
    name: String,
    capacity: u64,
    available: u64,
    allocations: Vec<Allocation>,
}

impl ResourcePool {
    pub fn new(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            name: name.into(),
            capacity,
            available: capacity,
            allocations: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn available(&self) -> u64 {
        self.available
    }

    pub fn allocated_to(&self, producer: &str) -> u64 {
        self.allocations
            .iter()
            .filter(|a| a.producer == producer)
            .map(|a| a.amount)
            .sum()
    }

    /// Allocate `amount` at `priority`. When free capacity is short,
    /// strictly lower-priority allocations are preempted (weakest first)
    /// until the request fits; preempted producers are returned so the
    /// caller can notify them.
    pub fn allocate(
        &mut self,
        producer: impl Into<String>,
        amount: u64,
        priority: u8,
    ) -> Result<Vec<Preempted>, GovernorError> {
        let producer = producer.into();
        if amount > self.capacity {
            return Err(GovernorError::ResourceExhausted {
                pool: self.name.clone(),
                requested: amount,
                available: self.available,
            });
        }

        let mut preempted = Vec::new();
        if self.available < amount {
            // Weakest allocations first; stable order within a priority.
            let mut victims: Vec<usize> = (0..self.allocations.len())
                .filter(|&i| self.allocations[i].priority > priority)
                .collect();
            victims.sort_by_key(|&i| std::cmp::Reverse(self.allocations[i].priority));

            let mut reclaimable = self.available;
            let mut chosen = Vec::new();
            for i in victims {
                if reclaimable >= amount {
                    break;
                }
                reclaimable += self.allocations[i].amount;
                chosen.push(i);
            }
            if reclaimable < amount {
                return Err(GovernorError::ResourceExhausted {
                    pool: self.name.clone(),
                    requested: amount,
                    available: self.available,
                });
            }
            chosen.sort_unstable_by(|a, b| b.cmp(a));
            for i in chosen {
                let victim = self.allocations.remove(i);
                self.available += victim.amount;
                warn!(
                    pool = %self.name,
                    producer = %victim.producer,
                    amount = victim.amount,
                    "allocation preempted"
                );
                preempted.push(Preempted {
                    producer: victim.producer,
                    amount: victim.amount,
                });
            }
        }

        self.available -= amount;
        self.allocations.push(Allocation {
            producer,
            amount,
            priority,
        });
        Ok(preempted)
    }

    /// Release every allocation held by `producer`; returns the amount
    /// freed.
    pub fn release(&mut self, producer: &str) -> u64 {
        let mut freed = 0;
        self.allocations.retain(|a| {
            if a.producer == producer {
                freed += a.amount;
                false
            } else {
                true
            }
        });
        self.available += freed;
        freed
    }
}
