//! # Decoder resource pool (C5)
//!
//! Shares a bounded set of hardware decoder instances across channels under
//! one of five strategies (spec §4.5, §6.4 `DecoderPoolStrategy`). A pool
//! holds per-codec slots; acquiring a slot for a channel either reuses a free
//! one, grows the pool (when dynamic allocation is enabled and the
//! configured ceiling allows it), or — under `PriorityBased`/`LoadBalanced`
//! with preemption enabled — reclaims a slot from a lower-priority channel.

use crate::collab::{CodecType, HardwareDecoderFactory};
use crate::config::{DecoderPoolConfig, DecoderPoolStrategy};
use crate::decoder::DecoderSession;
use crate::error::{AnalyticsError, Result};
use crate::events::{Event, EventSink};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

struct Slot {
    decoder: Arc<DecoderSession>,
    owner: Option<u8>,
    owner_priority: u8,
    freed_at: Instant,
}

struct PoolInner {
    slots: HashMap<CodecType, Vec<Slot>>,
    per_channel_counts: HashMap<u8, u32>,
}

/// Point-in-time counts the health monitor and host API can read.
#[derive(Debug, Clone, Default)]
pub struct DecoderPoolStats {
    pub total_slots: usize,
    pub in_use: usize,
    pub idle: usize,
    pub preemptions: u64,
    pub expansions: u64,
    pub shrinks: u64,
}

pub struct DecoderPool {
    config: DecoderPoolConfig,
    factory: Box<dyn HardwareDecoderFactory>,
    inner: Mutex<PoolInner>,
    events: EventSink,
    preemptions: std::sync::atomic::AtomicU64,
    expansions: std::sync::atomic::AtomicU64,
    shrinks: std::sync::atomic::AtomicU64,
}

impl DecoderPool {
    pub fn new(config: DecoderPoolConfig, factory: Box<dyn HardwareDecoderFactory>, events: EventSink) -> Self {
        Self {
            config,
            factory,
            inner: Mutex::new(PoolInner { slots: HashMap::new(), per_channel_counts: HashMap::new() }),
            events,
            preemptions: std::sync::atomic::AtomicU64::new(0),
            expansions: std::sync::atomic::AtomicU64::new(0),
            shrinks: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Acquires a decoder of `codec` for `channel_id` at `priority` (1-3,
    /// higher wins preemption). Returns `ResourceExhausted` if no slot is
    /// free, the pool is at its ceiling, and either preemption is disabled
    /// or no lower-priority occupant exists to reclaim.
    pub fn acquire(&self, channel_id: u8, codec: CodecType, priority: u8) -> Result<Arc<DecoderSession>> {
        use std::sync::atomic::Ordering;
        let mut inner = self.inner.lock();

        if let Some(owned) = self.per_channel_counts_check(&inner, channel_id) {
            if owned >= self.config.max_decoders_per_channel {
                return Err(AnalyticsError::resource_exhausted("decoder_pool", "per-channel decoder limit reached"));
            }
        }

        let slots = inner.slots.entry(codec).or_insert_with(Vec::new);

        if let Some(slot) = slots.iter_mut().find(|s| s.owner.is_none()) {
            slot.owner = Some(channel_id);
            slot.owner_priority = priority;
            let decoder = Arc::clone(&slot.decoder);
            drop(inner);
            self.bump_channel_count(channel_id);
            self.events.emit(Event::RecoveryAttempted { channel_id, action: "decoder_slot_reused", succeeded: true });
            return Ok(decoder);
        }

        let ceiling = match self.config.strategy {
            DecoderPoolStrategy::Exclusive => self.config.max_decoders_per_channel,
            _ => self.config.max_decoders_per_type,
        };
        if (slots.len() as u32) < ceiling || self.config.enable_dynamic_allocation {
            if (slots.len() as u32) < self.config.max_shared_decoders.max(ceiling) {
                let decoder = Arc::new(DecoderSession::new(codec, self.factory.build()));
                slots.push(Slot { decoder: Arc::clone(&decoder), owner: Some(channel_id), owner_priority: priority, freed_at: Instant::now() });
                drop(inner);
                self.expansions.fetch_add(1, Ordering::Relaxed);
                info!(codec = ?codec, channel_id, "decoder pool expanded");
                self.bump_channel_count(channel_id);
                self.events.emit(Event::RecoveryAttempted { channel_id, action: "decoder_pool_expanded", succeeded: true });
                return Ok(decoder);
            }
        }

        if self.config.enable_resource_preemption
            && matches!(self.config.strategy, DecoderPoolStrategy::PriorityBased | DecoderPoolStrategy::LoadBalanced | DecoderPoolStrategy::Adaptive)
        {
            if let Some((idx, _)) = slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.owner.is_some() && s.owner_priority < priority)
                .min_by_key(|(_, s)| s.owner_priority)
            {
                let victim = slots[idx].owner.take().unwrap();
                slots[idx].owner = Some(channel_id);
                slots[idx].owner_priority = priority;
                let decoder = Arc::clone(&slots[idx].decoder);
                drop(inner);
                self.preemptions.fetch_add(1, Ordering::Relaxed);
                warn!(codec = ?codec, victim_channel = victim, new_channel = channel_id, "preempting decoder slot");
                self.events.emit(Event::RecoveryAttempted { channel_id: victim, action: "decoder_preempted", succeeded: true });
                self.bump_channel_count(channel_id);
                return Ok(decoder);
            }
        }

        drop(inner);
        self.events.emit(Event::Error { channel_id, message: "decoder pool exhausted".into() });
        Err(AnalyticsError::resource_exhausted("decoder_pool", "no free or preemptable slot"))
    }

    fn per_channel_counts_check(&self, inner: &PoolInner, channel_id: u8) -> Option<u32> {
        if self.config.strategy == DecoderPoolStrategy::Exclusive {
            inner.per_channel_counts.get(&channel_id).copied().or(Some(0))
        } else {
            None
        }
    }

    fn bump_channel_count(&self, channel_id: u8) {
        *self.inner.lock().per_channel_counts.entry(channel_id).or_insert(0) += 1;
    }

    /// Releases `channel_id`'s hold on `codec`; the slot becomes eligible for
    /// reuse or, after `idle_timeout_ms` with no new owner, reclamation.
    pub fn release(&self, channel_id: u8, codec: CodecType) {
        let mut inner = self.inner.lock();
        if let Some(slots) = inner.slots.get_mut(&codec) {
            for slot in slots.iter_mut() {
                if slot.owner == Some(channel_id) {
                    slot.owner = None;
                    slot.freed_at = Instant::now();
                }
            }
        }
        if let Some(count) = inner.per_channel_counts.get_mut(&channel_id) {
            *count = count.saturating_sub(1);
        }
        drop(inner);
        self.events.emit(Event::RecoveryAttempted { channel_id, action: "decoder_released", succeeded: true });
    }

    /// Drops idle slots that have exceeded `idle_timeout_ms`, shrinking the
    /// pool back down under sustained low demand.
    pub fn sweep_idle(&self) {
        use std::sync::atomic::Ordering;
        let timeout = Duration::from_millis(self.config.idle_timeout_ms);
        let mut inner = self.inner.lock();
        let mut shrunk = 0u64;
        for slots in inner.slots.values_mut() {
            let before = slots.len();
            slots.retain(|s| s.owner.is_some() || s.freed_at.elapsed() < timeout);
            shrunk += (before - slots.len()) as u64;
        }
        drop(inner);
        if shrunk > 0 {
            self.shrinks.fetch_add(shrunk, Ordering::Relaxed);
            self.events.emit(Event::Error { channel_id: 0, message: format!("decoder pool shrunk by {shrunk}") });
        }
    }

    pub fn stats(&self) -> DecoderPoolStats {
        use std::sync::atomic::Ordering;
        let inner = self.inner.lock();
        let total: usize = inner.slots.values().map(|v| v.len()).sum();
        let in_use: usize = inner.slots.values().map(|v| v.iter().filter(|s| s.owner.is_some()).count()).sum();
        DecoderPoolStats {
            total_slots: total,
            in_use,
            idle: total - in_use,
            preemptions: self.preemptions.load(Ordering::Relaxed),
            expansions: self.expansions.load(Ordering::Relaxed),
            shrinks: self.shrinks.load(Ordering::Relaxed),
        }
    }
}
