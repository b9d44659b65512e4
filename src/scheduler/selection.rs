//! Next-speaker selection.
//!
//! Priority: explicit override, then the head of the suggestion queue, then a
//! random pick among the least recently heard eligible speakers.

use crate::scheduler::state::SchedulerState;
use crate::speaker::SpeakerId;
use rand::Rng;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Tunables for one selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionPolicy {
    pub allow_self_reply: bool,
    /// Minimum time since a speaker's last turn before fallback may pick it.
    pub cooldown: Duration,
    /// Share of the longest-idle eligible speakers the fallback draws from.
    pub lru_fraction: f64,
}

/// Where a selection came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionSource {
    Override,
    Suggested,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub speaker: SpeakerId,
    pub source: SelectionSource,
}

/// Maximum concurrent turns: one normally, every agent in chaos mode.
pub fn max_concurrency(chaos_mode: bool, agent_count: usize) -> usize {
    if chaos_mode { agent_count.max(1) } else { 1 }
}

/// Picks the next speaker among `participants`, mutating the override and
/// suggestion queue as they are consumed.
///
/// `participants` lists every id that may speak right now, in a stable order.
pub fn select_next<R: Rng>(
    state: &mut SchedulerState,
    participants: &[SpeakerId],
    policy: &SelectionPolicy,
    now: Instant,
    rng: &mut R,
) -> Option<Selection> {
    if let Some(id) = state.override_next.clone() {
        if !participants.contains(&id) {
            warn!(speaker = %id, "dropping override for unknown speaker");
            state.override_next = None;
        } else if !state.active.contains(&id) {
            state.override_next = None;
            return Some(Selection {
                speaker: id,
                source: SelectionSource::Override,
            });
        }
    }

    if let Some(id) = state.suggestions.pop_front() {
        let usable = participants.contains(&id)
            && !state.active.contains(&id)
            && self_reply_ok(state, policy, &id);
        if usable {
            return Some(Selection {
                speaker: id,
                source: SelectionSource::Suggested,
            });
        }
        debug!(speaker = %id, "discarding stale suggestion");
    }

    fallback(state, participants, policy, now, rng).map(|speaker| Selection {
        speaker,
        source: SelectionSource::Fallback,
    })
}

fn self_reply_ok(state: &SchedulerState, policy: &SelectionPolicy, id: &SpeakerId) -> bool {
    policy.allow_self_reply || state.last_speaker.as_ref() != Some(id)
}

fn fallback<R: Rng>(
    state: &SchedulerState,
    participants: &[SpeakerId],
    policy: &SelectionPolicy,
    now: Instant,
    rng: &mut R,
) -> Option<SpeakerId> {
    let mut eligible: Vec<(&SpeakerId, Option<Instant>)> = participants
        .iter()
        .filter(|id| !state.active.contains(*id))
        .filter(|id| self_reply_ok(state, policy, id))
        .map(|id| (id, state.last_turn_at(id)))
        .filter(|(_, last)| match last {
            Some(at) => now.saturating_duration_since(*at) > policy.cooldown,
            None => true,
        })
        .collect();

    if eligible.is_empty() {
        return None;
    }

    // Never-spoken first, then oldest turn first.
    eligible.sort_by_key(|(_, last)| *last);
    let mut pool = pool_size(eligible.len(), policy.lru_fraction);
    // Speakers tied with the last one in the pool are equally idle; take them all.
    let boundary = eligible[pool - 1].1;
    pool += eligible[pool..]
        .iter()
        .take_while(|(_, last)| *last == boundary)
        .count();
    let pick = rng.gen_range(0..pool);
    Some(eligible[pick].0.clone())
}

/// `ceil(len * fraction)`, clamped to `1..=len`.
fn pool_size(len: usize, fraction: f64) -> usize {
    let size = (len as f64 * fraction).ceil() as usize;
    size.clamp(1, len.max(1))
}
