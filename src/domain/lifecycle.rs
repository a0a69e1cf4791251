//! Lifecycle state derivation
//!
//! Lifecycle is a pure function of `(now, created_at, last_accessed)` plus
//! the unit's context level. Storage never holds an authoritative state:
//! readers recompute, and sweeps write the derived value back only so that
//! payload filters and metrics stay usable.

use super::types::{ContextLevel, LifecycleState, TimestampMs};

/// Recency bound for [`LifecycleState::Active`].
pub const ACTIVE_WINDOW_MS: i64 = 7 * 24 * 60 * 60 * 1000;

/// Recency bound for [`LifecycleState::Recent`].
pub const RECENT_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// Derive the lifecycle state of a unit at time `now`.
///
/// Session-state units past their TTL are [`LifecycleState::Stale`]
/// regardless of recency; everything else is classified by how long ago it
/// was last accessed.
pub fn derive_state(
    now: TimestampMs,
    created_at: TimestampMs,
    last_accessed: TimestampMs,
    context_level: ContextLevel,
    session_ttl_ms: i64,
) -> LifecycleState {
    if context_level == ContextLevel::SessionState && now - created_at > session_ttl_ms {
        return LifecycleState::Stale;
    }
    let idle = now - last_accessed;
    if idle <= ACTIVE_WINDOW_MS {
        LifecycleState::Active
    } else if idle <= RECENT_WINDOW_MS {
        LifecycleState::Recent
    } else {
        LifecycleState::Archived
    }
}

/// Exponential recency decay in `(0, 1]` with the given half-life.
///
/// Used as the recency signal during reranking. `age <= 0` clamps to 1.0.
pub fn recency_decay(now: TimestampMs, last_accessed: TimestampMs, half_life_days: f64) -> f64 {
    let age_ms = (now - last_accessed).max(0) as f64;
    let half_life_ms = half_life_days * 24.0 * 60.0 * 60.0 * 1000.0;
    if half_life_ms <= 0.0 {
        return 1.0;
    }
    (0.5f64).powf(age_ms / half_life_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOUR: i64 = 60 * 60 * 1000;
    const DAY: i64 = 24 * HOUR;
    const TTL_48H: i64 = 48 * HOUR;

    #[test]
    fn fresh_units_are_active() {
        let state = derive_state(DAY, 0, DAY - HOUR, ContextLevel::ProjectContext, TTL_48H);
        assert_eq!(state, LifecycleState::Active);
    }

    #[test]
    fn idle_units_age_through_recent_to_archived() {
        let now = 100 * DAY;
        let recent = derive_state(now, 0, now - 10 * DAY, ContextLevel::ProjectContext, TTL_48H);
        assert_eq!(recent, LifecycleState::Recent);

        let archived = derive_state(now, 0, now - 40 * DAY, ContextLevel::UserPreference, TTL_48H);
        assert_eq!(archived, LifecycleState::Archived);
    }

    #[test]
    fn session_state_expires_by_creation_age() {
        // Accessed a second ago, but created 49h ago: still stale.
        let now = 49 * HOUR;
        let state = derive_state(now, 0, now - 1000, ContextLevel::SessionState, TTL_48H);
        assert_eq!(state, LifecycleState::Stale);

        // Within TTL the normal recency ladder applies.
        let state = derive_state(47 * HOUR, 0, 47 * HOUR, ContextLevel::SessionState, TTL_48H);
        assert_eq!(state, LifecycleState::Active);
    }

    #[test]
    fn recency_decay_halves_per_half_life() {
        let half = recency_decay(7 * DAY, 0, 7.0);
        assert!((half - 0.5).abs() < 1e-9);
        assert!((recency_decay(0, 0, 7.0) - 1.0).abs() < 1e-9);
        assert!(recency_decay(70 * DAY, 0, 7.0) < 0.01);
    }
}
