//! Slot bookkeeping owned by the registry actor.
//!
//! Every slot id in `[1, capacity]` is in exactly one of three places: the free
//! set, the pending map or the bound map. The fan-out index mirrors the bound
//! map keyed by user. Nothing here is async or shared; the actor serializes
//! access.

use crate::models::{Session, SessionKey, SlotId, UserId, UserSession};
use crate::stream::connection::{ConnectionHandle, ConnectionId};
use chrono::Utc;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tokio::time::Instant;

/// Where a slot currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Pending,
    Bound,
}

impl SlotState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            SlotState::Free => "free",
            SlotState::Pending => "pending",
            SlotState::Bound => "bound",
        }
    }
}

/// A bound session and the connection it is attached to.
#[derive(Debug, Clone)]
struct Binding {
    session: Session,
    connection: ConnectionHandle,
}

/// Result of a release request.
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// The slot was returned to the free set.
    Released {
        session: Session,
        from: SlotState,
        /// False when the bound connection was missing from the fan-out index.
        index_consistent: bool,
    },
    /// The slot was already free.
    AlreadyFree,
    /// The slot is held by a later issuance than the one being released.
    StaleGeneration { current: u64 },
    /// The slot is bound to a different connection than the caller's.
    ConnectionMismatch,
}

/// Reusable pool of session slots plus the per-user fan-out index.
#[derive(Debug)]
pub struct SlotPool {
    capacity: u32,
    free: BTreeSet<SlotId>,
    pending: HashMap<SlotId, Session>,
    bound: HashMap<SlotId, Binding>,
    fanout: HashMap<UserId, HashMap<ConnectionId, ConnectionHandle>>,
    next_generation: u64,
}

impl SlotPool {
    /// Create a pool with every slot in `[1, capacity]` free.
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            free: (1..=capacity).map(SlotId::new).collect(),
            pending: HashMap::new(),
            bound: HashMap::new(),
            fanout: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Take the lowest free slot and create a pending session for `user`.
    ///
    /// Returns `None` without touching any state when every slot is outstanding.
    pub fn acquire(&mut self, user: UserSession, now: Instant) -> Option<Session> {
        let slot = self.free.pop_first()?;

        let generation = self.next_generation;
        self.next_generation += 1;

        let session = Session {
            slot,
            generation,
            user,
            created_at: Utc::now(),
            acquired_at: now,
        };
        self.pending.insert(slot, session.clone());

        Some(session)
    }

    /// Move a pending session to bound and add `connection` to its owner's fan-out set.
    ///
    /// Returns `None` (no state change) unless `slot` is pending.
    pub fn bind(&mut self, slot: SlotId, connection: ConnectionHandle) -> Option<Session> {
        let session = self.pending.remove(&slot)?;

        self.fanout
            .entry(session.user.user_id.clone())
            .or_default()
            .insert(connection.id(), connection.clone());

        self.bound.insert(
            slot,
            Binding {
                session: session.clone(),
                connection,
            },
        );

        Some(session)
    }

    /// Return a slot to the free set.
    ///
    /// `connection`, when given, must be the connection the slot is bound to.
    pub fn release(&mut self, key: SessionKey, connection: Option<ConnectionId>) -> ReleaseOutcome {
        if let Some(session) = self.pending.get(&key.slot) {
            if session.generation != key.generation {
                return ReleaseOutcome::StaleGeneration {
                    current: session.generation,
                };
            }

            let Some(session) = self.pending.remove(&key.slot) else {
                return ReleaseOutcome::AlreadyFree;
            };
            self.free.insert(key.slot);

            return ReleaseOutcome::Released {
                session,
                from: SlotState::Pending,
                index_consistent: true,
            };
        }

        if let Some(binding) = self.bound.get(&key.slot) {
            if binding.session.generation != key.generation {
                return ReleaseOutcome::StaleGeneration {
                    current: binding.session.generation,
                };
            }
            if connection.is_some_and(|id| id != binding.connection.id()) {
                return ReleaseOutcome::ConnectionMismatch;
            }

            let Some(binding) = self.bound.remove(&key.slot) else {
                return ReleaseOutcome::AlreadyFree;
            };
            let index_consistent = self.unindex(&binding);
            self.free.insert(key.slot);

            return ReleaseOutcome::Released {
                session: binding.session,
                from: SlotState::Bound,
                index_consistent,
            };
        }

        ReleaseOutcome::AlreadyFree
    }

    /// Connections currently bound for `user_id`.
    #[must_use]
    pub fn lookup(&self, user_id: &UserId) -> Vec<ConnectionHandle> {
        self.fanout
            .get(user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Free every pending session with `acquired_at + max_pending_age < now`.
    ///
    /// Bound sessions are never touched. A deadline past the end of the clock
    /// never expires. Returns the reclaimed sessions.
    pub fn reclaim(&mut self, now: Instant, max_pending_age: Duration) -> Vec<Session> {
        let expired: Vec<SlotId> = self
            .pending
            .iter()
            .filter(|(_, session)| {
                session
                    .acquired_at
                    .checked_add(max_pending_age)
                    .is_some_and(|deadline| deadline < now)
            })
            .map(|(slot, _)| *slot)
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for slot in expired {
            if let Some(session) = self.pending.remove(&slot) {
                self.free.insert(slot);
                reclaimed.push(session);
            }
        }
        reclaimed.sort_by_key(|session| session.slot);
        reclaimed
    }

    #[must_use]
    pub fn state(&self, slot: SlotId) -> Option<SlotState> {
        if self.free.contains(&slot) {
            Some(SlotState::Free)
        } else if self.pending.contains_key(&slot) {
            Some(SlotState::Pending)
        } else if self.bound.contains_key(&slot) {
            Some(SlotState::Bound)
        } else {
            None
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn bound_count(&self) -> usize {
        self.bound.len()
    }

    /// Number of distinct users with at least one bound connection.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.fanout.len()
    }

    /// Drop `binding`'s connection from the fan-out index.
    ///
    /// Returns false if the connection was not indexed.
    fn unindex(&mut self, binding: &Binding) -> bool {
        let user_id = &binding.session.user.user_id;
        let Some(connections) = self.fanout.get_mut(user_id) else {
            return false;
        };

        let removed = connections.remove(&binding.connection.id()).is_some();
        if connections.is_empty() {
            self.fanout.remove(user_id);
        }
        removed
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn user(id: &str) -> UserSession {
        UserSession {
            user_id: UserId::new(id),
            session_id: format!("sess-{id}"),
        }
    }

    /// Free, pending and bound are disjoint and cover `[1, capacity]`.
    fn assert_partitioned(pool: &SlotPool) {
        let total = pool.free_count() + pool.pending_count() + pool.bound_count();
        assert_eq!(total, pool.capacity() as usize);
        for id in 1..=pool.capacity() {
            assert!(pool.state(SlotId::new(id)).is_some(), "slot {id} lost");
        }
        let indexed: usize = pool.fanout.values().map(HashMap::len).sum();
        assert_eq!(indexed, pool.bound_count());
    }

    #[test]
    fn test_new_pool_is_all_free() {
        let pool = SlotPool::new(3);

        assert_eq!(pool.free_count(), 3);
        assert_eq!(pool.state(SlotId::new(1)), Some(SlotState::Free));
        assert_eq!(pool.state(SlotId::new(3)), Some(SlotState::Free));
        assert_eq!(pool.state(SlotId::new(4)), None);
        assert_eq!(pool.state(SlotId::new(0)), None);
        assert_partitioned(&pool);
    }

    #[test]
    fn test_capacity_two_exhausts_and_reuses_lowest() {
        let mut pool = SlotPool::new(2);
        let now = Instant::now();

        let first = pool.acquire(user("u1"), now).unwrap();
        let second = pool.acquire(user("u1"), now).unwrap();
        assert_eq!(first.slot, SlotId::new(1));
        assert_eq!(second.slot, SlotId::new(2));

        assert!(pool.acquire(user("u1"), now).is_none());
        assert_eq!(pool.pending_count(), 2);
        assert_partitioned(&pool);

        assert!(matches!(
            pool.release(first.key(), None),
            ReleaseOutcome::Released { from: SlotState::Pending, .. }
        ));

        let third = pool.acquire(user("u1"), now).unwrap();
        assert_eq!(third.slot, SlotId::new(1));
        assert_ne!(third.generation, first.generation);
        assert_partitioned(&pool);
    }

    #[test]
    fn test_outstanding_never_exceeds_capacity() {
        let mut pool = SlotPool::new(4);
        let now = Instant::now();
        let mut held = Vec::new();

        for round in 0..20 {
            match pool.acquire(user("u1"), now) {
                Some(session) => held.push(session),
                None => assert_eq!(held.len(), 4),
            }
            if round % 3 == 2 {
                let session = held.remove(0);
                pool.release(session.key(), None);
            }
            assert!(pool.pending_count() <= 4);
            assert_partitioned(&pool);
        }
    }

    #[test]
    fn test_bind_then_release_restores_initial_state() {
        let mut pool = SlotPool::new(8);
        let now = Instant::now();

        for _ in 0..4 {
            pool.acquire(user("filler"), now).unwrap();
        }
        let session = pool.acquire(user("u1"), now).unwrap();
        assert_eq!(session.slot, SlotId::new(5));

        let (conn_a, _rx) = ConnectionHandle::new();
        let bound = pool.bind(session.slot, conn_a.clone()).unwrap();
        assert_eq!(bound.slot, session.slot);
        assert_eq!(pool.state(session.slot), Some(SlotState::Bound));
        assert_eq!(pool.lookup(&UserId::new("u1")), vec![conn_a.clone()]);
        assert_partitioned(&pool);

        let outcome = pool.release(session.key(), Some(conn_a.id()));
        assert!(matches!(
            outcome,
            ReleaseOutcome::Released { from: SlotState::Bound, index_consistent: true, .. }
        ));

        assert!(pool.lookup(&UserId::new("u1")).is_empty());
        assert_eq!(pool.state(SlotId::new(5)), Some(SlotState::Free));
        assert_eq!(pool.user_count(), 0);
        assert_partitioned(&pool);
    }

    #[test]
    fn test_bind_requires_pending_slot() {
        let mut pool = SlotPool::new(2);
        let (conn, _rx) = ConnectionHandle::new();

        // Free slot
        assert!(pool.bind(SlotId::new(1), conn.clone()).is_none());
        // Out of range
        assert!(pool.bind(SlotId::new(99), conn.clone()).is_none());
        assert_eq!(pool.free_count(), 2);
        assert!(pool.lookup(&UserId::new("u1")).is_empty());

        // Already bound
        let session = pool.acquire(user("u1"), Instant::now()).unwrap();
        pool.bind(session.slot, conn.clone()).unwrap();
        let (other, _rx2) = ConnectionHandle::new();
        assert!(pool.bind(session.slot, other).is_none());
        assert_eq!(pool.lookup(&UserId::new("u1")), vec![conn]);
        assert_partitioned(&pool);
    }

    #[test]
    fn test_release_of_free_slot_is_noop() {
        let mut pool = SlotPool::new(2);
        let key = SessionKey {
            slot: SlotId::new(1),
            generation: 1,
        };

        assert!(matches!(pool.release(key, None), ReleaseOutcome::AlreadyFree));

        let session = pool.acquire(user("u1"), Instant::now()).unwrap();
        pool.release(session.key(), None);
        assert!(matches!(
            pool.release(session.key(), None),
            ReleaseOutcome::AlreadyFree
        ));
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_release_with_stale_generation_leaves_reissued_slot() {
        let mut pool = SlotPool::new(1);
        let now = Instant::now();

        let old = pool.acquire(user("u1"), now).unwrap();
        pool.release(old.key(), None);
        let new = pool.acquire(user("u2"), now).unwrap();
        assert_eq!(old.slot, new.slot);

        let outcome = pool.release(old.key(), None);
        assert!(
            matches!(outcome, ReleaseOutcome::StaleGeneration { current } if current == new.generation)
        );
        assert_eq!(pool.state(new.slot), Some(SlotState::Pending));
    }

    #[test]
    fn test_release_from_other_connection_is_rejected() {
        let mut pool = SlotPool::new(1);
        let session = pool.acquire(user("u1"), Instant::now()).unwrap();
        let (conn, _rx) = ConnectionHandle::new();
        let (intruder, _rx2) = ConnectionHandle::new();
        pool.bind(session.slot, conn.clone()).unwrap();

        assert!(matches!(
            pool.release(session.key(), Some(intruder.id())),
            ReleaseOutcome::ConnectionMismatch
        ));
        assert_eq!(pool.lookup(&UserId::new("u1")), vec![conn]);
    }

    #[test]
    fn test_release_reports_missing_index_entry() {
        let mut pool = SlotPool::new(1);
        let session = pool.acquire(user("u1"), Instant::now()).unwrap();
        let (conn, _rx) = ConnectionHandle::new();
        pool.bind(session.slot, conn).unwrap();

        pool.fanout.clear();

        let outcome = pool.release(session.key(), None);
        assert!(matches!(
            outcome,
            ReleaseOutcome::Released { index_consistent: false, .. }
        ));
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_reclaim_frees_only_expired_pending() {
        let mut pool = SlotPool::new(10);
        let max_age = Duration::from_secs(120);
        let start = Instant::now();

        for _ in 0..6 {
            pool.acquire(user("filler"), start).unwrap();
        }
        let stale = pool.acquire(user("u1"), start).unwrap();
        assert_eq!(stale.slot, SlotId::new(7));

        let fresh = pool
            .acquire(user("u1"), start + Duration::from_secs(60))
            .unwrap();

        let reclaimed = pool.reclaim(start + max_age + Duration::from_secs(1), max_age);

        let slots: Vec<SlotId> = reclaimed.iter().map(|s| s.slot).collect();
        assert!(slots.contains(&SlotId::new(7)));
        assert!(!slots.contains(&fresh.slot));
        assert_eq!(pool.state(SlotId::new(7)), Some(SlotState::Free));
        assert_eq!(pool.state(fresh.slot), Some(SlotState::Pending));

        let (conn, _rx) = ConnectionHandle::new();
        assert!(pool.bind(SlotId::new(7), conn).is_none());
        assert_partitioned(&pool);
    }

    #[test]
    fn test_reclaim_boundary_is_strict() {
        let mut pool = SlotPool::new(1);
        let max_age = Duration::from_secs(30);
        let start = Instant::now();
        pool.acquire(user("u1"), start).unwrap();

        assert!(pool.reclaim(start + max_age, max_age).is_empty());
        assert_eq!(pool.pending_count(), 1);

        assert_eq!(
            pool.reclaim(start + max_age + Duration::from_millis(1), max_age)
                .len(),
            1
        );
    }

    #[test]
    fn test_reclaim_with_unrepresentable_deadline_keeps_pending() {
        let mut pool = SlotPool::new(1);
        let start = Instant::now();
        let session = pool.acquire(user("u1"), start).unwrap();

        let reclaimed = pool.reclaim(start + Duration::from_secs(3_600), Duration::MAX);

        assert!(reclaimed.is_empty());
        assert_eq!(pool.state(session.slot), Some(SlotState::Pending));
        assert_partitioned(&pool);
    }

    #[test]
    fn test_reclaim_never_touches_bound_sessions() {
        let mut pool = SlotPool::new(2);
        let start = Instant::now();
        let session = pool.acquire(user("u1"), start).unwrap();
        let (conn, _rx) = ConnectionHandle::new();
        pool.bind(session.slot, conn.clone()).unwrap();

        let reclaimed = pool.reclaim(start + Duration::from_secs(86_400), Duration::from_secs(1));

        assert!(reclaimed.is_empty());
        assert_eq!(pool.state(session.slot), Some(SlotState::Bound));
        assert_eq!(pool.lookup(&UserId::new("u1")), vec![conn]);
    }

    #[test]
    fn test_lookup_counts_binds_minus_releases() {
        let mut pool = SlotPool::new(10);
        let now = Instant::now();
        let mut bound = Vec::new();

        for _ in 0..5 {
            let session = pool.acquire(user("u1"), now).unwrap();
            let (conn, rx) = ConnectionHandle::new();
            pool.bind(session.slot, conn.clone()).unwrap();
            bound.push((session, conn, rx));
        }
        for (session, conn, _) in bound.iter().take(2) {
            pool.release(session.key(), Some(conn.id()));
        }

        assert_eq!(pool.lookup(&UserId::new("u1")).len(), 3);
        assert!(pool.lookup(&UserId::new("nobody")).is_empty());
        assert_partitioned(&pool);
    }

    #[test]
    fn test_fanout_index_is_per_user() {
        let mut pool = SlotPool::new(4);
        let now = Instant::now();

        let a = pool.acquire(user("alice"), now).unwrap();
        let b = pool.acquire(user("bob"), now).unwrap();
        let (conn_a, _ra) = ConnectionHandle::new();
        let (conn_b, _rb) = ConnectionHandle::new();
        pool.bind(a.slot, conn_a.clone()).unwrap();
        pool.bind(b.slot, conn_b.clone()).unwrap();

        assert_eq!(pool.lookup(&UserId::new("alice")), vec![conn_a]);
        assert_eq!(pool.lookup(&UserId::new("bob")), vec![conn_b]);
        assert_eq!(pool.user_count(), 2);
    }
}
