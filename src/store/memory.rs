use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info};
use ulid::{Generator, Ulid};

use crate::limits::WAL_CHANNEL_CAPACITY;
use crate::model::*;
use crate::wal::Wal;

use super::writer::{wal_writer_loop, WalCommand};
use super::{BookingStore, ResourceDirectory, StoreError};

pub type SharedSpaceState = Arc<RwLock<SpaceState>>;

/// Bookings and spaces held in memory, made durable by an optional WAL.
///
/// Every write to a space's bookings happens under that space's write lock,
/// so the approval-time overlap check and the status write are one atomic
/// step per space. Mutations also hold the compaction gate for reading;
/// compaction takes it for writing so a snapshot never races an append.
pub struct MemoryStore {
    spaces: DashMap<Ulid, SharedSpaceState>,
    bookings: DashMap<Ulid, Booking>,
    /// Requester → booking ids, in creation order.
    by_requester: DashMap<Ulid, Vec<Ulid>>,
    gate: RwLock<()>,
    /// Monotonic within a millisecond, so id order breaks created_at ties.
    ids: Mutex<Generator>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl MemoryStore {
    /// A store with no log behind it. State dies with the process.
    pub fn ephemeral() -> Self {
        Self {
            spaces: DashMap::new(),
            bookings: DashMap::new(),
            by_requester: DashMap::new(),
            gate: RwLock::new(()),
            ids: Mutex::new(Generator::new()),
            wal_tx: None,
        }
    }

    /// Replay the WAL at `wal_path` and keep appending to it. Must be called
    /// from within a tokio runtime; the group-commit writer is spawned here.
    pub fn open(wal_path: &Path) -> io::Result<Self> {
        let records = Wal::replay(wal_path)?;
        let wal = Wal::open(wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(WAL_CHANNEL_CAPACITY);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            wal_tx: Some(wal_tx),
            ..Self::ephemeral()
        };
        for record in &records {
            store.replay_record(record);
        }
        info!(
            records = records.len(),
            spaces = store.spaces.len(),
            bookings = store.bookings.len(),
            "store replayed from {}",
            wal_path.display()
        );
        Ok(store)
    }

    // Nothing else holds these locks during replay, so try_write always succeeds.
    fn replay_record(&self, record: &Record) {
        if let Record::SpaceRegistered { .. } = record {
            self.insert_space(record);
            return;
        }
        let Some(rs) = self.resource_of(record).and_then(|rid| self.space(&rid)) else {
            debug!("replay: skipping record for unknown space: {record:?}");
            return;
        };
        if let Ok(mut guard) = rs.try_write() {
            self.apply(&mut guard, record);
        }
    }

    fn resource_of(&self, record: &Record) -> Option<Ulid> {
        match record {
            Record::SpaceRegistered { id, .. } => Some(*id),
            Record::BookingCreated { resource_id, .. } => Some(*resource_id),
            Record::StatusChanged { id, .. } => self.bookings.get(id).map(|b| b.resource_id),
        }
    }

    fn insert_space(&self, record: &Record) {
        if let Record::SpaceRegistered {
            id,
            owner_id,
            title,
            description,
            area_m2,
            price,
            phone,
            at,
        } = record
        {
            // Listings are immutable once registered.
            let space = Space {
                id: *id,
                owner_id: *owner_id,
                title: title.clone(),
                description: description.clone(),
                area_m2: *area_m2,
                price: *price,
                phone: phone.clone(),
                created_at: *at,
                updated_at: *at,
            };
            self.spaces
                .insert(*id, Arc::new(RwLock::new(SpaceState::new(space))));
        }
    }

    /// Apply a booking record to its space. Caller holds the space write lock.
    fn apply(&self, rs: &mut SpaceState, record: &Record) {
        match record {
            Record::BookingCreated {
                id,
                resource_id,
                requester_id,
                span,
                at,
            } => {
                self.bookings.insert(
                    *id,
                    Booking {
                        id: *id,
                        resource_id: *resource_id,
                        requester_id: *requester_id,
                        status: BookingStatus::Pending,
                        span: *span,
                        created_at: *at,
                        updated_at: *at,
                    },
                );
                rs.bookings.push(*id);
                self.by_requester.entry(*requester_id).or_default().push(*id);
            }
            Record::StatusChanged { id, status, at } => {
                let Some((previous, span)) = self.bookings.get_mut(id).map(|mut b| {
                    let previous = b.status;
                    b.status = *status;
                    b.updated_at = *at;
                    (previous, b.span)
                }) else {
                    return;
                };
                if *status == BookingStatus::Approved {
                    rs.insert_interval(Interval { id: *id, span });
                } else if previous == BookingStatus::Approved {
                    rs.remove_interval(*id);
                }
            }
            Record::SpaceRegistered { .. } => {}
        }
    }

    fn next_id(&self) -> Ulid {
        let mut ids = self.ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.generate().unwrap_or_else(|_| Ulid::new())
    }

    fn space(&self, id: &Ulid) -> Option<SharedSpaceState> {
        self.spaces.get(id).map(|e| e.value().clone())
    }

    fn booking(&self, id: Ulid) -> Result<Booking, StoreError> {
        self.bookings
            .get(&id)
            .map(|b| b.value().clone())
            .ok_or(StoreError::NotFound(id))
    }

    fn collect_sorted(&self, ids: impl IntoIterator<Item = Ulid>) -> Vec<Booking> {
        let mut out: Vec<Booking> = ids
            .into_iter()
            .filter_map(|id| self.bookings.get(&id).map(|b| b.value().clone()))
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        out
    }

    async fn wal_append(&self, record: &Record) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append {
                record: record.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    async fn persist_and_apply(&self, rs: &mut SpaceState, record: &Record) -> Result<(), StoreError> {
        self.wal_append(record).await?;
        self.apply(rs, record);
        Ok(())
    }

    /// Records appended since the last compaction. Zero without a WAL.
    pub async fn wal_appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else {
            return 0;
        };
        let (tx, rx) = oneshot::channel();
        if wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Rewrite the WAL as a snapshot of current state: each space once, each
    /// booking once, plus its latest status if it left pending.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else {
            return Ok(());
        };
        let _gate = self.gate.write().await;

        let spaces: Vec<SharedSpaceState> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut records = Vec::with_capacity(spaces.len() + self.bookings.len() * 2);
        for rs in spaces {
            let guard = rs.read().await;
            let space = &guard.space;
            records.push(Record::SpaceRegistered {
                id: space.id,
                owner_id: space.owner_id,
                title: space.title.clone(),
                description: space.description.clone(),
                area_m2: space.area_m2,
                price: space.price,
                phone: space.phone.clone(),
                at: space.created_at,
            });
            for id in &guard.bookings {
                let Ok(b) = self.booking(*id) else { continue };
                records.push(Record::BookingCreated {
                    id: b.id,
                    resource_id: b.resource_id,
                    requester_id: b.requester_id,
                    span: b.span,
                    at: b.created_at,
                });
                if b.status != BookingStatus::Pending {
                    records.push(Record::StatusChanged {
                        id: b.id,
                        status: b.status,
                        at: b.updated_at,
                    });
                }
            }
        }

        let count = records.len();
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { records, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))?;
        info!(records = count, "WAL compacted");
        Ok(())
    }
}

#[async_trait]
impl BookingStore for MemoryStore {
    async fn create(&self, booking: NewBooking) -> Result<Booking, StoreError> {
        let rs = self
            .space(&booking.resource_id)
            .ok_or(StoreError::NotFound(booking.resource_id))?;
        let _gate = self.gate.read().await;
        let mut guard = rs.write().await;

        let id = self.next_id();
        let record = Record::BookingCreated {
            id,
            resource_id: booking.resource_id,
            requester_id: booking.requester_id,
            span: booking.span,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &record).await?;
        self.booking(id)
    }

    async fn get(&self, id: Ulid) -> Result<Booking, StoreError> {
        self.booking(id)
    }

    async fn list_by_requester(&self, requester_id: Ulid) -> Result<Vec<Booking>, StoreError> {
        let ids = self
            .by_requester
            .get(&requester_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(self.collect_sorted(ids))
    }

    async fn list_by_owner(&self, owner_id: Ulid) -> Result<Vec<Booking>, StoreError> {
        let spaces: Vec<SharedSpaceState> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut ids = Vec::new();
        for rs in spaces {
            let guard = rs.read().await;
            if guard.space.owner_id == owner_id {
                ids.extend(guard.bookings.iter().copied());
            }
        }
        Ok(self.collect_sorted(ids))
    }

    async fn update_status(&self, id: Ulid, status: BookingStatus) -> Result<Booking, StoreError> {
        let resource_id = self
            .bookings
            .get(&id)
            .map(|b| b.resource_id)
            .ok_or(StoreError::NotFound(id))?;
        let rs = self
            .space(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        let _gate = self.gate.read().await;
        let mut guard = rs.write().await;

        // Re-read under the lock: a concurrent writer may have moved it on.
        let current = self.booking(id)?;
        if !current.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: status,
            });
        }
        if status == BookingStatus::Approved
            && let Some(other) = guard.overlapping(&current.span).find(|i| i.id != id)
        {
            return Err(StoreError::Conflict(other.id));
        }

        let record = Record::StatusChanged { id, status, at: now_ms() };
        self.persist_and_apply(&mut guard, &record).await?;
        self.booking(id)
    }

    async fn find_approved_overlap(
        &self,
        resource_id: Ulid,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Option<Ulid>, StoreError> {
        let Some(rs) = self.space(&resource_id) else {
            return Ok(None);
        };
        let guard = rs.read().await;
        Ok(guard
            .overlapping(&span)
            .find(|i| Some(i.id) != exclude)
            .map(|i| i.id))
    }
}

#[async_trait]
impl ResourceDirectory for MemoryStore {
    async fn resolve_owner(&self, resource_id: Ulid) -> Result<Ulid, StoreError> {
        let rs = self
            .space(&resource_id)
            .ok_or(StoreError::NotFound(resource_id))?;
        let owner_id = rs.read().await.space.owner_id;
        Ok(owner_id)
    }

    async fn register(&self, space: NewSpace) -> Result<Space, StoreError> {
        let _gate = self.gate.read().await;
        let id = self.next_id();
        let record = Record::SpaceRegistered {
            id,
            owner_id: space.owner_id,
            title: space.listing.title,
            description: space.listing.description,
            area_m2: space.listing.area_m2,
            price: space.listing.price,
            phone: space.listing.phone,
            at: now_ms(),
        };
        self.wal_append(&record).await?;
        self.insert_space(&record);
        let rs = self.space(&id).ok_or(StoreError::NotFound(id))?;
        let space = rs.read().await.space.clone();
        Ok(space)
    }

    async fn list_spaces(&self) -> Result<Vec<Space>, StoreError> {
        let spaces: Vec<SharedSpaceState> = self.spaces.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(spaces.len());
        for rs in spaces {
            out.push(rs.read().await.space.clone());
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("spacebook_test_store");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn space_for(store: &MemoryStore, owner_id: Ulid) -> Space {
        store
            .register(NewSpace {
                owner_id,
                listing: SpaceListing::new("Workshop", 35.0, 900, "+1 555 0142"),
            })
            .await
            .unwrap()
    }

    fn request(resource_id: Ulid, requester_id: Ulid, start: Ms, end: Ms) -> NewBooking {
        NewBooking {
            resource_id,
            requester_id,
            span: Span::new(start, end),
        }
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = MemoryStore::ephemeral();
        let space = space_for(&store, Ulid::new()).await;
        let tenant = Ulid::new();

        let b = store.create(request(space.id, tenant, 0, DAY_MS)).await.unwrap();
        assert_eq!(b.status, BookingStatus::Pending);
        assert_eq!(b.created_at, b.updated_at);
        assert_eq!(store.get(b.id).await.unwrap(), b);
        assert!(matches!(store.get(Ulid::new()).await, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn create_on_unknown_space_fails() {
        let store = MemoryStore::ephemeral();
        let missing = Ulid::new();
        let result = store.create(request(missing, Ulid::new(), 0, DAY_MS)).await;
        assert_eq!(result, Err(StoreError::NotFound(missing)));
    }

    #[tokio::test]
    async fn overlap_query_sees_only_approved() {
        let store = MemoryStore::ephemeral();
        let space = space_for(&store, Ulid::new()).await;
        let b = store.create(request(space.id, Ulid::new(), 10, 20)).await.unwrap();

        assert!(!store.has_approved_overlap(space.id, Span::new(0, 100), None).await.unwrap());

        store.update_status(b.id, BookingStatus::Approved).await.unwrap();
        assert!(store.has_approved_overlap(space.id, Span::new(15, 25), None).await.unwrap());
        assert!(!store.has_approved_overlap(space.id, Span::new(20, 30), None).await.unwrap());
        assert!(!store.has_approved_overlap(space.id, Span::new(0, 10), None).await.unwrap());
        assert!(!store.has_approved_overlap(space.id, Span::new(15, 25), Some(b.id)).await.unwrap());
        assert_eq!(
            store.find_approved_overlap(space.id, Span::new(0, 100), None).await.unwrap(),
            Some(b.id)
        );
    }

    #[tokio::test]
    async fn cancelling_approved_frees_the_span() {
        let store = MemoryStore::ephemeral();
        let space = space_for(&store, Ulid::new()).await;
        let b = store.create(request(space.id, Ulid::new(), 10, 20)).await.unwrap();
        store.update_status(b.id, BookingStatus::Approved).await.unwrap();
        store.update_status(b.id, BookingStatus::Cancelled).await.unwrap();
        assert!(!store.has_approved_overlap(space.id, Span::new(10, 20), None).await.unwrap());
    }

    #[tokio::test]
    async fn approve_enforces_exclusion() {
        let store = MemoryStore::ephemeral();
        let space = space_for(&store, Ulid::new()).await;
        let first = store.create(request(space.id, Ulid::new(), 10, 20)).await.unwrap();
        let second = store.create(request(space.id, Ulid::new(), 15, 30)).await.unwrap();

        store.update_status(first.id, BookingStatus::Approved).await.unwrap();
        let result = store.update_status(second.id, BookingStatus::Approved).await;
        assert_eq!(result, Err(StoreError::Conflict(first.id)));
        assert_eq!(store.get(second.id).await.unwrap().status, BookingStatus::Pending);

        // Rejecting the loser is still fine
        store.update_status(second.id, BookingStatus::Rejected).await.unwrap();
    }

    #[tokio::test]
    async fn update_status_refuses_illegal_transition() {
        let store = MemoryStore::ephemeral();
        let space = space_for(&store, Ulid::new()).await;
        let b = store.create(request(space.id, Ulid::new(), 10, 20)).await.unwrap();
        store.update_status(b.id, BookingStatus::Rejected).await.unwrap();

        let result = store.update_status(b.id, BookingStatus::Approved).await;
        assert_eq!(
            result,
            Err(StoreError::InvalidTransition {
                id: b.id,
                from: BookingStatus::Rejected,
                to: BookingStatus::Approved,
            })
        );
        assert!(matches!(
            store.update_status(Ulid::new(), BookingStatus::Approved).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn lists_are_most_recent_first_and_joined_by_owner() {
        let store = MemoryStore::ephemeral();
        let owner = Ulid::new();
        let mine = space_for(&store, owner).await;
        let other = space_for(&store, Ulid::new()).await;
        let tenant = Ulid::new();

        let a = store.create(request(mine.id, tenant, 0, 10)).await.unwrap();
        let b = store.create(request(other.id, tenant, 0, 10)).await.unwrap();
        let c = store.create(request(mine.id, Ulid::new(), 20, 30)).await.unwrap();

        let by_tenant: Vec<Ulid> = store
            .list_by_requester(tenant)
            .await
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(by_tenant, vec![b.id, a.id]);

        let by_owner: Vec<Ulid> = store
            .list_by_owner(owner)
            .await
            .unwrap()
            .iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(by_owner, vec![c.id, a.id]);

        assert!(store.list_by_owner(Ulid::new()).await.unwrap().is_empty());
        assert!(store.list_by_requester(Ulid::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resolve_owner_and_list_spaces() {
        let store = MemoryStore::ephemeral();
        let owner = Ulid::new();
        let first = space_for(&store, owner).await;
        let second = space_for(&store, Ulid::new()).await;

        assert_eq!(store.resolve_owner(first.id).await.unwrap(), owner);
        let missing = Ulid::new();
        assert_eq!(store.resolve_owner(missing).await, Err(StoreError::NotFound(missing)));

        let ids: Vec<Ulid> = store.list_spaces().await.unwrap().iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn wal_replay_restores_state() {
        let path = test_wal_path("replay.wal");
        let owner = Ulid::new();
        let tenant = Ulid::new();
        let (space, approved, cancelled) = {
            let store = MemoryStore::open(&path).unwrap();
            let space = space_for(&store, owner).await;
            let approved = store.create(request(space.id, tenant, 0, 10)).await.unwrap();
            let cancelled = store.create(request(space.id, tenant, 5, 15)).await.unwrap();
            store.update_status(approved.id, BookingStatus::Approved).await.unwrap();
            store.update_status(cancelled.id, BookingStatus::Cancelled).await.unwrap();
            (space, approved, cancelled)
        };

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.resolve_owner(space.id).await.unwrap(), owner);
        assert_eq!(store.list_spaces().await.unwrap(), vec![space.clone()]);
        assert_eq!(store.get(approved.id).await.unwrap().status, BookingStatus::Approved);
        assert_eq!(store.get(cancelled.id).await.unwrap().status, BookingStatus::Cancelled);
        assert_eq!(
            store.find_approved_overlap(space.id, Span::new(0, 100), None).await.unwrap(),
            Some(approved.id)
        );
        assert_eq!(store.list_by_requester(tenant).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn compaction_preserves_state() {
        let path = test_wal_path("compact.wal");
        let owner = Ulid::new();
        let tenant = Ulid::new();
        let (space, kept) = {
            let store = MemoryStore::open(&path).unwrap();
            let space = space_for(&store, owner).await;
            let kept = store.create(request(space.id, tenant, 0, 10)).await.unwrap();
            store.update_status(kept.id, BookingStatus::Approved).await.unwrap();
            for i in 1..10 {
                let b = store.create(request(space.id, tenant, i * 100, i * 100 + 10)).await.unwrap();
                store.update_status(b.id, BookingStatus::Rejected).await.unwrap();
            }
            assert_eq!(store.wal_appends_since_compact().await, 21);
            store.compact().await.unwrap();
            assert_eq!(store.wal_appends_since_compact().await, 0);
            (space, store.get(kept.id).await.unwrap())
        };

        let store = MemoryStore::open(&path).unwrap();
        assert_eq!(store.get(kept.id).await.unwrap(), kept);
        assert_eq!(store.list_by_owner(owner).await.unwrap().len(), 10);
        assert_eq!(store.list_spaces().await.unwrap(), vec![space.clone()]);
        assert!(store.has_approved_overlap(space.id, Span::new(5, 6), None).await.unwrap());
    }
}
