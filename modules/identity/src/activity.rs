//! Per-user shipment activity
//!
//! [`ActivityStore`] is the service's read model. Writes go through an
//! [`ActivityUnitOfWork`]: records stay pending until [`ActivityUnitOfWork::commit`]
//! and are discarded if the unit is dropped first.

use chrono::{DateTime, Utc};
use event_consumer::HandlerError;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ActivityError {
    #[error("activity store is unavailable")]
    Unavailable,
}

impl From<ActivityError> for HandlerError {
    fn from(error: ActivityError) -> Self {
        HandlerError::failed(error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityKind {
    Created,
    StatusChanged { from: String, to: String },
}

/// One thing that happened to a shipment, attributed to a user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentActivity {
    /// Event this record was derived from
    pub event_id: Uuid,
    pub shipment_id: Uuid,
    pub tracking_number: String,
    /// `None` when the shipment's creator is not known yet
    pub user_id: Option<String>,
    pub email: Option<String>,
    pub kind: ActivityKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct StoreState {
    activities: Vec<ShipmentActivity>,
    processed: HashSet<Uuid>,
    creators: HashMap<Uuid, (String, String)>,
}

impl StoreState {
    fn apply(&mut self, activity: ShipmentActivity) {
        if !self.processed.insert(activity.event_id) {
            return;
        }
        if let (ActivityKind::Created, Some(user_id), Some(email)) =
            (&activity.kind, &activity.user_id, &activity.email)
        {
            self.creators
                .insert(activity.shipment_id, (user_id.clone(), email.clone()));
        }
        self.activities.push(activity);
    }
}

/// Shared activity storage
///
/// Clones share the same data. [`ActivityStore::set_unavailable`] makes every
/// new unit of work and every commit fail, as a lost database connection would.
#[derive(Debug, Clone, Default)]
pub struct ActivityStore {
    state: Arc<RwLock<StoreState>>,
    unavailable: Arc<AtomicBool>,
}

impl ActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), ActivityError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(ActivityError::Unavailable)
        } else {
            Ok(())
        }
    }

    /// Open a unit of work for one message
    pub fn begin(&self) -> Result<ActivityUnitOfWork, ActivityError> {
        self.check_available()?;
        Ok(ActivityUnitOfWork {
            store: self.clone(),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub async fn activities_for_user(&self, user_id: &str) -> Vec<ShipmentActivity> {
        self.state
            .read()
            .await
            .activities
            .iter()
            .filter(|a| a.user_id.as_deref() == Some(user_id))
            .cloned()
            .collect()
    }

    pub async fn activities_for_shipment(&self, shipment_id: Uuid) -> Vec<ShipmentActivity> {
        self.state
            .read()
            .await
            .activities
            .iter()
            .filter(|a| a.shipment_id == shipment_id)
            .cloned()
            .collect()
    }

    /// `(user_id, email)` of whoever created the shipment
    pub async fn creator_of(&self, shipment_id: Uuid) -> Option<(String, String)> {
        self.state.read().await.creators.get(&shipment_id).cloned()
    }

    pub async fn is_processed(&self, event_id: Uuid) -> bool {
        self.state.read().await.processed.contains(&event_id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.activities.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Pending writes for one message
pub struct ActivityUnitOfWork {
    store: ActivityStore,
    pending: Mutex<Vec<ShipmentActivity>>,
}

impl ActivityUnitOfWork {
    /// Whether `event_id` was already committed, here or by an earlier delivery
    pub async fn is_processed(&self, event_id: Uuid) -> bool {
        if self.pending.lock().await.iter().any(|a| a.event_id == event_id) {
            return true;
        }
        self.store.is_processed(event_id).await
    }

    pub async fn creator_of(&self, shipment_id: Uuid) -> Option<(String, String)> {
        self.store.creator_of(shipment_id).await
    }

    pub async fn record(&self, activity: ShipmentActivity) {
        self.pending.lock().await.push(activity);
    }

    /// Apply every pending record at once
    ///
    /// Records whose event id is already stored are skipped.
    pub async fn commit(&self) -> Result<usize, ActivityError> {
        self.store.check_available()?;

        let pending: Vec<ShipmentActivity> = self.pending.lock().await.drain(..).collect();
        let count = pending.len();

        let mut state = self.store.state.write().await;
        for activity in pending {
            state.apply(activity);
        }
        Ok(count)
    }
}

impl Drop for ActivityUnitOfWork {
    fn drop(&mut self) {
        let discarded = self.pending.get_mut().len();
        if discarded > 0 {
            debug!(discarded, "Unit of work dropped without commit");
        }
    }
}
