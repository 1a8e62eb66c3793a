//! Identity collision resolution.
//!
//! The relay sends `clock_id_clash` when another connected clock already
//! uses our id. We regenerate the id in place and re-announce with
//! `clock_id_un_clash`. Clashes are counted until any other inbound event
//! arrives; too many in a row means something other than bad luck is wrong
//! and the client stops.

use tracing::{error, info};

use crate::channel::EventSender;
use crate::error::SyncError;
use crate::events::Outbound;
use crate::identity::IdentityStore;
use crate::sync::Synchronizer;

pub struct CollisionResolver {
    max_retries: u32,
    attempts: u32,
    outbox: EventSender,
}

impl CollisionResolver {
    #[must_use]
    pub fn new(max_retries: u32, outbox: EventSender) -> Self {
        Self { max_retries, attempts: 0, outbox }
    }

    /// Consecutive clashes seen since the last reset.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Regenerate the id and re-announce. Returns the new id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::IdentityCollision`] once the consecutive clash
    /// count exceeds the bound, and [`SyncError::Identity`] if the new id
    /// cannot be persisted. The old id stays in use then and nothing is
    /// announced.
    pub fn on_clash(&mut self, store: &mut IdentityStore, sync: &Synchronizer) -> Result<String, SyncError> {
        self.attempts += 1;
        if self.attempts > self.max_retries {
            error!(attempts = self.attempts, clock_id = %store.current().id, "collision: retry bound exceeded");
            return Err(SyncError::IdentityCollision { attempts: self.max_retries });
        }

        let previous = store.current().id.clone();
        let id = store.regenerate_id()?;
        info!(%previous, clock_id = %id, attempt = self.attempts, "collision: regenerated id");

        self.outbox
            .send(Outbound::ClockIdUnclash(sync.announcement(store.current())))?;
        Ok(id)
    }

    /// Forget earlier clashes.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use frames::Frame;
    use tokio::sync::mpsc;

    use crate::identity::ClockIdentity;
    use crate::occupancy::OccupancyState;
    use crate::sync::NullDisplay;

    fn fixture(max_retries: u32) -> (CollisionResolver, IdentityStore, Synchronizer, mpsc::UnboundedReceiver<Frame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let outbox = EventSender::new(tx);
        let store = IdentityStore::in_memory(ClockIdentity { id: "same".into(), display_name: "Hall A".into() });
        let sync = Synchronizer::new(OccupancyState::new(["toilet"]), outbox.clone(), Arc::new(NullDisplay));
        (CollisionResolver::new(max_retries, outbox), store, sync, rx)
    }

    #[test]
    fn clash_regenerates_and_reannounces() {
        let (mut resolver, mut store, sync, mut rx) = fixture(3);

        let id = resolver.on_clash(&mut store, &sync).expect("resolve");

        assert_ne!(id, "same");
        assert_eq!(store.current().id, id);
        assert_eq!(store.current().display_name, "Hall A");

        let frame = rx.try_recv().expect("re-announcement");
        assert_eq!(frame.event, "clock_id_un_clash");
        assert_eq!(frame.args[0]["clockID"], id.as_str());
        assert_eq!(frame.args[0]["clockName"], "Hall A");
        assert!(frame.args[0]["exams"].is_array());
    }

    #[test]
    fn consecutive_clashes_beyond_bound_are_fatal() {
        let (mut resolver, mut store, sync, _rx) = fixture(2);

        resolver.on_clash(&mut store, &sync).expect("first");
        resolver.on_clash(&mut store, &sync).expect("second");
        let err = resolver.on_clash(&mut store, &sync).expect_err("third");

        assert!(matches!(err, SyncError::IdentityCollision { attempts: 2 }));
    }

    #[test]
    fn unpersistable_id_is_not_adopted_or_announced() {
        let (mut resolver, _, sync, mut rx) = fixture(3);
        let dir = tempfile::tempdir().expect("tempdir");
        let state_dir = dir.path().join("state");
        std::fs::create_dir(&state_dir).expect("mkdir");
        let mut store = IdentityStore::load_or_create(state_dir.join("identity.json"), "Hall A").expect("create");
        let before = store.current().id.clone();
        std::fs::remove_dir_all(&state_dir).expect("remove state dir");

        let err = resolver.on_clash(&mut store, &sync).expect_err("write fails");

        assert!(matches!(err, SyncError::Identity(_)));
        assert_eq!(store.current().id, before);
        assert!(rx.try_recv().is_err(), "nothing announced");
    }

    #[test]
    fn reset_restores_the_budget() {
        let (mut resolver, mut store, sync, _rx) = fixture(1);

        resolver.on_clash(&mut store, &sync).expect("first");
        assert_eq!(resolver.attempts(), 1);
        resolver.reset();
        resolver.on_clash(&mut store, &sync).expect("after reset");
    }
}
