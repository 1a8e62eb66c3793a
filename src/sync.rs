//! State synchronizer — authoritative local exams and occupancy flags.
//!
//! DESIGN
//! ======
//! Local mutations are applied first and then emitted. Remote mutations are
//! applied only after their fields parse. Either way the relay sees every
//! change as one of the exam events or the occupancy event, so a clock
//! cannot tell "I made this change" from "a peer made this change" apart
//! from the ordering of apply and send.
//!
//! After a remote `new_exam` or `delete_exam` is applied the resulting
//! record is published back, so the relay's cache carries the id this clock
//! assigned. Remote edits and remote occupancy changes are not republished.
//!
//! ERROR HANDLING
//! ==============
//! Remote failures are answered to the sender with `clock_error` and leave
//! local state untouched. Local failures are returned to the caller. A
//! failed send is logged only; the resync after reconnect repairs drift.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{ConnectivityState, EventSender};
use crate::error::{ErrorCode, SyncError};
use crate::events::{Announcement, OccupancyUpdate, Outbound};
use crate::exam::{Exam, RawExamFields};
use crate::identity::ClockIdentity;
use crate::occupancy::OccupancyState;

/// Display collaborator notified after state changes. It must not call back
/// into the synchronizer.
pub trait DisplaySink: Send + Sync {
    fn on_exams_changed(&self, _exams: &[Exam]) {}
    fn on_occupancy_changed(&self, _occupancy: &OccupancyState) {}
    fn on_connectivity_changed(&self, _state: ConnectivityState) {}
}

/// Sink that ignores every notification.
pub struct NullDisplay;

impl DisplaySink for NullDisplay {}

pub struct Synchronizer {
    exams: Vec<Exam>,
    occupancy: OccupancyState,
    outbox: EventSender,
    display: Arc<dyn DisplaySink>,
}

impl Synchronizer {
    #[must_use]
    pub fn new(occupancy: OccupancyState, outbox: EventSender, display: Arc<dyn DisplaySink>) -> Self {
        Self { exams: Vec::new(), occupancy, outbox, display }
    }

    #[must_use]
    pub fn exams(&self) -> &[Exam] {
        &self.exams
    }

    #[must_use]
    pub fn occupancy(&self) -> &OccupancyState {
        &self.occupancy
    }

    // =========================================================================
    // LOCAL
    // =========================================================================

    /// Append a locally created exam and publish it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::DuplicateExam`] if an exam with the same id is
    /// already held; nothing is emitted in that case.
    pub fn on_local_exam_added(&mut self, exam: Exam) -> Result<(), SyncError> {
        if self.find(&exam.id).is_some() {
            return Err(SyncError::DuplicateExam(exam.id));
        }
        info!(exam_id = %exam.id, name = %exam.name, "sync: local add");
        self.exams.push(exam.clone());
        self.exams_changed();
        self.emit(Outbound::NewExam(exam));
        Ok(())
    }

    /// Overwrite the exam with the same id and publish the edit.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ExamNotFound`] if no exam has that id.
    pub fn on_local_exam_edited(&mut self, exam: Exam) -> Result<(), SyncError> {
        let i = self
            .find(&exam.id)
            .ok_or_else(|| SyncError::ExamNotFound(exam.id.clone()))?;
        info!(exam_id = %exam.id, "sync: local edit");
        self.exams[i] = exam.clone();
        self.exams_changed();
        self.emit(Outbound::EditExam(exam));
        Ok(())
    }

    /// Remove an exam and publish the delete.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ExamNotFound`] if no exam has that id.
    pub fn on_local_exam_removed(&mut self, exam_id: &str) -> Result<Exam, SyncError> {
        let i = self
            .find(exam_id)
            .ok_or_else(|| SyncError::ExamNotFound(exam_id.to_owned()))?;
        let removed = self.exams.remove(i);
        info!(%exam_id, "sync: local delete");
        self.exams_changed();
        self.emit(Outbound::DeleteExam(removed.id.clone()));
        Ok(removed)
    }

    /// Set an occupancy flag. Emits only when the value actually changes.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownOccupancyFlag`] for unconfigured flags.
    pub fn on_local_occupancy_changed(&mut self, flag: &str, occupied: bool) -> Result<(), SyncError> {
        let previous = self
            .occupancy
            .set(flag, occupied)
            .ok_or_else(|| SyncError::UnknownOccupancyFlag(flag.to_owned()))?;
        if previous == occupied {
            debug!(%flag, occupied, "sync: occupancy unchanged");
            return Ok(());
        }
        info!(%flag, occupied, "sync: local occupancy");
        self.display.on_occupancy_changed(&self.occupancy);
        self.emit(Outbound::Occupancy { flag: flag.to_owned(), occupied });
        Ok(())
    }

    /// Flip an occupancy flag locally, returning its new value.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownOccupancyFlag`] for unconfigured flags.
    pub fn on_local_occupancy_toggled(&mut self, flag: &str) -> Result<bool, SyncError> {
        let current = self
            .occupancy
            .get(flag)
            .ok_or_else(|| SyncError::UnknownOccupancyFlag(flag.to_owned()))?;
        self.on_local_occupancy_changed(flag, !current)?;
        Ok(!current)
    }

    // =========================================================================
    // REMOTE
    // =========================================================================

    /// Apply a peer's new exam under a freshly assigned local id.
    pub fn on_remote_new_exam(&mut self, sender: &str, fields: &RawExamFields) {
        let draft = match fields.parse() {
            Ok(draft) => draft,
            Err(e) => return self.reply_error(sender, &e),
        };
        let exam = draft.into_exam();
        info!(%sender, exam_id = %exam.id, name = %exam.name, "sync: remote add");
        self.exams.push(exam.clone());
        self.exams_changed();
        self.emit(Outbound::NewExam(exam));
    }

    /// Overwrite the first exam whose id matches. Unknown ids are ignored.
    pub fn on_remote_edit_exam(&mut self, sender: &str, target_id: &str, fields: &RawExamFields) {
        let Some(i) = self.find(target_id) else {
            debug!(%sender, %target_id, "sync: remote edit of unknown exam ignored");
            return;
        };
        let draft = match fields.parse() {
            Ok(draft) => draft,
            Err(e) => return self.reply_error(sender, &e),
        };
        info!(%sender, %target_id, "sync: remote edit");
        self.exams[i].apply(draft);
        self.exams_changed();
    }

    /// Remove the first exam whose id matches, or report `exam_not_found`.
    pub fn on_remote_delete_exam(&mut self, sender: &str, target_id: &str) {
        let Some(i) = self.find(target_id) else {
            return self.reply_error(sender, &SyncError::ExamNotFound(target_id.to_owned()));
        };
        let removed = self.exams.remove(i);
        info!(%sender, %target_id, "sync: remote delete");
        self.exams_changed();
        self.emit(Outbound::DeleteExam(removed.id));
    }

    /// Set the named flag to an explicit value, or toggle it when the
    /// event carried none.
    pub fn on_remote_occupancy(&mut self, update: &OccupancyUpdate) {
        let Some(flag) = self.occupancy.resolve(&update.candidates).map(str::to_owned) else {
            warn!(candidates = ?update.candidates, "sync: occupancy event names no known flag");
            return;
        };
        let occupied = match update.value {
            Some(value) => {
                self.occupancy.set(&flag, value);
                value
            }
            None => self.occupancy.toggle(&flag).unwrap_or_default(),
        };
        info!(%flag, occupied, "sync: remote occupancy");
        self.display.on_occupancy_changed(&self.occupancy);
    }

    /// Report a malformed inbound event to its sender.
    pub fn on_malformed(&self, sender: &str, error: &SyncError) {
        self.reply_error(sender, error);
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Identity plus the full exam list, for connect and re-announcement.
    #[must_use]
    pub fn announcement(&self, identity: &ClockIdentity) -> Announcement {
        Announcement { identity: identity.clone(), exams: self.exams.clone() }
    }

    /// Push the full exam list to the relay.
    pub fn resync(&self) {
        info!(count = self.exams.len(), "sync: resync");
        self.emit(Outbound::ExamUpdate(self.exams.clone()));
    }

    pub fn connectivity_changed(&self, state: ConnectivityState) {
        self.display.on_connectivity_changed(state);
    }

    fn find(&self, exam_id: &str) -> Option<usize> {
        self.exams.iter().position(|exam| exam.id == exam_id)
    }

    fn exams_changed(&self) {
        self.display.on_exams_changed(&self.exams);
    }

    fn emit(&self, event: Outbound) {
        if let Err(e) = self.outbox.send(event) {
            warn!(error = %e, "sync: event dropped");
        }
    }

    fn reply_error(&self, sender: &str, error: &SyncError) {
        let reason = error.reason();
        warn!(%sender, %reason, error = %error, "sync: rejecting remote event");
        self.emit(Outbound::ClockError { sender: sender.to_owned(), reason });
    }
}

#[cfg(test)]
#[path = "sync_test.rs"]
mod tests;
