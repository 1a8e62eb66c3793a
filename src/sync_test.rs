use super::*;
use std::collections::HashSet;
use std::sync::Mutex;

use frames::Frame;
use serde_json::{Value, json};
use time::macros::{date, time};
use tokio::sync::mpsc;

#[derive(Default)]
struct RecordingDisplay {
    exam_counts: Mutex<Vec<usize>>,
    occupancy_updates: Mutex<usize>,
}

impl DisplaySink for RecordingDisplay {
    fn on_exams_changed(&self, exams: &[Exam]) {
        self.exam_counts.lock().expect("lock").push(exams.len());
    }

    fn on_occupancy_changed(&self, _occupancy: &OccupancyState) {
        *self.occupancy_updates.lock().expect("lock") += 1;
    }
}

struct Harness {
    sync: Synchronizer,
    display: Arc<RecordingDisplay>,
    frames: mpsc::UnboundedReceiver<Frame>,
}

impl Harness {
    fn new() -> Self {
        let (tx, frames) = mpsc::unbounded_channel();
        let display = Arc::new(RecordingDisplay::default());
        let sync = Synchronizer::new(OccupancyState::new(["male", "female"]), EventSender::new(tx), display.clone());
        Self { sync, display, frames }
    }

    fn sent(&mut self) -> Vec<Frame> {
        let mut out = Vec::new();
        while let Ok(frame) = self.frames.try_recv() {
            out.push(frame);
        }
        out
    }
}

fn math() -> Exam {
    Exam { id: "e1".into(), name: "Math".into(), date: date!(2024 - 06 - 01), start: time!(9:00), end: time!(11:00) }
}

fn raw(name: &str, date: &str, start: &str, end: &str) -> RawExamFields {
    RawExamFields { name: name.into(), date: date.into(), start: start.into(), end: end.into() }
}

fn update(candidates: &[&str], value: Option<bool>) -> OccupancyUpdate {
    OccupancyUpdate { candidates: candidates.iter().map(|c| (*c).to_owned()).collect(), value }
}

// =============================================================================
// LOCAL
// =============================================================================

#[test]
fn local_add_then_delete_scenario() {
    let mut h = Harness::new();
    let before = h.sync.exams().len();

    h.sync.on_local_exam_added(math()).expect("add");
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, "new_exam");
    assert_eq!(
        sent[0].args,
        vec![json!({ "id": "e1", "name": "Math", "date": "2024-06-01", "start": "09:00", "end": "11:00" })]
    );

    let removed = h.sync.on_local_exam_removed("e1").expect("remove");
    assert_eq!(removed, math());
    assert_eq!(h.sync.exams().len(), before);
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, "delete_exam");
    assert_eq!(sent[0].args, vec![json!("e1")]);

    assert_eq!(*h.display.exam_counts.lock().expect("lock"), vec![1, 0]);
}

#[test]
fn local_duplicate_add_is_refused_silently() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    let err = h.sync.on_local_exam_added(math()).expect_err("duplicate");
    assert!(matches!(err, SyncError::DuplicateExam(ref id) if id == "e1"));
    assert_eq!(h.sync.exams().len(), 1);
    assert!(h.sent().is_empty());
}

#[test]
fn local_edit_overwrites_and_emits_positional_edit() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    let mut edited = math();
    edited.name = "Physics".into();
    edited.end = time!(12:30);
    h.sync.on_local_exam_edited(edited.clone()).expect("edit");

    assert_eq!(h.sync.exams(), &[edited]);
    let sent = h.sent();
    assert_eq!(sent[0].event, "edit_exam");
    assert_eq!(sent[0].args, vec![json!("e1"), json!("Physics"), json!("2024-06-01"), json!("09:00"), json!("12:30")]);
}

#[test]
fn local_edit_or_remove_of_unknown_id_is_an_error() {
    let mut h = Harness::new();
    assert!(matches!(h.sync.on_local_exam_edited(math()), Err(SyncError::ExamNotFound(_))));
    assert!(matches!(h.sync.on_local_exam_removed("nope"), Err(SyncError::ExamNotFound(_))));
    assert!(h.sent().is_empty());
}

#[test]
fn local_occupancy_emits_only_on_change() {
    let mut h = Harness::new();
    h.sync.on_local_occupancy_changed("male", true).expect("set");
    h.sync.on_local_occupancy_changed("male", true).expect("set again");

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, "toilet");
    assert_eq!(sent[0].args, vec![json!("occupied"), json!("male")]);

    assert!(matches!(
        h.sync.on_local_occupancy_changed("staff", true),
        Err(SyncError::UnknownOccupancyFlag(_))
    ));
}

#[test]
fn local_toggle_twice_restores_value() {
    let mut h = Harness::new();
    assert!(h.sync.on_local_occupancy_toggled("female").expect("toggle"));
    assert!(!h.sync.on_local_occupancy_toggled("female").expect("toggle"));
    assert_eq!(h.sync.occupancy().get("female"), Some(false));

    let values: Vec<Value> = h.sent().into_iter().map(|f| f.args[0].clone()).collect();
    assert_eq!(values, vec![json!("occupied"), json!("vacant")]);
}

// =============================================================================
// REMOTE
// =============================================================================

#[test]
fn remote_new_exam_is_parsed_and_republished() {
    let mut h = Harness::new();
    h.sync.on_remote_new_exam("peer1", &raw("Chem", "2024-06-02", "9:30am", "11 am"));

    let exam = h.sync.exams()[0].clone();
    assert_eq!(exam.name, "Chem");
    assert_eq!(exam.date, date!(2024 - 06 - 02));
    assert_eq!(exam.start, time!(9:30));
    assert_eq!(exam.end, time!(11:00));

    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, "new_exam");
    assert_eq!(sent[0].args[0]["id"], json!(exam.id));
}

#[test]
fn remote_new_exam_with_bad_date_or_time_reports_and_keeps_state() {
    let mut h = Harness::new();
    h.sync.on_remote_new_exam("peer1", &raw("Chem", "02/06/2024", "09:00", "10:00"));
    h.sync.on_remote_new_exam("peer2", &raw("Chem", "2024-06-02", "not-a-time", "10:00"));

    assert!(h.sync.exams().is_empty());
    let sent = h.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].event, "clock_error");
    assert_eq!(sent[0].args, vec![json!("peer1"), json!("date_time_invalid")]);
    assert_eq!(sent[1].args, vec![json!("peer2"), json!("date_time_invalid")]);
}

#[test]
fn remote_edit_overwrites_first_match_only() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    h.sync.on_remote_edit_exam("peer1", "e1", &raw("Biology", "2024-06-03", "13:00", "3pm"));

    let exam = &h.sync.exams()[0];
    assert_eq!(exam.id, "e1");
    assert_eq!(exam.name, "Biology");
    assert_eq!(exam.end, time!(15:00));
    assert!(h.sent().is_empty(), "remote edits are not republished");
}

#[test]
fn remote_edit_of_unknown_id_is_silent() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    h.sync.on_remote_edit_exam("peer1", "missing", &raw("Biology", "bad-date", "x", "y"));

    assert_eq!(h.sync.exams(), &[math()]);
    assert!(h.sent().is_empty());
}

#[test]
fn remote_edit_with_bad_fields_reports_and_keeps_state() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    h.sync.on_remote_edit_exam("peer1", "e1", &raw("Biology", "2024-06-03", "25:99", "3pm"));

    assert_eq!(h.sync.exams(), &[math()]);
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].args, vec![json!("peer1"), json!("date_time_invalid")]);
}

#[test]
fn remote_delete_of_unknown_id_reports_exactly_once() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    h.sync.on_remote_delete_exam("peer1", "missing");

    assert_eq!(h.sync.exams(), &[math()]);
    let sent = h.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].event, "clock_error");
    assert_eq!(sent[0].args, vec![json!("peer1"), json!("exam_not_found")]);
}

#[test]
fn remote_delete_removes_and_republishes() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    h.sync.on_remote_delete_exam("peer1", "e1");

    assert!(h.sync.exams().is_empty());
    let sent = h.sent();
    assert_eq!(sent[0].event, "delete_exam");
    assert_eq!(sent[0].args, vec![json!("e1")]);
}

#[test]
fn remote_occupancy_toggles_or_sets() {
    let mut h = Harness::new();

    h.sync.on_remote_occupancy(&update(&["peer1", "male"], None));
    assert_eq!(h.sync.occupancy().get("male"), Some(true));
    h.sync.on_remote_occupancy(&update(&["peer1", "male"], None));
    assert_eq!(h.sync.occupancy().get("male"), Some(false), "toggle twice restores");

    h.sync.on_remote_occupancy(&update(&["female"], Some(true)));
    h.sync.on_remote_occupancy(&update(&["female"], Some(true)));
    assert_eq!(h.sync.occupancy().get("female"), Some(true), "explicit value is a set");

    assert_eq!(*h.display.occupancy_updates.lock().expect("lock"), 4);
    assert!(h.sent().is_empty(), "remote occupancy is not republished");
}

#[test]
fn remote_occupancy_without_known_flag_is_ignored() {
    let mut h = Harness::new();
    h.sync.on_remote_occupancy(&update(&["peer1"], None));
    assert_eq!(h.sync.occupancy().get("male"), Some(false));
    assert_eq!(h.sync.occupancy().get("female"), Some(false));
    assert_eq!(*h.display.occupancy_updates.lock().expect("lock"), 0);
}

// =============================================================================
// PROPERTIES
// =============================================================================

#[test]
fn ids_stay_unique_across_mixed_adds_and_deletes() {
    let mut h = Harness::new();
    for round in 0..20 {
        h.sync.on_remote_new_exam("peer1", &raw("Chem", "2024-06-02", "9am", "10am"));
        let _ = h.sync.on_local_exam_added(math());
        if round % 3 == 0 {
            let first = h.sync.exams()[0].id.clone();
            h.sync.on_remote_delete_exam("peer1", &first);
        }
        let ids: HashSet<&str> = h.sync.exams().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids.len(), h.sync.exams().len());
    }
}

#[test]
fn announcement_round_trip_keeps_fields_but_not_ids() {
    let mut local = Harness::new();
    local.sync.on_local_exam_added(math()).expect("add");
    let identity = ClockIdentity { id: "abc".into(), display_name: "Hall A".into() };

    let snapshot: Value = serde_json::from_str(&local.sync.announcement(&identity).to_json()).expect("json");
    assert_eq!(snapshot["clockID"], "abc");
    let sent = &snapshot["exams"][0];
    let text = |key: &str| sent[key].as_str().expect("string field").to_owned();

    let mut peer = Harness::new();
    peer.sync.on_remote_new_exam("abc", &raw(&text("name"), &text("date"), &text("start"), &text("end")));

    let copy = &peer.sync.exams()[0];
    let original = math();
    assert_eq!(copy.name, original.name);
    assert_eq!(copy.date, original.date);
    assert_eq!(copy.start, original.start);
    assert_eq!(copy.end, original.end);
    // Each clock assigns its own id to records it receives.
    assert_ne!(copy.id, original.id);
}

#[test]
fn resync_pushes_full_list() {
    let mut h = Harness::new();
    h.sync.on_local_exam_added(math()).expect("add");
    h.sent();

    h.sync.resync();
    let sent = h.sent();
    assert_eq!(sent[0].event, "exam_update");
    assert_eq!(sent[0].args[0]["exams"][0]["id"], "e1");
}
