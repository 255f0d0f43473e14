//! Integration tests for admission, retention, and upload scheduling.

use chrono::{DateTime, Duration, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use rtc_eventlog::{
    list_log_files, read_log_file, DiscoveredLog, LogStorage, LogUploader, NoopObserver,
    NullUploaderFactory, ProfileId, RemoteLogManager, RemoteLogObserver, SessionKey,
    StartLoggingError, ThreadUploaderFactory, UploadCompletion, UploaderFactory, LOG_FILE_VERSION,
};

// ─────────────────────────────────────────────────────────────────────────────
// Fixtures
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum ObserverEvent {
    Started(SessionKey, PathBuf),
    Stopped(SessionKey),
}

#[derive(Clone, Default)]
struct RecordingObserver {
    events: Arc<Mutex<Vec<ObserverEvent>>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<ObserverEvent> {
        self.events.lock().expect("observer lock").clone()
    }
}

impl RemoteLogObserver for RecordingObserver {
    fn on_log_started(&mut self, key: SessionKey, path: &Path) {
        self.events
            .lock()
            .expect("observer lock")
            .push(ObserverEvent::Started(key, path.to_path_buf()));
    }

    fn on_log_stopped(&mut self, key: SessionKey) {
        self.events
            .lock()
            .expect("observer lock")
            .push(ObserverEvent::Stopped(key));
    }
}

struct RecordedUploader {
    path: PathBuf,
}

impl LogUploader for RecordedUploader {
    fn log_path(&self) -> &Path {
        &self.path
    }
}

/// Records every upload and lets the test complete them by hand.
#[derive(Clone, Default)]
struct RecordingFactory {
    started: Arc<Mutex<Vec<PathBuf>>>,
    completions: Arc<Mutex<Vec<UploadCompletion>>>,
}

impl RecordingFactory {
    fn started(&self) -> Vec<PathBuf> {
        self.started.lock().expect("factory lock").clone()
    }

    fn complete_next(&self, success: bool) {
        let completion = self.completions.lock().expect("factory lock").remove(0);
        completion.complete(success);
    }
}

impl UploaderFactory for RecordingFactory {
    fn create(&mut self, path: &Path, completion: UploadCompletion) -> Box<dyn LogUploader> {
        self.started
            .lock()
            .expect("factory lock")
            .push(path.to_path_buf());
        self.completions
            .lock()
            .expect("factory lock")
            .push(completion);
        Box::new(RecordedUploader {
            path: path.to_path_buf(),
        })
    }
}

#[derive(Clone)]
struct FakeClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    fn get(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }

    fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }

    fn boxed(&self) -> Box<dyn Fn() -> DateTime<Utc> + Send> {
        let clock = self.clone();
        Box::new(move || clock.get())
    }
}

struct Harness {
    _temp_dir: tempfile::TempDir,
    logs_dir: PathBuf,
    observer: RecordingObserver,
    factory: RecordingFactory,
    clock: FakeClock,
    manager: RemoteLogManager,
}

fn harness() -> Harness {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let storage = LogStorage::with_root(temp_dir.path().to_path_buf());
    let logs_dir = storage.ensure_logs_dir().expect("logs dir");
    let observer = RecordingObserver::default();
    let factory = RecordingFactory::default();
    let clock = FakeClock::new(Utc::now());
    let manager = RemoteLogManager::with_clock(
        Box::new(observer.clone()),
        Box::new(factory.clone()),
        clock.boxed(),
    );
    Harness {
        _temp_dir: temp_dir,
        logs_dir,
        observer,
        factory,
        clock,
        manager,
    }
}

fn write_discovered(dir: &Path, name: &str, last_modified: DateTime<Utc>) -> DiscoveredLog {
    let path = dir.join(name);
    fs_err::write(&path, b"\x00\x00\x00\x00payload").expect("write discovered log");
    DiscoveredLog {
        path,
        last_modified,
    }
}

fn assert_counters_consistent(manager: &RemoteLogManager, profiles: &[ProfileId]) {
    for profile in profiles {
        let quota = manager.quota(*profile);
        assert_eq!(quota.active, manager.active_log_count(*profile), "{profile} active");
        assert_eq!(quota.pending, manager.pending_log_count(*profile), "{profile} pending");
    }
}

const PROFILE_A: ProfileId = ProfileId(1);
const PROFILE_B: ProfileId = ProfileId(2);

// ─────────────────────────────────────────────────────────────────────────────
// File format
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn finished_log_reads_back_exactly() {
    let mut h = harness();
    let key = SessionKey::new(10, 1);
    h.manager.session_started(key);
    // A second session keeps the finished file from being uploaded.
    h.manager.session_started(SessionKey::new(10, 2));

    let handle = h
        .manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 1024, b"metadata")
        .expect("start");
    assert!(h.manager.write_to_log(key, b"first-event"));
    assert!(h.manager.write_to_log(key, b"second"));
    assert!(h.manager.stop_logging(key));

    let raw = fs_err::read(&handle.path).expect("read raw");
    let mut expected = vec![LOG_FILE_VERSION, 0x00, 0x00, 0x08];
    expected.extend_from_slice(b"metadata");
    expected.extend_from_slice(b"first-event");
    expected.extend_from_slice(b"second");
    assert_eq!(raw, expected);

    let stored = read_log_file(&handle.path).expect("parse");
    assert_eq!(stored.metadata, b"metadata");
    assert_eq!(stored.payload, b"first-eventsecond");
}

#[test]
fn metadata_must_leave_room_for_events() {
    let mut h = harness();
    let key = SessionKey::new(10, 1);
    h.manager.session_started(key);

    let err = h
        .manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 100, &[b'x'; 96])
        .expect_err("no room");
    assert!(matches!(err, StartLoggingError::NoRoomForEvents { .. }));

    // 4 + 90 = 94 < 100 leaves room.
    h.manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 100, &[b'x'; 90])
        .expect("room left");
}

#[test]
fn rejected_creation_leaves_no_state() {
    let mut h = harness();
    let key = SessionKey::new(10, 1);
    h.manager.session_started(key);

    let missing_dir = h.logs_dir.join("does-not-exist");
    let err = h
        .manager
        .start_logging(key, PROFILE_A, &missing_dir, 100, b"")
        .expect_err("io failure");
    assert!(matches!(err, StartLoggingError::Io { .. }));
    assert!(!h.manager.is_logging(key));
    assert!(h.observer.events().is_empty());
    assert_counters_consistent(&h.manager, &[PROFILE_A]);

    // The failure does not poison the session.
    h.manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 100, b"")
        .expect("start after failure");
}

// ─────────────────────────────────────────────────────────────────────────────
// Quotas
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn global_active_cap_blocks_other_profiles() {
    let mut h = harness();
    for lid in 0..3 {
        let key = SessionKey::new(20, lid);
        h.manager.session_started(key);
        h.manager
            .start_logging(key, PROFILE_A, &h.logs_dir, 1000, b"")
            .expect("within cap");
    }

    let fourth = SessionKey::new(21, 0);
    h.manager.session_started(fourth);
    let err = h
        .manager
        .start_logging(fourth, PROFILE_B, &h.logs_dir, 1000, b"")
        .expect_err("global cap");
    assert!(matches!(err, StartLoggingError::ActiveLogLimit { limit: 3 }));
    assert_eq!(h.manager.total_active_logs(), 3);
    assert_counters_consistent(&h.manager, &[PROFILE_A, PROFILE_B]);
}

#[test]
fn per_profile_cap_counts_pending_logs() {
    let mut h = harness();
    // Keeps uploads blocked.
    h.manager.session_started(SessionKey::new(99, 0));

    for lid in 0..5 {
        let key = SessionKey::new(30, lid);
        h.manager.session_started(key);
        h.manager
            .start_logging(key, PROFILE_A, &h.logs_dir, 1000, b"")
            .expect("within profile cap");
        h.manager.session_ended(key);
    }
    assert_eq!(h.manager.quota(PROFILE_A).pending, 5);

    let key = SessionKey::new(30, 100);
    h.manager.session_started(key);
    let err = h
        .manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 1000, b"")
        .expect_err("profile cap");
    assert!(matches!(err, StartLoggingError::ProfileQuotaExceeded { .. }));

    h.manager
        .start_logging(key, PROFILE_B, &h.logs_dir, 1000, b"")
        .expect("other profile unaffected");
    assert_counters_consistent(&h.manager, &[PROFILE_A, PROFILE_B]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Retention
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn admission_prunes_expired_logs_first() {
    let mut h = harness();
    h.manager.session_started(SessionKey::new(99, 0));

    let start = h.clock.get();
    let discovered: Vec<_> = (0..5)
        .map(|i| {
            write_discovered(
                &h.logs_dir,
                &format!("event_log_{i}.log"),
                start - Duration::days(1),
            )
        })
        .collect();
    let paths: Vec<_> = discovered.iter().map(|log| log.path.clone()).collect();
    assert!(h.manager.enable_profile(PROFILE_A, discovered));
    assert_eq!(h.manager.quota(PROFILE_A).pending, 5);
    assert!(!h.manager.can_admit(PROFILE_A));

    let key = SessionKey::new(40, 0);
    h.manager.session_started(key);

    // The discovered logs are now four days old.
    h.clock.advance(Duration::days(3));
    h.manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 1000, b"")
        .expect("pruning made room");

    assert_eq!(h.manager.quota(PROFILE_A).pending, 0);
    assert_eq!(h.manager.quota(PROFILE_A).active, 1);
    assert!(paths.iter().all(|path| !path.exists()));
    assert_counters_consistent(&h.manager, &[PROFILE_A]);
}

#[test]
fn admission_query_prunes_expired_logs_first() {
    let mut h = harness();
    h.manager.session_started(SessionKey::new(99, 0));

    let start = h.clock.get();
    let discovered: Vec<_> = (0..5)
        .map(|i| {
            write_discovered(
                &h.logs_dir,
                &format!("event_log_{i}.log"),
                start - Duration::days(1),
            )
        })
        .collect();
    assert!(h.manager.enable_profile(PROFILE_A, discovered));
    assert!(!h.manager.can_admit(PROFILE_A));

    h.clock.advance(Duration::days(3));
    assert!(h.manager.can_admit(PROFILE_A));
    assert_eq!(h.manager.quota(PROFILE_A).pending, 0);
    assert_counters_consistent(&h.manager, &[PROFILE_A]);
}

#[test]
fn expired_discovered_logs_are_never_uploaded() {
    let mut h = harness();
    let now = h.clock.get();
    let expired = write_discovered(&h.logs_dir, "event_log_old.log", now - Duration::days(4));
    let fresh = write_discovered(&h.logs_dir, "event_log_new.log", now - Duration::hours(1));
    let expired_path = expired.path.clone();
    let fresh_path = fresh.path.clone();

    h.manager.enable_profile(PROFILE_A, vec![fresh, expired]);

    assert!(!expired_path.exists());
    assert_eq!(h.factory.started(), vec![fresh_path]);
    assert_eq!(h.manager.quota(PROFILE_A).pending, 0);
}

#[test]
fn pending_log_expires_while_waiting_for_upload() {
    let mut h = harness();
    let blocker = SessionKey::new(99, 0);
    h.manager.session_started(blocker);

    let key = SessionKey::new(41, 0);
    h.manager.session_started(key);
    let handle = h
        .manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 1000, b"")
        .expect("start");
    h.manager.session_ended(key);
    assert_eq!(h.manager.quota(PROFILE_A).pending, 1);

    h.clock.advance(Duration::days(3) + Duration::seconds(1));
    h.manager.session_ended(blocker);

    assert!(h.factory.started().is_empty());
    assert!(!handle.path.exists());
    assert_eq!(h.manager.quota(PROFILE_A).pending, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Session teardown and uploads
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn session_end_finishes_log_and_starts_upload() {
    let mut h = harness();
    let key = SessionKey::new(50, 1);
    h.manager.session_started(key);
    let handle = h
        .manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 1000, b"m")
        .expect("start");

    assert!(h.manager.session_ended(key));

    assert_eq!(
        h.observer.events(),
        vec![
            ObserverEvent::Started(key, handle.path.clone()),
            ObserverEvent::Stopped(key),
        ]
    );
    assert_eq!(h.factory.started(), vec![handle.path.clone()]);
    assert_eq!(
        h.manager.upload_in_progress().map(|log| log.path.clone()),
        Some(handle.path)
    );
    assert_eq!(h.manager.quota(PROFILE_A).pending, 0);
    assert_counters_consistent(&h.manager, &[PROFILE_A]);
}

#[test]
fn unknown_or_duplicate_sessions_are_rejected() {
    let mut h = harness();
    let key = SessionKey::new(51, 1);
    assert!(!h.manager.session_ended(key));
    assert!(h.manager.session_started(key));
    assert!(!h.manager.session_started(key));
    assert!(h.manager.session_ended(key));
    assert!(!h.manager.session_ended(key));
}

#[test]
fn live_session_blocks_uploads_until_it_ends() {
    let mut h = harness();
    let survivor = SessionKey::new(60, 0);
    let finisher = SessionKey::new(60, 1);
    h.manager.session_started(survivor);
    h.manager.session_started(finisher);
    h.manager
        .start_logging(finisher, PROFILE_A, &h.logs_dir, 1000, b"")
        .expect("start");
    h.manager.session_ended(finisher);

    h.manager.maybe_start_upload();
    assert!(h.factory.started().is_empty());
    assert!(h.manager.upload_in_progress().is_none());

    h.manager.session_ended(survivor);
    assert_eq!(h.factory.started().len(), 1);
}

#[test]
fn maybe_start_upload_is_idempotent() {
    let mut h = harness();
    let now = h.clock.get();
    let first = write_discovered(&h.logs_dir, "event_log_1.log", now - Duration::hours(2));
    let second = write_discovered(&h.logs_dir, "event_log_2.log", now - Duration::hours(1));
    h.manager.enable_profile(PROFILE_A, vec![second, first]);
    assert_eq!(h.factory.started().len(), 1);

    h.manager.maybe_start_upload();
    h.manager.maybe_start_upload();
    assert_eq!(h.factory.started().len(), 1);
}

#[test]
fn uploads_run_one_at_a_time_in_order() {
    let mut h = harness();
    let now = h.clock.get();
    let first = write_discovered(&h.logs_dir, "event_log_1.log", now - Duration::hours(3));
    let second = write_discovered(&h.logs_dir, "event_log_2.log", now - Duration::hours(2));
    let third = write_discovered(&h.logs_dir, "event_log_3.log", now - Duration::hours(1));
    let paths = vec![first.path.clone(), second.path.clone(), third.path.clone()];
    h.manager.enable_profile(PROFILE_A, vec![third, first, second]);
    assert_eq!(h.factory.started(), paths[..1].to_vec());

    h.factory.complete_next(true);
    assert_eq!(h.manager.process_upload_completions(), 1);
    assert_eq!(h.factory.started(), paths[..2].to_vec());
    assert!(!paths[0].exists());

    // A failed upload is dropped, not retried.
    h.factory.complete_next(false);
    h.manager.process_upload_completions();
    assert_eq!(h.factory.started(), paths);
    assert!(!paths[1].exists());

    h.factory.complete_next(true);
    h.manager.process_upload_completions();
    assert!(h.manager.upload_in_progress().is_none());
    assert_eq!(h.manager.pending_logs().count(), 0);
    assert_eq!(h.factory.started().len(), 3);
}

#[test]
fn process_termination_finishes_all_its_logs() {
    let mut h = harness();
    let a = SessionKey::new(70, 0);
    let b = SessionKey::new(70, 1);
    let other = SessionKey::new(71, 0);
    for key in [a, b, other] {
        h.manager.session_started(key);
    }
    h.manager
        .start_logging(a, PROFILE_A, &h.logs_dir, 1000, b"")
        .expect("start a");
    h.manager
        .start_logging(b, PROFILE_B, &h.logs_dir, 1000, b"")
        .expect("start b");

    h.manager.process_terminated(70);

    assert!(!h.manager.is_logging(a));
    assert!(!h.manager.is_logging(b));
    assert_eq!(h.manager.active_sessions().collect::<Vec<_>>(), vec![other]);
    assert_eq!(h.manager.quota(PROFILE_A).pending, 1);
    assert_eq!(h.manager.quota(PROFILE_B).pending, 1);
    // The other process still holds uploads back.
    assert!(h.factory.started().is_empty());

    h.manager.process_terminated(71);
    assert_eq!(h.factory.started().len(), 1);
    assert_counters_consistent(&h.manager, &[PROFILE_A, PROFILE_B]);
}

#[test]
fn process_termination_without_logs_unblocks_uploads() {
    let mut h = harness();
    h.manager.session_started(SessionKey::new(80, 0));
    let now = h.clock.get();
    let log = write_discovered(&h.logs_dir, "event_log_1.log", now);
    h.manager.enable_profile(PROFILE_A, vec![log]);
    assert!(h.factory.started().is_empty());

    h.manager.process_terminated(80);
    assert_eq!(h.factory.started().len(), 1);
}

#[test]
fn swapping_factory_discards_in_flight_upload() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let now = Utc::now();
    let first = write_discovered(temp_dir.path(), "event_log_1.log", now - Duration::hours(2));
    let second = write_discovered(temp_dir.path(), "event_log_2.log", now - Duration::hours(1));
    let first_path = first.path.clone();
    let second_path = second.path.clone();

    let mut manager = RemoteLogManager::new(Box::new(NoopObserver), Box::new(NullUploaderFactory));
    manager.enable_profile(PROFILE_A, vec![first, second]);
    assert_eq!(
        manager.upload_in_progress().map(|log| log.path.clone()),
        Some(first_path.clone())
    );

    let factory = RecordingFactory::default();
    manager.set_uploader_factory(Box::new(factory.clone()));

    assert_eq!(factory.started(), vec![second_path]);
    assert!(first_path.exists());
}

#[test]
fn result_of_discarded_upload_leaves_slot_busy() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let now = Utc::now();
    let first = write_discovered(temp_dir.path(), "event_log_1.log", now - Duration::hours(2));
    let second = write_discovered(temp_dir.path(), "event_log_2.log", now - Duration::hours(1));
    let first_path = first.path.clone();
    let second_path = second.path.clone();

    let old_factory = RecordingFactory::default();
    let mut manager = RemoteLogManager::new(Box::new(NoopObserver), Box::new(old_factory.clone()));
    manager.enable_profile(PROFILE_A, vec![first, second]);
    assert_eq!(old_factory.started(), vec![first_path.clone()]);

    let new_factory = RecordingFactory::default();
    manager.set_uploader_factory(Box::new(new_factory.clone()));
    assert_eq!(new_factory.started(), vec![second_path.clone()]);

    old_factory.complete_next(true);
    assert!(!manager.wait_for_upload(StdDuration::from_secs(5)));
    assert_eq!(
        manager.upload_in_progress().map(|log| log.path.clone()),
        Some(second_path.clone())
    );
    assert!(first_path.exists());

    new_factory.complete_next(true);
    assert!(manager.wait_for_upload(StdDuration::from_secs(5)));
    assert!(manager.upload_in_progress().is_none());
    assert!(!second_path.exists());
}

#[test]
fn thread_uploader_completes_on_manager_sequence() {
    let temp_dir = tempfile::tempdir().expect("temp dir");
    let uploaded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&uploaded);
    let factory = ThreadUploaderFactory::new(move |path: &Path| {
        sink.lock().expect("sink lock").push(path.to_path_buf());
        true
    });
    let mut manager = RemoteLogManager::new(Box::new(NoopObserver), Box::new(factory));

    let key = SessionKey::new(90, 0);
    manager.session_started(key);
    let handle = manager
        .start_logging(key, PROFILE_A, temp_dir.path(), 1000, b"")
        .expect("start");
    manager.write_to_log(key, b"event");
    manager.session_ended(key);

    assert!(manager.wait_for_upload(StdDuration::from_secs(5)));
    assert!(manager.upload_in_progress().is_none());
    assert_eq!(*uploaded.lock().expect("sink lock"), vec![handle.path.clone()]);
    assert!(!handle.path.exists());
}

// ─────────────────────────────────────────────────────────────────────────────
// Profiles
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn enabling_twice_is_rejected() {
    let mut h = harness();
    assert!(h.manager.enable_profile(PROFILE_A, Vec::new()));
    assert!(!h.manager.enable_profile(PROFILE_A, Vec::new()));
    assert!(h.manager.is_profile_enabled(PROFILE_A));
}

#[test]
fn disabling_profile_releases_its_logs() {
    let mut h = harness();
    let blocker = SessionKey::new(99, 0);
    h.manager.session_started(blocker);
    let now = h.clock.get();
    let discovered = write_discovered(&h.logs_dir, "event_log_1.log", now);
    let discovered_path = discovered.path.clone();
    h.manager.enable_profile(PROFILE_A, vec![discovered]);

    let key = SessionKey::new(100, 0);
    h.manager.session_started(key);
    let handle = h
        .manager
        .start_logging(key, PROFILE_A, &h.logs_dir, 1000, b"")
        .expect("start");

    assert!(h.manager.disable_profile(PROFILE_A));
    assert!(!h.manager.is_logging(key));
    assert_eq!(h.manager.quota(PROFILE_A).total(), 0);
    assert_eq!(h.manager.pending_logs().count(), 0);
    assert!(discovered_path.exists());
    assert!(handle.path.exists());
    assert_eq!(h.observer.events().last(), Some(&ObserverEvent::Stopped(key)));
    assert!(!h.manager.disable_profile(PROFILE_A));

    // Re-enabling rediscovers both files.
    let listing = list_log_files(&h.logs_dir).expect("list");
    assert!(h.manager.enable_profile(PROFILE_A, listing));
    assert_eq!(h.manager.quota(PROFILE_A).pending, 2);
    assert_counters_consistent(&h.manager, &[PROFILE_A]);
}
