//! The per-invocation synchronization state machine

use std::sync::Arc;

use super::hang::HangRecovery;
use super::processor::ProcessorRegistry;
use super::selector::OriginSelector;
use crate::clock::Clock;
use crate::config::SchedulerConfig;
use crate::error::SyncError;
use crate::models::{MailboxOrigin, OriginId, SyncCode, SyncStateUpdate};
use crate::storage::OriginRepository;

/// Result of one [`EmailSynchronizer::sync`] pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No origin was eligible, or the concurrency limit was reached
    NothingToSync,
    /// The origin was synchronized successfully
    Synchronized(OriginId),
}

/// Synchronizes at most one origin per [`sync`](Self::sync) call
///
/// Workers coordinate only through the origin state in the repository: an
/// origin is claimed by writing `InProcess` before the processor runs. Two
/// workers may still claim the same origin between the candidate query and
/// that write; the entity batch makes such a duplicate run harmless.
pub struct EmailSynchronizer {
    repository: Arc<dyn OriginRepository>,
    clock: Arc<dyn Clock>,
    processors: ProcessorRegistry,
    selector: OriginSelector,
    hang_recovery: HangRecovery,
}

impl EmailSynchronizer {
    pub fn new(
        repository: Arc<dyn OriginRepository>,
        clock: Arc<dyn Clock>,
        processors: ProcessorRegistry,
    ) -> Self {
        Self {
            selector: OriginSelector::new(repository.clone(), clock.clone()),
            hang_recovery: HangRecovery::new(repository.clone(), clock.clone()),
            repository,
            clock,
            processors,
        }
    }

    /// Run one pass with the limits of a loaded configuration
    pub fn sync_with_config(&self, config: &SchedulerConfig) -> Result<SyncOutcome, SyncError> {
        self.sync(config.max_concurrent_tasks, config.min_exec_period_minutes)
    }

    /// Recover hung origins, then pick and synchronize the most urgent one
    ///
    /// A processor failure marks the origin as failed and is returned as
    /// [`SyncError::Processor`]. It is retried only when the origin becomes
    /// eligible again on a later pass.
    pub fn sync(
        &self,
        max_concurrent_tasks: usize,
        min_exec_period_minutes: i64,
    ) -> Result<SyncOutcome, SyncError> {
        self.hang_recovery.reset_hanged_origins()?;

        let Some(mut origin) = self
            .selector
            .select_origin_to_sync(max_concurrent_tasks, min_exec_period_minutes)?
        else {
            return Ok(SyncOutcome::NothingToSync);
        };

        let factory = self
            .processors
            .get(origin.kind)
            .ok_or(SyncError::NoProcessor(origin.kind))?;
        let processor = match factory.create(&origin) {
            Ok(processor) => processor,
            Err(error) => return Err(self.fail(&origin, error)),
        };

        self.change_state(&mut origin, SyncStateUpdate::new(SyncCode::InProcess, self.clock.now()))?;

        // Recorded before the work starts so long runs keep their slot in the rotation
        let synchronized_at = self.clock.now();

        log::info!("[SYNC] Start synchronization of email origin {} ({})", origin.id, origin.kind);
        if let Err(error) = processor.process(&origin) {
            return Err(self.fail(&origin, error));
        }

        let done = SyncStateUpdate::new(SyncCode::Success, self.clock.now())
            .synchronized_at(synchronized_at);
        self.change_state(&mut origin, done)?;
        log::info!("[SYNC] The synchronization of email origin {} completed.", origin.id);

        Ok(SyncOutcome::Synchronized(origin.id))
    }

    fn change_state(
        &self,
        origin: &mut MailboxOrigin,
        update: SyncStateUpdate,
    ) -> Result<(), SyncError> {
        self.repository
            .update_sync_state(origin.id, &update)
            .map_err(|error| SyncError::StateWrite {
                origin: origin.id,
                error,
            })?;
        origin.apply(&update);
        Ok(())
    }

    /// Mark the origin as failed, keeping the processor error as the result
    fn fail(&self, origin: &MailboxOrigin, error: anyhow::Error) -> SyncError {
        log::error!(
            "[SYNC] The synchronization of email origin {} failed: {:#}",
            origin.id,
            error
        );

        let update = SyncStateUpdate::new(SyncCode::Failure, self.clock.now());
        if let Err(write_error) = self.repository.update_sync_state(origin.id, &update) {
            log::error!(
                "[SYNC] Cannot mark email origin {} as failed: {:#}",
                origin.id,
                write_error
            );
        }

        SyncError::Processor {
            origin: origin.id,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::OriginKind;
    use crate::storage::InMemoryMailStore;
    use crate::sync::SynchronizationProcessor;
    use anyhow::{Result, anyhow};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::Mutex;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// Advances the clock while "working" and records what it saw
    struct SlowProcessor {
        clock: Arc<FixedClock>,
        seen: Arc<Mutex<Vec<MailboxOrigin>>>,
        fail: bool,
    }

    impl SynchronizationProcessor for SlowProcessor {
        fn process(&self, origin: &MailboxOrigin) -> Result<()> {
            self.seen.lock().unwrap().push(origin.clone());
            self.clock.advance(Duration::minutes(5));
            if self.fail {
                Err(anyhow!("mailbox unreachable"))
            } else {
                Ok(())
            }
        }
    }

    struct Setup {
        store: Arc<InMemoryMailStore>,
        seen: Arc<Mutex<Vec<MailboxOrigin>>>,
        synchronizer: EmailSynchronizer,
    }

    fn setup(fail: bool) -> Setup {
        let store = Arc::new(InMemoryMailStore::new());
        let clock = Arc::new(FixedClock::new(now()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (processor_clock, processor_seen) = (clock.clone(), seen.clone());
        let registry = ProcessorRegistry::new().with(
            OriginKind::Imap,
            move |_: &MailboxOrigin| -> Result<Box<dyn SynchronizationProcessor>> {
                Ok(Box::new(SlowProcessor {
                    clock: processor_clock.clone(),
                    seen: processor_seen.clone(),
                    fail,
                }))
            },
        );

        let synchronizer = EmailSynchronizer::new(store.clone(), clock, registry);
        Setup {
            store,
            seen,
            synchronizer,
        }
    }

    #[test]
    fn test_success_records_start_time() {
        let s = setup(false);
        let id = s.store.save_origin(MailboxOrigin::new(OriginKind::Imap)).unwrap();

        let outcome = s.synchronizer.sync(3, 30).unwrap();
        assert_eq!(outcome, SyncOutcome::Synchronized(id));

        let origin = s.store.get_origin(id).unwrap().unwrap();
        assert_eq!(origin.sync_code, Some(SyncCode::Success));
        assert_eq!(origin.synchronized_at, Some(now()));
        assert_eq!(origin.sync_code_updated_at, Some(now() + Duration::minutes(5)));
        assert_eq!(origin.sync_count, 1);

        // The processor saw the claimed origin
        let seen = s.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sync_code, Some(SyncCode::InProcess));
    }

    #[test]
    fn test_failure_marks_origin_and_returns_error() {
        let s = setup(true);
        let id = s.store.save_origin(MailboxOrigin::new(OriginKind::Imap)).unwrap();

        let err = s.synchronizer.sync(3, 30).unwrap_err();
        assert!(matches!(err, SyncError::Processor { origin, .. } if origin == id));
        assert_eq!(err.processor_error().unwrap().to_string(), "mailbox unreachable");

        let origin = s.store.get_origin(id).unwrap().unwrap();
        assert_eq!(origin.sync_code, Some(SyncCode::Failure));
        assert_eq!(origin.synchronized_at, None);
        assert_eq!(origin.sync_count, 0);
    }

    #[test]
    fn test_nothing_to_sync() {
        let s = setup(false);
        assert_eq!(s.synchronizer.sync(3, 30).unwrap(), SyncOutcome::NothingToSync);
    }

    #[test]
    fn test_missing_processor() {
        let s = setup(false);
        let id = s.store.save_origin(MailboxOrigin::new(OriginKind::Pop3)).unwrap();

        let err = s.synchronizer.sync(3, 30).unwrap_err();
        assert!(matches!(err, SyncError::NoProcessor(OriginKind::Pop3)));
        assert_eq!(s.store.get_origin(id).unwrap().unwrap().sync_code, None);
    }

    #[test]
    fn test_sync_with_config() {
        let s = setup(false);
        s.store.save_origin(MailboxOrigin::new(OriginKind::Imap)).unwrap();

        let config = SchedulerConfig {
            max_concurrent_tasks: 0,
            ..SchedulerConfig::default()
        };
        assert_eq!(s.synchronizer.sync_with_config(&config).unwrap(), SyncOutcome::NothingToSync);
        assert!(s.seen.lock().unwrap().is_empty());
    }

    thread_local! {
        static RECORDS: std::cell::RefCell<Vec<String>> = const { std::cell::RefCell::new(Vec::new()) };
    }

    /// Keeps the sync module's log lines per test thread
    struct CaptureLogger;

    impl log::Log for CaptureLogger {
        fn enabled(&self, _: &log::Metadata) -> bool {
            true
        }

        fn log(&self, record: &log::Record) {
            if record.target().starts_with("mailsync::sync") {
                RECORDS.with(|r| r.borrow_mut().push(record.args().to_string()));
            }
        }

        fn flush(&self) {}
    }

    #[test]
    fn test_log_lines_carry_sync_prefix() {
        static LOGGER: CaptureLogger = CaptureLogger;
        let _ = log::set_logger(&LOGGER);
        log::set_max_level(log::LevelFilter::Trace);

        let ok = setup(false);
        ok.store.save_origin(MailboxOrigin::new(OriginKind::Imap)).unwrap();
        ok.synchronizer.sync(3, 30).unwrap();
        ok.synchronizer.sync(3, 30).unwrap();

        let failing = setup(true);
        failing.store.save_origin(MailboxOrigin::new(OriginKind::Imap)).unwrap();
        failing.synchronizer.sync(3, 30).unwrap_err();

        let records = RECORDS.with(|r| r.take());
        assert!(records.len() >= 8, "{records:?}");
        for line in &records {
            assert!(line.starts_with("[SYNC] "), "{line}");
        }
    }
}
