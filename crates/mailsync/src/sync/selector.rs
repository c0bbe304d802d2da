//! Selection of the next origin to synchronize

use std::sync::Arc;

use anyhow::Result;

use super::priority::exec_period_border;
use crate::clock::Clock;
use crate::models::MailboxOrigin;
use crate::storage::{CandidateOrder, CandidateQuery, OriginRepository};

/// Picks the most urgent eligible origin
///
/// In-process origins are returned by the candidate query ahead of the rest
/// and count against the concurrency limit, but are never selected.
pub struct OriginSelector {
    repository: Arc<dyn OriginRepository>,
    clock: Arc<dyn Clock>,
}

impl OriginSelector {
    pub fn new(repository: Arc<dyn OriginRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Find the origin to synchronize next
    ///
    /// Returns `None` when nothing is eligible or when `max_concurrent_tasks`
    /// origins are already in process.
    pub fn select_origin_to_sync(
        &self,
        max_concurrent_tasks: usize,
        min_exec_period_minutes: i64,
    ) -> Result<Option<MailboxOrigin>> {
        log::info!("[SYNC] Finding an email origin ...");

        let now = self.clock.now();
        let query = CandidateQuery {
            active_only: true,
            updated_before: exec_period_border(now, min_exec_period_minutes),
            now,
            max_results: max_concurrent_tasks.saturating_add(1),
            order: CandidateOrder::SyncPriority,
        };

        let candidates = self.repository.find_sync_candidates(&query)?;
        let mut in_process = 0;

        for candidate in candidates {
            if in_process >= max_concurrent_tasks {
                log::info!("[SYNC] The maximum number of concurrent tasks is reached.");
                return Ok(None);
            }
            if candidate.is_in_process() {
                in_process += 1;
                continue;
            }

            log::info!("[SYNC] Found email origin id: {}", candidate.id);
            return Ok(Some(candidate));
        }

        if in_process >= max_concurrent_tasks {
            log::info!("[SYNC] The maximum number of concurrent tasks is reached.");
        } else {
            log::info!("[SYNC] An email origin was not found.");
        }
        Ok(None)
    }
}
