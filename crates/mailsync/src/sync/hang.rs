//! Recovery of origins left in process by crashed workers

use std::sync::Arc;

use anyhow::Result;

use super::priority::hang_timeout;
use crate::clock::Clock;
use crate::models::SyncCode;
use crate::storage::OriginRepository;

/// Marks origins stuck in process for longer than [`hang_timeout`] as failed
pub struct HangRecovery {
    repository: Arc<dyn OriginRepository>,
    clock: Arc<dyn Clock>,
}

impl HangRecovery {
    pub fn new(repository: Arc<dyn OriginRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { repository, clock }
    }

    /// Reset hung origins in one bulk update, returning how many were reset
    pub fn reset_hanged_origins(&self) -> Result<usize> {
        log::info!("[SYNC] Resetting hanged email origins ...");

        let border = self.clock.now() - hang_timeout();
        let affected =
            self.repository
                .bulk_reset_hanged(SyncCode::InProcess, SyncCode::Failure, border)?;

        log::info!("[SYNC] Updated {} row(s).", affected);
        Ok(affected)
    }
}
