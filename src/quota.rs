use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{Error, Result};

/// Outcome of asking the quota whether another download may go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    DailyExhausted,
}

/// Counts downloads against the portal's externally imposed ceilings.
///
/// The portal resets its own counter on a schedule we can't see, so the tool
/// keeps a conservative per-calendar-day count of its own and additionally
/// honours the portal's refusal when it comes.
#[derive(Debug, Clone)]
pub struct Quota {
    batch_limit: usize,
    daily_limit: usize,
    day: NaiveDate,
    downloads_today: usize,
}

impl Quota {
    pub fn new(batch_limit: usize, daily_limit: usize, today: NaiveDate) -> Self {
        Self {
            batch_limit,
            daily_limit,
            day: today,
            downloads_today: 0,
        }
    }

    /// Resumes from a persisted ledger. A ledger from another day starts at zero.
    pub fn from_ledger(
        batch_limit: usize,
        daily_limit: usize,
        ledger: &QuotaLedger,
        today: NaiveDate,
    ) -> Self {
        let mut quota = Self::new(batch_limit, daily_limit, today);
        if ledger.day == today {
            quota.downloads_today = ledger.downloads.min(daily_limit);
        }
        quota
    }

    pub fn admit(&mut self, today: NaiveDate, batch_len: usize) -> Result<Admission> {
        self.roll_over(today);
        if batch_len > self.batch_limit {
            return Err(Error::BatchOverLimit {
                size: batch_len,
                limit: self.batch_limit,
            });
        }
        if self.downloads_today >= self.daily_limit {
            return Ok(Admission::DailyExhausted);
        }
        Ok(Admission::Granted)
    }

    pub fn record(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.downloads_today += 1;
        debug!(
            downloads = self.downloads_today,
            limit = self.daily_limit,
            "recorded download"
        );
    }

    /// The portal refused a download for quota reasons: nothing more goes out today.
    pub fn exhaust(&mut self, today: NaiveDate) {
        self.roll_over(today);
        self.downloads_today = self.daily_limit;
    }

    pub fn remaining(&self) -> usize {
        self.daily_limit.saturating_sub(self.downloads_today)
    }

    pub fn downloads_today(&self) -> usize {
        self.downloads_today
    }

    pub fn ledger(&self) -> QuotaLedger {
        QuotaLedger {
            day: self.day,
            downloads: self.downloads_today,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(%today, "new day, resetting the download counter");
            self.day = today;
            self.downloads_today = 0;
        }
    }
}

/// The persisted form of the daily counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLedger {
    pub day: NaiveDate,
    pub downloads: usize,
}

impl QuotaLedger {
    /// Reads the ledger, `None` if there is none yet.
    pub async fn load(path: &Path) -> Result<Option<QuotaLedger>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("part");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn daily_limit_is_never_exceeded() {
        let mut quota = Quota::new(100, 3, day(1));
        let mut performed = 0;
        for _ in 0..10 {
            if quota.admit(day(1), 100).unwrap() == Admission::Granted {
                quota.record(day(1));
                performed += 1;
            }
        }
        assert_eq!(performed, 3);
        assert_eq!(quota.remaining(), 0);
        assert_eq!(quota.admit(day(1), 1).unwrap(), Admission::DailyExhausted);
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let mut quota = Quota::new(100, 3, day(1));
        assert!(matches!(
            quota.admit(day(1), 101),
            Err(Error::BatchOverLimit { size: 101, limit: 100 })
        ));
    }

    #[test]
    fn counter_resets_on_a_new_day() {
        let mut quota = Quota::new(100, 1, day(1));
        quota.record(day(1));
        assert_eq!(quota.admit(day(1), 10).unwrap(), Admission::DailyExhausted);
        assert_eq!(quota.admit(day(2), 10).unwrap(), Admission::Granted);
        assert_eq!(quota.downloads_today(), 0);
    }

    #[test]
    fn portal_refusal_spends_the_day() {
        let mut quota = Quota::new(100, 40, day(1));
        quota.record(day(1));
        quota.exhaust(day(1));
        assert_eq!(quota.admit(day(1), 10).unwrap(), Admission::DailyExhausted);
        assert_eq!(quota.ledger().downloads, 40);
    }

    #[test]
    fn ledger_only_carries_over_within_the_same_day() {
        let ledger = QuotaLedger {
            day: day(1),
            downloads: 2,
        };
        assert_eq!(Quota::from_ledger(100, 5, &ledger, day(1)).remaining(), 3);
        assert_eq!(Quota::from_ledger(100, 5, &ledger, day(2)).remaining(), 5);
        // A lowered limit clamps the carried count.
        assert_eq!(Quota::from_ledger(100, 1, &ledger, day(1)).remaining(), 0);
    }

    #[tokio::test]
    async fn ledger_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("quota.json");
        assert_eq!(QuotaLedger::load(&path).await.unwrap(), None);

        let ledger = QuotaLedger {
            day: day(9),
            downloads: 17,
        };
        ledger.save(&path).await.unwrap();
        assert_eq!(QuotaLedger::load(&path).await.unwrap(), Some(ledger));
    }
}
