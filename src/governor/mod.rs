//! Per-requester admission control.
//!
//! Each requester gets a daily quota and a cap on in-flight requests. The
//! configured admin bypasses both. State lives for the lifetime of the
//! process and resets on restart.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use tracing::{debug, info};

pub type RequesterId = u64;

/// Source of the current time, injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    UnknownRequester,
    DailyLimitExceeded,
    TooManyPending,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DenyReason::UnknownRequester => "unknown requester",
            DenyReason::DailyLimitExceeded => "daily limit exceeded",
            DenyReason::TooManyPending => "too many pending requests",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub per_day: u32,
    pub pending: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            per_day: 30,
            pending: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequesterState {
    pub requester: RequesterId,
    pub queries_today: u32,
    pub last_query: Option<DateTime<Local>>,
    pub pending: u32,
}

impl RequesterState {
    fn new(requester: RequesterId) -> Self {
        Self {
            requester,
            queries_today: 0,
            last_query: None,
            pending: 0,
        }
    }

    /// Daily count as seen on `now`'s calendar day.
    fn queries_on(&self, now: &DateTime<Local>) -> u32 {
        match self.last_query {
            Some(last) if last.date_naive() == now.date_naive() => self.queries_today,
            _ => 0,
        }
    }
}

pub struct Governor {
    admin: Option<RequesterId>,
    limits: Limits,
    clock: Arc<dyn Clock>,
    requesters: RwLock<HashMap<RequesterId, RequesterState>>,
}

impl Governor {
    pub fn new(admin: Option<RequesterId>, limits: Limits) -> Self {
        Self::with_clock(admin, limits, Arc::new(SystemClock))
    }

    pub fn with_clock(admin: Option<RequesterId>, limits: Limits, clock: Arc<dyn Clock>) -> Self {
        Self {
            admin,
            limits,
            clock,
            requesters: RwLock::new(HashMap::new()),
        }
    }

    pub fn is_admin(&self, requester: RequesterId) -> bool {
        self.admin == Some(requester)
    }

    /// First contact creates zeroed state; later calls are no-ops.
    pub fn register(&self, requester: RequesterId) {
        self.requesters
            .write()
            .entry(requester)
            .or_insert_with(|| RequesterState::new(requester));
    }

    /// Admission check without side effects.
    pub fn can_admit(&self, requester: RequesterId) -> Result<(), DenyReason> {
        if self.is_admin(requester) {
            return Ok(());
        }
        let now = self.clock.now();
        let requesters = self.requesters.read();
        let state = requesters
            .get(&requester)
            .ok_or(DenyReason::UnknownRequester)?;
        self.check(state, &now)
    }

    /// Registers, rolls the day over, checks and counts the request in one
    /// exclusive section. The returned permit releases the pending slot on drop.
    pub fn admit(&self, requester: RequesterId) -> Result<Permit<'_>, DenyReason> {
        let now = self.clock.now();
        let mut requesters = self.requesters.write();
        let state = requesters
            .entry(requester)
            .or_insert_with(|| RequesterState::new(requester));

        if state.queries_on(&now) != state.queries_today {
            debug!(requester, "daily counter reset");
            state.queries_today = 0;
        }

        if !self.is_admin(requester) {
            if let Err(reason) = self.check(state, &now) {
                info!(requester, %reason, "request denied");
                return Err(reason);
            }
        }

        state.pending += 1;
        state.queries_today += 1;
        state.last_query = Some(now);

        Ok(Permit {
            governor: self,
            requester,
        })
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn state(&self, requester: RequesterId) -> Option<RequesterState> {
        self.requesters.read().get(&requester).cloned()
    }

    /// Current state with the daily count as of today, even before the next rollover.
    pub fn usage(&self, requester: RequesterId) -> Option<RequesterState> {
        let now = self.clock.now();
        self.state(requester).map(|mut state| {
            state.queries_today = state.queries_on(&now);
            state
        })
    }

    fn check(&self, state: &RequesterState, now: &DateTime<Local>) -> Result<(), DenyReason> {
        if state.queries_on(now) >= self.limits.per_day {
            return Err(DenyReason::DailyLimitExceeded);
        }
        if state.pending >= self.limits.pending {
            return Err(DenyReason::TooManyPending);
        }
        Ok(())
    }

    fn release(&self, requester: RequesterId) {
        if let Some(state) = self.requesters.write().get_mut(&requester) {
            state.pending = state.pending.saturating_sub(1);
        }
    }
}

/// An admitted request. Dropping it frees the requester's pending slot.
#[must_use = "dropping the permit immediately releases the pending slot"]
pub struct Permit<'a> {
    governor: &'a Governor,
    requester: RequesterId,
}

impl Permit<'_> {
    pub fn requester(&self) -> RequesterId {
        self.requester
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.governor.release(self.requester);
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ManualClock;
    use super::*;
    use chrono::Duration;

    const ADMIN: RequesterId = 1;
    const USER: RequesterId = 42;

    fn governor(per_day: u32, pending: u32) -> (Governor, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let governor = Governor::with_clock(
            Some(ADMIN),
            Limits { per_day, pending },
            clock.clone(),
        );
        (governor, clock)
    }

    #[test]
    fn test_unknown_requester_is_not_admitted_by_check() {
        let (governor, _) = governor(30, 1);
        assert_eq!(governor.can_admit(USER), Err(DenyReason::UnknownRequester));
        governor.register(USER);
        assert_eq!(governor.can_admit(USER), Ok(()));
        assert_eq!(governor.state(USER).unwrap().queries_today, 0);
    }

    #[test]
    fn test_daily_limit_then_rollover() {
        let (governor, clock) = governor(1, 1);

        drop(governor.admit(USER).unwrap());
        assert_eq!(governor.admit(USER).err(), Some(DenyReason::DailyLimitExceeded));
        assert_eq!(governor.can_admit(USER), Err(DenyReason::DailyLimitExceeded));

        clock.advance(Duration::days(1));
        assert_eq!(governor.can_admit(USER), Ok(()));
        let permit = governor.admit(USER).unwrap();
        assert_eq!(permit.requester(), USER);
        assert_eq!(governor.state(USER).unwrap().queries_today, 1);
    }

    #[test]
    fn test_rollover_uses_calendar_day() {
        let (governor, clock) = governor(1, 5);
        drop(governor.admit(USER).unwrap());

        // later the same day
        clock.advance(Duration::hours(11));
        assert_eq!(governor.admit(USER).err(), Some(DenyReason::DailyLimitExceeded));

        // just past midnight
        clock.advance(Duration::hours(1));
        assert!(governor.admit(USER).is_ok());
    }

    #[test]
    fn test_pending_limit() {
        let (governor, _) = governor(30, 1);
        let first = governor.admit(USER).unwrap();
        assert_eq!(governor.admit(USER).err(), Some(DenyReason::TooManyPending));
        drop(first);
        assert!(governor.admit(USER).is_ok());
    }

    #[test]
    fn test_daily_limit_checked_before_pending() {
        let (governor, _) = governor(1, 1);
        let _held = governor.admit(USER).unwrap();
        assert_eq!(governor.admit(USER).err(), Some(DenyReason::DailyLimitExceeded));
    }

    #[test]
    fn test_admin_bypasses_limits() {
        let (governor, _) = governor(1, 1);
        let permits: Vec<_> = (0..5).map(|_| governor.admit(ADMIN).unwrap()).collect();
        assert_eq!(governor.state(ADMIN).unwrap().pending, 5);
        assert_eq!(governor.can_admit(ADMIN), Ok(()));
        drop(permits);
        assert_eq!(governor.state(ADMIN).unwrap().pending, 0);
    }

    #[test]
    fn test_denied_request_does_not_count() {
        let (governor, _) = governor(2, 1);
        let _held = governor.admit(USER).unwrap();
        assert!(governor.admit(USER).is_err());
        assert_eq!(governor.state(USER).unwrap().queries_today, 1);
        assert_eq!(governor.state(USER).unwrap().pending, 1);
    }

    #[test]
    fn test_pending_released_exactly_once_on_failure_path() {
        let (governor, _) = governor(30, 1);
        let result: Result<(), &str> = (|| {
            let _permit = governor.admit(USER).map_err(|_| "denied")?;
            Err("download failed")
        })();
        assert!(result.is_err());
        assert_eq!(governor.state(USER).unwrap().pending, 0);
    }

    #[test]
    fn test_usage_reflects_new_day() {
        let (governor, clock) = governor(30, 1);
        drop(governor.admit(USER).unwrap());
        assert_eq!(governor.usage(USER).unwrap().queries_today, 1);

        clock.advance(Duration::days(1));
        assert_eq!(governor.usage(USER).unwrap().queries_today, 0);
        assert_eq!(governor.state(USER).unwrap().queries_today, 1);
        assert!(governor.usage(USER + 1).is_none());
    }

    #[test]
    fn test_requesters_are_independent() {
        let (governor, _) = governor(30, 1);
        let _a = governor.admit(USER).unwrap();
        assert!(governor.admit(USER + 1).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_requester_admits_one() {
        let (governor, _) = governor(100, 1);
        let governor = Arc::new(governor);
        let barrier = Arc::new(tokio::sync::Barrier::new(8));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let governor = governor.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    // keep the slot held for the rest of the test
                    governor.admit(USER).map(std::mem::forget).is_ok()
                })
            })
            .collect();

        let mut admitted = 0;
        for task in tasks {
            if task.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
