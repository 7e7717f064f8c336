use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Admission {
    pub allowed: bool,
    pub remaining: u32,
}

#[derive(Default)]
struct QuotaState {
    admitted: VecDeque<DateTime<Utc>>,
}

impl QuotaState {
    fn prune(&mut self, now: DateTime<Utc>, window: Duration) {
        let cutoff = now - window;
        while self.admitted.front().is_some_and(|at| *at < cutoff) {
            self.admitted.pop_front();
        }
    }

    fn is_idle(&mut self, now: DateTime<Utc>, window: Duration) -> bool {
        self.prune(now, window);
        self.admitted.is_empty()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Rolling 24-hour question quota per session.
///
/// Each session has its own lock, so two submissions for one session
/// serialize on check-and-record while different sessions never contend.
pub struct RateLimiter {
    daily_limit: u32,
    window: Duration,
    sessions: Mutex<HashMap<String, Arc<Mutex<QuotaState>>>>,
}

impl RateLimiter {
    pub fn new(daily_limit: u32) -> Self {
        Self {
            daily_limit,
            window: Duration::hours(24),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn daily_limit(&self) -> u32 {
        self.daily_limit
    }

    /// Number of sessions with questions still inside the window.
    pub fn tracked_sessions(&self) -> usize {
        lock(&self.sessions).len()
    }

    /// Handle for `session_id`, dropping other sessions whose questions have
    /// all aged out. An entry someone else still holds is kept.
    fn session(&self, session_id: &str, now: DateTime<Utc>) -> Arc<Mutex<QuotaState>> {
        let mut sessions = lock(&self.sessions);
        sessions.retain(|id, state| {
            id == session_id || Arc::strong_count(state) > 1 || !lock(state).is_idle(now, self.window)
        });
        sessions.entry(session_id.to_string()).or_default().clone()
    }

    pub fn admit(&self, session_id: &str) -> Admission {
        self.admit_at(session_id, Utc::now())
    }

    /// Check and record one question. A refused question records nothing.
    pub fn admit_at(&self, session_id: &str, now: DateTime<Utc>) -> Admission {
        let state = self.session(session_id, now);
        let mut quota = lock(&state);
        quota.prune(now, self.window);

        let used = quota.admitted.len() as u32;
        if used >= self.daily_limit {
            return Admission {
                allowed: false,
                remaining: 0,
            };
        }

        quota.admitted.push_back(now);
        Admission {
            allowed: true,
            remaining: self.daily_limit - used - 1,
        }
    }

    pub fn remaining(&self, session_id: &str) -> u32 {
        self.remaining_at(session_id, Utc::now())
    }

    /// Read-only: a session that was never admitted is not recorded.
    pub fn remaining_at(&self, session_id: &str, now: DateTime<Utc>) -> u32 {
        let mut sessions = lock(&self.sessions);
        let Some(state) = sessions.get(session_id) else {
            return self.daily_limit;
        };
        let used = {
            let mut quota = lock(state);
            quota.prune(now, self.window);
            quota.admitted.len()
        };
        if used == 0 && Arc::strong_count(state) == 1 {
            sessions.remove(session_id);
        }
        self.daily_limit.saturating_sub(used as u32)
    }
}
