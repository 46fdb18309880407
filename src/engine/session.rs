use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};

use super::messages::TabId;

/// In-memory tracking state for one tab that navigated to a tracked site.
/// Never persisted; rebuilt from scratch after a restart, so accrual gaps
/// across a restart are simply not counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSession {
    pub site: String,
    /// Instant of the last merge into the registry. Advances in whole-minute
    /// steps so sub-minute remainders keep accruing across flushes.
    last_accrual: DateTime<Utc>,
    pub foreground: bool,
}

/// Whole minutes drained from the foreground session, ready to be merged into
/// the registry.
#[derive(Debug, PartialEq, Eq)]
pub struct FlushedTime {
    pub tab: TabId,
    pub site: String,
    pub minutes: u32,
}

/// Owns every [TabSession] along with the warning-flag set and the single
/// foreground pointer. Only the foreground tab accrues time; sites left open
/// in background tabs do not consume their limit.
#[derive(Default)]
pub struct SessionTracker {
    sessions: HashMap<TabId, TabSession>,
    foreground: Option<TabId>,
    warned: HashSet<TabId>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins tracking `tab` against `site`. Re-navigation within the same
    /// site keeps the existing session, so accrued sub-minute progress is not
    /// reset. A session for a different site is replaced outright; the caller
    /// is responsible for flushing it first.
    ///
    /// Returns true when a new session was created.
    pub fn start(&mut self, tab: TabId, site: String, now: DateTime<Utc>) -> bool {
        if let Some(existing) = self.sessions.get(&tab) {
            if existing.site == site {
                return false;
            }
        }
        self.warned.remove(&tab);
        self.sessions.insert(
            tab,
            TabSession {
                site,
                last_accrual: now,
                foreground: self.foreground == Some(tab),
            },
        );
        true
    }

    /// Marks `tab` as the sole foreground tab. The pointer is recorded even
    /// when the tab has no session, so a session created by a later
    /// navigation starts out foreground.
    ///
    /// A session gaining focus has its clock reset to `now`: time it sat in
    /// the background was never accruable and must not be charged on the
    /// first flush. The caller is expected to have flushed the outgoing
    /// foreground session already.
    pub fn activate(&mut self, tab: TabId, now: DateTime<Utc>) {
        for (id, session) in self.sessions.iter_mut() {
            let foreground = *id == tab;
            if foreground && !session.foreground {
                session.last_accrual = now;
            }
            session.foreground = foreground;
        }
        self.foreground = Some(tab);
    }

    /// Destroys the session and warning flag for `tab`, keeping the
    /// foreground pointer. Used when a tab gets blocked or its session is
    /// replaced; the tab itself is still focused.
    pub fn remove(&mut self, tab: TabId) -> Option<TabSession> {
        self.warned.remove(&tab);
        self.sessions.remove(&tab)
    }

    /// [Self::remove], plus clearing the foreground pointer. Used when the
    /// tab itself goes away.
    pub fn close(&mut self, tab: TabId) -> Option<TabSession> {
        if self.foreground == Some(tab) {
            self.foreground = None;
        }
        self.remove(tab)
    }

    /// Drains elapsed whole minutes from the foreground session. The session
    /// clock advances by exactly the drained minutes, carrying the sub-minute
    /// remainder forward. Background sessions never flush.
    pub fn flush_foreground(&mut self, now: DateTime<Utc>) -> Option<FlushedTime> {
        let tab = self.foreground?;
        let session = self.sessions.get_mut(&tab)?;
        let minutes = (now - session.last_accrual).num_minutes();
        if minutes <= 0 {
            return None;
        }
        session.last_accrual += Duration::minutes(minutes);
        Some(FlushedTime {
            tab,
            site: session.site.clone(),
            minutes: minutes as u32,
        })
    }

    /// Unflushed whole minutes the foreground session has pending for `site`,
    /// without draining them. Used to answer usage queries with up-to-date
    /// figures.
    pub fn pending_for_site(&self, site: &str, now: DateTime<Utc>) -> u32 {
        self.foreground
            .and_then(|tab| self.sessions.get(&tab))
            .filter(|session| session.site == site)
            .map(|session| (now - session.last_accrual).num_minutes().max(0) as u32)
            .unwrap_or(0)
    }

    /// Sub-minute fraction (in minutes) still pending for `tab` after a
    /// flush. Feeds the fractional part of warning payloads.
    pub fn subminute_pending(&self, tab: TabId, now: DateTime<Utc>) -> f64 {
        self.sessions
            .get(&tab)
            .map(|session| ((now - session.last_accrual).num_seconds().max(0) % 60) as f64 / 60.0)
            .unwrap_or(0.0)
    }

    /// Drops every session and warning flag referencing a deleted site.
    pub fn purge_site(&mut self, site: &str) {
        let tabs: Vec<TabId> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.site == site)
            .map(|(tab, _)| *tab)
            .collect();
        for tab in tabs {
            self.remove(tab);
        }
    }

    /// Sets the warning flag for `tab`. Returns true when it was not set yet,
    /// which is the signal to actually dispatch the warning.
    pub fn mark_warned(&mut self, tab: TabId) -> bool {
        self.warned.insert(tab)
    }

    pub fn site_of(&self, tab: TabId) -> Option<&str> {
        self.sessions.get(&tab).map(|session| session.site.as_str())
    }

    #[cfg(test)]
    fn foreground_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|session| session.foreground)
            .count()
    }
}
