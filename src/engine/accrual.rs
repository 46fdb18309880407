use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::utils::clock::Clock;

use super::{
    actions::TabActions,
    matcher::{find_matching_site, normalize_host},
    messages::{Incoming, TabId},
    registry::{SiteBudget, SiteRegistry, SiteStore},
    session::SessionTracker,
};

/// The background engine: consumes tab-lifecycle and control events, accrues
/// foreground time into the site registry on a fixed tick, and turns
/// threshold crossings into block/warn actions.
///
/// Ticks and foreground changes funnel into the same accrual routine, and a
/// registry write only happens when at least one whole minute was flushed, so
/// write frequency is bounded by elapsed time rather than tick rate.
pub struct TrackerEngine<S: SiteStore, A: TabActions> {
    events: mpsc::Receiver<Incoming>,
    actions: A,
    registry: SiteRegistry<S>,
    sessions: SessionTracker,
    shutdown: CancellationToken,
    tick_interval: Duration,
    clock: Box<dyn Clock>,
}

impl<S: SiteStore, A: TabActions> TrackerEngine<S, A> {
    pub fn new(
        events: mpsc::Receiver<Incoming>,
        actions: A,
        registry: SiteRegistry<S>,
        shutdown: CancellationToken,
        tick_interval: Duration,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            events,
            actions,
            registry,
            sessions: SessionTracker::new(),
            shutdown,
            tick_interval,
            clock,
        }
    }

    /// Executes the engine event loop until shutdown or until the event
    /// source closes. Pending foreground time is flushed on the way out.
    pub async fn run(mut self) -> Result<()> {
        // Catch up on resets missed while the host was not running.
        let mut swept_on = self.clock.today();
        self.registry.snapshot(swept_on).await;

        let mut tick_point = self.clock.instant() + self.tick_interval;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.accrue().await;
                    return Ok(());
                }
                event = self.events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    // The transport dropped its sender, nothing more to track.
                    None => {
                        self.accrue().await;
                        return Ok(());
                    }
                },
                _ = self.clock.sleep_until(tick_point) => {
                    tick_point += self.tick_interval;
                    self.accrue().await;

                    let today = self.clock.today();
                    if today != swept_on {
                        info!("Running daily reset sweep");
                        self.registry.snapshot(today).await;
                        swept_on = today;
                    }
                }
            }
        }
    }

    async fn handle_event(&mut self, event: Incoming) {
        debug!("Processing event {:?}", event);
        match event {
            Incoming::NavigationComplete { tab_id, url } => self.on_navigation(tab_id, &url).await,
            Incoming::TabActivated { tab_id } => {
                // Flush the outgoing foreground tab before moving the pointer.
                self.accrue().await;
                let now = self.clock.time();
                self.sessions.activate(tab_id, now);
            }
            Incoming::TabRemoved { tab_id } => {
                self.accrue().await;
                if self.sessions.close(tab_id).is_some() {
                    debug!("Tab {tab_id} closed, tracking stopped");
                }
            }
            Incoming::SiteAdded { site, time_limit } => self.on_site_added(site, time_limit).await,
            Incoming::SiteDeleted { site } => self.on_site_deleted(&site).await,
            Incoming::GetTimeSpent { site } => self.on_get_time_spent(&site).await,
        }
    }

    /// Handles a completed navigation. Unmatched and unparseable urls are
    /// ignored outright: an existing session for the tab is knowingly left in
    /// place until the tab closes, moves to another tracked site, or gets
    /// blocked, which can overcount brief detours away from a tracked site.
    async fn on_navigation(&mut self, tab: TabId, url: &str) {
        let Some(host) = normalize_host(url) else {
            debug!("Ignoring navigation to unparseable url {url}");
            return;
        };

        let today = self.clock.today();
        let sites = self.registry.snapshot(today).await;
        let Some(site) =
            find_matching_site(&host, sites.keys().map(String::as_str)).map(str::to_owned)
        else {
            debug!("Host {host} does not match a tracked site");
            return;
        };

        if sites[&site].limit_reached() {
            info!("Blocking tab {tab} on {site}: daily limit already reached");
            self.block(tab, &site).await;
            return;
        }

        if self.sessions.site_of(tab).is_some_and(|tracked| tracked != site) {
            // The tab moved between tracked sites; settle the old session
            // before replacing it.
            self.accrue().await;
            self.sessions.remove(tab);
        }

        if self.sessions.start(tab, site.clone(), self.clock.time()) {
            debug!("Started tracking tab {tab} on {site}");
        }
    }

    async fn on_site_added(&mut self, site: String, time_limit: u32) {
        let today = self.clock.today();
        let mut sites = self.registry.snapshot(today).await;
        info!("Tracking {site} with a {time_limit} minute daily limit");
        sites.insert(site, SiteBudget::new(time_limit, today));
        self.registry.commit(&sites).await;
    }

    async fn on_site_deleted(&mut self, site: &str) {
        // Settle pending time while the site still exists.
        self.accrue().await;

        let today = self.clock.today();
        let mut sites = self.registry.snapshot(today).await;
        if sites.remove(site).is_some() {
            info!("Stopped tracking {site}");
            self.registry.commit(&sites).await;
        }
        self.sessions.purge_site(site);
    }

    async fn on_get_time_spent(&mut self, site: &str) {
        let today = self.clock.today();
        let sites = self.registry.snapshot(today).await;
        let stored = sites.get(site).map(|budget| budget.spent).unwrap_or(0);
        let pending = self.sessions.pending_for_site(site, self.clock.time());
        if let Err(e) = self.actions.time_spent(site, stored + pending).await {
            warn!("Failed to answer usage query for {site}: {e:?}");
        }
    }

    /// The single accrual routine. Flushes the foreground session and, when a
    /// whole minute has passed, merges it into the registry and evaluates the
    /// limit and warning thresholds, in that order.
    async fn accrue(&mut self) {
        let now = self.clock.time();
        let Some(flushed) = self.sessions.flush_foreground(now) else {
            return;
        };

        let today = self.clock.today();
        let mut sites = self.registry.snapshot(today).await;
        let Some(budget) = sites.get_mut(&flushed.site) else {
            debug!("Dropping session for removed site {}", flushed.site);
            self.sessions.remove(flushed.tab);
            return;
        };

        budget.spent += flushed.minutes;
        let limit_reached = budget.limit_reached();
        let near_limit = budget.near_limit();
        let minutes_left = (budget.remaining() as f64
            - self.sessions.subminute_pending(flushed.tab, now))
        .max(0.0);
        self.registry.commit(&sites).await;

        if limit_reached {
            info!(
                "Blocking tab {} on {}: daily limit reached",
                flushed.tab, flushed.site
            );
            self.block(flushed.tab, &flushed.site).await;
        } else if near_limit && self.sessions.mark_warned(flushed.tab) {
            if let Err(e) = self
                .actions
                .warn(flushed.tab, &flushed.site, minutes_left)
                .await
            {
                debug!("Warning for tab {} was not delivered: {e:?}", flushed.tab);
            }
        }
    }

    async fn block(&mut self, tab: TabId, site: &str) {
        if let Err(e) = self.actions.block(tab, site).await {
            // The tab may already be gone; the attempt is not retried.
            warn!("Block action for tab {tab} on {site} failed: {e:?}");
        }
        self.sessions.remove(tab);
    }
}
