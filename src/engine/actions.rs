use anyhow::{anyhow, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use super::messages::{Outgoing, TabId};

/// Browser-facing side effects of an enforcement decision. The engine decides,
/// the extension shell acts; everything here is fire-and-forget from the
/// engine's point of view.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TabActions: Send {
    /// Navigate the tab to the blocked page for `site`.
    async fn block(&self, tab: TabId, site: &str) -> Result<()>;

    /// Advisory near-limit notice for the tab's content context. Not retried
    /// on delivery failure.
    async fn warn(&self, tab: TabId, site: &str, minutes_left: f64) -> Result<()>;

    /// Answer to a usage query from the popup.
    async fn time_spent(&self, site: &str, minutes: u32) -> Result<()>;
}

/// Forwards enforcement decisions to the outbound transport channel.
pub struct ChannelTabActions {
    outbound: mpsc::Sender<Outgoing>,
}

impl ChannelTabActions {
    pub fn new(outbound: mpsc::Sender<Outgoing>) -> Self {
        Self { outbound }
    }

    async fn send(&self, message: Outgoing) -> Result<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| anyhow!("Outbound transport is closed"))
    }
}

#[async_trait]
impl TabActions for ChannelTabActions {
    async fn block(&self, tab: TabId, site: &str) -> Result<()> {
        self.send(Outgoing::BlockTab {
            tab_id: tab,
            site: site.to_owned(),
        })
        .await
    }

    async fn warn(&self, tab: TabId, site: &str, minutes_left: f64) -> Result<()> {
        self.send(Outgoing::TimeWarning {
            tab_id: tab,
            site: site.to_owned(),
            time_left: minutes_left,
        })
        .await
    }

    async fn time_spent(&self, site: &str, minutes: u32) -> Result<()> {
        self.send(Outgoing::TimeSpent {
            site: site.to_owned(),
            time_spent: minutes,
        })
        .await
    }
}
