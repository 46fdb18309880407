use serde::{Deserialize, Serialize};

/// Browser-assigned tab identifier. Borrowed for the tab's lifetime, never
/// reused while the tab is open.
pub type TabId = i64;

/// Messages arriving from the extension shell: tab lifecycle events forwarded
/// by the background page and control requests from the popup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Incoming {
    /// A tab finished loading a page.
    NavigationComplete { tab_id: TabId, url: String },
    /// A tab became the focused tab.
    TabActivated { tab_id: TabId },
    TabRemoved { tab_id: TabId },
    SiteAdded { site: String, time_limit: u32 },
    SiteDeleted { site: String },
    GetTimeSpent { site: String },
}

/// Messages sent back to the extension shell. All of them are fire-and-forget;
/// the shell owns the actual tab navigation and banner rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outgoing {
    /// Navigate the tab to the blocked page for `site`.
    BlockTab { tab_id: TabId, site: String },
    /// Advisory notice that the site is close to its daily limit. `time_left`
    /// is fractional minutes so the banner can render seconds.
    TimeWarning {
        tab_id: TabId,
        site: String,
        time_left: f64,
    },
    /// Answer to a `getTimeSpent` query.
    TimeSpent { site: String, time_spent: u32 },
}
