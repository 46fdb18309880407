use std::{collections::BTreeMap, future::Future, io::ErrorKind, path::PathBuf};

use anyhow::Result;
use chrono::NaiveDate;
use fs4::tokio::AsyncFileExt;
use serde::{Deserialize, Serialize};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
};
use tracing::{debug, error, warn};

/// Daily budget and usage for one tracked site. This is the persisted record;
/// field names follow the extension's storage shape, and missing fields are
/// tolerated on read so older data keeps loading.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct SiteBudget {
    #[serde(rename = "timeLimit")]
    pub limit: u32,
    #[serde(rename = "timeSpent", default)]
    pub spent: u32,
    #[serde(rename = "lastReset", default, with = "reset_marker_ser")]
    pub last_reset: Option<NaiveDate>,
}

impl SiteBudget {
    pub fn new(limit: u32, today: NaiveDate) -> Self {
        Self {
            limit,
            spent: 0,
            last_reset: Some(today),
        }
    }

    /// Zeroes the usage counter when the stored reset day is not `today`.
    /// Idempotent: a second application on the same day changes nothing.
    /// Must run before any read or accrual uses `spent`.
    pub fn apply_daily_reset(&mut self, today: NaiveDate) -> bool {
        if self.last_reset == Some(today) {
            return false;
        }
        self.spent = 0;
        self.last_reset = Some(today);
        true
    }

    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.spent)
    }

    pub fn limit_reached(&self) -> bool {
        self.spent >= self.limit
    }

    /// Within 10% of the daily limit, but not yet over it.
    pub fn near_limit(&self) -> bool {
        !self.limit_reached() && self.remaining() as f64 <= self.limit as f64 * 0.1
    }
}

mod reset_marker_ser {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    use crate::utils::time::{date_to_reset_marker, reset_marker_to_date};

    pub fn serialize<S>(date: &Option<NaiveDate>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(date) => serializer.serialize_str(&date_to_reset_marker(*date)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
    where
        D: Deserializer<'de>,
    {
        // An unreadable marker counts as stale, which forces a reset on the
        // next touch.
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(reset_marker_to_date))
    }
}

pub type SiteMap = BTreeMap<String, SiteBudget>;

/// Interface for abstracting storage of the tracked-site map.
pub trait SiteStore {
    /// Reads the whole site map. Missing data must come back as an empty map.
    fn load(&self) -> impl Future<Output = Result<SiteMap>>;

    /// Replaces the whole site map. Last write wins.
    fn save(&self, sites: &SiteMap) -> impl Future<Output = Result<()>>;
}

/// Stores the site map as a single json document under a `sites` key,
/// matching the shape the extension keeps in its synced key-value store.
pub struct JsonSiteStore {
    path: PathBuf,
}

#[derive(Deserialize, Default)]
struct StoreDocument {
    #[serde(default)]
    sites: SiteMap,
}

#[derive(Serialize)]
struct StoreDocumentRef<'a> {
    sites: &'a SiteMap,
}

impl JsonSiteStore {
    pub fn new(state_dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&state_dir)?;

        Ok(Self {
            path: state_dir.join("sites.json"),
        })
    }

    async fn write_document(file: &mut File, sites: &SiteMap) -> Result<()> {
        let payload = serde_json::to_vec(&StoreDocumentRef { sites })?;
        file.set_len(0).await?;
        file.seek(std::io::SeekFrom::Start(0)).await?;
        file.write_all(&payload).await?;
        file.flush().await?;
        Ok(())
    }
}

impl SiteStore for JsonSiteStore {
    async fn load(&self) -> Result<SiteMap> {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SiteMap::new()),
            Err(e) => return Err(e.into()),
        };
        file.lock_shared()?;
        let mut contents = String::new();
        let read_result = file.read_to_string(&mut contents).await;
        file.unlock_async().await?;
        read_result?;

        match serde_json::from_str::<StoreDocument>(&contents) {
            Ok(document) => Ok(document.sites),
            Err(e) => {
                // Might happen after a shutdown cut a write short. Tracking
                // restarts from an empty map instead of refusing to run.
                warn!("Site data in {:?} is corrupted, starting empty: {e}", self.path);
                Ok(SiteMap::new())
            }
        }
    }

    async fn save(&self, sites: &SiteMap) -> Result<()> {
        let mut file = File::options()
            .write(true)
            .create(true)
            .read(true)
            .truncate(false)
            .open(&self.path)
            .await?;

        // Semi-safe acquire-release for the file
        file.lock_exclusive()?;
        let result = Self::write_document(&mut file, sites).await;
        file.unlock_async().await?;
        result
    }
}

/// Read/write gate over a [SiteStore] that applies the lazy half of the daily
/// reset and owns the fail-open policy: load errors degrade to an empty
/// registry and save errors are logged and dropped, so a broken store can
/// never cause a spurious block.
pub struct SiteRegistry<S> {
    store: S,
}

impl<S: SiteStore> SiteRegistry<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Loads the site map with the daily reset applied to every entry. When
    /// any entry was stale the reset is persisted right away, so a later
    /// crash cannot resurrect yesterday's usage.
    pub async fn snapshot(&self, today: NaiveDate) -> SiteMap {
        let mut sites = match self.store.load().await {
            Ok(sites) => sites,
            Err(e) => {
                error!("Failed to load site data, treating registry as empty: {e:?}");
                return SiteMap::new();
            }
        };

        let mut dirty = false;
        for (key, budget) in sites.iter_mut() {
            if budget.apply_daily_reset(today) {
                debug!("Reset daily usage for {key}");
                dirty = true;
            }
        }
        if dirty {
            self.commit(&sites).await;
        }
        sites
    }

    pub async fn commit(&self, sites: &SiteMap) {
        if let Err(e) = self.store.save(sites).await {
            error!("Failed to persist site data: {e:?}");
        }
    }
}
