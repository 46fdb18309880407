use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::{
    host,
    utils::clock::{Clock, DefaultClock},
};

use self::{
    accrual::TrackerEngine,
    actions::ChannelTabActions,
    messages::{Incoming, Outgoing},
    registry::{JsonSiteStore, SiteRegistry, SiteStore},
};

pub mod accrual;
pub mod actions;
pub mod args;
pub mod matcher;
pub mod messages;
pub mod registry;
pub mod session;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const CHANNEL_CAPACITY: usize = 32;

/// Represents the starting point for the native messaging host.
pub async fn start_host(dir: PathBuf) -> Result<()> {
    let store = JsonSiteStore::new(dir.join("state"))?;
    run_host(store, tokio::io::stdin(), tokio::io::stdout(), DefaultClock).await
}

async fn run_host(
    store: impl SiteStore,
    input: impl AsyncRead + Unpin,
    output: impl AsyncWrite + Unpin,
    clock: impl Clock,
) -> Result<()> {
    let (event_sender, event_receiver) = mpsc::channel::<Incoming>(CHANNEL_CAPACITY);
    let (outbound_sender, outbound_receiver) = mpsc::channel::<Outgoing>(CHANNEL_CAPACITY);

    let shutdown_token = CancellationToken::new();

    let engine = TrackerEngine::new(
        event_receiver,
        ChannelTabActions::new(outbound_sender),
        SiteRegistry::new(store),
        shutdown_token.clone(),
        TICK_INTERVAL,
        Box::new(clock),
    );

    let (_, read_result, write_result, engine_result) = tokio::join!(
        detect_shutdown(shutdown_token.clone()),
        host::read_events(input, event_sender, shutdown_token.clone()),
        host::write_actions(output, outbound_receiver),
        engine.run(),
    );

    if let Err(read_result) = read_result {
        error!("Transport reader got an error {:?}", read_result);
    }

    if let Err(write_result) = write_result {
        error!("Transport writer got an error {:?}", write_result);
    }

    if let Err(engine_result) = engine_result {
        error!("Engine got an error {:?}", engine_result);
    }

    Ok(())
}

/// Resolves on ctrl-c for manual runs, or on cancellation from elsewhere (the
/// browser closing stdin is the normal shutdown path for a native host).
async fn detect_shutdown(cancellation: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => cancellation.cancel(),
        _ = cancellation.cancelled() => (),
    }
}

#[cfg(test)]
mod host_tests {
    use anyhow::Result;
    use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use futures::{SinkExt, StreamExt};
    use tempfile::tempdir;
    use tokio_util::{
        bytes::Bytes,
        codec::{FramedRead, FramedWrite},
    };

    use crate::{
        engine::{
            messages::{Incoming, Outgoing},
            registry::{JsonSiteStore, SiteStore},
            run_host,
        },
        host,
        utils::{clock::testing::TestClock, logging::TEST_LOGGING},
    };

    const TEST_START_DATE: NaiveDateTime =
        NaiveDateTime::new(NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(), NaiveTime::MIN);

    /// Runs the whole host over an in-memory pipe: register a site with a one
    /// minute limit, keep its tab in the foreground, and expect the block
    /// decision to come back over the wire.
    #[tokio::test(start_paused = true)]
    async fn smoke_test_host() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let store = JsonSiteStore::new(dir.path().to_path_buf())?;
        let clock = TestClock::starting_at(Utc.from_utc_datetime(&TEST_START_DATE));

        let (input_remote, input_local) = tokio::io::duplex(4096);
        let (output_local, output_remote) = tokio::io::duplex(4096);

        let (_, host_result) = tokio::join!(
            async move {
                let mut to_host = FramedWrite::new(input_remote, host::codec());
                let mut from_host = FramedRead::new(output_remote, host::codec());

                for message in [
                    Incoming::SiteAdded {
                        site: "example.com".into(),
                        time_limit: 1,
                    },
                    Incoming::NavigationComplete {
                        tab_id: 1,
                        url: "https://www.example.com/feed".into(),
                    },
                    Incoming::TabActivated { tab_id: 1 },
                ] {
                    to_host
                        .send(Bytes::from(serde_json::to_vec(&message).unwrap()))
                        .await
                        .unwrap();
                }

                let frame = from_host.next().await.unwrap().unwrap();
                let message: Outgoing = serde_json::from_slice(&frame).unwrap();
                assert_eq!(
                    message,
                    Outgoing::BlockTab {
                        tab_id: 1,
                        site: "example.com".into()
                    }
                );

                // Closing the input pipe shuts the host down.
                drop(to_host);
            },
            run_host(store, input_local, output_local, clock),
        );
        host_result?;

        let reloaded = JsonSiteStore::new(dir.path().to_path_buf())?.load().await?;
        assert_eq!(reloaded["example.com"].spent, 1);
        Ok(())
    }
}
