//! Ordered replication stream for one connected endpoint

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use super::authority::EndpointId;
use super::session::{ReplicationBatch, Resynced, SessionHandle};

#[derive(Debug)]
pub enum FeedEvent {
    Batch(Arc<ReplicationBatch>),
    /// The stream fell behind. The observer must rebuild from this snapshot.
    Resync(Resynced),
}

/// Wraps a batch subscription so an observer never silently loses batches:
/// already-covered batches are skipped and a lag turns into a resync.
pub struct ReplicationFeed {
    endpoint: EndpointId,
    session: SessionHandle,
    rx: broadcast::Receiver<Arc<ReplicationBatch>>,
    last_seq: u64,
    needs_resync: bool,
}

impl ReplicationFeed {
    /// `as_of` is the seq the join snapshot reflects
    pub fn new(
        endpoint: EndpointId,
        session: SessionHandle,
        rx: broadcast::Receiver<Arc<ReplicationBatch>>,
        as_of: u64,
    ) -> Self {
        Self {
            endpoint,
            session,
            rx,
            last_seq: as_of,
            needs_resync: false,
        }
    }

    pub fn last_seq(&self) -> u64 {
        self.last_seq
    }

    /// Next thing to apply, `None` once the session is gone or dropped us.
    /// Safe to cancel: a pending resync is retried on the next call.
    pub async fn next(&mut self) -> Option<FeedEvent> {
        loop {
            if self.needs_resync {
                return self.resync().await;
            }

            match self.rx.recv().await {
                Ok(batch) => {
                    if batch.seq <= self.last_seq {
                        continue;
                    }
                    self.last_seq = batch.seq;
                    return Some(FeedEvent::Batch(batch));
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(endpoint = %self.endpoint, skipped, "Replication lagged, resyncing");
                    self.needs_resync = true;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    async fn resync(&mut self) -> Option<FeedEvent> {
        match self.session.resync(self.endpoint).await {
            Ok(resynced) => {
                self.needs_resync = false;
                self.last_seq = resynced.as_of;
                Some(FeedEvent::Resync(resynced))
            }
            Err(e) => {
                warn!(endpoint = %self.endpoint, error = %e, "Resync failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, GameSettings};
    use crate::game::session::GameSession;
    use tokio::sync::watch;

    fn config() -> Config {
        Config {
            tick_rate: 100,
            session_seed: Some(5),
            replication_buffer: 2,
            game: GameSettings {
                enemy_spawning: false,
                ..GameSettings::default()
            },
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_lag_turns_into_resync() {
        let (session, handle) = GameSession::new(&config());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(session.run(shutdown_rx));

        let endpoint = EndpointId::new();
        let rx = handle.subscribe();
        let joined = handle.connect(endpoint).await.unwrap();
        let mut feed = ReplicationFeed::new(endpoint, handle.clone(), rx, joined.as_of);

        // Each join spawns a controller, so three joins overflow a buffer of two
        for _ in 0..3 {
            handle.connect(EndpointId::new()).await.unwrap();
        }

        let mut resynced = None;
        while resynced.is_none() {
            match feed.next().await {
                Some(FeedEvent::Resync(r)) => resynced = Some(r),
                Some(FeedEvent::Batch(_)) => {}
                None => panic!("feed closed"),
            }
        }

        let resynced = resynced.unwrap();
        assert_eq!(feed.last_seq(), resynced.as_of);
        assert_eq!(resynced.snapshot.len(), 4);
    }

    #[tokio::test]
    async fn test_feed_ends_when_endpoint_is_gone() {
        let (session, handle) = GameSession::new(&config());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(session.run(shutdown_rx));

        // Never connected, so the resync is refused
        let rx = handle.subscribe();
        let mut feed = ReplicationFeed::new(EndpointId::new(), handle.clone(), rx, 0);
        for _ in 0..4 {
            handle.connect(EndpointId::new()).await.unwrap();
        }

        loop {
            match feed.next().await {
                Some(FeedEvent::Batch(_)) => continue,
                Some(FeedEvent::Resync(_)) => panic!("stranger was resynced"),
                None => break,
            }
        }
    }
}
