use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};
use tunemap_proto::notification::{Notification, Severity};

/// How many notices `GET /api/notifications` can show.
pub const NOTICE_CAPACITY: usize = 50;

/// Most recent user-facing notices, oldest first.
#[derive(Clone, Default)]
pub struct NoticeLog {
    inner: Arc<RwLock<VecDeque<Notification>>>,
}

impl NoticeLog {
    pub async fn push(&self, notice: Notification) {
        let mut log = self.inner.write().await;
        if log.len() == NOTICE_CAPACITY {
            log.pop_front();
        }
        log.push_back(notice);
    }

    pub async fn recent(&self) -> Vec<Notification> {
        self.inner.read().await.iter().cloned().collect()
    }

    /// Copy every notice from `rx` into the log until the sender goes away.
    pub fn spawn_collector(
        &self,
        mut rx: broadcast::Receiver<Notification>,
    ) -> tokio::task::JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(notice) => {
                        match notice.severity {
                            Severity::Info => info!("notice: {}: {}", notice.title, notice.detail),
                            Severity::Error => warn!("notice: {}: {}", notice.title, notice.detail),
                        }
                        log.push(notice).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("notice log: dropped {} notices", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_is_bounded() {
        let log = NoticeLog::default();
        for i in 0..NOTICE_CAPACITY + 5 {
            log.push(Notification::info(format!("n{i}"), "")).await;
        }
        let recent = log.recent().await;
        assert_eq!(recent.len(), NOTICE_CAPACITY);
        assert_eq!(recent[0].title, "n5");
    }

    #[tokio::test]
    async fn test_collector_copies_broadcasts() {
        let (tx, rx) = broadcast::channel(8);
        let log = NoticeLog::default();
        let task = log.spawn_collector(rx);
        tx.send(Notification::error("Couldn't skip", "engine gone")).unwrap();
        drop(tx);
        task.await.unwrap();
        assert_eq!(log.recent().await[0].severity, Severity::Error);
    }
}
