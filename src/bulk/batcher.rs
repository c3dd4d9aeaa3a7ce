// src/bulk/batcher.rs

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use super::types::{Group, Message};

enum Recv {
    Message(Message),
    Linger,
    Closed,
}

/// Drains the ingress queue into groups of at most `items_per_batch`.
pub(crate) struct Batcher {
    ingress: mpsc::Receiver<Message>,
    groups: mpsc::Sender<Group>,
    done: CancellationToken,
    closing: bool,
    items_per_batch: usize,
    linger: Option<Duration>,
}

impl Batcher {
    pub(crate) fn new(
        ingress: mpsc::Receiver<Message>,
        groups: mpsc::Sender<Group>,
        done: CancellationToken,
        items_per_batch: usize,
        linger: Option<Duration>,
    ) -> Self {
        Self {
            ingress,
            groups,
            done,
            closing: false,
            items_per_batch,
            linger,
        }
    }

    /// Runs until the ingress queue is closed and drained. Dropping `self`
    /// at the end closes the group channel for the workers.
    pub(crate) async fn run(mut self) {
        let mut sent = 0usize;
        while let Some(group) = self.next_group().await {
            if self.groups.send(group).await.is_err() {
                tracing::warn!("all workers are gone, batcher stopping");
                break;
            }
            sent += 1;
        }
        tracing::debug!(groups = sent, "batcher finished");
    }

    /// Collects the next non-empty group, or `None` once the queue is closed
    /// and empty.
    async fn next_group(&mut self) -> Option<Group> {
        let mut group = Group::default();
        let mut deadline = None;

        while group.len() < self.items_per_batch {
            match self.recv(deadline).await {
                Recv::Message(msg) => {
                    if deadline.is_none() {
                        deadline = self.linger.map(|d| Instant::now() + d);
                    }
                    group.push(msg);
                }
                Recv::Linger => break,
                Recv::Closed => break,
            }
        }

        if group.is_empty() {
            None
        } else {
            Some(group)
        }
    }

    async fn recv(&mut self, deadline: Option<Instant>) -> Recv {
        loop {
            tokio::select! {
                msg = self.ingress.recv() => {
                    return msg.map_or(Recv::Closed, Recv::Message);
                }

                _ = self.done.cancelled(), if !self.closing => {
                    // Reject new submissions; buffered messages are still drained.
                    self.ingress.close();
                    self.closing = true;
                }

                _ = linger_expired(deadline) => {
                    return Recv::Linger;
                }
            }
        }
    }
}

async fn linger_expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
