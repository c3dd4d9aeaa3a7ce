use thiserror::Error;

use crate::store::{ClassifiedError, Document, StoreError, Unprocessed};

/// One caller-submitted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Write(Document),
    Delete(Document),
}

/// Writes and delete keys bound for a single batch call.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Group {
    pub(crate) writes: Vec<Document>,
    pub(crate) delete_keys: Vec<Document>,
}

impl Group {
    pub(crate) fn len(&self) -> usize {
        self.writes.len() + self.delete_keys.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&mut self, msg: Message) {
        match msg {
            Message::Write(doc) => self.writes.push(doc),
            Message::Delete(key) => self.delete_keys.push(key),
        }
    }

    /// Splits the group into the items the store persisted and the ones it
    /// handed back. Each unprocessed item claims one equal item of the group;
    /// handed-back items that match nothing in the group are dropped.
    pub(crate) fn split_unprocessed(self, unprocessed: Unprocessed) -> (Group, Group) {
        let (done_writes, writes, stray_writes) = claim(self.writes, &unprocessed.writes);
        let (done_deletes, delete_keys, stray_deletes) =
            claim(self.delete_keys, &unprocessed.delete_keys);

        if stray_writes + stray_deletes > 0 {
            tracing::warn!(
                writes = stray_writes,
                delete_keys = stray_deletes,
                "store handed back items that were not in the batch, ignoring them"
            );
        }

        let done = Group {
            writes: done_writes,
            delete_keys: done_deletes,
        };
        (done, Group { writes, delete_keys })
    }

    /// Drains the group back into single messages, writes first.
    pub(crate) fn into_messages(self) -> impl Iterator<Item = Message> {
        self.writes
            .into_iter()
            .map(Message::Write)
            .chain(self.delete_keys.into_iter().map(Message::Delete))
    }
}

// Returns (unclaimed, claimed, count of handed-back entries matching nothing).
fn claim(
    items: Vec<Document>,
    handed_back: &[Document],
) -> (Vec<Document>, Vec<Document>, usize) {
    let mut used = vec![false; handed_back.len()];
    let (mut unclaimed, mut claimed) = (Vec::new(), Vec::new());
    for item in items {
        match (0..handed_back.len()).find(|&i| !used[i] && handed_back[i] == item) {
            Some(i) => {
                used[i] = true;
                claimed.push(item);
            }
            None => unclaimed.push(item),
        }
    }
    let stray = used.iter().filter(|&&u| !u).count();
    (unclaimed, claimed, stray)
}

/// Outcome for a set of writes and delete keys.
///
/// Every item handed to the writer shows up in exactly one result.
#[derive(Debug)]
pub struct BulkResult {
    pub writes: Vec<Document>,
    pub delete_keys: Vec<Document>,
    /// Set when the items failed for good.
    pub error: Option<StoreError>,
    /// Classified detail of `error`, when the store provided one.
    pub classified: Option<ClassifiedError>,
}

impl BulkResult {
    pub(crate) fn success(group: Group) -> Self {
        Self {
            writes: group.writes,
            delete_keys: group.delete_keys,
            error: None,
            classified: None,
        }
    }

    pub(crate) fn failure(group: Group, err: StoreError) -> Self {
        Self {
            writes: group.writes,
            delete_keys: group.delete_keys,
            classified: err.as_classified().cloned(),
            error: Some(err),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Number of writes plus delete keys covered.
    pub fn len(&self) -> usize {
        self.writes.len() + self.delete_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Message> for Group {
    fn from(msg: Message) -> Self {
        let mut group = Group::default();
        group.push(msg);
        group
    }
}

/// Usage and lifecycle errors of a [`BulkWriter`](super::BulkWriter).
///
/// Store failures never show up here; they travel through the result stream.
#[derive(Debug, Error)]
pub enum BulkError {
    /// Write or delete issued after shutdown started.
    #[error("bulk writer is closed")]
    Closed,

    /// `close_wait` called a second time.
    #[error("bulk writer was already closed")]
    AlreadyClosed,

    /// The result stream was already handed out.
    #[error("result stream already taken")]
    ResultsTaken,

    /// A pipeline task panicked or was aborted.
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),

    /// Several pipeline tasks failed.
    #[error("{} pipeline task(s) failed", .0.len())]
    MultipleErrors(Vec<BulkError>),
}
