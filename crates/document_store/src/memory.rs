//! An in-process document store. A single task owns every document and
//! handles one command at a time, which makes each batch atomic and isolated
//! from concurrent batches.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    batch::WriteOp, CollectionPath, Document, DocumentPath, DocumentSnapshot, DocumentStore,
    Query, Result, StoreError, Subscription, WriteBatch,
};

const MAILBOX_SIZE: usize = 64;

type Responder<T> = oneshot::Sender<Result<T>>;

#[derive(Debug)]
enum Command {
    Get {
        path: DocumentPath,
        responder: Responder<Option<DocumentSnapshot>>,
    },
    Query {
        query: Query,
        responder: Responder<Vec<DocumentSnapshot>>,
    },
    Subscribe {
        query: Query,
        responder: Responder<Subscription>,
    },
    Commit {
        batch: WriteBatch,
        responder: Responder<()>,
    },
    SubscriberCount {
        responder: Responder<usize>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct StoredDocument {
    data: Document,
    version: u64,
    create_sequence: u64,
}

struct Subscriber {
    query: Query,
    sender: watch::Sender<Vec<DocumentSnapshot>>,
}

#[derive(Default)]
struct State {
    collections: HashMap<CollectionPath, BTreeMap<String, StoredDocument>>,
    sequence: u64,
    subscribers: Vec<Subscriber>,
}

impl State {
    fn document(&self, path: &DocumentPath) -> Option<&StoredDocument> {
        self.collections
            .get(&path.collection)
            .and_then(|collection| collection.get(&path.id))
    }

    fn snapshot(path: DocumentPath, document: &StoredDocument) -> DocumentSnapshot {
        DocumentSnapshot {
            path,
            data: document.data.clone(),
            version: document.version,
            create_sequence: document.create_sequence,
        }
    }

    fn get(&self, path: &DocumentPath) -> Option<DocumentSnapshot> {
        self.document(path)
            .map(|document| Self::snapshot(path.clone(), document))
    }

    fn run_query(&self, query: &Query) -> Vec<DocumentSnapshot> {
        let documents = self
            .collections
            .get(&query.collection)
            .into_iter()
            .flat_map(|collection| collection.iter())
            .map(|(id, document)| Self::snapshot(query.collection.doc(id.clone()), document));
        query.evaluate(documents)
    }

    fn subscribe(&mut self, query: Query) -> Subscription {
        let (sender, receiver) = watch::channel(self.run_query(&query));
        self.subscribers.push(Subscriber { query, sender });
        Subscription::from_receiver(receiver)
    }

    /// Checks and applies a batch on staged copies of the touched documents.
    /// The real state is only replaced when everything succeeded.
    fn commit(&mut self, batch: &WriteBatch) -> Result<()> {
        let mut staged: BTreeMap<DocumentPath, Option<StoredDocument>> = batch
            .touched_documents()
            .into_iter()
            .map(|path| {
                let current = self.document(&path).cloned();
                (path, current)
            })
            .collect();

        for precondition in batch.preconditions() {
            let current = staged
                .get(precondition.path())
                .and_then(|document| document.as_ref())
                .map(|document| &document.data);
            precondition
                .check(current)
                .map_err(|reason| StoreError::PreconditionFailed {
                    path: precondition.path().clone(),
                    reason,
                })?;
        }

        let sequence = self.sequence + 1;
        for write in batch.writes() {
            let slot = staged.entry(write.path().clone()).or_insert(None);
            match write {
                WriteOp::Create { path, data } => {
                    if slot.is_some() {
                        return Err(StoreError::AlreadyExists(path.clone()));
                    }
                    *slot = Some(StoredDocument {
                        data: data.clone(),
                        version: sequence,
                        create_sequence: sequence,
                    });
                }
                WriteOp::Set { data, .. } => {
                    let create_sequence = slot
                        .as_ref()
                        .map(|document| document.create_sequence)
                        .unwrap_or(sequence);
                    *slot = Some(StoredDocument {
                        data: data.clone(),
                        version: sequence,
                        create_sequence,
                    });
                }
                WriteOp::Update { path, patch } => {
                    let document = slot
                        .as_mut()
                        .ok_or_else(|| StoreError::NotFound(path.clone()))?;
                    for (key, value) in patch {
                        document.data.insert(key.clone(), value.clone());
                    }
                    document.version = sequence;
                }
                WriteOp::Delete { path } => {
                    if slot.take().is_none() {
                        return Err(StoreError::NotFound(path.clone()));
                    }
                }
            }
        }

        if batch.is_empty() {
            return Ok(());
        }
        self.sequence = sequence;
        for write in batch.writes() {
            let path = write.path();
            let staged_document = staged.get(path).cloned().flatten();
            let collection = self.collections.entry(path.collection.clone()).or_default();
            match staged_document {
                Some(document) => {
                    collection.insert(path.id.clone(), document);
                }
                None => {
                    collection.remove(&path.id);
                }
            }
        }
        self.notify(batch);
        Ok(())
    }

    /// Republishes the result of every live query on a written collection,
    /// dropping subscribers whose receiving side is gone.
    fn notify(&mut self, batch: &WriteBatch) {
        let written = batch.written_collections();
        let subscribers = std::mem::take(&mut self.subscribers);
        self.subscribers = subscribers
            .into_iter()
            .filter(|subscriber| !subscriber.sender.is_closed())
            .collect();
        for subscriber in self.subscribers.iter() {
            if !written.contains(&subscriber.query.collection) {
                continue;
            }
            let result = self.run_query(&subscriber.query);
            subscriber.sender.send_if_modified(|current| {
                if *current == result {
                    false
                } else {
                    *current = result;
                    true
                }
            });
        }
    }

    fn handle(&mut self, command: Command) {
        let delivered = match command {
            Command::Get { path, responder } => responder.send(Ok(self.get(&path))).is_ok(),
            Command::Query { query, responder } => {
                responder.send(Ok(self.run_query(&query))).is_ok()
            }
            Command::Subscribe { query, responder } => {
                responder.send(Ok(self.subscribe(query))).is_ok()
            }
            Command::Commit { batch, responder } => {
                let result = self.commit(&batch);
                if let Err(why) = &result {
                    log::debug!("rejected batch: {}", why);
                }
                responder.send(result).is_ok()
            }
            Command::SubscriberCount { responder } => {
                self.subscribers.retain(|subscriber| !subscriber.sender.is_closed());
                responder.send(Ok(self.subscribers.len())).is_ok()
            }
        };
        if !delivered {
            log::warn!("document store could not respond, requester went away");
        }
    }
}

/// Handle to a store task. Clones share the same documents.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    sender: mpsc::Sender<Command>,
}

impl MemoryStore {
    /// Spawns the store task on the current tokio runtime. The task ends once
    /// every handle has been dropped.
    pub fn start() -> Self {
        let (sender, mut receiver) = mpsc::channel::<Command>(MAILBOX_SIZE);
        tokio::spawn(async move {
            let mut state = State::default();
            while let Some(command) = receiver.recv().await {
                state.handle(command);
            }
            log::info!("document store stopped");
        });
        Self { sender }
    }

    async fn request<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(Responder<T>) -> Command,
    {
        let (responder, response) = oneshot::channel();
        self.sender
            .send(command(responder))
            .await
            .map_err(|_| StoreError::Unavailable("store task stopped".to_owned()))?;
        response
            .await
            .map_err(|_| StoreError::Unavailable("store task dropped the request".to_owned()))?
    }

    /// Number of live subscriptions.
    pub async fn subscriber_count(&self) -> Result<usize> {
        self.request(|responder| Command::SubscriberCount { responder })
            .await
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<DocumentSnapshot>> {
        let path = path.clone();
        self.request(|responder| Command::Get { path, responder })
            .await
    }

    async fn query(&self, query: Query) -> Result<Vec<DocumentSnapshot>> {
        self.request(|responder| Command::Query { query, responder })
            .await
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription> {
        self.request(|responder| Command::Subscribe { query, responder })
            .await
    }

    async fn add(&self, collection: &CollectionPath, data: Document) -> Result<DocumentPath> {
        let path = collection.doc(uuid::Uuid::new_v4().to_string());
        self.commit(WriteBatch::new().create(path.clone(), data))
            .await
            .map(|_| path)
    }

    async fn update(&self, path: &DocumentPath, patch: Document) -> Result<()> {
        self.commit(WriteBatch::new().update(path.clone(), patch))
            .await
    }

    async fn delete(&self, path: &DocumentPath) -> Result<()> {
        self.commit(WriteBatch::new().delete(path.clone())).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        self.request(|responder| Command::Commit { batch, responder })
            .await
    }
}
