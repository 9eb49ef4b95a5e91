use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use murmur_types::models::{Message, MessageId};

use crate::error::HubError;
use crate::store::{self, SharedStore};

/// Read-only queries over the message store. Every call reads the store
/// afresh and never waits on a publish lane.
#[derive(Clone)]
pub struct QueryService {
    store: SharedStore,
}

impl QueryService {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Run a blocking store read on the blocking pool.
    async fn read<F, T>(&self, f: F) -> Result<T, HubError>
    where
        F: FnOnce(&SharedStore) -> Result<T, HubError> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    pub async fn list(&self) -> Result<Vec<Message>, HubError> {
        self.read(|db| Ok(store::find_all(db).collect::<Result<Vec<_>, _>>()?))
            .await
    }

    /// Messages from `sender`; an empty result is `NotFound`.
    pub async fn by_sender(&self, sender: &str) -> Result<Vec<Message>, HubError> {
        let sender = sender.to_string();
        self.read(move |db| {
            let messages = store::find_by_sender(db, &sender).collect::<Result<Vec<_>, _>>()?;
            if messages.is_empty() {
                return Err(HubError::NotFound(format!("no messages from '{}'", sender)));
            }
            Ok(messages)
        })
        .await
    }

    /// The last `limit` messages in store order.
    pub async fn recent(&self, limit: i64) -> Result<Vec<Message>, HubError> {
        if limit <= 0 {
            return Err(HubError::InvalidArgument(format!(
                "limit must be positive, got {}",
                limit
            )));
        }
        let limit = usize::try_from(limit).unwrap_or(usize::MAX);

        self.read(move |db| Ok(db.recent(limit)?)).await
    }

    pub async fn by_id(&self, id: MessageId) -> Result<Message, HubError> {
        self.read(move |db| {
            db.find_by_id(id)?
                .ok_or_else(|| HubError::NotFound(format!("message {} not found", id)))
        })
        .await
    }

    pub async fn count(&self) -> Result<u64, HubError> {
        self.read(|db| Ok(db.count()?)).await
    }

    /// All messages as an async stream, one store page at a time.
    pub fn stream(&self) -> BoxStream<'static, Result<Message, HubError>> {
        let mut cursor = store::find_all(&self.store);

        async_stream::stream! {
            loop {
                let fetched = tokio::task::spawn_blocking(move || {
                    let page = cursor.next_page();
                    (cursor, page)
                })
                .await;

                let page = match fetched {
                    Ok((returned, Ok(page))) => {
                        cursor = returned;
                        page
                    }
                    Ok((_, Err(e))) => {
                        yield Err(HubError::from(e));
                        break;
                    }
                    Err(e) => {
                        yield Err(HubError::from(e));
                        break;
                    }
                };

                if page.is_empty() {
                    break;
                }
                for message in page {
                    yield Ok(message);
                }
            }
        }
        .boxed()
    }
}
