//! Result Cursor
//!
//! Presents one namespace-scoped query as a lazy, finite sequence of
//! documents fetched in batches of `batch_size`. Refills go through a
//! [`BatchSource`]; the client supplies one backed by its `find` endpoint.
//!
//! The cursor is not restartable. Once a refill comes back short the result
//! set is exhausted and no further network call is made.

use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use scope_core::query::DEFAULT_LIMIT;
use scope_core::{FindOptions, Namespace, Result};
use serde_json::Value;
use tracing::debug;

/// Refill seam for [`Cursor`]
#[async_trait]
pub trait BatchSource: Send + Sync {
    /// Fetch one page. `options.skip`/`options.limit` select the page.
    async fn fetch_batch(&self, namespace: &Namespace, options: &FindOptions) -> Result<Vec<Value>>;
}

#[derive(Debug, Default)]
struct Batch {
    data: Vec<Value>,
    returned: usize,
    /// Index of the last consumed document, -1 before the first
    pos: isize,
}

impl Batch {
    fn empty() -> Self {
        Self {
            data: Vec::new(),
            returned: 0,
            pos: -1,
        }
    }
}

pub struct Cursor {
    source: Arc<dyn BatchSource>,
    namespace: Namespace,
    /// Template for refills; `skip` advances by `batch_size` per refill
    request: FindOptions,
    batch_size: usize,
    batch: Batch,
    exhausted: bool,
    fetches: usize,
}

impl Cursor {
    /// Build a cursor from `find` options. `batch_size` wins over `limit` as
    /// the page size; zero falls back to the default page size.
    pub fn new(source: Arc<dyn BatchSource>, namespace: Namespace, options: FindOptions) -> Self {
        let batch_size = match options.batch_size.unwrap_or(options.limit) {
            0 => DEFAULT_LIMIT,
            n => n,
        };
        let mut request = options;
        request.limit = batch_size;
        request.batch_size = None;

        debug!(ns = %namespace, batch_size, "[Cursor] New cursor");
        Self {
            source,
            namespace,
            request,
            batch_size: batch_size as usize,
            batch: Batch::empty(),
            exhausted: false,
            fetches: 0,
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Offset the next refill will request
    pub fn skip(&self) -> u64 {
        self.request.skip
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    /// Number of refills performed so far
    pub fn fetches(&self) -> usize {
        self.fetches
    }

    /// Whether another document is available, refilling only when the
    /// current batch is consumed and the result set is not exhausted.
    pub async fn more(&mut self) -> Result<bool> {
        if self.batch.pos >= self.batch_size as isize {
            return Ok(false);
        }
        if self.batch.pos + 1 < self.batch.returned as isize {
            return Ok(true);
        }
        if self.exhausted {
            return Ok(false);
        }

        debug!(
            pos = self.batch.pos,
            returned = self.batch.returned,
            "[Cursor] Current batch consumed, requesting more"
        );
        self.request_more().await?;
        Ok(self.batch.pos + 1 < self.batch.returned as isize)
    }

    pub async fn has_next(&mut self) -> Result<bool> {
        self.more().await
    }

    /// Next document, or `None` once the result set is drained
    pub async fn next(&mut self) -> Result<Option<Value>> {
        if !self.more().await? {
            return Ok(None);
        }
        self.batch.pos += 1;
        Ok(self.batch.data.get(self.batch.pos as usize).cloned())
    }

    /// Replace the current batch with the next page
    async fn request_more(&mut self) -> Result<()> {
        let data = self.source.fetch_batch(&self.namespace, &self.request).await?;
        self.fetches += 1;

        let returned = data.len();
        debug!(
            ns = %self.namespace,
            skip = self.request.skip,
            returned,
            "[Cursor] Batch received"
        );

        self.batch = Batch {
            data,
            returned,
            pos: -1,
        };
        self.request.skip += self.batch_size as u64;
        if returned < self.batch_size {
            self.exhausted = true;
        }
        Ok(())
    }

    /// Documents of the current batch not yet consumed
    pub fn objs_left_in_batch(&self) -> usize {
        (self.batch.returned as isize - (self.batch.pos + 1)).max(0) as usize
    }

    pub fn more_in_current_batch(&self) -> bool {
        self.objs_left_in_batch() > 0
    }

    /// Drain the rest of the cursor into a vector
    pub async fn collect_all(mut self) -> Result<Vec<Value>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.next().await? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Push-style view: each poll pulls `next`, `None` ends the stream and
    /// refill failures surface as stream errors.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Value>> + Send {
        async_stream::try_stream! {
            while let Some(doc) = self.next().await? {
                yield doc;
            }
        }
    }
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("namespace", &self.namespace)
            .field("batch_size", &self.batch_size)
            .field("skip", &self.request.skip)
            .field("exhausted", &self.exhausted)
            .finish()
    }
}
