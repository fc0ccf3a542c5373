use crate::models::ScrapeResult;
use crate::traits::{FetchStrategy, PlatformAdapter};

/// A strategy whose successful records are enriched by a platform adapter.
///
/// Adapter fields land in `record.extra`; the generic fields are left as the
/// inner strategy produced them. Failures pass through untouched.
pub struct AdaptedStrategy<S, A> {
    inner: S,
    adapter: A,
}

impl<S, A> AdaptedStrategy<S, A>
where
    S: FetchStrategy,
    A: PlatformAdapter,
{
    pub fn new(inner: S, adapter: A) -> Self {
        Self { inner, adapter }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }
}

impl<S, A> FetchStrategy for AdaptedStrategy<S, A>
where
    S: FetchStrategy,
    A: PlatformAdapter,
{
    async fn fetch(&self, url: &str) -> ScrapeResult {
        match self.inner.fetch(url).await {
            ScrapeResult::Success(mut record) => {
                let fields = self.adapter.extra_fields(&record);
                tracing::debug!(
                    component = "adapter",
                    adapter = %self.adapter.name(),
                    %url,
                    fields = fields.len(),
                    "Record enriched"
                );
                record.extra.extend(fields);
                ScrapeResult::Success(record)
            }
            failure => failure,
        }
    }
}
