use std::fmt::Debug;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use tracing::instrument;

use crate::key::KeyFilter;
use crate::key::QueryKey;
use crate::query::QueryClient;
use crate::traits::MutationFn;
use crate::types::MutationStatus;

type InvalidationFn<I, O> = Arc<dyn Fn(&I, &O) -> Vec<KeyFilter> + Send + Sync>;
type SuccessHook<V, E, I, O> = Arc<dyn Fn(&QueryClient<V, E>, &I, &O) -> Result<(), E> + Send + Sync>;

/// State of a [`Mutation`] after its latest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationRecord {
    pub status:      MutationStatus,
    /// Keys invalidated by the last successful run.
    pub invalidated: Vec<QueryKey>,
}

/// A reusable write operation bound to a query client.
///
/// ```ignore
/// let create = Mutation::new(client.clone(), move |input: CategoryInput| {
///     let http = http.clone();
///     async move { http.send_json::<Category>(&Operation::CreateCategory(input).describe()?).await }
/// })
/// .invalidating(vec![KeyFilter::prefix(query_key!["categories"])]);
///
/// let category = create.mutate(input).await?;
/// ```
pub struct Mutation<V, E, I, O> {
    client:     QueryClient<V, E>,
    call:       Arc<dyn MutationFn<I, O, E>>,
    filters:    Vec<KeyFilter>,
    derived:    Option<InvalidationFn<I, O>>,
    on_success: Option<SuccessHook<V, E, I, O>>,
    record:     Mutex<MutationRecord>,
}

impl<V, E, I, O> Mutation<V, E, I, O>
where
    V: Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    I: Clone + Send + 'static,
    O: Send + 'static,
{
    pub fn new<M>(client: QueryClient<V, E>, call: M) -> Self
    where
        M: MutationFn<I, O, E>,
    {
        Self {
            client,
            call: Arc::new(call),
            filters: Vec::new(),
            derived: None,
            on_success: None,
            record: Mutex::new(MutationRecord::default()),
        }
    }

    /// Filters invalidated after every successful run.
    pub fn invalidating(mut self, filters: Vec<KeyFilter>) -> Self {
        self.filters.extend(filters);
        self
    }

    /// Filters computed from the input and the output of a successful run, invalidated in addition to the fixed
    /// ones.
    pub fn invalidates<F>(mut self, derive: F) -> Self
    where
        F: Fn(&I, &O) -> Vec<KeyFilter> + Send + Sync + 'static,
    {
        self.derived = Some(Arc::new(derive));
        self
    }

    /// Runs after a successful call and before invalidation. An error from the hook fails the mutation.
    pub fn on_success<F>(mut self, hook: F) -> Self
    where
        F: Fn(&QueryClient<V, E>, &I, &O) -> Result<(), E> + Send + Sync + 'static,
    {
        self.on_success = Some(Arc::new(hook));
        self
    }

    pub fn client(&self) -> &QueryClient<V, E> {
        &self.client
    }

    pub fn status(&self) -> MutationStatus {
        self.record.lock().status
    }

    pub fn record(&self) -> MutationRecord {
        self.record.lock().clone()
    }

    /// Returns the mutation to [`Idle`](MutationStatus::Idle).
    pub fn reset(&self) {
        *self.record.lock() = MutationRecord::default();
    }

    #[instrument(level = "debug", skip_all)]
    pub async fn mutate(&self, input: I) -> Result<O, E> {
        self.record.lock().status = MutationStatus::Pending;

        let output = match self.call.call(input.clone()).await {
            Ok(output) => output,
            Err(err) => {
                debug!("mutation failed");
                self.record.lock().status = MutationStatus::Error;
                return Err(err);
            }
        };

        if let Some(hook) = &self.on_success {
            if let Err(err) = hook(&self.client, &input, &output) {
                debug!("success hook failed");
                self.record.lock().status = MutationStatus::Error;
                return Err(err);
            }
        }

        let mut filters = self.filters.clone();
        if let Some(derive) = &self.derived {
            filters.extend(derive(&input, &output));
        }
        let invalidated = self.client.invalidate(&filters);
        debug!(invalidated = invalidated.len(), "mutation succeeded");

        *self.record.lock() = MutationRecord {
            status: MutationStatus::Success,
            invalidated,
        };

        Ok(output)
    }
}

impl<V, E, I, O> Debug for Mutation<V, E, I, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutation")
            .field("filters", &self.filters)
            .field("record", &*self.record.lock())
            .finish()
    }
}
