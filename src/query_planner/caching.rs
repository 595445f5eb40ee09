//! A TTL-bounded, fingerprint-keyed plan cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::RwLock;
use sha1::Digest;
use sha1::Sha1;

use crate::error::PlanError;
use crate::format;
use crate::query_planner::Planner;
use crate::query_planner::PlanningContext;
use crate::query_planner::QueryPlan;
use crate::query_planner::SequentialPlanner;

type CacheKey = [u8; 20];

/// Wraps a planner and memoizes plans by the fingerprint of the formatted
/// operation. Entries expire after `ttl`; expired entries are swept on the
/// next lookup.
pub struct CachedPlanner {
    ttl: Duration,
    delegate: Arc<dyn Planner>,
    cache: RwLock<HashMap<CacheKey, (Arc<QueryPlan>, Instant)>>,
}

impl CachedPlanner {
    pub fn new(ttl: Duration) -> Self {
        CachedPlanner {
            ttl,
            delegate: Arc::new(SequentialPlanner),
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_delegate(mut self, delegate: Arc<dyn Planner>) -> Self {
        self.delegate = delegate;
        self
    }

    fn key(ctx: &PlanningContext<'_>) -> CacheKey {
        let fingerprint = format::format_operation(
            &ctx.selections,
            ctx.operation_kind,
            ctx.operation_name.as_deref(),
            ctx.schema,
        );
        let mut hasher = Sha1::new();
        hasher.update(fingerprint.as_bytes());
        hasher.finalize().into()
    }

    fn sweep(&self) {
        let now = Instant::now();
        let expired: Vec<CacheKey> = {
            let cache = self.cache.read();
            cache
                .iter()
                .filter(|(_, (_, expires_at))| *expires_at <= now)
                .map(|(key, _)| *key)
                .collect()
        };
        if !expired.is_empty() {
            let mut cache = self.cache.write();
            for key in expired {
                cache.remove(&key);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.cache.read().len()
    }
}

impl Planner for CachedPlanner {
    fn plan(&self, ctx: &PlanningContext<'_>) -> Result<Arc<QueryPlan>, PlanError> {
        let key = Self::key(ctx);

        self.sweep();
        if let Some((plan, _)) = self.cache.read().get(&key) {
            tracing::trace!("query plan cache hit");
            return Ok(plan.clone());
        }

        let plan = self.delegate.plan(ctx)?;

        let mut cache = self.cache.write();
        cache.insert(key, (plan.clone(), Instant::now() + self.ttl));
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use crate::merge::ExtendMerger;
    use crate::merge::MergeInput;
    use crate::merge::Merger;

    struct CountingPlanner {
        calls: AtomicUsize,
    }

    impl Planner for CountingPlanner {
        fn plan(&self, ctx: &PlanningContext<'_>) -> Result<Arc<QueryPlan>, PlanError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            SequentialPlanner.plan(ctx)
        }
    }

    fn merged() -> crate::merge::MergeResult {
        ExtendMerger
            .merge(vec![MergeInput {
                schema: apollo_compiler::Schema::parse(
                    "type Query { hello: String world: String }",
                    "svc.graphql",
                )
                .unwrap(),
                url: std::sync::Arc::from("http://svc"),
            }])
            .unwrap()
    }

    fn ctx<'a>(merged: &'a crate::merge::MergeResult, query: &str) -> PlanningContext<'a> {
        let document = merged.schema.parse_operation(query).unwrap();
        let operation = document.operations.get(None).unwrap();
        PlanningContext::new(&merged.schema, &merged.type_url_map, operation, &document)
    }

    #[tokio::test]
    async fn identical_operations_plan_once() {
        let merged = merged();
        let delegate = Arc::new(CountingPlanner {
            calls: AtomicUsize::new(0),
        });
        let planner = CachedPlanner::new(Duration::from_secs(60)).with_delegate(delegate.clone());

        planner.plan(&ctx(&merged, "{ hello }")).unwrap();
        planner.plan(&ctx(&merged, "{ hello }")).unwrap();
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 1);

        planner.plan(&ctx(&merged, "{ world }")).unwrap();
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 2);
        assert_eq!(planner.len(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_swept() {
        let merged = merged();
        let delegate = Arc::new(CountingPlanner {
            calls: AtomicUsize::new(0),
        });
        let planner = CachedPlanner::new(Duration::ZERO).with_delegate(delegate.clone());

        planner.plan(&ctx(&merged, "{ hello }")).unwrap();
        planner.plan(&ctx(&merged, "{ hello }")).unwrap();
        // a zero TTL expires immediately, so both calls replan
        assert_eq!(delegate.calls.load(Ordering::SeqCst), 2);
        assert_eq!(planner.len(), 1);
    }
}
