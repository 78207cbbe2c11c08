use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::db::SnapshotSink;
use crate::dedup::dedup;
use crate::record::{normalize, CanonicalRecord, ResultSet};
use crate::runner::{run_sources, SourceReport};
use crate::sources::{ExtractOptions, Registry};

pub const DEFAULT_MAX_PER_SITE: usize = 10;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub query: String,
    pub max_per_site: usize,
    /// Source identifiers to run; `None` runs every registered source.
    pub sources: Option<Vec<String>>,
    pub headless: bool,
    /// Save a snapshot of non-empty results.
    pub persist: bool,
}

impl FetchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_per_site: DEFAULT_MAX_PER_SITE,
            sources: None,
            headless: true,
            persist: true,
        }
    }

    pub fn max_per_site(mut self, n: usize) -> Self {
        self.max_per_site = n;
        self
    }

    pub fn sources<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }
}

/// Per-source line of an [`Aggregation`].
#[derive(Debug, Clone, PartialEq)]
pub struct SourceSummary {
    pub source: String,
    /// `ok`, `unavailable` or `failed`.
    pub status: &'static str,
    pub items: usize,
    pub reason: Option<String>,
}

impl From<&SourceReport> for SourceSummary {
    fn from(report: &SourceReport) -> Self {
        Self {
            source: report.source.clone(),
            status: report.outcome.status(),
            items: report.outcome.items().len(),
            reason: report.outcome.reason().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Aggregation {
    pub results: ResultSet,
    pub sources: Vec<SourceSummary>,
    /// Id of the snapshot written for this run, if any.
    pub snapshot_id: Option<i64>,
}

pub struct Aggregator {
    registry: Registry,
    snapshots: Option<Arc<dyn SnapshotSink>>,
    source_timeout: Option<Duration>,
}

impl Aggregator {
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            snapshots: None,
            source_timeout: None,
        }
    }

    pub fn with_snapshots(mut self, sink: Arc<dyn SnapshotSink>) -> Self {
        self.snapshots = Some(sink);
        self
    }

    pub fn with_source_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.source_timeout = timeout;
        self
    }

    /// Run the enabled sources, merge and dedup their items, and save a
    /// snapshot when asked. Source and storage failures are logged, never
    /// returned.
    pub async fn fetch(&self, request: &FetchRequest) -> Aggregation {
        let options = ExtractOptions {
            headless: request.headless,
        };
        let reports = run_sources(
            &self.registry,
            request.sources.as_deref(),
            &request.query,
            request.max_per_site,
            &options,
            self.source_timeout,
        )
        .await;

        let sources: Vec<SourceSummary> = reports.iter().map(SourceSummary::from).collect();
        let results = merge(&reports);
        info!(
            "'{}': {} unique products from {} sources",
            request.query,
            results.len(),
            sources.iter().filter(|s| s.status == "ok").count()
        );

        let snapshot_id = if request.persist && !results.is_empty() {
            self.persist(&results, &request.query)
        } else {
            None
        };

        Aggregation {
            results,
            sources,
            snapshot_id,
        }
    }

    pub async fn fetch_combined(&self, request: &FetchRequest) -> ResultSet {
        self.fetch(request).await.results
    }

    fn persist(&self, results: &ResultSet, query: &str) -> Option<i64> {
        let sink = self.snapshots.as_ref()?;
        match sink.save(results, query) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Saving snapshot for '{}' failed: {:#}", query, e);
                None
            }
        }
    }
}

/// Normalize every successful source's items, in report order, then dedup.
pub fn merge(reports: &[SourceReport]) -> ResultSet {
    let records: Vec<CanonicalRecord> = reports
        .iter()
        .flat_map(|r| r.outcome.items())
        .map(normalize)
        .collect();
    if records.is_empty() {
        return ResultSet::empty();
    }
    dedup(records)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    use super::*;
    use crate::record::RawItem;
    use crate::sources::Extractor;

    struct Canned {
        id: &'static str,
        items: Option<Vec<Value>>,
    }

    #[async_trait]
    impl Extractor for Canned {
        fn id(&self) -> &'static str {
            self.id
        }

        async fn extract(&self, _q: &str, max: usize, _o: &ExtractOptions) -> Result<Vec<RawItem>> {
            let Some(items) = &self.items else {
                anyhow::bail!("connection reset");
            };
            Ok(items
                .iter()
                .take(max)
                .filter_map(|v| v.as_object().cloned())
                .collect())
        }
    }

    fn canned(id: &'static str, items: Vec<Value>) -> Arc<dyn Extractor> {
        Arc::new(Canned { id, items: Some(items) })
    }

    fn broken(id: &'static str) -> Arc<dyn Extractor> {
        Arc::new(Canned { id, items: None })
    }

    #[derive(Default)]
    struct RecordingSink {
        saved: Mutex<Vec<(usize, String)>>,
        fail: bool,
    }

    impl SnapshotSink for RecordingSink {
        fn save(&self, rows: &ResultSet, query: &str) -> Result<i64> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            let mut saved = self.saved.lock().unwrap();
            saved.push((rows.len(), query.to_string()));
            Ok(saved.len() as i64)
        }
    }

    fn shops() -> Registry {
        let mut registry = Registry::new();
        registry
            .add(canned(
                "Amazon",
                vec![
                    json!({"title": "Steel Bottle", "price": 449.0, "link": "https://a.test/1", "source": "Amazon"}),
                    json!({"title": "Glass Bottle", "price": 299.0, "link": "https://a.test/2", "source": "Amazon"}),
                ],
            ))
            .add(broken("Flipkart"))
            .add(canned(
                "Snapdeal",
                vec![
                    json!({"name": "Copper Bottle", "price": 899, "url": "https://a.test/1", "source": "Snapdeal"}),
                    json!({"title": "Glass Bottle", "price": 279.0, "link": "", "source": "Snapdeal"}),
                    json!({"title": "Sipper", "price": 0, "link": "https://s.test/9", "source": "Snapdeal"}),
                ],
            ));
        registry
    }

    #[tokio::test]
    async fn broken_source_does_not_stop_the_rest() {
        let aggregator = Aggregator::new(shops());
        let agg = aggregator.fetch(&FetchRequest::new("bottle").persist(false)).await;

        let titles: Vec<&str> = agg.results.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Steel Bottle", "Glass Bottle", "Sipper"]);

        let statuses: Vec<(&str, &str, usize)> = agg
            .sources
            .iter()
            .map(|s| (s.source.as_str(), s.status, s.items))
            .collect();
        assert_eq!(
            statuses,
            vec![("Amazon", "ok", 2), ("Flipkart", "failed", 0), ("Snapdeal", "ok", 3)]
        );
        assert_eq!(agg.sources[1].reason.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn link_then_title_dedup_keeps_first_fields() {
        let results = Aggregator::new(shops())
            .fetch_combined(&FetchRequest::new("bottle").persist(false))
            .await;
        let glass = results.iter().find(|r| r.title == "Glass Bottle").unwrap();
        assert_eq!(glass.price, Some(299.0));
        assert_eq!(glass.source, "Amazon");
        // falsy price normalizes to null
        let sipper = results.iter().find(|r| r.title == "Sipper").unwrap();
        assert_eq!(sipper.price, None);
        assert_eq!(sipper.currency, "INR");
    }

    #[tokio::test]
    async fn nothing_found_keeps_the_shape() {
        let mut registry = Registry::new();
        registry.add(canned("Amazon", vec![])).add(broken("JioMart"));
        let sink = Arc::new(RecordingSink::default());
        let aggregator = Aggregator::new(registry).with_snapshots(sink.clone());

        let agg = aggregator.fetch(&FetchRequest::new("unobtainium")).await;
        assert!(agg.results.is_empty());
        assert_eq!(agg.results.columns().len(), 7);
        assert_eq!(agg.snapshot_id, None);
        assert!(sink.saved.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_saved_once_with_query() {
        let sink = Arc::new(RecordingSink::default());
        let aggregator = Aggregator::new(shops()).with_snapshots(sink.clone());

        let agg = aggregator.fetch(&FetchRequest::new("bottle")).await;
        assert_eq!(agg.snapshot_id, Some(1));
        assert_eq!(*sink.saved.lock().unwrap(), vec![(3, "bottle".to_string())]);

        aggregator
            .fetch(&FetchRequest::new("bottle").persist(false))
            .await;
        assert_eq!(sink.saved.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn snapshot_failure_is_swallowed() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..RecordingSink::default()
        });
        let aggregator = Aggregator::new(shops()).with_snapshots(sink);
        let agg = aggregator.fetch(&FetchRequest::new("bottle")).await;
        assert_eq!(agg.results.len(), 3);
        assert_eq!(agg.snapshot_id, None);
    }

    #[tokio::test]
    async fn source_filter_and_cap() {
        let request = FetchRequest::new("bottle")
            .sources(["snapdeal"])
            .max_per_site(1)
            .persist(false);
        let results = Aggregator::new(shops()).fetch_combined(&request).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results.rows()[0].title, "Copper Bottle");
        assert_eq!(results.rows()[0].link, "https://a.test/1");
    }

    #[test]
    fn request_defaults() {
        let request = FetchRequest::new("tv");
        assert_eq!(request.max_per_site, 10);
        assert!(request.sources.is_none());
        assert!(request.headless);
        assert!(request.persist);
    }
}
