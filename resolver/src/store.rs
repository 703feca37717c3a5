use crate::config::ProjectConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// The store could not be reached or the query failed. Transient;
    /// absence could not be established.
    #[error("authoritative store unavailable: {0}")]
    Unavailable(String),

    #[error("no store configured for project {0}")]
    UnknownProject(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// One page of route keys for a project, in ascending key order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct KeyPage {
    pub keys: Vec<String>,
    /// Cursor to pass as `after` for the next page; `None` on the last
    /// page.
    pub next: Option<String>,
}

/// Query seam over the per-project authoritative mapping stores.
#[async_trait]
pub trait RouteStore: Send + Sync {
    /// Projects this store can answer for.
    fn projects(&self) -> Vec<String>;

    /// Which project owns `key`, if any. `Ok(None)` means every project
    /// store conclusively reported the key absent; a store that could
    /// not answer makes the whole lookup [`StoreError::Unavailable`],
    /// because absence is then not established.
    async fn lookup(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Keys currently mapped to `project`, keyset-paginated.
    async fn project_keys(
        &self,
        project: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<KeyPage, StoreError>;
}

struct ProjectPool {
    pool: PgPool,
    op_timeout: Duration,
}

/// Postgres-backed [`RouteStore`]: one lazily-connected pool per
/// project, each holding that project's `route_keys` table.
pub struct SqlRouteStore {
    pools: HashMap<String, ProjectPool>,
}

impl SqlRouteStore {
    pub fn from_projects(
        projects: &HashMap<String, ProjectConfig>,
    ) -> Result<Self, StoreError> {
        let mut pools = HashMap::new();
        for (project, config) in projects {
            let op_timeout = Duration::from_millis(config.database.timeout_ms);
            let pool = PgPoolOptions::new()
                .max_connections(config.database.max_connections)
                .acquire_timeout(op_timeout)
                .connect_lazy(&config.database.url())?;
            pools.insert(project.clone(), ProjectPool { pool, op_timeout });
        }
        Ok(SqlRouteStore { pools })
    }
}

#[async_trait]
impl RouteStore for SqlRouteStore {
    fn projects(&self) -> Vec<String> {
        self.pools.keys().cloned().collect()
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut degraded: Option<StoreError> = None;

        for (project, entry) in &self.pools {
            let query = sqlx::query_scalar::<_, String>(
                "SELECT route_key FROM route_keys WHERE route_key = $1",
            )
            .bind(key)
            .fetch_optional(&entry.pool);

            match tokio::time::timeout(entry.op_timeout, query).await {
                Ok(Ok(Some(_))) => return Ok(Some(project.clone())),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(project = %project, error = %e, "project store lookup failed");
                    degraded = Some(e.into());
                }
                Err(_) => {
                    tracing::warn!(project = %project, "project store lookup timed out");
                    degraded = Some(StoreError::Unavailable("lookup timed out".into()));
                }
            }
        }

        match degraded {
            // A failed project store means absence is not conclusive.
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    async fn project_keys(
        &self,
        project: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<KeyPage, StoreError> {
        let entry = self
            .pools
            .get(project)
            .ok_or_else(|| StoreError::UnknownProject(project.to_string()))?;

        let fetch = async {
            match after {
                Some(cursor) => {
                    sqlx::query_scalar(
                        "SELECT route_key FROM route_keys WHERE route_key > $1 \
                         ORDER BY route_key LIMIT $2",
                    )
                    .bind(cursor)
                    .bind(i64::from(limit))
                    .fetch_all(&entry.pool)
                    .await
                }
                None => {
                    sqlx::query_scalar("SELECT route_key FROM route_keys ORDER BY route_key LIMIT $1")
                        .bind(i64::from(limit))
                        .fetch_all(&entry.pool)
                        .await
                }
            }
        };

        let keys: Vec<String> = tokio::time::timeout(entry.op_timeout, fetch)
            .await
            .map_err(|_| StoreError::Unavailable("page fetch timed out".into()))??;

        let next = if keys.len() as u32 == limit {
            keys.last().cloned()
        } else {
            None
        };

        Ok(KeyPage { keys, next })
    }
}

/// Store double backed by plain maps, for tests and local development:
/// per-project key sets with switches to simulate outages.
#[derive(Default)]
pub struct InMemoryRouteStore {
    routes: Mutex<HashMap<String, Vec<String>>>,
    unavailable: AtomicBool,
    failing_project: Mutex<Option<String>>,
}

impl InMemoryRouteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `key` to `project`. Keys are kept sorted so pagination is
    /// deterministic.
    pub fn insert(&self, project: &str, key: &str) {
        let mut routes = self.routes.lock();
        let keys = routes.entry(project.to_string()).or_default();
        if let Err(pos) = keys.binary_search_by(|k| k.as_str().cmp(key)) {
            keys.insert(pos, key.to_string());
        }
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Make calls scoped to one project fail, leaving the others intact.
    pub fn fail_project(&self, project: Option<&str>) {
        *self.failing_project.lock() = project.map(String::from);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("store offline".into()));
        }
        Ok(())
    }

    fn check_project(&self, project: &str) -> Result<(), StoreError> {
        if self.failing_project.lock().as_deref() == Some(project) {
            return Err(StoreError::Unavailable(format!(
                "store for {project} offline"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl RouteStore for InMemoryRouteStore {
    fn projects(&self) -> Vec<String> {
        let mut projects: Vec<String> = self.routes.lock().keys().cloned().collect();
        projects.sort();
        projects
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let routes = self.routes.lock();
        let mut degraded = None;
        for (project, keys) in routes.iter() {
            if let Err(err) = self.check_project(project) {
                degraded = Some(err);
                continue;
            }
            if keys.binary_search_by(|k| k.as_str().cmp(key)).is_ok() {
                return Ok(Some(project.clone()));
            }
        }
        match degraded {
            Some(err) => Err(err),
            None => Ok(None),
        }
    }

    async fn project_keys(
        &self,
        project: &str,
        after: Option<&str>,
        limit: u32,
    ) -> Result<KeyPage, StoreError> {
        self.check()?;
        self.check_project(project)?;

        let routes = self.routes.lock();
        let keys = routes.get(project).cloned().unwrap_or_default();
        let start = match after {
            Some(cursor) => keys.partition_point(|k| k.as_str() <= cursor),
            None => 0,
        };
        let page: Vec<String> = keys[start..].iter().take(limit as usize).cloned().collect();
        let next = if page.len() as u32 == limit {
            page.last().cloned()
        } else {
            None
        };

        Ok(KeyPage { keys: page, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use url::Url;

    fn unreachable_projects() -> HashMap<String, ProjectConfig> {
        HashMap::from([(
            "acme".to_string(),
            ProjectConfig {
                backends: vec![Url::parse("http://10.0.0.1:8080").unwrap()],
                database: DatabaseConfig {
                    host: "127.0.0.1".into(),
                    port: 1,
                    user: "router".into(),
                    password: "".into(),
                    dbname: "acme".into(),
                    ssl_mode: "disable".into(),
                    max_connections: 2,
                    timeout_ms: 200,
                },
            },
        )])
    }

    #[tokio::test]
    async fn test_sql_store_unreachable_is_unavailable() {
        // Pools connect lazily, so construction succeeds and the failure
        // surfaces on the first query.
        let store = SqlRouteStore::from_projects(&unreachable_projects()).unwrap();
        assert_eq!(store.projects(), vec!["acme".to_string()]);

        assert!(matches!(
            store.lookup("h1").await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(matches!(
            store.project_keys("acme", None, 10).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_sql_store_unknown_project() {
        let store = SqlRouteStore::from_projects(&unreachable_projects()).unwrap();
        assert!(matches!(
            store.project_keys("ghost", None, 10).await,
            Err(StoreError::UnknownProject(_))
        ));
    }

    #[tokio::test]
    async fn test_in_memory_lookup() {
        let store = InMemoryRouteStore::new();
        store.insert("acme", "h1");
        store.insert("beta", "h2");

        assert_eq!(store.lookup("h1").await.unwrap(), Some("acme".to_string()));
        assert_eq!(store.lookup("h2").await.unwrap(), Some("beta".to_string()));
        assert_eq!(store.lookup("h3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_in_memory_pagination() {
        let store = InMemoryRouteStore::new();
        for i in 0..5 {
            store.insert("acme", &format!("h{i}"));
        }

        let page = store.project_keys("acme", None, 2).await.unwrap();
        assert_eq!(page.keys, vec!["h0", "h1"]);
        assert_eq!(page.next.as_deref(), Some("h1"));

        let page = store.project_keys("acme", Some("h1"), 2).await.unwrap();
        assert_eq!(page.keys, vec!["h2", "h3"]);

        let page = store.project_keys("acme", Some("h3"), 2).await.unwrap();
        assert_eq!(page.keys, vec!["h4"]);
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn test_in_memory_failure_is_not_a_conclusive_miss() {
        let store = InMemoryRouteStore::new();
        store.insert("acme", "h1");
        store.insert("beta", "h2");
        store.fail_project(Some("beta"));

        // Keys owned by the healthy project still resolve
        assert_eq!(store.lookup("h1").await.unwrap(), Some("acme".to_string()));
        // A miss while any project store is down is unavailable, not "absent"
        assert!(matches!(
            store.lookup("h2").await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
