use std::sync::Arc;
use std::time::Instant;

use crate::auth::TokenVerifier;
use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::services::catalog::BackupCatalog;
use crate::services::helpers::HelperService;
use crate::services::restore::RestoreExecutor;
use crate::services::snapshot::SnapshotWriter;
use crate::store::DocumentStore;
use crate::utils::clock::Clock;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub verifier: Arc<TokenVerifier>,
    pub snapshots: Arc<SnapshotWriter>,
    pub catalog: Arc<BackupCatalog>,
    pub restore: RestoreExecutor,
    pub helpers: HelperService,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        verifier: Arc<TokenVerifier>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let catalog = Arc::new(
            BackupCatalog::new(&config.backup_dir, clock.clone()).with_metrics(metrics.clone()),
        );
        Self {
            snapshots: Arc::new(
                SnapshotWriter::new(store.clone(), &config.backup_dir, clock.clone())
                    .with_metrics(metrics.clone()),
            ),
            restore: RestoreExecutor::new(store.clone(), catalog.clone())
                .with_metrics(metrics.clone()),
            helpers: HelperService::new(store.clone(), clock.clone()),
            catalog,
            config,
            store,
            verifier,
            clock,
            metrics,
            started_at: Instant::now(),
        }
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::auth::verifier::testing::{verifier, AUDIENCE};
    use crate::config::AuthConfig;
    use crate::store::testing::system_store;
    use crate::utils::clock::SystemClock;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    pub struct TestState {
        pub state: Arc<AppState>,
        _db: Option<TempDir>,
        backups: TempDir,
    }

    impl TestState {
        pub fn backup_dir(&self) -> &Path {
            self.backups.path()
        }
    }

    pub fn test_config(backup_dir: PathBuf) -> AppConfig {
        AppConfig {
            port: 0,
            document_store_path: PathBuf::from(":memory:"),
            backup_dir,
            retention_days: 30,
            automated_backups: true,
            auth: AuthConfig {
                tenant_id: "tenant-1".into(),
                client_id: AUDIENCE.into(),
                authority_host: "https://login.microsoftonline.com".into(),
            },
            frontend_url: "http://localhost:3000".into(),
            log_level: "info".into(),
        }
    }

    /// State over a temporary store and backup directory, with token
    /// verification against the fixture key set.
    pub fn test_state(configure: impl FnOnce(&mut AppConfig)) -> TestState {
        let (db, store) = system_store();
        let mut fixture = test_state_with_store(Arc::new(store), configure);
        fixture._db = Some(db);
        fixture
    }

    /// Like [`test_state`], over a caller-supplied store.
    pub fn test_state_with_store(
        store: Arc<dyn DocumentStore>,
        configure: impl FnOnce(&mut AppConfig),
    ) -> TestState {
        let backups = TempDir::new().unwrap();
        let mut config = test_config(backups.path().to_path_buf());
        configure(&mut config);
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let state = AppState::new(
            config,
            store,
            Arc::new(verifier(clock.clone())),
            clock,
            Arc::new(Metrics::new().unwrap()),
        );
        TestState {
            state: Arc::new(state),
            _db: None,
            backups,
        }
    }
}
