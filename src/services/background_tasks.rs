// Background task scheduler. One periodic task (§5): refresh the IdP JWKS
// at the configured cadence. Runs detached, logs and continues on failure,
// never calls back into request handlers.

use std::time::Duration;

use tracing::{error, info};

use crate::app::AppState;

pub struct BackgroundTaskManager {
    state: AppState,
}

impl BackgroundTaskManager {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }

    pub async fn start_all_tasks(&self) {
        info!("starting background tasks");
        self.spawn_idp_jwks_refresh();
    }

    fn spawn_idp_jwks_refresh(&self) {
        let idp_jwks = self.state.idp_jwks_cache.clone();
        let interval = Duration::from_secs(self.state.config.oauth_key_refresh_seconds);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                match idp_jwks.refresh().await {
                    Ok(()) => info!("idp jwks cache refreshed"),
                    Err(e) => error!(error = %e, "idp jwks refresh failed, will retry next tick"),
                }
            }
        });
    }
}

pub async fn initialize_background_tasks(state: AppState) {
    let task_manager = BackgroundTaskManager::new(state);
    task_manager.start_all_tasks().await;
}
