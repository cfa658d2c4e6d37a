pub mod purge;
pub mod records;
pub mod serve;
pub mod subject;

// Internal "interpreter" for `Action`.
// We keep the match in a separate module so `mod.rs` stays small as more actions are added.
mod run;

use crate::intruder::{config::IntruderConfig, IntruderHooks, IntruderManager};
use crate::storage::StorageSettings;

/// Engine configuration shared by every action.
#[derive(Debug, Clone)]
pub struct EngineArgs {
    pub config: IntruderConfig,
    pub storage: StorageSettings,
}

impl EngineArgs {
    /// Open the engine with the default log-based hooks.
    pub async fn open(&self) -> IntruderManager {
        IntruderManager::open(self.config.clone(), &self.storage, IntruderHooks::default()).await
    }
}

#[derive(Debug)]
pub enum Action {
    Serve(serve::Args),
    Check(subject::Args),
    Mark(subject::Args),
    Clear(subject::Args),
    Records(records::Args),
    Purge(purge::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}
