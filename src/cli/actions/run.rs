use crate::cli::actions::{purge, records, serve, subject, Action};
use crate::cli::telemetry;
use anyhow::Result;

/// Execute the provided action.
// This is the single dispatch point for all CLI actions.
/// # Errors
/// Returns an error if the action fails.
pub async fn execute(action: Action) -> Result<()> {
    let result = match action {
        Action::Serve(args) => serve::execute(args).await,
        Action::Check(args) => subject::check(args).await,
        Action::Mark(args) => subject::mark(args).await,
        Action::Clear(args) => subject::clear(args).await,
        Action::Records(args) => records::execute(args).await,
        Action::Purge(args) => purge::execute(args).await,
    };
    telemetry::shutdown_tracer();
    result
}
