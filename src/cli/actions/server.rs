use anyhow::Result;
use tracing::debug;

use crate::{
    api, auth::notify::EmailWorkerConfig, cli::telemetry, config::AdmissionConfig,
};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub config: AdmissionConfig,
    pub email: EmailWorkerConfig,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!(
        port = args.port,
        mfa = args.config.mfa_enabled(),
        single_session = args.config.single_session(),
        "starting admission server"
    );

    let result = api::new(args.port, args.dsn, args.config, args.email).await;

    telemetry::shutdown_tracer();

    result
}
