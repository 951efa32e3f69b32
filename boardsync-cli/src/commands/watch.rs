//! Follow a live board session.

use anyhow::{Context, Result};
use boardsync_client::{
    ActionResult, ConnectionStatus, CredentialToken, Session, StateUpdate, TcpTransport,
};
use boardsync_types::Mutation;
use std::path::Path;

use super::load_config;

/// Run the watch command.
pub async fn run(
    endpoint: &str,
    token: Option<String>,
    config_path: Option<&Path>,
    export: Option<&Path>,
) -> Result<()> {
    let config = load_config(config_path)?;
    let session =
        Session::start(config, TcpTransport::new()).context("Failed to start session")?;

    let token = token
        .map(CredentialToken::new)
        .unwrap_or_else(CredentialToken::anonymous);
    session.connect(endpoint, token)?;

    let mut connection = session.observe_connection();
    let mut updates = session.observe_state();

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            result = &mut interrupted => {
                result.context("Failed to listen for Ctrl-C")?;
                tracing::info!("Interrupted, closing session");
                break;
            }
            Some(status) = connection.next() => {
                tracing::info!("Connection: {}", describe_status(&status));
            }
            Some(update) = updates.next_update() => log_update(&update),
            else => break,
        }
    }

    let snapshot = session.snapshot();
    session.close().await;

    if let Some(path) = export {
        let json = snapshot.export_json().context("Failed to serialize board")?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(
            entities = snapshot.entities().len(),
            "Board exported to {}",
            path.display()
        );
    }

    Ok(())
}

fn log_update(update: &StateUpdate) {
    match update {
        StateUpdate::Resynced(snapshot) => tracing::info!(
            sequence = snapshot.sequence().value(),
            entities = snapshot.entities().len(),
            "Board loaded"
        ),
        StateUpdate::Applied { sequence, mutation } => tracing::info!(
            sequence = sequence.value(),
            "{}",
            describe_mutation(mutation)
        ),
        StateUpdate::Resolved(outcome) => match &outcome.result {
            ActionResult::Confirmed => tracing::info!(
                correlation_id = outcome.correlation_id.value(),
                "Action confirmed"
            ),
            ActionResult::Rejected(reason) | ActionResult::Invalidated(reason) => tracing::warn!(
                correlation_id = outcome.correlation_id.value(),
                "Action not applied: {}",
                reason
            ),
        },
        StateUpdate::PendingChanged(pending) => {
            tracing::debug!(pending = pending.len(), "Pending actions changed")
        }
    }
}

fn describe_status(status: &ConnectionStatus) -> String {
    if status.syncing {
        format!("{} (syncing)", status.state)
    } else {
        status.state.to_string()
    }
}

fn describe_mutation(mutation: &Mutation) -> String {
    let (verb, count) = match mutation {
        Mutation::Add(entities) => ("added", entities.len()),
        Mutation::Delete(ids) => ("deleted", ids.len()),
        Mutation::Modify(entities) => ("modified", entities.len()),
    };
    let noun = if count == 1 { "entity" } else { "entities" };
    format!("{} {} {}", verb, count, noun)
}
