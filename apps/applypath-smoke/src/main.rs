//! Headless smoke harness for the Applypath resilience layer.
//!
//! Scripts a full session against the stub document store: restore a
//! persisted session, defer a read until backend readiness, lose
//! connectivity mid-session, and watch the replay queue reconcile.

use std::{sync::Arc, time::Duration};

use resilience_core::{
    ConnectivityState, Dispatcher, HostSignals, MutationOutcome, ProfileKind, SessionState,
};
use session_platform::{SessionSnapshot, load_snapshot, save_snapshot};
use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    config::SmokeConfig,
    stub::{ProfileDocument, StubDocumentStore},
};

mod config;
mod logging;
mod stub;

const SMOKE_SUBJECT: &str = "u-alice";

#[tokio::main]
async fn main() {
    logging::init();

    let config = match SmokeConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };
    info!(endpoint = %config.endpoint, "starting applypath smoke harness");

    let store = StubDocumentStore::new();
    store.upsert_profile(SMOKE_SUBJECT, "Alice Zhang", "student");

    let dispatcher = Arc::new(Dispatcher::new(config.dispatcher_config()).with_poison_handler(
        |poison| {
            warn!(
                entry_id = poison.entry_id,
                attempts = poison.attempts,
                code = %poison.last_error.code,
                "mutation exhausted its replay budget"
            );
        },
    ));
    let signals = HostSignals::new();
    let driver = dispatcher.attach_signals(&signals);

    dispatcher.subscribe_sessions(|state| {
        info!(
            authenticated = state.authenticated,
            subject = state.subject_id.as_deref().unwrap_or("-"),
            "session state changed"
        );
    });

    // Restore a persisted session, if any, before the backend is ready.
    let snapshot_path = config.snapshot_path();
    let restored = match load_snapshot(&snapshot_path) {
        Ok(Some(snapshot)) if snapshot.resume => match snapshot.profile_kind.parse::<ProfileKind>()
        {
            Ok(kind) => {
                info!(subject = %snapshot.subject_id, "restoring persisted session");
                let state = SessionState::signed_in(snapshot.subject_id.clone(), kind);
                dispatcher.publish_session(&state);
                Some(state)
            }
            Err(err) => {
                warn!(error = %err, "ignoring snapshot with unknown profile kind");
                None
            }
        },
        Ok(_) => {
            info!("no resumable session snapshot");
            None
        }
        Err(err) => {
            warn!(error = %err, "failed loading session snapshot; ignoring");
            None
        }
    };

    // Submit a profile read before readiness; it must park behind the gate.
    let dispatcher_for_read = Arc::clone(&dispatcher);
    let store_for_read = store.clone();
    let read_policy = config.read_policy();
    let deferred_read = tokio::spawn(async move {
        dispatcher_for_read
            .submit_read(
                move || {
                    let store = store_for_read.clone();
                    async move { store.load_profile(SMOKE_SUBJECT).await }
                },
                read_policy,
                || ProfileDocument::placeholder(SMOKE_SUBJECT),
            )
            .await
    });
    sleep(Duration::from_millis(50)).await;
    info!(
        pending = dispatcher.pending_deferred(),
        "operations parked before readiness"
    );

    // Backend comes up; the gate opens and the parked read dispatches.
    signals.notify_ready();
    let profile = match deferred_read.await {
        Ok(Ok(profile)) => profile,
        Ok(Err(err)) => {
            warn!(error = %err, "deferred read failed");
            std::process::exit(1);
        }
        Err(err) => {
            warn!(error = %err, "deferred read task panicked");
            std::process::exit(1);
        }
    };
    info!(subject = %profile.subject_id, name = %profile.display_name, "profile loaded");

    // Backend auth listener resolves to the same identity the snapshot
    // restored; the duplicate emission is suppressed.
    let confirmed = SessionState::signed_in(SMOKE_SUBJECT, ProfileKind::Student);
    let emitted = dispatcher.publish_session(&confirmed);
    info!(
        emitted,
        was_restored = restored.is_some(),
        "backend confirmed identity"
    );

    // Connectivity drops; a mutation fails transiently and queues.
    store.set_online(false);
    signals.set_connectivity(ConnectivityState::Offline);
    let store_for_write = store.clone();
    let outcome = dispatcher
        .submit_mutation(move || {
            let store = store_for_write.clone();
            async move {
                store
                    .save_answer(SMOKE_SUBJECT, "essay-draft", "My first semester...")
                    .await
            }
        })
        .await;
    match outcome {
        Ok(MutationOutcome::Queued) => {
            info!(
                queued = dispatcher.queued_mutations(),
                "mutation queued while offline"
            );
        }
        Ok(MutationOutcome::Committed(())) => info!("mutation committed directly"),
        Err(err) => {
            warn!(error = %err, "mutation failed");
            std::process::exit(1);
        }
    }

    // Connectivity returns; the driver drains the replay queue.
    store.set_online(true);
    signals.set_connectivity(ConnectivityState::Online);
    sleep(Duration::from_millis(100)).await;
    info!(
        queued = dispatcher.queued_mutations(),
        committed = store.committed_answers(),
        "replay reconciled after reconnect"
    );

    // Persist the session for the next launch.
    let snapshot = SessionSnapshot {
        endpoint: config.endpoint.clone(),
        subject_id: SMOKE_SUBJECT.to_owned(),
        profile_kind: ProfileKind::Student.as_str().to_owned(),
        resume: true,
    };
    if let Err(err) = save_snapshot(&snapshot_path, &snapshot) {
        warn!(error = %err, "failed persisting session snapshot");
    }

    drop(signals);
    let _ = driver.await;
    info!("smoke run complete");
}
