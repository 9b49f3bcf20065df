//! Publication of cycle artifacts to the remote store.
//!
//! One publish attempt runs a fixed sequence against a [`RemoteStore`]:
//!
//! 1. fetch the remote branch tip and point the local branch at it
//! 2. snapshot the artifact files, hard-reset to the tip, restore the snapshot
//! 3. stage the artifacts and commit if anything changed
//! 4. rebase onto whatever landed remotely meanwhile, then force-push
//!
//! History is taken from the remote; artifact contents are taken from the
//! working tree. Files are only ever added or updated, never deleted.

use std::path::PathBuf;

use lockbox_core::{
    Credential, CycleResult, FailureKind, PublishConfig, PublishResult, SyncStep,
};

use crate::error::{io_err, SyncError};
use crate::git::{authenticated_url, RemoteStore};
use crate::message::CommitMessage;

/// Anything that can publish the artifacts of a finished cycle.
pub trait Publisher: Send + Sync {
    /// Never fails; every failure is reported in the returned result.
    fn publish(&self, cycle: &CycleResult) -> PublishResult;
}

/// A [`SyncError`] tagged with the step that produced it.
#[derive(Debug)]
struct StepFailure {
    step: SyncStep,
    source: SyncError,
}

trait AtStep<T> {
    fn at(self, step: SyncStep) -> Result<T, StepFailure>;
}

impl<T> AtStep<T> for Result<T, SyncError> {
    fn at(self, step: SyncStep) -> Result<T, StepFailure> {
        self.map_err(|source| StepFailure { step, source })
    }
}

/// Artifact bytes captured before the hard reset.
struct Snapshot {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl Snapshot {
    fn capture<S: RemoteStore>(store: &S, globs: &[String]) -> Result<Self, SyncError> {
        let mut files = Vec::new();
        for rel in store.list_artifacts(globs)? {
            let abs = store.workdir().join(&rel);
            let bytes = std::fs::read(&abs).map_err(|e| io_err(&abs, e))?;
            files.push((rel, bytes));
        }
        Ok(Self { files })
    }

    fn restore<S: RemoteStore>(&self, store: &S) -> Result<(), SyncError> {
        for (rel, bytes) in &self.files {
            let abs = store.workdir().join(rel);
            if let Some(dir) = abs.parent() {
                std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            }
            std::fs::write(&abs, bytes).map_err(|e| io_err(&abs, e))?;
        }
        Ok(())
    }

    fn paths(&self) -> Vec<PathBuf> {
        self.files.iter().map(|(rel, _)| rel.clone()).collect()
    }
}

/// Sequences a publish attempt over a [`RemoteStore`].
pub struct Reconciler<S> {
    store: S,
    config: PublishConfig,
    credential: Option<Credential>,
    message: CommitMessage,
}

impl<S: RemoteStore> Reconciler<S> {
    /// Fails only if the commit message template is invalid.
    pub fn new(
        store: S,
        config: PublishConfig,
        credential: Option<Credential>,
    ) -> Result<Self, SyncError> {
        let message = CommitMessage::new(&config.commit_template)?;
        Ok(Self {
            store,
            config,
            credential,
            message,
        })
    }

    /// Publish the artifacts of `cycle`.
    ///
    /// Without a credential or a remote URL this performs no repository
    /// operation at all and returns [`PublishResult::Skipped`].
    pub fn publish_cycle(&self, cycle: &CycleResult) -> PublishResult {
        let Some(credential) = &self.credential else {
            tracing::warn!("no push credential configured; skipping publication");
            return PublishResult::Skipped {
                reason: "no push credential configured".to_string(),
            };
        };
        let Some(remote) = &self.config.remote_url else {
            tracing::warn!("no remote URL configured; skipping publication");
            return PublishResult::Skipped {
                reason: "no remote URL configured".to_string(),
            };
        };

        let url = authenticated_url(remote, credential.expose());
        match self.reconcile(&url, cycle) {
            Ok((head, committed)) => {
                tracing::info!(head = %head, committed, branch = %self.config.branch, "artifacts published");
                PublishResult::Success { head, committed }
            }
            Err(StepFailure { step, source }) => {
                let kind = source.kind();
                tracing::error!(step = %step, kind = %kind, error = %source, "publication failed");
                PublishResult::Failed {
                    step,
                    kind,
                    reason: source.to_string(),
                }
            }
        }
    }

    fn reconcile(&self, url: &str, cycle: &CycleResult) -> Result<(String, bool), StepFailure> {
        let store = &self.store;
        let branch = self.config.branch.as_str();

        let message = self.message.render(cycle).at(SyncStep::Commit)?;

        store.ensure_repository().at(SyncStep::Prepare)?;

        let tip = store
            .fetch(url, branch, self.config.fetch_depth)
            .at(SyncStep::Fetch)?;
        tracing::debug!(tip = %tip, branch, "fetched remote tip");

        if !store.branch_exists(branch).at(SyncStep::SelectBranch)? {
            store.create_branch(branch, &tip).at(SyncStep::SelectBranch)?;
        }
        store.switch_branch(branch).at(SyncStep::SelectBranch)?;

        let snapshot = Snapshot::capture(store, &self.config.artifact_globs).at(SyncStep::Reset)?;
        store.reset_hard(&tip).at(SyncStep::Reset)?;
        snapshot.restore(store).at(SyncStep::Reset)?;

        let paths = snapshot.paths();
        tracing::debug!(artifacts = paths.len(), "staging artifacts");
        store.stage(&paths).at(SyncStep::Stage)?;

        let committed = store.has_staged_changes().at(SyncStep::Commit)?;
        if committed {
            store.commit(&message).at(SyncStep::Commit)?;
        } else {
            tracing::info!("artifacts unchanged since remote tip; nothing to commit");
        }

        store.pull_rebase(url, branch).at(SyncStep::Rebase)?;
        store.force_push(url, branch).at(SyncStep::Push)?;
        let head = store.head().at(SyncStep::Push)?;
        Ok((head, committed))
    }
}

impl<S: RemoteStore + Send + Sync> Publisher for Reconciler<S> {
    fn publish(&self, cycle: &CycleResult) -> PublishResult {
        self.publish_cycle(cycle)
    }
}

/// Whether a failure is worth surfacing as a hint about configuration.
pub fn is_configuration_failure(kind: FailureKind) -> bool {
    matches!(kind, FailureKind::Authentication | FailureKind::MissingRemoteRef)
}
