//! Flipping retweet visibility for everyone a user follows.
//!
//! One run goes `Idle -> FetchingIds -> Updating -> Confirming` and ends in
//! `Succeeded` or `Failed`. Each call to [`PipelineRun::advance`] performs one
//! transition, so a run can be driven and inspected a state at a time.
//!
//! Updates are attempted for every followed account even when some of them
//! fail. Any failed update makes the whole run `Failed`, but the accounts that
//! did succeed have already changed on Twitter; the failure lists exactly
//! which ids were not updated.

use crate::cache::CacheInvalidator;
use crate::credentials::{Credentials, CredentialsError};
use crate::dispatch::{dispatch, DispatchError};
use crate::twitter::{GraphClient, RemoteError, UserId};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_CONCURRENCY: usize = 25;

/// Cache tag covering anything derived from the user's friend list
pub const FRIENDS_TAG: &str = "friends";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    FetchIds,
    BatchUpdate,
    FetchConfirmation,
}

/// One account whose relationship could not be updated
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: UserId,
    pub error: RemoteError,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PipelineFailure {
    #[error("Not signed in: {0}")]
    Unauthenticated(#[from] CredentialsError),
    #[error("Problem getting friends/ids")]
    FetchIds(#[source] RemoteError),
    #[error("Problem updating friendships ({} of {} failed)", .failures.len(), .attempted)]
    BatchUpdate {
        attempted: usize,
        failures: Vec<ItemFailure>,
    },
    #[error("Problem dispatching friendship updates")]
    Dispatch(#[from] DispatchError),
    #[error("Problem getting `no_retweets` ids")]
    FetchConfirmation(#[source] RemoteError),
}

impl PipelineFailure {
    /// The stage that failed, `None` if the run never got past `Idle`
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineFailure::Unauthenticated(_) => None,
            PipelineFailure::FetchIds(_) => Some(Stage::FetchIds),
            PipelineFailure::BatchUpdate { .. } | PipelineFailure::Dispatch(_) => {
                Some(Stage::BatchUpdate)
            }
            PipelineFailure::FetchConfirmation(_) => Some(Stage::FetchConfirmation),
        }
    }

    /// Structured cause, suitable for handing back to the browser
    pub fn details(&self) -> Value {
        match self {
            PipelineFailure::Unauthenticated(e) => json!({ "message": e.to_string() }),
            PipelineFailure::FetchIds(e) | PipelineFailure::FetchConfirmation(e) => {
                json!({ "stage": self.stage(), "cause": e })
            }
            PipelineFailure::BatchUpdate {
                attempted,
                failures,
            } => json!({
                "stage": self.stage(),
                "attempted": attempted,
                "failed": failures,
            }),
            PipelineFailure::Dispatch(e) => {
                json!({ "stage": self.stage(), "cause": e.to_string() })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Every update applied; carries the accounts whose retweets are now hidden
    Succeeded { excluded: Vec<UserId> },
    Failed(PipelineFailure),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    FetchingIds,
    Updating {
        ids: Vec<UserId>,
    },
    Confirming {
        attempted: usize,
        failures: Vec<ItemFailure>,
    },
    Succeeded {
        excluded: Vec<UserId>,
    },
    Failed(PipelineFailure),
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineState::Succeeded { .. } | PipelineState::Failed(_)
        )
    }
}

/// Long-lived collaborators shared by every run
pub struct Pipeline {
    client: Arc<dyn GraphClient>,
    invalidator: Arc<dyn CacheInvalidator>,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        client: Arc<dyn GraphClient>,
        invalidator: Arc<dyn CacheInvalidator>,
        concurrency: usize,
    ) -> Result<Self, DispatchError> {
        if concurrency == 0 {
            return Err(DispatchError::InvalidLimit(0));
        }
        Ok(Self {
            client,
            invalidator,
            concurrency,
        })
    }

    pub fn start(
        &self,
        credentials: Result<Credentials, CredentialsError>,
        want_retweets: bool,
    ) -> PipelineRun<'_> {
        PipelineRun {
            pipeline: self,
            credentials,
            want_retweets,
            state: PipelineState::Idle,
        }
    }

    pub async fn run(
        &self,
        credentials: Result<Credentials, CredentialsError>,
        want_retweets: bool,
    ) -> PipelineOutcome {
        self.start(credentials, want_retweets).finish().await
    }

    async fn fetch_ids(&self, credentials: &Credentials) -> PipelineState {
        match self.client.list_followed_ids(credentials).await {
            Ok(ids) => {
                log::info!("Updating {} followed accounts", ids.len());
                PipelineState::Updating { ids }
            }
            Err(e) => {
                log::warn!("Unable to fetch followed ids: {}", e);
                PipelineState::Failed(PipelineFailure::FetchIds(e))
            }
        }
    }

    async fn update(
        &self,
        credentials: &Credentials,
        ids: Vec<UserId>,
        want_retweets: bool,
    ) -> PipelineState {
        let attempted = ids.len();
        let client = &self.client;
        let results = dispatch(ids, self.concurrency, |id| async move {
            let result = client
                .update_relationship(credentials, &id, want_retweets)
                .await;
            result.map_err(|error| ItemFailure { id, error })
        })
        .await;
        let failures = match results {
            Ok(results) => results
                .into_iter()
                .filter_map(Result::err)
                .collect::<Vec<_>>(),
            Err(e) => return PipelineState::Failed(e.into()),
        };
        for failure in &failures {
            log::warn!("Unable to update {}: {}", failure.id, failure.error);
        }
        PipelineState::Confirming {
            attempted,
            failures,
        }
    }

    async fn confirm(
        &self,
        credentials: &Credentials,
        attempted: usize,
        failures: Vec<ItemFailure>,
    ) -> PipelineState {
        let confirmation = self.client.list_excluded_ids(credentials).await;
        if !failures.is_empty() {
            if let Err(e) = &confirmation {
                log::warn!("Unable to fetch no_retweets ids after failed updates: {}", e);
            }
            return PipelineState::Failed(PipelineFailure::BatchUpdate {
                attempted,
                failures,
            });
        }
        match confirmation {
            Ok(excluded) => {
                self.invalidator.invalidate(FRIENDS_TAG);
                log::info!(
                    "Updated {} accounts, {} now have retweets hidden",
                    attempted,
                    excluded.len()
                );
                PipelineState::Succeeded { excluded }
            }
            Err(e) => PipelineState::Failed(PipelineFailure::FetchConfirmation(e)),
        }
    }
}

/// A single invocation; discarded once it reaches a terminal state
pub struct PipelineRun<'a> {
    pipeline: &'a Pipeline,
    credentials: Result<Credentials, CredentialsError>,
    want_retweets: bool,
    state: PipelineState,
}

impl PipelineRun<'_> {
    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    /// Performs one transition. Terminal states stay where they are.
    pub async fn advance(&mut self) -> &PipelineState {
        let state = std::mem::replace(&mut self.state, PipelineState::Idle);
        log::debug!("Pipeline leaving {:?}", StateName(&state));
        self.state = match (state, &self.credentials) {
            (state, _) if state.is_terminal() => state,
            (_, Err(e)) => PipelineState::Failed(PipelineFailure::Unauthenticated(*e)),
            (PipelineState::Idle, Ok(_)) => PipelineState::FetchingIds,
            (PipelineState::FetchingIds, Ok(credentials)) => {
                self.pipeline.fetch_ids(credentials).await
            }
            (PipelineState::Updating { ids }, Ok(credentials)) => {
                self.pipeline
                    .update(credentials, ids, self.want_retweets)
                    .await
            }
            (
                PipelineState::Confirming {
                    attempted,
                    failures,
                },
                Ok(credentials),
            ) => {
                self.pipeline
                    .confirm(credentials, attempted, failures)
                    .await
            }
            (state, Ok(_)) => state,
        };
        &self.state
    }

    /// Drives the run to completion
    pub async fn finish(mut self) -> PipelineOutcome {
        loop {
            match std::mem::replace(&mut self.state, PipelineState::Idle) {
                PipelineState::Succeeded { excluded } => {
                    return PipelineOutcome::Succeeded { excluded }
                }
                PipelineState::Failed(failure) => return PipelineOutcome::Failed(failure),
                state => {
                    self.state = state;
                    self.advance().await;
                }
            }
        }
    }
}

// Keeps id lists out of debug logs
struct StateName<'a>(&'a PipelineState);

impl std::fmt::Debug for StateName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.0 {
            PipelineState::Idle => "Idle",
            PipelineState::FetchingIds => "FetchingIds",
            PipelineState::Updating { .. } => "Updating",
            PipelineState::Confirming { .. } => "Confirming",
            PipelineState::Succeeded { .. } => "Succeeded",
            PipelineState::Failed(_) => "Failed",
        };
        f.write_str(name)
    }
}
