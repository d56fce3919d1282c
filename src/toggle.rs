use crate::cache::Fanout;
use crate::credentials::{Credentials, CredentialsError, TokenPair};
use crate::pipeline::{Pipeline, PipelineFailure, PipelineOutcome};
use crate::twitter::v1::TwitterClientV1;
use crate::{Retweets, ToggleArgs};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

/// Contents of the credentials file used by `blindfold toggle`
#[derive(Deserialize)]
pub struct AuthFile {
    consumer_key: String,
    consumer_secret: String,
    access_token_key: String,
    access_token_secret: String,
}

impl AuthFile {
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let auth = fs::read_to_string(path)
            .await
            .context("Unable to read auth file")?;
        serde_json::from_str(&auth).context("Unable to deserialize auth file")
    }

    pub fn into_credentials(self) -> Result<Credentials, CredentialsError> {
        Credentials::new(
            TokenPair::new(self.consumer_key, self.consumer_secret),
            TokenPair::new(self.access_token_key, self.access_token_secret),
        )
    }
}

pub async fn toggle(args: ToggleArgs) -> anyhow::Result<()> {
    let credentials = AuthFile::load(&args.auth).await?.into_credentials();
    // Nothing is cached when running from the terminal
    let pipeline = Pipeline::new(
        Arc::new(TwitterClientV1),
        Arc::new(Fanout::default()),
        args.concurrency,
    )?;
    let want_retweets = args.retweets == Retweets::On;
    match pipeline.run(credentials, want_retweets).await {
        PipelineOutcome::Succeeded { excluded } => {
            log::info!(
                "Done, retweets are hidden for {} accounts you follow",
                excluded.len()
            );
            Ok(())
        }
        PipelineOutcome::Failed(failure) => {
            if let PipelineFailure::BatchUpdate { failures, .. } = &failure {
                for failure in failures {
                    log::error!("{}: {}", failure.id, failure.error);
                }
            }
            Err(failure).context("Unable to update retweet settings")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn auth_file(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn loads_complete_credentials() {
        let file = auth_file(
            r#"{
                "consumer_key": "ck",
                "consumer_secret": "cs",
                "access_token_key": "ak",
                "access_token_secret": "as"
            }"#,
        );
        let credentials = AuthFile::load(file.path())
            .await
            .unwrap()
            .into_credentials()
            .unwrap();
        assert_eq!(credentials.consumer().key, "ck");
        assert_eq!(credentials.access().secret, "as");
    }

    #[tokio::test]
    async fn blank_access_token_is_rejected() {
        let file = auth_file(
            r#"{
                "consumer_key": "ck",
                "consumer_secret": "cs",
                "access_token_key": "",
                "access_token_secret": ""
            }"#,
        );
        let result = AuthFile::load(file.path()).await.unwrap().into_credentials();
        assert_eq!(result.unwrap_err(), CredentialsError::MissingAccess);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let file = auth_file(r#"{ "consumer_key": "ck" }"#);
        let err = AuthFile::load(file.path()).await.err().unwrap();
        assert_eq!(err.to_string(), "Unable to deserialize auth file");
    }
}
