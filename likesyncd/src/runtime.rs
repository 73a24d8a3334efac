use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::acquire::YtDlpAcquirer;
use crate::catalog::CatalogContext;
use crate::config::SyncConfig;
use crate::sync::coordinator::DownloadCoordinator;
use crate::sync::index::LocalIndex;
use crate::sync::session::{SessionError, SessionResult, SyncService};
use crate::sync::status::{StatusKind, StatusStream, status_channel};
use crate::tagger::Id3Tagger;

pub type LikesyncService = SyncService<CatalogContext, YtDlpAcquirer, Id3Tagger>;

pub struct SyncRuntime {
    config: SyncConfig,
    service: LikesyncService,
    status: StatusStream,
}

impl SyncRuntime {
    pub async fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        tokio::fs::create_dir_all(&config.library_dir)
            .await
            .with_context(|| format!("failed to create library at {:?}", config.library_dir))?;
        let index = LocalIndex::open(&config.db_path)
            .await
            .with_context(|| format!("failed to open index at {:?}", config.db_path))?;
        let catalog = CatalogContext::new(config.api_base.clone(), config.token.clone())
            .context("invalid catalog configuration")?;
        let acquirer = YtDlpAcquirer::new(config.ytdlp_bin.clone(), config.audio_quality.clone());

        let (reporter, status) = status_channel();
        let coordinator = DownloadCoordinator::new(
            Arc::new(acquirer),
            Arc::new(Id3Tagger::new()),
            index.clone(),
            config.coordinator_config(),
        )
        .with_reporter(reporter);
        let service = SyncService::new(catalog, index, coordinator, config.sync_options());

        Ok(Self {
            config,
            service,
            status,
        })
    }

    /// One sync session followed by up to `retry_rounds` retries of whatever
    /// failed. Returns the merged outcome.
    pub async fn sync(self, cancel: &CancellationToken) -> anyhow::Result<SessionResult> {
        let Self {
            config,
            service,
            mut status,
        } = self;
        tracing::info!(
            library = %config.library_dir.display(),
            index = %config.db_path.display(),
            concurrency = config.concurrency,
            "starting sync"
        );
        match service.catalog().current_user().await {
            Ok(user) => tracing::info!(
                user = %user.display_name.as_deref().unwrap_or(user.id.as_str()),
                "catalog credentials accepted"
            ),
            Err(err) if err.is_auth() => return Err(SessionError::from(err).into()),
            Err(err) => tracing::warn!(%err, "could not verify catalog credentials"),
        }
        let progress = tokio::spawn(async move {
            while let Some(event) = status.recv().await {
                match event.kind {
                    StatusKind::Failed => {
                        tracing::warn!(id = %event.id, "{}", event.message)
                    }
                    _ => tracing::info!(id = %event.id, kind = ?event.kind, "{}", event.message),
                }
            }
        });

        let outcome = run_rounds(&service, config.retry_rounds, cancel).await;
        // Closing the last reporter ends the progress task.
        drop(service);
        let _ = progress.await;
        outcome
    }

    pub async fn list(&self) -> anyhow::Result<()> {
        let records = self
            .service
            .index()
            .list_all()
            .await
            .context("failed to read index")?;
        for record in &records {
            let path = record
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string());
            println!("{}\t{} - {}\t{}", record.id, record.title, record.artist, path);
        }
        eprintln!("{} tracks indexed", records.len());
        Ok(())
    }
}

async fn run_rounds(
    service: &LikesyncService,
    retry_rounds: u64,
    cancel: &CancellationToken,
) -> anyhow::Result<SessionResult> {
    let mut summary = service.start_sync(cancel).await?;
    for round in 1..=retry_rounds {
        let failed = summary.failed_ids();
        if failed.is_empty() || cancel.is_cancelled() {
            break;
        }
        tracing::info!(round, failed = failed.len(), "retrying failed tracks");
        let retried = service.retry_failed(&failed, cancel).await?;
        summary.results.extend(retried.results);
    }
    Ok(summary)
}

pub fn print_summary(result: &SessionResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!(
        "remote: {}, already present: {}, acquired: {}, failed: {}, removed: {}",
        result.remote_total,
        result.already_present,
        result.completed(),
        result.failed_ids().len(),
        result.removed
    );
    for (id, status) in &result.results {
        if status.is_failed() {
            println!("  {id}: {}", status.message());
        }
    }
    Ok(())
}
