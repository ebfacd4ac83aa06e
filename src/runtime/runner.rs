use crate::processor::Tailer;
use crate::runtime::config::IndexerConfig;
use crate::runtime::fatal::FatalErrorHandler;
use crate::runtime::telemetry::spawn_metrics_reporter;
use anyhow::{anyhow, bail, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Coordinates the tailer lifecycle and handles OS signals for graceful shutdowns.
pub struct Runner {
    config: IndexerConfig,
    tailer: Option<Tailer>,
    task: Option<JoinHandle<(Tailer, Result<()>)>>,
    reporter: Option<JoinHandle<()>>,
    fatal: Option<FatalErrorHandler>,
    shutdown: CancellationToken,
}

impl Runner {
    /// Creates a new runner and wires a root [`CancellationToken`] that propagates
    /// to the tailer, every processor call, and the metrics reporter.
    pub fn new(config: IndexerConfig, tailer: Tailer) -> Self {
        Self {
            config,
            tailer: Some(tailer),
            task: None,
            reporter: None,
            fatal: None,
            shutdown: CancellationToken::new(),
        }
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// The tailer, while it is not running.
    pub fn tailer(&self) -> Option<&Tailer> {
        self.tailer.as_ref()
    }

    /// Spawns the tailer loop and the metrics reporter.
    pub async fn start(&mut self) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }
        let Some(mut tailer) = self.tailer.take() else {
            bail!("runner lost its tailer");
        };

        let run_token = self.shutdown.child_token();
        let fatal = FatalErrorHandler::new(self.shutdown.clone(), run_token.clone());

        self.reporter = Some(spawn_metrics_reporter(
            tailer.telemetry(),
            run_token.clone(),
            self.config.metrics_interval(),
        ));

        let task_fatal = fatal.clone();
        self.task = Some(tokio::spawn(async move {
            let result = tailer.run(run_token).await;
            if let Err(err) = &result {
                task_fatal.trigger("tailer", anyhow!("{err:#}"));
            }
            (tailer, result)
        }));
        self.fatal = Some(fatal);

        tracing::info!(node_url = %self.config.node_url(), "runner started");
        Ok(())
    }

    /// Stops the tailer and returns the error that ended the run, if any.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        self.shutdown.cancel();
        let joined = task.await;

        if let Some(reporter) = self.reporter.take() {
            if let Err(err) = reporter.await {
                tracing::warn!(error = %err, "metrics reporter task failed");
            }
        }
        self.fatal = None;
        self.shutdown = CancellationToken::new();

        match joined {
            Ok((tailer, result)) => {
                self.tailer = Some(tailer);
                result
            }
            Err(err) => Err(anyhow!("tailer task failed: {err}")),
        }
    }

    /// Runs until a Ctrl-C (SIGINT) is received, the shutdown token is cancelled
    /// elsewhere, or a fatal error ends the run.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.start().await?;
        tracing::info!("runner started; waiting for Ctrl-C (SIGINT) to initiate shutdown");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("Ctrl-C received; shutting down runner");
            }
            _ = self.shutdown.cancelled() => {
                if self.fatal.as_ref().is_some_and(FatalErrorHandler::is_triggered) {
                    tracing::error!("runner stopping after a fatal error");
                } else {
                    tracing::info!("runner shutdown token cancelled");
                }
            }
        }

        self.stop().await
    }
}
