//! Harvester that runs an external scraper process per batch
//!
//! The child gets the batch as JSON on stdin, the same data in `HARVEST_*`
//! variables, and `{placeholders}` in its arguments. It prints one JSON
//! record per stdout line and exits 0 on success.

use crate::config::SourceConfig;
use crate::framework::{HarvestOutcome, Harvester, HarvesterFailure, RecordSink};
use async_trait::async_trait;
use harvest_common::types::{Batch, Record};
use std::collections::VecDeque;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Lines of stderr kept for the failure reason
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Clone)]
pub struct ProcessHarvester {
    source: SourceConfig,
}

impl ProcessHarvester {
    pub fn new(source: SourceConfig) -> Self {
        Self { source }
    }

    fn placeholders(&self, batch: &Batch) -> [(&'static str, String); 5] {
        let pages = batch.pages;
        [
            ("{source}", self.source.name.clone()),
            ("{batch}", batch.index.to_string()),
            ("{units}", batch.unit_ids().collect::<Vec<_>>().join(",")),
            ("{start_page}", pages.map(|p| p.start.to_string()).unwrap_or_default()),
            (
                "{end_page}",
                pages.and_then(|p| p.end).map(|e| e.to_string()).unwrap_or_default(),
            ),
        ]
    }

    /// Arguments with placeholders substituted
    pub fn render_args(&self, batch: &Batch) -> Vec<String> {
        let values = self.placeholders(batch);
        self.source
            .args
            .iter()
            .map(|arg| {
                values
                    .iter()
                    .fold(arg.clone(), |acc, (name, value)| acc.replace(name, value))
            })
            .collect()
    }

    fn command(&self, batch: &Batch) -> Command {
        let mut cmd = Command::new(&self.source.program);
        cmd.args(self.render_args(batch))
            .envs(&self.source.env)
            .env("HARVEST_SOURCE", &self.source.name)
            .env("HARVEST_BATCH_INDEX", batch.index.to_string())
            .env("HARVEST_UNITS", batch.unit_ids().collect::<Vec<_>>().join(","))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(pages) = batch.pages {
            cmd.env("HARVEST_START_PAGE", pages.start.to_string());
            if let Some(end) = pages.end {
                cmd.env("HARVEST_END_PAGE", end.to_string());
            }
        }
        if let Some(dir) = &self.source.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    async fn stop(&self, child: &mut Child, batch: &Batch) {
        if let Err(e) = child.kill().await {
            tracing::warn!(
                source = %self.source.name,
                batch = batch.index,
                error = %e,
                "Failed to kill harvester process"
            );
        }
    }
}

async fn stderr_tail<R: AsyncRead + Unpin>(stderr: R) -> String {
    let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail.into_iter().collect::<Vec<_>>().join("\n")
}

#[async_trait]
impl Harvester for ProcessHarvester {
    fn name(&self) -> &str {
        &self.source.name
    }

    async fn harvest(
        &self,
        batch: &Batch,
        sink: &RecordSink,
        abort: CancellationToken,
    ) -> Result<HarvestOutcome, HarvesterFailure> {
        let mut child = self.command(batch).spawn().map_err(|e| {
            HarvesterFailure::failed(format!("failed to spawn '{}': {e}", self.source.program))
        })?;
        tracing::debug!(
            source = %self.source.name,
            batch = batch.index,
            pid = child.id(),
            "Harvester process started"
        );

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(batch)
                .map_err(|e| HarvesterFailure::failed(format!("failed to encode batch: {e}")))?;
            // A child that never reads stdin must not block us
            tokio::spawn(async move {
                let _ = stdin.write_all(&payload).await;
            });
        }
        let stderr = child.stderr.take().map(|s| tokio::spawn(stderr_tail(s)));
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| HarvesterFailure::failed("harvester stdout not captured"))?;

        let mut lines = BufReader::new(stdout).lines();
        let mut emitted = 0u64;
        let mut line_no = 0usize;
        loop {
            let line = tokio::select! {
                _ = abort.cancelled() => {
                    self.stop(&mut child, batch).await;
                    return Err(HarvesterFailure::Aborted { emitted });
                }
                line = lines.next_line() => line,
            };
            let line = match line {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    self.stop(&mut child, batch).await;
                    return Err(HarvesterFailure::failed(format!(
                        "failed to read harvester output: {e}"
                    )));
                },
            };
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            emitted += 1;
            match serde_json::from_str::<Record>(line) {
                Ok(record) => sink.emit(record).await,
                Err(e) => sink.reject(format!("batch {} line {}: {}", batch.index, line_no, e)),
            }
        }

        let status = tokio::select! {
            _ = abort.cancelled() => {
                self.stop(&mut child, batch).await;
                return Err(HarvesterFailure::Aborted { emitted });
            }
            status = child.wait() => status
                .map_err(|e| HarvesterFailure::failed(format!("failed to wait for harvester: {e}")))?,
        };

        let tail = match stderr {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        if status.success() {
            Ok(HarvestOutcome { emitted })
        } else {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            Err(HarvesterFailure::failed(if tail.is_empty() {
                format!("exit status {code}")
            } else {
                format!("exit status {code}: {tail}")
            }))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use harvest_common::types::{PageRange, WorkUnit};

    #[test]
    fn test_render_args_substitutes_placeholders() {
        let mut source = SourceConfig::new("cntd", "scrapy");
        source.args = vec![
            "crawl".into(),
            "{source}".into(),
            "-a".into(),
            "thematic_ids={units}".into(),
            "-a".into(),
            "pages={start_page}-{end_page}".into(),
            "--batch={batch}".into(),
        ];
        let batch = Batch {
            index: 4,
            units: vec![WorkUnit::new("12"), WorkUnit::new("15")],
            pages: Some(PageRange { start: 1, end: Some(5) }),
        };

        let args = ProcessHarvester::new(source).render_args(&batch);
        assert_eq!(
            args,
            vec!["crawl", "cntd", "-a", "thematic_ids=12,15", "-a", "pages=1-5", "--batch=4"]
        );
    }

    #[test]
    fn test_missing_pages_render_empty() {
        let mut source = SourceConfig::new("lenta", "harvester");
        source.args = vec!["--end={end_page}".into()];
        let batch = Batch {
            index: 0,
            units: vec![WorkUnit::new("lenta")],
            pages: None,
        };
        assert_eq!(ProcessHarvester::new(source).render_args(&batch), vec!["--end="]);
    }
}
