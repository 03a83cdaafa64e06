//! Splits a multi-keyword submission into service-sized batches and runs them one after
//! another, reporting progress as a stream of [`BatchEvent`]s.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::{AnalysisMode, AnalysisOptions, KeywordAnalysis, MAX_KEYWORDS, MIN_KEYWORDS};
use crate::error::{AppError, AppResult, ErrorEnvelope};

/// Submissions up to this size go out as one batch regardless of mode.
pub const SINGLE_BATCH_MAX: usize = 5;

pub fn batch_size(mode: AnalysisMode) -> usize {
    match mode {
        AnalysisMode::Deep => 3,
        AnalysisMode::Fast => 5,
    }
}

pub fn validate_keyword_count(count: usize) -> AppResult<()> {
    if !(MIN_KEYWORDS..=MAX_KEYWORDS).contains(&count) {
        return Err(AppError::Validation(format!(
            "Please provide {MIN_KEYWORDS}-{MAX_KEYWORDS} keywords"
        )));
    }
    Ok(())
}

// key: analysis-batch-plan -> keyword groups in submission order
pub fn plan_batches(keywords: &[String], mode: AnalysisMode) -> AppResult<Vec<Vec<String>>> {
    validate_keyword_count(keywords.len())?;
    if keywords.len() <= SINGLE_BATCH_MAX {
        return Ok(vec![keywords.to_vec()]);
    }
    Ok(keywords
        .chunks(batch_size(mode))
        .map(<[String]>::to_vec)
        .collect())
}

/// What one accepted batch produced.
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub search_id: Uuid,
    pub results: Vec<KeywordAnalysis>,
    pub persisted_rows: u64,
}

/// Executes one batch end to end (quota, upstream call, persistence, usage).
#[async_trait]
pub trait BatchSubmitter: Send + Sync {
    async fn submit_batch(
        &self,
        user_id: Uuid,
        keywords: &[String],
        options: &AnalysisOptions,
        search_id: Option<Uuid>,
    ) -> AppResult<BatchOutcome>;
}

/// Progress telemetry. Indexes are 1-based.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    Started {
        index: usize,
        total: usize,
        keywords: Vec<String>,
    },
    Completed {
        index: usize,
        total: usize,
        search_id: Uuid,
        results: Vec<KeywordAnalysis>,
    },
    Failed {
        index: usize,
        total: usize,
        error: ErrorEnvelope,
    },
    Finished {
        search_id: Uuid,
        batches: usize,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub search_id: Uuid,
    pub batches: usize,
    pub results: Vec<KeywordAnalysis>,
}

/// A spawned run. Dropping `events` does not stop the run.
pub struct BatchRun {
    pub events: mpsc::Receiver<BatchEvent>,
    pub handle: JoinHandle<AppResult<RunSummary>>,
}

// key: analysis-batch-orchestrator -> strictly sequential batch runner
#[derive(Clone)]
pub struct BatchOrchestrator {
    submitter: Arc<dyn BatchSubmitter>,
}

impl BatchOrchestrator {
    pub fn new(submitter: Arc<dyn BatchSubmitter>) -> Self {
        Self { submitter }
    }

    /// Starts the run on the runtime so it keeps going if the caller goes away.
    pub fn spawn(
        &self,
        user_id: Uuid,
        batches: Vec<Vec<String>>,
        options: AnalysisOptions,
    ) -> BatchRun {
        // Two events per batch plus the final one; sends never wait on a slow reader.
        let (tx, rx) = mpsc::channel(batches.len() * 2 + 1);
        let orchestrator = self.clone();
        let handle =
            tokio::spawn(async move { orchestrator.run(user_id, batches, options, tx).await });
        BatchRun { events: rx, handle }
    }

    /// Runs every batch in order. The first failure stops the run; batches that already
    /// succeeded stay persisted. All batches share the search opened by the first one.
    pub async fn run(
        &self,
        user_id: Uuid,
        batches: Vec<Vec<String>>,
        options: AnalysisOptions,
        events: mpsc::Sender<BatchEvent>,
    ) -> AppResult<RunSummary> {
        let total = batches.len();
        let mut search_id: Option<Uuid> = None;
        let mut results = Vec::new();

        for (offset, keywords) in batches.into_iter().enumerate() {
            let index = offset + 1;
            emit(
                &events,
                BatchEvent::Started {
                    index,
                    total,
                    keywords: keywords.clone(),
                },
            )
            .await;

            match self
                .submitter
                .submit_batch(user_id, &keywords, &options, search_id)
                .await
            {
                Ok(outcome) => {
                    search_id = Some(outcome.search_id);
                    emit(
                        &events,
                        BatchEvent::Completed {
                            index,
                            total,
                            search_id: outcome.search_id,
                            results: outcome.results.clone(),
                        },
                    )
                    .await;
                    results.extend(outcome.results);
                }
                Err(err) => {
                    warn!(%user_id, index, total, kind = err.kind(), "batch failed; aborting remaining batches");
                    emit(
                        &events,
                        BatchEvent::Failed {
                            index,
                            total,
                            error: err.envelope(),
                        },
                    )
                    .await;
                    return Err(err);
                }
            }
        }

        let search_id = search_id.ok_or_else(|| AppError::Validation("no keywords to analyze".into()))?;
        info!(%user_id, %search_id, batches = total, "analysis run finished");
        emit(
            &events,
            BatchEvent::Finished {
                search_id,
                batches: total,
            },
        )
        .await;
        Ok(RunSummary {
            search_id,
            batches: total,
            results,
        })
    }
}

async fn emit(events: &mpsc::Sender<BatchEvent>, event: BatchEvent) {
    // A closed receiver only means nobody is watching.
    let _ = events.send(event).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn keywords(count: usize) -> Vec<String> {
        (0..count).map(|i| format!("kw{i}")).collect()
    }

    fn sizes(batches: &[Vec<String>]) -> Vec<usize> {
        batches.iter().map(Vec::len).collect()
    }

    #[test]
    fn seven_keywords_split_by_mode() {
        let fast = plan_batches(&keywords(7), AnalysisMode::Fast).unwrap();
        assert_eq!(sizes(&fast), vec![5, 2]);
        let deep = plan_batches(&keywords(7), AnalysisMode::Deep).unwrap();
        assert_eq!(sizes(&deep), vec![3, 3, 1]);
    }

    #[test]
    fn small_submissions_are_one_batch() {
        for count in 3..=5 {
            for mode in [AnalysisMode::Fast, AnalysisMode::Deep] {
                assert_eq!(sizes(&plan_batches(&keywords(count), mode).unwrap()), vec![count]);
            }
        }
    }

    #[test]
    fn batches_keep_submission_order() {
        let input = keywords(10);
        let batches = plan_batches(&input, AnalysisMode::Deep).unwrap();
        assert_eq!(sizes(&batches), vec![3, 3, 3, 1]);
        assert_eq!(batches.concat(), input);
    }

    #[test]
    fn out_of_range_counts_are_rejected() {
        for count in [0, 1, 2, 11, 20] {
            let err = plan_batches(&keywords(count), AnalysisMode::Fast).unwrap_err();
            assert_eq!(err.kind(), "validation");
        }
    }

    struct ScriptedSubmitter {
        fail_on: Option<usize>,
        calls: Mutex<Vec<(Vec<String>, Option<Uuid>)>>,
        search_id: Uuid,
    }

    #[async_trait]
    impl BatchSubmitter for ScriptedSubmitter {
        async fn submit_batch(
            &self,
            _user_id: Uuid,
            keywords: &[String],
            _options: &AnalysisOptions,
            search_id: Option<Uuid>,
        ) -> AppResult<BatchOutcome> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((keywords.to_vec(), search_id));
                calls.len()
            };
            if self.fail_on == Some(call) {
                return Err(AppError::Timeout);
            }
            Ok(BatchOutcome {
                search_id: search_id.unwrap_or(self.search_id),
                results: keywords.iter().map(|k| KeywordAnalysis::missing(k)).collect(),
                persisted_rows: keywords.len() as u64,
            })
        }
    }

    fn options(mode: AnalysisMode) -> AnalysisOptions {
        AnalysisOptions {
            mode,
            region: "US".into(),
            timeframe: "today 12-m".into(),
        }
    }

    #[tokio::test]
    async fn run_reports_progress_and_shares_search() {
        let submitter = Arc::new(ScriptedSubmitter {
            fail_on: None,
            calls: Mutex::new(Vec::new()),
            search_id: Uuid::new_v4(),
        });
        let orchestrator = BatchOrchestrator::new(submitter.clone());
        let batches = plan_batches(&keywords(7), AnalysisMode::Deep).unwrap();
        let mut run = orchestrator.spawn(Uuid::new_v4(), batches, options(AnalysisMode::Deep));

        let mut started = Vec::new();
        let mut finished = None;
        while let Some(event) = run.events.recv().await {
            match event {
                BatchEvent::Started { index, total, .. } => started.push((index, total)),
                BatchEvent::Finished { search_id, batches } => finished = Some((search_id, batches)),
                _ => {}
            }
        }
        let summary = run.handle.await.unwrap().unwrap();

        assert_eq!(started, vec![(1, 3), (2, 3), (3, 3)]);
        assert_eq!(finished, Some((submitter.search_id, 3)));
        assert_eq!(summary.results.len(), 7);
        let calls = submitter.calls.lock().unwrap();
        assert_eq!(calls[0].1, None);
        assert!(calls[1..].iter().all(|(_, id)| *id == Some(submitter.search_id)));
    }

    #[tokio::test]
    async fn failure_aborts_remaining_batches() {
        let submitter = Arc::new(ScriptedSubmitter {
            fail_on: Some(2),
            calls: Mutex::new(Vec::new()),
            search_id: Uuid::new_v4(),
        });
        let orchestrator = BatchOrchestrator::new(submitter.clone());
        let batches = plan_batches(&keywords(10), AnalysisMode::Deep).unwrap();
        let mut run = orchestrator.spawn(Uuid::new_v4(), batches, options(AnalysisMode::Deep));

        let mut failed_at = None;
        while let Some(event) = run.events.recv().await {
            if let BatchEvent::Failed { index, error, .. } = event {
                failed_at = Some((index, error.error));
            }
        }
        let err = run.handle.await.unwrap().unwrap_err();

        assert_eq!(err.kind(), "timeout");
        assert_eq!(failed_at, Some((2, "timeout")));
        assert_eq!(submitter.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn run_continues_without_listener() {
        let submitter = Arc::new(ScriptedSubmitter {
            fail_on: None,
            calls: Mutex::new(Vec::new()),
            search_id: Uuid::new_v4(),
        });
        let orchestrator = BatchOrchestrator::new(submitter.clone());
        let batches = plan_batches(&keywords(8), AnalysisMode::Fast).unwrap();
        let run = orchestrator.spawn(Uuid::new_v4(), batches, options(AnalysisMode::Fast));
        drop(run.events);

        let summary = run.handle.await.unwrap().unwrap();
        assert_eq!(summary.batches, 2);
        assert_eq!(submitter.calls.lock().unwrap().len(), 2);
    }
}
