//! End-to-end daily run: schedule → collect → synthesize → render → publish.

use std::path::PathBuf;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use tracing::{Instrument, error, info, info_span};

use dailybrief_search::SourceCollector;
use dailybrief_shared::{
    DailyBriefError, Result, RotationTable, RunId, Sourcing, Topic, check_rotation,
};

use crate::publish::{Publisher, render};
use crate::scheduler;
use crate::synthesis::ContentSynthesizer;

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a topic starts (`index` is 1-based).
    fn topic_started(&self, topic: &Topic, index: usize, total: usize);
    /// Called when entering a new phase of the current topic.
    fn phase(&self, name: &str);
    /// Called when a topic's article has been published.
    fn topic_published(&self, topic: &Topic, path: &std::path::Path);
    /// Called when a topic failed.
    fn topic_failed(&self, topic: &Topic, error: &DailyBriefError);
    /// Called when the run completes.
    fn done(&self, result: &RunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn topic_started(&self, _topic: &Topic, _index: usize, _total: usize) {}
    fn phase(&self, _name: &str) {}
    fn topic_published(&self, _topic: &Topic, _path: &std::path::Path) {}
    fn topic_failed(&self, _topic: &Topic, _error: &DailyBriefError) {}
    fn done(&self, _result: &RunResult) {}
}

/// A topic that made it all the way to disk.
#[derive(Debug, Clone)]
pub struct PublishedTopic {
    pub topic_id: String,
    pub path: PathBuf,
    pub sourcing: Sourcing,
    pub source_count: usize,
}

/// A topic that failed, and why.
#[derive(Debug)]
pub struct TopicFailure {
    pub topic_id: String,
    pub error: DailyBriefError,
}

/// Outcome of one run.
#[derive(Debug)]
pub struct RunResult {
    pub run_id: RunId,
    pub run_date: NaiveDate,
    pub succeeded: Vec<PublishedTopic>,
    pub failed: Vec<TopicFailure>,
    pub elapsed: std::time::Duration,
}

impl RunResult {
    /// True when every selected topic was published.
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs the day's topics one after another.
pub struct PipelineRunner {
    rotation: RotationTable,
    collector: SourceCollector,
    synthesizer: ContentSynthesizer,
    publisher: Publisher,
    max_results: usize,
}

impl PipelineRunner {
    pub fn new(
        rotation: RotationTable,
        collector: SourceCollector,
        synthesizer: ContentSynthesizer,
        publisher: Publisher,
        max_results: usize,
    ) -> Self {
        Self {
            rotation,
            collector,
            synthesizer,
            publisher,
            max_results,
        }
    }

    /// Topics to run: the scheduled ones, or the single `only` topic.
    pub fn topics_for(&self, today: NaiveDate, only: Option<&str>) -> Result<Vec<Topic>> {
        check_rotation(&self.rotation)?;
        match only {
            Some(id) => self
                .rotation
                .topics
                .iter()
                .find(|t| t.id == id)
                .cloned()
                .map(|t| vec![t])
                .ok_or_else(|| DailyBriefError::config(format!("unknown topic id {id:?}"))),
            None => scheduler::schedule(today, &self.rotation),
        }
    }

    /// Run every topic scheduled for `today`.
    ///
    /// Topic-scoped failures are recorded and the run moves on. Config
    /// errors abort before any provider call.
    pub async fn run(
        &self,
        today: NaiveDate,
        only: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunResult> {
        let run_id = RunId::new();
        let span = info_span!("run", %run_id, date = %today);
        self.run_inner(run_id, today, only, progress)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: RunId,
        today: NaiveDate,
        only: Option<&str>,
        progress: &dyn ProgressReporter,
    ) -> Result<RunResult> {
        let start = Instant::now();
        let topics = self.topics_for(today, only)?;
        info!(
            topics = ?topics.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
            "starting run"
        );

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        let total = topics.len();

        for (i, topic) in topics.iter().enumerate() {
            progress.topic_started(topic, i + 1, total);
            let outcome = self
                .run_topic(topic, today, progress)
                .instrument(info_span!("topic", topic = %topic.id))
                .await;

            match outcome {
                Ok(published) => {
                    progress.topic_published(topic, &published.path);
                    succeeded.push(published);
                }
                Err(err) if !err.is_topic_scoped() => return Err(err),
                Err(err) => {
                    error!(topic = %topic.id, error_kind = err.kind(), error = %err, "topic failed");
                    progress.topic_failed(topic, &err);
                    failed.push(TopicFailure {
                        topic_id: topic.id.clone(),
                        error: err,
                    });
                }
            }
        }

        let result = RunResult {
            run_id,
            run_date: today,
            succeeded,
            failed,
            elapsed: start.elapsed(),
        };

        progress.done(&result);
        info!(
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "run complete"
        );
        Ok(result)
    }

    async fn run_topic(
        &self,
        topic: &Topic,
        today: NaiveDate,
        progress: &dyn ProgressReporter,
    ) -> Result<PublishedTopic> {
        progress.phase("Collecting sources");
        let sources = self
            .collector
            .collect(&topic.search_query, self.max_results)
            .await?;

        progress.phase("Synthesizing article");
        let body = self.synthesizer.synthesize(topic, &sources).await?;

        progress.phase("Publishing");
        let article = render(topic, body, today, Utc::now());
        let published = self.publisher.publish(&article)?;

        Ok(PublishedTopic {
            topic_id: topic.id.clone(),
            path: published.path,
            sourcing: article.sourcing,
            source_count: article.sources.len(),
        })
    }
}
