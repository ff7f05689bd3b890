//! Detection-and-resolution pipeline.
//!
//! Drives one run: watch → classify → match → (refine) → report.
//!
//! ```text
//! Watching ──cancel──────────────────────────────────────▶ Cancelled
//!    │ found
//!    ▼
//! Classifying ──error / empty answer────────────────────▶ Unclassified
//!    │ (transient failures retried per RetryPolicy)
//!    ▼
//! Matching ──0──▶ NotFound
//!    ├──────1──▶ Matched
//!    └─────>1──▶ Refining ──▶ Refined | Inconclusive
//! ```
//!
//! A classification answer is retried only when it carries both the `Error`
//! and `Exception` markers (the gateway's remote-failure sentinels). Any other
//! error-shaped answer ends the run as `Unclassified` without matching.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::config::{RefineConfig, RetryConfig};
use crate::gateway::{is_error, is_transient_failure, ClassificationGateway};
use crate::matcher::{build_refinement_prompt, select_refined, Matcher};
use crate::models::{ClassificationAnswer, Product};
use crate::progress::{NoProgress, StageEvent, StageReporter};
use crate::watcher::{DirectoryWatcher, Shutdown, WatchOutcome};

/// How classification failures are retried.
///
/// Delays grow as `base * 2^(attempt - 1)` up to `max_delay`. A
/// `max_attempts` of `0` never gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
        )
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.max_attempts == 0
    }

    /// `true` once `attempts` calls have been made and no more are allowed.
    pub fn exhausted(&self, attempts: u32) -> bool {
        !self.is_unbounded() && attempts >= self.max_attempts
    }

    /// Delay after the `attempt`-th failed call (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

/// Terminal state of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    /// The watch was interrupted before a file appeared.
    Cancelled,
    /// The model produced an empty or error answer; `diagnostic` is that answer.
    Unclassified { diagnostic: String },
    /// The answer matched nothing in the picklist.
    NotFound { answer: String },
    /// Exactly one picklist product matched.
    Matched { product: Product },
    /// Several products matched and the model picked one.
    ///
    /// `product` is the candidate the answer names, when it names one.
    Refined {
        answer: String,
        product: Option<Product>,
    },
    /// Several products matched and the refined answer named none of them.
    Inconclusive {
        answer: String,
        candidates: Vec<Product>,
    },
}

impl Outcome {
    /// The record shown to the operator: a product, the model's refined
    /// choice, or the all-`"NA"` placeholder.
    pub fn record(&self) -> Option<serde_json::Value> {
        match self {
            Outcome::Unclassified { .. } => Some(placeholder_record()),
            Outcome::Matched { product } => Some(product.to_value()),
            Outcome::Refined {
                product: Some(product),
                ..
            } => Some(product.to_value()),
            Outcome::Refined { answer, .. } => serde_json::from_str(answer).ok(),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Matched { .. } | Outcome::Refined { .. })
    }
}

/// `{"fruit": "NA", "PLU": "NA", "Price": "NA"}`
pub fn placeholder_record() -> serde_json::Value {
    serde_json::json!({ "fruit": "NA", "PLU": "NA", "Price": "NA" })
}

/// Final result of one run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub record: Option<serde_json::Value>,
    pub source: Option<PathBuf>,
    pub image_sha256: Option<String>,
    /// From opening the image to the report; excludes time spent watching.
    pub latency_ms: Option<u64>,
    pub finished_at: DateTime<Utc>,
}

impl Report {
    pub fn new(outcome: Outcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            record: outcome.record(),
            outcome,
            source: None,
            image_sha256: None,
            latency_ms: None,
            finished_at: Utc::now(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(Outcome::Cancelled)
    }

    /// Operator-facing text. Raw model answers appear only on failure paths.
    pub fn render_human(&self) -> String {
        let mut lines = Vec::new();
        if let Some(source) = &self.source {
            lines.push(format!("Image: {}", source.display()));
        }

        match &self.outcome {
            Outcome::Cancelled => lines.push("Watch cancelled".to_string()),
            Outcome::Unclassified { diagnostic } => {
                lines.push("Could not classify image".to_string());
                lines.push(placeholder_record().to_string());
                if !diagnostic.trim().is_empty() {
                    lines.push(format!("Debug: {}", diagnostic));
                }
            }
            Outcome::NotFound { answer } => {
                lines.push("Item not found".to_string());
                lines.push(format!("Model answer: {}", answer));
            }
            Outcome::Matched { product } => {
                lines.push("Item found".to_string());
                lines.push(product.to_value().to_string());
            }
            Outcome::Refined { answer, product } => {
                lines.push("Item found after refinement".to_string());
                match product {
                    Some(product) => lines.push(product.to_value().to_string()),
                    None => lines.push(answer.clone()),
                }
            }
            Outcome::Inconclusive { answer, candidates } => {
                lines.push("Refinement inconclusive".to_string());
                lines.push(format!("Model answer: {}", answer));
                let list: Vec<serde_json::Value> =
                    candidates.iter().map(Product::to_value).collect();
                lines.push(format!("Candidates: {}", serde_json::Value::Array(list)));
            }
        }

        if let Some(ms) = self.latency_ms {
            lines.push(format!("Latency: {:.2} seconds", ms as f64 / 1000.0));
        }
        lines.join("\n")
    }
}

/// Counts from [`Resolver::run_continuously`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub reports: usize,
    pub failures: usize,
}

/// Owns one gateway Session; use one resolver per in-flight image.
pub struct Resolver {
    gateway: ClassificationGateway,
    matcher: Matcher,
    retry: RetryPolicy,
    refine: RefineConfig,
    progress: Box<dyn StageReporter>,
    shutdown: Shutdown,
}

impl Resolver {
    pub fn new(
        gateway: ClassificationGateway,
        matcher: Matcher,
        retry: RetryPolicy,
        refine: RefineConfig,
    ) -> Self {
        Self {
            gateway,
            matcher,
            retry,
            refine,
            progress: Box::new(NoProgress),
            shutdown: Shutdown::new(),
        }
    }

    /// Stop signal that also cuts retry backoff short.
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_progress(mut self, progress: Box<dyn StageReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn gateway(&self) -> &ClassificationGateway {
        &self.gateway
    }

    /// Watch for one file and resolve it, or report cancellation.
    pub async fn run<F>(&mut self, watcher: &DirectoryWatcher, shutdown: F) -> Result<Report>
    where
        F: Future<Output = ()>,
    {
        self.progress.report(StageEvent::Watching {
            dir: watcher.dir().to_path_buf(),
        });

        match watcher.watch(shutdown).await? {
            WatchOutcome::Cancelled => Ok(Report::cancelled()),
            WatchOutcome::Found(path) => self.resolve_file(&path).await,
        }
    }

    /// Watch and resolve repeatedly until the shutdown signal fires.
    ///
    /// Each report is handed to `on_report`; an error from it ends the loop.
    /// A failed run (unreadable directory or image) is logged and retried
    /// after one poll interval.
    pub async fn run_continuously<F>(
        &mut self,
        watcher: &DirectoryWatcher,
        mut on_report: F,
    ) -> Result<LoopSummary>
    where
        F: FnMut(&Report) -> Result<()>,
    {
        let shutdown = self.shutdown.clone();
        let mut summary = LoopSummary::default();

        while !shutdown.is_triggered() {
            match self.run(watcher, shutdown.wait()).await {
                Ok(report) => {
                    on_report(&report)?;
                    if report.outcome == Outcome::Cancelled {
                        break;
                    }
                    summary.reports += 1;
                }
                Err(e) => {
                    summary.failures += 1;
                    tracing::warn!(error = %format!("{:#}", e), "run failed; still watching");
                    tokio::select! {
                        _ = shutdown.wait() => break,
                        _ = tokio::time::sleep(watcher.poll_interval()) => {}
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Read `path` fully and resolve it. Latency is measured from the read.
    pub async fn resolve_file(&mut self, path: &Path) -> Result<Report> {
        let started = Instant::now();
        let image = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read image: {}", path.display()))?;

        self.progress.report(StageEvent::Classifying {
            path: Some(path.to_path_buf()),
        });
        let outcome = self.resolve(&image).await?;

        let mut report = Report::new(outcome);
        report.source = Some(path.to_path_buf());
        report.image_sha256 = Some(sha256_hex(&image));
        report.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(report)
    }

    /// Resolve in-memory image bytes into a report.
    pub async fn resolve_bytes(&mut self, image: &[u8]) -> Result<Report> {
        let started = Instant::now();
        self.progress.report(StageEvent::Classifying { path: None });
        let outcome = self.resolve(image).await?;

        let mut report = Report::new(outcome);
        report.image_sha256 = Some(sha256_hex(image));
        report.latency_ms = Some(started.elapsed().as_millis() as u64);
        Ok(report)
    }

    /// Classify, match, and refine one image.
    ///
    /// Errors only on a gateway precondition violation; remote failures end
    /// as [`Outcome::Unclassified`].
    pub async fn resolve(&mut self, image: &[u8]) -> Result<Outcome> {
        let answer = self.classify_with_retry(image).await;

        if answer.trim().is_empty() || is_error(&answer) {
            tracing::warn!(answer = %answer, "classification failed");
            return Ok(Outcome::Unclassified { diagnostic: answer });
        }

        self.progress.report(StageEvent::Matching);
        let mut candidates = self.matcher.find_matches(&answer);
        tracing::debug!(candidates = candidates.len(), "picklist matched");

        match candidates.len() {
            0 => Ok(Outcome::NotFound { answer }),
            1 => Ok(Outcome::Matched {
                product: candidates.remove(0),
            }),
            _ => self.refine(candidates).await,
        }
    }

    async fn classify_with_retry(&mut self, image: &[u8]) -> String {
        let mut attempts = 0u32;
        loop {
            let answer = self.gateway.classify(image).await;
            attempts += 1;

            if !is_transient_failure(&answer) {
                return answer;
            }
            if self.retry.exhausted(attempts) {
                tracing::warn!(attempts, "classification retries exhausted");
                return answer;
            }

            let delay = self.retry.delay_for(attempts);
            tracing::info!(attempt = attempts, delay_ms = delay.as_millis() as u64, "classification failed, retrying");
            self.progress.report(StageEvent::Retrying {
                attempt: attempts,
                delay,
            });
            tokio::select! {
                _ = self.shutdown.wait() => {
                    tracing::info!(attempts, "retry interrupted");
                    return answer;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn refine(&mut self, candidates: Vec<Product>) -> Result<Outcome> {
        self.progress.report(StageEvent::Refining {
            candidates: candidates.len(),
        });

        let prompt = build_refinement_prompt(&candidates, self.refine.confidence_threshold);
        let answer = self.gateway.refine(&prompt).await?;

        let product = ClassificationAnswer::parse(&answer)
            .ok()
            .and_then(|parsed| select_refined(&parsed, &candidates).cloned());

        if self.refine.validate && product.is_none() {
            tracing::warn!(answer = %answer, "refined answer names no candidate");
            return Ok(Outcome::Inconclusive { answer, candidates });
        }

        Ok(Outcome::Refined { answer, product })
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{SENTINEL_ANALYSIS_FAILED, SENTINEL_DISABLED, SENTINEL_NO_TEXT};
    use crate::picklist::Picklist;
    use crate::vision::{DisabledModel, VisionModel};
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Replays queued answers in order; `None` in the queue means a remote error.
    struct ScriptedModel {
        answers: Mutex<VecDeque<Option<&'static str>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn new(answers: Vec<Option<&'static str>>) -> Arc<Self> {
            Arc::new(Self {
                answers: Mutex::new(answers.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VisionModel for ScriptedModel {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _image: &[u8], _mime: &str, prompt: &str) -> anyhow::Result<Option<String>> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.answers.lock().unwrap().pop_front() {
                Some(Some(answer)) => Ok(Some(answer.to_string())),
                Some(None) => bail!("upstream unavailable"),
                None => Ok(None),
            }
        }
    }

    fn catalog() -> Arc<Picklist> {
        Arc::new(Picklist::new(vec![
            Product::new("Pink Lady Apple", 4130, 2.99),
            Product::new("Banana", 4011, 0.59),
            Product::new("Gala Apple", 4133, 2.29),
            Product::new("Hass Avocado", 4046, 1.25),
        ]))
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(4))
    }

    fn resolver(model: Arc<ScriptedModel>, validate: bool, max_attempts: u32) -> Resolver {
        Resolver::new(
            ClassificationGateway::new(model, "few-shot"),
            Matcher::new(catalog()),
            fast_retry(max_attempts),
            RefineConfig {
                confidence_threshold: 0.95,
                validate,
            },
        )
    }

    #[test]
    fn test_retry_delays_grow_and_cap() {
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::from_secs(8));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
        assert_eq!(policy.delay_for(200), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_exhaustion() {
        let policy = fast_retry(3);
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));

        let unbounded = policy.with_max_attempts(0);
        assert!(unbounded.is_unbounded());
        assert!(!unbounded.exhausted(u32::MAX));
    }

    #[tokio::test]
    async fn test_no_match_reports_not_found_with_answer() {
        let model = ScriptedModel::new(vec![Some(r#"{"fruit": "durian"}"#)]);
        let mut r = resolver(model.clone(), true, 3);

        let outcome = r.resolve(b"img").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::NotFound {
                answer: r#"{"fruit": "durian"}"#.to_string()
            }
        );
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_single_match_skips_refinement() {
        let model = ScriptedModel::new(vec![Some("{'fruit': 'banana'}")]);
        let mut r = resolver(model.clone(), true, 3);

        let outcome = r.resolve(b"img").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Matched {
                product: Product::new("Banana", 4011, 0.59)
            }
        );
        assert_eq!(model.prompts(), vec!["few-shot".to_string()]);
    }

    #[tokio::test]
    async fn test_multiple_matches_refine_once() {
        let model = ScriptedModel::new(vec![
            Some(r#"{"fruit": "apple"}"#),
            Some(r#"{"fruit": "Gala Apple", "PLU": 4133, "Price": 2.29}"#),
        ]);
        let mut r = resolver(model.clone(), true, 3);

        let outcome = r.resolve(b"img").await.unwrap();
        match &outcome {
            Outcome::Refined { product, .. } => {
                assert_eq!(product.as_ref(), Some(&Product::new("Gala Apple", 4133, 2.29)));
            }
            other => panic!("expected refined outcome, got {:?}", other),
        }

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("Pink Lady Apple"));
        assert!(prompts[1].contains("Gala Apple"));
        assert!(!prompts[1].contains("Banana"));
    }

    #[tokio::test]
    async fn test_refined_outsider_is_inconclusive() {
        let model = ScriptedModel::new(vec![
            Some(r#"{"fruit": "apple"}"#),
            Some(r#"{"fruit": "Fuji Apple"}"#),
        ]);
        let mut r = resolver(model, true, 3);

        match r.resolve(b"img").await.unwrap() {
            Outcome::Inconclusive { answer, candidates } => {
                assert_eq!(answer, r#"{"fruit": "Fuji Apple"}"#);
                assert_eq!(candidates.len(), 2);
            }
            other => panic!("expected inconclusive outcome, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refined_answer_trusted_without_validation() {
        let model = ScriptedModel::new(vec![
            Some(r#"{"fruit": "apple"}"#),
            Some(r#"{"fruit": "Fuji Apple"}"#),
        ]);
        let mut r = resolver(model, false, 3);

        let outcome = r.resolve(b"img").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Refined {
                answer: r#"{"fruit": "Fuji Apple"}"#.to_string(),
                product: None,
            }
        );
        assert_eq!(
            outcome.record(),
            Some(serde_json::json!({"fruit": "Fuji Apple"}))
        );
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let model = ScriptedModel::new(vec![None, None, Some(r#"{"fruit": "avocado"}"#)]);
        let mut r = resolver(model.clone(), true, 5);

        let outcome = r.resolve(b"img").await.unwrap();
        assert!(matches!(outcome, Outcome::Matched { .. }));
        assert_eq!(model.prompts().len(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_is_unclassified() {
        let model = ScriptedModel::new(vec![None, None, None, None]);
        let mut r = resolver(model.clone(), true, 3);

        let outcome = r.resolve(b"img").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Unclassified {
                diagnostic: SENTINEL_ANALYSIS_FAILED.to_string()
            }
        );
        assert_eq!(model.prompts().len(), 3);
        assert_eq!(outcome.record(), Some(placeholder_record()));
    }

    #[tokio::test]
    async fn test_single_flag_error_is_not_retried() {
        // An exhausted script answers with no text.
        let model = ScriptedModel::new(vec![]);
        let mut r = resolver(model.clone(), true, 5);

        let outcome = r.resolve(b"img").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Unclassified {
                diagnostic: SENTINEL_NO_TEXT.to_string()
            }
        );
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_backend_is_not_retried() {
        // Unbounded policy with long delays: any retry would hit the timeout.
        let mut r = Resolver::new(
            ClassificationGateway::new(Arc::new(DisabledModel), "few-shot"),
            Matcher::new(catalog()),
            RetryPolicy::new(0, Duration::from_secs(5), Duration::from_secs(5)),
            RefineConfig::default(),
        );

        let outcome = tokio::time::timeout(Duration::from_secs(1), r.resolve(b"img"))
            .await
            .expect("disabled backend was retried")
            .unwrap();
        assert_eq!(
            outcome,
            Outcome::Unclassified {
                diagnostic: SENTINEL_DISABLED.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_unbounded_retry() {
        let model = ScriptedModel::new(vec![None; 64]);
        let shutdown = Shutdown::new();
        let mut r = Resolver::new(
            ClassificationGateway::new(model.clone(), "few-shot"),
            Matcher::new(catalog()),
            RetryPolicy::new(0, Duration::from_secs(5), Duration::from_secs(5)),
            RefineConfig::default(),
        )
        .with_shutdown(shutdown.clone());

        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.trigger();
        });
        let outcome = tokio::time::timeout(Duration::from_secs(2), r.resolve(b"img"))
            .await
            .expect("retry ignored shutdown")
            .unwrap();
        trigger.await.unwrap();

        assert!(matches!(outcome, Outcome::Unclassified { .. }));
        assert_eq!(model.prompts().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_backs_off_when_directory_disappears() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("drop");
        let watcher = DirectoryWatcher::new(&dir, Duration::from_millis(50)).unwrap();
        std::fs::remove_dir(&dir).unwrap();

        let shutdown = Shutdown::new();
        let mut r = resolver(ScriptedModel::new(vec![]), true, 3).with_shutdown(shutdown.clone());
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.trigger();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(2),
            r.run_continuously(&watcher, |_| Ok(())),
        )
        .await
        .expect("loop ignored shutdown")
        .unwrap();
        trigger.await.unwrap();

        // One failure per poll interval, not a tight spin.
        assert_eq!(summary.reports, 0);
        assert!(summary.failures >= 1 && summary.failures <= 8, "{:?}", summary);
    }

    #[tokio::test]
    async fn test_loop_reports_each_file_until_shutdown() {
        let tmp = tempfile::TempDir::new().unwrap();
        let watcher = DirectoryWatcher::new(tmp.path(), Duration::from_millis(20)).unwrap();
        let model = ScriptedModel::new(vec![Some(r#"{"fruit": "banana"}"#), Some(r#"{"fruit": "avocado"}"#)]);
        let shutdown = Shutdown::new();
        let mut r = resolver(model, true, 3).with_shutdown(shutdown.clone());

        let root = tmp.path().to_path_buf();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(root.join("one.png"), b"1").unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            std::fs::write(root.join("two.png"), b"2").unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
            shutdown.trigger();
        });

        let mut seen = Vec::new();
        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            r.run_continuously(&watcher, |report| {
                seen.push(report.outcome.clone());
                Ok(())
            }),
        )
        .await
        .expect("loop timed out")
        .unwrap();
        writer.await.unwrap();

        assert_eq!(summary.reports, 2);
        assert!(matches!(&seen[0], Outcome::Matched { product } if product.code == 4011));
        assert!(matches!(&seen[1], Outcome::Matched { product } if product.code == 4046));
        assert_eq!(seen.last(), Some(&Outcome::Cancelled));
    }

    #[tokio::test]
    async fn test_blank_answer_is_unclassified() {
        let model = ScriptedModel::new(vec![Some("   ")]);
        let mut r = resolver(model, true, 3);
        assert!(matches!(
            r.resolve(b"img").await.unwrap(),
            Outcome::Unclassified { .. }
        ));
    }

    #[tokio::test]
    async fn test_resolve_file_records_latency_and_digest() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("banana.png");
        std::fs::write(&path, b"abc").unwrap();

        let model = ScriptedModel::new(vec![Some(r#"{"fruit": "banana"}"#)]);
        let mut r = resolver(model, true, 3);

        let report = r.resolve_file(&path).await.unwrap();
        assert!(report.outcome.is_success());
        assert_eq!(report.source.as_deref(), Some(path.as_path()));
        assert!(report.latency_ms.is_some());
        assert_eq!(
            report.image_sha256.as_deref(),
            Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
        );
        assert!(report.render_human().contains("Item found"));
        assert!(report.render_human().contains("Latency:"));
    }

    #[tokio::test]
    async fn test_resolve_missing_file_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let mut r = resolver(ScriptedModel::new(vec![]), true, 3);
        assert!(r.resolve_file(&tmp.path().join("gone.png")).await.is_err());
    }

    #[tokio::test]
    async fn test_run_cancelled_reports_cancelled() {
        let tmp = tempfile::TempDir::new().unwrap();
        let watcher = DirectoryWatcher::new(tmp.path(), Duration::from_millis(20)).unwrap();
        let model = ScriptedModel::new(vec![]);
        let mut r = resolver(model.clone(), true, 3);

        let report = r.run(&watcher, std::future::ready(())).await.unwrap();
        assert_eq!(report.outcome, Outcome::Cancelled);
        assert!(report.latency_ms.is_none());
        assert!(model.prompts().is_empty());
    }

    #[test]
    fn test_report_json_shape() {
        let report = Report::new(Outcome::Matched {
            product: Product::new("Banana", 4011, 0.59),
        });
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "matched");
        assert_eq!(json["product"]["PLU"], 4011);
        assert_eq!(json["record"]["fruit"], "Banana");
    }

    #[test]
    fn test_unclassified_renders_placeholder() {
        let report = Report::new(Outcome::Unclassified {
            diagnostic: r#"{"Error": "API Key missing"}"#.to_string(),
        });
        let text = report.render_human();
        assert!(text.contains(r#""fruit":"NA""#));
        assert!(text.contains("Debug: {\"Error\": \"API Key missing\"}"));
    }
}
