//! Per-call usage records and their level/overall rollup.

use crate::error::Result;
use crate::io::{ArtifactStore, DocLayout};
use crate::pipeline::{NodeKey, Position};
use crate::summarizer::Usage;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Usage of one summarization call. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetric {
    pub timestamp: DateTime<Utc>,
    pub level: u32,
    pub position: Position,
    pub budget_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    pub payload_chars: usize,
}

impl UsageMetric {
    pub fn new(key: &NodeKey, budget_tokens: u32, usage: Usage, payload_chars: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            level: key.level,
            position: key.position.clone(),
            budget_tokens,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            payload_chars,
        }
    }

    fn usage(&self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

/// Summed usage for a set of calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub summaries: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
}

impl UsageTotals {
    fn add(&mut self, metric: &UsageMetric) {
        let usage = metric.usage();
        self.summaries += 1;
        self.prompt_tokens += usage.prompt_tokens.unwrap_or(0);
        self.completion_tokens += usage.completion_tokens.unwrap_or(0);
        self.total_tokens += usage.total_or_sum();
    }

    fn price(mut self, cost_per_1k_tokens: Option<f64>) -> Self {
        self.estimated_cost = cost_per_1k_tokens.map(|rate| self.total_tokens as f64 / 1000.0 * rate);
        self
    }
}

/// Usage totals for one level of the summary tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelRollup {
    pub level: u32,
    #[serde(flatten)]
    pub totals: UsageTotals,
}

/// Usage rolled up by level and overall. Derived data: recomputing it over
/// the same metrics yields the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rollup {
    pub doc_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_per_1k_tokens: Option<f64>,
    /// Ascending by level
    pub levels: Vec<LevelRollup>,
    pub overall: UsageTotals,
}

/// Rollup plus the time it was generated, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollupReport {
    pub generated: DateTime<Utc>,
    #[serde(flatten)]
    pub rollup: Rollup,
}

impl Rollup {
    /// Aggregate usage records. A non-positive cost rate is treated as absent.
    pub fn from_metrics(doc_id: &str, metrics: &[UsageMetric], cost_per_1k_tokens: Option<f64>) -> Self {
        let rate = cost_per_1k_tokens.filter(|r| *r > 0.0);
        let mut per_level: BTreeMap<u32, UsageTotals> = BTreeMap::new();
        let mut overall = UsageTotals::default();

        for metric in metrics {
            per_level.entry(metric.level).or_default().add(metric);
            overall.add(metric);
        }

        Self {
            doc_id: doc_id.to_string(),
            cost_per_1k_tokens: rate,
            levels: per_level
                .into_iter()
                .map(|(level, totals)| LevelRollup {
                    level,
                    totals: totals.price(rate),
                })
                .collect(),
            overall: overall.price(rate),
        }
    }

    /// Markdown rendering with a by-level table.
    pub fn to_markdown(&self, generated: DateTime<Utc>) -> String {
        let mut md = String::new();
        let _ = writeln!(md, "# Metrics Rollup");
        let _ = writeln!(md, "- Document: `{}`", self.doc_id);
        let _ = writeln!(md, "- Generated: {}", generated.to_rfc3339_opts(SecondsFormat::Millis, true));
        if let Some(rate) = self.cost_per_1k_tokens {
            let _ = writeln!(md, "- Cost/1k tokens: {}", rate);
        }
        let _ = writeln!(md);
        let _ = writeln!(md, "## Overall");
        let _ = writeln!(md, "- Summaries: {}", self.overall.summaries);
        let _ = writeln!(md, "- Prompt tokens: {}", self.overall.prompt_tokens);
        let _ = writeln!(md, "- Completion tokens: {}", self.overall.completion_tokens);
        let _ = writeln!(md, "- Total tokens: {}", self.overall.total_tokens);
        if let Some(cost) = self.overall.estimated_cost {
            let _ = writeln!(md, "- Estimated cost: {:.4}", cost);
        }
        let _ = writeln!(md);
        let _ = writeln!(md, "## By Level");
        let _ = writeln!(md, "| Level | Summaries | Prompt | Completion | Total | Est. cost |");
        let _ = writeln!(md, "|------:|----------:|-------:|-----------:|------:|----------:|");
        for row in &self.levels {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} |",
                row.level,
                row.totals.summaries,
                row.totals.prompt_tokens,
                row.totals.completion_tokens,
                row.totals.total_tokens,
                format_cost(row.totals.estimated_cost),
            );
        }
        md
    }

    /// Load every usage record for a document and aggregate it.
    ///
    /// Records that cannot be read or parsed are skipped with a warning.
    pub async fn load(
        store: &ArtifactStore,
        layout: &DocLayout,
        cost_per_1k_tokens: Option<f64>,
    ) -> Result<Self> {
        let paths = store.list(&layout.usage_prefix()).await?;
        let mut metrics = Vec::with_capacity(paths.len());

        for path in paths {
            let parsed = match store.read_text(&path).await {
                Ok(raw) => serde_json::from_str::<UsageMetric>(&raw).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            match parsed {
                Ok(metric) => metrics.push(metric),
                Err(e) => tracing::warn!("Skipping {}: {}", path, e),
            }
        }

        tracing::debug!("Aggregating {} usage records for {}", metrics.len(), layout.doc_id());
        Ok(Self::from_metrics(layout.doc_id(), &metrics, cost_per_1k_tokens))
    }
}

fn format_cost(cost: Option<f64>) -> String {
    cost.map(|c| format!("{:.4}", c)).unwrap_or_default()
}

impl std::fmt::Display for Rollup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "{:>7} {:>10} {:>12} {:>12} {:>12} {:>10}",
            "Level", "Summaries", "Prompt", "Completion", "Total", "Est. cost"
        )?;
        for row in &self.levels {
            writeln!(
                f,
                "{:>7} {:>10} {:>12} {:>12} {:>12} {:>10}",
                row.level,
                row.totals.summaries,
                row.totals.prompt_tokens,
                row.totals.completion_tokens,
                row.totals.total_tokens,
                format_cost(row.totals.estimated_cost),
            )?;
        }
        write!(
            f,
            "{:>7} {:>10} {:>12} {:>12} {:>12} {:>10}",
            "all",
            self.overall.summaries,
            self.overall.prompt_tokens,
            self.overall.completion_tokens,
            self.overall.total_tokens,
            format_cost(self.overall.estimated_cost),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use std::sync::Arc;

    fn metric(key: NodeKey, prompt: Option<u64>, completion: Option<u64>, total: Option<u64>) -> UsageMetric {
        UsageMetric {
            timestamp: DateTime::<Utc>::default(),
            level: key.level,
            position: key.position,
            budget_tokens: 180,
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            payload_chars: 100,
        }
    }

    fn sample() -> Vec<UsageMetric> {
        vec![
            metric(NodeKey::group(2, 0), Some(300), Some(50), None),
            metric(NodeKey::leaf(0), Some(100), Some(20), Some(120)),
            metric(NodeKey::leaf(1), Some(90), Some(10), None),
            metric(NodeKey::group(1, 0), Some(200), Some(40), Some(250)),
            metric(NodeKey::leaf(2), None, None, None),
        ]
    }

    #[test]
    fn test_rollup_groups_by_level_ascending() {
        let rollup = Rollup::from_metrics("doc", &sample(), None);

        let levels: Vec<u32> = rollup.levels.iter().map(|l| l.level).collect();
        assert_eq!(levels, vec![0, 1, 2]);

        let leaf = rollup.levels[0].totals;
        assert_eq!(leaf.summaries, 3);
        assert_eq!(leaf.prompt_tokens, 190);
        assert_eq!(leaf.completion_tokens, 30);
        // 120 reported + (90 + 10) derived + 0
        assert_eq!(leaf.total_tokens, 220);
        assert!(leaf.estimated_cost.is_none());

        assert_eq!(rollup.levels[1].totals.total_tokens, 250);
        assert_eq!(rollup.levels[2].totals.total_tokens, 350);
    }

    #[test]
    fn test_overall_equals_sum_of_levels() {
        let rollup = Rollup::from_metrics("doc", &sample(), Some(0.5));
        let sum: u64 = rollup.levels.iter().map(|l| l.totals.total_tokens).sum();
        let count: u64 = rollup.levels.iter().map(|l| l.totals.summaries).sum();

        assert_eq!(rollup.overall.total_tokens, sum);
        assert_eq!(rollup.overall.summaries, count);
        assert_eq!(rollup.overall.total_tokens, 820);
        assert!((rollup.overall.estimated_cost.unwrap() - 0.41).abs() < 1e-9);
        assert!((rollup.levels[2].totals.estimated_cost.unwrap() - 0.175).abs() < 1e-9);
    }

    #[test]
    fn test_rollup_is_idempotent() {
        let metrics = sample();
        assert_eq!(
            Rollup::from_metrics("doc", &metrics, Some(1.0)),
            Rollup::from_metrics("doc", &metrics, Some(1.0))
        );
    }

    #[test]
    fn test_zero_rate_means_no_cost() {
        let rollup = Rollup::from_metrics("doc", &sample(), Some(0.0));
        assert!(rollup.cost_per_1k_tokens.is_none());
        assert!(rollup.overall.estimated_cost.is_none());
    }

    #[test]
    fn test_empty_metrics() {
        let rollup = Rollup::from_metrics("doc", &[], None);
        assert!(rollup.levels.is_empty());
        assert_eq!(rollup.overall, UsageTotals::default());
    }

    #[test]
    fn test_markdown_table() {
        let rollup = Rollup::from_metrics("doc", &sample(), Some(2.0));
        let md = rollup.to_markdown(DateTime::<Utc>::default());

        assert!(md.starts_with("# Metrics Rollup\n"));
        assert!(md.contains("- Document: `doc`"));
        assert!(md.contains("| Level | Summaries | Prompt | Completion | Total | Est. cost |"));
        assert!(md.contains("| 0 | 3 | 190 | 30 | 220 | 0.4400 |"));
        assert!(md.contains("- Estimated cost: 1.6400"));
    }

    #[test]
    fn test_display_table() {
        let rollup = Rollup::from_metrics("doc", &sample(), None);
        let text = rollup.to_string();
        assert_eq!(text.lines().count(), 5);
        assert!(text.lines().last().unwrap().contains("820"));
    }

    #[test]
    fn test_report_json_shape() {
        let report = RollupReport {
            generated: DateTime::<Utc>::default(),
            rollup: Rollup::from_metrics("doc", &sample(), None),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["docId"], "doc");
        assert_eq!(value["levels"][0]["level"], 0);
        assert_eq!(value["levels"][0]["totalTokens"], 220);
        assert_eq!(value["overall"]["summaries"], 5);
        assert!(value.get("generated").is_some());
    }

    #[tokio::test]
    async fn test_load_skips_unparsable_records() {
        let store = ArtifactStore::new(Arc::new(InMemory::new()));
        let layout = DocLayout::new("doc");
        for m in sample() {
            let key = NodeKey {
                level: m.level,
                position: m.position.clone(),
            };
            store
                .write_text(&layout.usage_metric(&key), serde_json::to_string(&m).unwrap())
                .await
                .unwrap();
        }
        store
            .write_text(&object_store::path::Path::from("doc/metrics/usage/junk.json"), "{")
            .await
            .unwrap();

        let rollup = Rollup::load(&store, &layout, None).await.unwrap();
        assert_eq!(rollup, Rollup::from_metrics("doc", &sample(), None));
    }
}
