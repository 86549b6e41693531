//! Token usage and cost accounting
//!
//! [`UsageCounter`] is the shared accumulator used by the LLM and tool
//! executors. It is pure: both entry points take the previous totals by
//! reference and return fresh values.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Currency used for all accumulated costs
pub const DEFAULT_CURRENCY: &str = "USD";

/// Token breakdown reported by a model provider for one call.
///
/// Every field is optional because providers report different subsets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cached_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cache_miss_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_write_cache_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_text_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_audio_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_citation_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_text_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_image_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_audio_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_reasoning_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted_prediction_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_prediction_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

fn add_tokens(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0) + b.unwrap_or(0)),
    }
}

fn add_cost(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

impl ModelUsage {
    /// Field-by-field sum; a field stays `None` only if absent on both sides
    pub fn merge(&self, other: &ModelUsage) -> ModelUsage {
        ModelUsage {
            total_input_tokens: add_tokens(self.total_input_tokens, other.total_input_tokens),
            total_output_tokens: add_tokens(self.total_output_tokens, other.total_output_tokens),
            total_tokens: add_tokens(self.total_tokens, other.total_tokens),
            input_cached_tokens: add_tokens(self.input_cached_tokens, other.input_cached_tokens),
            input_cache_miss_tokens: add_tokens(
                self.input_cache_miss_tokens,
                other.input_cache_miss_tokens,
            ),
            input_write_cache_tokens: add_tokens(
                self.input_write_cache_tokens,
                other.input_write_cache_tokens,
            ),
            input_text_tokens: add_tokens(self.input_text_tokens, other.input_text_tokens),
            input_image_tokens: add_tokens(self.input_image_tokens, other.input_image_tokens),
            input_audio_tokens: add_tokens(self.input_audio_tokens, other.input_audio_tokens),
            input_citation_tokens: add_tokens(
                self.input_citation_tokens,
                other.input_citation_tokens,
            ),
            output_text_tokens: add_tokens(self.output_text_tokens, other.output_text_tokens),
            output_image_tokens: add_tokens(self.output_image_tokens, other.output_image_tokens),
            output_audio_tokens: add_tokens(self.output_audio_tokens, other.output_audio_tokens),
            output_reasoning_tokens: add_tokens(
                self.output_reasoning_tokens,
                other.output_reasoning_tokens,
            ),
            accepted_prediction_tokens: add_tokens(
                self.accepted_prediction_tokens,
                other.accepted_prediction_tokens,
            ),
            rejected_prediction_tokens: add_tokens(
                self.rejected_prediction_tokens,
                other.rejected_prediction_tokens,
            ),
            cost: add_cost(self.cost, other.cost),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmTokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub api_calls: u64,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsageEntry {
    pub name: String,
    pub calls: u64,
    pub errors: u64,
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsage {
    pub total_calls: u64,
    pub total_time_ms: u64,
    #[serde(default)]
    pub by_tool: Vec<ToolUsageEntry>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanInteractionUsage {
    pub approval_requests: u64,
    pub prompt_requests: u64,
    pub select_requests: u64,
    pub total_waiting_time_ms: u64,
}

/// Aggregate counters for an operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub llm: LlmTokenUsage,
    #[serde(default)]
    pub tools: ToolUsage,
    #[serde(default)]
    pub human_interaction: HumanInteractionUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelCostEntry {
    /// `provider/model`
    pub id: String,
    pub model: String,
    pub provider: String,
    pub total_cost: f64,
    pub usage: ModelUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmCost {
    pub total: f64,
    pub currency: String,
    #[serde(default)]
    pub by_model: Vec<ModelCostEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCostEntry {
    pub name: String,
    pub calls: u64,
    pub currency: String,
    pub total_cost: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCost {
    pub total: f64,
    pub currency: String,
    #[serde(default)]
    pub by_tool: Vec<ToolCostEntry>,
}

/// Accumulated spend for an operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cost {
    pub total: f64,
    pub currency: String,
    pub llm: LlmCost,
    pub tools: ToolCost,
    pub calculated_at: DateTime<Utc>,
}

impl Cost {
    pub fn new(calculated_at: DateTime<Utc>) -> Self {
        Self {
            total: 0.0,
            currency: DEFAULT_CURRENCY.to_string(),
            llm: LlmCost {
                currency: DEFAULT_CURRENCY.to_string(),
                ..Default::default()
            },
            tools: ToolCost {
                currency: DEFAULT_CURRENCY.to_string(),
                ..Default::default()
            },
            calculated_at,
        }
    }
}

impl Default for Cost {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

/// One tool invocation to be folded into the totals
#[derive(Debug, Clone, Copy)]
pub struct ToolInvocation<'a> {
    pub tool_name: &'a str,
    pub execution_time_ms: u64,
    pub success: bool,
    pub tool_cost: Option<f64>,
}

/// Pure accumulator for usage and cost totals
pub struct UsageCounter;

impl UsageCounter {
    /// Fold one LLM call into the totals
    pub fn accumulate_llm(
        usage: &Usage,
        cost: &Cost,
        provider: &str,
        model: &str,
        model_usage: &ModelUsage,
    ) -> (Usage, Cost) {
        let mut next_usage = usage.clone();
        let mut next_cost = cost.clone();

        let llm = &mut next_usage.llm;
        llm.input += model_usage.total_input_tokens.unwrap_or(0);
        llm.output += model_usage.total_output_tokens.unwrap_or(0);
        llm.total += model_usage.total_tokens.unwrap_or_else(|| {
            model_usage.total_input_tokens.unwrap_or(0) + model_usage.total_output_tokens.unwrap_or(0)
        });
        llm.api_calls += 1;

        if let Some(call_cost) = model_usage.cost {
            let id = format!("{provider}/{model}");
            match next_cost.llm.by_model.iter_mut().find(|m| m.id == id) {
                Some(entry) => {
                    entry.total_cost += call_cost;
                    entry.usage = entry.usage.merge(model_usage);
                }
                None => next_cost.llm.by_model.push(ModelCostEntry {
                    id,
                    model: model.to_string(),
                    provider: provider.to_string(),
                    total_cost: call_cost,
                    usage: model_usage.clone(),
                }),
            }
            next_cost.llm.total += call_cost;
            next_cost.total += call_cost;
            next_cost.calculated_at = Utc::now();
        }

        (next_usage, next_cost)
    }

    /// Fold one tool invocation into the totals
    pub fn accumulate_tool(usage: &Usage, cost: &Cost, call: ToolInvocation<'_>) -> (Usage, Cost) {
        let mut next_usage = usage.clone();
        let mut next_cost = cost.clone();

        let tools = &mut next_usage.tools;
        tools.total_calls += 1;
        tools.total_time_ms += call.execution_time_ms;
        match tools.by_tool.iter_mut().find(|t| t.name == call.tool_name) {
            Some(entry) => {
                entry.calls += 1;
                entry.total_time_ms += call.execution_time_ms;
                if !call.success {
                    entry.errors += 1;
                }
            }
            None => tools.by_tool.push(ToolUsageEntry {
                name: call.tool_name.to_string(),
                calls: 1,
                errors: u64::from(!call.success),
                total_time_ms: call.execution_time_ms,
            }),
        }

        if let Some(price) = call.tool_cost.filter(|p| *p > 0.0) {
            match next_cost
                .tools
                .by_tool
                .iter_mut()
                .find(|t| t.name == call.tool_name)
            {
                Some(entry) => {
                    entry.calls += 1;
                    entry.total_cost += price;
                }
                None => next_cost.tools.by_tool.push(ToolCostEntry {
                    name: call.tool_name.to_string(),
                    calls: 1,
                    currency: DEFAULT_CURRENCY.to_string(),
                    total_cost: price,
                }),
            }
            next_cost.tools.total += price;
            next_cost.total += price;
            next_cost.calculated_at = Utc::now();
        }

        (next_usage, next_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn call(input: u64, output: u64, cost: Option<f64>) -> ModelUsage {
        ModelUsage {
            total_input_tokens: Some(input),
            total_output_tokens: Some(output),
            total_tokens: Some(input + output),
            cost,
            ..Default::default()
        }
    }

    #[test]
    fn llm_usage_accumulates_tokens_and_calls() {
        let usage = Usage::default();
        let cost = Cost::default();

        let (usage, cost) =
            UsageCounter::accumulate_llm(&usage, &cost, "openai", "gpt-4o", &call(10, 5, None));
        let (usage, cost) =
            UsageCounter::accumulate_llm(&usage, &cost, "openai", "gpt-4o", &call(3, 2, None));

        assert_eq!(usage.llm.input, 13);
        assert_eq!(usage.llm.output, 7);
        assert_eq!(usage.llm.total, 20);
        assert_eq!(usage.llm.api_calls, 2);
        assert!(cost.llm.by_model.is_empty());
        assert!(close(cost.total, 0.0));
    }

    #[test]
    fn llm_cost_merges_per_model_entry() {
        let (usage, cost) = UsageCounter::accumulate_llm(
            &Usage::default(),
            &Cost::default(),
            "openai",
            "gpt-4o",
            &call(10, 5, Some(0.01)),
        );
        let (_, cost) =
            UsageCounter::accumulate_llm(&usage, &cost, "openai", "gpt-4o", &call(4, 1, Some(0.02)));

        assert_eq!(cost.llm.by_model.len(), 1);
        let entry = &cost.llm.by_model[0];
        assert_eq!(entry.id, "openai/gpt-4o");
        assert!(close(entry.total_cost, 0.03));
        assert_eq!(entry.usage.total_input_tokens, Some(14));
        assert_eq!(entry.usage.output_audio_tokens, None);
        assert!(close(cost.llm.total, 0.03));
        assert!(close(cost.total, 0.03));
    }

    #[test]
    fn tool_usage_tracks_errors_and_time() {
        let ok = ToolInvocation {
            tool_name: "web-browsing/search",
            execution_time_ms: 120,
            success: true,
            tool_cost: Some(0.001),
        };
        let failed = ToolInvocation {
            success: false,
            execution_time_ms: 30,
            ..ok
        };

        let (usage, cost) = UsageCounter::accumulate_tool(&Usage::default(), &Cost::default(), ok);
        let (usage, cost) = UsageCounter::accumulate_tool(&usage, &cost, failed);

        assert_eq!(usage.tools.total_calls, 2);
        assert_eq!(usage.tools.total_time_ms, 150);
        assert_eq!(usage.tools.by_tool[0].errors, 1);
        assert_eq!(cost.tools.by_tool[0].calls, 2);
        assert!(close(cost.tools.total, 0.002));
        assert!(close(cost.total, 0.002));
    }

    #[test]
    fn unpriced_tool_adds_no_cost_entry() {
        let (usage, cost) = UsageCounter::accumulate_tool(
            &Usage::default(),
            &Cost::default(),
            ToolInvocation {
                tool_name: "calculator/add",
                execution_time_ms: 1,
                success: true,
                tool_cost: None,
            },
        );
        assert_eq!(usage.tools.by_tool.len(), 1);
        assert!(cost.tools.by_tool.is_empty());
        assert!(close(cost.total, 0.0));
    }

    #[test]
    fn accumulation_leaves_inputs_untouched() {
        let usage = Usage::default();
        let cost = Cost::default();
        let _ = UsageCounter::accumulate_llm(&usage, &cost, "p", "m", &call(1, 1, Some(1.0)));
        assert_eq!(usage, Usage::default());
        assert!(close(cost.total, 0.0));
    }
}
