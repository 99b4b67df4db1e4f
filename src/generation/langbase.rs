use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
    AnalysisPlan, ClassifyOutcome, Decomposition, GenerationService, Proposal, SourcePlan,
};
use crate::config::PipeConfig;
use crate::error::{GenerationError, GenerationResult};
use crate::langbase::{LangbaseClient, Message, PipeRequest};
use crate::prompts::{
    ANALYSIS_PROMPT, BREAKDOWN_PROMPT, CLASSIFY_PROMPT, FORMULATE_PROMPT, SOURCE_PROMPT,
};

/// Extract JSON from a completion string, handling markdown code blocks.
///
/// Attempts extraction in this order:
/// 1. Raw JSON (fast path)
/// 2. ```json ... ``` code blocks
/// 3. ``` ... ``` code blocks
/// 4. The first `{` through the last `}` of the text
pub fn extract_json_from_completion(completion: &str) -> Result<&str, String> {
    let trimmed = completion.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(trimmed);
    }

    if completion.contains("```json") {
        return completion
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ```json block but content was empty or malformed".to_string());
    }

    if completion.contains("```") {
        return completion
            .split("```")
            .nth(1)
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| "Found ``` block but content was empty or malformed".to_string());
    }

    // Models sometimes wrap the object in prose
    if let (Some(start), Some(end)) = (completion.find('{'), completion.rfind('}')) {
        if start < end {
            return Ok(&completion[start..=end]);
        }
    }

    Err(format!(
        "No JSON found in response. First 100 chars: '{}'",
        completion.chars().take(100).collect::<String>()
    ))
}

/// Decode a completion into a typed result.
fn decode<T: DeserializeOwned>(completion: &str, what: &str) -> GenerationResult<T> {
    let json_str = extract_json_from_completion(completion).map_err(|e| {
        warn!(
            error = %e,
            completion_preview = %completion.chars().take(200).collect::<String>(),
            "Failed to extract JSON from {} response", what
        );
        GenerationError::Malformed {
            message: format!("{} response extraction failed: {}", what, e),
        }
    })?;

    serde_json::from_str::<T>(json_str).map_err(|e| GenerationError::Malformed {
        message: format!("Failed to parse {} response: {}", what, e),
    })
}

#[derive(Deserialize)]
struct FormulateResponse {
    hypotheses: Vec<Proposal>,
}

/// Generation service backed by five Langbase pipes.
#[derive(Clone)]
pub struct LangbaseGenerator {
    client: LangbaseClient,
    pipes: PipeConfig,
}

impl LangbaseGenerator {
    pub fn new(client: LangbaseClient, pipes: PipeConfig) -> Self {
        Self { client, pipes }
    }

    /// Upsert every pipe this generator calls.
    pub async fn ensure_pipes(&self) -> crate::error::LangbaseResult<()> {
        let specs = [
            (&self.pipes.formulate, "Root hypothesis formulation", FORMULATE_PROMPT),
            (&self.pipes.breakdown, "Hypothesis decomposition", BREAKDOWN_PROMPT),
            (&self.pipes.classify, "Leaf/branch classification", CLASSIFY_PROMPT),
            (&self.pipes.analysis, "Required analysis identification", ANALYSIS_PROMPT),
            (&self.pipes.source, "Data source identification", SOURCE_PROMPT),
        ];
        for (name, description, prompt) in specs {
            self.client.ensure_pipe(name, description, prompt).await?;
        }
        Ok(())
    }

    async fn run(
        &self,
        pipe: &str,
        system_prompt: &str,
        subject_label: &str,
        subject: &str,
        context: &str,
    ) -> GenerationResult<String> {
        let messages = build_messages(system_prompt, subject_label, subject, context);
        debug!(pipe = %pipe, "Running generation pipe");
        let response = self
            .client
            .call_pipe(PipeRequest::new(pipe, messages))
            .await?;

        if !response.success {
            return Err(GenerationError::Service {
                message: format!("pipe {} reported failure", pipe),
            });
        }
        Ok(response.completion)
    }
}

fn build_messages(
    system_prompt: &str,
    subject_label: &str,
    subject: &str,
    context: &str,
) -> Vec<Message> {
    let mut messages = vec![Message::system(system_prompt)];
    if !context.trim().is_empty() {
        messages.push(Message::user(format!("Context:\n{}", context)));
    }
    messages.push(Message::user(format!("{}:\n{}", subject_label, subject)));
    messages
}

#[async_trait]
impl GenerationService for LangbaseGenerator {
    async fn formulate(&self, problem: &str, context: &str) -> GenerationResult<Vec<Proposal>> {
        let completion = self
            .run(&self.pipes.formulate, FORMULATE_PROMPT, "Problem statement", problem, context)
            .await?;
        let parsed: FormulateResponse = decode(&completion, "formulate")?;
        Ok(parsed.hypotheses)
    }

    async fn decompose(&self, node_text: &str, context: &str) -> GenerationResult<Decomposition> {
        let completion = self
            .run(&self.pipes.breakdown, BREAKDOWN_PROMPT, "Parent hypothesis", node_text, context)
            .await?;
        decode(&completion, "breakdown")
    }

    async fn classify(&self, node_text: &str, context: &str) -> GenerationResult<ClassifyOutcome> {
        let completion = self
            .run(&self.pipes.classify, CLASSIFY_PROMPT, "Hypothesis", node_text, context)
            .await?;
        decode(&completion, "classify")
    }

    async fn identify_analysis(
        &self,
        node_text: &str,
        context: &str,
    ) -> GenerationResult<AnalysisPlan> {
        let completion = self
            .run(&self.pipes.analysis, ANALYSIS_PROMPT, "Hypothesis", node_text, context)
            .await?;
        decode(&completion, "analysis")
    }

    async fn identify_source(&self, analysis: &str, context: &str) -> GenerationResult<SourcePlan> {
        let completion = self
            .run(&self.pipes.source, SOURCE_PROMPT, "Analysis required", analysis, context)
            .await?;
        decode(&completion, "source")
    }
}
