use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use exam_core::model::{Subject, Topic, TopicPerformance, WeaknessAnalysis, WeaknessNarrative};

use crate::config::NarrativeConfig;
use crate::error::NarrativeError;

/// Structured input handed to the narrative provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub subject: Subject,
    pub primary_weakness: Topic,
    pub topics: Vec<TopicPerformance>,
    pub strengths: Vec<Topic>,
    pub weaknesses: Vec<Topic>,
}

impl PerformanceSummary {
    #[must_use]
    pub fn from_analysis(analysis: &WeaknessAnalysis) -> Self {
        Self {
            subject: analysis.subject.clone(),
            primary_weakness: analysis.primary_weakness.clone(),
            topics: analysis.topics.clone(),
            strengths: analysis.strengths.clone(),
            weaknesses: analysis.weaknesses.clone(),
        }
    }

    fn prompt(&self) -> Result<String, NarrativeError> {
        let data =
            serde_json::to_string_pretty(self).map_err(|e| NarrativeError::Malformed(e.to_string()))?;
        Ok(format!(
            "You are a tutor reviewing a student's diagnostic exam.\n\
             Performance by topic (weakest first):\n{data}\n\n\
             Reply with a single JSON object with the keys \"summary\" (string), \
             \"keyFindings\" (array of strings), \"actionPlan\" (string) and \
             \"motivation\" (string). Do not add any other text."
        ))
    }
}

/// Produces free-text feedback for a performance summary.
#[async_trait]
pub trait NarrativeProvider: Send + Sync {
    /// # Errors
    ///
    /// Returns `NarrativeError` when the provider is unavailable or its answer
    /// cannot be used.
    async fn narrate(&self, summary: &PerformanceSummary)
    -> Result<WeaknessNarrative, NarrativeError>;
}

/// Narrative provider backed by an OpenAI-compatible chat-completions endpoint.
#[derive(Clone)]
pub struct ChatNarrativeProvider {
    client: Client,
    config: Option<NarrativeConfig>,
}

impl ChatNarrativeProvider {
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(NarrativeConfig::from_env())
    }

    #[must_use]
    pub fn new(config: Option<NarrativeConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.config.is_some()
    }
}

#[async_trait]
impl NarrativeProvider for ChatNarrativeProvider {
    async fn narrate(
        &self,
        summary: &PerformanceSummary,
    ) -> Result<WeaknessNarrative, NarrativeError> {
        let config = self.config.as_ref().ok_or(NarrativeError::Disabled)?;

        let url = format!(
            "{}/chat/completions",
            config.base_url.trim_end_matches('/')
        );
        let payload = ChatRequest {
            model: config.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content: summary.prompt()?,
            }],
            temperature: 0.4,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&config.api_key)
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NarrativeError::HttpStatus(response.status()));
        }

        let body: ChatResponse = response.json().await?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(NarrativeError::EmptyResponse)?;

        parse_narrative(&content)
    }
}

/// Parse a provider reply, tolerating a surrounding Markdown code fence.
///
/// # Errors
///
/// Returns `NarrativeError::EmptyResponse` for blank replies or an empty summary,
/// and `NarrativeError::Malformed` when the JSON does not match.
pub fn parse_narrative(content: &str) -> Result<WeaknessNarrative, NarrativeError> {
    let trimmed = content.trim();
    let body = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    if body.is_empty() {
        return Err(NarrativeError::EmptyResponse);
    }
    let narrative: WeaknessNarrative =
        serde_json::from_str(body).map_err(|e| NarrativeError::Malformed(e.to_string()))?;
    if narrative.summary.trim().is_empty() {
        return Err(NarrativeError::EmptyResponse);
    }
    Ok(narrative)
}

/// Feedback assembled from the analysis alone, used when no provider answer is available.
#[must_use]
pub fn template_narrative(analysis: &WeaknessAnalysis) -> WeaknessNarrative {
    let join = |topics: &[Topic]| {
        topics
            .iter()
            .map(Topic::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    };

    let summary = format!(
        "In {} your weakest topic was {}.",
        analysis.subject, analysis.primary_weakness
    );
    let key_findings = analysis
        .topics
        .iter()
        .map(|t| {
            format!(
                "{}: {} of {} correct ({:.0}%)",
                t.topic,
                t.correct,
                t.total(),
                t.percentage
            )
        })
        .collect();
    let action_plan = if analysis.weaknesses.is_empty() {
        format!(
            "Review {} first, then keep practising every topic.",
            analysis.primary_weakness
        )
    } else {
        format!("Focus your practice on: {}.", join(&analysis.weaknesses))
    };
    let motivation = if analysis.strengths.is_empty() {
        "Every question you practise now makes the next phase easier.".to_string()
    } else {
        format!(
            "You already do well in {}. Build on that.",
            join(&analysis.strengths)
        )
    };

    WeaknessNarrative {
        summary,
        key_findings,
        action_plan,
        motivation,
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Debug, Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use exam_core::model::{AttemptId, StudentId};
    use exam_core::time::fixed_now;

    fn analysis() -> WeaknessAnalysis {
        WeaknessAnalysis {
            student_id: StudentId::new("stu-1").unwrap(),
            subject: Subject::new("Matemáticas").unwrap(),
            source_attempt: AttemptId::new("MA-1").unwrap(),
            primary_weakness: Topic::new("Álgebra").unwrap(),
            topics: vec![
                TopicPerformance::new(Topic::new("Álgebra").unwrap(), 1, 3),
                TopicPerformance::new(Topic::new("Geometría").unwrap(), 4, 0),
            ],
            strengths: vec![Topic::new("Geometría").unwrap()],
            weaknesses: vec![Topic::new("Álgebra").unwrap()],
            narrative: None,
            narrative_source: None,
            generated_at: fixed_now(),
        }
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"summary\":\"s\",\"keyFindings\":[\"a\"],\"actionPlan\":\"p\",\"motivation\":\"m\"}\n```";
        let narrative = parse_narrative(reply).unwrap();
        assert_eq!(narrative.summary, "s");
        assert_eq!(narrative.key_findings, vec!["a".to_string()]);
    }

    #[test]
    fn rejects_prose_and_blank_replies() {
        assert!(matches!(
            parse_narrative("Great job!"),
            Err(NarrativeError::Malformed(_))
        ));
        assert!(matches!(
            parse_narrative("  "),
            Err(NarrativeError::EmptyResponse)
        ));
    }

    #[test]
    fn template_mentions_weak_and_strong_topics() {
        let narrative = template_narrative(&analysis());
        assert!(narrative.summary.contains("Álgebra"));
        assert_eq!(narrative.key_findings.len(), 2);
        assert_eq!(narrative.key_findings[0], "Álgebra: 1 of 4 correct (25%)");
        assert!(narrative.action_plan.contains("Álgebra"));
        assert!(narrative.motivation.contains("Geometría"));
    }

    #[tokio::test]
    async fn disabled_provider_reports_disabled() {
        let provider = ChatNarrativeProvider::new(None);
        assert!(!provider.enabled());
        let err = provider
            .narrate(&PerformanceSummary::from_analysis(&analysis()))
            .await
            .unwrap_err();
        assert!(matches!(err, NarrativeError::Disabled));
    }
}
