use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serenity::async_trait;

use crate::config::GraderConfig;
use crate::homework::{Grader, GradingRequest};
use crate::models::{Verdict, VerdictKind};

const SYSTEM_PROMPT: &str = "You are a friendly but demanding course curator checking a student's homework. \
Decide whether the answer shows the student understood the lesson's task. \
Reply with a JSON object and nothing else: \
{\"verdict\": \"ACCEPT\" or \"REVISE\", \"message\": \"two or three sentences addressed to the student\"}. \
When the verdict is REVISE, the message must say what to improve.";

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct RawVerdict {
    verdict: String,
    message: String,
}

/// Grades free-text homework with an OpenAI-compatible chat-completions endpoint.
pub struct LlmGrader {
    client: Client,
    config: GraderConfig,
}

impl LlmGrader {
    pub fn new(config: GraderConfig) -> Self {
        Self { client: Client::new(), config }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Grader for LlmGrader {
    async fn grade(&self, request: &GradingRequest<'_>) -> Result<Verdict> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: vec![
                ChatMessage { role: "system", content: String::from(SYSTEM_PROMPT) },
                ChatMessage { role: "user", content: user_prompt(request) },
            ],
            temperature: 0.3,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self.client
            .post(self.endpoint())
            .headers(super::json_headers(&self.config.api_key)?)
            .json(&body)
            .send()
            .await
            .context("Couldn't reach the grading API.")?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(anyhow!("Grading API returned {status}: {detail}"));
        }

        let content = response
            .json::<ChatResponse>()
            .await
            .context("Couldn't deserialize the grading API response.")?
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .context("Grading API response had no content.")?;

        parse_verdict(&content)
    }
}

fn user_prompt(request: &GradingRequest<'_>) -> String {
    format!(
        "Lesson {}: {}\n\nTask:\n{}\n\nStudent's answer:\n{}",
        request.lesson_order, request.topic, request.task, request.answer
    )
}

/// Reads the model's JSON reply. Anything that isn't a clear ACCEPT or REVISE is an
/// error, never a verdict.
pub(crate) fn parse_verdict(content: &str) -> Result<Verdict> {
    let json = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let raw: RawVerdict = serde_json::from_str(json)
        .with_context(|| format!("Grader reply isn't a verdict object: {content}"))?;
    let kind = VerdictKind::parse(&raw.verdict)
        .with_context(|| format!("Unknown verdict from grader: {}", raw.verdict))?;

    if raw.message.trim().is_empty() {
        return Err(anyhow!("Grader gave a {} verdict without a message", kind.as_str()));
    }

    Ok(Verdict { kind, message: raw.message.trim().to_string() })
}
