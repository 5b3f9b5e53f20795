//! Request orchestration: question → intent → query → engine → answer.
//!
//! One call to [`Assistant::answer`] walks a small state machine:
//!
//! ```text
//! AwaitingIntent ─┬─ success       → compile → engine → normalize → explanation → render
//!                 ├─ missing_info  → clarification question
//!                 ├─ off_topic     → fixed refusal
//!                 ├─ <other>       → apology (logged as an anomaly)
//!                 └─ <not JSON>    → ask to rephrase
//! ```
//!
//! Every stage returns its own `Result`. Compile and engine failures abort
//! the request; the explanation lookup and the rendering call degrade
//! instead, because once a symbolic result exists it must reach the user.

use std::collections::BTreeMap;
use std::time::Instant;

use miette::Diagnostic;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::compile::compile;
use crate::config::{BUILTIN_NLG_PROMPT, BUILTIN_NLU_PROMPT, BridgeConfig};
use crate::error::{BridgeResult, CompileError};
use crate::intent::{Intent, IntentStatus, parse_intent};
use crate::kb::{KbError, KnowledgeBase, lookup_explanation};
use crate::llm::{ChatClient, Completion, CompletionRequest, LlmError};
use crate::normalize::{SolutionSet, normalize};
use crate::schema::SchemaRegistry;
use crate::term::ArgValue;

/// Fallback when a `missing_info` intent carries no question.
pub const DEFAULT_CLARIFICATION: &str = "Could you please provide some more details?";
pub const OFF_TOPIC_REPLY: &str = "I can only help with questions about the SSENSE return policy. Could you ask something related to returns, please?";
pub const UNKNOWN_STATUS_REPLY: &str =
    "I'm sorry, I encountered an unexpected issue understanding that request.";
pub const REPHRASE_REPLY: &str =
    "I'm having trouble understanding that. Could you please rephrase your question?";
pub const RENDERING_FALLBACK: &str = "I found the information based on the policy, but I'm having trouble phrasing the answer right now. Please try rephrasing your question.";

/// A request that could not be answered.
#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("understanding step failed: {0}")]
    #[diagnostic(
        code(bridge::pipeline::understanding),
        help("The language model could not be reached or returned an error.")
    )]
    Understanding(#[source] LlmError),

    #[error("intent has status success but no predicate")]
    #[diagnostic(
        code(bridge::pipeline::missing_predicate),
        help("The understanding prompt must always name a predicate on success.")
    )]
    MissingPredicate,

    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Kb(KbError),

    #[error("request was cancelled")]
    #[diagnostic(code(bridge::pipeline::cancelled))]
    Cancelled,
}

impl From<KbError> for PipelineError {
    fn from(e: KbError) -> Self {
        match e {
            KbError::Cancelled { .. } => Self::Cancelled,
            other => Self::Kb(other),
        }
    }
}

impl PipelineError {
    /// Text safe to show a caller. Details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::MissingPredicate | Self::Compile(_) => "Internal error preparing KB query.",
            Self::Kb(KbError::Timeout { .. }) | Self::Understanding(LlmError::Timeout { .. }) => {
                "The request timed out. Please try again."
            }
            Self::Kb(_) => "Internal error querying knowledge base.",
            Self::Understanding(_) => {
                "Failed to process message due to an unexpected internal error."
            }
            Self::Cancelled => "The request was cancelled.",
        }
    }
}

/// Which terminal the state machine reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Answered,
    MissingInfo,
    OffTopic,
    UnknownStatus,
    IntentUnparsed,
}

/// Everything known about one knowledge-base lookup. This, plus the
/// question, is the only input to the rendering step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KbAnswer {
    pub predicate: String,
    pub args: BTreeMap<String, ArgValue>,
    pub query: String,
    pub result: SolutionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl KbAnswer {
    /// The payload handed to the rendering model.
    pub fn rendering_context(&self, question: &str) -> serde_json::Value {
        json!({
            "user_question": question,
            "kb_query": {
                "predicate_called": self.predicate,
                "args_provided": self.args,
                "query_string": self.query,
                "result": self.result,
            }
        })
    }
}

/// A handled reply, serialized as the HTTP body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    pub debug: serde_json::Value,
    #[serde(skip)]
    pub outcome: Outcome,
    #[serde(skip)]
    pub kb: Option<KbAnswer>,
}

impl ChatReply {
    fn canned(outcome: Outcome, response: impl Into<String>, debug: serde_json::Value) -> Self {
        Self {
            response: response.into(),
            explanation: None,
            debug,
            outcome,
            kb: None,
        }
    }
}

/// Long-lived service handle. Built once at startup, then shared read-only.
pub struct Assistant {
    schema: SchemaRegistry,
    kb: Box<dyn KnowledgeBase>,
    llm: Box<dyn Completion>,
    nlu_prompt: String,
    nlg_prompt: String,
    nlu_temperature: f32,
    nlg_temperature: f32,
}

impl Assistant {
    /// Assemble an assistant with the built-in prompts.
    pub fn new(
        schema: SchemaRegistry,
        kb: Box<dyn KnowledgeBase>,
        llm: Box<dyn Completion>,
    ) -> Self {
        let nlu_prompt = with_catalog(BUILTIN_NLU_PROMPT, &schema);
        Self {
            schema,
            kb,
            llm,
            nlu_prompt,
            nlg_prompt: BUILTIN_NLG_PROMPT.to_string(),
            nlu_temperature: 0.1,
            nlg_temperature: 0.3,
        }
    }

    /// Replace the system prompts. The predicate catalog is appended to the
    /// understanding prompt.
    pub fn with_prompts(mut self, nlu: &str, nlg: impl Into<String>) -> Self {
        self.nlu_prompt = with_catalog(nlu, &self.schema);
        self.nlg_prompt = nlg.into();
        self
    }

    pub fn with_temperatures(mut self, nlu: f32, nlg: f32) -> Self {
        self.nlu_temperature = nlu;
        self.nlg_temperature = nlg;
        self
    }

    /// Build every handle from configuration.
    pub fn from_config(config: &BridgeConfig) -> BridgeResult<Self> {
        let schema = config.schema.load()?;
        tracing::info!(predicates = schema.len(), "schema registry loaded");
        let kb = config.kb.open()?;
        let llm = ChatClient::new(config.llm.clone())?;
        if llm.probe() {
            tracing::info!(model = llm.model(), provider = ?config.llm.provider, "LLM client ready");
        } else {
            tracing::warn!(
                url = %config.llm.base_url,
                "LLM endpoint not reachable, requests will fail until it is up"
            );
        }
        let nlu = config.prompts.nlu_prompt()?;
        let nlg = config.prompts.nlg_prompt()?;
        Ok(Self::new(schema, kb, Box::new(llm))
            .with_prompts(&nlu, nlg)
            .with_temperatures(config.llm.nlu_temperature, config.llm.nlg_temperature))
    }

    pub fn schema(&self) -> &SchemaRegistry {
        &self.schema
    }

    pub fn kb_name(&self) -> &str {
        self.kb.name()
    }

    /// Answer one question end to end.
    pub fn answer(&self, question: &str, cancel: &CancelToken) -> Result<ChatReply, PipelineError> {
        let started = Instant::now();
        checkpoint(cancel)?;

        tracing::info!(question, "understanding question");
        let raw = self
            .llm
            .complete(&CompletionRequest {
                system: &self.nlu_prompt,
                user: question,
                temperature: self.nlu_temperature,
                json: true,
            })
            .map_err(PipelineError::Understanding)?;
        tracing::debug!(raw = %raw, "understanding output");

        let reply = match parse_intent(&raw) {
            Ok(intent) => self.dispatch(question, &intent, cancel)?,
            Err(e) => {
                tracing::warn!(error = %e, raw = %raw, "understanding output unparsable");
                ChatReply::canned(
                    Outcome::IntentUnparsed,
                    REPHRASE_REPLY,
                    json!({ "error": "NLU JSON Parsing Failed", "raw_nlu": raw }),
                )
            }
        };

        tracing::info!(
            outcome = ?reply.outcome,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request handled"
        );
        Ok(reply)
    }

    /// Route a parsed intent to its terminal.
    pub fn dispatch(
        &self,
        question: &str,
        intent: &Intent,
        cancel: &CancelToken,
    ) -> Result<ChatReply, PipelineError> {
        let debug = json!({ "nlu": intent.raw });
        match &intent.status {
            IntentStatus::MissingInfo => {
                tracing::info!(missing = ?intent.missing_args, "intent needs clarification");
                let question = intent
                    .clarification_question
                    .as_deref()
                    .filter(|q| !q.trim().is_empty())
                    .unwrap_or(DEFAULT_CLARIFICATION);
                Ok(ChatReply::canned(Outcome::MissingInfo, question, debug))
            }
            IntentStatus::OffTopic => {
                tracing::info!(reason = ?intent.off_topic_reason, "intent is off topic");
                Ok(ChatReply::canned(Outcome::OffTopic, OFF_TOPIC_REPLY, debug))
            }
            IntentStatus::Unknown(status) => {
                tracing::error!(status = %status, intent = %intent.raw, "unexpected intent status");
                Ok(ChatReply::canned(Outcome::UnknownStatus, UNKNOWN_STATUS_REPLY, debug))
            }
            IntentStatus::Success => {
                let Some(predicate) = intent.predicate() else {
                    tracing::error!(intent = %intent.raw, "success intent without predicate");
                    return Err(PipelineError::MissingPredicate);
                };
                let answer = self.lookup(predicate, &intent.args, cancel)?;
                checkpoint(cancel)?;
                let response = self.render(question, &answer);
                Ok(ChatReply {
                    response,
                    explanation: answer.explanation.clone(),
                    debug: json!({
                        "nlu": intent.raw,
                        "prolog_query": answer.query,
                        "prolog_result": answer.result,
                    }),
                    outcome: Outcome::Answered,
                    kb: Some(answer),
                })
            }
        }
    }

    /// Compile, execute and normalize one predicate call. See [`run_query`].
    pub fn lookup(
        &self,
        predicate: &str,
        args: &BTreeMap<String, ArgValue>,
        cancel: &CancelToken,
    ) -> Result<KbAnswer, PipelineError> {
        run_query(&self.schema, self.kb.as_ref(), predicate, args, cancel)
    }

    /// Phrase a result. Falls back to a canned reply on any failure.
    pub fn render(&self, question: &str, answer: &KbAnswer) -> String {
        let context = answer.rendering_context(question);
        let user = serde_json::to_string_pretty(&context).unwrap_or_else(|_| context.to_string());
        tracing::debug!(context = %user, "rendering input");
        match self.llm.complete(&CompletionRequest {
            system: &self.nlg_prompt,
            user: &user,
            temperature: self.nlg_temperature,
            json: false,
        }) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("rendering returned empty text, using fallback");
                RENDERING_FALLBACK.to_string()
            }
            Err(e) => {
                tracing::error!(error = %e, "rendering failed, using fallback");
                RENDERING_FALLBACK.to_string()
            }
        }
    }
}

impl std::fmt::Debug for Assistant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Assistant")
            .field("predicates", &self.schema.len())
            .field("kb", &self.kb.name())
            .finish_non_exhaustive()
    }
}

/// Compile, execute and normalize one predicate call, then fetch its
/// explanation if it succeeded.
pub fn run_query(
    schema: &SchemaRegistry,
    kb: &dyn KnowledgeBase,
    predicate: &str,
    args: &BTreeMap<String, ArgValue>,
    cancel: &CancelToken,
) -> Result<KbAnswer, PipelineError> {
    let query = compile(schema, predicate, args).inspect_err(|e| {
        tracing::error!(predicate, error = %e, "query compilation failed");
    })?;
    let query_text = query.to_string();
    checkpoint(cancel)?;

    tracing::info!(query = %query_text, backend = kb.name(), "querying knowledge base");
    let raw = kb.query(&query, cancel).inspect_err(|e| {
        tracing::error!(query = %query_text, error = %e, "knowledge base query failed");
    })?;
    let result = normalize(raw);
    tracing::info!(
        query = %query_text,
        success = result.success,
        solutions = result.solutions.len(),
        "knowledge base answered"
    );

    let explanation = if result.success {
        checkpoint(cancel)?;
        explain(kb, predicate, cancel)?
    } else {
        None
    };

    Ok(KbAnswer {
        predicate: predicate.to_string(),
        args: args.clone(),
        query: query_text,
        result,
        explanation,
    })
}

/// Explanation lookup. Engine failures are swallowed; cancellation is not.
fn explain(
    kb: &dyn KnowledgeBase,
    predicate: &str,
    cancel: &CancelToken,
) -> Result<Option<String>, PipelineError> {
    match lookup_explanation(kb, predicate, cancel) {
        Ok(found) => {
            if found.is_none() {
                tracing::info!(predicate, "no explanation recorded");
            }
            Ok(found)
        }
        Err(KbError::Cancelled { .. }) => Err(PipelineError::Cancelled),
        Err(e) => {
            tracing::warn!(predicate, error = %e, "explanation lookup failed, continuing without it");
            Ok(None)
        }
    }
}

fn checkpoint(cancel: &CancelToken) -> Result<(), PipelineError> {
    if cancel.is_cancelled() {
        tracing::info!("request cancelled");
        return Err(PipelineError::Cancelled);
    }
    Ok(())
}

fn with_catalog(prompt: &str, schema: &SchemaRegistry) -> String {
    format!("{}\n{}", prompt.trim_end(), schema.catalog())
}
