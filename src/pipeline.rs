//! The answer pipeline: retrieve, then generate.
//!
//! Modelled as an explicit state machine so each node can be driven and
//! tested on its own:
//!
//! ```text
//! start ──▶ RetrieveContext ──▶ GenerateResponse ──▶ End
//! ```
//!
//! Every transition is unconditional and the graph has no cycles. A
//! generation failure ends in [`PipelineState::End`] with the fixed
//! [`APOLOGY`] reply; it never re-enters retrieval. Nothing is kept
//! between runs.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use tutor_rag_core::embedding::EmbeddingProvider;
use tutor_rag_core::models::{ConversationTurn, OneOrMany};
use tutor_rag_core::store::{KnowledgeStore, Store};

use crate::fusion::{fuse, AssembledContext, FuseRequest, FusionSettings};
use crate::generation::Generator;
use crate::prompt::{user_turn, SYSTEM_PROMPT};

/// Reply used whenever the generator fails.
pub const APOLOGY: &str =
    "I'm sorry, I couldn't generate a response right now. Please try again in a moment.";

#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    pub owner_id: String,
    #[serde(default)]
    pub doc_filter: Option<OneOrMany<String>>,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
}

impl<'a> From<&'a AnswerRequest> for FuseRequest<'a> {
    fn from(request: &'a AnswerRequest) -> Self {
        FuseRequest {
            query: &request.question,
            owner_id: &request.owner_id,
            doc_filter: request.doc_filter.clone(),
            history: &request.history,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub reply: String,
    pub generation_failed: bool,
    pub context: AssembledContext,
}

#[derive(Debug)]
pub enum PipelineState {
    RetrieveContext(AnswerRequest),
    GenerateResponse {
        request: AnswerRequest,
        context: AssembledContext,
    },
    End(Answer),
}

pub struct Pipeline<'a> {
    store: &'a dyn Store,
    kb: &'a dyn KnowledgeStore,
    embedder: &'a dyn EmbeddingProvider,
    generator: &'a dyn Generator,
    settings: &'a FusionSettings,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        store: &'a dyn Store,
        kb: &'a dyn KnowledgeStore,
        embedder: &'a dyn EmbeddingProvider,
        generator: &'a dyn Generator,
        settings: &'a FusionSettings,
    ) -> Self {
        Self {
            store,
            kb,
            embedder,
            generator,
            settings,
        }
    }

    pub fn start(request: AnswerRequest) -> PipelineState {
        PipelineState::RetrieveContext(request)
    }

    /// Advance one node. `End` is a fixed point.
    pub async fn step(&self, state: PipelineState) -> PipelineState {
        match state {
            PipelineState::RetrieveContext(request) => {
                let context = fuse(
                    self.store,
                    self.kb,
                    self.embedder,
                    self.settings,
                    FuseRequest::from(&request),
                )
                .await;
                PipelineState::GenerateResponse { request, context }
            }
            PipelineState::GenerateResponse { request, context } => {
                let turn = user_turn(&request.question, &context);
                match self
                    .generator
                    .generate(SYSTEM_PROMPT, &context.history, &turn)
                    .await
                {
                    Ok(reply) => PipelineState::End(Answer {
                        reply,
                        generation_failed: false,
                        context,
                    }),
                    Err(e) => {
                        error!(
                            owner_id = %request.owner_id,
                            model = self.generator.model_name(),
                            error = %format!("{:#}", e),
                            "generation failed; replying with apology"
                        );
                        PipelineState::End(Answer {
                            reply: APOLOGY.to_string(),
                            generation_failed: true,
                            context,
                        })
                    }
                }
            }
            end @ PipelineState::End(_) => end,
        }
    }

    pub async fn run(&self, request: AnswerRequest) -> Answer {
        let mut state = Self::start(request);
        loop {
            state = match state {
                PipelineState::End(answer) => {
                    debug!(failed = answer.generation_failed, "pipeline finished");
                    return answer;
                }
                other => self.step(other).await,
            };
        }
    }
}
