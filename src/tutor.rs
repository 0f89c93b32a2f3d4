// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Solve and clarify flows on top of a vision model

use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ImageConfig, PromptConfig};
use crate::gemini::VisionModel;
use crate::imaging;
use crate::session::{ChatTurn, SessionStore, TurnRole};
use crate::{MathLensError, Result};

/// Answer to a follow-up question
#[derive(Debug, Clone)]
pub struct Clarification {
    pub doubt: String,
    pub answer: String,
}

/// Build the prompt for a follow-up question.
///
/// The prior answer and every earlier exchange are included so the model can
/// refer back to them; the image is sent again alongside.
pub fn clarify_prompt(prompts: &PromptConfig, solution: &str, history: &[ChatTurn], doubt: &str) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "{}", prompts.clarify.trim());
    let _ = write!(prompt, "\nYour previous solution:\n{}\n", solution.trim());

    if !history.is_empty() {
        prompt.push_str("\nConversation so far:\n");
        for turn in history {
            let speaker = match turn.role {
                TurnRole::Doubt => "Student",
                TurnRole::Clarification => "Tutor",
            };
            let _ = writeln!(prompt, "{}: {}", speaker, turn.text.trim());
        }
    }

    let _ = write!(prompt, "\nStudent's doubt:\n{}", doubt.trim());
    prompt
}

pub struct Tutor {
    model: Arc<dyn VisionModel>,
    prompts: PromptConfig,
    image: ImageConfig,
}

impl Tutor {
    pub fn new(model: Arc<dyn VisionModel>, prompts: PromptConfig, image: ImageConfig) -> Self {
        Self { model, prompts, image }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    fn prepare(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        imaging::prepare_for_model(bytes, self.image.max_dimension, self.image.jpeg_quality)
    }

    /// OCR and solve the captured photo, storing the answer in the session
    pub async fn solve(&self, store: &SessionStore, id: &Uuid) -> Result<String> {
        let snapshot = store.get(id)?;
        let image = snapshot.image().ok_or(MathLensError::NoImage)?;
        let prepared = self.prepare(&image.bytes)?;

        info!("Solving session {} with {}", id, self.model.name());
        let solution = self.model
            .ask(&self.prompts.solve, &prepared, "image/jpeg")
            .await
            .map_err(|e| {
                warn!("Solve failed for session {}: {}", id, e);
                e
            })?;

        store.with_session(id, |session| {
            if session.revision() != snapshot.revision() {
                return Err(MathLensError::SessionChanged);
            }
            session.set_solution(solution.clone())
        })?;

        Ok(solution)
    }

    /// Answer a doubt about the current solution and append it to the history
    pub async fn clarify(&self, store: &SessionStore, id: &Uuid, doubt: &str) -> Result<Clarification> {
        let doubt = doubt.trim();
        if doubt.is_empty() {
            return Err(MathLensError::InvalidInput("Doubt must not be empty".to_string()));
        }

        let snapshot = store.get(id)?;
        let image = snapshot.image().ok_or(MathLensError::NoImage)?;
        let solution = snapshot.solution().ok_or(MathLensError::NoSolution)?;

        let prompt = clarify_prompt(&self.prompts, solution, snapshot.history(), doubt);
        let prepared = self.prepare(&image.bytes)?;

        info!("Clarifying session {} (turn {})", id, snapshot.history().len() / 2 + 1);
        let answer = self.model
            .ask(&prompt, &prepared, "image/jpeg")
            .await
            .map_err(|e| {
                warn!("Clarification failed for session {}: {}", id, e);
                e
            })?;

        store.with_session(id, |session| {
            if session.revision() != snapshot.revision() {
                return Err(MathLensError::SessionChanged);
            }
            session.record_clarification(doubt.to_string(), answer.clone())
        })?;

        Ok(Clarification { doubt: doubt.to_string(), answer })
    }
}
