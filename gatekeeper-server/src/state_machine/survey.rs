//! Survey engine: starting a request and collecting answers.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use super::error::LifecycleError;
use super::event::Event;
use super::interpreter::InterpreterContext;
use super::state::{RequestRecord, RequestState, RequesterId, RequesterProfile};
use super::store::RequestStore;

/// What `next_question` reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextQuestion {
    Question { index: usize, text: String },
    /// Every question is answered.
    Complete,
}

pub struct SurveyEngine {
    store: Arc<RequestStore>,
    ctx: Arc<InterpreterContext>,
    /// Snapshotted into each new record.
    questions: Vec<String>,
}

impl SurveyEngine {
    pub fn new(
        store: Arc<RequestStore>,
        ctx: Arc<InterpreterContext>,
        questions: Vec<String>,
    ) -> Self {
        Self {
            store,
            ctx,
            questions,
        }
    }

    pub fn questions(&self) -> &[String] {
        &self.questions
    }

    /// Start a survey and ask the first question.
    pub async fn begin(
        &self,
        requester: RequesterId,
        profile: RequesterProfile,
    ) -> Result<RequestRecord, LifecycleError> {
        let _guard = self.store.lock_identity(requester).await;

        if self.store.repository().get_active(requester).await?.is_some() {
            return Err(LifecycleError::DuplicateActiveRequest(requester));
        }

        let record = RequestRecord::new(requester, profile, self.questions.clone(), Utc::now());
        self.store.create(&record).await?;
        self.store
            .drive(record, Event::SurveyStarted, &self.ctx)
            .await
    }

    /// Record the answer to the current question.
    ///
    /// Returns whether the survey is now complete. Completing it also posts
    /// the summary for review.
    pub async fn submit_answer(
        &self,
        requester: RequesterId,
        text: &str,
    ) -> Result<bool, LifecycleError> {
        let _guard = self.store.lock_identity(requester).await;

        let record = match self.store.repository().get_active(requester).await? {
            Some(record)
                if record.state == RequestState::InSurvey
                    && record.next_question_index().is_some() =>
            {
                record
            }
            _ => return Err(LifecycleError::NoActiveSurvey(requester)),
        };

        let text = text.trim();
        if text.is_empty() {
            debug!("Empty answer from requester {}", requester);
            return Err(LifecycleError::InvalidAnswer);
        }

        let record = self
            .store
            .drive(
                record,
                Event::AnswerSubmitted {
                    text: text.to_string(),
                },
                &self.ctx,
            )
            .await?;
        Ok(record.survey_complete())
    }

    /// The question the requester should answer next.
    pub async fn next_question(
        &self,
        requester: RequesterId,
    ) -> Result<NextQuestion, LifecycleError> {
        let record = self
            .store
            .repository()
            .get_active(requester)
            .await?
            .ok_or(LifecycleError::NoActiveSurvey(requester))?;

        if record.state != RequestState::InSurvey {
            return Ok(NextQuestion::Complete);
        }
        Ok(match record.next_question_index() {
            Some(index) => NextQuestion::Question {
                index,
                text: record.questions[index].clone(),
            },
            None => NextQuestion::Complete,
        })
    }
}
