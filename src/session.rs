// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! In-memory per-user session state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{MathLensError, Result};

/// Photo captured for a session
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn new(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: mime_type.into(),
            captured_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Doubt,
    Clarification,
}

/// One entry of the follow-up conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Idle,
    Captured,
    Solved,
    Clarifying,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    image: Option<CapturedImage>,
    solution: Option<String>,
    history: Vec<ChatTurn>,
    /// Bumped on every change to the image, solution or history
    revision: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            image: None,
            solution: None,
            history: Vec::new(),
            revision: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        match (&self.image, &self.solution) {
            (None, _) => SessionPhase::Idle,
            (Some(_), None) => SessionPhase::Captured,
            (Some(_), Some(_)) if self.history.is_empty() => SessionPhase::Solved,
            (Some(_), Some(_)) => SessionPhase::Clarifying,
        }
    }

    pub fn image(&self) -> Option<&CapturedImage> {
        self.image.as_ref()
    }

    pub fn solution(&self) -> Option<&str> {
        self.solution.as_deref()
    }

    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Store a new photo. Any previous answer belongs to the old photo and is dropped.
    pub fn capture(&mut self, image: CapturedImage) {
        self.image = Some(image);
        self.solution = None;
        self.history.clear();
        self.revision += 1;
    }

    /// Swap the stored photo for a transformed version of itself
    pub fn replace_image_bytes(&mut self, bytes: Vec<u8>, mime_type: impl Into<String>) -> Result<()> {
        let image = self.image.as_mut().ok_or(MathLensError::NoImage)?;
        image.bytes = bytes;
        image.mime_type = mime_type.into();
        self.solution = None;
        self.history.clear();
        self.revision += 1;
        Ok(())
    }

    pub fn set_solution(&mut self, solution: String) -> Result<()> {
        if self.image.is_none() {
            return Err(MathLensError::NoImage);
        }
        self.solution = Some(solution);
        self.history.clear();
        self.revision += 1;
        Ok(())
    }

    /// Append a doubt and its answer, in that order
    pub fn record_clarification(&mut self, doubt: String, clarification: String) -> Result<()> {
        if self.solution.is_none() {
            return Err(MathLensError::NoSolution);
        }
        let now = Utc::now();
        self.history.push(ChatTurn { role: TurnRole::Doubt, text: doubt, at: now });
        self.history.push(ChatTurn { role: TurnRole::Clarification, text: clarification, at: now });
        self.revision += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.image = None;
        self.solution = None;
        self.history.clear();
        self.revision += 1;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// All live sessions, keyed by id
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Session>> {
        // Session data stays consistent even if a holder panicked
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn create(&self) -> Uuid {
        let session = Session::new();
        let id = session.id;
        self.lock().insert(id, session);
        tracing::debug!("Created session {}", id);
        id
    }

    /// Snapshot of a session
    pub fn get(&self, id: &Uuid) -> Result<Session> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| MathLensError::SessionNotFound(id.to_string()))
    }

    /// Run `f` against the live session. Do not await inside `f`.
    pub fn with_session<T, F>(&self, id: &Uuid, f: F) -> Result<T>
    where
        F: FnOnce(&mut Session) -> Result<T>,
    {
        let mut sessions = self.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| MathLensError::SessionNotFound(id.to_string()))?;
        f(session)
    }

    pub fn remove(&self, id: &Uuid) -> Result<()> {
        self.lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| MathLensError::SessionNotFound(id.to_string()))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> CapturedImage {
        CapturedImage::new(vec![0xff, 0xd8, 0xff], "image/jpeg")
    }

    #[test]
    fn test_phases() {
        let mut session = Session::new();
        assert_eq!(session.phase(), SessionPhase::Idle);

        session.capture(image());
        assert_eq!(session.phase(), SessionPhase::Captured);

        session.set_solution("x = 2".to_string()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Solved);

        session.record_clarification("why?".into(), "because".into()).unwrap();
        assert_eq!(session.phase(), SessionPhase::Clarifying);

        session.reset();
        assert_eq!(session.phase(), SessionPhase::Idle);
    }

    #[test]
    fn test_history_grows_by_two_in_order() {
        let mut session = Session::new();
        session.capture(image());
        session.set_solution("x = 2".to_string()).unwrap();

        session.record_clarification("first doubt".into(), "first answer".into()).unwrap();
        session.record_clarification("second doubt".into(), "second answer".into()).unwrap();

        let history = session.history();
        assert_eq!(history.len(), 4);
        let roles: Vec<TurnRole> = history.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![
            TurnRole::Doubt,
            TurnRole::Clarification,
            TurnRole::Doubt,
            TurnRole::Clarification,
        ]);
        assert_eq!(history[0].text, "first doubt");
        assert_eq!(history[3].text, "second answer");
    }

    #[test]
    fn test_clarification_bumps_revision() {
        let mut session = Session::new();
        session.capture(image());
        session.set_solution("x = 2".to_string()).unwrap();
        let revision = session.revision();

        session.record_clarification("why?".into(), "because".into()).unwrap();
        assert!(session.revision() > revision);

        let revision = session.revision();
        assert!(session.record_clarification("again".into(), "no".into()).is_ok());
        assert!(session.revision() > revision);
    }

    #[test]
    fn test_recapture_clears_answer() {
        let mut session = Session::new();
        session.capture(image());
        session.set_solution("x = 2".to_string()).unwrap();
        session.record_clarification("why?".into(), "because".into()).unwrap();
        let revision = session.revision();

        session.capture(image());
        assert!(session.solution().is_none());
        assert!(session.history().is_empty());
        assert!(session.revision() > revision);
    }

    #[test]
    fn test_out_of_order_operations_rejected() {
        let mut session = Session::new();
        assert!(matches!(session.set_solution("x".into()), Err(MathLensError::NoImage)));
        assert!(matches!(
            session.replace_image_bytes(vec![1], "image/jpeg"),
            Err(MathLensError::NoImage)
        ));

        session.capture(image());
        assert!(matches!(
            session.record_clarification("why?".into(), "because".into()),
            Err(MathLensError::NoSolution)
        ));
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_store_lifecycle() {
        let store = SessionStore::new();
        assert!(store.is_empty());

        let id = store.create();
        assert_eq!(store.len(), 1);

        store.with_session(&id, |s| {
            s.capture(image());
            Ok(())
        }).unwrap();
        assert_eq!(store.get(&id).unwrap().phase(), SessionPhase::Captured);

        store.remove(&id).unwrap();
        assert!(matches!(store.get(&id), Err(MathLensError::SessionNotFound(_))));
        assert!(store.remove(&id).is_err());
    }
}
