//! Runs pipeline stages against sessions held in the in-memory store.
//!
//! The write lock is held only while swapping one session value for the next,
//! never across a gateway call.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::gateway::{GenerativeGateway, ImageFetcher};
use crate::models::{BrandBrief, BriefUpdate, ImageData, Stage};
use crate::pipeline;
use crate::prompts;
use crate::session::{Session, SessionError, StageFailure};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StudioError {
    #[error("session not found")]
    NotFound,
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to serialize session: {0}")]
    Snapshot(String),
}

/// Handles for the two tasks started by a concept selection.
pub struct GenerationHandle {
    pub image: JoinHandle<()>,
    pub text: JoinHandle<()>,
}

#[cfg(test)]
impl GenerationHandle {
    /// Resolves once neither half is pending.
    pub async fn finished(self) {
        let (image, text) = tokio::join!(self.image, self.text);
        if let Err(e) = image.and(text) {
            error!("❌ Generation task panicked: {}", e);
        }
    }
}

#[derive(Clone)]
pub struct Studio {
    sessions: Arc<RwLock<HashMap<Uuid, Session>>>,
    gateway: Arc<dyn GenerativeGateway>,
    fetcher: Arc<dyn ImageFetcher>,
}

impl Studio {
    pub fn new(gateway: Arc<dyn GenerativeGateway>, fetcher: Arc<dyn ImageFetcher>) -> Self {
        Self { sessions: Arc::default(), gateway, fetcher }
    }

    /// Swaps the session for the value produced by `f`. A validation failure is
    /// recorded on the session before it is returned to the caller.
    fn transition<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&Session) -> Result<(Session, T), SessionError>,
    ) -> Result<T, StudioError> {
        let mut guard = self.sessions.write();
        let current = guard.get_mut(&id).ok_or(StudioError::NotFound)?;
        match f(&*current) {
            Ok((next, out)) => {
                *current = next;
                Ok(out)
            }
            Err(e) => {
                if let SessionError::Invalid { stage, message } = &e {
                    *current = current.with_failure(StageFailure { stage: *stage, message: message.clone() });
                }
                Err(e.into())
            }
        }
    }

    fn apply(&self, id: Uuid, f: impl FnOnce(&Session) -> Session) {
        let mut guard = self.sessions.write();
        match guard.get_mut(&id) {
            Some(current) => *current = f(&*current),
            None => info!("🗑️ Session {} was discarded before its result arrived", id),
        }
    }

    pub fn create_session(&self, brief: BrandBrief) -> Session {
        let session = Session::new(Uuid::new_v4(), brief);
        self.sessions.write().insert(session.id, session.clone());
        info!("🎯 Created session {}", session.id);
        session
    }

    pub fn session(&self, id: Uuid) -> Result<Session, StudioError> {
        self.sessions.read().get(&id).cloned().ok_or(StudioError::NotFound)
    }

    /// Serialized snapshot including the derived phase.
    pub fn snapshot(&self, id: Uuid) -> Result<Value, StudioError> {
        let guard = self.sessions.read();
        let session = guard.get(&id).ok_or(StudioError::NotFound)?;
        serde_json::to_value(session.view()).map_err(|e| {
            error!("❌ Failed to serialize session {}: {}", id, e);
            StudioError::Snapshot(e.to_string())
        })
    }

    pub fn delete_session(&self, id: Uuid) -> Result<(), StudioError> {
        self.sessions.write().remove(&id).map(|_| ()).ok_or(StudioError::NotFound)
    }

    pub fn update_brief(&self, id: Uuid, update: BriefUpdate) -> Result<(), StudioError> {
        self.transition(id, |s| Ok((s.update_brief(update)?, ())))
    }

    pub fn set_source_image(&self, id: Uuid, image: Option<ImageData>) -> Result<(), StudioError> {
        self.transition(id, |s| Ok((s.set_source_image(image)?, ())))
    }

    pub fn dismiss_errors(&self, id: Uuid, stage: Option<Stage>) -> Result<(), StudioError> {
        self.transition(id, |s| Ok((s.dismiss_errors(stage), ())))
    }

    pub fn change_concept(&self, id: Uuid) -> Result<(), StudioError> {
        self.transition(id, |s| Ok((s.change_concept()?, ())))?;
        info!("↩️ Session {} went back to concept selection", id);
        Ok(())
    }

    pub fn reset(&self, id: Uuid) -> Result<(), StudioError> {
        self.transition(id, |s| Ok((s.reset()?, ())))?;
        info!("🔄 Session {} reset", id);
        Ok(())
    }

    pub fn prompt_summary(&self, id: Uuid) -> Result<Option<String>, StudioError> {
        let session = self.session(id)?;
        Ok(session.selection.as_ref().map(|direction| {
            prompts::poster_summary(
                &direction.concept,
                &direction.cta,
                session.brief.product_name(),
                session.brand_dna.as_ref().is_some_and(|d| d.logo_image.is_some()),
            )
        }))
    }

    pub async fn auto_fill(&self, id: Uuid) -> Result<(), StudioError> {
        let ticket = self.transition(id, |s| s.begin_auto_fill())?;
        info!("🚀 [{}] Auto-filling brief", id);

        let outcome = match pipeline::auto_fill(self.gateway.as_ref(), &ticket.description, &ticket.url).await {
            Ok(fill) => {
                let logo = match fill.logo_url.as_deref() {
                    Some(url) if ticket.wants_logo => self.fetcher.fetch(url).await,
                    _ => None,
                };
                info!("✅ [{}] Brief auto-filled (logo found: {})", id, logo.is_some());
                Ok((fill, logo))
            }
            Err(e) => {
                error!("❌ [{}] Auto-fill failed: {}", id, e);
                Err(StageFailure::new(Stage::AutoFill, e))
            }
        };
        self.apply(id, |s| s.finish_auto_fill(outcome));
        Ok(())
    }

    /// Brand-DNA research followed by ideation. Ideation consumes the DNA, so the
    /// two calls run one after the other.
    pub async fn analyze(&self, id: Uuid) -> Result<(), StudioError> {
        let ticket = self.transition(id, |s| s.begin_analysis())?;
        info!("🚀 [{}] Analyzing brand DNA", id);

        let gateway = self.gateway.as_ref();
        let outcome = match pipeline::research_brand_dna(gateway, &ticket.brief, Some(ticket.source())).await {
            Ok(dna) => {
                info!("✅ [{}] Brand DNA for '{}' ({} keywords)", id, dna.name, dna.keywords.len());
                match pipeline::ideate(gateway, &dna, ticket.source()).await {
                    Ok(concepts) => {
                        info!("✅ [{}] {} concepts generated", id, concepts.len());
                        Ok((dna, concepts))
                    }
                    Err(e) => {
                        error!("❌ [{}] Ideation failed: {}", id, e);
                        Err(StageFailure::new(Stage::Ideation, e))
                    }
                }
            }
            Err(e) => {
                error!("❌ [{}] Brand DNA research failed: {}", id, e);
                Err(StageFailure::new(Stage::BrandDna, e))
            }
        };
        self.apply(id, |s| s.finish_analysis(ticket.epoch, outcome));
        Ok(())
    }

    /// Starts hero image and post copy generation side by side. Each task writes
    /// its own result as soon as it resolves.
    pub fn select_concept(&self, id: Uuid, concept_id: &str, cta: &str) -> Result<GenerationHandle, StudioError> {
        let ticket = Arc::new(self.transition(id, |s| s.select_concept(concept_id, cta))?);
        let direction = &ticket.direction;
        info!("🎯 [{}] Generating '{}' with headline \"{}\"", id, direction.concept.title, direction.cta);

        let image = {
            let studio = self.clone();
            let ticket = Arc::clone(&ticket);
            tokio::spawn(async move {
                let gateway = studio.gateway.as_ref();
                let outcome = pipeline::generate_hero_image(gateway, &ticket.dna, ticket.source(), &ticket.direction)
                    .await
                    .map_err(|e| {
                        error!("❌ [{}] Hero image generation failed: {}", id, e);
                        StageFailure::new(Stage::HeroImage, e)
                    });
                if outcome.is_ok() {
                    info!("✅ [{}] Hero image generated", id);
                }
                studio.apply(id, |s| s.finish_hero_image(ticket.epoch, outcome));
            })
        };

        let text = {
            let studio = self.clone();
            let ticket = Arc::clone(&ticket);
            tokio::spawn(async move {
                let outcome = pipeline::generate_post_copy(
                    studio.gateway.as_ref(),
                    &ticket.dna,
                    &ticket.direction.concept,
                    ticket.product_name.as_deref(),
                )
                .await
                .map_err(|e| {
                    error!("❌ [{}] Post copy generation failed: {}", id, e);
                    StageFailure::new(Stage::PostCopy, e)
                });
                if let Ok(text) = &outcome {
                    info!("✅ [{}] Post copy generated ({} chars)", id, text.len());
                }
                studio.apply(id, |s| s.finish_post_copy(ticket.epoch, outcome));
            })
        };

        Ok(GenerationHandle { image, text })
    }

    pub async fn edit_image(&self, id: Uuid, instruction: &str) -> Result<(), StudioError> {
        let ticket = self.transition(id, |s| s.begin_edit(instruction))?;
        info!("🎨 [{}] Editing image: {}", id, ticket.instruction);

        let outcome = pipeline::edit_image(self.gateway.as_ref(), &ticket.image, &ticket.instruction)
            .await
            .map_err(|e| {
                error!("❌ [{}] Edit failed: {}", id, e);
                StageFailure::new(Stage::Edit, e)
            });
        self.apply(id, |s| s.finish_edit(ticket.epoch, outcome));
        Ok(())
    }
}
