//! The per-session state machine.
//!
//! A [`Session`] is never mutated in place by callers: every transition takes the
//! current value and returns the next one, which the store swaps in whole.
//! Long-running work is represented by a ticket that carries the inputs for the
//! gateway call and the epoch it was started in. Results from an older epoch
//! (the user reset or changed concept meanwhile) are dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AutoFill, BrandBrief, BrandDna, BriefUpdate, CreativeConcept, GeneratedAsset, ImageData, SelectedDirection,
    SourceImage, Stage,
};

pub const MISSING_BRIEF: &str = "Please provide a brand description or URL.";
pub const MISSING_SOURCE_IMAGE: &str = "Please upload or capture a food image.";
pub const MISSING_AUTO_FILL_INPUT: &str = "Enter a description or URL to auto-fill the brief.";
pub const MISSING_EDIT_INSTRUCTION: &str = "Enter an edit instruction.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Empty,
    BriefEntered,
    Analyzing,
    Ideated,
    ConceptSelected,
    Generating,
    Editing,
    Complete,
    PartialFailure,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("{message}")]
    Invalid { stage: Stage, message: String },
    #[error("{0} is already in progress")]
    Busy(&'static str),
    #[error("cannot {action} in phase {phase:?}")]
    WrongPhase { action: &'static str, phase: Phase },
}

impl SessionError {
    fn invalid(stage: Stage, message: &str) -> Self {
        SessionError::Invalid { stage, message: message.to_string() }
    }
}

/// A user-facing error attributed to one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, error: impl std::fmt::Display) -> Self {
        Self { stage, message: format!("{}: {}", stage.failure_label(), error) }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub auto_filling: bool,
    pub analyzing: bool,
    pub generating_image: bool,
    pub generating_text: bool,
    pub editing: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub brief: BrandBrief,
    pub source_image: Option<ImageData>,
    pub brand_dna: Option<BrandDna>,
    pub concepts: Option<Vec<CreativeConcept>>,
    pub selection: Option<SelectedDirection>,
    pub asset: GeneratedAsset,
    pub edit_instruction: Option<String>,
    pub activity: Activity,
    pub errors: Vec<StageFailure>,
    #[serde(skip)]
    epoch: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AutoFillTicket {
    pub description: String,
    pub url: String,
    /// Only look for a logo when the user has not supplied one.
    pub wants_logo: bool,
}

#[derive(Debug, Clone)]
pub struct AnalysisTicket {
    pub epoch: u64,
    pub brief: BrandBrief,
    pub source_image: ImageData,
}

impl AnalysisTicket {
    pub fn source(&self) -> SourceImage<'_> {
        SourceImage { image: &self.source_image, product_name: self.brief.product_name() }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationTicket {
    pub epoch: u64,
    pub dna: BrandDna,
    pub source_image: ImageData,
    pub product_name: Option<String>,
    pub direction: SelectedDirection,
}

impl GenerationTicket {
    pub fn source(&self) -> SourceImage<'_> {
        SourceImage { image: &self.source_image, product_name: self.product_name.as_deref() }
    }
}

#[derive(Debug, Clone)]
pub struct EditTicket {
    pub epoch: u64,
    pub image: ImageData,
    pub instruction: String,
}

impl Session {
    pub fn new(id: Uuid, brief: BrandBrief) -> Self {
        let now = Utc::now();
        Self {
            id,
            brief,
            source_image: None,
            brand_dna: None,
            concepts: None,
            selection: None,
            asset: GeneratedAsset::default(),
            edit_instruction: None,
            activity: Activity::default(),
            errors: Vec::new(),
            epoch: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.activity.analyzing {
            return Phase::Analyzing;
        }
        match (&self.concepts, &self.selection) {
            (None, _) => {
                let b = &self.brief;
                let touched = self.source_image.is_some()
                    || b.logo.is_some()
                    || [&b.description, &b.url, &b.target_audience, &b.tone, &b.creative_direction, &b.product_name]
                        .iter()
                        .any(|s| !s.trim().is_empty());
                if touched { Phase::BriefEntered } else { Phase::Empty }
            }
            (Some(_), None) => Phase::Ideated,
            (Some(_), Some(_)) => {
                if self.activity.editing {
                    Phase::Editing
                } else if self.activity.generating_image || self.activity.generating_text {
                    Phase::Generating
                } else if self.asset.image.is_some() && self.asset.post_text.is_some() {
                    Phase::Complete
                } else if self.asset.is_empty() && self.errors.is_empty() {
                    Phase::ConceptSelected
                } else {
                    Phase::PartialFailure
                }
            }
        }
    }

    fn next(&self) -> Self {
        let mut next = self.clone();
        next.updated_at = Utc::now();
        next
    }

    fn require_brief_phase(&self, action: &'static str) -> Result<(), SessionError> {
        match self.phase() {
            Phase::Empty | Phase::BriefEntered => Ok(()),
            Phase::Analyzing => Err(SessionError::Busy("analysis")),
            phase => Err(SessionError::WrongPhase { action, phase }),
        }
    }

    /// Records a failure, replacing any earlier one from the same stage.
    pub fn with_failure(&self, failure: StageFailure) -> Self {
        let mut next = self.next();
        next.errors.retain(|f| f.stage != failure.stage);
        next.errors.push(failure);
        next
    }

    pub fn dismiss_errors(&self, stage: Option<Stage>) -> Self {
        let mut next = self.next();
        match stage {
            Some(stage) => next.errors.retain(|f| f.stage != stage),
            None => next.errors.clear(),
        }
        next
    }

    pub fn update_brief(&self, update: BriefUpdate) -> Result<Self, SessionError> {
        self.require_brief_phase("edit the brief")?;
        let mut next = self.next();
        next.brief.apply(update);
        Ok(next)
    }

    pub fn set_source_image(&self, image: Option<ImageData>) -> Result<Self, SessionError> {
        self.require_brief_phase("change the source image")?;
        let mut next = self.next();
        next.source_image = image;
        Ok(next)
    }

    pub fn begin_auto_fill(&self) -> Result<(Self, AutoFillTicket), SessionError> {
        self.require_brief_phase("auto-fill the brief")?;
        if self.activity.auto_filling {
            return Err(SessionError::Busy("auto-fill"));
        }
        if !self.brief.has_description_or_url() {
            return Err(SessionError::invalid(Stage::AutoFill, MISSING_AUTO_FILL_INPUT));
        }
        let mut next = self.next();
        next.activity.auto_filling = true;
        next.errors.retain(|f| f.stage != Stage::AutoFill);
        let ticket = AutoFillTicket {
            description: self.brief.description.clone(),
            url: self.brief.url.clone(),
            wants_logo: self.brief.logo.is_none(),
        };
        Ok((next, ticket))
    }

    /// Applies the enriched brief. A fetched logo never replaces one the user supplied.
    pub fn finish_auto_fill(&self, outcome: Result<(AutoFill, Option<ImageData>), StageFailure>) -> Self {
        if !self.activity.auto_filling {
            return self.clone();
        }
        let mut next = self.next();
        next.activity.auto_filling = false;
        match outcome {
            Ok((fill, logo)) => {
                next.brief.description = fill.brand_description;
                next.brief.target_audience = fill.audience;
                next.brief.tone = fill.tone;
                next.brief.creative_direction = fill.direction;
                if next.brief.logo.is_none() {
                    next.brief.logo = logo;
                }
                next
            }
            Err(failure) => next.with_failure(failure),
        }
    }

    pub fn begin_analysis(&self) -> Result<(Self, AnalysisTicket), SessionError> {
        self.require_brief_phase("analyze the brief")?;
        if self.activity.auto_filling {
            return Err(SessionError::Busy("auto-fill"));
        }
        if !self.brief.has_description_or_url() {
            return Err(SessionError::invalid(Stage::BrandDna, MISSING_BRIEF));
        }
        let source_image = self
            .source_image
            .clone()
            .ok_or_else(|| SessionError::invalid(Stage::BrandDna, MISSING_SOURCE_IMAGE))?;
        let mut next = self.next();
        next.activity.analyzing = true;
        next.errors.clear();
        let ticket = AnalysisTicket { epoch: next.epoch, brief: self.brief.clone(), source_image };
        Ok((next, ticket))
    }

    pub fn finish_analysis(
        &self,
        epoch: u64,
        outcome: Result<(BrandDna, Vec<CreativeConcept>), StageFailure>,
    ) -> Self {
        if epoch != self.epoch || !self.activity.analyzing {
            return self.clone();
        }
        let mut next = self.next();
        next.activity.analyzing = false;
        match outcome {
            Ok((dna, concepts)) => {
                next.brand_dna = Some(dna);
                next.concepts = Some(concepts);
                next
            }
            Err(failure) => next.with_failure(failure),
        }
    }

    /// Commits to a concept and headline and starts the paired generation.
    pub fn select_concept(&self, concept_id: &str, cta: &str) -> Result<(Self, GenerationTicket), SessionError> {
        let phase = self.phase();
        if phase != Phase::Ideated {
            return Err(SessionError::WrongPhase { action: "select a concept", phase });
        }
        let (Some(concepts), Some(dna), Some(source_image)) = (&self.concepts, &self.brand_dna, &self.source_image)
        else {
            return Err(SessionError::WrongPhase { action: "select a concept", phase });
        };
        let concept = concepts
            .iter()
            .find(|c| c.id == concept_id)
            .ok_or_else(|| SessionError::invalid(Stage::HeroImage, "Unknown concept."))?;
        let cta = concept
            .overlay_ctas
            .iter()
            .find(|c| c.as_str() == cta.trim())
            .ok_or_else(|| SessionError::invalid(Stage::HeroImage, "Choose one of the concept's headlines."))?;

        let direction = SelectedDirection { concept: concept.clone(), cta: cta.clone() };
        let mut next = self.next();
        next.epoch += 1;
        next.selection = Some(direction.clone());
        next.asset = GeneratedAsset::default();
        next.activity.generating_image = true;
        next.activity.generating_text = true;
        next.errors.clear();
        let ticket = GenerationTicket {
            epoch: next.epoch,
            dna: dna.clone(),
            source_image: source_image.clone(),
            product_name: self.brief.product_name().map(str::to_string),
            direction,
        };
        Ok((next, ticket))
    }

    pub fn finish_hero_image(&self, epoch: u64, outcome: Result<ImageData, StageFailure>) -> Self {
        if epoch != self.epoch || !self.activity.generating_image {
            return self.clone();
        }
        let mut next = self.next();
        next.activity.generating_image = false;
        match outcome {
            Ok(image) => {
                next.asset.image = Some(image);
                next
            }
            Err(failure) => next.with_failure(failure),
        }
    }

    pub fn finish_post_copy(&self, epoch: u64, outcome: Result<String, StageFailure>) -> Self {
        if epoch != self.epoch || !self.activity.generating_text {
            return self.clone();
        }
        let mut next = self.next();
        next.activity.generating_text = false;
        match outcome {
            Ok(text) => {
                next.asset.post_text = Some(text);
                next
            }
            Err(failure) => next.with_failure(failure),
        }
    }

    /// Starts an edit of the most recent image. Only one image operation runs at a time.
    pub fn begin_edit(&self, instruction: &str) -> Result<(Self, EditTicket), SessionError> {
        if self.activity.generating_image {
            return Err(SessionError::Busy("image generation"));
        }
        if self.activity.editing {
            return Err(SessionError::Busy("image edit"));
        }
        let Some(image) = self.asset.image.clone().filter(|_| self.selection.is_some()) else {
            return Err(SessionError::WrongPhase { action: "edit the image", phase: self.phase() });
        };
        let instruction = instruction.trim();
        if instruction.is_empty() {
            return Err(SessionError::invalid(Stage::Edit, MISSING_EDIT_INSTRUCTION));
        }
        let mut next = self.next();
        next.activity.editing = true;
        next.edit_instruction = Some(instruction.to_string());
        next.errors.retain(|f| f.stage != Stage::Edit);
        let ticket = EditTicket { epoch: next.epoch, image, instruction: instruction.to_string() };
        Ok((next, ticket))
    }

    pub fn finish_edit(&self, epoch: u64, outcome: Result<ImageData, StageFailure>) -> Self {
        if epoch != self.epoch || !self.activity.editing {
            return self.clone();
        }
        let mut next = self.next();
        next.activity.editing = false;
        match outcome {
            Ok(image) => {
                next.asset.image = Some(image);
                next.edit_instruction = None;
                next
            }
            Err(failure) => next.with_failure(failure),
        }
    }

    /// Back to the concept list, keeping Brand DNA and concepts.
    pub fn change_concept(&self) -> Result<Self, SessionError> {
        if self.selection.is_none() {
            return Err(SessionError::WrongPhase { action: "change concept", phase: self.phase() });
        }
        if self.activity.editing {
            return Err(SessionError::Busy("image edit"));
        }
        let mut next = self.next();
        next.epoch += 1;
        next.selection = None;
        next.asset = GeneratedAsset::default();
        next.edit_instruction = None;
        next.activity.generating_image = false;
        next.activity.generating_text = false;
        next.errors.retain(|f| !matches!(f.stage, Stage::HeroImage | Stage::PostCopy | Stage::Edit));
        Ok(next)
    }

    /// Discards everything derived from the brief. The brief and source image stay.
    pub fn reset(&self) -> Result<Self, SessionError> {
        if self.concepts.is_none() {
            return Err(SessionError::WrongPhase { action: "reset", phase: self.phase() });
        }
        let mut next = self.next();
        next.epoch += 1;
        next.brand_dna = None;
        next.concepts = None;
        next.selection = None;
        next.asset = GeneratedAsset::default();
        next.edit_instruction = None;
        next.activity = Activity::default();
        next.errors.clear();
        Ok(next)
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView { phase: self.phase(), session: self }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionView<'a> {
    pub phase: Phase,
    #[serde(flatten)]
    pub session: &'a Session,
}
