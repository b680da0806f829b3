use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::catalog::{DifficultyLevel, Grade, Subject, SubjectCode, Topic, TopicCode};
use crate::model::ids::OptionId;
use crate::model::item_code::{CodeKey, ItemCode};
use crate::model::media::MediaRef;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 8;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BankItemError {
    #[error("prompt must have text or an image")]
    EmptyPrompt,

    #[error("an item needs between {MIN_OPTIONS} and {MAX_OPTIONS} options, got {0}")]
    OptionCount(usize),

    #[error("exactly one option must be correct, got {0}")]
    CorrectCount(usize),

    #[error("option {0} has neither text nor an image")]
    EmptyOption(usize),

    #[error("duplicate option id {0}")]
    DuplicateOption(String),

    #[error("item code {code} does not match the item's metadata")]
    CodeMismatch { code: String },
}

//
// ─── OPTIONS ───────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionDraft {
    pub text: Option<String>,
    pub image: Option<MediaRef>,
    pub is_correct: bool,
}

impl OptionDraft {
    pub fn text(text: impl Into<String>, is_correct: bool) -> Self {
        Self {
            text: Some(text.into()),
            image: None,
            is_correct,
        }
    }

    pub fn image(image: MediaRef, is_correct: bool) -> Self {
        Self {
            text: None,
            image: Some(image),
            is_correct,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankOption {
    pub id: OptionId,
    pub text: Option<String>,
    pub image: Option<MediaRef>,
    pub is_correct: bool,
}

impl BankOption {
    fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.trim().is_empty()) || self.image.is_some()
    }
}

//
// ─── DRAFT ─────────────────────────────────────────────────────────────────────
//

/// Item as submitted by the authoring flow, before a code is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankItemDraft {
    pub subject: Subject,
    pub subject_code: SubjectCode,
    pub topic: Topic,
    pub topic_code: TopicCode,
    pub grade: Grade,
    pub level: DifficultyLevel,
    pub prompt: String,
    pub prompt_image: Option<MediaRef>,
    pub options: Vec<OptionDraft>,
}

impl BankItemDraft {
    /// The counter key a code for this draft is issued under.
    #[must_use]
    pub fn code_key(&self) -> CodeKey {
        CodeKey::new(
            self.subject_code.clone(),
            self.topic_code.clone(),
            self.grade,
            self.level,
        )
    }

    /// Validate the draft, assigning option ids `A`, `B`, `C`, ... in order.
    ///
    /// # Errors
    ///
    /// Returns `BankItemError` when the prompt is empty, the option count is out of
    /// range, an option has no content, or the number of correct options is not one.
    pub fn validate(self, now: DateTime<Utc>) -> Result<ValidatedItem, BankItemError> {
        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&self.options.len()) {
            return Err(BankItemError::OptionCount(self.options.len()));
        }
        let options = self
            .options
            .into_iter()
            .zip('A'..='Z')
            .map(|(draft, letter)| BankOption {
                id: OptionId::from_letter(letter),
                text: draft.text.map(|t| t.trim().to_string()),
                image: draft.image,
                is_correct: draft.is_correct,
            })
            .collect::<Vec<_>>();

        check_content(&self.prompt, self.prompt_image.as_ref(), &options)?;

        Ok(ValidatedItem {
            key: CodeKey::new(self.subject_code, self.topic_code, self.grade, self.level),
            subject: self.subject,
            topic: self.topic,
            prompt: self.prompt.trim().to_string(),
            prompt_image: self.prompt_image,
            options,
            created_at: now,
        })
    }
}

fn check_content(
    prompt: &str,
    prompt_image: Option<&MediaRef>,
    options: &[BankOption],
) -> Result<(), BankItemError> {
    if prompt.trim().is_empty() && prompt_image.is_none() {
        return Err(BankItemError::EmptyPrompt);
    }
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
        return Err(BankItemError::OptionCount(options.len()));
    }
    if let Some(idx) = options.iter().position(|o| !o.has_content()) {
        return Err(BankItemError::EmptyOption(idx));
    }
    let mut seen = std::collections::HashSet::new();
    for option in options {
        if !seen.insert(&option.id) {
            return Err(BankItemError::DuplicateOption(option.id.to_string()));
        }
    }
    let correct = options.iter().filter(|o| o.is_correct).count();
    if correct != 1 {
        return Err(BankItemError::CorrectCount(correct));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedItem {
    pub key: CodeKey,
    pub subject: Subject,
    pub topic: Topic,
    pub prompt: String,
    pub prompt_image: Option<MediaRef>,
    pub options: Vec<BankOption>,
    pub created_at: DateTime<Utc>,
}

impl ValidatedItem {
    /// Attach the issued code.
    ///
    /// # Errors
    ///
    /// Returns `BankItemError::CodeMismatch` if the code was issued under a different key.
    pub fn assign_code(self, code: ItemCode) -> Result<BankItem, BankItemError> {
        if code.key() != &self.key {
            return Err(BankItemError::CodeMismatch {
                code: code.to_string(),
            });
        }
        Ok(BankItem {
            code,
            subject: self.subject,
            topic: self.topic,
            prompt: self.prompt,
            prompt_image: self.prompt_image,
            options: self.options,
            created_at: self.created_at,
        })
    }
}

//
// ─── BANK ITEM ─────────────────────────────────────────────────────────────────
//

/// One assessment question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankItem {
    pub code: ItemCode,
    pub subject: Subject,
    pub topic: Topic,
    pub prompt: String,
    pub prompt_image: Option<MediaRef>,
    pub options: Vec<BankOption>,
    pub created_at: DateTime<Utc>,
}

impl BankItem {
    /// Re-check invariants on an item read back from storage.
    ///
    /// # Errors
    ///
    /// Returns `BankItemError` if the persisted item violates any content rule.
    pub fn from_persisted(item: BankItem) -> Result<Self, BankItemError> {
        check_content(&item.prompt, item.prompt_image.as_ref(), &item.options)?;
        Ok(item)
    }

    #[must_use]
    pub fn grade(&self) -> Grade {
        self.code.key().grade
    }

    #[must_use]
    pub fn level(&self) -> DifficultyLevel {
        self.code.key().level
    }

    #[must_use]
    pub fn correct_option(&self) -> Option<&OptionId> {
        self.options.iter().find(|o| o.is_correct).map(|o| &o.id)
    }

    #[must_use]
    pub fn has_option(&self, id: &OptionId) -> bool {
        self.options.iter().any(|o| &o.id == id)
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn draft(options: Vec<OptionDraft>) -> BankItemDraft {
        BankItemDraft {
            subject: Subject::new("Matemáticas").unwrap(),
            subject_code: SubjectCode::new("MA").unwrap(),
            topic: Topic::new("Álgebra").unwrap(),
            topic_code: TopicCode::new("ALG").unwrap(),
            grade: Grade::new(7).unwrap(),
            level: DifficultyLevel::Basic,
            prompt: "2x = 6, x = ?".into(),
            prompt_image: None,
            options,
        }
    }

    #[test]
    fn valid_draft_gets_lettered_options() {
        let item = draft(vec![
            OptionDraft::text("2", false),
            OptionDraft::text("3", true),
            OptionDraft::text("4", false),
        ])
        .validate(fixed_now())
        .unwrap();

        let ids: Vec<_> = item.options.iter().map(|o| o.id.to_string()).collect();
        assert_eq!(ids, vec!["A", "B", "C"]);

        let code = ItemCode::new(item.key.clone(), 1).unwrap();
        let bank_item = item.assign_code(code).unwrap();
        assert_eq!(bank_item.correct_option().unwrap().as_str(), "B");
        assert_eq!(bank_item.code.to_string(), "MAALG7B001");
    }

    #[test]
    fn requires_exactly_one_correct_option() {
        let none = draft(vec![OptionDraft::text("a", false), OptionDraft::text("b", false)]);
        assert_eq!(
            none.validate(fixed_now()).unwrap_err(),
            BankItemError::CorrectCount(0)
        );

        let two = draft(vec![OptionDraft::text("a", true), OptionDraft::text("b", true)]);
        assert_eq!(
            two.validate(fixed_now()).unwrap_err(),
            BankItemError::CorrectCount(2)
        );
    }

    #[test]
    fn enforces_option_count_bounds() {
        let one = draft(vec![OptionDraft::text("a", true)]);
        assert_eq!(
            one.validate(fixed_now()).unwrap_err(),
            BankItemError::OptionCount(1)
        );

        let mut many = vec![OptionDraft::text("right", true)];
        many.extend((0..8).map(|i| OptionDraft::text(format!("wrong {i}"), false)));
        assert_eq!(
            draft(many).validate(fixed_now()).unwrap_err(),
            BankItemError::OptionCount(9)
        );
    }

    #[test]
    fn options_need_text_or_image() {
        let image = MediaRef::from_file("figs/triangle.png").unwrap();
        let ok = draft(vec![OptionDraft::image(image, true), OptionDraft::text("b", false)]);
        assert!(ok.validate(fixed_now()).is_ok());

        let blank = draft(vec![OptionDraft::text("  ", true), OptionDraft::text("b", false)]);
        assert_eq!(
            blank.validate(fixed_now()).unwrap_err(),
            BankItemError::EmptyOption(0)
        );
    }

    #[test]
    fn code_must_match_item_metadata() {
        let item = draft(vec![OptionDraft::text("a", true), OptionDraft::text("b", false)])
            .validate(fixed_now())
            .unwrap();
        let other_key = CodeKey::new(
            SubjectCode::new("LE").unwrap(),
            TopicCode::new("GR").unwrap(),
            Grade::new(7).unwrap(),
            DifficultyLevel::Basic,
        );
        let code = ItemCode::new(other_key, 1).unwrap();
        assert!(matches!(
            item.assign_code(code),
            Err(BankItemError::CodeMismatch { .. })
        ));
    }
}
