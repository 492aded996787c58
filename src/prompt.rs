//! Selection choices and prompt templates
//!
//! The sidebar offers three fixed choice lists (education level, subject,
//! mode). `build_prompt` turns a question plus the current choices into the
//! instruction text sent to the model.

use std::fmt;
use std::str::FromStr;

/// Token the quiz template asks the model to put next to the right option
pub const CORRECT_MARKER: &str = "[CORRECT]";

/// Failed to parse a choice from user input
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown {kind}: '{value}'. Expected one of: {expected}")]
pub struct ParseChoiceError {
    kind: &'static str,
    value: String,
    expected: String,
}

/// Shared behaviour of the sidebar choice lists
pub trait Choice: Copy + PartialEq + Sized + 'static {
    const KIND: &'static str;

    fn all() -> &'static [Self];
    fn label(&self) -> &'static str;
    fn slugs(&self) -> &'static [&'static str];

    /// Next entry, wrapping around (sidebar cycling)
    fn next(&self) -> Self {
        let all = Self::all();
        let idx = all.iter().position(|c| c == self).unwrap_or(0);
        all[(idx + 1) % all.len()]
    }

    fn parse_choice(s: &str) -> Result<Self, ParseChoiceError> {
        let wanted = s.trim().to_lowercase();
        Self::all()
            .iter()
            .copied()
            .find(|c| {
                c.label().to_lowercase() == wanted || c.slugs().iter().any(|slug| *slug == wanted)
            })
            .ok_or_else(|| ParseChoiceError {
                kind: Self::KIND,
                value: s.to_string(),
                expected: Self::all()
                    .iter()
                    .map(|c| c.label())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

macro_rules! choice_impls {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl FromStr for $ty {
            type Err = ParseChoiceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                <$ty as Choice>::parse_choice(s)
            }
        }
    };
}

// ═══════════════════════════════════════════════════════════════
// CHOICES
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EducationLevel {
    School,
    #[default]
    HighSchool,
    Graduate,
    PgPhd,
}

impl Choice for EducationLevel {
    const KIND: &'static str = "education level";

    fn all() -> &'static [Self] {
        &[Self::School, Self::HighSchool, Self::Graduate, Self::PgPhd]
    }

    fn label(&self) -> &'static str {
        match self {
            Self::School => "School",
            Self::HighSchool => "High School",
            Self::Graduate => "Graduate",
            Self::PgPhd => "PG/PhD",
        }
    }

    fn slugs(&self) -> &'static [&'static str] {
        match self {
            Self::School => &["school"],
            Self::HighSchool => &["high-school", "highschool", "hs"],
            Self::Graduate => &["graduate", "grad"],
            Self::PgPhd => &["pg", "phd", "pg-phd"],
        }
    }
}

choice_impls!(EducationLevel);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Subject {
    Math,
    History,
    #[default]
    ComputerScience,
    Physics,
    Biology,
    Chemistry,
}

impl Choice for Subject {
    const KIND: &'static str = "subject";

    fn all() -> &'static [Self] {
        &[
            Self::Math,
            Self::History,
            Self::ComputerScience,
            Self::Physics,
            Self::Biology,
            Self::Chemistry,
        ]
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Math => "Math",
            Self::History => "History",
            Self::ComputerScience => "Computer Science",
            Self::Physics => "Physics",
            Self::Biology => "Biology",
            Self::Chemistry => "Chemistry",
        }
    }

    fn slugs(&self) -> &'static [&'static str] {
        match self {
            Self::Math => &["math", "maths"],
            Self::History => &["history"],
            Self::ComputerScience => &["cs", "computer-science", "compsci"],
            Self::Physics => &["physics"],
            Self::Biology => &["biology", "bio"],
            Self::Chemistry => &["chemistry", "chem"],
        }
    }
}

choice_impls!(Subject);

/// Interaction mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Explain,
    Quiz,
}

impl Choice for Mode {
    const KIND: &'static str = "mode";

    fn all() -> &'static [Self] {
        &[Self::Explain, Self::Quiz]
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Explain => "Explain a Topic",
            Self::Quiz => "Generate a Quiz",
        }
    }

    fn slugs(&self) -> &'static [&'static str] {
        match self {
            Self::Explain => &["explain", "explanation"],
            Self::Quiz => &["quiz"],
        }
    }
}

choice_impls!(Mode);

// ═══════════════════════════════════════════════════════════════
// TEMPLATES
// ═══════════════════════════════════════════════════════════════

/// Build the instruction text for one question
pub fn build_prompt(mode: Mode, level: EducationLevel, subject: Subject, user_text: &str) -> String {
    match mode {
        Mode::Explain => format!(
            "You are a {level}-level {subject} tutor.\n\
             Explain the following in a structured, step-by-step manner:\n\
             \"{user_text}\"\n\
             \n\
             - Break down complex concepts.\n\
             - Use examples if helpful.\n\
             - Keep explanations clear and concise.\n"
        ),
        Mode::Quiz => format!(
            "Generate a {level}-level {subject} quiz question with:\n\
             - 1 clear question\n\
             - 4 multiple-choice options (A, B, C, D)\n\
             - The correct answer marked with {CORRECT_MARKER}\n\
             - A brief explanation\n\
             \n\
             Topic: {user_text}\n"
        ),
    }
}
