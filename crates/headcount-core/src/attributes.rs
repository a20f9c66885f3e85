//! Categorical face attributes and their canonical labels.
//!
//! Records store attributes as the raw labels the classifier produced. The enums here give
//! the canonical spellings that stored-count queries match against.

use serde::{Deserialize, Serialize};

/// Ages above this are treated as a failed estimate.
pub const MAX_ESTIMATED_AGE: f32 = 116.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub const ALL: [Gender; 2] = [Gender::Male, Gender::Female];

    pub fn label(self) -> &'static str {
        match self {
            Gender::Male => "Male",
            Gender::Female => "Female",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgeGroup {
    Child,
    Young,
    Adult,
    Elderly,
}

impl AgeGroup {
    pub const ALL: [AgeGroup; 4] = [
        AgeGroup::Child,
        AgeGroup::Young,
        AgeGroup::Adult,
        AgeGroup::Elderly,
    ];

    pub fn label(self) -> &'static str {
        match self {
            AgeGroup::Child => "Child (0-14)",
            AgeGroup::Young => "Young (15-25)",
            AgeGroup::Adult => "Adult (26-55)",
            AgeGroup::Elderly => "Elderly (56+)",
        }
    }

    /// Bucket an estimated age in years. Estimates outside `[0, 116]` yield `None`.
    pub fn from_age(age: f32) -> Option<Self> {
        if !(0.0..=MAX_ESTIMATED_AGE).contains(&age) {
            return None;
        }
        Some(match age as u32 {
            0..=14 => AgeGroup::Child,
            15..=25 => AgeGroup::Young,
            26..=55 => AgeGroup::Adult,
            _ => AgeGroup::Elderly,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    Neutral,
    Happy,
    Surprised,
    Sad,
    Anger,
    Fear,
}

impl Expression {
    pub const ALL: [Expression; 6] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Surprised,
        Expression::Sad,
        Expression::Anger,
        Expression::Fear,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Surprised => "surprised",
            Expression::Sad => "sad",
            Expression::Anger => "anger",
            Expression::Fear => "fear",
        }
    }
}

/// A filterable attribute column of the gallery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    Gender,
    AgeGroup,
    Expression,
}

impl Attribute {
    pub fn column(self) -> &'static str {
        match self {
            Attribute::Gender => "gender",
            Attribute::AgeGroup => "age_group",
            Attribute::Expression => "expression",
        }
    }
}

/// Classifier output for one face. Each field is independently optional: a model that
/// fails or is unavailable leaves its field `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceAttributes {
    pub gender: Option<String>,
    pub age_group: Option<String>,
    pub expression: Option<String>,
}

impl FaceAttributes {
    pub fn new(
        gender: Option<Gender>,
        age_group: Option<AgeGroup>,
        expression: Option<Expression>,
    ) -> Self {
        Self {
            gender: gender.map(|g| g.label().to_string()),
            age_group: age_group.map(|a| a.label().to_string()),
            expression: expression.map(|e| e.label().to_string()),
        }
    }

    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        match attribute {
            Attribute::Gender => self.gender.as_deref(),
            Attribute::AgeGroup => self.age_group.as_deref(),
            Attribute::Expression => self.expression.as_deref(),
        }
    }
}
