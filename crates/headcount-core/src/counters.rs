//! Live attribute tallies.
//!
//! Two families: per-frame counts over the faces just resolved, and stored counts over the
//! whole gallery. Both match canonical labels exactly; anything else is left out. Report
//! histograms (see [`crate::report`]) fold unknown labels into catch-all buckets instead and
//! are deliberately kept separate from these.

use crate::attributes::{AgeGroup, Attribute, Expression, FaceAttributes, Gender};
use crate::gallery::{GalleryError, VectorGallery};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenderCounts {
    pub male: u64,
    pub female: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeGroupCounts {
    pub child: u64,
    pub young: u64,
    pub adult: u64,
    pub elderly: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpressionCounts {
    pub neutral: u64,
    pub happy: u64,
    pub surprised: u64,
    pub sad: u64,
    pub anger: u64,
    pub fear: u64,
}

/// Counts over one frame's faces.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounts {
    pub faces: u64,
    pub gender: GenderCounts,
    pub age_group: AgeGroupCounts,
    pub expression: ExpressionCounts,
}

/// Counts over every record in the gallery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCounts {
    pub total: u64,
    pub gender: GenderCounts,
    pub age_group: AgeGroupCounts,
    pub expression: ExpressionCounts,
}

impl GenderCounts {
    fn set(&mut self, gender: Gender, n: u64) {
        match gender {
            Gender::Male => self.male = n,
            Gender::Female => self.female = n,
        }
    }
}

impl AgeGroupCounts {
    fn set(&mut self, group: AgeGroup, n: u64) {
        match group {
            AgeGroup::Child => self.child = n,
            AgeGroup::Young => self.young = n,
            AgeGroup::Adult => self.adult = n,
            AgeGroup::Elderly => self.elderly = n,
        }
    }
}

impl ExpressionCounts {
    fn set(&mut self, expression: Expression, n: u64) {
        match expression {
            Expression::Neutral => self.neutral = n,
            Expression::Happy => self.happy = n,
            Expression::Surprised => self.surprised = n,
            Expression::Sad => self.sad = n,
            Expression::Anger => self.anger = n,
            Expression::Fear => self.fear = n,
        }
    }
}

/// Tally the attributes of the faces resolved in one frame.
pub fn frame_counts<'a, I>(faces: I) -> FrameCounts
where
    I: IntoIterator<Item = &'a FaceAttributes>,
{
    let faces: Vec<&FaceAttributes> = faces.into_iter().collect();
    let tally = |attribute: Attribute, label: &str| -> u64 {
        faces.iter().filter(|f| f.get(attribute) == Some(label)).count() as u64
    };

    let mut counts = FrameCounts {
        faces: faces.len() as u64,
        ..FrameCounts::default()
    };
    for g in Gender::ALL {
        counts.gender.set(g, tally(Attribute::Gender, g.label()));
    }
    for a in AgeGroup::ALL {
        counts.age_group.set(a, tally(Attribute::AgeGroup, a.label()));
    }
    for e in Expression::ALL {
        counts.expression.set(e, tally(Attribute::Expression, e.label()));
    }
    counts
}

/// Query the gallery once per canonical bucket.
pub fn stored_counts<G>(gallery: &G) -> Result<StoredCounts, GalleryError>
where
    G: VectorGallery + ?Sized,
{
    let mut counts = StoredCounts {
        total: gallery.count_total()?,
        ..StoredCounts::default()
    };
    for g in Gender::ALL {
        counts.gender.set(g, gallery.count_where(Attribute::Gender, g.label())?);
    }
    for a in AgeGroup::ALL {
        counts
            .age_group
            .set(a, gallery.count_where(Attribute::AgeGroup, a.label())?);
    }
    for e in Expression::ALL {
        counts
            .expression
            .set(e, gallery.count_where(Attribute::Expression, e.label())?);
    }
    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::gallery::NewIdentity;
    use crate::memory::MemoryGallery;
    use crate::types::Embedding;
    use std::sync::Arc;

    fn attrs(gender: Option<&str>, age: Option<&str>, expression: Option<&str>) -> FaceAttributes {
        FaceAttributes {
            gender: gender.map(str::to_string),
            age_group: age.map(str::to_string),
            expression: expression.map(str::to_string),
        }
    }

    #[test]
    fn test_frame_counts_exact_labels() {
        let faces = vec![
            attrs(Some("Male"), Some("Young (15-25)"), Some("happy")),
            attrs(Some("Male"), Some("Child (0-14)"), Some("fear")),
            attrs(Some("Female"), None, Some("angry")),
            attrs(None, Some("Elderly (56+)"), None),
        ];
        let c = frame_counts(&faces);
        assert_eq!(c.faces, 4);
        assert_eq!(c.gender, GenderCounts { male: 2, female: 1 });
        assert_eq!(c.age_group.young, 1);
        assert_eq!(c.age_group.child, 1);
        assert_eq!(c.age_group.elderly, 1);
        assert_eq!(c.expression.happy, 1);
        assert_eq!(c.expression.fear, 1);
        // "angry" is not a canonical label here
        assert_eq!(c.expression.anger, 0);
    }

    #[test]
    fn test_frame_counts_empty_frame() {
        assert_eq!(frame_counts(&[]), FrameCounts::default());
    }

    #[test]
    fn test_stored_counts_exclude_null() {
        let mut g = MemoryGallery::new(2, Arc::new(ManualClock::new(0)));
        for (i, gender) in [Some("Male"), None].into_iter().enumerate() {
            let mut v = vec![0.0; 2];
            v[i] = 1.0;
            g.insert(NewIdentity {
                person_id: i as i64 + 1,
                person_name: format!("Person_{}", i + 1),
                embedding: Embedding::new(v),
                attributes: attrs(gender, None, Some("neutral")),
            })
            .unwrap();
        }
        let c = stored_counts(&g).unwrap();
        assert_eq!(c.total, 2);
        assert_eq!(c.gender, GenderCounts { male: 1, female: 0 });
        assert_eq!(c.expression.neutral, 2);
        assert_eq!(c.age_group, AgeGroupCounts::default());
    }
}
