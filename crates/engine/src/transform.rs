use rand::RngCore;

use snapmerge_core::{FieldValue, random_suffix};

const SUFFIX_LEN: usize = 8;

/// Named, side-effect-free field rewrites referenced from import plans.
/// Randomness comes from the caller so results are reproducible under a
/// seeded generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// `value` → `value-xxxxxxxx`. Non-text values pass through.
    RandomSuffix,
}

impl Transform {
    pub fn name(&self) -> &'static str {
        match self {
            Transform::RandomSuffix => "random_suffix",
        }
    }

    pub fn apply(&self, value: &FieldValue, rng: &mut dyn RngCore) -> FieldValue {
        match self {
            Transform::RandomSuffix => match value {
                FieldValue::Text(s) => {
                    FieldValue::Text(format!("{s}-{}", random_suffix(rng, SUFFIX_LEN)))
                }
                other => other.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn random_suffix_appends_to_text() {
        let mut rng = StdRng::seed_from_u64(1);
        let out = Transform::RandomSuffix.apply(&"helper".into(), &mut rng);
        let text = out.as_text().unwrap();
        assert!(text.starts_with("helper-"));
        assert_eq!(text.len(), "helper-".len() + SUFFIX_LEN);
    }

    #[test]
    fn same_seed_same_output() {
        let a = Transform::RandomSuffix.apply(&"x".into(), &mut StdRng::seed_from_u64(9));
        let b = Transform::RandomSuffix.apply(&"x".into(), &mut StdRng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn non_text_passes_through() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(
            Transform::RandomSuffix.apply(&FieldValue::Integer(4), &mut rng),
            FieldValue::Integer(4)
        );
        assert_eq!(
            Transform::RandomSuffix.apply(&FieldValue::Null, &mut rng),
            FieldValue::Null
        );
    }
}
