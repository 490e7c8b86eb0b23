//! Delta severities and the auto-create policy

use serde::{Deserialize, Serialize};

/// How far a live object is from its expected definition
///
/// The derived ordering runs from worst to best, so aggregating several
/// deltas is a `min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SchemaPatchDifference {
    /// The object cannot be patched in place and must be rebuilt
    Invalid = 0,
    /// The object exists and can be altered in place
    Update = 1,
    /// The object does not exist yet
    Create = 2,
    /// The object already matches
    None = 3,
}

impl SchemaPatchDifference {
    /// Worst severity of a set of deltas, `None` when the set is empty
    pub fn aggregate<I>(differences: I) -> Self
    where
        I: IntoIterator<Item = SchemaPatchDifference>,
    {
        differences
            .into_iter()
            .min()
            .unwrap_or(SchemaPatchDifference::None)
    }
}

/// Which severities may be applied automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoCreate {
    /// Never apply anything; the caller only inspects
    None,
    /// Only create missing objects
    CreateOnly,
    /// Create missing objects and patch existing ones in place
    CreateOrUpdate,
    /// Anything goes, including table rebuilds
    All,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn ordering_runs_worst_to_best() {
        assert!(SchemaPatchDifference::Invalid < SchemaPatchDifference::Update);
        assert!(SchemaPatchDifference::Update < SchemaPatchDifference::Create);
        assert!(SchemaPatchDifference::Create < SchemaPatchDifference::None);
    }

    #[rstest]
    #[case(vec![], SchemaPatchDifference::None)]
    #[case(vec![SchemaPatchDifference::None, SchemaPatchDifference::Create], SchemaPatchDifference::Create)]
    #[case(vec![SchemaPatchDifference::Create, SchemaPatchDifference::Update, SchemaPatchDifference::None], SchemaPatchDifference::Update)]
    #[case(vec![SchemaPatchDifference::Update, SchemaPatchDifference::Invalid], SchemaPatchDifference::Invalid)]
    fn aggregate_takes_the_worst(
        #[case] differences: Vec<SchemaPatchDifference>,
        #[case] expected: SchemaPatchDifference,
    ) {
        assert_eq!(SchemaPatchDifference::aggregate(differences), expected);
    }

    #[test]
    fn auto_create_reads_from_snake_case() {
        #[derive(Deserialize)]
        struct Holder {
            policy: AutoCreate,
        }

        let holder: Holder = toml::from_str("policy = \"create_or_update\"").unwrap();
        assert_eq!(holder.policy, AutoCreate::CreateOrUpdate);
    }
}
