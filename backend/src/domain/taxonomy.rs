//! File categories, reduction strategies, and the three-level symptom
//! taxonomy used to group decode results.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Error;

/// How a volume is reduced to one scalar per parcel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReductionStrategy {
    /// Sum of voxel values inside the parcel.
    Sum,
    /// Arithmetic mean of voxel values inside the parcel.
    Mean,
}

/// Category of a derived file.
///
/// Each category fixes its reduction strategy:
///
/// | category          | strategy |
/// |-------------------|----------|
/// | `connectivity`    | mean     |
/// | `roi`             | sum      |
/// | `group_level_map` | sum      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileCategory {
    /// Subject-level connectivity map.
    Connectivity,
    /// Subject-level region of interest (lesion mask).
    Roi,
    /// Map summarising a taxon across subjects.
    GroupLevelMap,
}

impl FileCategory {
    /// Reduction strategy applied to volumes of this category.
    pub const fn reduction_strategy(self) -> ReductionStrategy {
        match self {
            Self::Connectivity => ReductionStrategy::Mean,
            Self::Roi | Self::GroupLevelMap => ReductionStrategy::Sum,
        }
    }

    /// Stable storage label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connectivity => "connectivity",
            Self::Roi => "roi",
            Self::GroupLevelMap => "group_level_map",
        }
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileCategory {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "connectivity" => Ok(Self::Connectivity),
            "roi" => Ok(Self::Roi),
            "group_level_map" => Ok(Self::GroupLevelMap),
            other => Err(Error::invalid_request(format!(
                "unknown file category: {other}"
            ))),
        }
    }
}

/// Level of the symptom taxonomy used for grouping.
///
/// Subdomain and domain membership is derived through a subject's symptoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomyLevel {
    /// Individual symptoms.
    Symptom,
    /// Subdomains grouping symptoms.
    Subdomain,
    /// Top-level domains.
    Domain,
}

impl TaxonomyLevel {
    /// Singular label, as accepted on the wire.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Symptom => "symptom",
            Self::Subdomain => "subdomain",
            Self::Domain => "domain",
        }
    }

    /// Plural directory name used by group-level map storage keys.
    pub const fn plural(self) -> &'static str {
        match self {
            Self::Symptom => "symptoms",
            Self::Subdomain => "subdomains",
            Self::Domain => "domains",
        }
    }
}

impl fmt::Display for TaxonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaxonomyLevel {
    type Err = Error;

    /// Parse a lowercase level name.
    ///
    /// # Examples
    /// ```
    /// use lesion_bank::domain::TaxonomyLevel;
    ///
    /// assert_eq!("domain".parse::<TaxonomyLevel>().ok(), Some(TaxonomyLevel::Domain));
    /// assert!("Domain".parse::<TaxonomyLevel>().is_err());
    /// ```
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "symptom" => Ok(Self::Symptom),
            "subdomain" => Ok(Self::Subdomain),
            "domain" => Ok(Self::Domain),
            other => Err(Error::invalid_request(format!(
                "invalid taxonomy level: {other}"
            ))),
        }
    }
}

/// Which part of the corpus a caller may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityScope {
    /// Excludes subjects and symptoms flagged `internal_use_only`.
    #[default]
    Public,
    /// Everything, including internal-only records.
    Internal,
}

impl VisibilityScope {
    /// Whether a record flagged `internal_use_only` is visible.
    pub const fn admits(self, internal_use_only: bool) -> bool {
        match self {
            Self::Public => !internal_use_only,
            Self::Internal => true,
        }
    }

    /// Whether a symptom counts towards taxon membership at `level`.
    ///
    /// Internal symptoms are hidden from public symptom columns only; their
    /// subdomain and domain still count the subjects that carry them.
    pub const fn admits_symptom(self, level: TaxonomyLevel, internal_use_only: bool) -> bool {
        match level {
            TaxonomyLevel::Symptom => self.admits(internal_use_only),
            TaxonomyLevel::Subdomain | TaxonomyLevel::Domain => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(VisibilityScope::Public, TaxonomyLevel::Symptom, false)]
    #[case(VisibilityScope::Public, TaxonomyLevel::Subdomain, true)]
    #[case(VisibilityScope::Public, TaxonomyLevel::Domain, true)]
    #[case(VisibilityScope::Internal, TaxonomyLevel::Symptom, true)]
    fn internal_symptoms_are_hidden_only_as_public_symptom_columns(
        #[case] scope: VisibilityScope,
        #[case] level: TaxonomyLevel,
        #[case] admitted: bool,
    ) {
        assert_eq!(scope.admits_symptom(level, true), admitted);
        assert!(scope.admits_symptom(level, false));
    }

    #[rstest]
    #[case(FileCategory::Connectivity, ReductionStrategy::Mean)]
    #[case(FileCategory::Roi, ReductionStrategy::Sum)]
    #[case(FileCategory::GroupLevelMap, ReductionStrategy::Sum)]
    fn categories_fix_their_strategy(
        #[case] category: FileCategory,
        #[case] expected: ReductionStrategy,
    ) {
        assert_eq!(category.reduction_strategy(), expected);
    }

    #[rstest]
    #[case("symptom", TaxonomyLevel::Symptom)]
    #[case("subdomain", TaxonomyLevel::Subdomain)]
    #[case("domain", TaxonomyLevel::Domain)]
    fn parses_taxonomy_levels(#[case] raw: &str, #[case] expected: TaxonomyLevel) {
        assert_eq!(raw.parse::<TaxonomyLevel>().expect("valid level"), expected);
    }

    #[rstest]
    #[case("")]
    #[case("symptoms")]
    #[case("SYMPTOM")]
    fn rejects_unknown_levels(#[case] raw: &str) {
        let error = raw.parse::<TaxonomyLevel>().expect_err("invalid level");
        assert_eq!(error.code(), crate::domain::ErrorCode::InvalidRequest);
    }

    #[rstest]
    fn public_scope_hides_internal_records() {
        assert!(VisibilityScope::Public.admits(false));
        assert!(!VisibilityScope::Public.admits(true));
        assert!(VisibilityScope::Internal.admits(true));
    }

    #[rstest]
    fn category_labels_round_trip() {
        for category in [
            FileCategory::Connectivity,
            FileCategory::Roi,
            FileCategory::GroupLevelMap,
        ] {
            assert_eq!(category.as_str().parse::<FileCategory>().ok(), Some(category));
        }
    }
}
