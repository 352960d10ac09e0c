//! Derived file records and their owner linkage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::imaging::{CoordinateSpace, FileKind};
use super::{Error, FileCategory, TaxonomyLevel};

/// Owner linkage and category tags for a derived file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum FileDescriptor {
    /// Lesion mask or drawn region for one subject.
    Roi {
        /// Owning subject.
        subject_id: i64,
    },
    /// Connectivity map for one subject.
    Connectivity {
        /// Owning subject.
        subject_id: i64,
        /// Normative connectome the map was computed against.
        connectome: String,
        /// Statistic stored in the map, for example `t` or `avgR`.
        statistic: String,
    },
    /// Map summarising one taxon across the corpus.
    GroupLevelMap {
        /// Taxonomy level of the summarised taxon.
        level: TaxonomyLevel,
        /// Taxon name.
        taxon: String,
        /// Map family, for example `lnm` or `sensitivity`.
        map_type: String,
        /// Statistic stored in the map.
        statistic: String,
    },
}

impl FileDescriptor {
    /// Category implied by the descriptor.
    pub const fn category(&self) -> FileCategory {
        match self {
            Self::Roi { .. } => FileCategory::Roi,
            Self::Connectivity { .. } => FileCategory::Connectivity,
            Self::GroupLevelMap { .. } => FileCategory::GroupLevelMap,
        }
    }

    /// Owning subject, when the file belongs to one.
    pub const fn subject_id(&self) -> Option<i64> {
        match self {
            Self::Roi { subject_id } | Self::Connectivity { subject_id, .. } => Some(*subject_id),
            Self::GroupLevelMap { .. } => None,
        }
    }

    /// Counter key used to allocate per-owner file sequence numbers.
    ///
    /// Group-level maps live at a deterministic path and take no sequence.
    pub fn sequence_key(&self) -> Option<String> {
        self.subject_id().map(|subject_id| format!("subject-{subject_id}"))
    }
}

/// Loose owner and tag fields as supplied by an uploader.
///
/// [`FileDescriptor::from_tags`] checks that the fields a category needs
/// are present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileTags {
    /// Owning subject for `roi` and `connectivity` files.
    pub subject_id: Option<i64>,
    /// Connectome of a connectivity map.
    pub connectome: Option<String>,
    /// Statistic stored in the map.
    pub statistic: Option<String>,
    /// Taxonomy level of a group-level map.
    pub taxonomy_level: Option<TaxonomyLevel>,
    /// Taxon of a group-level map.
    pub taxon: Option<String>,
    /// Map family of a group-level map.
    pub map_type: Option<String>,
}

fn require<T>(value: Option<T>, category: FileCategory, field: &str) -> Result<T, Error> {
    value.ok_or_else(|| Error::invalid_request(format!("{category} files require {field}")))
}

impl FileDescriptor {
    /// Build the descriptor of a `category` file from `tags`.
    ///
    /// # Examples
    /// ```
    /// use lesion_bank::domain::{FileCategory, FileDescriptor, FileTags};
    ///
    /// let tags = FileTags { subject_id: Some(3), ..FileTags::default() };
    /// let descriptor = FileDescriptor::from_tags(FileCategory::Roi, tags).expect("roi");
    /// assert_eq!(descriptor, FileDescriptor::Roi { subject_id: 3 });
    /// ```
    pub fn from_tags(category: FileCategory, tags: FileTags) -> Result<Self, Error> {
        match category {
            FileCategory::Roi => Ok(Self::Roi {
                subject_id: require(tags.subject_id, category, "subject_id")?,
            }),
            FileCategory::Connectivity => Ok(Self::Connectivity {
                subject_id: require(tags.subject_id, category, "subject_id")?,
                connectome: require(tags.connectome, category, "connectome")?,
                statistic: require(tags.statistic, category, "statistic")?,
            }),
            FileCategory::GroupLevelMap => Ok(Self::GroupLevelMap {
                level: require(tags.taxonomy_level, category, "taxonomy_level")?,
                taxon: require(tags.taxon, category, "taxon")?,
                map_type: require(tags.map_type, category, "map_type")?,
                statistic: require(tags.statistic, category, "statistic")?,
            }),
        }
    }
}

/// Reduction state of a derived file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    /// Reduction scheduled or running.
    Pending,
    /// Parcelwise rows are present.
    Indexed,
    /// Reduction failed; see `index_error`.
    Failed,
    /// File is not volumetric or is itself a derived artifact.
    NotApplicable,
}

impl IndexStatus {
    /// Stored label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
            Self::NotApplicable => "not_applicable",
        }
    }

    /// Parse a stored label. Unrecognised labels read as failed.
    pub fn from_label(label: &str) -> Self {
        match label {
            "pending" => Self::Pending,
            "indexed" => Self::Indexed,
            "not_applicable" => Self::NotApplicable,
            _ => Self::Failed,
        }
    }

    /// Initial status for a freshly ingested file of `kind`.
    pub fn initial_for(kind: &FileKind) -> Self {
        if kind.is_volumetric() {
            Self::Pending
        } else {
            Self::NotApplicable
        }
    }
}

/// File record ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileRecord {
    /// Detected file kind.
    pub filetype: FileKind,
    /// Blob storage key.
    pub path: String,
    /// Hex SHA-256 of the stored bytes.
    pub content_hash: String,
    /// Parcellation used to derive the file, for parcelwise artifacts.
    pub parcellation_id: Option<i64>,
    /// Owner linkage and tags.
    pub descriptor: FileDescriptor,
    /// Template space, once known.
    pub coordinate_space: Option<CoordinateSpace>,
    /// Source file for derived artifacts.
    pub source_file_id: Option<i64>,
    /// Initial reduction state.
    pub index_status: IndexStatus,
}

/// Persisted derived file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileRecord {
    /// Primary key.
    pub id: i64,
    /// Detected file kind.
    pub filetype: FileKind,
    /// Blob storage key.
    pub path: String,
    /// Hex SHA-256 of the stored bytes.
    pub content_hash: String,
    /// Parcellation used to derive the file.
    pub parcellation_id: Option<i64>,
    /// Owner linkage and tags.
    pub descriptor: FileDescriptor,
    /// Template space detected during reduction.
    pub coordinate_space: Option<CoordinateSpace>,
    /// Source file for derived artifacts.
    pub source_file_id: Option<i64>,
    /// Reduction state.
    pub index_status: IndexStatus,
    /// Last reduction failure.
    pub index_error: Option<String>,
    /// Insert timestamp.
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// Category of the file.
    pub const fn category(&self) -> FileCategory {
        self.descriptor.category()
    }

    /// True for parcelwise artifacts produced by reduction.
    pub const fn is_derived_artifact(&self) -> bool {
        self.source_file_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn subject_files_share_a_sequence_key() {
        let roi = FileDescriptor::Roi { subject_id: 7 };
        let connectivity = FileDescriptor::Connectivity {
            subject_id: 7,
            connectome: "yeo1000".to_owned(),
            statistic: "t".to_owned(),
        };
        assert_eq!(roi.sequence_key(), connectivity.sequence_key());
        assert_eq!(roi.sequence_key().as_deref(), Some("subject-7"));
    }

    #[rstest]
    fn connectivity_tags_need_a_connectome() {
        let tags = FileTags {
            subject_id: Some(1),
            statistic: Some("t".to_owned()),
            ..FileTags::default()
        };
        let error = FileDescriptor::from_tags(FileCategory::Connectivity, tags)
            .expect_err("missing connectome");
        assert_eq!(error.message(), "connectivity files require connectome");
    }

    #[rstest]
    fn group_level_tags_build_a_map_descriptor() {
        let tags = FileTags {
            taxonomy_level: Some(TaxonomyLevel::Symptom),
            taxon: Some("Aphasia".to_owned()),
            map_type: Some("lnm".to_owned()),
            statistic: Some("t".to_owned()),
            ..FileTags::default()
        };
        let descriptor =
            FileDescriptor::from_tags(FileCategory::GroupLevelMap, tags).expect("descriptor");
        assert_eq!(descriptor.subject_id(), None);
        assert_eq!(descriptor.category(), FileCategory::GroupLevelMap);
    }

    #[rstest]
    fn group_level_maps_have_no_owner() {
        let descriptor = FileDescriptor::GroupLevelMap {
            level: TaxonomyLevel::Domain,
            taxon: "Memory".to_owned(),
            map_type: "lnm".to_owned(),
            statistic: "t".to_owned(),
        };
        assert_eq!(descriptor.subject_id(), None);
        assert_eq!(descriptor.sequence_key(), None);
        assert_eq!(descriptor.category(), FileCategory::GroupLevelMap);
    }

    #[rstest]
    #[case(FileKind::NiftiGz, IndexStatus::Pending)]
    #[case(FileKind::Nifti, IndexStatus::Pending)]
    #[case(FileKind::Csv, IndexStatus::NotApplicable)]
    fn initial_status_follows_kind(#[case] kind: FileKind, #[case] expected: IndexStatus) {
        assert_eq!(IndexStatus::initial_for(&kind), expected);
    }
}
