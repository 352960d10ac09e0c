//! Deterministic blob storage keys.
//!
//! Keys encode the owner, the per-owner file sequence number, and the
//! category tags, so two uploads never share a key unless they describe the
//! same group-level map.

use super::FileDescriptor;
use super::imaging::FileKind;

/// Lowercase `value` and collapse runs of non-word characters into `_`.
///
/// # Examples
/// ```
/// use lesion_bank::domain::storage_keys::sanitize_tag;
///
/// assert_eq!(sanitize_tag("Yeo 1000 / GSP"), "yeo_1000_gsp");
/// ```
pub fn sanitize_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut in_run = false;
    for ch in value.chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() || ch == '_' {
            out.push(ch);
            in_run = false;
        } else if !in_run {
            out.push('_');
            in_run = true;
        }
    }
    out
}

/// Storage key for an uploaded file.
///
/// `sequence` is required for subject-owned files and ignored for
/// group-level maps.
pub fn upload_key(descriptor: &FileDescriptor, sequence: Option<i64>, kind: &FileKind) -> String {
    let ext = kind.as_str();
    let n = sequence.unwrap_or_default();
    match descriptor {
        FileDescriptor::Roi { subject_id } => {
            format!("subjects/sub-{subject_id}/roi/sub-{subject_id}_file-{n}_roi.{ext}")
        }
        FileDescriptor::Connectivity {
            subject_id,
            connectome,
            statistic,
        } => format!(
            "subjects/sub-{subject_id}/connectivity/sub-{subject_id}_file-{n}_tome-{}_stat-{}_conn.{ext}",
            sanitize_tag(connectome),
            sanitize_tag(statistic),
        ),
        FileDescriptor::GroupLevelMap {
            level,
            taxon,
            map_type,
            statistic,
        } => {
            let taxon = sanitize_tag(taxon);
            format!(
                "group_level_maps/{}/{taxon}/{taxon}_{}_{}.{ext}",
                level.plural(),
                sanitize_tag(map_type),
                sanitize_tag(statistic),
            )
        }
    }
}

/// Storage key for the parcelwise artifact derived from `source_path`.
///
/// The `.{ext}` suffix becomes `_parcellation-{name}.npy`. When the source
/// key carries a `_file-{n}_` segment it is rewritten to `sequence`.
///
/// # Examples
/// ```
/// use lesion_bank::domain::imaging::FileKind;
/// use lesion_bank::domain::storage_keys::derived_artifact_key;
///
/// let key = derived_artifact_key(
///     "subjects/sub-3/roi/sub-3_file-1_roi.nii.gz",
///     &FileKind::NiftiGz,
///     "Schaefer 400",
///     Some(2),
/// );
/// assert_eq!(key, "subjects/sub-3/roi/sub-3_file-2_roi_parcellation-schaefer_400.npy");
/// ```
pub fn derived_artifact_key(
    source_path: &str,
    source_kind: &FileKind,
    parcellation_name: &str,
    sequence: Option<i64>,
) -> String {
    let suffix = format!(".{}", source_kind.as_str());
    let stem = source_path.strip_suffix(&suffix).unwrap_or(source_path);
    let stem = match sequence {
        Some(n) => rewrite_file_segment(stem, n),
        None => stem.to_owned(),
    };
    format!("{stem}_parcellation-{}.npy", sanitize_tag(parcellation_name))
}

fn rewrite_file_segment(stem: &str, sequence: i64) -> String {
    let Some(start) = stem.rfind("_file-") else {
        return stem.to_owned();
    };
    let digits_start = start + "_file-".len();
    let rest = &stem[digits_start..];
    let digits_len = rest.chars().take_while(char::is_ascii_digit).count();
    if digits_len == 0 || !rest[digits_len..].starts_with('_') {
        return stem.to_owned();
    }
    format!(
        "{}{sequence}{}",
        &stem[..digits_start],
        &rest[digits_len..]
    )
}

/// Storage key for the ROI volume submitted to a full analysis.
pub fn generated_roi_key(task_id: &str) -> String {
    format!("generated_content/{task_id}_roi.nii.gz")
}

/// Storage key for the connectivity map produced by a full analysis.
pub fn generated_connectivity_key(task_id: &str) -> String {
    format!("generated_content/{task_id}_connectivity.nii.gz")
}

/// Storage key of a precomputed chunk map for `connectome`.
pub fn connectome_chunk_key(connectome: &str, label: i32) -> String {
    format!("connectomes/{}/chunk-{label}.npy", sanitize_tag(connectome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaxonomyLevel;
    use rstest::rstest;

    #[rstest]
    fn roi_key_encodes_subject_and_sequence() {
        let key = upload_key(
            &FileDescriptor::Roi { subject_id: 12 },
            Some(4),
            &FileKind::NiftiGz,
        );
        assert_eq!(key, "subjects/sub-12/roi/sub-12_file-4_roi.nii.gz");
    }

    #[rstest]
    fn connectivity_key_sanitizes_tags() {
        let descriptor = FileDescriptor::Connectivity {
            subject_id: 5,
            connectome: "GSP 1000 (MF)".to_owned(),
            statistic: "avgR".to_owned(),
        };
        let key = upload_key(&descriptor, Some(1), &FileKind::Nifti);
        assert_eq!(
            key,
            "subjects/sub-5/connectivity/sub-5_file-1_tome-gsp_1000_mf__stat-avgr_conn.nii"
        );
    }

    #[rstest]
    fn group_level_map_key_uses_plural_level() {
        let descriptor = FileDescriptor::GroupLevelMap {
            level: TaxonomyLevel::Subdomain,
            taxon: "Visual Neglect".to_owned(),
            map_type: "lnm".to_owned(),
            statistic: "t".to_owned(),
        };
        let key = upload_key(&descriptor, None, &FileKind::NiftiGz);
        assert_eq!(
            key,
            "group_level_maps/subdomains/visual_neglect/visual_neglect_lnm_t.nii.gz"
        );
    }

    #[rstest]
    fn artifact_key_without_file_segment_keeps_stem() {
        let key = derived_artifact_key(
            "group_level_maps/domains/memory/memory_lnm_t.nii.gz",
            &FileKind::NiftiGz,
            "aal",
            Some(9),
        );
        assert_eq!(
            key,
            "group_level_maps/domains/memory/memory_lnm_t_parcellation-aal.npy"
        );
    }

    #[rstest]
    #[case("a  b", "a_b")]
    #[case("--x--", "_x_")]
    #[case("Already_fine", "already_fine")]
    fn sanitize_collapses_runs(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(sanitize_tag(raw), expected);
    }

    #[rstest]
    fn generated_keys_are_task_scoped() {
        assert_eq!(generated_roi_key("abc"), "generated_content/abc_roi.nii.gz");
        assert_eq!(
            generated_connectivity_key("abc"),
            "generated_content/abc_connectivity.nii.gz"
        );
    }
}
