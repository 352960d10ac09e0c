//! Filename-based file kind detection.

use std::fmt;

/// File kind inferred from an upload's declared filename.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// Gzipped NIfTI volume.
    NiftiGz,
    /// Uncompressed NIfTI volume.
    Nifti,
    /// NumPy array.
    Npy,
    /// NumPy archive.
    Npz,
    /// GIFTI surface data.
    Gifti,
    /// FreeSurfer compressed volume.
    Mgz,
    /// Surface mesh.
    Surface,
    /// FreeSurfer label.
    Label,
    /// FreeSurfer annotation.
    Annot,
    /// fsaverage template asset.
    Fsaverage,
    /// Other FreeSurfer derived output.
    Freesurfer,
    /// PNG image.
    Png,
    /// JPEG image.
    Jpg,
    /// Gzipped tractography streamlines.
    TrkGz,
    /// Tractography streamlines.
    Trk,
    /// Edge list.
    Edge,
    /// MATLAB matrix.
    Mat,
    /// GIF image.
    Gif,
    /// PDF document.
    Pdf,
    /// Plain text.
    Txt,
    /// Comma separated values.
    Csv,
    /// Legacy Excel workbook.
    Xls,
    /// Excel workbook.
    Xlsx,
    /// Unrecognised; carries the last five characters of the filename.
    Unknown(String),
}

const FREESURFER_MARKERS: [&str; 6] = ["aparc", "aseg", "bert", "curv", "sulc", "thickness"];
const SURFACE_MARKERS: [&str; 3] = ["lh.", "rh.", ".surf"];

impl FileKind {
    /// Classify a filename.
    ///
    /// Checks run in a fixed order so `.nii.gz` wins over the bare `.nii`
    /// substring test and `.trk.gz` wins over `.trk`.
    ///
    /// # Examples
    /// ```
    /// use lesion_bank::domain::imaging::FileKind;
    ///
    /// assert_eq!(FileKind::from_filename("sub-1_roi.nii.gz"), FileKind::NiftiGz);
    /// assert_eq!(FileKind::from_filename("sub-1_roi.nii"), FileKind::Nifti);
    /// assert_eq!(FileKind::from_filename("notes.docx").as_str(), "unknown (.docx)");
    /// ```
    pub fn from_filename(filename: &str) -> Self {
        let lower = filename.to_lowercase();
        let ends = |suffix: &str| filename.ends_with(suffix);

        if ends(".nii.gz") {
            Self::NiftiGz
        } else if filename.contains(".nii") {
            Self::Nifti
        } else if ends(".npy") {
            Self::Npy
        } else if ends(".npz") {
            Self::Npz
        } else if filename.contains(".gii") {
            Self::Gifti
        } else if ends(".mgz") {
            Self::Mgz
        } else if SURFACE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            Self::Surface
        } else if lower.contains(".label") {
            Self::Label
        } else if lower.contains(".annot") {
            Self::Annot
        } else if lower.contains("fsaverage") {
            Self::Fsaverage
        } else if FREESURFER_MARKERS.iter().any(|marker| lower.contains(marker)) {
            Self::Freesurfer
        } else {
            Self::from_plain_suffix(filename)
        }
    }

    fn from_plain_suffix(filename: &str) -> Self {
        const SUFFIXES: [(&str, FileKind); 13] = [
            (".png", FileKind::Png),
            (".jpg", FileKind::Jpg),
            (".jpeg", FileKind::Jpg),
            (".trk.gz", FileKind::TrkGz),
            (".trk", FileKind::Trk),
            (".edge", FileKind::Edge),
            (".mat", FileKind::Mat),
            (".gif", FileKind::Gif),
            (".pdf", FileKind::Pdf),
            (".txt", FileKind::Txt),
            (".csv", FileKind::Csv),
            (".xls", FileKind::Xls),
            (".xlsx", FileKind::Xlsx),
        ];

        SUFFIXES
            .into_iter()
            .find(|(suffix, _)| filename.ends_with(suffix))
            .map_or_else(|| Self::Unknown(last_chars(filename, 5)), |(_, kind)| kind)
    }

    /// Canonical extension label, also used as the stored extension.
    pub fn as_str(&self) -> String {
        let label = match self {
            Self::NiftiGz => "nii.gz",
            Self::Nifti => "nii",
            Self::Npy => "npy",
            Self::Npz => "npz",
            Self::Gifti => "gii",
            Self::Mgz => "mgz",
            Self::Surface => "surf",
            Self::Label => "label",
            Self::Annot => "annot",
            Self::Fsaverage => "fsaverage",
            Self::Freesurfer => "freesurfer",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::TrkGz => "trk.gz",
            Self::Trk => "trk",
            Self::Edge => "edge",
            Self::Mat => "mat",
            Self::Gif => "gif",
            Self::Pdf => "pdf",
            Self::Txt => "txt",
            Self::Csv => "csv",
            Self::Xls => "xls",
            Self::Xlsx => "xlsx",
            Self::Unknown(tail) => return format!("unknown ({tail})"),
        };
        label.to_owned()
    }

    /// Parse a stored filetype label back into a kind.
    pub fn from_label(label: &str) -> Self {
        match label {
            "nii.gz" => Self::NiftiGz,
            "nii" => Self::Nifti,
            "npy" => Self::Npy,
            "npz" => Self::Npz,
            "gii" => Self::Gifti,
            "mgz" => Self::Mgz,
            "surf" => Self::Surface,
            "label" => Self::Label,
            "annot" => Self::Annot,
            "fsaverage" => Self::Fsaverage,
            "freesurfer" => Self::Freesurfer,
            "png" => Self::Png,
            "jpg" => Self::Jpg,
            "trk.gz" => Self::TrkGz,
            "trk" => Self::Trk,
            "edge" => Self::Edge,
            "mat" => Self::Mat,
            "gif" => Self::Gif,
            "pdf" => Self::Pdf,
            "txt" => Self::Txt,
            "csv" => Self::Csv,
            "xls" => Self::Xls,
            "xlsx" => Self::Xlsx,
            other => Self::Unknown(
                other
                    .strip_prefix("unknown (")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .unwrap_or(other)
                    .to_owned(),
            ),
        }
    }

    /// True for kinds holding a 3-D volume that can be reduced parcelwise.
    pub fn is_volumetric(&self) -> bool {
        matches!(self, Self::NiftiGz | Self::Nifti)
    }

    /// True for kinds that are accepted at the ingestion boundary.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_str())
    }
}

fn last_chars(value: &str, count: usize) -> String {
    let total = value.chars().count();
    value.chars().skip(total.saturating_sub(count)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("sub-1_file-2_roi.nii.gz", FileKind::NiftiGz)]
    #[case("sub-1_file-2_roi.nii", FileKind::Nifti)]
    #[case("weights.npy", FileKind::Npy)]
    #[case("bundle.npz", FileKind::Npz)]
    #[case("lh.pial.gii", FileKind::Gifti)]
    #[case("lh.white", FileKind::Surface)]
    #[case("brain.mgz", FileKind::Mgz)]
    #[case("scan.JPEG", FileKind::Unknown(".JPEG".to_owned()))]
    #[case("scan.jpeg", FileKind::Jpg)]
    #[case("tracts.trk.gz", FileKind::TrkGz)]
    #[case("tracts.trk", FileKind::Trk)]
    #[case("table.xlsx", FileKind::Xlsx)]
    fn classifies_in_precedence_order(#[case] filename: &str, #[case] expected: FileKind) {
        assert_eq!(FileKind::from_filename(filename), expected);
    }

    #[rstest]
    fn gzipped_nifti_is_not_mistaken_for_plain_nifti() {
        let kind = FileKind::from_filename("map.nii.gz");
        assert_eq!(kind.as_str(), "nii.gz");
        assert!(kind.is_volumetric());
    }

    #[rstest]
    fn unknown_kind_keeps_filename_tail() {
        let kind = FileKind::from_filename("report.docx");
        assert_eq!(kind.as_str(), "unknown (.docx)");
        assert!(!kind.is_known());
        assert_eq!(FileKind::from_label(&kind.as_str()), kind);
    }

    #[rstest]
    #[case(FileKind::NiftiGz)]
    #[case(FileKind::Nifti)]
    #[case(FileKind::Npy)]
    #[case(FileKind::Csv)]
    fn stored_labels_parse_back(#[case] kind: FileKind) {
        assert_eq!(FileKind::from_label(&kind.as_str()), kind);
    }
}
