//! Conversions between NIfTI-1 header orientation fields and [`Affine`].

use nifti::NiftiHeader;

use crate::domain::imaging::Affine;

/// NIfTI `sform_code` for "aligned to another file's space".
const SFORM_ALIGNED: i16 = 2;
/// NIfTI `xyzt_units` for millimetres.
const UNITS_MM: u8 = 2;

/// Voxel-to-world affine of `header`.
///
/// Prefers the sform, then the quaternion qform, then bare voxel spacing.
pub(super) fn affine_from_header(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let row = |srow: [f32; 4]| srow.map(f64::from);
        return Affine::new([row(header.srow_x), row(header.srow_y), row(header.srow_z)]);
    }
    if header.qform_code > 0 {
        return qform_affine(header);
    }
    let [_, dx, dy, dz, ..] = header.pixdim.map(f64::from);
    Affine::new([
        [dx, 0.0, 0.0, 0.0],
        [0.0, dy, 0.0, 0.0],
        [0.0, 0.0, dz, 0.0],
    ])
}

fn qform_affine(header: &NiftiHeader) -> Affine {
    let b = f64::from(header.quatern_b);
    let c = f64::from(header.quatern_c);
    let d = f64::from(header.quatern_d);
    let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
    let rotation = [
        [
            a * a + b * b - c * c - d * d,
            2.0 * (b * c - a * d),
            2.0 * (b * d + a * c),
        ],
        [
            2.0 * (b * c + a * d),
            a * a + c * c - b * b - d * d,
            2.0 * (c * d - a * b),
        ],
        [
            2.0 * (b * d - a * c),
            2.0 * (c * d + a * b),
            a * a + d * d - c * c - b * b,
        ],
    ];
    let qfac = if header.pixdim[0] < 0.0 { -1.0 } else { 1.0 };
    let scale = [
        f64::from(header.pixdim[1]),
        f64::from(header.pixdim[2]),
        qfac * f64::from(header.pixdim[3]),
    ];
    let offset = [
        f64::from(header.quatern_x),
        f64::from(header.quatern_y),
        f64::from(header.quatern_z),
    ];
    let mut rows = [[0.0; 4]; 3];
    for (row, (rotation_row, translation)) in rows.iter_mut().zip(rotation.iter().zip(offset)) {
        for ((cell, rotated), spacing) in row.iter_mut().zip(rotation_row).zip(scale) {
            *cell = rotated * spacing;
        }
        row[3] = translation;
    }
    Affine::new(rows)
}

/// Header carrying `affine` as an aligned sform.
#[expect(
    clippy::cast_possible_truncation,
    reason = "NIfTI-1 stores orientation as f32"
)]
pub(super) fn header_for(affine: &Affine) -> NiftiHeader {
    let rows = affine.rows();
    let to_f32 = |row: [f64; 4]| row.map(|value| value as f32);
    let spacing = |axis: usize| {
        rows.iter()
            .map(|row| row[axis] * row[axis])
            .sum::<f64>()
            .sqrt() as f32
    };
    let mut pixdim = [1.0_f32; 8];
    pixdim[1] = spacing(0);
    pixdim[2] = spacing(1);
    pixdim[3] = spacing(2);

    NiftiHeader {
        pixdim,
        sform_code: SFORM_ALIGNED,
        qform_code: 0,
        srow_x: to_f32(rows[0]),
        srow_y: to_f32(rows[1]),
        srow_z: to_f32(rows[2]),
        xyzt_units: UNITS_MM,
        ..NiftiHeader::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn sform_round_trips_through_the_header() {
        let affine = Affine::isotropic(2.0, [-90.0, -126.0, -72.0]);
        let header = header_for(&affine);
        assert_eq!(header.pixdim[1..4], [2.0, 2.0, 2.0]);
        assert!(affine_from_header(&header).approx_eq(&affine));
    }

    #[rstest]
    fn identity_quaternion_scales_by_pixdim() {
        let header = NiftiHeader {
            qform_code: 1,
            sform_code: 0,
            pixdim: [1.0, 2.0, 2.0, 2.0, 0.0, 0.0, 0.0, 0.0],
            quatern_x: -90.0,
            quatern_y: -126.0,
            quatern_z: -72.0,
            ..NiftiHeader::default()
        };
        let expected = Affine::isotropic(2.0, [-90.0, -126.0, -72.0]);
        assert!(affine_from_header(&header).approx_eq(&expected));
    }

    #[rstest]
    fn half_turn_with_negative_qfac_negates_each_axis() {
        // d = 1 rotates 180 degrees about z; qfac -1 then negates z.
        let header = NiftiHeader {
            qform_code: 1,
            sform_code: 0,
            pixdim: [-1.0, 1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0],
            quatern_d: 1.0,
            ..NiftiHeader::default()
        };
        let rows = *affine_from_header(&header).rows();
        assert_eq!(rows[0][0], -1.0);
        assert_eq!(rows[1][1], -1.0);
        assert_eq!(rows[2][2], -1.0);
    }

    #[rstest]
    fn missing_orientation_falls_back_to_spacing() {
        let header = NiftiHeader {
            qform_code: 0,
            sform_code: 0,
            pixdim: [1.0, 3.0, 3.0, 3.0, 0.0, 0.0, 0.0, 0.0],
            ..NiftiHeader::default()
        };
        assert!(affine_from_header(&header).approx_eq(&Affine::isotropic(3.0, [0.0; 3])));
    }
}
