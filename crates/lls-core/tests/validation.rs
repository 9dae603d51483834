//! Integration tests: building a `LatticeData` and walking its slices.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use lls_core::{
    Axis, CropParams, DeconvolutionParams, ImageInput, LabeledArray, LatticeData, LatticeParams,
    RoiInput, deskewed_geometry,
};
use ndarray::{Array3, Array4, Array5, ArrayD, IxDyn};

fn zyx(shape: (usize, usize, usize)) -> Array3<f32> {
    Array3::from_shape_fn(shape, |(z, y, x)| {
        f32::from(u16::try_from(z * 100 + y * 10 + x).unwrap_or(u16::MAX))
    })
}

fn square() -> RoiInput {
    RoiInput::Vertices(vec![[0.0, 0.0], [0.0, 4.0], [4.0, 4.0], [4.0, 0.0]])
}

#[test]
fn three_dimensional_input_scenario() {
    let lattice = LatticeData::new(LatticeParams::new(zyx((10, 20, 30)))).unwrap();
    assert_eq!(lattice.channels(), 1);
    assert_eq!(lattice.time(), 1);
    assert!(!lattice.cropping_enabled());
    assert!(!lattice.deconv_enabled());

    let shape = lattice.deskew_vol_shape();
    assert!(shape.iter().all(|&n| n > 0));
    let again = LatticeData::new(LatticeParams::new(zyx((10, 20, 30)))).unwrap();
    assert_eq!(again.deskew_vol_shape(), shape);

    assert_eq!(lattice.iter_slices().count(), 1);
    let new_dz = (30.0_f64).to_radians().sin() * lattice.dz();
    assert!((lattice.new_dz() - new_dz).abs() < 1e-12);
}

#[test]
fn geometry_is_a_pure_function_of_its_inputs() {
    let lattice = LatticeData::new(LatticeParams::new(zyx((6, 8, 10)))).unwrap();
    let derive = || {
        deskewed_geometry(
            [6, 8, 10],
            lattice.angle(),
            lattice.physical_pixel_sizes(),
            lattice.skew(),
        )
    };
    let first = derive();
    let second = derive();
    assert_eq!(first, second);
    assert_eq!(first.shape, lattice.deskew_vol_shape());
    assert_eq!(&first.transform, lattice.deskew_affine_transform());
}

#[test]
fn slices_cover_the_grid_in_time_major_order() {
    let image = Array5::<f32>::zeros((3, 2, 4, 5, 6));
    let mut params = LatticeParams::new(image);
    params.time_range = Some((1..3).into());
    let lattice = LatticeData::new(params).unwrap();

    let positions: Vec<(usize, usize, usize, usize)> = lattice
        .iter_slices()
        .map(|s| {
            let s = s.unwrap();
            (s.time_index, s.time, s.channel_index, s.channel)
        })
        .collect();
    assert_eq!(
        positions,
        vec![(0, 1, 0, 0), (0, 1, 1, 1), (1, 2, 0, 0), (1, 2, 1, 1)]
    );

    // restartable
    assert_eq!(lattice.iter_slices().count(), 4);
}

#[test]
fn inputs_of_every_rank_normalize_to_the_same_shape() {
    let volume = zyx((4, 5, 6));
    let three = LatticeData::new(LatticeParams::new(volume.clone())).unwrap();

    let four = LabeledArray::new(
        volume.clone().insert_axis(ndarray::Axis(0)).into_dyn(),
        vec![Axis::T, Axis::Z, Axis::Y, Axis::X],
    )
    .unwrap();
    let four = LatticeData::new(LatticeParams::new(four)).unwrap();

    let five = Array5::from_shape_vec((1, 1, 4, 5, 6), volume.iter().copied().collect()).unwrap();
    let five = LatticeData::new(LatticeParams::new(five)).unwrap();

    for lattice in [&three, &four, &five] {
        assert_eq!(lattice.input_image().shape(), [1, 1, 4, 5, 6]);
        assert_eq!(lattice.dims(), [Axis::T, Axis::C, Axis::Z, Axis::Y, Axis::X]);
    }
    let a = three.slice_data(0, 0).unwrap().materialize().unwrap();
    let b = four.slice_data(0, 0).unwrap().materialize().unwrap();
    assert_eq!(a, b);
}

#[test]
fn reordered_axes_are_canonicalized() {
    // stored as Z, X, C, Y
    let data = ArrayD::<f32>::zeros(IxDyn(&[4, 6, 2, 5]));
    let labeled = LabeledArray::new(data, vec![Axis::Z, Axis::X, Axis::C, Axis::Y]).unwrap();
    let lattice = LatticeData::new(LatticeParams::new(labeled)).unwrap();
    assert_eq!(lattice.input_image().shape(), [1, 2, 4, 5, 6]);
    assert_eq!(lattice.channels(), 2);
}

#[test]
fn missing_spatial_axis_is_a_validation_error() {
    let data = ArrayD::<f32>::zeros(IxDyn(&[2, 5, 6]));
    let labeled = LabeledArray::new(data, vec![Axis::C, Axis::Y, Axis::X]).unwrap();
    let err = LatticeData::new(LatticeParams::new(labeled)).unwrap_err();
    let messages: Vec<&str> = err.messages_for("input_image").collect();
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains('Z'));
}

#[test]
fn full_extent_ranges_validate() {
    let image = Array5::<f32>::zeros((3, 2, 2, 3, 4));
    let mut params = LatticeParams::new(image);
    params.time_range = Some((0..3).into());
    params.channel_range = Some((0..2).into());
    let lattice = LatticeData::new(params).unwrap();
    assert_eq!(lattice.output().time_range(), 0..3);
    assert_eq!(lattice.output().channel_range(), 0..2);
}

#[test]
fn ranges_default_to_the_full_extent() {
    let image = Array5::<f32>::zeros((3, 2, 2, 3, 4));
    let lattice = LatticeData::new(LatticeParams::new(image)).unwrap();
    assert_eq!(lattice.output().time_range(), 0..3);
    assert_eq!(lattice.output().channel_range(), 0..2);
}

#[test]
fn range_past_the_axis_names_the_field() {
    let image = Array5::<f32>::zeros((3, 2, 2, 3, 4));
    let mut params = LatticeParams::new(image.clone());
    params.time_range = Some((0..4).into());
    let err = LatticeData::new(params).unwrap_err();
    assert!(err.has_field("time_range"));
    assert!(!err.has_field("channel_range"));

    let mut params = LatticeParams::new(image);
    params.channel_range = Some(lls_core::RangeInput {
        start: Some(1),
        stop: Some(3),
    });
    let err = LatticeData::new(params).unwrap_err();
    assert!(err.has_field("channel_range"));
}

#[test]
fn inverted_range_is_rejected() {
    let image = Array5::<f32>::zeros((3, 1, 2, 3, 4));
    let mut params = LatticeParams::new(image);
    params.time_range = Some(lls_core::RangeInput {
        start: Some(2),
        stop: Some(1),
    });
    assert!(LatticeData::new(params).unwrap_err().has_field("time_range"));
}

#[test]
fn psf_count_must_match_channel_count() {
    let image = Array5::<f32>::zeros((1, 2, 4, 5, 6));
    let mut params = LatticeParams::new(image);
    params.deconvolution = Some(DeconvolutionParams {
        psf: vec![ImageInput::from(Array3::<f32>::ones((3, 3, 3)))],
        ..DeconvolutionParams::default()
    });
    let err = LatticeData::new(params).unwrap_err();
    let message = err.messages_for("deconvolution.psf").next().unwrap();
    assert!(message.contains("1 PSFs"), "{message}");
    assert!(message.contains("2 channels"), "{message}");
}

#[test]
fn matching_psfs_enable_deconvolution() {
    let image = Array5::<f32>::zeros((1, 2, 4, 5, 6));
    let mut params = LatticeParams::new(image);
    params.deconvolution = Some(DeconvolutionParams {
        psf: vec![
            ImageInput::from(Array3::<f32>::ones((3, 3, 3))),
            ImageInput::from(Array3::<f32>::ones((3, 3, 3))),
        ],
        ..DeconvolutionParams::default()
    });
    let lattice = LatticeData::new(params).unwrap();
    assert!(lattice.deconv_enabled());
    assert_eq!(lattice.deconvolution().unwrap().psf().len(), 2);
}

#[test]
fn z_range_defaults_to_the_image_extent() {
    let mut params = LatticeParams::new(zyx((8, 10, 10)));
    params.crop = Some(CropParams {
        roi_list: vec![square()],
        ..CropParams::default()
    });
    let lattice = LatticeData::new(params).unwrap();
    assert!(lattice.cropping_enabled());
    let crop = lattice.crop().unwrap();
    assert_eq!(crop.z_range(), (0, 8));
}

#[test]
fn open_z_bound_is_filled_in() {
    let mut params = LatticeParams::new(zyx((8, 10, 10)));
    params.crop = Some(CropParams {
        roi_list: vec![square()],
        z_range: Some((Some(2), None)),
        ..CropParams::default()
    });
    let lattice = LatticeData::new(params).unwrap();
    assert_eq!(lattice.crop().unwrap().z_range(), (2, 8));
}

#[test]
fn selected_rois_default_to_every_roi_in_order() {
    let second = RoiInput::Vertices(vec![[1.0, 1.0], [1.0, 2.0], [2.0, 2.0]]);
    let mut params = LatticeParams::new(zyx((4, 10, 10)));
    params.crop = Some(CropParams {
        roi_list: vec![square(), second],
        ..CropParams::default()
    });
    let lattice = LatticeData::new(params).unwrap();
    let crop = lattice.crop().unwrap();
    let selected: Vec<_> = crop.selected_rois().collect();
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0], &crop.roi_list()[0]);
    assert_eq!(selected[1], &crop.roi_list()[1]);
    assert_eq!(crop.roi_subset(), &[0, 1]);
}

#[test]
fn out_of_range_roi_index_is_rejected() {
    let mut params = LatticeParams::new(zyx((4, 10, 10)));
    params.crop = Some(CropParams {
        roi_list: vec![square()],
        roi_subset: Some(vec![0, 3]),
        z_range: None,
    });
    let err = LatticeData::new(params).unwrap_err();
    assert!(err.has_field("crop.roi_subset"));
}

#[test]
fn save_defaults_follow_the_input_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cell_01.npy");
    ndarray_npy::write_npy(&path, &Array4::<f32>::zeros((2, 3, 4, 5))).unwrap();

    let lattice = LatticeData::new(LatticeParams::new(path)).unwrap();
    assert_eq!(lattice.output().save_name(), "cell_01");
    assert_eq!(lattice.output().save_dir(), dir.path());
    assert_eq!(lattice.channels(), 2);
}

#[test]
fn sublattices_narrow_the_psf_list() {
    let image = Array5::<f32>::zeros((1, 2, 4, 5, 6));
    let mut params = LatticeParams::new(image);
    params.deconvolution = Some(DeconvolutionParams {
        psf: vec![
            ImageInput::from(Array3::<f32>::ones((1, 1, 1))),
            ImageInput::from(Array3::<f32>::from_elem((1, 1, 1), 2.0)),
        ],
        ..DeconvolutionParams::default()
    });
    let lattice = LatticeData::new(params).unwrap();
    let subs: Vec<_> = lattice.iter_sublattices(|_| {}).map(Result::unwrap).collect();
    assert_eq!(subs.len(), 2);
    let psf = &subs[1].data.deconvolution().unwrap().psf()[0];
    assert!((psf[[0, 0, 0]] - 2.0).abs() < f32::EPSILON);
    assert_eq!(subs[1].data.channels(), 1);
}

#[test]
fn bad_pixel_sizes_from_a_config_join_the_error_report() {
    let params: LatticeParams = serde_json::from_str(
        r#"{"physical_pixel_sizes": [0.0, 0.1, 0.3], "angle": 95.0, "input_image": "missing.npy"}"#,
    )
    .unwrap();
    let err = LatticeData::new(params).unwrap_err();
    let message = err.messages_for("physical_pixel_sizes").next().unwrap();
    assert!(message.contains('X'), "{message}");
    assert!(err.has_field("angle"));
    assert!(err.has_field("input_image"));
}
