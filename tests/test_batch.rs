
use ndarray::{s, Array, Array3, ArrayD, Axis, IxDyn};
use temporal_gapfill::batch::{vectorize_core_dim, worker_pool, CORE_DIM};
use temporal_gapfill::{
    apply_gpr, create_prediction_timeseries, gap_fill_pixel, map_cube, map_elements, ChunkLayout,
    FitFailurePolicy, GapFillError, GridApplicator, Kernel, PixelWeights, PredictionAxis,
    RasterCube, SufficiencyGuard, Uncertainty,
};

fn axis() -> PredictionAxis {
    create_prediction_timeseries("2000-01-01", "2001-01-01", "M").unwrap()
}

// ---------------------------------------------------------------------------
// Grid shapes
// ---------------------------------------------------------------------------

#[test]
fn output_shape_for_various_grids() {
    synthetic::init_logging();
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    for (ny, nx) in [(1, 1), (10, 10), (100, 1)] {
        let cube = synthetic::seasonal_cube(24, ny, nx, 0.2, 7);
        let raw = apply_gpr(
            &cube,
            "time",
            &kernel,
            &axis,
            &Uncertainty::Scalar(0.01),
            &SufficiencyGuard::default(),
        )
        .unwrap();
        assert_eq!(raw.mean.shape(), &[ny, nx, 13]);
        assert_eq!(raw.std.shape(), &[ny, nx, 13]);
        assert_eq!(raw.mean.dims(), &["y", "x", CORE_DIM]);
        assert_eq!(raw.summary.pixels, ny * nx);
        assert_eq!(
            raw.summary.fitted + raw.summary.insufficient + raw.summary.failed,
            raw.summary.pixels
        );
    }
}

#[test]
fn grid_cell_matches_single_pixel_fit() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let guard = SufficiencyGuard::default();
    let cube = synthetic::seasonal_cube(24, 10, 10, 0.3, 11).chunked(&[24, 3, 4]).unwrap();
    let raw = apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::Scalar(0.01), &guard).unwrap();

    let times = cube.coord("time").unwrap();
    for (y, x) in [(0, 0), (2, 3), (9, 9), (5, 0)] {
        let series = cube.data().slice(s![.., y, x]).iter().copied().collect::<Vec<f64>>();
        let direct = gap_fill_pixel(
            times,
            &series,
            PixelWeights::Scalar(0.01),
            &kernel,
            axis.values(),
            &guard,
            FitFailurePolicy::Degrade,
        )
        .unwrap();
        let mean = raw.mean.data().slice(s![y, x, ..]).iter().copied().collect::<Vec<f64>>();
        let std = raw.std.data().slice(s![y, x, ..]).iter().copied().collect::<Vec<f64>>();
        assert!(synthetic::same_values(&mean, &direct.result.mean), "pixel ({y}, {x})");
        assert!(synthetic::same_values(&std, &direct.result.std), "pixel ({y}, {x})");
    }
}

#[test]
fn fitted_pixels_track_the_seasonal_signal() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let cube = synthetic::seasonal_cube(36, 2, 2, 0.1, 3);
    let raw = apply_gpr(
        &cube,
        "time",
        &kernel,
        &axis,
        &Uncertainty::Scalar(0.01),
        &SufficiencyGuard::default(),
    )
    .unwrap();
    assert_eq!(raw.summary.fitted, 4);
    // Interior months, away from the edges of the sampled interval.
    for k in 2..11 {
        let t = axis.values()[k];
        let expected = synthetic::seasonal(t, 0.1 * 3.0);
        let got = raw.mean.data()[[1, 1, k]];
        assert!((got - expected).abs() < 0.5, "month {k}: {got} vs {expected}");
    }
}

// ---------------------------------------------------------------------------
// Determinism
// ---------------------------------------------------------------------------

#[test]
fn chunking_and_workers_do_not_change_results() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let base = synthetic::seasonal_cube(24, 10, 10, 0.25, 21);

    let reference = GridApplicator::new(&kernel, &axis)
        .n_workers(Some(1))
        .apply(&base, "time", &Uncertainty::Scalar(0.01))
        .unwrap();

    let layouts: [&[usize]; 3] = [&[24, 3, 4], &[24, 1, 10], &[24, 10, 1]];
    for extents in layouts {
        for workers in [Some(1), Some(4), None] {
            let cube = base.clone().chunked(extents).unwrap();
            let out = GridApplicator::new(&kernel, &axis)
                .n_workers(workers)
                .apply(&cube, "time", &Uncertainty::Scalar(0.01))
                .unwrap();
            assert!(synthetic::same_values(out.mean.data(), reference.mean.data()));
            assert!(synthetic::same_values(out.std.data(), reference.std.data()));
            assert_eq!(out.summary, reference.summary);
        }
    }
}

#[test]
fn output_keeps_spatial_chunks() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let cube = synthetic::seasonal_cube(24, 10, 10, 0.0, 5).chunked(&[24, 3, 4]).unwrap();
    let raw = apply_gpr(
        &cube,
        "time",
        &kernel,
        &axis,
        &Uncertainty::Scalar(0.01),
        &SufficiencyGuard::default(),
    )
    .unwrap();
    assert_eq!(raw.mean.chunks().chunks(), &[vec![3, 3, 3, 1], vec![4, 4, 2], vec![13]]);
}

// ---------------------------------------------------------------------------
// Missing data and failures
// ---------------------------------------------------------------------------

#[test]
fn empty_pixel_is_nan_and_counted() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let cube = synthetic::seasonal_cube(24, 3, 3, 0.0, 9);
    let dims = cube.dims().to_vec();
    let coords: Vec<Vec<f64>> = (0..3).map(|a| cube.coord_at(a).to_vec()).collect();
    let mut data = cube.into_data();
    data.slice_mut(s![.., 1, 2]).fill(f64::NAN);
    let cube = RasterCube::with_coords(data, dims, coords).unwrap();

    let raw = apply_gpr(
        &cube,
        "time",
        &kernel,
        &axis,
        &Uncertainty::Scalar(0.01),
        &SufficiencyGuard::default(),
    )
    .unwrap();
    assert_eq!(raw.summary.insufficient, 1);
    assert_eq!(raw.summary.fitted, 8);
    assert!(raw.mean.data().slice(s![1, 2, ..]).iter().all(|v| v.is_nan()));
    assert!(raw.std.data().slice(s![1, 2, ..]).iter().all(|v| v.is_nan()));
    assert!(raw.mean.data().slice(s![1, 1, ..]).iter().all(|v| v.is_finite()));
}

fn singular_cube() -> RasterCube {
    let data = Array3::from_shape_fn((4, 2, 2), |(k, y, x)| (k + y + x) as f64);
    RasterCube::from_time_stack(data, vec![2000.0, 2000.0, 2000.5, 2001.0]).unwrap()
}

#[test]
fn fit_failures_degrade_by_default() {
    let kernel = Kernel::rbf(1.0);
    let axis = axis();
    let raw = GridApplicator::new(&kernel, &axis)
        .apply(&singular_cube(), "time", &Uncertainty::Scalar(0.0))
        .unwrap();
    assert_eq!(raw.summary.failed, 4);
    assert!(raw.mean.data().iter().all(|v| v.is_nan()));
}

#[test]
fn fit_failures_propagate_with_pixel_index() {
    let kernel = Kernel::rbf(1.0);
    let axis = axis();
    let err = GridApplicator::new(&kernel, &axis)
        .policy(FitFailurePolicy::Propagate)
        .apply(&singular_cube(), "time", &Uncertainty::Scalar(0.0))
        .unwrap_err();
    match err {
        GapFillError::PixelFit { pixel, source } => {
            assert!(pixel < 4);
            assert!(matches!(*source, GapFillError::NumericFit(_)));
        }
        other => panic!("expected PixelFit, got {other:?}"),
    }
}

#[test]
fn invalid_kernel_is_rejected_before_fitting() {
    let kernel = Kernel::rbf(-1.0);
    let axis = axis();
    let err = GridApplicator::new(&kernel, &axis)
        .apply(&synthetic::seasonal_cube(8, 2, 2, 0.0, 1), "time", &Uncertainty::Scalar(0.1))
        .unwrap_err();
    assert!(matches!(err, GapFillError::InvalidKernel(_)));
}

// ---------------------------------------------------------------------------
// Uncertainty
// ---------------------------------------------------------------------------

#[test]
fn per_sample_uncertainty_equal_to_scalar_gives_same_output() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let cube = synthetic::seasonal_cube(24, 4, 5, 0.2, 13);
    let guard = SufficiencyGuard::default();
    let scalar =
        apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::Scalar(0.02), &guard).unwrap();
    let per_sample = Uncertainty::PerSample(ArrayD::from_elem(IxDyn(&[24, 4, 5]), 0.02));
    let series = apply_gpr(&cube, "time", &kernel, &axis, &per_sample, &guard).unwrap();
    assert!(synthetic::same_values(scalar.mean.data(), series.mean.data()));
    assert!(synthetic::same_values(scalar.std.data(), series.std.data()));
}

#[test]
fn uncertainty_shape_is_checked() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let guard = SufficiencyGuard::default();
    let cube = synthetic::seasonal_cube(24, 4, 5, 0.2, 13);

    let short = Uncertainty::PerSample(ArrayD::from_elem(IxDyn(&[24, 4, 4]), 0.02));
    let err = apply_gpr(&cube, "time", &kernel, &axis, &short, &guard).unwrap_err();
    assert!(matches!(err, GapFillError::ShapeMismatch { expected: 480, found: 384 }));

    let transposed = Uncertainty::PerSample(ArrayD::from_elem(IxDyn(&[24, 5, 4]), 0.02));
    let err = apply_gpr(&cube, "time", &kernel, &axis, &transposed, &guard).unwrap_err();
    assert!(matches!(err, GapFillError::Dimension(_)));
}

#[test]
fn larger_uncertainty_widens_the_band() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let guard = SufficiencyGuard::default();
    let cube = synthetic::seasonal_cube(24, 1, 1, 0.0, 17);
    let tight =
        apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::Scalar(0.001), &guard).unwrap();
    let loose =
        apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::Scalar(1.0), &guard).unwrap();
    let k = 6;
    assert!(loose.std.data()[[0, 0, k]] > tight.std.data()[[0, 0, k]]);
}

#[test]
fn invalid_scalar_alpha_is_rejected() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let guard = SufficiencyGuard::default();
    let cube = synthetic::seasonal_cube(12, 2, 2, 0.0, 4);
    for bad in [f64::NAN, f64::INFINITY, -5.0] {
        let err = apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::Scalar(bad), &guard)
            .unwrap_err();
        assert!(matches!(err, GapFillError::InvalidConfig(_)), "alpha {bad}");
    }
}

#[test]
fn negative_per_sample_alpha_is_rejected() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let cube = synthetic::seasonal_cube(12, 2, 2, 0.0, 4);
    let mut alpha = ArrayD::from_elem(IxDyn(&[12, 2, 2]), 0.01);
    alpha[[5, 1, 0]] = -0.01;
    let err = apply_gpr(
        &cube,
        "time",
        &kernel,
        &axis,
        &Uncertainty::PerSample(alpha),
        &SufficiencyGuard::default(),
    )
    .unwrap_err();
    assert!(matches!(err, GapFillError::InvalidConfig(_)));
}

#[test]
fn nan_per_sample_alpha_masks_that_sample() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let guard = SufficiencyGuard::default();
    let cube = synthetic::seasonal_cube(12, 2, 2, 0.0, 4);
    let mut alpha = ArrayD::from_elem(IxDyn(&[12, 2, 2]), 0.01);
    alpha[[0, 0, 0]] = f64::NAN;
    let raw =
        apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::PerSample(alpha), &guard).unwrap();
    assert_eq!(raw.summary.fitted, 4);

    let mut series = cube.data().slice(s![.., 0, 0]).iter().copied().collect::<Vec<f64>>();
    series[0] = f64::NAN;
    let direct = gap_fill_pixel(
        cube.coord("time").unwrap(),
        &series,
        PixelWeights::Scalar(0.01),
        &kernel,
        axis.values(),
        &guard,
        FitFailurePolicy::Degrade,
    )
    .unwrap();
    let mean = raw.mean.data().slice(s![0, 0, ..]).iter().copied().collect::<Vec<f64>>();
    assert!(synthetic::same_values(&mean, &direct.result.mean));

    let untouched =
        apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::Scalar(0.01), &guard).unwrap();
    let a = raw.mean.data().slice(s![1, 1, ..]).iter().copied().collect::<Vec<f64>>();
    let b = untouched.mean.data().slice(s![1, 1, ..]).iter().copied().collect::<Vec<f64>>();
    assert!(synthetic::same_values(&a, &b));
}

#[test]
fn per_sample_alpha_follows_its_pixel() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let guard = SufficiencyGuard::default();
    let cube = synthetic::seasonal_cube(24, 4, 5, 0.2, 19).chunked(&[24, 3, 2]).unwrap();
    let alpha = Array::from_shape_fn((24, 4, 5), |(k, y, x)| {
        0.005 + 0.001 * (k % 4) as f64 + 0.01 * (y * 5 + x) as f64
    })
    .into_dyn();
    let raw = GridApplicator::new(&kernel, &axis)
        .n_workers(Some(3))
        .apply(&cube, "time", &Uncertainty::PerSample(alpha.clone()))
        .unwrap();

    let times = cube.coord("time").unwrap();
    for (y, x) in [(0, 0), (2, 3), (3, 4)] {
        let series = cube.data().slice(s![.., y, x]).iter().copied().collect::<Vec<f64>>();
        let weights = alpha.slice(s![.., y, x]).iter().copied().collect::<Vec<f64>>();
        let direct = gap_fill_pixel(
            times,
            &series,
            PixelWeights::Series(&weights),
            &kernel,
            axis.values(),
            &guard,
            FitFailurePolicy::Degrade,
        )
        .unwrap();
        let mean = raw.mean.data().slice(s![y, x, ..]).iter().copied().collect::<Vec<f64>>();
        let std = raw.std.data().slice(s![y, x, ..]).iter().copied().collect::<Vec<f64>>();
        assert!(synthetic::same_values(&mean, &direct.result.mean), "pixel ({y}, {x})");
        assert!(synthetic::same_values(&std, &direct.result.std), "pixel ({y}, {x})");
    }
}

#[test]
fn time_axis_position_does_not_change_results() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let guard = SufficiencyGuard::default();
    let cube = synthetic::seasonal_cube(24, 3, 4, 0.2, 23);
    let alpha = Array::from_shape_fn((24, 3, 4), |(k, y, x)| 0.01 + 0.002 * (k + y + x) as f64)
        .into_dyn();
    let reference =
        apply_gpr(&cube, "time", &kernel, &axis, &Uncertainty::PerSample(alpha.clone()), &guard)
            .unwrap();

    let moved = cube.transpose(&["y", "time", "x"]).unwrap();
    let moved_alpha = alpha
        .permuted_axes(IxDyn(&[1, 0, 2]))
        .as_standard_layout()
        .into_owned();
    let out =
        apply_gpr(&moved, "time", &kernel, &axis, &Uncertainty::PerSample(moved_alpha), &guard)
            .unwrap();
    assert_eq!(out.mean.dims(), reference.mean.dims());
    assert!(synthetic::same_values(out.mean.data(), reference.mean.data()));
    assert!(synthetic::same_values(out.std.data(), reference.std.data()));
}

#[test]
fn missing_time_dimension_is_an_error() {
    let kernel = synthetic::seasonal_kernel();
    let axis = axis();
    let cube = synthetic::seasonal_cube(8, 2, 2, 0.0, 1);
    let err = apply_gpr(
        &cube,
        "band",
        &kernel,
        &axis,
        &Uncertainty::Scalar(0.1),
        &SufficiencyGuard::default(),
    )
    .unwrap_err();
    assert!(matches!(err, GapFillError::Dimension(_)));
}

// ---------------------------------------------------------------------------
// vectorize_core_dim
// ---------------------------------------------------------------------------

#[test]
fn vectorize_visits_every_series_in_pixel_order() {
    let data =
        Array::from_shape_fn((3, 4, 2), |(i, j, k)| (i * 100 + j * 10 + k) as f64).into_dyn();
    let layout = ChunkLayout::regular(&[3, 4, 2], &[2, 3, 1]).unwrap();
    let pool = worker_pool(Some(2)).unwrap();

    // Core axis in the middle: pixels are (i, k) row-major.
    let out = vectorize_core_dim(&data.view(), 1, &layout, &pool, |p, series| {
        Ok((p, series.to_vec()))
    })
    .unwrap();
    assert_eq!(out.len(), 6);
    for (idx, (p, series)) in out.iter().enumerate() {
        assert_eq!(*p, idx);
        let (i, k) = (idx / 2, idx % 2);
        let expected: Vec<f64> = (0..4).map(|j| (i * 100 + j * 10 + k) as f64).collect();
        assert_eq!(series, &expected);
    }
}

#[test]
fn vectorize_propagates_closure_errors() {
    let data = ArrayD::<f64>::zeros(IxDyn(&[5, 3]));
    let layout = ChunkLayout::single(&[5, 3]);
    let pool = worker_pool(None).unwrap();
    let res = vectorize_core_dim(&data.view(), 0, &layout, &pool, |p, _| {
        if p == 1 {
            Err(GapFillError::NumericFit("boom".into()))
        } else {
            Ok(p)
        }
    });
    assert!(matches!(res, Err(GapFillError::NumericFit(_))));
}

#[test]
fn vectorize_rejects_mismatched_layout() {
    let data = ArrayD::<f64>::zeros(IxDyn(&[5, 3]));
    let layout = ChunkLayout::single(&[5, 4]);
    let pool = worker_pool(Some(1)).unwrap();
    let res = vectorize_core_dim(&data.view(), 0, &layout, &pool, |p, _| Ok(p));
    assert!(matches!(res, Err(GapFillError::Dimension(_))));
    let layout = ChunkLayout::single(&[5, 3]);
    let res = vectorize_core_dim(&data.view(), 2, &layout, &pool, |p, _| Ok(p));
    assert!(matches!(res, Err(GapFillError::Dimension(_))));
}

// ---------------------------------------------------------------------------
// Element-wise and whole-array mapping
// ---------------------------------------------------------------------------

#[test]
fn map_elements_keeps_labels_and_chunks() {
    let cube = synthetic::seasonal_cube(6, 4, 4, 0.3, 2).chunked(&[6, 2, 2]).unwrap();
    let doubled = map_elements(&cube, |v| v * 2.0).unwrap();
    assert_eq!(doubled.dims(), cube.dims());
    assert_eq!(doubled.chunks(), cube.chunks());
    assert_eq!(doubled.coord("time"), cube.coord("time"));
    for (a, b) in doubled.data().iter().zip(cube.data().iter()) {
        assert!((a.is_nan() && b.is_nan()) || *a == b * 2.0);
    }
}

#[test]
fn map_cube_requires_same_shape() {
    let cube = synthetic::seasonal_cube(6, 4, 4, 0.0, 2);
    let shifted = map_cube(&cube, |v| v.mapv(|x| x - 10.0)).unwrap();
    assert_eq!(shifted.shape(), cube.shape());
    let err = map_cube(&cube, |v| v.sum_axis(Axis(0))).unwrap_err();
    assert!(matches!(err, GapFillError::Dimension(_)));
}
