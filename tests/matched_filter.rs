mod common;

use common::{
    assert_array_close, reference_matched_filter, synthetic_data, templates_from, ZeroData,
};
use fmf::{
    expected_output_shape, matched_filter_with_kernel, matched_filter_with_sink, ArchError,
    CheckZeros, Kernel, MatchedFilterBuilder, MatchedFilterError, MatchedFilterInput,
    MatchedFilterParams, ValidationError, AVAILABLE_BACKENDS,
};
use ndarray::{Array3, Array4};
use proptest::prelude::*;
use proptest::test_runner::TestRunner;
use std::error::Error;

fn params(arch: &str, check_zeros: CheckZeros) -> MatchedFilterParams {
    MatchedFilterParams {
        arch: Some(arch.to_string()),
        check_zeros: Some(check_zeros),
        max_zero_fraction: None,
    }
}

type ZeroRun = (Vec<f32>, (usize, usize), String);

fn run_zero(arch: &str, mode: CheckZeros) -> Result<ZeroRun, MatchedFilterError> {
    let z = ZeroData::new();
    let input = MatchedFilterInput::from_views(
        z.template.view(),
        z.moveouts.view(),
        z.weights.view(),
        z.data.view(),
        1,
        params(arch, mode),
    );
    let mut sink = Vec::new();
    let out = matched_filter_with_sink(&input, &mut sink)?;
    let shape = out.shape();
    Ok((out.values, shape, String::from_utf8_lossy(&sink).into_owned()))
}

#[test]
fn zero_input_yields_single_zero_on_every_backend() {
    for &arch in AVAILABLE_BACKENDS {
        let (values, shape, diag) = match run_zero(arch, CheckZeros::Disabled) {
            Ok(r) => r,
            // compiled in, but no device present on this host
            Err(MatchedFilterError::Backend { .. }) => continue,
            Err(e) => panic!("[{}] {}", arch, e),
        };
        assert_eq!(shape, (1, 1), "[{}]", arch);
        assert_eq!(values, vec![0.0], "[{}]", arch);
        assert!(!values[0].is_nan());
        assert!(diag.is_empty());
    }
}

macro_rules! arch_spelling_tests {
    ($($name:ident => $spelling:expr),* $(,)?) => {
        paste::paste! {
            $(
                #[test]
                fn [<arch_spelling_ $name>]() {
                    let (values, _, _) = run_zero($spelling, CheckZeros::Disabled)
                        .unwrap_or_else(|e| panic!("{:?} rejected: {}", $spelling, e));
                    assert_eq!(values, vec![0.0]);
                }
            )*
        }
    };
}

arch_spelling_tests!(
    lower => "cpu",
    upper => "CPU",
    mixed_trailing => "CPu",
    mixed_inner => "cPu",
    trailing_space => "cpu ",
    surrounding_space => " cpu ",
);

#[test]
fn missing_sycl_is_reported_by_name() {
    if AVAILABLE_BACKENDS.contains(&"sycl") {
        eprintln!("[missing_sycl_is_reported_by_name] skipped - sycl compiled in");
        return;
    }
    let err = run_zero("sycl", CheckZeros::Disabled).unwrap_err();
    assert!(matches!(err, MatchedFilterError::Arch(ArchError::Unavailable(_))));
    assert!(err.to_string().contains("not compiled with SYCL backend"));
}

#[test]
fn unknown_arch_echoes_raw_value() {
    let err = run_zero("test", CheckZeros::Disabled).unwrap_err();
    assert!(matches!(err, MatchedFilterError::Arch(ArchError::Unknown(_))));
    assert!(err.to_string().contains("Unknown 'arch': test"));

    let err = run_zero(" Te st", CheckZeros::Disabled).unwrap_err();
    assert_eq!(err.to_string(), "Unknown 'arch':  Te st");
}

#[test]
fn builder_without_arguments_is_arity_error() {
    let z = ZeroData::new();
    let mut sink = Vec::new();
    for builder in [
        MatchedFilterBuilder::new(),
        MatchedFilterBuilder::new().template(z.template.view()),
        MatchedFilterBuilder::new().template(z.template.view()).arch("sycl"),
    ] {
        match builder.apply_with_sink(&mut sink) {
            Err(MatchedFilterError::Validation(v)) => assert!(v.is_arity(), "{}", v),
            other => panic!("expected arity error, got {:?}", other.map(|o| o.shape())),
        }
    }
}

#[test]
fn check_zeros_messages() {
    let (_, _, first) = run_zero("cpu", CheckZeros::First).unwrap();
    assert!(first.contains("Detected too many zeros in first row of correlation computation"));

    let (_, _, all) = run_zero("cpu", CheckZeros::All).unwrap();
    assert!(all.contains("Detected too many zeros in 0-th row of correlation computation"));

    let (_, _, flag) = run_zero("cpu", CheckZeros::from(true)).unwrap();
    assert_eq!(flag, all);

    let (_, _, off) = run_zero("cpu", CheckZeros::from(false)).unwrap();
    assert!(!off.contains("Detected too many zeros"));
}

#[test]
fn repeated_calls_are_identical() {
    let modes = [CheckZeros::First, CheckZeros::All, CheckZeros::Disabled, CheckZeros::All];
    let mut previous: Option<(Vec<f32>, String)> = None;
    for mode in modes {
        let a = run_zero("cpu", mode).unwrap();
        let b = run_zero("cpu", mode).unwrap();
        assert_eq!(a.0, b.0);
        assert_eq!(a.2, b.2);
        if let Some((values, _)) = &previous {
            assert_eq!(values, &a.0);
        }
        previous = Some((a.0, a.2));
    }
}

#[test]
fn later_rows_reported_by_index() -> Result<(), Box<dyn Error>> {
    let data = synthetic_data(2, 1, 128);
    let moveouts = Array3::<i32>::zeros((3, 2, 1));
    let mut weights = Array3::<f32>::ones((3, 2, 1));
    weights.slice_mut(ndarray::s![2, .., ..]).fill(0.0);
    let template = templates_from(&data, &moveouts, 16, 30);
    let input = MatchedFilterInput::from_views(
        template.view(),
        moveouts.view(),
        weights.view(),
        data.view(),
        1,
        params("cpu", CheckZeros::All),
    );
    let mut sink = Vec::new();
    matched_filter_with_sink(&input, &mut sink)?;
    let diag = String::from_utf8(sink)?;
    assert!(diag.contains("Detected too many zeros in 2-th row of correlation computation"));
    assert!(!diag.contains("0-th row"));
    assert!(!diag.contains("1-th row"));

    let input = MatchedFilterInput { params: params("cpu", CheckZeros::First), ..input };
    let mut sink = Vec::new();
    matched_filter_with_sink(&input, &mut sink)?;
    assert!(sink.is_empty());
    Ok(())
}

fn check_matches_reference(test_name: &str, kernel: Kernel) -> Result<(), Box<dyn Error>> {
    let data = synthetic_data(3, 2, 400);
    let moveouts = Array3::from_shape_fn((4, 3, 2), |(t, s, c)| ((t * 3 + s * 5 + c) % 9) as i32);
    let weights = Array3::from_shape_fn((4, 3, 2), |(t, s, c)| {
        if (t + s + c) % 4 == 0 {
            0.0
        } else {
            1.0 + s as f32
        }
    });
    let template = templates_from(&data, &moveouts, 40, 120);

    for step in [1usize, 3, 7] {
        let input = MatchedFilterInput::from_views(
            template.view(),
            moveouts.view(),
            weights.view(),
            data.view(),
            step as i64,
            MatchedFilterParams::default(),
        );
        let out = matched_filter_with_kernel(&input, kernel, &mut std::io::sink())?;
        let (rows, cols, expected) =
            reference_matched_filter(&template, &moveouts, &weights, &data, step);
        assert_eq!(out.shape(), (rows, cols), "[{}] step={}", test_name, step);
        assert_eq!(expected_output_shape(&input)?, (rows, cols));
        assert_array_close(&out.values, &expected, 1e-5, 2e-5, test_name);
    }
    Ok(())
}

macro_rules! kernel_variants {
    ($($test_fn:ident),*) => {
        paste::paste! {
            $(
                #[test]
                fn [<$test_fn _scalar>]() {
                    $test_fn(stringify!([<$test_fn _scalar>]), Kernel::Scalar).unwrap();
                }
                #[test]
                fn [<$test_fn _avx2>]() {
                    $test_fn(stringify!([<$test_fn _avx2>]), Kernel::Avx2).unwrap();
                }
                #[test]
                fn [<$test_fn _auto_detect>]() {
                    $test_fn(stringify!([<$test_fn _auto_detect>]), Kernel::Auto).unwrap();
                }
            )*
        }
    };
}

kernel_variants!(check_matches_reference);

#[test]
fn planted_event_is_found_at_its_origin() {
    let data = synthetic_data(4, 3, 600);
    let moveouts = Array3::from_shape_fn((1, 4, 3), |(_, s, c)| (s * 4 + c) as i32);
    let weights = Array3::<f32>::ones((1, 4, 3));
    let template = templates_from(&data, &moveouts, 60, 211);
    let out = MatchedFilterBuilder::new()
        .template(template.view())
        .moveouts(moveouts.view())
        .weights(weights.view())
        .data(data.view())
        .step(1)
        .apply_with_sink(&mut std::io::sink())
        .unwrap();
    let row = out.row(0);
    let best = row
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap();
    assert_eq!(best, 211);
    assert!((row[211] - 1.0).abs() < 1e-5);
}

#[test]
fn late_event_survives_a_template_with_large_moveouts() -> Result<(), Box<dyn Error>> {
    let data = synthetic_data(2, 1, 300);
    let mut moveouts = Array3::<i32>::zeros((2, 2, 1));
    moveouts[[1, 1, 0]] = 120;
    let weights = Array3::<f32>::ones((2, 2, 1));
    let origin = 250;
    let template = Array4::from_shape_fn((2, 2, 1, 30), |(_, s, _, k)| data[[s, 0, origin + k]]);
    let input = MatchedFilterInput::from_views(
        template.view(),
        moveouts.view(),
        weights.view(),
        data.view(),
        1,
        params("cpu", CheckZeros::All),
    );
    let mut sink = Vec::new();
    let out = matched_filter_with_sink(&input, &mut sink)?;
    assert_eq!(out.shape(), (2, 300 - 30 + 1));
    let dims = fmf::Dims {
        n_templates: 2,
        n_stations: 2,
        n_components: 1,
        n_samples_template: 30,
        n_samples_continuous: 300,
    };
    let limits = fmf::template_window_counts(
        &dims,
        moveouts.as_slice().unwrap(),
        weights.as_slice().unwrap(),
        1,
    );
    assert_eq!(limits, vec![271, 151]);
    assert!((out.row(0)[origin] - 1.0).abs() < 1e-5);
    assert!(out.row(1)[151..].iter().all(|&v| v == 0.0));

    let (rows, cols, expected) = reference_matched_filter(&template, &moveouts, &weights, &data, 1);
    assert_eq!((rows, cols), out.shape());
    assert_array_close(&out.values, &expected, 1e-5, 2e-5, "per-template range");

    let diag = String::from_utf8(sink)?;
    assert!(diag.contains("Detected too many zeros in 1-th row of correlation computation"));
    assert!(!diag.contains("0-th row"));
    Ok(())
}

#[test]
fn shape_errors_name_the_field() {
    let z = ZeroData::new();
    let data_2d = ndarray::Array2::<f32>::zeros((1, 1));
    let input = MatchedFilterInput::with_defaults(
        z.template.view(),
        z.moveouts.view(),
        z.weights.view(),
        data_2d.view(),
        1,
    );
    let err = expected_output_shape(&input).unwrap_err();
    assert!(matches!(
        err,
        MatchedFilterError::Validation(ValidationError::InvalidRank {
            field: "data",
            expected: 3,
            got: 2
        })
    ));

    let big_template = Array4::<f32>::zeros((2, 1, 1, 1));
    let input = MatchedFilterInput::with_defaults(
        big_template.view(),
        z.moveouts.view(),
        z.weights.view(),
        z.data.view(),
        1,
    );
    let err = expected_output_shape(&input).unwrap_err();
    assert!(err.to_string().contains("'moveouts' axis 0 ('n_templates')"), "{}", err);

    let input = MatchedFilterInput::with_defaults(
        z.template.view(),
        z.moveouts.view(),
        z.weights.view(),
        z.data.view(),
        0,
    );
    assert!(matches!(
        expected_output_shape(&input),
        Err(MatchedFilterError::Validation(ValidationError::InvalidStep { step: 0 }))
    ));
}

#[test]
fn output_is_bounded_for_random_inputs() {
    let mut runner = TestRunner::default();
    let strat = (1usize..4, 1usize..4, 2usize..24, 0usize..40, 1i64..6, any::<u64>());
    runner
        .run(&strat, |(n_templates, n_channels, nt, extra, step, seed)| {
            let nd = nt + extra;
            let data = Array3::from_shape_fn((n_channels, 1, nd), |(s, _, k)| {
                common::hash_noise(seed as usize, s, k) * 3.0
            });
            let moveouts = Array3::from_shape_fn((n_templates, n_channels, 1), |(t, s, _)| {
                ((seed as usize).wrapping_add(t * 31 + s) % (extra + 1)) as i32
            });
            let weights = Array3::from_shape_fn((n_templates, n_channels, 1), |(t, s, _)| {
                common::hash_noise(t, s, seed as usize).abs()
            });
            let template = Array4::from_shape_fn((n_templates, n_channels, 1, nt), |(t, s, _, k)| {
                common::hash_noise(t + 100, s, k ^ seed as usize)
            });
            let input = MatchedFilterInput::with_defaults(
                template.view(),
                moveouts.view(),
                weights.view(),
                data.view(),
                step,
            );
            let out = matched_filter_with_sink(&input, &mut std::io::sink()).unwrap();
            prop_assert_eq!(out.values.len(), out.rows * out.cols);
            prop_assert!(out.values.iter().all(|v| v.is_finite() && (-1.0..=1.0).contains(v)));
            Ok(())
        })
        .unwrap();
}
