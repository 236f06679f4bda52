mod common;

use std::sync::Arc;

use approx::assert_relative_eq;
use common::{ToyEngine, TRUE_A, TRUE_B, dataset, event, gnss_group, problem_with, satellite_group, toy_problem};
use quakefit::targets::AnalyserResult;
use quakefit::{ConfigurationError, InversionProblem, Parameter, Problem, Range, TargetGroup};

fn builder() -> quakefit::ProblemBuilder {
    InversionProblem::builder("toy", event("ev1"))
        .parameter(Parameter::new("a", "m"), Range::new(-5.0, 5.0))
        .parameter(Parameter::new("b", "m/km"), Range::new(-5.0, 5.0))
        .dataset(dataset())
        .engine(Arc::new(ToyEngine::new()))
}

#[test]
fn duplicate_target_ids_fail_at_build() {
    let err = builder()
        .target_group(satellite_group(Some("insar"), &["asc"], false))
        .target_group(satellite_group(Some("insar"), &["*all"], false))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        ConfigurationError::DuplicateTargetId {
            id: "insar.asc".into(),
            first_group: 0,
            second_group: 1,
        }
    );
}

#[test]
fn distinct_paths_disambiguate() {
    let p = builder()
        .target_group(satellite_group(Some("insar"), &["asc"], false))
        .target_group(satellite_group(Some("insar2"), &["asc"], false))
        .build()
        .unwrap();
    assert_eq!(p.target_ids(), vec!["insar.asc", "insar2.asc"]);
}

#[test]
fn default_path_is_the_problem_name() {
    let p = builder().target_group(gnss_group(None)).build().unwrap();
    assert_eq!(p.target_ids(), vec!["toy.camp"]);
}

#[test]
fn infeasible_problems_are_configuration_errors() {
    let err = builder().build().unwrap_err();
    assert_eq!(err, ConfigurationError::NoTargets("toy".into()));

    let err = InversionProblem::builder("empty", event("ev1"))
        .target_group(satellite_group(None, &["asc"], false))
        .dataset(dataset())
        .engine(Arc::new(ToyEngine::new()))
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigurationError::EmptyParameterSpace("empty".into()));

    let err = builder()
        .parameter(Parameter::new("c", "m"), Range::new(1.0, -1.0))
        .target_group(gnss_group(None))
        .build()
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::InvalidRange { .. }));

    let err = builder()
        .target_group(satellite_group(None, &["nope"], false))
        .build()
        .unwrap_err();
    assert_eq!(err, ConfigurationError::UnknownScene("nope".into()));
}

#[test]
fn ramp_parameters_are_namespaced_by_target() {
    let p = builder()
        .target_group(satellite_group(Some("insar"), &["*all"], true))
        .build()
        .unwrap();
    let names = p.parameter_names();
    assert_eq!(
        names,
        vec![
            "a",
            "b",
            "insar.asc.offset",
            "insar.asc.ramp_north",
            "insar.asc.ramp_east",
            "insar.dsc.offset",
            "insar.dsc.ramp_north",
            "insar.dsc.ramp_east",
        ]
    );
    assert_eq!(p.bounds()[2], (-0.5, 0.5));
    assert!(p.targets()[0].target_ranges().contains_key("insar.asc:offset"));

    // an offset is absorbed by the scene's own ramp parameters
    let mut x = vec![TRUE_A - 0.25, TRUE_B, 0.25, 0.0, 0.0, 0.25, 0.0, 0.0];
    assert_relative_eq!(p.global_misfit(&x).unwrap(), 0.0, epsilon = 1e-12);
    x[5] = 0.0;
    assert!(p.global_misfit(&x).unwrap() > 0.0);
}

#[test]
fn true_model_has_zero_misfit() {
    let p = toy_problem();
    assert_relative_eq!(p.global_misfit(&[TRUE_A, TRUE_B]).unwrap(), 0.0, epsilon = 1e-12);
    assert!(p.global_misfit(&[0.0, 0.0]).unwrap() > 0.0);
}

#[test]
fn families_share_normalisation() {
    let tagged = |path: &str| {
        let mut g = satellite_group(Some(path), &["asc"], false);
        if let TargetGroup::Satellite(s) = &mut g {
            s.common.normalisation_family = Some("insar".into());
        }
        g
    };
    let shared = problem_with(ToyEngine::new(), vec![tagged("one"), tagged("two")]);
    assert_eq!(shared.nfamilies(), 1);

    let separate = problem_with(
        ToyEngine::new(),
        vec![
            satellite_group(Some("one"), &["asc"], false),
            satellite_group(Some("two"), &["asc"], false),
        ],
    );
    assert_eq!(separate.nfamilies(), 2);

    // identical targets: one shared bucket gives m/n, two buckets give 2 m/n
    let x = [0.0, 0.0];
    let m_shared = shared.global_misfit(&x).unwrap();
    let m_separate = separate.global_misfit(&x).unwrap();
    assert_relative_eq!(m_separate, 2.0 * m_shared, max_relative = 1e-12);
}

#[test]
fn target_weights_scale_the_misfit() {
    let mut p = toy_problem();
    let x = [0.0, 0.0];
    let results = p.evaluate(&x).unwrap();
    let insar_only = p.combine_misfits(&results, Some(&[1.0, 0.0]));
    assert!(insar_only > 0.0);

    // a bootstrap count of two doubles a single-target family
    let base = p.combine_misfits(&results, Some(&[1.0, 1.0]));
    let doubled = p.combine_misfits(&results, Some(&[2.0, 1.0]));
    assert_relative_eq!(base, p.global_misfit(&x).unwrap(), max_relative = 1e-12);
    assert_relative_eq!(doubled - base, insar_only, max_relative = 1e-12);
    assert_relative_eq!(p.combine_misfits(&results, Some(&[2.0, 0.0])), 2.0 * insar_only, max_relative = 1e-12);

    // an analyser weight acts the same way once balancing is applied
    p.targets_mut()[0].set_analyser_result("manual_test", AnalyserResult { weight: 3.0 });
    p.set_apply_balancing_weights(true);
    assert_eq!(p.target_weights(), vec![3.0, 1.0]);
    assert_relative_eq!(p.global_misfit(&x).unwrap(), base + 2.0 * insar_only, max_relative = 1e-12);
}

#[test]
fn bootstrap_weights_are_seeded_counts() {
    let p = toy_problem();
    let w = p.bootstrap_weights(50, 3);
    assert_eq!(w.len(), 50);
    for row in &w {
        assert_eq!(row.len(), 2);
        assert_relative_eq!(row.iter().sum::<f64>(), 2.0);
    }
    assert_eq!(w, p.bootstrap_weights(50, 3));
}

#[test]
fn balancing_analyser_sets_weights() {
    let mut p = toy_problem();
    p.analyse_target_balancing(20, 1);
    let weights = p.target_weights();
    assert!(weights.iter().all(|&w| w > 0.0 && w.is_finite()));
    assert!(p.targets().iter().all(|t| t.analyser_results().contains_key("target_balancing")));
}
