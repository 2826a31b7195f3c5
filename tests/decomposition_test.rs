//! Integration tests: build cubes from known sources, decompose them, and check
//! that the components, variance ranking and reconstructions behave.


use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};
use rand_distr::{Distribution, Exp};
use specdecomp::{
    blind_source_separation, decompose, decompose_cube, decompose_with, flatten, unflatten,
    Algorithm, DecompError, DecompositionConfig, HyperspectralCube, IcaConfig, NmfConfig,
    ObservationMatrix, SignalAxis, SignalKind,
};
use test_data::{best_match, distance, two_source_scene, with_poisson_noise};

#[test]
fn test_flatten_unflatten_roundtrip() {
    let scene = two_source_scene(SignalKind::Generic, 100.0);
    let matrix = flatten(&scene.cube).unwrap();
    assert_eq!(matrix.nrows(), 100);
    assert_eq!(matrix.ncols(), 50);

    // Row p is the spectrum of pixel p in row-major order
    let spectrum = scene.cube.spectrum(&[3, 4]).unwrap();
    let row: Vec<f64> = matrix.matrix().row(3 * 10 + 4).iter().copied().collect();
    assert_eq!(row, spectrum);

    let back = matrix
        .to_cube(scene.cube.axis().clone(), scene.cube.kind())
        .unwrap();
    assert_eq!(back, scene.cube);

    // A per-pixel vector reshapes onto the scan grid
    let column: Vec<f64> = matrix.matrix().column(15).iter().copied().collect();
    let map = unflatten(&column, &[10, 10]).unwrap();
    assert_eq!(map.get(&[3, 4]).unwrap(), spectrum[15]);
}

#[test]
fn test_svd_two_source_scene() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let scene = two_source_scene(SignalKind::Generic, 100.0);
    let matrix = flatten(&scene.cube).unwrap();
    let result = decompose(&matrix, Algorithm::Svd, 5, false).unwrap();

    // ── Exact rank 2 ──
    let rel = result.residual_norm(&matrix, 2).unwrap() / matrix.matrix().norm();
    println!("Rank-2 relative residual: {:.3e}", rel);
    assert!(rel < 1e-6);

    // ── Variance ranking ──
    let variance = result.variance.as_ref().unwrap();
    let ratios = variance.ratios();
    assert!(ratios.iter().all(|&r| (0.0..=1.0).contains(&r)));
    assert!(ratios.windows(2).all(|w| w[0] >= w[1]));
    assert!((ratios.iter().sum::<f64>() - 1.0).abs() < 1e-10);
    assert!(ratios[0] + ratios[1] > 1.0 - 1e-10);

    let scree = variance.scree();
    assert_eq!(scree[0].component, 0);
    assert!((scree.last().unwrap().cumulative - 1.0).abs() < 1e-10);

    // ── Residual shrinks with every added component ──
    let residuals: Vec<f64> = (0..=5)
        .map(|n| result.residual_norm(&matrix, n).unwrap())
        .collect();
    assert!(residuals.windows(2).all(|w| w[1] <= w[0] + 1e-9));
    assert!((residuals[0] - matrix.matrix().norm()).abs() < 1e-9);

    // ── Both sources live in the rank-2 subspace ──
    let basis = result.factors.columns(0, 2).into_owned();
    for spectrum in &scene.spectra {
        let s = nalgebra::DVector::from_column_slice(spectrum);
        let projected = &basis * (basis.transpose() * &s);
        assert!((&s - projected).norm() / s.norm() < 1e-6);
    }

    // ── Every component kept: exact reconstruction of rank-deficient data ──
    let full = decompose(&matrix, Algorithm::Svd, matrix.max_rank(), false).unwrap();
    assert_eq!(full.rank(), 50);
    let rel_full = full.relative_residual(&matrix).unwrap();
    println!("Rank-50 relative residual: {:.3e}", rel_full);
    assert!(rel_full < 1e-10);
    let at_full_rank = full.residual_norm(&matrix, 50).unwrap();
    for n in 1..50 {
        assert!(at_full_rank <= full.residual_norm(&matrix, n).unwrap() + 1e-9);
    }
}

#[test]
fn test_nmf_recovers_sources() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let scene = two_source_scene(SignalKind::Generic, 100.0);
    let matrix = flatten(&scene.cube).unwrap();
    let result = decompose(&matrix, Algorithm::Nmf, 2, false).unwrap();

    println!("NMF convergence: {:?}", result.convergence);
    assert!(result.convergence.is_converged());
    assert!(result.variance.is_none());
    assert!(result.loadings.iter().all(|&v| v >= 0.0));
    assert!(result.factors.iter().all(|&v| v >= 0.0));
    let rel = result.relative_residual(&matrix).unwrap();
    println!("NMF relative residual: {:.3e}", rel);
    assert!(rel < 1e-6);

    for s in 0..2 {
        let spectrum_match = best_match(&scene.spectra[s], &result.factors);
        let map_match = best_match(&scene.maps[s], &result.loadings);
        println!(
            "Source {}: spectrum corr {:.4}, map corr {:.4}",
            s, spectrum_match, map_match
        );
        assert!(spectrum_match > 0.98);
        assert!(map_match > 0.98);
    }
}

#[test]
fn test_nmf_error_paths() {
    let scene = two_source_scene(SignalKind::Generic, 100.0);
    let matrix = flatten(&scene.cube).unwrap();

    // Rank above min(pixels, channels)
    assert_eq!(
        decompose(&matrix, Algorithm::Nmf, 51, false).unwrap_err(),
        DecompError::Rank {
            requested: 51,
            max: 50
        }
    );

    // Negative data needs an explicit shift first
    let signed = HyperspectralCube::new(
        scene.cube.nav_shape().to_vec(),
        scene.cube.axis().clone(),
        scene.cube.kind(),
        scene.cube.data().iter().map(|v| v - 1.0).collect(),
    )
    .unwrap();
    let err = decompose(&flatten(&signed).unwrap(), Algorithm::Nmf, 2, false).unwrap_err();
    assert!(matches!(err, DecompError::Domain(_)));

    let shifted = signed.shift_to_non_negative();
    assert!(decompose(&flatten(&shifted).unwrap(), Algorithm::Nmf, 2, false).is_ok());
}

#[test]
fn test_nmf_iteration_cap_is_not_an_error() {
    let scene = two_source_scene(SignalKind::Generic, 100.0);
    let matrix = flatten(&scene.cube).unwrap();
    let config = DecompositionConfig {
        nmf: NmfConfig {
            max_iterations: 5,
            tol: f64::NEG_INFINITY,
            check_every: 1,
            ..NmfConfig::default()
        },
        ..DecompositionConfig::new(Algorithm::Nmf, 2)
    };
    let result = decompose_with(&matrix, &config).unwrap();
    assert!(!result.convergence.is_converged());
    assert_eq!(result.rank(), 2);
}

/// Two independent, non-Gaussian spectra mixed with random positive weights.
fn mixed_sources(seed: u64) -> (ObservationMatrix, Vec<Vec<f64>>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let exp = Exp::new(1.0).unwrap();
    let (pixels, channels) = (64usize, 500usize);

    let spectra: Vec<Vec<f64>> = (0..2)
        .map(|_| (0..channels).map(|_| exp.sample(&mut rng)).collect())
        .collect();
    let weights = DMatrix::from_fn(pixels, 2, |_, _| 0.2 + 0.8 * rng.random::<f64>());
    let sources = DMatrix::from_fn(channels, 2, |c, s| spectra[s][c]);

    let matrix = ObservationMatrix::new(weights * sources.transpose(), vec![8, 8]).unwrap();
    (matrix, spectra)
}

#[test]
fn test_ica_separates_independent_sources() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let (matrix, spectra) = mixed_sources(42);

    // SVD alone returns mixtures
    let svd = decompose(&matrix, Algorithm::Svd, 2, false).unwrap();
    let svd_best = spectra
        .iter()
        .map(|s| best_match(s, &svd.factors))
        .fold(f64::INFINITY, f64::min);

    let ica = decompose(&matrix, Algorithm::Ica, 2, false).unwrap();
    println!("ICA convergence: {:?}", ica.convergence);
    assert!(ica.convergence.is_converged());
    assert!(ica.variance.is_some());

    for (s, spectrum) in spectra.iter().enumerate() {
        let corr = best_match(spectrum, &ica.factors);
        println!("Source {}: ICA corr {:.4} (SVD worst {:.4})", s, corr, svd_best);
        assert!(corr > 0.95);
    }

    // Unmixing preserves the rank-2 model
    assert!(ica.relative_residual(&matrix).unwrap() < 1e-8);
}

#[test]
fn test_blind_source_separation_after_scree_inspection() {
    let (matrix, spectra) = mixed_sources(7);
    let svd = decompose(&matrix, Algorithm::Svd, 6, false).unwrap();

    // Two components carry all the variance
    let ratios = svd.explained_variance_ratios().unwrap();
    assert!(ratios[0] + ratios[1] > 1.0 - 1e-10);

    let config = IcaConfig {
        seed: 3,
        ..IcaConfig::default()
    };
    let bss = blind_source_separation(&svd, 2, &config).unwrap();
    assert_eq!(bss.algorithm, Algorithm::Ica);
    assert_eq!(bss.rank(), 2);
    assert_eq!(bss.nav_shape(), &[8, 8]);
    for spectrum in &spectra {
        assert!(best_match(spectrum, &bss.factors) > 0.95);
    }
}

#[test]
fn test_ica_rejects_negative_data() {
    let x = ObservationMatrix::new(
        DMatrix::from_fn(20, 30, |i, j| (i as f64 - 10.0) * (j as f64 + 1.0).ln()),
        vec![20],
    )
    .unwrap();
    assert!(matches!(
        decompose(&x, Algorithm::Ica, 2, false).unwrap_err(),
        DecompError::Domain(_)
    ));
}

#[test]
fn test_poisson_normalized_counting_data() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();

    let scene = two_source_scene(SignalKind::Eels, 200.0);
    let noisy = with_poisson_noise(&scene.cube, 11);

    // EELS cubes are counting data, so the cube entry point normalizes
    let result = decompose_cube(&noisy, Algorithm::Svd, 10).unwrap();
    assert!(result.poisson_normalized);

    let ratios = result.explained_variance_ratios().unwrap();
    println!("Poisson-normalized variance ratios: {:?}", &ratios[..4]);
    assert!(ratios[2] < 0.05 * ratios[1]);

    // Generic cubes are left unscaled
    let generic = noisy.clone().with_kind(SignalKind::Generic);
    assert!(!decompose_cube(&generic, Algorithm::Svd, 3).unwrap().poisson_normalized);
}

#[test]
fn test_low_rank_model_denoises() {
    let scene = two_source_scene(SignalKind::Eels, 200.0);
    let noisy = with_poisson_noise(&scene.cube, 5);
    let matrix = flatten(&noisy).unwrap();
    let result = decompose(&matrix, Algorithm::Svd, 10, false).unwrap();

    let model = result.model_cube(&noisy, 2).unwrap();
    assert_eq!(model.nav_shape(), noisy.nav_shape());
    assert_eq!(model.axis(), noisy.axis());

    let noise = distance(&noisy, &scene.cube);
    let remaining = distance(&model, &scene.cube);
    println!("Noise {:.2}, after rank-2 model {:.2}", noise, remaining);
    assert!(remaining < 0.5 * noise);
}

#[test]
fn test_single_spectrum_cube() {
    let axis = SignalAxis::channels(8).unwrap();
    let cube = HyperspectralCube::new(
        vec![],
        axis,
        SignalKind::Generic,
        (0..8).map(|c| c as f64).collect(),
    )
    .unwrap();
    let matrix = flatten(&cube).unwrap();
    assert_eq!(matrix.max_rank(), 1);
    let result = decompose(&matrix, Algorithm::Svd, 1, false).unwrap();
    assert!(result.relative_residual(&matrix).unwrap() < 1e-12);
    assert!(decompose(&matrix, Algorithm::Svd, 2, false).is_err());
}
