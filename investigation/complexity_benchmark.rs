// Complexity Benchmark for ferreus_tpe
// Tests scaling of the Barnes-Hut energy and hierarchical metric product
//
// Expected: O(N log N) time for the hierarchical paths, O(N^2) for the brute-force ones

use faer::Mat;
use ferreus_tpe::{
    BarnesHut, BarnesHutParams, BlockClusterParams, BlockClusterTree, Bvh, DegeneracyPolicy,
    TpeParams, assemble_sobolev_metric, exact_energy, test_curves::CurveTestShapes,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;

/// Brute-force references are skipped above this many edges.
const MAX_EXACT_EDGES: usize = 4_000;

struct BenchmarkRow {
    barnes_hut: f64,
    exact: Option<f64>,
    relative_error: Option<f64>,
    metric_build: f64,
    metric_multiply: f64,
    dense_multiply: Option<f64>,
}

fn run_benchmark(n: usize, seed: u64) -> BenchmarkRow {
    println!("  Building trefoil with {} edges...", n);
    let network = CurveTestShapes::trefoil(n).expect("trefoil");
    let tpe_params = TpeParams::default();
    let params = BarnesHutParams::default();

    let start = Instant::now();
    let bvh = Bvh::build(&network, params.leaf_capacity).expect("bvh");
    let evaluator = BarnesHut::new(&network, &bvh, tpe_params, params).expect("evaluator");
    let (energy, _gradient) = evaluator.energy_and_gradient().expect("energy");
    let barnes_hut = start.elapsed().as_secs_f64();

    let (exact, relative_error) = match n <= MAX_EXACT_EDGES {
        true => {
            let start = Instant::now();
            let reference = exact_energy(&network, &tpe_params, &params).expect("exact energy");
            (
                Some(start.elapsed().as_secs_f64()),
                Some((energy - reference).abs() / reference),
            )
        }
        false => (None, None),
    };

    let start = Instant::now();
    let tree = BlockClusterTree::new(&network, tpe_params, BlockClusterParams::default())
        .expect("block-cluster tree");
    let metric_build = start.elapsed().as_secs_f64();

    let mut rng = StdRng::seed_from_u64(seed);
    let x = Mat::from_fn(n, 1, |_, _| rng.random_range(-1.0..1.0));

    let start = Instant::now();
    let _y = tree.multiply(x.as_ref()).expect("metric product");
    let metric_multiply = start.elapsed().as_secs_f64();

    let dense_multiply = match n <= MAX_EXACT_EDGES {
        true => {
            let dense = assemble_sobolev_metric(
                &network,
                &tpe_params,
                params.min_distance,
                DegeneracyPolicy::Report,
            )
            .expect("dense metric");
            let start = Instant::now();
            let _y = dense.as_ref() * x.as_ref();
            Some(start.elapsed().as_secs_f64())
        }
        false => None,
    };

    println!(
        "  {} admissible / {} dense blocks",
        tree.num_admissible(),
        tree.num_inadmissible()
    );

    BenchmarkRow {
        barnes_hut,
        exact,
        relative_error,
        metric_build,
        metric_multiply,
        dense_multiply,
    }
}

fn format_optional(value: Option<f64>) -> String {
    match value {
        Some(value) => format!("{:.3e}", value),
        None => "-".to_string(),
    }
}

fn main() {
    println!("=== ferreus_tpe Complexity Benchmark ===\n");
    println!("Testing O(N log N) scaling hypothesis\n");

    let test_sizes = vec![500, 1_000, 2_000, 4_000, 8_000, 16_000];

    println!("N\tBH(s)\t\tExact(s)\tRelErr\t\tBCT(s)\t\tMul(s)\t\tDenseMul(s)\tBH/(N*log(N))");
    println!("{}", "-".repeat(110));

    for &n in &test_sizes {
        println!("\nTesting N = {}:", n);

        let row = run_benchmark(n, 42);

        let n_f64 = n as f64;
        let n_log_n = n_f64 * n_f64.log2();
        let time_per_nlogn = row.barnes_hut / n_log_n * 1e6; // microseconds per N log N

        println!(
            "{}\t{:.3e}\t{}\t{}\t{:.3e}\t{:.3e}\t{}\t{:.3}",
            n,
            row.barnes_hut,
            format_optional(row.exact),
            format_optional(row.relative_error),
            row.metric_build,
            row.metric_multiply,
            format_optional(row.dense_multiply),
            time_per_nlogn,
        );
    }

    println!("\n=== Analysis ===");
    println!("If BH/(N*log(N)) remains roughly constant, the evaluation is O(N log N).");
    println!("The exact columns should grow roughly 4x per doubling of N.");
}
