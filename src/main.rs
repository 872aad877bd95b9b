use std::path::PathBuf;

use clap::Parser;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, StandardNormal};
use tsallis_moe::{
    ACTIVATION_THRESHOLD, GameTheoreticMoE, MoeConfig, RouterConfig, ThresholdSolution,
    compute_sparsity_metrics, metrics, routing, shannon_entropy,
};

#[derive(Parser, Debug)]
#[command(name = "tsallis_moe")]
#[command(about = "Compare Tsallis-entropy routing across values of q")]
struct Args {
    /// Utility scores for the single-vector comparison
    #[arg(short, long, value_delimiter = ',', allow_hyphen_values = true, default_values_t = vec![5.0, 4.0, 1.0, 0.0])]
    utilities: Vec<f64>,

    /// Entropic indices to compare
    #[arg(short, long, value_delimiter = ',', default_values_t = vec![1.0, 1.5, 2.0, 4.0])]
    q: Vec<f64>,

    /// Routing temperature
    #[arg(short, long, default_value_t = 1.0)]
    temperature: f64,

    /// Optional MoE configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of random inputs routed through the MoE
    #[arg(short, long, default_value_t = 16)]
    batch: usize,

    /// Seed for weights and inputs
    #[arg(short, long, default_value_t = 0)]
    seed: u64,
}

fn describe(solution: &ThresholdSolution) -> String {
    match solution {
        ThresholdSolution::Softmax => "softmax".to_string(),
        ThresholdSolution::Converged { tau, iterations } => {
            format!("tau={tau:.6} ({iterations} it)")
        }
        ThresholdSolution::FallbackUsed { reason } => format!("fallback: {reason}"),
    }
}

fn main() -> tsallis_moe::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // ============================================================================
    // SINGLE UTILITY VECTOR
    // ============================================================================
    let utilities = Array1::from_vec(args.utilities.clone());
    println!("Utilities: {utilities}  (temperature {})", args.temperature);
    println!("------------------------------------------------------------");

    for &q in &args.q {
        let config = RouterConfig::default()
            .with_q(q)
            .with_temperature(args.temperature);
        let outcome = routing::route_row(utilities.view(), &config)?;
        let probs = &outcome.probabilities;
        println!(
            "q={q:<5} p={probs:.4}  active={} entropy={:.4} [{}]",
            metrics::active_expert_count(probs.view(), 0.0),
            shannon_entropy(probs.view()),
            describe(&outcome.solution)
        );
    }

    // ============================================================================
    // MIXTURE OF EXPERTS ON RANDOM INPUTS
    // ============================================================================
    let base = match &args.config {
        Some(path) => MoeConfig::from_json_file(path)?,
        None => MoeConfig::default(),
    };

    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut moe = GameTheoreticMoE::new_with_rng(&base, &mut rng)?;
    let inputs: Array2<f64> = Array2::from_shape_fn((args.batch.max(1), base.input_dim), |_| {
        StandardNormal.sample(&mut rng)
    });

    println!();
    println!(
        "MoE: {} experts, {} parameters, batch {}",
        moe.num_experts(),
        moe.parameters(),
        inputs.nrows()
    );
    println!("------------------------------------------------------------");

    for &q in &args.q {
        let router = base.router.with_q(q).with_temperature(args.temperature);
        moe.router_mut().set_config(router)?;
        let out = moe.forward(inputs.view())?;
        let summary = compute_sparsity_metrics(&out.routing_probs)?;
        println!(
            "q={q:<5} active(>{ACTIVATION_THRESHOLD})={:.2} gini={:.4} fallbacks={} utilization={:.3}",
            summary.active_experts,
            summary.gini_coefficient,
            out.fallback_rows,
            metrics::expert_utilization(&out.routing_probs)
        );
    }

    Ok(())
}
