use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use impurity_trace::{
    AtomDiag, BlockDiag, ImpurityTrace, OpDesc, TimePoint, TraceConfig, TraceError,
    TraceHistograms,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "impurity-trace",
    about = "Incremental impurity trace evaluation for CT-QMC"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Density-density atom shared by all subcommands
#[derive(Args, Debug, Clone)]
struct AtomArgs {
    /// Number of orbitals (spin included)
    #[arg(long, default_value_t = 2)]
    orbitals: usize,
    /// Chemical potential, every level sits at -mu
    #[arg(long, default_value_t = 1.0)]
    mu: f64,
    /// Density-density interaction
    #[arg(long, default_value_t = 2.0)]
    u: f64,
    /// Inverse temperature
    #[arg(long, default_value_t = 10.0)]
    beta: f64,
}

impl AtomArgs {
    fn diag(&self) -> Result<BlockDiag> {
        let epsilon = vec![-self.mu; self.orbitals];
        BlockDiag::density_density(self.orbitals, &epsilon, self.u)
            .context("failed to build the atomic Hamiltonian")
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the blocks and the partition function of the atom.
    Atomic {
        #[command(flatten)]
        atom: AtomArgs,
    },
    /// Run a seeded random walk of pair insertions and removals.
    Walk {
        #[command(flatten)]
        atom: AtomArgs,
        /// Number of proposed moves
        #[arg(long, default_value_t = 10_000)]
        steps: usize,
        /// Random seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Report the norm weight instead of the cheap bound
        #[arg(long)]
        norm_weight: bool,
        /// Print histogram summaries at the end
        #[arg(long)]
        histograms: bool,
        /// Verify every cache after each move (slow)
        #[arg(long)]
        check_integrity: bool,
    },
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Atomic { atom } => run_atomic(&atom)?,
        Commands::Walk {
            atom,
            steps,
            seed,
            norm_weight,
            histograms,
            check_integrity,
        } => {
            let config = TraceConfig {
                use_norm_as_weight: norm_weight,
                check_integrity,
                ..TraceConfig::new(atom.beta, atom.orbitals)
            };
            run_walk(&atom, config, steps, seed, histograms)?
        }
    }

    Ok(())
}

fn run_atomic(atom: &AtomArgs) -> Result<()> {
    let diag = atom.diag()?;
    let trace = ImpurityTrace::new(TraceConfig::new(atom.beta, atom.orbitals), diag)
        .context("failed to initialize the trace")?;

    println!("block\tdim\temin\tweight");
    for (b, rho) in trace.atomic_rho().iter().enumerate() {
        println!(
            "{}\t{}\t{:.6}\t{:.6e}",
            b,
            trace.diag().block_dim(b),
            trace.diag().eigenvalue(b, 0),
            rho.mat.trace()
        );
    }
    println!("Z = {:.12e}", trace.atomic_z());
    println!("norm = {:.12e}", trace.atomic_norm());
    Ok(())
}

/// Outcome counters of the walk
#[derive(Debug, Default)]
struct WalkTally {
    proposed: usize,
    accepted: usize,
    skipped: usize,
}

fn run_walk(
    atom: &AtomArgs,
    config: TraceConfig,
    steps: usize,
    seed: u64,
    histograms: bool,
) -> Result<()> {
    let diag = atom.diag()?;
    let n_blocks = diag.n_blocks();
    let beta = config.beta;
    let mut trace = ImpurityTrace::new(config, diag).context("failed to initialize the trace")?;

    let sink = Rc::new(RefCell::new(TraceHistograms::new(n_blocks)));
    if histograms {
        trace.set_diagnostics_sink(Box::new(Rc::clone(&sink)));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let (_, z) = trace.compute(-1.0, 0.0)?;
    let mut weight = z.abs();
    let mut tally = WalkTally::default();

    for step in 0..steps {
        let orbital = rng.gen_range(0..atom.orbitals);
        let insert = rng.gen_bool(0.5);
        let u_yee: f64 = rng.gen();
        let p_yee = 1.0 / weight;

        let accepted = if insert {
            let t1 = TimePoint::new(rng.gen::<f64>() * beta);
            let t2 = TimePoint::new(rng.gen::<f64>() * beta);
            match propose_insert(&mut trace, t1, t2, orbital) {
                Ok(()) => {}
                Err(TraceError::DuplicateKey(_)) => {
                    trace.cancel_insert()?;
                    tally.skipped += 1;
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
            let (_, value) = trace.compute(p_yee, u_yee)?;
            let accept = value != 0.0 && value.abs() * p_yee > u_yee;
            if accept {
                trace.confirm_insert()?;
                weight = value.abs();
            } else {
                trace.cancel_insert()?;
            }
            accept
        } else {
            let n_cdag = trace.count_matching(orbital, true);
            let n_c = trace.count_matching(orbital, false);
            if n_cdag == 0 || n_c == 0 {
                tally.skipped += 1;
                continue;
            }
            trace.try_delete(rng.gen_range(0..n_cdag), orbital, true)?;
            trace.try_delete(rng.gen_range(0..n_c), orbital, false)?;
            let (_, value) = trace.compute(p_yee, u_yee)?;
            let accept = value != 0.0 && value.abs() * p_yee > u_yee;
            if accept {
                trace.confirm_delete()?;
                weight = value.abs();
            } else {
                trace.cancel_delete()?;
            }
            accept
        };

        tally.proposed += 1;
        tally.accepted += usize::from(accepted);
        if (step + 1) % 1000 == 0 {
            info!(
                step = step + 1,
                size = trace.tree_size(),
                weight,
                "walk progress"
            );
        }
    }

    let (bound, value) = trace.compute(-1.0, 0.0)?;
    let stats = trace.refresh_stats();
    println!("operators: {}", trace.tree_size());
    println!(
        "proposed: {}  accepted: {}  skipped: {}",
        tally.proposed, tally.accepted, tally.skipped
    );
    println!("bound = {:.6e}  trace = {:.6e}", bound, value);
    println!(
        "refreshes: {}  mean visits: {:.2}  max visits: {}",
        stats.refreshes,
        stats.mean_visits(),
        stats.max_refresh_visits
    );
    println!("fingerprint: {}", fingerprint(&trace));
    debug!(height = trace.tree().height(), "final tree");

    if histograms {
        print!("{}", sink.borrow());
    }
    Ok(())
}

fn propose_insert(
    trace: &mut ImpurityTrace<BlockDiag>,
    t1: TimePoint,
    t2: TimePoint,
    orbital: usize,
) -> Result<(), TraceError> {
    trace.try_insert(t1, OpDesc::creation(orbital))?;
    trace.try_insert(t2, OpDesc::annihilation(orbital))
}

/// Hash of the configuration, stable across runs with the same seed
fn fingerprint(trace: &ImpurityTrace<BlockDiag>) -> String {
    let mut hasher = blake3::Hasher::new();
    for id in trace.tree().iter() {
        let node = trace.tree().node(id);
        hasher.update(&node.key().value().to_le_bytes());
        let op = node.op();
        hasher.update(&(op.orbital as u64).to_le_bytes());
        hasher.update(&[u8::from(op.dagger)]);
    }
    hasher.finalize().to_hex().to_string()
}
