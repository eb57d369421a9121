//! tensor-cassi: tensorial CASSI operator workbench.
//!
//! Builds an operator, pushes a random batch through it and reports how well
//! the structured inverses and the normal-equation solvers hold up.

use std::fs;
use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::{Parser, ValueEnum};
use ndarray::Array4;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Uniform};
use tracing_subscriber::EnvFilter;

use tensor_cassi::config;
use tensor_cassi::structure::{imvm, imvms};
use tensor_cassi::{ApertureInit, CodedAperture, Execution, OperatorConfig, TensorCassi};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum InitArg {
    Binary,
    Uniform,
}

impl From<InitArg> for ApertureInit {
    fn from(arg: InitArg) -> Self {
        match arg {
            InitArg::Binary => ApertureInit::Binary,
            InitArg::Uniform => ApertureInit::Uniform,
        }
    }
}

/// Tensorial CASSI operator CLI.
#[derive(Parser, Debug)]
#[command(
    name = "tensor-cassi",
    about = "Tensorial CASSI forward/backward operator with structured P/Q inversion",
    version
)]
struct Cli {
    /// Spectral bands L.
    #[arg(short = 'l', long, default_value_t = config::DEFAULT_BANDS)]
    bands: usize,

    /// Spatial rows M.
    #[arg(short = 'm', long, default_value_t = config::DEFAULT_ROWS)]
    rows: usize,

    /// Spatial columns N.
    #[arg(short = 'n', long, default_value_t = config::DEFAULT_COLS)]
    cols: usize,

    /// Cubes per batch.
    #[arg(short, long, default_value_t = config::DEFAULT_BATCH)]
    batch: usize,

    /// Penalty ρ for the inverses and solvers.
    #[arg(long, default_value_t = config::DEFAULT_RHO)]
    rho: f32,

    /// Seed for the aperture and the test cube.
    #[arg(long, default_value_t = config::DEFAULT_SEED)]
    seed: u64,

    /// Aperture fill when none is loaded.
    #[arg(long, value_enum, default_value_t = InitArg::Binary)]
    init: InitArg,

    /// Allow gradient steps on the aperture.
    #[arg(long, default_value_t = false)]
    trainable: bool,

    /// Run batch items on the calling thread only.
    #[arg(long, default_value_t = false)]
    sequential: bool,

    /// Read the aperture from this file instead of drawing one.
    #[arg(long)]
    load_aperture: Option<PathBuf>,

    /// Write the aperture to this file before exiting.
    #[arg(long)]
    save_aperture: Option<PathBuf>,
}

fn max_relative_error(got: &Array4<f32>, want: &Array4<f32>) -> f32 {
    let scale = want.iter().fold(0.0f32, |m, v| m.max(v.abs())).max(f32::MIN_POSITIVE);
    got.iter()
        .zip(want.iter())
        .fold(0.0f32, |m, (a, b)| m.max((a - b).abs()))
        / scale
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    ensure!(cli.batch > 0, "batch must be positive");

    tracing::info!("tensor-cassi v{}", env!("CARGO_PKG_VERSION"));

    let operator_config = OperatorConfig {
        input_shape: (cli.bands, cli.rows, cli.cols),
        trainable: cli.trainable,
        init: cli.init.into(),
        seed: cli.seed,
        execution: cli.sequential.then_some(Execution::Sequential),
        ..OperatorConfig::default()
    };

    let op = match &cli.load_aperture {
        Some(path) => {
            let bytes = fs::read(path)
                .with_context(|| format!("reading aperture from {}", path.display()))?;
            let aperture = CodedAperture::from_bytes(&bytes)
                .with_context(|| format!("decoding aperture in {}", path.display()))?;
            tracing::info!("Loaded aperture {:?} from {}", aperture.dim(), path.display());
            TensorCassi::from_parts(&operator_config, aperture)?
        }
        None => TensorCassi::from_config(&operator_config)?,
    };

    let (bands, rows, cols) = op.input_shape();
    tracing::info!(
        "Operator: L={}, M={}, N={}, transmittance={:.3}, trainable={}",
        bands,
        rows,
        cols,
        op.aperture().transmittance(),
        op.is_trainable(),
    );

    // Sensing round trip.
    let mut rng = StdRng::seed_from_u64(cli.seed.wrapping_add(1));
    let dist = Uniform::new(0.0f32, 1.0);
    let x = Array4::from_shape_simple_fn((cli.batch, bands, rows, cols), || dist.sample(&mut rng));
    let y = op.forward(x.view())?;
    let back = op.backward(y.view())?;
    tracing::info!("forward  {:?} -> {:?}", x.shape(), y.shape());
    tracing::info!("backward {:?} -> {:?}", y.shape(), back.shape());

    let adjoint_lhs = (&y * &y).sum();
    let adjoint_rhs = (&x * &back).sum();
    tracing::info!(
        "adjoint gap |<Hx,Hx> - <x,HtHx>| / <Hx,Hx> = {:.2e}",
        (adjoint_lhs - adjoint_rhs).abs() / adjoint_lhs.max(f32::MIN_POSITIVE),
    );

    // Structured kernels against the dense transforms.
    let kernels = op.kernels();
    tracing::info!("P {:?}, Q {:?}", kernels.p.shape(), kernels.q.shape());
    let q_err = max_relative_error(&imvms(x.view(), kernels.q.view()), &back);
    let p_err = max_relative_error(&imvm(y.view(), kernels.p.view()), &op.forward(back.view())?);
    tracing::info!("IMVMS vs HtH: {:.2e}, IMVM vs HHt: {:.2e}", q_err, p_err);

    // Inverses.
    for rho in [cli.rho, config::IDENTITY_RHO] {
        let p_inv = op.p_inverse(rho);
        let q_inv = op.q_inverse(rho);
        if !p_inv.is_finite() || !q_inv.is_finite() {
            tracing::warn!("rho={} produced non-finite inverse entries", rho);
            continue;
        }
        let p_round = imvm(imvm(y.view(), p_inv.system.view()).view(), p_inv.inverse.view());
        let q_round = imvms(imvms(x.view(), q_inv.system.view()).view(), q_inv.inverse.view());
        let p_res = max_relative_error(&p_round, &y);
        let q_res = max_relative_error(&q_round, &x);
        tracing::info!("rho={:<8} Pinv residual {:.2e}, Qinv residual {:.2e}", rho, p_res, q_res);
        if rho == config::IDENTITY_RHO && p_res >= config::IDENTITY_TOLERANCE {
            tracing::warn!("Pinv residual {:.2e} above tolerance at rho={}", p_res, rho);
        }
    }

    // Data-fidelity step.
    let v = Array4::zeros(x.raw_dim());
    let primal = op.solve_normal(y.view(), v.view(), cli.rho)?;
    let dual = op.solve_normal_dual(y.view(), v.view(), cli.rho)?;
    let normal_lhs = op.forward_backward(primal.view())? + &(&primal * cli.rho);
    tracing::info!(
        "solve_normal: equation residual {:.2e}, primal/dual gap {:.2e}",
        max_relative_error(&normal_lhs, &back),
        max_relative_error(&dual, &primal),
    );

    if let Some(path) = &cli.save_aperture {
        fs::write(path, op.aperture().to_bytes())
            .with_context(|| format!("writing aperture to {}", path.display()))?;
        tracing::info!("Saved aperture to {}", path.display());
    }

    tracing::info!("Done.");
    Ok(())
}
