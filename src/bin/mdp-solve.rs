use clap::Parser;
use mdplib::{
    config::SolverConfig,
    domains::{ExplicitProblem, GridWorld},
    error::MdpError,
    model::{Mdp, Problem, Ssp},
    solvers::{
        lexi_sample_trial, random_successor, sample_trial, SolveStatus, SolverContext, SolverName,
    },
    verbosity::Verbosity,
};
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info};

#[derive(Parser)]
#[command(version)]
/// Solve a grid world map, or an explicit MDP described in TOML, and
/// simulate the resulting policy.
struct Cli {
    #[arg(help = "The grid map file, or a .toml explicit MDP description")]
    map: PathBuf,
    #[arg(
        value_enum,
        help = "The solver to use",
        short = 'a',
        long = "algorithm",
        id = "ALGORITHM",
        default_value_t = SolverName::Lrtdp
    )]
    algorithm: SolverName,
    #[arg(help = "TOML file with solver parameters", long = "config", id = "CONFIG")]
    config: Option<PathBuf>,
    #[arg(help = "Seed for the solver and the simulations", long = "seed", id = "SEED")]
    seed: Option<u64>,
    #[arg(
        help = "Time limit of each solve, e.g. 500ms or 2s",
        long = "time-limit",
        id = "TIME_LIMIT",
        value_parser = humantime::parse_duration
    )]
    time_limit: Option<Duration>,
    #[arg(
        help = "Number of simulated executions of the policy",
        long = "simulations",
        id = "SIMULATIONS",
        default_value_t = 100
    )]
    simulations: usize,
    #[arg(
        value_enum,
        help = "The verbosity level",
        short = 'v',
        long = "verbosity",
        id = "VERBOSITY",
        default_value_t = Verbosity::Normal
    )]
    verbosity: Verbosity,
}

/// Online simulations give up after this many steps.
const MAX_SIMULATION_STEPS: usize = 1000;

fn main() {
    let cli = Cli::parse();

    let level: tracing::level_filters::LevelFilter = cli.verbosity.into();
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if let Err(e) = run(&cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), MdpError> {
    let mut config = match &cli.config {
        Some(path) => SolverConfig::from_path(path)?,
        None => SolverConfig::default(),
    };
    if cli.seed.is_some() {
        config.seed = cli.seed;
    }
    if let Some(limit) = cli.time_limit {
        config.time_limit_ms = Some(u64::try_from(limit.as_millis()).unwrap_or(u64::MAX));
    }

    if cli.map.extension().is_some_and(|extension| extension == "toml") {
        let problem = ExplicitProblem::from_path(&cli.map)?;
        solve(cli, &config, Mdp::new(problem));
    } else {
        let grid = GridWorld::from_path(&cli.map)?;
        let heuristic = Box::new(grid.manhattan_heuristic());
        solve(cli, &config, Mdp::with_heuristic(grid, heuristic));
    }
    Ok(())
}

fn solve<P: Problem>(cli: &Cli, config: &SolverConfig, mut mdp: Mdp<P>) {
    let s0 = mdp.initial_state();
    let mut context = SolverContext::new(cli.seed);
    info!(algorithm = %cli.algorithm, "solving");

    if cli.algorithm.is_online() {
        let mut total = 0.;
        let mut status = SolveStatus::Converged;
        for _ in 0..cli.simulations {
            let mut current = s0;
            let mut cost = 0.;
            for _ in 0..MAX_SIMULATION_STEPS {
                if mdp.is_goal(current) {
                    break;
                }
                let solution = cli.algorithm.create(&mut mdp, config).solve(current);
                status = solution.status;
                let Some(action) = solution.action else {
                    break;
                };
                debug!(state = ?mdp.state(current), action = ?mdp.action(action));
                cost += mdp.cost(current, action);
                current = random_successor(&mut mdp, current, Some(action), context.rng());
            }
            total += cost;
        }
        println!("Status: {}", status);
        println!("Average cost: {:.4}", total / cli.simulations.max(1) as f64);
        return;
    }

    let solution = cli.algorithm.create(&mut mdp, config).solve(s0);
    info!(status = %solution.status, states = mdp.num_states());
    println!("Value: {:.4}", mdp.value(s0));
    println!("Status: {}", solution.status);
    if let Some(action) = solution.action {
        println!("Action: {:?}", mdp.action(action));
    }
    let runs = cli.simulations.max(1) as f64;
    if mdp.num_levels() > 1 {
        let mut totals = vec![0.; mdp.num_levels()];
        for _ in 0..cli.simulations {
            let costs = lexi_sample_trial(&mut mdp, s0, context.rng());
            for (total, cost) in totals.iter_mut().zip(costs) {
                *total += cost;
            }
        }
        for (level, total) in totals.iter().enumerate() {
            println!("Average cost (level {}): {:.4}", level, total / runs);
        }
        return;
    }
    let total: f64 = (0..cli.simulations)
        .map(|_| sample_trial(&mut mdp, s0, context.rng()))
        .sum();
    println!("Average cost: {:.4}", total / runs);
}
