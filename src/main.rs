//! Fiber Align CLI - Run an alignment against the simulated coupling model.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use fiber_align::{
    compute::{
        CouplingModel, SimulatedCoupling,
        optimizer::{Optimizer, save_result},
    },
    schema::{OptimizerConfig, OptimizerEvent},
};

/// Optimizer settings plus the simulated meter, in one file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RunConfig {
    #[serde(flatten)]
    optimizer: OptimizerConfig,
    #[serde(default)]
    simulation: CouplingModel,
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!(
            "Usage: {} <config.json> [--save <result.json>] [--noise <rel>] [--drift <step>]",
            args[0]
        );
        eprintln!();
        eprintln!("Align both fiber endpoints against a simulated power meter.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to optimizer configuration file");
        eprintln!("  --save       Write the result as JSON to this path");
        eprintln!("  --noise      Relative reading noise (overrides config)");
        eprintln!("  --drift      Optimum shift per evaluation (overrides config)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let mut save_path: Option<PathBuf> = None;
    let mut noise: Option<f64> = None;
    let mut drift: Option<f64> = None;

    let mut rest = args[2..].iter();
    while let Some(flag) = rest.next() {
        let value = rest.next().unwrap_or_else(|| {
            eprintln!("Missing value for {}", flag);
            std::process::exit(1);
        });
        match flag.as_str() {
            "--save" => save_path = Some(PathBuf::from(value)),
            "--noise" => noise = Some(parse_number(flag, value)),
            "--drift" => drift = Some(parse_number(flag, value)),
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    // Load configuration
    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let mut run: RunConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });
    if let Some(noise) = noise {
        run.simulation.noise = noise;
    }
    if let Some(drift) = drift {
        run.simulation.drift_per_evaluation = drift;
    }

    let config = run.optimizer;
    let tunables = &config.tunables;
    println!("Fiber Alignment");
    println!("===============");
    println!(
        "Variables: A {:?}, B {:?}",
        config.search_space.a.variables, config.search_space.b.variables
    );
    println!(
        "Population: {} (elite {}, tournament {})",
        tunables.population_size, tunables.elite_size, tunables.tournament_size
    );
    println!("Generations: {}", config.generations);
    println!("Lock policy: {:?}", config.lock_policy);
    println!(
        "Simulation: peak {:.3} mW, noise {}, drift {}",
        run.simulation.peak_power, run.simulation.noise, run.simulation.drift_per_evaluation
    );
    println!();

    let meter = SimulatedCoupling::new(run.simulation, &config.search_space);
    let total = config.generations;
    let mut optimizer = Optimizer::new(config, meter);
    let events = optimizer.subscribe();

    println!("Running optimization...");
    let start = Instant::now();

    let worker = optimizer.spawn().unwrap_or_else(|e| {
        eprintln!("Error starting optimizer thread: {}", e);
        std::process::exit(1);
    });

    for event in events {
        match event {
            OptimizerEvent::Generation(report) => {
                // Print progress every 10%
                if (report.generation + 1) % (total / 10).max(1) == 0 {
                    println!(
                        "  Generation {}/{}: best={:.6}, avg={:.6}, phase={}, {} evals",
                        report.generation + 1,
                        report.total_generations,
                        report.best_fitness,
                        report.avg_fitness,
                        report.phase,
                        report.evaluations
                    );
                }
            }
            OptimizerEvent::ExplorationStarted { generation, round } => {
                println!("  Generation {}: enhanced exploration round {}", generation + 1, round);
            }
            OptimizerEvent::GlobalConvergenceDetected { generation, best } => {
                println!("  Generation {}: global convergence at {:.6}", generation + 1, best);
            }
            OptimizerEvent::PositionLocked { pose, fitness } => {
                println!("  Position locked at {:.6}: {}", fitness, pose);
            }
            OptimizerEvent::HighPowerModeEntered { params } => {
                println!(
                    "  High-power keep: center {:.6}, population {}",
                    params.center_fitness, params.population_size
                );
            }
            OptimizerEvent::PossibleDrift { fitness, center_fitness } => {
                println!("  Possible drift: {:.6} vs center {:.6}", fitness, center_fitness);
            }
            _ => {}
        }
    }

    let result = worker.join().unwrap_or_else(|_| {
        eprintln!("Optimizer thread panicked");
        std::process::exit(1);
    });
    let elapsed = start.elapsed();

    println!();
    println!("Result:");
    println!("  Success: {}", result.success);
    if let Some(error) = &result.error {
        println!("  Error: {}", error);
    }
    println!("  Stop reason: {:?}", result.stop_reason);
    println!("  Final phase: {}", result.final_phase);
    println!("  Best power: {:.6}", result.best_fitness);
    println!("  Best pose: {}", result.best_pose);
    println!(
        "  Generations: {}, evaluations: {}",
        result.generations, result.evaluations
    );
    println!(
        "  Local convergences: {}, global: {}, locked: {}",
        result.local_convergence_count, result.global_converged, result.position_locked
    );
    println!(
        "Time: {:.2}s ({:.1} evals/s)",
        elapsed.as_secs_f32(),
        result.evaluations as f32 / elapsed.as_secs_f32()
    );

    if let Some(path) = save_path {
        save_result(&result, &path).unwrap_or_else(|e| {
            eprintln!("Error saving result: {}", e);
            std::process::exit(1);
        });
        println!("Saved result to {}", path.display());
    }

    if !result.success {
        std::process::exit(1);
    }
}

fn parse_number(flag: &str, value: &str) -> f64 {
    value.parse().unwrap_or_else(|_| {
        eprintln!("Invalid number for {}: {}", flag, value);
        std::process::exit(1);
    })
}

fn print_example_config() {
    let config = RunConfig::default();

    println!("Example configuration (config.json):");
    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing config: {}", e),
    }
}
