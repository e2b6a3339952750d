use clap::Parser;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use rusty_sim::equations::equation_set::EquationSet;
use rusty_sim::equations::expr::Expr;
use rusty_sim::error::SimError;
use rusty_sim::monitor::SpikeCounter;
use rusty_sim::network::network::Network;
use rusty_sim::population::PopulationBuilder;
use rusty_sim::threshold::{Reset, Threshold};
use rusty_sim::units::{MS, MV};

#[derive(Parser, Debug)]
struct Args {
    /// The number of units, with drives linearly spaced from 0 to the maximum drive
    #[arg(short = 'N', long, default_value = "1000")]
    num_units: usize,
    /// The maximum drive (in mV)
    #[arg(long, default_value = "20.0")]
    max_drive: f64,
    /// The membrane time constant (in ms)
    #[arg(long, default_value = "10.0")]
    tau: f64,
    /// The threshold (in mV)
    #[arg(long, default_value = "10.0")]
    threshold: f64,
    /// The refractory period (in ms)
    #[arg(long, default_value = "0.0")]
    refractory: f64,
    /// The duration of the simulation (in s)
    #[arg(short = 'T', long, default_value = "5.0")]
    duration: f64,
    /// Log the progress of the simulation
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<(), SimError> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let stdout = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {l} - {m}\n")))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout)))
        .build(Root::builder().appender("stdout").build(level))
        .map_err(|e| SimError::IOError(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| SimError::IOError(e.to_string()))?;

    log::info!("{:?}", args);

    // dv/dt = (b - v) / tau : volt
    let eqs = EquationSet::new()
        .differential("v", (Expr::var("b") - Expr::var("v")) / Expr::var("tau"), "volt")
        .parameter("b", "volt")
        .constant("tau", args.tau * MS);

    let mut network = Network::new();
    let id = network.add_population(
        PopulationBuilder::new(args.num_units, eqs)
            .name("if")
            .threshold(Threshold::above("v", args.threshold * MV))
            .reset(Reset::value("v", 0.0))
            .refractory(args.refractory * MS),
    )?;
    let drives = (0..args.num_units)
        .map(|i| args.max_drive * MV * i as f64 / (args.num_units.max(2) - 1) as f64)
        .collect::<Vec<f64>>();
    network.population_mut(id)?.set("b", &drives)?;
    let counter = network.add_monitor(SpikeCounter::new(id))?;

    network.run(args.duration)?;

    let counts = network
        .monitor::<SpikeCounter>(counter)
        .map(|counter| counter.counts().to_vec())
        .unwrap_or_default();
    let step = (args.num_units / 20).max(1);
    for (b, count) in drives.iter().zip(counts.iter()).step_by(step) {
        let rate = *count as f64 / args.duration;
        let expected = if *b > args.threshold * MV {
            1.0 / (args.tau * MS * (b / (b - args.threshold * MV)).ln())
        } else {
            0.0
        };
        log::info!(
            "b = {:6.2} mV: {:7.2} Hz (expected {:7.2} Hz)",
            b / MV,
            rate,
            expected
        );
    }
    Ok(())
}
