use std::fs;

use clap::Parser;
use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use sha2::{Digest, Sha256};

use rusty_sim::config::SimConfig;
use rusty_sim::equations::equation_set::EquationSet;
use rusty_sim::equations::expr::Expr;
use rusty_sim::error::SimError;
use rusty_sim::monitor::{PopulationRateMonitor, SpikeMonitor};
use rusty_sim::network::network::Network;
use rusty_sim::population::PopulationBuilder;
use rusty_sim::synapses::connection::Connection;
use rusty_sim::synapses::stdp::Stdp;
use rusty_sim::threshold::{Reset, Threshold};
use rusty_sim::units::{HZ, MS, MV};

#[derive(Parser, Debug)]
struct Args {
    /// The seed of the simulation
    #[arg(long, default_value = "0")]
    seed: u64,
    /// The number of Poisson inputs
    #[arg(short = 'N', long, default_value = "1000")]
    num_inputs: usize,
    /// The firing rate of the inputs (in Hz)
    #[arg(long, default_value = "15.0")]
    input_rate: f64,
    /// The maximum weight (in units of the leak conductance)
    #[arg(long, default_value = "0.01")]
    gmax: f64,
    /// The duration of the simulation (in s)
    #[arg(short = 'T', long, default_value = "100.0")]
    duration: f64,
}

fn main() -> Result<(), SimError> {
    let args = Args::parse();

    let mut hasher = Sha256::new();
    hasher.update(format!("{:?}", args));
    let hash = hasher.finalize();
    let log_path = format!("log/{:x}.log", hash);
    let results_path = format!("results/{:x}.json", hash);

    let logfile = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new("{l} - {m}\n")))
        .build(log_path)
        .map_err(|e| SimError::IOError(e.to_string()))?;
    let config = Config::builder()
        .appender(Appender::builder().build("logfile", Box::new(logfile)))
        .build(Root::builder().appender("logfile").build(LevelFilter::Info))
        .map_err(|e| SimError::IOError(e.to_string()))?;
    log4rs::init_config(config).map_err(|e| SimError::IOError(e.to_string()))?;

    log::info!("{:?}", args);

    let mut network = Network::with_config(SimConfig {
        seed: args.seed,
        ..SimConfig::default()
    })?;

    let input = network.add_population(
        PopulationBuilder::new(
            args.num_inputs,
            EquationSet::new()
                .differential("A_pre", -Expr::var("A_pre") / Expr::var("tau_pre"), "1")
                .parameter("rate", "hertz")
                .constant("tau_pre", 20.0 * MS),
        )
        .name("input")
        .threshold(Threshold::poisson("rate")),
    )?;
    network
        .population_mut(input)?
        .fill("rate", args.input_rate * HZ)?;

    // dv/dt = (ge * (Ee - v) + El - v) / taum : volt
    // dge/dt = -ge / taue : 1
    let neuron = network.add_population(
        PopulationBuilder::new(
            1,
            EquationSet::new()
                .differential(
                    "v",
                    (Expr::var("ge") * (Expr::var("Ee") - Expr::var("v")) + Expr::var("El") - Expr::var("v"))
                        / Expr::var("taum"),
                    "volt",
                )
                .differential("ge", -Expr::var("ge") / Expr::var("taue"), "1")
                .differential("A_post", -Expr::var("A_post") / Expr::var("tau_post"), "1")
                .constant("taum", 10.0 * MS)
                .constant("taue", 5.0 * MS)
                .constant("tau_post", 20.0 * MS)
                .constant("Ee", 0.0 * MV)
                .constant("El", -74.0 * MV),
        )
        .name("neuron")
        .threshold(Threshold::above("v", -54.0 * MV))
        .reset(Reset::value("v", -60.0 * MV)),
    )?;
    network.population_mut(neuron)?.fill("v", -74.0 * MV)?;

    let dapre = 0.01 * args.gmax;
    let dapost = -dapre * 1.05;
    let stdp = Stdp::new("A_pre", "A_post", dapre, dapost, (0.0, args.gmax))?;
    let synapses = network.add_connection(
        Connection::full(input, neuron, "ge", args.gmax / 2.0).with_stdp(stdp),
    )?;

    let spikes = network.add_monitor(SpikeMonitor::new(neuron))?;
    let rate = network.add_monitor(PopulationRateMonitor::new(neuron))?;

    network.run(args.duration)?;

    let weights = network
        .connection(synapses)?
        .weights()
        .iter()
        .map(|(_, _, w)| w / args.gmax)
        .collect::<Vec<f64>>();
    let num_spikes = network
        .monitor::<SpikeMonitor>(spikes)
        .map_or(0, |monitor| monitor.num_spikes());
    let smoothed = network
        .monitor::<PopulationRateMonitor>(rate)
        .map(|monitor| monitor.smooth_rate(1.0))
        .transpose()?
        .unwrap_or_default();
    log::info!(
        "{} output spikes, {:.1}% of the weights at the upper bound",
        num_spikes,
        100.0 * weights.iter().filter(|&&w| w > 0.99).count() as f64 / weights.len() as f64
    );

    let results = serde_json::json!({
        "normalized_weights": weights,
        "num_spikes": num_spikes,
        "smoothed_rate": smoothed.iter().step_by(1000).collect::<Vec<_>>(),
    });
    fs::create_dir_all("results").map_err(|e| SimError::IOError(e.to_string()))?;
    fs::write(&results_path, results.to_string()).map_err(|e| SimError::IOError(e.to_string()))?;
    log::info!("Results saved to {}", results_path);
    Ok(())
}
