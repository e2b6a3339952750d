use std::sync::{Arc, Mutex};

use approx::assert_relative_eq;
use itertools::Itertools;

use rusty_sim::clock::{Clock, When};
use rusty_sim::config::SimConfig;
use rusty_sim::equations::equation_set::EquationSet;
use rusty_sim::equations::expr::Expr;
use rusty_sim::error::SimError;
use rusty_sim::monitor::{PopulationRateMonitor, SpikeMonitor, StateMonitor};
use rusty_sim::network::graph::PopulationId;
use rusty_sim::network::network::Network;
use rusty_sim::population::PopulationBuilder;
use rusty_sim::synapses::connection::{Connection, Structure};
use rusty_sim::synapses::stdp::Stdp;
use rusty_sim::threshold::{Reset, Threshold};
use rusty_sim::units::{HZ, MS, MV};

const SEED: u64 = 42;

fn lif() -> EquationSet {
    EquationSet::new()
        .differential("v", (Expr::var("b") + Expr::var("ge") - Expr::var("v")) / Expr::var("tau_m"), "volt")
        .differential("ge", -Expr::var("ge") / Expr::var("tau_e"), "volt")
        .parameter("b", "volt")
        .constant("tau_m", 20.0 * MS)
        .constant("tau_e", 5.0 * MS)
}

/// A population of `size` units whose unit `i` fires exactly at the ticks `ticks[i]`.
fn add_scripted_source(network: &mut Network, ticks: Vec<Vec<u64>>) -> PopulationId {
    let eqs = EquationSet::new().parameter("s", "1");
    let size = ticks.len();
    let id = network
        .add_population(PopulationBuilder::new(size, eqs).threshold(Threshold::above("s", 0.5)))
        .unwrap();
    let clock = network.default_clock();
    network
        .add_operation(When::Start, clock, move |ctx| {
            let tick = ctx.tick();
            let population = ctx.population_mut(id)?;
            population.set_with("s", |i| ticks[i].contains(&tick) as u64 as f64)
        })
        .unwrap();
    id
}

fn add_target(network: &mut Network, size: usize) -> PopulationId {
    let eqs = EquationSet::new().parameter("g", "siemens");
    network.add_population(PopulationBuilder::new(size, eqs)).unwrap()
}

fn random_network(seed: u64) -> (Network, Vec<PopulationId>) {
    let config = SimConfig {
        seed,
        ..SimConfig::default()
    };
    let mut network = Network::with_config(config).unwrap();
    let input = network
        .add_population(
            PopulationBuilder::new(100, EquationSet::new().parameter("rate", "hertz"))
                .threshold(Threshold::poisson("rate")),
        )
        .unwrap();
    network.population_mut(input).unwrap().fill("rate", 20.0 * HZ).unwrap();
    let exc = network
        .add_population(
            PopulationBuilder::new(50, lif())
                .name("exc")
                .threshold(Threshold::above("v", 10.0 * MV))
                .reset(Reset::value("v", 0.0))
                .refractory(2.0 * MS),
        )
        .unwrap();
    network
        .add_connection(Connection::random(input, exc, "ge", 0.2, 6.0 * MV))
        .unwrap();
    network
        .add_connection(Connection::random(exc, exc, "ge", 0.1, -1.0 * MV).without_self_loops())
        .unwrap();
    (network, vec![input, exc])
}

#[test]
fn test_determinism() {
    let run = |seed| {
        let (mut network, ids) = random_network(seed);
        let monitor = network.add_monitor(SpikeMonitor::new(ids[1])).unwrap();
        network.run(200.0 * MS).unwrap();
        let spikes = network.monitor::<SpikeMonitor>(monitor).unwrap().spikes().to_vec();
        let v = network.population(ids[1]).unwrap().get("v").unwrap().to_vec();
        (spikes, v)
    };
    let (spikes, v) = run(SEED);
    assert!(!spikes.is_empty());
    assert_eq!((spikes.clone(), v.clone()), run(SEED));
    assert_ne!(spikes, run(SEED + 1).0);
}

#[test]
fn test_spike_indices_are_ascending() {
    let (mut network, ids) = random_network(SEED);
    let monitor = network.add_monitor(SpikeMonitor::new(ids[0])).unwrap();
    network.run(100.0 * MS).unwrap();
    let spikes = network.monitor::<SpikeMonitor>(monitor).unwrap().spikes();
    for (_, group) in &spikes.iter().chunk_by(|(_, t)| *t) {
        assert!(group.tuple_windows().all(|((i, _), (j, _))| i < j));
    }
}

#[test]
fn test_refractory_invariant() {
    let mut network = Network::new();
    let refractory = 2.0 * MS;
    let id = network
        .add_population(
            PopulationBuilder::new(5, lif())
                .threshold(Threshold::above("v", 10.0 * MV))
                .reset(Reset::value("v", 0.0))
                .refractory(refractory),
        )
        .unwrap();
    network
        .population_mut(id)
        .unwrap()
        .set("b", &[100.0 * MV, 200.0 * MV, 500.0 * MV, 1.0, 10.0])
        .unwrap();
    let monitor = network.add_monitor(SpikeMonitor::new(id)).unwrap();
    network.run(100.0 * MS).unwrap();

    let dt = network.clock(network.default_clock()).unwrap().dt();
    let monitor = network.monitor::<SpikeMonitor>(monitor).unwrap();
    for i in 0..5 {
        let ticks = monitor
            .spike_times(i)
            .iter()
            .map(|t| (t / dt).round() as u64)
            .collect::<Vec<u64>>();
        assert!(ticks.len() > 10);
        assert!(ticks.windows(2).all(|w| w[1] - w[0] >= 20));
    }
    // with a very strong drive, units fire as soon as their refractory window expires
    assert_eq!(monitor.spike_times(4).len(), 50);
}

#[test]
fn test_refractory_hold_discards_input() {
    let w = 0.3;
    let mut network = Network::new();
    let source = add_scripted_source(&mut network, vec![vec![2, 8]]);
    let eqs = EquationSet::new().parameter("v", "volt").parameter("s", "1");
    let target = network
        .add_population(
            PopulationBuilder::new(1, eqs)
                .threshold(Threshold::above("s", 0.5))
                .reset(Reset::value("v", -1.0))
                .refractory(0.5 * MS),
        )
        .unwrap();
    let clock = network.default_clock();
    network
        .add_operation(When::Start, clock, move |ctx| {
            let tick = ctx.tick();
            ctx.population_mut(target)?.fill("s", (tick == 1) as u64 as f64)
        })
        .unwrap();
    network
        .add_connection(Connection::full(source, target, "v", w))
        .unwrap();
    let monitor = network.add_monitor(StateMonitor::new(target, "v", &[0])).unwrap();
    network.run(1.0 * MS).unwrap();

    let trace = network.monitor::<StateMonitor>(monitor).unwrap().trace(0).unwrap();
    // the input of tick 2 reaches a refractory unit and is never observed
    assert_eq!(&trace[..8], &[0.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0, -1.0]);
    assert_relative_eq!(trace[8], -1.0 + w);
    assert_relative_eq!(trace[9], -1.0 + w);
}

#[test]
fn test_additive_propagation() {
    let w = 0.25;
    let mut network = Network::new();
    let source = add_scripted_source(&mut network, vec![vec![5], vec![]]);
    let target = add_target(&mut network, 2);
    network
        .add_connection(Connection::one_to_one(source, target, "g", w))
        .unwrap();
    let monitor = network.add_monitor(StateMonitor::new(target, "g", &[0, 1])).unwrap();
    network.run(2.0 * MS).unwrap();

    let monitor = network.monitor::<StateMonitor>(monitor).unwrap();
    let trace = monitor.trace(0).unwrap();
    assert_eq!(trace.len(), 20);
    assert!(trace[..5].iter().all(|&g| g == 0.0));
    assert!(trace[5..].iter().all(|&g| g == w));
    assert!(monitor.trace(1).unwrap().iter().all(|&g| g == 0.0));
}

#[test]
fn test_connection_additivity() {
    let run = |connect_a: bool, connect_b: bool| {
        let mut network = Network::new();
        let source = add_scripted_source(&mut network, vec![vec![1, 3], vec![3], vec![2, 3]]);
        let target = add_target(&mut network, 4);
        if connect_a {
            let a = Connection::full(source, target, "g", rusty_sim::synapses::connection::Weight::function(|i, j| {
                0.1 * (i + 1) as f64 + 0.01 * j as f64
            }));
            network.add_connection(a).unwrap();
        }
        if connect_b {
            let b = Connection::random(source, target, "g", 0.5, 0.7)
                .with_structure(Structure::Dense)
                .with_seed(7);
            network.add_connection(b).unwrap();
        }
        network.run(1.0 * MS).unwrap();
        network.population(target).unwrap().get("g").unwrap().to_vec()
    };
    let both = run(true, true);
    let a = run(true, false);
    let b = run(false, true);
    assert!(a.iter().any(|&g| g > 0.0));
    for j in 0..4 {
        assert_relative_eq!(both[j], a[j] + b[j], max_relative = 1e-12);
    }
}

#[test]
fn test_subgroups() {
    let mut network = Network::new();
    let source = add_scripted_source(&mut network, vec![vec![0], vec![0], vec![], vec![0]]);
    let target = add_target(&mut network, 6);
    let source_group = network.subgroup(source, 1, 3).unwrap();
    let target_group = network.subgroup(target, 4, 2).unwrap();
    assert!(network.subgroup(target, 4, 3).is_err());
    assert!(matches!(
        network.subgroup(target, usize::MAX, 2),
        Err(SimError::OutOfBounds(_))
    ));
    network
        .add_connection(Connection::full(source_group, target_group, "g", 1.0))
        .unwrap();
    network.run(0.1 * MS).unwrap();
    // source units 1 and 3 fire, unit 0 is outside the subgroup
    assert_eq!(
        network.population(target).unwrap().get("g").unwrap(),
        &[0.0, 0.0, 0.0, 0.0, 2.0, 2.0]
    );
}

#[test]
fn test_phase_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut network = Network::new();
    let clock = network.default_clock();

    let reset_log = log.clone();
    network
        .add_population(
            PopulationBuilder::new(1, EquationSet::new().parameter("x", "1"))
                .threshold(Threshold::custom(|_, _| true))
                .reset(Reset::from_fn(move |_, spikes, _| {
                    assert_eq!(spikes, &[0]);
                    reset_log.lock().unwrap().push("reset");
                    Ok(())
                })),
        )
        .unwrap();
    for (when, label) in [
        (When::End, "end"),
        (When::Middle, "middle"),
        (When::Start, "start"),
        (When::AfterConnections, "after_connections"),
        (When::AfterGroups, "after_groups"),
    ] {
        let op_log = log.clone();
        network
            .add_operation(when, clock, move |_| {
                op_log.lock().unwrap().push(label);
                Ok(())
            })
            .unwrap();
    }
    network.run(0.2 * MS).unwrap();
    let expected = ["start", "after_groups", "reset", "middle", "after_connections", "end"];
    assert_eq!(*log.lock().unwrap(), [expected, expected].concat());
}

#[test]
fn test_presynaptic_resets_first() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut network = Network::new();
    let add = |network: &mut Network, name: &'static str| {
        let log = log.clone();
        network
            .add_population(
                PopulationBuilder::new(1, EquationSet::new().parameter("x", "1"))
                    .threshold(Threshold::custom(|_, _| true))
                    .reset(Reset::from_fn(move |_, _, _| {
                        log.lock().unwrap().push(name);
                        Ok(())
                    })),
            )
            .unwrap()
    };
    let post = add(&mut network, "post");
    let pre = add(&mut network, "pre");
    network
        .add_connection(Connection::full(pre, post, "x", 0.0))
        .unwrap();
    network.run(0.1 * MS).unwrap();
    assert_eq!(*log.lock().unwrap(), vec!["pre", "post"]);
}

#[test]
fn test_multiple_clocks() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut network = Network::new();
    let coarse = network.add_clock(Clock::new(1.0 * MS).unwrap());
    let fine = network.add_clock(Clock::new(0.1 * MS).unwrap().with_order(-1));
    let late = network.add_clock(Clock::new(1.0 * MS).unwrap());
    for (clock, name) in [(coarse, "coarse"), (fine, "fine"), (late, "late")] {
        let log = log.clone();
        network
            .add_operation(When::Start, clock, move |ctx| {
                log.lock().unwrap().push((name, ctx.tick()));
                Ok(())
            })
            .unwrap();
    }
    let summary = network.run(2.0 * MS).unwrap();
    // default clock (20 ticks) + coarse (2) + fine (20) + late (2)
    assert_eq!(summary.ticks, 44);

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 24);
    assert_eq!(log[..3], [("fine", 0), ("coarse", 0), ("late", 0)]);
    assert!(log[3..12].iter().all(|(name, _)| *name == "fine"));
    assert_eq!(log[12..15], [("fine", 10), ("coarse", 1), ("late", 1)]);
    assert_eq!(log[15..].len(), 9);
}

#[test]
fn test_populations_on_different_clocks() {
    let w = 0.5;
    let mut network = Network::new();
    let coarse = network.add_clock(Clock::new(1.0 * MS).unwrap());

    // fine source (default clock, 0.1 ms) into a coarse target (1 ms)
    let fine_source = add_scripted_source(&mut network, vec![vec![3, 4, 12]]);
    let eqs = EquationSet::new().parameter("g", "siemens").parameter("s", "1");
    let coarse_target = network
        .add_population(PopulationBuilder::new(1, eqs.clone()).clock(coarse))
        .unwrap();
    network
        .add_connection(Connection::full(fine_source, coarse_target, "g", w))
        .unwrap();
    let coarse_monitor = network
        .add_monitor(StateMonitor::new(coarse_target, "g", &[0]))
        .unwrap();

    // coarse source, firing at its tick 1 (t = 1 ms), into a fine target
    let coarse_source = network
        .add_population(
            PopulationBuilder::new(1, eqs)
                .clock(coarse)
                .threshold(Threshold::above("s", 0.5)),
        )
        .unwrap();
    network
        .add_operation(When::Start, coarse, move |ctx| {
            let tick = ctx.tick();
            ctx.population_mut(coarse_source)?.fill("s", (tick == 1) as u64 as f64)
        })
        .unwrap();
    let fine_target = add_target(&mut network, 1);
    network
        .add_connection(Connection::full(coarse_source, fine_target, "g", w))
        .unwrap();
    let fine_monitor = network
        .add_monitor(StateMonitor::new(fine_target, "g", &[0]))
        .unwrap();

    // plasticity across clocks is rejected
    let stdp = Stdp::new("s", "g", 0.1, 0.1, (0.0, 1.0)).unwrap();
    assert!(matches!(
        network.add_connection(Connection::full(fine_source, coarse_target, "g", w).with_stdp(stdp)),
        Err(SimError::InvalidOperation(_))
    ));

    let summary = network.run(2.0 * MS).unwrap();
    assert_eq!(summary.ticks, 22);

    // the coarse target sees every spike of the fine source, sampled once per millisecond
    let monitor = network.monitor::<StateMonitor>(coarse_monitor).unwrap();
    assert_eq!(monitor.times().len(), 2);
    assert_eq!(monitor.trace(0).unwrap(), &[0.0, 2.0 * w]);
    assert_relative_eq!(network.population(coarse_target).unwrap().value("g", 0).unwrap(), 3.0 * w);

    // the default clock ticks before the coarse clock at t = 1 ms
    let monitor = network.monitor::<StateMonitor>(fine_monitor).unwrap();
    let trace = monitor.trace(0).unwrap();
    assert_eq!(trace.len(), 20);
    assert!(trace[..11].iter().all(|&g| g == 0.0));
    assert!(trace[11..].iter().all(|&g| g == w));
}

#[test]
fn test_repeated_runs() {
    let mut network = Network::new();
    let id = add_target(&mut network, 1);
    let monitor = network.add_monitor(PopulationRateMonitor::new(id)).unwrap();
    network.run(1.0 * MS).unwrap();
    let summary = network.run(1.0 * MS).unwrap();
    assert_eq!(summary.ticks, 10);
    assert_relative_eq!(network.time(), 2.0 * MS);
    assert_relative_eq!(summary.end_time, 2.0 * MS);
    let monitor = network.monitor::<PopulationRateMonitor>(monitor).unwrap();
    assert_eq!(monitor.times().len(), 20);
    assert!(monitor.rates().iter().all(|&r| r == 0.0));

    // a clock added later starts at the current time
    let clock = network.add_clock(Clock::new(1.0 * MS).unwrap());
    assert_eq!(network.clock(clock).unwrap().tick(), 2);
}

#[test]
fn test_cancellation() {
    let mut network = Network::new();
    let token = network.cancel_token();
    let clock = network.default_clock();
    let op_token = token.clone();
    network
        .add_operation(When::End, clock, move |ctx| {
            if ctx.tick() == 10 {
                op_token.cancel();
            }
            Ok(())
        })
        .unwrap();
    let summary = network.run(1.0).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.ticks, 11);
    assert_relative_eq!(network.time(), 1.1 * MS);

    token.reset();
    let summary = network.run(1.0 * MS).unwrap();
    assert!(!summary.cancelled);
    assert_eq!(summary.ticks, 10);
}

#[test]
fn test_callback_errors_abort_the_run() {
    let mut network = Network::new();
    let clock = network.default_clock();
    network
        .add_operation(When::Middle, clock, |ctx| {
            if ctx.tick() == 3 {
                Err(SimError::Callback("stop".to_string()))
            } else {
                Ok(())
            }
        })
        .unwrap();
    assert_eq!(network.run(1.0), Err(SimError::Callback("stop".to_string())));
}

#[test]
fn test_non_finite_state_aborts_the_run() {
    let mut network = Network::new();
    let eqs = EquationSet::new().differential("x", Expr::var("x") * Expr::var("x"), "1");
    let id = network
        .add_population(PopulationBuilder::new(2, eqs).name("unstable"))
        .unwrap();
    network.population_mut(id).unwrap().set("x", &[0.0, 1.0]).unwrap();
    // x(t) = 1 / (1 - t) diverges at t = 1
    match network.run(2.0) {
        Err(SimError::NonFiniteState {
            population,
            variable,
            tick,
        }) => {
            assert_eq!(population, "unstable");
            assert_eq!(variable, "x");
            assert!(tick > 9_000 && tick < 11_000);
        }
        other => panic!("unexpected outcome {:?}", other),
    }
}

#[test]
fn test_configuration_errors() {
    let mut network = Network::new();
    let eqs = EquationSet::new()
        .algebraic("a", Expr::var("b") + 1.0, "1")
        .algebraic("b", Expr::var("a") * 2.0, "1");
    assert!(matches!(
        network.add_population(PopulationBuilder::new(2, eqs)),
        Err(SimError::CircularDependency(_))
    ));

    let source = add_target(&mut network, 2);
    let target = add_target(&mut network, 3);
    let res = network.add_connection(Connection::dense(
        source,
        target,
        "g",
        nalgebra::DMatrix::zeros(3, 2),
    ));
    assert!(matches!(res, Err(SimError::IncompatibleShape(_))));

    let id = network
        .add_connection(Connection::one_to_one(source, source, "g", 1.0))
        .unwrap();
    assert_eq!(
        network.connection_mut(id).unwrap().set_weight(0, 1, 1.0),
        Err(SimError::StructuralViolation { source: 0, target: 1 })
    );
}
