mod support;

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::SeedableRng;

use evoscape::errors::MutationError;
use evoscape::genome::diff::changed_ids;
use evoscape::genome::{check_integrity, Genome, Neuron, StrategyConfig, SubstrateConfig, Synapse};
use evoscape::mutation::{
    MutationContext, MutationOp, DEFAULT_ACTIVATIONS, DEFAULT_AGGREGATORS,
    DEFAULT_ANNEALING_FACTORS, DEFAULT_HEREDITY_TYPES, DEFAULT_PLASTICITY_RULES,
    DEFAULT_TOPOLOGICAL_MODES, DEFAULT_TUNING_SELECTIONS,
};
use evoscape::scape::Morphology;

use support::strings;

#[derive(Debug)]
struct ListMorphology {
    sensors: Vec<String>,
    actuators: Vec<String>,
}

impl Morphology for ListMorphology {
    fn ensure_io_compatibility(&self, _scape_name: &str, _genome: &Genome) -> bool {
        true
    }

    fn resolve_sensors(&self, _scape_name: &str) -> Vec<String> {
        self.sensors.clone()
    }

    fn resolve_actuators(&self, _scape_name: &str) -> Vec<String> {
        self.actuators.clone()
    }
}

struct CtxParts {
    inputs: Vec<String>,
    outputs: Vec<String>,
    activations: Vec<String>,
    aggregators: Vec<String>,
    plasticity_rules: Vec<String>,
    tuning_selections: Vec<String>,
    annealing_factors: Vec<f64>,
    topological_modes: Vec<String>,
    heredity_types: Vec<String>,
    cpp_names: Vec<String>,
    cep_names: Vec<String>,
    morphology: ListMorphology,
}

impl CtxParts {
    fn new(inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            inputs: strings(inputs),
            outputs: strings(outputs),
            activations: strings(&DEFAULT_ACTIVATIONS),
            aggregators: strings(&DEFAULT_AGGREGATORS),
            plasticity_rules: strings(&DEFAULT_PLASTICITY_RULES),
            tuning_selections: strings(&DEFAULT_TUNING_SELECTIONS),
            annealing_factors: DEFAULT_ANNEALING_FACTORS.to_vec(),
            topological_modes: strings(&DEFAULT_TOPOLOGICAL_MODES),
            heredity_types: strings(&DEFAULT_HEREDITY_TYPES),
            cpp_names: strings(&["cartesian", "polar", "spherical"]),
            cep_names: strings(&["set_weight", "set_bias"]),
            morphology: ListMorphology {
                sensors: strings(&["s_left", "s_right", "s_extra"]),
                actuators: strings(&["a_main", "a_aux", "a_extra"]),
            },
        }
    }

    fn ctx(&self) -> MutationContext<'_> {
        MutationContext {
            scape_name: "target",
            generation: 1,
            input_neuron_ids: &self.inputs,
            output_neuron_ids: &self.outputs,
            feedforward_only: false,
            max_weight_delta: std::f64::consts::PI,
            activations: &self.activations,
            aggregators: &self.aggregators,
            plasticity_rules: &self.plasticity_rules,
            tuning_selections: &self.tuning_selections,
            annealing_factors: &self.annealing_factors,
            topological_modes: &self.topological_modes,
            heredity_types: &self.heredity_types,
            cpp_names: &self.cpp_names,
            cep_names: &self.cep_names,
            morphology: &self.morphology,
        }
    }
}

/// Genome touching every operator family: hidden neuron, recurrent loop,
/// two sensors/actuators with explicit links, substrate, strategy.
fn rich_genome() -> Genome {
    let mut genome = Genome::empty("rich");
    for (id, activation) in [
        ("i1", "identity"),
        ("i2", "identity"),
        ("h1", "tanh"),
        ("o1", "identity"),
    ] {
        genome.add_neuron(Neuron::new(id, activation, 0)).unwrap();
    }
    genome.add_synapse(Synapse::connect("i1", "h1", 0.5)).unwrap();
    genome.add_synapse(Synapse::connect("h1", "o1", 0.8)).unwrap();
    genome.add_synapse(Synapse::connect("i2", "o1", -0.3)).unwrap();
    genome.add_synapse(Synapse::connect("o1", "o1", 0.1)).unwrap();

    genome.sensor_ids = strings(&["s_left", "s_right"]);
    genome.add_sensor_link("s_left", "i1");
    genome.add_sensor_link("s_left", "i2");
    genome.add_sensor_link("s_right", "i1");

    genome.actuator_ids = strings(&["a_main", "a_aux"]);
    genome.add_actuator_link("o1", "a_main");
    genome.add_actuator_link("o1", "a_aux");
    genome.actuator_generations.insert("a_main".to_string(), 0);
    genome.actuator_generations.insert("a_aux".to_string(), 0);
    genome.actuator_tunables.insert("a_main".to_string(), 0.0);
    genome.actuator_tunables.insert("a_aux".to_string(), 0.0);

    genome.substrate = Some(SubstrateConfig {
        cpp_name: "cartesian".to_string(),
        cep_name: "set_weight".to_string(),
        cpp_ids: Vec::new(),
        cep_ids: vec!["set_bias".to_string()],
        dimensions: vec![2, 3],
        parameters: BTreeMap::from([("pressure".to_string(), 0.5)]),
        weight_count: 6,
    });
    genome.strategy = Some(StrategyConfig::default());
    check_integrity(&genome).unwrap();
    genome
}

#[test]
fn operators_never_mutate_their_input() {
    let parts = CtxParts::new(&["i1", "i2"], &["o1"]);
    let genome = rich_genome();
    for name in MutationOp::all_names() {
        let op = MutationOp::parse(name).unwrap();
        let snapshot = genome.clone();
        let mut rng = StdRng::seed_from_u64(42);
        let _ = op.apply(&genome, &parts.ctx(), &mut rng);
        assert_eq!(genome, snapshot, "{name} modified its input genome");
    }
}

#[test]
fn applicability_false_implies_soft_error() {
    let parts = CtxParts::new(&["i1"], &["o1"]);
    // Three shapes: rich, minimal linear, and completely empty.
    let minimal = Genome::linear("min", &strings(&["i1"]), &strings(&["o1"]), 0.5);
    for genome in [rich_genome(), minimal, Genome::empty("void")] {
        for name in MutationOp::all_names() {
            let op = MutationOp::parse(name).unwrap();
            let ctx = parts.ctx();
            if op.applicable(&genome, &ctx) {
                continue;
            }
            let mut rng = StdRng::seed_from_u64(7);
            match op.apply(&genome, &ctx, &mut rng) {
                Ok(_) => panic!("{name} applied despite applicable() == false"),
                // Targeted operators document a hard structural error
                // instead of the generic soft skip.
                Err(MutationError::SynapseNotFound(_)) if name == "perturb_weight_at" => {}
                Err(error) => {
                    assert!(error.is_soft(), "{name} returned hard error {error:?}")
                }
            }
        }
    }
}

#[test]
fn successful_operators_keep_integrity_and_match_the_diff() {
    let parts = CtxParts::new(&["i1", "i2"], &["o1"]);
    let genome = rich_genome();
    let mut applied = 0;
    for name in MutationOp::all_names() {
        let op = MutationOp::parse(name).unwrap();
        for seed in 0..4u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            if let Ok(outcome) = op.apply(&genome, &parts.ctx(), &mut rng) {
                applied += 1;
                check_integrity(&outcome.genome)
                    .unwrap_or_else(|e| panic!("{name} broke the genome: {e}"));
                let derived = changed_ids(&genome, &outcome.genome);
                assert_eq!(derived, outcome.touched, "{name} change set disagrees with diff");
                assert!(!outcome.touched.is_empty(), "{name} reported no changes");
            }
        }
    }
    assert!(applied > 60, "only {applied} successful applications");
}

// A genome with one zero-weight synapse must still get its guaranteed
// perturbation.
#[test]
fn proportional_perturbation_always_touches_something() {
    let parts = CtxParts::new(&["i1"], &["o1"]);
    let genome = Genome::linear("flat", &strings(&["i1"]), &strings(&["o1"]), 0.0);
    for name in ["perturb_weights_proportional", "mutate_weights"] {
        let op = MutationOp::parse(name).unwrap();
        for seed in 0..32u64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let outcome = op.apply(&genome, &parts.ctx(), &mut rng).unwrap();
            assert_ne!(outcome.genome.synapses[0].weight, 0.0, "seed {seed} left weight 0");
        }
    }
}

// add_inlink where the only directional candidate already exists.
#[test]
fn add_inlink_with_only_duplicates_is_inapplicable() {
    let parts = CtxParts::new(&["i1"], &["h1"]);
    let mut genome = Genome::empty("dup");
    genome.add_neuron(Neuron::new("i1", "identity", 0)).unwrap();
    genome.add_neuron(Neuron::new("h1", "tanh", 0)).unwrap();
    genome.add_synapse(Synapse::connect("i1", "h1", 1.0)).unwrap();

    let op = MutationOp::parse("add_inlink").unwrap();
    let ctx = parts.ctx();
    assert!(!op.applicable(&genome, &ctx));
    let mut rng = StdRng::seed_from_u64(5);
    assert_eq!(op.apply(&genome, &ctx, &mut rng), Err(MutationError::NoMutationChoice));
}

// remove_sensor drops the port, its boundary links, and resyncs counters.
#[test]
fn remove_sensor_synchronises_links_and_counters() {
    let parts = CtxParts::new(&["n1", "n2"], &["n1"]);
    let mut genome = Genome::empty("ports");
    genome.add_neuron(Neuron::new("n1", "identity", 0)).unwrap();
    genome.add_neuron(Neuron::new("n2", "identity", 0)).unwrap();
    genome.sensor_ids = strings(&["s_left", "s_right"]);
    genome.add_sensor_link("s_left", "n1");
    genome.add_sensor_link("s_left", "n2");
    genome.add_sensor_link("s_right", "n1");
    assert_eq!(genome.sensor_links, 3);

    let op = MutationOp::parse("remove_sensor").unwrap();
    let mut removed_left = false;
    for seed in 0..16u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let outcome = op.apply(&genome, &parts.ctx(), &mut rng).unwrap();
        let child = &outcome.genome;
        check_integrity(child).unwrap();
        if child.sensor_ids == strings(&["s_right"]) {
            removed_left = true;
            assert_eq!(child.sensor_neuron_links.len(), 1);
            assert_eq!(child.sensor_neuron_links[0].sensor, "s_right");
            assert_eq!(child.sensor_neuron_links[0].neuron, "n1");
            assert_eq!(child.sensor_links, 1);
        } else {
            // The other draw: s_right went away, s_left keeps two links.
            assert_eq!(child.sensor_ids, strings(&["s_left"]));
            assert_eq!(child.sensor_links, 2);
        }
    }
    assert!(removed_left, "no seed removed s_left");
}

#[test]
fn splice_preserves_path_weight_shape() {
    let parts = CtxParts::new(&["i1"], &["o1"]);
    let genome = Genome::linear("sp", &strings(&["i1"]), &strings(&["o1"]), 0.7);
    let op = MutationOp::parse("outsplice").unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let outcome = op.apply(&genome, &parts.ctx(), &mut rng).unwrap();
    let child = &outcome.genome;
    assert_eq!(child.neurons.len(), 3);
    assert_eq!(child.synapses.len(), 2);
    assert!(child.synapse_between("i1", "o1").is_none());
    let fresh: Vec<&str> = child
        .neurons
        .iter()
        .map(|n| n.id.as_str())
        .filter(|id| *id != "i1" && *id != "o1")
        .collect();
    assert_eq!(fresh.len(), 1);
    let inbound = child.synapse_between("i1", fresh[0]).unwrap();
    let outbound = child.synapse_between(fresh[0], "o1").unwrap();
    assert_eq!(inbound.weight, 1.0);
    assert_eq!(outbound.weight, 0.7);
}

#[test]
fn feedforward_flag_blocks_backward_and_recurrent_edges() {
    let parts = CtxParts::new(&["i1"], &["o1"]);
    let genome = Genome::linear("ff", &strings(&["i1"]), &strings(&["o1"]), 1.0);
    let op = MutationOp::parse("add_random_synapse").unwrap();
    let mut feedforward_ctx = parts.ctx();
    feedforward_ctx.feedforward_only = true;
    // The only forward pair i1 -> o1 already exists; everything else would
    // go sideways or backwards.
    assert!(!op.applicable(&genome, &feedforward_ctx));
    let mut rng = StdRng::seed_from_u64(1);
    assert_eq!(
        op.apply(&genome, &feedforward_ctx, &mut rng),
        Err(MutationError::NoMutationChoice)
    );
}

#[test]
fn strategy_swap_cancels_without_alternatives() {
    let mut parts = CtxParts::new(&["i1"], &["o1"]);
    parts.heredity_types = strings(&["darwinian"]);
    let genome = rich_genome();
    let op = MutationOp::parse("mutate_heredity_type").unwrap();
    let ctx = parts.ctx();
    assert!(!op.applicable(&genome, &ctx));
    let mut rng = StdRng::seed_from_u64(2);
    assert_eq!(op.apply(&genome, &ctx, &mut rng), Err(MutationError::NoMutationChoice));
}
