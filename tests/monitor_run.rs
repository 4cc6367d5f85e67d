mod support;

use std::sync::{Arc, Mutex};

use evoscape::genome::Genome;
use evoscape::monitor::{
    build_species_offspring_plan, EvolutionType, PopulationMonitor, ScoredGenome, TraceUpdate,
};
use evoscape::scape::{CancelToken, Trace};

use support::{linear_population, strings, target_config};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn scored(id: &str, fitness: f64) -> ScoredGenome {
    ScoredGenome {
        genome: Genome::linear(id, &strings(&["i1"]), &strings(&["o1"]), 0.1),
        fitness,
        trace: Trace::new(),
    }
}

// Species A (means 0.85) must receive at least as many of the 6 slots as
// species B (means 0.15), and the plan must total exactly 6.
#[test]
fn offspring_plan_totals_and_orders_by_mean_fitness() {
    let ranked = vec![
        scored("A0", 0.90),
        scored("A1", 0.80),
        scored("B0", 0.20),
        scored("B1", 0.10),
    ];
    let mut assignment = std::collections::BTreeMap::new();
    assignment.insert("A0".to_string(), "A".to_string());
    assignment.insert("A1".to_string(), "A".to_string());
    assignment.insert("B0".to_string(), "B".to_string());
    assignment.insert("B1".to_string(), "B".to_string());

    let plan = build_species_offspring_plan(&ranked, &assignment, 6);
    let total: usize = plan.values().sum();
    assert_eq!(total, 6);
    assert!(plan["A"] > plan["B"], "plan was {plan:?}");
}

#[test]
fn plan_handles_non_positive_fitness() {
    let ranked = vec![scored("a", -2.0), scored("b", -4.0), scored("c", 0.0)];
    let mut assignment = std::collections::BTreeMap::new();
    assignment.insert("a".to_string(), "x".to_string());
    assignment.insert("b".to_string(), "y".to_string());
    assignment.insert("c".to_string(), "z".to_string());
    let plan = build_species_offspring_plan(&ranked, &assignment, 5);
    assert_eq!(plan.values().sum::<usize>(), 5);
    assert!(plan["z"] >= plan["y"]);
    assert!(plan["x"] >= plan["y"]);
}

// Six linear identity networks, deterministic +0.2 weight step, elite 2,
// six generations: fitness must improve and every record must be present.
#[test]
fn six_generation_deterministic_run() {
    init_tracing();
    let mut cfg = target_config(6, 6);
    cfg.elite_count = 2;
    cfg.workers = 3;
    cfg.seed = 1;
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    let population = linear_population(&[-1.0, -0.8, -0.6, -0.4, -0.2, 0.0]);

    let result = monitor.run(&ctx, population).unwrap();

    assert_eq!(result.best_by_generation.len(), 6);
    assert!(
        result.best_by_generation[5] > result.best_by_generation[0],
        "no improvement: {:?}",
        result.best_by_generation
    );
    assert_eq!(result.generation_diagnostics.len(), 6);
    assert_eq!(result.species_history.len(), 6);
    assert_eq!(result.final_population.len(), 6);
    // All members share one topology, so one species key persists across
    // every generation.
    for record in &result.species_history {
        assert_eq!(record.species.len(), 1);
        assert_eq!(record.species[0].key, "s0");
    }
    assert!(!result.lineage.is_empty());
    for record in &result.lineage {
        assert!(!record.fingerprint.is_empty(), "empty fingerprint on {}", record.genome_id);
    }
}

// With elites preserved and a deterministic scape, the best fitness can
// never regress between generations.
#[test]
fn elite_carry_over_keeps_best_fitness_monotone() {
    let mut cfg = target_config(6, 8);
    cfg.elite_count = 2;
    cfg.workers = 2;
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    let result = monitor
        .run(&ctx, linear_population(&[-1.0, -0.5, 0.0, 0.3, 0.6, 0.9]))
        .unwrap();
    for window in result.best_by_generation.windows(2) {
        assert!(window[1] >= window[0] - 1e-12, "best regressed: {window:?}");
    }
}

// Population size is conserved every generation (species sizes sum to it)
// and elite clones appear in the lineage.
#[test]
fn generational_mode_conserves_population_size() {
    let mut cfg = target_config(5, 4);
    cfg.elite_count = 2;
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    let result = monitor
        .run(&ctx, linear_population(&[-0.4, -0.2, 0.0, 0.2, 0.4]))
        .unwrap();

    for record in &result.species_history {
        let total: usize = record.species.iter().map(|m| m.size).sum();
        assert_eq!(total, 5, "generation {} lost genomes", record.generation);
    }
    assert_eq!(result.final_population.len(), 5);
    let elite_records = result
        .lineage
        .iter()
        .filter(|r| r.operation == "elite_clone")
        .count();
    // Two per generation except after the last one.
    assert_eq!(elite_records, 2 * 3);
    let seed_records = result.lineage.iter().filter(|r| r.operation == "seed").count();
    assert_eq!(seed_records, 5);
}

#[test]
fn steady_state_replaces_exactly_one_member() {
    let mut cfg = target_config(4, 5);
    cfg.evolution_type = EvolutionType::SteadyState;
    cfg.elite_count = 1;
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    let result = monitor
        .run(&ctx, linear_population(&[-0.3, 0.0, 0.3, 0.6]))
        .unwrap();

    assert_eq!(result.final_population.len(), 4);
    for record in &result.species_history {
        let total: usize = record.species.iter().map(|m| m.size).sum();
        assert_eq!(total, 4);
    }
    // One offspring per completed generation: lineage = seeds + offspring.
    let offspring = result
        .lineage
        .iter()
        .filter(|r| r.operation != "seed" && r.operation != "elite_clone")
        .count();
    assert_eq!(offspring, 4, "one replacement per non-final generation");
}

#[test]
fn trace_updates_follow_step_boundaries() {
    let updates: Arc<Mutex<Vec<TraceUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);

    let mut cfg = target_config(6, 6);
    cfg.elite_count = 2;
    cfg.trace_step_size = 10;
    cfg.validation_probe = true;
    cfg.trace_update_hook = Some(Box::new(move |update: &TraceUpdate| {
        sink.lock().unwrap().push(update.clone());
    }));
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    monitor
        .run(&ctx, linear_population(&[-1.0, -0.8, -0.6, -0.4, -0.2, 0.0]))
        .unwrap();

    let updates = updates.lock().unwrap();
    let reasons: Vec<&str> = updates.iter().map(|u| u.reason.as_str()).collect();
    // 36 evaluations with a step of 10: three crossings plus the final one.
    assert_eq!(reasons.iter().filter(|r| **r == "step").count(), 3);
    assert_eq!(reasons.last(), Some(&"completed"));

    let first_step = updates.iter().find(|u| u.reason == "step").unwrap();
    assert!(first_step.total_evaluations >= 10);
    assert!(first_step.step_evaluations > 0);
    assert!(first_step.step_cycles > 0);
    assert!(!first_step.species.is_empty());
    for species in &first_step.species {
        assert!(!species.champion_id.is_empty());
        assert!(species.validation_fitness.is_some());
        assert!(species.test_fitness.is_none());
    }
    let completed = updates.last().unwrap();
    assert_eq!(completed.total_evaluations, 36);
}

#[test]
fn fitness_goal_stops_the_run_and_elides_the_counter() {
    let updates: Arc<Mutex<Vec<TraceUpdate>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);

    let mut cfg = target_config(6, 20);
    cfg.elite_count = 2;
    cfg.fitness_goal = 0.3;
    cfg.trace_update_hook = Some(Box::new(move |update: &TraceUpdate| {
        sink.lock().unwrap().push(update.clone());
    }));
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    let result = monitor
        .run(&ctx, linear_population(&[-1.0, -0.8, -0.6, -0.4, -0.2, 0.0]))
        .unwrap();

    // Generation 1 offspring reach fitness >= 0.3, so the run ends early.
    assert!(result.best_by_generation.len() < 20);
    let completed = updates.lock().unwrap().last().cloned().unwrap();
    assert!(completed.goal_reached);
    // Results arriving after the goal flag no longer count.
    assert!(completed.total_evaluations <= 6 * result.best_by_generation.len() as u64);
}

#[test]
fn evaluations_limit_bounds_the_run() {
    let mut cfg = target_config(6, 50);
    cfg.elite_count = 2;
    cfg.evaluations_limit = 13;
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    let result = monitor
        .run(&ctx, linear_population(&[-1.0, -0.8, -0.6, -0.4, -0.2, 0.0]))
        .unwrap();
    // 6 evaluations per generation; the limit of 13 is crossed in gen 3.
    assert_eq!(result.best_by_generation.len(), 3);
}

#[test]
fn best_accessor_returns_the_top_genome() {
    let mut cfg = target_config(4, 3);
    cfg.elite_count = 1;
    let mut monitor = PopulationMonitor::new(cfg).unwrap();
    let ctx = CancelToken::new();
    let result = monitor
        .run(&ctx, linear_population(&[0.0, 0.4, 0.8, 1.0]))
        .unwrap();
    let best = result.best().unwrap();
    assert!(result
        .final_population
        .iter()
        .all(|member| member.fitness <= best.fitness));
}
