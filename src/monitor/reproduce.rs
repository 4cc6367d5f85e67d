//! Next-generation construction: elite carry-over, species-proportional
//! offspring allocation, and the per-offspring mutation pipeline.

use std::collections::BTreeMap;

use rand::Rng;
use tracing::{debug, warn};

use crate::errors::{EvoError, EvoResult, MutationError};
use crate::genome::Genome;
use crate::lineage::EvoHistoryEvent;
use crate::monitor::{MonitorConfig, PopulationMonitor, ScoredGenome};
use crate::mutation::policy::TopologicalMutations;
use crate::mutation::{MutationContext, MutationOp};
use crate::scape::Morphology;

/// Allocates the remaining offspring slots across species in proportion to
/// mean fitness (shifted so the minimum is positive), using
/// largest-remainder apportionment so the allocations sum exactly to
/// `remaining`.
pub fn build_species_offspring_plan(
    ranked: &[ScoredGenome],
    species_by_genome_id: &BTreeMap<String, String>,
    remaining: usize,
) -> BTreeMap<String, usize> {
    let mut fitness_by_species: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for scored in ranked {
        if let Some(key) = species_by_genome_id.get(&scored.genome.id) {
            fitness_by_species.entry(key.clone()).or_default().push(scored.fitness);
        }
    }
    if fitness_by_species.is_empty() || remaining == 0 {
        return BTreeMap::new();
    }

    let means: Vec<(String, f64)> = fitness_by_species
        .into_iter()
        .map(|(key, fitnesses)| {
            let mean = fitnesses.iter().sum::<f64>() / fitnesses.len() as f64;
            (key, mean)
        })
        .collect();
    let min_mean = means.iter().map(|(_, m)| *m).fold(f64::INFINITY, f64::min);
    let shift = if min_mean <= 0.0 { 1e-9 - min_mean } else { 0.0 };
    let total: f64 = means.iter().map(|(_, m)| m + shift).sum();

    let mut plan: BTreeMap<String, usize> = BTreeMap::new();
    let mut remainders: Vec<(String, f64)> = Vec::new();
    let mut allocated = 0usize;
    for (key, mean) in &means {
        let exact = remaining as f64 * (mean + shift) / total;
        let base = exact.floor() as usize;
        allocated += base;
        plan.insert(key.clone(), base);
        remainders.push((key.clone(), exact - base as f64));
    }

    // Largest remainder first; ties resolve by key for determinism.
    remainders.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    let mut leftover = remaining - allocated;
    for (key, _) in remainders {
        if leftover == 0 {
            break;
        }
        *plan.entry(key).or_insert(0) += 1;
        leftover -= 1;
    }
    plan
}

fn mutation_context<'a>(
    cfg: &'a MonitorConfig,
    scape_name: &'a str,
    morphology: &'a dyn Morphology,
    generation: u64,
) -> MutationContext<'a> {
    MutationContext {
        scape_name,
        generation,
        input_neuron_ids: &cfg.input_neuron_ids,
        output_neuron_ids: &cfg.output_neuron_ids,
        feedforward_only: cfg.feedforward_only,
        max_weight_delta: cfg.max_weight_delta,
        activations: &cfg.activations,
        aggregators: &cfg.aggregators,
        plasticity_rules: &cfg.plasticity_rules,
        tuning_selections: &cfg.tuning_selections,
        annealing_factors: &cfg.annealing_factors,
        topological_modes: &cfg.topological_modes,
        heredity_types: &cfg.heredity_types,
        cpp_names: &cfg.cpp_names,
        cep_names: &cfg.cep_names,
        morphology,
    }
}

/// What the mutation pipeline produced for one offspring slot.
pub(crate) struct Offspring {
    pub genome: Genome,
    pub operations: Vec<String>,
    pub events: Vec<EvoHistoryEvent>,
}

impl PopulationMonitor {
    /// Trims the ranked pool per species to `specie_size_limit`, preserving
    /// overall rank inside each species. A limit of 0 keeps everything.
    fn parent_pool(
        &self,
        ranked: &[ScoredGenome],
        species_by_genome_id: &BTreeMap<String, String>,
    ) -> Vec<ScoredGenome> {
        if self.cfg.specie_size_limit == 0 {
            return ranked.to_vec();
        }
        let mut kept_per_species: BTreeMap<&String, usize> = BTreeMap::new();
        let mut pool = Vec::new();
        for scored in ranked {
            match species_by_genome_id.get(&scored.genome.id) {
                Some(key) => {
                    let kept = kept_per_species.entry(key).or_insert(0);
                    if *kept < self.cfg.specie_size_limit {
                        *kept += 1;
                        pool.push(scored.clone());
                    }
                }
                None => pool.push(scored.clone()),
            }
        }
        pool
    }

    fn pick_parent_from(
        &mut self,
        pool: &[ScoredGenome],
        generation: u64,
        species_by_genome_id: &BTreeMap<String, String>,
    ) -> EvoResult<Genome> {
        let elite = self.elite_count.min(pool.len()).max(1);
        let index = self.selector.pick_parent_with_species(
            &mut self.rng,
            pool,
            elite,
            generation,
            species_by_genome_id,
        )?;
        Ok(pool[index].genome.clone())
    }

    /// Runs the mutation pipeline for one offspring slot: clone the parent
    /// under a derived id, draw the mutation count, and keep applying
    /// operators until enough succeed or the retry budget runs out.
    pub(crate) fn mutate_offspring(
        &mut self,
        parent: &Genome,
        relative_generation: u64,
        slot: usize,
    ) -> EvoResult<Offspring> {
        let next_generation = self.cfg.generation_offset + relative_generation + 1;
        let child_id = format!("{}-g{}-i{}", parent.id, relative_generation + 1, slot);
        let mut child = parent.clone_as(child_id);

        // A genome-level strategy overrides the configured count policy.
        let count_policy = match &child.strategy {
            Some(strategy) => {
                TopologicalMutations::parse(&strategy.topological_mode, strategy.topological_param)
                    .unwrap_or_else(|_| self.cfg.topological_mutations.clone())
            }
            None => self.cfg.topological_mutations.clone(),
        };
        let wanted = count_policy.mutation_count(&child, next_generation, &mut self.rng);

        let policy = self
            .policy
            .clone()
            .ok_or_else(|| EvoError::Config("reproduction needs a mutation policy".to_string()))?;
        let budget = wanted * (4 + 4 * policy.len());

        let scape_name = self.scape.name().to_string();
        let mut operations: Vec<String> = Vec::new();
        let mut events: Vec<EvoHistoryEvent> = Vec::new();
        let mut applied = 0usize;
        let mut attempts = 0usize;

        while applied < wanted {
            attempts += 1;
            if attempts > budget {
                return Err(EvoError::MutationBudgetExhausted { wanted, attempts: attempts - 1 });
            }

            let ctx = mutation_context(
                &self.cfg,
                &scape_name,
                self.morphology.as_ref(),
                next_generation,
            );
            let mut label_suffix = "";
            let op: MutationOp =
                match policy.choose_applicable(&mut self.rng, &child, &ctx) {
                    Some(op) => op.clone(),
                    None => match &self.cfg.mutation {
                        Some(fallback) if fallback.applicable(&child, &ctx) => fallback.clone(),
                        // Last resort: the final policy operator, applied
                        // without an applicability check.
                        _ => policy.last().clone(),
                    },
                };

            let result = op.apply(&child, &ctx, &mut self.rng);
            let outcome = match result {
                Ok(outcome) => outcome,
                Err(MutationError::NoSynapses) | Err(MutationError::NoNeurons) => continue,
                Err(error) => {
                    // Policy operator failed outright; try the configured
                    // single operator before giving up on this attempt.
                    let Some(fallback) = self.cfg.mutation.clone() else {
                        if error.is_soft() {
                            continue;
                        }
                        return Err(error.into());
                    };
                    match fallback.apply(&child, &ctx, &mut self.rng) {
                        Ok(outcome) => {
                            label_suffix = "(fallback)";
                            warn!(
                                operator = op.name(),
                                fallback = fallback.name(),
                                "operator failed, fallback applied"
                            );
                            // The fallback's own name goes into lineage.
                            let fallback_label = format!("{}{}", fallback.name(), label_suffix);
                            if !self.accept_candidate(&scape_name, &child, &outcome, &fallback_label)
                            {
                                continue;
                            }
                            operations.push(fallback_label.clone());
                            events.push(EvoHistoryEvent {
                                mutation: fallback_label,
                                ids: outcome.touched.iter().cloned().collect(),
                            });
                            child = outcome.genome;
                            applied += 1;
                            continue;
                        }
                        Err(fallback_error) if fallback_error.is_soft() => continue,
                        Err(fallback_error) => return Err(fallback_error.into()),
                    }
                }
            };

            let label = format!("{}{}", op.name(), label_suffix);
            if !self.accept_candidate(&scape_name, &child, &outcome, &label) {
                continue;
            }
            operations.push(label.clone());
            events.push(EvoHistoryEvent {
                mutation: label,
                ids: outcome.touched.iter().cloned().collect(),
            });
            child = outcome.genome;
            applied += 1;
        }

        debug!(genome = %child.id, operations = ?operations, "offspring mutated");
        Ok(Offspring { genome: child, operations, events })
    }

    /// IO-compatibility gate plus (in debug builds) structural checks that
    /// the operator's reported change set matches the before/after diff.
    fn accept_candidate(
        &self,
        scape_name: &str,
        before: &Genome,
        outcome: &crate::mutation::MutationOutcome,
        label: &str,
    ) -> bool {
        #[cfg(debug_assertions)]
        {
            crate::genome::check_integrity(&outcome.genome)
                .unwrap_or_else(|e| panic!("{label} produced a broken genome: {e}"));
            let derived = crate::genome::diff::changed_ids(before, &outcome.genome);
            debug_assert_eq!(
                derived, outcome.touched,
                "{label} reported a change set that disagrees with the diff"
            );
        }
        #[cfg(not(debug_assertions))]
        {
            let _ = (before, label);
        }
        if !self
            .morphology
            .ensure_io_compatibility(scape_name, &outcome.genome)
        {
            debug!(operator = label, "candidate rejected as IO-incompatible");
            return false;
        }
        true
    }

    /// Generational reproduction: elites plus plan-allocated offspring.
    pub(crate) fn next_generation(
        &mut self,
        relative_generation: u64,
        ranked: &[ScoredGenome],
        species_by_genome_id: &BTreeMap<String, String>,
    ) -> EvoResult<Vec<Genome>> {
        let next_generation = self.cfg.generation_offset + relative_generation + 1;
        let population_size = self.cfg.population_size;
        let pool = self.parent_pool(ranked, species_by_genome_id);

        let mut next: Vec<Genome> = Vec::with_capacity(population_size);
        let mut next_histories: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for scored in ranked.iter().take(self.elite_count) {
            let elite = scored.genome.clone();
            self.stamp_lineage(
                &elite,
                Some(elite.id.clone()),
                next_generation,
                "elite_clone",
                Vec::new(),
            );
            next_histories.insert(
                elite.id.clone(),
                self.histories.get(&elite.id).cloned().unwrap_or_default(),
            );
            next.push(elite);
        }

        let remaining = population_size - next.len();
        let plan = build_species_offspring_plan(&pool, species_by_genome_id, remaining);

        let mut slot = 0usize;
        for (key, quota) in &plan {
            let subset: Vec<ScoredGenome> = pool
                .iter()
                .filter(|s| species_by_genome_id.get(&s.genome.id) == Some(key))
                .cloned()
                .collect();
            if subset.is_empty() {
                continue;
            }
            for _ in 0..*quota {
                let parent =
                    self.pick_parent_from(&subset, next_generation, species_by_genome_id)?;
                self.spawn_offspring(
                    &parent,
                    relative_generation,
                    slot,
                    &mut next,
                    &mut next_histories,
                )?;
                slot += 1;
            }
        }

        // All species exhausted (or the plan came up short): draw from the
        // full parent pool.
        while next.len() < population_size {
            let parent = self.pick_parent_from(&pool, next_generation, species_by_genome_id)?;
            self.spawn_offspring(
                &parent,
                relative_generation,
                slot,
                &mut next,
                &mut next_histories,
            )?;
            slot += 1;
        }

        self.histories = next_histories;
        debug_assert_eq!(next.len(), population_size);
        Ok(next)
    }

    fn spawn_offspring(
        &mut self,
        parent: &Genome,
        relative_generation: u64,
        slot: usize,
        next: &mut Vec<Genome>,
        next_histories: &mut BTreeMap<String, Vec<String>>,
    ) -> EvoResult<()> {
        let next_generation = self.cfg.generation_offset + relative_generation + 1;
        let parent_id = parent.id.clone();
        let offspring = self.mutate_offspring(parent, relative_generation, slot)?;
        let composite = offspring.operations.join("+");
        self.stamp_lineage(
            &offspring.genome,
            Some(parent_id.clone()),
            next_generation,
            &composite,
            offspring.events,
        );
        let mut history = self.histories.get(&parent_id).cloned().unwrap_or_default();
        history.extend(offspring.operations.iter().cloned());
        next_histories.insert(offspring.genome.id.clone(), history);
        next.push(offspring.genome);
        Ok(())
    }

    /// Steady-state reproduction: replace exactly one random member. The
    /// parent comes from the replaced genome's own species when that
    /// species has candidates in the pool, otherwise from the full pool.
    pub(crate) fn next_generation_steady_state(
        &mut self,
        relative_generation: u64,
        mut population: Vec<Genome>,
        ranked: &[ScoredGenome],
        species_by_genome_id: &BTreeMap<String, String>,
    ) -> EvoResult<Vec<Genome>> {
        let next_generation = self.cfg.generation_offset + relative_generation + 1;
        let index = self.rng.gen_range(0..population.len());
        let replaced_id = population[index].id.clone();

        let pool = self.parent_pool(ranked, species_by_genome_id);
        let replaced_species = species_by_genome_id.get(&replaced_id);
        let subset: Vec<ScoredGenome> = match replaced_species {
            Some(key) => pool
                .iter()
                .filter(|s| species_by_genome_id.get(&s.genome.id) == Some(key))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let source: &[ScoredGenome] = if subset.is_empty() { &pool } else { &subset };

        let parent = self.pick_parent_from(source, next_generation, species_by_genome_id)?;
        let parent_id = parent.id.clone();
        let offspring = self.mutate_offspring(&parent, relative_generation, index)?;
        let composite = offspring.operations.join("+");
        self.stamp_lineage(
            &offspring.genome,
            Some(parent_id.clone()),
            next_generation,
            &composite,
            offspring.events,
        );

        let mut history = self.histories.get(&parent_id).cloned().unwrap_or_default();
        history.extend(offspring.operations.iter().cloned());
        self.histories.remove(&replaced_id);
        self.histories.insert(offspring.genome.id.clone(), history);

        population[index] = offspring.genome;
        Ok(population)
    }
}
