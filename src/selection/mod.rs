//! Parent selection over a fitness-ranked, speciated population.
//!
//! Selectors are leaf components: they validate their inputs and never
//! touch monitor state. The trait is layered so a simple selector only
//! implements `pick_parent`; generation- and species-aware selectors
//! override the richer entry points, which default to the simpler ones.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::errors::{EvoError, EvoResult};
use crate::monitor::ScoredGenome;
use crate::postprocess::SIZE_PENALTY_EXPONENT;

fn validate(ranked: &[ScoredGenome], elite_count: usize) -> EvoResult<()> {
    if elite_count == 0 {
        return Err(EvoError::Selection("elite count must be positive".to_string()));
    }
    if elite_count > ranked.len() {
        return Err(EvoError::Selection(format!(
            "elite count {} exceeds population {}",
            elite_count,
            ranked.len()
        )));
    }
    Ok(())
}

/// Picks a parent index from `ranked` (sorted by fitness, best first).
pub trait Selector: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize>;

    /// Generation-aware entry point for annealing/stagnation selectors.
    fn pick_parent_for_generation(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
        _generation: u64,
    ) -> EvoResult<usize> {
        self.pick_parent(rng, ranked, elite_count)
    }

    /// Species-aware entry point; receives the monitor's assignment so a
    /// selector can enforce cross-species fairness without re-speciating.
    fn pick_parent_with_species(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
        generation: u64,
        _species_by_genome_id: &BTreeMap<String, String>,
    ) -> EvoResult<usize> {
        self.pick_parent_for_generation(rng, ranked, elite_count, generation)
    }
}

/// Uniform draw over the top `elite_count` entries.
#[derive(Debug, Default, Clone)]
pub struct Elite;

impl Selector for Elite {
    fn name(&self) -> &str {
        "elite"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        Ok(rng.gen_range(0..elite_count))
    }
}

/// Best of `tournament_size` draws from the top `pool_size`.
#[derive(Debug, Clone)]
pub struct Tournament {
    pub pool_size: usize,
    pub tournament_size: usize,
}

impl Tournament {
    pub fn new(pool_size: usize, tournament_size: usize) -> Self {
        Self { pool_size, tournament_size }
    }
}

impl Selector for Tournament {
    fn name(&self) -> &str {
        "tournament"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        let pool = self.pool_size.clamp(1, ranked.len());
        let rounds = self.tournament_size.max(1);
        // Lower index means higher fitness, so the tournament keeps the min.
        let mut best = rng.gen_range(0..pool);
        for _ in 1..rounds {
            best = best.min(rng.gen_range(0..pool));
        }
        Ok(best)
    }
}

/// Linear rank-weighted roulette over the whole population.
#[derive(Debug, Default, Clone)]
pub struct Rank;

impl Selector for Rank {
    fn name(&self) -> &str {
        "rank"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        let n = ranked.len();
        let total = (n * (n + 1) / 2) as f64;
        let mut pick = rng.gen_range(0.0..total);
        for index in 0..n {
            let weight = (n - index) as f64;
            if pick < weight {
                return Ok(index);
            }
            pick -= weight;
        }
        Ok(n - 1)
    }
}

/// Uniform draw over the whole population.
#[derive(Debug, Default, Clone)]
pub struct Random;

impl Selector for Random {
    fn name(&self) -> &str {
        "random"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        Ok(rng.gen_range(0..ranked.len()))
    }
}

/// Uniform draw over the top `k` by fitness.
#[derive(Debug, Clone)]
pub struct TopKFitness {
    pub k: usize,
}

impl TopKFitness {
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

impl Selector for TopKFitness {
    fn name(&self) -> &str {
        "top_k_fitness"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        let k = self.k.clamp(1, ranked.len());
        Ok(rng.gen_range(0..k))
    }
}

/// Samples a pool and keeps the candidate with the best
/// fitness-per-complexity score, biasing reproduction towards leaner
/// genomes.
#[derive(Debug, Clone)]
pub struct Efficiency {
    pub pool_size: usize,
}

impl Efficiency {
    pub fn new(pool_size: usize) -> Self {
        Self { pool_size }
    }
}

impl Selector for Efficiency {
    fn name(&self) -> &str {
        "efficiency"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        let rounds = self.pool_size.clamp(1, ranked.len());
        let score = |index: usize| {
            let entry = &ranked[index];
            entry.fitness / (entry.genome.complexity() as f64).powf(SIZE_PENALTY_EXPONENT)
        };
        let mut best = rng.gen_range(0..ranked.len());
        for _ in 1..rounds {
            let candidate = rng.gen_range(0..ranked.len());
            if score(candidate) > score(best) {
                best = candidate;
            }
        }
        Ok(best)
    }
}

fn indices_by_species(
    ranked: &[ScoredGenome],
    species_by_genome_id: &BTreeMap<String, String>,
) -> BTreeMap<String, Vec<usize>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (index, scored) in ranked.iter().enumerate() {
        if let Some(key) = species_by_genome_id.get(&scored.genome.id) {
            groups.entry(key.clone()).or_default().push(index);
        }
    }
    groups
}

/// Tournament over a pool stratified across species: one candidate from
/// each of at least two sampled species (when two exist), best fitness
/// wins.
#[derive(Debug, Clone)]
pub struct SpeciesTournament {
    pub species_sample: usize,
}

impl SpeciesTournament {
    pub fn new(species_sample: usize) -> Self {
        Self { species_sample }
    }
}

impl Selector for SpeciesTournament {
    fn name(&self) -> &str {
        "species_tournament"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        // Without an assignment there is nothing to stratify over.
        Tournament::new(ranked.len(), 2).pick_parent(rng, ranked, elite_count)
    }

    fn pick_parent_with_species(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
        _generation: u64,
        species_by_genome_id: &BTreeMap<String, String>,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        let groups = indices_by_species(ranked, species_by_genome_id);
        if groups.len() < 2 {
            return self.pick_parent(rng, ranked, elite_count);
        }
        let keys: Vec<&String> = groups.keys().collect();
        let sample = self.species_sample.clamp(2, keys.len());
        let chosen: Vec<&&String> = keys.choose_multiple(rng, sample).collect();
        let mut best: Option<usize> = None;
        for key in chosen {
            let members = &groups[*key];
            let candidate = members[rng.gen_range(0..members.len())];
            best = Some(match best {
                Some(current) if ranked[current].fitness >= ranked[candidate].fitness => current,
                _ => candidate,
            });
        }
        best.ok_or_else(|| EvoError::Selection("empty species sample".to_string()))
    }
}

#[derive(Debug, Default)]
struct StagnationState {
    /// Species key -> (best fitness seen, generation it last improved).
    best_seen: BTreeMap<String, (f64, u64)>,
}

/// Species are sampled in proportion to mean fitness (shifted positive),
/// then a two-member tournament runs inside the sampled species. With a
/// stagnation window, species whose best has not improved in that many
/// generations are excluded from the wheel (unless that empties it).
#[derive(Debug)]
pub struct SpeciesSharedTournament {
    pub stagnation_window: Option<u64>,
    state: Mutex<StagnationState>,
}

impl SpeciesSharedTournament {
    pub fn new(stagnation_window: Option<u64>) -> Self {
        Self {
            stagnation_window,
            state: Mutex::new(StagnationState::default()),
        }
    }
}

impl Selector for SpeciesSharedTournament {
    fn name(&self) -> &str {
        "species_shared_tournament"
    }

    fn pick_parent(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
    ) -> EvoResult<usize> {
        Tournament::new(ranked.len(), 2).pick_parent(rng, ranked, elite_count)
    }

    fn pick_parent_with_species(
        &self,
        rng: &mut StdRng,
        ranked: &[ScoredGenome],
        elite_count: usize,
        generation: u64,
        species_by_genome_id: &BTreeMap<String, String>,
    ) -> EvoResult<usize> {
        validate(ranked, elite_count)?;
        let groups = indices_by_species(ranked, species_by_genome_id);
        if groups.is_empty() {
            return self.pick_parent(rng, ranked, elite_count);
        }

        let mut stale: Vec<String> = Vec::new();
        {
            let mut state = self.state.lock().expect("selector state poisoned");
            for (key, members) in &groups {
                let best = members
                    .iter()
                    .map(|&i| ranked[i].fitness)
                    .fold(f64::NEG_INFINITY, f64::max);
                let entry = state
                    .best_seen
                    .entry(key.clone())
                    .or_insert((f64::NEG_INFINITY, generation));
                if best > entry.0 {
                    *entry = (best, generation);
                }
                if let Some(window) = self.stagnation_window {
                    if generation.saturating_sub(entry.1) > window {
                        stale.push(key.clone());
                    }
                }
            }
        }

        let mut wheel: Vec<(&String, f64, &Vec<usize>)> = groups
            .iter()
            .filter(|(key, _)| !stale.contains(key))
            .map(|(key, members)| {
                let mean =
                    members.iter().map(|&i| ranked[i].fitness).sum::<f64>() / members.len() as f64;
                (key, mean, members)
            })
            .collect();
        if wheel.is_empty() {
            // Everything stagnated; fall back to the full set.
            wheel = groups
                .iter()
                .map(|(key, members)| {
                    let mean = members.iter().map(|&i| ranked[i].fitness).sum::<f64>()
                        / members.len() as f64;
                    (key, mean, members)
                })
                .collect();
        }

        let min_mean = wheel.iter().map(|(_, mean, _)| *mean).fold(f64::INFINITY, f64::min);
        let shift = if min_mean <= 0.0 { 1e-9 - min_mean } else { 0.0 };
        let total: f64 = wheel.iter().map(|(_, mean, _)| mean + shift).sum();
        let mut pick = rng.gen_range(0.0..total);
        let mut selected = &wheel[wheel.len() - 1];
        for entry in &wheel {
            let weight = entry.1 + shift;
            if pick < weight {
                selected = entry;
                break;
            }
            pick -= weight;
        }

        let members = selected.2;
        let a = members[rng.gen_range(0..members.len())];
        let b = members[rng.gen_range(0..members.len())];
        Ok(if ranked[a].fitness >= ranked[b].fitness { a } else { b })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genome::Genome;
    use crate::scape::Trace;
    use rand::SeedableRng;

    fn ranked(fitnesses: &[f64]) -> Vec<ScoredGenome> {
        let inputs = vec!["i1".to_string()];
        let outputs = vec!["o1".to_string()];
        fitnesses
            .iter()
            .enumerate()
            .map(|(i, &fitness)| ScoredGenome {
                genome: Genome::linear(format!("g{i}"), &inputs, &outputs, 0.1),
                fitness,
                trace: Trace::new(),
            })
            .collect()
    }

    #[test]
    fn selectors_reject_bad_elite_counts() {
        let population = ranked(&[3.0, 2.0, 1.0]);
        let mut rng = StdRng::seed_from_u64(1);
        assert!(Elite.pick_parent(&mut rng, &population, 0).is_err());
        assert!(Elite.pick_parent(&mut rng, &population, 4).is_err());
        assert!(Rank.pick_parent(&mut rng, &population, 4).is_err());
    }

    #[test]
    fn elite_only_draws_from_the_top() {
        let population = ranked(&[5.0, 4.0, 3.0, 2.0]);
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..64 {
            let index = Elite.pick_parent(&mut rng, &population, 2).unwrap();
            assert!(index < 2);
        }
    }

    #[test]
    fn species_tournament_spans_two_species() {
        let population = ranked(&[5.0, 4.0, 3.0, 2.0]);
        let mut species = BTreeMap::new();
        species.insert("g0".to_string(), "s0".to_string());
        species.insert("g1".to_string(), "s0".to_string());
        species.insert("g2".to_string(), "s1".to_string());
        species.insert("g3".to_string(), "s1".to_string());
        let selector = SpeciesTournament::new(2);
        let mut rng = StdRng::seed_from_u64(3);
        let mut saw_species_one = false;
        for _ in 0..128 {
            let index = selector
                .pick_parent_with_species(&mut rng, &population, 1, 0, &species)
                .unwrap();
            if index >= 2 {
                saw_species_one = true;
            }
        }
        // Stratification keeps the weaker species in play.
        assert!(saw_species_one);
    }

    #[test]
    fn shared_tournament_prefers_fitter_species() {
        let population = ranked(&[10.0, 9.0, 0.1, 0.05]);
        let mut species = BTreeMap::new();
        species.insert("g0".to_string(), "a".to_string());
        species.insert("g1".to_string(), "a".to_string());
        species.insert("g2".to_string(), "b".to_string());
        species.insert("g3".to_string(), "b".to_string());
        let selector = SpeciesSharedTournament::new(None);
        let mut rng = StdRng::seed_from_u64(11);
        let mut from_a = 0;
        for _ in 0..256 {
            let index = selector
                .pick_parent_with_species(&mut rng, &population, 1, 0, &species)
                .unwrap();
            if index < 2 {
                from_a += 1;
            }
        }
        assert!(from_a > 180, "species a picked {from_a}/256 times");
    }
}
