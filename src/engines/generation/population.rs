use super::generator_set::GeneratorSet;
use super::individual::Individual;
use crate::error::{FuzzerError, Result};
use crate::types::FunctionId;
use rand::Rng;
use rayon::prelude::*;
use std::cmp::Ordering;

/// Fixed-size, even collection of individuals.
///
/// Statistics are recomputed from the supplied fitness function on every
/// call; nothing is cached here.
#[derive(Debug, Clone)]
pub struct Population {
    size: usize,
    individuals: Vec<Individual>,
}

impl Population {
    pub fn new(size: usize) -> Result<Self> {
        check_size(size)?;
        Ok(Self {
            size,
            individuals: Vec::with_capacity(size),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn len(&self) -> usize {
        self.individuals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.individuals.is_empty()
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    /// Fill the population with random sequences of the main contract.
    pub fn init_random<R: Rng + ?Sized>(&mut self, generators: &mut GeneratorSet, rng: &mut R) -> Result<()> {
        self.individuals.clear();
        while self.individuals.len() < self.size {
            let chromosome = generators.main_mut().generate_random_individual(None, rng);
            if chromosome.is_empty() {
                return Err(FuzzerError::Generation(format!(
                    "Contract {} has nothing to deploy or call",
                    generators.main().name()
                )));
            }
            self.individuals.push(Individual::new(GeneratorSet::MAIN, chromosome));
        }
        Ok(())
    }

    /// One individual per function of every contract, with pool defaults.
    /// The population takes the size of the result, rounded up to even.
    pub fn init_seeded<R: Rng + ?Sized>(&mut self, generators: &mut GeneratorSet, rng: &mut R) -> Result<()> {
        let mut individuals = Vec::new();
        let ids: Vec<_> = generators.ids().collect();
        for id in ids {
            let generator = generators.get_mut(id);
            let functions: Vec<_> = generator
                .interface()
                .iter()
                .filter(|(function, _)| **function != FunctionId::Constructor)
                .map(|(function, types)| (*function, types.clone()))
                .collect();
            for function in functions {
                let chromosome = generator.generate_random_individual(Some(function), rng);
                individuals.push(Individual::new(id, chromosome));
            }
        }
        if individuals.is_empty() {
            return Err(FuzzerError::Generation(
                "No contract exposes a callable function".to_string(),
            ));
        }
        if individuals.len() % 2 != 0 {
            let chromosome = generators.main_mut().generate_random_individual(None, rng);
            individuals.push(Individual::new(GeneratorSet::MAIN, chromosome));
        }
        self.size = individuals.len();
        self.individuals = individuals;
        Ok(())
    }

    /// Replace every individual at once; the count must match the size.
    pub fn init_with(&mut self, individuals: Vec<Individual>) -> Result<()> {
        if individuals.len() != self.size {
            return Err(FuzzerError::Configuration(format!(
                "Invalid individuals number: expected {}, got {}",
                self.size,
                individuals.len()
            )));
        }
        self.individuals = individuals;
        Ok(())
    }

    /// Swap the individual at `index`, used to inject cross-contract replays.
    pub fn replace(&mut self, index: usize, individual: Individual) -> Option<Individual> {
        let slot = self.individuals.get_mut(index)?;
        Some(std::mem::replace(slot, individual))
    }

    pub fn all_fits<F>(&self, fitness: F) -> Vec<f64>
    where
        F: Fn(&Individual) -> f64 + Sync,
    {
        self.individuals.par_iter().map(|individual| fitness(individual)).collect()
    }

    /// Individuals sorted by ascending fitness.
    pub fn ranked<F>(&self, fitness: F) -> Vec<&Individual>
    where
        F: Fn(&Individual) -> f64 + Sync,
    {
        let fits = self.all_fits(fitness);
        let mut order: Vec<usize> = (0..self.individuals.len()).collect();
        order.sort_by(|a, b| fits[*a].partial_cmp(&fits[*b]).unwrap_or(Ordering::Equal));
        order.into_iter().map(|i| &self.individuals[i]).collect()
    }

    pub fn best<F>(&self, fitness: F) -> Option<&Individual>
    where
        F: Fn(&Individual) -> f64 + Sync,
    {
        self.position_of(fitness, |a, b| a > b)
            .map(|i| &self.individuals[i])
    }

    pub fn worst<F>(&self, fitness: F) -> Option<&Individual>
    where
        F: Fn(&Individual) -> f64 + Sync,
    {
        self.position_of(fitness, |a, b| a < b)
            .map(|i| &self.individuals[i])
    }

    pub fn max<F>(&self, fitness: F) -> f64
    where
        F: Fn(&Individual) -> f64 + Sync,
    {
        self.all_fits(fitness).into_iter().fold(f64::NEG_INFINITY, f64::max)
    }

    pub fn min<F>(&self, fitness: F) -> f64
    where
        F: Fn(&Individual) -> f64 + Sync,
    {
        self.all_fits(fitness).into_iter().fold(f64::INFINITY, f64::min)
    }

    pub fn mean<F>(&self, fitness: F) -> f64
    where
        F: Fn(&Individual) -> f64 + Sync,
    {
        let fits = self.all_fits(fitness);
        if fits.is_empty() {
            return 0.0;
        }
        fits.iter().sum::<f64>() / fits.len() as f64
    }

    /// First index whose fitness wins every comparison.
    fn position_of<F, C>(&self, fitness: F, better: C) -> Option<usize>
    where
        F: Fn(&Individual) -> f64 + Sync,
        C: Fn(f64, f64) -> bool,
    {
        let fits = self.all_fits(fitness);
        let mut chosen: Option<usize> = None;
        for (index, fit) in fits.iter().enumerate() {
            match chosen {
                Some(current) if !better(*fit, fits[current]) => {}
                _ => chosen = Some(index),
            }
        }
        chosen
    }
}

fn check_size(size: usize) -> Result<()> {
    if size == 0 || size % 2 != 0 {
        return Err(FuzzerError::Configuration(format!(
            "Population size must be a positive even number, got {}",
            size
        )));
    }
    Ok(())
}
