use super::generator::Generator;
use crate::types::{FunctionId, InterfaceMapper};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Index of a generator inside a [`GeneratorSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneratorId(pub usize);

/// Arena of the main contract's generator and its auxiliaries. Individuals
/// refer to their generator by id instead of holding a reference.
#[derive(Debug, Clone)]
pub struct GeneratorSet {
    generators: Vec<Generator>,
}

impl GeneratorSet {
    pub const MAIN: GeneratorId = GeneratorId(0);

    pub fn new(main: Generator, auxiliaries: Vec<Generator>) -> Self {
        let mut generators = Vec::with_capacity(auxiliaries.len() + 1);
        generators.push(main);
        generators.extend(auxiliaries);
        Self { generators }
    }

    pub fn main(&self) -> &Generator {
        &self.generators[0]
    }

    pub fn main_mut(&mut self) -> &mut Generator {
        &mut self.generators[0]
    }

    /// Falls back to the main generator for unknown ids.
    pub fn get(&self, id: GeneratorId) -> &Generator {
        self.generators.get(id.0).unwrap_or(&self.generators[0])
    }

    pub fn get_mut(&mut self, id: GeneratorId) -> &mut Generator {
        let index = if id.0 < self.generators.len() { id.0 } else { 0 };
        &mut self.generators[index]
    }

    pub fn ids(&self) -> impl Iterator<Item = GeneratorId> {
        (0..self.generators.len()).map(GeneratorId)
    }

    pub fn auxiliary_ids(&self) -> impl Iterator<Item = GeneratorId> {
        (1..self.generators.len()).map(GeneratorId)
    }

    pub fn len(&self) -> usize {
        self.generators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.generators.is_empty()
    }

    /// Generator that declares `function`, preferring `preferred` when
    /// several contracts share a selector.
    pub fn owner_of(&self, function: &FunctionId, preferred: GeneratorId) -> GeneratorId {
        if self.get(preferred).has_function(function) {
            return preferred;
        }
        self.ids()
            .find(|id| self.get(*id).has_function(function))
            .unwrap_or(preferred)
    }

    pub fn by_name(&self, name: &str) -> Option<GeneratorId> {
        self.ids().find(|id| self.get(*id).name() == name)
    }

    /// Contract name to signature map, across every contract.
    pub fn interface_mappers(&self) -> BTreeMap<String, InterfaceMapper> {
        self.generators
            .iter()
            .map(|g| (g.name().to_string(), g.interface_mapper().clone()))
            .collect()
    }
}
