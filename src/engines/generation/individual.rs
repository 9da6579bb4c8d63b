use super::generator_set::GeneratorId;
use crate::error::EncodeError;
use crate::types::{encode_arguments, FunctionId, Gene, Target, TestCase, Transaction, TxEnvironment, TxTarget};
use alloy_primitives::{hex, keccak256};

/// Decoded form of a chromosome. A gene that cannot be encoded keeps its
/// error in place so the remaining transactions still run.
pub type Solution = Vec<Result<TestCase, EncodeError>>;

/// A candidate transaction sequence.
///
/// The chromosome is only reachable for writing through [`Individual::update`],
/// which re-derives the solution and hash afterwards.
#[derive(Debug, Clone)]
pub struct Individual {
    chromosome: Vec<Gene>,
    solution: Solution,
    hash: String,
    generator: GeneratorId,
    from_cross: bool,
}

impl Individual {
    pub fn new(generator: GeneratorId, chromosome: Vec<Gene>) -> Self {
        let solution = Self::decode(&chromosome);
        let hash = chromosome_hash(&chromosome);
        Self {
            chromosome,
            solution,
            hash,
            generator,
            from_cross: false,
        }
    }

    pub fn from_cross(generator: GeneratorId, chromosome: Vec<Gene>) -> Self {
        let mut individual = Self::new(generator, chromosome);
        individual.from_cross = true;
        individual
    }

    pub fn chromosome(&self) -> &[Gene] {
        &self.chromosome
    }

    pub fn solution(&self) -> &Solution {
        &self.solution
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn generator(&self) -> GeneratorId {
        self.generator
    }

    pub fn is_from_cross(&self) -> bool {
        self.from_cross
    }

    pub fn len(&self) -> usize {
        self.chromosome.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chromosome.is_empty()
    }

    pub fn function_sequence(&self) -> Vec<FunctionId> {
        self.chromosome.iter().map(|gene| gene.function).collect()
    }

    /// Edit the chromosome in place; solution and hash are rebuilt afterwards.
    pub fn update<F>(&mut self, edit: F)
    where
        F: FnOnce(&mut Vec<Gene>),
    {
        edit(&mut self.chromosome);
        self.solution = Self::decode(&self.chromosome);
        self.hash = chromosome_hash(&self.chromosome);
    }

    /// Child carrying `chromosome` and this individual's generator.
    pub fn offspring(&self, chromosome: Vec<Gene>) -> Self {
        Self::new(self.generator, chromosome)
    }

    pub fn decode(chromosome: &[Gene]) -> Solution {
        chromosome.iter().map(decode_gene).collect()
    }
}

fn decode_gene(gene: &Gene) -> Result<TestCase, EncodeError> {
    let encoded = encode_arguments(&gene.arguments)?;

    let (to, data) = match &gene.contract {
        Some(Target::Deploy(init_code)) => {
            let mut data = init_code.clone();
            data.extend_from_slice(&encoded);
            (TxTarget::Create, data)
        }
        Some(Target::Call(address)) => (TxTarget::Call(*address), call_data(gene, encoded)),
        None => (TxTarget::Unresolved, call_data(gene, encoded)),
    };

    Ok(TestCase {
        transaction: Transaction {
            from: gene.account,
            to,
            value: gene.amount,
            gas_limit: gene.gaslimit,
            data,
        },
        environment: TxEnvironment {
            block_number: gene.blocknumber.value().copied(),
            timestamp: gene.timestamp.value().copied(),
            balance: gene.balance.value().copied(),
            call_return: gene.call_return.clone().unwrap_or_default(),
            extcodesize: gene.extcodesize.clone().unwrap_or_default(),
            returndatasize: gene.returndatasize.clone().unwrap_or_default(),
        },
    })
}

fn call_data(gene: &Gene, encoded: Vec<u8>) -> Vec<u8> {
    match gene.function {
        FunctionId::Selector(selector) => {
            let mut data = selector.to_vec();
            data.extend(encoded);
            data
        }
        FunctionId::Fallback => Vec::new(),
        FunctionId::Constructor => encoded,
    }
}

/// Content hash of a chromosome, used to deduplicate execution.
pub fn chromosome_hash(chromosome: &[Gene]) -> String {
    let serialized = serde_json::to_vec(chromosome).unwrap_or_default();
    hex::encode(keccak256(serialized))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Field, Value};
    use alloy_primitives::{Address, U256};

    fn transfer_gene(amount: u64) -> Gene {
        Gene {
            account: Address::repeat_byte(0x11),
            contract: None,
            amount: U256::from(amount),
            function: FunctionId::from_signature("transfer(address,uint256)"),
            arguments: vec![Value::Address(Address::repeat_byte(0x22)), Value::uint(256, 5)],
            gaslimit: 4_500_000,
            blocknumber: Field::Default,
            timestamp: Field::Value(U256::from(1_000u64)),
            balance: Field::Absent,
            call_return: Some(Default::default()),
            extcodesize: Some(Default::default()),
            returndatasize: Some(Default::default()),
        }
    }

    #[test]
    fn decode_is_deterministic() {
        let chromosome = vec![transfer_gene(0), transfer_gene(1)];
        assert_eq!(Individual::decode(&chromosome), Individual::decode(&chromosome));
        let a = Individual::new(GeneratorId(0), chromosome.clone());
        let b = Individual::new(GeneratorId(0), chromosome);
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn call_data_starts_with_selector() {
        let individual = Individual::new(GeneratorId(0), vec![transfer_gene(0)]);
        let test = individual.solution()[0].as_ref().unwrap();
        assert_eq!(&test.transaction.data[..4], &[0xa9, 0x05, 0x9c, 0xbb]);
        assert_eq!(test.transaction.data.len(), 4 + 64);
        assert_eq!(test.transaction.to, TxTarget::Unresolved);
        assert_eq!(test.environment.timestamp, Some(U256::from(1_000u64)));
        assert_eq!(test.environment.block_number, None);
    }

    #[test]
    fn bad_argument_only_fails_its_transaction() {
        let mut bad = transfer_gene(0);
        bad.arguments[1] = Value::Uint {
            bits: 8,
            value: U256::from(300u64),
        };
        let individual = Individual::new(GeneratorId(0), vec![bad, transfer_gene(0)]);
        assert!(individual.solution()[0].is_err());
        assert!(individual.solution()[1].is_ok());
    }

    #[test]
    fn update_refreshes_hash() {
        let mut individual = Individual::new(GeneratorId(0), vec![transfer_gene(0)]);
        let before = individual.hash().to_string();
        individual.update(|genes| genes[0].amount = U256::from(9u64));
        assert_ne!(individual.hash(), before);
        assert_eq!(
            individual.solution()[0].as_ref().unwrap().transaction.value,
            U256::from(9u64)
        );
    }
}
