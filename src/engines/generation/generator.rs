use super::pool::{CircularSet, PoolMap};
use crate::config::FuzzingConfig;
use crate::error::{FuzzerError, Result};
use crate::types::{
    mask_bits, sign_extend, AbiType, AddressValues, Field, FunctionId, Gene, Interface,
    InterfaceMapper, Target, Value,
};
use alloy_primitives::{Address, I256, U256};
use rand::seq::SliceRandom;
use rand::Rng;

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub ring_buffer_length: usize,
    pub max_array_length: usize,
    pub gas_limit: u64,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self::from(&FuzzingConfig::default())
    }
}

impl From<&FuzzingConfig> for GeneratorSettings {
    fn from(config: &FuzzingConfig) -> Self {
        Self {
            ring_buffer_length: config.ring_buffer_length,
            max_array_length: config.max_array_length,
            gas_limit: config.gas_limit,
        }
    }
}

/// Everything the fuzzer needs to know about one contract under test.
#[derive(Debug, Clone, Default)]
pub struct ContractSpec {
    pub name: String,
    pub interface: Interface,
    pub interface_mapper: InterfaceMapper,
    /// Init code; empty when the contract is already deployed.
    pub bytecode: Vec<u8>,
    pub address: Option<Address>,
}

impl ContractSpec {
    /// Build an interface from Solidity signatures such as
    /// `transfer(address,uint256)`, `constructor(uint256)` or `fallback()`.
    pub fn from_signatures<'a, I>(name: &str, signatures: I, bytecode: Vec<u8>) -> Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut interface = Interface::new();
        let mut interface_mapper = InterfaceMapper::new();

        for signature in signatures {
            let signature = signature.trim();
            let open = signature.find('(').ok_or_else(|| {
                FuzzerError::Configuration(format!("malformed signature `{}`", signature))
            })?;
            let close = signature.rfind(')').ok_or_else(|| {
                FuzzerError::Configuration(format!("malformed signature `{}`", signature))
            })?;
            let function_name = &signature[..open];
            let params = &signature[open + 1..close];
            let types = if params.trim().is_empty() {
                Vec::new()
            } else {
                params
                    .split(',')
                    .map(str::parse::<AbiType>)
                    .collect::<Result<Vec<_>>>()?
            };

            let id = match function_name {
                "constructor" => FunctionId::Constructor,
                "fallback" | "receive" => FunctionId::Fallback,
                _ => FunctionId::from_signature(signature),
            };
            interface.insert(id, types);
            if id != FunctionId::Constructor {
                interface_mapper.insert(signature.to_string(), id);
            }
        }

        Ok(Self {
            name: name.to_string(),
            interface,
            interface_mapper,
            bytecode,
            address: None,
        })
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = Some(address);
        self
    }
}

/// Per-contract source of genes, backed by value pools that analysis and
/// constraint solving keep refilling.
#[derive(Debug, Clone)]
pub struct Generator {
    spec: ContractSpec,
    accounts: Vec<Address>,
    settings: GeneratorSettings,
    functions: CircularSet<FunctionId>,
    accounts_pool: PoolMap<FunctionId, Address>,
    amounts_pool: PoolMap<FunctionId, U256>,
    gaslimits_pool: PoolMap<FunctionId, u64>,
    timestamps_pool: PoolMap<FunctionId, U256>,
    blocknumbers_pool: PoolMap<FunctionId, U256>,
    balances_pool: PoolMap<FunctionId, U256>,
    callresults_pool: PoolMap<(FunctionId, Address), U256>,
    extcodesizes_pool: PoolMap<(FunctionId, Address), U256>,
    returndatasizes_pool: PoolMap<(FunctionId, Address), U256>,
    arguments_pool: PoolMap<(FunctionId, usize), Value>,
    array_sizes_pool: PoolMap<(FunctionId, usize), usize>,
    strings_pool: CircularSet<String>,
    bytes_pool: CircularSet<Vec<u8>>,
}

const SEED_LENGTHS: [usize; 4] = [0, 1, 32, 33];

impl Generator {
    pub fn new(spec: ContractSpec, accounts: Vec<Address>, settings: GeneratorSettings) -> Result<Self> {
        if accounts.is_empty() {
            return Err(FuzzerError::Configuration(format!(
                "Generator for {} needs at least one account",
                spec.name
            )));
        }

        let callable: Vec<FunctionId> = spec
            .interface
            .keys()
            .copied()
            .filter(|f| *f != FunctionId::Constructor)
            .collect();
        let capacity = settings.ring_buffer_length;

        Ok(Self {
            functions: CircularSet::with_values(callable.len().max(1), callable),
            accounts_pool: PoolMap::new(capacity),
            amounts_pool: PoolMap::new(capacity),
            gaslimits_pool: PoolMap::new(capacity),
            timestamps_pool: PoolMap::new(capacity),
            blocknumbers_pool: PoolMap::new(capacity),
            balances_pool: PoolMap::new(capacity),
            callresults_pool: PoolMap::new(capacity),
            extcodesizes_pool: PoolMap::new(capacity),
            returndatasizes_pool: PoolMap::new(capacity),
            arguments_pool: PoolMap::new(capacity),
            array_sizes_pool: PoolMap::new(capacity),
            strings_pool: CircularSet::with_values(
                capacity,
                SEED_LENGTHS.iter().map(|n| "A".repeat(*n)),
            ),
            bytes_pool: CircularSet::with_values(
                capacity,
                SEED_LENGTHS.iter().map(|n| vec![0x41u8; *n]),
            ),
            spec,
            accounts,
            settings,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn interface(&self) -> &Interface {
        &self.spec.interface
    }

    pub fn interface_mapper(&self) -> &InterfaceMapper {
        &self.spec.interface_mapper
    }

    pub fn bytecode(&self) -> &[u8] {
        &self.spec.bytecode
    }

    pub fn contract_address(&self) -> Option<Address> {
        self.spec.address
    }

    pub fn accounts(&self) -> &[Address] {
        &self.accounts
    }

    pub fn has_function(&self, function: &FunctionId) -> bool {
        self.spec.interface.contains_key(function)
    }

    pub fn argument_types(&self, function: &FunctionId) -> Option<&[AbiType]> {
        self.spec.interface.get(function).map(Vec::as_slice)
    }

    /// Next function in round-robin order; never the constructor.
    pub fn get_random_function_with_argument_types(&mut self) -> Option<(FunctionId, Vec<AbiType>)> {
        let function = self.functions.head_and_rotate()?;
        let types = self.spec.interface.get(&function)?.clone();
        Some((function, types))
    }

    /// Look a function up by bare name, ignoring its parameter list.
    pub fn function_by_name(&self, name: &str) -> Option<(FunctionId, Vec<AbiType>)> {
        self.spec
            .interface_mapper
            .iter()
            .find(|(signature, _)| signature.split('(').next() == Some(name))
            .and_then(|(_, id)| {
                self.spec
                    .interface
                    .get(id)
                    .map(|types| (*id, types.clone()))
            })
    }

    pub fn generate_constructor<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<Gene> {
        let Some(types) = self.spec.interface.get(&FunctionId::Constructor).cloned() else {
            return Vec::new();
        };
        if self.spec.bytecode.is_empty() {
            return Vec::new();
        }

        let function = FunctionId::Constructor;
        let arguments = types
            .iter()
            .enumerate()
            .map(|(index, ty)| self.get_random_argument(ty, function, index, rng))
            .collect();

        vec![Gene {
            account: self.get_random_account(function, rng),
            contract: Some(Target::Deploy(self.spec.bytecode.clone())),
            amount: self.get_random_amount(function, rng),
            function,
            arguments,
            gaslimit: self.get_random_gaslimit(function),
            blocknumber: Field::from(self.get_random_blocknumber(function)),
            timestamp: Field::from(self.get_random_timestamp(function)),
            balance: Field::Absent,
            call_return: None,
            extcodesize: None,
            returndatasize: Some(AddressValues::new()),
        }]
    }

    pub fn generate_individual<R: Rng + ?Sized>(
        &mut self,
        function: FunctionId,
        argument_types: &[AbiType],
        rng: &mut R,
    ) -> Vec<Gene> {
        let arguments = argument_types
            .iter()
            .enumerate()
            .map(|(index, ty)| self.get_random_argument(ty, function, index, rng))
            .collect();

        let stub = |entry: Option<(Address, U256)>| {
            let mut values = AddressValues::new();
            if let Some((address, value)) = entry {
                values.insert(address, value);
            }
            Some(values)
        };

        vec![Gene {
            account: self.get_random_account(function, rng),
            contract: self.spec.address.map(Target::Call),
            amount: self.get_random_amount(function, rng),
            function,
            arguments,
            gaslimit: self.get_random_gaslimit(function),
            blocknumber: Field::from(self.get_random_blocknumber(function)),
            timestamp: Field::from(self.get_random_timestamp(function)),
            balance: Field::Absent,
            call_return: stub(self.get_random_callresult_and_address(function, rng)),
            extcodesize: stub(self.get_random_extcodesize_and_address(function, rng)),
            returndatasize: stub(self.get_random_returndatasize_and_address(function, rng)),
        }]
    }

    pub fn generate_random_individual_without_constructor<R: Rng + ?Sized>(
        &mut self,
        function: Option<(FunctionId, Vec<AbiType>)>,
        rng: &mut R,
    ) -> Vec<Gene> {
        match function.or_else(|| self.get_random_function_with_argument_types()) {
            Some((function, types)) => self.generate_individual(function, &types, rng),
            None => Vec::new(),
        }
    }

    /// Constructor (when deployable) followed by one call.
    pub fn generate_random_individual<R: Rng + ?Sized>(
        &mut self,
        function: Option<(FunctionId, Vec<AbiType>)>,
        rng: &mut R,
    ) -> Vec<Gene> {
        let mut genes = self.generate_constructor(rng);
        genes.extend(self.generate_random_individual_without_constructor(function, rng));
        genes
    }

    // Environment pools

    pub fn add_timestamp_to_pool(&mut self, function: FunctionId, timestamp: U256) {
        self.timestamps_pool.add(function, timestamp);
    }

    pub fn remove_timestamp_from_pool(&mut self, function: FunctionId, timestamp: U256) {
        self.timestamps_pool.remove(&function, &timestamp);
    }

    pub fn get_random_timestamp(&mut self, function: FunctionId) -> Option<U256> {
        self.timestamps_pool.get_random(&function)
    }

    pub fn add_blocknumber_to_pool(&mut self, function: FunctionId, blocknumber: U256) {
        self.blocknumbers_pool.add(function, blocknumber);
    }

    pub fn remove_blocknumber_from_pool(&mut self, function: FunctionId, blocknumber: U256) {
        self.blocknumbers_pool.remove(&function, &blocknumber);
    }

    pub fn get_random_blocknumber(&mut self, function: FunctionId) -> Option<U256> {
        self.blocknumbers_pool.get_random(&function)
    }

    pub fn add_balance_to_pool(&mut self, function: FunctionId, balance: U256) {
        self.balances_pool.add(function, balance);
    }

    pub fn remove_balance_from_pool(&mut self, function: FunctionId, balance: U256) {
        self.balances_pool.remove(&function, &balance);
    }

    pub fn get_random_balance(&mut self, function: FunctionId) -> Option<U256> {
        self.balances_pool.get_random(&function)
    }

    pub fn add_gaslimit_to_pool(&mut self, function: FunctionId, gaslimit: u64) {
        self.gaslimits_pool.add(function, gaslimit);
    }

    pub fn remove_gaslimit_from_pool(&mut self, function: FunctionId, gaslimit: u64) {
        self.gaslimits_pool.remove(&function, &gaslimit);
    }

    pub fn get_random_gaslimit(&mut self, function: FunctionId) -> u64 {
        self.gaslimits_pool
            .get_random(&function)
            .unwrap_or(self.settings.gas_limit)
    }

    pub fn add_account_to_pool(&mut self, function: FunctionId, account: Address) {
        self.accounts_pool.add(function, account);
    }

    pub fn remove_account_from_pool(&mut self, function: FunctionId, account: Address) {
        self.accounts_pool.remove(&function, &account);
    }

    pub fn get_random_account<R: Rng + ?Sized>(&mut self, function: FunctionId, rng: &mut R) -> Address {
        if let Some(account) = self.accounts_pool.get_random(&function) {
            return account;
        }
        self.accounts
            .choose(rng)
            .copied()
            .unwrap_or(Address::ZERO)
    }

    pub fn add_amount_to_pool(&mut self, function: FunctionId, amount: U256) {
        self.amounts_pool.add(function, amount);
    }

    pub fn remove_amount_from_pool(&mut self, function: FunctionId, amount: U256) {
        self.amounts_pool.remove(&function, &amount);
    }

    /// Pooled amount, or a fresh 0/1 draw that also seeds the pool with both.
    pub fn get_random_amount<R: Rng + ?Sized>(&mut self, function: FunctionId, rng: &mut R) -> U256 {
        if let Some(amount) = self.amounts_pool.get_random(&function) {
            return amount;
        }
        let amount = rng.gen_range(0..=1u64);
        self.add_amount_to_pool(function, U256::from(amount));
        self.add_amount_to_pool(function, U256::from(1 - amount));
        U256::from(amount)
    }

    // Per-address stubs

    pub fn add_callresult_to_pool(&mut self, function: FunctionId, address: Address, result: U256) {
        self.callresults_pool.add((function, address), result);
    }

    pub fn remove_callresult_from_pool(&mut self, function: FunctionId, address: Address, result: U256) {
        self.callresults_pool.remove(&(function, address), &result);
    }

    pub fn get_random_callresult(&mut self, function: FunctionId, address: Address) -> Option<U256> {
        self.callresults_pool.get_random(&(function, address))
    }

    pub fn get_random_callresult_and_address<R: Rng + ?Sized>(
        &mut self,
        function: FunctionId,
        rng: &mut R,
    ) -> Option<(Address, U256)> {
        random_keyed_entry(&mut self.callresults_pool, function, rng)
    }

    pub fn add_extcodesize_to_pool(&mut self, function: FunctionId, address: Address, size: U256) {
        self.extcodesizes_pool.add((function, address), size);
    }

    pub fn remove_extcodesize_from_pool(&mut self, function: FunctionId, address: Address, size: U256) {
        self.extcodesizes_pool.remove(&(function, address), &size);
    }

    pub fn get_random_extcodesize(&mut self, function: FunctionId, address: Address) -> Option<U256> {
        self.extcodesizes_pool.get_random(&(function, address))
    }

    pub fn get_random_extcodesize_and_address<R: Rng + ?Sized>(
        &mut self,
        function: FunctionId,
        rng: &mut R,
    ) -> Option<(Address, U256)> {
        random_keyed_entry(&mut self.extcodesizes_pool, function, rng)
    }

    pub fn add_returndatasize_to_pool(&mut self, function: FunctionId, address: Address, size: U256) {
        self.returndatasizes_pool.add((function, address), size);
    }

    pub fn remove_returndatasize_from_pool(&mut self, function: FunctionId, address: Address, size: U256) {
        self.returndatasizes_pool.remove(&(function, address), &size);
    }

    pub fn get_random_returndatasize(&mut self, function: FunctionId, address: Address) -> Option<U256> {
        self.returndatasizes_pool.get_random(&(function, address))
    }

    pub fn get_random_returndatasize_and_address<R: Rng + ?Sized>(
        &mut self,
        function: FunctionId,
        rng: &mut R,
    ) -> Option<(Address, U256)> {
        random_keyed_entry(&mut self.returndatasizes_pool, function, rng)
    }

    // Arguments

    pub fn add_parameter_array_size(&mut self, function: FunctionId, index: usize, size: usize) {
        let size = size.min(self.settings.max_array_length);
        self.array_sizes_pool.add((function, index), size);
    }

    pub fn remove_parameter_array_size_from_pool(&mut self, function: FunctionId, index: usize, size: usize) {
        self.array_sizes_pool.remove(&(function, index), &size);
    }

    /// Arrays are pooled element-wise.
    pub fn add_argument_to_pool(&mut self, function: FunctionId, index: usize, argument: Value) {
        match argument {
            Value::Array { elements, .. } => {
                for element in elements {
                    self.add_argument_to_pool(function, index, element);
                }
            }
            other => self.arguments_pool.add((function, index), other),
        }
    }

    pub fn remove_argument_from_pool(&mut self, function: FunctionId, index: usize, argument: &Value) {
        match argument {
            Value::Array { elements, .. } => {
                for element in elements {
                    self.remove_argument_from_pool(function, index, element);
                }
            }
            other => self.arguments_pool.remove(&(function, index), other),
        }
    }

    pub fn pooled_arguments(&self, function: FunctionId, index: usize) -> Vec<Value> {
        self.arguments_pool
            .get(&(function, index))
            .map(|pool| pool.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn add_string_to_pool(&mut self, value: String) {
        self.strings_pool.add(value);
    }

    pub fn add_bytes_to_pool(&mut self, value: Vec<u8>) {
        self.bytes_pool.add(value);
    }

    pub fn get_random_argument<R: Rng + ?Sized>(
        &mut self,
        ty: &AbiType,
        function: FunctionId,
        index: usize,
        rng: &mut R,
    ) -> Value {
        if !ty.is_array() {
            if let Some(value) = self.arguments_pool.get_random(&(function, index)) {
                return value;
            }
            return self.fresh_scalar(ty, rng);
        }

        let (element, dims) = ty.array_dimensions();
        let sizes = self.array_sizes(function, index, &dims, rng);
        let mut value = Value::Array {
            fixed: dims[0].is_some(),
            elements: (0..sizes[0])
                .map(|_| self.array_element(element, function, index, rng))
                .collect(),
        };
        // Outer dimensions replicate the inner array.
        for (dim, size) in dims.iter().zip(&sizes).skip(1) {
            value = Value::Array {
                fixed: dim.is_some(),
                elements: vec![value; *size],
            };
        }
        value
    }

    fn array_sizes<R: Rng + ?Sized>(
        &mut self,
        function: FunctionId,
        index: usize,
        dims: &[Option<usize>],
        rng: &mut R,
    ) -> Vec<usize> {
        let mut sizes = Vec::with_capacity(dims.len());
        for dim in dims {
            let size = match dim {
                Some(size) => *size,
                None => match self.array_sizes_pool.get_random(&(function, index)) {
                    Some(size) => size,
                    None => rng.gen_range(0..=self.settings.max_array_length),
                },
            };
            sizes.push(size);
        }
        sizes
    }

    fn array_element<R: Rng + ?Sized>(
        &mut self,
        element: &AbiType,
        function: FunctionId,
        index: usize,
        rng: &mut R,
    ) -> Value {
        match element {
            AbiType::String => Value::String("A".repeat(rng.gen_range(0..=self.settings.max_array_length))),
            AbiType::Bytes => Value::Bytes(random_bytes(rng.gen_range(0..=self.settings.max_array_length), rng)),
            _ => match self.arguments_pool.get_random(&(function, index)) {
                Some(value) => value,
                None => self.fresh_scalar(element, rng),
            },
        }
    }

    fn fresh_scalar<R: Rng + ?Sized>(&mut self, ty: &AbiType, rng: &mut R) -> Value {
        match ty {
            AbiType::Bool => Value::Bool(rng.gen()),
            AbiType::Uint(bits) => Value::Uint {
                bits: *bits,
                value: random_unsigned(*bits, rng),
            },
            AbiType::Int(bits) => Value::Int {
                bits: *bits,
                value: random_signed(*bits, rng),
            },
            AbiType::Address => Value::Address(
                self.accounts.choose(rng).copied().unwrap_or(Address::ZERO),
            ),
            AbiType::String => Value::String(self.strings_pool.head_and_rotate().unwrap_or_default()),
            AbiType::Bytes => Value::Bytes(self.bytes_pool.head_and_rotate().unwrap_or_default()),
            AbiType::FixedBytes(size) => Value::FixedBytes {
                size: *size,
                bytes: random_bytes(rng.gen_range(0..=*size), rng),
            },
            AbiType::Array { .. } => Value::Array {
                fixed: false,
                elements: Vec::new(),
            },
        }
    }
}

fn random_keyed_entry<R: Rng + ?Sized>(
    pool: &mut PoolMap<(FunctionId, Address), U256>,
    function: FunctionId,
    rng: &mut R,
) -> Option<(Address, U256)> {
    let addresses: Vec<Address> = pool
        .keys()
        .filter(|(f, _)| *f == function)
        .map(|(_, address)| *address)
        .collect();
    let address = *addresses.choose(rng)?;
    pool.get_random(&(function, address)).map(|value| (address, value))
}

pub fn random_word<R: Rng + ?Sized>(rng: &mut R) -> U256 {
    U256::from_limbs(rng.gen::<[u64; 4]>())
}

fn random_bytes<R: Rng + ?Sized>(len: usize, rng: &mut R) -> Vec<u8> {
    (0..len).map(|_| rng.gen()).collect()
}

/// A quarter of draws sit on each boundary of the type's range.
pub fn random_unsigned<R: Rng + ?Sized>(bits: usize, rng: &mut R) -> U256 {
    let max = mask_bits(U256::MAX, bits);
    let roll: f64 = rng.gen();
    if roll < 0.25 {
        U256::from(rng.gen_range(0..3u64))
    } else if roll < 0.5 {
        max - U256::from(rng.gen_range(0..3u64))
    } else {
        mask_bits(random_word(rng), bits)
    }
}

pub fn random_signed<R: Rng + ?Sized>(bits: usize, rng: &mut R) -> I256 {
    let max = I256::from_raw(mask_bits(U256::MAX, bits - 1));
    let min = I256::from_raw(!mask_bits(U256::MAX, bits - 1));
    let roll: f64 = rng.gen();
    if roll < 0.25 {
        [I256::ZERO, I256::MINUS_ONE, min, min.wrapping_add(I256::ONE)][rng.gen_range(0..4)]
    } else if roll < 0.5 {
        [I256::ZERO, I256::ONE, max, max.wrapping_sub(I256::ONE)][rng.gen_range(0..4)]
    } else {
        I256::from_raw(sign_extend(random_word(rng), bits))
    }
}
