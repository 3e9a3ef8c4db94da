//! Bin-spec mini-language.
//!
//! A spec is a comma separated list of clauses, each clause a colon separated
//! list of fields:
//!
//! ```text
//! junk:str:8,randInt:int:200,range:i:10-20,color:blue,age:24
//! ```
//!
//! * `name:string|str|s:LEN` - random string of `LEN` ASCII letters
//! * `name:int|i:MAX` - random integer in `[0, MAX)`
//! * `name:int|i:MIN-MAX` - random integer in `[MIN, MAX)`
//! * `name:value` - literal, an integer when `value` parses as one
//!
//! Malformed clauses are dropped with a warning and never fail the whole
//! spec. Three-field clauses with an unknown kind are dropped silently.

use crate::core::{Result, Value, WorkloadError};
use crate::store::Operation;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

/// Letters random strings are drawn from.
pub const ALPHABET: &[u8; 52] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Spec used when a write is configured with an empty bin spec.
pub const DEFAULT_BIN_SPEC: &str = "num:123";

#[derive(Debug, Clone, PartialEq)]
pub enum BinKind {
    RandomString { len: usize },
    /// Uniform in `[min, max)`.
    RandomInt { min: i64, max: i64 },
    Literal(Value),
}

/// One parsed clause.
#[derive(Debug, Clone, PartialEq)]
pub struct BinSpec {
    pub name: String,
    pub kind: BinKind,
}

impl BinSpec {
    /// Parse a single clause.
    ///
    /// `Ok(None)` is the silent drop for an unrecognized generator kind.
    pub fn parse_clause(clause: &str) -> Result<Option<Self>> {
        let fields: Vec<&str> = clause.split(':').collect();
        match fields.as_slice() {
            [name, kind, param] => {
                let kind = match *kind {
                    "string" | "str" | "s" => {
                        let len = param.parse::<usize>().map_err(|_| {
                            WorkloadError::MalformedSpec(format!(
                                "string length '{}' is not a non-negative integer",
                                param
                            ))
                        })?;
                        BinKind::RandomString { len }
                    }
                    "int" | "i" => {
                        let (min, max) = parse_int_bounds(param)?;
                        BinKind::RandomInt { min, max }
                    }
                    _ => return Ok(None),
                };
                Ok(Some(Self {
                    name: name.to_string(),
                    kind,
                }))
            }
            [name, value] => {
                let literal = match value.parse::<i64>() {
                    Ok(i) => Value::Int(i),
                    Err(_) => Value::Str(value.to_string()),
                };
                Ok(Some(Self {
                    name: name.to_string(),
                    kind: BinKind::Literal(literal),
                }))
            }
            _ => Err(WorkloadError::MalformedSpec(format!(
                "expected 2 or 3 fields, found {}",
                fields.len()
            ))),
        }
    }

    /// Produce this clause's concrete value.
    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> CompiledOperation {
        let value = match &self.kind {
            BinKind::RandomString { len } => Value::Str(random_letters(rng, *len)),
            BinKind::RandomInt { min, max } => Value::Int(rng.gen_range(*min..*max)),
            BinKind::Literal(value) => value.clone(),
        };
        CompiledOperation {
            name: self.name.clone(),
            value,
        }
    }
}

fn parse_int_bounds(param: &str) -> Result<(i64, i64)> {
    let malformed = || WorkloadError::MalformedSpec(format!("invalid integer bounds '{}'", param));

    let bounds: Vec<&str> = param.split('-').collect();
    let (min, max) = match bounds.as_slice() {
        [max] => (0, max.parse::<i64>().map_err(|_| malformed())?),
        [min, max] => (
            min.parse::<i64>().map_err(|_| malformed())?,
            max.parse::<i64>().map_err(|_| malformed())?,
        ),
        _ => return Err(malformed()),
    };

    if max <= min {
        return Err(WorkloadError::MalformedSpec(format!(
            "empty integer range [{}, {})",
            min, max
        )));
    }
    Ok((min, max))
}

fn random_letters<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// A parsed spec, reusable across writes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinSpecs {
    clauses: Vec<BinSpec>,
}

impl BinSpecs {
    /// Parse `spec`, logging and skipping every malformed clause.
    pub fn parse(spec: &str) -> Self {
        let spec = if spec.is_empty() { DEFAULT_BIN_SPEC } else { spec };

        let mut clauses = Vec::new();
        for clause in spec.split(',') {
            match BinSpec::parse_clause(clause) {
                Ok(Some(parsed)) => clauses.push(parsed),
                Ok(None) => {}
                Err(err) => warn!(clause, error = %err, "ignoring bin"),
            }
        }
        Self { clauses }
    }

    pub fn clauses(&self) -> &[BinSpec] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn generate<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<CompiledOperation> {
        self.clauses.iter().map(|clause| clause.generate(rng)).collect()
    }
}

/// A field name bound to a concrete value, ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledOperation {
    pub name: String,
    pub value: Value,
}

impl CompiledOperation {
    pub fn into_operation(self) -> Operation {
        Operation::Put {
            bin: self.name,
            value: self.value,
        }
    }
}

/// RNG reseeded from the wall clock. Values it drives are not reproducible
/// across calls.
pub fn clock_rng() -> StdRng {
    let now = chrono::Utc::now();
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1_000));
    StdRng::seed_from_u64(nanos as u64)
}

/// Parse and generate in one step with a freshly clock-seeded RNG.
pub fn compile(spec: &str) -> Vec<CompiledOperation> {
    compile_with(spec, &mut clock_rng())
}

pub fn compile_with<R: Rng + ?Sized>(spec: &str, rng: &mut R) -> Vec<CompiledOperation> {
    BinSpecs::parse(spec).generate(rng)
}
