/// Exclusive upper bound for seeds handed out to derived random streams.
pub const RAND_MAX: u64 = (1 << 31) - 1;

/// Unique indices are sampled uniformly from `[0, UNIQUE_INDEX_SPACE)`.
pub const UNIQUE_INDEX_SPACE: u64 = 1 << 63;

/// Smallest fraction by which a unique collection's arena grows when it runs out of free rows.
pub const MIN_GROWTH_FRACTION: f64 = 0.1;

/// Number of mass fractions tracked per unique row.
pub const SUBMASS_WIDTH: usize = 9;

/// Prime multiplier used to derive independent RNG streams from a base seed.
/// Chosen so streams for consecutive stream ids have minimal overlap.
pub const RNG_DERIVATION_PRIME: u64 = 7919;

/// Salt hashed with the cell seed when sampling a birth-time division threshold.
pub const DIVISION_SEED_SALT: &str = "CellDivision";

/// Column carrying the chromosome domain a unique row belongs to.
pub const DOMAIN_INDEX: &str = "domain_index";

/// Column listing a chromosome domain's children (`-1` marks an empty slot).
pub const CHILD_DOMAINS: &str = "child_domains";

/// Column on RNAs referencing the RNA polymerase transcribing them.
pub const RNAP_INDEX: &str = "rnap_index";

/// Column on ribosomes referencing the mRNA they translate.
pub const MRNA_INDEX: &str = "mrna_index";

/// Column flagging RNAs whose transcription has completed.
pub const IS_FULL_TRANSCRIPT: &str = "is_full_transcript";

/// Reserved column name exposing a row's unique index.
pub const UNIQUE_INDEX: &str = "unique_index";
