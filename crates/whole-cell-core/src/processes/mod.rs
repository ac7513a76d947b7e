//! Small collaborator processes: enough biology-shaped behaviour to drive the
//! engine, with no claim to fidelity.

pub mod accumulator;
pub mod bulk_consumer;
pub mod mass_listener;
pub mod protein_degradation;
pub mod ribosome_initiation;
pub mod tetracycline;
pub mod toy_cell;

pub use accumulator::Accumulator;
pub use bulk_consumer::BulkConsumer;
pub use mass_listener::MassListener;
pub use protein_degradation::{ProteinDegradation, ProteinDegradationParams};
pub use ribosome_initiation::RibosomeInitiation;
pub use tetracycline::TetracyclineEquilibrium;
pub use toy_cell::{NutrientUptake, ToyCell, ToyCellParams};

use crate::constants::{
    CHILD_DOMAINS, DOMAIN_INDEX, IS_FULL_TRANSCRIPT, MRNA_INDEX, RNAP_INDEX, SUBMASS_WIDTH,
};
use crate::division::UniqueDivider;
use crate::schema::CollectionSchema;
use crate::store::{ColumnKind, ColumnSpec};

pub const CHROMOSOME_DOMAIN: &str = "chromosome_domain";
pub const ACTIVE_RNAP: &str = "active_RNAP";
pub const RNA: &str = "RNA";
pub const ACTIVE_RIBOSOME: &str = "active_ribosome";

/// Column holding a row's mass fractions.
pub const SUBMASS: &str = "submass";

fn submass() -> ColumnSpec {
    ColumnSpec::new(SUBMASS, ColumnKind::Vector(SUBMASS_WIDTH))
}

pub fn domain_collection() -> CollectionSchema {
    CollectionSchema {
        columns: vec![
            ColumnSpec::new(DOMAIN_INDEX, ColumnKind::Int),
            ColumnSpec::new(CHILD_DOMAINS, ColumnKind::IntVector(2)),
        ],
        divider: UniqueDivider::Domain,
        emit: true,
    }
}

pub fn rnap_collection() -> CollectionSchema {
    CollectionSchema {
        columns: vec![ColumnSpec::new(DOMAIN_INDEX, ColumnKind::Int), submass()],
        divider: UniqueDivider::ByDomain,
        emit: true,
    }
}

pub fn rna_collection() -> CollectionSchema {
    CollectionSchema {
        columns: vec![
            ColumnSpec::new(RNAP_INDEX, ColumnKind::Int),
            ColumnSpec::new(IS_FULL_TRANSCRIPT, ColumnKind::Bool),
            submass(),
        ],
        divider: UniqueDivider::RnaByDomain {
            rnap_collection: ACTIVE_RNAP.to_string(),
        },
        emit: true,
    }
}

pub fn ribosome_collection() -> CollectionSchema {
    CollectionSchema {
        columns: vec![
            ColumnSpec::new(MRNA_INDEX, ColumnKind::Int),
            ColumnSpec::new("peptide_length", ColumnKind::Int),
            submass(),
        ],
        divider: UniqueDivider::Ribosomes {
            rna_collection: RNA.to_string(),
            rnap_collection: ACTIVE_RNAP.to_string(),
        },
        emit: true,
    }
}
