pub mod commerce;
pub mod vector;

pub use commerce::{CommerceBackend, MedusaClient};
pub use vector::{SearchHit, SimilaritySearch, VectorIndexClient};
