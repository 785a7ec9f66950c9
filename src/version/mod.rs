// Version handling: normalization, ordering and recommended selection

pub mod normalize;
pub mod selector;

pub use normalize::{Version, is_stable, normalize, normalize_all, strip_prefixes};
pub use selector::{SelectionPolicy, group_by_major, select};
