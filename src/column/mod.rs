//! Binary column format: packed spans, palettes and column merging

pub mod datapoint;
pub mod id_table;
pub mod render_point;
pub mod merge;

pub use datapoint::{pack_light, Datapoint, DecodedDatapoint, ID_MASK, MAX_Y};
pub use id_table::{IdTable, MaterialKey, AIR};
pub use render_point::{simplify_column, RenderPoint};
pub use merge::{merge_column, ColumnSpan};
