//! OData plumbing: query modifiers, envelope normalization, response helpers

pub mod mods;
pub mod normalize;
pub mod response;

pub use mods::{ODataMods, to_url};
pub use normalize::{
    collection_next_page_url, is_collection, normalize_odata_collection, normalize_odata_item,
    parse_odata_collection, patch_metadata_type,
};
pub use response::ApiResponse;
