pub mod footprint;
pub mod handles;
pub mod image;
