pub mod circle;
pub mod encoding;
pub mod eye;
pub mod hamming;
pub mod iris_eye;
pub mod resources;
pub mod rubber_sheet;
pub mod segmentation;
pub mod utils;
