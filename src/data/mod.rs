mod concatenated;
pub use concatenated::ConcatenatedData;

mod dataset;
pub use dataset::{Dataset, ErrorBar, ErrorLayout, RawDataset};
