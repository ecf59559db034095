pub mod activations;
pub mod layers;
pub mod loss;
mod multimodal;
mod sequential;

pub use multimodal::{Fusion, MultimodalClassifier};
pub use sequential::Sequential;
