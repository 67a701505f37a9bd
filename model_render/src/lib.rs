#![allow(
    clippy::collapsible_if,
    clippy::derivable_impls,
    clippy::doc_lazy_continuation,
    clippy::needless_update,
    clippy::too_many_arguments,
    clippy::type_complexity
)]

pub mod animation;
pub mod lighting;
pub mod model;
pub mod object_runtime;
pub mod render;
pub mod settings;

pub use object_runtime::{ModelRenderPipeline, ModelRenderPlugin};
pub use settings::RenderSettings;
