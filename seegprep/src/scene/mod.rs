//! Scene export for the downstream viewer.
//!
//! The descriptor skeleton is a Tera template whose six path/name slots are
//! filled from the final scans.

mod export;
mod template;

pub use export::{relative_path, SceneDescription, SceneExporter, SceneRole, SCENE_TEMPLATE};
pub use template::{escape_attribute, render_template, template_slots};
