pub mod model;
pub mod store;
pub mod updater;

pub use model::{ChromaKeyModel, ClassMap, ModelKind, NoModel, SegmentationModel, PERSON_CLASS};
pub use store::{Background, Mask, MaskStore};
pub use updater::{compute_mask, MaskSettings, MaskUpdater, TriggerOutcome};
