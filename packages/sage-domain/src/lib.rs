pub mod document;
pub mod event;
pub mod personality;
pub mod stage;
pub mod subquery;
pub mod text;
pub mod wire;

pub use document::{DocumentOrigin, WebSearchDocument};
pub use event::StageEvent;
pub use personality::Personality;
pub use stage::SearchAllStage;
