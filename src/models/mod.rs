pub mod anomaly;
pub mod learning;
pub mod notification;
pub mod pattern;
pub mod prediction;
pub mod rules;
pub mod scene;
pub mod schedule;
pub mod settings;
pub mod state_event;

pub use anomaly::*;
pub use learning::*;
pub use notification::*;
pub use pattern::*;
pub use prediction::*;
pub use rules::*;
pub use scene::*;
pub use schedule::*;
pub use settings::*;
pub use state_event::*;
