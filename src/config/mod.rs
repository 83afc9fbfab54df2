//! Configuration: settings file, seed fallback, and precedence resolution.

mod hints;
mod resolver;
mod seed;
mod settings;

pub use hints::{Advisory, HintSheet};
pub use resolver::{ConfigResolver, KEY_ROUTING, KEY_TIERS, KEY_TOOL_MODE};
pub use seed::{RoleSeed, SeedConfig, SeedLookup, ToolMode};
pub use settings::{ForemanConfig, SeedPathConfig, StateConfig};
