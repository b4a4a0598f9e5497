//! Mod Resolver Library
//!
//! This library turns the mod list of a game-server deployment into editable
//! mod entries. It reads mod references out of a deployment's override blob,
//! looks them up in the mod catalog and evaluates each mod's configuration
//! script in a sandboxed Lua session to learn which options it declares.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mod_resolver::{ModResolver, ResolverConfig};
//!
//! # async fn example() -> mod_resolver::Result<()> {
//! // Reads MOD_CATALOG_URL and friends, with defaults
//! let config = ResolverConfig::from_env()?;
//! let resolver = ModResolver::from_config(&config)?;
//!
//! let blob = r#"return { ["workshop-378160973"] = { enabled = true } }"#;
//! let picked = resolver.resolve_existing_mods(blob).await?;
//!
//! for resolved in &picked {
//!     println!(
//!         "{} {} (options: {})",
//!         resolved.id(),
//!         resolved.metadata.title,
//!         if resolved.has_options() { "yes" } else { "no" }
//!     );
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Reference extraction**: `workshop-<digits>` ids, de-duplicated in blob order
//! - **Concurrent catalog lookups**: metadata and scripts fetched together
//! - **Sandboxed scripts**: memory, time and instruction budgets per script
//! - **Failure isolation**: a broken script only costs that mod its options
//! - **Observable state**: [`ModBoard`] publishes whole-state snapshots over `watch`
//! - **Cancellation**: runs abandoned by their view never write back

pub mod board;
pub mod catalog;
pub mod config;
pub mod core;
pub mod deploy;
pub mod extract;
pub mod pipeline;
pub mod script;

// Re-export commonly used types for convenience
pub use board::{BoardState, ModBoard};
pub use catalog::{HttpModCatalog, ModCatalog};
pub use config::{ResolverConfig, ResolverConfigBuilder, ScriptLimits, SessionPolicy};
pub use crate::core::{
    ConfigurationOptions, ModConfigScript, ModId, ModMetadata, PickedSet, ResolveError,
    ResolveStatus, ResolvedMod, Result, ScriptError,
};
pub use deploy::{Deploy, connect_command};
pub use extract::extract_mod_ids;
pub use pipeline::{ModResolver, ResolveMetrics, ResolveMetricsSnapshot};
pub use script::{LuaRuntime, ScriptEvaluator, ScriptRuntime, ScriptSession};
