//! # Tessera Engine
//!
//! Turns a plan, an optional event and prior state into a resolved node tree.
//!
//! [`PlanEngine::execute_plan`] runs the plan through the version gate,
//! transition application, manifest integrity verification, preflight, import
//! resolution, inline source execution and recursive node resolution, all
//! under one [`ExecutionFrame`] deadline.

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod frame;
pub mod imports;
pub mod preflight;
pub mod render_lock;
pub mod resolve;
pub mod script_loader;
pub mod template;

pub use collaborators::{ComponentFn, Export, ModuleLoader, ModuleNamespace, RenderBridge, SpecifierResolver, Transpiler};
pub use config::{EngineConfig, PreflightMode};
pub use engine::PlanEngine;
pub use frame::ExecutionFrame;
pub use imports::{host_permitted, ManifestImports};
pub use render_lock::{RenderGuard, RenderLockRegistry};
pub use script_loader::ScriptModuleLoader;
pub use template::{interpolate, interpolate_value, TemplateScope};
