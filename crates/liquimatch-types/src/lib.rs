//! # liquimatch-types
//!
//! Shared types, errors, and configuration for the **Liquimatch** engine.
//!
//! This crate is the leaf dependency of the workspace. It defines:
//!
//! - **Quantities**: [`Symbol`], [`Asset`], [`Price`] and the `u128` helpers in [`math`]
//! - **Identifiers**: [`AccountName`], [`OrderId`], [`OpId`]
//! - **Order model**: [`LimitOrder`], [`MarginOrder`], [`CallOrder`], [`ForceSettlement`]
//! - **Credit model**: [`CreditLoan`]
//! - **Options**: [`OptionStrike`], [`OptionOrder`]
//! - **Synthetic assets**: [`PriceFeed`], [`BitassetData`]
//! - **Asset metadata**: [`AssetRegistry`], [`AssetType`]
//! - **Audit trail**: [`VirtualOp`], [`VirtualOpLog`]
//! - **Configuration**: [`EngineConfig`]
//! - **Errors**: [`LiquimatchError`] with `LM_ERR_` prefix codes
//! - **Constants**: protocol-wide fixed-point parameters

pub mod asset;
pub mod config;
pub mod constants;
pub mod error;
pub mod feed;
pub mod ids;
pub mod loan;
pub mod math;
pub mod order;
pub mod price;
pub mod registry;
pub mod strike;
pub mod vop;

pub use asset::*;
pub use config::*;
pub use error::*;
pub use feed::*;
pub use ids::*;
pub use loan::*;
pub use order::*;
pub use price::*;
pub use registry::*;
pub use strike::*;
pub use vop::*;

// Constants and math helpers are accessed via their modules
// (not re-exported to avoid name collisions).
