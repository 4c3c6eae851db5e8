//! # Tenant Configuration
//!
//! Maps an inbound routing key (SIP/phone number) to the configuration its upstream
//! session runs with.
//!
//! ## Key Components:
//! - **model**: `RoutingKey`, `TenantConfig` and the lenient stored record
//! - **store**: the `ConfigStore` read contract and the JSON file store
//! - **supabase**: the production store over PostgREST
//! - **resolver**: TTL cache + retry in front of a store

pub mod model;
pub mod resolver;
pub mod store;
pub mod supabase;

pub use model::{RoutingKey, TenantConfig};
pub use resolver::{ConfigResolver, RetryPolicy};
pub use store::{ConfigStore, FileStore};
pub use supabase::SupabaseStore;
