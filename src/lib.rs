#[macro_use]
extern crate log;
#[macro_use]
extern crate derivative;

mod binding;
mod bump;
pub mod buffer;
mod config;
mod descriptor_cache;
pub mod device;
mod error;
pub mod graph;
pub mod handle;
pub mod image;
pub mod compute_pass;
pub mod render_pass;
pub mod surface;
mod sync_pool;
mod transfer;

pub use binding::{BindingKind, ClearColor};
pub use buffer::BufferView;
pub use config::GraphConfig;
pub use error::DeviceError;
pub use sync_pool::{Job, PendingWorkload};
pub use transfer::BufferRange;
