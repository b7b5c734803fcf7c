//! Installation-defined constants the graph is built with.
//!
//! These are the only knobs the core reads from the outside world; there is
//! no file of its own to load, so [`GraphConfig`] is a plain value type. A
//! host application that wants to source these from a file or environment
//! can still build one with the `config` crate and copy the fields over,
//! the way `config::Config::builder()` is used anywhere else in an app.

#[derive(Debug, Clone, Copy)]
pub struct GraphConfig {
    /// Capacity of the resource handle arena (C1). Fixed at construction;
    /// the store never reallocates.
    pub max_resources: usize,
    /// Size in bytes of the per-job bump arena (C11).
    pub bump_arena_size: usize,
    /// Largest push-constant blob a compute pass may `send_data`.
    pub max_push_constant_size: u32,
    /// Frames a host application may keep in flight before it must `wait`
    /// on the oldest one. Not read by the core itself; carried here so a
    /// sample app has one place to get it from.
    pub max_frames_in_flight: u32,
}

impl Default for GraphConfig {
    fn default() -> GraphConfig {
        GraphConfig {
            max_resources: 1024,
            bump_arena_size: 10 * 1024 * 1024,
            max_push_constant_size: 128,
            max_frames_in_flight: 2,
        }
    }
}

impl GraphConfig {
    /// Builds a `GraphConfig` by layering a `config::Config` over the
    /// defaults. Any field absent from `source` keeps its default value.
    pub fn from_config(source: &config::Config) -> GraphConfig {
        let mut cfg = GraphConfig::default();
        if let Ok(v) = source.get_int("max_resources") {
            cfg.max_resources = v as usize;
        }
        if let Ok(v) = source.get_int("bump_arena_size") {
            cfg.bump_arena_size = v as usize;
        }
        if let Ok(v) = source.get_int("max_push_constant_size") {
            cfg.max_push_constant_size = v as u32;
        }
        if let Ok(v) = source.get_int("max_frames_in_flight") {
            cfg.max_frames_in_flight = v as u32;
        }
        cfg
    }
}
