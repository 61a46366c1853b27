pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod overlay;
pub mod platform;
pub mod playback;
pub mod schedule;
pub mod sync;
pub mod cache {
    pub mod media_cache;
    pub mod surface_pool;
}
pub mod processing {
    pub mod layout;
    pub mod loader;
    pub mod scale;
}
pub mod render {
    pub mod compositor;
    pub mod context;
    pub mod pixels;
    pub mod text;
}
pub mod video {
    pub mod audio;
    pub mod probe;
    pub mod process;
    pub mod producer;
}
